//! Entity cache.
//!
//! One writer (the session's ingestion task) applies [`CacheUpdate`]s and
//! publishes a fresh [`CacheSnapshot`] through an `ArcSwap`. Readers load
//! the current snapshot without locking. Entities are replaced whole, never
//! edited in place, so a reader never sees a half-applied event.

use std::collections::HashMap;
use std::sync::Arc;

use arc_swap::ArcSwap;

use crate::gateway::GatewayEvent;
use crate::ids::Snowflake;
use crate::model::{Channel, Guild, Member, Role};

type Map<K, V> = Arc<HashMap<K, Arc<V>>>;

/// An immutable view of everything the cache knows.
#[derive(Debug, Clone, Default)]
pub struct CacheSnapshot {
    guilds: Map<Snowflake, Guild>,
    channels: Map<Snowflake, Channel>,
    roles: Map<Snowflake, Role>,
    members: Map<(Snowflake, Snowflake), Member>,
}

impl CacheSnapshot {
    pub fn guild(&self, id: Snowflake) -> Option<Arc<Guild>> {
        self.guilds.get(&id).cloned()
    }

    pub fn guild_count(&self) -> usize {
        self.guilds.len()
    }

    pub fn guild_ids(&self) -> Vec<Snowflake> {
        let mut ids: Vec<_> = self.guilds.keys().copied().collect();
        ids.sort();
        ids
    }

    pub fn channel(&self, id: Snowflake) -> Option<Arc<Channel>> {
        self.channels.get(&id).cloned()
    }

    /// Channels and threads of a guild, ordered by position then id.
    pub fn channels_in(&self, guild_id: Snowflake) -> Vec<Arc<Channel>> {
        let mut channels: Vec<_> = self
            .channels
            .values()
            .filter(|c| c.guild_id == Some(guild_id))
            .cloned()
            .collect();
        channels.sort_by_key(|c| (c.position.unwrap_or(i64::MAX), c.id));
        channels
    }

    pub fn role(&self, id: Snowflake) -> Option<Arc<Role>> {
        self.roles.get(&id).cloned()
    }

    /// Roles of a guild, highest first.
    pub fn roles_in(&self, guild_id: Snowflake) -> Vec<Arc<Role>> {
        let mut roles: Vec<_> = self
            .roles
            .values()
            .filter(|r| r.guild_id == Some(guild_id))
            .cloned()
            .collect();
        roles.sort_by_key(|r| (std::cmp::Reverse(r.position), r.id));
        roles
    }

    pub fn member(&self, guild_id: Snowflake, user_id: Snowflake) -> Option<Arc<Member>> {
        self.members.get(&(guild_id, user_id)).cloned()
    }

    pub fn members_in(&self, guild_id: Snowflake) -> Vec<Arc<Member>> {
        let mut members: Vec<_> = self
            .members
            .iter()
            .filter(|((g, _), _)| *g == guild_id)
            .map(|(_, m)| m.clone())
            .collect();
        members.sort_by_key(|m| m.user_id());
        members
    }

    pub fn is_empty(&self) -> bool {
        self.guilds.is_empty() && self.channels.is_empty()
    }
}

/// A single change to the cache, from a pushed event or a local reflection
/// of a mutation this process just completed.
#[derive(Debug, Clone)]
pub enum CacheUpdate {
    Clear,
    UpsertGuild(Box<Guild>),
    RemoveGuild(Snowflake),
    UpsertChannel(Box<Channel>),
    RemoveChannel(Snowflake),
    UpsertRole { guild_id: Snowflake, role: Role },
    RemoveRole { guild_id: Snowflake, role_id: Snowflake },
    UpsertMember { guild_id: Snowflake, member: Box<Member> },
    RemoveMember { guild_id: Snowflake, user_id: Snowflake },
    MemberRoleAdded { guild_id: Snowflake, user_id: Snowflake, role_id: Snowflake },
    MemberRoleRemoved { guild_id: Snowflake, user_id: Snowflake, role_id: Snowflake },
}

impl CacheUpdate {
    /// The cache change a gateway event implies, if any.
    ///
    /// READY is handled by the session since it depends on whether the
    /// connection resumed.
    pub fn from_event(event: GatewayEvent) -> Option<Self> {
        let update = match event {
            GatewayEvent::GuildCreate(guild) | GatewayEvent::GuildUpdate(guild) => {
                CacheUpdate::UpsertGuild(guild)
            }
            GatewayEvent::GuildDelete { id, .. } => CacheUpdate::RemoveGuild(id),
            GatewayEvent::ChannelCreate(channel)
            | GatewayEvent::ChannelUpdate(channel)
            | GatewayEvent::ThreadCreate(channel)
            | GatewayEvent::ThreadUpdate(channel) => CacheUpdate::UpsertChannel(channel),
            GatewayEvent::ChannelDelete(channel) => CacheUpdate::RemoveChannel(channel.id),
            GatewayEvent::ThreadDelete { id, .. } => CacheUpdate::RemoveChannel(id),
            GatewayEvent::RoleCreate { guild_id, role }
            | GatewayEvent::RoleUpdate { guild_id, role } => {
                CacheUpdate::UpsertRole { guild_id, role }
            }
            GatewayEvent::RoleDelete { guild_id, role_id } => {
                CacheUpdate::RemoveRole { guild_id, role_id }
            }
            GatewayEvent::MemberAdd(member) | GatewayEvent::MemberUpdate(member) => {
                let guild_id = member.guild_id?;
                CacheUpdate::UpsertMember { guild_id, member }
            }
            GatewayEvent::MemberRemove { guild_id, user } => CacheUpdate::RemoveMember {
                guild_id,
                user_id: user.id,
            },
            GatewayEvent::Ready { .. } | GatewayEvent::Resumed | GatewayEvent::Other(_) => {
                return None
            }
        };
        Some(update)
    }
}

/// Single-writer, many-reader entity store.
#[derive(Debug, Default)]
pub struct EntityCache {
    current: ArcSwap<CacheSnapshot>,
}

impl EntityCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// The current snapshot. Cheap; holds no lock.
    pub fn snapshot(&self) -> Arc<CacheSnapshot> {
        self.current.load_full()
    }

    /// Apply one update and publish the result. Call from one task only.
    pub fn apply(&self, update: CacheUpdate) {
        let mut next = CacheSnapshot::clone(&self.current.load());
        apply_to(&mut next, update);
        self.current.store(Arc::new(next));
    }
}

fn apply_to(snap: &mut CacheSnapshot, update: CacheUpdate) {
    match update {
        CacheUpdate::Clear => *snap = CacheSnapshot::default(),

        CacheUpdate::UpsertGuild(guild) => {
            let mut guild = *guild;
            let guild_id = guild.id;
            let channels = std::mem::take(&mut guild.channels);
            let threads = std::mem::take(&mut guild.threads);
            let roles = std::mem::take(&mut guild.roles);
            let members = std::mem::take(&mut guild.members);

            // GUILD_UPDATE omits counts the snapshot had
            if guild.member_count.is_none() {
                if let Some(previous) = snap.guilds.get(&guild_id) {
                    guild.member_count = previous.member_count;
                }
            }

            if !channels.is_empty() || !threads.is_empty() {
                let map = Arc::make_mut(&mut snap.channels);
                // A full snapshot replaces the guild's channels
                if !channels.is_empty() {
                    map.retain(|_, c| c.guild_id != Some(guild_id));
                }
                for mut channel in channels.into_iter().chain(threads) {
                    channel.guild_id.get_or_insert(guild_id);
                    map.insert(channel.id, Arc::new(channel));
                }
            }
            if !roles.is_empty() {
                let map = Arc::make_mut(&mut snap.roles);
                map.retain(|_, r| r.guild_id != Some(guild_id));
                for mut role in roles {
                    role.guild_id = Some(guild_id);
                    map.insert(role.id, Arc::new(role));
                }
            }
            if !members.is_empty() {
                let map = Arc::make_mut(&mut snap.members);
                for mut member in members {
                    if let Some(user_id) = member.user_id() {
                        member.guild_id = Some(guild_id);
                        map.insert((guild_id, user_id), Arc::new(member));
                    }
                }
            }

            Arc::make_mut(&mut snap.guilds).insert(guild_id, Arc::new(guild));
        }

        CacheUpdate::RemoveGuild(guild_id) => {
            Arc::make_mut(&mut snap.guilds).remove(&guild_id);
            Arc::make_mut(&mut snap.channels).retain(|_, c| c.guild_id != Some(guild_id));
            Arc::make_mut(&mut snap.roles).retain(|_, r| r.guild_id != Some(guild_id));
            Arc::make_mut(&mut snap.members).retain(|(g, _), _| *g != guild_id);
        }

        CacheUpdate::UpsertChannel(channel) => {
            let mut channel = *channel;
            if channel.guild_id.is_none() {
                channel.guild_id = snap.channels.get(&channel.id).and_then(|c| c.guild_id);
            }
            Arc::make_mut(&mut snap.channels).insert(channel.id, Arc::new(channel));
        }

        CacheUpdate::RemoveChannel(channel_id) => {
            // Threads go with their parent
            Arc::make_mut(&mut snap.channels).retain(|id, c| {
                *id != channel_id && !(c.kind.is_thread() && c.parent_id == Some(channel_id))
            });
        }

        CacheUpdate::UpsertRole { guild_id, mut role } => {
            role.guild_id = Some(guild_id);
            Arc::make_mut(&mut snap.roles).insert(role.id, Arc::new(role));
        }

        CacheUpdate::RemoveRole { guild_id, role_id } => {
            Arc::make_mut(&mut snap.roles).remove(&role_id);
            let stale: Vec<_> = snap
                .members
                .iter()
                .filter(|((g, _), m)| *g == guild_id && m.roles.contains(&role_id))
                .map(|(k, _)| *k)
                .collect();
            if !stale.is_empty() {
                let map = Arc::make_mut(&mut snap.members);
                for key in stale {
                    if let Some(existing) = map.get(&key) {
                        let mut member = Member::clone(existing);
                        member.roles.retain(|r| *r != role_id);
                        map.insert(key, Arc::new(member));
                    }
                }
            }
        }

        CacheUpdate::UpsertMember {
            guild_id,
            mut member,
        } => {
            if let Some(user_id) = member.user_id() {
                member.guild_id = Some(guild_id);
                Arc::make_mut(&mut snap.members).insert((guild_id, user_id), Arc::new(*member));
            }
        }

        CacheUpdate::RemoveMember { guild_id, user_id } => {
            Arc::make_mut(&mut snap.members).remove(&(guild_id, user_id));
        }

        CacheUpdate::MemberRoleAdded {
            guild_id,
            user_id,
            role_id,
        } => {
            if let Some(existing) = snap.members.get(&(guild_id, user_id)) {
                if !existing.roles.contains(&role_id) {
                    let mut member = Member::clone(existing);
                    member.roles.push(role_id);
                    Arc::make_mut(&mut snap.members).insert((guild_id, user_id), Arc::new(member));
                }
            }
        }

        CacheUpdate::MemberRoleRemoved {
            guild_id,
            user_id,
            role_id,
        } => {
            if let Some(existing) = snap.members.get(&(guild_id, user_id)) {
                if existing.roles.contains(&role_id) {
                    let mut member = Member::clone(existing);
                    member.roles.retain(|r| *r != role_id);
                    Arc::make_mut(&mut snap.members).insert((guild_id, user_id), Arc::new(member));
                }
            }
        }
    }
}
