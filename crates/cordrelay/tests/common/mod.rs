//! Shared fixtures: a bridge wired to the fake transports.
#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use cordconf::CordConfig;
use cordproto::testing::{self, FakeGateway, FakeRest};
use cordproto::{ChannelKind, Guild, RemoteSession, SessionConfig};
use cordrelay::{Bridge, Dispatcher, Invocation, Lifecycle, Response};
use serde_json::Value;

pub const GUILD: u64 = 1;
pub const GENERAL: u64 = 20;
pub const FORUM: u64 = 21;
pub const THREAD: u64 = 22;
pub const MOD_ROLE: u64 = 40;
pub const ALICE: u64 = 50;

pub struct Harness {
    pub rest: Arc<FakeRest>,
    pub gateway: Arc<FakeGateway>,
    pub session: Arc<RemoteSession>,
    pub lifecycle: Arc<Lifecycle>,
    pub dispatcher: Arc<Dispatcher>,
}

impl Harness {
    pub async fn call(&self, operation: &str, arguments: Value) -> Response {
        self.dispatcher
            .dispatch(Invocation::new(operation, arguments))
            .await
    }

    pub async fn settle(&self) {
        testing::settle(&self.session).await;
    }
}

/// One guild with a text channel, a forum, a thread, a role, and a member.
pub fn fixture_guild() -> Guild {
    let mut guild = testing::guild_with_channel(GUILD, GENERAL, "general");

    let mut forum = testing::text_channel(FORUM, GUILD, "ideas");
    forum.kind = ChannelKind::Forum;
    forum.position = Some(1);
    guild.channels.push(forum);

    let mut thread = testing::text_channel(THREAD, GUILD, "release-plan");
    thread.kind = ChannelKind::PublicThread;
    thread.parent_id = Some(cordproto::Snowflake(GENERAL));
    guild.threads.push(thread);

    let mut moderators = testing::role(MOD_ROLE, GUILD, "Moderators", 1);
    moderators.color = 0x3498DB;
    guild.roles.push(moderators);

    guild.members.push(testing::member(ALICE, "alice", &[]));
    guild
}

pub async fn harness() -> Harness {
    harness_with(CordConfig::default()).await
}

/// Connect and wait for READY plus the guild snapshot.
pub async fn harness_with(config: CordConfig) -> Harness {
    let rest = FakeRest::new();
    let gateway = FakeGateway::new();
    gateway.add_guild(fixture_guild());

    let session = RemoteSession::new(rest.clone(), gateway.clone(), SessionConfig::default());
    let bridge = Bridge::with_session(session, &config).unwrap();
    bridge.lifecycle.start().await.unwrap();
    testing::settle(&bridge.session).await;

    Harness {
        rest,
        gateway,
        session: bridge.session,
        lifecycle: bridge.lifecycle,
        dispatcher: bridge.dispatcher,
    }
}

pub fn config_with_deadline(deadline: Duration) -> CordConfig {
    let mut config = CordConfig::default();
    config.dispatch.deadline_secs = deadline.as_secs();
    config
}
