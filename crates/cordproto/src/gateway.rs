//! Discord gateway: payloads, events, and the WebSocket connector.
//!
//! A [`GatewayConnector`] opens one connection and hands back a channel of
//! [`GatewaySignal`]s. The connection task owns the socket: it answers
//! heartbeats, tracks ACKs, and ends the stream with exactly one
//! `Closed` signal. Reconnect policy lives in the session, not here.

use std::time::Duration;

use async_trait::async_trait;
use cordconf::IntentsConfig;
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, trace, warn};

use crate::error::GatewayError;
use crate::ids::Snowflake;
use crate::model::{Application, Channel, Guild, Member, Role, User};

pub mod opcode {
    pub const DISPATCH: u8 = 0;
    pub const HEARTBEAT: u8 = 1;
    pub const IDENTIFY: u8 = 2;
    pub const RESUME: u8 = 6;
    pub const RECONNECT: u8 = 7;
    pub const INVALID_SESSION: u8 = 9;
    pub const HELLO: u8 = 10;
    pub const HEARTBEAT_ACK: u8 = 11;
}

/// Gateway intent bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Intents(pub u64);

impl Intents {
    pub const GUILDS: Intents = Intents(1 << 0);
    pub const GUILD_MEMBERS: Intents = Intents(1 << 1);
    pub const GUILD_MODERATION: Intents = Intents(1 << 2);
    pub const GUILD_EXPRESSIONS: Intents = Intents(1 << 3);
    pub const GUILD_INTEGRATIONS: Intents = Intents(1 << 4);
    pub const GUILD_WEBHOOKS: Intents = Intents(1 << 5);
    pub const GUILD_INVITES: Intents = Intents(1 << 6);
    pub const GUILD_MESSAGES: Intents = Intents(1 << 9);
    pub const GUILD_MESSAGE_REACTIONS: Intents = Intents(1 << 10);
    pub const DIRECT_MESSAGES: Intents = Intents(1 << 12);
    pub const DIRECT_MESSAGE_REACTIONS: Intents = Intents(1 << 13);
    pub const MESSAGE_CONTENT: Intents = Intents(1 << 15);

    pub const fn empty() -> Self {
        Intents(0)
    }

    pub const fn union(self, other: Intents) -> Self {
        Intents(self.0 | other.0)
    }

    pub const fn contains(self, other: Intents) -> bool {
        self.0 & other.0 == other.0
    }

    /// Unprivileged intents, minus voice, plus whatever the config enables.
    pub fn from_config(config: &IntentsConfig) -> Self {
        let mut intents = Intents::empty()
            .union(Intents::GUILD_MODERATION)
            .union(Intents::GUILD_EXPRESSIONS)
            .union(Intents::GUILD_INTEGRATIONS)
            .union(Intents::GUILD_WEBHOOKS)
            .union(Intents::GUILD_INVITES)
            .union(Intents::GUILD_MESSAGES)
            .union(Intents::GUILD_MESSAGE_REACTIONS)
            .union(Intents::DIRECT_MESSAGES)
            .union(Intents::DIRECT_MESSAGE_REACTIONS);
        if config.guilds {
            intents = intents.union(Intents::GUILDS);
        }
        if config.members {
            intents = intents.union(Intents::GUILD_MEMBERS);
        }
        if config.message_content {
            intents = intents.union(Intents::MESSAGE_CONTENT);
        }
        intents
    }
}

/// Raw gateway frame.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayPayload {
    pub op: u8,
    #[serde(default)]
    pub d: Value,
    #[serde(default)]
    pub s: Option<u64>,
    #[serde(default)]
    pub t: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UnavailableGuild {
    pub id: Snowflake,
}

/// Dispatch events the bridge cares about. Everything else is `Other`.
#[derive(Debug, Clone)]
pub enum GatewayEvent {
    Ready {
        session_id: String,
        resume_gateway_url: Option<String>,
        user: User,
        application: Option<Application>,
        guilds: Vec<Snowflake>,
    },
    Resumed,
    GuildCreate(Box<Guild>),
    GuildUpdate(Box<Guild>),
    GuildDelete {
        id: Snowflake,
        unavailable: bool,
    },
    ChannelCreate(Box<Channel>),
    ChannelUpdate(Box<Channel>),
    ChannelDelete(Box<Channel>),
    ThreadCreate(Box<Channel>),
    ThreadUpdate(Box<Channel>),
    ThreadDelete {
        id: Snowflake,
        guild_id: Option<Snowflake>,
    },
    RoleCreate {
        guild_id: Snowflake,
        role: Role,
    },
    RoleUpdate {
        guild_id: Snowflake,
        role: Role,
    },
    RoleDelete {
        guild_id: Snowflake,
        role_id: Snowflake,
    },
    MemberAdd(Box<Member>),
    MemberUpdate(Box<Member>),
    MemberRemove {
        guild_id: Snowflake,
        user: User,
    },
    Other(String),
}

impl GatewayEvent {
    /// Decode a dispatch (`op 0`) by its event name.
    pub fn decode(name: &str, data: Value) -> Result<Self, serde_json::Error> {
        #[derive(Deserialize)]
        struct ReadyData {
            session_id: String,
            #[serde(default)]
            resume_gateway_url: Option<String>,
            user: User,
            #[serde(default)]
            application: Option<Application>,
            #[serde(default)]
            guilds: Vec<UnavailableGuild>,
        }

        #[derive(Deserialize)]
        struct GuildDeleteData {
            id: Snowflake,
            #[serde(default)]
            unavailable: bool,
        }

        #[derive(Deserialize)]
        struct ThreadDeleteData {
            id: Snowflake,
            #[serde(default)]
            guild_id: Option<Snowflake>,
        }

        #[derive(Deserialize)]
        struct RoleData {
            guild_id: Snowflake,
            role: Role,
        }

        #[derive(Deserialize)]
        struct RoleDeleteData {
            guild_id: Snowflake,
            role_id: Snowflake,
        }

        #[derive(Deserialize)]
        struct MemberRemoveData {
            guild_id: Snowflake,
            user: User,
        }

        let event = match name {
            "READY" => {
                let d: ReadyData = serde_json::from_value(data)?;
                GatewayEvent::Ready {
                    session_id: d.session_id,
                    resume_gateway_url: d.resume_gateway_url,
                    user: d.user,
                    application: d.application,
                    guilds: d.guilds.into_iter().map(|g| g.id).collect(),
                }
            }
            "RESUMED" => GatewayEvent::Resumed,
            "GUILD_CREATE" => GatewayEvent::GuildCreate(Box::new(serde_json::from_value(data)?)),
            "GUILD_UPDATE" => GatewayEvent::GuildUpdate(Box::new(serde_json::from_value(data)?)),
            "GUILD_DELETE" => {
                let d: GuildDeleteData = serde_json::from_value(data)?;
                GatewayEvent::GuildDelete {
                    id: d.id,
                    unavailable: d.unavailable,
                }
            }
            "CHANNEL_CREATE" => GatewayEvent::ChannelCreate(Box::new(serde_json::from_value(data)?)),
            "CHANNEL_UPDATE" => GatewayEvent::ChannelUpdate(Box::new(serde_json::from_value(data)?)),
            "CHANNEL_DELETE" => GatewayEvent::ChannelDelete(Box::new(serde_json::from_value(data)?)),
            "THREAD_CREATE" => GatewayEvent::ThreadCreate(Box::new(serde_json::from_value(data)?)),
            "THREAD_UPDATE" => GatewayEvent::ThreadUpdate(Box::new(serde_json::from_value(data)?)),
            "THREAD_DELETE" => {
                let d: ThreadDeleteData = serde_json::from_value(data)?;
                GatewayEvent::ThreadDelete {
                    id: d.id,
                    guild_id: d.guild_id,
                }
            }
            "GUILD_ROLE_CREATE" => {
                let d: RoleData = serde_json::from_value(data)?;
                GatewayEvent::RoleCreate {
                    guild_id: d.guild_id,
                    role: d.role,
                }
            }
            "GUILD_ROLE_UPDATE" => {
                let d: RoleData = serde_json::from_value(data)?;
                GatewayEvent::RoleUpdate {
                    guild_id: d.guild_id,
                    role: d.role,
                }
            }
            "GUILD_ROLE_DELETE" => {
                let d: RoleDeleteData = serde_json::from_value(data)?;
                GatewayEvent::RoleDelete {
                    guild_id: d.guild_id,
                    role_id: d.role_id,
                }
            }
            "GUILD_MEMBER_ADD" => GatewayEvent::MemberAdd(Box::new(serde_json::from_value(data)?)),
            "GUILD_MEMBER_UPDATE" => {
                GatewayEvent::MemberUpdate(Box::new(serde_json::from_value(data)?))
            }
            "GUILD_MEMBER_REMOVE" => {
                let d: MemberRemoveData = serde_json::from_value(data)?;
                GatewayEvent::MemberRemove {
                    guild_id: d.guild_id,
                    user: d.user,
                }
            }
            other => GatewayEvent::Other(other.to_string()),
        };

        Ok(event)
    }

    pub fn name(&self) -> &str {
        match self {
            GatewayEvent::Ready { .. } => "READY",
            GatewayEvent::Resumed => "RESUMED",
            GatewayEvent::GuildCreate(_) => "GUILD_CREATE",
            GatewayEvent::GuildUpdate(_) => "GUILD_UPDATE",
            GatewayEvent::GuildDelete { .. } => "GUILD_DELETE",
            GatewayEvent::ChannelCreate(_) => "CHANNEL_CREATE",
            GatewayEvent::ChannelUpdate(_) => "CHANNEL_UPDATE",
            GatewayEvent::ChannelDelete(_) => "CHANNEL_DELETE",
            GatewayEvent::ThreadCreate(_) => "THREAD_CREATE",
            GatewayEvent::ThreadUpdate(_) => "THREAD_UPDATE",
            GatewayEvent::ThreadDelete { .. } => "THREAD_DELETE",
            GatewayEvent::RoleCreate { .. } => "GUILD_ROLE_CREATE",
            GatewayEvent::RoleUpdate { .. } => "GUILD_ROLE_UPDATE",
            GatewayEvent::RoleDelete { .. } => "GUILD_ROLE_DELETE",
            GatewayEvent::MemberAdd(_) => "GUILD_MEMBER_ADD",
            GatewayEvent::MemberUpdate(_) => "GUILD_MEMBER_UPDATE",
            GatewayEvent::MemberRemove { .. } => "GUILD_MEMBER_REMOVE",
            GatewayEvent::Other(name) => name,
        }
    }
}

/// Why a connection ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseReason {
    /// Discord asked us to reconnect (op 7). Resume is allowed.
    Reconnect,
    /// op 9, or a close code that invalidates the session.
    InvalidSession { resumable: bool },
    /// Socket error, zombie connection, or an ordinary close.
    Dropped(String),
    /// Reconnecting cannot help (bad token, disallowed intents).
    Fatal { code: u16, reason: String },
}

#[derive(Debug, Clone)]
pub enum GatewaySignal {
    Dispatch { seq: u64, event: GatewayEvent },
    Closed(CloseReason),
}

/// Enough to resume a dropped session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResumeInfo {
    pub session_id: String,
    pub seq: u64,
    pub resume_url: Option<String>,
}

#[async_trait]
pub trait GatewayConnector: Send + Sync + 'static {
    /// Open a connection, identifying fresh or resuming.
    ///
    /// The returned stream ends with one `Closed` signal. Dropping the
    /// receiver closes the socket.
    async fn open(
        &self,
        resume: Option<ResumeInfo>,
    ) -> Result<mpsc::Receiver<GatewaySignal>, GatewayError>;
}

/// Close codes after which reconnecting with the same settings cannot work.
pub fn is_fatal_close(code: u16) -> bool {
    matches!(code, 4004 | 4010 | 4011 | 4012 | 4013 | 4014)
}

fn describe_close(code: u16) -> &'static str {
    match code {
        4000 => "unknown error",
        4001 => "unknown opcode",
        4002 => "decode error",
        4003 => "not authenticated",
        4004 => "authentication failed",
        4005 => "already authenticated",
        4007 => "invalid seq",
        4008 => "rate limited",
        4009 => "session timed out",
        4010 => "invalid shard",
        4011 => "sharding required",
        4012 => "invalid API version",
        4013 => "invalid intents",
        4014 => "disallowed intents",
        _ => "connection closed",
    }
}

/// Map a close frame to what the session should do next.
pub fn close_reason(code: u16, reason: &str) -> CloseReason {
    if is_fatal_close(code) {
        CloseReason::Fatal {
            code,
            reason: if reason.is_empty() {
                describe_close(code).to_string()
            } else {
                reason.to_string()
            },
        }
    } else if matches!(code, 4007 | 4009) {
        CloseReason::InvalidSession { resumable: false }
    } else {
        CloseReason::Dropped(format!("{code} {}", describe_close(code)))
    }
}

/// Gateway over `tokio-tungstenite`.
pub struct WsGateway {
    url: String,
    token: String,
    intents: Intents,
    handshake_timeout: Duration,
}

impl WsGateway {
    pub fn new(url: &str, token: &str, intents: Intents) -> Self {
        Self {
            url: url.to_string(),
            token: token.to_string(),
            intents,
            handshake_timeout: Duration::from_secs(30),
        }
    }

    fn identify(&self) -> Value {
        json!({
            "op": opcode::IDENTIFY,
            "d": {
                "token": self.token,
                "intents": self.intents.0,
                "properties": {
                    "os": std::env::consts::OS,
                    "browser": "cordrelay",
                    "device": "cordrelay",
                },
            },
        })
    }

    fn resume(&self, info: &ResumeInfo) -> Value {
        json!({
            "op": opcode::RESUME,
            "d": {
                "token": self.token,
                "session_id": info.session_id,
                "seq": info.seq,
            },
        })
    }
}

/// Resume URLs come back bare; we need the version and encoding again.
fn with_gateway_query(url: &str) -> String {
    if url.contains('?') {
        url.to_string()
    } else {
        format!("{}/?v=10&encoding=json", url.trim_end_matches('/'))
    }
}

#[async_trait]
impl GatewayConnector for WsGateway {
    async fn open(
        &self,
        resume: Option<ResumeInfo>,
    ) -> Result<mpsc::Receiver<GatewaySignal>, GatewayError> {
        let url = match resume.as_ref().and_then(|r| r.resume_url.as_deref()) {
            Some(resume_url) => with_gateway_query(resume_url),
            None => self.url.clone(),
        };

        debug!(url = %url, resuming = resume.is_some(), "opening gateway");
        let (ws, _) = connect_async(url.as_str())
            .await
            .map_err(|e| GatewayError::Connect(e.to_string()))?;
        let (mut ws_tx, mut ws_rx) = ws.split();

        // HELLO carries the heartbeat interval
        let hello = tokio::time::timeout(self.handshake_timeout, ws_rx.next())
            .await
            .map_err(|_| GatewayError::Handshake("no HELLO within timeout".into()))?;
        let heartbeat_interval = match hello {
            Some(Ok(Message::Text(text))) => {
                let payload: GatewayPayload = serde_json::from_str(text.as_str())
                    .map_err(|e| GatewayError::Handshake(format!("bad HELLO: {e}")))?;
                if payload.op != opcode::HELLO {
                    return Err(GatewayError::Handshake(format!(
                        "expected HELLO, got op {}",
                        payload.op
                    )));
                }
                payload
                    .d
                    .get("heartbeat_interval")
                    .and_then(Value::as_u64)
                    .map(Duration::from_millis)
                    .ok_or_else(|| GatewayError::Handshake("HELLO without interval".into()))?
            }
            Some(Ok(Message::Close(frame))) => {
                let (code, reason) = frame
                    .map(|f| (u16::from(f.code), f.reason.to_string()))
                    .unwrap_or((1000, String::new()));
                return Err(match close_reason(code, &reason) {
                    CloseReason::Fatal { code, reason } => GatewayError::Fatal { code, reason },
                    other => GatewayError::Handshake(format!("closed during handshake: {other:?}")),
                });
            }
            Some(Ok(other)) => {
                return Err(GatewayError::Handshake(format!(
                    "unexpected frame before HELLO: {other:?}"
                )))
            }
            Some(Err(e)) => return Err(GatewayError::Handshake(e.to_string())),
            None => return Err(GatewayError::Handshake("stream ended before HELLO".into())),
        };

        let (first, seq) = match &resume {
            Some(info) => (self.resume(info), Some(info.seq)),
            None => (self.identify(), None),
        };
        ws_tx
            .send(Message::Text(first.to_string().into()))
            .await
            .map_err(|e| GatewayError::Handshake(e.to_string()))?;

        info!(
            heartbeat_ms = heartbeat_interval.as_millis() as u64,
            resuming = resume.is_some(),
            "gateway connected"
        );

        let (tx, rx) = mpsc::channel(256);
        tokio::spawn(connection_task(ws_tx, ws_rx, tx, heartbeat_interval, seq));
        Ok(rx)
    }
}

/// Owns the socket until the connection ends or the receiver goes away.
async fn connection_task<W, R>(
    mut ws_tx: W,
    mut ws_rx: R,
    tx: mpsc::Sender<GatewaySignal>,
    heartbeat_interval: Duration,
    mut seq: Option<u64>,
) where
    W: futures::Sink<Message> + Unpin,
    W::Error: std::fmt::Display,
    R: futures::Stream<Item = Result<Message, tokio_tungstenite::tungstenite::Error>> + Unpin,
{
    let mut heartbeat = tokio::time::interval_at(
        tokio::time::Instant::now() + heartbeat_interval,
        heartbeat_interval,
    );
    heartbeat.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    let mut acked = true;

    let reason = loop {
        tokio::select! {
            _ = tx.closed() => {
                debug!("gateway receiver dropped; closing socket");
                let _ = ws_tx.send(Message::Close(None)).await;
                return;
            }

            _ = heartbeat.tick() => {
                if !acked {
                    warn!("heartbeat not acknowledged; treating connection as dead");
                    let _ = ws_tx.send(Message::Close(None)).await;
                    break CloseReason::Dropped("zombie connection".into());
                }
                let beat = json!({"op": opcode::HEARTBEAT, "d": seq});
                if let Err(e) = ws_tx.send(Message::Text(beat.to_string().into())).await {
                    break CloseReason::Dropped(format!("heartbeat send failed: {e}"));
                }
                acked = false;
                trace!(?seq, "heartbeat sent");
            }

            frame = ws_rx.next() => {
                let text = match frame {
                    Some(Ok(Message::Text(text))) => text,
                    Some(Ok(Message::Close(frame))) => {
                        let (code, why) = frame
                            .map(|f| (u16::from(f.code), f.reason.to_string()))
                            .unwrap_or((1000, String::new()));
                        break close_reason(code, &why);
                    }
                    Some(Ok(_)) => continue,
                    Some(Err(e)) => break CloseReason::Dropped(e.to_string()),
                    None => break CloseReason::Dropped("stream ended".into()),
                };

                let payload: GatewayPayload = match serde_json::from_str(text.as_str()) {
                    Ok(p) => p,
                    Err(e) => {
                        warn!(error = %e, "undecodable gateway frame");
                        continue;
                    }
                };

                match payload.op {
                    opcode::DISPATCH => {
                        if let Some(s) = payload.s {
                            seq = Some(s);
                        }
                        let name = payload.t.unwrap_or_default();
                        let event = match GatewayEvent::decode(&name, payload.d) {
                            Ok(event) => event,
                            Err(e) => {
                                warn!(event = %name, error = %e, "failed to decode dispatch");
                                GatewayEvent::Other(name)
                            }
                        };
                        let signal = GatewaySignal::Dispatch { seq: seq.unwrap_or(0), event };
                        if tx.send(signal).await.is_err() {
                            let _ = ws_tx.send(Message::Close(None)).await;
                            return;
                        }
                    }
                    opcode::HEARTBEAT => {
                        let beat = json!({"op": opcode::HEARTBEAT, "d": seq});
                        if let Err(e) = ws_tx.send(Message::Text(beat.to_string().into())).await {
                            break CloseReason::Dropped(format!("heartbeat send failed: {e}"));
                        }
                    }
                    opcode::HEARTBEAT_ACK => acked = true,
                    opcode::RECONNECT => {
                        let _ = ws_tx.send(Message::Close(None)).await;
                        break CloseReason::Reconnect;
                    }
                    opcode::INVALID_SESSION => {
                        let resumable = payload.d.as_bool().unwrap_or(false);
                        let _ = ws_tx.send(Message::Close(None)).await;
                        break CloseReason::InvalidSession { resumable };
                    }
                    other => trace!(op = other, "ignoring gateway op"),
                }
            }
        }
    };

    info!(reason = ?reason, "gateway connection ended");
    let _ = tx.send(GatewaySignal::Closed(reason)).await;
}
