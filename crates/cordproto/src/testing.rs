//! Test doubles for the REST and gateway transports.
//!
//! Enabled for this crate's own tests and, through the `testing` feature,
//! for downstream crates.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Value};
use tokio::sync::{mpsc, Notify};
use tokio::time::Instant;

use crate::error::{GatewayError, TransportError};
use crate::gateway::{CloseReason, GatewayConnector, GatewayEvent, GatewaySignal, ResumeInfo};
use crate::ids::Snowflake;
use crate::model::{Application, Channel, ChannelKind, Guild, Member, Role, User};
use crate::rest::{RestResponse, RestTransport};
use crate::route::{Method, RestRequest};
use crate::session::RemoteSession;

pub const BOT_USER_ID: Snowflake = Snowflake(1);
pub const APPLICATION_ID: Snowflake = Snowflake(777);

type Responder = Box<dyn Fn(&RestRequest) -> RestResponse + Send + Sync>;

struct ScriptedRoute {
    method: Method,
    path: String,
    queued: VecDeque<Result<RestResponse, TransportError>>,
    fallback: Option<Responder>,
}

/// One request the fake saw.
#[derive(Debug, Clone)]
pub struct RecordedCall {
    pub method: Method,
    pub path: String,
    pub query: Vec<(String, String)>,
    pub body: Option<Value>,
    pub reason: Option<String>,
    pub at: Instant,
}

/// Scripted REST transport. Unscripted paths answer 404.
#[derive(Default)]
pub struct FakeRest {
    routes: Mutex<Vec<ScriptedRoute>>,
    calls: Mutex<Vec<RecordedCall>>,
    latency: Mutex<Duration>,
}

impl FakeRest {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn with_route<F: FnOnce(&mut ScriptedRoute)>(&self, method: Method, path: &str, f: F) {
        let mut routes = self.routes.lock();
        let idx = match routes
            .iter()
            .position(|r| r.method == method && r.path == path)
        {
            Some(idx) => idx,
            None => {
                routes.push(ScriptedRoute {
                    method,
                    path: path.to_string(),
                    queued: VecDeque::new(),
                    fallback: None,
                });
                routes.len() - 1
            }
        };
        f(&mut routes[idx]);
    }

    /// Answer every call to `path` with this status and body.
    pub fn respond(&self, method: Method, path: &str, status: u16, body: Value) {
        let response = RestResponse::json(status, body);
        self.with_route(method, path, move |r| {
            r.fallback = Some(Box::new(move |_: &RestRequest| response.clone()));
        });
    }

    /// Answer every call to `path` by running `f`.
    pub fn respond_with<F>(&self, method: Method, path: &str, f: F)
    where
        F: Fn(&RestRequest) -> RestResponse + Send + Sync + 'static,
    {
        self.with_route(method, path, move |r| r.fallback = Some(Box::new(f)));
    }

    /// Answer the next call to `path` with `response`; queued answers are
    /// used in order before the standing one.
    pub fn respond_once(&self, method: Method, path: &str, response: RestResponse) {
        self.with_route(method, path, move |r| r.queued.push_back(Ok(response)));
    }

    /// Fail the next call to `path` before any status is seen.
    pub fn fail_once(&self, method: Method, path: &str, error: TransportError) {
        self.with_route(method, path, move |r| r.queued.push_back(Err(error)));
    }

    /// Delay every response by `latency`.
    pub fn set_latency(&self, latency: Duration) {
        *self.latency.lock() = latency;
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }

    pub fn calls_to(&self, method: Method, path: &str) -> Vec<RecordedCall> {
        self.calls
            .lock()
            .iter()
            .filter(|c| c.method == method && c.path == path)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl RestTransport for FakeRest {
    async fn execute(&self, request: &RestRequest) -> Result<RestResponse, TransportError> {
        self.calls.lock().push(RecordedCall {
            method: request.method,
            path: request.path.clone(),
            query: request.query.clone(),
            body: request.body.clone(),
            reason: request.reason.clone(),
            at: Instant::now(),
        });

        let latency = *self.latency.lock();
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }

        let mut routes = self.routes.lock();
        let Some(route) = routes
            .iter_mut()
            .find(|r| r.method == request.method && r.path == request.path)
        else {
            return Ok(RestResponse::json(
                404,
                json!({"code": 0, "message": "404: Not Found"}),
            ));
        };

        if let Some(next) = route.queued.pop_front() {
            return next;
        }
        match &route.fallback {
            Some(responder) => Ok(responder(request)),
            None => Ok(RestResponse::json(
                404,
                json!({"code": 0, "message": "404: Not Found"}),
            )),
        }
    }
}

struct FakeGatewayState {
    guilds: Vec<Guild>,
    current: Option<mpsc::Sender<GatewaySignal>>,
    seq: u64,
    sessions: u64,
    opens: Vec<Option<ResumeInfo>>,
    accept_resume: bool,
    failures: VecDeque<GatewayError>,
}

/// Gateway driven by the test: it answers `open` with READY (or RESUMED)
/// and lets the test push events and break the connection.
pub struct FakeGateway {
    state: Mutex<FakeGatewayState>,
    opened: Notify,
}

impl FakeGateway {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(FakeGatewayState {
                guilds: Vec::new(),
                current: None,
                seq: 0,
                sessions: 0,
                opens: Vec::new(),
                accept_resume: true,
                failures: VecDeque::new(),
            }),
            opened: Notify::new(),
        })
    }

    /// Include this guild in every fresh session's GUILD_CREATE burst.
    pub fn add_guild(&self, guild: Guild) {
        self.state.lock().guilds.push(guild);
    }

    pub fn set_accept_resume(&self, accept: bool) {
        self.state.lock().accept_resume = accept;
    }

    /// Make the next `open` fail with `error`.
    pub fn fail_next_open(&self, error: GatewayError) {
        self.state.lock().failures.push_back(error);
    }

    /// Push a dispatch on the live connection. False when there is none.
    pub fn emit(&self, event: GatewayEvent) -> bool {
        let mut state = self.state.lock();
        state.seq += 1;
        let seq = state.seq;
        match &state.current {
            Some(tx) => tx.try_send(GatewaySignal::Dispatch { seq, event }).is_ok(),
            None => false,
        }
    }

    /// End the live connection with `reason`.
    pub fn close_with(&self, reason: CloseReason) {
        if let Some(tx) = self.state.lock().current.take() {
            let _ = tx.try_send(GatewaySignal::Closed(reason));
        }
    }

    /// Simulate a network drop.
    pub fn drop_connection(&self) {
        self.close_with(CloseReason::Dropped("connection reset".into()));
    }

    pub fn open_count(&self) -> usize {
        self.state.lock().opens.len()
    }

    /// Resume info passed to each `open`, in order.
    pub fn opens(&self) -> Vec<Option<ResumeInfo>> {
        self.state.lock().opens.clone()
    }

    pub async fn wait_for_opens(&self, n: usize) {
        loop {
            let notified = self.opened.notified();
            if self.open_count() >= n {
                return;
            }
            notified.await;
        }
    }
}

#[async_trait]
impl GatewayConnector for FakeGateway {
    async fn open(
        &self,
        resume: Option<ResumeInfo>,
    ) -> Result<mpsc::Receiver<GatewaySignal>, GatewayError> {
        let mut state = self.state.lock();
        state.opens.push(resume.clone());
        self.opened.notify_waiters();

        if let Some(err) = state.failures.pop_front() {
            return Err(err);
        }

        let (tx, rx) = mpsc::channel(1024);

        match resume {
            Some(_) if state.accept_resume => {
                state.seq += 1;
                let _ = tx.try_send(GatewaySignal::Dispatch {
                    seq: state.seq,
                    event: GatewayEvent::Resumed,
                });
            }
            Some(_) => {
                let _ = tx.try_send(GatewaySignal::Closed(CloseReason::InvalidSession {
                    resumable: false,
                }));
                return Ok(rx);
            }
            None => {
                state.sessions += 1;
                state.seq = 1;
                let ready = GatewayEvent::Ready {
                    session_id: format!("fake-session-{}", state.sessions),
                    resume_gateway_url: None,
                    user: user(BOT_USER_ID.0, "cordrelay"),
                    application: Some(Application {
                        id: APPLICATION_ID,
                        name: None,
                    }),
                    guilds: state.guilds.iter().map(|g| g.id).collect(),
                };
                let _ = tx.try_send(GatewaySignal::Dispatch {
                    seq: state.seq,
                    event: ready,
                });
                let guilds = state.guilds.clone();
                for guild in guilds {
                    state.seq += 1;
                    let _ = tx.try_send(GatewaySignal::Dispatch {
                        seq: state.seq,
                        event: GatewayEvent::GuildCreate(Box::new(guild)),
                    });
                }
            }
        }

        state.current = Some(tx);
        Ok(rx)
    }
}

/// Let the session drain pending gateway signals into the cache.
pub async fn settle(session: &RemoteSession) {
    for _ in 0..3 {
        tokio::task::yield_now().await;
        session.sync().await;
    }
}

// === Entity builders ===

pub fn user(id: u64, name: &str) -> User {
    User {
        id: Snowflake(id),
        username: name.to_string(),
        global_name: None,
        discriminator: Some("0".into()),
        avatar: None,
        bot: false,
    }
}

pub fn guild(id: u64, name: &str) -> Guild {
    Guild {
        id: Snowflake(id),
        name: name.to_string(),
        owner_id: Some(BOT_USER_ID),
        description: None,
        icon: None,
        member_count: Some(1),
        approximate_member_count: None,
        approximate_presence_count: None,
        premium_tier: 0,
        unavailable: false,
        roles: vec![role(id, id, "@everyone", 0)],
        channels: Vec::new(),
        threads: Vec::new(),
        members: Vec::new(),
    }
}

/// A guild with one text channel.
pub fn guild_with_channel(guild_id: u64, channel_id: u64, channel_name: &str) -> Guild {
    let mut g = guild(guild_id, "Test Guild");
    g.channels.push(text_channel(channel_id, guild_id, channel_name));
    g
}

pub fn text_channel(id: u64, guild_id: u64, name: &str) -> Channel {
    Channel {
        id: Snowflake(id),
        kind: ChannelKind::Text,
        guild_id: Some(Snowflake(guild_id)),
        name: Some(name.to_string()),
        topic: None,
        position: Some(0),
        parent_id: None,
        nsfw: false,
        thread_metadata: None,
        owner_id: None,
    }
}

pub fn role(id: u64, guild_id: u64, name: &str, position: i64) -> Role {
    Role {
        id: Snowflake(id),
        name: name.to_string(),
        color: 0,
        hoist: false,
        position,
        permissions: "0".into(),
        managed: false,
        mentionable: false,
        guild_id: Some(Snowflake(guild_id)),
    }
}

pub fn member(user_id: u64, name: &str, roles: &[u64]) -> Member {
    Member {
        user: Some(user(user_id, name)),
        nick: None,
        roles: roles.iter().copied().map(Snowflake).collect(),
        joined_at: Some("2024-01-01T00:00:00.000000+00:00".into()),
        communication_disabled_until: None,
        guild_id: None,
    }
}

/// A message body as Discord returns it.
pub fn message_json(id: u64, channel_id: u64, author_id: u64, content: &str) -> Value {
    json!({
        "id": id.to_string(),
        "channel_id": channel_id.to_string(),
        "author": {"id": author_id.to_string(), "username": format!("user{author_id}")},
        "content": content,
        "timestamp": "2024-01-01T00:00:00.000000+00:00",
        "reactions": [],
        "embeds": []
    })
}
