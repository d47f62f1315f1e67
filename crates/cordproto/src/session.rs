//! The remote session: one gateway connection, one entity cache, and the
//! REST call path every handler goes through.
//!
//! Architecture follows the owner-task pattern:
//! - A supervisor task owns the gateway connection and its reconnect loop
//! - An ingestion task is the only writer of the entity cache
//! - Callers read cache snapshots and make REST calls concurrently
//!
//! State machine:
//!
//! ```text
//! Disconnected -> Connecting -> Ready -> Disconnected -> Connecting -> ...
//!                                 \
//!                                  `-> Stopped (close() or fatal close code)
//! ```

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use cordconf::CordConfig;
use parking_lot::{Mutex, RwLock};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

use crate::cache::{CacheSnapshot, CacheUpdate, EntityCache};
use crate::error::{GatewayError, RemoteError};
use crate::gateway::{CloseReason, GatewayConnector, GatewayEvent, GatewaySignal, ResumeInfo};
use crate::governor::RateGovernor;
use crate::ids::Snowflake;
use crate::model::{Channel, Guild, Member, Role, User};
use crate::rest::RestTransport;
use crate::route::RestRequest;

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Disconnected = 0,
    Connecting = 1,
    Ready = 2,
    Stopped = 3,
}

impl SessionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionState::Disconnected => "disconnected",
            SessionState::Connecting => "connecting",
            SessionState::Ready => "ready",
            SessionState::Stopped => "stopped",
        }
    }
}

/// Session tuning.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// First reconnect delay after a drop
    pub reconnect_initial: Duration,
    /// Reconnect delay ceiling
    pub reconnect_max: Duration,
    /// How many times one call may be re-issued after a 429
    pub max_reissues: u32,
    /// Known application id; otherwise learned from READY
    pub application_id: Option<Snowflake>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            reconnect_initial: Duration::from_secs(1),
            reconnect_max: Duration::from_secs(60),
            max_reissues: 5,
            application_id: None,
        }
    }
}

impl SessionConfig {
    pub fn from_config(config: &CordConfig) -> Self {
        Self {
            reconnect_initial: config.gateway.reconnect_initial(),
            reconnect_max: config.gateway.reconnect_max(),
            application_id: config.discord.application_id.map(Snowflake),
            ..Default::default()
        }
    }

    /// Capped exponential backoff:
    /// attempt 1: initial, attempt n: min(initial * 2^(n-1), max)
    pub fn backoff_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }
        let multiplier = 2u32.saturating_pow(attempt.saturating_sub(1));
        let delay = self.reconnect_initial.saturating_mul(multiplier);
        std::cmp::min(delay, self.reconnect_max)
    }
}

enum Ingest {
    Update(CacheUpdate),
    Flush(oneshot::Sender<()>),
}

#[derive(Debug, Default)]
struct Identity {
    user: Option<User>,
    application_id: Option<Snowflake>,
}

pub struct RemoteSession {
    rest: Arc<dyn RestTransport>,
    gateway: Arc<dyn GatewayConnector>,
    governor: RateGovernor,
    cache: Arc<EntityCache>,
    config: SessionConfig,
    state_tx: watch::Sender<SessionState>,
    ingest_tx: mpsc::UnboundedSender<Ingest>,
    ingest_rx: Mutex<Option<mpsc::UnboundedReceiver<Ingest>>>,
    started: AtomicBool,
    shutdown: CancellationToken,
    tasks: TaskTracker,
    identity: RwLock<Identity>,
    fatal: Mutex<Option<(u16, String)>>,
    connections: AtomicU64,
}

impl RemoteSession {
    pub fn new(
        rest: Arc<dyn RestTransport>,
        gateway: Arc<dyn GatewayConnector>,
        config: SessionConfig,
    ) -> Arc<Self> {
        Self::with_governor(rest, gateway, config, RateGovernor::default())
    }

    pub fn with_governor(
        rest: Arc<dyn RestTransport>,
        gateway: Arc<dyn GatewayConnector>,
        config: SessionConfig,
        governor: RateGovernor,
    ) -> Arc<Self> {
        let (state_tx, _) = watch::channel(SessionState::Disconnected);
        let (ingest_tx, ingest_rx) = mpsc::unbounded_channel();
        let identity = Identity {
            user: None,
            application_id: config.application_id,
        };

        Arc::new(Self {
            rest,
            gateway,
            governor,
            cache: Arc::new(EntityCache::new()),
            config,
            state_tx,
            ingest_tx,
            ingest_rx: Mutex::new(Some(ingest_rx)),
            started: AtomicBool::new(false),
            shutdown: CancellationToken::new(),
            tasks: TaskTracker::new(),
            identity: RwLock::new(identity),
            fatal: Mutex::new(None),
            connections: AtomicU64::new(0),
        })
    }

    /// Start the supervisor and ingestion tasks. Calling again is a no-op.
    pub fn connect(self: &Arc<Self>) {
        if self.started.swap(true, Ordering::SeqCst) {
            debug!("connect called on a started session");
            return;
        }

        if let Some(rx) = self.ingest_rx.lock().take() {
            let cache = Arc::clone(&self.cache);
            let shutdown = self.shutdown.clone();
            self.tasks.spawn(ingest_task(cache, rx, shutdown));
        }

        let session = Arc::clone(self);
        self.tasks.spawn(async move { session.supervise().await });
    }

    // === State ===

    pub fn state(&self) -> SessionState {
        *self.state_tx.borrow()
    }

    pub fn is_ready(&self) -> bool {
        self.state() == SessionState::Ready
    }

    pub fn subscribe_state(&self) -> watch::Receiver<SessionState> {
        self.state_tx.subscribe()
    }

    /// Number of gateway connections opened so far.
    pub fn connections(&self) -> u64 {
        self.connections.load(Ordering::Relaxed)
    }

    fn set_state(&self, next: SessionState) {
        let mut previous = None;
        self.state_tx.send_if_modified(|state| {
            // Stopped is terminal
            if *state == next || *state == SessionState::Stopped {
                return false;
            }
            previous = Some(*state);
            *state = next;
            true
        });
        if let Some(from) = previous {
            info!(from = from.as_str(), to = next.as_str(), "session state");
        }
    }

    /// Wait until Ready. Fails if the session stops or `timeout` passes.
    pub async fn wait_ready(&self, timeout: Duration) -> Result<(), RemoteError> {
        let mut rx = self.state_tx.subscribe();
        let waited = tokio::time::timeout(
            timeout,
            rx.wait_for(|s| matches!(s, SessionState::Ready | SessionState::Stopped)),
        )
        .await;

        let state = match waited {
            Err(_) => {
                return Err(RemoteError::Unavailable(format!(
                    "gateway not ready after {}s",
                    timeout.as_secs()
                )))
            }
            Ok(Err(_)) => return Err(RemoteError::Unavailable("session dropped".into())),
            Ok(Ok(state)) => *state,
        };

        match state {
            SessionState::Ready => Ok(()),
            _ => Err(self.stopped_error()),
        }
    }

    fn stopped_error(&self) -> RemoteError {
        match self.fatal.lock().clone() {
            Some((code, reason)) => RemoteError::GatewayFatal { code, reason },
            None => RemoteError::Unavailable("session closed".into()),
        }
    }

    /// Stop everything. In-flight calls are not recalled.
    pub async fn close(&self) {
        self.set_state(SessionState::Stopped);
        self.shutdown.cancel();
        self.tasks.close();
        if tokio::time::timeout(Duration::from_secs(5), self.tasks.wait())
            .await
            .is_err()
        {
            warn!("session tasks did not stop within 5s");
        }
        info!("session closed");
    }

    // === Identity ===

    /// The bot's own user, once READY has been seen.
    pub fn bot_user(&self) -> Option<User> {
        self.identity.read().user.clone()
    }

    pub fn application_id(&self) -> Option<Snowflake> {
        self.identity.read().application_id
    }

    pub fn set_application_id(&self, id: Snowflake) {
        self.identity.write().application_id = Some(id);
    }

    // === Supervisor ===

    async fn supervise(self: Arc<Self>) {
        let mut resume: Option<ResumeInfo> = None;
        let mut attempt: u32 = 0;

        loop {
            if attempt > 0 {
                let delay = self.config.backoff_for_attempt(attempt);
                info!(attempt, delay_ms = delay.as_millis() as u64, "reconnecting to gateway");
                tokio::select! {
                    _ = self.shutdown.cancelled() => break,
                    _ = tokio::time::sleep(delay) => {}
                }
            }

            self.set_state(SessionState::Connecting);
            let opened = tokio::select! {
                _ = self.shutdown.cancelled() => break,
                opened = self.gateway.open(resume.clone()) => opened,
            };

            let mut signals = match opened {
                Ok(signals) => signals,
                Err(GatewayError::Fatal { code, reason }) => {
                    self.fail(code, reason);
                    return;
                }
                Err(e) => {
                    warn!(error = %e, "gateway open failed");
                    self.set_state(SessionState::Disconnected);
                    attempt = attempt.saturating_add(1);
                    continue;
                }
            };
            self.connections.fetch_add(1, Ordering::Relaxed);

            let ended = self.pump(&mut signals, &mut resume, &mut attempt).await;
            drop(signals);

            match ended {
                None => break,
                Some(CloseReason::Fatal { code, reason }) => {
                    self.fail(code, reason);
                    return;
                }
                Some(CloseReason::InvalidSession { resumable: false }) => {
                    debug!("session not resumable; next connection identifies fresh");
                    resume = None;
                }
                Some(reason) => debug!(?reason, "gateway connection ended"),
            }

            self.set_state(SessionState::Disconnected);
            attempt = attempt.saturating_add(1);
        }

        self.set_state(SessionState::Stopped);
        debug!("session supervisor exiting");
    }

    /// Feed one connection's signals into the session. Returns `None` on
    /// shutdown, otherwise why the connection ended.
    async fn pump(
        &self,
        signals: &mut mpsc::Receiver<GatewaySignal>,
        resume: &mut Option<ResumeInfo>,
        attempt: &mut u32,
    ) -> Option<CloseReason> {
        loop {
            let signal = tokio::select! {
                _ = self.shutdown.cancelled() => return None,
                signal = signals.recv() => signal,
            };

            let (seq, event) = match signal {
                Some(GatewaySignal::Dispatch { seq, event }) => (seq, event),
                Some(GatewaySignal::Closed(reason)) => return Some(reason),
                None => return Some(CloseReason::Dropped("gateway stream ended".into())),
            };

            if let Some(info) = resume.as_mut() {
                info.seq = seq;
            }

            match event {
                GatewayEvent::Ready {
                    session_id,
                    resume_gateway_url,
                    user,
                    application,
                    guilds,
                } => {
                    // A fresh session: what we cached may be stale
                    self.ingest(CacheUpdate::Clear);
                    *resume = Some(ResumeInfo {
                        session_id,
                        seq,
                        resume_url: resume_gateway_url,
                    });
                    {
                        let mut identity = self.identity.write();
                        info!(user = %user.tag(), guilds = guilds.len(), "gateway ready");
                        identity.user = Some(user);
                        if let Some(app) = application {
                            identity.application_id.get_or_insert(app.id);
                        }
                    }
                    *attempt = 0;
                    self.set_state(SessionState::Ready);
                }
                GatewayEvent::Resumed => {
                    info!("gateway session resumed");
                    *attempt = 0;
                    self.set_state(SessionState::Ready);
                }
                other => {
                    if let Some(update) = CacheUpdate::from_event(other) {
                        self.ingest(update);
                    }
                }
            }
        }
    }

    fn fail(&self, code: u16, reason: String) {
        error!(code, reason = %reason, "gateway refused the session; not reconnecting");
        *self.fatal.lock() = Some((code, reason));
        self.set_state(SessionState::Stopped);
        self.shutdown.cancel();
    }

    // === Cache ===

    fn ingest(&self, update: CacheUpdate) {
        if self.ingest_tx.send(Ingest::Update(update)).is_err() {
            debug!("cache ingestion closed; dropping update");
        }
    }

    /// Queue a best-effort local reflection of a mutation that just
    /// completed. Applied by the ingestion task like any pushed event.
    pub fn reflect(&self, update: CacheUpdate) {
        self.ingest(update);
    }

    /// Wait until every update queued before this call has been applied.
    pub async fn sync(&self) {
        let (tx, rx) = oneshot::channel();
        if self.ingest_tx.send(Ingest::Flush(tx)).is_ok() {
            let _ = rx.await;
        }
    }

    /// Lock-free view of the cache.
    pub fn cache(&self) -> Arc<CacheSnapshot> {
        self.cache.snapshot()
    }

    pub fn guild(&self, id: Snowflake) -> Option<Arc<Guild>> {
        self.cache().guild(id)
    }

    pub fn guild_count(&self) -> usize {
        self.cache().guild_count()
    }

    pub fn channel(&self, id: Snowflake) -> Option<Arc<Channel>> {
        self.cache().channel(id)
    }

    pub fn channels_in(&self, guild_id: Snowflake) -> Vec<Arc<Channel>> {
        self.cache().channels_in(guild_id)
    }

    pub fn member(&self, guild_id: Snowflake, user_id: Snowflake) -> Option<Arc<Member>> {
        self.cache().member(guild_id, user_id)
    }

    pub fn members_in(&self, guild_id: Snowflake) -> Vec<Arc<Member>> {
        self.cache().members_in(guild_id)
    }

    pub fn role(&self, id: Snowflake) -> Option<Arc<Role>> {
        self.cache().role(id)
    }

    pub fn roles_in(&self, guild_id: Snowflake) -> Vec<Arc<Role>> {
        self.cache().roles_in(guild_id)
    }

    // === REST ===

    pub fn governor(&self) -> &RateGovernor {
        &self.governor
    }

    /// Make one REST call through the governor.
    ///
    /// A 429 means Discord did not execute the request, so it is re-issued
    /// after the reported backoff while the deadline allows.
    pub async fn call(&self, request: &RestRequest, deadline: Instant) -> Result<Value, RemoteError> {
        let mut reissues = 0;
        loop {
            if self.state() == SessionState::Stopped {
                return Err(self.stopped_error());
            }

            let reservation = self.governor.acquire(&request.route, deadline).await?;
            let response = self.rest.execute(request).await?;
            reservation.record(&response);

            debug!(
                method = %request.method,
                path = %request.path,
                status = response.status,
                "discord call"
            );

            if response.is_success() {
                return Ok(response.body);
            }

            let err = RemoteError::from_response(&response);
            if let RemoteError::RateLimited { retry_after, .. } = &err {
                if reissues < self.config.max_reissues && Instant::now() + *retry_after <= deadline {
                    reissues += 1;
                    debug!(route = %request.route, reissues, "re-issuing after 429");
                    continue;
                }
            }
            return Err(err);
        }
    }

    /// `call`, decoding the body.
    pub async fn call_as<T: DeserializeOwned>(
        &self,
        request: &RestRequest,
        deadline: Instant,
    ) -> Result<T, RemoteError> {
        let body = self.call(request, deadline).await?;
        decode(body)
    }

    /// A channel from the cache, or from REST when we haven't seen it.
    pub async fn resolve_channel(
        &self,
        channel_id: Snowflake,
        deadline: Instant,
    ) -> Result<Arc<Channel>, RemoteError> {
        if let Some(channel) = self.channel(channel_id) {
            return Ok(channel);
        }
        let channel: Channel = self
            .call_as(&RestRequest::get("/channels/{}", &[&channel_id]), deadline)
            .await?;
        self.reflect(CacheUpdate::UpsertChannel(Box::new(channel.clone())));
        Ok(Arc::new(channel))
    }

    /// A guild's channels from the cache, or from REST when it has none.
    pub async fn resolve_channels(
        &self,
        guild_id: Snowflake,
        deadline: Instant,
    ) -> Result<Vec<Arc<Channel>>, RemoteError> {
        let cached = self.channels_in(guild_id);
        if !cached.is_empty() {
            return Ok(cached);
        }
        let mut channels: Vec<Channel> = self
            .call_as(&RestRequest::get("/guilds/{}/channels", &[&guild_id]), deadline)
            .await?;
        channels.sort_by_key(|c| (c.position.unwrap_or(i64::MAX), c.id));
        Ok(channels
            .into_iter()
            .map(|mut c| {
                c.guild_id.get_or_insert(guild_id);
                Arc::new(c)
            })
            .collect())
    }

    /// A guild's roles, highest first, from the cache or REST.
    pub async fn resolve_roles(
        &self,
        guild_id: Snowflake,
        deadline: Instant,
    ) -> Result<Vec<Arc<Role>>, RemoteError> {
        let cached = self.roles_in(guild_id);
        if !cached.is_empty() {
            return Ok(cached);
        }
        let mut roles: Vec<Role> = self
            .call_as(&RestRequest::get("/guilds/{}/roles", &[&guild_id]), deadline)
            .await?;
        roles.sort_by_key(|r| (std::cmp::Reverse(r.position), r.id));
        Ok(roles
            .into_iter()
            .map(|mut r| {
                r.guild_id = Some(guild_id);
                Arc::new(r)
            })
            .collect())
    }
}

pub fn decode<T: DeserializeOwned>(body: Value) -> Result<T, RemoteError> {
    serde_json::from_value(body).map_err(|e| RemoteError::Decode(e.to_string()))
}

/// The single cache writer.
async fn ingest_task(
    cache: Arc<EntityCache>,
    mut rx: mpsc::UnboundedReceiver<Ingest>,
    shutdown: CancellationToken,
) {
    loop {
        let item = tokio::select! {
            biased;
            item = rx.recv() => item,
            _ = shutdown.cancelled() => break,
        };
        match item {
            Some(Ingest::Update(update)) => cache.apply(update),
            Some(Ingest::Flush(done)) => {
                let _ = done.send(());
            }
            None => break,
        }
    }
    debug!("cache ingestion exiting");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rest::{RateHeaders, RestResponse};
    use crate::testing::{self, FakeGateway, FakeRest};
    use crate::route::Method;
    use serde_json::json;

    fn session(rest: &Arc<FakeRest>, gateway: &Arc<FakeGateway>) -> Arc<RemoteSession> {
        RemoteSession::new(rest.clone(), gateway.clone(), SessionConfig::default())
    }

    fn far() -> Instant {
        Instant::now() + Duration::from_secs(30)
    }

    #[test]
    fn backoff_is_capped() {
        let config = SessionConfig::default();
        assert_eq!(config.backoff_for_attempt(0), Duration::ZERO);
        assert_eq!(config.backoff_for_attempt(1), Duration::from_secs(1));
        assert_eq!(config.backoff_for_attempt(3), Duration::from_secs(4));
        assert_eq!(config.backoff_for_attempt(7), Duration::from_secs(60));
        assert_eq!(config.backoff_for_attempt(1000), Duration::from_secs(60));
    }

    #[tokio::test(start_paused = true)]
    async fn connect_reaches_ready_and_fills_cache() {
        let rest = FakeRest::new();
        let gateway = FakeGateway::new();
        gateway.add_guild(testing::guild_with_channel(1, 20, "general"));
        let session = session(&rest, &gateway);

        assert_eq!(session.state(), SessionState::Disconnected);
        session.connect();
        session.connect();
        session.wait_ready(Duration::from_secs(5)).await.unwrap();
        testing::settle(&session).await;

        assert_eq!(gateway.open_count(), 1);
        assert_eq!(session.guild_count(), 1);
        assert_eq!(session.channel(Snowflake(20)).unwrap().display_name(), "general");
        assert_eq!(session.application_id(), Some(testing::APPLICATION_ID));
        session.close().await;
    }

    #[tokio::test(start_paused = true)]
    async fn drop_then_resume_keeps_cache() {
        let rest = FakeRest::new();
        let gateway = FakeGateway::new();
        gateway.add_guild(testing::guild_with_channel(1, 20, "general"));
        let session = session(&rest, &gateway);
        let mut states = session.subscribe_state();

        session.connect();
        session.wait_ready(Duration::from_secs(5)).await.unwrap();
        testing::settle(&session).await;

        gateway.drop_connection();
        states
            .wait_for(|s| *s == SessionState::Disconnected)
            .await
            .unwrap();
        assert!(!session.is_ready());

        states.wait_for(|s| *s == SessionState::Ready).await.unwrap();
        testing::settle(&session).await;

        let opens = gateway.opens();
        assert_eq!(opens.len(), 2);
        assert!(opens[1].is_some(), "second connection resumes");
        assert!(session.channel(Snowflake(20)).is_some());
        session.close().await;
    }

    #[tokio::test(start_paused = true)]
    async fn rejected_resume_rebuilds_from_fresh_ready() {
        let rest = FakeRest::new();
        let gateway = FakeGateway::new();
        gateway.add_guild(testing::guild_with_channel(1, 20, "general"));
        let session = session(&rest, &gateway);

        session.connect();
        session.wait_ready(Duration::from_secs(5)).await.unwrap();

        // A channel only the old session knew about
        gateway.emit(GatewayEvent::ChannelCreate(Box::new(testing::text_channel(21, 1, "old"))));
        testing::settle(&session).await;
        assert!(session.channel(Snowflake(21)).is_some());

        gateway.set_accept_resume(false);
        gateway.drop_connection();
        gateway.wait_for_opens(3).await;
        session.wait_ready(Duration::from_secs(60)).await.unwrap();
        testing::settle(&session).await;

        assert!(session.channel(Snowflake(21)).is_none(), "stale entity cleared");
        assert!(session.channel(Snowflake(20)).is_some(), "snapshot rebuilt");
        session.close().await;
    }

    #[tokio::test(start_paused = true)]
    async fn fatal_close_stops_the_session() {
        let rest = FakeRest::new();
        let gateway = FakeGateway::new();
        let session = session(&rest, &gateway);

        session.connect();
        session.wait_ready(Duration::from_secs(5)).await.unwrap();

        gateway.close_with(CloseReason::Fatal {
            code: 4014,
            reason: "Disallowed intent(s)".into(),
        });

        let err = session.wait_ready(Duration::from_secs(5)).await;
        // Ready is still the current state until the supervisor processes the close
        if err.is_ok() {
            let mut states = session.subscribe_state();
            states.wait_for(|s| *s == SessionState::Stopped).await.unwrap();
        }
        assert_eq!(session.state(), SessionState::Stopped);
        assert!(matches!(
            session.wait_ready(Duration::from_secs(1)).await,
            Err(RemoteError::GatewayFatal { code: 4014, .. })
        ));
        tokio::time::sleep(Duration::from_secs(120)).await;
        assert_eq!(gateway.open_count(), 1, "no reconnect after fatal close");
    }

    #[tokio::test(start_paused = true)]
    async fn call_reissues_after_429() {
        let rest = FakeRest::new();
        let gateway = FakeGateway::new();
        rest.respond_once(
            Method::Get,
            "/users/5",
            RestResponse::json(429, json!({"retry_after": 0.5, "global": false})),
        );
        rest.respond(Method::Get, "/users/5", 200, json!({"id": "5", "username": "ada"}));
        let session = session(&rest, &gateway);

        let start = Instant::now();
        let user: User = session
            .call_as(&RestRequest::get("/users/{}", &[&Snowflake(5)]), far())
            .await
            .unwrap();

        assert_eq!(user.username, "ada");
        assert_eq!(rest.call_count(), 2);
        let calls = rest.calls();
        assert!(calls[1].at - start >= Duration::from_millis(500));
    }

    #[tokio::test(start_paused = true)]
    async fn no_call_before_reset() {
        let rest = FakeRest::new();
        let gateway = FakeGateway::new();
        let rate = RateHeaders {
            limit: Some(5),
            remaining: Some(0),
            reset_after: Some(Duration::from_secs(2)),
            bucket: Some("msgs".into()),
            ..Default::default()
        };
        rest.respond_once(
            Method::Post,
            "/channels/9/messages",
            RestResponse::json(200, json!({})).with_rate(rate),
        );
        rest.respond(Method::Post, "/channels/9/messages", 200, json!({}));
        let session = session(&rest, &gateway);
        let req = RestRequest::post("/channels/{}/messages", &[&Snowflake(9)]);

        let start = Instant::now();
        session.call(&req, far()).await.unwrap();
        session.call(&req, far()).await.unwrap();

        let calls = rest.calls();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].at, start);
        assert!(calls[1].at >= start + Duration::from_secs(2));
    }

    #[tokio::test(start_paused = true)]
    async fn status_errors_are_classified() {
        let rest = FakeRest::new();
        let gateway = FakeGateway::new();
        rest.respond(
            Method::Get,
            "/channels/404",
            404,
            json!({"code": 10003, "message": "Unknown Channel"}),
        );
        let session = session(&rest, &gateway);

        let err = session
            .resolve_channel(Snowflake(404), far())
            .await
            .unwrap_err();
        assert!(matches!(err, RemoteError::NotFound { code: Some(10003), .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn resolve_roles_falls_back_to_rest() {
        let rest = FakeRest::new();
        let gateway = FakeGateway::new();
        rest.respond(
            Method::Get,
            "/guilds/3/roles",
            200,
            json!([
                {"id": "3", "name": "@everyone", "position": 0},
                {"id": "8", "name": "admin", "position": 2}
            ]),
        );
        let session = session(&rest, &gateway);

        let roles = session.resolve_roles(Snowflake(3), far()).await.unwrap();
        let names: Vec<_> = roles.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, vec!["admin", "@everyone"]);
        assert_eq!(roles[0].guild_id, Some(Snowflake(3)));
    }

    #[tokio::test(start_paused = true)]
    async fn closed_session_refuses_calls() {
        let rest = FakeRest::new();
        let gateway = FakeGateway::new();
        let session = session(&rest, &gateway);
        session.connect();
        session.wait_ready(Duration::from_secs(5)).await.unwrap();
        session.close().await;

        assert_eq!(session.state(), SessionState::Stopped);
        let err = session
            .call(&RestRequest::get("/users/{}", &[&Snowflake(1)]), far())
            .await
            .unwrap_err();
        assert!(matches!(err, RemoteError::Unavailable(_)));
        assert_eq!(rest.call_count(), 0);
    }
}
