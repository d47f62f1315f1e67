//! Startup gating and ordered shutdown.
//!
//! ```text
//! Starting -> Serving -> Draining -> Stopped
//!     \_________________________________/^  (startup failure)
//! ```
//!
//! Invocations are admitted only while Serving. Each admitted invocation
//! holds a tracker token until it has produced its response, so shutdown
//! can wait for exactly those.

use std::sync::Arc;
use std::time::Duration;

use cordconf::CordConfig;
use cordproto::RemoteSession;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tokio_util::task::task_tracker::TaskTrackerToken;
use tokio_util::task::TaskTracker;
use tracing::{info, warn};

use crate::error::OpError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Starting,
    Serving,
    Draining,
    Stopped,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Starting => "starting",
            Phase::Serving => "serving",
            Phase::Draining => "draining",
            Phase::Stopped => "stopped",
        }
    }
}

#[derive(Debug, Clone)]
pub struct LifecycleConfig {
    pub ready_timeout: Duration,
    pub drain_timeout: Duration,
    /// After the drain times out, how long stragglers get to answer.
    pub abort_grace: Duration,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            ready_timeout: Duration::from_secs(30),
            drain_timeout: Duration::from_secs(10),
            abort_grace: Duration::from_secs(1),
        }
    }
}

impl LifecycleConfig {
    pub fn from_config(config: &CordConfig) -> Self {
        Self {
            ready_timeout: config.dispatch.ready_timeout(),
            drain_timeout: config.dispatch.drain_timeout(),
            ..Default::default()
        }
    }
}

/// How a shutdown went.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DrainReport {
    /// Invocations still running when the drain timed out.
    pub aborted: usize,
}

pub struct Lifecycle {
    session: Arc<RemoteSession>,
    config: LifecycleConfig,
    phase: watch::Sender<Phase>,
    inflight: TaskTracker,
    abort: CancellationToken,
}

impl Lifecycle {
    pub fn new(session: Arc<RemoteSession>, config: LifecycleConfig) -> Arc<Self> {
        let (phase, _) = watch::channel(Phase::Starting);
        Arc::new(Self {
            session,
            config,
            phase,
            inflight: TaskTracker::new(),
            abort: CancellationToken::new(),
        })
    }

    pub fn session(&self) -> &Arc<RemoteSession> {
        &self.session
    }

    pub fn phase(&self) -> Phase {
        *self.phase.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<Phase> {
        self.phase.subscribe()
    }

    fn set_phase(&self, next: Phase) {
        let previous = self.phase.send_replace(next);
        if previous != next {
            info!(from = previous.as_str(), to = next.as_str(), "lifecycle phase");
        }
    }

    /// Connect the session and wait for READY. Failure here is fatal.
    pub async fn start(&self) -> Result<(), OpError> {
        self.session.connect();
        match self.session.wait_ready(self.config.ready_timeout).await {
            Ok(()) => {
                self.set_phase(Phase::Serving);
                Ok(())
            }
            Err(err) => {
                self.session.close().await;
                self.set_phase(Phase::Stopped);
                Err(err.into())
            }
        }
    }

    /// Begin serving without waiting on the gateway. Invocations still see
    /// `Unavailable` until the session reports READY.
    pub fn start_detached(&self) {
        self.session.connect();
        self.set_phase(Phase::Serving);
    }

    /// Register an invocation. `None` once shutdown has begun.
    pub fn admit(&self) -> Option<TaskTrackerToken> {
        if self.phase() != Phase::Serving {
            return None;
        }
        Some(self.inflight.token())
    }

    /// Fires when the drain gave up; in-flight invocations must answer now.
    pub fn aborted(&self) -> CancellationToken {
        self.abort.clone()
    }

    pub fn inflight(&self) -> usize {
        self.inflight.len()
    }

    /// Stop admitting, drain in-flight invocations (bounded), then close
    /// the session. Calling it again waits for nothing.
    pub async fn shutdown(&self) -> DrainReport {
        if matches!(self.phase(), Phase::Draining | Phase::Stopped) {
            return DrainReport { aborted: 0 };
        }
        self.set_phase(Phase::Draining);
        self.inflight.close();

        let pending = self.inflight.len();
        if pending > 0 {
            info!(pending, "draining in-flight invocations");
        }

        let mut aborted = 0;
        if tokio::time::timeout(self.config.drain_timeout, self.inflight.wait())
            .await
            .is_err()
        {
            aborted = self.inflight.len();
            warn!(
                aborted,
                timeout_secs = self.config.drain_timeout.as_secs(),
                "drain timed out; answering stragglers as unavailable"
            );
            self.abort.cancel();
            let _ = tokio::time::timeout(self.config.abort_grace, self.inflight.wait()).await;
        }

        self.session.close().await;
        self.set_phase(Phase::Stopped);
        DrainReport { aborted }
    }
}
