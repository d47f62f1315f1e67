//! The dispatcher: one invocation in, exactly one response out.
//!
//! Order of checks for each invocation:
//! 1. admission (lifecycle serving, session ready)
//! 2. operation lookup
//! 3. argument validation (all violations at once)
//! 4. capability (privileged intent enabled)
//! 5. concurrency slot
//! 6. handler, in its own task, under the deadline
//!
//! Reads are retried once after a transient fault; nothing else is.

use std::sync::Arc;
use std::time::Duration;

use cordconf::{CordConfig, IntentsConfig};
use cordproto::RemoteSession;
use serde::Serialize;
use serde_json::{Map, Value};
use tokio::sync::Semaphore;
use tokio::time::Instant;
use tokio_util::task::task_tracker::TaskTrackerToken;
use tracing::{debug, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::context::OpContext;
use crate::error::{ErrorKind, OpError};
use crate::lifecycle::Lifecycle;
use crate::registry::{OpResult, OperationRegistry, OperationSpec};
use crate::schema::ValidatedArgs;

/// One request to run a named operation.
#[derive(Debug, Clone, PartialEq)]
pub struct Invocation {
    pub operation: String,
    pub arguments: Value,
    pub correlation_id: Uuid,
}

impl Invocation {
    pub fn new(operation: impl Into<String>, arguments: Value) -> Self {
        Self {
            operation: operation.into(),
            arguments,
            correlation_id: Uuid::new_v4(),
        }
    }
}

/// The terminal result of an invocation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Response {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<OpError>,
    #[serde(skip)]
    pub correlation_id: Uuid,
}

impl Response {
    pub fn ok(correlation_id: Uuid, content: Value) -> Self {
        Self {
            success: true,
            content: Some(content),
            error: None,
            correlation_id,
        }
    }

    pub fn failed(correlation_id: Uuid, error: OpError) -> Self {
        Self {
            success: false,
            content: None,
            error: Some(error),
            correlation_id,
        }
    }

    pub fn error_kind(&self) -> Option<ErrorKind> {
        self.error.as_ref().map(|e| e.kind)
    }
}

#[derive(Debug, Clone)]
pub struct DispatchConfig {
    pub max_concurrency: usize,
    pub deadline: Duration,
    pub intents: IntentsConfig,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            max_concurrency: 8,
            deadline: Duration::from_secs(30),
            intents: IntentsConfig::default(),
        }
    }
}

impl DispatchConfig {
    pub fn from_config(config: &CordConfig) -> Self {
        Self {
            max_concurrency: config.dispatch.max_concurrency.max(1),
            deadline: config.dispatch.deadline(),
            intents: config.intents,
        }
    }
}

pub struct Dispatcher {
    registry: Arc<OperationRegistry>,
    lifecycle: Arc<Lifecycle>,
    slots: Arc<Semaphore>,
    config: DispatchConfig,
}

impl Dispatcher {
    pub fn new(
        registry: Arc<OperationRegistry>,
        lifecycle: Arc<Lifecycle>,
        config: DispatchConfig,
    ) -> Self {
        Self {
            slots: Arc::new(Semaphore::new(config.max_concurrency)),
            registry,
            lifecycle,
            config,
        }
    }

    pub fn registry(&self) -> &Arc<OperationRegistry> {
        &self.registry
    }

    pub fn lifecycle(&self) -> &Arc<Lifecycle> {
        &self.lifecycle
    }

    fn session(&self) -> &Arc<RemoteSession> {
        self.lifecycle.session()
    }

    /// Free concurrency slots right now.
    pub fn available_slots(&self) -> usize {
        self.slots.available_permits()
    }

    pub async fn dispatch(&self, invocation: Invocation) -> Response {
        let admitted = self.lifecycle.admit();
        self.dispatch_admitted(invocation, admitted).await
    }

    /// Dispatch under an admission taken earlier, e.g. when the request
    /// was read. `None` means it was refused.
    pub async fn dispatch_admitted(
        &self,
        invocation: Invocation,
        admitted: Option<TaskTrackerToken>,
    ) -> Response {
        let span = info_span!(
            "dispatch",
            op = %invocation.operation,
            correlation_id = %invocation.correlation_id,
        );
        let id = invocation.correlation_id;
        let started = Instant::now();

        let response = match self.run(invocation, admitted).instrument(span.clone()).await {
            Ok(content) => Response::ok(id, content),
            Err(err) => Response::failed(id, err),
        };

        span.in_scope(|| match &response.error {
            None => debug!(elapsed_ms = started.elapsed().as_millis() as u64, "invocation ok"),
            Some(err) => info!(
                kind = err.kind.as_str(),
                message = %err.message,
                elapsed_ms = started.elapsed().as_millis() as u64,
                "invocation failed"
            ),
        });
        response
    }

    async fn run(&self, invocation: Invocation, admitted: Option<TaskTrackerToken>) -> OpResult {
        let Some(_admitted) = admitted else {
            return Err(OpError::unavailable(format!(
                "not accepting invocations while {}",
                self.lifecycle.phase().as_str()
            )));
        };
        if !self.session().is_ready() {
            return Err(OpError::unavailable(format!(
                "Discord session is {}; retry shortly",
                self.session().state().as_str()
            )));
        }
        let deadline = Instant::now() + self.config.deadline;

        let spec = self
            .registry
            .lookup(&invocation.operation)
            .cloned()
            .ok_or_else(|| OpError::unknown_operation(&invocation.operation))?;

        let args = self
            .registry
            .validate(&spec, &invocation.arguments)
            .map_err(OpError::invalid_arguments)?;

        if let Some(capability) = spec.capability {
            if !capability.is_enabled(&self.config.intents) {
                return Err(OpError::configuration(format!(
                    "{} needs {} to be enabled",
                    spec.name,
                    capability.flag()
                ))
                .with_details(serde_json::json!({ "capability": capability.flag() })));
            }
        }

        let _slot = tokio::time::timeout_at(deadline, Arc::clone(&self.slots).acquire_owned())
            .await
            .map_err(|_| OpError::deadline_exceeded(self.config.deadline))?
            .map_err(|_| OpError::unavailable("dispatcher closed"))?;

        let abort = self.lifecycle.aborted();
        tokio::select! {
            biased;
            result = self.execute(&spec, args, deadline, invocation.correlation_id) => result,
            _ = abort.cancelled() => Err(OpError::unavailable("shut down before the operation finished")),
        }
    }

    async fn execute(
        &self,
        spec: &Arc<OperationSpec>,
        args: ValidatedArgs,
        deadline: Instant,
        correlation_id: Uuid,
    ) -> OpResult {
        let mut attempt = 1;
        loop {
            let result = self
                .attempt(spec, args.clone(), deadline, correlation_id)
                .await;

            match result {
                Err(err)
                    if err.kind == ErrorKind::Transient
                        && spec.side_effect.retries_transient()
                        && attempt == 1
                        && Instant::now() < deadline =>
                {
                    warn!(error = %err.message, "transient failure on a read; retrying once");
                    attempt += 1;
                }
                other => return other.map(normalize),
            }
        }
    }

    /// Run the handler in its own task so a panic or overrun cannot take
    /// the dispatcher down with it.
    async fn attempt(
        &self,
        spec: &Arc<OperationSpec>,
        args: ValidatedArgs,
        deadline: Instant,
        correlation_id: Uuid,
    ) -> OpResult {
        let ctx = OpContext::new(Arc::clone(self.session()), deadline, correlation_id);
        let mut handle = tokio::spawn(spec.invoke(ctx, args).in_current_span());

        match tokio::time::timeout_at(deadline, &mut handle).await {
            Ok(Ok(result)) => result,
            Ok(Err(join)) if join.is_panic() => {
                warn!(op = spec.name, "handler panicked");
                Err(OpError::internal(format!("{} failed unexpectedly", spec.name)))
            }
            Ok(Err(_)) => Err(OpError::unavailable("operation was cancelled")),
            Err(_) => {
                handle.abort();
                Err(OpError::deadline_exceeded(self.config.deadline))
            }
        }
    }
}

/// Handlers return objects; anything else is wrapped so `content` is
/// always a JSON object.
fn normalize(content: Value) -> Value {
    match content {
        Value::Object(_) => content,
        other => {
            let mut map = Map::new();
            map.insert("result".into(), other);
            Value::Object(map)
        }
    }
}
