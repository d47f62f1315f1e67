//! What a handler gets to work with: the shared session and its deadline.

use std::sync::Arc;

use cordproto::session::decode;
use cordproto::{CacheUpdate, Channel, RemoteSession, RestRequest, Snowflake};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::time::Instant;
use tracing::debug;
use uuid::Uuid;

use crate::error::OpError;

/// Per-invocation handle on the remote session.
///
/// Every REST call made through it goes through the session's rate
/// governor and is bounded by the invocation's deadline.
#[derive(Clone)]
pub struct OpContext {
    session: Arc<RemoteSession>,
    deadline: Instant,
    correlation_id: Uuid,
}

impl OpContext {
    pub fn new(session: Arc<RemoteSession>, deadline: Instant, correlation_id: Uuid) -> Self {
        Self {
            session,
            deadline,
            correlation_id,
        }
    }

    pub fn session(&self) -> &RemoteSession {
        &self.session
    }

    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    pub fn correlation_id(&self) -> Uuid {
        self.correlation_id
    }

    pub async fn call(&self, request: &RestRequest) -> Result<Value, OpError> {
        self.session
            .call(request, self.deadline)
            .await
            .map_err(OpError::from)
    }

    pub async fn call_as<T: DeserializeOwned>(&self, request: &RestRequest) -> Result<T, OpError> {
        let body = self.call(request).await?;
        decode(body).map_err(OpError::from)
    }

    /// Queue the local cache reflection of a mutation that just succeeded.
    pub fn reflect(&self, update: CacheUpdate) {
        self.session.reflect(update);
    }

    pub async fn resolve_channel(&self, channel_id: Snowflake) -> Result<Arc<Channel>, OpError> {
        self.session
            .resolve_channel(channel_id, self.deadline)
            .await
            .map_err(OpError::from)
    }

    /// The bot's application id, asking Discord once if READY didn't carry it.
    pub async fn application_id(&self) -> Result<Snowflake, OpError> {
        if let Some(id) = self.session.application_id() {
            return Ok(id);
        }
        #[derive(serde::Deserialize)]
        struct AppInfo {
            id: Snowflake,
        }
        let info: AppInfo = self
            .call_as(&RestRequest::get("/oauth2/applications/@me", &[]))
            .await?;
        debug!(application_id = %info.id, "discovered application id");
        self.session.set_application_id(info.id);
        Ok(info.id)
    }
}
