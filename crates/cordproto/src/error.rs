//! Remote failure classification.

use std::time::Duration;

use serde_json::Value;
use thiserror::Error;

use crate::rest::RestResponse;

/// Failures talking to the REST transport itself (no HTTP status was seen).
#[derive(Debug, Clone, Error)]
pub enum TransportError {
    #[error("connect failed: {0}")]
    Connect(String),

    #[error("request timed out")]
    Timeout,

    #[error("undecodable response: {0}")]
    Decode(String),

    #[error("transport error: {0}")]
    Other(String),
}

/// Failures the gateway transport reports while opening a connection.
#[derive(Debug, Clone, Error)]
pub enum GatewayError {
    #[error("gateway connect failed: {0}")]
    Connect(String),

    #[error("gateway handshake failed: {0}")]
    Handshake(String),

    /// The platform refused us for a reason reconnecting cannot fix.
    #[error("gateway closed with fatal code {code}: {reason}")]
    Fatal { code: u16, reason: String },
}

/// A classified failure from the remote platform.
#[derive(Debug, Clone, Error)]
pub enum RemoteError {
    #[error("Discord rejected the bot token")]
    Unauthorized,

    #[error("missing permissions: {message}")]
    Permission { code: Option<u64>, message: String },

    #[error("not found: {message}")]
    NotFound { code: Option<u64>, message: String },

    #[error("rate limited; retry after {:.3}s", .retry_after.as_secs_f64())]
    RateLimited { retry_after: Duration, global: bool },

    #[error("transient failure: {0}")]
    Transient(String),

    #[error("request rejected ({status}): {message}")]
    Rejected {
        status: u16,
        code: Option<u64>,
        message: String,
    },

    #[error("remote session unavailable: {0}")]
    Unavailable(String),

    #[error("gateway closed with fatal code {code}: {reason}")]
    GatewayFatal { code: u16, reason: String },

    #[error("unexpected response from Discord: {0}")]
    Decode(String),
}

impl RemoteError {
    /// Classify a non-success response.
    pub fn from_response(response: &RestResponse) -> Self {
        let (code, message) = platform_error(&response.body, response.status);
        match response.status {
            401 => RemoteError::Unauthorized,
            403 => RemoteError::Permission { code, message },
            404 => RemoteError::NotFound { code, message },
            429 => RemoteError::RateLimited {
                retry_after: response.retry_after().unwrap_or(Duration::from_secs(1)),
                global: response.is_global_limit(),
            },
            s if s >= 500 => RemoteError::Transient(format!("{s}: {message}")),
            status => RemoteError::Rejected {
                status,
                code,
                message,
            },
        }
    }

    /// Whether repeating the same request might succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, RemoteError::Transient(_))
    }
}

impl From<TransportError> for RemoteError {
    fn from(err: TransportError) -> Self {
        RemoteError::Transient(err.to_string())
    }
}

impl From<GatewayError> for RemoteError {
    fn from(err: GatewayError) -> Self {
        match err {
            GatewayError::Fatal { code, reason } => RemoteError::GatewayFatal { code, reason },
            other => RemoteError::Unavailable(other.to_string()),
        }
    }
}

/// Pull Discord's `{code, message, errors}` body apart.
fn platform_error(body: &Value, status: u16) -> (Option<u64>, String) {
    let code = body.get("code").and_then(Value::as_u64);
    let mut message = body
        .get("message")
        .and_then(Value::as_str)
        .map(str::to_string)
        .unwrap_or_else(|| format!("HTTP {status}"));

    if let Some(errors) = body.get("errors") {
        message.push_str(&format!(" {errors}"));
    }

    (code, message)
}
