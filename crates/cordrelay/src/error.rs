//! The error taxonomy every invocation failure is reported in.

use std::fmt;
use std::time::Duration;

use cordproto::RemoteError;
use serde::Serialize;
use serde_json::{json, Value};
use thiserror::Error;

use crate::schema::FieldViolation;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ErrorKind {
    InvalidArgument,
    UnknownOperation,
    Unavailable,
    RateLimited,
    RemotePermission,
    RemoteNotFound,
    Transient,
    DeadlineExceeded,
    PartialFailure,
    ConfigurationError,
    Internal,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::InvalidArgument => "InvalidArgument",
            ErrorKind::UnknownOperation => "UnknownOperation",
            ErrorKind::Unavailable => "Unavailable",
            ErrorKind::RateLimited => "RateLimited",
            ErrorKind::RemotePermission => "RemotePermission",
            ErrorKind::RemoteNotFound => "RemoteNotFound",
            ErrorKind::Transient => "Transient",
            ErrorKind::DeadlineExceeded => "DeadlineExceeded",
            ErrorKind::PartialFailure => "PartialFailure",
            ErrorKind::ConfigurationError => "ConfigurationError",
            ErrorKind::Internal => "Internal",
        }
    }

    /// Whether the caller can expect a later identical call to succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ErrorKind::Unavailable
                | ErrorKind::RateLimited
                | ErrorKind::Transient
                | ErrorKind::DeadlineExceeded
        )
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A classified failure, serialized as the `error` of a failed response.
#[derive(Debug, Clone, PartialEq, Error, Serialize)]
#[error("{kind}: {message}")]
pub struct OpError {
    pub kind: ErrorKind,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

impl OpError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            details: None,
        }
    }

    pub fn with_details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }

    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidArgument, message)
    }

    /// One response carrying every violation found.
    pub fn invalid_arguments(violations: Vec<FieldViolation>) -> Self {
        let message = match violations.as_slice() {
            [only] => only.to_string(),
            many => format!("{} invalid arguments", many.len()),
        };
        Self::invalid_argument(message).with_details(json!({ "violations": violations }))
    }

    pub fn unknown_operation(name: &str) -> Self {
        Self::new(ErrorKind::UnknownOperation, format!("no operation named '{name}'"))
    }

    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Unavailable, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::RemoteNotFound, message)
    }

    pub fn configuration(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::ConfigurationError, message)
    }

    pub fn deadline_exceeded(deadline: Duration) -> Self {
        Self::new(
            ErrorKind::DeadlineExceeded,
            format!(
                "no result within {}s; a request already sent may still take effect",
                deadline.as_secs_f64()
            ),
        )
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Internal, message)
    }
}

impl From<RemoteError> for OpError {
    fn from(err: RemoteError) -> Self {
        let message = err.to_string();
        match err {
            RemoteError::Unauthorized => OpError::configuration(message),
            RemoteError::Permission { code, .. } => {
                OpError::new(ErrorKind::RemotePermission, message)
                    .with_details(json!({ "discord_code": code }))
            }
            RemoteError::NotFound { code, .. } => OpError::new(ErrorKind::RemoteNotFound, message)
                .with_details(json!({ "discord_code": code })),
            RemoteError::RateLimited {
                retry_after,
                global,
            } => OpError::new(ErrorKind::RateLimited, message).with_details(json!({
                "retry_after_ms": retry_after.as_millis() as u64,
                "global": global,
            })),
            RemoteError::Transient(_) => OpError::new(ErrorKind::Transient, message),
            RemoteError::Rejected { status, code, .. } => OpError::invalid_argument(message)
                .with_details(json!({ "status": status, "discord_code": code })),
            RemoteError::Unavailable(_) => OpError::unavailable(message),
            // 4004 bad token, 4013/4014 intents: fixing these needs a config change
            RemoteError::GatewayFatal { code, .. } => {
                OpError::configuration(message).with_details(json!({ "close_code": code }))
            }
            RemoteError::Decode(_) => OpError::internal(message),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn remote_errors_map_to_kinds() {
        let cases = [
            (RemoteError::Unauthorized, ErrorKind::ConfigurationError),
            (
                RemoteError::Permission {
                    code: Some(50013),
                    message: "Missing Permissions".into(),
                },
                ErrorKind::RemotePermission,
            ),
            (
                RemoteError::NotFound {
                    code: Some(10003),
                    message: "Unknown Channel".into(),
                },
                ErrorKind::RemoteNotFound,
            ),
            (
                RemoteError::RateLimited {
                    retry_after: Duration::from_millis(1500),
                    global: false,
                },
                ErrorKind::RateLimited,
            ),
            (RemoteError::Transient("502".into()), ErrorKind::Transient),
            (
                RemoteError::Rejected {
                    status: 400,
                    code: Some(50035),
                    message: "Invalid Form Body".into(),
                },
                ErrorKind::InvalidArgument,
            ),
            (RemoteError::Unavailable("down".into()), ErrorKind::Unavailable),
            (
                RemoteError::GatewayFatal {
                    code: 4014,
                    reason: "Disallowed intent(s)".into(),
                },
                ErrorKind::ConfigurationError,
            ),
            (RemoteError::Decode("eof".into()), ErrorKind::Internal),
        ];

        for (remote, kind) in cases {
            assert_eq!(OpError::from(remote.clone()).kind, kind, "{remote:?}");
        }
    }

    #[test]
    fn rate_limit_details_carry_backoff() {
        let err = OpError::from(RemoteError::RateLimited {
            retry_after: Duration::from_millis(1500),
            global: true,
        });
        let details = err.details.unwrap();
        assert_eq!(details["retry_after_ms"], 1500);
        assert_eq!(details["global"], true);
    }

    #[test]
    fn serializes_without_empty_details() {
        let value = serde_json::to_value(OpError::unknown_operation("nope")).unwrap();
        assert_eq!(value["kind"], "UnknownOperation");
        assert_eq!(value["message"], "no operation named 'nope'");
        assert!(value.get("details").is_none());
    }

    #[test]
    fn retryable_kinds() {
        assert!(ErrorKind::Transient.is_retryable());
        assert!(ErrorKind::Unavailable.is_retryable());
        assert!(!ErrorKind::InvalidArgument.is_retryable());
        assert!(!ErrorKind::RemotePermission.is_retryable());
    }
}
