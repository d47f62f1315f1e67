//! REST transport: the trait the session calls through, and the reqwest
//! implementation that talks to Discord.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, AUTHORIZATION};
use serde_json::Value;
use tracing::trace;

use crate::error::TransportError;
use crate::route::{Method, RestRequest};

/// Rate-limit headers as Discord reports them.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RateHeaders {
    pub limit: Option<u32>,
    pub remaining: Option<u32>,
    pub reset_after: Option<Duration>,
    pub bucket: Option<String>,
    pub global: bool,
    pub retry_after: Option<Duration>,
    pub scope: Option<String>,
}

impl RateHeaders {
    fn from_headers(headers: &HeaderMap) -> Self {
        let text = |name: &str| headers.get(name).and_then(|v| v.to_str().ok());
        let secs = |name: &str| {
            text(name)
                .and_then(|v| v.parse::<f64>().ok())
                .filter(|s| s.is_finite() && *s >= 0.0)
                .map(Duration::from_secs_f64)
        };

        Self {
            limit: text("x-ratelimit-limit").and_then(|v| v.parse().ok()),
            remaining: text("x-ratelimit-remaining").and_then(|v| v.parse().ok()),
            reset_after: secs("x-ratelimit-reset-after"),
            bucket: text("x-ratelimit-bucket").map(str::to_string),
            global: text("x-ratelimit-global").is_some_and(|v| v.eq_ignore_ascii_case("true")),
            retry_after: secs("retry-after"),
            scope: text("x-ratelimit-scope").map(str::to_string),
        }
    }
}

/// A response with any status. Empty bodies decode to `Value::Null`.
#[derive(Debug, Clone, PartialEq)]
pub struct RestResponse {
    pub status: u16,
    pub body: Value,
    pub rate: RateHeaders,
}

impl RestResponse {
    pub fn json(status: u16, body: Value) -> Self {
        Self {
            status,
            body,
            rate: RateHeaders::default(),
        }
    }

    pub fn no_content() -> Self {
        Self::json(204, Value::Null)
    }

    pub fn with_rate(mut self, rate: RateHeaders) -> Self {
        self.rate = rate;
        self
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Backoff requested by a 429, preferring the body's precise value.
    pub fn retry_after(&self) -> Option<Duration> {
        self.body
            .get("retry_after")
            .and_then(Value::as_f64)
            .filter(|s| s.is_finite() && *s >= 0.0)
            .map(Duration::from_secs_f64)
            .or(self.rate.retry_after)
    }

    pub fn is_global_limit(&self) -> bool {
        self.rate.global
            || self
                .body
                .get("global")
                .and_then(Value::as_bool)
                .unwrap_or(false)
    }
}

/// Executes a single request. Implementations never retry; the session
/// and governor decide what happens next.
#[async_trait]
pub trait RestTransport: Send + Sync + 'static {
    async fn execute(&self, request: &RestRequest) -> Result<RestResponse, TransportError>;
}

/// Discord REST over HTTPS.
pub struct HttpRest {
    client: reqwest::Client,
    api_base: String,
    authorization: String,
}

impl HttpRest {
    pub fn new(api_base: &str, token: &str) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .user_agent(concat!(
                "DiscordBot (https://github.com/cordrelay/cordrelay, ",
                env!("CARGO_PKG_VERSION"),
                ")"
            ))
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| TransportError::Other(e.to_string()))?;

        Ok(Self {
            client,
            api_base: api_base.trim_end_matches('/').to_string(),
            authorization: format!("Bot {token}"),
        })
    }
}

#[async_trait]
impl RestTransport for HttpRest {
    async fn execute(&self, request: &RestRequest) -> Result<RestResponse, TransportError> {
        let url = format!("{}{}", self.api_base, request.path);
        let method = match request.method {
            Method::Get => reqwest::Method::GET,
            Method::Post => reqwest::Method::POST,
            Method::Put => reqwest::Method::PUT,
            Method::Patch => reqwest::Method::PATCH,
            Method::Delete => reqwest::Method::DELETE,
        };

        let mut builder = self
            .client
            .request(method, &url)
            .header(AUTHORIZATION, &self.authorization);

        if !request.query.is_empty() {
            builder = builder.query(&request.query);
        }
        if let Some(reason) = &request.reason {
            builder = builder.header("X-Audit-Log-Reason", urlencoding::encode(reason).into_owned());
        }
        builder = match &request.body {
            Some(body) => builder.json(body),
            // Discord wants a length on bodiless PUTs (reactions, role grants)
            None if request.method == Method::Put => builder.header("Content-Length", "0"),
            None => builder,
        };

        let response = builder.send().await.map_err(classify_reqwest)?;
        let status = response.status().as_u16();
        let rate = RateHeaders::from_headers(response.headers());
        let bytes = response.bytes().await.map_err(classify_reqwest)?;

        let body = if bytes.is_empty() {
            Value::Null
        } else {
            match serde_json::from_slice(&bytes) {
                Ok(v) => v,
                Err(_) => Value::String(String::from_utf8_lossy(&bytes).into_owned()),
            }
        };

        trace!(method = %request.method, path = %request.path, status, "rest call");

        Ok(RestResponse { status, body, rate })
    }
}

fn classify_reqwest(err: reqwest::Error) -> TransportError {
    if err.is_timeout() {
        TransportError::Timeout
    } else if err.is_connect() {
        TransportError::Connect(err.to_string())
    } else if err.is_decode() {
        TransportError::Decode(err.to_string())
    } else {
        TransportError::Other(err.to_string())
    }
}
