//! Configuration sections.
//!
//! Each section mirrors a `[table]` in `cordrelay.toml`. Defaults are the
//! values a fresh bot needs to run against production Discord.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Discord credentials and endpoints.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscordConfig {
    /// Bot token. Never written back out by `to_toml`.
    #[serde(default, skip_serializing)]
    pub token: Option<String>,

    /// Application id used for command listing.
    /// Discovered from `/oauth2/applications/@me` when unset.
    #[serde(default)]
    pub application_id: Option<u64>,

    /// REST base URL including the API version.
    /// Default: https://discord.com/api/v10
    #[serde(default = "DiscordConfig::default_api_base")]
    pub api_base: String,

    /// Gateway WebSocket URL.
    /// Default: wss://gateway.discord.gg/?v=10&encoding=json
    #[serde(default = "DiscordConfig::default_gateway_url")]
    pub gateway_url: String,
}

impl DiscordConfig {
    fn default_api_base() -> String {
        "https://discord.com/api/v10".to_string()
    }

    fn default_gateway_url() -> String {
        "wss://gateway.discord.gg/?v=10&encoding=json".to_string()
    }
}

impl Default for DiscordConfig {
    fn default() -> Self {
        Self {
            token: None,
            application_id: None,
            api_base: Self::default_api_base(),
            gateway_url: Self::default_gateway_url(),
        }
    }
}

/// Gateway intents the bot declares.
///
/// `members` and `message_content` are privileged and must also be enabled
/// in the Discord developer portal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntentsConfig {
    #[serde(default = "enabled")]
    pub guilds: bool,
    #[serde(default = "enabled")]
    pub members: bool,
    #[serde(default = "enabled")]
    pub message_content: bool,
}

fn enabled() -> bool {
    true
}

impl Default for IntentsConfig {
    fn default() -> Self {
        Self {
            guilds: true,
            members: true,
            message_content: true,
        }
    }
}

/// Dispatcher limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchConfig {
    /// Concurrent tool invocations allowed against the single connection.
    #[serde(default = "DispatchConfig::default_max_concurrency")]
    pub max_concurrency: usize,

    /// Per-invocation deadline in seconds.
    #[serde(default = "DispatchConfig::default_deadline_secs")]
    pub deadline_secs: u64,

    /// How long shutdown waits for in-flight invocations.
    #[serde(default = "DispatchConfig::default_drain_timeout_secs")]
    pub drain_timeout_secs: u64,

    /// How long startup waits for the gateway to report READY.
    #[serde(default = "DispatchConfig::default_ready_timeout_secs")]
    pub ready_timeout_secs: u64,
}

impl DispatchConfig {
    fn default_max_concurrency() -> usize {
        8
    }

    fn default_deadline_secs() -> u64 {
        30
    }

    fn default_drain_timeout_secs() -> u64 {
        10
    }

    fn default_ready_timeout_secs() -> u64 {
        30
    }

    pub fn deadline(&self) -> Duration {
        Duration::from_secs(self.deadline_secs)
    }

    pub fn drain_timeout(&self) -> Duration {
        Duration::from_secs(self.drain_timeout_secs)
    }

    pub fn ready_timeout(&self) -> Duration {
        Duration::from_secs(self.ready_timeout_secs)
    }
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            max_concurrency: Self::default_max_concurrency(),
            deadline_secs: Self::default_deadline_secs(),
            drain_timeout_secs: Self::default_drain_timeout_secs(),
            ready_timeout_secs: Self::default_ready_timeout_secs(),
        }
    }
}

/// Gateway reconnect behavior.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// First reconnect delay; doubles per attempt.
    #[serde(default = "GatewayConfig::default_reconnect_initial_ms")]
    pub reconnect_initial_ms: u64,

    /// Reconnect delay ceiling.
    #[serde(default = "GatewayConfig::default_reconnect_max_ms")]
    pub reconnect_max_ms: u64,
}

impl GatewayConfig {
    fn default_reconnect_initial_ms() -> u64 {
        1_000
    }

    fn default_reconnect_max_ms() -> u64 {
        60_000
    }

    pub fn reconnect_initial(&self) -> Duration {
        Duration::from_millis(self.reconnect_initial_ms)
    }

    pub fn reconnect_max(&self) -> Duration {
        Duration::from_millis(self.reconnect_max_ms)
    }
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            reconnect_initial_ms: Self::default_reconnect_initial_ms(),
            reconnect_max_ms: Self::default_reconnect_max_ms(),
        }
    }
}

/// Telemetry and observability configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetryConfig {
    /// OTLP gRPC endpoint. Export is disabled when unset.
    #[serde(default)]
    pub otlp_endpoint: Option<String>,

    /// Log filter directive (trace, debug, info, warn, error, or EnvFilter syntax).
    /// Default: info
    #[serde(default = "TelemetryConfig::default_log_level")]
    pub log_level: String,
}

impl TelemetryConfig {
    fn default_log_level() -> String {
        "info".to_string()
    }
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            otlp_endpoint: None,
            log_level: Self::default_log_level(),
        }
    }
}
