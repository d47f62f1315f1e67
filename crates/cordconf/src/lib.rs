//! Configuration loading for cordrelay.
//!
//! # Config File Locations
//!
//! Files are loaded in order (later wins):
//! 1. `/etc/cordrelay/config.toml` (system)
//! 2. `~/.config/cordrelay/config.toml` (user)
//! 3. `./cordrelay.toml` or the `--config` path (local override)
//! 4. Environment variables (`DISCORD_TOKEN`, `CORDRELAY_*`)
//!
//! # Example Config
//!
//! ```toml
//! [discord]
//! application_id = 123456789012345678
//!
//! [intents]
//! members = true
//! message_content = false
//!
//! [dispatch]
//! max_concurrency = 8
//! deadline_secs = 30
//!
//! [telemetry]
//! otlp_endpoint = "127.0.0.1:4317"
//! log_level = "info"
//! ```
//!
//! The bot token is normally supplied through `DISCORD_TOKEN` rather than a
//! file.

pub mod loader;
pub mod sections;

pub use loader::{ConfigSources, apply_env_overrides_from, discover_config_files_with_override};
pub use sections::{DiscordConfig, DispatchConfig, GatewayConfig, IntentsConfig, TelemetryConfig};

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Configuration loading errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    FileRead {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {message}")]
    Parse { path: PathBuf, message: String },

    #[error("No Discord bot token configured (set DISCORD_TOKEN)")]
    MissingToken,
}

/// Complete cordrelay configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct CordConfig {
    #[serde(default)]
    pub discord: DiscordConfig,

    #[serde(default)]
    pub intents: IntentsConfig,

    #[serde(default)]
    pub dispatch: DispatchConfig,

    #[serde(default)]
    pub gateway: GatewayConfig,

    #[serde(default)]
    pub telemetry: TelemetryConfig,
}

impl CordConfig {
    /// Load configuration from all sources.
    pub fn load() -> Result<Self, ConfigError> {
        let (config, _sources) = Self::load_with_sources_from(None)?;
        Ok(config)
    }

    /// Load configuration, letting `config_path` replace `./cordrelay.toml`.
    pub fn load_from(config_path: Option<&Path>) -> Result<Self, ConfigError> {
        let (config, _sources) = Self::load_with_sources_from(config_path)?;
        Ok(config)
    }

    /// Load configuration from optional path and return information about sources.
    pub fn load_with_sources_from(
        config_path: Option<&Path>,
    ) -> Result<(Self, ConfigSources), ConfigError> {
        let mut sources = ConfigSources::default();
        let mut config = CordConfig::default();

        for path in loader::discover_config_files_with_override(config_path) {
            loader::load_from_file(&path)?.apply(&mut config);
            sources.files.push(path);
        }

        loader::apply_env_overrides(&mut config, &mut sources);

        Ok((config, sources))
    }

    /// The bot token, or `MissingToken` when none was configured.
    pub fn require_token(&self) -> Result<&str, ConfigError> {
        self.discord
            .token
            .as_deref()
            .filter(|t| !t.is_empty())
            .ok_or(ConfigError::MissingToken)
    }

    /// Serialize config to TOML string. The token is never included.
    pub fn to_toml(&self) -> String {
        let mut output = String::new();

        output.push_str("# cordrelay configuration\n\n");

        output.push_str("[discord]\n");
        output.push_str(&format!(
            "# token = {}\n",
            if self.discord.token.is_some() {
                "\"<redacted>\""
            } else {
                "<unset>"
            }
        ));
        if let Some(id) = self.discord.application_id {
            output.push_str(&format!("application_id = {}\n", id));
        }
        output.push_str(&format!("api_base = \"{}\"\n", self.discord.api_base));
        output.push_str(&format!("gateway_url = \"{}\"\n", self.discord.gateway_url));

        output.push_str("\n[intents]\n");
        output.push_str(&format!("guilds = {}\n", self.intents.guilds));
        output.push_str(&format!("members = {}\n", self.intents.members));
        output.push_str(&format!(
            "message_content = {}\n",
            self.intents.message_content
        ));

        output.push_str("\n[dispatch]\n");
        output.push_str(&format!(
            "max_concurrency = {}\n",
            self.dispatch.max_concurrency
        ));
        output.push_str(&format!("deadline_secs = {}\n", self.dispatch.deadline_secs));
        output.push_str(&format!(
            "drain_timeout_secs = {}\n",
            self.dispatch.drain_timeout_secs
        ));
        output.push_str(&format!(
            "ready_timeout_secs = {}\n",
            self.dispatch.ready_timeout_secs
        ));

        output.push_str("\n[gateway]\n");
        output.push_str(&format!(
            "reconnect_initial_ms = {}\n",
            self.gateway.reconnect_initial_ms
        ));
        output.push_str(&format!(
            "reconnect_max_ms = {}\n",
            self.gateway.reconnect_max_ms
        ));

        output.push_str("\n[telemetry]\n");
        if let Some(endpoint) = &self.telemetry.otlp_endpoint {
            output.push_str(&format!("otlp_endpoint = \"{}\"\n", endpoint));
        }
        output.push_str(&format!("log_level = \"{}\"\n", self.telemetry.log_level));

        output
    }
}
