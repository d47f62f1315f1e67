//! Config file discovery, loading, and environment variable overlay.

use crate::{ConfigError, CordConfig};
use serde::Deserialize;
use std::env;
use std::path::{Path, PathBuf};

/// Information about where config values came from.
#[derive(Debug, Clone, Default)]
pub struct ConfigSources {
    /// Config files that were loaded (in order)
    pub files: Vec<PathBuf>,
    /// Environment variables that overrode config values
    pub env_overrides: Vec<String>,
}

/// Discover config files, optionally with a CLI override path.
///
/// If `cli_path` is provided and exists, it replaces the local override.
/// Returns paths in load order (system, user, local/cli).
pub fn discover_config_files_with_override(cli_path: Option<&Path>) -> Vec<PathBuf> {
    let mut files = Vec::new();

    let system = PathBuf::from("/etc/cordrelay/config.toml");
    if system.exists() {
        files.push(system);
    }

    if let Some(config_dir) = directories::BaseDirs::new().map(|d| d.config_dir().to_path_buf()) {
        let user = config_dir.join("cordrelay/config.toml");
        if user.exists() {
            files.push(user);
        }
    }

    if let Some(path) = cli_path {
        if path.exists() {
            files.push(path.to_path_buf());
            return files;
        }
    }

    let local = PathBuf::from("cordrelay.toml");
    if local.exists() {
        files.push(local);
    }

    files
}

/// One file's worth of settings. Absent keys leave the base untouched.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub(crate) struct FileOverlay {
    #[serde(default)]
    discord: DiscordOverlay,
    #[serde(default)]
    intents: IntentsOverlay,
    #[serde(default)]
    dispatch: DispatchOverlay,
    #[serde(default)]
    gateway: GatewayOverlay,
    #[serde(default)]
    telemetry: TelemetryOverlay,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct DiscordOverlay {
    token: Option<String>,
    application_id: Option<u64>,
    api_base: Option<String>,
    gateway_url: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct IntentsOverlay {
    guilds: Option<bool>,
    members: Option<bool>,
    message_content: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct DispatchOverlay {
    max_concurrency: Option<usize>,
    deadline_secs: Option<u64>,
    drain_timeout_secs: Option<u64>,
    ready_timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct GatewayOverlay {
    reconnect_initial_ms: Option<u64>,
    reconnect_max_ms: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct TelemetryOverlay {
    otlp_endpoint: Option<String>,
    log_level: Option<String>,
}

fn set<T>(slot: &mut T, value: Option<T>) {
    if let Some(v) = value {
        *slot = v;
    }
}

impl FileOverlay {
    /// Apply this overlay on top of `config`; later files win.
    pub(crate) fn apply(self, config: &mut CordConfig) {
        let d = self.discord;
        if d.token.is_some() {
            config.discord.token = d.token;
        }
        if d.application_id.is_some() {
            config.discord.application_id = d.application_id;
        }
        set(&mut config.discord.api_base, d.api_base);
        set(&mut config.discord.gateway_url, d.gateway_url);

        let i = self.intents;
        set(&mut config.intents.guilds, i.guilds);
        set(&mut config.intents.members, i.members);
        set(&mut config.intents.message_content, i.message_content);

        let p = self.dispatch;
        set(&mut config.dispatch.max_concurrency, p.max_concurrency);
        set(&mut config.dispatch.deadline_secs, p.deadline_secs);
        set(&mut config.dispatch.drain_timeout_secs, p.drain_timeout_secs);
        set(&mut config.dispatch.ready_timeout_secs, p.ready_timeout_secs);

        let g = self.gateway;
        set(&mut config.gateway.reconnect_initial_ms, g.reconnect_initial_ms);
        set(&mut config.gateway.reconnect_max_ms, g.reconnect_max_ms);

        let t = self.telemetry;
        if t.otlp_endpoint.is_some() {
            config.telemetry.otlp_endpoint = t.otlp_endpoint;
        }
        set(&mut config.telemetry.log_level, t.log_level);
    }
}

/// Load one overlay from a TOML file.
pub(crate) fn load_from_file(path: &Path) -> Result<FileOverlay, ConfigError> {
    let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::FileRead {
        path: path.to_path_buf(),
        source: e,
    })?;

    parse_toml(&contents, path)
}

fn parse_toml(contents: &str, path: &Path) -> Result<FileOverlay, ConfigError> {
    toml::from_str(contents).map_err(|e: toml::de::Error| ConfigError::Parse {
        path: path.to_path_buf(),
        message: e.to_string(),
    })
}

/// Apply environment variable overrides from the process environment.
pub fn apply_env_overrides(config: &mut CordConfig, sources: &mut ConfigSources) {
    apply_env_overrides_from(config, sources, env::vars());
}

/// Apply overrides from an explicit set of variables.
pub fn apply_env_overrides_from<I>(config: &mut CordConfig, sources: &mut ConfigSources, vars: I)
where
    I: IntoIterator<Item = (String, String)>,
{
    for (key, value) in vars {
        let applied = match key.as_str() {
            "DISCORD_TOKEN" | "CORDRELAY_TOKEN" => {
                let token = value.trim().to_string();
                config.discord.token = (!token.is_empty()).then_some(token);
                true
            }
            "CORDRELAY_APPLICATION_ID" => match value.parse() {
                Ok(id) => {
                    config.discord.application_id = Some(id);
                    true
                }
                Err(_) => false,
            },
            "CORDRELAY_API_BASE" => {
                config.discord.api_base = value;
                true
            }
            "CORDRELAY_GATEWAY_URL" => {
                config.discord.gateway_url = value;
                true
            }
            "CORDRELAY_INTENT_MEMBERS" => parse_flag(&value)
                .map(|v| config.intents.members = v)
                .is_some(),
            "CORDRELAY_INTENT_MESSAGE_CONTENT" => parse_flag(&value)
                .map(|v| config.intents.message_content = v)
                .is_some(),
            "CORDRELAY_MAX_CONCURRENCY" => match value.parse() {
                Ok(n) => {
                    config.dispatch.max_concurrency = n;
                    true
                }
                Err(_) => false,
            },
            "CORDRELAY_DEADLINE_SECS" => match value.parse() {
                Ok(n) => {
                    config.dispatch.deadline_secs = n;
                    true
                }
                Err(_) => false,
            },
            "CORDRELAY_OTLP_ENDPOINT" | "OTEL_EXPORTER_OTLP_ENDPOINT" => {
                config.telemetry.otlp_endpoint = Some(value);
                true
            }
            "CORDRELAY_LOG_LEVEL" | "RUST_LOG" => {
                config.telemetry.log_level = value;
                true
            }
            _ => false,
        };

        if applied {
            sources.env_overrides.push(key);
        }
    }
}

fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_parse_minimal_toml() {
        let toml = r#"
[dispatch]
max_concurrency = 4
"#;
        let mut config = CordConfig::default();
        parse_toml(toml, Path::new("test.toml")).unwrap().apply(&mut config);

        assert_eq!(config.dispatch.max_concurrency, 4);
        // Other values should be defaults
        assert_eq!(config.dispatch.deadline_secs, 30);
        assert!(config.intents.members);
    }

    #[test]
    fn test_parse_full_toml() {
        let toml = r#"
[discord]
token = "abc.def.ghi"
application_id = 1234
api_base = "http://localhost:9999/api/v10"

[intents]
members = false
message_content = false

[dispatch]
max_concurrency = 2
deadline_secs = 5
drain_timeout_secs = 1

[gateway]
reconnect_initial_ms = 250
reconnect_max_ms = 4000

[telemetry]
otlp_endpoint = "127.0.0.1:4317"
log_level = "debug"
"#;
        let mut config = CordConfig::default();
        parse_toml(toml, Path::new("test.toml")).unwrap().apply(&mut config);

        assert_eq!(config.discord.token.as_deref(), Some("abc.def.ghi"));
        assert_eq!(config.discord.application_id, Some(1234));
        assert_eq!(config.discord.api_base, "http://localhost:9999/api/v10");
        assert!(config.intents.guilds);
        assert!(!config.intents.members);
        assert!(!config.intents.message_content);
        assert_eq!(config.dispatch.max_concurrency, 2);
        assert_eq!(config.dispatch.deadline_secs, 5);
        assert_eq!(config.dispatch.drain_timeout_secs, 1);
        assert_eq!(config.gateway.reconnect_initial_ms, 250);
        assert_eq!(config.gateway.reconnect_max_ms, 4000);
        assert_eq!(config.telemetry.otlp_endpoint.as_deref(), Some("127.0.0.1:4317"));
        assert_eq!(config.telemetry.log_level, "debug");
    }

    #[test]
    fn test_unknown_key_is_rejected() {
        let toml = r#"
[dispatch]
max_concurency = 4
"#;
        let err = parse_toml(toml, Path::new("typo.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }

    #[test]
    fn test_later_overlay_wins() {
        let mut config = CordConfig::default();
        parse_toml("[dispatch]\nmax_concurrency = 3\ndeadline_secs = 9\n", Path::new("a"))
            .unwrap()
            .apply(&mut config);
        parse_toml("[dispatch]\nmax_concurrency = 12\n", Path::new("b"))
            .unwrap()
            .apply(&mut config);

        assert_eq!(config.dispatch.max_concurrency, 12);
        assert_eq!(config.dispatch.deadline_secs, 9);
    }

    #[test]
    fn test_env_overrides() {
        let mut config = CordConfig::default();
        let mut sources = ConfigSources::default();
        apply_env_overrides_from(
            &mut config,
            &mut sources,
            vars(&[
                ("DISCORD_TOKEN", "  tok  "),
                ("CORDRELAY_INTENT_MEMBERS", "off"),
                ("CORDRELAY_MAX_CONCURRENCY", "not-a-number"),
                ("CORDRELAY_DEADLINE_SECS", "12"),
                ("UNRELATED", "x"),
            ]),
        );

        assert_eq!(config.discord.token.as_deref(), Some("tok"));
        assert!(!config.intents.members);
        assert_eq!(config.dispatch.max_concurrency, 8);
        assert_eq!(config.dispatch.deadline_secs, 12);
        assert_eq!(
            sources.env_overrides,
            vec!["DISCORD_TOKEN", "CORDRELAY_INTENT_MEMBERS", "CORDRELAY_DEADLINE_SECS"]
        );
    }

    #[test]
    fn test_blank_token_env_clears_token() {
        let mut config = CordConfig::default();
        config.discord.token = Some("from-file".to_string());
        let mut sources = ConfigSources::default();
        apply_env_overrides_from(&mut config, &mut sources, vars(&[("DISCORD_TOKEN", "   ")]));
        assert!(config.discord.token.is_none());
    }

    #[test]
    fn test_discover_config_files() {
        // Just verify it doesn't panic
        let _files = discover_config_files_with_override(None);
    }
}
