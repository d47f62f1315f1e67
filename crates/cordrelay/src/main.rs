//! cordrelay - MCP server for a Discord bot
//!
//! Subcommands:
//! - `cordrelay serve` - Serve MCP over stdio (the default)
//! - `cordrelay tools` - Print the tool descriptors as JSON
//! - `cordrelay config` - Print the effective configuration and its sources
//! - `cordrelay check` - Connect to Discord, wait for READY, report, exit

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use cordconf::CordConfig;

use cordrelay::{handlers, serve, telemetry};

#[derive(Parser)]
#[command(name = "cordrelay")]
#[command(about = "MCP tool server for a Discord bot")]
#[command(version)]
struct Cli {
    /// Config file to use instead of ./cordrelay.toml
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve MCP over stdin/stdout
    Serve,

    /// Print every tool descriptor as JSON
    Tools,

    /// Show the effective configuration and where it came from
    Config,

    /// Connect to Discord, wait for READY, print a summary
    Check,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let (config, sources) = CordConfig::load_with_sources_from(cli.config.as_deref())
        .context("Failed to load configuration")?;

    match cli.command.unwrap_or(Commands::Serve) {
        Commands::Serve => {
            let guard = telemetry::init(&config.telemetry)?;
            let result = serve::run(config).await;
            if let Err(e) = &result {
                tracing::error!(error = %format!("{e:#}"), "cordrelay stopped");
            }
            guard.shutdown();
            result?;
        }
        Commands::Tools => {
            let registry = handlers::registry()?;
            println!("{}", serde_json::to_string_pretty(&registry.tools())?);
        }
        Commands::Config => {
            print!("{}", config.to_toml());
            println!();
            if sources.files.is_empty() {
                println!("# no config files found");
            }
            for file in &sources.files {
                println!("# file: {}", file.display());
            }
            for var in &sources.env_overrides {
                println!("# env: {var}");
            }
        }
        Commands::Check => {
            let guard = telemetry::init(&config.telemetry)?;
            let summary = serve::check(config).await;
            guard.shutdown();
            println!("{}", serde_json::to_string_pretty(&summary?)?);
        }
    }

    Ok(())
}
