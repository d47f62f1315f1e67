//! Wiring: config in, a running stdio MCP server out.

use std::sync::Arc;

use anyhow::{Context, Result};
use cordconf::CordConfig;
use cordproto::{HttpRest, Intents, RemoteSession, SessionConfig, WsGateway};
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::dispatch::{DispatchConfig, Dispatcher};
use crate::handlers;
use crate::lifecycle::{Lifecycle, LifecycleConfig};
use crate::mcp::McpServer;

/// The session, lifecycle, and dispatcher, built and linked.
pub struct Bridge {
    pub session: Arc<RemoteSession>,
    pub lifecycle: Arc<Lifecycle>,
    pub dispatcher: Arc<Dispatcher>,
}

impl Bridge {
    /// Real transports: REST over HTTP, gateway over WebSocket.
    pub fn from_config(config: &CordConfig) -> Result<Self> {
        let token = config.require_token()?;
        let rest = HttpRest::new(&config.discord.api_base, token)
            .context("Failed to build the Discord HTTP client")?;
        let gateway = WsGateway::new(
            &config.discord.gateway_url,
            token,
            Intents::from_config(&config.intents),
        );
        let session = RemoteSession::new(
            Arc::new(rest),
            Arc::new(gateway),
            SessionConfig::from_config(config),
        );
        Self::with_session(session, config)
    }

    /// Everything above the transports, on an existing session.
    pub fn with_session(session: Arc<RemoteSession>, config: &CordConfig) -> Result<Self> {
        let registry = Arc::new(handlers::registry().context("Failed to build operation registry")?);
        let lifecycle = Lifecycle::new(Arc::clone(&session), LifecycleConfig::from_config(config));
        let dispatcher = Arc::new(Dispatcher::new(
            registry,
            Arc::clone(&lifecycle),
            DispatchConfig::from_config(config),
        ));
        Ok(Self {
            session,
            lifecycle,
            dispatcher,
        })
    }

    /// Who we are and what we can see, once READY.
    pub fn summary(&self) -> Value {
        let user = self.session.bot_user();
        json!({
            "user": user.as_ref().map(|u| u.tag()),
            "user_id": user.as_ref().map(|u| u.id),
            "application_id": self.session.application_id(),
            "guilds": self.session.guild_count(),
            "state": self.session.state().as_str(),
            "operations": self.dispatcher.registry().len(),
        })
    }
}

/// Run the MCP server on stdin/stdout until EOF or a signal.
pub async fn run(config: CordConfig) -> Result<()> {
    info!("cordrelay starting");
    let bridge = Bridge::from_config(&config)?;

    bridge
        .lifecycle
        .start()
        .await
        .context("Failed to connect to Discord")?;
    info!(
        guilds = bridge.session.guild_count(),
        operations = bridge.dispatcher.registry().len(),
        max_concurrency = config.dispatch.max_concurrency,
        "ready; serving MCP on stdio"
    );

    let stop = CancellationToken::new();
    let signals = tokio::spawn(stop_on_signal(stop.clone()));

    let (stdin, stdout) = rmcp::transport::stdio();
    let result = McpServer::new(Arc::clone(&bridge.dispatcher))
        .run(stdin, stdout, stop)
        .await;
    signals.abort();

    info!("shutdown complete");
    result
}

/// Connect, wait for READY, report, disconnect.
pub async fn check(config: CordConfig) -> Result<Value> {
    let bridge = Bridge::from_config(&config)?;
    bridge
        .lifecycle
        .start()
        .await
        .context("Failed to connect to Discord")?;
    let summary = bridge.summary();
    bridge.lifecycle.shutdown().await;
    Ok(summary)
}

async fn stop_on_signal(stop: CancellationToken) {
    shutdown_signal().await;
    stop.cancel();
}

async fn shutdown_signal() {
    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            match result {
                Ok(()) => info!("Received SIGINT, shutting down..."),
                Err(e) => {
                    warn!(error = %e, "cannot listen for SIGINT");
                    std::future::pending::<()>().await;
                }
            }
        }
        _ = sigterm() => {
            info!("Received SIGTERM, shutting down...");
        }
    }
}

#[cfg(unix)]
async fn sigterm() {
    use tokio::signal::unix::{signal, SignalKind};
    match signal(SignalKind::terminate()) {
        Ok(mut sigterm) => {
            sigterm.recv().await;
        }
        Err(e) => {
            warn!(error = %e, "cannot listen for SIGTERM");
            std::future::pending::<()>().await;
        }
    }
}

#[cfg(not(unix))]
async fn sigterm() {
    std::future::pending::<()>().await;
}
