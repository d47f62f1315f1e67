//! MCP tool server on rmcp.
//!
//! rmcp owns JSON-RPC framing and method routing. We sit in front of its
//! reader so a `tools/call` is admitted by the lifecycle the moment its line
//! is read, and so EOF (or the stop token) drains in-flight calls before
//! rmcp sees the end of input.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use bytes::Bytes;
use futures::stream;
use parking_lot::Mutex;
use rmcp::model::{
    CallToolRequestParam, CallToolResult, Content, Implementation, ListToolsResult,
    PaginatedRequestParam, ServerCapabilities, ServerInfo,
};
use rmcp::service::RequestContext;
use rmcp::{ErrorData as McpError, RoleServer, ServerHandler, ServiceExt};
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, BufReader, Lines};
use tokio_util::io::StreamReader;
use tokio_util::sync::CancellationToken;
use tokio_util::task::task_tracker::TaskTrackerToken;
use tracing::{debug, info, warn};

use crate::dispatch::{Dispatcher, Invocation};

const INSTRUCTIONS: &str = "Tools for managing a Discord server through a bot account. \
Ids are Discord snowflakes passed as strings. Failed calls return isError with \
error.kind set to one of InvalidArgument, UnknownOperation, Unavailable, RateLimited, \
RemotePermission, RemoteNotFound, Transient, DeadlineExceeded, PartialFailure, \
ConfigurationError, Internal.";

/// Time left for rmcp to write replies released by the drain.
const FLUSH_GRACE: Duration = Duration::from_millis(100);

/// Admissions taken at read time, keyed by the JSON-encoded request id.
type Admitted = Arc<Mutex<HashMap<String, TaskTrackerToken>>>;

#[derive(Clone)]
pub struct McpServer {
    dispatcher: Arc<Dispatcher>,
    admitted: Admitted,
}

impl McpServer {
    pub fn new(dispatcher: Arc<Dispatcher>) -> Self {
        Self {
            dispatcher,
            admitted: Arc::default(),
        }
    }

    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }

    /// Run one tool call and wrap the Response for MCP. The full Response
    /// goes in `structuredContent`; the text block is the same, pretty.
    pub async fn call(
        &self,
        name: &str,
        arguments: Value,
        admitted: Option<TaskTrackerToken>,
    ) -> Result<CallToolResult, McpError> {
        let invocation = Invocation::new(name, arguments);
        let response = match admitted {
            Some(token) => self.dispatcher.dispatch_admitted(invocation, Some(token)).await,
            None => self.dispatcher.dispatch(invocation).await,
        };

        let structured = serde_json::to_value(&response)
            .map_err(|e| McpError::internal_error(format!("failed to serialize result: {e}"), None))?;
        let text = serde_json::to_string_pretty(&structured)
            .map_err(|e| McpError::internal_error(format!("failed to render result: {e}"), None))?;

        let mut result = if response.success {
            CallToolResult::success(vec![Content::text(text)])
        } else {
            CallToolResult::error(vec![Content::text(text)])
        };
        result.structured_content = Some(structured);
        Ok(result)
    }

    /// Serve MCP over `reader`/`writer` until EOF or `stop`, then drain
    /// through the lifecycle.
    pub async fn run<R, W>(self, reader: R, writer: W, stop: CancellationToken) -> anyhow::Result<()>
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let input = StreamReader::new(Box::pin(admitting_lines(self.clone(), reader, stop)));

        let started = ServiceExt::serve(self.clone(), (input, writer)).await;
        let result = match started {
            Ok(service) => {
                info!("MCP service running");
                service
                    .waiting()
                    .await
                    .map(|reason| debug!(?reason, "MCP service finished"))
                    .context("MCP service task failed")
            }
            Err(e) => Err(e).context("Failed to start MCP service"),
        };

        // Covers a client that left before initializing
        let report = self.dispatcher.lifecycle().shutdown().await;
        if report.aborted > 0 {
            warn!(aborted = report.aborted, "answered stragglers as unavailable");
        }
        result
    }

    fn admit_line(&self, line: &str) {
        let Some(key) = tool_call_key(line) else {
            return;
        };
        if let Some(token) = self.dispatcher.lifecycle().admit() {
            self.admitted.lock().insert(key, token);
        }
    }

    fn take_admission(&self, context: &RequestContext<RoleServer>) -> Option<TaskTrackerToken> {
        let key = serde_json::to_string(&context.id).ok()?;
        self.admitted.lock().remove(&key)
    }
}

impl ServerHandler for McpServer {
    fn get_info(&self) -> ServerInfo {
        let mut server_info = Implementation::from_build_env();
        server_info.name = env!("CARGO_PKG_NAME").to_string();
        server_info.version = env!("CARGO_PKG_VERSION").to_string();

        ServerInfo {
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            server_info,
            instructions: Some(INSTRUCTIONS.to_string()),
            ..Default::default()
        }
    }

    fn list_tools(
        &self,
        _request: Option<PaginatedRequestParam>,
        _context: RequestContext<RoleServer>,
    ) -> impl Future<Output = Result<ListToolsResult, McpError>> + Send + '_ {
        async move { Ok(ListToolsResult::with_all_items(self.dispatcher.registry().tools())) }
    }

    fn call_tool(
        &self,
        request: CallToolRequestParam,
        context: RequestContext<RoleServer>,
    ) -> impl Future<Output = Result<CallToolResult, McpError>> + Send + '_ {
        async move {
            let admitted = self.take_admission(&context);
            let arguments = Value::Object(request.arguments.unwrap_or_default());
            self.call(&request.name, arguments, admitted).await
        }
    }
}

/// Request id of a line that rmcp will route to `call_tool`.
fn tool_call_key(line: &str) -> Option<String> {
    let message: Value = serde_json::from_str(line).ok()?;
    if message.get("method")?.as_str()? != "tools/call" {
        return None;
    }
    let params = message.get("params")?;
    params.get("name")?.as_str()?;
    if !matches!(params.get("arguments"), None | Some(Value::Object(_))) {
        return None;
    }
    Some(message.get("id")?.to_string())
}

struct LineState<R> {
    server: McpServer,
    lines: Lines<BufReader<R>>,
    stop: CancellationToken,
}

/// Input lines for rmcp. Each `tools/call` is admitted as it is read; at
/// EOF or stop the lifecycle drains before the stream ends.
fn admitting_lines<R>(
    server: McpServer,
    reader: R,
    stop: CancellationToken,
) -> impl futures::Stream<Item = std::io::Result<Bytes>> + Send + 'static
where
    R: AsyncRead + Unpin + Send + 'static,
{
    let state = LineState {
        server,
        lines: BufReader::new(reader).lines(),
        stop,
    };

    stream::unfold(state, |mut state| async move {
        let next = tokio::select! {
            _ = state.stop.cancelled() => {
                info!("stop requested");
                None
            }
            next = state.lines.next_line() => match next {
                Ok(Some(line)) => Some(line),
                Ok(None) => {
                    info!("stdin closed");
                    None
                }
                Err(e) => {
                    warn!(error = %e, "reading stdin failed");
                    None
                }
            },
        };

        match next {
            Some(line) => {
                state.server.admit_line(&line);
                let mut bytes = line.into_bytes();
                bytes.push(b'\n');
                Some((Ok(Bytes::from(bytes)), state))
            }
            None => {
                let report = state.server.dispatcher.lifecycle().shutdown().await;
                if report.aborted > 0 {
                    warn!(aborted = report.aborted, "answered stragglers as unavailable");
                }
                tokio::time::sleep(FLUSH_GRACE).await;
                None
            }
        }
    })
}
