//! cordrelay - MCP tools for a Discord bot
//!
//! An editor or assistant speaks MCP to us over stdio; we carry each tool
//! call to Discord through one shared [`cordproto::RemoteSession`].
//!
//! - `registry` and `schema`: the fixed table of operations and how their
//!   arguments are checked
//! - `dispatch`: one invocation in, exactly one response out
//! - `handlers`: the operations themselves
//! - `lifecycle`: startup gating and ordered shutdown
//! - `mcp`: the rmcp tool server and the stdio serve loop
//! - `serve`: wiring from config, and signal handling

pub mod context;
pub mod dispatch;
pub mod error;
pub mod handlers;
pub mod lifecycle;
pub mod mcp;
pub mod registry;
pub mod schema;
pub mod serve;
pub mod telemetry;

pub use context::OpContext;
pub use dispatch::{DispatchConfig, Dispatcher, Invocation, Response};
pub use error::{ErrorKind, OpError};
pub use lifecycle::{DrainReport, Lifecycle, LifecycleConfig, Phase};
pub use mcp::McpServer;
pub use registry::{
    Capability, OpResult, OperationRegistry, OperationSpec, RegistryBuilder, RegistryError,
    SideEffect,
};
pub use schema::{FieldViolation, Param, ParamKind, ValidatedArgs};
pub use serve::Bridge;
