//! MCP over stdio, served by rmcp.

mod server;

pub use server::McpServer;
