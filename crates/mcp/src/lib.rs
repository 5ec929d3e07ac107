//! MCP server plumbing for calbridge.
//!
//! JSON-RPC 2.0 dispatch of `initialize`, `ping`, `tools/list` and
//! `tools/call`, a registry of [`tool::McpTool`]s, and an axum router that
//! answers `POST /mcp` with either plain JSON or `text/event-stream` frames.

pub mod error;
pub mod http;
pub mod server;
pub mod sse;
pub mod tool;
pub mod types;

pub use {
    error::{Error, Result},
    http::{router, serve},
    server::McpServer,
    tool::{McpTool, ToolRegistry},
};
