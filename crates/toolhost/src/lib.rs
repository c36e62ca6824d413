//! MCP stdio tool-host session.
//!
//! Spawns the configured tool-host command as a child process and speaks
//! newline-delimited JSON-RPC 2.0 over its stdin/stdout: `initialize`,
//! `notifications/initialized`, `tools/list`, `tools/call`. Responses are
//! routed back to waiting callers through a pending-request map keyed by
//! request id. The child is spawned with kill-on-drop, so the host process
//! is torn down on every exit path from a conversation.

pub mod session;

pub use session::{McpHost, McpSession};
