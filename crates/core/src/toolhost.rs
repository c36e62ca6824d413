//! Tool session trait — the scoped connection to the tool host.
//!
//! One session is opened per conversation, the tool schemas are listed once
//! immediately after open, and the session is released on every exit path
//! from the round loop. Tools are arbitrary external actions; a call may
//! take a long time and may fail — failures are reported, never fatal to
//! the driver.

use crate::error::ToolHostError;
use crate::provider::ToolSchema;
use async_trait::async_trait;

/// Opens scoped sessions to the tool host. One implementation per
/// transport; tests substitute a scripted fake.
#[async_trait]
pub trait ToolHost: Send + Sync {
    /// Spawn/connect the host and return an initialized session with its
    /// tool schemas already listed.
    async fn open(&self) -> std::result::Result<Box<dyn ToolSession>, ToolHostError>;
}

/// An open session to the tool host.
#[async_trait]
pub trait ToolSession: Send + Sync {
    /// The tool schemas advertised by the host, fetched once at open.
    fn schemas(&self) -> &[ToolSchema];

    /// Execute a named tool and return its result text.
    ///
    /// Unknown tool names, malformed arguments, tool-internal failures,
    /// timeouts, and host-connection loss all surface as `ToolHostError`
    /// carrying a human-readable reason.
    async fn call(
        &self,
        tool_name: &str,
        arguments: serde_json::Value,
    ) -> std::result::Result<String, ToolHostError>;

    /// Tear the host session down. Implementations also release on drop so
    /// every exit path, including panics in the caller, closes the session.
    async fn close(&self);
}
