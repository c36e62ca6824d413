//! The stdio JSON-RPC session implementation.

use async_trait::async_trait;
use larkrelay_core::error::ToolHostError;
use larkrelay_core::provider::ToolSchema;
use larkrelay_core::toolhost::{ToolHost, ToolSession};
use serde::Deserialize;
use serde_json::{Value, json};
use std::collections::HashMap;
use std::process::Stdio;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::{Mutex, oneshot};
use tracing::{debug, warn};

const PROTOCOL_VERSION: &str = "2024-11-05";
const CLIENT_NAME: &str = "larkrelay";

/// Waiters for in-flight requests, keyed by request id.
type PendingMap = Arc<Mutex<HashMap<u64, oneshot::Sender<RpcResponse>>>>;

/// Spawns one MCP stdio session per conversation.
pub struct McpHost {
    command: String,
    args: Vec<String>,
    call_timeout: Duration,
}

impl McpHost {
    pub fn new(command: impl Into<String>, args: Vec<String>, call_timeout: Duration) -> Self {
        Self {
            command: command.into(),
            args,
            call_timeout,
        }
    }
}

#[async_trait]
impl ToolHost for McpHost {
    async fn open(&self) -> Result<Box<dyn ToolSession>, ToolHostError> {
        let session =
            McpSession::open(&self.command, &self.args, self.call_timeout).await?;
        Ok(Box::new(session))
    }
}

/// An open stdio session: child process, writer half, and response router.
#[derive(Debug)]
pub struct McpSession {
    child: Mutex<Child>,
    stdin: Mutex<ChildStdin>,
    pending: PendingMap,
    next_id: AtomicU64,
    call_timeout: Duration,
    schemas: Vec<ToolSchema>,
}

impl McpSession {
    /// Spawn the host, run the initialize handshake, and list its tools.
    pub async fn open(
        command: &str,
        args: &[String],
        call_timeout: Duration,
    ) -> Result<Self, ToolHostError> {
        let mut child = Command::new(command)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| ToolHostError::SpawnFailed(format!("{command}: {e}")))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| ToolHostError::SpawnFailed("no stdin pipe".into()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| ToolHostError::SpawnFailed("no stdout pipe".into()))?;

        let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));

        // Reader task: parse one JSON-RPC message per line and route
        // responses to their waiters. Ends when the host closes stdout.
        let router = pending.clone();
        tokio::spawn(async move {
            let mut lines = BufReader::new(stdout).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                match serde_json::from_str::<RpcResponse>(line) {
                    Ok(response) if response.id.is_some() => {
                        let id = response.id.unwrap_or_default();
                        let mut map = router.lock().await;
                        if let Some(waiter) = map.remove(&id) {
                            let _ = waiter.send(response);
                        } else {
                            warn!(id, "Response for unknown request id");
                        }
                    }
                    Ok(_) => debug!("Ignoring server notification"),
                    Err(e) => debug!(error = %e, "Ignoring unparseable host output"),
                }
            }
        });

        let mut session = Self {
            child: Mutex::new(child),
            stdin: Mutex::new(stdin),
            pending,
            next_id: AtomicU64::new(1),
            call_timeout,
            schemas: Vec::new(),
        };

        session.initialize().await?;
        session.schemas = session.list_tools().await?;
        Ok(session)
    }

    async fn initialize(&self) -> Result<(), ToolHostError> {
        let params = json!({
            "protocolVersion": PROTOCOL_VERSION,
            "capabilities": {},
            "clientInfo": {
                "name": CLIENT_NAME,
                "version": env!("CARGO_PKG_VERSION"),
            },
        });
        self.request("initialize", params).await?;
        self.notify("notifications/initialized", json!({})).await?;
        Ok(())
    }

    async fn list_tools(&self) -> Result<Vec<ToolSchema>, ToolHostError> {
        let result = self.request("tools/list", json!({})).await?;
        let listed: ToolsListResult = serde_json::from_value(result)
            .map_err(|e| ToolHostError::Protocol(format!("tools/list result: {e}")))?;

        Ok(listed
            .tools
            .into_iter()
            .map(|t| ToolSchema {
                name: t.name,
                description: t.description.unwrap_or_default(),
                parameters: t.input_schema,
            })
            .collect())
    }

    /// Send a request and wait for its response, bounded by the call timeout.
    async fn request(&self, method: &str, params: Value) -> Result<Value, ToolHostError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let message = json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": method,
            "params": params,
        });

        let (tx, rx) = oneshot::channel();
        // Register the waiter before writing so a fast response cannot race
        // the insert.
        self.pending.lock().await.insert(id, tx);

        if let Err(e) = self.write_line(&message).await {
            self.pending.lock().await.remove(&id);
            return Err(e);
        }

        let response = match tokio::time::timeout(self.call_timeout, rx).await {
            Ok(Ok(response)) => response,
            Ok(Err(_)) => {
                return Err(ToolHostError::ConnectionLost(format!(
                    "host closed during {method}"
                )));
            }
            Err(_) => {
                self.pending.lock().await.remove(&id);
                return Err(ToolHostError::Timeout {
                    tool_name: method.to_string(),
                    timeout_secs: self.call_timeout.as_secs(),
                });
            }
        };

        if let Some(error) = response.error {
            return Err(ToolHostError::Protocol(format!(
                "{method} failed: {} (code {})",
                error.message, error.code
            )));
        }

        response
            .result
            .ok_or_else(|| ToolHostError::Protocol(format!("{method}: empty result")))
    }

    async fn notify(&self, method: &str, params: Value) -> Result<(), ToolHostError> {
        let message = json!({
            "jsonrpc": "2.0",
            "method": method,
            "params": params,
        });
        self.write_line(&message).await
    }

    async fn write_line(&self, message: &Value) -> Result<(), ToolHostError> {
        let mut line = message.to_string();
        line.push('\n');
        let mut stdin = self.stdin.lock().await;
        stdin
            .write_all(line.as_bytes())
            .await
            .map_err(|e| ToolHostError::ConnectionLost(format!("write: {e}")))?;
        stdin
            .flush()
            .await
            .map_err(|e| ToolHostError::ConnectionLost(format!("flush: {e}")))
    }
}

#[async_trait]
impl ToolSession for McpSession {
    fn schemas(&self) -> &[ToolSchema] {
        &self.schemas
    }

    async fn call(
        &self,
        tool_name: &str,
        arguments: Value,
    ) -> Result<String, ToolHostError> {
        debug!(tool = %tool_name, "Calling tool");
        let params = json!({
            "name": tool_name,
            "arguments": arguments,
        });

        let result = self.request("tools/call", params).await.map_err(|e| {
            // Timeouts keep their own variant; everything else collapses
            // into a single execution-failed outcome with the reason.
            match e {
                ToolHostError::Timeout { .. } => ToolHostError::Timeout {
                    tool_name: tool_name.to_string(),
                    timeout_secs: self.call_timeout.as_secs(),
                },
                other => ToolHostError::ExecutionFailed {
                    tool_name: tool_name.to_string(),
                    reason: other.to_string(),
                },
            }
        })?;

        let call_result: ToolCallResult = serde_json::from_value(result)
            .map_err(|e| ToolHostError::Protocol(format!("tools/call result: {e}")))?;

        // Only the first content item's text is used.
        let text = call_result
            .content
            .into_iter()
            .next()
            .and_then(|c| c.text)
            .unwrap_or_default();

        if call_result.is_error {
            return Err(ToolHostError::ExecutionFailed {
                tool_name: tool_name.to_string(),
                reason: if text.is_empty() { "tool reported an error".into() } else { text },
            });
        }

        Ok(text)
    }

    async fn close(&self) {
        let mut child = self.child.lock().await;
        if let Err(e) = child.start_kill() {
            debug!(error = %e, "Tool host already gone");
        }
        let _ = child.wait().await;
    }
}

// --- JSON-RPC wire types (internal) ---

#[derive(Debug, Deserialize)]
struct RpcResponse {
    #[serde(default)]
    id: Option<u64>,
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<RpcErrorBody>,
}

#[derive(Debug, Deserialize)]
struct RpcErrorBody {
    code: i64,
    message: String,
}

#[derive(Debug, Deserialize)]
struct ToolsListResult {
    #[serde(default)]
    tools: Vec<ListedTool>,
}

#[derive(Debug, Deserialize)]
struct ListedTool {
    name: String,
    #[serde(default)]
    description: Option<String>,
    #[serde(rename = "inputSchema", default)]
    input_schema: Value,
}

#[derive(Debug, Deserialize)]
struct ToolCallResult {
    #[serde(default)]
    content: Vec<ContentItem>,
    #[serde(rename = "isError", default)]
    is_error: bool,
}

#[derive(Debug, Deserialize)]
struct ContentItem {
    #[serde(default)]
    text: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_tools_list_result() {
        let data = r#"{
            "tools": [
                {
                    "name": "browser_navigate",
                    "description": "Navigate to a URL",
                    "inputSchema": {"type": "object", "properties": {"url": {"type": "string"}}}
                },
                {"name": "browser_snapshot"}
            ]
        }"#;
        let parsed: ToolsListResult = serde_json::from_str(data).unwrap();
        assert_eq!(parsed.tools.len(), 2);
        assert_eq!(parsed.tools[0].name, "browser_navigate");
        assert_eq!(
            parsed.tools[0].description.as_deref(),
            Some("Navigate to a URL")
        );
        assert!(parsed.tools[1].description.is_none());
    }

    #[test]
    fn parse_call_result_first_text() {
        let data = r#"{"content":[{"type":"text","text":"page loaded"},{"type":"text","text":"ignored"}]}"#;
        let parsed: ToolCallResult = serde_json::from_str(data).unwrap();
        assert!(!parsed.is_error);
        assert_eq!(parsed.content[0].text.as_deref(), Some("page loaded"));
    }

    #[test]
    fn parse_call_result_error_flag() {
        let data = r#"{"content":[{"type":"text","text":"no such element"}],"isError":true}"#;
        let parsed: ToolCallResult = serde_json::from_str(data).unwrap();
        assert!(parsed.is_error);
    }

    #[test]
    fn parse_error_response() {
        let data = r#"{"jsonrpc":"2.0","id":3,"error":{"code":-32602,"message":"unknown tool"}}"#;
        let parsed: RpcResponse = serde_json::from_str(data).unwrap();
        assert_eq!(parsed.id, Some(3));
        let err = parsed.error.unwrap();
        assert_eq!(err.code, -32602);
        assert_eq!(err.message, "unknown tool");
    }

    // The scripted host below answers with fixed ids matching the session's
    // sequential id assignment: initialize=1, tools/list=2, tools/call=3.
    #[cfg(unix)]
    const FAKE_HOST: &str = r#"
read line
echo '{"jsonrpc":"2.0","id":1,"result":{"protocolVersion":"2024-11-05","capabilities":{},"serverInfo":{"name":"fake","version":"0"}}}'
read line
read line
echo '{"jsonrpc":"2.0","id":2,"result":{"tools":[{"name":"echo","description":"Echoes back","inputSchema":{"type":"object"}}]}}'
read line
echo '{"jsonrpc":"2.0","id":3,"result":{"content":[{"type":"text","text":"echoed"}]}}'
"#;

    #[cfg(unix)]
    #[tokio::test]
    async fn session_handshake_list_and_call() {
        let session = McpSession::open(
            "sh",
            &["-c".to_string(), FAKE_HOST.to_string()],
            Duration::from_secs(5),
        )
        .await
        .unwrap();

        assert_eq!(session.schemas().len(), 1);
        assert_eq!(session.schemas()[0].name, "echo");

        let result = session.call("echo", json!({"text": "hi"})).await.unwrap();
        assert_eq!(result, "echoed");

        session.close().await;
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn call_timeout_surfaces_as_timeout_error() {
        // Host that answers the handshake and then goes silent.
        let script = r#"
read line
echo '{"jsonrpc":"2.0","id":1,"result":{"protocolVersion":"2024-11-05","capabilities":{},"serverInfo":{"name":"fake","version":"0"}}}'
read line
read line
echo '{"jsonrpc":"2.0","id":2,"result":{"tools":[]}}'
sleep 60
"#;
        let session = McpSession::open(
            "sh",
            &["-c".to_string(), script.to_string()],
            Duration::from_millis(200),
        )
        .await
        .unwrap();

        let err = session.call("slow", json!({})).await.unwrap_err();
        assert!(matches!(err, ToolHostError::Timeout { .. }), "{err}");
        session.close().await;
    }

    #[tokio::test]
    async fn spawn_failure_is_reported() {
        let err = McpSession::open(
            "definitely-not-a-real-command-xyz",
            &[],
            Duration::from_secs(1),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, ToolHostError::SpawnFailed(_)));
    }
}
