//! MCP discovery against proxied servers and call forwarding to them.

use std::{sync::Arc, time::Duration};

use {
    serde_json::{Value, json},
    tracing::{debug, info, warn},
};

#[cfg(feature = "metrics")]
use composer_metrics::{counter, discovery as discovery_metrics, labels};

use crate::{
    error::{ConnectionError, Error, Result},
    process::SharedProcess,
    rpc::{RpcChannel, RpcEndpoint},
    types::{InitializeParams, McpToolDef, ToolsListResult},
};

/// Default per-request timeout for discovery and tool calls.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

/// One tool offered by a proxied server, bound to the endpoint that serves it.
#[derive(Clone)]
pub struct ProxiedTool {
    pub server_name: String,
    pub definition: McpToolDef,
    endpoint: Arc<dyn RpcEndpoint>,
    timeout: Duration,
}

impl std::fmt::Debug for ProxiedTool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProxiedTool")
            .field("server_name", &self.server_name)
            .field("tool_name", &self.definition.name)
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl ProxiedTool {
    pub fn tool_name(&self) -> &str {
        &self.definition.name
    }

    /// Forward a `tools/call` and unwrap the MCP content envelope.
    pub async fn invoke(&self, arguments: Value) -> Result<String> {
        let params = json!({ "name": self.definition.name, "arguments": arguments });
        let response = self
            .endpoint
            .request("tools/call", Some(params), self.timeout)
            .await
            .map_err(|e| match e {
                Error::Connection(ConnectionError::Timeout { .. }) => {
                    Error::tool_execution("No response from tool execution")
                },
                other => other,
            })?;

        if let Some(error) = response.error {
            return Err(Error::tool_execution(format!(
                "Tool execution error: {}",
                error.message
            )));
        }
        match response.result {
            Some(result) => Ok(unwrap_content(&result)),
            None => Err(Error::tool_execution("No response from tool execution")),
        }
    }
}

/// MCP content unwrapping: the first content item's `text`, else that item
/// as JSON; results without a non-empty `content` array are returned as JSON.
pub fn unwrap_content(result: &Value) -> String {
    if let Some(first) = result
        .get("content")
        .and_then(Value::as_array)
        .and_then(|items| items.first())
    {
        return match first.get("text").and_then(Value::as_str) {
            Some(text) => text.to_string(),
            None => first.to_string(),
        };
    }
    match result.get("content") {
        Some(content @ Value::Array(_)) => content.to_string(),
        _ => result.to_string(),
    }
}

/// Runs the `initialize` → `notifications/initialized` → `tools/list` handshake.
#[derive(Debug, Clone)]
pub struct ToolProxy {
    timeout: Duration,
    log_stderr: bool,
}

impl Default for ToolProxy {
    fn default() -> Self {
        Self::new(DEFAULT_REQUEST_TIMEOUT)
    }
}

impl ToolProxy {
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            log_stderr: true,
        }
    }

    #[must_use]
    pub fn with_stderr_logging(mut self, log_stderr: bool) -> Self {
        self.log_stderr = log_stderr;
        self
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Take over a running process's pipes and discover its tools.
    ///
    /// Returns the channel bound to the process together with the tools; the
    /// caller keeps the channel to close it when the process goes away.
    pub async fn discover_tools(
        &self,
        server_name: &str,
        process: &SharedProcess,
    ) -> Result<(Arc<RpcChannel>, Vec<ProxiedTool>)> {
        let pipes = process.lock().await.take_pipes().ok_or_else(|| {
            Error::discovery(server_name, "process is not running or its pipes are taken")
        })?;
        let channel = RpcChannel::spawn(server_name, pipes, self.log_stderr);
        let endpoint: Arc<dyn RpcEndpoint> = channel.clone();
        match self.discover_over(server_name, endpoint).await {
            Ok(tools) => Ok((channel, tools)),
            Err(e) => {
                channel.close().await;
                Err(e)
            },
        }
    }

    /// Discover tools over any endpoint (a child channel or an HTTP translator).
    pub async fn discover_over(
        &self,
        server_name: &str,
        endpoint: Arc<dyn RpcEndpoint>,
    ) -> Result<Vec<ProxiedTool>> {
        #[cfg(feature = "metrics")]
        counter!(discovery_metrics::RUNS_TOTAL, labels::SERVER => server_name.to_string()).increment(1);

        let result = self.handshake(server_name, &endpoint).await;
        if let Err(e) = &result {
            warn!(server = %server_name, error = %e, "tool discovery failed");
            #[cfg(feature = "metrics")]
            counter!(discovery_metrics::FAILURES_TOTAL, labels::SERVER => server_name.to_string())
                .increment(1);
        }
        let defs = result?;

        info!(server = %server_name, count = defs.len(), "discovered tools");
        Ok(defs
            .into_iter()
            .map(|definition| ProxiedTool {
                server_name: server_name.to_string(),
                definition,
                endpoint: Arc::clone(&endpoint),
                timeout: self.timeout,
            })
            .collect())
    }

    async fn handshake(
        &self,
        server_name: &str,
        endpoint: &Arc<dyn RpcEndpoint>,
    ) -> Result<Vec<McpToolDef>> {
        let params = serde_json::to_value(InitializeParams::default())?;
        let init = endpoint
            .request("initialize", Some(params), self.timeout)
            .await?;
        if let Some(error) = init.error {
            return Err(Error::discovery(
                server_name,
                format!("initialize failed: {}", error.message),
            ));
        }
        if let Some(info) = init.result.as_ref().and_then(|r| r.get("serverInfo")) {
            debug!(server = %server_name, server_info = %info, "MCP server initialized");
        }

        endpoint.notify("notifications/initialized", None).await?;

        let listed = endpoint
            .request("tools/list", Some(json!({})), self.timeout)
            .await?;
        if let Some(error) = listed.error {
            return Err(Error::discovery(
                server_name,
                format!("tools/list failed: {}", error.message),
            ));
        }
        let result = listed
            .result
            .ok_or_else(|| Error::discovery(server_name, "tools/list returned no result"))?;
        let list: ToolsListResult = serde_json::from_value(result)?;
        Ok(list.tools)
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {super::*, crate::types::JsonRpcResponse, async_trait::async_trait, std::sync::Mutex};

    /// Endpoint that answers from a fixed script and records what it saw.
    #[derive(Default)]
    struct ScriptedEndpoint {
        responses: Mutex<Vec<Option<Value>>>,
        seen: Mutex<Vec<String>>,
    }

    impl ScriptedEndpoint {
        fn answering(responses: Vec<Option<Value>>) -> Arc<Self> {
            let mut responses = responses;
            responses.reverse();
            Arc::new(Self {
                responses: Mutex::new(responses),
                seen: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl RpcEndpoint for ScriptedEndpoint {
        async fn request(
            &self,
            method: &str,
            _params: Option<Value>,
            timeout: Duration,
        ) -> Result<JsonRpcResponse> {
            self.seen.lock().unwrap().push(method.to_string());
            match self.responses.lock().unwrap().pop().flatten() {
                Some(value) => Ok(serde_json::from_value(value)?),
                None => Err(ConnectionError::Timeout {
                    method: method.to_string(),
                    timeout,
                }
                .into()),
            }
        }

        async fn notify(&self, method: &str, _params: Option<Value>) -> Result<()> {
            self.seen.lock().unwrap().push(method.to_string());
            Ok(())
        }

        async fn is_alive(&self) -> bool {
            true
        }
    }

    fn ok(result: Value) -> Option<Value> {
        Some(json!({"jsonrpc": "2.0", "id": 1, "result": result}))
    }

    fn tool(endpoint: Arc<ScriptedEndpoint>) -> ProxiedTool {
        ProxiedTool {
            server_name: "calc".into(),
            definition: McpToolDef::new("add", "Add numbers"),
            endpoint,
            timeout: Duration::from_millis(50),
        }
    }

    #[test]
    fn unwrap_first_text() {
        assert_eq!(unwrap_content(&json!({"content": [{"text": "42"}]})), "42");
        assert_eq!(
            unwrap_content(&json!({"content": [{"type": "text", "text": "a"}, {"text": "b"}]})),
            "a"
        );
    }

    #[test]
    fn unwrap_fallbacks() {
        assert_eq!(unwrap_content(&json!({"content": []})), "[]");
        assert_eq!(
            unwrap_content(&json!({"content": [{"type": "image", "data": "x"}]})),
            r#"{"data":"x","type":"image"}"#
        );
        assert_eq!(unwrap_content(&json!({"value": 3})), r#"{"value":3}"#);
    }

    #[tokio::test]
    async fn handshake_order_and_tools() {
        let endpoint = ScriptedEndpoint::answering(vec![
            ok(json!({"serverInfo": {"name": "calc"}})),
            ok(json!({"tools": [{"name": "add", "description": "Add", "inputSchema": {"type": "object"}}]})),
        ]);
        let tools = ToolProxy::default()
            .discover_over("calc", endpoint.clone())
            .await
            .unwrap();
        assert_eq!(tools.len(), 1);
        assert_eq!(tools[0].tool_name(), "add");
        assert_eq!(tools[0].server_name, "calc");
        assert_eq!(*endpoint.seen.lock().unwrap(), vec![
            "initialize",
            "notifications/initialized",
            "tools/list"
        ]);
    }

    #[tokio::test]
    async fn initialize_error_aborts_discovery() {
        let endpoint = ScriptedEndpoint::answering(vec![Some(
            json!({"jsonrpc": "2.0", "id": 1, "error": {"code": -32603, "message": "nope"}}),
        )]);
        let err = ToolProxy::default()
            .discover_over("calc", endpoint.clone())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Discovery { .. }));
        assert_eq!(*endpoint.seen.lock().unwrap(), vec!["initialize"]);
    }

    #[tokio::test]
    async fn initialize_silence_aborts_discovery() {
        let endpoint = ScriptedEndpoint::answering(vec![None]);
        let err = ToolProxy::default()
            .discover_over("calc", endpoint)
            .await
            .unwrap_err();
        assert!(err.is_connection());
    }

    #[tokio::test]
    async fn invoke_unwraps_text() {
        let endpoint = ScriptedEndpoint::answering(vec![ok(json!({"content": [{"text": "42"}]}))]);
        assert_eq!(tool(endpoint).invoke(json!({"a": 40, "b": 2})).await.unwrap(), "42");
    }

    #[tokio::test]
    async fn invoke_surfaces_error_envelope() {
        let endpoint = ScriptedEndpoint::answering(vec![Some(
            json!({"jsonrpc": "2.0", "id": 1, "error": {"code": -1, "message": "division by zero"}}),
        )]);
        let err = tool(endpoint).invoke(json!({})).await.unwrap_err();
        assert_eq!(err.to_string(), "Tool execution error: division by zero");
    }

    #[tokio::test]
    async fn invoke_without_answer() {
        let endpoint = ScriptedEndpoint::answering(vec![None]);
        let err = tool(endpoint).invoke(json!({})).await.unwrap_err();
        assert_eq!(err.to_string(), "No response from tool execution");
    }
}
