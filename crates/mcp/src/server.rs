//! The composed server's JSON-RPC surface and the loops that serve it.

use std::sync::Arc;

use {
    serde_json::{Value, json},
    tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt},
    tokio_util::sync::CancellationToken,
    tracing::{debug, info, trace, warn},
};

use crate::{
    composer::Composer,
    error::{ConnectionError, Error, Result},
    transport::Transport,
    types::{
        InitializeResult, JsonRpcResponse, ListCapability, PROTOCOL_VERSION, ServerCapabilities,
        ServerInfo, ToolsCallParams, ToolsCallResult, error_codes, is_response,
    },
};

/// Answer one inbound JSON-RPC message.
///
/// Notifications and stray responses get no reply.
pub async fn handle_request(composer: &Composer, message: Value) -> Option<Value> {
    let Some(method) = message.get("method").and_then(Value::as_str) else {
        if is_response(&message) {
            trace!("ignoring response sent to the composed server");
            return None;
        }
        let id = message.get("id").cloned().unwrap_or(Value::Null);
        return Some(
            JsonRpcResponse::failure(id, error_codes::INVALID_REQUEST, "Invalid request")
                .into_value(),
        );
    };
    let Some(id) = message.get("id").cloned() else {
        debug!(method, "notification received");
        return None;
    };
    let params = message.get("params").cloned().unwrap_or(Value::Null);

    let mut response = match method {
        "initialize" => initialize(composer),
        "ping" => JsonRpcResponse::success(id.clone(), json!({})),
        "tools/list" => {
            let tools = composer.tool_definitions().await;
            JsonRpcResponse::success(id.clone(), json!({ "tools": tools }))
        },
        "prompts/list" => {
            let prompts = composer.prompt_definitions().await;
            JsonRpcResponse::success(id.clone(), json!({ "prompts": prompts }))
        },
        "resources/list" => {
            let resources = composer.resource_definitions().await;
            JsonRpcResponse::success(id.clone(), json!({ "resources": resources }))
        },
        "tools/call" => return Some(call_tool(composer, id, params).await.into_value()),
        other => JsonRpcResponse::failure(
            id.clone(),
            error_codes::METHOD_NOT_FOUND,
            format!("Method not found: {other}"),
        ),
    };
    response.id = id;
    Some(response.into_value())
}

fn initialize(composer: &Composer) -> JsonRpcResponse {
    let result = InitializeResult {
        protocol_version: PROTOCOL_VERSION.into(),
        capabilities: ServerCapabilities {
            tools: Some(ListCapability::default()),
            resources: Some(ListCapability::default()),
            prompts: Some(ListCapability::default()),
        },
        server_info: ServerInfo {
            name: composer.name().to_string(),
            version: Some(env!("CARGO_PKG_VERSION").to_string()),
        },
    };
    match serde_json::to_value(result) {
        Ok(result) => JsonRpcResponse::success(Value::Null, result),
        Err(e) => JsonRpcResponse::failure(Value::Null, error_codes::INTERNAL_ERROR, e.to_string()),
    }
}

async fn call_tool(composer: &Composer, id: Value, params: Value) -> JsonRpcResponse {
    let params: ToolsCallParams = match serde_json::from_value(params) {
        Ok(params) => params,
        Err(e) => {
            return JsonRpcResponse::failure(
                id,
                error_codes::INVALID_PARAMS,
                format!("Invalid params: {e}"),
            );
        },
    };
    match composer.call_tool(&params.name, params.arguments, None).await {
        Ok(text) => match serde_json::to_value(ToolsCallResult::text(text)) {
            Ok(result) => JsonRpcResponse::success(id, result),
            Err(e) => JsonRpcResponse::failure(id, error_codes::INTERNAL_ERROR, e.to_string()),
        },
        Err(Error::NotFound { name, .. }) => JsonRpcResponse::failure(
            id,
            error_codes::INVALID_PARAMS,
            format!("Unknown tool: {name}"),
        ),
        Err(e) => JsonRpcResponse::failure(id, error_codes::INTERNAL_ERROR, e.to_string()),
    }
}

/// Serve the composer over `transport` until `shutdown` fires or the
/// transport closes. Requests are handled concurrently.
pub async fn serve_transport(
    composer: Arc<Composer>,
    transport: Arc<dyn Transport>,
    shutdown: CancellationToken,
) -> Result<()> {
    transport.connect().await?;
    info!(transport = %transport.name(), kind = transport.kind().as_str(), "serving composed server");

    loop {
        let message = tokio::select! {
            () = shutdown.cancelled() => break,
            message = transport.receive() => message,
        };
        let message = match message {
            Ok(message) => message,
            Err(Error::Connection(ConnectionError::Closed { .. })) => break,
            Err(e) => {
                warn!(transport = %transport.name(), error = %e, "receive failed");
                break;
            },
        };
        let composer = Arc::clone(&composer);
        let transport = Arc::clone(&transport);
        tokio::spawn(async move {
            if let Some(reply) = handle_request(&composer, message).await
                && let Err(e) = transport.send(&reply).await
            {
                warn!(transport = %transport.name(), error = %e, "failed to send reply");
            }
        });
    }

    transport.disconnect().await?;
    info!(transport = %transport.name(), "stopped serving");
    Ok(())
}

/// Serve newline-delimited JSON-RPC read from `reader`, replies to `writer`.
///
/// Used for the composer's own stdin/stdout. Requests are answered in order.
pub async fn serve_lines<R, W>(
    composer: &Composer,
    reader: R,
    mut writer: W,
    shutdown: CancellationToken,
) -> Result<()>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut lines = reader.lines();
    loop {
        let line = tokio::select! {
            () = shutdown.cancelled() => break,
            line = lines.next_line() => line?,
        };
        let Some(line) = line else {
            debug!("input closed");
            break;
        };
        if line.trim().is_empty() {
            continue;
        }
        let reply = match serde_json::from_str::<Value>(&line) {
            Ok(message) => handle_request(composer, message).await,
            Err(e) => {
                warn!(error = %e, "invalid JSON on input");
                Some(
                    JsonRpcResponse::failure(Value::Null, error_codes::PARSE_ERROR, "Parse error")
                        .into_value(),
                )
            },
        };
        if let Some(reply) = reply {
            let mut out = serde_json::to_string(&reply)?;
            out.push('\n');
            writer.write_all(out.as_bytes()).await?;
            writer.flush().await?;
        }
    }
    Ok(())
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {
        super::*,
        crate::{
            composer::ComposerOptions,
            embedded::{EmbeddedRegistry, FnTool, ServerDescriptor},
            types::McpToolDef,
        },
        composer_config::{EmbeddedServerConfig, McpComposerConfig},
        std::collections::HashMap,
    };

    async fn composer() -> Arc<Composer> {
        let registry = EmbeddedRegistry::new().with("calc_pkg", || {
            ServerDescriptor::new()
                .with_tool(FnTool::new(McpToolDef::new("add", "Add"), |args| {
                    let a = args["a"].as_i64().unwrap_or_default();
                    let b = args["b"].as_i64().unwrap_or_default();
                    Ok((a + b).to_string())
                }))
                .with_tool(FnTool::new(McpToolDef::new("fail", "Fails"), |_| {
                    Err(Error::tool_execution("boom"))
                }))
        });
        let composer = Arc::new(
            Composer::new(ComposerOptions {
                name: "unified".into(),
                ..Default::default()
            })
            .with_embedded(registry),
        );
        let mut config = McpComposerConfig::default();
        config.servers.embedded.servers.push(EmbeddedServerConfig {
            name: "calc".into(),
            package: "calc_pkg".into(),
            enabled: true,
            version: None,
            tool_mappings: HashMap::new(),
        });
        composer.compose_from_config(&config).await.unwrap();
        composer
    }

    fn request(id: i64, method: &str, params: Value) -> Value {
        json!({ "jsonrpc": "2.0", "id": id, "method": method, "params": params })
    }

    #[tokio::test]
    async fn initialize_advertises_composed_name() {
        let composer = composer().await;
        let reply = handle_request(&composer, request(1, "initialize", json!({})))
            .await
            .unwrap();
        assert_eq!(reply["id"], 1);
        assert_eq!(reply["result"]["protocolVersion"], PROTOCOL_VERSION);
        assert_eq!(reply["result"]["serverInfo"]["name"], "unified");
    }

    #[tokio::test]
    async fn lists_and_calls_tools() {
        let composer = composer().await;
        let listed = handle_request(&composer, request(2, "tools/list", json!({})))
            .await
            .unwrap();
        let names: Vec<&str> = listed["result"]["tools"]
            .as_array()
            .unwrap()
            .iter()
            .filter_map(|t| t["name"].as_str())
            .collect();
        assert_eq!(names, vec!["add", "fail"]);

        let called = handle_request(
            &composer,
            request(3, "tools/call", json!({ "name": "add", "arguments": { "a": 40, "b": 2 } })),
        )
        .await
        .unwrap();
        assert_eq!(called["id"], 3);
        assert_eq!(called["result"]["content"][0]["text"], "42");
    }

    #[tokio::test]
    async fn tool_failures_become_error_envelopes() {
        let composer = composer().await;
        let failed = handle_request(
            &composer,
            request(4, "tools/call", json!({ "name": "fail", "arguments": {} })),
        )
        .await
        .unwrap();
        assert_eq!(failed["error"]["code"], error_codes::INTERNAL_ERROR);
        assert_eq!(failed["error"]["message"], "boom");

        let unknown = handle_request(
            &composer,
            request(5, "tools/call", json!({ "name": "nope" })),
        )
        .await
        .unwrap();
        assert_eq!(unknown["error"]["code"], error_codes::INVALID_PARAMS);
    }

    #[tokio::test]
    async fn notifications_and_unknown_methods() {
        let composer = composer().await;
        let note = json!({ "jsonrpc": "2.0", "method": "notifications/initialized" });
        assert!(handle_request(&composer, note).await.is_none());

        let reply = handle_request(&composer, request(6, "sampling/create", json!({})))
            .await
            .unwrap();
        assert_eq!(reply["error"]["code"], error_codes::METHOD_NOT_FOUND);

        let ping = handle_request(&composer, request(7, "ping", Value::Null))
            .await
            .unwrap();
        assert_eq!(ping["result"], json!({}));
    }

    #[tokio::test]
    async fn serves_lines_in_order() {
        let composer = composer().await;
        let input = concat!(
            "{\"jsonrpc\":\"2.0\",\"id\":1,\"method\":\"ping\"}\n",
            "not json\n",
            "{\"jsonrpc\":\"2.0\",\"method\":\"notifications/initialized\"}\n",
            "{\"jsonrpc\":\"2.0\",\"id\":2,\"method\":\"tools/call\",\"params\":{\"name\":\"add\",\"arguments\":{\"a\":1,\"b\":1}}}\n",
        );
        let mut output = Vec::new();
        serve_lines(
            &composer,
            input.as_bytes(),
            &mut output,
            CancellationToken::new(),
        )
        .await
        .unwrap();

        let replies: Vec<Value> = String::from_utf8(output)
            .unwrap()
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(replies.len(), 3);
        assert_eq!(replies[0]["id"], 1);
        assert_eq!(replies[1]["error"]["code"], error_codes::PARSE_ERROR);
        assert_eq!(replies[2]["result"]["content"][0]["text"], "2");
    }
}
