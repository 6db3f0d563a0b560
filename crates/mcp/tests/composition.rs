#![allow(clippy::unwrap_used, clippy::expect_used)]
#![cfg(unix)]

use std::{sync::Arc, time::Duration};

use {
    composer_config::{
        ConflictResolution, McpComposerConfig, RestartPolicy, SseProxiedServerConfig,
        StdioProxiedServerConfig,
    },
    composer_mcp::Composer,
    mockito::Matcher,
    serde_json::json,
};

/// A line-oriented MCP server in plain `sh`: answers initialize, tools/list,
/// tools/call and ping, echoing the request id back.
const FAKE_SERVER: &str = r#"
while IFS= read -r line; do
  id=$(printf '%s' "$line" | sed -n 's/.*"id":\([0-9]*\).*/\1/p')
  case "$line" in
    *'"method":"initialize"'*)
      printf '{"jsonrpc":"2.0","id":%s,"result":{"protocolVersion":"2024-11-05","capabilities":{"tools":{}},"serverInfo":{"name":"fake"}}}\n' "$id" ;;
    *'"method":"tools/list"'*)
      printf '{"jsonrpc":"2.0","id":%s,"result":{"tools":[{"name":"add","description":"Add two numbers","inputSchema":{"type":"object"}}]}}\n' "$id" ;;
    *'"method":"tools/call"'*)
      printf '{"jsonrpc":"2.0","id":%s,"result":{"content":[{"type":"text","text":"42"}]}}\n' "$id" ;;
    *'"method":"ping"'*)
      printf '{"jsonrpc":"2.0","id":%s,"result":{}}\n' "$id" ;;
  esac
done
"#;

fn stdio_server(name: &str) -> StdioProxiedServerConfig {
    let mut cfg = StdioProxiedServerConfig::new(name, vec![
        "sh".into(),
        "-c".into(),
        FAKE_SERVER.into(),
    ]);
    cfg.restart_policy = RestartPolicy::Never;
    cfg.restart_delay = 0;
    cfg
}

fn config_with(stdio: Vec<StdioProxiedServerConfig>) -> McpComposerConfig {
    let mut config = McpComposerConfig::default();
    config.composer.conflict_resolution = ConflictResolution::Prefix;
    config.servers.proxied.stdio = stdio;
    config
}

async fn compose(config: &McpComposerConfig) -> Arc<Composer> {
    let composer = Arc::new(Composer::from_config(config));
    let summary = composer.compose_from_config(config).await.unwrap();
    assert!(summary.errors.is_empty(), "errors: {:?}", summary.errors);
    composer
}

// ── Proxied STDIO ──────────────────────────────────────────────────────────

#[tokio::test]
async fn proxied_stdio_tools_are_discovered_and_callable() {
    let config = config_with(vec![stdio_server("calc")]);
    let composer = compose(&config).await;

    assert_eq!(composer.list_tools().await, vec!["add"]);
    assert_eq!(composer.get_tool_source("add").await.as_deref(), Some("calc"));

    let out = composer
        .call_tool("add", json!({ "a": 40, "b": 2 }), None)
        .await
        .unwrap();
    assert_eq!(out, "42");

    let info = composer.get_proxied_servers_info().await;
    assert!(info["calc"].pid.is_some());

    composer.stop().await;
    assert!(composer.call_tool("add", json!({}), None).await.is_err());
}

#[tokio::test]
async fn same_tool_from_two_servers_is_prefixed() {
    let config = config_with(vec![stdio_server("alpha"), stdio_server("beta")]);
    let composer = compose(&config).await;

    assert_eq!(composer.list_tools().await, vec!["add", "beta_add"]);
    assert_eq!(composer.get_tool_source("beta_add").await.as_deref(), Some("beta"));

    let summary = composer.get_composition_summary().await;
    assert_eq!(summary.conflicts_resolved, 1);
    assert_eq!(summary.source_servers, 2);

    let out = composer.call_tool("beta_add", json!({}), None).await.unwrap();
    assert_eq!(out, "42");
    composer.stop().await;
}

#[tokio::test]
async fn failed_discovery_is_recorded_not_raised() {
    let mut broken = StdioProxiedServerConfig::new("broken", vec![
        "sh".into(),
        "-c".into(),
        "exit 3".into(),
    ]);
    broken.restart_policy = RestartPolicy::Never;
    let config = config_with(vec![broken, stdio_server("calc")]);

    let composer = Arc::new(Composer::from_config(&config));
    let summary = composer.compose_from_config(&config).await.unwrap();

    assert_eq!(summary.errors.len(), 1);
    assert!(summary.errors[0].contains("'broken'"));
    assert_eq!(composer.list_tools().await, vec!["add"]);
    composer.stop().await;
}

#[tokio::test]
async fn manual_restart_rebinds_tools() {
    let config = config_with(vec![stdio_server("calc")]);
    let composer = compose(&config).await;
    let before = composer.get_proxied_servers_info().await["calc"].pid;

    composer.restart_proxied_server("calc").await.unwrap();

    let after = composer.get_proxied_servers_info().await["calc"].pid;
    assert!(after.is_some());
    assert_ne!(before, after);
    assert_eq!(composer.list_tools().await, vec!["add"]);
    let out = composer.call_tool("add", json!({}), None).await.unwrap();
    assert_eq!(out, "42");
    composer.stop().await;
}

#[tokio::test]
async fn killed_server_is_restarted_and_rediscovered() {
    let mut server = stdio_server("calc");
    server.restart_policy = RestartPolicy::Always;
    let config = config_with(vec![server]);
    let composer = compose(&config).await;
    let before = composer.get_proxied_servers_info().await["calc"]
        .pid
        .unwrap();

    let status = std::process::Command::new("kill")
        .args(["-9", &before.to_string()])
        .status()
        .unwrap();
    assert!(status.success());

    let mut recovered = false;
    for _ in 0..75 {
        tokio::time::sleep(Duration::from_millis(200)).await;
        let info = composer.get_proxied_servers_info().await;
        let restarted = info["calc"].pid.is_some_and(|pid| pid != before);
        if restarted
            && let Ok(out) = composer.call_tool("add", json!({}), None).await
        {
            assert_eq!(out, "42");
            recovered = true;
            break;
        }
    }
    assert!(recovered, "server was not restarted and rediscovered in time");
    assert!(composer.get_proxied_servers_info().await["calc"].restart_count >= 1);
    composer.stop().await;
}

// ── Proxied SSE ────────────────────────────────────────────────────────────

#[tokio::test]
async fn proxied_sse_server_is_composed_over_http() {
    let mut remote = mockito::Server::new_async().await;
    let init = remote
        .mock("POST", "/mcp")
        .match_body(Matcher::Regex(r#""method":"initialize""#.into()))
        .with_header("content-type", "application/json")
        .with_body(
            json!({
                "jsonrpc": "2.0",
                "id": 1,
                "result": {
                    "protocolVersion": "2024-11-05",
                    "capabilities": {},
                    "serverInfo": { "name": "remote" }
                }
            })
            .to_string(),
        )
        .create_async()
        .await;
    let list = remote
        .mock("POST", "/mcp")
        .match_body(Matcher::Regex(r#""method":"tools/list""#.into()))
        .with_header("content-type", "application/json")
        .with_body(
            json!({
                "jsonrpc": "2.0",
                "id": 2,
                "result": { "tools": [{ "name": "search", "inputSchema": { "type": "object" } }] }
            })
            .to_string(),
        )
        .create_async()
        .await;
    let call = remote
        .mock("POST", "/mcp")
        .match_body(Matcher::Regex(r#""method":"tools/call""#.into()))
        .with_header("content-type", "text/event-stream")
        .with_body(format!(
            "event: message\ndata: {}\n\n",
            json!({
                "jsonrpc": "2.0",
                "id": 3,
                "result": { "content": [{ "type": "text", "text": "found it" }] }
            })
        ))
        .create_async()
        .await;

    let mut config = McpComposerConfig::default();
    config
        .servers
        .proxied
        .sse
        .push(SseProxiedServerConfig::new("web", format!("{}/mcp", remote.url())));
    let composer = compose(&config).await;

    assert_eq!(composer.list_tools().await, vec!["search"]);
    assert_eq!(composer.get_tool_source("search").await.as_deref(), Some("web"));
    assert_eq!(composer.translators().len().await, 1);

    let out = composer
        .call_tool("search", json!({ "q": "rust" }), None)
        .await
        .unwrap();
    assert_eq!(out, "found it");

    init.assert_async().await;
    list.assert_async().await;
    call.assert_async().await;
    composer.stop().await;
}

#[tokio::test]
async fn unreachable_sse_server_is_recorded() {
    let mut config = McpComposerConfig::default();
    let mut cfg = SseProxiedServerConfig::new("gone", "http://127.0.0.1:1/mcp");
    cfg.timeout = 2;
    config.servers.proxied.sse.push(cfg);

    let composer = Arc::new(Composer::from_config(&config));
    let summary = composer.compose_from_config(&config).await.unwrap();

    assert_eq!(summary.total_tools, 0);
    assert_eq!(summary.errors.len(), 1);
    assert!(summary.errors[0].contains("'gone'"));
    composer.stop().await;
}
