//! Protocol translators between STDIO and SSE/HTTP JSON-RPC.
//!
//! `translate` never fails: every transport or internal problem comes back
//! as a JSON-RPC error object (`-32000` transport/timeout, `-32603` internal).

use std::{
    collections::HashMap,
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
    time::{Duration, Instant},
};

use {
    async_trait::async_trait,
    composer_config::SseProxiedServerConfig,
    reqwest::header::{ACCEPT, CONTENT_TYPE, HeaderMap, HeaderName, HeaderValue},
    serde::Serialize,
    serde_json::Value,
    tokio::{
        io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt},
        sync::{Mutex, RwLock},
    },
    tracing::{debug, info, warn},
};

#[cfg(feature = "metrics")]
use composer_metrics::{counter, histogram, labels, translator as translator_metrics};

use crate::{
    error::{ConnectionError, Context, Error, Result},
    process::{DEFAULT_STOP_GRACE, Process, ProcessSpec, SharedProcess},
    rpc::{RpcChannel, RpcEndpoint},
    types::{JsonRpcNotification, JsonRpcResponse, error_codes, error_response},
};

const STREAMABLE_ACCEPT_HEADER: &str = "application/json, text/event-stream";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TranslationDirection {
    StdioToSse,
    SseToStdio,
}

impl TranslationDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::StdioToSse => "stdio_to_sse",
            Self::SseToStdio => "sse_to_stdio",
        }
    }
}

#[async_trait]
pub trait ProtocolTranslator: Send + Sync {
    fn name(&self) -> &str;

    fn direction(&self) -> TranslationDirection;

    async fn start(&self) -> Result<()>;

    async fn stop(&self) -> Result<()>;

    /// Relay one JSON-RPC message and return the peer's answer.
    async fn translate(&self, request: Value) -> Value;

    fn is_running(&self) -> bool;
}

/// Serializable status row for listings.
#[derive(Debug, Clone, Serialize)]
pub struct TranslatorInfo {
    pub name: String,
    pub direction: TranslationDirection,
    pub running: bool,
}

enum Failure {
    Http(String),
    Internal(String),
}

// ── STDIO → SSE ─────────────────────────────────────────────────────

/// Forwards each request as an HTTP POST to a remote JSON-RPC endpoint.
pub struct StdioToSseTranslator {
    name: String,
    url: String,
    client: reqwest::Client,
    headers: HeaderMap,
    timeout: Duration,
    running: AtomicBool,
    next_id: AtomicU64,
}

impl StdioToSseTranslator {
    pub fn new(
        name: impl Into<String>,
        url: impl Into<String>,
        headers: &HashMap<String, String>,
        timeout: Duration,
    ) -> Result<Self> {
        let mut header_map = HeaderMap::new();
        for (key, value) in headers {
            let name = HeaderName::from_bytes(key.as_bytes()).map_err(|e| Error::Configuration {
                message: format!("invalid header name '{key}': {e}"),
            })?;
            let value = HeaderValue::from_str(value).map_err(|e| Error::Configuration {
                message: format!("invalid value for header '{key}': {e}"),
            })?;
            header_map.insert(name, value);
        }
        let client = reqwest::Client::builder().build()?;

        Ok(Self {
            name: name.into(),
            url: url.into(),
            client,
            headers: header_map,
            timeout,
            running: AtomicBool::new(false),
            next_id: AtomicU64::new(1),
        })
    }

    /// Translator for a configured SSE server, carrying its auth header.
    pub fn from_config(cfg: &SseProxiedServerConfig) -> Result<Self> {
        let headers: HashMap<String, String> = cfg.auth_header().into_iter().collect();
        Self::new(
            cfg.name.clone(),
            cfg.url.clone(),
            &headers,
            Duration::from_secs(cfg.timeout),
        )
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    async fn post(&self, request: &Value) -> std::result::Result<Value, Failure> {
        let resp = self
            .client
            .post(&self.url)
            .headers(self.headers.clone())
            .timeout(self.timeout)
            .header(CONTENT_TYPE, "application/json")
            .header(ACCEPT, STREAMABLE_ACCEPT_HEADER)
            .json(request)
            .send()
            .await
            .map_err(|e| Failure::Http(e.to_string()))?
            .error_for_status()
            .map_err(|e| Failure::Http(e.to_string()))?;

        if is_event_stream(&resp) {
            let body = resp.text().await.map_err(|e| Failure::Http(e.to_string()))?;
            return parse_event_stream(&body).ok_or_else(|| {
                Failure::Internal("no JSON-RPC response in event stream".into())
            });
        }

        resp.json::<Value>().await.map_err(|e| {
            if e.is_decode() {
                Failure::Internal(e.to_string())
            } else {
                Failure::Http(e.to_string())
            }
        })
    }

    /// Serve line-framed JSON-RPC from `reader`, writing one answer line per
    /// request to `writer`. Notifications are forwarded without an answer.
    /// Returns when `reader` reaches EOF or the translator is stopped.
    pub async fn pump<R, W>(&self, reader: R, mut writer: W) -> Result<()>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let mut lines = reader.lines();
        while self.is_running() {
            let Some(line) = lines.next_line().await? else {
                break;
            };
            if line.trim().is_empty() {
                continue;
            }
            let request: Value = match serde_json::from_str(&line) {
                Ok(request) => request,
                Err(e) => {
                    warn!(translator = %self.name, error = %e, "invalid JSON on input, skipping");
                    continue;
                },
            };
            let expects_answer = request.get("id").is_some();
            let response = self.translate(request).await;
            if !expects_answer {
                continue;
            }
            let mut out = serde_json::to_string(&response)?;
            out.push('\n');
            writer.write_all(out.as_bytes()).await?;
            writer.flush().await?;
        }
        Ok(())
    }
}

#[async_trait]
impl ProtocolTranslator for StdioToSseTranslator {
    fn name(&self) -> &str {
        &self.name
    }

    fn direction(&self) -> TranslationDirection {
        TranslationDirection::StdioToSse
    }

    async fn start(&self) -> Result<()> {
        self.running.store(true, Ordering::SeqCst);
        info!(translator = %self.name, url = %self.url, "STDIO→SSE translator started");
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        if self.running.swap(false, Ordering::SeqCst) {
            info!(translator = %self.name, "STDIO→SSE translator stopped");
        }
        Ok(())
    }

    async fn translate(&self, request: Value) -> Value {
        let id = request.get("id").cloned().unwrap_or(Value::Null);
        let started = Instant::now();
        let response = match self.post(&request).await {
            Ok(response) => response,
            Err(Failure::Http(message)) => {
                warn!(translator = %self.name, url = %self.url, error = %message, "HTTP error sending to SSE server");
                record_error(self.direction(), "http");
                error_response(id, error_codes::SERVER_ERROR, format!("HTTP error: {message}"))
            },
            Err(Failure::Internal(message)) => {
                warn!(translator = %self.name, url = %self.url, error = %message, "error handling SSE server response");
                record_error(self.direction(), "internal");
                error_response(
                    id,
                    error_codes::INTERNAL_ERROR,
                    format!("Internal error: {message}"),
                )
            },
        };
        record_translation(self.direction(), started);
        response
    }

    fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RpcEndpoint for StdioToSseTranslator {
    async fn request(
        &self,
        method: &str,
        params: Option<Value>,
        timeout: Duration,
    ) -> Result<JsonRpcResponse> {
        let mut request = serde_json::json!({
            "jsonrpc": "2.0",
            "id": self.next_id.fetch_add(1, Ordering::SeqCst),
            "method": method,
        });
        if let Some(params) = params {
            request["params"] = params;
        }
        match tokio::time::timeout(timeout, self.post(&request)).await {
            Ok(Ok(response)) => Ok(serde_json::from_value(response)?),
            Ok(Err(Failure::Http(message))) => Err(ConnectionError::Http { message }.into()),
            Ok(Err(Failure::Internal(message))) => Err(Error::message(message)),
            Err(_) => Err(ConnectionError::Timeout {
                method: method.to_string(),
                timeout,
            }
            .into()),
        }
    }

    async fn notify(&self, method: &str, params: Option<Value>) -> Result<()> {
        let notification = serde_json::to_value(JsonRpcNotification::new(method, params))?;
        let _ = self.post(&notification).await;
        Ok(())
    }

    async fn is_alive(&self) -> bool {
        self.is_running()
    }
}

fn is_event_stream(resp: &reqwest::Response) -> bool {
    resp.headers()
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .and_then(|ct| ct.split(';').next())
        .is_some_and(|base| base.trim() == "text/event-stream")
}

/// First `data:` payload in an event stream that parses as a JSON-RPC response.
fn parse_event_stream(body: &str) -> Option<Value> {
    let mut data = String::new();
    for line in body.lines() {
        let trimmed = line.trim_end();
        if let Some(rest) = trimmed.strip_prefix("data:") {
            if !data.is_empty() {
                data.push('\n');
            }
            data.push_str(rest.trim_start());
            continue;
        }
        if trimmed.is_empty()
            && !data.is_empty()
            && let Some(resp) = take_response(&mut data)
        {
            return Some(resp);
        }
    }
    take_response(&mut data)
}

fn take_response(data: &mut String) -> Option<Value> {
    let parsed = serde_json::from_str::<Value>(data)
        .ok()
        .filter(crate::types::is_response);
    data.clear();
    parsed
}

// ── SSE → STDIO ─────────────────────────────────────────────────────

/// Forwards requests into a local STDIO child, correlating answers by id.
pub struct SseToStdioTranslator {
    name: String,
    process: SharedProcess,
    timeout: Duration,
    channel: RwLock<Option<Arc<RpcChannel>>>,
    running: AtomicBool,
}

impl SseToStdioTranslator {
    pub fn new(spec: ProcessSpec, timeout: Duration) -> Self {
        Self {
            name: spec.name.clone(),
            process: Process::shared(spec),
            timeout,
            channel: RwLock::new(None),
            running: AtomicBool::new(false),
        }
    }

    pub async fn pid(&self) -> Option<u32> {
        self.process.lock().await.pid()
    }
}

#[async_trait]
impl ProtocolTranslator for SseToStdioTranslator {
    fn name(&self) -> &str {
        &self.name
    }

    fn direction(&self) -> TranslationDirection {
        TranslationDirection::SseToStdio
    }

    async fn start(&self) -> Result<()> {
        let mut channel = self.channel.write().await;
        if channel.is_some() {
            return Ok(());
        }
        let pipes = {
            let mut process = self.process.lock().await;
            process.start()?;
            process
                .take_pipes()
                .with_context(|| format!("no pipes for process {}", self.name))?
        };
        *channel = Some(RpcChannel::spawn(self.name.clone(), pipes, true));
        self.running.store(true, Ordering::SeqCst);
        let pid = self.pid().await;
        info!(translator = %self.name, pid = ?pid, "SSE→STDIO translator started");
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        self.running.store(false, Ordering::SeqCst);
        if let Some(channel) = self.channel.write().await.take() {
            channel.close().await;
        }
        let mut process = self.process.lock().await;
        if process.is_running() {
            process.stop(DEFAULT_STOP_GRACE).await?;
            info!(translator = %self.name, "SSE→STDIO translator stopped");
        }
        Ok(())
    }

    async fn translate(&self, request: Value) -> Value {
        let id = request.get("id").cloned().unwrap_or(Value::Null);
        let Some(channel) = self.channel.read().await.clone() else {
            return error_response(
                id,
                error_codes::INTERNAL_ERROR,
                "Internal error: translator not started",
            );
        };

        let started = Instant::now();
        let response = match channel.forward(request, self.timeout).await {
            Ok(response) => response,
            Err(Error::Connection(ConnectionError::Timeout { .. })) => {
                warn!(translator = %self.name, timeout = ?self.timeout, "request to STDIO server timed out");
                record_error(self.direction(), "timeout");
                error_response(id, error_codes::SERVER_ERROR, "Request timeout")
            },
            Err(e) => {
                warn!(translator = %self.name, error = %e, "failed to relay request to STDIO server");
                record_error(self.direction(), "internal");
                error_response(id, error_codes::INTERNAL_ERROR, format!("Internal error: {e}"))
            },
        };
        record_translation(self.direction(), started);
        response
    }

    fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

// ── Manager ─────────────────────────────────────────────────────────

/// Named collection of translators of either direction.
#[derive(Default)]
pub struct TranslatorManager {
    translators: Mutex<HashMap<String, Arc<dyn ProtocolTranslator>>>,
}

impl TranslatorManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn add_stdio_to_sse(
        &self,
        name: &str,
        url: &str,
        headers: &HashMap<String, String>,
        timeout: Duration,
    ) -> Result<Arc<StdioToSseTranslator>> {
        let translator = Arc::new(StdioToSseTranslator::new(name, url, headers, timeout)?);
        self.register(name, translator.clone()).await?;
        Ok(translator)
    }

    pub async fn add_sse_to_stdio(
        &self,
        spec: ProcessSpec,
        timeout: Duration,
    ) -> Result<Arc<SseToStdioTranslator>> {
        let name = spec.name.clone();
        let translator = Arc::new(SseToStdioTranslator::new(spec, timeout));
        self.register(&name, translator.clone()).await?;
        Ok(translator)
    }

    /// Start `translator` and register it under `name`.
    pub async fn register(
        &self,
        name: &str,
        translator: Arc<dyn ProtocolTranslator>,
    ) -> Result<()> {
        let mut translators = self.translators.lock().await;
        if translators.contains_key(name) {
            return Err(Error::message(format!("translator {name} already exists")));
        }
        translator.start().await?;
        translators.insert(name.to_string(), translator);
        debug!(translator = %name, "translator registered");
        Ok(())
    }

    /// Stop and deregister. Unknown names are ignored.
    pub async fn remove_translator(&self, name: &str) -> Result<()> {
        let removed = self.translators.lock().await.remove(name);
        if let Some(translator) = removed {
            translator.stop().await?;
        }
        Ok(())
    }

    pub async fn get_translator(&self, name: &str) -> Option<Arc<dyn ProtocolTranslator>> {
        self.translators.lock().await.get(name).cloned()
    }

    pub async fn list_translators(&self) -> Vec<TranslatorInfo> {
        let mut out: Vec<TranslatorInfo> = self
            .translators
            .lock()
            .await
            .iter()
            .map(|(name, t)| TranslatorInfo {
                name: name.clone(),
                direction: t.direction(),
                running: t.is_running(),
            })
            .collect();
        out.sort_by(|a, b| a.name.cmp(&b.name));
        out
    }

    pub async fn len(&self) -> usize {
        self.translators.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.translators.lock().await.is_empty()
    }

    /// Stop and drop every translator; failures are logged and do not stop the sweep.
    pub async fn stop_all(&self) {
        let drained: Vec<_> = self.translators.lock().await.drain().collect();
        for (name, translator) in drained {
            if let Err(e) = translator.stop().await {
                warn!(translator = %name, error = %e, "failed to stop translator");
            }
        }
    }
}

#[cfg(feature = "metrics")]
fn record_translation(direction: TranslationDirection, started: Instant) {
    counter!(translator_metrics::TRANSLATIONS_TOTAL, labels::DIRECTION => direction.as_str())
        .increment(1);
    histogram!(translator_metrics::DURATION_SECONDS, labels::DIRECTION => direction.as_str())
        .record(started.elapsed().as_secs_f64());
}

#[cfg(not(feature = "metrics"))]
fn record_translation(_direction: TranslationDirection, _started: Instant) {}

#[cfg(feature = "metrics")]
fn record_error(direction: TranslationDirection, error_type: &'static str) {
    counter!(
        translator_metrics::ERRORS_TOTAL,
        labels::DIRECTION => direction.as_str(),
        labels::ERROR_TYPE => error_type
    )
    .increment(1);
}

#[cfg(not(feature = "metrics"))]
fn record_error(_direction: TranslationDirection, _error_type: &'static str) {}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {super::*, serde_json::json};

    fn translator(url: &str) -> StdioToSseTranslator {
        StdioToSseTranslator::new("remote", url, &HashMap::new(), Duration::from_secs(2)).unwrap()
    }

    #[test]
    fn event_stream_takes_first_response() {
        let body = "event: message\ndata: {\"jsonrpc\":\"2.0\",\"method\":\"note\"}\n\n\
                    data: {\"jsonrpc\":\"2.0\",\"id\":1,\"result\":{\"ok\":true}}\n\n";
        let parsed = parse_event_stream(body).unwrap();
        assert_eq!(parsed["result"]["ok"], true);
    }

    #[test]
    fn event_stream_without_trailing_blank_line() {
        let body = "data: {\"jsonrpc\":\"2.0\",\"id\":2,\"result\":1}";
        assert_eq!(parse_event_stream(body).unwrap()["id"], 2);
        assert!(parse_event_stream("data: nope\n\n").is_none());
    }

    #[test]
    fn invalid_header_is_a_configuration_error() {
        let headers = HashMap::from([("bad header".to_string(), "x".to_string())]);
        let err =
            StdioToSseTranslator::new("r", "http://localhost", &headers, Duration::from_secs(1))
                .err()
                .unwrap();
        assert!(matches!(err, Error::Configuration { .. }));
    }

    #[tokio::test]
    async fn unreachable_url_yields_http_error() {
        // Port 9 (discard) is closed on any sane test host.
        let t = translator("http://127.0.0.1:9/mcp");
        let resp = t
            .translate(json!({"jsonrpc": "2.0", "id": 5, "method": "tools/list"}))
            .await;
        assert_eq!(resp["id"], 5);
        assert_eq!(resp["error"]["code"], -32000);
        assert!(resp["error"]["message"].as_str().unwrap().contains("HTTP error"));
    }

    #[tokio::test]
    async fn silent_server_is_cut_off_at_the_request_timeout() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let _hold = tokio::spawn(async move {
            let mut accepted = Vec::new();
            while let Ok((socket, _)) = listener.accept().await {
                accepted.push(socket);
            }
        });
        let t = StdioToSseTranslator::new(
            "silent",
            format!("http://{addr}/mcp"),
            &HashMap::new(),
            Duration::from_millis(200),
        )
        .unwrap();

        let started = Instant::now();
        let resp = t.translate(json!({"jsonrpc": "2.0", "id": 4, "method": "ping"})).await;
        assert!(started.elapsed() < Duration::from_secs(5));
        assert_eq!(resp["id"], 4);
        assert_eq!(resp["error"]["code"], -32000);
    }

    #[tokio::test]
    async fn non_2xx_yields_http_error() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/mcp")
            .with_status(502)
            .create_async()
            .await;
        let t = translator(&format!("{}/mcp", server.url()));
        let resp = t.translate(json!({"jsonrpc": "2.0", "id": 1, "method": "ping"})).await;
        assert_eq!(resp["error"]["code"], -32000);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn undecodable_body_yields_internal_error() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/mcp")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body("not json")
            .create_async()
            .await;
        let t = translator(&format!("{}/mcp", server.url()));
        let resp = t.translate(json!({"jsonrpc": "2.0", "id": 1, "method": "ping"})).await;
        assert_eq!(resp["error"]["code"], -32603);
        assert!(resp["error"]["message"].as_str().unwrap().starts_with("Internal error"));
    }

    #[tokio::test]
    async fn success_body_is_returned_verbatim() {
        let mut server = mockito::Server::new_async().await;
        let body = json!({"jsonrpc": "2.0", "id": 1, "result": {"tools": []}});
        server
            .mock("POST", "/mcp")
            .match_header("authorization", "Bearer tok")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(body.to_string())
            .create_async()
            .await;
        let headers = HashMap::from([("Authorization".to_string(), "Bearer tok".to_string())]);
        let t = StdioToSseTranslator::new(
            "remote",
            format!("{}/mcp", server.url()),
            &headers,
            Duration::from_secs(2),
        )
        .unwrap();
        let resp = t.translate(json!({"jsonrpc": "2.0", "id": 1, "method": "tools/list"})).await;
        assert_eq!(resp, body);
    }

    #[tokio::test]
    async fn pump_answers_requests_only() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/mcp")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"jsonrpc":"2.0","id":1,"result":{}}"#)
            .expect(2)
            .create_async()
            .await;
        let t = translator(&format!("{}/mcp", server.url()));
        t.start().await.unwrap();

        let input = concat!(
            "{\"jsonrpc\":\"2.0\",\"method\":\"notifications/initialized\"}\n",
            "garbage\n",
            "{\"jsonrpc\":\"2.0\",\"id\":1,\"method\":\"ping\"}\n",
        );
        let mut out = Vec::new();
        t.pump(input.as_bytes(), &mut out).await.unwrap();
        let out = String::from_utf8(out).unwrap();
        assert_eq!(out.lines().count(), 1);
        assert!(out.contains("\"result\""));
    }

    #[tokio::test]
    async fn unstarted_stdio_translator_reports_internal_error() {
        let t = SseToStdioTranslator::new(
            ProcessSpec::new("child", vec!["cat".into()]),
            Duration::from_secs(1),
        );
        let resp = t.translate(json!({"jsonrpc": "2.0", "id": 3, "method": "ping"})).await;
        assert_eq!(resp["error"]["code"], -32603);
        assert_eq!(resp["id"], 3);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn stdio_translator_times_out_and_assigns_ids() {
        let t = SseToStdioTranslator::new(
            ProcessSpec::new("mute", vec!["sleep".into(), "30".into()]),
            Duration::from_millis(100),
        );
        t.start().await.unwrap();
        let resp = t.translate(json!({"jsonrpc": "2.0", "method": "ping"})).await;
        assert_eq!(resp["error"]["code"], -32000);
        assert_eq!(resp["error"]["message"], "Request timeout");
        t.stop().await.unwrap();
        assert!(!t.is_running());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn stdio_translator_starts_on_a_spawned_task() {
        let t = Arc::new(SseToStdioTranslator::new(
            ProcessSpec::new("idle", vec!["sleep".into(), "30".into()]),
            Duration::from_secs(1),
        ));
        let task = Arc::clone(&t);
        tokio::spawn(async move { task.start().await })
            .await
            .unwrap()
            .unwrap();
        assert!(t.is_running());
        assert!(t.pid().await.is_some());
        t.stop().await.unwrap();
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn manager_rejects_duplicates_and_stops_all() {
        let manager = TranslatorManager::new();
        manager
            .add_sse_to_stdio(
                ProcessSpec::new("a", vec!["sleep".into(), "30".into()]),
                Duration::from_secs(1),
            )
            .await
            .unwrap();
        let unreachable = "http://127.0.0.1:9/mcp";
        let no_headers = HashMap::new();
        manager
            .add_stdio_to_sse("b", unreachable, &no_headers, Duration::from_secs(1))
            .await
            .unwrap();
        assert!(
            manager
                .add_stdio_to_sse("a", unreachable, &no_headers, Duration::from_secs(1))
                .await
                .is_err()
        );

        let listed = manager.list_translators().await;
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].direction, TranslationDirection::SseToStdio);
        assert!(listed.iter().all(|t| t.running));

        manager.remove_translator("missing").await.unwrap();
        manager.stop_all().await;
        assert!(manager.is_empty().await);
    }
}
