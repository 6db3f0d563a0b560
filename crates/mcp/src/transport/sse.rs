//! SSE transport: an HTTP listener that fans outbound messages out to every
//! `GET /sse` client and queues inbound messages posted to `/message`.

use std::{
    convert::Infallible,
    net::SocketAddr,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use {
    async_trait::async_trait,
    axum::{
        Json, Router,
        body::Bytes,
        extract::State,
        http::{HeaderValue, StatusCode},
        response::{
            IntoResponse,
            sse::{Event, KeepAlive, Sse},
        },
        routing::{get, post},
    },
    chrono::{DateTime, Utc},
    composer_config::TransportSettings,
    dashmap::DashMap,
    futures::{Stream, StreamExt},
    serde_json::{Value, json},
    tokio::{
        net::TcpListener,
        sync::{Mutex, RwLock, broadcast, mpsc},
        task::JoinHandle,
    },
    tokio_util::sync::CancellationToken,
    tower_http::cors::{AllowOrigin, Any, CorsLayer},
    tracing::{debug, info, warn},
    uuid::Uuid,
};

#[cfg(feature = "metrics")]
use composer_metrics::{counter, gauge, labels, transport as transport_metrics};

use crate::{
    error::{ConnectionError, Result},
    transport::{Transport, TransportKind},
};

type ClientSet = Arc<DashMap<String, DateTime<Utc>>>;

#[derive(Debug, Clone)]
pub struct SseTransportConfig {
    pub host: String,
    /// `0` binds an ephemeral port; see [`SseTransport::local_addr`].
    pub port: u16,
    pub sse_path: String,
    pub message_path: String,
    pub cors_enabled: bool,
    /// `"*"` allows any origin.
    pub cors_origins: Vec<String>,
    pub keep_alive: Duration,
}

impl Default for SseTransportConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".into(),
            port: 8000,
            sse_path: "/sse".into(),
            message_path: "/message".into(),
            cors_enabled: true,
            cors_origins: vec!["*".into()],
            keep_alive: Duration::from_secs(15),
        }
    }
}

impl SseTransportConfig {
    pub fn from_settings(settings: &TransportSettings, port: u16) -> Self {
        Self {
            host: settings.sse_host.clone(),
            port,
            sse_path: settings.sse_path.clone(),
            message_path: settings.message_path.clone(),
            cors_enabled: settings.sse_cors_enabled,
            cors_origins: settings.cors_origins.clone(),
            ..Default::default()
        }
    }
}

struct Listener {
    addr: SocketAddr,
    outbound: broadcast::Sender<Arc<str>>,
    shutdown: CancellationToken,
    server: JoinHandle<()>,
}

pub struct SseTransport {
    name: String,
    config: SseTransportConfig,
    connected: AtomicBool,
    clients: ClientSet,
    listener: RwLock<Option<Listener>>,
    inbound: Mutex<Option<mpsc::UnboundedReceiver<Value>>>,
}

#[derive(Clone)]
struct AppState {
    transport: Arc<str>,
    inbound: mpsc::UnboundedSender<Value>,
    outbound: broadcast::Sender<Arc<str>>,
    clients: ClientSet,
    shutdown: CancellationToken,
    keep_alive: Duration,
}

impl SseTransport {
    pub fn new(name: impl Into<String>, config: SseTransportConfig) -> Self {
        Self {
            name: name.into(),
            config,
            connected: AtomicBool::new(false),
            clients: Arc::new(DashMap::new()),
            listener: RwLock::new(None),
            inbound: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &SseTransportConfig {
        &self.config
    }

    /// Address actually bound, while connected.
    pub async fn local_addr(&self) -> Option<SocketAddr> {
        self.listener.read().await.as_ref().map(|l| l.addr)
    }

    pub async fn endpoint_url(&self) -> Option<String> {
        let addr = self.local_addr().await?;
        Some(format!("http://{addr}{}", self.config.sse_path))
    }

    pub async fn message_url(&self) -> Option<String> {
        let addr = self.local_addr().await?;
        Some(format!("http://{addr}{}", self.config.message_path))
    }

    pub fn client_count(&self) -> usize {
        self.clients.len()
    }

    pub fn client_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.clients.iter().map(|c| c.key().clone()).collect();
        ids.sort();
        ids
    }

    fn router(&self, state: AppState) -> Router {
        let router = Router::new()
            .route(&self.config.sse_path, get(sse_handler))
            .route(&self.config.message_path, post(message_handler))
            .route("/health", get(health_handler))
            .route("/clients", get(clients_handler))
            .with_state(state);

        if self.config.cors_enabled {
            router.layer(cors_layer(&self.config.cors_origins))
        } else {
            router
        }
    }
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    let allow_origin = if origins.iter().any(|o| o == "*") {
        AllowOrigin::from(Any)
    } else {
        let values: Vec<HeaderValue> = origins
            .iter()
            .filter_map(|o| match HeaderValue::from_str(o) {
                Ok(v) => Some(v),
                Err(e) => {
                    warn!(origin = %o, error = %e, "ignoring invalid CORS origin");
                    None
                },
            })
            .collect();
        AllowOrigin::list(values)
    };
    CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods(Any)
        .allow_headers(Any)
}

#[async_trait]
impl Transport for SseTransport {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> TransportKind {
        TransportKind::Sse
    }

    async fn connect(&self) -> Result<()> {
        let mut slot = self.listener.write().await;
        if slot.is_some() {
            return Ok(());
        }

        let bind = format!("{}:{}", self.config.host, self.config.port);
        let listener = TcpListener::bind(&bind)
            .await
            .map_err(|source| ConnectionError::Bind {
                addr: bind.clone(),
                source,
            })?;
        let addr = listener.local_addr()?;

        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let (outbound, _) = broadcast::channel(256);
        let shutdown = CancellationToken::new();
        let app = self.router(AppState {
            transport: Arc::from(self.name.as_str()),
            inbound: inbound_tx,
            outbound: outbound.clone(),
            clients: Arc::clone(&self.clients),
            shutdown: shutdown.clone(),
            keep_alive: self.config.keep_alive,
        });

        let server_shutdown = shutdown.clone();
        let name = self.name.clone();
        let server = tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, app)
                .with_graceful_shutdown(server_shutdown.cancelled_owned())
                .await
            {
                warn!(transport = %name, error = %e, "SSE server exited with error");
            }
        });

        *self.inbound.lock().await = Some(inbound_rx);
        *slot = Some(Listener {
            addr,
            outbound,
            shutdown,
            server,
        });
        self.connected.store(true, Ordering::SeqCst);
        info!(transport = %self.name, %addr, sse_path = %self.config.sse_path, "SSE transport listening");
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        let Some(listener) = self.listener.write().await.take() else {
            return Ok(());
        };
        self.connected.store(false, Ordering::SeqCst);
        listener.shutdown.cancel();

        let mut server = listener.server;
        if tokio::time::timeout(Duration::from_secs(5), &mut server)
            .await
            .is_err()
        {
            warn!(transport = %self.name, "SSE server did not shut down in time, aborting");
            server.abort();
        }
        self.clients.clear();
        self.inbound.lock().await.take();
        info!(transport = %self.name, "SSE transport stopped");
        Ok(())
    }

    /// Broadcast to every connected client. No clients is not an error.
    async fn send(&self, message: &Value) -> Result<()> {
        let listener = self.listener.read().await;
        let Some(listener) = listener.as_ref() else {
            return Err(self.not_connected().into());
        };
        let data: Arc<str> = Arc::from(serde_json::to_string(message)?);
        match listener.outbound.send(data) {
            Ok(receivers) => debug!(transport = %self.name, receivers, "broadcast message"),
            Err(_) => debug!(transport = %self.name, "no SSE clients connected, message dropped"),
        }
        #[cfg(feature = "metrics")]
        counter!(transport_metrics::MESSAGES_SENT_TOTAL, labels::TRANSPORT => "sse").increment(1);
        Ok(())
    }

    /// Next message posted by any client, in arrival order.
    async fn receive(&self) -> Result<Value> {
        let shutdown = match self.listener.read().await.as_ref() {
            Some(listener) => listener.shutdown.clone(),
            None => return Err(self.not_connected().into()),
        };
        let mut inbound = self.inbound.lock().await;
        let rx = inbound.as_mut().ok_or_else(|| self.not_connected())?;
        let closed = || ConnectionError::Closed {
            transport: self.name.clone(),
        };
        tokio::select! {
            message = rx.recv() => {
                #[cfg(feature = "metrics")]
                counter!(transport_metrics::MESSAGES_RECEIVED_TOTAL, labels::TRANSPORT => "sse").increment(1);
                Ok(message.ok_or_else(closed)?)
            },
            () = shutdown.cancelled() => Err(closed().into()),
        }
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}

// ── Handlers ─────────────────────────────────────────────────────────────────

/// Removes the client from the set when its stream is dropped.
struct ClientGuard {
    id: String,
    clients: ClientSet,
}

impl Drop for ClientGuard {
    fn drop(&mut self) {
        self.clients.remove(&self.id);
        debug!(client_id = %self.id, "SSE client disconnected");
        #[cfg(feature = "metrics")]
        gauge!(transport_metrics::SSE_CLIENTS_CONNECTED).set(self.clients.len() as f64);
    }
}

async fn sse_handler(State(state): State<AppState>) -> impl IntoResponse {
    let client_id = Uuid::new_v4().to_string();
    // Subscribe before announcing the client so nothing sent after the ack is missed.
    let rx = state.outbound.subscribe();
    state.clients.insert(client_id.clone(), Utc::now());
    info!(transport = %state.transport, client_id = %client_id, "SSE client connected");
    #[cfg(feature = "metrics")]
    gauge!(transport_metrics::SSE_CLIENTS_CONNECTED).set(state.clients.len() as f64);

    let guard = ClientGuard {
        id: client_id.clone(),
        clients: Arc::clone(&state.clients),
    };
    let ack = Event::default()
        .event("connected")
        .data(json!({ "client_id": client_id }).to_string());

    let stream = futures::stream::once(async move { Ok::<_, Infallible>(ack) })
        .chain(client_stream(rx, guard))
        .take_until(state.shutdown.cancelled_owned());

    Sse::new(stream).keep_alive(KeepAlive::new().interval(state.keep_alive))
}

fn client_stream(
    rx: broadcast::Receiver<Arc<str>>,
    guard: ClientGuard,
) -> impl Stream<Item = std::result::Result<Event, Infallible>> {
    futures::stream::unfold((rx, guard), |(mut rx, guard)| async move {
        let event = match rx.recv().await {
            Ok(data) => Event::default().data(data.as_ref()),
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!(client_id = %guard.id, skipped, "SSE client lagged");
                Event::default().comment(format!("lagged, {skipped} messages skipped"))
            },
            Err(broadcast::error::RecvError::Closed) => return None,
        };
        Some((Ok(event), (rx, guard)))
    })
}

async fn message_handler(State(state): State<AppState>, body: Bytes) -> impl IntoResponse {
    let message = match serde_json::from_slice::<Value>(&body) {
        Ok(message @ Value::Object(_)) => message,
        Ok(_) => {
            return (
                StatusCode::BAD_REQUEST,
                Json(json!({ "error": "expected a JSON-RPC object" })),
            );
        },
        Err(e) => {
            debug!(transport = %state.transport, error = %e, "rejecting invalid JSON message");
            return (
                StatusCode::BAD_REQUEST,
                Json(json!({ "error": format!("invalid JSON: {e}") })),
            );
        },
    };
    if state.inbound.send(message).is_err() {
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({ "error": "transport closed" })),
        );
    }
    (StatusCode::OK, Json(json!({ "status": "received" })))
}

async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    Json(json!({
        "status": "healthy",
        "transport": state.transport.as_ref(),
        "clients": state.clients.len(),
    }))
}

async fn clients_handler(State(state): State<AppState>) -> impl IntoResponse {
    let mut clients: Vec<String> = state.clients.iter().map(|c| c.key().clone()).collect();
    clients.sort();
    Json(json!({
        "count": clients.len(),
        "clients": clients,
    }))
}
