//! Id-correlated JSON-RPC over a child's stdin/stdout.
//!
//! Every request carries an id; a reader task resolves the matching pending
//! waiter, so any number of requests can be in flight on one child.

use std::{
    collections::HashMap,
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
    time::Duration,
};

use {
    async_trait::async_trait,
    serde_json::Value,
    tokio::{
        io::{AsyncBufReadExt, AsyncWriteExt, BufReader},
        process::{ChildStderr, ChildStdin, ChildStdout},
        sync::{Mutex, oneshot},
        task::JoinHandle,
    },
    tracing::{debug, trace, warn},
};

use crate::{
    error::{ConnectionError, Error, Result},
    process::ProcessPipes,
    types::{JsonRpcNotification, JsonRpcResponse, is_response},
};

type PendingMap = Arc<Mutex<HashMap<String, oneshot::Sender<Value>>>>;

/// Something that answers JSON-RPC requests: a child process or a remote endpoint.
#[async_trait]
pub trait RpcEndpoint: Send + Sync {
    /// Send a request and wait for its response.
    ///
    /// A response carrying an `error` member is still `Ok`; only transport
    /// failures and timeouts are errors.
    async fn request(
        &self,
        method: &str,
        params: Option<Value>,
        timeout: Duration,
    ) -> Result<JsonRpcResponse>;

    /// Send a notification (no response expected).
    async fn notify(&self, method: &str, params: Option<Value>) -> Result<()>;

    /// Whether the peer can still be reached.
    async fn is_alive(&self) -> bool;
}

pub struct RpcChannel {
    name: String,
    stdin: Mutex<Option<ChildStdin>>,
    pending: PendingMap,
    next_id: AtomicU64,
    closed: Arc<AtomicBool>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl RpcChannel {
    /// Take over a child's pipes and start the stdout/stderr reader tasks.
    pub fn spawn(name: impl Into<String>, pipes: ProcessPipes, log_stderr: bool) -> Arc<Self> {
        let name = name.into();
        let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));
        let closed = Arc::new(AtomicBool::new(false));

        let mut tasks = vec![tokio::spawn(read_responses(
            name.clone(),
            pipes.stdout,
            Arc::clone(&pending),
            Arc::clone(&closed),
        ))];
        if let Some(stderr) = pipes.stderr {
            tasks.push(tokio::spawn(drain_stderr(name.clone(), stderr, log_stderr)));
        }

        Arc::new(Self {
            name,
            stdin: Mutex::new(Some(pipes.stdin)),
            pending,
            next_id: AtomicU64::new(1),
            closed,
            tasks: Mutex::new(tasks),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Next value of the per-channel id counter.
    pub fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::SeqCst)
    }

    /// Write `message` and wait for the response with the same id.
    ///
    /// A message without an `id` gets the next counter value. On timeout the
    /// pending entry is removed, so a late reply is dropped by the reader.
    pub async fn forward(&self, mut message: Value, timeout: Duration) -> Result<Value> {
        let method = message
            .get("method")
            .and_then(Value::as_str)
            .unwrap_or("<response>")
            .to_string();
        let Some(obj) = message.as_object_mut() else {
            return Err(Error::message("JSON-RPC message must be an object"));
        };
        let id = obj
            .entry("id")
            .or_insert_with(|| Value::from(self.next_id()))
            .clone();
        let key = id.to_string();

        let (tx, rx) = oneshot::channel();
        {
            let mut pending = self.pending.lock().await;
            if pending.contains_key(&key) {
                return Err(Error::message(format!(
                    "request id {key} is already in flight on {}",
                    self.name
                )));
            }
            if self.is_closed() {
                return Err(ConnectionError::Closed {
                    transport: self.name.clone(),
                }
                .into());
            }
            pending.insert(key.clone(), tx);
        }

        debug!(server = %self.name, method = %method, id = %key, "client -> MCP server");
        if let Err(e) = self.write(&message).await {
            self.pending.lock().await.remove(&key);
            return Err(e);
        }

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(_)) => Err(ConnectionError::Closed {
                transport: self.name.clone(),
            }
            .into()),
            Err(_) => {
                self.pending.lock().await.remove(&key);
                Err(ConnectionError::Timeout { method, timeout }.into())
            },
        }
    }

    /// Write one newline-framed JSON message.
    pub async fn write(&self, message: &Value) -> Result<()> {
        let mut line = serde_json::to_string(message)?;
        line.push('\n');

        let mut stdin = self.stdin.lock().await;
        let Some(writer) = stdin.as_mut() else {
            return Err(ConnectionError::Closed {
                transport: self.name.clone(),
            }
            .into());
        };
        let io = async {
            writer.write_all(line.as_bytes()).await?;
            writer.flush().await
        };
        io.await.map_err(|source| {
            ConnectionError::PipeBroken {
                transport: self.name.clone(),
                source,
            }
            .into()
        })
    }

    /// Drop stdin and stop the reader tasks. Pending waiters see `Closed`.
    pub async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.stdin.lock().await.take();
        for task in self.tasks.lock().await.drain(..) {
            task.abort();
        }
        self.pending.lock().await.clear();
    }
}

#[async_trait]
impl RpcEndpoint for RpcChannel {
    async fn request(
        &self,
        method: &str,
        params: Option<Value>,
        timeout: Duration,
    ) -> Result<JsonRpcResponse> {
        let mut message = serde_json::json!({
            "jsonrpc": "2.0",
            "id": self.next_id(),
            "method": method,
        });
        if let Some(params) = params {
            message["params"] = params;
        }
        let raw = self.forward(message, timeout).await?;
        Ok(serde_json::from_value(raw)?)
    }

    async fn notify(&self, method: &str, params: Option<Value>) -> Result<()> {
        trace!(server = %self.name, method = %method, "client -> MCP server (notification)");
        let notification = serde_json::to_value(JsonRpcNotification::new(method, params))?;
        self.write(&notification).await
    }

    async fn is_alive(&self) -> bool {
        !self.is_closed()
    }
}

impl Drop for RpcChannel {
    fn drop(&mut self) {
        if let Ok(mut tasks) = self.tasks.try_lock() {
            for task in tasks.drain(..) {
                task.abort();
            }
        }
    }
}

async fn read_responses(
    name: String,
    stdout: ChildStdout,
    pending: PendingMap,
    closed: Arc<AtomicBool>,
) {
    let mut lines = BufReader::new(stdout).lines();
    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => {
                debug!(server = %name, "MCP server stdout closed");
                break;
            },
            Err(e) => {
                warn!(server = %name, error = %e, "error reading from MCP server stdout");
                break;
            },
        };
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        trace!(server = %name, raw = %trimmed, "MCP server -> client");

        let message: Value = match serde_json::from_str(trimmed) {
            Ok(message) => message,
            Err(e) => {
                debug!(server = %name, error = %e, line = %trimmed, "MCP server sent non-JSON line");
                #[cfg(feature = "metrics")]
                composer_metrics::counter!(
                    composer_metrics::transport::INVALID_MESSAGES_TOTAL,
                    composer_metrics::labels::SERVER => name.clone()
                )
                .increment(1);
                continue;
            },
        };

        if !is_response(&message) {
            debug!(server = %name, method = ?message.get("method"), "ignoring server-initiated message");
            continue;
        }
        let key = message.get("id").cloned().unwrap_or(Value::Null).to_string();
        match pending.lock().await.remove(&key) {
            Some(tx) => {
                let _ = tx.send(message);
            },
            None => warn!(server = %name, id = %key, "received response for unknown request id"),
        }
    }
    closed.store(true, Ordering::SeqCst);
    // Dropping the senders wakes every waiter with a closed-channel error.
    pending.lock().await.clear();
}

async fn drain_stderr(name: String, stderr: ChildStderr, log: bool) {
    let mut lines = BufReader::new(stderr).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        let trimmed = line.trim();
        if log && !trimmed.is_empty() {
            warn!(server = %name, stderr = %trimmed, "MCP server stderr");
        }
    }
}
