//! STDIO transport: one JSON-RPC message per line on a child's stdin/stdout.

use std::{
    sync::atomic::{AtomicBool, Ordering},
    time::Duration,
};

use {
    async_trait::async_trait,
    serde_json::Value,
    tokio::{
        io::{AsyncBufReadExt, AsyncWriteExt, BufReader},
        process::ChildStdin,
        sync::{Mutex, mpsc},
        task::JoinHandle,
    },
    tracing::{debug, info, trace, warn},
};

#[cfg(feature = "metrics")]
use composer_metrics::{counter, labels, transport as transport_metrics};

use crate::{
    error::{ConnectionError, Result},
    process::{DEFAULT_STOP_GRACE, Process, ProcessSpec, SharedProcess},
    transport::{Transport, TransportKind},
};

enum ProcessSource {
    /// Spawned on connect, stopped on disconnect.
    Owned(ProcessSpec),
    /// Started if needed on connect; its lifecycle belongs to someone else.
    Shared(SharedProcess),
}

pub struct StdioTransport {
    name: String,
    source: ProcessSource,
    stop_grace: Duration,
    connected: AtomicBool,
    process: Mutex<Option<SharedProcess>>,
    stdin: Mutex<Option<ChildStdin>>,
    inbound: Mutex<Option<mpsc::Receiver<Value>>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl StdioTransport {
    /// Transport that spawns `spec` on connect.
    pub fn new(spec: ProcessSpec) -> Self {
        Self::with_source(spec.name.clone(), ProcessSource::Owned(spec))
    }

    /// Transport over an existing process, typically one owned by a `ProcessManager`.
    pub fn for_process(name: impl Into<String>, process: SharedProcess) -> Self {
        Self::with_source(name.into(), ProcessSource::Shared(process))
    }

    fn with_source(name: String, source: ProcessSource) -> Self {
        Self {
            name,
            source,
            stop_grace: DEFAULT_STOP_GRACE,
            connected: AtomicBool::new(false),
            process: Mutex::new(None),
            stdin: Mutex::new(None),
            inbound: Mutex::new(None),
            tasks: Mutex::new(Vec::new()),
        }
    }

    #[must_use]
    pub fn with_stop_grace(mut self, grace: Duration) -> Self {
        self.stop_grace = grace;
        self
    }

    /// Pid of the child while connected.
    pub async fn pid(&self) -> Option<u32> {
        let process = self.process.lock().await.clone()?;
        let pid = process.lock().await.pid();
        pid
    }

    /// Exit code of the child once it has stopped.
    pub async fn returncode(&self) -> Option<i32> {
        let process = match &self.source {
            ProcessSource::Shared(process) => process.clone(),
            ProcessSource::Owned(_) => self.process.lock().await.clone()?,
        };
        let code = process.lock().await.exit_code();
        code
    }

    fn closed(&self) -> ConnectionError {
        ConnectionError::Closed {
            transport: self.name.clone(),
        }
    }
}

#[async_trait]
impl Transport for StdioTransport {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> TransportKind {
        TransportKind::Stdio
    }

    async fn connect(&self) -> Result<()> {
        if self.is_connected() {
            return Ok(());
        }

        let process = match &self.source {
            ProcessSource::Owned(spec) => Process::shared(spec.clone()),
            ProcessSource::Shared(process) => process.clone(),
        };

        let pipes = {
            let mut p = process.lock().await;
            if !p.is_running() {
                p.start().map_err(|source| ConnectionError::Spawn {
                    transport: self.name.clone(),
                    source,
                })?;
            }
            p.take_pipes().ok_or_else(|| self.closed())?
        };

        let (tx, rx) = mpsc::channel(256);
        let mut tasks = vec![tokio::spawn(read_lines(self.name.clone(), pipes.stdout, tx))];
        if let Some(stderr) = pipes.stderr {
            let name = self.name.clone();
            tasks.push(tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    if !line.trim().is_empty() {
                        warn!(transport = %name, stderr = %line.trim(), "child stderr");
                    }
                }
            }));
        }

        *self.process.lock().await = Some(process);
        *self.stdin.lock().await = Some(pipes.stdin);
        *self.inbound.lock().await = Some(rx);
        *self.tasks.lock().await = tasks;
        self.connected.store(true, Ordering::SeqCst);
        let pid = self.pid().await;
        info!(transport = %self.name, pid = ?pid, "stdio transport connected");
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        if !self.connected.swap(false, Ordering::SeqCst) {
            return Ok(());
        }
        // EOF on stdin asks a well-behaved server to exit.
        self.stdin.lock().await.take();
        for task in self.tasks.lock().await.drain(..) {
            task.abort();
        }
        self.inbound.lock().await.take();

        let process = self.process.lock().await.take();
        if let (ProcessSource::Owned(_), Some(process)) = (&self.source, process) {
            let mut p = process.lock().await;
            if p.is_running()
                && let Err(e) = p.stop(self.stop_grace).await
            {
                warn!(transport = %self.name, error = %e, "failed to stop child on disconnect");
            }
        }
        info!(transport = %self.name, "stdio transport disconnected");
        Ok(())
    }

    async fn send(&self, message: &Value) -> Result<()> {
        if !self.is_connected() {
            return Err(self.not_connected().into());
        }
        let mut line = serde_json::to_string(message)?;
        line.push('\n');

        let mut stdin = self.stdin.lock().await;
        let writer = stdin.as_mut().ok_or_else(|| self.closed())?;
        let io = async {
            writer.write_all(line.as_bytes()).await?;
            writer.flush().await
        };
        io.await.map_err(|source| ConnectionError::PipeBroken {
            transport: self.name.clone(),
            source,
        })?;
        trace!(transport = %self.name, "message sent");
        #[cfg(feature = "metrics")]
        counter!(transport_metrics::MESSAGES_SENT_TOTAL, labels::TRANSPORT => "stdio").increment(1);
        Ok(())
    }

    async fn receive(&self) -> Result<Value> {
        if !self.is_connected() {
            return Err(self.not_connected().into());
        }
        let mut inbound = self.inbound.lock().await;
        let rx = inbound.as_mut().ok_or_else(|| self.not_connected())?;
        let message = rx.recv().await.ok_or_else(|| self.closed())?;
        #[cfg(feature = "metrics")]
        counter!(transport_metrics::MESSAGES_RECEIVED_TOTAL, labels::TRANSPORT => "stdio")
            .increment(1);
        Ok(message)
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}

async fn read_lines(name: String, stdout: tokio::process::ChildStdout, tx: mpsc::Sender<Value>) {
    let mut lines = BufReader::new(stdout).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                if line.trim().is_empty() {
                    continue;
                }
                match serde_json::from_str::<Value>(&line) {
                    Ok(message) => {
                        if tx.send(message).await.is_err() {
                            break;
                        }
                    },
                    Err(e) => {
                        warn!(transport = %name, error = %e, "dropping invalid JSON line from child");
                        #[cfg(feature = "metrics")]
                        counter!(transport_metrics::INVALID_MESSAGES_TOTAL, labels::TRANSPORT => "stdio")
                            .increment(1);
                    },
                }
            },
            Ok(None) => {
                debug!(transport = %name, "child stdout closed");
                break;
            },
            Err(e) => {
                warn!(transport = %name, error = %e, "error reading child stdout");
                break;
            },
        }
    }
}
