//! Named collection of child processes with an optional restart supervisor.

use std::{
    collections::{BTreeMap, HashMap},
    future::Future,
    sync::{
        Arc, Weak,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use {
    composer_config::{RestartPolicy, StdioProxiedServerConfig},
    tokio::{
        sync::{Mutex, RwLock, broadcast},
        task::JoinHandle,
    },
    tracing::{debug, error, info, warn},
};

#[cfg(feature = "metrics")]
use composer_metrics::{counter, gauge, labels, process as process_metrics};

use crate::{
    error::{ProcessError, Result},
    process::{DEFAULT_STOP_GRACE, Process, ProcessInfo, ProcessSpec, ProcessState, SharedProcess},
};

/// How the supervisor treats one process after it exits on its own.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RestartSettings {
    pub policy: RestartPolicy,
    /// `None` means unlimited.
    pub max_restarts: Option<u32>,
    pub delay: Duration,
}

impl Default for RestartSettings {
    fn default() -> Self {
        Self {
            policy: RestartPolicy::Always,
            max_restarts: None,
            delay: Duration::ZERO,
        }
    }
}

impl From<&StdioProxiedServerConfig> for RestartSettings {
    fn from(cfg: &StdioProxiedServerConfig) -> Self {
        Self {
            policy: cfg.restart_policy,
            max_restarts: Some(cfg.max_restarts),
            delay: Duration::from_secs(cfg.restart_delay),
        }
    }
}

/// Lifecycle events published by the supervisor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessEvent {
    /// A running process exited without being asked to.
    Crashed { name: String, exit_code: i32 },
    /// The supervisor brought a crashed process back. Manual restarts are not reported.
    Restarted {
        name: String,
        pid: Option<u32>,
        restart_count: u32,
    },
    /// The restart budget is spent; the process stays crashed.
    RestartsExhausted { name: String, restarts: u32 },
}

#[derive(Debug, Clone)]
pub struct ProcessManagerOptions {
    /// Run the supervisor that restarts crashed processes.
    pub auto_restart: bool,
    /// How often the supervisor polls for exits.
    pub poll_interval: Duration,
    /// Grace period given to each process on stop.
    pub stop_grace: Duration,
}

impl Default for ProcessManagerOptions {
    fn default() -> Self {
        Self {
            auto_restart: false,
            poll_interval: Duration::from_secs(1),
            stop_grace: DEFAULT_STOP_GRACE,
        }
    }
}

struct ManagedProcess {
    process: SharedProcess,
    restart: RestartSettings,
    supervised_restarts: u32,
    restart_pending: bool,
    exhausted: bool,
}

struct Shared {
    processes: RwLock<HashMap<String, ManagedProcess>>,
    options: ProcessManagerOptions,
    shutdown: AtomicBool,
    events: broadcast::Sender<ProcessEvent>,
    supervisor: Mutex<Option<JoinHandle<()>>>,
}

/// Owns child processes by name. Cloning yields another handle to the same set.
#[derive(Clone)]
pub struct ProcessManager {
    shared: Arc<Shared>,
}

impl ProcessManager {
    pub fn new(auto_restart: bool) -> Self {
        Self::with_options(ProcessManagerOptions {
            auto_restart,
            ..Default::default()
        })
    }

    pub fn with_options(options: ProcessManagerOptions) -> Self {
        let (events, _) = broadcast::channel(64);
        Self {
            shared: Arc::new(Shared {
                processes: RwLock::new(HashMap::new()),
                options,
                shutdown: AtomicBool::new(false),
                events,
                supervisor: Mutex::new(None),
            }),
        }
    }

    pub fn auto_restart(&self) -> bool {
        self.shared.options.auto_restart
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ProcessEvent> {
        self.shared.events.subscribe()
    }

    // ── Registration ────────────────────────────────────────────────

    /// Register a process under `spec.name` and optionally start it.
    ///
    /// When the start fails the entry is removed again, so a failed add never
    /// leaves a half-registered name behind.
    pub async fn add_process(&self, spec: ProcessSpec, auto_start: bool) -> Result<SharedProcess> {
        self.add_with_settings(spec, RestartSettings::default(), auto_start)
            .await
    }

    /// Register a STDIO server from its declarative config.
    pub async fn add_from_config(
        &self,
        cfg: &StdioProxiedServerConfig,
        auto_start: bool,
    ) -> Result<SharedProcess> {
        let spec = ProcessSpec::new(cfg.name.clone(), cfg.command.clone())
            .with_env(cfg.env.clone())
            .with_cwd(cfg.working_dir.clone());
        self.add_with_settings(spec, RestartSettings::from(cfg), auto_start)
            .await
    }

    async fn add_with_settings(
        &self,
        spec: ProcessSpec,
        restart: RestartSettings,
        auto_start: bool,
    ) -> Result<SharedProcess> {
        let name = spec.name.clone();
        let process = Process::shared(spec);
        {
            let mut processes = self.shared.processes.write().await;
            if processes.contains_key(&name) {
                return Err(ProcessError::AlreadyExists { name }.into());
            }
            processes.insert(name.clone(), ManagedProcess {
                process: Arc::clone(&process),
                restart,
                supervised_restarts: 0,
                restart_pending: false,
                exhausted: false,
            });
        }
        debug!(process = %name, "process registered");

        if auto_start && let Err(e) = self.start_process(&name).await {
            self.shared.processes.write().await.remove(&name);
            return Err(e);
        }
        Ok(process)
    }

    // ── Lifecycle by name ───────────────────────────────────────────

    pub async fn start_process(&self, name: &str) -> Result<()> {
        let process = self.require(name).await?;
        let result = process.lock().await.start();
        record_start(name, result.is_ok());
        self.reset_supervision(name).await;
        Ok(result?)
    }

    pub async fn stop_process(&self, name: &str) -> Result<()> {
        let process = self.require(name).await?;
        process.lock().await.stop(self.shared.options.stop_grace).await?;
        record_running(&self.shared).await;
        Ok(())
    }

    pub async fn restart_process(&self, name: &str) -> Result<()> {
        let process = self.require(name).await?;
        let result = process
            .lock()
            .await
            .restart(self.shared.options.stop_grace)
            .await;
        record_start(name, result.is_ok());
        if result.is_ok() {
            record_restart(name);
            self.reset_supervision(name).await;
        }
        Ok(result?)
    }

    /// Stop the process if it is running, then forget it.
    pub async fn remove_process(&self, name: &str) -> Result<()> {
        let entry = self.shared.processes.write().await.remove(name);
        let Some(entry) = entry else {
            return Err(ProcessError::NotFound { name: name.into() }.into());
        };
        let mut process = entry.process.lock().await;
        if process.is_running() {
            process.stop(self.shared.options.stop_grace).await?;
        }
        info!(process = %name, "process removed");
        Ok(())
    }

    // ── Queries ─────────────────────────────────────────────────────

    pub async fn get_process(&self, name: &str) -> Option<SharedProcess> {
        self.shared
            .processes
            .read()
            .await
            .get(name)
            .map(|m| Arc::clone(&m.process))
    }

    /// Registered names, sorted.
    pub async fn list_processes(&self) -> Vec<String> {
        let mut names: Vec<String> = self.shared.processes.read().await.keys().cloned().collect();
        names.sort();
        names
    }

    pub async fn get_process_info(&self, name: &str) -> Option<ProcessInfo> {
        let process = self.get_process(name).await?;
        let info = process.lock().await.info();
        Some(info)
    }

    pub async fn get_all_process_info(&self) -> BTreeMap<String, ProcessInfo> {
        let mut out = BTreeMap::new();
        for (name, process) in self.snapshot().await {
            out.insert(name, process.lock().await.info());
        }
        out
    }

    // ── Manager lifecycle ───────────────────────────────────────────

    /// Begin supervision. Processes themselves are started by `add_*`/`start_process`.
    pub async fn start(&self) {
        self.shared.shutdown.store(false, Ordering::SeqCst);
        if !self.shared.options.auto_restart {
            return;
        }
        let mut supervisor = self.shared.supervisor.lock().await;
        if supervisor.is_none() {
            let weak = Arc::downgrade(&self.shared);
            let interval = self.shared.options.poll_interval;
            *supervisor = Some(tokio::spawn(supervise(weak, interval)));
            info!(poll_interval = ?interval, "process supervisor started");
        }
    }

    /// Stop supervision and every running process. Safe to call repeatedly.
    pub async fn stop(&self) {
        self.shared.shutdown.store(true, Ordering::SeqCst);
        if let Some(handle) = self.shared.supervisor.lock().await.take() {
            handle.abort();
        }
        for (name, process) in self.snapshot().await {
            let mut process = process.lock().await;
            if process.is_running()
                && let Err(e) = process.stop(self.shared.options.stop_grace).await
            {
                warn!(process = %name, error = %e, "failed to stop process during shutdown");
            }
        }
        record_running(&self.shared).await;
        debug!("process manager stopped");
    }

    /// Run `f` with the manager started, stopping it afterwards whatever `f` returns.
    pub async fn run<F, Fut, T>(&self, f: F) -> T
    where
        F: FnOnce(Self) -> Fut,
        Fut: Future<Output = T>,
    {
        self.start().await;
        let out = f(self.clone()).await;
        self.stop().await;
        out
    }

    async fn require(&self, name: &str) -> Result<SharedProcess> {
        self.get_process(name)
            .await
            .ok_or_else(|| ProcessError::NotFound { name: name.into() }.into())
    }

    async fn snapshot(&self) -> Vec<(String, SharedProcess)> {
        let mut entries: Vec<_> = self
            .shared
            .processes
            .read()
            .await
            .iter()
            .map(|(name, m)| (name.clone(), Arc::clone(&m.process)))
            .collect();
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        entries
    }

    async fn reset_supervision(&self, name: &str) {
        if let Some(entry) = self.shared.processes.write().await.get_mut(name) {
            entry.exhausted = false;
        }
    }
}

// ── Supervisor ──────────────────────────────────────────────────────

async fn supervise(shared: Weak<Shared>, interval: Duration) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        ticker.tick().await;
        let Some(shared) = shared.upgrade() else {
            break;
        };
        if shared.shutdown.load(Ordering::SeqCst) {
            break;
        }
        check_processes(&shared).await;
    }
}

async fn check_processes(shared: &Arc<Shared>) {
    let candidates: Vec<(String, SharedProcess, RestartSettings)> = shared
        .processes
        .read()
        .await
        .iter()
        .filter(|(_, m)| !m.restart_pending && !m.exhausted)
        .map(|(name, m)| (name.clone(), Arc::clone(&m.process), m.restart.clone()))
        .collect();

    for (name, process, settings) in candidates {
        let (state, exit_code) = {
            let mut p = process.lock().await;
            if let Some(code) = p.reap() {
                #[cfg(feature = "metrics")]
                counter!(process_metrics::CRASHES_TOTAL, labels::SERVER => name.clone()).increment(1);
                let _ = shared.events.send(ProcessEvent::Crashed {
                    name: name.clone(),
                    exit_code: code,
                });
            }
            (p.state(), p.exit_code())
        };

        if state != ProcessState::Crashed || !should_restart(&settings, exit_code) {
            continue;
        }
        schedule_restart(shared, &name, &settings).await;
    }
}

fn should_restart(settings: &RestartSettings, exit_code: Option<i32>) -> bool {
    match settings.policy {
        RestartPolicy::Never => false,
        RestartPolicy::OnFailure => exit_code != Some(0),
        RestartPolicy::Always => true,
    }
}

async fn schedule_restart(shared: &Arc<Shared>, name: &str, settings: &RestartSettings) {
    {
        let mut processes = shared.processes.write().await;
        let Some(entry) = processes.get_mut(name) else {
            return;
        };
        if let Some(max) = settings.max_restarts
            && entry.supervised_restarts >= max
        {
            entry.exhausted = true;
            error!(process = %name, restarts = entry.supervised_restarts, "restart budget exhausted, leaving process crashed");
            #[cfg(feature = "metrics")]
            counter!(process_metrics::RESTARTS_EXHAUSTED_TOTAL, labels::SERVER => name.to_string())
                .increment(1);
            let _ = shared.events.send(ProcessEvent::RestartsExhausted {
                name: name.to_string(),
                restarts: entry.supervised_restarts,
            });
            return;
        }
        entry.supervised_restarts += 1;
        entry.restart_pending = true;
    }

    let shared = Arc::clone(shared);
    let name = name.to_string();
    let delay = settings.delay;
    tokio::spawn(async move {
        if !delay.is_zero() {
            info!(process = %name, ?delay, "restarting crashed process after delay");
            tokio::time::sleep(delay).await;
        }
        restart_crashed(&shared, &name).await;
        if let Some(entry) = shared.processes.write().await.get_mut(&name) {
            entry.restart_pending = false;
        }
    });
}

async fn restart_crashed(shared: &Shared, name: &str) {
    if shared.shutdown.load(Ordering::SeqCst) {
        return;
    }
    let Some(process) = shared
        .processes
        .read()
        .await
        .get(name)
        .map(|m| Arc::clone(&m.process))
    else {
        return;
    };

    let event = {
        let mut p = process.lock().await;
        // Someone else already dealt with it.
        if p.state() != ProcessState::Crashed {
            return;
        }
        match p.restart(shared.options.stop_grace).await {
            Ok(()) => {
                info!(process = %name, pid = ?p.pid(), restart_count = p.restart_count(), "process restarted by supervisor");
                ProcessEvent::Restarted {
                    name: name.to_string(),
                    pid: p.pid(),
                    restart_count: p.restart_count(),
                }
            },
            Err(e) => {
                error!(process = %name, error = %e, "supervised restart failed");
                record_start(name, false);
                return;
            },
        }
    };
    record_start(name, true);
    record_restart(name);
    let _ = shared.events.send(event);
}

// ── Metrics ─────────────────────────────────────────────────────────

#[cfg(feature = "metrics")]
fn record_start(name: &str, ok: bool) {
    let metric = if ok {
        process_metrics::STARTS_TOTAL
    } else {
        process_metrics::START_FAILURES_TOTAL
    };
    counter!(metric, labels::SERVER => name.to_string()).increment(1);
}

#[cfg(not(feature = "metrics"))]
fn record_start(_name: &str, _ok: bool) {}

#[cfg(feature = "metrics")]
fn record_restart(name: &str) {
    counter!(process_metrics::RESTARTS_TOTAL, labels::SERVER => name.to_string()).increment(1);
}

#[cfg(not(feature = "metrics"))]
fn record_restart(_name: &str) {}

#[cfg(feature = "metrics")]
async fn record_running(shared: &Shared) {
    let processes: Vec<SharedProcess> = shared
        .processes
        .read()
        .await
        .values()
        .map(|m| Arc::clone(&m.process))
        .collect();
    let mut running = 0u32;
    for process in processes {
        if process.lock().await.is_running() {
            running += 1;
        }
    }
    gauge!(process_metrics::RUNNING).set(f64::from(running));
}

#[cfg(not(feature = "metrics"))]
async fn record_running(_shared: &Shared) {}
