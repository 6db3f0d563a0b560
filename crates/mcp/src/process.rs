//! A single supervised child process and its pipes.

use std::{collections::HashMap, fmt, path::PathBuf, process::Stdio, sync::Arc, time::Duration};

use {
    chrono::{DateTime, Utc},
    serde::Serialize,
    tokio::{
        process::{Child, ChildStderr, ChildStdin, ChildStdout, Command},
        sync::Mutex,
    },
    tracing::{debug, info, warn},
};

use crate::error::ProcessError;

/// Grace period between the terminate signal and a forced kill.
pub const DEFAULT_STOP_GRACE: Duration = Duration::from_secs(5);

/// Process handle shared between the manager, transports and tool proxies.
pub type SharedProcess = Arc<Mutex<Process>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ProcessState {
    Stopped,
    Starting,
    Running,
    Stopping,
    /// Exited without being asked to.
    Crashed,
}

impl fmt::Display for ProcessState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Stopped => "stopped",
            Self::Starting => "starting",
            Self::Running => "running",
            Self::Stopping => "stopping",
            Self::Crashed => "crashed",
        };
        f.write_str(s)
    }
}

/// What to run: argv, environment and working directory.
#[derive(Debug, Clone, Default)]
pub struct ProcessSpec {
    pub name: String,
    pub command: Vec<String>,
    pub env: HashMap<String, String>,
    pub cwd: Option<PathBuf>,
}

impl ProcessSpec {
    pub fn new(name: impl Into<String>, command: Vec<String>) -> Self {
        Self {
            name: name.into(),
            command,
            ..Default::default()
        }
    }

    #[must_use]
    pub fn with_env(mut self, env: HashMap<String, String>) -> Self {
        self.env = env;
        self
    }

    #[must_use]
    pub fn with_cwd(mut self, cwd: Option<PathBuf>) -> Self {
        self.cwd = cwd;
        self
    }
}

/// The three pipes of a running child. Whoever takes them owns the framing.
pub struct ProcessPipes {
    pub stdin: ChildStdin,
    pub stdout: ChildStdout,
    pub stderr: Option<ChildStderr>,
}

/// Point-in-time view of a process, used by status and summary output.
#[derive(Debug, Clone, Serialize)]
pub struct ProcessInfo {
    pub name: String,
    pub state: ProcessState,
    pub pid: Option<u32>,
    pub command: String,
    pub started_at: Option<DateTime<Utc>>,
    pub stopped_at: Option<DateTime<Utc>>,
    pub exit_code: Option<i32>,
    pub restart_count: u32,
    pub uptime_seconds: Option<i64>,
}

pub struct Process {
    spec: ProcessSpec,
    state: ProcessState,
    child: Option<Child>,
    pipes: Option<ProcessPipes>,
    pid: Option<u32>,
    started_at: Option<DateTime<Utc>>,
    stopped_at: Option<DateTime<Utc>>,
    exit_code: Option<i32>,
    restart_count: u32,
}

impl fmt::Debug for Process {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Process")
            .field("name", &self.spec.name)
            .field("state", &self.state)
            .field("pid", &self.pid)
            .field("restart_count", &self.restart_count)
            .finish()
    }
}

impl Process {
    pub fn new(spec: ProcessSpec) -> Self {
        Self {
            spec,
            state: ProcessState::Stopped,
            child: None,
            pipes: None,
            pid: None,
            started_at: None,
            stopped_at: None,
            exit_code: None,
            restart_count: 0,
        }
    }

    pub fn shared(spec: ProcessSpec) -> SharedProcess {
        Arc::new(Mutex::new(Self::new(spec)))
    }

    pub fn name(&self) -> &str {
        &self.spec.name
    }

    pub fn spec(&self) -> &ProcessSpec {
        &self.spec
    }

    pub fn state(&self) -> ProcessState {
        self.state
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    pub fn exit_code(&self) -> Option<i32> {
        self.exit_code
    }

    pub fn restart_count(&self) -> u32 {
        self.restart_count
    }

    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        self.started_at
    }

    pub fn stopped_at(&self) -> Option<DateTime<Utc>> {
        self.stopped_at
    }

    pub fn is_running(&self) -> bool {
        self.state == ProcessState::Running
    }

    /// Spawn the OS process with piped stdio.
    ///
    /// A failed spawn leaves the process in the state it was in before
    /// (`Stopped` or `Crashed`), with no pid.
    pub fn start(&mut self) -> Result<(), ProcessError> {
        if self.is_running() {
            return Err(ProcessError::AlreadyRunning {
                name: self.spec.name.clone(),
            });
        }
        let Some((program, args)) = self.spec.command.split_first() else {
            return Err(ProcessError::EmptyCommand {
                name: self.spec.name.clone(),
            });
        };

        let previous = self.state;
        self.state = ProcessState::Starting;

        let mut cmd = Command::new(program);
        cmd.args(args)
            .envs(&self.spec.env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(cwd) = &self.spec.cwd {
            cmd.current_dir(cwd);
        }

        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(source) => {
                self.state = previous;
                warn!(process = %self.spec.name, command = %program, error = %source, "failed to spawn process");
                return Err(ProcessError::Spawn {
                    name: self.spec.name.clone(),
                    source,
                });
            },
        };

        let pipes = match (child.stdin.take(), child.stdout.take()) {
            (Some(stdin), Some(stdout)) => Some(ProcessPipes {
                stdin,
                stdout,
                stderr: child.stderr.take(),
            }),
            _ => None,
        };

        self.pid = child.id();
        self.child = Some(child);
        self.pipes = pipes;
        self.started_at = Some(Utc::now());
        self.stopped_at = None;
        self.exit_code = None;
        self.state = ProcessState::Running;

        info!(process = %self.spec.name, pid = ?self.pid, command = ?self.spec.command, "process started");
        Ok(())
    }

    /// Terminate gracefully, then force-kill once `grace` has elapsed.
    pub async fn stop(&mut self, grace: Duration) -> Result<(), ProcessError> {
        if !self.is_running() {
            return Err(ProcessError::NotRunning {
                name: self.spec.name.clone(),
            });
        }
        self.state = ProcessState::Stopping;
        // Closing stdin is the polite shutdown request for stdio servers.
        self.pipes = None;

        let code = match self.child.take() {
            Some(mut child) => terminate(&self.spec.name, &mut child, grace).await,
            None => None,
        };

        self.exit_code = Some(code.unwrap_or(-1));
        self.stopped_at = Some(Utc::now());
        self.pid = None;
        self.state = ProcessState::Stopped;
        info!(process = %self.spec.name, exit_code = ?self.exit_code, "process stopped");
        Ok(())
    }

    /// Stop (when running) and start again. Bumps `restart_count` on success.
    pub async fn restart(&mut self, grace: Duration) -> Result<(), ProcessError> {
        if self.is_running() {
            self.stop(grace).await?;
        }
        self.start()?;
        self.restart_count += 1;
        Ok(())
    }

    /// Notice an exit nobody asked for.
    ///
    /// Returns the exit code when a running child has exited since the last
    /// check; the process is then `Crashed`.
    pub fn reap(&mut self) -> Option<i32> {
        if !self.is_running() {
            return None;
        }
        let status = match self.child.as_mut()?.try_wait() {
            Ok(Some(status)) => status,
            Ok(None) => return None,
            Err(e) => {
                warn!(process = %self.spec.name, error = %e, "failed to poll process status");
                return None;
            },
        };

        let code = exit_code_of(status);
        self.child = None;
        self.pipes = None;
        self.pid = None;
        self.exit_code = Some(code);
        self.stopped_at = Some(Utc::now());
        self.state = ProcessState::Crashed;
        warn!(process = %self.spec.name, exit_code = code, "process exited unexpectedly");
        Some(code)
    }

    /// Hand the pipes to a transport. Only the first caller after a start gets them.
    pub fn take_pipes(&mut self) -> Option<ProcessPipes> {
        self.pipes.take()
    }

    pub fn info(&self) -> ProcessInfo {
        let uptime_seconds = match (self.state, self.started_at) {
            (ProcessState::Running, Some(started)) => Some((Utc::now() - started).num_seconds()),
            _ => None,
        };
        ProcessInfo {
            name: self.spec.name.clone(),
            state: self.state,
            pid: self.pid,
            command: self.spec.command.join(" "),
            started_at: self.started_at,
            stopped_at: self.stopped_at,
            exit_code: self.exit_code,
            restart_count: self.restart_count,
            uptime_seconds,
        }
    }
}

async fn terminate(name: &str, child: &mut Child, grace: Duration) -> Option<i32> {
    #[cfg(unix)]
    {
        use nix::{
            sys::signal::{Signal, kill},
            unistd::Pid,
        };

        if let Some(pid) = child.id().and_then(|pid| i32::try_from(pid).ok()) {
            let _ = kill(Pid::from_raw(pid), Signal::SIGTERM);
        }
    }

    #[cfg(not(unix))]
    {
        let _ = child.start_kill();
    }

    match tokio::time::timeout(grace, child.wait()).await {
        Ok(Ok(status)) => {
            debug!(process = %name, ?status, "process exited");
            Some(exit_code_of(status))
        },
        Ok(Err(e)) => {
            warn!(process = %name, error = %e, "error waiting for process");
            None
        },
        Err(_) => {
            warn!(process = %name, ?grace, "process did not exit gracefully, killing");
            let _ = child.kill().await;
            child.wait().await.ok().map(exit_code_of)
        },
    }
}

/// Exit code, or the negated signal number when the child was killed by one.
fn exit_code_of(status: std::process::ExitStatus) -> i32 {
    if let Some(code) = status.code() {
        return code;
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return -signal;
        }
    }
    -1
}
