use std::{error::Error as StdError, time::Duration};

use composer_common::FromMessage;

/// Lifecycle failures of a single child process.
#[derive(Debug, thiserror::Error)]
pub enum ProcessError {
    #[error("failed to start process {name}: {source}")]
    Spawn {
        name: String,
        #[source]
        source: std::io::Error,
    },
    #[error("Process {name} is already running")]
    AlreadyRunning { name: String },
    #[error("Process {name} is not running")]
    NotRunning { name: String },
    #[error("Process {name} already exists")]
    AlreadyExists { name: String },
    #[error("Process {name} not found")]
    NotFound { name: String },
    #[error("Process {name} has an empty command")]
    EmptyCommand { name: String },
}

/// Transport-level failures: the peer is gone, unreachable, or silent.
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    #[error("{transport} transport is not connected")]
    NotConnected { transport: String },
    #[error("{transport} transport closed")]
    Closed { transport: String },
    #[error("{transport} pipe broken: {source}")]
    PipeBroken {
        transport: String,
        #[source]
        source: std::io::Error,
    },
    #[error("{transport} transport failed to spawn its process: {source}")]
    Spawn {
        transport: String,
        #[source]
        source: ProcessError,
    },
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },
    #[error("no response to '{method}' within {timeout:?}")]
    Timeout { method: String, timeout: Duration },
    #[error("HTTP error: {message}")]
    Http { message: String },
}

/// Raised under the `error` strategy when a tool name is already taken.
#[derive(Debug, Clone, thiserror::Error)]
#[error("tool '{tool}' is exposed by more than one server: {}", servers.join(", "))]
pub struct ToolConflictError {
    pub tool: String,
    pub servers: Vec<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    SerdeJson(#[from] serde_json::Error),
    #[error(transparent)]
    Reqwest(#[from] reqwest::Error),
    #[error(transparent)]
    Config(#[from] composer_config::Error),
    #[error(transparent)]
    Process(#[from] ProcessError),
    #[error(transparent)]
    Connection(#[from] ConnectionError),
    #[error(transparent)]
    ToolConflict(#[from] ToolConflictError),
    #[error("{kind} '{name}' is exposed by more than one server: {}", servers.join(", "))]
    ComponentConflict {
        kind: &'static str,
        name: String,
        servers: Vec<String>,
    },
    #[error("composition failed: {message}")]
    Composition { message: String },
    #[error("configuration error: {message}")]
    Configuration { message: String },
    #[error("discovery failed for '{server}': {message}")]
    Discovery { server: String, message: String },
    #[error("cannot import embedded server package '{package}'")]
    Import { package: String },
    #[error("{message}")]
    ToolExecution { message: String },
    #[error("{kind} '{name}' not found")]
    NotFound { kind: &'static str, name: String },
    #[error("{message}")]
    Message { message: String },
    #[error("{context}: {source}")]
    External {
        context: String,
        #[source]
        source: Box<dyn StdError + Send + Sync>,
    },
}

impl Error {
    #[must_use]
    pub fn message(message: impl Into<String>) -> Self {
        Self::Message {
            message: message.into(),
        }
    }

    #[must_use]
    pub fn external<E>(context: impl Into<String>, source: E) -> Self
    where
        E: StdError + Send + Sync + 'static,
    {
        Self::External {
            context: context.into(),
            source: Box::new(source),
        }
    }

    #[must_use]
    pub fn composition(message: impl Into<String>) -> Self {
        Self::Composition {
            message: message.into(),
        }
    }

    #[must_use]
    pub fn discovery(server: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Discovery {
            server: server.into(),
            message: message.into(),
        }
    }

    #[must_use]
    pub fn tool_execution(message: impl Into<String>) -> Self {
        Self::ToolExecution {
            message: message.into(),
        }
    }

    #[must_use]
    pub fn not_found(kind: &'static str, name: impl Into<String>) -> Self {
        Self::NotFound {
            kind,
            name: name.into(),
        }
    }

    /// True for transport failures, which discovery treats as "server unavailable".
    #[must_use]
    pub fn is_connection(&self) -> bool {
        matches!(self, Self::Connection(_))
    }
}

impl FromMessage for Error {
    fn from_message(message: String) -> Self {
        Self::Message { message }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

composer_common::impl_context!();
