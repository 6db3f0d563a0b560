//! Composition of MCP servers into one unified server.
//!
//! This crate provides:
//! - Child process lifecycle and supervision (`process`, `process_manager`)
//! - Newline-framed STDIO and SSE + HTTP POST transports (`transport`)
//! - STDIO ↔ SSE protocol translators (`translator`)
//! - MCP discovery and call forwarding for proxied servers (`tool_proxy`)
//! - Embedded server discovery from `pyproject.toml` dependencies (`discovery`)
//! - Conflict-aware tool naming (`tool_manager`)
//! - The composer itself and its JSON-RPC surface (`composer`, `server`)

pub mod auth;
pub mod composer;
pub mod discovery;
pub mod embedded;
pub mod error;
pub mod health;
pub mod process;
pub mod process_manager;
pub mod rpc;
pub mod server;
pub mod tool_manager;
pub mod tool_proxy;
pub mod translator;
pub mod transport;
pub mod types;

pub use {
    auth::{AuthContext, AuthType},
    composer::{Composer, ComposerOptions, CompositionSummary, ToolHandler},
    discovery::{DiscoveredServer, discover_from_manifest},
    embedded::{EmbeddedRegistry, EmbeddedServer, EmbeddedTool, FnTool, ServerDescriptor},
    error::{ConnectionError, Error, ProcessError, Result, ToolConflictError},
    health::HealthProbe,
    process::{Process, ProcessInfo, ProcessSpec, ProcessState, SharedProcess},
    process_manager::{ProcessEvent, ProcessManager, ProcessManagerOptions, RestartSettings},
    rpc::{RpcChannel, RpcEndpoint},
    server::{handle_request, serve_lines, serve_transport},
    tool_manager::{
        ComponentKind, ConflictRecord, RegisteredTool, Registration, ToolManager,
        ToolManagerSummary,
    },
    tool_proxy::{ProxiedTool, ToolProxy},
    translator::{
        ProtocolTranslator, SseToStdioTranslator, StdioToSseTranslator, TranslationDirection,
        TranslatorManager,
    },
    transport::{SseTransport, SseTransportConfig, StdioTransport, Transport, TransportKind},
};
