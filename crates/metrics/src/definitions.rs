//! Metric name and label definitions.
//!
//! Every metric the composer records is named here so the full set is
//! discoverable in one place.

/// Child process lifecycle
pub mod process {
    /// Successful process spawns
    pub const STARTS_TOTAL: &str = "composer_process_starts_total";
    /// Spawn attempts that failed
    pub const START_FAILURES_TOTAL: &str = "composer_process_start_failures_total";
    /// Processes that exited without being asked to
    pub const CRASHES_TOTAL: &str = "composer_process_crashes_total";
    /// Restarts, manual or supervised
    pub const RESTARTS_TOTAL: &str = "composer_process_restarts_total";
    /// Processes that ran out of restart budget
    pub const RESTARTS_EXHAUSTED_TOTAL: &str = "composer_process_restarts_exhausted_total";
    /// Processes currently running
    pub const RUNNING: &str = "composer_processes_running";
}

/// Composed tool registry and invocation
pub mod tools {
    /// Tools currently registered in the composed surface
    pub const REGISTERED: &str = "composer_tools_registered";
    /// Naming conflicts resolved at registration
    pub const CONFLICTS_TOTAL: &str = "composer_tool_conflicts_total";
    /// Tool invocations
    pub const CALLS_TOTAL: &str = "composer_tool_calls_total";
    /// Tool invocation duration in seconds
    pub const CALL_DURATION_SECONDS: &str = "composer_tool_call_duration_seconds";
    /// Tool invocations that returned an error
    pub const CALL_ERRORS_TOTAL: &str = "composer_tool_call_errors_total";
}

/// MCP discovery handshakes
pub mod discovery {
    /// Discovery runs started
    pub const RUNS_TOTAL: &str = "composer_discovery_runs_total";
    /// Discovery runs that registered no tools because a step failed
    pub const FAILURES_TOTAL: &str = "composer_discovery_failures_total";
}

/// STDIO and SSE transports
pub mod transport {
    /// Messages written by a transport
    pub const MESSAGES_SENT_TOTAL: &str = "composer_transport_messages_sent_total";
    /// Messages received by a transport
    pub const MESSAGES_RECEIVED_TOTAL: &str = "composer_transport_messages_received_total";
    /// Lines that were not valid JSON
    pub const INVALID_MESSAGES_TOTAL: &str = "composer_transport_invalid_messages_total";
    /// SSE clients currently connected
    pub const SSE_CLIENTS_CONNECTED: &str = "composer_transport_sse_clients_connected";
}

/// Protocol translators
pub mod translator {
    /// Requests translated
    pub const TRANSLATIONS_TOTAL: &str = "composer_translator_translations_total";
    /// Translations answered with a synthesized JSON-RPC error
    pub const ERRORS_TOTAL: &str = "composer_translator_errors_total";
    /// Translation round-trip duration in seconds
    pub const DURATION_SECONDS: &str = "composer_translator_duration_seconds";
}

/// Proxied server health checks
pub mod health {
    /// Health probes sent
    pub const CHECKS_TOTAL: &str = "composer_health_checks_total";
    /// Health probes that failed or timed out
    pub const CHECK_FAILURES_TOTAL: &str = "composer_health_check_failures_total";
}

/// Common label keys
pub mod labels {
    pub const SERVER: &str = "server";
    pub const TOOL: &str = "tool";
    pub const TRANSPORT: &str = "transport";
    pub const DIRECTION: &str = "direction";
    pub const STRATEGY: &str = "strategy";
    pub const ERROR_TYPE: &str = "error_type";
}
