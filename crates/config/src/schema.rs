//! Config schema types (composer, transport, servers, tool manager, monitoring).
use std::{collections::HashMap, fmt, path::PathBuf};

use {
    secrecy::{ExposeSecret, Secret},
    serde::{Deserialize, Serialize},
};

// ── Enums ───────────────────────────────────────────────────────────────────

/// Policy applied when two servers expose a component under the same name.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConflictResolution {
    /// First writer keeps the bare name, later writers become `{server}_{name}`.
    #[default]
    Prefix,
    /// Later writers become `{name}_{server}`.
    Suffix,
    /// Last writer wins the bare name.
    Override,
    /// Later writers are dropped.
    Ignore,
    /// Conflicts are rejected.
    Error,
    /// Later writers are named from [`CustomTemplateConfig::template`].
    Custom,
}

impl ConflictResolution {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Prefix => "prefix",
            Self::Suffix => "suffix",
            Self::Override => "override",
            Self::Ignore => "ignore",
            Self::Error => "error",
            Self::Custom => "custom",
        }
    }
}

impl fmt::Display for ConflictResolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// When the process supervisor restarts a proxied server that exited.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RestartPolicy {
    Never,
    /// Restart only after a non-zero exit or a signal.
    #[default]
    OnFailure,
    Always,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthCheckMethod {
    /// Call `health_check_tool` with empty arguments.
    #[default]
    Tool,
    /// Send a JSON-RPC `ping`.
    Ping,
    /// Re-list tools.
    Custom,
}

/// How an SSE proxied server participates in the composition.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProxyMode {
    /// Discover the remote tool catalog and compose it.
    #[default]
    Proxy,
    /// Only register a protocol translator for the endpoint.
    Translator,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

// ── Root ────────────────────────────────────────────────────────────────────

/// Root configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct McpComposerConfig {
    pub composer: ComposerSettings,
    pub transport: TransportSettings,
    pub servers: ServersConfig,
    pub tool_manager: ToolManagerConfig,
    pub monitoring: MonitoringConfig,
}

impl McpComposerConfig {
    /// True when at least one STDIO or SSE proxied server is configured.
    #[must_use]
    pub fn has_proxied_servers(&self) -> bool {
        !self.servers.proxied.stdio.is_empty() || !self.servers.proxied.sse.is_empty()
    }

    /// The supervisor only needs to run when some STDIO server can be restarted.
    #[must_use]
    pub fn wants_auto_restart(&self) -> bool {
        self.servers
            .proxied
            .stdio
            .iter()
            .any(|s| s.restart_policy != RestartPolicy::Never)
    }

    /// Every configured server name, in declaration order.
    pub fn server_names(&self) -> impl Iterator<Item = &str> {
        self.servers
            .embedded
            .servers
            .iter()
            .map(|s| s.name.as_str())
            .chain(self.servers.proxied.stdio.iter().map(|s| s.name.as_str()))
            .chain(self.servers.proxied.sse.iter().map(|s| s.name.as_str()))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ComposerSettings {
    /// Name advertised by the composed server.
    pub name: String,
    pub conflict_resolution: ConflictResolution,
    pub log_level: String,
    /// Port for the composed SSE surface.
    pub port: u16,
}

impl Default for ComposerSettings {
    fn default() -> Self {
        Self {
            name: "composed-mcp-server".into(),
            conflict_resolution: ConflictResolution::Prefix,
            log_level: "info".into(),
            port: 8080,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportSettings {
    pub stdio_enabled: bool,
    pub sse_enabled: bool,
    pub sse_host: String,
    pub sse_path: String,
    pub message_path: String,
    pub sse_cors_enabled: bool,
    /// Allowed CORS origins; `"*"` allows any origin.
    pub cors_origins: Vec<String>,
}

impl Default for TransportSettings {
    fn default() -> Self {
        Self {
            stdio_enabled: true,
            sse_enabled: true,
            sse_host: "0.0.0.0".into(),
            sse_path: "/sse".into(),
            message_path: "/message".into(),
            sse_cors_enabled: true,
            cors_origins: vec!["*".into()],
        }
    }
}

// ── Servers ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ServersConfig {
    pub embedded: EmbeddedServersConfig,
    pub proxied: ProxiedServersConfig,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddedServersConfig {
    pub servers: Vec<EmbeddedServerConfig>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ProxiedServersConfig {
    pub stdio: Vec<StdioProxiedServerConfig>,
    pub sse: Vec<SseProxiedServerConfig>,
}

/// A server compiled into the composer binary and looked up by package name.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddedServerConfig {
    pub name: String,
    pub package: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    /// Rename map applied to the server's tools before conflict resolution.
    #[serde(default)]
    pub tool_mappings: HashMap<String, String>,
}

/// A child MCP server spoken to over its stdin/stdout.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StdioProxiedServerConfig {
    pub name: String,
    /// Program followed by its arguments.
    pub command: Vec<String>,
    #[serde(default)]
    pub env: HashMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub working_dir: Option<PathBuf>,
    #[serde(default)]
    pub restart_policy: RestartPolicy,
    #[serde(default = "default_max_restarts")]
    pub max_restarts: u32,
    /// Seconds to wait before an automatic restart.
    #[serde(default = "default_restart_delay")]
    pub restart_delay: u64,
    #[serde(default)]
    pub health_check_enabled: bool,
    #[serde(default = "default_stdio_health_interval")]
    pub health_check_interval: u64,
    #[serde(default = "default_health_timeout")]
    pub health_check_timeout: u64,
    #[serde(default)]
    pub health_check_method: HealthCheckMethod,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub health_check_tool: Option<String>,
    #[serde(default = "default_true")]
    pub log_stdout: bool,
    #[serde(default = "default_true")]
    pub log_stderr: bool,
}

impl StdioProxiedServerConfig {
    /// Minimal config for `command`, every other field at its default.
    pub fn new(name: impl Into<String>, command: Vec<String>) -> Self {
        Self {
            name: name.into(),
            command,
            env: HashMap::new(),
            working_dir: None,
            restart_policy: RestartPolicy::default(),
            max_restarts: default_max_restarts(),
            restart_delay: default_restart_delay(),
            health_check_enabled: false,
            health_check_interval: default_stdio_health_interval(),
            health_check_timeout: default_health_timeout(),
            health_check_method: HealthCheckMethod::default(),
            health_check_tool: None,
            log_stdout: true,
            log_stderr: true,
        }
    }
}

/// A remote MCP server reached with HTTP POST JSON-RPC.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SseProxiedServerConfig {
    pub name: String,
    pub url: String,
    #[serde(
        default,
        serialize_with = "serialize_option_secret",
        skip_serializing_if = "Option::is_none"
    )]
    pub auth_token: Option<Secret<String>>,
    /// `bearer`, `api_key`, or any custom `Authorization` scheme.
    #[serde(default = "default_auth_type")]
    pub auth_type: String,
    /// Request timeout in seconds.
    #[serde(default = "default_sse_timeout")]
    pub timeout: u64,
    #[serde(default = "default_restart_delay")]
    pub retry_interval: u64,
    #[serde(default = "default_true")]
    pub keep_alive: bool,
    #[serde(default = "default_true")]
    pub reconnect_on_failure: bool,
    #[serde(default = "default_max_reconnect_attempts")]
    pub max_reconnect_attempts: u32,
    #[serde(default)]
    pub health_check_enabled: bool,
    #[serde(default = "default_sse_health_interval")]
    pub health_check_interval: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub health_check_endpoint: Option<String>,
    #[serde(default)]
    pub mode: ProxyMode,
}

impl SseProxiedServerConfig {
    pub fn new(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
            auth_token: None,
            auth_type: default_auth_type(),
            timeout: default_sse_timeout(),
            retry_interval: default_restart_delay(),
            keep_alive: true,
            reconnect_on_failure: true,
            max_reconnect_attempts: default_max_reconnect_attempts(),
            health_check_enabled: false,
            health_check_interval: default_sse_health_interval(),
            health_check_endpoint: None,
            mode: ProxyMode::default(),
        }
    }

    /// Header name and value carrying `auth_token`, if one is configured.
    #[must_use]
    pub fn auth_header(&self) -> Option<(String, String)> {
        let token = self.auth_token.as_ref()?.expose_secret();
        let header = match self.auth_type.to_ascii_lowercase().as_str() {
            "bearer" => ("Authorization".to_string(), format!("Bearer {token}")),
            "api_key" | "apikey" | "api-key" => ("X-API-Key".to_string(), token.clone()),
            scheme => ("Authorization".to_string(), format!("{scheme} {token}")),
        };
        Some(header)
    }
}

// ── Tool manager ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolManagerConfig {
    /// Strategy for tools; unset falls back to `composer.conflict_resolution`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conflict_resolution: Option<ConflictResolution>,
    /// Evaluated in order; the first matching pattern wins.
    pub tool_overrides: Vec<ToolOverrideConfig>,
    pub custom_template: CustomTemplateConfig,
    pub aliases: HashMap<String, String>,
    pub versioning: VersioningConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolOverrideConfig {
    /// Glob pattern, `*` matches any run of characters.
    pub tool_pattern: String,
    pub resolution: ConflictResolution,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CustomTemplateConfig {
    /// Supports `{server_name}` and `{tool_name}` placeholders.
    pub template: String,
}

impl Default for CustomTemplateConfig {
    fn default() -> Self {
        Self {
            template: "{server_name}_{tool_name}".into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VersioningConfig {
    pub enabled: bool,
    pub allow_multiple_versions: bool,
    /// Supports a `{version}` placeholder.
    pub version_suffix_format: String,
}

impl Default for VersioningConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            allow_multiple_versions: false,
            version_suffix_format: "_v{version}".into(),
        }
    }
}

// ── Monitoring ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitoringConfig {
    pub logging: LoggingConfig,
    pub metrics: MetricsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
            format: LogFormat::Text,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    pub enabled: bool,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

// ── Serde defaults ──────────────────────────────────────────────────────────

fn default_true() -> bool {
    true
}

fn default_max_restarts() -> u32 {
    3
}

fn default_restart_delay() -> u64 {
    5
}

fn default_stdio_health_interval() -> u64 {
    30
}

fn default_sse_health_interval() -> u64 {
    60
}

fn default_health_timeout() -> u64 {
    5
}

fn default_auth_type() -> String {
    "bearer".into()
}

fn default_sse_timeout() -> u64 {
    30
}

fn default_max_reconnect_attempts() -> u32 {
    10
}

// ── Serde helpers for Secret<String> ────────────────────────────────────────

fn serialize_option_secret<S: serde::Serializer>(
    secret: &Option<Secret<String>>,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    match secret {
        Some(s) => serializer.serialize_some(s.expose_secret()),
        None => serializer.serialize_none(),
    }
}
