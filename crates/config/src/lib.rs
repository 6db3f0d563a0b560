//! Configuration loading, validation, and env substitution.
//!
//! Config files: `mcp_composer.toml`, `mcp_composer.yaml`, or `mcp_composer.json`
//! Searched in `./` then `~/.config/mcp-composer/`.
//!
//! Supports `${ENV_VAR}` substitution in all string values.

pub mod env_subst;
pub mod error;
pub mod loader;
pub mod schema;
pub mod validate;

pub use {
    error::{Error, Result},
    loader::{config_dir, discover_and_load, find_config_file, load_config, parse_config},
    schema::{
        ComposerSettings, ConflictResolution, CustomTemplateConfig, EmbeddedServerConfig,
        HealthCheckMethod, LogFormat, McpComposerConfig, MonitoringConfig, ProxyMode,
        RestartPolicy, SseProxiedServerConfig, StdioProxiedServerConfig, ToolManagerConfig,
        ToolOverrideConfig, TransportSettings, VersioningConfig,
    },
    validate::{Diagnostic, Severity, ValidationResult, validate_config, validate_file},
};
