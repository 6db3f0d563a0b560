//! Configuration validation.
//!
//! Loads a config file, flags unknown top-level sections, and runs semantic
//! checks over the parsed schema (duplicate names, empty commands,
//! incomplete health checks, bad URLs, odd templates).

use std::{
    collections::HashSet,
    path::{Path, PathBuf},
};

use crate::{
    loader,
    schema::{ConflictResolution, HealthCheckMethod, McpComposerConfig},
};

/// Severity level for a diagnostic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    Error,
    Warning,
    Info,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Error => write!(f, "error"),
            Self::Warning => write!(f, "warning"),
            Self::Info => write!(f, "info"),
        }
    }
}

/// A single validation diagnostic.
#[derive(Debug, Clone)]
pub struct Diagnostic {
    pub severity: Severity,
    /// Category: "syntax", "unknown-field", "duplicate-name", "command",
    /// "health-check", "url", "template"
    pub category: &'static str,
    /// Dotted path, e.g. "servers.proxied.stdio[0].command"
    pub path: String,
    pub message: String,
}

impl Diagnostic {
    fn new(
        severity: Severity,
        category: &'static str,
        path: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            severity,
            category,
            path: path.into(),
            message: message.into(),
        }
    }
}

/// Result of validating a configuration.
#[derive(Debug, Clone, Default)]
pub struct ValidationResult {
    pub diagnostics: Vec<Diagnostic>,
    pub config_path: Option<PathBuf>,
}

impl ValidationResult {
    /// Returns `true` if any diagnostic is an error.
    #[must_use]
    pub fn has_errors(&self) -> bool {
        self.diagnostics
            .iter()
            .any(|d| d.severity == Severity::Error)
    }

    /// Count diagnostics by severity.
    #[must_use]
    pub fn count(&self, severity: Severity) -> usize {
        self.diagnostics
            .iter()
            .filter(|d| d.severity == severity)
            .count()
    }
}

const TOP_LEVEL_SECTIONS: &[&str] = &[
    "composer",
    "transport",
    "servers",
    "tool_manager",
    "monitoring",
];

/// Validate a config file at the given path, or the discovered default when
/// `path` is `None`.
#[must_use]
pub fn validate_file(path: Option<&Path>) -> ValidationResult {
    let config_path = match path {
        Some(p) => Some(p.to_path_buf()),
        None => loader::find_config_file(),
    };

    let Some(actual_path) = config_path else {
        return ValidationResult {
            diagnostics: vec![Diagnostic::new(
                Severity::Info,
                "syntax",
                "",
                "no config file found; using defaults",
            )],
            config_path: None,
        };
    };

    let mut diagnostics = Vec::new();

    match loader::load_config_value(&actual_path) {
        Ok(value) => check_unknown_sections(&value, &mut diagnostics),
        Err(e) => {
            diagnostics.push(Diagnostic::new(
                Severity::Error,
                "syntax",
                "",
                e.to_string(),
            ));
            return ValidationResult {
                diagnostics,
                config_path: Some(actual_path),
            };
        },
    }

    match loader::load_config(&actual_path) {
        Ok(config) => diagnostics.extend(validate_config(&config).diagnostics),
        Err(e) => diagnostics.push(Diagnostic::new(
            Severity::Error,
            "syntax",
            "",
            format!("type error: {e}"),
        )),
    }

    ValidationResult {
        diagnostics,
        config_path: Some(actual_path),
    }
}

/// Semantic checks on an already parsed config.
#[must_use]
pub fn validate_config(config: &McpComposerConfig) -> ValidationResult {
    let mut diagnostics = Vec::new();
    check_duplicate_names(config, &mut diagnostics);
    check_stdio_servers(config, &mut diagnostics);
    check_sse_servers(config, &mut diagnostics);
    check_tool_manager(config, &mut diagnostics);
    ValidationResult {
        diagnostics,
        config_path: None,
    }
}

fn check_unknown_sections(value: &serde_json::Value, diagnostics: &mut Vec<Diagnostic>) {
    let Some(table) = value.as_object() else {
        return;
    };
    for key in table.keys() {
        if TOP_LEVEL_SECTIONS.contains(&key.as_str()) {
            continue;
        }
        let message = match suggest(key, TOP_LEVEL_SECTIONS, 3) {
            Some(s) => format!("unknown section (did you mean \"{s}\"?)"),
            None => "unknown section".to_string(),
        };
        diagnostics.push(Diagnostic::new(
            Severity::Warning,
            "unknown-field",
            key.clone(),
            message,
        ));
    }
}

fn check_duplicate_names(config: &McpComposerConfig, diagnostics: &mut Vec<Diagnostic>) {
    let mut seen = HashSet::new();
    for name in config.server_names() {
        if !seen.insert(name) {
            diagnostics.push(Diagnostic::new(
                Severity::Error,
                "duplicate-name",
                "servers",
                format!("server name \"{name}\" is used more than once"),
            ));
        }
    }
}

fn check_stdio_servers(config: &McpComposerConfig, diagnostics: &mut Vec<Diagnostic>) {
    for (i, server) in config.servers.proxied.stdio.iter().enumerate() {
        let path = format!("servers.proxied.stdio[{i}]");
        if server.command.first().is_none_or(|p| p.trim().is_empty()) {
            diagnostics.push(Diagnostic::new(
                Severity::Error,
                "command",
                format!("{path}.command"),
                format!("server \"{}\" has an empty command", server.name),
            ));
        }
        if server.health_check_enabled
            && server.health_check_method == HealthCheckMethod::Tool
            && server.health_check_tool.is_none()
        {
            diagnostics.push(Diagnostic::new(
                Severity::Error,
                "health-check",
                format!("{path}.health_check_tool"),
                format!(
                    "server \"{}\": health_check_method is \"tool\" but health_check_tool is not set",
                    server.name
                ),
            ));
        }
        if server.health_check_enabled && server.health_check_interval == 0 {
            diagnostics.push(Diagnostic::new(
                Severity::Warning,
                "health-check",
                format!("{path}.health_check_interval"),
                "health_check_interval of 0 disables the check",
            ));
        }
    }
}

fn check_sse_servers(config: &McpComposerConfig, diagnostics: &mut Vec<Diagnostic>) {
    for (i, server) in config.servers.proxied.sse.iter().enumerate() {
        match url::Url::parse(&server.url) {
            Ok(url) if matches!(url.scheme(), "http" | "https") => {},
            Ok(url) => diagnostics.push(Diagnostic::new(
                Severity::Error,
                "url",
                format!("servers.proxied.sse[{i}].url"),
                format!("unsupported scheme \"{}\"", url.scheme()),
            )),
            Err(e) => diagnostics.push(Diagnostic::new(
                Severity::Error,
                "url",
                format!("servers.proxied.sse[{i}].url"),
                format!("invalid URL: {e}"),
            )),
        }
    }
}

fn check_tool_manager(config: &McpComposerConfig, diagnostics: &mut Vec<Diagnostic>) {
    let tm = &config.tool_manager;
    let tool_strategy = tm
        .conflict_resolution
        .unwrap_or(config.composer.conflict_resolution);
    let uses_custom = tool_strategy == ConflictResolution::Custom
        || tm
            .tool_overrides
            .iter()
            .any(|o| o.resolution == ConflictResolution::Custom);
    if uses_custom && !tm.custom_template.template.contains("{tool_name}") {
        diagnostics.push(Diagnostic::new(
            Severity::Warning,
            "template",
            "tool_manager.custom_template.template",
            "template has no {tool_name} placeholder; every conflict will resolve to the same name",
        ));
    }
    for (i, o) in tm.tool_overrides.iter().enumerate() {
        if o.tool_pattern.is_empty() {
            diagnostics.push(Diagnostic::new(
                Severity::Warning,
                "template",
                format!("tool_manager.tool_overrides[{i}].tool_pattern"),
                "empty pattern never matches",
            ));
        }
    }
    if tm.versioning.enabled && !tm.versioning.version_suffix_format.contains("{version}") {
        diagnostics.push(Diagnostic::new(
            Severity::Warning,
            "template",
            "tool_manager.versioning.version_suffix_format",
            "suffix format has no {version} placeholder",
        ));
    }
}

// ── Levenshtein distance ────────────────────────────────────────────────────

fn levenshtein(a: &str, b: &str) -> usize {
    let b_chars: Vec<char> = b.chars().collect();
    let mut prev: Vec<usize> = (0..=b_chars.len()).collect();
    let mut curr = vec![0; b_chars.len() + 1];

    for (i, ca) in a.chars().enumerate() {
        curr[0] = i + 1;
        for (j, cb) in b_chars.iter().enumerate() {
            let cost = usize::from(ca != *cb);
            curr[j + 1] = (prev[j] + cost).min(prev[j + 1] + 1).min(curr[j] + 1);
        }
        std::mem::swap(&mut prev, &mut curr);
    }
    prev[b_chars.len()]
}

fn suggest<'a>(needle: &str, candidates: &[&'a str], max_distance: usize) -> Option<&'a str> {
    candidates
        .iter()
        .map(|&c| (c, levenshtein(needle, c)))
        .filter(|&(_, d)| d > 0 && d <= max_distance)
        .min_by_key(|&(_, d)| d)
        .map(|(c, _)| c)
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{
        EmbeddedServerConfig, SseProxiedServerConfig, StdioProxiedServerConfig,
        ToolOverrideConfig,
    };

    #[test]
    fn default_config_is_clean() {
        let result = validate_config(&McpComposerConfig::default());
        assert!(result.diagnostics.is_empty());
    }

    #[test]
    fn flags_duplicate_server_names() {
        let mut cfg = McpComposerConfig::default();
        cfg.servers
            .proxied
            .stdio
            .push(StdioProxiedServerConfig::new("calc", vec!["cat".into()]));
        cfg.servers.embedded.servers.push(EmbeddedServerConfig {
            name: "calc".into(),
            package: "calc".into(),
            enabled: true,
            version: None,
            tool_mappings: Default::default(),
        });
        let result = validate_config(&cfg);
        assert!(result.has_errors());
        assert_eq!(result.diagnostics[0].category, "duplicate-name");
    }

    #[test]
    fn flags_empty_command_and_missing_health_tool() {
        let mut cfg = McpComposerConfig::default();
        let mut server = StdioProxiedServerConfig::new("calc", vec![]);
        server.health_check_enabled = true;
        cfg.servers.proxied.stdio.push(server);
        let result = validate_config(&cfg);
        assert_eq!(result.count(Severity::Error), 2);
        assert!(
            result
                .diagnostics
                .iter()
                .any(|d| d.path == "servers.proxied.stdio[0].health_check_tool")
        );
    }

    #[test]
    fn flags_bad_sse_url() {
        let mut cfg = McpComposerConfig::default();
        cfg.servers
            .proxied
            .sse
            .push(SseProxiedServerConfig::new("remote", "not a url"));
        cfg.servers
            .proxied
            .sse
            .push(SseProxiedServerConfig::new("ftp", "ftp://example.com"));
        let result = validate_config(&cfg);
        assert_eq!(result.count(Severity::Error), 2);
    }

    #[test]
    fn warns_on_template_without_tool_name() {
        let mut cfg = McpComposerConfig::default();
        cfg.tool_manager.tool_overrides.push(ToolOverrideConfig {
            tool_pattern: "db_*".into(),
            resolution: ConflictResolution::Custom,
        });
        cfg.tool_manager.custom_template.template = "{server_name}_tool".into();
        let result = validate_config(&cfg);
        assert_eq!(result.count(Severity::Warning), 1);
        assert!(!result.has_errors());
    }

    #[test]
    fn file_with_misspelled_section() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mcp_composer.toml");
        std::fs::write(&path, "[servrs]\n[composer]\nname = \"x\"\n").unwrap();
        let result = validate_file(Some(&path));
        assert_eq!(result.config_path.as_deref(), Some(path.as_path()));
        let d = &result.diagnostics[0];
        assert_eq!(d.path, "servrs");
        assert!(d.message.contains("did you mean \"servers\""));
    }

    #[test]
    fn file_with_syntax_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mcp_composer.toml");
        std::fs::write(&path, "[composer\n").unwrap();
        let result = validate_file(Some(&path));
        assert!(result.has_errors());
        assert_eq!(result.diagnostics[0].category, "syntax");
    }

    #[test]
    fn suggest_picks_closest() {
        assert_eq!(suggest("transprt", TOP_LEVEL_SECTIONS, 3), Some("transport"));
        assert_eq!(suggest("zzzzzzzz", TOP_LEVEL_SECTIONS, 3), None);
    }
}
