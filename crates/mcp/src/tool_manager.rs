//! Naming of composed tools: conflict strategies, per-tool overrides,
//! versioned slots and aliases.
//!
//! Every `(server, tool)` pair is placed exactly once, at registration time.
//! The first server to claim a bare name keeps it; later claimants are
//! handled by the strategy that applies to that name.

use std::{
    collections::{BTreeSet, HashMap},
    fmt,
};

use {
    composer_config::{ConflictResolution, ToolManagerConfig},
    serde::Serialize,
    tracing::{debug, info, warn},
};

#[cfg(feature = "metrics")]
use composer_metrics::{counter, gauge, labels, tools as tools_metrics};

use crate::{
    error::{Result, ToolConflictError},
    types::McpToolDef,
};

// ── Components and records ──────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ComponentKind {
    Tool,
    Prompt,
    Resource,
}

impl ComponentKind {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Tool => "tool",
            Self::Prompt => "prompt",
            Self::Resource => "resource",
        }
    }
}

impl fmt::Display for ComponentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A tool as it appears in the composed surface.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RegisteredTool {
    /// Externally visible name.
    pub name: String,
    /// Name the source server uses.
    pub original_name: String,
    pub server_name: String,
    /// Definition with `name` rewritten to the visible name.
    pub definition: McpToolDef,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

/// One resolved naming conflict.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConflictRecord {
    pub kind: ComponentKind,
    /// The contested name.
    pub name: String,
    /// Holder of the name first, newcomer second.
    pub servers: Vec<String>,
    pub strategy: ConflictResolution,
    /// Name the newcomer ended up with (the contested name for
    /// `override` and `ignore`).
    pub resolved_name: String,
}

/// Outcome of placing a single tool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Registration {
    /// Stored under `name`, which may differ from the original.
    Added { name: String },
    /// Took over `name` from `previous_server`.
    Replaced {
        name: String,
        previous_server: String,
    },
    /// Dropped; `name` keeps pointing at the current holder.
    Ignored { name: String },
}

impl Registration {
    #[must_use]
    pub fn name(&self) -> &str {
        match self {
            Self::Added { name } | Self::Replaced { name, .. } | Self::Ignored { name } => name,
        }
    }

    /// Whether the newcomer now backs [`Self::name`].
    #[must_use]
    pub fn is_stored(&self) -> bool {
        !matches!(self, Self::Ignored { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ToolManagerSummary {
    pub total_tools: usize,
    pub total_aliases: usize,
    pub conflicts_resolved: usize,
    pub servers: usize,
    pub versioning_enabled: bool,
    pub versioned_tools: usize,
}

// ── Naming policy ───────────────────────────────────────────────────────────

/// Where a component that collides with an existing name ends up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Placement {
    Renamed(String),
    Replace,
    Keep,
    Reject,
}

/// Apply `strategy` to a collision on `name`.
///
/// Renaming strategies never return a taken name: `_1`, `_2`, ... is appended
/// to the rendered name until `is_taken` says it is free.
pub(crate) fn place_conflict(
    strategy: ConflictResolution,
    name: &str,
    server: &str,
    template: &str,
    is_taken: impl Fn(&str) -> bool,
) -> Placement {
    let base = match strategy {
        ConflictResolution::Override => return Placement::Replace,
        ConflictResolution::Ignore => return Placement::Keep,
        ConflictResolution::Error => return Placement::Reject,
        ConflictResolution::Prefix => format!("{server}_{name}"),
        ConflictResolution::Suffix => format!("{name}_{server}"),
        ConflictResolution::Custom => render_template(template, server, name),
    };
    Placement::Renamed(first_free(base, is_taken))
}

fn first_free(base: String, is_taken: impl Fn(&str) -> bool) -> String {
    let mut candidate = base.clone();
    let mut counter = 1u32;
    while is_taken(&candidate) {
        candidate = format!("{base}_{counter}");
        counter += 1;
    }
    candidate
}

pub(crate) fn render_template(template: &str, server: &str, name: &str) -> String {
    template
        .replace("{server_name}", server)
        .replace("{tool_name}", name)
}

/// Shell-style match supporting `*` (any run) and `?` (one character).
pub(crate) fn glob_match(pattern: &str, text: &str) -> bool {
    let pattern: Vec<char> = pattern.chars().collect();
    let text: Vec<char> = text.chars().collect();
    let (mut p, mut t) = (0, 0);
    let mut backtrack: Option<(usize, usize)> = None;

    while t < text.len() {
        match pattern.get(p) {
            Some('*') => {
                backtrack = Some((p, t));
                p += 1;
            },
            Some(&c) if c == '?' || c == text[t] => {
                p += 1;
                t += 1;
            },
            _ => match backtrack {
                Some((star, consumed)) => {
                    p = star + 1;
                    t = consumed + 1;
                    backtrack = Some((star, consumed + 1));
                },
                None => return false,
            },
        }
    }
    pattern[p..].iter().all(|&c| c == '*')
}

// ── ToolManager ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct ToolManager {
    config: ToolManagerConfig,
    strategy: ConflictResolution,
    tools: HashMap<String, RegisteredTool>,
    /// Visible names in registration order; an override keeps its slot.
    order: Vec<String>,
    aliases: HashMap<String, String>,
    /// Base name to `(version, visible name)` pairs.
    tool_versions: HashMap<String, Vec<(String, String)>>,
    conflicts: Vec<ConflictRecord>,
}

impl Default for ToolManager {
    fn default() -> Self {
        Self::new(ToolManagerConfig::default())
    }
}

impl ToolManager {
    pub fn new(config: ToolManagerConfig) -> Self {
        let strategy = config.conflict_resolution.unwrap_or_default();
        let aliases = config.aliases.clone();
        Self {
            config,
            strategy,
            tools: HashMap::new(),
            order: Vec::new(),
            aliases,
            tool_versions: HashMap::new(),
            conflicts: Vec::new(),
        }
    }

    pub fn config(&self) -> &ToolManagerConfig {
        &self.config
    }

    /// Global strategy, used when no override pattern matches.
    pub fn strategy(&self) -> ConflictResolution {
        self.strategy
    }

    /// Strategy for `tool_name`: the first matching override, else the global one.
    pub fn strategy_for(&self, tool_name: &str) -> ConflictResolution {
        self.config
            .tool_overrides
            .iter()
            .find(|o| glob_match(&o.tool_pattern, tool_name))
            .map_or(self.strategy, |o| o.resolution)
    }

    /// Register every tool of `server_name`, in order.
    ///
    /// Returns original name to visible name for every input tool. Under
    /// the `error` strategy the first collision aborts the call; tools placed
    /// before it stay registered.
    pub fn register_tools(
        &mut self,
        server_name: &str,
        tools: impl IntoIterator<Item = McpToolDef>,
        server_version: Option<&str>,
    ) -> Result<HashMap<String, String>> {
        let mut mapping = HashMap::new();
        for def in tools {
            let original = def.name.clone();
            let registration = self.register_tool(server_name, def, server_version)?;
            mapping.insert(original, registration.name().to_string());
        }
        info!(server = %server_name, count = mapping.len(), "registered tools");
        Ok(mapping)
    }

    /// Place a single tool.
    pub fn register_tool(
        &mut self,
        server_name: &str,
        def: McpToolDef,
        server_version: Option<&str>,
    ) -> std::result::Result<Registration, ToolConflictError> {
        let original = def.name.clone();
        let versioning = &self.config.versioning;
        let wanted = match server_version {
            Some(version) if versioning.enabled && versioning.allow_multiple_versions => {
                let suffix = versioning
                    .version_suffix_format
                    .replace("{version}", version);
                format!("{original}{suffix}")
            },
            _ => original.clone(),
        };
        let version = server_version.map(str::to_string);

        let holder = self.tools.get(&wanted).map(|t| t.server_name.clone());
        let registration = match holder {
            None => {
                self.insert(&wanted, &original, server_name, def, version.clone());
                Registration::Added { name: wanted }
            },
            Some(holder) => {
                let strategy = self.strategy_for(&original);
                let placement = place_conflict(
                    strategy,
                    &wanted,
                    server_name,
                    &self.config.custom_template.template,
                    |n| self.tools.contains_key(n),
                );
                let registration = match placement {
                    Placement::Reject => {
                        warn!(tool = %wanted, existing = %holder, server = %server_name, "tool name conflict rejected");
                        return Err(ToolConflictError {
                            tool: wanted,
                            servers: vec![holder, server_name.to_string()],
                        });
                    },
                    Placement::Keep => {
                        warn!(tool = %wanted, existing = %holder, server = %server_name, "ignoring duplicate tool");
                        Registration::Ignored {
                            name: wanted.clone(),
                        }
                    },
                    Placement::Replace => {
                        info!(tool = %wanted, existing = %holder, server = %server_name, "overriding tool");
                        self.insert(&wanted, &original, server_name, def, version.clone());
                        Registration::Replaced {
                            name: wanted.clone(),
                            previous_server: holder.clone(),
                        }
                    },
                    Placement::Renamed(name) => {
                        info!(tool = %wanted, resolved = %name, server = %server_name, %strategy, "resolved tool name conflict");
                        self.insert(&name, &original, server_name, def, version.clone());
                        Registration::Added { name }
                    },
                };
                self.record_conflict(ConflictRecord {
                    kind: ComponentKind::Tool,
                    name: wanted,
                    servers: vec![holder, server_name.to_string()],
                    strategy,
                    resolved_name: registration.name().to_string(),
                });
                registration
            },
        };

        if let Some(version) = version
            && self.config.versioning.enabled
            && registration.is_stored()
        {
            self.tool_versions
                .entry(original)
                .or_default()
                .push((version, registration.name().to_string()));
        }
        record_registered(self.tools.len());
        Ok(registration)
    }

    fn insert(
        &mut self,
        name: &str,
        original: &str,
        server_name: &str,
        mut definition: McpToolDef,
        version: Option<String>,
    ) {
        definition.name = name.to_string();
        let tool = RegisteredTool {
            name: name.to_string(),
            original_name: original.to_string(),
            server_name: server_name.to_string(),
            definition,
            version,
        };
        if self.tools.insert(name.to_string(), tool).is_none() {
            self.order.push(name.to_string());
        }
    }

    fn record_conflict(&mut self, record: ConflictRecord) {
        record_conflict_metric(record.strategy);
        self.conflicts.push(record);
    }

    /// Drop a visible tool. Aliases pointing at it are left in place.
    pub fn remove_tool(&mut self, name: &str) -> Option<RegisteredTool> {
        let removed = self.tools.remove(name)?;
        self.order.retain(|n| n != name);
        for versions in self.tool_versions.values_mut() {
            versions.retain(|(_, visible)| visible != name);
        }
        self.tool_versions.retain(|_, versions| !versions.is_empty());
        record_registered(self.tools.len());
        Some(removed)
    }

    /// Visible name under which `server_name` currently serves `original_name`.
    pub fn visible_name(&self, server_name: &str, original_name: &str) -> Option<&str> {
        self.order
            .iter()
            .filter_map(|n| self.tools.get(n))
            .find(|t| t.server_name == server_name && t.original_name == original_name)
            .map(|t| t.name.as_str())
    }

    // ── Aliases ─────────────────────────────────────────────────────────────

    /// Add an alias. The target is resolved on lookup, so it may be
    /// registered later.
    pub fn add_alias(&mut self, alias: impl Into<String>, target: impl Into<String>) {
        let alias = alias.into();
        let target = target.into();
        if !self.tools.contains_key(&target) {
            debug!(%alias, %target, "alias target is not registered yet");
        }
        info!(%alias, %target, "added alias");
        self.aliases.insert(alias, target);
    }

    /// Single-hop alias lookup; unknown names come back unchanged.
    pub fn resolve_alias<'a>(&'a self, name: &'a str) -> &'a str {
        self.aliases.get(name).map_or(name, String::as_str)
    }

    pub fn list_aliases(&self) -> &HashMap<String, String> {
        &self.aliases
    }

    // ── Lookups ─────────────────────────────────────────────────────────────

    /// Look up by visible name or alias.
    pub fn get_tool(&self, name: &str) -> Option<&RegisteredTool> {
        self.tools.get(self.resolve_alias(name))
    }

    /// All tools in registration order.
    pub fn get_tools(&self) -> Vec<&RegisteredTool> {
        self.order.iter().filter_map(|n| self.tools.get(n)).collect()
    }

    pub fn get_tool_source(&self, name: &str) -> Option<&str> {
        self.get_tool(name).map(|t| t.server_name.as_str())
    }

    /// `(version, visible name)` pairs registered for a base name.
    pub fn get_tool_versions(&self, base_name: &str) -> &[(String, String)] {
        self.tool_versions
            .get(base_name)
            .map_or(&[][..], Vec::as_slice)
    }

    /// Visible names in registration order, optionally for one server.
    pub fn list_tools(&self, server_name: Option<&str>) -> Vec<String> {
        self.get_tools()
            .into_iter()
            .filter(|t| server_name.is_none_or(|s| t.server_name == s))
            .map(|t| t.name.clone())
            .collect()
    }

    pub fn get_conflicts(&self) -> &[ConflictRecord] {
        &self.conflicts
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    pub fn get_summary(&self) -> ToolManagerSummary {
        let servers: BTreeSet<&str> = self
            .tools
            .values()
            .map(|t| t.server_name.as_str())
            .collect();
        let versioning_enabled = self.config.versioning.enabled;
        ToolManagerSummary {
            total_tools: self.tools.len(),
            total_aliases: self.aliases.len(),
            conflicts_resolved: self.conflicts.len(),
            servers: servers.len(),
            versioning_enabled,
            versioned_tools: if versioning_enabled {
                self.tool_versions.len()
            } else {
                0
            },
        }
    }

    /// Forget every tool and conflict; aliases go back to the configured set.
    pub fn clear(&mut self) {
        self.tools.clear();
        self.order.clear();
        self.tool_versions.clear();
        self.conflicts.clear();
        self.aliases = self.config.aliases.clone();
        record_registered(0);
        info!("tool manager cleared");
    }
}

#[cfg(feature = "metrics")]
fn record_conflict_metric(strategy: ConflictResolution) {
    counter!(tools_metrics::CONFLICTS_TOTAL, labels::STRATEGY => strategy.as_str()).increment(1);
}

#[cfg(not(feature = "metrics"))]
fn record_conflict_metric(_strategy: ConflictResolution) {}

#[cfg(feature = "metrics")]
fn record_registered(count: usize) {
    gauge!(tools_metrics::REGISTERED).set(count as f64);
}

#[cfg(not(feature = "metrics"))]
fn record_registered(_count: usize) {}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {
        super::*,
        composer_config::{ToolOverrideConfig, VersioningConfig},
        rstest::rstest,
    };

    fn tool(name: &str) -> McpToolDef {
        McpToolDef::new(name, format!("{name} tool"))
    }

    fn manager(strategy: ConflictResolution) -> ToolManager {
        ToolManager::new(ToolManagerConfig {
            conflict_resolution: Some(strategy),
            ..Default::default()
        })
    }

    fn names(tm: &ToolManager) -> Vec<String> {
        tm.list_tools(None)
    }

    #[test]
    fn prefix_keeps_first_writer_bare() {
        let mut tm = manager(ConflictResolution::Prefix);
        let first = tm.register_tools("server1", [tool("t")], None).unwrap();
        let second = tm.register_tools("server2", [tool("t")], None).unwrap();

        assert_eq!(first["t"], "t");
        assert_eq!(second["t"], "server2_t");
        assert_eq!(names(&tm), vec!["t", "server2_t"]);
        assert_eq!(tm.get_tool_source("server2_t"), Some("server2"));
    }

    #[test]
    fn calc_and_string_servers_conflict_once() {
        let mut tm = manager(ConflictResolution::Prefix);
        tm.register_tools("calc_server", [tool("add")], None)
            .unwrap();
        tm.register_tools("string_server", [tool("add")], None)
            .unwrap();

        assert_eq!(names(&tm), vec!["add", "string_server_add"]);
        let conflicts = tm.get_conflicts();
        assert_eq!(conflicts.len(), 1);
        assert_eq!(conflicts[0].servers, vec!["calc_server", "string_server"]);
        assert_eq!(conflicts[0].resolved_name, "string_server_add");
        assert_eq!(conflicts[0].strategy, ConflictResolution::Prefix);
    }

    #[test]
    fn prefix_three_way_gets_counter() {
        let mut tm = manager(ConflictResolution::Prefix);
        tm.register_tools("a", [tool("t")], None).unwrap();
        tm.register_tools("b", [tool("t")], None).unwrap();
        // Same server name again: `b_t` is taken, so a counter is appended.
        let third = tm.register_tools("b", [tool("t")], None).unwrap();

        assert_eq!(third["t"], "b_t_1");
        assert_eq!(names(&tm), vec!["t", "b_t", "b_t_1"]);
        assert_eq!(tm.get_conflicts().len(), 2);
    }

    #[test]
    fn error_strategy_leaves_first_entry_untouched() {
        let mut tm = manager(ConflictResolution::Error);
        tm.register_tools("calc", [tool("add")], None).unwrap();

        let err = tm
            .register_tools("math", [tool("add")], None)
            .unwrap_err();
        match err {
            crate::error::Error::ToolConflict(conflict) => {
                assert_eq!(conflict.tool, "add");
                assert_eq!(conflict.servers, vec!["calc", "math"]);
            },
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(tm.get_tool_source("add"), Some("calc"));
        assert_eq!(tm.len(), 1);
        assert!(tm.get_conflicts().is_empty());
    }

    #[test]
    fn error_strategy_keeps_tools_placed_before_the_conflict() {
        let mut tm = manager(ConflictResolution::Error);
        tm.register_tools("calc", [tool("add")], None).unwrap();
        assert!(
            tm.register_tools("math", [tool("mul"), tool("add"), tool("div")], None)
                .is_err()
        );
        assert_eq!(names(&tm), vec!["add", "mul"]);
    }

    #[test]
    fn ignore_maps_to_existing_name() {
        let mut tm = manager(ConflictResolution::Ignore);
        tm.register_tools("calc", [tool("add")], None).unwrap();
        let mapping = tm.register_tools("math", [tool("add")], None).unwrap();

        assert_eq!(mapping["add"], "add");
        assert_eq!(tm.get_tool_source("add"), Some("calc"));
        assert_eq!(tm.get_conflicts().len(), 1);
        assert_eq!(tm.get_conflicts()[0].resolved_name, "add");
    }

    #[test]
    fn override_keeps_position_and_switches_source() {
        let mut tm = manager(ConflictResolution::Override);
        tm.register_tools("calc", [tool("add"), tool("sub")], None)
            .unwrap();
        let registration = tm.register_tool("math", tool("add"), None).unwrap();

        assert_eq!(
            registration,
            Registration::Replaced {
                name: "add".into(),
                previous_server: "calc".into(),
            }
        );
        assert_eq!(names(&tm), vec!["add", "sub"]);
        assert_eq!(tm.get_tool_source("add"), Some("math"));
    }

    #[rstest]
    #[case(ConflictResolution::Prefix, "srv2_echo")]
    #[case(ConflictResolution::Suffix, "echo_srv2")]
    #[case(ConflictResolution::Override, "echo")]
    #[case(ConflictResolution::Ignore, "echo")]
    #[case(ConflictResolution::Custom, "srv2_echo")]
    fn second_writer_name_by_strategy(
        #[case] strategy: ConflictResolution,
        #[case] expected: &str,
    ) {
        let mut tm = manager(strategy);
        tm.register_tools("srv1", [tool("echo")], None).unwrap();
        let mapping = tm.register_tools("srv2", [tool("echo")], None).unwrap();
        assert_eq!(mapping["echo"], expected);
    }

    #[test]
    fn custom_template_is_rendered() {
        let mut cfg = ToolManagerConfig {
            conflict_resolution: Some(ConflictResolution::Custom),
            ..Default::default()
        };
        cfg.custom_template.template = "{tool_name}@{server_name}".into();
        let mut tm = ToolManager::new(cfg);
        tm.register_tools("a", [tool("read")], None).unwrap();
        let mapping = tm.register_tools("b", [tool("read")], None).unwrap();
        assert_eq!(mapping["read"], "read@b");
    }

    #[test]
    fn override_pattern_wins_over_global_strategy() {
        let cfg = ToolManagerConfig {
            conflict_resolution: Some(ConflictResolution::Prefix),
            tool_overrides: vec![
                ToolOverrideConfig {
                    tool_pattern: "read_*".into(),
                    resolution: ConflictResolution::Suffix,
                },
                ToolOverrideConfig {
                    tool_pattern: "read_file".into(),
                    resolution: ConflictResolution::Error,
                },
            ],
            ..Default::default()
        };
        let mut tm = ToolManager::new(cfg);
        assert_eq!(tm.strategy_for("read_file"), ConflictResolution::Suffix);
        assert_eq!(tm.strategy_for("write_file"), ConflictResolution::Prefix);

        tm.register_tools("a", [tool("read_file"), tool("write_file")], None)
            .unwrap();
        let mapping = tm
            .register_tools("b", [tool("read_file"), tool("write_file")], None)
            .unwrap();
        assert_eq!(mapping["read_file"], "read_file_b");
        assert_eq!(mapping["write_file"], "b_write_file");
    }

    #[test]
    fn every_visible_name_is_unique() {
        let mut tm = manager(ConflictResolution::Suffix);
        for server in ["a", "b", "a", "c", "b"] {
            tm.register_tools(server, [tool("x"), tool("x_b")], None)
                .unwrap();
        }
        let listed = names(&tm);
        let unique: BTreeSet<&String> = listed.iter().collect();
        assert_eq!(unique.len(), listed.len());
        assert_eq!(listed.len(), 10);
        assert_eq!(tm.get_conflicts().len(), 8);
    }

    #[test]
    fn multiple_versions_get_their_own_slot() {
        let cfg = ToolManagerConfig {
            versioning: VersioningConfig {
                enabled: true,
                allow_multiple_versions: true,
                ..Default::default()
            },
            ..Default::default()
        };
        let mut tm = ToolManager::new(cfg);
        let v1 = tm.register_tools("calc", [tool("add")], Some("1")).unwrap();
        let v2 = tm.register_tools("calc", [tool("add")], Some("2")).unwrap();

        assert_eq!(v1["add"], "add_v1");
        assert_eq!(v2["add"], "add_v2");
        assert!(tm.get_conflicts().is_empty());
        assert_eq!(
            tm.get_tool_versions("add"),
            &[
                ("1".to_string(), "add_v1".to_string()),
                ("2".to_string(), "add_v2".to_string())
            ]
        );
        assert_eq!(tm.get_summary().versioned_tools, 1);
    }

    #[test]
    fn single_version_mode_tracks_without_renaming() {
        let cfg = ToolManagerConfig {
            versioning: VersioningConfig {
                enabled: true,
                ..Default::default()
            },
            ..Default::default()
        };
        let mut tm = ToolManager::new(cfg);
        let mapping = tm.register_tools("calc", [tool("add")], Some("3")).unwrap();
        assert_eq!(mapping["add"], "add");
        assert_eq!(
            tm.get_tool_versions("add"),
            &[("3".to_string(), "add".to_string())]
        );
        assert!(tm.get_tool_versions("sub").is_empty());
    }

    #[test]
    fn alias_resolution_is_single_hop_and_total() {
        let mut tm = manager(ConflictResolution::Prefix);
        tm.register_tools("calc", [tool("add")], None).unwrap();
        tm.add_alias("sum", "add");
        tm.add_alias("total", "sum");

        assert_eq!(tm.resolve_alias("sum"), "add");
        assert_eq!(tm.resolve_alias("total"), "sum");
        assert_eq!(tm.resolve_alias("unknown"), "unknown");
        assert_eq!(tm.get_tool("sum").map(|t| t.name.as_str()), Some("add"));
        assert!(tm.get_tool("total").is_none());
    }

    #[test]
    fn clear_restores_configured_aliases() {
        let mut cfg = ToolManagerConfig::default();
        cfg.aliases.insert("plus".into(), "add".into());
        let mut tm = ToolManager::new(cfg);
        tm.register_tools("calc", [tool("add")], None).unwrap();
        tm.add_alias("sum", "add");
        assert_eq!(tm.list_aliases().len(), 2);

        tm.clear();
        assert!(tm.is_empty());
        assert_eq!(tm.list_aliases().len(), 1);
        assert_eq!(tm.resolve_alias("plus"), "add");
    }

    #[test]
    fn summary_and_server_filter() {
        let mut tm = manager(ConflictResolution::Prefix);
        tm.register_tools("calc", [tool("add"), tool("sub")], None)
            .unwrap();
        tm.register_tools("text", [tool("add"), tool("upper")], None)
            .unwrap();

        assert_eq!(tm.list_tools(Some("text")), vec!["text_add", "upper"]);
        assert_eq!(tm.visible_name("text", "add"), Some("text_add"));
        assert_eq!(tm.get_summary(), ToolManagerSummary {
            total_tools: 4,
            total_aliases: 0,
            conflicts_resolved: 1,
            servers: 2,
            versioning_enabled: false,
            versioned_tools: 0,
        });
    }

    #[test]
    fn remove_tool_frees_the_name() {
        let mut tm = manager(ConflictResolution::Prefix);
        tm.register_tools("calc", [tool("add")], None).unwrap();
        assert!(tm.remove_tool("add").is_some());
        assert!(tm.remove_tool("add").is_none());
        let mapping = tm.register_tools("text", [tool("add")], None).unwrap();
        assert_eq!(mapping["add"], "add");
    }

    #[test]
    fn registered_definition_carries_visible_name() {
        let mut tm = manager(ConflictResolution::Suffix);
        tm.register_tools("a", [tool("echo")], None).unwrap();
        tm.register_tools("b", [tool("echo")], None).unwrap();
        let registered = tm.get_tool("echo_b").unwrap();
        assert_eq!(registered.definition.name, "echo_b");
        assert_eq!(registered.original_name, "echo");
    }

    #[rstest]
    #[case("read_*", "read_file", true)]
    #[case("read_*", "write_file", false)]
    #[case("*_file", "read_file", true)]
    #[case("*", "", true)]
    #[case("get_?", "get_a", true)]
    #[case("get_?", "get_ab", false)]
    #[case("a*b*c", "aXbYbZc", true)]
    #[case("a*b*c", "aXbYbZ", false)]
    #[case("exact", "exact", true)]
    fn glob_patterns(#[case] pattern: &str, #[case] text: &str, #[case] expected: bool) {
        assert_eq!(glob_match(pattern, text), expected);
    }
}
