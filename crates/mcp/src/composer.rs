//! The composer: one MCP surface assembled from embedded, STDIO and SSE servers.
//!
//! Composition is per server and failures stay per server: a server that
//! cannot be spawned, imported or discovered is reported in the summary's
//! `errors` while the rest of the composition goes ahead.

use std::{
    collections::{BTreeMap, BTreeSet, HashMap},
    future::Future,
    path::Path,
    sync::{
        Arc, Weak,
        atomic::{AtomicBool, Ordering},
    },
    time::{Duration, Instant},
};

use {
    composer_config::{
        ConflictResolution, EmbeddedServerConfig, McpComposerConfig, ProxyMode, RestartPolicy,
        SseProxiedServerConfig, StdioProxiedServerConfig, ToolManagerConfig,
    },
    serde::Serialize,
    serde_json::Value,
    tokio::{
        sync::{Mutex, RwLock, broadcast},
        task::JoinHandle,
    },
    tokio_util::sync::CancellationToken,
    tracing::{debug, error, info, warn},
};

#[cfg(feature = "metrics")]
use composer_metrics::{counter, histogram, labels, tools as tools_metrics};

use crate::{
    auth::AuthContext,
    discovery::{DEFAULT_MANIFEST, discover_from_manifest},
    embedded::{EmbeddedRegistry, EmbeddedTool},
    error::{Error, Result},
    health::HealthProbe,
    process::ProcessInfo,
    process_manager::{ProcessEvent, ProcessManager},
    rpc::{RpcChannel, RpcEndpoint},
    tool_manager::{
        ComponentKind, ConflictRecord, Placement, ToolManager, ToolManagerSummary, place_conflict,
    },
    tool_proxy::{DEFAULT_REQUEST_TIMEOUT, ProxiedTool, ToolProxy},
    translator::{ProtocolTranslator, StdioToSseTranslator, TranslatorManager},
    types::{McpToolDef, PromptDef, ResourceDef},
};

// ── Options ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct ComposerOptions {
    /// Name advertised by the composed server.
    pub name: String,
    /// Strategy for prompts and resources, and for tools unless
    /// `tool_manager.conflict_resolution` is set.
    pub conflict_resolution: ConflictResolution,
    pub tool_manager: ToolManagerConfig,
    /// Proxied STDIO servers cannot be composed without a process manager.
    pub use_process_manager: bool,
    /// Run the process supervisor.
    pub auto_restart: bool,
    /// Only these servers are composed; `None` means all.
    pub include: Option<Vec<String>>,
    pub exclude: Vec<String>,
    /// Timeout for discovery and proxied tool calls.
    pub request_timeout: Duration,
}

impl Default for ComposerOptions {
    fn default() -> Self {
        Self {
            name: "composed-mcp-server".into(),
            conflict_resolution: ConflictResolution::Prefix,
            tool_manager: ToolManagerConfig::default(),
            use_process_manager: false,
            auto_restart: false,
            include: None,
            exclude: Vec::new(),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }
}

impl ComposerOptions {
    pub fn from_config(config: &McpComposerConfig) -> Self {
        Self {
            name: config.composer.name.clone(),
            conflict_resolution: config.composer.conflict_resolution,
            tool_manager: config.tool_manager.clone(),
            use_process_manager: !config.servers.proxied.stdio.is_empty(),
            auto_restart: config.wants_auto_restart(),
            ..Self::default()
        }
    }

    fn selects(&self, server: &str) -> bool {
        let included = self
            .include
            .as_ref()
            .is_none_or(|names| names.iter().any(|n| n == server));
        included && !self.exclude.iter().any(|n| n == server)
    }
}

// ── Tool handlers ───────────────────────────────────────────────────────────

/// What answers a composed tool.
#[derive(Clone)]
pub enum ToolHandler {
    Proxied(ProxiedTool),
    Embedded(Arc<dyn EmbeddedTool>),
}

impl ToolHandler {
    pub async fn invoke(&self, arguments: Value) -> Result<String> {
        match self {
            Self::Proxied(tool) => tool.invoke(arguments).await,
            Self::Embedded(tool) => tool.call(arguments).await,
        }
    }
}

impl std::fmt::Debug for ToolHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Proxied(tool) => f.debug_tuple("Proxied").field(tool).finish(),
            Self::Embedded(tool) => f
                .debug_tuple("Embedded")
                .field(&tool.definition().name)
                .finish(),
        }
    }
}

// ── Summary ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize)]
pub struct CompositionSummary {
    pub composed_server_name: String,
    pub conflict_resolution_strategy: ConflictResolution,
    pub total_tools: usize,
    pub total_prompts: usize,
    pub total_resources: usize,
    /// Distinct servers backing at least one component.
    pub source_servers: usize,
    pub conflicts_resolved: usize,
    pub conflict_details: Vec<ConflictRecord>,
    pub errors: Vec<String>,
}

// ── State ───────────────────────────────────────────────────────────────────

/// Named items in insertion order, each tagged with its source server.
#[derive(Debug, Clone)]
struct Catalog<T> {
    entries: HashMap<String, (String, T)>,
    order: Vec<String>,
}

impl<T> Default for Catalog<T> {
    fn default() -> Self {
        Self {
            entries: HashMap::new(),
            order: Vec::new(),
        }
    }
}

impl<T: Clone> Catalog<T> {
    fn insert(&mut self, name: &str, server: &str, item: T) {
        let entry = (server.to_string(), item);
        if self.entries.insert(name.to_string(), entry).is_none() {
            self.order.push(name.to_string());
        }
    }

    fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    fn source(&self, name: &str) -> Option<&str> {
        self.entries.get(name).map(|(server, _)| server.as_str())
    }

    fn names(&self) -> Vec<String> {
        self.order.clone()
    }

    fn items(&self) -> Vec<T> {
        self.order
            .iter()
            .filter_map(|n| self.entries.get(n))
            .map(|(_, item)| item.clone())
            .collect()
    }

    fn servers(&self) -> impl Iterator<Item = &str> {
        self.entries.values().map(|(server, _)| server.as_str())
    }

    fn len(&self) -> usize {
        self.entries.len()
    }
}

struct State {
    tool_manager: ToolManager,
    handlers: HashMap<String, ToolHandler>,
    prompts: Catalog<PromptDef>,
    resources: Catalog<ResourceDef>,
    /// Prompt and resource conflicts; tool conflicts live in the tool manager.
    conflicts: Vec<ConflictRecord>,
    errors: Vec<String>,
    channels: HashMap<String, Arc<RpcChannel>>,
    stdio_servers: HashMap<String, StdioProxiedServerConfig>,
}

// ── Composer ────────────────────────────────────────────────────────────────

pub struct Composer {
    options: ComposerOptions,
    state: RwLock<State>,
    process_manager: Option<ProcessManager>,
    translators: TranslatorManager,
    embedded: EmbeddedRegistry,
    /// Renewed when starting after a stop.
    cancel: Mutex<CancellationToken>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    watching: AtomicBool,
    stopped: AtomicBool,
}

impl Composer {
    pub fn new(options: ComposerOptions) -> Self {
        let mut tool_config = options.tool_manager.clone();
        tool_config
            .conflict_resolution
            .get_or_insert(options.conflict_resolution);
        let process_manager = options
            .use_process_manager
            .then(|| ProcessManager::new(options.auto_restart));
        Self {
            state: RwLock::new(State {
                tool_manager: ToolManager::new(tool_config),
                handlers: HashMap::new(),
                prompts: Catalog::default(),
                resources: Catalog::default(),
                conflicts: Vec::new(),
                errors: Vec::new(),
                channels: HashMap::new(),
                stdio_servers: HashMap::new(),
            }),
            options,
            process_manager,
            translators: TranslatorManager::new(),
            embedded: EmbeddedRegistry::new(),
            cancel: Mutex::new(CancellationToken::new()),
            tasks: Mutex::new(Vec::new()),
            watching: AtomicBool::new(false),
            stopped: AtomicBool::new(false),
        }
    }

    pub fn from_config(config: &McpComposerConfig) -> Self {
        Self::new(ComposerOptions::from_config(config))
    }

    /// Packages available to `servers.embedded` entries.
    #[must_use]
    pub fn with_embedded(mut self, registry: EmbeddedRegistry) -> Self {
        self.embedded = registry;
        self
    }

    pub fn name(&self) -> &str {
        &self.options.name
    }

    pub fn options(&self) -> &ComposerOptions {
        &self.options
    }

    pub fn process_manager(&self) -> Option<&ProcessManager> {
        self.process_manager.as_ref()
    }

    pub fn translators(&self) -> &TranslatorManager {
        &self.translators
    }

    // ── Composition ─────────────────────────────────────────────────────────

    /// Compose every selected server of `config`.
    ///
    /// Only a structural problem fails the call: STDIO servers configured
    /// while the process manager is disabled. Everything else is recorded in
    /// the returned summary's `errors`.
    pub async fn compose_from_config(
        self: &Arc<Self>,
        config: &McpComposerConfig,
    ) -> Result<CompositionSummary> {
        if !config.servers.proxied.stdio.is_empty() && self.process_manager.is_none() {
            return Err(Error::composition(
                "proxied STDIO servers are configured but the process manager is disabled",
            ));
        }
        info!(composer = %self.options.name, "starting composition from configuration");

        self.start().await;
        self.watch_process_events().await;

        for cfg in &config.servers.embedded.servers {
            if !cfg.enabled {
                info!(server = %cfg.name, "skipping disabled embedded server");
                continue;
            }
            if !self.options.selects(&cfg.name) {
                debug!(server = %cfg.name, "embedded server filtered out");
                continue;
            }
            match self.compose_embedded(cfg).await {
                Ok(()) => info!(server = %cfg.name, "composed embedded server"),
                Err(e) => self.record_failure("embedded", &cfg.name, &e).await,
            }
        }

        for cfg in &config.servers.proxied.stdio {
            if !self.options.selects(&cfg.name) {
                debug!(server = %cfg.name, "proxied STDIO server filtered out");
                continue;
            }
            match self.compose_stdio(cfg).await {
                Ok(()) => info!(server = %cfg.name, "composed proxied STDIO server"),
                Err(e) => self.record_failure("proxied STDIO", &cfg.name, &e).await,
            }
        }

        for cfg in &config.servers.proxied.sse {
            if !self.options.selects(&cfg.name) {
                debug!(server = %cfg.name, "proxied SSE server filtered out");
                continue;
            }
            match self.compose_sse(cfg).await {
                Ok(()) => info!(server = %cfg.name, mode = ?cfg.mode, "composed proxied SSE server"),
                Err(e) => self.record_failure("proxied SSE", &cfg.name, &e).await,
            }
        }

        let summary = self.get_composition_summary().await;
        info!(
            tools = summary.total_tools,
            prompts = summary.total_prompts,
            resources = summary.total_resources,
            servers = summary.source_servers,
            conflicts = summary.conflicts_resolved,
            errors = summary.errors.len(),
            "composition complete"
        );
        Ok(summary)
    }

    /// Compose the MCP server packages a `pyproject.toml` depends on.
    ///
    /// `path` defaults to `./pyproject.toml`. An unreadable or invalid
    /// manifest fails the call; per-server failures land in `errors`.
    pub async fn compose_from_pyproject(&self, path: Option<&Path>) -> Result<CompositionSummary> {
        let path = path.unwrap_or(Path::new(DEFAULT_MANIFEST));
        info!(composer = %self.options.name, path = %path.display(), "composing from manifest dependencies");
        let discovered = discover_from_manifest(path, &self.embedded)?;
        if discovered.is_empty() {
            warn!(path = %path.display(), "no MCP servers discovered from dependencies");
        }

        self.start().await;
        for (name, found) in discovered {
            if !self.options.selects(&name) {
                debug!(server = %name, "discovered server filtered out");
                continue;
            }
            let cfg = EmbeddedServerConfig {
                name: name.clone(),
                package: found.package,
                enabled: true,
                version: found.version,
                tool_mappings: HashMap::new(),
            };
            match self.compose_embedded(&cfg).await {
                Ok(()) => info!(server = %name, "composed discovered server"),
                Err(e) => self.record_failure("discovered", &name, &e).await,
            }
        }
        Ok(self.get_composition_summary().await)
    }

    async fn record_failure(&self, kind: &str, server: &str, err: &Error) {
        let message = format!("Failed to compose {kind} server '{server}': {err}");
        error!(server = %server, error = %err, "{kind} server composition failed");
        self.state.write().await.errors.push(message);
    }

    /// Compose an in-process server from the embedded registry.
    pub async fn compose_embedded(&self, cfg: &EmbeddedServerConfig) -> Result<()> {
        let descriptor = self.embedded.get(&cfg.package)?.descriptor();
        let version = cfg.version.clone().or(descriptor.version);
        let tools = descriptor.tools.into_iter().map(|tool| {
            let mut def = tool.definition();
            if let Some(mapped) = cfg.tool_mappings.get(&def.name) {
                def.name = mapped.clone();
            }
            (def, ToolHandler::Embedded(tool))
        });

        let mut state = self.state.write().await;
        register_handlers(&mut state, &cfg.name, tools, version.as_deref());
        for prompt in descriptor.prompts {
            self.place_component(&mut state, ComponentKind::Prompt, &cfg.name, prompt)?;
        }
        for resource in descriptor.resources {
            self.place_component(&mut state, ComponentKind::Resource, &cfg.name, resource)?;
        }
        Ok(())
    }

    /// Spawn a STDIO server under the process manager and compose its tools.
    pub async fn compose_stdio(self: &Arc<Self>, cfg: &StdioProxiedServerConfig) -> Result<()> {
        let manager = self.process_manager.as_ref().ok_or_else(|| {
            Error::composition(format!(
                "process manager is disabled; cannot compose proxied server '{}'",
                cfg.name
            ))
        })?;
        let process = manager.add_from_config(cfg, true).await?;
        let pid = process.lock().await.pid();
        info!(server = %cfg.name, pid = ?pid, "proxied server started");

        self.state
            .write()
            .await
            .stdio_servers
            .insert(cfg.name.clone(), cfg.clone());

        let proxy = self.tool_proxy().with_stderr_logging(cfg.log_stderr);
        let (channel, tools) = proxy.discover_tools(&cfg.name, &process).await?;

        let mut state = self.state.write().await;
        register_handlers(&mut state, &cfg.name, proxied_handlers(tools), None);
        state.channels.insert(cfg.name.clone(), channel);
        drop(state);

        if let Some(probe) = HealthProbe::from_config(cfg) {
            self.spawn_health_monitor(probe, cfg.restart_policy).await;
        }
        Ok(())
    }

    /// Register a translator for a remote server and, in proxy mode, compose
    /// its tool catalog through it.
    pub async fn compose_sse(&self, cfg: &SseProxiedServerConfig) -> Result<()> {
        let translator = Arc::new(StdioToSseTranslator::from_config(cfg)?);
        let as_translator: Arc<dyn ProtocolTranslator> = translator.clone();
        self.translators.register(&cfg.name, as_translator).await?;
        if cfg.mode == ProxyMode::Translator {
            info!(server = %cfg.name, url = %cfg.url, "registered SSE translator");
            return Ok(());
        }

        let endpoint: Arc<dyn RpcEndpoint> = translator;
        let proxy = ToolProxy::new(Duration::from_secs(cfg.timeout.max(1)));
        let tools = proxy.discover_over(&cfg.name, endpoint).await?;

        let mut state = self.state.write().await;
        register_handlers(&mut state, &cfg.name, proxied_handlers(tools), None);
        Ok(())
    }

    fn tool_proxy(&self) -> ToolProxy {
        ToolProxy::new(self.options.request_timeout)
    }

    /// Place a prompt or resource under the composer-level strategy.
    fn place_component<T: Component>(
        &self,
        state: &mut State,
        kind: ComponentKind,
        server: &str,
        mut item: T,
    ) -> Result<()> {
        let name = item.name().to_string();
        let catalog = T::catalog(state);
        let Some(holder) = catalog.source(&name).map(str::to_string) else {
            catalog.insert(&name, server, item);
            return Ok(());
        };

        let strategy = self.options.conflict_resolution;
        let placement = place_conflict(
            strategy,
            &name,
            server,
            &self.options.tool_manager.custom_template.template,
            |n| catalog.contains(n),
        );
        let resolved = match placement {
            Placement::Reject => {
                return Err(Error::ComponentConflict {
                    kind: kind.as_str(),
                    name,
                    servers: vec![holder, server.to_string()],
                });
            },
            Placement::Keep => {
                warn!(%kind, name = %name, existing = %holder, server = %server, "ignoring duplicate component");
                name.clone()
            },
            Placement::Replace => {
                warn!(%kind, name = %name, existing = %holder, server = %server, "overriding component");
                catalog.insert(&name, server, item);
                name.clone()
            },
            Placement::Renamed(resolved) => {
                item.rename(&resolved);
                catalog.insert(&resolved, server, item);
                resolved
            },
        };
        state.conflicts.push(ConflictRecord {
            kind,
            name,
            servers: vec![holder, server.to_string()],
            strategy,
            resolved_name: resolved,
        });
        Ok(())
    }

    // ── Restart and rediscovery ─────────────────────────────────────────────

    /// Restart a proxied STDIO server and rebind its tools to the new process.
    pub async fn restart_proxied_server(self: &Arc<Self>, name: &str) -> Result<()> {
        let manager = self
            .process_manager
            .as_ref()
            .ok_or_else(|| Error::composition("process manager is disabled"))?;
        manager.restart_process(name).await?;
        info!(server = %name, "restarted proxied server");
        self.rediscover(name).await
    }

    /// Re-run discovery for a server whose process was replaced.
    ///
    /// Tools the server still offers keep their visible names and get fresh
    /// handlers; tools it no longer offers are dropped; new ones are placed.
    async fn rediscover(&self, name: &str) -> Result<()> {
        let manager = self
            .process_manager
            .as_ref()
            .ok_or_else(|| Error::composition("process manager is disabled"))?;
        let (cfg, stale) = {
            let mut state = self.state.write().await;
            let cfg = state
                .stdio_servers
                .get(name)
                .cloned()
                .ok_or_else(|| Error::not_found("proxied server", name))?;
            (cfg, state.channels.remove(name))
        };
        if let Some(channel) = stale {
            channel.close().await;
        }

        let process = manager
            .get_process(name)
            .await
            .ok_or_else(|| Error::not_found("process", name))?;
        let proxy = self.tool_proxy().with_stderr_logging(cfg.log_stderr);
        let (channel, tools) = proxy.discover_tools(name, &process).await?;

        let mut state = self.state.write().await;
        let offered: BTreeSet<String> = tools.iter().map(|t| t.tool_name().to_string()).collect();
        let gone: Vec<String> = state
            .tool_manager
            .get_tools()
            .into_iter()
            .filter(|t| t.server_name == name && !offered.contains(&t.original_name))
            .map(|t| t.name.clone())
            .collect();
        for visible in gone {
            state.tool_manager.remove_tool(&visible);
            state.handlers.remove(&visible);
        }

        let mut fresh = Vec::new();
        for tool in tools {
            let existing = state
                .tool_manager
                .visible_name(name, tool.tool_name())
                .map(str::to_string);
            match existing {
                Some(visible) => {
                    state.handlers.insert(visible, ToolHandler::Proxied(tool));
                },
                None => fresh.push(tool),
            }
        }
        register_handlers(&mut state, name, proxied_handlers(fresh), None);
        state.channels.insert(name.to_string(), channel);
        info!(server = %name, tools = offered.len(), "rediscovered tools after restart");
        Ok(())
    }

    async fn watch_process_events(self: &Arc<Self>) {
        let Some(manager) = &self.process_manager else {
            return;
        };
        if self.watching.swap(true, Ordering::SeqCst) {
            return;
        }
        let events = manager.subscribe();
        let cancel = self.cancel.lock().await.clone();
        let handle = tokio::spawn(watch_events(Arc::downgrade(self), events, cancel));
        self.tasks.lock().await.push(handle);
    }

    async fn spawn_health_monitor(self: &Arc<Self>, probe: HealthProbe, policy: RestartPolicy) {
        debug!(server = %probe.server, interval = ?probe.interval, "health monitor started");
        let cancel = self.cancel.lock().await.clone();
        let handle = tokio::spawn(monitor_health(Arc::downgrade(self), probe, policy, cancel));
        self.tasks.lock().await.push(handle);
    }

    // ── Queries ─────────────────────────────────────────────────────────────

    pub async fn get_composition_summary(&self) -> CompositionSummary {
        let state = self.state.read().await;
        let tools = state.tool_manager.get_tools();
        let servers: BTreeSet<&str> = tools
            .iter()
            .map(|t| t.server_name.as_str())
            .chain(state.prompts.servers())
            .chain(state.resources.servers())
            .collect();
        let conflict_details: Vec<ConflictRecord> = state
            .tool_manager
            .get_conflicts()
            .iter()
            .chain(&state.conflicts)
            .cloned()
            .collect();
        CompositionSummary {
            composed_server_name: self.options.name.clone(),
            conflict_resolution_strategy: self.options.conflict_resolution,
            total_tools: tools.len(),
            total_prompts: state.prompts.len(),
            total_resources: state.resources.len(),
            source_servers: servers.len(),
            conflicts_resolved: conflict_details.len(),
            conflict_details,
            errors: state.errors.clone(),
        }
    }

    pub async fn tool_manager_summary(&self) -> ToolManagerSummary {
        self.state.read().await.tool_manager.get_summary()
    }

    pub async fn list_tools(&self) -> Vec<String> {
        self.state.read().await.tool_manager.list_tools(None)
    }

    pub async fn list_prompts(&self) -> Vec<String> {
        self.state.read().await.prompts.names()
    }

    pub async fn list_resources(&self) -> Vec<String> {
        self.state.read().await.resources.names()
    }

    /// Tool definitions as advertised by `tools/list`.
    pub async fn tool_definitions(&self) -> Vec<McpToolDef> {
        let state = self.state.read().await;
        state
            .tool_manager
            .get_tools()
            .into_iter()
            .map(|t| t.definition.clone())
            .collect()
    }

    pub async fn prompt_definitions(&self) -> Vec<PromptDef> {
        self.state.read().await.prompts.items()
    }

    pub async fn resource_definitions(&self) -> Vec<ResourceDef> {
        self.state.read().await.resources.items()
    }

    /// Source server of a tool, looked up by visible name or alias.
    pub async fn get_tool_source(&self, name: &str) -> Option<String> {
        let state = self.state.read().await;
        state.tool_manager.get_tool_source(name).map(str::to_string)
    }

    pub async fn get_prompt_source(&self, name: &str) -> Option<String> {
        let state = self.state.read().await;
        state.prompts.source(name).map(str::to_string)
    }

    pub async fn get_resource_source(&self, name: &str) -> Option<String> {
        let state = self.state.read().await;
        state.resources.source(name).map(str::to_string)
    }

    pub async fn add_alias(&self, alias: &str, target: &str) {
        self.state.write().await.tool_manager.add_alias(alias, target);
    }

    /// Process state of every proxied STDIO server; empty without a process manager.
    pub async fn get_proxied_servers_info(&self) -> BTreeMap<String, ProcessInfo> {
        match &self.process_manager {
            Some(manager) => manager.get_all_process_info().await,
            None => BTreeMap::new(),
        }
    }

    // ── Invocation ──────────────────────────────────────────────────────────

    /// Call a composed tool by visible name or alias.
    pub async fn call_tool(
        &self,
        name: &str,
        arguments: Value,
        auth: Option<&AuthContext>,
    ) -> Result<String> {
        let (visible, handler) = {
            let state = self.state.read().await;
            let visible = state.tool_manager.resolve_alias(name).to_string();
            let handler = state
                .handlers
                .get(&visible)
                .cloned()
                .ok_or_else(|| Error::not_found("tool", name))?;
            (visible, handler)
        };
        match auth {
            Some(ctx) => {
                debug!(tool = %visible, user = %ctx.user_id, scopes = ?ctx.scopes, "calling tool")
            },
            None => debug!(tool = %visible, "calling tool"),
        }

        let started = Instant::now();
        let result = handler.invoke(arguments).await;
        record_call(&visible, started, result.is_ok());
        if let Err(e) = &result {
            warn!(tool = %visible, error = %e, "tool call failed");
        }
        result
    }

    // ── Lifecycle ───────────────────────────────────────────────────────────

    pub async fn start(&self) {
        if self.stopped.swap(false, Ordering::SeqCst) {
            *self.cancel.lock().await = CancellationToken::new();
            self.watching.store(false, Ordering::SeqCst);
        }
        if let Some(manager) = &self.process_manager {
            manager.start().await;
        }
        info!(composer = %self.options.name, "composer started");
    }

    /// Stop monitors, translators and every managed process. Safe to call repeatedly.
    pub async fn stop(&self) {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return;
        }
        self.cancel.lock().await.cancel();
        for handle in self.tasks.lock().await.drain(..) {
            handle.abort();
        }
        let channels: Vec<Arc<RpcChannel>> = {
            let mut state = self.state.write().await;
            state.channels.drain().map(|(_, c)| c).collect()
        };
        for channel in channels {
            channel.close().await;
        }
        self.translators.stop_all().await;
        if let Some(manager) = &self.process_manager {
            manager.stop().await;
        }
        info!(composer = %self.options.name, "composer stopped");
    }

    /// Run `f` with the composer started, stopping it afterwards whatever `f` returns.
    pub async fn run<F, Fut, T>(self: &Arc<Self>, f: F) -> T
    where
        F: FnOnce(Arc<Self>) -> Fut,
        Fut: Future<Output = T>,
    {
        self.start().await;
        let out = f(Arc::clone(self)).await;
        self.stop().await;
        out
    }
}

// ── Helpers ─────────────────────────────────────────────────────────────────

/// Prompts and resources share the placement logic; this picks the catalog.
trait Component: Clone {
    fn name(&self) -> &str;
    fn rename(&mut self, name: &str);
    fn catalog(state: &mut State) -> &mut Catalog<Self>;
}

impl Component for PromptDef {
    fn name(&self) -> &str {
        &self.name
    }

    fn rename(&mut self, name: &str) {
        self.name = name.to_string();
    }

    fn catalog(state: &mut State) -> &mut Catalog<Self> {
        &mut state.prompts
    }
}

impl Component for ResourceDef {
    fn name(&self) -> &str {
        &self.name
    }

    fn rename(&mut self, name: &str) {
        self.name = name.to_string();
    }

    fn catalog(state: &mut State) -> &mut Catalog<Self> {
        &mut state.resources
    }
}

fn proxied_handlers(tools: Vec<ProxiedTool>) -> impl Iterator<Item = (McpToolDef, ToolHandler)> {
    tools
        .into_iter()
        .map(|tool| (tool.definition.clone(), ToolHandler::Proxied(tool)))
}

/// Place each tool and keep the handler of those that ended up stored.
/// A rejected tool is skipped and reported; the rest of the server goes on.
fn register_handlers(
    state: &mut State,
    server: &str,
    tools: impl IntoIterator<Item = (McpToolDef, ToolHandler)>,
    version: Option<&str>,
) {
    let mut count = 0usize;
    for (def, handler) in tools {
        match state.tool_manager.register_tool(server, def, version) {
            Ok(registration) if registration.is_stored() => {
                debug!(tool = %registration.name(), server = %server, "added tool");
                state
                    .handlers
                    .insert(registration.name().to_string(), handler);
                count += 1;
            },
            Ok(_) => {},
            Err(conflict) => {
                warn!(server = %server, error = %conflict, "tool rejected");
                state.errors.push(format!(
                    "Failed to register tool from server '{server}': {conflict}"
                ));
            },
        }
    }
    info!(server = %server, count, "registered tools");
}

async fn watch_events(
    composer: Weak<Composer>,
    mut events: broadcast::Receiver<ProcessEvent>,
    cancel: CancellationToken,
) {
    loop {
        let event = tokio::select! {
            () = cancel.cancelled() => return,
            event = events.recv() => event,
        };
        match event {
            Ok(ProcessEvent::Restarted { name, pid, .. }) => {
                let Some(composer) = composer.upgrade() else {
                    return;
                };
                info!(server = %name, pid = ?pid, "proxied server restarted by supervisor");
                if let Err(e) = composer.rediscover(&name).await {
                    warn!(server = %name, error = %e, "rediscovery after restart failed");
                    composer.state.write().await.errors.push(format!(
                        "Failed to rediscover tools of '{name}' after restart: {e}"
                    ));
                }
            },
            Ok(ProcessEvent::RestartsExhausted { name, restarts }) => {
                warn!(server = %name, restarts, "proxied server is down, restart budget spent");
            },
            Ok(ProcessEvent::Crashed { name, exit_code }) => {
                debug!(server = %name, exit_code, "proxied server crashed");
            },
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!(skipped, "process event watcher lagged");
            },
            Err(broadcast::error::RecvError::Closed) => return,
        }
    }
}

async fn monitor_health(
    composer: Weak<Composer>,
    probe: HealthProbe,
    policy: RestartPolicy,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval(probe.interval);
    ticker.tick().await;
    loop {
        tokio::select! {
            () = cancel.cancelled() => return,
            _ = ticker.tick() => {},
        }
        let Some(composer) = composer.upgrade() else {
            return;
        };
        let channel = composer.state.read().await.channels.get(&probe.server).cloned();
        let Some(channel) = channel else {
            continue;
        };
        if probe.check(channel.as_ref()).await.is_ok() || policy == RestartPolicy::Never {
            continue;
        }
        if let Err(e) = composer.restart_proxied_server(&probe.server).await {
            warn!(server = %probe.server, error = %e, "restart after failed health check failed");
        }
    }
}

#[cfg(feature = "metrics")]
fn record_call(tool: &str, started: Instant, ok: bool) {
    counter!(tools_metrics::CALLS_TOTAL, labels::TOOL => tool.to_string()).increment(1);
    histogram!(tools_metrics::CALL_DURATION_SECONDS, labels::TOOL => tool.to_string())
        .record(started.elapsed().as_secs_f64());
    if !ok {
        counter!(tools_metrics::CALL_ERRORS_TOTAL, labels::TOOL => tool.to_string()).increment(1);
    }
}

#[cfg(not(feature = "metrics"))]
fn record_call(_tool: &str, _started: Instant, _ok: bool) {}
