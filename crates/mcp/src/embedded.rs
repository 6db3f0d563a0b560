//! In-process MCP servers compiled into the composer.
//!
//! An embedded server is registered under its package name and hands out a
//! fixed [`ServerDescriptor`]; no process or transport is involved.

use std::{collections::HashMap, fmt, sync::Arc};

use {async_trait::async_trait, serde_json::Value};

use crate::{
    error::{Error, Result},
    types::{McpToolDef, PromptDef, ResourceDef},
};

/// A tool served in-process.
#[async_trait]
pub trait EmbeddedTool: Send + Sync {
    fn definition(&self) -> McpToolDef;

    /// Run the tool; the returned text becomes the call's content.
    async fn call(&self, arguments: Value) -> Result<String>;
}

type ToolFn = dyn Fn(Value) -> Result<String> + Send + Sync;

/// An [`EmbeddedTool`] backed by a plain function.
#[derive(Clone)]
pub struct FnTool {
    definition: McpToolDef,
    func: Arc<ToolFn>,
}

impl FnTool {
    pub fn new<F>(definition: McpToolDef, func: F) -> Self
    where
        F: Fn(Value) -> Result<String> + Send + Sync + 'static,
    {
        Self {
            definition,
            func: Arc::new(func),
        }
    }
}

impl fmt::Debug for FnTool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnTool")
            .field("name", &self.definition.name)
            .finish()
    }
}

#[async_trait]
impl EmbeddedTool for FnTool {
    fn definition(&self) -> McpToolDef {
        self.definition.clone()
    }

    async fn call(&self, arguments: Value) -> Result<String> {
        (self.func)(arguments)
    }
}

/// Everything an embedded server contributes to the composition.
#[derive(Clone, Default)]
pub struct ServerDescriptor {
    pub version: Option<String>,
    pub tools: Vec<Arc<dyn EmbeddedTool>>,
    pub prompts: Vec<PromptDef>,
    pub resources: Vec<ResourceDef>,
}

impl ServerDescriptor {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = Some(version.into());
        self
    }

    #[must_use]
    pub fn with_tool(mut self, tool: impl EmbeddedTool + 'static) -> Self {
        self.tools.push(Arc::new(tool));
        self
    }

    #[must_use]
    pub fn with_prompt(mut self, prompt: PromptDef) -> Self {
        self.prompts.push(prompt);
        self
    }

    #[must_use]
    pub fn with_resource(mut self, resource: ResourceDef) -> Self {
        self.resources.push(resource);
        self
    }
}

impl fmt::Debug for ServerDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tools: Vec<String> = self.tools.iter().map(|t| t.definition().name).collect();
        f.debug_struct("ServerDescriptor")
            .field("version", &self.version)
            .field("tools", &tools)
            .field("prompts", &self.prompts.len())
            .field("resources", &self.resources.len())
            .finish()
    }
}

/// A server that can be composed without spawning anything.
pub trait EmbeddedServer: Send + Sync {
    fn descriptor(&self) -> ServerDescriptor;
}

impl<F> EmbeddedServer for F
where
    F: Fn() -> ServerDescriptor + Send + Sync,
{
    fn descriptor(&self) -> ServerDescriptor {
        self()
    }
}

/// Package name to embedded server.
#[derive(Clone, Default)]
pub struct EmbeddedRegistry {
    servers: HashMap<String, Arc<dyn EmbeddedServer>>,
}

impl EmbeddedRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `server` under `package`, replacing any previous entry.
    pub fn register(&mut self, package: impl Into<String>, server: impl EmbeddedServer + 'static) {
        self.servers.insert(package.into(), Arc::new(server));
    }

    #[must_use]
    pub fn with(
        mut self,
        package: impl Into<String>,
        server: impl EmbeddedServer + 'static,
    ) -> Self {
        self.register(package, server);
        self
    }

    pub fn get(&self, package: &str) -> Result<Arc<dyn EmbeddedServer>> {
        self.servers
            .get(package)
            .cloned()
            .ok_or_else(|| Error::Import {
                package: package.to_string(),
            })
    }

    pub fn contains(&self, package: &str) -> bool {
        self.servers.contains_key(package)
    }

    /// Registered package names, sorted.
    pub fn packages(&self) -> Vec<&str> {
        let mut packages: Vec<&str> = self.servers.keys().map(String::as_str).collect();
        packages.sort_unstable();
        packages
    }
}

impl fmt::Debug for EmbeddedRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EmbeddedRegistry")
            .field("packages", &self.packages())
            .finish()
    }
}
