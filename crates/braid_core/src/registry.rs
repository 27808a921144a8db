//! Name-keyed lookup tables for tools, agents and hooks.
//!
//! A [`Registry`] is an explicit, cloneable handle that owns the three tables
//! together with the [`EngineConfig`]. Everything built against a registry
//! (tools, turns, agents, context containers) keeps a handle to it so that
//! globally registered hooks can be found at dispatch time and names can be
//! resolved during import.
//!
//! Registered tools and agents keep the registry alive in turn. Call
//! [`Registry::clear`] to drop every registration when a registry is retired,
//! typically between tests.
//!
//! # Example
//!
//! ```
//! use braid_core::{Output, Registry, Tool};
//!
//! let registry = Registry::new();
//! Tool::builder("ping")
//!     .returning(|_input| async { Ok(Output::value("pong")) })
//!     .register(&registry)
//!     .expect("tool should register");
//!
//! assert!(registry.tools().has("ping"));
//! assert_eq!(registry.tools().names(), vec!["ping".to_string()]);
//! ```

use core::fmt;
use std::sync::Arc;

use indexmap::IndexMap;
use parking_lot::RwLock;
use thiserror::Error;

use crate::agent::Agent;
use crate::config::EngineConfig;
use crate::error::Error as BraidError;
use crate::hooks::HookRegistry;
use crate::plugin::Plugins;
use crate::tool::Tool;

// ─────────────────────────────────────────────────────────────────────────────
// RegistryError
// ─────────────────────────────────────────────────────────────────────────────

/// Resolution and uniqueness failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    /// No tool with this name.
    #[error("tool '{0}' is not registered")]
    UnregisteredTool(String),

    /// No agent with this name.
    #[error("agent '{0}' is not registered")]
    UnregisteredAgent(String),

    /// No hook with this name.
    #[error("hook '{0}' is not registered")]
    UnregisteredHook(String),

    /// A tool with this name already exists.
    #[error("tool '{0}' is already registered")]
    DuplicateTool(String),

    /// An agent with this name already exists.
    #[error("agent '{0}' is already registered")]
    DuplicateAgent(String),

    /// A different hook is already registered under this name.
    #[error("a different hook is already registered as '{0}'")]
    DuplicateHook(String),
}

// ─────────────────────────────────────────────────────────────────────────────
// ToolRegistry
// ─────────────────────────────────────────────────────────────────────────────

/// Registered tools, in registration order.
#[derive(Default)]
pub struct ToolRegistry {
    tools: RwLock<IndexMap<String, Tool>>,
}

impl fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ToolRegistry")
            .field("tools", &self.names())
            .finish()
    }
}

impl ToolRegistry {
    /// Registers a tool under its name.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::DuplicateTool`] if the name is taken.
    pub fn register(&self, tool: Tool) -> Result<(), RegistryError> {
        let mut tools = self.tools.write();
        let name = tool.name().to_owned();
        if tools.contains_key(&name) {
            return Err(RegistryError::DuplicateTool(name));
        }
        tracing::debug!(tool = %name, "tool registered");
        tools.insert(name, tool);
        Ok(())
    }

    /// Returns the tool registered under `name`.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::UnregisteredTool`] if there is none.
    pub fn get(&self, name: &str) -> Result<Tool, RegistryError> {
        self.tools
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| RegistryError::UnregisteredTool(name.to_owned()))
    }

    /// Returns whether a tool with the given name is registered.
    #[must_use]
    pub fn has(&self, name: &str) -> bool {
        self.tools.read().contains_key(name)
    }

    /// Returns every registered tool.
    #[must_use]
    pub fn all(&self) -> Vec<Tool> {
        self.tools.read().values().cloned().collect()
    }

    /// Returns the names of all registered tools.
    #[must_use]
    pub fn names(&self) -> Vec<String> {
        self.tools.read().keys().cloned().collect()
    }

    /// Number of registered tools.
    #[must_use]
    pub fn len(&self) -> usize {
        self.tools.read().len()
    }

    /// Returns `true` if no tool is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tools.read().is_empty()
    }

    /// Drops every registration.
    pub fn clear(&self) {
        self.tools.write().clear();
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// AgentRegistry
// ─────────────────────────────────────────────────────────────────────────────

/// Registered agents, addressable by name for inter-agent messaging.
#[derive(Default)]
pub struct AgentRegistry {
    agents: RwLock<IndexMap<String, Agent>>,
}

impl fmt::Debug for AgentRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AgentRegistry")
            .field("agents", &self.names())
            .finish()
    }
}

impl AgentRegistry {
    /// Registers an agent under its name.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::DuplicateAgent`] if the name is taken.
    pub fn register(&self, agent: Agent) -> Result<(), RegistryError> {
        let mut agents = self.agents.write();
        let name = agent.name().to_owned();
        if agents.contains_key(&name) {
            return Err(RegistryError::DuplicateAgent(name));
        }
        tracing::debug!(agent = %name, "agent registered");
        agents.insert(name, agent);
        Ok(())
    }

    /// Returns the agent registered under `name`.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::UnregisteredAgent`] if there is none.
    pub fn get(&self, name: &str) -> Result<Agent, RegistryError> {
        self.agents
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| RegistryError::UnregisteredAgent(name.to_owned()))
    }

    /// Removes and returns the agent registered under `name`.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::UnregisteredAgent`] if there is none.
    pub fn deregister(&self, name: &str) -> Result<Agent, RegistryError> {
        self.agents
            .write()
            .shift_remove(name)
            .ok_or_else(|| RegistryError::UnregisteredAgent(name.to_owned()))
    }

    /// Returns whether an agent with the given name is registered.
    #[must_use]
    pub fn has(&self, name: &str) -> bool {
        self.agents.read().contains_key(name)
    }

    /// Returns the names of all registered agents.
    #[must_use]
    pub fn names(&self) -> Vec<String> {
        self.agents.read().keys().cloned().collect()
    }

    /// Drops every registration.
    pub fn clear(&self) {
        self.agents.write().clear();
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Registry
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Default)]
struct RegistryInner {
    tools: ToolRegistry,
    agents: AgentRegistry,
    hooks: HookRegistry,
    config: EngineConfig,
    plugins: RwLock<Vec<&'static str>>,
}

/// Shared handle to the tool, agent and hook tables.
///
/// Cloning is cheap; clones refer to the same tables.
#[derive(Clone, Default)]
pub struct Registry {
    inner: Arc<RegistryInner>,
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registry")
            .field("tools", &self.inner.tools)
            .field("agents", &self.inner.agents)
            .field("hooks", &self.inner.hooks)
            .field("config", &self.inner.config)
            .finish()
    }
}

impl Registry {
    /// Creates an empty registry with default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an empty registry with the given configuration.
    #[must_use]
    pub fn with_config(config: EngineConfig) -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                config,
                ..RegistryInner::default()
            }),
        }
    }

    /// The tool table.
    #[must_use]
    pub fn tools(&self) -> &ToolRegistry {
        &self.inner.tools
    }

    /// The agent table.
    #[must_use]
    pub fn agents(&self) -> &AgentRegistry {
        &self.inner.agents
    }

    /// The hook table.
    #[must_use]
    pub fn hooks(&self) -> &HookRegistry {
        &self.inner.hooks
    }

    /// Engine defaults.
    #[must_use]
    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    /// Returns `true` if both handles refer to the same tables.
    #[must_use]
    pub fn ptr_eq(&self, other: &Registry) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Installs one plugin or a plugin group.
    ///
    /// Every plugin is built in order, then every plugin's `ready` runs.
    /// A plugin already installed on this registry is skipped.
    ///
    /// # Errors
    ///
    /// Returns the first error raised by a plugin's `build`.
    pub fn add_plugins(&self, plugins: impl Plugins) -> Result<&Self, BraidError> {
        let mut installed = Vec::new();
        for plugin in plugins.into_plugins() {
            let name = plugin.name();
            if self.inner.plugins.read().contains(&name) {
                tracing::debug!(plugin = name, "plugin already installed, skipping");
                continue;
            }
            plugin.build(self)?;
            self.inner.plugins.write().push(name);
            installed.push(plugin);
        }
        for plugin in &installed {
            plugin.ready(self);
        }
        Ok(self)
    }

    /// Drops every tool, agent and hook registration.
    pub fn clear(&self) {
        self.inner.agents.clear();
        self.inner.tools.clear();
        self.inner.hooks.clear();
        self.inner.plugins.write().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::output::Output;

    fn echo(registry: &Registry, name: &str) -> Tool {
        Tool::builder(name)
            .returning(|input| async move { Ok(Output::Value(input.params().clone().into())) })
            .register(registry)
            .expect("registration should succeed")
    }

    #[test]
    fn tool_lookup_by_name() {
        let registry = Registry::new();
        let tool = echo(&registry, "echo");

        let found = registry.tools().get("echo").expect("tool should resolve");
        assert!(found.ptr_eq(&tool));
        assert_eq!(registry.tools().len(), 1);
    }

    #[test]
    fn unknown_tool_is_distinct_error() {
        let registry = Registry::new();
        let err = registry.tools().get("missing").unwrap_err();
        assert_eq!(err, RegistryError::UnregisteredTool("missing".into()));

        let err = registry.agents().get("missing").unwrap_err();
        assert_eq!(err, RegistryError::UnregisteredAgent("missing".into()));

        let err = registry.hooks().get("missing").unwrap_err();
        assert_eq!(err, RegistryError::UnregisteredHook("missing".into()));
    }

    #[test]
    fn duplicate_tool_name_rejected() {
        let registry = Registry::new();
        echo(&registry, "echo");

        let err = Tool::builder("echo")
            .returning(|_| async { Ok(Output::value(1)) })
            .register(&registry)
            .unwrap_err();
        assert!(matches!(
            err,
            BraidError::Registry(RegistryError::DuplicateTool(ref name)) if name == "echo"
        ));
    }

    #[test]
    fn all_preserves_registration_order() {
        let registry = Registry::new();
        echo(&registry, "b");
        echo(&registry, "a");
        echo(&registry, "c");

        let names: Vec<_> = registry
            .tools()
            .all()
            .iter()
            .map(|tool| tool.name().to_owned())
            .collect();
        assert_eq!(names, vec!["b", "a", "c"]);
    }

    #[test]
    fn clear_empties_every_table() {
        let registry = Registry::new();
        echo(&registry, "echo");
        registry.clear();

        assert!(registry.tools().is_empty());
        assert!(registry.agents().names().is_empty());
        assert!(registry.hooks().names().is_empty());
    }

    #[test]
    fn clones_share_tables() {
        let registry = Registry::new();
        let clone = registry.clone();
        echo(&clone, "shared");

        assert!(registry.tools().has("shared"));
        assert!(registry.ptr_eq(&clone));
        assert!(!registry.ptr_eq(&Registry::new()));
    }
}
