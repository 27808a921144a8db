use core::fmt;
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;

use indexmap::IndexMap;
use parking_lot::{Mutex, RwLock};
use tokio::sync::watch;

use super::definition::{Agent, AgentInner};
use crate::context::{ContextPool, ContextQueue};
use crate::error::{ConfigError, Error};
use crate::hooks::{Hook, Tags};
use crate::registry::{Registry, RegistryError};
use crate::tool::Tool;
use crate::turn::Turn;

/// Fails unless `tool` is the instance registered under its name.
pub(super) fn check_registered<E>(registry: &Registry, tool: &Tool) -> Result<(), E>
where
    E: From<RegistryError> + From<ConfigError>,
{
    let registered = registry.tools().get(tool.name())?;
    if !registered.ptr_eq(tool) {
        return Err(ConfigError::ToolMismatch {
            tool: tool.name().to_owned(),
        }
        .into());
    }
    Ok(())
}

/// Builder for [`Agent`], also returned by [`Agent::branch`].
#[must_use]
pub struct AgentBuilder {
    registry: Registry,
    name: String,
    description: String,
    tools: Vec<Tool>,
    context_queue: Option<ContextQueue>,
    context_pool: Option<ContextPool>,
    hooks: Vec<Hook>,
    turn_hooks: Vec<Hook>,
    tags: Tags,
    pending: Vec<Turn>,
}

impl fmt::Debug for AgentBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AgentBuilder")
            .field("name", &self.name)
            .field(
                "tools",
                &self.tools.iter().map(Tool::name).collect::<Vec<_>>(),
            )
            .field("pending", &self.pending.len())
            .finish_non_exhaustive()
    }
}

impl AgentBuilder {
    pub(crate) fn new(registry: &Registry, name: impl Into<String>) -> Self {
        Self {
            registry: registry.clone(),
            name: name.into(),
            description: String::new(),
            tools: Vec::new(),
            context_queue: None,
            context_pool: None,
            hooks: Vec::new(),
            turn_hooks: Vec::new(),
            tags: Tags::new(),
            pending: Vec::new(),
        }
    }

    /// Sets the description.
    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Permits a tool.
    pub fn tool(mut self, tool: &Tool) -> Self {
        self.tools.push(tool.clone());
        self
    }

    /// Replaces the permitted tools.
    pub fn tools(mut self, tools: impl IntoIterator<Item = Tool>) -> Self {
        self.tools = tools.into_iter().collect();
        self
    }

    /// Uses an existing context queue instead of a new one.
    pub fn context_queue(mut self, queue: ContextQueue) -> Self {
        self.context_queue = Some(queue);
        self
    }

    /// Uses an existing context pool instead of a new one.
    pub fn context_pool(mut self, pool: ContextPool) -> Self {
        self.context_pool = Some(pool);
        self
    }

    /// Attaches an agent hook.
    pub fn hook(mut self, hook: Hook) -> Self {
        self.hooks.push(hook);
        self
    }

    /// Replaces the agent hooks.
    pub fn hooks(mut self, hooks: Vec<Hook>) -> Self {
        self.hooks = hooks;
        self
    }

    /// Attaches a hook to every turn the agent runs.
    pub fn turn_hook(mut self, hook: Hook) -> Self {
        self.turn_hooks.push(hook);
        self
    }

    /// Replaces the turn hooks.
    pub fn turn_hooks(mut self, hooks: Vec<Hook>) -> Self {
        self.turn_hooks = hooks;
        self
    }

    /// Adds a tag.
    pub fn tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.insert(tag.into());
        self
    }

    /// Replaces the tags.
    pub fn tags(mut self, tags: impl IntoIterator<Item = String>) -> Self {
        self.tags = tags.into_iter().collect();
        self
    }

    pub(crate) fn pending(mut self, turns: Vec<Turn>) -> Self {
        self.pending = turns;
        self
    }

    /// Finishes the agent and registers it by name.
    ///
    /// Without an explicit queue or pool, new ones are created with the
    /// limits from the registry's [`EngineConfig`](crate::EngineConfig).
    ///
    /// # Errors
    ///
    /// - [`ConfigError::EmptyName`] for an empty name
    /// - [`ConfigError::ToolMismatch`] or
    ///   [`RegistryError::UnregisteredTool`] if a tool is not the registered instance
    /// - [`RegistryError::DuplicateAgent`] if the name is taken
    pub fn build(self) -> Result<Agent, Error> {
        if self.name.is_empty() {
            return Err(ConfigError::EmptyName { kind: "agent" }.into());
        }
        let mut tools = IndexMap::with_capacity(self.tools.len());
        for tool in self.tools {
            check_registered::<Error>(&self.registry, &tool)?;
            tools.insert(tool.name().to_owned(), tool);
        }

        let config = self.registry.config();
        let context_queue = match self.context_queue {
            Some(queue) => queue,
            None => ContextQueue::new(&self.registry, config.context_queue_limit)?,
        };
        let context_pool = match self.context_pool {
            Some(pool) => pool,
            None => ContextPool::new(&self.registry, config.context_pool_limit)?,
        };
        let (pause, _) = watch::channel(false);

        let agent = Agent {
            inner: Arc::new(AgentInner {
                name: self.name,
                description: RwLock::new(self.description),
                tools: RwLock::new(tools),
                queue: Mutex::new(VecDeque::from(self.pending)),
                current_turn: Mutex::new(None),
                context_queue: RwLock::new(context_queue),
                context_pool: RwLock::new(context_pool),
                hooks: RwLock::new(self.hooks),
                turn_hooks: RwLock::new(self.turn_hooks),
                tags: RwLock::new(self.tags),
                running: AtomicBool::new(false),
                pause,
                registry: self.registry.clone(),
            }),
        };
        self.registry.agents().register(agent.clone())?;
        tracing::debug!(agent = %agent.name(), tools = ?agent.tool_names(), "built agent");
        Ok(agent)
    }
}
