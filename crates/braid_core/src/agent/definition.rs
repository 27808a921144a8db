use core::fmt;
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use indexmap::IndexMap;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::watch;

use super::builder::{AgentBuilder, check_registered};
use super::error::AgentError;
use super::run::AgentRun;
use crate::context::{
    ContextPool, ContextPoolSnapshot, ContextQueue, ContextQueueSnapshot, ContextScope,
};
use crate::error::Error;
use crate::hooks::{Hook, HookError, HookEvent, Tags};
use crate::output::Output;
use crate::registry::Registry;
use crate::tool::Tool;
use crate::turn::{Turn, TurnSnapshot};

pub(crate) struct AgentInner {
    pub(crate) name: String,
    pub(crate) description: RwLock<String>,
    pub(crate) tools: RwLock<IndexMap<String, Tool>>,
    pub(crate) queue: Mutex<VecDeque<Turn>>,
    pub(crate) current_turn: Mutex<Option<Turn>>,
    pub(crate) context_queue: RwLock<ContextQueue>,
    pub(crate) context_pool: RwLock<ContextPool>,
    pub(crate) hooks: RwLock<Vec<Hook>>,
    pub(crate) turn_hooks: RwLock<Vec<Hook>>,
    pub(crate) tags: RwLock<Tags>,
    pub(crate) running: AtomicBool,
    pub(crate) pause: watch::Sender<bool>,
    pub(crate) registry: Registry,
}

/// Owns a queue of turns and runs them one at a time.
///
/// An agent only accepts turns whose tool is in its permitted set. Running
/// it with [`run`](Self::run) drains the queue, routing every value the
/// turns produce:
///
/// - a [`Turn`] is put back on this agent's queue
/// - a [`ContextItem`](crate::ContextItem) without an id is appended to the
///   context queue
/// - a [`ContextItem`](crate::ContextItem) with an id is added to the context pool
/// - anything else is surfaced to the caller with the turn that produced it
///
/// Agents register themselves by name when built, so other agents can
/// [`send`](Self::send) them turns. The handle is shared.
///
/// ```
/// # tokio_test::block_on(async {
/// use braid_core::{Agent, Output, Registry, Tool, Turn};
///
/// let registry = Registry::new();
/// let double = Tool::builder("double")
///     .param("x")
///     .returning(|input| async move {
///         let x: i64 = input.get_param("x")?;
///         Ok(Output::value(x * 2))
///     })
///     .register(&registry)
///     .expect("tool should register");
///
/// let agent = Agent::builder(&registry, "doubler")
///     .tool(&double)
///     .build()
///     .expect("agent should build");
/// agent
///     .put(Turn::builder(&registry, &double).kwarg("x", 5).build().expect("registered"))
///     .await
///     .expect("tool is permitted");
///
/// let mut run = agent.run().expect("agent is idle");
/// let (_turn, value) = run.next().await.expect("one value").expect("turn succeeds");
/// assert_eq!(value, 10);
/// assert!(run.next().await.is_none());
/// # });
/// ```
#[derive(Clone)]
pub struct Agent {
    pub(crate) inner: Arc<AgentInner>,
}

impl fmt::Debug for Agent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Agent")
            .field("name", &self.inner.name)
            .field("tools", &self.tool_names())
            .field("queued", &self.inner.queue.lock().len())
            .field("running", &self.is_running())
            .field("paused", &self.is_paused())
            .finish_non_exhaustive()
    }
}

impl Agent {
    /// Starts building an agent registered in `registry`.
    pub fn builder(registry: &Registry, name: impl Into<String>) -> AgentBuilder {
        AgentBuilder::new(registry, name)
    }

    /// Registered name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Description.
    #[must_use]
    pub fn description(&self) -> String {
        self.inner.description.read().clone()
    }

    /// The permitted tools, in the order they were given.
    #[must_use]
    pub fn tools(&self) -> Vec<Tool> {
        self.inner.tools.read().values().cloned().collect()
    }

    /// Names of the permitted tools.
    #[must_use]
    pub fn tool_names(&self) -> Vec<String> {
        self.inner.tools.read().keys().cloned().collect()
    }

    /// Pending turns, front first. The queue is left untouched.
    #[must_use]
    pub fn turns(&self) -> Vec<Turn> {
        self.inner.queue.lock().iter().cloned().collect()
    }

    /// The turn being executed, or the one an import will resume first.
    #[must_use]
    pub fn current_turn(&self) -> Option<Turn> {
        self.inner.current_turn.lock().clone()
    }

    /// The sequential context window.
    #[must_use]
    pub fn context_queue(&self) -> ContextQueue {
        self.inner.context_queue.read().clone()
    }

    /// The keyed context store.
    #[must_use]
    pub fn context_pool(&self) -> ContextPool {
        self.inner.context_pool.read().clone()
    }

    /// Agent-scoped hooks.
    #[must_use]
    pub fn hooks(&self) -> Vec<Hook> {
        self.inner.hooks.read().clone()
    }

    /// Hooks attached to every turn this agent runs.
    #[must_use]
    pub fn turn_hooks(&self) -> Vec<Hook> {
        self.inner.turn_hooks.read().clone()
    }

    /// Tags used to filter hooks.
    #[must_use]
    pub fn tags(&self) -> Tags {
        self.inner.tags.read().clone()
    }

    /// The registry this agent is registered in.
    #[must_use]
    pub fn registry(&self) -> &Registry {
        &self.inner.registry
    }

    /// Returns `true` while a run is active.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::Acquire)
    }

    /// Returns `true` while the pause gate is closed.
    #[must_use]
    pub fn is_paused(&self) -> bool {
        *self.inner.pause.borrow()
    }

    /// Returns `true` if both handles are the same agent.
    #[must_use]
    pub fn ptr_eq(&self, other: &Agent) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    // ─────────────────────────────────────────────────────────────────────
    // Configuration
    // ─────────────────────────────────────────────────────────────────────

    fn guard(&self) -> Result<(), AgentError> {
        if self.is_running() || self.is_paused() {
            return Err(AgentError::SafeExecution {
                agent: self.inner.name.clone(),
            });
        }
        Ok(())
    }

    /// Replaces the description.
    ///
    /// # Errors
    ///
    /// [`AgentError::SafeExecution`] while running or paused.
    pub fn set_description(&self, description: impl Into<String>) -> Result<(), AgentError> {
        self.guard()?;
        *self.inner.description.write() = description.into();
        Ok(())
    }

    /// Permits another tool.
    ///
    /// # Errors
    ///
    /// [`AgentError::SafeExecution`] while running or paused, or a
    /// registry / configuration error if `tool` is not the registered instance.
    pub fn add_tool(&self, tool: &Tool) -> Result<(), AgentError> {
        self.guard()?;
        check_registered::<AgentError>(&self.inner.registry, tool)?;
        self.inner
            .tools
            .write()
            .insert(tool.name().to_owned(), tool.clone());
        Ok(())
    }

    /// Swaps the context queue.
    ///
    /// # Errors
    ///
    /// [`AgentError::SafeExecution`] while running or paused.
    pub fn set_context_queue(&self, queue: ContextQueue) -> Result<(), AgentError> {
        self.guard()?;
        *self.inner.context_queue.write() = queue;
        Ok(())
    }

    /// Swaps the context pool.
    ///
    /// # Errors
    ///
    /// [`AgentError::SafeExecution`] while running or paused.
    pub fn set_context_pool(&self, pool: ContextPool) -> Result<(), AgentError> {
        self.guard()?;
        *self.inner.context_pool.write() = pool;
        Ok(())
    }

    /// Attaches an agent hook.
    ///
    /// # Errors
    ///
    /// [`AgentError::SafeExecution`] while running or paused.
    pub fn add_hook(&self, hook: Hook) -> Result<(), AgentError> {
        self.guard()?;
        self.inner.hooks.write().push(hook);
        Ok(())
    }

    /// Attaches a hook to every turn this agent runs.
    ///
    /// # Errors
    ///
    /// [`AgentError::SafeExecution`] while running or paused.
    pub fn add_turn_hook(&self, hook: Hook) -> Result<(), AgentError> {
        self.guard()?;
        self.inner.turn_hooks.write().push(hook);
        Ok(())
    }

    /// Adds a tag.
    ///
    /// # Errors
    ///
    /// [`AgentError::SafeExecution`] while running or paused.
    pub fn add_tag(&self, tag: impl Into<String>) -> Result<(), AgentError> {
        self.guard()?;
        self.inner.tags.write().insert(tag.into());
        Ok(())
    }

    // ─────────────────────────────────────────────────────────────────────
    // Queue
    // ─────────────────────────────────────────────────────────────────────

    /// Enqueues a turn, firing `BEFORE_PUT` and `AFTER_PUT` around it.
    ///
    /// # Errors
    ///
    /// [`AgentError::ToolNotPermitted`] if the turn's tool is not permitted
    /// (no hook fires), or a hook failure.
    pub async fn put(&self, turn: Turn) -> Result<(), AgentError> {
        if !self.inner.tools.read().contains_key(turn.tool().name()) {
            return Err(AgentError::ToolNotPermitted {
                agent: self.inner.name.clone(),
                tool: turn.tool().name().to_owned(),
            });
        }

        self.dispatch(HookEvent::AgentBeforePut {
            agent: self.clone(),
            turn: turn.clone(),
        })
        .await?;
        self.inner.queue.lock().push_back(turn.clone());
        tracing::trace!(agent = %self.inner.name, turn = %turn.id(), "turn queued");
        self.dispatch(HookEvent::AgentAfterPut {
            agent: self.clone(),
            turn,
        })
        .await?;
        Ok(())
    }

    /// Enqueues a turn on the agent registered as `agent`.
    ///
    /// # Errors
    ///
    /// [`RegistryError::UnregisteredAgent`](crate::RegistryError::UnregisteredAgent)
    /// for an unknown name, or whatever the target's [`put`](Self::put) raises.
    pub async fn send(&self, agent: &str, turn: Turn) -> Result<(), AgentError> {
        let target = self.inner.registry.agents().get(agent)?;
        tracing::debug!(from = %self.inner.name, to = %agent, turn = %turn.id(), "sending turn");
        target.put(turn).await
    }

    // ─────────────────────────────────────────────────────────────────────
    // Execution
    // ─────────────────────────────────────────────────────────────────────

    /// Starts draining the queue.
    ///
    /// # Errors
    ///
    /// [`AgentError::SafeExecution`] if a run is already active.
    pub fn run(&self) -> Result<AgentRun, AgentError> {
        if self
            .inner
            .running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(AgentError::SafeExecution {
                agent: self.inner.name.clone(),
            });
        }
        tracing::debug!(
            agent = %self.inner.name,
            queued = self.inner.queue.lock().len(),
            "agent run started"
        );
        Ok(AgentRun::new(self.clone()))
    }

    /// Closes the pause gate. The run loop stops before its next turn; a
    /// turn in progress finishes. Idempotent.
    pub fn pause(&self) {
        if !self.inner.pause.send_replace(true) {
            tracing::debug!(agent = %self.inner.name, "agent paused");
        }
    }

    /// Reopens the pause gate. Idempotent.
    pub fn resume(&self) {
        if self.inner.pause.send_replace(false) {
            tracing::debug!(agent = %self.inner.name, "agent resumed");
        }
    }

    pub(crate) async fn wait_resumed(&self) {
        let mut gate = self.inner.pause.subscribe();
        // The sender lives inside the agent, so this only returns once reopened.
        let _ = gate.wait_for(|paused| !*paused).await;
    }

    pub(crate) fn scope(&self) -> ContextScope {
        ContextScope::new(self.context_queue(), self.context_pool())
    }

    /// The in-flight turn if there is one, otherwise the next queued turn.
    pub(crate) fn next_turn(&self) -> Option<Turn> {
        let mut current = self.inner.current_turn.lock();
        if current.is_none() {
            *current = self.inner.queue.lock().pop_front();
        }
        current.clone()
    }

    /// Routes one produced value and fires `ON_TURN_VALUE`. Returns the
    /// value if it should be surfaced.
    pub(crate) async fn route(
        &self,
        turn: &Turn,
        output: Output,
    ) -> Result<Option<Value>, AgentError> {
        let surfaced = match &output {
            Output::Turn(next) => {
                self.put(next.clone()).await?;
                None
            }
            Output::Context(item) if item.is_keyed() => {
                self.context_pool().add(item.clone()).await?;
                None
            }
            Output::Context(item) => {
                self.context_queue().append([item.clone()]).await?;
                None
            }
            Output::Value(value) => Some(value.clone()),
        };

        self.dispatch(HookEvent::AgentTurnValue {
            agent: self.clone(),
            turn: turn.clone(),
            value: output,
        })
        .await?;
        Ok(surfaced)
    }

    pub(crate) async fn dispatch(&self, event: HookEvent) -> Result<(), HookError> {
        let hooks = self.hooks();
        let tags = self.tags();
        self.inner
            .registry
            .hooks()
            .dispatch(&hooks, &tags, event)
            .await
    }

    // ─────────────────────────────────────────────────────────────────────
    // Duplication and serialization
    // ─────────────────────────────────────────────────────────────────────

    /// Starts building an independent copy under a new name.
    ///
    /// The copy inherits the description, tools, hooks, turn hooks, tags and
    /// pending turns, and gets branches of the context queue and pool. The
    /// in-flight turn and the pause state are not copied. Override anything
    /// on the returned builder before [`build`](AgentBuilder::build).
    pub fn branch(&self, name: impl Into<String>) -> AgentBuilder {
        AgentBuilder::new(&self.inner.registry, name)
            .description(self.description())
            .tools(self.tools())
            .context_queue(self.context_queue().branch())
            .context_pool(self.context_pool().branch())
            .hooks(self.hooks())
            .turn_hooks(self.turn_hooks())
            .tags(self.tags())
            .pending(self.turns())
    }

    /// Captures the agent as plain data. Hooks are stored by name.
    #[must_use]
    pub fn export(&self) -> AgentSnapshot {
        let names = |hooks: Vec<Hook>| hooks.iter().map(|hook| hook.name().to_owned()).collect();
        AgentSnapshot {
            name: self.inner.name.clone(),
            description: self.description(),
            tool_names: self.tool_names(),
            queue: self.turns().iter().map(Turn::export).collect(),
            current_turn: self.current_turn().as_ref().map(Turn::export),
            context_queue: self.context_queue().export(),
            context_pool: self.context_pool().export(),
            hooks: names(self.hooks()),
            turn_hooks: names(self.turn_hooks()),
            paused: self.is_paused(),
            tags: self.tags().into_iter().collect(),
        }
    }

    /// Rebuilds and registers an agent from a snapshot.
    ///
    /// The in-flight turn, if any, runs before the queue on the next
    /// [`run`](Self::run). No hooks fire while state is restored.
    ///
    /// # Errors
    ///
    /// Fails if a tool, hook or the agent name does not resolve or is
    /// already taken.
    pub fn import(registry: &Registry, snapshot: AgentSnapshot) -> Result<Self, Error> {
        let tools = snapshot
            .tool_names
            .iter()
            .map(|name| registry.tools().get(name))
            .collect::<Result<Vec<_>, _>>()?;
        let pending = snapshot
            .queue
            .into_iter()
            .map(|turn| Turn::import(registry, turn))
            .collect::<Result<Vec<_>, _>>()?;
        let current_turn = snapshot
            .current_turn
            .map(|turn| Turn::import(registry, turn))
            .transpose()?;

        let agent = AgentBuilder::new(registry, snapshot.name)
            .description(snapshot.description)
            .tools(tools)
            .context_queue(ContextQueue::import(registry, snapshot.context_queue)?)
            .context_pool(ContextPool::import(registry, snapshot.context_pool)?)
            .hooks(registry.hooks().resolve_names(&snapshot.hooks)?)
            .turn_hooks(registry.hooks().resolve_names(&snapshot.turn_hooks)?)
            .tags(snapshot.tags)
            .pending(pending)
            .build()?;

        *agent.inner.current_turn.lock() = current_turn;
        if snapshot.paused {
            agent.pause();
        }
        Ok(agent)
    }

    /// [`export`](Self::export) as a JSON value.
    ///
    /// # Errors
    ///
    /// [`Error::Serialization`] if the snapshot cannot be represented as JSON.
    pub fn to_value(&self) -> Result<Value, Error> {
        Ok(serde_json::to_value(self.export())?)
    }

    /// [`import`](Self::import) from a JSON value.
    ///
    /// # Errors
    ///
    /// [`Error::Serialization`] for a malformed value, otherwise as
    /// [`import`](Self::import).
    pub fn from_value(registry: &Registry, value: Value) -> Result<Self, Error> {
        Self::import(registry, serde_json::from_value(value)?)
    }
}

/// Serializable state of an [`Agent`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentSnapshot {
    /// Registered name.
    pub name: String,
    /// Description.
    #[serde(default)]
    pub description: String,
    /// Permitted tool names.
    pub tool_names: Vec<String>,
    /// Pending turns, front first.
    #[serde(default)]
    pub queue: Vec<TurnSnapshot>,
    /// The in-flight turn, resumed before the queue.
    #[serde(default)]
    pub current_turn: Option<TurnSnapshot>,
    /// The sequential context window.
    pub context_queue: ContextQueueSnapshot,
    /// The keyed context store.
    pub context_pool: ContextPoolSnapshot,
    /// Agent hook names.
    #[serde(default)]
    pub hooks: Vec<String>,
    /// Turn hook names.
    #[serde(default)]
    pub turn_hooks: Vec<String>,
    /// Whether the pause gate was closed.
    #[serde(default)]
    pub paused: bool,
    /// Tags.
    #[serde(default)]
    pub tags: Vec<String>,
}
