use core::fmt;
use core::time::Duration;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::error::TurnError;
use crate::error::Error;
use crate::hooks::{Hook, HookError, HookEvent, Tags};
use crate::output::{TurnOutput, TurnOutputSnapshot};
use crate::registry::{Registry, RegistryError};
use crate::tool::{Arg, Tool};

// ─────────────────────────────────────────────────────────────────────────────
// Outcome
// ─────────────────────────────────────────────────────────────────────────────

/// How an execution attempt ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// The tool finished and every hook succeeded.
    Completed,
    /// The deadline elapsed.
    Timeout,
    /// The tool or a hook failed.
    Error,
    /// The execution was dropped before it settled.
    Cancelled,
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            StopReason::Completed => "completed",
            StopReason::Timeout => "timeout",
            StopReason::Error => "error",
            StopReason::Cancelled => "cancelled",
        })
    }
}

/// Outcome fields of the most recent execution attempt.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TurnMetadata {
    /// When execution started.
    #[serde(default)]
    pub start_time: Option<DateTime<Utc>>,
    /// When it settled.
    #[serde(default)]
    pub end_time: Option<DateTime<Utc>>,
    /// How it ended. `None` until it settles.
    #[serde(default)]
    pub stop_reason: Option<StopReason>,
}

// ─────────────────────────────────────────────────────────────────────────────
// Turn
// ─────────────────────────────────────────────────────────────────────────────

pub(crate) struct Binding {
    pub(crate) args: Vec<Arg>,
    pub(crate) kwargs: IndexMap<String, Arg>,
    pub(crate) timeout: Duration,
    pub(crate) tags: Tags,
}

#[derive(Default)]
pub(crate) struct TurnState {
    pub(crate) output: Option<TurnOutput>,
    pub(crate) metadata: TurnMetadata,
    pub(crate) extra: Map<String, Value>,
}

pub(crate) struct TurnInner {
    pub(crate) id: String,
    pub(crate) tool: Tool,
    pub(crate) binding: Mutex<Binding>,
    pub(crate) state: Mutex<TurnState>,
    pub(crate) hooks: RwLock<Vec<Hook>>,
    pub(crate) inherited_hooks: RwLock<Vec<Hook>>,
    pub(crate) running: AtomicBool,
    pub(crate) registry: Registry,
}

/// A declarative binding of one tool to its arguments.
///
/// Turns are what travel through agent queues. A turn names what should
/// happen; [`returning`](Self::returning) or [`yielding`](Self::yielding)
/// make it happen under the turn's timeout, firing turn hooks along the way.
/// The handle is shared: clones observe the same arguments and outcome.
///
/// ```
/// # tokio_test::block_on(async {
/// use braid_core::{Output, Registry, StopReason, Tool, Turn};
///
/// let registry = Registry::new();
/// Tool::builder("double")
///     .param("x")
///     .returning(|input| async move {
///         let x: i64 = input.get_param("x")?;
///         Ok(Output::value(x * 2))
///     })
///     .register(&registry)
///     .expect("tool should register");
///
/// let turn = Turn::builder(&registry, "double")
///     .kwarg("x", 5)
///     .build()
///     .expect("tool is registered");
///
/// assert_eq!(turn.returning().await.expect("turn should run"), Output::value(10));
/// assert_eq!(turn.stop_reason(), Some(StopReason::Completed));
/// # });
/// ```
#[derive(Clone)]
pub struct Turn {
    pub(crate) inner: Arc<TurnInner>,
}

impl fmt::Debug for Turn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Turn")
            .field("id", &self.inner.id)
            .field("tool", &self.inner.tool.name())
            .field("timeout", &self.timeout())
            .field("metadata", &self.metadata())
            .finish_non_exhaustive()
    }
}

impl Turn {
    /// Starts building a turn for a tool given by name or handle.
    pub fn builder(registry: &Registry, tool: impl Into<ToolRef>) -> TurnBuilder {
        TurnBuilder::new(registry, tool.into())
    }

    /// Unique id, stable across export and import.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.inner.id
    }

    /// The bound tool.
    #[must_use]
    pub fn tool(&self) -> &Tool {
        &self.inner.tool
    }

    /// Positional arguments, unevaluated.
    #[must_use]
    pub fn args(&self) -> Vec<Arg> {
        self.inner.binding.lock().args.clone()
    }

    /// Keyword arguments, unevaluated.
    #[must_use]
    pub fn kwargs(&self) -> IndexMap<String, Arg> {
        self.inner.binding.lock().kwargs.clone()
    }

    /// The execution deadline.
    #[must_use]
    pub fn timeout(&self) -> Duration {
        self.inner.binding.lock().timeout
    }

    /// Tags used to filter hooks.
    #[must_use]
    pub fn tags(&self) -> Tags {
        self.inner.binding.lock().tags.clone()
    }

    /// The attached hooks.
    #[must_use]
    pub fn hooks(&self) -> Vec<Hook> {
        self.inner.hooks.read().clone()
    }

    /// What the most recent execution produced.
    #[must_use]
    pub fn output(&self) -> Option<TurnOutput> {
        self.inner.state.lock().output.clone()
    }

    /// Outcome fields of the most recent execution.
    #[must_use]
    pub fn metadata(&self) -> TurnMetadata {
        self.inner.state.lock().metadata
    }

    /// How the most recent execution ended.
    #[must_use]
    pub fn stop_reason(&self) -> Option<StopReason> {
        self.inner.state.lock().metadata.stop_reason
    }

    /// Free-form caller data carried with the turn.
    #[must_use]
    pub fn extra(&self) -> Map<String, Value> {
        self.inner.state.lock().extra.clone()
    }

    /// Returns `true` while an execution is in progress.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::Acquire)
    }

    /// Returns `true` if both handles are the same turn.
    #[must_use]
    pub fn ptr_eq(&self, other: &Turn) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    fn guard(&self) -> Result<(), TurnError> {
        if self.is_running() {
            return Err(TurnError::SafeExecution {
                turn: self.inner.id.clone(),
            });
        }
        Ok(())
    }

    /// Replaces the positional arguments.
    ///
    /// # Errors
    ///
    /// [`TurnError::SafeExecution`] while running.
    pub fn set_args(&self, args: Vec<Arg>) -> Result<(), TurnError> {
        self.guard()?;
        self.inner.binding.lock().args = args;
        Ok(())
    }

    /// Sets one keyword argument.
    ///
    /// # Errors
    ///
    /// [`TurnError::SafeExecution`] while running.
    pub fn set_kwarg(&self, key: impl Into<String>, value: impl Into<Arg>) -> Result<(), TurnError> {
        self.guard()?;
        self.inner
            .binding
            .lock()
            .kwargs
            .insert(key.into(), value.into());
        Ok(())
    }

    /// Changes the execution deadline.
    ///
    /// # Errors
    ///
    /// [`TurnError::SafeExecution`] while running.
    pub fn set_timeout(&self, timeout: Duration) -> Result<(), TurnError> {
        self.guard()?;
        self.inner.binding.lock().timeout = timeout;
        Ok(())
    }

    /// Adds a tag.
    ///
    /// # Errors
    ///
    /// [`TurnError::SafeExecution`] while running.
    pub fn add_tag(&self, tag: impl Into<String>) -> Result<(), TurnError> {
        self.guard()?;
        self.inner.binding.lock().tags.insert(tag.into());
        Ok(())
    }

    /// Attaches a hook.
    ///
    /// # Errors
    ///
    /// [`TurnError::SafeExecution`] while running.
    pub fn add_hook(&self, hook: Hook) -> Result<(), TurnError> {
        self.guard()?;
        self.inner.hooks.write().push(hook);
        Ok(())
    }

    /// Stores a free-form value alongside the turn.
    pub fn set_extra(&self, key: impl Into<String>, value: impl Into<Value>) {
        self.inner
            .state
            .lock()
            .extra
            .insert(key.into(), value.into());
    }

    /// Hooks attached by whoever is executing the turn, fired after the
    /// turn's own hooks.
    pub(crate) fn set_inherited_hooks(&self, hooks: Vec<Hook>) {
        *self.inner.inherited_hooks.write() = hooks;
    }

    pub(crate) async fn dispatch(&self, event: HookEvent) -> Result<(), HookError> {
        let mut hooks = self.hooks();
        for hook in self.inner.inherited_hooks.read().iter() {
            if !hooks.iter().any(|present| present.ptr_eq(hook)) {
                hooks.push(hook.clone());
            }
        }
        let tags = self.tags();
        self.inner
            .registry
            .hooks()
            .dispatch(&hooks, &tags, event)
            .await
    }

    /// Captures the turn as plain data.
    ///
    /// Lazy arguments are evaluated; hooks are stored by name.
    #[must_use]
    pub fn export(&self) -> TurnSnapshot {
        let (args, kwargs, timeout, tags) = {
            let binding = self.inner.binding.lock();
            (
                binding.args.clone(),
                binding.kwargs.clone(),
                binding.timeout,
                binding.tags.clone(),
            )
        };
        let (output, metadata, extra) = {
            let state = self.inner.state.lock();
            (state.output.clone(), state.metadata, state.extra.clone())
        };
        TurnSnapshot {
            id: self.inner.id.clone(),
            tool_name: self.inner.tool.name().to_owned(),
            args: args.iter().map(Arg::evaluate).collect(),
            kwargs: kwargs
                .iter()
                .map(|(key, arg)| (key.clone(), arg.evaluate()))
                .collect(),
            timeout_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
            tags: tags.into_iter().collect(),
            metadata,
            output: output.as_ref().map(TurnOutput::export),
            extra,
            hooks: self
                .hooks()
                .iter()
                .map(|hook| hook.name().to_owned())
                .collect(),
        }
    }

    /// Rebuilds a turn from a snapshot, resolving the tool and hooks by name.
    ///
    /// # Errors
    ///
    /// Fails with a [`RegistryError`] for an unknown tool or hook name.
    pub fn import(registry: &Registry, snapshot: TurnSnapshot) -> Result<Self, Error> {
        let tool = registry.tools().get(&snapshot.tool_name)?;
        let hooks = registry.hooks().resolve_names(&snapshot.hooks)?;
        let output = snapshot
            .output
            .map(|output| TurnOutput::import(registry, output))
            .transpose()?;

        Ok(Turn {
            inner: Arc::new(TurnInner {
                id: snapshot.id,
                tool,
                binding: Mutex::new(Binding {
                    args: snapshot.args.into_iter().map(Arg::Value).collect(),
                    kwargs: snapshot
                        .kwargs
                        .into_iter()
                        .map(|(key, value)| (key, Arg::Value(value)))
                        .collect(),
                    timeout: Duration::from_millis(snapshot.timeout_ms),
                    tags: snapshot.tags.into_iter().collect(),
                }),
                state: Mutex::new(TurnState {
                    output,
                    metadata: snapshot.metadata,
                    extra: snapshot.extra,
                }),
                hooks: RwLock::new(hooks),
                inherited_hooks: RwLock::new(Vec::new()),
                running: AtomicBool::new(false),
                registry: registry.clone(),
            }),
        })
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

fn new_turn_id() -> String {
    nanoid::nanoid!()
}

/// Serializable state of a [`Turn`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TurnSnapshot {
    /// Turn id.
    #[serde(default = "new_turn_id")]
    pub id: String,
    /// Registered name of the bound tool.
    pub tool_name: String,
    /// Evaluated positional arguments.
    #[serde(default)]
    pub args: Vec<Value>,
    /// Evaluated keyword arguments.
    #[serde(default)]
    pub kwargs: Map<String, Value>,
    /// Execution deadline in milliseconds.
    pub timeout_ms: u64,
    /// Tags.
    #[serde(default)]
    pub tags: Vec<String>,
    /// Outcome fields.
    #[serde(default)]
    pub metadata: TurnMetadata,
    /// What the last execution produced.
    #[serde(default)]
    pub output: Option<TurnOutputSnapshot>,
    /// Free-form caller data.
    #[serde(default)]
    pub extra: Map<String, Value>,
    /// Attached hook names.
    #[serde(default)]
    pub hooks: Vec<String>,
}

// ─────────────────────────────────────────────────────────────────────────────
// TurnBuilder
// ─────────────────────────────────────────────────────────────────────────────

/// A tool given by registered name or by handle.
#[derive(Debug, Clone)]
pub enum ToolRef {
    /// Resolved through the tool registry.
    Name(String),
    /// Used as given.
    Tool(Tool),
}

impl From<&str> for ToolRef {
    fn from(name: &str) -> Self {
        ToolRef::Name(name.to_owned())
    }
}

impl From<String> for ToolRef {
    fn from(name: String) -> Self {
        ToolRef::Name(name)
    }
}

impl From<Tool> for ToolRef {
    fn from(tool: Tool) -> Self {
        ToolRef::Tool(tool)
    }
}

impl From<&Tool> for ToolRef {
    fn from(tool: &Tool) -> Self {
        ToolRef::Tool(tool.clone())
    }
}

/// Builder for [`Turn`].
#[derive(Debug)]
pub struct TurnBuilder {
    registry: Registry,
    tool: ToolRef,
    args: Vec<Arg>,
    kwargs: IndexMap<String, Arg>,
    timeout: Option<Duration>,
    tags: Tags,
    hooks: Vec<Hook>,
    extra: Map<String, Value>,
}

impl TurnBuilder {
    fn new(registry: &Registry, tool: ToolRef) -> Self {
        Self {
            registry: registry.clone(),
            tool,
            args: Vec::new(),
            kwargs: IndexMap::new(),
            timeout: None,
            tags: Tags::new(),
            hooks: Vec::new(),
            extra: Map::new(),
        }
    }

    /// Appends a positional argument.
    #[must_use]
    pub fn arg(mut self, value: impl Into<Value>) -> Self {
        self.args.push(Arg::Value(value.into()));
        self
    }

    /// Appends a positional argument evaluated at execution time.
    #[must_use]
    pub fn lazy_arg(mut self, value: impl Fn() -> Value + Send + Sync + 'static) -> Self {
        self.args.push(Arg::lazy(value));
        self
    }

    /// Sets a keyword argument.
    #[must_use]
    pub fn kwarg(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.kwargs.insert(key.into(), Arg::Value(value.into()));
        self
    }

    /// Sets a keyword argument evaluated at execution time.
    #[must_use]
    pub fn lazy_kwarg(
        mut self,
        key: impl Into<String>,
        value: impl Fn() -> Value + Send + Sync + 'static,
    ) -> Self {
        self.kwargs.insert(key.into(), Arg::lazy(value));
        self
    }

    /// Overrides the registry's default timeout.
    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Adds a tag.
    #[must_use]
    pub fn tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.insert(tag.into());
        self
    }

    /// Attaches an instance hook.
    #[must_use]
    pub fn hook(mut self, hook: Hook) -> Self {
        self.hooks.push(hook);
        self
    }

    /// Stores a free-form value alongside the turn.
    #[must_use]
    pub fn extra(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.extra.insert(key.into(), value.into());
        self
    }

    /// Resolves the tool and finishes the turn.
    ///
    /// # Errors
    ///
    /// [`RegistryError::UnregisteredTool`] if the tool name is unknown.
    pub fn build(self) -> Result<Turn, RegistryError> {
        let tool = match self.tool {
            ToolRef::Name(name) => self.registry.tools().get(&name)?,
            ToolRef::Tool(tool) => tool,
        };
        let timeout = self
            .timeout
            .unwrap_or(self.registry.config().turn_timeout);

        Ok(Turn {
            inner: Arc::new(TurnInner {
                id: new_turn_id(),
                tool,
                binding: Mutex::new(Binding {
                    args: self.args,
                    kwargs: self.kwargs,
                    timeout,
                    tags: self.tags,
                }),
                state: Mutex::new(TurnState {
                    extra: self.extra,
                    ..TurnState::default()
                }),
                hooks: RwLock::new(self.hooks),
                inherited_hooks: RwLock::new(Vec::new()),
                running: AtomicBool::new(false),
                registry: self.registry,
            }),
        })
    }
}
