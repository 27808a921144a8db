//! Construction errors and the crate-level error umbrella.

use thiserror::Error;

use crate::agent::AgentError;
use crate::context::ContextError;
use crate::hooks::HookError;
use crate::registry::RegistryError;
use crate::tool::ToolError;
use crate::turn::TurnError;

/// Invalid construction of a tool, hook, container or agent.
///
/// Raised synchronously when the object is defined, never during execution.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// Names must be non-empty.
    #[error("{kind} name must not be empty")]
    EmptyName {
        /// What was being named (`"tool"`, `"hook"`, `"agent"`).
        kind: &'static str,
    },

    /// A tool was finished without an async body.
    #[error("tool '{tool}' has no async body; call `returning` or `yielding`")]
    MissingBody {
        /// The tool name.
        tool: String,
    },

    /// The same parameter was declared twice.
    #[error("tool '{tool}' declares parameter '{param}' more than once")]
    DuplicateParam {
        /// The tool name.
        tool: String,
        /// The repeated parameter name.
        param: String,
    },

    /// A fixed keyword argument names a parameter the callable does not accept.
    #[error("{owner} has fixed keyword argument '{kwarg}' but no such parameter")]
    UnknownFixedKwarg {
        /// Description of the owner, e.g. `tool 'search'`.
        owner: String,
        /// The offending keyword.
        kwarg: String,
    },

    /// A hook was built without any event type.
    #[error("hook '{hook}' must handle at least one event type")]
    HookWithoutType {
        /// The hook name.
        hook: String,
    },

    /// A context queue limit below one.
    #[error("context queue limit must be at least 1, got {0}")]
    InvalidQueueLimit(usize),

    /// A context pool limit of zero.
    #[error("context pool limit must be at least 1, got {0}")]
    InvalidPoolLimit(usize),

    /// A pool item without an id.
    #[error("context pool items require an id")]
    MissingItemId,

    /// A pool item without a description.
    #[error("context pool item '{id}' requires a description")]
    MissingItemDescription {
        /// The item id.
        id: String,
    },

    /// An agent was given a tool handle that is not the registered instance.
    #[error("tool '{tool}' is registered but not the instance given to this agent")]
    ToolMismatch {
        /// The tool name.
        tool: String,
    },

    /// A hook type string did not parse.
    #[error("unknown hook type '{0}'")]
    UnknownHookType(String),
}

/// Any error raised by the engine.
#[derive(Debug, Error)]
pub enum Error {
    /// Invalid construction.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Name resolution or uniqueness failure.
    #[error(transparent)]
    Registry(#[from] RegistryError),

    /// A hook failed.
    #[error(transparent)]
    Hook(#[from] HookError),

    /// A context container operation failed.
    #[error(transparent)]
    Context(#[from] ContextError),

    /// A tool invocation failed.
    #[error(transparent)]
    Tool(#[from] ToolError),

    /// A turn failed.
    #[error(transparent)]
    Turn(#[from] TurnError),

    /// An agent operation failed.
    #[error(transparent)]
    Agent(#[from] AgentError),

    /// Snapshot (de)serialization failed.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
