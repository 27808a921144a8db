use thiserror::Error;

use crate::context::ContextError;
use crate::error::ConfigError;
use crate::hooks::HookError;
use crate::registry::RegistryError;
use crate::turn::TurnError;

/// Errors raised by an agent or its run loop.
#[derive(Debug, Error)]
pub enum AgentError {
    /// The agent is running or paused; its configuration is frozen.
    #[error("agent '{agent}' is running or paused; its configuration cannot change")]
    SafeExecution {
        /// The agent name.
        agent: String,
    },

    /// A turn names a tool outside the agent's permitted set.
    #[error("agent '{agent}' does not accept tool '{tool}'")]
    ToolNotPermitted {
        /// The agent name.
        agent: String,
        /// The rejected tool.
        tool: String,
    },

    /// A turn failed; its lifecycle hooks already ran.
    #[error(transparent)]
    Turn(#[from] TurnError),

    /// An agent hook failed.
    #[error(transparent)]
    Hook(#[from] HookError),

    /// Routing a value into the context queue or pool failed.
    #[error(transparent)]
    Context(#[from] ContextError),

    /// A name did not resolve.
    #[error(transparent)]
    Registry(#[from] RegistryError),

    /// A configuration change was invalid.
    #[error(transparent)]
    Config(#[from] ConfigError),
}
