use core::time::Duration;

use thiserror::Error;

use super::StopReason;
use crate::hooks::HookError;
use crate::tool::{ToolError, ToolShape};

/// Errors raised while configuring or executing a turn.
#[derive(Debug, Error)]
pub enum TurnError {
    /// The turn is executing; it cannot be modified or started again.
    #[error("turn '{turn}' is running; it cannot be modified or run again")]
    SafeExecution {
        /// The turn id.
        turn: String,
    },

    /// The entry point does not match the tool's shape.
    #[error("tool '{tool}' is {actual}; run the turn with `{actual}()` instead")]
    WrongRunMethod {
        /// The tool name.
        tool: String,
        /// The tool's actual shape.
        actual: ToolShape,
    },

    /// The deadline elapsed before the tool finished.
    #[error("turn '{turn}' running tool '{tool}' timed out after {timeout:?}")]
    Timeout {
        /// The tool name.
        tool: String,
        /// The turn id.
        turn: String,
        /// The configured timeout.
        timeout: Duration,
    },

    /// The consumer stopped the turn because a produced value could not be
    /// handled.
    #[error("turn '{turn}' was stopped after a value could not be handled: {reason}")]
    Interrupted {
        /// The turn id.
        turn: String,
        /// Why the value was rejected.
        reason: String,
    },

    /// The tool failed.
    #[error(transparent)]
    Tool(#[from] ToolError),

    /// A turn hook failed.
    #[error(transparent)]
    Hook(#[from] HookError),
}

impl TurnError {
    /// How a turn that failed with this error is classified.
    ///
    /// `None` for errors raised before execution started.
    #[must_use]
    pub fn stop_reason(&self) -> Option<StopReason> {
        match self {
            TurnError::SafeExecution { .. } | TurnError::WrongRunMethod { .. } => None,
            TurnError::Timeout { .. } => Some(StopReason::Timeout),
            TurnError::Interrupted { .. } | TurnError::Tool(_) | TurnError::Hook(_) => {
                Some(StopReason::Error)
            }
        }
    }
}
