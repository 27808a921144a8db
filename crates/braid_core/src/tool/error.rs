//! Error types for tool invocation.

use thiserror::Error;

use super::ToolShape;
use crate::context::ContextError;
use crate::hooks::HookError;

/// Errors that can occur while invoking a tool.
#[derive(Debug, Error)]
pub enum ToolError {
    /// Arguments could not be bound to the declared parameters.
    #[error("Parameter error: {0}")]
    ParameterError(String),

    /// The tool body failed.
    #[error("Execution error: {0}")]
    ExecutionError(String),

    /// A required parameter received no value.
    #[error("tool '{tool}' is missing required argument '{param}'")]
    MissingArgument {
        /// The tool name.
        tool: String,
        /// The parameter without a value.
        param: String,
    },

    /// The tool was invoked through the entry point of the other shape.
    #[error("tool '{tool}' is {actual}, not {expected}")]
    WrongShape {
        /// The tool name.
        tool: String,
        /// The shape the caller assumed.
        expected: ToolShape,
        /// The tool's actual shape.
        actual: ToolShape,
    },

    /// The invocation was cancelled through its token.
    #[error("tool '{0}' was cancelled")]
    Cancelled(String),

    /// A tool hook failed.
    #[error(transparent)]
    Hook(#[from] HookError),

    /// A context container rejected an operation performed by the body.
    #[error(transparent)]
    Context(#[from] ContextError),

    /// JSON serialization/deserialization error.
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
}

impl ToolError {
    /// Creates a [`ParameterError`](Self::ParameterError).
    pub fn parameter_error(msg: impl Into<String>) -> Self {
        Self::ParameterError(msg.into())
    }

    /// Creates an [`ExecutionError`](Self::ExecutionError).
    pub fn execution_error(msg: impl Into<String>) -> Self {
        Self::ExecutionError(msg.into())
    }
}
