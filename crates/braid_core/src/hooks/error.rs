//! Hook failures.

use thiserror::Error;

/// Errors raised by or around a hook.
///
/// Handlers return [`HookError::msg`] or [`HookError::other`]; dispatch wraps
/// whatever a handler returns in [`HookError::Failed`] so the failing hook is
/// named.
#[derive(Debug, Error)]
pub enum HookError {
    /// Failure message raised by a handler.
    #[error("{0}")]
    Message(String),

    /// Arbitrary error raised by a handler.
    #[error(transparent)]
    Other(Box<dyn core::error::Error + Send + Sync>),

    /// The hook requires a context container but no turn is executing.
    #[error("hook '{hook}' requires the {param} but no turn is executing")]
    MissingContext {
        /// The hook name.
        hook: String,
        /// `"context queue"` or `"context pool"`.
        param: &'static str,
    },

    /// A named hook failed.
    #[error("hook '{hook}' failed: {source}")]
    Failed {
        /// The hook name.
        hook: String,
        /// What the handler raised.
        #[source]
        source: Box<HookError>,
    },
}

impl HookError {
    /// Creates a [`Message`](Self::Message).
    pub fn msg(message: impl Into<String>) -> Self {
        Self::Message(message.into())
    }

    /// Creates an [`Other`](Self::Other) from any error.
    pub fn other(err: impl core::error::Error + Send + Sync + 'static) -> Self {
        Self::Other(Box::new(err))
    }

    /// Name of the hook that failed, if known.
    #[must_use]
    pub fn hook_name(&self) -> Option<&str> {
        match self {
            HookError::Failed { hook, .. } | HookError::MissingContext { hook, .. } => Some(hook),
            HookError::Message(_) | HookError::Other(_) => None,
        }
    }
}
