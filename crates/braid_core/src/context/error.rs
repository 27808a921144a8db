use thiserror::Error;

use crate::error::ConfigError;
use crate::hooks::HookError;

/// Errors raised by the context containers.
#[derive(Debug, Error)]
pub enum ContextError {
    /// The item or limit was rejected.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// No pool item with the requested id.
    #[error("no context item with id '{0}'")]
    NotFound(String),

    /// A context hook failed.
    #[error(transparent)]
    Hook(#[from] HookError),
}
