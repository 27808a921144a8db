//! Engine-wide defaults.
//!
//! [`EngineConfig`] is attached to a [`Registry`](crate::Registry) and read by
//! constructors that need a default the caller did not supply: the turn
//! timeout, the size of an agent's context queue, and the capacity of an
//! agent's context pool.

use core::time::Duration;

/// Default timeout applied to turns built without an explicit timeout.
pub const DEFAULT_TURN_TIMEOUT: Duration = Duration::from_secs(60);

/// Default limit of the context queue an agent creates for itself.
pub const DEFAULT_CONTEXT_QUEUE_LIMIT: usize = 10;

/// Defaults used when building turns and agents.
///
/// # Example
///
/// ```
/// use braid_core::{EngineConfig, Registry};
/// use core::time::Duration;
///
/// let registry = Registry::with_config(
///     EngineConfig::default()
///         .with_turn_timeout(Duration::from_secs(5))
///         .with_context_queue_limit(32),
/// );
/// assert_eq!(registry.config().turn_timeout, Duration::from_secs(5));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineConfig {
    /// Timeout for turns that do not set one.
    pub turn_timeout: Duration,
    /// Limit of the context queue created by [`Agent`](crate::Agent) builders.
    pub context_queue_limit: usize,
    /// Capacity of the context pool created by agent builders. `None` is unbounded.
    pub context_pool_limit: Option<usize>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            turn_timeout: DEFAULT_TURN_TIMEOUT,
            context_queue_limit: DEFAULT_CONTEXT_QUEUE_LIMIT,
            context_pool_limit: None,
        }
    }
}

impl EngineConfig {
    /// Sets the default turn timeout.
    #[must_use]
    pub fn with_turn_timeout(mut self, timeout: Duration) -> Self {
        self.turn_timeout = timeout;
        self
    }

    /// Sets the default context queue limit.
    #[must_use]
    pub fn with_context_queue_limit(mut self, limit: usize) -> Self {
        self.context_queue_limit = limit;
        self
    }

    /// Sets the default context pool capacity.
    #[must_use]
    pub fn with_context_pool_limit(mut self, limit: Option<usize>) -> Self {
        self.context_pool_limit = limit;
        self
    }
}
