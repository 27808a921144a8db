//! Context injection while a turn executes.
//!
//! An agent installs its context queue and pool as the active
//! [`ContextScope`] for the duration of each turn. Tools and hooks that
//! declared a context parameter read it from there.

use core::future::Future;

use super::pool::ContextPool;
use super::queue::ContextQueue;

tokio::task_local! {
    static ACTIVE_SCOPE: ContextScope;
}

/// Whether a declared context parameter must be supplied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Requirement {
    /// Missing outside a running turn raises a missing-argument error.
    Required,
    /// Missing outside a running turn yields `None`.
    Optional,
}

/// The context containers visible to the current task.
#[derive(Debug, Clone, Default)]
pub struct ContextScope {
    /// The executing agent's context queue.
    pub queue: Option<ContextQueue>,
    /// The executing agent's context pool.
    pub pool: Option<ContextPool>,
}

impl ContextScope {
    /// A scope exposing both containers.
    #[must_use]
    pub fn new(queue: ContextQueue, pool: ContextPool) -> Self {
        Self {
            queue: Some(queue),
            pool: Some(pool),
        }
    }

    /// The scope installed on the current task, or an empty one.
    #[must_use]
    pub fn current() -> Self {
        ACTIVE_SCOPE.try_with(Clone::clone).unwrap_or_default()
    }

    /// Runs `fut` with this scope installed.
    pub async fn run<F: Future>(self, fut: F) -> F::Output {
        ACTIVE_SCOPE.scope(self, fut).await
    }
}
