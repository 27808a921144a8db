//! Context containers.
//!
//! A [`ContextQueue`] is a bounded window of recent unkeyed items; a
//! [`ContextPool`] is a bounded `id → item` store. Agents own one of each and
//! expose them to running tools and hooks through a [`ContextScope`].

mod error;
mod item;
mod pool;
mod queue;
mod scope;

pub use error::ContextError;
pub use item::ContextItem;
pub use pool::{ContextPool, ContextPoolSnapshot};
pub use queue::{ContextQueue, ContextQueueSnapshot};
pub use scope::{ContextScope, Requirement};
