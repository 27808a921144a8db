//! Agents: queue-driven turn runners.
//!
//! An [`Agent`] owns a FIFO of [`Turn`](crate::Turn)s, a permitted tool set,
//! a [`ContextQueue`](crate::ContextQueue) and a
//! [`ContextPool`](crate::ContextPool). [`Agent::run`] returns an
//! [`AgentRun`] that executes queued turns one at a time and routes what
//! they produce by variant of [`Output`](crate::Output).
//!
//! Hooks come in two flavours:
//!
//! - agent hooks (`agent.*` events) fire for the agent itself
//! - turn hooks (`turn.*` events) are attached to every turn while the agent
//!   runs it, after the turn's own hooks
//!
//! While a run is active or the pause gate is closed the agent's
//! configuration is frozen; [`put`](Agent::put), [`pause`](Agent::pause) and
//! [`resume`](Agent::resume) stay available.

mod builder;
mod definition;
mod error;
mod run;

pub use builder::AgentBuilder;
pub use definition::{Agent, AgentSnapshot};
pub use error::AgentError;
pub use run::AgentRun;
