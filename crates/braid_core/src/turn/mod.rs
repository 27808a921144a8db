//! Turns: one tool bound to its arguments, executed under a deadline.
//!
//! A [`Turn`] is built with [`Turn::builder`], executed with
//! [`Turn::returning`] or [`Turn::yielding`] depending on the tool's shape,
//! and records how the attempt ended in its [`TurnMetadata`].
//!
//! # Lifecycle hooks
//!
//! | Event | When |
//! |-------|------|
//! | `turn.before_run` | before the tool is called; counts as an error if it fails |
//! | `turn.after_run` | after the tool succeeded, with the output |
//! | `turn.on_timeout` | the deadline elapsed |
//! | `turn.on_error` | the tool or a hook failed |
//! | `turn.on_complete` | exactly once per attempt, with the stop reason |
//!
//! A turn cannot be re-entered or reconfigured while it runs; both fail with
//! [`TurnError::SafeExecution`].

mod definition;
mod error;
mod execution;
mod stream;

pub use definition::{StopReason, ToolRef, Turn, TurnBuilder, TurnMetadata, TurnSnapshot};
pub use error::TurnError;
pub use stream::TurnStream;
