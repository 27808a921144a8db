//! Tools: named async units of work.
//!
//! A [`Tool`] wraps an async body with argument binding, fixed keyword
//! arguments, optional context injection, an optional per-tool lock and
//! lifecycle hooks. Tools are registered by name when built so turns and
//! snapshots can refer to them.
//!
//! - [`ToolBuilder`] declares parameters and the body
//! - [`Invocation`] carries call-site arguments
//! - [`ToolInput`] is what the body receives
//! - [`ToolStream`] drives a yielding body

mod builder;
mod definition;
mod error;
mod param;
mod stream;

pub use builder::ToolBuilder;
pub use definition::Tool;
pub use error::ToolError;
pub use param::{Arg, Invocation, ToolInput, ToolParam, ToolShape};
pub use stream::ToolStream;
