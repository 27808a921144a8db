//! A structural orchestration engine for composing async tools into turns,
//! agents and context.
//!
//! - [`braid_core`] - the engine: tools, turns, agents, context containers,
//!   hooks and registries
//! - [`braid_core_plugins`] - tracing setup and the default plugin bundle

pub use braid_core;
pub use braid_core_plugins;

/// Re-export all common types for easy access.
pub mod prelude {
    pub use braid_core::prelude::*;
    pub use braid_core_plugins::{DefaultPlugins, TracingConfig, TracingFormat, TracingPlugin};
}
