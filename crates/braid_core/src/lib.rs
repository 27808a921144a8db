//! The braid orchestration engine.
//!
//! `braid_core` composes async units of work into chains and streams:
//!
//! - [`tool`] - [`Tool`]s wrap async bodies with argument binding, fixed
//!   keyword arguments, context injection, locking and hooks
//! - [`turn`] - a [`Turn`] binds one tool to arguments and runs it under a deadline
//! - [`agent`] - an [`Agent`] drains a queue of turns and routes their output
//! - [`context`] - [`ContextQueue`] (bounded window) and [`ContextPool`]
//!   (bounded keyed store)
//! - [`hooks`] - lifecycle callbacks, global or attached to one target
//! - [`registry`] - name-keyed tables that make everything resolvable and
//!   serializable
//!
//! Nothing is global: every tool, hook and agent lives in the [`Registry`]
//! it was built with.
//!
//! # Example
//!
//! ```
//! # tokio_test::block_on(async {
//! use braid_core::{Agent, ContextItem, Output, Registry, Tool, Turn};
//!
//! let registry = Registry::new();
//! let greet = Tool::builder("greet")
//!     .param("name")
//!     .yielding(|input| {
//!         let name: String = input.get_param("name").unwrap_or_default();
//!         futures::stream::iter([
//!             Ok(Output::Context(ContextItem::new(format!("greeted {name}")))),
//!             Ok(Output::value(format!("hello, {name}"))),
//!         ])
//!     })
//!     .register(&registry)
//!     .expect("tool should register");
//!
//! let agent = Agent::builder(&registry, "greeter")
//!     .tool(&greet)
//!     .build()
//!     .expect("agent should build");
//! agent
//!     .put(Turn::builder(&registry, &greet).kwarg("name", "ada").build().expect("registered"))
//!     .await
//!     .expect("tool is permitted");
//!
//! let mut run = agent.run().expect("agent is idle");
//! let (_, value) = run.next().await.expect("a value").expect("turn succeeds");
//! assert_eq!(value, "hello, ada");
//! assert_eq!(agent.context_queue().history(None), "greeted ada");
//! # });
//! ```

/// Agents and their run loop.
pub mod agent;

/// Engine-wide defaults.
pub mod config;

/// Context containers and injection.
pub mod context;

/// The crate-wide error type.
pub mod error;

/// Lifecycle hooks.
pub mod hooks;

/// Invocation timing.
pub mod metadata;

/// Values produced by tools.
pub mod output;

/// Bundled registrations.
pub mod plugin;

/// Name-keyed tables.
pub mod registry;

/// Tools.
pub mod tool;

/// Turns.
pub mod turn;

pub use agent::{Agent, AgentError, AgentRun, AgentSnapshot};
pub use config::EngineConfig;
pub use context::{ContextItem, ContextPool, ContextQueue, ContextScope, Requirement};
pub use error::{ConfigError, Error};
pub use hooks::{Hook, HookCall, HookError, HookEvent, HookType};
pub use metadata::Timing;
pub use output::{Output, TurnOutput};
pub use plugin::{Plugin, PluginGroup, PluginGroupBuilder, Plugins};
pub use registry::{Registry, RegistryError};
pub use tool::{Tool, ToolError};
pub use turn::{StopReason, Turn, TurnError, TurnStream};

/// Re-export all common types for easy access.
pub mod prelude {
    pub use crate::agent::*;
    pub use crate::config::EngineConfig;
    pub use crate::context::*;
    pub use crate::error::{ConfigError, Error};
    pub use crate::hooks::*;
    pub use crate::output::*;
    pub use crate::plugin::*;
    pub use crate::registry::*;
    pub use crate::tool::*;
    pub use crate::turn::*;
}
