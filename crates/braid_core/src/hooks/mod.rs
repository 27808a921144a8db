//! Lifecycle hooks.
//!
//! Hooks observe or intercept every lifecycle transition of tools, turns,
//! agents and context containers. A hook is attached either to one target
//! (`add_hook` on that target) or globally through the
//! [`HookRegistry`], and receives a [`HookEvent`] describing the transition.
//!
//! # Example
//!
//! ```
//! use braid_core::{Hook, HookEvent, Registry};
//! use braid_core::hooks::{ContextPoolHook, HookError};
//!
//! let registry = Registry::new();
//! let hook = Hook::builder("reject_secrets")
//!     .on(ContextPoolHook::BeforeAdd)
//!     .register(&registry, |call| async move {
//!         match &call.event {
//!             HookEvent::PoolBeforeAdd { item, .. } if item.id.as_deref() == Some("secret") => {
//!                 Err(HookError::msg("secrets may not enter the pool"))
//!             }
//!             _ => Ok(()),
//!         }
//!     })
//!     .expect("hook should register");
//!
//! registry.hooks().register_global(&hook).expect("global registration");
//! ```

mod api;
mod error;
mod events;
mod hook;
mod types;

pub use api::HookRegistry;
pub use error::HookError;
pub use events::HookEvent;
pub use hook::{Hook, HookBuilder, HookCall, HookFuture};
pub use types::{
    AgentHook, ContextPoolHook, ContextQueueHook, HookType, Tags, ToolHook, TurnHook,
};
