//! Plugins bundle registrations (tools, global hooks) behind one call.
//!
//! A plugin is installed on a [`Registry`] with
//! [`Registry::add_plugins`]. Installation happens in two phases: every
//! plugin's [`build`](Plugin::build) runs in order, then every plugin's
//! [`ready`](Plugin::ready). Use `build` for registrations and `ready` for
//! work that depends on other plugins having registered theirs.
//!
//! # Example
//!
//! ```
//! use braid_core::{Error, Hook, Plugin, Registry};
//! use braid_core::hooks::AgentHook;
//!
//! struct AuditPlugin;
//!
//! impl Plugin for AuditPlugin {
//!     fn build(&self, registry: &Registry) -> Result<(), Error> {
//!         let hook = Hook::builder("audit_turns")
//!             .on(AgentHook::AfterTurn)
//!             .register(registry, |_call| async { Ok(()) })?;
//!         registry.hooks().register_global(&hook)?;
//!         Ok(())
//!     }
//! }
//!
//! let registry = Registry::new();
//! registry.add_plugins(AuditPlugin).expect("plugin should install");
//! assert!(registry.hooks().get("audit_turns").is_ok());
//! ```

use crate::error::Error;
use crate::registry::Registry;

/// A unit of registry configuration.
pub trait Plugin: Send + Sync + 'static {
    /// Identifier used to skip repeated installation.
    fn name(&self) -> &'static str {
        core::any::type_name::<Self>()
    }

    /// Registers tools, hooks or agents.
    ///
    /// # Errors
    ///
    /// Any registration failure aborts installation.
    fn build(&self, registry: &Registry) -> Result<(), Error>;

    /// Called once every plugin in the same call has been built.
    fn ready(&self, _registry: &Registry) {}
}

/// Anything [`Registry::add_plugins`] accepts.
pub trait Plugins {
    /// Flattens into boxed plugins, in installation order.
    fn into_plugins(self) -> Vec<Box<dyn Plugin>>;
}

impl<P: Plugin> Plugins for P {
    fn into_plugins(self) -> Vec<Box<dyn Plugin>> {
        vec![Box::new(self)]
    }
}

/// Ordered, editable list of plugins produced by a [`PluginGroup`].
#[derive(Default)]
pub struct PluginGroupBuilder {
    plugins: Vec<(&'static str, Box<dyn Plugin>)>,
}

impl PluginGroupBuilder {
    /// Creates an empty group.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a plugin.
    #[must_use]
    pub fn add<P: Plugin>(mut self, plugin: P) -> Self {
        self.plugins
            .push((core::any::type_name::<P>(), Box::new(plugin)));
        self
    }

    /// Removes every plugin of type `P`.
    #[must_use]
    pub fn disable<P: Plugin>(mut self) -> Self {
        let target = core::any::type_name::<P>();
        self.plugins.retain(|(ty, _)| *ty != target);
        self
    }

    /// Number of plugins in the group.
    #[must_use]
    pub fn len(&self) -> usize {
        self.plugins.len()
    }

    /// Returns `true` if the group is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.plugins.is_empty()
    }
}

impl Plugins for PluginGroupBuilder {
    fn into_plugins(self) -> Vec<Box<dyn Plugin>> {
        self.plugins.into_iter().map(|(_, plugin)| plugin).collect()
    }
}

/// A named collection of plugins that can be customised before installation.
pub trait PluginGroup {
    /// Returns the plugins in this group.
    fn build(self) -> PluginGroupBuilder;
}
