//! Core infrastructure plugins for braid.
//!
//! - [`TracingPlugin`] - subscriber setup and lifecycle logging via `tracing`
//! - [`DefaultPlugins`] - the bundle most applications install
//!
//! # Example
//!
//! ```
//! use braid_core::{PluginGroup, Registry};
//! use braid_core_plugins::DefaultPlugins;
//!
//! let registry = Registry::new();
//! registry
//!     .add_plugins(DefaultPlugins.build())
//!     .expect("plugins should install");
//! ```

mod tracing_plugin;

pub use tracing_plugin::{FORMAT_ENV, LIFECYCLE_HOOK, TracingConfig, TracingFormat, TracingPlugin};

use braid_core::{PluginGroup, PluginGroupBuilder};

/// Default plugins for most braid applications.
///
/// Includes:
/// - [`TracingPlugin`] configured from the environment
///   ([`TracingConfig::from_env`])
///
/// # Customization
///
/// ```
/// use braid_core::{PluginGroup, Registry};
/// use braid_core_plugins::{DefaultPlugins, TracingPlugin};
///
/// let registry = Registry::new();
/// registry
///     .add_plugins(
///         DefaultPlugins
///             .build()
///             .disable::<TracingPlugin>()
///             .add(TracingPlugin::new().with_lifecycle_logging(true)),
///     )
///     .expect("plugins should install");
/// ```
pub struct DefaultPlugins;

impl PluginGroup for DefaultPlugins {
    fn build(self) -> PluginGroupBuilder {
        PluginGroupBuilder::new().add(TracingPlugin::from_env())
    }
}
