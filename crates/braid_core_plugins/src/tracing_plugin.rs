//! Tracing and observability plugin.
//!
//! [`TracingPlugin`] installs a `tracing` subscriber and, optionally, a global
//! hook that logs turn and agent lifecycle events.
//!
//! # Lifecycle
//!
//! - **`build()`** registers the lifecycle hook, when enabled, so it is in
//!   place before any agent runs.
//! - **`ready()`** initializes the subscriber. Installation is skipped if a
//!   global subscriber already exists.
//!
//! # Example
//!
//! ```
//! use braid_core::Registry;
//! use braid_core_plugins::{TracingFormat, TracingPlugin};
//! use tracing::Level;
//!
//! let registry = Registry::new();
//! registry
//!     .add_plugins(
//!         TracingPlugin::default()
//!             .with_level(Level::DEBUG)
//!             .with_format(TracingFormat::Compact)
//!             .with_lifecycle_logging(true),
//!     )
//!     .expect("plugin should install");
//!
//! assert!(registry.hooks().contains(braid_core_plugins::LIFECYCLE_HOOK));
//! ```

use core::str::FromStr;

use braid_core::hooks::{AgentHook, TurnHook};
use braid_core::{Error, Hook, HookEvent, Plugin, Registry};
use tracing::Level;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Name of the global hook registered by lifecycle logging.
pub const LIFECYCLE_HOOK: &str = "braid::lifecycle_log";

/// Environment variable selecting the output format.
pub const FORMAT_ENV: &str = "BRAID_LOG_FORMAT";

// ─────────────────────────────────────────────────────────────────────────────
// TracingFormat
// ─────────────────────────────────────────────────────────────────────────────

/// Tracing output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum TracingFormat {
    /// Human-readable colored output (default).
    #[default]
    Pretty,
    /// Compact single-line output.
    Compact,
    /// JSON structured output for log aggregation.
    Json,
}

impl FromStr for TracingFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pretty" => Ok(Self::Pretty),
            "compact" => Ok(Self::Compact),
            "json" => Ok(Self::Json),
            other => Err(format!("unknown log format '{other}'")),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// TracingConfig
// ─────────────────────────────────────────────────────────────────────────────

/// Subscriber settings.
///
/// # Fields
///
/// - `level` - default maximum level when no filter is given
/// - `format` - pretty, compact or JSON output
/// - `env_filter` - target-specific directives such as `braid_core=debug`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TracingConfig {
    /// The configured log level.
    pub level: Level,
    /// The configured output format.
    pub format: TracingFormat,
    /// Directives in `EnvFilter` syntax.
    pub env_filter: Option<String>,
}

impl Default for TracingConfig {
    fn default() -> Self {
        Self {
            level: Level::INFO,
            format: TracingFormat::Pretty,
            env_filter: None,
        }
    }
}

impl TracingConfig {
    /// Reads `RUST_LOG` and `BRAID_LOG_FORMAT`.
    ///
    /// A bare level in `RUST_LOG` (`debug`) sets [`level`](Self::level);
    /// anything else is kept as a filter. Unrecognised formats fall back
    /// to the default.
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();
        let directives = lookup(EnvFilter::DEFAULT_ENV).filter(|v| !v.trim().is_empty());
        if let Some(directives) = directives {
            match Level::from_str(directives.trim()) {
                Ok(level) => config.level = level,
                Err(_) => config.env_filter = Some(directives),
            }
        }
        if let Some(format) = lookup(FORMAT_ENV).and_then(|v| v.parse().ok()) {
            config.format = format;
        }
        config
    }

    fn filter(&self) -> EnvFilter {
        match &self.env_filter {
            Some(filter) => {
                EnvFilter::try_new(filter).unwrap_or_else(|_| EnvFilter::new(self.level.as_str()))
            }
            None => EnvFilter::new(self.level.as_str()),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// TracingPlugin
// ─────────────────────────────────────────────────────────────────────────────

/// Tracing and logging plugin.
///
/// # Configuration Options
///
/// ```
/// use braid_core_plugins::{TracingFormat, TracingPlugin};
/// use tracing::Level;
///
/// // Development: pretty output with span enter/exit
/// let dev = TracingPlugin::default()
///     .with_level(Level::DEBUG)
///     .with_span_events(true);
///
/// // Production: JSON for log aggregation, quiet dependencies
/// let prod = TracingPlugin::default()
///     .with_format(TracingFormat::Json)
///     .with_env_filter("braid_core=info,tokio=warn");
/// ```
#[derive(Debug, Clone, Default)]
pub struct TracingPlugin {
    config: TracingConfig,
    span_events: bool,
    lifecycle_logging: bool,
}

impl TracingPlugin {
    /// Creates a new `TracingPlugin` with default settings.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Settings taken from the environment. See [`TracingConfig::from_env`].
    #[must_use]
    pub fn from_env() -> Self {
        Self {
            config: TracingConfig::from_env(),
            ..Self::default()
        }
    }

    /// Sets the maximum log level.
    #[must_use]
    pub fn with_level(mut self, level: Level) -> Self {
        self.config.level = level;
        self
    }

    /// Sets the output format.
    #[must_use]
    pub fn with_format(mut self, format: TracingFormat) -> Self {
        self.config.format = format;
        self
    }

    /// Sets a custom environment filter string.
    ///
    /// Format: `target=level,target=level,...`
    #[must_use]
    pub fn with_env_filter(mut self, filter: impl Into<String>) -> Self {
        self.config.env_filter = Some(filter.into());
        self
    }

    /// Enables span enter/exit events in output.
    #[must_use]
    pub fn with_span_events(mut self, enabled: bool) -> Self {
        self.span_events = enabled;
        self
    }

    /// Registers a global hook logging every turn and agent event.
    #[must_use]
    pub fn with_lifecycle_logging(mut self, enabled: bool) -> Self {
        self.lifecycle_logging = enabled;
        self
    }

    /// The subscriber settings.
    #[must_use]
    pub fn config(&self) -> &TracingConfig {
        &self.config
    }
}

impl Plugin for TracingPlugin {
    fn name(&self) -> &'static str {
        "braid::tracing"
    }

    fn build(&self, registry: &Registry) -> Result<(), Error> {
        if self.lifecycle_logging {
            let hook = lifecycle_hook(registry)?;
            registry.hooks().register_global(&hook)?;
        }
        Ok(())
    }

    fn ready(&self, _registry: &Registry) {
        let span_events = if self.span_events {
            FmtSpan::ENTER | FmtSpan::EXIT
        } else {
            FmtSpan::NONE
        };

        // try_init fails if a global subscriber is already set; keep it.
        let installed = match self.config.format {
            TracingFormat::Pretty => tracing_subscriber::registry()
                .with(self.config.filter())
                .with(
                    tracing_subscriber::fmt::layer()
                        .pretty()
                        .with_span_events(span_events),
                )
                .try_init(),
            TracingFormat::Compact => tracing_subscriber::registry()
                .with(self.config.filter())
                .with(
                    tracing_subscriber::fmt::layer()
                        .compact()
                        .with_span_events(span_events),
                )
                .try_init(),
            TracingFormat::Json => tracing_subscriber::registry()
                .with(self.config.filter())
                .with(
                    tracing_subscriber::fmt::layer()
                        .json()
                        .with_span_events(span_events),
                )
                .try_init(),
        };

        tracing::info!(
            level = %self.config.level,
            format = ?self.config.format,
            installed = installed.is_ok(),
            "TracingPlugin initialized"
        );
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Lifecycle logging
// ─────────────────────────────────────────────────────────────────────────────

fn lifecycle_hook(registry: &Registry) -> Result<Hook, Error> {
    let mut builder =
        Hook::builder(LIFECYCLE_HOOK).description("Logs turn and agent lifecycle events.");
    for kind in TurnHook::ALL {
        builder = builder.on(*kind);
    }
    for kind in AgentHook::ALL {
        builder = builder.on(*kind);
    }
    builder.register(registry, |call| async move {
        log_event(&call.event);
        Ok(())
    })
}

fn log_event(event: &HookEvent) {
    match event {
        HookEvent::TurnBeforeRun { turn } => {
            tracing::debug!(turn = turn.id(), tool = turn.tool().name(), "turn started");
        }
        HookEvent::TurnAfterRun { turn, output } => {
            tracing::debug!(turn = turn.id(), values = output.values().len(), "turn produced");
        }
        HookEvent::TurnTimeout { turn } => {
            tracing::warn!(turn = turn.id(), timeout = ?turn.timeout(), "turn timed out");
        }
        HookEvent::TurnError { turn, error } => {
            tracing::warn!(turn = turn.id(), error = %error, "turn failed");
        }
        HookEvent::TurnComplete { turn, stop_reason } => {
            tracing::info!(
                turn = turn.id(),
                tool = turn.tool().name(),
                stop_reason = %stop_reason,
                "turn settled"
            );
        }
        HookEvent::AgentBeforeTurn { agent } => {
            tracing::trace!(
                agent = agent.name(),
                pending = agent.turns().len(),
                "agent polling queue"
            );
        }
        HookEvent::AgentAfterTurn { agent, turn } => {
            tracing::debug!(agent = agent.name(), turn = turn.id(), "agent finished turn");
        }
        HookEvent::AgentTurnValue { agent, turn, .. } => {
            tracing::trace!(agent = agent.name(), turn = turn.id(), "agent routed value");
        }
        HookEvent::AgentBeforePut { agent, turn } | HookEvent::AgentAfterPut { agent, turn } => {
            tracing::trace!(
                agent = agent.name(),
                turn = turn.id(),
                event = %event.hook_type(),
                "agent queue"
            );
        }
        HookEvent::AgentPause { agent } => tracing::info!(agent = agent.name(), "agent paused"),
        HookEvent::AgentResume { agent } => tracing::info!(agent = agent.name(), "agent resumed"),
        _ => {}
    }
}
