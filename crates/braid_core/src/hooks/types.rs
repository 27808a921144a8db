//! Hook event types.
//!
//! Every lifecycle transition in the engine is named by a [`HookType`]. Each
//! target kind has its own enum ([`TurnHook`], [`AgentHook`], [`ToolHook`],
//! [`ContextQueueHook`], [`ContextPoolHook`]) and they all convert into the
//! umbrella [`HookType`], whose stable string form (`turn.before_run`,
//! `context_pool.on_evict`, ...) is what snapshots store.

use core::fmt;
use core::str::FromStr;

use indexmap::IndexSet;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::ConfigError;

/// Unordered string labels attached to targets and used as hook filters.
pub type Tags = IndexSet<String>;

macro_rules! hook_kind {
    (
        $(#[$meta:meta])*
        $name:ident => $umbrella:ident, $prefix:literal {
            $($(#[$vmeta:meta])* $variant:ident => $label:literal),+ $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum $name {
            $($(#[$vmeta])* $variant),+
        }

        impl $name {
            /// Every event of this kind, in lifecycle order.
            pub const ALL: &'static [Self] = &[$(Self::$variant),+];

            /// Stable dotted name.
            #[must_use]
            pub const fn as_str(self) -> &'static str {
                match self {
                    $(Self::$variant => concat!($prefix, ".", $label)),+
                }
            }
        }

        impl From<$name> for HookType {
            fn from(kind: $name) -> Self {
                HookType::$umbrella(kind)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

hook_kind! {
    /// Turn lifecycle events.
    TurnHook => Turn, "turn" {
        /// Before the tool is called.
        BeforeRun => "before_run",
        /// After the tool completed successfully.
        AfterRun => "after_run",
        /// The turn's deadline elapsed.
        OnTimeout => "on_timeout",
        /// The tool or a hook failed.
        OnError => "on_error",
        /// Always, exactly once per execution attempt.
        OnComplete => "on_complete",
    }
}

hook_kind! {
    /// Agent run loop and queue events.
    AgentHook => Agent, "agent" {
        /// Top of every run loop iteration.
        BeforeTurn => "before_turn",
        /// After a turn's values were all routed.
        AfterTurn => "after_turn",
        /// After each produced value was routed.
        OnTurnValue => "on_turn_value",
        /// Before a turn is enqueued.
        BeforePut => "before_put",
        /// After a turn is enqueued.
        AfterPut => "after_put",
        /// The loop hit a closed pause gate.
        OnPause => "on_pause",
        /// The pause gate reopened.
        OnResume => "on_resume",
    }
}

hook_kind! {
    /// Tool invocation events.
    ToolHook => Tool, "tool" {
        /// Before the body is called, with the bound arguments.
        BeforeInvoke => "before_invoke",
        /// Each value a yielding tool produces.
        OnYield => "on_yield",
        /// After the body finished, with its result.
        AfterInvoke => "after_invoke",
        /// The body failed.
        OnError => "on_error",
    }
}

hook_kind! {
    /// Context queue events.
    ContextQueueHook => ContextQueue, "context_queue" {
        /// Before items are appended.
        BeforeAppend => "before_append",
        /// After items are appended.
        AfterAppend => "after_append",
        /// Before the queue is cleared.
        BeforeClear => "before_clear",
        /// After the queue is cleared.
        AfterClear => "after_clear",
        /// An item fell off the head of the queue.
        OnEvict => "on_evict",
    }
}

hook_kind! {
    /// Context pool events.
    ContextPoolHook => ContextPool, "context_pool" {
        /// Before an item is added.
        BeforeAdd => "before_add",
        /// After an item is added.
        AfterAdd => "after_add",
        /// Before an item is removed.
        BeforeRemove => "before_remove",
        /// After an item is removed.
        AfterRemove => "after_remove",
        /// Before the pool is cleared.
        BeforeClear => "before_clear",
        /// After the pool is cleared.
        AfterClear => "after_clear",
        /// The oldest item was evicted to make room.
        OnEvict => "on_evict",
    }
}

/// Any hook event type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HookType {
    /// A [`TurnHook`].
    Turn(TurnHook),
    /// An [`AgentHook`].
    Agent(AgentHook),
    /// A [`ToolHook`].
    Tool(ToolHook),
    /// A [`ContextQueueHook`].
    ContextQueue(ContextQueueHook),
    /// A [`ContextPoolHook`].
    ContextPool(ContextPoolHook),
}

impl HookType {
    /// Stable dotted name, e.g. `agent.on_turn_value`.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            HookType::Turn(kind) => kind.as_str(),
            HookType::Agent(kind) => kind.as_str(),
            HookType::Tool(kind) => kind.as_str(),
            HookType::ContextQueue(kind) => kind.as_str(),
            HookType::ContextPool(kind) => kind.as_str(),
        }
    }

    /// Iterates every event type the engine raises.
    pub fn all() -> impl Iterator<Item = HookType> {
        TurnHook::ALL
            .iter()
            .copied()
            .map(HookType::from)
            .chain(AgentHook::ALL.iter().copied().map(HookType::from))
            .chain(ToolHook::ALL.iter().copied().map(HookType::from))
            .chain(ContextQueueHook::ALL.iter().copied().map(HookType::from))
            .chain(ContextPoolHook::ALL.iter().copied().map(HookType::from))
    }
}

impl fmt::Display for HookType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for HookType {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        HookType::all()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| ConfigError::UnknownHookType(s.to_owned()))
    }
}

impl Serialize for HookType {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for HookType {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_are_prefixed_by_target() {
        assert_eq!(HookType::from(TurnHook::BeforeRun).as_str(), "turn.before_run");
        assert_eq!(AgentHook::OnTurnValue.as_str(), "agent.on_turn_value");
        assert_eq!(
            ContextPoolHook::OnEvict.to_string(),
            "context_pool.on_evict"
        );
    }

    #[test]
    fn same_event_name_on_different_targets_is_distinct() {
        let turn: HookType = TurnHook::OnError.into();
        let tool: HookType = ToolHook::OnError.into();
        assert_ne!(turn, tool);
        assert_ne!(turn.as_str(), tool.as_str());
    }

    #[test]
    fn every_type_parses_back() {
        for kind in HookType::all() {
            assert_eq!(kind.as_str().parse::<HookType>(), Ok(kind));
        }
        assert_eq!(HookType::all().count(), 28);
    }

    #[test]
    fn unknown_name_is_config_error() {
        let err = "turn.sometime".parse::<HookType>().unwrap_err();
        assert_eq!(err, ConfigError::UnknownHookType("turn.sometime".into()));
    }

    #[test]
    fn serializes_as_string() {
        let value = serde_json::to_value(HookType::from(ToolHook::OnYield))
            .expect("hook type should serialize");
        assert_eq!(value, serde_json::json!("tool.on_yield"));
    }
}
