//! Unified event payload for hooks.
//!
//! Every hook receives a [`HookEvent`] inside its [`HookCall`](super::HookCall)
//! and matches on the variants it cares about. Payloads own handles to the
//! target (turn, agent, tool, queue, pool), so a hook may inspect or mutate
//! live state.
//!
//! # Example
//!
//! ```ignore
//! match call.event {
//!     HookEvent::TurnComplete { turn, stop_reason } => {
//!         tracing::info!(turn = turn.id(), ?stop_reason, "turn finished");
//!     }
//!     HookEvent::PoolEvict { item, .. } => {
//!         tracing::debug!(id = ?item.id, "pool item evicted");
//!     }
//!     _ => {}
//! }
//! ```

use serde_json::{Map, Value};

use super::types::{
    AgentHook, ContextPoolHook, ContextQueueHook, HookType, ToolHook, TurnHook,
};
use crate::agent::Agent;
use crate::context::{ContextItem, ContextPool, ContextQueue};
use crate::output::{Output, TurnOutput};
use crate::tool::Tool;
use crate::turn::{StopReason, Turn};

/// Payload passed to hooks.
#[derive(Debug, Clone)]
pub enum HookEvent {
    // ─────────────────────────────────────────────────────────────────────────
    // Turn Events
    // ─────────────────────────────────────────────────────────────────────────
    /// Before the turn's tool is called.
    TurnBeforeRun {
        /// The running turn.
        turn: Turn,
    },

    /// The tool completed; fires before the agent routes the output.
    TurnAfterRun {
        /// The running turn.
        turn: Turn,
        /// Everything the tool produced.
        output: TurnOutput,
    },

    /// The turn's deadline elapsed.
    TurnTimeout {
        /// The timed-out turn.
        turn: Turn,
    },

    /// The tool or a turn hook failed.
    TurnError {
        /// The failed turn.
        turn: Turn,
        /// Rendered failure.
        error: String,
    },

    /// The execution attempt ended, whatever the outcome.
    TurnComplete {
        /// The finished turn.
        turn: Turn,
        /// How it ended.
        stop_reason: StopReason,
    },

    // ─────────────────────────────────────────────────────────────────────────
    // Agent Events
    // ─────────────────────────────────────────────────────────────────────────
    /// Top of a run loop iteration.
    AgentBeforeTurn {
        /// The running agent.
        agent: Agent,
    },

    /// A turn finished and every value it produced was routed.
    AgentAfterTurn {
        /// The running agent.
        agent: Agent,
        /// The finished turn.
        turn: Turn,
    },

    /// A produced value was routed.
    AgentTurnValue {
        /// The running agent.
        agent: Agent,
        /// The producing turn.
        turn: Turn,
        /// The value.
        value: Output,
    },

    /// A turn is about to be enqueued.
    AgentBeforePut {
        /// The receiving agent.
        agent: Agent,
        /// The incoming turn.
        turn: Turn,
    },

    /// A turn was enqueued.
    AgentAfterPut {
        /// The receiving agent.
        agent: Agent,
        /// The enqueued turn.
        turn: Turn,
    },

    /// The run loop is blocked on the pause gate.
    AgentPause {
        /// The paused agent.
        agent: Agent,
    },

    /// The pause gate was released.
    AgentResume {
        /// The resumed agent.
        agent: Agent,
    },

    // ─────────────────────────────────────────────────────────────────────────
    // Tool Events
    // ─────────────────────────────────────────────────────────────────────────
    /// Before the tool body is called.
    ToolBeforeInvoke {
        /// The invoked tool.
        tool: Tool,
        /// Bound value parameters, after fixed keyword arguments were merged.
        args: Map<String, Value>,
    },

    /// A yielding tool produced a value.
    ToolYield {
        /// The producing tool.
        tool: Tool,
        /// The produced value.
        value: Output,
    },

    /// The body finished (or a stream was closed early).
    ToolAfterInvoke {
        /// The invoked tool.
        tool: Tool,
        /// The result, or every value produced so far.
        output: TurnOutput,
    },

    /// The body failed.
    ToolError {
        /// The failed tool.
        tool: Tool,
        /// Rendered failure.
        error: String,
    },

    // ─────────────────────────────────────────────────────────────────────────
    // Context Queue Events
    // ─────────────────────────────────────────────────────────────────────────
    /// Before items are appended.
    QueueBeforeAppend {
        /// The target queue.
        queue: ContextQueue,
        /// Items being appended.
        incoming: Vec<ContextItem>,
        /// Snapshot before the append.
        items: Vec<ContextItem>,
    },

    /// After items were appended and overflow evicted.
    QueueAfterAppend {
        /// The target queue.
        queue: ContextQueue,
        /// Items that were appended.
        appended: Vec<ContextItem>,
        /// Snapshot after the append.
        items: Vec<ContextItem>,
    },

    /// Before the queue is cleared.
    QueueBeforeClear {
        /// The target queue.
        queue: ContextQueue,
        /// Snapshot before clearing.
        items: Vec<ContextItem>,
    },

    /// After the queue was cleared.
    QueueAfterClear {
        /// The target queue.
        queue: ContextQueue,
    },

    /// An item was evicted from the head.
    QueueEvict {
        /// The target queue.
        queue: ContextQueue,
        /// The evicted item.
        item: ContextItem,
    },

    // ─────────────────────────────────────────────────────────────────────────
    // Context Pool Events
    // ─────────────────────────────────────────────────────────────────────────
    /// Before an item is added or replaced.
    PoolBeforeAdd {
        /// The target pool.
        pool: ContextPool,
        /// The incoming item.
        item: ContextItem,
    },

    /// After an item was added or replaced.
    PoolAfterAdd {
        /// The target pool.
        pool: ContextPool,
        /// The stored item.
        item: ContextItem,
    },

    /// Before an item is removed.
    PoolBeforeRemove {
        /// The target pool.
        pool: ContextPool,
        /// The item about to be removed.
        item: ContextItem,
    },

    /// After an item was removed.
    PoolAfterRemove {
        /// The target pool.
        pool: ContextPool,
        /// The removed item.
        item: ContextItem,
    },

    /// Before the pool is cleared.
    PoolBeforeClear {
        /// The target pool.
        pool: ContextPool,
        /// Snapshot before clearing.
        items: Vec<ContextItem>,
    },

    /// After the pool was cleared.
    PoolAfterClear {
        /// The target pool.
        pool: ContextPool,
    },

    /// The oldest item was evicted to make room.
    PoolEvict {
        /// The target pool.
        pool: ContextPool,
        /// The evicted item.
        item: ContextItem,
    },
}

impl HookEvent {
    /// The event type this payload is raised for.
    #[must_use]
    pub fn hook_type(&self) -> HookType {
        match self {
            HookEvent::TurnBeforeRun { .. } => TurnHook::BeforeRun.into(),
            HookEvent::TurnAfterRun { .. } => TurnHook::AfterRun.into(),
            HookEvent::TurnTimeout { .. } => TurnHook::OnTimeout.into(),
            HookEvent::TurnError { .. } => TurnHook::OnError.into(),
            HookEvent::TurnComplete { .. } => TurnHook::OnComplete.into(),
            HookEvent::AgentBeforeTurn { .. } => AgentHook::BeforeTurn.into(),
            HookEvent::AgentAfterTurn { .. } => AgentHook::AfterTurn.into(),
            HookEvent::AgentTurnValue { .. } => AgentHook::OnTurnValue.into(),
            HookEvent::AgentBeforePut { .. } => AgentHook::BeforePut.into(),
            HookEvent::AgentAfterPut { .. } => AgentHook::AfterPut.into(),
            HookEvent::AgentPause { .. } => AgentHook::OnPause.into(),
            HookEvent::AgentResume { .. } => AgentHook::OnResume.into(),
            HookEvent::ToolBeforeInvoke { .. } => ToolHook::BeforeInvoke.into(),
            HookEvent::ToolYield { .. } => ToolHook::OnYield.into(),
            HookEvent::ToolAfterInvoke { .. } => ToolHook::AfterInvoke.into(),
            HookEvent::ToolError { .. } => ToolHook::OnError.into(),
            HookEvent::QueueBeforeAppend { .. } => ContextQueueHook::BeforeAppend.into(),
            HookEvent::QueueAfterAppend { .. } => ContextQueueHook::AfterAppend.into(),
            HookEvent::QueueBeforeClear { .. } => ContextQueueHook::BeforeClear.into(),
            HookEvent::QueueAfterClear { .. } => ContextQueueHook::AfterClear.into(),
            HookEvent::QueueEvict { .. } => ContextQueueHook::OnEvict.into(),
            HookEvent::PoolBeforeAdd { .. } => ContextPoolHook::BeforeAdd.into(),
            HookEvent::PoolAfterAdd { .. } => ContextPoolHook::AfterAdd.into(),
            HookEvent::PoolBeforeRemove { .. } => ContextPoolHook::BeforeRemove.into(),
            HookEvent::PoolAfterRemove { .. } => ContextPoolHook::AfterRemove.into(),
            HookEvent::PoolBeforeClear { .. } => ContextPoolHook::BeforeClear.into(),
            HookEvent::PoolAfterClear { .. } => ContextPoolHook::AfterClear.into(),
            HookEvent::PoolEvict { .. } => ContextPoolHook::OnEvict.into(),
        }
    }

    /// Names of the arguments the engine supplies with this event.
    ///
    /// Fixed keyword arguments of a hook that reuse one of these names are
    /// shadowed by the engine's value.
    #[must_use]
    pub fn argument_names(&self) -> &'static [&'static str] {
        match self {
            HookEvent::TurnBeforeRun { .. } | HookEvent::TurnTimeout { .. } => &["turn"],
            HookEvent::TurnAfterRun { .. } => &["turn", "output"],
            HookEvent::TurnError { .. } => &["turn", "error"],
            HookEvent::TurnComplete { .. } => &["turn", "stop_reason"],
            HookEvent::AgentBeforeTurn { .. }
            | HookEvent::AgentPause { .. }
            | HookEvent::AgentResume { .. } => &["agent"],
            HookEvent::AgentAfterTurn { .. }
            | HookEvent::AgentBeforePut { .. }
            | HookEvent::AgentAfterPut { .. } => &["agent", "turn"],
            HookEvent::AgentTurnValue { .. } => &["agent", "turn", "value"],
            HookEvent::ToolBeforeInvoke { .. } => &["tool", "args"],
            HookEvent::ToolYield { .. } => &["tool", "value"],
            HookEvent::ToolAfterInvoke { .. } => &["tool", "output"],
            HookEvent::ToolError { .. } => &["tool", "error"],
            HookEvent::QueueBeforeAppend { .. } => &["queue", "incoming", "items"],
            HookEvent::QueueAfterAppend { .. } => &["queue", "appended", "items"],
            HookEvent::QueueBeforeClear { .. } => &["queue", "items"],
            HookEvent::QueueAfterClear { .. } => &["queue"],
            HookEvent::QueueEvict { .. } => &["queue", "item"],
            HookEvent::PoolBeforeAdd { .. }
            | HookEvent::PoolAfterAdd { .. }
            | HookEvent::PoolBeforeRemove { .. }
            | HookEvent::PoolAfterRemove { .. }
            | HookEvent::PoolEvict { .. } => &["pool", "item"],
            HookEvent::PoolBeforeClear { .. } => &["pool", "items"],
            HookEvent::PoolAfterClear { .. } => &["pool"],
        }
    }
}
