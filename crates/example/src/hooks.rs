//! Progress reporting for the countdown agent.

use braid_core::hooks::AgentHook;
use braid_core::{Error, Hook, HookEvent, Registry};

/// Logs every surfaced value and every finished turn.
///
/// # Errors
///
/// Fails if a different hook named `countdown_progress` is registered.
pub fn progress_hook(registry: &Registry) -> Result<Hook, Error> {
    Hook::builder("countdown_progress")
        .description("Logs countdown progress.")
        .on(AgentHook::OnTurnValue)
        .on(AgentHook::AfterTurn)
        .register(registry, |call| async move {
            match &call.event {
                HookEvent::AgentTurnValue { turn, value, .. } => {
                    tracing::info!(turn = turn.id(), tool = turn.tool().name(), value = ?value, "value");
                }
                HookEvent::AgentAfterTurn { agent, turn } => {
                    tracing::debug!(
                        agent = agent.name(),
                        turn = turn.id(),
                        pending = agent.turns().len(),
                        "turn finished"
                    );
                }
                _ => {}
            }
            Ok(())
        })
}
