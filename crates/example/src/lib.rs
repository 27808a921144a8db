//! Countdown agent built with braid.
//!
//! The agent runs one tool that schedules itself until it reaches zero, then
//! hands over to a report tool that reads back the agent's context:
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │  Agent "mission-control"                                    │
//! │                                                             │
//! │  countdown(n) ──▶ "T-minus n"  ──▶ context queue            │
//! │       │       ──▶ n            ──▶ caller                   │
//! │       │       ──▶ countdown(n-1) ──▶ turn queue ──┐         │
//! │       ▲                                           │         │
//! │       └───────────────────────────────────────────┘         │
//! │  countdown(0) ──▶ "liftoff"    ──▶ context pool             │
//! │               ──▶ report()     ──▶ turn queue               │
//! │  report()     ──▶ summary      ──▶ caller                   │
//! └─────────────────────────────────────────────────────────────┘
//! ```

mod hooks;
pub mod tools;

pub use hooks::progress_hook;
pub use tools::{COUNTDOWN, REPORT, countdown_turn, register_tools};

use braid_core::{Agent, ContextQueue, Error, Registry};

/// Name the agent registers under.
pub const AGENT_NAME: &str = "mission-control";

/// Registers the tools and the progress hook, then builds the agent with
/// a context queue long enough to hold a countdown from `from`.
///
/// # Errors
///
/// Fails if any name is already taken in `registry`.
pub fn mission_control(registry: &Registry, from: u64) -> Result<Agent, Error> {
    let tools = register_tools(registry)?;
    let window = usize::try_from(from).unwrap_or(usize::MAX).saturating_add(1);
    let agent = Agent::builder(registry, AGENT_NAME)
        .description("Counts down, then reports.")
        .tools(tools)
        .context_queue(ContextQueue::new(registry, window)?)
        .hook(progress_hook(registry)?)
        .build()?;
    Ok(agent)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    async fn launch(from: u64) -> (Agent, Vec<serde_json::Value>) {
        let registry = Registry::new();
        let agent = mission_control(&registry, from).expect("agent should build");
        agent
            .put(countdown_turn(&registry, from).expect("countdown is registered"))
            .await
            .expect("countdown is permitted");

        let mut run = agent.run().expect("idle");
        let mut values = Vec::new();
        while let Some(pair) = run.next().await {
            values.push(pair.expect("turn succeeds").1);
        }
        (agent, values)
    }

    #[tokio::test]
    async fn counts_down_then_reports() {
        let (agent, values) = launch(2).await;

        assert_eq!(
            values,
            vec![
                json!(2),
                json!(1),
                json!(0),
                json!({
                    "log": ["T-minus 2", "T-minus 1", "T-minus 0"],
                    "records": ["liftoff"],
                }),
            ]
        );
        assert!(agent.turns().is_empty());
        assert_eq!(agent.context_pool().ids(), vec!["liftoff"]);
    }

    #[tokio::test]
    async fn long_countdown_keeps_the_whole_log() {
        let (agent, values) = launch(12).await;

        assert_eq!(values.len(), 14);
        assert_eq!(agent.context_queue().len(), 13);
        assert_eq!(
            agent.context_queue().history(Some(1)),
            "T-minus 0"
        );
    }

    #[test]
    fn tools_register_once_per_registry() {
        let registry = Registry::new();
        mission_control(&registry, 1).expect("agent should build");

        let err = mission_control(&registry, 1).unwrap_err();
        assert!(matches!(
            err,
            Error::Registry(braid_core::RegistryError::DuplicateTool(ref name)) if name == COUNTDOWN
        ));
    }
}
