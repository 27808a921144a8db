//! Tool definitions for the countdown agent.

use braid_core::{
    ContextItem, ContextPool, Error, Output, Registry, Requirement, Tool, ToolError, Turn,
};
use futures::stream;
use serde_json::json;

/// Name of the counting tool.
pub const COUNTDOWN: &str = "countdown";
/// Name of the reporting tool.
pub const REPORT: &str = "report";

/// Registers [`COUNTDOWN`] and [`REPORT`].
///
/// # Errors
///
/// Fails if either name is already taken in `registry`.
pub fn register_tools(registry: &Registry) -> Result<Vec<Tool>, Error> {
    Ok(vec![countdown(registry)?, report(registry)?])
}

/// A turn counting down from `from`.
///
/// # Errors
///
/// Fails if [`register_tools`] has not been called on `registry`.
pub fn countdown_turn(registry: &Registry, from: u64) -> Result<Turn, Error> {
    Ok(Turn::builder(registry, COUNTDOWN)
        .kwarg("n", from)
        .tag("launch")
        .build()?)
}

/// `countdown(n)` logs `T-minus n`, surfaces `n`, then schedules
/// `countdown(n - 1)`. At zero it records liftoff in the pool and schedules
/// the report instead.
fn countdown(registry: &Registry) -> Result<Tool, Error> {
    let registry_for_body = registry.clone();
    Tool::builder(COUNTDOWN)
        .description("Counts down by one per turn.")
        .param("n")
        .yielding(move |input| {
            let outputs = match input.get_param::<u64>("n") {
                Ok(n) => step(&registry_for_body, n),
                Err(err) => vec![Err(err)],
            };
            stream::iter(outputs)
        })
        .register(registry)
}

fn step(registry: &Registry, n: u64) -> Vec<Result<Output, ToolError>> {
    let next = if n > 0 {
        countdown_turn(registry, n - 1).map(Output::Turn)
    } else {
        Turn::builder(registry, REPORT)
            .build()
            .map(Output::Turn)
            .map_err(Error::from)
    };
    let next = next.map_err(|err| ToolError::execution_error(err.to_string()));

    let mut outputs = vec![
        Ok(Output::Context(ContextItem::new(format!("T-minus {n}")))),
        Ok(Output::value(n)),
    ];
    if n == 0 {
        outputs.push(Ok(Output::Context(ContextItem::keyed(
            "liftoff",
            "Recorded when the countdown reached zero",
            json!({ "status": "nominal" }),
        ))));
    }
    outputs.push(next);
    outputs
}

/// `report()` summarises the agent's context: the countdown log and the
/// keys of the records it stored.
fn report(registry: &Registry) -> Result<Tool, Error> {
    Tool::builder(REPORT)
        .description("Summarises the countdown log.")
        .context_queue("log", Requirement::Required)
        .context_pool("records", Requirement::Optional)
        .returning(|input| async move {
            let log = input
                .context_queue()
                .ok_or_else(|| ToolError::execution_error("no context queue"))?;
            let records = input.context_pool().map(ContextPool::ids).unwrap_or_default();
            Ok(Output::value(json!({
                "log": log.history(None).lines().collect::<Vec<_>>(),
                "records": records,
            })))
        })
        .register(registry)
}
