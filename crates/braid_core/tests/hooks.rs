//! Hook dispatch as seen from running tools, turns and agents.
//!
//! Covers identity deduplication between global and instance hooks, tag
//! filtering, short-circuiting on failure, and context injection.


use braid_core::context::ContextError;
use braid_core::hooks::{AgentHook, ToolHook, TurnHook};
use braid_core::{
    Agent, ContextItem, ContextQueue, ContextScope, Hook, HookError, HookEvent, Output, Registry,
    Requirement, Tool, Turn,
};
use futures::StreamExt;
use serde_json::json;
use test_utils::{EventLog, as_i64, count, count_turn, double, double_turn, recording_hook};

// ═══════════════════════════════════════════════════════════════════════════════
// RESOLUTION
// ═══════════════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn global_and_instance_hook_fires_once() {
    let registry = Registry::new();
    double(&registry);
    let log = EventLog::default();
    let hook = recording_hook(&registry, "both", [TurnHook::BeforeRun.into()], &log);
    registry
        .hooks()
        .register_global(&hook)
        .expect("global registration");

    let turn = Turn::builder(&registry, "double")
        .kwarg("x", 1)
        .hook(hook)
        .build()
        .expect("double is registered");
    turn.returning().await.expect("turn succeeds");

    assert_eq!(log.entries(), vec!["both:turn.before_run"]);
}

#[tokio::test]
async fn tagged_global_hook_skips_untagged_tools() {
    let registry = Registry::new();
    let audited = Tool::builder("audited")
        .tag("audit")
        .returning(|_| async { Ok(Output::value(1)) })
        .register(&registry)
        .expect("tool should register");
    let plain = Tool::builder("plain")
        .returning(|_| async { Ok(Output::value(2)) })
        .register(&registry)
        .expect("tool should register");

    let log = EventLog::default();
    let hook = Hook::builder("audit_log")
        .on(ToolHook::BeforeInvoke)
        .tag("audit")
        .register(&registry, {
            let log = log.clone();
            move |call| {
                let log = log.clone();
                async move {
                    if let HookEvent::ToolBeforeInvoke { tool, .. } = &call.event {
                        log.push(tool.name());
                    }
                    Ok(())
                }
            }
        })
        .expect("hook should register");
    registry
        .hooks()
        .register_global(&hook)
        .expect("global registration");

    for tool in [&audited, &plain] {
        Turn::builder(&registry, tool)
            .build()
            .expect("registered")
            .returning()
            .await
            .expect("turn succeeds");
    }
    assert_eq!(log.entries(), vec!["audited"]);

    plain.add_tag("audit");
    Turn::builder(&registry, &plain)
        .build()
        .expect("registered")
        .returning()
        .await
        .expect("turn succeeds");
    assert_eq!(log.entries(), vec!["audited", "plain"]);
}

#[tokio::test]
async fn agent_turn_hooks_run_after_the_turns_own() {
    let registry = Registry::new();
    let tool = double(&registry);
    let log = EventLog::default();
    let own = recording_hook(&registry, "own", [TurnHook::BeforeRun.into()], &log);
    let inherited = recording_hook(&registry, "inherited", [TurnHook::BeforeRun.into()], &log);

    let agent = Agent::builder(&registry, "ordered")
        .tool(&tool)
        .turn_hook(inherited)
        .build()
        .expect("agent should build");
    let turn = Turn::builder(&registry, &tool)
        .kwarg("x", 3)
        .hook(own)
        .build()
        .expect("registered");
    agent.put(turn.clone()).await.expect("permitted");

    let values: Vec<_> = agent.run().expect("idle").into_stream().collect().await;

    assert_eq!(values.len(), 1);
    assert_eq!(
        log.entries(),
        vec!["own:turn.before_run", "inherited:turn.before_run"]
    );
    assert_eq!(turn.hooks().len(), 1);
}

// ═══════════════════════════════════════════════════════════════════════════════
// FAILURE
// ═══════════════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn failing_hook_stops_later_hooks_and_the_operation() {
    let registry = Registry::new();
    let tool = double(&registry);
    let log = EventLog::default();
    let gate = Hook::builder("gate")
        .on(AgentHook::BeforePut)
        .register(&registry, |_| async { Err(HookError::msg("queue closed")) })
        .expect("hook should register");
    let later = recording_hook(&registry, "later", [AgentHook::BeforePut.into()], &log);

    let agent = Agent::builder(&registry, "gated")
        .tool(&tool)
        .hooks(vec![gate, later])
        .build()
        .expect("agent should build");

    let err = agent.put(double_turn(&registry, 1)).await.unwrap_err();

    assert!(matches!(
        err,
        braid_core::AgentError::Hook(ref hook_err) if hook_err.hook_name() == Some("gate")
    ));
    assert!(log.entries().is_empty());
    assert!(agent.turns().is_empty());
}

#[tokio::test]
async fn failing_eviction_hook_leaves_earlier_appends() {
    let registry = Registry::new();
    let queue = ContextQueue::new(&registry, 1).expect("valid limit");
    queue.add_hook(
        Hook::builder("no_evictions")
            .on(braid_core::hooks::ContextQueueHook::OnEvict)
            .build(|_| async { Err(HookError::msg("eviction refused")) })
            .expect("hook should build"),
    );

    let err = queue
        .append([ContextItem::new("first"), ContextItem::new("second")])
        .await
        .unwrap_err();

    assert!(matches!(err, ContextError::Hook(_)));
    assert_eq!(queue.history(None), "first");
}

#[tokio::test]
async fn failing_value_hook_settles_the_streaming_turn_once() {
    let registry = Registry::new();
    let tool = count(&registry);
    let log = EventLog::default();
    let outcome = recording_hook(
        &registry,
        "outcome",
        [
            TurnHook::AfterRun.into(),
            TurnHook::OnError.into(),
            TurnHook::OnComplete.into(),
            ToolHook::AfterInvoke.into(),
        ],
        &log,
    );
    registry
        .hooks()
        .register_global(&outcome)
        .expect("global registration");
    let reject_two = Hook::builder("reject_two")
        .on(AgentHook::OnTurnValue)
        .register(&registry, |call| {
            let rejected = as_i64(&call.event) == Some(2);
            async move {
                if rejected {
                    Err(HookError::msg("two is not allowed"))
                } else {
                    Ok(())
                }
            }
        })
        .expect("hook should register");
    let agent = Agent::builder(&registry, "picky_listener")
        .tool(&tool)
        .hook(reject_two)
        .build()
        .expect("agent should build");
    let turn = count_turn(&registry, 3);
    agent.put(turn.clone()).await.expect("count is permitted");

    let results: Vec<_> = agent.run().expect("idle").into_stream().collect().await;

    assert_eq!(results.len(), 2);
    assert_eq!(results[0].as_ref().expect("first value routes").1, json!(1));
    assert!(matches!(
        results[1],
        Err(braid_core::AgentError::Hook(ref hook_err)) if hook_err.hook_name() == Some("reject_two")
    ));
    assert_eq!(turn.stop_reason(), Some(braid_core::StopReason::Error));
    assert!(!turn.is_running());
    assert_eq!(
        log.entries(),
        vec![
            "outcome:tool.after_invoke",
            "outcome:turn.on_error",
            "outcome:turn.on_complete",
        ]
    );
}

// ═══════════════════════════════════════════════════════════════════════════════
// CONTEXT INJECTION
// ═══════════════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn hooks_receive_the_running_agents_context() {
    let registry = Registry::new();
    let tool = count(&registry);
    let seen = EventLog::default();
    let hook = Hook::builder("history_reader")
        .on(ToolHook::OnYield)
        .inject_context_queue(Requirement::Required)
        .register(&registry, {
            let seen = seen.clone();
            move |call| {
                let seen = seen.clone();
                async move {
                    let queue = call
                        .context_queue
                        .ok_or_else(|| HookError::msg("queue missing"))?;
                    let value = as_i64(&call.event).unwrap_or_default();
                    queue
                        .append([ContextItem::new(format!("saw {value}"))])
                        .await
                        .map_err(HookError::other)?;
                    seen.push(queue.history(None));
                    Ok(())
                }
            }
        })
        .expect("hook should register");
    tool.add_hook(hook);

    let agent = Agent::builder(&registry, "observed")
        .tool(&tool)
        .build()
        .expect("agent should build");
    agent.put(count_turn(&registry, 2)).await.expect("permitted");

    let values: Vec<_> = agent
        .run()
        .expect("idle")
        .into_stream()
        .map(|pair| pair.expect("turn succeeds").1)
        .collect()
        .await;

    assert_eq!(values, vec![json!(1), json!(2)]);
    assert_eq!(seen.entries(), vec!["saw 1", "saw 1\nsaw 2"]);
    assert_eq!(agent.context_queue().len(), 2);
}

#[tokio::test]
async fn required_context_outside_a_turn_is_missing() {
    let registry = Registry::new();
    let required = Hook::builder("needs_pool")
        .on(TurnHook::BeforeRun)
        .inject_context_pool(Requirement::Required)
        .register(&registry, |_| async { Ok(()) })
        .expect("hook should register");
    let optional = Hook::builder("maybe_pool")
        .on(TurnHook::BeforeRun)
        .inject_context_pool(Requirement::Optional)
        .register(&registry, |call| async move {
            match call.context_pool {
                None => Ok(()),
                Some(_) => Err(HookError::msg("unexpected pool")),
            }
        })
        .expect("hook should register");
    double(&registry);
    let turn = double_turn(&registry, 1);
    let event = HookEvent::TurnBeforeRun { turn };

    optional
        .invoke(event.clone())
        .await
        .expect("optional context may be absent");
    let err = required.invoke(event.clone()).await.unwrap_err();
    assert!(matches!(err, HookError::MissingContext { ref hook, .. } if hook == "needs_pool"));

    let queue = ContextQueue::new(&registry, 4).expect("valid limit");
    let pool = braid_core::ContextPool::new(&registry, None).expect("valid limit");
    ContextScope::new(queue, pool)
        .run(required.invoke(event))
        .await
        .expect("scope supplies the pool");
}
