//! The agent run loop.

use core::fmt;
use std::sync::atomic::Ordering;

use futures::StreamExt;
use futures::stream::{self, BoxStream};
use serde_json::Value;

use super::definition::Agent;
use super::error::AgentError;
use crate::hooks::HookEvent;
use crate::output::Output;
use crate::tool::ToolShape;
use crate::turn::{Turn, TurnStream};

enum Source {
    Returned(Option<Output>),
    Streaming(TurnStream),
}

enum Phase {
    Idle,
    Turn { turn: Turn, source: Source },
    Done,
}

enum Step {
    Continue,
    Surface(Turn, Value),
    Finished,
}

/// An active run of an [`Agent`].
///
/// Each call to [`next`](Self::next) advances the loop until a value is
/// surfaced or the queue is drained:
///
/// 1. `BEFORE_TURN`
/// 2. if paused, `ON_PAUSE`, wait for [`Agent::resume`], `ON_RESUME`
/// 3. take the in-flight turn or the next queued one; stop if there is none
/// 4. execute it inside the agent's [`ContextScope`](crate::context::ContextScope),
///    routing each value as soon as it is produced, then `ON_TURN_VALUE`
/// 5. `AFTER_TURN` once every value is routed
///
/// Any failure ends the run and is returned once. If a value from a yielding
/// turn cannot be routed, that turn is failed first so its `ON_ERROR` and
/// `ON_COMPLETE` hooks have run by the time the error surfaces. Dropping the
/// run releases the agent; a turn still executing is recorded as cancelled.
pub struct AgentRun {
    agent: Agent,
    phase: Phase,
    active: bool,
}

impl fmt::Debug for AgentRun {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let current = match &self.phase {
            Phase::Turn { turn, .. } => Some(turn.id().to_owned()),
            Phase::Idle | Phase::Done => None,
        };
        f.debug_struct("AgentRun")
            .field("agent", &self.agent.name())
            .field("current_turn", &current)
            .field("active", &self.active)
            .finish()
    }
}

impl AgentRun {
    pub(crate) fn new(agent: Agent) -> Self {
        Self {
            agent,
            phase: Phase::Idle,
            active: true,
        }
    }

    /// The agent being run.
    #[must_use]
    pub fn agent(&self) -> &Agent {
        &self.agent
    }

    /// Advances to the next surfaced `(turn, value)` pair.
    ///
    /// Returns `None` once the queue is drained.
    pub async fn next(&mut self) -> Option<Result<(Turn, Value), AgentError>> {
        loop {
            let step = match self.phase {
                Phase::Done => return None,
                Phase::Idle => self.start_turn().await,
                Phase::Turn { .. } => self.advance().await,
            };
            match step {
                Ok(Step::Continue) => {}
                Ok(Step::Surface(turn, value)) => return Some(Ok((turn, value))),
                Ok(Step::Finished) => {
                    self.finish();
                    return None;
                }
                Err(err) => {
                    tracing::debug!(agent = %self.agent.name(), error = %err, "agent run failed");
                    self.finish();
                    return Some(Err(err));
                }
            }
        }
    }

    /// Converts into a [`BoxStream`] of the same items.
    #[must_use]
    pub fn into_stream(self) -> BoxStream<'static, Result<(Turn, Value), AgentError>> {
        stream::unfold(self, |mut run| async move {
            let item = run.next().await?;
            Some((item, run))
        })
        .boxed()
    }

    async fn start_turn(&mut self) -> Result<Step, AgentError> {
        let agent = self.agent.clone();
        agent
            .dispatch(HookEvent::AgentBeforeTurn {
                agent: agent.clone(),
            })
            .await?;

        if agent.is_paused() {
            agent
                .dispatch(HookEvent::AgentPause {
                    agent: agent.clone(),
                })
                .await?;
            agent.wait_resumed().await;
            agent
                .dispatch(HookEvent::AgentResume {
                    agent: agent.clone(),
                })
                .await?;
        }

        let Some(turn) = agent.next_turn() else {
            return Ok(Step::Finished);
        };
        turn.set_inherited_hooks(agent.turn_hooks());
        tracing::debug!(
            agent = %agent.name(),
            turn = %turn.id(),
            tool = %turn.tool().name(),
            "agent turn started"
        );

        let source = match turn.tool().shape() {
            ToolShape::Returning => {
                let output = agent.scope().run(turn.returning()).await?;
                Source::Returned(Some(output))
            }
            ToolShape::Yielding => Source::Streaming(turn.yielding()?),
        };
        self.phase = Phase::Turn { turn, source };
        Ok(Step::Continue)
    }

    async fn advance(&mut self) -> Result<Step, AgentError> {
        let Phase::Turn { turn, source } = &mut self.phase else {
            return Ok(Step::Continue);
        };
        let turn = turn.clone();
        let agent = self.agent.clone();

        let pulled = match source {
            Source::Returned(output) => output.take().map(Ok),
            Source::Streaming(stream) => agent.scope().run(stream.next()).await,
        };

        match pulled {
            Some(Ok(output)) => match agent.scope().run(agent.route(&turn, output)).await {
                Ok(Some(value)) => Ok(Step::Surface(turn, value)),
                Ok(None) => Ok(Step::Continue),
                Err(err) => {
                    if let Source::Streaming(stream) = source {
                        agent.scope().run(stream.abort(err.to_string())).await;
                    }
                    Err(err)
                }
            },
            Some(Err(err)) => Err(err.into()),
            None => {
                self.phase = Phase::Idle;
                turn.set_inherited_hooks(Vec::new());
                agent
                    .dispatch(HookEvent::AgentAfterTurn {
                        agent: agent.clone(),
                        turn: turn.clone(),
                    })
                    .await?;
                agent.inner.current_turn.lock().take();
                tracing::debug!(agent = %agent.name(), turn = %turn.id(), "agent turn finished");
                Ok(Step::Continue)
            }
        }
    }

    fn finish(&mut self) {
        self.phase = Phase::Done;
        if !self.active {
            return;
        }
        self.active = false;
        if let Some(turn) = self.agent.inner.current_turn.lock().take() {
            turn.set_inherited_hooks(Vec::new());
        }
        self.agent.inner.running.store(false, Ordering::Release);
        tracing::debug!(agent = %self.agent.name(), "agent run finished");
    }
}

impl Drop for AgentRun {
    fn drop(&mut self) {
        self.finish();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{ContextItem, ContextQueue, ContextScope, Requirement};
    use crate::hooks::{AgentHook, Hook, TurnHook};
    use crate::registry::Registry;
    use crate::tool::{Tool, ToolError};
    use crate::turn::{StopReason, TurnError};
    use core::time::Duration;
    use serde_json::json;
    use std::sync::{Arc, Mutex};

    fn echo(registry: &Registry) -> Tool {
        Tool::builder("echo")
            .param("value")
            .returning(|input| async move { Ok(Output::Value(input.get_param("value")?)) })
            .register(registry)
            .expect("tool should register")
    }

    fn echo_turn(registry: &Registry, value: Value) -> Turn {
        Turn::builder(registry, "echo")
            .kwarg("value", value)
            .build()
            .expect("tool is registered")
    }

    fn event_log(agent: &Agent) -> Arc<Mutex<Vec<String>>> {
        let log = Arc::new(Mutex::new(Vec::new()));
        let log_clone = Arc::clone(&log);
        let mut builder = Hook::builder(format!("{}_log", agent.name()));
        for kind in AgentHook::ALL {
            builder = builder.on(*kind);
        }
        agent
            .add_hook(
                builder
                    .build(move |call| {
                        let log = Arc::clone(&log_clone);
                        async move {
                            log.lock()
                                .expect("poisoned")
                                .push(call.event.hook_type().to_string());
                            Ok(())
                        }
                    })
                    .expect("hook should build"),
            )
            .expect("agent is idle");
        log
    }

    #[tokio::test]
    async fn drains_queue_in_order_with_hooks() {
        let registry = Registry::new();
        let tool = echo(&registry);
        let agent = Agent::builder(&registry, "echoer")
            .tool(&tool)
            .build()
            .expect("agent should build");
        let log = event_log(&agent);

        agent.put(echo_turn(&registry, json!("a"))).await.expect("permitted");
        agent.put(echo_turn(&registry, json!("b"))).await.expect("permitted");

        let values: Vec<Value> = agent
            .run()
            .expect("agent is idle")
            .into_stream()
            .map(|item| item.expect("turn succeeds").1)
            .collect()
            .await;

        assert_eq!(values, vec![json!("a"), json!("b")]);
        assert!(!agent.is_running());
        assert!(agent.turns().is_empty());
        assert_eq!(
            *log.lock().expect("poisoned"),
            vec![
                "agent.before_put",
                "agent.after_put",
                "agent.before_put",
                "agent.after_put",
                "agent.before_turn",
                "agent.on_turn_value",
                "agent.after_turn",
                "agent.before_turn",
                "agent.on_turn_value",
                "agent.after_turn",
                "agent.before_turn",
            ]
        );
    }

    #[tokio::test]
    async fn routes_turns_and_context_without_surfacing() {
        let registry = Registry::new();
        let tool = echo(&registry);
        let spawn = Tool::builder("spawn")
            .yielding({
                let registry = registry.clone();
                move |_| {
                    let follow_up = Turn::builder(&registry, "echo")
                        .kwarg("value", "follow-up")
                        .build()
                        .map(Output::Turn)
                        .map_err(|err| ToolError::execution_error(err.to_string()));
                    stream::iter(vec![
                        Ok(Output::Context(ContextItem::new("note"))),
                        Ok(Output::Context(ContextItem::keyed("k", "a fact", 1))),
                        follow_up,
                        Ok(Output::value("direct")),
                    ])
                }
            })
            .register(&registry)
            .expect("tool should register");
        let agent = Agent::builder(&registry, "router")
            .tool(&tool)
            .tool(&spawn)
            .build()
            .expect("agent should build");

        agent
            .put(Turn::builder(&registry, &spawn).build().expect("registered"))
            .await
            .expect("permitted");

        let mut run = agent.run().expect("agent is idle");
        let mut surfaced = Vec::new();
        while let Some(item) = run.next().await {
            surfaced.push(item.expect("turn succeeds").1);
        }

        assert_eq!(surfaced, vec![json!("direct"), json!("follow-up")]);
        assert_eq!(agent.context_queue().items(), vec![ContextItem::new("note")]);
        assert_eq!(
            agent.context_pool().get("k").expect("routed to pool").content,
            json!(1)
        );
    }

    #[tokio::test]
    async fn put_rejects_unpermitted_tools() {
        let registry = Registry::new();
        echo(&registry);
        let other = Tool::builder("other")
            .returning(|_| async { Ok(Output::value(())) })
            .register(&registry)
            .expect("tool should register");
        let agent = Agent::builder(&registry, "picky")
            .tool(&other)
            .build()
            .expect("agent should build");
        let log = event_log(&agent);

        let err = agent.put(echo_turn(&registry, json!(1))).await.unwrap_err();
        assert!(matches!(
            err,
            AgentError::ToolNotPermitted { ref tool, .. } if tool == "echo"
        ));
        assert!(agent.turns().is_empty());
        assert!(log.lock().expect("poisoned").is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn failing_turn_ends_run_after_its_hooks() {
        let registry = Registry::new();
        let slow = Tool::builder("slow")
            .returning(|_| async {
                tokio::time::sleep(Duration::from_secs(1)).await;
                Ok(Output::value(()))
            })
            .register(&registry)
            .expect("tool should register");
        let completions = Arc::new(Mutex::new(Vec::new()));
        let completions_clone = Arc::clone(&completions);
        let agent = Agent::builder(&registry, "impatient")
            .tool(&slow)
            .turn_hook(
                Hook::builder("record_completion")
                    .on(TurnHook::OnComplete)
                    .build(move |call| {
                        let completions = Arc::clone(&completions_clone);
                        async move {
                            if let HookEvent::TurnComplete { stop_reason, .. } = call.event {
                                completions.lock().expect("poisoned").push(stop_reason);
                            }
                            Ok(())
                        }
                    })
                    .expect("hook should build"),
            )
            .build()
            .expect("agent should build");

        let turn = Turn::builder(&registry, &slow)
            .timeout(Duration::from_millis(10))
            .build()
            .expect("registered");
        agent.put(turn.clone()).await.expect("permitted");
        agent.put(turn.clone()).await.expect("permitted");

        let mut run = agent.run().expect("agent is idle");
        assert!(matches!(
            run.next().await,
            Some(Err(AgentError::Turn(TurnError::Timeout { .. })))
        ));
        assert!(run.next().await.is_none());

        assert_eq!(*completions.lock().expect("poisoned"), vec![StopReason::Timeout]);
        assert!(!agent.is_running());
        assert!(agent.current_turn().is_none());
        assert_eq!(agent.turns().len(), 1);
        assert!(turn.inner.inherited_hooks.read().is_empty());
    }

    #[tokio::test]
    async fn unroutable_value_fails_the_streaming_turn() {
        let registry = Registry::new();
        echo(&registry);
        let fanout = Tool::builder("fanout")
            .yielding({
                let registry = registry.clone();
                move |_| {
                    let stray = Turn::builder(&registry, "echo")
                        .kwarg("value", "stray")
                        .build()
                        .map(Output::Turn)
                        .map_err(|err| ToolError::execution_error(err.to_string()));
                    stream::iter(vec![Ok(Output::value(1)), stray, Ok(Output::value(2))])
                }
            })
            .register(&registry)
            .expect("tool should register");
        let outcomes = Arc::new(Mutex::new(Vec::new()));
        let outcomes_clone = Arc::clone(&outcomes);
        let agent = Agent::builder(&registry, "narrow")
            .tool(&fanout)
            .turn_hook(
                Hook::builder("record_outcome")
                    .on(TurnHook::OnError)
                    .on(TurnHook::OnComplete)
                    .build(move |call| {
                        let outcomes = Arc::clone(&outcomes_clone);
                        async move {
                            outcomes
                                .lock()
                                .expect("poisoned")
                                .push(call.event.hook_type().to_string());
                            Ok(())
                        }
                    })
                    .expect("hook should build"),
            )
            .build()
            .expect("agent should build");
        let turn = Turn::builder(&registry, &fanout).build().expect("registered");
        agent.put(turn.clone()).await.expect("permitted");

        let mut run = agent.run().expect("agent is idle");
        let (_, first) = run.next().await.expect("a value").expect("routed");
        assert_eq!(first, json!(1));
        assert!(matches!(
            run.next().await,
            Some(Err(AgentError::ToolNotPermitted { ref tool, .. })) if tool == "echo"
        ));
        assert!(run.next().await.is_none());

        assert_eq!(turn.stop_reason(), Some(StopReason::Error));
        assert_eq!(
            *outcomes.lock().expect("poisoned"),
            vec!["turn.on_error", "turn.on_complete"]
        );
        assert!(!turn.is_running());
        assert!(!agent.is_running());
        assert!(agent.current_turn().is_none());
        assert!(agent.turns().is_empty());
    }

    #[tokio::test]
    async fn pause_blocks_next_turn_until_resumed() {
        let registry = Registry::new();
        let tool = echo(&registry);
        let agent = Agent::builder(&registry, "sleepy")
            .tool(&tool)
            .build()
            .expect("agent should build");
        let log = event_log(&agent);
        agent.put(echo_turn(&registry, json!(1))).await.expect("permitted");

        agent.pause();
        agent.pause();
        assert!(matches!(
            agent.add_tag("late"),
            Err(AgentError::SafeExecution { .. })
        ));

        let run = tokio::spawn({
            let agent = agent.clone();
            async move {
                let mut run = agent.run().expect("agent is idle");
                run.next().await
            }
        });
        while !log.lock().expect("poisoned").contains(&"agent.on_pause".to_owned()) {
            tokio::task::yield_now().await;
        }
        assert!(!run.is_finished());

        agent.resume();
        let (_, value) = run
            .await
            .expect("task should join")
            .expect("a value")
            .expect("turn succeeds");
        assert_eq!(value, json!(1));
        assert!(log.lock().expect("poisoned").contains(&"agent.on_resume".to_owned()));
    }

    #[tokio::test]
    async fn configuration_frozen_while_running() {
        let registry = Registry::new();
        let tool = echo(&registry);
        let agent = Agent::builder(&registry, "busy")
            .tool(&tool)
            .build()
            .expect("agent should build");

        let run = agent.run().expect("agent is idle");
        assert!(matches!(agent.run(), Err(AgentError::SafeExecution { .. })));
        assert!(matches!(
            agent.set_description("changed"),
            Err(AgentError::SafeExecution { .. })
        ));
        drop(run);

        agent.set_description("changed").expect("idle agent accepts changes");
        assert_eq!(agent.description(), "changed");
    }

    #[tokio::test]
    async fn tools_see_the_agent_context_while_running() {
        let registry = Registry::new();
        let remember = Tool::builder("remember")
            .param("note")
            .context_queue("memory", Requirement::Required)
            .returning(|input| async move {
                let note: String = input.get_param("note")?;
                let queue = input.context_queue().cloned().ok_or_else(|| {
                    ToolError::execution_error("context queue should be injected")
                })?;
                queue.append([ContextItem::new(note)]).await?;
                Ok(Output::value(queue.len()))
            })
            .register(&registry)
            .expect("tool should register");
        let memory = ContextQueue::new(&registry, 4).expect("valid limit");
        let agent = Agent::builder(&registry, "scribe")
            .tool(&remember)
            .context_queue(memory.clone())
            .build()
            .expect("agent should build");

        agent
            .put(
                Turn::builder(&registry, &remember)
                    .kwarg("note", "hello")
                    .build()
                    .expect("registered"),
            )
            .await
            .expect("permitted");

        let mut run = agent.run().expect("agent is idle");
        let (_, value) = run.next().await.expect("a value").expect("turn succeeds");
        assert_eq!(value, json!(1));
        assert_eq!(memory.history(None), "hello");
        assert!(ContextScope::current().queue.is_none());
    }
}
