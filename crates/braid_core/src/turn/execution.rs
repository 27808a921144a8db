//! The turn state machine.
//!
//! ```text
//! idle ──returning()/yielding()──▶ running ──▶ completed | timeout | error | cancelled
//! ```
//!
//! Every attempt that gets past the shape and reentrancy checks fires
//! `BEFORE_RUN` and, however it ends, exactly one `ON_COMPLETE`.

use std::sync::atomic::Ordering;

use chrono::Utc;
use tokio_util::sync::CancellationToken;

use super::definition::{StopReason, Turn, TurnMetadata};
use super::error::TurnError;
use super::stream::TurnStream;
use crate::hooks::HookEvent;
use crate::output::{Output, TurnOutput};
use crate::tool::{Arg, Invocation, ToolShape};

/// Holds a turn's running flag for one execution attempt.
///
/// Dropping it after [`start`](Self::start) but before the attempt settled
/// records [`StopReason::Cancelled`]; dropping it earlier only releases the
/// flag.
pub(crate) struct Execution {
    turn: Turn,
    started: bool,
}

impl Execution {
    /// Claims the running flag without touching the recorded outcome.
    pub(crate) fn claim(turn: &Turn) -> Result<Self, TurnError> {
        if turn
            .inner
            .running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(TurnError::SafeExecution {
                turn: turn.id().to_owned(),
            });
        }
        Ok(Self {
            turn: turn.clone(),
            started: false,
        })
    }

    pub(crate) fn begin(turn: &Turn) -> Result<Self, TurnError> {
        let mut execution = Self::claim(turn)?;
        execution.start();
        Ok(execution)
    }

    /// Clears the previous outcome and stamps the start time.
    pub(crate) fn start(&mut self) {
        if self.started {
            return;
        }
        self.started = true;
        {
            let mut state = self.turn.inner.state.lock();
            state.output = None;
            state.metadata = TurnMetadata {
                start_time: Some(Utc::now()),
                ..TurnMetadata::default()
            };
        }
        tracing::debug!(turn = %self.turn.id(), tool = %self.turn.tool().name(), "turn started");
    }
}

impl Drop for Execution {
    fn drop(&mut self) {
        if self.started {
            let mut state = self.turn.inner.state.lock();
            if state.metadata.stop_reason.is_none() {
                state.metadata.stop_reason = Some(StopReason::Cancelled);
                state.metadata.end_time = Some(Utc::now());
                tracing::debug!(turn = %self.turn.id(), "turn cancelled");
            }
        }
        self.turn.inner.running.store(false, Ordering::Release);
    }
}

impl Turn {
    /// Runs a returning tool and returns its output.
    ///
    /// # Errors
    ///
    /// - [`TurnError::WrongRunMethod`] if the tool yields (nothing fires)
    /// - [`TurnError::SafeExecution`] if the turn is already running
    /// - [`TurnError::Timeout`] once `ON_TIMEOUT` and `ON_COMPLETE` fired
    /// - the tool's or a hook's failure once `ON_ERROR` and `ON_COMPLETE` fired
    pub async fn returning(&self) -> Result<Output, TurnError> {
        self.check_shape(ToolShape::Returning)?;
        let _execution = Execution::begin(self)?;

        if let Err(err) = self
            .dispatch(HookEvent::TurnBeforeRun { turn: self.clone() })
            .await
        {
            return Err(self.settle_failure(err.into(), None).await);
        }

        let token = CancellationToken::new();
        let invocation = self.invocation(token.clone());
        let call = self.inner.tool.call(invocation);
        let output = match tokio::time::timeout(self.timeout(), call).await {
            Ok(Ok(output)) => output,
            Ok(Err(err)) => return Err(self.settle_failure(err.into(), None).await),
            Err(_) => {
                token.cancel();
                return Err(self.settle_failure(self.timeout_error(), None).await);
            }
        };

        self.settle_success(TurnOutput::Single(output.clone()))
            .await?;
        Ok(output)
    }

    /// Starts a yielding tool.
    ///
    /// The turn is marked running at once, but its previous outcome is kept
    /// until the first pull, which fires `BEFORE_RUN`. Dropping the stream
    /// before that leaves the turn as it was. One deadline covers the whole
    /// production, including the time the caller spends between pulls.
    ///
    /// # Errors
    ///
    /// [`TurnError::WrongRunMethod`] if the tool returns a single value, or
    /// [`TurnError::SafeExecution`] if the turn is already running.
    pub fn yielding(&self) -> Result<TurnStream, TurnError> {
        self.check_shape(ToolShape::Yielding)?;
        let execution = Execution::claim(self)?;
        Ok(TurnStream::new(self.clone(), execution))
    }

    fn check_shape(&self, expected: ToolShape) -> Result<(), TurnError> {
        let actual = self.inner.tool.shape();
        if actual != expected {
            return Err(TurnError::WrongRunMethod {
                tool: self.inner.tool.name().to_owned(),
                actual,
            });
        }
        Ok(())
    }

    pub(crate) fn invocation(&self, token: CancellationToken) -> Invocation {
        let (args, kwargs) = {
            let binding = self.inner.binding.lock();
            (binding.args.clone(), binding.kwargs.clone())
        };
        Invocation::new()
            .with_args(args.iter().map(Arg::evaluate).collect())
            .with_kwargs(
                kwargs
                    .iter()
                    .map(|(key, arg)| (key.clone(), arg.evaluate()))
                    .collect(),
            )
            .with_cancellation(token)
    }

    pub(crate) fn timeout_error(&self) -> TurnError {
        TurnError::Timeout {
            tool: self.inner.tool.name().to_owned(),
            turn: self.inner.id.clone(),
            timeout: self.timeout(),
        }
    }

    fn record(&self, output: Option<TurnOutput>, reason: StopReason) {
        let mut state = self.inner.state.lock();
        if output.is_some() {
            state.output = output;
        }
        state.metadata.stop_reason = Some(reason);
        state.metadata.end_time = Some(Utc::now());
    }

    /// `AFTER_RUN` then `ON_COMPLETE`. A failing `AFTER_RUN` turns the
    /// attempt into an error.
    pub(crate) async fn settle_success(&self, output: TurnOutput) -> Result<(), TurnError> {
        self.record(Some(output.clone()), StopReason::Completed);
        if let Err(err) = self
            .dispatch(HookEvent::TurnAfterRun {
                turn: self.clone(),
                output,
            })
            .await
        {
            return Err(self.settle_failure(err.into(), None).await);
        }

        tracing::debug!(turn = %self.id(), tool = %self.tool().name(), "turn completed");
        self.dispatch(HookEvent::TurnComplete {
            turn: self.clone(),
            stop_reason: StopReason::Completed,
        })
        .await?;
        Ok(())
    }

    /// Records the outcome, fires `ON_TIMEOUT` or `ON_ERROR`, then
    /// `ON_COMPLETE`, and hands back the primary failure.
    pub(crate) async fn settle_failure(
        &self,
        err: TurnError,
        partial: Option<TurnOutput>,
    ) -> TurnError {
        let (reason, event) = match &err {
            TurnError::Timeout { timeout, .. } => {
                tracing::debug!(turn = %self.id(), ?timeout, "turn timed out");
                (
                    StopReason::Timeout,
                    HookEvent::TurnTimeout { turn: self.clone() },
                )
            }
            other => {
                tracing::debug!(turn = %self.id(), error = %other, "turn failed");
                (
                    StopReason::Error,
                    HookEvent::TurnError {
                        turn: self.clone(),
                        error: other.to_string(),
                    },
                )
            }
        };
        self.record(partial, reason);

        self.dispatch_secondary(event).await;
        self.dispatch_secondary(HookEvent::TurnComplete {
            turn: self.clone(),
            stop_reason: reason,
        })
        .await;
        err
    }

    async fn dispatch_secondary(&self, event: HookEvent) {
        let kind = event.hook_type();
        if let Err(err) = self.dispatch(event).await {
            tracing::warn!(
                turn = %self.id(),
                event = %kind,
                error = %err,
                "hook failed while a turn failure was propagating"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hooks::{Hook, TurnHook};
    use crate::registry::Registry;
    use crate::tool::{Tool, ToolError};
    use core::time::Duration;
    use std::sync::{Arc, Mutex};
    use tokio::sync::Notify;

    fn lifecycle_log(turn: &Turn) -> Arc<Mutex<Vec<String>>> {
        let log = Arc::new(Mutex::new(Vec::new()));
        let log_clone = Arc::clone(&log);
        let mut builder = Hook::builder(format!("lifecycle_{}", turn.id()));
        for kind in TurnHook::ALL {
            builder = builder.on(*kind);
        }
        turn.add_hook(
            builder
                .build(move |call| {
                    let log = Arc::clone(&log_clone);
                    async move {
                        let entry = match &call.event {
                            HookEvent::TurnComplete { stop_reason, .. } => {
                                format!("complete {stop_reason}")
                            }
                            other => other.hook_type().to_string(),
                        };
                        log.lock().expect("poisoned").push(entry);
                        Ok(())
                    }
                })
                .expect("hook should build"),
        )
        .expect("turn is idle");
        log
    }

    #[tokio::test]
    async fn completed_turn_fires_after_run_then_complete() {
        let registry = Registry::new();
        Tool::builder("double")
            .param("x")
            .returning(|input| async move {
                let x: i64 = input.get_param("x")?;
                Ok(Output::value(x * 2))
            })
            .register(&registry)
            .expect("tool should register");
        let turn = Turn::builder(&registry, "double")
            .kwarg("x", 5)
            .build()
            .expect("tool is registered");
        let log = lifecycle_log(&turn);

        let output = turn.returning().await.expect("turn should run");

        assert_eq!(output, Output::value(10));
        assert_eq!(turn.output(), Some(TurnOutput::Single(Output::value(10))));
        assert_eq!(turn.stop_reason(), Some(StopReason::Completed));
        assert!(turn.metadata().end_time.is_some());
        assert!(!turn.is_running());
        assert_eq!(
            *log.lock().expect("poisoned"),
            vec!["turn.before_run", "turn.after_run", "complete completed"]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn deadline_classifies_as_timeout_and_cancels_token() {
        let registry = Registry::new();
        let observed = Arc::new(Mutex::new(None));
        let observed_clone = Arc::clone(&observed);
        Tool::builder("slow")
            .returning(move |input| {
                let observed = Arc::clone(&observed_clone);
                async move {
                    *observed.lock().expect("poisoned") = Some(input.cancellation_token().clone());
                    tokio::time::sleep(Duration::from_secs(1)).await;
                    Ok(Output::value("late"))
                }
            })
            .register(&registry)
            .expect("tool should register");
        let turn = Turn::builder(&registry, "slow")
            .timeout(Duration::from_millis(10))
            .build()
            .expect("tool is registered");
        let log = lifecycle_log(&turn);

        let err = turn.returning().await.unwrap_err();

        assert!(matches!(
            err,
            TurnError::Timeout { ref tool, timeout, .. }
                if tool == "slow" && timeout == Duration::from_millis(10)
        ));
        assert_eq!(err.stop_reason(), Some(StopReason::Timeout));
        assert_eq!(turn.stop_reason(), Some(StopReason::Timeout));
        assert!(
            observed
                .lock()
                .expect("poisoned")
                .as_ref()
                .expect("body ran")
                .is_cancelled()
        );
        assert_eq!(
            *log.lock().expect("poisoned"),
            vec!["turn.before_run", "turn.on_timeout", "complete timeout"]
        );
    }

    #[tokio::test]
    async fn tool_failure_fires_on_error_then_complete() {
        let registry = Registry::new();
        Tool::builder("broken")
            .returning(|_| async { Err(ToolError::execution_error("disk full")) })
            .register(&registry)
            .expect("tool should register");
        let turn = Turn::builder(&registry, "broken")
            .build()
            .expect("tool is registered");
        let log = lifecycle_log(&turn);

        let err = turn.returning().await.unwrap_err();

        assert!(matches!(err, TurnError::Tool(ToolError::ExecutionError(_))));
        assert_eq!(turn.stop_reason(), Some(StopReason::Error));
        assert_eq!(turn.output(), None);
        assert_eq!(
            *log.lock().expect("poisoned"),
            vec!["turn.before_run", "turn.on_error", "complete error"]
        );
    }

    #[tokio::test]
    async fn failing_before_run_hook_is_an_error_outcome() {
        let registry = Registry::new();
        Tool::builder("never")
            .returning(|_| async { Ok(Output::value(1)) })
            .register(&registry)
            .expect("tool should register");
        let turn = Turn::builder(&registry, "never")
            .hook(
                Hook::builder("veto")
                    .on(TurnHook::BeforeRun)
                    .build(|_| async { Err(crate::hooks::HookError::msg("vetoed")) })
                    .expect("hook should build"),
            )
            .build()
            .expect("tool is registered");

        let err = turn.returning().await.unwrap_err();
        assert!(matches!(err, TurnError::Hook(ref hook) if hook.hook_name() == Some("veto")));
        assert_eq!(turn.stop_reason(), Some(StopReason::Error));
    }

    #[tokio::test]
    async fn wrong_run_method_changes_nothing() {
        let registry = Registry::new();
        Tool::builder("stream_only")
            .yielding(|_| futures::stream::empty())
            .register(&registry)
            .expect("tool should register");
        let turn = Turn::builder(&registry, "stream_only")
            .build()
            .expect("tool is registered");
        let log = lifecycle_log(&turn);

        let err = turn.returning().await.unwrap_err();
        assert!(matches!(
            err,
            TurnError::WrongRunMethod {
                actual: ToolShape::Yielding,
                ..
            }
        ));
        assert_eq!(turn.metadata(), TurnMetadata::default());
        assert!(log.lock().expect("poisoned").is_empty());
    }

    #[tokio::test]
    async fn reentry_and_mutation_rejected_while_running() {
        let registry = Registry::new();
        let started = Arc::new(Notify::new());
        let release = Arc::new(Notify::new());
        let (started_clone, release_clone) = (Arc::clone(&started), Arc::clone(&release));
        Tool::builder("gate")
            .returning(move |_| {
                let started = Arc::clone(&started_clone);
                let release = Arc::clone(&release_clone);
                async move {
                    started.notify_one();
                    release.notified().await;
                    Ok(Output::value("done"))
                }
            })
            .register(&registry)
            .expect("tool should register");
        let turn = Turn::builder(&registry, "gate")
            .build()
            .expect("tool is registered");

        let background = tokio::spawn({
            let turn = turn.clone();
            async move { turn.returning().await }
        });
        started.notified().await;

        assert!(turn.is_running());
        assert!(matches!(
            turn.returning().await,
            Err(TurnError::SafeExecution { .. })
        ));
        assert!(matches!(
            turn.set_timeout(Duration::from_secs(1)),
            Err(TurnError::SafeExecution { .. })
        ));
        assert_eq!(turn.stop_reason(), None);

        release.notify_one();
        background
            .await
            .expect("task should join")
            .expect("turn should complete");
        assert_eq!(turn.stop_reason(), Some(StopReason::Completed));
        turn.set_timeout(Duration::from_secs(1))
            .expect("idle turn accepts changes");
    }

    #[tokio::test]
    async fn dropped_execution_records_cancelled() {
        let registry = Registry::new();
        Tool::builder("forever")
            .returning(|_| async {
                futures::future::pending::<()>().await;
                Ok(Output::value(()))
            })
            .register(&registry)
            .expect("tool should register");
        let turn = Turn::builder(&registry, "forever")
            .build()
            .expect("tool is registered");

        {
            let run = turn.returning();
            tokio::pin!(run);
            assert!(futures::poll!(&mut run).is_pending());
            assert!(turn.is_running());
        }

        assert!(!turn.is_running());
        assert_eq!(turn.stop_reason(), Some(StopReason::Cancelled));
    }

    #[tokio::test]
    async fn lazy_arguments_evaluated_at_execution() {
        let registry = Registry::new();
        Tool::builder("echo")
            .param("value")
            .returning(|input| async move { Ok(Output::Value(input.get_param("value")?)) })
            .register(&registry)
            .expect("tool should register");

        let source = Arc::new(Mutex::new(1));
        let source_clone = Arc::clone(&source);
        let turn = Turn::builder(&registry, "echo")
            .lazy_kwarg("value", move || serde_json::json!(*source_clone.lock().expect("poisoned")))
            .build()
            .expect("tool is registered");

        *source.lock().expect("poisoned") = 2;
        assert_eq!(turn.returning().await.expect("turn should run"), Output::value(2));
        assert_eq!(turn.export().kwargs["value"], serde_json::json!(2));
    }
}
