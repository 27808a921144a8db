use core::fmt;

use futures::StreamExt;
use futures::stream::{self, BoxStream};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use super::definition::Turn;
use super::error::TurnError;
use super::execution::Execution;
use crate::hooks::HookEvent;
use crate::output::{Output, TurnOutput};
use crate::tool::ToolStream;

enum Phase {
    Pending,
    Running {
        tool: ToolStream,
        deadline: Instant,
        token: CancellationToken,
    },
    Done,
}

/// A running execution of a turn whose tool yields.
///
/// Created by [`Turn::yielding`]. The turn stays running until the stream
/// ends, fails, times out, or is dropped. A stream dropped after its first
/// pull records [`StopReason::Cancelled`](super::StopReason::Cancelled).
///
/// On timeout the values produced so far are kept as the turn's output.
pub struct TurnStream {
    turn: Turn,
    execution: Option<Execution>,
    phase: Phase,
    produced: Vec<Output>,
}

impl fmt::Debug for TurnStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TurnStream")
            .field("turn", &self.turn.id())
            .field("produced", &self.produced.len())
            .field("finished", &self.execution.is_none())
            .finish()
    }
}

impl TurnStream {
    pub(crate) fn new(turn: Turn, execution: Execution) -> Self {
        Self {
            turn,
            execution: Some(execution),
            phase: Phase::Pending,
            produced: Vec::new(),
        }
    }

    /// The turn being executed.
    #[must_use]
    pub fn turn(&self) -> &Turn {
        &self.turn
    }

    /// Every value handed out so far.
    #[must_use]
    pub fn produced(&self) -> &[Output] {
        &self.produced
    }

    /// Pulls the next value.
    ///
    /// Returns `None` once the tool is exhausted and the turn completed.
    /// A failure is returned once, after the turn settled.
    pub async fn next(&mut self) -> Option<Result<Output, TurnError>> {
        if matches!(self.phase, Phase::Pending)
            && let Err(err) = self.start().await
        {
            return Some(Err(self.fail(err).await));
        }

        let Phase::Running { tool, deadline, .. } = &mut self.phase else {
            return None;
        };

        let deadline = *deadline;
        let pulled = if Instant::now() >= deadline {
            None
        } else {
            tokio::time::timeout_at(deadline, tool.next()).await.ok()
        };

        match pulled {
            Some(Some(Ok(output))) => {
                self.produced.push(output.clone());
                Some(Ok(output))
            }
            Some(Some(Err(err))) => Some(Err(self.fail(err.into()).await)),
            Some(None) => self.finish().await.err().map(Err),
            None => Some(Err(self.time_out().await)),
        }
    }

    /// Fails a running turn from the consumer's side.
    ///
    /// Cancels and closes the tool, keeps the values produced so far as the
    /// turn's output, then fires `ON_ERROR` and `ON_COMPLETE`. The turn is
    /// recorded as [`StopReason::Error`](super::StopReason::Error) with
    /// [`TurnError::Interrupted`]. Does nothing before the first pull or once
    /// the turn has settled.
    pub async fn abort(&mut self, reason: impl Into<String>) {
        let reason = reason.into();
        if !matches!(self.phase, Phase::Running { .. }) {
            return;
        }
        self.close_tool("aborting").await;
        let err = TurnError::Interrupted {
            turn: self.turn.id().to_owned(),
            reason,
        };
        let partial = TurnOutput::Stream(self.produced.clone());
        self.turn.settle_failure(err, Some(partial)).await;
        self.execution = None;
    }

    /// Converts into a [`BoxStream`] of the same items.
    #[must_use]
    pub fn into_stream(self) -> BoxStream<'static, Result<Output, TurnError>> {
        stream::unfold(self, |mut stream| async move {
            let item = stream.next().await?;
            Some((item, stream))
        })
        .boxed()
    }

    async fn start(&mut self) -> Result<(), TurnError> {
        self.phase = Phase::Done;
        if let Some(execution) = &mut self.execution {
            execution.start();
        }
        self.turn
            .dispatch(HookEvent::TurnBeforeRun {
                turn: self.turn.clone(),
            })
            .await?;

        let token = CancellationToken::new();
        let tool = self
            .turn
            .tool()
            .stream(self.turn.invocation(token.clone()))?;
        self.phase = Phase::Running {
            tool,
            deadline: Instant::now() + self.turn.timeout(),
            token,
        };
        Ok(())
    }

    async fn fail(&mut self, err: TurnError) -> TurnError {
        self.phase = Phase::Done;
        let err = self.turn.settle_failure(err, None).await;
        self.execution = None;
        err
    }

    async fn close_tool(&mut self, during: &'static str) {
        if let Phase::Running {
            mut tool, token, ..
        } = std::mem::replace(&mut self.phase, Phase::Done)
        {
            token.cancel();
            if let Err(err) = tool.close().await {
                tracing::warn!(
                    turn = %self.turn.id(),
                    error = %err,
                    during,
                    "closing the tool stream failed"
                );
            }
        }
    }

    async fn time_out(&mut self) -> TurnError {
        self.close_tool("timing out").await;
        let partial = TurnOutput::Stream(self.produced.clone());
        let err = self
            .turn
            .settle_failure(self.turn.timeout_error(), Some(partial))
            .await;
        self.execution = None;
        err
    }

    async fn finish(&mut self) -> Result<(), TurnError> {
        self.phase = Phase::Done;
        let result = self
            .turn
            .settle_success(TurnOutput::Stream(self.produced.clone()))
            .await;
        self.execution = None;
        result
    }
}

impl Drop for TurnStream {
    fn drop(&mut self) {
        if let Phase::Running { token, .. } = &self.phase {
            token.cancel();
        }
    }
}
