//! Pull-based execution of yielding tools.

use core::fmt;

use futures::StreamExt;
use futures::stream::{self, BoxStream};
use tokio::sync::OwnedMutexGuard;

use super::definition::Tool;
use super::error::ToolError;
use super::param::ToolInput;
use crate::hooks::HookEvent;
use crate::output::{Output, TurnOutput};

enum State {
    Pending(ToolInput),
    Running {
        body: BoxStream<'static, Result<Output, ToolError>>,
        _guard: Option<OwnedMutexGuard<()>>,
    },
    Done,
}

/// A running invocation of a yielding tool.
///
/// Nothing happens until the first [`next`](Self::next). The first pull
/// fires `BEFORE_INVOKE` and takes the tool's lock; the lock is held until
/// the body is exhausted, fails, or the stream is closed or dropped. Each
/// value fires `ON_YIELD` before it is handed out. `AFTER_INVOKE` fires once
/// with every value produced, on exhaustion or on [`close`](Self::close).
///
/// ```
/// # tokio_test::block_on(async {
/// use braid_core::{Output, Registry, Tool};
/// use braid_core::tool::Invocation;
///
/// let registry = Registry::new();
/// let count = Tool::builder("count")
///     .yielding(|_| futures::stream::iter((1..=3).map(|n| Ok(Output::value(n)))))
///     .register(&registry)
///     .expect("tool should register");
///
/// let mut stream = count.stream(Invocation::new()).expect("tool yields");
/// while let Some(value) = stream.next().await {
///     value.expect("value should be produced");
/// }
/// assert_eq!(stream.produced().len(), 3);
/// # });
/// ```
pub struct ToolStream {
    tool: Tool,
    state: State,
    produced: Vec<Output>,
    started: bool,
    settled: bool,
}

impl fmt::Debug for ToolStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ToolStream")
            .field("tool", &self.tool.name())
            .field("produced", &self.produced.len())
            .field("started", &self.started)
            .field("settled", &self.settled)
            .finish()
    }
}

impl ToolStream {
    pub(crate) fn new(tool: Tool, input: ToolInput) -> Self {
        Self {
            tool,
            state: State::Pending(input),
            produced: Vec::new(),
            started: false,
            settled: false,
        }
    }

    /// The tool being run.
    #[must_use]
    pub fn tool(&self) -> &Tool {
        &self.tool
    }

    /// Every value handed out so far.
    #[must_use]
    pub fn produced(&self) -> &[Output] {
        &self.produced
    }

    /// Returns `true` once the body has finished, failed, or been closed.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        matches!(self.state, State::Done)
    }

    /// Pulls the next value.
    ///
    /// Returns `None` once the body is exhausted. A body failure is returned
    /// once, after `ON_ERROR` fired; the stream is finished afterwards.
    pub async fn next(&mut self) -> Option<Result<Output, ToolError>> {
        if matches!(self.state, State::Pending(_))
            && let Err(err) = self.start().await
        {
            self.settled = true;
            return Some(Err(err));
        }

        let State::Running { body, .. } = &mut self.state else {
            return None;
        };

        let item = body.next().await;
        match item {
            Some(Ok(output)) => {
                let event = HookEvent::ToolYield {
                    tool: self.tool.clone(),
                    value: output.clone(),
                };
                if let Err(err) = self.tool.dispatch(event).await {
                    self.stop();
                    self.settled = true;
                    return Some(Err(err.into()));
                }
                self.produced.push(output.clone());
                Some(Ok(output))
            }
            Some(Err(err)) => {
                self.stop();
                self.settled = true;
                Some(Err(self.tool.fail(err).await))
            }
            None => {
                self.stop();
                self.settled = true;
                self.after_invoke().await.err().map(Err)
            }
        }
    }

    /// Ends the invocation early.
    ///
    /// Drops the body, releases the lock, and fires `AFTER_INVOKE` with the
    /// values produced so far. Does nothing if the stream never started or
    /// has already settled.
    ///
    /// # Errors
    ///
    /// Propagates an `AFTER_INVOKE` hook failure.
    pub async fn close(&mut self) -> Result<(), ToolError> {
        self.stop();
        if !self.started || self.settled {
            return Ok(());
        }
        self.settled = true;
        tracing::debug!(
            tool = %self.tool.name(),
            produced = self.produced.len(),
            "closing tool stream early"
        );
        self.after_invoke().await
    }

    /// Converts into a [`BoxStream`] of the same items.
    #[must_use]
    pub fn into_stream(self) -> BoxStream<'static, Result<Output, ToolError>> {
        stream::unfold(self, |mut stream| async move {
            let item = stream.next().await?;
            Some((item, stream))
        })
        .boxed()
    }

    async fn start(&mut self) -> Result<(), ToolError> {
        let State::Pending(input) = std::mem::replace(&mut self.state, State::Done) else {
            return Ok(());
        };
        self.tool
            .dispatch(HookEvent::ToolBeforeInvoke {
                tool: self.tool.clone(),
                args: input.params.clone(),
            })
            .await?;

        let guard = self.tool.acquire().await;
        let body = self.tool.open_body_stream(input)?;
        self.tool.inner.metadata.lock().start();
        self.state = State::Running {
            body,
            _guard: guard,
        };
        self.started = true;
        Ok(())
    }

    fn stop(&mut self) {
        if matches!(self.state, State::Running { .. }) {
            self.tool.inner.metadata.lock().finish();
        }
        self.state = State::Done;
    }

    async fn after_invoke(&mut self) -> Result<(), ToolError> {
        let tool = self.tool.clone();
        let output = TurnOutput::Stream(self.produced.clone());
        tool.dispatch(HookEvent::ToolAfterInvoke {
            tool: tool.clone(),
            output,
        })
        .await?;
        Ok(())
    }
}
