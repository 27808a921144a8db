//! The [`Tool`] handle: binding, locking and lifecycle hooks.

use core::fmt;
use std::sync::Arc;

use futures::future::BoxFuture;
use futures::stream::BoxStream;
use indexmap::IndexMap;
use parking_lot::{Mutex, RwLock};
use serde_json::Map;
use tokio::sync::OwnedMutexGuard;

use super::builder::ToolBuilder;
use super::error::ToolError;
use super::param::{Arg, Invocation, ToolInput, ToolParam, ToolShape};
use super::stream::ToolStream;
use crate::context::{ContextScope, Requirement};
use crate::hooks::{Hook, HookError, HookEvent, Tags};
use crate::metadata::Timing;
use crate::output::{Output, TurnOutput};
use crate::registry::Registry;

pub(crate) type ReturningBody =
    dyn Fn(ToolInput) -> BoxFuture<'static, Result<Output, ToolError>> + Send + Sync;
pub(crate) type YieldingBody =
    dyn Fn(ToolInput) -> BoxStream<'static, Result<Output, ToolError>> + Send + Sync;

pub(crate) enum Body {
    Returning(Box<ReturningBody>),
    Yielding(Box<YieldingBody>),
}

impl Body {
    fn shape(&self) -> ToolShape {
        match self {
            Body::Returning(_) => ToolShape::Returning,
            Body::Yielding(_) => ToolShape::Yielding,
        }
    }
}

/// A parameter that receives a context container instead of a JSON value.
#[derive(Debug, Clone)]
pub(crate) struct ContextParam {
    pub(crate) name: String,
    pub(crate) requirement: Requirement,
}

pub(crate) struct ToolInner {
    pub(crate) name: String,
    pub(crate) description: Option<String>,
    pub(crate) params: Vec<ToolParam>,
    pub(crate) accepts_extra_kwargs: bool,
    pub(crate) context_queue: Option<ContextParam>,
    pub(crate) context_pool: Option<ContextParam>,
    pub(crate) lock: Option<Arc<tokio::sync::Mutex<()>>>,
    pub(crate) fixed_kwargs: IndexMap<String, Arg>,
    pub(crate) tags: RwLock<Tags>,
    pub(crate) hooks: RwLock<Vec<Hook>>,
    pub(crate) metadata: Mutex<Timing>,
    pub(crate) body: Body,
    pub(crate) registry: Registry,
}

/// A registered async unit of work.
///
/// A tool is either *returning* (one [`Output`] per call, run with
/// [`call`](Self::call)) or *yielding* (a stream of outputs, run with
/// [`stream`](Self::stream)). Tools are built and registered in one step:
///
/// ```
/// # tokio_test::block_on(async {
/// use braid_core::{Output, Registry, Tool};
/// use braid_core::tool::Invocation;
///
/// let registry = Registry::new();
/// let double = Tool::builder("double")
///     .param("x")
///     .returning(|input| async move {
///         let x: i64 = input.get_param("x")?;
///         Ok(Output::value(x * 2))
///     })
///     .register(&registry)
///     .expect("tool should register");
///
/// let output = double.call(Invocation::new().arg(5)).await.expect("call should succeed");
/// assert_eq!(output, Output::value(10));
/// # });
/// ```
#[derive(Clone)]
pub struct Tool {
    pub(crate) inner: Arc<ToolInner>,
}

impl fmt::Debug for Tool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Tool")
            .field("name", &self.inner.name)
            .field("shape", &self.shape())
            .field("params", &self.inner.params)
            .field("locked", &self.inner.lock.is_some())
            .finish_non_exhaustive()
    }
}

impl Tool {
    /// Starts building a tool.
    pub fn builder(name: impl Into<String>) -> ToolBuilder {
        ToolBuilder::new(name)
    }

    /// The registered name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Human-readable description.
    #[must_use]
    pub fn description(&self) -> Option<&str> {
        self.inner.description.as_deref()
    }

    /// Whether the tool returns once or yields a stream.
    #[must_use]
    pub fn shape(&self) -> ToolShape {
        self.inner.body.shape()
    }

    /// Declared value parameters in positional order.
    #[must_use]
    pub fn params(&self) -> &[ToolParam] {
        &self.inner.params
    }

    /// Returns `true` if undeclared keyword arguments are forwarded.
    #[must_use]
    pub fn accepts_extra_kwargs(&self) -> bool {
        self.inner.accepts_extra_kwargs
    }

    /// Returns `true` if concurrent invocations are serialized.
    #[must_use]
    pub fn is_locked(&self) -> bool {
        self.inner.lock.is_some()
    }

    /// Tags used to filter hooks.
    #[must_use]
    pub fn tags(&self) -> Tags {
        self.inner.tags.read().clone()
    }

    /// Adds a tag.
    pub fn add_tag(&self, tag: impl Into<String>) {
        self.inner.tags.write().insert(tag.into());
    }

    /// The attached hooks.
    #[must_use]
    pub fn hooks(&self) -> Vec<Hook> {
        self.inner.hooks.read().clone()
    }

    /// Attaches a hook to this tool.
    pub fn add_hook(&self, hook: Hook) {
        self.inner.hooks.write().push(hook);
    }

    /// Timing of the most recent invocation.
    #[must_use]
    pub fn metadata(&self) -> Timing {
        *self.inner.metadata.lock()
    }

    /// The registry this tool is registered in.
    #[must_use]
    pub fn registry(&self) -> &Registry {
        &self.inner.registry
    }

    /// Returns `true` if both handles are the same tool.
    #[must_use]
    pub fn ptr_eq(&self, other: &Tool) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Invokes a returning tool.
    ///
    /// Fires `BEFORE_INVOKE`, runs the body under the tool's lock (if any),
    /// then fires `AFTER_INVOKE` on success or `ON_ERROR` if the body failed.
    ///
    /// # Errors
    ///
    /// [`ToolError::WrongShape`] for a yielding tool, binding errors, hook
    /// failures, or whatever the body raised.
    pub async fn call(&self, invocation: Invocation) -> Result<Output, ToolError> {
        let Body::Returning(body) = &self.inner.body else {
            return Err(self.wrong_shape(ToolShape::Returning));
        };
        let input = self.bind(invocation)?;

        self.dispatch(HookEvent::ToolBeforeInvoke {
            tool: self.clone(),
            args: input.params.clone(),
        })
        .await?;

        let result = {
            let _guard = self.acquire().await;
            self.inner.metadata.lock().start();
            let result = body(input).await;
            self.inner.metadata.lock().finish();
            result
        };

        match result {
            Ok(output) => {
                self.dispatch(HookEvent::ToolAfterInvoke {
                    tool: self.clone(),
                    output: TurnOutput::Single(output.clone()),
                })
                .await?;
                Ok(output)
            }
            Err(err) => Err(self.fail(err).await),
        }
    }

    /// Prepares a yielding tool.
    ///
    /// Arguments are bound now; nothing runs until the stream is polled.
    ///
    /// # Errors
    ///
    /// [`ToolError::WrongShape`] for a returning tool, or binding errors.
    pub fn stream(&self, invocation: Invocation) -> Result<ToolStream, ToolError> {
        if !matches!(self.inner.body, Body::Yielding(_)) {
            return Err(self.wrong_shape(ToolShape::Yielding));
        }
        let input = self.bind(invocation)?;
        Ok(ToolStream::new(self.clone(), input))
    }

    pub(crate) fn open_body_stream(
        &self,
        input: ToolInput,
    ) -> Result<BoxStream<'static, Result<Output, ToolError>>, ToolError> {
        match &self.inner.body {
            Body::Yielding(body) => Ok(body(input)),
            Body::Returning(_) => Err(self.wrong_shape(ToolShape::Yielding)),
        }
    }

    pub(crate) async fn acquire(&self) -> Option<OwnedMutexGuard<()>> {
        match &self.inner.lock {
            Some(lock) => Some(Arc::clone(lock).lock_owned().await),
            None => None,
        }
    }

    pub(crate) async fn dispatch(&self, event: HookEvent) -> Result<(), HookError> {
        let hooks = self.hooks();
        let tags = self.tags();
        self.inner
            .registry
            .hooks()
            .dispatch(&hooks, &tags, event)
            .await
    }

    /// Fires `ON_ERROR` for a body failure and hands the failure back.
    pub(crate) async fn fail(&self, err: ToolError) -> ToolError {
        tracing::debug!(tool = %self.inner.name, error = %err, "tool body failed");
        let event = HookEvent::ToolError {
            tool: self.clone(),
            error: err.to_string(),
        };
        if let Err(hook_err) = self.dispatch(event).await {
            tracing::warn!(tool = %self.inner.name, error = %hook_err, "tool error hook failed");
        }
        err
    }

    fn wrong_shape(&self, expected: ToolShape) -> ToolError {
        ToolError::WrongShape {
            tool: self.inner.name.clone(),
            expected,
            actual: self.shape(),
        }
    }

    fn declares(&self, name: &str) -> bool {
        self.inner.params.iter().any(|param| param.name == name)
    }

    /// Binds call-site arguments to the declared parameters.
    ///
    /// Positional arguments first, then call-site keyword arguments, then
    /// fixed keyword arguments that the call site did not supply, then
    /// defaults. Context containers come from the invocation or, failing
    /// that, from the active [`ContextScope`].
    fn bind(&self, invocation: Invocation) -> Result<ToolInput, ToolError> {
        let inner = &self.inner;
        let (args, call_kwargs, queue, pool, cancellation) = invocation.into_parts();

        if args.len() > inner.params.len() {
            return Err(ToolError::parameter_error(format!(
                "tool '{}' takes {} positional arguments but {} were given",
                inner.name,
                inner.params.len(),
                args.len()
            )));
        }

        let mut params = Map::new();
        for (param, value) in inner.params.iter().zip(args) {
            params.insert(param.name.clone(), value);
        }

        for (key, value) in call_kwargs {
            if self.declares(&key) {
                if params.contains_key(&key) {
                    return Err(ToolError::parameter_error(format!(
                        "tool '{}' got multiple values for argument '{key}'",
                        inner.name
                    )));
                }
                params.insert(key, value);
            } else if inner.accepts_extra_kwargs {
                params.insert(key, value);
            } else {
                tracing::trace!(tool = %inner.name, kwarg = %key, "dropping undeclared keyword argument");
            }
        }

        for (key, arg) in &inner.fixed_kwargs {
            if params.contains_key(key) {
                tracing::warn!(
                    tool = %inner.name,
                    kwarg = %key,
                    "call-site argument overrides fixed keyword argument"
                );
                continue;
            }
            params.insert(key.clone(), arg.evaluate());
        }

        for param in &inner.params {
            if params.contains_key(&param.name) {
                continue;
            }
            match (&param.default, param.required) {
                (Some(default), _) => {
                    params.insert(param.name.clone(), default.clone());
                }
                (None, true) => {
                    return Err(ToolError::MissingArgument {
                        tool: inner.name.clone(),
                        param: param.name.clone(),
                    });
                }
                (None, false) => {}
            }
        }

        let scope = ContextScope::current();
        let context_queue = resolve_context(&inner.name, inner.context_queue.as_ref(), queue, scope.queue)?;
        let context_pool = resolve_context(&inner.name, inner.context_pool.as_ref(), pool, scope.pool)?;

        Ok(ToolInput {
            params,
            context_queue,
            context_pool,
            cancellation,
        })
    }
}

fn resolve_context<T>(
    tool: &str,
    declared: Option<&ContextParam>,
    explicit: Option<T>,
    live: Option<T>,
) -> Result<Option<T>, ToolError> {
    let Some(param) = declared else {
        return Ok(None);
    };
    match (explicit.or(live), param.requirement) {
        (Some(value), _) => Ok(Some(value)),
        (None, Requirement::Optional) => Ok(None),
        (None, Requirement::Required) => Err(ToolError::MissingArgument {
            tool: tool.to_owned(),
            param: param.name.clone(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{ContextItem, ContextQueue};
    use crate::hooks::ToolHook;
    use serde_json::{Value, json};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn echo(registry: &Registry, builder: ToolBuilder) -> Tool {
        builder
            .returning(|input| async move { Ok(Output::Value(Value::Object(input.params().clone()))) })
            .register(registry)
            .expect("tool should register")
    }

    #[tokio::test]
    async fn binds_positional_then_keyword_then_defaults() {
        let registry = Registry::new();
        let tool = echo(
            &registry,
            Tool::builder("echo")
                .param("a")
                .param("b")
                .param_with_default("c", 3),
        );

        let output = tool
            .call(Invocation::new().arg(1).kwarg("b", 2).kwarg("ignored", true))
            .await
            .expect("call should succeed");
        assert_eq!(output, Output::value(json!({"a": 1, "b": 2, "c": 3})));
    }

    #[tokio::test]
    async fn missing_required_argument_is_reported() {
        let registry = Registry::new();
        let tool = echo(&registry, Tool::builder("needs_x").param("x"));

        let err = tool.call(Invocation::new()).await.unwrap_err();
        assert!(matches!(
            err,
            ToolError::MissingArgument { ref tool, ref param } if tool == "needs_x" && param == "x"
        ));
    }

    #[tokio::test]
    async fn positional_and_keyword_for_same_param_rejected() {
        let registry = Registry::new();
        let tool = echo(&registry, Tool::builder("dup").param("x"));

        let err = tool
            .call(Invocation::new().arg(1).kwarg("x", 2))
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::ParameterError(_)));
    }

    #[tokio::test]
    async fn call_site_wins_over_fixed_kwarg() {
        let registry = Registry::new();
        let tool = echo(
            &registry,
            Tool::builder("fixed")
                .param("mode")
                .param("level")
                .fixed_kwarg("mode", "fast")
                .lazy_kwarg("level", || json!(7)),
        );

        let defaulted = tool.call(Invocation::new()).await.expect("call should succeed");
        assert_eq!(defaulted, Output::value(json!({"mode": "fast", "level": 7})));

        let overridden = tool
            .call(Invocation::new().kwarg("mode", "slow"))
            .await
            .expect("call should succeed");
        assert_eq!(overridden, Output::value(json!({"mode": "slow", "level": 7})));
    }

    #[tokio::test]
    async fn extra_kwargs_forwarded_when_accepted() {
        let registry = Registry::new();
        let tool = echo(&registry, Tool::builder("open").accepts_extra_kwargs());

        let output = tool
            .call(Invocation::new().kwarg("anything", 1))
            .await
            .expect("call should succeed");
        assert_eq!(output, Output::value(json!({"anything": 1})));
    }

    #[tokio::test]
    async fn context_injection_honours_requirement() {
        let registry = Registry::new();
        let optional = Tool::builder("peek")
            .context_queue("memory", Requirement::Optional)
            .returning(|input| async move { Ok(Output::value(input.context_queue().is_some())) })
            .register(&registry)
            .expect("tool should register");
        let required = Tool::builder("need")
            .context_queue("memory", Requirement::Required)
            .returning(|input| async move {
                let queue = input.context_queue().cloned();
                if let Some(queue) = queue {
                    queue.append([ContextItem::new("seen")]).await?;
                }
                Ok(Output::value(true))
            })
            .register(&registry)
            .expect("tool should register");

        assert_eq!(
            optional.call(Invocation::new()).await.expect("call should succeed"),
            Output::value(false)
        );
        assert!(matches!(
            required.call(Invocation::new()).await,
            Err(ToolError::MissingArgument { ref param, .. }) if param == "memory"
        ));

        let queue = ContextQueue::new(&registry, 2).expect("valid limit");
        required
            .call(Invocation::new().with_context_queue(queue.clone()))
            .await
            .expect("explicit queue should satisfy requirement");
        assert_eq!(queue.history(None), "seen");
    }

    #[tokio::test]
    async fn wrong_entry_point_rejected() {
        let registry = Registry::new();
        let tool = echo(&registry, Tool::builder("single"));
        let err = tool.stream(Invocation::new()).unwrap_err();
        assert!(matches!(
            err,
            ToolError::WrongShape {
                expected: ToolShape::Yielding,
                actual: ToolShape::Returning,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn error_hook_replaces_after_invoke() {
        let registry = Registry::new();
        let after = Arc::new(AtomicUsize::new(0));
        let errors = Arc::new(AtomicUsize::new(0));

        let tool = Tool::builder("boom")
            .returning(|_| async { Err(ToolError::execution_error("boom")) })
            .register(&registry)
            .expect("tool should register");

        let after_clone = Arc::clone(&after);
        let errors_clone = Arc::clone(&errors);
        tool.add_hook(
            Hook::builder("count_outcomes")
                .on(ToolHook::AfterInvoke)
                .on(ToolHook::OnError)
                .build(move |call| {
                    let after = Arc::clone(&after_clone);
                    let errors = Arc::clone(&errors_clone);
                    async move {
                        match call.event {
                            HookEvent::ToolAfterInvoke { .. } => after.fetch_add(1, Ordering::SeqCst),
                            _ => errors.fetch_add(1, Ordering::SeqCst),
                        };
                        Ok(())
                    }
                })
                .expect("hook should build"),
        );

        let err = tool.call(Invocation::new()).await.unwrap_err();
        assert!(matches!(err, ToolError::ExecutionError(ref msg) if msg == "boom"));
        assert_eq!(after.load(Ordering::SeqCst), 0);
        assert_eq!(errors.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn lock_serializes_one_tool_only() {
        let registry = Registry::new();
        let active = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let active_clone = Arc::clone(&active);
        let peak_clone = Arc::clone(&peak);
        let tool = Tool::builder("exclusive")
            .lock()
            .returning(move |_| {
                let active = Arc::clone(&active_clone);
                let peak = Arc::clone(&peak_clone);
                async move {
                    let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(10)).await;
                    active.fetch_sub(1, Ordering::SeqCst);
                    Ok(Output::value(now))
                }
            })
            .register(&registry)
            .expect("tool should register");

        let calls = (0..4).map(|_| {
            let tool = tool.clone();
            tokio::spawn(async move { tool.call(Invocation::new()).await })
        });
        for handle in futures::future::join_all(calls).await {
            handle.expect("task should join").expect("call should succeed");
        }

        assert_eq!(peak.load(Ordering::SeqCst), 1);
        assert!(tool.metadata().duration().is_some());
    }
}
