//! Hook definitions.
//!
//! A [`Hook`] is a named async callback bound to one or more
//! [`HookType`]s. Hooks are built with [`Hook::builder`] and usually
//! registered by name at the same time, so snapshots can refer to them:
//!
//! ```
//! use braid_core::{Hook, HookEvent, Registry};
//! use braid_core::hooks::TurnHook;
//!
//! let registry = Registry::new();
//! let hook = Hook::builder("log_timeouts")
//!     .on(TurnHook::OnTimeout)
//!     .fixed_kwarg("severity", "warn")
//!     .register(&registry, |call| async move {
//!         if let HookEvent::TurnTimeout { turn } = &call.event {
//!             tracing::warn!(turn = turn.id(), severity = ?call.kwargs.get("severity"), "timed out");
//!         }
//!         Ok(())
//!     })
//!     .expect("hook should register");
//!
//! assert!(registry.hooks().get("log_timeouts").expect("registered").ptr_eq(&hook));
//! ```

use core::fmt;
use core::future::Future;
use std::sync::Arc;

use futures::future::BoxFuture;
use indexmap::IndexMap;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

use super::error::HookError;
use super::events::HookEvent;
use super::types::{HookType, Tags};
use crate::context::{ContextPool, ContextQueue, ContextScope, Requirement};
use crate::error::{ConfigError, Error};
use crate::metadata::Timing;
use crate::registry::Registry;
use crate::tool::Arg;

/// Future returned by hook handlers.
pub type HookFuture = BoxFuture<'static, Result<(), HookError>>;

type Handler = dyn Fn(HookCall) -> HookFuture + Send + Sync;

// ─────────────────────────────────────────────────────────────────────────────
// HookCall
// ─────────────────────────────────────────────────────────────────────────────

/// Everything a hook handler receives for one invocation.
#[derive(Debug)]
pub struct HookCall {
    /// The event being dispatched.
    pub event: HookEvent,
    /// Fixed keyword arguments merged with call-site keyword arguments.
    pub kwargs: Map<String, Value>,
    /// The executing agent's context queue, if the hook asked for it.
    pub context_queue: Option<ContextQueue>,
    /// The executing agent's context pool, if the hook asked for it.
    pub context_pool: Option<ContextPool>,
}

impl HookCall {
    /// Deserializes a keyword argument.
    ///
    /// # Errors
    ///
    /// Fails if the argument is missing or has the wrong shape.
    pub fn kwarg<T: DeserializeOwned>(&self, name: &str) -> Result<T, HookError> {
        let value = self
            .kwargs
            .get(name)
            .ok_or_else(|| HookError::msg(format!("missing keyword argument '{name}'")))?;
        serde_json::from_value(value.clone()).map_err(HookError::other)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Hook
// ─────────────────────────────────────────────────────────────────────────────

struct HookInner {
    name: String,
    description: Option<String>,
    types: Vec<HookType>,
    tag_filter: Tags,
    lock: Option<Arc<tokio::sync::Mutex<()>>>,
    fixed_kwargs: IndexMap<String, Arg>,
    context_queue: Option<Requirement>,
    context_pool: Option<Requirement>,
    metadata: parking_lot::Mutex<Timing>,
    handler: Box<Handler>,
}

/// A named lifecycle callback.
///
/// Cloning is cheap and clones compare equal under [`Hook::ptr_eq`], which is
/// the identity dispatch uses to deduplicate global and instance hooks.
#[derive(Clone)]
pub struct Hook {
    inner: Arc<HookInner>,
}

impl fmt::Debug for Hook {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Hook")
            .field("name", &self.inner.name)
            .field("types", &self.inner.types)
            .field("tag_filter", &self.inner.tag_filter)
            .field("locked", &self.inner.lock.is_some())
            .finish_non_exhaustive()
    }
}

impl Hook {
    /// Starts building a hook.
    pub fn builder(name: impl Into<String>) -> HookBuilder {
        HookBuilder::new(name)
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

    /// Event types this hook handles.
    #[must_use]
    pub fn types(&self) -> &[HookType] {
        &self.inner.types
    }

    /// Returns `true` if the hook handles `kind`.
    #[must_use]
    pub fn handles(&self, kind: HookType) -> bool {
        self.inner.types.contains(&kind)
    }

    /// The tag filter. Empty means unconditional.
    #[must_use]
    pub fn tag_filter(&self) -> &Tags {
        &self.inner.tag_filter
    }

    /// Returns `true` if a target carrying `tags` should fire this hook.
    #[must_use]
    pub fn matches_tags(&self, tags: &Tags) -> bool {
        self.inner.tag_filter.is_empty() || !self.inner.tag_filter.is_disjoint(tags)
    }

    /// Returns `true` if invocations of this hook are serialized.
    #[must_use]
    pub fn is_locked(&self) -> bool {
        self.inner.lock.is_some()
    }

    /// Timing of the most recent invocation.
    #[must_use]
    pub fn metadata(&self) -> Timing {
        *self.inner.metadata.lock()
    }

    /// Returns `true` if both handles are the same hook.
    #[must_use]
    pub fn ptr_eq(&self, other: &Hook) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Invokes the hook for `event` with no call-site keyword arguments.
    ///
    /// # Errors
    ///
    /// Returns [`HookError::MissingContext`] if a required container is not
    /// available, or [`HookError::Failed`] wrapping what the handler raised.
    pub async fn invoke(&self, event: HookEvent) -> Result<(), HookError> {
        self.invoke_with(event, Map::new()).await
    }

    /// Invokes the hook with call-site keyword arguments.
    ///
    /// Call-site values override fixed keyword arguments of the same name,
    /// with a warning; so do the engine-supplied event arguments.
    ///
    /// # Errors
    ///
    /// See [`invoke`](Self::invoke).
    pub async fn invoke_with(
        &self,
        event: HookEvent,
        call_kwargs: Map<String, Value>,
    ) -> Result<(), HookError> {
        let inner = &self.inner;
        let shadowed = event.argument_names();

        let mut kwargs = Map::new();
        for (key, arg) in &inner.fixed_kwargs {
            if shadowed.contains(&key.as_str()) || call_kwargs.contains_key(key) {
                tracing::warn!(
                    hook = %inner.name,
                    kwarg = %key,
                    "call-site argument overrides fixed keyword argument"
                );
                continue;
            }
            kwargs.insert(key.clone(), arg.evaluate());
        }
        kwargs.extend(call_kwargs);

        let scope = ContextScope::current();
        let context_queue = inject(inner.context_queue, scope.queue, &inner.name, "context queue")?;
        let context_pool = inject(inner.context_pool, scope.pool, &inner.name, "context pool")?;

        let _guard = match &inner.lock {
            Some(lock) => Some(Arc::clone(lock).lock_owned().await),
            None => None,
        };

        inner.metadata.lock().start();
        let result = (inner.handler)(HookCall {
            event,
            kwargs,
            context_queue,
            context_pool,
        })
        .await;
        inner.metadata.lock().finish();

        result.map_err(|source| HookError::Failed {
            hook: inner.name.clone(),
            source: Box::new(source),
        })
    }
}

fn inject<T>(
    requirement: Option<Requirement>,
    live: Option<T>,
    hook: &str,
    param: &'static str,
) -> Result<Option<T>, HookError> {
    match (requirement, live) {
        (None, _) | (Some(Requirement::Optional), None) => Ok(None),
        (Some(_), Some(value)) => Ok(Some(value)),
        (Some(Requirement::Required), None) => Err(HookError::MissingContext {
            hook: hook.to_owned(),
            param,
        }),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// HookBuilder
// ─────────────────────────────────────────────────────────────────────────────

/// Builder for [`Hook`].
#[derive(Debug)]
pub struct HookBuilder {
    name: String,
    description: Option<String>,
    types: Vec<HookType>,
    tag_filter: Tags,
    lock: bool,
    fixed_kwargs: IndexMap<String, Arg>,
    context_queue: Option<Requirement>,
    context_pool: Option<Requirement>,
}

impl HookBuilder {
    fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: None,
            types: Vec::new(),
            tag_filter: Tags::new(),
            lock: false,
            fixed_kwargs: IndexMap::new(),
            context_queue: None,
            context_pool: None,
        }
    }

    /// Adds an event type.
    #[must_use]
    pub fn on(mut self, kind: impl Into<HookType>) -> Self {
        let kind = kind.into();
        if !self.types.contains(&kind) {
            self.types.push(kind);
        }
        self
    }

    /// Sets the description.
    #[must_use]
    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Restricts the hook to targets carrying `tag` (or any other filter tag).
    #[must_use]
    pub fn tag(mut self, tag: impl Into<String>) -> Self {
        self.tag_filter.insert(tag.into());
        self
    }

    /// Serializes concurrent invocations of this hook.
    #[must_use]
    pub fn lock(mut self) -> Self {
        self.lock = true;
        self
    }

    /// Adds a fixed keyword argument merged into every invocation.
    #[must_use]
    pub fn fixed_kwarg(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fixed_kwargs
            .insert(key.into(), Arg::Value(value.into()));
        self
    }

    /// Adds a fixed keyword argument evaluated at each invocation.
    #[must_use]
    pub fn lazy_kwarg(
        mut self,
        key: impl Into<String>,
        value: impl Fn() -> Value + Send + Sync + 'static,
    ) -> Self {
        self.fixed_kwargs.insert(key.into(), Arg::lazy(value));
        self
    }

    /// Asks for the executing agent's context queue.
    #[must_use]
    pub fn inject_context_queue(mut self, requirement: Requirement) -> Self {
        self.context_queue = Some(requirement);
        self
    }

    /// Asks for the executing agent's context pool.
    #[must_use]
    pub fn inject_context_pool(mut self, requirement: Requirement) -> Self {
        self.context_pool = Some(requirement);
        self
    }

    /// Finishes the hook without registering it.
    ///
    /// # Errors
    ///
    /// Fails if the name is empty or no event type was given.
    pub fn build<F, Fut>(self, handler: F) -> Result<Hook, ConfigError>
    where
        F: Fn(HookCall) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), HookError>> + Send + 'static,
    {
        if self.name.is_empty() {
            return Err(ConfigError::EmptyName { kind: "hook" });
        }
        if self.types.is_empty() {
            return Err(ConfigError::HookWithoutType { hook: self.name });
        }
        Ok(Hook {
            inner: Arc::new(HookInner {
                name: self.name,
                description: self.description,
                types: self.types,
                tag_filter: self.tag_filter,
                lock: self.lock.then(|| Arc::new(tokio::sync::Mutex::new(()))),
                fixed_kwargs: self.fixed_kwargs,
                context_queue: self.context_queue,
                context_pool: self.context_pool,
                metadata: parking_lot::Mutex::new(Timing::default()),
                handler: Box::new(move |call| -> HookFuture { Box::pin(handler(call)) }),
            }),
        })
    }

    /// Finishes the hook and registers it by name.
    ///
    /// # Errors
    ///
    /// Fails like [`build`](Self::build), or with
    /// [`RegistryError::DuplicateHook`](crate::RegistryError::DuplicateHook).
    pub fn register<F, Fut>(self, registry: &Registry, handler: F) -> Result<Hook, Error>
    where
        F: Fn(HookCall) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), HookError>> + Send + 'static,
    {
        let hook = self.build(handler)?;
        registry.hooks().register(&hook)?;
        Ok(hook)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::ContextQueue;
    use crate::hooks::ContextQueueHook;
    use std::sync::Mutex;

    fn queue_event(registry: &Registry) -> HookEvent {
        HookEvent::QueueAfterClear {
            queue: ContextQueue::new(registry, 1).expect("valid limit"),
        }
    }

    #[test]
    fn build_requires_event_type() {
        let err = Hook::builder("idle")
            .build(|_| async { Ok(()) })
            .unwrap_err();
        assert_eq!(err, ConfigError::HookWithoutType { hook: "idle".into() });
    }

    #[test]
    fn empty_tag_filter_matches_everything() {
        let hook = Hook::builder("any")
            .on(ContextQueueHook::AfterClear)
            .build(|_| async { Ok(()) })
            .expect("hook should build");
        assert!(hook.matches_tags(&Tags::new()));

        let filtered = Hook::builder("filtered")
            .on(ContextQueueHook::AfterClear)
            .tag("audit")
            .build(|_| async { Ok(()) })
            .expect("hook should build");
        assert!(!filtered.matches_tags(&Tags::new()));
        assert!(filtered.matches_tags(&Tags::from_iter(["audit".to_string()])));
    }

    #[tokio::test]
    async fn call_site_kwargs_override_fixed() {
        let registry = Registry::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_clone = Arc::clone(&seen);
        let hook = Hook::builder("kw")
            .on(ContextQueueHook::AfterClear)
            .fixed_kwarg("mode", "fixed")
            .fixed_kwarg("queue", "shadowed by the event")
            .lazy_kwarg("computed", || Value::from(7))
            .build(move |call| {
                let seen = Arc::clone(&seen_clone);
                async move {
                    seen.lock().expect("poisoned").push(call.kwargs);
                    Ok(())
                }
            })
            .expect("hook should build");

        let mut call_site = Map::new();
        call_site.insert("mode".into(), Value::from("call"));
        hook.invoke_with(queue_event(&registry), call_site)
            .await
            .expect("hook should run");

        let seen = seen.lock().expect("poisoned");
        assert_eq!(seen[0].get("mode"), Some(&Value::from("call")));
        assert_eq!(seen[0].get("computed"), Some(&Value::from(7)));
        assert!(!seen[0].contains_key("queue"));
    }

    #[tokio::test]
    async fn handler_failure_names_the_hook() {
        let registry = Registry::new();
        let hook = Hook::builder("boom")
            .on(ContextQueueHook::AfterClear)
            .build(|_| async { Err(HookError::msg("exploded")) })
            .expect("hook should build");

        let err = hook.invoke(queue_event(&registry)).await.unwrap_err();
        assert_eq!(err.hook_name(), Some("boom"));
        assert_eq!(err.to_string(), "hook 'boom' failed: exploded");
        assert!(hook.metadata().end_time.is_some());
    }

    #[tokio::test]
    async fn required_context_outside_a_turn_fails() {
        let registry = Registry::new();
        let hook = Hook::builder("needs_queue")
            .on(ContextQueueHook::AfterClear)
            .inject_context_queue(Requirement::Required)
            .build(|_| async { Ok(()) })
            .expect("hook should build");

        let err = hook.invoke(queue_event(&registry)).await.unwrap_err();
        assert!(matches!(err, HookError::MissingContext { ref hook, .. } if hook == "needs_queue"));
    }

    #[tokio::test]
    async fn optional_context_outside_a_turn_is_none() {
        let registry = Registry::new();
        let got = Arc::new(Mutex::new(None));
        let got_clone = Arc::clone(&got);
        let hook = Hook::builder("maybe_pool")
            .on(ContextQueueHook::AfterClear)
            .inject_context_pool(Requirement::Optional)
            .build(move |call| {
                let got = Arc::clone(&got_clone);
                async move {
                    *got.lock().expect("poisoned") = Some(call.context_pool.is_none());
                    Ok(())
                }
            })
            .expect("hook should build");

        hook.invoke(queue_event(&registry))
            .await
            .expect("hook should run");
        assert_eq!(*got.lock().expect("poisoned"), Some(true));
    }
}
