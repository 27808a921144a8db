//! Arguments, declared parameters and the input handed to tool bodies.
//!
//! - [`Arg`] is an argument value, either JSON or a closure evaluated late
//! - [`ToolParam`] describes one declared value parameter
//! - [`Invocation`] is what a caller passes to [`Tool::call`](super::Tool::call)
//! - [`ToolInput`] is what the body receives after binding

use core::fmt;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio_util::sync::CancellationToken;

use super::error::ToolError;
use crate::context::{ContextPool, ContextQueue};

// ─────────────────────────────────────────────────────────────────────
// Arg
// ─────────────────────────────────────────────────────────────────────

/// An argument bound ahead of time.
///
/// `Lazy` arguments are zero-argument closures evaluated each time the
/// argument is used, so a turn can be declared now and pick up state later.
#[derive(Clone)]
pub enum Arg {
    /// A plain value.
    Value(Value),
    /// A closure evaluated at execution time.
    Lazy(Arc<dyn Fn() -> Value + Send + Sync>),
}

impl Arg {
    /// Wraps a closure evaluated at execution time.
    pub fn lazy(f: impl Fn() -> Value + Send + Sync + 'static) -> Self {
        Self::Lazy(Arc::new(f))
    }

    /// The current value.
    #[must_use]
    pub fn evaluate(&self) -> Value {
        match self {
            Arg::Value(value) => value.clone(),
            Arg::Lazy(f) => f(),
        }
    }

    /// Returns `true` for [`Arg::Lazy`].
    #[must_use]
    pub fn is_lazy(&self) -> bool {
        matches!(self, Arg::Lazy(_))
    }
}

impl fmt::Debug for Arg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Arg::Value(value) => f.debug_tuple("Value").field(value).finish(),
            Arg::Lazy(_) => f.write_str("Lazy(..)"),
        }
    }
}

impl From<Value> for Arg {
    fn from(value: Value) -> Self {
        Arg::Value(value)
    }
}

// ─────────────────────────────────────────────────────────────────────
// ToolShape / ToolParam
// ─────────────────────────────────────────────────────────────────────

/// Whether a tool produces one result or a stream of results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolShape {
    /// One result per invocation.
    Returning,
    /// A finite ordered sequence of results.
    Yielding,
}

impl fmt::Display for ToolShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ToolShape::Returning => "returning",
            ToolShape::Yielding => "yielding",
        })
    }
}

/// A declared value parameter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolParam {
    /// Parameter name.
    pub name: String,
    /// Whether binding fails without a value.
    pub required: bool,
    /// Value used when none is supplied.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
}

impl ToolParam {
    /// A required parameter.
    pub fn required(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            required: true,
            default: None,
        }
    }

    /// An optional parameter, absent when not supplied.
    pub fn optional(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            required: false,
            default: None,
        }
    }

    /// An optional parameter with a default value.
    pub fn with_default(name: impl Into<String>, default: impl Into<Value>) -> Self {
        Self {
            name: name.into(),
            required: false,
            default: Some(default.into()),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────
// Invocation
// ─────────────────────────────────────────────────────────────────────

/// Call-site arguments for one tool invocation.
///
/// ```
/// use braid_core::tool::Invocation;
/// use serde_json::json;
///
/// let invocation = Invocation::new().arg(json!(5)).kwarg("unit", "cm");
/// assert_eq!(invocation.args().len(), 1);
/// ```
#[derive(Debug, Clone, Default)]
pub struct Invocation {
    args: Vec<Value>,
    kwargs: Map<String, Value>,
    context_queue: Option<ContextQueue>,
    context_pool: Option<ContextPool>,
    cancellation: Option<CancellationToken>,
}

impl Invocation {
    /// An invocation without arguments.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a positional argument.
    #[must_use]
    pub fn arg(mut self, value: impl Into<Value>) -> Self {
        self.args.push(value.into());
        self
    }

    /// Sets a keyword argument.
    #[must_use]
    pub fn kwarg(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.kwargs.insert(key.into(), value.into());
        self
    }

    /// Replaces every positional argument.
    #[must_use]
    pub fn with_args(mut self, args: Vec<Value>) -> Self {
        self.args = args;
        self
    }

    /// Replaces every keyword argument.
    #[must_use]
    pub fn with_kwargs(mut self, kwargs: Map<String, Value>) -> Self {
        self.kwargs = kwargs;
        self
    }

    /// Supplies the context queue explicitly; wins over injection.
    #[must_use]
    pub fn with_context_queue(mut self, queue: ContextQueue) -> Self {
        self.context_queue = Some(queue);
        self
    }

    /// Supplies the context pool explicitly; wins over injection.
    #[must_use]
    pub fn with_context_pool(mut self, pool: ContextPool) -> Self {
        self.context_pool = Some(pool);
        self
    }

    /// Token the body should observe for cancellation.
    #[must_use]
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = Some(token);
        self
    }

    /// Positional arguments.
    #[must_use]
    pub fn args(&self) -> &[Value] {
        &self.args
    }

    /// Keyword arguments.
    #[must_use]
    pub fn kwargs(&self) -> &Map<String, Value> {
        &self.kwargs
    }

    pub(crate) fn into_parts(
        self,
    ) -> (
        Vec<Value>,
        Map<String, Value>,
        Option<ContextQueue>,
        Option<ContextPool>,
        CancellationToken,
    ) {
        (
            self.args,
            self.kwargs,
            self.context_queue,
            self.context_pool,
            self.cancellation.unwrap_or_default(),
        )
    }
}

// ─────────────────────────────────────────────────────────────────────
// ToolInput
// ─────────────────────────────────────────────────────────────────────

/// Bound arguments received by a tool body.
#[derive(Debug, Clone)]
pub struct ToolInput {
    pub(crate) params: Map<String, Value>,
    pub(crate) context_queue: Option<ContextQueue>,
    pub(crate) context_pool: Option<ContextPool>,
    pub(crate) cancellation: CancellationToken,
}

impl ToolInput {
    /// Every bound value parameter, including defaults and extra kwargs.
    #[must_use]
    pub fn params(&self) -> &Map<String, Value> {
        &self.params
    }

    /// Deserializes a required parameter by name.
    ///
    /// # Errors
    ///
    /// Returns [`ToolError::ParameterError`] if it is missing or has the
    /// wrong shape.
    pub fn get_param<T: DeserializeOwned>(&self, name: &str) -> Result<T, ToolError> {
        let value = self
            .params
            .get(name)
            .ok_or_else(|| ToolError::parameter_error(format!("Missing parameter: {name}")))?;

        serde_json::from_value(value.clone()).map_err(|err| {
            ToolError::parameter_error(format!("Failed to deserialize parameter '{name}': {err}"))
        })
    }

    /// Deserializes an optional parameter. `None` if missing or null.
    ///
    /// # Errors
    ///
    /// Returns [`ToolError::ParameterError`] if present with the wrong shape.
    pub fn get_optional_param<T: DeserializeOwned>(
        &self,
        name: &str,
    ) -> Result<Option<T>, ToolError> {
        match self.params.get(name) {
            None => Ok(None),
            Some(value) if value.is_null() => Ok(None),
            Some(value) => serde_json::from_value(value.clone())
                .map(Some)
                .map_err(|err| {
                    ToolError::parameter_error(format!(
                        "Failed to deserialize parameter '{name}': {err}"
                    ))
                }),
        }
    }

    /// The injected or explicitly supplied context queue.
    #[must_use]
    pub fn context_queue(&self) -> Option<&ContextQueue> {
        self.context_queue.as_ref()
    }

    /// The injected or explicitly supplied context pool.
    #[must_use]
    pub fn context_pool(&self) -> Option<&ContextPool> {
        self.context_pool.as_ref()
    }

    /// Cancelled when the enclosing turn times out.
    #[must_use]
    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancellation
    }
}
