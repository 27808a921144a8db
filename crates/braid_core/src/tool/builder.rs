use core::fmt;
use core::future::Future;
use std::sync::Arc;

use futures::{FutureExt, Stream, StreamExt};
use hashbrown::HashSet;
use indexmap::IndexMap;
use parking_lot::{Mutex, RwLock};
use serde_json::Value;

use super::definition::{Body, ContextParam, Tool, ToolInner};
use super::error::ToolError;
use super::param::{Arg, ToolInput, ToolParam};
use crate::context::Requirement;
use crate::error::{ConfigError, Error};
use crate::hooks::{Hook, Tags};
use crate::metadata::Timing;
use crate::output::Output;
use crate::registry::Registry;

/// Builder for [`Tool`].
///
/// Declare parameters in positional order, pick a body with
/// [`returning`](Self::returning) or [`yielding`](Self::yielding), then
/// [`register`](Self::register).
pub struct ToolBuilder {
    name: String,
    description: Option<String>,
    params: Vec<ToolParam>,
    accepts_extra_kwargs: bool,
    context_queue: Option<ContextParam>,
    context_pool: Option<ContextParam>,
    lock: bool,
    tags: Tags,
    fixed_kwargs: IndexMap<String, Arg>,
    hooks: Vec<Hook>,
    body: Option<Body>,
}

impl fmt::Debug for ToolBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ToolBuilder")
            .field("name", &self.name)
            .field("params", &self.params)
            .field("lock", &self.lock)
            .field("has_body", &self.body.is_some())
            .finish_non_exhaustive()
    }
}

impl ToolBuilder {
    pub(crate) fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: None,
            params: Vec::new(),
            accepts_extra_kwargs: false,
            context_queue: None,
            context_pool: None,
            lock: false,
            tags: Tags::new(),
            fixed_kwargs: IndexMap::new(),
            hooks: Vec::new(),
            body: None,
        }
    }

    /// Sets the description.
    #[must_use]
    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Declares a required parameter.
    #[must_use]
    pub fn param(mut self, name: impl Into<String>) -> Self {
        self.params.push(ToolParam::required(name));
        self
    }

    /// Declares an optional parameter, absent when not supplied.
    #[must_use]
    pub fn optional_param(mut self, name: impl Into<String>) -> Self {
        self.params.push(ToolParam::optional(name));
        self
    }

    /// Declares a parameter with a default value.
    #[must_use]
    pub fn param_with_default(mut self, name: impl Into<String>, default: impl Into<Value>) -> Self {
        self.params.push(ToolParam::with_default(name, default));
        self
    }

    /// Declares a parameter that receives the running agent's context queue.
    #[must_use]
    pub fn context_queue(mut self, name: impl Into<String>, requirement: Requirement) -> Self {
        self.context_queue = Some(ContextParam {
            name: name.into(),
            requirement,
        });
        self
    }

    /// Declares a parameter that receives the running agent's context pool.
    #[must_use]
    pub fn context_pool(mut self, name: impl Into<String>, requirement: Requirement) -> Self {
        self.context_pool = Some(ContextParam {
            name: name.into(),
            requirement,
        });
        self
    }

    /// Forwards undeclared keyword arguments to the body instead of dropping them.
    #[must_use]
    pub fn accepts_extra_kwargs(mut self) -> Self {
        self.accepts_extra_kwargs = true;
        self
    }

    /// Serializes concurrent invocations of this tool.
    #[must_use]
    pub fn lock(mut self) -> Self {
        self.lock = true;
        self
    }

    /// Adds a tag.
    #[must_use]
    pub fn tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.insert(tag.into());
        self
    }

    /// Adds a fixed keyword argument merged into every call.
    #[must_use]
    pub fn fixed_kwarg(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fixed_kwargs
            .insert(key.into(), Arg::Value(value.into()));
        self
    }

    /// Adds a fixed keyword argument evaluated at each call.
    #[must_use]
    pub fn lazy_kwarg(
        mut self,
        key: impl Into<String>,
        value: impl Fn() -> Value + Send + Sync + 'static,
    ) -> Self {
        self.fixed_kwargs.insert(key.into(), Arg::lazy(value));
        self
    }

    /// Attaches an instance hook.
    #[must_use]
    pub fn hook(mut self, hook: Hook) -> Self {
        self.hooks.push(hook);
        self
    }

    /// Uses an async body producing one output.
    #[must_use]
    pub fn returning<F, Fut>(mut self, body: F) -> Self
    where
        F: Fn(ToolInput) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Output, ToolError>> + Send + 'static,
    {
        self.body = Some(Body::Returning(Box::new(move |input| body(input).boxed())));
        self
    }

    /// Uses an async body producing a stream of outputs.
    #[must_use]
    pub fn yielding<F, S>(mut self, body: F) -> Self
    where
        F: Fn(ToolInput) -> S + Send + Sync + 'static,
        S: Stream<Item = Result<Output, ToolError>> + Send + 'static,
    {
        self.body = Some(Body::Yielding(Box::new(move |input| body(input).boxed())));
        self
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.name.is_empty() {
            return Err(ConfigError::EmptyName { kind: "tool" });
        }
        if self.body.is_none() {
            return Err(ConfigError::MissingBody {
                tool: self.name.clone(),
            });
        }

        let mut seen = HashSet::new();
        let context_names = [&self.context_queue, &self.context_pool]
            .into_iter()
            .flatten()
            .map(|param| param.name.as_str());
        for name in self.params.iter().map(|p| p.name.as_str()).chain(context_names) {
            if !seen.insert(name) {
                return Err(ConfigError::DuplicateParam {
                    tool: self.name.clone(),
                    param: name.to_owned(),
                });
            }
        }

        if !self.accepts_extra_kwargs {
            let declared: HashSet<&str> = self.params.iter().map(|p| p.name.as_str()).collect();
            if let Some(key) = self
                .fixed_kwargs
                .keys()
                .find(|key| !declared.contains(key.as_str()))
            {
                return Err(ConfigError::UnknownFixedKwarg {
                    owner: format!("tool '{}'", self.name),
                    kwarg: key.clone(),
                });
            }
        }
        Ok(())
    }

    /// Finishes the tool and registers it by name.
    ///
    /// # Errors
    ///
    /// A [`ConfigError`] if the definition is invalid (empty name, no body,
    /// duplicate parameter, fixed keyword argument without a matching
    /// parameter), or [`RegistryError::DuplicateTool`](crate::RegistryError::DuplicateTool).
    pub fn register(self, registry: &Registry) -> Result<Tool, Error> {
        self.validate()?;
        let Some(body) = self.body else {
            return Err(ConfigError::MissingBody { tool: self.name }.into());
        };

        let tool = Tool {
            inner: Arc::new(ToolInner {
                name: self.name,
                description: self.description,
                params: self.params,
                accepts_extra_kwargs: self.accepts_extra_kwargs,
                context_queue: self.context_queue,
                context_pool: self.context_pool,
                lock: self.lock.then(|| Arc::new(tokio::sync::Mutex::new(()))),
                fixed_kwargs: self.fixed_kwargs,
                tags: RwLock::new(self.tags),
                hooks: RwLock::new(self.hooks),
                metadata: Mutex::new(Timing::default()),
                body,
                registry: registry.clone(),
            }),
        };
        registry.tools().register(tool.clone())?;
        tracing::debug!(tool = %tool.name(), shape = %tool.shape(), "registered tool");
        Ok(tool)
    }
}
