//! Bounded sequential context window.

use core::fmt;
use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::error::ContextError;
use super::item::ContextItem;
use crate::error::{ConfigError, Error};
use crate::hooks::{Hook, HookEvent, Tags};
use crate::registry::Registry;

struct QueueInner {
    limit: usize,
    items: Mutex<VecDeque<ContextItem>>,
    tags: RwLock<Tags>,
    hooks: RwLock<Vec<Hook>>,
    registry: Registry,
}

/// A fixed-capacity FIFO window of [`ContextItem`]s.
///
/// Appending to a full queue evicts from the head, so the queue always holds
/// the most recent `limit` items in insertion order. The handle is shared:
/// clones observe and mutate the same window.
///
/// # Example
///
/// ```
/// # tokio_test::block_on(async {
/// use braid_core::{ContextItem, ContextQueue, Registry};
///
/// let registry = Registry::new();
/// let queue = ContextQueue::new(&registry, 2).expect("valid limit");
/// queue
///     .append([ContextItem::new("a"), ContextItem::new("b"), ContextItem::new("c")])
///     .await
///     .expect("append should succeed");
///
/// assert_eq!(queue.history(None), "b\nc");
/// # });
/// ```
#[derive(Clone)]
pub struct ContextQueue {
    inner: Arc<QueueInner>,
}

impl fmt::Debug for ContextQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContextQueue")
            .field("limit", &self.inner.limit)
            .field("len", &self.len())
            .finish()
    }
}

impl ContextQueue {
    /// Creates an empty queue holding at most `limit` items.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidQueueLimit`] if `limit` is zero.
    pub fn new(registry: &Registry, limit: usize) -> Result<Self, ConfigError> {
        if limit < 1 {
            return Err(ConfigError::InvalidQueueLimit(limit));
        }
        Ok(Self {
            inner: Arc::new(QueueInner {
                limit,
                items: Mutex::new(VecDeque::with_capacity(limit)),
                tags: RwLock::new(Tags::new()),
                hooks: RwLock::new(Vec::new()),
                registry: registry.clone(),
            }),
        })
    }

    /// Maximum number of items.
    #[must_use]
    pub fn limit(&self) -> usize {
        self.inner.limit
    }

    /// Number of items held.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.items.lock().len()
    }

    /// Returns `true` if the queue holds nothing.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.items.lock().is_empty()
    }

    /// Snapshot of the items, oldest first.
    #[must_use]
    pub fn items(&self) -> Vec<ContextItem> {
        self.inner.items.lock().iter().cloned().collect()
    }

    /// Returns `true` if an equal item is held.
    #[must_use]
    pub fn contains(&self, item: &ContextItem) -> bool {
        self.inner.items.lock().contains(item)
    }

    /// Item contents joined by newlines, optionally only the last `last`.
    #[must_use]
    pub fn history(&self, last: Option<usize>) -> String {
        let items = self.inner.items.lock();
        let skip = last.map_or(0, |last| items.len().saturating_sub(last));
        items
            .iter()
            .skip(skip)
            .map(ContextItem::render)
            .collect::<Vec<_>>()
            .join("\n")
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

    /// Attaches a hook to this queue.
    pub fn add_hook(&self, hook: Hook) {
        self.inner.hooks.write().push(hook);
    }

    /// Replaces every attached hook.
    pub fn set_hooks(&self, hooks: Vec<Hook>) {
        *self.inner.hooks.write() = hooks;
    }

    /// The attached hooks, in attachment order.
    #[must_use]
    pub fn hooks(&self) -> Vec<Hook> {
        self.inner.hooks.read().clone()
    }

    /// Returns `true` if both handles are the same queue.
    #[must_use]
    pub fn ptr_eq(&self, other: &ContextQueue) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    async fn dispatch(&self, event: HookEvent) -> Result<(), ContextError> {
        let hooks = self.hooks();
        let tags = self.tags();
        self.inner
            .registry
            .hooks()
            .dispatch(&hooks, &tags, event)
            .await?;
        Ok(())
    }

    /// Appends items, evicting from the head when full.
    ///
    /// Fires `BEFORE_APPEND`, then `ON_EVICT` once per evicted item, then
    /// `AFTER_APPEND`.
    ///
    /// # Errors
    ///
    /// Propagates the first hook failure; items appended before it stay.
    pub async fn append(
        &self,
        items: impl IntoIterator<Item = ContextItem>,
    ) -> Result<(), ContextError> {
        let incoming: Vec<ContextItem> = items.into_iter().collect();
        self.dispatch(HookEvent::QueueBeforeAppend {
            queue: self.clone(),
            incoming: incoming.clone(),
            items: self.items(),
        })
        .await?;

        for item in &incoming {
            let evicted = {
                let items = self.inner.items.lock();
                (items.len() >= self.inner.limit)
                    .then(|| items.front().cloned())
                    .flatten()
            };
            if let Some(evicted) = evicted {
                self.dispatch(HookEvent::QueueEvict {
                    queue: self.clone(),
                    item: evicted,
                })
                .await?;
            }

            let mut items = self.inner.items.lock();
            while items.len() >= self.inner.limit {
                items.pop_front();
            }
            items.push_back(item.clone());
        }

        self.dispatch(HookEvent::QueueAfterAppend {
            queue: self.clone(),
            appended: incoming,
            items: self.items(),
        })
        .await
    }

    /// Removes every item.
    ///
    /// # Errors
    ///
    /// Propagates hook failures. A failing `BEFORE_CLEAR` leaves the queue intact.
    pub async fn clear(&self) -> Result<(), ContextError> {
        self.dispatch(HookEvent::QueueBeforeClear {
            queue: self.clone(),
            items: self.items(),
        })
        .await?;
        self.inner.items.lock().clear();
        self.dispatch(HookEvent::QueueAfterClear {
            queue: self.clone(),
        })
        .await
    }

    /// An independent copy with the same limit, items, tags and hooks.
    #[must_use]
    pub fn branch(&self) -> ContextQueue {
        self.copy_into(self.inner.limit)
    }

    /// An independent copy holding at most `limit` items.
    ///
    /// A smaller limit keeps only the most recent items that fit.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidQueueLimit`] if `limit` is zero.
    pub fn branch_with_limit(&self, limit: usize) -> Result<ContextQueue, ConfigError> {
        if limit < 1 {
            return Err(ConfigError::InvalidQueueLimit(limit));
        }
        Ok(self.copy_into(limit))
    }

    fn copy_into(&self, limit: usize) -> ContextQueue {
        let items = self.inner.items.lock();
        let skip = items.len().saturating_sub(limit);
        ContextQueue {
            inner: Arc::new(QueueInner {
                limit,
                items: Mutex::new(items.iter().skip(skip).cloned().collect()),
                tags: RwLock::new(self.tags()),
                hooks: RwLock::new(self.hooks()),
                registry: self.inner.registry.clone(),
            }),
        }
    }

    /// Captures the queue as plain data. Hooks are stored by name.
    #[must_use]
    pub fn export(&self) -> ContextQueueSnapshot {
        ContextQueueSnapshot {
            limit: self.inner.limit,
            items: self.items(),
            tags: self.tags().into_iter().collect(),
            hooks: self
                .hooks()
                .iter()
                .map(|hook| hook.name().to_owned())
                .collect(),
        }
    }

    /// Rebuilds a queue from a snapshot, resolving hooks by name.
    ///
    /// No hooks fire while the items are restored.
    ///
    /// # Errors
    ///
    /// Fails on an invalid limit or an unregistered hook name.
    pub fn import(registry: &Registry, snapshot: ContextQueueSnapshot) -> Result<Self, Error> {
        let queue = ContextQueue::new(registry, snapshot.limit)?;
        queue.set_hooks(registry.hooks().resolve_names(&snapshot.hooks)?);
        *queue.inner.tags.write() = snapshot.tags.into_iter().collect();
        {
            let mut items = queue.inner.items.lock();
            let skip = snapshot.items.len().saturating_sub(snapshot.limit);
            items.extend(snapshot.items.into_iter().skip(skip));
        }
        Ok(queue)
    }

    /// [`export`](Self::export) as a JSON value.
    ///
    /// # Errors
    ///
    /// [`Error::Serialization`] if the snapshot cannot be represented as JSON.
    pub fn to_value(&self) -> Result<Value, Error> {
        Ok(serde_json::to_value(self.export())?)
    }

    /// [`import`](Self::import) from a JSON value.
    ///
    /// # Errors
    ///
    /// [`Error::Serialization`] for a malformed value, otherwise as
    /// [`import`](Self::import).
    pub fn from_value(registry: &Registry, value: Value) -> Result<Self, Error> {
        Self::import(registry, serde_json::from_value(value)?)
    }
}

/// Serializable state of a [`ContextQueue`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextQueueSnapshot {
    /// Maximum number of items.
    pub limit: usize,
    /// Items, oldest first.
    #[serde(default)]
    pub items: Vec<ContextItem>,
    /// Tags.
    #[serde(default)]
    pub tags: Vec<String>,
    /// Attached hook names.
    #[serde(default)]
    pub hooks: Vec<String>,
}
