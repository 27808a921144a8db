//! Bounded keyed context store.

use core::fmt;
use std::sync::Arc;

use indexmap::IndexMap;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::error::ContextError;
use super::item::ContextItem;
use crate::error::{ConfigError, Error};
use crate::hooks::{Hook, HookEvent, Tags};
use crate::registry::Registry;

struct PoolInner {
    limit: Option<usize>,
    items: Mutex<IndexMap<String, ContextItem>>,
    tags: RwLock<Tags>,
    hooks: RwLock<Vec<Hook>>,
    registry: Registry,
}

/// An `id → item` store that remembers insertion order.
///
/// With a limit set, adding a new id to a full pool evicts the oldest-inserted
/// item. Adding an id that is already present replaces the item in place and
/// never evicts.
///
/// # Example
///
/// ```
/// # tokio_test::block_on(async {
/// use braid_core::{ContextItem, ContextPool, Registry};
///
/// let registry = Registry::new();
/// let pool = ContextPool::new(&registry, Some(2)).expect("valid limit");
/// pool.add(ContextItem::keyed("a", "first", 1)).await.expect("add");
/// pool.add(ContextItem::keyed("b", "second", 2)).await.expect("add");
/// pool.add(ContextItem::keyed("c", "third", 3)).await.expect("add");
///
/// assert_eq!(pool.catalogue(), "- [b] second\n- [c] third");
/// # });
/// ```
#[derive(Clone)]
pub struct ContextPool {
    inner: Arc<PoolInner>,
}

impl fmt::Debug for ContextPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContextPool")
            .field("limit", &self.inner.limit)
            .field("len", &self.len())
            .finish()
    }
}

fn validate_limit(limit: Option<usize>) -> Result<(), ConfigError> {
    match limit {
        Some(0) => Err(ConfigError::InvalidPoolLimit(0)),
        _ => Ok(()),
    }
}

fn key_of(item: &ContextItem) -> Result<String, ConfigError> {
    let id = item.id.clone().ok_or(ConfigError::MissingItemId)?;
    if item.description.is_none() {
        return Err(ConfigError::MissingItemDescription { id });
    }
    Ok(id)
}

impl ContextPool {
    /// Creates an empty pool. `None` means unbounded.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidPoolLimit`] for `Some(0)`.
    pub fn new(registry: &Registry, limit: Option<usize>) -> Result<Self, ConfigError> {
        validate_limit(limit)?;
        Ok(Self::from_parts(registry.clone(), limit, IndexMap::new(), Tags::new(), Vec::new()))
    }

    fn from_parts(
        registry: Registry,
        limit: Option<usize>,
        items: IndexMap<String, ContextItem>,
        tags: Tags,
        hooks: Vec<Hook>,
    ) -> Self {
        Self {
            inner: Arc::new(PoolInner {
                limit,
                items: Mutex::new(items),
                tags: RwLock::new(tags),
                hooks: RwLock::new(hooks),
                registry,
            }),
        }
    }

    /// Maximum number of items, if bounded.
    #[must_use]
    pub fn limit(&self) -> Option<usize> {
        self.inner.limit
    }

    /// Number of items held.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.items.lock().len()
    }

    /// Returns `true` if the pool holds nothing.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.items.lock().is_empty()
    }

    /// Snapshot of the items in insertion order.
    #[must_use]
    pub fn items(&self) -> Vec<ContextItem> {
        self.inner.items.lock().values().cloned().collect()
    }

    /// Ids in insertion order.
    #[must_use]
    pub fn ids(&self) -> Vec<String> {
        self.inner.items.lock().keys().cloned().collect()
    }

    /// Returns `true` if an item with this id is held.
    #[must_use]
    pub fn contains_key(&self, id: &str) -> bool {
        self.inner.items.lock().contains_key(id)
    }

    /// Returns the item stored under `id`.
    ///
    /// # Errors
    ///
    /// Returns [`ContextError::NotFound`] if there is none.
    pub fn get(&self, id: &str) -> Result<ContextItem, ContextError> {
        self.inner
            .items
            .lock()
            .get(id)
            .cloned()
            .ok_or_else(|| ContextError::NotFound(id.to_owned()))
    }

    /// One `- [id] description` line per item, content omitted.
    #[must_use]
    pub fn catalogue(&self) -> String {
        self.inner
            .items
            .lock()
            .iter()
            .map(|(id, item)| {
                format!("- [{id}] {}", item.description.as_deref().unwrap_or_default())
            })
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

    /// Attaches a hook to this pool.
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

    /// Returns `true` if both handles are the same pool.
    #[must_use]
    pub fn ptr_eq(&self, other: &ContextPool) -> bool {
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

    /// Adds or replaces an item.
    ///
    /// A new id on a full pool first evicts the oldest item (`ON_EVICT`).
    /// Then `BEFORE_ADD`, the insertion, and `AFTER_ADD`.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] if the item lacks an id or description, or
    /// the first hook failure.
    pub async fn add(&self, item: ContextItem) -> Result<(), ContextError> {
        let id = key_of(&item)?;

        let oldest = match self.inner.limit {
            Some(limit) => {
                let items = self.inner.items.lock();
                if !items.contains_key(&id) && items.len() >= limit {
                    items.first().map(|(key, item)| (key.clone(), item.clone()))
                } else {
                    None
                }
            }
            None => None,
        };
        if let Some((oldest_id, oldest_item)) = oldest {
            self.dispatch(HookEvent::PoolEvict {
                pool: self.clone(),
                item: oldest_item,
            })
            .await?;
            self.inner.items.lock().shift_remove(&oldest_id);
            tracing::trace!(id = %oldest_id, "context pool evicted oldest item");
        }

        self.dispatch(HookEvent::PoolBeforeAdd {
            pool: self.clone(),
            item: item.clone(),
        })
        .await?;
        self.inner.items.lock().insert(id, item.clone());
        self.dispatch(HookEvent::PoolAfterAdd {
            pool: self.clone(),
            item,
        })
        .await
    }

    /// Removes and returns the item stored under `id`.
    ///
    /// # Errors
    ///
    /// Returns [`ContextError::NotFound`] before any hook fires if the id is
    /// absent, otherwise the first hook failure.
    pub async fn remove(&self, id: &str) -> Result<ContextItem, ContextError> {
        let item = self.get(id)?;
        self.dispatch(HookEvent::PoolBeforeRemove {
            pool: self.clone(),
            item: item.clone(),
        })
        .await?;
        self.inner.items.lock().shift_remove(id);
        self.dispatch(HookEvent::PoolAfterRemove {
            pool: self.clone(),
            item: item.clone(),
        })
        .await?;
        Ok(item)
    }

    /// Removes every item.
    ///
    /// # Errors
    ///
    /// Propagates hook failures.
    pub async fn clear(&self) -> Result<(), ContextError> {
        self.dispatch(HookEvent::PoolBeforeClear {
            pool: self.clone(),
            items: self.items(),
        })
        .await?;
        self.inner.items.lock().clear();
        self.dispatch(HookEvent::PoolAfterClear { pool: self.clone() })
            .await
    }

    /// An independent copy with the same limit, items, tags and hooks.
    ///
    /// No hooks fire during the copy.
    #[must_use]
    pub fn branch(&self) -> ContextPool {
        self.copy_into(self.inner.limit)
    }

    /// An independent copy with a different limit.
    ///
    /// Items are replayed in insertion order, evicting the oldest when the
    /// new limit is smaller. No hooks fire during the copy.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidPoolLimit`] for `Some(0)`.
    pub fn branch_with_limit(&self, limit: Option<usize>) -> Result<ContextPool, ConfigError> {
        validate_limit(limit)?;
        Ok(self.copy_into(limit))
    }

    fn copy_into(&self, limit: Option<usize>) -> ContextPool {
        let source = self.inner.items.lock();
        let mut items = IndexMap::with_capacity(source.len());
        for (id, item) in source.iter() {
            if let Some(limit) = limit
                && !items.contains_key(id)
                && items.len() >= limit
            {
                items.shift_remove_index(0);
            }
            items.insert(id.clone(), item.clone());
        }
        drop(source);
        ContextPool::from_parts(
            self.inner.registry.clone(),
            limit,
            items,
            self.tags(),
            self.hooks(),
        )
    }

    /// Captures the pool as plain data. Hooks are stored by name.
    #[must_use]
    pub fn export(&self) -> ContextPoolSnapshot {
        ContextPoolSnapshot {
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

    /// Rebuilds a pool from a snapshot, resolving hooks by name.
    ///
    /// No hooks fire while the items are restored.
    ///
    /// # Errors
    ///
    /// Fails on an invalid limit, an item without id or description, or an
    /// unregistered hook name.
    pub fn import(registry: &Registry, snapshot: ContextPoolSnapshot) -> Result<Self, Error> {
        validate_limit(snapshot.limit)?;
        let hooks = registry.hooks().resolve_names(&snapshot.hooks)?;
        let mut items = IndexMap::with_capacity(snapshot.items.len());
        for item in snapshot.items {
            items.insert(key_of(&item)?, item);
        }
        let staged = ContextPool::from_parts(
            registry.clone(),
            snapshot.limit,
            items,
            snapshot.tags.into_iter().collect(),
            hooks,
        );
        Ok(staged.copy_into(snapshot.limit))
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

/// Serializable state of a [`ContextPool`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextPoolSnapshot {
    /// Maximum number of items, if bounded.
    #[serde(default)]
    pub limit: Option<usize>,
    /// Items in insertion order.
    #[serde(default)]
    pub items: Vec<ContextItem>,
    /// Tags.
    #[serde(default)]
    pub tags: Vec<String>,
    /// Attached hook names.
    #[serde(default)]
    pub hooks: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hooks::ContextPoolHook;
    use std::sync::Mutex as StdMutex;

    fn keyed(id: &str) -> ContextItem {
        ContextItem::keyed(id, format!("item {id}"), id)
    }

    fn event_log(pool: &ContextPool) -> Arc<StdMutex<Vec<String>>> {
        let log = Arc::new(StdMutex::new(Vec::new()));
        let log_clone = Arc::clone(&log);
        let mut builder = Hook::builder("pool_log");
        for kind in ContextPoolHook::ALL {
            builder = builder.on(*kind);
        }
        pool.add_hook(
            builder
                .build(move |call| {
                    let log = Arc::clone(&log_clone);
                    async move {
                        let label = match &call.event {
                            HookEvent::PoolEvict { item, .. } => {
                                format!("evict {}", item.id.clone().unwrap_or_default())
                            }
                            other => other.hook_type().to_string(),
                        };
                        log.lock().expect("poisoned").push(label);
                        Ok(())
                    }
                })
                .expect("hook should build"),
        );
        log
    }

    #[tokio::test]
    async fn overflow_evicts_oldest_once() {
        let registry = Registry::new();
        let pool = ContextPool::new(&registry, Some(2)).expect("valid limit");
        pool.add(keyed("a")).await.expect("add should succeed");
        pool.add(keyed("b")).await.expect("add should succeed");
        let log = event_log(&pool);

        pool.add(keyed("c")).await.expect("add should succeed");

        assert_eq!(pool.ids(), vec!["b", "c"]);
        assert_eq!(
            *log.lock().expect("poisoned"),
            vec![
                "evict a",
                "context_pool.before_add",
                "context_pool.after_add"
            ]
        );
    }

    #[tokio::test]
    async fn replacing_existing_id_never_evicts() {
        let registry = Registry::new();
        let pool = ContextPool::new(&registry, Some(2)).expect("valid limit");
        pool.add(keyed("a")).await.expect("add should succeed");
        pool.add(keyed("b")).await.expect("add should succeed");
        let log = event_log(&pool);

        let replacement = ContextItem::keyed("a", "updated", 42);
        pool.add(replacement.clone()).await.expect("add should succeed");

        assert_eq!(pool.len(), 2);
        assert_eq!(pool.ids(), vec!["a", "b"]);
        assert_eq!(pool.get("a").expect("present"), replacement);
        assert!(!log.lock().expect("poisoned").iter().any(|e| e.starts_with("evict")));
    }

    #[tokio::test]
    async fn add_requires_id_and_description() {
        let registry = Registry::new();
        let pool = ContextPool::new(&registry, None).expect("valid limit");

        let err = pool.add(ContextItem::new(1)).await.unwrap_err();
        assert!(matches!(err, ContextError::Config(ConfigError::MissingItemId)));

        let err = pool
            .add(ContextItem::new(1).with_id("x"))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ContextError::Config(ConfigError::MissingItemDescription { ref id }) if id == "x"
        ));
        assert!(pool.is_empty());
    }

    #[tokio::test]
    async fn missing_id_is_not_found() {
        let registry = Registry::new();
        let pool = ContextPool::new(&registry, None).expect("valid limit");
        let log = event_log(&pool);

        assert!(matches!(pool.get("nope"), Err(ContextError::NotFound(ref id)) if id == "nope"));
        assert!(matches!(
            pool.remove("nope").await,
            Err(ContextError::NotFound(_))
        ));
        assert!(log.lock().expect("poisoned").is_empty());
    }

    #[tokio::test]
    async fn remove_and_clear_fire_symmetric_hooks() {
        let registry = Registry::new();
        let pool = ContextPool::new(&registry, None).expect("valid limit");
        pool.add(keyed("a")).await.expect("add should succeed");
        pool.add(keyed("b")).await.expect("add should succeed");
        let log = event_log(&pool);

        let removed = pool.remove("a").await.expect("remove should succeed");
        assert_eq!(removed, keyed("a"));
        pool.clear().await.expect("clear should succeed");

        assert!(pool.is_empty());
        assert_eq!(
            *log.lock().expect("poisoned"),
            vec![
                "context_pool.before_remove",
                "context_pool.after_remove",
                "context_pool.before_clear",
                "context_pool.after_clear"
            ]
        );
    }

    #[tokio::test]
    async fn branch_copies_without_hooks_firing() {
        let registry = Registry::new();
        let pool = ContextPool::new(&registry, Some(3)).expect("valid limit");
        for id in ["a", "b", "c"] {
            pool.add(keyed(id)).await.expect("add should succeed");
        }
        let log = event_log(&pool);

        let child = pool.branch_with_limit(Some(2)).expect("valid limit");
        assert_eq!(child.ids(), vec!["b", "c"]);
        assert_eq!(child.hooks().len(), 1);
        assert!(log.lock().expect("poisoned").is_empty());

        child.remove("b").await.expect("remove should succeed");
        assert_eq!(pool.len(), 3);
    }

    #[test]
    fn catalogue_of_empty_pool_is_empty() {
        let registry = Registry::new();
        let pool = ContextPool::new(&registry, None).expect("valid limit");
        assert_eq!(pool.catalogue(), "");
    }
}
