//! Hook registration and dispatch.
//!
//! The [`HookRegistry`] has two surfaces:
//!
//! - **Named** ([`register`](HookRegistry::register)): every hook that should
//!   survive a snapshot round trip is registered by name. Snapshots store hook
//!   names and import resolves them here.
//! - **Global** ([`register_global`](HookRegistry::register_global)): the hook
//!   fires for every target that raises one of its event types, in addition
//!   to the hooks attached to that target.
//!
//! # Dispatch Order
//!
//! For one event, the hooks attached to the target run first in attachment
//! order, followed by the global hooks for that event type in registration
//! order. A hook present in both lists runs once, in its instance position.
//! Hooks whose tag filter does not intersect the target's tags are skipped.
//! Hooks run one after another; the first failure stops the dispatch.

use core::fmt;

use hashbrown::HashMap;
use indexmap::IndexMap;
use parking_lot::RwLock;

use super::error::HookError;
use super::events::HookEvent;
use super::hook::Hook;
use super::types::{HookType, Tags};
use crate::registry::RegistryError;

/// Named and global hook tables.
#[derive(Default)]
pub struct HookRegistry {
    /// Every registered hook by name.
    named: RwLock<IndexMap<String, Hook>>,
    /// Maps an event type to the global hooks that handle it.
    global: RwLock<HashMap<HookType, Vec<Hook>>>,
}

impl fmt::Debug for HookRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HookRegistry")
            .field("hooks", &self.names())
            .finish_non_exhaustive()
    }
}

impl HookRegistry {
    /// Creates an empty hook registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a hook under its name.
    ///
    /// Registering the same hook again is a no-op.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::DuplicateHook`] if a different hook already
    /// uses the name.
    pub fn register(&self, hook: &Hook) -> Result<&Self, RegistryError> {
        let mut named = self.named.write();
        match named.get(hook.name()) {
            Some(existing) if existing.ptr_eq(hook) => {}
            Some(_) => return Err(RegistryError::DuplicateHook(hook.name().to_owned())),
            None => {
                tracing::debug!(hook = hook.name(), types = ?hook.types(), "hook registered");
                named.insert(hook.name().to_owned(), hook.clone());
            }
        }
        Ok(self)
    }

    /// Registers a hook by name and makes it fire for every target raising
    /// one of its event types.
    ///
    /// # Errors
    ///
    /// See [`register`](Self::register).
    pub fn register_global(&self, hook: &Hook) -> Result<&Self, RegistryError> {
        self.register(hook)?;
        let mut global = self.global.write();
        for kind in hook.types() {
            let entries = global.entry(*kind).or_default();
            if !entries.iter().any(|entry| entry.ptr_eq(hook)) {
                entries.push(hook.clone());
            }
        }
        Ok(self)
    }

    /// Stops a hook from firing globally. Its name stays registered.
    pub fn unregister_global(&self, hook: &Hook) {
        let mut global = self.global.write();
        for entries in global.values_mut() {
            entries.retain(|entry| !entry.ptr_eq(hook));
        }
    }

    /// Returns the hook registered under `name`.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::UnregisteredHook`] if there is none.
    pub fn get(&self, name: &str) -> Result<Hook, RegistryError> {
        self.named
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| RegistryError::UnregisteredHook(name.to_owned()))
    }

    /// Resolves a list of names, failing on the first unknown one.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::UnregisteredHook`] for a missing name.
    pub fn resolve_names<S: AsRef<str>>(&self, names: &[S]) -> Result<Vec<Hook>, RegistryError> {
        names.iter().map(|name| self.get(name.as_ref())).collect()
    }

    /// Checks if a hook with the given name exists.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.named.read().contains_key(name)
    }

    /// Names of every registered hook.
    #[must_use]
    pub fn names(&self) -> Vec<String> {
        self.named.read().keys().cloned().collect()
    }

    /// Returns the number of global hooks for the given event type.
    #[must_use]
    pub fn global_count(&self, kind: HookType) -> usize {
        self.global.read().get(&kind).map_or(0, Vec::len)
    }

    /// Drops every named and global registration.
    pub fn clear(&self) {
        self.named.write().clear();
        self.global.write().clear();
    }

    /// Merges instance and global hooks for one event, in dispatch order.
    #[must_use]
    pub fn resolve(&self, kind: HookType, instance: &[Hook], tags: &Tags) -> Vec<Hook> {
        let mut merged: Vec<Hook> = instance
            .iter()
            .filter(|hook| hook.handles(kind))
            .cloned()
            .collect();

        if let Some(global) = self.global.read().get(&kind) {
            for hook in global {
                if !merged.iter().any(|present| present.ptr_eq(hook)) {
                    merged.push(hook.clone());
                }
            }
        }

        merged.retain(|hook| hook.matches_tags(tags));
        merged
    }

    /// Runs every hook relevant to `event`, sequentially.
    ///
    /// `instance` are the hooks attached to the target and `tags` its tags.
    ///
    /// # Errors
    ///
    /// Returns the first hook failure; later hooks do not run.
    pub async fn dispatch(
        &self,
        instance: &[Hook],
        tags: &Tags,
        event: HookEvent,
    ) -> Result<(), HookError> {
        let kind = event.hook_type();
        let hooks = self.resolve(kind, instance, tags);
        if hooks.is_empty() {
            return Ok(());
        }

        tracing::trace!(event = %kind, hooks = hooks.len(), "dispatching hooks");
        for hook in &hooks {
            if let Err(err) = hook.invoke(event.clone()).await {
                tracing::debug!(event = %kind, hook = hook.name(), error = %err, "hook failed");
                return Err(err);
            }
        }
        Ok(())
    }
}
