//! Process-wide registry of configured caches.
//!
//! One cache handle per entity type. The registry owns nothing the handles
//! do not already own; it exists so applications can configure caches at
//! startup and reach them from anywhere without threading `Arc`s through
//! every call site, and so test harnesses can reset the world in one call.

use crate::facade::CachedEnumeration;
use crate::StoreAdapter;
use almanac_core::{CacheOptions, ConfigError, Enumerated};
use once_cell::sync::Lazy;
use std::any::{Any, TypeId};
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

/// Lifecycle surface of a registered cache, object-safe so the registry can
/// drive caches of different entity types uniformly.
pub trait RegisteredCache: Send + Sync {
    fn entity_name(&self) -> &'static str;
    fn is_populated(&self) -> bool;
    fn reset(&self);
}

impl<E, S> RegisteredCache for CachedEnumeration<E, S>
where
    E: Enumerated,
    S: StoreAdapter<E>,
{
    fn entity_name(&self) -> &'static str {
        E::entity_name()
    }

    fn is_populated(&self) -> bool {
        CachedEnumeration::is_populated(self)
    }

    fn reset(&self) {
        CachedEnumeration::reset(self)
    }
}

// Both views of one handle: the lifecycle trait for uniform operations and
// the typed Arc behind Any for `handle` downcasts.
struct Registration {
    lifecycle: Arc<dyn RegisteredCache>,
    handle: Arc<dyn Any + Send + Sync>,
}

/// Registry keyed by entity type.
///
/// Each entity type registers at most once; a second `configure` is an
/// `AlreadyConfigured` error rather than a silent replacement, because two
/// handles for one table would populate and reset independently.
#[derive(Default)]
pub struct CacheRegistry {
    entries: RwLock<HashMap<TypeId, Registration>>,
}

impl CacheRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Shared process-wide instance, for applications that want ambient
    /// access instead of wiring a registry through their own state.
    pub fn global() -> &'static CacheRegistry {
        static GLOBAL: Lazy<CacheRegistry> = Lazy::new(CacheRegistry::new);
        &GLOBAL
    }

    /// Build, validate, and register a cache for `E` in one step.
    pub fn configure<E, S>(
        &self,
        options: CacheOptions,
        adapter: Arc<S>,
    ) -> Result<Arc<CachedEnumeration<E, S>>, ConfigError>
    where
        E: Enumerated,
        S: StoreAdapter<E> + 'static,
    {
        let cache = Arc::new(CachedEnumeration::new(options, adapter)?);
        self.register(Arc::clone(&cache))?;
        Ok(cache)
    }

    /// Register an already-built handle (the path for caches customized
    /// with builders like `with_namer`).
    pub fn register<E, S>(&self, cache: Arc<CachedEnumeration<E, S>>) -> Result<(), ConfigError>
    where
        E: Enumerated,
        S: StoreAdapter<E> + 'static,
    {
        let mut entries = self.entries.write().unwrap();
        match entries.entry(TypeId::of::<E>()) {
            Entry::Occupied(_) => Err(ConfigError::AlreadyConfigured {
                entity: E::entity_name().to_string(),
            }),
            Entry::Vacant(slot) => {
                slot.insert(Registration {
                    lifecycle: Arc::clone(&cache) as Arc<dyn RegisteredCache>,
                    handle: cache as Arc<dyn Any + Send + Sync>,
                });
                Ok(())
            }
        }
    }

    /// The typed handle registered for `E`, if any. The adapter type is part
    /// of the handle type, so callers name the same `S` they configured.
    pub fn handle<E, S>(&self) -> Option<Arc<CachedEnumeration<E, S>>>
    where
        E: Enumerated,
        S: StoreAdapter<E> + 'static,
    {
        let entries = self.entries.read().unwrap();
        let registration = entries.get(&TypeId::of::<E>())?;
        Arc::clone(&registration.handle)
            .downcast::<CachedEnumeration<E, S>>()
            .ok()
    }

    /// Reset every registered cache. Meant for test lifecycles and schema
    /// reloads; each cache re-populates on its next access.
    pub fn reset_all(&self) {
        let entries = self.entries.read().unwrap();
        for registration in entries.values() {
            registration.lifecycle.reset();
        }
    }

    pub fn len(&self) -> usize {
        self.entries.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Entity names of every registered cache, sorted for stable output.
    pub fn entity_names(&self) -> Vec<&'static str> {
        let entries = self.entries.read().unwrap();
        let mut names: Vec<&'static str> = entries
            .values()
            .map(|registration| registration.lifecycle.entity_name())
            .collect();
        names.sort_unstable();
        names
    }
}
