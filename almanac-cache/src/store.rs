//! Snapshot store and population state machine.
//!
//! One `CacheStore` per configured entity type. The first read triggers a
//! full-table fetch; the result is frozen into a [`Snapshot`] and published
//! atomically. From then on supported lookups are answered without store
//! traffic until `reset`.
//!
//! Population moves `Uncached -> Caching -> Cached`. The first transition is
//! a compare-and-swap: exactly one task populates, every other caller gets
//! `false` back immediately. While a population is in flight, readers on
//! other tasks fall through to the store adapter instead of blocking.

use crate::constants::Namer;
use crate::snapshot::Snapshot;
use crate::StoreAdapter;
use almanac_core::{
    AlmanacResult, AttrValue, CacheOptions, CacheStatus, ConfigError, Enumerated, LookupError,
    QueryDescriptor, ID_ATTRIBUTE,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Instant;

const UNCACHED: u8 = 0;
const CACHING: u8 = 1;
const CACHED: u8 = 2;

/// Point-in-time counters for one cache.
///
/// `hits` counts lookups answered from the published snapshot, `misses`
/// counts lookups that needed the state machine or the store. Both are
/// cumulative across resets; `rows` and `populated_at` describe the current
/// snapshot, if any.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub rows: Option<usize>,
    pub populated_at: Option<DateTime<Utc>>,
}

impl CacheStats {
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

/// Snapshot holder for one enumeration table.
pub struct CacheStore<E, S> {
    options: CacheOptions,
    namer: Namer<E>,
    adapter: Arc<S>,
    status: AtomicU8,
    snapshot: RwLock<Option<Arc<Snapshot<E>>>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl<E, S> CacheStore<E, S>
where
    E: Enumerated,
    S: StoreAdapter<E>,
{
    pub(crate) fn new(options: CacheOptions, namer: Namer<E>, adapter: Arc<S>) -> Self {
        Self {
            options,
            namer,
            adapter,
            status: AtomicU8::new(UNCACHED),
            snapshot: RwLock::new(None),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    pub(crate) fn set_namer(&mut self, namer: Namer<E>) {
        self.namer = namer;
    }

    pub fn options(&self) -> &CacheOptions {
        &self.options
    }

    pub fn status(&self) -> CacheStatus {
        match self.status.load(Ordering::Acquire) {
            UNCACHED => CacheStatus::Uncached,
            CACHING => CacheStatus::Caching,
            _ => CacheStatus::Cached,
        }
    }

    pub fn is_cached(&self) -> bool {
        self.status() == CacheStatus::Cached
    }

    pub fn is_caching(&self) -> bool {
        self.status() == CacheStatus::Caching
    }

    /// Fetch the whole table once and publish the snapshot.
    ///
    /// Returns `true` when this call performed the population, `false` when
    /// the cache is already populated or another task holds the `Caching`
    /// state (the reentrancy guard; no store traffic happens in that case).
    /// A fetch failure rolls the status back to `Uncached` and propagates,
    /// so the next caller retries.
    pub async fn populate(&self) -> AlmanacResult<bool> {
        if self
            .status
            .compare_exchange(UNCACHED, CACHING, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Ok(false);
        }
        let started = Instant::now();
        let rows = match self.adapter.fetch_all_ordered(self.options.order()).await {
            Ok(rows) => rows,
            Err(err) => {
                self.status.store(UNCACHED, Ordering::Release);
                return Err(err);
            }
        };
        let snapshot = Arc::new(Snapshot::build(rows, &self.options, &self.namer));
        let row_count = snapshot.len();
        let constant_count = snapshot.constants().len();
        *self.snapshot.write().unwrap() = Some(snapshot);
        self.status.store(CACHED, Ordering::Release);
        tracing::debug!(
            entity = E::entity_name(),
            rows = row_count,
            constants = constant_count,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "enumeration cache populated"
        );
        Ok(true)
    }

    /// Discard the snapshot; the next access re-populates.
    ///
    /// Callers are responsible for not racing `reset` against an in-flight
    /// `populate`: a population that started before the reset will still
    /// publish its (pre-reset) snapshot when it completes.
    pub fn reset(&self) {
        self.status.store(UNCACHED, Ordering::Release);
        *self.snapshot.write().unwrap() = None;
        tracing::debug!(entity = E::entity_name(), "enumeration cache reset");
    }

    pub fn stats(&self) -> CacheStats {
        let snapshot = self.snapshot.read().unwrap().clone();
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            rows: snapshot.as_ref().map(|s| s.len()),
            populated_at: snapshot.as_ref().map(|s| s.populated_at()),
        }
    }

    /// Every row, configured order.
    pub async fn all(&self) -> AlmanacResult<Arc<[E]>> {
        if let Some(snapshot) = self.ready() {
            self.hits.fetch_add(1, Ordering::Relaxed);
            return Ok(snapshot.rows());
        }
        self.misses.fetch_add(1, Ordering::Relaxed);
        self.populate().await?;
        if let Some(snapshot) = self.ready() {
            return Ok(snapshot.rows());
        }
        // population in flight on another task: serve this read from the store
        let rows = self.adapter.fetch_all_ordered(self.options.order()).await?;
        Ok(Arc::from(rows))
    }

    /// First row of the configured order.
    pub async fn first(&self) -> AlmanacResult<Option<E>> {
        Ok(self.all().await?.first().cloned())
    }

    /// Indexed lookup; `None` when the key is absent.
    ///
    /// The attribute must be hashed. Keys against `id` are numerically
    /// coerced so string-typed identifiers match; a key that cannot coerce
    /// matches nothing.
    pub async fn find_by(
        &self,
        attribute: &str,
        key: impl Into<AttrValue>,
    ) -> AlmanacResult<Option<E>> {
        if !self.options.is_hashed(attribute) {
            return Err(ConfigError::NotHashed {
                attribute: attribute.to_string(),
                entity: E::entity_name().to_string(),
                hashed: self.options.hashed().to_vec(),
            }
            .into());
        }
        let key = match self.normalize_key(attribute, key.into()) {
            Some(key) => key,
            None => return Ok(None),
        };
        if let Some(snapshot) = self.ready() {
            self.hits.fetch_add(1, Ordering::Relaxed);
            return Ok(snapshot.find(attribute, &key).cloned());
        }
        self.misses.fetch_add(1, Ordering::Relaxed);
        self.populate().await?;
        if let Some(snapshot) = self.ready() {
            return Ok(snapshot.find(attribute, &key).cloned());
        }
        // population in flight on another task: single equality query instead
        let descriptor = QueryDescriptor::new().filter_eq(attribute, key).limit(1);
        let rows = self.adapter.execute_query(&descriptor).await?;
        Ok(rows.into_iter().next())
    }

    /// Indexed lookup of several keys at once.
    ///
    /// Returns the found subset in key order; duplicate keys collapse to
    /// their first occurrence, absent keys are skipped. Counts as a single
    /// hit or miss.
    pub async fn find_many(
        &self,
        attribute: &str,
        keys: Vec<AttrValue>,
    ) -> AlmanacResult<Vec<E>> {
        if !self.options.is_hashed(attribute) {
            return Err(ConfigError::NotHashed {
                attribute: attribute.to_string(),
                entity: E::entity_name().to_string(),
                hashed: self.options.hashed().to_vec(),
            }
            .into());
        }
        let mut wanted: Vec<AttrValue> = Vec::with_capacity(keys.len());
        for key in keys {
            if let Some(key) = self.normalize_key(attribute, key) {
                if !wanted.contains(&key) {
                    wanted.push(key);
                }
            }
        }
        if wanted.is_empty() {
            return Ok(Vec::new());
        }
        if let Some(snapshot) = self.ready() {
            self.hits.fetch_add(1, Ordering::Relaxed);
            return Ok(Self::pick(&snapshot, attribute, &wanted));
        }
        self.misses.fetch_add(1, Ordering::Relaxed);
        self.populate().await?;
        if let Some(snapshot) = self.ready() {
            return Ok(Self::pick(&snapshot, attribute, &wanted));
        }
        let descriptor = QueryDescriptor::new().filter_eq_any(attribute, wanted);
        self.adapter.execute_query(&descriptor).await
    }

    /// Indexed lookup; `LookupError::NotFound` naming the key when absent.
    pub async fn get_by(&self, attribute: &str, key: impl Into<AttrValue>) -> AlmanacResult<E> {
        let key = key.into();
        match self.find_by(attribute, key.clone()).await? {
            Some(entity) => Ok(entity),
            None => Err(LookupError::not_found::<E>(attribute, key).into()),
        }
    }

    /// Constant lookup by upper-case name.
    ///
    /// A miss triggers one population attempt, then a final exact lookup;
    /// still missing means `None` (the undefined outcome). With constants
    /// disabled this never populates. While another task is mid-population
    /// there is no store to fall back to for names, so a defined constant can
    /// transiently report undefined; callers that populate first never see
    /// that window.
    pub async fn resolve(&self, name: &str) -> AlmanacResult<Option<E>> {
        if self.namer.is_disabled() {
            return Ok(None);
        }
        if let Some(snapshot) = self.ready() {
            if let Some(entity) = snapshot.resolve(name) {
                self.hits.fetch_add(1, Ordering::Relaxed);
                return Ok(Some(entity.clone()));
            }
        }
        self.misses.fetch_add(1, Ordering::Relaxed);
        self.populate().await?;
        if let Some(snapshot) = self.ready() {
            return Ok(snapshot.resolve(name).cloned());
        }
        Ok(None)
    }

    pub(crate) fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    fn ready(&self) -> Option<Arc<Snapshot<E>>> {
        if self.status.load(Ordering::Acquire) == CACHED {
            self.snapshot.read().unwrap().clone()
        } else {
            None
        }
    }

    fn pick(snapshot: &Snapshot<E>, attribute: &str, keys: &[AttrValue]) -> Vec<E> {
        keys.iter()
            .filter_map(|key| snapshot.find(attribute, key).cloned())
            .collect()
    }

    fn normalize_key(&self, attribute: &str, key: AttrValue) -> Option<AttrValue> {
        if attribute == ID_ATTRIBUTE {
            key.coerce_int().map(AttrValue::Int)
        } else {
            Some(key)
        }
    }
}
