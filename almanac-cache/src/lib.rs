//! Read-mostly caching for enumeration tables.
//!
//! Small relational tables that change with deployments rather than with
//! user traffic (currencies, roles, categories) are read constantly through
//! the same handful of query shapes. This crate loads such a table once,
//! freezes it into an immutable snapshot with equality indices and named
//! constants, and answers supported lookups from memory until a reset.
//!
//! The pieces, bottom up:
//!
//! - [`StoreAdapter`]: the seam to the real store. [`MemoryAdapter`] is the
//!   in-memory reference implementation, also used throughout the tests.
//! - [`snapshot::Snapshot`]: rows in configured order plus equality indices
//!   and constant names, built once per population.
//! - [`store::CacheStore`]: the population state machine. Population is
//!   single-flight; reads that arrive while a load is in flight fall
//!   through to the store instead of blocking.
//! - [`classify`]: pure query-shape triage deciding snapshot versus store.
//! - [`facade::CachedEnumeration`]: the application-facing handle, typed
//!   finders plus the descriptor boundary.
//! - [`registry::CacheRegistry`]: one handle per entity type, optionally
//!   process-wide.
//!
//! Staleness is by design: a populated cache never observes changes in the
//! backing table until `reset`.

pub mod classify;
pub mod constants;
pub mod facade;
pub mod registry;
pub mod snapshot;
pub mod store;

// Query classification
pub use classify::{classify, Decision, MissReason, Plan};
// Constant names
pub use constants::ConstantRegistry;
// Application-facing handle
pub use facade::CachedEnumeration;
// Process-wide registry
pub use registry::{CacheRegistry, RegisteredCache};
// Snapshot internals
pub use snapshot::Snapshot;
// Population state machine and counters
pub use store::{CacheStats, CacheStore};

use almanac_core::{
    AlmanacResult, Enumerated, Filter, FilterKey, OrderSpec, QueryDescriptor, StoreError,
};
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::RwLock;

/// The seam between the cache and the real store.
///
/// Both operations read; the cache never writes. `fetch_all_ordered` is
/// called exactly once per successful population. `execute_query` carries
/// every descriptor the cache cannot (or will not) answer; the descriptor
/// arrives with identity keys already numerically coerced and is otherwise
/// untouched. Its errors propagate to the caller unchanged.
#[async_trait]
pub trait StoreAdapter<E: Enumerated>: Send + Sync {
    /// Full-table read, ordered by `order` ascending.
    async fn fetch_all_ordered(&self, order: &str) -> AlmanacResult<Vec<E>>;

    /// Run an arbitrary descriptor against the store.
    async fn execute_query(&self, descriptor: &QueryDescriptor) -> AlmanacResult<Vec<E>>;
}

/// In-memory [`StoreAdapter`] over a row vector.
///
/// The reference implementation: ordered fetches sort by the attribute
/// (rows whose order attribute is NULL sort first), `execute_query` applies
/// equality filters, attribute orders, and limits. Opaque predicates and
/// opaque orders fail with `QueryFailed` since there is nothing to execute
/// them with; the projection, joins, and locking flags are ignored because
/// there is nothing to project or join in memory. Key matching is typed,
/// with no coercion: `Text("3")` does not match `Int(3)`.
///
/// Call counters (`fetch_calls`, `execute_calls`) and `fail_next_fetch`
/// exist for tests asserting traffic and outage behavior.
pub struct MemoryAdapter<E> {
    rows: RwLock<Vec<E>>,
    fetch_calls: AtomicUsize,
    execute_calls: AtomicUsize,
    fail_next_fetch: AtomicBool,
}

impl<E: Enumerated> MemoryAdapter<E> {
    pub fn new(rows: Vec<E>) -> Self {
        Self {
            rows: RwLock::new(rows),
            fetch_calls: AtomicUsize::new(0),
            execute_calls: AtomicUsize::new(0),
            fail_next_fetch: AtomicBool::new(false),
        }
    }

    /// Append a row. Populated caches will not see it until they reset.
    pub fn push(&self, row: E) {
        self.rows.write().unwrap().push(row);
    }

    pub fn fetch_calls(&self) -> usize {
        self.fetch_calls.load(Ordering::SeqCst)
    }

    pub fn execute_calls(&self) -> usize {
        self.execute_calls.load(Ordering::SeqCst)
    }

    /// Make the next `fetch_all_ordered` fail with `Unavailable`.
    pub fn fail_next_fetch(&self) {
        self.fail_next_fetch.store(true, Ordering::SeqCst);
    }

    fn sorted(mut rows: Vec<E>, attribute: &str) -> Vec<E> {
        rows.sort_by(|a, b| a.attr(attribute).cmp(&b.attr(attribute)));
        rows
    }

    fn matches(row: &E, attribute: &str, key: &FilterKey) -> bool {
        let value = row.attr(attribute);
        match key {
            FilterKey::Scalar(key) => value.as_ref() == Some(key),
            FilterKey::Many(keys) => value.map_or(false, |value| keys.contains(&value)),
        }
    }
}

#[async_trait]
impl<E: Enumerated> StoreAdapter<E> for MemoryAdapter<E> {
    async fn fetch_all_ordered(&self, order: &str) -> AlmanacResult<Vec<E>> {
        self.fetch_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_next_fetch.swap(false, Ordering::SeqCst) {
            return Err(StoreError::Unavailable {
                reason: "simulated outage".to_string(),
            }
            .into());
        }
        let rows = self.rows.read().unwrap().clone();
        Ok(Self::sorted(rows, order))
    }

    async fn execute_query(&self, descriptor: &QueryDescriptor) -> AlmanacResult<Vec<E>> {
        self.execute_calls.fetch_add(1, Ordering::SeqCst);
        let mut rows = self.rows.read().unwrap().clone();
        for filter in &descriptor.filters {
            match filter {
                Filter::Eq { attribute, key } => {
                    rows.retain(|row| Self::matches(row, attribute, key));
                }
                Filter::Opaque { label } => {
                    return Err(StoreError::QueryFailed {
                        reason: format!("opaque predicate `{label}` is not executable in memory"),
                    }
                    .into());
                }
            }
        }
        match &descriptor.order {
            OrderSpec::Unspecified => {}
            OrderSpec::Attribute(attribute) => rows = Self::sorted(rows, attribute),
            OrderSpec::Opaque => {
                return Err(StoreError::QueryFailed {
                    reason: "opaque order is not executable in memory".to_string(),
                }
                .into());
            }
        }
        if let Some(limit) = descriptor.limit {
            rows.truncate(limit as usize);
        }
        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use almanac_core::{AlmanacError, AttrValue};

    #[derive(Debug, Clone, PartialEq)]
    struct Token {
        id: i64,
        word: Option<String>,
    }

    impl Enumerated for Token {
        fn entity_name() -> &'static str {
            "Token"
        }

        fn id(&self) -> i64 {
            self.id
        }

        fn attr(&self, name: &str) -> Option<AttrValue> {
            match name {
                "id" => Some(AttrValue::Int(self.id)),
                "word" => self.word.clone().map(AttrValue::Text),
                _ => None,
            }
        }

        fn attribute_names() -> &'static [&'static str] {
            &["id", "word"]
        }
    }

    fn token(id: i64, word: Option<&str>) -> Token {
        Token {
            id,
            word: word.map(str::to_string),
        }
    }

    fn tokens() -> Vec<Token> {
        vec![
            token(3, Some("gamma")),
            token(1, Some("alpha")),
            token(4, None),
            token(2, Some("beta")),
        ]
    }

    #[tokio::test]
    async fn ordered_fetches_sort_by_the_attribute() {
        let adapter = MemoryAdapter::new(tokens());

        let by_id = adapter
            .fetch_all_ordered("id")
            .await
            .expect("fetch should succeed");
        let ids: Vec<i64> = by_id.iter().map(|t| t.id).collect();
        assert_eq!(ids, vec![1, 2, 3, 4]);

        // NULL order attributes sort first
        let by_word = adapter
            .fetch_all_ordered("word")
            .await
            .expect("fetch should succeed");
        let ids: Vec<i64> = by_word.iter().map(|t| t.id).collect();
        assert_eq!(ids, vec![4, 1, 2, 3]);

        assert_eq!(adapter.fetch_calls(), 2);
    }

    #[tokio::test]
    async fn equality_filters_apply_without_coercion() {
        let adapter = MemoryAdapter::new(tokens());

        let rows = adapter
            .execute_query(&QueryDescriptor::new().filter_eq("word", "beta"))
            .await
            .expect("query should succeed");
        assert_eq!(rows, vec![token(2, Some("beta"))]);

        // typed matching: a text key never matches an integer id
        let rows = adapter
            .execute_query(&QueryDescriptor::new().filter_eq("id", "2"))
            .await
            .expect("query should succeed");
        assert!(rows.is_empty());

        // NULL attributes match no equality key
        let rows = adapter
            .execute_query(&QueryDescriptor::new().filter_eq("word", "gamma"))
            .await
            .expect("query should succeed");
        assert_eq!(rows.len(), 1);
        assert_eq!(adapter.execute_calls(), 3);
    }

    #[tokio::test]
    async fn key_lists_order_and_limit_combine() {
        let adapter = MemoryAdapter::new(tokens());

        let rows = adapter
            .execute_query(
                &QueryDescriptor::new()
                    .filter_eq_any("id", vec![2i64, 3, 99])
                    .order_by("word")
                    .limit(1),
            )
            .await
            .expect("query should succeed");
        assert_eq!(rows, vec![token(2, Some("beta"))]);
    }

    #[tokio::test]
    async fn opaque_shapes_are_not_executable() {
        let adapter = MemoryAdapter::new(tokens());

        let err = adapter
            .execute_query(&QueryDescriptor::new().filter_opaque("word LIKE ?"))
            .await
            .expect_err("opaque predicate");
        assert!(matches!(
            err,
            AlmanacError::Store(StoreError::QueryFailed { .. })
        ));

        let err = adapter
            .execute_query(&QueryDescriptor::new().order_opaque())
            .await
            .expect_err("opaque order");
        assert!(matches!(
            err,
            AlmanacError::Store(StoreError::QueryFailed { .. })
        ));
    }

    #[tokio::test]
    async fn structural_flags_are_ignored_in_memory() {
        let adapter = MemoryAdapter::new(tokens());

        let plain = adapter
            .execute_query(&QueryDescriptor::new().filter_eq("id", 1i64))
            .await
            .expect("query should succeed");
        let flagged = adapter
            .execute_query(
                &QueryDescriptor::new()
                    .filter_eq("id", 1i64)
                    .with_projection()
                    .with_joins()
                    .with_locking(),
            )
            .await
            .expect("query should succeed");
        assert_eq!(plain, flagged);
    }

    #[tokio::test]
    async fn simulated_outages_fail_exactly_once() {
        let adapter = MemoryAdapter::new(tokens());
        adapter.fail_next_fetch();

        let err = adapter
            .fetch_all_ordered("id")
            .await
            .expect_err("first fetch fails");
        assert!(matches!(
            err,
            AlmanacError::Store(StoreError::Unavailable { .. })
        ));

        let rows = adapter
            .fetch_all_ordered("id")
            .await
            .expect("second fetch recovers");
        assert_eq!(rows.len(), 4);
        assert_eq!(adapter.fetch_calls(), 2);
    }

    #[tokio::test]
    async fn pushed_rows_show_up_in_later_reads() {
        let adapter = MemoryAdapter::new(tokens());
        adapter.push(token(5, Some("delta")));

        let rows = adapter
            .fetch_all_ordered("id")
            .await
            .expect("fetch should succeed");
        assert_eq!(rows.len(), 5);
    }
}
