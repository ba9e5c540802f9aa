//! The per-entity cache handle.
//!
//! `CachedEnumeration` is what applications hold: typed finders with finder
//! semantics (self-populating, `NotFound` on the erroring forms) and a
//! descriptor boundary with store semantics (`lookup`, where absence is an
//! empty result). The classifier runs only at the descriptor boundary;
//! typed finders go straight to the store.

use crate::classify::{classify, Decision, MissReason, Plan};
use crate::constants::Namer;
use crate::store::{CacheStats, CacheStore};
use crate::StoreAdapter;
use almanac_core::{
    AlmanacResult, AttrValue, CacheOptions, CacheStatus, ConfigError, Enumerated, IdSelector,
    QueryDescriptor, Selected, ID_ATTRIBUTE,
};
use std::fmt;
use std::sync::Arc;

/// Read-through cache for one enumeration entity type.
///
/// Owns the store adapter and the snapshot store. Constructed once per
/// entity type, usually through [`crate::CacheRegistry::configure`], and
/// shared behind an `Arc`.
pub struct CachedEnumeration<E, S> {
    adapter: Arc<S>,
    store: CacheStore<E, S>,
}

impl<E, S> CachedEnumeration<E, S>
where
    E: Enumerated,
    S: StoreAdapter<E>,
{
    /// Build a cache handle, validating `options` against `E`'s attributes.
    ///
    /// Misconfiguration is fatal here, before any population: an unknown
    /// order, hashed, or constantize attribute would otherwise only surface
    /// as silently useless cache behavior at runtime.
    pub fn new(options: CacheOptions, adapter: Arc<S>) -> Result<Self, ConfigError> {
        options.validate_for::<E>()?;
        let namer = Namer::from_options(&options);
        Ok(Self {
            adapter: Arc::clone(&adapter),
            store: CacheStore::new(options, namer, adapter),
        })
    }

    /// Replace the attribute-based constant source with a custom namer.
    /// Names are still upper-cased at registration.
    pub fn with_namer(mut self, namer: impl Fn(&E) -> String + Send + Sync + 'static) -> Self {
        self.store.set_namer(Namer::Custom(Arc::new(namer)));
        self
    }

    pub fn options(&self) -> &CacheOptions {
        self.store.options()
    }

    pub fn status(&self) -> CacheStatus {
        self.store.status()
    }

    pub fn is_populated(&self) -> bool {
        self.store.is_cached()
    }

    pub fn is_populating(&self) -> bool {
        self.store.is_caching()
    }

    /// Load the table now instead of on first access. `true` when this call
    /// did the work.
    pub async fn populate(&self) -> AlmanacResult<bool> {
        self.store.populate().await
    }

    /// Drop the snapshot; the next access reloads the table.
    pub fn reset(&self) {
        self.store.reset();
    }

    pub fn stats(&self) -> CacheStats {
        self.store.stats()
    }

    /// Every row, configured order.
    pub async fn all(&self) -> AlmanacResult<Arc<[E]>> {
        self.store.all().await
    }

    /// First row of the configured order; `None` on an empty table.
    pub async fn first(&self) -> AlmanacResult<Option<E>> {
        self.store.first().await
    }

    /// Indexed lookup; `None` when the key is absent.
    pub async fn find_by(
        &self,
        attribute: &str,
        key: impl Into<AttrValue>,
    ) -> AlmanacResult<Option<E>> {
        self.store.find_by(attribute, key).await
    }

    /// Indexed lookup; `LookupError::NotFound` naming the key when absent.
    pub async fn get_by(&self, attribute: &str, key: impl Into<AttrValue>) -> AlmanacResult<E> {
        self.store.get_by(attribute, key).await
    }

    /// Identity lookup. String keys coerce numerically.
    pub async fn find(&self, key: impl Into<AttrValue>) -> AlmanacResult<E> {
        self.store.get_by(ID_ATTRIBUTE, key).await
    }

    /// Identity lookup preserving the selector shape: a scalar selector
    /// finds a scalar, a list finds a list.
    ///
    /// List keys resolve in argument order, duplicates included, and fail
    /// fast with `NotFound` naming the first missing key. An empty list is
    /// answered immediately, without populating or touching the store.
    pub async fn find_by_ids(
        &self,
        selector: impl Into<IdSelector>,
    ) -> AlmanacResult<Selected<E>> {
        match selector.into() {
            IdSelector::Scalar(key) => {
                Ok(Selected::Scalar(self.store.get_by(ID_ATTRIBUTE, key).await?))
            }
            IdSelector::List(keys) => {
                if keys.is_empty() {
                    return Ok(Selected::List(Vec::new()));
                }
                let mut entities = Vec::with_capacity(keys.len());
                for key in keys {
                    entities.push(self.store.get_by(ID_ATTRIBUTE, key).await?);
                }
                Ok(Selected::List(entities))
            }
        }
    }

    /// Constant lookup by upper-case name; `None` means undefined.
    pub async fn resolve(&self, name: &str) -> AlmanacResult<Option<E>> {
        self.store.resolve(name).await
    }

    /// Answer a query descriptor, from the snapshot when its shape allows.
    ///
    /// This is the store-semantics boundary: absence is an empty result,
    /// never an error. String-typed identity keys coerce once, before
    /// anything else, so the answer does not depend on whether the shape is
    /// then served from the snapshot or delegated. Hits are served per the
    /// classified plan. Misses delegate the normalized descriptor to the
    /// adapter; when the only obstacle is an unpopulated cache, the facade
    /// populates first so later calls hit, but this call is still answered
    /// by the delegation. A failed opportunistic population is logged and
    /// does not fail the lookup. Unsupported shapes leave the cache
    /// completely untouched.
    pub async fn lookup(&self, descriptor: &QueryDescriptor) -> AlmanacResult<Vec<E>> {
        let descriptor = descriptor.normalize_id_keys();
        match classify(&descriptor, self.store.options(), self.store.status()) {
            Decision::Hit(plan) => self.serve(plan).await,
            Decision::Miss(reason) => {
                tracing::debug!(
                    entity = E::entity_name(),
                    reason = ?reason,
                    "query not servable from cache, delegating"
                );
                self.store.record_miss();
                if reason == MissReason::NotPopulated {
                    if let Err(err) = self.store.populate().await {
                        tracing::warn!(
                            entity = E::entity_name(),
                            error = %err,
                            "opportunistic population failed"
                        );
                    }
                }
                self.adapter.execute_query(&descriptor).await
            }
        }
    }

    async fn serve(&self, plan: Plan) -> AlmanacResult<Vec<E>> {
        match plan {
            Plan::All => Ok(self.store.all().await?.to_vec()),
            Plan::First => Ok(self.store.first().await?.into_iter().collect()),
            Plan::ByKey { attribute, key } => Ok(self
                .store
                .find_by(&attribute, key)
                .await?
                .into_iter()
                .collect()),
            Plan::ByKeys { attribute, keys } => self.store.find_many(&attribute, keys).await,
            Plan::Empty => Ok(Vec::new()),
        }
    }
}

/// Renders the entity name and population status, not the snapshot content.
impl<E, S> fmt::Debug for CachedEnumeration<E, S>
where
    E: Enumerated,
    S: StoreAdapter<E>,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CachedEnumeration")
            .field("entity", &E::entity_name())
            .field("status", &self.store.status())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MemoryAdapter;
    use almanac_core::{AlmanacError, LookupError, StoreError};

    #[derive(Debug, Clone, PartialEq)]
    struct Flavor {
        id: i64,
        name: String,
        other: String,
    }

    impl Enumerated for Flavor {
        fn entity_name() -> &'static str {
            "Flavor"
        }

        fn id(&self) -> i64 {
            self.id
        }

        fn attr(&self, name: &str) -> Option<AttrValue> {
            match name {
                "id" => Some(AttrValue::Int(self.id)),
                "name" => Some(AttrValue::Text(self.name.clone())),
                "other" => Some(AttrValue::Text(self.other.clone())),
                _ => None,
            }
        }

        fn attribute_names() -> &'static [&'static str] {
            &["id", "name", "other"]
        }
    }

    fn flavor(id: i64, name: &str, other: &str) -> Flavor {
        Flavor {
            id,
            name: name.to_string(),
            other: other.to_string(),
        }
    }

    fn flavors() -> Vec<Flavor> {
        vec![
            flavor(2, "two", "zwei"),
            flavor(1, "one", "eins"),
            flavor(3, "three", "drei"),
        ]
    }

    type FlavorCache = CachedEnumeration<Flavor, MemoryAdapter<Flavor>>;

    fn cache_with(options: CacheOptions) -> (Arc<MemoryAdapter<Flavor>>, FlavorCache) {
        let adapter = Arc::new(MemoryAdapter::new(flavors()));
        let cache = CachedEnumeration::new(options, Arc::clone(&adapter))
            .expect("options should validate");
        (adapter, cache)
    }

    #[test]
    fn construction_rejects_unknown_attributes() {
        let adapter = Arc::new(MemoryAdapter::new(flavors()));
        let err = CachedEnumeration::<Flavor, _>::new(
            CacheOptions::new().with_hashed(["id", "shade"]),
            adapter,
        )
        .expect_err("unknown hashed attribute");
        assert_eq!(
            err,
            ConfigError::UnknownAttribute {
                option: "hashed".to_string(),
                attribute: "shade".to_string(),
                entity: "Flavor".to_string(),
            }
        );
    }

    #[tokio::test]
    async fn debug_rendering_names_the_entity_and_status() {
        let (_adapter, cache) = cache_with(CacheOptions::new());
        assert_eq!(
            format!("{cache:?}"),
            "CachedEnumeration { entity: \"Flavor\", status: Uncached }"
        );

        cache.populate().await.expect("populate should succeed");
        assert_eq!(
            format!("{cache:?}"),
            "CachedEnumeration { entity: \"Flavor\", status: Cached }"
        );
    }

    #[tokio::test]
    async fn serves_the_configured_order_from_one_fetch() {
        let (adapter, cache) = cache_with(CacheOptions::new().with_order("name"));

        let rows = cache.all().await.expect("all should succeed");
        let names: Vec<&str> = rows.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, vec!["one", "three", "two"]);

        let first = cache.first().await.expect("first should succeed");
        assert_eq!(first, Some(flavor(1, "one", "eins")));
        assert_eq!(adapter.fetch_calls(), 1);
    }

    #[tokio::test]
    async fn typed_finders_run_store_free_once_populated() {
        let (adapter, cache) = cache_with(CacheOptions::new().with_hashed(["id", "other"]));

        // an empty id list costs nothing, not even the first population
        let selected = cache
            .find_by_ids(Vec::<i64>::new())
            .await
            .expect("empty selector should succeed");
        assert_eq!(selected, Selected::List(Vec::new()));
        assert!(!cache.is_populated());
        assert_eq!(adapter.fetch_calls(), 0);

        let two = cache
            .get_by("other", "zwei")
            .await
            .expect("get_by should succeed");
        assert_eq!(two, flavor(2, "two", "zwei"));

        // string ids coerce
        let three = cache.find("3").await.expect("find should succeed");
        assert_eq!(three, flavor(3, "three", "drei"));

        let picked = cache
            .find_by_ids(vec![1i64, 3])
            .await
            .expect("find_by_ids should succeed");
        assert_eq!(
            picked,
            Selected::List(vec![flavor(1, "one", "eins"), flavor(3, "three", "drei")])
        );

        let single = cache.find_by_ids(2i64).await.expect("scalar selector");
        assert_eq!(single, Selected::Scalar(flavor(2, "two", "zwei")));

        let err = cache
            .find_by_ids(vec![1i64, 99])
            .await
            .expect_err("99 is absent");
        assert_eq!(
            err,
            AlmanacError::Lookup(LookupError::NotFound {
                entity: "Flavor".to_string(),
                attribute: "id".to_string(),
                key: AttrValue::Int(99),
            })
        );

        let one = cache.resolve("ONE").await.expect("resolve should succeed");
        assert_eq!(one, Some(flavor(1, "one", "eins")));
        let none = cache.resolve("NOPE").await.expect("resolve should succeed");
        assert_eq!(none, None);

        // one population, no per-lookup queries
        assert_eq!(adapter.fetch_calls(), 1);
        assert_eq!(adapter.execute_calls(), 0);
    }

    #[tokio::test]
    async fn find_by_returns_none_where_get_by_errors() {
        let (_adapter, cache) = cache_with(CacheOptions::new());

        let hit = cache
            .find_by("name", "two")
            .await
            .expect("find_by should succeed");
        assert_eq!(hit, Some(flavor(2, "two", "zwei")));

        let absent = cache
            .find_by("name", "four")
            .await
            .expect("find_by should succeed");
        assert_eq!(absent, None);

        let err = cache.get_by("name", "four").await.expect_err("absent key");
        assert!(matches!(err, AlmanacError::Lookup(_)));
    }

    #[tokio::test]
    async fn unhashed_typed_lookups_are_configuration_errors() {
        let (_adapter, cache) = cache_with(CacheOptions::new());

        let err = cache
            .get_by("other", "zwei")
            .await
            .expect_err("other is not hashed by default");
        assert!(matches!(
            err,
            AlmanacError::Config(ConfigError::NotHashed { .. })
        ));
    }

    #[tokio::test]
    async fn lookup_serves_supported_shapes_from_the_snapshot() {
        let (adapter, cache) = cache_with(CacheOptions::new());
        cache.populate().await.expect("populate should succeed");

        let all = cache
            .lookup(&QueryDescriptor::new())
            .await
            .expect("lookup should succeed");
        assert_eq!(all.len(), 3);
        assert_eq!(all[0], flavor(1, "one", "eins"));

        let first = cache
            .lookup(&QueryDescriptor::new().limit(1))
            .await
            .expect("lookup should succeed");
        assert_eq!(first, vec![flavor(1, "one", "eins")]);

        let keyed = cache
            .lookup(&QueryDescriptor::new().filter_eq("id", 3i64))
            .await
            .expect("lookup should succeed");
        assert_eq!(keyed, vec![flavor(3, "three", "drei")]);

        // store semantics: absence is an empty result, not an error
        let absent = cache
            .lookup(&QueryDescriptor::new().filter_eq("id", 99i64))
            .await
            .expect("lookup should succeed");
        assert!(absent.is_empty());

        // IN lists collapse duplicates to first occurrence and skip misses
        let picked = cache
            .lookup(&QueryDescriptor::new().filter_eq_any("id", vec![3i64, 1, 3, 99]))
            .await
            .expect("lookup should succeed");
        assert_eq!(
            picked,
            vec![flavor(3, "three", "drei"), flavor(1, "one", "eins")]
        );

        assert_eq!(adapter.fetch_calls(), 1);
        assert_eq!(adapter.execute_calls(), 0);
    }

    #[tokio::test]
    async fn empty_in_lists_answer_before_any_population() {
        let (adapter, cache) = cache_with(CacheOptions::new());

        let rows = cache
            .lookup(&QueryDescriptor::new().filter_eq_any("id", Vec::<i64>::new()))
            .await
            .expect("lookup should succeed");
        assert!(rows.is_empty());
        assert!(!cache.is_populated());
        assert_eq!(adapter.fetch_calls(), 0);
        assert_eq!(adapter.execute_calls(), 0);
    }

    #[tokio::test]
    async fn unsupported_shapes_delegate_and_leave_the_cache_untouched() {
        let (adapter, cache) = cache_with(CacheOptions::new());

        let descriptor = QueryDescriptor::new().filter_eq("id", 2i64).with_joins();
        let direct = adapter
            .execute_query(&descriptor)
            .await
            .expect("direct query should succeed");
        let via_cache = cache
            .lookup(&descriptor)
            .await
            .expect("lookup should succeed");
        assert_eq!(via_cache, direct);

        for descriptor in [
            QueryDescriptor::new().with_projection(),
            QueryDescriptor::new().with_locking(),
        ] {
            cache
                .lookup(&descriptor)
                .await
                .expect("delegation should succeed");
        }

        // opaque shapes delegate too; this adapter cannot run them, and
        // the adapter's error comes back unchanged
        let err = cache
            .lookup(&QueryDescriptor::new().filter_opaque("name LIKE ?"))
            .await
            .expect_err("opaque filters are not executable in memory");
        assert!(matches!(
            err,
            AlmanacError::Store(StoreError::QueryFailed { .. })
        ));
        let err = cache
            .lookup(&QueryDescriptor::new().order_opaque())
            .await
            .expect_err("opaque orders are not executable in memory");
        assert!(matches!(
            err,
            AlmanacError::Store(StoreError::QueryFailed { .. })
        ));

        // no shape above may populate or fetch
        assert!(!cache.is_populated());
        assert_eq!(adapter.fetch_calls(), 0);
        assert_eq!(adapter.execute_calls(), 6);
    }

    #[tokio::test]
    async fn a_supported_miss_populates_for_later_calls() {
        let (adapter, cache) = cache_with(CacheOptions::new());

        let descriptor = QueryDescriptor::new().filter_eq("id", 2i64);
        let rows = cache
            .lookup(&descriptor)
            .await
            .expect("lookup should succeed");
        assert_eq!(rows, vec![flavor(2, "two", "zwei")]);

        // this call was answered by delegation, but it primed the cache
        assert!(cache.is_populated());
        assert_eq!(adapter.fetch_calls(), 1);
        assert_eq!(adapter.execute_calls(), 1);

        let rows = cache
            .lookup(&descriptor)
            .await
            .expect("lookup should succeed");
        assert_eq!(rows, vec![flavor(2, "two", "zwei")]);
        assert_eq!(adapter.fetch_calls(), 1);
        assert_eq!(adapter.execute_calls(), 1);
    }

    #[tokio::test]
    async fn string_id_lookups_answer_the_same_before_and_after_population() {
        let (adapter, cache) = cache_with(CacheOptions::new());

        // delegated while uncached: the id key must already be coerced, or
        // the adapter's typed equality would answer differently than the
        // snapshot will once populated
        let descriptor = QueryDescriptor::new().filter_eq("id", "3");
        let before = cache
            .lookup(&descriptor)
            .await
            .expect("lookup should succeed");
        assert_eq!(before, vec![flavor(3, "three", "drei")]);
        assert_eq!(adapter.execute_calls(), 1);

        // that miss primed the cache; the same descriptor now hits
        assert!(cache.is_populated());
        let after = cache
            .lookup(&descriptor)
            .await
            .expect("lookup should succeed");
        assert_eq!(after, before);
        assert_eq!(adapter.execute_calls(), 1);

        // IN lists coerce the same way; an unparseable key matches nothing
        let picked = cache
            .lookup(&QueryDescriptor::new().filter_eq_any("id", vec!["1", "junk"]))
            .await
            .expect("lookup should succeed");
        assert_eq!(picked, vec![flavor(1, "one", "eins")]);
        assert_eq!(adapter.execute_calls(), 1);
    }

    #[tokio::test]
    async fn a_failed_opportunistic_population_does_not_fail_the_lookup() {
        let (adapter, cache) = cache_with(CacheOptions::new());
        adapter.fail_next_fetch();

        let rows = cache
            .lookup(&QueryDescriptor::new())
            .await
            .expect("delegation should still answer");
        assert_eq!(rows.len(), 3);
        assert!(!cache.is_populated());
        assert_eq!(adapter.fetch_calls(), 1);
        assert_eq!(adapter.execute_calls(), 1);

        // next supported miss retries the population and succeeds
        cache
            .lookup(&QueryDescriptor::new())
            .await
            .expect("lookup should succeed");
        assert!(cache.is_populated());
        assert_eq!(adapter.fetch_calls(), 2);
        assert_eq!(adapter.execute_calls(), 2);
    }

    #[tokio::test]
    async fn custom_namers_replace_the_attribute_source() {
        let adapter = Arc::new(MemoryAdapter::new(flavors()));
        let cache = CachedEnumeration::new(CacheOptions::new(), Arc::clone(&adapter))
            .expect("options should validate")
            .with_namer(|f: &Flavor| format!("flavor_{}", f.id));

        let two = cache.resolve("FLAVOR_2").await.expect("resolve");
        assert_eq!(two, Some(flavor(2, "two", "zwei")));

        // the attribute-derived names are gone
        let by_name = cache.resolve("ONE").await.expect("resolve");
        assert_eq!(by_name, None);
    }

    #[tokio::test]
    async fn reset_forgets_rows_added_behind_the_cache() {
        let (adapter, cache) = cache_with(CacheOptions::new());

        cache.all().await.expect("all should succeed");
        adapter.push(flavor(4, "four", "vier"));
        assert_eq!(cache.all().await.expect("all").len(), 3);

        cache.reset();
        assert!(!cache.is_populated());
        assert_eq!(cache.all().await.expect("all").len(), 4);
        assert_eq!(adapter.fetch_calls(), 2);
    }

    #[tokio::test]
    async fn stats_reflect_the_snapshot_and_traffic() {
        let (_adapter, cache) = cache_with(CacheOptions::new());

        cache.all().await.expect("all should succeed");
        cache.find("1").await.expect("find should succeed");

        let stats = cache.stats();
        assert_eq!(stats.rows, Some(3));
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.hits, 1);
        assert!(stats.populated_at.is_some());
    }
}
