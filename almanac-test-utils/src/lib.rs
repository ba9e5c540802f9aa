//! Almanac Test Utilities
//!
//! Centralized test infrastructure for the almanac workspace:
//! - The canonical `Flavor` fixture entity and seeded adapters
//! - Proptest generators for values, options, and query descriptors
//! - Re-exports so test code pulls one crate

// Re-export the in-memory adapter from its source crate
pub use almanac_cache::MemoryAdapter;

// Re-export the cache surface for convenience
pub use almanac_cache::{
    classify, CacheRegistry, CacheStats, CacheStore, CachedEnumeration, ConstantRegistry,
    Decision, MissReason, Plan, RegisteredCache, Snapshot, StoreAdapter,
};

// Re-export core types for convenience
pub use almanac_core::{
    AlmanacError, AlmanacResult, AttrValue, CacheOptions, CacheStatus, ConfigError,
    ConstantSource, Enumerated, Filter, FilterKey, IdSelector, LookupError, OrderSpec,
    QueryDescriptor, Selected, StoreError,
};

use std::sync::Arc;

// ============================================================================
// FIXTURE ENTITY
// ============================================================================

/// The workspace's canonical fixture entity: three rows, two text columns.
#[derive(Debug, Clone, PartialEq)]
pub struct Flavor {
    pub id: i64,
    pub name: String,
    pub other: String,
}

impl Flavor {
    pub fn new(id: i64, name: impl Into<String>, other: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            other: other.into(),
        }
    }
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

/// The rows one/two/three with their German counterparts, deliberately
/// unsorted so ordered fetches have something to do.
pub fn flavor_rows() -> Vec<Flavor> {
    vec![
        Flavor::new(2, "two", "zwei"),
        Flavor::new(1, "one", "eins"),
        Flavor::new(3, "three", "drei"),
    ]
}

/// Adapter seeded with [`flavor_rows`].
pub fn flavor_adapter() -> Arc<MemoryAdapter<Flavor>> {
    Arc::new(MemoryAdapter::new(flavor_rows()))
}

/// A ready-to-use cache over [`flavor_adapter`] with every column hashed,
/// plus the adapter for traffic assertions.
pub fn flavor_cache() -> (
    Arc<MemoryAdapter<Flavor>>,
    CachedEnumeration<Flavor, MemoryAdapter<Flavor>>,
) {
    let adapter = flavor_adapter();
    let options = CacheOptions::new().with_hashed(["id", "name", "other"]);
    let cache = CachedEnumeration::new(options, Arc::clone(&adapter))
        .expect("fixture options always validate");
    (adapter, cache)
}

// ============================================================================
// PROPTEST GENERATORS
// ============================================================================

pub mod generators {
    use super::*;
    use proptest::prelude::*;

    /// Generate any attribute value.
    pub fn arb_attr_value() -> impl Strategy<Value = AttrValue> {
        prop_oneof![
            any::<i64>().prop_map(AttrValue::Int),
            "[a-zA-Z0-9 ]{0,12}".prop_map(AttrValue::Text),
            any::<bool>().prop_map(AttrValue::Bool),
        ]
    }

    /// Generate a cache status.
    pub fn arb_cache_status() -> impl Strategy<Value = CacheStatus> {
        prop_oneof![
            Just(CacheStatus::Uncached),
            Just(CacheStatus::Caching),
            Just(CacheStatus::Cached),
        ]
    }

    /// Generate valid options for [`Flavor`].
    pub fn arb_flavor_options() -> impl Strategy<Value = CacheOptions> {
        let order = prop_oneof![Just("id"), Just("name"), Just("other")];
        let hashed = proptest::sample::subsequence(vec!["id", "name", "other"], 0..=3);
        let constants = prop_oneof![
            Just(None),
            Just(Some("name")),
            Just(Some("other")),
        ];
        (order, hashed, constants).prop_map(|(order, hashed, constants)| {
            let options = CacheOptions::new().with_order(order).with_hashed(hashed);
            match constants {
                Some(attribute) => options.with_constants_from(attribute),
                None => options.without_constants(),
            }
        })
    }

    /// Generate up to `max_rows` flavors with sequential unique ids.
    /// Names may repeat; indices and constants then keep the last row.
    pub fn arb_flavors(max_rows: usize) -> impl Strategy<Value = Vec<Flavor>> {
        proptest::collection::vec("[a-z]{1,8}", 0..=max_rows).prop_map(|names| {
            names
                .into_iter()
                .enumerate()
                .map(|(i, name)| {
                    let other = format!("{name}-alt");
                    Flavor::new(i as i64 + 1, name, other)
                })
                .collect()
        })
    }

    /// Generate one query filter.
    pub fn arb_filter() -> impl Strategy<Value = Filter> {
        let attribute = prop_oneof![
            Just("id".to_string()),
            Just("name".to_string()),
            "[a-z]{1,6}".prop_map(String::from),
        ];
        prop_oneof![
            (attribute.clone(), arb_attr_value()).prop_map(|(attribute, key)| Filter::Eq {
                attribute,
                key: FilterKey::Scalar(key),
            }),
            (
                attribute,
                proptest::collection::vec(arb_attr_value(), 0..4)
            )
                .prop_map(|(attribute, keys)| Filter::Eq {
                    attribute,
                    key: FilterKey::Many(keys),
                }),
            "[a-z ?=<>]{1,16}".prop_map(|label| Filter::Opaque { label }),
        ]
    }

    /// Generate an arbitrary query descriptor covering the whole shape space
    /// the classifier triages.
    pub fn arb_descriptor() -> impl Strategy<Value = QueryDescriptor> {
        let order = prop_oneof![
            Just(OrderSpec::Unspecified),
            "[a-z]{1,6}".prop_map(OrderSpec::Attribute),
            Just(OrderSpec::Opaque),
        ];
        (
            proptest::collection::vec(arb_filter(), 0..3),
            order,
            proptest::option::of(0u64..5),
            any::<bool>(),
            any::<bool>(),
            any::<bool>(),
        )
            .prop_map(
                |(filters, order, limit, projection, joins, locking)| QueryDescriptor {
                    filters,
                    order,
                    limit,
                    projection,
                    joins,
                    locking,
                },
            )
    }
}

// ============================================================================
// TESTS
// ============================================================================
