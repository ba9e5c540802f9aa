//! Query shape classification.
//!
//! [`classify`] is the single place that decides whether a descriptor can be
//! answered from the snapshot. It is a pure function over the descriptor,
//! the cache options, and the current status, with no I/O and no side
//! effects, so every decision is unit-testable as a value.
//!
//! The bias is conservative. A false negative costs one store round-trip; a
//! false positive would return wrong rows. Anything the snapshot cannot
//! reproduce exactly (projections, joins, locking, opaque predicates,
//! foreign orderings, real limits) misses. Shape triage runs before the
//! status check so unsupported shapes never look like a population problem;
//! only `NotPopulated` misses invite the facade to populate.

use almanac_core::{
    AttrValue, CacheOptions, CacheStatus, Filter, FilterKey, OrderSpec, QueryDescriptor,
};

/// How a hit will be served from the snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Plan {
    /// Every row, configured order.
    All,
    /// First row of the configured order.
    First,
    /// Single indexed key; zero or one row.
    ByKey { attribute: String, key: AttrValue },
    /// Indexed key set; the found subset in key order.
    ByKeys {
        attribute: String,
        keys: Vec<AttrValue>,
    },
    /// Provably empty for any store state.
    Empty,
}

/// Why a descriptor cannot be served from the snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MissReason {
    Locking,
    Projection,
    Joins,
    OpaqueFilter,
    MultipleFilters,
    OrderedFilter,
    LimitBeyondOne,
    UnhashedAttribute,
    ForeignOrder,
    NotPopulated,
}

/// Outcome of classifying one descriptor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    Hit(Plan),
    Miss(MissReason),
}

/// Decide whether `descriptor` can be answered from the snapshot.
///
/// First match wins:
///
/// 1. `locking`, `projection`, `joins` flags miss unconditionally.
/// 2. Any opaque predicate misses.
/// 3. More than one filter misses.
/// 4. One equality filter: explicit order or a limit past 1 misses; the
///    attribute must be hashed; an empty key list hits [`Plan::Empty`]
///    before the status is even consulted; anything else needs `Cached`.
///    A non-empty key list with a limit misses (the served plan has no
///    truncation step).
/// 5. No filters: only the configured order (or none) can be served; no
///    limit hits [`Plan::All`], limit 1 hits [`Plan::First`].
pub fn classify(
    descriptor: &QueryDescriptor,
    options: &CacheOptions,
    status: CacheStatus,
) -> Decision {
    if descriptor.locking {
        return Decision::Miss(MissReason::Locking);
    }
    if descriptor.projection {
        return Decision::Miss(MissReason::Projection);
    }
    if descriptor.joins {
        return Decision::Miss(MissReason::Joins);
    }
    if descriptor
        .filters
        .iter()
        .any(|f| matches!(f, Filter::Opaque { .. }))
    {
        return Decision::Miss(MissReason::OpaqueFilter);
    }
    match descriptor.filters.as_slice() {
        [] => unfiltered(descriptor, options, status),
        [Filter::Eq { attribute, key }] => keyed(attribute, key, descriptor, options, status),
        _ => Decision::Miss(MissReason::MultipleFilters),
    }
}

fn keyed(
    attribute: &str,
    key: &FilterKey,
    descriptor: &QueryDescriptor,
    options: &CacheOptions,
    status: CacheStatus,
) -> Decision {
    if descriptor.order != OrderSpec::Unspecified {
        return Decision::Miss(MissReason::OrderedFilter);
    }
    if matches!(descriptor.limit, Some(n) if n != 1) {
        return Decision::Miss(MissReason::LimitBeyondOne);
    }
    if !options.is_hashed(attribute) {
        return Decision::Miss(MissReason::UnhashedAttribute);
    }
    if let FilterKey::Many(keys) = key {
        if keys.is_empty() {
            return Decision::Hit(Plan::Empty);
        }
        // limit 1 over an IN list would need truncation; leave it to the store
        if descriptor.limit.is_some() {
            return Decision::Miss(MissReason::LimitBeyondOne);
        }
    }
    if status != CacheStatus::Cached {
        return Decision::Miss(MissReason::NotPopulated);
    }
    match key {
        FilterKey::Scalar(key) => Decision::Hit(Plan::ByKey {
            attribute: attribute.to_string(),
            key: key.clone(),
        }),
        FilterKey::Many(keys) => Decision::Hit(Plan::ByKeys {
            attribute: attribute.to_string(),
            keys: keys.clone(),
        }),
    }
}

fn unfiltered(
    descriptor: &QueryDescriptor,
    options: &CacheOptions,
    status: CacheStatus,
) -> Decision {
    match &descriptor.order {
        OrderSpec::Unspecified => {}
        // the snapshot is already in configured order; any order satisfies
        // an unordered query, only a foreign order disqualifies
        OrderSpec::Attribute(attribute) if attribute == options.order() => {}
        _ => return Decision::Miss(MissReason::ForeignOrder),
    }
    match descriptor.limit {
        None | Some(1) => {
            if status != CacheStatus::Cached {
                return Decision::Miss(MissReason::NotPopulated);
            }
            if descriptor.limit.is_none() {
                Decision::Hit(Plan::All)
            } else {
                Decision::Hit(Plan::First)
            }
        }
        Some(_) => Decision::Miss(MissReason::LimitBeyondOne),
    }
}
