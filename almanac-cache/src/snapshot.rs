//! Immutable snapshot of one enumeration table.
//!
//! Built in one pass per population: rows in configured order, one equality
//! index per hashed attribute, the constant registry, and the build
//! timestamp. Nothing here mutates after construction; readers share the
//! snapshot through `Arc` and receive clones or shared slices.

use crate::constants::{ConstantRegistry, Namer};
use almanac_core::{AttrValue, CacheOptions, Enumerated, ID_ATTRIBUTE};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;

pub struct Snapshot<E> {
    rows: Arc<[E]>,
    indices: HashMap<String, HashMap<AttrValue, usize>>,
    constants: ConstantRegistry,
    populated_at: DateTime<Utc>,
}

impl<E: Enumerated> Snapshot<E> {
    /// Freeze fetched rows into the published form.
    ///
    /// The `id` index is built from `Enumerated::id`, every other hashed
    /// attribute from `attr`. Duplicate values under one attribute: the last
    /// row in snapshot order wins. NULL values are not indexed.
    pub(crate) fn build(rows: Vec<E>, options: &CacheOptions, namer: &Namer<E>) -> Self {
        let mut indices: HashMap<String, HashMap<AttrValue, usize>> =
            HashMap::with_capacity(options.hashed().len());
        for attribute in options.hashed() {
            let mut index = HashMap::with_capacity(rows.len());
            for (position, row) in rows.iter().enumerate() {
                let value = if attribute.as_str() == ID_ATTRIBUTE {
                    Some(AttrValue::Int(row.id()))
                } else {
                    row.attr(attribute)
                };
                if let Some(value) = value {
                    index.insert(value, position);
                }
            }
            indices.insert(attribute.clone(), index);
        }
        let constants = ConstantRegistry::register(&rows, namer);
        Self {
            rows: Arc::from(rows),
            indices,
            constants,
            populated_at: Utc::now(),
        }
    }

    /// Shared view of every row, configured order.
    pub fn rows(&self) -> Arc<[E]> {
        Arc::clone(&self.rows)
    }

    pub fn first(&self) -> Option<&E> {
        self.rows.first()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Index lookup. `None` covers both "attribute not indexed" and "key
    /// absent"; the store layer rules out the former before calling.
    pub fn find(&self, attribute: &str, key: &AttrValue) -> Option<&E> {
        self.indices
            .get(attribute)?
            .get(key)
            .map(|&position| &self.rows[position])
    }

    /// Constant lookup by registered (upper-case) name.
    pub fn resolve(&self, name: &str) -> Option<&E> {
        self.constants
            .position(name)
            .map(|position| &self.rows[position])
    }

    pub fn constants(&self) -> &ConstantRegistry {
        &self.constants
    }

    pub fn populated_at(&self) -> DateTime<Utc> {
        self.populated_at
    }
}
