//! Constant registration and resolution.
//!
//! Enumeration rows double as named constants: a `Gender` row whose name is
//! `"male"` is reachable as `MALE`. Names are computed once per population
//! from the configured source, upper-cased, and resolved by exact match.

use almanac_core::{AttrValue, CacheOptions, ConstantSource, Enumerated};
use std::collections::HashMap;
use std::sync::Arc;

/// Where one entity's constant name comes from.
///
/// Attribute-sourced names must be text; rows whose source value is not text
/// are skipped (a number cannot name a constant). A custom namer sidesteps
/// that restriction by producing the string itself.
pub(crate) enum Namer<E> {
    Disabled,
    Attribute(String),
    Custom(Arc<dyn Fn(&E) -> String + Send + Sync>),
}

impl<E: Enumerated> Namer<E> {
    pub(crate) fn from_options(options: &CacheOptions) -> Self {
        match options.constantize() {
            ConstantSource::Disabled => Namer::Disabled,
            ConstantSource::Attribute(attribute) => Namer::Attribute(attribute.clone()),
        }
    }

    pub(crate) fn is_disabled(&self) -> bool {
        matches!(self, Namer::Disabled)
    }

    fn name_for(&self, row: &E) -> Option<String> {
        match self {
            Namer::Disabled => None,
            Namer::Attribute(attribute) => match row.attr(attribute) {
                Some(AttrValue::Text(name)) => Some(name),
                Some(other) => {
                    tracing::warn!(
                        entity = E::entity_name(),
                        attribute = attribute.as_str(),
                        value = %other,
                        "constant source is not text, row skipped"
                    );
                    None
                }
                // NULL source value: the row simply has no constant
                None => None,
            },
            Namer::Custom(namer) => Some(namer(row)),
        }
    }
}

/// Upper-cased constant names mapped to snapshot row positions.
///
/// Rebuilt from scratch on every population; name collisions follow the same
/// policy as the equality indices, last row in snapshot order wins.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConstantRegistry {
    names: HashMap<String, usize>,
}

impl ConstantRegistry {
    /// Register every nameable row of a fresh snapshot.
    pub(crate) fn register<E: Enumerated>(rows: &[E], namer: &Namer<E>) -> Self {
        let mut names = HashMap::new();
        for (position, row) in rows.iter().enumerate() {
            if let Some(name) = namer.name_for(row) {
                names.insert(name.to_uppercase(), position);
            }
        }
        Self { names }
    }

    /// Row position registered under `name`, exact match.
    pub(crate) fn position(&self, name: &str) -> Option<usize> {
        self.names.get(name).copied()
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    /// Registered names, unordered.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.names.keys().map(String::as_str)
    }
}
