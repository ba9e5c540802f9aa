//! Almanac Core - Data Types
//!
//! Pure data structures with no behavior. Every other crate in the workspace
//! depends on this one; it contains only the shared vocabulary of the
//! enumeration cache - attribute values, the entity contract, configuration,
//! query descriptors, and the error family.

use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::fmt;
use thiserror::Error;

/// Name of the identity attribute every enumeration row carries.
pub const ID_ATTRIBUTE: &str = "id";

// ============================================================================
// ATTRIBUTE VALUES
// ============================================================================

/// Scalar attribute value of an enumeration row.
///
/// Covers the column types enumeration tables key on. No floating point:
/// approximate values make unusable index keys. The derived ordering compares
/// within a variant naturally and across variants by variant order; store
/// adapters use it for ordered fetches.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum AttrValue {
    Int(i64),
    Text(String),
    Bool(bool),
}

impl AttrValue {
    /// Numeric rendition of this value, if it has one.
    ///
    /// `Text` holding a decimal integer coerces. Identity lookups use this so
    /// string-typed ids from request parameters still match.
    pub fn coerce_int(&self) -> Option<i64> {
        match self {
            AttrValue::Int(n) => Some(*n),
            AttrValue::Text(s) => s.trim().parse::<i64>().ok(),
            AttrValue::Bool(_) => None,
        }
    }

    /// Borrow the text content, if this is a `Text` value.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            AttrValue::Text(s) => Some(s),
            _ => None,
        }
    }
}

impl fmt::Display for AttrValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttrValue::Int(n) => write!(f, "{n}"),
            AttrValue::Text(s) => write!(f, "{s}"),
            AttrValue::Bool(b) => write!(f, "{b}"),
        }
    }
}

impl From<i64> for AttrValue {
    fn from(value: i64) -> Self {
        AttrValue::Int(value)
    }
}

impl From<&str> for AttrValue {
    fn from(value: &str) -> Self {
        AttrValue::Text(value.to_string())
    }
}

impl From<String> for AttrValue {
    fn from(value: String) -> Self {
        AttrValue::Text(value)
    }
}

impl From<bool> for AttrValue {
    fn from(value: bool) -> Self {
        AttrValue::Bool(value)
    }
}

// ============================================================================
// ENTITY CONTRACT
// ============================================================================

/// Contract an entity type implements to be cacheable.
///
/// Entities are opaque to the cache beyond this surface: a stable integer
/// identity plus attribute access by column name. `attr("id")` must return
/// `Some(AttrValue::Int(self.id()))`. `None` from `attr` models SQL NULL;
/// NULL values are never indexed.
pub trait Enumerated: Clone + Send + Sync + 'static {
    /// Type name used in error messages and logs.
    fn entity_name() -> &'static str;

    /// Stable identity (primary key).
    fn id(&self) -> i64;

    /// Attribute lookup by column name.
    fn attr(&self, name: &str) -> Option<AttrValue>;

    /// Every attribute name `attr` understands. Configuration is validated
    /// against this set before any population happens.
    fn attribute_names() -> &'static [&'static str];
}

// ============================================================================
// CACHE STATUS
// ============================================================================

/// Lifecycle of one entity type's cache.
///
/// `Uncached` until the first population, `Caching` while a single task loads
/// the table, `Cached` once the snapshot is published. A reset returns the
/// cache to `Uncached`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CacheStatus {
    Uncached,
    Caching,
    Cached,
}

// ============================================================================
// CONFIGURATION
// ============================================================================

const KNOWN_OPTIONS: &str = "order, hashed, constantize";

/// Where constant names come from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConstantSource {
    /// No constants are registered.
    Disabled,
    /// Names come from this attribute's value per row, upper-cased.
    Attribute(String),
}

/// Per-entity cache configuration.
///
/// Defaults match the common enumeration-table shape: rows ordered by `id`,
/// equality indices on `id` and `name`, constants named by `name`. The `id`
/// attribute is always indexed; it is appended to `hashed` when missing.
/// Fields are private so that invariant holds by construction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheOptions {
    order: String,
    hashed: Vec<String>,
    constantize: ConstantSource,
}

impl Default for CacheOptions {
    fn default() -> Self {
        Self {
            order: ID_ATTRIBUTE.to_string(),
            hashed: vec![ID_ATTRIBUTE.to_string(), "name".to_string()],
            constantize: ConstantSource::Attribute("name".to_string()),
        }
    }
}

impl CacheOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the snapshot ordering attribute.
    pub fn with_order(mut self, attribute: impl Into<String>) -> Self {
        self.order = attribute.into();
        self
    }

    /// Replace the set of indexed attributes. Duplicates collapse to their
    /// first occurrence and `id` is appended when missing.
    pub fn with_hashed<I, S>(mut self, attributes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.hashed = attributes.into_iter().map(Into::into).collect();
        self.normalize();
        self
    }

    /// Name constants after this attribute's value per row.
    pub fn with_constants_from(mut self, attribute: impl Into<String>) -> Self {
        self.constantize = ConstantSource::Attribute(attribute.into());
        self
    }

    /// Register no constants at all.
    pub fn without_constants(mut self) -> Self {
        self.constantize = ConstantSource::Disabled;
        self
    }

    pub fn order(&self) -> &str {
        &self.order
    }

    pub fn hashed(&self) -> &[String] {
        &self.hashed
    }

    pub fn constantize(&self) -> &ConstantSource {
        &self.constantize
    }

    /// Whether an equality index exists for `attribute`.
    pub fn is_hashed(&self, attribute: &str) -> bool {
        self.hashed.iter().any(|h| h == attribute)
    }

    /// Parse options from a JSON object.
    ///
    /// Unrecognized keys fail fast: a typo'd option would otherwise silently
    /// fall back to a default and misconfigure the cache for its lifetime.
    ///
    /// Accepted keys: `order` (string), `hashed` (array of strings),
    /// `constantize` (string, or `false`/`null` to disable).
    pub fn from_json(value: &serde_json::Value) -> Result<Self, ConfigError> {
        let map = value.as_object().ok_or_else(|| ConfigError::InvalidValue {
            option: "options".to_string(),
            reason: "expected a JSON object".to_string(),
        })?;

        let mut options = Self::default();
        for (key, val) in map {
            match key.as_str() {
                "order" => {
                    let order = val.as_str().ok_or_else(|| ConfigError::InvalidValue {
                        option: "order".to_string(),
                        reason: "expected an attribute name".to_string(),
                    })?;
                    options.order = order.to_string();
                }
                "hashed" => {
                    let items = val.as_array().ok_or_else(|| ConfigError::InvalidValue {
                        option: "hashed".to_string(),
                        reason: "expected an array of attribute names".to_string(),
                    })?;
                    let mut hashed = Vec::with_capacity(items.len());
                    for item in items {
                        let attr = item.as_str().ok_or_else(|| ConfigError::InvalidValue {
                            option: "hashed".to_string(),
                            reason: "expected an array of attribute names".to_string(),
                        })?;
                        hashed.push(attr.to_string());
                    }
                    options.hashed = hashed;
                }
                "constantize" => {
                    options.constantize = match val {
                        serde_json::Value::String(attr) => {
                            ConstantSource::Attribute(attr.clone())
                        }
                        serde_json::Value::Bool(false) | serde_json::Value::Null => {
                            ConstantSource::Disabled
                        }
                        _ => {
                            return Err(ConfigError::InvalidValue {
                                option: "constantize".to_string(),
                                reason: "expected an attribute name, false, or null"
                                    .to_string(),
                            })
                        }
                    };
                }
                unknown => {
                    return Err(ConfigError::UnknownOption {
                        option: unknown.to_string(),
                        expected: KNOWN_OPTIONS.to_string(),
                    })
                }
            }
        }
        options.normalize();
        Ok(options)
    }

    /// Check every configured attribute against the entity's attribute set.
    ///
    /// Runs at cache construction, before any population - a bad attribute
    /// name is fatal to the wiring, not a runtime surprise.
    pub fn validate_for<E: Enumerated>(&self) -> Result<(), ConfigError> {
        let known = E::attribute_names();
        if !known.contains(&self.order.as_str()) {
            return Err(ConfigError::UnknownAttribute {
                option: "order".to_string(),
                attribute: self.order.clone(),
                entity: E::entity_name().to_string(),
            });
        }
        for attr in &self.hashed {
            if !known.contains(&attr.as_str()) {
                return Err(ConfigError::UnknownAttribute {
                    option: "hashed".to_string(),
                    attribute: attr.clone(),
                    entity: E::entity_name().to_string(),
                });
            }
        }
        if let ConstantSource::Attribute(attr) = &self.constantize {
            if !known.contains(&attr.as_str()) {
                return Err(ConfigError::UnknownAttribute {
                    option: "constantize".to_string(),
                    attribute: attr.clone(),
                    entity: E::entity_name().to_string(),
                });
            }
        }
        Ok(())
    }

    fn normalize(&mut self) {
        let mut seen: Vec<String> = Vec::with_capacity(self.hashed.len() + 1);
        for attr in self.hashed.drain(..) {
            if !seen.contains(&attr) {
                seen.push(attr);
            }
        }
        if !seen.iter().any(|a| a == ID_ATTRIBUTE) {
            seen.push(ID_ATTRIBUTE.to_string());
        }
        self.hashed = seen;
    }
}

// ============================================================================
// QUERY DESCRIPTORS
// ============================================================================

/// Equality key: one value or a set of alternatives.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum FilterKey {
    Scalar(AttrValue),
    Many(Vec<AttrValue>),
}

/// One predicate of a query descriptor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Filter {
    /// Plain equality on one attribute.
    Eq { attribute: String, key: FilterKey },
    /// A predicate the boundary could not decompose (SQL fragment,
    /// sub-select, inequality). The label exists for logs only.
    Opaque { label: String },
}

/// Requested result ordering.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderSpec {
    /// No order requested; any row order is a valid answer.
    Unspecified,
    /// Single attribute, ascending.
    Attribute(String),
    /// An order expression the boundary could not decompose.
    Opaque,
}

impl Default for OrderSpec {
    fn default() -> Self {
        OrderSpec::Unspecified
    }
}

/// Shape of one store query as seen at the facade boundary.
///
/// Mirrors what a generic relational query-builder can express. The
/// classifier inspects it; store adapters execute it. Deserialization
/// fills omitted fields with their defaults, so partial descriptors in
/// JSON stay valid.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct QueryDescriptor {
    pub filters: Vec<Filter>,
    pub order: OrderSpec,
    pub limit: Option<u64>,
    pub projection: bool,
    pub joins: bool,
    pub locking: bool,
}

impl QueryDescriptor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an equality predicate on one attribute.
    pub fn filter_eq(mut self, attribute: impl Into<String>, key: impl Into<AttrValue>) -> Self {
        self.filters.push(Filter::Eq {
            attribute: attribute.into(),
            key: FilterKey::Scalar(key.into()),
        });
        self
    }

    /// Add an equality predicate matching any of several keys (`IN` list).
    pub fn filter_eq_any<I, V>(mut self, attribute: impl Into<String>, keys: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<AttrValue>,
    {
        self.filters.push(Filter::Eq {
            attribute: attribute.into(),
            key: FilterKey::Many(keys.into_iter().map(Into::into).collect()),
        });
        self
    }

    /// Add a predicate the boundary could not decompose.
    pub fn filter_opaque(mut self, label: impl Into<String>) -> Self {
        self.filters.push(Filter::Opaque {
            label: label.into(),
        });
        self
    }

    /// Request ordering by a single attribute, ascending.
    pub fn order_by(mut self, attribute: impl Into<String>) -> Self {
        self.order = OrderSpec::Attribute(attribute.into());
        self
    }

    /// Request an order expression the boundary could not decompose.
    pub fn order_opaque(mut self) -> Self {
        self.order = OrderSpec::Opaque;
        self
    }

    pub fn limit(mut self, n: u64) -> Self {
        self.limit = Some(n);
        self
    }

    pub fn with_projection(mut self) -> Self {
        self.projection = true;
        self
    }

    pub fn with_joins(mut self) -> Self {
        self.joins = true;
        self
    }

    pub fn with_locking(mut self) -> Self {
        self.locking = true;
        self
    }

    /// This descriptor with equality keys on the identity attribute coerced
    /// to their numeric rendition, so string-typed ids compare the way the
    /// identity index stores them. Keys with no numeric rendition stay
    /// verbatim; they can only ever match nothing. Borrows when every
    /// identity key is already numeric.
    pub fn normalize_id_keys(&self) -> Cow<'_, Self> {
        fn wants_coercion(value: &AttrValue) -> bool {
            !matches!(value, AttrValue::Int(_)) && value.coerce_int().is_some()
        }
        let needs_rewrite = self.filters.iter().any(|filter| match filter {
            Filter::Eq { attribute, key } if attribute == ID_ATTRIBUTE => match key {
                FilterKey::Scalar(value) => wants_coercion(value),
                FilterKey::Many(values) => values.iter().any(wants_coercion),
            },
            _ => false,
        });
        if !needs_rewrite {
            return Cow::Borrowed(self);
        }
        let mut normalized = self.clone();
        for filter in &mut normalized.filters {
            let Filter::Eq { attribute, key } = filter else {
                continue;
            };
            if attribute.as_str() != ID_ATTRIBUTE {
                continue;
            }
            match key {
                FilterKey::Scalar(value) => {
                    if let Some(n) = value.coerce_int() {
                        *value = AttrValue::Int(n);
                    }
                }
                FilterKey::Many(values) => {
                    for value in values {
                        if let Some(n) = value.coerce_int() {
                            *value = AttrValue::Int(n);
                        }
                    }
                }
            }
        }
        Cow::Owned(normalized)
    }
}

// ============================================================================
// ID SELECTION
// ============================================================================

/// Identifier argument accepted by the id finders: one key or a list of keys.
///
/// Carries the caller's shape so results can mirror it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum IdSelector {
    Scalar(AttrValue),
    List(Vec<AttrValue>),
}

impl From<i64> for IdSelector {
    fn from(id: i64) -> Self {
        IdSelector::Scalar(AttrValue::Int(id))
    }
}

impl From<&str> for IdSelector {
    fn from(id: &str) -> Self {
        IdSelector::Scalar(AttrValue::Text(id.to_string()))
    }
}

impl From<String> for IdSelector {
    fn from(id: String) -> Self {
        IdSelector::Scalar(AttrValue::Text(id))
    }
}

impl From<AttrValue> for IdSelector {
    fn from(id: AttrValue) -> Self {
        IdSelector::Scalar(id)
    }
}

impl From<Vec<i64>> for IdSelector {
    fn from(ids: Vec<i64>) -> Self {
        IdSelector::List(ids.into_iter().map(AttrValue::Int).collect())
    }
}

impl From<&[i64]> for IdSelector {
    fn from(ids: &[i64]) -> Self {
        IdSelector::List(ids.iter().copied().map(AttrValue::Int).collect())
    }
}

impl From<Vec<&str>> for IdSelector {
    fn from(ids: Vec<&str>) -> Self {
        IdSelector::List(ids.into_iter().map(AttrValue::from).collect())
    }
}

impl From<Vec<String>> for IdSelector {
    fn from(ids: Vec<String>) -> Self {
        IdSelector::List(ids.into_iter().map(AttrValue::Text).collect())
    }
}

impl From<Vec<AttrValue>> for IdSelector {
    fn from(ids: Vec<AttrValue>) -> Self {
        IdSelector::List(ids)
    }
}

/// Finder result mirroring the [`IdSelector`] shape it was asked with:
/// a scalar selector finds a scalar entity, a list finds a list.
#[derive(Debug, Clone, PartialEq)]
pub enum Selected<E> {
    Scalar(E),
    List(Vec<E>),
}

impl<E> Selected<E> {
    /// Flatten to a vector regardless of shape.
    pub fn into_vec(self) -> Vec<E> {
        match self {
            Selected::Scalar(entity) => vec![entity],
            Selected::List(entities) => entities,
        }
    }

    pub fn scalar(&self) -> Option<&E> {
        match self {
            Selected::Scalar(entity) => Some(entity),
            Selected::List(_) => None,
        }
    }

    pub fn list(&self) -> Option<&[E]> {
        match self {
            Selected::Scalar(_) => None,
            Selected::List(entities) => Some(entities),
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Selected::Scalar(_) => 1,
            Selected::List(entities) => entities.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

// ============================================================================
// ERRORS
// ============================================================================

/// Configuration errors. Fatal at setup time, before any population.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Unknown configuration option `{option}`, expected one of: {expected}")]
    UnknownOption { option: String, expected: String },

    #[error("Invalid value for `{option}`: {reason}")]
    InvalidValue { option: String, reason: String },

    #[error("Unknown attribute `{attribute}` in `{option}` for {entity}")]
    UnknownAttribute {
        option: String,
        attribute: String,
        entity: String,
    },

    #[error("Attribute `{attribute}` is not hashed for {entity} (hashed: {hashed:?})")]
    NotHashed {
        attribute: String,
        entity: String,
        hashed: Vec<String>,
    },

    #[error("Cache for {entity} is already configured")]
    AlreadyConfigured { entity: String },
}

/// Lookup failures surfaced by the erroring finder forms.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum LookupError {
    #[error("{entity} not found for {attribute} = {key}")]
    NotFound {
        entity: String,
        attribute: String,
        key: AttrValue,
    },
}

impl LookupError {
    /// NotFound for entity type `E`.
    pub fn not_found<E: Enumerated>(attribute: impl Into<String>, key: AttrValue) -> Self {
        LookupError::NotFound {
            entity: E::entity_name().to_string(),
            attribute: attribute.into(),
            key,
        }
    }
}

/// Failures reported by a store adapter. The cache propagates these
/// unchanged; it never masks or reinterprets store trouble.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("Store unavailable: {reason}")]
    Unavailable { reason: String },

    #[error("Query failed: {reason}")]
    QueryFailed { reason: String },
}

/// Master error type for almanac operations.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AlmanacError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Lookup error: {0}")]
    Lookup(#[from] LookupError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

/// Result alias using the master error type.
pub type AlmanacResult<T> = Result<T, AlmanacError>;

// ============================================================================
// TESTS
// ============================================================================
