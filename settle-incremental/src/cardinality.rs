//! Attribute cardinality
//!
//! Whether an attribute holds a single value or a multiset is database
//! configuration, not something derived from the attribute's name.
//! Attributes without an explicit entry are multi-valued.

use serde::{Deserialize, Serialize};
use settle_types::Attribute;
use std::collections::HashMap;
use std::fmt;

/// How many values an attribute may hold per entity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Cardinality {
    /// At most one value; a second value is a structural anomaly
    One,

    /// Any number of values, duplicates counted separately
    #[default]
    Many,
}

impl Cardinality {
    /// Whether `count` values are acceptable
    pub fn admits(&self, count: usize) -> bool {
        match self {
            Cardinality::One => count <= 1,
            Cardinality::Many => true,
        }
    }
}

impl fmt::Display for Cardinality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Cardinality::One => write!(f, "one"),
            Cardinality::Many => write!(f, "many"),
        }
    }
}

/// Per-attribute cardinality lookup
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CardinalityTable {
    entries: HashMap<Attribute, Cardinality>,
}

impl CardinalityTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, attribute: impl Into<Attribute>, cardinality: Cardinality) {
        self.entries.insert(attribute.into(), cardinality);
    }

    pub fn with(mut self, attribute: impl Into<Attribute>, cardinality: Cardinality) -> Self {
        self.set(attribute, cardinality);
        self
    }

    pub fn get(&self, attribute: &Attribute) -> Cardinality {
        self.entries.get(attribute).copied().unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl FromIterator<(Attribute, Cardinality)> for CardinalityTable {
    fn from_iter<T: IntoIterator<Item = (Attribute, Cardinality)>>(iter: T) -> Self {
        Self {
            entries: iter.into_iter().collect(),
        }
    }
}
