//! Entity-centric records
//!
//! A [`Record`] is the materialised view of every triple about one entity:
//! attribute name to an unordered multiset of values. An attribute that is
//! present always has at least one value; emptying it removes the key.

use serde::Serialize;
use settle_types::{Attribute, Id, Triple, Value};
use std::collections::BTreeMap;

/// What happened when a value was removed from a record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Removal {
    /// One occurrence removed; others remain
    Removed,

    /// The last value was removed and the attribute dropped
    Pruned,

    /// The attribute was not present
    MissingAttribute,

    /// The attribute was present but did not hold the value
    MissingValue,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct Record {
    attributes: BTreeMap<Attribute, Vec<Value>>,
}

impl Record {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, attribute: &str) -> Option<&[Value]> {
        self.attributes
            .get(&Attribute::new(attribute))
            .map(Vec::as_slice)
    }

    pub fn values(&self, attribute: &Attribute) -> &[Value] {
        self.attributes
            .get(attribute)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn has(&self, attribute: &Attribute, value: &Value) -> bool {
        self.values(attribute).contains(value)
    }

    /// Add one occurrence; returns the number of values now held.
    pub fn add(&mut self, attribute: Attribute, value: Value) -> usize {
        let values = self.attributes.entry(attribute).or_default();
        values.push(value);
        values.len()
    }

    pub fn remove(&mut self, attribute: &Attribute, value: &Value) -> Removal {
        let Some(values) = self.attributes.get_mut(attribute) else {
            return Removal::MissingAttribute;
        };
        let Some(ix) = values.iter().position(|v| v == value) else {
            return Removal::MissingValue;
        };
        values.swap_remove(ix);
        if values.is_empty() {
            self.attributes.remove(attribute);
            Removal::Pruned
        } else {
            Removal::Removed
        }
    }

    pub fn attributes(&self) -> impl Iterator<Item = &Attribute> {
        self.attributes.keys()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Attribute, &[Value])> {
        self.attributes.iter().map(|(a, vs)| (a, vs.as_slice()))
    }

    /// Number of attributes present
    pub fn len(&self) -> usize {
        self.attributes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.attributes.is_empty()
    }

    /// The triples this record was built from
    pub fn triples(&self, entity: &Id) -> Vec<Triple> {
        self.iter()
            .flat_map(|(a, vs)| {
                vs.iter().map(move |v| Triple {
                    e: entity.clone(),
                    a: a.clone(),
                    v: v.clone(),
                })
            })
            .collect()
    }
}
