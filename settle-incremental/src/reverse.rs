//! Attribute-driven reverse indexes
//!
//! Some attributes are worth looking up by value: every entity with
//! `tag = "button"`, the parent of a given child. Which attributes feed
//! which reverse index is configuration, a list of [`ReverseIndexSpec`]
//! resolved once into a [`ReverseTable`] when a store is built. Diff
//! application then does a single hash lookup per triple.

use crate::index::{shared, Index, MultiIndex, ScalarIndex, Shared};
use serde::{Deserialize, Serialize};
use settle_types::{Attribute, Id, Value};
use std::collections::{BTreeMap, HashMap};

/// Shape of a reverse index
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReverseKind {
    /// value → every entity holding it
    #[default]
    Multi,

    /// value → the last entity that held it
    Scalar,
}

/// One row of the attribute → reverse index table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReverseIndexSpec {
    pub attribute: Attribute,
    pub index: String,
    #[serde(default)]
    pub kind: ReverseKind,
    /// Keep the mapping when the triple is removed
    #[serde(default)]
    pub retain_on_remove: bool,
}

impl ReverseIndexSpec {
    pub fn multi(attribute: impl Into<Attribute>, index: impl Into<String>) -> Self {
        Self {
            attribute: attribute.into(),
            index: index.into(),
            kind: ReverseKind::Multi,
            retain_on_remove: false,
        }
    }

    pub fn scalar(attribute: impl Into<Attribute>, index: impl Into<String>) -> Self {
        Self {
            attribute: attribute.into(),
            index: index.into(),
            kind: ReverseKind::Scalar,
            retain_on_remove: false,
        }
    }

    pub fn retained(mut self) -> Self {
        self.retain_on_remove = true;
        self
    }

    /// The reverse indexes every store gets unless configured otherwise.
    ///
    /// `children` keeps child → parent after removal so a child recreated
    /// under the same id can find its parent again.
    pub fn defaults() -> Vec<ReverseIndexSpec> {
        vec![
            ReverseIndexSpec::multi("tag", "by_tag"),
            ReverseIndexSpec::multi("name", "by_name"),
            ReverseIndexSpec::multi("class", "by_class"),
            ReverseIndexSpec::multi("style", "by_style"),
            ReverseIndexSpec::scalar("children", "by_child").retained(),
        ]
    }
}

/// Handle to a reverse index of either shape
#[derive(Clone)]
pub enum ReverseIndex {
    Multi(Shared<MultiIndex<Value, Id>>),
    Scalar(Shared<ScalarIndex<Value, Id>>),
}

impl ReverseIndex {
    fn new(name: &str, kind: ReverseKind) -> Self {
        match kind {
            ReverseKind::Multi => ReverseIndex::Multi(shared(MultiIndex::new(name))),
            ReverseKind::Scalar => ReverseIndex::Scalar(shared(ScalarIndex::new(name))),
        }
    }

    pub fn kind(&self) -> ReverseKind {
        match self {
            ReverseIndex::Multi(_) => ReverseKind::Multi,
            ReverseIndex::Scalar(_) => ReverseKind::Scalar,
        }
    }

    /// Entities currently indexed under `value`
    pub fn lookup(&self, value: &Value) -> Vec<Id> {
        match self {
            ReverseIndex::Multi(index) => index.read().get(value).to_vec(),
            ReverseIndex::Scalar(index) => index.read().get(value).cloned().into_iter().collect(),
        }
    }

    pub fn as_multi(&self) -> Option<&Shared<MultiIndex<Value, Id>>> {
        match self {
            ReverseIndex::Multi(index) => Some(index),
            ReverseIndex::Scalar(_) => None,
        }
    }

    fn insert(&self, value: &Value, entity: &Id) {
        match self {
            ReverseIndex::Multi(index) => index.write().insert(value.clone(), entity.clone()),
            ReverseIndex::Scalar(index) => index.write().insert(value.clone(), entity.clone()),
        }
    }

    fn remove(&self, value: &Value, entity: &Id) {
        match self {
            ReverseIndex::Multi(index) => {
                index.write().remove(value, entity);
            }
            ReverseIndex::Scalar(index) => {
                let mut index = index.write();
                // Another entity may have claimed the value since.
                if index.get(value) == Some(entity) {
                    index.remove_key(value);
                }
            }
        }
    }

    pub(crate) fn dispatch_if_dirty(&self) -> bool {
        match self {
            ReverseIndex::Multi(index) => index.read().dispatch_if_dirty(),
            ReverseIndex::Scalar(index) => index.read().dispatch_if_dirty(),
        }
    }

    pub(crate) fn clear_dirty(&self) {
        match self {
            ReverseIndex::Multi(index) => index.write().clear_dirty(),
            ReverseIndex::Scalar(index) => index.write().clear_dirty(),
        }
    }
}

impl std::fmt::Debug for ReverseIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ReverseIndex::Multi(index) => std::fmt::Debug::fmt(&*index.read(), f),
            ReverseIndex::Scalar(index) => std::fmt::Debug::fmt(&*index.read(), f),
        }
    }
}

#[derive(Debug, Clone)]
struct Route {
    index: ReverseIndex,
    retain_on_remove: bool,
}

/// Attribute → reverse index routes, resolved once per store
#[derive(Debug, Clone, Default)]
pub struct ReverseTable {
    routes: HashMap<Attribute, Vec<Route>>,
    indexes: BTreeMap<String, ReverseIndex>,
}

impl ReverseTable {
    pub fn new(specs: &[ReverseIndexSpec]) -> Self {
        let mut table = ReverseTable::default();
        for spec in specs {
            let index = match table.indexes.get(&spec.index) {
                Some(existing) if existing.kind() == spec.kind => existing.clone(),
                Some(existing) => {
                    tracing::warn!(
                        index = %spec.index,
                        attribute = %spec.attribute,
                        existing = ?existing.kind(),
                        requested = ?spec.kind,
                        "reverse index declared with conflicting kinds; ignoring"
                    );
                    continue;
                }
                None => {
                    let index = ReverseIndex::new(&spec.index, spec.kind);
                    table.indexes.insert(spec.index.clone(), index.clone());
                    index
                }
            };
            table.routes.entry(spec.attribute.clone()).or_default().push(Route {
                index,
                retain_on_remove: spec.retain_on_remove,
            });
        }
        table
    }

    pub fn get(&self, name: &str) -> Option<&ReverseIndex> {
        self.indexes.get(name)
    }

    /// The first multi index fed by `attribute`
    pub fn multi_for(&self, attribute: &Attribute) -> Option<&Shared<MultiIndex<Value, Id>>> {
        self.routes
            .get(attribute)?
            .iter()
            .find_map(|route| route.index.as_multi())
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.indexes.keys().map(String::as_str)
    }

    pub fn indexes(&self) -> impl Iterator<Item = &ReverseIndex> {
        self.indexes.values()
    }

    pub(crate) fn on_insert(&self, entity: &Id, attribute: &Attribute, value: &Value) {
        if let Some(routes) = self.routes.get(attribute) {
            for route in routes {
                route.index.insert(value, entity);
            }
        }
    }

    pub(crate) fn on_remove(&self, entity: &Id, attribute: &Attribute, value: &Value) {
        if let Some(routes) = self.routes.get(attribute) {
            for route in routes.iter().filter(|r| !r.retain_on_remove) {
                route.index.remove(value, entity);
            }
        }
    }
}
