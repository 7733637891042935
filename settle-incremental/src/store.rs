//! Record store
//!
//! A [`RecordStore`] turns a stream of [`Diff`]s into entity records and
//! keeps a family of indexes in step with them:
//!
//! - `records`: entity → [`Record`]
//! - `entity_dirty`: entity → attributes changed this round, wiped at the
//!   very end of each round so its subscribers see the full picture
//! - `ave`: (attribute, value) → entities, used by joins
//! - reverse indexes from the configured [`ReverseTable`]
//!
//! Applying a diff is split into mutation ([`RecordStore::apply`]) and
//! propagation ([`RecordStore::dispatch_if_dirty`] then
//! [`RecordStore::clear_dirty`]) so an evaluation can mutate several stores
//! before any subscriber runs.

use crate::cardinality::{Cardinality, CardinalityTable};
use crate::dirty::DirtySet;
use crate::index::{shared, Index, MultiIndex, ScalarIndex, Shared, SubscriberId};
use crate::record::{Record, Removal};
use crate::reverse::{ReverseIndex, ReverseIndexSpec, ReverseTable};
use settle_types::{Attribute, Diff, Id, Triple, Value};
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};

/// Attribute whose echoes of locally sent values are suppressed
pub const ECHO_ATTRIBUTE: &str = "value";

/// A structural anomaly met while applying a diff
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Anomaly {
    /// Removal from an entity with no record
    MissingEntity(Triple),

    /// Removal of an attribute the record does not have
    MissingAttribute(Triple),

    /// Removal of a value the attribute does not hold
    MissingValue(Triple),

    /// Insertion of a second value into a single-valued attribute
    Cardinality(Triple),
}

impl Anomaly {
    pub fn triple(&self) -> &Triple {
        match self {
            Anomaly::MissingEntity(t)
            | Anomaly::MissingAttribute(t)
            | Anomaly::MissingValue(t)
            | Anomaly::Cardinality(t) => t,
        }
    }
}

impl std::fmt::Display for Anomaly {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Anomaly::MissingEntity(t) => write!(f, "remove from missing entity {}", t),
            Anomaly::MissingAttribute(t) => write!(f, "remove of missing attribute {}", t),
            Anomaly::MissingValue(t) => write!(f, "remove of missing value {}", t),
            Anomaly::Cardinality(t) => write!(f, "second value for single-valued attribute {}", t),
        }
    }
}

/// Outcome of one [`RecordStore::apply`]
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ApplyReport {
    /// The triples that actually changed the store
    pub applied: Diff,
    pub anomalies: Vec<Anomaly>,
}

impl ApplyReport {
    pub fn is_empty(&self) -> bool {
        self.applied.is_empty()
    }
}

/// Store construction options
#[derive(Debug, Clone)]
pub struct StoreOptions {
    pub cardinality: CardinalityTable,
    pub reverse_indexes: Vec<ReverseIndexSpec>,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            cardinality: CardinalityTable::new(),
            reverse_indexes: ReverseIndexSpec::defaults(),
        }
    }
}

pub struct RecordStore {
    name: String,
    records: Shared<ScalarIndex<Id, Record>>,
    entity_dirty: Shared<MultiIndex<Id, Attribute>>,
    ave: Shared<MultiIndex<(Attribute, Value), Id>>,
    reverse: ReverseTable,
    cardinality: CardinalityTable,
    sent_values: HashMap<Id, VecDeque<Value>>,
    triple_count: usize,
}

impl RecordStore {
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_options(name, StoreOptions::default())
    }

    pub fn with_options(name: impl Into<String>, options: StoreOptions) -> Self {
        let name = name.into();
        Self {
            records: shared(ScalarIndex::new(format!("{}.records", name))),
            entity_dirty: shared(MultiIndex::new(format!("{}.dirty", name))),
            ave: shared(MultiIndex::new(format!("{}.ave", name))),
            reverse: ReverseTable::new(&options.reverse_indexes),
            cardinality: options.cardinality,
            sent_values: HashMap::new(),
            triple_count: 0,
            name,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn cardinality(&self, attribute: &Attribute) -> Cardinality {
        self.cardinality.get(attribute)
    }

    /// Mutate indexes for `diff`, removals first. No subscriber runs.
    pub fn apply(&mut self, diff: &Diff) -> ApplyReport {
        let mut report = ApplyReport::default();
        let mut echo_candidates: HashSet<Id> = HashSet::new();

        for triple in &diff.remove {
            match self.remove_triple(triple) {
                Ok(()) => {
                    if triple.a == *ECHO_ATTRIBUTE {
                        echo_candidates.insert(triple.e.clone());
                    }
                    report.applied.push_remove(triple.clone());
                }
                Err(anomaly) => {
                    tracing::warn!(store = %self.name, %anomaly, "skipping removal");
                    report.anomalies.push(anomaly);
                }
            }
        }

        for triple in &diff.insert {
            match self.insert_triple(triple) {
                Ok(()) => {
                    if triple.a == *ECHO_ATTRIBUTE {
                        echo_candidates.insert(triple.e.clone());
                    }
                    report.applied.push_insert(triple.clone());
                }
                Err(anomaly) => {
                    tracing::warn!(store = %self.name, %anomaly, "skipping insertion");
                    report.anomalies.push(anomaly);
                }
            }
        }

        for entity in echo_candidates {
            self.settle_echo(&entity);
        }

        report
    }

    fn remove_triple(&mut self, triple: &Triple) -> Result<(), Anomaly> {
        let Triple { e, a, v } = triple;
        let mut records = self.records.write();
        match records.get(e) {
            None => return Err(Anomaly::MissingEntity(triple.clone())),
            Some(record) if record.values(a).is_empty() => {
                return Err(Anomaly::MissingAttribute(triple.clone()))
            }
            Some(record) if !record.has(a, v) => {
                return Err(Anomaly::MissingValue(triple.clone()))
            }
            Some(_) => {}
        }

        let emptied = match records.touch(e) {
            Some(record) => record.remove(a, v) == Removal::Pruned && record.is_empty(),
            None => false,
        };
        if emptied {
            records.remove_key(e);
        }
        drop(records);

        self.entity_dirty.write().insert(e.clone(), a.clone());
        self.ave.write().remove(&(a.clone(), v.clone()), e);
        self.reverse.on_remove(e, a, v);
        self.triple_count -= 1;
        Ok(())
    }

    fn insert_triple(&mut self, triple: &Triple) -> Result<(), Anomaly> {
        let Triple { e, a, v } = triple;
        let cardinality = self.cardinality.get(a);
        {
            let mut records = self.records.write();
            let held = records.get(e).map_or(0, |r| r.values(a).len());
            if !cardinality.admits(held + 1) {
                return Err(Anomaly::Cardinality(triple.clone()));
            }
            records
                .touch_or_insert_with(e.clone(), Record::new)
                .add(a.clone(), v.clone());
        }

        self.entity_dirty.write().insert(e.clone(), a.clone());
        self.ave.write().insert((a.clone(), v.clone()), e.clone());
        self.reverse.on_insert(e, a, v);
        self.triple_count += 1;
        Ok(())
    }

    /// Withdraw the dirty mark for a `value` this client sent itself.
    fn settle_echo(&mut self, entity: &Id) {
        let attribute = Attribute::new(ECHO_ATTRIBUTE);
        let current = {
            let records = self.records.read();
            let values = records.get(entity).map(|r| r.values(&attribute).to_vec());
            values.unwrap_or_default()
        };

        let Some(value) = current.first() else {
            self.sent_values.remove(entity);
            return;
        };
        if current.len() > 1 {
            tracing::warn!(store = %self.name, %entity, count = current.len(), "value set more than once");
        }

        let echoed = self
            .sent_values
            .get(entity)
            .and_then(|sent| sent.front())
            .is_some_and(|sent| sent == value);
        if echoed {
            self.entity_dirty.write().remove(entity, &attribute);
            if let Some(sent) = self.sent_values.get_mut(entity) {
                sent.pop_front();
            }
        } else {
            self.sent_values.remove(entity);
        }
    }

    /// Remember a value this client pushed upstream for `entity`.
    pub fn note_sent_value(&mut self, entity: impl Into<Id>, value: impl Into<Value>) {
        self.sent_values
            .entry(entity.into())
            .or_default()
            .push_back(value.into());
    }

    /// Dispatch phase for every index this store owns.
    ///
    /// The entity dirty index runs last so its subscribers can assume
    /// every other index has already reported.
    pub fn dispatch_if_dirty(&self) -> bool {
        let mut any = self.records.read().dispatch_if_dirty();
        any |= self.ave.read().dispatch_if_dirty();
        for index in self.reverse.indexes() {
            any |= index.dispatch_if_dirty();
        }
        any |= self.entity_dirty.read().dispatch_if_dirty();
        any
    }

    /// Clear phase. Only call once every store of the round has dispatched.
    pub fn clear_dirty(&mut self) {
        self.records.write().clear_dirty();
        self.ave.write().clear_dirty();
        for index in self.reverse.indexes() {
            index.clear_dirty();
        }
        self.entity_dirty.write().clear_index();
    }

    pub fn is_dirty(&self) -> bool {
        self.records.read().is_dirty() || self.entity_dirty.read().is_dirty()
    }

    /// Apply, dispatch and clear in one go, for a store that is its own round.
    pub fn apply_diff(&mut self, diff: &Diff) -> ApplyReport {
        let report = self.apply(diff);
        self.dispatch_if_dirty();
        self.clear_dirty();
        report
    }

    /// Notify `callback` whenever records gain or lose `tag`.
    ///
    /// The callback receives entities that now carry the tag and were
    /// touched this round, entities that lost it, and the current records
    /// of the former. Returns `None` when no multi reverse index is fed by
    /// `tag`.
    pub fn subscribe_to_tag<F>(&self, tag: impl Into<Value>, callback: F) -> Option<SubscriberId>
    where
        F: Fn(&[Id], &[Id], &BTreeMap<Id, Record>) + Send + Sync + 'static,
    {
        let by_tag = self.reverse.multi_for(&Attribute::new("tag"))?.clone();
        let records = self.records.clone();
        let tag = tag.into();
        let tag_attribute = Attribute::new("tag");

        let id = self.entity_dirty.write().subscribe(
            move |_: &MultiIndex<Id, Attribute>, dirty: &DirtySet<Id, Attribute>| {
                let records = records.read();
                let has_tag =
                    |id: &Id| records.get(id).is_some_and(|r| r.has(&tag_attribute, &tag));

                let mut removes: Vec<Id> = by_tag
                    .read()
                    .dirty()
                    .values(&tag)
                    .iter()
                    .filter(|id| !has_tag(id))
                    .cloned()
                    .collect();
                removes.sort();
                removes.dedup();

                let mut inserts = Vec::new();
                let mut current = BTreeMap::new();
                for id in dirty.keys() {
                    if let Some(record) = records.get(id).filter(|_| has_tag(id)) {
                        inserts.push(id.clone());
                        current.insert(id.clone(), record.clone());
                    }
                }
                inserts.sort();

                callback(&inserts, &removes, &current);
            },
        );
        Some(id)
    }

    pub fn record(&self, entity: &Id) -> Option<Record> {
        self.records.read().get(entity).cloned()
    }

    pub fn values(&self, entity: &Id, attribute: &Attribute) -> Vec<Value> {
        self.records
            .read()
            .get(entity)
            .map(|r| r.values(attribute).to_vec())
            .unwrap_or_default()
    }

    pub fn contains(&self, triple: &Triple) -> bool {
        self.records
            .read()
            .get(&triple.e)
            .is_some_and(|r| r.has(&triple.a, &triple.v))
    }

    /// Every stored triple matching the given positions.
    ///
    /// Duplicated facts are returned once per occurrence.
    pub fn scan(&self, e: Option<&Id>, a: Option<&Attribute>, v: Option<&Value>) -> Vec<Triple> {
        let records = self.records.read();
        let matching = |entity: &Id, record: &Record, out: &mut Vec<Triple>| {
            for (attribute, values) in record.iter() {
                if a.is_some_and(|a| a != attribute) {
                    continue;
                }
                for value in values {
                    if v.is_some_and(|v| v != value) {
                        continue;
                    }
                    out.push(Triple {
                        e: entity.clone(),
                        a: attribute.clone(),
                        v: value.clone(),
                    });
                }
            }
        };

        let mut out = Vec::new();
        match (e, a, v) {
            (Some(entity), _, _) => {
                if let Some(record) = records.get(entity) {
                    matching(entity, record, &mut out);
                }
            }
            (None, Some(attribute), Some(value)) => {
                let ave = self.ave.read();
                for entity in ave.get(&(attribute.clone(), value.clone())) {
                    out.push(Triple {
                        e: entity.clone(),
                        a: attribute.clone(),
                        v: value.clone(),
                    });
                }
            }
            _ => {
                for (entity, record) in records.iter() {
                    matching(entity, record, &mut out);
                }
            }
        }
        out
    }

    /// All triples, sorted
    pub fn triples(&self) -> Vec<Triple> {
        let mut out = self.scan(None, None, None);
        out.sort();
        out
    }

    /// The diff that empties this store
    pub fn clear_diff(&self) -> Diff {
        Diff::from_parts(self.triples(), Vec::new())
    }

    pub fn entity_count(&self) -> usize {
        self.records.read().len()
    }

    pub fn triple_count(&self) -> usize {
        self.triple_count
    }

    pub fn is_empty(&self) -> bool {
        self.triple_count == 0
    }

    pub fn records(&self) -> &Shared<ScalarIndex<Id, Record>> {
        &self.records
    }

    pub fn entity_dirty(&self) -> &Shared<MultiIndex<Id, Attribute>> {
        &self.entity_dirty
    }

    pub fn ave(&self) -> &Shared<MultiIndex<(Attribute, Value), Id>> {
        &self.ave
    }

    pub fn reverse_index(&self, name: &str) -> Option<&ReverseIndex> {
        self.reverse.get(name)
    }

    pub fn reverse_indexes(&self) -> &ReverseTable {
        &self.reverse
    }
}

impl std::fmt::Debug for RecordStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecordStore")
            .field("name", &self.name)
            .field("entities", &self.entity_count())
            .field("triples", &self.triple_count)
            .field("reverse", &self.reverse.names().collect::<Vec<_>>())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn diff(remove: Vec<Triple>, insert: Vec<Triple>) -> Diff {
        Diff::from_parts(remove, insert)
    }

    #[test]
    fn test_insert_builds_record() {
        let mut store = RecordStore::new("test");
        let report = store.apply_diff(&diff(
            vec![],
            vec![Triple::new("e1", "tag", "click"), Triple::new("e1", "x", 1)],
        ));
        assert!(report.anomalies.is_empty());

        let record = store.record(&Id::new("e1")).unwrap();
        assert_eq!(record.get("tag"), Some(&[Value::from("click")][..]));
        assert_eq!(store.triple_count(), 2);
    }

    #[test]
    fn test_remove_before_insert() {
        let mut store = RecordStore::new("test");
        store.apply_diff(&diff(vec![], vec![Triple::new("e", "x", 1)]));
        store.apply_diff(&diff(
            vec![Triple::new("e", "x", 1)],
            vec![Triple::new("e", "x", 2)],
        ));
        assert_eq!(
            store.values(&Id::new("e"), &Attribute::new("x")),
            vec![Value::from(2)]
        );
    }

    #[test]
    fn test_single_valued_replacement() {
        let options = StoreOptions {
            cardinality: CardinalityTable::new().with("x", Cardinality::One),
            ..StoreOptions::default()
        };
        let mut store = RecordStore::with_options("test", options);
        store.apply_diff(&diff(vec![], vec![Triple::new("e", "x", 1)]));

        let report = store.apply_diff(&diff(
            vec![Triple::new("e", "x", 1)],
            vec![Triple::new("e", "x", 2)],
        ));
        assert!(report.anomalies.is_empty());

        let report = store.apply_diff(&diff(vec![], vec![Triple::new("e", "x", 3)]));
        assert_eq!(
            report.anomalies,
            vec![Anomaly::Cardinality(Triple::new("e", "x", 3))]
        );
        assert_eq!(
            store.values(&Id::new("e"), &Attribute::new("x")),
            vec![Value::from(2)]
        );
    }

    #[test]
    fn test_missing_removals_are_skipped() {
        let mut store = RecordStore::new("test");
        let report = store.apply_diff(&diff(vec![Triple::new("ghost", "x", 1)], vec![]));
        assert_eq!(
            report.anomalies,
            vec![Anomaly::MissingEntity(Triple::new("ghost", "x", 1))]
        );
        assert!(report.applied.is_empty());

        store.apply_diff(&diff(vec![], vec![Triple::new("e", "x", 1)]));
        let report = store.apply_diff(&diff(
            vec![Triple::new("e", "y", 1), Triple::new("e", "x", 9)],
            vec![],
        ));
        assert_eq!(
            report.anomalies,
            vec![
                Anomaly::MissingAttribute(Triple::new("e", "y", 1)),
                Anomaly::MissingValue(Triple::new("e", "x", 9)),
            ]
        );
        assert_eq!(store.triple_count(), 1);
    }

    #[test]
    fn test_skipped_removal_leaves_indexes_clean() {
        let mut store = RecordStore::new("test");
        store.apply(&diff(vec![Triple::new("ghost", "x", 1)], vec![]));
        assert!(!store.records().read().is_dirty());
        assert!(!store.entity_dirty().read().is_dirty());
    }

    #[test]
    fn test_empty_record_is_dropped() {
        let mut store = RecordStore::new("test");
        store.apply_diff(&diff(vec![], vec![Triple::new("e", "x", 1)]));
        store.apply_diff(&diff(vec![Triple::new("e", "x", 1)], vec![]));
        assert!(store.record(&Id::new("e")).is_none());
        assert!(store.is_empty());
    }

    #[test]
    fn test_reverse_indexes_follow_triples() {
        let mut store = RecordStore::new("test");
        store.apply_diff(&diff(
            vec![],
            vec![
                Triple::new("e1", "tag", "button"),
                Triple::new("e2", "tag", "button"),
                Triple::new("p", "children", "e1"),
            ],
        ));
        let by_tag = store.reverse_index("by_tag").unwrap().clone();
        let mut ids = by_tag.lookup(&Value::from("button"));
        ids.sort();
        assert_eq!(ids, vec![Id::new("e1"), Id::new("e2")]);

        store.apply_diff(&diff(
            vec![
                Triple::new("e1", "tag", "button"),
                Triple::new("p", "children", "e1"),
            ],
            vec![],
        ));
        assert_eq!(by_tag.lookup(&Value::from("button")), vec![Id::new("e2")]);
        assert_eq!(
            store.reverse_index("by_child").unwrap().lookup(&Value::from("e1")),
            vec![Id::new("p")]
        );
    }

    #[test]
    fn test_scan_positions() {
        let mut store = RecordStore::new("test");
        store.apply_diff(&diff(
            vec![],
            vec![
                Triple::new("e1", "tag", "a"),
                Triple::new("e2", "tag", "a"),
                Triple::new("e2", "tag", "b"),
            ],
        ));
        let tag = Attribute::new("tag");
        assert_eq!(store.scan(Some(&Id::new("e2")), None, None).len(), 2);
        assert_eq!(store.scan(None, Some(&tag), Some(&Value::from("a"))).len(), 2);
        assert_eq!(store.scan(None, Some(&tag), None).len(), 3);
        assert_eq!(store.scan(None, None, Some(&Value::from("b"))).len(), 1);
        assert!(store.contains(&Triple::new("e1", "tag", "a")));
    }

    #[test]
    fn test_echoed_value_is_not_dirty() {
        let mut store = RecordStore::new("test");
        store.note_sent_value("input", "hello");
        store.apply(&diff(vec![], vec![Triple::new("input", "value", "hello")]));
        assert!(store.entity_dirty().read().get(&Id::new("input")).is_empty());
        store.dispatch_if_dirty();
        store.clear_dirty();

        // A value nobody sent stays dirty.
        store.apply(&diff(
            vec![Triple::new("input", "value", "hello")],
            vec![Triple::new("input", "value", "world")],
        ));
        assert!(!store.entity_dirty().read().get(&Id::new("input")).is_empty());
    }

    #[test]
    fn test_entity_dirty_wiped_after_round() {
        let mut store = RecordStore::new("test");
        store.apply(&diff(vec![], vec![Triple::new("e", "x", 1)]));
        assert_eq!(
            store.entity_dirty().read().get(&Id::new("e")),
            &[Attribute::new("x")]
        );
        store.dispatch_if_dirty();
        store.clear_dirty();
        assert!(store.entity_dirty().read().is_empty());
        assert!(!store.is_dirty());
    }
}
