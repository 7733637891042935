//! Change batches
//!
//! A [`Changes`] batch stages actions without touching any store. On
//! commit the actions are resolved in order against current state, each one
//! seeing the effect of those before it, into one net [`Diff`] per
//! database. Databases hold sets of facts, so adding a fact that already
//! holds resolves to nothing. Nothing is resolved if any action targets an
//! unregistered database.

use crate::action::Action;
use crate::database::Database;
use crate::error::{EvalError, Result};
use settle_incremental::RecordStore;
use settle_types::{Attribute, Diff, Id, Triple, Value};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Changes {
    actions: Vec<Action>,
}

impl Changes {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, action: Action) {
        self.actions.push(action);
    }

    pub fn extend(&mut self, actions: impl IntoIterator<Item = Action>) {
        self.actions.extend(actions);
    }

    /// Append another batch after this one.
    pub fn append(&mut self, other: Changes) {
        self.actions.extend(other.actions);
    }

    pub fn actions(&self) -> &[Action] {
        &self.actions
    }

    pub fn len(&self) -> usize {
        self.actions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    /// Resolve the batch into one net diff per target database.
    pub fn commit(self, databases: &[Database]) -> Result<BTreeMap<String, Diff>> {
        let find = |name: &str| databases.iter().find(|db| db.name() == name);
        if let Some(action) = self.actions.iter().find(|a| find(a.db()).is_none()) {
            return Err(EvalError::UnknownDatabase(action.db().to_string()));
        }

        let mut diffs: BTreeMap<String, Diff> = BTreeMap::new();
        for action in self.actions {
            let Some(db) = find(action.db()) else {
                continue;
            };
            let store = db.store();
            let diff = diffs.entry(db.name().to_string()).or_default();
            resolve(store, diff, action);
        }
        diffs.retain(|_, diff| !diff.is_empty());
        Ok(diffs)
    }
}

impl From<Vec<Action>> for Changes {
    fn from(actions: Vec<Action>) -> Self {
        Self { actions }
    }
}

impl FromIterator<Action> for Changes {
    fn from_iter<T: IntoIterator<Item = Action>>(iter: T) -> Self {
        Self {
            actions: iter.into_iter().collect(),
        }
    }
}

/// Values of `e.a` as the store would hold them after `pending`.
fn overlay_values(store: &RecordStore, pending: &Diff, e: &Id, a: &Attribute) -> Vec<Value> {
    let mut values = store.values(e, a);
    for triple in pending.remove.iter().filter(|t| &t.e == e && &t.a == a) {
        if let Some(ix) = values.iter().position(|v| v == &triple.v) {
            values.swap_remove(ix);
        }
    }
    values.extend(
        pending
            .insert
            .iter()
            .filter(|t| &t.e == e && &t.a == a)
            .map(|t| t.v.clone()),
    );
    values
}

fn resolve(store: &RecordStore, diff: &mut Diff, action: Action) {
    match action {
        Action::Add { db, triple } => {
            if overlay_values(store, diff, &triple.e, &triple.a).contains(&triple.v) {
                tracing::trace!(%db, %triple, "already present");
            } else {
                diff.merge(Diff::from_parts(vec![], vec![triple]));
            }
        }
        Action::Remove { db, triple } => {
            if overlay_values(store, diff, &triple.e, &triple.a).contains(&triple.v) {
                diff.merge(Diff::from_parts(vec![triple], vec![]));
            } else {
                tracing::debug!(%db, %triple, "nothing to remove");
            }
        }
        Action::Set { e, a, v, .. } => {
            let current = overlay_values(store, diff, &e, &a);
            let remove = current
                .into_iter()
                .map(|old| Triple::new(e.clone(), a.clone(), old))
                .collect();
            diff.merge(Diff::from_parts(remove, vec![Triple { e, a, v }]));
        }
        Action::Erase { e, a, .. } => {
            let current = overlay_values(store, diff, &e, &a);
            let remove = current
                .into_iter()
                .map(|old| Triple::new(e.clone(), a.clone(), old))
                .collect();
            diff.merge(Diff::from_parts(remove, vec![]));
        }
    }
}
