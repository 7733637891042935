//! State diffs
//!
//! A [`Diff`] is one unit of state change: removals and insertions of
//! triples. Consumers always apply removals before insertions.

use crate::eav::Triple;
use serde::{Deserialize, Serialize};

/// An ordered pair of removals and insertions
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diff {
    #[serde(default)]
    pub remove: Vec<Triple>,
    #[serde(default)]
    pub insert: Vec<Triple>,
}

impl Diff {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_parts(remove: Vec<Triple>, insert: Vec<Triple>) -> Self {
        Self { remove, insert }
    }

    pub fn is_empty(&self) -> bool {
        self.remove.is_empty() && self.insert.is_empty()
    }

    /// Total number of triples carried
    pub fn len(&self) -> usize {
        self.remove.len() + self.insert.len()
    }

    pub fn push_remove(&mut self, triple: Triple) {
        self.remove.push(triple);
    }

    pub fn push_insert(&mut self, triple: Triple) {
        self.insert.push(triple);
    }

    /// Append another diff without cancelling anything
    pub fn extend(&mut self, other: Diff) {
        self.remove.extend(other.remove);
        self.insert.extend(other.insert);
    }

    /// Fold a later diff into this one, producing the net change.
    ///
    /// A removal in `later` cancels one matching insertion made earlier and
    /// an insertion cancels one matching earlier removal.
    pub fn merge(&mut self, later: Diff) {
        for triple in later.remove {
            if let Some(ix) = self.insert.iter().position(|t| t == &triple) {
                self.insert.swap_remove(ix);
            } else {
                self.remove.push(triple);
            }
        }
        for triple in later.insert {
            if let Some(ix) = self.remove.iter().position(|t| t == &triple) {
                self.remove.swap_remove(ix);
            } else {
                self.insert.push(triple);
            }
        }
    }

    /// The diff that undoes this one
    pub fn invert(&self) -> Diff {
        Diff {
            remove: self.insert.clone(),
            insert: self.remove.clone(),
        }
    }

    /// Sort both sides; useful before comparing diffs built in different orders.
    pub fn normalized(mut self) -> Diff {
        self.remove.sort();
        self.insert.sort();
        self
    }
}
