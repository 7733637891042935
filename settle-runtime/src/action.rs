//! Actions: requested mutations of one database
//!
//! Actions are intent, not effect. A [`Changes`](crate::Changes) batch
//! resolves them against current state into a [`Diff`](settle_types::Diff)
//! per database when it is committed.

use serde::{Deserialize, Serialize};
use settle_types::{Attribute, Id, Triple, Value};
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "lowercase")]
#[non_exhaustive]
pub enum Action {
    /// Add one occurrence of a fact
    Add { db: String, triple: Triple },

    /// Remove one occurrence of a fact
    Remove { db: String, triple: Triple },

    /// Replace every value of an attribute with a single value
    Set {
        db: String,
        e: Id,
        a: Attribute,
        v: Value,
    },

    /// Drop an attribute with all of its values
    Erase { db: String, e: Id, a: Attribute },
}

impl Action {
    pub fn add(
        db: impl Into<String>,
        e: impl Into<Id>,
        a: impl Into<Attribute>,
        v: impl Into<Value>,
    ) -> Self {
        Action::Add {
            db: db.into(),
            triple: Triple::new(e, a, v),
        }
    }

    pub fn remove(
        db: impl Into<String>,
        e: impl Into<Id>,
        a: impl Into<Attribute>,
        v: impl Into<Value>,
    ) -> Self {
        Action::Remove {
            db: db.into(),
            triple: Triple::new(e, a, v),
        }
    }

    pub fn set(
        db: impl Into<String>,
        e: impl Into<Id>,
        a: impl Into<Attribute>,
        v: impl Into<Value>,
    ) -> Self {
        Action::Set {
            db: db.into(),
            e: e.into(),
            a: a.into(),
            v: v.into(),
        }
    }

    pub fn erase(db: impl Into<String>, e: impl Into<Id>, a: impl Into<Attribute>) -> Self {
        Action::Erase {
            db: db.into(),
            e: e.into(),
            a: a.into(),
        }
    }

    /// Name of the database this action targets
    pub fn db(&self) -> &str {
        match self {
            Action::Add { db, .. }
            | Action::Remove { db, .. }
            | Action::Set { db, .. }
            | Action::Erase { db, .. } => db,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Action::Add { .. } => "add",
            Action::Remove { .. } => "remove",
            Action::Set { .. } => "set",
            Action::Erase { .. } => "erase",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Action::Add { db, triple } => write!(f, "{}: + {}", db, triple),
            Action::Remove { db, triple } => write!(f, "{}: - {}", db, triple),
            Action::Set { db, e, a, v } => write!(f, "{}: {}.{} := {}", db, e, a, v),
            Action::Erase { db, e, a } => write!(f, "{}: {}.{} := none", db, e, a),
        }
    }
}
