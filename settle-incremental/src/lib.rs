//! Settle incremental indexes
//!
//! This crate holds the data structures a settle store is built from:
//! dirty-tracking indexes and the record store that reconstructs entity
//! records from EAV diffs.
//!
//! # Propagation rounds
//!
//! Mutation and notification are separate steps. Within one round:
//!
//! ```text
//! apply(diff) on every store → dispatch_if_dirty on every index → clear_dirty on every index
//! ```
//!
//! Because no index clears before every index has dispatched, a
//! subscriber of one index may read the dirty set of any other index in
//! the same round. The entity dirty index of a [`RecordStore`] is wiped
//! last of all.
//!
//! # Example
//!
//! ```rust
//! use settle_incremental::prelude::*;
//!
//! let mut store = RecordStore::new("session");
//! store.apply_diff(&Diff::from_parts(
//!     vec![],
//!     vec![Triple::new("e1", "tag", "click")],
//! ));
//!
//! let record = store.record(&Id::new("e1")).unwrap();
//! assert_eq!(record.get("tag"), Some(&[Value::from("click")][..]));
//! ```

#![warn(missing_debug_implementations)]

pub mod cardinality;
pub mod dirty;
pub mod index;
pub mod record;
pub mod reverse;
pub mod store;

pub use cardinality::{Cardinality, CardinalityTable};
pub use dirty::DirtySet;
pub use index::{shared, Index, MultiIndex, ScalarIndex, Shared, SubscriberId};
pub use record::{Record, Removal};
pub use reverse::{ReverseIndex, ReverseIndexSpec, ReverseKind, ReverseTable};
pub use store::{Anomaly, ApplyReport, RecordStore, StoreOptions, ECHO_ATTRIBUTE};

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::cardinality::{Cardinality, CardinalityTable};
    pub use crate::index::{Index, MultiIndex, ScalarIndex, Shared};
    pub use crate::record::Record;
    pub use crate::store::{RecordStore, StoreOptions};
    pub use settle_types::{Attribute, Diff, Id, Triple, Value};
}
