//! Shared types for settle
//!
//! This crate provides the data model shared by every settle crate:
//! entity-attribute-value triples, the diffs that carry state changes
//! between stores, and the JSON wire messages exchanged with peers.

pub mod diagnostics;
pub mod diff;
pub mod eav;
pub mod wire;

pub use diagnostics::{CompileError, ExtraInfo, SourceSpan};
pub use diff::Diff;
pub use eav::{Attribute, Id, Triple, Value, EXTERNAL_ID_PREFIX};
pub use wire::{Inbound, LoadInfo, Outbound, WireError};
