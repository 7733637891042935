//! Databases: named fact collections registered into an evaluation

use crate::block::{Block, BlockArena};
use serde::{Deserialize, Serialize};
use settle_incremental::{RecordStore, StoreOptions};
use std::fmt;

/// The role a database plays in an evaluation
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DatabaseKind {
    /// The user program's facts and blocks
    Session,
    /// Externally injected events
    Event,
    /// Mirror of the hosting browser session
    Browser,
    View,
    Editor,
    Inspector,
    /// Environment facts such as time
    System,
    Custom(String),
}

impl DatabaseKind {
    /// Registration name used when the orchestrator builds an evaluation
    pub fn default_name(&self) -> &str {
        match self {
            DatabaseKind::Session => "session",
            DatabaseKind::Event => "event",
            DatabaseKind::Browser => "browser",
            DatabaseKind::View => "view",
            DatabaseKind::Editor => "editor",
            DatabaseKind::Inspector => "inspector",
            DatabaseKind::System => "system",
            DatabaseKind::Custom(name) => name,
        }
    }

    /// Blocks in this database count as user code in performance reports.
    pub fn is_user(&self) -> bool {
        matches!(self, DatabaseKind::Session)
    }
}

impl fmt::Display for DatabaseKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.default_name())
    }
}

pub struct Database {
    name: String,
    kind: DatabaseKind,
    store: RecordStore,
    blocks: BlockArena,
}

impl Database {
    pub fn new(name: impl Into<String>, kind: DatabaseKind) -> Self {
        Self::with_options(name, kind, StoreOptions::default())
    }

    pub fn with_options(name: impl Into<String>, kind: DatabaseKind, options: StoreOptions) -> Self {
        let name = name.into();
        Self {
            store: RecordStore::with_options(name.clone(), options),
            name,
            kind,
            blocks: BlockArena::new(),
        }
    }

    /// A database named after its kind
    pub fn of_kind(kind: DatabaseKind, options: StoreOptions) -> Self {
        let name = kind.default_name().to_string();
        Self::with_options(name, kind, options)
    }

    pub fn with_blocks(mut self, blocks: impl IntoIterator<Item = Block>) -> Self {
        self.blocks = BlockArena::from_blocks(blocks);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> &DatabaseKind {
        &self.kind
    }

    pub fn store(&self) -> &RecordStore {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut RecordStore {
        &mut self.store
    }

    pub fn blocks(&self) -> &BlockArena {
        &self.blocks
    }

    pub fn blocks_mut(&mut self) -> &mut BlockArena {
        &mut self.blocks
    }

    /// Swap in a new block set, returning the old one.
    pub fn replace_blocks(&mut self, blocks: BlockArena) -> BlockArena {
        std::mem::replace(&mut self.blocks, blocks)
    }
}

impl fmt::Debug for Database {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Database")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("store", &self.store)
            .field("blocks", &self.blocks.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_names() {
        assert_eq!(DatabaseKind::Session.default_name(), "session");
        assert_eq!(DatabaseKind::Custom("timers".into()).to_string(), "timers");
        assert!(DatabaseKind::Session.is_user());
        assert!(!DatabaseKind::Event.is_user());
    }

    #[test]
    fn test_replace_blocks() {
        let mut db = Database::new("session", DatabaseKind::Session)
            .with_blocks([Block::new("a", "a")]);
        let old = db.replace_blocks(BlockArena::from_blocks([Block::new("b", "b")]));
        assert_eq!(old.len(), 1);
        assert!(db.blocks().contains(&"b".into()));
    }
}
