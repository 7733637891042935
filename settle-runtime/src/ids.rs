//! Entity id interning and minting
//!
//! Ids starting with [`EXTERNAL_ID_PREFIX`] were minted by a peer and are
//! swapped for local ids before they enter a store. The mapping lives as
//! long as the [`Interner`], so it survives evaluation rebuilds.
//!
//! Derived ids are minted by hashing the block that derives them together
//! with the bound values they depend on, so the same derivation yields the
//! same id across literal-only source edits.

use dashmap::DashMap;
use settle_types::{Id, Triple, Value, EXTERNAL_ID_PREFIX};
use std::sync::atomic::{AtomicU64, Ordering};

/// Concurrent external → local id table
#[derive(Debug)]
pub struct Interner {
    ids: DashMap<Id, Id>,
    next: AtomicU64,
    prefix: String,
}

impl Interner {
    pub fn new() -> Self {
        Self::with_prefix("ext")
    }

    pub fn with_prefix(prefix: impl Into<String>) -> Self {
        Self {
            ids: DashMap::new(),
            next: AtomicU64::new(1),
            prefix: prefix.into(),
        }
    }

    /// The local id for `id`; local ids pass through untouched.
    pub fn intern(&self, id: &Id) -> Id {
        if !id.is_external() {
            return id.clone();
        }
        self.ids
            .entry(id.clone())
            .or_insert_with(|| {
                let n = self.next.fetch_add(1, Ordering::Relaxed);
                Id::new(format!("{}:{}", self.prefix, n))
            })
            .clone()
    }

    pub fn intern_value(&self, value: &Value) -> Value {
        match value.as_str() {
            Some(text) if text.starts_with(EXTERNAL_ID_PREFIX) => {
                Value::from(self.intern(&Id::new(text)))
            }
            _ => value.clone(),
        }
    }

    /// Intern the entity and, when it is an external id, the value.
    pub fn intern_triple(&self, triple: &Triple) -> Triple {
        Triple {
            e: self.intern(&triple.e),
            a: triple.a.clone(),
            v: self.intern_value(&triple.v),
        }
    }

    /// Local id previously assigned to `id`
    pub fn get(&self, id: &Id) -> Option<Id> {
        self.ids.get(id).map(|entry| entry.value().clone())
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}

impl Default for Interner {
    fn default() -> Self {
        Self::new()
    }
}

/// Mint a derived entity id from a block key and named bound values.
pub fn mint_id<'a>(block: &str, parts: impl IntoIterator<Item = (&'a str, &'a Value)>) -> Id {
    let mut hasher = blake3::Hasher::new();
    hasher.update(block.as_bytes());
    for (name, value) in parts {
        hasher.update(&[0]);
        hasher.update(name.as_bytes());
        hasher.update(&[1]);
        match value {
            Value::Text(s) => {
                hasher.update(b"t");
                hasher.update(s.as_bytes());
            }
            Value::Number(n) => {
                hasher.update(b"n");
                hasher.update(&n.to_bits().to_le_bytes());
            }
            Value::Bool(b) => {
                hasher.update(if *b { b"T" } else { b"F" });
            }
        }
    }
    let hash = hasher.finalize().to_hex();
    Id::new(format!("m:{}", &hash[..24]))
}
