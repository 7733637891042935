//! Scalar and multi indexes with dirty tracking
//!
//! Both index kinds mutate synchronously and remember which keys were
//! touched. Propagation is two-phase and driven from outside:
//!
//! 1. [`Index::dispatch_if_dirty`] is called on every index of the round,
//!    handing each subscriber the index and its dirty set.
//! 2. Only after all indexes have dispatched is [`Index::clear_dirty`]
//!    called on each of them.
//!
//! Keeping the phases apart lets a subscriber of one index inspect the
//! still-populated dirty set of another index in the same round. Indexes
//! are usually held as [`Shared`] handles so subscribers can capture them.

use crate::dirty::DirtySet;
use hashbrown::HashMap;
use parking_lot::RwLock;
use std::fmt;
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// A shareable index handle
pub type Shared<I> = Arc<RwLock<I>>;

/// Wrap an index in a [`Shared`] handle.
pub fn shared<I>(index: I) -> Shared<I> {
    Arc::new(RwLock::new(index))
}

/// Subscriber registration identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriberId(pub u64);

static SUBSCRIBER_COUNTER: AtomicU64 = AtomicU64::new(1);

impl SubscriberId {
    pub fn next() -> Self {
        Self(SUBSCRIBER_COUNTER.fetch_add(1, Ordering::SeqCst))
    }
}

impl fmt::Display for SubscriberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub:{}", self.0)
    }
}

/// Operations shared by every index kind
pub trait Index {
    type Key;
    type Value;
    type Dirty;

    /// Associate `value` with `key` and mark `key` dirty.
    fn insert(&mut self, key: Self::Key, value: Self::Value);

    /// Request removal of `value` under `key`.
    ///
    /// `key` is marked dirty whether or not anything was removed. Returns
    /// false when there was nothing to remove.
    fn remove(&mut self, key: &Self::Key, value: &Self::Value) -> bool;

    fn dirty(&self) -> &Self::Dirty;

    fn is_dirty(&self) -> bool;

    /// Notify every subscriber once, in registration order, if any key is dirty.
    ///
    /// Returns true when subscribers were notified.
    fn dispatch_if_dirty(&self) -> bool;

    /// Forget the dirty set. Must run only after every index of the round
    /// has dispatched.
    fn clear_dirty(&mut self);
}

type ScalarSubscriber<K, V> = Box<dyn Fn(&ScalarIndex<K, V>, &DirtySet<K>) + Send + Sync>;

/// One value per key
pub struct ScalarIndex<K, V> {
    name: String,
    index: HashMap<K, V>,
    dirty: DirtySet<K>,
    subscribers: Vec<(SubscriberId, ScalarSubscriber<K, V>)>,
}

impl<K, V> ScalarIndex<K, V>
where
    K: Eq + Hash + Clone + fmt::Debug,
{
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            index: HashMap::new(),
            dirty: DirtySet::new(),
            subscribers: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn get(&self, key: &K) -> Option<&V> {
        self.index.get(key)
    }

    /// Mutable access that marks `key` dirty when it exists.
    pub fn touch(&mut self, key: &K) -> Option<&mut V> {
        if self.index.contains_key(key) {
            self.dirty.mark_key(key.clone());
        }
        self.index.get_mut(key)
    }

    /// Mutable access, creating the entry with `make` when missing.
    pub fn touch_or_insert_with(&mut self, key: K, make: impl FnOnce() -> V) -> &mut V {
        self.dirty.mark_key(key.clone());
        self.index.entry(key).or_insert_with(make)
    }

    /// Drop the association for `key`; same dirty semantics as `remove`.
    pub fn remove_key(&mut self, key: &K) -> Option<V> {
        self.dirty.mark_key(key.clone());
        let removed = self.index.remove(key);
        if removed.is_none() {
            tracing::warn!(index = %self.name, ?key, "remove from absent key");
        }
        removed
    }

    pub fn contains_key(&self, key: &K) -> bool {
        self.index.contains_key(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&K, &V)> {
        self.index.iter()
    }

    pub fn keys(&self) -> impl Iterator<Item = &K> {
        self.index.keys()
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    pub fn subscribe<F>(&mut self, subscriber: F) -> SubscriberId
    where
        F: Fn(&ScalarIndex<K, V>, &DirtySet<K>) + Send + Sync + 'static,
    {
        let id = SubscriberId::next();
        self.subscribers.push((id, Box::new(subscriber)));
        id
    }

    pub fn unsubscribe(&mut self, id: SubscriberId) -> bool {
        let before = self.subscribers.len();
        self.subscribers.retain(|(sub, _)| *sub != id);
        before != self.subscribers.len()
    }
}

impl<K, V> Index for ScalarIndex<K, V>
where
    K: Eq + Hash + Clone + fmt::Debug,
{
    type Key = K;
    type Value = V;
    type Dirty = DirtySet<K>;

    fn insert(&mut self, key: K, value: V) {
        self.dirty.mark_key(key.clone());
        self.index.insert(key, value);
    }

    fn remove(&mut self, key: &K, _value: &V) -> bool {
        self.remove_key(key).is_some()
    }

    fn dirty(&self) -> &DirtySet<K> {
        &self.dirty
    }

    fn is_dirty(&self) -> bool {
        !self.dirty.is_empty()
    }

    fn dispatch_if_dirty(&self) -> bool {
        if self.dirty.is_empty() {
            return false;
        }
        tracing::trace!(index = %self.name, keys = self.dirty.len(), "dispatch");
        for (_, subscriber) in &self.subscribers {
            subscriber(self, &self.dirty);
        }
        true
    }

    fn clear_dirty(&mut self) {
        self.dirty.clear();
    }
}

impl<K, V> fmt::Debug for ScalarIndex<K, V>
where
    K: Eq + Hash + fmt::Debug,
    V: fmt::Debug,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScalarIndex")
            .field("name", &self.name)
            .field("len", &self.index.len())
            .field("dirty", &self.dirty.len())
            .field("subscribers", &self.subscribers.len())
            .finish()
    }
}

type MultiSubscriber<K, V> = Box<dyn Fn(&MultiIndex<K, V>, &DirtySet<K, V>) + Send + Sync>;

/// An unordered multiset of values per key
pub struct MultiIndex<K, V> {
    name: String,
    index: HashMap<K, Vec<V>>,
    dirty: DirtySet<K, V>,
    subscribers: Vec<(SubscriberId, MultiSubscriber<K, V>)>,
}

impl<K, V> MultiIndex<K, V>
where
    K: Eq + Hash + Clone + fmt::Debug,
    V: PartialEq + Clone,
{
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            index: HashMap::new(),
            dirty: DirtySet::new(),
            subscribers: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// All occurrences stored under `key`
    pub fn get(&self, key: &K) -> &[V] {
        self.index.get(key).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Number of occurrences of `value` under `key`
    pub fn count(&self, key: &K, value: &V) -> usize {
        self.get(key).iter().filter(|v| *v == value).count()
    }

    pub fn contains(&self, key: &K, value: &V) -> bool {
        self.get(key).contains(value)
    }

    pub fn contains_key(&self, key: &K) -> bool {
        self.index.contains_key(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&K, &[V])> {
        self.index.iter().map(|(k, vs)| (k, vs.as_slice()))
    }

    pub fn keys(&self) -> impl Iterator<Item = &K> {
        self.index.keys()
    }

    /// Number of keys
    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// Wipe both the data and the dirty set.
    pub fn clear_index(&mut self) {
        self.index.clear();
        self.dirty.clear();
    }

    pub fn subscribe<F>(&mut self, subscriber: F) -> SubscriberId
    where
        F: Fn(&MultiIndex<K, V>, &DirtySet<K, V>) + Send + Sync + 'static,
    {
        let id = SubscriberId::next();
        self.subscribers.push((id, Box::new(subscriber)));
        id
    }

    pub fn unsubscribe(&mut self, id: SubscriberId) -> bool {
        let before = self.subscribers.len();
        self.subscribers.retain(|(sub, _)| *sub != id);
        before != self.subscribers.len()
    }
}

impl<K, V> Index for MultiIndex<K, V>
where
    K: Eq + Hash + Clone + fmt::Debug,
    V: PartialEq + Clone,
{
    type Key = K;
    type Value = V;
    type Dirty = DirtySet<K, V>;

    fn insert(&mut self, key: K, value: V) {
        self.dirty.mark(key.clone(), value.clone());
        self.index.entry(key).or_default().push(value);
    }

    fn remove(&mut self, key: &K, value: &V) -> bool {
        self.dirty.mark(key.clone(), value.clone());
        let Some(values) = self.index.get_mut(key) else {
            tracing::warn!(index = %self.name, ?key, "remove from absent key");
            return false;
        };
        let Some(ix) = values.iter().position(|v| v == value) else {
            return false;
        };
        values.swap_remove(ix);
        if values.is_empty() {
            self.index.remove(key);
        }
        true
    }

    fn dirty(&self) -> &DirtySet<K, V> {
        &self.dirty
    }

    fn is_dirty(&self) -> bool {
        !self.dirty.is_empty()
    }

    fn dispatch_if_dirty(&self) -> bool {
        if self.dirty.is_empty() {
            return false;
        }
        tracing::trace!(index = %self.name, keys = self.dirty.len(), "dispatch");
        for (_, subscriber) in &self.subscribers {
            subscriber(self, &self.dirty);
        }
        true
    }

    fn clear_dirty(&mut self) {
        self.dirty.clear();
    }
}

impl<K, V> fmt::Debug for MultiIndex<K, V>
where
    K: Eq + Hash + fmt::Debug,
    V: fmt::Debug,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MultiIndex")
            .field("name", &self.name)
            .field("len", &self.index.len())
            .field("dirty", &self.dirty.len())
            .field("subscribers", &self.subscribers.len())
            .finish()
    }
}
