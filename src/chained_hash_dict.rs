//! ChainedHashDict: separate-chaining engine over a vector of optional buckets.

use crate::bucket::{ArrayBucket, Bucket};
use crate::config::DictConfig;
use crate::error::{ConfigError, DictError};
use crate::guard::StructureTracker;
use crate::iter::{Cursor, IntoIter, Iter, IterMut, Keys, Values, ValuesMut};
use core::borrow::Borrow;
use core::fmt;
use core::hash::{BuildHasher, Hash};
use core::marker::PhantomData;
use core::mem;
use log::{debug, trace};
use std::collections::hash_map::RandomState;

/// Snapshot of the table shape, for inspecting chain distribution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DictStats {
    pub len: usize,
    pub capacity: usize,
    /// Slots currently owning a bucket.
    pub occupied_slots: usize,
    /// Entries in the fullest bucket.
    pub longest_chain: usize,
    /// Rehashes performed since construction.
    pub rehashes: u64,
}

/// Hash dictionary with separate chaining.
///
/// Slot `i` owns the bucket of every key whose hash is `i` modulo the
/// capacity. Empty slots hold no bucket. When `len / capacity` reaches the
/// configured load factor, the next `put` doubles the slot array first.
pub struct ChainedHashDict<K, V, S = RandomState, B = ArrayBucket<K, V>> {
    hasher: S,
    pub(crate) slots: Vec<Option<B>>,
    len: usize,
    config: DictConfig,
    rehashes: u64,
    pub(crate) tracker: StructureTracker,
    _pd: PhantomData<(K, V)>,
}

#[inline]
fn slot_index(hash: u64, capacity: usize) -> usize {
    (hash % capacity as u64) as usize
}

fn empty_slots<B>(capacity: usize) -> Vec<Option<B>> {
    (0..capacity).map(|_| None).collect()
}

impl<K, V> ChainedHashDict<K, V>
where
    K: Eq + Hash,
{
    pub fn new() -> Self {
        Self::with_hasher(Default::default())
    }

    pub fn with_config(config: DictConfig) -> Result<Self, ConfigError> {
        Self::with_config_and_hasher(config, Default::default())
    }
}

impl<K, V, S, B> ChainedHashDict<K, V, S, B>
where
    K: Eq + Hash,
    S: BuildHasher,
    B: Bucket<K, V>,
{
    pub fn with_hasher(hasher: S) -> Self {
        Self::from_parts(DictConfig::default(), hasher)
    }

    pub fn with_config_and_hasher(config: DictConfig, hasher: S) -> Result<Self, ConfigError> {
        Ok(Self::from_parts(config.validate()?, hasher))
    }

    fn from_parts(config: DictConfig, hasher: S) -> Self {
        Self {
            hasher,
            slots: empty_slots(config.get_initial_capacity()),
            len: 0,
            config,
            rehashes: 0,
            tracker: StructureTracker::new(),
            _pd: PhantomData,
        }
    }

    fn make_hash<Q>(&self, q: &Q) -> u64
    where
        Q: ?Sized + Hash,
    {
        self.hasher.hash_one(q)
    }

    #[inline]
    fn slot_of(&self, hash: u64) -> usize {
        slot_index(hash, self.slots.len())
    }

    pub fn len(&self) -> usize {
        self.len
    }
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Number of slots.
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn load_factor(&self) -> f64 {
        self.len as f64 / self.slots.len() as f64
    }

    pub fn config(&self) -> &DictConfig {
        &self.config
    }

    pub fn hasher(&self) -> &S {
        &self.hasher
    }

    pub fn get<Q>(&self, q: &Q) -> Result<&V, DictError>
    where
        K: Borrow<Q>,
        Q: ?Sized + Hash + Eq,
    {
        let _g = self.tracker.enter();
        let hash = self.make_hash(q);
        self.slots[self.slot_of(hash)]
            .as_ref()
            .and_then(|bucket| bucket.get(hash, q))
            .ok_or(DictError::NoSuchKey)
    }

    pub fn get_mut<Q>(&mut self, q: &Q) -> Result<&mut V, DictError>
    where
        K: Borrow<Q>,
        Q: ?Sized + Hash + Eq,
    {
        let _g = self.tracker.enter();
        let hash = self.make_hash(q);
        let idx = self.slot_of(hash);
        self.slots[idx]
            .as_mut()
            .and_then(|bucket| bucket.get_mut(hash, q))
            .ok_or(DictError::NoSuchKey)
    }

    pub fn contains_key<Q>(&self, q: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: ?Sized + Hash + Eq,
    {
        let _g = self.tracker.enter();
        let hash = self.make_hash(q);
        self.slots[self.slot_of(hash)]
            .as_ref()
            .is_some_and(|bucket| bucket.contains_key(hash, q))
    }

    /// Insert or overwrite, returning the previous value for `key`.
    ///
    /// # Panics
    ///
    /// Panics if growing the slot array or creating a bucket fails to
    /// allocate, or if growth would overflow `usize`. Use [`try_put`](Self::try_put) to observe those as errors.
    pub fn put(&mut self, key: K, value: V) -> Option<V> {
        match self.try_put(key, value) {
            Ok(prev) => prev,
            Err(e) => panic!("ChainedHashDict::put: {e}"),
        }
    }

    /// Like [`put`](Self::put), but reports allocation failure instead of
    /// panicking. On error the dictionary is exactly as it was before the
    /// call, capacity and outstanding cursors included; `key` and `value`
    /// are dropped.
    pub fn try_put(&mut self, key: K, value: V) -> Result<Option<V>, DictError> {
        let hash = {
            let _g = self.tracker.enter();
            self.make_hash(&key)
        };

        // Every allocation happens here; nothing is modified until it succeeds.
        let grown = if self.config.should_grow(self.len, self.slots.len()) {
            let mut new_slots = self.build_table(self.grown_capacity()?)?;
            let idx = slot_index(hash, new_slots.len());
            if new_slots[idx].is_none() {
                new_slots[idx] = Some(Self::new_bucket(idx)?);
            }
            Some(new_slots)
        } else {
            None
        };
        let spare = match grown {
            Some(_) => None,
            None => {
                let idx = self.slot_of(hash);
                match self.slots[idx] {
                    Some(_) => None,
                    None => Some(Self::new_bucket(idx)?),
                }
            }
        };

        if let Some(new_slots) = grown {
            self.commit_grow(new_slots);
        }
        let idx = self.slot_of(hash);
        let prev = if let Some(bucket) = self.slots[idx].as_mut() {
            let _g = self.tracker.enter();
            bucket.put(hash, key, value)
        } else {
            let Some(mut bucket) = spare else {
                unreachable!("slot {idx} has neither a bucket nor a spare")
            };
            bucket.insert_unique(hash, key, value);
            self.slots[idx] = Some(bucket);
            None
        };

        if prev.is_none() {
            self.len += 1;
            self.tracker.bump();
        }
        Ok(prev)
    }

    fn new_bucket(idx: usize) -> Result<B, DictError> {
        let bucket = B::try_with_capacity(1).ok_or(DictError::BucketAllocationFailed)?;
        trace!("created bucket for slot {idx}");
        Ok(bucket)
    }

    pub fn remove<Q>(&mut self, q: &Q) -> Result<V, DictError>
    where
        K: Borrow<Q>,
        Q: ?Sized + Hash + Eq,
    {
        self.remove_entry(q).map(|(_, v)| v)
    }

    /// Remove `q`, returning the stored key along with its value.
    pub fn remove_entry<Q>(&mut self, q: &Q) -> Result<(K, V), DictError>
    where
        K: Borrow<Q>,
        Q: ?Sized + Hash + Eq,
    {
        let (idx, removed, now_empty) = {
            let _g = self.tracker.enter();
            let hash = self.make_hash(q);
            let idx = self.slot_of(hash);
            let bucket = self.slots[idx].as_mut().ok_or(DictError::NoSuchKey)?;
            let removed = bucket.remove(hash, q).ok_or(DictError::NoSuchKey)?;
            (idx, removed, bucket.is_empty())
        };

        if now_empty {
            self.slots[idx] = None;
            trace!("released bucket for slot {idx}");
        }
        self.len -= 1;
        self.tracker.bump();
        Ok(removed)
    }

    /// Drop every entry. Capacity is kept.
    pub fn clear(&mut self) {
        for slot in self.slots.iter_mut() {
            *slot = None;
        }
        self.len = 0;
        self.tracker.bump();
    }

    pub fn stats(&self) -> DictStats {
        let mut occupied_slots = 0;
        let mut longest_chain = 0;
        for bucket in self.slots.iter().flatten() {
            occupied_slots += 1;
            longest_chain = longest_chain.max(bucket.len());
        }
        DictStats {
            len: self.len,
            capacity: self.slots.len(),
            occupied_slots,
            longest_chain,
            rehashes: self.rehashes,
        }
    }

    /// Capacity after one growth step: doubled, repeatedly if a small load
    /// factor demands it.
    fn grown_capacity(&self) -> Result<usize, DictError> {
        let old_capacity = self.slots.len();
        let overflow = || DictError::CapacityOverflow {
            capacity: old_capacity,
        };
        let mut new_capacity = old_capacity.checked_mul(2).ok_or_else(overflow)?;
        while self.config.should_grow(self.len, new_capacity) {
            new_capacity = new_capacity.checked_mul(2).ok_or_else(overflow)?;
        }
        Ok(new_capacity)
    }

    /// Swap in a table from `build_table` and redistribute every entry.
    ///
    /// The moves neither allocate nor call `K: Eq`/`K: Hash`: every bucket
    /// of `new_slots` is already sized for the entries it receives.
    fn commit_grow(&mut self, new_slots: Vec<Option<B>>) {
        let new_capacity = new_slots.len();
        let old_slots = mem::replace(&mut self.slots, new_slots);
        let old_capacity = old_slots.len();
        for bucket in old_slots.into_iter().flatten() {
            for (hash, key, value) in bucket.into_entries() {
                let idx = slot_index(hash, new_capacity);
                match self.slots[idx].as_mut() {
                    Some(target) => target.insert_unique(hash, key, value),
                    None => unreachable!("slot {idx} was not sized for its entries"),
                }
            }
        }

        self.rehashes += 1;
        self.tracker.bump();
        debug!(
            "rehashed {} entries from {} to {} slots",
            self.len, old_capacity, new_capacity
        );
    }

    /// New slot vector of `capacity` slots with every bucket pre-sized to
    /// the number of current entries it will receive. A failure leaves
    /// `self` untouched.
    fn build_table(&self, capacity: usize) -> Result<Vec<Option<B>>, DictError> {
        let failed = || DictError::AllocationFailed { slots: capacity };

        let mut counts: Vec<usize> = Vec::new();
        counts.try_reserve_exact(capacity).map_err(|_| failed())?;
        counts.resize(capacity, 0);
        for bucket in self.slots.iter().flatten() {
            bucket.for_each_hash(|hash| counts[slot_index(hash, capacity)] += 1);
        }

        let mut slots = Vec::new();
        slots.try_reserve_exact(capacity).map_err(|_| failed())?;
        for n in counts {
            let slot = match n {
                0 => None,
                n => Some(B::try_with_capacity(n).ok_or_else(failed)?),
            };
            slots.push(slot);
        }
        Ok(slots)
    }

    pub fn iter(&self) -> Iter<'_, K, V, B> {
        Iter::new(&self.slots, self.len)
    }

    pub fn iter_mut(&mut self) -> IterMut<'_, K, V, B> {
        IterMut::new(&mut self.slots, self.len)
    }

    pub fn keys(&self) -> Keys<'_, K, V, B> {
        Keys { inner: self.iter() }
    }

    pub fn values(&self) -> Values<'_, K, V, B> {
        Values { inner: self.iter() }
    }

    pub fn values_mut(&mut self) -> ValuesMut<'_, K, V, B> {
        ValuesMut {
            inner: self.iter_mut(),
        }
    }

    /// Detached iteration position; see [`Cursor`].
    pub fn cursor(&self) -> Cursor {
        Cursor::new(self.tracker.generation())
    }

    /// Panics unless every structural invariant holds.
    #[cfg(test)]
    pub(crate) fn check_invariants(&self) {
        assert!(!self.slots.is_empty(), "capacity must be at least 1");
        let mut total = 0;
        for (idx, slot) in self.slots.iter().enumerate() {
            if let Some(bucket) = slot {
                assert!(!bucket.is_empty(), "slot {idx} holds an empty bucket");
                total += bucket.len();
                for (k, _) in bucket.iter() {
                    assert_eq!(self.slot_of(self.make_hash(k)), idx, "key in wrong slot");
                }
            }
        }
        assert_eq!(total, self.len, "len out of sync with buckets");
    }
}

impl<K, V, S, B> Default for ChainedHashDict<K, V, S, B>
where
    K: Eq + Hash,
    S: BuildHasher + Default,
    B: Bucket<K, V>,
{
    fn default() -> Self {
        Self::with_hasher(S::default())
    }
}

impl<K, V, S, B> Clone for ChainedHashDict<K, V, S, B>
where
    S: Clone,
    B: Clone,
{
    fn clone(&self) -> Self {
        Self {
            hasher: self.hasher.clone(),
            slots: self.slots.clone(),
            len: self.len,
            config: self.config,
            rehashes: self.rehashes,
            tracker: StructureTracker::new(),
            _pd: PhantomData,
        }
    }
}

impl<K, V, S, B> fmt::Debug for ChainedHashDict<K, V, S, B>
where
    K: Eq + Hash + fmt::Debug,
    V: fmt::Debug,
    S: BuildHasher,
    B: Bucket<K, V>,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map().entries(self.iter()).finish()
    }
}

impl<K, V, S, B> Extend<(K, V)> for ChainedHashDict<K, V, S, B>
where
    K: Eq + Hash,
    S: BuildHasher,
    B: Bucket<K, V>,
{
    fn extend<I: IntoIterator<Item = (K, V)>>(&mut self, iter: I) {
        for (k, v) in iter {
            self.put(k, v);
        }
    }
}

impl<K, V, S, B> FromIterator<(K, V)> for ChainedHashDict<K, V, S, B>
where
    K: Eq + Hash,
    S: BuildHasher + Default,
    B: Bucket<K, V>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut dict = Self::default();
        dict.extend(iter);
        dict
    }
}

impl<K, V, S, B> IntoIterator for ChainedHashDict<K, V, S, B>
where
    B: Bucket<K, V>,
{
    type Item = (K, V);
    type IntoIter = IntoIter<K, V, B>;

    fn into_iter(self) -> Self::IntoIter {
        IntoIter::new(self.slots, self.len)
    }
}

impl<'a, K, V, S, B> IntoIterator for &'a ChainedHashDict<K, V, S, B>
where
    K: Eq + Hash,
    S: BuildHasher,
    B: Bucket<K, V>,
{
    type Item = (&'a K, &'a V);
    type IntoIter = Iter<'a, K, V, B>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

impl<'a, K, V, S, B> IntoIterator for &'a mut ChainedHashDict<K, V, S, B>
where
    K: Eq + Hash,
    S: BuildHasher,
    B: Bucket<K, V>,
{
    type Item = (&'a K, &'a mut V);
    type IntoIter = IterMut<'a, K, V, B>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter_mut()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bucket::{ArrayIntoEntries, ArrayIter, ArrayIterMut, TableBucket};
    use std::cell::Cell;
    use std::collections::BTreeSet;
    use std::hash::Hasher;

    #[derive(Clone, Default)]
    struct ConstBuildHasher;
    struct ConstHasher;
    impl BuildHasher for ConstBuildHasher {
        type Hasher = ConstHasher;
        fn build_hasher(&self) -> Self::Hasher {
            ConstHasher
        }
    }
    impl Hasher for ConstHasher {
        fn write(&mut self, _bytes: &[u8]) {}
        fn finish(&self) -> u64 {
            0
        } // every key lands in slot 0
    }

    /// Invariant: the most recent `put` wins; overwrites do not change `len`.
    #[test]
    fn overwrite_keeps_len() {
        let mut d: ChainedHashDict<String, i32> = ChainedHashDict::new();
        assert_eq!(d.put("a".to_string(), 1), None);
        assert_eq!(d.put("b".to_string(), 2), None);
        assert_eq!(d.put("a".to_string(), 3), Some(1));
        assert_eq!(d.len(), 2);
        assert_eq!(d.get("a"), Ok(&3));
        assert_eq!(d.get("b"), Ok(&2));
        d.check_invariants();
    }

    /// Invariant: an empty dictionary reports every key absent.
    #[test]
    fn empty_dictionary_has_no_keys() {
        let d: ChainedHashDict<String, i32> = ChainedHashDict::new();
        assert_eq!(d.get("x"), Err(DictError::NoSuchKey));
        assert!(!d.contains_key("x"));
        assert_eq!(d.len(), 0);
        assert!(d.is_empty());
        assert_eq!(d.capacity(), 1);
        d.check_invariants();
    }

    /// Invariant: absence is distinguishable from a stored `None` value.
    #[test]
    fn stored_none_is_not_absence() {
        let mut d: ChainedHashDict<&'static str, Option<i32>> = ChainedHashDict::new();
        d.put("k", None);
        assert_eq!(d.get(&"k"), Ok(&None));
        assert_eq!(d.get(&"missing"), Err(DictError::NoSuchKey));
        assert_eq!(d.remove(&"k"), Ok(None));
        assert_eq!(d.remove(&"k"), Err(DictError::NoSuchKey));
    }

    /// Invariant: removing an absent key fails and leaves state unchanged.
    #[test]
    fn remove_absent_is_noop() {
        let mut d: ChainedHashDict<String, i32> = ChainedHashDict::new();
        d.put("a".to_string(), 1);
        let before = d.stats();
        let generation = d.tracker.generation();
        assert_eq!(d.remove("zzz"), Err(DictError::NoSuchKey));
        assert_eq!(d.stats(), before);
        assert_eq!(d.tracker.generation(), generation);
        assert_eq!(d.get("a"), Ok(&1));
    }

    /// Invariant: a bucket emptied by `remove` is released from its slot.
    #[test]
    fn remove_releases_empty_bucket() {
        let mut d: ChainedHashDict<String, i32> = ChainedHashDict::new();
        d.put("only".to_string(), 1);
        assert_eq!(d.stats().occupied_slots, 1);
        assert_eq!(d.remove_entry("only"), Ok(("only".to_string(), 1)));
        assert_eq!(d.stats().occupied_slots, 0);
        assert!(d.slots.iter().all(Option::is_none));
        assert!(d.is_empty());
        d.check_invariants();
    }

    /// Invariant: starting from one slot, N distinct inserts rehash
    /// ceil(log2 N) times and every earlier key survives each rehash.
    #[test]
    fn doubling_growth_preserves_entries() {
        let mut d: ChainedHashDict<u32, u32> = ChainedHashDict::new();
        let mut last_rehashes = 0;
        for n in 1..=100u32 {
            d.put(n, n * 10);
            let expected = (n as f64).log2().ceil() as u64;
            assert_eq!(d.stats().rehashes, expected, "after {n} inserts");
            if d.stats().rehashes != last_rehashes {
                last_rehashes = d.stats().rehashes;
                for k in 1..=n {
                    assert_eq!(d.get(&k), Ok(&(k * 10)));
                }
            }
            d.check_invariants();
        }
        assert_eq!(d.capacity(), 128);
    }

    /// Invariant: a lower load factor grows earlier but keeps the doubling shape.
    #[test]
    fn custom_load_factor_and_capacity() {
        let cfg = DictConfig::new().initial_capacity(4).max_load_factor(0.5);
        let mut d: ChainedHashDict<u32, ()> = ChainedHashDict::with_config(cfg).unwrap();
        assert_eq!(d.capacity(), 4);
        d.put(1, ());
        d.put(2, ());
        assert_eq!(d.capacity(), 4);
        d.put(3, ());
        assert_eq!(d.capacity(), 8);
        assert!(d.load_factor() <= 0.5);
        d.check_invariants();
    }

    /// Invariant: one rehash doubles as often as needed to get back under a
    /// load factor below 1.
    #[test]
    fn small_load_factor_multi_doubles() {
        let cfg = DictConfig::new().max_load_factor(0.25);
        let mut d: ChainedHashDict<u32, ()> = ChainedHashDict::with_config(cfg).unwrap();
        d.put(1, ());
        d.put(2, ());
        assert_eq!(d.capacity(), 8);
        assert_eq!(d.stats().rehashes, 1);
        for k in 3..=40 {
            d.put(k, ());
            assert!(d.load_factor() <= 0.25 + 1.0 / d.capacity() as f64);
        }
        d.check_invariants();
    }

    #[test]
    fn invalid_config_is_rejected() {
        let cfg = DictConfig::new().initial_capacity(0);
        assert!(matches!(
            ChainedHashDict::<u32, u32>::with_config(cfg),
            Err(ConfigError::ZeroCapacity)
        ));
    }

    /// Invariant: with every key colliding, chains grow but lookups stay exact.
    #[test]
    fn constant_hasher_chains_in_one_slot() {
        let mut d: ChainedHashDict<String, usize, ConstBuildHasher> =
            ChainedHashDict::with_hasher(ConstBuildHasher);
        for i in 0..20 {
            d.put(format!("k{i}"), i);
        }
        let stats = d.stats();
        assert_eq!(stats.occupied_slots, 1);
        assert_eq!(stats.longest_chain, 20);
        for i in 0..20 {
            assert_eq!(d.get(format!("k{i}").as_str()), Ok(&i));
        }
        assert_eq!(d.remove("k7"), Ok(7));
        assert!(!d.contains_key("k7"));
        d.check_invariants();
    }

    /// Invariant: the engine behaves the same over the hash-table bucket.
    #[test]
    fn table_bucket_backend() {
        let mut d: ChainedHashDict<String, i32, RandomState, TableBucket<String, i32>> =
            ChainedHashDict::default();
        for i in 0..50 {
            d.put(format!("k{i}"), i);
        }
        d.put("k3".to_string(), -3);
        assert_eq!(d.len(), 50);
        assert_eq!(d.get("k3"), Ok(&-3));
        assert_eq!(d.remove("k4"), Ok(4));
        assert_eq!(d.iter().count(), 49);
        d.check_invariants();
    }

    /// Invariant: iteration yields every entry once, whatever the rehash history.
    #[test]
    fn iteration_is_exhaustive_and_exact() {
        let mut d: ChainedHashDict<&'static str, i32> = ChainedHashDict::new();
        d.put("a", 1);
        d.put("b", 2);
        d.put("c", 3);
        let it = d.iter();
        assert_eq!(it.len(), 3);
        let seen: Vec<(&str, i32)> = it.map(|(k, v)| (*k, *v)).collect();
        let set: BTreeSet<_> = seen.iter().cloned().collect();
        assert_eq!(seen.len(), 3);
        assert_eq!(set, BTreeSet::from([("a", 1), ("b", 2), ("c", 3)]));
    }

    /// Invariant: `iter_mut`/`values_mut`/`get_mut` change values in place.
    #[test]
    fn in_place_mutation() {
        let mut d: ChainedHashDict<u8, i32> = (0..10u8).map(|k| (k, 0)).collect();
        for (k, v) in d.iter_mut() {
            *v = *k as i32;
        }
        for v in d.values_mut() {
            *v *= 2;
        }
        *d.get_mut(&9).unwrap() += 1;
        assert_eq!(d.get(&9), Ok(&19));
        assert_eq!(d.get(&4), Ok(&8));
        assert_eq!(d.get_mut(&42), Err(DictError::NoSuchKey));
        let total: i32 = d.values().sum();
        assert_eq!(total, 2 * 45 + 1);
    }

    #[test]
    fn clear_keeps_capacity() {
        let mut d: ChainedHashDict<u32, u32> = (0..10).map(|k| (k, k)).collect();
        let cap = d.capacity();
        d.clear();
        assert!(d.is_empty());
        assert_eq!(d.capacity(), cap);
        assert!(!d.contains_key(&3));
        assert_eq!(d.iter().count(), 0);
        d.check_invariants();
    }

    #[test]
    fn clone_is_independent() {
        let mut a: ChainedHashDict<u32, u32> = (0..5).map(|k| (k, k)).collect();
        let b = a.clone();
        a.put(0, 100);
        a.remove(&1).unwrap();
        assert_eq!(b.get(&0), Ok(&0));
        assert_eq!(b.get(&1), Ok(&1));
        assert_eq!(b.len(), 5);
        b.check_invariants();
    }

    #[test]
    fn debug_formats_as_map() {
        let mut d: ChainedHashDict<&'static str, i32> = ChainedHashDict::new();
        d.put("k", 1);
        assert_eq!(format!("{d:?}"), r#"{"k": 1}"#);
    }

    /// Invariant: `K: Hash` runs once per `put`/lookup and never during rehash.
    #[test]
    fn rehash_does_not_rehash_keys() {
        thread_local! {
            static HASH_CALLS: Cell<usize> = const { Cell::new(0) };
        }
        #[derive(PartialEq, Eq)]
        struct Counted(u32);
        impl Hash for Counted {
            fn hash<H: Hasher>(&self, state: &mut H) {
                HASH_CALLS.with(|c| c.set(c.get() + 1));
                self.0.hash(state);
            }
        }

        let mut d: ChainedHashDict<Counted, ()> = ChainedHashDict::new();
        for i in 0..64 {
            d.put(Counted(i), ());
        }
        assert_eq!(d.stats().rehashes, 6);
        assert_eq!(HASH_CALLS.with(Cell::get), 64);
    }

    thread_local! {
        static ALLOC_BUDGET: Cell<usize> = const { Cell::new(usize::MAX) };
    }

    /// Array bucket whose allocations fail once `ALLOC_BUDGET` runs out.
    #[derive(Debug)]
    struct FlakyBucket<K, V>(ArrayBucket<K, V>);

    impl<K: Eq, V> Bucket<K, V> for FlakyBucket<K, V> {
        type Iter<'a> = ArrayIter<'a, K, V>
        where
            Self: 'a,
            K: 'a,
            V: 'a;
        type IterMut<'a> = ArrayIterMut<'a, K, V>
        where
            Self: 'a,
            K: 'a,
            V: 'a;
        type IntoEntries = ArrayIntoEntries<K, V>;

        fn try_with_capacity(capacity: usize) -> Option<Self> {
            let budget = ALLOC_BUDGET.with(Cell::get);
            if budget == 0 {
                return None;
            }
            ALLOC_BUDGET.with(|b| b.set(budget.saturating_sub(1)));
            ArrayBucket::try_with_capacity(capacity).map(FlakyBucket)
        }
        fn len(&self) -> usize {
            self.0.len()
        }
        fn get<Q>(&self, hash: u64, q: &Q) -> Option<&V>
        where
            K: Borrow<Q>,
            Q: ?Sized + Eq,
        {
            self.0.get(hash, q)
        }
        fn get_mut<Q>(&mut self, hash: u64, q: &Q) -> Option<&mut V>
        where
            K: Borrow<Q>,
            Q: ?Sized + Eq,
        {
            self.0.get_mut(hash, q)
        }
        fn put(&mut self, hash: u64, key: K, value: V) -> Option<V> {
            self.0.put(hash, key, value)
        }
        fn remove<Q>(&mut self, hash: u64, q: &Q) -> Option<(K, V)>
        where
            K: Borrow<Q>,
            Q: ?Sized + Eq,
        {
            self.0.remove(hash, q)
        }
        fn insert_unique(&mut self, hash: u64, key: K, value: V) {
            self.0.insert_unique(hash, key, value)
        }
        fn iter<'a>(&'a self) -> Self::Iter<'a>
        where
            K: 'a,
            V: 'a,
        {
            self.0.iter()
        }
        fn iter_mut<'a>(&'a mut self) -> Self::IterMut<'a>
        where
            K: 'a,
            V: 'a,
        {
            self.0.iter_mut()
        }
        fn into_entries(self) -> Self::IntoEntries {
            self.0.into_entries()
        }
        fn for_each_hash(&self, f: impl FnMut(u64)) {
            self.0.for_each_hash(f)
        }
    }

    /// Hashes a `u32` to itself so slot placement is predictable.
    #[derive(Clone, Default)]
    struct IdentityBuildHasher;
    #[derive(Default)]
    struct IdentityHasher(u64);
    impl BuildHasher for IdentityBuildHasher {
        type Hasher = IdentityHasher;
        fn build_hasher(&self) -> Self::Hasher {
            IdentityHasher::default()
        }
    }
    impl Hasher for IdentityHasher {
        fn write(&mut self, bytes: &[u8]) {
            for &b in bytes {
                self.0 = self.0.rotate_left(8) ^ b as u64;
            }
        }
        fn write_u32(&mut self, n: u32) {
            self.0 = n as u64;
        }
        fn finish(&self) -> u64 {
            self.0
        }
    }

    type FlakyDict = ChainedHashDict<u32, u32, IdentityBuildHasher, FlakyBucket<u32, u32>>;

    fn full_flaky_dict() -> FlakyDict {
        ALLOC_BUDGET.with(|b| b.set(usize::MAX));
        let mut d = FlakyDict::default();
        for i in 0..8 {
            d.put(i, i * 2);
        }
        assert_eq!(d.capacity(), 8);
        d
    }

    /// Invariant: a rehash that fails part-way through allocation leaves the
    /// dictionary exactly as it was; a later attempt succeeds.
    #[test]
    fn failed_rehash_is_all_or_nothing() {
        let mut d = full_flaky_dict();
        let before = d.stats();
        let generation = d.tracker.generation();

        // Eight keys land in eight distinct new slots; allow only three.
        ALLOC_BUDGET.with(|b| b.set(3));
        assert_eq!(
            d.try_put(100, 200),
            Err(DictError::AllocationFailed { slots: 16 })
        );
        assert_eq!(d.stats(), before);
        assert_eq!(d.tracker.generation(), generation);
        assert!(!d.contains_key(&100));
        for i in 0..8 {
            assert_eq!(d.get(&i), Ok(&(i * 2)));
        }
        d.check_invariants();

        ALLOC_BUDGET.with(|b| b.set(usize::MAX));
        assert_eq!(d.try_put(100, 200), Ok(None));
        assert_eq!(d.capacity(), 16);
        assert_eq!(d.stats().rehashes, before.rehashes + 1);
        d.check_invariants();
    }

    /// Invariant: when the rehash itself succeeds but the new key's slot
    /// cannot get a bucket, nothing is committed: capacity, rehash count and
    /// outstanding cursors are as before the call.
    #[test]
    fn failed_bucket_after_rehash_is_all_or_nothing() {
        let mut d = full_flaky_dict();
        let before = d.stats();
        let mut cursor = d.cursor();

        // Exactly the eight buckets the rehash needs; key 8 lands in the
        // empty slot 8 of 16 and needs a ninth.
        ALLOC_BUDGET.with(|b| b.set(8));
        assert_eq!(d.try_put(8, 16), Err(DictError::BucketAllocationFailed));
        assert_eq!(d.stats(), before);
        assert_eq!(d.capacity(), 8);
        assert!(!d.contains_key(&8));
        assert!(cursor.next_entry(&d).unwrap().is_some());
        d.check_invariants();

        ALLOC_BUDGET.with(|b| b.set(usize::MAX));
        assert_eq!(d.try_put(8, 16), Ok(None));
        assert_eq!(d.capacity(), 16);
        assert_eq!(d.get(&8), Ok(&16));
        d.check_invariants();
    }

    /// Invariant: an overwrite that triggers growth needs no new bucket, so
    /// the rehash budget alone is enough.
    #[test]
    fn overwrite_during_growth_reuses_existing_bucket() {
        let mut d = full_flaky_dict();
        ALLOC_BUDGET.with(|b| b.set(8));
        assert_eq!(d.try_put(3, 33), Ok(Some(6)));
        assert_eq!(d.capacity(), 16);
        assert_eq!(d.len(), 8);
        ALLOC_BUDGET.with(|b| b.set(usize::MAX));
        d.check_invariants();
    }

    /// Invariant: `put` turns the same failure into a panic without
    /// corrupting the table.
    #[test]
    fn put_panics_on_allocation_failure() {
        let mut d = full_flaky_dict();
        ALLOC_BUDGET.with(|b| b.set(0));
        let res = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            d.put(100, 200);
        }));
        assert!(res.is_err());
        ALLOC_BUDGET.with(|b| b.set(usize::MAX));
        assert_eq!(d.len(), 8);
        assert_eq!(d.capacity(), 8);
        d.check_invariants();
    }

    /// Invariant: failing to create a fresh bucket for an empty slot is
    /// reported and leaves `len` untouched.
    #[test]
    fn bucket_creation_failure_is_reported() {
        ALLOC_BUDGET.with(|b| b.set(0));
        let mut d = FlakyDict::default();
        assert_eq!(d.try_put(1, 1), Err(DictError::BucketAllocationFailed));
        assert!(d.is_empty());
        ALLOC_BUDGET.with(|b| b.set(usize::MAX));
        d.check_invariants();
    }

    /// Invariant (debug-only): re-entering the dictionary from `K: Eq` while a
    /// slot is probed panics.
    #[cfg(debug_assertions)]
    #[test]
    fn reentrancy_panics_from_eq_during_get() {
        struct ReentryKey {
            id: &'static str,
            map: *const ChainedHashDict<ReentryKey, i32, ConstBuildHasher>,
            trigger: bool,
        }
        impl PartialEq for ReentryKey {
            fn eq(&self, other: &Self) -> bool {
                if self.id == other.id {
                    return true;
                }
                if other.trigger {
                    unsafe {
                        let m = &*other.map;
                        let _ = m.contains_key(self);
                    }
                }
                false
            }
        }
        impl Eq for ReentryKey {}
        impl Hash for ReentryKey {
            fn hash<H: Hasher>(&self, state: &mut H) {
                self.id.hash(state);
            }
        }

        let mut d: ChainedHashDict<ReentryKey, i32, ConstBuildHasher> =
            ChainedHashDict::with_hasher(ConstBuildHasher);
        d.put(
            ReentryKey {
                id: "a",
                map: core::ptr::null(),
                trigger: false,
            },
            1,
        );
        let query = ReentryKey {
            id: "b",
            map: &d as *const _,
            trigger: true,
        };
        let res = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let _ = d.get(&query);
        }));
        assert!(res.is_err(), "expected reentrancy to panic in debug builds");
    }
}
