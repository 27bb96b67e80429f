//! Per-slot small dictionaries.
//!
//! A slot of `ChainedHashDict` owns at most one bucket holding every entry
//! whose hash maps to that slot. The engine only talks to buckets through the
//! `Bucket` trait. Every entry carries the `u64` hash computed when it was
//! inserted, so buckets can reject mismatches without calling `K: Eq` and
//! rehashing never calls `K: Hash`.

use core::borrow::Borrow;
use core::iter::FusedIterator;
use core::mem;
use hashbrown::hash_table::{self, HashTable};

#[derive(Debug, Clone)]
pub(crate) struct Entry<K, V> {
    key: K,
    value: V,
    hash: u64,
}

/// Small unordered key/value container used as the chain of one slot.
///
/// Lookups receive the precomputed hash of the probed key alongside the key
/// itself. Implementations must never hold two entries with equal keys.
pub trait Bucket<K, V>: Sized {
    type Iter<'a>: Iterator<Item = (&'a K, &'a V)>
    where
        Self: 'a,
        K: 'a,
        V: 'a;

    type IterMut<'a>: Iterator<Item = (&'a K, &'a mut V)>
    where
        Self: 'a,
        K: 'a,
        V: 'a;

    /// Owning drain yielding `(hash, key, value)`.
    type IntoEntries: Iterator<Item = (u64, K, V)>;

    /// Empty bucket with room for `capacity` entries, or `None` if the
    /// allocation failed. Rehash relies on `insert_unique` not allocating
    /// again until `capacity` entries are stored.
    fn try_with_capacity(capacity: usize) -> Option<Self>;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn get<Q>(&self, hash: u64, q: &Q) -> Option<&V>
    where
        K: Borrow<Q>,
        Q: ?Sized + Eq;

    fn get_mut<Q>(&mut self, hash: u64, q: &Q) -> Option<&mut V>
    where
        K: Borrow<Q>,
        Q: ?Sized + Eq;

    fn contains_key<Q>(&self, hash: u64, q: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: ?Sized + Eq,
    {
        self.get(hash, q).is_some()
    }

    /// Insert or overwrite. Returns the previous value for an existing key.
    fn put(&mut self, hash: u64, key: K, value: V) -> Option<V>;

    fn remove<Q>(&mut self, hash: u64, q: &Q) -> Option<(K, V)>
    where
        K: Borrow<Q>,
        Q: ?Sized + Eq;

    /// Append an entry whose key is known to be absent. Never calls `K: Eq`.
    fn insert_unique(&mut self, hash: u64, key: K, value: V);

    fn iter<'a>(&'a self) -> Self::Iter<'a>
    where
        K: 'a,
        V: 'a;

    fn iter_mut<'a>(&'a mut self) -> Self::IterMut<'a>
    where
        K: 'a,
        V: 'a;

    fn into_entries(self) -> Self::IntoEntries;

    /// Entry at iteration position `pos`, stable while the bucket is not
    /// structurally modified.
    fn entry_at<'a>(&'a self, pos: usize) -> Option<(&'a K, &'a V)>
    where
        K: 'a,
        V: 'a,
    {
        self.iter().nth(pos)
    }

    fn for_each_hash(&self, f: impl FnMut(u64));
}

/// Vector-backed bucket: linear scan over a handful of entries.
#[derive(Debug, Clone)]
pub struct ArrayBucket<K, V> {
    entries: Vec<Entry<K, V>>,
}

impl<K, V> ArrayBucket<K, V> {
    fn position<Q>(&self, hash: u64, q: &Q) -> Option<usize>
    where
        K: Borrow<Q>,
        Q: ?Sized + Eq,
    {
        self.entries
            .iter()
            .position(|e| e.hash == hash && e.key.borrow() == q)
    }
}

impl<K: Eq, V> Bucket<K, V> for ArrayBucket<K, V> {
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
        let mut entries = Vec::new();
        entries.try_reserve_exact(capacity).ok()?;
        Some(Self { entries })
    }

    fn len(&self) -> usize {
        self.entries.len()
    }

    fn get<Q>(&self, hash: u64, q: &Q) -> Option<&V>
    where
        K: Borrow<Q>,
        Q: ?Sized + Eq,
    {
        self.position(hash, q).map(|i| &self.entries[i].value)
    }

    fn get_mut<Q>(&mut self, hash: u64, q: &Q) -> Option<&mut V>
    where
        K: Borrow<Q>,
        Q: ?Sized + Eq,
    {
        let i = self.position(hash, q)?;
        Some(&mut self.entries[i].value)
    }

    fn put(&mut self, hash: u64, key: K, value: V) -> Option<V> {
        match self.position(hash, &key) {
            Some(i) => Some(mem::replace(&mut self.entries[i].value, value)),
            None => {
                self.entries.push(Entry { key, value, hash });
                None
            }
        }
    }

    fn remove<Q>(&mut self, hash: u64, q: &Q) -> Option<(K, V)>
    where
        K: Borrow<Q>,
        Q: ?Sized + Eq,
    {
        let i = self.position(hash, q)?;
        let e = self.entries.swap_remove(i);
        Some((e.key, e.value))
    }

    fn insert_unique(&mut self, hash: u64, key: K, value: V) {
        self.entries.push(Entry { key, value, hash });
    }

    fn iter<'a>(&'a self) -> Self::Iter<'a>
    where
        K: 'a,
        V: 'a,
    {
        ArrayIter {
            it: self.entries.iter(),
        }
    }

    fn iter_mut<'a>(&'a mut self) -> Self::IterMut<'a>
    where
        K: 'a,
        V: 'a,
    {
        ArrayIterMut {
            it: self.entries.iter_mut(),
        }
    }

    fn into_entries(self) -> Self::IntoEntries {
        ArrayIntoEntries {
            it: self.entries.into_iter(),
        }
    }

    fn entry_at<'a>(&'a self, pos: usize) -> Option<(&'a K, &'a V)>
    where
        K: 'a,
        V: 'a,
    {
        self.entries.get(pos).map(|e| (&e.key, &e.value))
    }

    fn for_each_hash(&self, mut f: impl FnMut(u64)) {
        for e in &self.entries {
            f(e.hash);
        }
    }
}

pub struct ArrayIter<'a, K, V> {
    it: core::slice::Iter<'a, Entry<K, V>>,
}

impl<'a, K, V> Iterator for ArrayIter<'a, K, V> {
    type Item = (&'a K, &'a V);
    #[inline]
    fn next(&mut self) -> Option<Self::Item> {
        self.it.next().map(|e| (&e.key, &e.value))
    }
    #[inline]
    fn size_hint(&self) -> (usize, Option<usize>) {
        self.it.size_hint()
    }
}

impl<K, V> ExactSizeIterator for ArrayIter<'_, K, V> {}
impl<K, V> FusedIterator for ArrayIter<'_, K, V> {}

pub struct ArrayIterMut<'a, K, V> {
    it: core::slice::IterMut<'a, Entry<K, V>>,
}

impl<'a, K, V> Iterator for ArrayIterMut<'a, K, V> {
    type Item = (&'a K, &'a mut V);
    #[inline]
    fn next(&mut self) -> Option<Self::Item> {
        self.it.next().map(|e| (&e.key, &mut e.value))
    }
    #[inline]
    fn size_hint(&self) -> (usize, Option<usize>) {
        self.it.size_hint()
    }
}

pub struct ArrayIntoEntries<K, V> {
    it: std::vec::IntoIter<Entry<K, V>>,
}

impl<K, V> Iterator for ArrayIntoEntries<K, V> {
    type Item = (u64, K, V);
    #[inline]
    fn next(&mut self) -> Option<Self::Item> {
        self.it.next().map(|e| (e.hash, e.key, e.value))
    }
    #[inline]
    fn size_hint(&self) -> (usize, Option<usize>) {
        self.it.size_hint()
    }
}

/// Bucket backed by a `hashbrown::HashTable`, keyed by the stored hash.
///
/// Suited to weak or adversarial hashers where many keys share a slot:
/// lookups inside the chain stay O(1) average as long as the full 64-bit
/// hashes differ.
///
/// Positional access has no direct support in the table, so `entry_at`
/// walks from the start and a `Cursor` over a chain of n entries costs
/// O(n^2). Borrowing iteration is linear.
#[derive(Debug, Clone)]
pub struct TableBucket<K, V> {
    table: HashTable<Entry<K, V>>,
}

impl<K: Eq, V> Bucket<K, V> for TableBucket<K, V> {
    type Iter<'a> = TableIter<'a, K, V>
    where
        Self: 'a,
        K: 'a,
        V: 'a;

    type IterMut<'a> = TableIterMut<'a, K, V>
    where
        Self: 'a,
        K: 'a,
        V: 'a;

    type IntoEntries = TableIntoEntries<K, V>;

    fn try_with_capacity(capacity: usize) -> Option<Self> {
        let mut table = HashTable::new();
        table
            .try_reserve(capacity, |e: &Entry<K, V>| e.hash)
            .ok()?;
        Some(Self { table })
    }

    fn len(&self) -> usize {
        self.table.len()
    }

    fn get<Q>(&self, hash: u64, q: &Q) -> Option<&V>
    where
        K: Borrow<Q>,
        Q: ?Sized + Eq,
    {
        self.table
            .find(hash, |e| e.hash == hash && e.key.borrow() == q)
            .map(|e| &e.value)
    }

    fn get_mut<Q>(&mut self, hash: u64, q: &Q) -> Option<&mut V>
    where
        K: Borrow<Q>,
        Q: ?Sized + Eq,
    {
        self.table
            .find_mut(hash, |e| e.hash == hash && e.key.borrow() == q)
            .map(|e| &mut e.value)
    }

    fn put(&mut self, hash: u64, key: K, value: V) -> Option<V> {
        match self
            .table
            .entry(hash, |e| e.hash == hash && e.key == key, |e| e.hash)
        {
            hash_table::Entry::Occupied(mut o) => Some(mem::replace(&mut o.get_mut().value, value)),
            hash_table::Entry::Vacant(v) => {
                v.insert(Entry { key, value, hash });
                None
            }
        }
    }

    fn remove<Q>(&mut self, hash: u64, q: &Q) -> Option<(K, V)>
    where
        K: Borrow<Q>,
        Q: ?Sized + Eq,
    {
        let occupied = self
            .table
            .find_entry(hash, |e| e.hash == hash && e.key.borrow() == q)
            .ok()?;
        let (e, _) = occupied.remove();
        Some((e.key, e.value))
    }

    fn insert_unique(&mut self, hash: u64, key: K, value: V) {
        self.table
            .insert_unique(hash, Entry { key, value, hash }, |e| e.hash);
    }

    fn iter<'a>(&'a self) -> Self::Iter<'a>
    where
        K: 'a,
        V: 'a,
    {
        TableIter {
            it: self.table.iter(),
        }
    }

    fn iter_mut<'a>(&'a mut self) -> Self::IterMut<'a>
    where
        K: 'a,
        V: 'a,
    {
        TableIterMut {
            it: self.table.iter_mut(),
        }
    }

    fn into_entries(self) -> Self::IntoEntries {
        TableIntoEntries {
            it: self.table.into_iter(),
        }
    }

    fn for_each_hash(&self, mut f: impl FnMut(u64)) {
        for e in self.table.iter() {
            f(e.hash);
        }
    }
}

pub struct TableIter<'a, K, V> {
    it: hash_table::Iter<'a, Entry<K, V>>,
}

impl<'a, K, V> Iterator for TableIter<'a, K, V> {
    type Item = (&'a K, &'a V);
    #[inline]
    fn next(&mut self) -> Option<Self::Item> {
        self.it.next().map(|e| (&e.key, &e.value))
    }
    #[inline]
    fn size_hint(&self) -> (usize, Option<usize>) {
        self.it.size_hint()
    }
}

pub struct TableIterMut<'a, K, V> {
    it: hash_table::IterMut<'a, Entry<K, V>>,
}

impl<'a, K, V> Iterator for TableIterMut<'a, K, V> {
    type Item = (&'a K, &'a mut V);
    #[inline]
    fn next(&mut self) -> Option<Self::Item> {
        self.it.next().map(|e| (&e.key, &mut e.value))
    }
    #[inline]
    fn size_hint(&self) -> (usize, Option<usize>) {
        self.it.size_hint()
    }
}

pub struct TableIntoEntries<K, V> {
    it: hash_table::IntoIter<Entry<K, V>>,
}

impl<K, V> Iterator for TableIntoEntries<K, V> {
    type Item = (u64, K, V);
    #[inline]
    fn next(&mut self) -> Option<Self::Item> {
        self.it.next().map(|e| (e.hash, e.key, e.value))
    }
    #[inline]
    fn size_hint(&self) -> (usize, Option<usize>) {
        self.it.size_hint()
    }
}
