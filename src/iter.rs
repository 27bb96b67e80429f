//! Iteration over a `ChainedHashDict`.
//!
//! Borrowing iterators walk the slot vector in order and, inside each
//! occupied slot, the bucket's own iterator. Empty slots are skipped. While
//! one of them is alive the borrow checker rules out structural changes.
//!
//! `Cursor` is the detached alternative: it holds a position instead of a
//! borrow, so the dictionary may be mutated between steps. Every step
//! compares the dictionary's generation against the one captured when the
//! cursor was created and fails with `DictError::ConcurrentModification`
//! after any insert of a new key, removal, rehash or clear.

use crate::bucket::Bucket;
use crate::chained_hash_dict::ChainedHashDict;
use crate::error::DictError;
use core::hash::{BuildHasher, Hash};
use core::iter::FusedIterator;
use core::marker::PhantomData;

/// Iterator over `(&K, &V)` in slot order, then bucket order.
pub struct Iter<'a, K, V, B>
where
    B: Bucket<K, V> + 'a,
    K: 'a,
    V: 'a,
{
    slots: core::slice::Iter<'a, Option<B>>,
    current: Option<B::Iter<'a>>,
    remaining: usize,
    _pd: PhantomData<&'a (K, V)>,
}

impl<'a, K, V, B> Iter<'a, K, V, B>
where
    B: Bucket<K, V> + 'a,
    K: 'a,
    V: 'a,
{
    pub(crate) fn new(slots: &'a [Option<B>], len: usize) -> Self {
        Self {
            slots: slots.iter(),
            current: None,
            remaining: len,
            _pd: PhantomData,
        }
    }
}

impl<'a, K, V, B> Iterator for Iter<'a, K, V, B>
where
    B: Bucket<K, V> + 'a,
    K: 'a,
    V: 'a,
{
    type Item = (&'a K, &'a V);

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(kv) = self.current.as_mut().and_then(Iterator::next) {
                self.remaining -= 1;
                return Some(kv);
            }
            self.current = self.slots.next()?.as_ref().map(|b| b.iter());
        }
    }

    #[inline]
    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.remaining, Some(self.remaining))
    }
}

impl<'a, K: 'a, V: 'a, B: Bucket<K, V> + 'a> ExactSizeIterator for Iter<'a, K, V, B> {}
impl<'a, K: 'a, V: 'a, B: Bucket<K, V> + 'a> FusedIterator for Iter<'a, K, V, B> {}

/// Iterator over `(&K, &mut V)`.
pub struct IterMut<'a, K, V, B>
where
    B: Bucket<K, V> + 'a,
    K: 'a,
    V: 'a,
{
    slots: core::slice::IterMut<'a, Option<B>>,
    current: Option<B::IterMut<'a>>,
    remaining: usize,
    _pd: PhantomData<&'a mut (K, V)>,
}

impl<'a, K, V, B> IterMut<'a, K, V, B>
where
    B: Bucket<K, V> + 'a,
    K: 'a,
    V: 'a,
{
    pub(crate) fn new(slots: &'a mut [Option<B>], len: usize) -> Self {
        Self {
            slots: slots.iter_mut(),
            current: None,
            remaining: len,
            _pd: PhantomData,
        }
    }
}

impl<'a, K, V, B> Iterator for IterMut<'a, K, V, B>
where
    B: Bucket<K, V> + 'a,
    K: 'a,
    V: 'a,
{
    type Item = (&'a K, &'a mut V);

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(kv) = self.current.as_mut().and_then(Iterator::next) {
                self.remaining -= 1;
                return Some(kv);
            }
            self.current = self.slots.next()?.as_mut().map(|b| b.iter_mut());
        }
    }

    #[inline]
    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.remaining, Some(self.remaining))
    }
}

impl<'a, K: 'a, V: 'a, B: Bucket<K, V> + 'a> ExactSizeIterator for IterMut<'a, K, V, B> {}
impl<'a, K: 'a, V: 'a, B: Bucket<K, V> + 'a> FusedIterator for IterMut<'a, K, V, B> {}

/// Owning iterator over `(K, V)`.
pub struct IntoIter<K, V, B>
where
    B: Bucket<K, V>,
{
    slots: std::vec::IntoIter<Option<B>>,
    current: Option<B::IntoEntries>,
    remaining: usize,
    _pd: PhantomData<(K, V)>,
}

impl<K, V, B: Bucket<K, V>> IntoIter<K, V, B> {
    pub(crate) fn new(slots: Vec<Option<B>>, len: usize) -> Self {
        Self {
            slots: slots.into_iter(),
            current: None,
            remaining: len,
            _pd: PhantomData,
        }
    }
}

impl<K, V, B: Bucket<K, V>> Iterator for IntoIter<K, V, B> {
    type Item = (K, V);

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some((_, k, v)) = self.current.as_mut().and_then(Iterator::next) {
                self.remaining -= 1;
                return Some((k, v));
            }
            self.current = self.slots.next()?.map(|b| b.into_entries());
        }
    }

    #[inline]
    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.remaining, Some(self.remaining))
    }
}

impl<K, V, B: Bucket<K, V>> ExactSizeIterator for IntoIter<K, V, B> {}
impl<K, V, B: Bucket<K, V>> FusedIterator for IntoIter<K, V, B> {}

pub struct Keys<'a, K, V, B>
where
    B: Bucket<K, V> + 'a,
    K: 'a,
    V: 'a,
{
    pub(crate) inner: Iter<'a, K, V, B>,
}

impl<'a, K: 'a, V: 'a, B: Bucket<K, V> + 'a> Iterator for Keys<'a, K, V, B> {
    type Item = &'a K;
    #[inline]
    fn next(&mut self) -> Option<Self::Item> {
        self.inner.next().map(|(k, _)| k)
    }
    #[inline]
    fn size_hint(&self) -> (usize, Option<usize>) {
        self.inner.size_hint()
    }
}

impl<'a, K: 'a, V: 'a, B: Bucket<K, V> + 'a> ExactSizeIterator for Keys<'a, K, V, B> {}
impl<'a, K: 'a, V: 'a, B: Bucket<K, V> + 'a> FusedIterator for Keys<'a, K, V, B> {}

pub struct Values<'a, K, V, B>
where
    B: Bucket<K, V> + 'a,
    K: 'a,
    V: 'a,
{
    pub(crate) inner: Iter<'a, K, V, B>,
}

impl<'a, K: 'a, V: 'a, B: Bucket<K, V> + 'a> Iterator for Values<'a, K, V, B> {
    type Item = &'a V;
    #[inline]
    fn next(&mut self) -> Option<Self::Item> {
        self.inner.next().map(|(_, v)| v)
    }
    #[inline]
    fn size_hint(&self) -> (usize, Option<usize>) {
        self.inner.size_hint()
    }
}

impl<'a, K: 'a, V: 'a, B: Bucket<K, V> + 'a> ExactSizeIterator for Values<'a, K, V, B> {}
impl<'a, K: 'a, V: 'a, B: Bucket<K, V> + 'a> FusedIterator for Values<'a, K, V, B> {}

pub struct ValuesMut<'a, K, V, B>
where
    B: Bucket<K, V> + 'a,
    K: 'a,
    V: 'a,
{
    pub(crate) inner: IterMut<'a, K, V, B>,
}

impl<'a, K: 'a, V: 'a, B: Bucket<K, V> + 'a> Iterator for ValuesMut<'a, K, V, B> {
    type Item = &'a mut V;
    #[inline]
    fn next(&mut self) -> Option<Self::Item> {
        self.inner.next().map(|(_, v)| v)
    }
    #[inline]
    fn size_hint(&self) -> (usize, Option<usize>) {
        self.inner.size_hint()
    }
}

impl<'a, K: 'a, V: 'a, B: Bucket<K, V> + 'a> ExactSizeIterator for ValuesMut<'a, K, V, B> {}
impl<'a, K: 'a, V: 'a, B: Bucket<K, V> + 'a> FusedIterator for ValuesMut<'a, K, V, B> {}

/// Detached, fail-fast iteration position.
///
/// A cursor does not borrow the dictionary; pass the dictionary to each
/// [`next_entry`](Cursor::next_entry) call instead. A cursor must only be
/// used with the dictionary that created it. Overwriting the value of an
/// existing key is not a structural change and does not invalidate it.
///
/// Each step looks up its position inside the current bucket with
/// [`Bucket::entry_at`]. That is O(1) for `ArrayBucket` but O(position) for
/// `TableBucket`, so walking a chain of n entries there costs O(n^2). Prefer
/// the borrowing iterators over long `TableBucket` chains.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cursor {
    generation: u64,
    slot: usize,
    pos: usize,
}

impl Cursor {
    pub(crate) fn new(generation: u64) -> Self {
        Self {
            generation,
            slot: 0,
            pos: 0,
        }
    }

    /// Advance and return the next entry, `Ok(None)` once exhausted.
    pub fn next_entry<'a, K, V, S, B>(
        &mut self,
        dict: &'a ChainedHashDict<K, V, S, B>,
    ) -> Result<Option<(&'a K, &'a V)>, DictError>
    where
        K: Eq + Hash,
        S: BuildHasher,
        B: Bucket<K, V>,
    {
        let found = dict.tracker.generation();
        if found != self.generation {
            return Err(DictError::ConcurrentModification {
                expected: self.generation,
                found,
            });
        }
        while let Some(slot) = dict.slots.get(self.slot) {
            if let Some(kv) = slot.as_ref().and_then(|b| b.entry_at(self.pos)) {
                self.pos += 1;
                return Ok(Some(kv));
            }
            self.slot += 1;
            self.pos = 0;
        }
        Ok(None)
    }
}
