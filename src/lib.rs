//! chain-dict: a single-threaded key/value dictionary built on separate
//! chaining, with pluggable per-slot buckets and all-or-nothing rehashing.
//!
//! Internal Design:
//!
//! Summary
//! - Goal: a hash dictionary whose growth and chain management are explicit
//!   and inspectable, layered so each piece has a small contract.
//! - Layers:
//!   - `Bucket<K, V>`: the small per-slot dictionary. Stores the `u64` hash
//!     of every entry next to it. Two implementations: `ArrayBucket`
//!     (vector, linear scan; the default) and `TableBucket` (a
//!     `hashbrown::HashTable`, for long chains under weak hashers).
//!   - `ChainedHashDict<K, V, S, B>`: owns `Vec<Option<B>>`, maps a key to
//!     slot `hash mod capacity` and delegates to that slot's bucket. Buckets
//!     are created on first insert into a slot and dropped when emptied.
//!   - Iteration: borrowing iterators compose a slot cursor with the
//!     current bucket's iterator; `Cursor` is a detached, fail-fast variant.
//!
//! Constraints
//! - Single-threaded: no internal locking. The dictionary is `Send` when its
//!   parts are but never `Sync`; wrap it in a `Mutex` to share it.
//! - `len()` is tracked incrementally, never recomputed by scanning.
//! - Absent keys are reported as `DictError::NoSuchKey`, never as a sentinel
//!   value, so a stored `None` stays distinguishable from a missing key.
//!
//! Growth
//! - Before inserting, `put` checks `len / capacity` against the configured
//!   maximum load factor (default 1.0) and doubles the slot array when it
//!   has been reached, repeatedly within the same rehash if a load factor
//!   below 1 requires it. Starting from one slot with the default load
//!   factor, N distinct inserts rehash ceil(log2 N) times.
//! - Rehash builds the whole new table first: the slot vector and every
//!   bucket, pre-sized to the number of entries it will receive. Only then
//!   are entries moved, by stored hash, with neither allocation nor calls
//!   into `K: Eq`/`K: Hash`. When the key being put lands in a slot that
//!   will be empty, its bucket is allocated before the swap as well. An
//!   allocation failure drops everything built so far and leaves the
//!   dictionary as it was (`try_put` reports it, `put` panics).
//!
//! Reentrancy policy
//! - Probing a slot may call user code (`K: Hash`, `K: Eq`). In debug
//!   builds a guard panics if that code re-enters the same dictionary. In
//!   release builds the guard is a no-op.
//! - Removed keys and values are handed back to the caller, so their `Drop`
//!   runs after the dictionary is consistent again.
//!
//! Iteration and modification
//! - `iter`/`iter_mut`/`keys`/`values` borrow the dictionary, so mutation
//!   during iteration does not compile.
//! - `Cursor` holds only a position and the generation it started at. Any
//!   structural change (new key, removal, rehash, clear) bumps the
//!   generation and the next step returns
//!   `DictError::ConcurrentModification`. Overwriting an existing key's
//!   value is not structural.
//!
//! Logging
//! - Uses the `log` facade: `debug!` on every rehash, `trace!` when a slot
//!   gains or loses its bucket. No logger is installed by the library.

pub mod bucket;
mod chained_hash_dict;
mod chained_hash_dict_proptest;
pub mod config;
pub mod error;
mod guard;
pub mod iter;

// Public surface
pub use bucket::{ArrayBucket, Bucket, TableBucket};
pub use chained_hash_dict::{ChainedHashDict, DictStats};
pub use config::DictConfig;
pub use error::{ConfigError, DictError};
pub use iter::Cursor;
