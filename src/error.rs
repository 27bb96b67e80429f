//! Error types surfaced by the dictionary and its configuration.

use thiserror::Error;

/// Failure of a dictionary operation.
///
/// `NoSuchKey` is the only variant produced by ordinary lookups; the others are
/// reported by fallible growth (`try_put`) and by detached cursors.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DictError {
    #[error("no such key")]
    NoSuchKey,

    #[error("failed to allocate {slots} slots while rehashing")]
    AllocationFailed { slots: usize },

    #[error("failed to allocate a bucket for an empty slot")]
    BucketAllocationFailed,

    #[error("capacity overflow: cannot grow beyond {capacity} slots")]
    CapacityOverflow { capacity: usize },

    #[error(
        "dictionary structurally modified during iteration (cursor generation {expected}, dictionary generation {found})"
    )]
    ConcurrentModification { expected: u64, found: u64 },
}

/// Rejected `DictConfig`.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ConfigError {
    #[error("initial capacity must be at least 1")]
    ZeroCapacity,

    #[error("max load factor must be finite and positive, got {0}")]
    InvalidLoadFactor(f64),
}
