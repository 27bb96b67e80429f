//! Structural bookkeeping shared by every dictionary entry point.
//!
//! A `StructureTracker` records two things:
//! - a generation number bumped on every structural change (entry added or
//!   removed, rehash, clear). Detached cursors snapshot it and fail fast
//!   when it moves.
//! - in debug builds, a nesting depth that panics if user code (`K: Eq` or
//!   `K: Hash`) re-enters the same dictionary while a slot is being probed.
//!   In release builds the depth check compiles to nothing.

use core::cell::Cell;
use core::marker::PhantomData;

#[derive(Debug)]
pub(crate) struct StructureTracker {
    generation: u64,
    #[cfg(debug_assertions)]
    depth: Cell<u32>,
    // !Sync in every build profile, not only when `depth` is present.
    _not_sync: PhantomData<Cell<()>>,
}

impl StructureTracker {
    pub(crate) const fn new() -> Self {
        Self {
            generation: 0,
            #[cfg(debug_assertions)]
            depth: Cell::new(0),
            _not_sync: PhantomData,
        }
    }

    #[inline]
    pub(crate) fn generation(&self) -> u64 {
        self.generation
    }

    /// Record a structural modification.
    #[inline]
    pub(crate) fn bump(&mut self) {
        self.generation = self.generation.wrapping_add(1);
    }

    /// Enter a probing section. In debug builds, panics if already entered.
    #[inline]
    pub(crate) fn enter(&self) -> ProbeGuard<'_> {
        #[cfg(debug_assertions)]
        {
            let d = self.depth.get();
            assert!(
                d == 0,
                "reentrancy detected: dictionary accessed from within K: Eq/Hash"
            );
            self.depth.set(d + 1);
            ProbeGuard { owner: self }
        }

        #[cfg(not(debug_assertions))]
        {
            ProbeGuard { _z: PhantomData }
        }
    }
}

impl Default for StructureTracker {
    fn default() -> Self {
        Self::new()
    }
}

/// RAII guard returned by `StructureTracker::enter`.
pub(crate) struct ProbeGuard<'a> {
    #[cfg(debug_assertions)]
    owner: &'a StructureTracker,
    #[cfg(not(debug_assertions))]
    _z: PhantomData<&'a ()>,
}

impl Drop for ProbeGuard<'_> {
    fn drop(&mut self) {
        #[cfg(debug_assertions)]
        {
            let d = self.owner.depth.get();
            debug_assert!(d > 0);
            self.owner.depth.set(d - 1);
        }
    }
}
