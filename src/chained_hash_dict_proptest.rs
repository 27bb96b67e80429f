#![cfg(test)]

// Property tests for ChainedHashDict kept inside the crate so they can call
// the internal invariant check after every operation.

use crate::bucket::{ArrayBucket, Bucket, TableBucket};
use crate::chained_hash_dict::ChainedHashDict;
use crate::config::DictConfig;
use crate::error::DictError;
use proptest::prelude::*;
use std::collections::hash_map::RandomState;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::hash::{BuildHasher, Hasher};

// Key newtype with Borrow<str> to exercise borrowed lookup.
#[derive(Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
struct Key(String);
impl fmt::Debug for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}
impl std::borrow::Borrow<str> for Key {
    fn borrow(&self) -> &str {
        &self.0
    }
}

// Pool-indexed operations to improve shrinking: indices shrink to earlier keys,
// pool length shrinks, and op lists shrink in length.
#[derive(Clone, Debug)]
enum OpI {
    Put(usize, i32),
    Remove(usize),
    Get(usize),
    Contains(String),
    Mutate(usize, i32),
    Iterate,
    Cursor,
    Clear,
}

fn key_from(pool: &[String], i: usize) -> Key {
    Key(pool[i].clone())
}

fn arb_scenario() -> impl Strategy<Value = (Vec<String>, Vec<OpI>)> {
    proptest::collection::vec("[a-z]{0,5}", 1..=12).prop_flat_map(|pool| {
        let idxs: Vec<usize> = (0..pool.len()).collect();
        let idx = proptest::sample::select(idxs);
        let contains_pool = proptest::sample::select(pool.clone());
        let op = prop_oneof![
            6 => (idx.clone(), any::<i32>()).prop_map(|(i, v)| OpI::Put(i, v)),
            3 => idx.clone().prop_map(OpI::Remove),
            2 => idx.clone().prop_map(OpI::Get),
            1 => prop_oneof![
                contains_pool.prop_map(|s: String| s),
                "[a-z]{0,5}".prop_map(|s| s)
            ]
            .prop_map(OpI::Contains),
            1 => (idx.clone(), any::<i32>()).prop_map(|(i, d)| OpI::Mutate(i, d)),
            1 => Just(OpI::Iterate),
            1 => Just(OpI::Cursor),
            1 => Just(OpI::Clear),
        ];
        proptest::collection::vec(op, 1..80).prop_map(move |ops| (pool.clone(), ops))
    })
}

// Collision variant using a constant hasher to stress equality resolution.
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
    }
}

// State-machine equivalence against std::collections::HashMap.
// Invariants exercised across random operation sequences:
// - `put` returns the previous value exactly when the model had one.
// - `get`/`remove` return the model's value or `NoSuchKey`; a failed
//   remove leaves `len` unchanged.
// - `contains_key` parity, including borrowed `&str` lookups.
// - `iter` and a fresh `Cursor` each yield every live entry exactly once.
// - `len`/`is_empty` parity, load factor within the configured bound, and
//   the structural invariants (keys in their hashed slot, no empty
//   buckets, len == sum of bucket sizes) hold after every op.
fn run_state_machine<S, B>(
    mut sut: ChainedHashDict<Key, i32, S, B>,
    pool: &[String],
    ops: Vec<OpI>,
) -> Result<(), TestCaseError>
where
    S: BuildHasher,
    B: Bucket<Key, i32>,
{
    let mut model: HashMap<Key, i32> = HashMap::new();
    let max_load = sut.config().get_max_load_factor();

    for op in ops {
        match op {
            OpI::Put(i, v) => {
                let k = key_from(pool, i);
                let prev = sut.put(k.clone(), v);
                prop_assert_eq!(prev, model.insert(k, v));
            }
            OpI::Remove(i) => {
                let k = key_from(pool, i);
                let before = sut.len();
                match model.remove(&k) {
                    Some(mv) => prop_assert_eq!(sut.remove(&k), Ok(mv)),
                    None => {
                        prop_assert_eq!(sut.remove(&k), Err(DictError::NoSuchKey));
                        prop_assert_eq!(sut.len(), before);
                    }
                }
            }
            OpI::Get(i) => {
                let k = key_from(pool, i);
                match model.get(&k) {
                    Some(mv) => prop_assert_eq!(sut.get(&k), Ok(mv)),
                    None => prop_assert_eq!(sut.get(&k), Err(DictError::NoSuchKey)),
                }
            }
            OpI::Contains(s) => {
                let has = sut.contains_key(s.as_str());
                let has_model = model.keys().any(|k| k.0 == s);
                prop_assert_eq!(has, has_model);
            }
            OpI::Mutate(i, d) => {
                let k = key_from(pool, i);
                match (sut.get_mut(&k), model.get_mut(&k)) {
                    (Ok(sv), Some(mv)) => {
                        *sv = sv.saturating_add(d);
                        *mv = mv.saturating_add(d);
                    }
                    (Err(DictError::NoSuchKey), None) => {}
                    (s, m) => prop_assert!(false, "get_mut mismatch: {:?} vs {:?}", s, m),
                }
            }
            OpI::Iterate => {
                let mut seen: BTreeMap<Key, i32> = BTreeMap::new();
                for (k, v) in sut.iter() {
                    prop_assert!(seen.insert(k.clone(), *v).is_none(), "duplicate key in iter");
                }
                let expected: BTreeMap<Key, i32> =
                    model.iter().map(|(k, v)| (k.clone(), *v)).collect();
                prop_assert_eq!(seen, expected);
            }
            OpI::Cursor => {
                let mut cursor = sut.cursor();
                let mut n = 0;
                while let Some((k, v)) = cursor.next_entry(&sut).expect("unmodified dictionary") {
                    prop_assert_eq!(model.get(k), Some(v));
                    n += 1;
                }
                prop_assert_eq!(n, model.len());
            }
            OpI::Clear => {
                sut.clear();
                model.clear();
            }
        }

        sut.check_invariants();
        prop_assert_eq!(sut.len(), model.len());
        prop_assert_eq!(sut.is_empty(), model.is_empty());
        // One put may land exactly on the threshold before the next grows.
        prop_assert!(sut.load_factor() <= max_load + 1.0 / sut.capacity() as f64);
    }
    Ok(())
}

proptest! {
    #![proptest_config(ProptestConfig { cases: 64, .. ProptestConfig::default() })]

    #[test]
    fn prop_state_machine((pool, ops) in arb_scenario()) {
        let sut: ChainedHashDict<Key, i32> = ChainedHashDict::new();
        run_state_machine(sut, &pool, ops)?;
    }

    // Same invariants under worst-case collisions: every key shares slot 0.
    #[test]
    fn prop_state_machine_with_collisions((pool, ops) in arb_scenario()) {
        let sut: ChainedHashDict<Key, i32, ConstBuildHasher> =
            ChainedHashDict::with_hasher(ConstBuildHasher);
        run_state_machine(sut, &pool, ops)?;
    }

    #[test]
    fn prop_state_machine_table_bucket((pool, ops) in arb_scenario()) {
        let sut: ChainedHashDict<Key, i32, RandomState, TableBucket<Key, i32>> =
            ChainedHashDict::default();
        run_state_machine(sut, &pool, ops)?;
    }

    #[test]
    fn prop_state_machine_table_bucket_with_collisions((pool, ops) in arb_scenario()) {
        let sut: ChainedHashDict<Key, i32, ConstBuildHasher, TableBucket<Key, i32>> =
            ChainedHashDict::with_hasher(ConstBuildHasher);
        run_state_machine(sut, &pool, ops)?;
    }

    // Growth parameters do not change observable semantics.
    #[test]
    fn prop_state_machine_configured(
        (pool, ops) in arb_scenario(),
        initial in 1usize..=16,
        load in prop_oneof![Just(0.25), Just(0.75), Just(1.0), Just(3.0)],
    ) {
        let cfg = DictConfig::new().initial_capacity(initial).max_load_factor(load);
        let sut: ChainedHashDict<Key, i32, RandomState, ArrayBucket<Key, i32>> =
            ChainedHashDict::with_config_and_hasher(cfg, RandomState::new()).unwrap();
        run_state_machine(sut, &pool, ops)?;
    }
}
