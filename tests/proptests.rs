//! Property-based tests for both skip lists.
//!
//! Uses differential testing against `BTreeMap` as an oracle.

mod common;

use std::collections::BTreeMap;
use std::ops::Bound::{Excluded, Unbounded};

use proptest::prelude::*;
use skiptower::{ConcurrentSkipList, PoolPolicy, SkipList, SkipListError, SkipListOptions};

// ============================================================================
//  Strategies
// ============================================================================

#[derive(Debug, Clone)]
enum Op {
    Insert(u16, u32),
    Remove(u16),
    Get(u16),
    Prev(u16),
    Next(u16),
}

/// Keys are drawn from a small range so that duplicates and hits are common.
fn op() -> impl Strategy<Value = Op> {
    let key = 0u16..256;
    prop_oneof![
        3 => (key.clone(), any::<u32>()).prop_map(|(k, v)| Op::Insert(k, v)),
        2 => key.clone().prop_map(Op::Remove),
        1 => key.clone().prop_map(Op::Get),
        1 => key.clone().prop_map(Op::Prev),
        1 => key.prop_map(Op::Next),
    ]
}

fn oracle_prev(oracle: &BTreeMap<u16, u32>, key: u16) -> Option<&u32> {
    oracle.range(..key).next_back().map(|(_, v)| v)
}

fn oracle_next(oracle: &BTreeMap<u16, u32>, key: u16) -> Option<&u32> {
    oracle.range((Excluded(key), Unbounded)).next().map(|(_, v)| v)
}

// ============================================================================
//  Sequential list
// ============================================================================

proptest! {
    /// Every operation agrees with the oracle, and the size tracks it.
    #[test]
    fn sequential_matches_btreemap(
        seed in any::<u64>(),
        ops in prop::collection::vec(op(), 1..400),
    ) {
        common::init_tracing();
        let mut list = SkipList::with_options(SkipListOptions::default().seed(seed)).unwrap();
        let mut oracle = BTreeMap::new();
        let stats = list.pool_stats();

        for op in ops {
            match op {
                Op::Insert(k, v) => {
                    let expected = if oracle.contains_key(&k) {
                        Err(SkipListError::DuplicateKey)
                    } else {
                        oracle.insert(k, v);
                        Ok(())
                    };
                    prop_assert_eq!(list.insert(k, v), expected);
                }
                Op::Remove(k) => prop_assert_eq!(list.remove(&k), oracle.remove(&k)),
                Op::Get(k) => prop_assert_eq!(list.get(&k), oracle.get(&k)),
                Op::Prev(k) => prop_assert_eq!(list.get_prev(&k), oracle_prev(&oracle, k)),
                Op::Next(k) => prop_assert_eq!(list.get_next(&k), oracle_next(&oracle, k)),
            }
            prop_assert_eq!(list.len(), oracle.len());
        }

        drop(list);
        prop_assert_eq!(stats.acquired(), stats.released());
    }

    /// Removing every key collapses the list back to its empty shape.
    #[test]
    fn removing_everything_collapses(
        seed in any::<u64>(),
        keys in prop::collection::btree_set(any::<u32>(), 0..200),
    ) {
        let mut list = SkipList::with_options(SkipListOptions::default().seed(seed)).unwrap();
        for &k in &keys {
            list.insert(k, k).unwrap();
        }
        for &k in &keys {
            prop_assert_eq!(list.remove(&k), Some(k));
        }
        prop_assert!(list.is_empty());
        prop_assert_eq!(list.height(), 0);
        prop_assert_eq!(list.pool_stats().outstanding(), 1);
    }

    /// A bounded pool either fits an insert or rejects it without changing
    /// anything.
    #[test]
    fn bounded_pool_failures_are_atomic(
        seed in any::<u64>(),
        capacity in 1usize..64,
        keys in prop::collection::vec(any::<u16>(), 1..100),
    ) {
        let options = SkipListOptions::default()
            .pool(PoolPolicy::bounded(capacity).with_chunk_len(4))
            .seed(seed);
        let mut list = SkipList::with_options(options).unwrap();
        let stats = list.pool_stats();
        let mut oracle = BTreeMap::new();

        for k in keys {
            let before = stats.outstanding();
            match list.insert(k, ()) {
                Ok(()) => {
                    prop_assert!(oracle.insert(k, ()).is_none());
                    prop_assert!(stats.outstanding() > before);
                }
                Err(SkipListError::DuplicateKey) => {
                    prop_assert!(oracle.contains_key(&k));
                    prop_assert_eq!(stats.outstanding(), before);
                }
                Err(SkipListError::PoolExhausted { capacity: reported }) => {
                    prop_assert_eq!(reported, capacity);
                    prop_assert_eq!(stats.outstanding(), before);
                }
            }
            prop_assert!(stats.outstanding() <= capacity);
            prop_assert_eq!(list.len(), oracle.len());
        }
        for k in oracle.keys() {
            prop_assert!(list.contains(k));
        }
    }
}

// ============================================================================
//  Concurrent list, single thread
// ============================================================================

proptest! {
    /// Inserts and lookups agree with the oracle.
    #[test]
    fn concurrent_matches_btreemap(
        entries in prop::collection::vec((0u16..512, any::<u32>()), 1..300),
        lookups in prop::collection::vec(0u16..512, 1..50),
    ) {
        common::init_tracing();
        let list = ConcurrentSkipList::new();
        let mut oracle = BTreeMap::new();
        let stats = list.pool_stats();

        for (k, v) in entries {
            let expected = if oracle.contains_key(&k) {
                Err(SkipListError::DuplicateKey)
            } else {
                oracle.insert(k, v);
                Ok(())
            };
            prop_assert_eq!(list.insert(k, v), expected);
        }
        prop_assert_eq!(list.len(), oracle.len());

        for k in lookups {
            prop_assert_eq!(list.get(&k), oracle.get(&k));
            prop_assert_eq!(list.get_prev(&k), oracle_prev(&oracle, k));
            prop_assert_eq!(list.get_next(&k), oracle_next(&oracle, k));
        }

        drop(list);
        prop_assert_eq!(stats.acquired(), stats.released());
    }
}
