#![deny(missing_docs)]
//! Skip lists whose nodes live in a shared, growable node pool.
//!
//! A skip list is a sorted linked list with a number of index levels stacked
//! on top of it. Every entry is linked on level one, and each level above
//! skips over roughly half of the entries of the level below, so a search
//! touches `O(log n)` nodes on average.
//!
//! This crate has two engines over the same node layout:
//!
//! - [`SkipList`] is single-threaded. It supports insertion, removal, exact
//!   lookup, and floor/ceiling lookups (`get_prev`/`get_next`).
//! - [`ConcurrentSkipList`] is lock-free. Any number of threads may insert
//!   and look up through a shared reference. Each level is published with a
//!   single-pointer compare-and-swap, bottom-up, and the list grows taller by
//!   swapping a packed head descriptor. Entries are never removed while the
//!   list is alive.
//!
//! Nodes of both engines come from a [`NodePool`], which hands out records
//! from chunks that double in size as the pool grows. A pool may be bounded
//! with [`PoolPolicy::bounded`]; an insert that would exceed the bound fails
//! with [`SkipListError::PoolExhausted`] and leaves the list unchanged.
//!
//! Tower heights follow a geometric distribution with `p = 1/2`, derived from
//! the leading zeros of a random word (see [`tower_height`]).
//!
//! The design follows William Pugh's ["Concurrent Maintenance of Skip Lists"].
//!
//! ["Concurrent Maintenance of Skip Lists"]: https://15721.courses.cs.cmu.edu/spring2018/papers/08-oltpindexes1/pugh-skiplists-cacm1990.pdf
//!
//! # Examples
//!
//! ```
//! use skiptower::{SkipList, SkipListError};
//!
//! let mut planets: SkipList<&str, f32> = SkipList::new();
//!
//! planets.insert("Mercury", 0.4).unwrap();
//! planets.insert("Venus", 0.7).unwrap();
//! planets.insert("Earth", 1.0).unwrap();
//! planets.insert("Mars", 1.5).unwrap();
//!
//! // Keys are unique.
//! assert_eq!(planets.insert("Mars", 1.6), Err(SkipListError::DuplicateKey));
//!
//! assert_eq!(planets.get(&"Earth"), Some(&1.0));
//! // The greatest key below "Mars" and the least key above it.
//! assert_eq!(planets.get_prev(&"Mars"), Some(&1.0));
//! assert_eq!(planets.get_next(&"Mars"), Some(&0.4));
//!
//! assert_eq!(planets.remove(&"Venus"), Some(0.7));
//! assert_eq!(planets.len(), 3);
//! ```
//!
//! A bounded pool caps how many nodes the list may hold:
//!
//! ```
//! use skiptower::{PoolPolicy, SkipList, SkipListError, SkipListOptions};
//!
//! let options = SkipListOptions::default().pool(PoolPolicy::bounded(8));
//! let mut list = SkipList::with_options(options).unwrap();
//!
//! let mut inserted = 0;
//! let err = loop {
//!     match list.insert(inserted, ()) {
//!         Ok(()) => inserted += 1,
//!         Err(err) => break err,
//!     }
//! };
//! assert_eq!(err, SkipListError::PoolExhausted { capacity: 8 });
//! assert_eq!(list.len(), inserted as usize);
//! ```
//!
//! Sharing a [`ConcurrentSkipList`] between threads:
//!
//! ```
//! use std::thread;
//!
//! use skiptower::ConcurrentSkipList;
//!
//! let list = ConcurrentSkipList::new();
//! thread::scope(|s| {
//!     for t in 0..4u32 {
//!         let list = &list;
//!         s.spawn(move || {
//!             for k in (t..1_000).step_by(4) {
//!                 list.insert(k, k.to_string()).unwrap();
//!             }
//!         });
//!     }
//! });
//! assert_eq!(list.len(), 1_000);
//! assert_eq!(list.get_prev(&500).map(String::as_str), Some("499"));
//! ```
mod compare;
mod concurrent_skip_list;
mod error;
mod head;
mod level;
mod node;
mod options;
mod pool;
mod skip_list;

pub use compare::{Comparator, NaturalOrder, OrderBy};
pub use concurrent_skip_list::ConcurrentSkipList;
pub use error::{PoolError, SkipListError};
pub use level::{tower_height, RandomSource, MAX_HEIGHT};
pub use options::SkipListOptions;
pub use pool::{NodePool, PoolPolicy, PoolStats};
pub use skip_list::SkipList;
