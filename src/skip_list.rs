use std::borrow::Borrow;
use std::cmp::Ordering;
use std::fmt::{Debug, Error, Formatter};
use std::ptr::{self, NonNull};
use std::sync::atomic::Ordering as AtomicOrdering;
use std::sync::Arc;

use rand::rngs::SmallRng;
use rand::SeedableRng;

use crate::compare::{Comparator, NaturalOrder};
use crate::error::SkipListError;
use crate::level::{tower_height, RandomSource};
use crate::node::{
    before, build_tower, compare_link, release_levels, release_nodes, through, walk_level, Node,
};
use crate::options::SkipListOptions;
use crate::pool::{NodePool, PoolStats};

// A single owner mutates the list, so links are read and written relaxed.
const LINK: AtomicOrdering = AtomicOrdering::Relaxed;

/// `SkipList` is a single-owner skip list with expected `O(log n)` lookup,
/// insertion and removal.
///
/// Every node lives in the list's [`NodePool`]; towers are built from pool
/// records and returned to it on removal and when the list is dropped.
///
/// ```
/// use skiptower::SkipList;
///
/// let mut list = SkipList::new();
/// for (key, value) in [(1, "a"), (3, "b"), (5, "c")] {
///     list.insert(key, value).unwrap();
/// }
/// assert_eq!(list.get(&3), Some(&"b"));
/// assert_eq!(list.get_prev(&3), Some(&"a"));
/// assert_eq!(list.get_next(&3), Some(&"c"));
/// assert_eq!(list.remove(&3), Some("b"));
/// assert_eq!(list.len(), 2);
/// ```
pub struct SkipList<K, V, C = NaturalOrder, R = SmallRng> {
    head: NonNull<Node<K, V>>,
    max_level: usize,
    len: usize,
    max_height: usize,
    comparator: C,
    rng: R,
    pool: NodePool<Node<K, V>>,
}

// SAFETY: the list exclusively owns every node it points to.
unsafe impl<K: Send, V: Send, C: Send, R: Send> Send for SkipList<K, V, C, R> {}
unsafe impl<K: Sync, V: Sync, C: Sync, R: Sync> Sync for SkipList<K, V, C, R> {}

impl<K, V> SkipList<K, V>
where
    K: Ord,
{
    /// Create a new, empty SkipList with an unbounded pool.
    pub fn new() -> SkipList<K, V> {
        match Self::with_options(SkipListOptions::default()) {
            Ok(list) => list,
            Err(err) => unreachable!("an unbounded pool holds the first head node: {err}"),
        }
    }

    /// Create a new, empty SkipList.
    ///
    /// # Errors
    ///
    /// [`SkipListError::PoolExhausted`] if the pool cannot hold even the
    /// initial head node.
    pub fn with_options(options: SkipListOptions) -> Result<SkipList<K, V>, SkipListError> {
        SkipList::with_comparator(options, NaturalOrder)
    }
}

impl<K, V, C> SkipList<K, V, C>
where
    C: Comparator<K>,
{
    /// Create a new, empty SkipList ordered by `comparator`.
    ///
    /// # Errors
    ///
    /// See [`SkipList::with_options`].
    pub fn with_comparator(
        options: SkipListOptions,
        comparator: C,
    ) -> Result<SkipList<K, V, C>, SkipListError> {
        let rng = match options.seed {
            Some(seed) => SmallRng::seed_from_u64(seed),
            None => SmallRng::from_entropy(),
        };
        SkipList::with_random_source(options, comparator, rng)
    }
}

impl<K, V, C, R> SkipList<K, V, C, R>
where
    C: Comparator<K>,
    R: RandomSource,
{
    /// Create a new, empty SkipList that draws tower heights from `rng`.
    ///
    /// # Errors
    ///
    /// See [`SkipList::with_options`].
    pub fn with_random_source(
        options: SkipListOptions,
        comparator: C,
        rng: R,
    ) -> Result<SkipList<K, V, C, R>, SkipListError> {
        let pool = NodePool::new(options.pool);
        let head = pool.acquire(Node::head(ptr::null_mut(), ptr::null_mut()))?;
        tracing::debug!(
            max_height = options.max_height,
            capacity = options.pool.capacity(),
            "created skip list"
        );
        Ok(SkipList {
            head,
            max_level: 0,
            len: 0,
            max_height: options.max_height,
            comparator,
            rng,
            pool,
        })
    }

    /// Get the value stored for a given key.
    ///
    /// The key may be any borrowed form of the list's key type, as long as
    /// the comparator orders the borrowed form the same way.
    ///
    /// # Returns
    ///
    /// A reference to the value if present.
    pub fn get<Q>(&self, key: &Q) -> Option<&V>
    where
        K: Borrow<Q>,
        Q: ?Sized,
        C: Comparator<Q>,
    {
        let (at, _) = self.descend(key, through);
        // SAFETY: nodes reachable from the head are live while `self` is
        // borrowed.
        let node = unsafe { at.as_ref() };
        match node.key() {
            Some(found) if self.comparator.compare(found.borrow(), key) == Ordering::Equal => {
                unsafe { node.entry_value(LINK) }
            }
            _ => None,
        }
    }

    /// Get the value of the greatest key strictly less than `key`.
    pub fn get_prev<Q>(&self, key: &Q) -> Option<&V>
    where
        K: Borrow<Q>,
        Q: ?Sized,
        C: Comparator<Q>,
    {
        let (at, _) = self.descend(key, before);
        // SAFETY: see `get`.
        unsafe { at.as_ref().entry_value(LINK) }
    }

    /// Get the value of the least key strictly greater than `key`.
    pub fn get_next<Q>(&self, key: &Q) -> Option<&V>
    where
        K: Borrow<Q>,
        Q: ?Sized,
        C: Comparator<Q>,
    {
        let (_, next) = self.descend(key, through);
        // SAFETY: see `get`.
        unsafe { next.as_ref()?.entry_value(LINK) }
    }

    /// Check if the skip list contains the key.
    pub fn contains<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: ?Sized,
        C: Comparator<Q>,
    {
        self.get(key).is_some()
    }

    /// Insert a key with its value.
    ///
    /// # Errors
    ///
    /// - [`SkipListError::DuplicateKey`] if the key is already present.
    /// - [`SkipListError::PoolExhausted`] if the pool cannot hold the new
    ///   tower and any head levels it needs. Nothing is modified in either
    ///   case.
    pub fn insert(&mut self, key: K, value: V) -> Result<(), SkipListError>
    where
        K: Clone,
    {
        if self.contains(&key) {
            tracing::trace!("rejected duplicate key");
            return Err(SkipListError::DuplicateKey);
        }
        let height = tower_height(self.rng.next_word(), self.max_height);
        let tower = build_tower(&self.pool, key, value, height)?;

        let mut new_heads = Vec::with_capacity(height.saturating_sub(self.max_level));
        for _ in self.max_level..height {
            match self
                .pool
                .acquire(Node::head(ptr::null_mut(), ptr::null_mut()))
            {
                Ok(head) => new_heads.push(head),
                Err(err) => {
                    // SAFETY: nothing acquired here has been linked.
                    unsafe { release_nodes(&self.pool, tower.into_iter().chain(new_heads)) };
                    return Err(err.into());
                }
            }
        }
        for head in new_heads {
            // SAFETY: `head` is a fresh, unlinked head node.
            unsafe { head.as_ref().down().store(self.head.as_ptr(), LINK) };
            self.head = head;
            self.max_level += 1;
            tracing::trace!(level = self.max_level, "grew head");
        }

        // SAFETY: the tower and every node reachable from the head are live.
        unsafe {
            let key = tower[0].as_ref().tower_key();
            let mut current = self.head;
            for level in (1..=self.max_level).rev() {
                let (at, next) = walk_level(&self.comparator, current, key, LINK, before);
                if level <= height {
                    let node = tower[level];
                    node.as_ref().forward().store(next, LINK);
                    at.as_ref().forward().store(node.as_ptr(), LINK);
                }
                if level > 1 {
                    current = NonNull::new_unchecked(at.as_ref().down().load(LINK));
                }
            }
        }
        self.len += 1;
        Ok(())
    }

    /// Remove a given key.
    ///
    /// # Returns
    ///
    /// The value that was removed if the key was present.
    pub fn remove<Q>(&mut self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: ?Sized,
        C: Comparator<Q>,
    {
        let mut removed = None;
        // SAFETY: `&mut self` rules out readers; unlinked nodes are released
        // only after the cursor has moved past them.
        unsafe {
            let mut current = self.head;
            for level in (1..=self.max_level).rev() {
                let (at, next) = walk_level(&self.comparator, current, key, LINK, before);
                if compare_link(&self.comparator, next, key) == Some(Ordering::Equal) {
                    let target = NonNull::new_unchecked(next);
                    at.as_ref()
                        .forward()
                        .store(target.as_ref().forward().load(LINK), LINK);
                    if level == 1 {
                        let data = NonNull::new_unchecked(target.as_ref().down().load(LINK));
                        removed = self.pool.release(data).into_value();
                    }
                    drop(self.pool.release(target));
                }
                if level > 1 {
                    current = NonNull::new_unchecked(at.as_ref().down().load(LINK));
                }
            }
        }
        if removed.is_some() {
            self.len -= 1;
        }
        self.collapse();
        removed
    }

    /// Walks from the top level down to level one. Returns the level-one
    /// cursor and the link after it; with no levels above zero, the bottom
    /// head node and null.
    fn descend<Q>(
        &self,
        key: &Q,
        advance: fn(Ordering) -> bool,
    ) -> (NonNull<Node<K, V>>, *mut Node<K, V>)
    where
        K: Borrow<Q>,
        Q: ?Sized,
        C: Comparator<Q>,
    {
        let mut current = self.head;
        let mut next = ptr::null_mut();
        for level in (1..=self.max_level).rev() {
            // SAFETY: nodes reachable from the head are live.
            unsafe {
                (current, next) = walk_level(&self.comparator, current, key, LINK, advance);
                if level > 1 {
                    current = NonNull::new_unchecked(current.as_ref().down().load(LINK));
                }
            }
        }
        (current, next)
    }
}

impl<K, V, C, R> SkipList<K, V, C, R> {
    /// The number of entries.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Check if the skip list holds no entries.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// The current number of levels above the data level.
    pub fn height(&self) -> usize {
        self.max_level
    }

    /// Acquire/release counters of the list's node pool. The handle stays
    /// valid after the list is dropped.
    pub fn pool_stats(&self) -> Arc<PoolStats> {
        self.pool.stats()
    }

    /// Pops empty levels off the top of the head tower.
    fn collapse(&mut self) {
        while self.max_level > 0 {
            // SAFETY: the head tower is live and owned by `self`.
            unsafe {
                let head = self.head.as_ref();
                if !head.forward().load(LINK).is_null() {
                    break;
                }
                let discarded = self.head;
                self.head = NonNull::new_unchecked(head.down().load(LINK));
                self.max_level -= 1;
                drop(self.pool.release(discarded));
            }
            tracing::trace!(level = self.max_level, "collapsed empty head level");
        }
    }

    fn for_each_entry(&self, mut f: impl FnMut(&K, &V)) {
        if self.max_level == 0 {
            return;
        }
        // SAFETY: level one is reached through `max_level - 1` head links and
        // every node on it is live.
        unsafe {
            let mut head = self.head;
            for _ in 1..self.max_level {
                head = NonNull::new_unchecked(head.as_ref().down().load(LINK));
            }
            let mut link = head.as_ref().forward().load(LINK);
            while let Some(node) = link.as_ref() {
                if let Some(value) = node.entry_value(LINK) {
                    f(node.tower_key(), value);
                }
                link = node.forward().load(LINK);
            }
        }
    }
}

impl<K, V, C, R> Drop for SkipList<K, V, C, R> {
    fn drop(&mut self) {
        // SAFETY: `&mut self` is the last reference to every node.
        unsafe { release_levels(&self.pool, self.head, self.max_level) };
        tracing::debug!(
            released = self.pool.stats().released(),
            "dropped skip list"
        );
    }
}

impl<K: Ord, V> Default for SkipList<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: Debug, V: Debug, C, R> Debug for SkipList<K, V, C, R> {
    fn fmt(&self, f: &mut Formatter) -> Result<(), Error> {
        let mut map = f.debug_map();
        self.for_each_entry(|key, value| {
            map.entry(key, value);
        });
        map.finish()
    }
}
