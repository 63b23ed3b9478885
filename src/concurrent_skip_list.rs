use std::borrow::Borrow;
use std::cmp::Ordering;
use std::fmt::{Debug, Error, Formatter};
use std::marker::PhantomData;
use std::ptr::{self, NonNull};
use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};
use std::sync::Arc;

use crossbeam_utils::{Backoff, CachePadded};

use crate::compare::{Comparator, NaturalOrder};
use crate::error::SkipListError;
use crate::head::{AtomicHead, HeadDescriptor};
use crate::level::thread_tower_height;
use crate::node::{
    before, build_tower, compare_link, release_levels, release_nodes, through, walk_level, Node,
};
use crate::options::SkipListOptions;
use crate::pool::{NodePool, PoolStats};

/// `ConcurrentSkipList` is a lock-free skip list supporting concurrent
/// lookups and insertions through a shared reference.
///
/// Each level is linked with single-pointer compare-and-swap publishes, and
/// the list grows taller by swapping a packed `{head, height, version}`
/// descriptor in one step. Nodes are never removed while the list is alive,
/// so references returned by lookups stay valid for the borrow of the list.
///
/// ```
/// use std::sync::Arc;
/// use std::thread;
///
/// use skiptower::ConcurrentSkipList;
///
/// let list = Arc::new(ConcurrentSkipList::new());
/// let handles: Vec<_> = (0..4u64)
///     .map(|t| {
///         let list = list.clone();
///         thread::spawn(move || {
///             for k in t * 100..(t + 1) * 100 {
///                 list.insert(k, k * 2).unwrap();
///             }
///         })
///     })
///     .collect();
/// for handle in handles {
///     handle.join().unwrap();
/// }
/// assert_eq!(list.len(), 400);
/// assert_eq!(list.get(&123), Some(&246));
/// assert_eq!(list.get_next(&399), None);
/// ```
pub struct ConcurrentSkipList<K, V, C = NaturalOrder> {
    head: CachePadded<AtomicHead>,
    len: CachePadded<AtomicUsize>,
    max_height: usize,
    comparator: C,
    pool: NodePool<Node<K, V>>,
    _marker: PhantomData<*mut Node<K, V>>,
}

// SAFETY: keys and values move in from inserting threads and are shared with
// reading threads.
unsafe impl<K, V, C> Send for ConcurrentSkipList<K, V, C>
where
    K: Send + Sync,
    V: Send + Sync,
    C: Send,
{
}

unsafe impl<K, V, C> Sync for ConcurrentSkipList<K, V, C>
where
    K: Send + Sync,
    V: Send + Sync,
    C: Sync,
{
}

impl<K, V> ConcurrentSkipList<K, V>
where
    K: Ord,
{
    /// Create a new, empty ConcurrentSkipList with an unbounded pool.
    pub fn new() -> ConcurrentSkipList<K, V> {
        match Self::with_options(SkipListOptions::default()) {
            Ok(list) => list,
            Err(err) => unreachable!("an unbounded pool holds the first head node: {err}"),
        }
    }

    /// Create a new, empty ConcurrentSkipList.
    ///
    /// # Errors
    ///
    /// [`SkipListError::PoolExhausted`] if the pool cannot hold even the
    /// initial head node.
    pub fn with_options(
        options: SkipListOptions,
    ) -> Result<ConcurrentSkipList<K, V>, SkipListError> {
        ConcurrentSkipList::with_comparator(options, NaturalOrder)
    }
}

impl<K, V, C> ConcurrentSkipList<K, V, C>
where
    C: Comparator<K>,
{
    /// Create a new, empty ConcurrentSkipList ordered by `comparator`.
    ///
    /// # Errors
    ///
    /// See [`ConcurrentSkipList::with_options`].
    pub fn with_comparator(
        options: SkipListOptions,
        comparator: C,
    ) -> Result<ConcurrentSkipList<K, V, C>, SkipListError> {
        let pool = NodePool::new(options.pool);
        let head = pool.acquire(Node::head(ptr::null_mut(), ptr::null_mut()))?;
        // SAFETY: `head` was just acquired from `pool`.
        let slot = unsafe { pool.slot_of(head) };
        tracing::debug!(
            max_height = options.max_height,
            capacity = options.pool.capacity(),
            "created concurrent skip list"
        );
        Ok(ConcurrentSkipList {
            head: CachePadded::new(AtomicHead::new(HeadDescriptor::new(slot, 0))),
            len: CachePadded::new(AtomicUsize::new(0)),
            max_height: options.max_height,
            comparator,
            pool,
            _marker: PhantomData,
        })
    }

    /// Get the value stored for a given key.
    ///
    /// The head is read once; the search never retries or blocks. The key
    /// may be any borrowed form of the list's key type.
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
        let snapshot = self.head.load(AtomicOrdering::Acquire);
        if snapshot.level == 0 {
            return None;
        }
        // SAFETY: nodes are never released while the list is shared.
        unsafe {
            let (at, _) = self.descend(snapshot, key, through, 1);
            let node = at.as_ref();
            match node.key() {
                Some(found) if self.comparator.compare(found.borrow(), key) == Ordering::Equal => {
                    node.entry_value(AtomicOrdering::Acquire)
                }
                _ => None,
            }
        }
    }

    /// Get the value of the greatest key strictly less than `key`.
    pub fn get_prev<Q>(&self, key: &Q) -> Option<&V>
    where
        K: Borrow<Q>,
        Q: ?Sized,
        C: Comparator<Q>,
    {
        let snapshot = self.head.load(AtomicOrdering::Acquire);
        if snapshot.level == 0 {
            return None;
        }
        // SAFETY: see `get`.
        unsafe {
            let (at, _) = self.descend(snapshot, key, before, 1);
            at.as_ref().entry_value(AtomicOrdering::Acquire)
        }
    }

    /// Get the value of the least key strictly greater than `key`.
    pub fn get_next<Q>(&self, key: &Q) -> Option<&V>
    where
        K: Borrow<Q>,
        Q: ?Sized,
        C: Comparator<Q>,
    {
        let snapshot = self.head.load(AtomicOrdering::Acquire);
        if snapshot.level == 0 {
            return None;
        }
        // SAFETY: see `get`.
        unsafe {
            let (_, next) = self.descend(snapshot, key, through, 1);
            next.as_ref()?.entry_value(AtomicOrdering::Acquire)
        }
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
    /// Contention with other inserting threads is retried internally, one
    /// level at a time.
    ///
    /// # Errors
    ///
    /// - [`SkipListError::DuplicateKey`] if the key is already present.
    /// - [`SkipListError::PoolExhausted`] if the pool cannot hold the new
    ///   tower and the head levels it may need. Every node is acquired before
    ///   anything is published, so a failed insert leaves no trace.
    pub fn insert(&self, key: K, value: V) -> Result<(), SkipListError>
    where
        K: Clone,
    {
        let height = thread_tower_height(self.max_height);
        let tower = build_tower(&self.pool, key, value, height)?;

        // The head only grows, so this covers every level we may have to add.
        let snapshot = self.head.load(AtomicOrdering::Acquire);
        let mut spares = Vec::with_capacity(height.saturating_sub(snapshot.level as usize));
        for _ in snapshot.level as usize..height {
            match self
                .pool
                .acquire(Node::head(ptr::null_mut(), ptr::null_mut()))
            {
                Ok(spare) => spares.push(spare),
                Err(err) => {
                    // SAFETY: nothing has been published yet.
                    unsafe { release_nodes(&self.pool, tower.into_iter().chain(spares)) };
                    return Err(err.into());
                }
            }
        }

        for level in 1..=height {
            // SAFETY: the tower is live and unpublished above `level - 1`.
            if let Err(err) = unsafe { self.link_level(&tower, level, &mut spares) } {
                // Only level one can fail, before anything was published.
                unsafe { release_nodes(&self.pool, tower.into_iter().chain(spares)) };
                return Err(err);
            }
        }
        // SAFETY: leftover spares were never published.
        unsafe { release_nodes(&self.pool, spares) };
        self.len.fetch_add(1, AtomicOrdering::AcqRel);
        Ok(())
    }

    /// Publishes `tower[level]`, either by growing the head to `level` or by
    /// splicing it in after its predecessor. Retries until one succeeds.
    unsafe fn link_level(
        &self,
        tower: &[NonNull<Node<K, V>>],
        level: usize,
        spares: &mut Vec<NonNull<Node<K, V>>>,
    ) -> Result<(), SkipListError> {
        let node = tower[level];
        let key = node.as_ref().tower_key();
        let backoff = Backoff::new();
        loop {
            let snapshot = self.head.load(AtomicOrdering::Acquire);
            if (snapshot.level as usize) < level {
                // Levels are linked bottom-up, so the head is exactly one
                // level short.
                debug_assert_eq!(snapshot.level as usize + 1, level);
                let spare = match spares.pop() {
                    Some(spare) => spare,
                    None => unreachable!("a spare head was acquired for every missing level"),
                };
                let spare_node = spare.as_ref();
                spare_node.forward().store(node.as_ptr(), AtomicOrdering::Relaxed);
                spare_node
                    .down()
                    .store(self.head_node(snapshot).as_ptr(), AtomicOrdering::Relaxed);
                let grown = snapshot.grown(self.pool.slot_of(spare));
                match self.head.compare_exchange(snapshot, grown) {
                    Ok(()) => {
                        tracing::trace!(level, version = grown.version, "grew head");
                        return Ok(());
                    }
                    Err(current) => {
                        tracing::trace!(
                            level,
                            installed = current.level,
                            "lost head growth race"
                        );
                        spares.push(spare);
                        backoff.spin();
                        continue;
                    }
                }
            }

            let (pred, next) = self.descend(snapshot, key, before, level);
            if level == 1
                && compare_link(&self.comparator, next, key) == Some(Ordering::Equal)
            {
                tracing::trace!("rejected duplicate key");
                return Err(SkipListError::DuplicateKey);
            }
            node.as_ref().forward().store(next, AtomicOrdering::Relaxed);
            let linked = pred.as_ref().forward().compare_exchange(
                next,
                node.as_ptr(),
                AtomicOrdering::AcqRel,
                AtomicOrdering::Acquire,
            );
            if linked.is_ok() {
                return Ok(());
            }
            tracing::trace!(level, "lost link race");
            backoff.spin();
        }
    }

    /// Walks from the snapshot's top level down to `level`. Returns the
    /// cursor on `level` and the link after it.
    unsafe fn descend<Q>(
        &self,
        snapshot: HeadDescriptor,
        key: &Q,
        advance: fn(Ordering) -> bool,
        level: usize,
    ) -> (NonNull<Node<K, V>>, *mut Node<K, V>)
    where
        K: Borrow<Q>,
        Q: ?Sized,
        C: Comparator<Q>,
    {
        debug_assert!(level >= 1 && level <= snapshot.level as usize);
        let mut current = self.head_node(snapshot);
        let mut current_level = snapshot.level as usize;
        loop {
            let (at, next) =
                walk_level(&self.comparator, current, key, AtomicOrdering::Acquire, advance);
            if current_level == level {
                return (at, next);
            }
            current = NonNull::new_unchecked(at.as_ref().down().load(AtomicOrdering::Acquire));
            current_level -= 1;
        }
    }
}

impl<K, V, C> ConcurrentSkipList<K, V, C> {
    /// The number of entries.
    pub fn len(&self) -> usize {
        self.len.load(AtomicOrdering::Acquire)
    }

    /// Check if the skip list holds no entries.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The current number of levels above the data level.
    pub fn height(&self) -> usize {
        self.head.load(AtomicOrdering::Acquire).level as usize
    }

    /// Acquire/release counters of the list's node pool. The handle stays
    /// valid after the list is dropped.
    pub fn pool_stats(&self) -> Arc<PoolStats> {
        self.pool.stats()
    }

    fn head_node(&self, snapshot: HeadDescriptor) -> NonNull<Node<K, V>> {
        // SAFETY: head nodes are released only when the list is dropped.
        unsafe { self.pool.resolve(snapshot.slot) }
    }

    fn for_each_entry(&self, mut f: impl FnMut(&K, &V)) {
        let snapshot = self.head.load(AtomicOrdering::Acquire);
        if snapshot.level == 0 {
            return;
        }
        // SAFETY: nodes are never released while the list is shared.
        unsafe {
            let mut head = self.head_node(snapshot);
            for _ in 1..snapshot.level {
                head = NonNull::new_unchecked(head.as_ref().down().load(AtomicOrdering::Acquire));
            }
            let mut link = head.as_ref().forward().load(AtomicOrdering::Acquire);
            while let Some(node) = link.as_ref() {
                if let Some(value) = node.entry_value(AtomicOrdering::Acquire) {
                    f(node.tower_key(), value);
                }
                link = node.forward().load(AtomicOrdering::Acquire);
            }
        }
    }
}

#[cfg(test)]
impl<K: Clone, V, C> ConcurrentSkipList<K, V, C> {
    /// Keys on every level, top level first. Checks that each index node
    /// above level one points down at a node with the same key.
    fn level_keys(&self) -> Vec<Vec<K>>
    where
        C: Comparator<K>,
    {
        let snapshot = self.head.load(AtomicOrdering::Acquire);
        let mut levels = Vec::new();
        let mut head = match snapshot.level {
            0 => return levels,
            _ => self.head_node(snapshot),
        };
        for level in (1..=snapshot.level as usize).rev() {
            let mut keys = Vec::new();
            // SAFETY: nodes are never released while the list is shared.
            unsafe {
                let mut link = head.as_ref().forward().load(AtomicOrdering::Acquire);
                while let Some(node) = link.as_ref() {
                    let below = (*node.down().load(AtomicOrdering::Acquire)).tower_key();
                    let key = node.tower_key();
                    assert_eq!(self.comparator.compare(below, key), Ordering::Equal);
                    keys.push(node.tower_key().clone());
                    link = node.forward().load(AtomicOrdering::Acquire);
                }
                if level > 1 {
                    let down = head.as_ref().down().load(AtomicOrdering::Acquire);
                    head = NonNull::new_unchecked(down);
                }
            }
            levels.push(keys);
        }
        levels
    }
}

impl<K, V, C> Drop for ConcurrentSkipList<K, V, C> {
    fn drop(&mut self) {
        let snapshot = self.head.get_mut();
        let head = self.head_node(snapshot);
        // SAFETY: `&mut self` is the last reference to every node.
        unsafe { release_levels(&self.pool, head, snapshot.level as usize) };
        tracing::debug!(
            released = self.pool.stats().released(),
            "dropped concurrent skip list"
        );
    }
}

impl<K: Ord, V> Default for ConcurrentSkipList<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: Debug, V: Debug, C> Debug for ConcurrentSkipList<K, V, C> {
    fn fmt(&self, f: &mut Formatter) -> Result<(), Error> {
        let mut map = f.debug_map();
        self.for_each_entry(|key, value| {
            map.entry(key, value);
        });
        map.finish()
    }
}
