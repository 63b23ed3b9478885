//! Tower segments shared by both skip lists.
//!
//! ```text
//! level 2   Head ──────────────────────▶ Index(7) ──▶ ∅
//!            │                             │
//! level 1   Head ──▶ Index(3) ───────────▶ Index(7) ──▶ ∅
//!            │          │                  │
//! level 0   Head     Data(3, v)          Data(7, v)
//! ```
//!
//! Levels at and above one are singly linked lists of `Index` nodes, each
//! headed by a `Head` node. Level one holds every entry. An `Index` node at
//! level one points down at the entry's `Data` node, which holds the value and
//! has no links of its own.

use std::borrow::Borrow;
use std::cmp::Ordering;
use std::ptr::{self, NonNull};
use std::sync::atomic::{AtomicPtr, Ordering as AtomicOrdering};

use crate::compare::Comparator;
use crate::error::PoolError;
use crate::pool::NodePool;

// Low bit of an `Index` node's `down` link: the node is logically deleted.
const DELETED_MARK: usize = 1;

pub(crate) type Link<K, V> = AtomicPtr<Node<K, V>>;

pub(crate) enum Node<K, V> {
    Head {
        forward: Link<K, V>,
        down: Link<K, V>,
    },
    Index {
        key: K,
        forward: Link<K, V>,
        down: Link<K, V>,
    },
    Data {
        key: K,
        value: V,
    },
}

impl<K, V> Node<K, V> {
    pub(crate) fn head(forward: *mut Node<K, V>, down: *mut Node<K, V>) -> Self {
        Node::Head {
            forward: AtomicPtr::new(forward),
            down: AtomicPtr::new(down),
        }
    }

    pub(crate) fn index(key: K, down: *mut Node<K, V>) -> Self {
        Node::Index {
            key,
            forward: AtomicPtr::new(ptr::null_mut()),
            down: AtomicPtr::new(down),
        }
    }

    /// The key of a tower node.
    pub(crate) fn tower_key(&self) -> &K {
        match self {
            Node::Index { key, .. } | Node::Data { key, .. } => key,
            Node::Head { .. } => unreachable!("head nodes carry no key"),
        }
    }

    pub(crate) fn key(&self) -> Option<&K> {
        match self {
            Node::Head { .. } => None,
            Node::Index { key, .. } | Node::Data { key, .. } => Some(key),
        }
    }

    /// The next node on this level. `Data` nodes are not on any level.
    pub(crate) fn forward(&self) -> &Link<K, V> {
        match self {
            Node::Head { forward, .. } | Node::Index { forward, .. } => forward,
            Node::Data { .. } => unreachable!("data nodes have no forward link"),
        }
    }

    pub(crate) fn down(&self) -> &Link<K, V> {
        match self {
            Node::Head { down, .. } | Node::Index { down, .. } => down,
            Node::Data { .. } => unreachable!("data nodes have no down link"),
        }
    }

    /// The value of the entry this level-one node stands for.
    ///
    /// # Safety
    ///
    /// `self` must be a published level-one node.
    pub(crate) unsafe fn entry_value(&self, order: AtomicOrdering) -> Option<&V> {
        match self {
            Node::Index { down, .. } => {
                let data = down.load(order);
                if is_deleted(data) {
                    return None;
                }
                match &*data {
                    Node::Data { value, .. } => Some(value),
                    _ => None,
                }
            }
            _ => None,
        }
    }

    pub(crate) fn into_value(self) -> Option<V> {
        match self {
            Node::Data { value, .. } => Some(value),
            _ => None,
        }
    }
}

pub(crate) fn is_deleted<K, V>(link: *mut Node<K, V>) -> bool {
    link as usize & DELETED_MARK != 0
}

/// Compares the key of the node behind `link` against `key`. `None` when the
/// link is the end of the level.
///
/// # Safety
///
/// `link` must be null or point to a live node.
#[inline]
pub(crate) unsafe fn compare_link<K, V, Q, C>(
    comparator: &C,
    link: *mut Node<K, V>,
    key: &Q,
) -> Option<Ordering>
where
    K: Borrow<Q>,
    Q: ?Sized,
    C: Comparator<Q>,
{
    let node = link.as_ref()?;
    node.key()
        .map(|node_key| comparator.compare(node_key.borrow(), key))
}

/// Moves right along one level while the next key satisfies `advance`.
/// Returns the last node visited and the link that stopped the walk.
///
/// # Safety
///
/// `start` and everything reachable from it must be live.
#[inline]
pub(crate) unsafe fn walk_level<K, V, Q, C>(
    comparator: &C,
    start: NonNull<Node<K, V>>,
    key: &Q,
    order: AtomicOrdering,
    advance: fn(Ordering) -> bool,
) -> (NonNull<Node<K, V>>, *mut Node<K, V>)
where
    K: Borrow<Q>,
    Q: ?Sized,
    C: Comparator<Q>,
{
    let mut current = start;
    loop {
        let next = current.as_ref().forward().load(order);
        match compare_link(comparator, next, key) {
            Some(ordering) if advance(ordering) => current = NonNull::new_unchecked(next),
            _ => return (current, next),
        }
    }
}

/// Stops before the first key not less than the target.
pub(crate) fn before(ordering: Ordering) -> bool {
    ordering == Ordering::Less
}

/// Stops before the first key greater than the target.
pub(crate) fn through(ordering: Ordering) -> bool {
    ordering != Ordering::Greater
}

/// Acquires a tower of `height` index nodes over one data node. Element `l`
/// of the result is the node for level `l`. Nothing is linked horizontally.
///
/// On failure every node acquired so far is released again.
pub(crate) fn build_tower<K: Clone, V>(
    pool: &NodePool<Node<K, V>>,
    key: K,
    value: V,
    height: usize,
) -> Result<Vec<NonNull<Node<K, V>>>, PoolError> {
    let mut tower = Vec::with_capacity(height + 1);
    tower.push(pool.acquire(Node::Data {
        key: key.clone(),
        value,
    })?);
    for level in 1..=height {
        let down = tower[level - 1].as_ptr();
        match pool.acquire(Node::index(key.clone(), down)) {
            Ok(node) => tower.push(node),
            Err(err) => {
                // SAFETY: none of these nodes were published.
                unsafe { release_nodes(pool, tower) };
                return Err(err);
            }
        }
    }
    Ok(tower)
}

/// # Safety
///
/// Every node must be unreachable by any other thread.
pub(crate) unsafe fn release_nodes<K, V>(
    pool: &NodePool<Node<K, V>>,
    nodes: impl IntoIterator<Item = NonNull<Node<K, V>>>,
) {
    for node in nodes {
        drop(pool.release(node));
    }
}

/// Releases every node of a list, head tower included.
///
/// # Safety
///
/// `head` must be the top head node at `level` of a list nobody else can
/// reach.
pub(crate) unsafe fn release_levels<K, V>(
    pool: &NodePool<Node<K, V>>,
    head: NonNull<Node<K, V>>,
    level: usize,
) {
    let mut head = Some(head);
    let mut level = level;
    while let Some(current) = head {
        let mut link = current.as_ref().forward().load(AtomicOrdering::Acquire);
        while let Some(node) = NonNull::new(link) {
            link = node.as_ref().forward().load(AtomicOrdering::Acquire);
            if level == 1 {
                let data = node.as_ref().down().load(AtomicOrdering::Acquire);
                let data = (data as usize & !DELETED_MARK) as *mut Node<K, V>;
                if let Some(data) = NonNull::new(data) {
                    drop(pool.release(data));
                }
            }
            drop(pool.release(node));
        }
        head = NonNull::new(current.as_ref().down().load(AtomicOrdering::Acquire));
        drop(pool.release(current));
        level = level.saturating_sub(1);
    }
}
