//! Fixed-size record pool backing every skip list node.
//!
//! The pool hands out records from chunks that are installed lazily and never
//! move, so a record's address is stable for the pool's lifetime. Each record
//! has a 32-bit slot index that can be turned back into its address, which is
//! what lets the concurrent list pack its head pointer into a single word.
//!
//! Chunk `k` holds `chunk_len << k` records, so a handful of directory entries
//! cover the whole 32-bit slot space:
//!
//! ```text
//!  directory       chunk 0 (n)        chunk 1 (2n)            chunk 2 (4n)
//! ┌──────────┐   ┌────┬────┬──   ┌────┬────┬────┬──   ┌────┬──
//! │ chunk 0  │──▶│ 0  │ 1  │..   │ n  │n+1 │n+2 │..   │ 3n │..
//! │ chunk 1  │──────────────────▶└────┴────┴────┴──   └────┴──
//! │ chunk 2  │──────────────────────────────────────────▲
//! │ (null)   │
//! └──────────┘
//! ```
//!
//! Fresh slots come from a lock-free bump index. Released slots go on a
//! lock-free free queue and are handed out again before the bump index moves,
//! so addresses are reused. The only lock is taken to install a new chunk.

use std::mem::MaybeUninit;
use std::ptr::{self, NonNull};
use std::sync::atomic::{AtomicPtr, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use crossbeam_queue::SegQueue;
use parking_lot::Mutex;

use crate::error::PoolError;

const DEFAULT_CHUNK_LEN: usize = 1024;
const MAX_SLOTS: usize = u32::MAX as usize;

/// Sizing policy for a [`NodePool`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolPolicy {
    chunk_len: usize,
    capacity: usize,
}

impl PoolPolicy {
    /// A pool that holds at most `capacity` records at once.
    pub fn bounded(capacity: usize) -> Self {
        PoolPolicy {
            capacity: capacity.min(MAX_SLOTS),
            ..PoolPolicy::default()
        }
    }

    /// Sets the number of records allocated together. Rounded up to a power
    /// of two.
    pub fn with_chunk_len(mut self, chunk_len: usize) -> Self {
        self.chunk_len = chunk_len.clamp(1, 1 << 31).next_power_of_two();
        self
    }

    /// The maximum number of records that may be live at once.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// The number of records allocated together.
    pub fn chunk_len(&self) -> usize {
        self.chunk_len
    }

    fn chunk_shift(&self) -> u32 {
        self.chunk_len.trailing_zeros()
    }

    /// Chunk number and offset within it for `slot`.
    fn locate(&self, slot: u32) -> (usize, usize) {
        let adjusted = slot as u64 + self.chunk_len as u64;
        let bit = u64::BITS - 1 - adjusted.leading_zeros();
        let chunk = (bit - self.chunk_shift()) as usize;
        let offset = (adjusted - (1 << bit)) as usize;
        (chunk, offset)
    }

    /// First slot of `chunk` and the number of records it holds.
    fn chunk_span(&self, chunk: usize) -> (usize, usize) {
        let base = (self.chunk_len << chunk) - self.chunk_len;
        let len = (self.chunk_len << chunk).min(self.capacity - base);
        (base, len)
    }

    fn directory_len(&self) -> usize {
        match self.capacity {
            0 => 0,
            capacity => self.locate((capacity - 1) as u32).0 + 1,
        }
    }
}

impl Default for PoolPolicy {
    /// Effectively unbounded: up to `u32::MAX` records.
    fn default() -> Self {
        PoolPolicy {
            chunk_len: DEFAULT_CHUNK_LEN,
            capacity: MAX_SLOTS,
        }
    }
}

/// Acquire/release bookkeeping for a [`NodePool`].
///
/// The counters are shared, so a handle obtained from a list stays readable
/// after the list (and its pool) has been dropped.
#[derive(Debug, Default)]
pub struct PoolStats {
    acquired: AtomicUsize,
    released: AtomicUsize,
    chunks: AtomicUsize,
}

impl PoolStats {
    /// Total number of successful acquisitions.
    pub fn acquired(&self) -> usize {
        self.acquired.load(Ordering::Acquire)
    }

    /// Total number of releases.
    pub fn released(&self) -> usize {
        self.released.load(Ordering::Acquire)
    }

    /// Records currently handed out.
    pub fn outstanding(&self) -> usize {
        self.acquired().saturating_sub(self.released())
    }

    /// Number of chunks installed so far.
    pub fn chunks(&self) -> usize {
        self.chunks.load(Ordering::Acquire)
    }
}

// `value` must stay the first field: a `*mut T` handed out by the pool is
// also a `*mut Record<T>`.
#[repr(C)]
struct Record<T> {
    value: MaybeUninit<T>,
    slot: u32,
}

/// A thread-safe pool of fixed-size records of type `T`.
///
/// Dropping the pool frees its chunks without running destructors for
/// records that were never released.
pub struct NodePool<T> {
    directory: Box<[AtomicPtr<Record<T>>]>,
    // Next never-used slot index.
    bump: AtomicU64,
    free: SegQueue<u32>,
    grow: Mutex<()>,
    policy: PoolPolicy,
    stats: Arc<PoolStats>,
}

// SAFETY: records are only reached through pointers handed out by `acquire`;
// moving values in and out of the pool requires `T: Send`.
unsafe impl<T: Send> Send for NodePool<T> {}
unsafe impl<T: Send> Sync for NodePool<T> {}

impl<T> NodePool<T> {
    /// Creates an empty pool. No records are allocated until the first
    /// `acquire`.
    pub fn new(policy: PoolPolicy) -> Self {
        let directory = (0..policy.directory_len())
            .map(|_| AtomicPtr::new(ptr::null_mut()))
            .collect();
        NodePool {
            directory,
            bump: AtomicU64::new(0),
            free: SegQueue::new(),
            grow: Mutex::new(()),
            policy,
            stats: Arc::new(PoolStats::default()),
        }
    }

    /// The policy this pool was built with.
    pub fn policy(&self) -> PoolPolicy {
        self.policy
    }

    /// A shared handle on this pool's bookkeeping.
    pub fn stats(&self) -> Arc<PoolStats> {
        self.stats.clone()
    }

    /// Moves `value` into a free record and returns its address.
    ///
    /// # Errors
    ///
    /// [`PoolError::Exhausted`] when `capacity` records are already live.
    pub fn acquire(&self, value: T) -> Result<NonNull<T>, PoolError> {
        let slot = match self.free.pop() {
            Some(slot) => slot,
            None => self.claim_fresh()?,
        };
        let record = self.record(slot);
        // SAFETY: the slot was either never handed out or was released, so
        // nobody else refers to it.
        unsafe {
            (*record.as_ptr()).value.as_mut_ptr().write(value);
        }
        self.stats.acquired.fetch_add(1, Ordering::AcqRel);
        Ok(record.cast())
    }

    /// Moves the value out of a record and returns the record to the pool.
    ///
    /// # Safety
    ///
    /// `ptr` must have come from `acquire` on this pool, must not have been
    /// released already, and no other thread may still be reading it.
    pub unsafe fn release(&self, ptr: NonNull<T>) -> T {
        let record = ptr.cast::<Record<T>>().as_ptr();
        let value = (*record).value.as_ptr().read();
        let slot = (*record).slot;
        self.free.push(slot);
        self.stats.released.fetch_add(1, Ordering::AcqRel);
        value
    }

    /// The slot index of a live record.
    ///
    /// # Safety
    ///
    /// `ptr` must have come from `acquire` on this pool.
    pub unsafe fn slot_of(&self, ptr: NonNull<T>) -> u32 {
        (*ptr.cast::<Record<T>>().as_ptr()).slot
    }

    /// The address of the record at `slot`.
    ///
    /// # Safety
    ///
    /// `slot` must have been obtained from `slot_of` for a record that is
    /// still live.
    pub unsafe fn resolve(&self, slot: u32) -> NonNull<T> {
        self.record(slot).cast()
    }

    fn claim_fresh(&self) -> Result<u32, PoolError> {
        let capacity = self.policy.capacity as u64;
        let mut next = self.bump.load(Ordering::Relaxed);
        loop {
            if next >= capacity {
                tracing::debug!(capacity, "node pool exhausted");
                return Err(PoolError::Exhausted {
                    capacity: self.policy.capacity,
                });
            }
            match self.bump.compare_exchange_weak(
                next,
                next + 1,
                Ordering::AcqRel,
                Ordering::Relaxed,
            ) {
                Ok(_) => break,
                Err(current) => next = current,
            }
        }
        let slot = next as u32;
        self.install_chunk(self.policy.locate(slot).0);
        Ok(slot)
    }

    fn install_chunk(&self, chunk: usize) {
        if !self.directory[chunk].load(Ordering::Acquire).is_null() {
            return;
        }
        let _guard = self.grow.lock();
        // Another thread may have installed it while we waited.
        if !self.directory[chunk].load(Ordering::Acquire).is_null() {
            return;
        }
        let (base, len) = self.policy.chunk_span(chunk);
        let records: Box<[Record<T>]> = (0..len)
            .map(|i| Record {
                value: MaybeUninit::uninit(),
                slot: (base + i) as u32,
            })
            .collect();
        let first = Box::into_raw(records) as *mut Record<T>;
        self.directory[chunk].store(first, Ordering::Release);
        self.stats.chunks.fetch_add(1, Ordering::AcqRel);
        tracing::debug!(chunk, len, "installed node pool chunk");
    }

    /// Holds the chunk installation lock, as a thread growing the pool would.
    #[cfg(test)]
    pub(crate) fn lock_growth(&self) -> parking_lot::MutexGuard<'_, ()> {
        self.grow.lock()
    }

    fn record(&self, slot: u32) -> NonNull<Record<T>> {
        let (chunk, offset) = self.policy.locate(slot);
        let first = self.directory[chunk].load(Ordering::Acquire);
        debug_assert!(!first.is_null());
        // SAFETY: a slot is only handed out after its chunk is installed and
        // chunks are never freed before the pool.
        unsafe { NonNull::new_unchecked(first.add(offset)) }
    }
}

impl<T> Drop for NodePool<T> {
    fn drop(&mut self) {
        let outstanding = self.stats.outstanding();
        if outstanding != 0 {
            tracing::warn!(outstanding, "dropping node pool with live records");
        }
        let policy = self.policy;
        for (chunk, entry) in self.directory.iter_mut().enumerate() {
            let first = *entry.get_mut();
            if first.is_null() {
                continue;
            }
            let (_, len) = policy.chunk_span(chunk);
            // SAFETY: rebuilt from the exact `Box<[Record<T>]>` leaked in
            // `install_chunk`. `MaybeUninit` values are not dropped.
            unsafe {
                drop(Box::from_raw(ptr::slice_from_raw_parts_mut(first, len)));
            }
        }
    }
}
