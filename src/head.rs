//! The concurrent list's head descriptor.
//!
//! The top head node, the list height and a version counter are packed into
//! one word and only ever replaced together by a single compare-and-swap:
//!
//! ```text
//!  63            40 39     32 31                    0
//! ┌────────────────┬─────────┬───────────────────────┐
//! │ version (24)   │ level(8)│ head slot (32)        │
//! └────────────────┴─────────┴───────────────────────┘
//! ```
//!
//! The head is addressed by its pool slot rather than its address so that all
//! three fields fit in a `u64`. Slots are reused by the pool, so two
//! descriptors may name the same slot at the same level; the version keeps
//! them distinct and a CAS from a stale snapshot fails.

use std::sync::atomic::{AtomicU64, Ordering};

const LEVEL_SHIFT: u32 = 32;
const VERSION_SHIFT: u32 = 40;
const SLOT_MASK: u64 = (1 << LEVEL_SHIFT) - 1;
const LEVEL_MASK: u64 = (1 << (VERSION_SHIFT - LEVEL_SHIFT)) - 1;
pub(crate) const VERSION_MASK: u32 = (1 << (u64::BITS - VERSION_SHIFT)) - 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct HeadDescriptor {
    pub(crate) slot: u32,
    pub(crate) level: u8,
    pub(crate) version: u32,
}

impl HeadDescriptor {
    pub(crate) fn new(slot: u32, level: u8) -> Self {
        HeadDescriptor {
            slot,
            level,
            version: 0,
        }
    }

    pub(crate) fn pack(self) -> u64 {
        (u64::from(self.version & VERSION_MASK) << VERSION_SHIFT)
            | (u64::from(self.level) << LEVEL_SHIFT)
            | u64::from(self.slot)
    }

    pub(crate) fn unpack(word: u64) -> Self {
        HeadDescriptor {
            slot: (word & SLOT_MASK) as u32,
            level: ((word >> LEVEL_SHIFT) & LEVEL_MASK) as u8,
            version: (word >> VERSION_SHIFT) as u32,
        }
    }

    /// The descriptor after pushing one head level whose node lives in
    /// `slot`.
    pub(crate) fn grown(self, slot: u32) -> Self {
        HeadDescriptor {
            slot,
            level: self.level + 1,
            version: self.version.wrapping_add(1) & VERSION_MASK,
        }
    }
}

pub(crate) struct AtomicHead(AtomicU64);

impl AtomicHead {
    pub(crate) fn new(descriptor: HeadDescriptor) -> Self {
        AtomicHead(AtomicU64::new(descriptor.pack()))
    }

    pub(crate) fn load(&self, order: Ordering) -> HeadDescriptor {
        HeadDescriptor::unpack(self.0.load(order))
    }

    /// Replaces `current` with `new`. On failure returns the descriptor that
    /// was actually installed.
    pub(crate) fn compare_exchange(
        &self,
        current: HeadDescriptor,
        new: HeadDescriptor,
    ) -> Result<(), HeadDescriptor> {
        self.0
            .compare_exchange(
                current.pack(),
                new.pack(),
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .map(|_| ())
            .map_err(HeadDescriptor::unpack)
    }

    pub(crate) fn get_mut(&mut self) -> HeadDescriptor {
        HeadDescriptor::unpack(*self.0.get_mut())
    }
}


#[cfg(test)]
mod test {
    use std::sync::Arc;
    use std::thread::spawn;

    use super::*;

    #[test]
    fn test_pack_layout() {
        let descriptor = HeadDescriptor {
            slot: 0xDEAD_BEEF,
            level: 63,
            version: 0x00AB_CDEF,
        };
        assert_eq!(descriptor.pack(), 0xABCDEF_3F_DEADBEEF);
        assert_eq!(HeadDescriptor::unpack(descriptor.pack()), descriptor);
    }

    #[test]
    fn test_version_wraps() {
        let descriptor = HeadDescriptor {
            slot: 1,
            level: 2,
            version: VERSION_MASK,
        };
        let grown = descriptor.grown(9);
        assert_eq!(grown.version, 0);
        assert_eq!(grown.level, 3);
        assert_eq!(grown.slot, 9);
        assert_eq!(HeadDescriptor::unpack(grown.pack()), grown);
    }

    #[test]
    fn test_stale_snapshot_with_reused_slot_is_rejected() {
        // A reader snapshots {slot 5, level 2}. Meanwhile the head is grown
        // twice and the pool hands slot 5 out again for another head at the
        // same level. Pointer and level now match the snapshot; only the
        // version tells them apart.
        let snapshot = HeadDescriptor {
            slot: 5,
            level: 2,
            version: 7,
        };
        let head = AtomicHead::new(snapshot);
        let other = snapshot.grown(6);
        head.compare_exchange(snapshot, other).unwrap();
        let reused = HeadDescriptor {
            slot: 5,
            level: 2,
            version: other.version + 1,
        };
        head.compare_exchange(other, reused).unwrap();

        let attempt = snapshot.grown(11);
        assert_eq!(head.compare_exchange(snapshot, attempt), Err(reused));
        assert_eq!(head.load(Ordering::Acquire), reused);
    }

    #[test]
    fn test_racing_growth_has_one_winner() {
        for _ in 0..100 {
            let head = Arc::new(AtomicHead::new(HeadDescriptor::new(0, 0)));
            let handles: Vec<_> = (1..=4u32)
                .map(|slot| {
                    let head = head.clone();
                    spawn(move || {
                        let snapshot = head.load(Ordering::Acquire);
                        head.compare_exchange(snapshot, snapshot.grown(slot)).is_ok()
                    })
                })
                .collect();
            let wins: usize = handles
                .into_iter()
                .map(|handle| handle.join().unwrap() as usize)
                .sum();
            let installed = head.load(Ordering::Acquire);
            assert!(wins >= 1);
            assert_eq!(u32::from(installed.level), installed.version);
            assert_eq!(installed.version as usize, wins);
        }
    }
}
