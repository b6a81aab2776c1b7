//! Per-slab metadata.
//!
//! One [`Metaslab`] per slab lives in the superslab header. It tracks the
//! slab's local free list and the two counters that drive the slab lifecycle:
//!
//! - `allocated`: objects the slab holds in total (its capacity). All of them
//!   count as out while the slab is full, including ones the bump cursor has
//!   not carved yet.
//! - `needed`: frees still expected before the slab changes state. While
//!   active this is the number of objects not on the local free list; while
//!   full it is pinned to 1 so the next free takes the slow path.

use core::ptr::NonNull;

use crate::alloc::bits;
use crate::alloc::config::{SLAB_SIZE, SUPERSLAB_SIZE};
use crate::alloc::freelist::SlabNext;
use crate::alloc::size_class::{self, SizeClass};
use crate::alloc::slab::Slab;
use crate::alloc::slab_list::SlabList;

/// Lifecycle of a slab as seen from its metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlabState {
    /// Just assigned to a class and being carved by a bump cursor.
    Fresh,
    /// Has a local free list and sits on its class's slab list.
    Active,
    /// Every object is out; off the slab list.
    Full,
    /// No live objects; belongs to the superslab again.
    Empty,
}

/// Metadata for one slab.
#[repr(C)]
pub struct Metaslab {
    pub(crate) prev: Option<NonNull<Metaslab>>,
    pub(crate) next: Option<NonNull<Metaslab>>,
    /// Local free list, or `None` for no local free list.
    pub head: Option<NonNull<SlabNext>>,
    /// Objects this slab holds.
    pub allocated: u16,
    /// Frees still needed before the next state transition.
    pub needed: u16,
    sizeclass: SizeClass,
    pub(crate) listed: bool,
    fresh: bool,
}

impl Metaslab {
    /// Metadata of a slab not assigned to any class.
    pub const fn unused() -> Self {
        Self {
            prev: None,
            next: None,
            head: None,
            allocated: 0,
            needed: 0,
            sizeclass: 0,
            listed: false,
            fresh: false,
        }
    }

    /// Dedicates the slab to `sizeclass`.
    ///
    /// The whole capacity counts as allocated: objects are handed out by the
    /// bump cursor, not by this record. The slab starts out full.
    pub fn initialise(&mut self, sizeclass: SizeClass, is_short: bool) {
        debug_assert!(!self.listed);
        debug_assert!(size_class::is_small(sizeclass));
        self.head = None;
        self.sizeclass = sizeclass;
        self.allocated = size_class::slab_capacity(sizeclass, is_short) as u16;
        self.fresh = true;
        self.set_full();
    }

    /// Marks the slab full. The next free will report a transition.
    pub fn set_full(&mut self) {
        debug_assert!(self.head.is_none());
        debug_assert!(!self.listed);
        self.needed = 1;
    }

    /// Records that one object came back.
    ///
    /// Returns `true` when this free needs the slow path: the slab was full,
    /// or it now holds no live objects.
    #[inline(always)]
    pub fn return_object(&mut self) -> bool {
        self.needed -= 1;
        self.needed == 0
    }

    /// No live objects, or not assigned to a class.
    #[inline(always)]
    pub fn is_unused(&self) -> bool {
        self.needed == 0
    }

    /// Not on any slab list.
    #[inline(always)]
    pub fn is_full(&self) -> bool {
        !self.listed
    }

    /// Whether `slab` is the one sharing its space with the superslab header.
    #[inline(always)]
    pub fn is_short(slab: Slab) -> bool {
        slab.is_short()
    }

    /// Takes this slab off `list`, which must be the list it is on.
    pub fn remove(&mut self, list: &mut SlabList) {
        list.remove(self);
    }

    /// Writes the overlay link of a free object.
    ///
    /// # Safety
    /// See [`SlabNext::store`].
    #[inline(always)]
    pub unsafe fn store_next(node: NonNull<SlabNext>, next: Option<NonNull<SlabNext>>) {
        SlabNext::store(node, next);
    }

    /// Size class this slab serves.
    pub fn sizeclass(&self) -> SizeClass {
        self.sizeclass
    }

    /// Current lifecycle state.
    pub fn state(&self) -> SlabState {
        if self.is_unused() {
            SlabState::Empty
        } else if self.listed {
            SlabState::Active
        } else if self.fresh {
            SlabState::Fresh
        } else {
            SlabState::Full
        }
    }

    pub(crate) fn mark_used(&mut self) {
        self.fresh = false;
    }

    /// Whether `head` is empty or sits on an object boundary of its slab.
    pub fn valid_head(&self) -> bool {
        let Some(head) = self.head else {
            return true;
        };
        let addr = head.as_ptr() as usize;
        let offset = addr & (SLAB_SIZE - 1);
        let is_short = bits::is_aligned(addr - offset, SUPERSLAB_SIZE);
        let first = size_class::first_object_offset(self.sizeclass, is_short);
        offset >= first && (offset - first) % size_class::size_of(self.sizeclass) == 0
    }

    /// Checks the local free list against the counters. Debug builds only.
    ///
    /// A slab that is full must have no local free list. An active slab's free
    /// list must sit on its object grid, and together with `needed` it must
    /// account for every object. An unused slab is not checked: it is either
    /// on its way back to the superslab or not assigned.
    pub fn debug_slab_invariant(&self, slab: Slab) {
        #[cfg(debug_assertions)]
        {
            use crate::error::{fatal, SlabError};
            use crate::alloc::freelist::FreeListIter;

            let check = |ok: bool, reason: &'static str| {
                if !ok {
                    fatal(SlabError::Corrupted { reason });
                }
            };

            if self.is_unused() {
                return;
            }

            if self.is_full() {
                check(self.head.is_none(), "full slab still holds a local free list");
                return;
            }

            let size = size_class::size_of(self.sizeclass);
            let first = size_class::first_object_offset(self.sizeclass, slab.is_short());
            let base = slab.base().as_ptr() as usize;
            let mut free = 0usize;

            // Safety: an active slab's local list only links freed objects.
            for p in unsafe { FreeListIter::new(self.head) } {
                let addr = p.as_ptr() as usize;
                check(addr >= base && addr - base < SLAB_SIZE, "free object outside its slab");
                let offset = addr - base;
                check(
                    offset >= first && (offset - first) % size == 0,
                    "free object off the object grid",
                );
                check(offset + size <= SLAB_SIZE, "free object overruns its slab");
                free += 1;
                check(free <= self.allocated as usize, "local free list longer than the slab");
            }

            check(
                free + self.needed as usize == self.allocated as usize,
                "free list and needed do not account for the slab",
            );
        }
        #[cfg(not(debug_assertions))]
        let _ = slab;
    }
}

impl Default for Metaslab {
    fn default() -> Self {
        Self::unused()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_initialise_starts_full() {
        let sc = size_class::size_to_sizeclass(64).unwrap();
        let mut meta = Metaslab::unused();
        assert_eq!(meta.state(), SlabState::Empty);

        meta.initialise(sc, false);
        assert_eq!(meta.allocated as usize, size_class::count_of(sc));
        assert_eq!(meta.needed, 1);
        assert!(meta.is_full());
        assert!(!meta.is_unused());
        assert_eq!(meta.state(), SlabState::Fresh);
        assert!(meta.valid_head());
    }

    #[test]
    fn test_short_capacity() {
        let sc = size_class::size_to_sizeclass(64).unwrap();
        let mut meta = Metaslab::unused();
        meta.initialise(sc, true);
        assert_eq!(meta.allocated as usize, size_class::slab_capacity(sc, true));
        assert!((meta.allocated as usize) < size_class::count_of(sc));
    }

    #[test]
    fn test_return_object_counts_down() {
        let mut meta = Metaslab::unused();
        meta.initialise(0, false);
        meta.needed = 3;
        assert!(!meta.return_object());
        assert!(!meta.return_object());
        assert!(meta.return_object());
        assert!(meta.is_unused());
    }

    #[test]
    fn test_full_return_needs_slow_path() {
        let mut meta = Metaslab::unused();
        meta.initialise(0, false);
        assert!(meta.return_object());
    }
}
