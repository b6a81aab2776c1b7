//! Superslabs: `SUPERSLAB_SIZE`-aligned regions split into slabs.
//!
//! The header sits at the very start of the region, inside slab 0. Slab 0 is
//! therefore "short": it only has `SLAB_SIZE - HEADER_SIZE` usable bytes.
//!
//! The header keeps one [`Metaslab`] per slab, a bitmap of free ordinary
//! slabs and a usage counter where the short slab counts 1 and every
//! ordinary slab counts 2. The low bit of the counter thus says whether the
//! short slab is in use.

use core::ops::{Deref, DerefMut};
use core::ptr::{self, NonNull};

#[cfg(feature = "tracing")]
use tracing::debug;

use crate::alloc::bits;
use crate::alloc::config::{SLAB_BITS, SLAB_COUNT, SLAB_SIZE, SUPERSLAB_SIZE};
use crate::alloc::metaslab::Metaslab;
use crate::alloc::region::{GlobalRegionAlloc, RegionAlloc};
use crate::alloc::size_class::{self, SizeClass};
use crate::alloc::slab::Slab;

const FREE_WORDS: usize = SLAB_COUNT / 64;

const SHORT_USE: u16 = 1;
const SLAB_USE: u16 = 2;
const ALMOST_FULL: u16 = ((SLAB_COUNT - 1) as u16) * SLAB_USE;
const FULL: u16 = ALMOST_FULL + SHORT_USE;

/// Availability of a superslab for new slabs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    /// No slab in use.
    Empty,
    /// At least one ordinary slab is free.
    Available,
    /// Only the short slab is free.
    OnlyShortSlabAvailable,
    /// Every slab is in use.
    Full,
}

/// What returning a slab did to its superslab.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// No slab was returned.
    NoSlabReturn,
    /// A slab was returned; the superslab status is unchanged.
    NoStatusChange,
    /// A slab was returned and the superslab changed status
    /// (it left Full / OnlyShortSlabAvailable, or became Empty).
    StatusChange,
}

/// Header of a superslab.
#[repr(C)]
pub struct Superslab {
    region: NonNull<u8>,
    used: u16,
    // Bit i set: ordinary slab i is free. Bit 0 is always clear.
    free_slabs: [u64; FREE_WORDS],
    meta: [Metaslab; SLAB_COUNT],
}

impl Superslab {
    /// Bytes taken by the header at the front of slab 0.
    pub const fn header_size() -> usize {
        core::mem::size_of::<Self>()
    }

    /// Writes a fresh header at the start of `region`.
    ///
    /// # Safety
    /// `region` must be `SUPERSLAB_SIZE` bytes, `SUPERSLAB_SIZE`-aligned, and
    /// exclusively owned by the caller.
    pub unsafe fn init(region: NonNull<u8>) -> NonNull<Superslab> {
        debug_assert!(bits::is_aligned(region.as_ptr() as usize, SUPERSLAB_SIZE));
        let sup = region.as_ptr().cast::<Superslab>();

        ptr::addr_of_mut!((*sup).region).write(region);
        ptr::addr_of_mut!((*sup).used).write(0);

        let mut free = [u64::MAX; FREE_WORDS];
        free[0] &= !1;
        ptr::addr_of_mut!((*sup).free_slabs).write(free);

        let meta = ptr::addr_of_mut!((*sup).meta).cast::<Metaslab>();
        for i in 0..SLAB_COUNT {
            meta.add(i).write(Metaslab::unused());
        }

        NonNull::new_unchecked(sup)
    }

    /// The superslab containing `p`.
    ///
    /// # Safety
    /// `p` must point into a superslab initialised with [`Superslab::init`].
    pub unsafe fn get(p: NonNull<u8>) -> NonNull<Superslab> {
        let offset = p.as_ptr() as usize & (SUPERSLAB_SIZE - 1);
        NonNull::new_unchecked(p.as_ptr().wrapping_sub(offset).cast())
    }

    /// Start of the region.
    pub fn base(&self) -> NonNull<u8> {
        self.region
    }

    /// Position of `slab` inside this superslab.
    pub fn slab_index(&self, slab: Slab) -> usize {
        let offset = slab.base().as_ptr() as usize - self.region.as_ptr() as usize;
        debug_assert!(offset < SUPERSLAB_SIZE);
        offset >> SLAB_BITS
    }

    /// The slab at `index`.
    pub fn slab_at(&self, index: usize) -> Slab {
        debug_assert!(index < SLAB_COUNT);
        // Safety: in bounds of the region, which is SLAB_SIZE aligned.
        unsafe {
            Slab::from_base(NonNull::new_unchecked(
                self.region.as_ptr().add(index * SLAB_SIZE),
            ))
        }
    }

    /// Metadata of `slab`, which must belong to this superslab.
    pub fn get_meta(&mut self, slab: Slab) -> &mut Metaslab {
        let index = self.slab_index(slab);
        &mut self.meta[index]
    }

    /// Read-only metadata of `slab`.
    pub fn meta(&self, slab: Slab) -> &Metaslab {
        &self.meta[self.slab_index(slab)]
    }

    /// Whether no slab is in use.
    pub fn is_empty(&self) -> bool {
        self.used == 0
    }

    fn is_full(&self) -> bool {
        self.used == FULL
    }

    fn is_almost_full(&self) -> bool {
        self.used >= ALMOST_FULL
    }

    fn short_in_use(&self) -> bool {
        self.used & SHORT_USE != 0
    }

    /// Current availability.
    pub fn status(&self) -> Status {
        if !self.is_almost_full() {
            if self.is_empty() {
                return Status::Empty;
            }
            return Status::Available;
        }
        if !self.is_full() {
            return Status::OnlyShortSlabAvailable;
        }
        Status::Full
    }

    /// Dedicates the short slab to `sizeclass`.
    ///
    /// Returns `None` if the short slab is in use or too small for one object.
    pub fn alloc_short_slab(&mut self, sizeclass: SizeClass) -> Option<Slab> {
        if self.short_in_use() || size_class::slab_capacity(sizeclass, true) == 0 {
            return None;
        }
        self.meta[0].initialise(sizeclass, true);
        self.used += SHORT_USE;
        debug!(sizeclass, "assigned short slab");
        Some(self.slab_at(0))
    }

    /// Dedicates a free ordinary slab to `sizeclass`.
    pub fn alloc_slab(&mut self, sizeclass: SizeClass) -> Option<Slab> {
        let (word, free) = self
            .free_slabs
            .iter()
            .enumerate()
            .find(|(_, w)| **w != 0)
            .map(|(i, w)| (i, *w))?;
        let index = word * 64 + free.trailing_zeros() as usize;

        self.free_slabs[word] &= !(1u64 << (index % 64));
        self.meta[index].initialise(sizeclass, false);
        self.used += SLAB_USE;
        debug!(index, sizeclass, "assigned slab");
        Some(self.slab_at(index))
    }

    /// Takes back an ordinary slab whose objects are all free.
    pub fn dealloc_slab(&mut self, slab: Slab) -> Action {
        let index = self.slab_index(slab);
        debug_assert!(index != 0, "short slab returned as an ordinary slab");
        debug_assert!(self.free_slabs[index / 64] & (1u64 << (index % 64)) == 0);
        debug_assert!(self.meta[index].is_unused() && self.meta[index].is_full());

        let was_almost_full = self.is_almost_full();
        self.free_slabs[index / 64] |= 1u64 << (index % 64);
        self.used -= SLAB_USE;
        debug!(index, "returned slab");

        self.action(was_almost_full)
    }

    /// Takes back the short slab.
    pub fn dealloc_short_slab(&mut self) -> Action {
        debug_assert!(self.short_in_use(), "short slab is not in use");
        debug_assert!(self.meta[0].is_unused() && self.meta[0].is_full());

        let was_full = self.is_full();
        self.used -= SHORT_USE;
        debug!("returned short slab");

        self.action(was_full)
    }

    fn action(&self, was_blocked: bool) -> Action {
        if was_blocked || self.is_empty() {
            debug!(status = ?self.status(), "superslab status changed");
            Action::StatusChange
        } else {
            Action::NoStatusChange
        }
    }
}

/// An owned superslab backed by a [`RegionAlloc`].
///
/// Slabs of this superslab must be off every [`SlabList`](crate::alloc::SlabList)
/// before it is dropped.
pub struct SuperslabBox<A: RegionAlloc = GlobalRegionAlloc> {
    ptr: NonNull<Superslab>,
    alloc: A,
}

// Safety: the box owns its region exclusively.
unsafe impl<A: RegionAlloc + Send> Send for SuperslabBox<A> {}

impl SuperslabBox {
    /// Allocates a superslab from the global allocator.
    pub fn new() -> Option<Self> {
        Self::new_in(GlobalRegionAlloc)
    }
}

impl<A: RegionAlloc> SuperslabBox<A> {
    /// Allocates a superslab from `alloc`.
    pub fn new_in(alloc: A) -> Option<Self> {
        unsafe {
            let region = alloc.alloc_region()?;
            let ptr = Superslab::init(region);
            Some(Self { ptr, alloc })
        }
    }

    /// Raw pointer to the header.
    pub fn as_ptr(&self) -> NonNull<Superslab> {
        self.ptr
    }
}

impl<A: RegionAlloc> Deref for SuperslabBox<A> {
    type Target = Superslab;

    fn deref(&self) -> &Superslab {
        // Safety: initialised in `new_in`, owned until drop.
        unsafe { self.ptr.as_ref() }
    }
}

impl<A: RegionAlloc> DerefMut for SuperslabBox<A> {
    fn deref_mut(&mut self) -> &mut Superslab {
        // Safety: initialised in `new_in`, owned until drop.
        unsafe { self.ptr.as_mut() }
    }
}

impl<A: RegionAlloc> Drop for SuperslabBox<A> {
    fn drop(&mut self) {
        unsafe {
            let region = self.ptr.as_ref().region;
            self.alloc.dealloc_region(region);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_fits_in_short_slab() {
        assert!(Superslab::header_size() < SLAB_SIZE);
        assert_eq!(size_class::HEADER_SIZE, Superslab::header_size());
    }

    #[test]
    fn test_fresh_superslab_is_empty() {
        let sup = SuperslabBox::new().unwrap();
        assert_eq!(sup.status(), Status::Empty);
        assert!(bits::is_aligned(sup.base().as_ptr() as usize, SUPERSLAB_SIZE));
        assert_eq!(sup.base().cast::<Superslab>(), sup.as_ptr());
    }

    #[test]
    fn test_alloc_slab_skips_short() {
        let mut sup = SuperslabBox::new().unwrap();
        let slab = sup.alloc_slab(0).unwrap();
        assert_eq!(sup.slab_index(slab), 1);
        assert!(!slab.is_short());
        assert_eq!(sup.status(), Status::Available);
    }

    #[test]
    fn test_short_slab_once() {
        let mut sup = SuperslabBox::new().unwrap();
        let short = sup.alloc_short_slab(0).unwrap();
        assert!(short.is_short());
        assert_eq!(sup.slab_index(short), 0);
        assert!(sup.alloc_short_slab(0).is_none());
    }

    #[test]
    fn test_short_slab_rejects_classes_that_do_not_fit() {
        let mut sup = SuperslabBox::new().unwrap();
        let largest_small = (crate::alloc::config::NUM_SMALL_CLASSES - 1) as SizeClass;
        assert!(sup.alloc_short_slab(largest_small).is_none());
        assert_eq!(sup.status(), Status::Empty);
    }

    #[test]
    fn test_status_transitions() {
        let mut sup = SuperslabBox::new().unwrap();
        let mut slabs = Vec::new();
        while let Some(slab) = sup.alloc_slab(0) {
            slabs.push(slab);
        }
        assert_eq!(slabs.len(), SLAB_COUNT - 1);
        assert_eq!(sup.status(), Status::OnlyShortSlabAvailable);

        sup.alloc_short_slab(0).unwrap();
        assert_eq!(sup.status(), Status::Full);

        // Metadata must read as unused before a slab can go back.
        sup.meta[0].needed = 0;
        assert_eq!(sup.dealloc_short_slab(), Action::StatusChange);
        assert_eq!(sup.status(), Status::OnlyShortSlabAvailable);

        let last = slabs.pop().unwrap();
        sup.get_meta(last).needed = 0;
        assert_eq!(sup.dealloc_slab(last), Action::StatusChange);
        assert_eq!(sup.status(), Status::Available);

        let next = slabs.pop().unwrap();
        sup.get_meta(next).needed = 0;
        assert_eq!(sup.dealloc_slab(next), Action::NoStatusChange);

        for slab in slabs.drain(..) {
            sup.get_meta(slab).needed = 0;
            sup.dealloc_slab(slab);
        }
        assert_eq!(sup.status(), Status::Empty);
    }

    #[test]
    fn test_returned_slab_is_reused() {
        let mut sup = SuperslabBox::new().unwrap();
        let a = sup.alloc_slab(0).unwrap();
        let _b = sup.alloc_slab(0).unwrap();
        sup.get_meta(a).needed = 0;
        assert_eq!(sup.dealloc_slab(a), Action::NoStatusChange);
        assert_eq!(sup.alloc_slab(3), Some(a));
        assert_eq!(sup.meta(a).sizeclass(), 3);
    }
}
