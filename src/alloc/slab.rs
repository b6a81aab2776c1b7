//! Slabs: building free lists out of bump space, and the two-step free protocol.
//!
//! A slab has no object of its own. It is identified by its base address,
//! and its metadata lives in the owning superslab's header.
//!
//! Frees go through [`Slab::dealloc_fast`] first. That only counts the object
//! and pushes it on the slab's local free list. When the count says the slab
//! has to change state, the fast path backs off and the caller runs
//! [`Slab::dealloc_slow`], which moves the slab between the size class's
//! [`SlabList`] and the superslab.

use core::ptr::NonNull;

#[cfg(feature = "tracing")]
use tracing::trace;

use crate::alloc::bits;
use crate::alloc::config::{OS_PAGE_SIZE, SLAB_SIZE, SUPERSLAB_SIZE};
use crate::alloc::freelist::{FreeListHead, SlabNext};
use crate::alloc::metaslab::Metaslab;
use crate::alloc::size_class::{self, SizeClass};
use crate::alloc::slab_list::SlabList;
use crate::alloc::superslab::{Action, Superslab};

/// A `SLAB_SIZE`-aligned region inside a superslab.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(transparent)]
pub struct Slab(NonNull<u8>);

impl Slab {
    /// Wraps a slab base address.
    ///
    /// # Safety
    /// `base` must be a `SLAB_SIZE`-aligned address inside a superslab.
    pub unsafe fn from_base(base: NonNull<u8>) -> Self {
        debug_assert!(bits::is_aligned(base.as_ptr() as usize, SLAB_SIZE));
        Self(base)
    }

    /// The slab containing `p`.
    ///
    /// # Safety
    /// `p` must point into a slab of an initialised superslab.
    pub unsafe fn containing(p: NonNull<u8>) -> Self {
        let offset = p.as_ptr() as usize & (SLAB_SIZE - 1);
        Self(NonNull::new_unchecked(p.as_ptr().wrapping_sub(offset)))
    }

    /// Base address.
    #[inline(always)]
    pub fn base(self) -> NonNull<u8> {
        self.0
    }

    /// Whether this slab shares its space with the superslab header.
    #[inline(always)]
    pub fn is_short(self) -> bool {
        bits::is_aligned(self.0.as_ptr() as usize, SUPERSLAB_SIZE)
    }

    /// The superslab this slab belongs to.
    #[inline(always)]
    pub fn superslab(self) -> NonNull<Superslab> {
        // Safety: a slab is always inside an initialised superslab.
        unsafe { Superslab::get(self.0) }
    }

    /// Offset of `p` from the slab base.
    #[inline(always)]
    pub fn address_to_index(self, p: *const u8) -> u16 {
        debug_assert!((p as usize).wrapping_sub(self.0.as_ptr() as usize) < SLAB_SIZE);
        (p as usize - self.0.as_ptr() as usize) as u16
    }

    /// Metadata of this slab, looked up through the superslab header.
    ///
    /// # Safety
    /// The caller must have exclusive access to this slab's metadata for `'a`.
    pub unsafe fn get_meta<'a>(self) -> &'a mut Metaslab {
        let sup = self.superslab().as_mut();
        sup.get_meta(self)
    }

    /// Where the bump cursor starts in a freshly assigned slab of `sizeclass`.
    pub fn initial_cursor(self, sizeclass: SizeClass) -> NonNull<u8> {
        let offset = size_class::first_object_offset(sizeclass, self.is_short());
        debug_assert!(offset <= SLAB_SIZE);
        // Safety: at most one past the end of the slab, inside the superslab
        // region or one past it.
        unsafe { NonNull::new_unchecked(self.0.as_ptr().add(offset)) }
    }

    /// Builds a free list from the bump space at `bumpptr`.
    ///
    /// Links objects of `rsize` bytes starting at the cursor into
    /// `fast_free_list`, stopping at the end of the slab, after a page's worth
    /// of objects, or after a single object when `rsize` is a page or more.
    /// On return the cursor points just past the last object taken.
    ///
    /// # Safety
    /// The cursor must point at unclaimed bump space of a slab with room for
    /// at least one more object, and `fast_free_list` must be empty or
    /// already drained.
    #[inline]
    pub unsafe fn alloc_new_list(
        bumpptr: &mut NonNull<u8>,
        fast_free_list: &mut FreeListHead,
        rsize: usize,
    ) {
        let start = bumpptr.as_ptr() as usize;
        let slab_end = bits::align_down(start, SLAB_SIZE) + SLAB_SIZE;

        let batch = if rsize >= OS_PAGE_SIZE { 1 } else { OS_PAGE_SIZE / rsize };
        let fit = (slab_end - start) / rsize;
        let count = batch.min(fit);
        debug_assert!(count >= 1, "no room left in the slab");

        let mut curr = SlabNext::from_object(*bumpptr);
        fast_free_list.value = Some(curr);

        for _ in 1..count {
            let next_obj = NonNull::new_unchecked(curr.as_ptr().cast::<u8>().add(rsize));
            let next = SlabNext::from_object(next_obj);
            SlabNext::store(curr, Some(next));
            curr = next;
        }
        SlabNext::store(curr, None);

        *bumpptr = NonNull::new_unchecked(curr.as_ptr().cast::<u8>().add(rsize));
    }

    /// Frees `p` if no state change is needed.
    ///
    /// Returns `true` when `p` is now on the slab's local free list. Returns
    /// `false`, without touching the list, when the caller must finish with
    /// [`Slab::dealloc_slow`]. Either way the free has been counted.
    ///
    /// With the `check-client` feature, two cases are reported as a fatal
    /// double free: freeing into a slab with no live objects, and freeing the
    /// object that is already the head of the slab's free list. A repeated
    /// free of any other object on the free list is not detected.
    ///
    /// # Safety
    /// `p` must be a live object of this slab, `sup` its superslab, and the
    /// caller must be the slab's only user for the duration of the call.
    #[inline(always)]
    pub unsafe fn dealloc_fast(self, sup: &mut Superslab, p: NonNull<u8>) -> bool {
        let meta = sup.get_meta(self);
        let psn = SlabNext::from_object(p);

        #[cfg(feature = "check-client")]
        if meta.is_unused() || meta.head == Some(psn) {
            double_free(p);
        }

        if meta.return_object() {
            return false;
        }

        // Update the head and the next pointer in the free list.
        let head = meta.head;
        meta.head = Some(psn);
        debug_assert!(meta.valid_head());
        Metaslab::store_next(psn, head);

        true
    }

    /// Finishes a free that [`Slab::dealloc_fast`] handed back.
    ///
    /// A full slab either goes straight back to the superslab (its only object
    /// came back) or becomes active with `p` as its only free object. An
    /// active slab whose last live object came back leaves `sl` and goes back
    /// to the superslab. The returned [`Action`] tells the caller what that
    /// did to the superslab.
    ///
    /// # Safety
    /// Same as [`Slab::dealloc_fast`], which must have returned `false` for
    /// this `p`. `sl` is the slab list of this slab's size class.
    #[inline(never)]
    pub unsafe fn dealloc_slow(
        self,
        sl: &mut SlabList,
        sup: &mut Superslab,
        p: NonNull<u8>,
    ) -> Action {
        let meta = sup.get_meta(self);
        meta.debug_slab_invariant(self);

        if meta.is_full() {
            // Not on the size class list.
            if meta.allocated == 1 {
                trace!(slab = ?self.0, "full slab emptied");
                return self.return_to(sup);
            }
            debug_assert!(meta.head.is_none());

            let psn = SlabNext::from_object(p);
            meta.head = Some(psn);
            Metaslab::store_next(psn, None);
            meta.needed = meta.allocated - 1;

            sl.insert_prev(meta);
            meta.debug_slab_invariant(self);
            trace!(slab = ?self.0, needed = meta.needed, "full slab became active");
            return Action::NoSlabReturn;
        }

        meta.remove(sl);
        trace!(slab = ?self.0, "active slab emptied");
        self.return_to(sup)
    }

    fn return_to(self, sup: &mut Superslab) -> Action {
        if Metaslab::is_short(self) {
            return sup.dealloc_short_slab();
        }
        sup.dealloc_slab(self)
    }

    /// Moves the whole local free list of an active slab into `fast_free_list`.
    ///
    /// The slab leaves `sl` and is full again: every object is out until the
    /// next free brings it back.
    ///
    /// # Safety
    /// The slab must be active and on `sl`, and the caller must be its only user.
    pub unsafe fn claim_free_list(
        self,
        sl: &mut SlabList,
        sup: &mut Superslab,
        fast_free_list: &mut FreeListHead,
    ) {
        let meta = sup.get_meta(self);
        debug_assert!(!meta.is_full(), "only active slabs have a free list to claim");
        meta.debug_slab_invariant(self);

        fast_free_list.value = meta.head.take();
        meta.remove(sl);
        meta.set_full();
    }
}

#[cfg(feature = "check-client")]
#[cold]
#[inline(never)]
fn double_free(p: NonNull<u8>) -> ! {
    crate::error::fatal(crate::error::SlabError::DoubleFree { addr: p.as_ptr() as usize })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alloc::metaslab::SlabState;
    use crate::alloc::superslab::SuperslabBox;

    fn sc_of(size: usize) -> SizeClass {
        size_class::size_to_sizeclass(size).unwrap()
    }

    #[test]
    fn test_address_to_index() {
        let mut sup = SuperslabBox::new().unwrap();
        let slab = sup.alloc_slab(0).unwrap();
        let p = unsafe { slab.base().as_ptr().add(4112) };
        assert_eq!(slab.address_to_index(p), 4112);
        assert_eq!(unsafe { Slab::containing(NonNull::new(p).unwrap()) }, slab);
        assert_eq!(slab.superslab(), sup.as_ptr());
    }

    #[test]
    fn test_new_list_is_page_capped() {
        let mut sup = SuperslabBox::new().unwrap();
        let sc = sc_of(48);
        let slab = sup.alloc_slab(sc).unwrap();
        let mut cursor = slab.initial_cursor(sc);
        let start = cursor.as_ptr() as usize;
        let mut list = FreeListHead::new();

        unsafe { Slab::alloc_new_list(&mut cursor, &mut list, 48) };

        let objs: Vec<_> = unsafe { list.iter() }.collect();
        assert_eq!(objs.len(), OS_PAGE_SIZE / 48);
        for (i, p) in objs.iter().enumerate() {
            assert_eq!(p.as_ptr() as usize, start + i * 48);
        }
        assert_eq!(cursor.as_ptr() as usize, start + objs.len() * 48);
    }

    #[test]
    fn test_new_list_stops_at_slab_end() {
        let mut sup = SuperslabBox::new().unwrap();
        let sc = sc_of(16);
        let slab = sup.alloc_slab(sc).unwrap();
        let end = slab.base().as_ptr() as usize + SLAB_SIZE;
        let tail = unsafe { slab.base().as_ptr().add(SLAB_SIZE - 5 * 16) };
        let mut cursor = NonNull::new(tail).unwrap();
        let mut list = FreeListHead::new();

        unsafe { Slab::alloc_new_list(&mut cursor, &mut list, 16) };

        assert_eq!(unsafe { list.iter() }.count(), 5);
        assert_eq!(cursor.as_ptr() as usize, end);
    }

    #[test]
    fn test_new_list_single_large_object() {
        let mut sup = SuperslabBox::new().unwrap();
        let sc = sc_of(8192);
        let slab = sup.alloc_slab(sc).unwrap();
        let mut cursor = slab.initial_cursor(sc);
        let mut list = FreeListHead::new();

        unsafe { Slab::alloc_new_list(&mut cursor, &mut list, 8192) };

        assert_eq!(unsafe { list.iter() }.count(), 1);
        assert_eq!(cursor.as_ptr() as usize, slab.base().as_ptr() as usize + 8192);
    }

    #[test]
    fn test_fast_free_reaches_head() {
        let mut sup = SuperslabBox::new().unwrap();
        let sc = sc_of(64);
        let slab = sup.alloc_slab(sc).unwrap();
        let mut cursor = slab.initial_cursor(sc);
        let mut list = FreeListHead::new();
        let mut sl = SlabList::new();

        unsafe {
            Slab::alloc_new_list(&mut cursor, &mut list, 64);
            let a = list.pop().unwrap();
            let b = list.pop().unwrap();

            // First free of a full slab goes slow and activates it.
            assert!(!slab.dealloc_fast(&mut sup, a));
            assert_eq!(slab.dealloc_slow(&mut sl, &mut sup, a), Action::NoSlabReturn);
            assert_eq!(sup.meta(slab).state(), SlabState::Active);

            assert!(slab.dealloc_fast(&mut sup, b));
            let meta = sup.meta(slab);
            assert_eq!(meta.head, Some(SlabNext::from_object(b)));
            let free: Vec<_> = FreeListHead { value: meta.head }.iter().collect();
            assert_eq!(free, vec![b, a]);
            assert_eq!(meta.needed as usize, count_of_64() - 2);
        }
        sl.remove(sup.get_meta(slab));
    }

    fn count_of_64() -> usize {
        size_class::count_of(sc_of(64))
    }

    #[test]
    fn test_full_to_active_scenario() {
        let mut sup = SuperslabBox::new().unwrap();
        let sc = sc_of(64);
        let slab = sup.alloc_slab(sc).unwrap();
        let p = slab.initial_cursor(sc);
        let mut sl = SlabList::new();

        sup.get_meta(slab).allocated = 5;
        unsafe {
            assert!(!slab.dealloc_fast(&mut sup, p));
            assert_eq!(sup.meta(slab).needed, 0);
            assert_eq!(slab.dealloc_slow(&mut sl, &mut sup, p), Action::NoSlabReturn);
        }

        let meta = sup.meta(slab);
        assert_eq!(meta.needed, 4);
        assert_eq!(meta.head, Some(SlabNext::from_object(p)));
        assert_eq!(meta.state(), SlabState::Active);
        assert!(sl.contains(meta));
        assert_eq!(sl.len(), 1);
        sl.remove(sup.get_meta(slab));
    }

    #[test]
    fn test_single_object_slab_goes_straight_back() {
        let mut sup = SuperslabBox::new().unwrap();
        let sc = sc_of(40 * 1024);
        assert_eq!(size_class::count_of(sc), 1);
        let _keep = sup.alloc_slab(0).unwrap();
        let slab = sup.alloc_slab(sc).unwrap();
        let p = slab.initial_cursor(sc);
        let mut sl = SlabList::new();

        unsafe {
            assert!(!slab.dealloc_fast(&mut sup, p));
            assert_eq!(slab.dealloc_slow(&mut sl, &mut sup, p), Action::NoStatusChange);
        }
        assert!(sl.is_empty());
        assert_eq!(sup.meta(slab).state(), SlabState::Empty);
    }

    #[test]
    fn test_active_slab_drains_to_superslab() {
        let mut sup = SuperslabBox::new().unwrap();
        let sc = sc_of(64);
        let slab = sup.alloc_slab(sc).unwrap();
        let p = slab.initial_cursor(sc);
        let mut sl = SlabList::new();

        sup.get_meta(slab).allocated = 2;
        unsafe {
            let q = NonNull::new_unchecked(p.as_ptr().add(64));
            assert!(!slab.dealloc_fast(&mut sup, p));
            assert_eq!(slab.dealloc_slow(&mut sl, &mut sup, p), Action::NoSlabReturn);
            assert_eq!(sup.meta(slab).needed, 1);

            assert!(!slab.dealloc_fast(&mut sup, q));
            // Only slab in the superslab: returning it empties the superslab.
            assert_eq!(slab.dealloc_slow(&mut sl, &mut sup, q), Action::StatusChange);
        }
        assert!(sl.is_empty());
        assert!(sup.is_empty());
    }

    #[test]
    fn test_short_slab_reports_short_return() {
        let mut sup = SuperslabBox::new().unwrap();
        let sc = sc_of(64);
        let _other = sup.alloc_slab(0).unwrap();
        let short = sup.alloc_short_slab(sc).unwrap();
        let p = short.initial_cursor(sc);
        assert!(p.as_ptr() as usize - short.base().as_ptr() as usize >= Superslab::header_size());
        let mut sl = SlabList::new();

        sup.get_meta(short).allocated = 1;
        unsafe {
            assert!(!short.dealloc_fast(&mut sup, p));
            assert_eq!(short.dealloc_slow(&mut sl, &mut sup, p), Action::NoStatusChange);
        }
        assert!(sup.alloc_short_slab(sc).is_some());
    }

    #[test]
    fn test_claim_free_list_makes_slab_full() {
        let mut sup = SuperslabBox::new().unwrap();
        let sc = sc_of(64);
        let slab = sup.alloc_slab(sc).unwrap();
        let mut cursor = slab.initial_cursor(sc);
        let mut list = FreeListHead::new();
        let mut sl = SlabList::new();

        unsafe {
            Slab::alloc_new_list(&mut cursor, &mut list, 64);
            let a = list.pop().unwrap();
            let b = list.pop().unwrap();
            assert!(!slab.dealloc_fast(&mut sup, a));
            slab.dealloc_slow(&mut sl, &mut sup, a);
            assert!(slab.dealloc_fast(&mut sup, b));

            let mut claimed = FreeListHead::new();
            slab.claim_free_list(&mut sl, &mut sup, &mut claimed);
            assert_eq!(claimed.iter().collect::<Vec<_>>(), vec![b, a]);
        }

        let meta = sup.meta(slab);
        assert!(sl.is_empty());
        assert_eq!(meta.state(), SlabState::Full);
        assert!(meta.head.is_none());
        assert_eq!(meta.needed, 1);
    }
}
