//! Backing memory for superslabs.
//!
//! Every superslab lives in a region of exactly `SUPERSLAB_SIZE` bytes that
//! starts on a `SUPERSLAB_SIZE` boundary. Slab and superslab lookups mask
//! object addresses, so a misaligned region would send them into the wrong
//! header.

use core::alloc::Layout;
use core::ptr::NonNull;
use std::alloc::{alloc, dealloc};

use crate::alloc::config::SUPERSLAB_SIZE;

/// Source of superslab regions.
pub trait RegionAlloc {
    /// Allocates one superslab region.
    ///
    /// The region must be `SUPERSLAB_SIZE` bytes long, aligned to
    /// `SUPERSLAB_SIZE`, and writable. Returns `None` when no region is
    /// available.
    ///
    /// # Safety
    /// The caller must hand the region back through [`RegionAlloc::dealloc_region`]
    /// on the same allocator, and only once.
    unsafe fn alloc_region(&self) -> Option<NonNull<u8>>;

    /// Releases a region obtained from [`RegionAlloc::alloc_region`].
    ///
    /// # Safety
    /// `region` must come from this allocator and must no longer be used.
    unsafe fn dealloc_region(&self, region: NonNull<u8>);
}

/// Layout of a superslab region.
pub const fn region_layout() -> Layout {
    // Safety: SUPERSLAB_SIZE is a non-zero power of two.
    unsafe { Layout::from_size_align_unchecked(SUPERSLAB_SIZE, SUPERSLAB_SIZE) }
}

/// Takes superslab regions from the global allocator.
#[derive(Default, Clone, Copy, Debug)]
pub struct GlobalRegionAlloc;

impl RegionAlloc for GlobalRegionAlloc {
    unsafe fn alloc_region(&self) -> Option<NonNull<u8>> {
        NonNull::new(alloc(region_layout()))
    }

    unsafe fn dealloc_region(&self, region: NonNull<u8>) {
        dealloc(region.as_ptr(), region_layout());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alloc::bits;

    #[test]
    fn test_global_region_is_superslab_aligned() {
        unsafe {
            let region = GlobalRegionAlloc.alloc_region().unwrap();
            assert!(bits::is_aligned(region.as_ptr() as usize, SUPERSLAB_SIZE));

            // Both ends are writable.
            region.as_ptr().write(1);
            region.as_ptr().add(SUPERSLAB_SIZE - 1).write(2);

            GlobalRegionAlloc.dealloc_region(region);
        }
    }

    #[test]
    fn test_region_layout() {
        let layout = region_layout();
        assert_eq!(layout.size(), SUPERSLAB_SIZE);
        assert_eq!(layout.align(), SUPERSLAB_SIZE);
    }
}
