//! Medium slab header layout.
//!
//! A medium slab is a whole superslab-sized region holding a handful of
//! objects of one medium class. Only its header size matters to this crate:
//! the size-class table needs it to compute medium capacities.

use crate::alloc::bits;
use crate::alloc::config::{OS_PAGE_SIZE, SLAB_COUNT, SLAB_SIZE};
use crate::alloc::size_class::SizeClass;

/// Header at the front of a medium slab.
///
/// Layout only; the slot management itself belongs to the front end.
#[repr(C)]
#[allow(dead_code)]
pub struct Mediumslab {
    // Number of free slots.
    free: u16,
    // Top of the free-slot stack.
    head: u8,
    sizeclass: SizeClass,
    // Free slot indices.
    stack: [u16; SLAB_COUNT - 1],
}

impl Mediumslab {
    /// Bytes reserved for the header.
    ///
    /// The header rounded up to whole pages, so every object starts page
    /// aligned.
    pub const fn header_size() -> usize {
        bits::align_up(core::mem::size_of::<Self>(), OS_PAGE_SIZE)
    }
}

const _: () = {
    assert!(core::mem::size_of::<Mediumslab>() < SLAB_SIZE);
    assert!(Mediumslab::header_size() < SLAB_SIZE);
};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_covers_layout() {
        let size = core::mem::size_of::<Mediumslab>();
        assert!(Mediumslab::header_size() >= size);
        assert!(bits::is_aligned(Mediumslab::header_size(), OS_PAGE_SIZE));
        // Free stack of 255 u16 slots plus the counters fits in one page.
        assert_eq!(Mediumslab::header_size(), OS_PAGE_SIZE);
    }
}
