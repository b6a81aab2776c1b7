//! # `slabcore` - Slab Layer of a Size-Class Allocator
//!
//! The core of a slab allocator: how small objects of one size class are
//! carved out of a slab, threaded onto free lists, and handed back.
//!
//! ## Layout
//!
//! Memory comes in superslabs: `SUPERSLAB_SIZE`-aligned regions of
//! `SLAB_COUNT` slabs of `SLAB_SIZE` bytes each. The superslab header sits at
//! the start of the region and holds one [`Metaslab`] per slab. The first slab
//! shares its space with the header and is called the short slab.
//!
//! Because every region is aligned to its own size, the slab and superslab of
//! any object are found by masking its address. Nothing is stored per object.
//!
//! ## Size classes
//!
//! Requested sizes round up to one of [`NUM_SIZECLASSES`](alloc::config::NUM_SIZECLASSES)
//! classes, spaced like a float with a two-bit mantissa: 16, 32, 48, 64, 80,
//! 96, 112, 128, 160, ... The small classes are packed into slabs; the rest
//! are medium classes served from whole superslabs.
//!
//! ## Slab lifecycle
//!
//! A slab dedicated to a class is handed out by a bump cursor, a page's worth
//! of objects at a time ([`Slab::alloc_new_list`]). Frees land on the slab's
//! local free list through [`Slab::dealloc_fast`]. When a free changes the
//! slab's state (first free into a full slab, last free into an active one)
//! the fast path declines and [`Slab::dealloc_slow`] moves the slab between
//! its class's [`SlabList`] and the superslab.
//!
//! ## Features
//!
//! - `check-client` (default): detect frees into empty slabs and immediate
//!   double frees on the fast path.
//! - `tracing`: log slab state changes through the `tracing` crate.
//!
//! ## Example
//!
//! ```rust
//! use slabcore::{size_class, FreeListHead, Slab, SlabList, SuperslabBox};
//!
//! let mut sup = SuperslabBox::new().unwrap();
//! let sc = size_class::size_to_sizeclass(64).unwrap();
//! let slab = sup.alloc_slab(sc).unwrap();
//!
//! let mut cursor = slab.initial_cursor(sc);
//! let mut fast = FreeListHead::new();
//! let mut list = SlabList::new();
//!
//! unsafe {
//!     Slab::alloc_new_list(&mut cursor, &mut fast, size_class::size_of(sc));
//!     let p = fast.pop().unwrap();
//!
//!     // The slab is full: the first free goes slow and puts it on the list.
//!     if !slab.dealloc_fast(&mut sup, p) {
//!         slab.dealloc_slow(&mut list, &mut sup, p);
//!     }
//! }
//! assert_eq!(list.len(), 1);
//! # list.remove(sup.get_meta(slab));
//! ```

#![warn(missing_docs, clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::cast_possible_truncation)]

// No-op logging macros when tracing is disabled.
#[cfg(not(feature = "tracing"))]
#[allow(unused_macros)]
macro_rules! error {
    ($($arg:tt)*) => {};
}
#[cfg(not(feature = "tracing"))]
#[allow(unused_macros)]
macro_rules! debug {
    ($($arg:tt)*) => {};
}
#[cfg(not(feature = "tracing"))]
#[allow(unused_macros)]
macro_rules! trace {
    ($($arg:tt)*) => {};
}

pub mod alloc;
pub mod error;

pub use alloc::size_class::{self, SizeClass};
pub use alloc::{
    Action, FreeListHead, GlobalRegionAlloc, Metaslab, RegionAlloc, Slab, SlabList, SlabNext,
    SlabState, Status, Superslab, SuperslabBox,
};
pub use error::SlabError;

// Compile-time layout checks
const _: () = {
    use core::mem;
    use core::ptr::NonNull;

    use alloc::config::{OS_PAGE_SIZE, SLAB_SIZE};

    // Free objects carry a single link, so the smallest object must hold one.
    assert!(mem::size_of::<SlabNext>() == mem::size_of::<usize>());
    assert!(mem::size_of::<Option<NonNull<SlabNext>>>() == mem::size_of::<usize>());
    assert!(mem::size_of::<SlabNext>() <= alloc::config::MIN_ALLOC_SIZE);

    // A slab handle is just its base address.
    assert!(mem::size_of::<Slab>() == mem::size_of::<usize>());

    // The short slab must keep room for objects after the header.
    assert!(Superslab::header_size() < SLAB_SIZE);
    assert!(alloc::Mediumslab::header_size() == OS_PAGE_SIZE);
};
