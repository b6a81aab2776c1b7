//! Compile-time allocator configuration.
//!
//! Everything here is fixed before the size-class table is built. Changing a
//! value changes the table, so the table tests pin the defaults.

use crate::alloc::bits;

/// Smallest object size, as a power of two (16 bytes).
pub const MIN_ALLOC_BITS: usize = 4;
/// Smallest object size in bytes.
pub const MIN_ALLOC_SIZE: usize = bits::one_at_bit(MIN_ALLOC_BITS);

/// Mantissa width of the size-class encoding.
/// Each power-of-two octave is split into `1 << INTERMEDIATE_BITS` classes.
pub const INTERMEDIATE_BITS: usize = 2;

/// The system page size (4KB).
pub const OS_PAGE_SIZE: usize = 4096;

/// Slab size, as a power of two (64KB).
pub const SLAB_BITS: usize = 16;
/// Slab size in bytes.
pub const SLAB_SIZE: usize = bits::one_at_bit(SLAB_BITS);

/// Superslab size, as a power of two (16MB).
pub const SUPERSLAB_BITS: usize = 24;
/// Superslab size in bytes.
pub const SUPERSLAB_SIZE: usize = bits::one_at_bit(SUPERSLAB_BITS);

/// Number of slabs carved out of one superslab.
pub const SLAB_COUNT: usize = SUPERSLAB_SIZE / SLAB_SIZE;

/// Classes whose objects are smaller than a slab.
pub const NUM_SMALL_CLASSES: usize =
    bits::to_exp_mant_const::<INTERMEDIATE_BITS, MIN_ALLOC_BITS>(SLAB_SIZE);

/// All classes, small and medium. Medium classes stop short of a whole superslab.
pub const NUM_SIZECLASSES: usize =
    bits::to_exp_mant_const::<INTERMEDIATE_BITS, MIN_ALLOC_BITS>(SUPERSLAB_SIZE);

/// Classes served by medium slabs.
pub const NUM_MEDIUM_CLASSES: usize = NUM_SIZECLASSES - NUM_SMALL_CLASSES;

const _: () = {
    assert!(SLAB_BITS < SUPERSLAB_BITS);
    assert!(OS_PAGE_SIZE <= SLAB_SIZE);
    // Slab indices and slab-relative offsets are stored in narrow integers.
    assert!(SLAB_COUNT <= 256);
    assert!(SLAB_SIZE <= 1 << 16);
    assert!(NUM_SIZECLASSES <= u8::MAX as usize);
};
