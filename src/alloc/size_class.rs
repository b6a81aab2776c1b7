//! The size-class table.
//!
//! A size class is an index into a geometric sequence of object sizes
//! (see [`bits::from_exp_mant`]). Classes below [`NUM_SMALL_CLASSES`] are packed
//! many-per-slab; the rest are medium classes served by medium slabs.
//!
//! The table is computed by a `const fn` and stored in a `static`, so it is
//! built once at compile time and is identical across builds.

use serde::Serialize;

use crate::alloc::bits;
use crate::alloc::config::{
    INTERMEDIATE_BITS, MIN_ALLOC_BITS, NUM_MEDIUM_CLASSES, NUM_SIZECLASSES, NUM_SMALL_CLASSES,
    SLAB_SIZE, SUPERSLAB_SIZE,
};
use crate::alloc::mediumslab::Mediumslab;
use crate::alloc::superslab::Superslab;

/// A size-class index in `[0, NUM_SIZECLASSES)`.
pub type SizeClass = u8;

/// Bytes at the front of slab 0 taken by the superslab header.
pub const HEADER_SIZE: usize = Superslab::header_size();

/// Usable bytes of the short slab (the one sharing space with the header).
pub const SHORT_SLAB_SIZE: usize = SLAB_SIZE - HEADER_SIZE;

/// Bytes at the front of a medium slab taken by its header.
pub const MEDIUM_HEADER_SIZE: usize = Mediumslab::header_size();

/// Per-class object sizes and slab layout constants.
pub struct SizeClassTable {
    size: [usize; NUM_SIZECLASSES],
    bump_ptr_start: [u32; NUM_SMALL_CLASSES],
    short_bump_ptr_start: [u32; NUM_SMALL_CLASSES],
    count_per_slab: [u16; NUM_SMALL_CLASSES],
    short_count_per_slab: [u16; NUM_SMALL_CLASSES],
    medium_slab_slots: [u16; NUM_MEDIUM_CLASSES],
}

impl SizeClassTable {
    /// Computes the table from the configuration constants.
    pub const fn new() -> Self {
        let mut size = [0usize; NUM_SIZECLASSES];
        let mut bump_ptr_start = [0u32; NUM_SMALL_CLASSES];
        let mut short_bump_ptr_start = [0u32; NUM_SMALL_CLASSES];
        let mut count_per_slab = [0u16; NUM_SMALL_CLASSES];
        let mut short_count_per_slab = [0u16; NUM_SMALL_CLASSES];
        let mut medium_slab_slots = [0u16; NUM_MEDIUM_CLASSES];

        let mut sc = 0;
        while sc < NUM_SIZECLASSES {
            size[sc] = bits::from_exp_mant::<INTERMEDIATE_BITS, MIN_ALLOC_BITS>(sc);
            sc += 1;
        }

        // The remainder that does not fit a whole object is left unused at the
        // front of the slab. The +1 keeps every start offset non-zero.
        let mut i = 0;
        while i < NUM_SMALL_CLASSES {
            let s = size[i];
            short_bump_ptr_start[i] = (1 + (SHORT_SLAB_SIZE % s) + HEADER_SIZE) as u32;
            bump_ptr_start[i] = (1 + (SLAB_SIZE % s)) as u32;
            count_per_slab[i] = (SLAB_SIZE / s) as u16;
            short_count_per_slab[i] = (SHORT_SLAB_SIZE / s) as u16;
            i += 1;
        }

        let mut i = NUM_SMALL_CLASSES;
        while i < NUM_SIZECLASSES {
            medium_slab_slots[i - NUM_SMALL_CLASSES] =
                ((SUPERSLAB_SIZE - MEDIUM_HEADER_SIZE) / size[i]) as u16;
            i += 1;
        }

        Self {
            size,
            bump_ptr_start,
            short_bump_ptr_start,
            count_per_slab,
            short_count_per_slab,
            medium_slab_slots,
        }
    }
}

impl Default for SizeClassTable {
    fn default() -> Self {
        Self::new()
    }
}

/// The process-wide table.
pub static SIZECLASS_METADATA: SizeClassTable = SizeClassTable::new();

/// Object size of `sc`.
#[inline]
pub fn size_of(sc: SizeClass) -> usize {
    SIZECLASS_METADATA.size[sc as usize]
}

/// Objects per ordinary slab for a small class.
#[inline]
pub fn count_of(sc: SizeClass) -> usize {
    SIZECLASS_METADATA.count_per_slab[sc as usize] as usize
}

/// Objects per medium slab for a medium class.
///
/// Takes the absolute class index; `sc` must be at least `NUM_SMALL_CLASSES`.
#[inline]
pub fn medium_capacity(sc: SizeClass) -> usize {
    SIZECLASS_METADATA.medium_slab_slots[sc as usize - NUM_SMALL_CLASSES] as usize
}

/// Encoded bump start offset for a fresh slab of a small class.
///
/// This is one more than the offset of the first object, so it is never zero.
#[inline]
pub fn slab_offset(sc: SizeClass, is_short: bool) -> usize {
    if is_short {
        SIZECLASS_METADATA.short_bump_ptr_start[sc as usize] as usize
    } else {
        SIZECLASS_METADATA.bump_ptr_start[sc as usize] as usize
    }
}

/// Slab-relative offset of the first object of a fresh slab.
#[inline]
pub fn first_object_offset(sc: SizeClass, is_short: bool) -> usize {
    slab_offset(sc, is_short) - 1
}

/// Objects a slab of class `sc` holds. Zero when a short slab is too small.
#[inline]
pub fn slab_capacity(sc: SizeClass, is_short: bool) -> usize {
    if is_short {
        SIZECLASS_METADATA.short_count_per_slab[sc as usize] as usize
    } else {
        count_of(sc)
    }
}

/// Whether `sc` is packed into ordinary slabs.
#[inline]
pub const fn is_small(sc: SizeClass) -> bool {
    (sc as usize) < NUM_SMALL_CLASSES
}

/// Largest size served by any class.
pub fn max_size() -> usize {
    size_of((NUM_SIZECLASSES - 1) as SizeClass)
}

/// Smallest class whose objects hold `size` bytes.
///
/// A zero size is treated as one byte. Sizes above [`max_size`] have no class.
pub fn size_to_sizeclass(size: usize) -> Option<SizeClass> {
    let size = size.max(1);
    if size > max_size() {
        return None;
    }
    let sc = bits::to_exp_mant_const::<INTERMEDIATE_BITS, MIN_ALLOC_BITS>(size);
    Some(sc as SizeClass)
}

/// Rounds `size` up to the size of its class.
pub fn round_size(size: usize) -> Option<usize> {
    size_to_sizeclass(size).map(size_of)
}

/// Which kind of slab serves a class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ClassKind {
    /// Many objects per ordinary slab.
    Small,
    /// Objects carved from a whole medium slab.
    Medium,
}

/// One row of the table, for inspection and export.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SizeClassInfo {
    /// Class index.
    pub sizeclass: SizeClass,
    /// Object size in bytes.
    pub size: usize,
    /// Small or medium.
    pub kind: ClassKind,
    /// Encoded bump start for ordinary slabs (small only).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bump_ptr_start: Option<usize>,
    /// Encoded bump start for the short slab (small only).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub short_bump_ptr_start: Option<usize>,
    /// Objects per ordinary slab (small only).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub count_per_slab: Option<usize>,
    /// Objects in the short slab (small only).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub short_count_per_slab: Option<usize>,
    /// Objects per medium slab (medium only).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub medium_slab_slots: Option<usize>,
}

/// Describes a single class.
pub fn info(sc: SizeClass) -> SizeClassInfo {
    if is_small(sc) {
        SizeClassInfo {
            sizeclass: sc,
            size: size_of(sc),
            kind: ClassKind::Small,
            bump_ptr_start: Some(slab_offset(sc, false)),
            short_bump_ptr_start: Some(slab_offset(sc, true)),
            count_per_slab: Some(count_of(sc)),
            short_count_per_slab: Some(slab_capacity(sc, true)),
            medium_slab_slots: None,
        }
    } else {
        SizeClassInfo {
            sizeclass: sc,
            size: size_of(sc),
            kind: ClassKind::Medium,
            bump_ptr_start: None,
            short_bump_ptr_start: None,
            count_per_slab: None,
            short_count_per_slab: None,
            medium_slab_slots: Some(medium_capacity(sc)),
        }
    }
}

/// Every class in index order.
pub fn table() -> impl Iterator<Item = SizeClassInfo> {
    (0..NUM_SIZECLASSES).map(|sc| info(sc as SizeClass))
}

/// The whole table as pretty-printed JSON.
///
/// # Errors
/// Returns the serializer error if encoding fails.
pub fn export_json() -> serde_json::Result<String> {
    serde_json::to_string_pretty(&table().collect::<Vec<_>>())
}
