//! Slab allocation core: size classes, superslabs, slabs and their free lists.

pub mod bits;
pub mod config;
pub mod freelist;
pub mod mediumslab;
pub mod metaslab;
pub mod region;
pub mod size_class;
pub mod slab;
pub mod slab_list;
pub mod superslab;

pub use freelist::{FreeListHead, FreeListIter, SlabNext};
pub use mediumslab::Mediumslab;
pub use metaslab::{Metaslab, SlabState};
pub use region::{GlobalRegionAlloc, RegionAlloc};
pub use size_class::{SizeClass, SizeClassInfo};
pub use slab::Slab;
pub use slab_list::SlabList;
pub use superslab::{Action, Status, Superslab, SuperslabBox};
