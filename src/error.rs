//! Errors reported by the slab layer.
//!
//! None of these are recoverable: they mean the caller broke the ownership
//! contract of an object or the metadata no longer adds up. They are raised
//! through [`fatal`].

#[cfg(feature = "tracing")]
use tracing::error;

/// A broken slab invariant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlabError {
    /// An object was freed twice, or freed into a slab with no live objects.
    DoubleFree {
        /// Address of the object.
        addr: usize,
    },
    /// Slab metadata is inconsistent.
    Corrupted {
        /// What check failed.
        reason: &'static str,
    },
}

impl core::fmt::Display for SlabError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::DoubleFree { addr } => write!(f, "double free of object at {addr:#x}"),
            Self::Corrupted { reason } => write!(f, "slab metadata corrupted: {reason}"),
        }
    }
}

impl std::error::Error for SlabError {}

/// Reports `err` and stops.
///
/// Release builds abort on panic, so this never unwinds past the slab layer
/// there.
#[cold]
#[inline(never)]
pub fn fatal(err: SlabError) -> ! {
    error!(%err, "fatal slab error");
    panic!("{err}")
}
