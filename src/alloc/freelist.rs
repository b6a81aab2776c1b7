//! Intrusive free lists threaded through unallocated objects.
//!
//! A free object's first word is reused as the link to the next free object.
//! All reads and writes of that word go through [`SlabNext`].

use core::ptr::NonNull;

/// The link word overlaid on an object that is not live.
///
/// `SlabNext` is never allocated on its own; a `NonNull<SlabNext>` is just an
/// object address viewed as a list node. `None` is the empty-list sentinel.
#[repr(C)]
pub struct SlabNext {
    next: Option<NonNull<SlabNext>>,
}

impl SlabNext {
    /// Views an object address as a list node.
    #[inline(always)]
    pub fn from_object(p: NonNull<u8>) -> NonNull<SlabNext> {
        p.cast()
    }

    /// Writes the link of `node`.
    ///
    /// # Safety
    /// `node` must point to at least a word of writable, word-aligned memory
    /// that is not live: nothing else may read or write it as user data until
    /// it is handed out again.
    #[inline(always)]
    pub unsafe fn store(node: NonNull<SlabNext>, next: Option<NonNull<SlabNext>>) {
        core::ptr::addr_of_mut!((*node.as_ptr()).next).write(next);
    }

    /// Reads the link of `node`.
    ///
    /// # Safety
    /// `node` must be on a free list, i.e. its link was written by
    /// [`SlabNext::store`] and the object has not been handed out since.
    #[inline(always)]
    pub unsafe fn follow(node: NonNull<SlabNext>) -> Option<NonNull<SlabNext>> {
        core::ptr::addr_of!((*node.as_ptr()).next).read()
    }
}

/// Head of a batch of free objects owned by the caller.
///
/// Typically one per size class per thread. The objects it reaches are not
/// live and belong to no other list.
#[derive(Debug, Default)]
pub struct FreeListHead {
    /// First object, or `None` when the list is empty.
    pub value: Option<NonNull<SlabNext>>,
}

impl FreeListHead {
    /// An empty list.
    pub const fn new() -> Self {
        Self { value: None }
    }

    /// Whether the list holds no objects.
    pub fn is_empty(&self) -> bool {
        self.value.is_none()
    }

    /// Takes the first object off the list.
    ///
    /// # Safety
    /// The list must be well formed: every node reached was linked with
    /// [`SlabNext::store`] and is still free.
    pub unsafe fn pop(&mut self) -> Option<NonNull<u8>> {
        let head = self.value?;
        self.value = SlabNext::follow(head);
        Some(head.cast())
    }

    /// Walks the list without consuming it.
    ///
    /// # Safety
    /// Same as [`FreeListHead::pop`], and the list must not change while the
    /// iterator is alive.
    pub unsafe fn iter(&self) -> FreeListIter {
        FreeListIter::new(self.value)
    }
}

/// Iterator over the objects of an intrusive free list.
pub struct FreeListIter {
    curr: Option<NonNull<SlabNext>>,
}

impl FreeListIter {
    /// Starts a walk at `head`.
    ///
    /// # Safety
    /// Every node reachable from `head` must be a free object with a valid link.
    pub unsafe fn new(head: Option<NonNull<SlabNext>>) -> Self {
        Self { curr: head }
    }
}

impl Iterator for FreeListIter {
    type Item = NonNull<u8>;

    fn next(&mut self) -> Option<Self::Item> {
        let node = self.curr?;
        // Safety: guaranteed by the constructor's contract.
        self.curr = unsafe { SlabNext::follow(node) };
        Some(node.cast())
    }
}
