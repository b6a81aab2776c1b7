//! Intrusive list of partially free slabs for one size class.

use core::ptr::NonNull;

use crate::alloc::metaslab::Metaslab;

/// Doubly-linked list of [`Metaslab`]s that have a local free list.
///
/// The links live in the metaslabs themselves, so the list can be moved
/// freely. A metaslab is on at most one list at a time.
#[derive(Debug, Default)]
pub struct SlabList {
    head: Option<NonNull<Metaslab>>,
    tail: Option<NonNull<Metaslab>>,
    len: usize,
}

// Safety: the list only holds addresses; access to the nodes is serialized by
// whoever owns the slabs.
unsafe impl Send for SlabList {}

impl SlabList {
    /// An empty list.
    pub const fn new() -> Self {
        Self { head: None, tail: None, len: 0 }
    }

    /// Number of slabs on the list.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether the list is empty.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// First slab on the list, the one allocation should drain next.
    pub fn peek(&self) -> Option<NonNull<Metaslab>> {
        self.head
    }

    /// Appends `meta` at the end of the list.
    ///
    /// # Safety
    /// `meta` must stay at the same address and outlive its membership, i.e.
    /// it must be removed before its superslab goes away.
    pub unsafe fn insert_prev(&mut self, meta: &mut Metaslab) {
        debug_assert!(!meta.listed, "metaslab is already on a slab list");
        let node = NonNull::from(&mut *meta);

        meta.prev = self.tail;
        meta.next = None;
        meta.listed = true;
        meta.mark_used();

        match self.tail {
            Some(mut tail) => tail.as_mut().next = Some(node),
            None => self.head = Some(node),
        }
        self.tail = Some(node);
        self.len += 1;
    }

    /// Unlinks `meta`, which must be on this list.
    pub fn remove(&mut self, meta: &mut Metaslab) {
        debug_assert!(meta.listed, "metaslab is not on a slab list");
        debug_assert!(self.contains(meta), "metaslab is on a different slab list");

        // Safety: neighbours are members of this list, and members stay valid
        // for as long as they are linked (see `insert_prev`).
        unsafe {
            match meta.prev {
                Some(mut prev) => prev.as_mut().next = meta.next,
                None => self.head = meta.next,
            }
            match meta.next {
                Some(mut next) => next.as_mut().prev = meta.prev,
                None => self.tail = meta.prev,
            }
        }

        meta.prev = None;
        meta.next = None;
        meta.listed = false;
        self.len -= 1;
    }

    /// Unlinks and returns the first slab.
    pub fn pop(&mut self) -> Option<NonNull<Metaslab>> {
        let mut head = self.head?;
        // Safety: members stay valid while linked.
        unsafe { self.remove(head.as_mut()) };
        Some(head)
    }

    /// Whether `meta` is linked into this list. Walks the list.
    pub fn contains(&self, meta: &Metaslab) -> bool {
        let target = meta as *const Metaslab;
        let mut curr = self.head;
        while let Some(node) = curr {
            if node.as_ptr() as *const Metaslab == target {
                return true;
            }
            // Safety: members stay valid while linked.
            curr = unsafe { node.as_ref().next };
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn metas<const N: usize>() -> [Metaslab; N] {
        core::array::from_fn(|_| {
            let mut m = Metaslab::unused();
            m.initialise(0, false);
            m
        })
    }

    #[test]
    fn test_insert_appends() {
        let mut nodes = metas::<3>();
        let mut list = SlabList::new();
        assert!(list.is_empty());

        unsafe {
            for m in nodes.iter_mut() {
                list.insert_prev(m);
            }
        }
        assert_eq!(list.len(), 3);
        assert!(nodes.iter().all(|m| !m.is_full()));
        assert_eq!(list.peek(), Some(NonNull::from(&mut nodes[0])));
    }

    #[test]
    fn test_remove_middle_and_ends() {
        let mut nodes = metas::<3>();
        let mut list = SlabList::new();
        unsafe {
            for m in nodes.iter_mut() {
                list.insert_prev(m);
            }
        }

        list.remove(&mut nodes[1]);
        assert!(nodes[1].is_full());
        assert!(!list.contains(&nodes[1]));
        assert_eq!(list.len(), 2);

        let first = list.pop().unwrap();
        assert_eq!(first, NonNull::from(&mut nodes[0]));
        let last = list.pop().unwrap();
        assert_eq!(last, NonNull::from(&mut nodes[2]));
        assert!(list.pop().is_none());
        assert!(list.is_empty());
    }

    #[test]
    fn test_reinsert_after_remove() {
        let mut nodes = metas::<2>();
        let mut list = SlabList::new();
        unsafe {
            list.insert_prev(&mut nodes[0]);
            list.insert_prev(&mut nodes[1]);
        }
        list.remove(&mut nodes[0]);
        unsafe { list.insert_prev(&mut nodes[0]) };
        assert_eq!(list.peek(), Some(NonNull::from(&mut nodes[1])));
        assert!(list.contains(&nodes[0]));
    }
}
