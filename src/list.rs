//! Intrusive circular doubly-linked list.
//!
//! The node type (`ListLink`) is meant to be embedded directly inside the
//! record it links — a [`crate::page::region::FreeRegion`] or a
//! [`crate::slab::header::SlabHeader`] — so that linking and unlinking never
//! allocate and the list can live inside memory it is itself describing.
//! Link/unlink/splice are O(1); nothing here walks the list except the
//! explicitly-named iteration helpers.

use core::ptr::NonNull;

/// One node of a circular doubly-linked list.
///
/// An un-linked (freshly [`ListLink::new`]ed) node is self-linked: both
/// pointers refer to the node itself. This makes an empty list indistinguishable
/// from a single-element list whose element is the list head, which is the
/// usual trick for avoiding a null case in intrusive lists.
#[repr(C)]
pub struct ListLink {
    pub(crate) prev: Option<NonNull<ListLink>>,
    pub(crate) next: Option<NonNull<ListLink>>,
}

impl ListLink {
    /// Creates a self-linked (empty) node. Must be pinned in place before
    /// any of the other operations are called on it, since every operation
    /// below works through raw addresses.
    pub const fn new() -> Self {
        Self { prev: None, next: None }
    }

    /// Initializes `self` to be self-linked at its current address.
    ///
    /// # Safety
    /// `self` must not already be linked into a list other records still
    /// reference, or those records' links are left dangling.
    pub unsafe fn init(self_ptr: NonNull<ListLink>) {
        let ptr = self_ptr;
        (*self_ptr.as_ptr()).prev = Some(ptr);
        (*self_ptr.as_ptr()).next = Some(ptr);
    }

    /// Whether this node is self-linked, i.e. not linked to any other node.
    ///
    /// # Safety
    /// `self_ptr` must point to an initialized `ListLink`.
    pub unsafe fn is_alone(self_ptr: NonNull<ListLink>) -> bool {
        (*self_ptr.as_ptr()).next == Some(self_ptr)
    }

    /// Links `node` immediately before `anchor` (i.e. `anchor.prev = node`).
    ///
    /// # Safety
    /// Both pointers must point to initialized, currently-self-linked (or
    /// otherwise-not-aliased) `ListLink`s that are pinned at their addresses.
    pub unsafe fn link_before(anchor: NonNull<ListLink>, node: NonNull<ListLink>) {
        let prev = (*anchor.as_ptr()).prev.unwrap_or(anchor);
        (*node.as_ptr()).prev = Some(prev);
        (*node.as_ptr()).next = Some(anchor);
        (*prev.as_ptr()).next = Some(node);
        (*anchor.as_ptr()).prev = Some(node);
    }

    /// Links `node` immediately after `anchor` (i.e. `anchor.next = node`).
    ///
    /// # Safety
    /// Same requirements as [`Self::link_before`].
    pub unsafe fn link_after(anchor: NonNull<ListLink>, node: NonNull<ListLink>) {
        let next = (*anchor.as_ptr()).next.unwrap_or(anchor);
        Self::link_before(next, node);
    }

    /// Removes `node` from whatever list it is part of, restoring its
    /// neighbors' links. `node` itself is left with dangling pointers; call
    /// [`Self::unlink_and_reinit`] if the node will be reused afterward.
    ///
    /// # Safety
    /// `node` must point to an initialized, linked `ListLink`.
    pub unsafe fn unlink(node: NonNull<ListLink>) {
        let prev = (*node.as_ptr()).prev;
        let next = (*node.as_ptr()).next;
        if let Some(p) = prev {
            (*p.as_ptr()).next = next;
        }
        if let Some(n) = next {
            (*n.as_ptr()).prev = prev;
        }
    }

    /// Removes `node` from its list and restores it to a self-linked state.
    /// A no-op (besides the self-link, which is already in place) if `node`
    /// was already self-linked.
    ///
    /// # Safety
    /// `node` must point to an initialized `ListLink`.
    pub unsafe fn unlink_and_reinit(node: NonNull<ListLink>) {
        Self::unlink(node);
        Self::init(node);
    }

    /// Splices the (possibly empty) list rooted at `other` in after `anchor`,
    /// leaving `other` self-linked.
    ///
    /// # Safety
    /// Both pointers must point to initialized `ListLink`s; neither list may
    /// contain the other's anchor.
    pub unsafe fn splice(anchor: NonNull<ListLink>, other: NonNull<ListLink>) {
        if Self::is_alone(other) {
            return;
        }
        let other_first = (*other.as_ptr()).next.unwrap();
        let other_last = (*other.as_ptr()).prev.unwrap();
        let anchor_next = (*anchor.as_ptr()).next.unwrap_or(anchor);

        (*anchor.as_ptr()).next = Some(other_first);
        (*other_first.as_ptr()).prev = Some(anchor);
        (*other_last.as_ptr()).next = Some(anchor_next);
        (*anchor_next.as_ptr()).prev = Some(other_last);

        Self::init(other);
    }

    /// Cuts the segment running from `at` through `anchor`'s current last
    /// node (its predecessor, i.e. everything up to the point the ring
    /// wraps back around to `anchor`) out of `anchor`'s ring and closes it
    /// into its own separate ring rooted at `at`. `anchor`'s ring is left
    /// closed over the remaining nodes, ending just before `at`.
    ///
    /// The inverse of [`Self::splice`]: where `splice` grafts a whole
    /// second ring in after a node, `split` lifts a tail segment back out
    /// into a ring of its own. A no-op if `at` is `anchor` itself (nothing
    /// precedes `anchor` that isn't also part of the segment being cut) or
    /// if `anchor` is not currently linked to anything.
    ///
    /// # Safety
    /// Both pointers must point to initialized `ListLink`s on the same
    /// ring, with `at` reachable from `anchor` by following `next`.
    pub unsafe fn split(anchor: NonNull<ListLink>, at: NonNull<ListLink>) {
        if at == anchor || Self::is_alone(anchor) {
            return;
        }
        let at_prev = (*at.as_ptr()).prev.unwrap();
        let anchor_prev = (*anchor.as_ptr()).prev.unwrap();

        (*anchor.as_ptr()).prev = Some(at_prev);
        (*at_prev.as_ptr()).next = Some(anchor);

        (*at.as_ptr()).prev = Some(anchor_prev);
        (*anchor_prev.as_ptr()).next = Some(at);
    }

    /// Swaps the list positions of two nodes that are not otherwise linked
    /// to one another.
    ///
    /// # Safety
    /// Both pointers must point to initialized `ListLink`s belonging to
    /// (possibly different) lists, and neither may be the other's neighbor.
    pub unsafe fn swap(a: NonNull<ListLink>, b: NonNull<ListLink>) {
        let a_next = (*a.as_ptr()).next.unwrap();
        Self::unlink(a);
        Self::link_before(b, a);
        Self::unlink(b);
        Self::link_before(a_next, b);
    }

    /// Recovers the address of the record that embeds a `ListLink` at
    /// `field_offset` bytes into the record, given a pointer to that link.
    ///
    /// # Safety
    /// `link` must truly be the `ListLink` embedded at `field_offset` within
    /// a live record of the caller-asserted type.
    pub unsafe fn entry(link: NonNull<ListLink>, field_offset: usize) -> NonNull<u8> {
        let addr = link.as_ptr() as usize - field_offset;
        NonNull::new_unchecked(addr as *mut u8)
    }

    /// Iterates the list starting at `head`'s successor, yielding every
    /// linked node exactly once (including `head` only if `head` is linked
    /// in a loop containing itself, i.e. the anchor is itself a data node).
    /// Not safe to use if the body unlinks the node it was just handed —
    /// use [`Self::iter_safe`] for that.
    ///
    /// # Safety
    /// `head` must point to an initialized `ListLink`.
    pub unsafe fn iter(head: NonNull<ListLink>) -> ListIter {
        ListIter { head, cur: (*head.as_ptr()).next.unwrap_or(head), done: false }
    }

    /// Like [`Self::iter`], but safe against the loop body unlinking the
    /// node just yielded: the successor is captured before the node is
    /// handed out.
    ///
    /// # Safety
    /// `head` must point to an initialized `ListLink`.
    pub unsafe fn iter_safe(head: NonNull<ListLink>) -> SafeListIter {
        SafeListIter { head, cur: (*head.as_ptr()).next.unwrap_or(head), done: false }
    }
}

impl PartialEq for ListLink {
    fn eq(&self, other: &Self) -> bool {
        core::ptr::eq(self, other)
    }
}

/// Iterator over a [`ListLink`] ring. See [`ListLink::iter`].
pub struct ListIter {
    head: NonNull<ListLink>,
    cur: NonNull<ListLink>,
    done: bool,
}

impl Iterator for ListIter {
    type Item = NonNull<ListLink>;

    fn next(&mut self) -> Option<NonNull<ListLink>> {
        if self.done || self.cur == self.head {
            self.done = true;
            return None;
        }
        let node = self.cur;
        self.cur = unsafe { (*node.as_ptr()).next.unwrap_or(self.head) };
        Some(node)
    }
}

/// Unlink-tolerant iterator over a [`ListLink`] ring. See
/// [`ListLink::iter_safe`].
pub struct SafeListIter {
    head: NonNull<ListLink>,
    cur: NonNull<ListLink>,
    done: bool,
}

impl Iterator for SafeListIter {
    type Item = NonNull<ListLink>;

    fn next(&mut self) -> Option<NonNull<ListLink>> {
        if self.done || self.cur == self.head {
            self.done = true;
            return None;
        }
        let node = self.cur;
        // Capture the successor before handing the node to the caller, who
        // may unlink it (and thus corrupt `node.next`) before we advance.
        self.cur = unsafe { (*node.as_ptr()).next.unwrap_or(self.head) };
        Some(node)
    }
}
