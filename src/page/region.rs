//! The free-region record (spec §3, "Free region record" / "Pending-free
//! list") and the in-place relocation it needs when a forward allocation
//! carves pages off the low end of a region (spec §4.2, invariant I3).

use crate::list::ListLink;
use core::mem::size_of;
use core::ptr::NonNull;

/// A maximal contiguous run of free pages, or (when linked on the pending
/// list instead) a just-freed run not yet reinserted.
///
/// Laid out with `link` first so the record's address, the `ListLink`'s
/// address, and `NonNull<FreeRegion>` all coincide — required by I3, since
/// the record lives at `buffer_start + start_page * PAGE_SIZE`.
#[repr(C)]
pub struct FreeRegion {
    pub link: ListLink,
    pub start_page: u32,
    pub pages: u32,
}

impl FreeRegion {
    /// Writes a new, self-linked `FreeRegion` at `addr`, overwriting
    /// whatever was there (spec: "The record is stored at the first byte
    /// of its own first page" / "written in-place at ptr").
    ///
    /// # Safety
    /// `addr` must be valid for a `FreeRegion`-sized, -aligned write, and
    /// must not currently be read through any other live reference.
    pub unsafe fn write_in_place(addr: NonNull<u8>, start_page: u32, pages: u32) -> NonNull<FreeRegion> {
        let ptr = addr.as_ptr().cast::<FreeRegion>();
        ptr.write(FreeRegion { link: ListLink::new(), start_page, pages });
        let nn = NonNull::new_unchecked(ptr);
        ListLink::init(nn.cast());
        nn
    }

    /// The `ListLink` embedded in this record, as a pointer (link is the
    /// first field, so this is the same address as the record itself).
    pub fn link_ptr(this: NonNull<FreeRegion>) -> NonNull<ListLink> {
        this.cast()
    }

    /// Recovers the enclosing `FreeRegion` from one of its list links.
    ///
    /// # Safety
    /// `link` must point to the `link` field of a live `FreeRegion`.
    pub unsafe fn from_link(link: NonNull<ListLink>) -> NonNull<FreeRegion> {
        link.cast()
    }

    /// Moves this record's bytes to `new_addr` (its new first page, after
    /// carving pages off the low end) and repairs its neighbors' list links
    /// to point at the new address. Returns the relocated record.
    ///
    /// # Safety
    /// `old` must be a currently-linked `FreeRegion`; `new_addr` must be a
    /// valid, non-overlapping destination for a `FreeRegion`-sized write
    /// (in practice: the new `start_page`'s base address).
    pub unsafe fn relocate(old: NonNull<FreeRegion>, new_addr: NonNull<u8>) -> NonNull<FreeRegion> {
        let old_link: NonNull<ListLink> = old.cast();
        let new_ptr = new_addr.as_ptr().cast::<FreeRegion>();
        core::ptr::copy_nonoverlapping(old.as_ptr().cast::<u8>(), new_addr.as_ptr(), size_of::<FreeRegion>());
        let new_nn = NonNull::new_unchecked(new_ptr);
        let new_link: NonNull<ListLink> = new_nn.cast();

        let prev = (*new_link.as_ptr()).prev.unwrap();
        let next = (*new_link.as_ptr()).next.unwrap();

        if prev == old_link {
            (*new_link.as_ptr()).prev = Some(new_link);
        } else {
            (*prev.as_ptr()).next = Some(new_link);
        }
        if next == old_link {
            (*new_link.as_ptr()).next = Some(new_link);
        } else {
            (*next.as_ptr()).prev = Some(new_link);
        }

        new_nn
    }
}
