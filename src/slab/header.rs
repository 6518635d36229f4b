//! The slab header (spec §4.3, "Slab header"): 64 bytes at the base of
//! every slab page, holding the class list link and two 64-bit occupancy
//! bitmaps good for up to 128 cells.

use crate::hint::PAGE_SIZE;
use crate::list::ListLink;
use core::ptr::NonNull;

const HEADER_SIZE: usize = 64;
const MAX_CELLS: usize = 128;

/// Occupancy and identity of one slab page.
///
/// `link` must stay the first field: a slab's address, its header's
/// address, and its `ListLink`'s address all coincide, the same
/// `container_of` trick [`crate::page::region::FreeRegion`] relies on.
#[repr(C)]
pub struct SlabHeader {
    pub link: ListLink,
    bitmap_lo: u64,
    bitmap_hi: u64,
    cell_size: u32,
    cell_count: u32,
    class_index: u8,
    _reserved: [u8; HEADER_SIZE - 41],
}

const _: () = assert!(core::mem::size_of::<SlabHeader>() == HEADER_SIZE);

impl SlabHeader {
    /// Writes a fresh, self-linked, all-clear header at `addr` (the base of
    /// a page just acquired from the page allocator) for class `class_index`
    /// with the given `cell_size` (spec I6: `count * cell_size + 64 <= P`).
    ///
    /// # Safety
    /// `addr` must be a valid, page-aligned, page-sized region not
    /// currently read through any other live reference.
    pub unsafe fn new_in_place(addr: NonNull<u8>, cell_size: u32, class_index: u8) -> NonNull<SlabHeader> {
        let cell_count = ((PAGE_SIZE as u32) - HEADER_SIZE as u32) / cell_size;
        debug_assert!(cell_count as usize <= MAX_CELLS);
        let ptr = addr.as_ptr().cast::<SlabHeader>();
        ptr.write(SlabHeader {
            link: ListLink::new(),
            bitmap_lo: 0,
            bitmap_hi: 0,
            cell_size,
            cell_count,
            class_index,
            _reserved: [0; HEADER_SIZE - 41],
        });
        let nn = NonNull::new_unchecked(ptr);
        ListLink::init(nn.cast());
        nn
    }

    pub fn link_ptr(this: NonNull<SlabHeader>) -> NonNull<ListLink> {
        this.cast()
    }

    /// # Safety
    /// `link` must point to the `link` field of a live `SlabHeader`.
    pub unsafe fn from_link(link: NonNull<ListLink>) -> NonNull<SlabHeader> {
        link.cast()
    }

    pub fn cell_size(&self) -> u32 {
        self.cell_size
    }

    pub fn cell_count(&self) -> usize {
        self.cell_count as usize
    }

    pub fn class_index(&self) -> u8 {
        self.class_index
    }

    fn word_and_base(&self, idx: usize) -> (u64, usize) {
        if idx < 64 {
            (self.bitmap_lo, 0)
        } else {
            (self.bitmap_hi, 64)
        }
    }

    pub fn is_set(&self, idx: usize) -> bool {
        let (word, base) = self.word_and_base(idx);
        (word >> (idx - base)) & 1 != 0
    }

    pub fn set_bit(&mut self, idx: usize) {
        if idx < 64 {
            self.bitmap_lo |= 1 << idx;
        } else {
            self.bitmap_hi |= 1 << (idx - 64);
        }
    }

    pub fn clear_bit(&mut self, idx: usize) {
        if idx < 64 {
            self.bitmap_lo &= !(1 << idx);
        } else {
            self.bitmap_hi &= !(1 << (idx - 64));
        }
    }

    /// Bounded first-fit search: trailing-zero-count of the inverted word,
    /// restricted to `0..cell_count` so a partially-populated high word
    /// never reports a bit past the slab's real cell count (spec: "Bounds-
    /// check against the slab's `count`... return sentinel on overflow").
    pub fn first_clear_bit(&self) -> Option<usize> {
        let count = self.cell_count as usize;
        for (word_idx, word) in [self.bitmap_lo, self.bitmap_hi].into_iter().enumerate() {
            let base = word_idx * 64;
            if base >= count {
                break;
            }
            let bits_in_word = (count - base).min(64);
            let mask = if bits_in_word == 64 { u64::MAX } else { (1u64 << bits_in_word) - 1 };
            let free = !word & mask;
            if free != 0 {
                return Some(base + free.trailing_zeros() as usize);
            }
        }
        None
    }

    fn used_count(&self) -> usize {
        let count = self.cell_count as usize;
        let mut used = 0;
        for (word_idx, word) in [self.bitmap_lo, self.bitmap_hi].into_iter().enumerate() {
            let base = word_idx * 64;
            if base >= count {
                break;
            }
            let bits_in_word = (count - base).min(64);
            let mask = if bits_in_word == 64 { u64::MAX } else { (1u64 << bits_in_word) - 1 };
            used += (word & mask).count_ones() as usize;
        }
        used
    }

    pub fn is_full(&self) -> bool {
        self.used_count() == self.cell_count as usize
    }

    pub fn is_empty(&self) -> bool {
        self.used_count() == 0
    }

    pub fn used_cells(&self) -> usize {
        self.used_count()
    }

    /// Address of cell `idx` within the slab whose header lives at `base`.
    pub fn cell_ptr(base: NonNull<u8>, cell_size: u32, idx: usize) -> NonNull<u8> {
        unsafe { NonNull::new_unchecked(base.as_ptr().add(HEADER_SIZE + idx * cell_size as usize)) }
    }

    /// Inverse of [`Self::cell_ptr`] (spec: `(ptr - slab_base - 64) / cell_size`).
    pub fn cell_index_of(base: NonNull<u8>, cell_size: u32, ptr: NonNull<u8>) -> usize {
        let offset = ptr.as_ptr() as usize - base.as_ptr() as usize - HEADER_SIZE;
        offset / cell_size as usize
    }
}
