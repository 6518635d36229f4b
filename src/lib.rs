//! # `tessera` - a two-tier fixed-buffer allocator
//!
//! Carves one caller-supplied buffer into page-granular allocations, and
//! layers a bitmap-indexed slab allocator on top for sub-page requests.
//! No heap, no OS calls, no background threads: every byte this crate
//! hands out comes from the buffer it was given at [`PageAllocator::reinit`].
//!
//! ## Key Features
//!
//! - **Two tiers**: a page allocator (4 KiB granularity, dual-end search)
//!   backing a slab allocator (fixed cell sizes, bitmap occupancy).
//! - **In-band metadata**: run lengths and slab headers live inside the
//!   managed buffer itself, not in a separate heap structure.
//! - **Deferred coalescing**: frees are O(1); merging back into the
//!   free-region list only happens lazily, on allocation failure.
//! - **Single-threaded by design**: no locking, no atomics in the hot
//!   path. Wrap in a `Mutex` at the call site if you need one.
//!
//! ## Architecture
//!
//! [`PageAllocator`] owns a buffer and a sorted, intrusively-linked list of
//! free page runs (see [`list`] for the link primitive every record
//! embeds). [`SlabAllocator`] borrows a `PageAllocator` and leases whole
//! pages from it, subdividing each into fixed-size cells tracked by a
//! 128-bit occupancy bitmap in the page's own header.
//!
//! ## Example
//!
//! ```rust
//! use tessera::{Hint, PageAllocator, SlabAllocator};
//!
//! // `reinit` requires a page-aligned buffer; `repr(align(4096))` gets one
//! // without reaching for a platform-specific allocation API.
//! #[repr(align(4096))]
//! struct Arena([u8; 128 * 1024]);
//!
//! let mut arena = Arena([0; 128 * 1024]);
//! let mut pages = PageAllocator::reinit(&mut arena.0, true).unwrap();
//!
//! // Direct page-granular allocation.
//! let run = pages.malloc(3 * 4096, Hint::Transient).unwrap();
//! pages.free(run);
//!
//! // Sub-page allocation through the slab layer.
//! let mut slabs = SlabAllocator::new(&mut pages);
//! let cell = slabs.malloc(24).unwrap();
//! slabs.free(cell);
//! ```

#![warn(missing_docs, clippy::all)]
#![allow(clippy::module_name_repetitions)]

pub mod error;
pub mod hint;
pub mod list;
pub mod page;
pub mod slab;

#[cfg(feature = "static-buffer")]
pub mod config;

pub use error::{Diagnostics, FatalError};
pub use hint::{Hint, MAX_BUFFER_SIZE, MIN_BUFFER_SIZE, PAGE_SIZE};
pub use page::{PageAllocator, PageStats};
pub use slab::{SlabAllocator, SlabClassStats};

// Compile-time layout assertions: the in-band records this crate writes
// into caller memory must match the sizes their offset arithmetic assumes.
const _: () = {
    use core::mem::size_of;

    assert!(size_of::<list::ListLink>() == 16);
};
