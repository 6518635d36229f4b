//! Lifetime hints and the page-size constants shared by both tiers.

/// The fixed page size this allocator carves the buffer into. Matches
/// spec §6's constant; not configurable, since the metadata encoding and
/// slab header layout both assume it.
pub const PAGE_SIZE: usize = 4096;

/// `log2(PAGE_SIZE)`, exposed for callers that want to compute page
/// indices from byte offsets without a division.
pub const PAGE_SHIFT: u32 = 12;

/// Smallest legal buffer size for [`crate::page::PageAllocator::reinit`].
pub const MIN_BUFFER_SIZE: usize = 128 * 1024;

/// Largest legal buffer size for [`crate::page::PageAllocator::reinit`].
pub const MAX_BUFFER_SIZE: usize = 4 * 1024 * 1024 * 1024;

const _: () = assert!(PAGE_SIZE == 1 << PAGE_SHIFT);

/// A lifetime hint biasing the page allocator toward the low end of the
/// address space (`Transient`, short-lived churn) or the high end
/// (`Persistent`, long-lived data and slab pages). See spec §4.2's
/// "Rationale" for why the two ends are segregated this way.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Hint {
    /// Cluster at low addresses; expected to be freed soon.
    Transient = 1,
    /// Cluster at high addresses; expected to live a long time.
    Persistent = 2,
}
