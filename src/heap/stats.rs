//! Operation counters for diagnostic display. Plain integers: the
//! allocator is single-threaded by contract, so there is nothing to
//! synchronize. Do NOT use these values for allocation decisions.

/// Snapshot of allocator activity since construction.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct HeapStats {
    /// Completed `allocate` calls.
    pub allocs: u64,
    /// Completed `release` calls.
    pub releases: u64,
    /// Completed `resize` calls.
    pub resizes: u64,
    /// Resizes satisfied without moving the payload.
    pub in_place_resizes: u64,
    /// Resizes that fell back to allocate-copy-release.
    pub moved_resizes: u64,
    /// Oversized free blocks split into a right-sized block plus a tail.
    pub splits: u64,
    /// Adjacent free blocks merged (release, resize, or split cleanup).
    pub coalesces: u64,
    /// Calls into the growth primitive that succeeded.
    pub grow_calls: u64,
    /// Bytes obtained from the growth primitive.
    pub grown_bytes: u64,
    /// Grow calls that extended a free block at the arena top instead of
    /// appending a fresh block.
    pub top_extensions: u64,
}
