//! Allocation engine: allocate / release / resize over boundary-tag blocks
//! and the segregated free-bin table.
//!
//! The engine is the only component callers interact with. It owns the
//! growth primitive and the bin table as one explicit context value, so
//! independent allocator instances can coexist and tests get full
//! isolation. All operations run to completion synchronously on the
//! calling thread; there is no interior locking.

use super::bins::BinTable;
use super::block::{
    ALIGNMENT, BlockHeader, BlockRef, BlockState, FOOTER_SIZE, HEADER_SIZE, MIN_BLOCK_SIZE,
    Payload, block_ending_at, class_of,
};
use super::check;
use super::check::InvariantError;
use super::grow::{BufferHeap, DEFAULT_HEAP_LIMIT, HeapError, HeapOps};
use super::stats::HeapStats;

/// Configuration for [`Allocator`]. All fields have sensible defaults.
#[derive(Clone, Debug)]
pub struct AllocatorConfig {
    /// Commit limit handed to the default [`BufferHeap`]. Default: 256 MB.
    pub heap_limit: usize,

    /// Run the full invariant verifier after every public operation and
    /// panic on the first violation. Meant for tests and fuzzing; the
    /// default hot path carries only compiled-out debug asserts.
    pub verify_each_op: bool,
}

impl Default for AllocatorConfig {
    fn default() -> Self {
        Self {
            heap_limit: DEFAULT_HEAP_LIMIT,
            verify_each_op: false,
        }
    }
}

/// Boundary-tag heap allocator over a growable arena.
pub struct Allocator<H: HeapOps = BufferHeap> {
    heap: H,
    bins: BinTable,
    config: AllocatorConfig,
    stats: HeapStats,
}

impl Allocator<BufferHeap> {
    #[must_use]
    pub fn new(config: AllocatorConfig) -> Self {
        let heap = BufferHeap::new(config.heap_limit);
        Self::with_heap(heap, config)
    }
}

impl Default for Allocator<BufferHeap> {
    fn default() -> Self {
        Self::new(AllocatorConfig::default())
    }
}

impl<H: HeapOps> Allocator<H> {
    /// Build an allocator over a caller-supplied growth primitive. The
    /// arena starts empty and all bins start empty.
    pub fn with_heap(heap: H, config: AllocatorConfig) -> Self {
        Self {
            heap,
            bins: BinTable::new(),
            config,
            stats: HeapStats::default(),
        }
    }

    /// Allocate a block whose payload holds at least `size` bytes.
    ///
    /// A zero-size request yields a minimum-size block rather than an
    /// error, matching the block arithmetic for any tiny request.
    ///
    /// # Errors
    ///
    /// Propagates growth-primitive failure. A failed call leaves every
    /// bin and block untouched.
    pub fn allocate(&mut self, size: usize) -> Result<Payload, HeapError> {
        let aligned = aligned_block_size(size)?;
        let block = self.claim(aligned)?;
        block.set_state(self.heap.bytes_mut(), BlockState::Allocated);
        self.stats.allocs += 1;
        self.after_op();
        Ok(block.payload())
    }

    /// Return a previously allocated payload to the allocator.
    ///
    /// `p` must be live (allocated and not yet released); anything else is
    /// a contract violation, caught by a debug assert in checked builds.
    pub fn release(&mut self, p: Payload) {
        let block = BlockRef::from_payload(p);
        debug_assert!(
            !block.is_free(self.heap.bytes()),
            "release of a payload that is not allocated (offset {})",
            p.0
        );
        block.set_state(self.heap.bytes_mut(), BlockState::Free);
        let merged = self.coalesce_neighbors(block);
        self.bins.insert(self.heap.bytes_mut(), merged);
        self.stats.releases += 1;
        self.after_op();
    }

    /// Resize a live allocation to hold at least `new_size` payload bytes.
    ///
    /// In-place paths are tried first (shrink, then absorbing free
    /// successors); only when both fall short is the payload relocated,
    /// copying `min(old, new)` bytes. The returned payload equals `p`
    /// whenever the resize happened in place.
    ///
    /// # Errors
    ///
    /// Propagates growth-primitive failure from the relocation fallback.
    /// The original allocation stays live and intact on error.
    pub fn resize(&mut self, p: Payload, new_size: usize) -> Result<Payload, HeapError> {
        let aligned = aligned_block_size(new_size)?;
        let block = BlockRef::from_payload(p);
        debug_assert!(
            !block.is_free(self.heap.bytes()),
            "resize of a payload that is not allocated (offset {})",
            p.0
        );

        if block.size(self.heap.bytes()) < aligned {
            self.absorb_successors(block, aligned);
        }
        if block.size(self.heap.bytes()) >= aligned {
            self.split(block, aligned);
            self.stats.resizes += 1;
            self.stats.in_place_resizes += 1;
            self.after_op();
            return Ok(p);
        }

        // Relocate: fresh block, copy, release the old one.
        let old_usable = block.size(self.heap.bytes()) - HEADER_SIZE - FOOTER_SIZE;
        let new_p = self.allocate(new_size)?;
        let copy_len = old_usable.min(new_size);
        self.heap.bytes_mut().copy_within(p.0..p.0 + copy_len, new_p.0);
        self.release(p);
        self.stats.resizes += 1;
        self.stats.moved_resizes += 1;
        self.after_op();
        Ok(new_p)
    }

    /// Usable bytes of a live allocation. At least the requested size;
    /// possibly more due to alignment and the no-sliver split policy.
    #[must_use]
    pub fn payload(&self, p: Payload) -> &[u8] {
        let block = BlockRef::from_payload(p);
        let bytes = self.heap.bytes();
        debug_assert!(!block.is_free(bytes), "payload access on a freed block");
        let len = block.size(bytes) - HEADER_SIZE - FOOTER_SIZE;
        &bytes[p.0..p.0 + len]
    }

    /// Mutable view of a live allocation's usable bytes.
    pub fn payload_mut(&mut self, p: Payload) -> &mut [u8] {
        let block = BlockRef::from_payload(p);
        let bytes = self.heap.bytes_mut();
        debug_assert!(!block.is_free(bytes), "payload access on a freed block");
        let len = block.size(bytes) - HEADER_SIZE - FOOTER_SIZE;
        &mut bytes[p.0..p.0 + len]
    }

    /// Full structural check: tiling, header/footer agreement, alignment,
    /// no adjacent free blocks, bin-link integrity and sort order.
    /// Always compiled; run automatically per-operation only when
    /// [`AllocatorConfig::verify_each_op`] is set.
    pub fn verify(&self) -> Result<(), InvariantError> {
        check::verify_arena(
            self.heap.bytes(),
            self.heap.low_mark(),
            self.heap.high_mark(),
            &self.bins,
        )
    }

    /// Arena-order block listing for diagnostics.
    #[must_use]
    pub fn debug_dump(&self) -> String {
        check::dump_arena(self.heap.bytes(), self.heap.low_mark(), self.heap.high_mark())
    }

    #[must_use]
    pub fn stats(&self) -> HeapStats {
        self.stats
    }

    #[must_use]
    pub fn low_mark(&self) -> usize {
        self.heap.low_mark()
    }

    #[must_use]
    pub fn high_mark(&self) -> usize {
        self.heap.high_mark()
    }

    /// Find a free block of at least `aligned` bytes: best fit within the
    /// exact size class, then the head of the next occupied larger class,
    /// then the arena top. The result is right-sized by `split`.
    fn claim(&mut self, aligned: usize) -> Result<BlockRef, HeapError> {
        let bin = BinTable::bin_for(class_of(aligned));

        if let Some(found) = self.bins.pop_best_fit(self.heap.bytes_mut(), bin, aligned) {
            return Ok(self.split(found, aligned));
        }

        if let Some(larger) = self.bins.next_nonempty(bin) {
            if let Some(found) = self.bins.pop_any(self.heap.bytes_mut(), larger) {
                return Ok(self.split(found, aligned));
            }
        }

        let carved = self.carve_from_top(aligned)?;
        Ok(self.split(carved, aligned))
    }

    /// Satisfy a request from the arena top. A free block at the very top
    /// is absorbed (extended by the shortfall) instead of appending fresh
    /// bytes behind it, so no small free remainder is stranded at the end.
    /// `grow` runs before any bin or block mutation, so a growth failure
    /// leaves the allocator state untouched.
    fn carve_from_top(&mut self, aligned: usize) -> Result<BlockRef, HeapError> {
        if let Some(last) = self.last_block() {
            if last.is_free(self.heap.bytes()) {
                let have = last.size(self.heap.bytes());
                if have >= aligned {
                    self.bins.remove(self.heap.bytes_mut(), last);
                    return Ok(last);
                }
                let shortfall = aligned - have;
                self.heap.grow(shortfall)?;
                self.stats.grow_calls += 1;
                self.stats.grown_bytes += shortfall as u64;
                self.stats.top_extensions += 1;
                self.bins.remove(self.heap.bytes_mut(), last);
                last.set_size(self.heap.bytes_mut(), aligned);
                return Ok(last);
            }
        }

        let base = self.heap.grow(aligned)?;
        self.stats.grow_calls += 1;
        self.stats.grown_bytes += aligned as u64;
        let block = BlockRef(base);
        block.set_header(
            self.heap.bytes_mut(),
            BlockHeader { size: aligned, state: BlockState::Free },
        );
        Ok(block)
    }

    /// Shrink `block` to `aligned` bytes, carving the leftover into a new
    /// free block, unless the leftover would be an unusable sliver. The
    /// block keeps its state; the tail is binned (merging forward first if
    /// its successor is free, which can happen when shrinking a live
    /// allocation).
    fn split(&mut self, block: BlockRef, aligned: usize) -> BlockRef {
        let total = block.size(self.heap.bytes());
        debug_assert!(total >= aligned);
        let leftover = total - aligned;
        if leftover <= MIN_BLOCK_SIZE {
            return block;
        }

        let state = block.header(self.heap.bytes()).state;
        block.set_header(
            self.heap.bytes_mut(),
            BlockHeader { size: aligned, state },
        );
        let tail = block.next_physical(self.heap.bytes());
        tail.set_header(
            self.heap.bytes_mut(),
            BlockHeader { size: leftover, state: BlockState::Free },
        );
        self.stats.splits += 1;
        self.bin_free_forward(tail);
        block
    }

    /// Merge a free block with its free physical successor (never the
    /// predecessor: callers split tails off blocks that may themselves be
    /// free) and file it into its size-class bin.
    fn bin_free_forward(&mut self, block: BlockRef) {
        let high = self.heap.high_mark();
        let next = block.next_physical(self.heap.bytes());
        if next.0 < high && next.is_free(self.heap.bytes()) {
            let add = next.size(self.heap.bytes());
            self.bins.remove(self.heap.bytes_mut(), next);
            let size = block.size(self.heap.bytes());
            block.set_size(self.heap.bytes_mut(), size + add);
            self.stats.coalesces += 1;
        }
        self.bins.insert(self.heap.bytes_mut(), block);
    }

    /// Merge a freed block with both free physical neighbors. Forward
    /// first: merging backward changes the block's own address, which
    /// would invalidate the successor lookup.
    fn coalesce_neighbors(&mut self, block: BlockRef) -> BlockRef {
        let high = self.heap.high_mark();
        let low = self.heap.low_mark();

        let next = block.next_physical(self.heap.bytes());
        if next.0 < high && next.is_free(self.heap.bytes()) {
            let add = next.size(self.heap.bytes());
            self.bins.remove(self.heap.bytes_mut(), next);
            let size = block.size(self.heap.bytes());
            block.set_size(self.heap.bytes_mut(), size + add);
            self.stats.coalesces += 1;
        }

        let mut block = block;
        if block.0 > low {
            let prev = block.prev_physical(self.heap.bytes());
            if prev.is_free(self.heap.bytes()) {
                let add = block.size(self.heap.bytes());
                self.bins.remove(self.heap.bytes_mut(), prev);
                let size = prev.size(self.heap.bytes());
                prev.set_size(self.heap.bytes_mut(), size + add);
                self.stats.coalesces += 1;
                block = prev;
            }
        }
        block
    }

    /// Absorb free physical successors into `block` until it reaches
    /// `aligned` bytes or the successor is allocated/absent.
    fn absorb_successors(&mut self, block: BlockRef, aligned: usize) {
        let high = self.heap.high_mark();
        loop {
            let bytes = self.heap.bytes();
            if block.size(bytes) >= aligned {
                return;
            }
            let next = block.next_physical(bytes);
            if next.0 >= high || !next.is_free(bytes) {
                return;
            }
            let add = next.size(bytes);
            self.bins.remove(self.heap.bytes_mut(), next);
            let size = block.size(self.heap.bytes());
            block.set_size(self.heap.bytes_mut(), size + add);
            self.stats.coalesces += 1;
        }
    }

    /// The physically last block in the arena, via its footer.
    fn last_block(&self) -> Option<BlockRef> {
        let high = self.heap.high_mark();
        if high == self.heap.low_mark() {
            return None;
        }
        Some(block_ending_at(self.heap.bytes(), high))
    }

    fn after_op(&mut self) {
        if self.config.verify_each_op {
            if let Err(violation) = self.verify() {
                panic!("heap invariant violated: {violation}");
            }
        }
    }
}

/// Total block size for a payload request: header + footer added, rounded
/// up to the alignment, floored at the minimum block size.
fn aligned_block_size(requested: usize) -> Result<usize, HeapError> {
    let padded = requested
        .checked_add(HEADER_SIZE + FOOTER_SIZE)
        .and_then(|n| n.checked_add(ALIGNMENT - 1))
        .ok_or(HeapError::Oversized { requested })?;
    Ok((padded & !(ALIGNMENT - 1)).max(MIN_BLOCK_SIZE))
}
