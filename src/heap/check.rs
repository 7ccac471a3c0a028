//! Structural invariant verification and diagnostic dumping.
//!
//! `verify_arena` is the checked-build companion to the compiled-out
//! debug asserts on the hot path: always available, callable from tests
//! and fuzz drivers, and returning a typed violation instead of
//! panicking. It walks the physical arena once (tiling, header/footer
//! agreement, alignment, no adjacent free blocks) and then every bin
//! (link integrity, sort order, size-class placement), cross-checking the
//! two walks with bitsets so a free block missing from the bins, or
//! linked twice, is caught exactly.

use fixedbitset::FixedBitSet;

use super::bins::BinTable;
use super::block::{
    ALIGNMENT, BlockRef, FOOTER_SIZE, HEADER_SIZE, MIN_BLOCK_SIZE, NUM_BINS, class_of, read_u64,
};

#[derive(Debug, thiserror::Error)]
pub enum InvariantError {
    #[error("block at {offset} has invalid size {size}")]
    BadSize { offset: usize, size: usize },

    #[error("block at {offset} overruns the arena high mark {high}")]
    Overrun { offset: usize, high: usize },

    #[error("block at {offset}: header size {header} != footer size {footer}")]
    FooterMismatch { offset: usize, header: usize, footer: usize },

    #[error("adjacent free blocks at {first} and {second}")]
    AdjacentFree { first: usize, second: usize },

    #[error("bin {bin} link at block {offset}: {reason}")]
    BadLink { bin: usize, offset: usize, reason: &'static str },

    #[error("bin {bin} is not sorted ascending at block {offset}")]
    Unsorted { bin: usize, offset: usize },

    #[error("free block at {offset} is not linked into any bin")]
    Unlinked { offset: usize },
}

pub(crate) fn verify_arena(
    bytes: &[u8],
    low: usize,
    high: usize,
    bins: &BinTable,
) -> Result<(), InvariantError> {
    let slots = (high.saturating_sub(low)) / ALIGNMENT + 1;
    let mut free_blocks = FixedBitSet::with_capacity(slots);

    // Phase 1: physical walk. Blocks are chained by their size fields, so
    // reaching exactly `high` without a bounds error is the tiling
    // invariant itself.
    let mut cursor = low;
    let mut prev_offset = low;
    let mut prev_free = false;
    while cursor < high {
        if cursor + HEADER_SIZE > high {
            return Err(InvariantError::Overrun { offset: cursor, high });
        }
        let raw = read_u64(bytes, cursor);
        let size = (raw & !1) as usize;
        if size < MIN_BLOCK_SIZE || size % ALIGNMENT != 0 {
            return Err(InvariantError::BadSize { offset: cursor, size });
        }
        if cursor + size > high {
            return Err(InvariantError::Overrun { offset: cursor, high });
        }
        let footer = read_u64(bytes, cursor + size - FOOTER_SIZE) as usize;
        if footer != size {
            return Err(InvariantError::FooterMismatch { offset: cursor, header: size, footer });
        }
        let free = raw & 1 == 0;
        if free {
            if prev_free {
                return Err(InvariantError::AdjacentFree { first: prev_offset, second: cursor });
            }
            free_blocks.insert((cursor - low) / ALIGNMENT);
        }
        prev_free = free;
        prev_offset = cursor;
        cursor += size;
    }

    // Phase 2: bin walk.
    let mut linked = FixedBitSet::with_capacity(slots);
    for bin in 0..NUM_BINS {
        let mut expected_prev: Option<BlockRef> = None;
        let mut prev_size = 0usize;
        let mut cursor = bins.head(bin);
        while let Some(c) = cursor {
            let offset = c.0;
            if offset < low || offset + MIN_BLOCK_SIZE > high || (offset - low) % ALIGNMENT != 0 {
                return Err(InvariantError::BadLink {
                    bin,
                    offset,
                    reason: "offset outside the arena",
                });
            }
            let slot = (offset - low) / ALIGNMENT;
            if !free_blocks.contains(slot) {
                return Err(InvariantError::BadLink {
                    bin,
                    offset,
                    reason: "not a free block boundary",
                });
            }
            if linked.contains(slot) {
                return Err(InvariantError::BadLink {
                    bin,
                    offset,
                    reason: "linked more than once",
                });
            }
            linked.insert(slot);

            let size = c.size(bytes);
            if BinTable::bin_for(class_of(size)) != bin {
                return Err(InvariantError::BadLink {
                    bin,
                    offset,
                    reason: "filed under the wrong size class",
                });
            }
            if size < prev_size {
                return Err(InvariantError::Unsorted { bin, offset });
            }
            let links = c.links(bytes);
            if links.prev != expected_prev {
                return Err(InvariantError::BadLink {
                    bin,
                    offset,
                    reason: "prev link does not match list order",
                });
            }
            prev_size = size;
            expected_prev = Some(c);
            cursor = links.next;
        }
    }

    // A block is in exactly one state: allocated, or free and linked into
    // exactly one bin.
    for slot in free_blocks.ones() {
        if !linked.contains(slot) {
            return Err(InvariantError::Unlinked { offset: low + slot * ALIGNMENT });
        }
    }

    Ok(())
}

/// One line per block, in arena order. Diagnostics only.
pub(crate) fn dump_arena(bytes: &[u8], low: usize, high: usize) -> String {
    use std::fmt::Write as _;

    let mut body = String::new();
    let mut blocks = 0usize;
    let mut cursor = low;
    while cursor < high && cursor + HEADER_SIZE <= high {
        let raw = read_u64(bytes, cursor);
        let size = (raw & !1) as usize;
        let state = if raw & 1 != 0 { "allocated" } else { "free" };
        let _ = writeln!(body, "{cursor:>12}  {size:>10}  {state}");
        blocks += 1;
        if size < MIN_BLOCK_SIZE || size % ALIGNMENT != 0 || cursor + size > high {
            let _ = writeln!(body, "corrupt size {size}, walk aborted");
            break;
        }
        cursor += size;
    }

    let mut out = String::new();
    let _ = writeln!(out, "arena [{low}, {high})  {blocks} blocks");
    out.push_str(&body);
    out
}
