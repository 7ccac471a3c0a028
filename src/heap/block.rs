//! Boundary-tag block representation.
//!
//! Every block in the arena is `[header (8B)] [payload] [footer (8B)]`.
//! The header packs the total block size and an allocated bit into one
//! little-endian `u64`; the footer mirrors the size alone so the physical
//! predecessor can be found without a separate index. All addresses are
//! byte offsets into the heap buffer, never raw pointers, so block
//! navigation is bounds-checked offset arithmetic.
//!
//! Bit layout of the packed header word:
//! ```text
//!   [63..1]  size       total block size in bytes, multiple of ALIGNMENT
//!   [0]      allocated  1 if the payload is caller-owned
//! ```

/// Payload alignment. Every payload offset handed out is a multiple of this.
pub const ALIGNMENT: usize = 8;

pub(crate) const HEADER_SIZE: usize = 8;
pub(crate) const FOOTER_SIZE: usize = 8;

/// Smallest legal block: header + footer + room for the two free links.
pub const MIN_BLOCK_SIZE: usize = HEADER_SIZE + FOOTER_SIZE + 2 * LINK_SIZE;

/// Smallest size class; `1 << MIN_POWER` covers `MIN_BLOCK_SIZE`.
pub(crate) const MIN_POWER: u32 = 5;
/// Largest size class. Blocks of `2^46` bytes and above all land here.
pub(crate) const MAX_POWER: u32 = 46;

pub(crate) const NUM_BINS: usize = (MAX_POWER - MIN_POWER + 1) as usize;

const LINK_SIZE: usize = 8;
const ALLOCATED_BIT: u64 = 1;

/// Nil encoding for an absent free-list link.
const NIL: u64 = u64::MAX;

/// Whether a block's payload is caller-owned or threaded into a free bin.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum BlockState {
    Allocated,
    Free,
}

/// Decoded block header. Stored physically as one packed `u64` (mirrored
/// by a size-only footer); only the accessors below touch the raw bytes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct BlockHeader {
    pub size: usize,
    pub state: BlockState,
}

/// Offset of a payload inside the arena. This is the address the allocator
/// hands to callers; it sits `HEADER_SIZE` bytes past the block header.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Payload(pub(crate) usize);

impl Payload {
    /// Byte offset of this payload from the start of the heap buffer.
    #[must_use]
    pub fn offset(self) -> usize {
        self.0
    }
}

/// Offset of a block header inside the arena.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub(crate) struct BlockRef(pub(crate) usize);

/// Free-list links overlaid on the first 16 payload bytes of a free block.
///
/// This overlay is valid only while the block is free; once allocated the
/// same bytes are caller payload. `links`/`set_links` (and the single-side
/// patch helpers) are the only places that reinterpret payload bytes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct FreeLinks {
    pub prev: Option<BlockRef>,
    pub next: Option<BlockRef>,
}

impl BlockRef {
    #[inline]
    pub fn payload(self) -> Payload {
        Payload(self.0 + HEADER_SIZE)
    }

    #[inline]
    pub fn from_payload(p: Payload) -> Self {
        debug_assert!(p.0 >= HEADER_SIZE);
        Self(p.0 - HEADER_SIZE)
    }

    pub fn header(self, bytes: &[u8]) -> BlockHeader {
        let raw = read_u64(bytes, self.0);
        let size = (raw & !ALLOCATED_BIT) as usize;
        debug_assert!(size >= MIN_BLOCK_SIZE, "block at {} has size {size}", self.0);
        let state = if raw & ALLOCATED_BIT != 0 {
            BlockState::Allocated
        } else {
            BlockState::Free
        };
        BlockHeader { size, state }
    }

    #[inline]
    pub fn size(self, bytes: &[u8]) -> usize {
        self.header(bytes).size
    }

    #[inline]
    pub fn is_free(self, bytes: &[u8]) -> bool {
        self.header(bytes).state == BlockState::Free
    }

    /// Write header and mirrored footer together. The two are never allowed
    /// to disagree; a lone header write is not expressible.
    pub fn set_header(self, bytes: &mut [u8], hdr: BlockHeader) {
        debug_assert!(hdr.size >= MIN_BLOCK_SIZE);
        debug_assert_eq!(hdr.size % ALIGNMENT, 0);
        let bit = match hdr.state {
            BlockState::Allocated => ALLOCATED_BIT,
            BlockState::Free => 0,
        };
        write_u64(bytes, self.0, hdr.size as u64 | bit);
        write_u64(bytes, self.0 + hdr.size - FOOTER_SIZE, hdr.size as u64);
    }

    /// Resize in place, keeping the current state.
    pub fn set_size(self, bytes: &mut [u8], size: usize) {
        let state = self.header(bytes).state;
        self.set_header(bytes, BlockHeader { size, state });
    }

    /// Flip the allocated bit, keeping the current size.
    pub fn set_state(self, bytes: &mut [u8], state: BlockState) {
        let size = self.header(bytes).size;
        self.set_header(bytes, BlockHeader { size, state });
    }

    /// Physical successor: header offset plus own size. May point at the
    /// arena high mark when this is the last block.
    #[inline]
    pub fn next_physical(self, bytes: &[u8]) -> BlockRef {
        BlockRef(self.0 + self.size(bytes))
    }

    /// Physical predecessor, located through the footer that ends directly
    /// before this header. Precondition: this is not the first block.
    pub fn prev_physical(self, bytes: &[u8]) -> BlockRef {
        debug_assert!(self.0 >= FOOTER_SIZE);
        let prev_size = read_u64(bytes, self.0 - FOOTER_SIZE) as usize;
        debug_assert!(prev_size >= MIN_BLOCK_SIZE && prev_size <= self.0);
        BlockRef(self.0 - prev_size)
    }

    pub fn links(self, bytes: &[u8]) -> FreeLinks {
        let base = self.0 + HEADER_SIZE;
        FreeLinks {
            prev: decode_link(read_u64(bytes, base)),
            next: decode_link(read_u64(bytes, base + LINK_SIZE)),
        }
    }

    pub fn set_links(self, bytes: &mut [u8], links: FreeLinks) {
        let base = self.0 + HEADER_SIZE;
        write_u64(bytes, base, encode_link(links.prev));
        write_u64(bytes, base + LINK_SIZE, encode_link(links.next));
    }

    pub fn set_prev_link(self, bytes: &mut [u8], prev: Option<BlockRef>) {
        write_u64(bytes, self.0 + HEADER_SIZE, encode_link(prev));
    }

    pub fn set_next_link(self, bytes: &mut [u8], next: Option<BlockRef>) {
        write_u64(bytes, self.0 + HEADER_SIZE + LINK_SIZE, encode_link(next));
    }
}

/// Block that ends exactly at `end`, recovered through its footer.
pub(crate) fn block_ending_at(bytes: &[u8], end: usize) -> BlockRef {
    debug_assert!(end >= MIN_BLOCK_SIZE);
    let size = read_u64(bytes, end - FOOTER_SIZE) as usize;
    debug_assert!(size >= MIN_BLOCK_SIZE && size <= end);
    BlockRef(end - size)
}

/// Round `n` up to the next multiple of [`ALIGNMENT`].
#[inline]
pub(crate) fn align_up(n: usize) -> usize {
    (n + (ALIGNMENT - 1)) & !(ALIGNMENT - 1)
}

/// `floor(log2(size))`.
#[inline]
pub(crate) fn round_down_to_power(size: usize) -> u32 {
    debug_assert!(size > 0);
    size.ilog2()
}

/// Size class for a block of `size` bytes, clamped into the bin range.
#[inline]
pub(crate) fn class_of(size: usize) -> u32 {
    round_down_to_power(size).clamp(MIN_POWER, MAX_POWER)
}

pub(crate) fn read_u64(bytes: &[u8], off: usize) -> u64 {
    let mut raw = [0u8; 8];
    raw.copy_from_slice(&bytes[off..off + 8]);
    u64::from_le_bytes(raw)
}

pub(crate) fn write_u64(bytes: &mut [u8], off: usize, value: u64) {
    bytes[off..off + 8].copy_from_slice(&value.to_le_bytes());
}

fn decode_link(raw: u64) -> Option<BlockRef> {
    if raw == NIL { None } else { Some(BlockRef(raw as usize)) }
}

fn encode_link(link: Option<BlockRef>) -> u64 {
    match link {
        Some(r) => r.0 as u64,
        None => NIL,
    }
}
