//! Heap growth primitive.
//!
//! The allocator consumes a brk/sbrk-style interface: the arena is a single
//! contiguous region that only ever grows, and a failed `grow` is reported
//! to the caller rather than aborting. [`BufferHeap`] is the default
//! in-memory implementation; tests substitute stubs (e.g. an always-failing
//! heap) through the same trait.

use std::fmt;

/// Default commit limit for [`BufferHeap`]: 256 MB.
pub(crate) const DEFAULT_HEAP_LIMIT: usize = 256 * 1024 * 1024;

#[derive(Debug, thiserror::Error)]
pub enum HeapError {
    /// The growth primitive cannot extend the arena any further.
    #[error("heap exhausted: {requested} more bytes requested, {committed} of {limit} committed")]
    Exhausted {
        requested: usize,
        committed: usize,
        limit: usize,
    },

    /// The request is too large for block arithmetic to represent at all.
    #[error("request of {requested} bytes overflows block arithmetic")]
    Oversized { requested: usize },
}

/// Brk/sbrk-style arena growth interface.
///
/// Addresses are byte offsets into the buffer exposed by `bytes()`; the
/// arena proper is `[low_mark(), high_mark())` and every block the
/// allocator creates lies inside it.
pub trait HeapOps {
    /// Extend the arena by exactly `n` bytes. Returns the base offset of
    /// the new region. On failure nothing about the arena changes.
    fn grow(&mut self, n: usize) -> Result<usize, HeapError>;

    /// Lowest arena offset.
    fn low_mark(&self) -> usize;

    /// One past the highest arena offset.
    fn high_mark(&self) -> usize;

    fn bytes(&self) -> &[u8];

    fn bytes_mut(&mut self) -> &mut [u8];
}

/// Growable in-memory heap with a hard commit limit.
pub struct BufferHeap {
    buf: Vec<u8>,
    limit: usize,
}

impl BufferHeap {
    #[must_use]
    pub fn new(limit: usize) -> Self {
        Self { buf: Vec::new(), limit }
    }
}

impl Default for BufferHeap {
    fn default() -> Self {
        Self::new(DEFAULT_HEAP_LIMIT)
    }
}

impl fmt::Debug for BufferHeap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BufferHeap")
            .field("committed", &self.buf.len())
            .field("limit", &self.limit)
            .finish()
    }
}

impl HeapOps for BufferHeap {
    fn grow(&mut self, n: usize) -> Result<usize, HeapError> {
        let base = self.buf.len();
        let new_len = base.checked_add(n).ok_or(HeapError::Oversized { requested: n })?;
        if new_len > self.limit {
            return Err(HeapError::Exhausted {
                requested: n,
                committed: base,
                limit: self.limit,
            });
        }
        self.buf.resize(new_len, 0);
        Ok(base)
    }

    fn low_mark(&self) -> usize {
        0
    }

    fn high_mark(&self) -> usize {
        self.buf.len()
    }

    fn bytes(&self) -> &[u8] {
        &self.buf
    }

    fn bytes_mut(&mut self) -> &mut [u8] {
        &mut self.buf
    }
}
