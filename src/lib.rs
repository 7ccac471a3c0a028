//! Boundary-tag dynamic memory allocator.
//!
//! A single [`Allocator`] owns a contiguous growable arena tiled edge to
//! edge with blocks. Each block carries an 8-byte packed header and a
//! mirrored size footer, so both physical neighbors are reachable in O(1)
//! and adjacent free blocks are merged eagerly on release. Free blocks are
//! indexed by power-of-two size class in segregated bins kept sorted by
//! size. Addresses are byte offsets into the arena buffer, never raw
//! pointers: all block navigation is bounds-checked offset arithmetic and
//! the crate contains no `unsafe`.
//!
//! ```
//! use tagalloc::{Allocator, AllocatorConfig};
//!
//! let mut heap = Allocator::new(AllocatorConfig::default());
//! let p = heap.allocate(64)?;
//! heap.payload_mut(p).fill(0xAB);
//! let p = heap.resize(p, 256)?;
//! assert!(heap.payload(p)[..64].iter().all(|&b| b == 0xAB));
//! heap.release(p);
//! # Ok::<(), tagalloc::HeapError>(())
//! ```

#[cfg(not(target_pointer_width = "64"))]
compile_error!("tagalloc supports only 64-bit targets.");

pub mod heap;

// allocator
pub use heap::engine::{Allocator, AllocatorConfig};

// arena growth
pub use heap::grow::{BufferHeap, HeapOps};

// addresses/layout
pub use heap::block::{ALIGNMENT, MIN_BLOCK_SIZE, Payload};

// errors/diagnostics
pub use heap::check::InvariantError;
pub use heap::grow::HeapError;
pub use heap::stats::HeapStats;
