//! Segregated free-bin table.
//!
//! One bin per power-of-two size class. Each bin is a doubly linked list
//! of free blocks, threaded through the blocks' own payload bytes and kept
//! sorted ascending by size, so the first fit found inside a class is also
//! the best fit within that class. The table stores only the list heads;
//! a node whose `prev` link is nil is the head and the table points at it.

use super::block::{BlockRef, FreeLinks, MAX_POWER, MIN_POWER, NUM_BINS, class_of};

pub(crate) struct BinTable {
    heads: [Option<BlockRef>; NUM_BINS],
}

impl BinTable {
    pub fn new() -> Self {
        Self { heads: [None; NUM_BINS] }
    }

    /// Drop all bin membership. Blocks are not touched; the caller is
    /// resetting the arena underneath them.
    pub fn clear(&mut self) {
        self.heads = [None; NUM_BINS];
    }

    /// Bin index for a size-class power.
    pub fn bin_for(power: u32) -> usize {
        debug_assert!((MIN_POWER..=MAX_POWER).contains(&power));
        (power - MIN_POWER) as usize
    }

    pub fn head(&self, bin: usize) -> Option<BlockRef> {
        self.heads[bin]
    }

    /// Insert `block` into the bin for its size class, keeping the list
    /// sorted ascending by size. O(k) in bin occupancy.
    pub fn insert(&mut self, bytes: &mut [u8], block: BlockRef) {
        debug_assert!(block.is_free(bytes));
        let size = block.size(bytes);
        let bin = Self::bin_for(class_of(size));

        let mut prev: Option<BlockRef> = None;
        let mut cursor = self.heads[bin];
        while let Some(c) = cursor {
            if c.size(bytes) >= size {
                break;
            }
            prev = Some(c);
            cursor = c.links(bytes).next;
        }

        block.set_links(bytes, FreeLinks { prev, next: cursor });
        match prev {
            Some(p) => p.set_next_link(bytes, Some(block)),
            None => self.heads[bin] = Some(block),
        }
        if let Some(n) = cursor {
            n.set_prev_link(bytes, Some(block));
        }
    }

    /// Unlink `block` from the bin it currently lives in. The bin is
    /// derived from the block's current size, so this must run before any
    /// size change.
    pub fn remove(&mut self, bytes: &mut [u8], block: BlockRef) {
        debug_assert!(block.is_free(bytes));
        let bin = Self::bin_for(class_of(block.size(bytes)));
        self.unlink(bytes, bin, block);
    }

    /// Pop the smallest block in `bin` whose size is at least `min_size`.
    /// Returns `None` when nothing in this class is large enough.
    pub fn pop_best_fit(
        &mut self,
        bytes: &mut [u8],
        bin: usize,
        min_size: usize,
    ) -> Option<BlockRef> {
        let mut cursor = self.heads[bin];
        while let Some(c) = cursor {
            if c.size(bytes) >= min_size {
                self.unlink(bytes, bin, c);
                return Some(c);
            }
            cursor = c.links(bytes).next;
        }
        None
    }

    /// Pop the head of `bin` unconditionally. Used when taking from a
    /// strictly larger class, where any member already suffices.
    pub fn pop_any(&mut self, bytes: &mut [u8], bin: usize) -> Option<BlockRef> {
        let head = self.heads[bin]?;
        self.unlink(bytes, bin, head);
        Some(head)
    }

    /// First occupied bin strictly after `bin`, if any.
    pub fn next_nonempty(&self, bin: usize) -> Option<usize> {
        (bin + 1..NUM_BINS).find(|&i| self.heads[i].is_some())
    }

    /// Point a bin at an arbitrary head, bypassing sorted insertion. For
    /// constructing deliberately broken tables in verifier tests.
    #[cfg(test)]
    pub fn set_head(&mut self, bin: usize, head: Option<BlockRef>) {
        self.heads[bin] = head;
    }

    fn unlink(&mut self, bytes: &mut [u8], bin: usize, block: BlockRef) {
        let FreeLinks { prev, next } = block.links(bytes);
        match prev {
            Some(p) => p.set_next_link(bytes, next),
            None => {
                debug_assert_eq!(self.heads[bin], Some(block));
                self.heads[bin] = next;
            }
        }
        if let Some(n) = next {
            n.set_prev_link(bytes, prev);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::heap::block::{BlockHeader, BlockState};

    // Lay out consecutive free blocks of the given sizes in a fresh buffer.
    fn carve(sizes: &[usize]) -> (Vec<u8>, Vec<BlockRef>) {
        let total: usize = sizes.iter().sum();
        let mut bytes = vec![0u8; total];
        let mut refs = Vec::new();
        let mut off = 0;
        for &size in sizes {
            let b = BlockRef(off);
            b.set_header(&mut bytes, BlockHeader { size, state: BlockState::Free });
            refs.push(b);
            off += size;
        }
        (bytes, refs)
    }

    fn collect(bins: &BinTable, bytes: &[u8], bin: usize) -> Vec<usize> {
        let mut out = Vec::new();
        let mut cursor = bins.head(bin);
        while let Some(c) = cursor {
            out.push(c.size(bytes));
            cursor = c.links(bytes).next;
        }
        out
    }

    #[test]
    fn test_insert_keeps_ascending_order() {
        let (mut bytes, refs) = carve(&[56, 32, 48, 40]);
        let mut bins = BinTable::new();
        for &b in &refs {
            bins.insert(&mut bytes, b);
        }
        // All four sizes share class 2^5.
        let bin = BinTable::bin_for(5);
        assert_eq!(collect(&bins, &bytes, bin), vec![32, 40, 48, 56]);
    }

    #[test]
    fn test_insert_separates_classes() {
        let (mut bytes, refs) = carve(&[32, 64, 128]);
        let mut bins = BinTable::new();
        for &b in &refs {
            bins.insert(&mut bytes, b);
        }
        assert_eq!(collect(&bins, &bytes, BinTable::bin_for(5)), vec![32]);
        assert_eq!(collect(&bins, &bytes, BinTable::bin_for(6)), vec![64]);
        assert_eq!(collect(&bins, &bytes, BinTable::bin_for(7)), vec![128]);
    }

    #[test]
    fn test_pop_best_fit_picks_smallest_sufficient() {
        let (mut bytes, refs) = carve(&[32, 40, 48, 56]);
        let mut bins = BinTable::new();
        for &b in &refs {
            bins.insert(&mut bytes, b);
        }
        let bin = BinTable::bin_for(5);

        let got = bins.pop_best_fit(&mut bytes, bin, 44).unwrap();
        assert_eq!(got.size(&bytes), 48);
        assert_eq!(collect(&bins, &bytes, bin), vec![32, 40, 56]);

        // Nothing in the class is large enough.
        assert!(bins.pop_best_fit(&mut bytes, bin, 64).is_none());
        assert_eq!(collect(&bins, &bytes, bin), vec![32, 40, 56]);
    }

    #[test]
    fn test_pop_any_takes_head() {
        let (mut bytes, refs) = carve(&[48, 32]);
        let mut bins = BinTable::new();
        for &b in &refs {
            bins.insert(&mut bytes, b);
        }
        let bin = BinTable::bin_for(5);

        let got = bins.pop_any(&mut bytes, bin).unwrap();
        assert_eq!(got.size(&bytes), 32);
        assert_eq!(collect(&bins, &bytes, bin), vec![48]);

        assert!(bins.pop_any(&mut bytes, BinTable::bin_for(6)).is_none());
    }

    #[test]
    fn test_next_nonempty() {
        let (mut bytes, refs) = carve(&[32, 256]);
        let mut bins = BinTable::new();
        for &b in &refs {
            bins.insert(&mut bytes, b);
        }
        assert_eq!(bins.next_nonempty(BinTable::bin_for(5)), Some(BinTable::bin_for(8)));
        assert_eq!(bins.next_nonempty(BinTable::bin_for(8)), None);
        assert_eq!(bins.next_nonempty(0), Some(BinTable::bin_for(8)));
    }

    #[test]
    fn test_remove_head_middle_tail() {
        let (mut bytes, refs) = carve(&[32, 40, 48]);
        let mut bins = BinTable::new();
        for &b in &refs {
            bins.insert(&mut bytes, b);
        }
        let bin = BinTable::bin_for(5);

        bins.remove(&mut bytes, refs[1]); // middle
        assert_eq!(collect(&bins, &bytes, bin), vec![32, 48]);

        bins.remove(&mut bytes, refs[0]); // head
        assert_eq!(collect(&bins, &bytes, bin), vec![48]);

        bins.remove(&mut bytes, refs[2]); // last
        assert_eq!(collect(&bins, &bytes, bin), Vec::<usize>::new());
        assert!(bins.head(bin).is_none());
    }
}
