//! Block bookkeeping for the buddy allocator.
//!
//! The table is the only record of how the managed region is partitioned. It
//! never touches the region's memory, so releasing a block leaves its bytes
//! intact.
//!
//! Blocks are kept sorted by offset. A split inserts the upper half directly
//! after the block being halved, which means a block's buddy, when it exists
//! at the same size, is always one of its two table neighbors.

use alloc::vec::Vec;
use core::{fmt, slice};

#[cfg(feature = "log")]
use log::{debug, trace};

/// A contiguous sub-range of the managed region.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Block {
    offset: usize,
    size: usize,
    used: bool,
}

impl Block {
    #[inline]
    fn free(offset: usize, size: usize) -> Block {
        Block {
            offset,
            size,
            used: false,
        }
    }

    /// Returns the offset of the block from the start of the region.
    #[inline]
    pub fn offset(&self) -> usize {
        self.offset
    }

    /// Returns the size of the block in bytes.
    #[inline]
    pub fn size(&self) -> usize {
        self.size
    }

    /// Returns `true` if the block is currently allocated.
    #[inline]
    pub fn is_used(&self) -> bool {
        self.used
    }

    /// Returns `true` if the block is available for allocation.
    #[inline]
    pub fn is_free(&self) -> bool {
        !self.used
    }

    /// Returns the offset one past the last byte of the block.
    #[inline]
    pub fn end(&self) -> usize {
        self.offset + self.size
    }

    /// Returns `true` if `self` and `upper` are the two halves of a single
    /// split: equal size, adjacent, and `self` aligned to twice their size.
    fn is_lower_buddy_of(&self, upper: &Block) -> bool {
        self.size == upper.size
            && self.end() == upper.offset
            && self
                .size
                .checked_mul(2)
                .map_or(false, |parent| self.offset % parent == 0)
    }
}

/// An invariant violation found by [`BlockTable::check_invariants`].
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum TableError {
    /// The table contains no blocks.
    Empty,
    /// No block starts at `offset`, although the previous block ends there.
    Gap {
        /// The first uncovered offset.
        offset: usize,
    },
    /// The block at `offset` starts inside the previous block.
    Overlap {
        /// The offset of the overlapping block.
        offset: usize,
    },
    /// The block at `offset` has a size that is not a power of two.
    NotPowerOfTwo {
        /// The offset of the offending block.
        offset: usize,
        /// Its size.
        size: usize,
    },
    /// The block at `offset` is larger than the region.
    TooLarge {
        /// The offset of the offending block.
        offset: usize,
        /// Its size.
        size: usize,
    },
    /// The free block at `offset` and its free buddy were not merged.
    UncoalescedBuddies {
        /// The offset of the lower buddy.
        offset: usize,
    },
}

impl fmt::Display for TableError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            TableError::Empty => f.write_str("block table is empty"),
            TableError::Gap { offset } => write!(f, "no block covers offset {offset}"),
            TableError::Overlap { offset } => {
                write!(f, "block at offset {offset} overlaps its predecessor")
            }
            TableError::NotPowerOfTwo { offset, size } => {
                write!(f, "block at offset {offset} has non-power-of-two size {size}")
            }
            TableError::TooLarge { offset, size } => {
                write!(f, "block at offset {offset} has size {size}, larger than the region")
            }
            TableError::UncoalescedBuddies { offset } => {
                write!(f, "free buddies at offset {offset} were not merged")
            }
        }
    }
}

/// The set of all blocks of one allocator, ordered by offset.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BlockTable {
    blocks: Vec<Block>,
    total_size: usize,
}

impl BlockTable {
    /// Creates a table holding a single free block spanning `total_size`.
    pub(crate) fn new(total_size: usize) -> BlockTable {
        let mut blocks = Vec::new();
        blocks.push(Block::free(0, total_size));

        BlockTable { blocks, total_size }
    }

    /// Returns the size of the partitioned region.
    #[inline]
    pub fn total_size(&self) -> usize {
        self.total_size
    }

    /// Returns the number of blocks in the table.
    #[inline]
    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    /// Returns `true` if the table holds no blocks.
    ///
    /// A table owned by an allocator is never empty.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    /// Iterates over every block in offset order.
    #[inline]
    pub fn iter(&self) -> slice::Iter<'_, Block> {
        self.blocks.iter()
    }

    /// Iterates over the allocated blocks in offset order.
    pub fn used_blocks(&self) -> impl Iterator<Item = &Block> + '_ {
        self.blocks.iter().filter(|b| b.used)
    }

    #[inline]
    pub(crate) fn get(&self, index: usize) -> Option<&Block> {
        self.blocks.get(index)
    }

    /// Finds the index of the block starting at `offset`.
    pub(crate) fn position_of(&self, offset: usize) -> Option<usize> {
        self.blocks
            .binary_search_by_key(&offset, |b| b.offset)
            .ok()
    }

    /// Finds the first free block among those of the largest free size.
    pub(crate) fn largest_free(&self) -> Option<usize> {
        let mut found: Option<usize> = None;

        for (i, block) in self.blocks.iter().enumerate() {
            if block.used {
                continue;
            }

            match found {
                Some(f) if self.blocks[f].size >= block.size => (),
                _ => found = Some(i),
            }
        }

        found
    }

    /// Halves the free block at `index` until halving again would leave it
    /// smaller than `min_size`, then marks it used.
    ///
    /// Returns the final block. The block keeps its index because every upper
    /// half is inserted after it.
    pub(crate) fn split_and_take(&mut self, index: usize, min_size: usize) -> Block {
        assert!(min_size > 0, "cannot split down to a zero-sized block");
        assert!(self.blocks[index].is_free(), "splitting a used block");

        loop {
            let block = self.blocks[index];
            let half = block.size / 2;
            if half < min_size {
                break;
            }

            trace!("split block {:#x}+{} into two of {}", block.offset, block.size, half);

            self.blocks[index].size = half;
            self.blocks
                .insert(index + 1, Block::free(block.offset + half, half));
        }

        self.blocks[index].used = true;
        self.blocks[index]
    }

    /// Marks the used block at `index` free and merges it with free buddies
    /// until neither neighbor qualifies.
    ///
    /// Returns the index of the resulting block.
    pub(crate) fn release(&mut self, mut index: usize) -> usize {
        assert!(self.blocks[index].used, "releasing a free block");
        self.blocks[index].used = false;

        loop {
            index = if index > 0 && self.mergeable(index - 1, index) {
                index - 1
            } else if index + 1 < self.blocks.len() && self.mergeable(index, index + 1) {
                index
            } else {
                break;
            };

            let lower = &mut self.blocks[index];
            debug!("merge buddies at {:#x}, size {} -> {}", lower.offset, lower.size, lower.size * 2);
            lower.size *= 2;
            self.blocks.remove(index + 1);
        }

        index
    }

    fn mergeable(&self, lower: usize, upper: usize) -> bool {
        let (lo, hi) = (&self.blocks[lower], &self.blocks[upper]);
        lo.is_free() && hi.is_free() && lo.is_lower_buddy_of(hi)
    }

    /// Verifies the partition, power-of-two, and coalescing invariants.
    ///
    /// Returns the first violation found, scanning in offset order.
    pub fn check_invariants(&self) -> Result<(), TableError> {
        if self.blocks.is_empty() {
            return Err(TableError::Empty);
        }

        let mut expected = 0;
        let mut prev: Option<&Block> = None;

        for block in &self.blocks {
            let Block { offset, size, .. } = *block;

            if offset > expected {
                return Err(TableError::Gap { offset: expected });
            }
            if offset < expected {
                return Err(TableError::Overlap { offset });
            }
            if !size.is_power_of_two() {
                return Err(TableError::NotPowerOfTwo { offset, size });
            }
            if size > self.total_size {
                return Err(TableError::TooLarge { offset, size });
            }

            if let Some(p) = prev {
                if p.is_free() && block.is_free() && p.is_lower_buddy_of(block) {
                    return Err(TableError::UncoalescedBuddies { offset: p.offset });
                }
            }

            expected = block.end();
            prev = Some(block);
        }

        if expected != self.total_size {
            return Err(TableError::Gap { offset: expected });
        }

        Ok(())
    }
}

impl<'a> IntoIterator for &'a BlockTable {
    type Item = &'a Block;
    type IntoIter = slice::Iter<'a, Block>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}
