//! # Block Allocator
//!
//! Best-fit free-list allocator over an abstract linear range `[0, max_size)`.
//!
//! ## Layout
//!
//! ```text
//!   free_by_offset: BTreeMap<offset, size>     adjacency (prev/next in address space)
//!   free_by_size:   BTreeSet<(size, offset)>   best-fit lower-bound search
//! ```
//!
//! Every free block has exactly one entry in each index. Both indices are
//! only touched through `insert_block`/`remove_block`, which keep them in
//! lockstep.
//!
//! Adjacent free blocks are always merged, so the free list never contains
//! two blocks that touch.

use std::collections::{BTreeMap, BTreeSet};

use crate::error::{AllocError, AllocResult};

/// A range handed out by [`BlockAllocator::allocate`].
///
/// `offset`/`size` describe the whole reserved range, including any
/// alignment padding, and are what must be passed back to `free`.
/// `aligned_offset` is where usable space starts.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Allocation {
    /// Start of the reserved range.
    pub offset: u64,
    /// Length of the reserved range (request rounded up, plus padding).
    pub size: u64,
    /// First offset satisfying the requested alignment.
    pub aligned_offset: u64,
}

impl Allocation {
    /// Number of padding units in front of `aligned_offset`.
    #[inline]
    #[must_use]
    pub const fn padding(&self) -> u64 {
        self.aligned_offset - self.offset
    }

    /// One past the last reserved unit.
    #[inline]
    #[must_use]
    pub const fn end(&self) -> u64 {
        self.offset + self.size
    }
}

/// A contiguous free range.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Block {
    /// Start of the free range.
    pub offset: u64,
    /// Length of the free range.
    pub size: u64,
}

/// Variable-size best-fit allocator with coalescing.
///
/// Sizes and offsets are unit-less: the caller decides whether a unit is a
/// byte, a descriptor slot or anything else.
///
/// # Thread Safety
///
/// Not internally synchronized. Owners wrap it in a mutex (see the
/// descriptor heap chunks).
///
/// # Example
///
/// ```rust,ignore
/// let mut allocator = BlockAllocator::new(1024);
///
/// let a = allocator.allocate(10, 1)?.expect("fits");
/// let b = allocator.allocate(5, 16)?.expect("fits");
///
/// allocator.free(a.offset, a.size)?;
/// allocator.free(b.offset, b.size)?;
/// assert!(allocator.is_empty());
/// ```
#[derive(Clone, Debug)]
pub struct BlockAllocator {
    /// Free blocks keyed by start offset.
    free_by_offset: BTreeMap<u64, u64>,
    /// Free blocks keyed by `(size, offset)`; doubles as a size multi-map.
    free_by_size: BTreeSet<(u64, u64)>,
    /// Total capacity.
    max_size: u64,
    /// Sum of all free block sizes.
    free_size: u64,
    /// Every free block offset is a multiple of this.
    current_alignment: u64,
}

impl BlockAllocator {
    /// Creates an allocator managing `[0, max_size)`, entirely free.
    #[must_use]
    pub fn new(max_size: u64) -> Self {
        let mut allocator = Self {
            free_by_offset: BTreeMap::new(),
            free_by_size: BTreeSet::new(),
            max_size,
            free_size: max_size,
            current_alignment: largest_power_of_two_at_most(max_size),
        };
        if max_size > 0 {
            allocator.insert_block(0, max_size);
        }
        allocator
    }

    /// Reserves `size` units aligned to `alignment`.
    ///
    /// `size` is rounded up to a multiple of `alignment`. The smallest free
    /// block that can hold the request is chosen. Returns `Ok(None)` when no
    /// single free block is large enough, even if the total free space would
    /// be; this allocator never compacts.
    ///
    /// # Errors
    ///
    /// - [`AllocError::ZeroSize`] if `size` is zero
    /// - [`AllocError::InvalidAlignment`] if `alignment` is not a power of two
    /// - [`AllocError::Overflow`] if rounding `size` overflows
    pub fn allocate(&mut self, size: u64, alignment: u64) -> AllocResult<Option<Allocation>> {
        if size == 0 {
            return Err(AllocError::ZeroSize);
        }
        if !alignment.is_power_of_two() {
            return Err(AllocError::InvalidAlignment { alignment });
        }

        let size = align_up(size, alignment).ok_or(AllocError::Overflow)?;
        if size > self.free_size {
            return Ok(None);
        }

        // Free offsets are multiples of `current_alignment`, so aligning any
        // block start costs at most this much padding.
        let alignment_reserve = alignment.saturating_sub(self.current_alignment);
        let Some(needed) = size.checked_add(alignment_reserve) else {
            return Ok(None);
        };

        let Some(&(block_size, block_offset)) = self.free_by_size.range((needed, 0)..).next() else {
            return Ok(None);
        };

        let aligned_offset = align_up(block_offset, alignment).ok_or(AllocError::Overflow)?;
        let adjusted_size = size + (aligned_offset - block_offset);
        debug_assert!(
            adjusted_size <= block_size,
            "alignment padding overran block {block_offset}+{block_size}"
        );

        self.remove_block(block_offset, block_size);
        if block_size > adjusted_size {
            self.insert_block(block_offset + adjusted_size, block_size - adjusted_size);
        }
        self.free_size -= adjusted_size;

        if size.is_power_of_two() && size < self.current_alignment {
            self.current_alignment = size;
        } else {
            self.current_alignment = self.current_alignment.min(alignment);
        }

        Ok(Some(Allocation {
            offset: block_offset,
            size: adjusted_size,
            aligned_offset,
        }))
    }

    /// Returns `[offset, offset + size)` to the free list, merging it with
    /// free neighbours.
    ///
    /// # Errors
    ///
    /// - [`AllocError::ZeroSize`] if `size` is zero
    /// - [`AllocError::OutOfRange`] if the range ends past `max_size`
    /// - [`AllocError::DoubleFree`] if the range overlaps free space
    /// - [`AllocError::Overflow`] if `offset + size` overflows
    pub fn free(&mut self, offset: u64, size: u64) -> AllocResult<()> {
        if size == 0 {
            return Err(AllocError::ZeroSize);
        }
        let end = offset.checked_add(size).ok_or(AllocError::Overflow)?;
        if end > self.max_size {
            return Err(AllocError::OutOfRange {
                offset,
                size,
                capacity: self.max_size,
            });
        }

        let prev = self
            .free_by_offset
            .range(..offset)
            .next_back()
            .map(|(&o, &s)| (o, s));
        let next = self
            .free_by_offset
            .range(offset..)
            .next()
            .map(|(&o, &s)| (o, s));

        let overlaps_prev = prev.is_some_and(|(o, s)| o + s > offset);
        let overlaps_next = next.is_some_and(|(o, _)| o < end);
        if overlaps_prev || overlaps_next {
            return Err(AllocError::DoubleFree { offset, size });
        }

        let mut new_offset = offset;
        let mut new_size = size;

        if let Some((prev_offset, prev_size)) = prev.filter(|&(o, s)| o + s == offset) {
            self.remove_block(prev_offset, prev_size);
            new_offset = prev_offset;
            new_size += prev_size;
        }
        if let Some((next_offset, next_size)) = next.filter(|&(o, _)| o == end) {
            self.remove_block(next_offset, next_size);
            new_size += next_size;
        }

        self.insert_block(new_offset, new_size);
        self.free_size += size;

        if self.is_empty() {
            debug_assert_eq!(self.num_free_blocks(), 1);
            self.current_alignment = largest_power_of_two_at_most(self.max_size);
        }

        Ok(())
    }

    /// Grows capacity by `extra_size` units appended at the top of the range.
    ///
    /// If the last free block ends at the old capacity, it absorbs the new
    /// space instead of a separate block being created.
    ///
    /// # Errors
    ///
    /// [`AllocError::Overflow`] if the new capacity overflows `u64`.
    pub fn extend(&mut self, extra_size: u64) -> AllocResult<()> {
        if extra_size == 0 {
            return Ok(());
        }
        let new_max_size = self
            .max_size
            .checked_add(extra_size)
            .ok_or(AllocError::Overflow)?;

        let last = self
            .free_by_offset
            .iter()
            .next_back()
            .map(|(&o, &s)| (o, s));

        match last {
            Some((last_offset, last_size)) if last_offset + last_size == self.max_size => {
                self.remove_block(last_offset, last_size);
                self.insert_block(last_offset, last_size + extra_size);
            }
            _ => {
                self.insert_block(self.max_size, extra_size);
                if self.max_size > 0 {
                    let old_end_alignment = 1u64 << self.max_size.trailing_zeros();
                    self.current_alignment = self.current_alignment.min(old_end_alignment);
                }
            }
        }

        self.max_size = new_max_size;
        self.free_size += extra_size;

        if self.is_empty() {
            self.current_alignment = largest_power_of_two_at_most(self.max_size);
        }

        Ok(())
    }

    /// Returns the total capacity.
    #[inline]
    #[must_use]
    pub const fn max_size(&self) -> u64 {
        self.max_size
    }

    /// Returns whether no free space is left.
    #[inline]
    #[must_use]
    pub const fn is_full(&self) -> bool {
        self.free_size == 0
    }

    /// Returns whether nothing is allocated.
    #[inline]
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.free_size == self.max_size
    }

    /// Returns the total free space.
    #[inline]
    #[must_use]
    pub const fn free_size(&self) -> u64 {
        self.free_size
    }

    /// Returns the total allocated space, padding included.
    #[inline]
    #[must_use]
    pub const fn used_size(&self) -> u64 {
        self.max_size - self.free_size
    }

    /// Returns the size of the largest free block, or zero when full.
    #[must_use]
    pub fn max_free_block_size(&self) -> u64 {
        self.free_by_size.last().map_or(0, |&(size, _)| size)
    }

    /// Returns the number of free blocks.
    #[inline]
    #[must_use]
    pub fn num_free_blocks(&self) -> usize {
        self.free_by_offset.len()
    }

    /// Iterates the free blocks in address order.
    pub fn free_blocks(&self) -> impl Iterator<Item = Block> + '_ {
        self.free_by_offset
            .iter()
            .map(|(&offset, &size)| Block { offset, size })
    }

    /// Checks the structural invariants of the free list.
    ///
    /// # Errors
    ///
    /// Returns a description of the first broken invariant.
    pub fn check_invariants(&self) -> Result<(), String> {
        if self.free_by_offset.len() != self.free_by_size.len() {
            return Err(format!(
                "index size mismatch: {} by offset, {} by size",
                self.free_by_offset.len(),
                self.free_by_size.len()
            ));
        }

        let mut total = 0u64;
        let mut prev_end: Option<u64> = None;
        for (&offset, &size) in &self.free_by_offset {
            if size == 0 {
                return Err(format!("empty free block at {offset}"));
            }
            if !self.free_by_size.contains(&(size, offset)) {
                return Err(format!("block {offset}+{size} missing from size index"));
            }
            if let Some(end) = prev_end {
                if end > offset {
                    return Err(format!("block at {offset} overlaps previous block ending at {end}"));
                }
                if end == offset {
                    return Err(format!("block at {offset} touches previous block; not merged"));
                }
            }
            if offset % self.current_alignment != 0 {
                return Err(format!(
                    "block at {offset} is not a multiple of tracked alignment {}",
                    self.current_alignment
                ));
            }
            let end = offset + size;
            if end > self.max_size {
                return Err(format!("block {offset}+{size} runs past capacity {}", self.max_size));
            }
            prev_end = Some(end);
            total += size;
        }

        if total != self.free_size {
            return Err(format!(
                "free size {} does not match sum of blocks {total}",
                self.free_size
            ));
        }
        Ok(())
    }

    fn insert_block(&mut self, offset: u64, size: u64) {
        debug_assert!(size > 0);
        let previous = self.free_by_offset.insert(offset, size);
        debug_assert!(previous.is_none(), "duplicate free block at {offset}");
        self.free_by_size.insert((size, offset));
    }

    fn remove_block(&mut self, offset: u64, size: u64) {
        let removed = self.free_by_offset.remove(&offset);
        debug_assert_eq!(removed, Some(size));
        let removed = self.free_by_size.remove(&(size, offset));
        debug_assert!(removed, "size index out of sync at {offset}");
    }
}

/// Rounds `value` up to a multiple of the power-of-two `alignment`.
#[inline]
fn align_up(value: u64, alignment: u64) -> Option<u64> {
    let mask = alignment - 1;
    value.checked_add(mask).map(|v| v & !mask)
}

#[inline]
fn largest_power_of_two_at_most(value: u64) -> u64 {
    if value == 0 {
        1
    } else {
        1u64 << (63 - value.leading_zeros())
    }
}
