//! # Deferred Block Allocator
//!
//! Block allocator whose frees are quarantined until a release token retires.
//!
//! A GPU may still read a range after the CPU has logically freed it. Freed
//! ranges therefore wait in a FIFO tagged with the token the caller will
//! signal once that GPU work completes, and only return to the free list in
//! [`DeferredBlockAllocator::release_stale_allocations`].
//!
//! ```text
//!   free(off, size, token) ──> [stale FIFO, tokens non-decreasing]
//!                                     │
//!   release_stale_allocations(done) ──┘──> BlockAllocator::free  (token <= done)
//! ```

use std::collections::VecDeque;

use crate::block::{Allocation, BlockAllocator};
use crate::error::{AllocError, AllocResult};

/// A freed range waiting for its release token to retire.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StaleAllocation {
    /// Start of the range.
    pub offset: u64,
    /// Length of the range.
    pub size: u64,
    /// Token that must be completed before the range can be reused.
    pub release_token: u64,
}

/// A [`BlockAllocator`] with fence-deferred frees.
///
/// Dropping it while ranges are still queued is a contract violation: it is
/// logged, and debug builds panic.
#[derive(Debug)]
pub struct DeferredBlockAllocator {
    allocator: BlockAllocator,
    stale: VecDeque<StaleAllocation>,
    stale_size: u64,
}

impl DeferredBlockAllocator {
    /// Creates a deferred allocator managing `[0, max_size)`.
    #[must_use]
    pub fn new(max_size: u64) -> Self {
        Self {
            allocator: BlockAllocator::new(max_size),
            stale: VecDeque::new(),
            stale_size: 0,
        }
    }

    /// Reserves a range; see [`BlockAllocator::allocate`].
    ///
    /// # Errors
    ///
    /// Same as [`BlockAllocator::allocate`].
    #[inline]
    pub fn allocate(&mut self, size: u64, alignment: u64) -> AllocResult<Option<Allocation>> {
        self.allocator.allocate(size, alignment)
    }

    /// Grows capacity; see [`BlockAllocator::extend`].
    ///
    /// # Errors
    ///
    /// Same as [`BlockAllocator::extend`].
    #[inline]
    pub fn extend(&mut self, extra_size: u64) -> AllocResult<()> {
        self.allocator.extend(extra_size)
    }

    /// Queues `[offset, offset + size)` for release once `release_token`
    /// has been completed.
    ///
    /// Tokens must be queued in non-decreasing order. Overlap with free
    /// space is detected when the range is retired.
    ///
    /// # Errors
    ///
    /// - [`AllocError::ZeroSize`] if `size` is zero
    /// - [`AllocError::OutOfRange`] if the range ends past capacity
    /// - [`AllocError::TokenRegression`] if `release_token` is older than
    ///   the last queued token
    pub fn free(&mut self, offset: u64, size: u64, release_token: u64) -> AllocResult<()> {
        if size == 0 {
            return Err(AllocError::ZeroSize);
        }
        let end = offset.checked_add(size).ok_or(AllocError::Overflow)?;
        if end > self.allocator.max_size() {
            return Err(AllocError::OutOfRange {
                offset,
                size,
                capacity: self.allocator.max_size(),
            });
        }
        if let Some(last) = self.last_release_token() {
            if release_token < last {
                return Err(AllocError::TokenRegression {
                    token: release_token,
                    last,
                });
            }
        }

        self.stale.push_back(StaleAllocation {
            offset,
            size,
            release_token,
        });
        self.stale_size += size;
        Ok(())
    }

    /// Returns every queued range whose token is `<= completed_token` to the
    /// free list, oldest first. Returns how many ranges were retired.
    ///
    /// # Errors
    ///
    /// Propagates [`BlockAllocator::free`] failures (a range freed twice).
    /// The offending entry has already been removed from the queue.
    pub fn release_stale_allocations(&mut self, completed_token: u64) -> AllocResult<usize> {
        let mut retired = 0;
        while self
            .stale
            .front()
            .is_some_and(|entry| entry.release_token <= completed_token)
        {
            let Some(entry) = self.stale.pop_front() else {
                break;
            };
            self.stale_size -= entry.size;
            self.allocator.free(entry.offset, entry.size)?;
            retired += 1;
        }

        if retired > 0 {
            tracing::trace!(retired, completed_token, pending = self.stale.len(), "retired stale ranges");
        }
        Ok(retired)
    }

    /// Read-only view of the underlying allocator.
    #[inline]
    #[must_use]
    pub const fn allocator(&self) -> &BlockAllocator {
        &self.allocator
    }

    /// Returns the number of queued ranges.
    #[inline]
    #[must_use]
    pub fn stale_count(&self) -> usize {
        self.stale.len()
    }

    /// Returns the total size of queued ranges.
    #[inline]
    #[must_use]
    pub const fn stale_size(&self) -> u64 {
        self.stale_size
    }

    /// Returns the token of the most recently queued range.
    #[inline]
    #[must_use]
    pub fn last_release_token(&self) -> Option<u64> {
        self.stale.back().map(|entry| entry.release_token)
    }

    /// Iterates queued ranges, oldest first.
    pub fn stale_allocations(&self) -> impl Iterator<Item = &StaleAllocation> + '_ {
        self.stale.iter()
    }

    /// Checks that every queued range has been retired.
    ///
    /// # Errors
    ///
    /// [`AllocError::UnretiredStale`] if ranges are still queued.
    pub fn ensure_retired(&self) -> AllocResult<()> {
        if self.stale.is_empty() {
            Ok(())
        } else {
            Err(AllocError::UnretiredStale {
                count: self.stale.len(),
                size: self.stale_size,
            })
        }
    }
}

impl Drop for DeferredBlockAllocator {
    fn drop(&mut self) {
        if let Err(err) = self.ensure_retired() {
            tracing::error!(%err, "deferred allocator dropped with queued ranges");
            if cfg!(debug_assertions) && !std::thread::panicking() {
                panic!("deferred allocator dropped with queued ranges: {err}");
            }
        }
    }
}
