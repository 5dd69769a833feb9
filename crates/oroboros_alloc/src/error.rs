//! # Allocator Error Types
//!
//! Contract violations reported by the range allocators. Running out of
//! space is not an error; `allocate` returns `Ok(None)` for that.

use thiserror::Error;

/// Errors that can occur in the range allocators.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AllocError {
    /// A zero-sized allocation or free was requested.
    #[error("zero-sized range requested")]
    ZeroSize,

    /// Alignment was zero or not a power of two.
    #[error("invalid alignment {alignment}: must be a non-zero power of two")]
    InvalidAlignment {
        /// The alignment that was requested.
        alignment: u64,
    },

    /// The freed range reaches past the end of the allocator.
    #[error("range [{offset}, +{size}) is outside allocator capacity {capacity}")]
    OutOfRange {
        /// Start of the freed range.
        offset: u64,
        /// Length of the freed range.
        size: u64,
        /// Current allocator capacity.
        capacity: u64,
    },

    /// The freed range overlaps space that is already free.
    #[error("range [{offset}, +{size}) overlaps a free block (double free?)")]
    DoubleFree {
        /// Start of the freed range.
        offset: u64,
        /// Length of the freed range.
        size: u64,
    },

    /// A deferred free carried a release token older than the last one queued.
    #[error("release token {token} is older than last queued token {last}")]
    TokenRegression {
        /// The token passed to the free.
        token: u64,
        /// The most recently queued token.
        last: u64,
    },

    /// The allocator was torn down with ranges still waiting on their token.
    #[error("{count} stale ranges ({size} units) were never retired")]
    UnretiredStale {
        /// Number of queued stale ranges.
        count: usize,
        /// Total size of the queued ranges.
        size: u64,
    },

    /// Offset or size arithmetic overflowed `u64`.
    #[error("range arithmetic overflow")]
    Overflow,
}

/// Result type for allocator operations.
pub type AllocResult<T> = Result<T, AllocError>;
