//! Pool usage statistics.

use crate::chunk::HeapChunk;
use crate::heap::HeapFactory;

/// Usage snapshot of a descriptor pool.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PoolStats {
    /// Number of heap chunks.
    pub chunks: usize,
    /// Total slots across all chunks.
    pub capacity: u64,
    /// Slots allocated or waiting for their release token.
    pub used: u64,
    /// Sum of each chunk's peak usage.
    pub max_allocated: u64,
    /// Slots waiting for their release token.
    pub stale: u64,
}

impl PoolStats {
    /// Slots available for allocation right now.
    #[inline]
    #[must_use]
    pub const fn free(&self) -> u64 {
        self.capacity - self.used
    }

    pub(crate) fn with_chunk<F: HeapFactory>(self, chunk: &HeapChunk<F>) -> Self {
        Self {
            chunks: self.chunks + 1,
            capacity: self.capacity + u64::from(chunk.capacity()),
            used: self.used + chunk.used_descriptors(),
            max_allocated: self.max_allocated + chunk.max_allocated_size(),
            stale: self.stale + chunk.stale_descriptors(),
        }
    }
}
