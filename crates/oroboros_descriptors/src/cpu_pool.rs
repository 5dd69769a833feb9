//! # CPU Heap Pool
//!
//! Unbounded set of CPU-only heap chunks for one heap kind.
//!
//! ## Growth
//!
//! When no chunk can hold a request, a new chunk is created. If the request
//! is larger than the current chunk size, the chunk size is raised to the
//! request and stays there for every later chunk (high-water-mark sizing).
//!
//! ## Locking
//!
//! The pool lock guards the chunk list, the available set and the chunk
//! size. Allocation snapshots the available chunks, drops the pool lock and
//! then probes each chunk under its own lock. The pool lock is only held
//! across a chunk lock when re-checking a chunk before evicting it from the
//! available set, and while carving the first handle out of a chunk that is
//! not yet published. Order is always pool, then chunk.

use std::collections::BTreeSet;
use std::sync::{Arc, Weak};

use oroboros_alloc::AllocError;
use parking_lot::Mutex;

use crate::chunk::{HeapChunk, ReleasePolicy};
use crate::error::{HeapError, HeapResult};
use crate::handle::{AllocationHandle, ChunkId, DescriptorOwner};
use crate::heap::{DescriptorHeapKind, HeapFactory, HeapFlags};
use crate::stats::PoolStats;

struct CpuPoolState<F: HeapFactory> {
    /// All chunks, indexed by `ChunkId`.
    chunks: Vec<Arc<HeapChunk<F>>>,
    /// Chunks that may still have free slots.
    available: BTreeSet<ChunkId>,
    /// Capacity of the next chunk to be created.
    chunk_size: u32,
}

/// Growable pool of CPU-only descriptor heaps.
///
/// # Example
///
/// ```rust,ignore
/// let pool = CpuHeapPool::new(factory, DescriptorHeapKind::Rtv, 256);
///
/// let rtvs = pool.allocate(3)?;
/// device.create_render_target_view(texture, rtvs.cpu_handle(0));
///
/// // Slots go back to the pool when `rtvs` is dropped.
/// ```
pub struct CpuHeapPool<F: HeapFactory> {
    factory: Arc<F>,
    kind: DescriptorHeapKind,
    configured_chunk_size: u32,
    state: Mutex<CpuPoolState<F>>,
    self_ref: Weak<Self>,
}

impl<F: HeapFactory> CpuHeapPool<F> {
    /// Creates an empty pool. The first chunk is created on first use.
    ///
    /// # Panics
    ///
    /// Panics if `chunk_size` is zero.
    #[must_use]
    pub fn new(factory: Arc<F>, kind: DescriptorHeapKind, chunk_size: u32) -> Arc<Self> {
        assert!(chunk_size > 0, "Chunk size must be greater than zero");

        Arc::new_cyclic(|self_ref| Self {
            factory,
            kind,
            configured_chunk_size: chunk_size,
            state: Mutex::new(CpuPoolState {
                chunks: Vec::new(),
                available: BTreeSet::new(),
                chunk_size,
            }),
            self_ref: self_ref.clone(),
        })
    }

    /// Allocates `count` contiguous slots, growing the pool if needed.
    ///
    /// # Errors
    ///
    /// - [`HeapError::ZeroCount`] if `count` is zero
    /// - [`HeapError::HeapCreation`] if a new chunk was needed and the
    ///   factory could not create it
    pub fn allocate(&self, count: u32) -> HeapResult<AllocationHandle> {
        if count == 0 {
            return Err(HeapError::ZeroCount);
        }
        let owner: Weak<dyn DescriptorOwner> = self.self_ref.clone();

        let candidates: Vec<Arc<HeapChunk<F>>> = {
            let state = self.state.lock();
            state
                .available
                .iter()
                .filter_map(|id| state.chunks.get(id.0 as usize).cloned())
                .collect()
        };

        let mut exhausted = Vec::new();
        let mut found = None;
        for chunk in candidates {
            let handle = chunk.allocate(count, &owner)?;
            // Full chunks leave the available set even when they were only
            // probed; a later free puts them back.
            if chunk.free_descriptors() == 0 {
                exhausted.push(chunk);
            }
            if handle.is_some() {
                found = handle;
                break;
            }
        }

        if !exhausted.is_empty() {
            let mut state = self.state.lock();
            for chunk in exhausted {
                if chunk.free_descriptors() == 0 {
                    state.available.remove(&chunk.id());
                }
            }
        }

        match found {
            Some(handle) => Ok(handle),
            None => self.grow_and_allocate(count, &owner),
        }
    }

    fn grow_and_allocate(
        &self,
        count: u32,
        owner: &Weak<dyn DescriptorOwner>,
    ) -> HeapResult<AllocationHandle> {
        let mut state = self.state.lock();

        if count > state.chunk_size {
            tracing::info!(
                kind = %self.kind,
                old_size = state.chunk_size,
                new_size = count,
                "raising descriptor chunk size"
            );
            state.chunk_size = count;
        }

        let id = ChunkId(u32::try_from(state.chunks.len()).map_err(|_| AllocError::Overflow)?);
        let chunk = Arc::new(HeapChunk::new(
            &*self.factory,
            id,
            self.kind,
            state.chunk_size,
            HeapFlags::NONE,
            ReleasePolicy::Immediate,
        )?);

        let handle = chunk
            .allocate(count, owner)?
            .ok_or(HeapError::OutOfDescriptors {
                kind: self.kind,
                requested: count,
            })?;

        if chunk.free_descriptors() > 0 {
            state.available.insert(id);
        }
        state.chunks.push(chunk);
        Ok(handle)
    }

    /// Returns a handle's slots to the pool.
    ///
    /// Freeing a null handle does nothing.
    ///
    /// # Errors
    ///
    /// - [`HeapError::WrongOwner`] if another pool issued the handle; the
    ///   handle is then dropped and returns to its own pool
    /// - [`HeapError::UnknownChunk`] / [`HeapError::ForeignHandle`] if the
    ///   handle's chunk data is inconsistent with this pool
    ///
    /// On error the handle is dropped like any other.
    pub fn free(&self, mut handle: AllocationHandle) -> HeapResult<()> {
        if handle.is_null() {
            return Ok(());
        }
        if !handle.is_owned_by(self) {
            return Err(HeapError::WrongOwner {
                chunk: handle.chunk_id(),
            });
        }
        self.release(&handle)?;
        handle.detach();
        Ok(())
    }

    fn release(&self, handle: &AllocationHandle) -> HeapResult<()> {
        let id = handle.chunk_id();
        let chunk = self
            .state
            .lock()
            .chunks
            .get(id.0 as usize)
            .cloned()
            .ok_or(HeapError::UnknownChunk(id))?;

        chunk.free(handle)?;
        self.state.lock().available.insert(id);
        Ok(())
    }

    /// Heap kind served by this pool.
    #[inline]
    #[must_use]
    pub const fn kind(&self) -> DescriptorHeapKind {
        self.kind
    }

    /// Chunk size the pool was created with.
    #[inline]
    #[must_use]
    pub const fn configured_chunk_size(&self) -> u32 {
        self.configured_chunk_size
    }

    /// Capacity of the next chunk to be created.
    #[must_use]
    pub fn chunk_size(&self) -> u32 {
        self.state.lock().chunk_size
    }

    /// Number of chunks created so far.
    #[must_use]
    pub fn chunk_count(&self) -> usize {
        self.state.lock().chunks.len()
    }

    /// Chunks currently considered for allocation.
    #[must_use]
    pub fn available_chunks(&self) -> Vec<ChunkId> {
        self.state.lock().available.iter().copied().collect()
    }

    /// Looks up a chunk by id.
    #[must_use]
    pub fn chunk(&self, id: ChunkId) -> Option<Arc<HeapChunk<F>>> {
        self.state.lock().chunks.get(id.0 as usize).cloned()
    }

    /// Aggregated usage across all chunks.
    #[must_use]
    pub fn stats(&self) -> PoolStats {
        let chunks: Vec<_> = self.state.lock().chunks.clone();
        chunks
            .iter()
            .fold(PoolStats::default(), |stats, chunk| stats.with_chunk(chunk))
    }
}

impl<F: HeapFactory> DescriptorOwner for CpuHeapPool<F> {
    fn reclaim(&self, handle: &AllocationHandle) -> HeapResult<()> {
        self.release(handle)
    }
}

impl<F: HeapFactory> std::fmt::Debug for CpuHeapPool<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("CpuHeapPool")
            .field("kind", &self.kind)
            .field("chunk_size", &state.chunk_size)
            .field("chunks", &state.chunks.len())
            .field("available", &state.available)
            .finish_non_exhaustive()
    }
}
