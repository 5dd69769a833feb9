//! # Heap Chunk
//!
//! One native heap plus the allocator that hands out its slots.
//!
//! Allocator offsets are slot indices. A slot's address is
//! `base + offset * stride`; freeing goes the other way,
//! `(cpu - cpu_base) / stride`.

use std::sync::Weak;

use oroboros_alloc::{AllocError, BlockAllocator, DeferredBlockAllocator};
use parking_lot::Mutex;

use crate::error::{HeapError, HeapResult};
use crate::handle::{AllocationHandle, ChunkId, DescriptorOwner};
use crate::heap::{CpuDescriptor, DescriptorHeapKind, GpuDescriptor, HeapFactory, HeapFlags};

/// When freed slots become reusable.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReleasePolicy {
    /// Slots are reusable as soon as they are freed.
    Immediate,
    /// Slots are reusable once the release token they were freed with retires.
    Deferred,
}

#[derive(Debug)]
enum ChunkAllocator {
    Immediate(BlockAllocator),
    Deferred(DeferredBlockAllocator),
}

impl ChunkAllocator {
    fn view(&self) -> &BlockAllocator {
        match self {
            Self::Immediate(allocator) => allocator,
            Self::Deferred(allocator) => allocator.allocator(),
        }
    }
}

#[derive(Debug)]
struct ChunkState {
    allocator: ChunkAllocator,
    max_allocated: u64,
}

/// A fixed-capacity native heap and its slot allocator.
pub struct HeapChunk<F: HeapFactory> {
    id: ChunkId,
    kind: DescriptorHeapKind,
    heap: F::Heap,
    capacity: u32,
    stride: u32,
    cpu_base: CpuDescriptor,
    gpu_base: Option<GpuDescriptor>,
    state: Mutex<ChunkState>,
}

impl<F: HeapFactory> HeapChunk<F> {
    /// Creates the native heap and an allocator covering all of it.
    ///
    /// # Errors
    ///
    /// Propagates heap creation failures from the factory.
    pub fn new(
        factory: &F,
        id: ChunkId,
        kind: DescriptorHeapKind,
        capacity: u32,
        flags: HeapFlags,
        policy: ReleasePolicy,
    ) -> HeapResult<Self> {
        let heap = factory.create_heap(kind, capacity, flags)?;
        let stride = factory.descriptor_stride(kind);
        let cpu_base = factory.cpu_base(&heap);
        let gpu_base = factory.gpu_base(&heap);

        let allocator = match policy {
            ReleasePolicy::Immediate => {
                ChunkAllocator::Immediate(BlockAllocator::new(u64::from(capacity)))
            }
            ReleasePolicy::Deferred => {
                ChunkAllocator::Deferred(DeferredBlockAllocator::new(u64::from(capacity)))
            }
        };

        tracing::debug!(%kind, chunk = %id, capacity, stride, shader_visible = gpu_base.is_some(), "created descriptor heap chunk");

        Ok(Self {
            id,
            kind,
            heap,
            capacity,
            stride,
            cpu_base,
            gpu_base,
            state: Mutex::new(ChunkState {
                allocator,
                max_allocated: 0,
            }),
        })
    }

    /// Allocates `count` contiguous slots owned by `owner`.
    ///
    /// Returns `Ok(None)` if no contiguous run of `count` slots is free.
    ///
    /// # Errors
    ///
    /// [`HeapError::ZeroCount`] if `count` is zero.
    pub fn allocate(
        &self,
        count: u32,
        owner: &Weak<dyn DescriptorOwner>,
    ) -> HeapResult<Option<AllocationHandle>> {
        if count == 0 {
            return Err(HeapError::ZeroCount);
        }

        let allocation = {
            let mut state = self.state.lock();
            let allocation = match &mut state.allocator {
                ChunkAllocator::Immediate(allocator) => allocator.allocate(u64::from(count), 1)?,
                ChunkAllocator::Deferred(allocator) => allocator.allocate(u64::from(count), 1)?,
            };
            let used = state.allocator.view().used_size();
            state.max_allocated = state.max_allocated.max(used);
            allocation
        };

        let Some(allocation) = allocation else {
            return Ok(None);
        };
        let index = u32::try_from(allocation.offset).map_err(|_| AllocError::Overflow)?;

        Ok(Some(AllocationHandle::new(
            self.cpu_base.offset(index, self.stride),
            self.gpu_base.map(|gpu| gpu.offset(index, self.stride)),
            count,
            self.stride,
            self.id,
            Weak::clone(owner),
        )))
    }

    /// Returns a handle's slots immediately.
    ///
    /// # Errors
    ///
    /// - [`HeapError::ForeignHandle`] if the handle is not from this chunk
    /// - [`HeapError::PolicyMismatch`] if this chunk defers its frees
    /// - [`HeapError::Alloc`] if the slots are already free
    pub fn free(&self, handle: &AllocationHandle) -> HeapResult<()> {
        let offset = self.slot_offset(handle)?;
        let mut state = self.state.lock();
        match &mut state.allocator {
            ChunkAllocator::Immediate(allocator) => {
                allocator.free(offset, u64::from(handle.count()))?;
                Ok(())
            }
            ChunkAllocator::Deferred(_) => Err(HeapError::PolicyMismatch { chunk: self.id }),
        }
    }

    /// Queues a handle's slots for reuse once `release_token` retires.
    ///
    /// # Errors
    ///
    /// - [`HeapError::ForeignHandle`] if the handle is not from this chunk
    /// - [`HeapError::PolicyMismatch`] if this chunk frees immediately
    /// - [`HeapError::Alloc`] if `release_token` is older than the last one
    pub fn free_deferred(&self, handle: &AllocationHandle, release_token: u64) -> HeapResult<()> {
        let offset = self.slot_offset(handle)?;
        let mut state = self.state.lock();
        match &mut state.allocator {
            ChunkAllocator::Deferred(allocator) => {
                allocator.free(offset, u64::from(handle.count()), release_token)?;
                Ok(())
            }
            ChunkAllocator::Immediate(_) => Err(HeapError::PolicyMismatch { chunk: self.id }),
        }
    }

    /// Like [`HeapChunk::free_deferred`], but queues with the newest token
    /// already in the queue when that is later than `release_token`, so the
    /// free can never regress. Returns the token used.
    ///
    /// # Errors
    ///
    /// - [`HeapError::ForeignHandle`] if the handle is not from this chunk
    /// - [`HeapError::PolicyMismatch`] if this chunk frees immediately
    pub fn free_deferred_latest(
        &self,
        handle: &AllocationHandle,
        release_token: u64,
    ) -> HeapResult<u64> {
        let offset = self.slot_offset(handle)?;
        let mut state = self.state.lock();
        match &mut state.allocator {
            ChunkAllocator::Deferred(allocator) => {
                let token = allocator
                    .last_release_token()
                    .map_or(release_token, |last| last.max(release_token));
                allocator.free(offset, u64::from(handle.count()), token)?;
                Ok(token)
            }
            ChunkAllocator::Immediate(_) => Err(HeapError::PolicyMismatch { chunk: self.id }),
        }
    }

    /// Newest release token waiting in the queue, if any.
    #[must_use]
    pub fn last_release_token(&self) -> Option<u64> {
        match &self.state.lock().allocator {
            ChunkAllocator::Deferred(allocator) => allocator.last_release_token(),
            ChunkAllocator::Immediate(_) => None,
        }
    }

    /// Makes slots freed with tokens `<= completed_token` reusable.
    /// Returns the number of ranges retired; always zero for immediate chunks.
    ///
    /// # Errors
    ///
    /// Propagates double frees discovered while retiring.
    pub fn release_stale_allocations(&self, completed_token: u64) -> HeapResult<usize> {
        let mut state = self.state.lock();
        match &mut state.allocator {
            ChunkAllocator::Deferred(allocator) => {
                Ok(allocator.release_stale_allocations(completed_token)?)
            }
            ChunkAllocator::Immediate(_) => Ok(0),
        }
    }

    fn slot_offset(&self, handle: &AllocationHandle) -> HeapResult<u64> {
        let foreign = || HeapError::ForeignHandle { chunk: self.id };
        if handle.chunk_id() != self.id || handle.count() == 0 {
            return Err(foreign());
        }

        let delta = handle
            .first_cpu()
            .0
            .checked_sub(self.cpu_base.0)
            .ok_or_else(foreign)?;
        let stride = self.stride as usize;
        if delta % stride != 0 {
            return Err(foreign());
        }
        let offset = u64::try_from(delta / stride).map_err(|_| foreign())?;
        if offset + u64::from(handle.count()) > u64::from(self.capacity) {
            return Err(foreign());
        }
        Ok(offset)
    }

    /// Chunk id within its pool.
    #[inline]
    #[must_use]
    pub const fn id(&self) -> ChunkId {
        self.id
    }

    /// Heap kind.
    #[inline]
    #[must_use]
    pub const fn kind(&self) -> DescriptorHeapKind {
        self.kind
    }

    /// The native heap.
    #[inline]
    #[must_use]
    pub const fn heap(&self) -> &F::Heap {
        &self.heap
    }

    /// Number of slots.
    #[inline]
    #[must_use]
    pub const fn capacity(&self) -> u32 {
        self.capacity
    }

    /// Size in bytes of one slot.
    #[inline]
    #[must_use]
    pub const fn stride(&self) -> u32 {
        self.stride
    }

    /// CPU address of slot 0.
    #[inline]
    #[must_use]
    pub const fn cpu_base(&self) -> CpuDescriptor {
        self.cpu_base
    }

    /// GPU address of slot 0, if shader-visible.
    #[inline]
    #[must_use]
    pub const fn gpu_base(&self) -> Option<GpuDescriptor> {
        self.gpu_base
    }

    /// Release policy of this chunk.
    #[must_use]
    pub fn policy(&self) -> ReleasePolicy {
        match self.state.lock().allocator {
            ChunkAllocator::Immediate(_) => ReleasePolicy::Immediate,
            ChunkAllocator::Deferred(_) => ReleasePolicy::Deferred,
        }
    }

    /// Slots currently free for allocation.
    #[must_use]
    pub fn free_descriptors(&self) -> u64 {
        self.state.lock().allocator.view().free_size()
    }

    /// Slots allocated or waiting for their release token.
    #[must_use]
    pub fn used_descriptors(&self) -> u64 {
        self.state.lock().allocator.view().used_size()
    }

    /// Slots waiting for their release token.
    #[must_use]
    pub fn stale_descriptors(&self) -> u64 {
        match &self.state.lock().allocator {
            ChunkAllocator::Deferred(allocator) => allocator.stale_size(),
            ChunkAllocator::Immediate(_) => 0,
        }
    }

    /// Highest number of slots ever in use at once.
    #[must_use]
    pub fn max_allocated_size(&self) -> u64 {
        self.state.lock().max_allocated
    }

    /// Whether no slot is free.
    #[must_use]
    pub fn is_full(&self) -> bool {
        self.state.lock().allocator.view().is_full()
    }
}

impl<F: HeapFactory> std::fmt::Debug for HeapChunk<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HeapChunk")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("capacity", &self.capacity)
            .field("stride", &self.stride)
            .field("cpu_base", &self.cpu_base)
            .field("gpu_base", &self.gpu_base)
            .finish_non_exhaustive()
    }
}
