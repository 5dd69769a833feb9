//! # GPU Heap Pool
//!
//! A single fixed-capacity shader-visible heap. Shader-visible heaps cannot
//! grow, so running out of slots returns `Ok(None)` and the caller decides
//! what to do.
//!
//! ## Deferred release
//!
//! Command lists recorded this frame may still read freed slots. Frees are
//! tagged with a release token (the fence value the caller will signal for
//! the frame being recorded) and only become reusable in
//! [`GpuHeapPool::release_stale_allocations`].
//!
//! ```text
//!   frame N:  set_release_token(N) ... handles dropped -> queued with token N
//!   later:    fence reached N       -> release_stale_allocations(N)
//! ```

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use crate::chunk::{HeapChunk, ReleasePolicy};
use crate::error::{HeapError, HeapResult};
use crate::handle::{AllocationHandle, ChunkId, DescriptorOwner};
use crate::heap::{CpuDescriptor, DescriptorHeapKind, GpuDescriptor, HeapFactory, HeapFlags};
use crate::stats::PoolStats;

/// Fixed-size shader-visible descriptor heap with fence-deferred frees.
///
/// Every queued free must be retired before the pool is dropped.
pub struct GpuHeapPool<F: HeapFactory> {
    chunk: HeapChunk<F>,
    /// Token attached to handles freed by drop.
    release_token: AtomicU64,
    self_ref: Weak<Self>,
}

impl<F: HeapFactory> GpuHeapPool<F> {
    /// Creates the shader-visible heap.
    ///
    /// # Errors
    ///
    /// - [`HeapError::NotShaderVisible`] for RTV and DSV heaps
    /// - [`HeapError::HeapCreation`] if the factory fails
    pub fn new(factory: &F, kind: DescriptorHeapKind, capacity: u32) -> HeapResult<Arc<Self>> {
        if !kind.supports_shader_visible() {
            return Err(HeapError::NotShaderVisible(kind));
        }
        let chunk = HeapChunk::new(
            factory,
            ChunkId(0),
            kind,
            capacity,
            HeapFlags::SHADER_VISIBLE,
            ReleasePolicy::Deferred,
        )?;

        Ok(Arc::new_cyclic(|self_ref| Self {
            chunk,
            release_token: AtomicU64::new(0),
            self_ref: self_ref.clone(),
        }))
    }

    /// Allocates `count` contiguous slots.
    ///
    /// Returns `Ok(None)` if the heap has no contiguous run of `count` slots.
    ///
    /// # Errors
    ///
    /// [`HeapError::ZeroCount`] if `count` is zero.
    pub fn allocate(&self, count: u32) -> HeapResult<Option<AllocationHandle>> {
        let owner: Weak<dyn DescriptorOwner> = self.self_ref.clone();
        let handle = self.chunk.allocate(count, &owner)?;
        if handle.is_none() {
            tracing::warn!(
                kind = %self.chunk.kind(),
                requested = count,
                free = self.chunk.free_descriptors(),
                stale = self.chunk.stale_descriptors(),
                "shader-visible descriptor heap exhausted"
            );
        }
        Ok(handle)
    }

    /// Queues a handle's slots for reuse once `release_token` retires.
    ///
    /// Freeing a null handle does nothing.
    ///
    /// # Errors
    ///
    /// - [`HeapError::WrongOwner`] if another pool issued the handle
    /// - [`HeapError::Alloc`] if `release_token` is older than the last
    ///   token queued
    ///
    /// On error the handle is dropped, which queues its slots with the
    /// newest token instead.
    pub fn free(&self, mut handle: AllocationHandle, release_token: u64) -> HeapResult<()> {
        if handle.is_null() {
            return Ok(());
        }
        if !handle.is_owned_by(self) {
            return Err(HeapError::WrongOwner {
                chunk: handle.chunk_id(),
            });
        }
        self.chunk.free_deferred(&handle, release_token)?;
        handle.detach();
        Ok(())
    }

    /// Makes slots freed with tokens `<= completed_token` reusable.
    /// Returns the number of ranges retired.
    ///
    /// # Errors
    ///
    /// Propagates double frees discovered while retiring.
    pub fn release_stale_allocations(&self, completed_token: u64) -> HeapResult<usize> {
        self.chunk.release_stale_allocations(completed_token)
    }

    /// Sets the token attached to handles freed by drop from now on.
    ///
    /// The token never moves backwards; an older value is ignored. A drop
    /// also never queues behind a newer token passed to [`GpuHeapPool::free`].
    pub fn set_release_token(&self, token: u64) {
        self.release_token.fetch_max(token, Ordering::AcqRel);
    }

    /// Token attached to handles freed by drop.
    #[must_use]
    pub fn release_token(&self) -> u64 {
        self.release_token.load(Ordering::Acquire)
    }

    /// Heap kind.
    #[inline]
    #[must_use]
    pub const fn kind(&self) -> DescriptorHeapKind {
        self.chunk.kind()
    }

    /// Number of slots in the heap.
    #[inline]
    #[must_use]
    pub const fn capacity(&self) -> u32 {
        self.chunk.capacity()
    }

    /// CPU address of slot 0.
    #[inline]
    #[must_use]
    pub const fn cpu_base(&self) -> CpuDescriptor {
        self.chunk.cpu_base()
    }

    /// GPU address of slot 0.
    #[inline]
    #[must_use]
    pub const fn gpu_base(&self) -> Option<GpuDescriptor> {
        self.chunk.gpu_base()
    }

    /// The native heap, for binding.
    #[inline]
    #[must_use]
    pub const fn heap(&self) -> &F::Heap {
        self.chunk.heap()
    }

    /// Usage snapshot.
    #[must_use]
    pub fn stats(&self) -> PoolStats {
        PoolStats::default().with_chunk(&self.chunk)
    }
}

impl<F: HeapFactory> DescriptorOwner for GpuHeapPool<F> {
    fn reclaim(&self, handle: &AllocationHandle) -> HeapResult<()> {
        self.chunk
            .free_deferred_latest(handle, self.release_token())
            .map(|_| ())
    }
}

impl<F: HeapFactory> std::fmt::Debug for GpuHeapPool<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GpuHeapPool")
            .field("chunk", &self.chunk)
            .field("release_token", &self.release_token())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::heap::HostHeapFactory;
    use oroboros_alloc::AllocError;

    fn pool(capacity: u32) -> Arc<GpuHeapPool<HostHeapFactory>> {
        GpuHeapPool::new(&HostHeapFactory::new(), DescriptorHeapKind::CbvSrvUav, capacity).unwrap()
    }

    #[test]
    fn test_fixed_capacity() {
        let pool = pool(64);
        assert!(pool.allocate(65).unwrap().is_none());
        let all = pool.allocate(64).unwrap().unwrap();
        assert!(all.is_shader_visible());
        assert!(pool.allocate(1).unwrap().is_none());

        pool.free(all, 1).unwrap();
        pool.release_stale_allocations(1).unwrap();
    }

    #[test]
    fn test_dropped_handle_waits_for_token() {
        let pool = pool(16);
        pool.set_release_token(3);
        let handle = pool.allocate(16).unwrap().unwrap();
        drop(handle);

        let stats = pool.stats();
        assert_eq!(stats.used, 16);
        assert_eq!(stats.stale, 16);
        assert!(pool.allocate(1).unwrap().is_none());

        assert_eq!(pool.release_stale_allocations(2).unwrap(), 0);
        assert_eq!(pool.release_stale_allocations(3).unwrap(), 1);
        let again = pool.allocate(16).unwrap().unwrap();
        pool.free(again, 4).unwrap();
        pool.release_stale_allocations(4).unwrap();
    }

    #[test]
    fn test_release_token_never_regresses() {
        let pool = pool(4);
        pool.set_release_token(10);
        pool.set_release_token(7);
        assert_eq!(pool.release_token(), 10);
    }

    #[test]
    fn test_rtv_heap_rejected() {
        let err = GpuHeapPool::new(&HostHeapFactory::new(), DescriptorHeapKind::Rtv, 4).unwrap_err();
        assert!(matches!(err, HeapError::NotShaderVisible(DescriptorHeapKind::Rtv)));
    }

    #[test]
    fn test_token_regression_on_explicit_free() {
        let pool = pool(8);
        let a = pool.allocate(1).unwrap().unwrap();
        let b = pool.allocate(1).unwrap().unwrap();
        pool.free(a, 5).unwrap();
        assert!(matches!(
            pool.free(b, 4),
            Err(HeapError::Alloc(AllocError::TokenRegression { token: 4, last: 5 }))
        ));

        // The rejected handle was queued behind token 5 on drop.
        assert_eq!(pool.stats().stale, 2);
        assert_eq!(pool.release_stale_allocations(4).unwrap(), 0);
        pool.release_stale_allocations(u64::MAX).unwrap();
        assert_eq!(pool.stats().used, 0);
    }

    #[test]
    fn test_drop_after_explicit_free_with_newer_token() {
        let pool = pool(8);
        let a = pool.allocate(4).unwrap().unwrap();
        let b = pool.allocate(4).unwrap().unwrap();

        // Pool token is still 0.
        pool.free(a, 5).unwrap();
        drop(b);
        assert_eq!(pool.stats().stale, 8);

        assert_eq!(pool.release_stale_allocations(4).unwrap(), 0);
        pool.release_stale_allocations(u64::MAX).unwrap();
        assert_eq!(pool.stats().used, 0);
        let all = pool.allocate(8).unwrap().unwrap();
        pool.free(all, 6).unwrap();
        pool.release_stale_allocations(6).unwrap();
    }
}
