//! # Descriptor Heap Registry
//!
//! Every descriptor heap a device needs, built from one config:
//!
//! ```text
//!   DescriptorHeaps
//!   ├── CpuHeapPool × 4   (cbv_srv_uav, sampler, rtv, dsv)   growable
//!   └── GpuHeapPool × 2   (cbv_srv_uav, sampler)             fixed, deferred
//! ```
//!
//! The renderer calls [`DescriptorHeaps::set_release_token`] when it starts
//! recording a frame and [`DescriptorHeaps::release_stale_allocations`]
//! with the last completed fence value once per frame.

use std::sync::Arc;

use crate::config::DescriptorHeapConfig;
use crate::cpu_pool::CpuHeapPool;
use crate::error::{HeapError, HeapResult};
use crate::gpu_pool::GpuHeapPool;
use crate::handle::AllocationHandle;
use crate::heap::{DescriptorHeapKind, HeapFactory};
use crate::stats::PoolStats;

/// Usage of one pool in the registry.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct HeapReport {
    /// Heap kind.
    pub kind: DescriptorHeapKind,
    /// Whether this is the shader-visible pool.
    pub shader_visible: bool,
    /// Usage snapshot.
    pub stats: PoolStats,
}

/// All descriptor pools for one device.
pub struct DescriptorHeaps<F: HeapFactory> {
    factory: Arc<F>,
    cpu: [Arc<CpuHeapPool<F>>; 4],
    gpu: [Arc<GpuHeapPool<F>>; 2],
}

impl<F: HeapFactory> DescriptorHeaps<F> {
    /// Creates the CPU pools and both shader-visible heaps.
    ///
    /// # Errors
    ///
    /// [`HeapError::Config`] if the config is invalid, or heap creation
    /// failures for the shader-visible heaps.
    pub fn new(factory: Arc<F>, config: &DescriptorHeapConfig) -> HeapResult<Self> {
        config.validate()?;

        let cpu = DescriptorHeapKind::ALL.map(|kind| {
            CpuHeapPool::new(Arc::clone(&factory), kind, config.cpu_chunk_sizes.get(kind))
        });

        let gpu_pool = |kind: DescriptorHeapKind| -> HeapResult<Arc<GpuHeapPool<F>>> {
            let capacity = config
                .gpu_heap_sizes
                .get(kind)
                .ok_or(HeapError::NotShaderVisible(kind))?;
            GpuHeapPool::new(&*factory, kind, capacity)
        };
        let gpu = [
            gpu_pool(DescriptorHeapKind::CbvSrvUav)?,
            gpu_pool(DescriptorHeapKind::Sampler)?,
        ];

        Ok(Self { factory, cpu, gpu })
    }

    /// The heap factory.
    #[must_use]
    pub fn factory(&self) -> &Arc<F> {
        &self.factory
    }

    /// CPU-only pool for `kind`.
    #[must_use]
    pub fn cpu(&self, kind: DescriptorHeapKind) -> &Arc<CpuHeapPool<F>> {
        &self.cpu[kind.index()]
    }

    /// Shader-visible pool for `kind`, if that kind can be shader-visible.
    #[must_use]
    pub fn gpu(&self, kind: DescriptorHeapKind) -> Option<&Arc<GpuHeapPool<F>>> {
        match kind {
            DescriptorHeapKind::CbvSrvUav => Some(&self.gpu[0]),
            DescriptorHeapKind::Sampler => Some(&self.gpu[1]),
            DescriptorHeapKind::Rtv | DescriptorHeapKind::Dsv => None,
        }
    }

    /// Allocates from the CPU-only pool for `kind`.
    ///
    /// # Errors
    ///
    /// As [`CpuHeapPool::allocate`].
    pub fn allocate_cpu(&self, kind: DescriptorHeapKind, count: u32) -> HeapResult<AllocationHandle> {
        self.cpu(kind).allocate(count)
    }

    /// Allocates from the shader-visible heap for `kind`.
    ///
    /// # Errors
    ///
    /// [`HeapError::NotShaderVisible`] for RTV and DSV, otherwise as
    /// [`GpuHeapPool::allocate`].
    pub fn allocate_gpu(
        &self,
        kind: DescriptorHeapKind,
        count: u32,
    ) -> HeapResult<Option<AllocationHandle>> {
        self.gpu(kind)
            .ok_or(HeapError::NotShaderVisible(kind))?
            .allocate(count)
    }

    /// Sets the token attached to shader-visible handles freed by drop.
    pub fn set_release_token(&self, token: u64) {
        for pool in &self.gpu {
            pool.set_release_token(token);
        }
    }

    /// Retires stale ranges in every shader-visible heap. Returns the total
    /// number of ranges retired.
    ///
    /// # Errors
    ///
    /// Propagates the first double free discovered.
    pub fn release_stale_allocations(&self, completed_token: u64) -> HeapResult<usize> {
        let mut retired = 0;
        for pool in &self.gpu {
            retired += pool.release_stale_allocations(completed_token)?;
        }
        Ok(retired)
    }

    /// Usage of every pool, CPU pools first.
    #[must_use]
    pub fn stats(&self) -> Vec<HeapReport> {
        let cpu = self.cpu.iter().map(|pool| HeapReport {
            kind: pool.kind(),
            shader_visible: false,
            stats: pool.stats(),
        });
        let gpu = self.gpu.iter().map(|pool| HeapReport {
            kind: pool.kind(),
            shader_visible: true,
            stats: pool.stats(),
        });
        cpu.chain(gpu).collect()
    }
}

impl<F: HeapFactory> std::fmt::Debug for DescriptorHeaps<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DescriptorHeaps")
            .field("cpu", &self.cpu)
            .field("gpu", &self.gpu)
            .finish_non_exhaustive()
    }
}
