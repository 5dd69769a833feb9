//! Host-memory heap factory.
//!
//! Each heap is a zeroed byte buffer sized `capacity * stride`, so CPU
//! addresses are real and distinct between heaps. Shader-visible heaps get a
//! synthetic GPU virtual address from a bump counter.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use super::{CpuDescriptor, DescriptorHeapKind, GpuDescriptor, HeapFactory, HeapFlags};
use crate::error::{HeapError, HeapResult};

/// First synthetic GPU address handed out.
const GPU_VA_BASE: u64 = 0x1_0000_0000;
/// Synthetic GPU heaps are placed on 64 KiB boundaries.
const GPU_VA_ALIGNMENT: u64 = 64 * 1024;

/// A descriptor heap backed by host memory.
#[derive(Debug)]
pub struct HostHeap {
    storage: Box<[u8]>,
    kind: DescriptorHeapKind,
    capacity: u32,
    gpu_base: Option<GpuDescriptor>,
}

impl HostHeap {
    /// Heap kind.
    #[must_use]
    pub const fn kind(&self) -> DescriptorHeapKind {
        self.kind
    }

    /// Number of descriptor slots.
    #[must_use]
    pub const fn capacity(&self) -> u32 {
        self.capacity
    }

    /// Raw descriptor storage.
    #[must_use]
    pub fn bytes(&self) -> &[u8] {
        &self.storage
    }
}

/// [`HeapFactory`] that allocates heaps in host memory.
#[derive(Debug)]
pub struct HostHeapFactory {
    strides: [u32; 4],
    heap_limit: Option<usize>,
    heaps_created: AtomicUsize,
    next_gpu_va: AtomicU64,
}

impl HostHeapFactory {
    /// Creates a factory with typical desktop descriptor strides.
    #[must_use]
    pub fn new() -> Self {
        Self::with_strides([32, 32, 32, 8])
    }

    /// Creates a factory with explicit strides, indexed by
    /// [`DescriptorHeapKind::index`].
    ///
    /// # Panics
    ///
    /// Panics if any stride is zero.
    #[must_use]
    pub fn with_strides(strides: [u32; 4]) -> Self {
        assert!(strides.iter().all(|&s| s > 0), "Descriptor strides must be non-zero");
        Self {
            strides,
            heap_limit: None,
            heaps_created: AtomicUsize::new(0),
            next_gpu_va: AtomicU64::new(GPU_VA_BASE),
        }
    }

    /// Fails every heap creation after the first `limit`.
    #[must_use]
    pub const fn with_heap_limit(mut self, limit: usize) -> Self {
        self.heap_limit = Some(limit);
        self
    }

    /// Number of heaps created so far.
    #[must_use]
    pub fn heaps_created(&self) -> usize {
        self.heaps_created.load(Ordering::Relaxed)
    }
}

impl Default for HostHeapFactory {
    fn default() -> Self {
        Self::new()
    }
}

impl HeapFactory for HostHeapFactory {
    type Heap = HostHeap;

    fn create_heap(
        &self,
        kind: DescriptorHeapKind,
        capacity: u32,
        flags: HeapFlags,
    ) -> HeapResult<HostHeap> {
        let failure = |reason: String| HeapError::HeapCreation {
            kind,
            capacity,
            reason,
        };

        if flags.shader_visible && !kind.supports_shader_visible() {
            return Err(HeapError::NotShaderVisible(kind));
        }

        let bytes = usize::try_from(capacity)
            .ok()
            .and_then(|c| c.checked_mul(self.descriptor_stride(kind) as usize))
            .ok_or_else(|| failure("heap size overflows the address space".to_owned()))?;

        let created = self.heaps_created.fetch_add(1, Ordering::Relaxed);
        if let Some(limit) = self.heap_limit {
            if created >= limit {
                self.heaps_created.fetch_sub(1, Ordering::Relaxed);
                return Err(failure(format!("heap limit of {limit} reached")));
            }
        }

        let gpu_base = flags.shader_visible.then(|| {
            let span = (bytes as u64).div_ceil(GPU_VA_ALIGNMENT).max(1) * GPU_VA_ALIGNMENT;
            GpuDescriptor(self.next_gpu_va.fetch_add(span, Ordering::Relaxed))
        });

        Ok(HostHeap {
            storage: vec![0u8; bytes].into_boxed_slice(),
            kind,
            capacity,
            gpu_base,
        })
    }

    fn descriptor_stride(&self, kind: DescriptorHeapKind) -> u32 {
        self.strides[kind.index()]
    }

    fn cpu_base(&self, heap: &HostHeap) -> CpuDescriptor {
        CpuDescriptor(heap.storage.as_ptr() as usize)
    }

    fn gpu_base(&self, heap: &HostHeap) -> Option<GpuDescriptor> {
        heap.gpu_base
    }
}
