//! # Native Heap Model
//!
//! The pools never talk to a graphics device directly. They create heaps and
//! read their base addresses through [`HeapFactory`], which the renderer
//! backend implements. [`HostHeapFactory`] backs heaps with host memory for
//! tests and tools.

mod host;

pub use host::{HostHeap, HostHeapFactory};

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::HeapResult;

/// Kinds of descriptor heap.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DescriptorHeapKind {
    /// Constant buffer, shader resource and unordered access views.
    CbvSrvUav,
    /// Samplers.
    Sampler,
    /// Render target views.
    Rtv,
    /// Depth stencil views.
    Dsv,
}

impl DescriptorHeapKind {
    /// Every heap kind, in index order.
    pub const ALL: [Self; 4] = [Self::CbvSrvUav, Self::Sampler, Self::Rtv, Self::Dsv];

    /// Heap kinds that may be bound to shaders.
    pub const SHADER_VISIBLE: [Self; 2] = [Self::CbvSrvUav, Self::Sampler];

    /// Stable index into per-kind tables.
    #[inline]
    #[must_use]
    pub const fn index(self) -> usize {
        match self {
            Self::CbvSrvUav => 0,
            Self::Sampler => 1,
            Self::Rtv => 2,
            Self::Dsv => 3,
        }
    }

    /// Whether heaps of this kind can be shader-visible.
    #[inline]
    #[must_use]
    pub const fn supports_shader_visible(self) -> bool {
        matches!(self, Self::CbvSrvUav | Self::Sampler)
    }

    /// Short lowercase name, as used in config files.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::CbvSrvUav => "cbv_srv_uav",
            Self::Sampler => "sampler",
            Self::Rtv => "rtv",
            Self::Dsv => "dsv",
        }
    }
}

impl fmt::Display for DescriptorHeapKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Creation flags for a native heap.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct HeapFlags {
    /// Heap can be bound to shaders and has a GPU base address.
    pub shader_visible: bool,
}

impl HeapFlags {
    /// CPU-only staging heap.
    pub const NONE: Self = Self {
        shader_visible: false,
    };

    /// Shader-visible heap.
    pub const SHADER_VISIBLE: Self = Self {
        shader_visible: true,
    };
}

/// CPU address of a descriptor slot.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CpuDescriptor(pub usize);

impl CpuDescriptor {
    /// Address `index` slots past this one.
    #[inline]
    #[must_use]
    pub const fn offset(self, index: u32, stride: u32) -> Self {
        Self(self.0 + index as usize * stride as usize)
    }
}

/// GPU virtual address of a descriptor slot.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GpuDescriptor(pub u64);

impl GpuDescriptor {
    /// Address `index` slots past this one.
    #[inline]
    #[must_use]
    pub const fn offset(self, index: u32, stride: u32) -> Self {
        Self(self.0 + index as u64 * stride as u64)
    }
}

/// Creates native descriptor heaps and reports their layout.
///
/// Implemented by the renderer backend. The pools hold the returned heap for
/// their whole lifetime and never share it.
pub trait HeapFactory: Send + Sync + 'static {
    /// Native heap resource.
    type Heap: Send + Sync;

    /// Creates a heap of `capacity` descriptors.
    ///
    /// # Errors
    ///
    /// Returns [`HeapError::HeapCreation`](crate::HeapError::HeapCreation)
    /// if the device cannot create the heap.
    fn create_heap(
        &self,
        kind: DescriptorHeapKind,
        capacity: u32,
        flags: HeapFlags,
    ) -> HeapResult<Self::Heap>;

    /// Size in bytes of one descriptor of `kind`.
    fn descriptor_stride(&self, kind: DescriptorHeapKind) -> u32;

    /// CPU address of the heap's first slot.
    fn cpu_base(&self, heap: &Self::Heap) -> CpuDescriptor;

    /// GPU address of the heap's first slot; `None` unless shader-visible.
    fn gpu_base(&self, heap: &Self::Heap) -> Option<GpuDescriptor>;
}
