//! # OROBOROS Descriptor Heaps
//!
//! Pooling of D3D12-style descriptor heaps on top of the range allocators in
//! `oroboros_alloc`.
//!
//! ## Layout
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                      DescriptorHeaps                         │
//! ├───────────────────────────────┬──────────────────────────────┤
//! │ CpuHeapPool (per kind)        │ GpuHeapPool (cbv/sampler)    │
//! │  chunk 0 ──┐                  │  one shader-visible heap     │
//! │  chunk 1 ──┼─ BlockAllocator  │  DeferredBlockAllocator      │
//! │  chunk n ──┘   immediate free │   frees wait on the fence    │
//! └───────────────────────────────┴──────────────────────────────┘
//!                  │                              │
//!                  └──────── AllocationHandle ────┘
//!                      (frees itself on drop)
//! ```
//!
//! ## Example
//!
//! ```rust,ignore
//! let config = DescriptorHeapConfig::from_file("config/descriptor_heaps.toml")?;
//! let heaps = DescriptorHeaps::new(Arc::new(backend_factory), &config)?;
//!
//! heaps.set_release_token(frame_fence_value);
//! let table = heaps
//!     .allocate_gpu(DescriptorHeapKind::CbvSrvUav, 8)?
//!     .ok_or(RenderError::DescriptorsExhausted)?;
//!
//! // ... end of frame, once the GPU has passed `completed`:
//! heaps.release_stale_allocations(completed)?;
//! ```

#![deny(missing_docs)]
#![deny(unsafe_code)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![deny(clippy::perf)]

pub mod chunk;
pub mod config;
pub mod cpu_pool;
pub mod error;
pub mod gpu_pool;
pub mod handle;
pub mod heap;
pub mod registry;
pub mod stats;

pub use chunk::{HeapChunk, ReleasePolicy};
pub use config::{CpuChunkSizes, DescriptorHeapConfig, GpuHeapSizes, MAX_SHADER_VISIBLE_SAMPLERS};
pub use cpu_pool::CpuHeapPool;
pub use error::{HeapError, HeapResult};
pub use gpu_pool::GpuHeapPool;
pub use handle::{AllocationHandle, ChunkId, DescriptorOwner};
pub use heap::{
    CpuDescriptor, DescriptorHeapKind, GpuDescriptor, HeapFactory, HeapFlags, HostHeap,
    HostHeapFactory,
};
pub use registry::{DescriptorHeaps, HeapReport};
pub use stats::PoolStats;
