//! # OROBOROS Range Allocators
//!
//! Offset/size allocators over an abstract linear space. These know nothing
//! about heaps or GPUs; `oroboros_descriptors` maps their offsets onto
//! descriptor heap slots.
//!
//! ## Allocators
//!
//! 1. [`BlockAllocator`] - best-fit free list with coalescing and growth
//! 2. [`DeferredBlockAllocator`] - frees wait on a release token before reuse
//!
//! ## Example
//!
//! ```rust,ignore
//! use oroboros_alloc::DeferredBlockAllocator;
//!
//! let mut heap = DeferredBlockAllocator::new(1024);
//! let range = heap.allocate(16, 1)?.expect("fits");
//!
//! // GPU work submitted with fence value 42 may still read the range.
//! heap.free(range.offset, range.size, 42)?;
//!
//! // Later, once the fence has reached 42:
//! heap.release_stale_allocations(42)?;
//! ```

#![deny(missing_docs)]
#![deny(unsafe_code)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![deny(clippy::perf)]

pub mod block;
pub mod deferred;
pub mod error;

pub use block::{Allocation, Block, BlockAllocator};
pub use deferred::{DeferredBlockAllocator, StaleAllocation};
pub use error::{AllocError, AllocResult};
