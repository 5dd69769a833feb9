//! # Allocation Handles
//!
//! A handle owns a contiguous run of descriptor slots. It is move-only and
//! gives its slots back when dropped.
//!
//! The handle keeps only a weak back-reference to the pool that issued it.
//! Dropping a handle after its pool is gone is a no-op.
//!
//! ```text
//!   AllocationHandle ──Weak──> dyn DescriptorOwner
//!                                 ├── CpuHeapPool  (immediate free)
//!                                 └── GpuHeapPool  (free deferred to a release token)
//! ```

use std::fmt;
use std::sync::Weak;

use crate::error::HeapResult;
use crate::heap::{CpuDescriptor, GpuDescriptor};

/// Identifies a heap chunk within its pool.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChunkId(pub u32);

impl fmt::Display for ChunkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A pool that can take back a dropped [`AllocationHandle`].
///
/// Each owner decides whether the slots become reusable immediately or only
/// after a release token retires.
pub trait DescriptorOwner: Send + Sync {
    /// Returns the handle's slots to the pool.
    ///
    /// # Errors
    ///
    /// Returns an error if the handle does not belong to this owner.
    fn reclaim(&self, handle: &AllocationHandle) -> HeapResult<()>;
}

/// Move-only ownership of `count` contiguous descriptor slots.
///
/// A null handle owns nothing. [`AllocationHandle::take`] moves the slots
/// out and leaves a null handle behind.
pub struct AllocationHandle {
    first_cpu: CpuDescriptor,
    first_gpu: Option<GpuDescriptor>,
    count: u32,
    stride: u32,
    chunk: ChunkId,
    owner: Option<Weak<dyn DescriptorOwner>>,
}

impl AllocationHandle {
    pub(crate) fn new(
        first_cpu: CpuDescriptor,
        first_gpu: Option<GpuDescriptor>,
        count: u32,
        stride: u32,
        chunk: ChunkId,
        owner: Weak<dyn DescriptorOwner>,
    ) -> Self {
        Self {
            first_cpu,
            first_gpu,
            count,
            stride,
            chunk,
            owner: Some(owner),
        }
    }

    /// A handle that owns nothing.
    #[must_use]
    pub const fn null() -> Self {
        Self {
            first_cpu: CpuDescriptor(0),
            first_gpu: None,
            count: 0,
            stride: 0,
            chunk: ChunkId(0),
            owner: None,
        }
    }

    /// Whether this handle owns nothing.
    #[inline]
    #[must_use]
    pub const fn is_null(&self) -> bool {
        self.owner.is_none()
    }

    /// Moves the slots into a new handle, leaving this one null.
    #[must_use]
    pub fn take(&mut self) -> Self {
        std::mem::take(self)
    }

    /// CPU address of slot `index`.
    ///
    /// # Panics
    ///
    /// Panics if `index >= count()`.
    #[must_use]
    pub fn cpu_handle(&self, index: u32) -> CpuDescriptor {
        assert!(
            index < self.count,
            "descriptor index {index} out of range for {} slots",
            self.count
        );
        self.first_cpu.offset(index, self.stride)
    }

    /// GPU address of slot `index`, if the heap is shader-visible.
    ///
    /// # Panics
    ///
    /// Panics if `index >= count()`.
    #[must_use]
    pub fn gpu_handle(&self, index: u32) -> Option<GpuDescriptor> {
        assert!(
            index < self.count,
            "descriptor index {index} out of range for {} slots",
            self.count
        );
        self.first_gpu.map(|gpu| gpu.offset(index, self.stride))
    }

    /// Number of slots owned.
    #[inline]
    #[must_use]
    pub const fn count(&self) -> u32 {
        self.count
    }

    /// Size in bytes of one slot.
    #[inline]
    #[must_use]
    pub const fn stride(&self) -> u32 {
        self.stride
    }

    /// Chunk the slots live in.
    #[inline]
    #[must_use]
    pub const fn chunk_id(&self) -> ChunkId {
        self.chunk
    }

    /// Whether the slots have GPU addresses.
    #[inline]
    #[must_use]
    pub const fn is_shader_visible(&self) -> bool {
        self.first_gpu.is_some()
    }

    /// CPU address of the first slot.
    #[inline]
    pub(crate) const fn first_cpu(&self) -> CpuDescriptor {
        self.first_cpu
    }

    /// Whether `owner` points at the pool that issued this handle.
    pub(crate) fn is_owned_by<T>(&self, owner: &T) -> bool {
        self.owner.as_ref().is_some_and(|weak| {
            std::ptr::eq(weak.as_ptr().cast::<()>(), (owner as *const T).cast::<()>())
        })
    }

    /// Forgets the owner without returning the slots and nulls the handle.
    pub(crate) fn detach(&mut self) {
        self.owner = None;
        self.first_cpu = CpuDescriptor(0);
        self.first_gpu = None;
        self.count = 0;
    }
}

impl Default for AllocationHandle {
    fn default() -> Self {
        Self::null()
    }
}

impl fmt::Debug for AllocationHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AllocationHandle")
            .field("first_cpu", &self.first_cpu)
            .field("first_gpu", &self.first_gpu)
            .field("count", &self.count)
            .field("stride", &self.stride)
            .field("chunk", &self.chunk)
            .field("null", &self.is_null())
            .finish()
    }
}

impl Drop for AllocationHandle {
    fn drop(&mut self) {
        let Some(owner) = self.owner.take() else {
            return;
        };
        match owner.upgrade() {
            Some(owner) => {
                if let Err(err) = owner.reclaim(self) {
                    tracing::error!(%err, chunk = %self.chunk, count = self.count, "failed to reclaim descriptors");
                }
            }
            None => {
                tracing::warn!(chunk = %self.chunk, count = self.count, "descriptor handle outlived its heap pool");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::sync::Arc;

    #[derive(Default)]
    struct RecordingOwner {
        reclaimed: Mutex<Vec<(usize, u32)>>,
    }

    impl DescriptorOwner for RecordingOwner {
        fn reclaim(&self, handle: &AllocationHandle) -> HeapResult<()> {
            self.reclaimed
                .lock()
                .push((handle.first_cpu().0, handle.count()));
            Ok(())
        }
    }

    fn handle_for(owner: &Arc<RecordingOwner>, count: u32) -> AllocationHandle {
        let weak: Weak<dyn DescriptorOwner> = Arc::downgrade(owner) as Weak<dyn DescriptorOwner>;
        AllocationHandle::new(CpuDescriptor(0x100), Some(GpuDescriptor(0x9000)), count, 16, ChunkId(2), weak)
    }

    #[test]
    fn test_drop_returns_slots_once() {
        let owner = Arc::new(RecordingOwner::default());
        drop(handle_for(&owner, 4));
        assert_eq!(*owner.reclaimed.lock(), vec![(0x100, 4)]);
    }

    #[test]
    fn test_take_leaves_null_behind() {
        let owner = Arc::new(RecordingOwner::default());
        let mut handle = handle_for(&owner, 4);
        let moved = handle.take();
        assert!(handle.is_null());
        assert!(!moved.is_null());

        drop(handle);
        assert!(owner.reclaimed.lock().is_empty());
        drop(moved);
        assert_eq!(owner.reclaimed.lock().len(), 1);
    }

    #[test]
    fn test_slot_addresses_use_stride() {
        let owner = Arc::new(RecordingOwner::default());
        let handle = handle_for(&owner, 4);
        assert_eq!(handle.cpu_handle(3), CpuDescriptor(0x100 + 48));
        assert_eq!(handle.gpu_handle(1), Some(GpuDescriptor(0x9010)));
        assert!(handle.is_shader_visible());
        assert!(handle.is_owned_by(&*owner));
    }

    #[test]
    #[should_panic(expected = "out of range")]
    fn test_slot_index_checked() {
        let owner = Arc::new(RecordingOwner::default());
        let handle = handle_for(&owner, 2);
        let _ = handle.cpu_handle(2);
    }

    #[test]
    fn test_drop_after_owner_gone_is_noop() {
        let owner = Arc::new(RecordingOwner::default());
        let handle = handle_for(&owner, 1);
        drop(owner);
        drop(handle);
    }
}
