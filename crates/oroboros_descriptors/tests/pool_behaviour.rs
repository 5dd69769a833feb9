//! Behavioural tests for the descriptor pools.
//!
//! Exercises the pools through the public API with host-memory heaps:
//! fixed GPU capacity, CPU growth, factory failures and the per-frame
//! release cycle.

use std::sync::Arc;

use oroboros_descriptors::{
    AllocationHandle, ChunkId, CpuHeapPool, DescriptorHeapConfig, DescriptorHeapKind,
    DescriptorHeaps, GpuHeapPool, HeapError, HostHeapFactory,
};

#[test]
fn test_gpu_pool_never_exceeds_capacity() {
    let factory = HostHeapFactory::new();
    let pool = GpuHeapPool::new(&factory, DescriptorHeapKind::CbvSrvUav, 64).unwrap();

    assert!(pool.allocate(65).unwrap().is_none());
    let all = pool.allocate(64).unwrap().unwrap();
    assert_eq!(all.count(), 64);
    assert_eq!(pool.stats().free(), 0);

    pool.free(all, 1).unwrap();
    pool.release_stale_allocations(1).unwrap();
}

#[test]
fn test_gpu_handles_map_slots_to_addresses() {
    let factory = HostHeapFactory::new();
    let pool = GpuHeapPool::new(&factory, DescriptorHeapKind::Sampler, 32).unwrap();

    let a = pool.allocate(4).unwrap().unwrap();
    let b = pool.allocate(2).unwrap().unwrap();

    let stride = u64::from(b.stride());
    let gpu_base = pool.gpu_base().unwrap().0;
    assert_eq!(b.gpu_handle(0).unwrap().0, gpu_base + 4 * stride);
    assert_eq!(b.gpu_handle(1).unwrap().0, gpu_base + 5 * stride);
    assert_eq!(b.cpu_handle(0).0, pool.cpu_base().0 + 4 * b.stride() as usize);

    drop(a);
    drop(b);
    pool.release_stale_allocations(0).unwrap();
}

#[test]
fn test_cpu_pool_grows_one_chunk_per_full_request() {
    let pool = CpuHeapPool::new(Arc::new(HostHeapFactory::new()), DescriptorHeapKind::CbvSrvUav, 16);

    let handles: Vec<_> = (0..3).map(|_| pool.allocate(16).unwrap()).collect();

    assert_eq!(pool.chunk_count(), 3);
    assert!(pool.available_chunks().is_empty());
    let chunks: Vec<_> = handles.iter().map(AllocationHandle::chunk_id).collect();
    assert_eq!(chunks, vec![ChunkId(0), ChunkId(1), ChunkId(2)]);

    drop(handles);
    assert_eq!(pool.available_chunks().len(), 3);
    assert_eq!(pool.stats().used, 0);
    assert_eq!(pool.stats().max_allocated, 48);
}

#[test]
fn test_factory_failure_propagates() {
    let factory = Arc::new(HostHeapFactory::new().with_heap_limit(1));
    let pool = CpuHeapPool::new(factory, DescriptorHeapKind::Dsv, 4);

    let first = pool.allocate(4).unwrap();
    let err = pool.allocate(1).unwrap_err();
    assert!(matches!(
        err,
        HeapError::HeapCreation {
            kind: DescriptorHeapKind::Dsv,
            ..
        }
    ));

    // Freeing makes room in the existing chunk again.
    drop(first);
    let again = pool.allocate(1).unwrap();
    assert_eq!(again.chunk_id(), ChunkId(0));
}

#[test]
fn test_handle_take_moves_ownership() {
    let pool = CpuHeapPool::new(Arc::new(HostHeapFactory::new()), DescriptorHeapKind::Rtv, 8);
    let mut original = pool.allocate(3).unwrap();

    let moved = original.take();
    assert!(original.is_null());
    assert_eq!(moved.count(), 3);

    drop(original);
    assert_eq!(pool.stats().used, 3);
    drop(moved);
    assert_eq!(pool.stats().used, 0);
}

#[test]
fn test_handle_outliving_pool_is_harmless() {
    let pool = CpuHeapPool::new(Arc::new(HostHeapFactory::new()), DescriptorHeapKind::Rtv, 8);
    let handle = pool.allocate(2).unwrap();
    drop(pool);
    drop(handle);
}

#[test]
fn test_registry_frame_cycle() {
    let config = DescriptorHeapConfig::from_toml_str(
        r#"
        [gpu_heap_sizes]
        cbv_srv_uav = 32
        sampler = 8
        "#,
    )
    .unwrap();
    let heaps = DescriptorHeaps::new(Arc::new(HostHeapFactory::new()), &config).unwrap();

    for frame in 1..=6u64 {
        heaps.set_release_token(frame);
        let table = heaps
            .allocate_gpu(DescriptorHeapKind::CbvSrvUav, 16)
            .unwrap()
            .unwrap();
        drop(table);

        // Two frames in flight.
        let completed = frame.saturating_sub(1);
        heaps.release_stale_allocations(completed).unwrap();
    }

    heaps.release_stale_allocations(6).unwrap();
    let report = heaps
        .stats()
        .into_iter()
        .find(|r| r.shader_visible && r.kind == DescriptorHeapKind::CbvSrvUav)
        .unwrap();
    assert_eq!(report.stats.used, 0);
    assert_eq!(report.stats.max_allocated, 32);
}

#[test]
fn test_gpu_pool_mixed_explicit_and_dropped_frees_return_all_slots() {
    let factory = HostHeapFactory::new();
    let pool = GpuHeapPool::new(&factory, DescriptorHeapKind::CbvSrvUav, 8).unwrap();

    let explicit = pool.allocate(2).unwrap().unwrap();
    let dropped = pool.allocate(2).unwrap().unwrap();
    let rejected = pool.allocate(2).unwrap().unwrap();

    // Explicit tokens run ahead of the pool's drop token.
    pool.free(explicit, 5).unwrap();
    drop(dropped);
    assert!(pool.free(rejected, 3).is_err());

    let stats = pool.stats();
    assert_eq!(stats.stale, 6);
    assert_eq!(stats.used + stats.free(), 8);

    pool.release_stale_allocations(u64::MAX).unwrap();
    assert_eq!(pool.stats().used, 0);
    let all = pool.allocate(8).unwrap().unwrap();
    pool.free(all, 6).unwrap();
    pool.release_stale_allocations(6).unwrap();
}
