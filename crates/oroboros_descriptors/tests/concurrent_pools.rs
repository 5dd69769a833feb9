//! Multi-threaded tests for the descriptor pools.
//!
//! Handles are allocated and dropped from several threads at once; the
//! slots held at the end must never overlap and every slot must come back.

use std::sync::{Arc, Barrier};
use std::thread;

use oroboros_descriptors::{
    AllocationHandle, CpuHeapPool, DescriptorHeapKind, GpuHeapPool, HostHeapFactory,
};

const THREADS: usize = 8;
const ITERATIONS: usize = 200;

/// Byte range covered by a handle's CPU addresses.
fn cpu_span(handle: &AllocationHandle) -> (usize, usize) {
    let start = handle.cpu_handle(0).0;
    (start, start + handle.count() as usize * handle.stride() as usize)
}

fn assert_disjoint(handles: &[AllocationHandle]) {
    let mut spans: Vec<_> = handles.iter().map(cpu_span).collect();
    spans.sort_unstable();
    for pair in spans.windows(2) {
        assert!(pair[0].1 <= pair[1].0, "overlapping handles {pair:?}");
    }
}

#[test]
fn test_cpu_pool_shared_between_threads() {
    let pool = CpuHeapPool::new(Arc::new(HostHeapFactory::new()), DescriptorHeapKind::CbvSrvUav, 64);
    let barrier = Arc::new(Barrier::new(THREADS));

    let workers: Vec<_> = (0..THREADS)
        .map(|t| {
            let pool = Arc::clone(&pool);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                let mut kept = Vec::new();
                for i in 0..ITERATIONS {
                    let count = u32::try_from((i + t) % 7 + 1).unwrap();
                    let handle = pool.allocate(count).unwrap();
                    assert_eq!(handle.count(), count);
                    if i % 3 == 0 {
                        kept.push(handle);
                    } else if i % 3 == 1 {
                        pool.free(handle).unwrap();
                    }
                    // Otherwise dropped here.
                }
                kept
            })
        })
        .collect();

    let kept: Vec<AllocationHandle> = workers
        .into_iter()
        .flat_map(|w| w.join().unwrap())
        .collect();

    assert_disjoint(&kept);
    let held: u64 = kept.iter().map(|h| u64::from(h.count())).sum();
    assert_eq!(pool.stats().used, held);

    drop(kept);
    let stats = pool.stats();
    assert_eq!(stats.used, 0);
    assert_eq!(pool.available_chunks().len(), stats.chunks);
}

#[test]
fn test_gpu_pool_shared_between_threads() {
    let factory = HostHeapFactory::new();
    let pool = GpuHeapPool::new(&factory, DescriptorHeapKind::CbvSrvUav, 4096).unwrap();
    pool.set_release_token(1);

    let workers: Vec<_> = (0..THREADS)
        .map(|_| {
            let pool = Arc::clone(&pool);
            thread::spawn(move || {
                let mut kept = Vec::new();
                for i in 0..ITERATIONS {
                    // Small requests: 8 threads never exhaust 4096 slots.
                    let handle = pool.allocate(2).unwrap().unwrap();
                    if i % 2 == 0 {
                        kept.push(handle);
                    }
                }
                kept
            })
        })
        .collect();

    let kept: Vec<AllocationHandle> = workers
        .into_iter()
        .flat_map(|w| w.join().unwrap())
        .collect();
    assert_disjoint(&kept);

    // Dropped handles are still reserved until their token retires.
    let stats = pool.stats();
    assert_eq!(stats.used, (THREADS * ITERATIONS * 2) as u64);
    assert_eq!(stats.stale, (THREADS * (ITERATIONS / 2) * 2) as u64);

    drop(kept);
    pool.release_stale_allocations(1).unwrap();
    assert_eq!(pool.stats().used, 0);
}
