//! Behavioural tests for the block allocators.
//!
//! Covers coalescing, alignment, best-fit selection, deferred release
//! ordering and growth through the public API only.

use oroboros_alloc::{AllocError, BlockAllocator, DeferredBlockAllocator};

#[test]
fn test_coalescing_two_adjacent_blocks() {
    let mut allocator = BlockAllocator::new(100);
    let a = allocator.allocate(10, 1).unwrap().unwrap();
    let b = allocator.allocate(20, 1).unwrap().unwrap();
    assert_eq!(a.offset, 0);
    assert_eq!(b.offset, 10);

    allocator.free(a.offset, a.size).unwrap();
    allocator.free(b.offset, b.size).unwrap();

    let blocks: Vec<_> = allocator.free_blocks().collect();
    assert_eq!(blocks.len(), 1);
    assert_eq!((blocks[0].offset, blocks[0].size), (0, 100));
}

#[test]
fn test_aligned_allocation_from_fresh_allocator() {
    let mut allocator = BlockAllocator::new(256);
    let a = allocator.allocate(5, 16).unwrap().unwrap();
    assert_eq!(a.aligned_offset % 16, 0);
    assert_eq!(a.offset, 0);
    assert_eq!(a.size, 16);
}

#[test]
fn test_mixed_alignments_stay_aligned() {
    let mut allocator = BlockAllocator::new(4096);
    let mut live = Vec::new();
    for (size, alignment) in [(3, 1), (40, 64), (7, 2), (100, 32), (1, 256)] {
        let a = allocator.allocate(size, alignment).unwrap().unwrap();
        assert_eq!(a.aligned_offset % alignment, 0, "size {size} align {alignment}");
        live.push(a);
    }
    allocator.check_invariants().unwrap();
    for a in live.into_iter().rev() {
        allocator.free(a.offset, a.size).unwrap();
    }
    assert!(allocator.is_empty());
    assert_eq!(allocator.num_free_blocks(), 1);
}

#[test]
fn test_best_fit_prefers_smallest_sufficient_block() {
    let mut allocator = BlockAllocator::new(200);
    // Carve free holes of 8, 32 and 16 separated by live one-unit fences.
    let mut holes = Vec::new();
    for size in [8, 32, 16] {
        holes.push(allocator.allocate(size, 1).unwrap().unwrap());
        allocator.allocate(1, 1).unwrap().unwrap();
    }
    let tail = allocator.free_size();
    allocator.allocate(tail, 1).unwrap().unwrap();
    for hole in &holes {
        allocator.free(hole.offset, hole.size).unwrap();
    }

    let chosen = allocator.allocate(10, 1).unwrap().unwrap();
    assert_eq!(chosen.offset, holes[2].offset);
    assert_ne!(chosen.offset, holes[1].offset);
}

#[test]
fn test_deferred_release_retires_prefix() {
    let mut allocator = DeferredBlockAllocator::new(64);
    for token in [5, 6, 7] {
        let a = allocator.allocate(4, 1).unwrap().unwrap();
        allocator.free(a.offset, a.size, token).unwrap();
    }

    assert_eq!(allocator.release_stale_allocations(6).unwrap(), 2);
    let pending: Vec<_> = allocator.stale_allocations().map(|s| s.release_token).collect();
    assert_eq!(pending, vec![7]);

    allocator.release_stale_allocations(7).unwrap();
}

#[test]
fn test_deferred_out_of_order_tokens_rejected() {
    let mut allocator = DeferredBlockAllocator::new(64);
    let ranges: Vec<_> = (0..3)
        .map(|_| allocator.allocate(4, 1).unwrap().unwrap())
        .collect();
    allocator.free(ranges[0].offset, ranges[0].size, 5).unwrap();
    allocator.free(ranges[1].offset, ranges[1].size, 7).unwrap();
    assert!(matches!(
        allocator.free(ranges[2].offset, ranges[2].size, 6),
        Err(AllocError::TokenRegression { token: 6, last: 7 })
    ));
    allocator.release_stale_allocations(7).unwrap();
}

#[test]
fn test_extend_then_allocate_across_old_end() {
    let mut allocator = BlockAllocator::new(16);
    let a = allocator.allocate(8, 1).unwrap().unwrap();
    assert_eq!(allocator.allocate(16, 1).unwrap(), None);

    allocator.extend(16).unwrap();
    let b = allocator.allocate(16, 1).unwrap().unwrap();
    assert_eq!(b.offset, 8);

    allocator.free(a.offset, a.size).unwrap();
    allocator.free(b.offset, b.size).unwrap();
    assert_eq!(allocator.max_free_block_size(), 32);
}
