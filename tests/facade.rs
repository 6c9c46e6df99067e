//! End-to-end exercise of the crate's public surface the way an
//! external consumer would use it: the C-ABI pair, the typed adapter,
//! and the freelist/linear allocators composed together.

use blockpool::{FreelistAllocator, LinearAllocator};
use blockpool::facade::{PoolAllocator, mm_alloc, mm_free};
use blockpool::pool;

fn init_logging() {
  let _ = env_logger::builder().is_test(true).try_init();
}

#[test]
fn c_abi_round_trip_across_many_sizes() {
  init_logging();
  for &size in &[1usize, 16, 96, 97, 512, 1024, 4096] {
    unsafe {
      let p = mm_alloc(size);
      assert!(!p.is_null(), "mm_alloc({size}) returned null");
      std::ptr::write_bytes(p, 0x5a, size);
      mm_free(p, size);
    }
  }
}

#[test]
fn typed_adapter_works_with_a_vec_like_usage() {
  let adapter: PoolAllocator<u32> = PoolAllocator::new();
  let p = adapter.allocate(16);
  assert!(!p.is_null());
  unsafe {
    for i in 0..16u32 {
      p.add(i as usize).write(i);
    }
    for i in 0..16u32 {
      assert_eq!(p.add(i as usize).read(), i);
    }
  }
  adapter.deallocate(p, 16);
}

#[test]
fn linear_allocator_over_a_freelist_backing_releases_everything_on_drop() {
  init_logging();
  let mut backing = FreelistAllocator::new(9, 17);
  {
    let mut arena = LinearAllocator::with_backing(&mut backing);
    for _ in 0..64 {
      let p = arena.allocate(48);
      assert!(!p.is_null());
    }
    assert!(arena.page_count() >= 1);
    blockpool::stats::log_linear_stats(&arena);
  }
  // The arena's Drop returned its pages to `backing`; a fresh
  // allocation from the same bucket should reuse that space.
  blockpool::stats::log_freelist_stats(&backing);
  let p = backing.allocate(48);
  assert!(!p.is_null());
  backing.free(p, 48);
}

#[test]
fn pool_allocate_then_finalize_then_allocate_again() {
  pool::finalize();
  let p = pool::allocate(64);
  assert!(!p.is_null());
  pool::free(p, 64);
  pool::finalize();
  let q = pool::allocate(64);
  assert!(!q.is_null());
  pool::free(q, 64);
}
