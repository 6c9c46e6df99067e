//! Thread-local size-class dispatcher (the façade's workhorse).
//!
//! `BlockAllocatorPool` routes a request of `size` bytes to one of a
//! fixed set of `BlockAllocator`s when `size` is small enough, and to
//! the system allocator otherwise. Every piece of its state — the
//! lookup table, the allocator array, the pool itself — is thread-local;
//! each thread that touches it builds its own copy lazily on first use.

use std::cell::RefCell;
use std::mem;
use std::ptr;
use std::thread::{self, ThreadId};

use libc::c_void;

use crate::align_to;
use crate::block::BlockAllocator;
use crate::error::SizeClassMiss;

/// Page size every class allocator in the pool is configured with.
pub const PAGE_SIZE: usize = 8192;
/// Block alignment every class allocator in the pool is configured with.
pub const ALIGNMENT: usize = 4;

/// Size-class boundaries: 4-byte steps to 96, 32-byte steps to 640,
/// 64-byte steps to 1024. This sequence is sometimes quoted as "46
/// classes", but counting the actual boundaries gives 47 — we match
/// the boundaries, not the miscounted total (see `DESIGN.md`).
pub const BLOCK_SIZES: [u32; 47] = [
  4, 8, 12, 16, 20, 24, 28, 32, 36, 40, 44, 48, 52, 56, 60, 64, 68, 72, 76, 80, 84, 88, 92, 96,
  128, 160, 192, 224, 256, 288, 320, 352, 384, 416, 448, 480, 512, 544, 576, 608, 640, 704, 768,
  832, 896, 960, 1024,
];

/// Largest size this pool will service from a class allocator; anything
/// bigger falls through to the system allocator.
pub const MAX_BLOCK_SIZE: usize = BLOCK_SIZES[BLOCK_SIZES.len() - 1] as usize;

struct PoolInner {
  size_to_class: Vec<u16>,
  allocators: Vec<BlockAllocator>,
  creator: ThreadId,
}

impl PoolInner {
  fn new() -> Self {
    let mut size_to_class = vec![0u16; MAX_BLOCK_SIZE + 1];
    let mut class = 0usize;
    for (i, slot) in size_to_class.iter_mut().enumerate() {
      if i as u32 > BLOCK_SIZES[class] {
        class += 1;
      }
      *slot = class as u16;
    }

    let allocators = BLOCK_SIZES
      .iter()
      .map(|&sz| BlockAllocator::new(sz as usize, PAGE_SIZE, ALIGNMENT))
      .collect();

    Self {
      size_to_class,
      allocators,
      creator: thread::current().id(),
    }
  }

  #[inline]
  fn check_thread(&self) {
    if cfg!(debug_assertions) {
      let actual = thread::current().id();
      debug_assert_eq!(
        actual, self.creator,
        "BlockAllocatorPool touched from a thread other than its creator"
      );
    }
  }

  fn class_for(&self, size: usize) -> Option<usize> {
    if size <= MAX_BLOCK_SIZE {
      Some(self.size_to_class[size] as usize)
    } else {
      None
    }
  }

  fn allocate(&mut self, size: usize) -> *mut u8 {
    self.check_thread();
    match self.class_for(size) {
      Some(idx) => self.allocators[idx].allocate(),
      None => {
        let miss = SizeClassMiss {
          requested: size,
          ceiling: MAX_BLOCK_SIZE,
        };
        log::debug!("{miss}, falling back to the system allocator");
        unsafe { system_malloc(size) }
      }
    }
  }

  fn free(&mut self, p: *mut u8, size: usize) {
    self.check_thread();
    if p.is_null() {
      return;
    }
    match self.class_for(size) {
      Some(idx) => self.allocators[idx].free(p),
      None => unsafe { system_free(p) },
    }
  }
}

unsafe fn system_malloc(size: usize) -> *mut u8 {
  unsafe { libc::malloc(size) as *mut u8 }
}

unsafe fn system_free(p: *mut u8) {
  unsafe { libc::free(p as *mut c_void) }
}

thread_local! {
  static POOL: RefCell<Option<PoolInner>> = const { RefCell::new(None) };
}

fn with_pool<R>(f: impl FnOnce(&mut PoolInner) -> R) -> R {
  POOL.with(|cell| {
    let mut slot = cell.borrow_mut();
    if slot.is_none() {
      *slot = Some(PoolInner::new());
    }
    f(slot.as_mut().unwrap())
  })
}

/// Returns a pointer to at least `size` bytes. Sizes at or below
/// [`MAX_BLOCK_SIZE`] are serviced from this thread's class allocators;
/// larger requests fall back to the system allocator. Returns null on
/// allocation failure.
pub fn allocate(size: usize) -> *mut u8 {
  with_pool(|pool| pool.allocate(size))
}

/// Releases a pointer previously returned by [`allocate`]. `size` must
/// match the size originally requested.
pub fn free(p: *mut u8, size: usize) {
  with_pool(|pool| pool.free(p, size));
}

/// Header stashed immediately before the pointer returned by
/// [`allocate_aligned`], recording how to recover the real allocation.
/// The pointer `allocate_aligned` hands back is not the pointer the
/// underlying allocator gave out, so it cannot be paired with `free`
/// directly.
#[repr(C)]
struct AlignHeader {
  /// Byte offset from the raw allocation back to this header.
  raw_offset: usize,
  /// Total size requested of the underlying allocator, needed to
  /// route `free_aligned` back to the same size class.
  gross_size: usize,
}

const ALIGN_HEADER_SIZE: usize = mem::size_of::<AlignHeader>();

/// Returns a pointer to at least `size` bytes aligned to `alignment`.
/// The returned pointer is **not** interchangeable with [`free`] — it
/// must be released with [`free_aligned`] using the same `size` and
/// `alignment`.
pub fn allocate_aligned(size: usize, alignment: usize) -> *mut u8 {
  debug_assert!(alignment > 0 && (alignment & (alignment - 1)) == 0);

  let gross = size + alignment + ALIGN_HEADER_SIZE;
  let raw = allocate(gross);
  if raw.is_null() {
    return ptr::null_mut();
  }

  let raw_addr = raw as usize;
  let min_addr = raw_addr + ALIGN_HEADER_SIZE;
  let aligned_addr = align_to!(min_addr, alignment);
  let offset = aligned_addr - raw_addr;

  unsafe {
    let header = (aligned_addr as *mut AlignHeader).sub(1);
    header.write(AlignHeader {
      raw_offset: offset,
      gross_size: gross,
    });
  }

  aligned_addr as *mut u8
}

/// Releases a pointer previously returned by [`allocate_aligned`].
/// Passing a pointer obtained from [`allocate`] here (or vice versa) is
/// a logic error; in debug builds the header's recovered `gross_size`
/// is sanity-checked against `size + alignment + header size` before
/// the release is allowed through.
pub fn free_aligned(p: *mut u8, size: usize, alignment: usize) {
  if p.is_null() {
    return;
  }

  unsafe {
    let header = (p as *mut AlignHeader).sub(1);
    let AlignHeader {
      raw_offset,
      gross_size,
    } = header.read();

    debug_assert_eq!(
      gross_size,
      size + alignment + ALIGN_HEADER_SIZE,
      "free_aligned called with a (size, alignment) that doesn't match the original allocate_aligned call"
    );

    let raw = (p as usize - raw_offset) as *mut u8;
    free(raw, gross_size);
  }
}

/// Releases this thread's allocator array and lookup table. A
/// subsequent `allocate`/`free` on this thread lazily rebuilds them.
pub fn finalize() {
  POOL.with(|cell| {
    *cell.borrow_mut() = None;
  });
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn small_allocation_round_trip() {
    finalize();
    let p = allocate(20);
    assert!(!p.is_null());
    assert_eq!((p as usize) % 4, 0);
    unsafe {
      ptr::write_bytes(p, 0xAB, 20);
    }
    free(p, 20);
    let q = allocate(20);
    assert_eq!(p, q);
    free(q, 20);
    finalize();
  }

  #[test]
  fn size_class_boundaries() {
    finalize();
    with_pool(|pool| {
      assert_eq!(BLOCK_SIZES[pool.class_for(96).unwrap()], 96);
      assert_eq!(BLOCK_SIZES[pool.class_for(97).unwrap()], 128);
      assert_eq!(BLOCK_SIZES[pool.class_for(1024).unwrap()], 1024);
      assert!(pool.class_for(1025).is_none());
    });
    finalize();
  }

  #[test]
  fn oversize_falls_back_to_system_allocator() {
    finalize();
    let p = allocate(1025);
    assert!(!p.is_null());
    unsafe {
      ptr::write_bytes(p, 0x11, 1025);
    }
    free(p, 1025);
    finalize();
  }

  #[test]
  fn size_to_class_is_monotonic_and_covers_boundaries() {
    finalize();
    with_pool(|pool| {
      for i in 0..MAX_BLOCK_SIZE {
        let a = pool.class_for(i).unwrap();
        let b = pool.class_for(i + 1).unwrap();
        assert!(a <= b);
        assert!(BLOCK_SIZES[a] as usize >= i);
      }
    });
    finalize();
  }

  #[test]
  fn aligned_allocate_round_trips_through_free_aligned() {
    finalize();
    for &align in &[8usize, 16, 32, 64] {
      let p = allocate_aligned(50, align);
      assert!(!p.is_null());
      assert_eq!((p as usize) % align, 0);
      unsafe {
        ptr::write_bytes(p, 0x42, 50);
      }
      free_aligned(p, 50, align);
    }
    finalize();
  }
}
