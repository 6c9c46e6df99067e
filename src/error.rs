use std::fmt;

/// Error taxonomy for the allocators in this crate.
///
/// Most call sites in this crate (and all of the C-ABI) don't carry this
/// type at all — they signal failure with a null pointer instead.
/// `AllocError` exists for the handful of internal APIs that can
/// usefully distinguish *why* an allocation failed.
#[derive(Debug, thiserror::Error)]
pub enum AllocError {
  /// The backing allocator (the host/system allocator, or a page
  /// source) refused to hand over memory.
  #[error("out of memory (requested {requested} bytes)")]
  OutOfMemory { requested: usize },

  /// A [`crate::freelist::FreelistAllocator`] request exceeded its
  /// largest configured bucket.
  #[error("requested size {requested} exceeds largest freelist bucket ({max} bytes)")]
  OutOfRange { requested: usize, max: usize },

  /// Debug-only: a [`crate::pool::BlockAllocatorPool`] was touched from
  /// a thread other than the one that created it.
  #[error("block allocator pool accessed from thread {actual:?}, expected {expected:?}")]
  ThreadMismatch {
    expected: std::thread::ThreadId,
    actual: std::thread::ThreadId,
  },
}

/// Not a true error: a request exceeded the pool's size-class ceiling
/// and was serviced by the system allocator instead. Kept as a distinct
/// (non-[`AllocError`]) type so callers can observe the fallback for
/// testing/instrumentation without treating it as failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SizeClassMiss {
  pub requested: usize,
  pub ceiling: usize,
}

impl fmt::Display for SizeClassMiss {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(
      f,
      "size {} exceeds pool ceiling {}, served by the system allocator",
      self.requested, self.ceiling
    )
  }
}
