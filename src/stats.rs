//! Human-readable reporting for the allocators' byte counters.

use crate::freelist::FreelistAllocator;
use crate::linear::LinearAllocator;

/// Splits a byte count into a `(value, unit)` pair scaled for display:
/// bytes below 2000 stay as bytes, below 2,000,000 are shown in KB
/// (divide by 1024), otherwise in MB (divide by 1,048,576).
pub fn humanize(value: usize) -> (f32, &'static str) {
  if value < 2_000 {
    (value as f32, "B")
  } else if value < 2_000_000 {
    (value as f32 / 1024.0, "KB")
  } else {
    (value as f32 / 1_048_576.0, "MB")
  }
}

/// Logs a one-line summary of a [`FreelistAllocator`]'s counters at
/// `info` level.
pub fn log_freelist_stats(alloc: &FreelistAllocator) {
  let (allocated, allocated_unit) = humanize(alloc.total_allocated());
  let (wasted, wasted_unit) = humanize(alloc.wasted_space());
  log::info!(
    "freelist allocator: {} buffers carved, {:.2}{} allocated, {:.2}{} wasted",
    alloc.page_count(),
    allocated,
    allocated_unit,
    wasted,
    wasted_unit
  );
}

/// Logs a one-line summary of a [`LinearAllocator`]'s counters at
/// `info` level.
pub fn log_linear_stats(alloc: &LinearAllocator) {
  let (wasted, wasted_unit) = humanize(alloc.wasted_space());
  log::info!(
    "linear allocator: {} pages, {:.2}{} wasted",
    alloc.page_count(),
    wasted,
    wasted_unit
  );
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn humanize_picks_the_right_unit() {
    assert_eq!(humanize(500), (500.0, "B"));
    assert_eq!(humanize(1999), (1999.0, "B"));
    let (v, u) = humanize(2048);
    assert_eq!(u, "KB");
    assert!((v - 2.0).abs() < 1e-6);
    let (v, u) = humanize(3_145_728);
    assert_eq!(u, "MB");
    assert!((v - 3.0).abs() < 1e-6);
  }
}
