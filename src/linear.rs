//! Growable bump ("linear") arena.
//!
//! ```text
//!   page 0                    page 1 (2x page 0)
//!   +------+------+------+    +------+------+
//!   | obj  | obj  | obj  |    | obj  | ...
//!   +------+------+------+    +------+------+
//!                ^ bump pointer (== used)
//! ```
//!
//! Every allocation just bumps `used` forward in the current page;
//! nothing is ever freed individually except for the special case where
//! the freed block *is* the most recent allocation in the current page
//! (`rewind_if_last_alloc`), which simply walks the bump pointer back.
//! Everything else lives until the whole arena is dropped, at which
//! point destructors registered via `allocate_with_dtor` run in reverse
//! (LIFO) order before the backing pages are released. The destructor
//! records themselves are nodes bump-allocated out of the same arena
//! they protect, not a side heap allocation.

use std::alloc::{self, Layout};
use std::mem;
use std::ptr;

use crate::align;
use crate::freelist::{FreelistAllocator, HEADER_SIZE};

/// Size of the first page a fresh arena allocates.
pub const INITIAL_PAGE_SIZE: usize = 512;
/// Page sizes double on growth but never exceed this.
pub const MAX_PAGE_SIZE: usize = 131_072;
/// A request that would waste more than this fraction of the relevant
/// page size gets its own dedicated page instead of growing the normal
/// chain.
pub const MAX_WASTE_RATIO: f32 = 0.5;

enum PageSource {
  Freelist(usize),
  Host(Layout),
}

struct Page {
  buf: *mut u8,
  capacity: usize,
  used: usize,
  source: PageSource,
}

impl Page {
  fn remaining(&self) -> usize {
    self.capacity - self.used
  }
}

type DestructorFn = unsafe fn(*mut u8);

/// A destructor record, bump-allocated inline in the arena right after
/// the allocation it protects. `next` threads every live record into a
/// singly linked LIFO list headed by `LinearAllocator::destructors`.
#[repr(C)]
struct DestructorNode {
  ptr: *mut u8,
  dtor: DestructorFn,
  next: *mut DestructorNode,
}

/// A growable bump allocator, optionally backed by a
/// [`FreelistAllocator`] for its page storage instead of the host heap
/// directly.
///
/// Holds a raw pointer to its (optional) backing allocator rather than
/// a borrow: nothing here enforces that the backing allocator outlives
/// the arena built on top of it. Callers own that invariant.
pub struct LinearAllocator {
  pages: Vec<Page>,
  dedicated: Vec<Page>,
  destructors: *mut DestructorNode,
  next_page_size: usize,
  backing: Option<*mut FreelistAllocator>,
  last_alloc: Option<(usize, usize)>,
  total_allocated: usize,
  wasted_space: usize,
  dedicated_page_count: usize,
}

impl Default for LinearAllocator {
  fn default() -> Self {
    Self::new()
  }
}

impl LinearAllocator {
  /// Creates an arena that sources its pages directly from the host
  /// allocator.
  pub fn new() -> Self {
    Self {
      pages: Vec::new(),
      dedicated: Vec::new(),
      destructors: ptr::null_mut(),
      next_page_size: INITIAL_PAGE_SIZE,
      backing: None,
      last_alloc: None,
      total_allocated: 0,
      wasted_space: 0,
      dedicated_page_count: 0,
    }
  }

  /// Creates an arena that sources its pages from `backing` instead of
  /// calling the host allocator directly. `backing` must outlive this
  /// arena.
  pub fn with_backing(backing: &mut FreelistAllocator) -> Self {
    Self {
      pages: Vec::new(),
      dedicated: Vec::new(),
      destructors: ptr::null_mut(),
      next_page_size: INITIAL_PAGE_SIZE,
      backing: Some(backing as *mut FreelistAllocator),
      last_alloc: None,
      total_allocated: 0,
      wasted_space: 0,
      dedicated_page_count: 0,
    }
  }

  pub fn total_allocated(&self) -> usize {
    self.total_allocated
  }

  pub fn wasted_space(&self) -> usize {
    self.wasted_space
  }

  pub fn page_count(&self) -> usize {
    self.pages.len()
  }

  pub fn dedicated_page_count(&self) -> usize {
    self.dedicated_page_count
  }

  /// Allocates a page able to hold `size` bytes. When backed by a
  /// [`FreelistAllocator`], the bucket it carves from only guarantees
  /// `2^k >= gross - HEADER_SIZE` usable bytes for a request of
  /// `gross`, so `size` alone is not enough to ask for — the header
  /// budget has to be requested too, or the bucket picked can land
  /// short of `size` and the page would overflow on its first write.
  fn alloc_page(&mut self, size: usize) -> Option<Page> {
    if let Some(backing) = self.backing {
      let gross = size + HEADER_SIZE;
      let p = unsafe { (*backing).allocate(gross) };
      if !p.is_null() {
        return Some(Page {
          buf: p,
          capacity: size,
          used: 0,
          source: PageSource::Freelist(gross),
        });
      }
    }

    let layout = Layout::from_size_align(size, mem::align_of::<usize>())
      .expect("invalid linear allocator page layout");
    let p = unsafe { alloc::alloc(layout) };
    if p.is_null() {
      return None;
    }
    Some(Page {
      buf: p,
      capacity: size,
      used: 0,
      source: PageSource::Host(layout),
    })
  }

  fn free_page(&mut self, page: &Page) {
    match page.source {
      PageSource::Freelist(gross) => {
        if let Some(backing) = self.backing {
          unsafe {
            (*backing).free(page.buf, gross);
          }
        }
      }
      PageSource::Host(layout) => unsafe {
        alloc::dealloc(page.buf, layout);
      },
    }
  }

  /// Grows the normal page chain by one page able to hold `required`
  /// bytes, doubling `next_page_size` for the page after that (capped
  /// at `MAX_PAGE_SIZE`). This page becomes the new bump target.
  /// Returns `false` on host allocation failure.
  fn grow_current_page(&mut self, required: usize) -> bool {
    let size = self.next_page_size.max(required);
    self.next_page_size = (self.next_page_size * 2).min(MAX_PAGE_SIZE);

    let Some(page) = self.alloc_page(size) else {
      return false;
    };
    // Charged in full up front, including for the very first page,
    // and credited back below as allocations land in it.
    self.wasted_space += page.capacity;
    self.total_allocated += page.capacity;
    self.pages.push(page);
    true
  }

  /// The waste threshold a request is measured against to decide
  /// whether it deserves its own dedicated page: half of whatever page
  /// size is currently in play (the live current page's capacity, or
  /// the configured next-page size if the arena hasn't grown one yet).
  fn waste_threshold(&self) -> f32 {
    let reference = self
      .pages
      .last()
      .map(|p| p.capacity)
      .unwrap_or(self.next_page_size);
    reference as f32 * MAX_WASTE_RATIO
  }

  /// Bump-allocates `size` bytes (rounded up to word alignment).
  /// Requests that would waste more than half of the relevant page
  /// size get their own dedicated page instead, sized exactly to the
  /// request; dedicated pages are kept alive but never become the bump
  /// target for later allocations, so they can't be rewound. Returns
  /// null only on host allocation failure.
  pub fn allocate(&mut self, size: usize) -> *mut u8 {
    let aligned = align!(size);
    let fits_current = self
      .pages
      .last()
      .is_some_and(|p| p.remaining() >= aligned);

    if !fits_current && (aligned as f32) > self.waste_threshold() {
      let Some(page) = self.alloc_page(aligned) else {
        return ptr::null_mut();
      };
      self.total_allocated += page.capacity;
      self.dedicated_page_count += 1;
      let p = page.buf;
      self.dedicated.push(page);
      return p;
    }

    if !fits_current && !self.grow_current_page(aligned) {
      return ptr::null_mut();
    }

    let idx = self.pages.len() - 1;
    let page = &mut self.pages[idx];
    let p = unsafe { page.buf.add(page.used) };
    page.used += aligned;
    self.wasted_space -= aligned;
    self.last_alloc = Some((idx, aligned));
    p
  }

  /// Allocates `size` bytes and registers `dtor` to run on `ptr` when
  /// this arena is torn down (or sooner, via [`Self::run_destructor_for`]).
  /// The destructor record is itself bump-allocated immediately after
  /// the allocation it protects, and linked to the head of this arena's
  /// destructor list. Destructors run in reverse allocation order
  /// (LIFO) on teardown, mirroring object lifetimes on a stack.
  ///
  /// # Safety
  ///
  /// `dtor` must be safe to call with the pointer this method returns
  /// once, no more than once, at some point at or before this arena's
  /// `Drop`.
  pub unsafe fn allocate_with_dtor(&mut self, size: usize, dtor: DestructorFn) -> *mut u8 {
    let p = self.allocate(size);
    if p.is_null() {
      return p;
    }

    let node_ptr = self.allocate(mem::size_of::<DestructorNode>()) as *mut DestructorNode;
    if node_ptr.is_null() {
      return p;
    }

    unsafe {
      node_ptr.write(DestructorNode {
        ptr: p,
        dtor,
        next: self.destructors,
      });
    }
    self.destructors = node_ptr;

    p
  }

  /// Finds the first registered destructor targeting `ptr`, removes it
  /// from the list, invokes it immediately, and attempts to rewind the
  /// destructor node's own bump allocation if it's still at the tail of
  /// the current page (the object's allocation beneath it is not
  /// reclaimed — a bump arena can't pull back an interior allocation).
  /// Returns whether a matching entry was found.
  pub fn run_destructor_for(&mut self, ptr: *mut u8) -> bool {
    let mut prev: *mut DestructorNode = ptr::null_mut();
    let mut node = self.destructors;

    while !node.is_null() {
      let next = unsafe { (*node).next };
      if unsafe { (*node).ptr } == ptr {
        if prev.is_null() {
          self.destructors = next;
        } else {
          unsafe {
            (*prev).next = next;
          }
        }

        let (dtor, target) = unsafe { ((*node).dtor, (*node).ptr) };
        unsafe {
          dtor(target);
        }

        self.rewind_if_last_alloc(node as *mut u8, mem::size_of::<DestructorNode>());
        return true;
      }
      prev = node;
      node = next;
    }

    false
  }

  /// If `(ptr, size)` is exactly the most recent allocation made and
  /// it's still in the current page, walks the bump pointer back so
  /// the space is reused by the next allocation. Otherwise a no-op —
  /// a bump arena can't reclaim an arbitrary interior allocation.
  /// Returns whether the rewind happened.
  pub fn rewind_if_last_alloc(&mut self, ptr: *mut u8, size: usize) -> bool {
    let aligned = align!(size);
    let Some((idx, alloc_size)) = self.last_alloc else {
      return false;
    };
    if alloc_size != aligned || idx != self.pages.len() - 1 {
      return false;
    }
    let page = &mut self.pages[idx];
    let expected = unsafe { page.buf.add(page.used - alloc_size) };
    if expected != ptr {
      return false;
    }
    page.used -= alloc_size;
    self.wasted_space += alloc_size;
    self.last_alloc = None;
    true
  }

  fn run_destructors(&mut self) {
    let mut node = self.destructors;
    self.destructors = ptr::null_mut();
    while !node.is_null() {
      let next = unsafe { (*node).next };
      unsafe {
        ((*node).dtor)((*node).ptr);
      }
      node = next;
    }
  }
}

impl Drop for LinearAllocator {
  fn drop(&mut self) {
    self.run_destructors();
    for page in std::mem::take(&mut self.pages) {
      self.free_page(&page);
    }
    for page in std::mem::take(&mut self.dedicated) {
      self.free_page(&page);
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::cell::RefCell;

  #[test]
  fn sequential_allocations_stay_within_one_page() {
    let mut a = LinearAllocator::new();
    let p1 = a.allocate(16);
    let p2 = a.allocate(16);
    assert!(!p1.is_null() && !p2.is_null());
    assert_eq!(a.page_count(), 1);
    assert!((p2 as usize) > (p1 as usize));
  }

  #[test]
  fn oversize_request_gets_a_dedicated_page() {
    // default_page_size = 512, so max_waste = 256; a 300-byte request
    // exceeds that and earns its own page without disturbing the
    // bump pointer (matches the concrete scenario this mirrors).
    let mut a = LinearAllocator::new();
    assert_eq!(a.page_count(), 0);
    let p = a.allocate(300);
    assert!(!p.is_null());
    assert_eq!(a.dedicated_page_count(), 1);
    assert_eq!(a.page_count(), 0, "dedicated pages don't become the bump target");
  }

  #[test]
  fn small_allocations_still_grow_the_normal_chain() {
    let mut a = LinearAllocator::new();
    let p1 = a.allocate(16);
    let p2 = a.allocate(16);
    assert!(!p1.is_null() && !p2.is_null());
    assert_eq!(a.page_count(), 1);
    assert_eq!(a.dedicated_page_count(), 0);
  }

  #[test]
  fn rewind_reclaims_only_the_most_recent_allocation() {
    let mut a = LinearAllocator::new();
    let p1 = a.allocate(16);
    let p2 = a.allocate(16);
    assert!(!a.rewind_if_last_alloc(p1, 16), "p1 is no longer the top allocation");
    assert!(a.rewind_if_last_alloc(p2, 16));
    let p3 = a.allocate(16);
    assert_eq!(p2, p3, "rewound space should be reused");
  }

  #[test]
  fn backed_by_freelist_allocator() {
    let mut backing = FreelistAllocator::new(9, 17);
    let mut a = LinearAllocator::with_backing(&mut backing);
    let p = a.allocate(64);
    assert!(!p.is_null());
    assert_eq!(a.page_count(), 1);
  }

  #[test]
  fn freelist_backed_dedicated_page_is_never_under_provisioned() {
    // Bucket for a 1028-byte gross request is 2^10 = 1024 usable bytes
    // (query_page_idx subtracts HEADER_SIZE before picking the bucket).
    // Before requesting the header budget up front, this page's
    // `capacity` was set to the raw 1028/1032-ish request while the
    // buffer backing it only guaranteed 1024 usable bytes — writing
    // the full capacity overran the buffer.
    let mut backing = FreelistAllocator::new(9, 17);
    let mut a = LinearAllocator::with_backing(&mut backing);
    let p = a.allocate(1028);
    assert!(!p.is_null());
    unsafe {
      ptr::write_bytes(p, 0x5a, 1028);
    }
    assert_eq!(a.dedicated_page_count(), 1);
  }

  thread_local! {
    static DROP_ORDER: RefCell<Vec<char>> = const { RefCell::new(Vec::new()) };
  }

  unsafe fn record_a(_p: *mut u8) {
    DROP_ORDER.with(|o| o.borrow_mut().push('a'));
  }
  unsafe fn record_b(_p: *mut u8) {
    DROP_ORDER.with(|o| o.borrow_mut().push('b'));
  }
  unsafe fn record_c(_p: *mut u8) {
    DROP_ORDER.with(|o| o.borrow_mut().push('c'));
  }

  #[test]
  fn destructors_run_lifo_on_drop() {
    DROP_ORDER.with(|o| o.borrow_mut().clear());
    {
      let mut a = LinearAllocator::new();
      unsafe {
        a.allocate_with_dtor(8, record_a);
        a.allocate_with_dtor(8, record_b);
        a.allocate_with_dtor(8, record_c);
      }
    }
    DROP_ORDER.with(|o| assert_eq!(*o.borrow(), vec!['c', 'b', 'a']));
  }

  #[test]
  fn run_destructor_for_fires_early_and_reclaims_the_node_but_not_the_object() {
    DROP_ORDER.with(|o| o.borrow_mut().clear());
    let mut a = LinearAllocator::new();
    unsafe {
      let p = a.allocate_with_dtor(8, record_a);
      let wasted_before = a.wasted_space();
      assert!(a.run_destructor_for(p));
      // The destructor node sat at the tail of the page (it was
      // allocated right after `p`), so its own space is reclaimed even
      // though `p`'s is not.
      assert!(a.wasted_space() > wasted_before);
    }
    DROP_ORDER.with(|o| assert_eq!(*o.borrow(), vec!['a']));
    // Already removed, so a second call finds nothing to do.
    assert!(!a.run_destructor_for(ptr::null_mut()));
  }
}
