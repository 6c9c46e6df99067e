//! # blockpool - A Small-Object Pool Allocator
//!
//! This crate provides a thread-local pool of fixed-size block
//! allocators fronting a freelist/bump-arena backend, for programs that
//! make many same-sized small allocations and want to avoid paying the
//! system allocator's bookkeeping for each one.
//!
//! ## Overview
//!
//! Four allocation strategies are layered on top of each other:
//!
//! ```text
//!   ┌──────────────────────────────────────────────────────────────┐
//!   │  BlockAllocatorPool  (one per thread, lazily built)           │
//!   │                                                                │
//!   │  size -> class lookup table                                  │
//!   │  class 0: [4B ] [4B ] [4B ] ...   <- BlockAllocator           │
//!   │  class 1: [8B ] [8B ] [8B ] ...   <- BlockAllocator           │
//!   │  ...                                                          │
//!   │  class 46: [1024B] [1024B] ...    <- BlockAllocator           │
//!   │                                                                │
//!   │  size > 1024B ------------------> system allocator            │
//!   └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! A `BlockAllocator` is a slab: it carves host-allocated pages into
//! equal-sized blocks and serves them from a singly-linked free list.
//! Memory it hands out is never returned to the host except all at
//! once, on teardown:
//!
//! ```text
//!   Page:
//!   ┌────────┬───────┬───────┬───────┬───────┬─────────────────┐
//!   │ header │ block │ block │ block │ block │ ... blocks_per_page
//!   └────────┴───────┴───────┴───────┴───────┴─────────────────┘
//!              ▲ free list threads through unused blocks
//! ```
//!
//! Two more pieces round out the crate for callers outside the
//! size-class table: a [`FreelistAllocator`] that buckets arbitrary
//! requests by nearest power of two, and a [`LinearAllocator`] bump
//! arena (optionally backed by a `FreelistAllocator`) for callers that
//! want to allocate many short-lived objects and release them all at
//! once.
//!
//! ## Crate Structure
//!
//! ```text
//!   blockpool
//!   ├── align     - Alignment macros (align!, align_to!)
//!   ├── error     - AllocError, SizeClassMiss
//!   ├── block     - BlockAllocator: fixed-size slab allocator
//!   ├── pool      - BlockAllocatorPool dispatch (thread-local)
//!   ├── freelist  - FreelistAllocator: power-of-two bucket pool
//!   ├── linear    - LinearAllocator: growable bump arena
//!   ├── stats     - humanize() and logging helpers for the counters above
//!   └── facade    - mm_alloc/mm_free, PoolAllocator<T>, GlobalPoolAllocator
//! ```
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use blockpool::pool;
//!
//! fn main() {
//!     let p = pool::allocate(24);
//!     assert!(!p.is_null());
//!     unsafe {
//!         *(p as *mut u64) = 42;
//!     }
//!     pool::free(p, 24);
//! }
//! ```
//!
//! ## Concurrency
//!
//! Every allocator in this crate is single-threaded. `BlockAllocatorPool`
//! embraces this by being thread-local: each thread that calls into
//! [`pool::allocate`]/[`pool::free`] lazily builds and owns its own copy
//! of the size-class table. `BlockAllocator`, `FreelistAllocator`, and
//! `LinearAllocator` carry no internal synchronization at all — sharing
//! one across threads is a caller error, not something this crate
//! detects.
//!
//! ## Safety
//!
//! This crate is inherently unsafe as it deals with raw memory
//! management. Pointer-returning entry points signal failure with a
//! null pointer rather than a `Result`; see [`error::AllocError`] for
//! the handful of APIs that do carry a typed error.

pub mod align;
mod block;
pub mod error;
pub mod facade;
pub mod freelist;
pub mod linear;
pub mod pool;
pub mod stats;

pub use block::BlockAllocator;
pub use error::{AllocError, SizeClassMiss};
pub use facade::{GlobalPoolAllocator, PoolAllocator, mm_alloc, mm_free};
pub use freelist::FreelistAllocator;
pub use linear::LinearAllocator;
