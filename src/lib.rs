//! # rbheap — a red-black-tree-indexed dynamic storage allocator
//!
//! This crate manages a single contiguous, monotonically extensible byte
//! region (the heap) on behalf of a client program, exposing the classical
//! allocate / free / reallocate interface. The free-space index is a
//! self-balancing search tree keyed by block size, threaded through the
//! payload bytes of free blocks themselves — there is no auxiliary metadata
//! region for free blocks, and allocated blocks carry only an 8-byte
//! boundary-tag pair.
//!
//! ## Overview
//!
//! ```text
//!   Heap layout:
//!
//!   ┌──────────┬───────────────────────────────────────────────┬──────────┐
//!   │ prologue │           blocks (allocated or free)           │ epilogue │
//!   │ (size D) │                                                │ (size 0)│
//!   └──────────┴───────────────────────────────────────────────┴──────────┘
//!
//!   A free block's payload doubles as a red-black tree node:
//!
//!   ┌────────┬────────┬────────┬────────┬────────┬─────────────┬────────┐
//!   │ header │ parent │  left  │ right  │ color  │   (unused)  │ footer │
//!   └────────┴────────┴────────┴────────┴────────┴─────────────┴────────┘
//!            ▲
//!            └── same bp the caller gets back when this block is allocated
//! ```
//!
//! Free/alloc transitions happen in place: there is no separate arena for
//! tree nodes, and no block ever needs relocating except by the caller's own
//! `realloc`.
//!
//! ## Crate structure
//!
//! ```text
//!   rbheap
//!   ├── align     - size/alignment rounding (align_up!)
//!   ├── block     - boundary-tag layout and arithmetic (C1)
//!   ├── tree      - the embedded red-black tree engine (C3)
//!   ├── freelist  - tree-backed free-block interface (C4)
//!   ├── grower    - the heap-growth-source trait + sbrk/buffer impls (C7)
//!   ├── heap      - init/extend (C2), coalescing (C5), malloc/free/realloc (C6, C8)
//!   ├── error     - HeapError
//!   └── global    - SystemRbHeap, a #[global_allocator]-ready wrapper
//! ```
//!
//! ## Quick start
//!
//! ```rust
//! use rbheap::{RbHeap, BufferGrower};
//!
//! let mut heap = RbHeap::new(BufferGrower::new(1 << 20)).unwrap();
//!
//! let a = heap.malloc(64).unwrap();
//! unsafe { a.as_ptr().write(0x42) };
//!
//! let b = heap.realloc(Some(a), 256).unwrap();
//! assert_eq!(unsafe { b.as_ptr().read() }, 0x42);
//!
//! heap.free(Some(b));
//! ```
//!
//! ## Concurrency
//!
//! `RbHeap<G>` mutates its own state without synchronization and is not
//! meant to be shared across threads. A program wanting one heap shared
//! across threads should reach for [`SystemRbHeap`], which wraps an
//! `RbHeap<SbrkGrower>` in a `Mutex` and implements `GlobalAlloc`.
//!
//! ## Safety
//!
//! This crate is inherently unsafe: it reinterprets raw heap bytes as block
//! headers, footers, and tree nodes. Every public entry point on `RbHeap`
//! (`malloc`, `free`, `realloc`, and their `try_`-prefixed siblings) is
//! safe to call — the `unsafe` lives entirely inside the crate, which
//! upholds the invariants documented on [`heap::RbHeap`].
//!
//! ## Non-goals
//!
//! Concurrency safety in the core, randomized addresses, security hardening
//! (canaries, guard pages), per-size-class bins, lazy coalescing, returning
//! memory to the operating system, and allocation statistics tracking are
//! all out of scope. See the `checked` feature for debug-only invariant
//! checking instead of a runtime heap checker.

pub mod align;
pub mod block;
pub mod error;
pub mod freelist;
pub mod global;
pub mod grower;
pub mod heap;
pub mod tree;

pub use align::align_up;
pub use error::HeapError;
pub use global::SystemRbHeap;
pub use grower::{BufferGrower, HeapGrower, SbrkGrower};
pub use heap::RbHeap;
