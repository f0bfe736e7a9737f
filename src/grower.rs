//! The heap growth source (C7): the external collaborator the core allocator
//! consults whenever it cannot satisfy a request from existing free space.
//!
//! The core never calls `sbrk` (or any other OS primitive) directly. Instead it
//! is generic over [`HeapGrower`], so the same red-black-tree allocator can run
//! against a real process heap ([`SbrkGrower`]) or against a private, fixed-size
//! in-memory arena ([`BufferGrower`]) that tests use to build independent,
//! deterministic heaps without touching process-global `sbrk` state.

use libc::{c_void, intptr_t, sbrk};

use crate::error::HeapError;

/// Extends (or, for ambient convenience code, shrinks) a growable byte region.
///
/// Implementations must hand out non-overlapping, monotonically increasing
/// spans for positive requests: each successful `sbrk(n)` call returns the
/// address of a fresh span of `n` bytes immediately following the previous
/// span. This mirrors the classical `sbrk(2)` contract the core's `extend`
/// (C2) and `place`/`realloc` (C6) logic is written against.
pub trait HeapGrower {
  /// Extend the region by `n_bytes` (or shrink it, for negative `n_bytes`),
  /// returning the start of the new span (the prior break) on success.
  fn sbrk(&mut self, n_bytes: isize) -> Result<*mut u8, HeapError>;

  /// Returns the current break, i.e. the address just past the end of the
  /// region handed out so far. Debug-only: used by the `checked` heap walker
  /// to bound its traversal.
  fn current_break(&self) -> *mut u8;
}

/// Production [`HeapGrower`] backed by the POSIX `sbrk(2)` system call via `libc`.
///
/// Wraps `libc::sbrk` behind the [`HeapGrower`] trait so the rest of the
/// allocator never references `libc` or process-global break state directly.
#[derive(Debug, Default)]
pub struct SbrkGrower {
  _private: (),
}

impl SbrkGrower {
  pub fn new() -> Self {
    Self { _private: () }
  }
}

impl HeapGrower for SbrkGrower {
  fn sbrk(&mut self, n_bytes: isize) -> Result<*mut u8, HeapError> {
    let raw = unsafe { sbrk(n_bytes as intptr_t) };
    if raw == usize::MAX as *mut c_void {
      return Err(HeapError::OutOfMemory);
    }
    Ok(raw as *mut u8)
  }

  fn current_break(&self) -> *mut u8 {
    unsafe { sbrk(0) as *mut u8 }
  }
}

/// Test-only [`HeapGrower`] backed by a private, fixed-capacity arena.
///
/// The backing store is a `Vec<u64>` (never resized after construction, so its
/// address is stable for the grower's lifetime) sized in 8-byte words, which
/// guarantees the arena's base address is itself 8-byte aligned — a
/// precondition the rest of the allocator relies on.
///
/// Unlike [`SbrkGrower`], a [`BufferGrower`] owns its memory outright, so two
/// [`crate::heap::RbHeap`] instances built over two different `BufferGrower`s
/// are fully independent: neither can observe or corrupt the other's blocks.
pub struct BufferGrower {
  backing: Vec<u64>,
  capacity: usize,
  cursor: usize,
}

impl BufferGrower {
  /// Creates a new arena of at least `capacity_bytes` usable bytes.
  pub fn new(capacity_bytes: usize) -> Self {
    let words = capacity_bytes.div_ceil(8);
    let backing = vec![0u64; words];
    let capacity = words * 8;
    Self { backing, capacity, cursor: 0 }
  }

  fn base(&self) -> *mut u8 {
    self.backing.as_ptr() as *mut u8
  }
}

impl HeapGrower for BufferGrower {
  fn sbrk(&mut self, n_bytes: isize) -> Result<*mut u8, HeapError> {
    if n_bytes >= 0 {
      let n = n_bytes as usize;
      if self.cursor + n > self.capacity {
        return Err(HeapError::OutOfMemory);
      }
      let old_cursor = self.cursor;
      self.cursor += n;
      Ok(unsafe { self.base().add(old_cursor) })
    } else {
      let n = (-n_bytes) as usize;
      if n > self.cursor {
        return Err(HeapError::OutOfMemory);
      }
      self.cursor -= n;
      Ok(unsafe { self.base().add(self.cursor) })
    }
  }

  fn current_break(&self) -> *mut u8 {
    unsafe { self.base().add(self.cursor) }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn buffer_grower_hands_out_sequential_spans() {
    let mut grower = BufferGrower::new(4096);

    let a = grower.sbrk(64).unwrap();
    let b = grower.sbrk(128).unwrap();

    assert_eq!(unsafe { a.add(64) }, b);
  }

  #[test]
  fn buffer_grower_base_is_eight_byte_aligned() {
    let grower = BufferGrower::new(4096);
    assert_eq!(grower.base() as usize % 8, 0);
  }

  #[test]
  fn buffer_grower_reports_out_of_memory_when_exhausted() {
    let mut grower = BufferGrower::new(128);

    assert!(grower.sbrk(64).is_ok());
    assert!(grower.sbrk(64).is_ok());
    assert_eq!(grower.sbrk(1), Err(HeapError::OutOfMemory));
  }

  #[test]
  fn two_independent_buffer_growers_do_not_share_memory() {
    let mut a = BufferGrower::new(256);
    let mut b = BufferGrower::new(256);

    let pa = a.sbrk(64).unwrap();
    let pb = b.sbrk(64).unwrap();

    assert_ne!(pa, pb);
  }
}
