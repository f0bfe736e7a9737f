//! `SystemRbHeap`: a `Mutex`-guarded [`RbHeap<SbrkGrower>`] implementing
//! `GlobalAlloc`, so this crate can be dropped in as `#[global_allocator]`
//! for a process that wants one shared heap.
//!
//! The core (`RbHeap<G>`) itself stays synchronization-free, as specified
//! in §5: all the locking lives here, at the ambient edge, not in the core.

use std::alloc::{GlobalAlloc, Layout};
use std::ptr::NonNull;
use std::sync::{Mutex, OnceLock};

use crate::grower::SbrkGrower;
use crate::heap::RbHeap;

/// A process-wide allocator suitable for `#[global_allocator]`.
///
/// Construction of the underlying [`RbHeap`] is deferred to the first
/// allocation request, since `GlobalAlloc`'s methods take `&self` and must
/// be usable from a `static`.
pub struct SystemRbHeap {
  state: OnceLock<Mutex<RbHeap<SbrkGrower>>>,
}

impl SystemRbHeap {
  /// Creates an un-initialized system heap. Cheap and `const`, so this is
  /// safe to use as the initializer of a `static`.
  pub const fn new() -> Self {
    Self { state: OnceLock::new() }
  }

  fn heap(&self) -> &Mutex<RbHeap<SbrkGrower>> {
    self.state.get_or_init(|| {
      Mutex::new(RbHeap::new(SbrkGrower::new()).expect("failed to initialize the system heap"))
    })
  }
}

impl Default for SystemRbHeap {
  fn default() -> Self {
    Self::new()
  }
}

unsafe impl GlobalAlloc for SystemRbHeap {
  unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
    let mut heap = self.heap().lock().unwrap_or_else(|poison| poison.into_inner());
    heap.malloc(layout.size() as u32).map(NonNull::as_ptr).unwrap_or(std::ptr::null_mut())
  }

  unsafe fn dealloc(&self, ptr: *mut u8, _layout: Layout) {
    let mut heap = self.heap().lock().unwrap_or_else(|poison| poison.into_inner());
    heap.free(NonNull::new(ptr));
  }

  unsafe fn realloc(&self, ptr: *mut u8, _layout: Layout, new_size: usize) -> *mut u8 {
    let mut heap = self.heap().lock().unwrap_or_else(|poison| poison.into_inner());
    heap.realloc(NonNull::new(ptr), new_size as u32).map(NonNull::as_ptr).unwrap_or(std::ptr::null_mut())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn global_alloc_smoke_test() {
    let heap = SystemRbHeap::new();

    unsafe {
      let layout = Layout::new::<[u8; 256]>();
      let p = heap.alloc(layout);
      assert!(!p.is_null());
      std::ptr::write_bytes(p, 0x42, 256);

      let grown = heap.realloc(p, layout, 4096);
      assert!(!grown.is_null());
      assert_eq!(*grown, 0x42);

      heap.dealloc(grown, Layout::new::<[u8; 4096]>());
    }
  }
}
