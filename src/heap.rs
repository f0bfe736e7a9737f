//! Heap initialization/extension (C2), coalescing (C5), and the allocation
//! policies (C6) that sit on top of [`crate::freelist`]. This is the module
//! client code actually drives: [`RbHeap::new`] plays the role of the
//! distilled spec's `init`, and `malloc`/`free`/`realloc` (plus their
//! `try_`-prefixed, error-surfacing siblings) are the public entry points.

use std::ptr::NonNull;

use log::{debug, warn};

use crate::align::align_up;
use crate::block::{self, CHUNK_SIZE, DSIZE, MIN_BLOCK_SIZE, WSIZE};
use crate::error::HeapError;
use crate::freelist::FreeList;
use crate::grower::HeapGrower;
use crate::tree::NODE_OVERLAY_SIZE;

/// A single self-contained heap: one growable byte region, one free-block
/// tree, one NIL sentinel, all owned by this value rather than living in
/// process-wide globals (the Open Question the distilled spec flagged —
/// resolved in favor of instance-scoped state so tests can build many
/// independent heaps; see `SystemRbHeap` in [`crate::global`] for the
/// classical single-shared-heap story).
pub struct RbHeap<G: HeapGrower> {
  grower: G,
  heap_base: *mut u8,
  // Pinned for the life of the heap: every rotation/fixup in `free_list`
  // holds raw pointers into this storage, so it must never move or be freed
  // out from under them.
  _nil_storage: Box<[u8; NODE_OVERLAY_SIZE]>,
  free_list: FreeList,
}

impl<G: HeapGrower> RbHeap<G> {
  /// Initializes a new heap over `grower` (the Rust-idiomatic equivalent of
  /// the distilled spec's `init`): lays down the NIL sentinel, the
  /// prologue/epilogue sentinels (I5), and performs the first `CHUNK_SIZE`
  /// extension.
  pub fn new(mut grower: G) -> Result<Self, HeapError> {
    let mut nil_storage = Box::new([0u8; NODE_OVERLAY_SIZE]);
    let nil = nil_storage.as_mut_ptr();
    let free_list = unsafe { FreeList::new(nil) };

    // [ padding | prologue header | prologue footer | epilogue header ]
    let raw = grower.sbrk(4 * WSIZE as isize)?;
    let prologue_bp = unsafe { raw.add(2 * WSIZE) };
    unsafe {
      block::write_tags(prologue_bp, DSIZE as u32, true);
      block::write_epilogue(raw.add(3 * WSIZE));
    }

    let mut heap = Self { grower, heap_base: prologue_bp, _nil_storage: nil_storage, free_list };
    heap.extend(CHUNK_SIZE / WSIZE as u32)?;
    debug!(target: "rbheap::heap", "initialized heap, base = {:p}", heap.heap_base);
    Ok(heap)
  }

  /// The payload pointer of the heap's prologue block. Exposed for the
  /// `checked` heap walker; ordinary callers never need it.
  #[cfg(feature = "checked")]
  pub fn heap_base(&self) -> *mut u8 {
    self.heap_base
  }

  /// Extends the heap by at least `words` words (rounded up to an even
  /// count, per C2), coalescing the new block with its left neighbor if
  /// free. Returns the payload pointer of the (possibly coalesced) new
  /// free block.
  fn extend(&mut self, words: u32) -> Result<*mut u8, HeapError> {
    let words = if words % 2 != 0 { words + 1 } else { words };
    let size = words * WSIZE as u32;

    // `sbrk` hands back the prior break, which sits exactly `WSIZE` past the
    // old epilogue header — so that address doubles as the new block's
    // payload pointer, and `header_ptr(bp)` overwrites the old epilogue.
    let bp = match self.grower.sbrk(size as isize) {
      Ok(bp) => bp,
      Err(e) => {
        warn!(target: "rbheap::heap", "heap extension by {size} bytes failed");
        return Err(e);
      }
    };

    debug!(target: "rbheap::heap", "extended heap by {size} bytes");
    unsafe {
      block::write_tags(bp, size, false);
      block::write_epilogue(bp.add(size as usize - WSIZE));
    }
    Ok(unsafe { self.coalesce(bp) })
  }

  /// Merges a just-freed (or just-extended) block with any free immediate
  /// neighbors (C5), reinserting the result into the free list.
  ///
  /// # Safety
  /// `bp`'s header/footer must already reflect its final size and be marked
  /// free; `bp` must not yet be a member of the free list.
  unsafe fn coalesce(&mut self, bp: *mut u8) -> *mut u8 {
    unsafe {
      let prev = block::prev_block(bp);
      let next = block::next_block(bp);
      let prev_alloc = block::is_alloc(prev);
      let next_alloc = block::is_alloc(next);
      let mut size = block::size(bp);
      let mut bp = bp;

      match (prev_alloc, next_alloc) {
        (true, true) => {
          debug!(target: "rbheap::heap", "coalesce: no free neighbors, size = {size}");
        }
        (true, false) => {
          debug!(target: "rbheap::heap", "coalesce: merging with next neighbor");
          self.free_list.remove(next);
          size += block::size(next);
          block::write_tags(bp, size, false);
        }
        (false, true) => {
          debug!(target: "rbheap::heap", "coalesce: merging with prev neighbor");
          self.free_list.remove(prev);
          size += block::size(prev);
          block::write_tags(prev, size, false);
          bp = prev;
        }
        (false, false) => {
          debug!(target: "rbheap::heap", "coalesce: merging with both neighbors");
          self.free_list.remove(prev);
          self.free_list.remove(next);
          size += block::size(prev) + block::size(next);
          block::write_tags(prev, size, false);
          bp = prev;
        }
      }

      self.free_list.insert(bp);
      bp
    }
  }

  /// Rounds a client byte count up to an allocatable block size, per C6's
  /// size adjustment rule. `None` for `n == 0`.
  fn adjust_size(n: u32) -> Option<u32> {
    if n == 0 {
      return None;
    }
    Some(MIN_BLOCK_SIZE.max(align_up(n + DSIZE as u32, DSIZE as u32)))
  }

  /// Removes `bp` from the free list and marks (all or part of) it
  /// allocated, splitting off a free remainder when the leftover is at
  /// least `MIN_BLOCK_SIZE` (C6 `place`).
  unsafe fn place(&mut self, bp: *mut u8, asize: u32) {
    unsafe {
      self.free_list.remove(bp);
      let csize = block::size(bp);

      if csize - asize >= MIN_BLOCK_SIZE {
        debug!(target: "rbheap::heap", "place: splitting block of size {csize} into {asize} + {}", csize - asize);
        block::write_tags(bp, asize, true);
        let remainder = block::next_block(bp);
        block::write_tags(remainder, csize - asize, false);
        self.free_list.insert(remainder);
      } else {
        debug!(target: "rbheap::heap", "place: no split, remainder below MIN_BLOCK_SIZE");
        block::write_tags(bp, csize, true);
      }
    }
  }

  /// Allocates `n` bytes, surfacing `HeapError::OutOfMemory` from the
  /// underlying growth source rather than folding it into `None`. `Ok(None)`
  /// for `n == 0`.
  pub fn try_malloc(&mut self, n: u32) -> Result<Option<NonNull<u8>>, HeapError> {
    let Some(asize) = Self::adjust_size(n) else {
      return Ok(None);
    };

    unsafe {
      let bp = match self.free_list.find_fit(asize) {
        Some(bp) => bp,
        None => self.extend(asize.max(CHUNK_SIZE) / WSIZE as u32)?,
      };
      self.place(bp, asize);
      Ok(NonNull::new(bp))
    }
  }

  /// Allocates `n` bytes. `None` when `n == 0` or the heap could not be
  /// extended far enough to satisfy the request.
  pub fn malloc(&mut self, n: u32) -> Option<NonNull<u8>> {
    self.try_malloc(n).ok().flatten()
  }

  /// Frees a previously-allocated block. `None` is a no-op.
  pub fn free(&mut self, p: Option<NonNull<u8>>) {
    let Some(p) = p else { return };
    unsafe {
      let bp = p.as_ptr();
      let size = block::size(bp);
      block::write_tags(bp, size, false);
      self.coalesce(bp);
    }
  }

  /// Resizes a previously-allocated block, surfacing `HeapError::OutOfMemory`
  /// from the fallback `malloc` path rather than folding it into `None`.
  ///
  /// Semantics (C6 `realloc`):
  /// - `n == 0` frees `p` and returns `Ok(None)`.
  /// - `p == None` is equivalent to `try_malloc(n)`.
  /// - Otherwise: shrink/exact-fit splits in place; growth first tries
  ///   fusing with a free right neighbor; only then falls back to
  ///   malloc+copy+free. The fallback never attempts left-neighbor fusion,
  ///   which would require an overlapping `memmove`.
  pub fn try_realloc(&mut self, p: Option<NonNull<u8>>, n: u32) -> Result<Option<NonNull<u8>>, HeapError> {
    if n == 0 {
      self.free(p);
      return Ok(None);
    }
    let Some(p) = p else {
      return self.try_malloc(n);
    };

    unsafe {
      let ptr = p.as_ptr();
      let csize = block::size(ptr);
      let asize = Self::adjust_size(n).expect("n != 0 checked above");

      if asize <= csize {
        debug!(target: "rbheap::heap", "realloc: shrink/exact fit, csize = {csize}, asize = {asize}");
        if csize - asize >= MIN_BLOCK_SIZE {
          block::write_tags(ptr, asize, true);
          let remainder = block::next_block(ptr);
          block::write_tags(remainder, csize - asize, false);
          self.free_list.insert(remainder);
        }
        return Ok(Some(p));
      }

      let next = block::next_block(ptr);
      if !block::is_alloc(next) {
        let combined = csize + block::size(next);
        if combined >= asize {
          debug!(target: "rbheap::heap", "realloc: in-place grow via next neighbor");
          self.free_list.remove(next);
          if combined - asize >= MIN_BLOCK_SIZE {
            block::write_tags(ptr, asize, true);
            let remainder = block::next_block(ptr);
            block::write_tags(remainder, combined - asize, false);
            self.free_list.insert(remainder);
          } else {
            block::write_tags(ptr, combined, true);
          }
          return Ok(Some(p));
        }
      }

      debug!(target: "rbheap::heap", "realloc: falling back to malloc + copy + free");
      let new_bp = match self.try_malloc(n)? {
        Some(new_bp) => new_bp,
        None => return Ok(None),
      };
      let copy_len = n.min(csize - DSIZE as u32) as usize;
      std::ptr::copy_nonoverlapping(ptr, new_bp.as_ptr(), copy_len);
      self.free(Some(p));
      Ok(Some(new_bp))
    }
  }

  /// Resizes a previously-allocated block. `None` when the fallback
  /// `malloc` path could not extend the heap far enough.
  pub fn realloc(&mut self, p: Option<NonNull<u8>>, n: u32) -> Option<NonNull<u8>> {
    self.try_realloc(p, n).ok().flatten()
  }
}

/// Debug-only heap walker (C8), gated behind the `checked` feature so a
/// release build pays nothing for it. Never called from `malloc`/`free`/
/// `realloc`/`new` themselves — this is test-only tooling, per §1's scope
/// note and §7's closing remark that UB conditions are not detected at
/// runtime.
#[cfg(feature = "checked")]
impl<G: HeapGrower> RbHeap<G> {
  /// Walks the heap from the prologue to the epilogue, checking:
  /// - tag coherence (header == footer) for every block (Testable Property 1),
  /// - no two adjacent blocks are both free (Testable Property 3, I2),
  /// - the red-black properties of the free-block tree (Testable Property 5),
  /// - that the set of blocks the heap walk finds free equals the set of
  ///   nodes reachable from the tree's root (Testable Property 4).
  ///
  /// Returns every violation found rather than panicking on the first.
  pub fn check_invariants(&self) -> Result<(), Vec<String>> {
    let mut errors = Vec::new();
    let mut free_via_walk = std::collections::HashSet::new();

    unsafe {
      let limit = self.grower.current_break() as usize;
      let mut bp = self.heap_base;
      let mut prev_was_free = false;

      loop {
        if (bp as usize) >= limit {
          errors.push("heap walk ran past the current break without finding the epilogue".to_string());
          break;
        }
        let header = block::peek_header(block::header_ptr(bp));
        let (size, alloc) = header;
        if size == 0 {
          break;
        }

        let footer = block::peek_header(block::footer_ptr(bp));
        if header != footer {
          errors.push(format!("block at {bp:p}: header {header:?} != footer {footer:?}"));
        }

        if !alloc {
          if prev_was_free {
            errors.push(format!("block at {bp:p}: adjacent free blocks violate I2"));
          }
          free_via_walk.insert(bp as usize);
        }
        prev_was_free = !alloc;
        bp = block::next_block(bp);
      }

      if let Err(mut tree_errors) = self.free_list.tree().check_red_black_properties() {
        errors.append(&mut tree_errors);
      }

      let free_via_tree: std::collections::HashSet<usize> =
        self.free_list.tree().collect_nodes().into_iter().map(|p| p as usize).collect();

      if free_via_walk != free_via_tree {
        errors.push("free set from heap walk does not match free set from tree traversal".to_string());
      }
    }

    if errors.is_empty() { Ok(()) } else { Err(errors) }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::grower::BufferGrower;

  fn read_u32(p: NonNull<u8>) -> u32 {
    unsafe { (p.as_ptr() as *const u32).read() }
  }

  fn write_pattern(p: NonNull<u8>, byte: u8, len: usize) {
    unsafe { std::ptr::write_bytes(p.as_ptr(), byte, len) };
  }

  #[test]
  fn malloc_zero_returns_none() {
    let mut heap = RbHeap::new(BufferGrower::new(1 << 16)).unwrap();
    assert_eq!(heap.malloc(0), None);
  }

  #[test]
  fn free_of_none_is_noop() {
    let mut heap = RbHeap::new(BufferGrower::new(1 << 16)).unwrap();
    heap.free(None);
  }

  #[test]
  fn realloc_of_none_behaves_like_malloc() {
    let mut heap = RbHeap::new(BufferGrower::new(1 << 16)).unwrap();
    let p = heap.realloc(None, 64);
    assert!(p.is_some());
  }

  #[test]
  fn realloc_to_zero_behaves_like_free() {
    let mut heap = RbHeap::new(BufferGrower::new(1 << 16)).unwrap();
    let a = heap.malloc(40).unwrap();
    assert_eq!(heap.realloc(Some(a), 0), None);
  }

  #[test]
  fn scenario_s1_free_leaves_single_coalesced_free_block() {
    let mut heap = RbHeap::new(BufferGrower::new(1 << 16)).unwrap();
    let a = heap.malloc(40).unwrap();
    heap.free(Some(a));

    let fit = unsafe { heap.free_list.find_fit(CHUNK_SIZE) };
    assert!(fit.is_some());
    assert_eq!(unsafe { block::size(fit.unwrap()) }, CHUNK_SIZE);
  }

  #[test]
  fn scenario_s2_two_adjacent_frees_coalesce() {
    let mut heap = RbHeap::new(BufferGrower::new(1 << 16)).unwrap();
    let a = heap.malloc(2048).unwrap();
    let b = heap.malloc(2048).unwrap();
    heap.free(Some(a));
    heap.free(Some(b));

    let fit = unsafe { heap.free_list.find_fit(CHUNK_SIZE) };
    assert!(fit.is_some());
    assert!(unsafe { block::size(fit.unwrap()) } >= CHUNK_SIZE);
  }

  #[test]
  fn scenario_s3_three_way_coalesce_on_middle_free() {
    let mut heap = RbHeap::new(BufferGrower::new(1 << 16)).unwrap();
    let a = heap.malloc(100).unwrap();
    let b = heap.malloc(100).unwrap();
    let c = heap.malloc(100).unwrap();
    heap.free(Some(a));
    heap.free(Some(c));
    heap.free(Some(b));

    // A single free block should now encompass a, b, c and the tail.
    let fit = unsafe { heap.free_list.find_fit(1) };
    assert!(fit.is_some());
  }

  #[test]
  fn scenario_s4_realloc_cannot_grow_left_falls_back() {
    let mut heap = RbHeap::new(BufferGrower::new(1 << 16)).unwrap();
    let a = heap.malloc(100).unwrap();
    let b = heap.malloc(100).unwrap();
    heap.free(Some(a));

    let p = heap.realloc(Some(b), 4096).unwrap();
    assert_ne!(p, b);
  }

  #[test]
  fn scenario_s5_realloc_fuses_with_right_neighbor() {
    let mut heap = RbHeap::new(BufferGrower::new(1 << 16)).unwrap();
    let a = heap.malloc(100).unwrap();
    let b = heap.realloc(Some(a), 200).unwrap();
    assert_eq!(a, b);
  }

  #[test]
  fn scenario_s6_realloc_shrink_splits_remainder() {
    let mut heap = RbHeap::new(BufferGrower::new(1 << 16)).unwrap();
    let a = heap.malloc(100).unwrap();
    let b = heap.realloc(Some(a), 40).unwrap();
    assert_eq!(a, b);
  }

  #[test]
  fn content_is_preserved_across_realloc_growth() {
    let mut heap = RbHeap::new(BufferGrower::new(1 << 16)).unwrap();
    let a = heap.malloc(64).unwrap();
    write_pattern(a, 0xAB, 64);

    let b = heap.realloc(Some(a), 256).unwrap();
    assert_eq!(read_u32(b) & 0xFF, 0xAB);
  }

  #[test]
  fn realloc_to_same_size_preserves_content() {
    let mut heap = RbHeap::new(BufferGrower::new(1 << 16)).unwrap();
    let a = heap.malloc(64).unwrap();
    write_pattern(a, 0xCD, 64);

    let b = heap.realloc(Some(a), 64).unwrap();
    assert_eq!(read_u32(b) & 0xFF, 0xCD);
  }

  #[test]
  fn buffer_grower_exhaustion_surfaces_out_of_memory() {
    let mut heap = RbHeap::new(BufferGrower::new(8192)).unwrap();
    let mut last = Ok(None);
    for _ in 0..10_000 {
      last = heap.try_malloc(64);
      if last.is_err() {
        break;
      }
    }
    assert_eq!(last, Err(HeapError::OutOfMemory));
  }

  #[test]
  fn two_independent_heaps_do_not_share_blocks() {
    let mut heap_a = RbHeap::new(BufferGrower::new(1 << 16)).unwrap();
    let mut heap_b = RbHeap::new(BufferGrower::new(1 << 16)).unwrap();

    let a = heap_a.malloc(64).unwrap();
    let b = heap_b.malloc(64).unwrap();
    assert_ne!(a.as_ptr() as usize, b.as_ptr() as usize);
  }

  #[cfg(feature = "checked")]
  #[test]
  fn check_invariants_passes_after_scenarios() {
    let mut heap = RbHeap::new(BufferGrower::new(1 << 16)).unwrap();
    let a = heap.malloc(100).unwrap();
    let b = heap.malloc(100).unwrap();
    let c = heap.malloc(100).unwrap();
    heap.free(Some(a));
    heap.free(Some(c));
    heap.free(Some(b));

    assert_eq!(heap.check_invariants(), Ok(()));
  }

  #[test]
  fn adjust_size_rounds_small_requests_up_to_min_block_size() {
    // A request of exactly DSIZE, and one exactly MIN_BLOCK_SIZE - DSIZE
    // below it, both round up to MIN_BLOCK_SIZE: neither leaves room for
    // anything smaller once header/footer overhead is added.
    assert_eq!(RbHeap::<BufferGrower>::adjust_size(DSIZE as u32), Some(MIN_BLOCK_SIZE));
    assert_eq!(RbHeap::<BufferGrower>::adjust_size(MIN_BLOCK_SIZE - DSIZE as u32), Some(MIN_BLOCK_SIZE));
  }

  #[test]
  fn place_splits_when_remainder_is_at_least_min_block_size() {
    let mut heap = RbHeap::new(BufferGrower::new(1 << 16)).unwrap();
    // The heap starts with a single CHUNK_SIZE free block. Request exactly
    // CHUNK_SIZE - MIN_BLOCK_SIZE worth of asize, so the leftover is exactly
    // MIN_BLOCK_SIZE: per C6 `place`, that's enough to split.
    let asize = CHUNK_SIZE - MIN_BLOCK_SIZE;
    let n = asize - DSIZE as u32;
    let a = heap.malloc(n).unwrap();

    assert_eq!(unsafe { block::size(a.as_ptr()) }, asize);
    let remainder = unsafe { heap.free_list.find_fit(MIN_BLOCK_SIZE) };
    assert_eq!(remainder.map(|bp| unsafe { block::size(bp) }), Some(MIN_BLOCK_SIZE));
  }

  #[test]
  fn place_does_not_split_when_remainder_is_below_min_block_size() {
    let mut heap = RbHeap::new(BufferGrower::new(1 << 16)).unwrap();
    // Leftover would be CHUNK_SIZE - asize = MIN_BLOCK_SIZE - DSIZE (8 bytes
    // under MIN), so `place` must allocate the whole block instead of
    // splitting off a too-small remainder.
    let asize = CHUNK_SIZE - (MIN_BLOCK_SIZE - DSIZE as u32);
    let n = asize - DSIZE as u32;
    let a = heap.malloc(n).unwrap();

    assert_eq!(unsafe { block::size(a.as_ptr()) }, CHUNK_SIZE);
  }

  #[cfg(feature = "checked")]
  #[test]
  fn check_invariants_detects_corrupted_header() {
    let mut heap = RbHeap::new(BufferGrower::new(1 << 16)).unwrap();
    let a = heap.malloc(100).unwrap();

    // Corrupt only the header, leaving the footer untouched, to desync I1.
    let header = block::header_ptr(a.as_ptr()) as *mut u32;
    unsafe { header.write(header.read() + 8) };

    assert!(heap.check_invariants().is_err());
  }
}
