//! The size-keyed red-black tree (C3): a canonical CLRS red-black tree whose
//! nodes are overlaid on the payload bytes of free blocks, with a shared NIL
//! sentinel and no equal-key branch (equal sizes always descend right, making
//! this a multiset ordered by block size).
//!
//! Every node field access here is an ordinary load/store through a raw
//! pointer into the block arena — the parent/left/right links form cycles by
//! design (a tree is a *view* over free blocks, not an owning structure), so
//! this module never wraps them in anything that would forbid that.

use log::trace;

use crate::block;

const NODE_PARENT_OFFSET: usize = 0;
const NODE_LEFT_OFFSET: usize = block::DSIZE;
const NODE_RIGHT_OFFSET: usize = 2 * block::DSIZE;
const NODE_COLOR_OFFSET: usize = 3 * block::DSIZE;

/// Bytes of payload a free block must have to host a tree node. Matches the
/// `MIN_BLOCK_SIZE - DSIZE` (header+footer) budget in [`block`].
pub const NODE_OVERLAY_SIZE: usize = 4 * block::DSIZE;

pub const RED: u8 = 1;
pub const BLACK: u8 = 0;

#[inline]
unsafe fn read_link(bp: *mut u8, offset: usize) -> *mut u8 {
  unsafe { (bp.add(offset) as *const *mut u8).read() }
}

#[inline]
unsafe fn write_link(bp: *mut u8, offset: usize, value: *mut u8) {
  unsafe { (bp.add(offset) as *mut *mut u8).write(value) }
}

#[inline]
unsafe fn parent(bp: *mut u8) -> *mut u8 {
  unsafe { read_link(bp, NODE_PARENT_OFFSET) }
}
#[inline]
unsafe fn set_parent(bp: *mut u8, v: *mut u8) {
  unsafe { write_link(bp, NODE_PARENT_OFFSET, v) }
}
#[inline]
unsafe fn left(bp: *mut u8) -> *mut u8 {
  unsafe { read_link(bp, NODE_LEFT_OFFSET) }
}
#[inline]
unsafe fn set_left(bp: *mut u8, v: *mut u8) {
  unsafe { write_link(bp, NODE_LEFT_OFFSET, v) }
}
#[inline]
unsafe fn right(bp: *mut u8) -> *mut u8 {
  unsafe { read_link(bp, NODE_RIGHT_OFFSET) }
}
#[inline]
unsafe fn set_right(bp: *mut u8, v: *mut u8) {
  unsafe { write_link(bp, NODE_RIGHT_OFFSET, v) }
}
#[inline]
unsafe fn color(bp: *mut u8) -> u8 {
  unsafe { *bp.add(NODE_COLOR_OFFSET) }
}
#[inline]
unsafe fn set_color(bp: *mut u8, c: u8) {
  unsafe { *bp.add(NODE_COLOR_OFFSET) = c }
}

/// The red-black tree of free blocks, keyed by block size.
///
/// `root` and `nil` are raw payload pointers into the block arena. `nil` is
/// owned by the surrounding [`crate::heap::RbHeap`] (not by this struct), so
/// that it outlives every rotation that might transiently rewrite its fields.
pub struct RbTree {
  pub root: *mut u8,
  nil: *mut u8,
}

impl RbTree {
  /// Builds an empty tree over the given sentinel storage, initializing it to
  /// the logically-empty BLACK state every other routine here expects on entry.
  ///
  /// # Safety
  /// `nil` must point to at least [`NODE_OVERLAY_SIZE`] bytes of writable
  /// memory that outlives this tree.
  pub unsafe fn new(nil: *mut u8) -> Self {
    unsafe {
      set_parent(nil, nil);
      set_left(nil, nil);
      set_right(nil, nil);
      set_color(nil, BLACK);
    }
    Self { root: nil, nil }
  }

  #[inline]
  pub fn nil(&self) -> *mut u8 {
    self.nil
  }

  #[inline]
  fn key(&self, bp: *mut u8) -> u32 {
    if bp == self.nil { u32::MAX } else { unsafe { block::size(bp) } }
  }

  unsafe fn left_rotate(&mut self, x: *mut u8) {
    unsafe {
      trace!(target: "rbheap::tree", "left_rotate");
      let y = right(x);
      set_right(x, left(y));
      if left(y) != self.nil {
        set_parent(left(y), x);
      }
      set_parent(y, parent(x));
      if parent(x) == self.nil {
        self.root = y;
      } else if x == left(parent(x)) {
        set_left(parent(x), y);
      } else {
        set_right(parent(x), y);
      }
      set_left(y, x);
      set_parent(x, y);
    }
  }

  unsafe fn right_rotate(&mut self, x: *mut u8) {
    unsafe {
      trace!(target: "rbheap::tree", "right_rotate");
      let y = left(x);
      set_left(x, right(y));
      if right(y) != self.nil {
        set_parent(right(y), x);
      }
      set_parent(y, parent(x));
      if parent(x) == self.nil {
        self.root = y;
      } else if x == right(parent(x)) {
        set_right(parent(x), y);
      } else {
        set_left(parent(x), y);
      }
      set_right(y, x);
      set_parent(x, y);
    }
  }

  /// Inserts a free block into the tree, keyed by its current block size.
  ///
  /// The caller (see [`crate::freelist`]) is responsible for having already
  /// initialized `z`'s parent/left/right to NIL and color to RED.
  ///
  /// # Safety
  /// `z` must point at a free block's payload with a valid header and at
  /// least [`NODE_OVERLAY_SIZE`] bytes of payload.
  pub unsafe fn insert(&mut self, z: *mut u8) {
    unsafe {
      let mut y = self.nil;
      let mut x = self.root;
      let z_size = self.key(z);

      while x != self.nil {
        y = x;
        x = if z_size < self.key(x) { left(x) } else { right(x) };
      }

      set_parent(z, y);
      if y == self.nil {
        self.root = z;
      } else if z_size < self.key(y) {
        set_left(y, z);
      } else {
        set_right(y, z);
      }

      set_left(z, self.nil);
      set_right(z, self.nil);
      set_color(z, RED);

      self.insert_fixup(z);
    }
  }

  unsafe fn insert_fixup(&mut self, mut z: *mut u8) {
    unsafe {
      while color(parent(z)) == RED {
        let gp = parent(parent(z));
        if parent(z) == left(gp) {
          let uncle = right(gp);
          if color(uncle) == RED {
            set_color(parent(z), BLACK);
            set_color(uncle, BLACK);
            set_color(gp, RED);
            z = gp;
          } else {
            if z == right(parent(z)) {
              z = parent(z);
              self.left_rotate(z);
            }
            set_color(parent(z), BLACK);
            set_color(parent(parent(z)), RED);
            self.right_rotate(parent(parent(z)));
          }
        } else {
          let uncle = left(gp);
          if color(uncle) == RED {
            set_color(parent(z), BLACK);
            set_color(uncle, BLACK);
            set_color(gp, RED);
            z = gp;
          } else {
            if z == left(parent(z)) {
              z = parent(z);
              self.right_rotate(z);
            }
            set_color(parent(z), BLACK);
            set_color(parent(parent(z)), RED);
            self.left_rotate(parent(parent(z)));
          }
        }
      }
      set_color(self.root, BLACK);
    }
  }

  unsafe fn transplant(&mut self, u: *mut u8, v: *mut u8) {
    unsafe {
      if parent(u) == self.nil {
        self.root = v;
      } else if u == left(parent(u)) {
        set_left(parent(u), v);
      } else {
        set_right(parent(u), v);
      }
      // Written unconditionally, even when v is the sentinel: remove_fixup
      // later reads NIL's parent as if it were x's real parent, and that only
      // works if every transplant keeps it up to date.
      set_parent(v, parent(u));
    }
  }

  unsafe fn minimum(&self, mut node: *mut u8) -> *mut u8 {
    unsafe {
      while left(node) != self.nil {
        node = left(node);
      }
      node
    }
  }

  /// Removes a free block from the tree.
  ///
  /// # Safety
  /// `z` must currently be a node in this tree.
  pub unsafe fn remove(&mut self, z: *mut u8) {
    unsafe {
      let mut y = z;
      let mut y_original_color = color(y);
      let x;

      if left(z) == self.nil {
        x = right(z);
        self.transplant(z, right(z));
      } else if right(z) == self.nil {
        x = left(z);
        self.transplant(z, left(z));
      } else {
        y = self.minimum(right(z));
        y_original_color = color(y);
        x = right(y);

        if parent(y) == z {
          set_parent(x, y);
        } else {
          self.transplant(y, right(y));
          set_right(y, right(z));
          set_parent(right(y), y);
        }

        self.transplant(z, y);
        set_left(y, left(z));
        set_parent(left(y), y);
        set_color(y, color(z));
      }

      if y_original_color == BLACK {
        self.remove_fixup(x);
      }
    }
  }

  unsafe fn remove_fixup(&mut self, mut x: *mut u8) {
    unsafe {
      while x != self.root && color(x) == BLACK {
        if x == left(parent(x)) {
          let mut w = right(parent(x));
          if color(w) == RED {
            set_color(w, BLACK);
            set_color(parent(x), RED);
            self.left_rotate(parent(x));
            w = right(parent(x));
          }
          if color(left(w)) == BLACK && color(right(w)) == BLACK {
            set_color(w, RED);
            x = parent(x);
          } else {
            if color(right(w)) == BLACK {
              set_color(left(w), BLACK);
              set_color(w, RED);
              self.right_rotate(w);
              w = right(parent(x));
            }
            set_color(w, color(parent(x)));
            set_color(parent(x), BLACK);
            set_color(right(w), BLACK);
            self.left_rotate(parent(x));
            x = self.root;
          }
        } else {
          let mut w = left(parent(x));
          if color(w) == RED {
            set_color(w, BLACK);
            set_color(parent(x), RED);
            self.right_rotate(parent(x));
            w = left(parent(x));
          }
          if color(right(w)) == BLACK && color(left(w)) == BLACK {
            set_color(w, RED);
            x = parent(x);
          } else {
            if color(left(w)) == BLACK {
              set_color(right(w), BLACK);
              set_color(w, RED);
              self.left_rotate(w);
              w = left(parent(x));
            }
            set_color(w, color(parent(x)));
            set_color(parent(x), BLACK);
            set_color(left(w), BLACK);
            self.right_rotate(parent(x));
            x = self.root;
          }
        }
      }
      set_color(x, BLACK);
    }
  }

  /// Returns the smallest-keyed node with size `>= asize`, or [`RbTree::nil`]
  /// if none exists.
  ///
  /// Expressed as a loop with explicit state rather than the textbook
  /// recursive descent, so stack depth never depends on tree height: at each
  /// step exactly one child is followed, after possibly recording the
  /// current node as the best candidate so far.
  ///
  /// # Safety
  /// Every reachable node's header must be valid.
  pub unsafe fn find_best_fit(&self, asize: u32) -> *mut u8 {
    unsafe {
      let mut node = self.root;
      let mut best = self.nil;

      while node != self.nil {
        let n = block::size(node);
        if n >= asize {
          if best == self.nil || n < block::size(best) {
            best = node;
          }
          node = left(node);
        } else {
          node = right(node);
        }
      }

      best
    }
  }
}

/// Debug-only tooling (C8): validates the red-black properties (Testable
/// Property 5) and exposes the node set for the `checked` heap walker to
/// cross-check against the set of free blocks found by walking heap tags.
/// Never called from `insert`/`remove`/`find_best_fit` themselves.
#[cfg(feature = "checked")]
impl RbTree {
  /// In-order traversal of every node currently in the tree.
  ///
  /// # Safety
  /// Every reachable node's left/right fields must be valid.
  pub unsafe fn collect_nodes(&self) -> Vec<*mut u8> {
    let mut out = Vec::new();
    unsafe { self.collect_inorder(self.root, &mut out) };
    out
  }

  unsafe fn collect_inorder(&self, node: *mut u8, out: &mut Vec<*mut u8>) {
    if node == self.nil {
      return;
    }
    unsafe {
      self.collect_inorder(left(node), out);
      out.push(node);
      self.collect_inorder(right(node), out);
    }
  }

  /// Checks: NIL is BLACK, root is BLACK, no RED node has a RED child, and
  /// every root-to-NIL path carries the same BLACK count. Returns every
  /// violation found rather than stopping at the first.
  ///
  /// # Safety
  /// Every reachable node's color/left/right fields must be valid.
  pub unsafe fn check_red_black_properties(&self) -> Result<(), Vec<String>> {
    let mut errors = Vec::new();

    if unsafe { color(self.nil) } != BLACK {
      errors.push("NIL sentinel is not BLACK".to_string());
    }
    if self.root != self.nil && unsafe { color(self.root) } != BLACK {
      errors.push("root is not BLACK".to_string());
    }

    let mut black_heights = Vec::new();
    unsafe { self.check_node(self.root, 0, &mut black_heights, &mut errors) };
    if let Some(&first) = black_heights.first() {
      if black_heights.iter().any(|&h| h != first) {
        errors.push("root-to-NIL paths do not all have the same BLACK-node count".to_string());
      }
    }

    if errors.is_empty() { Ok(()) } else { Err(errors) }
  }

  unsafe fn check_node(&self, node: *mut u8, black_count: u32, leaf_counts: &mut Vec<u32>, errors: &mut Vec<String>) {
    unsafe {
      if node == self.nil {
        leaf_counts.push(black_count);
        return;
      }
      let c = color(node);
      if c == RED && (color(left(node)) == RED || color(right(node)) == RED) {
        errors.push(format!("red node at {node:p} has a red child"));
      }
      let next_count = if c == BLACK { black_count + 1 } else { black_count };
      self.check_node(left(node), next_count, leaf_counts, errors);
      self.check_node(right(node), next_count, leaf_counts, errors);
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  /// A free-standing arena of word-aligned storage big enough to host however
  /// many nodes a test needs, each given a distinct block size via its header.
  struct Arena {
    words: Vec<u64>,
  }

  impl Arena {
    fn new(block_count: usize) -> Self {
      // Each "block" here is header(1 word) + NODE_OVERLAY_SIZE + footer(1 word),
      // rounded to whole u64 words for simplicity.
      let words_per_block = 2 + NODE_OVERLAY_SIZE / 8;
      Self { words: vec![0u64; block_count * words_per_block + 4] }
    }

    fn block(&mut self, index: usize, size_bytes: u32) -> *mut u8 {
      let words_per_block = 2 + NODE_OVERLAY_SIZE / 8;
      let base = unsafe { (self.words.as_mut_ptr() as *mut u8).add(index * words_per_block * 8) };
      let bp = unsafe { base.add(block::WSIZE) };
      unsafe { block::write_tags(bp, size_bytes, false) };
      bp
    }
  }

  fn color_of(bp: *mut u8) -> u8 {
    unsafe { color(bp) }
  }

  #[test]
  fn insert_and_find_best_fit_returns_minimal_sufficient_node() {
    let mut arena = Arena::new(8);
    let mut nil_storage = [0u8; NODE_OVERLAY_SIZE];
    let mut tree = unsafe { RbTree::new(nil_storage.as_mut_ptr()) };

    let sizes = [48u32, 64, 96, 128, 256, 512];
    for (i, &s) in sizes.iter().enumerate() {
      let bp = arena.block(i, s);
      unsafe { tree.insert(bp) };
    }

    let fit = unsafe { tree.find_best_fit(100) };
    assert_eq!(unsafe { block::size(fit) }, 128);

    let fit_exact = unsafe { tree.find_best_fit(64) };
    assert_eq!(unsafe { block::size(fit_exact) }, 64);

    let fit_too_big = unsafe { tree.find_best_fit(1024) };
    assert_eq!(fit_too_big, tree.nil());
  }

  #[test]
  fn duplicate_sizes_are_both_retrievable() {
    let mut arena = Arena::new(4);
    let mut nil_storage = [0u8; NODE_OVERLAY_SIZE];
    let mut tree = unsafe { RbTree::new(nil_storage.as_mut_ptr()) };

    let a = arena.block(0, 64);
    let b = arena.block(1, 64);
    unsafe {
      tree.insert(a);
      tree.insert(b);
    }

    let fit = unsafe { tree.find_best_fit(64) };
    assert!(fit == a || fit == b);

    unsafe { tree.remove(fit) };
    let other = unsafe { tree.find_best_fit(64) };
    assert!(other == a || other == b);
    assert_ne!(other, fit);
  }

  #[test]
  fn root_is_always_black_after_insert_and_remove() {
    let mut arena = Arena::new(16);
    let mut nil_storage = [0u8; NODE_OVERLAY_SIZE];
    let mut tree = unsafe { RbTree::new(nil_storage.as_mut_ptr()) };

    let mut nodes = Vec::new();
    for (i, size) in (0..16u32).map(|i| (i as usize, 48 + i * 8)).collect::<Vec<_>>() {
      let bp = arena.block(i, size);
      unsafe { tree.insert(bp) };
      nodes.push(bp);
      assert_eq!(color_of(tree.root), BLACK);
    }

    for bp in nodes {
      unsafe { tree.remove(bp) };
      if tree.root != tree.nil() {
        assert_eq!(color_of(tree.root), BLACK);
      }
    }
  }
}
