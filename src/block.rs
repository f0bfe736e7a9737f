//! Block layout and boundary-tag arithmetic (C1).
//!
//! Every block is a contiguous, `DSIZE`-multiple range of heap bytes:
//!
//! ```text
//!   ┌────────┬──────────────────────────────┬────────┐
//!   │ header │            payload           │ footer │
//!   │ (WSIZE)│                               │ (WSIZE)│
//!   └────────┴──────────────────────────────┴────────┘
//!            ▲
//!            └── bp: the pointer passed to and returned from every function
//!                here, and the pointer handed to the client when allocated.
//! ```
//!
//! Header and footer are always kept identical (invariant I1); the footer
//! exists purely so [`prev_block`] can walk backwards from a block's start
//! without a separate reverse index.

/// Machine word size in bytes. Header and footer are each one word.
pub const WSIZE: usize = 4;

/// Double-word size in bytes. Every block's total size is a `DSIZE` multiple,
/// and every payload pointer this crate hands out is `DSIZE`-aligned.
pub const DSIZE: usize = 8;

/// Minimum block size: large enough to overlay a free-block tree node
/// (parent, left, right, color — 3×`DSIZE` plus a byte) inside the payload
/// of the smallest possible free block, rounded up to a `DSIZE` multiple.
pub const MIN_BLOCK_SIZE: u32 = 6 * DSIZE as u32;

/// Default heap growth increment, in bytes, requested by [`crate::heap::RbHeap::extend`]
/// when no single request needs more.
pub const CHUNK_SIZE: u32 = 1 << 12;

const ALLOC_BIT: u32 = 0x1;
const SIZE_MASK: u32 = !0x7;

#[inline]
unsafe fn get(p: *mut u8) -> u32 {
  unsafe { (p as *const u32).read() }
}

#[inline]
unsafe fn put(p: *mut u8, val: u32) {
  unsafe { (p as *mut u32).write(val) }
}

#[inline]
fn pack(size: u32, alloc: bool) -> u32 {
  size | (alloc as u32 & ALLOC_BIT)
}

/// Address of `bp`'s header word.
///
/// # Safety
/// `bp` must point at the payload of a live block.
#[inline]
pub unsafe fn header_ptr(bp: *mut u8) -> *mut u8 {
  unsafe { bp.sub(WSIZE) }
}

/// Total size of the block, in bytes, read from its header.
///
/// # Safety
/// `bp` must point at the payload of a live block.
#[inline]
pub unsafe fn size(bp: *mut u8) -> u32 {
  unsafe { get(header_ptr(bp)) & SIZE_MASK }
}

/// Whether the block is currently marked allocated.
///
/// # Safety
/// `bp` must point at the payload of a live block.
#[inline]
pub unsafe fn is_alloc(bp: *mut u8) -> bool {
  unsafe { get(header_ptr(bp)) & ALLOC_BIT != 0 }
}

/// Address of `bp`'s footer word, computed from the block's current header size.
///
/// # Safety
/// `bp` must point at the payload of a live block.
#[inline]
pub unsafe fn footer_ptr(bp: *mut u8) -> *mut u8 {
  unsafe { bp.add(size(bp) as usize - DSIZE) }
}

/// Payload pointer of the block immediately following `bp`.
///
/// # Safety
/// `bp` must point at the payload of a live block whose header is valid.
#[inline]
pub unsafe fn next_block(bp: *mut u8) -> *mut u8 {
  unsafe { bp.add(size(bp) as usize) }
}

/// Payload pointer of the block immediately preceding `bp`, found by reading
/// the previous block's footer (which sits in the `DSIZE` bytes right before `bp`).
///
/// # Safety
/// `bp` must not be the heap's first block (the prologue always precedes it).
#[inline]
pub unsafe fn prev_block(bp: *mut u8) -> *mut u8 {
  unsafe {
    let prev_footer = bp.sub(DSIZE);
    let prev_size = get(prev_footer) & SIZE_MASK;
    bp.sub(prev_size as usize)
  }
}

/// Writes `(size, alloc)` to both header and footer of `bp`, maintaining
/// invariant I1. The footer address is derived from `size` directly (not from
/// the block's old header), so this is safe to call when shrinking, growing,
/// or re-tagging a block to a size different from what its header currently says.
///
/// # Safety
/// `bp .. bp + size` must be valid, writable heap memory.
#[inline]
pub unsafe fn write_tags(bp: *mut u8, size: u32, alloc: bool) {
  unsafe {
    let packed = pack(size, alloc);
    put(header_ptr(bp), packed);
    put(bp.add(size as usize - DSIZE), packed);
  }
}

/// Writes the zero-size, allocated epilogue header at `header_addr` (I5).
///
/// The epilogue has no payload and no footer — it is a single word, always
/// `pack(0, true)` — so it cannot go through [`write_tags`], which assumes a
/// header/footer pair straddling a payload.
///
/// # Safety
/// `header_addr` must be `WSIZE`-aligned, writable heap memory.
#[inline]
pub unsafe fn write_epilogue(header_addr: *mut u8) {
  unsafe { put(header_addr, pack(0, true)) }
}

/// Raw header-word read at an arbitrary address, split into `(size, alloc)`.
///
/// Debug-only: used by the `checked` heap walker, which needs to read a
/// block's header before it can compute `header_ptr`/`footer_ptr` relative to
/// a payload pointer it hasn't derived yet.
///
/// # Safety
/// `header_addr` must point at a valid header word.
#[inline]
pub unsafe fn peek_header(header_addr: *mut u8) -> (u32, bool) {
  unsafe {
    let word = get(header_addr);
    (word & SIZE_MASK, word & ALLOC_BIT != 0)
  }
}
