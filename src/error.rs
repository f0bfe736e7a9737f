use thiserror::Error;

/// Errors the allocator can surface to a caller that opts into the
/// `try_`-prefixed entry points (see [`crate::heap::RbHeap`]).
///
/// The classical `malloc`/`free`/`realloc` entry points fold [`HeapError::OutOfMemory`]
/// into `None`, matching the null-pointer-on-failure convention of the C API this
/// crate's core algorithm is modeled on.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum HeapError {
  /// The heap growth source ([`crate::grower::HeapGrower`]) refused to extend the heap.
  #[error("heap growth source refused to extend the heap")]
  OutOfMemory,

  /// Reserved for caller-facing wrappers that want to reject malformed requests
  /// explicitly. The core never constructs this variant itself: a zero-byte
  /// request is handled by returning `None` (malloc) or by freeing (realloc).
  #[error("invalid allocation request")]
  InvalidInput,
}
