//! # tagalloc - an explicit-free-list allocator with boundary tags
//!
//! A drop-in allocate/free/resize heap over a single growable contiguous
//! byte range. Every block carries a header and footer pair (the boundary
//! tags) holding its size and allocation flag, free blocks are chained on
//! an explicit doubly-linked list through their own payload bytes, and
//! freeing coalesces with both physical neighbours immediately:
//!
//! ```text
//!                                 Free List (LIFO)
//!
//!          head -----+                +-------- succ ----------+
//!                    |                |                        |
//! +--------+--------+v-------+-------+-v------+--------+------v--+----------+
//! |  pad   |prologue|  Free  | Block |  Free  | Block  |  Free   | epilogue |
//! +--------+--------+--------+-------+--------+--------+---------+----------+
//!                    ^ blocks are framed by identical header/footer tags
//! ```
//!
//! Allocation is first-fit over the list, splitting oversized blocks when
//! the remainder can stand on its own. When nothing fits, the arena asks
//! its [`HeapStorage`] for more bytes, in whole chunks to amortize the
//! cost.
//!
//! The storage is an injected dependency: the library ships an in-memory
//! [`FixedStorage`] for tests and demos and a platform reservation per
//! target (`MmapStorage` on unix, `VirtualAllocStorage` on windows), but
//! anything that can extend a contiguous range works.
//!
//! ## Quick start
//!
//! ```
//! use tagalloc::{FixedStorage, Heap};
//!
//! let mut heap = Heap::init(FixedStorage::with_limit(1 << 20)).unwrap();
//!
//! let block = heap.allocate(64).unwrap();
//! heap.payload_mut(block)[..5].copy_from_slice(b"hello");
//! assert_eq!(b"hello", &heap.payload(block)[..5]);
//!
//! heap.free(block);
//! assert!(heap.check().is_empty());
//! ```
//!
//! ## Limitations
//!
//! - **Single-threaded**: no internal locking; share a heap only behind
//!   external synchronization.
//! - **Manual**: every allocation must be matched by exactly one free.
//!   Double frees and foreign blocks are not detected and corrupt the
//!   heap silently; [`Heap::check`] exists to surface such damage in
//!   tests.

mod arena;
mod block;
mod check;
mod freelist;
mod heap;
mod storage;
mod utils;

pub use block::Block;
pub use check::Violation;
pub use heap::{AllocError, Heap};
#[cfg(unix)]
pub use storage::MmapStorage;
#[cfg(windows)]
pub use storage::VirtualAllocStorage;
pub use storage::{FixedStorage, HeapStorage};
