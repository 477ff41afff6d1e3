//! Read-only heap validation.
//!
//! Not required for allocate/free to work, but the test suite leans on it:
//! after any sequence of operations a consistent heap produces an empty
//! report. The checker never mutates and never panics on a broken heap; it
//! collects structured violations and lets the caller decide how fatal
//! they are. In production a non-empty report means some caller misused
//! the heap earlier (a double free, a write past a payload), not that the
//! allocator can recover.

use std::fmt;

use crate::arena::Arena;
use crate::block::{Block, MIN_BLOCK_SIZE};
use crate::freelist::FreeList;
use crate::storage::HeapStorage;

/// One detected invariant violation and the block it was found at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Violation {
    /// A free-list member carries the allocated bit.
    AllocatedInFreeList(Block),
    /// A free block has a physically adjacent free neighbour, so a
    /// coalescing opportunity was missed.
    Uncoalesced(Block),
    /// A free block in the arena scan is unreachable from the free-list
    /// head.
    NotInFreeList(Block),
    /// A block whose footer does not mirror its header.
    TagMismatch(Block),
    /// Backward navigation from this block does not land on its physical
    /// predecessor: the neighbouring tags overlap or leave a gap.
    Overlap(Block),
    /// A header holding a size below the minimum or reaching past the end
    /// of the arena. The scan stops here, nothing behind it can be
    /// trusted.
    BadSize(Block),
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AllocatedInFreeList(b) => {
                write!(f, "offset {}: allocated block on the free list", b.offset())
            }
            Self::Uncoalesced(b) => {
                write!(f, "offset {}: free block with a free neighbour", b.offset())
            }
            Self::NotInFreeList(b) => {
                write!(f, "offset {}: free block missing from the free list", b.offset())
            }
            Self::TagMismatch(b) => {
                write!(f, "offset {}: header and footer disagree", b.offset())
            }
            Self::Overlap(b) => {
                write!(f, "offset {}: block overlaps its predecessor", b.offset())
            }
            Self::BadSize(b) => {
                write!(f, "offset {}: malformed block size", b.offset())
            }
        }
    }
}

/// Walks the free list and the whole arena in address order and reports
/// every violation found.
///
/// Checked invariants:
/// 1. every free-list member has its allocated bit clear;
/// 2. no free block has a physically free neighbour;
/// 3. every free block found in the arena scan is on the free list;
/// 4. adjacent blocks tile the arena exactly, footer against header;
/// plus the tag invariant that header and footer of a block are
/// byte-identical. Assumes the free-list links are acyclic.
pub(crate) fn check<S: HeapStorage>(arena: &Arena<S>, free: &FreeList) -> Vec<Violation> {
    let mut violations = Vec::new();

    let mut listed: Vec<Block> = Vec::new();
    let mut current = free.head();
    while let Some(block) = current {
        if arena.is_allocated(block) {
            violations.push(Violation::AllocatedInFreeList(block));
        }
        listed.push(block);
        current = arena.succ(block);
    }

    let mut previous: Option<Block> = None;
    for block in arena.blocks() {
        let size = arena.size(block);
        if size < MIN_BLOCK_SIZE || block.offset() + size > arena.len() {
            violations.push(Violation::BadSize(block));
            break;
        }

        if arena.header(block) != arena.footer(block) {
            violations.push(Violation::TagMismatch(block));
        }

        if let Some(previous) = previous {
            if arena.prev(block) != previous {
                violations.push(Violation::Overlap(block));
            }
        }

        if !arena.is_allocated(block) {
            let next = arena.next(block);
            if !arena.is_allocated(next) || !arena.prev_allocated(block) {
                violations.push(Violation::Uncoalesced(block));
            }
            if !listed.contains(&block) {
                violations.push(Violation::NotInFreeList(block));
            }
        }

        previous = Some(block);
    }

    violations
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::pack;
    use crate::heap::Heap;
    use crate::storage::FixedStorage;

    fn new_heap() -> Heap<FixedStorage> {
        Heap::init(FixedStorage::with_limit(64 * 1024)).unwrap()
    }

    #[test]
    fn a_consistent_heap_produces_an_empty_report() {
        let mut heap = new_heap();
        let block = heap.allocate(64).unwrap();
        heap.allocate(32).unwrap();
        heap.free(block);

        assert!(heap.check().is_empty());
    }

    #[test]
    fn detects_an_allocated_block_on_the_free_list() {
        let mut heap = new_heap();

        // Flip the head of the free list to allocated behind the list's
        // back.
        let head = heap.free.head().unwrap();
        let size = heap.arena.size(head);
        heap.arena.set_tags(head, size, true);

        assert!(heap.check().contains(&Violation::AllocatedInFreeList(head)));
    }

    #[test]
    fn detects_adjacent_free_blocks_and_lost_blocks() {
        let mut heap = new_heap();

        let a = heap.allocate(32).unwrap();
        let _guard = heap.allocate(32).unwrap();
        heap.free(a);

        // Hand-craft a second free block right behind `a`, bypassing the
        // free list and the coalescing that `Heap::free` would do.
        let guard = heap.arena.next(a);
        let size = heap.arena.size(guard);
        heap.arena.set_tags(guard, size, false);

        let report = heap.check();
        assert!(report.contains(&Violation::Uncoalesced(a)));
        assert!(report.contains(&Violation::Uncoalesced(guard)));
        assert!(report.contains(&Violation::NotInFreeList(guard)));
    }

    #[test]
    fn detects_a_footer_that_disagrees_with_its_header() {
        let mut heap = new_heap();

        let block = heap.allocate(32).unwrap();
        let size = heap.arena.size(block);
        // Scribble an inconsistent footer, as an overflowing caller would.
        heap.arena
            .put_word(block.footer_offset(size), pack(size, false));

        let report = heap.check();
        assert!(report.contains(&Violation::TagMismatch(block)));
    }

    #[test]
    fn detects_an_overlapping_neighbour() {
        let mut heap = new_heap();

        let a = heap.allocate(32).unwrap();
        let b = heap.allocate(32).unwrap();
        heap.allocate(32).unwrap();

        // Lie about `a`'s size in its footer only: backward navigation
        // from `b` no longer lands on `a`.
        let size = heap.arena.size(a);
        heap.arena
            .put_word(a.footer_offset(size), pack(size - 8, true));

        let report = heap.check();
        assert!(report.contains(&Violation::TagMismatch(a)));
        assert!(report.contains(&Violation::Overlap(b)));
    }

    #[test]
    fn detects_a_malformed_size_and_stops() {
        let mut heap = new_heap();

        let block = heap.allocate(32).unwrap();
        // A size too small to ever hold the free-list links.
        heap.arena.put_word(block.header_offset(), pack(8, true));

        let report = heap.check();
        assert!(report.iter().any(|v| matches!(v, Violation::BadSize(_))));
    }
}
