//! Linked list to keep track of free blocks.
//!
//! The list does not own any memory of its own. The reason behind this is
//! that a free block's payload is empty and won't be used by anyone, so we
//! use its first sixteen bytes as storage for the two list links:
//!
//! ```text
//!              head
//!               |
//!               v
//! +--------------------------+     +--------------------------+
//! |  Block(free)             |     |  Block(free)             |
//! |  pred: none              | <-- |  pred                    |
//! |  succ  ----------------------> |  succ: none              |
//! +--------------------------+     +--------------------------+
//! ```
//!
//! Inside of the arena this looks something like this, with allocated
//! blocks simply skipped over by the links:
//!
//! ```text
//!              +-------- succ ---------+
//!              |                       |
//! +--------+---|----+----------+------v---+----------+----------+
//! | ...    |  Free  |  Block   |   Free   |  Block   |   ...    |
//! +--------+--------+----------+----------+----------+----------+
//! ```
//!
//! Insertion is LIFO: a block that was just freed (or just split off)
//! becomes the new head. There is no ordering by size or address.

use crate::arena::Arena;
use crate::block::Block;
use crate::storage::HeapStorage;

/// Manager of the explicit free list. Holds only the head offset; all link
/// fields live embedded in the free payloads themselves.
pub(crate) struct FreeList {
    head: Option<Block>,
}

impl FreeList {
    /// Creates a new empty list.
    pub(crate) const fn new() -> Self {
        Self { head: None }
    }

    pub(crate) fn head(&self) -> Option<Block> {
        self.head
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.head.is_none()
    }

    /// Pushes `block` to the head of the list in O(1).
    pub(crate) fn insert<S: HeapStorage>(&mut self, arena: &mut Arena<S>, block: Block) {
        arena.set_pred(block, None);
        arena.set_succ(block, self.head);
        if let Some(old_head) = self.head {
            arena.set_pred(old_head, Some(block));
        }
        self.head = Some(block);
    }

    /// Unlinks `block` in O(1) using its embedded links, then clears them.
    /// Clearing matters: the allocator relies on null links to tell "has
    /// no current neighbour" apart from a stale splice.
    pub(crate) fn remove<S: HeapStorage>(&mut self, arena: &mut Arena<S>, block: Block) {
        match (arena.pred(block), arena.succ(block)) {
            (None, None) => {
                // Singleton, the list becomes empty.
                self.head = None;
            }
            (None, Some(succ)) => {
                arena.set_pred(succ, None);
                self.head = Some(succ);
            }
            (Some(pred), None) => {
                arena.set_succ(pred, None);
            }
            (Some(pred), Some(succ)) => {
                arena.set_succ(pred, Some(succ));
                arena.set_pred(succ, Some(pred));
            }
        }

        arena.set_pred(block, None);
        arena.set_succ(block, None);
    }

    /// First-fit search: returns the first block from the head whose size
    /// covers `size`. Thanks to LIFO insertion this favours reusing the
    /// most recently freed blocks.
    pub(crate) fn find_fit<S: HeapStorage>(&self, arena: &Arena<S>, size: usize) -> Option<Block> {
        if self.is_empty() {
            // Nothing has been freed yet and no extension survived.
            return None;
        }

        let mut current = self.head;
        while let Some(block) = current {
            if arena.size(block) >= size {
                // We found a block that we can use.
                return Some(block);
            }
            current = arena.succ(block);
        }

        // There is no free block we can use.
        None
    }

    /// Iterates the list from the head, following the succ links.
    pub(crate) fn iter<'a, S: HeapStorage>(
        &self,
        arena: &'a Arena<S>,
    ) -> impl Iterator<Item = Block> + 'a {
        let mut current = self.head;
        std::iter::from_fn(move || {
            let block = current?;
            current = arena.succ(block);
            Some(block)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::FixedStorage;

    /// An arena with three unlinked free blocks of the given sizes.
    fn arena_with_blocks(sizes: [usize; 3]) -> (Arena<FixedStorage>, [Block; 3]) {
        let mut arena = Arena::bootstrap(FixedStorage::with_limit(64 * 1024)).unwrap();
        let blocks = sizes.map(|size| arena.extend(size).unwrap());
        (arena, blocks)
    }

    fn listed<S: HeapStorage>(list: &FreeList, arena: &Arena<S>) -> Vec<Block> {
        list.iter(arena).collect()
    }

    #[test]
    fn new_list_is_empty() {
        let list = FreeList::new();

        assert!(list.is_empty());
        assert_eq!(None, list.head());
    }

    #[test]
    fn insert_is_lifo() {
        let (mut arena, [a, b, c]) = arena_with_blocks([24, 24, 24]);
        let mut list = FreeList::new();

        list.insert(&mut arena, a);
        list.insert(&mut arena, b);
        list.insert(&mut arena, c);

        assert_eq!(vec![c, b, a], listed(&list, &arena));
        assert_eq!(Some(c), list.head());
        // Links are bidirectional.
        assert_eq!(Some(b), arena.pred(a));
        assert_eq!(Some(c), arena.pred(b));
        assert_eq!(None, arena.pred(c));
    }

    #[test]
    fn remove_singleton_empties_the_list() {
        let (mut arena, [a, _, _]) = arena_with_blocks([24, 24, 24]);
        let mut list = FreeList::new();

        list.insert(&mut arena, a);
        list.remove(&mut arena, a);

        assert!(list.is_empty());
    }

    #[test]
    fn remove_head_promotes_the_successor() {
        let (mut arena, [a, b, c]) = arena_with_blocks([24, 24, 24]);
        let mut list = FreeList::new();
        for block in [a, b, c] {
            list.insert(&mut arena, block);
        }

        list.remove(&mut arena, c);

        assert_eq!(vec![b, a], listed(&list, &arena));
        assert_eq!(None, arena.pred(b));
    }

    #[test]
    fn remove_tail_cuts_the_predecessor_link() {
        let (mut arena, [a, b, c]) = arena_with_blocks([24, 24, 24]);
        let mut list = FreeList::new();
        for block in [a, b, c] {
            list.insert(&mut arena, block);
        }

        list.remove(&mut arena, a);

        assert_eq!(vec![c, b], listed(&list, &arena));
        assert_eq!(None, arena.succ(b));
    }

    #[test]
    fn remove_interior_splices_the_neighbours() {
        let (mut arena, [a, b, c]) = arena_with_blocks([24, 24, 24]);
        let mut list = FreeList::new();
        for block in [a, b, c] {
            list.insert(&mut arena, block);
        }

        list.remove(&mut arena, b);

        assert_eq!(vec![c, a], listed(&list, &arena));
        assert_eq!(Some(a), arena.succ(c));
        assert_eq!(Some(c), arena.pred(a));
    }

    #[test]
    fn remove_clears_the_victims_links() {
        let (mut arena, [a, b, c]) = arena_with_blocks([24, 24, 24]);
        let mut list = FreeList::new();
        for block in [a, b, c] {
            list.insert(&mut arena, block);
        }

        list.remove(&mut arena, b);

        assert_eq!(None, arena.pred(b));
        assert_eq!(None, arena.succ(b));
    }

    #[test]
    fn find_fit_returns_the_first_match_from_the_head() {
        let (mut arena, [small, large, medium]) = arena_with_blocks([24, 200, 48]);
        let mut list = FreeList::new();
        for block in [small, large, medium] {
            list.insert(&mut arena, block);
        }
        // List order is now [medium, large, small].

        // The head is checked first even though later blocks also fit.
        assert_eq!(Some(medium), list.find_fit(&arena, 40));
        // The head is too small for this one, the scan moves on.
        assert_eq!(Some(large), list.find_fit(&arena, 100));
        assert_eq!(None, list.find_fit(&arena, 500));
    }
}
