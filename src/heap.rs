//! The allocator itself: placement, splitting, coalescing and growth
//! policy over one [`Arena`] and one [`FreeList`].

use std::fmt;

use log::trace;

use crate::arena::Arena;
use crate::block::{ALIGNMENT, Block, CHUNK_SIZE, MIN_BLOCK_SIZE, OVERHEAD, adjusted_size};
use crate::check::{self, Violation};
use crate::freelist::FreeList;
use crate::storage::HeapStorage;

/// Errors surfaced by [`Heap::allocate`] and [`Heap::resize`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AllocError {
    /// A zero-byte request. There is nothing to hand out; this is the
    /// conventional no-op answer, not heap damage.
    ZeroRequest,
    /// The storage behind the arena cannot supply more bytes. Non-fatal:
    /// the caller may free memory and retry.
    Exhausted,
}

impl fmt::Display for AllocError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ZeroRequest => write!(f, "zero-byte allocation request"),
            Self::Exhausted => write!(f, "heap storage exhausted"),
        }
    }
}

impl std::error::Error for AllocError {}

/// A manual heap allocator over a growable contiguous byte range.
///
/// Blocks are framed by boundary tags and free blocks are tracked on an
/// explicit LIFO free list. Allocation is first-fit with splitting, freeing
/// coalesces immediately, so the heap never holds two physically adjacent
/// free blocks.
///
/// The allocator exclusively owns every arena byte and every link field;
/// callers own only the payload of blocks they were handed and must not
/// touch it after [`Heap::free`]. Freeing a block twice, or a block that
/// never came from this heap, corrupts the free list silently: the design
/// keeps no bookkeeping of live allocations beyond the boundary tags, so
/// no validation is possible. One instance serves one thread; wrap the
/// whole heap in a lock if it must be shared.
pub struct Heap<S: HeapStorage> {
    pub(crate) arena: Arena<S>,
    pub(crate) free: FreeList,
}

impl<S: HeapStorage> Heap<S> {
    /// Bootstraps the arena on `storage` and performs the default
    /// [`CHUNK_SIZE`] extension, so a fresh heap can serve small requests
    /// without growing again.
    pub fn init(storage: S) -> Result<Self, AllocError> {
        let arena = Arena::bootstrap(storage).ok_or(AllocError::Exhausted)?;
        let mut heap = Self {
            arena,
            free: FreeList::new(),
        };
        heap.extend(CHUNK_SIZE)?;
        Ok(heap)
    }

    /// Hands out a block usable for at least `size` bytes, 8-aligned and
    /// disjoint from every other live block.
    pub fn allocate(&mut self, size: usize) -> Result<Block, AllocError> {
        if size == 0 {
            return Err(AllocError::ZeroRequest);
        }
        // A request this large can never be served, treat it as exhaustion.
        let adjusted = adjusted_size(size).ok_or(AllocError::Exhausted)?;

        if let Some(block) = self.free.find_fit(&self.arena, adjusted) {
            return Ok(self.place(block, adjusted));
        }

        // No fit found. Get more memory and place the block there.
        let block = self.extend(adjusted.max(CHUNK_SIZE))?;
        Ok(self.place(block, adjusted))
    }

    /// Returns `block` to the heap. It is immediately merged with any free
    /// physical neighbour and becomes the most recently freed block, so
    /// first-fit will favour its bytes.
    pub fn free(&mut self, block: Block) {
        let size = self.arena.size(block);
        trace!("free {size} bytes at offset {}", block.offset());

        self.arena.set_tags(block, size, false);
        self.free.insert(&mut self.arena, block);
        self.coalesce(block);
    }

    /// Resizes `block` to hold at least `size` bytes.
    ///
    /// `None` behaves as [`Heap::allocate`]; a zero `size` behaves as
    /// [`Heap::free`] and returns `Ok(None)`. Shrinking is a no-op: the
    /// block is returned unchanged. Growing absorbs a free physical
    /// successor in place when that suffices; otherwise the payload moves
    /// to a freshly allocated block and the old one is freed. On failure
    /// the original block is left untouched.
    pub fn resize(
        &mut self,
        block: Option<Block>,
        size: usize,
    ) -> Result<Option<Block>, AllocError> {
        let Some(block) = block else {
            return self.allocate(size).map(Some);
        };
        if size == 0 {
            self.free(block);
            return Ok(None);
        }

        let old_size = self.arena.size(block);
        let new_size = size
            .checked_add(OVERHEAD + ALIGNMENT - 1)
            .map(|padded| padded & !(ALIGNMENT - 1))
            .ok_or(AllocError::Exhausted)?;

        if new_size <= old_size {
            // Baseline policy: never shrink in place, the slack stays
            // inside the block as internal fragmentation.
            return Ok(Some(block));
        }

        let next = self.arena.next(block);
        if !self.arena.is_allocated(next) {
            let combined = old_size + self.arena.size(next);
            if combined >= new_size {
                // Grow into the free successor without moving the payload.
                self.free.remove(&mut self.arena, next);
                if combined - new_size >= MIN_BLOCK_SIZE {
                    self.arena.set_tags(block, new_size, true);
                    let remainder = Block(block.offset() + new_size);
                    self.arena.set_tags(remainder, combined - new_size, false);
                    self.free.insert(&mut self.arena, remainder);
                } else {
                    self.arena.set_tags(block, combined, true);
                }
                trace!(
                    "resized in place to {} bytes at offset {}",
                    self.arena.size(block),
                    block.offset()
                );
                return Ok(Some(block));
            }
        }

        // The payload has to move: allocate, copy what is still live, then
        // release the old block.
        let new_block = self.allocate(size)?;
        let live = (old_size - OVERHEAD).min(size);
        self.arena.copy_payload(block, new_block, live);
        self.free(block);
        Ok(Some(new_block))
    }

    /// The caller-usable bytes of `block`.
    pub fn payload(&self, block: Block) -> &[u8] {
        self.arena.payload(block)
    }

    pub fn payload_mut(&mut self, block: Block) -> &mut [u8] {
        self.arena.payload_mut(block)
    }

    /// Walks the arena and the free list and reports every invariant
    /// violation found. An empty report means the heap is consistent.
    pub fn check(&self) -> Vec<Violation> {
        check::check(&self.arena, &self.free)
    }

    /// Total bytes ever granted by the storage, sentinels included.
    pub fn total_bytes(&self) -> usize {
        self.arena.len()
    }

    /// Total bytes currently held in free blocks, tags included.
    pub fn free_bytes(&self) -> usize {
        self.free
            .iter(&self.arena)
            .map(|block| self.arena.size(block))
            .sum()
    }

    /// Grows the arena and returns the new free block, already linked and
    /// coalesced with a free predecessor if there was one.
    fn extend(&mut self, bytes: usize) -> Result<Block, AllocError> {
        let block = self.arena.extend(bytes).ok_or(AllocError::Exhausted)?;
        self.free.insert(&mut self.arena, block);
        Ok(self.coalesce(block))
    }

    /// Marks `block` as allocated with `size` bytes, splitting off the
    /// tail as a new free block when the leftover could stand on its own.
    /// A leftover below [`MIN_BLOCK_SIZE`] could never hold its free-list
    /// links, so it is handed out with the block instead.
    fn place(&mut self, block: Block, size: usize) -> Block {
        let old_size = self.arena.size(block);
        self.free.remove(&mut self.arena, block);

        if old_size - size >= MIN_BLOCK_SIZE {
            self.arena.set_tags(block, size, true);
            let remainder = Block(block.offset() + size);
            self.arena.set_tags(remainder, old_size - size, false);
            self.free.insert(&mut self.arena, remainder);
            trace!(
                "split {old_size} bytes at offset {} into {size} + {}",
                block.offset(),
                old_size - size
            );
        } else {
            self.arena.set_tags(block, old_size, true);
        }
        block
    }

    /// Merges `block` with its free physical neighbours. `block` must
    /// already be free and on the free list. Returns the merged block,
    /// which is anchored at the predecessor's offset when one was
    /// absorbed.
    fn coalesce(&mut self, block: Block) -> Block {
        let prev_free = !self.arena.prev_allocated(block);
        let next = self.arena.next(block);
        let next_free = !self.arena.is_allocated(next);
        let size = self.arena.size(block);

        match (prev_free, next_free) {
            (false, false) => block,
            (false, true) => {
                let merged = size + self.arena.size(next);
                self.free.remove(&mut self.arena, block);
                self.free.remove(&mut self.arena, next);
                self.arena.set_tags(block, merged, false);
                self.free.insert(&mut self.arena, block);
                trace!("coalesced with successor into {merged} bytes");
                block
            }
            (true, false) => {
                let prev = self.arena.prev(block);
                let merged = size + self.arena.size(prev);
                self.free.remove(&mut self.arena, block);
                self.free.remove(&mut self.arena, prev);
                self.arena.set_tags(prev, merged, false);
                self.free.insert(&mut self.arena, prev);
                trace!("coalesced with predecessor into {merged} bytes");
                prev
            }
            (true, true) => {
                let prev = self.arena.prev(block);
                let merged = size + self.arena.size(prev) + self.arena.size(next);
                self.free.remove(&mut self.arena, block);
                self.free.remove(&mut self.arena, prev);
                self.free.remove(&mut self.arena, next);
                self.arena.set_tags(prev, merged, false);
                self.free.insert(&mut self.arena, prev);
                trace!("coalesced with both neighbours into {merged} bytes");
                prev
            }
        }
    }
}
