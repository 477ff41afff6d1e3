//! The heap arena: the contiguous byte range all blocks live in.
//!
//! The arena frames the bytes granted by its [`HeapStorage`] with a pair of
//! zero-size, always-allocated sentinel tags, so the coalescing logic never
//! has to special-case the ends of the heap:
//!
//! ```text
//!  offset 0    4          8          12                             end-4
//!  +--------+----------+----------+--------------------------+----------+
//!  |  pad   | prologue | prologue |        blocks ...        | epilogue |
//!  |        |  header  |  footer  |                          |  header  |
//!  +--------+----------+----------+--------------------------+----------+
//!                                  ^ first payload at offset 16
//! ```
//!
//! The pad word keeps every payload 8-aligned. Growth only ever appends at
//! the epilogue, rewriting it one block further out, so offsets that were
//! handed out earlier keep pointing at the same bytes.
//!
//! The arena is a dumb framing layer on purpose: it reads and writes tags
//! and links, navigates between physical neighbours, and extends itself.
//! Placement, splitting and coalescing policy belong to [`crate::Heap`].

use log::debug;

use crate::block::{Block, LINK_SIZE, OVERHEAD, WORD, pack, unpack};
use crate::storage::HeapStorage;
use crate::utils::align;

/// Offset of the first real payload: pad word, prologue header, prologue
/// footer, then the first block header.
pub(crate) const FIRST_PAYLOAD: usize = 4 * WORD;

/// Bytes consumed by the pad word and the sentinel tags.
pub(crate) const SENTINEL_OVERHEAD: usize = 4 * WORD;

pub(crate) struct Arena<S: HeapStorage> {
    storage: S,
}

impl<S: HeapStorage> Arena<S> {
    /// Establishes the sentinel frame on an empty storage. `None` if the
    /// storage cannot supply even the initial bytes.
    pub(crate) fn bootstrap(mut storage: S) -> Option<Self> {
        let start = storage.grow(SENTINEL_OVERHEAD)?;
        debug_assert_eq!(0, start);

        let mut arena = Self { storage };
        arena.put_word(0, 0); // alignment padding
        arena.put_word(WORD, pack(0, true)); // prologue header
        arena.put_word(2 * WORD, pack(0, true)); // prologue footer
        arena.put_word(3 * WORD, pack(0, true)); // epilogue header
        Some(arena)
    }

    /// Appends `bytes` (rounded up to an even number of words) at the
    /// epilogue and frames them as a single free block. The old epilogue
    /// becomes the new block's header and a fresh epilogue is written at
    /// the new end.
    ///
    /// The returned block is not linked into any free list and not
    /// coalesced; that is the caller's job. Propagates exhaustion as
    /// `None` with the arena untouched.
    pub(crate) fn extend(&mut self, bytes: usize) -> Option<Block> {
        let size = align(bytes, 2 * WORD);
        let start = self.storage.grow(size)?;
        debug!("arena extended by {size} bytes at offset {start}");

        let block = Block(start);
        self.set_tags(block, size, false);
        let epilogue = self.storage.len() - WORD;
        self.put_word(epilogue, pack(0, true));
        Some(block)
    }

    /// Total bytes granted by the storage, sentinels included.
    pub(crate) fn len(&self) -> usize {
        self.storage.len()
    }

    /// Total size of `block` in bytes, read from its header.
    pub(crate) fn size(&self, block: Block) -> usize {
        unpack(self.word(block.header_offset())).0
    }

    pub(crate) fn is_allocated(&self, block: Block) -> bool {
        unpack(self.word(block.header_offset())).1
    }

    /// Writes matching header and footer tags for `block` in one step, so
    /// the two can never disagree through this path.
    pub(crate) fn set_tags(&mut self, block: Block, size: usize, allocated: bool) {
        let tag = pack(size, allocated);
        self.put_word(block.header_offset(), tag);
        self.put_word(block.footer_offset(size), tag);
    }

    pub(crate) fn header(&self, block: Block) -> u32 {
        self.word(block.header_offset())
    }

    pub(crate) fn footer(&self, block: Block) -> u32 {
        self.word(block.footer_offset(self.size(block)))
    }

    /// Physical successor of `block`. The result is the epilogue sentinel
    /// when `block` is the last block; check for a zero size before going
    /// any further.
    pub(crate) fn next(&self, block: Block) -> Block {
        Block(block.0 + self.size(block))
    }

    /// Physical predecessor of `block`, found through the footer that ends
    /// right before its header. Must not be called when the predecessor is
    /// a sentinel; check [`Arena::prev_allocated`] first.
    pub(crate) fn prev(&self, block: Block) -> Block {
        let (size, _) = unpack(self.word(block.0 - OVERHEAD));
        Block(block.0 - size)
    }

    /// Allocated bit of the physical predecessor's footer. Safe on the
    /// first block too: there it reads the prologue footer, which is
    /// always allocated.
    pub(crate) fn prev_allocated(&self, block: Block) -> bool {
        unpack(self.word(block.0 - OVERHEAD)).1
    }

    pub(crate) fn pred(&self, block: Block) -> Option<Block> {
        self.link(block.pred_offset())
    }

    pub(crate) fn succ(&self, block: Block) -> Option<Block> {
        self.link(block.succ_offset())
    }

    pub(crate) fn set_pred(&mut self, block: Block, target: Option<Block>) {
        self.put_link(block.pred_offset(), target);
    }

    pub(crate) fn set_succ(&mut self, block: Block, target: Option<Block>) {
        self.put_link(block.succ_offset(), target);
    }

    /// The caller-usable bytes of `block`.
    pub(crate) fn payload(&self, block: Block) -> &[u8] {
        let end = block.0 + self.size(block) - OVERHEAD;
        &self.storage.bytes()[block.0..end]
    }

    pub(crate) fn payload_mut(&mut self, block: Block) -> &mut [u8] {
        let end = block.0 + self.size(block) - OVERHEAD;
        &mut self.storage.bytes_mut()[block.0..end]
    }

    /// Copies `len` payload bytes from `src` to `dst`. The ranges may
    /// overlap.
    pub(crate) fn copy_payload(&mut self, src: Block, dst: Block, len: usize) {
        self.storage.bytes_mut().copy_within(src.0..src.0 + len, dst.0);
    }

    /// Visits every real block in address order, sentinels excluded.
    pub(crate) fn blocks(&self) -> Blocks<'_, S> {
        Blocks {
            arena: self,
            current: Block(FIRST_PAYLOAD),
        }
    }

    fn word(&self, offset: usize) -> u32 {
        let mut raw = [0u8; WORD];
        raw.copy_from_slice(&self.storage.bytes()[offset..offset + WORD]);
        u32::from_ne_bytes(raw)
    }

    pub(crate) fn put_word(&mut self, offset: usize, value: u32) {
        self.storage.bytes_mut()[offset..offset + WORD].copy_from_slice(&value.to_ne_bytes());
    }

    fn link(&self, offset: usize) -> Option<Block> {
        let mut raw = [0u8; LINK_SIZE];
        raw.copy_from_slice(&self.storage.bytes()[offset..offset + LINK_SIZE]);
        match u64::from_ne_bytes(raw) {
            // Offset 0 is the pad word, never a payload, so it encodes
            // the absence of a link.
            0 => None,
            payload => Some(Block(payload as usize)),
        }
    }

    fn put_link(&mut self, offset: usize, target: Option<Block>) {
        let value = target.map_or(0u64, |block| block.0 as u64);
        self.storage.bytes_mut()[offset..offset + LINK_SIZE]
            .copy_from_slice(&value.to_ne_bytes());
    }
}

/// Address-order iterator over the arena's blocks. Stops at the epilogue.
pub(crate) struct Blocks<'a, S: HeapStorage> {
    arena: &'a Arena<S>,
    current: Block,
}

impl<'a, S: HeapStorage> Iterator for Blocks<'a, S> {
    type Item = Block;

    fn next(&mut self) -> Option<Block> {
        let block = self.current;
        if self.arena.size(block) == 0 {
            // Reached the epilogue sentinel.
            return None;
        }
        self.current = self.arena.next(block);
        Some(block)
    }
}
