//! Opaque block handles and the remap produced by compaction.

use std::collections::HashMap;
use std::fmt;

/// Opaque identifier of a block allocated from a [`PoolAllocator`].
///
/// A handle names the block's start offset together with the generation the
/// block was stamped with when it was created or last relocated. Once the
/// block is released or moved by [`PoolAllocator::defragment`], the handle no
/// longer resolves, even if a new block later starts at the same offset.
///
/// [`PoolAllocator`]: crate::memory::pool::PoolAllocator
/// [`PoolAllocator::defragment`]: crate::memory::pool::PoolAllocator::defragment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BlockHandle {
    offset: usize,
    generation: u64,
}

impl BlockHandle {
    pub(crate) fn new(offset: usize, generation: u64) -> Self {
        Self { offset, generation }
    }

    /// Start offset of the block inside the pool.
    pub fn offset(&self) -> usize {
        self.offset
    }

    pub(crate) fn generation(&self) -> u64 {
        self.generation
    }
}

impl fmt::Display for BlockHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "block@{}#{}", self.offset, self.generation)
    }
}

/// Where one live block ended up after compaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Relocation {
    pub from: BlockHandle,
    pub to: BlockHandle,
    pub size: usize,
}

impl Relocation {
    pub fn moved(&self) -> bool {
        self.from != self.to
    }
}

/// Result of a [`defragment`] pass.
///
/// Holds one [`Relocation`] per block that was live during the pass, in
/// ascending offset order. Handles obtained before the pass must be passed
/// through [`resolve`](Self::resolve); handles of moved blocks are stale.
///
/// [`defragment`]: crate::memory::pool::PoolAllocator::defragment
#[derive(Debug, Clone, Default)]
pub struct DefragmentReport {
    relocations: Vec<Relocation>,
    index: HashMap<BlockHandle, BlockHandle>,
    /// Total bytes copied to new locations
    pub bytes_moved: usize,
}

impl DefragmentReport {
    pub(crate) fn push(&mut self, relocation: Relocation) {
        if relocation.moved() {
            self.bytes_moved += relocation.size;
        }
        self.index.insert(relocation.from, relocation.to);
        self.relocations.push(relocation);
    }

    /// Translate a pre-compaction handle into its current handle.
    ///
    /// Returns `None` for handles that were not live when the pass ran.
    pub fn resolve(&self, old: BlockHandle) -> Option<BlockHandle> {
        self.index.get(&old).copied()
    }

    pub fn relocations(&self) -> &[Relocation] {
        &self.relocations
    }

    /// Relocations of blocks whose offset changed.
    pub fn moved_blocks(&self) -> impl Iterator<Item = &Relocation> {
        self.relocations.iter().filter(|r| r.moved())
    }

    pub fn moved_count(&self) -> usize {
        self.moved_blocks().count()
    }

    pub fn is_noop(&self) -> bool {
        self.bytes_moved == 0
    }
}
