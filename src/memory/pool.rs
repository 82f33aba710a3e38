use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Mutex, MutexGuard};

use tracing::{debug, info, warn};

use crate::memory::buffer::PoolBuffer;
use crate::memory::handle::{BlockHandle, DefragmentReport, Relocation};
use crate::memory::occupancy::OccupancyMap;
use crate::memory::stats::{MemoryUtilization, PoolStats};
use crate::PoolConfig;

/// Capacity of a pool created with [`PoolAllocator::new`].
pub const DEFAULT_POOL_SIZE: usize = 1024;

/// Base alignment of the backing buffer unless configured otherwise.
pub const DEFAULT_BASE_ALIGNMENT: usize = 64;

/// Errors that can occur during pool operations
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PoolError {
    #[error("Out of memory: no free run of {requested} bytes with alignment {alignment} ({available} bytes free)")]
    OutOfMemory {
        requested: usize,
        alignment: usize,
        available: usize,
    },

    #[error("Invalid size: {size} bytes (pool capacity {capacity} bytes)")]
    InvalidSize { size: usize, capacity: usize },

    #[error("Invalid alignment: {alignment} is not a power of 2")]
    InvalidAlignment { alignment: usize },

    #[error("Double free or invalid handle: {handle}")]
    DoubleFreeOrInvalidHandle { handle: BlockHandle },

    #[error("Unknown handle: {handle}")]
    UnknownHandle { handle: BlockHandle },

    #[error("Reference count overflow: {handle} is already at the maximum count")]
    RefCountOverflow { handle: BlockHandle },

    #[error("Access out of bounds: {len} bytes at offset {offset} in {handle} of {size} bytes")]
    OutOfBounds {
        handle: BlockHandle,
        offset: usize,
        len: usize,
        size: usize,
    },

    #[error("Allocation failed: {0}")]
    AllocationFailed(String),

    #[error("Pool lock poisoned")]
    LockPoisoned,
}

impl PoolError {
    /// True for an out-of-memory failure that compaction is guaranteed to
    /// resolve, assuming no other allocation happens in between.
    ///
    /// Compaction leaves all free bytes in one tail run. For aligned requests
    /// the tail may start off the alignment, so up to `alignment - 1` bytes of
    /// padding are reserved before answering `true`.
    pub fn is_recoverable_by_defragment(&self) -> bool {
        match *self {
            PoolError::OutOfMemory {
                requested,
                alignment,
                available,
            } => requested
                .checked_add(alignment.max(1) - 1)
                .is_some_and(|needed| available >= needed),
            _ => false,
        }
    }
}

/// A block still allocated when the pool is torn down.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LeakedBlock {
    pub handle: BlockHandle,
    pub size: usize,
    pub ref_count: u32,
}

/// Blocks that were live at the time of the report, in offset order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LeakReport {
    blocks: Vec<LeakedBlock>,
}

impl LeakReport {
    /// Number of leaked blocks.
    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    /// True when every block was released.
    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    /// Sum of the leaked blocks' sizes in bytes.
    pub fn total_bytes(&self) -> usize {
        self.blocks.iter().map(|b| b.size).sum()
    }

    /// Leaked blocks in ascending offset order.
    pub fn iter(&self) -> impl Iterator<Item = &LeakedBlock> {
        self.blocks.iter()
    }

    fn log(&self) {
        if self.is_empty() {
            return;
        }
        warn!(
            leaked_blocks = self.len(),
            leaked_bytes = self.total_bytes(),
            "memory leak detected"
        );
        for block in &self.blocks {
            warn!(handle = %block.handle, size = block.size, ref_count = block.ref_count, "leaked block");
        }
    }
}

impl fmt::Display for LeakReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return write!(f, "No memory leaks detected");
        }
        writeln!(f, "Memory leak detected: {} block(s), {} bytes", self.len(), self.total_bytes())?;
        for block in &self.blocks {
            writeln!(f, "Leaked block: {}, Size = {} bytes", block.handle, block.size)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy)]
struct BlockRecord {
    size: usize,
    ref_count: u32,
    generation: u64,
}

/// Everything guarded by the pool lock.
struct PoolState {
    buffer: PoolBuffer,
    occupancy: OccupancyMap,
    /// Live blocks keyed by start offset
    blocks: BTreeMap<usize, BlockRecord>,
    next_generation: u64,
    stats: PoolStats,
    stats_enabled: bool,
}

impl PoolState {
    fn new(buffer: PoolBuffer, stats_enabled: bool) -> Self {
        let occupancy = OccupancyMap::new(buffer.len());
        Self {
            buffer,
            occupancy,
            blocks: BTreeMap::new(),
            next_generation: 1,
            stats: PoolStats::new(),
            stats_enabled,
        }
    }

    fn record(&mut self, update: impl FnOnce(&mut PoolStats)) {
        if self.stats_enabled {
            update(&mut self.stats);
        }
    }

    fn stamp(&mut self) -> u64 {
        let generation = self.next_generation;
        self.next_generation += 1;
        generation
    }

    fn lookup(&self, handle: BlockHandle) -> Option<&BlockRecord> {
        self.blocks
            .get(&handle.offset())
            .filter(|record| record.generation == handle.generation())
    }

    fn lookup_mut(&mut self, handle: BlockHandle) -> Option<&mut BlockRecord> {
        self.blocks
            .get_mut(&handle.offset())
            .filter(|record| record.generation == handle.generation())
    }

    fn allocate(&mut self, size: usize, alignment: Option<usize>) -> Result<BlockHandle, PoolError> {
        let capacity = self.buffer.len();
        if size == 0 {
            return Err(PoolError::InvalidSize { size, capacity });
        }
        if let Some(alignment) = alignment {
            if !alignment.is_power_of_two() {
                return Err(PoolError::InvalidAlignment { alignment });
            }
        }

        let base_address = self.buffer.base_address();
        let Some(offset) = self.occupancy.find_free_run(size, alignment, base_address) else {
            self.record(|stats| stats.record_failed_allocation());
            return Err(PoolError::OutOfMemory {
                requested: size,
                alignment: alignment.unwrap_or(1),
                available: capacity - self.occupancy.occupied(),
            });
        };

        let span = offset..offset + size;
        self.occupancy.mark(span.clone());
        self.buffer.as_mut_slice()[span].fill(0);

        let generation = self.stamp();
        self.blocks.insert(
            offset,
            BlockRecord {
                size,
                ref_count: 1,
                generation,
            },
        );

        let used = self.occupancy.occupied();
        self.record(|stats| stats.record_allocation(size, alignment, used));

        Ok(BlockHandle::new(offset, generation))
    }

    fn retain(&mut self, handle: BlockHandle) -> Result<u32, PoolError> {
        let record = self
            .lookup_mut(handle)
            .ok_or(PoolError::UnknownHandle { handle })?;
        let count = record
            .ref_count
            .checked_add(1)
            .ok_or(PoolError::RefCountOverflow { handle })?;
        record.ref_count = count;
        self.record(|stats| stats.record_retain());
        Ok(count)
    }

    fn deallocate(&mut self, handle: BlockHandle) -> Result<u32, PoolError> {
        let Some(record) = self.lookup_mut(handle) else {
            self.record(|stats| stats.record_invalid_free());
            return Err(PoolError::DoubleFreeOrInvalidHandle { handle });
        };

        record.ref_count -= 1;
        let (remaining, size) = (record.ref_count, record.size);

        if remaining == 0 {
            let offset = handle.offset();
            self.blocks.remove(&offset);
            self.occupancy.clear(offset..offset + size);
        }

        self.record(|stats| stats.record_deallocation(remaining == 0));
        Ok(remaining)
    }

    fn write(&mut self, handle: BlockHandle, offset: usize, bytes: &[u8]) -> Result<(), PoolError> {
        let record = *self
            .lookup(handle)
            .ok_or(PoolError::UnknownHandle { handle })?;

        let end = offset
            .checked_add(bytes.len())
            .filter(|&end| end <= record.size)
            .ok_or(PoolError::OutOfBounds {
                handle,
                offset,
                len: bytes.len(),
                size: record.size,
            })?;

        let start = handle.offset();
        self.buffer.as_mut_slice()[start + offset..start + end].copy_from_slice(bytes);
        Ok(())
    }

    fn read(&self, handle: BlockHandle) -> Result<Vec<u8>, PoolError> {
        let record = self
            .lookup(handle)
            .ok_or(PoolError::UnknownHandle { handle })?;
        let start = handle.offset();
        Ok(self.buffer.as_slice()[start..start + record.size].to_vec())
    }

    /// Slide every live block down to the lowest free offset, in order.
    fn defragment(&mut self) -> DefragmentReport {
        let mut report = DefragmentReport::default();
        let blocks = std::mem::take(&mut self.blocks);
        let mut target = 0;

        for (offset, mut record) in blocks {
            let from = BlockHandle::new(offset, record.generation);

            if offset != target {
                let size = record.size;
                self.buffer
                    .as_mut_slice()
                    .copy_within(offset..offset + size, target);
                // Clear before marking: the two spans may overlap.
                self.occupancy.clear(offset..offset + size);
                self.occupancy.mark(target..target + size);
                record.generation = self.stamp();
            }

            let to = BlockHandle::new(target, record.generation);
            report.push(Relocation {
                from,
                to,
                size: record.size,
            });
            self.blocks.insert(target, record);
            target += record.size;
        }

        debug_assert!(self.occupancy.is_compact());
        debug_assert_eq!(self.occupancy.occupied(), target);

        let bytes_moved = report.bytes_moved;
        self.record(|stats| stats.record_defragment(bytes_moved));
        report
    }

    fn leak_report(&self) -> LeakReport {
        LeakReport {
            blocks: self
                .blocks
                .iter()
                .map(|(&offset, record)| LeakedBlock {
                    handle: BlockHandle::new(offset, record.generation),
                    size: record.size,
                    ref_count: record.ref_count,
                })
                .collect(),
        }
    }

    fn utilization(&self) -> MemoryUtilization {
        MemoryUtilization::new(
            self.buffer.len(),
            self.occupancy.occupied(),
            self.occupancy.largest_free_run(),
            self.blocks.len(),
            self.stats.peak_usage_bytes,
        )
    }
}

/// Fixed-capacity pool allocator with reference-counted blocks.
///
/// Blocks are carved out of one contiguous buffer with a first-fit search
/// over a per-byte occupancy map. Callers receive opaque [`BlockHandle`]s and
/// reach the bytes through [`write`](Self::write) and [`read`](Self::read).
///
/// Every operation takes a single internal lock, so the allocator can be
/// shared between threads behind an `Arc`. Reference counting is manual:
/// each [`retain`](Self::retain) must be balanced by one
/// [`deallocate`](Self::deallocate).
///
/// # Examples
/// ```
/// use poolalloc::PoolAllocator;
///
/// let pool = PoolAllocator::new().unwrap();
/// let block = pool.allocate(10).unwrap();
/// pool.write(block, 0, b"hello").unwrap();
///
/// pool.retain(block).unwrap();
/// assert_eq!(pool.get_reference_count(block), 2);
///
/// pool.deallocate(block).unwrap();
/// pool.deallocate(block).unwrap();
/// assert_eq!(pool.get_reference_count(block), 0);
/// ```
pub struct PoolAllocator {
    state: Mutex<PoolState>,
    capacity: usize,
    base_alignment: usize,
    /// Set once the leak report has been handed out by `shutdown`
    leaks_reported: bool,
}

impl PoolAllocator {
    /// Create a pool of [`DEFAULT_POOL_SIZE`] bytes.
    pub fn new() -> Result<Self, PoolError> {
        Self::from_config(&PoolConfig::default())
    }

    /// Create a pool of `capacity` bytes with the default base alignment.
    pub fn with_capacity(capacity: usize) -> Result<Self, PoolError> {
        Self::from_config(&PoolConfig {
            capacity,
            ..PoolConfig::default()
        })
    }

    /// Create a pool from `config`.
    ///
    /// # Returns
    /// * `Ok(PoolAllocator)` - Successfully created pool
    /// * `Err(PoolError)` - Invalid configuration or backing allocation failure
    pub fn from_config(config: &PoolConfig) -> Result<Self, PoolError> {
        config.validate()?;
        let buffer = PoolBuffer::new(config.capacity, config.base_alignment)?;

        debug!(
            capacity = config.capacity,
            base_alignment = config.base_alignment,
            "pool created"
        );

        Ok(Self {
            state: Mutex::new(PoolState::new(buffer, config.enable_stats)),
            capacity: config.capacity,
            base_alignment: config.base_alignment,
            leaks_reported: false,
        })
    }

    fn lock_state(&self) -> Result<MutexGuard<'_, PoolState>, PoolError> {
        self.state.lock().map_err(|_| PoolError::LockPoisoned)
    }

    /// Allocate `size` bytes at the lowest free offset that fits.
    ///
    /// The block starts zeroed with a reference count of 1.
    pub fn allocate(&self, size: usize) -> Result<BlockHandle, PoolError> {
        let handle = self.lock_state()?.allocate(size, None)?;
        debug!(%handle, size, "block allocated");
        Ok(handle)
    }

    /// Allocate `size` bytes whose absolute address is a multiple of
    /// `alignment`, which must be a non-zero power of two.
    pub fn allocate_aligned(&self, size: usize, alignment: usize) -> Result<BlockHandle, PoolError> {
        let handle = self.lock_state()?.allocate(size, Some(alignment))?;
        debug!(%handle, size, alignment, "aligned block allocated");
        Ok(handle)
    }

    /// Add a reference to a live block and return the new count.
    pub fn retain(&self, handle: BlockHandle) -> Result<u32, PoolError> {
        let count = self.lock_state()?.retain(handle)?;
        debug!(%handle, ref_count = count, "block retained");
        Ok(count)
    }

    /// Drop one reference and return the remaining count.
    ///
    /// The block is released when the count reaches zero. Unknown, stale or
    /// already released handles are rejected without touching any state.
    pub fn deallocate(&self, handle: BlockHandle) -> Result<u32, PoolError> {
        match self.lock_state()?.deallocate(handle) {
            Ok(0) => {
                debug!(%handle, "block released");
                Ok(0)
            }
            Ok(remaining) => {
                debug!(%handle, ref_count = remaining, "block reference dropped");
                Ok(remaining)
            }
            Err(e) => {
                warn!(%handle, "attempt to free unallocated memory");
                Err(e)
            }
        }
    }

    /// Current reference count, or 0 if the handle is not live.
    pub fn get_reference_count(&self, handle: BlockHandle) -> u32 {
        self.lock_state()
            .map(|state| state.lookup(handle).map_or(0, |record| record.ref_count))
            .unwrap_or(0)
    }

    /// True while the handle names a block with at least one reference.
    pub fn is_live(&self, handle: BlockHandle) -> bool {
        self.get_reference_count(handle) > 0
    }

    /// Copy `bytes` into the block starting `offset` bytes past its start.
    pub fn write(&self, handle: BlockHandle, offset: usize, bytes: &[u8]) -> Result<(), PoolError> {
        self.lock_state()?.write(handle, offset, bytes)
    }

    /// Copy of the block's bytes.
    pub fn read(&self, handle: BlockHandle) -> Result<Vec<u8>, PoolError> {
        self.lock_state()?.read(handle)
    }

    /// Size in bytes of a live block, or `None` for non-live handles.
    pub fn block_size(&self, handle: BlockHandle) -> Option<usize> {
        self.lock_state()
            .ok()
            .and_then(|state| state.lookup(handle).map(|record| record.size))
    }

    /// Absolute address of the block start, for diagnostics only.
    pub fn address_of(&self, handle: BlockHandle) -> Option<usize> {
        self.lock_state().ok().and_then(|state| {
            state
                .lookup(handle)
                .map(|_| state.buffer.base_address() + handle.offset())
        })
    }

    /// Compact all live blocks toward offset 0.
    ///
    /// Contents, order, sizes and reference counts are preserved. Blocks that
    /// move get new handles; translate old ones with
    /// [`DefragmentReport::resolve`].
    pub fn defragment(&self) -> Result<DefragmentReport, PoolError> {
        let report = self.lock_state()?.defragment();
        info!(
            moved_blocks = report.moved_count(),
            bytes_moved = report.bytes_moved,
            "memory defragmented"
        );
        Ok(report)
    }

    /// Occupancy bitmap as `0`/`1` characters plus the live block count.
    pub fn display_memory_state(&self) -> String {
        match self.lock_state() {
            Ok(state) => format!(
                "Memory state: {}\nCurrent allocations: {}",
                state.occupancy.render(),
                state.blocks.len()
            ),
            Err(e) => format!("Memory state unavailable: {}", e),
        }
    }

    /// Blocks currently live, as they would be reported at teardown.
    pub fn leak_report(&self) -> LeakReport {
        self.lock_state()
            .map(|state| state.leak_report())
            .unwrap_or_default()
    }

    /// Tear the pool down and return the blocks that were never released.
    pub fn shutdown(mut self) -> LeakReport {
        let report = match self.state.get_mut() {
            Ok(state) => state.leak_report(),
            Err(poisoned) => poisoned.into_inner().leak_report(),
        };
        report.log();
        self.leaks_reported = true;
        report
    }

    /// Total size of the pool in bytes.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Alignment of the backing buffer's base address.
    pub fn base_alignment(&self) -> usize {
        self.base_alignment
    }

    /// Number of blocks currently allocated.
    pub fn live_blocks(&self) -> usize {
        self.lock_state().map(|state| state.blocks.len()).unwrap_or(0)
    }

    /// Number of bytes belonging to live blocks.
    pub fn used_bytes(&self) -> usize {
        self.lock_state()
            .map(|state| state.occupancy.occupied())
            .unwrap_or(0)
    }

    /// Number of bytes not belonging to any live block.
    pub fn free_bytes(&self) -> usize {
        self.capacity - self.used_bytes()
    }

    /// Length of the longest contiguous run of free bytes, i.e. the largest
    /// plain allocation that would currently succeed.
    pub fn largest_free_run(&self) -> usize {
        self.lock_state()
            .map(|state| state.occupancy.largest_free_run())
            .unwrap_or(0)
    }

    /// Snapshot of the pool's counters.
    pub fn stats(&self) -> PoolStats {
        self.lock_state()
            .map(|state| state.stats.clone())
            .unwrap_or_default()
    }

    /// Current occupancy and fragmentation of the pool.
    pub fn utilization(&self) -> Result<MemoryUtilization, PoolError> {
        Ok(self.lock_state()?.utilization())
    }
}

impl fmt::Debug for PoolAllocator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PoolAllocator")
            .field("capacity", &self.capacity)
            .field("base_alignment", &self.base_alignment)
            .field("live_blocks", &self.live_blocks())
            .field("used_bytes", &self.used_bytes())
            .finish()
    }
}

impl Drop for PoolAllocator {
    fn drop(&mut self) {
        if self.leaks_reported {
            return;
        }
        let report = match self.state.get_mut() {
            Ok(state) => state.leak_report(),
            Err(poisoned) => poisoned.into_inner().leak_report(),
        };
        report.log();
    }
}
