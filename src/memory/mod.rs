//! Fixed-capacity pool allocation with reference counting and compaction.
//!
//! The pool hands out opaque handles into one contiguous buffer, tracks
//! per-byte occupancy, and can slide live blocks together on demand.

mod buffer;
pub mod handle;
mod occupancy;
pub mod pool;
pub mod stats;

pub use handle::{BlockHandle, DefragmentReport, Relocation};
pub use pool::{LeakReport, LeakedBlock, PoolAllocator, PoolError};
pub use stats::{MemoryUtilization, PoolStats};
