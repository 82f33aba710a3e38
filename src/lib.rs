//! # poolalloc - Fixed-Capacity Pool Allocator
//!
//! A small, embeddable allocator that carves blocks out of one fixed-size
//! buffer. Blocks are reference counted and the pool can be compacted to
//! merge scattered free space.
//!
//! ## Core Features
//!
//! - **First-fit allocation**: lowest free offset wins, with optional alignment
//! - **Reference counting**: blocks are released when the last holder lets go
//! - **Compaction**: live blocks slide toward offset 0, with an explicit remap
//! - **Leak reporting**: blocks still live at teardown are reported
//!
//! ## Quick Start
//!
//! ```rust
//! use poolalloc::PoolAllocator;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let pool = PoolAllocator::new()?;
//!
//! let first = pool.allocate(10)?;
//! let second = pool.allocate(20)?;
//! pool.write(second, 0, b"payload")?;
//!
//! // Free the first block and close the gap it left behind.
//! pool.deallocate(first)?;
//! let report = pool.defragment()?;
//!
//! // Handles of moved blocks must be translated.
//! let second = report.resolve(second).expect("block was live");
//! assert_eq!(second.offset(), 0);
//! assert_eq!(&pool.read(second)?[..7], b"payload");
//!
//! pool.deallocate(second)?;
//! assert!(pool.shutdown().is_empty());
//! # Ok(())
//! # }
//! ```

pub mod memory;

pub use memory::handle::{BlockHandle, DefragmentReport, Relocation};
pub use memory::pool::{
    LeakReport, LeakedBlock, PoolAllocator, PoolError, DEFAULT_BASE_ALIGNMENT, DEFAULT_POOL_SIZE,
};
pub use memory::stats::{MemoryUtilization, PoolStats};

/// Version information for the crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Construction parameters for a [`PoolAllocator`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolConfig {
    /// Pool capacity in bytes, fixed for the pool's lifetime
    pub capacity: usize,
    /// Alignment of the backing buffer's base address
    pub base_alignment: usize,
    /// Enable statistics collection
    pub enable_stats: bool,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_POOL_SIZE,
            base_alignment: DEFAULT_BASE_ALIGNMENT,
            enable_stats: true,
        }
    }
}

impl PoolConfig {
    /// Small pool for constrained targets.
    pub fn embedded() -> Self {
        Self {
            capacity: 256,
            base_alignment: 8,
            enable_stats: false,
        }
    }

    /// Pool sized to stay resident in a typical L2 cache.
    pub fn cache_resident() -> Self {
        Self {
            capacity: 64 * 1024,
            base_alignment: 64,
            enable_stats: true,
        }
    }

    pub fn validate(&self) -> Result<(), PoolError> {
        if self.capacity == 0 {
            return Err(PoolError::InvalidSize {
                size: 0,
                capacity: self.capacity,
            });
        }
        if !self.base_alignment.is_power_of_two() {
            return Err(PoolError::InvalidAlignment {
                alignment: self.base_alignment,
            });
        }
        Ok(())
    }

    /// Create a pool using this configuration
    pub fn create_pool(&self) -> Result<PoolAllocator, PoolError> {
        PoolAllocator::from_config(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults() {
        let config = PoolConfig::default();
        assert_eq!(config.capacity, 1024);
        assert_eq!(config.base_alignment, 64);
        assert!(config.enable_stats);
    }

    #[test]
    fn test_config_pool_creation() {
        let pool = PoolConfig::embedded().create_pool().unwrap();
        assert_eq!(pool.capacity(), 256);
        assert_eq!(pool.base_alignment(), 8);

        let pool = PoolConfig::cache_resident().create_pool().unwrap();
        assert_eq!(pool.capacity(), 65536);
    }

    #[test]
    fn test_config_validation() {
        let zero = PoolConfig {
            capacity: 0,
            ..PoolConfig::default()
        };
        assert!(matches!(zero.validate(), Err(PoolError::InvalidSize { .. })));

        let misaligned = PoolConfig {
            base_alignment: 48,
            ..PoolConfig::default()
        };
        assert_eq!(
            misaligned.create_pool().unwrap_err(),
            PoolError::InvalidAlignment { alignment: 48 }
        );
    }

    #[test]
    fn test_version_constant() {
        assert!(!VERSION.is_empty());
    }
}
