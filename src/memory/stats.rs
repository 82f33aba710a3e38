// File: src/memory/stats.rs
use std::time::Instant;

/// Counters describing how a pool has been used.
///
/// Tracks allocation patterns, reference-count traffic and compaction work
/// to help size pools and spot leaks or misuse.
#[derive(Debug, Clone)]
pub struct PoolStats {
    /// Successful allocation requests (plain and aligned)
    pub total_allocations: u64,
    /// Successful aligned allocation requests
    pub aligned_allocations: u64,
    /// Total bytes handed out across all requests
    pub total_bytes_allocated: u64,
    /// Allocation requests that found no suitable free run
    pub failed_allocations: u64,
    /// Deallocate calls that decremented a live block
    pub total_deallocations: u64,
    /// Blocks whose count reached zero and were released
    pub blocks_released: u64,
    /// Successful retain calls
    pub total_retains: u64,
    /// Deallocate calls on unknown or stale handles
    pub invalid_frees: u64,
    /// Completed defragment passes
    pub defragment_count: u64,
    /// Bytes copied by defragment passes
    pub bytes_moved: u64,
    /// Creation time of the pool
    pub creation_time: Instant,
    /// Largest single allocation size
    pub largest_allocation: usize,
    /// Smallest single allocation size
    pub smallest_allocation: usize,
    /// Alignment requests by power of two: 1, 2, 4, 8, 16, 32, 64, 128+
    pub alignment_histogram: [u64; 8],
    /// Highest number of simultaneously occupied bytes
    pub peak_usage_bytes: usize,
}

impl PoolStats {
    pub fn new() -> Self {
        Self {
            total_allocations: 0,
            aligned_allocations: 0,
            total_bytes_allocated: 0,
            failed_allocations: 0,
            total_deallocations: 0,
            blocks_released: 0,
            total_retains: 0,
            invalid_frees: 0,
            defragment_count: 0,
            bytes_moved: 0,
            creation_time: Instant::now(),
            largest_allocation: 0,
            smallest_allocation: usize::MAX,
            alignment_histogram: [0; 8],
            peak_usage_bytes: 0,
        }
    }

    /// Record a successful allocation. Plain allocations pass `None`.
    pub fn record_allocation(&mut self, size: usize, alignment: Option<usize>, used_bytes: usize) {
        self.total_allocations += 1;
        self.total_bytes_allocated += size as u64;

        self.largest_allocation = self.largest_allocation.max(size);
        self.smallest_allocation = self.smallest_allocation.min(size);

        if alignment.is_some() {
            self.aligned_allocations += 1;
        }
        let alignment_index = alignment_to_index(alignment.unwrap_or(1));
        self.alignment_histogram[alignment_index] += 1;

        self.peak_usage_bytes = self.peak_usage_bytes.max(used_bytes);
    }

    pub fn record_failed_allocation(&mut self) {
        self.failed_allocations += 1;
    }

    /// Record a deallocate call on a live block.
    pub fn record_deallocation(&mut self, released: bool) {
        self.total_deallocations += 1;
        if released {
            self.blocks_released += 1;
        }
    }

    pub fn record_retain(&mut self) {
        self.total_retains += 1;
    }

    pub fn record_invalid_free(&mut self) {
        self.invalid_frees += 1;
    }

    pub fn record_defragment(&mut self, bytes_moved: usize) {
        self.defragment_count += 1;
        self.bytes_moved += bytes_moved as u64;
    }

    /// Average size of successful allocations in bytes.
    pub fn average_allocation_size(&self) -> f64 {
        if self.total_allocations == 0 {
            0.0
        } else {
            self.total_bytes_allocated as f64 / self.total_allocations as f64
        }
    }

    /// Allocations per second since the pool was created.
    pub fn allocation_rate(&self) -> f64 {
        let elapsed = self.creation_time.elapsed().as_secs_f64();
        if elapsed > 0.0 {
            self.total_allocations as f64 / elapsed
        } else {
            0.0
        }
    }

    /// Most frequently requested alignment.
    pub fn most_common_alignment(&self) -> usize {
        let (max_index, _) = self
            .alignment_histogram
            .iter()
            .enumerate()
            .max_by_key(|(index, &count)| (count, std::cmp::Reverse(*index)))
            .unwrap_or((0, &0));

        index_to_alignment(max_index)
    }

    /// Reset all counters.
    pub fn reset_stats(&mut self) {
        *self = Self::new();
    }
}

impl Default for PoolStats {
    fn default() -> Self {
        Self::new()
    }
}

fn alignment_to_index(alignment: usize) -> usize {
    match alignment {
        0 | 1 => 0,
        2 => 1,
        4 => 2,
        8 => 3,
        16 => 4,
        32 => 5,
        64 => 6,
        _ => 7,
    }
}

fn index_to_alignment(index: usize) -> usize {
    match index {
        0 => 1,
        1 => 2,
        2 => 4,
        3 => 8,
        4 => 16,
        5 => 32,
        6 => 64,
        _ => 128,
    }
}

/// Point-in-time occupancy of a pool.
#[derive(Debug, Clone, PartialEq)]
pub struct MemoryUtilization {
    pub capacity: usize,
    pub used_bytes: usize,
    pub free_bytes: usize,
    pub largest_free_run: usize,
    pub live_blocks: usize,
    pub peak_usage_bytes: usize,
    /// `1 - largest_free_run / free_bytes`; 0.0 when free space is one run
    pub fragmentation_ratio: f32,
}

impl MemoryUtilization {
    pub(crate) fn new(
        capacity: usize,
        used_bytes: usize,
        largest_free_run: usize,
        live_blocks: usize,
        peak_usage_bytes: usize,
    ) -> Self {
        let free_bytes = capacity - used_bytes;
        let fragmentation_ratio = if free_bytes == 0 {
            0.0
        } else {
            1.0 - largest_free_run as f32 / free_bytes as f32
        };
        Self {
            capacity,
            used_bytes,
            free_bytes,
            largest_free_run,
            live_blocks,
            peak_usage_bytes,
            fragmentation_ratio,
        }
    }

    /// Format utilization information as a human-readable string.
    pub fn format_summary(&self) -> String {
        format!(
            "Memory Utilization:\n\
             - Used: {} / {} bytes in {} blocks\n\
             - Free: {} bytes (largest run {} bytes)\n\
             - Peak usage: {} bytes\n\
             - Fragmentation: {:.1}%",
            self.used_bytes,
            self.capacity,
            self.live_blocks,
            self.free_bytes,
            self.largest_free_run,
            self.peak_usage_bytes,
            self.fragmentation_ratio * 100.0
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stats_creation() {
        let stats = PoolStats::new();
        assert_eq!(stats.total_allocations, 0);
        assert_eq!(stats.total_bytes_allocated, 0);
        assert_eq!(stats.defragment_count, 0);
        assert_eq!(stats.average_allocation_size(), 0.0);
    }

    #[test]
    fn test_allocation_recording() {
        let mut stats = PoolStats::new();

        stats.record_allocation(64, None, 64);
        assert_eq!(stats.total_allocations, 1);
        assert_eq!(stats.total_bytes_allocated, 64);
        assert_eq!(stats.largest_allocation, 64);
        assert_eq!(stats.smallest_allocation, 64);
        assert_eq!(stats.average_allocation_size(), 64.0);

        stats.record_allocation(32, Some(16), 96);
        assert_eq!(stats.total_allocations, 2);
        assert_eq!(stats.aligned_allocations, 1);
        assert_eq!(stats.total_bytes_allocated, 96);
        assert_eq!(stats.average_allocation_size(), 48.0);
        assert_eq!(stats.peak_usage_bytes, 96);
    }

    #[test]
    fn test_alignment_histogram() {
        let mut stats = PoolStats::new();

        stats.record_allocation(64, Some(8), 64);
        stats.record_allocation(32, Some(8), 96);
        stats.record_allocation(16, Some(16), 112);
        stats.record_allocation(16, None, 128);

        assert_eq!(stats.alignment_histogram[0], 1);
        assert_eq!(stats.alignment_histogram[3], 2);
        assert_eq!(stats.alignment_histogram[4], 1);
        assert_eq!(stats.most_common_alignment(), 8);
    }

    #[test]
    fn test_lifecycle_counters() {
        let mut stats = PoolStats::new();
        stats.record_retain();
        stats.record_deallocation(false);
        stats.record_deallocation(true);
        stats.record_invalid_free();
        stats.record_failed_allocation();
        stats.record_defragment(40);

        assert_eq!(stats.total_retains, 1);
        assert_eq!(stats.total_deallocations, 2);
        assert_eq!(stats.blocks_released, 1);
        assert_eq!(stats.invalid_frees, 1);
        assert_eq!(stats.failed_allocations, 1);
        assert_eq!(stats.bytes_moved, 40);

        stats.reset_stats();
        assert_eq!(stats.total_retains, 0);
    }

    #[test]
    fn test_memory_utilization() {
        let utilization = MemoryUtilization::new(1024, 24, 900, 2, 30);
        assert_eq!(utilization.free_bytes, 1000);
        assert!((utilization.fragmentation_ratio - 0.1).abs() < 1e-6);

        let compact = MemoryUtilization::new(1024, 24, 1000, 2, 30);
        assert_eq!(compact.fragmentation_ratio, 0.0);
        assert!(compact.format_summary().contains("24 / 1024 bytes in 2 blocks"));
    }
}
