//! Per-byte occupancy tracking and first-fit free-space search.

use std::ops::Range;

/// One flag per pool byte, `true` while the byte belongs to a live block.
#[derive(Debug, Clone)]
pub(crate) struct OccupancyMap {
    bits: Vec<bool>,
    occupied: usize,
}

impl OccupancyMap {
    pub(crate) fn new(len: usize) -> Self {
        Self {
            bits: vec![false; len],
            occupied: 0,
        }
    }

    /// Number of occupied bytes.
    pub(crate) fn occupied(&self) -> usize {
        self.occupied
    }

    /// Find the lowest offset starting a free run of `size` bytes.
    ///
    /// With `alignment`, the absolute address `base_address + offset` must be a
    /// multiple of it. `alignment` must be a power of two.
    pub(crate) fn find_free_run(
        &self,
        size: usize,
        alignment: Option<usize>,
        base_address: usize,
    ) -> Option<usize> {
        if size == 0 || size > self.bits.len() {
            return None;
        }

        let mut start = 0;
        while start + size <= self.bits.len() {
            if let Some(align) = alignment {
                let misalignment = (base_address + start) & (align - 1);
                if misalignment != 0 {
                    start += align - misalignment;
                    continue;
                }
            }

            // Every candidate up to the last occupied byte of this window
            // would contain that byte, so resume right after it.
            match self.bits[start..start + size].iter().rposition(|&bit| bit) {
                None => return Some(start),
                Some(last_used) => start += last_used + 1,
            }
        }
        None
    }

    pub(crate) fn mark(&mut self, span: Range<usize>) {
        for bit in &mut self.bits[span] {
            debug_assert!(!*bit, "marking an occupied byte");
            if !*bit {
                *bit = true;
                self.occupied += 1;
            }
        }
    }

    pub(crate) fn clear(&mut self, span: Range<usize>) {
        for bit in &mut self.bits[span] {
            if *bit {
                *bit = false;
                self.occupied -= 1;
            }
        }
    }

    /// Length of the longest run of free bytes.
    pub(crate) fn largest_free_run(&self) -> usize {
        let mut best = 0;
        let mut current = 0;
        for &bit in &self.bits {
            if bit {
                current = 0;
            } else {
                current += 1;
                best = best.max(current);
            }
        }
        best
    }

    /// True when all occupied bytes form one run starting at offset 0.
    pub(crate) fn is_compact(&self) -> bool {
        self.bits[..self.occupied].iter().all(|&bit| bit)
    }

    /// Render the map as a string of `1` (occupied) and `0` (free).
    pub(crate) fn render(&self) -> String {
        self.bits.iter().map(|&bit| if bit { '1' } else { '0' }).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_fit_returns_lowest_offset() {
        let mut map = OccupancyMap::new(64);
        map.mark(0..8);
        map.mark(16..24);

        // Both [8, 16) and [24, 64) fit 8 bytes; the lower one wins.
        assert_eq!(map.find_free_run(8, None, 0), Some(8));
        // Only the tail run fits 9 bytes.
        assert_eq!(map.find_free_run(9, None, 0), Some(24));
    }

    #[test]
    fn test_exhaustion_and_bounds() {
        let mut map = OccupancyMap::new(32);
        assert_eq!(map.find_free_run(0, None, 0), None);
        assert_eq!(map.find_free_run(33, None, 0), None);
        assert_eq!(map.find_free_run(32, None, 0), Some(0));

        map.mark(0..30);
        assert_eq!(map.find_free_run(2, None, 0), Some(30));
        assert_eq!(map.find_free_run(3, None, 0), None);
    }

    #[test]
    fn test_aligned_search_uses_absolute_address() {
        let mut map = OccupancyMap::new(64);
        map.mark(0..3);

        assert_eq!(map.find_free_run(4, Some(8), 0), Some(8));
        // A base address of 4 shifts every aligned slot by 4.
        assert_eq!(map.find_free_run(4, Some(8), 4), Some(4));
        // A free run that fits but is never aligned is skipped.
        assert_eq!(map.find_free_run(4, Some(32), 0), Some(32));
    }

    #[test]
    fn test_occupied_count_and_render() {
        let mut map = OccupancyMap::new(8);
        map.mark(2..5);
        assert_eq!(map.occupied(), 3);
        assert_eq!(map.render(), "00111000");
        assert!(!map.is_compact());
        assert_eq!(map.largest_free_run(), 3);

        map.clear(2..5);
        map.mark(0..3);
        assert!(map.is_compact());
        assert_eq!(map.render(), "11100000");
    }
}
