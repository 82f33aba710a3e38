use std::alloc::{GlobalAlloc, Layout, System};
use std::ptr::NonNull;

use crate::memory::pool::PoolError;

/// Fixed-size backing storage for a pool.
///
/// The bytes are obtained from the system allocator once, with the requested
/// base alignment, and released on drop. The buffer is never resized.
pub(crate) struct PoolBuffer {
    /// Pointer to the allocated bytes
    ptr: NonNull<u8>,
    /// Capacity in bytes
    len: usize,
    /// Layout used for the allocation
    layout: Layout,
}

impl PoolBuffer {
    /// Allocate a zeroed buffer of `len` bytes aligned to `alignment`.
    pub(crate) fn new(len: usize, alignment: usize) -> Result<Self, PoolError> {
        if !alignment.is_power_of_two() {
            return Err(PoolError::InvalidAlignment { alignment });
        }
        if len == 0 {
            return Err(PoolError::AllocationFailed(
                "pool capacity must be non-zero".to_string(),
            ));
        }

        let layout = Layout::from_size_align(len, alignment)
            .map_err(|e| PoolError::AllocationFailed(format!("Invalid layout: {}", e)))?;

        let ptr = unsafe {
            let raw = System.alloc_zeroed(layout);
            NonNull::new(raw).ok_or_else(|| {
                PoolError::AllocationFailed(format!("Failed to allocate {} bytes", len))
            })?
        };

        Ok(Self { ptr, len, layout })
    }

    pub(crate) fn len(&self) -> usize {
        self.len
    }

    /// Absolute address of the first byte.
    pub(crate) fn base_address(&self) -> usize {
        self.ptr.as_ptr() as usize
    }

    pub(crate) fn as_slice(&self) -> &[u8] {
        // SAFETY: `ptr` points to `len` initialized bytes owned by `self`.
        unsafe { std::slice::from_raw_parts(self.ptr.as_ptr(), self.len) }
    }

    pub(crate) fn as_mut_slice(&mut self) -> &mut [u8] {
        // SAFETY: as above, and `&mut self` guarantees exclusive access.
        unsafe { std::slice::from_raw_parts_mut(self.ptr.as_ptr(), self.len) }
    }
}

impl Drop for PoolBuffer {
    fn drop(&mut self) {
        unsafe {
            System.dealloc(self.ptr.as_ptr(), self.layout);
        }
    }
}

// Safety: the buffer uniquely owns its allocation; access is mediated by the
// pool's lock.
unsafe impl Send for PoolBuffer {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_buffer_is_zeroed_and_aligned() {
        let buffer = PoolBuffer::new(1024, 64).unwrap();
        assert_eq!(buffer.len(), 1024);
        assert_eq!(buffer.base_address() % 64, 0);
        assert!(buffer.as_slice().iter().all(|&b| b == 0));
    }

    #[test]
    fn test_buffer_rejects_bad_parameters() {
        assert!(matches!(
            PoolBuffer::new(1024, 3),
            Err(PoolError::InvalidAlignment { alignment: 3 })
        ));
        assert!(matches!(
            PoolBuffer::new(0, 8),
            Err(PoolError::AllocationFailed(_))
        ));
    }

    #[test]
    fn test_buffer_writes_are_visible() {
        let mut buffer = PoolBuffer::new(16, 8).unwrap();
        buffer.as_mut_slice()[3] = 0xAB;
        assert_eq!(buffer.as_slice()[3], 0xAB);
    }
}
