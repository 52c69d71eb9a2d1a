//! Backing-memory providers.
//!
//! This module provides the [`MemoryProvider`] trait that defines the
//! interface for the pool's backing memory, and [`MmapProvider`] which uses
//! anonymous private mappings via `mmap(2)`/`munmap(2)`.

use std::io::{Error, Result};
use std::ptr::NonNull;

/// Trait for backing-memory providers.
///
/// A provider supplies one contiguous, zero-filled, page-aligned region of an
/// exact requested size and reclaims it by the same size on teardown. The
/// pool treats a provider failure as an unrecoverable process-level fault: it
/// signals system resource exhaustion, not a condition the allocator can
/// handle.
///
/// # Safety
///
/// Implementations must ensure:
/// - `map` returns a valid, page-aligned, zero-filled region of `len` bytes
/// - the region remains valid until `unmap` is called with the same pointer
///   and length
pub trait MemoryProvider {
    /// Maps `len` bytes of zero-filled, page-aligned memory.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying mapping fails, typically due to
    /// address-space or memory exhaustion.
    fn map(&self, len: usize) -> Result<NonNull<u8>>;

    /// Returns a region previously obtained from [`map`](Self::map).
    ///
    /// # Safety
    ///
    /// The caller must ensure:
    /// - `ptr` and `len` describe a region returned by a previous `map` call
    ///   on this provider
    /// - the region has not already been unmapped
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying unmapping fails.
    unsafe fn unmap(&self, ptr: NonNull<u8>, len: usize) -> Result<()>;
}

/// Default provider backed by anonymous private `mmap(2)` mappings.
///
/// Anonymous mappings are zero-filled and page-aligned by the kernel, which
/// is exactly the contract [`MemoryProvider`] requires.
#[derive(Debug, Default, Clone, Copy)]
pub struct MmapProvider;

impl MmapProvider {
    /// Creates a new mmap-backed provider.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl MemoryProvider for MmapProvider {
    fn map(&self, len: usize) -> Result<NonNull<u8>> {
        // SAFETY: anonymous mapping with no file descriptor; the kernel
        // picks the address.
        let addr = unsafe {
            libc::mmap(
                std::ptr::null_mut(),
                len,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_PRIVATE | libc::MAP_ANONYMOUS,
                -1,
                0,
            )
        };
        if addr == libc::MAP_FAILED {
            return Err(Error::last_os_error());
        }
        NonNull::new(addr.cast::<u8>()).ok_or_else(|| Error::other("mmap returned a null mapping"))
    }

    unsafe fn unmap(&self, ptr: NonNull<u8>, len: usize) -> Result<()> {
        // SAFETY: caller guarantees ptr/len describe a live mapping from map.
        let rc = unsafe { libc::munmap(ptr.as_ptr().cast::<libc::c_void>(), len) };
        if rc == -1 {
            Err(Error::last_os_error())
        } else {
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_map_is_zero_filled() {
        let provider = MmapProvider::new();
        let len = 1 << 20;
        let ptr = provider.map(len).unwrap();

        unsafe {
            let slice = std::slice::from_raw_parts(ptr.as_ptr(), len);
            assert!(slice.iter().all(|&b| b == 0));
            provider.unmap(ptr, len).unwrap();
        }
    }

    #[test]
    fn test_map_is_writable() {
        let provider = MmapProvider::new();
        let len = 1 << 20;
        let ptr = provider.map(len).unwrap();

        unsafe {
            ptr.as_ptr().write(0xAB);
            ptr.as_ptr().add(len - 1).write(0xCD);
            assert_eq!(*ptr.as_ptr(), 0xAB);
            assert_eq!(*ptr.as_ptr().add(len - 1), 0xCD);
            provider.unmap(ptr, len).unwrap();
        }
    }

    #[test]
    fn test_map_is_page_aligned() {
        let provider = MmapProvider::new();
        let len = 1 << 20;
        let ptr = provider.map(len).unwrap();

        assert_eq!(ptr.as_ptr() as usize % 4096, 0);
        unsafe {
            provider.unmap(ptr, len).unwrap();
        }
    }
}
