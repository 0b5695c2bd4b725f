//! Do-not-dump allocation for sensitive frame bodies.
//!
//! Large partially-received frames can be routed into anonymous mappings
//! marked `MADV_DONTDUMP`, excluding cached user data from core dumps.
//! Each thread owns an allocator handle, lazily initialized on first use
//! and torn down at thread exit.

use std::cell::Cell;
use std::ptr::NonNull;

use crate::error::Error;
use crate::metrics;

thread_local! {
    static ALLOCATOR: NodumpAllocator = NodumpAllocator::new();
}

/// Map a do-not-dump region of at least `size` bytes on this thread's
/// allocator.
///
/// Failure is never fatal: the caller is expected to keep the frame on the
/// normal heap path. Failures are counted and logged.
pub fn allocate(size: usize) -> Result<NodumpRegion, Error> {
    let result = ALLOCATOR.with(|a| a.allocate(size));
    match result {
        Ok(region) => {
            metrics::NODUMP_ALLOCATIONS.increment();
            Ok(region)
        }
        Err(e) => {
            metrics::NODUMP_FAILURES.increment();
            tracing::warn!("{e}, keeping frame in a dumpable buffer");
            Err(e)
        }
    }
}

/// Per-thread do-not-dump allocator state.
struct NodumpAllocator {
    page_size: usize,
    regions_mapped: Cell<u64>,
}

impl NodumpAllocator {
    fn new() -> Self {
        let page_size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
        let page_size = if page_size > 0 { page_size as usize } else { 4096 };
        Self {
            page_size,
            regions_mapped: Cell::new(0),
        }
    }

    fn allocate(&self, size: usize) -> Result<NodumpRegion, Error> {
        let capacity = round_up(size.max(1), self.page_size);

        let ptr = unsafe {
            libc::mmap(
                std::ptr::null_mut(),
                capacity,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_PRIVATE | libc::MAP_ANONYMOUS,
                -1,
                0,
            )
        };
        if ptr == libc::MAP_FAILED {
            return Err(Error::NodumpAllocation(size));
        }

        // A region madvise cannot exclude from dumps is not a secure region.
        if unsafe { libc::madvise(ptr, capacity, libc::MADV_DONTDUMP) } != 0 {
            unsafe {
                libc::munmap(ptr, capacity);
            }
            return Err(Error::NodumpAllocation(size));
        }

        self.regions_mapped.set(self.regions_mapped.get() + 1);
        Ok(NodumpRegion {
            ptr: NonNull::new(ptr as *mut u8).expect("mmap returned null"),
            capacity,
        })
    }
}

impl Drop for NodumpAllocator {
    fn drop(&mut self) {
        tracing::debug!(
            regions = self.regions_mapped.get(),
            "tearing down thread-local do-not-dump allocator"
        );
    }
}

/// An owned, page-aligned anonymous mapping excluded from core dumps.
///
/// Unmapped on drop. The mapping is zero-filled by the kernel.
pub struct NodumpRegion {
    ptr: NonNull<u8>,
    capacity: usize,
}

// Safety: the region is exclusively owned; the raw pointer is only a
// consequence of mmap's API.
unsafe impl Send for NodumpRegion {}
unsafe impl Sync for NodumpRegion {}

impl NodumpRegion {
    /// Usable capacity (the requested size rounded up to whole pages).
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn as_slice(&self) -> &[u8] {
        unsafe { std::slice::from_raw_parts(self.ptr.as_ptr(), self.capacity) }
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        unsafe { std::slice::from_raw_parts_mut(self.ptr.as_ptr(), self.capacity) }
    }
}

impl Drop for NodumpRegion {
    fn drop(&mut self) {
        unsafe {
            libc::munmap(self.ptr.as_ptr() as *mut libc::c_void, self.capacity);
        }
    }
}

impl std::fmt::Debug for NodumpRegion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodumpRegion")
            .field("capacity", &self.capacity)
            .finish()
    }
}

fn round_up(n: usize, align: usize) -> usize {
    n.div_ceil(align) * align
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allocates_and_zero_fills() {
        let region = allocate(1000).unwrap();
        assert!(region.capacity() >= 1000);
        assert_eq!(region.capacity() % 4096, 0);
        assert!(region.as_slice().iter().all(|&b| b == 0));
    }

    #[test]
    fn region_is_writable() {
        let mut region = allocate(64).unwrap();
        region.as_mut_slice()[..4].copy_from_slice(b"abcd");
        assert_eq!(&region.as_slice()[..4], b"abcd");
    }

    #[test]
    fn region_moves_across_threads() {
        let mut region = allocate(128).unwrap();
        region.as_mut_slice()[0] = 7;
        let handle = std::thread::spawn(move || region.as_slice()[0]);
        assert_eq!(handle.join().unwrap(), 7);
    }

    #[test]
    fn round_up_to_pages() {
        assert_eq!(round_up(1, 4096), 4096);
        assert_eq!(round_up(4096, 4096), 4096);
        assert_eq!(round_up(4097, 4096), 8192);
    }
}
