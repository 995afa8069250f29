//! Anonymous memory mappings backing the stress targets.
//!
//! The cache line lives in a `MAP_SHARED` region, the misaligned target is
//! one private page, and the checkpoint page must stay shared across
//! `fork`.  Mappings are page-aligned, zero-filled and unmapped on drop.

use std::ptr::NonNull;

use crate::error::StressError;
use crate::platform::page_size;

/// Owned anonymous mapping.
#[derive(Debug)]
pub struct MappedRegion {
    base: NonNull<u8>,
    len: usize,
}

// SAFETY: the mapping is plain memory owned by this value; concurrent
// access goes through raw pointers whose users uphold their own rules.
unsafe impl Send for MappedRegion {}
unsafe impl Sync for MappedRegion {}

impl MappedRegion {
    /// Shared anonymous mapping of at least `len` bytes.
    pub fn shared(len: usize, what: &'static str) -> Result<Self, StressError> {
        Self::map(len, libc::MAP_SHARED, what)
    }

    /// Private anonymous mapping of at least `len` bytes.
    pub fn private(len: usize, what: &'static str) -> Result<Self, StressError> {
        Self::map(len, libc::MAP_PRIVATE, what)
    }

    fn map(len: usize, kind: libc::c_int, what: &'static str) -> Result<Self, StressError> {
        let page = page_size();
        let len = len.max(1).div_ceil(page) * page;

        // SAFETY: anonymous mapping with no address hint; the result is
        // checked against MAP_FAILED before use.
        let addr = unsafe {
            libc::mmap(
                std::ptr::null_mut(),
                len,
                libc::PROT_READ | libc::PROT_WRITE,
                kind | libc::MAP_ANONYMOUS,
                -1,
                0,
            )
        };
        if addr == libc::MAP_FAILED {
            return Err(StressError::last_os_error(what));
        }
        let base = NonNull::new(addr.cast::<u8>()).ok_or_else(|| StressError::last_os_error(what))?;
        Ok(Self { base, len })
    }

    /// First byte of the mapping (page-aligned).
    pub fn as_ptr(&self) -> *mut u8 {
        self.base.as_ptr()
    }

    /// Mapped length in bytes (a whole number of pages).
    pub fn len(&self) -> usize {
        self.len
    }

    /// Always false: mappings are at least one page.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

impl Drop for MappedRegion {
    fn drop(&mut self) {
        // SAFETY: base/len are exactly what mmap returned.
        unsafe {
            libc::munmap(self.base.as_ptr().cast(), self.len);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mapping_is_page_rounded_and_zeroed() {
        let region = match MappedRegion::private(10, "test page") {
            Ok(r) => r,
            Err(e) => {
                eprintln!("mmap unavailable: {e}");
                return;
            }
        };
        assert_eq!(region.len() % page_size(), 0);
        assert!(region.len() >= 10);
        assert_eq!(region.as_ptr() as usize % page_size(), 0);
        // SAFETY: in bounds of a live mapping.
        let bytes = unsafe { std::slice::from_raw_parts(region.as_ptr(), region.len()) };
        assert!(bytes.iter().all(|&b| b == 0));
    }

    #[test]
    fn shared_mapping_is_visible_across_fork() {
        let region = match MappedRegion::shared(1, "test shared page") {
            Ok(r) => r,
            Err(e) => {
                eprintln!("mmap unavailable: {e}");
                return;
            }
        };
        let p = region.as_ptr();
        // SAFETY: the child only performs a volatile store and _exit.
        unsafe {
            let pid = libc::fork();
            if pid < 0 {
                eprintln!("fork unavailable");
                return;
            }
            if pid == 0 {
                std::ptr::write_volatile(p, 0x5a);
                libc::_exit(0);
            }
            let mut status = 0;
            libc::waitpid(pid, &mut status, 0);
            assert_eq!(std::ptr::read_volatile(p), 0x5a);
        }
    }
}
