// SPDX-License-Identifier: Apache-2.0

//! SharedMemoryRegion - POSIX shared memory wrapper.
//!
//! Safe abstraction over shm_open and mmap for the event queue's backing
//! store. The producer creates and owns the region; a consumer opens the
//! same name and maps its own view. All unsafe operations are encapsulated
//! with bounds checking.

use std::ffi::CString;
use std::ptr::NonNull;

use crate::error::QueueError;

/// Represents a mapped shared memory region.
///
/// This struct owns the mapping and will unmap it on drop. The creating side
/// additionally unlinks the shared memory object when dropped.
#[derive(Debug)]
pub struct SharedMemoryRegion {
    /// Name of the shared memory object.
    name: String,
    /// Pointer to the mapped memory.
    ptr: NonNull<u8>,
    /// Size of the mapped region in bytes.
    size: usize,
    /// File descriptor for the shared memory object.
    fd: i32,
    /// Whether this instance created the object (and should unlink on drop).
    is_owner: bool,
}

// SAFETY: SharedMemoryRegion can be sent between threads as it owns its mapping.
unsafe impl Send for SharedMemoryRegion {}

// SAFETY: Concurrent access to the mapped bytes is governed by the event
// queue's atomic head/tail protocol; the region itself hands out raw pointers
// only.
unsafe impl Sync for SharedMemoryRegion {}

impl SharedMemoryRegion {
    /// Minimum size for a shared memory region (one page).
    pub const MIN_SIZE: usize = 4096;

    /// Maximum size for a shared memory region (64 MB - queues are small).
    pub const MAX_SIZE: usize = 64 * 1024 * 1024;

    /// Create a new shared memory region, zero-initialized.
    ///
    /// # Errors
    /// Returns QueueError if creation or mapping fails, or if `size` is
    /// outside [MIN_SIZE, MAX_SIZE].
    pub fn create(name: &str, size: usize) -> Result<Self, QueueError> {
        if size < Self::MIN_SIZE || size > Self::MAX_SIZE {
            return Err(QueueError::CreateFailed {
                name: name.to_string(),
                reason: format!(
                    "Size {} outside bounds [{}, {}]",
                    size,
                    Self::MIN_SIZE,
                    Self::MAX_SIZE
                ),
            });
        }

        if name.is_empty() {
            return Err(QueueError::CreateFailed {
                name: name.to_string(),
                reason: "Name cannot be empty".to_string(),
            });
        }

        let shm_name = format!("/{}", name);
        let c_name = CString::new(shm_name.as_str()).map_err(|e| QueueError::CreateFailed {
            name: name.to_string(),
            reason: format!("Invalid name: {}", e),
        })?;

        // SAFETY: c_name is a valid CString, flags are valid POSIX flags
        let fd = unsafe {
            libc::shm_open(
                c_name.as_ptr(),
                libc::O_CREAT | libc::O_RDWR | libc::O_EXCL,
                0o600,
            )
        };

        if fd < 0 {
            let errno = std::io::Error::last_os_error();
            let reason = if errno.raw_os_error() == Some(libc::EEXIST) {
                "Shared memory already exists".to_string()
            } else {
                format!("shm_open failed: {}", errno)
            };
            return Err(QueueError::CreateFailed {
                name: name.to_string(),
                reason,
            });
        }

        // SAFETY: fd is a valid file descriptor
        let result = unsafe { libc::ftruncate(fd, size as libc::off_t) };
        if result < 0 {
            let errno = std::io::Error::last_os_error();
            unsafe { libc::close(fd) };
            unsafe { libc::shm_unlink(c_name.as_ptr()) };
            return Err(QueueError::CreateFailed {
                name: name.to_string(),
                reason: format!("ftruncate failed: {}", errno),
            });
        }

        // SAFETY: fd is valid, size is validated, offset 0 is valid
        let ptr = unsafe {
            libc::mmap(
                std::ptr::null_mut(),
                size,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_SHARED,
                fd,
                0,
            )
        };

        if ptr == libc::MAP_FAILED {
            let errno = std::io::Error::last_os_error();
            unsafe { libc::close(fd) };
            unsafe { libc::shm_unlink(c_name.as_ptr()) };
            return Err(QueueError::MapFailed {
                reason: format!("mmap failed: {}", errno),
            });
        }

        // SAFETY: ptr is valid, size is the correct length
        unsafe {
            std::ptr::write_bytes(ptr as *mut u8, 0, size);
        }

        let ptr = NonNull::new(ptr as *mut u8).expect("mmap returned null but not MAP_FAILED");

        tracing::debug!(name = %name, size = size, "Created shared memory region");

        Ok(Self {
            name: name.to_string(),
            ptr,
            size,
            fd,
            is_owner: true,
        })
    }

    /// Open an existing shared memory region by name. The consumer side maps
    /// its own view of the producer's region; it does not unlink on drop.
    pub fn open(name: &str, size: usize) -> Result<Self, QueueError> {
        if !(Self::MIN_SIZE..=Self::MAX_SIZE).contains(&size) {
            return Err(QueueError::CreateFailed {
                name: name.to_string(),
                reason: format!("Invalid size: {}", size),
            });
        }

        let shm_name = format!("/{}", name);
        let c_name = CString::new(shm_name.as_str()).map_err(|e| QueueError::CreateFailed {
            name: name.to_string(),
            reason: format!("Invalid name: {}", e),
        })?;

        // SAFETY: c_name is a valid CString
        let fd = unsafe { libc::shm_open(c_name.as_ptr(), libc::O_RDWR, 0) };

        if fd < 0 {
            return Err(QueueError::CreateFailed {
                name: name.to_string(),
                reason: format!("shm_open failed: {}", std::io::Error::last_os_error()),
            });
        }

        // SAFETY: fd is valid; the size must match the creating side's
        let ptr = unsafe {
            libc::mmap(
                std::ptr::null_mut(),
                size,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_SHARED,
                fd,
                0,
            )
        };

        if ptr == libc::MAP_FAILED {
            let errno = std::io::Error::last_os_error();
            unsafe { libc::close(fd) };
            return Err(QueueError::MapFailed {
                reason: format!("mmap failed: {}", errno),
            });
        }

        let ptr = NonNull::new(ptr as *mut u8).expect("mmap returned null but not MAP_FAILED");

        tracing::debug!(name = %name, size = size, "Opened shared memory region");

        Ok(Self {
            name: name.to_string(),
            ptr,
            size,
            fd,
            is_owner: false,
        })
    }

    /// Get the name of this shared memory region.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Get the size of this shared memory region.
    pub fn size(&self) -> usize {
        self.size
    }

    /// Get a raw pointer to the shared memory.
    ///
    /// # Safety
    /// Caller must ensure proper synchronization when accessing the memory.
    pub fn as_ptr(&self) -> *mut u8 {
        self.ptr.as_ptr()
    }
}

impl Drop for SharedMemoryRegion {
    fn drop(&mut self) {
        // SAFETY: ptr and size were set during creation
        let result = unsafe { libc::munmap(self.ptr.as_ptr() as *mut libc::c_void, self.size) };
        if result < 0 {
            tracing::error!(
                name = %self.name,
                error = %std::io::Error::last_os_error(),
                "Failed to unmap shared memory"
            );
        }

        // SAFETY: fd was opened during creation
        unsafe { libc::close(self.fd) };

        if self.is_owner {
            let shm_name = format!("/{}", self.name);
            if let Ok(c_name) = CString::new(shm_name.as_str()) {
                // SAFETY: c_name is a valid CString
                unsafe { libc::shm_unlink(c_name.as_ptr()) };
                tracing::debug!(name = %self.name, "Unlinked shared memory region");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_size_validation() {
        assert!(SharedMemoryRegion::create("hidpipe-test-small", 100).is_err());
        assert!(SharedMemoryRegion::create(
            "hidpipe-test-large",
            SharedMemoryRegion::MAX_SIZE + 1
        )
        .is_err());
    }

    #[test]
    fn test_empty_name() {
        assert!(SharedMemoryRegion::create("", 4096).is_err());
    }

    #[test]
    fn test_create_open_drop() {
        let name = format!("hidpipe-test-region-{}", std::process::id());
        let region = SharedMemoryRegion::create(&name, 4096).expect("create region");
        assert_eq!(region.size(), 4096);

        let view = SharedMemoryRegion::open(&name, 4096).expect("open region");
        assert_eq!(view.name(), name);
        drop(view);
        drop(region);

        // Owner dropped: the name is gone.
        assert!(SharedMemoryRegion::open(&name, 4096).is_err());
    }
}
