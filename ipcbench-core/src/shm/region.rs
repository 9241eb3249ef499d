//! SharedMemoryRegion - POSIX shared memory wrapper.
//!
//! Provides safe abstraction over mmap and shm_open for state shared by
//! forked benchmark processes. The named object outlives every handle:
//! dropping a region only unmaps it, removal is explicit via [`SharedMemoryRegion::unlink`].

use std::ffi::CString;
use std::ptr::NonNull;
use std::time::{Duration, Instant};

use crate::error::SharedMemoryError;

/// How long an attacher waits for the creator to size the object.
const SIZE_WAIT_TIMEOUT: Duration = Duration::from_secs(5);

/// Represents a mapped shared memory region.
///
/// The memory can be shared between processes using the same name.
pub struct SharedMemoryRegion {
    /// Name of the shared memory object (without the leading slash).
    name: String,
    /// Pointer to the mapped memory.
    ptr: NonNull<u8>,
    /// Size of the mapped region in bytes.
    size: usize,
    /// File descriptor for the shared memory object.
    fd: i32,
    /// Whether this handle created the object (and zero-initialised it).
    created: bool,
}

// SAFETY: SharedMemoryRegion owns its mapping; moving it between threads is fine.
unsafe impl Send for SharedMemoryRegion {}

// SAFETY: Concurrent access to the bytes is coordinated by the users of the
// region (the barrier's process-shared mutex, or the chunk barrier).
unsafe impl Sync for SharedMemoryRegion {}

impl SharedMemoryRegion {
    /// Maximum size for a shared memory region (1 GB).
    pub const MAX_SIZE: usize = 1024 * 1024 * 1024;

    /// Create a new shared memory region, failing if the name already exists.
    ///
    /// # Arguments
    /// * `name` - Name of the shared memory object (will be prefixed with /)
    /// * `size` - Size in bytes (must be between 1 and MAX_SIZE)
    ///
    /// # Errors
    /// Returns SharedMemoryError if creation or mapping fails.
    pub fn create(name: &str, size: usize) -> Result<Self, SharedMemoryError> {
        match Self::try_create(name, size)? {
            Some(region) => Ok(region),
            None => Err(SharedMemoryError::CreateFailed {
                name: name.to_string(),
                reason: "Shared memory already exists".to_string(),
            }),
        }
    }

    /// Create the region, or attach to it if another process created it first.
    ///
    /// Use [`SharedMemoryRegion::is_creator`] to learn which happened.
    pub fn create_or_open(name: &str, size: usize) -> Result<Self, SharedMemoryError> {
        match Self::try_create(name, size)? {
            Some(region) => Ok(region),
            None => Self::open(name, size),
        }
    }

    /// Exclusive create. Returns `Ok(None)` when the object already exists.
    fn try_create(name: &str, size: usize) -> Result<Option<Self>, SharedMemoryError> {
        Self::validate(name, size)?;
        let c_name = Self::c_name(name)?;

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
            if errno.raw_os_error() == Some(libc::EEXIST) {
                return Ok(None);
            }
            return Err(SharedMemoryError::CreateFailed {
                name: name.to_string(),
                reason: format!("shm_open failed: {}", errno),
            });
        }

        // Set size. The new object reads as zeroes.
        // SAFETY: fd is a valid file descriptor
        let result = unsafe { libc::ftruncate(fd, size as libc::off_t) };
        if result < 0 {
            let errno = std::io::Error::last_os_error();
            unsafe { libc::close(fd) };
            unsafe { libc::shm_unlink(c_name.as_ptr()) };
            return Err(SharedMemoryError::CreateFailed {
                name: name.to_string(),
                reason: format!("ftruncate failed: {}", errno),
            });
        }

        let ptr = match Self::map(fd, size) {
            Ok(ptr) => ptr,
            Err(e) => {
                unsafe { libc::close(fd) };
                unsafe { libc::shm_unlink(c_name.as_ptr()) };
                return Err(e);
            }
        };

        tracing::debug!(name = %name, size = size, "Created shared memory region");

        Ok(Some(Self {
            name: name.to_string(),
            ptr,
            size,
            fd,
            created: true,
        }))
    }

    /// Open an existing shared memory region.
    ///
    /// Waits briefly for the creator to size the object so the mapping never
    /// extends past its end.
    pub fn open(name: &str, size: usize) -> Result<Self, SharedMemoryError> {
        Self::validate(name, size)?;
        let c_name = Self::c_name(name)?;

        // SAFETY: c_name is a valid CString
        let fd = unsafe { libc::shm_open(c_name.as_ptr(), libc::O_RDWR, 0) };

        if fd < 0 {
            return Err(SharedMemoryError::OpenFailed {
                name: name.to_string(),
                reason: format!("shm_open failed: {}", std::io::Error::last_os_error()),
            });
        }

        if let Err(e) = Self::wait_for_size(name, fd, size) {
            unsafe { libc::close(fd) };
            return Err(e);
        }

        let ptr = match Self::map(fd, size) {
            Ok(ptr) => ptr,
            Err(e) => {
                unsafe { libc::close(fd) };
                return Err(e);
            }
        };

        tracing::debug!(name = %name, size = size, "Opened shared memory region");

        Ok(Self {
            name: name.to_string(),
            ptr,
            size,
            fd,
            created: false,
        })
    }

    /// Remove the named object. Best effort: returns whether anything was removed.
    ///
    /// Existing mappings stay valid until their handles are dropped.
    pub fn unlink(name: &str) -> bool {
        let Ok(c_name) = CString::new(format!("/{}", name)) else {
            return false;
        };

        // SAFETY: c_name is a valid CString
        let result = unsafe { libc::shm_unlink(c_name.as_ptr()) };
        if result == 0 {
            tracing::debug!(name = %name, "Unlinked shared memory region");
            true
        } else {
            let errno = std::io::Error::last_os_error();
            if errno.raw_os_error() != Some(libc::ENOENT) {
                tracing::warn!(name = %name, error = %errno, "shm_unlink failed");
            }
            false
        }
    }

    fn validate(name: &str, size: usize) -> Result<(), SharedMemoryError> {
        if name.is_empty() {
            return Err(SharedMemoryError::CreateFailed {
                name: name.to_string(),
                reason: "Name cannot be empty".to_string(),
            });
        }
        if size == 0 || size > Self::MAX_SIZE {
            return Err(SharedMemoryError::CreateFailed {
                name: name.to_string(),
                reason: format!("Size {} is outside 1..={}", size, Self::MAX_SIZE),
            });
        }
        Ok(())
    }

    fn c_name(name: &str) -> Result<CString, SharedMemoryError> {
        CString::new(format!("/{}", name)).map_err(|e| SharedMemoryError::CreateFailed {
            name: name.to_string(),
            reason: format!("Invalid name: {}", e),
        })
    }

    fn wait_for_size(name: &str, fd: i32, size: usize) -> Result<(), SharedMemoryError> {
        let start = Instant::now();
        loop {
            // SAFETY: stat is plain old data, fd is valid
            let mut stat: libc::stat = unsafe { std::mem::zeroed() };
            if unsafe { libc::fstat(fd, &mut stat) } < 0 {
                return Err(SharedMemoryError::OpenFailed {
                    name: name.to_string(),
                    reason: format!("fstat failed: {}", std::io::Error::last_os_error()),
                });
            }

            let actual = stat.st_size as usize;
            if actual >= size {
                return Ok(());
            }
            if start.elapsed() > SIZE_WAIT_TIMEOUT {
                return Err(SharedMemoryError::Undersized {
                    name: name.to_string(),
                    expected: size,
                    actual,
                });
            }
            std::thread::sleep(Duration::from_millis(1));
        }
    }

    fn map(fd: i32, size: usize) -> Result<NonNull<u8>, SharedMemoryError> {
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
            return Err(SharedMemoryError::MapFailed {
                reason: format!("mmap failed: {}", std::io::Error::last_os_error()),
            });
        }

        NonNull::new(ptr as *mut u8).ok_or_else(|| SharedMemoryError::MapFailed {
            reason: "mmap returned null".to_string(),
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

    /// Whether this handle created the object rather than attaching to it.
    pub fn is_creator(&self) -> bool {
        self.created
    }

    /// Get a raw pointer to the shared memory.
    ///
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
    }
}
