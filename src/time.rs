//! File modification timestamps
//!
//! The patching pipeline reloads a module when its file changed. All it needs
//! is a value per path that compares monotonically with earlier readings.

use crate::Result;

/// A source of per-file modification timestamps.
pub trait TimestampSource {
    /// Gets the last modification time of `path`.
    ///
    /// Values from the same source compare in modification order; their unit
    /// is unspecified.
    fn mtime(&self, path: &str) -> Result<u64>;
}

impl<F: ?Sized> TimestampSource for F
where
    F: Fn(&str) -> Result<u64>,
{
    fn mtime(&self, path: &str) -> Result<u64> {
        self(path)
    }
}

/// Reads timestamps from the file system.
///
/// Unix values are nanoseconds since the epoch, Windows values are `FILETIME`
/// ticks (100 ns since 1601).
#[derive(Clone, Copy, Debug, Default)]
pub struct FileTimestamps;

impl TimestampSource for FileTimestamps {
    fn mtime(&self, path: &str) -> Result<u64> {
        imp::mtime(path)
    }
}

#[cfg(unix)]
mod imp {
    use crate::{Result, error::io_error};
    use alloc::ffi::CString;
    use core::mem::MaybeUninit;

    pub(super) fn mtime(path: &str) -> Result<u64> {
        let name = CString::new(path).map_err(|_| io_error("path contains a NUL byte"))?;
        let mut stat = MaybeUninit::<libc::stat>::uninit();
        if unsafe { libc::stat(name.as_ptr(), stat.as_mut_ptr()) } != 0 {
            return Err(io_error("stat failed"));
        }
        let stat = unsafe { stat.assume_init() };
        Ok((stat.st_mtime as u64)
            .wrapping_mul(1_000_000_000)
            .wrapping_add(stat.st_mtime_nsec as u64))
    }
}

#[cfg(windows)]
mod imp {
    use crate::{Result, error::io_error};
    use alloc::{format, vec::Vec};
    use core::ptr::null_mut;
    use windows_sys::Win32::{
        Foundation::{CloseHandle, FILETIME, GetLastError, INVALID_HANDLE_VALUE},
        Storage::FileSystem::{
            CreateFileW, FILE_FLAG_BACKUP_SEMANTICS, FILE_SHARE_READ, FILE_SHARE_WRITE,
            GetFileTime, OPEN_EXISTING,
        },
    };

    pub(super) fn mtime(path: &str) -> Result<u64> {
        let mut wide_path: Vec<u16> = path.encode_utf16().collect();
        wide_path.push(0);

        let handle = unsafe {
            CreateFileW(
                wide_path.as_ptr(),
                0,
                FILE_SHARE_READ | FILE_SHARE_WRITE,
                core::ptr::null(),
                OPEN_EXISTING,
                FILE_FLAG_BACKUP_SEMANTICS,
                null_mut(),
            )
        };
        if handle == INVALID_HANDLE_VALUE {
            let err_code = unsafe { GetLastError() };
            return Err(io_error(format!(
                "CreateFileW failed with error: {}",
                err_code
            )));
        }

        let mut written = FILETIME {
            dwLowDateTime: 0,
            dwHighDateTime: 0,
        };
        let res = unsafe { GetFileTime(handle, null_mut(), null_mut(), &mut written) };
        unsafe { CloseHandle(handle) };
        if res == 0 {
            return Err(io_error("GetFileTime failed"));
        }
        Ok(((written.dwHighDateTime as u64) << 32) | written.dwLowDateTime as u64)
    }
}
