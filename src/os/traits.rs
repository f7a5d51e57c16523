use core::{ffi::c_void, ptr::NonNull};

use super::ProtFlags;
use crate::Result;

/// A trait for the low-level memory operations the allocators depend on.
///
/// This trait abstracts platform-specific details so that reservation and
/// trampoline placement work the same way on every supported system, and so
/// that tests can substitute a simulated address space.
///
/// # Safety
/// All mapping methods are unsafe because they manipulate the process's
/// virtual address space. Improper use can cause memory corruption or crashes.
///
/// # Example
/// ```rust,ignore
/// struct MyMmap;
///
/// impl Mmap for MyMmap {
///     unsafe fn mmap_at(addr: usize, len: usize, prot: ProtFlags) -> Result<NonNull<c_void>> {
///         // Platform-specific implementation
///         todo!()
///     }
///
///     // Implement other required methods...
/// }
/// ```
pub trait Mmap {
    /// Maps `len` bytes of committed anonymous memory exactly at `addr`.
    ///
    /// Unlike a plain `mmap` hint, the call must not relocate the mapping:
    /// if the range starting at `addr` is not available the implementation
    /// returns an error and leaves the address space untouched. The probing
    /// search in [`crate::reserve`] relies on this to walk the address space
    /// itself.
    ///
    /// # Arguments
    /// * `addr` - Requested starting address, aligned to [`Mmap::granularity`].
    /// * `len` - Size of the mapping in bytes.
    /// * `prot` - Memory protection flags.
    ///
    /// # Safety
    /// The caller takes ownership of the returned mapping and must release it
    /// with [`Mmap::munmap`] using the same length.
    unsafe fn mmap_at(addr: usize, len: usize, prot: ProtFlags) -> Result<NonNull<c_void>>;

    /// Unmaps a memory region created by [`Mmap::mmap_at`].
    ///
    /// # Safety
    /// `addr` and `len` must match the original mapping. The region must not
    /// be accessed afterwards.
    unsafe fn munmap(addr: NonNull<c_void>, len: usize) -> Result<()>;

    /// Changes the protection of a memory region.
    ///
    /// # Safety
    /// Removing permissions from memory that is in use (for example code that
    /// is currently executing) will crash the process.
    unsafe fn mprotect(addr: NonNull<c_void>, len: usize, prot: ProtFlags) -> Result<()>;

    /// Returns the load base of the process's primary module (the executable).
    fn main_module_base() -> Result<usize>;

    /// Returns the alignment that placement addresses are rounded to.
    ///
    /// Windows reserves address space in 64 KiB units; the same value is used
    /// elsewhere so that probing behaves identically on every platform.
    #[inline]
    fn granularity() -> usize {
        0x10000
    }
}
