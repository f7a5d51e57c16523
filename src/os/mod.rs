//! OS memory services
//!
//! The allocators in this crate never talk to the OS directly. They are generic
//! over an [`Mmap`] implementation, and [`DefaultMmap`] picks the right backend
//! for the current target:
//! - **windows**: `VirtualAlloc`/`VirtualFree` through `windows-sys`.
//! - **linux + `use-syscall`**: raw `mmap`/`munmap` syscalls through `syscalls`.
//! - **other unix**: `mmap`/`munmap` through `libc`.

mod traits;

pub use traits::Mmap;

use bitflags::bitflags;
use core::ffi::c_int;

cfg_if::cfg_if! {
    if #[cfg(windows)]{
        pub(crate) mod windows;
        pub use windows::*;
    }else if #[cfg(all(feature = "use-syscall", target_os = "linux"))]{
        pub(crate) mod linux_syscall;
        pub use linux_syscall::*;
    }else if #[cfg(unix)]{
        pub(crate) mod unix;
        pub use unix::*;
    }else {
        compile_error!("unsupported os");
    }
}

bitflags! {
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
    /// Memory protection flags for controlling access permissions.
    ///
    /// These flags determine what operations can be performed on a mapped memory region.
    /// They can be combined using bitwise OR operations.
    pub struct ProtFlags: c_int {
        /// No access allowed.
        const PROT_NONE = 0;

        /// Allow reading from the memory region.
        const PROT_READ = 1;

        /// Allow writing to the memory region.
        const PROT_WRITE = 2;

        /// Allow executing code in the memory region.
        const PROT_EXEC = 4;
    }
}

impl ProtFlags {
    /// Protection used for patch code and trampoline pages.
    pub const RWX: ProtFlags = ProtFlags::PROT_READ
        .union(ProtFlags::PROT_WRITE)
        .union(ProtFlags::PROT_EXEC);
}
