use crate::{
    Result,
    error::mmap_error,
    os::{Mmap, ProtFlags},
};
use core::{ffi::c_void, ptr::NonNull};
use syscalls::Sysno;

/// An implementation of Mmap trait
pub struct DefaultMmap;

const MAP_PRIVATE: usize = 0x02;
const MAP_ANONYMOUS: usize = 0x20;
const MAP_FIXED_NOREPLACE: usize = 0x10_0000;

#[inline]
fn mmap(addr: usize, len: usize, prot: ProtFlags) -> Result<usize> {
    unsafe {
        #[cfg(target_pointer_width = "32")]
        let syscall = Sysno::mmap2;
        #[cfg(not(target_pointer_width = "32"))]
        let syscall = Sysno::mmap;
        from_ret(
            syscalls::raw_syscall!(
                syscall,
                addr,
                len,
                prot.bits(),
                MAP_PRIVATE | MAP_ANONYMOUS | MAP_FIXED_NOREPLACE,
                usize::MAX,
                0
            ),
            "mmap failed",
        )
    }
}

#[inline]
fn munmap(addr: *mut c_void, len: usize) -> Result<()> {
    unsafe {
        from_ret(
            syscalls::raw_syscall!(Sysno::munmap, addr, len),
            "munmap failed",
        )?;
    }
    Ok(())
}

#[inline]
fn mprotect(addr: *mut c_void, len: usize, prot: ProtFlags) -> Result<()> {
    unsafe {
        from_ret(
            syscalls::raw_syscall!(Sysno::mprotect, addr, len, prot.bits()),
            "mprotect failed",
        )?;
    }
    Ok(())
}

impl Mmap for DefaultMmap {
    unsafe fn mmap_at(addr: usize, len: usize, prot: ProtFlags) -> Result<NonNull<c_void>> {
        let ptr = mmap(addr, len, prot)?;
        if ptr != addr {
            munmap(ptr as _, len)?;
            return Err(mmap_error("mmap did not honor the requested address"));
        }
        Ok(unsafe { NonNull::new_unchecked(ptr as _) })
    }

    unsafe fn munmap(addr: NonNull<c_void>, len: usize) -> Result<()> {
        munmap(addr.as_ptr(), len)
    }

    unsafe fn mprotect(addr: NonNull<c_void>, len: usize, prot: ProtFlags) -> Result<()> {
        mprotect(addr.as_ptr(), len, prot)
    }

    fn main_module_base() -> Result<usize> {
        // The auxiliary vector is only reachable through the C runtime here.
        let phdr = unsafe { libc::getauxval(libc::AT_PHDR) } as usize;
        if phdr == 0 {
            return Err(mmap_error("AT_PHDR is not available"));
        }
        Ok(phdr & !(crate::PAGE_SIZE - 1))
    }
}

/// Converts a raw syscall return value to a result.
#[inline(always)]
fn from_ret(value: usize, msg: &'static str) -> Result<usize> {
    if value > -4096isize as usize {
        // Truncation of the error value is guaranteed to never occur due to
        // the above check. This is the same check that musl uses:
        // https://git.musl-libc.org/cgit/musl/tree/src/internal/syscall_ret.c?h=v1.1.15
        return Err(mmap_error(msg));
    }
    Ok(value)
}
