use crate::{
    Result,
    error::mmap_error,
    os::{Mmap, ProtFlags},
};
use core::{ffi::c_void, ptr::NonNull};
use libc::{MAP_ANONYMOUS, MAP_FAILED, MAP_PRIVATE, mmap, mprotect, munmap};

/// An implementation of Mmap trait
pub struct DefaultMmap;

// Kernels older than 4.17 ignore the flag and treat the address as a hint,
// which `mmap_at` also handles.
#[cfg(any(target_os = "linux", target_os = "android"))]
const PLACEMENT_FLAGS: libc::c_int = libc::MAP_FIXED_NOREPLACE;
#[cfg(not(any(target_os = "linux", target_os = "android")))]
const PLACEMENT_FLAGS: libc::c_int = 0;

impl Mmap for DefaultMmap {
    unsafe fn mmap_at(addr: usize, len: usize, prot: ProtFlags) -> Result<NonNull<c_void>> {
        let ptr = unsafe {
            mmap(
                addr as _,
                len,
                prot.bits(),
                MAP_PRIVATE | MAP_ANONYMOUS | PLACEMENT_FLAGS,
                -1,
                0,
            )
        };
        if core::ptr::eq(ptr, MAP_FAILED) {
            return Err(mmap_error("mmap failed"));
        }
        if ptr as usize != addr {
            unsafe { munmap(ptr, len) };
            return Err(mmap_error("mmap did not honor the requested address"));
        }
        Ok(unsafe { NonNull::new_unchecked(ptr) })
    }

    unsafe fn munmap(addr: NonNull<c_void>, len: usize) -> Result<()> {
        let res = unsafe { munmap(addr.as_ptr(), len) };
        if res != 0 {
            return Err(mmap_error("munmap failed"));
        }
        Ok(())
    }

    unsafe fn mprotect(addr: NonNull<c_void>, len: usize, prot: ProtFlags) -> Result<()> {
        let res = unsafe { mprotect(addr.as_ptr(), len, prot.bits()) };
        if res != 0 {
            return Err(mmap_error("mprotect failed"));
        }
        Ok(())
    }

    fn main_module_base() -> Result<usize> {
        main_module_base()
    }
}

/// The executable's program headers live inside its first mapped page, so the
/// module that contains them is the main module.
#[cfg(any(target_os = "linux", target_os = "android"))]
fn main_module_base() -> Result<usize> {
    let phdr = unsafe { libc::getauxval(libc::AT_PHDR) } as usize;
    if phdr == 0 {
        return Err(mmap_error("AT_PHDR is not available"));
    }
    Ok(module_base_of(phdr as _).unwrap_or(phdr & !(crate::PAGE_SIZE - 1)))
}

#[cfg(target_vendor = "apple")]
fn main_module_base() -> Result<usize> {
    let header = unsafe { libc::_dyld_get_image_header(0) };
    if header.is_null() {
        return Err(mmap_error("dyld has no image at index 0"));
    }
    Ok(header as usize)
}

/// Falls back to the module containing this crate, which is the executable
/// whenever the crate is linked statically.
#[cfg(not(any(target_os = "linux", target_os = "android", target_vendor = "apple")))]
fn main_module_base() -> Result<usize> {
    module_base_of(main_module_base as *const c_void)
        .ok_or_else(|| mmap_error("dladdr could not resolve the main module"))
}

#[cfg(not(target_vendor = "apple"))]
fn module_base_of(addr: *const c_void) -> Option<usize> {
    let mut info = core::mem::MaybeUninit::<libc::Dl_info>::uninit();
    let res = unsafe { libc::dladdr(addr, info.as_mut_ptr()) };
    if res == 0 {
        return None;
    }
    let base = unsafe { info.assume_init() }.dli_fbase as usize;
    (base != 0).then_some(base)
}
