use crate::{
    Error, Result,
    os::{Mmap, ProtFlags},
};
use alloc::format;
use core::{ffi::c_void, mem::MaybeUninit, ptr::NonNull};
use windows_sys::Win32::{
    Foundation::GetLastError,
    System::{
        LibraryLoader::GetModuleHandleW,
        Memory::{
            self as Memory, MEM_COMMIT, MEM_RELEASE, MEM_RESERVE, PAGE_EXECUTE,
            PAGE_EXECUTE_READ, PAGE_EXECUTE_READWRITE, PAGE_NOACCESS, PAGE_PROTECTION_FLAGS,
            PAGE_READONLY, PAGE_READWRITE,
        },
    },
};

/// An implementation of Mmap trait
pub struct DefaultMmap;

fn prot_win(prot: ProtFlags) -> PAGE_PROTECTION_FLAGS {
    match prot.bits() {
        0 => PAGE_NOACCESS,
        1 => PAGE_READONLY,
        0b10 | 0b11 => PAGE_READWRITE,
        0b100 => PAGE_EXECUTE,
        0b101 => PAGE_EXECUTE_READ,
        _ => PAGE_EXECUTE_READWRITE,
    }
}

impl Mmap for DefaultMmap {
    unsafe fn mmap_at(addr: usize, len: usize, prot: ProtFlags) -> Result<NonNull<c_void>> {
        // An address-hinted VirtualAlloc fails when the range is taken rather
        // than moving to a neighbouring free range.
        let ptr = unsafe {
            Memory::VirtualAlloc(addr as _, len, MEM_COMMIT | MEM_RESERVE, prot_win(prot))
        };
        if ptr.is_null() {
            let err_code = unsafe { GetLastError() };
            return Err(Error::Mmap {
                msg: format!("VirtualAlloc failed with error: {}", err_code).into(),
            });
        }
        if ptr as usize != addr {
            unsafe { Memory::VirtualFree(ptr, 0, MEM_RELEASE) };
            return Err(Error::Mmap {
                msg: "VirtualAlloc did not honor the requested address".into(),
            });
        }
        Ok(unsafe { NonNull::new_unchecked(ptr) })
    }

    unsafe fn munmap(addr: NonNull<c_void>, _len: usize) -> Result<()> {
        if unsafe { Memory::VirtualFree(addr.as_ptr(), 0, MEM_RELEASE) } == 0 {
            let err_code = unsafe { GetLastError() };
            return Err(Error::Mmap {
                msg: format!("munmap error! error code: {}", err_code).into(),
            });
        }
        Ok(())
    }

    unsafe fn mprotect(addr: NonNull<c_void>, len: usize, prot: ProtFlags) -> Result<()> {
        let mut old = MaybeUninit::uninit();
        if unsafe { Memory::VirtualProtect(addr.as_ptr(), len, prot_win(prot), old.as_mut_ptr()) }
            == 0
        {
            let err_code = unsafe { GetLastError() };
            return Err(Error::Mmap {
                msg: format!("mprotect error! error code: {}", err_code).into(),
            });
        }
        Ok(())
    }

    fn main_module_base() -> Result<usize> {
        let module = unsafe { GetModuleHandleW(core::ptr::null()) };
        if module.is_null() {
            let err_code = unsafe { GetLastError() };
            return Err(Error::Mmap {
                msg: format!("GetModuleHandleW failed with error: {}", err_code).into(),
            });
        }
        Ok(module as usize)
    }
}
