#![allow(dead_code)]

use hotpatch_core::{Binary, Result, custom_error, os::Mmap, os::ProtFlags};
use std::cell::{Cell, RefCell};
use std::collections::BTreeMap;
use std::ffi::c_void;
use std::ptr::NonNull;
use std::sync::Mutex;

pub const GRANULARITY: usize = 0x10000;
pub const MAIN_MODULE_BASE: usize = 0x7f00_0000_0000;

/// A simulated address space. Each test thread gets its own.
struct FakeSpace {
    low: usize,
    high: usize,
    mapped: BTreeMap<usize, usize>,
    probes: usize,
}

impl FakeSpace {
    fn overlaps(&self, addr: usize, len: usize) -> bool {
        let end = addr + len;
        self.mapped
            .range(..end)
            .next_back()
            .is_some_and(|(&base, &size)| base + size > addr)
    }
}

thread_local! {
    static SPACE: RefCell<FakeSpace> = RefCell::new(FakeSpace {
        low: GRANULARITY,
        high: 1 << 47,
        mapped: BTreeMap::new(),
        probes: 0,
    });
    static FAIL_ALL: Cell<bool> = const { Cell::new(false) };
}

/// An `Mmap` backend that hands out addresses without touching real memory.
pub struct FakeMmap;

impl FakeMmap {
    /// Restricts the usable address space to `[low, high)` and forgets all mappings.
    pub fn reset(low: usize, high: usize) {
        SPACE.with_borrow_mut(|space| {
            space.low = low;
            space.high = high;
            space.mapped.clear();
            space.probes = 0;
        });
        FAIL_ALL.set(false);
    }

    /// Marks `[addr, addr + len)` as taken by someone else.
    pub fn occupy(addr: usize, len: usize) {
        SPACE.with_borrow_mut(|space| {
            space.mapped.insert(addr, len);
        });
    }

    /// Makes every mapping attempt fail.
    pub fn fail_all(fail: bool) {
        FAIL_ALL.set(fail);
    }

    pub fn is_mapped(addr: usize) -> bool {
        SPACE.with_borrow(|space| space.mapped.contains_key(&addr))
    }

    pub fn mapping_count() -> usize {
        SPACE.with_borrow(|space| space.mapped.len())
    }

    /// Number of `mmap_at` calls since the last reset.
    pub fn probes() -> usize {
        SPACE.with_borrow(|space| space.probes)
    }
}

impl Mmap for FakeMmap {
    unsafe fn mmap_at(addr: usize, len: usize, _prot: ProtFlags) -> Result<NonNull<c_void>> {
        SPACE.with_borrow_mut(|space| {
            space.probes += 1;
            if FAIL_ALL.get() {
                return Err(custom_error("mapping disabled"));
            }
            if addr < space.low || addr.saturating_add(len) > space.high {
                return Err(custom_error("outside the address space"));
            }
            if space.overlaps(addr, len) {
                return Err(custom_error("range is taken"));
            }
            space.mapped.insert(addr, len);
            Ok(NonNull::new(addr as *mut c_void).unwrap())
        })
    }

    unsafe fn munmap(addr: NonNull<c_void>, len: usize) -> Result<()> {
        SPACE.with_borrow_mut(|space| match space.mapped.remove(&(addr.as_ptr() as usize)) {
            Some(size) if size == len => Ok(()),
            _ => Err(custom_error("not mapped")),
        })
    }

    unsafe fn mprotect(_addr: NonNull<c_void>, _len: usize, _prot: ProtFlags) -> Result<()> {
        Ok(())
    }

    fn main_module_base() -> Result<usize> {
        Ok(MAIN_MODULE_BASE)
    }
}

/// A module that records which sections were linked.
pub struct RecordingBinary {
    pub base: usize,
    pub linked: Mutex<Vec<usize>>,
    pub result: bool,
}

impl RecordingBinary {
    pub fn new(base: usize) -> Self {
        Self {
            base,
            linked: Mutex::new(Vec::new()),
            result: true,
        }
    }

    pub fn linked(&self) -> Vec<usize> {
        self.linked.lock().unwrap().clone()
    }
}

impl Binary for RecordingBinary {
    fn partial_link(&self, section: usize) -> bool {
        self.linked.lock().unwrap().push(section);
        self.result
    }

    fn base_address(&self) -> usize {
        self.base
    }
}
