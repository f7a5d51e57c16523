mod common;

use common::{FakeMmap, GRANULARITY};
use hotpatch_core::{
    BlockAllocator, Error, TrampolineAllocator, TrampolineConfig, reserve::ReservationConfig,
};
use rstest::rstest;
use std::{
    alloc::{GlobalAlloc, Layout, System},
    cell::Cell,
};

/// Fails every allocation of at least `LIMIT` bytes made by the current thread.
struct LimitedAlloc;

thread_local! {
    static LIMIT: Cell<usize> = const { Cell::new(usize::MAX) };
}

unsafe impl GlobalAlloc for LimitedAlloc {
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        if layout.size() >= LIMIT.get() {
            return std::ptr::null_mut();
        }
        unsafe { System.alloc(layout) }
    }

    unsafe fn dealloc(&self, ptr: *mut u8, layout: Layout) {
        unsafe { System.dealloc(ptr, layout) }
    }

    unsafe fn realloc(&self, ptr: *mut u8, layout: Layout, new_size: usize) -> *mut u8 {
        if new_size >= LIMIT.get() {
            return std::ptr::null_mut();
        }
        unsafe { System.realloc(ptr, layout, new_size) }
    }
}

#[global_allocator]
static GLOBAL: LimitedAlloc = LimitedAlloc;

fn with_limit<R>(limit: usize, f: impl FnOnce() -> R) -> R {
    LIMIT.set(limit);
    let result = f();
    LIMIT.set(usize::MAX);
    result
}

const LOCATION: usize = 0x4000_0000;

#[rstest]
fn trampoline_page_bookkeeping_failure_is_reported() {
    FakeMmap::reset(GRANULARITY, 1 << 47);
    let mut trampolines = TrampolineAllocator::<FakeMmap>::with_config(
        TrampolineConfig::default(),
        ReservationConfig::default(),
    )
    .unwrap();

    let result = with_limit(0x1000, || trampolines.allocate(LOCATION));
    assert!(matches!(result, Err(Error::OutOfMemory { .. })));
    assert_eq!(trampolines.page_count(), 0);
    assert_eq!(FakeMmap::mapping_count(), 0);

    let t = trampolines.allocate(LOCATION).unwrap();
    assert_eq!(t.addr(), LOCATION);
    assert_eq!(FakeMmap::mapping_count(), 1);
}

#[rstest]
fn block_page_failure_leaves_the_pool_usable() {
    let mut pool = BlockAllocator::<[u8; 64], 4096>::new();

    let result = with_limit(0x1000, || pool.allocate([1; 64]));
    assert!(matches!(result, Err(Error::OutOfMemory { .. })));
    assert_eq!(pool.page_count(), 0);
    assert!(pool.is_empty());

    let h = pool.allocate([2; 64]).unwrap();
    assert_eq!(pool.get(h), Some(&[2; 64]));
    assert_eq!(pool.page_count(), 1);
}
