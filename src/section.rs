//! Bump allocation inside one loaded section

use core::ptr::NonNull;

/// Lays out the contents of one section inside an externally supplied window.
///
/// The allocator only ever moves its cursor forward and never owns the
/// memory it carves; the window is released by whoever reserved it.
#[derive(Debug)]
pub struct SectionAllocator {
    data: Option<NonNull<u8>>,
    size: usize,
    used: usize,
}

impl SectionAllocator {
    /// Creates an allocator over `size` bytes starting at `data`.
    ///
    /// # Safety
    /// `data..data + size` must stay valid for as long as the returned
    /// pointers are used.
    pub const unsafe fn new(data: NonNull<u8>, size: usize) -> Self {
        Self {
            data: Some(data),
            size,
            used: 0,
        }
    }

    /// Creates an allocator without backing memory.
    ///
    /// It runs the same layout arithmetic from address 0, so after placing
    /// every item [`used`](Self::used) tells how large a window to reserve.
    /// Alignment padding is computed from a maximally aligned base and may be
    /// smaller than what a real window needs; reserve with the largest
    /// alignment in mind.
    pub const fn sizing() -> Self {
        Self {
            data: None,
            size: usize::MAX,
            used: 0,
        }
    }

    /// Allocates `size` bytes aligned to `align` and returns their address.
    ///
    /// Returns `None` when the request is empty, `align` is not a power of
    /// two, the window is exhausted, or the allocator has no backing memory.
    pub fn allocate(&mut self, size: usize, align: usize) -> Option<NonNull<u8>> {
        let base = self.data?;
        let offset = self.allocate_offset(size, align)?;
        // SAFETY: `offset + size <= self.size`, so the result stays in the window.
        Some(unsafe { base.add(offset) })
    }

    /// Allocates `size` bytes aligned to `align` and returns their offset from
    /// the start of the window.
    pub fn allocate_offset(&mut self, size: usize, align: usize) -> Option<usize> {
        if size == 0 || !align.is_power_of_two() {
            return None;
        }
        let base = self.base();
        let mask = align - 1;
        let aligned = base.checked_add(self.used)?.checked_add(mask)? & !mask;
        let end = aligned.checked_add(size)?;
        if end - base > self.size {
            return None;
        }
        self.used = end - base;
        Some(aligned - base)
    }

    /// Bytes consumed so far, including alignment padding.
    #[inline]
    pub fn used(&self) -> usize {
        self.used
    }

    /// Bytes still available at the end of the window.
    #[inline]
    pub fn remaining(&self) -> usize {
        self.size - self.used
    }

    /// Total size of the window.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.size
    }

    #[inline]
    fn base(&self) -> usize {
        self.data.map_or(0, |data| data.as_ptr() as usize)
    }
}
