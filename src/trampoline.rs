//! Pool of executable stubs reachable by short relative jumps
//!
//! Trampoline pages are reserved close to the code that jumps into them. A
//! page is in jump range of an address when their distance is below
//! [`TrampolineConfig::jump_range`]. Allocation reuses any in-range page that
//! still has a free block and reserves a new page below the target otherwise.

use crate::{
    Result,
    block::SlotPage,
    error::{address_space_error, invalid_argument, out_of_memory_error},
    os::{DefaultMmap, Mmap},
    reserve::{Direction, NearReservation, Region, ReservationConfig},
};
use alloc::vec::Vec;
use core::{fmt::Debug, ptr::NonNull};

/// Default jump range: just under the reach of a signed 32-bit displacement.
pub const DEFAULT_JUMP_RANGE: usize = 0x7fff_0000;

/// Layout and reach of trampoline pages.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TrampolineConfig {
    /// Bytes reserved per page.
    pub page_size: usize,
    /// Bytes per trampoline block.
    pub block_size: usize,
    /// Maximum distance between a page base and an address that jumps into it.
    pub jump_range: usize,
}

impl Default for TrampolineConfig {
    fn default() -> Self {
        Self {
            page_size: 0x10000,
            block_size: 32,
            jump_range: DEFAULT_JUMP_RANGE,
        }
    }
}

impl TrampolineConfig {
    fn validate(&self) -> Result<()> {
        if self.block_size == 0 || self.page_size < self.block_size {
            return Err(invalid_argument(
                "trampoline pages must hold at least one non-empty block",
            ));
        }
        if self.page_size / self.block_size > u32::MAX as usize {
            return Err(invalid_argument("too many trampoline blocks per page"));
        }
        if self.jump_range == 0 {
            return Err(invalid_argument("jump range must not be zero"));
        }
        Ok(())
    }

    #[inline]
    fn blocks_per_page(&self) -> usize {
        self.page_size / self.block_size
    }
}

/// One allocated trampoline block.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Trampoline {
    addr: NonNull<u8>,
    len: usize,
    page: u32,
    slot: u32,
}

unsafe impl Send for Trampoline {}
unsafe impl Sync for Trampoline {}

impl Trampoline {
    /// Gets the address of the block.
    #[inline]
    pub fn addr(&self) -> usize {
        self.addr.as_ptr() as usize
    }

    /// Gets a raw pointer to the block.
    #[inline]
    pub fn as_ptr(&self) -> *mut u8 {
        self.addr.as_ptr()
    }

    /// Gets the size of the block in bytes.
    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether the block is empty. Blocks never are.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Index of the owning page, in creation order.
    #[inline]
    pub fn page(&self) -> usize {
        self.page as usize
    }

    /// Index of the block inside its page.
    #[inline]
    pub fn slot(&self) -> usize {
        self.slot as usize
    }

    /// Gets the block as a mutable byte slice, for writing stub code.
    ///
    /// # Safety
    /// The block must still be allocated from its allocator, and no other
    /// thread may execute or write it for the slice's lifetime.
    #[inline]
    pub unsafe fn as_mut_slice(&self) -> &mut [u8] {
        unsafe { core::slice::from_raw_parts_mut(self.as_ptr(), self.len) }
    }
}

struct TrampolinePage {
    region: Region,
    blocks: SlotPage<()>,
}

impl TrampolinePage {
    #[inline]
    fn base(&self) -> usize {
        self.region.addr()
    }

    #[inline]
    fn is_inside_memory(&self, addr: usize) -> bool {
        self.region.contains(addr)
    }

    #[inline]
    fn is_inside_jump_range(&self, addr: usize, jump_range: usize) -> bool {
        self.base().abs_diff(addr) < jump_range
    }
}

/// Allocator of trampoline blocks placed within jump range of their callers.
///
/// Pages never move once reserved, so whether a page is in range of a given
/// address never changes. Pages are released when the allocator is dropped.
///
/// The allocator is not synchronized; mutation requires `&mut self`.
pub struct TrampolineAllocator<M: Mmap = DefaultMmap> {
    config: TrampolineConfig,
    pages: Vec<TrampolinePage>,
    reservation: NearReservation<M>,
}

impl<M: Mmap> Debug for TrampolineAllocator<M> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("TrampolineAllocator")
            .field("config", &self.config)
            .field("pages", &self.pages.len())
            .finish()
    }
}

impl Default for TrampolineAllocator<DefaultMmap> {
    fn default() -> Self {
        Self::new()
    }
}

impl TrampolineAllocator<DefaultMmap> {
    /// Creates an allocator with the default configuration and OS backend.
    pub fn new() -> Self {
        Self {
            config: TrampolineConfig::default(),
            pages: Vec::new(),
            reservation: NearReservation::new(Direction::Backward),
        }
    }
}

impl<M: Mmap> TrampolineAllocator<M> {
    /// Creates an allocator with a custom layout and probing configuration.
    ///
    /// Page searches stop once they have walked `jump_range` away from the
    /// location, whatever `reservation.max_probes` allows.
    pub fn with_config(config: TrampolineConfig, reservation: ReservationConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            pages: Vec::new(),
            reservation: NearReservation::new(Direction::Backward).with_config(reservation)?,
        })
    }

    /// Gets the configuration of this allocator.
    #[inline]
    pub fn config(&self) -> &TrampolineConfig {
        &self.config
    }

    /// Allocates a block within jump range of `location`.
    pub fn allocate(&mut self, location: usize) -> Result<Trampoline> {
        let jump_range = self.config.jump_range;
        let candidate = self
            .pages
            .iter()
            .position(|page| {
                page.blocks.has_free() && page.is_inside_jump_range(location, jump_range)
            });
        let page_idx = match candidate {
            Some(idx) => idx,
            None => self.create_page(location)?,
        };
        let page = &mut self.pages[page_idx];
        let Ok((slot, _)) = page.blocks.allocate(()) else {
            unreachable!("selected trampoline page has no free block");
        };
        let addr = page.base() + slot as usize * self.config.block_size;
        Ok(Trampoline {
            // SAFETY: `addr` lies inside the page's non-null region.
            addr: unsafe { NonNull::new_unchecked(addr as *mut u8) },
            len: self.config.block_size,
            page: page_idx as u32,
            slot,
        })
    }

    /// Returns the block starting at `addr` to its page.
    ///
    /// The owning page is found by address range. Returns `false` if `addr`
    /// is not the start of an allocated block of this allocator.
    pub fn deallocate(&mut self, addr: usize) -> bool {
        let Some(page) = self
            .pages
            .iter_mut()
            .find(|page| page.is_inside_memory(addr))
        else {
            return false;
        };
        let offset = addr - page.base();
        if offset % self.config.block_size != 0 {
            return false;
        }
        page.blocks
            .deallocate((offset / self.config.block_size) as u32)
            .is_some()
    }

    /// Whether an existing page could serve a block for `location`.
    pub fn has_page_in_range(&self, location: usize) -> bool {
        self.pages
            .iter()
            .any(|page| page.is_inside_jump_range(location, self.config.jump_range))
    }

    /// Number of pages reserved so far.
    #[inline]
    pub fn page_count(&self) -> usize {
        self.pages.len()
    }

    /// Base address of page `page`.
    #[inline]
    pub fn page_base(&self, page: usize) -> Option<usize> {
        self.pages.get(page).map(TrampolinePage::base)
    }

    /// Number of allocated blocks across all pages.
    pub fn live(&self) -> usize {
        self.pages.iter().map(|page| page.blocks.live()).sum()
    }

    fn create_page(&mut self, location: usize) -> Result<usize> {
        self.pages
            .try_reserve(1)
            .map_err(|_| out_of_memory_error("failed to grow the trampoline page list"))?;
        let blocks = SlotPage::new(self.config.blocks_per_page())?;
        let region = self.reservation.reserve_within(
            self.config.page_size,
            location,
            self.config.jump_range,
        )?;
        // Dropping the region releases it again.
        if region.addr().abs_diff(location) >= self.config.jump_range {
            return Err(address_space_error(
                "trampoline page landed outside the jump range",
            ));
        }
        #[cfg(feature = "log")]
        log::trace!(
            "[Trampoline] new page at 0x{:x} for location 0x{:x}",
            region.addr(),
            location
        );
        self.pages.push(TrampolinePage { region, blocks });
        Ok(self.pages.len() - 1)
    }
}
