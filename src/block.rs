//! Paged free-list pool for fixed-size records
//!
//! Pages are carved into `PAGE_SIZE / size_of::<T>()` blocks. Every block is
//! either occupied by a value or free, in which case it links to the next free
//! block of its page. Blocks are addressed by [`BlockHandle`]. A handle carries
//! the generation of its block and the identity of its pool, so a stale handle
//! (its block was freed, and possibly reused since) or a handle from another
//! pool is rejected instead of touching a live block.

use crate::{Result, error::out_of_memory_error};
use alloc::{boxed::Box, vec::Vec};
use core::{
    fmt::Debug,
    mem::size_of,
    sync::atomic::{AtomicU32, Ordering},
};

/// Default page size of a [`BlockAllocator`].
pub const DEFAULT_PAGE_SIZE: usize = 0x1000;

/// Pool identities. `0` marks a pool that has not handed out a block yet.
static NEXT_POOL_ID: AtomicU32 = AtomicU32::new(1);

/// Location of one block inside a [`BlockAllocator`].
///
/// Handles are only valid for the pool that issued them, and only until the
/// block is freed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BlockHandle {
    pool: u32,
    page: u32,
    slot: u32,
    generation: u32,
}

impl BlockHandle {
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

    /// How many times the block had been freed when this handle was issued.
    #[inline]
    pub fn generation(&self) -> u32 {
        self.generation
    }
}

enum SlotState<T> {
    Free { next: Option<u32> },
    Occupied(T),
}

struct Slot<T> {
    generation: u32,
    state: SlotState<T>,
}

/// One page of slots threaded by a LIFO free list.
///
/// Shared by the heap pool and the trampoline allocator, which keeps its
/// blocks in OS memory and only tracks their state here (`T = ()`).
pub(crate) struct SlotPage<T> {
    slots: Box<[Slot<T>]>,
    free_head: Option<u32>,
    live: usize,
}

impl<T> SlotPage<T> {
    /// Creates a page of `blocks` free slots. Heap exhaustion is an error.
    pub(crate) fn new(blocks: usize) -> Result<Self> {
        let mut slots = Vec::new();
        slots
            .try_reserve_exact(blocks)
            .map_err(|_| out_of_memory_error("failed to allocate a block page"))?;
        slots.extend((0..blocks).map(|i| Slot {
            generation: 0,
            state: SlotState::Free {
                next: (i + 1 < blocks).then(|| i as u32 + 1),
            },
        }));
        Ok(Self {
            slots: slots.into_boxed_slice(),
            free_head: (blocks > 0).then_some(0),
            live: 0,
        })
    }

    /// Stores `value` in the most recently freed slot and returns its index
    /// and generation. Gives the value back when the page is full.
    pub(crate) fn allocate(&mut self, value: T) -> core::result::Result<(u32, u32), T> {
        let Some(idx) = self.free_head else {
            return Err(value);
        };
        let slot = &mut self.slots[idx as usize];
        let SlotState::Free { next } = slot.state else {
            unreachable!("free list points at an occupied block");
        };
        self.free_head = next;
        slot.state = SlotState::Occupied(value);
        self.live += 1;
        Ok((idx, slot.generation))
    }

    /// Frees slot `idx` and returns its value. Returns `None` if the slot does
    /// not exist or is already free.
    pub(crate) fn deallocate(&mut self, idx: u32) -> Option<T> {
        let slot = self.slots.get_mut(idx as usize)?;
        if let SlotState::Free { .. } = slot.state {
            return None;
        }
        let SlotState::Occupied(value) = core::mem::replace(
            &mut slot.state,
            SlotState::Free {
                next: self.free_head,
            },
        ) else {
            unreachable!()
        };
        slot.generation = slot.generation.wrapping_add(1);
        self.free_head = Some(idx);
        self.live -= 1;
        Some(value)
    }

    /// Gets the value in slot `idx` if it is occupied by generation `generation`.
    pub(crate) fn get(&self, idx: u32, generation: u32) -> Option<&T> {
        match self.slots.get(idx as usize)? {
            Slot {
                generation: current,
                state: SlotState::Occupied(value),
            } if *current == generation => Some(value),
            _ => None,
        }
    }

    pub(crate) fn get_mut(&mut self, idx: u32, generation: u32) -> Option<&mut T> {
        match self.slots.get_mut(idx as usize)? {
            Slot {
                generation: current,
                state: SlotState::Occupied(value),
            } if *current == generation => Some(value),
            _ => None,
        }
    }

    /// Generation of slot `idx` if it is occupied.
    pub(crate) fn generation(&self, idx: u32) -> Option<u32> {
        match self.slots.get(idx as usize)? {
            Slot {
                generation,
                state: SlotState::Occupied(_),
            } => Some(*generation),
            Slot { .. } => None,
        }
    }

    /// Finds the occupied slot whose value lives exactly at `ptr`.
    fn slot_of(&self, ptr: *const T) -> Option<u32> {
        let base = self.slots.as_ptr() as usize;
        let addr = ptr as usize;
        if addr < base || addr - base >= self.slots.len() * size_of::<Slot<T>>() {
            return None;
        }
        let idx = ((addr - base) / size_of::<Slot<T>>().max(1)) as u32;
        match &self.slots[idx as usize].state {
            SlotState::Occupied(value) if core::ptr::eq(value, ptr) => Some(idx),
            _ => None,
        }
    }

    fn iter(&self) -> impl Iterator<Item = (u32, u32, &T)> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(idx, slot)| match &slot.state {
                SlotState::Occupied(value) => Some((idx as u32, slot.generation, value)),
                SlotState::Free { .. } => None,
            })
    }

    #[inline]
    pub(crate) fn has_free(&self) -> bool {
        self.free_head.is_some()
    }

    /// Number of occupied slots.
    #[inline]
    pub(crate) fn live(&self) -> usize {
        self.live
    }
}

/// A growable pool of fixed-size blocks backed by the general heap.
///
/// `allocate` serves the first page (in creation order) that has a free block
/// and adds a page when none has. Pages are only returned to the heap when the
/// allocator itself is dropped, so references handed out by [`get`](Self::get)
/// never move while the allocator is borrowed.
///
/// `PAGE_SIZE` only determines how many blocks a page holds. Each block also
/// carries its free-list link and generation, so a page occupies somewhat more
/// than `PAGE_SIZE` bytes of heap.
///
/// Generations are 32-bit and wrap, so a handle kept across 2^32 reuses of
/// the same block is no longer detected as stale.
///
/// The pool is not synchronized; mutation requires `&mut self`.
pub struct BlockAllocator<T, const PAGE_SIZE: usize = DEFAULT_PAGE_SIZE> {
    id: u32,
    pages: Vec<SlotPage<T>>,
    live: usize,
}

impl<T, const PAGE_SIZE: usize> Debug for BlockAllocator<T, PAGE_SIZE> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("BlockAllocator")
            .field("page_size", &PAGE_SIZE)
            .field("blocks_per_page", &Self::BLOCKS_PER_PAGE)
            .field("pages", &self.pages.len())
            .field("live", &self.live)
            .finish()
    }
}

impl<T, const PAGE_SIZE: usize> Default for BlockAllocator<T, PAGE_SIZE> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T, const PAGE_SIZE: usize> BlockAllocator<T, PAGE_SIZE> {
    /// Number of blocks carved out of one page.
    pub const BLOCKS_PER_PAGE: usize = {
        let block = if size_of::<T>() == 0 { 1 } else { size_of::<T>() };
        let blocks = PAGE_SIZE / block;
        assert!(blocks > 0, "a page must hold at least one block");
        assert!(blocks <= u32::MAX as usize, "too many blocks per page");
        blocks
    };

    /// Creates an empty pool. No page is allocated until the first block is.
    pub const fn new() -> Self {
        Self {
            id: 0,
            pages: Vec::new(),
            live: 0,
        }
    }

    /// Stores `value` in a free block and returns its handle.
    pub fn allocate(&mut self, value: T) -> Result<BlockHandle> {
        if self.id == 0 {
            // Wrapping back to 0 would make the pool reject its own handles.
            self.id = NEXT_POOL_ID.fetch_add(1, Ordering::Relaxed).max(1);
        }
        let mut value = value;
        for (page_idx, page) in self.pages.iter_mut().enumerate() {
            if !page.has_free() {
                continue;
            }
            match page.allocate(value) {
                Ok((slot, generation)) => {
                    self.live += 1;
                    return Ok(BlockHandle {
                        pool: self.id,
                        page: page_idx as u32,
                        slot,
                        generation,
                    });
                }
                Err(back) => value = back,
            }
        }

        self.pages
            .try_reserve(1)
            .map_err(|_| out_of_memory_error("failed to grow the page list"))?;
        let mut page = SlotPage::new(Self::BLOCKS_PER_PAGE)?;
        let (slot, generation) = match page.allocate(value) {
            Ok(placed) => placed,
            Err(_) => unreachable!("a fresh page has a free block"),
        };
        let page_idx = self.pages.len() as u32;
        self.pages.push(page);
        self.live += 1;
        #[cfg(feature = "log")]
        log::trace!(
            "[BlockAllocator] new page {}, blocks: {}",
            page_idx,
            Self::BLOCKS_PER_PAGE
        );
        Ok(BlockHandle {
            pool: self.id,
            page: page_idx,
            slot,
            generation,
        })
    }

    /// Frees the block behind `handle` and returns its value.
    ///
    /// Returns `None` when the handle was issued by another pool, its block
    /// has been freed since, or it names no block at all.
    pub fn deallocate(&mut self, handle: BlockHandle) -> Option<T> {
        let page = self.page_of(handle)?;
        if page.generation(handle.slot)? != handle.generation {
            return None;
        }
        let value = page.deallocate(handle.slot)?;
        self.live -= 1;
        Some(value)
    }

    /// Frees the block holding the value at `ptr`.
    ///
    /// The owning page is found by address range, so any pointer obtained from
    /// [`get`](Self::get) works. Foreign pointers yield `None`.
    pub fn deallocate_ptr(&mut self, ptr: *const T) -> Option<T> {
        let handle = self.handle_of(ptr)?;
        self.deallocate(handle)
    }

    /// Finds the handle of the occupied block whose value lives at `ptr`.
    pub fn handle_of(&self, ptr: *const T) -> Option<BlockHandle> {
        self.pages
            .iter()
            .enumerate()
            .find_map(|(page_idx, page)| {
                let slot = page.slot_of(ptr)?;
                Some(BlockHandle {
                    pool: self.id,
                    page: page_idx as u32,
                    slot,
                    generation: page.generation(slot)?,
                })
            })
    }

    /// Gets a reference to the value behind `handle`.
    #[inline]
    pub fn get(&self, handle: BlockHandle) -> Option<&T> {
        if handle.pool != self.id {
            return None;
        }
        self.pages
            .get(handle.page())?
            .get(handle.slot, handle.generation)
    }

    /// Gets a mutable reference to the value behind `handle`.
    #[inline]
    pub fn get_mut(&mut self, handle: BlockHandle) -> Option<&mut T> {
        self.page_of(handle)?
            .get_mut(handle.slot, handle.generation)
    }

    /// Iterates over all occupied blocks, page by page.
    pub fn iter(&self) -> impl Iterator<Item = (BlockHandle, &T)> {
        let pool = self.id;
        self.pages
            .iter()
            .enumerate()
            .flat_map(move |(page_idx, page)| {
                page.iter().map(move |(slot, generation, value)| {
                    (
                        BlockHandle {
                            pool,
                            page: page_idx as u32,
                            slot,
                            generation,
                        },
                        value,
                    )
                })
            })
    }

    /// Number of occupied blocks.
    #[inline]
    pub fn len(&self) -> usize {
        self.live
    }

    /// Whether no block is occupied.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.live == 0
    }

    /// Number of pages allocated so far.
    #[inline]
    pub fn page_count(&self) -> usize {
        self.pages.len()
    }

    /// Number of occupied blocks in page `page`.
    #[inline]
    pub fn page_live(&self, page: usize) -> Option<usize> {
        self.pages.get(page).map(SlotPage::live)
    }

    /// Total number of blocks across all pages.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.pages.len() * Self::BLOCKS_PER_PAGE
    }

    fn page_of(&mut self, handle: BlockHandle) -> Option<&mut SlotPage<T>> {
        if handle.pool != self.id {
            return None;
        }
        self.pages.get_mut(handle.page())
    }
}
