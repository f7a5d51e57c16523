//! Address-constrained reservation of OS memory
//!
//! Relative branches on x86_64 and friends encode a signed 32-bit displacement,
//! so code that is jumped to from an existing module has to live within
//! roughly 2 GiB of it. The general heap gives no such guarantee, hence patch
//! code and trampolines are placed through this module instead.
//!
//! OS calls that take an address hint either honor it or fail, they do not
//! search for a nearby free range. [`NearReservation`] performs that search
//! itself: it probes candidate bases at fixed steps moving away from the
//! hint until a mapping succeeds or the retry ceiling is reached.

use crate::{
    Result,
    binary::Binary,
    error::{address_space_error, invalid_argument},
    os::{DefaultMmap, Mmap, ProtFlags},
};
use core::{ffi::c_void, fmt::Debug, marker::PhantomData, ptr::NonNull};

/// Distance between two probes.
pub const PROBE_STEP: usize = 0x10000;

/// Default retry ceiling. `0x8000` probes of 64 KiB cover the whole 2 GiB
/// window reachable by a 32-bit displacement.
pub const DEFAULT_MAX_PROBES: usize = 0x8000;

/// The direction in which the probe moves away from the hint.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Direction {
    /// Probe `hint`, `hint + step`, `hint + 2 * step`, ...
    Forward,
    /// Probe `hint`, `hint - step`, `hint - 2 * step`, ...
    Backward,
}

/// Tuning for the probing search.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ReservationConfig {
    /// Distance between two probes. Must be a non-zero power of two.
    pub step: usize,
    /// Maximum number of probes before the search gives up.
    pub max_probes: usize,
}

impl Default for ReservationConfig {
    fn default() -> Self {
        Self {
            step: PROBE_STEP,
            max_probes: DEFAULT_MAX_PROBES,
        }
    }
}

/// A reserved, committed, read/write/execute memory region.
///
/// The region is returned to the OS when dropped. Use [`Region::into_raw`]
/// to take over the mapping and [`release`] to free it manually.
pub struct Region {
    memory: NonNull<c_void>,
    len: usize,
    munmap: unsafe fn(NonNull<c_void>, usize) -> Result<()>,
    mprotect: unsafe fn(NonNull<c_void>, usize, ProtFlags) -> Result<()>,
}

impl Debug for Region {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Region")
            .field("memory", &self.memory)
            .field("len", &self.len)
            .finish()
    }
}

// The region is plain memory; every access to it goes through unsafe methods.
unsafe impl Send for Region {}
unsafe impl Sync for Region {}

impl Drop for Region {
    fn drop(&mut self) {
        if let Err(_err) = unsafe { (self.munmap)(self.memory, self.len) } {
            #[cfg(feature = "log")]
            log::warn!("failed to release region {:p}: {}", self.memory, _err);
        }
    }
}

impl Region {
    /// Gets the base address of the region.
    #[inline]
    pub fn addr(&self) -> usize {
        self.memory.as_ptr() as usize
    }

    /// Gets a raw pointer to the start of the region.
    #[inline]
    pub fn as_ptr(&self) -> *mut u8 {
        self.memory.as_ptr().cast()
    }

    /// Gets the length of the region in bytes.
    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether the region is empty. Reservations never are.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Whether `addr` lies inside `[base, base + len)`.
    #[inline]
    pub fn contains(&self, addr: usize) -> bool {
        let base = self.addr();
        addr >= base && addr - base < self.len
    }

    /// Gets the whole region as a mutable byte slice.
    ///
    /// # Safety
    /// The region may hold code that is executing or being read concurrently;
    /// the caller must guarantee exclusive access for the slice's lifetime.
    #[inline]
    pub unsafe fn as_mut_slice(&self) -> &mut [u8] {
        unsafe { core::slice::from_raw_parts_mut(self.as_ptr(), self.len) }
    }

    /// Changes the protection of the whole region.
    ///
    /// # Safety
    /// See [`Mmap::mprotect`].
    pub unsafe fn protect(&self, prot: ProtFlags) -> Result<()> {
        unsafe { (self.mprotect)(self.memory, self.len, prot) }
    }

    /// Gives up ownership of the mapping without releasing it.
    #[inline]
    pub fn into_raw(self) -> (NonNull<u8>, usize) {
        let raw = (self.memory.cast(), self.len);
        core::mem::forget(self);
        raw
    }
}

/// Probing reservation state.
///
/// Instead of remembering the search origin in hidden global state, the
/// origin of [`NearReservation::reserve_next`] is the base of the last
/// successful reservation made through this instance (or its seed).
pub struct NearReservation<M: Mmap = DefaultMmap> {
    direction: Direction,
    config: ReservationConfig,
    last_base: Option<usize>,
    _marker: PhantomData<M>,
}

impl<M: Mmap> Debug for NearReservation<M> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("NearReservation")
            .field("direction", &self.direction)
            .field("config", &self.config)
            .field("last_base", &self.last_base)
            .finish()
    }
}

impl<M: Mmap> NearReservation<M> {
    /// Creates a search moving in `direction` with the default configuration.
    pub const fn new(direction: Direction) -> Self {
        Self {
            direction,
            config: ReservationConfig {
                step: PROBE_STEP,
                max_probes: DEFAULT_MAX_PROBES,
            },
            last_base: None,
            _marker: PhantomData,
        }
    }

    /// Creates a search whose [`reserve_next`](Self::reserve_next) starts at `base`.
    pub const fn seeded(direction: Direction, base: usize) -> Self {
        let mut this = Self::new(direction);
        this.last_base = Some(base);
        this
    }

    /// Creates a backward search seeded with the main module's base address.
    ///
    /// Patch code calls back into the main module, and keeping new pages
    /// below it keeps later reservations in range as well.
    pub fn near_main_module() -> Result<Self> {
        Ok(Self::seeded(Direction::Backward, M::main_module_base()?))
    }

    /// Replaces the probing configuration.
    pub fn with_config(mut self, config: ReservationConfig) -> Result<Self> {
        if config.step == 0 || !config.step.is_power_of_two() {
            return Err(invalid_argument("probe step must be a non-zero power of two"));
        }
        self.config = config;
        Ok(self)
    }

    /// The direction of this search.
    #[inline]
    pub fn direction(&self) -> Direction {
        self.direction
    }

    /// The probing configuration of this search.
    #[inline]
    pub fn config(&self) -> &ReservationConfig {
        &self.config
    }

    /// Base address of the last successful reservation, or the seed.
    #[inline]
    pub fn last_base(&self) -> Option<usize> {
        self.last_base
    }

    /// Reserves `size` bytes at the nearest free location at or beyond `hint`
    /// in this search's direction.
    pub fn reserve(&mut self, size: usize, hint: usize) -> Result<Region> {
        let region = probe::<M>(size, hint, self.direction, &self.config)?;
        self.last_base = Some(region.addr());
        Ok(region)
    }

    /// Like [`reserve`](Self::reserve), but gives up once the probes have
    /// walked `max_distance` bytes away from `hint`.
    ///
    /// The returned region may still start up to one step beyond
    /// `max_distance`; callers check the exact bound.
    pub fn reserve_within(
        &mut self,
        size: usize,
        hint: usize,
        max_distance: usize,
    ) -> Result<Region> {
        let step = self.config.step.max(M::granularity());
        let config = ReservationConfig {
            step: self.config.step,
            max_probes: self
                .config
                .max_probes
                .min(max_distance.div_ceil(step).max(1)),
        };
        let region = probe::<M>(size, hint, self.direction, &config)?;
        self.last_base = Some(region.addr());
        Ok(region)
    }

    /// Reserves `size` bytes continuing from [`last_base`](Self::last_base).
    pub fn reserve_next(&mut self, size: usize) -> Result<Region> {
        let Some(hint) = self.last_base else {
            return Err(invalid_argument("reservation search has no origin"));
        };
        self.reserve(size, hint)
    }
}

fn probe<M: Mmap>(
    size: usize,
    hint: usize,
    direction: Direction,
    config: &ReservationConfig,
) -> Result<Region> {
    if size == 0 {
        return Err(invalid_argument("cannot reserve zero bytes"));
    }
    let step = config.step.max(M::granularity());
    let mask = step - 1;
    let start = match direction {
        Direction::Forward => hint.checked_add(mask).map(|addr| addr & !mask),
        Direction::Backward => Some(hint & !mask),
    };
    let Some(start) = start else {
        return Err(address_space_error("reservation hint is at the end of the address space"));
    };

    for i in 0..config.max_probes {
        let candidate = match direction {
            Direction::Forward => i.checked_mul(step).and_then(|off| start.checked_add(off)),
            Direction::Backward => i.checked_mul(step).and_then(|off| start.checked_sub(off)),
        };
        let Some(addr) = candidate.filter(|addr| *addr != 0) else {
            break;
        };
        if addr.checked_add(size).is_none() {
            break;
        }
        match unsafe { M::mmap_at(addr, size, ProtFlags::RWX) } {
            Ok(memory) => {
                #[cfg(feature = "log")]
                log::trace!(
                    "[Reserve] address: 0x{:x}, length: {}, hint: 0x{:x}, probes: {}",
                    addr,
                    size,
                    hint,
                    i + 1
                );
                return Ok(Region {
                    memory,
                    len: size,
                    munmap: M::munmap,
                    mprotect: M::mprotect,
                });
            }
            Err(_) => continue,
        }
    }
    Err(address_space_error("no free address range near the requested location"))
}

/// Reserves `size` bytes at the nearest free location at or after `hint`.
pub fn reserve_forward(size: usize, hint: usize) -> Result<Region> {
    NearReservation::<DefaultMmap>::new(Direction::Forward).reserve(size, hint)
}

/// Reserves `size` bytes at the nearest free location at or before `hint`.
pub fn reserve_backward(size: usize, hint: usize) -> Result<Region> {
    NearReservation::<DefaultMmap>::new(Direction::Backward).reserve(size, hint)
}

/// Reserves `size` bytes just below the process's main module.
pub fn reserve_near_main_module(size: usize) -> Result<Region> {
    NearReservation::<DefaultMmap>::near_main_module()?.reserve_next(size)
}

/// Reserves `size` bytes just below the base address of `binary`.
pub fn reserve_near_binary(size: usize, binary: &dyn Binary) -> Result<Region> {
    reserve_backward(size, binary.base_address())
}

/// Returns a region obtained through [`Region::into_raw`] to the OS.
///
/// # Safety
/// `addr` and `size` must be exactly the pair returned by `into_raw`, and the
/// memory must not be used afterwards.
pub unsafe fn release<M: Mmap>(addr: NonNull<u8>, size: usize) -> Result<()> {
    unsafe { M::munmap(addr.cast(), size) }
}
