//! # hotpatch_core
//! Memory placement and symbol indexing for runtime binary patching.
//! ## Usage
//! A patching pipeline loads object modules into a running process and redirects
//! existing functions to the new code. On x86_64 the redirecting jumps encode a
//! 32-bit displacement, so every page the pipeline creates must stay within about
//! 2 GiB of the code that jumps into it. This crate provides the pieces for that:
//! - [`reserve`]: reserve executable memory near an address by probing the address space.
//! - [`SectionAllocator`]: lay out one section's contents inside a reserved window.
//! - [`TrampolineAllocator`]: hand out stub blocks that are reachable from a call site.
//! - [`BlockAllocator`]: a paged pool for fixed-size records such as [`Symbol`]s.
//! - [`SymbolTable`]: a sorted, mergeable name/address index with lazy section linking.
//! ## Example
//! ```no_run
//! use hotpatch_core::{SymbolFlags, SymbolPool, SymbolTable, TrampolineAllocator};
//!
//! fn patched() {}
//!
//! let mut trampolines = TrampolineAllocator::new();
//! let target = patched as fn() as usize;
//! let stub = trampolines.allocate(target).unwrap();
//! assert!(stub.addr().abs_diff(target) < 0x7fff_0000);
//!
//! let mut pool = SymbolPool::new();
//! let foo = pool.allocate(hotpatch_core::Symbol::new("foo", 0x1000, SymbolFlags::CODE, 0, None)).unwrap();
//! let mut table = SymbolTable::new();
//! table.add_symbol(pool.get(foo).unwrap());
//! table.sort();
//! assert_eq!(table.find_symbol_by_name("foo").unwrap().address(), 0x1000);
//! ```
#![no_std]
extern crate alloc;

pub mod binary;
pub mod block;
pub mod config;
mod error;
pub mod logging;
pub mod os;
pub mod reserve;
pub mod section;
pub mod symbol;
pub mod time;
pub mod trampoline;

pub use binary::{Binary, BinaryRef};
pub use block::{BlockAllocator, BlockHandle};
pub use config::Config;
pub use error::{Error, custom_error};
pub use reserve::{Direction, NearReservation, Region};
pub use section::SectionAllocator;
pub use symbol::{Symbol, SymbolFlags, SymbolInfo, SymbolPool, SymbolTable};
pub use trampoline::{Trampoline, TrampolineAllocator, TrampolineConfig};

/// Size of an OS memory page on the supported targets.
pub const PAGE_SIZE: usize = 0x1000;

pub type Result<T> = core::result::Result<T, Error>;
