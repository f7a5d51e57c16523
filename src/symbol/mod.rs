//! Symbol records and the sorted symbol index
//!
//! A [`Symbol`] describes one named address inside a loaded module. Its name
//! either borrows the module's string table or is owned by the symbol;
//! [`SymbolFlags::NAME_OWNED`] always tells which. Records are typically
//! stored in a [`SymbolPool`] and indexed by one or more [`SymbolTable`]s.

mod table;

pub use table::SymbolTable;

use crate::{binary::BinaryRef, block::BlockAllocator};
use alloc::borrow::Cow;
use bitflags::bitflags;
use core::fmt::Debug;

/// Page size of a [`SymbolPool`].
pub const SYMBOL_POOL_PAGE_SIZE: usize = 1024 * 256;

/// Pool allocator sized for symbol records.
///
/// A [`SymbolTable`] holds shared references into the pool, so the pool
/// cannot allocate or free symbols while any table built from it is alive.
/// Fill the pool first, then build the tables; drop the tables before
/// touching the pool again.
pub type SymbolPool<'a> = BlockAllocator<Symbol<'a>, SYMBOL_POOL_PAGE_SIZE>;

bitflags! {
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
    /// Attributes of a symbol and of the section that contains it.
    pub struct SymbolFlags: u32 {
        /// The section holds executable code.
        const CODE = 0x1;
        /// The section holds initialized data.
        const IDATA = 0x2;
        /// The section holds uninitialized data.
        const UDATA = 0x4;
        /// The section is readable.
        const READ = 0x8;
        /// The section is writable.
        const WRITE = 0x10;
        /// The section is executable.
        const EXECUTE = 0x20;
        /// The section is shared between processes.
        const SHARED = 0x40;
        /// The symbol is exported by its module.
        const EXPORT = 0x80;
        /// The symbol is a load/unload handler.
        const HANDLER = 0x100;
        /// The symbol replaces (hooks) a function of the host.
        const HOOK = 0x200;
        /// The symbol owns its name.
        const NAME_OWNED = 0x10000;
        /// The owning section has relocations that are applied lazily.
        const NEEDS_PARTIAL_LINK = 0x20000;
    }
}

/// Name and address of a symbol, without ownership or linkage details.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SymbolInfo<'sym> {
    /// The symbol name.
    pub name: &'sym str,
    /// The symbol address.
    pub address: usize,
}

/// A named address inside a loaded module.
pub struct Symbol<'a> {
    name: Cow<'a, str>,
    address: usize,
    flags: SymbolFlags,
    section: usize,
    binary: Option<BinaryRef>,
}

impl<'a> Symbol<'a> {
    /// Creates a symbol.
    ///
    /// A borrowed name must outlive the symbol; an owned one is freed with
    /// it. [`SymbolFlags::NAME_OWNED`] is set or cleared to match `name`
    /// regardless of what `flags` says.
    pub fn new(
        name: impl Into<Cow<'a, str>>,
        address: usize,
        flags: SymbolFlags,
        section: usize,
        binary: Option<BinaryRef>,
    ) -> Self {
        let name = name.into();
        let flags = flags.difference(SymbolFlags::NAME_OWNED)
            | match name {
                Cow::Owned(_) => SymbolFlags::NAME_OWNED,
                Cow::Borrowed(_) => SymbolFlags::empty(),
            };
        Self {
            name,
            address,
            flags,
            section,
            binary,
        }
    }

    /// Gets the symbol name.
    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Gets the symbol address.
    #[inline]
    pub fn address(&self) -> usize {
        self.address
    }

    /// Gets the symbol flags.
    #[inline]
    pub fn flags(&self) -> SymbolFlags {
        self.flags
    }

    /// Gets the index of the section that defines the symbol.
    #[inline]
    pub fn section(&self) -> usize {
        self.section
    }

    /// Gets the reference to the module that defines the symbol.
    #[inline]
    pub fn binary(&self) -> Option<&BinaryRef> {
        self.binary.as_ref()
    }

    /// Whether the symbol owns its name.
    #[inline]
    pub fn is_name_owned(&self) -> bool {
        self.flags.contains(SymbolFlags::NAME_OWNED)
    }

    /// Returns the plain name/address view of this symbol.
    #[inline]
    pub fn simplify(&self) -> SymbolInfo<'_> {
        SymbolInfo {
            name: &self.name,
            address: self.address,
        }
    }

    /// Runs the owning module's deferred linking for this symbol's section.
    ///
    /// Returns `false` if the symbol has no module, the module is gone, or
    /// linking failed.
    pub fn partial_link(&self) -> bool {
        let Some(binary) = self.binary.as_ref().and_then(BinaryRef::upgrade) else {
            return false;
        };
        let linked = binary.partial_link(self.section);
        if !linked {
            #[cfg(feature = "log")]
            log::debug!(
                "partial link of section {} failed for symbol {}",
                self.section,
                self.name
            );
        }
        linked
    }
}

impl Debug for Symbol<'_> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Symbol")
            .field("name", &self.name)
            .field("address", &format_args!("0x{:x}", self.address))
            .field("flags", &self.flags)
            .field("section", &self.section)
            .finish()
    }
}
