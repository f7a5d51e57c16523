use super::Symbol;
use alloc::vec::Vec;

/// A sorted, mergeable index of symbols.
///
/// The table never owns the symbols it lists. Entries are appended in any
/// order and [`sort`](Self::sort) restores the lookup invariant: strictly
/// ascending names, one entry per name. Name lookups binary search and are
/// only meaningful on a sorted table; address lookups scan linearly.
///
/// With partial linking enabled, every successful lookup first asks the
/// symbol's module to link the symbol's section.
#[derive(Clone, Debug, Default)]
pub struct SymbolTable<'a> {
    symbols: Vec<&'a Symbol<'a>>,
    partial_link: bool,
}

impl<'a> SymbolTable<'a> {
    /// Creates an empty table with partial linking disabled.
    pub const fn new() -> Self {
        Self {
            symbols: Vec::new(),
            partial_link: false,
        }
    }

    /// Appends `symbol` without restoring the order.
    #[inline]
    pub fn add_symbol(&mut self, symbol: &'a Symbol<'a>) {
        self.symbols.push(symbol);
    }

    /// Appends every entry of `other`, then sorts.
    pub fn merge(&mut self, other: &SymbolTable<'a>) {
        self.symbols.extend_from_slice(&other.symbols);
        self.sort();
    }

    /// Sorts by name and drops entries whose name is already present.
    ///
    /// The sort is stable, so of several entries with the same name the one
    /// added first is kept.
    pub fn sort(&mut self) {
        self.symbols.sort_by(|a, b| a.name().cmp(b.name()));
        self.symbols.dedup_by(|a, b| a.name() == b.name());
    }

    /// Removes every entry. The symbols themselves are untouched.
    #[inline]
    pub fn clear(&mut self) {
        self.symbols.clear();
    }

    /// Enables or disables linking on lookup.
    #[inline]
    pub fn enable_partial_link(&mut self, enable: bool) {
        self.partial_link = enable;
    }

    /// Whether lookups trigger partial linking.
    #[inline]
    pub fn is_partial_link_enabled(&self) -> bool {
        self.partial_link
    }

    /// Number of entries.
    #[inline]
    pub fn num_symbols(&self) -> usize {
        self.symbols.len()
    }

    /// Whether the table has no entries.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.symbols.is_empty()
    }

    /// Gets the `i`-th entry in table order.
    #[inline]
    pub fn get_symbol(&self, i: usize) -> Option<&'a Symbol<'a>> {
        self.symbols.get(i).copied()
    }

    /// Iterates over the entries in table order.
    #[inline]
    pub fn iter(&self) -> impl Iterator<Item = &'a Symbol<'a>> + '_ {
        self.symbols.iter().copied()
    }

    /// Finds the symbol called `name`.
    pub fn find_symbol_by_name(&self, name: &str) -> Option<&'a Symbol<'a>> {
        let idx = self
            .symbols
            .binary_search_by(|sym| sym.name().cmp(name))
            .ok()?;
        Some(self.found(self.symbols[idx]))
    }

    /// Finds the first symbol located at `address`.
    ///
    /// There is no address-ordered index; this scans the whole table.
    pub fn find_symbol_by_address(&self, address: usize) -> Option<&'a Symbol<'a>> {
        let sym = self
            .symbols
            .iter()
            .copied()
            .find(|sym| sym.address() == address)?;
        Some(self.found(sym))
    }

    #[inline]
    fn found(&self, sym: &'a Symbol<'a>) -> &'a Symbol<'a> {
        if self.partial_link {
            sym.partial_link();
        }
        sym
    }
}

impl<'a> Extend<&'a Symbol<'a>> for SymbolTable<'a> {
    fn extend<I: IntoIterator<Item = &'a Symbol<'a>>>(&mut self, iter: I) {
        self.symbols.extend(iter);
    }
}

impl<'a> FromIterator<&'a Symbol<'a>> for SymbolTable<'a> {
    fn from_iter<I: IntoIterator<Item = &'a Symbol<'a>>>(iter: I) -> Self {
        Self {
            symbols: iter.into_iter().collect(),
            partial_link: false,
        }
    }
}
