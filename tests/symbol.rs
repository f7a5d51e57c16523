mod common;

use common::RecordingBinary;
use hotpatch_core::{
    Binary, BinaryRef, Symbol, SymbolFlags, SymbolInfo, SymbolPool, SymbolTable,
};
use rstest::rstest;
use std::sync::Arc;

fn code(name: &str, address: usize) -> Symbol<'_> {
    Symbol::new(name, address, SymbolFlags::CODE | SymbolFlags::READ, 0, None)
}

fn names<'a>(table: &SymbolTable<'a>) -> Vec<&'a str> {
    table.iter().map(|sym| sym.name()).collect()
}

#[rstest]
fn duplicate_names_keep_the_first_entry() {
    let mut pool = SymbolPool::new();
    let first = pool.allocate(code("foo", 0x1000)).unwrap();
    let other = pool.allocate(code("bar", 0x2000)).unwrap();
    let second = pool.allocate(code("foo", 0x3000)).unwrap();

    let mut table = SymbolTable::new();
    for handle in [first, other, second] {
        table.add_symbol(pool.get(handle).unwrap());
    }
    assert_eq!(table.num_symbols(), 3);
    table.sort();

    assert_eq!(table.num_symbols(), 2);
    assert_eq!(names(&table), ["bar", "foo"]);
    assert_eq!(table.find_symbol_by_name("foo").unwrap().address(), 0x1000);
    assert_eq!(table.find_symbol_by_name("bar").unwrap().address(), 0x2000);
    assert!(table.find_symbol_by_name("baz").is_none());
}

#[rstest]
fn pool_grows_again_once_tables_are_dropped() {
    let mut pool = SymbolPool::new();
    let foo = pool.allocate(code("foo", 0x1000)).unwrap();
    {
        let mut table = SymbolTable::new();
        table.add_symbol(pool.get(foo).unwrap());
        table.sort();
        assert_eq!(table.num_symbols(), 1);
    }

    let bar = pool.allocate(code("bar", 0x2000)).unwrap();
    let mut table: SymbolTable = [foo, bar].iter().map(|h| pool.get(*h).unwrap()).collect();
    table.sort();
    assert_eq!(names(&table), ["bar", "foo"]);

    drop(table);
    assert!(pool.deallocate(foo).is_some());
    assert_eq!(pool.len(), 1);
}

#[rstest]
fn sorted_table_is_strictly_ascending() {
    let symbols: Vec<_> = ["delta", "alpha", "charlie", "alpha", "bravo", "delta"]
        .into_iter()
        .enumerate()
        .map(|(i, name)| code(name, i))
        .collect();
    let mut table: SymbolTable = symbols.iter().collect();
    table.sort();

    assert_eq!(names(&table), ["alpha", "bravo", "charlie", "delta"]);
    assert!(table.iter().zip(table.iter().skip(1)).all(|(a, b)| a.name() < b.name()));
    for name in ["alpha", "bravo", "charlie", "delta"] {
        assert_eq!(table.find_symbol_by_name(name).unwrap().name(), name);
    }
}

#[rstest]
fn merge_is_commutative_and_idempotent() {
    let left_symbols = [code("a", 1), code("c", 3), code("e", 5)];
    let right_symbols = [code("b", 2), code("c", 30), code("d", 4)];
    let mut left: SymbolTable = left_symbols.iter().collect();
    let mut right: SymbolTable = right_symbols.iter().collect();
    left.sort();
    right.sort();

    let mut lr = left.clone();
    lr.merge(&right);
    let mut rl = right.clone();
    rl.merge(&left);
    assert_eq!(names(&lr), names(&rl));
    assert_eq!(names(&lr), ["a", "b", "c", "d", "e"]);
    // The receiver's entry wins a name collision.
    assert_eq!(lr.find_symbol_by_name("c").unwrap().address(), 3);
    assert_eq!(rl.find_symbol_by_name("c").unwrap().address(), 30);

    let snapshot = lr.clone();
    lr.merge(&snapshot);
    assert_eq!(names(&lr), names(&snapshot));
    assert_eq!(lr.num_symbols(), 5);
}

#[rstest]
fn clear_empties_the_table() {
    let symbols = [code("foo", 1)];
    let mut table: SymbolTable = symbols.iter().collect();
    table.sort();
    assert!(table.find_symbol_by_name("foo").is_some());

    table.clear();
    assert!(table.is_empty());
    assert!(table.find_symbol_by_name("foo").is_none());
    assert!(table.find_symbol_by_address(1).is_none());
    // The symbols themselves are untouched.
    assert_eq!(symbols[0].name(), "foo");
}

#[rstest]
#[case(0x10, Some("a"))]
#[case(0x20, Some("b"))]
#[case(0x30, None)]
fn address_lookup_returns_first_match(#[case] address: usize, #[case] expected: Option<&str>) {
    let symbols = [code("a", 0x10), code("b", 0x20), code("c", 0x10)];
    let mut table: SymbolTable = symbols.iter().collect();
    table.sort();
    assert_eq!(
        table.find_symbol_by_address(address).map(Symbol::name),
        expected
    );
}

#[rstest]
fn lookups_link_lazily_when_enabled() {
    let recorder = Arc::new(RecordingBinary::new(0x40_0000));
    let binary: Arc<dyn Binary> = recorder.clone();
    let symbols = [
        Symbol::new(
            "patched",
            0x40_1000,
            SymbolFlags::CODE | SymbolFlags::NEEDS_PARTIAL_LINK,
            3,
            Some(BinaryRef::new(&binary)),
        ),
        Symbol::new("plain", 0x50_0000, SymbolFlags::IDATA, 1, None),
    ];
    let mut table: SymbolTable = symbols.iter().collect();
    table.sort();

    assert!(!table.is_partial_link_enabled());
    table.find_symbol_by_name("patched").unwrap();
    assert!(recorder.linked().is_empty());

    table.enable_partial_link(true);
    table.find_symbol_by_name("patched").unwrap();
    table.find_symbol_by_address(0x40_1000).unwrap();
    table.find_symbol_by_name("plain").unwrap();
    assert!(table.find_symbol_by_name("missing").is_none());
    assert_eq!(recorder.linked(), [3, 3]);

    table.enable_partial_link(false);
    table.find_symbol_by_name("patched").unwrap();
    assert_eq!(recorder.linked().len(), 2);
}

#[rstest]
fn unloaded_binary_does_not_link() {
    let binary: Arc<dyn Binary> = Arc::new(RecordingBinary::new(0));
    let reference = BinaryRef::from(&binary);
    let symbol = Symbol::new("gone", 0x10, SymbolFlags::CODE, 1, Some(reference));
    assert!(symbol.binary().unwrap().is_alive());
    assert!(symbol.partial_link());

    drop(binary);
    assert!(!symbol.binary().unwrap().is_alive());
    assert!(!symbol.partial_link());

    let mut table: SymbolTable = [&symbol].into_iter().collect();
    table.enable_partial_link(true);
    assert_eq!(table.find_symbol_by_name("gone").unwrap().address(), 0x10);
}

#[rstest]
fn failed_link_is_reported() {
    let mut recorder = RecordingBinary::new(0);
    recorder.result = false;
    let binary: Arc<dyn Binary> = Arc::new(recorder);
    let symbol = Symbol::new("broken", 0x10, SymbolFlags::CODE, 2, Some((&binary).into()));
    assert!(!symbol.partial_link());
    assert!(!Symbol::new("orphan", 0, SymbolFlags::CODE, 0, None).partial_link());
}

#[rstest]
fn name_ownership_follows_the_name() {
    let owned = Symbol::new(String::from("owned"), 0, SymbolFlags::EXPORT, 0, None);
    assert!(owned.is_name_owned());
    assert!(owned.flags().contains(SymbolFlags::EXPORT | SymbolFlags::NAME_OWNED));

    let borrowed = Symbol::new("borrowed", 0, SymbolFlags::NAME_OWNED, 0, None);
    assert!(!borrowed.is_name_owned());
    assert!(borrowed.flags().is_empty());
}

#[rstest]
fn symbol_accessors() {
    let symbol = Symbol::new("handler", 0x1234, SymbolFlags::HANDLER, 7, None);
    assert_eq!(
        symbol.simplify(),
        SymbolInfo {
            name: "handler",
            address: 0x1234
        }
    );
    assert_eq!(symbol.section(), 7);
    assert!(symbol.binary().is_none());

    let symbols = [code("z", 2), code("y", 1)];
    let mut table = SymbolTable::new();
    table.extend(symbols.iter());
    assert_eq!(table.get_symbol(0).unwrap().name(), "z");
    table.sort();
    assert_eq!(table.get_symbol(0).unwrap().name(), "y");
    assert!(table.get_symbol(2).is_none());
}

#[rstest]
fn concurrent_lookups_share_the_table() {
    let recorder = Arc::new(RecordingBinary::new(0));
    let binary: Arc<dyn Binary> = recorder.clone();
    let names: Vec<String> = (0..256).map(|i| format!("sym_{i:03}")).collect();
    let symbols: Vec<_> = names
        .iter()
        .enumerate()
        .map(|(i, name)| {
            Symbol::new(
                name.as_str(),
                0x1000 + i * 0x10,
                SymbolFlags::CODE,
                i % 4,
                Some(BinaryRef::new(&binary)),
            )
        })
        .collect();
    let mut table: SymbolTable = symbols.iter().collect();
    table.sort();
    table.enable_partial_link(true);

    std::thread::scope(|scope| {
        for _ in 0..4 {
            scope.spawn(|| {
                for (i, name) in names.iter().enumerate() {
                    let sym = table.find_symbol_by_name(name).unwrap();
                    assert_eq!(sym.address(), 0x1000 + i * 0x10);
                }
            });
        }
    });
    assert_eq!(recorder.linked().len(), 4 * 256);
}
