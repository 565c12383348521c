//! Interned symbol table
//!
//! Symbols are canonical strings: reference equality implies value
//! equality. The table is an open-addressing hash set stored as a heap
//! array whose last slot holds the used count; it doubles at 75%
//! occupancy. Interning a whole old-space string reuses it verbatim.

use crate::heap::{Heap, Space};
use crate::object::string::{hash_units, Str};
use crate::object::Array;
use crate::object_store::ObjectStore;
use crate::value::ObjectRef;

/// Initial number of hash slots.
pub const INITIAL_TABLE_SIZE: usize = 16;

/// Allocate the empty symbol table.
pub fn new_symbol_table(heap: &mut Heap, store: &ObjectStore) -> ObjectRef {
    let table = Array::new(heap, store, INITIAL_TABLE_SIZE + 1, Space::Old);
    table.set_at(heap, INITIAL_TABLE_SIZE, ObjectRef::smi(0));
    table.0
}

/// Intern a native string.
pub fn new_symbol(heap: &mut Heap, store: &mut ObjectStore, s: &str) -> ObjectRef {
    let units: Vec<u32> = s.chars().map(|c| c as u32).collect();
    new_symbol_from_units(heap, store, &units)
}

/// Intern a sequence of code points.
pub fn new_symbol_from_units(
    heap: &mut Heap,
    store: &mut ObjectStore,
    units: &[u32],
) -> ObjectRef {
    let hash = hash_units(units.iter().copied());
    let (index, existing) = probe(heap, store, hash, |heap, candidate| {
        Str(candidate).equals_units(heap, units)
    });
    if let Some(symbol) = existing {
        return symbol;
    }
    let symbol = Str::from_units(heap, store, units, Space::Old);
    Str(symbol).ensure_hash(heap);
    insert(heap, store, symbol, index);
    symbol
}

/// Intern an existing managed string. A whole old-space string is
/// reused as the symbol; anything else is copied to old space.
pub fn new_symbol_from_ref(heap: &mut Heap, store: &mut ObjectStore, s: ObjectRef) -> ObjectRef {
    let len = Str(s).len(heap);
    new_symbol_substring(heap, store, s, 0, len)
}

/// Intern a substring of an existing managed string.
pub fn new_symbol_substring(
    heap: &mut Heap,
    store: &mut ObjectStore,
    s: ObjectRef,
    begin: usize,
    len: usize,
) -> ObjectRef {
    let units: Vec<u32> = (begin..begin + len)
        .map(|i| Str(s).char_at(heap, i))
        .collect();
    let hash = hash_units(units.iter().copied());
    let (index, existing) = probe(heap, store, hash, |heap, candidate| {
        Str(candidate).equals_units(heap, &units)
    });
    if let Some(symbol) = existing {
        return symbol;
    }
    let whole = begin == 0 && len == Str(s).len(heap);
    let symbol = if whole && heap.space_of(s) == Space::Old {
        s
    } else {
        Str::from_units(heap, store, &units, Space::Old)
    };
    Str(symbol).ensure_hash(heap);
    insert(heap, store, symbol, index);
    symbol
}

/// Whether `s` is an interned symbol: it must carry a hash and sit in
/// the table.
pub fn is_symbol(heap: &Heap, store: &ObjectStore, s: ObjectRef) -> bool {
    if !Str::is_string(heap, s) || !Str(s).has_hash(heap) {
        return false;
    }
    let table = Array(store.symbol_table);
    let table_size = table.len(heap) - 1;
    let mut index = Str(s).hash_value(heap) as usize % table_size;
    loop {
        let entry = table.at(heap, index);
        if entry.is_null() {
            return false;
        }
        if entry == s {
            return true;
        }
        index = (index + 1) % table_size;
    }
}

/// Number of interned symbols.
pub fn symbol_count(heap: &Heap, store: &ObjectStore) -> usize {
    let table = Array(store.symbol_table);
    let table_size = table.len(heap) - 1;
    table.at(heap, table_size).smi_value() as usize
}

/// Number of hash slots in the current table.
pub fn table_capacity(heap: &Heap, store: &ObjectStore) -> usize {
    Array(store.symbol_table).len(heap) - 1
}

fn probe(
    heap: &Heap,
    store: &ObjectStore,
    hash: u32,
    matches: impl Fn(&Heap, ObjectRef) -> bool,
) -> (usize, Option<ObjectRef>) {
    let table = Array(store.symbol_table);
    let table_size = table.len(heap) - 1;
    let mut index = hash as usize % table_size;
    loop {
        let entry = table.at(heap, index);
        if entry.is_null() {
            return (index, None);
        }
        if matches(heap, entry) {
            return (index, Some(entry));
        }
        index = (index + 1) % table_size;
    }
}

fn insert(heap: &mut Heap, store: &mut ObjectStore, symbol: ObjectRef, index: usize) {
    let table = Array(store.symbol_table);
    let table_size = table.len(heap) - 1;
    table.set_at(heap, index, symbol);
    let used = table.at(heap, table_size).smi_value() + 1;
    table.set_at(heap, table_size, ObjectRef::smi(used));
    // Rehash when the table reaches 75% occupancy.
    if used as usize > table_size / 4 * 3 {
        grow(heap, store, table_size);
    }
}

fn grow(heap: &mut Heap, store: &mut ObjectStore, table_size: usize) {
    let old_table = Array(store.symbol_table);
    let new_size = table_size * 2;
    let new_table = Array::new(heap, store, new_size + 1, Space::Old);
    for i in 0..table_size {
        let element = old_table.at(heap, i);
        if element.is_null() {
            continue;
        }
        let mut index = Str(element).hash_value(heap) as usize % new_size;
        while !new_table.at(heap, index).is_null() {
            index = (index + 1) % new_size;
        }
        new_table.set_at(heap, index, element);
    }
    let used = old_table.at(heap, table_size);
    new_table.set_at(heap, new_size, used);
    store.symbol_table = new_table.0;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bootstrap;

    #[test]
    fn test_interning_is_idempotent() {
        let mut isolate = bootstrap::new_isolate();
        let a = new_symbol(&mut isolate.heap, &mut isolate.store, "greeting");
        let b = new_symbol(&mut isolate.heap, &mut isolate.store, "greeting");
        assert_eq!(a, b);
        assert!(is_symbol(&isolate.heap, &isolate.store, a));
    }

    #[test]
    fn test_distinct_strings_distinct_symbols() {
        let mut isolate = bootstrap::new_isolate();
        let a = new_symbol(&mut isolate.heap, &mut isolate.store, "left");
        let b = new_symbol(&mut isolate.heap, &mut isolate.store, "right");
        assert_ne!(a, b);
    }

    #[test]
    fn test_empty_symbol_is_canonical() {
        let mut isolate = bootstrap::new_isolate();
        let a = new_symbol(&mut isolate.heap, &mut isolate.store, "");
        let b = new_symbol(&mut isolate.heap, &mut isolate.store, "");
        assert_eq!(a, b);
        assert_eq!(Str(a).len(&isolate.heap), 0);
    }

    #[test]
    fn test_old_space_string_reused_verbatim() {
        let mut isolate = bootstrap::new_isolate();
        let s = Str::new(&mut isolate.heap, &isolate.store, "reusable", Space::Old);
        let symbol = new_symbol_from_ref(&mut isolate.heap, &mut isolate.store, s);
        assert_eq!(symbol, s);

        let fresh = Str::new(&mut isolate.heap, &isolate.store, "transient", Space::New);
        let symbol = new_symbol_from_ref(&mut isolate.heap, &mut isolate.store, fresh);
        assert_ne!(symbol, fresh);
        assert_eq!(isolate.heap.space_of(symbol), Space::Old);
    }

    #[test]
    fn test_substring_interning() {
        let mut isolate = bootstrap::new_isolate();
        let s = Str::new(&mut isolate.heap, &isolate.store, "get:length", Space::Old);
        let sub = new_symbol_substring(&mut isolate.heap, &mut isolate.store, s, 4, 6);
        let direct = new_symbol(&mut isolate.heap, &mut isolate.store, "length");
        assert_eq!(sub, direct);
    }

    #[test]
    fn test_table_doubles_once_past_watermark() {
        let mut isolate = bootstrap::new_isolate();
        let initial = table_capacity(&isolate.heap, &isolate.store);
        let watermark = initial / 4 * 3;
        let already = symbol_count(&isolate.heap, &isolate.store);

        // Fill to exactly the watermark; the insert crossing it doubles
        // the table exactly once.
        let mut added = already;
        let mut i = 0;
        while added < watermark {
            new_symbol(&mut isolate.heap, &mut isolate.store, &format!("sym{i}"));
            i += 1;
            added = symbol_count(&isolate.heap, &isolate.store);
        }
        assert_eq!(table_capacity(&isolate.heap, &isolate.store), initial);
        new_symbol(&mut isolate.heap, &mut isolate.store, "straw");
        assert_eq!(table_capacity(&isolate.heap, &isolate.store), initial * 2);

        // Symbols survive rehashing.
        let a = new_symbol(&mut isolate.heap, &mut isolate.store, "sym0");
        let b = new_symbol(&mut isolate.heap, &mut isolate.store, "sym0");
        assert_eq!(a, b);
    }
}
