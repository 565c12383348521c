//! Libraries and dictionaries
//!
//! A library owns an open-addressing dictionary of named entries
//! (classes, functions, fields and library prefixes), a list of
//! anonymous classes, and an ordered import list. Lookup goes local
//! first, then through imports in declaration order. Dictionaries grow
//! like the symbol table: doubling once 75% full.

use crate::heap::{Heap, Space};
use crate::object::string::Str;
use crate::object::{Array, Class, Field, Function, InstanceKind, ObjectBody};
use crate::object_store::ObjectStore;
use crate::value::ObjectRef;

/// Resolver supplied by the embedder for a library's native entries:
/// `(function_name, arg_count)` to an opaque native entry address.
pub type NativeResolver = fn(name: &str, arg_count: usize) -> Option<u64>;

/// Initial number of dictionary slots.
const INITIAL_DICTIONARY_SIZE: usize = 16;

/// Body of a library object.
pub struct LibraryDesc {
    /// Library url symbol.
    pub url: ObjectRef,
    /// Library name symbol (defaults to the url).
    pub name: ObjectRef,
    /// Private-key suffix appended to private names.
    pub private_key: ObjectRef,
    /// Open-addressing dictionary (an Array; last slot = used count).
    pub dictionary: ObjectRef,
    /// Anonymous classes (signature classes and the like).
    pub anonymous_classes: Vec<ObjectRef>,
    /// Imported libraries, in declaration order.
    pub imports: Vec<ObjectRef>,
    /// Native-entry resolver, or None.
    pub native_resolver: Option<NativeResolver>,
    /// Next library in the isolate's registration list.
    pub next_library: ObjectRef,
    /// Whether the core library has been imported.
    pub corelib_imported: bool,
    /// Whether loading has completed.
    pub loaded: bool,
}

/// Library handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Library(pub ObjectRef);

impl Library {
    /// Allocate a library with an empty dictionary and register it with
    /// the isolate's library list.
    pub fn new(heap: &mut Heap, store: &mut ObjectStore, url: &str) -> Library {
        let url_symbol = crate::symbols::new_symbol(heap, store, url);
        let key = format!("@{:x}", Str(url_symbol).hash_value(heap));
        let private_key = crate::symbols::new_symbol(heap, store, &key);
        let dictionary = Array::new(heap, store, INITIAL_DICTIONARY_SIZE + 1, Space::Old);
        dictionary.set_at(heap, INITIAL_DICTIONARY_SIZE, ObjectRef::smi(0));

        let desc = LibraryDesc {
            url: url_symbol,
            name: url_symbol,
            private_key,
            dictionary: dictionary.0,
            anonymous_classes: Vec::new(),
            imports: Vec::new(),
            native_resolver: None,
            next_library: store.registered_libraries,
            corelib_imported: true,
            loaded: false,
        };
        let lib = Library(heap.allocate(store.library_class, Space::Old, ObjectBody::Library(desc)));
        store.registered_libraries = lib.0;
        lib
    }

    /// Whether the handle is null.
    pub fn is_null(self) -> bool {
        self.0.is_null()
    }

    /// Borrow the descriptor.
    pub fn desc(self, heap: &Heap) -> &LibraryDesc {
        match &heap.get(self.0).body {
            ObjectBody::Library(d) => d,
            _ => panic!("not a library"),
        }
    }

    /// Mutably borrow the descriptor.
    pub fn desc_mut(self, heap: &mut Heap) -> &mut LibraryDesc {
        match &mut heap.get_mut(self.0).body {
            ObjectBody::Library(d) => d,
            _ => panic!("not a library"),
        }
    }

    /// The library url symbol.
    pub fn url(self, heap: &Heap) -> ObjectRef {
        self.desc(heap).url
    }

    /// The private-key suffix as a native string.
    pub fn private_key_str(self, heap: &Heap) -> String {
        Str(self.desc(heap).private_key).to_string(heap)
    }

    /// Add a named entry to the dictionary.
    pub fn add_object(self, heap: &mut Heap, store: &ObjectStore, obj: ObjectRef, name: ObjectRef) {
        debug_assert!(matches!(
            heap.kind_of(obj),
            InstanceKind::Class
                | InstanceKind::Function
                | InstanceKind::Field
                | InstanceKind::LibraryPrefix
        ));
        let dict = Array(self.desc(heap).dictionary);
        let dict_size = dict.len(heap) - 1;
        let mut index = Str(name).hash_value(heap) as usize % dict_size;
        // An empty slot exists because the table is kept under 75% full.
        while !dict.at(heap, index).is_null() {
            index = (index + 1) % dict_size;
        }
        dict.set_at(heap, index, obj);
        let used = dict.at(heap, dict_size).smi_value() + 1;
        dict.set_at(heap, dict_size, ObjectRef::smi(used));
        if used as usize > dict_size / 4 * 3 {
            self.grow_dictionary(heap, store, dict_size);
        }
    }

    /// Add a class and link it to this library.
    pub fn add_class(self, heap: &mut Heap, store: &ObjectStore, cls: Class) {
        let name = cls.name(heap);
        self.add_object(heap, store, cls.0, name);
        cls.desc_mut(heap).library = self.0;
    }

    /// Track an anonymous class (e.g. a signature class).
    pub fn add_anonymous_class(self, heap: &mut Heap, cls: ObjectRef) {
        self.desc_mut(heap).anonymous_classes.push(cls);
    }

    /// Scan only this library's dictionary.
    pub fn lookup_local_object(self, heap: &Heap, name: ObjectRef) -> ObjectRef {
        let dict = Array(self.desc(heap).dictionary);
        let dict_size = dict.len(heap) - 1;
        let mut index = Str(name).hash_value(heap) as usize % dict_size;
        loop {
            let entry = dict.at(heap, index);
            if entry.is_null() {
                return ObjectRef::NULL;
            }
            if Str(entry_name(heap, entry)).equals_ref(heap, name) {
                return entry;
            }
            index = (index + 1) % dict_size;
        }
    }

    /// Scan this library, then each import in declaration order.
    pub fn lookup_object(self, heap: &Heap, name: ObjectRef) -> ObjectRef {
        let local = self.lookup_local_object(heap, name);
        if !local.is_null() {
            return local;
        }
        for import in &self.desc(heap).imports {
            let found = Library(*import).lookup_local_object(heap, name);
            if !found.is_null() {
                return found;
            }
        }
        ObjectRef::NULL
    }

    /// [`Library::lookup_object`] filtered to classes.
    pub fn lookup_class(self, heap: &Heap, name: ObjectRef) -> Option<Class> {
        let obj = self.lookup_object(heap, name);
        if !obj.is_null() && heap.kind_of(obj) == InstanceKind::Class {
            Some(Class(obj))
        } else {
            None
        }
    }

    /// [`Library::lookup_local_object`] filtered to classes.
    pub fn lookup_local_class(self, heap: &Heap, name: ObjectRef) -> Option<Class> {
        let obj = self.lookup_local_object(heap, name);
        if !obj.is_null() && heap.kind_of(obj) == InstanceKind::Class {
            Some(Class(obj))
        } else {
            None
        }
    }

    /// Find an import by url.
    pub fn lookup_import(self, heap: &Heap, url: ObjectRef) -> Option<Library> {
        for import in &self.desc(heap).imports {
            if Str(Library(*import).url(heap)).equals_ref(heap, url) {
                return Some(Library(*import));
            }
        }
        None
    }

    /// Append an import.
    pub fn add_import(self, heap: &mut Heap, library: Library) {
        self.desc_mut(heap).imports.push(library.0);
    }

    /// Register `library` under `prefix` in this library's dictionary.
    pub fn add_prefixed_import(
        self,
        heap: &mut Heap,
        store: &ObjectStore,
        prefix: ObjectRef,
        library: Library,
    ) {
        let entry = heap.allocate(
            store.library_prefix_class,
            Space::Old,
            ObjectBody::LibraryPrefix {
                name: prefix,
                library: library.0,
            },
        );
        self.add_object(heap, store, entry, prefix);
    }

    /// The library a prefix in this dictionary refers to.
    pub fn lookup_prefix(self, heap: &Heap, prefix: ObjectRef) -> Option<Library> {
        let entry = self.lookup_local_object(heap, prefix);
        if entry.is_null() || heap.kind_of(entry) != InstanceKind::LibraryPrefix {
            return None;
        }
        match &heap.get(entry).body {
            ObjectBody::LibraryPrefix { library, .. } => Some(Library(*library)),
            _ => unreachable!(),
        }
    }

    /// Install the native-entry resolver.
    pub fn set_native_resolver(self, heap: &mut Heap, resolver: NativeResolver) {
        self.desc_mut(heap).native_resolver = Some(resolver);
    }

    /// Resolve a native entry via the registered resolver.
    pub fn resolve_native(self, heap: &Heap, name: &str, arg_count: usize) -> Option<u64> {
        self.desc(heap).native_resolver.and_then(|r| r(name, arg_count))
    }

    /// Number of used dictionary slots.
    pub fn dictionary_used(self, heap: &Heap) -> usize {
        let dict = Array(self.desc(heap).dictionary);
        let dict_size = dict.len(heap) - 1;
        dict.at(heap, dict_size).smi_value() as usize
    }

    /// Number of dictionary hash slots.
    pub fn dictionary_capacity(self, heap: &Heap) -> usize {
        Array(self.desc(heap).dictionary).len(heap) - 1
    }

    fn grow_dictionary(self, heap: &mut Heap, store: &ObjectStore, dict_size: usize) {
        let old_dict = Array(self.desc(heap).dictionary);
        let new_size = dict_size * 2;
        let new_dict = Array::new(heap, store, new_size + 1, Space::Old);
        for i in 0..dict_size {
            let entry = old_dict.at(heap, i);
            if entry.is_null() {
                continue;
            }
            let name = entry_name(heap, entry);
            let mut index = Str(name).hash_value(heap) as usize % new_size;
            while !new_dict.at(heap, index).is_null() {
                index = (index + 1) % new_size;
            }
            new_dict.set_at(heap, index, entry);
        }
        let used = old_dict.at(heap, dict_size);
        new_dict.set_at(heap, new_size, used);
        self.desc_mut(heap).dictionary = new_dict.0;
    }
}

/// The dictionary-relevant name of an entry.
fn entry_name(heap: &Heap, entry: ObjectRef) -> ObjectRef {
    match heap.kind_of(entry) {
        InstanceKind::Class => Class(entry).name(heap),
        InstanceKind::Function => Function(entry).desc(heap).name,
        InstanceKind::Field => Field(entry).desc(heap).name,
        InstanceKind::LibraryPrefix => match &heap.get(entry).body {
            ObjectBody::LibraryPrefix { name, .. } => *name,
            _ => unreachable!(),
        },
        _ => panic!("unexpected dictionary entry"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bootstrap;
    use crate::symbols;

    fn new_class(isolate: &mut crate::isolate::Isolate, name: &str) -> Class {
        let name = symbols::new_symbol(&mut isolate.heap, &mut isolate.store, name);
        Class::new(&mut isolate.heap, &isolate.store, name, ObjectRef::NULL)
    }

    #[test]
    fn test_add_and_lookup_class() {
        let mut isolate = bootstrap::new_isolate();
        let lib = Library::new(&mut isolate.heap, &mut isolate.store, "test:lib");
        let cls = new_class(&mut isolate, "Widget");
        lib.add_class(&mut isolate.heap, &isolate.store, cls);

        let name = symbols::new_symbol(&mut isolate.heap, &mut isolate.store, "Widget");
        assert_eq!(lib.lookup_class(&isolate.heap, name), Some(cls));
        assert_eq!(lib.lookup_local_class(&isolate.heap, name), Some(cls));
        assert_eq!(cls.desc(&isolate.heap).library, lib.0);

        let missing = symbols::new_symbol(&mut isolate.heap, &mut isolate.store, "Gadget");
        assert!(lib.lookup_class(&isolate.heap, missing).is_none());
    }

    #[test]
    fn test_lookup_through_imports_in_order() {
        let mut isolate = bootstrap::new_isolate();
        let main = Library::new(&mut isolate.heap, &mut isolate.store, "test:main");
        let dep_a = Library::new(&mut isolate.heap, &mut isolate.store, "test:a");
        let dep_b = Library::new(&mut isolate.heap, &mut isolate.store, "test:b");
        main.add_import(&mut isolate.heap, dep_a);
        main.add_import(&mut isolate.heap, dep_b);

        let in_a = new_class(&mut isolate, "Shared");
        dep_a.add_class(&mut isolate.heap, &isolate.store, in_a);
        let in_b = new_class(&mut isolate, "Shared");
        dep_b.add_class(&mut isolate.heap, &isolate.store, in_b);

        let name = symbols::new_symbol(&mut isolate.heap, &mut isolate.store, "Shared");
        // Local misses; the first import in declaration order wins.
        assert_eq!(main.lookup_class(&isolate.heap, name), Some(in_a));
        // Local lookup sees neither.
        assert!(main.lookup_local_class(&isolate.heap, name).is_none());
    }

    #[test]
    fn test_lookup_import_by_url() {
        let mut isolate = bootstrap::new_isolate();
        let main = Library::new(&mut isolate.heap, &mut isolate.store, "test:main");
        let dep = Library::new(&mut isolate.heap, &mut isolate.store, "test:dep");
        main.add_import(&mut isolate.heap, dep);

        let url = symbols::new_symbol(&mut isolate.heap, &mut isolate.store, "test:dep");
        assert_eq!(main.lookup_import(&isolate.heap, url), Some(dep));
        let other = symbols::new_symbol(&mut isolate.heap, &mut isolate.store, "test:other");
        assert!(main.lookup_import(&isolate.heap, other).is_none());
    }

    #[test]
    fn test_dictionary_doubles_at_watermark() {
        let mut isolate = bootstrap::new_isolate();
        let lib = Library::new(&mut isolate.heap, &mut isolate.store, "test:grow");
        let initial = lib.dictionary_capacity(&isolate.heap);
        let watermark = initial / 4 * 3;

        for i in 0..watermark {
            let cls = new_class(&mut isolate, &format!("C{i}"));
            lib.add_class(&mut isolate.heap, &isolate.store, cls);
        }
        assert_eq!(lib.dictionary_capacity(&isolate.heap), initial);

        let cls = new_class(&mut isolate, "Straw");
        lib.add_class(&mut isolate.heap, &isolate.store, cls);
        assert_eq!(lib.dictionary_capacity(&isolate.heap), initial * 2);

        // Entries survive rehashing.
        for i in 0..watermark {
            let name =
                symbols::new_symbol(&mut isolate.heap, &mut isolate.store, &format!("C{i}"));
            assert!(lib.lookup_local_class(&isolate.heap, name).is_some());
        }
    }

    #[test]
    fn test_prefixed_import() {
        let mut isolate = bootstrap::new_isolate();
        let main = Library::new(&mut isolate.heap, &mut isolate.store, "test:main");
        let dep = Library::new(&mut isolate.heap, &mut isolate.store, "test:dep");
        let prefix = symbols::new_symbol(&mut isolate.heap, &mut isolate.store, "dep");
        main.add_prefixed_import(&mut isolate.heap, &isolate.store, prefix, dep);

        assert_eq!(main.lookup_prefix(&isolate.heap, prefix), Some(dep));
        // The prefix is a dictionary entry, not a class.
        assert!(main.lookup_local_class(&isolate.heap, prefix).is_none());
        let other = symbols::new_symbol(&mut isolate.heap, &mut isolate.store, "unknown");
        assert!(main.lookup_prefix(&isolate.heap, other).is_none());
    }

    #[test]
    fn test_registration_links_libraries() {
        let mut isolate = bootstrap::new_isolate();
        let first = Library::new(&mut isolate.heap, &mut isolate.store, "test:first");
        let second = Library::new(&mut isolate.heap, &mut isolate.store, "test:second");
        assert_eq!(isolate.store.registered_libraries, second.0);
        assert_eq!(second.desc(&isolate.heap).next_library, first.0);
    }
}
