//! Per-class function cache
//!
//! Each class carries a small advisory cache of recently resolved
//! methods, keyed by `(name, num_arguments, num_named_arguments)`. A
//! miss only means "not recently used"; correctness always rests on the
//! superclass-chain walk in the resolver. The cache is a flat array of
//! four-slot entries terminated by a null name, growing by a fixed
//! number of entries when full.

use islet_core::{Array, Class, Code, Function, Isolate, ObjectRef, Space, Str};

const NUM_SLOTS: usize = 4;
const SLOT_NAME: usize = 0;
const SLOT_ARG_COUNT: usize = 1;
const SLOT_NAMED_ARG_COUNT: usize = 2;
const SLOT_FUNCTION: usize = 3;

const INITIAL_ENTRIES: usize = 4;
const GROW_ENTRIES: usize = 8;

/// Handle on a class's function cache.
pub struct FunctionsCache {
    class: Class,
}

impl FunctionsCache {
    /// The cache of `class`, creating the backing array on demand.
    pub fn new(isolate: &mut Isolate, class: Class) -> FunctionsCache {
        if class.desc(&isolate.heap).functions_cache.is_null() {
            // One spare entry keeps the table null-terminated.
            let array = Array::new(
                &mut isolate.heap,
                &isolate.store,
                (INITIAL_ENTRIES + 1) * NUM_SLOTS,
                Space::Old,
            );
            class.desc_mut(&mut isolate.heap).functions_cache = array.0;
        }
        FunctionsCache { class }
    }

    /// Look up the code of a cached method, or None on a cache miss.
    pub fn lookup_code(
        &self,
        isolate: &Isolate,
        name: ObjectRef,
        num_arguments: usize,
        num_named_arguments: usize,
    ) -> Option<Code> {
        let cache = Array(self.class.desc(&isolate.heap).functions_cache);
        let len = cache.len(&isolate.heap);
        let mut i = 0;
        while i < len {
            let cached_name = cache.at(&isolate.heap, i + SLOT_NAME);
            if cached_name.is_null() {
                return None;
            }
            if Str(cached_name).equals_ref(&isolate.heap, name)
                && cache.at(&isolate.heap, i + SLOT_ARG_COUNT).smi_value()
                    == num_arguments as i64
                && cache
                    .at(&isolate.heap, i + SLOT_NAMED_ARG_COUNT)
                    .smi_value()
                    == num_named_arguments as i64
            {
                let function = Function(cache.at(&isolate.heap, i + SLOT_FUNCTION));
                debug_assert!(function.has_code(&isolate.heap));
                return Some(Code(function.desc(&isolate.heap).code));
            }
            i += NUM_SLOTS;
        }
        // The cache is null terminated, so the scan never falls off
        // the end.
        unreachable!("functions cache without terminator");
    }

    /// Remember a compiled method under the given argument counts.
    pub fn add_compiled_function(
        &self,
        isolate: &mut Isolate,
        function: Function,
        num_arguments: usize,
        num_named_arguments: usize,
    ) {
        debug_assert!(function.has_code(&isolate.heap));
        debug_assert!(function.are_valid_argument_counts(
            &isolate.heap,
            num_arguments,
            num_named_arguments
        ));
        let cache = Array(self.class.desc(&isolate.heap).functions_cache);
        let len = cache.len(&isolate.heap);
        let mut i = 0;
        while i + NUM_SLOTS < len {
            if cache.at(&isolate.heap, i + SLOT_NAME).is_null() {
                Self::fill_entry(isolate, cache, i, function, num_arguments, num_named_arguments);
                return;
            }
            i += NUM_SLOTS;
        }
        // Full: grow by a fixed number of entries and fill the first
        // fresh one.
        let grown = Array::grow(
            &mut isolate.heap,
            &isolate.store,
            cache,
            len + GROW_ENTRIES * NUM_SLOTS,
        );
        self.class.desc_mut(&mut isolate.heap).functions_cache = grown.0;
        let index = len - NUM_SLOTS;
        Self::fill_entry(
            isolate,
            grown,
            index,
            function,
            num_arguments,
            num_named_arguments,
        );
    }

    fn fill_entry(
        isolate: &mut Isolate,
        cache: Array,
        index: usize,
        function: Function,
        num_arguments: usize,
        num_named_arguments: usize,
    ) {
        let name = function.desc(&isolate.heap).name;
        cache.set_at(&mut isolate.heap, index + SLOT_NAME, name);
        cache.set_at(
            &mut isolate.heap,
            index + SLOT_ARG_COUNT,
            ObjectRef::smi(num_arguments as i64),
        );
        cache.set_at(
            &mut isolate.heap,
            index + SLOT_NAMED_ARG_COUNT,
            ObjectRef::smi(num_named_arguments as i64),
        );
        cache.set_at(&mut isolate.heap, index + SLOT_FUNCTION, function.0);
    }
}
