//! Isolate bootstrap
//!
//! Creates the null singleton (heap slot zero), ties the metaclass knot
//! (the class of classes is its own class), allocates the bootstrap
//! classes and singletons, builds the symbol table, names everything,
//! registers the two core libraries and queues the bootstrap classes
//! for finalization.

use crate::heap::{Heap, Space};
use crate::isolate::Isolate;
use crate::library::Library;
use crate::object::{
    Array, Class, ClassDesc, ClassState, Function, FunctionKind, InstanceKind, ObjectBody, Type,
};
use crate::object_store::ObjectStore;
use crate::symbols;
use crate::value::ObjectRef;

fn new_prefinalized_class(heap: &mut Heap, metaclass: ObjectRef, kind: InstanceKind, size: i64) -> ObjectRef {
    let mut desc = ClassDesc::new(kind, size);
    desc.state = ClassState::PreFinalized;
    heap.allocate(metaclass, Space::Old, ObjectBody::Class(desc))
}

/// Create a fully bootstrapped isolate. Equivalent to [`Isolate::new`].
pub fn new_isolate() -> Isolate {
    Isolate::new()
}

/// Populate a fresh isolate's heap and object store.
pub fn initialize(isolate: &mut Isolate) {
    let heap = &mut isolate.heap;
    let store = &mut isolate.store;

    // The null singleton must land in slot zero; its class header is
    // patched once the null class exists.
    let null_value = heap.allocate(ObjectRef::NULL, Space::Old, ObjectBody::Null);
    assert!(null_value.is_null());

    // Tie the metaclass knot: the class of classes is its own class.
    let mut metaclass_desc = ClassDesc::new(InstanceKind::Class, 0);
    metaclass_desc.state = ClassState::PreFinalized;
    let class_class = heap.allocate(ObjectRef::NULL, Space::Old, ObjectBody::Class(metaclass_desc));
    heap.set_class_of(class_class, class_class);
    store.class_class = class_class;

    // Classes of the internal kinds. Variable-size kinds report size 0.
    store.null_class = new_prefinalized_class(heap, class_class, InstanceKind::Null, 1);
    heap.set_class_of(null_value, store.null_class);
    store.bool_class = new_prefinalized_class(heap, class_class, InstanceKind::Bool, 2);
    store.smi_class = new_prefinalized_class(heap, class_class, InstanceKind::Smi, 1);
    store.mint_class = new_prefinalized_class(heap, class_class, InstanceKind::Mint, 2);
    store.bigint_class = new_prefinalized_class(heap, class_class, InstanceKind::Bigint, 0);
    store.one_byte_string_class =
        new_prefinalized_class(heap, class_class, InstanceKind::OneByteString, 0);
    store.two_byte_string_class =
        new_prefinalized_class(heap, class_class, InstanceKind::TwoByteString, 0);
    store.four_byte_string_class =
        new_prefinalized_class(heap, class_class, InstanceKind::FourByteString, 0);
    store.array_class = new_prefinalized_class(heap, class_class, InstanceKind::Array, 0);
    store.immutable_array_class =
        new_prefinalized_class(heap, class_class, InstanceKind::ImmutableArray, 0);
    store.type_array_class = new_prefinalized_class(heap, class_class, InstanceKind::TypeArray, 0);
    store.instantiated_type_arguments_class =
        new_prefinalized_class(heap, class_class, InstanceKind::InstantiatedTypeArguments, 3);
    store.parameterized_type_class =
        new_prefinalized_class(heap, class_class, InstanceKind::ParameterizedType, 4);
    store.type_parameter_class =
        new_prefinalized_class(heap, class_class, InstanceKind::TypeParameter, 3);
    store.instantiated_type_class =
        new_prefinalized_class(heap, class_class, InstanceKind::InstantiatedType, 3);
    store.function_class = new_prefinalized_class(heap, class_class, InstanceKind::Function, 19);
    store.field_class = new_prefinalized_class(heap, class_class, InstanceKind::Field, 9);
    store.script_class = new_prefinalized_class(heap, class_class, InstanceKind::Script, 5);
    store.token_stream_class =
        new_prefinalized_class(heap, class_class, InstanceKind::TokenStream, 0);
    store.library_class = new_prefinalized_class(heap, class_class, InstanceKind::Library, 13);
    store.library_prefix_class =
        new_prefinalized_class(heap, class_class, InstanceKind::LibraryPrefix, 3);
    store.code_class = new_prefinalized_class(heap, class_class, InstanceKind::Code, 0);
    store.instructions_class =
        new_prefinalized_class(heap, class_class, InstanceKind::Instructions, 0);
    store.pc_descriptors_class =
        new_prefinalized_class(heap, class_class, InstanceKind::PcDescriptors, 0);
    store.exception_handlers_class =
        new_prefinalized_class(heap, class_class, InstanceKind::ExceptionHandlers, 0);
    store.context_class = new_prefinalized_class(heap, class_class, InstanceKind::Context, 0);
    store.context_scope_class =
        new_prefinalized_class(heap, class_class, InstanceKind::ContextScope, 0);
    store.unhandled_exception_class =
        new_prefinalized_class(heap, class_class, InstanceKind::UnhandledException, 3);
    store.stacktrace_class =
        new_prefinalized_class(heap, class_class, InstanceKind::Stacktrace, 0);

    // The root Object class and the two sentinel classes.
    store.object_class = new_prefinalized_class(heap, class_class, InstanceKind::Instance, 1);
    store.var_class = new_prefinalized_class(heap, class_class, InstanceKind::Instance, 1);
    store.void_class = new_prefinalized_class(heap, class_class, InstanceKind::Instance, 1);

    // Singletons.
    store.true_value = heap.allocate(store.bool_class, Space::Old, ObjectBody::Bool(true));
    store.false_value = heap.allocate(store.bool_class, Space::Old, ObjectBody::Bool(false));

    // The symbol table needs the array classes; everything is named
    // after this point.
    store.symbol_table = symbols::new_symbol_table(heap, store);

    let names: &[(&str, ObjectRef)] = &[
        ("Class", store.class_class),
        ("Null", store.null_class),
        ("Bool", store.bool_class),
        ("Smi", store.smi_class),
        ("Mint", store.mint_class),
        ("Bigint", store.bigint_class),
        ("OneByteString", store.one_byte_string_class),
        ("TwoByteString", store.two_byte_string_class),
        ("FourByteString", store.four_byte_string_class),
        ("ObjectArray", store.array_class),
        ("ImmutableArray", store.immutable_array_class),
        ("TypeArray", store.type_array_class),
        ("InstantiatedTypeArguments", store.instantiated_type_arguments_class),
        ("ParameterizedType", store.parameterized_type_class),
        ("TypeParameter", store.type_parameter_class),
        ("InstantiatedType", store.instantiated_type_class),
        ("Function", store.function_class),
        ("Field", store.field_class),
        ("Script", store.script_class),
        ("TokenStream", store.token_stream_class),
        ("Library", store.library_class),
        ("LibraryPrefix", store.library_prefix_class),
        ("Code", store.code_class),
        ("Instructions", store.instructions_class),
        ("PcDescriptors", store.pc_descriptors_class),
        ("ExceptionHandlers", store.exception_handlers_class),
        ("Context", store.context_class),
        ("ContextScope", store.context_scope_class),
        ("UnhandledException", store.unhandled_exception_class),
        ("Stacktrace", store.stacktrace_class),
        ("Object", store.object_class),
        ("var", store.var_class),
        ("void", store.void_class),
    ];
    for (name, class) in names {
        let symbol = symbols::new_symbol(heap, store, name);
        Class(*class).desc_mut(heap).name = symbol;
    }

    // Singleton aggregates.
    store.empty_array = Array::new(heap, store, 0, Space::Old).0;
    // The empty context belongs to no particular activation; its
    // isolate back-reference is zero.
    store.empty_context = heap.allocate(
        store.context_class,
        Space::Old,
        ObjectBody::Context {
            isolate_id: 0,
            parent: ObjectRef::NULL,
            slots: Vec::new(),
        },
    );

    // Sentinel and root types.
    let object_type = Type::new_non_parameterized(heap, store, Class(store.object_class));
    store.object_type = object_type.0;
    let var_type = Type::new_non_parameterized(heap, store, Class(store.var_class));
    store.var_type = var_type.0;
    let void_type = Type::new_non_parameterized(heap, store, Class(store.void_class));
    store.void_type = void_type.0;

    // Internal classes (except the root) extend Object.
    for (_, class) in names.iter().skip(1) {
        if *class == store.object_class {
            continue;
        }
        Class(*class).desc_mut(heap).super_type = store.object_type;
    }

    // Bookkeeping tables.
    store.pending_classes = store.empty_array;
    let canonical = Array::new(heap, store, 4, Space::Old);
    store.canonical_argument_descriptors = canonical.0;

    // Core libraries, populated with the bootstrap classes.
    let core_library = Library::new(heap, store, "islet:core");
    store.core_library = core_library.0;
    let core_impl_library = Library::new(heap, store, "islet:coreimpl");
    store.core_impl_library = core_impl_library.0;
    core_library.add_import(heap, core_impl_library);

    for (name, class) in names {
        let lib = match *name {
            "Object" | "var" | "void" | "Function" => core_library,
            _ => core_impl_library,
        };
        lib.add_class(heap, store, Class(*class));
    }

    // Exception classes thrown by the dispatch pipeline.
    for name in [
        "NoSuchMethodException",
        "ObjectNotClosureException",
        "ClosureArgumentMismatchException",
        "StackOverflowException",
    ] {
        let symbol = symbols::new_symbol(heap, store, name);
        let cls = Class::new(heap, store, symbol, ObjectRef::NULL);
        cls.desc_mut(heap).super_type = store.object_type;
        core_library.add_class(heap, store, cls);
        add_pending_class(heap, store, cls.0);
    }

    // The universal fallback every receiver understands:
    // noSuchMethod(receiver, name, arguments).
    let no_such_method = symbols::new_symbol(heap, store, "noSuchMethod");
    let fallback = Function::new(heap, store, no_such_method, FunctionKind::Regular, false, false, 0);
    {
        let d = fallback.desc_mut(heap);
        d.num_fixed_parameters = 3;
        d.parameter_types = vec![ObjectRef::NULL; 3];
        d.parameter_names = vec![ObjectRef::NULL; 3];
        d.owner = store.object_class;
    }
    Class(store.object_class).add_function(heap, fallback.0);

    // Queue the bootstrap classes for bulk finalization.
    for (_, class) in names {
        add_pending_class(heap, store, *class);
    }
    log::debug!("bootstrapped isolate: {} heap objects", heap.len());
}

/// Append a class to the pending-classes queue.
pub fn add_pending_class(heap: &mut Heap, store: &mut ObjectStore, class: ObjectRef) {
    let pending = Array(store.pending_classes);
    let len = pending.len(heap);
    let grown = Array::grow(heap, store, pending, len + 1);
    grown.set_at(heap, len, class);
    store.pending_classes = grown.0;
}
