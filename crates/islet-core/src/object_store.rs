//! Per-isolate object store
//!
//! The object store holds the references native code needs to reach the
//! managed world: bootstrap classes, pre-initialized singletons, the
//! symbol table, the pending-class queue, registered libraries, the
//! sticky-error slot and the distinguished stub code entries.

use crate::value::ObjectRef;

/// Per-isolate table of distinguished heap references. All fields are
/// GC roots.
pub struct ObjectStore {
    /// The class of class descriptors (metaclass fixpoint).
    pub class_class: ObjectRef,
    /// Class of the null singleton.
    pub null_class: ObjectRef,
    /// Class of the boolean singletons.
    pub bool_class: ObjectRef,
    /// Class naming immediate small integers.
    pub smi_class: ObjectRef,
    /// Class of boxed 64-bit integers.
    pub mint_class: ObjectRef,
    /// Class of arbitrary-precision integers.
    pub bigint_class: ObjectRef,
    /// Class of 1-byte strings.
    pub one_byte_string_class: ObjectRef,
    /// Class of 2-byte strings.
    pub two_byte_string_class: ObjectRef,
    /// Class of 4-byte strings.
    pub four_byte_string_class: ObjectRef,
    /// Class of mutable arrays.
    pub array_class: ObjectRef,
    /// Class of immutable arrays.
    pub immutable_array_class: ObjectRef,
    /// Class of concrete type-argument vectors.
    pub type_array_class: ObjectRef,
    /// Class of lazy type-argument views.
    pub instantiated_type_arguments_class: ObjectRef,
    /// Class of parameterized types.
    pub parameterized_type_class: ObjectRef,
    /// Class of type-parameter nodes.
    pub type_parameter_class: ObjectRef,
    /// Class of lazy type views.
    pub instantiated_type_class: ObjectRef,
    /// Class of function descriptors.
    pub function_class: ObjectRef,
    /// Class of field descriptors.
    pub field_class: ObjectRef,
    /// Class of scripts.
    pub script_class: ObjectRef,
    /// Class of token streams.
    pub token_stream_class: ObjectRef,
    /// Class of libraries.
    pub library_class: ObjectRef,
    /// Class of import prefixes.
    pub library_prefix_class: ObjectRef,
    /// Class of code descriptors.
    pub code_class: ObjectRef,
    /// Class of instruction objects.
    pub instructions_class: ObjectRef,
    /// Class of pc-descriptor tables.
    pub pc_descriptors_class: ObjectRef,
    /// Class of exception-handler tables.
    pub exception_handlers_class: ObjectRef,
    /// Class of contexts.
    pub context_class: ObjectRef,
    /// Class of context scopes.
    pub context_scope_class: ObjectRef,
    /// Class of unhandled-exception wrappers.
    pub unhandled_exception_class: ObjectRef,
    /// Class of stack traces.
    pub stacktrace_class: ObjectRef,
    /// The root Object class.
    pub object_class: ObjectRef,
    /// Top-type sentinel class.
    pub var_class: ObjectRef,
    /// Void class.
    pub void_class: ObjectRef,

    /// Finalized type for the root Object class.
    pub object_type: ObjectRef,
    /// The top-type sentinel.
    pub var_type: ObjectRef,
    /// The void type.
    pub void_type: ObjectRef,

    /// The true singleton.
    pub true_value: ObjectRef,
    /// The false singleton.
    pub false_value: ObjectRef,
    /// Canonical empty array.
    pub empty_array: ObjectRef,
    /// Canonical empty context.
    pub empty_context: ObjectRef,

    /// Open-addressing symbol table (an Array; last slot = used count).
    pub symbol_table: ObjectRef,
    /// Classes awaiting finalization (an Array).
    pub pending_classes: ObjectRef,
    /// Most recent unrecovered error message, or null.
    pub sticky_error: ObjectRef,
    /// Canonicalized argument descriptors (an Array; null-terminated).
    pub canonical_argument_descriptors: ObjectRef,

    /// Head of the registered-library list.
    pub registered_libraries: ObjectRef,
    /// The core library.
    pub core_library: ObjectRef,
    /// The core implementation library.
    pub core_impl_library: ObjectRef,

    /// Resolve stub: initial target of instance-call sites.
    pub call_instance_function_stub: ObjectRef,
    /// Megamorphic-lookup stub code.
    pub megamorphic_lookup_stub: ObjectRef,
}

impl ObjectStore {
    /// A store with every slot null; bootstrap fills it in.
    pub fn new_uninitialized() -> Self {
        ObjectStore {
            class_class: ObjectRef::NULL,
            null_class: ObjectRef::NULL,
            bool_class: ObjectRef::NULL,
            smi_class: ObjectRef::NULL,
            mint_class: ObjectRef::NULL,
            bigint_class: ObjectRef::NULL,
            one_byte_string_class: ObjectRef::NULL,
            two_byte_string_class: ObjectRef::NULL,
            four_byte_string_class: ObjectRef::NULL,
            array_class: ObjectRef::NULL,
            immutable_array_class: ObjectRef::NULL,
            type_array_class: ObjectRef::NULL,
            instantiated_type_arguments_class: ObjectRef::NULL,
            parameterized_type_class: ObjectRef::NULL,
            type_parameter_class: ObjectRef::NULL,
            instantiated_type_class: ObjectRef::NULL,
            function_class: ObjectRef::NULL,
            field_class: ObjectRef::NULL,
            script_class: ObjectRef::NULL,
            token_stream_class: ObjectRef::NULL,
            library_class: ObjectRef::NULL,
            library_prefix_class: ObjectRef::NULL,
            code_class: ObjectRef::NULL,
            instructions_class: ObjectRef::NULL,
            pc_descriptors_class: ObjectRef::NULL,
            exception_handlers_class: ObjectRef::NULL,
            context_class: ObjectRef::NULL,
            context_scope_class: ObjectRef::NULL,
            unhandled_exception_class: ObjectRef::NULL,
            stacktrace_class: ObjectRef::NULL,
            object_class: ObjectRef::NULL,
            var_class: ObjectRef::NULL,
            void_class: ObjectRef::NULL,
            object_type: ObjectRef::NULL,
            var_type: ObjectRef::NULL,
            void_type: ObjectRef::NULL,
            true_value: ObjectRef::NULL,
            false_value: ObjectRef::NULL,
            empty_array: ObjectRef::NULL,
            empty_context: ObjectRef::NULL,
            symbol_table: ObjectRef::NULL,
            pending_classes: ObjectRef::NULL,
            sticky_error: ObjectRef::NULL,
            canonical_argument_descriptors: ObjectRef::NULL,
            registered_libraries: ObjectRef::NULL,
            core_library: ObjectRef::NULL,
            core_impl_library: ObjectRef::NULL,
            call_instance_function_stub: ObjectRef::NULL,
            megamorphic_lookup_stub: ObjectRef::NULL,
        }
    }

    /// Whether an unrecovered error is recorded.
    pub fn has_sticky_error(&self) -> bool {
        !self.sticky_error.is_null()
    }

    /// All root references held by the store, for visiting.
    pub fn root_pointers(&self) -> Vec<ObjectRef> {
        vec![
            self.class_class,
            self.null_class,
            self.bool_class,
            self.smi_class,
            self.mint_class,
            self.bigint_class,
            self.one_byte_string_class,
            self.two_byte_string_class,
            self.four_byte_string_class,
            self.array_class,
            self.immutable_array_class,
            self.type_array_class,
            self.instantiated_type_arguments_class,
            self.parameterized_type_class,
            self.type_parameter_class,
            self.instantiated_type_class,
            self.function_class,
            self.field_class,
            self.script_class,
            self.token_stream_class,
            self.library_class,
            self.library_prefix_class,
            self.code_class,
            self.instructions_class,
            self.pc_descriptors_class,
            self.exception_handlers_class,
            self.context_class,
            self.context_scope_class,
            self.unhandled_exception_class,
            self.stacktrace_class,
            self.object_class,
            self.var_class,
            self.void_class,
            self.object_type,
            self.var_type,
            self.void_type,
            self.true_value,
            self.false_value,
            self.empty_array,
            self.empty_context,
            self.symbol_table,
            self.pending_classes,
            self.sticky_error,
            self.canonical_argument_descriptors,
            self.registered_libraries,
            self.core_library,
            self.core_impl_library,
            self.call_instance_function_stub,
            self.megamorphic_lookup_stub,
        ]
    }
}
