//! Object model
//!
//! Every heap object is a header (the class-descriptor reference) plus a
//! kind-discriminated body. Visitors and size queries dispatch on the
//! instance kind; fixed-size kinds take their size from the class
//! descriptor, variable-size kinds from their own length field.

mod array;
mod class;
mod code;
mod context;
mod function;
mod script;
pub(crate) mod string;
mod types;

pub use array::Array;
pub use class::{Class, ClassDesc, ClassState, NO_TYPE_ARGUMENTS};
pub use code::{
    Code, CodeDesc, CodeIndexTable, ExceptionHandlerEntry, Instructions, InstructionsDesc,
    PcDescriptor, PcDescriptorKind,
};
pub use context::{new_closure, Context, ContextScope, ContextScopeEntry};
pub use function::{Function, FunctionDesc, FunctionKind};
pub use script::{Script, ScriptDesc, ScriptKind, TokenDesc, TokenKind};
pub use string::Str;
pub use types::{Type, TypeArgs, TypeState};

use crate::heap::Space;
use crate::value::ObjectRef;

/// Closed enumeration of heap-object kinds. `Smi` never appears on the
/// heap; it is listed so class descriptors for immediates can name it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InstanceKind {
    /// Class descriptor
    Class,
    /// The null singleton
    Null,
    /// Boolean singletons
    Bool,
    /// Immediate small integer (tagged, never heap-allocated)
    Smi,
    /// Boxed 64-bit integer
    Mint,
    /// Arbitrary-precision integer
    Bigint,
    /// String of 1-byte code units
    OneByteString,
    /// String of 2-byte code units
    TwoByteString,
    /// String of 4-byte code units
    FourByteString,
    /// Mutable object array
    Array,
    /// Immutable object array (canonicalized descriptors live here)
    ImmutableArray,
    /// Concrete type-argument vector
    TypeArray,
    /// Lazy instantiated view over an uninstantiated vector
    InstantiatedTypeArguments,
    /// A (possibly unresolved, possibly parameterized) type
    ParameterizedType,
    /// Reference to a type parameter of the enclosing class
    TypeParameter,
    /// Lazy instantiation view over an uninstantiated type
    InstantiatedType,
    /// Function descriptor
    Function,
    /// Field descriptor
    Field,
    /// Script source
    Script,
    /// Token stream produced by tokenizing a script
    TokenStream,
    /// Library with a dictionary of named entries
    Library,
    /// Named import prefix within a library dictionary
    LibraryPrefix,
    /// Compiled-code descriptor
    Code,
    /// Executable instruction bytes
    Instructions,
    /// Pc-descriptor table
    PcDescriptors,
    /// Exception-handler table
    ExceptionHandlers,
    /// First-class activation record
    Context,
    /// Compile-time description of captured variables
    ContextScope,
    /// Closure (function + context)
    Closure,
    /// Unhandled-exception result wrapper
    UnhandledException,
    /// Captured stack trace
    Stacktrace,
    /// Plain user-class instance
    Instance,
}

/// The class of any value, immediates included.
pub fn class_of_value(
    heap: &crate::heap::Heap,
    store: &crate::object_store::ObjectStore,
    value: ObjectRef,
) -> ObjectRef {
    if value.is_smi() {
        store.smi_class
    } else {
        heap.class_of(value)
    }
}

/// Box an integer at the smallest representation that holds it: an
/// immediate small integer, a `Mint`, or a `Bigint` beyond 64 bits.
pub fn new_integer(
    heap: &mut crate::heap::Heap,
    store: &crate::object_store::ObjectStore,
    value: i128,
) -> ObjectRef {
    if let Ok(v) = i64::try_from(value) {
        if ObjectRef::fits_in_smi(v) {
            return ObjectRef::smi(v);
        }
        return heap.allocate(store.mint_class, Space::New, ObjectBody::Mint(v));
    }
    let negative = value < 0;
    let mut magnitude = value.unsigned_abs();
    let mut digits = Vec::new();
    while magnitude != 0 {
        digits.push((magnitude & 0xFFFF_FFFF) as u32);
        magnitude >>= 32;
    }
    heap.allocate(
        store.bigint_class,
        Space::New,
        ObjectBody::Bigint(BigintDesc { negative, digits }),
    )
}

/// A heap object: class header, owning space, and kind-specific body.
pub struct HeapObject {
    /// Header: reference to the class descriptor.
    pub class: ObjectRef,
    /// The space this object was allocated in.
    pub space: Space,
    /// Kind-discriminated body.
    pub body: ObjectBody,
}

/// Body of a Bigint: sign plus little-endian 32-bit digits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BigintDesc {
    /// Whether the value is negative.
    pub negative: bool,
    /// Little-endian base-2^32 digits.
    pub digits: Vec<u32>,
}

/// Body of an array (mutable or immutable).
#[derive(Debug, Clone)]
pub struct ArrayDesc {
    /// Element-type vector, or null for a raw array.
    pub type_arguments: ObjectRef,
    /// Element slots.
    pub data: Vec<ObjectRef>,
}

/// Kind-discriminated object body.
pub enum ObjectBody {
    /// Class descriptor
    Class(ClassDesc),
    /// The null singleton
    Null,
    /// Boolean singleton
    Bool(bool),
    /// Boxed 64-bit integer
    Mint(i64),
    /// Arbitrary-precision integer
    Bigint(BigintDesc),
    /// 1-byte string: code units plus cached hash (0 = not computed)
    OneByteString {
        /// Code units
        data: Vec<u8>,
        /// Cached hash; zero means not yet computed
        hash: u32,
    },
    /// 2-byte string
    TwoByteString {
        /// Code units
        data: Vec<u16>,
        /// Cached hash; zero means not yet computed
        hash: u32,
    },
    /// 4-byte string
    FourByteString {
        /// Code units
        data: Vec<u32>,
        /// Cached hash; zero means not yet computed
        hash: u32,
    },
    /// Mutable array
    Array(ArrayDesc),
    /// Immutable array
    ImmutableArray(ArrayDesc),
    /// Concrete type-argument vector
    TypeArray {
        /// The types, in slot order
        types: Vec<ObjectRef>,
    },
    /// Lazy instantiated type-argument view
    InstantiatedTypeArguments {
        /// The uninstantiated vector
        uninstantiated: ObjectRef,
        /// The instantiator vector
        instantiator: ObjectRef,
    },
    /// Parameterized (or not-yet-resolved) type
    ParameterizedType {
        /// Resolved class, or the unresolved class-name symbol
        type_class: ObjectRef,
        /// Type-argument vector, or null for a raw type
        arguments: ObjectRef,
        /// Finalization state
        state: TypeState,
    },
    /// Type parameter of the enclosing class
    TypeParameter {
        /// Position in the class's type-argument tail
        index: usize,
        /// Parameter name symbol
        name: ObjectRef,
    },
    /// Lazy instantiation view over an uninstantiated type
    InstantiatedType {
        /// The uninstantiated type
        uninstantiated: ObjectRef,
        /// The instantiator vector
        instantiator: ObjectRef,
    },
    /// Function descriptor
    Function(FunctionDesc),
    /// Field descriptor
    Field(FieldDesc),
    /// Script source
    Script(ScriptDesc),
    /// Token stream
    TokenStream {
        /// The tokens, addressable by index
        tokens: Vec<TokenDesc>,
    },
    /// Library
    Library(crate::library::LibraryDesc),
    /// Named import prefix
    LibraryPrefix {
        /// Prefix name symbol
        name: ObjectRef,
        /// The library the prefix refers to
        library: ObjectRef,
    },
    /// Compiled-code descriptor
    Code(CodeDesc),
    /// Executable instruction bytes
    Instructions(InstructionsDesc),
    /// Pc-descriptor table
    PcDescriptors {
        /// Descriptor records in pc order
        entries: Vec<PcDescriptor>,
    },
    /// Exception-handler table, append-only
    ExceptionHandlers {
        /// `(try_index, handler_pc)` entries
        entries: Vec<ExceptionHandlerEntry>,
    },
    /// Activation record
    Context {
        /// Owning isolate id
        isolate_id: u64,
        /// Enclosing context, or null
        parent: ObjectRef,
        /// Variable slots
        slots: Vec<ObjectRef>,
    },
    /// Captured-variable description
    ContextScope {
        /// Per-slot capture records
        entries: Vec<ContextScopeEntry>,
    },
    /// Closure; its class header is the signature class
    Closure {
        /// The closed-over function
        function: ObjectRef,
        /// The captured context
        context: ObjectRef,
    },
    /// Unhandled-exception wrapper returned to the embedder
    UnhandledException {
        /// The thrown exception
        exception: ObjectRef,
        /// The captured stacktrace
        stacktrace: ObjectRef,
    },
    /// Captured stack trace
    Stacktrace {
        /// Frame pcs from innermost outwards
        pcs: Vec<u64>,
    },
    /// Plain instance of a user class
    Instance {
        /// Type-argument vector, or null when the class is not
        /// parameterized or the instance is raw
        type_arguments: ObjectRef,
        /// Field slots in offset order
        fields: Vec<ObjectRef>,
    },
}

/// Body of a Field descriptor.
#[derive(Debug, Clone)]
pub struct FieldDesc {
    /// Field name symbol
    pub name: ObjectRef,
    /// Owning class
    pub owner: ObjectRef,
    /// Declared type
    pub ty: ObjectRef,
    /// Whether the field is static
    pub is_static: bool,
    /// Whether the field is final
    pub is_final: bool,
    /// Whether the declaration carried an initializer
    pub has_initializer: bool,
    /// Instance-field offset in words, or -1 for static fields
    pub offset: i64,
    /// Static value slot (null for instance fields)
    pub static_value: ObjectRef,
}

/// Field handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Field(pub ObjectRef);

impl Field {
    /// Borrow the descriptor.
    pub fn desc(self, heap: &crate::heap::Heap) -> &FieldDesc {
        match &heap.get(self.0).body {
            ObjectBody::Field(d) => d,
            _ => panic!("not a field"),
        }
    }

    /// Mutably borrow the descriptor.
    pub fn desc_mut(self, heap: &mut crate::heap::Heap) -> &mut FieldDesc {
        match &mut heap.get_mut(self.0).body {
            ObjectBody::Field(d) => d,
            _ => panic!("not a field"),
        }
    }
}

impl ObjectBody {
    /// The instance kind of this body.
    pub fn kind(&self) -> InstanceKind {
        match self {
            ObjectBody::Class(_) => InstanceKind::Class,
            ObjectBody::Null => InstanceKind::Null,
            ObjectBody::Bool(_) => InstanceKind::Bool,
            ObjectBody::Mint(_) => InstanceKind::Mint,
            ObjectBody::Bigint(_) => InstanceKind::Bigint,
            ObjectBody::OneByteString { .. } => InstanceKind::OneByteString,
            ObjectBody::TwoByteString { .. } => InstanceKind::TwoByteString,
            ObjectBody::FourByteString { .. } => InstanceKind::FourByteString,
            ObjectBody::Array(_) => InstanceKind::Array,
            ObjectBody::ImmutableArray(_) => InstanceKind::ImmutableArray,
            ObjectBody::TypeArray { .. } => InstanceKind::TypeArray,
            ObjectBody::InstantiatedTypeArguments { .. } => {
                InstanceKind::InstantiatedTypeArguments
            }
            ObjectBody::ParameterizedType { .. } => InstanceKind::ParameterizedType,
            ObjectBody::TypeParameter { .. } => InstanceKind::TypeParameter,
            ObjectBody::InstantiatedType { .. } => InstanceKind::InstantiatedType,
            ObjectBody::Function(_) => InstanceKind::Function,
            ObjectBody::Field(_) => InstanceKind::Field,
            ObjectBody::Script(_) => InstanceKind::Script,
            ObjectBody::TokenStream { .. } => InstanceKind::TokenStream,
            ObjectBody::Library(_) => InstanceKind::Library,
            ObjectBody::LibraryPrefix { .. } => InstanceKind::LibraryPrefix,
            ObjectBody::Code(_) => InstanceKind::Code,
            ObjectBody::Instructions(_) => InstanceKind::Instructions,
            ObjectBody::PcDescriptors { .. } => InstanceKind::PcDescriptors,
            ObjectBody::ExceptionHandlers { .. } => InstanceKind::ExceptionHandlers,
            ObjectBody::Context { .. } => InstanceKind::Context,
            ObjectBody::ContextScope { .. } => InstanceKind::ContextScope,
            ObjectBody::Closure { .. } => InstanceKind::Closure,
            ObjectBody::UnhandledException { .. } => InstanceKind::UnhandledException,
            ObjectBody::Stacktrace { .. } => InstanceKind::Stacktrace,
            ObjectBody::Instance { .. } => InstanceKind::Instance,
        }
    }

    /// Size of the body in words, excluding the header. Fixed-size kinds
    /// report their field count; variable-size kinds derive the size from
    /// their own length.
    pub fn size_in_words(&self) -> u64 {
        fn bytes_to_words(bytes: usize) -> u64 {
            ((bytes + 7) / 8) as u64
        }
        match self {
            ObjectBody::Class(_) => 20,
            ObjectBody::Null => 0,
            ObjectBody::Bool(_) => 1,
            ObjectBody::Mint(_) => 1,
            ObjectBody::Bigint(b) => 2 + bytes_to_words(b.digits.len() * 4),
            ObjectBody::OneByteString { data, .. } => 2 + bytes_to_words(data.len()),
            ObjectBody::TwoByteString { data, .. } => 2 + bytes_to_words(data.len() * 2),
            ObjectBody::FourByteString { data, .. } => 2 + bytes_to_words(data.len() * 4),
            ObjectBody::Array(a) | ObjectBody::ImmutableArray(a) => 2 + a.data.len() as u64,
            ObjectBody::TypeArray { types } => 1 + types.len() as u64,
            ObjectBody::InstantiatedTypeArguments { .. } => 2,
            ObjectBody::ParameterizedType { .. } => 3,
            ObjectBody::TypeParameter { .. } => 2,
            ObjectBody::InstantiatedType { .. } => 2,
            ObjectBody::Function(_) => 18,
            ObjectBody::Field(_) => 8,
            ObjectBody::Script(_) => 4,
            ObjectBody::TokenStream { tokens } => 1 + 2 * tokens.len() as u64,
            ObjectBody::Library(_) => 12,
            ObjectBody::LibraryPrefix { .. } => 2,
            ObjectBody::Code(c) => 7 + c.pointer_offsets.len() as u64,
            ObjectBody::Instructions(i) => 2 + bytes_to_words(i.bytes.len()),
            ObjectBody::PcDescriptors { entries } => 1 + 5 * entries.len() as u64,
            ObjectBody::ExceptionHandlers { entries } => 1 + 2 * entries.len() as u64,
            ObjectBody::Context { slots, .. } => 2 + slots.len() as u64,
            ObjectBody::ContextScope { entries } => 1 + 6 * entries.len() as u64,
            ObjectBody::Closure { .. } => 2,
            ObjectBody::UnhandledException { .. } => 2,
            ObjectBody::Stacktrace { pcs } => 1 + pcs.len() as u64,
            ObjectBody::Instance {
                fields,
                ..
            } => 1 + fields.len() as u64,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bootstrap;
    use crate::value::{SMI_MAX, SMI_MIN};

    #[test]
    fn test_integer_boxing_boundaries() {
        let mut isolate = bootstrap::new_isolate();
        let (heap, store) = (&mut isolate.heap, &isolate.store);

        // In range: immediate.
        assert!(new_integer(heap, store, SMI_MAX as i128).is_smi());
        assert!(new_integer(heap, store, SMI_MIN as i128).is_smi());

        // One past the boundary: boxed as Mint.
        let above = new_integer(heap, store, SMI_MAX as i128 + 1);
        assert_eq!(heap.kind_of(above), InstanceKind::Mint);
        let below = new_integer(heap, store, SMI_MIN as i128 - 1);
        assert_eq!(heap.kind_of(below), InstanceKind::Mint);

        // Beyond 64 bits: Bigint.
        let huge = new_integer(heap, store, i128::from(i64::MAX) * 10);
        assert_eq!(heap.kind_of(huge), InstanceKind::Bigint);
    }

    #[test]
    fn test_class_of_value_covers_immediates() {
        let mut isolate = bootstrap::new_isolate();
        let smi = ObjectRef::smi(3);
        assert_eq!(
            class_of_value(&isolate.heap, &isolate.store, smi),
            isolate.store.smi_class
        );
        let mint = new_integer(&mut isolate.heap, &isolate.store, SMI_MAX as i128 + 1);
        assert_eq!(
            class_of_value(&isolate.heap, &isolate.store, mint),
            isolate.store.mint_class
        );
    }
}
