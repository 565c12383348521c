//! islet VM core runtime
//!
//! This crate provides the managed core of the islet VM:
//! - Tagged value representation (small integers and heap references)
//! - Per-isolate heap, object model and visitor dispatch
//! - Zones (arena allocation) and handle scopes
//! - Isolate lifecycle, message queue and stack-limit bookkeeping
//! - Symbol table and library registry

#![warn(rust_2018_idioms)]

pub mod bootstrap;
pub mod handles;
pub mod heap;
pub mod isolate;
pub mod library;
pub mod object;
pub mod object_store;
pub mod symbols;
pub mod value;
pub mod verifier;
pub mod visitor;
pub mod zone;

pub use handles::{Handle, Handles};
pub use heap::{Heap, Space};
pub use isolate::{Flags, Frame, Isolate, Message, MessageQueue};
pub use library::{Library, LibraryDesc, NativeResolver};
pub use object::{
    class_of_value, new_closure, new_integer, Array, ArrayDesc, BigintDesc, Class, ClassDesc,
    ClassState, Code,
    CodeDesc, CodeIndexTable, Context, ContextScope, ContextScopeEntry, ExceptionHandlerEntry,
    Field, FieldDesc, Function, FunctionDesc, FunctionKind, HeapObject, InstanceKind, Instructions,
    InstructionsDesc, ObjectBody, PcDescriptor, PcDescriptorKind, Script, ScriptDesc, ScriptKind,
    Str, TokenDesc, TokenKind, Type, TypeArgs, TypeState,
};
pub use object_store::ObjectStore;
pub use value::ObjectRef;
pub use verifier::verify_heap;
pub use zone::Zone;

/// VM execution errors
#[derive(Debug, thiserror::Error)]
pub enum VmError {
    /// Stack overflow
    #[error("Stack overflow")]
    StackOverflow,

    /// A handle index that does not refer to a live handle slot
    #[error("Invalid handle")]
    InvalidHandle,

    /// Heap verification failure
    #[error("Heap verification failed: {0}")]
    Verification(String),

    /// An exception left the topmost frame without being caught
    #[error("Unhandled exception")]
    UncaughtException {
        /// The thrown exception instance
        exception: ObjectRef,
        /// The stacktrace captured while unwinding
        stacktrace: ObjectRef,
    },

    /// Runtime error
    #[error("Runtime error: {0}")]
    RuntimeError(String),
}

/// VM execution result
pub type VmResult<T> = Result<T, VmError>;
