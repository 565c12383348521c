//! Runtime-call pipeline for the islet VM
//!
//! This crate owns everything between compiled code and the managed
//! world: code finalization and the code index, call-site patching,
//! inline-cache stubs, argument descriptors, per-class function caches,
//! the runtime entries invoked from compiled code, deoptimization and
//! exception unwinding.

#![warn(rust_2018_idioms)]

pub mod allocation;
pub mod assembler;
pub mod code;
pub mod compiler;
pub mod descriptor;
pub mod dispatch;
pub mod entries;
pub mod exceptions;
pub mod functions_cache;
pub mod optimize;
pub mod patcher;
pub mod resolver;
pub mod stubs;

pub use assembler::AssembledCode;
pub use code::finalize_code;
pub use compiler::CodeBuilder;
pub use descriptor::ArgumentsDescriptor;
pub use dispatch::{execute_instance_call, DispatchOutcome, DispatchPath};
pub use entries::{call_to_runtime, NativeArguments, RuntimeEntry, RUNTIME_ENTRIES};
pub use exceptions::ThrowResult;
pub use functions_cache::FunctionsCache;
pub use stubs::init_stubs;

/// Prepare an isolate for executing compiled code: install the resolve
/// and megamorphic stubs. Called once after isolate creation.
pub fn init_runtime(isolate: &mut islet_core::Isolate) -> islet_core::VmResult<()> {
    stubs::init_stubs(isolate)
}
