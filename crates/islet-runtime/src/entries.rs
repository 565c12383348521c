//! Runtime entries
//!
//! The fixed set of named runtime callables reachable from compiled
//! code. Each entry declares an argument count; `call_to_runtime` is
//! the stub path that marshals arguments into a `NativeArguments` frame
//! (readable through the handle API), invokes the uniform entry
//! function, and hands back the return value.

use crate::exceptions::{self, ExceptionKind};
use islet_core::{Function, Isolate, ObjectRef, VmError, VmResult};
use log::trace;

/// Argument frame of a runtime call.
pub struct NativeArguments {
    args: Vec<ObjectRef>,
    return_value: ObjectRef,
}

impl NativeArguments {
    /// Build a frame over the marshalled arguments.
    pub fn new(args: Vec<ObjectRef>) -> Self {
        NativeArguments {
            args,
            return_value: ObjectRef::NULL,
        }
    }

    /// Number of arguments.
    pub fn count(&self) -> usize {
        self.args.len()
    }

    /// The argument at `i`.
    pub fn at(&self, i: usize) -> ObjectRef {
        self.args[i]
    }

    /// Set the value returned to compiled code.
    pub fn set_return(&mut self, value: ObjectRef) {
        self.return_value = value;
    }

    /// The value returned to compiled code.
    pub fn return_value(&self) -> ObjectRef {
        self.return_value
    }
}

/// Signature shared by all runtime entries.
pub type RuntimeFunction = fn(&mut Isolate, &mut NativeArguments) -> VmResult<()>;

/// Descriptor of one runtime entry.
pub struct RuntimeEntry {
    /// Entry name as referenced by generated code.
    pub name: &'static str,
    /// Declared argument count.
    pub argument_count: usize,
    /// The uniform entry function.
    pub function: RuntimeFunction,
}

/// The runtime-entry table.
pub static RUNTIME_ENTRIES: &[RuntimeEntry] = &[
    RuntimeEntry {
        name: "AllocateArray",
        argument_count: 3,
        function: crate::allocation::allocate_array_entry,
    },
    RuntimeEntry {
        name: "AllocateObject",
        argument_count: 3,
        function: crate::allocation::allocate_object_entry,
    },
    RuntimeEntry {
        name: "InstantiateTypeArguments",
        argument_count: 2,
        function: crate::allocation::instantiate_type_arguments_entry,
    },
    RuntimeEntry {
        name: "AllocateClosure",
        argument_count: 1,
        function: crate::allocation::allocate_closure_entry,
    },
    RuntimeEntry {
        name: "AllocateStaticImplicitClosure",
        argument_count: 1,
        function: crate::allocation::allocate_static_implicit_closure_entry,
    },
    RuntimeEntry {
        name: "AllocateImplicitClosure",
        argument_count: 2,
        function: crate::allocation::allocate_implicit_closure_entry,
    },
    RuntimeEntry {
        name: "AllocateContext",
        argument_count: 1,
        function: crate::allocation::allocate_context_entry,
    },
    RuntimeEntry {
        name: "Instanceof",
        argument_count: 3,
        function: crate::allocation::instanceof_entry,
    },
    RuntimeEntry {
        name: "Throw",
        argument_count: 1,
        function: throw_entry,
    },
    RuntimeEntry {
        name: "ReThrow",
        argument_count: 2,
        function: rethrow_entry,
    },
    RuntimeEntry {
        name: "PatchStaticCall",
        argument_count: 0,
        function: crate::optimize::patch_static_call_entry,
    },
    RuntimeEntry {
        name: "ResolveCompileInstanceFunction",
        argument_count: 1,
        function: crate::dispatch::resolve_compile_instance_function_entry,
    },
    RuntimeEntry {
        name: "ResolvePatchInstanceCall",
        argument_count: 1,
        function: crate::dispatch::resolve_patch_instance_call_entry,
    },
    RuntimeEntry {
        name: "ResolveImplicitClosureFunction",
        argument_count: 2,
        function: crate::dispatch::resolve_implicit_closure_function_entry,
    },
    RuntimeEntry {
        name: "ResolveImplicitClosureThroughGetter",
        argument_count: 2,
        function: crate::dispatch::resolve_implicit_closure_through_getter_entry,
    },
    RuntimeEntry {
        name: "InvokeImplicitClosureFunction",
        argument_count: 3,
        function: crate::dispatch::invoke_implicit_closure_function_entry,
    },
    RuntimeEntry {
        name: "InvokeNoSuchMethodFunction",
        argument_count: 4,
        function: crate::dispatch::invoke_no_such_method_function_entry,
    },
    RuntimeEntry {
        name: "ReportObjectNotClosure",
        argument_count: 2,
        function: report_object_not_closure_entry,
    },
    RuntimeEntry {
        name: "ClosureArgumentMismatch",
        argument_count: 0,
        function: closure_argument_mismatch_entry,
    },
    RuntimeEntry {
        name: "StackOverflow",
        argument_count: 0,
        function: stack_overflow_entry,
    },
    RuntimeEntry {
        name: "OptimizeInvokedFunction",
        argument_count: 1,
        function: crate::optimize::optimize_invoked_function_entry,
    },
    RuntimeEntry {
        name: "FixCallersTarget",
        argument_count: 1,
        function: crate::optimize::fix_callers_target_entry,
    },
    RuntimeEntry {
        name: "Deoptimize",
        argument_count: 0,
        function: crate::optimize::deoptimize_entry,
    },
    RuntimeEntry {
        name: "TraceFunctionEntry",
        argument_count: 1,
        function: trace_function_entry_entry,
    },
    RuntimeEntry {
        name: "TraceFunctionExit",
        argument_count: 1,
        function: trace_function_exit_entry,
    },
];

static ENTRY_INDEX: once_cell::sync::Lazy<rustc_hash::FxHashMap<&'static str, &'static RuntimeEntry>> =
    once_cell::sync::Lazy::new(|| RUNTIME_ENTRIES.iter().map(|e| (e.name, e)).collect());

/// Look up an entry by name.
pub fn runtime_entry(name: &str) -> Option<&'static RuntimeEntry> {
    ENTRY_INDEX.get(name).copied()
}

/// The stub path from compiled code into the runtime: marshal `args`,
/// invoke the entry, return its value. Runtime calls are safepoints,
/// so a handle scope brackets the entry.
pub fn call_to_runtime(
    isolate: &mut Isolate,
    name: &str,
    args: &[ObjectRef],
) -> VmResult<ObjectRef> {
    let entry = runtime_entry(name)
        .ok_or_else(|| VmError::RuntimeError(format!("unknown runtime entry '{name}'")))?;
    assert_eq!(
        args.len(),
        entry.argument_count,
        "entry '{name}' argument count"
    );
    trace!("runtime call {name}");
    isolate.handles.enter_scope();
    let mut frame = NativeArguments::new(args.to_vec());
    let result = (entry.function)(isolate, &mut frame);
    isolate.handles.exit_scope();
    result.map(|()| frame.return_value())
}

fn throw_entry(isolate: &mut Isolate, arguments: &mut NativeArguments) -> VmResult<()> {
    let exception = arguments.at(0);
    let result = exceptions::throw_exception(isolate, exception);
    exceptions::unwind_result(isolate, result)
}

fn rethrow_entry(isolate: &mut Isolate, arguments: &mut NativeArguments) -> VmResult<()> {
    let exception = arguments.at(0);
    let stacktrace = arguments.at(1);
    let result = exceptions::rethrow_exception(isolate, exception, stacktrace);
    exceptions::unwind_result(isolate, result)
}

fn report_object_not_closure_entry(
    isolate: &mut Isolate,
    arguments: &mut NativeArguments,
) -> VmResult<()> {
    let bad_closure = arguments.at(0);
    log::warn!(
        "object {:?} is not a closure",
        bad_closure
    );
    let result = exceptions::throw_by_kind(isolate, ExceptionKind::ObjectNotClosure)?;
    exceptions::unwind_result(isolate, result)
}

fn closure_argument_mismatch_entry(
    isolate: &mut Isolate,
    _arguments: &mut NativeArguments,
) -> VmResult<()> {
    let result = exceptions::throw_by_kind(isolate, ExceptionKind::ClosureArgumentMismatch)?;
    exceptions::unwind_result(isolate, result)
}

/// Reserve unwinding headroom, throw, then restore the limit.
fn stack_overflow_entry(isolate: &mut Isolate, _arguments: &mut NativeArguments) -> VmResult<()> {
    let old_limit = isolate.stack_limit();
    isolate.adjust_stack_limit_for_exception();
    debug_assert_ne!(old_limit, isolate.stack_limit());
    let result = exceptions::throw_by_kind(isolate, ExceptionKind::StackOverflow)?;
    isolate.reset_stack_limit_after_exception();
    exceptions::unwind_result(isolate, result)
}

fn trace_function_entry_entry(
    isolate: &mut Isolate,
    arguments: &mut NativeArguments,
) -> VmResult<()> {
    let function = Function(arguments.at(0));
    let owner = function.desc(&isolate.heap).owner;
    let class_name = if owner.is_null() {
        String::new()
    } else {
        islet_core::Class(owner).name_str(&isolate.heap)
    };
    trace!("> entering '{}.{}'", class_name, function.name_str(&isolate.heap));
    Ok(())
}

fn trace_function_exit_entry(
    isolate: &mut Isolate,
    arguments: &mut NativeArguments,
) -> VmResult<()> {
    let function = Function(arguments.at(0));
    let owner = function.desc(&isolate.heap).owner;
    let class_name = if owner.is_null() {
        String::new()
    } else {
        islet_core::Class(owner).name_str(&isolate.heap)
    };
    trace!("< exiting '{}.{}'", class_name, function.name_str(&isolate.heap));
    Ok(())
}
