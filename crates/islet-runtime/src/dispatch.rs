//! Instance-call dispatch
//!
//! The inline-cache protocol. Every instance-call site starts out
//! targeting the resolve stub. The first invocation resolves (and if
//! needed compiles) the method on the receiver's class, builds an IC
//! stub holding the `(class, target)` pair, and patches the site.
//! Later misses re-enter the runtime, which recognizes the existing IC
//! stub, appends the new pair and repatches. Null receivers are never
//! added to an IC stub; all null dispatch funnels through megamorphic
//! lookup, which also hosts the implicit-closure and noSuchMethod
//! fallbacks.

use crate::compiler::compile_function;
use crate::descriptor::ArgumentsDescriptor;
use crate::entries::NativeArguments;
use crate::exceptions::{self, ExceptionKind};
use crate::functions_cache::FunctionsCache;
use crate::patcher;
use crate::resolver;
use crate::stubs;
use islet_core::{
    class_of_value, Class, Code, Context, Frame, Function, Isolate, ObjectBody, ObjectRef, Str,
    VmError, VmResult,
};
use log::trace;

/// How an instance call reached its target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchPath {
    /// The site re-entered the runtime to resolve and patch.
    Runtime,
    /// The IC stub matched the receiver class directly.
    IcHit,
    /// The megamorphic fallback resolved the call.
    Megamorphic,
}

/// Result of driving one instance call.
#[derive(Debug, Clone, Copy)]
pub struct DispatchOutcome {
    /// The code the call dispatched to, when a method was found.
    pub code: Option<Code>,
    /// The path the dispatch took.
    pub path: DispatchPath,
}

/// Resolve (and compile if needed) the target of the instance call the
/// caller frame sits at, consulting the receiver class's function cache
/// first. Returns None when no method matches.
fn resolve_compile_instance_call_target(
    isolate: &mut Isolate,
    receiver: ObjectRef,
) -> VmResult<Option<Code>> {
    let caller_pc = isolate
        .top_frame()
        .ok_or_else(|| VmError::RuntimeError("no caller frame".to_string()))?
        .pc;
    let (function_name, num_arguments, num_named_arguments, _target) =
        patcher::get_instance_call_at(isolate, caller_pc)?;
    debug_assert!(islet_core::symbols::is_symbol(
        &isolate.heap,
        &isolate.store,
        function_name
    ));
    let receiver_class = if receiver.is_null() {
        Class(isolate.store.object_class)
    } else {
        Class(class_of_value(&isolate.heap, &isolate.store, receiver))
    };

    let cache = FunctionsCache::new(isolate, receiver_class);
    if let Some(code) =
        cache.lookup_code(isolate, function_name, num_arguments, num_named_arguments)
    {
        return Ok(Some(code));
    }

    let function = match resolver::resolve_dynamic(
        isolate,
        receiver,
        function_name,
        num_arguments,
        num_named_arguments,
    ) {
        Some(function) => function,
        None => return Ok(None),
    };
    let code = compile_function(isolate, function)?;
    let cache = FunctionsCache::new(isolate, receiver_class);
    cache.add_compiled_function(isolate, function, num_arguments, num_named_arguments);
    Ok(Some(code))
}

/// ResolveCompileInstanceFunction(receiver): megamorphic-side lookup.
/// Returns the target code, or null when resolution fails.
pub fn resolve_compile_instance_function_entry(
    isolate: &mut Isolate,
    arguments: &mut NativeArguments,
) -> VmResult<()> {
    let receiver = arguments.at(0);
    let code = resolve_compile_instance_call_target(isolate, receiver)?;
    arguments.set_return(code.map_or(ObjectRef::NULL, |c| c.0));
    Ok(())
}

/// ResolvePatchInstanceCall(receiver): resolve the call at the caller
/// frame and patch the site to an IC stub (or to megamorphic lookup
/// when resolution fails or inline caches are disabled).
pub fn resolve_patch_instance_call_entry(
    isolate: &mut Isolate,
    arguments: &mut NativeArguments,
) -> VmResult<()> {
    let receiver = arguments.at(0);
    let code = resolve_compile_instance_call_target(isolate, receiver)?;
    let caller_pc = isolate
        .top_frame()
        .ok_or_else(|| VmError::RuntimeError("no caller frame".to_string()))?
        .pc;

    if (!receiver.is_null() && code.is_none()) || !isolate.flags.use_inline_caches {
        // No method found: either noSuchMethod or an implicit-closure
        // situation. Megamorphic lookup handles every such case.
        let megamorphic_entry = stubs::megamorphic_stub_entry(isolate);
        patcher::patch_instance_call_at(isolate, caller_pc, megamorphic_entry)?;
        trace!("IC: cannot resolve at {caller_pc:#x}, patched to megamorphic lookup");
        return Ok(());
    }

    let (_, _, _, caller_target) = patcher::get_instance_call_at(isolate, caller_pc)?;
    let receiver_class = Class(class_of_value(&isolate.heap, &isolate.store, receiver));
    let ic_miss = !stubs::in_resolve_stub(isolate, caller_target);

    let mut classes: Vec<ObjectRef> = Vec::new();
    let mut targets: Vec<ObjectRef> = Vec::new();
    if ic_miss {
        // The site already runs through an IC stub; widen it.
        let (existing_classes, existing_targets) =
            stubs::recognize_ic_stub(isolate, caller_target)
                .ok_or_else(|| VmError::RuntimeError("expected an IC stub target".to_string()))?;
        // The class list can be empty if the first patch occurred with
        // a null receiver; the current receiver must be new.
        debug_assert!(stubs::index_of_class(&existing_classes, receiver_class.0).is_none());
        debug_assert!(!receiver.is_null());
        classes = existing_classes;
        targets = existing_targets;
        let code = code.expect("miss with unresolvable method");
        targets.push(code.desc(&isolate.heap).function);
        classes.push(receiver_class.0);
    } else if !receiver.is_null() {
        // First patch of this site. Null receivers contribute no pair,
        // so the stub always misses into megamorphic lookup.
        let code = code.expect("resolved call without code");
        targets.push(code.desc(&isolate.heap).function);
        classes.push(receiver_class.0);
    }

    let ic_code = stubs::get_ic_stub(isolate, &classes, &targets)?;
    if let Some(caller_code) = isolate.code_index.lookup_code(caller_pc) {
        stubs::register_class_ic_stub(isolate, caller_code, &classes, ic_code);
    }
    let ic_entry = ic_code.entry_point(&isolate.heap);
    patcher::patch_instance_call_at(isolate, caller_pc, ic_entry)?;
    trace!(
        "IC {} at {caller_pc:#x} patched to {ic_entry:#x} ({} classes)",
        if ic_miss { "miss" } else { "patch" },
        classes.len()
    );
    Ok(())
}

/// Enter compiled code from the runtime: push the activation, count the
/// invocation, and deliver the callee's value. Execution of the body is
/// hosted, not interpreted; the seam returns null.
pub fn invoke(
    isolate: &mut Isolate,
    entry_pc: u64,
    _arguments_descriptor: ArgumentsDescriptor,
    _arguments: &[ObjectRef],
    context: ObjectRef,
) -> VmResult<ObjectRef> {
    let saved_context = isolate.top_context;
    isolate.top_context = context;
    isolate.frames.push(Frame { pc: entry_pc });
    if let Some(function) = isolate.code_index.lookup_function(&isolate.heap, entry_pc) {
        function.desc_mut(&mut isolate.heap).invocation_counter += 1;
    }
    isolate.frames.pop();
    isolate.top_context = saved_context;
    Ok(ObjectRef::NULL)
}

/// Invoke a dynamic method on a receiver.
pub fn invoke_dynamic(
    isolate: &mut Isolate,
    receiver: ObjectRef,
    function: Function,
    arguments: &[ObjectRef],
    argument_names: &[ObjectRef],
) -> VmResult<ObjectRef> {
    let code = compile_function(isolate, function)?;
    let descriptor =
        ArgumentsDescriptor::new(isolate, arguments.len() + 1, argument_names);
    let mut all_arguments = vec![receiver];
    all_arguments.extend_from_slice(arguments);
    let entry = code.entry_point(&isolate.heap);
    invoke(isolate, entry, descriptor, &all_arguments, ObjectRef::NULL)
}

/// A result that is an unhandled-exception wrapper is rethrown.
fn check_result_exception(isolate: &mut Isolate, result: ObjectRef) -> VmResult<ObjectRef> {
    if !result.is_null()
        && isolate.heap.kind_of(result) == islet_core::InstanceKind::UnhandledException
    {
        let (exception, stacktrace) = match &isolate.heap.get(result).body {
            ObjectBody::UnhandledException {
                exception,
                stacktrace,
            } => (*exception, *stacktrace),
            _ => unreachable!(),
        };
        let outcome = exceptions::rethrow_exception(isolate, exception, stacktrace);
        exceptions::unwind_result(isolate, outcome)?;
        return Ok(ObjectRef::NULL);
    }
    Ok(result)
}

/// ResolveImplicitClosureFunction(receiver, name): getter-style
/// closurization. `name` is a getter name; when the bare method exists
/// on the receiver, a closure over it is returned, else null.
pub fn resolve_implicit_closure_function_entry(
    isolate: &mut Isolate,
    arguments: &mut NativeArguments,
) -> VmResult<()> {
    let receiver = arguments.at(0);
    let original_name = arguments.at(1);
    if !Str(original_name).starts_with(&isolate.heap, "get:") {
        // Not a getter, so this cannot be method closurization.
        arguments.set_return(ObjectRef::NULL);
        return Ok(());
    }
    let bare_len = Str(original_name).len(&isolate.heap) - 4;
    let function_name = islet_core::symbols::new_symbol_substring(
        &mut isolate.heap,
        &mut isolate.store,
        original_name,
        4,
        bare_len,
    );
    let receiver_class = Class(class_of_value(&isolate.heap, &isolate.store, receiver));
    let function = match resolver::lookup_dynamic_in_chain(isolate, receiver_class, function_name)
    {
        Some(function) => function,
        None => {
            arguments.set_return(ObjectRef::NULL);
            return Ok(());
        }
    };
    let implicit = function.implicit_closure_function(&mut isolate.heap, &isolate.store);
    let id = isolate.id();
    let context = Context::new(&mut isolate.heap, &isolate.store, id, 1);
    context.set_at(&mut isolate.heap, 0, receiver);
    let closure = islet_core::new_closure(&mut isolate.heap, &isolate.store, implicit, context);
    arguments.set_return(closure);
    Ok(())
}

/// ResolveImplicitClosureThroughGetter(receiver, name): invoke the
/// getter `get:name` and expect a closure back; a non-closure result is
/// an object-not-closure error.
pub fn resolve_implicit_closure_through_getter_entry(
    isolate: &mut Isolate,
    arguments: &mut NativeArguments,
) -> VmResult<()> {
    let receiver = arguments.at(0);
    let original_name = arguments.at(1);
    let plain = Str(original_name).to_string(&isolate.heap);
    let getter_name = islet_core::symbols::new_symbol(
        &mut isolate.heap,
        &mut isolate.store,
        &format!("get:{plain}"),
    );
    let function = match resolver::resolve_dynamic(isolate, receiver, getter_name, 1, 0) {
        Some(function) => function,
        None => {
            // No getter: not an implicit closure; the caller proceeds
            // to noSuchMethod.
            arguments.set_return(ObjectRef::NULL);
            return Ok(());
        }
    };
    let result = invoke_dynamic(isolate, receiver, function, &[], &[])?;
    let result = check_result_exception(isolate, result)?;
    if !result.is_smi() && !result.is_null() {
        let cls = Class(isolate.heap.class_of(result));
        if cls.is_signature_class(&isolate.heap) {
            arguments.set_return(result);
            return Ok(());
        }
    }
    let outcome = exceptions::throw_by_kind(isolate, ExceptionKind::ObjectNotClosure)?;
    exceptions::unwind_result(isolate, outcome)
}

/// InvokeImplicitClosureFunction(closure, arg_descriptor, args):
/// tail-call into the closed-over function with the receiver slot
/// stripped from the descriptor.
pub fn invoke_implicit_closure_function_entry(
    isolate: &mut Isolate,
    arguments: &mut NativeArguments,
) -> VmResult<()> {
    let closure = arguments.at(0);
    let descriptor = ArgumentsDescriptor(arguments.at(1));
    let call_arguments = arguments.at(2);

    let (function, context) = match &isolate.heap.get(closure).body {
        ObjectBody::Closure { function, context } => (Function(*function), *context),
        _ => return Err(VmError::RuntimeError("not a closure".to_string())),
    };
    let code = compile_function(isolate, function)?;

    // The receiver has already been stripped from the arguments; the
    // descriptor follows suit. Canonicalizing again is pointless, but
    // the names stay symbols.
    let adjusted = descriptor.without_receiver(isolate);
    let args: Vec<ObjectRef> = {
        let array = islet_core::Array(call_arguments);
        (0..array.len(&isolate.heap))
            .map(|i| array.at(&isolate.heap, i))
            .collect()
    };
    let entry = code.entry_point(&isolate.heap);
    let result = invoke(isolate, entry, adjusted, &args, context)?;
    let result = check_result_exception(isolate, result)?;
    arguments.set_return(result);
    Ok(())
}

/// InvokeNoSuchMethodFunction(receiver, name, arg_descriptor, args):
/// the universal fallback dispatch.
pub fn invoke_no_such_method_function_entry(
    isolate: &mut Isolate,
    arguments: &mut NativeArguments,
) -> VmResult<()> {
    let receiver = arguments.at(0);
    let original_name = arguments.at(1);
    debug_assert!(!arguments.at(2).is_null());
    let original_arguments = arguments.at(3);

    let no_such_method = islet_core::symbols::new_symbol(
        &mut isolate.heap,
        &mut isolate.store,
        "noSuchMethod",
    );
    let function = resolver::resolve_dynamic(isolate, receiver, no_such_method, 3, 0)
        .ok_or_else(|| VmError::RuntimeError("noSuchMethod missing on root class".to_string()))?;
    let result = invoke_dynamic(
        isolate,
        receiver,
        function,
        &[original_name, original_arguments],
        &[],
    )?;
    let result = check_result_exception(isolate, result)?;
    arguments.set_return(result);
    Ok(())
}

/// Megamorphic lookup: resolve and invoke-or-fallback for calls the IC
/// path rejected (misses, null receivers, no such method).
pub fn megamorphic_lookup(
    isolate: &mut Isolate,
    receiver: ObjectRef,
) -> VmResult<DispatchOutcome> {
    let code_ref =
        crate::entries::call_to_runtime(isolate, "ResolveCompileInstanceFunction", &[receiver])?;
    let code = if code_ref.is_null() {
        None
    } else {
        Some(Code(code_ref))
    };
    match code {
        Some(code) => Ok(DispatchOutcome {
            code: Some(code),
            path: DispatchPath::Megamorphic,
        }),
        None => {
            // No method: the noSuchMethod path owns the call.
            let caller_pc = isolate.top_frame().expect("no caller frame").pc;
            let (name, num_arguments, _, _) = patcher::get_instance_call_at(isolate, caller_pc)?;
            let descriptor = ArgumentsDescriptor::new(isolate, num_arguments, &[]);
            let args =
                islet_core::Array::new(&mut isolate.heap, &isolate.store, 0, islet_core::Space::New);
            let mut frame = NativeArguments::new(vec![receiver, name, descriptor.0, args.0]);
            invoke_no_such_method_function_entry(isolate, &mut frame)?;
            Ok(DispatchOutcome {
                code: None,
                path: DispatchPath::Megamorphic,
            })
        }
    }
}

/// Drive the instance call at `caller_pc` with `receiver`: follow the
/// site's current target through the resolve stub, IC stub and
/// megamorphic stub exactly as their code sequences would.
pub fn execute_instance_call(
    isolate: &mut Isolate,
    caller_pc: u64,
    receiver: ObjectRef,
) -> VmResult<DispatchOutcome> {
    isolate.frames.push(Frame { pc: caller_pc });
    let result = execute_instance_call_inner(isolate, caller_pc, receiver);
    isolate.frames.pop();
    result
}

fn execute_instance_call_inner(
    isolate: &mut Isolate,
    caller_pc: u64,
    receiver: ObjectRef,
) -> VmResult<DispatchOutcome> {
    let mut went_through_runtime = false;
    loop {
        let (_, _, _, target) = patcher::get_instance_call_at(isolate, caller_pc)?;
        if stubs::in_resolve_stub(isolate, target) {
            crate::entries::call_to_runtime(isolate, "ResolvePatchInstanceCall", &[receiver])?;
            went_through_runtime = true;
            continue;
        }
        if stubs::in_megamorphic_stub(isolate, target) {
            return megamorphic_lookup(isolate, receiver);
        }
        let ic_code = isolate
            .code_index
            .lookup_code(target)
            .ok_or_else(|| VmError::RuntimeError("call target not in code index".to_string()))?;
        let receiver_class = class_of_value(&isolate.heap, &isolate.store, receiver);
        match stubs::ic_dispatch(&isolate.heap, ic_code, receiver_class) {
            Some(target_pc) => {
                let code = isolate
                    .code_index
                    .lookup_code(target_pc)
                    .ok_or_else(|| VmError::RuntimeError("IC target vanished".to_string()))?;
                if let Some(function) =
                    isolate.code_index.lookup_function(&isolate.heap, target_pc)
                {
                    function.desc_mut(&mut isolate.heap).invocation_counter += 1;
                }
                return Ok(DispatchOutcome {
                    code: Some(code),
                    path: if went_through_runtime {
                        DispatchPath::Runtime
                    } else {
                        DispatchPath::IcHit
                    },
                });
            }
            None => {
                if receiver.is_null() {
                    // Null receivers always miss into megamorphic
                    // lookup; the IC never learns their class.
                    return megamorphic_lookup(isolate, receiver);
                }
                crate::entries::call_to_runtime(
                    isolate,
                    "ResolvePatchInstanceCall",
                    &[receiver],
                )?;
                went_through_runtime = true;
            }
        }
    }
}
