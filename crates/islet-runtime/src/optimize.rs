//! Adaptive recompilation and deoptimization
//!
//! Unoptimized code counts its invocations; past the threshold the
//! entry is redirected through OptimizeInvokedFunction, which installs
//! optimized code and disables the old entry by retargeting every IC
//! stub that pointed at it. Deoptimization reverses the trip: the
//! faulting frame's pc is rewritten to the matching checkpoint in the
//! unoptimized code and the optimized code is disabled the same way.

use crate::compiler;
use crate::entries::NativeArguments;
use crate::patcher;
use crate::stubs;
use islet_core::{Array, Code, Function, FunctionKind, Isolate, ObjectRef, VmError, VmResult};
use log::trace;

/// Retarget every IC stub registered on `old_code` from `old_code`'s
/// entry to `new_code`'s, and move the registry over. Static,
/// constructor and closure functions have no IC stubs.
pub fn disable_old_code(
    isolate: &mut Isolate,
    function: Function,
    old_code: Code,
    new_code: Code,
) {
    let registry = Array(old_code.desc(&isolate.heap).class_ic_stubs);
    let desc = function.desc(&isolate.heap);
    if desc.kind == FunctionKind::Closure
        || desc.kind == FunctionKind::Constructor
        || desc.is_static
    {
        debug_assert!(registry.is_empty(&isolate.heap));
        return;
    }
    let old_entry = old_code.entry_point(&isolate.heap);
    let new_entry = new_code.entry_point(&isolate.heap);
    let len = registry.len(&isolate.heap);
    let mut i = 0;
    while i + 1 < len {
        // Slot i holds the classes array, slot i + 1 the IC stub.
        let ic_stub = Code(registry.at(&isolate.heap, i + 1));
        stubs::patch_ic_targets(isolate, ic_stub, old_entry, new_entry);
        i += 2;
    }
    new_code.desc_mut(&mut isolate.heap).class_ic_stubs = registry.0;
    old_code.desc_mut(&mut isolate.heap).class_ic_stubs = isolate.store.empty_array;
}

/// OptimizeInvokedFunction(function): the unoptimized entry crossed the
/// invocation threshold.
pub fn optimize_invoked_function_entry(
    isolate: &mut Isolate,
    arguments: &mut NativeArguments,
) -> VmResult<()> {
    let function = Function(arguments.at(0));
    debug_assert!(function.desc(&isolate.heap).is_optimizable);
    let unoptimized_code = Code(function.desc(&isolate.heap).code);
    debug_assert!(!unoptimized_code.desc(&isolate.heap).is_optimized);
    let optimized_code = compiler::compile_optimized_function(isolate, function)?;
    disable_old_code(isolate, function, unoptimized_code, optimized_code);
    trace!(
        "optimized '{}' ({} invocations)",
        function.name_str(&isolate.heap),
        function.desc(&isolate.heap).invocation_counter
    );
    Ok(())
}

/// PatchStaticCall(): redirect the caller's static call site to the
/// callee's current entry point.
pub fn patch_static_call_entry(
    isolate: &mut Isolate,
    _arguments: &mut NativeArguments,
) -> VmResult<()> {
    let caller_pc = isolate
        .top_frame()
        .ok_or_else(|| VmError::RuntimeError("no caller frame".to_string()))?
        .pc;
    let (target_function, old_target) = patcher::get_static_call_at(isolate, caller_pc)?;
    let target_function = target_function
        .ok_or_else(|| VmError::RuntimeError("static call target has no code".to_string()))?;
    debug_assert!(target_function.has_code(&isolate.heap));
    let new_target = Code(target_function.desc(&isolate.heap).code).entry_point(&isolate.heap);
    // Repeated patching would mean the site is already current.
    debug_assert_ne!(old_target, new_target);
    patcher::patch_static_call_at(isolate, caller_pc, new_target)?;
    trace!("PatchStaticCall: {caller_pc:#x} -> {new_target:#x}");
    Ok(())
}

/// FixCallersTarget(function): patch the caller's static call site to
/// `function`'s freshly installed entry point.
pub fn fix_callers_target_entry(
    isolate: &mut Isolate,
    arguments: &mut NativeArguments,
) -> VmResult<()> {
    let function = Function(arguments.at(0));
    debug_assert!(function.has_code(&isolate.heap));
    let caller_pc = match isolate.top_frame() {
        Some(frame) => frame.pc,
        // Entry frame: nothing to patch.
        None => return Ok(()),
    };
    let (_, old_target) = patcher::get_static_call_at(isolate, caller_pc)?;
    let new_target = Code(function.desc(&isolate.heap).code).entry_point(&isolate.heap);
    debug_assert_ne!(old_target, new_target);
    patcher::patch_static_call_at(isolate, caller_pc, new_target)?;
    trace!("FixCallersTarget: {caller_pc:#x} -> {new_target:#x}");
    Ok(())
}

/// Deoptimize(): transfer the top frame from optimized code to the
/// matching checkpoint in the function's unoptimized code.
pub fn deoptimize_entry(isolate: &mut Isolate, _arguments: &mut NativeArguments) -> VmResult<()> {
    let frame_index = isolate
        .frames
        .len()
        .checked_sub(1)
        .ok_or_else(|| VmError::RuntimeError("no frame to deoptimize".to_string()))?;
    let caller_pc = isolate.frames[frame_index].pc;
    let optimized_code = isolate
        .code_index
        .lookup_code(caller_pc)
        .ok_or_else(|| VmError::RuntimeError("deopt pc not in any code".to_string()))?;
    let function = Function(optimized_code.desc(&isolate.heap).function);
    debug_assert!(!function.is_null());
    let unoptimized_code = Code(function.desc(&isolate.heap).unoptimized_code);
    debug_assert!(optimized_code.desc(&isolate.heap).is_optimized);
    debug_assert!(!unoptimized_code.desc(&isolate.heap).is_optimized);

    // The node id at the deoptimization point names the checkpoint to
    // continue from in the unoptimized code.
    let deopt_node_id = optimized_code.get_node_id_of_pc(&isolate.heap, caller_pc);
    debug_assert!(deopt_node_id >= 0);
    let continue_at_pc = unoptimized_code.get_deopt_pc_at_node_id(&isolate.heap, deopt_node_id);
    debug_assert_ne!(continue_at_pc, 0);
    trace!(
        "deoptimizing '{}' at {caller_pc:#x} id {deopt_node_id} -> {continue_at_pc:#x}",
        function.name_str(&isolate.heap)
    );
    isolate.frames[frame_index].pc = continue_at_pc;

    // Reset the counter so the function re-optimizes only after fresh
    // type feedback has accumulated.
    {
        let d = function.desc_mut(&mut isolate.heap);
        d.invocation_counter = 0;
        d.deoptimization_counter += 1;
    }

    // Re-enable the unoptimized code as the active entry.
    function.set_code(&mut isolate.heap, unoptimized_code.0);
    disable_old_code(isolate, function, optimized_code, unoptimized_code);
    Ok(())
}
