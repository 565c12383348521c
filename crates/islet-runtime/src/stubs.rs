//! Stub code
//!
//! The distinguished code sequences linking call sites to the runtime:
//! the resolve stub (initial target of every instance-call site), the
//! megamorphic-lookup stub, per-class allocation stubs, and inline-cache
//! stubs. An IC stub encodes `(class, target)` pairs; executing it
//! compares the receiver's class against each recorded class in order
//! and jumps to the matching target, falling through on no match.

use crate::assembler::AssembledCode;
use crate::code::finalize_code;
use islet_core::{Array, Code, Function, Heap, Isolate, ObjectRef, Space, VmResult};

/// First byte of the resolve (call-instance-function) stub.
pub const STUB_RESOLVE: u8 = 0xD1;
/// First byte of the megamorphic-lookup stub.
pub const STUB_MEGAMORPHIC: u8 = 0xD2;
/// First byte of an inline-cache stub.
pub const STUB_IC: u8 = 0xD3;
/// First byte of a per-class allocation stub.
pub const STUB_ALLOCATE: u8 = 0xD4;

const IC_HEADER_SIZE: usize = 5;
const IC_PAIR_SIZE: usize = 16;

/// Install the resolve and megamorphic stubs into the object store.
pub fn init_stubs(isolate: &mut Isolate) -> VmResult<()> {
    let mut asm = AssembledCode::new();
    asm.emit_u8(STUB_RESOLVE);
    let resolve = finalize_code(isolate, "CallInstanceFunction", asm, Vec::new(), Vec::new())?;
    isolate.store.call_instance_function_stub = resolve.0;

    let mut asm = AssembledCode::new();
    asm.emit_u8(STUB_MEGAMORPHIC);
    let megamorphic = finalize_code(isolate, "MegamorphicLookup", asm, Vec::new(), Vec::new())?;
    isolate.store.megamorphic_lookup_stub = megamorphic.0;
    Ok(())
}

/// Entry point of the resolve stub.
pub fn resolve_stub_entry(isolate: &Isolate) -> u64 {
    Code(isolate.store.call_instance_function_stub).entry_point(&isolate.heap)
}

/// Entry point of the megamorphic-lookup stub.
pub fn megamorphic_stub_entry(isolate: &Isolate) -> u64 {
    Code(isolate.store.megamorphic_lookup_stub).entry_point(&isolate.heap)
}

/// Whether `pc` lies inside the resolve stub.
pub fn in_resolve_stub(isolate: &Isolate, pc: u64) -> bool {
    Code(isolate.store.call_instance_function_stub).contains_pc(&isolate.heap, pc)
}

/// Whether `pc` lies inside the megamorphic-lookup stub.
pub fn in_megamorphic_stub(isolate: &Isolate, pc: u64) -> bool {
    Code(isolate.store.megamorphic_lookup_stub).contains_pc(&isolate.heap, pc)
}

/// Build an IC stub for parallel `classes` and `target_functions`.
/// Every target must have code installed.
pub fn get_ic_stub(
    isolate: &mut Isolate,
    classes: &[ObjectRef],
    target_functions: &[ObjectRef],
) -> VmResult<Code> {
    assert_eq!(classes.len(), target_functions.len());
    let targets: Vec<u64> = target_functions
        .iter()
        .map(|f| {
            let code = Function(*f).desc(&isolate.heap).code;
            Code(code).entry_point(&isolate.heap)
        })
        .collect();

    isolate.handles.enter_scope();
    let mut asm = AssembledCode::new();
    asm.emit_u8(STUB_IC);
    asm.emit_u32(classes.len() as u32);
    for (class, target) in classes.iter().zip(&targets) {
        let handle = isolate.new_handle(*class);
        asm.emit_object(handle);
        asm.emit_u64(*target);
    }
    let code = finalize_code(isolate, "InlineCache", asm, Vec::new(), Vec::new());
    isolate.handles.exit_scope();
    code
}

/// Decode the IC stub whose entry point is `target_pc`. Returns the
/// recorded classes and target functions in insertion order, or None
/// when `target_pc` does not name an IC stub.
pub fn recognize_ic_stub(
    isolate: &Isolate,
    target_pc: u64,
) -> Option<(Vec<ObjectRef>, Vec<ObjectRef>)> {
    let code = isolate.code_index.lookup_code(target_pc)?;
    let instructions = code.instructions(&isolate.heap);
    if instructions.entry_point(&isolate.heap) != target_pc
        || instructions.size(&isolate.heap) < IC_HEADER_SIZE
    {
        return None;
    }
    let bytes = &instructions.desc(&isolate.heap).bytes;
    if bytes[0] != STUB_IC {
        return None;
    }
    let count = u32::from_le_bytes(bytes[1..5].try_into().unwrap()) as usize;
    let mut classes = Vec::with_capacity(count);
    let mut functions = Vec::with_capacity(count);
    for i in 0..count {
        let offset = IC_HEADER_SIZE + i * IC_PAIR_SIZE;
        let class_raw = instructions.read_u64_at(&isolate.heap, offset);
        classes.push(ObjectRef::from_raw(class_raw));
        let target = instructions.read_u64_at(&isolate.heap, offset + 8);
        let target_code = isolate
            .code_index
            .lookup_code(target)
            .expect("IC target not in code index");
        functions.push(target_code.desc(&isolate.heap).function);
    }
    Some((classes, functions))
}

/// Position of `class` in an IC class list, or None.
pub fn index_of_class(classes: &[ObjectRef], class: ObjectRef) -> Option<usize> {
    classes.iter().position(|c| *c == class)
}

/// Execute an IC stub against a receiver class: the target pc of the
/// matching pair, or None for a miss (fall through to megamorphic
/// lookup).
pub fn ic_dispatch(heap: &Heap, ic_code: Code, receiver_class: ObjectRef) -> Option<u64> {
    let instructions = ic_code.instructions(heap);
    let bytes = &instructions.desc(heap).bytes;
    debug_assert_eq!(bytes[0], STUB_IC);
    let count = u32::from_le_bytes(bytes[1..5].try_into().unwrap()) as usize;
    for i in 0..count {
        let offset = IC_HEADER_SIZE + i * IC_PAIR_SIZE;
        let class = ObjectRef::from_raw(instructions.read_u64_at(heap, offset));
        if class == receiver_class {
            return Some(instructions.read_u64_at(heap, offset + 8));
        }
    }
    None
}

/// Retarget every pair of `ic_code` whose target equals `old_entry` to
/// `new_entry`; used when a function's code is replaced.
pub fn patch_ic_targets(isolate: &mut Isolate, ic_code: Code, old_entry: u64, new_entry: u64) {
    let instructions = ic_code.instructions(&isolate.heap);
    let count = {
        let bytes = &instructions.desc(&isolate.heap).bytes;
        debug_assert_eq!(bytes[0], STUB_IC);
        u32::from_le_bytes(bytes[1..5].try_into().unwrap()) as usize
    };
    isolate.heap.begin_instructions_write();
    for i in 0..count {
        let offset = IC_HEADER_SIZE + i * IC_PAIR_SIZE + 8;
        if instructions.read_u64_at(&isolate.heap, offset) == old_entry {
            instructions.write_u64_at(&mut isolate.heap, offset, new_entry);
        }
    }
    isolate.heap.end_instructions_write();
}

/// Register an IC stub created for a call site in `caller_code`,
/// remembering the classes it covers. The registry is consulted when
/// the caller's targets are disabled.
pub fn register_class_ic_stub(
    isolate: &mut Isolate,
    caller_code: Code,
    classes: &[ObjectRef],
    ic_code: Code,
) {
    let classes_array = Array::new(&mut isolate.heap, &isolate.store, classes.len(), Space::Old);
    for (i, class) in classes.iter().enumerate() {
        classes_array.set_at(&mut isolate.heap, i, *class);
    }
    let registry = Array(caller_code.desc(&isolate.heap).class_ic_stubs);
    let len = registry.len(&isolate.heap);
    let grown = Array::grow(&mut isolate.heap, &isolate.store, registry, len + 2);
    grown.set_at(&mut isolate.heap, len, classes_array.0);
    grown.set_at(&mut isolate.heap, len + 1, ic_code.0);
    caller_code.desc_mut(&mut isolate.heap).class_ic_stubs = grown.0;
}

/// Build the allocation stub for `cls`: inline bump-allocation fast
/// path falling through to the AllocateObject runtime entry.
pub fn get_allocation_stub(isolate: &mut Isolate, cls: islet_core::Class) -> VmResult<Code> {
    let existing = cls.desc(&isolate.heap).allocation_stub;
    if !existing.is_null() {
        return Ok(Code(existing));
    }
    isolate.handles.enter_scope();
    let mut asm = AssembledCode::new();
    asm.emit_u8(STUB_ALLOCATE);
    let handle = isolate.new_handle(cls.0);
    asm.emit_object(handle);
    let code = finalize_code(isolate, "AllocationStub", asm, Vec::new(), Vec::new());
    isolate.handles.exit_scope();
    let code = code?;
    cls.desc_mut(&mut isolate.heap).allocation_stub = code.0;
    Ok(code)
}
