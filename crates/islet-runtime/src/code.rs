//! Code finalization
//!
//! Turns an assembled byte buffer into a `Code` artifact: allocates the
//! `Instructions` object in executable space, copies the bytes in,
//! resolves every embedded handle to the raw object reference it names,
//! attaches the pc-descriptor and exception-handler tables (rebased to
//! the assigned pc range) and registers the range with the isolate's
//! code index table.

use crate::assembler::AssembledCode;
use islet_core::{
    Code, CodeDesc, ExceptionHandlerEntry, Handle, Instructions, InstructionsDesc, Isolate,
    ObjectBody, ObjectRef, PcDescriptor, Space, VmResult,
};
use log::debug;

/// Finalize `assembled` into a `Code` object. Descriptor and handler
/// pcs are buffer-relative on entry and absolute on return.
pub fn finalize_code(
    isolate: &mut Isolate,
    name: &str,
    assembled: AssembledCode,
    descriptors: Vec<PcDescriptor>,
    handlers: Vec<ExceptionHandlerEntry>,
) -> VmResult<Code> {
    let (bytes, pointer_offsets) = assembled.finish();
    let size = bytes.len();
    let base_pc = isolate.heap.assign_pc_range(size);

    let instructions = isolate.heap.allocate(
        isolate.store.instructions_class,
        Space::Executable,
        ObjectBody::Instructions(InstructionsDesc {
            code: ObjectRef::NULL,
            base_pc,
            bytes,
        }),
    );

    // Resolve every embedded handle first; only then open the
    // executable window and replace the slots with raw references.
    let mut resolved = Vec::with_capacity(pointer_offsets.len());
    for &offset in &pointer_offsets {
        let raw = Instructions(instructions).read_u64_at(&isolate.heap, offset);
        let handle = Handle::from_raw(raw as u32);
        resolved.push(isolate.handles.value(handle)?);
    }
    isolate.heap.begin_instructions_write();
    for (&offset, target) in pointer_offsets.iter().zip(&resolved) {
        Instructions(instructions).write_u64_at(&mut isolate.heap, offset, target.raw());
    }
    isolate.heap.end_instructions_write();

    let rebase = |pc: u64| base_pc + pc;
    let descriptors: Vec<PcDescriptor> = descriptors
        .into_iter()
        .map(|mut d| {
            d.pc = rebase(d.pc);
            d
        })
        .collect();
    let handlers: Vec<ExceptionHandlerEntry> = handlers
        .into_iter()
        .map(|mut h| {
            h.handler_pc = rebase(h.handler_pc);
            h
        })
        .collect();

    let descriptor_table = isolate.heap.allocate(
        isolate.store.pc_descriptors_class,
        Space::Old,
        ObjectBody::PcDescriptors {
            entries: descriptors,
        },
    );
    let handler_table = isolate.heap.allocate(
        isolate.store.exception_handlers_class,
        Space::Old,
        ObjectBody::ExceptionHandlers { entries: handlers },
    );

    let code = isolate.heap.allocate(
        isolate.store.code_class,
        Space::Old,
        ObjectBody::Code(CodeDesc {
            instructions,
            pointer_offsets,
            pc_descriptors: descriptor_table,
            exception_handlers: handler_table,
            function: ObjectRef::NULL,
            ic_data: ObjectRef::NULL,
            class_ic_stubs: isolate.store.empty_array,
            is_optimized: false,
        }),
    );
    match &mut isolate.heap.get_mut(instructions).body {
        ObjectBody::Instructions(d) => d.code = code,
        _ => unreachable!(),
    }

    let code = Code(code);
    isolate.code_index.register(&isolate.heap, code);
    debug!(
        "finalized code '{}' at {:#x}+{}",
        name,
        base_pc,
        code.size(&isolate.heap)
    );
    Ok(code)
}
