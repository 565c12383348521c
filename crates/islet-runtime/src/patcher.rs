//! Call-site patching
//!
//! Compiled code encodes its call sites as fixed-shape records so the
//! runtime can read them back and redirect their targets:
//!
//! ```text
//! static call:    A1 <target:u64>
//! instance call:  A2 <name:u64 (embedded ref)> <argc:u32> <named:u32> <target:u64>
//! ```
//!
//! The patcher refuses to touch bytes that hold embedded object
//! references.

use islet_core::{Code, Function, Instructions, Isolate, ObjectRef, VmError, VmResult};

/// Opcode of a static call site.
pub const OP_STATIC_CALL: u8 = 0xA1;
/// Opcode of an instance call site.
pub const OP_INSTANCE_CALL: u8 = 0xA2;

/// Byte size of a static call site.
pub const STATIC_CALL_SIZE: usize = 9;
/// Byte size of an instance call site.
pub const INSTANCE_CALL_SIZE: usize = 25;

fn site(isolate: &Isolate, pc: u64) -> VmResult<(Code, usize)> {
    let code = isolate
        .code_index
        .lookup_code(pc)
        .ok_or_else(|| VmError::RuntimeError(format!("pc {pc:#x} not in any code")))?;
    let offset = (pc - code.entry_point(&isolate.heap)) as usize;
    Ok((code, offset))
}

fn opcode_at(isolate: &Isolate, code: Code, offset: usize) -> u8 {
    code.instructions(&isolate.heap).desc(&isolate.heap).bytes[offset]
}

/// Decode the static call site at `pc`: the current target's function
/// (when the target pc maps to installed code) and the raw target pc.
pub fn get_static_call_at(isolate: &Isolate, pc: u64) -> VmResult<(Option<Function>, u64)> {
    let (code, offset) = site(isolate, pc)?;
    if opcode_at(isolate, code, offset) != OP_STATIC_CALL {
        return Err(VmError::RuntimeError(format!(
            "no static call at {pc:#x}"
        )));
    }
    let instructions = code.instructions(&isolate.heap);
    let target = instructions.read_u64_at(&isolate.heap, offset + 1);
    let function = isolate.code_index.lookup_function(&isolate.heap, target);
    Ok((function, target))
}

/// Redirect the static call site at `pc` to `new_target`.
pub fn patch_static_call_at(isolate: &mut Isolate, pc: u64, new_target: u64) -> VmResult<()> {
    let (code, offset) = site(isolate, pc)?;
    if opcode_at(isolate, code, offset) != OP_STATIC_CALL {
        return Err(VmError::RuntimeError(format!(
            "no static call at {pc:#x}"
        )));
    }
    write_target(isolate, code, offset + 1, new_target)
}

/// Decode the instance call site at `pc`:
/// `(function_name, num_arguments, num_named_arguments, target_pc)`.
pub fn get_instance_call_at(
    isolate: &Isolate,
    pc: u64,
) -> VmResult<(ObjectRef, usize, usize, u64)> {
    let (code, offset) = site(isolate, pc)?;
    if opcode_at(isolate, code, offset) != OP_INSTANCE_CALL {
        return Err(VmError::RuntimeError(format!(
            "no instance call at {pc:#x}"
        )));
    }
    let instructions = code.instructions(&isolate.heap);
    let name = ObjectRef::from_raw(instructions.read_u64_at(&isolate.heap, offset + 1));
    let bytes = &instructions.desc(&isolate.heap).bytes;
    let num_arguments = u32::from_le_bytes(bytes[offset + 9..offset + 13].try_into().unwrap());
    let num_named = u32::from_le_bytes(bytes[offset + 13..offset + 17].try_into().unwrap());
    let target = instructions.read_u64_at(&isolate.heap, offset + 17);
    Ok((name, num_arguments as usize, num_named as usize, target))
}

/// Redirect the instance call site at `pc` to `new_target`.
pub fn patch_instance_call_at(isolate: &mut Isolate, pc: u64, new_target: u64) -> VmResult<()> {
    let (code, offset) = site(isolate, pc)?;
    if opcode_at(isolate, code, offset) != OP_INSTANCE_CALL {
        return Err(VmError::RuntimeError(format!(
            "no instance call at {pc:#x}"
        )));
    }
    write_target(isolate, code, offset + 17, new_target)
}

fn write_target(isolate: &mut Isolate, code: Code, offset: usize, target: u64) -> VmResult<()> {
    if !code.area_free_of_embedded_pointers(&isolate.heap, offset, offset + 8) {
        return Err(VmError::RuntimeError(
            "refusing to patch over an embedded reference".to_string(),
        ));
    }
    let instructions = Instructions(code.desc(&isolate.heap).instructions);
    isolate.heap.begin_instructions_write();
    instructions.write_u64_at(&mut isolate.heap, offset, target);
    isolate.heap.end_instructions_write();
    Ok(())
}
