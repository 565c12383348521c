//! Code construction and the compile seam
//!
//! The front end and code generator are external collaborators; the
//! runtime only needs functions to have installable code with call
//! sites, pc descriptors and handler tables. `CodeBuilder` assembles
//! such code from the fixed site encodings, and `compile_function` is
//! the seam the dispatch pipeline calls when it needs a resolved method
//! compiled: it installs a minimal unoptimized body on demand.

use crate::assembler::AssembledCode;
use crate::code::finalize_code;
use crate::patcher::{OP_INSTANCE_CALL, OP_STATIC_CALL};
use islet_core::{
    Code, ExceptionHandlerEntry, Function, Isolate, ObjectRef, PcDescriptor, PcDescriptorKind,
    VmResult,
};

/// Opcode of a function prologue.
pub const OP_PROLOGUE: u8 = 0xC0;
/// Opcode of a deoptimization checkpoint.
pub const OP_DEOPT_POINT: u8 = 0xC1;
/// Opcode of a plain statement site (try coverage, handlers).
pub const OP_STATEMENT: u8 = 0xC2;

/// Builder for compiled-code artifacts in the fixed site encoding.
pub struct CodeBuilder {
    name: String,
    asm: AssembledCode,
    descriptors: Vec<PcDescriptor>,
    handlers: Vec<ExceptionHandlerEntry>,
    optimized: bool,
    // Handle scopes opened for embedded references; they stay open
    // until finalization has resolved the handles.
    open_scopes: usize,
}

impl CodeBuilder {
    /// Start building code named `name`.
    pub fn new(name: &str) -> Self {
        CodeBuilder {
            name: name.to_string(),
            asm: AssembledCode::new(),
            descriptors: Vec::new(),
            handlers: Vec::new(),
            optimized: false,
            open_scopes: 0,
        }
    }

    /// Mark the built code as optimized.
    pub fn set_optimized(&mut self) {
        self.optimized = true;
    }

    /// Emit the function prologue (stack-limit check site).
    pub fn prologue(&mut self) {
        self.asm.emit_u8(OP_PROLOGUE);
    }

    /// Emit an instance-call site targeting `initial_target` (normally
    /// the resolve stub). Returns the site's offset within the code.
    pub fn instance_call(
        &mut self,
        isolate: &mut Isolate,
        name: ObjectRef,
        num_arguments: usize,
        num_named_arguments: usize,
        initial_target: u64,
        node_id: i64,
        token_index: i64,
    ) -> u64 {
        let offset = self.asm.code_size() as u64;
        self.descriptors.push(PcDescriptor {
            pc: offset,
            kind: PcDescriptorKind::IcCall,
            node_id,
            token_index,
            try_index: -1,
        });
        self.asm.emit_u8(OP_INSTANCE_CALL);
        // The name is an embedded reference; it travels as a handle
        // until finalization.
        isolate.handles.enter_scope();
        self.open_scopes += 1;
        let handle = isolate.new_handle(name);
        self.asm.emit_object(handle);
        self.asm.emit_u32(num_arguments as u32);
        self.asm.emit_u32(num_named_arguments as u32);
        self.asm.emit_u64(initial_target);
        offset
    }

    /// Emit a static-call site targeting `target`. Returns the site's
    /// offset.
    pub fn static_call(&mut self, target: u64, node_id: i64, token_index: i64) -> u64 {
        let offset = self.asm.code_size() as u64;
        self.descriptors.push(PcDescriptor {
            pc: offset,
            kind: PcDescriptorKind::Other,
            node_id,
            token_index,
            try_index: -1,
        });
        self.asm.emit_u8(OP_STATIC_CALL);
        self.asm.emit_u64(target);
        offset
    }

    /// Emit a deoptimization checkpoint. Returns the checkpoint's
    /// offset.
    pub fn deopt_point(&mut self, node_id: i64, token_index: i64) -> u64 {
        let offset = self.asm.code_size() as u64;
        self.descriptors.push(PcDescriptor {
            pc: offset,
            kind: PcDescriptorKind::Deopt,
            node_id,
            token_index,
            try_index: -1,
        });
        self.asm.emit_u8(OP_DEOPT_POINT);
        offset
    }

    /// Record the start of the patchable region.
    pub fn patch_code_marker(&mut self) -> u64 {
        let offset = self.asm.code_size() as u64;
        self.descriptors.push(PcDescriptor {
            pc: offset,
            kind: PcDescriptorKind::PatchCode,
            node_id: -1,
            token_index: -1,
            try_index: -1,
        });
        offset
    }

    /// Emit a statement site covered by try block `try_index`.
    pub fn covered_by_try(&mut self, try_index: i64, node_id: i64, token_index: i64) -> u64 {
        let offset = self.asm.code_size() as u64;
        self.descriptors.push(PcDescriptor {
            pc: offset,
            kind: PcDescriptorKind::Other,
            node_id,
            token_index,
            try_index,
        });
        self.asm.emit_u8(OP_STATEMENT);
        offset
    }

    /// Append an exception handler for `try_index` at the current pc.
    pub fn handler(&mut self, try_index: i64) -> u64 {
        let offset = self.asm.code_size() as u64;
        self.handlers.push(ExceptionHandlerEntry {
            try_index,
            handler_pc: offset,
        });
        self.asm.emit_u8(OP_STATEMENT);
        offset
    }

    /// Finalize into a `Code` object.
    pub fn finalize(self, isolate: &mut Isolate) -> VmResult<Code> {
        let code = finalize_code(isolate, &self.name, self.asm, self.descriptors, self.handlers)?;
        if self.optimized {
            code.desc_mut(&mut isolate.heap).is_optimized = true;
        }
        for _ in 0..self.open_scopes {
            isolate.handles.exit_scope();
        }
        Ok(code)
    }
}

/// Compile `function` if it has no code: a minimal unoptimized body.
/// Returns the installed code.
pub fn compile_function(isolate: &mut Isolate, function: Function) -> VmResult<Code> {
    if function.has_code(&isolate.heap) {
        return Ok(Code(function.desc(&isolate.heap).code));
    }
    let name = function.name_str(&isolate.heap);
    let mut builder = CodeBuilder::new(&name);
    builder.prologue();
    let code = builder.finalize(isolate)?;
    code.desc_mut(&mut isolate.heap).function = function.0;
    function.set_code(&mut isolate.heap, code.0);
    Ok(code)
}

/// Compile an optimized body for `function`, mirroring the
/// deoptimization checkpoints of its unoptimized code so control can
/// transfer between the two at matching node ids.
pub fn compile_optimized_function(isolate: &mut Isolate, function: Function) -> VmResult<Code> {
    let unoptimized = Code(function.desc(&isolate.heap).unoptimized_code);
    debug_assert!(!unoptimized.is_null());
    let name = function.name_str(&isolate.heap);
    let mut builder = CodeBuilder::new(&name);
    builder.set_optimized();
    builder.prologue();
    for d in unoptimized.pc_descriptor_entries(&isolate.heap) {
        if d.kind == PcDescriptorKind::Deopt {
            builder.deopt_point(d.node_id, d.token_index);
        }
    }
    let code = builder.finalize(isolate)?;
    code.desc_mut(&mut isolate.heap).function = function.0;
    function.set_code(&mut isolate.heap, code.0);
    Ok(code)
}
