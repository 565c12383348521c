//! Compiled-code artifacts
//!
//! A `Code` descriptor owns an `Instructions` object in executable
//! space, the list of offsets at which the instruction bytes embed heap
//! references (so the visitor can reach them), a pc-descriptor table and
//! an exception-handler table. Pc-descriptor queries scan linearly; the
//! tables are small (per frame).

use crate::heap::Heap;
use crate::object::ObjectBody;
use crate::value::ObjectRef;

/// Kinds of pc descriptors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PcDescriptorKind {
    /// Deoptimization checkpoint
    Deopt,
    /// Start of the patchable region
    PatchCode,
    /// Inline-cache call site
    IcCall,
    /// Anything else worth mapping back to source
    Other,
}

/// One pc-descriptor record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PcDescriptor {
    /// Pc this record describes.
    pub pc: u64,
    /// Record kind.
    pub kind: PcDescriptorKind,
    /// AST node id, or -1.
    pub node_id: i64,
    /// Source token index, or -1.
    pub token_index: i64,
    /// Enclosing try block, or -1.
    pub try_index: i64,
}

/// One exception-handler record: `(try_index, handler_pc)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExceptionHandlerEntry {
    /// Try-block index this handler covers.
    pub try_index: i64,
    /// Pc of the handler.
    pub handler_pc: u64,
}

/// Body of a code descriptor.
pub struct CodeDesc {
    /// The instructions object, in executable space.
    pub instructions: ObjectRef,
    /// Byte offsets of embedded heap references within the instructions.
    pub pointer_offsets: Vec<usize>,
    /// Pc-descriptor table, or null.
    pub pc_descriptors: ObjectRef,
    /// Exception-handler table, or null.
    pub exception_handlers: ObjectRef,
    /// The function this code belongs to, or null for stubs.
    pub function: ObjectRef,
    /// Inline-cache data gathered at call sites (an Array), or null.
    pub ic_data: ObjectRef,
    /// Registry of IC stubs created for call sites in this code: an
    /// Array of alternating (classes-array, ic-stub-code) pairs.
    pub class_ic_stubs: ObjectRef,
    /// Whether this is optimized code.
    pub is_optimized: bool,
}

/// Body of an instructions object.
pub struct InstructionsDesc {
    /// Back-reference to the owning code descriptor.
    pub code: ObjectRef,
    /// First pc of this object's range.
    pub base_pc: u64,
    /// The instruction bytes.
    pub bytes: Vec<u8>,
}

/// Instructions handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Instructions(pub ObjectRef);

impl Instructions {
    /// Borrow the descriptor.
    pub fn desc(self, heap: &Heap) -> &InstructionsDesc {
        match &heap.get(self.0).body {
            ObjectBody::Instructions(d) => d,
            _ => panic!("not instructions"),
        }
    }

    /// First pc of the range.
    pub fn entry_point(self, heap: &Heap) -> u64 {
        self.desc(heap).base_pc
    }

    /// Size of the instruction stream in bytes.
    pub fn size(self, heap: &Heap) -> usize {
        self.desc(heap).bytes.len()
    }

    /// Read an embedded word at byte offset `offset`.
    pub fn read_u64_at(self, heap: &Heap, offset: usize) -> u64 {
        let bytes = &self.desc(heap).bytes;
        let mut buf = [0u8; 8];
        buf.copy_from_slice(&bytes[offset..offset + 8]);
        u64::from_le_bytes(buf)
    }

    /// Write an embedded word at byte offset `offset`. Only legal while
    /// the heap's instructions-write window is open.
    pub fn write_u64_at(self, heap: &mut Heap, offset: usize, value: u64) {
        assert!(
            heap.instructions_writable(),
            "executable space is not writable"
        );
        match &mut heap.get_mut(self.0).body {
            ObjectBody::Instructions(d) => {
                d.bytes[offset..offset + 8].copy_from_slice(&value.to_le_bytes());
            }
            _ => panic!("not instructions"),
        }
    }
}

/// Code handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Code(pub ObjectRef);

impl Code {
    /// Whether the handle is null.
    pub fn is_null(self) -> bool {
        self.0.is_null()
    }

    /// Borrow the descriptor.
    pub fn desc(self, heap: &Heap) -> &CodeDesc {
        match &heap.get(self.0).body {
            ObjectBody::Code(d) => d,
            _ => panic!("not code"),
        }
    }

    /// Mutably borrow the descriptor.
    pub fn desc_mut(self, heap: &mut Heap) -> &mut CodeDesc {
        match &mut heap.get_mut(self.0).body {
            ObjectBody::Code(d) => d,
            _ => panic!("not code"),
        }
    }

    /// The instructions handle.
    pub fn instructions(self, heap: &Heap) -> Instructions {
        Instructions(self.desc(heap).instructions)
    }

    /// Entry point pc.
    pub fn entry_point(self, heap: &Heap) -> u64 {
        self.instructions(heap).entry_point(heap)
    }

    /// Size of the instruction stream in bytes.
    pub fn size(self, heap: &Heap) -> usize {
        self.instructions(heap).size(heap)
    }

    /// Whether `pc` lies within this code's instruction range.
    pub fn contains_pc(self, heap: &Heap, pc: u64) -> bool {
        let entry = self.entry_point(heap);
        pc >= entry && pc < entry + self.size(heap) as u64
    }

    /// The pc-descriptor records, cloned out for iteration.
    pub fn pc_descriptor_entries(self, heap: &Heap) -> Vec<PcDescriptor> {
        let table = self.desc(heap).pc_descriptors;
        if table.is_null() {
            return Vec::new();
        }
        match &heap.get(table).body {
            ObjectBody::PcDescriptors { entries } => entries.clone(),
            _ => panic!("not pc descriptors"),
        }
    }

    /// The exception-handler records.
    pub fn exception_handler_entries(self, heap: &Heap) -> Vec<ExceptionHandlerEntry> {
        let table = self.desc(heap).exception_handlers;
        if table.is_null() {
            return Vec::new();
        }
        match &heap.get(table).body {
            ObjectBody::ExceptionHandlers { entries } => entries.clone(),
            _ => panic!("not exception handlers"),
        }
    }

    /// Token index recorded for `pc`, or -1.
    pub fn get_token_index_of_pc(self, heap: &Heap, pc: u64) -> i64 {
        for d in self.pc_descriptor_entries(heap) {
            if d.pc == pc {
                return d.token_index;
            }
        }
        -1
    }

    /// Pc of the first `Deopt` descriptor with `node_id`, or 0.
    pub fn get_deopt_pc_at_node_id(self, heap: &Heap, node_id: i64) -> u64 {
        for d in self.pc_descriptor_entries(heap) {
            if d.node_id == node_id && d.kind == PcDescriptorKind::Deopt {
                return d.pc;
            }
        }
        0
    }

    /// Pc of the first `PatchCode` descriptor, or 0.
    pub fn get_patch_code_pc(self, heap: &Heap) -> u64 {
        for d in self.pc_descriptor_entries(heap) {
            if d.kind == PcDescriptorKind::PatchCode {
                return d.pc;
            }
        }
        0
    }

    /// Node id recorded for `pc`, or -1.
    pub fn get_node_id_of_pc(self, heap: &Heap, pc: u64) -> i64 {
        for d in self.pc_descriptor_entries(heap) {
            if d.pc == pc {
                return d.node_id;
            }
        }
        -1
    }

    /// Try index active at `pc`, or -1.
    pub fn get_try_index_of_pc(self, heap: &Heap, pc: u64) -> i64 {
        for d in self.pc_descriptor_entries(heap) {
            if d.pc == pc {
                return d.try_index;
            }
        }
        -1
    }

    /// Whether the byte area `[start_offset, end_offset)` is free of
    /// embedded object pointers, so the patcher may overwrite it.
    pub fn area_free_of_embedded_pointers(
        self,
        heap: &Heap,
        start_offset: usize,
        end_offset: usize,
    ) -> bool {
        !self
            .desc(heap)
            .pointer_offsets
            .iter()
            .any(|&off| off >= start_offset && off < end_offset)
    }
}

/// Per-isolate table mapping pc ranges back to code objects. Entry
/// points get a direct map since IC targets and patched call targets
/// always name an entry; interior pcs fall back to a range scan.
#[derive(Default)]
pub struct CodeIndexTable {
    entries: Vec<(u64, u64, ObjectRef)>,
    by_entry: rustc_hash::FxHashMap<u64, usize>,
}

impl CodeIndexTable {
    /// Create an empty table.
    pub fn new() -> Self {
        CodeIndexTable {
            entries: Vec::new(),
            by_entry: rustc_hash::FxHashMap::default(),
        }
    }

    /// Register `code`'s pc range.
    pub fn register(&mut self, heap: &Heap, code: Code) {
        let start = code.entry_point(heap);
        let end = start + code.size(heap) as u64;
        self.by_entry.insert(start, self.entries.len());
        self.entries.push((start, end, code.0));
    }

    /// The code whose range contains `pc`.
    pub fn lookup_code(&self, pc: u64) -> Option<Code> {
        if let Some(&index) = self.by_entry.get(&pc) {
            return Some(Code(self.entries[index].2));
        }
        self.entries
            .iter()
            .find(|(start, end, _)| pc >= *start && pc < *end)
            .map(|(_, _, code)| Code(*code))
    }

    /// The function owning the code that contains `pc`.
    pub fn lookup_function(&self, heap: &Heap, pc: u64) -> Option<crate::object::Function> {
        let code = self.lookup_code(pc)?;
        let function = code.desc(heap).function;
        if function.is_null() {
            None
        } else {
            Some(crate::object::Function(function))
        }
    }

    /// Number of registered ranges.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no ranges are registered.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
