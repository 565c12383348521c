//! Assembled-code buffers
//!
//! The input to code finalization: a byte stream plus the offsets at
//! which it embeds heap references. Until finalization, an embedded
//! reference slot holds the handle that names the object; finalization
//! replaces each with the raw reference so the visitor path takes over.

use islet_core::Handle;

/// A writable instruction buffer with embedded-pointer bookkeeping.
pub struct AssembledCode {
    bytes: Vec<u8>,
    pointer_offsets: Vec<usize>,
}

impl AssembledCode {
    /// An empty buffer.
    pub fn new() -> Self {
        AssembledCode {
            bytes: Vec::new(),
            pointer_offsets: Vec::new(),
        }
    }

    /// Current size in bytes; the pc offset of the next emission.
    pub fn code_size(&self) -> usize {
        self.bytes.len()
    }

    /// Emit one byte.
    pub fn emit_u8(&mut self, value: u8) {
        self.bytes.push(value);
    }

    /// Emit a little-endian u32.
    pub fn emit_u32(&mut self, value: u32) {
        self.bytes.extend_from_slice(&value.to_le_bytes());
    }

    /// Emit a little-endian u64.
    pub fn emit_u64(&mut self, value: u64) {
        self.bytes.extend_from_slice(&value.to_le_bytes());
    }

    /// Emit an embedded object reference, currently held as a handle.
    /// The offset is recorded so finalization can resolve it and the
    /// visitor can find it afterwards.
    pub fn emit_object(&mut self, handle: Handle) {
        self.pointer_offsets.push(self.bytes.len());
        self.emit_u64(handle.raw() as u64);
    }

    /// The recorded embedded-pointer offsets.
    pub fn pointer_offsets(&self) -> &[usize] {
        &self.pointer_offsets
    }

    /// Consume the buffer.
    pub fn finish(self) -> (Vec<u8>, Vec<usize>) {
        (self.bytes, self.pointer_offsets)
    }
}

impl Default for AssembledCode {
    fn default() -> Self {
        AssembledCode::new()
    }
}
