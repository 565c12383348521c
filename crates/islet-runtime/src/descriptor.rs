//! Argument descriptors
//!
//! A call's argument metadata is an immutable array:
//! `[total_count, positional_count, (name, position)*, null]` with the
//! named-argument pairs sorted alphabetically. Descriptors with equal
//! contents share storage through the object store's canonical table.

use islet_core::{Array, Isolate, ObjectRef, Space, Str};

/// Accessor wrapper over a descriptor array.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArgumentsDescriptor(pub ObjectRef);

impl ArgumentsDescriptor {
    /// Build (or reuse) the canonical descriptor for `num_arguments`
    /// total arguments with the given optional-argument name symbols.
    pub fn new(
        isolate: &mut Isolate,
        num_arguments: usize,
        optional_argument_names: &[ObjectRef],
    ) -> ArgumentsDescriptor {
        let num_named = optional_argument_names.len();
        let num_positional = num_arguments - num_named;

        // Insertion-sort the (name, position) pairs alphabetically;
        // positions follow the passed order. Duplicate names are ruled
        // out upstream.
        let mut pairs: Vec<(ObjectRef, ObjectRef)> = Vec::with_capacity(num_named);
        for (i, name) in optional_argument_names.iter().enumerate() {
            let position = ObjectRef::smi((num_positional + i) as i64);
            let at = pairs
                .iter()
                .position(|(existing, _)| {
                    Str::compare(&isolate.heap, *name, *existing) == std::cmp::Ordering::Less
                })
                .unwrap_or(pairs.len());
            pairs.insert(at, (*name, position));
        }
        let mut slots: Vec<ObjectRef> = Vec::with_capacity(3 + 2 * num_named);
        slots.push(ObjectRef::smi(num_arguments as i64));
        slots.push(ObjectRef::smi(num_positional as i64));
        for (name, position) in pairs {
            slots.push(name);
            slots.push(position);
        }
        slots.push(ObjectRef::NULL);

        ArgumentsDescriptor(canonicalize(isolate, slots))
    }

    /// Total argument count.
    pub fn count(self, isolate: &Isolate) -> usize {
        Array(self.0).at(&isolate.heap, 0).smi_value() as usize
    }

    /// Positional argument count.
    pub fn positional_count(self, isolate: &Isolate) -> usize {
        Array(self.0).at(&isolate.heap, 1).smi_value() as usize
    }

    /// Named argument count.
    pub fn named_count(self, isolate: &Isolate) -> usize {
        (Array(self.0).len(&isolate.heap) - 3) / 2
    }

    /// The name symbol of named argument `i` (in sorted order).
    pub fn name_at(self, isolate: &Isolate, i: usize) -> ObjectRef {
        Array(self.0).at(&isolate.heap, 2 + 2 * i)
    }

    /// The argument position of named argument `i`.
    pub fn position_at(self, isolate: &Isolate, i: usize) -> usize {
        Array(self.0).at(&isolate.heap, 3 + 2 * i).smi_value() as usize
    }

    /// Derive the descriptor for the same call with the leading
    /// receiver removed (closure dispatch). The result keeps symbol
    /// names but is not canonicalized; sharing no longer matters once
    /// the call is in flight.
    pub fn without_receiver(self, isolate: &mut Isolate) -> ArgumentsDescriptor {
        let source = Array(self.0);
        let len = source.len(&isolate.heap);
        let adjusted = Array::new(&mut isolate.heap, &isolate.store, len, Space::New);
        let total = source.at(&isolate.heap, 0).smi_value() - 1;
        adjusted.set_at(&mut isolate.heap, 0, ObjectRef::smi(total));
        let positional = source.at(&isolate.heap, 1).smi_value() - 1;
        adjusted.set_at(&mut isolate.heap, 1, ObjectRef::smi(positional));
        let num_named = (len - 3) / 2;
        for i in 0..num_named {
            let name = source.at(&isolate.heap, 2 + 2 * i);
            adjusted.set_at(&mut isolate.heap, 2 + 2 * i, name);
            let position = source.at(&isolate.heap, 3 + 2 * i).smi_value() - 1;
            adjusted.set_at(&mut isolate.heap, 3 + 2 * i, ObjectRef::smi(position));
        }
        adjusted.set_at(&mut isolate.heap, len - 1, ObjectRef::NULL);
        ArgumentsDescriptor(adjusted.0)
    }
}

/// Return the canonical immutable array with the given contents,
/// inserting into the object store's table on first sight.
fn canonicalize(isolate: &mut Isolate, slots: Vec<ObjectRef>) -> ObjectRef {
    let table = Array(isolate.store.canonical_argument_descriptors);
    let table_len = table.len(&isolate.heap);
    for i in 0..table_len {
        let existing = table.at(&isolate.heap, i);
        if existing.is_null() {
            // First free slot: intern here.
            let descriptor =
                Array::new_immutable(&mut isolate.heap, &isolate.store, slots, Space::Old);
            table.set_at(&mut isolate.heap, i, descriptor.0);
            return descriptor.0;
        }
        if contents_equal(isolate, Array(existing), &slots) {
            return existing;
        }
    }
    // Table full: double it, then intern.
    let grown = Array::grow(&mut isolate.heap, &isolate.store, table, table_len * 2);
    isolate.store.canonical_argument_descriptors = grown.0;
    let descriptor = Array::new_immutable(&mut isolate.heap, &isolate.store, slots, Space::Old);
    grown.set_at(&mut isolate.heap, table_len, descriptor.0);
    descriptor.0
}

fn contents_equal(isolate: &Isolate, array: Array, slots: &[ObjectRef]) -> bool {
    if array.len(&isolate.heap) != slots.len() {
        return false;
    }
    // Smis compare by value and names are symbols, so reference
    // equality decides.
    slots
        .iter()
        .enumerate()
        .all(|(i, slot)| array.at(&isolate.heap, i) == *slot)
}
