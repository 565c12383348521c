//! Heap verification
//!
//! Walks every object on the heap and checks structural invariants:
//! every header points at a class descriptor, the class of every class
//! is the metaclass fixpoint, every visited reference is an immediate or
//! a live slot, and every embedded pointer offset of a code object lies
//! within its instruction bytes.

use crate::isolate::Isolate;
use crate::object::{InstanceKind, ObjectBody};
use crate::value::ObjectRef;
use crate::visitor::{visit_object, ObjectPointerVisitor};
use crate::{VmError, VmResult};

struct VerifyVisitor<'a> {
    isolate: &'a Isolate,
    failure: Option<String>,
}

impl ObjectPointerVisitor for VerifyVisitor<'_> {
    fn visit_pointers(&mut self, refs: &[ObjectRef]) {
        if self.failure.is_some() {
            return;
        }
        for r in refs {
            if r.is_smi() || r.is_null() {
                continue;
            }
            if !self.isolate.heap.contains(*r) {
                self.failure = Some(format!("dangling reference {:?}", r));
                return;
            }
        }
    }
}

/// Verify the isolate's heap. Returns the first violation found.
pub fn verify_heap(isolate: &Isolate) -> VmResult<()> {
    let heap = &isolate.heap;
    let metaclass = isolate.store.class_class;

    for (r, obj) in heap.iter() {
        // Header: a live class descriptor whose own class is the
        // metaclass fixpoint.
        if !heap.contains(obj.class) {
            return Err(VmError::Verification(format!(
                "object {:?} has a dangling class header",
                r
            )));
        }
        if heap.kind_of(obj.class) != InstanceKind::Class {
            return Err(VmError::Verification(format!(
                "object {:?} header does not point at a class",
                r
            )));
        }
        if heap.class_of(obj.class) != metaclass {
            return Err(VmError::Verification(format!(
                "class of class of {:?} is not the metaclass",
                r
            )));
        }

        if let ObjectBody::Code(code) = &obj.body {
            if !code.instructions.is_null() {
                let size = match &heap.get(code.instructions).body {
                    ObjectBody::Instructions(i) => i.bytes.len(),
                    _ => {
                        return Err(VmError::Verification(format!(
                            "code {:?} instructions field is not instructions",
                            r
                        )))
                    }
                };
                for &offset in &code.pointer_offsets {
                    if offset + 8 > size {
                        return Err(VmError::Verification(format!(
                            "code {:?} pointer offset {} outside instructions",
                            r, offset
                        )));
                    }
                }
            }
        }
    }

    // Every reference reachable from any object, the object store or
    // the handles must be an immediate or a live slot.
    let mut visitor = VerifyVisitor {
        isolate,
        failure: None,
    };
    for (r, _) in heap.iter() {
        visit_object(heap, r, &mut visitor);
    }
    visitor.visit_pointers(&isolate.store.root_pointers());
    isolate.handles.visit_strong_pointers(&mut visitor);

    match visitor.failure {
        Some(message) => Err(VmError::Verification(message)),
        None => {
            log::debug!("heap verified: {} objects", heap.len());
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bootstrap;

    #[test]
    fn test_bootstrapped_heap_verifies() {
        let isolate = bootstrap::new_isolate();
        verify_heap(&isolate).expect("bootstrap heap should verify");
    }

    #[test]
    fn test_detects_dangling_reference() {
        let mut isolate = bootstrap::new_isolate();
        let bogus = ObjectRef::from_slot(isolate.heap.len() + 100);
        let array = crate::object::Array::new(
            &mut isolate.heap,
            &isolate.store,
            1,
            crate::heap::Space::New,
        );
        array.set_at(&mut isolate.heap, 0, bogus);
        assert!(verify_heap(&isolate).is_err());
    }

    #[test]
    fn test_detects_non_class_header() {
        let mut isolate = bootstrap::new_isolate();
        let array = crate::object::Array::new(
            &mut isolate.heap,
            &isolate.store,
            0,
            crate::heap::Space::New,
        );
        // Point the header at a non-class object.
        isolate.heap.set_class_of(array.0, isolate.store.true_value);
        assert!(verify_heap(&isolate).is_err());
    }
}
