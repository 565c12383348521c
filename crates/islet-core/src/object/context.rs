//! Contexts, context scopes and closures

use crate::heap::{Heap, Space};
use crate::object::ObjectBody;
use crate::object_store::ObjectStore;
use crate::value::ObjectRef;

/// Context handle: a first-class activation record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Context(pub ObjectRef);

impl Context {
    /// Allocate a context with `num_variables` null slots.
    pub fn new(
        heap: &mut Heap,
        store: &ObjectStore,
        isolate_id: u64,
        num_variables: usize,
    ) -> Context {
        let r = heap.allocate(
            store.context_class,
            Space::New,
            ObjectBody::Context {
                isolate_id,
                parent: ObjectRef::NULL,
                slots: vec![ObjectRef::NULL; num_variables],
            },
        );
        Context(r)
    }

    /// Whether the handle is null.
    pub fn is_null(self) -> bool {
        self.0.is_null()
    }

    /// Number of variable slots.
    pub fn num_variables(self, heap: &Heap) -> usize {
        match &heap.get(self.0).body {
            ObjectBody::Context { slots, .. } => slots.len(),
            _ => panic!("not a context"),
        }
    }

    /// The owning isolate id.
    pub fn isolate_id(self, heap: &Heap) -> u64 {
        match &heap.get(self.0).body {
            ObjectBody::Context { isolate_id, .. } => *isolate_id,
            _ => panic!("not a context"),
        }
    }

    /// The enclosing context, or null.
    pub fn parent(self, heap: &Heap) -> ObjectRef {
        match &heap.get(self.0).body {
            ObjectBody::Context { parent, .. } => *parent,
            _ => panic!("not a context"),
        }
    }

    /// Chain this context under `parent`.
    pub fn set_parent(self, heap: &mut Heap, new_parent: ObjectRef) {
        match &mut heap.get_mut(self.0).body {
            ObjectBody::Context { parent, .. } => *parent = new_parent,
            _ => panic!("not a context"),
        }
    }

    /// The variable at `index`.
    pub fn at(self, heap: &Heap, index: usize) -> ObjectRef {
        match &heap.get(self.0).body {
            ObjectBody::Context { slots, .. } => slots[index],
            _ => panic!("not a context"),
        }
    }

    /// Store `value` at `index`.
    pub fn set_at(self, heap: &mut Heap, index: usize, value: ObjectRef) {
        match &mut heap.get_mut(self.0).body {
            ObjectBody::Context { slots, .. } => slots[index] = value,
            _ => panic!("not a context"),
        }
    }
}

/// One captured-variable record of a context scope.
#[derive(Debug, Clone, Copy)]
pub struct ContextScopeEntry {
    /// Token position of the variable declaration.
    pub token_index: i64,
    /// Variable name symbol.
    pub name: ObjectRef,
    /// Whether the variable is final.
    pub is_final: bool,
    /// Declared type.
    pub ty: ObjectRef,
    /// Slot within the context.
    pub context_index: usize,
    /// Nesting level of the owning context.
    pub context_level: usize,
}

/// Context-scope handle: compile-time description of captures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContextScope(pub ObjectRef);

impl ContextScope {
    /// Allocate a context scope from capture records.
    pub fn new(
        heap: &mut Heap,
        store: &ObjectStore,
        entries: Vec<ContextScopeEntry>,
    ) -> ContextScope {
        let r = heap.allocate(
            store.context_scope_class,
            Space::Old,
            ObjectBody::ContextScope { entries },
        );
        ContextScope(r)
    }

    /// Number of captured variables.
    pub fn num_variables(self, heap: &Heap) -> usize {
        match &heap.get(self.0).body {
            ObjectBody::ContextScope { entries } => entries.len(),
            _ => panic!("not a context scope"),
        }
    }

    /// The record at `index`.
    pub fn entry(self, heap: &Heap, index: usize) -> ContextScopeEntry {
        match &heap.get(self.0).body {
            ObjectBody::ContextScope { entries } => entries[index],
            _ => panic!("not a context scope"),
        }
    }
}

/// Allocate a closure over `function` and `context`. The closure's class
/// header is the function's signature class.
pub fn new_closure(
    heap: &mut Heap,
    store: &ObjectStore,
    function: crate::object::Function,
    context: Context,
) -> ObjectRef {
    let signature_class = function.ensure_signature_class(heap, store);
    heap.allocate(
        signature_class.0,
        Space::New,
        ObjectBody::Closure {
            function: function.0,
            context: context.0,
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bootstrap;

    #[test]
    fn test_context_slots() {
        let mut isolate = bootstrap::new_isolate();
        let id = isolate.id();
        let ctx = Context::new(&mut isolate.heap, &isolate.store, id, 3);
        assert_eq!(ctx.num_variables(&isolate.heap), 3);
        assert!(ctx.parent(&isolate.heap).is_null());
        assert_eq!(ctx.isolate_id(&isolate.heap), id);

        ctx.set_at(&mut isolate.heap, 1, ObjectRef::smi(9));
        assert_eq!(ctx.at(&isolate.heap, 1).smi_value(), 9);
        assert!(ctx.at(&isolate.heap, 0).is_null());
    }

    #[test]
    fn test_context_chaining() {
        let mut isolate = bootstrap::new_isolate();
        let id = isolate.id();
        let outer = Context::new(&mut isolate.heap, &isolate.store, id, 1);
        let inner = Context::new(&mut isolate.heap, &isolate.store, id, 1);
        inner.set_parent(&mut isolate.heap, outer.0);
        assert_eq!(inner.parent(&isolate.heap), outer.0);
    }
}
