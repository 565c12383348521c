//! Object arrays

use crate::heap::{Heap, Space};
use crate::object::{ArrayDesc, InstanceKind, ObjectBody};
use crate::object_store::ObjectStore;
use crate::value::ObjectRef;

/// Array handle (mutable or immutable).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Array(pub ObjectRef);

impl Array {
    /// Allocate a mutable array of `len` null slots.
    pub fn new(heap: &mut Heap, store: &ObjectStore, len: usize, space: Space) -> Array {
        let r = heap.allocate(
            store.array_class,
            space,
            ObjectBody::Array(ArrayDesc {
                type_arguments: ObjectRef::NULL,
                data: vec![ObjectRef::NULL; len],
            }),
        );
        Array(r)
    }

    /// Allocate an immutable array holding `data`.
    pub fn new_immutable(
        heap: &mut Heap,
        store: &ObjectStore,
        data: Vec<ObjectRef>,
        space: Space,
    ) -> Array {
        let r = heap.allocate(
            store.immutable_array_class,
            space,
            ObjectBody::ImmutableArray(ArrayDesc {
                type_arguments: ObjectRef::NULL,
                data,
            }),
        );
        Array(r)
    }

    /// Copy `array` into a new mutable array of `new_len` slots.
    pub fn grow(heap: &mut Heap, store: &ObjectStore, array: Array, new_len: usize) -> Array {
        let mut data = array.desc(heap).data.clone();
        debug_assert!(new_len >= data.len());
        data.resize(new_len, ObjectRef::NULL);
        let r = heap.allocate(
            store.array_class,
            Space::Old,
            ObjectBody::Array(ArrayDesc {
                type_arguments: array.desc(heap).type_arguments,
                data,
            }),
        );
        Array(r)
    }

    /// Whether `r` is an array of either mutability.
    pub fn is_array(heap: &Heap, r: ObjectRef) -> bool {
        r.is_heap_object()
            && matches!(
                heap.kind_of(r),
                InstanceKind::Array | InstanceKind::ImmutableArray
            )
    }

    /// Whether the handle is null.
    pub fn is_null(self) -> bool {
        self.0.is_null()
    }

    /// Borrow the descriptor.
    pub fn desc(self, heap: &Heap) -> &ArrayDesc {
        match &heap.get(self.0).body {
            ObjectBody::Array(d) | ObjectBody::ImmutableArray(d) => d,
            _ => panic!("not an array"),
        }
    }

    fn desc_mut(self, heap: &mut Heap) -> &mut ArrayDesc {
        match &mut heap.get_mut(self.0).body {
            ObjectBody::Array(d) => d,
            ObjectBody::ImmutableArray(_) => panic!("immutable array"),
            _ => panic!("not an array"),
        }
    }

    /// Number of elements.
    pub fn len(self, heap: &Heap) -> usize {
        self.desc(heap).data.len()
    }

    /// Whether the array has no elements.
    pub fn is_empty(self, heap: &Heap) -> bool {
        self.len(heap) == 0
    }

    /// The element at `index`.
    pub fn at(self, heap: &Heap, index: usize) -> ObjectRef {
        self.desc(heap).data[index]
    }

    /// Store `value` at `index`.
    pub fn set_at(self, heap: &mut Heap, index: usize, value: ObjectRef) {
        self.desc_mut(heap).data[index] = value;
    }

    /// The element-type vector.
    pub fn type_arguments(self, heap: &Heap) -> ObjectRef {
        self.desc(heap).type_arguments
    }

    /// Install the element-type vector.
    pub fn set_type_arguments(self, heap: &mut Heap, args: ObjectRef) {
        match &mut heap.get_mut(self.0).body {
            ObjectBody::Array(d) | ObjectBody::ImmutableArray(d) => d.type_arguments = args,
            _ => panic!("not an array"),
        }
    }
}
