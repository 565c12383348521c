//! Type objects and type-argument vectors
//!
//! A type is one of three heap kinds: a `ParameterizedType` (a class
//! reference plus an optional argument vector, possibly still carrying an
//! unresolved class name), a `TypeParameter` (a position in the enclosing
//! class's argument vector), or an `InstantiatedType` (a lazy view of an
//! uninstantiated type under an instantiator). Type-argument vectors are
//! either concrete (`TypeArray`) or lazy (`InstantiatedTypeArguments`).

use crate::heap::{Heap, Space};
use crate::object::{InstanceKind, ObjectBody};
use crate::object_store::ObjectStore;
use crate::value::ObjectRef;

/// Finalization state of a parameterized type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeState {
    /// Freshly parsed.
    Allocated,
    /// Currently being finalized; used to detect illegal self reference.
    BeingFinalized,
    /// Finalized; the argument vector has full length.
    Finalized,
}

/// Type handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Type(pub ObjectRef);

impl Type {
    /// Allocate a parameterized type. `type_class` is either a resolved
    /// class or an unresolved class-name symbol.
    pub fn new_parameterized(
        heap: &mut Heap,
        store: &ObjectStore,
        type_class: ObjectRef,
        arguments: ObjectRef,
    ) -> Type {
        let r = heap.allocate(
            store.parameterized_type_class,
            Space::Old,
            ObjectBody::ParameterizedType {
                type_class,
                arguments,
                state: TypeState::Allocated,
            },
        );
        Type(r)
    }

    /// Allocate a finalized type for a class without type arguments.
    pub fn new_non_parameterized(
        heap: &mut Heap,
        store: &ObjectStore,
        cls: crate::object::Class,
    ) -> Type {
        let r = heap.allocate(
            store.parameterized_type_class,
            Space::Old,
            ObjectBody::ParameterizedType {
                type_class: cls.0,
                arguments: ObjectRef::NULL,
                state: TypeState::Finalized,
            },
        );
        Type(r)
    }

    /// Allocate a type-parameter node.
    pub fn new_type_parameter(
        heap: &mut Heap,
        store: &ObjectStore,
        index: usize,
        name: ObjectRef,
    ) -> Type {
        let r = heap.allocate(
            store.type_parameter_class,
            Space::Old,
            ObjectBody::TypeParameter { index, name },
        );
        Type(r)
    }

    /// Allocate a lazy instantiation view.
    pub fn new_instantiated(
        heap: &mut Heap,
        store: &ObjectStore,
        uninstantiated: ObjectRef,
        instantiator: ObjectRef,
    ) -> Type {
        let r = heap.allocate(
            store.instantiated_type_class,
            Space::Old,
            ObjectBody::InstantiatedType {
                uninstantiated,
                instantiator,
            },
        );
        Type(r)
    }

    /// Whether the handle is null.
    pub fn is_null(self) -> bool {
        self.0.is_null()
    }

    /// Whether this is a type-parameter node.
    pub fn is_type_parameter(self, heap: &Heap) -> bool {
        heap.kind_of(self.0) == InstanceKind::TypeParameter
    }

    /// Whether this is a parameterized type.
    pub fn is_parameterized_type(self, heap: &Heap) -> bool {
        heap.kind_of(self.0) == InstanceKind::ParameterizedType
    }

    /// Whether this is a lazy instantiated view.
    pub fn is_instantiated_view(self, heap: &Heap) -> bool {
        heap.kind_of(self.0) == InstanceKind::InstantiatedType
    }

    /// Whether this type's class reference has been resolved. Parameter
    /// nodes and instantiated views are resolved by construction.
    pub fn is_resolved(self, heap: &Heap) -> bool {
        match &heap.get(self.0).body {
            ObjectBody::ParameterizedType { type_class, .. } => {
                heap.kind_of(*type_class) == InstanceKind::Class
            }
            _ => true,
        }
    }

    /// Whether the class reference is resolved (parameterized types only).
    pub fn has_resolved_type_class(self, heap: &Heap) -> bool {
        match &heap.get(self.0).body {
            ObjectBody::ParameterizedType { type_class, .. } => {
                heap.kind_of(*type_class) == InstanceKind::Class
            }
            ObjectBody::InstantiatedType { uninstantiated, .. } => {
                Type(*uninstantiated).has_resolved_type_class(heap)
            }
            ObjectBody::TypeParameter { .. } => false,
            _ => panic!("not a type"),
        }
    }

    /// The resolved class of this type.
    pub fn type_class(self, heap: &Heap) -> ObjectRef {
        match &heap.get(self.0).body {
            ObjectBody::ParameterizedType { type_class, .. } => {
                debug_assert_eq!(heap.kind_of(*type_class), InstanceKind::Class);
                *type_class
            }
            ObjectBody::InstantiatedType { uninstantiated, .. } => {
                Type(*uninstantiated).type_class(heap)
            }
            _ => panic!("type has no class"),
        }
    }

    /// The unresolved class-name symbol of this type.
    pub fn unresolved_class_name(self, heap: &Heap) -> ObjectRef {
        match &heap.get(self.0).body {
            ObjectBody::ParameterizedType { type_class, .. } => {
                debug_assert_ne!(heap.kind_of(*type_class), InstanceKind::Class);
                *type_class
            }
            _ => panic!("not an unresolved type"),
        }
    }

    /// Store the resolved class on this type node.
    pub fn set_type_class(self, heap: &mut Heap, cls: ObjectRef) {
        match &mut heap.get_mut(self.0).body {
            ObjectBody::ParameterizedType { type_class, .. } => *type_class = cls,
            _ => panic!("not a parameterized type"),
        }
    }

    /// The argument vector of a parameterized type (null for raw types).
    pub fn arguments(self, heap: &Heap) -> ObjectRef {
        match &heap.get(self.0).body {
            ObjectBody::ParameterizedType { arguments, .. } => *arguments,
            _ => ObjectRef::NULL,
        }
    }

    /// Replace the argument vector of a parameterized type.
    pub fn set_arguments(self, heap: &mut Heap, args: ObjectRef) {
        match &mut heap.get_mut(self.0).body {
            ObjectBody::ParameterizedType { arguments, .. } => *arguments = args,
            _ => panic!("not a parameterized type"),
        }
    }

    /// The position of a type-parameter node.
    pub fn parameter_index(self, heap: &Heap) -> usize {
        match &heap.get(self.0).body {
            ObjectBody::TypeParameter { index, .. } => *index,
            _ => panic!("not a type parameter"),
        }
    }

    /// The name symbol of a type-parameter node.
    pub fn parameter_name(self, heap: &Heap) -> ObjectRef {
        match &heap.get(self.0).body {
            ObjectBody::TypeParameter { name, .. } => *name,
            _ => panic!("not a type parameter"),
        }
    }

    /// Finalization state; parameter nodes and views count as finalized.
    pub fn is_finalized(self, heap: &Heap) -> bool {
        match &heap.get(self.0).body {
            ObjectBody::ParameterizedType { state, .. } => *state == TypeState::Finalized,
            _ => true,
        }
    }

    /// Whether the type is currently being finalized.
    pub fn is_being_finalized(self, heap: &Heap) -> bool {
        match &heap.get(self.0).body {
            ObjectBody::ParameterizedType { state, .. } => *state == TypeState::BeingFinalized,
            _ => false,
        }
    }

    /// Mark the type as being finalized.
    pub fn set_is_being_finalized(self, heap: &mut Heap) {
        self.set_state(heap, TypeState::BeingFinalized);
    }

    /// Mark the type finalized.
    pub fn set_is_finalized(self, heap: &mut Heap) {
        self.set_state(heap, TypeState::Finalized);
    }

    fn set_state(self, heap: &mut Heap, new_state: TypeState) {
        match &mut heap.get_mut(self.0).body {
            ObjectBody::ParameterizedType { state, .. } => *state = new_state,
            _ => panic!("not a parameterized type"),
        }
    }

    /// Whether no type parameter occurs in this type.
    pub fn is_instantiated(self, heap: &Heap) -> bool {
        match &heap.get(self.0).body {
            ObjectBody::TypeParameter { .. } => false,
            ObjectBody::ParameterizedType { arguments, .. } => {
                arguments.is_null() || TypeArgs(*arguments).is_instantiated(heap)
            }
            ObjectBody::InstantiatedType { .. } => true,
            _ => panic!("not a type"),
        }
    }

    /// Whether this is the top-type sentinel.
    pub fn is_var_type(self, heap: &Heap, store: &ObjectStore) -> bool {
        !self.is_type_parameter(heap)
            && self.has_resolved_type_class(heap)
            && self.type_class(heap) == store.var_class
    }

    /// Whether this is the void type.
    pub fn is_void_type(self, heap: &Heap, store: &ObjectStore) -> bool {
        !self.is_type_parameter(heap)
            && self.has_resolved_type_class(heap)
            && self.type_class(heap) == store.void_class
    }

    /// Instantiate this type from `instantiator` at `offset`.
    ///
    /// A type parameter resolves to `instantiator[index + offset]`, or to
    /// the top sentinel when the instantiator is null (raw type). An
    /// already instantiated type returns itself.
    pub fn instantiate_from(
        self,
        heap: &mut Heap,
        store: &ObjectStore,
        instantiator: TypeArgs,
        offset: usize,
    ) -> Type {
        match heap.get(self.0).body {
            ObjectBody::TypeParameter { index, .. } => {
                if instantiator.is_null() {
                    return Type(store.var_type);
                }
                instantiator.type_at(heap, store, index + offset)
            }
            ObjectBody::ParameterizedType {
                type_class,
                arguments,
                ..
            } => {
                if self.is_instantiated(heap) {
                    return self;
                }
                let new_args = if instantiator.is_null() {
                    ObjectRef::NULL
                } else {
                    TypeArgs(arguments)
                        .instantiate_from(heap, store, instantiator, offset)
                        .0
                };
                let instantiated = Type::new_parameterized(heap, store, type_class, new_args);
                instantiated.set_is_finalized(heap);
                instantiated
            }
            ObjectBody::InstantiatedType { .. } => self,
            _ => panic!("not a type"),
        }
    }

    /// Human-readable name, e.g. `Map<K, V>`, for error messages.
    pub fn type_name(self, heap: &Heap) -> String {
        use crate::object::string::Str;
        match &heap.get(self.0).body {
            ObjectBody::TypeParameter { name, .. } => Str(*name).to_string(heap),
            ObjectBody::InstantiatedType { uninstantiated, .. } => {
                Type(*uninstantiated).type_name(heap)
            }
            ObjectBody::ParameterizedType {
                type_class,
                arguments,
                ..
            } => {
                let class_name = if heap.kind_of(*type_class) == InstanceKind::Class {
                    crate::object::Class(*type_class).name_str(heap)
                } else {
                    Str(*type_class).to_string(heap)
                };
                if arguments.is_null() {
                    return class_name;
                }
                let args = TypeArgs(*arguments);
                let mut out = class_name;
                out.push('<');
                for i in 0..args.len(heap) {
                    if i > 0 {
                        out.push_str(", ");
                    }
                    out.push_str(&args.type_at_concrete(heap, i).type_name(heap));
                }
                out.push('>');
                out
            }
            _ => "dynamic".to_string(),
        }
    }
}

/// Type-argument vector handle (TypeArray or lazy view).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TypeArgs(pub ObjectRef);

impl TypeArgs {
    /// Allocate a concrete vector of `len` null types.
    pub fn new_type_array(heap: &mut Heap, store: &ObjectStore, len: usize) -> TypeArgs {
        let r = heap.allocate(
            store.type_array_class,
            Space::Old,
            ObjectBody::TypeArray {
                types: vec![ObjectRef::NULL; len],
            },
        );
        TypeArgs(r)
    }

    /// Allocate a lazy instantiated view.
    pub fn new_instantiated(
        heap: &mut Heap,
        store: &ObjectStore,
        uninstantiated: TypeArgs,
        instantiator: TypeArgs,
    ) -> TypeArgs {
        let r = heap.allocate(
            store.instantiated_type_arguments_class,
            Space::Old,
            ObjectBody::InstantiatedTypeArguments {
                uninstantiated: uninstantiated.0,
                instantiator: instantiator.0,
            },
        );
        TypeArgs(r)
    }

    /// Whether the handle is null (a raw vector).
    pub fn is_null(self) -> bool {
        self.0.is_null()
    }

    /// Whether this is a concrete TypeArray.
    pub fn is_type_array(self, heap: &Heap) -> bool {
        !self.is_null() && heap.kind_of(self.0) == InstanceKind::TypeArray
    }

    /// Vector length. Lazy views report the uninstantiated length.
    pub fn len(self, heap: &Heap) -> usize {
        match &heap.get(self.0).body {
            ObjectBody::TypeArray { types } => types.len(),
            ObjectBody::InstantiatedTypeArguments { uninstantiated, .. } => {
                TypeArgs(*uninstantiated).len(heap)
            }
            _ => panic!("not type arguments"),
        }
    }

    /// Whether the vector is empty.
    pub fn is_empty(self, heap: &Heap) -> bool {
        self.len(heap) == 0
    }

    /// The type at `index`. For a lazy view this instantiates on the
    /// fly: parameters are looked up in the instantiator, other
    /// uninstantiated types become lazy `InstantiatedType` views.
    pub fn type_at(self, heap: &mut Heap, store: &ObjectStore, index: usize) -> Type {
        match heap.get(self.0).body {
            ObjectBody::TypeArray { .. } => self.type_at_concrete(heap, index),
            ObjectBody::InstantiatedTypeArguments {
                uninstantiated,
                instantiator,
            } => {
                let ty = TypeArgs(uninstantiated).type_at(heap, store, index);
                if ty.is_type_parameter(heap) {
                    let param_index = ty.parameter_index(heap);
                    return TypeArgs(instantiator).type_at(heap, store, param_index);
                }
                if !ty.is_instantiated(heap) {
                    return Type::new_instantiated(heap, store, ty.0, instantiator);
                }
                ty
            }
            _ => panic!("not type arguments"),
        }
    }

    /// The type at `index` of a concrete vector; no allocation.
    pub fn type_at_concrete(self, heap: &Heap, index: usize) -> Type {
        match &heap.get(self.0).body {
            ObjectBody::TypeArray { types } => Type(types[index]),
            _ => panic!("not a concrete type array"),
        }
    }

    /// Store the type at `index` of a concrete vector.
    pub fn set_type_at(self, heap: &mut Heap, index: usize, ty: Type) {
        match &mut heap.get_mut(self.0).body {
            ObjectBody::TypeArray { types } => types[index] = ty.0,
            _ => panic!("not a concrete type array"),
        }
    }

    /// Whether no type parameter occurs in the vector. Lazy views are
    /// instantiated by construction.
    pub fn is_instantiated(self, heap: &Heap) -> bool {
        match &heap.get(self.0).body {
            ObjectBody::TypeArray { types } => types
                .iter()
                .all(|t| t.is_null() || Type(*t).is_instantiated(heap)),
            ObjectBody::InstantiatedTypeArguments { .. } => true,
            _ => panic!("not type arguments"),
        }
    }

    /// Whether slot `i` holds exactly `TypeParameter{index: i}` for all
    /// slots. Such a vector can be replaced wholesale by the
    /// instantiator at a use site.
    pub fn is_uninstantiated_identity(self, heap: &Heap) -> bool {
        match &heap.get(self.0).body {
            ObjectBody::TypeArray { types } => types.iter().enumerate().all(|(i, t)| {
                !t.is_null()
                    && Type(*t).is_type_parameter(heap)
                    && Type(*t).parameter_index(heap) == i
            }),
            _ => false,
        }
    }

    /// Whether the first `len` slots are all the top sentinel.
    pub fn is_var_types(self, heap: &Heap, store: &ObjectStore, len: usize) -> bool {
        debug_assert!(self.len(heap) >= len);
        for i in 0..len {
            match &heap.get(self.0).body {
                ObjectBody::TypeArray { types } => {
                    let ty = Type(types[i]);
                    if ty.is_null()
                        || !ty.has_resolved_type_class(heap)
                        || ty.type_class(heap) != store.var_class
                    {
                        return false;
                    }
                }
                ObjectBody::InstantiatedTypeArguments { .. } => return false,
                _ => panic!("not type arguments"),
            }
        }
        true
    }

    /// Instantiate the vector from `instantiator` at `offset`.
    ///
    /// Returns the instantiator itself when this vector is the
    /// uninstantiated identity of the same length at offset zero (the
    /// allocation-avoiding fast path), and a fresh concrete vector
    /// otherwise. A null instantiator yields the null (raw) vector.
    pub fn instantiate_from(
        self,
        heap: &mut Heap,
        store: &ObjectStore,
        instantiator: TypeArgs,
        offset: usize,
    ) -> TypeArgs {
        debug_assert!(!self.is_instantiated(heap));
        if instantiator.is_null() {
            return TypeArgs(ObjectRef::NULL);
        }
        if offset == 0
            && self.is_uninstantiated_identity(heap)
            && instantiator.len(heap) == self.len(heap)
        {
            return instantiator;
        }
        let num_types = self.len(heap);
        let result = TypeArgs::new_type_array(heap, store, num_types);
        for i in 0..num_types {
            let mut ty = self.type_at_concrete(heap, i);
            if !ty.is_null() && !ty.is_instantiated(heap) {
                ty = ty.instantiate_from(heap, store, instantiator, offset);
            }
            result.set_type_at(heap, i, ty);
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bootstrap;
    use crate::object::Class;
    use crate::symbols;

    #[test]
    fn test_uninstantiated_identity() {
        let mut isolate = bootstrap::new_isolate();
        let t = symbols::new_symbol(&mut isolate.heap, &mut isolate.store, "T");
        let heap = &mut isolate.heap;
        let store = &isolate.store;

        let args = TypeArgs::new_type_array(heap, store, 2);
        let p0 = Type::new_type_parameter(heap, store, 0, t);
        let p1 = Type::new_type_parameter(heap, store, 1, t);
        args.set_type_at(heap, 0, p0);
        args.set_type_at(heap, 1, p1);
        assert!(args.is_uninstantiated_identity(heap));
        assert!(!args.is_instantiated(heap));

        // Swapped positions break the identity property.
        args.set_type_at(heap, 0, p1);
        args.set_type_at(heap, 1, p0);
        assert!(!args.is_uninstantiated_identity(heap));
    }

    #[test]
    fn test_identity_instantiation_returns_instantiator() {
        let mut isolate = bootstrap::new_isolate();

        let t = symbols::new_symbol(&mut isolate.heap, &mut isolate.store, "T");
        let u = symbols::new_symbol(&mut isolate.heap, &mut isolate.store, "U");
        let heap = &mut isolate.heap;
        let store = &isolate.store;

        let identity = TypeArgs::new_type_array(heap, store, 2);
        let p0 = Type::new_type_parameter(heap, store, 0, t);
        let p1 = Type::new_type_parameter(heap, store, 1, u);
        identity.set_type_at(heap, 0, p0);
        identity.set_type_at(heap, 1, p1);

        let concrete = TypeArgs::new_type_array(heap, store, 2);
        let obj_type = Type(store.object_type);
        concrete.set_type_at(heap, 0, obj_type);
        concrete.set_type_at(heap, 1, obj_type);

        let result = identity.instantiate_from(heap, store, concrete, 0);
        assert_eq!(result.0, concrete.0);
    }

    #[test]
    fn test_type_parameter_instantiation() {
        let mut isolate = bootstrap::new_isolate();
        let t = symbols::new_symbol(&mut isolate.heap, &mut isolate.store, "T");
        let heap = &mut isolate.heap;
        let store = &isolate.store;

        let param = Type::new_type_parameter(heap, store, 0, t);
        assert!(!param.is_instantiated(heap));

        // Null instantiator (raw type) resolves to the top sentinel.
        let raw = param.instantiate_from(heap, store, TypeArgs(ObjectRef::NULL), 0);
        assert!(raw.is_var_type(heap, store));

        let vector = TypeArgs::new_type_array(heap, store, 2);
        let obj_type = Type(store.object_type);
        vector.set_type_at(heap, 0, obj_type);
        vector.set_type_at(heap, 1, Type(store.var_type));
        let inst = param.instantiate_from(heap, store, vector, 1);
        assert!(inst.is_var_type(heap, store));
    }

    #[test]
    fn test_lazy_view_reads_through_instantiator() {
        let mut isolate = bootstrap::new_isolate();
        let t = symbols::new_symbol(&mut isolate.heap, &mut isolate.store, "T");
        let heap = &mut isolate.heap;
        let store = &isolate.store;

        let uninst = TypeArgs::new_type_array(heap, store, 1);
        let param = Type::new_type_parameter(heap, store, 0, t);
        uninst.set_type_at(heap, 0, param);

        let instantiator = TypeArgs::new_type_array(heap, store, 1);
        instantiator.set_type_at(heap, 0, Type(store.object_type));

        let view = TypeArgs::new_instantiated(heap, store, uninst, instantiator);
        assert!(view.is_instantiated(heap));
        assert_eq!(view.len(heap), 1);
        let resolved = view.type_at(heap, store, 0);
        assert_eq!(resolved.0, store.object_type);
    }

    #[test]
    fn test_non_parameterized_type_is_finalized() {
        let mut isolate = bootstrap::new_isolate();
        let name = symbols::new_symbol(&mut isolate.heap, &mut isolate.store, "Plain");
        let cls = Class::new(&mut isolate.heap, &isolate.store, name, ObjectRef::NULL);
        let ty = Type::new_non_parameterized(&mut isolate.heap, &isolate.store, cls);
        assert!(ty.is_finalized(&isolate.heap));
        assert!(ty.is_instantiated(&isolate.heap));
        assert_eq!(ty.type_class(&isolate.heap), cls.0);
        assert_eq!(ty.type_name(&isolate.heap), "Plain");
    }
}
