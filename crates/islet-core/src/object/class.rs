//! Class descriptors
//!
//! Every heap object's header points at one of these. A class records
//! its members, its place in the super/interface graph, its generic
//! parameters, and the layout of its instances.

use crate::heap::Heap;
use crate::object::function::{Function, FunctionKind};
use crate::object::string::Str;
use crate::object::types::Type;
use crate::object::{Field, InstanceKind, ObjectBody};
use crate::object_store::ObjectStore;
use crate::value::ObjectRef;

/// Sentinel for classes whose instances carry no type-argument field.
pub const NO_TYPE_ARGUMENTS: i64 = -1;

/// Finalization state of a class.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClassState {
    /// Freshly created; members and super references may be unresolved.
    Allocated,
    /// Bootstrap class with a fixed layout; skips field-offset
    /// computation during finalization.
    PreFinalized,
    /// Fully finalized; all member signatures resolved.
    Finalized,
}

/// Body of a class descriptor.
pub struct ClassDesc {
    /// Class name symbol (null until bootstrap names it).
    pub name: ObjectRef,
    /// Defining script, or null.
    pub script: ObjectRef,
    /// Owning library, or null.
    pub library: ObjectRef,
    /// Superclass type, or null for the root class.
    pub super_type: ObjectRef,
    /// Implemented-interface types.
    pub interfaces: Vec<ObjectRef>,
    /// Type-parameter name symbols.
    pub type_parameters: Vec<ObjectRef>,
    /// Upper bounds of the type parameters (a TypeArray, or null when
    /// the class has no parameters).
    pub type_parameter_bounds: ObjectRef,
    /// Factory (default) type for interfaces, or null.
    pub factory_type: ObjectRef,
    /// Field descriptors.
    pub fields: Vec<ObjectRef>,
    /// Function descriptors.
    pub functions: Vec<ObjectRef>,
    /// Canonicalized constants of this class.
    pub constants: Vec<ObjectRef>,
    /// Advisory per-class function cache (an Array, see runtime crate).
    pub functions_cache: ObjectRef,
    /// Allocation stub code, or null.
    pub allocation_stub: ObjectRef,
    /// Signature function for signature classes, or null.
    pub signature_function: ObjectRef,
    /// Finalization state.
    pub state: ClassState,
    /// Whether this class is an interface.
    pub is_interface: bool,
    /// Whether this class has a const constructor.
    pub is_const: bool,
    /// The kind of this class's instances.
    pub instance_kind: InstanceKind,
    /// Fixed instance size in words, or 0 for variable-size kinds.
    pub instance_size: i64,
    /// Offset assigned to the next instance field.
    pub next_field_offset: i64,
    /// Offset of the type-argument field within instances, or
    /// [`NO_TYPE_ARGUMENTS`].
    pub type_arguments_field_offset: i64,
}

impl ClassDesc {
    /// A fresh descriptor with the given instance kind and size.
    pub fn new(instance_kind: InstanceKind, instance_size: i64) -> Self {
        ClassDesc {
            name: ObjectRef::NULL,
            script: ObjectRef::NULL,
            library: ObjectRef::NULL,
            super_type: ObjectRef::NULL,
            interfaces: Vec::new(),
            type_parameters: Vec::new(),
            type_parameter_bounds: ObjectRef::NULL,
            factory_type: ObjectRef::NULL,
            fields: Vec::new(),
            functions: Vec::new(),
            constants: Vec::new(),
            functions_cache: ObjectRef::NULL,
            allocation_stub: ObjectRef::NULL,
            signature_function: ObjectRef::NULL,
            state: ClassState::Allocated,
            is_interface: false,
            is_const: false,
            instance_kind,
            instance_size,
            next_field_offset: instance_size,
            type_arguments_field_offset: NO_TYPE_ARGUMENTS,
        }
    }
}

/// Class handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Class(pub ObjectRef);

impl Class {
    /// Allocate a user class in `Allocated` state.
    pub fn new(heap: &mut Heap, store: &ObjectStore, name: ObjectRef, script: ObjectRef) -> Class {
        let mut desc = ClassDesc::new(InstanceKind::Instance, 0);
        desc.name = name;
        desc.script = script;
        // One header word; fields are laid out behind it at finalization.
        desc.instance_size = 1;
        desc.next_field_offset = 1;
        let r = heap.allocate(store.class_class, crate::heap::Space::Old, ObjectBody::Class(desc));
        Class(r)
    }

    /// Whether the handle is null.
    pub fn is_null(self) -> bool {
        self.0.is_null()
    }

    /// Borrow the descriptor.
    pub fn desc(self, heap: &Heap) -> &ClassDesc {
        match &heap.get(self.0).body {
            ObjectBody::Class(d) => d,
            _ => panic!("not a class"),
        }
    }

    /// Mutably borrow the descriptor.
    pub fn desc_mut(self, heap: &mut Heap) -> &mut ClassDesc {
        match &mut heap.get_mut(self.0).body {
            ObjectBody::Class(d) => d,
            _ => panic!("not a class"),
        }
    }

    /// Class name symbol.
    pub fn name(self, heap: &Heap) -> ObjectRef {
        self.desc(heap).name
    }

    /// Class name as a native string, for diagnostics.
    pub fn name_str(self, heap: &Heap) -> String {
        let name = self.desc(heap).name;
        if name.is_null() {
            String::new()
        } else {
            Str(name).to_string(heap)
        }
    }

    /// Whether the class is finalized.
    pub fn is_finalized(self, heap: &Heap) -> bool {
        self.desc(heap).state == ClassState::Finalized
    }

    /// Whether the class is an interface.
    pub fn is_interface(self, heap: &Heap) -> bool {
        self.desc(heap).is_interface
    }

    /// Whether the class is a signature class (wraps a function type).
    pub fn is_signature_class(self, heap: &Heap) -> bool {
        !self.desc(heap).signature_function.is_null()
    }

    /// The embedded signature function of a signature class.
    pub fn signature_function(self, heap: &Heap) -> ObjectRef {
        self.desc(heap).signature_function
    }

    /// Number of type parameters declared by this class alone.
    pub fn num_type_parameters(self, heap: &Heap) -> usize {
        self.desc(heap).type_parameters.len()
    }

    /// Total length of this class's type-argument vector: the sum of
    /// parameter counts across the superclass chain. The class's own
    /// parameters occupy the tail positions.
    pub fn num_type_arguments(self, heap: &Heap) -> usize {
        let mut count = self.num_type_parameters(heap);
        let mut cls = self.super_class(heap);
        while let Some(c) = cls {
            count += c.num_type_parameters(heap);
            cls = c.super_class(heap);
        }
        count
    }

    /// Whether instances carry type arguments.
    pub fn is_parameterized(self, heap: &Heap) -> bool {
        self.num_type_parameters(heap) > 0
    }

    /// The superclass, if the super type is present and resolved.
    pub fn super_class(self, heap: &Heap) -> Option<Class> {
        let super_type = self.desc(heap).super_type;
        if super_type.is_null() {
            return None;
        }
        let ty = Type(super_type);
        if !ty.has_resolved_type_class(heap) {
            return None;
        }
        Some(Class(ty.type_class(heap)))
    }

    /// Rewrite a type name into a TypeParameter node if it names one of
    /// this class's parameters.
    pub fn lookup_type_parameter(
        self,
        heap: &mut Heap,
        store: &ObjectStore,
        name: ObjectRef,
    ) -> Option<Type> {
        let params = self.desc(heap).type_parameters.clone();
        for (index, param) in params.iter().enumerate() {
            if Str(*param).equals_ref(heap, name) {
                return Some(Type::new_type_parameter(heap, store, index, *param));
            }
        }
        None
    }

    /// Look up a function declared directly on this class.
    pub fn lookup_function(self, heap: &Heap, name: ObjectRef) -> Option<Function> {
        for f in &self.desc(heap).functions {
            if Str(Function(*f).desc(heap).name).equals_ref(heap, name) {
                return Some(Function(*f));
            }
        }
        None
    }

    /// Look up a dynamically dispatchable function declared on this
    /// class. Constructors, const implicit getters and abstract
    /// functions are not dynamic-callable.
    pub fn lookup_dynamic_function(self, heap: &Heap, name: ObjectRef) -> Option<Function> {
        let function = self.lookup_function(heap, name)?;
        let desc = function.desc(heap);
        if desc.is_static {
            return None;
        }
        match desc.kind {
            FunctionKind::Regular
            | FunctionKind::Getter
            | FunctionKind::Setter
            | FunctionKind::ImplicitGetter
            | FunctionKind::ImplicitSetter => Some(function),
            FunctionKind::Constructor
            | FunctionKind::ConstImplicitGetter
            | FunctionKind::Abstract => None,
            FunctionKind::Closure | FunctionKind::Signature => None,
        }
    }

    /// Look up a static function declared on this class.
    pub fn lookup_static_function(self, heap: &Heap, name: ObjectRef) -> Option<Function> {
        let function = self.lookup_function(heap, name)?;
        let desc = function.desc(heap);
        if !desc.is_static {
            return None;
        }
        match desc.kind {
            FunctionKind::Regular
            | FunctionKind::Getter
            | FunctionKind::Setter
            | FunctionKind::ImplicitGetter
            | FunctionKind::ImplicitSetter
            | FunctionKind::ConstImplicitGetter => Some(function),
            _ => None,
        }
    }

    /// Look up a field declared directly on this class.
    pub fn lookup_field(self, heap: &Heap, name: ObjectRef) -> Option<Field> {
        for f in &self.desc(heap).fields {
            if Str(Field(*f).desc(heap).name).equals_ref(heap, name) {
                return Some(Field(*f));
            }
        }
        None
    }

    /// Look up an instance field declared directly on this class.
    pub fn lookup_instance_field(self, heap: &Heap, name: ObjectRef) -> Option<Field> {
        self.lookup_field(heap, name)
            .filter(|f| !f.desc(heap).is_static)
    }

    /// Look up a static field declared directly on this class.
    pub fn lookup_static_field(self, heap: &Heap, name: ObjectRef) -> Option<Field> {
        self.lookup_field(heap, name)
            .filter(|f| f.desc(heap).is_static)
    }

    /// Append a function descriptor.
    pub fn add_function(self, heap: &mut Heap, function: ObjectRef) {
        self.desc_mut(heap).functions.push(function);
    }

    /// Append a field descriptor.
    pub fn add_field(self, heap: &mut Heap, field: ObjectRef) {
        self.desc_mut(heap).fields.push(field);
    }

    /// Mark the class finalized.
    pub fn finalize(self, heap: &mut Heap) {
        self.desc_mut(heap).state = ClassState::Finalized;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bootstrap;
    use crate::isolate::Isolate;
    use crate::symbols;

    fn new_class(isolate: &mut Isolate, name: &str) -> Class {
        let name = symbols::new_symbol(&mut isolate.heap, &mut isolate.store, name);
        Class::new(&mut isolate.heap, &isolate.store, name, ObjectRef::NULL)
    }

    #[test]
    fn test_new_class_is_allocated() {
        let mut isolate = bootstrap::new_isolate();
        let cls = new_class(&mut isolate, "Point");
        assert_eq!(cls.desc(&isolate.heap).state, ClassState::Allocated);
        assert!(!cls.is_finalized(&isolate.heap));
        assert_eq!(cls.name_str(&isolate.heap), "Point");
        assert_eq!(isolate.heap.kind_of(cls.0), InstanceKind::Class);
    }

    #[test]
    fn test_num_type_arguments_sums_super_chain() {
        let mut isolate = bootstrap::new_isolate();
        let base = new_class(&mut isolate, "Base");
        let derived = new_class(&mut isolate, "Derived");

        let t = symbols::new_symbol(&mut isolate.heap, &mut isolate.store, "T");
        let k = symbols::new_symbol(&mut isolate.heap, &mut isolate.store, "K");
        let v = symbols::new_symbol(&mut isolate.heap, &mut isolate.store, "V");
        base.desc_mut(&mut isolate.heap).type_parameters.push(t);
        derived.desc_mut(&mut isolate.heap).type_parameters.extend([k, v]);

        let super_type =
            Type::new_non_parameterized(&mut isolate.heap, &isolate.store, base);
        derived.desc_mut(&mut isolate.heap).super_type = super_type.0;

        assert_eq!(base.num_type_parameters(&isolate.heap), 1);
        assert_eq!(derived.num_type_parameters(&isolate.heap), 2);
        assert_eq!(derived.num_type_arguments(&isolate.heap), 3);
        assert_eq!(derived.super_class(&isolate.heap), Some(base));
    }

    #[test]
    fn test_lookup_type_parameter_builds_node() {
        let mut isolate = bootstrap::new_isolate();
        let cls = new_class(&mut isolate, "Box");
        let t = symbols::new_symbol(&mut isolate.heap, &mut isolate.store, "T");
        cls.desc_mut(&mut isolate.heap).type_parameters.push(t);

        let node = cls
            .lookup_type_parameter(&mut isolate.heap, &isolate.store, t)
            .expect("parameter should resolve");
        assert!(node.is_type_parameter(&isolate.heap));
        assert_eq!(node.parameter_index(&isolate.heap), 0);

        let u = symbols::new_symbol(&mut isolate.heap, &mut isolate.store, "U");
        assert!(cls
            .lookup_type_parameter(&mut isolate.heap, &isolate.store, u)
            .is_none());
    }
}
