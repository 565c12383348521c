//! Subtype and assignability relations
//!
//! The core relation is "more specific than" on pairs of classes with
//! type-argument vectors. The top sentinel is more specific than
//! everything and everything is more specific than it; the reflexive
//! case compares argument prefixes covariantly; interfaces are chased
//! through their declared super-interfaces (instantiating their
//! argument vectors from the receiver's); signature classes compare via
//! their embedded function types; everything else recurses to the
//! superclass.

use islet_core::{Class, Flags, Function, Heap, ObjectRef, ObjectStore, Type, TypeArgs};

/// Which relation a type test asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeTestKind {
    /// Plain subtyping.
    IsSubtypeOf,
    /// Assignability: subtyping, relaxed for function parameter types.
    IsAssignableTo,
}

/// The vector-wise covariant comparison over the first `len` slots.
fn type_args_more_specific_than(
    heap: &mut Heap,
    store: &ObjectStore,
    flags: &Flags,
    args: TypeArgs,
    other: TypeArgs,
    len: usize,
) -> bool {
    debug_assert!(args.len(heap) >= len && other.len(heap) >= len);
    for i in 0..len {
        let ty = args.type_at(heap, store, i);
        let other_ty = other.type_at(heap, store, i);
        if !type_is_more_specific_than(heap, store, flags, ty, other_ty) {
            return false;
        }
    }
    true
}

/// The argument vector of `ty`, materializing the lazy view for an
/// instantiated type.
fn arguments_of(heap: &mut Heap, store: &ObjectStore, ty: Type) -> TypeArgs {
    use islet_core::ObjectBody;
    match heap.get(ty.0).body {
        ObjectBody::ParameterizedType { arguments, .. } => TypeArgs(arguments),
        ObjectBody::InstantiatedType {
            uninstantiated,
            instantiator,
        } => {
            let inner = arguments_of(heap, store, Type(uninstantiated));
            if inner.is_null() {
                return inner;
            }
            TypeArgs::new_instantiated(heap, store, inner, TypeArgs(instantiator))
        }
        _ => TypeArgs(ObjectRef::NULL),
    }
}

/// Whether `(cls, args)` is more specific than `(other, other_args)`.
pub fn class_is_more_specific_than(
    heap: &mut Heap,
    store: &ObjectStore,
    flags: &Flags,
    cls: Class,
    args: TypeArgs,
    other: Class,
    other_args: TypeArgs,
) -> bool {
    // The top sentinel on the left is treated as the bottom type, which
    // is more specific than anything; anything is more specific than
    // the sentinel on the right.
    if cls.0 == store.var_class || other.0 == store.var_class {
        return true;
    }
    // Reflexivity, with covariant argument comparison over the prefix
    // this class is responsible for.
    if cls == other {
        if !cls.is_parameterized(heap) {
            return true;
        }
        let len = cls.num_type_arguments(heap);
        if args.is_null()
            || other_args.is_null()
            || args.is_var_types(heap, store, len)
            || other_args.is_var_types(heap, store, len)
        {
            return true;
        }
        return type_args_more_specific_than(heap, store, flags, args, other_args, len);
    }
    // Direct super-interface check, which also covers transitivity.
    if other.is_interface(heap) {
        let interfaces = cls.desc(heap).interfaces.clone();
        for interface in interfaces {
            let interface = Type(interface);
            let interface_class = Class(interface.type_class(heap));
            let mut interface_args = TypeArgs(interface.arguments(heap));
            if !interface_args.is_null() && !interface_args.is_instantiated(heap) {
                // The interface is parameterized by this class's type
                // parameters; instantiate from our vector before the
                // test. A raw receiver forces a raw interface.
                if args.is_null() {
                    interface_args = TypeArgs(ObjectRef::NULL);
                } else {
                    let offset =
                        cls.num_type_arguments(heap) - cls.num_type_parameters(heap);
                    interface_args = interface_args.instantiate_from(heap, store, args, offset);
                }
            }
            if class_is_more_specific_than(
                heap,
                store,
                flags,
                interface_class,
                interface_args,
                other,
                other_args,
            ) {
                return true;
            }
        }
    }
    if cls.is_signature_class(heap) && other.is_signature_class(heap) {
        let fun = Function(cls.signature_function(heap));
        let other_fun = Function(other.signature_function(heap));
        return function_test_type(heap, store, flags, TypeTestKind::IsSubtypeOf, fun, other_fun);
    }
    if cls.is_interface(heap) {
        // An interface is never below a non-interface class, except the
        // root class every instance extends.
        return other.0 == store.var_class || other.0 == store.object_class;
    }
    match cls.super_class(heap) {
        Some(super_class) => class_is_more_specific_than(
            heap,
            store,
            flags,
            super_class,
            args,
            other,
            other_args,
        ),
        None => false,
    }
}

/// Class-level type test.
pub fn class_test_type(
    heap: &mut Heap,
    store: &ObjectStore,
    flags: &Flags,
    kind: TypeTestKind,
    cls: Class,
    args: TypeArgs,
    other: Class,
    other_args: TypeArgs,
) -> bool {
    if kind == TypeTestKind::IsAssignableTo {
        // Assignability only differs from subtyping for function types;
        // everything else falls through to a subtype test.
        if cls.is_signature_class(heap) && other.is_signature_class(heap) {
            let src = Function(cls.signature_function(heap));
            let dst = Function(other.signature_function(heap));
            return function_test_type(heap, store, flags, TypeTestKind::IsAssignableTo, src, dst);
        }
    }
    class_is_more_specific_than(heap, store, flags, cls, args, other, other_args)
}

/// Whether `ty` is more specific than `other`. Both must be finalized.
pub fn type_is_more_specific_than(
    heap: &mut Heap,
    store: &ObjectStore,
    flags: &Flags,
    ty: Type,
    other: Type,
) -> bool {
    // Null slots in partially built vectors compare as the sentinel.
    if ty.is_null() || other.is_null() {
        return true;
    }
    // Uninstantiated parameters only match themselves, by position.
    if ty.is_type_parameter(heap) || other.is_type_parameter(heap) {
        return ty.is_type_parameter(heap)
            && other.is_type_parameter(heap)
            && ty.parameter_index(heap) == other.parameter_index(heap);
    }
    let cls = Class(ty.type_class(heap));
    let other_cls = Class(other.type_class(heap));
    let args = arguments_of(heap, store, ty);
    let other_args = arguments_of(heap, store, other);
    class_is_more_specific_than(heap, store, flags, cls, args, other_cls, other_args)
}

fn type_test(
    heap: &mut Heap,
    store: &ObjectStore,
    flags: &Flags,
    kind: TypeTestKind,
    ty: Type,
    other: Type,
) -> bool {
    if ty.is_null() || other.is_null() {
        return true;
    }
    if ty.is_type_parameter(heap) || other.is_type_parameter(heap) {
        return ty.is_type_parameter(heap)
            && other.is_type_parameter(heap)
            && ty.parameter_index(heap) == other.parameter_index(heap);
    }
    let cls = Class(ty.type_class(heap));
    let other_cls = Class(other.type_class(heap));
    let args = arguments_of(heap, store, ty);
    let other_args = arguments_of(heap, store, other);
    class_test_type(heap, store, flags, kind, cls, args, other_cls, other_args)
}

/// Whether `ty` is a subtype of `other`.
pub fn type_is_subtype_of(
    heap: &mut Heap,
    store: &ObjectStore,
    flags: &Flags,
    ty: Type,
    other: Type,
) -> bool {
    type_test(heap, store, flags, TypeTestKind::IsSubtypeOf, ty, other)
}

/// Whether `ty` is assignable to `other`.
pub fn type_is_assignable_to(
    heap: &mut Heap,
    store: &ObjectStore,
    flags: &Flags,
    ty: Type,
    other: Type,
) -> bool {
    type_test(heap, store, flags, TypeTestKind::IsAssignableTo, ty, other)
}

fn parameter_type_matches(
    heap: &mut Heap,
    store: &ObjectStore,
    flags: &Flags,
    param: Type,
    other_param: Type,
) -> bool {
    if flags.bidirectional_parameter_checks {
        // Either direction of subtyping is accepted on parameter types;
        // the strict rule would reject safe-looking code the original
        // language rules allow.
        type_is_subtype_of(heap, store, flags, param, other_param)
            || type_is_subtype_of(heap, store, flags, other_param, param)
    } else {
        // Strict contravariance.
        type_is_subtype_of(heap, store, flags, other_param, param)
    }
}

fn is_wildcard_parameter(heap: &Heap, store: &ObjectStore, ty: Type) -> bool {
    ty.is_null() || ty.is_type_parameter(heap) || ty.is_var_type(heap, store)
}

/// Function-type test: parameter counts, result type, fixed parameter
/// types, and name-matched optional parameter types. Assignability
/// additionally accepts the reversed named-parameter direction.
pub fn function_test_type(
    heap: &mut Heap,
    store: &ObjectStore,
    flags: &Flags,
    kind: TypeTestKind,
    fun: Function,
    other: Function,
) -> bool {
    let (num_fixed, num_opt) = {
        let d = fun.desc(heap);
        (d.num_fixed_parameters, d.num_optional_parameters)
    };
    let (other_num_fixed, other_num_opt) = {
        let d = other.desc(heap);
        (d.num_fixed_parameters, d.num_optional_parameters)
    };
    if num_fixed != other_num_fixed
        || (kind == TypeTestKind::IsSubtypeOf && num_opt < other_num_opt)
    {
        return false;
    }

    // Result types: relaxed for void, the sentinel and parameters.
    let other_res = Type(other.desc(heap).result_type);
    if !is_wildcard_parameter(heap, store, other_res) && !other_res.is_void_type(heap, store) {
        let res = Type(fun.desc(heap).result_type);
        if !is_wildcard_parameter(heap, store, res) {
            let forward = !res.is_void_type(heap, store)
                && type_is_subtype_of(heap, store, flags, res, other_res);
            if !forward {
                let backward = kind == TypeTestKind::IsAssignableTo
                    && type_is_subtype_of(heap, store, flags, other_res, res);
                if !backward {
                    return false;
                }
            }
        }
    }

    // Fixed parameter types.
    for i in 0..num_fixed {
        let param = Type(fun.desc(heap).parameter_types[i]);
        if is_wildcard_parameter(heap, store, param) {
            continue;
        }
        let other_param = Type(other.desc(heap).parameter_types[i]);
        if is_wildcard_parameter(heap, store, other_param) {
            continue;
        }
        if !parameter_type_matches(heap, store, flags, param, other_param) {
            return false;
        }
    }

    // Optional named parameters: every name on the other side must be
    // matched here with a compatible type.
    if named_parameters_match(heap, store, flags, fun, other) {
        return true;
    }
    if kind == TypeTestKind::IsSubtypeOf {
        return false;
    }
    // Assignability retries with the sides swapped.
    named_parameters_match(heap, store, flags, other, fun)
}

fn named_parameters_match(
    heap: &mut Heap,
    store: &ObjectStore,
    flags: &Flags,
    fun: Function,
    other: Function,
) -> bool {
    use islet_core::Str;
    let (num_fixed, num_params) = {
        let d = fun.desc(heap);
        (
            d.num_fixed_parameters,
            d.num_fixed_parameters + d.num_optional_parameters,
        )
    };
    let (other_num_fixed, other_num_params) = {
        let d = other.desc(heap);
        (
            d.num_fixed_parameters,
            d.num_fixed_parameters + d.num_optional_parameters,
        )
    };
    for i in other_num_fixed..other_num_params {
        let other_name = other.desc(heap).parameter_names[i];
        let mut found = false;
        for j in num_fixed..num_params {
            if Str(fun.desc(heap).parameter_names[j]).equals_ref(heap, other_name) {
                found = true;
                let param = Type(fun.desc(heap).parameter_types[j]);
                if is_wildcard_parameter(heap, store, param) {
                    break;
                }
                let other_param = Type(other.desc(heap).parameter_types[i]);
                if is_wildcard_parameter(heap, store, other_param) {
                    break;
                }
                if !parameter_type_matches(heap, store, flags, param, other_param) {
                    return false;
                }
                break;
            }
        }
        if !found {
            return false;
        }
    }
    true
}

/// Whether `fun`'s type is a subtype of `other`'s.
pub fn function_is_subtype_of(
    heap: &mut Heap,
    store: &ObjectStore,
    flags: &Flags,
    fun: Function,
    other: Function,
) -> bool {
    function_test_type(heap, store, flags, TypeTestKind::IsSubtypeOf, fun, other)
}

/// Whether `fun`'s type is assignable to `other`'s.
pub fn function_is_assignable_to(
    heap: &mut Heap,
    store: &ObjectStore,
    flags: &Flags,
    fun: Function,
    other: Function,
) -> bool {
    function_test_type(heap, store, flags, TypeTestKind::IsAssignableTo, fun, other)
}

/// Instance-level type test with lazy instantiation of `other` from the
/// instantiator vector. The null instance is only an instance of the
/// root class.
pub fn instance_is_instance_of(
    heap: &mut Heap,
    store: &ObjectStore,
    flags: &Flags,
    instance: ObjectRef,
    other: Type,
    other_instantiator: TypeArgs,
) -> bool {
    debug_assert!(other.is_finalized(heap));
    if instance.is_null() {
        // null is an instance of the root class only.
        if other.is_instantiated(heap) {
            return type_is_subtype_of(heap, store, flags, Type(store.object_type), other);
        }
        return false;
    }
    let cls = Class(islet_core::class_of_value(heap, store, instance));
    let args = if cls.is_parameterized(heap) {
        match &heap.get(instance).body {
            islet_core::ObjectBody::Instance { type_arguments, .. } => TypeArgs(*type_arguments),
            islet_core::ObjectBody::Array(a) | islet_core::ObjectBody::ImmutableArray(a) => {
                TypeArgs(a.type_arguments)
            }
            _ => TypeArgs(ObjectRef::NULL),
        }
    } else {
        TypeArgs(ObjectRef::NULL)
    };

    // Instantiate the tested type without allocating when it is a bare
    // type parameter.
    let (other_cls, other_args) = if other.is_type_parameter(heap) {
        let instantiated = if other_instantiator.is_null() {
            Type(store.var_type)
        } else {
            let index = other.parameter_index(heap);
            other_instantiator.type_at(heap, store, index)
        };
        let args = arguments_of(heap, store, instantiated);
        (Class(instantiated.type_class(heap)), args)
    } else {
        let mut other_args = arguments_of(heap, store, other);
        if !other_args.is_null() && !other_args.is_instantiated(heap) {
            other_args = other_args.instantiate_from(heap, store, other_instantiator, 0);
        }
        (Class(other.type_class(heap)), other_args)
    };
    class_test_type(
        heap,
        store,
        flags,
        TypeTestKind::IsSubtypeOf,
        cls,
        args,
        other_cls,
        other_args,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use islet_core::{bootstrap, symbols, Isolate};

    fn new_class(isolate: &mut Isolate, name: &str) -> Class {
        let name = symbols::new_symbol(&mut isolate.heap, &mut isolate.store, name);
        let cls = Class::new(&mut isolate.heap, &isolate.store, name, ObjectRef::NULL);
        cls.desc_mut(&mut isolate.heap).super_type = isolate.store.object_type;
        cls
    }

    fn type_of(isolate: &mut Isolate, cls: Class) -> Type {
        Type::new_non_parameterized(&mut isolate.heap, &isolate.store, cls)
    }

    #[test]
    fn test_reflexive() {
        let mut isolate = bootstrap::new_isolate();
        let cls = new_class(&mut isolate, "A");
        let ty = type_of(&mut isolate, cls);
        let flags = isolate.flags.clone();
        assert!(type_is_more_specific_than(
            &mut isolate.heap,
            &isolate.store,
            &flags,
            ty,
            ty
        ));
        assert!(type_is_subtype_of(
            &mut isolate.heap,
            &isolate.store,
            &flags,
            ty,
            ty
        ));
    }

    #[test]
    fn test_top_sentinel_both_directions() {
        let mut isolate = bootstrap::new_isolate();
        let cls = new_class(&mut isolate, "A");
        let ty = type_of(&mut isolate, cls);
        let var = Type(isolate.store.var_type);
        let flags = isolate.flags.clone();
        assert!(type_is_more_specific_than(
            &mut isolate.heap,
            &isolate.store,
            &flags,
            ty,
            var
        ));
        assert!(type_is_more_specific_than(
            &mut isolate.heap,
            &isolate.store,
            &flags,
            var,
            ty
        ));
    }

    #[test]
    fn test_superclass_chain_is_transitive() {
        let mut isolate = bootstrap::new_isolate();
        let a = new_class(&mut isolate, "A");
        let b = new_class(&mut isolate, "B");
        let c = new_class(&mut isolate, "C");
        let a_type = type_of(&mut isolate, a);
        let b_type = type_of(&mut isolate, b);
        let c_type = type_of(&mut isolate, c);
        b.desc_mut(&mut isolate.heap).super_type = a_type.0;
        c.desc_mut(&mut isolate.heap).super_type = b_type.0;

        let flags = isolate.flags.clone();
        let (heap, store) = (&mut isolate.heap, &isolate.store);
        assert!(type_is_subtype_of(heap, store, &flags, c_type, a_type));
        assert!(type_is_subtype_of(heap, store, &flags, c_type, b_type));
        assert!(!type_is_subtype_of(heap, store, &flags, a_type, c_type));
    }

    #[test]
    fn test_interface_subtyping() {
        let mut isolate = bootstrap::new_isolate();
        let iface = new_class(&mut isolate, "Comparable");
        iface.desc_mut(&mut isolate.heap).is_interface = true;
        let iface_type = type_of(&mut isolate, iface);
        let cls = new_class(&mut isolate, "Duration");
        cls.desc_mut(&mut isolate.heap).interfaces.push(iface_type.0);
        let cls_type = type_of(&mut isolate, cls);

        let flags = isolate.flags.clone();
        let (heap, store) = (&mut isolate.heap, &isolate.store);
        assert!(type_is_subtype_of(heap, store, &flags, cls_type, iface_type));
        assert!(!type_is_subtype_of(heap, store, &flags, iface_type, cls_type));
        // An interface is below the root class.
        let object_type = Type(store.object_type);
        assert!(type_is_subtype_of(heap, store, &flags, iface_type, object_type));
    }

    #[test]
    fn test_covariant_type_arguments() {
        let mut isolate = bootstrap::new_isolate();
        let a = new_class(&mut isolate, "A");
        let b = new_class(&mut isolate, "B");
        let a_type = type_of(&mut isolate, a);
        let b_type = type_of(&mut isolate, b);
        b.desc_mut(&mut isolate.heap).super_type = a_type.0;

        let box_class = new_class(&mut isolate, "Box");
        let t = symbols::new_symbol(&mut isolate.heap, &mut isolate.store, "T");
        box_class.desc_mut(&mut isolate.heap).type_parameters.push(t);

        let flags = isolate.flags.clone();
        let (heap, store) = (&mut isolate.heap, &isolate.store);
        let of_a = TypeArgs::new_type_array(heap, store, 1);
        of_a.set_type_at(heap, 0, a_type);
        let of_b = TypeArgs::new_type_array(heap, store, 1);
        of_b.set_type_at(heap, 0, b_type);

        // Box<B> is more specific than Box<A>, not the reverse.
        assert!(class_is_more_specific_than(
            heap, store, &flags, box_class, of_b, box_class, of_a
        ));
        assert!(!class_is_more_specific_than(
            heap, store, &flags, box_class, of_a, box_class, of_b
        ));
        // A raw vector matches trivially.
        let raw = TypeArgs(ObjectRef::NULL);
        assert!(class_is_more_specific_than(
            heap, store, &flags, box_class, raw, box_class, of_a
        ));
    }

    #[test]
    fn test_function_parameter_policy() {
        let mut isolate = bootstrap::new_isolate();
        let a = new_class(&mut isolate, "A");
        let b = new_class(&mut isolate, "B");
        let a_type = type_of(&mut isolate, a);
        let b_type = type_of(&mut isolate, b);
        b.desc_mut(&mut isolate.heap).super_type = a_type.0;

        let name = symbols::new_symbol(&mut isolate.heap, &mut isolate.store, "call");
        let takes_a = Function::new(
            &mut isolate.heap,
            &isolate.store,
            name,
            islet_core::FunctionKind::Signature,
            false,
            false,
            0,
        );
        let takes_b = Function::new(
            &mut isolate.heap,
            &isolate.store,
            name,
            islet_core::FunctionKind::Signature,
            false,
            false,
            0,
        );
        {
            let object_type = isolate.store.object_type;
            let d = takes_a.desc_mut(&mut isolate.heap);
            d.num_fixed_parameters = 1;
            d.parameter_types = vec![a_type.0];
            d.parameter_names = vec![ObjectRef::NULL];
            d.result_type = object_type;
            let d = takes_b.desc_mut(&mut isolate.heap);
            d.num_fixed_parameters = 1;
            d.parameter_types = vec![b_type.0];
            d.parameter_names = vec![ObjectRef::NULL];
            d.result_type = object_type;
        }

        let mut flags = isolate.flags.clone();
        let (heap, store) = (&mut isolate.heap, &isolate.store);

        // Bidirectional policy: both directions pass.
        assert!(function_is_subtype_of(heap, store, &flags, takes_a, takes_b));
        assert!(function_is_subtype_of(heap, store, &flags, takes_b, takes_a));

        // Strict policy: only the contravariant direction passes.
        flags.bidirectional_parameter_checks = false;
        assert!(function_is_subtype_of(heap, store, &flags, takes_a, takes_b));
        assert!(!function_is_subtype_of(heap, store, &flags, takes_b, takes_a));
    }

    #[test]
    fn test_null_instance_of_object_only() {
        let mut isolate = bootstrap::new_isolate();
        let cls = new_class(&mut isolate, "A");
        let cls_type = type_of(&mut isolate, cls);
        let flags = isolate.flags.clone();
        let (heap, store) = (&mut isolate.heap, &isolate.store);
        let object_type = Type(store.object_type);
        let raw = TypeArgs(ObjectRef::NULL);
        assert!(instance_is_instance_of(
            heap,
            store,
            &flags,
            ObjectRef::NULL,
            object_type,
            raw
        ));
        assert!(!instance_is_instance_of(
            heap,
            store,
            &flags,
            ObjectRef::NULL,
            cls_type,
            raw
        ));
    }

    #[test]
    fn test_smi_instance_of_its_class() {
        let mut isolate = bootstrap::new_isolate();
        let smi_class = Class(isolate.store.smi_class);
        let smi_type =
            Type::new_non_parameterized(&mut isolate.heap, &isolate.store, smi_class);
        let flags = isolate.flags.clone();
        let (heap, store) = (&mut isolate.heap, &isolate.store);
        let raw = TypeArgs(ObjectRef::NULL);
        assert!(instance_is_instance_of(
            heap,
            store,
            &flags,
            ObjectRef::smi(42),
            smi_type,
            raw
        ));
        let object_type = Type(store.object_type);
        assert!(instance_is_instance_of(
            heap,
            store,
            &flags,
            ObjectRef::smi(42),
            object_type,
            raw
        ));
    }
}
