//! Allocation entries
//!
//! Runtime entries backing object, array, context and closure
//! allocation, type-argument instantiation and the instance-of test.
//! The type-argument handling implements the instantiator
//! optimizations: a fully instantiated vector is used as-is, an
//! uninstantiated-identity vector is replaced wholesale by the
//! instantiator, and everything else becomes a lazy instantiated view.

use crate::entries::NativeArguments;
use islet_core::{
    Class, Context, Function, Isolate, ObjectBody, ObjectRef, Space, TypeArgs, VmResult,
};
use islet_types::instance_is_instance_of;

/// Allocate a plain instance of `cls` with null fields.
pub fn new_instance(isolate: &mut Isolate, cls: Class) -> ObjectRef {
    let size = cls.desc(&isolate.heap).instance_size.max(1) as usize;
    isolate.heap.allocate(
        cls.0,
        Space::New,
        ObjectBody::Instance {
            type_arguments: ObjectRef::NULL,
            fields: vec![ObjectRef::NULL; size - 1],
        },
    )
}

/// Pick the type-argument vector for a new object: the vector itself
/// when instantiated, the instantiator when the vector is the identity,
/// a lazy view otherwise, and null (raw) when no instantiator exists.
fn select_type_arguments(
    isolate: &mut Isolate,
    type_arguments: TypeArgs,
    instantiator: TypeArgs,
) -> Option<TypeArgs> {
    if instantiator.is_null() {
        // Either the vector is instantiated (use it), or the
        // instantiator is raw and the vector cannot be instantiated
        // (leave the object raw).
        if type_arguments.is_instantiated(&isolate.heap) {
            return Some(type_arguments);
        }
        return None;
    }
    debug_assert!(!type_arguments.is_instantiated(&isolate.heap));
    if !instantiator.is_type_array(&isolate.heap) {
        // A lazy instantiator cannot be reused directly.
        return Some(TypeArgs::new_instantiated(
            &mut isolate.heap,
            &isolate.store,
            type_arguments,
            instantiator,
        ));
    }
    if type_arguments.is_uninstantiated_identity(&isolate.heap)
        && instantiator.len(&isolate.heap) == type_arguments.len(&isolate.heap)
    {
        return Some(instantiator);
    }
    Some(TypeArgs::new_instantiated(
        &mut isolate.heap,
        &isolate.store,
        type_arguments,
        instantiator,
    ))
}

/// AllocateArray(length, element_type, instantiator).
pub fn allocate_array_entry(
    isolate: &mut Isolate,
    arguments: &mut NativeArguments,
) -> VmResult<()> {
    let length = arguments.at(0).smi_value() as usize;
    let array = islet_core::Array::new(&mut isolate.heap, &isolate.store, length, Space::New);
    arguments.set_return(array.0);

    let element_type = TypeArgs(arguments.at(1));
    if element_type.is_null() {
        // A raw array needs no instantiator.
        debug_assert!(arguments.at(2).is_null());
        return Ok(());
    }
    // An array takes exactly one type argument.
    debug_assert_eq!(element_type.len(&isolate.heap), 1);
    let instantiator = TypeArgs(arguments.at(2));
    if let Some(selected) = select_type_arguments(isolate, element_type, instantiator) {
        array.set_type_arguments(&mut isolate.heap, selected.0);
    }
    Ok(())
}

/// AllocateObject(class, type_arguments, instantiator).
pub fn allocate_object_entry(
    isolate: &mut Isolate,
    arguments: &mut NativeArguments,
) -> VmResult<()> {
    let cls = Class(arguments.at(0));
    let instance = new_instance(isolate, cls);
    arguments.set_return(instance);

    if !cls.is_parameterized(&isolate.heap) {
        debug_assert!(arguments.at(1).is_null());
        return Ok(());
    }
    let type_arguments = TypeArgs(arguments.at(1));
    if type_arguments.is_null() {
        debug_assert!(arguments.at(2).is_null());
        return Ok(());
    }
    debug_assert_eq!(
        type_arguments.len(&isolate.heap),
        cls.num_type_arguments(&isolate.heap)
    );
    let instantiator = TypeArgs(arguments.at(2));
    if let Some(selected) = select_type_arguments(isolate, type_arguments, instantiator) {
        match &mut isolate.heap.get_mut(instance).body {
            ObjectBody::Instance { type_arguments, .. } => *type_arguments = selected.0,
            _ => unreachable!(),
        }
    }
    Ok(())
}

/// InstantiateTypeArguments(uninstantiated, instantiator).
pub fn instantiate_type_arguments_entry(
    isolate: &mut Isolate,
    arguments: &mut NativeArguments,
) -> VmResult<()> {
    let type_arguments = TypeArgs(arguments.at(0));
    let instantiator = TypeArgs(arguments.at(1));
    debug_assert!(
        !type_arguments.is_null()
            && !type_arguments.is_instantiated(&isolate.heap)
            && !instantiator.is_null()
    );
    // The caller's inlined fast path already handled the case where
    // the instantiator can be used verbatim.
    let instantiated = TypeArgs::new_instantiated(
        &mut isolate.heap,
        &isolate.store,
        type_arguments,
        instantiator,
    );
    arguments.set_return(instantiated.0);
    Ok(())
}

/// AllocateClosure(function): close over the current context.
pub fn allocate_closure_entry(
    isolate: &mut Isolate,
    arguments: &mut NativeArguments,
) -> VmResult<()> {
    let function = Function(arguments.at(0));
    let context = if isolate.top_context.is_null() {
        Context(isolate.store.empty_context)
    } else {
        Context(isolate.top_context)
    };
    let closure =
        islet_core::new_closure(&mut isolate.heap, &isolate.store, function, context);
    arguments.set_return(closure);
    Ok(())
}

/// AllocateStaticImplicitClosure(function): close over the empty
/// context.
pub fn allocate_static_implicit_closure_entry(
    isolate: &mut Isolate,
    arguments: &mut NativeArguments,
) -> VmResult<()> {
    let function = Function(arguments.at(0));
    debug_assert!(function.desc(&isolate.heap).is_static);
    let context = Context(isolate.store.empty_context);
    let closure =
        islet_core::new_closure(&mut isolate.heap, &isolate.store, function, context);
    arguments.set_return(closure);
    Ok(())
}

/// AllocateImplicitClosure(function, receiver): close over a one-slot
/// context holding the receiver.
pub fn allocate_implicit_closure_entry(
    isolate: &mut Isolate,
    arguments: &mut NativeArguments,
) -> VmResult<()> {
    let function = Function(arguments.at(0));
    let receiver = arguments.at(1);
    let id = isolate.id();
    let context = Context::new(&mut isolate.heap, &isolate.store, id, 1);
    context.set_at(&mut isolate.heap, 0, receiver);
    let closure =
        islet_core::new_closure(&mut isolate.heap, &isolate.store, function, context);
    arguments.set_return(closure);
    Ok(())
}

/// AllocateContext(num_variables).
pub fn allocate_context_entry(
    isolate: &mut Isolate,
    arguments: &mut NativeArguments,
) -> VmResult<()> {
    let num_variables = arguments.at(0).smi_value() as usize;
    let id = isolate.id();
    let context = Context::new(&mut isolate.heap, &isolate.store, id, num_variables);
    arguments.set_return(context.0);
    Ok(())
}

/// Instanceof(instance, type, instantiator). The null test is inlined
/// at the call site; the instance is never null here.
pub fn instanceof_entry(isolate: &mut Isolate, arguments: &mut NativeArguments) -> VmResult<()> {
    let instance = arguments.at(0);
    let ty = islet_core::Type(arguments.at(1));
    let instantiator = TypeArgs(arguments.at(2));
    debug_assert!(ty.is_finalized(&isolate.heap));
    debug_assert!(!instance.is_null());
    let flags = isolate.flags.clone();
    let result = instance_is_instance_of(
        &mut isolate.heap,
        &isolate.store,
        &flags,
        instance,
        ty,
        instantiator,
    );
    arguments.set_return(if result {
        isolate.store.true_value
    } else {
        isolate.store.false_value
    });
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entries::call_to_runtime;
    use islet_core::{bootstrap, symbols, InstanceKind, Type};

    fn sym(isolate: &mut Isolate, s: &str) -> ObjectRef {
        symbols::new_symbol(&mut isolate.heap, &mut isolate.store, s)
    }

    fn parameterized_class(isolate: &mut Isolate, name: &str, params: &[&str]) -> Class {
        let name = sym(isolate, name);
        let cls = Class::new(&mut isolate.heap, &isolate.store, name, ObjectRef::NULL);
        for p in params {
            let p = sym(isolate, p);
            cls.desc_mut(&mut isolate.heap).type_parameters.push(p);
        }
        cls
    }

    #[test]
    fn test_allocate_array_with_instantiated_element_type() {
        let mut isolate = bootstrap::new_isolate();
        let element_type = TypeArgs::new_type_array(&mut isolate.heap, &isolate.store, 1);
        element_type.set_type_at(&mut isolate.heap, 0, Type(isolate.store.object_type));

        let array = call_to_runtime(
            &mut isolate,
            "AllocateArray",
            &[ObjectRef::smi(4), element_type.0, ObjectRef::NULL],
        )
        .unwrap();
        assert_eq!(isolate.heap.kind_of(array), InstanceKind::Array);
        assert_eq!(islet_core::Array(array).len(&isolate.heap), 4);
        assert_eq!(
            islet_core::Array(array).type_arguments(&isolate.heap),
            element_type.0
        );
    }

    #[test]
    fn test_allocate_array_identity_uses_instantiator() {
        let mut isolate = bootstrap::new_isolate();
        let t = sym(&mut isolate, "T");
        let element_type = TypeArgs::new_type_array(&mut isolate.heap, &isolate.store, 1);
        let param = Type::new_type_parameter(&mut isolate.heap, &isolate.store, 0, t);
        element_type.set_type_at(&mut isolate.heap, 0, param);

        let instantiator = TypeArgs::new_type_array(&mut isolate.heap, &isolate.store, 1);
        instantiator.set_type_at(&mut isolate.heap, 0, Type(isolate.store.object_type));

        let array = call_to_runtime(
            &mut isolate,
            "AllocateArray",
            &[ObjectRef::smi(0), element_type.0, instantiator.0],
        )
        .unwrap();
        // The identity vector is replaced wholesale by the instantiator.
        assert_eq!(
            islet_core::Array(array).type_arguments(&isolate.heap),
            instantiator.0
        );
    }

    #[test]
    fn test_allocate_object_sets_type_arguments() {
        let mut isolate = bootstrap::new_isolate();
        let cls = parameterized_class(&mut isolate, "Box", &["T"]);
        let args = TypeArgs::new_type_array(&mut isolate.heap, &isolate.store, 1);
        args.set_type_at(&mut isolate.heap, 0, Type(isolate.store.object_type));

        let instance = call_to_runtime(
            &mut isolate,
            "AllocateObject",
            &[cls.0, args.0, ObjectRef::NULL],
        )
        .unwrap();
        assert_eq!(isolate.heap.class_of(instance), cls.0);
        match &isolate.heap.get(instance).body {
            ObjectBody::Instance { type_arguments, .. } => assert_eq!(*type_arguments, args.0),
            _ => unreachable!(),
        }
    }

    #[test]
    fn test_allocate_object_non_parameterized() {
        let mut isolate = bootstrap::new_isolate();
        let cls = parameterized_class(&mut isolate, "Plain", &[]);
        let instance = call_to_runtime(
            &mut isolate,
            "AllocateObject",
            &[cls.0, ObjectRef::NULL, ObjectRef::NULL],
        )
        .unwrap();
        assert_eq!(isolate.heap.class_of(instance), cls.0);
    }

    #[test]
    fn test_instantiate_type_arguments_builds_view() {
        let mut isolate = bootstrap::new_isolate();
        let t = sym(&mut isolate, "T");
        let uninstantiated = TypeArgs::new_type_array(&mut isolate.heap, &isolate.store, 1);
        let param = Type::new_type_parameter(&mut isolate.heap, &isolate.store, 0, t);
        uninstantiated.set_type_at(&mut isolate.heap, 0, param);
        let instantiator = TypeArgs::new_type_array(&mut isolate.heap, &isolate.store, 1);
        instantiator.set_type_at(&mut isolate.heap, 0, Type(isolate.store.object_type));

        let result = call_to_runtime(
            &mut isolate,
            "InstantiateTypeArguments",
            &[uninstantiated.0, instantiator.0],
        )
        .unwrap();
        assert_eq!(
            isolate.heap.kind_of(result),
            InstanceKind::InstantiatedTypeArguments
        );
        let view = TypeArgs(result);
        let resolved = view.type_at(&mut isolate.heap, &isolate.store, 0);
        assert_eq!(resolved.0, isolate.store.object_type);
    }

    #[test]
    fn test_closure_allocation_kinds() {
        let mut isolate = bootstrap::new_isolate();
        let name = sym(&mut isolate, "fn");
        let function = Function::new(
            &mut isolate.heap,
            &isolate.store,
            name,
            islet_core::FunctionKind::Closure,
            true,
            false,
            0,
        );

        // Static implicit closure: empty context.
        let closure = call_to_runtime(
            &mut isolate,
            "AllocateStaticImplicitClosure",
            &[function.0],
        )
        .unwrap();
        match &isolate.heap.get(closure).body {
            ObjectBody::Closure { function: f, context } => {
                assert_eq!(*f, function.0);
                assert_eq!(*context, isolate.store.empty_context);
            }
            _ => panic!("not a closure"),
        }

        // Implicit closure: one-slot context holding the receiver.
        let object_class = isolate.store.object_class;
        let receiver = new_instance(&mut isolate, Class(object_class));
        let closure = call_to_runtime(
            &mut isolate,
            "AllocateImplicitClosure",
            &[function.0, receiver],
        )
        .unwrap();
        match &isolate.heap.get(closure).body {
            ObjectBody::Closure { context, .. } => {
                let context = Context(*context);
                assert_eq!(context.num_variables(&isolate.heap), 1);
                assert_eq!(context.at(&isolate.heap, 0), receiver);
            }
            _ => panic!("not a closure"),
        }

        // The closure's class header is the signature class.
        let signature_class = function.desc(&isolate.heap).signature_class;
        assert_eq!(isolate.heap.class_of(closure), signature_class);
    }

    #[test]
    fn test_instanceof_entry_returns_singletons() {
        let mut isolate = bootstrap::new_isolate();
        let cls = parameterized_class(&mut isolate, "Thing", &[]);
        cls.desc_mut(&mut isolate.heap).super_type = isolate.store.object_type;
        let instance = new_instance(&mut isolate, cls);
        let cls_type = Type::new_non_parameterized(&mut isolate.heap, &isolate.store, cls);

        let result = call_to_runtime(
            &mut isolate,
            "Instanceof",
            &[instance, cls_type.0, ObjectRef::NULL],
        )
        .unwrap();
        assert_eq!(result, isolate.store.true_value);

        let other = parameterized_class(&mut isolate, "Other", &[]);
        other.desc_mut(&mut isolate.heap).super_type = isolate.store.object_type;
        let other_type = Type::new_non_parameterized(&mut isolate.heap, &isolate.store, other);
        let result = call_to_runtime(
            &mut isolate,
            "Instanceof",
            &[instance, other_type.0, ObjectRef::NULL],
        )
        .unwrap();
        assert_eq!(result, isolate.store.false_value);
    }
}
