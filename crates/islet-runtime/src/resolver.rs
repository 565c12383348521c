//! Method resolution
//!
//! Dynamic resolution walks the receiver class's superclass chain for a
//! dynamically dispatchable function with the requested name, then
//! validates the call's argument counts against the found signature. A
//! null receiver resolves against the root class.

use islet_core::{class_of_value, Class, Function, Isolate, ObjectRef};
use log::trace;

/// Resolve a dynamic call `receiver.name(...)`. Returns None when no
/// method matches or when the argument counts do not fit.
pub fn resolve_dynamic(
    isolate: &Isolate,
    receiver: ObjectRef,
    name: ObjectRef,
    num_arguments: usize,
    num_named_arguments: usize,
) -> Option<Function> {
    let receiver_class = if receiver.is_null() {
        Class(isolate.store.object_class)
    } else {
        Class(class_of_value(&isolate.heap, &isolate.store, receiver))
    };
    let function = lookup_dynamic_in_chain(isolate, receiver_class, name)?;
    if !function.are_valid_argument_counts(&isolate.heap, num_arguments, num_named_arguments) {
        trace!(
            "resolve miss: '{}' found but argument counts {}/{} do not fit",
            function.name_str(&isolate.heap),
            num_arguments,
            num_named_arguments
        );
        return None;
    }
    Some(function)
}

/// Walk the superclass chain for a dynamically dispatchable `name`.
pub fn lookup_dynamic_in_chain(
    isolate: &Isolate,
    receiver_class: Class,
    name: ObjectRef,
) -> Option<Function> {
    let mut cls = Some(receiver_class);
    while let Some(c) = cls {
        if let Some(function) = c.lookup_dynamic_function(&isolate.heap, name) {
            return Some(function);
        }
        cls = c.super_class(&isolate.heap);
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use islet_core::{bootstrap, symbols, FunctionKind, Type};

    struct Fixture {
        base: Class,
        derived: Class,
        foo: ObjectRef,
    }

    fn build(isolate: &mut Isolate) -> Fixture {
        let base_name = symbols::new_symbol(&mut isolate.heap, &mut isolate.store, "Base");
        let base = Class::new(&mut isolate.heap, &isolate.store, base_name, ObjectRef::NULL);
        let derived_name = symbols::new_symbol(&mut isolate.heap, &mut isolate.store, "Derived");
        let derived = Class::new(
            &mut isolate.heap,
            &isolate.store,
            derived_name,
            ObjectRef::NULL,
        );
        let super_type = Type::new_non_parameterized(&mut isolate.heap, &isolate.store, base);
        derived.desc_mut(&mut isolate.heap).super_type = super_type.0;

        let foo = symbols::new_symbol(&mut isolate.heap, &mut isolate.store, "foo");
        let function = Function::new(
            &mut isolate.heap,
            &isolate.store,
            foo,
            FunctionKind::Regular,
            false,
            false,
            0,
        );
        {
            let d = function.desc_mut(&mut isolate.heap);
            d.num_fixed_parameters = 2; // receiver + one argument
            d.owner = base.0;
        }
        base.add_function(&mut isolate.heap, function.0);
        Fixture { base, derived, foo }
    }

    fn instance_of(isolate: &mut Isolate, cls: Class) -> ObjectRef {
        isolate.heap.allocate(
            cls.0,
            islet_core::Space::New,
            islet_core::ObjectBody::Instance {
                type_arguments: ObjectRef::NULL,
                fields: Vec::new(),
            },
        )
    }

    #[test]
    fn test_resolves_through_super_chain() {
        let mut isolate = bootstrap::new_isolate();
        let fixture = build(&mut isolate);
        let receiver = instance_of(&mut isolate, fixture.derived);

        let found = resolve_dynamic(&isolate, receiver, fixture.foo, 2, 0).unwrap();
        assert_eq!(found.desc(&isolate.heap).owner, fixture.base.0);
    }

    #[test]
    fn test_argument_count_gates_resolution() {
        let mut isolate = bootstrap::new_isolate();
        let fixture = build(&mut isolate);
        let receiver = instance_of(&mut isolate, fixture.derived);

        assert!(resolve_dynamic(&isolate, receiver, fixture.foo, 3, 0).is_none());
        assert!(resolve_dynamic(&isolate, receiver, fixture.foo, 1, 0).is_none());
    }

    #[test]
    fn test_static_functions_are_not_dynamic() {
        let mut isolate = bootstrap::new_isolate();
        let fixture = build(&mut isolate);
        let bar = symbols::new_symbol(&mut isolate.heap, &mut isolate.store, "bar");
        let function = Function::new(
            &mut isolate.heap,
            &isolate.store,
            bar,
            FunctionKind::Regular,
            true,
            false,
            0,
        );
        fixture.base.add_function(&mut isolate.heap, function.0);
        let receiver = instance_of(&mut isolate, fixture.base);
        assert!(resolve_dynamic(&isolate, receiver, bar, 0, 0).is_none());
    }

    #[test]
    fn test_null_receiver_resolves_against_root() {
        let mut isolate = bootstrap::new_isolate();
        let fixture = build(&mut isolate);
        // foo lives on Base, not Object, so null cannot see it.
        assert!(resolve_dynamic(&isolate, ObjectRef::NULL, fixture.foo, 2, 0).is_none());

        // A method on the root class is visible to null.
        let on_object = symbols::new_symbol(&mut isolate.heap, &mut isolate.store, "describe");
        let function = Function::new(
            &mut isolate.heap,
            &isolate.store,
            on_object,
            FunctionKind::Regular,
            false,
            false,
            0,
        );
        function.desc_mut(&mut isolate.heap).num_fixed_parameters = 1;
        Class(isolate.store.object_class).add_function(&mut isolate.heap, function.0);
        assert!(resolve_dynamic(&isolate, ObjectRef::NULL, on_object, 1, 0).is_some());
    }
}
