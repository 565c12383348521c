//! Inline-cache protocol end-to-end tests
//!
//! Builds caller code with a real instance-call site targeting the
//! resolve stub, then drives calls through `execute_instance_call` and
//! watches the site being patched, the IC stub widening, and null
//! receivers bouncing to megamorphic lookup.

use islet_core::{
    bootstrap, symbols, Class, Code, Function, FunctionKind, Isolate, ObjectBody, ObjectRef,
    Space, Type,
};
use islet_runtime::dispatch::DispatchPath;
use islet_runtime::{execute_instance_call, patcher, stubs};

struct CallSite {
    isolate: Isolate,
    site_pc: u64,
    foo: ObjectRef,
}

fn intern(isolate: &mut Isolate, s: &str) -> ObjectRef {
    symbols::new_symbol(&mut isolate.heap, &mut isolate.store, s)
}

fn new_class_with_method(isolate: &mut Isolate, class_name: &str, method: ObjectRef) -> Class {
    let name = intern(isolate, class_name);
    let cls = Class::new(&mut isolate.heap, &isolate.store, name, ObjectRef::NULL);
    cls.desc_mut(&mut isolate.heap).super_type = isolate.store.object_type;
    let function = Function::new(
        &mut isolate.heap,
        &isolate.store,
        method,
        FunctionKind::Regular,
        false,
        false,
        0,
    );
    {
        let d = function.desc_mut(&mut isolate.heap);
        d.num_fixed_parameters = 2; // receiver + one argument
        d.owner = cls.0;
    }
    cls.add_function(&mut isolate.heap, function.0);
    cls
}

fn instance_of(isolate: &mut Isolate, cls: Class) -> ObjectRef {
    isolate.heap.allocate(
        cls.0,
        Space::New,
        ObjectBody::Instance {
            type_arguments: ObjectRef::NULL,
            fields: Vec::new(),
        },
    )
}

/// Caller method M with a site `o.foo(x)` (2 arguments with receiver).
fn build_call_site() -> CallSite {
    let mut isolate = bootstrap::new_isolate();
    stubs::init_stubs(&mut isolate).unwrap();
    let foo = intern(&mut isolate, "foo");

    let mut builder = islet_runtime::CodeBuilder::new("M");
    builder.prologue();
    let resolve = stubs::resolve_stub_entry(&isolate);
    let offset = builder.instance_call(&mut isolate, foo, 2, 0, resolve, 17, 100);
    let code = builder.finalize(&mut isolate).unwrap();
    let site_pc = code.entry_point(&isolate.heap) + offset;
    CallSite {
        isolate,
        site_pc,
        foo,
    }
}

#[test]
fn test_first_invocation_installs_monomorphic_ic() {
    let mut site = build_call_site();
    let isolate = &mut site.isolate;
    let c1 = new_class_with_method(isolate, "C1", site.foo);
    let c1_method = c1.lookup_function(&isolate.heap, site.foo).unwrap();
    assert!(!c1_method.has_code(&isolate.heap));
    let receiver = instance_of(isolate, c1);

    let outcome = execute_instance_call(isolate, site.site_pc, receiver).unwrap();
    // The call resolved through the runtime, compiled foo, and patched
    // the site with a one-pair IC stub.
    assert_eq!(outcome.path, DispatchPath::Runtime);
    assert!(c1_method.has_code(&isolate.heap));
    assert_eq!(
        outcome.code.unwrap().0,
        c1_method.desc(&isolate.heap).code
    );

    let (_, _, _, target) = patcher::get_instance_call_at(isolate, site.site_pc).unwrap();
    let (classes, functions) = stubs::recognize_ic_stub(isolate, target).unwrap();
    assert_eq!(classes, vec![c1.0]);
    assert_eq!(functions, vec![c1_method.0]);

    // Subsequent calls on C1 bypass the runtime.
    let outcome = execute_instance_call(isolate, site.site_pc, receiver).unwrap();
    assert_eq!(outcome.path, DispatchPath::IcHit);
    assert_eq!(
        outcome.code.unwrap().0,
        c1_method.desc(&isolate.heap).code
    );
}

#[test]
fn test_second_class_widens_ic_in_insertion_order() {
    let mut site = build_call_site();
    let isolate = &mut site.isolate;
    let c1 = new_class_with_method(isolate, "C1", site.foo);
    let c2 = new_class_with_method(isolate, "C2", site.foo);
    let r1 = instance_of(isolate, c1);
    let r2 = instance_of(isolate, c2);

    execute_instance_call(isolate, site.site_pc, r1).unwrap();
    let outcome = execute_instance_call(isolate, site.site_pc, r2).unwrap();
    assert_eq!(outcome.path, DispatchPath::Runtime);

    let (_, _, _, target) = patcher::get_instance_call_at(isolate, site.site_pc).unwrap();
    let (classes, functions) = stubs::recognize_ic_stub(isolate, target).unwrap();
    // Pairs appear in insertion order.
    assert_eq!(classes, vec![c1.0, c2.0]);
    let m1 = c1.lookup_function(&isolate.heap, site.foo).unwrap();
    let m2 = c2.lookup_function(&isolate.heap, site.foo).unwrap();
    assert_eq!(functions, vec![m1.0, m2.0]);

    // Every recorded target is the current code of its function.
    for (class, function) in classes.iter().zip(&functions) {
        let ic_code = isolate.code_index.lookup_code(target).unwrap();
        let hit = stubs::ic_dispatch(&isolate.heap, ic_code, *class).unwrap();
        assert_eq!(
            hit,
            Code(Function(*function).desc(&isolate.heap).code).entry_point(&isolate.heap)
        );
    }

    // Both classes now hit without the runtime.
    assert_eq!(
        execute_instance_call(isolate, site.site_pc, r1).unwrap().path,
        DispatchPath::IcHit
    );
    assert_eq!(
        execute_instance_call(isolate, site.site_pc, r2).unwrap().path,
        DispatchPath::IcHit
    );
}

#[test]
fn test_null_receiver_never_enters_ic() {
    let mut site = build_call_site();
    let isolate = &mut site.isolate;

    // First call with a null receiver: the site gets an empty IC stub
    // and the call goes through megamorphic lookup (which resolves
    // against the root class and finds nothing but noSuchMethod).
    let outcome = execute_instance_call(isolate, site.site_pc, ObjectRef::NULL).unwrap();
    assert_eq!(outcome.path, DispatchPath::Megamorphic);

    let (_, _, _, target) = patcher::get_instance_call_at(isolate, site.site_pc).unwrap();
    let (classes, _) = stubs::recognize_ic_stub(isolate, target).unwrap();
    assert!(classes.is_empty());

    // A later null call still misses and still adds nothing.
    let outcome = execute_instance_call(isolate, site.site_pc, ObjectRef::NULL).unwrap();
    assert_eq!(outcome.path, DispatchPath::Megamorphic);
    let (classes, _) = stubs::recognize_ic_stub(isolate, target).unwrap();
    assert!(classes.is_empty());

    // A real receiver afterwards widens the same stub with its class.
    let c1 = new_class_with_method(isolate, "C1", site.foo);
    let receiver = instance_of(isolate, c1);
    execute_instance_call(isolate, site.site_pc, receiver).unwrap();
    let (_, _, _, target) = patcher::get_instance_call_at(isolate, site.site_pc).unwrap();
    let (classes, _) = stubs::recognize_ic_stub(isolate, target).unwrap();
    assert_eq!(classes, vec![c1.0]);
}

#[test]
fn test_unresolvable_method_patches_to_megamorphic() {
    let mut site = build_call_site();
    let isolate = &mut site.isolate;
    // A class without foo.
    let name = intern(isolate, "Bare");
    let bare = Class::new(&mut isolate.heap, &isolate.store, name, ObjectRef::NULL);
    bare.desc_mut(&mut isolate.heap).super_type = isolate.store.object_type;
    let receiver = instance_of(isolate, bare);

    let outcome = execute_instance_call(isolate, site.site_pc, receiver).unwrap();
    assert_eq!(outcome.path, DispatchPath::Megamorphic);
    assert!(outcome.code.is_none());

    let (_, _, _, target) = patcher::get_instance_call_at(isolate, site.site_pc).unwrap();
    assert!(stubs::in_megamorphic_stub(isolate, target));
}

#[test]
fn test_disabled_inline_caches_go_megamorphic() {
    let mut site = build_call_site();
    let isolate = &mut site.isolate;
    isolate.flags.use_inline_caches = false;
    let c1 = new_class_with_method(isolate, "C1", site.foo);
    let receiver = instance_of(isolate, c1);

    let outcome = execute_instance_call(isolate, site.site_pc, receiver).unwrap();
    assert_eq!(outcome.path, DispatchPath::Megamorphic);
    // Resolution still finds and compiles the method.
    let method = c1.lookup_function(&isolate.heap, site.foo).unwrap();
    assert!(method.has_code(&isolate.heap));
    assert_eq!(outcome.code.unwrap().0, method.desc(&isolate.heap).code);
}

#[test]
fn test_function_cache_serves_repeat_resolution() {
    let mut site = build_call_site();
    let isolate = &mut site.isolate;
    let c1 = new_class_with_method(isolate, "C1", site.foo);
    let receiver = instance_of(isolate, c1);
    execute_instance_call(isolate, site.site_pc, receiver).unwrap();

    // The resolution landed in the class's advisory cache.
    let cache = islet_runtime::FunctionsCache::new(isolate, c1);
    let cached = cache.lookup_code(isolate, site.foo, 2, 0).unwrap();
    let method = c1.lookup_function(&isolate.heap, site.foo).unwrap();
    assert_eq!(cached.0, method.desc(&isolate.heap).code);
}

#[test]
fn test_instanceof_smoke_through_runtime_entry() {
    // Instanceof participates in the same pipeline; cover the entry
    // against a subtype chain built from scratch.
    let mut isolate = bootstrap::new_isolate();
    stubs::init_stubs(&mut isolate).unwrap();
    let animal_name = intern(&mut isolate, "Animal");
    let animal = Class::new(&mut isolate.heap, &isolate.store, animal_name, ObjectRef::NULL);
    animal.desc_mut(&mut isolate.heap).super_type = isolate.store.object_type;
    let cat_name = intern(&mut isolate, "Cat");
    let cat = Class::new(&mut isolate.heap, &isolate.store, cat_name, ObjectRef::NULL);
    let animal_type = Type::new_non_parameterized(&mut isolate.heap, &isolate.store, animal);
    cat.desc_mut(&mut isolate.heap).super_type = animal_type.0;

    let receiver = instance_of(&mut isolate, cat);
    let result = islet_runtime::call_to_runtime(
        &mut isolate,
        "Instanceof",
        &[receiver, animal_type.0, ObjectRef::NULL],
    )
    .unwrap();
    assert_eq!(result, isolate.store.true_value);
}
