//! Class finalization
//!
//! Finalization drains the isolate's pending-classes queue in two
//! waves: a resolve wave (superclass types and, for interfaces, the
//! default factory type) and a finalize wave (each pending class,
//! superclass first, with cycle-safe recursion). Errors unwind as
//! `Result` values to the finalizer boundary, which records the message
//! in the isolate's sticky-error slot and reports failure.

use crate::error::FinalizeError;
use crate::subtype::type_is_subtype_of;
use islet_core::object::NO_TYPE_ARGUMENTS;
use islet_core::{
    bootstrap, Array, Class, ClassState, Field, Function, FunctionKind, Heap, Isolate, Library,
    ObjectRef, Str, Type, TypeArgs,
};
use log::trace;

type Finalize<T> = Result<T, FinalizeError>;

/// The class finalizer. All state lives on the isolate; this is a
/// namespace for the finalization passes.
pub struct ClassFinalizer;

impl ClassFinalizer {
    /// Queue classes for the next finalization run.
    pub fn add_pending_classes(isolate: &mut Isolate, classes: &[ObjectRef]) {
        for class in classes {
            bootstrap::add_pending_class(&mut isolate.heap, &mut isolate.store, *class);
        }
    }

    /// Whether the pending queue is empty.
    pub fn all_classes_finalized(isolate: &Isolate) -> bool {
        Array(isolate.store.pending_classes).is_empty(&isolate.heap)
    }

    /// Drain the pending queue: resolve wave, then finalize wave.
    /// On failure the sticky error is set, the queue is left in place
    /// and `false` is returned. A sticky error from an earlier run
    /// fails fast.
    pub fn finalize_pending_classes(isolate: &mut Isolate) -> bool {
        if isolate.store.has_sticky_error() {
            return false;
        }
        let pending: Vec<ObjectRef> = {
            let array = Array(isolate.store.pending_classes);
            let mut seen = rustc_hash::FxHashSet::default();
            (0..array.len(&isolate.heap))
                .map(|i| array.at(&isolate.heap, i))
                .filter(|class| seen.insert(class.raw()))
                .collect()
        };
        let result = (|| -> Finalize<()> {
            for class in &pending {
                let cls = Class(*class);
                trace!(
                    "resolving super and default: {}",
                    cls.name_str(&isolate.heap)
                );
                Self::resolve_super_class(isolate, cls)?;
                if cls.is_interface(&isolate.heap) {
                    Self::resolve_default_class(isolate, cls)?;
                }
            }
            for class in &pending {
                Self::finalize_class(isolate, Class(*class))?;
            }
            Ok(())
        })();
        match result {
            Ok(()) => {
                isolate.store.pending_classes = isolate.store.empty_array;
                true
            }
            Err(e) => {
                isolate.set_sticky_error(&e.to_string());
                false
            }
        }
    }

    /// Run type finalization and hand back the error instead of
    /// poisoning the isolate; used while parsing.
    pub fn finalize_type_checked(isolate: &mut Isolate, ty: Type) -> Finalize<()> {
        Self::finalize_type(isolate, ty)
    }

    /// Resolve a class's unresolved superclass name.
    fn resolve_super_class(isolate: &mut Isolate, cls: Class) -> Finalize<()> {
        if cls.is_finalized(&isolate.heap) {
            return Ok(());
        }
        let super_type = cls.desc(&isolate.heap).super_type;
        if super_type.is_null() {
            return Ok(());
        }
        let super_type = Self::resolve_type(isolate, cls, Type(super_type))?;
        cls.desc_mut(&mut isolate.heap).super_type = super_type.0;
        let super_class = Class(super_type.type_class(&isolate.heap));
        if cls.is_interface(&isolate.heap) != super_class.is_interface(&isolate.heap) {
            return Err(FinalizeError::MixedClassInterface {
                name: cls.name_str(&isolate.heap),
                super_name: super_class.name_str(&isolate.heap),
            });
        }
        Ok(())
    }

    /// Resolve an interface's default (factory) clause.
    fn resolve_default_class(isolate: &mut Isolate, interface: Class) -> Finalize<()> {
        debug_assert!(interface.is_interface(&isolate.heap));
        if interface.is_finalized(&isolate.heap) {
            return Ok(());
        }
        let factory_type = interface.desc(&isolate.heap).factory_type;
        if factory_type.is_null() {
            return Ok(());
        }
        let factory_type = Self::resolve_type(isolate, interface, Type(factory_type))?;
        interface.desc_mut(&mut isolate.heap).factory_type = factory_type.0;
        let factory_class = Class(factory_type.type_class(&isolate.heap));
        if factory_class.is_interface(&isolate.heap) {
            return Err(FinalizeError::FactoryNotClass {
                name: interface.name_str(&isolate.heap),
            });
        }
        Ok(())
    }

    /// Resolve a type in the scope of `cls`: rewrite type-parameter
    /// names into parameter nodes, look up class names in the owning
    /// library, and recurse into type arguments.
    pub fn resolve_type(isolate: &mut Isolate, cls: Class, ty: Type) -> Finalize<Type> {
        if !ty.is_parameterized_type(&isolate.heap) {
            return Ok(ty);
        }
        if !ty.has_resolved_type_class(&isolate.heap) {
            let name = ty.unresolved_class_name(&isolate.heap);

            // The name may be a type parameter of the enclosing class
            // that the parser could not resolve from context.
            if let Some(parameter) =
                cls.lookup_type_parameter(&mut isolate.heap, &isolate.store, name)
            {
                // A type parameter cannot itself be parameterized.
                if !ty.arguments(&isolate.heap).is_null() {
                    return Err(FinalizeError::ParameterizedTypeParameter {
                        name: Str(name).to_string(&isolate.heap),
                    });
                }
                return Ok(parameter);
            }

            let library = Library(cls.desc(&isolate.heap).library);
            let resolved = if library.is_null() {
                None
            } else {
                library.lookup_class(&isolate.heap, name)
            };
            match resolved {
                Some(type_class) => ty.set_type_class(&mut isolate.heap, type_class.0),
                None => {
                    return Err(FinalizeError::UnresolvedName {
                        name: Str(name).to_string(&isolate.heap),
                        context: cls.name_str(&isolate.heap),
                    })
                }
            }
        }

        // Resolve type arguments, if any.
        let arguments = TypeArgs(ty.arguments(&isolate.heap));
        if !arguments.is_null() {
            for i in 0..arguments.len(&isolate.heap) {
                let argument = arguments.type_at_concrete(&isolate.heap, i);
                let argument = Self::resolve_type(isolate, cls, argument)?;
                arguments.set_type_at(&mut isolate.heap, i, argument);
            }
        }
        Ok(ty)
    }

    /// Finalize a resolved type: check arity, build the full
    /// argument vector across the superclass chain, check bounds, and
    /// finalize an embedded function signature.
    pub fn finalize_type(isolate: &mut Isolate, ty: Type) -> Finalize<()> {
        debug_assert!(ty.is_resolved(&isolate.heap));
        if !ty.is_parameterized_type(&isolate.heap) || ty.is_finalized(&isolate.heap) {
            return Ok(());
        }
        if ty.is_being_finalized(&isolate.heap) {
            return Err(FinalizeError::SelfReferencingType {
                name: ty.type_name(&isolate.heap),
            });
        }
        ty.set_is_being_finalized(&mut isolate.heap);

        // Finalize the parsed type arguments first.
        let parsed = TypeArgs(ty.arguments(&isolate.heap));
        if !parsed.is_null() {
            for i in 0..parsed.len(&isolate.heap) {
                let argument = parsed.type_at_concrete(&isolate.heap, i);
                if !argument.is_null() {
                    Self::finalize_type(isolate, argument)?;
                }
            }
        }

        let type_class = Class(ty.type_class(&isolate.heap));
        let num_type_arguments = type_class.num_type_arguments(&isolate.heap);
        let num_type_parameters = type_class.num_type_parameters(&isolate.heap);

        // No parsed arguments means a raw type, which is fine; a wrong
        // count is not.
        if !parsed.is_null() && parsed.len(&isolate.heap) != num_type_parameters {
            return Err(FinalizeError::WrongArity {
                name: ty.type_name(&isolate.heap),
            });
        }

        // The full vector holds the superclass-chain arguments in the
        // prefix and this class's own arguments in the tail.
        if num_type_arguments > 0 {
            let full = TypeArgs::new_type_array(&mut isolate.heap, &isolate.store, num_type_arguments);
            let offset = num_type_arguments - num_type_parameters;
            let var_type = Type(isolate.store.var_type);
            for i in 0..num_type_parameters {
                let argument = if parsed.is_null() {
                    var_type
                } else {
                    parsed.type_at_concrete(&isolate.heap, i)
                };
                full.set_type_at(&mut isolate.heap, offset + i, argument);
            }
            Self::finalize_type_arguments(isolate, type_class, full)?;
            ty.set_arguments(&mut isolate.heap, full.0);
        }

        if type_class.is_signature_class(&isolate.heap) {
            let signature = Function(type_class.signature_function(&isolate.heap));
            Self::resolve_and_finalize_signature(isolate, type_class, signature)?;
        }

        ty.set_is_finalized(&mut isolate.heap);
        Ok(())
    }

    /// Fill the superclass-chain prefix of `arguments` and check the
    /// declared upper bounds of `cls`'s parameters.
    fn finalize_type_arguments(
        isolate: &mut Isolate,
        cls: Class,
        arguments: TypeArgs,
    ) -> Finalize<()> {
        debug_assert!(arguments.len(&isolate.heap) >= cls.num_type_arguments(&isolate.heap));
        if isolate.flags.enable_type_checks {
            Self::check_type_argument_bounds(isolate, cls, arguments)?;
        }
        let super_type = cls.desc(&isolate.heap).super_type;
        if super_type.is_null() {
            return Ok(());
        }
        let super_type = Type(super_type);
        Self::finalize_type(isolate, super_type)?;
        let super_class = Class(super_type.type_class(&isolate.heap));
        let super_args = TypeArgs(super_type.arguments(&isolate.heap));
        let num_super_params = super_class.num_type_parameters(&isolate.heap);
        let offset = super_class.num_type_arguments(&isolate.heap);
        let super_offset = offset - num_super_params;
        for i in 0..num_super_params {
            let mut super_arg = super_args.type_at_concrete(&isolate.heap, super_offset + i);
            if !super_arg.is_null() && !super_arg.is_instantiated(&isolate.heap) {
                super_arg =
                    super_arg.instantiate_from(&mut isolate.heap, &isolate.store, arguments, offset);
            }
            arguments.set_type_at(&mut isolate.heap, super_offset + i, super_arg);
        }
        Self::finalize_type_arguments(isolate, super_class, arguments)
    }

    fn check_type_argument_bounds(
        isolate: &mut Isolate,
        cls: Class,
        arguments: TypeArgs,
    ) -> Finalize<()> {
        let num_params = cls.num_type_parameters(&isolate.heap);
        if num_params == 0 {
            return Ok(());
        }
        let offset = cls.num_type_arguments(&isolate.heap) - num_params;
        let bounds = TypeArgs(cls.desc(&isolate.heap).type_parameter_bounds);
        if bounds.is_null() {
            return Ok(());
        }
        debug_assert_eq!(bounds.len(&isolate.heap), num_params);
        for i in 0..num_params {
            let mut bound = bounds.type_at_concrete(&isolate.heap, i);
            if bound.is_null() || bound.is_var_type(&isolate.heap, &isolate.store) {
                continue;
            }
            let argument = arguments.type_at_concrete(&isolate.heap, offset + i);
            if argument.is_null() || !argument.is_instantiated(&isolate.heap) {
                continue;
            }
            if !bound.is_instantiated(&isolate.heap) {
                bound = bound.instantiate_from(&mut isolate.heap, &isolate.store, arguments, offset);
            }
            let flags = isolate.flags.clone();
            if !type_is_subtype_of(&mut isolate.heap, &isolate.store, &flags, argument, bound) {
                return Err(FinalizeError::BoundViolation {
                    name: argument.type_name(&isolate.heap),
                    bound: bound.type_name(&isolate.heap),
                });
            }
        }
        Ok(())
    }

    /// Resolve and finalize a function's result and parameter types.
    fn resolve_and_finalize_signature(
        isolate: &mut Isolate,
        cls: Class,
        function: Function,
    ) -> Finalize<()> {
        let result_type = function.desc(&isolate.heap).result_type;
        let result_type = if result_type.is_null() {
            Type(isolate.store.var_type)
        } else {
            Self::resolve_type(isolate, cls, Type(result_type))?
        };
        function.desc_mut(&mut isolate.heap).result_type = result_type.0;
        Self::finalize_type(isolate, result_type)?;

        let num_parameters = function.number_of_parameters(&isolate.heap);
        for i in 0..num_parameters {
            let parameter_type = function.desc(&isolate.heap).parameter_types[i];
            let parameter_type = if parameter_type.is_null() {
                Type(isolate.store.var_type)
            } else {
                Self::resolve_type(isolate, cls, Type(parameter_type))?
            };
            function.desc_mut(&mut isolate.heap).parameter_types[i] = parameter_type.0;
            Self::finalize_type(isolate, parameter_type)?;
        }
        Ok(())
    }

    /// Resolve every member type and check ancestor name collisions.
    fn resolve_and_finalize_member_types(isolate: &mut Isolate, cls: Class) -> Finalize<()> {
        // Field types.
        let fields = cls.desc(&isolate.heap).fields.clone();
        for field in &fields {
            let field = Field(*field);
            let ty = field.desc(&isolate.heap).ty;
            let ty = if ty.is_null() {
                Type(isolate.store.var_type)
            } else {
                Self::resolve_type(isolate, cls, Type(ty))?
            };
            field.desc_mut(&mut isolate.heap).ty = ty.0;
            Self::finalize_type(isolate, ty)?;

            let name = field.desc(&isolate.heap).name;
            if Self::function_name_exists_in_super(&isolate.heap, cls, name) {
                return Err(FinalizeError::NameCollision {
                    message: format!(
                        "field '{}' overrides a function in the super class",
                        Str(name).to_string(&isolate.heap)
                    ),
                });
            }
        }

        // Function signatures.
        let functions = cls.desc(&isolate.heap).functions.clone();
        for function in &functions {
            let function = Function(*function);
            Self::resolve_and_finalize_signature(isolate, cls, function)?;

            let func_name = function.desc(&isolate.heap).name;
            if Self::field_name_exists_in_super(&isolate.heap, cls, func_name) {
                return Err(FinalizeError::NameCollision {
                    message: format!(
                        "function '{}' overrides a field in the super class",
                        Str(func_name).to_string(&isolate.heap)
                    ),
                });
            }
            let plain = Str(func_name).to_string(&isolate.heap);
            for (prefix, what) in [("get:", "getter"), ("set:", "setter")] {
                let decorated = Self::intern(isolate, &format!("{prefix}{plain}"));
                if Self::function_name_exists_in_super(&isolate.heap, cls, decorated) {
                    return Err(FinalizeError::NameCollision {
                        message: format!("function '{plain}' overrides a {what} in the super class"),
                    });
                }
            }
            let kind = function.desc(&isolate.heap).kind;
            if kind == FunctionKind::Getter || kind == FunctionKind::Setter {
                // "get:foo" may not alias a plain superclass function
                // named "foo" (same for setters).
                if let Some(bare) = plain
                    .strip_prefix("get:")
                    .or_else(|| plain.strip_prefix("set:"))
                {
                    let bare = Self::intern(isolate, bare);
                    if Self::function_name_exists_in_super(&isolate.heap, cls, bare) {
                        return Err(FinalizeError::NameCollision {
                            message: format!(
                                "'{plain}' overrides a function in the super class"
                            ),
                        });
                    }
                }
            }
        }

        // The signature of a signature class.
        if cls.is_signature_class(&isolate.heap) {
            let signature = Function(cls.signature_function(&isolate.heap));
            Self::resolve_and_finalize_signature(isolate, cls, signature)?;
        }
        Ok(())
    }

    /// Finalize one class, superclass first.
    pub fn finalize_class(isolate: &mut Isolate, cls: Class) -> Finalize<()> {
        if cls.is_finalized(&isolate.heap) {
            return Ok(());
        }
        trace!("finalizing {}", cls.name_str(&isolate.heap));
        if !Self::is_super_cycle_free(&isolate.heap, cls) {
            return Err(FinalizeError::CyclicSuper {
                name: cls.name_str(&isolate.heap),
            });
        }
        let mut visited = Vec::new();
        Self::resolve_interfaces(isolate, cls, &mut visited)?;

        let super_type = cls.desc(&isolate.heap).super_type;
        if !super_type.is_null() {
            let super_type = Type(super_type);
            let super_class = Class(super_type.type_class(&isolate.heap));
            Self::finalize_class(isolate, super_class)?;
            Self::finalize_type(isolate, super_type)?;
        }

        if cls.is_interface(&isolate.heap) {
            let factory_type = cls.desc(&isolate.heap).factory_type;
            if !factory_type.is_null() {
                let factory_type = Type(factory_type);
                let factory_class = Class(factory_type.type_class(&isolate.heap));
                if !factory_class.is_finalized(&isolate.heap) {
                    Self::finalize_class(isolate, factory_class)?;
                    // Finalizing the factory may have finalized this
                    // interface through a cycle.
                    if cls.is_finalized(&isolate.heap) {
                        return Ok(());
                    }
                }
                Self::finalize_type(isolate, factory_type)?;
            }
        }

        // Interface types are finalized here; their classes only when
        // they themselves are pending.
        let interfaces = cls.desc(&isolate.heap).interfaces.clone();
        for interface in interfaces {
            Self::finalize_type(isolate, Type(interface))?;
        }

        if cls.desc(&isolate.heap).state == ClassState::Allocated {
            Self::compute_instance_layout(&mut isolate.heap, cls);
        }

        // Mark finalized before member resolution to break cycles
        // through member types.
        cls.finalize(&mut isolate.heap);
        Self::resolve_and_finalize_member_types(isolate, cls)?;

        if !cls.is_interface(&isolate.heap) {
            Self::check_for_legal_overrides(isolate, cls)?;
        }
        if cls.desc(&isolate.heap).is_const {
            Self::check_for_legal_const_class(isolate, cls)?;
        }
        Ok(())
    }

    /// Lay out instance fields behind the superclass's, reserving a
    /// type-argument slot for the first parameterized class in a chain.
    fn compute_instance_layout(heap: &mut Heap, cls: Class) {
        let (super_size, super_ta_offset) = match cls.super_class(heap) {
            Some(s) => {
                let d = s.desc(heap);
                (d.instance_size, d.type_arguments_field_offset)
            }
            None => (1, NO_TYPE_ARGUMENTS),
        };
        let mut next = super_size.max(1);
        let mut ta_offset = super_ta_offset;
        if cls.is_parameterized(heap) && ta_offset == NO_TYPE_ARGUMENTS {
            ta_offset = next;
            next += 1;
        }
        let fields = cls.desc(heap).fields.clone();
        for field in fields {
            let field = Field(field);
            if !field.desc(heap).is_static {
                field.desc_mut(heap).offset = next;
                next += 1;
            }
        }
        let d = cls.desc_mut(heap);
        d.instance_size = next;
        d.next_field_offset = next;
        d.type_arguments_field_offset = ta_offset;
    }

    /// Tortoise-and-hare cycle check on the superclass chain.
    fn is_super_cycle_free(heap: &Heap, cls: Class) -> bool {
        let mut tortoise = Some(cls);
        let mut hare = cls.super_class(heap);
        while let (Some(t), Some(h)) = (tortoise, hare) {
            if t.is_finalized(heap) || h.is_finalized(heap) {
                break;
            }
            if t == h {
                return false;
            }
            tortoise = t.super_class(heap);
            hare = h.super_class(heap).and_then(|h2| h2.super_class(heap));
        }
        true
    }

    /// Resolve the declared-interface graph, rejecting cycles,
    /// parameters used as interfaces, and non-interface classes.
    fn resolve_interfaces(
        isolate: &mut Isolate,
        cls: Class,
        visited: &mut Vec<ObjectRef>,
    ) -> Finalize<()> {
        if visited.contains(&cls.0) {
            return Err(FinalizeError::CyclicInterface {
                name: cls.name_str(&isolate.heap),
            });
        }
        let interfaces = cls.desc(&isolate.heap).interfaces.clone();
        if interfaces.is_empty() {
            return Ok(());
        }
        visited.push(cls.0);
        for (i, interface) in interfaces.iter().enumerate() {
            let interface = Self::resolve_type(isolate, cls, Type(*interface))?;
            cls.desc_mut(&mut isolate.heap).interfaces[i] = interface.0;
            if interface.is_type_parameter(&isolate.heap) {
                return Err(FinalizeError::ParameterAsInterface {
                    name: Str(interface.parameter_name(&isolate.heap)).to_string(&isolate.heap),
                });
            }
            let interface_class = Class(interface.type_class(&isolate.heap));
            if !interface_class.is_interface(&isolate.heap) {
                return Err(FinalizeError::ClassAsInterface {
                    name: interface_class.name_str(&isolate.heap),
                });
            }
            Self::resolve_interfaces(isolate, interface_class, visited)?;
        }
        visited.pop();
        Ok(())
    }

    /// Non-static overrides of the immediate superclass must keep the
    /// calling convention; fields may only "override" static fields
    /// with static fields.
    fn check_for_legal_overrides(isolate: &mut Isolate, cls: Class) -> Finalize<()> {
        let super_class = match cls.super_class(&isolate.heap) {
            Some(s) => s,
            None => return Ok(()),
        };
        let functions = cls.desc(&isolate.heap).functions.clone();
        for function in &functions {
            let function = Function(*function);
            if function.desc(&isolate.heap).is_static {
                continue;
            }
            let name = function.desc(&isolate.heap).name;
            if let Some(overridden) = super_class.lookup_dynamic_function(&isolate.heap, name) {
                if !function.has_compatible_parameters_with(&isolate.heap, overridden) {
                    return Err(FinalizeError::IncompatibleOverride {
                        class_name: cls.name_str(&isolate.heap),
                        name: Str(name).to_string(&isolate.heap),
                    });
                }
            }
        }
        let fields = cls.desc(&isolate.heap).fields.clone();
        for field in &fields {
            let field = Field(*field);
            let name = field.desc(&isolate.heap).name;
            if let Some(super_field) = super_class.lookup_field(&isolate.heap, name) {
                let both_static = super_field.desc(&isolate.heap).is_static
                    && field.desc(&isolate.heap).is_static;
                if !both_static {
                    return Err(FinalizeError::NameCollision {
                        message: format!(
                            "class '{}' cannot override field '{}'",
                            cls.name_str(&isolate.heap),
                            Str(name).to_string(&isolate.heap)
                        ),
                    });
                }
            }
        }
        Ok(())
    }

    /// A const class may only extend const classes and may only declare
    /// final instance fields.
    fn check_for_legal_const_class(isolate: &mut Isolate, cls: Class) -> Finalize<()> {
        debug_assert!(cls.desc(&isolate.heap).is_const);
        if let Some(super_class) = cls.super_class(&isolate.heap) {
            if super_class.0 != isolate.store.object_class
                && !super_class.desc(&isolate.heap).is_const
            {
                return Err(FinalizeError::NonConstSuper {
                    name: super_class.name_str(&isolate.heap),
                });
            }
        }
        let fields = cls.desc(&isolate.heap).fields.clone();
        for field in fields {
            let field = Field(field);
            let d = field.desc(&isolate.heap);
            if !d.is_static && !d.is_final {
                return Err(FinalizeError::NonFinalFieldInConstClass {
                    class_name: cls.name_str(&isolate.heap),
                    field_name: Str(d.name).to_string(&isolate.heap),
                });
            }
        }
        Ok(())
    }

    fn function_name_exists_in_super(heap: &Heap, cls: Class, name: ObjectRef) -> bool {
        let mut ancestor = cls.super_class(heap);
        while let Some(a) = ancestor {
            if a.lookup_function(heap, name).is_some() {
                return true;
            }
            ancestor = a.super_class(heap);
        }
        false
    }

    fn field_name_exists_in_super(heap: &Heap, cls: Class, name: ObjectRef) -> bool {
        let mut ancestor = cls.super_class(heap);
        while let Some(a) = ancestor {
            if a.lookup_field(heap, name).is_some() {
                return true;
            }
            ancestor = a.super_class(heap);
        }
        false
    }

    fn intern(isolate: &mut Isolate, s: &str) -> ObjectRef {
        islet_core::symbols::new_symbol(&mut isolate.heap, &mut isolate.store, s)
    }
}

/// Finalize the bootstrap classes and verify the heap. A failure here
/// means the VM itself is broken; per the process contract it is fatal.
pub fn verify_bootstrap_classes(isolate: &mut Isolate) {
    if !ClassFinalizer::finalize_pending_classes(isolate) {
        let error = isolate
            .sticky_error_str()
            .unwrap_or_else(|| "unknown error".to_string());
        log::error!("could not verify bootstrap classes: {error}");
        std::process::exit(255);
    }
    if let Err(e) = islet_core::verify_heap(isolate) {
        log::error!("bootstrap heap verification failed: {e}");
        std::process::exit(255);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn intern(isolate: &mut Isolate, s: &str) -> ObjectRef {
        islet_core::symbols::new_symbol(&mut isolate.heap, &mut isolate.store, s)
    }

    fn new_test_class(isolate: &mut Isolate, name: &str) -> Class {
        let name = intern(isolate, name);
        let cls = Class::new(&mut isolate.heap, &isolate.store, name, ObjectRef::NULL);
        cls.desc_mut(&mut isolate.heap).super_type = isolate.store.object_type;
        Library(isolate.store.core_library).add_class(&mut isolate.heap, &isolate.store, cls);
        cls
    }

    #[test]
    fn test_finalize_bootstrap_pending() {
        let mut isolate = islet_core::bootstrap::new_isolate();
        assert!(!ClassFinalizer::all_classes_finalized(&isolate));
        assert!(ClassFinalizer::finalize_pending_classes(&mut isolate));
        assert!(ClassFinalizer::all_classes_finalized(&isolate));
        assert!(Class(isolate.store.object_class).is_finalized(&isolate.heap));
        assert!(Class(isolate.store.smi_class).is_finalized(&isolate.heap));
    }

    #[test]
    fn test_wrong_arity_is_rejected() {
        let mut isolate = islet_core::bootstrap::new_isolate();
        assert!(ClassFinalizer::finalize_pending_classes(&mut isolate));

        let box_class = new_test_class(&mut isolate, "Box");
        let t = intern(&mut isolate, "T");
        box_class.desc_mut(&mut isolate.heap).type_parameters.push(t);
        ClassFinalizer::add_pending_classes(&mut isolate, &[box_class.0]);
        assert!(ClassFinalizer::finalize_pending_classes(&mut isolate));

        // Box<A, B> names two arguments for a one-parameter class.
        let a = new_test_class(&mut isolate, "Elem");
        ClassFinalizer::add_pending_classes(&mut isolate, &[a.0]);
        assert!(ClassFinalizer::finalize_pending_classes(&mut isolate));

        let a_type = Type::new_non_parameterized(&mut isolate.heap, &isolate.store, a);
        let args = TypeArgs::new_type_array(&mut isolate.heap, &isolate.store, 2);
        args.set_type_at(&mut isolate.heap, 0, a_type);
        args.set_type_at(&mut isolate.heap, 1, a_type);
        let bad = Type::new_parameterized(&mut isolate.heap, &isolate.store, box_class.0, args.0);
        let err = ClassFinalizer::finalize_type_checked(&mut isolate, bad).unwrap_err();
        assert!(matches!(err, FinalizeError::WrongArity { .. }));
    }

    #[test]
    fn test_full_vector_spans_super_chain() {
        let mut isolate = islet_core::bootstrap::new_isolate();
        assert!(ClassFinalizer::finalize_pending_classes(&mut isolate));

        // class Base<T> ; class Derived<K, V> extends Base<V>
        let base = new_test_class(&mut isolate, "Base");
        let t = intern(&mut isolate, "T");
        base.desc_mut(&mut isolate.heap).type_parameters.push(t);

        let derived = new_test_class(&mut isolate, "Derived");
        let k = intern(&mut isolate, "K");
        let v = intern(&mut isolate, "V");
        derived
            .desc_mut(&mut isolate.heap)
            .type_parameters
            .extend([k, v]);
        // Base<V> as the super type.
        let v_param = Type::new_type_parameter(&mut isolate.heap, &isolate.store, 1, v);
        let super_args = TypeArgs::new_type_array(&mut isolate.heap, &isolate.store, 1);
        super_args.set_type_at(&mut isolate.heap, 0, v_param);
        let super_type =
            Type::new_parameterized(&mut isolate.heap, &isolate.store, base.0, super_args.0);
        derived.desc_mut(&mut isolate.heap).super_type = super_type.0;

        ClassFinalizer::add_pending_classes(&mut isolate, &[base.0, derived.0]);
        assert!(ClassFinalizer::finalize_pending_classes(&mut isolate));

        // Derived<Elem, Elem2>: full vector is [super-arg, K-arg, V-arg].
        let elem = new_test_class(&mut isolate, "Elem");
        let elem2 = new_test_class(&mut isolate, "Elem2");
        ClassFinalizer::add_pending_classes(&mut isolate, &[elem.0, elem2.0]);
        assert!(ClassFinalizer::finalize_pending_classes(&mut isolate));
        let elem_type = Type::new_non_parameterized(&mut isolate.heap, &isolate.store, elem);
        let elem2_type = Type::new_non_parameterized(&mut isolate.heap, &isolate.store, elem2);
        let args = TypeArgs::new_type_array(&mut isolate.heap, &isolate.store, 2);
        args.set_type_at(&mut isolate.heap, 0, elem_type);
        args.set_type_at(&mut isolate.heap, 1, elem2_type);
        let ty = Type::new_parameterized(&mut isolate.heap, &isolate.store, derived.0, args.0);
        ClassFinalizer::finalize_type_checked(&mut isolate, ty).unwrap();

        let full = TypeArgs(ty.arguments(&isolate.heap));
        assert_eq!(full.len(&isolate.heap), 3);
        // Prefix: Base's T instantiated to V = Elem2.
        assert_eq!(full.type_at_concrete(&isolate.heap, 0).0, elem2_type.0);
        assert_eq!(full.type_at_concrete(&isolate.heap, 1).0, elem_type.0);
        assert_eq!(full.type_at_concrete(&isolate.heap, 2).0, elem2_type.0);
    }

    #[test]
    fn test_self_referential_type_is_rejected() {
        let mut isolate = islet_core::bootstrap::new_isolate();
        assert!(ClassFinalizer::finalize_pending_classes(&mut isolate));

        let box_class = new_test_class(&mut isolate, "Box");
        let t = intern(&mut isolate, "T");
        box_class.desc_mut(&mut isolate.heap).type_parameters.push(t);
        ClassFinalizer::add_pending_classes(&mut isolate, &[box_class.0]);
        assert!(ClassFinalizer::finalize_pending_classes(&mut isolate));

        // Box<self>: the argument vector contains the type itself.
        let args = TypeArgs::new_type_array(&mut isolate.heap, &isolate.store, 1);
        let ty = Type::new_parameterized(&mut isolate.heap, &isolate.store, box_class.0, args.0);
        args.set_type_at(&mut isolate.heap, 0, ty);
        let err = ClassFinalizer::finalize_type_checked(&mut isolate, ty).unwrap_err();
        assert!(matches!(err, FinalizeError::SelfReferencingType { .. }));
    }

    #[test]
    fn test_instance_layout() {
        let mut isolate = islet_core::bootstrap::new_isolate();
        assert!(ClassFinalizer::finalize_pending_classes(&mut isolate));

        let cls = new_test_class(&mut isolate, "Point");
        for field_name in ["x", "y"] {
            let name = intern(&mut isolate, field_name);
            let field = isolate.heap.allocate(
                isolate.store.field_class,
                islet_core::Space::Old,
                islet_core::ObjectBody::Field(islet_core::FieldDesc {
                    name,
                    owner: cls.0,
                    ty: ObjectRef::NULL,
                    is_static: false,
                    is_final: false,
                    has_initializer: false,
                    offset: -1,
                    static_value: ObjectRef::NULL,
                }),
            );
            cls.add_field(&mut isolate.heap, field);
        }
        ClassFinalizer::add_pending_classes(&mut isolate, &[cls.0]);
        assert!(ClassFinalizer::finalize_pending_classes(&mut isolate));

        {
            let d = cls.desc(&isolate.heap);
            assert_eq!(d.instance_size, 3);
            assert_eq!(d.next_field_offset, 3);
            assert_eq!(d.type_arguments_field_offset, NO_TYPE_ARGUMENTS);
        }
        // Offsets start right behind the header.
        let x_name = intern(&mut isolate, "x");
        let x = cls
            .lookup_field(&isolate.heap, x_name)
            .map(|f| f.desc(&isolate.heap).offset);
        assert_eq!(x, Some(1));
        let y_name = intern(&mut isolate, "y");
        let y = cls
            .lookup_field(&isolate.heap, y_name)
            .map(|f| f.desc(&isolate.heap).offset);
        assert_eq!(y, Some(2));
    }
}
