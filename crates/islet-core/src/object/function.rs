//! Function and field descriptors

use crate::heap::{Heap, Space};
use crate::object::string::Str;
use crate::object::{Class, ClassDesc, ClassState, InstanceKind, ObjectBody};
use crate::object_store::ObjectStore;
use crate::value::ObjectRef;

/// Closed enumeration of function kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FunctionKind {
    /// Ordinary method or top-level function
    Regular,
    /// Local or implicit closure function
    Closure,
    /// Signature function embedded in a signature class
    Signature,
    /// Constructor
    Constructor,
    /// Implicit getter for an instance field
    ImplicitGetter,
    /// Implicit setter for an instance field
    ImplicitSetter,
    /// Implicit getter for a const field
    ConstImplicitGetter,
    /// Abstract method
    Abstract,
    /// Explicit getter
    Getter,
    /// Explicit setter
    Setter,
}

/// Body of a function descriptor.
pub struct FunctionDesc {
    /// Name symbol.
    pub name: ObjectRef,
    /// Owning class.
    pub owner: ObjectRef,
    /// Function kind.
    pub kind: FunctionKind,
    /// Whether the function is static.
    pub is_static: bool,
    /// Whether the function is const.
    pub is_const: bool,
    /// Whether adaptive optimization may recompile this function.
    pub is_optimizable: bool,
    /// Result type.
    pub result_type: ObjectRef,
    /// Parameter types, fixed then optional.
    pub parameter_types: Vec<ObjectRef>,
    /// Parameter names; symbols for named optional parameters.
    pub parameter_names: Vec<ObjectRef>,
    /// Number of fixed parameters.
    pub num_fixed_parameters: usize,
    /// Number of optional parameters.
    pub num_optional_parameters: usize,
    /// Token position of the declaration.
    pub token_index: i64,
    /// Entry-counter driving optimization.
    pub invocation_counter: i64,
    /// Number of times this function was deoptimized.
    pub deoptimization_counter: i64,
    /// Currently installed code, or null.
    pub code: ObjectRef,
    /// Fallback unoptimized code, or null.
    pub unoptimized_code: ObjectRef,
    /// Enclosing function for closures, or null.
    pub parent_function: ObjectRef,
    /// Signature class, or null until demanded.
    pub signature_class: ObjectRef,
    /// Implicit closure function, or null until demanded.
    pub implicit_closure_function: ObjectRef,
    /// Captured-variable description for closures, or null.
    pub context_scope: ObjectRef,
    /// Closure allocation stub, or null.
    pub closure_allocation_stub: ObjectRef,
}

/// Function handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Function(pub ObjectRef);

impl Function {
    /// Allocate a function descriptor.
    pub fn new(
        heap: &mut Heap,
        store: &ObjectStore,
        name: ObjectRef,
        kind: FunctionKind,
        is_static: bool,
        is_const: bool,
        token_index: i64,
    ) -> Function {
        let desc = FunctionDesc {
            name,
            owner: ObjectRef::NULL,
            kind,
            is_static,
            is_const,
            is_optimizable: true,
            result_type: ObjectRef::NULL,
            parameter_types: Vec::new(),
            parameter_names: Vec::new(),
            num_fixed_parameters: 0,
            num_optional_parameters: 0,
            token_index,
            invocation_counter: 0,
            deoptimization_counter: 0,
            code: ObjectRef::NULL,
            unoptimized_code: ObjectRef::NULL,
            parent_function: ObjectRef::NULL,
            signature_class: ObjectRef::NULL,
            implicit_closure_function: ObjectRef::NULL,
            context_scope: ObjectRef::NULL,
            closure_allocation_stub: ObjectRef::NULL,
        };
        Function(heap.allocate(store.function_class, Space::Old, ObjectBody::Function(desc)))
    }

    /// Whether the handle is null.
    pub fn is_null(self) -> bool {
        self.0.is_null()
    }

    /// Borrow the descriptor.
    pub fn desc(self, heap: &Heap) -> &FunctionDesc {
        match &heap.get(self.0).body {
            ObjectBody::Function(d) => d,
            _ => panic!("not a function"),
        }
    }

    /// Mutably borrow the descriptor.
    pub fn desc_mut(self, heap: &mut Heap) -> &mut FunctionDesc {
        match &mut heap.get_mut(self.0).body {
            ObjectBody::Function(d) => d,
            _ => panic!("not a function"),
        }
    }

    /// Name as a native string, for diagnostics.
    pub fn name_str(self, heap: &Heap) -> String {
        Str(self.desc(heap).name).to_string(heap)
    }

    /// Total number of declared parameters.
    pub fn number_of_parameters(self, heap: &Heap) -> usize {
        let d = self.desc(heap);
        d.num_fixed_parameters + d.num_optional_parameters
    }

    /// Whether a call with the given argument counts is valid: no more
    /// arguments than parameters and at least the fixed count of
    /// positional arguments.
    pub fn are_valid_argument_counts(
        self,
        heap: &Heap,
        num_arguments: usize,
        num_named_arguments: usize,
    ) -> bool {
        if num_arguments > self.number_of_parameters(heap) {
            return false;
        }
        let num_positional = num_arguments - num_named_arguments;
        num_positional >= self.desc(heap).num_fixed_parameters
    }

    /// Whether a call with the given argument names is valid: counts
    /// check out and every name matches an optional parameter.
    pub fn are_valid_arguments(
        self,
        heap: &Heap,
        num_arguments: usize,
        argument_names: &[ObjectRef],
    ) -> bool {
        if !self.are_valid_argument_counts(heap, num_arguments, argument_names.len()) {
            return false;
        }
        let num_positional = num_arguments - argument_names.len();
        let num_parameters = self.number_of_parameters(heap);
        for name in argument_names {
            let mut found = false;
            for j in num_positional..num_parameters {
                if Str(self.desc(heap).parameter_names[j]).equals_ref(heap, *name) {
                    found = true;
                    break;
                }
            }
            if !found {
                return false;
            }
        }
        true
    }

    /// Whether code has been installed.
    pub fn has_code(self, heap: &Heap) -> bool {
        !self.desc(heap).code.is_null()
    }

    /// Install `code` as the current entry. Unoptimized code is also
    /// remembered as the fallback entry.
    pub fn set_code(self, heap: &mut Heap, code: ObjectRef) {
        let is_optimized = match &heap.get(code).body {
            ObjectBody::Code(c) => c.is_optimized,
            _ => panic!("not code"),
        };
        let d = self.desc_mut(heap);
        d.code = code;
        if !is_optimized {
            d.unoptimized_code = code;
        }
    }

    /// Whether overriding `other` with this function preserves the
    /// calling convention: same fixed count, at least as many optionals,
    /// and every optional named parameter of `other` present by name.
    pub fn has_compatible_parameters_with(self, heap: &Heap, other: Function) -> bool {
        let d = self.desc(heap);
        let o = other.desc(heap);
        if d.num_fixed_parameters != o.num_fixed_parameters
            || d.num_optional_parameters < o.num_optional_parameters
        {
            return false;
        }
        let num_params = d.num_fixed_parameters + d.num_optional_parameters;
        let other_num_params = o.num_fixed_parameters + o.num_optional_parameters;
        for i in o.num_fixed_parameters..other_num_params {
            let other_name = o.parameter_names[i];
            let mut found = false;
            for j in d.num_fixed_parameters..num_params {
                if Str(d.parameter_names[j]).equals_ref(heap, other_name) {
                    found = true;
                    break;
                }
            }
            if !found {
                return false;
            }
        }
        true
    }

    /// The signature class wrapping this function's type, created on
    /// first demand and registered as an anonymous class of the owner's
    /// library when one is known.
    pub fn ensure_signature_class(self, heap: &mut Heap, store: &ObjectStore) -> Class {
        let existing = self.desc(heap).signature_class;
        if !existing.is_null() {
            return Class(existing);
        }
        let mut desc = ClassDesc::new(InstanceKind::Closure, 2);
        desc.name = self.desc(heap).name;
        desc.signature_function = self.0;
        desc.state = ClassState::Allocated;
        let cls = Class(heap.allocate(store.class_class, Space::Old, ObjectBody::Class(desc)));
        self.desc_mut(heap).signature_class = cls.0;

        let owner = self.desc(heap).owner;
        if !owner.is_null() {
            let library = Class(owner).desc(heap).library;
            if !library.is_null() {
                crate::library::Library(library).add_anonymous_class(heap, cls.0);
                cls.desc_mut(heap).library = library;
            }
        }
        cls
    }

    /// The implicit closure function for getter-style closurization of
    /// this method, created on first demand. The closure takes the same
    /// parameters minus the receiver, which is captured in the context.
    pub fn implicit_closure_function(self, heap: &mut Heap, store: &ObjectStore) -> Function {
        let existing = self.desc(heap).implicit_closure_function;
        if !existing.is_null() {
            return Function(existing);
        }
        let (name, token_index) = {
            let d = self.desc(heap);
            (d.name, d.token_index)
        };
        let closure = Function::new(heap, store, name, FunctionKind::Closure, true, false, token_index);
        {
            let (result_type, mut parameter_types, mut parameter_names, num_fixed, num_optional, owner) = {
                let d = self.desc(heap);
                (
                    d.result_type,
                    d.parameter_types.clone(),
                    d.parameter_names.clone(),
                    d.num_fixed_parameters,
                    d.num_optional_parameters,
                    d.owner,
                )
            };
            // Drop the receiver parameter for instance methods.
            let strip_receiver = !self.desc(heap).is_static && num_fixed > 0;
            if strip_receiver {
                parameter_types.remove(0);
                parameter_names.remove(0);
            }
            let d = closure.desc_mut(heap);
            d.result_type = result_type;
            d.parameter_types = parameter_types;
            d.parameter_names = parameter_names;
            d.num_fixed_parameters = if strip_receiver { num_fixed - 1 } else { num_fixed };
            d.num_optional_parameters = num_optional;
            d.parent_function = self.0;
            d.owner = owner;
        }
        closure.ensure_signature_class(heap, store);
        self.desc_mut(heap).implicit_closure_function = closure.0;
        closure
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bootstrap;
    use crate::symbols;

    fn new_function(
        isolate: &mut crate::isolate::Isolate,
        name: &str,
        num_fixed: usize,
        named: &[&str],
    ) -> Function {
        let name = symbols::new_symbol(&mut isolate.heap, &mut isolate.store, name);
        let f = Function::new(
            &mut isolate.heap,
            &isolate.store,
            name,
            FunctionKind::Regular,
            false,
            false,
            0,
        );
        let mut names = vec![ObjectRef::NULL; num_fixed];
        for n in named {
            let sym = symbols::new_symbol(&mut isolate.heap, &mut isolate.store, n);
            names.push(sym);
        }
        let var_type = isolate.store.var_type;
        let d = f.desc_mut(&mut isolate.heap);
        d.num_fixed_parameters = num_fixed;
        d.num_optional_parameters = named.len();
        d.parameter_types = vec![var_type; num_fixed + named.len()];
        d.parameter_names = names;
        d.result_type = var_type;
        f
    }

    #[test]
    fn test_valid_argument_counts() {
        let mut isolate = bootstrap::new_isolate();
        let f = new_function(&mut isolate, "m", 2, &["opt"]);
        let heap = &isolate.heap;

        assert!(f.are_valid_argument_counts(heap, 2, 0));
        assert!(f.are_valid_argument_counts(heap, 3, 0));
        assert!(f.are_valid_argument_counts(heap, 3, 1));
        // Too many arguments.
        assert!(!f.are_valid_argument_counts(heap, 4, 0));
        // Too few positional arguments.
        assert!(!f.are_valid_argument_counts(heap, 1, 0));
        assert!(!f.are_valid_argument_counts(heap, 2, 1));
    }

    #[test]
    fn test_valid_argument_names() {
        let mut isolate = bootstrap::new_isolate();
        let f = new_function(&mut isolate, "m", 1, &["alpha", "beta"]);
        let alpha = symbols::new_symbol(&mut isolate.heap, &mut isolate.store, "alpha");
        let gamma = symbols::new_symbol(&mut isolate.heap, &mut isolate.store, "gamma");

        assert!(f.are_valid_arguments(&isolate.heap, 2, &[alpha]));
        assert!(!f.are_valid_arguments(&isolate.heap, 2, &[gamma]));
    }

    #[test]
    fn test_compatible_parameters() {
        let mut isolate = bootstrap::new_isolate();
        let base = new_function(&mut isolate, "m", 2, &["x"]);
        let same = new_function(&mut isolate, "m", 2, &["x", "y"]);
        let fewer_fixed = new_function(&mut isolate, "m", 1, &["x"]);
        let renamed = new_function(&mut isolate, "m", 2, &["z"]);

        let heap = &isolate.heap;
        assert!(same.has_compatible_parameters_with(heap, base));
        assert!(!fewer_fixed.has_compatible_parameters_with(heap, base));
        assert!(!renamed.has_compatible_parameters_with(heap, base));
        // Dropping an optional named parameter is incompatible.
        assert!(!base.has_compatible_parameters_with(heap, same));
    }

    #[test]
    fn test_implicit_closure_function_strips_receiver() {
        let mut isolate = bootstrap::new_isolate();
        let f = new_function(&mut isolate, "m", 2, &[]);
        let closure = f.implicit_closure_function(&mut isolate.heap, &isolate.store);

        let d = closure.desc(&isolate.heap);
        assert_eq!(d.kind, FunctionKind::Closure);
        assert_eq!(d.num_fixed_parameters, 1);
        assert_eq!(d.parent_function, f.0);
        assert!(!d.signature_class.is_null());

        // Created once, reused after.
        let again = f.implicit_closure_function(&mut isolate.heap, &isolate.store);
        assert_eq!(again.0, closure.0);
    }
}
