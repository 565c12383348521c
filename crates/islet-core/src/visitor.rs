//! Object-pointer visiting
//!
//! A visitor receives every reference field of an object: the class
//! header first, then the body's references in field order, and for
//! variable-size kinds the tail. For `Code`, the embedded references
//! inside the associated instruction bytes (recorded in
//! `pointer_offsets`) are visited as well.

use crate::heap::Heap;
use crate::object::{Instructions, ObjectBody};
use crate::value::ObjectRef;

/// Receiver of object-pointer ranges.
pub trait ObjectPointerVisitor {
    /// Visit a contiguous range of references.
    fn visit_pointers(&mut self, refs: &[ObjectRef]);
}

/// Visit every reference held by the object at `r`.
pub fn visit_object(heap: &Heap, r: ObjectRef, visitor: &mut dyn ObjectPointerVisitor) {
    let obj = heap.get(r);
    let mut refs: Vec<ObjectRef> = vec![obj.class];
    collect_body_refs(heap, &obj.body, &mut refs);
    visitor.visit_pointers(&refs);
}

fn collect_body_refs(heap: &Heap, body: &ObjectBody, refs: &mut Vec<ObjectRef>) {
    match body {
        ObjectBody::Class(d) => {
            refs.extend([
                d.name,
                d.script,
                d.library,
                d.super_type,
                d.type_parameter_bounds,
                d.factory_type,
                d.functions_cache,
                d.allocation_stub,
                d.signature_function,
            ]);
            refs.extend_from_slice(&d.interfaces);
            refs.extend_from_slice(&d.type_parameters);
            refs.extend_from_slice(&d.fields);
            refs.extend_from_slice(&d.functions);
            refs.extend_from_slice(&d.constants);
        }
        ObjectBody::Null | ObjectBody::Bool(_) | ObjectBody::Mint(_) | ObjectBody::Bigint(_) => {}
        ObjectBody::OneByteString { .. }
        | ObjectBody::TwoByteString { .. }
        | ObjectBody::FourByteString { .. } => {}
        ObjectBody::Array(a) | ObjectBody::ImmutableArray(a) => {
            refs.push(a.type_arguments);
            refs.extend_from_slice(&a.data);
        }
        ObjectBody::TypeArray { types } => refs.extend_from_slice(types),
        ObjectBody::InstantiatedTypeArguments {
            uninstantiated,
            instantiator,
        } => refs.extend([*uninstantiated, *instantiator]),
        ObjectBody::ParameterizedType {
            type_class,
            arguments,
            ..
        } => refs.extend([*type_class, *arguments]),
        ObjectBody::TypeParameter { name, .. } => refs.push(*name),
        ObjectBody::InstantiatedType {
            uninstantiated,
            instantiator,
        } => refs.extend([*uninstantiated, *instantiator]),
        ObjectBody::Function(d) => {
            refs.extend([
                d.name,
                d.owner,
                d.result_type,
                d.code,
                d.unoptimized_code,
                d.parent_function,
                d.signature_class,
                d.implicit_closure_function,
                d.context_scope,
                d.closure_allocation_stub,
            ]);
            refs.extend_from_slice(&d.parameter_types);
            refs.extend_from_slice(&d.parameter_names);
        }
        ObjectBody::Field(d) => {
            refs.extend([d.name, d.owner, d.ty, d.static_value]);
        }
        ObjectBody::Script(d) => refs.extend([d.url, d.source, d.token_stream]),
        ObjectBody::TokenStream { tokens } => {
            refs.extend(tokens.iter().map(|t| t.literal));
        }
        ObjectBody::Library(d) => {
            refs.extend([d.url, d.name, d.private_key, d.dictionary, d.next_library]);
            refs.extend_from_slice(&d.anonymous_classes);
            refs.extend_from_slice(&d.imports);
        }
        ObjectBody::LibraryPrefix { name, library } => refs.extend([*name, *library]),
        ObjectBody::Code(d) => {
            refs.extend([
                d.instructions,
                d.pc_descriptors,
                d.exception_handlers,
                d.function,
                d.ic_data,
                d.class_ic_stubs,
            ]);
            // References embedded in the instruction stream.
            if !d.instructions.is_null() {
                let instructions = Instructions(d.instructions);
                for &offset in &d.pointer_offsets {
                    let raw = instructions.read_u64_at(heap, offset);
                    refs.push(ObjectRef::from_raw(raw));
                }
            }
        }
        ObjectBody::Instructions(d) => refs.push(d.code),
        ObjectBody::PcDescriptors { .. } => {}
        ObjectBody::ExceptionHandlers { .. } => {}
        ObjectBody::Context { parent, slots, .. } => {
            refs.push(*parent);
            refs.extend_from_slice(slots);
        }
        ObjectBody::ContextScope { entries } => {
            for e in entries {
                refs.extend([e.name, e.ty]);
            }
        }
        ObjectBody::Closure { function, context } => refs.extend([*function, *context]),
        ObjectBody::UnhandledException {
            exception,
            stacktrace,
        } => refs.extend([*exception, *stacktrace]),
        ObjectBody::Stacktrace { .. } => {}
        ObjectBody::Instance {
            type_arguments,
            fields,
        } => {
            refs.push(*type_arguments);
            refs.extend_from_slice(fields);
        }
    }
}
