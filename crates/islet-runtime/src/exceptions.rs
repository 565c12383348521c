//! Exception propagation
//!
//! Throwing walks the frame stack from the innermost activation
//! outwards. For each frame, the pc's try-index (from the pc-descriptor
//! table) selects a handler in the code's exception-handler table; the
//! first match rewrites that frame's pc to the handler and discards the
//! frames above it. With no handler anywhere, the exception comes back
//! as an `UnhandledException { exception, stacktrace }` result for the
//! embedder; the process does not exit on that path.

use crate::allocation::new_instance;
use islet_core::{Class, Isolate, ObjectBody, ObjectRef, Space, VmError, VmResult};

/// Outcome of a throw.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThrowResult {
    /// A handler accepted the exception; the frame at `frame_index` now
    /// resumes at `handler_pc`.
    Handled {
        /// Index of the handling frame in the isolate's frame stack.
        frame_index: usize,
        /// The handler's pc.
        handler_pc: u64,
    },
    /// No handler exists; the wrapped result for the embedder.
    Unhandled(ObjectRef),
}

/// Dispatch-failure exception kinds thrown by the runtime itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExceptionKind {
    /// A value that is not a closure was called.
    ObjectNotClosure,
    /// A closure was called with an incompatible argument shape.
    ClosureArgumentMismatch,
    /// The stack limit was crossed.
    StackOverflow,
    /// No method and no fallback matched a dynamic call.
    NoSuchMethod,
}

impl ExceptionKind {
    fn class_name(self) -> &'static str {
        match self {
            ExceptionKind::ObjectNotClosure => "ObjectNotClosureException",
            ExceptionKind::ClosureArgumentMismatch => "ClosureArgumentMismatchException",
            ExceptionKind::StackOverflow => "StackOverflowException",
            ExceptionKind::NoSuchMethod => "NoSuchMethodException",
        }
    }
}

/// Capture the current frame stack as a stacktrace object.
pub fn capture_stacktrace(isolate: &mut Isolate) -> ObjectRef {
    let pcs: Vec<u64> = isolate.frames.iter().rev().map(|f| f.pc).collect();
    isolate.heap.allocate(
        isolate.store.stacktrace_class,
        Space::New,
        ObjectBody::Stacktrace { pcs },
    )
}

/// Throw `exception` through the frame stack.
pub fn throw_exception(isolate: &mut Isolate, exception: ObjectRef) -> ThrowResult {
    let stacktrace = capture_stacktrace(isolate);
    rethrow_exception(isolate, exception, stacktrace)
}

/// Rethrow with an already captured stacktrace.
pub fn rethrow_exception(
    isolate: &mut Isolate,
    exception: ObjectRef,
    stacktrace: ObjectRef,
) -> ThrowResult {
    for frame_index in (0..isolate.frames.len()).rev() {
        let pc = isolate.frames[frame_index].pc;
        let code = match isolate.code_index.lookup_code(pc) {
            Some(code) => code,
            None => continue,
        };
        let try_index = code.get_try_index_of_pc(&isolate.heap, pc);
        if try_index < 0 {
            continue;
        }
        for handler in code.exception_handler_entries(&isolate.heap) {
            if handler.try_index == try_index {
                isolate.frames.truncate(frame_index + 1);
                isolate.frames[frame_index].pc = handler.handler_pc;
                return ThrowResult::Handled {
                    frame_index,
                    handler_pc: handler.handler_pc,
                };
            }
        }
    }
    let unhandled = isolate.heap.allocate(
        isolate.store.unhandled_exception_class,
        Space::New,
        ObjectBody::UnhandledException {
            exception,
            stacktrace,
        },
    );
    ThrowResult::Unhandled(unhandled)
}

/// Allocate and throw one of the runtime's own exception kinds.
pub fn throw_by_kind(isolate: &mut Isolate, kind: ExceptionKind) -> VmResult<ThrowResult> {
    let name = islet_core::symbols::new_symbol(
        &mut isolate.heap,
        &mut isolate.store,
        kind.class_name(),
    );
    let cls = islet_core::Library(isolate.store.core_library)
        .lookup_class(&isolate.heap, name)
        .ok_or_else(|| {
            VmError::RuntimeError(format!("missing exception class {}", kind.class_name()))
        })?;
    let exception = new_instance(isolate, cls);
    Ok(throw_exception(isolate, exception))
}

/// Convert a throw outcome into the entry-level result: handled throws
/// succeed (control continues at the handler), unhandled ones surface
/// as an error carrying the wrapper.
pub fn unwind_result(isolate: &Isolate, result: ThrowResult) -> VmResult<()> {
    match result {
        ThrowResult::Handled { .. } => Ok(()),
        ThrowResult::Unhandled(wrapper) => match &isolate.heap.get(wrapper).body {
            ObjectBody::UnhandledException {
                exception,
                stacktrace,
            } => Err(VmError::UncaughtException {
                exception: *exception,
                stacktrace: *stacktrace,
            }),
            _ => unreachable!(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::CodeBuilder;
    use crate::stubs;
    use islet_core::{bootstrap, Frame, InstanceKind};

    fn test_isolate() -> Isolate {
        let mut isolate = bootstrap::new_isolate();
        stubs::init_stubs(&mut isolate).unwrap();
        isolate
    }

    #[test]
    fn test_unhandled_throw_wraps_exception() {
        let mut isolate = test_isolate();
        let object_class = isolate.store.object_class;
        let exception = new_instance(&mut isolate, Class(object_class));
        let result = throw_exception(&mut isolate, exception);
        match result {
            ThrowResult::Unhandled(wrapper) => {
                assert_eq!(
                    isolate.heap.kind_of(wrapper),
                    InstanceKind::UnhandledException
                );
                match &isolate.heap.get(wrapper).body {
                    ObjectBody::UnhandledException { exception: e, stacktrace } => {
                        assert_eq!(*e, exception);
                        assert!(!stacktrace.is_null());
                    }
                    _ => unreachable!(),
                }
                assert!(unwind_result(&isolate, result).is_err());
            }
            ThrowResult::Handled { .. } => panic!("nothing should handle this"),
        }
    }

    #[test]
    fn test_handler_catches_and_rewrites_pc() {
        let mut isolate = test_isolate();

        // Code with a try-covered site and a handler for try 0.
        let mut builder = CodeBuilder::new("guarded");
        builder.prologue();
        let covered = builder.covered_by_try(0, 5, 50);
        let handler = builder.handler(0);
        let code = builder.finalize(&mut isolate).unwrap();
        let entry = code.entry_point(&isolate.heap);

        isolate.frames.push(Frame { pc: entry + covered });
        // An inner frame with no handler unwinds away.
        let mut inner = CodeBuilder::new("inner");
        inner.prologue();
        let inner_code = inner.finalize(&mut isolate).unwrap();
        isolate.frames.push(Frame {
            pc: inner_code.entry_point(&isolate.heap),
        });

        let object_class = isolate.store.object_class;
        let exception = new_instance(&mut isolate, Class(object_class));
        let result = throw_exception(&mut isolate, exception);
        assert_eq!(
            result,
            ThrowResult::Handled {
                frame_index: 0,
                handler_pc: entry + handler,
            }
        );
        assert_eq!(isolate.frames.len(), 1);
        assert_eq!(isolate.frames[0].pc, entry + handler);
        assert!(unwind_result(&isolate, result).is_ok());
    }

    #[test]
    fn test_throw_by_kind_builds_known_exception() {
        let mut isolate = test_isolate();
        let result = throw_by_kind(&mut isolate, ExceptionKind::StackOverflow).unwrap();
        match result {
            ThrowResult::Unhandled(wrapper) => match &isolate.heap.get(wrapper).body {
                ObjectBody::UnhandledException { exception, .. } => {
                    let cls = Class(isolate.heap.class_of(*exception));
                    assert_eq!(cls.name_str(&isolate.heap), "StackOverflowException");
                }
                _ => unreachable!(),
            },
            _ => panic!("no handler installed"),
        }
    }
}
