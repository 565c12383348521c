//! Finalization errors
//!
//! Every error raised while resolving or finalizing classes and types.
//! The finalizer boundary converts these into the isolate's sticky-error
//! slot; the messages are the user-visible text.

use thiserror::Error;

/// Errors raised during class and type finalization.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum FinalizeError {
    /// A type name resolved to nothing in the enclosing library.
    #[error("cannot resolve class name '{name}' from '{context}'")]
    UnresolvedName {
        /// The name that failed to resolve
        name: String,
        /// The class the resolution started from
        context: String,
    },

    /// A class appears in its own superclass chain.
    #[error("class '{name}' has a cycle in its superclass relationship")]
    CyclicSuper {
        /// The class at which the cycle was detected
        name: String,
    },

    /// An interface reaches itself through its interface graph.
    #[error("cyclic reference found for interface '{name}'")]
    CyclicInterface {
        /// The interface at which the cycle was detected
        name: String,
    },

    /// A type parameter was used in an implements clause.
    #[error("type parameter '{name}' cannot be used as interface")]
    ParameterAsInterface {
        /// The offending parameter name
        name: String,
    },

    /// A non-interface class was used in an implements clause.
    #[error("class name '{name}' used where interface expected")]
    ClassAsInterface {
        /// The offending class name
        name: String,
    },

    /// Class and superclass disagree on interface-ness.
    #[error("class '{name}' and superclass '{super_name}' are not both classes or both interfaces")]
    MixedClassInterface {
        /// The subclass
        name: String,
        /// The superclass
        super_name: String,
    },

    /// An interface's default clause names another interface.
    #[error("default clause of interface '{name}' does not name a class")]
    FactoryNotClass {
        /// The interface with the bad default clause
        name: String,
    },

    /// A type was applied to the wrong number of arguments.
    #[error("wrong number of type arguments in type '{name}'")]
    WrongArity {
        /// The offending type
        name: String,
    },

    /// A type parameter carried type arguments.
    #[error("type parameter '{name}' cannot be parameterized")]
    ParameterizedTypeParameter {
        /// The offending parameter name
        name: String,
    },

    /// A type's finalization reached the type itself.
    #[error("type '{name}' illegally refers to itself")]
    SelfReferencingType {
        /// The self-referential type
        name: String,
    },

    /// A type argument escapes its declared upper bound.
    #[error("type argument '{name}' does not extend type '{bound}'")]
    BoundViolation {
        /// The violating argument
        name: String,
        /// The declared bound
        bound: String,
    },

    /// A member name collides with an incompatible ancestor member.
    #[error("{message}")]
    NameCollision {
        /// Full collision description
        message: String,
    },

    /// A non-static override changes the calling convention.
    #[error("class '{class_name}' overrides function '{name}' with incompatible parameters")]
    IncompatibleOverride {
        /// The overriding class
        class_name: String,
        /// The overridden function
        name: String,
    },

    /// A const class extends a non-const superclass.
    #[error("superclass '{name}' must be const")]
    NonConstSuper {
        /// The non-const superclass
        name: String,
    },

    /// A const class declares a non-final instance field.
    #[error("const class '{class_name}' has non-final field '{field_name}'")]
    NonFinalFieldInConstClass {
        /// The const class
        class_name: String,
        /// The offending field
        field_name: String,
    },
}
