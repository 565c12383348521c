//! Class finalizer and type system for the islet VM
//!
//! This crate resolves and finalizes classes, interfaces and
//! parameterized types over the object model in `islet-core`, and
//! implements the subtype and assignability relations used by the
//! runtime's type tests.

#![warn(rust_2018_idioms)]

pub mod error;
pub mod finalizer;
pub mod subtype;

pub use error::FinalizeError;
pub use finalizer::{verify_bootstrap_classes, ClassFinalizer};
pub use subtype::{
    function_is_assignable_to, function_is_subtype_of, instance_is_instance_of,
    type_is_assignable_to, type_is_more_specific_than, type_is_subtype_of, TypeTestKind,
};
