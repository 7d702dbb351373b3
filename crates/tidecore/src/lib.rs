//! Core abstractions for the tide dataflow runtime
//!
//! This crate provides the plain data types every other crate depends on:
//! dynamic values, program descriptors, typing schemas, diagnostics and
//! errors. It has no dependency on the runtime crate.

mod descriptor;
mod diagnostics;
mod error;
mod typing;
mod value;

pub use descriptor::{OperatorDesc, ProgramDesc, ProgramKind, ValueDesc, MODULE_PREFIX};
pub use diagnostics::{Diagnostic, DiagnosticKind, Diagnostics};
pub use error::{BuildError, Error, EvalError, FlowError, ModuleError, RuntimeError};
pub use typing::Schema;
pub use value::{Component, Element, Object, Value};

/// Result type for tide operations
pub type Result<T> = std::result::Result<T, Error>;
