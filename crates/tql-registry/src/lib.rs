//! Function dispatch for TQL
//!
//! Type-tag hierarchies, the name + tag dispatch registry, generic
//! functions, and the `CallTreeLocal` rewriter that binds captured
//! operations to a backend's function table.

use thiserror::Error;

mod dispatch;
mod generic;
mod hierarchy;
mod local;
mod tables;
pub mod vector;

pub use dispatch::{Dispatch, DispatchRegistry};
pub use generic::{Dispatchable, GenericFunction};
pub use hierarchy::{TypeHierarchy, OBJECT};
pub use local::{get_attr_chain, CallTreeLocal, DispatchTarget, FuncTable, LocalTable, PROPERTIES, SUB_ATTRS};
pub use tables::{FuncKind, KindRegistry, KindTables};

#[derive(Debug, Error, Clone, PartialEq)]
pub enum RegistryError {
    #[error("No function {name} for {context}")]
    FunctionLookup { name: String, context: String },

    #[error("{0}")]
    LookupBound(String),

    #[error("Unknown type tag: {0}")]
    UnknownType(String),

    #[error("Invalid type hierarchy: {0}")]
    InvalidHierarchy(String),
}
