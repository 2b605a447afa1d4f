//! SQL backend for TQL
//!
//! Captured expressions are bound to a dialect's function tables, translated
//! into a small SQL expression tree and accumulated by [`LazyTbl`] as nested
//! selects. Window functions that cannot appear where they are used are
//! computed in a subquery and referenced by name.

use thiserror::Error;
use tql_frame::FrameError;
use tql_ir::{EvalError, SelectError};
use tql_registry::RegistryError;

pub mod ast;
mod dialect;
pub mod funcs;
mod lazy;
mod render;
mod source;
mod translate;
mod verbs;
mod window;

pub use dialect::Dialect;
pub use funcs::sql_funcs;
pub use lazy::LazyTbl;
pub use render::{render, render_expr};
pub use source::{MockSource, QueryResult, SqlSource};
pub use translate::{SqlArgs, SqlEvaluator, SqlTranslation, SqlValue};
pub use window::WindowReplacer;

#[derive(Debug, Error)]
pub enum SqlError {
    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error("Evaluation error: {0}")]
    Eval(#[from] EvalError),

    #[error(transparent)]
    Select(#[from] SelectError),

    #[error(transparent)]
    Frame(#[from] FrameError),

    #[error("Unsupported: {0}")]
    Unsupported(String),

    #[error("{verb}: argument `{arg}` {msg}")]
    Shape { verb: String, arg: String, msg: String },

    #[error("Unknown column: {0}")]
    UnknownColumn(String),

    #[error("Unknown table: {0}")]
    UnknownTable(String),

    #[error("Backend error: {0}")]
    Backend(#[source] Box<dyn std::error::Error + Send + Sync>),
}

impl SqlError {
    pub fn shape(verb: &str, arg: impl Into<String>, msg: impl Into<String>) -> Self {
        SqlError::Shape {
            verb: verb.to_string(),
            arg: arg.into(),
            msg: msg.into(),
        }
    }

    /// Keep contract violations as such; anything else stays a frame error.
    pub fn from_frame(e: FrameError) -> Self {
        match e {
            FrameError::Shape { verb, arg, msg } => SqlError::Shape { verb, arg, msg },
            FrameError::UnknownColumn(c) => SqlError::UnknownColumn(c),
            other => SqlError::Frame(other),
        }
    }

    pub fn backend(e: impl std::error::Error + Send + Sync + 'static) -> Self {
        SqlError::Backend(Box::new(e))
    }
}
