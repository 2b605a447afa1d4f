//! In-memory tables for TQL
//!
//! Columnar frames, grouped frames, and the verbs evaluated directly over
//! them. Grouped expressions run on a fast path that applies each function
//! by kind; anything without a grouped translation falls back to
//! splitting the frame per group.

use std::sync::atomic::{AtomicBool, Ordering};
use thiserror::Error;
use tql_ir::{EvalError, SelectError};
use tql_registry::RegistryError;

mod datum;
mod eval;
mod frame;
pub mod functions;
mod join;
mod verbs;

pub use datum::Datum;
pub use eval::{FrameEvaluator, UserFunction};
pub use frame::{values, Frame, GroupedFrame, Grouping, RowKey};
pub use functions::{frame_funcs, FrameFunction};
pub use join::{join_keys, joined_columns, JoinKind, JoinedColumn};
pub use verbs::{count_name, is_desc, sort_key};

#[derive(Debug, Error)]
pub enum FrameError {
    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error("Evaluation error: {0}")]
    Eval(#[from] EvalError),

    #[error(transparent)]
    Select(#[from] SelectError),

    #[error("Unsupported: {0}")]
    Unsupported(String),

    #[error("{verb}: argument `{arg}` {msg}")]
    Shape { verb: String, arg: String, msg: String },

    #[error("Unknown column: {0}")]
    UnknownColumn(String),

    #[error("Length mismatch: {0}")]
    Length(String),

    /// Raised on grouped data by functions that only run ungrouped.
    #[error("No grouped implementation: {0}")]
    NoFastPath(String),
}

impl FrameError {
    pub fn shape(verb: &str, arg: impl Into<String>, msg: impl Into<String>) -> Self {
        FrameError::Shape {
            verb: verb.to_string(),
            arg: arg.into(),
            msg: msg.into(),
        }
    }
}

static WARN_ON_FALLBACK: AtomicBool = AtomicBool::new(true);

/// Whether a split-apply fallback logs a warning.
pub fn set_warn_on_fallback(enabled: bool) {
    WARN_ON_FALLBACK.store(enabled, Ordering::Relaxed);
}

pub(crate) fn warn_on_fallback() -> bool {
    WARN_ON_FALLBACK.load(Ordering::Relaxed)
}
