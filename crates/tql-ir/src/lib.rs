//! TQL expression trees
//!
//! Captured expressions over the placeholder `_`, their printing, traversal
//! and evaluation. All types are deterministically serializable so trees can
//! be fingerprinted for caching.

use sha2::{Digest, Sha256};

pub mod across;
mod display;
mod eval;
mod node;
mod symbolic;
pub mod tidyselect;
mod value;
pub mod visitor;

pub use across::{across, fx, if_all, if_any, Across};
pub use display::Formatter;
pub use eval::{binary_value, round_half_even, unary_value, EvalError, Evaluator, ScalarFunction, ValueEvaluator};
pub use node::{BinaryOperator, FuncRef, Function, Node, UnaryOperator};
pub use symbolic::{col, strip_symbolic, sym, Symbolic};
pub use tidyselect::{var_select, SelectError, Selection};
pub use value::Value;
pub use visitor::{CallListener, CallVisitor, OpVars};

/// Hex SHA-256 of a byte string.
pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

impl Node {
    /// Calculate fingerprint (SHA-256) of the JSON form for deterministic caching
    pub fn fingerprint(&self) -> String {
        let json = serde_json::to_vec(self).unwrap_or_else(|_| format!("{:?}", self).into_bytes());
        sha256_hex(&json)
    }
}
