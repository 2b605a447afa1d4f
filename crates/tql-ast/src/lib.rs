//! TQL AST - parser for printed expressions
//!
//! Turns the source form produced by `Display for Node` back into a tree.

mod parser;

pub use parser::{parse, ExprParser, ParseError, Rule};
