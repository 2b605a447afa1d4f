//! Vector functions shared by every backend
//!
//! Each helper records a call of a generic function; backends bind the name
//! through their function tables when the expression is compiled.

use crate::generic::GenericFunction;
use tql_ir::{Node, Symbolic};

fn generic(name: &str, args: Vec<Node>, kwargs: Vec<(String, Node)>) -> Symbolic {
    GenericFunction::new(name).call(args, kwargs)
}

/// Descending sort key.
pub fn desc(x: impl Into<Node>) -> Symbolic {
    generic("desc", vec![x.into()], Vec::new())
}

/// Number of rows (per group).
pub fn n(x: impl Into<Node>) -> Symbolic {
    generic("n", vec![x.into()], Vec::new())
}

pub fn n_distinct(x: impl Into<Node>) -> Symbolic {
    generic("n_distinct", vec![x.into()], Vec::new())
}

pub fn row_number(x: impl Into<Node>) -> Symbolic {
    generic("row_number", vec![x.into()], Vec::new())
}

pub fn min_rank(x: impl Into<Node>) -> Symbolic {
    generic("min_rank", vec![x.into()], Vec::new())
}

pub fn dense_rank(x: impl Into<Node>) -> Symbolic {
    generic("dense_rank", vec![x.into()], Vec::new())
}

pub fn percent_rank(x: impl Into<Node>) -> Symbolic {
    generic("percent_rank", vec![x.into()], Vec::new())
}

pub fn cume_dist(x: impl Into<Node>) -> Symbolic {
    generic("cume_dist", vec![x.into()], Vec::new())
}

/// Value `n` rows ahead.
pub fn lead(x: impl Into<Node>, n: i64) -> Symbolic {
    generic("lead", vec![x.into(), Node::literal(n)], Vec::new())
}

/// Value `n` rows behind.
pub fn lag(x: impl Into<Node>, n: i64) -> Symbolic {
    generic("lag", vec![x.into(), Node::literal(n)], Vec::new())
}

pub fn first(x: impl Into<Node>) -> Symbolic {
    generic("first", vec![x.into()], Vec::new())
}

pub fn last(x: impl Into<Node>) -> Symbolic {
    generic("last", vec![x.into()], Vec::new())
}

/// Zero-based `n`th value; negative `n` counts from the end.
pub fn nth(x: impl Into<Node>, n: i64) -> Symbolic {
    generic("nth", vec![x.into(), Node::literal(n)], Vec::new())
}

/// First non-null value across the arguments.
pub fn coalesce<I, T>(args: I) -> Symbolic
where
    I: IntoIterator<Item = T>,
    T: Into<Node>,
{
    generic("coalesce", args.into_iter().map(Into::into).collect(), Vec::new())
}

pub fn na_if(x: impl Into<Node>, y: impl Into<Node>) -> Symbolic {
    generic("na_if", vec![x.into(), y.into()], Vec::new())
}

pub fn if_else(cond: impl Into<Node>, yes: impl Into<Node>, no: impl Into<Node>) -> Symbolic {
    generic("if_else", vec![cond.into(), yes.into(), no.into()], Vec::new())
}

/// `case_when(_, {cond: value, ...})`. A literal `True` condition is the
/// default branch.
pub fn case_when<I, C, V>(cases: I) -> Symbolic
where
    I: IntoIterator<Item = (C, V)>,
    C: Into<Node>,
    V: Into<Node>,
{
    let entries = cases.into_iter().map(|(c, v)| (c.into(), v.into())).collect();
    generic("case_when", vec![Node::MetaArg, Node::DictCall { entries }], Vec::new())
}

/// Literal SQL text, placed in the query as written. SQL backends only.
pub fn sql_raw(text: &str) -> Symbolic {
    generic("sql_raw", vec![Node::literal(text)], Vec::new())
}

pub fn between(x: impl Into<Node>, low: impl Into<Node>, high: impl Into<Node>) -> Symbolic {
    generic("between", vec![x.into(), low.into(), high.into()], Vec::new())
}

/// Truncate a date or timestamp to `unit` (`day`, `week`, `month`, ...).
pub fn floor_date(x: impl Into<Node>, unit: &str) -> Symbolic {
    generic("floor_date", vec![x.into(), Node::literal(unit)], Vec::new())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tql_ir::{col, sym};

    #[test]
    fn test_vector_calls_print() {
        assert_eq!(desc(col("x")).to_string(), "desc(_.x)");
        assert_eq!(n(sym()).to_string(), "n(_)");
        assert_eq!(lag(col("x"), 2).to_string(), "lag(_.x, 2)");
        assert_eq!(
            case_when([(col("x").gt(1).into_node(), Node::literal("hi")), (Node::literal(true), Node::literal("lo"))]).to_string(),
            "case_when(_, {_.x > 1: 'hi', True: 'lo'})"
        );
    }

    #[test]
    fn test_vector_calls_are_generic() {
        let node = n_distinct(col("x")).into_node();
        match node {
            Node::Call { func, .. } => match *func {
                Node::FuncArg { func } => assert!(func.is_generic()),
                other => panic!("unexpected callee {:?}", other),
            },
            other => panic!("unexpected node {:?}", other),
        }
    }
}
