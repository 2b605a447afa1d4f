//! Column-wise expansion: `across`, `if_any` and `if_all`
//!
//! `across(cols, fns, names = '{col}_{fn}')` applies every function in `fns`
//! to each selected column, giving one named result per pair. Inside a
//! function the current column is `Fx`, while `_` still refers to the whole
//! table. `cols` is a tidy selector or a list of column names; `fns` is a
//! single function or a `{'name': fn}` dict.
//!
//! `if_any` and `if_all` take the same arguments and fold their results into
//! one condition with `|` or `&`.
//!
//! ```
//! use tql_ir::across::{across, expand_named, fx};
//! use tql_ir::col;
//!
//! let columns = vec!["x".to_string(), "y".to_string()];
//! let half = across(col("x"), fx() / 2, Some("{col}_half"));
//! let out = expand_named(&[(String::new(), half.into_node())], &columns).unwrap();
//! assert_eq!(out[0].0, "x_half");
//! assert_eq!(out[0].1.to_string(), "_.x / 2");
//! ```

use crate::node::{BinaryOperator, FuncRef, Node};
use crate::symbolic::Symbolic;
use crate::tidyselect::{var_select, SelectError};
use crate::Value;

/// Name of the current-column placeholder.
pub const FX: &str = "Fx";

const SINGLE_TEMPLATE: &str = "{col}";
const MULTI_TEMPLATE: &str = "{col}_{fn}";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Kind {
    Across,
    Any,
    All,
}

fn kind(node: &Node) -> Option<Kind> {
    match node {
        Node::Call { func, .. } => match func.as_ref() {
            Node::FuncArg { func } => match func.name() {
                "across" => Some(Kind::Across),
                "if_any" => Some(Kind::Any),
                "if_all" => Some(Kind::All),
                _ => None,
            },
            _ => None,
        },
        _ => None,
    }
}

/// The current column inside an across function.
pub fn fx() -> Symbolic {
    Symbolic::new(Node::func_arg(FuncRef::named(FX)))
}

/// `{'name': fn, ...}` for several functions.
pub fn fn_map<I, S, N>(fns: I) -> Node
where
    I: IntoIterator<Item = (S, N)>,
    S: Into<String>,
    N: Into<Node>,
{
    Node::DictCall {
        entries: fns
            .into_iter()
            .map(|(name, f)| (Node::literal(name.into()), f.into()))
            .collect(),
    }
}

/// `['a', 'b']` as a column selection.
pub fn names<I, S>(columns: I) -> Node
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    Node::Literal {
        value: Value::List(columns.into_iter().map(|c| Value::Str(c.into())).collect()),
    }
}

fn capture(name: &str, cols: Node, fns: Node, template: Option<&str>) -> Symbolic {
    let kwargs = template
        .map(|t| vec![("names".to_string(), Node::literal(t))])
        .unwrap_or_default();
    Symbolic::new(Node::func_call(FuncRef::named(name), vec![cols, fns], kwargs))
}

pub fn across(cols: impl Into<Node>, fns: impl Into<Node>, template: Option<&str>) -> Symbolic {
    capture("across", cols.into(), fns.into(), template)
}

/// True when `fns` holds for any selected column.
pub fn if_any(cols: impl Into<Node>, fns: impl Into<Node>) -> Symbolic {
    capture("if_any", cols.into(), fns.into(), None)
}

/// True when `fns` holds for every selected column.
pub fn if_all(cols: impl Into<Node>, fns: impl Into<Node>) -> Symbolic {
    capture("if_all", cols.into(), fns.into(), None)
}

pub fn is_across(node: &Node) -> bool {
    kind(node) == Some(Kind::Across)
}

/// A parsed `across`, `if_any` or `if_all` call.
#[derive(Debug, Clone, PartialEq)]
pub struct Across {
    cols: Vec<Node>,
    fns: Vec<(String, Node)>,
    template: String,
}

impl Across {
    pub fn from_node(node: &Node) -> Result<Self, SelectError> {
        let invalid = |msg: &str| SelectError::InvalidAcross(format!("{} in {}", msg, node));
        let Node::Call { args, kwargs, .. } = node else {
            return Err(invalid("expected a call"));
        };
        let [cols, fns] = args.as_slice() else {
            return Err(invalid("expected columns and functions"));
        };

        let cols = match cols {
            Node::Literal { value: Value::List(items) } => items.iter().cloned().map(Node::from).collect(),
            selector => vec![selector.clone()],
        };
        let (fns, default) = match fns {
            Node::DictCall { entries } => {
                let named = entries
                    .iter()
                    .map(|(k, f)| match k {
                        Node::Literal { value: Value::Str(name) } => Ok((name.clone(), f.clone())),
                        _ => Err(invalid("function names must be strings")),
                    })
                    .collect::<Result<Vec<_>, _>>()?;
                (named, MULTI_TEMPLATE)
            }
            f => (vec![("fn1".to_string(), f.clone())], SINGLE_TEMPLATE),
        };

        let mut template = default.to_string();
        for (key, value) in kwargs {
            match (key.as_str(), value) {
                ("names", Node::Literal { value: Value::Str(t) }) => template = t.clone(),
                _ => return Err(invalid(&format!("unexpected argument {}", key))),
            }
        }
        Ok(Self { cols, fns, template })
    }

    /// One `(name, expression)` per selected column and function, column-major.
    pub fn expand(&self, columns: &[String]) -> Result<Vec<(String, Node)>, SelectError> {
        let selection = var_select(columns, &self.cols)?;
        let mut out = Vec::with_capacity(selection.len() * self.fns.len());
        for (old, new) in &selection {
            let label = new.as_deref().unwrap_or(old);
            for (fn_name, f) in &self.fns {
                let name = self.template.replace("{col}", label).replace("{fn}", fn_name);
                out.push((name, substitute(f, old)));
            }
        }
        Ok(out)
    }

    /// Results joined with `op`; `empty` when nothing is selected.
    fn fold(&self, columns: &[String], op: BinaryOperator, empty: bool) -> Result<Node, SelectError> {
        Ok(self
            .expand(columns)?
            .into_iter()
            .map(|(_, n)| n)
            .reduce(|a, b| Node::binary(op, a, b))
            .unwrap_or_else(|| Node::literal(empty)))
    }
}

fn substitute(node: &Node, column: &str) -> Node {
    match node {
        Node::FuncArg { func } if func.name() == FX => Node::column(column),
        other => other.map_children(|c| substitute(c, column)),
    }
}

/// Rewrite every `if_any`/`if_all` inside `node` into plain conditions.
pub fn expand_folds(node: &Node, columns: &[String]) -> Result<Node, SelectError> {
    match kind(node) {
        Some(Kind::Any) => Across::from_node(node)?.fold(columns, BinaryOperator::Or, false),
        Some(Kind::All) => Across::from_node(node)?.fold(columns, BinaryOperator::And, true),
        Some(Kind::Across) => Err(SelectError::InvalidAcross(format!(
            "across() must be a whole argument, got {}",
            node
        ))),
        None => node.try_map_children(|c| expand_folds(c, columns)),
    }
}

/// Named verb arguments with each `across` entry replaced by its results.
/// The name given to an `across` entry is ignored.
pub fn expand_named(exprs: &[(String, Node)], columns: &[String]) -> Result<Vec<(String, Node)>, SelectError> {
    let mut out = Vec::with_capacity(exprs.len());
    for (name, node) in exprs {
        if is_across(node) {
            out.extend(Across::from_node(node)?.expand(columns)?);
        } else {
            out.push((name.clone(), expand_folds(node, columns)?));
        }
    }
    Ok(out)
}

/// Filter conditions; a bare `across` must hold for every column.
pub fn expand_conditions(conds: &[Node], columns: &[String]) -> Result<Vec<Node>, SelectError> {
    conds
        .iter()
        .map(|c| {
            if is_across(c) {
                Across::from_node(c)?.fold(columns, BinaryOperator::And, true)
            } else {
                expand_folds(c, columns)
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::col;

    fn columns() -> Vec<String> {
        ["g", "x", "y"].map(String::from).to_vec()
    }

    #[test]
    fn test_across_names_each_pair() {
        let node = across(
            names(["x", "y"]),
            fn_map([("min", fx().method("min", vec![])), ("max", fx().method("max", vec![]))]),
            None,
        )
        .into_node();
        let out = expand_named(&[(String::new(), node)], &columns()).unwrap();
        let shown: Vec<(String, String)> = out.into_iter().map(|(n, e)| (n, e.to_string())).collect();
        assert_eq!(
            shown,
            vec![
                ("x_min".to_string(), "_.x.min()".to_string()),
                ("x_max".to_string(), "_.x.max()".to_string()),
                ("y_min".to_string(), "_.y.min()".to_string()),
                ("y_max".to_string(), "_.y.max()".to_string()),
            ]
        );
    }

    #[test]
    fn test_single_function_keeps_column_name() {
        let node = across(-col("g"), fx() + col("x"), None).into_node();
        let out = expand_named(&[("ignored".into(), node), ("z".into(), col("x").into_node())], &columns()).unwrap();
        let names: Vec<&str> = out.iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(names, ["x", "y", "z"]);
        assert_eq!(out[1].1.to_string(), "_.y + _.x");
    }

    #[test]
    fn test_if_any_and_if_all_fold() {
        let any = if_any(names(["x", "y"]), fx().gt(0)).into_node();
        assert_eq!(expand_folds(&any, &columns()).unwrap().to_string(), "(_.x > 0) | (_.y > 0)");

        let nested = col("g").eq("a") & if_all(names(["x", "y"]), fx().gt(0));
        let cond = expand_conditions(&[nested.into_node()], &columns()).unwrap();
        assert_eq!(cond[0].to_string(), "(_.g == 'a') & ((_.x > 0) & (_.y > 0))");
    }

    #[test]
    fn test_across_inside_expression_is_rejected() {
        let bad = across(col("x"), fx(), None) + 1;
        let err = expand_named(&[("z".into(), bad.into_node())], &columns()).unwrap_err();
        assert!(matches!(err, SelectError::InvalidAcross(_)));

        let empty = if_any(crate::sym().method("startswith", vec![Node::literal("q")]), fx().gt(0)).into_node();
        assert_eq!(expand_folds(&empty, &columns()).unwrap(), Node::literal(false));
    }
}
