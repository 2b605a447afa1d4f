//! Tidy column selection
//!
//! Selector expressions such as `_.x`, `-_.y`, `_.new == _.old`,
//! `_['a':'c']` or `_.startswith('p')` are resolved against an ordered list
//! of column names.

use crate::node::{BinaryOperator, Node, UnaryOperator};
use crate::Value;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum SelectError {
    #[error("Unknown column: {0}")]
    UnknownColumn(String),

    #[error("Invalid selector: {0}")]
    InvalidSelector(String),

    #[error("Invalid across: {0}")]
    InvalidAcross(String),
}

#[derive(Debug, Clone, PartialEq)]
enum Pattern {
    Name(String),
    Rename { new: String, old: String },
    Position(i64),
    Range { start: Option<Bound>, stop: Option<Bound> },
    StartsWith(String),
    EndsWith(String),
    Contains(String),
}

#[derive(Debug, Clone, PartialEq)]
enum Bound {
    Name(String),
    Position(i64),
}

#[derive(Debug, Clone, PartialEq)]
struct Selector {
    pattern: Pattern,
    negated: bool,
}

/// Ordered `old name -> new name` mapping produced by a selection.
pub type Selection = Vec<(String, Option<String>)>;

fn literal_str(node: &Node) -> Option<&str> {
    match node {
        Node::Literal { value: Value::Str(s) } => Some(s),
        _ => None,
    }
}

fn literal_int(node: &Node) -> Option<i64> {
    match node {
        Node::Literal { value: Value::Int(i) } => Some(*i),
        _ => None,
    }
}

fn bound(node: &Option<Box<Node>>) -> Result<Option<Bound>, SelectError> {
    let Some(node) = node.as_deref() else {
        return Ok(None);
    };
    if let Some(name) = node.simple_name().or_else(|| literal_str(node)) {
        return Ok(Some(Bound::Name(name.to_string())));
    }
    literal_int(node)
        .map(|i| Some(Bound::Position(i)))
        .ok_or_else(|| SelectError::InvalidSelector(node.to_string()))
}

fn parse_selector(node: &Node) -> Result<Selector, SelectError> {
    let invalid = || SelectError::InvalidSelector(node.to_string());

    let pattern = match node {
        Node::Unary {
            op: UnaryOperator::Neg | UnaryOperator::Invert,
            operand,
        } => {
            let mut inner = parse_selector(operand)?;
            inner.negated = !inner.negated;
            return Ok(inner);
        }
        Node::Binary {
            op: BinaryOperator::Eq,
            left,
            right,
        } => {
            let new = left.simple_name().ok_or_else(invalid)?;
            let old = right.simple_name().ok_or_else(invalid)?;
            Pattern::Rename {
                new: new.to_string(),
                old: old.to_string(),
            }
        }
        Node::Item { obj, key } if obj.is_meta_arg() => match key.as_ref() {
            Node::Slice { start, stop, step: None } => Pattern::Range {
                start: bound(start)?,
                stop: bound(stop)?,
            },
            key => match (literal_str(key), literal_int(key)) {
                (Some(name), _) => Pattern::Name(name.to_string()),
                (_, Some(i)) => Pattern::Position(i),
                _ => return Err(invalid()),
            },
        },
        Node::Call { func, args, kwargs } if kwargs.is_empty() && args.len() == 1 => {
            let arg = literal_str(&args[0]).ok_or_else(invalid)?.to_string();
            match func.as_ref() {
                Node::Attr { obj, name } if obj.is_meta_arg() => match name.as_str() {
                    "startswith" => Pattern::StartsWith(arg),
                    "endswith" => Pattern::EndsWith(arg),
                    "contains" => Pattern::Contains(arg),
                    _ => return Err(invalid()),
                },
                _ => return Err(invalid()),
            }
        }
        Node::Literal { value: Value::Str(s) } => Pattern::Name(s.clone()),
        Node::Literal { value: Value::Int(i) } => Pattern::Position(*i),
        other => match other.simple_name() {
            Some(name) => Pattern::Name(name.to_string()),
            None => return Err(invalid()),
        },
    };

    Ok(Selector { pattern, negated: false })
}

fn position(columns: &[String], i: i64) -> Result<usize, SelectError> {
    let idx = if i < 0 { columns.len() as i64 + i } else { i };
    if (0..columns.len() as i64).contains(&idx) {
        Ok(idx as usize)
    } else {
        Err(SelectError::UnknownColumn(format!("position {}", i)))
    }
}

fn index_of(columns: &[String], name: &str) -> Result<usize, SelectError> {
    columns
        .iter()
        .position(|c| c == name)
        .ok_or_else(|| SelectError::UnknownColumn(name.to_string()))
}

/// Columns matched by a pattern, with an optional rename for each.
fn matches(columns: &[String], pattern: &Pattern) -> Result<Selection, SelectError> {
    let plain = |idx: Vec<usize>| -> Selection { idx.into_iter().map(|i| (columns[i].clone(), None)).collect() };

    Ok(match pattern {
        Pattern::Name(name) => vec![(columns[index_of(columns, name)?].clone(), None)],
        Pattern::Rename { new, old } => vec![(columns[index_of(columns, old)?].clone(), Some(new.clone()))],
        Pattern::Position(i) => plain(vec![position(columns, *i)?]),
        Pattern::Range { start, stop } => {
            // names are inclusive, positions exclusive at the stop
            let lo = match start {
                None => 0,
                Some(Bound::Name(n)) => index_of(columns, n)?,
                Some(Bound::Position(i)) => position(columns, *i)?,
            };
            let hi = match stop {
                None => columns.len(),
                Some(Bound::Name(n)) => index_of(columns, n)? + 1,
                Some(Bound::Position(i)) => {
                    let i = if *i < 0 { columns.len() as i64 + i } else { *i };
                    i.clamp(0, columns.len() as i64) as usize
                }
            };
            plain((lo..hi.max(lo)).collect())
        }
        Pattern::StartsWith(p) => plain((0..columns.len()).filter(|&i| columns[i].starts_with(p.as_str())).collect()),
        Pattern::EndsWith(p) => plain((0..columns.len()).filter(|&i| columns[i].ends_with(p.as_str())).collect()),
        Pattern::Contains(p) => plain((0..columns.len()).filter(|&i| columns[i].contains(p.as_str())).collect()),
    })
}

/// Resolve selectors against `columns`.
///
/// Selected columns keep selector order; a leading exclusion starts from
/// every column.
pub fn var_select(columns: &[String], selectors: &[Node]) -> Result<Selection, SelectError> {
    let selectors = selectors.iter().map(parse_selector).collect::<Result<Vec<_>, _>>()?;

    let mut out: Selection = match selectors.first() {
        Some(first) if first.negated => columns.iter().map(|c| (c.clone(), None)).collect(),
        _ => Vec::new(),
    };

    for selector in &selectors {
        for (col, rename) in matches(columns, &selector.pattern)? {
            if selector.negated {
                out.retain(|(c, _)| c != &col);
            } else if let Some(entry) = out.iter_mut().find(|(c, _)| c == &col) {
                if rename.is_some() {
                    entry.1 = rename;
                }
            } else {
                out.push((col, rename));
            }
        }
    }

    Ok(out)
}

/// Apply a rename-only selection to a column list, keeping order.
pub fn rename_columns(columns: &[String], selection: &Selection) -> Vec<String> {
    columns
        .iter()
        .map(|c| {
            selection
                .iter()
                .find(|(old, _)| old == c)
                .and_then(|(_, new)| new.clone())
                .unwrap_or_else(|| c.clone())
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cols(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    fn names(sel: &Selection) -> Vec<&str> {
        sel.iter().map(|(c, _)| c.as_str()).collect()
    }

    fn range(start: &str, stop: &str) -> Node {
        Node::item(
            Node::MetaArg,
            Node::Slice {
                start: Some(Box::new(Node::literal(start))),
                stop: Some(Box::new(Node::literal(stop))),
                step: None,
            },
        )
    }

    #[test]
    fn test_select_by_name_keeps_selector_order() {
        let columns = cols(&["a", "b", "c"]);
        let sel = var_select(&columns, &[Node::column("c"), Node::literal("a")]).unwrap();
        assert_eq!(names(&sel), vec!["c", "a"]);
    }

    #[test]
    fn test_leading_exclusion_implies_everything() {
        let columns = cols(&["a", "b", "c"]);
        let sel = var_select(&columns, &[Node::unary(UnaryOperator::Neg, Node::column("b"))]).unwrap();
        assert_eq!(names(&sel), vec!["a", "c"]);
    }

    #[test]
    fn test_rename() {
        let columns = cols(&["a", "b"]);
        let rename = Node::binary(BinaryOperator::Eq, Node::column("z"), Node::column("a"));
        let sel = var_select(&columns, &[rename]).unwrap();
        assert_eq!(sel, vec![("a".to_string(), Some("z".to_string()))]);
        assert_eq!(rename_columns(&columns, &sel), cols(&["z", "b"]));
    }

    #[test]
    fn test_inclusive_name_range() {
        let columns = cols(&["a", "b", "c", "d"]);
        let sel = var_select(&columns, &[range("b", "c")]).unwrap();
        assert_eq!(names(&sel), vec!["b", "c"]);

        let sel = var_select(&columns, &[Node::unary(UnaryOperator::Invert, range("a", "b"))]).unwrap();
        assert_eq!(names(&sel), vec!["c", "d"]);
    }

    #[test]
    fn test_predicates_and_positions() {
        let columns = cols(&["price", "qty", "prefix_len"]);
        let starts = Node::method(Node::MetaArg, "startswith", vec![Node::literal("pr")]);
        assert_eq!(names(&var_select(&columns, &[starts]).unwrap()), vec!["price", "prefix_len"]);

        let ends = Node::method(Node::MetaArg, "endswith", vec![Node::literal("ty")]);
        assert_eq!(names(&var_select(&columns, &[ends]).unwrap()), vec!["qty"]);

        assert_eq!(names(&var_select(&columns, &[Node::literal(-1)]).unwrap()), vec!["prefix_len"]);
    }

    #[test]
    fn test_unknown_column() {
        let columns = cols(&["a"]);
        assert_eq!(
            var_select(&columns, &[Node::column("nope")]),
            Err(SelectError::UnknownColumn("nope".to_string()))
        );
    }
}
