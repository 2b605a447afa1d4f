//! Two-table verbs: key resolution, output columns and the in-memory join

use crate::frame::{Frame, RowKey};
use crate::FrameError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tql_ir::Value;
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JoinKind {
    Inner,
    Left,
    Right,
    Full,
    Semi,
    Anti,
}

impl JoinKind {
    pub fn verb(self) -> &'static str {
        match self {
            JoinKind::Inner => "inner_join",
            JoinKind::Left => "left_join",
            JoinKind::Right => "right_join",
            JoinKind::Full => "full_join",
            JoinKind::Semi => "semi_join",
            JoinKind::Anti => "anti_join",
        }
    }

    /// Semi and anti joins only filter the left table.
    pub fn is_filtering(self) -> bool {
        matches!(self, JoinKind::Semi | JoinKind::Anti)
    }
}

/// `(left, right)` key columns. Without `on`, every column name the two
/// tables share is a key.
pub fn join_keys(
    left: &[String],
    right: &[String],
    on: Option<&[(String, String)]>,
    how: JoinKind,
) -> Result<Vec<(String, String)>, FrameError> {
    let verb = how.verb();
    match on {
        Some([]) => Err(FrameError::shape(verb, "on", "needs at least one key")),
        Some(pairs) => {
            for (l, r) in pairs {
                if !left.contains(l) {
                    return Err(FrameError::shape(verb, "on", format!("names {} which is not a left column", l)));
                }
                if !right.contains(r) {
                    return Err(FrameError::shape(verb, "on", format!("names {} which is not a right column", r)));
                }
            }
            Ok(pairs.to_vec())
        }
        None => {
            let shared: Vec<String> = left.iter().filter(|c| right.contains(c)).cloned().collect();
            if shared.is_empty() {
                return Err(FrameError::shape(verb, "on", "not given and the tables share no columns"));
            }
            warn!(verb = %verb, columns = ?shared, "Joining on shared columns");
            Ok(shared.into_iter().map(|c| (c.clone(), c)).collect())
        }
    }
}

/// One output column of a join.
#[derive(Debug, Clone, PartialEq)]
pub enum JoinedColumn {
    /// Key column; takes the left value, or the right one where the left row is missing.
    Key { left: String, right: String, name: String },
    Left { source: String, name: String },
    Right { source: String, name: String },
}

impl JoinedColumn {
    pub fn name(&self) -> &str {
        match self {
            JoinedColumn::Key { name, .. } | JoinedColumn::Left { name, .. } | JoinedColumn::Right { name, .. } => name,
        }
    }
}

/// Left columns, then right non-key columns. Non-key names present on both
/// sides get `_x` / `_y` suffixes.
pub fn joined_columns(left: &[String], right: &[String], keys: &[(String, String)], how: JoinKind) -> Vec<JoinedColumn> {
    if how.is_filtering() {
        return left
            .iter()
            .map(|c| JoinedColumn::Left {
                source: c.clone(),
                name: c.clone(),
            })
            .collect();
    }

    let right_key = |c: &String| keys.iter().any(|(_, r)| r == c);
    let left_key = |c: &String| keys.iter().find(|(l, _)| l == c);
    let right_values: Vec<&String> = right.iter().filter(|c| !right_key(c)).collect();

    let mut out = Vec::new();
    for c in left {
        match left_key(c) {
            Some((l, r)) => out.push(JoinedColumn::Key {
                left: l.clone(),
                right: r.clone(),
                name: l.clone(),
            }),
            None if right_values.contains(&c) => out.push(JoinedColumn::Left {
                source: c.clone(),
                name: format!("{}_x", c),
            }),
            None => out.push(JoinedColumn::Left {
                source: c.clone(),
                name: c.clone(),
            }),
        }
    }
    for c in right_values {
        let name = if left.contains(c) { format!("{}_y", c) } else { c.clone() };
        out.push(JoinedColumn::Right { source: c.clone(), name });
    }
    out
}

impl Frame {
    /// Join on key equality. Null keys never match.
    pub fn join(&self, other: &Frame, on: Option<&[(String, String)]>, how: JoinKind) -> Result<Frame, FrameError> {
        let keys = join_keys(self.column_names(), other.column_names(), on, how)?;
        let left_names: Vec<String> = keys.iter().map(|(l, _)| l.clone()).collect();
        let right_names: Vec<String> = keys.iter().map(|(_, r)| r.clone()).collect();

        let mut index: BTreeMap<RowKey, Vec<usize>> = BTreeMap::new();
        for row in 0..other.nrows() {
            let key = other.row_key(&right_names, row)?;
            if !key.has_null() {
                index.entry(key).or_default().push(row);
            }
        }

        let mut pairs: Vec<(Option<usize>, Option<usize>)> = Vec::new();
        let mut matched_right = vec![false; other.nrows()];
        for row in 0..self.nrows() {
            let key = self.row_key(&left_names, row)?;
            let matches = if key.has_null() { None } else { index.get(&key) };
            match (how, matches) {
                (JoinKind::Semi, m) => {
                    if m.is_some() {
                        pairs.push((Some(row), None));
                    }
                }
                (JoinKind::Anti, m) => {
                    if m.is_none() {
                        pairs.push((Some(row), None));
                    }
                }
                (_, Some(rows)) => {
                    for &r in rows {
                        matched_right[r] = true;
                        pairs.push((Some(row), Some(r)));
                    }
                }
                (JoinKind::Left | JoinKind::Full, None) => pairs.push((Some(row), None)),
                (_, None) => {}
            }
        }
        if matches!(how, JoinKind::Right | JoinKind::Full) {
            pairs.extend(matched_right.iter().enumerate().filter(|(_, m)| !**m).map(|(r, _)| (None, Some(r))));
        }

        let pick = |frame: &Frame, name: &str, row: Option<usize>| -> Result<Value, FrameError> {
            Ok(row.map_or(Ok(Value::Null), |r| frame.get(name).map(|c| c[r].clone()))?)
        };
        let columns = joined_columns(self.column_names(), other.column_names(), &keys, how)
            .into_iter()
            .map(|column| {
                let values = pairs
                    .iter()
                    .map(|&(l, r)| match &column {
                        JoinedColumn::Key { left, right, .. } => match l {
                            Some(_) => pick(self, left, l),
                            None => pick(other, right, r),
                        },
                        JoinedColumn::Left { source, .. } => pick(self, source, l),
                        JoinedColumn::Right { source, .. } => pick(other, source, r),
                    })
                    .collect::<Result<Vec<_>, FrameError>>()?;
                Ok((column.name().to_string(), values))
            })
            .collect::<Result<Vec<_>, FrameError>>()?;
        Frame::new(columns)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::values;

    fn names(cols: &[&str]) -> Vec<String> {
        cols.iter().map(|c| c.to_string()).collect()
    }

    fn left() -> Frame {
        Frame::new([("id", values([1, 2, 3])), ("v", values(["a", "b", "c"]))]).unwrap()
    }

    fn right() -> Frame {
        Frame::new([
            ("id", vec![Value::Int(2), Value::Int(3), Value::Int(4), Value::Null]),
            ("v", values(["B", "C", "D", "N"])),
        ])
        .unwrap()
    }

    #[test]
    fn test_joined_columns_suffixes() {
        let keys = vec![("id".to_string(), "id".to_string())];
        let cols = joined_columns(&names(&["id", "v"]), &names(&["id", "v", "w"]), &keys, JoinKind::Inner);
        let out: Vec<&str> = cols.iter().map(JoinedColumn::name).collect();
        assert_eq!(out, vec!["id", "v_x", "v_y", "w"]);
    }

    #[test]
    fn test_missing_key_names_verb() {
        let err = join_keys(&names(&["a"]), &names(&["b"]), None, JoinKind::Left).unwrap_err();
        match err {
            FrameError::Shape { verb, arg, .. } => {
                assert_eq!(verb, "left_join");
                assert_eq!(arg, "on");
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_inner_and_left() {
        let out = left().join(&right(), None, JoinKind::Inner).unwrap();
        assert_eq!(out.column("id").unwrap(), values([2, 3]).as_slice());
        assert_eq!(out.column("v_y").unwrap(), values(["B", "C"]).as_slice());

        let out = left().join(&right(), None, JoinKind::Left).unwrap();
        assert_eq!(out.nrows(), 3);
        assert_eq!(out.column("v_y").unwrap()[0], Value::Null);
    }

    #[test]
    fn test_full_coalesces_keys() {
        let out = left().join(&right(), None, JoinKind::Full).unwrap();
        assert_eq!(
            out.column("id").unwrap(),
            &[Value::Int(1), Value::Int(2), Value::Int(3), Value::Int(4), Value::Null]
        );
    }

    #[test]
    fn test_semi_and_anti() {
        let on = vec![("id".to_string(), "id".to_string())];
        let out = left().join(&right(), Some(&on), JoinKind::Semi).unwrap();
        assert_eq!(out.column_names(), &["id", "v"]);
        assert_eq!(out.column("id").unwrap(), values([2, 3]).as_slice());
        let out = left().join(&right(), Some(&on), JoinKind::Anti).unwrap();
        assert_eq!(out.column("id").unwrap(), values([1]).as_slice());
    }
}
