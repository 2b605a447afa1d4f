//! Columnar frames and their grouping

use crate::FrameError;
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use tql_ir::{Selection, Value};

/// Build a column from anything convertible to values.
pub fn values<I, T>(items: I) -> Vec<Value>
where
    I: IntoIterator<Item = T>,
    T: Into<Value>,
{
    items.into_iter().map(Into::into).collect()
}

/// Ordered, named, equal-length columns.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Frame {
    names: Vec<String>,
    columns: Vec<Vec<Value>>,
    nrows: usize,
}

impl Frame {
    pub fn new<I, S>(columns: I) -> Result<Self, FrameError>
    where
        I: IntoIterator<Item = (S, Vec<Value>)>,
        S: Into<String>,
    {
        let mut frame = Frame::default();
        for (i, (name, values)) in columns.into_iter().enumerate() {
            let name = name.into();
            if frame.names.contains(&name) {
                return Err(FrameError::Unsupported(format!("duplicate column name {}", name)));
            }
            if i == 0 {
                frame.nrows = values.len();
            } else if values.len() != frame.nrows {
                return Err(FrameError::Length(format!(
                    "column {} has {} rows, expected {}",
                    name,
                    values.len(),
                    frame.nrows
                )));
            }
            frame.names.push(name);
            frame.columns.push(values);
        }
        Ok(frame)
    }

    /// Row-major constructor, used when materializing query results.
    pub fn from_rows(names: Vec<String>, rows: Vec<Vec<Value>>) -> Result<Self, FrameError> {
        let mut columns: Vec<Vec<Value>> = names.iter().map(|_| Vec::with_capacity(rows.len())).collect();
        for (i, row) in rows.into_iter().enumerate() {
            if row.len() != names.len() {
                return Err(FrameError::Length(format!(
                    "row {} has {} values, expected {}",
                    i,
                    row.len(),
                    names.len()
                )));
            }
            for (column, value) in columns.iter_mut().zip(row) {
                column.push(value);
            }
        }
        if names.is_empty() {
            return Ok(Frame::default());
        }
        Frame::new(names.into_iter().zip(columns))
    }

    pub fn nrows(&self) -> usize {
        self.nrows
    }

    pub fn ncols(&self) -> usize {
        self.names.len()
    }

    pub fn column_names(&self) -> &[String] {
        &self.names
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.names.iter().any(|n| n == name)
    }

    pub fn column(&self, name: &str) -> Option<&[Value]> {
        self.names
            .iter()
            .position(|n| n == name)
            .map(|i| self.columns[i].as_slice())
    }

    pub fn get(&self, name: &str) -> Result<&[Value], FrameError> {
        self.column(name).ok_or_else(|| FrameError::UnknownColumn(name.to_string()))
    }

    pub fn columns(&self) -> impl Iterator<Item = (&str, &[Value])> {
        self.names.iter().map(String::as_str).zip(self.columns.iter().map(Vec::as_slice))
    }

    pub fn row(&self, i: usize) -> Vec<Value> {
        self.columns.iter().map(|c| c[i].clone()).collect()
    }

    /// Replace `name` in place, or append it.
    pub fn with_column(&self, name: &str, values: Vec<Value>) -> Result<Frame, FrameError> {
        if self.ncols() > 0 && values.len() != self.nrows {
            return Err(FrameError::Length(format!(
                "column {} has {} rows, expected {}",
                name,
                values.len(),
                self.nrows
            )));
        }
        let mut out = self.clone();
        out.nrows = values.len();
        match out.names.iter().position(|n| n == name) {
            Some(i) => out.columns[i] = values,
            None => {
                out.names.push(name.to_string());
                out.columns.push(values);
            }
        }
        Ok(out)
    }

    pub fn select_columns(&self, names: &[String]) -> Result<Frame, FrameError> {
        let columns = names
            .iter()
            .map(|n| Ok((n.clone(), self.get(n)?.to_vec())))
            .collect::<Result<Vec<_>, FrameError>>()?;
        let mut out = Frame::new(columns)?;
        out.nrows = self.nrows;
        Ok(out)
    }

    /// Keep the selected columns, in selection order, under their new names.
    pub fn apply_selection(&self, selection: &Selection) -> Result<Frame, FrameError> {
        let columns = selection
            .iter()
            .map(|(old, new)| Ok((new.clone().unwrap_or_else(|| old.clone()), self.get(old)?.to_vec())))
            .collect::<Result<Vec<_>, FrameError>>()?;
        let mut out = Frame::new(columns)?;
        out.nrows = self.nrows;
        Ok(out)
    }

    pub fn rename_columns(&self, names: Vec<String>) -> Result<Frame, FrameError> {
        let mut out = Frame::new(names.into_iter().zip(self.columns.iter().cloned()))?;
        out.nrows = self.nrows;
        Ok(out)
    }

    pub fn take(&self, rows: &[usize]) -> Frame {
        Frame {
            names: self.names.clone(),
            columns: self
                .columns
                .iter()
                .map(|c| rows.iter().map(|&r| c[r].clone()).collect())
                .collect(),
            nrows: rows.len(),
        }
    }

    pub fn filter_mask(&self, mask: &[bool]) -> Frame {
        let rows: Vec<usize> = mask.iter().enumerate().filter(|(_, keep)| **keep).map(|(i, _)| i).collect();
        self.take(&rows)
    }

    pub fn head(&self, n: usize) -> Frame {
        let rows: Vec<usize> = (0..self.nrows.min(n)).collect();
        self.take(&rows)
    }

    pub fn row_key(&self, names: &[String], row: usize) -> Result<RowKey, FrameError> {
        names
            .iter()
            .map(|n| Ok(self.get(n)?[row].clone()))
            .collect::<Result<Vec<_>, FrameError>>()
            .map(RowKey)
    }
}

impl fmt::Display for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let cell = |v: &Value| match v {
            Value::Null => "NULL".to_string(),
            Value::Str(s) => s.clone(),
            other => other.to_string(),
        };
        let widths: Vec<usize> = self
            .names
            .iter()
            .zip(&self.columns)
            .map(|(name, column)| column.iter().map(|v| cell(v).len()).chain([name.len()]).max().unwrap_or(0))
            .collect();

        let header: Vec<String> = self.names.iter().zip(&widths).map(|(n, w)| format!("{:>w$}", n, w = w)).collect();
        writeln!(f, "{}", header.join(" "))?;
        for row in 0..self.nrows {
            let line: Vec<String> = self
                .columns
                .iter()
                .zip(&widths)
                .map(|(c, w)| format!("{:>w$}", cell(&c[row]), w = w))
                .collect();
            writeln!(f, "{}", line.join(" "))?;
        }
        write!(f, "[{} rows x {} columns]", self.nrows, self.ncols())
    }
}

/// Grouping and join key. Ordered with [`Value::total_cmp`]; nulls compare
/// equal to each other.
#[derive(Debug, Clone)]
pub struct RowKey(pub Vec<Value>);

impl RowKey {
    pub fn has_null(&self) -> bool {
        self.0.iter().any(Value::is_null)
    }
}

impl Ord for RowKey {
    fn cmp(&self, other: &Self) -> Ordering {
        for (a, b) in self.0.iter().zip(&other.0) {
            let ord = a.total_cmp(b);
            if ord != Ordering::Equal {
                return ord;
            }
        }
        self.0.len().cmp(&other.0.len())
    }
}

impl PartialOrd for RowKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for RowKey {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for RowKey {}

/// Row to group assignment. Groups are numbered in sorted key order.
#[derive(Debug, Clone, PartialEq)]
pub struct Grouping {
    ids: Vec<usize>,
    rows: Vec<Vec<usize>>,
    keys: Vec<RowKey>,
}

impl Grouping {
    pub fn new(frame: &Frame, names: &[String]) -> Result<Self, FrameError> {
        let mut by_key: BTreeMap<RowKey, Vec<usize>> = BTreeMap::new();
        for row in 0..frame.nrows() {
            by_key.entry(frame.row_key(names, row)?).or_default().push(row);
        }

        let mut ids = vec![0; frame.nrows()];
        let mut rows = Vec::with_capacity(by_key.len());
        let mut keys = Vec::with_capacity(by_key.len());
        for (g, (key, members)) in by_key.into_iter().enumerate() {
            for &r in &members {
                ids[r] = g;
            }
            rows.push(members);
            keys.push(key);
        }
        Ok(Self { ids, rows, keys })
    }

    pub fn n_groups(&self) -> usize {
        self.rows.len()
    }

    pub fn nrows(&self) -> usize {
        self.ids.len()
    }

    /// Group of each row.
    pub fn ids(&self) -> &[usize] {
        &self.ids
    }

    /// Rows of group `g`, in frame order.
    pub fn rows(&self, g: usize) -> &[usize] {
        &self.rows[g]
    }

    pub fn key(&self, g: usize) -> &RowKey {
        &self.keys[g]
    }
}

/// A frame with grouping columns.
#[derive(Debug, Clone, PartialEq)]
pub struct GroupedFrame {
    frame: Frame,
    group_names: Vec<String>,
    grouping: Arc<Grouping>,
}

impl GroupedFrame {
    pub fn new(frame: Frame, group_names: Vec<String>) -> Result<Self, FrameError> {
        let grouping = Arc::new(Grouping::new(&frame, &group_names)?);
        Ok(Self {
            frame,
            group_names,
            grouping,
        })
    }

    pub(crate) fn from_parts(frame: Frame, group_names: Vec<String>, grouping: Arc<Grouping>) -> Self {
        Self {
            frame,
            group_names,
            grouping,
        }
    }

    pub fn frame(&self) -> &Frame {
        &self.frame
    }

    pub fn group_names(&self) -> &[String] {
        &self.group_names
    }

    pub fn grouping(&self) -> &Arc<Grouping> {
        &self.grouping
    }

    pub fn n_groups(&self) -> usize {
        self.grouping.n_groups()
    }

    pub fn ungroup(self) -> Frame {
        self.frame
    }

    /// Same group columns over a new frame.
    pub fn regroup(&self, frame: Frame) -> Result<GroupedFrame, FrameError> {
        GroupedFrame::new(frame, self.group_names.clone())
    }

    /// Rows of group `g` as their own frame.
    pub fn group_frame(&self, g: usize) -> Frame {
        self.frame.take(self.grouping.rows(g))
    }
}

impl fmt::Display for GroupedFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "(grouped data frame, groups: {})", self.group_names.join(", "))?;
        write!(f, "{}", self.frame)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame() -> Frame {
        Frame::new([
            ("g", values(["b", "a", "b", "a"])),
            ("x", values([1, 2, 3, 4])),
        ])
        .unwrap()
    }

    #[test]
    fn test_new_rejects_ragged_columns() {
        let err = Frame::new([("a", values([1, 2])), ("b", values([1]))]).unwrap_err();
        assert!(matches!(err, FrameError::Length(_)));
        let err = Frame::new([("a", values([1])), ("a", values([1]))]).unwrap_err();
        assert!(matches!(err, FrameError::Unsupported(_)));
    }

    #[test]
    fn test_with_column_keeps_position() {
        let out = frame().with_column("g", values([0, 0, 0, 0])).unwrap();
        assert_eq!(out.column_names(), &["g", "x"]);
        assert_eq!(out.column("g").unwrap()[0], Value::Int(0));
        let out = frame().with_column("y", values([0, 0, 0, 0])).unwrap();
        assert_eq!(out.column_names(), &["g", "x", "y"]);
    }

    #[test]
    fn test_grouping_sorted_by_key() {
        let grouping = Grouping::new(&frame(), &["g".to_string()]).unwrap();
        assert_eq!(grouping.n_groups(), 2);
        assert_eq!(grouping.key(0).0, vec![Value::from("a")]);
        assert_eq!(grouping.rows(0), &[1, 3]);
        assert_eq!(grouping.ids(), &[1, 0, 1, 0]);
    }

    #[test]
    fn test_nulls_share_a_group() {
        let f = Frame::new([("g", vec![Value::Null, Value::Int(1), Value::Null])]).unwrap();
        let grouping = Grouping::new(&f, &["g".to_string()]).unwrap();
        assert_eq!(grouping.n_groups(), 2);
        assert_eq!(grouping.rows(1), &[0, 2]);
    }

    #[test]
    fn test_from_rows() {
        let f = Frame::from_rows(
            vec!["a".into(), "b".into()],
            vec![vec![Value::Int(1), Value::from("x")], vec![Value::Int(2), Value::Null]],
        )
        .unwrap();
        assert_eq!(f.nrows(), 2);
        assert_eq!(f.column("b").unwrap(), &[Value::from("x"), Value::Null]);
    }

    #[test]
    fn test_display() {
        let text = frame().head(1).to_string();
        assert!(text.starts_with("g x\n"));
        assert!(text.ends_with("[1 rows x 2 columns]"));
    }
}
