//! Values flowing through frame evaluation

use crate::frame::{Frame, GroupedFrame, Grouping};
use crate::FrameError;
use std::sync::Arc;
use tql_ir::Value;

#[derive(Debug, Clone)]
pub enum Datum {
    Frame(Arc<Frame>),
    Grouped(Arc<GroupedFrame>),
    Scalar(Value),
    Series(Vec<Value>),
    /// One value per row of a grouped frame.
    GroupedSeries { values: Vec<Value>, grouping: Arc<Grouping> },
    /// One value per group.
    GroupAgg { values: Vec<Value>, grouping: Arc<Grouping> },
    Dict(Vec<(Datum, Datum)>),
}

impl Datum {
    pub fn kind(&self) -> &'static str {
        match self {
            Datum::Frame(_) => "frame",
            Datum::Grouped(_) => "grouped frame",
            Datum::Scalar(_) => "scalar",
            Datum::Series(_) => "series",
            Datum::GroupedSeries { .. } => "grouped series",
            Datum::GroupAgg { .. } => "group aggregate",
            Datum::Dict(_) => "dict",
        }
    }

    pub fn as_scalar(&self) -> Option<&Value> {
        match self {
            Datum::Scalar(v) => Some(v),
            _ => None,
        }
    }

    /// Grouping this datum is bound to, searching dict entries.
    pub fn grouping(&self) -> Option<&Arc<Grouping>> {
        match self {
            Datum::Grouped(g) => Some(g.grouping()),
            Datum::GroupedSeries { grouping, .. } | Datum::GroupAgg { grouping, .. } => Some(grouping),
            Datum::Dict(entries) => entries.iter().find_map(|(k, v)| k.grouping().or_else(|| v.grouping())),
            _ => None,
        }
    }

    /// Row-level view for elementwise work: grouped values lose their
    /// grouping and per-group values are repeated for each row.
    pub fn flatten(self) -> Datum {
        match self {
            Datum::Grouped(g) => Datum::Frame(Arc::new(g.frame().clone())),
            Datum::GroupedSeries { values, .. } => Datum::Series(values),
            Datum::GroupAgg { values, grouping } => {
                Datum::Series(grouping.ids().iter().map(|&g| values[g].clone()).collect())
            }
            Datum::Dict(entries) => Datum::Dict(entries.into_iter().map(|(k, v)| (k.flatten(), v.flatten())).collect()),
            other => other,
        }
    }

    /// Slice of this datum belonging to group `g`.
    pub fn slice_group(&self, g: usize) -> Datum {
        match self {
            Datum::Grouped(frame) => Datum::Frame(Arc::new(frame.group_frame(g))),
            Datum::GroupedSeries { values, grouping } => {
                Datum::Series(grouping.rows(g).iter().map(|&r| values[r].clone()).collect())
            }
            Datum::GroupAgg { values, .. } => Datum::Scalar(values[g].clone()),
            Datum::Dict(entries) => {
                Datum::Dict(entries.iter().map(|(k, v)| (k.slice_group(g), v.slice_group(g))).collect())
            }
            other => other.clone(),
        }
    }

    /// Number of rows for row-shaped data.
    pub fn len(&self) -> Option<usize> {
        match self {
            Datum::Frame(f) => Some(f.nrows()),
            Datum::Grouped(g) => Some(g.frame().nrows()),
            Datum::Series(v) | Datum::GroupedSeries { values: v, .. } => Some(v.len()),
            Datum::GroupAgg { grouping, .. } => Some(grouping.nrows()),
            Datum::Scalar(_) | Datum::Dict(_) => None,
        }
    }

    /// Value at `row` of a series, or the scalar itself.
    pub fn value_at(&self, row: usize) -> Result<&Value, FrameError> {
        match self {
            Datum::Scalar(v) => Ok(v),
            Datum::Series(values) | Datum::GroupedSeries { values, .. } => values
                .get(row)
                .ok_or_else(|| FrameError::Length(format!("row {} out of {}", row, values.len()))),
            Datum::GroupAgg { values, grouping } => Ok(&values[grouping.ids()[row]]),
            other => Err(FrameError::Unsupported(format!("{} used as a column", other.kind()))),
        }
    }

    /// Column of `nrows` values: series as-is, scalars repeated.
    pub fn into_column(self, nrows: usize) -> Result<Vec<Value>, FrameError> {
        let values = match self.flatten() {
            Datum::Scalar(v) => vec![v; nrows],
            Datum::Series(values) => values,
            other => return Err(FrameError::Unsupported(format!("{} used as a column", other.kind()))),
        };
        if values.len() != nrows {
            return Err(FrameError::Length(format!("{} values for {} rows", values.len(), nrows)));
        }
        Ok(values)
    }

    /// Apply `f` row by row across `args`, broadcasting scalars and
    /// per-group values. The result keeps the grouping of the inputs.
    pub fn zip_map<F>(args: &[&Datum], f: F) -> Result<Datum, FrameError>
    where
        F: Fn(&[&Value]) -> Result<Value, FrameError>,
    {
        let grouping = args.iter().find_map(|d| d.grouping()).cloned();
        let all_agg = args
            .iter()
            .all(|d| matches!(d, Datum::GroupAgg { .. } | Datum::Scalar(_)));
        let any_agg = args.iter().any(|d| matches!(d, Datum::GroupAgg { .. }));

        // per-group values combine per group
        if all_agg && any_agg {
            let grouping = grouping.ok_or_else(|| FrameError::Unsupported("group aggregate without grouping".into()))?;
            let mut out = Vec::with_capacity(grouping.n_groups());
            for g in 0..grouping.n_groups() {
                let row = args
                    .iter()
                    .map(|d| match d {
                        Datum::GroupAgg { values, .. } => Ok(&values[g]),
                        other => other.value_at(0),
                    })
                    .collect::<Result<Vec<_>, _>>()?;
                out.push(f(&row)?);
            }
            return Ok(Datum::GroupAgg { values: out, grouping });
        }

        if grouping.is_some() && args.iter().any(|d| matches!(d, Datum::Series(_))) {
            return Err(FrameError::Unsupported("mixing grouped and ungrouped series".into()));
        }

        let mut len: Option<usize> = None;
        for d in args {
            if let Some(n) = d.len() {
                if matches!(d, Datum::Frame(_) | Datum::Grouped(_) | Datum::Dict(_)) {
                    return Err(FrameError::Unsupported(format!("{} used as a column", d.kind())));
                }
                match len {
                    Some(m) if m != n => return Err(FrameError::Length(format!("series of length {} and {}", m, n))),
                    _ => len = Some(n),
                }
            }
        }

        let Some(len) = len else {
            let row: Vec<&Value> = args
                .iter()
                .map(|d| d.as_scalar().ok_or_else(|| FrameError::Unsupported(format!("{} used as a value", d.kind()))))
                .collect::<Result<_, _>>()?;
            return f(&row).map(Datum::Scalar);
        };

        let mut out = Vec::with_capacity(len);
        for i in 0..len {
            let row = args.iter().map(|d| d.value_at(i)).collect::<Result<Vec<_>, _>>()?;
            out.push(f(&row)?);
        }
        Ok(match grouping {
            Some(grouping) => Datum::GroupedSeries { values: out, grouping },
            None => Datum::Series(out),
        })
    }

    pub fn map<F>(&self, f: F) -> Result<Datum, FrameError>
    where
        F: Fn(&Value) -> Result<Value, FrameError>,
    {
        Datum::zip_map(&[self], |row| f(row[0]))
    }
}

impl From<Value> for Datum {
    fn from(v: Value) -> Self {
        Datum::Scalar(v)
    }
}

impl From<Vec<Value>> for Datum {
    fn from(v: Vec<Value>) -> Self {
        Datum::Series(v)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::values;

    fn grouped() -> GroupedFrame {
        let frame = Frame::new([("g", values(["a", "b", "a"])), ("x", values([1, 2, 3]))]).unwrap();
        GroupedFrame::new(frame, vec!["g".into()]).unwrap()
    }

    #[test]
    fn test_series_scalar_broadcast() {
        let out = Datum::zip_map(&[&Datum::Series(values([1, 2])), &Datum::Scalar(Value::Int(10))], |r| {
            Ok(Value::Int(r[0].as_i64().unwrap_or(0) + r[1].as_i64().unwrap_or(0)))
        })
        .unwrap();
        match out {
            Datum::Series(v) => assert_eq!(v, values([11, 12])),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_length_mismatch() {
        let err = Datum::zip_map(&[&Datum::Series(values([1, 2])), &Datum::Series(values([1]))], |r| Ok(r[0].clone()));
        assert!(matches!(err, Err(FrameError::Length(_))));
    }

    #[test]
    fn test_group_agg_broadcasts_over_rows() {
        let g = grouped();
        let grouping = g.grouping().clone();
        let agg = Datum::GroupAgg {
            values: values([100, 200]),
            grouping: grouping.clone(),
        };
        let rows = Datum::GroupedSeries {
            values: values([1, 2, 3]),
            grouping,
        };
        let out = Datum::zip_map(&[&rows, &agg], |r| {
            Ok(Value::Int(r[0].as_i64().unwrap_or(0) + r[1].as_i64().unwrap_or(0)))
        })
        .unwrap();
        match out {
            Datum::GroupedSeries { values: v, .. } => assert_eq!(v, values([101, 202, 103])),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_slice_group() {
        let g = grouped();
        let d = Datum::GroupedSeries {
            values: values([1, 2, 3]),
            grouping: g.grouping().clone(),
        };
        match d.slice_group(0) {
            Datum::Series(v) => assert_eq!(v, values([1, 3])),
            other => panic!("unexpected {:?}", other),
        }
    }
}
