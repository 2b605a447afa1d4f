//! Function tables of the in-memory engine
//!
//! Every function is written once over ungrouped series. [`FrameFunction::apply`]
//! lifts it to grouped data according to its kind: elementwise functions run
//! on the underlying values, aggregates run once per group and window
//! functions run per group with their results scattered back to row order.

use crate::datum::Datum;
use crate::FrameError;
use chrono::{Datelike, Duration, NaiveDate, NaiveDateTime, Timelike};
use std::any::Any;
use std::collections::BTreeSet;
use std::fmt;
use std::sync::{Arc, OnceLock};
use tql_ir::{binary_value, round_half_even, BinaryOperator, EvalError, FuncRef, Function, Value};
use tql_registry::{Dispatch, FuncKind, KindRegistry, KindTables, RegistryError, TypeHierarchy};

pub type FrameImp = dyn Fn(&[Datum], &[(String, Datum)]) -> Result<Datum, FrameError> + Send + Sync;

/// Type tag of in-memory columns.
pub const SERIES: &str = "Series";

#[derive(Clone)]
pub struct FrameFunction {
    name: String,
    kind: FuncKind,
    imp: Arc<FrameImp>,
}

impl FrameFunction {
    pub fn new<F>(name: &str, kind: FuncKind, imp: F) -> Self
    where
        F: Fn(&[Datum], &[(String, Datum)]) -> Result<Datum, FrameError> + Send + Sync + 'static,
    {
        Self {
            name: name.to_string(),
            kind,
            imp: Arc::new(imp),
        }
    }

    pub fn kind(&self) -> FuncKind {
        self.kind
    }

    /// Call on grouped or ungrouped arguments.
    pub fn apply(&self, args: Vec<Datum>, kwargs: Vec<(String, Datum)>) -> Result<Datum, FrameError> {
        let grouping = args
            .iter()
            .chain(kwargs.iter().map(|(_, v)| v))
            .find_map(Datum::grouping)
            .cloned();
        let Some(grouping) = grouping else {
            return (self.imp)(&args, &kwargs);
        };

        match self.kind {
            FuncKind::Elementwise => {
                let per_group = args
                    .iter()
                    .chain(kwargs.iter().map(|(_, v)| v))
                    .all(|d| matches!(d, Datum::GroupAgg { .. } | Datum::Scalar(_)));
                if per_group {
                    let unwrap = |d: Datum| match d {
                        Datum::GroupAgg { values, .. } => Datum::Series(values),
                        other => other,
                    };
                    let args: Vec<Datum> = args.into_iter().map(unwrap).collect();
                    let kwargs: Vec<(String, Datum)> = kwargs.into_iter().map(|(k, v)| (k, unwrap(v))).collect();
                    return Ok(match (self.imp)(&args, &kwargs)? {
                        Datum::Series(values) => Datum::GroupAgg { values, grouping },
                        other => other,
                    });
                }
                let args: Vec<Datum> = args.into_iter().map(Datum::flatten).collect();
                let kwargs: Vec<(String, Datum)> = kwargs.into_iter().map(|(k, v)| (k, v.flatten())).collect();
                Ok(match (self.imp)(&args, &kwargs)? {
                    Datum::Series(values) => Datum::GroupedSeries { values, grouping },
                    other => other,
                })
            }

            FuncKind::Aggregate => {
                let mut out = Vec::with_capacity(grouping.n_groups());
                for g in 0..grouping.n_groups() {
                    let (a, k) = slice_args(&args, &kwargs, g);
                    out.push(match (self.imp)(&a, &k)? {
                        Datum::Scalar(v) => v,
                        Datum::Series(mut v) if v.len() == 1 => v.remove(0),
                        other => {
                            return Err(FrameError::Unsupported(format!(
                                "{} returned a {} for one group",
                                self.name,
                                other.kind()
                            )))
                        }
                    });
                }
                Ok(Datum::GroupAgg { values: out, grouping })
            }

            FuncKind::Window => {
                let mut out = vec![Value::Null; grouping.nrows()];
                for g in 0..grouping.n_groups() {
                    let (a, k) = slice_args(&args, &kwargs, g);
                    let rows = grouping.rows(g);
                    let column = (self.imp)(&a, &k)?.into_column(rows.len())?;
                    for (&r, v) in rows.iter().zip(column) {
                        out[r] = v;
                    }
                }
                Ok(Datum::GroupedSeries { values: out, grouping })
            }
        }
    }
}

fn slice_args(args: &[Datum], kwargs: &[(String, Datum)], g: usize) -> (Vec<Datum>, Vec<(String, Datum)>) {
    (
        args.iter().map(|d| d.slice_group(g)).collect(),
        kwargs.iter().map(|(k, v)| (k.clone(), v.slice_group(g))).collect(),
    )
}

impl fmt::Debug for FrameFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FrameFunction({}, {})", self.name, self.kind)
    }
}

impl Function for FrameFunction {
    fn name(&self) -> &str {
        &self.name
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

static FRAME_FUNCS: OnceLock<Result<KindTables, RegistryError>> = OnceLock::new();

/// Compiled function tables of the in-memory engine.
pub fn frame_funcs() -> Result<&'static KindTables, FrameError> {
    FRAME_FUNCS
        .get_or_init(|| build_registry()?.compile("frame", SERIES, SERIES))
        .as_ref()
        .map_err(|e| FrameError::Registry(e.clone()))
}

fn build_registry() -> Result<KindRegistry, RegistryError> {
    let mut types = TypeHierarchy::new();
    types.add(SERIES, &[])?;
    let mut registry = KindRegistry::new("frame", types);

    for (name, f) in elementwise() {
        register(&mut registry, FuncKind::Elementwise, FrameFunction::new(name, FuncKind::Elementwise, f))?;
    }
    for op in BinaryOperator::ALL {
        let name = op.method_name().trim_matches('_');
        register(&mut registry, FuncKind::Elementwise, operator_method(name, op, false))?;
        register(&mut registry, FuncKind::Elementwise, operator_method(&format!("r{}", name), op, true))?;
    }
    register(&mut registry, FuncKind::Elementwise, operator_method("div", BinaryOperator::TrueDiv, false))?;
    register(&mut registry, FuncKind::Elementwise, operator_method("rdiv", BinaryOperator::TrueDiv, true))?;
    // aggregates double as window functions, broadcast over their partition
    for (name, f) in aggregates() {
        let f = FrameFunction::new(name, FuncKind::Aggregate, f);
        register(&mut registry, FuncKind::Aggregate, f.clone())?;
        register(&mut registry, FuncKind::Window, f)?;
    }
    for (name, f) in windows() {
        register(&mut registry, FuncKind::Window, FrameFunction::new(name, FuncKind::Window, f))?;
    }
    Ok(registry)
}

fn register(registry: &mut KindRegistry, kind: FuncKind, f: FrameFunction) -> Result<(), RegistryError> {
    let name = f.name.clone();
    registry.insert(kind, &name, SERIES, Dispatch::Implemented(FuncRef::new(Arc::new(f))))
}

type Imp = Box<dyn Fn(&[Datum], &[(String, Datum)]) -> Result<Datum, FrameError> + Send + Sync>;

fn imp<F>(f: F) -> Imp
where
    F: Fn(&[Datum], &[(String, Datum)]) -> Result<Datum, FrameError> + Send + Sync + 'static,
{
    Box::new(f)
}

fn operator_method(name: &str, op: BinaryOperator, reflected: bool) -> FrameFunction {
    FrameFunction::new(name, FuncKind::Elementwise, move |args, _| {
        let x = arg(args, 0, "operator")?;
        let y = arg(args, 1, "operator")?;
        Datum::zip_map(&[x, y], |row| {
            let (l, r) = if reflected { (row[1], row[0]) } else { (row[0], row[1]) };
            Ok(binary_value(op, l, r)?)
        })
    })
}

// ---- argument helpers ----

fn arg<'a>(args: &'a [Datum], pos: usize, fname: &str) -> Result<&'a Datum, FrameError> {
    args.get(pos)
        .ok_or_else(|| FrameError::Unsupported(format!("{}() missing argument {}", fname, pos + 1)))
}

fn param<'a>(args: &'a [Datum], kwargs: &'a [(String, Datum)], pos: usize, name: &str) -> Option<&'a Datum> {
    args.get(pos)
        .or_else(|| kwargs.iter().find(|(k, _)| k == name).map(|(_, v)| v))
}

/// Literal parameter, positional or by keyword.
fn literal(args: &[Datum], kwargs: &[(String, Datum)], pos: usize, name: &str, fname: &str) -> Result<Option<Value>, FrameError> {
    match param(args, kwargs, pos, name) {
        None => Ok(None),
        Some(Datum::Scalar(v)) => Ok(Some(v.clone())),
        Some(other) => Err(FrameError::Unsupported(format!(
            "{}(): {} must be a literal, got a {}",
            fname,
            name,
            other.kind()
        ))),
    }
}

fn type_error(msg: String) -> FrameError {
    FrameError::Eval(EvalError::Type(msg))
}

/// Values of a series argument; a scalar counts as one row and a frame as
/// its row count of nulls.
fn column_values(d: &Datum, fname: &str) -> Result<Vec<Value>, FrameError> {
    match d {
        Datum::Series(v) => Ok(v.clone()),
        Datum::Scalar(v) => Ok(vec![v.clone()]),
        Datum::Frame(f) => Ok(vec![Value::Null; f.nrows()]),
        other => Err(FrameError::Unsupported(format!("{}() on a {}", fname, other.kind()))),
    }
}

fn str_map<F>(d: &Datum, fname: &'static str, f: F) -> Result<Datum, FrameError>
where
    F: Fn(&str) -> Value,
{
    d.map(|v| match v {
        v if v.is_null() => Ok(Value::Null),
        Value::Str(s) => Ok(f(s)),
        other => Err(type_error(format!("{}() expects strings, got {}", fname, other.type_name()))),
    })
}

fn str_param(args: &[Datum], kwargs: &[(String, Datum)], pos: usize, name: &str, fname: &str) -> Result<String, FrameError> {
    match literal(args, kwargs, pos, name, fname)? {
        Some(Value::Str(s)) => Ok(s),
        Some(other) => Err(type_error(format!("{}(): {} must be a string, got {}", fname, name, other.type_name()))),
        None => Err(FrameError::Unsupported(format!("{}() missing argument {}", fname, name))),
    }
}

fn date_of(v: &Value) -> Option<NaiveDate> {
    match v {
        Value::Date(d) => Some(*d),
        Value::Timestamp(t) => Some(t.date()),
        _ => None,
    }
}

fn timestamp_of(v: &Value) -> Option<NaiveDateTime> {
    match v {
        Value::Date(d) => d.and_hms_opt(0, 0, 0),
        Value::Timestamp(t) => Some(*t),
        _ => None,
    }
}

fn dt_map<F>(d: &Datum, fname: &'static str, f: F) -> Result<Datum, FrameError>
where
    F: Fn(NaiveDateTime) -> Value,
{
    d.map(|v| {
        if v.is_null() {
            return Ok(Value::Null);
        }
        timestamp_of(v)
            .map(&f)
            .ok_or_else(|| type_error(format!("{}() expects dates, got {}", fname, v.type_name())))
    })
}

fn days_in_month(d: NaiveDate) -> u32 {
    let (y, m) = if d.month() == 12 { (d.year() + 1, 1) } else { (d.year(), d.month() + 1) };
    NaiveDate::from_ymd_opt(y, m, 1)
        .and_then(|next| next.pred_opt())
        .map_or(31, |last| last.day())
}

fn quarter(d: NaiveDate) -> u32 {
    (d.month() - 1) / 3 + 1
}

fn floor_date(v: &Value, unit: &str) -> Result<Value, FrameError> {
    if v.is_null() {
        return Ok(Value::Null);
    }
    let t = timestamp_of(v).ok_or_else(|| type_error(format!("floor_date() expects dates, got {}", v.type_name())))?;
    let d = t.date();
    let day = match unit {
        "day" | "hour" | "minute" | "second" => d,
        "week" => d - Duration::days(d.weekday().num_days_from_monday() as i64),
        "month" => d.with_day(1).unwrap_or(d),
        "quarter" => NaiveDate::from_ymd_opt(d.year(), (quarter(d) - 1) * 3 + 1, 1).unwrap_or(d),
        "year" => NaiveDate::from_ymd_opt(d.year(), 1, 1).unwrap_or(d),
        other => return Err(FrameError::Unsupported(format!("floor_date() unit {}", other))),
    };
    let (h, m, s) = match unit {
        "hour" => (t.hour(), 0, 0),
        "minute" => (t.hour(), t.minute(), 0),
        "second" => (t.hour(), t.minute(), t.second()),
        _ => (0, 0, 0),
    };
    Ok(match v {
        Value::Date(_) => Value::Date(day),
        _ => day.and_hms_opt(h, m, s).map_or(Value::Null, Value::Timestamp),
    })
}

fn numeric(values: &[Value], fname: &str) -> Result<Vec<f64>, FrameError> {
    values
        .iter()
        .filter(|v| !v.is_null())
        .map(|v| {
            v.as_f64()
                .ok_or_else(|| type_error(format!("{}() expects numbers, got {}", fname, v.type_name())))
        })
        .collect()
}

fn quantile(values: &[Value], q: f64, fname: &str) -> Result<Value, FrameError> {
    if !(0.0..=1.0).contains(&q) {
        return Err(FrameError::Unsupported(format!("{}(): quantile {} outside [0, 1]", fname, q)));
    }
    let mut xs = numeric(values, fname)?;
    if xs.is_empty() {
        return Ok(Value::Null);
    }
    xs.sort_by(|a, b| a.total_cmp(b));
    let pos = q * (xs.len() - 1) as f64;
    let (lo, hi) = (pos.floor() as usize, pos.ceil() as usize);
    Ok(Value::Float(xs[lo] + (xs[hi] - xs[lo]) * (pos - lo as f64)))
}

fn variance(values: &[Value], fname: &str) -> Result<Option<f64>, FrameError> {
    let xs = numeric(values, fname)?;
    if xs.len() < 2 {
        return Ok(None);
    }
    let mean = xs.iter().sum::<f64>() / xs.len() as f64;
    Ok(Some(xs.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / (xs.len() - 1) as f64))
}

fn sum_values<'a>(values: impl Iterator<Item = &'a Value>, fname: &str) -> Result<Value, FrameError> {
    let mut int_total: i64 = 0;
    let mut float_total: Option<f64> = None;
    for v in values.filter(|v| !v.is_null()) {
        match v {
            Value::Int(_) | Value::Bool(_) if float_total.is_none() => {
                let i = v.as_i64().unwrap_or(0);
                int_total = int_total
                    .checked_add(i)
                    .ok_or_else(|| type_error(format!("integer overflow in {}()", fname)))?;
            }
            other => {
                let x = other
                    .as_f64()
                    .ok_or_else(|| type_error(format!("{}() expects numbers, got {}", fname, other.type_name())))?;
                float_total = Some(float_total.unwrap_or(int_total as f64) + x);
            }
        }
    }
    Ok(float_total.map_or(Value::Int(int_total), Value::Float))
}

fn extreme(values: &[Value], want: std::cmp::Ordering) -> Value {
    values
        .iter()
        .filter(|v| !v.is_null())
        .fold(None::<&Value>, |best, v| match best {
            Some(b) if v.total_cmp(b) != want => Some(b),
            _ => Some(v),
        })
        .cloned()
        .unwrap_or(Value::Null)
}

fn distinct_count(values: &[Value]) -> usize {
    let mut seen: Vec<&Value> = Vec::new();
    for v in values.iter().filter(|v| !v.is_null()) {
        if !seen.iter().any(|s| s.key_eq(v)) {
            seen.push(v);
        }
    }
    seen.len()
}

fn nth_value(values: &[Value], n: i64) -> Value {
    let idx = if n < 0 { values.len() as i64 + n } else { n };
    if idx < 0 {
        return Value::Null;
    }
    values.get(idx as usize).cloned().unwrap_or(Value::Null)
}

fn cast(v: &Value, dtype: &str) -> Result<Value, FrameError> {
    if v.is_null() {
        return Ok(Value::Null);
    }
    let fail = || type_error(format!("cannot cast {} {} to {}", v.type_name(), v, dtype));
    Ok(match dtype {
        "int" | "int64" | "int32" => match v {
            Value::Float(f) => Value::Int(f.trunc() as i64),
            Value::Str(s) => Value::Int(s.trim().parse().map_err(|_| fail())?),
            other => Value::Int(other.as_i64().ok_or_else(fail)?),
        },
        "float" | "float64" | "float32" => match v {
            Value::Str(s) => Value::Float(s.trim().parse().map_err(|_| fail())?),
            other => Value::Float(other.as_f64().ok_or_else(fail)?),
        },
        "str" | "string" | "object" => match v {
            Value::Str(s) => Value::Str(s.clone()),
            Value::Bool(b) => Value::Str(if *b { "True" } else { "False" }.to_string()),
            Value::Date(d) => Value::Str(d.format("%Y-%m-%d").to_string()),
            Value::Timestamp(t) => Value::Str(t.format("%Y-%m-%d %H:%M:%S").to_string()),
            other => Value::Str(other.to_string()),
        },
        "bool" => Value::Bool(v.truthy()),
        other => return Err(FrameError::Unsupported(format!("astype({})", other))),
    })
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) => c.to_uppercase().chain(chars.flat_map(char::to_lowercase)).collect(),
        None => String::new(),
    }
}

fn title(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut start = true;
    for c in s.chars() {
        if c.is_alphabetic() {
            if start {
                out.extend(c.to_uppercase());
            } else {
                out.extend(c.to_lowercase());
            }
            start = false;
        } else {
            out.push(c);
            start = true;
        }
    }
    out
}

fn strip_with(s: &str, chars: &Option<String>, left: bool, right: bool) -> String {
    let matches = |c: char| match chars {
        Some(set) => set.contains(c),
        None => c.is_whitespace(),
    };
    let mut out = s;
    if left {
        out = out.trim_start_matches(matches);
    }
    if right {
        out = out.trim_end_matches(matches);
    }
    out.to_string()
}

fn strip(name: &'static str, left: bool, right: bool) -> (&'static str, Imp) {
    (
        name,
        imp(move |args, kwargs| {
            let chars = match literal(args, kwargs, 1, "to_strip", name)? {
                Some(Value::Str(s)) => Some(s),
                _ => None,
            };
            str_map(arg(args, 0, name)?, name, |s| Value::Str(strip_with(s, &chars, left, right)))
        }),
    )
}

fn dt_prop(name: &'static str, f: fn(NaiveDateTime) -> Value) -> (&'static str, Imp) {
    (name, imp(move |args, _| dt_map(arg(args, 0, name)?, name, f)))
}

fn int(x: u32) -> Value {
    Value::Int(x as i64)
}

fn elementwise() -> Vec<(&'static str, Imp)> {
    vec![
        (
            "abs",
            imp(|args, _| {
                arg(args, 0, "abs")?.map(|v| match v {
                    Value::Int(i) => Ok(Value::Int(i.abs())),
                    Value::Float(f) => Ok(Value::Float(f.abs())),
                    v if v.is_null() => Ok(Value::Null),
                    other => Err(type_error(format!("abs() of {}", other.type_name()))),
                })
            }),
        ),
        (
            "round",
            imp(|args, kwargs| {
                let digits = literal(args, kwargs, 1, "decimals", "round")?
                    .and_then(|v| v.as_i64())
                    .unwrap_or(0);
                let scale = 10f64.powi(digits as i32);
                arg(args, 0, "round")?.map(|v| match v {
                    Value::Int(i) => Ok(Value::Int(*i)),
                    Value::Float(f) if !f.is_nan() => Ok(Value::Float(round_half_even(f * scale) / scale)),
                    v if v.is_null() => Ok(Value::Null),
                    other => Err(type_error(format!("round() of {}", other.type_name()))),
                })
            }),
        ),
        ("isna", imp(|args, _| arg(args, 0, "isna")?.map(|v| Ok(Value::Bool(v.is_null()))))),
        ("isnull", imp(|args, _| arg(args, 0, "isnull")?.map(|v| Ok(Value::Bool(v.is_null()))))),
        ("notna", imp(|args, _| arg(args, 0, "notna")?.map(|v| Ok(Value::Bool(!v.is_null()))))),
        ("notnull", imp(|args, _| arg(args, 0, "notnull")?.map(|v| Ok(Value::Bool(!v.is_null()))))),
        (
            "fillna",
            imp(|args, kwargs| {
                let x = arg(args, 0, "fillna")?;
                let fill = param(args, kwargs, 1, "value")
                    .ok_or_else(|| FrameError::Unsupported("fillna() missing value".into()))?;
                Datum::zip_map(&[x, fill], |r| Ok(if r[0].is_null() { r[1].clone() } else { r[0].clone() }))
            }),
        ),
        (
            "isin",
            imp(|args, kwargs| {
                let options = match literal(args, kwargs, 1, "values", "isin")? {
                    Some(Value::List(items)) => items,
                    Some(other) => vec![other],
                    None => Vec::new(),
                };
                arg(args, 0, "isin")?.map(|v| Ok(Value::Bool(!v.is_null() && options.iter().any(|o| o.key_eq(v)))))
            }),
        ),
        (
            "between",
            imp(|args, kwargs| {
                let x = arg(args, 0, "between")?;
                let lo = param(args, kwargs, 1, "left").ok_or_else(|| FrameError::Unsupported("between() missing left".into()))?;
                let hi = param(args, kwargs, 2, "right").ok_or_else(|| FrameError::Unsupported("between() missing right".into()))?;
                Datum::zip_map(&[x, lo, hi], |r| {
                    if r.iter().any(|v| v.is_null()) {
                        return Ok(Value::Null);
                    }
                    let ge = binary_value(BinaryOperator::Ge, r[0], r[1])?;
                    let le = binary_value(BinaryOperator::Le, r[0], r[2])?;
                    Ok(Value::Bool(ge.truthy() && le.truthy()))
                })
            }),
        ),
        (
            "clip",
            imp(|args, kwargs| {
                let x = arg(args, 0, "clip")?;
                let null = Datum::Scalar(Value::Null);
                let lower = param(args, kwargs, 1, "lower").unwrap_or(&null);
                let upper = param(args, kwargs, 2, "upper").unwrap_or(&null);
                Datum::zip_map(&[x, lower, upper], |r| {
                    let mut v = r[0].clone();
                    if v.is_null() {
                        return Ok(v);
                    }
                    if !r[1].is_null() && v.total_cmp(r[1]) == std::cmp::Ordering::Less {
                        v = r[1].clone();
                    }
                    if !r[2].is_null() && v.total_cmp(r[2]) == std::cmp::Ordering::Greater {
                        v = r[2].clone();
                    }
                    Ok(v)
                })
            }),
        ),
        (
            "astype",
            imp(|args, kwargs| {
                let dtype = str_param(args, kwargs, 1, "dtype", "astype")?;
                arg(args, 0, "astype")?.map(|v| cast(v, &dtype))
            }),
        ),
        (
            "coalesce",
            imp(|args, _| {
                let refs: Vec<&Datum> = args.iter().collect();
                Datum::zip_map(&refs, |r| Ok(r.iter().find(|v| !v.is_null()).map_or(Value::Null, |v| (*v).clone())))
            }),
        ),
        (
            "if_else",
            imp(|args, _| {
                let refs = [arg(args, 0, "if_else")?, arg(args, 1, "if_else")?, arg(args, 2, "if_else")?];
                Datum::zip_map(&refs, |r| {
                    Ok(match r[0] {
                        c if c.is_null() => Value::Null,
                        c if c.truthy() => r[1].clone(),
                        _ => r[2].clone(),
                    })
                })
            }),
        ),
        (
            "case_when",
            imp(|args, _| {
                let Datum::Dict(cases) = arg(args, 1, "case_when")? else {
                    return Err(FrameError::Unsupported("case_when() expects a dict of cases".into()));
                };
                let refs: Vec<&Datum> = cases.iter().flat_map(|(c, v)| [c, v]).collect();
                Datum::zip_map(&refs, |r| {
                    Ok(r.chunks(2)
                        .find(|pair| pair[0].truthy())
                        .map_or(Value::Null, |pair| pair[1].clone()))
                })
            }),
        ),
        (
            "na_if",
            imp(|args, _| {
                let refs = [arg(args, 0, "na_if")?, arg(args, 1, "na_if")?];
                Datum::zip_map(&refs, |r| Ok(if r[0].key_eq(r[1]) { Value::Null } else { r[0].clone() }))
            }),
        ),
        (
            "desc",
            imp(|args, _| {
                arg(args, 0, "desc")?.map(|v| Ok(tql_ir::unary_value(tql_ir::UnaryOperator::Neg, v)?))
            }),
        ),
        (
            "floor_date",
            imp(|args, kwargs| {
                let unit = str_param(args, kwargs, 1, "unit", "floor_date")?;
                arg(args, 0, "floor_date")?.map(|v| floor_date(v, &unit))
            }),
        ),
        // strings
        (
            "str.len",
            imp(|args, _| str_map(arg(args, 0, "str.len")?, "str.len", |s| Value::Int(s.chars().count() as i64))),
        ),
        (
            "str.lower",
            imp(|args, _| str_map(arg(args, 0, "str.lower")?, "str.lower", |s| Value::Str(s.to_lowercase()))),
        ),
        (
            "str.upper",
            imp(|args, _| str_map(arg(args, 0, "str.upper")?, "str.upper", |s| Value::Str(s.to_uppercase()))),
        ),
        strip("str.strip", true, true),
        strip("str.lstrip", true, false),
        strip("str.rstrip", false, true),
        (
            "str.startswith",
            imp(|args, kwargs| {
                let pat = str_param(args, kwargs, 1, "pat", "str.startswith")?;
                str_map(arg(args, 0, "str.startswith")?, "str.startswith", |s| Value::Bool(s.starts_with(pat.as_str())))
            }),
        ),
        (
            "str.endswith",
            imp(|args, kwargs| {
                let pat = str_param(args, kwargs, 1, "pat", "str.endswith")?;
                str_map(arg(args, 0, "str.endswith")?, "str.endswith", |s| Value::Bool(s.ends_with(pat.as_str())))
            }),
        ),
        (
            "str.contains",
            imp(|args, kwargs| {
                let pat = str_param(args, kwargs, 1, "pat", "str.contains")?;
                str_map(arg(args, 0, "str.contains")?, "str.contains", |s| Value::Bool(s.contains(pat.as_str())))
            }),
        ),
        (
            "str.replace",
            imp(|args, kwargs| {
                let pat = str_param(args, kwargs, 1, "pat", "str.replace")?;
                let repl = str_param(args, kwargs, 2, "repl", "str.replace")?;
                str_map(arg(args, 0, "str.replace")?, "str.replace", |s| Value::Str(s.replace(pat.as_str(), &repl)))
            }),
        ),
        (
            "str.capitalize",
            imp(|args, _| str_map(arg(args, 0, "str.capitalize")?, "str.capitalize", |s| Value::Str(capitalize(s)))),
        ),
        (
            "str.title",
            imp(|args, _| str_map(arg(args, 0, "str.title")?, "str.title", |s| Value::Str(title(s)))),
        ),
        (
            "str.islower",
            imp(|args, _| {
                str_map(arg(args, 0, "str.islower")?, "str.islower", |s| {
                    Value::Bool(s.chars().any(char::is_alphabetic) && !s.chars().any(char::is_uppercase))
                })
            }),
        ),
        (
            "str.isupper",
            imp(|args, _| {
                str_map(arg(args, 0, "str.isupper")?, "str.isupper", |s| {
                    Value::Bool(s.chars().any(char::is_alphabetic) && !s.chars().any(char::is_lowercase))
                })
            }),
        ),
        // datetimes
        dt_prop("dt.year", |t| Value::Int(t.year() as i64)),
        dt_prop("dt.month", |t| int(t.month())),
        dt_prop("dt.day", |t| int(t.day())),
        dt_prop("dt.hour", |t| int(t.hour())),
        dt_prop("dt.minute", |t| int(t.minute())),
        dt_prop("dt.second", |t| int(t.second())),
        dt_prop("dt.quarter", |t| int(quarter(t.date()))),
        dt_prop("dt.week", |t| int(t.iso_week().week())),
        dt_prop("dt.weekofyear", |t| int(t.iso_week().week())),
        dt_prop("dt.dayofweek", |t| int(t.weekday().num_days_from_monday())),
        dt_prop("dt.weekday", |t| int(t.weekday().num_days_from_monday())),
        dt_prop("dt.dayofyear", |t| int(t.ordinal())),
        dt_prop("dt.days_in_month", |t| int(days_in_month(t.date()))),
        dt_prop("dt.daysinmonth", |t| int(days_in_month(t.date()))),
        dt_prop("dt.is_month_start", |t| Value::Bool(t.day() == 1)),
        dt_prop("dt.is_month_end", |t| Value::Bool(t.day() == days_in_month(t.date()))),
        dt_prop("dt.is_quarter_start", |t| Value::Bool(t.day() == 1 && (t.month() - 1) % 3 == 0)),
        dt_prop("dt.is_quarter_end", |t| {
            Value::Bool(t.month() % 3 == 0 && t.day() == days_in_month(t.date()))
        }),
        dt_prop("dt.is_year_start", |t| Value::Bool(t.month() == 1 && t.day() == 1)),
        dt_prop("dt.is_year_end", |t| Value::Bool(t.month() == 12 && t.day() == 31)),
    ]
}

fn aggregate(name: &'static str, f: fn(&[Value], &[Datum], &[(String, Datum)]) -> Result<Value, FrameError>) -> (&'static str, Imp) {
    (
        name,
        imp(move |args, kwargs| {
            let values = column_values(arg(args, 0, name)?, name)?;
            f(&values, args, kwargs).map(Datum::Scalar)
        }),
    )
}

fn aggregates() -> Vec<(&'static str, Imp)> {
    vec![
        aggregate("count", |v, _, _| Ok(Value::Int(v.iter().filter(|x| !x.is_null()).count() as i64))),
        aggregate("size", |v, _, _| Ok(Value::Int(v.len() as i64))),
        aggregate("n", |v, _, _| Ok(Value::Int(v.len() as i64))),
        aggregate("nunique", |v, _, _| Ok(Value::Int(distinct_count(v) as i64))),
        aggregate("n_distinct", |v, _, _| Ok(Value::Int(distinct_count(v) as i64))),
        aggregate("sum", |v, _, _| sum_values(v.iter(), "sum")),
        aggregate("mean", |v, _, _| {
            let xs = numeric(v, "mean")?;
            Ok(if xs.is_empty() {
                Value::Null
            } else {
                Value::Float(xs.iter().sum::<f64>() / xs.len() as f64)
            })
        }),
        aggregate("median", |v, _, _| quantile(v, 0.5, "median")),
        aggregate("quantile", |v, args, kwargs| {
            let q = literal(args, kwargs, 1, "q", "quantile")?
                .and_then(|q| q.as_f64())
                .unwrap_or(0.5);
            quantile(v, q, "quantile")
        }),
        aggregate("var", |v, _, _| Ok(variance(v, "var")?.map_or(Value::Null, Value::Float))),
        aggregate("std", |v, _, _| Ok(variance(v, "std")?.map_or(Value::Null, |x| Value::Float(x.sqrt())))),
        aggregate("min", |v, _, _| Ok(extreme(v, std::cmp::Ordering::Less))),
        aggregate("max", |v, _, _| Ok(extreme(v, std::cmp::Ordering::Greater))),
        aggregate("any", |v, _, _| Ok(Value::Bool(v.iter().any(|x| !x.is_null() && x.truthy())))),
        aggregate("all", |v, _, _| Ok(Value::Bool(v.iter().filter(|x| !x.is_null()).all(Value::truthy)))),
        aggregate("first", |v, _, _| Ok(nth_value(v, 0))),
        aggregate("last", |v, _, _| Ok(nth_value(v, -1))),
        aggregate("nth", |v, args, kwargs| {
            let n = literal(args, kwargs, 1, "n", "nth")?
                .and_then(|n| n.as_i64())
                .ok_or_else(|| FrameError::Unsupported("nth() needs an integer position".into()))?;
            Ok(nth_value(v, n))
        }),
    ]
}

fn window(name: &'static str, f: fn(&[Value], &[Datum], &[(String, Datum)]) -> Result<Vec<Value>, FrameError>) -> (&'static str, Imp) {
    (
        name,
        imp(move |args, kwargs| {
            let values = column_values(arg(args, 0, name)?, name)?;
            f(&values, args, kwargs).map(Datum::Series)
        }),
    )
}

fn running(values: &[Value], f: impl Fn(&Value, &Value) -> Result<Value, FrameError>) -> Result<Vec<Value>, FrameError> {
    let mut acc: Option<Value> = None;
    values
        .iter()
        .map(|v| {
            if v.is_null() {
                return Ok(Value::Null);
            }
            let next = match &acc {
                Some(a) => f(a, v)?,
                None => v.clone(),
            };
            acc = Some(next.clone());
            Ok(next)
        })
        .collect()
}

/// 1-based positions of each value in sorted order; ties resolved by `tie`.
fn ranks(values: &[Value], tie: fn(usize, usize, usize) -> f64) -> Vec<Option<f64>> {
    let mut order: Vec<usize> = (0..values.len()).filter(|&i| !values[i].is_null()).collect();
    order.sort_by(|&a, &b| values[a].total_cmp(&values[b]));

    let mut out = vec![None; values.len()];
    let mut start = 0;
    let mut dense = 0;
    while start < order.len() {
        let mut end = start + 1;
        while end < order.len() && values[order[end]].key_eq(&values[order[start]]) {
            end += 1;
        }
        dense += 1;
        for &i in &order[start..end] {
            out[i] = Some(tie(start + 1, end, dense));
        }
        start = end;
    }
    out
}

fn shift(values: &[Value], by: i64, default: &Value) -> Vec<Value> {
    let len = values.len() as i64;
    (0..len)
        .map(|i| {
            let j = i - by;
            if (0..len).contains(&j) {
                values[j as usize].clone()
            } else {
                default.clone()
            }
        })
        .collect()
}

fn offset_param(args: &[Datum], kwargs: &[(String, Datum)], name: &str, fname: &str) -> Result<i64, FrameError> {
    Ok(literal(args, kwargs, 1, name, fname)?.and_then(|v| v.as_i64()).unwrap_or(1))
}

fn rank_column(ranks: Vec<Option<f64>>, as_int: bool) -> Vec<Value> {
    ranks
        .into_iter()
        .map(|x| match x {
            Some(x) if as_int => Value::Int(x as i64),
            Some(x) => Value::Float(x),
            None => Value::Null,
        })
        .collect()
}

fn windows() -> Vec<(&'static str, Imp)> {
    vec![
        window("cumsum", |v, _, _| running(v, |a, b| Ok(binary_value(BinaryOperator::Add, a, b)?))),
        window("cummin", |v, _, _| {
            running(v, |a, b| Ok(if b.total_cmp(a) == std::cmp::Ordering::Less { b.clone() } else { a.clone() }))
        }),
        window("cummax", |v, _, _| {
            running(v, |a, b| Ok(if b.total_cmp(a) == std::cmp::Ordering::Greater { b.clone() } else { a.clone() }))
        }),
        window("diff", |v, args, kwargs| {
            let by = offset_param(args, kwargs, "periods", "diff")?;
            let prev = shift(v, by, &Value::Null);
            v.iter()
                .zip(&prev)
                .map(|(a, b)| Ok(binary_value(BinaryOperator::Sub, a, b)?))
                .collect()
        }),
        window("lag", |v, args, kwargs| {
            let by = offset_param(args, kwargs, "n", "lag")?;
            let default = literal(args, kwargs, 2, "default", "lag")?.unwrap_or(Value::Null);
            Ok(shift(v, by, &default))
        }),
        window("lead", |v, args, kwargs| {
            let by = offset_param(args, kwargs, "n", "lead")?;
            let default = literal(args, kwargs, 2, "default", "lead")?.unwrap_or(Value::Null);
            Ok(shift(v, -by, &default))
        }),
        window("row_number", |v, _, _| Ok((1..=v.len() as i64).map(Value::Int).collect())),
        window("rank", |v, _, _| Ok(rank_column(ranks(v, |lo, hi, _| (lo + hi) as f64 / 2.0), false))),
        window("min_rank", |v, _, _| Ok(rank_column(ranks(v, |lo, _, _| lo as f64), true))),
        window("dense_rank", |v, _, _| Ok(rank_column(ranks(v, |_, _, dense| dense as f64), true))),
        window("percent_rank", |v, _, _| {
            let n = v.iter().filter(|x| !x.is_null()).count();
            Ok(ranks(v, |lo, _, _| lo as f64)
                .into_iter()
                .map(|r| match r {
                    Some(_) if n <= 1 => Value::Float(0.0),
                    Some(r) => Value::Float((r - 1.0) / (n - 1) as f64),
                    None => Value::Null,
                })
                .collect())
        }),
        window("cume_dist", |v, _, _| {
            let n = v.iter().filter(|x| !x.is_null()).count();
            Ok(ranks(v, |_, hi, _| hi as f64)
                .into_iter()
                .map(|r| r.map_or(Value::Null, |r| Value::Float(r / n as f64)))
                .collect())
        }),
    ]
}

/// Names registered for `kind`, for diagnostics and tests.
pub fn names(kind: FuncKind) -> Result<BTreeSet<String>, FrameError> {
    Ok(frame_funcs()?
        .table(kind)
        .names()
        .into_iter()
        .map(str::to_string)
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::{values, Frame, GroupedFrame};
    use tql_registry::LocalTable;

    fn call(kind: FuncKind, name: &str, args: Vec<Datum>) -> Datum {
        let funcs = frame_funcs().unwrap();
        let entry = funcs.table(kind).lookup(name).unwrap();
        let func = entry.implemented().unwrap().downcast::<FrameFunction>().unwrap().clone();
        func.apply(args, Vec::new()).unwrap()
    }

    fn series(d: Datum) -> Vec<Value> {
        match d {
            Datum::Series(v) | Datum::GroupedSeries { values: v, .. } | Datum::GroupAgg { values: v, .. } => v,
            Datum::Scalar(v) => vec![v],
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_aggregates_are_windows() {
        let funcs = frame_funcs().unwrap();
        assert!(funcs.missing_window_names().is_empty());
    }

    #[test]
    fn test_sum_keeps_ints() {
        let out = call(FuncKind::Aggregate, "sum", vec![Datum::Series(values([1, 2, 3]))]);
        assert_eq!(series(out), vec![Value::Int(6)]);
        let out = call(FuncKind::Aggregate, "sum", vec![Datum::Series(vec![Value::Int(1), Value::Float(0.5), Value::Null])]);
        assert_eq!(series(out), vec![Value::Float(1.5)]);
    }

    #[test]
    fn test_quantile_interpolates() {
        let out = call(FuncKind::Aggregate, "median", vec![Datum::Series(values([1, 2, 3, 4]))]);
        assert_eq!(series(out), vec![Value::Float(2.5)]);
    }

    #[test]
    fn test_rank_variants() {
        let x = Datum::Series(values([10, 20, 10, 30]));
        assert_eq!(series(call(FuncKind::Window, "rank", vec![x.clone()])), values([1.5, 3.0, 1.5, 4.0]));
        assert_eq!(series(call(FuncKind::Window, "min_rank", vec![x.clone()])), values([1, 3, 1, 4]));
        assert_eq!(series(call(FuncKind::Window, "dense_rank", vec![x.clone()])), values([1, 2, 1, 3]));
        assert_eq!(
            series(call(FuncKind::Window, "percent_rank", vec![x])),
            values([0.0, 2.0 / 3.0, 0.0, 1.0])
        );
    }

    #[test]
    fn test_lag_and_diff() {
        let x = Datum::Series(values([1, 4, 9]));
        assert_eq!(
            series(call(FuncKind::Window, "lag", vec![x.clone()])),
            vec![Value::Null, Value::Int(1), Value::Int(4)]
        );
        assert_eq!(
            series(call(FuncKind::Window, "diff", vec![x])),
            vec![Value::Null, Value::Int(3), Value::Int(5)]
        );
    }

    #[test]
    fn test_grouped_aggregate_and_window() {
        let frame = Frame::new([("g", values(["a", "b", "a"])), ("x", values([1, 5, 3]))]).unwrap();
        let grouped = GroupedFrame::new(frame, vec!["g".into()]).unwrap();
        let x = Datum::GroupedSeries {
            values: values([1, 5, 3]),
            grouping: grouped.grouping().clone(),
        };

        match call(FuncKind::Aggregate, "sum", vec![x.clone()]) {
            Datum::GroupAgg { values: v, .. } => assert_eq!(v, values([4, 5])),
            other => panic!("unexpected {:?}", other),
        }
        match call(FuncKind::Window, "cumsum", vec![x.clone()]) {
            Datum::GroupedSeries { values: v, .. } => assert_eq!(v, values([1, 5, 4])),
            other => panic!("unexpected {:?}", other),
        }
        match call(FuncKind::Elementwise, "abs", vec![x]) {
            Datum::GroupedSeries { values: v, .. } => assert_eq!(v, values([1, 5, 3])),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_string_functions() {
        let s = Datum::Series(vec![Value::from("  hello world "), Value::Null]);
        let out = series(call(FuncKind::Elementwise, "str.strip", vec![s.clone()]));
        assert_eq!(out, vec![Value::from("hello world"), Value::Null]);
        let out = series(call(FuncKind::Elementwise, "str.title", vec![Datum::Series(values(["hello world"]))]));
        assert_eq!(out, values(["Hello World"]));
    }

    #[test]
    fn test_date_parts() {
        let d = NaiveDate::from_ymd_opt(2024, 2, 29).unwrap();
        let x = Datum::Series(vec![Value::Date(d)]);
        assert_eq!(series(call(FuncKind::Elementwise, "dt.dayofweek", vec![x.clone()])), values([3]));
        assert_eq!(series(call(FuncKind::Elementwise, "dt.is_month_end", vec![x.clone()])), values([true]));
        assert_eq!(series(call(FuncKind::Elementwise, "dt.quarter", vec![x])), values([1]));
        assert_eq!(
            floor_date(&Value::Date(d), "month").unwrap(),
            Value::Date(NaiveDate::from_ymd_opt(2024, 2, 1).unwrap())
        );
    }

    #[test]
    fn test_operator_methods() {
        let x = Datum::Series(values([1, 2]));
        let out = call(FuncKind::Elementwise, "rsub", vec![x, Datum::Scalar(Value::Int(10))]);
        assert_eq!(series(out), values([9, 8]));
    }
}
