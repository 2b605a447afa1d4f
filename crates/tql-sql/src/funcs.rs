//! Dialect function tables
//!
//! All translations live in one [`KindRegistry`] whose type tags mirror the
//! dialect families: base entries sit on `SqlColumn` / `SqlColumnAgg` and
//! each dialect overrides them on its own tags. A dialect's tables are the
//! registry resolved for its column and aggregate tags, built on first use.

use crate::ast::{Expr, SortKey, SqlOp, SqlType, WindowFrame, WindowKind};
use crate::dialect::Dialect;
use crate::translate::{SqlArgs, SqlImp, SqlTranslation};
use crate::SqlError;
use std::sync::{Arc, OnceLock};
use tql_ir::{BinaryOperator, FuncRef, Value};
use tql_registry::{Dispatch, FuncKind, KindRegistry, KindTables, RegistryError, TypeHierarchy};

pub const SQL_COLUMN: &str = "SqlColumn";
pub const SQL_COLUMN_AGG: &str = "SqlColumnAgg";

/// Window names every complete dialect provides.
pub const WINDOW_NAMES: &[&str] = &[
    "cumsum",
    "cummin",
    "cummax",
    "diff",
    "rank",
    "min_rank",
    "dense_rank",
    "percent_rank",
    "cume_dist",
    "row_number",
    "lead",
    "lag",
    "nth",
    "first",
    "last",
    "n",
    "n_distinct",
    "count",
    "max",
    "mean",
    "min",
    "nunique",
    "quantile",
    "median",
    "std",
    "var",
    "sum",
    "size",
    "any",
    "all",
];

type Tables = Result<Arc<KindTables>, RegistryError>;

static REGISTRY: OnceLock<Result<KindRegistry, RegistryError>> = OnceLock::new();
#[allow(clippy::declare_interior_mutable_const)]
const UNBUILT: OnceLock<Tables> = OnceLock::new();
static TABLES: [OnceLock<Tables>; 8] = [UNBUILT; 8];

/// Compiled elementwise, aggregate and window tables of a dialect.
pub fn sql_funcs(dialect: Dialect) -> Result<Arc<KindTables>, SqlError> {
    TABLES[dialect as usize]
        .get_or_init(|| {
            let registry = REGISTRY.get_or_init(build_registry).as_ref().map_err(Clone::clone)?;
            registry
                .compile(dialect.name(), &dialect.column_tag(), &dialect.agg_tag())
                .map(Arc::new)
        })
        .clone()
        .map_err(SqlError::Registry)
}

fn hierarchy() -> Result<TypeHierarchy, RegistryError> {
    let mut types = TypeHierarchy::new();
    types.add(SQL_COLUMN, &[])?;
    types.add(SQL_COLUMN_AGG, &[SQL_COLUMN])?;
    let pg = Dialect::Postgresql;
    // postgresql first: duckdb, snowflake and redshift build on it
    for d in std::iter::once(pg).chain(Dialect::ALL.into_iter().filter(|d| *d != pg)) {
        let (col, agg) = match d {
            Dialect::Duckdb | Dialect::Snowflake | Dialect::Redshift => (pg.column_tag(), pg.agg_tag()),
            _ => (SQL_COLUMN.to_string(), SQL_COLUMN_AGG.to_string()),
        };
        let own_col = d.column_tag();
        types.add(&own_col, &[col.as_str()])?;
        types.add(&d.agg_tag(), &[agg.as_str(), own_col.as_str()])?;
    }
    Ok(types)
}

fn build_registry() -> Result<KindRegistry, RegistryError> {
    let mut registry = KindRegistry::new("sql", hierarchy()?);
    base(&mut Scope::new(&mut registry, SQL_COLUMN, SQL_COLUMN_AGG))?;
    for d in Dialect::ALL {
        let mut scope = Scope::new(&mut registry, &d.column_tag(), &d.agg_tag());
        match d {
            Dialect::Sqlite => sqlite(&mut scope)?,
            Dialect::Postgresql => postgresql(&mut scope)?,
            Dialect::Duckdb => duckdb(&mut scope)?,
            Dialect::Mysql => mysql(&mut scope)?,
            Dialect::Bigquery => bigquery(&mut scope)?,
            Dialect::Snowflake | Dialect::Redshift | Dialect::Spark => {}
        }
    }
    Ok(registry)
}

/// Registration target: one column tag and its aggregate tag.
struct Scope<'r> {
    registry: &'r mut KindRegistry,
    col: String,
    agg: String,
}

impl<'r> Scope<'r> {
    fn new(registry: &'r mut KindRegistry, col: &str, agg: &str) -> Self {
        Self {
            registry,
            col: col.to_string(),
            agg: agg.to_string(),
        }
    }

    fn tag(&self, kind: FuncKind) -> &str {
        match kind {
            FuncKind::Aggregate => &self.agg,
            FuncKind::Elementwise | FuncKind::Window => &self.col,
        }
    }

    fn put(&mut self, kind: FuncKind, name: &str, f: Imp) -> Result<(), RegistryError> {
        let entry = Dispatch::Implemented(FuncRef::new(Arc::new(SqlTranslation::from_imp(name, f))));
        let tag = self.tag(kind).to_string();
        self.registry.insert(kind, name, &tag, entry)
    }

    fn scalar(&mut self, name: &str, f: Imp) -> Result<(), RegistryError> {
        self.put(FuncKind::Elementwise, name, f)
    }

    fn window(&mut self, name: &str, f: Imp) -> Result<(), RegistryError> {
        self.put(FuncKind::Window, name, f)
    }

    fn agg(&mut self, name: &str, f: Imp) -> Result<(), RegistryError> {
        self.put(FuncKind::Aggregate, name, f)
    }

    fn bound(&mut self, kind: FuncKind, name: &str, msg: impl Into<String>) -> Result<(), RegistryError> {
        let tag = self.tag(kind).to_string();
        self.registry.insert(kind, name, &tag, Dispatch::LookupBound(msg.into()))
    }

    /// The same translation under several names.
    fn scalars(&mut self, names: &[&str], f: Imp) -> Result<(), RegistryError> {
        for name in names {
            self.scalar(name, f.clone())?;
        }
        Ok(())
    }
}

type Imp = Arc<SqlImp>;

fn imp<F>(f: F) -> Imp
where
    F: Fn(&SqlArgs) -> Result<Expr, SqlError> + Send + Sync + 'static,
{
    Arc::new(f)
}

fn unsupported(what: impl Into<String>) -> SqlError {
    SqlError::Unsupported(what.into())
}

// Expression helpers ---------------------------------------------------------

fn func(name: &'static str) -> Imp {
    imp(move |a| Ok(Expr::func(name, a.exprs()?)))
}

fn binop(op: SqlOp) -> Imp {
    imp(move |a| Ok(Expr::binary(op, a.expr(0)?, a.expr(1)?)))
}

fn rbinop(op: SqlOp) -> Imp {
    imp(move |a| Ok(Expr::binary(op, a.expr(1)?, a.expr(0)?)))
}

fn over(func: Expr, kind: WindowKind, frame: Option<WindowFrame>) -> Expr {
    Expr::Over {
        func: Box::new(func),
        kind,
        partition_by: Vec::new(),
        order_by: Vec::new(),
        frame,
    }
}

fn ordered(func: Expr, by: Expr) -> Expr {
    Expr::Over {
        func: Box::new(func),
        kind: WindowKind::Rank,
        partition_by: Vec::new(),
        order_by: vec![SortKey::from_expr(by)],
        frame: None,
    }
}

fn count_star() -> Expr {
    Expr::func("count", vec![Expr::Star])
}

fn count_distinct(x: Expr) -> Expr {
    Expr::Function {
        name: "count".to_string(),
        args: vec![x],
        distinct: true,
    }
}

fn win_agg(name: &'static str) -> Imp {
    imp(move |a| Ok(over(Expr::func(name, vec![a.expr(0)?]), WindowKind::Agg, None)))
}

fn win_cumul(name: &'static str) -> Imp {
    imp(move |a| {
        Ok(over(
            Expr::func(name, vec![a.expr(0)?]),
            WindowKind::Cumulative,
            Some(WindowFrame::RUNNING),
        ))
    })
}

fn win_rank(name: &'static str) -> Imp {
    imp(move |a| Ok(ordered(Expr::func(name, vec![]), a.expr(0)?)))
}

fn agg(name: &'static str) -> Imp {
    imp(move |a| Ok(Expr::func(name, vec![a.expr(0)?])))
}

fn cast(to: SqlType) -> impl Fn(Expr) -> Expr {
    move |e| Expr::cast(e, to)
}

/// `percentile_cont(q) WITHIN GROUP (ORDER BY x)`
fn ordered_set(x: Expr, q: f64) -> Expr {
    Expr::WithinGroup {
        func: Box::new(Expr::func("percentile_cont", vec![Expr::lit(q)])),
        order_by: vec![SortKey::from_expr(x)],
    }
}

fn quantile_arg(a: &SqlArgs) -> Result<f64, SqlError> {
    a.float(1, "q")?.ok_or_else(|| unsupported("quantile: q is required"))
}

fn literal_str(a: &SqlArgs, i: usize, kw: &str) -> Result<String, SqlError> {
    a.string(i, kw)?
        .ok_or_else(|| unsupported(format!("{}: {} is required", a.name, kw)))
}

fn date_trunc(unit: &str, x: Expr) -> Expr {
    Expr::func("date_trunc", vec![Expr::lit(unit), x])
}

fn interval(value: i64, unit: &str) -> Expr {
    Expr::Interval {
        value,
        unit: unit.to_string(),
    }
}

/// Last day of the period containing `x`.
fn last_day_in_period(x: Expr, period: &str) -> Expr {
    let (n, unit) = match period {
        "quarter" => (3, "month"),
        other => (1, other),
    };
    let next = Expr::binary(SqlOp::Add, date_trunc(period, x), interval(n, unit));
    Expr::binary(SqlOp::Sub, next, interval(1, "day"))
}

fn is_first_day_of(period: &'static str) -> Imp {
    imp(move |a| {
        let x = a.expr(0)?;
        Ok(Expr::binary(SqlOp::Eq, date_trunc("day", x.clone()), date_trunc(period, x)))
    })
}

fn is_last_day_of(period: &'static str) -> Imp {
    imp(move |a| {
        let x = a.expr(0)?;
        Ok(Expr::binary(SqlOp::Eq, date_trunc("day", x.clone()), last_day_in_period(x, period)))
    })
}

fn extract(field: &'static str) -> Imp {
    imp(move |a| Ok(Expr::extract(field, a.expr(0)?)))
}

fn strip(name: &'static str) -> Imp {
    imp(move |a| {
        let chars = a.string(1, "to_strip")?.unwrap_or_else(|| " \t\n\x0b\x0c\r".to_string());
        Ok(Expr::func(name, vec![a.expr(0)?, Expr::lit(chars)]))
    })
}

/// `x LIKE '%pat%'`, lower-casing both sides when `case=False`.
fn contains_like(a: &SqlArgs) -> Result<Expr, SqlError> {
    let pat = literal_str(a, 1, "pat")?;
    if a.bool(2, "case", true)? {
        Ok(Expr::like(a.expr(0)?, "%", &pat, "%"))
    } else {
        let lowered = Expr::func("lower", vec![a.expr(0)?]);
        Ok(Expr::like(lowered, "%", &pat.to_lowercase(), "%"))
    }
}

fn regex_flag(a: &SqlArgs) -> Result<bool, SqlError> {
    a.bool(4, "regex", true)
}

// Translations shared by dialects --------------------------------------------

fn floordiv(a: &SqlArgs, x: usize, y: usize) -> Result<Expr, SqlError> {
    let quotient = Expr::binary(SqlOp::Div, a.expr(x)?, a.expr(y)?);
    Ok(Expr::cast(quotient, SqlType::Integer))
}

fn round(a: &SqlArgs) -> Result<Expr, SqlError> {
    match a.int(1, "decimals")? {
        Some(n) => Ok(Expr::func("round", vec![a.expr(0)?, Expr::lit(n)])),
        None => Ok(Expr::func("round", vec![a.expr(0)?])),
    }
}

fn between(a: &SqlArgs) -> Result<Expr, SqlError> {
    let (x, low, high) = (a.expr(0)?, a.expr(1)?, a.expr(2)?);
    let inclusive = match a.literal(3, "inclusive") {
        None => "both".to_string(),
        Some(Value::Bool(true)) => "both".to_string(),
        Some(Value::Bool(false)) => "neither".to_string(),
        Some(Value::Str(s)) => s.clone(),
        Some(other) => return Err(unsupported(format!("between: inclusive={}", other))),
    };
    let (lower, upper) = match inclusive.as_str() {
        "both" => {
            return Ok(Expr::Between {
                expr: Box::new(x),
                low: Box::new(low),
                high: Box::new(high),
            })
        }
        "neither" => (SqlOp::Gt, SqlOp::Lt),
        "left" => (SqlOp::Ge, SqlOp::Lt),
        "right" => (SqlOp::Gt, SqlOp::Le),
        other => return Err(unsupported(format!("between: inclusive='{}'", other))),
    };
    Ok(Expr::binary(
        SqlOp::And,
        Expr::binary(lower, x.clone(), low),
        Expr::binary(upper, x, high),
    ))
}

fn isin(a: &SqlArgs) -> Result<Expr, SqlError> {
    let x = a.expr(0)?;
    match a.literal(1, "values") {
        Some(Value::List(values)) if values.is_empty() => Ok(Expr::lit(false)),
        Some(Value::List(values)) => Ok(Expr::InList {
            expr: Box::new(x),
            list: values.iter().cloned().map(Expr::Literal).collect(),
            negated: false,
        }),
        _ => Err(unsupported("isin: values must be a literal list")),
    }
}

fn clip_with(lower_fn: &'static str, upper_fn: &'static str) -> Imp {
    imp(move |a| {
        let mut x = a.expr(0)?;
        if let Some(low) = a.opt_expr(1, "lower")? {
            x = Expr::func(lower_fn, vec![x, low]);
        }
        if let Some(high) = a.opt_expr(2, "upper")? {
            x = Expr::func(upper_fn, vec![x, high]);
        }
        Ok(x)
    })
}

fn astype(a: &SqlArgs) -> Result<Expr, SqlError> {
    let to = match literal_str(a, 1, "dtype")?.as_str() {
        "int" => SqlType::Integer,
        "float" => SqlType::Float,
        "str" => SqlType::Text,
        "bool" => SqlType::Boolean,
        other => return Err(unsupported(format!("astype: only int, float, str and bool are supported, got {}", other))),
    };
    Ok(Expr::cast(a.expr(0)?, to))
}

fn case_when(a: &SqlArgs) -> Result<Expr, SqlError> {
    let at = if a.is_columns(0) { 1 } else { 0 };
    let mut whens = Vec::new();
    let mut otherwise = None;
    for (cond, value) in a.dict(at)? {
        match cond {
            Expr::Literal(Value::Bool(true)) => otherwise = Some(Box::new(value)),
            cond => whens.push((cond, value)),
        }
    }
    if whens.is_empty() {
        return otherwise
            .map(|e| *e)
            .ok_or_else(|| unsupported("case_when: no cases"));
    }
    Ok(Expr::Case { whens, otherwise })
}

fn dow_monday(a: &SqlArgs) -> Result<Expr, SqlError> {
    let dow = Expr::binary(SqlOp::Add, Expr::extract("dow", a.expr(0)?), Expr::lit(6));
    Ok(Expr::binary(SqlOp::Mod, Expr::cast(dow, SqlType::Integer), Expr::lit(7)))
}

fn rank(a: &SqlArgs) -> Result<Expr, SqlError> {
    let x = a.expr(0)?;
    let min_rank = ordered(Expr::func("rank", vec![]), x.clone());
    let mut ties = over(count_star(), WindowKind::Rank, None);
    if let Expr::Over { partition_by, .. } = &mut ties {
        partition_by.push(x);
    }
    let to_mean = Expr::binary(
        SqlOp::Div,
        Expr::binary(SqlOp::Sub, ties, Expr::lit(1)),
        Expr::lit(2.0),
    );
    Ok(Expr::binary(SqlOp::Add, min_rank, to_mean))
}

fn offset(name: &'static str) -> Imp {
    imp(move |a| {
        let mut args = vec![a.expr(0)?, Expr::lit(a.int(1, "n")?.unwrap_or(1))];
        if let Some(default) = a.opt_expr(2, "default")? {
            args.push(default);
        }
        Ok(over(Expr::func(name, args), WindowKind::Cumulative, None))
    })
}

fn diff(a: &SqlArgs) -> Result<Expr, SqlError> {
    let x = a.expr(0)?;
    let periods = a.int(1, "periods")?.unwrap_or(1);
    let shifted = match periods {
        0 => return Err(unsupported("diff: periods cannot be 0")),
        n if n > 0 => Expr::func("lag", vec![x.clone(), Expr::lit(n)]),
        n => Expr::func("lead", vec![x.clone(), Expr::lit(-n)]),
    };
    Ok(Expr::binary(SqlOp::Sub, x, over(shifted, WindowKind::Cumulative, None)))
}

fn nth(a: &SqlArgs) -> Result<Expr, SqlError> {
    let n = a.int(1, "n")?.ok_or_else(|| unsupported("nth: n is required"))?;
    if n < 0 {
        return Err(unsupported("nth: negative positions need an explicit ordering"));
    }
    let func = Expr::func("nth_value", vec![a.expr(0)?, Expr::lit(n + 1)]);
    Ok(over(func, WindowKind::Cumulative, Some(WindowFrame::WHOLE)))
}

fn row_number(a: &SqlArgs) -> Result<Expr, SqlError> {
    let func = Expr::func("row_number", vec![]);
    if a.is_columns(0) {
        Ok(over(func, WindowKind::Cumulative, None))
    } else {
        Ok(ordered(func, a.expr(0)?))
    }
}

// Base dialect -----------------------------------------------------------------

const OPERATORS: &[(BinaryOperator, SqlOp)] = &[
    (BinaryOperator::Add, SqlOp::Add),
    (BinaryOperator::Sub, SqlOp::Sub),
    (BinaryOperator::Mul, SqlOp::Mul),
    (BinaryOperator::TrueDiv, SqlOp::Div),
    (BinaryOperator::Mod, SqlOp::Mod),
    (BinaryOperator::And, SqlOp::And),
    (BinaryOperator::Or, SqlOp::Or),
    (BinaryOperator::Gt, SqlOp::Gt),
    (BinaryOperator::Lt, SqlOp::Lt),
    (BinaryOperator::Eq, SqlOp::Eq),
    (BinaryOperator::Ne, SqlOp::Ne),
    (BinaryOperator::Ge, SqlOp::Ge),
    (BinaryOperator::Le, SqlOp::Le),
];

fn base(s: &mut Scope) -> Result<(), RegistryError> {
    // operators
    for (op, sql) in OPERATORS {
        s.scalar(op.method_name(), binop(*sql))?;
        s.scalar(&op.reflected_name(), rbinop(*sql))?;
    }
    s.scalars(&["__floordiv__", "floordiv"], imp(|a| floordiv(a, 0, 1)))?;
    s.scalar("__rfloordiv__", imp(|a| floordiv(a, 1, 0)))?;
    for name in ["__pow__", "__rpow__", "pow", "rpow"] {
        s.bound(FuncKind::Elementwise, name, "** is not supported in SQL")?;
    }
    s.bound(FuncKind::Elementwise, "__pos__", "unary + is not supported in SQL")?;
    s.scalar("__invert__", imp(|a| Ok(Expr::Not(Box::new(a.expr(0)?)))))?;
    s.scalar("__neg__", imp(|a| Ok(Expr::Neg(Box::new(a.expr(0)?)))))?;

    // operator methods
    s.scalar("add", binop(SqlOp::Add))?;
    s.scalar("sub", binop(SqlOp::Sub))?;
    s.scalar("mul", binop(SqlOp::Mul))?;
    s.scalars(&["div", "truediv"], binop(SqlOp::Div))?;
    s.scalar("mod", binop(SqlOp::Mod))?;
    s.scalar("eq", binop(SqlOp::Eq))?;
    s.scalar("ne", binop(SqlOp::Ne))?;
    s.scalar("lt", binop(SqlOp::Lt))?;
    s.scalar("le", binop(SqlOp::Le))?;
    s.scalar("gt", binop(SqlOp::Gt))?;
    s.scalar("ge", binop(SqlOp::Ge))?;
    s.scalar("radd", rbinop(SqlOp::Add))?;
    s.scalar("rsub", rbinop(SqlOp::Sub))?;
    s.scalar("rmul", rbinop(SqlOp::Mul))?;
    s.scalar("rdiv", rbinop(SqlOp::Div))?;

    // computation
    s.scalar("abs", func("abs"))?;
    s.scalar("round", imp(round))?;
    s.scalar("between", imp(between))?;
    s.scalar("isin", imp(isin))?;
    s.scalar("clip", clip_with("greatest", "least"))?;
    s.scalar("astype", imp(astype))?;
    s.scalar("fillna", imp(|a| Ok(Expr::func("coalesce", vec![a.expr(0)?, a.expr(1)?]))))?;
    s.scalars(&["isna", "isnull"], imp(|a| Ok(Expr::is_null(a.expr(0)?, false))))?;
    s.scalars(&["notna", "notnull"], imp(|a| Ok(Expr::is_null(a.expr(0)?, true))))?;

    // vector functions
    s.scalar("coalesce", func("coalesce"))?;
    s.scalar(
        "if_else",
        imp(|a| {
            Ok(Expr::Case {
                whens: vec![(a.expr(0)?, a.expr(1)?)],
                otherwise: Some(Box::new(a.expr(2)?)),
            })
        }),
    )?;
    s.scalar("case_when", imp(case_when))?;
    s.scalar("na_if", func("nullif"))?;
    s.scalar(
        "sql_raw",
        imp(|a| {
            a.string(0, "sql")?
                .map(Expr::Raw)
                .ok_or_else(|| unsupported("sql_raw: text is required"))
        }),
    )?;
    s.scalar("desc", imp(|a| Ok(Expr::Desc(Box::new(a.expr(0)?)))))?;

    // strings
    s.scalar("str.len", func("length"))?;
    s.scalar("str.lower", func("lower"))?;
    s.scalar("str.upper", func("upper"))?;
    s.scalar("str.strip", strip("trim"))?;
    s.scalar("str.lstrip", strip("ltrim"))?;
    s.scalar("str.rstrip", strip("rtrim"))?;
    s.scalar("str.startswith", imp(|a| Ok(Expr::like(a.expr(0)?, "", &literal_str(a, 1, "pat")?, "%"))))?;
    s.scalar("str.endswith", imp(|a| Ok(Expr::like(a.expr(0)?, "%", &literal_str(a, 1, "pat")?, ""))))?;
    s.scalar("str.contains", imp(contains_like))?;
    s.scalar(
        "str.capitalize",
        imp(|a| {
            let x = a.expr(0)?;
            let first = Expr::func("upper", vec![Expr::func("substr", vec![x.clone(), Expr::lit(1), Expr::lit(1)])]);
            let rest = Expr::func("lower", vec![Expr::func("substr", vec![x, Expr::lit(2)])]);
            Ok(Expr::binary(SqlOp::Concat, first, rest))
        }),
    )?;
    s.scalar("str.title", func("initcap"))?;
    s.scalar(
        "str.islower",
        imp(|a| Ok(Expr::binary(SqlOp::Eq, a.expr(0)?, Expr::func("lower", vec![a.expr(0)?])))),
    )?;
    s.scalar(
        "str.isupper",
        imp(|a| Ok(Expr::binary(SqlOp::Eq, a.expr(0)?, Expr::func("upper", vec![a.expr(0)?])))),
    )?;
    s.scalar("str.replace", func("replace"))?;

    // datetimes
    for field in ["year", "month", "day", "hour", "minute", "second", "quarter"] {
        s.scalar(&format!("dt.{}", field), extract(field))?;
    }
    s.scalars(&["dt.week", "dt.weekofyear"], extract("week"))?;
    s.scalar("dt.dayofyear", extract("doy"))?;
    s.scalars(&["dt.dayofweek", "dt.weekday"], imp(dow_monday))?;
    s.scalars(
        &["dt.days_in_month", "dt.daysinmonth"],
        imp(|a| Ok(Expr::extract("day", last_day_in_period(a.expr(0)?, "month")))),
    )?;
    s.scalar("dt.is_month_start", is_first_day_of("month"))?;
    s.scalar("dt.is_quarter_start", is_first_day_of("quarter"))?;
    s.scalar("dt.is_year_start", is_first_day_of("year"))?;
    s.scalar("dt.is_month_end", is_last_day_of("month"))?;
    s.scalar("dt.is_quarter_end", is_last_day_of("quarter"))?;
    s.scalar("dt.is_year_end", is_last_day_of("year"))?;
    s.scalar(
        "floor_date",
        imp(|a| Ok(date_trunc(&literal_str(a, 1, "unit")?, a.expr(0)?))),
    )?;

    // windows
    s.window("cumsum", win_cumul("sum"))?;
    s.window("cummin", win_cumul("min"))?;
    s.window("cummax", win_cumul("max"))?;
    s.window("diff", imp(diff))?;
    s.window("rank", imp(rank))?;
    s.window("min_rank", win_rank("rank"))?;
    s.window("dense_rank", win_rank("dense_rank"))?;
    s.window("percent_rank", win_rank("percent_rank"))?;
    s.window("cume_dist", win_rank("cume_dist"))?;
    s.window("row_number", imp(row_number))?;
    s.window("lead", offset("lead"))?;
    s.window("lag", offset("lag"))?;
    s.window("nth", imp(nth))?;
    s.window(
        "first",
        imp(|a| Ok(over(Expr::func("first_value", vec![a.expr(0)?]), WindowKind::Cumulative, Some(WindowFrame::WHOLE)))),
    )?;
    s.window(
        "last",
        imp(|a| Ok(over(Expr::func("last_value", vec![a.expr(0)?]), WindowKind::Cumulative, Some(WindowFrame::WHOLE)))),
    )?;
    for name in ["n", "size"] {
        s.window(name, imp(|_| Ok(over(count_star(), WindowKind::Agg, None))))?;
    }
    for name in ["n_distinct", "nunique"] {
        s.window(name, imp(|a| Ok(over(count_distinct(a.expr(0)?), WindowKind::Agg, None))))?;
    }
    s.window("count", win_agg("count"))?;
    s.window("max", win_agg("max"))?;
    s.window("mean", win_agg("avg"))?;
    s.window("min", win_agg("min"))?;
    s.window("sum", win_agg("sum"))?;
    s.window("std", win_agg("stddev"))?;
    s.window("var", win_agg("variance"))?;
    s.window("any", win_agg("max"))?;
    s.window("all", win_agg("min"))?;
    s.window("median", imp(|a| Ok(over(ordered_set(a.expr(0)?, 0.5), WindowKind::Agg, None))))?;
    s.window(
        "quantile",
        imp(|a| Ok(over(ordered_set(a.expr(0)?, quantile_arg(a)?), WindowKind::Agg, None))),
    )?;

    // aggregates
    s.agg("count", agg("count"))?;
    for name in ["n", "size"] {
        s.agg(name, imp(|_| Ok(count_star())))?;
    }
    for name in ["n_distinct", "nunique"] {
        s.agg(name, imp(|a| Ok(count_distinct(a.expr(0)?))))?;
    }
    s.agg("max", agg("max"))?;
    s.agg("mean", agg("avg"))?;
    s.agg("min", agg("min"))?;
    s.agg("sum", agg("sum"))?;
    s.agg("std", agg("stddev"))?;
    s.agg("var", agg("variance"))?;
    s.agg("any", agg("max"))?;
    s.agg("all", agg("min"))?;
    s.agg("median", imp(|a| Ok(ordered_set(a.expr(0)?, 0.5))))?;
    s.agg("quantile", imp(|a| Ok(ordered_set(a.expr(0)?, quantile_arg(a)?))))?;
    for name in ["first", "last", "nth"] {
        s.bound(FuncKind::Aggregate, name, format!("{} is not supported in summarize; use it in mutate", name))?;
    }
    Ok(())
}

// Dialect overrides ------------------------------------------------------------

fn sqlite(s: &mut Scope) -> Result<(), RegistryError> {
    for name in WINDOW_NAMES {
        s.bound(FuncKind::Window, name, format!("{} is not supported as a window function in sqlite", name))?;
    }
    for name in ["std", "var"] {
        s.bound(FuncKind::Aggregate, name, format!("{} is not supported in sqlite", name))?;
    }
    s.scalar("clip", clip_with("max", "min"))?;
    s.bound(FuncKind::Elementwise, "floor_date", "sqlite has no date_trunc")?;
    Ok(())
}

fn truediv_float(x: usize, y: usize, to: SqlType) -> Imp {
    imp(move |a| Ok(Expr::binary(SqlOp::Div, cast(to)(a.expr(x)?), a.expr(y)?)))
}

fn postgresql(s: &mut Scope) -> Result<(), RegistryError> {
    s.scalars(&["__truediv__", "div", "truediv"], truediv_float(0, 1, SqlType::Float))?;
    s.scalars(&["__rtruediv__", "rdiv"], truediv_float(1, 0, SqlType::Float))?;
    s.scalar(
        "log",
        imp(|a| match a.opt_expr(1, "base")? {
            None => Ok(Expr::func("ln", vec![a.expr(0)?])),
            Some(base) => Ok(Expr::func("log", vec![base, a.expr(0)?])),
        }),
    )?;
    s.scalar(
        "round",
        imp(|a| {
            let n = a.int(1, "decimals")?.unwrap_or(0);
            Ok(Expr::func("round", vec![Expr::cast(a.expr(0)?, SqlType::Numeric), Expr::lit(n)]))
        }),
    )?;
    s.scalar(
        "str.contains",
        imp(|a| {
            if !regex_flag(a)? {
                return contains_like(a);
            }
            let pat = literal_str(a, 1, "pat")?;
            let op = SqlOp::Regex {
                case_insensitive: !a.bool(2, "case", true)?,
            };
            Ok(Expr::binary(op, a.expr(0)?, Expr::lit(pat)))
        }),
    )?;
    s.window("any", win_agg("bool_or"))?;
    s.window("all", win_agg("bool_and"))?;
    s.window("std", win_agg("stddev_samp"))?;
    s.window("var", win_agg("var_samp"))?;
    for name in ["n_distinct", "nunique"] {
        s.bound(FuncKind::Window, name, "count(DISTINCT) is not supported as a window function")?;
    }
    s.agg("any", agg("bool_or"))?;
    s.agg("all", agg("bool_and"))?;
    s.agg("std", agg("stddev_samp"))?;
    s.agg("var", agg("var_samp"))?;
    Ok(())
}

fn duckdb(s: &mut Scope) -> Result<(), RegistryError> {
    s.scalar(
        "__floordiv__",
        imp(|a| {
            let q = Expr::binary(SqlOp::Div, a.expr(0)?, a.expr(1)?);
            Ok(Expr::cast(Expr::func("floor", vec![q]), SqlType::Integer))
        }),
    )?;
    s.scalar(
        "__rfloordiv__",
        imp(|a| {
            let q = Expr::binary(SqlOp::Div, a.expr(1)?, a.expr(0)?);
            Ok(Expr::cast(Expr::func("floor", vec![q]), SqlType::Integer))
        }),
    )?;
    s.scalar("round", imp(round))?;
    s.scalar(
        "str.contains",
        imp(|a| {
            if !regex_flag(a)? {
                return contains_like(a);
            }
            let pat = literal_str(a, 1, "pat")?;
            let pat = if a.bool(2, "case", true)? { pat } else { format!("(?i){}", pat) };
            Ok(Expr::func("regexp_matches", vec![a.expr(0)?, Expr::lit(pat)]))
        }),
    )?;
    s.bound(FuncKind::Elementwise, "str.title", "str.title is not supported in duckdb")?;
    s.scalars(
        &["dt.days_in_month", "dt.daysinmonth"],
        imp(|a| Ok(Expr::extract("day", Expr::func("last_day", vec![a.expr(0)?])))),
    )?;
    s.scalar(
        "dt.is_month_end",
        imp(|a| {
            let x = a.expr(0)?;
            Ok(Expr::binary(SqlOp::Eq, date_trunc("day", x.clone()), Expr::func("last_day", vec![x])))
        }),
    )?;
    for name in ["n_distinct", "nunique"] {
        s.window(name, imp(|a| Ok(over(count_distinct(a.expr(0)?), WindowKind::Agg, None))))?;
    }
    s.window("median", imp(|a| Ok(over(Expr::func("median", vec![a.expr(0)?]), WindowKind::Agg, None))))?;
    s.window(
        "quantile",
        imp(|a| {
            let f = Expr::func("quantile_cont", vec![a.expr(0)?, Expr::lit(quantile_arg(a)?)]);
            Ok(over(f, WindowKind::Agg, None))
        }),
    )?;
    s.agg("median", agg("median"))?;
    s.agg(
        "quantile",
        imp(|a| Ok(Expr::func("quantile_cont", vec![a.expr(0)?, Expr::lit(quantile_arg(a)?)]))),
    )?;
    Ok(())
}

fn mysql_strip(left: bool, right: bool) -> Imp {
    let pattern = match (left, right) {
        (true, true) => "(^[[:space:]]+|[[:space:]]+$)",
        (true, false) => "(^[[:space:]]+)",
        _ => "([[:space:]]+$)",
    };
    imp(move |a| Ok(Expr::func("regexp_replace", vec![a.expr(0)?, Expr::lit(pattern), Expr::lit("")])))
}

/// The period of `x` differs from the period one day before (or after).
fn mysql_date_offset(period: &'static str, is_start: bool) -> Imp {
    imp(move |a| {
        let x = a.expr(0)?;
        let shift = if is_start { "date_sub" } else { "date_add" };
        let neighbour = Expr::func(shift, vec![x.clone(), interval(1, "day")]);
        Ok(Expr::binary(
            SqlOp::Ne,
            Expr::func(period, vec![x]),
            Expr::func(period, vec![neighbour]),
        ))
    })
}

fn mysql(s: &mut Scope) -> Result<(), RegistryError> {
    s.scalars(&["__truediv__", "div", "truediv"], truediv_float(0, 1, SqlType::Numeric))?;
    s.scalars(&["__rtruediv__", "rdiv"], truediv_float(1, 0, SqlType::Numeric))?;
    s.scalars(&["__floordiv__", "floordiv"], binop(SqlOp::IntDiv))?;
    s.scalar("__rfloordiv__", rbinop(SqlOp::IntDiv))?;
    s.scalar(
        "between",
        imp(|a| match a.literal(3, "inclusive") {
            None | Some(Value::Bool(true)) => between(a),
            Some(Value::Str(s)) if s == "both" => between(a),
            Some(_) => Err(unsupported("between must be inclusive in mysql")),
        }),
    )?;
    s.scalar("str.strip", mysql_strip(true, true))?;
    s.scalar("str.lstrip", mysql_strip(true, false))?;
    s.scalar("str.rstrip", mysql_strip(false, true))?;
    s.bound(FuncKind::Elementwise, "str.title", "str.title is not supported in mysql")?;
    s.scalars(
        &["dt.dayofweek", "dt.weekday"],
        imp(|a| {
            let dow = Expr::binary(SqlOp::Add, Expr::func("dayofweek", vec![a.expr(0)?]), Expr::lit(5));
            Ok(Expr::binary(SqlOp::Mod, dow, Expr::lit(7)))
        }),
    )?;
    s.scalar("dt.dayofyear", func("dayofyear"))?;
    s.scalars(
        &["dt.days_in_month", "dt.daysinmonth"],
        imp(|a| Ok(Expr::func("dayofmonth", vec![Expr::func("last_day", vec![a.expr(0)?])]))),
    )?;
    s.scalar(
        "dt.is_month_end",
        imp(|a| Ok(Expr::binary(SqlOp::Eq, a.expr(0)?, Expr::func("last_day", vec![a.expr(0)?])))),
    )?;
    s.scalar(
        "dt.is_month_start",
        imp(|a| Ok(Expr::binary(SqlOp::Eq, Expr::func("dayofmonth", vec![a.expr(0)?]), Expr::lit(1)))),
    )?;
    s.scalar("dt.is_quarter_start", mysql_date_offset("quarter", true))?;
    s.scalar("dt.is_quarter_end", mysql_date_offset("quarter", false))?;
    s.scalar("dt.is_year_start", mysql_date_offset("year", true))?;
    s.scalar("dt.is_year_end", mysql_date_offset("year", false))?;
    s.scalars(
        &["dt.week", "dt.weekofyear"],
        imp(|a| Ok(Expr::func("week", vec![a.expr(0)?, Expr::lit(1)]))),
    )?;
    s.bound(FuncKind::Elementwise, "floor_date", "mysql has no date_trunc")?;
    Ok(())
}

fn bq_trunc(x: Expr, part: &str) -> Expr {
    Expr::func("datetime_trunc", vec![x, Expr::Raw(part.to_string())])
}

fn bq_last_day(x: Expr, part: &str) -> Expr {
    Expr::func("last_day", vec![x, Expr::Raw(part.to_string())])
}

fn bq_any(window: bool) -> Imp {
    imp(move |a| {
        let total = Expr::func("sum", vec![Expr::cast(a.expr(0)?, SqlType::Integer)]);
        let total = if window { over(total, WindowKind::Agg, None) } else { total };
        Ok(Expr::binary(SqlOp::Ne, total, Expr::lit(0)))
    })
}

fn bq_all(window: bool) -> Imp {
    imp(move |a| {
        let misses = Expr::cast(Expr::Not(Box::new(a.expr(0)?)), SqlType::Integer);
        let total = Expr::func("sum", vec![misses]);
        let total = if window { over(total, WindowKind::Agg, None) } else { total };
        Ok(Expr::binary(SqlOp::Eq, total, Expr::lit(0)))
    })
}

const QUANTILE_ERROR: &str =
    "median and quantile use percentile_cont, which bigquery only allows as a window function; use them in mutate";

fn bigquery(s: &mut Scope) -> Result<(), RegistryError> {
    s.scalars(
        &["__floordiv__", "floordiv"],
        imp(|a| Ok(Expr::func("floor", vec![Expr::binary(SqlOp::Div, a.expr(0)?, a.expr(1)?)]))),
    )?;
    s.scalar(
        "__rfloordiv__",
        imp(|a| Ok(Expr::func("floor", vec![Expr::binary(SqlOp::Div, a.expr(1)?, a.expr(0)?)]))),
    )?;
    s.scalars(&["__mod__", "mod"], imp(|a| Ok(Expr::func("mod", vec![a.expr(0)?, a.expr(1)?]))))?;
    s.scalars(&["__rmod__", "rmod"], imp(|a| Ok(Expr::func("mod", vec![a.expr(1)?, a.expr(0)?]))))?;
    s.scalar("round", imp(round))?;

    s.scalars(
        &["dt.dayofweek", "dt.weekday"],
        imp(|a| Ok(Expr::binary(SqlOp::Sub, Expr::extract("DAYOFWEEK", a.expr(0)?), Expr::lit(2)))),
    )?;
    s.scalar("dt.dayofyear", extract("DAYOFYEAR"))?;
    s.scalars(&["dt.week", "dt.weekofyear"], extract("ISOWEEK"))?;
    s.scalars(
        &["dt.days_in_month", "dt.daysinmonth"],
        imp(|a| Ok(Expr::extract("DAY", bq_last_day(a.expr(0)?, "MONTH")))),
    )?;
    for (name, part) in [
        ("dt.is_month_start", "MONTH"),
        ("dt.is_quarter_start", "QUARTER"),
        ("dt.is_year_start", "YEAR"),
    ] {
        s.scalar(
            name,
            imp(move |a| {
                let x = a.expr(0)?;
                Ok(Expr::binary(SqlOp::Eq, bq_trunc(x.clone(), "DAY"), bq_trunc(x, part)))
            }),
        )?;
    }
    for (name, part) in [
        ("dt.is_month_end", "MONTH"),
        ("dt.is_quarter_end", "QUARTER"),
        ("dt.is_year_end", "YEAR"),
    ] {
        s.scalar(
            name,
            imp(move |a| {
                let x = a.expr(0)?;
                Ok(Expr::binary(SqlOp::Eq, bq_trunc(x.clone(), "DAY"), bq_last_day(x, part)))
            }),
        )?;
    }
    s.scalar(
        "floor_date",
        imp(|a| Ok(bq_trunc(a.expr(0)?, &literal_str(a, 1, "unit")?.to_ascii_uppercase()))),
    )?;

    s.scalar(
        "str.contains",
        imp(|a| {
            if !regex_flag(a)? {
                return contains_like(a);
            }
            Ok(Expr::func("regexp_contains", vec![a.expr(0)?, Expr::lit(literal_str(a, 1, "pat")?)]))
        }),
    )?;
    s.scalar(
        "str.replace",
        imp(|a| {
            let name = if a.bool(3, "regex", true)? { "regexp_replace" } else { "replace" };
            Ok(Expr::func(name, vec![a.expr(0)?, a.expr(1)?, a.expr(2)?]))
        }),
    )?;

    s.agg("any", bq_any(false))?;
    s.agg("all", bq_all(false))?;
    s.agg("std", agg("stddev"))?;
    s.agg("var", agg("variance"))?;
    s.bound(FuncKind::Aggregate, "median", QUANTILE_ERROR)?;
    s.bound(FuncKind::Aggregate, "quantile", QUANTILE_ERROR)?;

    s.window("any", bq_any(true))?;
    s.window("all", bq_all(true))?;
    s.window(
        "median",
        imp(|a| Ok(over(Expr::func("percentile_cont", vec![a.expr(0)?, Expr::lit(0.5)]), WindowKind::Rank, None))),
    )?;
    s.window(
        "quantile",
        imp(|a| {
            let f = Expr::func("percentile_cont", vec![a.expr(0)?, Expr::lit(quantile_arg(a)?)]);
            Ok(over(f, WindowKind::Rank, None))
        }),
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::render_expr;
    use crate::translate::SqlValue;
    use tql_registry::LocalTable;

    fn call(dialect: Dialect, kind: FuncKind, name: &str, args: Vec<Expr>) -> Result<String, SqlError> {
        let tables = sql_funcs(dialect)?;
        let entry = tables
            .table(kind)
            .get(name)
            .ok_or_else(|| unsupported(format!("no {}", name)))?
            .clone();
        let f = entry.implemented()?.clone();
        let t = f.downcast::<SqlTranslation>().expect("sql translation");
        let expr = t.apply(args.into_iter().map(SqlValue::Expr).collect(), Vec::new())?;
        Ok(render_expr(&expr, dialect))
    }

    fn x() -> Expr {
        Expr::column(crate::ast::Relation::Table("t".into()), "x")
    }

    #[test]
    fn test_every_dialect_compiles() {
        for d in Dialect::ALL {
            let tables = sql_funcs(d).unwrap();
            assert!(tables.missing_window_names().is_empty(), "{}: {:?}", d, tables.missing_window_names());
            assert_eq!(tables.context(), d.name());
            for name in WINDOW_NAMES {
                assert!(tables.window_context().lookup(name).is_some(), "{} lacks {}", d, name);
            }
        }
    }

    #[test]
    fn test_dialect_inheritance() {
        let std = call(Dialect::Duckdb, FuncKind::Aggregate, "std", vec![x()]).unwrap();
        assert_eq!(std, "stddev_samp(t.x)");
        let std = call(Dialect::Spark, FuncKind::Aggregate, "std", vec![x()]).unwrap();
        assert_eq!(std, "stddev(t.x)");
        let div = call(Dialect::Redshift, FuncKind::Elementwise, "__truediv__", vec![x(), Expr::lit(2)]).unwrap();
        assert_eq!(div, "CAST(t.x AS DOUBLE PRECISION) / 2");
    }

    #[test]
    fn test_floor_division() {
        let args = || vec![x(), Expr::lit(2)];
        assert_eq!(
            call(Dialect::Postgresql, FuncKind::Elementwise, "__floordiv__", args()).unwrap(),
            "CAST(t.x / 2 AS INTEGER)"
        );
        assert_eq!(call(Dialect::Mysql, FuncKind::Elementwise, "__floordiv__", args()).unwrap(), "t.x DIV 2");
        assert_eq!(
            call(Dialect::Bigquery, FuncKind::Elementwise, "__floordiv__", args()).unwrap(),
            "floor(t.x / 2)"
        );
        assert_eq!(call(Dialect::Bigquery, FuncKind::Elementwise, "__mod__", args()).unwrap(), "mod(t.x, 2)");
    }

    #[test]
    fn test_lookup_bound_entries() {
        let sqlite = sql_funcs(Dialect::Sqlite).unwrap();
        assert!(sqlite.table(FuncKind::Window).get("cumsum").unwrap().is_bound());
        assert!(sqlite.table(FuncKind::Aggregate).get("std").unwrap().is_bound());

        let bq = sql_funcs(Dialect::Bigquery).unwrap();
        assert!(bq.table(FuncKind::Aggregate).get("median").unwrap().is_bound());
        assert!(!bq.table(FuncKind::Window).get("median").unwrap().is_bound());

        let duck = sql_funcs(Dialect::Duckdb).unwrap();
        assert!(duck.table(FuncKind::Elementwise).get("str.title").unwrap().is_bound());
        assert!(duck.table(FuncKind::Elementwise).get("__pow__").unwrap().is_bound());
    }

    #[test]
    fn test_dayofweek_per_dialect() {
        assert_eq!(
            call(Dialect::Postgresql, FuncKind::Elementwise, "dt.dayofweek", vec![x()]).unwrap(),
            "CAST(EXTRACT(dow FROM t.x) + 6 AS INTEGER) % 7"
        );
        assert_eq!(
            call(Dialect::Mysql, FuncKind::Elementwise, "dt.dayofweek", vec![x()]).unwrap(),
            "(dayofweek(t.x) + 5) % 7"
        );
        assert_eq!(
            call(Dialect::Bigquery, FuncKind::Elementwise, "dt.dayofweek", vec![x()]).unwrap(),
            "EXTRACT(DAYOFWEEK FROM t.x) - 2"
        );
    }

    #[test]
    fn test_string_translations() {
        let pat = || vec![x(), Expr::lit("a_b")];
        assert_eq!(
            call(Dialect::Spark, FuncKind::Elementwise, "str.contains", pat()).unwrap(),
            "t.x LIKE '%a\\\\_b%' ESCAPE '\\\\'"
        );
        assert_eq!(
            call(Dialect::Postgresql, FuncKind::Elementwise, "str.contains", pat()).unwrap(),
            "t.x ~ 'a_b'"
        );
        assert_eq!(
            call(Dialect::Duckdb, FuncKind::Elementwise, "str.contains", pat()).unwrap(),
            "regexp_matches(t.x, 'a_b')"
        );
        assert_eq!(
            call(Dialect::Postgresql, FuncKind::Elementwise, "str.startswith", vec![x(), Expr::lit("ab")]).unwrap(),
            "t.x LIKE 'ab%'"
        );
    }

    #[test]
    fn test_window_shapes() {
        assert_eq!(
            call(Dialect::Duckdb, FuncKind::Window, "rank", vec![x()]).unwrap(),
            "rank() OVER (ORDER BY t.x) + (count(*) OVER (PARTITION BY t.x) - 1) / 2.0"
        );
        assert_eq!(
            call(Dialect::Duckdb, FuncKind::Window, "cumsum", vec![x()]).unwrap(),
            "sum(t.x) OVER (ROWS BETWEEN UNBOUNDED PRECEDING AND CURRENT ROW)"
        );
        assert_eq!(
            call(Dialect::Postgresql, FuncKind::Aggregate, "median", vec![x()]).unwrap(),
            "percentile_cont(0.5) WITHIN GROUP (ORDER BY t.x)"
        );
        assert!(call(Dialect::Duckdb, FuncKind::Window, "diff", vec![x(), Expr::lit(0)]).is_err());
    }
}
