//! SQL text for one dialect, literals inlined

use crate::ast::{Alias, Expr, FrameBound, FromItem, Relation, Select, SortKey, SqlOp};
use crate::dialect::Dialect;
use std::collections::HashMap;
use tql_frame::JoinKind;
use tql_ir::Value;

/// Render a query. Anonymous subqueries are numbered `anon_1`, `anon_2`, ...
/// in order of first appearance.
pub fn render(select: &Select, dialect: Dialect) -> String {
    Renderer::new(dialect).select(select)
}

/// Render one expression on its own.
pub fn render_expr(expr: &Expr, dialect: Dialect) -> String {
    Renderer::new(dialect).expr(expr)
}

/// Binding strength of atoms: function calls, columns, literals.
const ATOM: u8 = 10;
const NEG: u8 = 9;
const NOT: u8 = 3;
const PREDICATE: u8 = 4;

struct Renderer {
    dialect: Dialect,
    aliases: HashMap<Alias, usize>,
}

impl Renderer {
    fn new(dialect: Dialect) -> Self {
        Self {
            dialect,
            aliases: HashMap::new(),
        }
    }

    fn alias(&mut self, alias: Alias) -> String {
        let next = self.aliases.len() + 1;
        let n = *self.aliases.entry(alias).or_insert(next);
        format!("anon_{}", n)
    }

    fn ident(&self, name: &str) -> String {
        self.dialect.quote_ident(name)
    }

    fn select(&mut self, sel: &Select) -> String {
        let mut out = String::from("SELECT ");
        if sel.distinct {
            out.push_str("DISTINCT ");
        }
        if sel.items.is_empty() {
            out.push('*');
        } else {
            let items: Vec<String> = sel
                .items
                .iter()
                .map(|item| {
                    let expr = self.expr(&item.expr);
                    match &item.expr {
                        Expr::Column { name, .. } if *name == item.name => expr,
                        _ => format!("{} AS {}", expr, self.ident(&item.name)),
                    }
                })
                .collect();
            out.push_str(&items.join(", "));
        }

        out.push_str("\nFROM ");
        let from = self.from_item(&sel.from);
        out.push_str(&from);

        if !sel.filters.is_empty() {
            let conds: Vec<String> = sel.filters.iter().map(|f| self.wrapped(f, SqlOp::And.level() + 1)).collect();
            out.push_str("\nWHERE ");
            out.push_str(&conds.join(" AND "));
        }
        if !sel.group_by.is_empty() {
            let keys: Vec<String> = sel.group_by.iter().map(|e| self.expr(e)).collect();
            out.push_str("\nGROUP BY ");
            out.push_str(&keys.join(", "));
        }
        if !sel.order_by.is_empty() {
            out.push_str("\nORDER BY ");
            let keys = self.sort_keys(&sel.order_by);
            out.push_str(&keys);
        }
        if let Some(n) = sel.limit {
            out.push_str(&format!("\nLIMIT {}", n));
        }
        out
    }

    fn from_item(&mut self, item: &FromItem) -> String {
        match item {
            FromItem::Table(name) => self.ident(name),
            FromItem::Subquery { select, alias } => {
                // number the alias before the body so outer references come first
                let alias = self.alias(*alias);
                format!("({}) AS {}", self.select(select), alias)
            }
            FromItem::Join { kind, left, right, on } => {
                let left = self.from_item(left);
                let right = self.from_item(right);
                let conds: Vec<String> = on
                    .iter()
                    .map(|(l, r)| format!("{} = {}", self.expr(l), self.expr(r)))
                    .collect();
                let join = match kind {
                    JoinKind::Left => "LEFT OUTER JOIN",
                    JoinKind::Right => "RIGHT OUTER JOIN",
                    JoinKind::Full => "FULL OUTER JOIN",
                    JoinKind::Inner | JoinKind::Semi | JoinKind::Anti => "JOIN",
                };
                format!("{} {} {} ON {}", left, join, right, conds.join(" AND "))
            }
        }
    }

    fn sort_keys(&mut self, keys: &[SortKey]) -> String {
        keys.iter()
            .map(|k| {
                let expr = self.expr(&k.expr);
                if k.desc {
                    format!("{} DESC", expr)
                } else {
                    expr
                }
            })
            .collect::<Vec<_>>()
            .join(", ")
    }

    fn level(expr: &Expr) -> u8 {
        match expr {
            Expr::Binary { op, .. } => op.level(),
            Expr::Not(_) => NOT,
            Expr::Neg(_) => NEG,
            Expr::IsNull { .. } | Expr::InList { .. } | Expr::Between { .. } | Expr::Like { .. } => PREDICATE,
            _ => ATOM,
        }
    }

    /// Render, parenthesized when the expression binds looser than `min`.
    fn wrapped(&mut self, expr: &Expr, min: u8) -> String {
        let s = self.expr(expr);
        if Self::level(expr) < min {
            format!("({})", s)
        } else {
            s
        }
    }

    fn expr(&mut self, expr: &Expr) -> String {
        match expr {
            Expr::Column { rel, name } => {
                let name = self.ident(name);
                match rel {
                    None => name,
                    Some(Relation::Table(t)) => format!("{}.{}", self.ident(t), name),
                    Some(Relation::Anon(a)) => format!("{}.{}", self.alias(*a), name),
                }
            }
            Expr::Literal(v) => self.literal(v),
            Expr::Star => "*".to_string(),
            Expr::Binary { op, left, right } => {
                if *op == SqlOp::Concat && self.dialect == Dialect::Mysql {
                    return format!("concat({}, {})", self.expr(left), self.expr(right));
                }
                let level = op.level();
                let left_min = if op.is_comparison() { level + 1 } else { level };
                let l = self.wrapped(left, left_min);
                let r = self.wrapped(right, level + 1);
                format!("{} {} {}", l, op.symbol(), r)
            }
            Expr::Not(e) => format!("NOT {}", self.wrapped(e, ATOM)),
            Expr::Neg(e) => format!("-{}", self.wrapped(e, ATOM)),
            Expr::Function { name, args, distinct } => {
                let args: Vec<String> = args.iter().map(|a| self.expr(a)).collect();
                let prefix = if *distinct { "DISTINCT " } else { "" };
                format!("{}({}{})", name, prefix, args.join(", "))
            }
            Expr::Cast { expr, to } => format!("CAST({} AS {})", self.expr(expr), self.dialect.type_name(*to)),
            Expr::Case { whens, otherwise } => {
                let mut out = String::from("CASE");
                for (cond, value) in whens {
                    let cond = self.expr(cond);
                    let value = self.expr(value);
                    out.push_str(&format!(" WHEN {} THEN {}", cond, value));
                }
                if let Some(e) = otherwise {
                    out.push_str(&format!(" ELSE {}", self.expr(e)));
                }
                out.push_str(" END");
                out
            }
            Expr::Over {
                func,
                partition_by,
                order_by,
                frame,
                ..
            } => {
                let func = self.expr(func);
                let mut parts = Vec::new();
                if !partition_by.is_empty() {
                    let keys: Vec<String> = partition_by.iter().map(|e| self.expr(e)).collect();
                    parts.push(format!("PARTITION BY {}", keys.join(", ")));
                }
                if !order_by.is_empty() {
                    parts.push(format!("ORDER BY {}", self.sort_keys(order_by)));
                }
                if let Some(frame) = frame {
                    parts.push(format!("ROWS BETWEEN {} AND {}", bound(frame.start), bound(frame.end)));
                }
                format!("{} OVER ({})", func, parts.join(" "))
            }
            Expr::WithinGroup { func, order_by } => {
                let func = self.expr(func);
                format!("{} WITHIN GROUP (ORDER BY {})", func, self.sort_keys(order_by))
            }
            Expr::IsNull { expr, negated } => {
                let e = self.wrapped(expr, PREDICATE + 1);
                if *negated {
                    format!("{} IS NOT NULL", e)
                } else {
                    format!("{} IS NULL", e)
                }
            }
            Expr::InList { expr, list, negated } => {
                let e = self.wrapped(expr, PREDICATE + 1);
                let items: Vec<String> = list.iter().map(|i| self.expr(i)).collect();
                let not = if *negated { "NOT " } else { "" };
                format!("{} {}IN ({})", e, not, items.join(", "))
            }
            Expr::Between { expr, low, high } => {
                let e = self.wrapped(expr, PREDICATE + 1);
                let low = self.wrapped(low, PREDICATE + 1);
                let high = self.wrapped(high, PREDICATE + 1);
                format!("{} BETWEEN {} AND {}", e, low, high)
            }
            Expr::Like { expr, pattern, escaped } => {
                let e = self.wrapped(expr, PREDICATE + 1);
                let mut out = format!("{} LIKE {}", e, self.string(pattern));
                if *escaped {
                    out.push_str(&format!(" ESCAPE {}", self.string("\\")));
                }
                out
            }
            Expr::Exists { select, negated } => {
                let body = self.select(select);
                let not = if *negated { "NOT " } else { "" };
                format!("{}EXISTS ({})", not, body)
            }
            Expr::Extract { field, expr } => format!("EXTRACT({} FROM {})", field, self.expr(expr)),
            Expr::Interval { value, unit } => {
                if self.dialect.bare_intervals() {
                    format!("INTERVAL {} {}", value, unit.to_ascii_uppercase())
                } else {
                    format!("INTERVAL '{} {}'", value, unit)
                }
            }
            Expr::Desc(e) => format!("{} DESC", self.expr(e)),
            Expr::Raw(s) => s.clone(),
        }
    }

    fn string(&self, s: &str) -> String {
        let mut escaped = s.replace('\'', "''");
        if self.dialect.escapes_backslash() {
            escaped = escaped.replace('\\', "\\\\");
        }
        format!("'{}'", escaped)
    }

    fn literal(&mut self, value: &Value) -> String {
        match value {
            Value::Null => "NULL".to_string(),
            Value::Bool(b) if self.dialect == Dialect::Sqlite => (if *b { "1" } else { "0" }).to_string(),
            Value::Bool(b) => (if *b { "TRUE" } else { "FALSE" }).to_string(),
            Value::Int(i) => i.to_string(),
            Value::Float(f) if f.is_finite() => {
                let s = f.to_string();
                if s.contains(['.', 'e', 'E']) {
                    s
                } else {
                    format!("{}.0", s)
                }
            }
            Value::Float(f) => self.string(&f.to_string()),
            Value::Str(s) => self.string(s),
            Value::Date(d) => format!("DATE {}", self.string(&d.format("%Y-%m-%d").to_string())),
            Value::Timestamp(t) => format!("TIMESTAMP {}", self.string(&t.format("%Y-%m-%d %H:%M:%S%.f").to_string())),
            Value::List(items) => {
                let items: Vec<String> = items.iter().map(|v| self.literal(v)).collect();
                format!("({})", items.join(", "))
            }
            Value::Map(_) => self.string(&value.to_string()),
        }
    }
}

fn bound(b: FrameBound) -> &'static str {
    match b {
        FrameBound::UnboundedPreceding => "UNBOUNDED PRECEDING",
        FrameBound::CurrentRow => "CURRENT ROW",
        FrameBound::UnboundedFollowing => "UNBOUNDED FOLLOWING",
    }
}
