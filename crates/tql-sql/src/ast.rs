//! SQL expression and query trees
//!
//! A small column-expression model covering what the dialect tables emit.
//! Trees are dialect independent; [`crate::render`] prints them for one
//! dialect with literals inlined.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tql_frame::JoinKind;
use tql_ir::{BinaryOperator, Value};
use tracing::warn;

static NEXT_ALIAS: AtomicU64 = AtomicU64::new(1);

/// Name of an anonymous subquery. Printed as `anon_N`, numbered in order of
/// appearance when a query is rendered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Alias(u64);

impl Alias {
    pub fn fresh() -> Self {
        Alias(NEXT_ALIAS.fetch_add(1, Ordering::Relaxed))
    }
}

/// What a column reference is qualified by.
#[derive(Debug, Clone, PartialEq)]
pub enum Relation {
    Table(String),
    Anon(Alias),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SqlType {
    Integer,
    Float,
    Numeric,
    Text,
    Boolean,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SqlOp {
    Add,
    Sub,
    Mul,
    Div,
    /// MySQL integer division, `x DIV y`
    IntDiv,
    Mod,
    Concat,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    /// PostgreSQL regex match, `~` or `~*`
    Regex { case_insensitive: bool },
    And,
    Or,
}

impl SqlOp {
    /// Binding strength; higher binds tighter.
    pub fn level(&self) -> u8 {
        match self {
            SqlOp::Or => 1,
            SqlOp::And => 2,
            SqlOp::Eq | SqlOp::Ne | SqlOp::Lt | SqlOp::Le | SqlOp::Gt | SqlOp::Ge | SqlOp::Regex { .. } => 4,
            SqlOp::Add | SqlOp::Sub | SqlOp::Concat => 6,
            SqlOp::Mul | SqlOp::Div | SqlOp::IntDiv | SqlOp::Mod => 7,
        }
    }

    pub fn is_comparison(&self) -> bool {
        self.level() == 4
    }

    pub fn symbol(&self) -> &'static str {
        match self {
            SqlOp::Add => "+",
            SqlOp::Sub => "-",
            SqlOp::Mul => "*",
            SqlOp::Div => "/",
            SqlOp::IntDiv => "DIV",
            SqlOp::Mod => "%",
            SqlOp::Concat => "||",
            SqlOp::Eq => "=",
            SqlOp::Ne => "!=",
            SqlOp::Lt => "<",
            SqlOp::Le => "<=",
            SqlOp::Gt => ">",
            SqlOp::Ge => ">=",
            SqlOp::Regex { case_insensitive: false } => "~",
            SqlOp::Regex { case_insensitive: true } => "~*",
            SqlOp::And => "AND",
            SqlOp::Or => "OR",
        }
    }

    /// SQL counterpart of a captured operator, where there is a direct one.
    pub fn from_operator(op: BinaryOperator) -> Option<SqlOp> {
        let op = match op {
            BinaryOperator::Add => SqlOp::Add,
            BinaryOperator::Sub => SqlOp::Sub,
            BinaryOperator::Mul => SqlOp::Mul,
            BinaryOperator::TrueDiv => SqlOp::Div,
            BinaryOperator::Mod => SqlOp::Mod,
            BinaryOperator::And => SqlOp::And,
            BinaryOperator::Or => SqlOp::Or,
            BinaryOperator::Gt => SqlOp::Gt,
            BinaryOperator::Lt => SqlOp::Lt,
            BinaryOperator::Eq => SqlOp::Eq,
            BinaryOperator::Ne => SqlOp::Ne,
            BinaryOperator::Ge => SqlOp::Ge,
            BinaryOperator::Le => SqlOp::Le,
            _ => return None,
        };
        Some(op)
    }
}

/// How a window takes the accumulator's grouping and ordering.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowKind {
    /// aggregate over the whole partition: partition only
    Agg,
    /// ranking with its own ordering: the grouping is added to its partition
    Rank,
    /// running or offset functions: partition and the current ordering
    Cumulative,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameBound {
    UnboundedPreceding,
    CurrentRow,
    UnboundedFollowing,
}

/// `ROWS BETWEEN start AND end`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowFrame {
    pub start: FrameBound,
    pub end: FrameBound,
}

impl WindowFrame {
    pub const RUNNING: WindowFrame = WindowFrame {
        start: FrameBound::UnboundedPreceding,
        end: FrameBound::CurrentRow,
    };

    pub const WHOLE: WindowFrame = WindowFrame {
        start: FrameBound::UnboundedPreceding,
        end: FrameBound::UnboundedFollowing,
    };
}

#[derive(Debug, Clone, PartialEq)]
pub struct SortKey {
    pub expr: Expr,
    pub desc: bool,
}

impl SortKey {
    /// `desc(x)` marks a descending key.
    pub fn from_expr(expr: Expr) -> Self {
        match expr {
            Expr::Desc(inner) => SortKey { expr: *inner, desc: true },
            expr => SortKey { expr, desc: false },
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Column { rel: Option<Relation>, name: String },
    Literal(Value),
    Star,
    Binary { op: SqlOp, left: Box<Expr>, right: Box<Expr> },
    Not(Box<Expr>),
    Neg(Box<Expr>),
    Function { name: String, args: Vec<Expr>, distinct: bool },
    Cast { expr: Box<Expr>, to: SqlType },
    Case { whens: Vec<(Expr, Expr)>, otherwise: Option<Box<Expr>> },
    Over {
        func: Box<Expr>,
        kind: WindowKind,
        partition_by: Vec<Expr>,
        order_by: Vec<SortKey>,
        frame: Option<WindowFrame>,
    },
    WithinGroup { func: Box<Expr>, order_by: Vec<SortKey> },
    IsNull { expr: Box<Expr>, negated: bool },
    InList { expr: Box<Expr>, list: Vec<Expr>, negated: bool },
    Between { expr: Box<Expr>, low: Box<Expr>, high: Box<Expr> },
    /// `expr LIKE pattern`, with `\` as escape character when the pattern needs one
    Like { expr: Box<Expr>, pattern: String, escaped: bool },
    Exists { select: Arc<Select>, negated: bool },
    Extract { field: String, expr: Box<Expr> },
    Interval { value: i64, unit: String },
    /// Descending marker, meaningful only as a sort key.
    Desc(Box<Expr>),
    Raw(String),
}

impl Expr {
    pub fn column(rel: Relation, name: impl Into<String>) -> Expr {
        Expr::Column {
            rel: Some(rel),
            name: name.into(),
        }
    }

    pub fn lit(value: impl Into<Value>) -> Expr {
        Expr::Literal(value.into())
    }

    pub fn func(name: &str, args: Vec<Expr>) -> Expr {
        Expr::Function {
            name: name.to_string(),
            args,
            distinct: false,
        }
    }

    pub fn binary(op: SqlOp, left: Expr, right: Expr) -> Expr {
        Expr::Binary {
            op,
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    pub fn cast(expr: Expr, to: SqlType) -> Expr {
        Expr::Cast {
            expr: Box::new(expr),
            to,
        }
    }

    pub fn over(func: Expr, kind: WindowKind) -> Expr {
        Expr::Over {
            func: Box::new(func),
            kind,
            partition_by: Vec::new(),
            order_by: Vec::new(),
            frame: None,
        }
    }

    pub fn extract(field: &str, expr: Expr) -> Expr {
        Expr::Extract {
            field: field.to_string(),
            expr: Box::new(expr),
        }
    }

    pub fn is_null(expr: Expr, negated: bool) -> Expr {
        Expr::IsNull {
            expr: Box::new(expr),
            negated,
        }
    }

    /// `x LIKE prefix || value || suffix` for a literal value.
    pub fn like(expr: Expr, prefix: &str, value: &str, suffix: &str) -> Expr {
        let escaped = value.contains(['\\', '%', '_']);
        let mut pattern = String::from(prefix);
        for c in value.chars() {
            if matches!(c, '\\' | '%' | '_') {
                pattern.push('\\');
            }
            pattern.push(c);
        }
        pattern.push_str(suffix);
        Expr::Like {
            expr: Box::new(expr),
            pattern,
            escaped,
        }
    }

    pub fn as_literal(&self) -> Option<&Value> {
        match self {
            Expr::Literal(v) => Some(v),
            _ => None,
        }
    }

    pub fn children(&self) -> Vec<&Expr> {
        match self {
            Expr::Column { .. }
            | Expr::Literal(_)
            | Expr::Star
            | Expr::Exists { .. }
            | Expr::Interval { .. }
            | Expr::Raw(_) => Vec::new(),
            Expr::Binary { left, right, .. } => vec![left, right],
            Expr::Not(e) | Expr::Neg(e) | Expr::Desc(e) => vec![e],
            Expr::Function { args, .. } => args.iter().collect(),
            Expr::Cast { expr, .. } | Expr::Extract { expr, .. } | Expr::Like { expr, .. } => vec![expr],
            Expr::IsNull { expr, .. } => vec![expr],
            Expr::Case { whens, otherwise } => {
                let mut out: Vec<&Expr> = whens.iter().flat_map(|(c, v)| [c, v]).collect();
                out.extend(otherwise.as_deref());
                out
            }
            Expr::Over {
                func,
                partition_by,
                order_by,
                ..
            } => {
                let mut out = vec![func.as_ref()];
                out.extend(partition_by);
                out.extend(order_by.iter().map(|k| &k.expr));
                out
            }
            Expr::WithinGroup { func, order_by } => {
                let mut out = vec![func.as_ref()];
                out.extend(order_by.iter().map(|k| &k.expr));
                out
            }
            Expr::InList { expr, list, .. } => {
                let mut out = vec![expr.as_ref()];
                out.extend(list);
                out
            }
            Expr::Between { expr, low, high } => vec![expr, low, high],
        }
    }

    fn map_children(&self, mut f: impl FnMut(&Expr) -> Expr) -> Expr {
        let mut b = |e: &Expr| Box::new(f(e));
        match self {
            Expr::Column { .. }
            | Expr::Literal(_)
            | Expr::Star
            | Expr::Exists { .. }
            | Expr::Interval { .. }
            | Expr::Raw(_) => self.clone(),
            Expr::Binary { op, left, right } => Expr::Binary {
                op: *op,
                left: b(left),
                right: b(right),
            },
            Expr::Not(e) => Expr::Not(b(e)),
            Expr::Neg(e) => Expr::Neg(b(e)),
            Expr::Desc(e) => Expr::Desc(b(e)),
            Expr::Function { name, args, distinct } => Expr::Function {
                name: name.clone(),
                args: args.iter().map(|a| *b(a)).collect(),
                distinct: *distinct,
            },
            Expr::Cast { expr, to } => Expr::Cast { expr: b(expr), to: *to },
            Expr::Extract { field, expr } => Expr::Extract {
                field: field.clone(),
                expr: b(expr),
            },
            Expr::Like { expr, pattern, escaped } => Expr::Like {
                expr: b(expr),
                pattern: pattern.clone(),
                escaped: *escaped,
            },
            Expr::IsNull { expr, negated } => Expr::IsNull {
                expr: b(expr),
                negated: *negated,
            },
            Expr::Case { whens, otherwise } => Expr::Case {
                whens: whens.iter().map(|(c, v)| (*b(c), *b(v))).collect(),
                otherwise: otherwise.as_deref().map(&mut b),
            },
            Expr::Over {
                func,
                kind,
                partition_by,
                order_by,
                frame,
            } => Expr::Over {
                func: b(func),
                kind: *kind,
                partition_by: partition_by.iter().map(|e| *b(e)).collect(),
                order_by: order_by
                    .iter()
                    .map(|k| SortKey {
                        expr: *b(&k.expr),
                        desc: k.desc,
                    })
                    .collect(),
                frame: *frame,
            },
            Expr::WithinGroup { func, order_by } => Expr::WithinGroup {
                func: b(func),
                order_by: order_by
                    .iter()
                    .map(|k| SortKey {
                        expr: *b(&k.expr),
                        desc: k.desc,
                    })
                    .collect(),
            },
            Expr::InList { expr, list, negated } => Expr::InList {
                expr: b(expr),
                list: list.iter().map(|e| *b(e)).collect(),
                negated: *negated,
            },
            Expr::Between { expr, low, high } => Expr::Between {
                expr: b(expr),
                low: b(low),
                high: b(high),
            },
        }
    }

    /// Top-down rewrite. `f` either replaces a node, subtree included, or
    /// returns `None` to descend into its children.
    pub fn rewrite(&self, f: &mut dyn FnMut(&Expr) -> Option<Expr>) -> Expr {
        if let Some(replaced) = f(self) {
            return replaced;
        }
        self.map_children(|c| c.rewrite(f))
    }

    pub fn any(&self, pred: &dyn Fn(&Expr) -> bool) -> bool {
        pred(self) || self.children().into_iter().any(|c| c.any(pred))
    }

    pub fn contains_window(&self) -> bool {
        self.any(&|e| matches!(e, Expr::Over { .. }))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SelectItem {
    pub expr: Expr,
    pub name: String,
}

impl SelectItem {
    pub fn new(name: impl Into<String>, expr: Expr) -> Self {
        Self { expr, name: name.into() }
    }

    /// A bare column reference rather than a computed label.
    pub fn is_plain(&self) -> bool {
        matches!(self.expr, Expr::Column { .. })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum FromItem {
    Table(String),
    Subquery { select: Arc<Select>, alias: Alias },
    Join {
        kind: JoinKind,
        left: Box<FromItem>,
        right: Box<FromItem>,
        on: Vec<(Expr, Expr)>,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Select {
    /// Empty means `*`.
    pub items: Vec<SelectItem>,
    pub from: FromItem,
    pub filters: Vec<Expr>,
    pub group_by: Vec<Expr>,
    pub order_by: Vec<SortKey>,
    pub limit: Option<u64>,
    pub distinct: bool,
}

impl Select {
    pub fn new(items: Vec<SelectItem>, from: FromItem) -> Self {
        Self {
            items,
            from,
            filters: Vec::new(),
            group_by: Vec::new(),
            order_by: Vec::new(),
            limit: None,
            distinct: false,
        }
    }

    /// `SELECT t.a, t.b, ... FROM t`
    pub fn from_table(table: &str, columns: &[String]) -> Self {
        let items = columns
            .iter()
            .map(|c| SelectItem::new(c.clone(), Expr::column(Relation::Table(table.to_string()), c.clone())))
            .collect();
        Self::new(items, FromItem::Table(table.to_string()))
    }

    pub fn column_names(&self) -> Vec<String> {
        self.items.iter().map(|i| i.name.clone()).collect()
    }

    pub fn item(&self, name: &str) -> Option<&Expr> {
        self.items.iter().find(|i| i.name == name).map(|i| &i.expr)
    }

    /// Replace a column in place, or append it.
    pub fn upsert(&mut self, name: &str, expr: Expr) {
        match self.items.iter_mut().find(|i| i.name == name) {
            Some(item) => item.expr = expr,
            None => self.items.push(SelectItem::new(name, expr)),
        }
    }

    /// New columns can be added without changing which rows come out.
    pub fn is_simple(&self) -> bool {
        self.group_by.is_empty() && self.limit.is_none() && !self.distinct
    }

    /// Names of computed columns.
    pub fn derived_names(&self) -> BTreeSet<String> {
        self.items.iter().filter(|i| !i.is_plain()).map(|i| i.name.clone()).collect()
    }

    /// `SELECT anon.a, ... FROM (self) AS anon`
    pub fn wrap(self) -> Select {
        let names = self.column_names();
        self.wrap_as(Alias::fresh(), &names)
    }

    /// Select `names` from this query as a subquery named `alias`. The
    /// ordering moves to the outer query; sort keys that are not columns of
    /// the subquery are added to it as unselected `sortN` columns.
    pub fn wrap_as(mut self, alias: Alias, names: &[String]) -> Select {
        let outer_ref = |name: &str| Expr::column(Relation::Anon(alias), name);
        let mut moved = Vec::new();
        for key in self.order_by.clone() {
            let name = match self.items.iter().find(|i| i.expr == key.expr) {
                Some(item) => item.name.clone(),
                // DISTINCT would change under an extra column
                None if self.distinct => {
                    warn!(keys = self.order_by.len(), "Ordering of a distinct subquery is not carried outside it");
                    moved.clear();
                    break;
                }
                None => {
                    let name = (1..)
                        .map(|i| format!("sort{}", i))
                        .find(|n| self.items.iter().all(|item| &item.name != n))
                        .unwrap_or_default();
                    self.items.push(SelectItem::new(name.clone(), key.expr.clone()));
                    name
                }
            };
            moved.push(SortKey {
                expr: outer_ref(&name),
                desc: key.desc,
            });
        }
        if !moved.is_empty() && self.limit.is_none() {
            self.order_by.clear();
        }

        let items = names.iter().map(|n| SelectItem::new(n.clone(), outer_ref(n))).collect();
        let mut outer = Select::new(
            items,
            FromItem::Subquery {
                select: Arc::new(self),
                alias,
            },
        );
        outer.order_by = moved;
        outer
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table() -> Select {
        Select::from_table("t", &["a".to_string(), "b".to_string()])
    }

    #[test]
    fn test_like_escapes_wildcards() {
        let e = Expr::like(Expr::lit(1), "", "5%_off", "%");
        match e {
            Expr::Like { pattern, escaped, .. } => {
                assert_eq!(pattern, "5\\%\\_off%");
                assert!(escaped);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_rewrite_is_top_down() {
        let a = Expr::column(Relation::Table("t".into()), "a");
        let e = Expr::binary(SqlOp::Add, a.clone(), Expr::func("abs", vec![a.clone()]));
        let out = e.rewrite(&mut |x| (x == &a).then(|| Expr::lit(0)));
        assert_eq!(out, Expr::binary(SqlOp::Add, Expr::lit(0), Expr::func("abs", vec![Expr::lit(0)])));
    }

    #[test]
    fn test_upsert_keeps_position() {
        let mut sel = table();
        sel.upsert("a", Expr::lit(1));
        sel.upsert("c", Expr::lit(2));
        assert_eq!(sel.column_names(), vec!["a", "b", "c"]);
        assert_eq!(sel.derived_names().into_iter().collect::<Vec<_>>(), vec!["a", "c"]);
    }

    #[test]
    fn test_wrap_moves_ordering() {
        let mut sel = table();
        sel.order_by = vec![SortKey {
            expr: sel.items[1].expr.clone(),
            desc: true,
        }];
        let outer = sel.wrap();
        assert_eq!(outer.order_by.len(), 1);
        assert!(outer.order_by[0].desc);
        match &outer.from {
            FromItem::Subquery { select, .. } => assert!(select.order_by.is_empty()),
            other => panic!("unexpected {:?}", other),
        }
        assert!(outer.derived_names().is_empty());
    }

    #[test]
    fn test_wrap_keeps_ordering_on_computed_key() {
        let mut sel = table();
        let key = Expr::binary(SqlOp::Add, sel.items[0].expr.clone(), sel.items[1].expr.clone());
        sel.order_by = vec![SortKey { expr: key.clone(), desc: false }];
        let alias = Alias::fresh();
        let outer = sel.wrap_as(alias, &["a".to_string()]);

        assert_eq!(outer.column_names(), vec!["a"]);
        assert_eq!(outer.order_by.len(), 1);
        assert_eq!(outer.order_by[0].expr, Expr::column(Relation::Anon(alias), "sort1"));
        match &outer.from {
            FromItem::Subquery { select, .. } => {
                assert_eq!(select.item("sort1"), Some(&key));
                assert!(select.order_by.is_empty());
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_wrap_distinct_keeps_inner_ordering() {
        let mut sel = table();
        sel.distinct = true;
        let key = Expr::func("abs", vec![sel.items[0].expr.clone()]);
        sel.order_by = vec![SortKey { expr: key, desc: true }];
        let outer = sel.wrap();

        assert!(outer.order_by.is_empty());
        match &outer.from {
            FromItem::Subquery { select, .. } => {
                assert_eq!(select.order_by.len(), 1);
                assert_eq!(select.column_names(), vec!["a", "b"]);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_window_detection() {
        let win = Expr::over(Expr::func("rank", vec![]), WindowKind::Rank);
        assert!(Expr::binary(SqlOp::Le, win, Expr::lit(1)).contains_window());
        assert!(!Expr::func("abs", vec![Expr::lit(-1)]).contains_window());
    }
}
