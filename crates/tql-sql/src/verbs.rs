//! Table verbs over lazy tables

use crate::ast::{Alias, Expr, FromItem, Relation, Select, SelectItem, SortKey};
use crate::lazy::LazyTbl;
use crate::window::WindowReplacer;
use crate::SqlError;
use std::sync::Arc;
use tql_frame::{count_name, join_keys, joined_columns, sort_key, JoinKind, JoinedColumn};
use tql_ir::across::{expand_conditions, expand_named};
use tql_ir::{col, sym, var_select, Node, Selection, UnaryOperator};
use tql_registry::vector::{min_rank, n};
use tracing::{debug, warn};

/// Select of the current table, wrapped as a subquery when columns can no
/// longer be added to it in place.
fn open(select: Select) -> Select {
    if select.is_simple() {
        select
    } else {
        select.wrap()
    }
}

fn has_window_columns(select: &Select) -> bool {
    select.items.iter().any(|i| i.expr.contains_window())
}

/// Whether `node` reads a column computed in `select`.
fn uses_derived(node: &Node, select: &Select) -> bool {
    let derived = select.derived_names();
    node.op_vars(false).iter().any(|v| derived.contains(v))
}

/// Point `expr` at the columns of `alias` wherever it repeats one of `items`.
fn remap(expr: &Expr, items: &[SelectItem], alias: Alias) -> Expr {
    expr.rewrite(&mut |e| match e {
        Expr::Column { rel: None, name } => Some(Expr::column(Relation::Anon(alias), name.clone())),
        Expr::Literal(_) => None,
        e => items
            .iter()
            .find(|i| &i.expr == e)
            .map(|i| Expr::column(Relation::Anon(alias), i.name.clone())),
    })
}

/// Keep `names`, in that order.
fn keep_columns(select: &mut Select, names: &[String]) -> Result<(), SqlError> {
    let items = names
        .iter()
        .map(|n| {
            select
                .item(n)
                .cloned()
                .map(|e| SelectItem::new(n.clone(), e))
                .ok_or_else(|| SqlError::UnknownColumn(n.clone()))
        })
        .collect::<Result<Vec<_>, _>>()?;
    select.items = items;
    Ok(())
}

fn union_names(first: &[String], rest: &[String]) -> Vec<String> {
    let mut out = first.to_vec();
    for name in rest {
        if !out.contains(name) {
            out.push(name.clone());
        }
    }
    out
}

/// Ordering after a selection: renamed columns follow their new name and
/// keys reading a dropped column are dropped.
fn selected_order(order_by: &[Node], selection: &Selection) -> Vec<Node> {
    order_by
        .iter()
        .filter_map(|node| {
            let (inner, desc) = sort_key(node);
            if let Some(name) = inner.simple_name() {
                let (old, new) = selection.iter().find(|(old, _)| old == name)?;
                let key = Node::column(new.clone().unwrap_or_else(|| old.clone()));
                return Some(if desc { Node::unary(UnaryOperator::Neg, key) } else { key });
            }
            let kept = inner
                .op_vars(false)
                .iter()
                .all(|v| selection.iter().any(|(old, new)| old == v && new.is_none()));
            if !kept {
                debug!(key = %node, "Dropping ordering on an unselected column");
            }
            kept.then(|| node.clone())
        })
        .collect()
}

fn renamed_groups(groups: &[String], selection: &Selection) -> Vec<String> {
    groups
        .iter()
        .filter_map(|g| {
            selection
                .iter()
                .find(|(old, _)| old == g)
                .map(|(old, new)| new.clone().unwrap_or_else(|| old.clone()))
        })
        .collect()
}

impl LazyTbl {
    /// Columns `across` ranges over; grouping columns are left out.
    fn across_columns(&self) -> Vec<String> {
        self.column_names()
            .into_iter()
            .filter(|c| !self.group_by.contains(c))
            .collect()
    }

    /// Add or replace columns. Each expression sees the columns made by the
    /// ones before it.
    pub fn mutate(&self, exprs: &[(String, Node)]) -> Result<LazyTbl, SqlError> {
        let exprs = &expand_named(exprs, &self.across_columns())?;
        let table = self.funcs.window_context();
        let mut select = open(self.current());
        for (name, node) in exprs {
            if uses_derived(node, &select) {
                select = select.wrap();
            }
            let mut expr = self.eval(node, &select, table)?;
            if expr.contains_window() {
                let (partition, order) = self.window_spec(&select)?;
                expr = WindowReplacer::new(&partition, &order).replace(&expr, None).0;
            }
            select.upsert(name, expr);
        }
        Ok(self.append(select))
    }

    /// Mutate, keeping only the grouping columns and the new ones.
    pub fn transmute(&self, exprs: &[(String, Node)]) -> Result<LazyTbl, SqlError> {
        let exprs = &expand_named(exprs, &self.across_columns())?;
        let mut out = self.mutate(exprs)?;
        let created: Vec<String> = exprs.iter().map(|(n, _)| n.clone()).collect();
        let keep = union_names(&self.group_by, &created);
        let mut select = out.current();
        keep_columns(&mut select, &keep)?;
        out.ops.pop();
        Ok(out.append(select))
    }

    /// Keep rows where every condition holds. Conditions with window
    /// functions are computed in a subquery first.
    pub fn filter(&self, conds: &[Node]) -> Result<LazyTbl, SqlError> {
        let conds = &expand_conditions(conds, &self.across_columns())?;
        let table = self.funcs.window_context();
        let mut select = self.current();
        if !select.is_simple() || has_window_columns(&select) {
            select = select.wrap();
        }

        let exprs = conds
            .iter()
            .map(|c| self.eval(c, &select, table))
            .collect::<Result<Vec<_>, _>>()?;

        if !exprs.iter().any(Expr::contains_window) {
            select.filters.extend(exprs);
            return Ok(self.append(select));
        }

        let (partition, order) = self.window_spec(&select)?;
        let replacer = WindowReplacer::new(&partition, &order);
        let names = select.column_names();
        let mut inner = select;
        let preds: Vec<Expr> = exprs
            .iter()
            .map(|e| replacer.replace(e, Some(&mut inner)).0)
            .collect();

        let alias = Alias::fresh();
        let items = inner.items.clone();
        debug!(windows = items.len() - names.len(), "Computing filter windows in a subquery");
        let mut outer = inner.wrap_as(alias, &names);
        outer.filters = preds.iter().map(|p| remap(p, &items, alias)).collect();
        Ok(self.append(outer))
    }

    /// One row per group. Grouping and ordering are dropped from the result.
    pub fn summarize(&self, exprs: &[(String, Node)]) -> Result<LazyTbl, SqlError> {
        let exprs = &expand_named(exprs, &self.across_columns())?;
        for (i, (name, node)) in exprs.iter().enumerate() {
            let vars = node.op_vars(false);
            let earlier: Vec<&str> = exprs[..i]
                .iter()
                .map(|(n, _)| n.as_str())
                .filter(|n| vars.contains(*n))
                .collect();
            if !earlier.is_empty() {
                return Err(SqlError::shape(
                    "summarize",
                    name.clone(),
                    format!("refers to columns created earlier in the same call: {}", earlier.join(", ")),
                ));
            }
        }

        let current = self.current();
        let derived = current.derived_names();
        let wrap = !current.is_simple()
            || exprs.iter().any(|(_, node)| uses_derived(node, &current))
            || self.group_by.iter().any(|g| derived.contains(g));
        let base = if wrap { current.wrap() } else { current };

        let table = self.funcs.aggregate_context();
        let mut items = Vec::new();
        let mut group_exprs = Vec::new();
        for g in &self.group_by {
            let expr = base.item(g).cloned().ok_or_else(|| SqlError::UnknownColumn(g.clone()))?;
            items.push(SelectItem::new(g.clone(), expr.clone()));
            group_exprs.push(expr);
        }
        let mut out = Select::new(items, base.from.clone());
        out.filters = base.filters.clone();
        out.group_by = group_exprs;
        for (name, node) in exprs {
            let expr = self.eval(node, &base, table)?;
            out.upsert(name, expr);
        }

        let mut tbl = self.append(out);
        tbl.group_by.clear();
        tbl.order_by.clear();
        Ok(tbl)
    }

    /// Sort by `exprs`, replacing any earlier ordering. `-x` and `desc(x)`
    /// sort descending.
    pub fn arrange(&self, exprs: &[Node]) -> Result<LazyTbl, SqlError> {
        let table = self.funcs.window_context();
        let mut select = self.current();
        if select.limit.is_some() || has_window_columns(&select) {
            select = select.wrap();
        }
        let mut keys = exprs
            .iter()
            .map(|node| {
                let (inner, desc) = sort_key(node);
                let key = SortKey::from_expr(self.eval(inner, &select, table)?);
                Ok(SortKey {
                    expr: key.expr,
                    desc: key.desc != desc,
                })
            })
            .collect::<Result<Vec<_>, SqlError>>()?;
        if keys.iter().any(|k| k.expr.contains_window()) {
            let (partition, order) = self.window_spec(&select)?;
            let replacer = WindowReplacer::new(&partition, &order);
            for key in keys.iter_mut() {
                key.expr = replacer.replace(&key.expr, None).0;
            }
        }
        select.order_by = keys;

        let mut tbl = self.append(select);
        tbl.order_by = exprs.to_vec();
        Ok(tbl)
    }

    /// Tidy selection. Grouping columns are always kept.
    pub fn select(&self, selectors: &[Node]) -> Result<LazyTbl, SqlError> {
        let mut select = self.current();
        if select.distinct {
            select = select.wrap();
        }
        let mut selection = var_select(&select.column_names(), selectors)?;
        let missing: Vec<String> = self
            .group_by
            .iter()
            .filter(|g| !selection.iter().any(|(c, _)| c == *g))
            .cloned()
            .collect();
        if !missing.is_empty() {
            warn!(columns = ?missing, "Adding missing grouping variables");
            let mut with_groups: Selection = missing.into_iter().map(|g| (g, None)).collect();
            with_groups.append(&mut selection);
            selection = with_groups;
        }

        let mut tbl = self.apply_selection(select, &selection)?;
        tbl.group_by = renamed_groups(&self.group_by, &selection);
        tbl.order_by = selected_order(&self.order_by, &selection);
        Ok(tbl)
    }

    /// `(new, _.old)` pairs; every other column is kept.
    pub fn rename(&self, pairs: &[(String, Node)]) -> Result<LazyTbl, SqlError> {
        let select = self.current();
        let mut selection: Selection = select.column_names().into_iter().map(|c| (c, None)).collect();
        for (new, node) in pairs {
            let old = node.simple_name().ok_or_else(|| {
                SqlError::shape("rename", new.clone(), format!("must name an existing column, got {}", node))
            })?;
            let entry = selection
                .iter_mut()
                .find(|(c, _)| c == old)
                .ok_or_else(|| SqlError::UnknownColumn(old.to_string()))?;
            entry.1 = Some(new.clone());
        }
        let mut tbl = self.apply_selection(select, &selection)?;
        tbl.group_by = renamed_groups(&self.group_by, &selection);
        tbl.order_by = selected_order(&self.order_by, &selection);
        Ok(tbl)
    }

    fn apply_selection(&self, mut select: Select, selection: &Selection) -> Result<LazyTbl, SqlError> {
        let items = selection
            .iter()
            .map(|(old, new)| {
                let expr = select.item(old).cloned().ok_or_else(|| SqlError::UnknownColumn(old.clone()))?;
                Ok(SelectItem::new(new.clone().unwrap_or_else(|| old.clone()), expr))
            })
            .collect::<Result<Vec<_>, SqlError>>()?;
        select.items = items;
        Ok(self.append(select))
    }

    /// Column names for positional arguments, computing the ones that are
    /// not plain columns under their printed form.
    fn named_args(&self, args: &[Node], kwargs: &[(String, Node)]) -> Result<(LazyTbl, Vec<String>), SqlError> {
        let mut exprs = Vec::new();
        let mut names = Vec::new();
        for arg in args {
            match arg.simple_name() {
                Some(name) => names.push(name.to_string()),
                None => {
                    let name = arg.to_string();
                    exprs.push((name.clone(), arg.clone()));
                    names.push(name);
                }
            }
        }
        for (name, node) in kwargs {
            exprs.push((name.clone(), node.clone()));
            names.push(name.clone());
        }
        let tbl = if exprs.is_empty() { self.clone() } else { self.mutate(&exprs)? };
        let columns = tbl.column_names();
        if let Some(missing) = names.iter().find(|n| !columns.contains(n)) {
            return Err(SqlError::UnknownColumn(missing.clone()));
        }
        Ok((tbl, names))
    }

    /// Unique rows over the given columns (all columns when none are given).
    pub fn distinct(&self, args: &[Node], kwargs: &[(String, Node)], keep_all: bool) -> Result<LazyTbl, SqlError> {
        let (tbl, names) = self.named_args(args, kwargs)?;
        if keep_all && !names.is_empty() {
            return Err(SqlError::Unsupported(
                "distinct with keep_all over a subset of columns".to_string(),
            ));
        }
        let mut select = open(tbl.current());
        if has_window_columns(&select) {
            select = select.wrap();
        }
        if !names.is_empty() {
            keep_columns(&mut select, &union_names(&self.group_by, &names))?;
        }
        select.distinct = true;
        Ok(tbl.append(select))
    }

    /// Rows (or the sum of `wt`) per combination of the grouping columns and
    /// `args`, in column `name` (default `n`), largest first when `sort`.
    pub fn count(
        &self,
        args: &[Node],
        kwargs: &[(String, Node)],
        wt: Option<&Node>,
        sort: bool,
        name: Option<&str>,
    ) -> Result<LazyTbl, SqlError> {
        let (tbl, names) = self.named_args(args, kwargs)?;
        let keys = union_names(&self.group_by, &names);
        let n_name = count_name(&keys, name);
        let n_name = n_name.as_str();

        let mut select = open(tbl.current());
        if has_window_columns(&select) || !select.derived_names().is_empty() {
            select = select.wrap();
        }
        let items = keys
            .iter()
            .map(|k| {
                select
                    .item(k)
                    .cloned()
                    .map(|e| SelectItem::new(k.clone(), e))
                    .ok_or_else(|| SqlError::UnknownColumn(k.clone()))
            })
            .collect::<Result<Vec<_>, SqlError>>()?;
        let mut out = Select::new(items, select.from.clone());
        out.filters = select.filters.clone();
        out.group_by = out.items.iter().map(|i| i.expr.clone()).collect();
        let tally = match wt {
            Some(node) => {
                let expr = tbl.eval(node, &select, self.funcs.window_context())?;
                if expr.contains_window() {
                    return Err(SqlError::shape("count", "wt", "cannot use window functions"));
                }
                Expr::func("sum", vec![expr])
            }
            None => Expr::func("count", vec![Expr::Star]),
        };
        out.items.push(SelectItem::new(n_name, tally));

        let mut counted = tbl.append(out);
        counted.order_by.clear();
        if sort {
            let by_n = Node::unary(UnaryOperator::Neg, col(n_name).into_node());
            counted = counted.arrange(&[by_n])?;
        }
        Ok(counted)
    }

    /// Every row, with the size (or `wt` total) of its group as a window
    /// column.
    pub fn add_count(
        &self,
        args: &[Node],
        kwargs: &[(String, Node)],
        wt: Option<&Node>,
        sort: bool,
        name: Option<&str>,
    ) -> Result<LazyTbl, SqlError> {
        let (mut tbl, names) = self.named_args(args, kwargs)?;
        let n_name = count_name(&tbl.column_names(), name);
        let tally = match wt {
            Some(w) => Node::method(w.clone(), "sum", Vec::new()),
            None => n(sym()).into_node(),
        };
        tbl.group_by = union_names(&self.group_by, &names);
        let mut counted = tbl.mutate(&[(n_name.clone(), tally)])?;
        counted.group_by = self.group_by.clone();
        if sort {
            counted = counted.arrange(&[Node::unary(UnaryOperator::Neg, Node::column(n_name))])?;
        }
        Ok(counted)
    }

    /// Rows ranked within the top `n` by `wt`, or the bottom `|n|` when
    /// negative. Ties are kept. `wt` defaults to the last column.
    pub fn top_n(&self, n: i64, wt: Option<&Node>) -> Result<LazyTbl, SqlError> {
        let wt = match wt {
            Some(w) => w.clone(),
            None => self
                .column_names()
                .last()
                .map(Node::column)
                .ok_or_else(|| SqlError::shape("top_n", "wt", "needs a column to rank by"))?,
        };
        let cond = if n >= 0 {
            min_rank(Node::unary(UnaryOperator::Neg, wt)).le(n)
        } else {
            min_rank(wt).le(-n)
        };
        self.filter(&[cond.into_node()])
    }

    /// First `n` rows.
    pub fn head(&self, n: u64) -> Result<LazyTbl, SqlError> {
        let mut select = self.current();
        if select.limit.is_some() {
            select = select.wrap();
        }
        select.limit = Some(n);
        Ok(self.append(select))
    }

    /// Group by `args` (computing non-column ones first), replacing the
    /// current groups unless `add`.
    pub fn group_by(&self, args: &[Node], kwargs: &[(String, Node)], add: bool) -> Result<LazyTbl, SqlError> {
        let (mut tbl, names) = self.named_args(args, kwargs)?;
        tbl.group_by = if add { union_names(&self.group_by, &names) } else { union_names(&[], &names) };
        Ok(tbl)
    }

    pub fn ungroup(&self) -> LazyTbl {
        let mut tbl = self.clone();
        tbl.group_by.clear();
        tbl
    }

    /// Join with another lazy table on `(left, right)` key pairs, or on the
    /// shared column names when `on` is `None`.
    pub fn join(&self, other: &LazyTbl, on: Option<&[(String, String)]>, how: JoinKind) -> Result<LazyTbl, SqlError> {
        let verb = how.verb();
        if other.dialect != self.dialect {
            return Err(SqlError::shape(
                verb,
                "right",
                format!("is a {} table, expected {}", other.dialect, self.dialect),
            ));
        }
        let left_names = self.column_names();
        let right_names = other.column_names();
        let keys = join_keys(&left_names, &right_names, on, how).map_err(SqlError::from_frame)?;

        let (l, r) = (Alias::fresh(), Alias::fresh());
        let left_ref = |name: &str| Expr::column(Relation::Anon(l), name);
        let right_ref = |name: &str| Expr::column(Relation::Anon(r), name);
        let left_from = FromItem::Subquery {
            select: Arc::new(self.current()),
            alias: l,
        };
        let right_from = FromItem::Subquery {
            select: Arc::new(other.current()),
            alias: r,
        };
        let conds: Vec<(Expr, Expr)> = keys.iter().map(|(a, b)| (left_ref(a), right_ref(b))).collect();

        let select = if how.is_filtering() {
            let items = left_names.iter().map(|c| SelectItem::new(c.clone(), left_ref(c))).collect();
            let mut probe = Select::new(Vec::new(), right_from);
            probe.filters = conds
                .into_iter()
                .map(|(a, b)| Expr::binary(crate::ast::SqlOp::Eq, a, b))
                .collect();
            let mut out = Select::new(items, left_from);
            out.filters.push(Expr::Exists {
                select: Arc::new(probe),
                negated: how == JoinKind::Anti,
            });
            out
        } else {
            let items = joined_columns(&left_names, &right_names, &keys, how)
                .into_iter()
                .map(|c| {
                    let expr = match &c {
                        JoinedColumn::Key { left, right, .. } => match how {
                            JoinKind::Right => right_ref(right),
                            JoinKind::Full => Expr::func("coalesce", vec![left_ref(left), right_ref(right)]),
                            _ => left_ref(left),
                        },
                        JoinedColumn::Left { source, .. } => left_ref(source),
                        JoinedColumn::Right { source, .. } => right_ref(source),
                    };
                    SelectItem::new(c.name(), expr)
                })
                .collect();
            Select::new(
                items,
                FromItem::Join {
                    kind: how,
                    left: Box::new(left_from),
                    right: Box::new(right_from),
                    on: conds,
                },
            )
        };

        let mut tbl = self.append(select);
        let columns = tbl.column_names();
        tbl.group_by.retain(|g| columns.contains(g));
        tbl.order_by.clear();
        Ok(tbl)
    }

    pub fn inner_join(&self, other: &LazyTbl, on: Option<&[(String, String)]>) -> Result<LazyTbl, SqlError> {
        self.join(other, on, JoinKind::Inner)
    }

    pub fn left_join(&self, other: &LazyTbl, on: Option<&[(String, String)]>) -> Result<LazyTbl, SqlError> {
        self.join(other, on, JoinKind::Left)
    }

    pub fn right_join(&self, other: &LazyTbl, on: Option<&[(String, String)]>) -> Result<LazyTbl, SqlError> {
        self.join(other, on, JoinKind::Right)
    }

    pub fn full_join(&self, other: &LazyTbl, on: Option<&[(String, String)]>) -> Result<LazyTbl, SqlError> {
        self.join(other, on, JoinKind::Full)
    }

    pub fn semi_join(&self, other: &LazyTbl, on: Option<&[(String, String)]>) -> Result<LazyTbl, SqlError> {
        self.join(other, on, JoinKind::Semi)
    }

    pub fn anti_join(&self, other: &LazyTbl, on: Option<&[(String, String)]>) -> Result<LazyTbl, SqlError> {
        self.join(other, on, JoinKind::Anti)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dialect::Dialect;
    use crate::source::MockSource;
    use tql_ir::col;

    fn tbl(dialect: Dialect) -> LazyTbl {
        let source = Arc::new(MockSource::new(dialect).with_table("t", &["g", "x", "y"]));
        LazyTbl::new(source, "t").unwrap()
    }

    fn named(name: &str, node: impl Into<Node>) -> (String, Node) {
        (name.to_string(), node.into())
    }

    #[test]
    fn test_mutate_in_place_and_nested() {
        let t = tbl(Dialect::Duckdb);
        let out = t.mutate(&[named("z", col("x") + 1)]).unwrap();
        assert_eq!(out.show_query(), "SELECT t.g, t.x, t.y, t.x + 1 AS z\nFROM t");

        let out = out.mutate(&[named("w", col("z") * 2)]).unwrap();
        assert!(out.show_query().starts_with("SELECT anon_1.g, anon_1.x, anon_1.y, anon_1.z, anon_1.z * 2 AS w\nFROM (SELECT"));
        assert_eq!(t.n_ops(), 1);
    }

    #[test]
    fn test_replacing_column_keeps_position() {
        let out = tbl(Dialect::Duckdb).mutate(&[named("x", col("x") + 1)]).unwrap();
        assert_eq!(out.show_query(), "SELECT t.g, t.x + 1 AS x, t.y\nFROM t");
    }

    #[test]
    fn test_grouped_mutate_partitions_window() {
        let t = tbl(Dialect::Postgresql);
        let g = t.group_by(&[col("g").into_node()], &[], false).unwrap();
        let out = g.mutate(&[named("m", col("x").method("mean", vec![]))]).unwrap();
        assert_eq!(
            out.show_query(),
            "SELECT t.g, t.x, t.y, avg(t.x) OVER (PARTITION BY t.g) AS m\nFROM t"
        );
        assert_eq!(out.group_names(), ["g".to_string()]);
    }

    #[test]
    fn test_filter_without_windows_adds_where() {
        let out = tbl(Dialect::Duckdb)
            .filter(&[col("x").gt(1).into_node(), col("y").lt(2).into_node()])
            .unwrap();
        assert_eq!(out.show_query(), "SELECT t.g, t.x, t.y\nFROM t\nWHERE t.x > 1 AND t.y < 2");
    }

    #[test]
    fn test_filter_promotes_windows() {
        let cond = col("x").gt(col("x").method("mean", vec![])).into_node();
        let out = tbl(Dialect::Duckdb).filter(&[cond]).unwrap();
        assert_eq!(
            out.show_query(),
            "SELECT anon_1.g, anon_1.x, anon_1.y\nFROM (SELECT t.g, t.x, t.y, avg(t.x) OVER () AS win1\nFROM t) AS anon_1\nWHERE anon_1.x > anon_1.win1"
        );
    }

    #[test]
    fn test_summarize_grouped() {
        let t = tbl(Dialect::Duckdb).group_by(&[col("g").into_node()], &[], false).unwrap();
        let out = t.summarize(&[named("total", col("x").method("sum", vec![]))]).unwrap();
        assert_eq!(out.show_query(), "SELECT t.g, sum(t.x) AS total\nFROM t\nGROUP BY t.g");
        assert!(out.group_names().is_empty());
    }

    #[test]
    fn test_summarize_rejects_self_reference() {
        let err = tbl(Dialect::Duckdb)
            .summarize(&[
                named("a", col("x").method("sum", vec![])),
                named("b", col("a") + 1),
            ])
            .unwrap_err();
        match err {
            SqlError::Shape { verb, arg, msg } => {
                assert_eq!(verb, "summarize");
                assert_eq!(arg, "b");
                assert!(msg.contains('a'));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_summarize_wraps_derived_columns() {
        let out = tbl(Dialect::Duckdb)
            .mutate(&[named("z", col("x") * 2)])
            .unwrap()
            .summarize(&[named("m", col("z").method("max", vec![]))])
            .unwrap();
        assert_eq!(
            out.show_query(),
            "SELECT max(anon_1.z) AS m\nFROM (SELECT t.g, t.x, t.y, t.x * 2 AS z\nFROM t) AS anon_1"
        );
    }

    #[test]
    fn test_arrange_and_head() {
        let out = tbl(Dialect::Duckdb)
            .arrange(&[(-col("x")).into_node(), col("y").into_node()])
            .unwrap()
            .head(5)
            .unwrap();
        assert_eq!(out.show_query(), "SELECT t.g, t.x, t.y\nFROM t\nORDER BY t.x DESC, t.y\nLIMIT 5");
        let nested = out.head(2).unwrap();
        assert!(nested.show_query().ends_with(") AS anon_1\nORDER BY anon_1.x DESC, anon_1.y\nLIMIT 2"));
    }

    #[test]
    fn test_select_keeps_groups_and_renames() {
        let t = tbl(Dialect::Duckdb).group_by(&[col("g").into_node()], &[], false).unwrap();
        let out = t.select(&[col("x").into_node()]).unwrap();
        assert_eq!(out.column_names(), vec!["g", "x"]);

        let out = t.rename(&[named("grp", col("g"))]).unwrap();
        assert_eq!(out.group_names(), ["grp".to_string()]);
        assert_eq!(out.show_query(), "SELECT t.g AS grp, t.x, t.y\nFROM t");
    }

    #[test]
    fn test_count_sorted() {
        let out = tbl(Dialect::Duckdb).count(&[col("g").into_node()], &[], None, true, None).unwrap();
        assert_eq!(
            out.show_query(),
            "SELECT t.g, count(*) AS n\nFROM t\nGROUP BY t.g\nORDER BY count(*) DESC"
        );
    }

    #[test]
    fn test_distinct_columns() {
        let out = tbl(Dialect::Duckdb).distinct(&[col("g").into_node()], &[], false).unwrap();
        assert_eq!(out.show_query(), "SELECT DISTINCT t.g\nFROM t");
    }

    #[test]
    fn test_joins() {
        let source = Arc::new(
            MockSource::new(Dialect::Duckdb)
                .with_table("l", &["k", "v"])
                .with_table("r", &["k", "v", "w"]),
        );
        let l = LazyTbl::new(source.clone(), "l").unwrap();
        let r = LazyTbl::new(source, "r").unwrap();

        let on = [("k".to_string(), "k".to_string())];
        let out = l.left_join(&r, Some(&on)).unwrap();
        assert_eq!(out.column_names(), vec!["k", "v_x", "v_y", "w"]);
        assert_eq!(
            out.show_query(),
            "SELECT anon_1.k, anon_1.v AS v_x, anon_2.v AS v_y, anon_2.w\nFROM (SELECT l.k, l.v\nFROM l) AS anon_1 LEFT OUTER JOIN (SELECT r.k, r.v, r.w\nFROM r) AS anon_2 ON anon_1.k = anon_2.k"
        );

        let semi = l.anti_join(&r, Some(&on)).unwrap();
        assert!(semi.show_query().contains("WHERE NOT EXISTS (SELECT *\nFROM (SELECT r.k"));

        let bad = [("nope".to_string(), "k".to_string())];
        match l.inner_join(&r, Some(&bad)).unwrap_err() {
            SqlError::Shape { verb, .. } => assert_eq!(verb, "inner_join"),
            other => panic!("unexpected {:?}", other),
        }
    }
}
