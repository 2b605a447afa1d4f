//! Lazy tables: relational verbs accumulated as SQL selects

use crate::ast::{Expr, Select, SortKey};
use crate::dialect::Dialect;
use crate::funcs::sql_funcs;
use crate::render::render;
use crate::source::SqlSource;
use crate::translate::{SqlEvaluator, SqlValue};
use crate::SqlError;
use std::fmt;
use std::sync::Arc;
use tql_frame::{sort_key, Frame};
use tql_ir::{sha256_hex, Node};
use tql_registry::{CallTreeLocal, FuncTable, KindTables};
use tracing::debug;

/// A table in a database plus the verbs applied to it so far.
///
/// Every verb returns a new `LazyTbl`; earlier selects are shared, never
/// modified. Nothing runs until [`LazyTbl::collect`].
#[derive(Clone)]
pub struct LazyTbl {
    pub(crate) source: Arc<dyn SqlSource>,
    pub(crate) dialect: Dialect,
    pub(crate) table: String,
    pub(crate) ops: Vec<Arc<Select>>,
    pub(crate) group_by: Vec<String>,
    pub(crate) order_by: Vec<Node>,
    pub(crate) funcs: Arc<KindTables>,
}

impl LazyTbl {
    /// Lazy table over `table`, in the source's dialect (duckdb if it has none).
    pub fn new(source: Arc<dyn SqlSource>, table: &str) -> Result<Self, SqlError> {
        let dialect = source.dialect().unwrap_or_default();
        Self::with_dialect(source, table, dialect)
    }

    pub fn with_dialect(source: Arc<dyn SqlSource>, table: &str, dialect: Dialect) -> Result<Self, SqlError> {
        let columns = source.table_columns(table)?;
        if columns.is_empty() {
            return Err(SqlError::UnknownTable(table.to_string()));
        }
        let funcs = sql_funcs(dialect)?;
        debug!(table = %table, dialect = %dialect, columns = columns.len(), "Created lazy table");
        Ok(Self {
            source,
            dialect,
            table: table.to_string(),
            ops: vec![Arc::new(Select::from_table(table, &columns))],
            group_by: Vec::new(),
            order_by: Vec::new(),
            funcs,
        })
    }

    pub fn dialect(&self) -> Dialect {
        self.dialect
    }

    pub fn table_name(&self) -> &str {
        &self.table
    }

    pub fn group_names(&self) -> &[String] {
        &self.group_by
    }

    pub fn order_nodes(&self) -> &[Node] {
        &self.order_by
    }

    /// Number of selects accumulated, the base table's included.
    pub fn n_ops(&self) -> usize {
        self.ops.len()
    }

    pub fn column_names(&self) -> Vec<String> {
        self.last_op().column_names()
    }

    pub fn last_op(&self) -> &Select {
        // ops always holds at least the base select
        &self.ops[self.ops.len() - 1]
    }

    /// Copy of the current select to build the next one from.
    pub(crate) fn current(&self) -> Select {
        self.last_op().clone()
    }

    /// New table with `select` appended.
    pub(crate) fn append(&self, select: Select) -> LazyTbl {
        let mut out = self.clone();
        out.ops.push(Arc::new(select));
        out
    }

    pub(crate) fn compile(&self, node: &Node, table: &FuncTable) -> Result<Node, SqlError> {
        Ok(CallTreeLocal::with_accessors(table).rewrite(node)?)
    }

    /// Translate `node` against the columns of `select`.
    pub(crate) fn eval(&self, node: &Node, select: &Select, table: &FuncTable) -> Result<Expr, SqlError> {
        let compiled = self.compile(node, table)?;
        let columns = SqlValue::Columns(Arc::new(select.items.clone()));
        compiled.eval(&SqlEvaluator::new(self.dialect), &columns)?.into_expr()
    }

    /// Partition and ordering windows get over the columns of `select`.
    pub(crate) fn window_spec(&self, select: &Select) -> Result<(Vec<Expr>, Vec<SortKey>), SqlError> {
        let partition = self
            .group_by
            .iter()
            .map(|g| select.item(g).cloned().ok_or_else(|| SqlError::UnknownColumn(g.clone())))
            .collect::<Result<Vec<_>, _>>()?;
        let order = self
            .order_by
            .iter()
            .map(|node| {
                let (inner, desc) = sort_key(node);
                let key = SortKey::from_expr(self.eval(inner, select, self.funcs.window_context())?);
                Ok(SortKey {
                    expr: key.expr,
                    desc: key.desc != desc,
                })
            })
            .collect::<Result<Vec<_>, SqlError>>()?;
        Ok((partition, order))
    }

    /// The final query as SQL text for this table's dialect.
    pub fn show_query(&self) -> String {
        render(self.last_op(), self.dialect)
    }

    /// Hex SHA-256 of the rendered query.
    pub fn fingerprint(&self) -> String {
        sha256_hex(self.show_query().as_bytes())
    }

    /// Run the query and materialise the result.
    pub fn collect(&self) -> Result<Frame, SqlError> {
        let sql = self.show_query();
        debug!(dialect = %self.dialect, sql = %sql, "Executing query");
        let result = self.source.execute(&sql)?;
        debug!(rows = result.row_count(), "Query returned");
        result.into_frame()
    }
}

impl fmt::Debug for LazyTbl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LazyTbl")
            .field("table", &self.table)
            .field("dialect", &self.dialect)
            .field("ops", &self.ops.len())
            .field("group_by", &self.group_by)
            .finish()
    }
}

impl fmt::Display for LazyTbl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "# Source: lazy query [{}]", self.dialect)?;
        if !self.group_by.is_empty() {
            writeln!(f, "# Groups: {}", self.group_by.join(", "))?;
        }
        write!(f, "{}", self.show_query())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::{MockSource, QueryResult};
    use tql_ir::Value;

    fn source() -> Arc<MockSource> {
        Arc::new(MockSource::new(Dialect::Postgresql).with_table("t", &["g", "x"]))
    }

    #[test]
    fn test_new_reflects_columns() {
        let tbl = LazyTbl::new(source(), "t").unwrap();
        assert_eq!(tbl.dialect(), Dialect::Postgresql);
        assert_eq!(tbl.column_names(), vec!["g", "x"]);
        assert_eq!(tbl.show_query(), "SELECT t.g, t.x\nFROM t");
        assert!(matches!(LazyTbl::new(source(), "nope"), Err(SqlError::UnknownTable(_))));
    }

    #[test]
    fn test_collect_sends_rendered_query() {
        let src = source();
        src.push_result(QueryResult::new(
            vec!["g".into(), "x".into()],
            vec![vec![Value::from("a"), Value::Int(1)]],
        ));
        let tbl = LazyTbl::new(src.clone(), "t").unwrap();
        let frame = tbl.collect().unwrap();
        assert_eq!(frame.nrows(), 1);
        assert_eq!(src.queries(), vec![tbl.show_query()]);
    }

    #[test]
    fn test_fingerprint_follows_query() {
        let a = LazyTbl::new(source(), "t").unwrap();
        let b = LazyTbl::new(source(), "t").unwrap();
        assert_eq!(a.fingerprint(), b.fingerprint());
        assert_eq!(a.fingerprint().len(), 64);
    }
}
