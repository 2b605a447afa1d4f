//! Evaluation of compiled call trees into SQL expressions

use crate::ast::{Expr, SelectItem, SqlOp};
use crate::dialect::Dialect;
use crate::SqlError;
use std::any::Any;
use std::fmt;
use std::sync::Arc;
use tql_ir::{BinaryOperator, EvalError, Evaluator, FuncRef, Function, UnaryOperator, Value};
use tql_registry::RegistryError;

/// What a call-tree node evaluates to.
#[derive(Debug, Clone)]
pub enum SqlValue {
    /// The input `_`: the columns of the current select.
    Columns(Arc<Vec<SelectItem>>),
    Expr(Expr),
    Dict(Vec<(SqlValue, SqlValue)>),
}

impl SqlValue {
    pub fn into_expr(self) -> Result<Expr, SqlError> {
        match self {
            SqlValue::Expr(e) => Ok(e),
            SqlValue::Columns(_) => Err(SqlError::Unsupported("`_` used as a column expression".to_string())),
            SqlValue::Dict(_) => Err(SqlError::Unsupported("mapping used as a column expression".to_string())),
        }
    }
}

/// Arguments handed to a translation.
pub struct SqlArgs {
    pub name: String,
    pub args: Vec<SqlValue>,
    pub kwargs: Vec<(String, SqlValue)>,
}

impl SqlArgs {
    /// Positional argument `i`, or the keyword argument `kw`.
    pub fn get(&self, i: usize, kw: &str) -> Option<&SqlValue> {
        self.args
            .get(i)
            .or_else(|| self.kwargs.iter().find(|(k, _)| k == kw).map(|(_, v)| v))
    }

    fn missing(&self, i: usize) -> SqlError {
        SqlError::Unsupported(format!("{}: missing argument {}", self.name, i))
    }

    pub fn expr(&self, i: usize) -> Result<Expr, SqlError> {
        self.args.get(i).ok_or_else(|| self.missing(i))?.clone().into_expr()
    }

    pub fn opt_expr(&self, i: usize, kw: &str) -> Result<Option<Expr>, SqlError> {
        self.get(i, kw).map(|v| v.clone().into_expr()).transpose()
    }

    pub fn literal(&self, i: usize, kw: &str) -> Option<&Value> {
        match self.get(i, kw) {
            Some(SqlValue::Expr(Expr::Literal(v))) => Some(v),
            _ => None,
        }
    }

    pub fn int(&self, i: usize, kw: &str) -> Result<Option<i64>, SqlError> {
        match self.get(i, kw) {
            None => Ok(None),
            Some(SqlValue::Expr(Expr::Literal(Value::Null))) => Ok(None),
            Some(SqlValue::Expr(Expr::Literal(v))) => v
                .as_i64()
                .map(Some)
                .ok_or_else(|| SqlError::Unsupported(format!("{}: {} must be an integer", self.name, kw))),
            Some(_) => Err(SqlError::Unsupported(format!("{}: {} must be a literal integer", self.name, kw))),
        }
    }

    pub fn float(&self, i: usize, kw: &str) -> Result<Option<f64>, SqlError> {
        match self.get(i, kw) {
            None => Ok(None),
            Some(SqlValue::Expr(Expr::Literal(v))) => v
                .as_f64()
                .map(Some)
                .ok_or_else(|| SqlError::Unsupported(format!("{}: {} must be a number", self.name, kw))),
            Some(_) => Err(SqlError::Unsupported(format!("{}: {} must be a literal number", self.name, kw))),
        }
    }

    pub fn string(&self, i: usize, kw: &str) -> Result<Option<String>, SqlError> {
        match self.get(i, kw) {
            None => Ok(None),
            Some(SqlValue::Expr(Expr::Literal(Value::Str(s)))) => Ok(Some(s.clone())),
            Some(_) => Err(SqlError::Unsupported(format!("{}: {} must be a literal string", self.name, kw))),
        }
    }

    pub fn bool(&self, i: usize, kw: &str, default: bool) -> Result<bool, SqlError> {
        match self.get(i, kw) {
            None => Ok(default),
            Some(SqlValue::Expr(Expr::Literal(v))) => v
                .as_bool()
                .ok_or_else(|| SqlError::Unsupported(format!("{}: {} must be a boolean", self.name, kw))),
            Some(_) => Err(SqlError::Unsupported(format!("{}: {} must be a literal boolean", self.name, kw))),
        }
    }

    /// Every positional argument as an expression.
    pub fn exprs(&self) -> Result<Vec<Expr>, SqlError> {
        self.args.iter().map(|a| a.clone().into_expr()).collect()
    }

    /// Argument `i` is the whole input `_`.
    pub fn is_columns(&self, i: usize) -> bool {
        matches!(self.args.get(i), Some(SqlValue::Columns(_)))
    }

    pub fn dict(&self, i: usize) -> Result<Vec<(Expr, Expr)>, SqlError> {
        match self.args.get(i) {
            Some(SqlValue::Dict(entries)) => entries
                .iter()
                .map(|(k, v)| Ok((k.clone().into_expr()?, v.clone().into_expr()?)))
                .collect(),
            _ => Err(SqlError::Unsupported(format!("{}: argument {} must be a mapping", self.name, i))),
        }
    }
}

pub type SqlImp = dyn Fn(&SqlArgs) -> Result<Expr, SqlError> + Send + Sync;

/// One dialect's translation of a named operation.
#[derive(Clone)]
pub struct SqlTranslation {
    name: String,
    imp: Arc<SqlImp>,
}

impl SqlTranslation {
    pub fn new<F>(name: &str, imp: F) -> Self
    where
        F: Fn(&SqlArgs) -> Result<Expr, SqlError> + Send + Sync + 'static,
    {
        Self {
            name: name.to_string(),
            imp: Arc::new(imp),
        }
    }

    pub fn from_imp(name: &str, imp: Arc<SqlImp>) -> Self {
        Self {
            name: name.to_string(),
            imp,
        }
    }

    pub fn apply(&self, args: Vec<SqlValue>, kwargs: Vec<(String, SqlValue)>) -> Result<Expr, SqlError> {
        (self.imp)(&SqlArgs {
            name: self.name.clone(),
            args,
            kwargs,
        })
    }
}

impl fmt::Debug for SqlTranslation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SqlTranslation({})", self.name)
    }
}

impl Function for SqlTranslation {
    fn name(&self) -> &str {
        &self.name
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Evaluates compiled trees against the columns of a select.
pub struct SqlEvaluator {
    pub dialect: Dialect,
}

impl SqlEvaluator {
    pub fn new(dialect: Dialect) -> Self {
        Self { dialect }
    }

    fn column(&self, obj: SqlValue, name: &str) -> Result<SqlValue, SqlError> {
        match obj {
            SqlValue::Columns(items) => items
                .iter()
                .find(|i| i.name == name)
                .map(|i| SqlValue::Expr(i.expr.clone()))
                .ok_or_else(|| SqlError::UnknownColumn(name.to_string())),
            _ => Err(EvalError::Unsupported(format!("attribute {} of a column expression", name)).into()),
        }
    }
}

impl Evaluator for SqlEvaluator {
    type Value = SqlValue;
    type Error = SqlError;

    fn literal(&self, value: &Value) -> Result<SqlValue, SqlError> {
        Ok(SqlValue::Expr(Expr::Literal(value.clone())))
    }

    fn getattr(&self, obj: SqlValue, name: &str) -> Result<SqlValue, SqlError> {
        self.column(obj, name)
    }

    fn getitem(&self, obj: SqlValue, key: SqlValue) -> Result<SqlValue, SqlError> {
        match key {
            SqlValue::Expr(Expr::Literal(Value::Str(name))) => self.column(obj, &name),
            _ => Err(EvalError::Unsupported("indexing with a non-string key".to_string()).into()),
        }
    }

    fn binary(&self, op: BinaryOperator, left: SqlValue, right: SqlValue) -> Result<SqlValue, SqlError> {
        let sql_op = SqlOp::from_operator(op)
            .ok_or_else(|| EvalError::Unsupported(format!("operator {} in SQL", op.symbol())))?;
        Ok(SqlValue::Expr(Expr::binary(sql_op, left.into_expr()?, right.into_expr()?)))
    }

    fn unary(&self, op: UnaryOperator, operand: SqlValue) -> Result<SqlValue, SqlError> {
        let operand = Box::new(operand.into_expr()?);
        match op {
            UnaryOperator::Neg => Ok(SqlValue::Expr(Expr::Neg(operand))),
            UnaryOperator::Invert => Ok(SqlValue::Expr(Expr::Not(operand))),
            UnaryOperator::Pos => Err(EvalError::Unsupported("unary + in SQL".to_string()).into()),
        }
    }

    fn call_method(
        &self,
        _receiver: SqlValue,
        name: &str,
        _args: Vec<SqlValue>,
        _kwargs: Vec<(String, SqlValue)>,
    ) -> Result<SqlValue, SqlError> {
        Err(RegistryError::FunctionLookup {
            name: name.to_string(),
            context: self.dialect.to_string(),
        }
        .into())
    }

    fn call_function(
        &self,
        func: &FuncRef,
        args: Vec<SqlValue>,
        kwargs: Vec<(String, SqlValue)>,
    ) -> Result<SqlValue, SqlError> {
        match func.downcast::<SqlTranslation>() {
            Some(t) => t.apply(args, kwargs).map(SqlValue::Expr),
            None => Err(RegistryError::FunctionLookup {
                name: func.name().to_string(),
                context: self.dialect.to_string(),
            }
            .into()),
        }
    }

    fn dict(&self, entries: Vec<(SqlValue, SqlValue)>) -> Result<SqlValue, SqlError> {
        Ok(SqlValue::Dict(entries))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::Relation;
    use tql_ir::{col, Node};

    fn columns() -> SqlValue {
        SqlValue::Columns(Arc::new(vec![
            SelectItem::new("a", Expr::column(Relation::Table("t".into()), "a")),
            SelectItem::new("b", Expr::column(Relation::Table("t".into()), "b")),
        ]))
    }

    #[test]
    fn test_columns_and_operators() {
        let ev = SqlEvaluator::new(Dialect::Duckdb);
        let node = Node::binary(BinaryOperator::Add, col("a").into_node(), Node::literal(1));
        let out = node.eval(&ev, &columns()).unwrap().into_expr().unwrap();
        assert_eq!(crate::render::render_expr(&out, Dialect::Duckdb), "t.a + 1");
    }

    #[test]
    fn test_unknown_column() {
        let ev = SqlEvaluator::new(Dialect::Duckdb);
        let err = col("zzz").into_node().eval(&ev, &columns()).unwrap_err();
        assert!(matches!(err, SqlError::UnknownColumn(ref c) if c == "zzz"));
    }

    #[test]
    fn test_uncompiled_method_is_lookup_error() {
        let ev = SqlEvaluator::new(Dialect::Postgresql);
        let node = col("a").method("frobnicate", vec![]).into_node();
        match node.eval(&ev, &columns()).unwrap_err() {
            SqlError::Registry(RegistryError::FunctionLookup { name, context }) => {
                assert_eq!(name, "frobnicate");
                assert_eq!(context, "postgresql");
            }
            other => panic!("unexpected {:?}", other),
        }
    }
}
