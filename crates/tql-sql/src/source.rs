//! Database seam: what a lazy table needs from a backend

use crate::dialect::Dialect;
use crate::SqlError;
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use tql_frame::Frame;
use tql_ir::Value;

/// Rows returned by a query, in column order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryResult {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Value>>,
}

impl QueryResult {
    pub fn new(columns: Vec<String>, rows: Vec<Vec<Value>>) -> Self {
        Self { columns, rows }
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn into_frame(self) -> Result<Frame, SqlError> {
        Ok(Frame::from_rows(self.columns, self.rows)?)
    }
}

pub trait SqlSource: Send + Sync {
    /// Dialect of the backend, when it knows its own.
    fn dialect(&self) -> Option<Dialect> {
        None
    }

    /// Column names of a table, in order.
    fn table_columns(&self, table: &str) -> Result<Vec<String>, SqlError>;

    fn execute(&self, sql: &str) -> Result<QueryResult, SqlError>;
}

/// In-memory source for tests: fixed table schemas, canned results served
/// in order, and a log of every query executed.
#[derive(Debug, Default)]
pub struct MockSource {
    dialect: Option<Dialect>,
    tables: HashMap<String, Vec<String>>,
    results: Mutex<VecDeque<QueryResult>>,
    queries: Mutex<Vec<String>>,
}

impl MockSource {
    pub fn new(dialect: Dialect) -> Self {
        Self {
            dialect: Some(dialect),
            ..Self::default()
        }
    }

    pub fn with_table(mut self, name: &str, columns: &[&str]) -> Self {
        self.tables
            .insert(name.to_string(), columns.iter().map(|c| c.to_string()).collect());
        self
    }

    /// Queue the result of the next `execute`.
    pub fn push_result(&self, result: QueryResult) {
        if let Ok(mut results) = self.results.lock() {
            results.push_back(result);
        }
    }

    /// Queries executed so far.
    pub fn queries(&self) -> Vec<String> {
        self.queries.lock().map(|q| q.clone()).unwrap_or_default()
    }
}

impl SqlSource for MockSource {
    fn dialect(&self) -> Option<Dialect> {
        self.dialect
    }

    fn table_columns(&self, table: &str) -> Result<Vec<String>, SqlError> {
        self.tables
            .get(table)
            .cloned()
            .ok_or_else(|| SqlError::UnknownTable(table.to_string()))
    }

    fn execute(&self, sql: &str) -> Result<QueryResult, SqlError> {
        if let Ok(mut queries) = self.queries.lock() {
            queries.push(sql.to_string());
        }
        let next = self.results.lock().ok().and_then(|mut r| r.pop_front());
        Ok(next.unwrap_or_default())
    }
}
