//! DuckDB source for lazy tables
//!
//! [`DuckSource`] owns one connection. Every query checks it out through a
//! [`Checkout`] guard, which logs the checkout and releases the connection
//! when dropped, so errors halfway through a result never leave it locked.

use chrono::{DateTime, Datelike, NaiveDate};
use duckdb::types::{TimeUnit, Value as DuckValue, ValueRef};
use duckdb::{params_from_iter, Connection};
use std::fmt;
use std::ops::Deref;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};
use thiserror::Error;
use tql_frame::Frame;
use tql_ir::Value;
use tql_sql::{Dialect, QueryResult, SqlError, SqlSource};
use tracing::{debug, info};

/// Days from 0001-01-01 to 1970-01-01.
const UNIX_EPOCH_DAYS_FROM_CE: i32 = 719_163;

#[derive(Debug, Error)]
pub enum DuckError {
    #[error("Database error: {0}")]
    Database(#[from] duckdb::Error),

    #[error("Connection lock poisoned")]
    Poisoned,

    #[error("Unsupported value in column {column}: {kind}")]
    UnsupportedValue { column: String, kind: String },
}

impl From<DuckError> for SqlError {
    fn from(e: DuckError) -> Self {
        SqlError::backend(e)
    }
}

/// Where to open the database and how much memory it may use.
#[derive(Debug, Clone, Default)]
pub struct DuckOptions {
    /// Database file; in-memory when `None`.
    pub path: Option<PathBuf>,
    pub memory_limit_mb: Option<u64>,
}

pub struct DuckSource {
    conn: Mutex<Connection>,
    checkouts: AtomicU64,
}

/// Exclusive use of the source's connection until dropped.
pub struct Checkout<'a> {
    conn: MutexGuard<'a, Connection>,
    id: u64,
}

impl Deref for Checkout<'_> {
    type Target = Connection;

    fn deref(&self) -> &Connection {
        &self.conn
    }
}

impl Drop for Checkout<'_> {
    fn drop(&mut self) {
        debug!(checkout = self.id, "Released connection");
    }
}

impl DuckSource {
    pub fn open_in_memory() -> Result<Self, DuckError> {
        Ok(Self::from_connection(Connection::open_in_memory()?))
    }

    pub fn connect(options: &DuckOptions) -> Result<Self, DuckError> {
        let source = match &options.path {
            Some(path) => Self::from_connection(Connection::open(path)?),
            None => Self::open_in_memory()?,
        };
        if let Some(mb) = options.memory_limit_mb {
            source.set_memory_limit(mb)?;
        }
        info!(
            path = ?options.path,
            memory_limit_mb = ?options.memory_limit_mb,
            "Opened DuckDB source"
        );
        Ok(source)
    }

    pub fn from_connection(conn: Connection) -> Self {
        Self {
            conn: Mutex::new(conn),
            checkouts: AtomicU64::new(0),
        }
    }

    pub fn set_memory_limit(&self, mb: u64) -> Result<(), DuckError> {
        let pragma = format!("PRAGMA memory_limit='{}MB'", mb);
        self.checkout()?.execute_batch(&pragma)?;
        Ok(())
    }

    pub fn checkout(&self) -> Result<Checkout<'_>, DuckError> {
        let conn = self.conn.lock().map_err(|_| DuckError::Poisoned)?;
        let id = self.checkouts.fetch_add(1, Ordering::Relaxed) + 1;
        debug!(checkout = id, "Checked out connection");
        Ok(Checkout { conn, id })
    }

    /// Number of checkouts so far.
    pub fn checkout_count(&self) -> u64 {
        self.checkouts.load(Ordering::Relaxed)
    }

    pub fn execute_batch(&self, sql: &str) -> Result<(), DuckError> {
        self.checkout()?.execute_batch(sql)?;
        Ok(())
    }

    /// Create (or replace) table `name` holding the rows of `frame`.
    pub fn load_frame(&self, name: &str, frame: &Frame) -> Result<(), DuckError> {
        let quote = |s: &str| Dialect::Duckdb.quote_ident(s);
        let defs = frame
            .columns()
            .map(|(column, values)| Ok(format!("{} {}", quote(column), column_type(column, values)?)))
            .collect::<Result<Vec<_>, DuckError>>()?;
        let names = frame.column_names();

        let conn = self.checkout()?;
        conn.execute_batch(&format!("CREATE OR REPLACE TABLE {} ({})", quote(name), defs.join(", ")))?;
        let placeholders = vec!["?"; names.len()].join(", ");
        let mut stmt = conn.prepare(&format!("INSERT INTO {} VALUES ({})", quote(name), placeholders))?;
        for i in 0..frame.nrows() {
            let row = frame
                .row(i)
                .iter()
                .zip(names)
                .map(|(v, column)| to_duck(v, column))
                .collect::<Result<Vec<_>, DuckError>>()?;
            stmt.execute(params_from_iter(row))?;
        }
        debug!(table = %name, rows = frame.nrows(), "Loaded frame");
        Ok(())
    }

    /// Column names of `table` in declaration order; empty when it does not exist.
    pub fn columns(&self, table: &str) -> Result<Vec<String>, DuckError> {
        let conn = self.checkout()?;
        let mut stmt = conn.prepare(
            "SELECT column_name FROM information_schema.columns WHERE table_name = ? ORDER BY ordinal_position",
        )?;
        let names = stmt
            .query_map([table], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(names)
    }

    pub fn query(&self, sql: &str) -> Result<QueryResult, DuckError> {
        let conn = self.checkout()?;
        let mut stmt = conn.prepare(sql)?;
        let mut rows = stmt.query([])?;
        let columns: Vec<String> = rows.as_ref().map(|s| s.column_names()).unwrap_or_default();

        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            let mut values = Vec::with_capacity(columns.len());
            for (i, column) in columns.iter().enumerate() {
                values.push(from_duck(row.get_ref(i)?, column)?);
            }
            out.push(values);
        }
        Ok(QueryResult::new(columns, out))
    }
}

impl SqlSource for DuckSource {
    fn dialect(&self) -> Option<Dialect> {
        Some(Dialect::Duckdb)
    }

    fn table_columns(&self, table: &str) -> Result<Vec<String>, SqlError> {
        Ok(self.columns(table)?)
    }

    fn execute(&self, sql: &str) -> Result<QueryResult, SqlError> {
        Ok(self.query(sql)?)
    }
}

impl fmt::Debug for DuckSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DuckSource")
            .field("checkouts", &self.checkout_count())
            .finish()
    }
}

fn unsupported(column: &str, kind: &str) -> DuckError {
    DuckError::UnsupportedValue {
        column: column.to_string(),
        kind: kind.to_string(),
    }
}

fn micros(unit: TimeUnit, v: i64) -> i64 {
    match unit {
        TimeUnit::Second => v.saturating_mul(1_000_000),
        TimeUnit::Millisecond => v.saturating_mul(1_000),
        TimeUnit::Microsecond => v,
        TimeUnit::Nanosecond => v / 1_000,
    }
}

fn from_duck(value: ValueRef<'_>, column: &str) -> Result<Value, DuckError> {
    Ok(match value {
        ValueRef::Null => Value::Null,
        ValueRef::Boolean(b) => Value::Bool(b),
        ValueRef::TinyInt(i) => Value::Int(i.into()),
        ValueRef::SmallInt(i) => Value::Int(i.into()),
        ValueRef::Int(i) => Value::Int(i.into()),
        ValueRef::BigInt(i) => Value::Int(i),
        ValueRef::HugeInt(i) => i64::try_from(i).map_or(Value::Float(i as f64), Value::Int),
        ValueRef::UTinyInt(i) => Value::Int(i.into()),
        ValueRef::USmallInt(i) => Value::Int(i.into()),
        ValueRef::UInt(i) => Value::Int(i.into()),
        ValueRef::UBigInt(i) => i64::try_from(i).map_or(Value::Float(i as f64), Value::Int),
        ValueRef::Float(f) => Value::Float(f.into()),
        ValueRef::Double(f) => Value::Float(f),
        ValueRef::Decimal(d) => d
            .to_string()
            .parse::<f64>()
            .map(Value::Float)
            .map_err(|_| unsupported(column, "decimal"))?,
        ValueRef::Text(bytes) => Value::Str(String::from_utf8_lossy(bytes).into_owned()),
        ValueRef::Date32(days) => days
            .checked_add(UNIX_EPOCH_DAYS_FROM_CE)
            .and_then(NaiveDate::from_num_days_from_ce_opt)
            .map(Value::Date)
            .ok_or_else(|| unsupported(column, "date out of range"))?,
        ValueRef::Timestamp(unit, v) => {
            let us = micros(unit, v);
            DateTime::from_timestamp(us.div_euclid(1_000_000), (us.rem_euclid(1_000_000) * 1_000) as u32)
                .map(|dt| Value::Timestamp(dt.naive_utc()))
                .ok_or_else(|| unsupported(column, "timestamp out of range"))?
        }
        _ => return Err(unsupported(column, "nested, binary or interval value")),
    })
}

fn to_duck(value: &Value, column: &str) -> Result<DuckValue, DuckError> {
    Ok(match value {
        Value::Null => DuckValue::Null,
        Value::Bool(b) => DuckValue::Boolean(*b),
        Value::Int(i) => DuckValue::BigInt(*i),
        Value::Float(f) => DuckValue::Double(*f),
        Value::Str(s) => DuckValue::Text(s.clone()),
        Value::Date(d) => DuckValue::Date32(d.num_days_from_ce() - UNIX_EPOCH_DAYS_FROM_CE),
        Value::Timestamp(ts) => DuckValue::Timestamp(TimeUnit::Microsecond, ts.and_utc().timestamp_micros()),
        Value::List(_) | Value::Map(_) => return Err(unsupported(column, "list or map")),
    })
}

/// DuckDB type for a column, from its non-null values.
fn column_type(column: &str, values: &[Value]) -> Result<&'static str, DuckError> {
    let mut ty: Option<&'static str> = None;
    for v in values {
        let this = match v {
            Value::Null => continue,
            Value::Bool(_) => "BOOLEAN",
            Value::Int(_) => "BIGINT",
            Value::Float(_) => "DOUBLE",
            Value::Str(_) => "VARCHAR",
            Value::Date(_) => "DATE",
            Value::Timestamp(_) => "TIMESTAMP",
            Value::List(_) | Value::Map(_) => return Err(unsupported(column, "list or map")),
        };
        ty = match (ty, this) {
            (None, t) => Some(t),
            (Some(a), b) if a == b => Some(a),
            (Some("BIGINT"), "DOUBLE") | (Some("DOUBLE"), "BIGINT") => Some("DOUBLE"),
            (Some(_), _) => return Err(unsupported(column, "mixed types")),
        };
    }
    Ok(ty.unwrap_or("VARCHAR"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tql_frame::values;
    use tql_sql::LazyTbl;

    #[test]
    fn test_result_types_map_to_values() -> Result<(), Box<dyn std::error::Error>> {
        let source = DuckSource::open_in_memory()?;
        let result = source.query(
            "SELECT 1::TINYINT AS a, 2::HUGEINT AS b, 1.5::DECIMAL(4, 2) AS c, DATE '2024-01-31' AS d, \
             TIMESTAMP '2024-01-31 12:30:00' AS e, 'x' AS f, NULL AS g, true AS h",
        )?;
        assert_eq!(result.columns, vec!["a", "b", "c", "d", "e", "f", "g", "h"]);
        let date = NaiveDate::from_ymd_opt(2024, 1, 31).unwrap();
        assert_eq!(
            result.rows,
            vec![vec![
                Value::Int(1),
                Value::Int(2),
                Value::Float(1.5),
                Value::Date(date),
                Value::Timestamp(date.and_hms_opt(12, 30, 0).unwrap()),
                Value::from("x"),
                Value::Null,
                Value::Bool(true),
            ]]
        );
        Ok(())
    }

    #[test]
    fn test_load_frame_and_reflect() -> Result<(), Box<dyn std::error::Error>> {
        let source = DuckSource::open_in_memory()?;
        let frame = Frame::new([
            ("Name", values(["a", "b"])),
            ("x", vec![Value::Int(1), Value::Float(2.5)]),
            ("missing", vec![Value::Null, Value::Null]),
        ])?;
        source.load_frame("t", &frame)?;
        assert_eq!(source.columns("t")?, vec!["Name", "x", "missing"]);
        assert!(source.columns("nope")?.is_empty());

        let back = source.query("SELECT * FROM t")?.into_frame()?;
        assert_eq!(back.column("x").unwrap(), values([1.0, 2.5]).as_slice());
        Ok(())
    }

    #[test]
    fn test_checkout_released_on_error() -> Result<(), Box<dyn std::error::Error>> {
        let source = DuckSource::open_in_memory()?;
        assert!(source.query("SELEC 1").is_err());
        // the failed query gave the connection back
        let ok = source.query("SELECT 42 AS answer")?;
        assert_eq!(ok.rows, vec![vec![Value::Int(42)]]);
        assert_eq!(source.checkout_count(), 2);
        Ok(())
    }

    #[test]
    fn test_backend_errors_pass_through() -> Result<(), Box<dyn std::error::Error>> {
        let source: Arc<dyn SqlSource> = Arc::new(DuckSource::open_in_memory()?);
        let err = source.execute("SELECT * FROM nowhere").unwrap_err();
        match err {
            SqlError::Backend(inner) => {
                let duck = inner.downcast_ref::<DuckError>().expect("duck error");
                assert!(matches!(duck, DuckError::Database(_)));
            }
            other => panic!("unexpected {:?}", other),
        }
        assert!(matches!(LazyTbl::new(source, "nowhere"), Err(SqlError::UnknownTable(_))));
        Ok(())
    }

    #[test]
    fn test_connect_applies_memory_limit() -> Result<(), Box<dyn std::error::Error>> {
        let source = DuckSource::connect(&DuckOptions {
            path: None,
            memory_limit_mb: Some(256),
        })?;
        let result = source.query("SELECT current_setting('memory_limit') AS m")?;
        match &result.rows[0][0] {
            Value::Str(s) => assert!(s.contains("MiB") || s.contains("MB"), "{}", s),
            other => panic!("unexpected {:?}", other),
        }
        Ok(())
    }
}
