//! TQL - tidy verbs over in-memory frames and SQL databases
//!
//! Expressions are captured once against the placeholder `_` and run
//! unchanged on a [`Frame`], a [`GroupedFrame`] or a [`LazyTbl`]. Verbs are
//! values: pipe data into them with `>>` to run now, or pipe the
//! placeholder to get a [`Pipeline`] to run later.
//!
//! ```ignore
//! use tql::{col, group_by, summarize, sym, Frame};
//!
//! let totals = sym() >> group_by([col("g")]) >> summarize([("total", col("x").method("sum", vec![]))]);
//! let out = totals.apply(frame)?.collect()?;
//! ```

use thiserror::Error;

pub mod config;
pub mod logging;
mod table;
mod verb;

pub use config::{Config, ConfigError};
pub use table::Table;
pub use verb::{
    add_count, anti_join, arrange, count, distinct, filter, full_join, group_by, head, inner_join, left_join, mutate,
    rename, right_join, select, semi_join, summarize, top_n, transmute, ungroup, Pipeline, Verb,
};

pub use tql_ast::parse;
pub use tql_duck::{DuckError, DuckOptions, DuckSource};
pub use tql_frame::{values, Frame, FrameError, GroupedFrame, JoinKind};
pub use tql_ir::{across, col, fx, if_all, if_any, sym, Node, Symbolic, Value};
pub use tql_sql::{Dialect, LazyTbl, MockSource, SqlError, SqlSource};

#[doc(hidden)]
pub use tracing as __tracing;

#[derive(Debug, Error)]
pub enum TqlError {
    #[error(transparent)]
    Frame(#[from] FrameError),

    #[error(transparent)]
    Sql(#[from] SqlError),

    #[error(transparent)]
    Duck(#[from] DuckError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("Parse error: {0}")]
    Parse(#[from] tql_ast::ParseError),

    #[error("Unsupported: {0}")]
    Unsupported(String),
}
