//! The three kinds of data verbs run on

use crate::TqlError;
use std::fmt;
use tql_frame::{Frame, GroupedFrame};
use tql_sql::LazyTbl;

#[derive(Debug, Clone)]
pub enum Table {
    Frame(Frame),
    Grouped(GroupedFrame),
    Lazy(LazyTbl),
}

impl Table {
    pub fn kind(&self) -> &'static str {
        match self {
            Table::Frame(_) => "frame",
            Table::Grouped(_) => "grouped frame",
            Table::Lazy(_) => "lazy table",
        }
    }

    pub fn column_names(&self) -> Vec<String> {
        match self {
            Table::Frame(f) => f.column_names().to_vec(),
            Table::Grouped(g) => g.frame().column_names().to_vec(),
            Table::Lazy(l) => l.column_names(),
        }
    }

    /// Current grouping columns; empty when ungrouped.
    pub fn group_names(&self) -> Vec<String> {
        match self {
            Table::Frame(_) => Vec::new(),
            Table::Grouped(g) => g.group_names().to_vec(),
            Table::Lazy(l) => l.group_names().to_vec(),
        }
    }

    /// Materialise as a plain frame, running the query of a lazy table.
    pub fn collect(self) -> Result<Frame, TqlError> {
        match self {
            Table::Frame(f) => Ok(f),
            Table::Grouped(g) => Ok(g.ungroup()),
            Table::Lazy(l) => Ok(l.collect()?),
        }
    }

    /// SQL of a lazy table.
    pub fn show_query(&self) -> Result<String, TqlError> {
        match self {
            Table::Lazy(l) => Ok(l.show_query()),
            other => Err(TqlError::Unsupported(format!("show_query needs a lazy table, got a {}", other.kind()))),
        }
    }
}

impl From<Frame> for Table {
    fn from(f: Frame) -> Self {
        Table::Frame(f)
    }
}

impl From<GroupedFrame> for Table {
    fn from(g: GroupedFrame) -> Self {
        Table::Grouped(g)
    }
}

impl From<LazyTbl> for Table {
    fn from(l: LazyTbl) -> Self {
        Table::Lazy(l)
    }
}

impl fmt::Display for Table {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Table::Frame(frame) => write!(f, "{}", frame),
            Table::Grouped(g) => write!(f, "{}", g),
            Table::Lazy(l) => write!(f, "{}", l),
        }
    }
}
