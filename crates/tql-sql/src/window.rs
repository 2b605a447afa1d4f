//! Window placement and promotion
//!
//! Dialect translations emit `OVER` nodes with empty partitions and
//! orderings. [`WindowReplacer`] fills those in from the table's grouping and
//! ordering, and optionally moves each window into a target select as a
//! labelled column so a predicate can refer to it from an outer query.

use crate::ast::{Expr, Select, SelectItem, SortKey, WindowKind};
use tracing::warn;

pub struct WindowReplacer<'a> {
    group_by: &'a [Expr],
    order_by: &'a [SortKey],
}

impl<'a> WindowReplacer<'a> {
    pub fn new(group_by: &'a [Expr], order_by: &'a [SortKey]) -> Self {
        Self { group_by, order_by }
    }

    /// Window with the current partition and ordering applied.
    fn place(&self, window: &Expr) -> Expr {
        let Expr::Over {
            func,
            kind,
            partition_by,
            order_by,
            frame,
        } = window
        else {
            return window.clone();
        };

        let (partition_by, order_by) = match kind {
            WindowKind::Agg => (self.group_by.to_vec(), order_by.clone()),
            WindowKind::Rank => {
                let mut partition = self.group_by.to_vec();
                partition.extend(partition_by.iter().filter(|e| !self.group_by.contains(e)).cloned());
                (partition, order_by.clone())
            }
            WindowKind::Cumulative => {
                if self.order_by.is_empty() && order_by.is_empty() {
                    warn!(func = %window_name(func), "Cumulative window without an ordering; row order is undefined");
                }
                let order = if order_by.is_empty() { self.order_by.to_vec() } else { order_by.clone() };
                (self.group_by.to_vec(), order)
            }
        };

        Expr::Over {
            func: func.clone(),
            kind: *kind,
            partition_by,
            order_by,
            frame: *frame,
        }
    }

    /// Place every window in `expr`. With a target, each window becomes a
    /// `winN` column of the target and `expr` refers to it by name.
    ///
    /// Returns the rewritten expression and the placed windows.
    pub fn replace(&self, expr: &Expr, mut target: Option<&mut Select>) -> (Expr, Vec<Expr>) {
        let mut windows = Vec::new();
        let out = expr.rewrite(&mut |e| {
            if !matches!(e, Expr::Over { .. }) {
                return None;
            }
            let placed = self.place(e);
            windows.push(placed.clone());
            match target.as_deref_mut() {
                Some(select) => {
                    let name = free_name(select);
                    select.items.push(SelectItem::new(name.clone(), placed));
                    Some(Expr::Column { rel: None, name })
                }
                None => Some(placed),
            }
        });
        (out, windows)
    }
}

fn window_name(func: &Expr) -> String {
    match func {
        Expr::Function { name, .. } => name.clone(),
        other => format!("{:?}", other),
    }
}

/// First `winN` not already a column of `select`.
fn free_name(select: &Select) -> String {
    (1..)
        .map(|i| format!("win{}", i))
        .find(|name| select.item(name).is_none())
        .unwrap_or_default()
}
