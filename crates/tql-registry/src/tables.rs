//! Elementwise / aggregate / window function tables
//!
//! A backend registers its translations in a [`KindRegistry`], one dispatch
//! registry per kind sharing a type hierarchy, and compiles them into
//! [`KindTables`] for the column and aggregate tags of one dialect.

use crate::dispatch::{Dispatch, DispatchRegistry};
use crate::hierarchy::TypeHierarchy;
use crate::local::FuncTable;
use crate::RegistryError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use tql_ir::FuncRef;

/// How a function consumes rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FuncKind {
    /// row at a time
    Elementwise,
    /// many rows to one value
    Aggregate,
    /// many rows to many rows, partition and order aware
    Window,
}

impl fmt::Display for FuncKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FuncKind::Elementwise => "elementwise",
            FuncKind::Aggregate => "aggregate",
            FuncKind::Window => "window",
        };
        write!(f, "{}", name)
    }
}

#[derive(Debug, Clone)]
pub struct KindRegistry {
    elementwise: DispatchRegistry<FuncRef>,
    aggregate: DispatchRegistry<FuncRef>,
    window: DispatchRegistry<FuncRef>,
}

impl KindRegistry {
    pub fn new(context: &str, types: TypeHierarchy) -> Self {
        Self {
            elementwise: DispatchRegistry::new(format!("{} elementwise", context), types.clone()),
            aggregate: DispatchRegistry::new(format!("{} aggregate", context), types.clone()),
            window: DispatchRegistry::new(format!("{} window", context), types),
        }
    }

    pub fn registry(&self, kind: FuncKind) -> &DispatchRegistry<FuncRef> {
        match kind {
            FuncKind::Elementwise => &self.elementwise,
            FuncKind::Aggregate => &self.aggregate,
            FuncKind::Window => &self.window,
        }
    }

    pub fn registry_mut(&mut self, kind: FuncKind) -> &mut DispatchRegistry<FuncRef> {
        match kind {
            FuncKind::Elementwise => &mut self.elementwise,
            FuncKind::Aggregate => &mut self.aggregate,
            FuncKind::Window => &mut self.window,
        }
    }

    pub fn insert(&mut self, kind: FuncKind, name: &str, tag: &str, entry: Dispatch<FuncRef>) -> Result<(), RegistryError> {
        self.registry_mut(kind).insert(name, tag, entry)
    }

    /// Resolve every registered name for `col_tag` (elementwise and window)
    /// and `agg_tag` (aggregate).
    pub fn compile(&self, context: &str, col_tag: &str, agg_tag: &str) -> Result<KindTables, RegistryError> {
        let elementwise = compile_one(&self.elementwise, context, col_tag)?;
        let aggregate = compile_one(&self.aggregate, context, agg_tag)?;
        let window = compile_one(&self.window, context, col_tag)?;
        Ok(KindTables::new(context, elementwise, aggregate, window))
    }
}

fn compile_one(registry: &DispatchRegistry<FuncRef>, context: &str, tag: &str) -> Result<FuncTable, RegistryError> {
    let mut table = FuncTable::new(context);
    for name in registry.names() {
        if let Some(entry) = registry.resolve(name, tag)? {
            table.insert(name, entry.clone());
        }
    }
    Ok(table)
}

/// Compiled tables of one backend, plus the lookup contexts verbs use: the
/// window table over the elementwise one (mutate, filter, arrange) and the
/// aggregate table over the elementwise one (summarize).
#[derive(Debug, Clone)]
pub struct KindTables {
    context: String,
    elementwise: FuncTable,
    aggregate: FuncTable,
    window: FuncTable,
    window_context: FuncTable,
    aggregate_context: FuncTable,
}

impl KindTables {
    pub fn new(context: &str, elementwise: FuncTable, aggregate: FuncTable, window: FuncTable) -> Self {
        let window_context = window.overlay(&elementwise, context);
        let aggregate_context = aggregate.overlay(&elementwise, context);
        Self {
            context: context.to_string(),
            elementwise,
            aggregate,
            window,
            window_context,
            aggregate_context,
        }
    }

    pub fn context(&self) -> &str {
        &self.context
    }

    pub fn table(&self, kind: FuncKind) -> &FuncTable {
        match kind {
            FuncKind::Elementwise => &self.elementwise,
            FuncKind::Aggregate => &self.aggregate,
            FuncKind::Window => &self.window,
        }
    }

    pub fn window_context(&self) -> &FuncTable {
        &self.window_context
    }

    pub fn aggregate_context(&self) -> &FuncTable {
        &self.aggregate_context
    }

    /// Aggregate names with no window entry; empty for a complete backend.
    pub fn missing_window_names(&self) -> BTreeSet<String> {
        self.aggregate
            .names()
            .into_iter()
            .filter(|name| !self.window.contains(name))
            .map(str::to_string)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::local::LocalTable;
    use std::sync::Arc;
    use tql_ir::ScalarFunction;

    fn func(name: &str) -> Dispatch<FuncRef> {
        Dispatch::Implemented(FuncRef::new(Arc::new(ScalarFunction::new(name, |args| Ok(args[0].clone())))))
    }

    fn registry() -> KindRegistry {
        let mut types = TypeHierarchy::new();
        types.add("Col", &[]).unwrap();
        types.add("ColAgg", &["Col"]).unwrap();
        types.add("SubCol", &["Col"]).unwrap();
        types.add("SubColAgg", &["ColAgg", "SubCol"]).unwrap();
        KindRegistry::new("test", types)
    }

    #[test]
    fn test_compile_resolves_per_tag() {
        let mut reg = registry();
        reg.insert(FuncKind::Elementwise, "abs", "Col", func("abs")).unwrap();
        reg.insert(FuncKind::Elementwise, "abs", "SubCol", func("sub_abs")).unwrap();
        reg.insert(FuncKind::Aggregate, "mean", "ColAgg", func("avg")).unwrap();
        reg.insert(FuncKind::Window, "mean", "Col", func("avg_over")).unwrap();

        let tables = reg.compile("sub", "SubCol", "SubColAgg").unwrap();
        let abs = tables.table(FuncKind::Elementwise).get("abs").unwrap();
        assert_eq!(abs.implemented().unwrap().name(), "sub_abs");

        let mean = tables.aggregate_context().lookup("mean").unwrap();
        assert_eq!(mean.implemented().unwrap().name(), "avg");
        let mean = tables.window_context().lookup("mean").unwrap();
        assert_eq!(mean.implemented().unwrap().name(), "avg_over");

        // elementwise entries are visible from both contexts
        assert!(tables.aggregate_context().contains("abs"));
        assert!(tables.window_context().contains("abs"));
        assert!(tables.missing_window_names().is_empty());
    }

    #[test]
    fn test_missing_window_names() {
        let mut reg = registry();
        reg.insert(FuncKind::Aggregate, "median", "ColAgg", func("median")).unwrap();
        let tables = reg.compile("test", "Col", "ColAgg").unwrap();
        assert_eq!(tables.missing_window_names().into_iter().collect::<Vec<_>>(), vec!["median"]);
    }
}
