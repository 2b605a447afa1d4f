//! Local function tables and the `CallTreeLocal` rewriter
//!
//! `CallTreeLocal` turns method calls, properties and operators recorded on
//! a capture into explicit calls of backend functions:
//!
//! ```text
//! _.x.str.upper()   ->  str.upper(_.x)
//! _.a + 1           ->  __add__(_.a, 1)
//! ```

use crate::dispatch::{Dispatch, DispatchRegistry};
use crate::RegistryError;
use std::collections::{BTreeSet, HashMap};
use tql_ir::{CallListener, FuncRef, Node};

/// Accessor namespaces whose methods are looked up as `ns.method`.
pub const SUB_ATTRS: &[&str] = &["str", "dt"];

/// Attributes evaluated as calls without parentheses.
pub const PROPERTIES: &[&str] = &[
    "size",
    "dt.year",
    "dt.month",
    "dt.day",
    "dt.hour",
    "dt.minute",
    "dt.second",
    "dt.quarter",
    "dt.week",
    "dt.weekofyear",
    "dt.dayofweek",
    "dt.weekday",
    "dt.dayofyear",
    "dt.days_in_month",
    "dt.daysinmonth",
    "dt.is_month_start",
    "dt.is_month_end",
    "dt.is_quarter_start",
    "dt.is_quarter_end",
    "dt.is_year_start",
    "dt.is_year_end",
];

/// Name-keyed function table of one backend context.
pub trait LocalTable {
    fn lookup(&self, name: &str) -> Option<Dispatch<FuncRef>>;

    /// Backend/dialect name used in lookup errors.
    fn context(&self) -> &str;
}

/// Owned function table.
#[derive(Debug, Clone, Default)]
pub struct FuncTable {
    context: String,
    entries: HashMap<String, Dispatch<FuncRef>>,
}

impl FuncTable {
    pub fn new(context: impl Into<String>) -> Self {
        Self {
            context: context.into(),
            entries: HashMap::new(),
        }
    }

    pub fn insert(&mut self, name: impl Into<String>, entry: Dispatch<FuncRef>) {
        self.entries.insert(name.into(), entry);
    }

    pub fn get(&self, name: &str) -> Option<&Dispatch<FuncRef>> {
        self.entries.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    pub fn names(&self) -> BTreeSet<&str> {
        self.entries.keys().map(String::as_str).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries of `self`, then the entries of `fallback` that `self` lacks.
    pub fn overlay(&self, fallback: &FuncTable, context: impl Into<String>) -> FuncTable {
        let mut entries = fallback.entries.clone();
        entries.extend(self.entries.iter().map(|(k, v)| (k.clone(), v.clone())));
        FuncTable {
            context: context.into(),
            entries,
        }
    }
}

impl LocalTable for FuncTable {
    fn lookup(&self, name: &str) -> Option<Dispatch<FuncRef>> {
        self.entries.get(name).cloned()
    }

    fn context(&self) -> &str {
        &self.context
    }
}

/// Resolves generic functions against one type tag of a registry.
pub struct DispatchTarget<'a> {
    registry: &'a DispatchRegistry<FuncRef>,
    tag: String,
}

impl<'a> DispatchTarget<'a> {
    pub fn new(registry: &'a DispatchRegistry<FuncRef>, tag: impl Into<String>) -> Self {
        Self {
            registry,
            tag: tag.into(),
        }
    }
}

impl LocalTable for DispatchTarget<'_> {
    fn lookup(&self, name: &str) -> Option<Dispatch<FuncRef>> {
        self.registry.resolve(name, &self.tag).ok().flatten().cloned()
    }

    fn context(&self) -> &str {
        &self.tag
    }
}

/// Up to `max_n` attribute names at the end of a chain, outermost last, and
/// the object they hang off.
///
/// `_.x.str.upper` with `max_n = 2` gives `(["str", "upper"], _.x)`.
pub fn get_attr_chain(node: &Node, max_n: usize) -> (Vec<String>, &Node) {
    let mut names = Vec::new();
    let mut current = node;
    while let Node::Attr { obj, name } = current {
        if names.len() == max_n {
            break;
        }
        names.push(name.clone());
        current = obj;
    }
    names.reverse();
    (names, current)
}

/// Rewrites captured method calls, properties and operators into calls of
/// functions from a local table.
pub struct CallTreeLocal<'a> {
    local: &'a dyn LocalTable,
    call_sub_attr: BTreeSet<String>,
    chain_sub_attr: bool,
    call_props: BTreeSet<String>,
    dispatch: Option<&'a dyn LocalTable>,
}

impl<'a> CallTreeLocal<'a> {
    pub fn new(local: &'a dyn LocalTable) -> Self {
        Self {
            local,
            call_sub_attr: BTreeSet::new(),
            chain_sub_attr: false,
            call_props: BTreeSet::new(),
            dispatch: None,
        }
    }

    /// The `str`/`dt` accessors and their properties, chained, with generic
    /// functions resolved through `local` as well.
    pub fn with_accessors(local: &'a dyn LocalTable) -> Self {
        Self::new(local)
            .call_sub_attr(SUB_ATTRS.iter().copied())
            .chain_sub_attr(true)
            .call_props(PROPERTIES.iter().copied())
    }

    /// Namespaces such as `str` and `dt` whose methods are looked up as
    /// functions of the namespace's receiver.
    pub fn call_sub_attr<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.call_sub_attr = names.into_iter().map(Into::into).collect();
        self
    }

    /// Look up `dt.year` rather than `year`.
    pub fn chain_sub_attr(mut self, chain: bool) -> Self {
        self.chain_sub_attr = chain;
        self
    }

    /// Attributes that are calls without parentheses (`_.x.dt.year`).
    pub fn call_props<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.call_props = names.into_iter().map(Into::into).collect();
        self
    }

    /// Resolver for generic functions embedded in the tree.
    pub fn dispatch(mut self, table: &'a dyn LocalTable) -> Self {
        self.dispatch = Some(table);
        self
    }

    pub fn rewrite(&mut self, node: &Node) -> Result<Node, RegistryError> {
        self.enter(node)
    }

    fn lookup(&self, name: &str) -> Result<FuncRef, RegistryError> {
        match self.local.lookup(name) {
            Some(Dispatch::Implemented(f)) => Ok(f),
            Some(Dispatch::LookupBound(msg)) => Err(RegistryError::LookupBound(msg)),
            None => Err(RegistryError::FunctionLookup {
                name: name.to_string(),
                context: self.local.context().to_string(),
            }),
        }
    }

    /// Function name and receiver of an attribute chain.
    fn method_target<'n>(&self, func: &'n Node) -> Option<(String, &'n Node)> {
        let Node::Attr { obj, name } = func else {
            return None;
        };
        let (chain, rest) = get_attr_chain(func, 2);
        if chain.len() == 2 && self.call_sub_attr.contains(&chain[0]) {
            let name = if self.chain_sub_attr {
                chain.join(".")
            } else {
                chain[1].clone()
            };
            return Some((name, rest));
        }
        Some((name.clone(), obj.as_ref()))
    }

    fn local_call(&mut self, func: FuncRef, receiver: &Node, args: &[Node], kwargs: &[(String, Node)]) -> Result<Node, RegistryError> {
        let mut new_args = vec![self.enter(receiver)?];
        for arg in args {
            new_args.push(self.enter(arg)?);
        }
        let kwargs = kwargs
            .iter()
            .map(|(k, v)| Ok((k.clone(), self.enter(v)?)))
            .collect::<Result<Vec<_>, RegistryError>>()?;
        Ok(Node::func_call(func, new_args, kwargs))
    }

    fn resolve_generic(&self, func: &FuncRef) -> Result<FuncRef, RegistryError> {
        if let Some(dispatch) = self.dispatch {
            match dispatch.lookup(func.name()) {
                Some(Dispatch::Implemented(f)) => return Ok(f),
                Some(Dispatch::LookupBound(msg)) => return Err(RegistryError::LookupBound(msg)),
                None => {}
            }
        }
        self.lookup(func.name())
    }
}

impl CallListener for CallTreeLocal<'_> {
    type Error = RegistryError;

    fn enter_func(&mut self, name: &str, node: &Node) -> Result<Option<Node>, RegistryError> {
        match node {
            Node::Call { func, args, kwargs } => match func.as_ref() {
                Node::FuncArg { func: f } => {
                    let f = if f.is_generic() { self.resolve_generic(f)? } else { f.clone() };
                    let args = args.iter().map(|a| self.enter(a)).collect::<Result<Vec<_>, _>>()?;
                    let kwargs = kwargs
                        .iter()
                        .map(|(k, v)| Ok((k.clone(), self.enter(v)?)))
                        .collect::<Result<Vec<_>, RegistryError>>()?;
                    Ok(Some(Node::func_call(f, args, kwargs)))
                }
                attr @ Node::Attr { .. } => {
                    let Some((fname, receiver)) = self.method_target(attr) else {
                        return Ok(None);
                    };
                    let f = self.lookup(&fname)?;
                    self.local_call(f, receiver, args, kwargs).map(Some)
                }
                _ => Ok(None),
            },

            Node::Attr { obj, .. } if !obj.is_meta_arg() => {
                let Some((fname, receiver)) = self.method_target(node) else {
                    return Ok(None);
                };
                if receiver.is_meta_arg() || !self.call_props.contains(&fname) {
                    return Ok(None);
                }
                let f = self.lookup(&fname)?;
                self.local_call(f, receiver, &[], &[]).map(Some)
            }

            Node::Binary { left, right, .. } => self.operator_call(name, &[left.as_ref(), right.as_ref()]),
            Node::BinaryRight { receiver, other, .. } => self.operator_call(name, &[receiver.as_ref(), other.as_ref()]),
            Node::Unary { operand, .. } => self.operator_call(name, &[operand.as_ref()]),

            Node::FuncArg { func } if func.is_generic() => {
                Ok(Some(Node::func_arg(self.resolve_generic(func)?)))
            }

            _ => Ok(None),
        }
    }
}

impl CallTreeLocal<'_> {
    /// Operators become calls only when the table knows their method name.
    fn operator_call(&mut self, name: &str, operands: &[&Node]) -> Result<Option<Node>, RegistryError> {
        match self.local.lookup(name) {
            Some(Dispatch::Implemented(f)) => {
                let (receiver, rest) = match operands.split_first() {
                    Some(split) => split,
                    None => return Ok(None),
                };
                let rest: Vec<Node> = rest.iter().map(|n| (*n).clone()).collect();
                self.local_call(f, receiver, &rest, &[]).map(Some)
            }
            Some(Dispatch::LookupBound(msg)) => Err(RegistryError::LookupBound(msg)),
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generic::GenericFunction;
    use crate::hierarchy::TypeHierarchy;
    use std::sync::Arc;
    use tql_ir::{col, ScalarFunction};

    fn named(name: &str) -> FuncRef {
        FuncRef::new(Arc::new(ScalarFunction::new(name, |args| Ok(args[0].clone()))))
    }

    fn table() -> FuncTable {
        let mut t = FuncTable::new("test");
        for name in ["mean", "__add__", "__radd__", "upper", "str.upper", "year", "dt.year", "n"] {
            t.insert(name, Dispatch::Implemented(named(name)));
        }
        t.insert("__pow__", Dispatch::LookupBound("** is not supported".to_string()));
        t
    }

    #[test]
    fn test_method_call() {
        let t = table();
        let out = CallTreeLocal::new(&t)
            .rewrite(col("x").method("mean", vec![]).node())
            .unwrap();
        assert_eq!(out.to_string(), "mean(_.x)");
    }

    #[test]
    fn test_sub_attr_call() {
        let t = table();
        let node = col("x").attr("str").method("upper", vec![]).into_node();

        let flat = CallTreeLocal::new(&t).call_sub_attr(["str"]).rewrite(&node).unwrap();
        assert_eq!(flat.to_string(), "upper(_.x)");

        let chained = CallTreeLocal::new(&t)
            .call_sub_attr(["str"])
            .chain_sub_attr(true)
            .rewrite(&node)
            .unwrap();
        assert_eq!(chained.to_string(), "str.upper(_.x)");
    }

    #[test]
    fn test_property_under_namespace() {
        let t = table();
        let node = col("d").attr("dt").attr("year").into_node();
        let out = CallTreeLocal::new(&t)
            .call_sub_attr(["dt"])
            .chain_sub_attr(true)
            .call_props(["dt.year"])
            .rewrite(&node)
            .unwrap();
        assert_eq!(out.to_string(), "dt.year(_.d)");

        // plain column access is left alone even if the name is a property
        let plain = CallTreeLocal::new(&t).call_props(["year"]).rewrite(col("year").node()).unwrap();
        assert_eq!(plain, Node::column("year"));
    }

    #[test]
    fn test_operators() {
        let t = table();
        let out = CallTreeLocal::new(&t).rewrite((col("a") + 1).node()).unwrap();
        assert_eq!(out.to_string(), "__add__(_.a, 1)");

        let out = CallTreeLocal::new(&t).rewrite((1i32 + col("a")).node()).unwrap();
        assert_eq!(out.to_string(), "__radd__(_.a, 1)");

        // not in the table: kept as an operator
        let out = CallTreeLocal::new(&t).rewrite((col("a") - 1).node()).unwrap();
        assert_eq!(out.to_string(), "_.a - 1");

        let err = CallTreeLocal::new(&t).rewrite(col("a").pow(2).node()).unwrap_err();
        assert!(matches!(err, RegistryError::LookupBound(_)));
    }

    #[test]
    fn test_missing_method_is_lookup_error() {
        let t = table();
        let err = CallTreeLocal::new(&t)
            .rewrite(col("x").method("frobnicate", vec![]).node())
            .unwrap_err();
        match err {
            RegistryError::FunctionLookup { name, context } => {
                assert_eq!(name, "frobnicate");
                assert_eq!(context, "test");
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_nested_receivers_are_rewritten() {
        let t = table();
        let node = (col("x").method("mean", vec![]) + 1).into_node();
        let out = CallTreeLocal::new(&t).rewrite(&node).unwrap();
        assert_eq!(out.to_string(), "__add__(mean(_.x), 1)");
    }

    #[test]
    fn test_generic_resolved_through_dispatch() {
        let mut types = TypeHierarchy::new();
        types.add("Col", &[]).unwrap();
        let mut registry = DispatchRegistry::new("test", types);
        registry.register("n", "Col", named("n_col")).unwrap();
        registry.register_bound("bad", "Col", "bad is not supported").unwrap();

        let t = table();
        let target = DispatchTarget::new(&registry, "Col");

        let n = GenericFunction::new("n");
        let out = CallTreeLocal::new(&t).dispatch(&target).rewrite(n.on(sym_x()).node()).unwrap();
        assert_eq!(out.to_string(), "n_col(_.x)");

        // without a dispatcher the local table is used by name
        let out = CallTreeLocal::new(&t).rewrite(n.on(sym_x()).node()).unwrap();
        assert_eq!(out.to_string(), "n(_.x)");

        let bad = GenericFunction::new("bad");
        let err = CallTreeLocal::new(&t).dispatch(&target).rewrite(bad.on(sym_x()).node());
        assert!(matches!(err, Err(RegistryError::LookupBound(_))));
    }

    #[test]
    fn test_with_accessors() {
        let t = table();
        let node = (col("d").attr("dt").attr("year") + col("x").attr("str").method("upper", vec![])).into_node();
        let out = CallTreeLocal::with_accessors(&t).rewrite(&node).unwrap();
        assert_eq!(out.to_string(), "__add__(dt.year(_.d), str.upper(_.x))");
    }

    fn sym_x() -> Node {
        Node::column("x")
    }

    #[test]
    fn test_get_attr_chain() {
        let node = col("x").attr("str").attr("upper").into_node();
        let (chain, rest) = get_attr_chain(&node, 2);
        assert_eq!(chain, vec!["str", "upper"]);
        assert_eq!(rest, &Node::column("x"));
    }
}
