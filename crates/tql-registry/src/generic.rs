//! Generic functions usable both on captured expressions and concrete data

use crate::dispatch::DispatchRegistry;
use crate::RegistryError;
use std::any::Any;
use std::sync::Arc;
use tql_ir::{FuncRef, Function, Node, Symbolic};

/// Concrete data that can select an implementation by type tag.
pub trait Dispatchable {
    fn type_tag(&self) -> &str;
}

/// A named dispatcher. Calling it on a capture records the call; applying it
/// to data picks the implementation registered for the data's type tag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenericFunction {
    name: String,
}

impl GenericFunction {
    pub fn new(name: impl Into<String>) -> Arc<Self> {
        Arc::new(Self { name: name.into() })
    }

    pub fn func_ref(self: &Arc<Self>) -> FuncRef {
        FuncRef::new(self.clone())
    }

    /// `name(args...)` as a new capture. Arguments are stripped to trees.
    pub fn call(self: &Arc<Self>, args: Vec<Node>, kwargs: Vec<(String, Node)>) -> Symbolic {
        Symbolic::new(Node::func_call(self.func_ref(), args, kwargs))
    }

    /// Shorthand for a single captured argument.
    pub fn on(self: &Arc<Self>, arg: impl Into<Node>) -> Symbolic {
        self.call(vec![arg.into()], Vec::new())
    }

    /// Implementation registered for `data`'s type tag.
    pub fn resolve<'r, F, D>(&self, registry: &'r DispatchRegistry<F>, data: &D) -> Result<&'r F, RegistryError>
    where
        D: Dispatchable + ?Sized,
    {
        registry.dispatch(&self.name, data.type_tag())
    }
}

impl Function for GenericFunction {
    fn name(&self) -> &str {
        &self.name
    }

    fn is_generic(&self) -> bool {
        true
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hierarchy::TypeHierarchy;
    use tql_ir::col;

    struct Numbers(Vec<i64>);

    impl Dispatchable for Numbers {
        fn type_tag(&self) -> &str {
            "Numbers"
        }
    }

    #[test]
    fn test_call_on_capture_records() {
        let total = GenericFunction::new("total");
        let expr = total.on(col("x") + 1);
        assert_eq!(expr.to_string(), "total(_.x + 1)");
        assert_eq!(expr.node().obj_name(), Some("total"));
    }

    #[test]
    fn test_apply_to_data_dispatches() {
        let mut types = TypeHierarchy::new();
        types.add("Numbers", &[]).unwrap();
        let mut registry: DispatchRegistry<fn(&Numbers) -> i64> = DispatchRegistry::new("test", types);
        registry.register("total", "Numbers", |n| n.0.iter().sum()).unwrap();

        let total = GenericFunction::new("total");
        let data = Numbers(vec![1, 2, 3]);
        let imp = total.resolve(&registry, &data).unwrap();
        assert_eq!(imp(&data), 6);
    }

    #[test]
    fn test_func_ref_is_generic() {
        let f = GenericFunction::new("f").func_ref();
        assert!(f.is_generic());
        assert!(f.downcast::<GenericFunction>().is_some());
    }
}
