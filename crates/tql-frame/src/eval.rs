//! Evaluation of bound expression trees over frames

use crate::datum::Datum;
use crate::functions::FrameFunction;
use crate::FrameError;
use std::any::Any;
use std::fmt;
use std::sync::Arc;
use tql_ir::{
    binary_value, unary_value, BinaryOperator, EvalError, Evaluator, FuncRef, Function, Node, Symbolic, UnaryOperator,
    Value,
};
use tql_registry::RegistryError;

/// Evaluates trees whose calls were bound by `CallTreeLocal`. Operators are
/// applied row by row; unbound methods are lookup errors.
#[derive(Debug, Default, Clone, Copy)]
pub struct FrameEvaluator;

fn column(obj: Datum, name: &str) -> Result<Datum, FrameError> {
    match obj {
        Datum::Frame(f) => Ok(Datum::Series(f.get(name)?.to_vec())),
        Datum::Grouped(g) => Ok(Datum::GroupedSeries {
            values: g.frame().get(name)?.to_vec(),
            grouping: g.grouping().clone(),
        }),
        other => Err(FrameError::Unsupported(format!("column {} of a {}", name, other.kind()))),
    }
}

impl Evaluator for FrameEvaluator {
    type Value = Datum;
    type Error = FrameError;

    fn literal(&self, value: &Value) -> Result<Datum, FrameError> {
        Ok(Datum::Scalar(value.clone()))
    }

    fn getattr(&self, obj: Datum, name: &str) -> Result<Datum, FrameError> {
        column(obj, name)
    }

    fn getitem(&self, obj: Datum, key: Datum) -> Result<Datum, FrameError> {
        match (obj, key) {
            (obj, Datum::Scalar(Value::Str(name))) => column(obj, &name),
            (Datum::Series(values), Datum::Scalar(Value::Int(i))) => {
                let idx = if i < 0 { values.len() as i64 + i } else { i };
                usize::try_from(idx)
                    .ok()
                    .and_then(|i| values.get(i).cloned())
                    .map(Datum::Scalar)
                    .ok_or_else(|| FrameError::Eval(EvalError::Missing(format!("index {}", i))))
            }
            (obj, key) => Err(FrameError::Unsupported(format!(
                "indexing a {} with a {}",
                obj.kind(),
                key.kind()
            ))),
        }
    }

    fn binary(&self, op: BinaryOperator, left: Datum, right: Datum) -> Result<Datum, FrameError> {
        Datum::zip_map(&[&left, &right], |row| Ok(binary_value(op, row[0], row[1])?))
    }

    fn unary(&self, op: UnaryOperator, operand: Datum) -> Result<Datum, FrameError> {
        operand.map(|v| Ok(unary_value(op, v)?))
    }

    fn call_method(
        &self,
        _receiver: Datum,
        name: &str,
        _args: Vec<Datum>,
        _kwargs: Vec<(String, Datum)>,
    ) -> Result<Datum, FrameError> {
        Err(RegistryError::FunctionLookup {
            name: name.to_string(),
            context: "frame".to_string(),
        }
        .into())
    }

    fn call_function(
        &self,
        func: &FuncRef,
        args: Vec<Datum>,
        kwargs: Vec<(String, Datum)>,
    ) -> Result<Datum, FrameError> {
        if let Some(f) = func.downcast::<FrameFunction>() {
            return f.apply(args, kwargs);
        }
        if let Some(f) = func.downcast::<UserFunction>() {
            return f.apply(args);
        }
        if func.is_generic() {
            return Err(RegistryError::FunctionLookup {
                name: func.name().to_string(),
                context: "frame".to_string(),
            }
            .into());
        }
        Err(FrameError::Unsupported(format!("function {}", func.name())))
    }

    fn dict(&self, entries: Vec<(Datum, Datum)>) -> Result<Datum, FrameError> {
        Ok(Datum::Dict(entries))
    }
}

type UserImp = dyn Fn(&[Datum]) -> Result<Datum, FrameError> + Send + Sync;

/// A caller-supplied function over ungrouped data. On grouped data it is
/// run once per group by the split-apply fallback.
pub struct UserFunction {
    name: String,
    imp: Arc<UserImp>,
}

impl UserFunction {
    pub fn new<F>(name: impl Into<String>, imp: F) -> Arc<Self>
    where
        F: Fn(&[Datum]) -> Result<Datum, FrameError> + Send + Sync + 'static,
    {
        Arc::new(Self {
            name: name.into(),
            imp: Arc::new(imp),
        })
    }

    /// `name(args...)` as a capture.
    pub fn call(self: &Arc<Self>, args: Vec<Node>) -> Symbolic {
        Symbolic::new(Node::func_call(FuncRef::new(self.clone()), args, Vec::new()))
    }

    fn apply(&self, args: Vec<Datum>) -> Result<Datum, FrameError> {
        if args.iter().any(|d| d.grouping().is_some()) {
            return Err(FrameError::NoFastPath(format!("{}() only runs on ungrouped data", self.name)));
        }
        (self.imp)(&args)
    }
}

impl fmt::Debug for UserFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "UserFunction({})", self.name)
    }
}

impl Function for UserFunction {
    fn name(&self) -> &str {
        &self.name
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::{values, Frame, GroupedFrame};
    use tql_ir::col;

    fn frame() -> Arc<Frame> {
        Arc::new(Frame::new([("a", values([1, 2, 3])), ("b", values([10, 20, 30]))]).unwrap())
    }

    #[test]
    fn test_operators_row_by_row() {
        let node = (col("a") + col("b") * 2).into_node();
        match node.eval(&FrameEvaluator, &Datum::Frame(frame())).unwrap() {
            Datum::Series(v) => assert_eq!(v, values([21, 42, 63])),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_unbound_method_is_lookup_error() {
        let node = col("a").method("mean", vec![]).into_node();
        let err = node.eval(&FrameEvaluator, &Datum::Frame(frame())).unwrap_err();
        assert!(matches!(err, FrameError::Registry(RegistryError::FunctionLookup { .. })));
    }

    #[test]
    fn test_user_function_refuses_groups() {
        let total = UserFunction::new("total", |args| match &args[0] {
            Datum::Series(v) => Ok(Datum::Scalar(Value::Int(v.iter().filter_map(Value::as_i64).sum()))),
            other => Err(FrameError::Unsupported(other.kind().to_string())),
        });
        let node = total.call(vec![Node::column("a")]).into_node();

        let out = node.eval(&FrameEvaluator, &Datum::Frame(frame())).unwrap();
        assert_eq!(out.as_scalar(), Some(&Value::Int(6)));

        let grouped = GroupedFrame::new((*frame()).clone(), vec!["a".into()]).unwrap();
        let err = node.eval(&FrameEvaluator, &Datum::Grouped(Arc::new(grouped))).unwrap_err();
        assert!(matches!(err, FrameError::NoFastPath(_)));
    }
}
