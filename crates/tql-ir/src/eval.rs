//! Evaluation of expression trees against concrete inputs
//!
//! Backends implement [`Evaluator`]; [`Node::eval`] walks the tree and
//! substitutes the input for every `_`.

use crate::node::{BinaryOperator, FuncRef, Function, Node, UnaryOperator};
use crate::Value;
use std::any::Any;
use std::cmp::Ordering;
use std::fmt;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum EvalError {
    #[error("Unsupported operation: {0}")]
    Unsupported(String),

    #[error("Type error: {0}")]
    Type(String),

    #[error("Missing name: {0}")]
    Missing(String),
}

/// Interpretation of each node operation for one backend.
pub trait Evaluator {
    type Value: Clone;
    type Error: From<EvalError>;

    fn literal(&self, value: &Value) -> Result<Self::Value, Self::Error>;

    fn getattr(&self, obj: Self::Value, name: &str) -> Result<Self::Value, Self::Error>;

    fn getitem(&self, obj: Self::Value, key: Self::Value) -> Result<Self::Value, Self::Error>;

    fn getslice(
        &self,
        _obj: Self::Value,
        _start: Option<Self::Value>,
        _stop: Option<Self::Value>,
        _step: Option<Self::Value>,
    ) -> Result<Self::Value, Self::Error> {
        Err(EvalError::Unsupported("slicing".to_string()).into())
    }

    /// `left op right`; reflected nodes arrive with operands already swapped.
    fn binary(
        &self,
        op: BinaryOperator,
        left: Self::Value,
        right: Self::Value,
    ) -> Result<Self::Value, Self::Error>;

    fn unary(&self, op: UnaryOperator, operand: Self::Value) -> Result<Self::Value, Self::Error>;

    fn call_method(
        &self,
        receiver: Self::Value,
        name: &str,
        args: Vec<Self::Value>,
        kwargs: Vec<(String, Self::Value)>,
    ) -> Result<Self::Value, Self::Error>;

    fn call_function(
        &self,
        func: &FuncRef,
        args: Vec<Self::Value>,
        kwargs: Vec<(String, Self::Value)>,
    ) -> Result<Self::Value, Self::Error>;

    fn call_value(
        &self,
        _callee: Self::Value,
        _args: Vec<Self::Value>,
        _kwargs: Vec<(String, Self::Value)>,
    ) -> Result<Self::Value, Self::Error> {
        Err(EvalError::Unsupported("calling a computed value".to_string()).into())
    }

    fn func_value(&self, func: &FuncRef) -> Result<Self::Value, Self::Error> {
        Err(EvalError::Unsupported(format!("bare function reference {}", func.name())).into())
    }

    fn dict(&self, _entries: Vec<(Self::Value, Self::Value)>) -> Result<Self::Value, Self::Error> {
        Err(EvalError::Unsupported("dict literal".to_string()).into())
    }

    /// Lazy nodes are handed over unevaluated.
    fn lazy(&self, node: &Node, _input: &Self::Value) -> Result<Self::Value, Self::Error> {
        Err(EvalError::Unsupported(format!("lazy expression {}", node)).into())
    }
}

impl Node {
    pub fn eval<E: Evaluator>(&self, ev: &E, input: &E::Value) -> Result<E::Value, E::Error> {
        match self {
            Node::MetaArg => Ok(input.clone()),
            Node::Literal { value } => ev.literal(value),
            Node::Attr { obj, name } => {
                let obj = obj.eval(ev, input)?;
                ev.getattr(obj, name)
            }
            Node::Item { obj, key } => {
                let obj = obj.eval(ev, input)?;
                match key.as_ref() {
                    Node::Slice { start, stop, step } => {
                        let part = |n: &Option<Box<Node>>| n.as_ref().map(|n| n.eval(ev, input)).transpose();
                        let (start, stop, step) = (part(start)?, part(stop)?, part(step)?);
                        ev.getslice(obj, start, stop, step)
                    }
                    key => {
                        let key = key.eval(ev, input)?;
                        ev.getitem(obj, key)
                    }
                }
            }
            Node::Slice { .. } => Err(EvalError::Unsupported("slice outside of an index".to_string()).into()),
            Node::Binary { op, left, right } => {
                let left = left.eval(ev, input)?;
                let right = right.eval(ev, input)?;
                ev.binary(*op, left, right)
            }
            Node::BinaryRight { op, receiver, other } => {
                let receiver = receiver.eval(ev, input)?;
                let other = other.eval(ev, input)?;
                ev.binary(*op, other, receiver)
            }
            Node::Unary { op, operand } => {
                let operand = operand.eval(ev, input)?;
                ev.unary(*op, operand)
            }
            Node::Call { func, args, kwargs } => {
                let args = args.iter().map(|a| a.eval(ev, input)).collect::<Result<Vec<_>, _>>()?;
                let kwargs = kwargs
                    .iter()
                    .map(|(k, v)| v.eval(ev, input).map(|v| (k.clone(), v)))
                    .collect::<Result<Vec<_>, _>>()?;

                match func.as_ref() {
                    Node::FuncArg { func } => ev.call_function(func, args, kwargs),
                    Node::Attr { obj, name } => {
                        let receiver = obj.eval(ev, input)?;
                        ev.call_method(receiver, name, args, kwargs)
                    }
                    other => {
                        let callee = other.eval(ev, input)?;
                        ev.call_value(callee, args, kwargs)
                    }
                }
            }
            Node::FuncArg { func } => ev.func_value(func),
            Node::Lazy { node } => ev.lazy(node, input),
            Node::DictCall { entries } => {
                let entries = entries
                    .iter()
                    .map(|(k, v)| Ok((k.eval(ev, input)?, v.eval(ev, input)?)))
                    .collect::<Result<Vec<_>, E::Error>>()?;
                ev.dict(entries)
            }
        }
    }
}

/// A plain scalar function usable inside trees evaluated by [`ValueEvaluator`].
pub struct ScalarFunction {
    name: String,
    imp: fn(&[Value]) -> Result<Value, EvalError>,
}

impl ScalarFunction {
    pub fn new(name: impl Into<String>, imp: fn(&[Value]) -> Result<Value, EvalError>) -> Self {
        Self { name: name.into(), imp }
    }

    pub fn apply(&self, args: &[Value]) -> Result<Value, EvalError> {
        (self.imp)(args)
    }
}

impl fmt::Debug for ScalarFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ScalarFunction({})", self.name)
    }
}

impl Function for ScalarFunction {
    fn name(&self) -> &str {
        &self.name
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Scalar binary operator over values.
///
/// Arithmetic with a null operand yields null; `//` and `%` floor toward
/// negative infinity.
pub fn binary_value(op: BinaryOperator, left: &Value, right: &Value) -> Result<Value, EvalError> {
    use BinaryOperator::*;

    match op {
        Eq => return Ok(Value::Bool(left.key_eq(right))),
        Ne => return Ok(Value::Bool(!left.key_eq(right))),
        _ => {}
    }

    if left.is_null() || right.is_null() {
        return Ok(Value::Null);
    }

    let type_error = || {
        EvalError::Type(format!(
            "unsupported operand types for {}: {} and {}",
            op.symbol(),
            left.type_name(),
            right.type_name()
        ))
    };

    if op.is_comparison() {
        comparable(left, right).ok_or_else(type_error)?;
        let ord = left.total_cmp(right);
        let result = match op {
            Gt => ord == Ordering::Greater,
            Lt => ord == Ordering::Less,
            Ge => ord != Ordering::Less,
            _ => ord != Ordering::Greater,
        };
        return Ok(Value::Bool(result));
    }

    match (op, left, right) {
        (Add, Value::Str(a), Value::Str(b)) => Ok(Value::Str(format!("{}{}", a, b))),
        (Add, Value::List(a), Value::List(b)) => Ok(Value::List(a.iter().chain(b).cloned().collect())),
        (And | Or | Xor, Value::Bool(a), Value::Bool(b)) => Ok(Value::Bool(match op {
            And => *a && *b,
            Or => *a || *b,
            _ => *a ^ *b,
        })),
        (MatMul, _, _) => Err(EvalError::Unsupported("matrix multiplication".to_string())),
        (TrueDiv, a, b) => {
            let (x, y) = (a.as_f64().ok_or_else(type_error)?, b.as_f64().ok_or_else(type_error)?);
            if y == 0.0 {
                return Err(EvalError::Type("division by zero".to_string()));
            }
            Ok(Value::Float(x / y))
        }
        (_, Value::Int(_) | Value::Bool(_), Value::Int(_) | Value::Bool(_)) => {
            let (a, b) = (left.as_i64().ok_or_else(type_error)?, right.as_i64().ok_or_else(type_error)?);
            int_binary(op, a, b)
        }
        (_, a, b) => {
            let (x, y) = (a.as_f64().ok_or_else(type_error)?, b.as_f64().ok_or_else(type_error)?);
            float_binary(op, x, y).ok_or_else(type_error)
        }
    }
}

fn comparable(left: &Value, right: &Value) -> Option<()> {
    let numeric = |v: &Value| matches!(v, Value::Int(_) | Value::Float(_) | Value::Bool(_));
    let temporal = |v: &Value| matches!(v, Value::Date(_) | Value::Timestamp(_));
    match (left, right) {
        (a, b) if numeric(a) && numeric(b) => Some(()),
        (a, b) if temporal(a) && temporal(b) => Some(()),
        (Value::Str(_), Value::Str(_)) | (Value::List(_), Value::List(_)) => Some(()),
        _ => None,
    }
}

fn int_binary(op: BinaryOperator, a: i64, b: i64) -> Result<Value, EvalError> {
    use BinaryOperator::*;
    let overflow = || EvalError::Type(format!("integer overflow in {}", op.symbol()));
    let zero = || EvalError::Type("division by zero".to_string());

    let out = match op {
        Add => a.checked_add(b).ok_or_else(overflow)?,
        Sub => a.checked_sub(b).ok_or_else(overflow)?,
        Mul => a.checked_mul(b).ok_or_else(overflow)?,
        FloorDiv => {
            if b == 0 {
                return Err(zero());
            }
            let q = a / b;
            if a % b != 0 && ((a < 0) != (b < 0)) {
                q - 1
            } else {
                q
            }
        }
        Mod => {
            if b == 0 {
                return Err(zero());
            }
            let r = a % b;
            if r != 0 && ((r < 0) != (b < 0)) {
                r + b
            } else {
                r
            }
        }
        Pow => {
            if b < 0 {
                return Ok(Value::Float((a as f64).powf(b as f64)));
            }
            let exp = u32::try_from(b).map_err(|_| overflow())?;
            a.checked_pow(exp).ok_or_else(overflow)?
        }
        LShift => a.checked_shl(u32::try_from(b).map_err(|_| overflow())?).ok_or_else(overflow)?,
        RShift => a.checked_shr(u32::try_from(b).map_err(|_| overflow())?).ok_or_else(overflow)?,
        And => a & b,
        Or => a | b,
        Xor => a ^ b,
        TrueDiv | MatMul | Gt | Lt | Eq | Ne | Ge | Le => {
            return Err(EvalError::Unsupported(format!("integer {}", op.symbol())));
        }
    };
    Ok(Value::Int(out))
}

fn float_binary(op: BinaryOperator, x: f64, y: f64) -> Option<Value> {
    use BinaryOperator::*;
    let out = match op {
        Add => x + y,
        Sub => x - y,
        Mul => x * y,
        FloorDiv => (x / y).floor(),
        Mod => x - y * (x / y).floor(),
        Pow => x.powf(y),
        _ => return None,
    };
    Some(Value::Float(out))
}

pub fn unary_value(op: UnaryOperator, operand: &Value) -> Result<Value, EvalError> {
    match (op, operand) {
        (_, Value::Null) => Ok(Value::Null),
        (UnaryOperator::Invert, Value::Bool(b)) => Ok(Value::Bool(!b)),
        (UnaryOperator::Invert, Value::Int(i)) => Ok(Value::Int(!i)),
        (UnaryOperator::Neg, Value::Int(i)) => Ok(Value::Int(-i)),
        (UnaryOperator::Neg, Value::Float(f)) => Ok(Value::Float(-f)),
        (UnaryOperator::Pos, v @ (Value::Int(_) | Value::Float(_))) => Ok(v.clone()),
        (op, v) => Err(EvalError::Type(format!(
            "bad operand type for unary {}: {}",
            op.symbol(),
            v.type_name()
        ))),
    }
}

/// Evaluates trees over plain values: maps for attribute access, lists and
/// maps for indexing.
#[derive(Debug, Default, Clone, Copy)]
pub struct ValueEvaluator;

impl ValueEvaluator {
    fn index(len: usize, i: i64) -> Option<usize> {
        let idx = if i < 0 { len as i64 + i } else { i };
        (0..len as i64).contains(&idx).then_some(idx as usize)
    }
}

impl Evaluator for ValueEvaluator {
    type Value = Value;
    type Error = EvalError;

    fn literal(&self, value: &Value) -> Result<Value, EvalError> {
        Ok(value.clone())
    }

    fn getattr(&self, obj: Value, name: &str) -> Result<Value, EvalError> {
        match obj {
            Value::Map(mut map) => map.remove(name).ok_or_else(|| EvalError::Missing(name.to_string())),
            other => Err(EvalError::Type(format!("{} has no attribute {}", other.type_name(), name))),
        }
    }

    fn getitem(&self, obj: Value, key: Value) -> Result<Value, EvalError> {
        match (obj, key) {
            (Value::Map(mut map), Value::Str(k)) => map.remove(&k).ok_or(EvalError::Missing(k)),
            (Value::List(items), Value::Int(i)) => Self::index(items.len(), i)
                .and_then(|i| items.into_iter().nth(i))
                .ok_or_else(|| EvalError::Missing(format!("index {}", i))),
            (Value::Str(s), Value::Int(i)) => {
                let chars: Vec<char> = s.chars().collect();
                Self::index(chars.len(), i)
                    .map(|i| Value::Str(chars[i].to_string()))
                    .ok_or_else(|| EvalError::Missing(format!("index {}", i)))
            }
            (obj, key) => Err(EvalError::Type(format!(
                "{} cannot be indexed by {}",
                obj.type_name(),
                key.type_name()
            ))),
        }
    }

    fn getslice(
        &self,
        obj: Value,
        start: Option<Value>,
        stop: Option<Value>,
        step: Option<Value>,
    ) -> Result<Value, EvalError> {
        let bound = |v: Option<Value>| -> Result<Option<i64>, EvalError> {
            match v {
                None | Some(Value::Null) => Ok(None),
                Some(v) => v
                    .as_i64()
                    .map(Some)
                    .ok_or_else(|| EvalError::Type(format!("slice bound must be int, got {}", v.type_name()))),
            }
        };
        let (start, stop, step) = (bound(start)?, bound(stop)?, bound(step)?.unwrap_or(1));
        if step <= 0 {
            return Err(EvalError::Unsupported("non-positive slice step".to_string()));
        }

        let take = |len: usize| -> Vec<usize> {
            let clamp = |i: i64| -> usize {
                let i = if i < 0 { len as i64 + i } else { i };
                i.clamp(0, len as i64) as usize
            };
            let lo = start.map_or(0, clamp);
            let hi = stop.map_or(len, clamp);
            (lo..hi.max(lo)).step_by(step as usize).collect()
        };

        match obj {
            Value::List(items) => Ok(Value::List(take(items.len()).into_iter().map(|i| items[i].clone()).collect())),
            Value::Str(s) => {
                let chars: Vec<char> = s.chars().collect();
                Ok(Value::Str(take(chars.len()).into_iter().map(|i| chars[i]).collect()))
            }
            other => Err(EvalError::Type(format!("{} cannot be sliced", other.type_name()))),
        }
    }

    fn binary(&self, op: BinaryOperator, left: Value, right: Value) -> Result<Value, EvalError> {
        binary_value(op, &left, &right)
    }

    fn unary(&self, op: UnaryOperator, operand: Value) -> Result<Value, EvalError> {
        unary_value(op, &operand)
    }

    fn call_method(
        &self,
        receiver: Value,
        name: &str,
        args: Vec<Value>,
        _kwargs: Vec<(String, Value)>,
    ) -> Result<Value, EvalError> {
        let str_arg = |i: usize| -> Result<&str, EvalError> {
            args.get(i)
                .and_then(Value::as_str)
                .ok_or_else(|| EvalError::Type(format!("{}() expects a string argument", name)))
        };

        match (name, &receiver) {
            ("upper", Value::Str(s)) => Ok(Value::Str(s.to_uppercase())),
            ("lower", Value::Str(s)) => Ok(Value::Str(s.to_lowercase())),
            ("strip", Value::Str(s)) => Ok(Value::Str(s.trim().to_string())),
            ("len", Value::Str(s)) => Ok(Value::Int(s.chars().count() as i64)),
            ("len", Value::List(l)) => Ok(Value::Int(l.len() as i64)),
            ("len", Value::Map(m)) => Ok(Value::Int(m.len() as i64)),
            ("startswith", Value::Str(s)) => Ok(Value::Bool(s.starts_with(str_arg(0)?))),
            ("endswith", Value::Str(s)) => Ok(Value::Bool(s.ends_with(str_arg(0)?))),
            ("abs", Value::Int(i)) => Ok(Value::Int(i.abs())),
            ("abs", Value::Float(f)) => Ok(Value::Float(f.abs())),
            ("round", Value::Int(i)) => Ok(Value::Int(*i)),
            ("round", Value::Float(f)) => {
                let digits = args.first().and_then(Value::as_i64).unwrap_or(0);
                let scale = 10f64.powi(digits as i32);
                Ok(Value::Float(round_half_even(f * scale) / scale))
            }
            (_, Value::Null) => Ok(Value::Null),
            _ => Err(EvalError::Unsupported(format!(
                "method {} on {}",
                name,
                receiver.type_name()
            ))),
        }
    }

    fn call_function(
        &self,
        func: &FuncRef,
        args: Vec<Value>,
        _kwargs: Vec<(String, Value)>,
    ) -> Result<Value, EvalError> {
        match func.downcast::<ScalarFunction>() {
            Some(scalar) => scalar.apply(&args),
            None => Err(EvalError::Unsupported(format!("function {}", func.name()))),
        }
    }

    fn dict(&self, entries: Vec<(Value, Value)>) -> Result<Value, EvalError> {
        entries
            .into_iter()
            .map(|(k, v)| match k {
                Value::Str(k) => Ok((k, v)),
                other => Ok((other.to_string(), v)),
            })
            .collect::<Result<_, EvalError>>()
            .map(Value::Map)
    }
}

/// Python-style rounding (ties to even).
pub fn round_half_even(x: f64) -> f64 {
    let r = x.round();
    if (x - x.trunc()).abs() == 0.5 && r % 2.0 != 0.0 {
        r - x.signum()
    } else {
        r
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::Node;
    use std::collections::BTreeMap;
    use std::sync::Arc;

    fn row(pairs: &[(&str, Value)]) -> Value {
        Value::Map(pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect::<BTreeMap<_, _>>())
    }

    #[test]
    fn test_substitution() {
        let node = Node::binary(BinaryOperator::Add, Node::column("a"), Node::column("b"));
        let input = row(&[("a", Value::Int(2)), ("b", Value::Int(3))]);
        assert_eq!(node.eval(&ValueEvaluator, &input), Ok(Value::Int(5)));
    }

    #[test]
    fn test_reflected_operands_swap() {
        // 10 - _
        let node = Node::binary_right(BinaryOperator::Sub, Node::MetaArg, Node::literal(10));
        assert_eq!(node.eval(&ValueEvaluator, &Value::Int(3)), Ok(Value::Int(7)));
    }

    #[test]
    fn test_floor_division_and_modulo() {
        let fd = |a: i64, b: i64| binary_value(BinaryOperator::FloorDiv, &a.into(), &b.into());
        let md = |a: i64, b: i64| binary_value(BinaryOperator::Mod, &a.into(), &b.into());
        assert_eq!(fd(7, 2), Ok(Value::Int(3)));
        assert_eq!(fd(-7, 2), Ok(Value::Int(-4)));
        assert_eq!(md(-7, 2), Ok(Value::Int(1)));
        assert_eq!(md(7, -2), Ok(Value::Int(-1)));
        assert!(fd(1, 0).is_err());
    }

    #[test]
    fn test_null_propagation() {
        assert_eq!(binary_value(BinaryOperator::Add, &Value::Null, &Value::Int(1)), Ok(Value::Null));
        assert_eq!(binary_value(BinaryOperator::Gt, &Value::Null, &Value::Int(1)), Ok(Value::Null));
        assert_eq!(binary_value(BinaryOperator::Eq, &Value::Null, &Value::Null), Ok(Value::Bool(true)));
    }

    #[test]
    fn test_methods_and_items() {
        let input = row(&[("s", Value::from(" Hi ")), ("l", Value::from(vec![1, 2, 3]))]);
        let upper = Node::method(Node::method(Node::column("s"), "strip", vec![]), "upper", vec![]);
        assert_eq!(upper.eval(&ValueEvaluator, &input), Ok(Value::from("HI")));

        let last = Node::item(Node::column("l"), Node::literal(-1));
        assert_eq!(last.eval(&ValueEvaluator, &input), Ok(Value::Int(3)));

        let tail = Node::item(
            Node::column("l"),
            Node::Slice {
                start: Some(Box::new(Node::literal(1))),
                stop: None,
                step: None,
            },
        );
        assert_eq!(tail.eval(&ValueEvaluator, &input), Ok(Value::from(vec![2, 3])));
    }

    #[test]
    fn test_scalar_function_call() {
        fn double(args: &[Value]) -> Result<Value, EvalError> {
            binary_value(BinaryOperator::Mul, &args[0], &Value::Int(2))
        }
        let func = FuncRef::new(Arc::new(ScalarFunction::new("double", double)));
        let node = Node::func_call(func, vec![Node::MetaArg], vec![]);
        assert_eq!(node.eval(&ValueEvaluator, &Value::Int(4)), Ok(Value::Int(8)));
        assert_eq!(node.to_string(), "double(_)");
    }

    #[test]
    fn test_missing_attribute() {
        let node = Node::column("zz");
        assert_eq!(
            node.eval(&ValueEvaluator, &row(&[])),
            Err(EvalError::Missing("zz".to_string()))
        );
    }

    #[test]
    fn test_round_half_even() {
        assert_eq!(round_half_even(2.5), 2.0);
        assert_eq!(round_half_even(3.5), 4.0);
        assert_eq!(round_half_even(-2.5), -2.0);
    }
}
