//! Expression tree nodes
//!
//! A `Node` records an operation performed on the placeholder `_` without
//! executing it. Trees are immutable: every rewrite builds a new node of the
//! same variant.

use crate::Value;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::any::Any;
use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

/// An opaque callable that can be embedded in a tree through `Node::FuncArg`.
///
/// Backends downcast through `as_any` to their own implementation types.
pub trait Function: Send + Sync + fmt::Debug {
    fn name(&self) -> &str;

    /// Generic functions are dispatchers that still need resolving against a
    /// backend before they can run.
    fn is_generic(&self) -> bool {
        false
    }

    fn as_any(&self) -> &dyn Any;
}

/// Shared handle to a `Function`. Serializes by name only.
#[derive(Clone)]
pub struct FuncRef {
    name: String,
    func: Option<Arc<dyn Function>>,
}

impl FuncRef {
    pub fn new(func: Arc<dyn Function>) -> Self {
        Self {
            name: func.name().to_string(),
            func: Some(func),
        }
    }

    /// A function known only by name (e.g. after deserialization).
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            func: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn function(&self) -> Option<&Arc<dyn Function>> {
        self.func.as_ref()
    }

    pub fn is_generic(&self) -> bool {
        self.func.as_ref().map_or(true, |f| f.is_generic())
    }

    pub fn downcast<T: 'static>(&self) -> Option<&T> {
        self.func.as_ref().and_then(|f| f.as_any().downcast_ref::<T>())
    }
}

impl fmt::Debug for FuncRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_generic() {
            write!(f, "FuncRef(<generic {}>)", self.name)
        } else {
            write!(f, "FuncRef(<{}>)", self.name)
        }
    }
}

impl PartialEq for FuncRef {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name && self.is_generic() == other.is_generic()
    }
}

impl Serialize for FuncRef {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.name)
    }
}

impl<'de> Deserialize<'de> for FuncRef {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let name = String::deserialize(deserializer)?;
        Ok(FuncRef::named(name))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BinaryOperator {
    Add,
    Sub,
    Mul,
    MatMul,
    TrueDiv,
    FloorDiv,
    Mod,
    Pow,
    LShift,
    RShift,
    And,
    Xor,
    Or,
    Gt,
    Lt,
    Eq,
    Ne,
    Ge,
    Le,
}

impl BinaryOperator {
    pub const ALL: [BinaryOperator; 19] = [
        BinaryOperator::Add,
        BinaryOperator::Sub,
        BinaryOperator::Mul,
        BinaryOperator::MatMul,
        BinaryOperator::TrueDiv,
        BinaryOperator::FloorDiv,
        BinaryOperator::Mod,
        BinaryOperator::Pow,
        BinaryOperator::LShift,
        BinaryOperator::RShift,
        BinaryOperator::And,
        BinaryOperator::Xor,
        BinaryOperator::Or,
        BinaryOperator::Gt,
        BinaryOperator::Lt,
        BinaryOperator::Eq,
        BinaryOperator::Ne,
        BinaryOperator::Ge,
        BinaryOperator::Le,
    ];

    pub fn symbol(self) -> &'static str {
        match self {
            BinaryOperator::Add => "+",
            BinaryOperator::Sub => "-",
            BinaryOperator::Mul => "*",
            BinaryOperator::MatMul => "@",
            BinaryOperator::TrueDiv => "/",
            BinaryOperator::FloorDiv => "//",
            BinaryOperator::Mod => "%",
            BinaryOperator::Pow => "**",
            BinaryOperator::LShift => "<<",
            BinaryOperator::RShift => ">>",
            BinaryOperator::And => "&",
            BinaryOperator::Xor => "^",
            BinaryOperator::Or => "|",
            BinaryOperator::Gt => ">",
            BinaryOperator::Lt => "<",
            BinaryOperator::Eq => "==",
            BinaryOperator::Ne => "!=",
            BinaryOperator::Ge => ">=",
            BinaryOperator::Le => "<=",
        }
    }

    /// Method name used for table lookups, e.g. `__add__`.
    pub fn method_name(self) -> &'static str {
        match self {
            BinaryOperator::Add => "__add__",
            BinaryOperator::Sub => "__sub__",
            BinaryOperator::Mul => "__mul__",
            BinaryOperator::MatMul => "__matmul__",
            BinaryOperator::TrueDiv => "__truediv__",
            BinaryOperator::FloorDiv => "__floordiv__",
            BinaryOperator::Mod => "__mod__",
            BinaryOperator::Pow => "__pow__",
            BinaryOperator::LShift => "__lshift__",
            BinaryOperator::RShift => "__rshift__",
            BinaryOperator::And => "__and__",
            BinaryOperator::Xor => "__xor__",
            BinaryOperator::Or => "__or__",
            BinaryOperator::Gt => "__gt__",
            BinaryOperator::Lt => "__lt__",
            BinaryOperator::Eq => "__eq__",
            BinaryOperator::Ne => "__ne__",
            BinaryOperator::Ge => "__ge__",
            BinaryOperator::Le => "__le__",
        }
    }

    /// Reflected method name, e.g. `__radd__`.
    pub fn reflected_name(self) -> String {
        self.method_name().replacen("__", "__r", 1)
    }

    /// Precedence level; lower binds tighter.
    pub fn level(self) -> u8 {
        match self {
            BinaryOperator::Pow => 0,
            BinaryOperator::Mul
            | BinaryOperator::MatMul
            | BinaryOperator::TrueDiv
            | BinaryOperator::FloorDiv
            | BinaryOperator::Mod => 1,
            BinaryOperator::Add | BinaryOperator::Sub => 2,
            BinaryOperator::LShift | BinaryOperator::RShift => 3,
            BinaryOperator::And | BinaryOperator::Xor | BinaryOperator::Or => 4,
            BinaryOperator::Gt
            | BinaryOperator::Lt
            | BinaryOperator::Eq
            | BinaryOperator::Ne
            | BinaryOperator::Ge
            | BinaryOperator::Le => 5,
        }
    }

    pub fn is_comparison(self) -> bool {
        self.level() == 5
    }

    pub fn from_symbol(symbol: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|op| op.symbol() == symbol)
    }

    pub fn from_method_name(name: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|op| op.method_name() == name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum UnaryOperator {
    Invert,
    Neg,
    Pos,
}

impl UnaryOperator {
    pub fn symbol(self) -> &'static str {
        match self {
            UnaryOperator::Invert => "~",
            UnaryOperator::Neg => "-",
            UnaryOperator::Pos => "+",
        }
    }

    pub fn method_name(self) -> &'static str {
        match self {
            UnaryOperator::Invert => "__invert__",
            UnaryOperator::Neg => "__neg__",
            UnaryOperator::Pos => "__pos__",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Node {
    MetaArg,
    Literal {
        value: Value,
    },
    Attr {
        obj: Box<Node>,
        name: String,
    },
    Item {
        obj: Box<Node>,
        key: Box<Node>,
    },
    Slice {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        start: Option<Box<Node>>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        stop: Option<Box<Node>>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        step: Option<Box<Node>>,
    },
    Binary {
        op: BinaryOperator,
        left: Box<Node>,
        right: Box<Node>,
    },
    /// `other op receiver`, captured with the placeholder side as receiver.
    BinaryRight {
        op: BinaryOperator,
        receiver: Box<Node>,
        other: Box<Node>,
    },
    Unary {
        op: UnaryOperator,
        operand: Box<Node>,
    },
    Call {
        func: Box<Node>,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        args: Vec<Node>,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        kwargs: Vec<(String, Node)>,
    },
    FuncArg {
        func: FuncRef,
    },
    Lazy {
        node: Box<Node>,
    },
    DictCall {
        entries: Vec<(Node, Node)>,
    },
}

impl Node {
    pub fn literal(value: impl Into<Value>) -> Self {
        Node::Literal { value: value.into() }
    }

    pub fn attr(obj: Node, name: impl Into<String>) -> Self {
        Node::Attr {
            obj: Box::new(obj),
            name: name.into(),
        }
    }

    pub fn item(obj: Node, key: Node) -> Self {
        Node::Item {
            obj: Box::new(obj),
            key: Box::new(key),
        }
    }

    pub fn binary(op: BinaryOperator, left: Node, right: Node) -> Self {
        Node::Binary {
            op,
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    pub fn binary_right(op: BinaryOperator, receiver: Node, other: Node) -> Self {
        Node::BinaryRight {
            op,
            receiver: Box::new(receiver),
            other: Box::new(other),
        }
    }

    pub fn unary(op: UnaryOperator, operand: Node) -> Self {
        Node::Unary {
            op,
            operand: Box::new(operand),
        }
    }

    pub fn call(func: Node, args: Vec<Node>, kwargs: Vec<(String, Node)>) -> Self {
        Node::Call {
            func: Box::new(func),
            args,
            kwargs,
        }
    }

    /// `obj.name(args...)`
    pub fn method(obj: Node, name: impl Into<String>, args: Vec<Node>) -> Self {
        Node::call(Node::attr(obj, name), args, Vec::new())
    }

    pub fn func_arg(func: FuncRef) -> Self {
        Node::FuncArg { func }
    }

    /// `func(args...)` for an embedded function.
    pub fn func_call(func: FuncRef, args: Vec<Node>, kwargs: Vec<(String, Node)>) -> Self {
        Node::call(Node::FuncArg { func }, args, kwargs)
    }

    /// `_.name`
    pub fn column(name: impl Into<String>) -> Self {
        Node::attr(Node::MetaArg, name)
    }

    /// Operation name used by visitors and local-table lookups.
    pub fn func_name(&self) -> String {
        match self {
            Node::MetaArg => "_".to_string(),
            Node::Literal { .. } => "__literal__".to_string(),
            Node::Attr { .. } => "__getattr__".to_string(),
            Node::Item { .. } => "__getitem__".to_string(),
            Node::Slice { .. } => "__siu_slice__".to_string(),
            Node::Binary { op, .. } => op.method_name().to_string(),
            Node::BinaryRight { op, .. } => op.reflected_name(),
            Node::Unary { op, .. } => op.method_name().to_string(),
            Node::Call { .. } => "__call__".to_string(),
            Node::FuncArg { .. } => "__custom_func__".to_string(),
            Node::Lazy { .. } => "<lazy>".to_string(),
            Node::DictCall { .. } => "__dict__".to_string(),
        }
    }

    /// Operator method name for operator nodes (`__add__`, `__radd__`, `__invert__`).
    pub fn operator_name(&self) -> Option<String> {
        match self {
            Node::Binary { op, .. } => Some(op.method_name().to_string()),
            Node::BinaryRight { op, .. } => Some(op.reflected_name()),
            Node::Unary { op, .. } => Some(op.method_name().to_string()),
            _ => None,
        }
    }

    /// Operands of an operator node in receiver-first order.
    pub fn operator_operands(&self) -> Option<Vec<&Node>> {
        match self {
            Node::Binary { left, right, .. } => Some(vec![left.as_ref(), right.as_ref()]),
            Node::BinaryRight { receiver, other, .. } => Some(vec![receiver.as_ref(), other.as_ref()]),
            Node::Unary { operand, .. } => Some(vec![operand.as_ref()]),
            _ => None,
        }
    }

    pub fn children(&self) -> Vec<&Node> {
        match self {
            Node::MetaArg | Node::Literal { .. } | Node::FuncArg { .. } => Vec::new(),
            Node::Attr { obj, .. } => vec![obj.as_ref()],
            Node::Item { obj, key } => vec![obj.as_ref(), key.as_ref()],
            Node::Slice { start, stop, step } => [start, stop, step]
                .into_iter()
                .filter_map(|n| n.as_deref())
                .collect(),
            Node::Binary { left, right, .. } => vec![left.as_ref(), right.as_ref()],
            Node::BinaryRight { receiver, other, .. } => vec![receiver.as_ref(), other.as_ref()],
            Node::Unary { operand, .. } => vec![operand.as_ref()],
            Node::Call { func, args, kwargs } => {
                let mut out = vec![func.as_ref()];
                out.extend(args.iter());
                out.extend(kwargs.iter().map(|(_, v)| v));
                out
            }
            Node::Lazy { node } => vec![node.as_ref()],
            Node::DictCall { entries } => entries.iter().flat_map(|(k, v)| [k, v]).collect(),
        }
    }

    /// Rebuild this node with every child replaced by `f(child)`.
    pub fn try_map_children<E, F>(&self, mut f: F) -> Result<Node, E>
    where
        F: FnMut(&Node) -> Result<Node, E>,
    {
        let mut boxed = |n: &Node| -> Result<Box<Node>, E> { Ok(Box::new(f(n)?)) };
        Ok(match self {
            Node::MetaArg | Node::Literal { .. } | Node::FuncArg { .. } => self.clone(),
            Node::Attr { obj, name } => Node::Attr {
                obj: boxed(obj)?,
                name: name.clone(),
            },
            Node::Item { obj, key } => Node::Item {
                obj: boxed(obj)?,
                key: boxed(key)?,
            },
            Node::Slice { start, stop, step } => Node::Slice {
                start: start.as_deref().map(&mut boxed).transpose()?,
                stop: stop.as_deref().map(&mut boxed).transpose()?,
                step: step.as_deref().map(&mut boxed).transpose()?,
            },
            Node::Binary { op, left, right } => Node::Binary {
                op: *op,
                left: boxed(left)?,
                right: boxed(right)?,
            },
            Node::BinaryRight { op, receiver, other } => Node::BinaryRight {
                op: *op,
                receiver: boxed(receiver)?,
                other: boxed(other)?,
            },
            Node::Unary { op, operand } => Node::Unary {
                op: *op,
                operand: boxed(operand)?,
            },
            Node::Call { func, args, kwargs } => Node::Call {
                func: boxed(func)?,
                args: args.iter().map(|a| boxed(a).map(|b| *b)).collect::<Result<_, E>>()?,
                kwargs: kwargs
                    .iter()
                    .map(|(k, v)| boxed(v).map(|b| (k.clone(), *b)))
                    .collect::<Result<_, E>>()?,
            },
            Node::Lazy { node } => Node::Lazy { node: boxed(node)? },
            Node::DictCall { entries } => Node::DictCall {
                entries: entries
                    .iter()
                    .map(|(k, v)| Ok((*boxed(k)?, *boxed(v)?)))
                    .collect::<Result<_, E>>()?,
            },
        })
    }

    pub fn map_children<F>(&self, mut f: F) -> Node
    where
        F: FnMut(&Node) -> Node,
    {
        match self.try_map_children::<std::convert::Infallible, _>(|n| Ok(f(n))) {
            Ok(node) => node,
            Err(never) => match never {},
        }
    }

    /// Column name for `_.x` or `_['x']`.
    pub fn simple_name(&self) -> Option<&str> {
        match self {
            Node::Attr { obj, name } if matches!(obj.as_ref(), Node::MetaArg) => Some(name),
            Node::Item { obj, key } if matches!(obj.as_ref(), Node::MetaArg) => match key.as_ref() {
                Node::Literal { value: Value::Str(s) } => Some(s),
                _ => None,
            },
            _ => None,
        }
    }

    /// Names accessed directly on the placeholder (`_.x`, `_['x']`).
    ///
    /// With `attr_calls = false`, names that are immediately called
    /// (`_.n()`) are left out.
    pub fn op_vars(&self, attr_calls: bool) -> BTreeSet<String> {
        let mut visitor = crate::visitor::OpVars::new(attr_calls);
        crate::visitor::CallVisitor::visit(&mut visitor, self);
        visitor.into_vars()
    }

    /// Name of the function being called, for `f(...)` or `obj.f(...)`.
    pub fn obj_name(&self) -> Option<&str> {
        match self {
            Node::Call { func, .. } => match func.as_ref() {
                Node::FuncArg { func } => Some(func.name()),
                Node::Attr { name, .. } => Some(name),
                _ => None,
            },
            _ => None,
        }
    }

    pub fn is_meta_arg(&self) -> bool {
        matches!(self, Node::MetaArg)
    }

    pub fn contains_meta_arg(&self) -> bool {
        self.is_meta_arg() || self.children().into_iter().any(Node::contains_meta_arg)
    }
}

impl From<Value> for Node {
    fn from(value: Value) -> Self {
        Node::Literal { value }
    }
}

macro_rules! literal_into_node {
    ($($t:ty),*) => {
        $(
            impl From<$t> for Node {
                fn from(v: $t) -> Self {
                    Node::Literal { value: Value::from(v) }
                }
            }
        )*
    };
}

literal_into_node!(i64, i32, f64, bool, &str, String, chrono::NaiveDate, chrono::NaiveDateTime);

impl<T: Into<Value>> From<Vec<T>> for Node {
    fn from(v: Vec<T>) -> Self {
        Node::Literal { value: Value::from(v) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_func_names() {
        let add = Node::binary(BinaryOperator::Add, Node::MetaArg, Node::literal(1));
        assert_eq!(add.func_name(), "__add__");

        let radd = Node::binary_right(BinaryOperator::Add, Node::MetaArg, Node::literal(1));
        assert_eq!(radd.func_name(), "__radd__");

        assert_eq!(Node::column("x").func_name(), "__getattr__");
        assert_eq!(Node::method(Node::column("x"), "mean", vec![]).func_name(), "__call__");
    }

    #[test]
    fn test_map_children_rebuilds_same_variant() {
        let node = Node::binary(BinaryOperator::Mul, Node::column("a"), Node::literal(2));
        let swapped = node.map_children(|child| match child {
            Node::Literal { .. } => Node::literal(3),
            other => other.clone(),
        });
        assert_eq!(
            swapped,
            Node::binary(BinaryOperator::Mul, Node::column("a"), Node::literal(3))
        );
        // original untouched
        assert_eq!(node.children()[1], &Node::literal(2));
    }

    #[test]
    fn test_simple_name() {
        assert_eq!(Node::column("x").simple_name(), Some("x"));
        assert_eq!(Node::item(Node::MetaArg, Node::literal("y")).simple_name(), Some("y"));
        assert_eq!(Node::attr(Node::column("x"), "y").simple_name(), None);
    }

    #[test]
    fn test_op_vars() {
        // _.a + _.b.mean()
        let node = Node::binary(
            BinaryOperator::Add,
            Node::column("a"),
            Node::method(Node::column("b"), "mean", vec![]),
        );
        let vars: Vec<_> = node.op_vars(true).into_iter().collect();
        assert_eq!(vars, vec!["a".to_string(), "b".to_string()]);

        // _.n() is a call, not a column
        let called = Node::method(Node::MetaArg, "n", vec![]);
        assert!(called.op_vars(false).is_empty());
        assert_eq!(called.op_vars(true).len(), 1);
    }

    #[test]
    fn test_serde_round_trip() {
        let node = Node::method(
            Node::attr(Node::column("s"), "str"),
            "upper",
            vec![Node::literal(1)],
        );
        let json = serde_json::to_string(&node).unwrap();
        let parsed: Node = serde_json::from_str(&json).unwrap();
        assert_eq!(node, parsed);
    }
}
