//! Placeholder capture
//!
//! A [`Symbolic`] wraps a [`Node`] and records every operation performed on it
//! as a new, larger tree. Nothing is executed.
//!
//! ```
//! use tql_ir::{sym, Symbolic};
//!
//! let x = sym();
//! let expr: Symbolic = x.attr("a") + 1;
//! assert_eq!(expr.to_string(), "_.a + 1");
//! ```

use crate::node::{BinaryOperator, Node, UnaryOperator};
use crate::Value;
use std::fmt;
use std::ops;

#[derive(Debug, Clone)]
pub struct Symbolic {
    source: Node,
    ready_to_call: bool,
}

/// The placeholder `_`.
pub fn sym() -> Symbolic {
    Symbolic::placeholder()
}

/// `_.name`
pub fn col(name: impl Into<String>) -> Symbolic {
    sym().attr(name)
}

/// Unwrap a capture (or anything node-like) into its tree.
pub fn strip_symbolic(x: impl Into<Node>) -> Node {
    x.into()
}

impl Symbolic {
    pub fn placeholder() -> Self {
        Self::new(Node::MetaArg)
    }

    pub fn new(source: Node) -> Self {
        Self {
            source,
            ready_to_call: false,
        }
    }

    pub fn node(&self) -> &Node {
        &self.source
    }

    pub fn into_node(self) -> Node {
        self.source
    }

    /// True right after attribute access, i.e. when the tree ends in
    /// something that can be called as a method.
    pub fn ready_to_call(&self) -> bool {
        self.ready_to_call
    }

    pub fn attr(&self, name: impl Into<String>) -> Symbolic {
        Symbolic {
            source: Node::attr(self.source.clone(), name),
            ready_to_call: true,
        }
    }

    pub fn item(&self, key: impl Into<Node>) -> Symbolic {
        Symbolic::new(Node::item(self.source.clone(), key.into()))
    }

    /// `obj[start:stop:step]`
    pub fn slice(&self, start: Option<Node>, stop: Option<Node>, step: Option<Node>) -> Symbolic {
        let key = Node::Slice {
            start: start.map(Box::new),
            stop: stop.map(Box::new),
            step: step.map(Box::new),
        };
        Symbolic::new(Node::item(self.source.clone(), key))
    }

    pub fn call(&self, args: Vec<Node>, kwargs: Vec<(String, Node)>) -> Symbolic {
        Symbolic::new(Node::call(self.source.clone(), args, kwargs))
    }

    /// `obj.name(args...)`
    pub fn method(&self, name: impl Into<String>, args: Vec<Node>) -> Symbolic {
        self.attr(name).call(args, Vec::new())
    }

    pub fn method_kw(&self, name: impl Into<String>, args: Vec<Node>, kwargs: Vec<(String, Node)>) -> Symbolic {
        self.attr(name).call(args, kwargs)
    }

    fn binary(&self, op: BinaryOperator, other: impl Into<Node>) -> Symbolic {
        Symbolic::new(Node::binary(op, self.source.clone(), other.into()))
    }

    fn reflected(&self, op: BinaryOperator, other: impl Into<Node>) -> Symbolic {
        Symbolic::new(Node::binary_right(op, self.source.clone(), other.into()))
    }

    #[allow(clippy::should_implement_trait)]
    pub fn eq(&self, other: impl Into<Node>) -> Symbolic {
        self.binary(BinaryOperator::Eq, other)
    }

    #[allow(clippy::should_implement_trait)]
    pub fn ne(&self, other: impl Into<Node>) -> Symbolic {
        self.binary(BinaryOperator::Ne, other)
    }

    #[allow(clippy::should_implement_trait)]
    pub fn lt(&self, other: impl Into<Node>) -> Symbolic {
        self.binary(BinaryOperator::Lt, other)
    }

    #[allow(clippy::should_implement_trait)]
    pub fn le(&self, other: impl Into<Node>) -> Symbolic {
        self.binary(BinaryOperator::Le, other)
    }

    #[allow(clippy::should_implement_trait)]
    pub fn gt(&self, other: impl Into<Node>) -> Symbolic {
        self.binary(BinaryOperator::Gt, other)
    }

    #[allow(clippy::should_implement_trait)]
    pub fn ge(&self, other: impl Into<Node>) -> Symbolic {
        self.binary(BinaryOperator::Ge, other)
    }

    pub fn floordiv(&self, other: impl Into<Node>) -> Symbolic {
        self.binary(BinaryOperator::FloorDiv, other)
    }

    pub fn pow(&self, other: impl Into<Node>) -> Symbolic {
        self.binary(BinaryOperator::Pow, other)
    }

    pub fn matmul(&self, other: impl Into<Node>) -> Symbolic {
        self.binary(BinaryOperator::MatMul, other)
    }

    pub fn lshift(&self, other: impl Into<Node>) -> Symbolic {
        self.binary(BinaryOperator::LShift, other)
    }

    pub fn rshift(&self, other: impl Into<Node>) -> Symbolic {
        self.binary(BinaryOperator::RShift, other)
    }

    /// `other op self`, e.g. `rsub(1)` is `1 - _`.
    pub fn rop(&self, op: BinaryOperator, other: impl Into<Node>) -> Symbolic {
        self.reflected(op, other)
    }

    /// `~self`; inverting an inversion unwraps it.
    pub fn invert(&self) -> Symbolic {
        match &self.source {
            Node::Unary {
                op: UnaryOperator::Invert,
                operand,
            } => Symbolic::new(operand.as_ref().clone()),
            source => Symbolic::new(Node::unary(UnaryOperator::Invert, source.clone())),
        }
    }

    pub fn fingerprint(&self) -> String {
        self.source.fingerprint()
    }
}

impl fmt::Display for Symbolic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.source)
    }
}

impl From<Symbolic> for Node {
    fn from(s: Symbolic) -> Self {
        s.source
    }
}

impl From<&Symbolic> for Node {
    fn from(s: &Symbolic) -> Self {
        s.source.clone()
    }
}

macro_rules! symbolic_binop {
    ($trait:ident, $method:ident, $op:expr) => {
        impl<T: Into<Node>> ops::$trait<T> for Symbolic {
            type Output = Symbolic;

            fn $method(self, rhs: T) -> Symbolic {
                self.binary($op, rhs)
            }
        }

        impl<T: Into<Node>> ops::$trait<T> for &Symbolic {
            type Output = Symbolic;

            fn $method(self, rhs: T) -> Symbolic {
                self.binary($op, rhs)
            }
        }
    };
}

symbolic_binop!(Add, add, BinaryOperator::Add);
symbolic_binop!(Sub, sub, BinaryOperator::Sub);
symbolic_binop!(Mul, mul, BinaryOperator::Mul);
symbolic_binop!(Div, div, BinaryOperator::TrueDiv);
symbolic_binop!(Rem, rem, BinaryOperator::Mod);
symbolic_binop!(BitAnd, bitand, BinaryOperator::And);
symbolic_binop!(BitOr, bitor, BinaryOperator::Or);
symbolic_binop!(BitXor, bitxor, BinaryOperator::Xor);

// literal on the left: `1 + _`
macro_rules! reflected_binop {
    ($lit:ty => $(($trait:ident, $method:ident, $op:expr)),*) => {
        $(
            impl ops::$trait<Symbolic> for $lit {
                type Output = Symbolic;

                fn $method(self, rhs: Symbolic) -> Symbolic {
                    rhs.reflected($op, Node::Literal { value: Value::from(self) })
                }
            }

            impl ops::$trait<&Symbolic> for $lit {
                type Output = Symbolic;

                fn $method(self, rhs: &Symbolic) -> Symbolic {
                    rhs.reflected($op, Node::Literal { value: Value::from(self) })
                }
            }
        )*
    };
}

macro_rules! reflected_literal {
    ($($lit:ty),*) => {
        $(
            reflected_binop!($lit =>
                (Add, add, BinaryOperator::Add),
                (Sub, sub, BinaryOperator::Sub),
                (Mul, mul, BinaryOperator::Mul),
                (Div, div, BinaryOperator::TrueDiv),
                (Rem, rem, BinaryOperator::Mod),
                (BitAnd, bitand, BinaryOperator::And),
                (BitOr, bitor, BinaryOperator::Or),
                (BitXor, bitxor, BinaryOperator::Xor)
            );
        )*
    };
}

reflected_literal!(i64, i32, f64, bool);
reflected_binop!(&str => (Add, add, BinaryOperator::Add));

impl ops::Neg for Symbolic {
    type Output = Symbolic;

    fn neg(self) -> Symbolic {
        Symbolic::new(Node::unary(UnaryOperator::Neg, self.source))
    }
}

impl ops::Neg for &Symbolic {
    type Output = Symbolic;

    fn neg(self) -> Symbolic {
        Symbolic::new(Node::unary(UnaryOperator::Neg, self.source.clone()))
    }
}

/// `!x` is captured as `~x`.
impl ops::Not for Symbolic {
    type Output = Symbolic;

    fn not(self) -> Symbolic {
        self.invert()
    }
}

impl ops::Not for &Symbolic {
    type Output = Symbolic;

    fn not(self) -> Symbolic {
        self.invert()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capture_prints_source() {
        assert_eq!((sym() + 1).to_string(), "_ + 1");
        assert_eq!((1i32 + sym()).to_string(), "1 + _");
        assert_eq!(col("x").method("mean", vec![]).to_string(), "_.x.mean()");
        assert_eq!((-col("x")).to_string(), "-_.x");
        assert_eq!(("a" + col("s")).to_string(), "'a' + _.s");
    }

    #[test]
    fn test_same_expression_same_tree() {
        let a = (col("a") + col("b")).gt(1);
        let b = (col("a") + col("b")).gt(1);
        assert_eq!(a.node(), b.node());
        assert_eq!(a.fingerprint(), b.fingerprint());
    }

    #[test]
    fn test_operations_do_not_mutate() {
        let x = col("x");
        let _ = &x + 1;
        assert_eq!(x.node(), &Node::column("x"));
    }

    #[test]
    fn test_ready_to_call() {
        let x = sym().attr("x");
        assert!(x.ready_to_call());
        assert!(!x.method("mean", vec![]).ready_to_call());
        assert!(!(x + 1).ready_to_call());
    }

    #[test]
    fn test_double_invert_unwraps() {
        let cond = col("a").gt(1);
        assert_eq!(cond.invert().to_string(), "~(_.a > 1)");
        assert_eq!(cond.invert().invert().node(), cond.node());
        assert_eq!((!cond.clone()).node(), cond.invert().node());
    }

    #[test]
    fn test_reflected_is_binary_right() {
        let node: Node = (2.0 * col("x")).into();
        assert_eq!(node.func_name(), "__rmul__");
    }

    #[test]
    fn test_slice_capture() {
        let s = sym().slice(Some(Node::literal("a")), Some(Node::literal("c")), None);
        assert_eq!(s.to_string(), "_['a':'c']");
    }
}
