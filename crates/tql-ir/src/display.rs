//! Source-form printing and tree formatting for expression nodes

use crate::node::{BinaryOperator, Node};
use std::fmt;

/// Binding strength of an operator node. Unary operators sit between `**`
/// and the multiplicative operators.
fn strength(node: &Node) -> Option<u8> {
    match node {
        Node::Binary { op, .. } | Node::BinaryRight { op, .. } => Some(op.level() * 2),
        Node::Unary { .. } => Some(1),
        _ => None,
    }
}

fn binary_op(node: &Node) -> Option<BinaryOperator> {
    match node {
        Node::Binary { op, .. } | Node::BinaryRight { op, .. } => Some(*op),
        _ => None,
    }
}

fn is_operator(node: &Node) -> bool {
    strength(node).is_some()
}

fn operand(child: &Node, parent: BinaryOperator, right_side: bool) -> String {
    let text = child.to_string();
    let Some(level) = strength(child) else {
        return text;
    };
    let parent_level = parent.level() * 2;
    let pow_chain = parent == BinaryOperator::Pow && binary_op(child) == Some(BinaryOperator::Pow);

    // ** is right associative
    let wrap = if pow_chain {
        !right_side
    } else if right_side {
        level >= parent_level
    } else {
        level > parent_level
    };

    if wrap {
        format!("({})", text)
    } else {
        text
    }
}

fn receiver(obj: &Node) -> String {
    if is_operator(obj) {
        format!("({})", obj)
    } else {
        obj.to_string()
    }
}

fn opt(node: &Option<Box<Node>>) -> String {
    node.as_ref().map(|n| n.to_string()).unwrap_or_default()
}

fn slice_text(start: &Option<Box<Node>>, stop: &Option<Box<Node>>, step: &Option<Box<Node>>) -> String {
    match step {
        Some(step) => format!("{}:{}:{}", opt(start), opt(stop), step),
        None => format!("{}:{}", opt(start), opt(stop)),
    }
}

impl fmt::Display for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Node::MetaArg => write!(f, "_"),
            Node::Literal { value } => write!(f, "{}", value),
            Node::Attr { obj, name } => write!(f, "{}.{}", receiver(obj), name),
            Node::Item { obj, key } => match key.as_ref() {
                Node::Slice { start, stop, step } => {
                    write!(f, "{}[{}]", receiver(obj), slice_text(start, stop, step))
                }
                key => write!(f, "{}[{}]", receiver(obj), key),
            },
            Node::Slice { start, stop, step } => write!(f, "{}", slice_text(start, stop, step)),
            Node::Binary { op, left, right } => write!(
                f,
                "{} {} {}",
                operand(left, *op, false),
                op.symbol(),
                operand(right, *op, true)
            ),
            Node::BinaryRight { op, receiver, other } => write!(
                f,
                "{} {} {}",
                operand(other, *op, false),
                op.symbol(),
                operand(receiver, *op, true)
            ),
            Node::Unary { op, operand } => {
                if binary_op(operand).is_some() {
                    write!(f, "{}({})", op.symbol(), operand)
                } else {
                    write!(f, "{}{}", op.symbol(), operand)
                }
            }
            Node::Call { func, args, kwargs } => {
                let callee = match func.as_ref() {
                    Node::FuncArg { func } => func.name().to_string(),
                    other => receiver(other),
                };
                let mut parts: Vec<String> = args.iter().map(|a| a.to_string()).collect();
                parts.extend(kwargs.iter().map(|(k, v)| format!("{}={}", k, v)));
                write!(f, "{}({})", callee, parts.join(", "))
            }
            Node::FuncArg { func } => write!(f, "{}", func.name()),
            Node::Lazy { node } => write!(f, "{}", node),
            Node::DictCall { entries } => {
                let parts: Vec<String> = entries.iter().map(|(k, v)| format!("{}: {}", k, v)).collect();
                write!(f, "{{{}}}", parts.join(", "))
            }
        }
    }
}

/// Renders a node as a box-drawing tree.
///
/// ```text
/// █─+
/// ├─█─.
/// │ ├─_
/// │ └─'a'
/// └─1
/// ```
#[derive(Debug, Default, Clone, Copy)]
pub struct Formatter;

impl Formatter {
    pub fn new() -> Self {
        Self
    }

    pub fn format(&self, node: &Node) -> String {
        self.lines(node).join("\n")
    }

    fn label(node: &Node) -> String {
        match node {
            Node::Binary { op, .. } => op.symbol().to_string(),
            Node::BinaryRight { op, .. } => format!("{} (reflected)", op.symbol()),
            Node::Unary { op, .. } => op.symbol().to_string(),
            Node::Attr { .. } => ".".to_string(),
            Node::Item { .. } => "[".to_string(),
            Node::Slice { .. } => ":".to_string(),
            Node::Call { .. } => "'__call__'".to_string(),
            Node::Lazy { .. } => "<lazy>".to_string(),
            Node::DictCall { .. } => "{".to_string(),
            leaf => Self::leaf(leaf),
        }
    }

    fn leaf(node: &Node) -> String {
        match node {
            Node::FuncArg { func } => format!("<function {}>", func.name()),
            other => other.to_string(),
        }
    }

    fn lines(&self, node: &Node) -> Vec<String> {
        // (keyword, subtree lines)
        let children: Vec<(Option<String>, Vec<String>)> = match node {
            Node::MetaArg | Node::Literal { .. } | Node::FuncArg { .. } => {
                return vec![Self::leaf(node)];
            }
            Node::Attr { obj, name } => vec![(None, self.lines(obj)), (None, vec![format!("'{}'", name)])],
            Node::Call { func, args, kwargs } => {
                let mut out = vec![(None, self.lines(func))];
                out.extend(args.iter().map(|a| (None, self.lines(a))));
                out.extend(kwargs.iter().map(|(k, v)| (Some(k.clone()), self.lines(v))));
                out
            }
            other => other.children().into_iter().map(|c| (None, self.lines(c))).collect(),
        };

        let mut out = vec![format!("█─{}", Self::label(node))];
        let count = children.len();
        for (i, (keyword, sub)) in children.into_iter().enumerate() {
            let last = i + 1 == count;
            let (head, tail) = if last { ("└─", "  ") } else { ("├─", "│ ") };
            let kw = keyword.map(|k| format!("{} = ", k)).unwrap_or_default();
            let pad = " ".repeat(kw.chars().count());
            for (j, line) in sub.into_iter().enumerate() {
                if j == 0 {
                    out.push(format!("{}{}{}", head, kw, line));
                } else {
                    out.push(format!("{}{}{}", tail, pad, line));
                }
            }
        }
        out
    }
}
