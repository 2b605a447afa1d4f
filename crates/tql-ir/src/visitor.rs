//! Tree visitors and listeners
//!
//! Both traits dispatch on [`Node::func_name`]: implementors handle the
//! operations they care about and fall back to generic recursion.

use crate::node::Node;
use std::collections::BTreeSet;

/// Read-only traversal.
pub trait CallVisitor {
    fn visit(&mut self, node: &Node) {
        let name = node.func_name();
        if !self.visit_func(&name, node) {
            self.generic_visit(node);
        }
    }

    /// Return `true` when the node was handled (children are not visited).
    fn visit_func(&mut self, _name: &str, _node: &Node) -> bool {
        false
    }

    fn generic_visit(&mut self, node: &Node) {
        for child in node.children() {
            self.visit(child);
        }
    }
}

/// Reconstructing traversal. `enter` rebuilds the node bottom-up, calling
/// `exit` on each rebuilt node.
pub trait CallListener {
    type Error;

    fn enter(&mut self, node: &Node) -> Result<Node, Self::Error> {
        let name = node.func_name();
        match self.enter_func(&name, node)? {
            Some(replaced) => Ok(replaced),
            None => self.generic_enter(node),
        }
    }

    fn enter_func(&mut self, _name: &str, _node: &Node) -> Result<Option<Node>, Self::Error> {
        Ok(None)
    }

    fn generic_enter(&mut self, node: &Node) -> Result<Node, Self::Error> {
        let rebuilt = node.try_map_children(|child| self.enter(child))?;
        self.exit(&rebuilt)
    }

    fn exit(&mut self, node: &Node) -> Result<Node, Self::Error> {
        let name = node.func_name();
        match self.exit_func(&name, node)? {
            Some(replaced) => Ok(replaced),
            None => self.generic_exit(node),
        }
    }

    fn exit_func(&mut self, _name: &str, _node: &Node) -> Result<Option<Node>, Self::Error> {
        Ok(None)
    }

    fn generic_exit(&mut self, node: &Node) -> Result<Node, Self::Error> {
        Ok(node.clone())
    }
}

/// Collects the names accessed directly on the placeholder.
#[derive(Debug, Default)]
pub struct OpVars {
    attr_calls: bool,
    vars: BTreeSet<String>,
}

impl OpVars {
    pub fn new(attr_calls: bool) -> Self {
        Self {
            attr_calls,
            vars: BTreeSet::new(),
        }
    }

    pub fn into_vars(self) -> BTreeSet<String> {
        self.vars
    }
}

impl CallVisitor for OpVars {
    fn visit_func(&mut self, name: &str, node: &Node) -> bool {
        match (name, node) {
            ("__getattr__", Node::Attr { obj, name }) if obj.is_meta_arg() => {
                self.vars.insert(name.clone());
                true
            }
            ("__getitem__", Node::Item { obj, key }) if obj.is_meta_arg() => {
                if let Some(name) = node.simple_name() {
                    self.vars.insert(name.to_string());
                }
                self.visit(key);
                true
            }
            ("__call__", Node::Call { func, args, kwargs }) if !self.attr_calls => {
                match func.as_ref() {
                    Node::Attr { obj, .. } if obj.is_meta_arg() => {}
                    other => self.visit(other),
                }
                args.iter().for_each(|a| self.visit(a));
                kwargs.iter().for_each(|(_, v)| self.visit(v));
                true
            }
            _ => false,
        }
    }
}
