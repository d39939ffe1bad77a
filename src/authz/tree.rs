//! Arena backed authorization tree.
//!
//! Nodes live in a flat `Vec` and refer to each other by index. Every node
//! records its ancestor chain (parent first, root last) at construction, so
//! rule inheritance is a walk over an owned slice rather than over parent
//! pointers. A built tree is never mutated; reconfiguration builds a new one.

use std::collections::HashMap;
use std::fmt;
use std::ptr;

use tracing::warn;

use super::{AccessMode, AccessRule, AuthorizedRoles, Principal};

type NodeId = usize;

const ROOT: NodeId = 0;

static EVERYBODY: AuthorizedRoles = AuthorizedRoles::Everybody;

#[derive(Debug, Clone, Default)]
struct NodeData {
    name: Option<String>,
    children: HashMap<String, NodeId>,
    rules: HashMap<AccessMode, AuthorizedRoles>,
    ancestors: Vec<NodeId>,
}

/// Immutable snapshot of the authorization hierarchy.
#[derive(Debug, Clone)]
pub struct SecureTree {
    nodes: Vec<NodeData>,
}

impl SecureTree {
    /// A tree holding only an unconfigured root. It permits everything.
    pub fn new() -> Self {
        SecureTreeBuilder::new().build()
    }

    pub fn builder() -> SecureTreeBuilder {
        SecureTreeBuilder::new()
    }

    /// Build a tree from a list of rules. Later rules for the same path and
    /// mode replace earlier ones.
    pub fn from_rules(rules: &[AccessRule]) -> Self {
        let mut builder = SecureTreeBuilder::new();
        for rule in rules {
            if builder
                .set_rule(&rule.path, rule.mode, rule.roles.clone())
                .is_some()
            {
                warn!(
                    path = %rule.path.join("."),
                    mode = %rule.mode,
                    "duplicate access rule, keeping the last one"
                );
            }
        }
        builder.build()
    }

    pub fn root(&self) -> NodeRef<'_> {
        NodeRef { tree: self, id: ROOT }
    }

    /// Number of nodes, root included.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.len() == 1 && self.nodes[ROOT].rules.is_empty()
    }

    fn node(&self, id: NodeId) -> &NodeData {
        &self.nodes[id]
    }
}

impl Default for SecureTree {
    fn default() -> Self {
        Self::new()
    }
}

/// Borrowed handle to one node of a [`SecureTree`].
#[derive(Clone, Copy)]
pub struct NodeRef<'a> {
    tree: &'a SecureTree,
    id: NodeId,
}

impl<'a> NodeRef<'a> {
    /// Segment name; `None` for the root.
    pub fn name(&self) -> Option<&'a str> {
        self.tree.node(self.id).name.as_deref()
    }

    pub fn is_root(&self) -> bool {
        self.id == ROOT
    }

    /// Number of segments between this node and the root.
    pub fn depth(&self) -> usize {
        self.tree.node(self.id).ancestors.len()
    }

    /// Segment names from the root down to this node.
    pub fn path(&self) -> Vec<&'a str> {
        let data = self.tree.node(self.id);
        data.ancestors
            .iter()
            .rev()
            .chain(std::iter::once(&self.id))
            .filter_map(|&id| self.tree.node(id).name.as_deref())
            .collect()
    }

    /// Direct child called `name`, if there is one.
    pub fn get_child(&self, name: &str) -> Option<NodeRef<'a>> {
        self.tree
            .node(self.id)
            .children
            .get(name)
            .map(|&id| NodeRef {
                tree: self.tree,
                id,
            })
    }

    pub fn children(&self) -> impl Iterator<Item = NodeRef<'a>> + 'a {
        let tree = self.tree;
        tree.node(self.id)
            .children
            .values()
            .map(move |&id| NodeRef { tree, id })
    }

    /// Follow `path` downwards as far as it matches and return the last node
    /// reached. Unmatched or empty paths stay at `self`.
    pub fn get_deepest_node<I, S>(&self, path: I) -> NodeRef<'a>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut current = *self;
        for segment in path {
            match current.get_child(segment.as_ref()) {
                Some(child) => current = child,
                None => break,
            }
        }
        current
    }

    /// Rule set directly on this node for `mode`, without inheritance.
    pub fn explicit_roles(&self, mode: AccessMode) -> Option<&'a AuthorizedRoles> {
        self.tree.node(self.id).rules.get(&mode)
    }

    /// Effective rule for `mode`: this node's own, else the nearest
    /// ancestor's, else everybody.
    pub fn get_authorized_roles(&self, mode: AccessMode) -> &'a AuthorizedRoles {
        if let Some(roles) = self.explicit_roles(mode) {
            return roles;
        }
        self.tree
            .node(self.id)
            .ancestors
            .iter()
            .find_map(|&id| self.tree.node(id).rules.get(&mode))
            .unwrap_or(&EVERYBODY)
    }

    /// Whether `principal` (or an anonymous caller, when `None`) may act on
    /// this node in `mode`.
    pub fn can_access(&self, principal: Option<&Principal>, mode: AccessMode) -> bool {
        self.get_authorized_roles(mode).admits(principal)
    }
}

impl PartialEq for NodeRef<'_> {
    fn eq(&self, other: &Self) -> bool {
        ptr::eq(self.tree, other.tree) && self.id == other.id
    }
}

impl Eq for NodeRef<'_> {}

impl fmt::Debug for NodeRef<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let data = self.tree.node(self.id);
        f.debug_struct("NodeRef")
            .field("path", &self.path().join("."))
            .field("rules", &data.rules)
            .field("children", &data.children.len())
            .finish()
    }
}

/// Builds a [`SecureTree`] off to the side before it is published.
#[derive(Debug)]
pub struct SecureTreeBuilder {
    nodes: Vec<NodeData>,
}

impl SecureTreeBuilder {
    pub fn new() -> Self {
        Self {
            nodes: vec![NodeData::default()],
        }
    }

    /// Attach `roles` to the node at `path` for `mode`, creating intermediate
    /// nodes. Returns the rule it replaced, if any.
    pub fn set_rule<S: AsRef<str>>(
        &mut self,
        path: &[S],
        mode: AccessMode,
        roles: AuthorizedRoles,
    ) -> Option<AuthorizedRoles> {
        let id = self.node_for_path(path);
        self.nodes[id].rules.insert(mode, roles)
    }

    pub fn rule<S: AsRef<str>>(
        mut self,
        path: &[S],
        mode: AccessMode,
        roles: AuthorizedRoles,
    ) -> Self {
        self.set_rule(path, mode, roles);
        self
    }

    /// Make sure a node exists at `path` even without rules of its own.
    pub fn node<S: AsRef<str>>(mut self, path: &[S]) -> Self {
        self.node_for_path(path);
        self
    }

    pub fn build(self) -> SecureTree {
        SecureTree { nodes: self.nodes }
    }

    fn node_for_path<S: AsRef<str>>(&mut self, path: &[S]) -> NodeId {
        let mut current = ROOT;
        for segment in path {
            let segment = segment.as_ref();
            current = match self.nodes[current].children.get(segment) {
                Some(&child) => child,
                None => {
                    let mut ancestors = Vec::with_capacity(self.nodes[current].ancestors.len() + 1);
                    ancestors.push(current);
                    ancestors.extend_from_slice(&self.nodes[current].ancestors);

                    let child = self.nodes.len();
                    self.nodes.push(NodeData {
                        name: Some(segment.to_string()),
                        children: HashMap::new(),
                        rules: HashMap::new(),
                        ancestors,
                    });
                    self.nodes[current].children.insert(segment.to_string(), child);
                    child
                }
            };
        }
        current
    }
}

impl Default for SecureTreeBuilder {
    fn default() -> Self {
        Self::new()
    }
}
