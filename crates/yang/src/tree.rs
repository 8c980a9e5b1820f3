//! The generic data tree.
//!
//! A tree is owned by its root node; children live in a `Vec` inside the
//! parent and the whole structure is freed as one unit. No parent
//! pointers, no shared ownership; callers that need to hand a subtree
//! across a boundary clone it.
//!
//! Nodes are schema-agnostic at this layer. Whether a node is
//! schema-linked or opaque is decided by the validator against the
//! registry; opaque nodes are only legal inside protocol envelopes.

use std::fmt;

/// One XML attribute on a data node (e.g. `operation="create"` on an
/// edit-config element, or `message-id` on an envelope).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attr {
    pub name: String,
    pub value: String,
}

/// A node in a data tree: container, leaf, leaf-list entry, list entry,
/// or protocol envelope. The distinction is structural: a node with a
/// value and no children is a leaf; everything else is interior.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DataNode {
    pub name: String,
    /// Resolved namespace URI. `None` inherits the parent's namespace;
    /// the parser always resolves this, so `None` only appears on trees
    /// built by hand inside a single module.
    pub namespace: Option<String>,
    /// Leaf payload. Empty-element leaves (`<ok/>`) carry `None`.
    pub value: Option<String>,
    pub attrs: Vec<Attr>,
    pub children: Vec<DataNode>,
}

impl DataNode {
    // ── constructors ────────────────────────────────────────────────

    pub fn container(name: impl Into<String>) -> Self {
        DataNode {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn leaf(name: impl Into<String>, value: impl Into<String>) -> Self {
        DataNode {
            name: name.into(),
            value: Some(value.into()),
            ..Default::default()
        }
    }

    /// An empty element such as `<ok/>` or `<running/>`.
    pub fn empty(name: impl Into<String>) -> Self {
        DataNode {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn with_namespace(mut self, ns: impl Into<String>) -> Self {
        self.namespace = Some(ns.into());
        self
    }

    pub fn with_attr(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.attrs.push(Attr {
            name: name.into(),
            value: value.into(),
        });
        self
    }

    pub fn with_child(mut self, child: DataNode) -> Self {
        self.children.push(child);
        self
    }

    pub fn push(&mut self, child: DataNode) {
        self.children.push(child);
    }

    // ── inspection ──────────────────────────────────────────────────

    pub fn is_leaf(&self) -> bool {
        self.children.is_empty() && self.value.is_some()
    }

    /// Empty element with no text and no children.
    pub fn is_presence(&self) -> bool {
        self.children.is_empty() && self.value.is_none()
    }

    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attrs
            .iter()
            .find(|a| a.name == name)
            .map(|a| a.value.as_str())
    }

    /// Namespace this node's children inherit.
    pub fn effective_namespace<'a>(&'a self, inherited: Option<&'a str>) -> Option<&'a str> {
        self.namespace.as_deref().or(inherited)
    }

    /// Whether this node answers to the given (namespace, name) pair,
    /// treating a `None` namespace on either side as a wildcard.
    pub fn matches(&self, ns: Option<&str>, name: &str) -> bool {
        if self.name != name {
            return false;
        }
        match (self.namespace.as_deref(), ns) {
            (Some(a), Some(b)) => a == b,
            _ => true,
        }
    }

    pub fn child(&self, name: &str) -> Option<&DataNode> {
        self.children.iter().find(|c| c.name == name)
    }

    pub fn child_mut(&mut self, name: &str) -> Option<&mut DataNode> {
        self.children.iter_mut().find(|c| c.name == name)
    }

    /// Text value of a direct leaf child.
    pub fn child_value(&self, name: &str) -> Option<&str> {
        self.child(name).and_then(|c| c.value.as_deref())
    }

    /// All direct children with the given name (list / leaf-list entries).
    pub fn children_named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a DataNode> {
        self.children.iter().filter(move |c| c.name == name)
    }

    /// Locate a list entry among `self.children` by key leaf values.
    pub fn find_entry<'a>(&'a self, name: &'a str, keys: &[(String, String)]) -> Option<&'a DataNode> {
        self.children_named(name)
            .find(|entry| entry_matches_keys(entry, keys))
    }

    /// Deep copy with all `operation` attributes stripped, the shape an
    /// edit-config payload takes when it lands in a datastore.
    pub fn cloned_without_edit_attrs(&self) -> DataNode {
        DataNode {
            name: self.name.clone(),
            namespace: self.namespace.clone(),
            value: self.value.clone(),
            attrs: self
                .attrs
                .iter()
                .filter(|a| a.name != "operation")
                .cloned()
                .collect(),
            children: self
                .children
                .iter()
                .map(DataNode::cloned_without_edit_attrs)
                .collect(),
        }
    }

    /// Number of nodes in the subtree, root included.
    pub fn size(&self) -> usize {
        1 + self.children.iter().map(DataNode::size).sum::<usize>()
    }
}

pub(crate) fn entry_matches_keys(entry: &DataNode, keys: &[(String, String)]) -> bool {
    keys.iter()
        .all(|(k, v)| entry.child_value(k) == Some(v.as_str()))
}

impl fmt::Display for DataNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.value {
            Some(v) => write!(f, "{}={v}", self.name),
            None => write!(f, "{}[{}]", self.name, self.children.len()),
        }
    }
}
