//! The merged runtime device tree.
//!
//! A [`DeviceTree`] is the logical tree produced by folding the parsed
//! files of one context in order: overrides applied, deletions carried
//! out, references resolved. It is immutable once built; the validator
//! only reads it and collects its diagnostics separately.

use std::fmt;
use std::sync::Arc;

use dts_grammar::Span;
use dts_grammar::ast::AstNode;
use dts_grammar::ast::CellValue;
use dts_grammar::ast::ChildNode;
use dts_grammar::ast::LabelAssign;
use dts_grammar::ast::Property;
use dts_grammar::ast::PropertyValue;
use dts_grammar::ast::RefNode;
use dts_grammar::ast::RootNode;
use indexmap::IndexMap;
use url::Url;

/// An AST node together with the URI of the file it came from.
#[derive(Debug)]
pub struct Sourced<T> {
    /// The URI of the defining file.
    pub uri: Arc<Url>,
    /// The AST node.
    pub ast: Arc<T>,
}

impl<T> Clone for Sourced<T> {
    fn clone(&self) -> Self {
        Self {
            uri: self.uri.clone(),
            ast: self.ast.clone(),
        }
    }
}

impl<T: AstNode> Sourced<T> {
    /// Gets the source span of the underlying AST node.
    pub fn span(&self) -> Span {
        self.ast.span()
    }
}

/// An absolute node path: the segment list below the root.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, PartialOrd, Ord)]
pub struct NodePath(Vec<String>);

impl NodePath {
    /// The path of the root node.
    pub fn root() -> Self {
        Self::default()
    }

    /// Constructs a path from segments.
    pub fn new(segments: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self(segments.into_iter().map(Into::into).collect())
    }

    /// Gets the segments of the path.
    pub fn segments(&self) -> &[String] {
        &self.0
    }

    /// Determines whether this is the root path.
    pub fn is_root(&self) -> bool {
        self.0.is_empty()
    }

    /// Creates the path of a child of this path.
    pub fn join(&self, segment: impl Into<String>) -> Self {
        let mut segments = self.0.clone();
        segments.push(segment.into());
        Self(segments)
    }

    /// Gets the parent path, or `None` for the root.
    pub fn parent(&self) -> Option<Self> {
        if self.0.is_empty() {
            return None;
        }

        Some(Self(self.0[..self.0.len() - 1].to_vec()))
    }

    /// Gets the final segment, or `None` for the root.
    pub fn last(&self) -> Option<&str> {
        self.0.last().map(String::as_str)
    }

    /// Determines whether `self` is `other` or a descendant of it.
    pub fn starts_with(&self, other: &NodePath) -> bool {
        self.0.len() >= other.0.len() && self.0[..other.0.len()] == other.0[..]
    }
}

impl fmt::Display for NodePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            return write!(f, "/");
        }

        for segment in &self.0 {
            write!(f, "/{segment}")?;
        }

        Ok(())
    }
}

/// An AST definition that contributed to a logical node.
#[derive(Debug, Clone)]
pub enum NodeDefinition {
    /// A `/ { ... };` definition.
    Root(Sourced<RootNode>),
    /// A `name { ... };` definition.
    Child(Sourced<ChildNode>),
}

impl NodeDefinition {
    /// Gets the URI of the defining file.
    pub fn uri(&self) -> &Arc<Url> {
        match self {
            Self::Root(d) => &d.uri,
            Self::Child(d) => &d.uri,
        }
    }

    /// Gets the span best identifying the definition: the name for a
    /// child node, the whole statement for a root node.
    pub fn name_span(&self) -> Span {
        match self {
            Self::Root(d) => d.ast.first.span,
            Self::Child(d) => d.ast.name.span(),
        }
    }
}

/// A label assignment recorded on a logical node.
#[derive(Debug, Clone)]
pub struct NodeLabel {
    /// The URI of the assigning file.
    pub uri: Arc<Url>,
    /// The label assignment.
    pub label: LabelAssign,
}

/// A logical property of a runtime node.
///
/// Later definitions replace earlier ones; the earlier definitions are
/// retained as the `replaced` chain, earliest first, for diagnostics.
#[derive(Debug, Clone)]
pub struct NodeProperty {
    /// The property name.
    pub name: String,
    /// The effective (last-wins) definition.
    pub current: Sourced<Property>,
    /// Every shadowed definition, earliest first.
    pub replaced: Vec<Sourced<Property>>,
}

impl NodeProperty {
    /// Gets the values of the effective definition.
    pub fn values(&self) -> &[PropertyValue] {
        &self.current.ast.values
    }

    /// Gets the first cell of the effective definition interpreted as
    /// a `u32`, when the property is a single-cell array.
    pub fn as_u32(&self) -> Option<u32> {
        match self.values() {
            [PropertyValue::Cells(cells)] => match cells.cells.as_slice() {
                [cell] => match cell.value {
                    CellValue::Number(n) => u32::try_from(n).ok(),
                    _ => None,
                },
                _ => None,
            },
            _ => None,
        }
    }

    /// Gets the effective definition's string value, when the property
    /// is a single string.
    pub fn as_string(&self) -> Option<&str> {
        match self.values() {
            [PropertyValue::String(s)] => Some(&s.value),
            _ => None,
        }
    }
}

/// A logical node of the runtime tree.
#[derive(Debug, Clone, Default)]
pub struct Node {
    /// The node name, including any unit address; empty for the root.
    pub name: String,
    /// The absolute path of the node.
    pub path: NodePath,
    /// The children, in insertion order.
    pub children: IndexMap<String, Node>,
    /// The properties, in insertion order.
    pub properties: IndexMap<String, NodeProperty>,
    /// Every AST definition that contributed to this node.
    pub definitions: Vec<NodeDefinition>,
    /// Every reference node that merged into this node.
    pub referenced_by: Vec<Sourced<RefNode>>,
    /// Every label assigned to this node.
    pub labels: Vec<NodeLabel>,
}

impl Node {
    /// Constructs the root node.
    pub(crate) fn root() -> Self {
        Self::default()
    }

    /// Constructs an empty node with the given name and path.
    pub(crate) fn new(name: String, path: NodePath) -> Self {
        Self {
            name,
            path,
            ..Self::default()
        }
    }

    /// Gets a property by name.
    pub fn property(&self, name: &str) -> Option<&NodeProperty> {
        self.properties.get(name)
    }

    /// Gets a child by its full name (including unit address).
    pub fn child(&self, name: &str) -> Option<&Node> {
        self.children.get(name)
    }

    /// Gets the span best identifying the node, if it has definitions.
    pub fn name_span(&self) -> Option<(Arc<Url>, Span)> {
        self.definitions
            .first()
            .map(|d| (d.uri().clone(), d.name_span()))
    }

    /// Visits this node and every descendant, depth first.
    pub fn walk<'a>(&'a self, visit: &mut dyn FnMut(&'a Node)) {
        visit(self);
        for child in self.children.values() {
            child.walk(visit);
        }
    }
}

/// The merged logical device tree of one analysis context.
#[derive(Debug, Clone, Default)]
pub struct DeviceTree {
    /// The root node.
    pub root: Node,
    /// Label resolution: label name to owning path, first assignment
    /// in document and include order wins.
    labels: IndexMap<String, NodePath>,
}

impl DeviceTree {
    /// Constructs a tree from its parts.
    pub(crate) fn new(root: Node, labels: IndexMap<String, NodePath>) -> Self {
        Self { root, labels }
    }

    /// Gets the node at the given absolute path.
    pub fn node_at(&self, path: &NodePath) -> Option<&Node> {
        let mut node = &self.root;
        for segment in path.segments() {
            node = node.children.get(segment)?;
        }

        Some(node)
    }

    /// Resolves a label to its owning node.
    pub fn node_by_label(&self, label: &str) -> Option<&Node> {
        self.node_at(self.labels.get(label)?)
    }

    /// Resolves a numeric phandle by scanning for a node whose
    /// `phandle` property carries the value.
    pub fn node_by_phandle(&self, value: u32) -> Option<&Node> {
        let mut found = None;
        self.root.walk(&mut |node| {
            if found.is_none()
                && node
                    .property("phandle")
                    .and_then(NodeProperty::as_u32)
                    .is_some_and(|v| v == value)
            {
                found = Some(node.path.clone());
            }
        });

        self.node_at(&found?)
    }

    /// Gets the label resolution map.
    pub fn labels(&self) -> &IndexMap<String, NodePath> {
        &self.labels
    }
}

#[cfg(test)]
mod test {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn paths_display_rooted() {
        assert_eq!(NodePath::root().to_string(), "/");
        assert_eq!(
            NodePath::new(["soc", "uart@1c00"]).to_string(),
            "/soc/uart@1c00"
        );
    }

    #[test]
    fn path_prefixes() {
        let parent = NodePath::new(["soc"]);
        let child = parent.join("uart@1c00");
        assert!(child.starts_with(&parent));
        assert!(!parent.starts_with(&child));
        assert_eq!(child.parent(), Some(parent));
        assert_eq!(child.last(), Some("uart@1c00"));
    }
}
