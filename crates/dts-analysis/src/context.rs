//! Folding parsed files into a merged device tree.
//!
//! Files fold in caller order (the include order of the context). Later
//! definitions override earlier ones, deletions detach whole subtrees,
//! and `&label` references merge into the node the label resolves to at
//! that point of the fold.

use std::collections::HashMap;
use std::sync::Arc;

use dts_grammar::Parse;
use dts_grammar::Span;
use dts_grammar::ast::AstNode;
use dts_grammar::ast::ChildNode;
use dts_grammar::ast::DeleteNode;
use dts_grammar::ast::DeleteProperty;
use dts_grammar::ast::DeleteTarget;
use dts_grammar::ast::Entry;
use dts_grammar::ast::LabelAssign;
use dts_grammar::ast::Property;
use dts_grammar::ast::RefNode;
use dts_grammar::ast::RefTarget;
use dts_grammar::ast::RootNode;
use dts_grammar::ast::TopLevel;
use indexmap::IndexMap;
use tracing::debug;
use url::Url;

use crate::Config;
use crate::FileDiagnostic;
use crate::diagnostics;
use crate::tree::DeviceTree;
use crate::tree::Node;
use crate::tree::NodeDefinition;
use crate::tree::NodeLabel;
use crate::tree::NodePath;
use crate::tree::NodeProperty;
use crate::tree::Sourced;

/// One parsed file of a context.
#[derive(Debug, Clone)]
pub struct FileAst {
    /// The URI of the file.
    pub uri: Arc<Url>,
    /// The parse of the file.
    pub parse: Arc<Parse>,
}

/// The owner of a label assignment.
#[derive(Debug, Clone, PartialEq, Eq)]
enum LabelOwner {
    /// The label is assigned to a node.
    Node(NodePath),
    /// The label is assigned to a property of a node.
    Property(NodePath, String),
}

impl LabelOwner {
    /// Gets the node path of the owner.
    fn path(&self) -> &NodePath {
        match self {
            Self::Node(path) => path,
            Self::Property(path, _) => path,
        }
    }
}

/// One label assignment observed during the fold.
#[derive(Debug, Clone)]
struct PoolEntry {
    /// The label name.
    name: String,
    /// The owner the label is assigned to.
    owner: LabelOwner,
    /// The URI of the assigning file.
    uri: Arc<Url>,
    /// The span of the assignment.
    span: Span,
}

/// Builds a merged [`DeviceTree`] out of the parsed files of one
/// context.
pub struct ContextBuilder<'a> {
    /// The tree under construction.
    root: Node,
    /// Every label assignment seen so far, in document+include order.
    ///
    /// Entries of deleted subtrees are pruned, so resolution always
    /// reflects the live tree.
    pool: Vec<PoolEntry>,
    /// The context diagnostics collected so far.
    diagnostics: Vec<FileDiagnostic>,
    /// The analysis configuration.
    config: &'a Config,
}

impl std::fmt::Debug for ContextBuilder<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContextBuilder")
            .field("labels", &self.pool.len())
            .field("diagnostics", &self.diagnostics.len())
            .finish_non_exhaustive()
    }
}

impl<'a> ContextBuilder<'a> {
    /// Folds the given files, in order, into a device tree.
    pub fn build(files: &[FileAst], config: &'a Config) -> (DeviceTree, Vec<FileDiagnostic>) {
        let mut builder = Self {
            root: Node::root(),
            pool: Vec::new(),
            diagnostics: Vec::new(),
            config,
        };

        for file in files {
            debug!(uri = %file.uri, "folding file into context");
            builder.fold_file(file);
        }

        builder.finish()
    }

    /// Folds the top-level statements of one file.
    fn fold_file(&mut self, file: &FileAst) {
        let root_path = NodePath::root();
        for statement in &file.parse.document().statements {
            match statement {
                TopLevel::Root(node) => self.merge_root(&file.uri, node),
                TopLevel::Child(node) => self.merge_child(&root_path, &file.uri, node),
                TopLevel::Ref(node) => self.merge_ref(&file.uri, node),
                TopLevel::DeleteNode(delete) => self.delete_node(&root_path, &file.uri, delete),
                TopLevel::DeleteProperty(delete) => {
                    self.delete_property(&root_path, &file.uri, delete)
                }
                TopLevel::Property(property) => {
                    self.merge_property(&root_path, &file.uri, property)
                }
                TopLevel::Directive(_) => {}
            }
        }
    }

    /// Merges a `/ { ... };` definition into the root node.
    fn merge_root(&mut self, uri: &Arc<Url>, node: &Arc<RootNode>) {
        let path = NodePath::root();
        self.root.definitions.push(NodeDefinition::Root(Sourced {
            uri: uri.clone(),
            ast: node.clone(),
        }));
        self.attach_labels(&path, uri, &node.labels);
        self.merge_entries(&path, uri, &node.entries);
    }

    /// Merges a child node definition under the given parent path.
    fn merge_child(&mut self, parent: &NodePath, uri: &Arc<Url>, child: &Arc<ChildNode>) {
        let full = child.name.full_name();
        let path = parent.join(full.clone());
        if let Some(parent_node) = self.node_mut(parent) {
            let node = parent_node
                .children
                .entry(full.clone())
                .or_insert_with(|| Node::new(full, path.clone()));
            node.definitions.push(NodeDefinition::Child(Sourced {
                uri: uri.clone(),
                ast: child.clone(),
            }));
        }

        self.attach_labels(&path, uri, &child.labels);
        self.merge_entries(&path, uri, &child.entries);
    }

    /// Merges a `&label { ... };` definition into the node its
    /// reference resolves to.
    fn merge_ref(&mut self, uri: &Arc<Url>, node: &Arc<RefNode>) {
        let Some(path) = self.resolve_ref(&node.reference) else {
            let (name, span) = describe_ref(&node.reference);
            self.push(uri, diagnostics::unable_to_resolve(&name, span));
            return;
        };

        if let Some(target) = self.node_mut(&path) {
            target.referenced_by.push(Sourced {
                uri: uri.clone(),
                ast: node.clone(),
            });
        }

        self.attach_labels(&path, uri, &node.labels);
        self.merge_entries(&path, uri, &node.entries);
    }

    /// Merges the entries of one node body.
    ///
    /// Sibling-name uniqueness is enforced per block: two child
    /// definitions with the same name inside the same braces flag the
    /// second one, while redefinitions across blocks and files are
    /// ordinary overrides.
    fn merge_entries(&mut self, path: &NodePath, uri: &Arc<Url>, entries: &[Entry]) {
        let mut block_names: HashMap<String, Span> = HashMap::new();
        for entry in entries {
            match entry {
                Entry::Child(child) => {
                    let full = child.name.full_name();
                    match block_names.get(&full) {
                        Some(first) => {
                            let diagnostic = diagnostics::duplicate_node_name(
                                &full,
                                child.name.span(),
                                *first,
                            );
                            self.push(uri, diagnostic);
                        }
                        None => {
                            block_names.insert(full, child.name.span());
                        }
                    }

                    self.merge_child(path, uri, child);
                }
                Entry::Property(property) => self.merge_property(path, uri, property),
                Entry::DeleteNode(delete) => self.delete_node(path, uri, delete),
                Entry::DeleteProperty(delete) => self.delete_property(path, uri, delete),
            }
        }
    }

    /// Appends a property definition to the node at the given path,
    /// chaining any previous definition behind it.
    fn merge_property(&mut self, path: &NodePath, uri: &Arc<Url>, property: &Arc<Property>) {
        let mut hint = None;
        if let Some(node) = self.node_mut(path) {
            match node.properties.entry(property.name.clone()) {
                indexmap::map::Entry::Occupied(mut entry) => {
                    let existing = entry.get_mut();
                    let shadowed = existing.current.clone();
                    hint = Some((
                        shadowed.uri.clone(),
                        diagnostics::duplicate_property_name(
                            &property.name,
                            shadowed.span(),
                            property.span(),
                        ),
                    ));
                    existing.replaced.push(shadowed);
                    existing.current = Sourced {
                        uri: uri.clone(),
                        ast: property.clone(),
                    };
                }
                indexmap::map::Entry::Vacant(entry) => {
                    entry.insert(NodeProperty {
                        name: property.name.clone(),
                        current: Sourced {
                            uri: uri.clone(),
                            ast: property.clone(),
                        },
                        replaced: Vec::new(),
                    });
                }
            }
        }

        if let Some((shadowed_uri, diagnostic)) = hint {
            if self.config.duplicate_hints {
                self.diagnostics.push(FileDiagnostic {
                    uri: shadowed_uri,
                    diagnostic,
                });
            }
        }

        for label in &property.labels {
            self.pool.push(PoolEntry {
                name: label.name.clone(),
                owner: LabelOwner::Property(path.clone(), property.name.clone()),
                uri: uri.clone(),
                span: label.span(),
            });
        }
    }

    /// Carries out a `/delete-node/` statement.
    fn delete_node(&mut self, parent: &NodePath, uri: &Arc<Url>, delete: &Arc<DeleteNode>) {
        match &delete.target {
            DeleteTarget::Name(name) => {
                let full = name.full_name();
                let path = parent.join(full.clone());
                if !self.detach(&path) {
                    self.push(uri, diagnostics::node_does_not_exist(&full, name.span()));
                }
            }
            DeleteTarget::Ref(target) => match self.resolve_ref(target) {
                Some(path) => {
                    if !self.detach(&path) {
                        let (name, span) = describe_ref(target);
                        self.push(uri, diagnostics::node_does_not_exist(&name, span));
                    }
                }
                None => {
                    let (name, span) = describe_ref(target);
                    self.push(uri, diagnostics::unable_to_resolve(&name, span));
                }
            },
        }
    }

    /// Carries out a `/delete-property/` statement.
    fn delete_property(&mut self, path: &NodePath, uri: &Arc<Url>, delete: &Arc<DeleteProperty>) {
        let removed = self
            .node_mut(path)
            .and_then(|node| node.properties.shift_remove(&delete.name));
        if removed.is_none() {
            self.push(
                uri,
                diagnostics::property_does_not_exist(&delete.name, delete.span()),
            );
            return;
        }

        // Labels of the removed property leave the pool with it.
        let owner = LabelOwner::Property(path.clone(), delete.name.clone());
        self.pool.retain(|entry| entry.owner != owner);
    }

    /// Detaches the subtree at the given path.
    ///
    /// Returns `false` when no node exists there. A detached subtree
    /// ceases to exist: its labels no longer contribute to the pool.
    fn detach(&mut self, path: &NodePath) -> bool {
        let Some(parent) = path.parent() else {
            // The root itself cannot be detached.
            return false;
        };
        let Some(name) = path.last().map(str::to_string) else {
            return false;
        };

        let removed = self
            .node_mut(&parent)
            .and_then(|node| node.children.shift_remove(&name));
        if removed.is_none() {
            return false;
        }

        self.pool.retain(|entry| !entry.owner.path().starts_with(path));
        true
    }

    /// Attaches label assignments to the node at the given path and
    /// records them in the pool.
    fn attach_labels(&mut self, path: &NodePath, uri: &Arc<Url>, labels: &[LabelAssign]) {
        if labels.is_empty() {
            return;
        }

        if let Some(node) = self.node_mut(path) {
            for label in labels {
                node.labels.push(NodeLabel {
                    uri: uri.clone(),
                    label: label.clone(),
                });
            }
        }

        for label in labels {
            self.pool.push(PoolEntry {
                name: label.name.clone(),
                owner: LabelOwner::Node(path.clone()),
                uri: uri.clone(),
                span: label.span(),
            });
        }
    }

    /// Resolves a reference to an absolute path of a live node.
    ///
    /// Labels resolve to their first assignment in document+include
    /// order; paths resolve only when the node exists.
    fn resolve_ref(&self, target: &RefTarget) -> Option<NodePath> {
        let path = match target {
            RefTarget::Label(label) => self.resolve_label(&label.value)?,
            RefTarget::Path(path) => NodePath::new(path.segments.clone()),
        };

        self.node_at(&path).is_some().then_some(path)
    }

    /// Resolves a label name through the pool.
    fn resolve_label(&self, name: &str) -> Option<NodePath> {
        self.pool.iter().find_map(|entry| match &entry.owner {
            LabelOwner::Node(path) if entry.name == name => Some(path.clone()),
            _ => None,
        })
    }

    /// Gets the node at the given path.
    fn node_at(&self, path: &NodePath) -> Option<&Node> {
        let mut node = &self.root;
        for segment in path.segments() {
            node = node.children.get(segment)?;
        }

        Some(node)
    }

    /// Gets the node at the given path, mutably.
    fn node_mut(&mut self, path: &NodePath) -> Option<&mut Node> {
        let mut node = &mut self.root;
        for segment in path.segments() {
            node = node.children.get_mut(segment)?;
        }

        Some(node)
    }

    /// Records a diagnostic against the given file.
    fn push(&mut self, uri: &Arc<Url>, diagnostic: dts_grammar::Diagnostic) {
        self.diagnostics.push(FileDiagnostic {
            uri: uri.clone(),
            diagnostic,
        });
    }

    /// Sweeps the label pool for conflicts and produces the finished
    /// tree.
    fn finish(mut self) -> (DeviceTree, Vec<FileDiagnostic>) {
        let mut groups: IndexMap<String, Vec<PoolEntry>> = IndexMap::new();
        for entry in &self.pool {
            groups
                .entry(entry.name.clone())
                .or_default()
                .push(entry.clone());
        }

        let mut labels = IndexMap::new();
        for (name, group) in &groups {
            if let Some(first) = group.iter().find_map(|e| match &e.owner {
                LabelOwner::Node(path) => Some(path.clone()),
                _ => None,
            }) {
                labels.insert(name.clone(), first);
            }

            let last = group.last().expect("groups are never empty");
            let earlier: Vec<_> = group[..group.len() - 1]
                .iter()
                .filter(|e| e.owner != last.owner)
                .map(|e| (e.owner.path().clone(), e.span))
                .collect();
            if !earlier.is_empty() {
                let diagnostic = diagnostics::label_already_in_use(
                    name,
                    last.span,
                    last.owner.path(),
                    earlier,
                );
                self.diagnostics.push(FileDiagnostic {
                    uri: last.uri.clone(),
                    diagnostic,
                });
            }
        }

        (DeviceTree::new(self.root, labels), self.diagnostics)
    }
}

/// Describes a reference target for diagnostics: its display name and
/// span.
fn describe_ref(target: &RefTarget) -> (String, Span) {
    match target {
        RefTarget::Label(label) => (format!("&{name}", name = label.value), label.span()),
        RefTarget::Path(path) => {
            let mut name = String::from("&{");
            for segment in &path.segments {
                name.push('/');
                name.push_str(segment);
            }
            name.push('}');
            (name, path.span())
        }
    }
}

#[cfg(test)]
mod test {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::tree::DeviceTree;
    use dts_grammar::ContextIssue;
    use dts_grammar::IssueKind;
    use dts_grammar::Severity;
    use dts_grammar::Tag;

    fn file(uri: &str, source: &str) -> FileAst {
        FileAst {
            uri: Arc::new(Url::parse(uri).expect("test uri should parse")),
            parse: Arc::new(dts_grammar::parse(source)),
        }
    }

    fn build(sources: &[&str]) -> (DeviceTree, Vec<FileDiagnostic>) {
        let files: Vec<_> = sources
            .iter()
            .enumerate()
            .map(|(i, source)| file(&format!("memory:///file{i}.dts"), source))
            .collect();
        for f in &files {
            assert!(
                f.parse.diagnostics().is_empty(),
                "test sources must parse cleanly: {diagnostics:?}",
                diagnostics = f.parse.diagnostics()
            );
        }
        let config = Config::default();
        ContextBuilder::build(&files, &config)
    }

    fn context_kinds(diagnostics: &[FileDiagnostic]) -> Vec<ContextIssue> {
        diagnostics
            .iter()
            .map(|d| match d.diagnostic.kind() {
                IssueKind::Context(issue) => issue,
                other => panic!("expected a context issue, found {other:?}"),
            })
            .collect()
    }

    #[test]
    fn merges_children_and_properties() {
        let (tree, diagnostics) = build(&[
            "/ { soc { uart@1c00 { status = \"disabled\"; }; }; };",
            "/ { soc { uart@1c00 { status = \"okay\"; }; }; };",
        ]);
        assert_eq!(diagnostics.len(), 1);
        assert_eq!(
            context_kinds(&diagnostics),
            vec![ContextIssue::DuplicatePropertyName]
        );
        assert_eq!(diagnostics[0].diagnostic.severity(), Severity::Hint);
        assert_eq!(diagnostics[0].diagnostic.tags(), &[Tag::Unnecessary]);
        // The hint lands on the shadowed definition in the first file.
        assert_eq!(
            diagnostics[0].uri.as_str(),
            "memory:///file0.dts"
        );

        let uart = tree
            .node_at(&NodePath::new(["soc", "uart@1c00"]))
            .expect("uart should exist");
        assert_eq!(uart.definitions.len(), 2);
        let status = uart.property("status").expect("status should exist");
        assert_eq!(status.as_string(), Some("okay"));
        assert_eq!(status.replaced.len(), 1);
    }

    #[test]
    fn merge_is_idempotent_modulo_hints() {
        let source = "/ { soc { eth@0 { reg = <0 4>; }; }; };";
        let (once, diagnostics_once) = build(&[source]);
        let (twice, diagnostics_twice) = build(&[source, source]);

        assert_eq!(diagnostics_once.len(), 0);
        assert_eq!(
            context_kinds(&diagnostics_twice),
            vec![ContextIssue::DuplicatePropertyName]
        );

        // Same shape: identical child and property names in order.
        fn shape(node: &Node) -> (Vec<String>, Vec<String>) {
            (
                node.children.keys().cloned().collect(),
                node.properties.keys().cloned().collect(),
            )
        }
        let soc_once = once.node_at(&NodePath::new(["soc"])).expect("soc");
        let soc_twice = twice.node_at(&NodePath::new(["soc"])).expect("soc");
        assert_eq!(shape(soc_once), shape(soc_twice));
    }

    #[test]
    fn ref_nodes_merge_into_labeled_target() {
        let (tree, diagnostics) = build(&[
            "/ { soc { uart: serial@0 { status = \"disabled\"; }; }; };",
            "&uart { status = \"okay\"; current-speed = <115200>; };",
        ]);
        assert_eq!(context_kinds(&diagnostics), vec![ContextIssue::DuplicatePropertyName]);

        let serial = tree
            .node_at(&NodePath::new(["soc", "serial@0"]))
            .expect("serial should exist");
        assert_eq!(serial.referenced_by.len(), 1);
        assert_eq!(
            serial.property("status").and_then(NodeProperty::as_string),
            Some("okay")
        );
        assert_eq!(
            serial
                .property("current-speed")
                .and_then(NodeProperty::as_u32),
            Some(115200)
        );
    }

    #[test]
    fn unresolved_ref_is_flagged() {
        let (_, diagnostics) = build(&["&missing { status = \"okay\"; };"]);
        assert_eq!(
            context_kinds(&diagnostics),
            vec![ContextIssue::UnableToResolveChildNode]
        );
    }

    #[test]
    fn labels_on_ref_nodes_alias_the_target() {
        let (tree, diagnostics) = build(&[
            "/ { uart: serial@0 {}; };",
            "alias: &uart {};",
            "&alias { status = \"okay\"; };",
        ]);
        assert_eq!(diagnostics.len(), 0);
        let serial = tree
            .node_at(&NodePath::new(["serial@0"]))
            .expect("serial should exist");
        assert_eq!(
            serial.property("status").and_then(NodeProperty::as_string),
            Some("okay")
        );
    }

    #[test]
    fn delete_node_detaches_subtree_and_labels() {
        let (tree, diagnostics) = build(&[
            "/ { soc { eth: ethernet@0 { phy: phy@1 {}; }; }; };",
            "/ { soc { /delete-node/ ethernet@0; }; };",
            "&phy { status = \"okay\"; };",
        ]);
        // The reference to the deleted subtree's label no longer
        // resolves.
        assert_eq!(
            context_kinds(&diagnostics),
            vec![ContextIssue::UnableToResolveChildNode]
        );
        assert!(tree.node_at(&NodePath::new(["soc", "ethernet@0"])).is_none());
        assert!(tree.node_by_label("eth").is_none());
    }

    #[test]
    fn delete_node_by_label() {
        let (tree, diagnostics) = build(&[
            "/ { soc { eth: ethernet@0 {}; }; };",
            "/delete-node/ &eth;",
        ]);
        assert_eq!(diagnostics.len(), 0);
        assert!(tree.node_at(&NodePath::new(["soc", "ethernet@0"])).is_none());
    }

    #[test]
    fn delete_missing_node_is_flagged() {
        let (_, diagnostics) = build(&["/ { /delete-node/ ghost; };"]);
        assert_eq!(
            context_kinds(&diagnostics),
            vec![ContextIssue::NodeDoesNotExist]
        );
    }

    #[test]
    fn delete_property() {
        let (tree, diagnostics) = build(&[
            "/ { chosen { bootargs = \"console=ttyS0\"; }; };",
            "/ { chosen { /delete-property/ bootargs; /delete-property/ ghost; }; };",
        ]);
        assert_eq!(
            context_kinds(&diagnostics),
            vec![ContextIssue::PropertyDoesNotExist]
        );
        let chosen = tree.node_at(&NodePath::new(["chosen"])).expect("chosen");
        assert!(chosen.property("bootargs").is_none());
    }

    #[test]
    fn duplicate_sibling_names_in_one_block() {
        let (tree, diagnostics) = build(&["/ { node {}; node {}; };"]);
        assert_eq!(
            context_kinds(&diagnostics),
            vec![ContextIssue::DuplicateNodeName]
        );
        // Both definitions merged into one logical node.
        let node = tree.node_at(&NodePath::new(["node"])).expect("node");
        assert_eq!(node.definitions.len(), 2);
    }

    #[test]
    fn duplicate_labels_on_distinct_nodes_are_flagged() {
        let (_, diagnostics) = build(&["/ { x: a {}; x: b {}; };"]);
        assert_eq!(
            context_kinds(&diagnostics),
            vec![ContextIssue::LabelAlreadyInUse]
        );
        // The earlier conflicting assignment is linked.
        let labels: Vec<_> = diagnostics[0].diagnostic.labels().collect();
        assert_eq!(labels.len(), 2);
    }

    #[test]
    fn duplicate_labels_on_the_same_node_are_allowed() {
        let (tree, diagnostics) = build(&[
            "/ { uart: serial@0 {}; };",
            "/ { uart: serial@0 { status = \"okay\"; }; };",
        ]);
        assert_eq!(diagnostics.len(), 0);
        let serial = tree.node_at(&NodePath::new(["serial@0"])).expect("serial");
        assert_eq!(serial.labels.len(), 2);
    }

    #[test]
    fn label_resolution_is_first_match_in_order() {
        let (tree, _) = build(&["/ { x: a {}; }; ", "/ { x: b {}; };"]);
        // Resolution picks the first assignment in include order even
        // though the conflict itself is also flagged.
        assert_eq!(
            tree.node_by_label("x").map(|n| n.name.as_str()),
            Some("a")
        );
    }

    #[test]
    fn path_references_resolve() {
        let (tree, diagnostics) = build(&[
            "/ { soc { serial@0 {}; }; };",
            "&{/soc/serial@0} { status = \"okay\"; };",
        ]);
        assert_eq!(diagnostics.len(), 0);
        let serial = tree
            .node_at(&NodePath::new(["soc", "serial@0"]))
            .expect("serial");
        assert_eq!(
            serial.property("status").and_then(NodeProperty::as_string),
            Some("okay")
        );
    }

    #[test]
    fn top_level_properties_attach_to_root() {
        let (tree, diagnostics) = build(&["#address-cells = <1>;\n/ {};"]);
        assert_eq!(diagnostics.len(), 0);
        assert_eq!(
            tree.root
                .property("#address-cells")
                .and_then(NodeProperty::as_u32),
            Some(1)
        );
    }
}
