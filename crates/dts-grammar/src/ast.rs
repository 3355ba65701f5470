//! Abstract syntax tree for DTS documents.
//!
//! The tree is owned and `Arc`-shared: the parser builds it once per file
//! and the analysis layer keeps references to individual nodes after the
//! parse completes. Every node records its first and last token, so the
//! range of a parent always encloses the ranges of its children.

use std::fmt;
use std::sync::Arc;

use crate::Span;
use crate::lexer::Token;

/// Common position bookkeeping for AST nodes.
pub trait AstNode {
    /// Gets the first token of the node.
    fn first_token(&self) -> Token;

    /// Gets the last token of the node.
    fn last_token(&self) -> Token;

    /// Gets the source span covered by the node.
    fn span(&self) -> Span {
        self.first_token().span.cover(self.last_token().span)
    }
}

/// A label assignment (`name:`) attached to the element that follows it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabelAssign {
    /// The label name, without the trailing colon.
    pub name: String,
    /// The first token of the label name.
    pub first: Token,
    /// The colon token.
    pub colon: Token,
}

impl AstNode for LabelAssign {
    fn first_token(&self) -> Token {
        self.first
    }

    fn last_token(&self) -> Token {
        self.colon
    }
}

/// A label reference (`&name`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabelRef {
    /// The referenced label name, without the leading ampersand.
    pub value: String,
    /// The `&` token.
    pub amp: Token,
    /// The last token of the referenced name.
    pub last: Token,
}

impl AstNode for LabelRef {
    fn first_token(&self) -> Token {
        self.amp
    }

    fn last_token(&self) -> Token {
        self.last
    }
}

/// A node path reference (`&{/soc/uart@fe001000}`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathRef {
    /// The path segments, in order from the root.
    pub segments: Vec<String>,
    /// The first token (the `&`).
    pub first: Token,
    /// The last token (the closing brace when present).
    pub last: Token,
}

impl AstNode for PathRef {
    fn first_token(&self) -> Token {
        self.first
    }

    fn last_token(&self) -> Token {
        self.last
    }
}

/// A node name with an optional unit address (`name@address`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeName {
    /// The node name.
    pub name: String,
    /// The unit address, when present and parseable.
    pub address: Option<u64>,
    /// The first token of the name.
    pub first: Token,
    /// The last token of the name or address.
    pub last: Token,
}

impl NodeName {
    /// Gets the full name including the unit address.
    pub fn full_name(&self) -> String {
        match self.address {
            Some(address) => format!("{name}@{address:x}", name = self.name),
            None => self.name.clone(),
        }
    }
}

impl AstNode for NodeName {
    fn first_token(&self) -> Token {
        self.first
    }

    fn last_token(&self) -> Token {
        self.last
    }
}

impl fmt::Display for NodeName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.address {
            Some(address) => write!(f, "{name}@{address:x}", name = self.name),
            None => write!(f, "{name}", name = self.name),
        }
    }
}

/// A string property value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StringValue {
    /// The unescaped string contents.
    pub value: String,
    /// Whether the string was left open at the end of its line.
    pub unterminated: bool,
    /// The string token.
    pub token: Token,
}

impl AstNode for StringValue {
    fn first_token(&self) -> Token {
        self.token
    }

    fn last_token(&self) -> Token {
        self.token
    }
}

/// A single cell inside a `<...>` array.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cell {
    /// The value of the cell.
    pub value: CellValue,
    /// The first token of the cell.
    pub first: Token,
    /// The last token of the cell.
    pub last: Token,
}

impl AstNode for Cell {
    fn first_token(&self) -> Token {
        self.first
    }

    fn last_token(&self) -> Token {
        self.last
    }
}

/// The value of a single cell.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CellValue {
    /// A numeric literal or an evaluated parenthesized expression.
    Number(u64),
    /// A phandle reference (`&label`).
    Ref(LabelRef),
    /// A phandle reference by path (`&{/a/b}`).
    Path(PathRef),
}

/// A cell array property value (`<...>`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CellArray {
    /// The cells of the array.
    pub cells: Vec<Cell>,
    /// The opening `<`.
    pub open: Token,
    /// The closing `>` (or the token recovery stopped at).
    pub close: Token,
}

impl AstNode for CellArray {
    fn first_token(&self) -> Token {
        self.open
    }

    fn last_token(&self) -> Token {
        self.close
    }
}

/// A bytestring property value (`[0011 22]`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ByteString {
    /// The decoded bytes.
    pub bytes: Vec<u8>,
    /// The opening `[`.
    pub open: Token,
    /// The closing `]` (or the token recovery stopped at).
    pub close: Token,
}

impl AstNode for ByteString {
    fn first_token(&self) -> Token {
        self.open
    }

    fn last_token(&self) -> Token {
        self.close
    }
}

/// A property value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PropertyValue {
    /// A double-quoted string.
    String(StringValue),
    /// A `<...>` cell array.
    Cells(CellArray),
    /// A bare `&label` reference.
    Ref(LabelRef),
    /// A bare `&{/path}` reference.
    NodePath(PathRef),
    /// A `[...]` bytestring.
    Bytes(ByteString),
}

impl AstNode for PropertyValue {
    fn first_token(&self) -> Token {
        match self {
            Self::String(v) => v.first_token(),
            Self::Cells(v) => v.first_token(),
            Self::Ref(v) => v.first_token(),
            Self::NodePath(v) => v.first_token(),
            Self::Bytes(v) => v.first_token(),
        }
    }

    fn last_token(&self) -> Token {
        match self {
            Self::String(v) => v.last_token(),
            Self::Cells(v) => v.last_token(),
            Self::Ref(v) => v.last_token(),
            Self::NodePath(v) => v.last_token(),
            Self::Bytes(v) => v.last_token(),
        }
    }
}

/// A property definition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Property {
    /// Labels attached to the property.
    pub labels: Vec<LabelAssign>,
    /// The property name.
    pub name: String,
    /// The values assigned to the property.
    ///
    /// Empty for boolean-style properties (`prop;`).
    pub values: Vec<PropertyValue>,
    /// The first token of the property (a label or the name).
    pub first: Token,
    /// The last token (the semicolon when present).
    pub last: Token,
}

impl AstNode for Property {
    fn first_token(&self) -> Token {
        self.first
    }

    fn last_token(&self) -> Token {
        self.last
    }
}

/// An entry in a node body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Entry {
    /// A child node.
    Child(Arc<ChildNode>),
    /// A property definition.
    Property(Arc<Property>),
    /// A `/delete-node/` statement.
    DeleteNode(Arc<DeleteNode>),
    /// A `/delete-property/` statement.
    DeleteProperty(Arc<DeleteProperty>),
}

impl AstNode for Entry {
    fn first_token(&self) -> Token {
        match self {
            Self::Child(n) => n.first_token(),
            Self::Property(p) => p.first_token(),
            Self::DeleteNode(d) => d.first_token(),
            Self::DeleteProperty(d) => d.first_token(),
        }
    }

    fn last_token(&self) -> Token {
        match self {
            Self::Child(n) => n.last_token(),
            Self::Property(p) => p.last_token(),
            Self::DeleteNode(d) => d.last_token(),
            Self::DeleteProperty(d) => d.last_token(),
        }
    }
}

/// A root node definition (`/ { ... };`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RootNode {
    /// Labels attached to the definition.
    pub labels: Vec<LabelAssign>,
    /// The body entries.
    pub entries: Vec<Entry>,
    /// The first token (a label or the `/`).
    pub first: Token,
    /// The last token (the semicolon when present).
    pub last: Token,
}

impl AstNode for RootNode {
    fn first_token(&self) -> Token {
        self.first
    }

    fn last_token(&self) -> Token {
        self.last
    }
}

/// A child node definition (`name@address { ... };`).
///
/// A child node with an unparseable name is still present in the tree;
/// the parser flags it with a diagnostic instead of dropping it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChildNode {
    /// Labels attached to the definition.
    pub labels: Vec<LabelAssign>,
    /// The node name with optional unit address.
    pub name: NodeName,
    /// The body entries.
    pub entries: Vec<Entry>,
    /// The first token (a label or the start of the name).
    pub first: Token,
    /// The last token (the semicolon when present).
    pub last: Token,
}

impl AstNode for ChildNode {
    fn first_token(&self) -> Token {
        self.first
    }

    fn last_token(&self) -> Token {
        self.last
    }
}

/// A reference node definition (`&label { ... };`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefNode {
    /// Labels attached to the definition.
    pub labels: Vec<LabelAssign>,
    /// The referenced label or path.
    pub reference: RefTarget,
    /// The body entries.
    pub entries: Vec<Entry>,
    /// The first token (a label or the `&`).
    pub first: Token,
    /// The last token (the semicolon when present).
    pub last: Token,
}

impl AstNode for RefNode {
    fn first_token(&self) -> Token {
        self.first
    }

    fn last_token(&self) -> Token {
        self.last
    }
}

/// The target of a reference node or `/delete-node/` statement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefTarget {
    /// A `&label` reference.
    Label(LabelRef),
    /// A `&{/path}` reference.
    Path(PathRef),
}

impl AstNode for RefTarget {
    fn first_token(&self) -> Token {
        match self {
            Self::Label(r) => r.first_token(),
            Self::Path(p) => p.first_token(),
        }
    }

    fn last_token(&self) -> Token {
        match self {
            Self::Label(r) => r.last_token(),
            Self::Path(p) => p.last_token(),
        }
    }
}

/// A `/delete-node/` statement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeleteNode {
    /// Labels attached to the statement.
    ///
    /// Labels are not allowed here; they are kept attached and flagged.
    pub labels: Vec<LabelAssign>,
    /// The deletion target.
    pub target: DeleteTarget,
    /// The first token.
    pub first: Token,
    /// The last token (the semicolon when present).
    pub last: Token,
}

impl AstNode for DeleteNode {
    fn first_token(&self) -> Token {
        self.first
    }

    fn last_token(&self) -> Token {
        self.last
    }
}

/// The target of a `/delete-node/` statement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeleteTarget {
    /// Deletion by child name.
    Name(NodeName),
    /// Deletion by label or path reference.
    Ref(RefTarget),
}

/// A `/delete-property/` statement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeleteProperty {
    /// Labels attached to the statement.
    ///
    /// Labels are not allowed here; they are kept attached and flagged.
    pub labels: Vec<LabelAssign>,
    /// The property name to delete.
    pub name: String,
    /// The first token.
    pub first: Token,
    /// The last token (the semicolon when present).
    pub last: Token,
}

impl AstNode for DeleteProperty {
    fn first_token(&self) -> Token {
        self.first
    }

    fn last_token(&self) -> Token {
        self.last
    }
}

/// A directive statement such as `/dts-v1/;`, `/memreserve/ ... ;`, or a
/// C-preprocessor line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectiveStatement {
    /// The directive token itself.
    pub directive: Token,
    /// Argument tokens up to the terminating semicolon.
    pub args: Vec<Token>,
    /// The last token (the semicolon when present).
    pub last: Token,
}

impl AstNode for DirectiveStatement {
    fn first_token(&self) -> Token {
        self.directive
    }

    fn last_token(&self) -> Token {
        self.last
    }
}

/// A top-level statement of one source file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TopLevel {
    /// A `/ { ... };` definition.
    Root(Arc<RootNode>),
    /// A child node at top level (invalid, kept for the context to flag).
    Child(Arc<ChildNode>),
    /// A `&label { ... };` definition.
    Ref(Arc<RefNode>),
    /// A `/delete-node/` statement.
    DeleteNode(Arc<DeleteNode>),
    /// A `/delete-property/` statement (invalid at top level).
    DeleteProperty(Arc<DeleteProperty>),
    /// A property at top level (invalid, kept for the context to flag).
    Property(Arc<Property>),
    /// A dtc directive or preprocessor line.
    Directive(Arc<DirectiveStatement>),
}

impl AstNode for TopLevel {
    fn first_token(&self) -> Token {
        match self {
            Self::Root(n) => n.first_token(),
            Self::Child(n) => n.first_token(),
            Self::Ref(n) => n.first_token(),
            Self::DeleteNode(d) => d.first_token(),
            Self::DeleteProperty(d) => d.first_token(),
            Self::Property(p) => p.first_token(),
            Self::Directive(d) => d.first_token(),
        }
    }

    fn last_token(&self) -> Token {
        match self {
            Self::Root(n) => n.last_token(),
            Self::Child(n) => n.last_token(),
            Self::Ref(n) => n.last_token(),
            Self::DeleteNode(d) => d.last_token(),
            Self::DeleteProperty(d) => d.last_token(),
            Self::Property(p) => p.last_token(),
            Self::Directive(d) => d.last_token(),
        }
    }
}

/// The root of one parsed source file.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Document {
    /// The top-level statements, in source order.
    pub statements: Vec<TopLevel>,
}

impl Document {
    /// Finds the innermost element whose span contains the given byte
    /// offset.
    pub fn element_at(&self, offset: usize) -> Option<Element> {
        for statement in &self.statements {
            if !statement.span().contains(offset) {
                continue;
            }

            return Some(match statement {
                TopLevel::Root(n) => {
                    element_in_entries(&n.entries, offset).unwrap_or(Element::Root(n.clone()))
                }
                TopLevel::Child(n) => {
                    element_in_entries(&n.entries, offset).unwrap_or(Element::Child(n.clone()))
                }
                TopLevel::Ref(n) => {
                    element_in_entries(&n.entries, offset).unwrap_or(Element::Ref(n.clone()))
                }
                TopLevel::DeleteNode(d) => Element::DeleteNode(d.clone()),
                TopLevel::DeleteProperty(d) => Element::DeleteProperty(d.clone()),
                TopLevel::Property(p) => Element::Property(p.clone()),
                TopLevel::Directive(d) => Element::Directive(d.clone()),
            });
        }

        None
    }
}

/// A reference to an element found by [`Document::element_at`].
#[derive(Debug, Clone)]
pub enum Element {
    /// A root node definition.
    Root(Arc<RootNode>),
    /// A child node definition.
    Child(Arc<ChildNode>),
    /// A reference node definition.
    Ref(Arc<RefNode>),
    /// A property definition.
    Property(Arc<Property>),
    /// A `/delete-node/` statement.
    DeleteNode(Arc<DeleteNode>),
    /// A `/delete-property/` statement.
    DeleteProperty(Arc<DeleteProperty>),
    /// A directive statement.
    Directive(Arc<DirectiveStatement>),
}

/// Recurses into a node body looking for the innermost element at the
/// given offset.
fn element_in_entries(entries: &[Entry], offset: usize) -> Option<Element> {
    for entry in entries {
        if !entry.span().contains(offset) {
            continue;
        }

        return Some(match entry {
            Entry::Child(n) => {
                element_in_entries(&n.entries, offset).unwrap_or(Element::Child(n.clone()))
            }
            Entry::Property(p) => Element::Property(p.clone()),
            Entry::DeleteNode(d) => Element::DeleteNode(d.clone()),
            Entry::DeleteProperty(d) => Element::DeleteProperty(d.clone()),
        });
    }

    None
}
