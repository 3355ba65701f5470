//! Definition of diagnostics displayed to users.

use std::cmp::Ordering;
use std::fmt;

/// Represents a span of source in bytes.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Span {
    /// The start of the span.
    start: usize,
    /// The end of the span.
    end: usize,
}

impl Span {
    /// Creates a new span from the given start and length.
    pub const fn new(start: usize, len: usize) -> Self {
        Self {
            start,
            end: start + len,
        }
    }

    /// Gets the start of the span.
    pub fn start(&self) -> usize {
        self.start
    }

    /// Gets the noninclusive end of the span.
    pub fn end(&self) -> usize {
        self.end
    }

    /// Gets the length of the span.
    pub fn len(&self) -> usize {
        self.end - self.start
    }

    /// Determines if the span is empty.
    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }

    /// Determines if the span contains the given offset.
    pub fn contains(&self, offset: usize) -> bool {
        offset >= self.start && offset < self.end
    }

    /// Calculates an intersection of two spans, if one exists.
    ///
    /// If spans are adjacent, a zero-length span is returned.
    ///
    /// Returns `None` if the two spans are disjoint.
    #[inline]
    pub fn intersect(self, other: Self) -> Option<Self> {
        let start = self.start.max(other.start);
        let end = self.end.min(other.end);
        if end < start {
            return None;
        }

        Some(Self { start, end })
    }

    /// Creates the smallest span enclosing both spans.
    pub fn cover(self, other: Self) -> Self {
        Self {
            start: self.start.min(other.start),
            end: self.end.max(other.end),
        }
    }
}

impl fmt::Display for Span {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{start}..{end}", start = self.start, end = self.end)
    }
}

impl From<logos::Span> for Span {
    fn from(value: logos::Span) -> Self {
        Self::new(value.start, value.len())
    }
}

/// A position within a source file, measured in characters.
///
/// `line` and `col` are zero-based; `len` is the token length in source
/// characters, not bytes. A tab advances the column by one.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Position {
    /// The zero-based line.
    pub line: u32,
    /// The zero-based column, in characters.
    pub col: u32,
    /// The length in characters.
    pub len: u32,
}

impl Position {
    /// Creates a new position.
    pub const fn new(line: u32, col: u32, len: u32) -> Self {
        Self { line, col, len }
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{line}:{col}+{len}",
            line = self.line,
            col = self.col,
            len = self.len
        )
    }
}

/// Represents the severity of a diagnostic.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Ord, PartialOrd, serde::Deserialize, serde::Serialize,
)]
pub enum Severity {
    /// The diagnostic is displayed as an error.
    Error,
    /// The diagnostic is displayed as a warning.
    Warning,
    /// The diagnostic is displayed as informational.
    Information,
    /// The diagnostic is displayed as a hint.
    Hint,
}

impl Severity {
    /// Returns `true` if the severity is [`Error`].
    ///
    /// [`Error`]: Severity::Error
    #[must_use]
    pub fn is_error(&self) -> bool {
        matches!(self, Self::Error)
    }
}

/// Extra presentation tags attached to a diagnostic.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Ord, PartialOrd, serde::Deserialize, serde::Serialize,
)]
pub enum Tag {
    /// The flagged source is unnecessary (shadowed, unused).
    Unnecessary,
    /// The flagged source uses a deprecated construct.
    Deprecated,
}

/// A syntax-level issue reported by the parser.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Ord, PartialOrd)]
pub enum SyntaxIssue {
    /// A statement is missing its terminating `;`.
    EndStatement,
    /// A `@` in a node name is not followed by a unit address.
    NodeAddress,
    /// Whitespace separates a node name, `@`, and unit address.
    NodeNameAddressWhitespace,
    /// An opened `{` has no matching `}`.
    MissingBrace,
    /// A token that does not start any production.
    UnexpectedToken,
    /// A string literal left open at end of line.
    UnterminatedString,
    /// A property `=` is not followed by a value.
    ExpectedValue,
    /// A label is attached to a statement that cannot carry one.
    LabelNotAllowed,
    /// An integer expression divides by zero.
    DivisionByZero,
}

/// A cross-file issue reported while merging the runtime tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Ord, PartialOrd)]
pub enum ContextIssue {
    /// Two sibling node definitions share a name within one block.
    DuplicateNodeName,
    /// A property is defined more than once on the same node.
    DuplicatePropertyName,
    /// A `/delete-node/` target does not exist.
    NodeDoesNotExist,
    /// A `/delete-property/` target does not exist.
    PropertyDoesNotExist,
    /// A `&label` reference does not resolve to a node.
    UnableToResolveChildNode,
    /// The same label is assigned to distinct nodes.
    LabelAlreadyInUse,
}

/// A standard-binding issue reported by the property validator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Ord, PartialOrd)]
pub enum StandardTypeIssue {
    /// A required property is absent.
    Required,
    /// A property that must be omitted is present.
    Omitted,
    /// Expected a property with no value.
    ExpectedEmpty,
    /// Expected a string value.
    ExpectedString,
    /// Expected a string list.
    ExpectedStringList,
    /// Expected a single 32-bit cell.
    ExpectedU32,
    /// Expected a 64-bit value (two cells).
    ExpectedU64,
    /// Expected a property-encoded array.
    ExpectedPropEncodedArray,
    /// Expected exactly one value.
    ExpectedOne,
    /// A composite type spec and the value list differ in length.
    ExpectedCompositeLength,
    /// A string value is not one of the enumerated values.
    ExpectedEnum,
    /// The property is ignored in this context.
    Ignored,
    /// The property requires another property on a related node.
    PropertyRequiresOtherPropertyInNode,
    /// An interrupt parent phandle did not resolve.
    InterruptsParentNodeNotFound,
    /// An interrupt specifier has the wrong number of cells.
    InterruptsValueCellMismatch,
    /// The property is deprecated.
    DeprecatedProperty,
}

/// The kind of an issue carried by a [`Diagnostic`].
///
/// Kinds are partitioned by the pipeline stage that reports them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Ord, PartialOrd)]
pub enum IssueKind {
    /// Reported by the parser.
    Syntax(SyntaxIssue),
    /// Reported by the context builder.
    Context(ContextIssue),
    /// Reported by the property validator.
    StandardType(StandardTypeIssue),
}

impl From<SyntaxIssue> for IssueKind {
    fn from(value: SyntaxIssue) -> Self {
        Self::Syntax(value)
    }
}

impl From<ContextIssue> for IssueKind {
    fn from(value: ContextIssue) -> Self {
        Self::Context(value)
    }
}

impl From<StandardTypeIssue> for IssueKind {
    fn from(value: StandardTypeIssue) -> Self {
        Self::StandardType(value)
    }
}

/// Represents a diagnostic to display to the user.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct Diagnostic {
    /// The issue kinds carried by this diagnostic.
    kinds: Vec<IssueKind>,
    /// The severity of the diagnostic.
    severity: Severity,
    /// The diagnostic message.
    message: String,
    /// The labels for the diagnostic.
    ///
    /// The first label in the collection is considered the primary label;
    /// the rest are linked ranges.
    labels: Vec<Label>,
    /// Presentation tags.
    tags: Vec<Tag>,
}

impl Ord for Diagnostic {
    fn cmp(&self, other: &Self) -> Ordering {
        match self.labels.cmp(&other.labels) {
            Ordering::Equal => {}
            ord => return ord,
        }

        match self.kinds.cmp(&other.kinds) {
            Ordering::Equal => {}
            ord => return ord,
        }

        match self.severity.cmp(&other.severity) {
            Ordering::Equal => {}
            ord => return ord,
        }

        self.message.cmp(&other.message)
    }
}

impl PartialOrd for Diagnostic {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Diagnostic {
    /// Creates a new diagnostic error with the given kind and message.
    pub fn error(kind: impl Into<IssueKind>, message: impl Into<String>) -> Self {
        Self {
            kinds: vec![kind.into()],
            severity: Severity::Error,
            message: message.into(),
            labels: Default::default(),
            tags: Default::default(),
        }
    }

    /// Creates a new diagnostic warning with the given kind and message.
    pub fn warning(kind: impl Into<IssueKind>, message: impl Into<String>) -> Self {
        Self {
            kinds: vec![kind.into()],
            severity: Severity::Warning,
            message: message.into(),
            labels: Default::default(),
            tags: Default::default(),
        }
    }

    /// Creates a new diagnostic hint with the given kind and message.
    pub fn hint(kind: impl Into<IssueKind>, message: impl Into<String>) -> Self {
        Self {
            kinds: vec![kind.into()],
            severity: Severity::Hint,
            message: message.into(),
            labels: Default::default(),
            tags: Default::default(),
        }
    }

    /// Adds another issue kind to the diagnostic.
    pub fn with_kind(mut self, kind: impl Into<IssueKind>) -> Self {
        self.kinds.push(kind.into());
        self
    }

    /// Adds a highlight to the diagnostic.
    ///
    /// This is equivalent to adding a label with an empty message.
    pub fn with_highlight(mut self, span: impl Into<Span>) -> Self {
        self.labels.push(Label::new(String::new(), span.into()));
        self
    }

    /// Adds a label to the diagnostic.
    ///
    /// The first label added is considered the primary label.
    pub fn with_label(mut self, message: impl Into<String>, span: impl Into<Span>) -> Self {
        self.labels.push(Label::new(message, span.into()));
        self
    }

    /// Adds a label annotated with the character-precise position of
    /// the labeled token.
    pub fn with_positioned_label(
        mut self,
        message: impl Into<String>,
        span: impl Into<Span>,
        position: Position,
    ) -> Self {
        self.labels
            .push(Label::new(message, span.into()).with_position(position));
        self
    }

    /// Sets the severity of the diagnostic.
    pub fn with_severity(mut self, severity: Severity) -> Self {
        self.severity = severity;
        self
    }

    /// Adds a presentation tag to the diagnostic.
    pub fn with_tag(mut self, tag: Tag) -> Self {
        self.tags.push(tag);
        self
    }

    /// Gets the issue kinds carried by the diagnostic.
    pub fn kinds(&self) -> &[IssueKind] {
        &self.kinds
    }

    /// Gets the primary issue kind of the diagnostic.
    pub fn kind(&self) -> IssueKind {
        self.kinds[0]
    }

    /// Gets the severity level of the diagnostic.
    pub fn severity(&self) -> Severity {
        self.severity
    }

    /// Gets the message of the diagnostic.
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Gets the labels of the diagnostic.
    ///
    /// The first label is the primary one.
    pub fn labels(&self) -> impl Iterator<Item = &Label> {
        self.labels.iter()
    }

    /// Gets the primary span of the diagnostic, if it has labels.
    pub fn span(&self) -> Option<Span> {
        self.labels.first().map(|l| l.span)
    }

    /// Gets the presentation tags of the diagnostic.
    pub fn tags(&self) -> &[Tag] {
        &self.tags
    }

    /// Converts this diagnostic to a `codespan` [Diagnostic].
    ///
    /// The provided file identifier is used for the diagnostic.
    ///
    /// [Diagnostic]: codespan_reporting::diagnostic::Diagnostic
    pub fn to_codespan<FileId: Copy>(
        &self,
        file_id: FileId,
    ) -> codespan_reporting::diagnostic::Diagnostic<FileId> {
        use codespan_reporting::diagnostic as codespan;

        let mut diagnostic: codespan::Diagnostic<FileId> = match self.severity {
            Severity::Error => codespan::Diagnostic::error(),
            Severity::Warning => codespan::Diagnostic::warning(),
            Severity::Information | Severity::Hint => codespan::Diagnostic::note(),
        };

        diagnostic.code = Some(format!("{kind:?}", kind = self.kind()));
        diagnostic.message.clone_from(&self.message);

        if self.labels.is_empty() {
            // Codespan will treat this as a label at the end of the file.
            // We add this so that every diagnostic has at least one label with
            // the file printed.
            diagnostic.labels.push(codespan::Label::new(
                codespan::LabelStyle::Primary,
                file_id,
                usize::MAX - 1..usize::MAX,
            ))
        } else {
            for (i, label) in self.labels.iter().enumerate() {
                diagnostic.labels.push(
                    codespan::Label::new(
                        if i == 0 {
                            codespan::LabelStyle::Primary
                        } else {
                            codespan::LabelStyle::Secondary
                        },
                        file_id,
                        label.span.start..label.span.end,
                    )
                    .with_message(&label.message),
                );
            }
        }

        diagnostic
    }
}

/// Represents a label that annotates the source code.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct Label {
    /// The optional message of the label (may be empty).
    message: String,
    /// The span of the label.
    span: Span,
    /// The character-precise position of the labeled token, if known.
    position: Option<Position>,
}

impl Ord for Label {
    fn cmp(&self, other: &Self) -> Ordering {
        match self.span.cmp(&other.span) {
            Ordering::Equal => {}
            ord => return ord,
        }

        self.message.cmp(&other.message)
    }
}

impl PartialOrd for Label {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Label {
    /// Creates a new label with the given message and span.
    pub fn new(message: impl Into<String>, span: impl Into<Span>) -> Self {
        Self {
            message: message.into(),
            span: span.into(),
            position: None,
        }
    }

    /// Attaches a character-precise position to the label.
    pub fn with_position(mut self, position: Position) -> Self {
        self.position = Some(position);
        self
    }

    /// Gets the message of the label.
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Gets the span of the label.
    pub fn span(&self) -> Span {
        self.span
    }

    /// Gets the character-precise position of the label, if known.
    pub fn position(&self) -> Option<Position> {
        self.position
    }
}
