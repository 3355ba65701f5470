//! Module for all diagnostic creation functions.

use dts_grammar::ContextIssue;
use dts_grammar::Diagnostic;
use dts_grammar::Severity;
use dts_grammar::Span;
use dts_grammar::StandardTypeIssue;
use dts_grammar::Tag;

use crate::tree::NodePath;

/// Creates a "duplicate node name" diagnostic error.
pub fn duplicate_node_name(name: &str, duplicate: Span, first: Span) -> Diagnostic {
    Diagnostic::error(
        ContextIssue::DuplicateNodeName,
        format!("sibling node `{name}` is defined more than once in this block"),
    )
    .with_label(format!("`{name}` redefined here"), duplicate)
    .with_label("first defined here", first)
}

/// Creates a "duplicate property name" hint on a shadowed property
/// definition.
pub fn duplicate_property_name(name: &str, shadowed: Span, replacement: Span) -> Diagnostic {
    Diagnostic::hint(
        ContextIssue::DuplicatePropertyName,
        format!("property `{name}` is overridden by a later definition"),
    )
    .with_label("this definition has no effect", shadowed)
    .with_label("overridden by this definition", replacement)
    .with_tag(Tag::Unnecessary)
}

/// Creates a "node does not exist" diagnostic error for a deletion.
pub fn node_does_not_exist(name: &str, span: Span) -> Diagnostic {
    Diagnostic::error(
        ContextIssue::NodeDoesNotExist,
        format!("cannot delete node `{name}` because it does not exist"),
    )
    .with_highlight(span)
}

/// Creates a "property does not exist" diagnostic error for a deletion.
pub fn property_does_not_exist(name: &str, span: Span) -> Diagnostic {
    Diagnostic::error(
        ContextIssue::PropertyDoesNotExist,
        format!("cannot delete property `{name}` because it does not exist"),
    )
    .with_highlight(span)
}

/// Creates an "unresolved reference" diagnostic error.
pub fn unable_to_resolve(reference: &str, span: Span) -> Diagnostic {
    Diagnostic::error(
        ContextIssue::UnableToResolveChildNode,
        format!("reference `{reference}` does not resolve to a node"),
    )
    .with_highlight(span)
}

/// Creates a "label already in use" diagnostic error.
///
/// The primary label is the last-seen assignment; the earlier
/// conflicting assignments follow as linked labels.
pub fn label_already_in_use(
    name: &str,
    last: Span,
    owner: &NodePath,
    earlier: impl IntoIterator<Item = (NodePath, Span)>,
) -> Diagnostic {
    let mut diagnostic = Diagnostic::error(
        ContextIssue::LabelAlreadyInUse,
        format!("label `{name}` is already assigned to a different node"),
    )
    .with_label(format!("`{name}` assigned to `{owner}` here"), last);

    for (path, span) in earlier {
        diagnostic = diagnostic.with_label(format!("also assigned to `{path}` here"), span);
    }

    diagnostic
}

/// Creates a "required property missing" diagnostic error on a node.
pub fn missing_required(property: &str, node: &NodePath, span: Span) -> Diagnostic {
    Diagnostic::error(
        StandardTypeIssue::Required,
        format!("node `{node}` is missing the required property `{property}`"),
    )
    .with_highlight(span)
}

/// Creates a "property must be omitted" diagnostic error.
pub fn omitted_property(property: &str, span: Span) -> Diagnostic {
    Diagnostic::error(
        StandardTypeIssue::Omitted,
        format!("property `{property}` must be omitted here"),
    )
    .with_highlight(span)
}

/// Creates an "unexpected property type" diagnostic error.
///
/// The issue kind is the expectation that failed.
pub fn unexpected_type(
    issue: StandardTypeIssue,
    property: &str,
    expected: &str,
    span: Span,
) -> Diagnostic {
    Diagnostic::error(
        issue,
        format!("property `{property}` expects {expected}"),
    )
    .with_highlight(span)
}

/// Creates an "expected exactly one value" diagnostic error.
pub fn expected_one(property: &str, span: Span) -> Diagnostic {
    Diagnostic::error(
        StandardTypeIssue::ExpectedOne,
        format!("property `{property}` expects exactly one value"),
    )
    .with_highlight(span)
}

/// Creates a "composite value length mismatch" diagnostic error.
pub fn expected_composite_length(
    property: &str,
    expected: usize,
    actual: usize,
    span: Span,
) -> Diagnostic {
    Diagnostic::error(
        StandardTypeIssue::ExpectedCompositeLength,
        format!("property `{property}` expects {expected} values, but {actual} were given"),
    )
    .with_highlight(span)
}

/// Creates a "value not in the enumerated set" diagnostic error.
pub fn expected_enum(property: &str, value: &str, allowed: &[String], span: Span) -> Diagnostic {
    Diagnostic::error(
        StandardTypeIssue::ExpectedEnum,
        format!(
            "`{value}` is not a valid value for property `{property}` (expected one of {allowed})",
            allowed = allowed.join(", ")
        ),
    )
    .with_highlight(span)
}

/// Creates a "deprecated property" diagnostic warning.
pub fn deprecated_property(property: &str, span: Span) -> Diagnostic {
    Diagnostic::warning(
        StandardTypeIssue::DeprecatedProperty,
        format!("property `{property}` is deprecated"),
    )
    .with_highlight(span)
    .with_tag(Tag::Deprecated)
}

/// Creates an "ignored property" diagnostic warning.
pub fn ignored_property(property: &str, because: &str, span: Span) -> Diagnostic {
    Diagnostic::warning(
        StandardTypeIssue::Ignored,
        format!("property `{property}` is ignored because {because}"),
    )
    .with_highlight(span)
    .with_severity(Severity::Warning)
}

/// Creates a "related property missing" diagnostic error.
pub fn requires_other_property(
    property: &str,
    other: &str,
    node: &NodePath,
    span: Span,
) -> Diagnostic {
    Diagnostic::error(
        StandardTypeIssue::PropertyRequiresOtherPropertyInNode,
        format!("property `{property}` requires `{other}` on node `{node}`"),
    )
    .with_highlight(span)
}

/// Creates an "interrupt parent not found" diagnostic error.
pub fn interrupts_parent_not_found(span: Span) -> Diagnostic {
    Diagnostic::error(
        StandardTypeIssue::InterruptsParentNodeNotFound,
        "interrupt parent phandle does not resolve to a node",
    )
    .with_highlight(span)
}

/// Creates an "interrupt specifier cell count mismatch" diagnostic
/// error.
pub fn interrupts_cell_mismatch(expected: u32, actual: usize, span: Span) -> Diagnostic {
    Diagnostic::error(
        StandardTypeIssue::InterruptsValueCellMismatch,
        format!(
            "interrupt specifier has {actual} cells, but the interrupt parent expects {expected}"
        ),
    )
    .with_highlight(span)
}
