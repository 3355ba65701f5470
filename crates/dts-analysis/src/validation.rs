//! Validation of a merged tree against the binding catalogue.

use dts_grammar::StandardTypeIssue;
use dts_grammar::ast::CellValue;
use dts_grammar::ast::PropertyValue;
use tracing::debug;

use crate::Config;
use crate::FileDiagnostic;
use crate::diagnostics;
use crate::tree::DeviceTree;
use crate::tree::Node;
use crate::tree::NodePath;
use crate::tree::NodeProperty;
use crate::types::CheckContext;
use crate::types::PropertyBinding;
use crate::types::PropertyType;
use crate::types::RequirementLevel;
use crate::types::TypeCatalogue;
use crate::types::TypeSlot;

/// Validates every node of the tree against every registered binding.
///
/// The output is deterministic: nodes in tree order, bindings in
/// registration order.
pub(crate) fn validate(
    catalogue: &TypeCatalogue,
    tree: &DeviceTree,
    config: &Config,
) -> Vec<FileDiagnostic> {
    let mut nodes = Vec::new();
    tree.root.walk(&mut |node| nodes.push(node));
    debug!(nodes = nodes.len(), bindings = catalogue.bindings().len(), "validating tree");

    let mut diagnostics = Vec::new();
    for node in nodes {
        for binding in catalogue.bindings() {
            validate_binding(tree, node, binding, config, &mut diagnostics);
        }
    }

    diagnostics
}

/// Validates one binding against one node.
fn validate_binding(
    tree: &DeviceTree,
    node: &Node,
    binding: &PropertyBinding,
    config: &Config,
    diagnostics: &mut Vec<FileDiagnostic>,
) {
    let matched: Vec<&NodeProperty> = node
        .properties
        .values()
        .filter(|p| binding.name().matches(&p.name))
        .collect();

    let level = binding.requirement().eval(node);
    if matched.is_empty() {
        if level == RequirementLevel::Required {
            if let Some((uri, span)) = node.name_span() {
                diagnostics.push(FileDiagnostic {
                    uri,
                    diagnostic: diagnostics::missing_required(
                        &binding.name().to_string(),
                        &node.path,
                        span,
                    ),
                });
            }
        }

        return;
    }

    for property in matched {
        let uri = property.current.uri.clone();
        let span = property.current.span();
        if level == RequirementLevel::Omitted {
            diagnostics.push(FileDiagnostic {
                uri: uri.clone(),
                diagnostic: diagnostics::omitted_property(&property.name, span),
            });
            continue;
        }

        if binding.is_deprecated() && config.deprecated_warnings {
            diagnostics.push(FileDiagnostic {
                uri: uri.clone(),
                diagnostic: diagnostics::deprecated_property(&property.name, span),
            });
        }

        if !check_types(property, binding, diagnostics) {
            continue;
        }

        if let Some(allowed) = binding.values() {
            if let Some(value) = property.as_string() {
                if !allowed.iter().any(|a| a == value) {
                    diagnostics.push(FileDiagnostic {
                        uri: uri.clone(),
                        diagnostic: diagnostics::expected_enum(
                            &property.name,
                            value,
                            allowed,
                            span,
                        ),
                    });
                }
            }
        }

        if let Some(check) = binding.check() {
            let ctx = CheckContext {
                tree,
                node,
                property,
            };
            diagnostics.extend(check(&ctx));
        }
    }
}

/// Classifies one property value.
///
/// A one-cell array is a `u32`, a two-cell array a `u64`, anything
/// else a property-encoded array; a bare label or path reference is a
/// single phandle cell.
fn classify(value: &PropertyValue) -> PropertyType {
    match value {
        PropertyValue::String(_) => PropertyType::String,
        PropertyValue::Cells(cells) => match cells.cells.len() {
            1 => PropertyType::U32,
            2 => PropertyType::U64,
            _ => PropertyType::PropEncodedArray,
        },
        PropertyValue::Ref(_) | PropertyValue::NodePath(_) => PropertyType::U32,
        PropertyValue::Bytes(_) => PropertyType::ByteString,
    }
}

/// Computes the value profile of a property: one classification per
/// value.
fn profile(property: &NodeProperty) -> Vec<PropertyType> {
    property.values().iter().map(classify).collect()
}

/// Maps a slot to the issue kind and description reported when a value
/// does not fit it.
///
/// Slots accepting several types report their most demanding member
/// (`Empty` last), so `ranges = "x"` complains about cells rather than
/// about not being empty.
fn expectation(slot: &TypeSlot) -> (StandardTypeIssue, &'static str) {
    let preferred = slot
        .types()
        .iter()
        .find(|t| !matches!(t, PropertyType::Empty))
        .or_else(|| slot.types().first());
    match preferred {
        Some(PropertyType::Empty) => (StandardTypeIssue::ExpectedEmpty, "no value"),
        Some(PropertyType::U32) => (StandardTypeIssue::ExpectedU32, "a single 32-bit cell"),
        Some(PropertyType::U64) => (StandardTypeIssue::ExpectedU64, "a 64-bit value"),
        Some(PropertyType::String) => (StandardTypeIssue::ExpectedString, "a string"),
        Some(PropertyType::StringList) => {
            (StandardTypeIssue::ExpectedStringList, "a list of strings")
        }
        _ => (
            StandardTypeIssue::ExpectedPropEncodedArray,
            "a property-encoded array",
        ),
    }
}

/// Checks the value profile of a property against a binding's type
/// specification.
///
/// Returns whether the types check out; enum membership and additional
/// checks only run when they do.
fn check_types(
    property: &NodeProperty,
    binding: &PropertyBinding,
    diagnostics: &mut Vec<FileDiagnostic>,
) -> bool {
    let spec = binding.type_spec();
    if spec.is_empty() {
        return true;
    }

    let profile = profile(property);
    let uri = property.current.uri.clone();
    let span = property.current.span();
    let mut push = |diagnostic| {
        diagnostics.push(FileDiagnostic {
            uri: uri.clone(),
            diagnostic,
        })
    };

    if spec.len() > 1 && !binding.is_list() {
        // A composite type: the value list must match slot for slot.
        if profile.len() != spec.len() {
            push(diagnostics::expected_composite_length(
                &property.name,
                spec.len(),
                profile.len(),
                span,
            ));
            return false;
        }

        let mut ok = true;
        for (slot, actual) in spec.iter().zip(&profile) {
            if !slot.accepts(*actual) {
                let (issue, expected) = expectation(slot);
                push(diagnostics::unexpected_type(
                    issue,
                    &property.name,
                    expected,
                    span,
                ));
                ok = false;
            }
        }

        return ok;
    }

    let slot = &spec[0];
    if slot.is_string_list() {
        // String lists are uniform; the first value decides.
        let first = profile.first().copied().unwrap_or(PropertyType::Empty);
        if !slot.accepts(first) {
            let (issue, expected) = expectation(slot);
            push(diagnostics::unexpected_type(
                issue,
                &property.name,
                expected,
                span,
            ));
            return false;
        }

        return true;
    }

    if binding.is_list() {
        let mut ok = true;
        for actual in &profile {
            if !slot.accepts(*actual) {
                let (issue, expected) = expectation(slot);
                push(diagnostics::unexpected_type(
                    issue,
                    &property.name,
                    expected,
                    span,
                ));
                ok = false;
            }
        }

        return ok;
    }

    match profile.as_slice() {
        [] => {
            if !slot.accepts(PropertyType::Empty) {
                let (issue, expected) = expectation(slot);
                push(diagnostics::unexpected_type(
                    issue,
                    &property.name,
                    expected,
                    span,
                ));
                return false;
            }

            true
        }
        [single] => {
            if !slot.accepts(*single) {
                let (issue, expected) = expectation(slot);
                push(diagnostics::unexpected_type(
                    issue,
                    &property.name,
                    expected,
                    span,
                ));
                return false;
            }

            true
        }
        _ => {
            if slot.types() == [PropertyType::Empty] {
                let (issue, expected) = expectation(slot);
                push(diagnostics::unexpected_type(
                    issue,
                    &property.name,
                    expected,
                    span,
                ));
            } else {
                push(diagnostics::expected_one(&property.name, span));
            }

            false
        }
    }
}

/// The additional check of the `interrupts-extended` binding.
///
/// The property coexisting with `interrupts` or `interrupt-parent`
/// warns; the value sequence is then walked as `[&parent, cell...]`
/// tuples where each tuple's cell count comes from the resolved
/// parent's `#interrupt-cells`.
pub(crate) fn check_interrupts_extended(ctx: &CheckContext<'_>) -> Vec<FileDiagnostic> {
    let mut out = Vec::new();
    for other in ["interrupts", "interrupt-parent"] {
        if let Some(p) = ctx.node.property(other) {
            out.push(FileDiagnostic {
                uri: p.current.uri.clone(),
                diagnostic: diagnostics::ignored_property(
                    other,
                    "`interrupts-extended` takes precedence",
                    p.current.span(),
                ),
            });
        }
    }

    let uri = ctx.property.current.uri.clone();
    let cells: Vec<_> = ctx
        .property
        .values()
        .iter()
        .filter_map(|v| match v {
            PropertyValue::Cells(cells) => Some(&cells.cells),
            _ => None,
        })
        .flatten()
        .collect();

    let mut index = 0;
    while index < cells.len() {
        let parent_cell = cells[index];
        index += 1;

        let parent = match &parent_cell.value {
            CellValue::Ref(reference) => ctx.tree.node_by_label(&reference.value),
            CellValue::Path(path) => {
                ctx.tree.node_at(&NodePath::new(path.segments.clone()))
            }
            CellValue::Number(value) => u32::try_from(*value)
                .ok()
                .and_then(|v| ctx.tree.node_by_phandle(v)),
        };

        let span = parent_cell.first.span.cover(parent_cell.last.span);
        let Some(parent) = parent else {
            out.push(FileDiagnostic {
                uri: uri.clone(),
                diagnostic: diagnostics::interrupts_parent_not_found(span),
            });
            break;
        };

        let Some(count) = parent
            .property("#interrupt-cells")
            .and_then(NodeProperty::as_u32)
        else {
            out.push(FileDiagnostic {
                uri: uri.clone(),
                diagnostic: diagnostics::requires_other_property(
                    &ctx.property.name,
                    "#interrupt-cells",
                    &parent.path,
                    span,
                ),
            });
            break;
        };

        let available = cells.len() - index;
        if available < count as usize {
            out.push(FileDiagnostic {
                uri: uri.clone(),
                diagnostic: diagnostics::interrupts_cell_mismatch(
                    count,
                    available,
                    ctx.property.current.span(),
                ),
            });
            break;
        }

        index += count as usize;
    }

    out
}

#[cfg(test)]
mod test {
    use std::sync::Arc;

    use pretty_assertions::assert_eq;
    use url::Url;

    use super::*;
    use crate::context::ContextBuilder;
    use crate::context::FileAst;
    use dts_grammar::IssueKind;
    use dts_grammar::Severity;
    use dts_grammar::Tag;

    fn analyze(source: &str) -> Vec<FileDiagnostic> {
        let file = FileAst {
            uri: Arc::new(Url::parse("memory:///board.dts").expect("uri should parse")),
            parse: Arc::new(dts_grammar::parse(source)),
        };
        assert!(
            file.parse.diagnostics().is_empty(),
            "test sources must parse cleanly: {diagnostics:?}",
            diagnostics = file.parse.diagnostics()
        );

        let config = Config::default();
        let (tree, context_diagnostics) = ContextBuilder::build(&[file], &config);
        assert!(
            context_diagnostics.is_empty(),
            "unexpected context diagnostics: {context_diagnostics:?}"
        );
        TypeCatalogue::standard().validate(&tree, &config)
    }

    fn kinds(diagnostics: &[FileDiagnostic]) -> Vec<StandardTypeIssue> {
        diagnostics
            .iter()
            .map(|d| match d.diagnostic.kind() {
                IssueKind::StandardType(issue) => issue,
                other => panic!("expected a standard type issue, found {other:?}"),
            })
            .collect()
    }

    #[test]
    fn clean_tree_validates_quietly() {
        let diagnostics = analyze(
            "/ { compatible = \"acme,board\"; model = \"Acme Board\"; \
             soc { serial@1c00 { reg = <0x1c00 0x100>; status = \"okay\"; }; }; };",
        );
        assert_eq!(kinds(&diagnostics), vec![]);
    }

    #[test]
    fn status_outside_the_enumeration() {
        let diagnostics = analyze("/ { status = \"on\"; };");
        assert_eq!(kinds(&diagnostics), vec![StandardTypeIssue::ExpectedEnum]);
    }

    #[test]
    fn status_with_wrong_type() {
        let diagnostics = analyze("/ { status = <1>; };");
        assert_eq!(kinds(&diagnostics), vec![StandardTypeIssue::ExpectedString]);
    }

    #[test]
    fn expected_one_for_multiple_values() {
        let diagnostics = analyze("/ { model = \"a\", \"b\"; };");
        assert_eq!(kinds(&diagnostics), vec![StandardTypeIssue::ExpectedOne]);
    }

    #[test]
    fn cells_expected() {
        let diagnostics = analyze("/ { n@0 { reg = \"nope\"; }; };");
        assert_eq!(
            kinds(&diagnostics),
            vec![StandardTypeIssue::ExpectedPropEncodedArray]
        );
    }

    #[test]
    fn missing_required_reg_for_unit_address() {
        let diagnostics = analyze("/ { serial@1c00 { status = \"okay\"; }; };");
        assert_eq!(kinds(&diagnostics), vec![StandardTypeIssue::Required]);
    }

    #[test]
    fn empty_property_type() {
        let diagnostics = analyze("/ { dma-coherent; };");
        assert_eq!(kinds(&diagnostics), vec![]);

        let diagnostics = analyze("/ { dma-coherent = <1>; };");
        assert_eq!(kinds(&diagnostics), vec![StandardTypeIssue::ExpectedEmpty]);
    }

    #[test]
    fn deprecated_properties_warn() {
        let diagnostics = analyze("/ { device_type = \"memory\"; };");
        assert_eq!(
            kinds(&diagnostics),
            vec![StandardTypeIssue::DeprecatedProperty]
        );
        assert_eq!(diagnostics[0].diagnostic.severity(), Severity::Warning);
        assert_eq!(diagnostics[0].diagnostic.tags(), &[Tag::Deprecated]);
    }

    #[test]
    fn deprecated_warnings_can_be_disabled() {
        let file = FileAst {
            uri: Arc::new(Url::parse("memory:///board.dts").expect("uri should parse")),
            parse: Arc::new(dts_grammar::parse("/ { device_type = \"memory\"; };")),
        };
        let config = Config {
            deprecated_warnings: false,
            ..Config::default()
        };
        let (tree, _) = ContextBuilder::build(&[file], &config);
        let diagnostics = TypeCatalogue::standard().validate(&tree, &config);
        assert_eq!(kinds(&diagnostics), vec![]);
    }

    #[test]
    fn string_lists_accept_one_or_more_strings() {
        let diagnostics = analyze("/ { compatible = \"a,b\", \"c,d\"; };");
        assert_eq!(kinds(&diagnostics), vec![]);

        let diagnostics = analyze("/ { compatible = <1>; };");
        assert_eq!(
            kinds(&diagnostics),
            vec![StandardTypeIssue::ExpectedStringList]
        );
    }

    #[test]
    fn cells_patterns_validate() {
        let diagnostics = analyze("/ { clk { #clock-cells = \"no\"; }; };");
        assert_eq!(kinds(&diagnostics), vec![StandardTypeIssue::ExpectedU32]);
    }

    #[test]
    fn interrupts_extended_resolves_parents() {
        let diagnostics = analyze(
            "/ { intc: interrupt-controller@0 { reg = <0 4>; interrupt-controller; #interrupt-cells = <2>; }; \
             eth@1 { reg = <1 4>; interrupts-extended = <&intc 0 4>; }; };",
        );
        assert_eq!(kinds(&diagnostics), vec![]);
    }

    #[test]
    fn interrupts_extended_flags_unresolved_parent() {
        let diagnostics =
            analyze("/ { eth@1 { reg = <1 4>; interrupts-extended = <&missing 0 4>; }; };");
        assert_eq!(
            kinds(&diagnostics),
            vec![StandardTypeIssue::InterruptsParentNodeNotFound]
        );
    }

    #[test]
    fn interrupts_extended_requires_interrupt_cells() {
        let diagnostics = analyze(
            "/ { intc: interrupt-controller@0 { reg = <0 4>; interrupt-controller; }; \
             eth@1 { reg = <1 4>; interrupts-extended = <&intc 0>; }; };",
        );
        assert_eq!(
            kinds(&diagnostics),
            vec![StandardTypeIssue::PropertyRequiresOtherPropertyInNode]
        );
    }

    #[test]
    fn interrupts_extended_flags_truncated_tuples() {
        let diagnostics = analyze(
            "/ { intc: interrupt-controller@0 { reg = <0 4>; interrupt-controller; #interrupt-cells = <2>; }; \
             eth@1 { reg = <1 4>; interrupts-extended = <&intc 0>; }; };",
        );
        assert_eq!(
            kinds(&diagnostics),
            vec![StandardTypeIssue::InterruptsValueCellMismatch]
        );
    }

    #[test]
    fn interrupts_extended_warns_on_coexistence() {
        let diagnostics = analyze(
            "/ { intc: interrupt-controller@0 { reg = <0 4>; interrupt-controller; #interrupt-cells = <1>; }; \
             eth@1 { reg = <1 4>; interrupts = <4>; interrupts-extended = <&intc 4>; }; };",
        );
        assert_eq!(kinds(&diagnostics), vec![StandardTypeIssue::Ignored]);
        assert_eq!(diagnostics[0].diagnostic.severity(), Severity::Warning);
    }

    #[test]
    fn interrupts_extended_resolves_numeric_phandles() {
        let diagnostics = analyze(
            "/ { intc: interrupt-controller@0 { reg = <0 4>; phandle = <1>; interrupt-controller; #interrupt-cells = <1>; }; \
             eth@1 { reg = <1 4>; interrupts-extended = <1 4>; }; };",
        );
        assert_eq!(kinds(&diagnostics), vec![]);
    }

    #[test]
    fn validation_is_deterministic() {
        let source = "/ { status = \"on\"; device_type = \"x\"; n@0 { reg = \"bad\"; }; };";
        let first = kinds(&analyze(source));
        let second = kinds(&analyze(source));
        assert_eq!(first, second);
    }
}
