//! Module for the DTS grammar functions.

use std::sync::Arc;

use crate::ast::AstNode;
use crate::ast::ByteString;
use crate::ast::Cell;
use crate::ast::CellArray;
use crate::ast::CellValue;
use crate::ast::ChildNode;
use crate::ast::DeleteNode;
use crate::ast::DeleteProperty;
use crate::ast::DeleteTarget;
use crate::ast::DirectiveStatement;
use crate::ast::Document;
use crate::ast::Entry;
use crate::ast::LabelAssign;
use crate::ast::LabelRef;
use crate::ast::NodeName;
use crate::ast::PathRef;
use crate::ast::Property;
use crate::ast::PropertyValue;
use crate::ast::RefNode;
use crate::ast::RefTarget;
use crate::ast::RootNode;
use crate::ast::StringValue;
use crate::ast::TopLevel;
use crate::lexer::Token;
use crate::lexer::TokenKind;
use crate::lexer::TokenSet;
use crate::parser::NameRun;
use crate::parser::Parser;
use crate::parser::division_by_zero;
use crate::parser::end_statement;
use crate::parser::expected_found;
use crate::parser::expected_value;
use crate::parser::label_not_allowed;
use crate::parser::missing_brace;
use crate::parser::node_address;
use crate::parser::node_name_whitespace;
use crate::parser::unterminated_string;

/// The recovery set at the top level of a document.
const TOP_RECOVERY_SET: TokenSet = TokenSet::new(&[
    TokenKind::Slash as u8,
    TokenKind::Ampersand as u8,
    TokenKind::Directive as u8,
    TokenKind::Identifier as u8,
    TokenKind::Semicolon as u8,
]);

/// The recovery set inside a node body.
const ENTRY_RECOVERY_SET: TokenSet = TokenSet::new(&[
    TokenKind::Identifier as u8,
    TokenKind::Number as u8,
    TokenKind::Directive as u8,
    TokenKind::Semicolon as u8,
    TokenKind::RBrace as u8,
]);

/// The synchronization set at the end of a statement.
const STATEMENT_SYNC_SET: TokenSet = TokenSet::new(&[
    TokenKind::Semicolon as u8,
    TokenKind::RBrace as u8,
]);

/// The synchronization set inside a cell array.
const CELLS_SYNC_SET: TokenSet = TokenSet::new(&[
    TokenKind::RParen as u8,
    TokenKind::RAngle as u8,
    TokenKind::Semicolon as u8,
    TokenKind::RBrace as u8,
]);

/// The result of parsing a statement that starts with a name.
enum ChildOrProperty {
    /// The statement turned out to be a child node.
    Child(Arc<ChildNode>),
    /// The statement turned out to be a property.
    Property(Arc<Property>),
}

/// Parses the top-level statements of a DTS document.
///
/// The parser never aborts: any byte sequence yields a document plus a
/// finite list of diagnostics.
pub fn document(p: &mut Parser<'_>) -> Document {
    let mut statements = Vec::new();
    loop {
        let labels = label_assigns(p);
        let t = p.peek();
        match t.kind {
            TokenKind::Eof => {
                if let Some(label) = labels.first() {
                    p.diagnostic(
                        expected_found("a statement after the label", t).with_label(
                            "this label has no statement",
                            label.first.span.cover(label.colon.span),
                        ),
                    );
                }
                break;
            }
            TokenKind::Slash => statements.push(TopLevel::Root(root_node(p, labels))),
            TokenKind::Ampersand => statements.push(TopLevel::Ref(ref_node(p, labels))),
            TokenKind::Directive => match p.text(t) {
                "/delete-node/" => {
                    statements.push(TopLevel::DeleteNode(delete_node(p, labels)));
                }
                "/delete-property/" => {
                    statements.push(TopLevel::DeleteProperty(delete_property(p, labels)));
                }
                _ => statements.push(TopLevel::Directive(directive_statement(p, labels))),
            },
            TokenKind::Identifier | TokenKind::Number => match child_or_property(p, labels) {
                ChildOrProperty::Child(node) => statements.push(TopLevel::Child(node)),
                ChildOrProperty::Property(property) => {
                    statements.push(TopLevel::Property(property));
                }
            },
            _ => {
                let token = p.next();
                p.recover(
                    expected_found("a top-level statement", token),
                    TOP_RECOVERY_SET,
                );
            }
        }
    }

    Document { statements }
}

/// Parses zero or more label assignments (`name:`).
fn label_assigns(p: &mut Parser<'_>) -> Vec<LabelAssign> {
    let mut labels = Vec::new();
    while let Some(run) = p.name_run() {
        if run.first.kind != TokenKind::Identifier {
            break;
        }

        let colon = p.raw(run.end);
        if colon.kind != TokenKind::Colon || !run.last.adjacent_to(colon) {
            break;
        }

        p.consume_to(run.end + 1);
        labels.push(LabelAssign {
            name: run.text,
            first: run.first,
            colon,
        });
    }

    labels
}

/// Gets the first token of a statement given its labels and the first
/// token of the statement proper.
fn statement_first(labels: &[LabelAssign], fallback: Token) -> Token {
    labels.first().map(|l| l.first).unwrap_or(fallback)
}

/// Expects the terminating `;` of a statement.
///
/// When missing, records an end-statement issue labeled on the last
/// token of the statement and returns that token.
fn statement_end(p: &mut Parser<'_>, last: Token) -> Token {
    match p.next_if(TokenKind::Semicolon) {
        Some(semi) => semi,
        None => {
            p.diagnostic(end_statement(last));
            last
        }
    }
}

/// Parses a `/ { ... };` definition.
fn root_node(p: &mut Parser<'_>, labels: Vec<LabelAssign>) -> Arc<RootNode> {
    let slash = p.next();
    let first = statement_first(&labels, slash);
    let (entries, body_last) = node_body(p, slash);
    let last = statement_end(p, body_last);
    Arc::new(RootNode {
        labels,
        entries,
        first,
        last,
    })
}

/// Parses a `&label { ... };` definition.
fn ref_node(p: &mut Parser<'_>, labels: Vec<LabelAssign>) -> Arc<RefNode> {
    let reference = ref_target(p);
    let first = statement_first(&labels, reference.first_token());
    let (entries, body_last) = node_body(p, reference.last_token());
    let last = statement_end(p, body_last);
    Arc::new(RefNode {
        labels,
        reference,
        entries,
        first,
        last,
    })
}

/// Parses a statement that starts with a name: a child node when the
/// name is followed by `@` or `{`, a property otherwise.
fn child_or_property(p: &mut Parser<'_>, labels: Vec<LabelAssign>) -> ChildOrProperty {
    let run = p.name_run().expect("caller checked for a name");
    p.consume_run(&run);
    match p.peek().kind {
        TokenKind::At | TokenKind::LBrace => {
            ChildOrProperty::Child(child_node_rest(p, labels, run))
        }
        _ => ChildOrProperty::Property(property_rest(p, labels, run)),
    }
}

/// Parses the remainder of a child node after its name run.
fn child_node_rest(
    p: &mut Parser<'_>,
    labels: Vec<LabelAssign>,
    run: NameRun,
) -> Arc<ChildNode> {
    let name = node_name_rest(p, run);
    let first = statement_first(&labels, name.first);
    let (entries, body_last) = node_body(p, name.last);
    let last = statement_end(p, body_last);
    Arc::new(ChildNode {
        labels,
        name,
        entries,
        first,
        last,
    })
}

/// Parses the optional `@address` part of a node name.
///
/// Policies:
/// - `name@` with no address records a node-address issue labeled on
///   the final token of the name.
/// - whitespace between the name, `@`, and address records a
///   whitespace issue spanning from the `@` through the address; the
///   address still parses and attaches.
fn node_name_rest(p: &mut Parser<'_>, run: NameRun) -> NodeName {
    let mut name = NodeName {
        name: run.text.clone(),
        address: None,
        first: run.first,
        last: run.last,
    };

    if !p.at(TokenKind::At) {
        return name;
    }

    let at = p.next();
    name.last = at;
    match p.name_run() {
        Some(address) => {
            let spaced = !run.last.adjacent_to(at) || !at.adjacent_to(address.first);
            p.consume_run(&address);
            if spaced {
                p.diagnostic(node_name_whitespace(at, address.last));
            }

            let digits = address
                .text
                .strip_prefix("0x")
                .or_else(|| address.text.strip_prefix("0X"))
                .unwrap_or(&address.text);
            match u64::from_str_radix(digits, 16) {
                Ok(value) => name.address = Some(value),
                Err(_) => p.diagnostic(
                    expected_found("a hexadecimal unit address", address.first).with_highlight(
                        address.first.span.cover(address.last.span),
                    ),
                ),
            }

            name.last = address.last;
        }
        None => {
            p.diagnostic(node_address(run.last));
        }
    }

    name
}

/// Parses a `{ ... }` node body.
///
/// Returns the entries and the last token of the body: the closing
/// brace when present, otherwise a recovery point. An unclosed body at
/// the end of input records a missing-brace issue on the opening brace
/// and closes the construct at the end-of-file token.
fn node_body(p: &mut Parser<'_>, fallback: Token) -> (Vec<Entry>, Token) {
    let open = match p.expect(TokenKind::LBrace) {
        Ok(token) => token,
        Err(e) => {
            p.recover(e, STATEMENT_SYNC_SET);
            return (Vec::new(), fallback);
        }
    };

    let mut entries = Vec::new();
    loop {
        let labels = label_assigns(p);
        let t = p.peek();
        match t.kind {
            TokenKind::RBrace => {
                if let Some(label) = labels.first() {
                    p.diagnostic(
                        expected_found("a statement after the label", t).with_label(
                            "this label has no statement",
                            label.first.span.cover(label.colon.span),
                        ),
                    );
                }
                let close = p.next();
                return (entries, close);
            }
            TokenKind::Eof => {
                p.diagnostic(missing_brace(open, t));
                return (entries, p.eof());
            }
            TokenKind::Directive => match p.text(t) {
                "/delete-node/" => entries.push(Entry::DeleteNode(delete_node(p, labels))),
                "/delete-property/" => {
                    entries.push(Entry::DeleteProperty(delete_property(p, labels)));
                }
                _ => {
                    let token = p.next();
                    p.recover(
                        expected_found("a node or property", token),
                        ENTRY_RECOVERY_SET,
                    );
                }
            },
            TokenKind::Identifier | TokenKind::Number => match child_or_property(p, labels) {
                ChildOrProperty::Child(node) => entries.push(Entry::Child(node)),
                ChildOrProperty::Property(property) => entries.push(Entry::Property(property)),
            },
            _ => {
                let token = p.next();
                p.recover(
                    expected_found("a node or property", token),
                    ENTRY_RECOVERY_SET,
                );
            }
        }
    }
}

/// Parses the remainder of a property after its name run.
fn property_rest(
    p: &mut Parser<'_>,
    labels: Vec<LabelAssign>,
    run: NameRun,
) -> Arc<Property> {
    let first = statement_first(&labels, run.first);
    let mut last_value = run.last;
    let mut values = Vec::new();
    if let Some(eq) = p.next_if(TokenKind::Equals) {
        last_value = eq;
        let (parsed, last) = property_values(p);
        values = parsed;
        if let Some(last) = last {
            last_value = last;
        }
    }

    let last = statement_end(p, last_value);
    Arc::new(Property {
        labels,
        name: run.text,
        values,
        first,
        last,
    })
}

/// Parses a comma-separated list of property values.
fn property_values(p: &mut Parser<'_>) -> (Vec<PropertyValue>, Option<Token>) {
    let mut values = Vec::new();
    loop {
        let t = p.peek();
        let value = match t.kind {
            TokenKind::String | TokenKind::UnterminatedString => {
                PropertyValue::String(string_value(p))
            }
            TokenKind::LAngle => PropertyValue::Cells(cell_array(p)),
            TokenKind::LBracket => PropertyValue::Bytes(byte_string(p)),
            TokenKind::Ampersand => match ref_target(p) {
                RefTarget::Label(label) => PropertyValue::Ref(label),
                RefTarget::Path(path) => PropertyValue::NodePath(path),
            },
            _ => {
                p.recover(expected_value(t), STATEMENT_SYNC_SET);
                break;
            }
        };

        values.push(value);
        if p.next_if(TokenKind::Comma).is_none() {
            break;
        }
    }

    let last = values.last().map(|v| v.last_token());
    (values, last)
}

/// Parses a string value, unescaping its contents.
fn string_value(p: &mut Parser<'_>) -> StringValue {
    let token = p.next();
    let unterminated = token.kind == TokenKind::UnterminatedString;
    if unterminated {
        p.diagnostic(unterminated_string(token));
    }

    let raw = p.text(token);
    let inner = if unterminated {
        &raw[1..]
    } else {
        &raw[1..raw.len() - 1]
    };

    StringValue {
        value: unescape(inner),
        unterminated,
        token,
    }
}

/// Unescapes the C-style escape sequences of a string literal.
fn unescape(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars().peekable();
    while let Some(ch) = chars.next() {
        if ch != '\\' {
            out.push(ch);
            continue;
        }

        match chars.next() {
            Some('n') => out.push('\n'),
            Some('r') => out.push('\r'),
            Some('t') => out.push('\t'),
            Some('\\') => out.push('\\'),
            Some('"') => out.push('"'),
            Some('\'') => out.push('\''),
            Some('x') => {
                let mut value = 0u32;
                let mut digits = 0;
                while digits < 2 {
                    match chars.peek().and_then(|c| c.to_digit(16)) {
                        Some(d) => {
                            value = value * 16 + d;
                            chars.next();
                            digits += 1;
                        }
                        None => break,
                    }
                }
                if digits > 0 {
                    out.push(char::from_u32(value).unwrap_or('\u{FFFD}'));
                } else {
                    out.push('x');
                }
            }
            Some(c @ '0'..='7') => {
                let mut value = c.to_digit(8).expect("octal digit");
                let mut digits = 1;
                while digits < 3 {
                    match chars.peek().and_then(|c| c.to_digit(8)) {
                        Some(d) => {
                            value = value * 8 + d;
                            chars.next();
                            digits += 1;
                        }
                        None => break,
                    }
                }
                out.push(char::from_u32(value).unwrap_or('\u{FFFD}'));
            }
            Some(other) => out.push(other),
            None => break,
        }
    }

    out
}

/// Parses a `<...>` cell array.
fn cell_array(p: &mut Parser<'_>) -> CellArray {
    let open = p.next();
    let mut cells = Vec::new();
    let close;
    loop {
        let t = p.peek();
        match t.kind {
            TokenKind::RAngle => {
                close = p.next();
                break;
            }
            TokenKind::Semicolon | TokenKind::RBrace | TokenKind::Eof => {
                p.diagnostic(
                    expected_found("`>`", t).with_label("this `<` is not matched", open.span),
                );
                close = t;
                break;
            }
            TokenKind::Number | TokenKind::Identifier => {
                let run = p.name_run().expect("peek starts a name");
                p.consume_run(&run);
                let value = cell_number_value(p, &run);
                cells.push(Cell {
                    value: CellValue::Number(value),
                    first: run.first,
                    last: run.last,
                });
            }
            TokenKind::Ampersand => {
                let target = ref_target(p);
                let (first, last) = (target.first_token(), target.last_token());
                let value = match target {
                    RefTarget::Label(label) => CellValue::Ref(label),
                    RefTarget::Path(path) => CellValue::Path(path),
                };
                cells.push(Cell { value, first, last });
            }
            TokenKind::LParen => {
                let (value, first, last) = paren_expr(p);
                cells.push(Cell {
                    value: CellValue::Number(value),
                    first,
                    last,
                });
            }
            _ => {
                let token = p.next();
                p.diagnostic(expected_found("a cell value", token));
            }
        }
    }

    CellArray { cells, open, close }
}

/// Evaluates the numeric value of a name run inside a cell array.
///
/// A single number token is parsed by radix; anything else is looked
/// up in the preprocessor macro values supplied to the parser.
fn cell_number_value(p: &mut Parser<'_>, run: &NameRun) -> u64 {
    if run.first.kind == TokenKind::Number && run.first == run.last {
        match parse_int(&run.text) {
            Some(value) => return value,
            None => {
                p.diagnostic(expected_found("an integer literal", run.first));
                return 0;
            }
        }
    }

    match p.macro_value(&run.text) {
        Some(value) => value,
        None => {
            p.diagnostic(
                expected_found("an integer literal", run.first).with_label(
                    format!("`{name}` is not a known macro", name = run.text),
                    run.first.span.cover(run.last.span),
                ),
            );
            0
        }
    }
}

/// Parses an integer literal: `0x` hexadecimal, leading-zero octal, or
/// decimal.
fn parse_int(text: &str) -> Option<u64> {
    if let Some(hex) = text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
        u64::from_str_radix(hex, 16).ok()
    } else if text.len() > 1 && text.starts_with('0') {
        u64::from_str_radix(&text[1..], 8).ok()
    } else {
        text.parse().ok()
    }
}

/// Parses a parenthesized integer expression, returning its value and
/// the open/close tokens.
fn paren_expr(p: &mut Parser<'_>) -> (u64, Token, Token) {
    let open = p.next();
    let value = expr_bp(p, 0);
    let close = match p.expect(TokenKind::RParen) {
        Ok(token) => token,
        Err(e) => {
            p.recover(e, CELLS_SYNC_SET);
            p.next_if(TokenKind::RParen).unwrap_or_else(|| p.peek())
        }
    };

    (value, open, close)
}

/// A binary operator inside an integer expression.
struct BinOp {
    /// The operator.
    kind: BinOpKind,
    /// The binding power of the operator.
    bp: u8,
    /// Whether the operator is spelled with two adjacent tokens.
    double: bool,
    /// The first token of the operator.
    token: Token,
}

/// The binary operators of integer expressions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BinOpKind {
    Or,
    And,
    BitOr,
    BitXor,
    BitAnd,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    Shl,
    Shr,
    Add,
    Sub,
    Mul,
    Div,
    Rem,
}

/// Recognizes the binary operator at the parser position, if any.
fn peek_operator(p: &Parser<'_>) -> Option<BinOp> {
    let first = p.peek();
    let second = p.peek_following();
    let pair = |kind| second.kind == kind && first.adjacent_to(second);
    let op = |kind, bp, double| {
        Some(BinOp {
            kind,
            bp,
            double,
            token: first,
        })
    };

    match first.kind {
        TokenKind::Pipe if pair(TokenKind::Pipe) => op(BinOpKind::Or, 2, true),
        TokenKind::Pipe => op(BinOpKind::BitOr, 4, false),
        TokenKind::Ampersand if pair(TokenKind::Ampersand) => op(BinOpKind::And, 3, true),
        TokenKind::Ampersand => op(BinOpKind::BitAnd, 6, false),
        TokenKind::Caret => op(BinOpKind::BitXor, 5, false),
        TokenKind::Equals if pair(TokenKind::Equals) => op(BinOpKind::Eq, 7, true),
        TokenKind::Bang if pair(TokenKind::Equals) => op(BinOpKind::Ne, 7, true),
        TokenKind::LAngle if pair(TokenKind::LAngle) => op(BinOpKind::Shl, 9, true),
        TokenKind::LAngle if pair(TokenKind::Equals) => op(BinOpKind::Le, 8, true),
        TokenKind::LAngle => op(BinOpKind::Lt, 8, false),
        TokenKind::RAngle if pair(TokenKind::RAngle) => op(BinOpKind::Shr, 9, true),
        TokenKind::RAngle if pair(TokenKind::Equals) => op(BinOpKind::Ge, 8, true),
        TokenKind::RAngle => op(BinOpKind::Gt, 8, false),
        TokenKind::Plus => op(BinOpKind::Add, 10, false),
        TokenKind::Minus => op(BinOpKind::Sub, 10, false),
        TokenKind::Star => op(BinOpKind::Mul, 11, false),
        TokenKind::Slash => op(BinOpKind::Div, 11, false),
        TokenKind::Percent => op(BinOpKind::Rem, 11, false),
        _ => None,
    }
}

/// Parses an integer expression with the given minimum binding power.
///
/// Values are evaluated with wrapping semantics; comparisons yield 0
/// or 1.
fn expr_bp(p: &mut Parser<'_>, min_bp: u8) -> u64 {
    let mut lhs = expr_atom(p);
    loop {
        if min_bp <= 1 && p.at(TokenKind::Question) {
            p.next();
            let then_value = expr_bp(p, 0);
            if let Err(e) = p.expect(TokenKind::Colon) {
                p.recover(e, CELLS_SYNC_SET);
                return if lhs != 0 { then_value } else { 0 };
            }
            let else_value = expr_bp(p, 0);
            lhs = if lhs != 0 { then_value } else { else_value };
            continue;
        }

        let Some(op) = peek_operator(p) else { break };
        if op.bp < min_bp {
            break;
        }

        p.next();
        if op.double {
            p.next();
        }

        let rhs = expr_bp(p, op.bp + 1);
        lhs = match op.kind {
            BinOpKind::Or => (lhs != 0 || rhs != 0) as u64,
            BinOpKind::And => (lhs != 0 && rhs != 0) as u64,
            BinOpKind::BitOr => lhs | rhs,
            BinOpKind::BitXor => lhs ^ rhs,
            BinOpKind::BitAnd => lhs & rhs,
            BinOpKind::Eq => (lhs == rhs) as u64,
            BinOpKind::Ne => (lhs != rhs) as u64,
            BinOpKind::Lt => (lhs < rhs) as u64,
            BinOpKind::Le => (lhs <= rhs) as u64,
            BinOpKind::Gt => (lhs > rhs) as u64,
            BinOpKind::Ge => (lhs >= rhs) as u64,
            BinOpKind::Shl => lhs.checked_shl(rhs as u32).unwrap_or(0),
            BinOpKind::Shr => lhs.checked_shr(rhs as u32).unwrap_or(0),
            BinOpKind::Add => lhs.wrapping_add(rhs),
            BinOpKind::Sub => lhs.wrapping_sub(rhs),
            BinOpKind::Mul => lhs.wrapping_mul(rhs),
            BinOpKind::Div => {
                if rhs == 0 {
                    p.diagnostic(division_by_zero(op.token));
                    0
                } else {
                    lhs / rhs
                }
            }
            BinOpKind::Rem => {
                if rhs == 0 {
                    p.diagnostic(division_by_zero(op.token));
                    0
                } else {
                    lhs % rhs
                }
            }
        };
    }

    lhs
}

/// Parses an expression atom: a literal, macro reference, nested
/// parenthesized expression, or unary operation.
fn expr_atom(p: &mut Parser<'_>) -> u64 {
    let t = p.peek();
    match t.kind {
        TokenKind::LParen => {
            let (value, _, _) = paren_expr(p);
            value
        }
        TokenKind::Number | TokenKind::Identifier => {
            let run = p.name_run().expect("peek starts a name");
            p.consume_run(&run);
            cell_number_value(p, &run)
        }
        TokenKind::Minus => {
            p.next();
            expr_atom(p).wrapping_neg()
        }
        TokenKind::Tilde => {
            p.next();
            !expr_atom(p)
        }
        TokenKind::Bang => {
            p.next();
            (expr_atom(p) == 0) as u64
        }
        TokenKind::Plus => {
            p.next();
            expr_atom(p)
        }
        TokenKind::RParen
        | TokenKind::RAngle
        | TokenKind::Semicolon
        | TokenKind::RBrace
        | TokenKind::Eof => {
            // Leave synchronization tokens for the enclosing construct.
            p.diagnostic(expected_found("an expression", t));
            0
        }
        _ => {
            let token = p.next();
            p.diagnostic(expected_found("an expression", token));
            0
        }
    }
}

/// Parses a `[...]` bytestring.
fn byte_string(p: &mut Parser<'_>) -> ByteString {
    let open = p.next();
    let mut hex = String::new();
    let close;
    loop {
        let t = p.peek();
        match t.kind {
            TokenKind::RBracket => {
                close = p.next();
                break;
            }
            TokenKind::Semicolon | TokenKind::RBrace | TokenKind::Eof => {
                p.diagnostic(
                    expected_found("`]`", t).with_label("this `[` is not matched", open.span),
                );
                close = t;
                break;
            }
            TokenKind::Number | TokenKind::Identifier => {
                let token = p.next();
                let text = p.text(token);
                if text.chars().all(|c| c.is_ascii_hexdigit()) {
                    hex.push_str(text);
                } else {
                    p.diagnostic(expected_found("hex digits", token));
                }
            }
            _ => {
                let token = p.next();
                p.diagnostic(expected_found("hex digits", token));
            }
        }
    }

    let mut bytes = Vec::with_capacity(hex.len() / 2);
    if hex.len() % 2 != 0 {
        p.diagnostic(
            expected_found("an even number of hex digits", open)
                .with_highlight(open.span.cover(close.span)),
        );
    } else {
        for i in (0..hex.len()).step_by(2) {
            let byte = u8::from_str_radix(&hex[i..i + 2], 16).expect("digits checked");
            bytes.push(byte);
        }
    }

    ByteString { bytes, open, close }
}

/// Parses a `&label` or `&{/path}` reference.
///
/// The caller must have checked that the next token is `&`.
fn ref_target(p: &mut Parser<'_>) -> RefTarget {
    let amp = p.next();
    if p.at(TokenKind::LBrace) {
        p.next();
        let mut segments = Vec::new();
        let close;
        loop {
            let t = p.peek();
            match t.kind {
                TokenKind::RBrace => {
                    close = p.next();
                    break;
                }
                TokenKind::Slash => {
                    p.next();
                }
                TokenKind::Identifier | TokenKind::Number => {
                    segments.push(path_segment(p));
                }
                _ => {
                    p.diagnostic(expected_found("a node path", t));
                    close = t;
                    break;
                }
            }
        }

        return RefTarget::Path(PathRef {
            segments,
            first: amp,
            last: close,
        });
    }

    match p.name_run() {
        Some(run) if run.first.kind == TokenKind::Identifier => {
            p.consume_run(&run);
            RefTarget::Label(LabelRef {
                value: run.text,
                amp,
                last: run.last,
            })
        }
        _ => {
            p.diagnostic(expected_found("a label name", p.peek()));
            RefTarget::Label(LabelRef {
                value: String::new(),
                amp,
                last: amp,
            })
        }
    }
}

/// Parses one segment of a node path, including its unit address.
fn path_segment(p: &mut Parser<'_>) -> String {
    let run = p.name_run().expect("caller checked for a name");
    p.consume_run(&run);
    let mut text = run.text;
    if p.next_if(TokenKind::At).is_some() {
        text.push('@');
        if let Some(address) = p.name_run() {
            p.consume_run(&address);
            text.push_str(&address.text);
        }
    }

    text
}

/// Parses a `/delete-node/` statement.
fn delete_node(p: &mut Parser<'_>, labels: Vec<LabelAssign>) -> Arc<DeleteNode> {
    let directive = p.next();
    for label in &labels {
        p.diagnostic(label_not_allowed(label));
    }

    let first = statement_first(&labels, directive);
    let (target, target_last) = match p.peek().kind {
        TokenKind::Ampersand => {
            let target = ref_target(p);
            let last = target.last_token();
            (DeleteTarget::Ref(target), last)
        }
        TokenKind::Identifier | TokenKind::Number => {
            let run = p.name_run().expect("peek starts a name");
            p.consume_run(&run);
            let name = node_name_rest(p, run);
            let last = name.last;
            (DeleteTarget::Name(name), last)
        }
        _ => {
            p.diagnostic(expected_found("a node name or label reference", p.peek()));
            (
                DeleteTarget::Name(NodeName {
                    name: String::new(),
                    address: None,
                    first: directive,
                    last: directive,
                }),
                directive,
            )
        }
    };

    let last = statement_end(p, target_last);
    Arc::new(DeleteNode {
        labels,
        target,
        first,
        last,
    })
}

/// Parses a `/delete-property/` statement.
fn delete_property(p: &mut Parser<'_>, labels: Vec<LabelAssign>) -> Arc<DeleteProperty> {
    let directive = p.next();
    for label in &labels {
        p.diagnostic(label_not_allowed(label));
    }

    let first = statement_first(&labels, directive);
    let (name, name_last) = match p.name_run() {
        Some(run) => {
            p.consume_run(&run);
            (run.text, run.last)
        }
        None => {
            p.diagnostic(expected_found("a property name", p.peek()));
            (String::new(), directive)
        }
    };

    let last = statement_end(p, name_last);
    Arc::new(DeleteProperty {
        labels,
        name,
        first,
        last,
    })
}

/// Parses a directive statement: `/dts-v1/;`, `/memreserve/ ... ;`,
/// `/include/ "file"`, or a preprocessor line.
fn directive_statement(
    p: &mut Parser<'_>,
    labels: Vec<LabelAssign>,
) -> Arc<DirectiveStatement> {
    let directive = p.next();
    for label in &labels {
        p.diagnostic(label_not_allowed(label));
    }

    let text = p.text(directive);
    if text.starts_with('#') {
        // Preprocessor lines carry their arguments in the token itself
        // and take no semicolon.
        return Arc::new(DirectiveStatement {
            directive,
            args: Vec::new(),
            last: directive,
        });
    }

    if text == "/include/" {
        // dtc-style includes take a string and no semicolon.
        let (args, last) = match p.next_if(TokenKind::String) {
            Some(token) => (vec![token], token),
            None => {
                p.diagnostic(expected_found("an include path string", p.peek()));
                (Vec::new(), directive)
            }
        };
        return Arc::new(DirectiveStatement {
            directive,
            args,
            last,
        });
    }

    let mut args = Vec::new();
    loop {
        let t = p.peek();
        match t.kind {
            TokenKind::Semicolon | TokenKind::Eof | TokenKind::LBrace | TokenKind::RBrace => {
                break;
            }
            _ => args.push(p.next()),
        }
    }

    let arg_last = args.last().copied().unwrap_or(directive);
    let last = statement_end(p, arg_last);
    Arc::new(DirectiveStatement {
        directive,
        args,
        last,
    })
}

#[cfg(test)]
mod test {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::IssueKind;
    use crate::Position;
    use crate::SyntaxIssue;
    use crate::ast::AstNode;
    use crate::parse;

    fn syntax_kinds(parse: &crate::Parse) -> Vec<SyntaxIssue> {
        parse
            .diagnostics()
            .iter()
            .map(|d| match d.kind() {
                IssueKind::Syntax(issue) => issue,
                other => panic!("expected a syntax issue, found {other:?}"),
            })
            .collect()
    }

    fn primary_position(parse: &crate::Parse, index: usize) -> Position {
        parse.diagnostics()[index]
            .labels()
            .next()
            .expect("diagnostic should have a primary label")
            .position()
            .expect("primary label should carry a position")
    }

    #[test]
    fn root_node_missing_semicolon() {
        let parse = parse("/{}");
        assert_eq!(syntax_kinds(&parse), vec![SyntaxIssue::EndStatement]);
        assert_eq!(primary_position(&parse, 0), Position::new(0, 2, 1));

        let statements = &parse.document().statements;
        assert_eq!(statements.len(), 1);
        assert!(matches!(statements[0], TopLevel::Root(_)));
    }

    #[test]
    fn child_node_missing_semicolon() {
        let parse = parse("/{ node {}};");
        assert_eq!(syntax_kinds(&parse), vec![SyntaxIssue::EndStatement]);
        assert_eq!(primary_position(&parse, 0), Position::new(0, 9, 1));

        let TopLevel::Root(root) = &parse.document().statements[0] else {
            panic!("expected a root node");
        };
        assert_eq!(root.entries.len(), 1);
        let Entry::Child(child) = &root.entries[0] else {
            panic!("expected a child node");
        };
        assert_eq!(child.name.name, "node");
        assert_eq!(child.name.address, None);
    }

    #[test]
    fn nested_missing_semicolons() {
        let parse = parse("/{ node {}}");
        assert_eq!(
            syntax_kinds(&parse),
            vec![SyntaxIssue::EndStatement, SyntaxIssue::EndStatement]
        );
        assert_eq!(primary_position(&parse, 0), Position::new(0, 9, 1));
        assert_eq!(primary_position(&parse, 1), Position::new(0, 10, 1));
    }

    #[test]
    fn node_with_unit_address() {
        let parse = parse("/{node1@20{};};");
        assert_eq!(parse.diagnostics().len(), 0);

        let TopLevel::Root(root) = &parse.document().statements[0] else {
            panic!("expected a root node");
        };
        let Entry::Child(child) = &root.entries[0] else {
            panic!("expected a child node");
        };
        assert_eq!(child.name.name, "node1");
        assert_eq!(child.name.address, Some(0x20));
        assert_eq!(child.first_token().pos.col, 2);
        assert_eq!(child.last_token().pos.col, 12);
    }

    #[test]
    fn node_with_missing_address() {
        let parse = parse("/{node1@{};};");
        assert_eq!(syntax_kinds(&parse), vec![SyntaxIssue::NodeAddress]);
        // The label lands on the final token of the name.
        assert_eq!(primary_position(&parse, 0), Position::new(0, 6, 1));

        let TopLevel::Root(root) = &parse.document().statements[0] else {
            panic!("expected a root node");
        };
        let Entry::Child(child) = &root.entries[0] else {
            panic!("expected a child node");
        };
        assert_eq!(child.name.name, "node1");
        assert_eq!(child.name.address, None);
    }

    #[test]
    fn node_with_whitespace_before_address() {
        let source = "/{node1@ 20{};};";
        let parse = parse(source);
        assert_eq!(
            syntax_kinds(&parse),
            vec![SyntaxIssue::NodeNameAddressWhitespace]
        );

        // The label spans from the `@` through the address.
        let label_span = parse.diagnostics()[0].span().expect("should have a span");
        assert_eq!(&source[label_span.start()..label_span.end()], "@ 20");

        let TopLevel::Root(root) = &parse.document().statements[0] else {
            panic!("expected a root node");
        };
        let Entry::Child(child) = &root.entries[0] else {
            panic!("expected a child node");
        };
        assert_eq!(child.name.name, "node1");
        assert_eq!(child.name.address, Some(0x20));
        assert_eq!(child.first_token().pos.col, 2);
        assert_eq!(child.last_token().pos.col, 13);
    }

    #[test]
    fn reference_node() {
        let parse = parse("&label{};");
        assert_eq!(parse.diagnostics().len(), 0);

        let TopLevel::Ref(node) = &parse.document().statements[0] else {
            panic!("expected a reference node");
        };
        let RefTarget::Label(label) = &node.reference else {
            panic!("expected a label reference");
        };
        assert_eq!(label.value, "label");
        assert_eq!(node.first_token().pos.col, 0);
        assert_eq!(node.last_token().pos.col, 8);
    }

    #[test]
    fn labels_attach_to_nodes_and_properties() {
        let parse = parse("/{ uart0: serial@1c00 { stat: status = \"okay\"; }; };");
        assert_eq!(parse.diagnostics().len(), 0);

        let TopLevel::Root(root) = &parse.document().statements[0] else {
            panic!("expected a root node");
        };
        let Entry::Child(child) = &root.entries[0] else {
            panic!("expected a child node");
        };
        assert_eq!(child.labels.len(), 1);
        assert_eq!(child.labels[0].name, "uart0");
        assert_eq!(child.name.name, "serial");
        assert_eq!(child.name.address, Some(0x1c00));

        let Entry::Property(property) = &child.entries[0] else {
            panic!("expected a property");
        };
        assert_eq!(property.labels[0].name, "stat");
        assert_eq!(property.name, "status");
        assert!(matches!(
            &property.values[0],
            PropertyValue::String(s) if s.value == "okay"
        ));
    }

    #[test]
    fn property_values() {
        let parse = parse(
            "/{ n { compat = \"a\", \"b\"; cells = <1 0x2 (1 << 4)>; ph = <&intc1 5>; data = [0011 ff]; path = &{/soc/uart@1000}; }; };",
        );
        assert_eq!(parse.diagnostics().len(), 0);

        let TopLevel::Root(root) = &parse.document().statements[0] else {
            panic!("expected a root node");
        };
        let Entry::Child(node) = &root.entries[0] else {
            panic!("expected a child node");
        };

        let property = |index: usize| -> &Property {
            match &node.entries[index] {
                Entry::Property(p) => p,
                other => panic!("expected a property, found {other:?}"),
            }
        };

        assert_eq!(property(0).values.len(), 2);

        let PropertyValue::Cells(cells) = &property(1).values[0] else {
            panic!("expected cells");
        };
        let numbers: Vec<_> = cells
            .cells
            .iter()
            .map(|c| match c.value {
                CellValue::Number(n) => n,
                ref other => panic!("expected a number, found {other:?}"),
            })
            .collect();
        assert_eq!(numbers, vec![1, 2, 16]);

        let PropertyValue::Cells(cells) = &property(2).values[0] else {
            panic!("expected cells");
        };
        assert!(matches!(
            &cells.cells[0].value,
            CellValue::Ref(r) if r.value == "intc1"
        ));
        assert!(matches!(cells.cells[1].value, CellValue::Number(5)));

        let PropertyValue::Bytes(bytes) = &property(3).values[0] else {
            panic!("expected a bytestring");
        };
        assert_eq!(bytes.bytes, vec![0x00, 0x11, 0xff]);

        let PropertyValue::NodePath(path) = &property(4).values[0] else {
            panic!("expected a node path");
        };
        assert_eq!(path.segments, vec!["soc", "uart@1000"]);
    }

    #[test]
    fn expressions_evaluate_with_c_precedence() {
        let cases = [
            ("(1 + 2 * 3)", 7u64),
            ("((1 + 2) * 3)", 9),
            ("(1 << 4 | 1)", 17),
            ("(10 / 2 - 1)", 4),
            ("(~0)", u64::MAX),
            ("(1 ? 42 : 7)", 42),
            ("(0 ? 42 : 7)", 7),
            ("(3 % 2)", 1),
            ("(1 <= 2)", 1),
            ("(-1)", u64::MAX),
        ];
        for (expr, expected) in cases {
            let source = format!("/{{ p = <{expr}>; }};");
            let parse = parse(&source);
            assert_eq!(parse.diagnostics().len(), 0, "source: {source}");

            let TopLevel::Root(root) = &parse.document().statements[0] else {
                panic!("expected a root node");
            };
            let Entry::Property(property) = &root.entries[0] else {
                panic!("expected a property");
            };
            let PropertyValue::Cells(cells) = &property.values[0] else {
                panic!("expected cells");
            };
            assert_eq!(
                cells.cells[0].value,
                CellValue::Number(expected),
                "source: {source}"
            );
        }
    }

    #[test]
    fn division_by_zero_recovers() {
        let parse = parse("/{ p = <(1 / 0)>; };");
        assert_eq!(syntax_kinds(&parse), vec![SyntaxIssue::DivisionByZero]);
    }

    #[test]
    fn macros_resolve_in_cells() {
        let mut macros = std::collections::HashMap::new();
        macros.insert(String::from("GPIO_ACTIVE_HIGH"), 0u64);
        macros.insert(String::from("IRQ_TYPE_EDGE_RISING"), 1u64);
        let parse = crate::parse_with_macros("/{ p = <GPIO_ACTIVE_HIGH IRQ_TYPE_EDGE_RISING>; };", &macros);
        assert_eq!(parse.diagnostics().len(), 0);
    }

    #[test]
    fn delete_statements() {
        let parse = parse("/{ /delete-node/ eth@0; /delete-property/ status; }; /delete-node/ &phy;");
        assert_eq!(parse.diagnostics().len(), 0);

        let TopLevel::Root(root) = &parse.document().statements[0] else {
            panic!("expected a root node");
        };
        let Entry::DeleteNode(delete) = &root.entries[0] else {
            panic!("expected a delete-node");
        };
        let DeleteTarget::Name(name) = &delete.target else {
            panic!("expected a name target");
        };
        assert_eq!(name.name, "eth");
        assert_eq!(name.address, Some(0));

        let Entry::DeleteProperty(delete) = &root.entries[1] else {
            panic!("expected a delete-property");
        };
        assert_eq!(delete.name, "status");

        let TopLevel::DeleteNode(delete) = &parse.document().statements[1] else {
            panic!("expected a top-level delete-node");
        };
        assert!(matches!(
            &delete.target,
            DeleteTarget::Ref(RefTarget::Label(label)) if label.value == "phy"
        ));
    }

    #[test]
    fn label_on_delete_is_flagged_but_kept() {
        let parse = parse("/{ x: /delete-node/ eth; };");
        assert_eq!(syntax_kinds(&parse), vec![SyntaxIssue::LabelNotAllowed]);

        let TopLevel::Root(root) = &parse.document().statements[0] else {
            panic!("expected a root node");
        };
        let Entry::DeleteNode(delete) = &root.entries[0] else {
            panic!("expected a delete-node");
        };
        assert_eq!(delete.labels.len(), 1);
        assert_eq!(delete.labels[0].name, "x");
    }

    #[test]
    fn unterminated_string_is_flagged() {
        let parse = parse("/{ model = \"half\n; };");
        assert!(
            syntax_kinds(&parse).contains(&SyntaxIssue::UnterminatedString),
            "issues: {issues:?}",
            issues = parse.diagnostics()
        );
    }

    #[test]
    fn unclosed_body_closes_at_end_of_input() {
        let parse = parse("/{ node {");
        assert!(syntax_kinds(&parse).contains(&SyntaxIssue::MissingBrace));
        // The tree still contains the root and its child.
        let TopLevel::Root(root) = &parse.document().statements[0] else {
            panic!("expected a root node");
        };
        assert!(matches!(root.entries[0], Entry::Child(_)));
    }

    #[test]
    fn parser_is_total_on_garbage() {
        let sources = [
            "}}};;;<<>>",
            "= = = @",
            "&;&;&;",
            "/ / / {",
            "\u{0}\u{1}\u{2}",
            "node node node",
            "/{ x = <(((; };",
        ];
        for source in sources {
            // Termination and a well-formed result are the assertions.
            let parse = parse(source);
            let _ = parse.document().statements.len();
            assert!(!parse.diagnostics().is_empty(), "source: {source}");
        }
    }

    #[test]
    fn ranges_are_monotonic() {
        fn check_entries(entries: &[Entry], parent_first: usize, parent_last: usize) {
            for entry in entries {
                let first = entry.first_token().span.start();
                let last = entry.last_token().span.end();
                assert!(parent_first <= first);
                assert!(last <= parent_last);
                if let Entry::Child(child) = entry {
                    check_entries(&child.entries, first, last);
                }
            }
        }

        let parse = parse(
            "/{ soc { uart@1c00 { status = \"okay\"; clocks = <&clk 4>; }; }; };\n&clk { #clock-cells = <1>; };",
        );
        assert_eq!(parse.diagnostics().len(), 0);
        for statement in &parse.document().statements {
            let first = statement.first_token().span.start();
            let last = statement.last_token().span.end();
            match statement {
                TopLevel::Root(n) => check_entries(&n.entries, first, last),
                TopLevel::Ref(n) => check_entries(&n.entries, first, last),
                TopLevel::Child(n) => check_entries(&n.entries, first, last),
                _ => {}
            }
        }
    }

    #[test]
    fn directives_parse() {
        let parse = parse("/dts-v1/;\n/memreserve/ 0x0 0x1000;\n#include \"common.dtsi\"\n/ {};");
        assert_eq!(parse.diagnostics().len(), 0);
        let statements = &parse.document().statements;
        assert_eq!(statements.len(), 4);
        assert!(matches!(statements[0], TopLevel::Directive(_)));
        assert!(matches!(statements[1], TopLevel::Directive(_)));
        assert!(matches!(statements[2], TopLevel::Directive(_)));
        assert!(matches!(statements[3], TopLevel::Root(_)));
    }

    #[test]
    fn element_at_finds_innermost() {
        let source = "/{ soc { serial@1c00 { status = \"okay\"; }; }; };";
        let parse = parse(source);
        let offset = source.find("status").expect("status should be present");
        match parse.document().element_at(offset) {
            Some(crate::ast::Element::Property(p)) => assert_eq!(p.name, "status"),
            other => panic!("expected the status property, found {other:?}"),
        }
    }
}
