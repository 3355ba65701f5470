//! Module for the parser implementation.
//!
//! The parser consumes the token stream produced by the lexer and builds
//! the AST directly, recording diagnostics as it goes. It never fails:
//! on a mismatch it records a syntax issue and skips forward to a
//! synchronization token.

use std::collections::HashMap;

use crate::Diagnostic;
use crate::SyntaxIssue;
use crate::ast::LabelAssign;
use crate::lexer::Token;
use crate::lexer::TokenKind;
use crate::lexer::TokenSet;

/// Creates an "expected, but found" diagnostic error.
pub(crate) fn expected_found(expected: &str, found: Token) -> Diagnostic {
    let found_desc = found.kind.describe();
    Diagnostic::error(
        SyntaxIssue::UnexpectedToken,
        format!("expected {expected}, but found {found_desc}"),
    )
    .with_label(
        format!("unexpected {found_desc}"),
        found.span,
    )
}

/// Creates a "missing `;`" diagnostic error.
///
/// The label points at the last token of the statement that should have
/// been followed by the semicolon.
pub(crate) fn end_statement(last: Token) -> Diagnostic {
    Diagnostic::error(
        SyntaxIssue::EndStatement,
        "statement is missing its terminating `;`",
    )
    .with_positioned_label("expected `;` after this", last.span, last.pos)
}

/// Creates a "missing unit address" diagnostic error.
///
/// The label points at the final token of the node name.
pub(crate) fn node_address(name_last: Token) -> Diagnostic {
    Diagnostic::error(
        SyntaxIssue::NodeAddress,
        "`@` in a node name must be followed by a unit address",
    )
    .with_positioned_label(
        "this name has an `@` with no address",
        name_last.span,
        name_last.pos,
    )
}

/// Creates a "whitespace inside node name" diagnostic error spanning
/// from the `@` token through the unit address.
pub(crate) fn node_name_whitespace(at: Token, address_last: Token) -> Diagnostic {
    Diagnostic::error(
        SyntaxIssue::NodeNameAddressWhitespace,
        "a node name, `@`, and unit address must not be separated by whitespace",
    )
    .with_label(
        "remove the whitespace around the `@`",
        at.span.cover(address_last.span),
    )
}

/// Creates an "unmatched brace" diagnostic error.
pub(crate) fn missing_brace(open: Token, found: Token) -> Diagnostic {
    Diagnostic::error(
        SyntaxIssue::MissingBrace,
        format!(
            "expected `}}`, but found {found}",
            found = found.kind.describe()
        ),
    )
    .with_label("this `{` is not matched", open.span)
    .with_label(
        format!("unexpected {found}", found = found.kind.describe()),
        found.span,
    )
}

/// Creates an "unterminated string" diagnostic error.
pub(crate) fn unterminated_string(token: Token) -> Diagnostic {
    Diagnostic::error(
        SyntaxIssue::UnterminatedString,
        "an unterminated string was encountered",
    )
    .with_label("this quote is not matched", token.span)
}

/// Creates an "expected property value" diagnostic error.
pub(crate) fn expected_value(found: Token) -> Diagnostic {
    Diagnostic::error(
        SyntaxIssue::ExpectedValue,
        format!(
            "expected a property value, but found {found}",
            found = found.kind.describe()
        ),
    )
    .with_label("expected a value here", found.span)
}

/// Creates a "label not allowed here" diagnostic error.
pub(crate) fn label_not_allowed(label: &LabelAssign) -> Diagnostic {
    Diagnostic::error(
        SyntaxIssue::LabelNotAllowed,
        format!(
            "label `{name}` is not allowed on this statement",
            name = label.name
        ),
    )
    .with_label(
        "remove this label",
        label.first.span.cover(label.colon.span),
    )
}

/// Creates a "division by zero" diagnostic error.
pub(crate) fn division_by_zero(token: Token) -> Diagnostic {
    Diagnostic::error(
        SyntaxIssue::DivisionByZero,
        "division by zero in integer expression",
    )
    .with_label("the divisor evaluates to zero", token.span)
}

/// A run of adjacent name tokens.
///
/// DTS names mix letters, digits, and punctuation (`node1`,
/// `fsl,mma8450`, unit addresses like `1c00`), while the lexer keeps
/// digits out of identifiers. A run stitches the adjacent
/// identifier/number tokens back into one name, which is what lets the
/// parser detect whitespace inside `name@address` productions.
#[derive(Debug, Clone)]
pub(crate) struct NameRun {
    /// The assembled name text.
    pub text: String,
    /// The first token of the run.
    pub first: Token,
    /// The last token of the run.
    pub last: Token,
    /// The raw token index one past the end of the run.
    pub end: usize,
}

/// Implements a DTS parser over a token stream.
#[allow(missing_debug_implementations)]
pub struct Parser<'a> {
    /// The source text the tokens were lexed from.
    source: &'a str,
    /// The full token stream, trivia included, ending with `Eof`.
    tokens: &'a [Token],
    /// The index of the next unconsumed token.
    pos: usize,
    /// Preprocessor macro values supplied by the embedder.
    ///
    /// Macros are never expanded textually; an identifier inside a cell
    /// array is looked up here.
    macros: &'a HashMap<String, u64>,
    /// The diagnostics encountered so far.
    diagnostics: Vec<Diagnostic>,
}

impl<'a> Parser<'a> {
    /// Constructs a new parser from a source string and its token
    /// stream.
    ///
    /// The token stream must be the complete stream for `source`,
    /// terminated by an `Eof` token.
    pub fn new(source: &'a str, tokens: &'a [Token], macros: &'a HashMap<String, u64>) -> Self {
        debug_assert!(matches!(tokens.last().map(|t| t.kind), Some(TokenKind::Eof)));
        Self {
            source,
            tokens,
            pos: 0,
            macros,
            diagnostics: Vec::new(),
        }
    }

    /// Looks up a preprocessor macro value by name.
    pub fn macro_value(&self, name: &str) -> Option<u64> {
        self.macros.get(name).copied()
    }

    /// Gets the lexeme of the given token.
    pub fn text(&self, token: Token) -> &'a str {
        token.text(self.source)
    }

    /// Gets the `Eof` token of the stream.
    pub fn eof(&self) -> Token {
        *self.tokens.last().expect("stream always ends with eof")
    }

    /// Gets the raw token at the given index, or `Eof` past the end.
    pub(crate) fn raw(&self, index: usize) -> Token {
        self.tokens.get(index).copied().unwrap_or_else(|| self.eof())
    }

    /// Gets the index of the next non-trivia token.
    fn peek_index(&self) -> usize {
        let mut index = self.pos;
        while self.raw(index).kind.is_trivia() {
            index += 1;
        }
        index
    }

    /// Peeks at the next non-trivia token without consuming it.
    pub fn peek(&self) -> Token {
        self.raw(self.peek_index())
    }

    /// Gets the raw token immediately following the peeked token.
    ///
    /// Used for assembling two-character operators out of adjacent
    /// tokens inside integer expressions.
    pub(crate) fn peek_following(&self) -> Token {
        self.raw(self.peek_index() + 1)
    }

    /// Consumes and returns the next non-trivia token.
    ///
    /// At the end of the stream this returns the `Eof` token without
    /// advancing, so callers can always make progress checks against
    /// [`TokenKind::Eof`].
    pub fn next(&mut self) -> Token {
        let index = self.peek_index();
        let token = self.raw(index);
        if token.kind != TokenKind::Eof {
            self.pos = index + 1;
        } else {
            self.pos = index;
        }
        token
    }

    /// Consumes the next token only if it has the given kind.
    pub fn next_if(&mut self, kind: TokenKind) -> Option<Token> {
        if self.peek().kind == kind {
            Some(self.next())
        } else {
            None
        }
    }

    /// Checks whether the next non-trivia token has the given kind.
    pub fn at(&self, kind: TokenKind) -> bool {
        self.peek().kind == kind
    }

    /// Expects the next token to be of the given kind.
    ///
    /// Returns an error diagnostic otherwise, consuming nothing.
    pub fn expect(&mut self, kind: TokenKind) -> Result<Token, Diagnostic> {
        if self.at(kind) {
            Ok(self.next())
        } else {
            Err(expected_found(kind.describe(), self.peek()))
        }
    }

    /// Adds a diagnostic to the parser output.
    pub fn diagnostic(&mut self, diagnostic: Diagnostic) {
        self.diagnostics.push(diagnostic);
    }

    /// Recovers from an error by consuming all tokens not in the given
    /// token set.
    pub fn recover(&mut self, diagnostic: Diagnostic, tokens: TokenSet) {
        loop {
            let token = self.peek();
            if token.kind == TokenKind::Eof || tokens.contains(token.kind.into_raw()) {
                break;
            }
            self.next();
        }

        self.diagnostics.push(diagnostic);
    }

    /// Scans a run of adjacent name tokens starting at the next
    /// non-trivia token, without consuming anything.
    ///
    /// Returns `None` when the next token cannot start a name.
    pub(crate) fn name_run(&self) -> Option<NameRun> {
        let start = self.peek_index();
        let first = self.raw(start);
        if !matches!(first.kind, TokenKind::Identifier | TokenKind::Number) {
            return None;
        }

        let mut text = String::from(first.text(self.source));
        let mut last = first;
        let mut end = start + 1;
        loop {
            let token = self.raw(end);
            if !matches!(token.kind, TokenKind::Identifier | TokenKind::Number)
                || !last.adjacent_to(token)
            {
                break;
            }

            text.push_str(token.text(self.source));
            last = token;
            end += 1;
        }

        Some(NameRun {
            text,
            first,
            last,
            end,
        })
    }

    /// Consumes a previously scanned name run.
    pub(crate) fn consume_run(&mut self, run: &NameRun) {
        debug_assert!(run.end > self.pos);
        self.pos = run.end;
    }

    /// Advances the parser position to the given raw token index.
    pub(crate) fn consume_to(&mut self, raw_index: usize) {
        debug_assert!(raw_index >= self.pos);
        self.pos = raw_index;
    }

    /// Consumes the parser, returning its diagnostics.
    pub fn finish(self) -> Vec<Diagnostic> {
        self.diagnostics
    }
}
