//! Lexing and parsing of Devicetree Source (DTS) documents.
//!
//! The parser is error-recovering: for any byte sequence it terminates
//! with a [`Parse`] containing a document tree and a finite list of
//! diagnostics. Whitespace and comments are kept in the token stream,
//! and every AST node records its first and last token, so diagnostics
//! carry character-precise positions.
//!
//! Building a merged device tree out of several parsed files, and
//! validating properties against standard bindings, live in the
//! `dts-analysis` crate.

use std::collections::HashMap;
use std::sync::Arc;

pub mod ast;
mod diagnostic;
mod grammar;
pub mod lexer;
mod parser;

pub use diagnostic::ContextIssue;
pub use diagnostic::Diagnostic;
pub use diagnostic::IssueKind;
pub use diagnostic::Label;
pub use diagnostic::Position;
pub use diagnostic::Severity;
pub use diagnostic::Span;
pub use diagnostic::StandardTypeIssue;
pub use diagnostic::SyntaxIssue;
pub use diagnostic::Tag;

use ast::Document;
use ast::Element;
use lexer::Token;

/// The result of parsing one DTS source file.
///
/// Parses are cheap to clone; the source, tokens, and document are
/// shared.
#[derive(Debug, Clone)]
pub struct Parse {
    /// The source text.
    source: Arc<str>,
    /// The complete token stream, trivia included.
    tokens: Arc<[Token]>,
    /// The parsed document.
    document: Arc<Document>,
    /// The diagnostics encountered while parsing.
    diagnostics: Arc<[Diagnostic]>,
}

impl Parse {
    /// Gets the source text the document was parsed from.
    pub fn source(&self) -> &Arc<str> {
        &self.source
    }

    /// Gets the token stream of the document.
    ///
    /// The stream covers every byte of the source and ends with an
    /// end-of-input token.
    pub fn tokens(&self) -> &[Token] {
        &self.tokens
    }

    /// Gets the parsed document.
    pub fn document(&self) -> &Arc<Document> {
        &self.document
    }

    /// Gets the diagnostics encountered while parsing.
    pub fn diagnostics(&self) -> &[Diagnostic] {
        &self.diagnostics
    }

    /// Finds the innermost AST element containing the given byte
    /// offset.
    pub fn element_at(&self, offset: usize) -> Option<Element> {
        self.document.element_at(offset)
    }
}

/// Parses a DTS document.
pub fn parse(source: &str) -> Parse {
    parse_with_macros(source, &HashMap::new())
}

/// Parses a DTS document with preprocessor macro values supplied by
/// the embedder.
///
/// Macros are not expanded textually; identifiers inside cell arrays
/// are resolved against the map.
pub fn parse_with_macros(source: &str, macros: &HashMap<String, u64>) -> Parse {
    let tokens = lexer::tokenize(source);
    let mut parser = parser::Parser::new(source, &tokens, macros);
    let document = grammar::document(&mut parser);
    let diagnostics = parser.finish();

    Parse {
        source: source.into(),
        tokens: tokens.into(),
        document: Arc::new(document),
        diagnostics: diagnostics.into(),
    }
}
