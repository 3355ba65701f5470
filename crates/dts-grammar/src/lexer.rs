//! Module for the lexer implementation.

use logos::Logos;

use crate::Position;
use crate::Span;

/// Represents a set of tokens as a bitset.
///
/// As Rust does not currently support const functions in traits,
/// `TokenSet` operates on "raw" forms of tokens (i.e. `u8`).
///
/// This allows the sets to be created in const contexts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TokenSet(u128);

impl TokenSet {
    /// An empty token set.
    pub const EMPTY: Self = Self(0);

    /// Constructs a token set from a slice of tokens.
    pub const fn new(tokens: &[u8]) -> Self {
        let mut bits = 0u128;
        let mut i = 0;
        while i < tokens.len() {
            bits |= Self::mask(tokens[i]);
            i += 1;
        }
        Self(bits)
    }

    /// Unions two token sets together.
    pub const fn union(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }

    /// Checks if the token is contained in the set.
    pub const fn contains(&self, token: u8) -> bool {
        self.0 & Self::mask(token) != 0
    }

    /// Gets the count of tokens in the set.
    pub const fn count(&self) -> usize {
        self.0.count_ones() as usize
    }

    /// Masks the given token to a `u128`.
    const fn mask(token: u8) -> u128 {
        1u128 << (token as usize)
    }
}

/// Represents a token kind for lexing DTS documents.
///
/// Whitespace and comments are produced as ordinary tokens; the parser
/// skips them for lookahead but uses them for adjacency checks such as
/// detecting whitespace inside `name@address`.
#[derive(Logos, Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum TokenKind {
    /// Contiguous whitespace.
    #[regex(r"[ \t\r\n]+")]
    Whitespace,

    /// A `//` line comment or a `/* */` block comment.
    ///
    /// An unclosed block comment extends to the end of the input.
    #[regex(r"//[^\n]*", allow_greedy = true)]
    #[regex(r"/\*([^*]|\*+[^*/])*\*+/")]
    #[regex(r"/\*([^*]|\*+[^*/])*\**", priority = 2)]
    Comment,

    /// A dtc directive such as `/dts-v1/` or `/delete-node/`, or a
    /// C-preprocessor line such as `#include <...>`.
    ///
    /// Preprocessor lines are tokenized but never evaluated.
    #[regex(r"/(dts-v1|plugin|memreserve|bits|delete-node|delete-property|omit-if-no-ref|include)/")]
    #[regex(
        r"#[ \t]*(include|define|undef|ifdef|ifndef|if|elif|else|endif|error|warning|pragma)[^\n]*",
        priority = 10,
        allow_greedy = true
    )]
    Directive,

    /// The `/` symbol.
    #[token("/")]
    Slash,

    /// The `{` symbol.
    #[token("{")]
    LBrace,

    /// The `}` symbol.
    #[token("}")]
    RBrace,

    /// The `<` symbol.
    #[token("<")]
    LAngle,

    /// The `>` symbol.
    #[token(">")]
    RAngle,

    /// The `[` symbol.
    #[token("[")]
    LBracket,

    /// The `]` symbol.
    #[token("]")]
    RBracket,

    /// The `(` symbol.
    #[token("(")]
    LParen,

    /// The `)` symbol.
    #[token(")")]
    RParen,

    /// The `;` symbol.
    #[token(";")]
    Semicolon,

    /// The `,` symbol.
    #[token(",")]
    Comma,

    /// The `:` symbol.
    #[token(":")]
    Colon,

    /// The `=` symbol.
    #[token("=")]
    Equals,

    /// The `&` symbol.
    #[token("&")]
    Ampersand,

    /// The `@` symbol.
    #[token("@")]
    At,

    /// The `+` symbol.
    #[token("+")]
    Plus,

    /// The `-` symbol.
    #[token("-")]
    Minus,

    /// The `*` symbol.
    #[token("*")]
    Star,

    /// The `%` symbol.
    #[token("%")]
    Percent,

    /// The `|` symbol.
    #[token("|")]
    Pipe,

    /// The `^` symbol.
    #[token("^")]
    Caret,

    /// The `~` symbol.
    #[token("~")]
    Tilde,

    /// The `!` symbol.
    #[token("!")]
    Bang,

    /// The `?` symbol.
    #[token("?")]
    Question,

    /// An identifier.
    ///
    /// Identifiers carry the full DTS name alphabet except digits
    /// (`#interrupt-cells`, `fsl,mma` and the like). Names containing
    /// digits are assembled by the parser from adjacent identifier and
    /// number tokens, which is what lets it detect stray whitespace
    /// inside node names and unit addresses.
    #[regex(r"[#A-Za-z_][A-Za-z_,.+?#-]*")]
    Identifier,

    /// An integer literal: `0x` hexadecimal, decimal, or leading-zero
    /// octal. No floats.
    #[regex(r"0[xX][0-9a-fA-F]+")]
    #[regex(r"[0-9]+")]
    Number,

    /// A double-quoted string with C-style escapes.
    #[regex(r#""([^"\\\n]|\\[^\n])*""#)]
    String,

    /// A string still open at the end of its line.
    #[regex(r#""([^"\\\n]|\\[^\n])*"#, priority = 1)]
    UnterminatedString,

    /// A byte that matches no other token.
    Unknown,

    /// The end of the input; zero length, always the final token.
    Eof,

    // WARNING: this must always be the last variant.
    /// The exclusive maximum token value.
    MAX,
}

/// Asserts that TokenKind can fit in a TokenSet.
const _: () = assert!(TokenKind::MAX as u8 <= 128);

impl TokenKind {
    /// Converts the token kind into its "raw" representation.
    pub const fn into_raw(self) -> u8 {
        self as u8
    }

    /// Determines if the token is trivia that the parser skips over
    /// during lookahead.
    pub fn is_trivia(self) -> bool {
        matches!(self, Self::Whitespace | Self::Comment)
    }

    /// Describes a token kind for use in diagnostics.
    pub fn describe(self) -> &'static str {
        match self {
            Self::Whitespace => "whitespace",
            Self::Comment => "comment",
            Self::Directive => "directive",
            Self::Slash => "`/`",
            Self::LBrace => "`{`",
            Self::RBrace => "`}`",
            Self::LAngle => "`<`",
            Self::RAngle => "`>`",
            Self::LBracket => "`[`",
            Self::RBracket => "`]`",
            Self::LParen => "`(`",
            Self::RParen => "`)`",
            Self::Semicolon => "`;`",
            Self::Comma => "`,`",
            Self::Colon => "`:`",
            Self::Equals => "`=`",
            Self::Ampersand => "`&`",
            Self::At => "`@`",
            Self::Plus => "`+`",
            Self::Minus => "`-`",
            Self::Star => "`*`",
            Self::Percent => "`%`",
            Self::Pipe => "`|`",
            Self::Caret => "`^`",
            Self::Tilde => "`~`",
            Self::Bang => "`!`",
            Self::Question => "`?`",
            Self::Identifier => "identifier",
            Self::Number => "number",
            Self::String => "string",
            Self::UnterminatedString => "unterminated string",
            Self::Unknown => "unknown token",
            Self::Eof => "end of input",
            Self::MAX => unreachable!(),
        }
    }
}

/// A positioned token.
///
/// The lexeme is recovered by slicing the source with [`Token::span`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Token {
    /// The kind of the token.
    pub kind: TokenKind,
    /// The byte span of the token.
    pub span: Span,
    /// The character-precise position of the token.
    pub pos: Position,
}

impl Token {
    /// Gets the lexeme of the token within the given source.
    pub fn text(self, source: &str) -> &str {
        &source[self.span.start()..self.span.end()]
    }

    /// Determines whether this token is immediately followed by `other`
    /// in the source, with nothing in between.
    pub fn adjacent_to(self, other: Token) -> bool {
        self.span.end() == other.span.start()
    }
}

/// Implements a DTS lexer.
///
/// A lexer produces a stream of positioned tokens from a source string.
/// The stream is total: every byte of the source is covered by exactly
/// one token, unrecognized bytes become [`TokenKind::Unknown`], and the
/// stream terminates with a zero-length [`TokenKind::Eof`] token.
#[allow(missing_debug_implementations)]
#[derive(Clone)]
pub struct Lexer<'a> {
    /// The underlying logos lexer.
    lexer: logos::Lexer<'a, TokenKind>,
    /// The current zero-based line.
    line: u32,
    /// The current zero-based column, in characters.
    col: u32,
    /// Whether the final `Eof` token has been produced.
    done: bool,
}

impl<'a> Lexer<'a> {
    /// Creates a new lexer for the given source string.
    pub fn new(source: &'a str) -> Self {
        Self {
            lexer: TokenKind::lexer(source),
            line: 0,
            col: 0,
            done: false,
        }
    }

    /// Gets the source string of the lexer.
    pub fn source(&self) -> &'a str {
        self.lexer.source()
    }

    /// Builds a token at the current position and advances the
    /// line/column counters over its lexeme.
    fn token(&mut self, kind: TokenKind, span: Span) -> Token {
        let text = &self.lexer.source()[span.start()..span.end()];
        let line = self.line;
        let col = self.col;
        let mut len = 0u32;
        for ch in text.chars() {
            len += 1;
            if ch == '\n' {
                self.line += 1;
                self.col = 0;
            } else {
                self.col += 1;
            }
        }

        Token {
            kind,
            span,
            pos: Position::new(line, col, len),
        }
    }
}

impl Iterator for Lexer<'_> {
    type Item = Token;

    fn next(&mut self) -> Option<Token> {
        match self.lexer.next() {
            Some(Ok(kind)) => {
                let span = self.lexer.span().into();
                Some(self.token(kind, span))
            }
            Some(Err(())) => {
                let span = self.lexer.span().into();
                Some(self.token(TokenKind::Unknown, span))
            }
            None if !self.done => {
                self.done = true;
                let end = self.lexer.source().len();
                Some(Token {
                    kind: TokenKind::Eof,
                    span: Span::new(end, 0),
                    pos: Position::new(self.line, self.col, 0),
                })
            }
            None => None,
        }
    }
}

/// Tokenizes the given source in full.
///
/// The returned stream always ends with an `Eof` token.
pub fn tokenize(source: &str) -> Vec<Token> {
    Lexer::new(source).collect()
}

#[cfg(test)]
mod test {
    use pretty_assertions::assert_eq;

    use super::*;

    fn kinds(source: &str) -> Vec<(TokenKind, &str)> {
        tokenize(source)
            .into_iter()
            .map(|t| (t.kind, t.text(source)))
            .collect()
    }

    #[test]
    fn tokenization_is_total() {
        let sources = [
            "/ { foo = <1 2 3>; };",
            "/dts-v1/;\n&label { a,b = \"x\";\t};",
            "\u{1F600} garbage \x00 bytes \"unterminated",
            "",
            "/* unclosed comment",
        ];
        for source in sources {
            let tokens = tokenize(source);
            let rebuilt: String = tokens.iter().map(|t| t.text(source)).collect();
            assert_eq!(rebuilt, source);
            assert_eq!(tokens.last().map(|t| t.kind), Some(TokenKind::Eof));
        }
    }

    #[test]
    fn positions_are_character_precise() {
        let source = "a\tb\nccc";
        let tokens = tokenize(source);
        assert_eq!(tokens[0].pos, Position::new(0, 0, 1));
        // The tab advances the column by one.
        assert_eq!(tokens[1].pos, Position::new(0, 1, 1));
        assert_eq!(tokens[2].pos, Position::new(0, 2, 1));
        // Whitespace containing the newline starts on line 0.
        assert_eq!(tokens[3].pos, Position::new(0, 3, 1));
        assert_eq!(tokens[4].pos, Position::new(1, 0, 3));
        assert_eq!(tokens[5].kind, TokenKind::Eof);
        assert_eq!(tokens[5].pos, Position::new(1, 3, 0));
    }

    #[test]
    fn identifiers_exclude_digits() {
        assert_eq!(
            kinds("node1"),
            vec![
                (TokenKind::Identifier, "node"),
                (TokenKind::Number, "1"),
                (TokenKind::Eof, ""),
            ]
        );
        assert_eq!(
            kinds("#interrupt-cells"),
            vec![
                (TokenKind::Identifier, "#interrupt-cells"),
                (TokenKind::Eof, ""),
            ]
        );
    }

    #[test]
    fn directives() {
        assert_eq!(
            kinds("/delete-node/ &x;"),
            vec![
                (TokenKind::Directive, "/delete-node/"),
                (TokenKind::Whitespace, " "),
                (TokenKind::Ampersand, "&"),
                (TokenKind::Identifier, "x"),
                (TokenKind::Semicolon, ";"),
                (TokenKind::Eof, ""),
            ]
        );
        assert_eq!(
            kinds("#include \"skeleton.dtsi\"\n/ {};"),
            vec![
                (TokenKind::Directive, "#include \"skeleton.dtsi\""),
                (TokenKind::Whitespace, "\n"),
                (TokenKind::Slash, "/"),
                (TokenKind::Whitespace, " "),
                (TokenKind::LBrace, "{"),
                (TokenKind::RBrace, "}"),
                (TokenKind::Semicolon, ";"),
                (TokenKind::Eof, ""),
            ]
        );
    }

    #[test]
    fn strings() {
        assert_eq!(
            kinds(r#""okay" "with \"escape\"""#),
            vec![
                (TokenKind::String, r#""okay""#),
                (TokenKind::Whitespace, " "),
                (TokenKind::String, r#""with \"escape\"""#),
                (TokenKind::Eof, ""),
            ]
        );
        assert_eq!(
            kinds("\"left open\n;"),
            vec![
                (TokenKind::UnterminatedString, "\"left open"),
                (TokenKind::Whitespace, "\n"),
                (TokenKind::Semicolon, ";"),
                (TokenKind::Eof, ""),
            ]
        );
    }

    #[test]
    fn comments_are_tokens() {
        assert_eq!(
            kinds("// line\n/* block\nstill */ x"),
            vec![
                (TokenKind::Comment, "// line"),
                (TokenKind::Whitespace, "\n"),
                (TokenKind::Comment, "/* block\nstill */"),
                (TokenKind::Whitespace, " "),
                (TokenKind::Identifier, "x"),
                (TokenKind::Eof, ""),
            ]
        );
    }

    #[test]
    fn numbers() {
        assert_eq!(
            kinds("<0x1F 10 010>"),
            vec![
                (TokenKind::LAngle, "<"),
                (TokenKind::Number, "0x1F"),
                (TokenKind::Whitespace, " "),
                (TokenKind::Number, "10"),
                (TokenKind::Whitespace, " "),
                (TokenKind::Number, "010"),
                (TokenKind::RAngle, ">"),
                (TokenKind::Eof, ""),
            ]
        );
    }
}
