use std::{borrow::Cow, fmt};

use crate::diagnostics::{Diagnostic, DiagnosticKind, SourceSpan};

/// Identifiers longer than this are truncated.
pub const MAX_IDENT_LEN: usize = 63;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Keyword {
    Def,
    If,
    Else,
    Elif,
    While,
    For,
    In,
    Return,
    Break,
    Continue,
    Pass,
    And,
    Or,
    Not,
    Import,
}

impl Keyword {
    pub fn as_str(self) -> &'static str {
        match self {
            Keyword::Def => "def",
            Keyword::If => "if",
            Keyword::Else => "else",
            Keyword::Elif => "elif",
            Keyword::While => "while",
            Keyword::For => "for",
            Keyword::In => "in",
            Keyword::Return => "return",
            Keyword::Break => "break",
            Keyword::Continue => "continue",
            Keyword::Pass => "pass",
            Keyword::And => "and",
            Keyword::Or => "or",
            Keyword::Not => "not",
            Keyword::Import => "import",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    Eof,
    Ident,
    Keyword(Keyword),
    Number,
    String,
    Plus,
    Minus,
    Star,
    Slash,
    Modulo,
    Pow,
    FloorDiv,
    Eq,
    EqEq,
    Ne,
    Lt,
    Gt,
    Le,
    Ge,
    BitAnd,
    BitOr,
    BitXor,
    BitNot,
    And,
    Or,
    Not,
    LParen,
    RParen,
    LBracket,
    RBracket,
    Colon,
    Comma,
    Newline,
    Unknown,
}

impl TokenKind {
    /// Upper-case name used when a token is quoted in a diagnostic.
    pub fn name(self) -> &'static str {
        match self {
            TokenKind::Eof => "EOF",
            TokenKind::Ident => "IDENT",
            TokenKind::Keyword(_) => "KEYWORD",
            TokenKind::Number => "NUMBER",
            TokenKind::String => "STRING",
            TokenKind::Plus => "PLUS",
            TokenKind::Minus => "MINUS",
            TokenKind::Star => "STAR",
            TokenKind::Slash => "SLASH",
            TokenKind::Modulo => "MODULO",
            TokenKind::Pow => "POW",
            TokenKind::FloorDiv => "FLOORDIV",
            TokenKind::Eq => "EQ",
            TokenKind::EqEq => "EQEQ",
            TokenKind::Ne => "NE",
            TokenKind::Lt => "LT",
            TokenKind::Gt => "GT",
            TokenKind::Le => "LE",
            TokenKind::Ge => "GE",
            TokenKind::BitAnd => "BIT_AND",
            TokenKind::BitOr => "BIT_OR",
            TokenKind::BitXor => "BIT_XOR",
            TokenKind::BitNot => "BIT_NOT",
            TokenKind::And => "AND",
            TokenKind::Or => "OR",
            TokenKind::Not => "NOT",
            TokenKind::LParen => "LPAREN",
            TokenKind::RParen => "RPAREN",
            TokenKind::LBracket => "LBRACKET",
            TokenKind::RBracket => "RBRACKET",
            TokenKind::Colon => "COLON",
            TokenKind::Comma => "COMMA",
            TokenKind::Newline => "NEWLINE",
            TokenKind::Unknown => "UNKNOWN",
        }
    }
}

impl fmt::Display for TokenKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    pub kind: TokenKind,
    /// Raw bytes for identifiers, keywords, numbers and operators; the
    /// unescaped contents for strings; empty for NEWLINE and EOF.
    pub text: Vec<u8>,
    /// Parsed value of a NUMBER token, zero otherwise.
    pub value: i64,
    pub span: SourceSpan,
}

impl Token {
    pub fn text_lossy(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.text)
    }

    pub fn line(&self) -> usize {
        self.span.line
    }
}

#[derive(Clone, Copy)]
struct Mark {
    start: usize,
    line: usize,
    column: usize,
}

/// On-demand tokenizer over a byte string.
///
/// `next_token` keeps returning EOF once the input is exhausted. As an
/// iterator the lexer yields every token up to and including the first
/// EOF and then stops.
pub struct Lexer<'a> {
    source: &'a [u8],
    pos: usize,
    line: usize,
    line_start: usize,
    finished: bool,
    diagnostics: Vec<Diagnostic>,
}

impl<'a> Lexer<'a> {
    pub fn new(source: &'a [u8]) -> Self {
        Self {
            source,
            pos: 0,
            line: 1,
            line_start: 0,
            finished: false,
            diagnostics: Vec::new(),
        }
    }

    /// Anomalies found so far (currently only unterminated strings).
    pub fn diagnostics(&self) -> &[Diagnostic] {
        &self.diagnostics
    }

    pub fn take_diagnostics(&mut self) -> Vec<Diagnostic> {
        std::mem::take(&mut self.diagnostics)
    }

    fn peek(&self) -> Option<u8> {
        self.source.get(self.pos).copied()
    }

    fn bump(&mut self) -> Option<u8> {
        let byte = self.peek()?;
        self.pos += 1;
        if byte == b'\n' {
            self.line += 1;
            self.line_start = self.pos;
        }
        Some(byte)
    }

    fn match_next(&mut self, expected: u8) -> bool {
        if self.peek() == Some(expected) {
            self.bump();
            true
        } else {
            false
        }
    }

    fn mark(&self) -> Mark {
        Mark {
            start: self.pos,
            line: self.line,
            column: self.pos - self.line_start + 1,
        }
    }

    fn span_from(&self, mark: Mark) -> SourceSpan {
        SourceSpan::new(mark.start, self.pos, mark.line, mark.column)
    }

    fn skip_whitespace_and_comments(&mut self) {
        while let Some(byte) = self.peek() {
            if is_blank(byte) {
                self.bump();
            } else if byte == b'#' {
                while let Some(ch) = self.peek() {
                    if ch == b'\n' {
                        break;
                    }
                    self.bump();
                }
            } else {
                break;
            }
        }
    }

    fn token(&self, kind: TokenKind, mark: Mark, text: Vec<u8>) -> Token {
        Token {
            kind,
            text,
            value: 0,
            span: self.span_from(mark),
        }
    }

    fn simple_token(&self, kind: TokenKind, mark: Mark) -> Token {
        self.token(kind, mark, self.source[mark.start..self.pos].to_vec())
    }

    fn collect_while(&mut self, predicate: impl Fn(u8) -> bool) {
        while let Some(byte) = self.peek() {
            if !predicate(byte) {
                break;
            }
            self.bump();
        }
    }

    fn identifier_or_keyword(&mut self, mark: Mark) -> Token {
        self.collect_while(|b| b.is_ascii_alphanumeric() || b == b'_');
        let full = &self.source[mark.start..self.pos];
        let text = full[..full.len().min(MAX_IDENT_LEN)].to_vec();
        let kind = keyword_for(&text).map_or(TokenKind::Ident, TokenKind::Keyword);
        self.token(kind, mark, text)
    }

    fn number_literal(&mut self, mark: Mark) -> Token {
        self.collect_while(|b| b.is_ascii_digit());
        let digits = &self.source[mark.start..self.pos];
        let value = digits.iter().fold(0u64, |acc, digit| {
            acc.saturating_mul(10).saturating_add(u64::from(digit - b'0'))
        });
        let mut token = self.token(TokenKind::Number, mark, digits.to_vec());
        token.value = value as i64;
        token
    }

    fn string_literal(&mut self, quote: u8, mark: Mark) -> Token {
        let mut contents = Vec::new();
        let terminated = loop {
            match self.bump() {
                None => break false,
                Some(b) if b == quote => break true,
                Some(b'\\') => match self.bump() {
                    Some(b'n') => contents.push(b'\n'),
                    Some(b't') => contents.push(b'\t'),
                    Some(b'r') => contents.push(b'\r'),
                    Some(other) => contents.push(other),
                    None => break false,
                },
                Some(b) => contents.push(b),
            }
        };
        if !terminated {
            self.diagnostics.push(
                Diagnostic::new(
                    DiagnosticKind::Lexer,
                    format!("unterminated string literal at line {}", mark.line),
                )
                .with_span(self.span_from(mark)),
            );
        }
        self.token(TokenKind::String, mark, contents)
    }

    pub fn next_token(&mut self) -> Token {
        self.skip_whitespace_and_comments();
        let mark = self.mark();
        let Some(byte) = self.bump() else {
            return self.token(TokenKind::Eof, mark, Vec::new());
        };

        match byte {
            b'\n' => self.token(TokenKind::Newline, mark, Vec::new()),
            b'a'..=b'z' | b'A'..=b'Z' | b'_' => self.identifier_or_keyword(mark),
            b'0'..=b'9' => self.number_literal(mark),
            b'"' | b'\'' => self.string_literal(byte, mark),
            b'+' => self.simple_token(TokenKind::Plus, mark),
            b'-' => self.simple_token(TokenKind::Minus, mark),
            b'*' => {
                let kind = if self.match_next(b'*') {
                    TokenKind::Pow
                } else {
                    TokenKind::Star
                };
                self.simple_token(kind, mark)
            }
            b'/' => {
                let kind = if self.match_next(b'/') {
                    TokenKind::FloorDiv
                } else {
                    TokenKind::Slash
                };
                self.simple_token(kind, mark)
            }
            b'%' => self.simple_token(TokenKind::Modulo, mark),
            b'(' => self.simple_token(TokenKind::LParen, mark),
            b')' => self.simple_token(TokenKind::RParen, mark),
            b'[' => self.simple_token(TokenKind::LBracket, mark),
            b']' => self.simple_token(TokenKind::RBracket, mark),
            b':' => self.simple_token(TokenKind::Colon, mark),
            b',' => self.simple_token(TokenKind::Comma, mark),
            b'^' => self.simple_token(TokenKind::BitXor, mark),
            b'~' => self.simple_token(TokenKind::BitNot, mark),
            b'&' => {
                let kind = if self.match_next(b'&') {
                    TokenKind::And
                } else {
                    TokenKind::BitAnd
                };
                self.simple_token(kind, mark)
            }
            b'|' => {
                let kind = if self.match_next(b'|') {
                    TokenKind::Or
                } else {
                    TokenKind::BitOr
                };
                self.simple_token(kind, mark)
            }
            b'=' => {
                let kind = if self.match_next(b'=') {
                    TokenKind::EqEq
                } else {
                    TokenKind::Eq
                };
                self.simple_token(kind, mark)
            }
            b'!' => {
                let kind = if self.match_next(b'=') {
                    TokenKind::Ne
                } else {
                    TokenKind::Not
                };
                self.simple_token(kind, mark)
            }
            b'<' => {
                let kind = if self.match_next(b'=') {
                    TokenKind::Le
                } else {
                    TokenKind::Lt
                };
                self.simple_token(kind, mark)
            }
            b'>' => {
                let kind = if self.match_next(b'=') {
                    TokenKind::Ge
                } else {
                    TokenKind::Gt
                };
                self.simple_token(kind, mark)
            }
            _ => self.simple_token(TokenKind::Unknown, mark),
        }
    }
}

impl Iterator for Lexer<'_> {
    type Item = Token;

    fn next(&mut self) -> Option<Token> {
        if self.finished {
            return None;
        }
        let token = self.next_token();
        if token.kind == TokenKind::Eof {
            self.finished = true;
        }
        Some(token)
    }
}

/// Whitespace that separates tokens; newline is significant and excluded.
fn is_blank(byte: u8) -> bool {
    matches!(byte, b' ' | b'\t' | b'\r' | 0x0b | 0x0c)
}

fn keyword_for(ident: &[u8]) -> Option<Keyword> {
    use self::Keyword as Kw;
    let keyword = match ident {
        b"def" => Kw::Def,
        b"if" => Kw::If,
        b"else" => Kw::Else,
        b"elif" => Kw::Elif,
        b"while" => Kw::While,
        b"for" => Kw::For,
        b"in" => Kw::In,
        b"return" => Kw::Return,
        b"break" => Kw::Break,
        b"continue" => Kw::Continue,
        b"pass" => Kw::Pass,
        b"and" => Kw::And,
        b"or" => Kw::Or,
        b"not" => Kw::Not,
        b"import" => Kw::Import,
        _ => return None,
    };
    Some(keyword)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(source: &str) -> Vec<TokenKind> {
        Lexer::new(source.as_bytes()).map(|token| token.kind).collect()
    }

    #[test]
    fn tokenizes_operators_greedily() {
        assert_eq!(
            kinds("** // == != <= >= && || = < > ! ~ ^ & |"),
            vec![
                TokenKind::Pow,
                TokenKind::FloorDiv,
                TokenKind::EqEq,
                TokenKind::Ne,
                TokenKind::Le,
                TokenKind::Ge,
                TokenKind::And,
                TokenKind::Or,
                TokenKind::Eq,
                TokenKind::Lt,
                TokenKind::Gt,
                TokenKind::Not,
                TokenKind::BitNot,
                TokenKind::BitXor,
                TokenKind::BitAnd,
                TokenKind::BitOr,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn recognizes_keywords_and_identifiers() {
        assert_eq!(
            kinds("def elif import definitely"),
            vec![
                TokenKind::Keyword(Keyword::Def),
                TokenKind::Keyword(Keyword::Elif),
                TokenKind::Keyword(Keyword::Import),
                TokenKind::Ident,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn truncates_long_identifiers() {
        let name = "x".repeat(80);
        let token = Lexer::new(name.as_bytes()).next_token();
        assert_eq!(token.kind, TokenKind::Ident);
        assert_eq!(token.text.len(), MAX_IDENT_LEN);
    }

    #[test]
    fn numbers_saturate_before_conversion() {
        let mut lexer = Lexer::new(b"42 99999999999999999999999");
        assert_eq!(lexer.next_token().value, 42);
        assert_eq!(lexer.next_token().value, u64::MAX as i64);
    }

    #[test]
    fn unescapes_string_literals() {
        let token = Lexer::new(br#"'a\tb\n\q\"'"#).next_token();
        assert_eq!(token.kind, TokenKind::String);
        assert_eq!(token.text, b"a\tb\nq\"".to_vec());
    }

    #[test]
    fn reports_unterminated_strings() {
        let mut lexer = Lexer::new(b"x = \"open");
        let tokens: Vec<_> = lexer.by_ref().collect();
        assert_eq!(tokens[2].kind, TokenKind::String);
        assert_eq!(tokens[2].text, b"open".to_vec());
        assert_eq!(lexer.diagnostics().len(), 1);
        assert_eq!(
            lexer.diagnostics()[0].to_string(),
            "Lex error: unterminated string literal at line 1"
        );
    }

    #[test]
    fn newlines_carry_their_own_line() {
        let tokens: Vec<_> = Lexer::new(b"a # trailing comment\nb").collect();
        let summary: Vec<_> = tokens.iter().map(|t| (t.kind, t.line())).collect();
        assert_eq!(
            summary,
            vec![
                (TokenKind::Ident, 1),
                (TokenKind::Newline, 1),
                (TokenKind::Ident, 2),
                (TokenKind::Eof, 2),
            ]
        );
        assert!(tokens[1].text.is_empty());
    }

    #[test]
    fn eof_repeats_but_iteration_stops() {
        let mut lexer = Lexer::new(b"$");
        assert_eq!(lexer.next_token().kind, TokenKind::Unknown);
        assert_eq!(lexer.next_token().kind, TokenKind::Eof);
        assert_eq!(lexer.next_token().kind, TokenKind::Eof);
        assert_eq!(kinds(""), vec![TokenKind::Eof]);
    }
}
