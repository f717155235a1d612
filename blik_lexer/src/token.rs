//! Token definitions for the blik lexer.

use logos::Logos;
use serde::{Deserialize, Serialize};

/// Raw lexical shapes recognized by the generated scanner.
///
/// Strings and block comments are only *started* here; the wrapping lexer
/// scans their bodies by hand (escapes, nesting) before resuming.
#[derive(Logos, Debug, Clone, Copy, PartialEq, Eq)]
#[logos(skip r"[ \t\r\f]+")]
#[logos(skip r"//[^\n]*")]
pub enum RawToken {
    // Keywords
    #[token("func")]
    Func,
    #[token("let")]
    Let,
    #[token("mut")]
    Mut,
    #[token("if")]
    If,
    #[token("else")]
    Else,
    #[token("end")]
    End,
    #[token("do")]
    Do,
    #[token("begin")]
    Begin,
    #[token("while")]
    While,
    #[token("for")]
    For,
    #[token("in")]
    In,
    #[token("break")]
    Break,
    #[token("continue")]
    Continue,
    #[token("return")]
    Return,

    // Literals
    #[token("null")]
    Null,
    #[token("true")]
    True,
    #[token("false")]
    False,
    #[regex(r"[0-9][0-9_]*\.[0-9][0-9_]*([eE][+-]?[0-9]+)?")]
    #[regex(r"[0-9][0-9_]*[eE][+-]?[0-9]+")]
    FloatLiteral,
    #[regex(r"0[xX][0-9a-fA-F][0-9a-fA-F_]*")]
    HexLiteral,
    #[regex(r"0[oO][0-7][0-7_]*")]
    OctalLiteral,
    #[regex(r"0[bB][01][01_]*")]
    BinaryLiteral,
    #[regex(r"[0-9][0-9_]*")]
    DecimalLiteral,
    #[regex(r"[A-Za-z_][A-Za-z0-9_]*")]
    Identifier,

    // Assignment family
    #[token("=")]
    Assign,
    #[token(":=")]
    Reassign,
    #[token("+=")]
    PlusAssign,
    #[token("-=")]
    MinusAssign,
    #[token("*=")]
    MultiplyAssign,
    #[token("/=")]
    DivideAssign,
    #[token("%=")]
    ModuloAssign,
    #[token("<<=")]
    LeftShiftAssign,
    #[token(">>=")]
    RightShiftAssign,
    #[token("<<<=")]
    LeftRotateAssign,
    #[token(">>>=")]
    RightRotateAssign,
    #[token("&=")]
    AndAssign,
    #[token("|=")]
    OrAssign,
    #[token("^=")]
    XorAssign,

    // Operators
    #[token("+")]
    Plus,
    #[token("-")]
    Minus,
    #[token("*")]
    Multiply,
    #[token("/")]
    Divide,
    #[token("%")]
    Modulo,
    #[token("==")]
    Equal,
    #[token("!=")]
    NotEqual,
    #[token(">")]
    Greater,
    #[token(">=")]
    GreaterOrEqual,
    #[token("<")]
    Less,
    #[token("<=")]
    LessOrEqual,
    #[token("&&")]
    AndAnd,
    #[token("||")]
    OrOr,
    #[token("!")]
    Not,
    #[token("&")]
    And,
    #[token("|")]
    Or,
    #[token("^")]
    Xor,
    #[token("~")]
    Complement,
    #[token("<<")]
    LeftShift,
    #[token(">>")]
    RightShift,
    #[token("<<<")]
    LeftRotate,
    #[token(">>>")]
    RightRotate,

    // Punctuation
    #[token("(")]
    LeftParenthesis,
    #[token(")")]
    RightParenthesis,
    #[token(",")]
    Comma,
    #[token(":")]
    Colon,
    #[token(";")]
    Semicolon,
    #[token(".")]
    Dot,

    #[token("\n")]
    Newline,
    #[token("/*")]
    BlockCommentStart,
    #[token("\"")]
    DoubleQuote,
}

/// Semantic token kinds handed to the compiler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TokenKind {
    Null,
    Bool,
    Integer,
    Float,
    String,
    Identifier,

    Assign,
    Reassign,
    PlusAssign,
    MinusAssign,
    MultiplyAssign,
    DivideAssign,
    ModuloAssign,
    LeftShiftAssign,
    RightShiftAssign,
    LeftRotateAssign,
    RightRotateAssign,
    AndAssign,
    OrAssign,
    XorAssign,

    Plus,
    Minus,
    Multiply,
    Divide,
    Modulo,
    Equal,
    NotEqual,
    Greater,
    GreaterOrEqual,
    Less,
    LessOrEqual,
    AndAnd,
    OrOr,
    Not,
    And,
    Or,
    Xor,
    Complement,
    LeftShift,
    RightShift,
    LeftRotate,
    RightRotate,

    LeftParenthesis,
    RightParenthesis,
    Comma,
    Colon,
    Semicolon,
    Dot,

    Func,
    Let,
    Mut,
    If,
    Else,
    End,
    Do,
    Begin,
    While,
    For,
    In,
    Break,
    Continue,
    Return,

    EndOfLine,
}

impl TokenKind {
    /// Human-readable spelling used in diagnostics.
    pub fn name(self) -> &'static str {
        match self {
            TokenKind::Null => "null",
            TokenKind::Bool => "boolean",
            TokenKind::Integer => "integer",
            TokenKind::Float => "float",
            TokenKind::String => "string",
            TokenKind::Identifier => "identifier",
            TokenKind::Assign => "=",
            TokenKind::Reassign => ":=",
            TokenKind::PlusAssign => "+=",
            TokenKind::MinusAssign => "-=",
            TokenKind::MultiplyAssign => "*=",
            TokenKind::DivideAssign => "/=",
            TokenKind::ModuloAssign => "%=",
            TokenKind::LeftShiftAssign => "<<=",
            TokenKind::RightShiftAssign => ">>=",
            TokenKind::LeftRotateAssign => "<<<=",
            TokenKind::RightRotateAssign => ">>>=",
            TokenKind::AndAssign => "&=",
            TokenKind::OrAssign => "|=",
            TokenKind::XorAssign => "^=",
            TokenKind::Plus => "+",
            TokenKind::Minus => "-",
            TokenKind::Multiply => "*",
            TokenKind::Divide => "/",
            TokenKind::Modulo => "%",
            TokenKind::Equal => "==",
            TokenKind::NotEqual => "!=",
            TokenKind::Greater => ">",
            TokenKind::GreaterOrEqual => ">=",
            TokenKind::Less => "<",
            TokenKind::LessOrEqual => "<=",
            TokenKind::AndAnd => "&&",
            TokenKind::OrOr => "||",
            TokenKind::Not => "!",
            TokenKind::And => "&",
            TokenKind::Or => "|",
            TokenKind::Xor => "^",
            TokenKind::Complement => "~",
            TokenKind::LeftShift => "<<",
            TokenKind::RightShift => ">>",
            TokenKind::LeftRotate => "<<<",
            TokenKind::RightRotate => ">>>",
            TokenKind::LeftParenthesis => "(",
            TokenKind::RightParenthesis => ")",
            TokenKind::Comma => ",",
            TokenKind::Colon => ":",
            TokenKind::Semicolon => ";",
            TokenKind::Dot => ".",
            TokenKind::Func => "func",
            TokenKind::Let => "let",
            TokenKind::Mut => "mut",
            TokenKind::If => "if",
            TokenKind::Else => "else",
            TokenKind::End => "end",
            TokenKind::Do => "do",
            TokenKind::Begin => "begin",
            TokenKind::While => "while",
            TokenKind::For => "for",
            TokenKind::In => "in",
            TokenKind::Break => "break",
            TokenKind::Continue => "continue",
            TokenKind::Return => "return",
            TokenKind::EndOfLine => "end of line",
        }
    }
}

/// Literal payload attached to a token.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Payload {
    None,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(Box<str>),
}

/// One lexed token with its source position.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Token {
    pub kind: TokenKind,
    /// 1-based source line.
    pub line: u32,
    /// Byte offset of the token start in the source text.
    pub offset: u32,
    pub payload: Payload,
}

impl Token {
    pub fn new(kind: TokenKind, line: u32, offset: u32) -> Self {
        Token {
            kind,
            line,
            offset,
            payload: Payload::None,
        }
    }

    pub fn with_payload(kind: TokenKind, line: u32, offset: u32, payload: Payload) -> Self {
        Token {
            kind,
            line,
            offset,
            payload,
        }
    }

    /// Identifier or string payload, if any.
    pub fn text(&self) -> Option<&str> {
        match &self.payload {
            Payload::Str(s) => Some(s),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keyword_names_match_spelling() {
        assert_eq!(TokenKind::Func.name(), "func");
        assert_eq!(TokenKind::Reassign.name(), ":=");
        assert_eq!(TokenKind::LeftRotateAssign.name(), "<<<=");
    }

    #[test]
    fn raw_lexer_prefers_longest_operator() {
        use logos::Logos;
        let tokens: Vec<_> = RawToken::lexer("<<<= <<< <<= << <")
            .filter_map(|t| t.ok())
            .collect();
        assert_eq!(
            tokens,
            vec![
                RawToken::LeftRotateAssign,
                RawToken::LeftRotate,
                RawToken::LeftShiftAssign,
                RawToken::LeftShift,
                RawToken::Less,
            ]
        );
    }
}
