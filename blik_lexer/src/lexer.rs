//! Line-aware lexer for blik source code.
//!
//! Wraps the logos-generated scanner with manual handling of strings and
//! nested block comments, newline collapsing, and literal payload parsing.
//! Lexing does not stop at the first problem: every recoverable error is
//! recorded and scanning continues so one run surfaces as many diagnostics
//! as possible.

use logos::Logos;
use thiserror::Error;

use crate::diag::Diagnostic;
use crate::token::{Payload, RawToken, Token, TokenKind};

/// A fully tokenized source file.
#[derive(Debug, Clone, PartialEq)]
pub struct TokenizedFile {
    pub filename: String,
    pub code: String,
    pub tokens: Vec<Token>,
    /// Token indices of every `func` keyword, in source order. The compiler
    /// walks this list to register prototypes before the main pass.
    pub funcs: Vec<usize>,
}

/// Every diagnostic produced by one tokenization run.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("{}", .diagnostics.first().map(|d| d.message.as_str()).unwrap_or("lexical analysis failed"))]
pub struct LexErrors {
    pub diagnostics: Vec<Diagnostic>,
}

struct Lexer<'a> {
    code: &'a str,
    filename: &'a str,
    line: u32,
    tokens: Vec<Token>,
    funcs: Vec<usize>,
    diags: Vec<Diagnostic>,
}

/// Tokenize `code` into a [`TokenizedFile`].
///
/// Returns every diagnostic produced during the run on failure; the token
/// stream is not partially exposed in that case.
pub fn tokenize(code: &str, filename: &str) -> Result<TokenizedFile, LexErrors> {
    let mut lexer = Lexer {
        code,
        filename,
        line: 1,
        tokens: Vec::new(),
        funcs: Vec::new(),
        diags: Vec::new(),
    };
    lexer.run();

    if lexer.diags.is_empty() {
        Ok(TokenizedFile {
            filename: filename.to_string(),
            code: code.to_string(),
            tokens: lexer.tokens,
            funcs: lexer.funcs,
        })
    } else {
        Err(LexErrors {
            diagnostics: lexer.diags,
        })
    }
}

impl<'a> Lexer<'a> {
    fn run(&mut self) {
        let mut raw = RawToken::lexer(self.code);

        while let Some(result) = raw.next() {
            let span = raw.span();
            let offset = span.start;

            let token = match result {
                Err(()) => {
                    self.error(
                        offset,
                        format!(
                            "Unsupported character '{}'",
                            self.code[span.start..span.end].escape_default()
                        ),
                    );
                    continue;
                }
                Ok(token) => token,
            };

            match token {
                RawToken::Newline => {
                    self.push_end_of_line(offset);
                    self.line += 1;
                }

                RawToken::BlockCommentStart => {
                    match scan_block_comment(self.code.as_bytes(), span.end) {
                        Ok(end) => {
                            self.count_lines(span.end, end);
                            raw.bump(end - span.end);
                        }
                        Err(end) => {
                            self.error(offset, "Unterminated block comment");
                            raw.bump(end - span.end);
                        }
                    }
                }

                RawToken::DoubleQuote => {
                    let end = self.scan_string(offset, span.end);
                    raw.bump(end - span.end);
                }

                RawToken::Func => {
                    self.funcs.push(self.tokens.len());
                    self.push(TokenKind::Func, offset);
                }

                RawToken::Null => self.push(TokenKind::Null, offset),
                RawToken::True => self.push_payload(TokenKind::Bool, offset, Payload::Bool(true)),
                RawToken::False => self.push_payload(TokenKind::Bool, offset, Payload::Bool(false)),

                RawToken::DecimalLiteral => self.push_integer(offset, &span, 10, 0),
                RawToken::HexLiteral => self.push_integer(offset, &span, 16, 2),
                RawToken::OctalLiteral => self.push_integer(offset, &span, 8, 2),
                RawToken::BinaryLiteral => self.push_integer(offset, &span, 2, 2),

                RawToken::FloatLiteral => {
                    let text = self.code[span.clone()].replace('_', "");
                    match text.parse::<f64>() {
                        Ok(value) => {
                            self.push_payload(TokenKind::Float, offset, Payload::Float(value))
                        }
                        Err(_) => self.error(offset, format!("Malformed float literal '{text}'")),
                    }
                }

                RawToken::Identifier => {
                    let text = &self.code[span.clone()];
                    self.push_payload(TokenKind::Identifier, offset, Payload::Str(text.into()));
                }

                other => self.push(map_simple(other), offset),
            }
        }

        // Make sure the last statement is terminated even when the source
        // does not end with a newline.
        self.push_end_of_line(self.code.len());
    }

    fn push(&mut self, kind: TokenKind, offset: usize) {
        self.tokens.push(Token::new(kind, self.line, offset as u32));
    }

    fn push_payload(&mut self, kind: TokenKind, offset: usize, payload: Payload) {
        self.tokens
            .push(Token::with_payload(kind, self.line, offset as u32, payload));
    }

    /// Consecutive newlines collapse into a single `EndOfLine` token, and
    /// leading newlines produce none at all.
    fn push_end_of_line(&mut self, offset: usize) {
        match self.tokens.last() {
            None => {}
            Some(token) if token.kind == TokenKind::EndOfLine => {}
            Some(_) => self.push(TokenKind::EndOfLine, offset),
        }
    }

    fn push_integer(&mut self, offset: usize, span: &std::ops::Range<usize>, radix: u32, skip: usize) {
        let text = self.code[span.start + skip..span.end].replace('_', "");
        match u64::from_str_radix(&text, radix) {
            // Literals are lexed unsigned, so i64::MIN can never appear as a
            // literal; unary minus folding produces negative values later.
            Ok(value) if value <= i64::MAX as u64 => {
                self.push_payload(TokenKind::Integer, offset, Payload::Int(value as i64));
            }
            _ => {
                self.error(
                    offset,
                    format!("Number literal '{}' is too large", &self.code[span.clone()]),
                );
                self.push_payload(TokenKind::Integer, offset, Payload::Int(0));
            }
        }
    }

    /// Scan a string body starting right after the opening quote, unescaping
    /// as it goes. Returns the byte offset just past the closing quote (or
    /// the end of input when unterminated).
    fn scan_string(&mut self, token_offset: usize, body_start: usize) -> usize {
        let code = self.code;
        let start_line = self.line;
        let mut value = String::new();
        let mut chars = code[body_start..].char_indices();

        loop {
            let Some((rel, c)) = chars.next() else {
                self.diags.push(Diagnostic::error(
                    self.filename,
                    start_line,
                    token_offset,
                    "Unterminated string literal",
                ));
                return self.code.len();
            };

            match c {
                '"' => {
                    self.tokens.push(Token::with_payload(
                        TokenKind::String,
                        start_line,
                        token_offset as u32,
                        Payload::Str(value.into()),
                    ));
                    return body_start + rel + 1;
                }
                '\n' => {
                    self.line += 1;
                    value.push('\n');
                }
                '\\' => {
                    let escape_offset = body_start + rel;
                    match chars.next() {
                        Some((_, 'n')) => value.push('\n'),
                        Some((_, 't')) => value.push('\t'),
                        Some((_, 'r')) => value.push('\r'),
                        Some((_, '0')) => value.push('\0'),
                        Some((_, '\\')) => value.push('\\'),
                        Some((_, '"')) => value.push('"'),
                        Some((_, 'u')) => match self.scan_unicode_escape(&mut chars) {
                            Some(c) => value.push(c),
                            None => self.error(escape_offset, "Invalid unicode escape"),
                        },
                        Some((_, other)) => {
                            self.error(
                                escape_offset,
                                format!("Invalid escape sequence '\\{other}'"),
                            );
                        }
                        None => {
                            self.diags.push(Diagnostic::error(
                                self.filename,
                                start_line,
                                token_offset,
                                "Unterminated string literal",
                            ));
                            return self.code.len();
                        }
                    }
                }
                other => value.push(other),
            }
        }
    }

    /// Parse the `{HHHH}` part of a `\u{HHHH}` escape.
    fn scan_unicode_escape(&mut self, chars: &mut std::str::CharIndices<'_>) -> Option<char> {
        match chars.next() {
            Some((_, '{')) => {}
            _ => return None,
        }

        let mut value: u32 = 0;
        let mut digits = 0;
        loop {
            match chars.next() {
                Some((_, '}')) => break,
                Some((_, c)) => {
                    let digit = c.to_digit(16)?;
                    value = value.checked_mul(16)?.checked_add(digit)?;
                    digits += 1;
                    if digits > 6 {
                        return None;
                    }
                }
                None => return None,
            }
        }

        if digits == 0 {
            return None;
        }
        char::from_u32(value)
    }

    fn count_lines(&mut self, start: usize, end: usize) {
        self.line += memchr::memchr_iter(b'\n', &self.code.as_bytes()[start..end]).count() as u32;
    }

    fn error(&mut self, offset: usize, message: impl Into<String>) {
        self.diags.push(Diagnostic::error(
            self.filename,
            self.line,
            offset,
            message,
        ));
    }
}

/// Scan a (possibly nested) block comment body. Returns the offset just past
/// the closing `*/`, or `Err` with the end of input when unterminated.
fn scan_block_comment(bytes: &[u8], start: usize) -> Result<usize, usize> {
    let mut depth = 1;
    let mut pos = start;

    while pos < bytes.len() && depth > 0 {
        match memchr::memchr2(b'/', b'*', &bytes[pos..]) {
            None => {
                pos = bytes.len();
                break;
            }
            Some(offset) => {
                pos += offset;
                if pos + 1 < bytes.len() {
                    if bytes[pos] == b'/' && bytes[pos + 1] == b'*' {
                        depth += 1;
                        pos += 2;
                        continue;
                    }
                    if bytes[pos] == b'*' && bytes[pos + 1] == b'/' {
                        depth -= 1;
                        pos += 2;
                        continue;
                    }
                }
                pos += 1;
            }
        }
    }

    if depth > 0 {
        Err(pos)
    } else {
        Ok(pos)
    }
}

fn map_simple(raw: RawToken) -> TokenKind {
    match raw {
        RawToken::Let => TokenKind::Let,
        RawToken::Mut => TokenKind::Mut,
        RawToken::If => TokenKind::If,
        RawToken::Else => TokenKind::Else,
        RawToken::End => TokenKind::End,
        RawToken::Do => TokenKind::Do,
        RawToken::Begin => TokenKind::Begin,
        RawToken::While => TokenKind::While,
        RawToken::For => TokenKind::For,
        RawToken::In => TokenKind::In,
        RawToken::Break => TokenKind::Break,
        RawToken::Continue => TokenKind::Continue,
        RawToken::Return => TokenKind::Return,
        RawToken::Assign => TokenKind::Assign,
        RawToken::Reassign => TokenKind::Reassign,
        RawToken::PlusAssign => TokenKind::PlusAssign,
        RawToken::MinusAssign => TokenKind::MinusAssign,
        RawToken::MultiplyAssign => TokenKind::MultiplyAssign,
        RawToken::DivideAssign => TokenKind::DivideAssign,
        RawToken::ModuloAssign => TokenKind::ModuloAssign,
        RawToken::LeftShiftAssign => TokenKind::LeftShiftAssign,
        RawToken::RightShiftAssign => TokenKind::RightShiftAssign,
        RawToken::LeftRotateAssign => TokenKind::LeftRotateAssign,
        RawToken::RightRotateAssign => TokenKind::RightRotateAssign,
        RawToken::AndAssign => TokenKind::AndAssign,
        RawToken::OrAssign => TokenKind::OrAssign,
        RawToken::XorAssign => TokenKind::XorAssign,
        RawToken::Plus => TokenKind::Plus,
        RawToken::Minus => TokenKind::Minus,
        RawToken::Multiply => TokenKind::Multiply,
        RawToken::Divide => TokenKind::Divide,
        RawToken::Modulo => TokenKind::Modulo,
        RawToken::Equal => TokenKind::Equal,
        RawToken::NotEqual => TokenKind::NotEqual,
        RawToken::Greater => TokenKind::Greater,
        RawToken::GreaterOrEqual => TokenKind::GreaterOrEqual,
        RawToken::Less => TokenKind::Less,
        RawToken::LessOrEqual => TokenKind::LessOrEqual,
        RawToken::AndAnd => TokenKind::AndAnd,
        RawToken::OrOr => TokenKind::OrOr,
        RawToken::Not => TokenKind::Not,
        RawToken::And => TokenKind::And,
        RawToken::Or => TokenKind::Or,
        RawToken::Xor => TokenKind::Xor,
        RawToken::Complement => TokenKind::Complement,
        RawToken::LeftShift => TokenKind::LeftShift,
        RawToken::RightShift => TokenKind::RightShift,
        RawToken::LeftRotate => TokenKind::LeftRotate,
        RawToken::RightRotate => TokenKind::RightRotate,
        RawToken::LeftParenthesis => TokenKind::LeftParenthesis,
        RawToken::RightParenthesis => TokenKind::RightParenthesis,
        RawToken::Comma => TokenKind::Comma,
        RawToken::Colon => TokenKind::Colon,
        RawToken::Semicolon => TokenKind::Semicolon,
        RawToken::Dot => TokenKind::Dot,
        // Handled before dispatching here.
        RawToken::Func
        | RawToken::Null
        | RawToken::True
        | RawToken::False
        | RawToken::FloatLiteral
        | RawToken::HexLiteral
        | RawToken::OctalLiteral
        | RawToken::BinaryLiteral
        | RawToken::DecimalLiteral
        | RawToken::Identifier
        | RawToken::Newline
        | RawToken::BlockCommentStart
        | RawToken::DoubleQuote => unreachable!("handled by the caller"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn kinds(code: &str) -> Vec<TokenKind> {
        tokenize(code, "test.blik")
            .unwrap()
            .tokens
            .iter()
            .map(|t| t.kind)
            .collect()
    }

    #[test]
    fn basic_statement() {
        assert_eq!(
            kinds("let mut x = 1 + 2\n"),
            vec![
                TokenKind::Let,
                TokenKind::Mut,
                TokenKind::Identifier,
                TokenKind::Assign,
                TokenKind::Integer,
                TokenKind::Plus,
                TokenKind::Integer,
                TokenKind::EndOfLine,
            ]
        );
    }

    #[test]
    fn newlines_collapse() {
        assert_eq!(
            kinds("\n\nx\n\n\ny\n"),
            vec![
                TokenKind::Identifier,
                TokenKind::EndOfLine,
                TokenKind::Identifier,
                TokenKind::EndOfLine,
            ]
        );
    }

    #[test]
    fn missing_trailing_newline_is_supplied() {
        assert_eq!(
            kinds("x"),
            vec![TokenKind::Identifier, TokenKind::EndOfLine]
        );
    }

    #[test]
    fn lines_and_offsets() {
        let file = tokenize("a\n  b\n", "test.blik").unwrap();
        assert_eq!(file.tokens[0].line, 1);
        assert_eq!(file.tokens[0].offset, 0);
        // 'b' on line 2, after "a\n  "
        assert_eq!(file.tokens[2].line, 2);
        assert_eq!(file.tokens[2].offset, 4);
    }

    #[test]
    fn crlf_is_handled() {
        let file = tokenize("a\r\nb\r\n", "test.blik").unwrap();
        assert_eq!(
            file.tokens.iter().map(|t| t.kind).collect::<Vec<_>>(),
            vec![
                TokenKind::Identifier,
                TokenKind::EndOfLine,
                TokenKind::Identifier,
                TokenKind::EndOfLine,
            ]
        );
        assert_eq!(file.tokens[2].line, 2);
    }

    #[test]
    fn func_positions_are_recorded() {
        let file = tokenize("func a() do end\nlet x = 1\nfunc b() do end\n", "test.blik").unwrap();
        assert_eq!(file.funcs.len(), 2);
        for &pos in &file.funcs {
            assert_eq!(file.tokens[pos].kind, TokenKind::Func);
        }
    }

    #[test]
    fn integer_radixes() {
        let file = tokenize("10 0x1F 0o17 0b101 1_000\n", "test.blik").unwrap();
        let values: Vec<i64> = file
            .tokens
            .iter()
            .filter_map(|t| match t.payload {
                Payload::Int(v) => Some(v),
                _ => None,
            })
            .collect();
        assert_eq!(values, vec![10, 31, 15, 5, 1000]);
    }

    #[test]
    fn integer_overflow_is_an_error() {
        // i64::MAX is fine, one more is not: INT64_MIN can never be lexed.
        assert!(tokenize("9223372036854775807\n", "t").is_ok());
        let errors = tokenize("9223372036854775808\n", "t").unwrap_err();
        assert!(errors.diagnostics[0].message.contains("too large"));
    }

    #[test]
    fn float_literals() {
        let file = tokenize("1.5 2.0e3 1e-2\n", "test.blik").unwrap();
        let values: Vec<f64> = file
            .tokens
            .iter()
            .filter_map(|t| match t.payload {
                Payload::Float(v) => Some(v),
                _ => None,
            })
            .collect();
        assert_eq!(values, vec![1.5, 2000.0, 0.01]);
    }

    #[test]
    fn string_escapes() {
        let file = tokenize(r#""a\nb\t\"q\"\u{1F980}""#, "test.blik").unwrap();
        assert_eq!(
            file.tokens[0].text(),
            Some("a\nb\t\"q\"\u{1F980}")
        );
    }

    #[test]
    fn unterminated_string() {
        let errors = tokenize("\"abc\n", "t").unwrap_err();
        assert!(errors.diagnostics[0].message.contains("Unterminated string"));
    }

    #[test]
    fn invalid_escape_still_reports_close() {
        let errors = tokenize(r#""a\qb""#, "t").unwrap_err();
        assert!(errors.diagnostics[0].message.contains("Invalid escape"));
    }

    #[test]
    fn comments_are_skipped() {
        assert_eq!(
            kinds("a // comment\nb /* inline */ c\n"),
            vec![
                TokenKind::Identifier,
                TokenKind::EndOfLine,
                TokenKind::Identifier,
                TokenKind::Identifier,
                TokenKind::EndOfLine,
            ]
        );
    }

    #[test]
    fn nested_block_comments() {
        assert_eq!(
            kinds("a /* outer /* inner */ outer */ b\n"),
            vec![
                TokenKind::Identifier,
                TokenKind::Identifier,
                TokenKind::EndOfLine,
            ]
        );
    }

    #[test]
    fn unterminated_block_comment() {
        let errors = tokenize("a /* no close", "t").unwrap_err();
        assert!(errors.diagnostics[0].message.contains("Unterminated block comment"));
    }

    #[test]
    fn block_comment_lines_keep_counting() {
        let file = tokenize("/* 1\n2\n3 */ x\n", "test.blik").unwrap();
        assert_eq!(file.tokens[0].line, 3);
    }

    #[test]
    fn multiple_errors_in_one_run() {
        let errors = tokenize("9223372036854775808\n\u{1}\n", "t").unwrap_err();
        assert!(errors.diagnostics.len() >= 2);
    }

    #[test]
    fn retokenizing_from_token_offsets_is_stable() {
        let code = "func f(a: Int): Int do return a <<< 2 end\nlet s = \"hi\"\nprintLn(1.5, s)\n";
        let file = tokenize(code, "test.blik").unwrap();
        for token in &file.tokens {
            if token.kind == TokenKind::EndOfLine {
                continue;
            }
            let again = tokenize(&code[token.offset as usize..], "test.blik").unwrap();
            let first = &again.tokens[0];
            assert_eq!(first.kind, token.kind, "token at offset {}", token.offset);
            assert_eq!(first.payload, token.payload);
        }
    }
}
