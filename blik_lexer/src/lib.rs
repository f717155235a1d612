//! Tokenizer for blik source code.
//!
//! Produces a [`TokenizedFile`]: the owned source text, a flat token vector
//! with per-token line/offset information, and the positions of every
//! top-level `func` keyword (the compiler's prototype pre-pass entry points).

pub mod diag;
pub mod lexer;
pub mod token;

pub use diag::{Diagnostic, Severity};
pub use lexer::{tokenize, LexErrors, TokenizedFile};
pub use token::{Payload, Token, TokenKind};
