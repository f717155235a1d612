//! Crate-level error type for the one-shot host APIs.

use blik_lexer::LexErrors;
use thiserror::Error;

use crate::compile::CompileReport;
use crate::vm::RuntimeError;

#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Lex(#[from] LexErrors),

    #[error(transparent)]
    Compile(#[from] CompileReport),

    #[error("{error}")]
    Runtime {
        error: RuntimeError,
        /// Pre-rendered frame trace (the program needed to decode it may be
        /// gone by the time the error is displayed).
        trace: String,
    },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
