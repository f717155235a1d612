//! The single-pass compiler.
//!
//! Parsing, type checking and IR emission are fused: the recursive-descent
//! statement parser and the operator-precedence expression parser drive the
//! emitter directly, with a transient operand-type stack as the only
//! structural memory (there is no AST). A failed compile restores the
//! program to its exact pre-call state, which is what lets the REPL retry
//! partial input.

mod expr;
mod parser;

use std::fmt;

use blik_lexer::{Diagnostic, TokenizedFile};
use tracing::debug;

use crate::program::{Program, VarId};
use crate::types::TypeId;

use parser::Parser;

/// Upper bound on parameters and call arguments.
pub const MAX_PARAMETERS: usize = 16;

/// Depth of the operator stack inside one expression.
pub(crate) const MAX_OPERATORS: usize = 128;

/// Outcome of a failed compilation.
///
/// `unexpected_eof` tells interactive hosts that the input was merely
/// incomplete; `depth` is how many blocks were open at the first error, used
/// to compute continuation-prompt indentation.
#[derive(Debug, Default, Clone)]
pub struct CompileReport {
    pub diagnostics: Vec<Diagnostic>,
    pub depth: i32,
    pub unexpected_eof: bool,
}

impl fmt::Display for CompileReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.diagnostics.first() {
            Some(first) => write!(
                f,
                "{} ({} diagnostic{})",
                first.message,
                self.diagnostics.len(),
                if self.diagnostics.len() == 1 { "" } else { "s" }
            ),
            None => f.write_str("compilation failed"),
        }
    }
}

impl std::error::Error for CompileReport {}

/// One slot of the compile-time operand stack: the expression's static type
/// plus, when the value came straight from a variable load, the variable
/// itself (assignment targets are recognized through this back-pointer).
#[derive(Debug, Clone, Copy)]
pub(crate) struct StackSlot {
    pub ty: TypeId,
    pub var: Option<VarId>,
}

impl StackSlot {
    pub(crate) fn anonymous(ty: TypeId) -> Self {
        StackSlot { ty, var: None }
    }
}

/// Compile one tokenized file into `program`, appending IR and publishing
/// the file's functions and globals. On failure the program is restored to
/// its state before the call and the report carries every diagnostic.
pub fn compile(program: &mut Program, file: &TokenizedFile) -> Result<(), CompileReport> {
    let snapshot = program.snapshot();

    let mut parser = Parser::new(program, file);
    let ok = parser.parse();
    let report = parser.into_report();

    if ok {
        debug!(
            file = %file.filename,
            ir_len = program.ir.len(),
            "compile succeeded"
        );
        Ok(())
    } else {
        program.restore(&snapshot);
        debug!(
            file = %file.filename,
            diagnostics = report.diagnostics.len(),
            unexpected_eof = report.unexpected_eof,
            "compile failed"
        );
        Err(report)
    }
}
