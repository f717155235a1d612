//! Interactive (REPL) compile/execute session.
//!
//! Each fragment is first compiled with a synthetic wrapper that assigns
//! the fragment to a scratch variable and prints it when it is not Null:
//!
//! ```text
//! begin
//!     let __result = ⟨fragment⟩
//!     if typeOf(__result) != Null do printLn(__result)
//! end
//! ```
//!
//! When that fails (the fragment was a statement, not an expression), the
//! bare fragment is compiled instead and only its own diagnostics are
//! shown. Incomplete input is detected through the compile report's
//! `unexpected_eof` flag so the host can prompt for more lines. A fragment
//! that fails at *runtime* is rolled back entirely: program, globals and
//! VM stack return to the pre-fragment baseline.

use std::cell::Cell;
use std::rc::Rc;

use blik_lexer::{tokenize, TokenizedFile};
use once_cell::sync::Lazy;
use tracing::debug;

use crate::compile::{compile, CompileReport};
use crate::debug as debuginfo;
use crate::program::Program;
use crate::stdlib;
use crate::value::Value;
use crate::vm::{Vm, VmError};

static INTRO: Lazy<TokenizedFile> =
    Lazy::new(|| tokenize("begin\nlet __result = ", "<intro>").expect("intro fragment tokenizes"));
static OUTRO: Lazy<TokenizedFile> = Lazy::new(|| {
    tokenize(
        "\nif typeOf(__result) != Null do printLn(__result)\nend\n",
        "<outro>",
    )
    .expect("outro fragment tokenizes")
});

/// Result of evaluating one logical input.
#[derive(Debug)]
pub enum Outcome {
    /// Compiled and ran; `output` is everything the fragment printed.
    Ok { output: String },
    /// The input is incomplete; prompt again with this many indent stops.
    Incomplete { indent: usize },
    /// Compilation failed; `code` is the source the diagnostics refer to.
    CompileError { report: CompileReport, code: String },
    /// Execution failed; the fragment's effects were rolled back.
    RuntimeError { message: String, output: String },
    /// `exit()` or `quit()` was called.
    Exit { output: String },
}

pub struct Session {
    program: Program,
    vm: Vm,
    pending: String,
    quit: Rc<Cell<bool>>,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("pending", &self.pending)
            .finish_non_exhaustive()
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

impl Session {
    pub fn new() -> Self {
        let mut program = Program::new();
        stdlib::install_all(&mut program);

        let quit = Rc::new(Cell::new(false));
        for signature in ["exit()", "quit()"] {
            let flag = quit.clone();
            program.add_function(signature, move |vm, _, _| {
                flag.set(true);
                vm.set_interrupt();
                Value::Null
            });
        }

        Session {
            program,
            vm: Vm::new(),
            pending: String::new(),
            quit,
        }
    }

    pub fn program(&self) -> &Program {
        &self.program
    }

    /// Feed one input line. Returns `Incomplete` when more lines are
    /// needed; the pending text is kept until the fragment resolves.
    pub fn eval(&mut self, line: &str) -> Outcome {
        if !self.pending.is_empty() {
            self.pending.push('\n');
        }
        self.pending.push_str(line);

        let code = self.pending.clone();
        if code.trim().is_empty() {
            self.pending.clear();
            return Outcome::Ok {
                output: String::new(),
            };
        }

        let snapshot = self.program.snapshot();
        let stack_len = self.vm.stack.len();

        // First try with the auto-print wrapper, telling the user nothing
        // if it fails.
        let wrapped_ok = match splice_wrapped(&code) {
            Some(file) => compile(&mut self.program, &file).is_ok(),
            None => false,
        };

        if !wrapped_ok {
            let file = match tokenize(&code, "<interactive>") {
                Ok(file) => file,
                Err(errors) => {
                    self.pending.clear();
                    return Outcome::CompileError {
                        report: CompileReport {
                            diagnostics: errors.diagnostics,
                            ..CompileReport::default()
                        },
                        code,
                    };
                }
            };

            if let Err(report) = compile(&mut self.program, &file) {
                if report.unexpected_eof {
                    let indent = (report.depth + 1).max(1) as usize;
                    return Outcome::Incomplete { indent };
                }
                self.pending.clear();
                return Outcome::CompileError { report, code };
            }
        }
        self.pending.clear();

        // Leave the End out so the VM halts at the end of the IR and the
        // next fragment resumes from there.
        self.program.pop_end();

        self.vm.clear_interrupt();

        match self.vm.run(&self.program) {
            Ok(_) => {
                let output = self.vm.take_output();
                if self.quit.get() {
                    Outcome::Exit { output }
                } else {
                    Outcome::Ok { output }
                }
            }
            Err(error) => {
                let output = self.vm.take_output();
                let message = debuginfo::render_runtime_error(&self.program, &self.vm, &error);
                debug!(pc = error.pc, "fragment failed at runtime, rolling back");

                // Restore the pre-fragment baseline.
                self.program.restore(&snapshot);
                self.vm.stack.truncate(stack_len);
                self.vm.bp = 0;
                self.vm.pc = self.program.ir.len();

                if self.quit.get() || error.error == VmError::Interrupted {
                    Outcome::Exit { output }
                } else {
                    Outcome::RuntimeError { message, output }
                }
            }
        }
    }
}

/// Concatenate intro + fragment + outro token streams, shifting the
/// fragment's `func` positions past the intro.
fn splice_wrapped(code: &str) -> Option<TokenizedFile> {
    let fragment = tokenize(code, "<interactive>").ok()?;

    let mut tokens = INTRO.tokens.clone();
    let shift = tokens.len();
    let funcs = fragment.funcs.iter().map(|pos| pos + shift).collect();
    tokens.extend(fragment.tokens.iter().cloned());
    tokens.extend(OUTRO.tokens.iter().cloned());

    Some(TokenizedFile {
        filename: "<interactive>".to_string(),
        code: code.to_string(),
        tokens,
        funcs,
    })
}
