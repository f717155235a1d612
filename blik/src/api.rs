//! One-shot host APIs: compile and run blik source programmatically.

use std::fs;
use std::io::Write;
use std::path::Path;

use blik_lexer::tokenize;

use crate::compile::compile;
use crate::debug;
use crate::error::Error;
use crate::program::Program;
use crate::stdlib;
use crate::vm::Vm;

/// A program with the standard natives installed.
pub fn new_program() -> Program {
    let mut program = Program::new();
    stdlib::install_all(&mut program);
    program
}

/// Tokenize and compile `code` into `program`.
pub fn compile_source(program: &mut Program, code: &str, filename: &str) -> Result<(), Error> {
    let file = tokenize(code, filename)?;
    compile(program, &file)?;
    Ok(())
}

/// Compile and execute `code` in a fresh program, buffering output.
/// Returns the exit code and everything the program printed.
pub fn run_source(code: &str, filename: &str) -> Result<(i32, String), Error> {
    let mut program = new_program();
    compile_source(&mut program, code, filename)?;

    let mut vm = Vm::new();
    match vm.run(&program) {
        Ok(exit_code) => Ok((exit_code, vm.take_output())),
        Err(error) => {
            let trace = debug::render_runtime_error(&program, &vm, &error);
            Err(Error::Runtime { error, trace })
        }
    }
}

/// Compile and execute a script file, streaming output to `writer`.
pub fn run_file(path: &Path, writer: Box<dyn Write>) -> Result<i32, Error> {
    let code = fs::read_to_string(path)?;
    let filename = path.to_string_lossy().into_owned();

    let mut program = new_program();
    compile_source(&mut program, &code, &filename)?;

    let mut vm = Vm::with_writer(writer);
    match vm.run(&program) {
        Ok(exit_code) => Ok(exit_code),
        Err(error) => {
            let trace = debug::render_runtime_error(&program, &vm, &error);
            Err(Error::Runtime { error, trace })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_source_captures_output() {
        let (code, output) = run_source("printLn(1 + 2 * 3)\n", "test.blik").unwrap();
        assert_eq!(code, 0);
        assert_eq!(output, "7\n");
    }

    #[test]
    fn run_source_reports_runtime_trace() {
        let err = run_source("let x = 1 / 0\n", "test.blik").unwrap_err();
        match err {
            Error::Runtime { trace, .. } => {
                assert!(trace.contains("division by zero"), "trace: {trace}");
                assert!(trace.contains("test.blik:1"), "trace: {trace}");
            }
            other => panic!("expected runtime error, got {other:?}"),
        }
    }
}
