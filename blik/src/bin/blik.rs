//! blik command-line interface.
//!
//! Usage:
//!   blik <file>             Execute a script file
//!   blik -c <code>          Run code directly from the argument
//!   blik -i                 Interactive REPL
//!   blik --dump_ir <file>   Compile and print the IR listing
//!
//! `RUST_LOG=blik=debug` enables compiler/VM tracing.

use std::io::Write;
use std::path::Path;
use std::process::ExitCode;

use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;
use tracing_subscriber::EnvFilter;

use blik::interactive::{Outcome, Session};
use blik::{api, Error};
use blik_lexer::diag::render_all;

const VERSION: &str = env!("CARGO_PKG_VERSION");

enum RunMode {
    File,
    Command,
    Interactive,
}

fn print_usage() {
    println!(
        "Usage: blik [options] <file>
       blik [options] -c <code>
       blik [options] -i

Options:
    -c, --command                Run code directly from argument
    -i, --interactive            Run code interactively (REPL)

        --no_execute             Parse code but don't run it
        --dump_ir                Print the compiled IR instead of running"
    );
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();

    let mut mode = RunMode::File;
    let mut execute = true;
    let mut dump_ir = false;
    let mut target: Option<String> = None;

    for arg in &args {
        match arg.as_str() {
            "--help" => {
                print_usage();
                return ExitCode::SUCCESS;
            }
            "--version" => {
                println!("blik {VERSION}");
                return ExitCode::SUCCESS;
            }
            "-c" | "--command" => mode = RunMode::Command,
            "-i" | "--interactive" => mode = RunMode::Interactive,
            "--no_execute" => execute = false,
            "--dump_ir" => dump_ir = true,
            other if other.starts_with('-') => {
                eprintln!("Cannot handle option '{other}'");
                return ExitCode::FAILURE;
            }
            other => {
                if target.is_some() {
                    eprintln!("Too many arguments");
                    return ExitCode::FAILURE;
                }
                target = Some(other.to_string());
            }
        }
    }

    match mode {
        RunMode::Interactive => run_interactive(),
        RunMode::Command => {
            let Some(code) = target else {
                eprintln!("No command provided");
                return ExitCode::FAILURE;
            };
            run_command(&code, execute, dump_ir)
        }
        RunMode::File => {
            let Some(filename) = target else {
                eprintln!("No filename provided");
                return ExitCode::FAILURE;
            };
            run_script(&filename, execute, dump_ir)
        }
    }
}

fn run_script(filename: &str, execute: bool, dump_ir: bool) -> ExitCode {
    if !execute || dump_ir {
        let code = match std::fs::read_to_string(filename) {
            Ok(code) => code,
            Err(err) => {
                eprintln!("Cannot read '{filename}': {err}");
                return ExitCode::FAILURE;
            }
        };
        let mut program = api::new_program();
        if let Err(err) = api::compile_source(&mut program, &code, filename) {
            report_error(&err, &code);
            return ExitCode::FAILURE;
        }
        if dump_ir {
            print!("{}", program.dump_ir());
        }
        return ExitCode::SUCCESS;
    }

    match api::run_file(Path::new(filename), Box::new(std::io::stdout())) {
        Ok(0) => ExitCode::SUCCESS,
        Ok(code) => ExitCode::from(code.clamp(0, 255) as u8),
        Err(err) => {
            let code = std::fs::read_to_string(filename).unwrap_or_default();
            report_error(&err, &code);
            ExitCode::FAILURE
        }
    }
}

fn run_command(code: &str, execute: bool, dump_ir: bool) -> ExitCode {
    if !execute || dump_ir {
        let mut program = api::new_program();
        if let Err(err) = api::compile_source(&mut program, code, "<inline>") {
            report_error(&err, code);
            return ExitCode::FAILURE;
        }
        if dump_ir {
            print!("{}", program.dump_ir());
        }
        return ExitCode::SUCCESS;
    }

    // The session gives -c the same auto-print behavior the REPL has.
    let mut session = Session::new();
    match session.eval(code) {
        Outcome::Ok { output } | Outcome::Exit { output } => {
            print!("{output}");
            ExitCode::SUCCESS
        }
        Outcome::Incomplete { .. } => {
            eprintln!("Unexpected end of input");
            ExitCode::FAILURE
        }
        Outcome::CompileError { report, code } => {
            eprintln!("{}", render_all(&report.diagnostics, &code));
            ExitCode::FAILURE
        }
        Outcome::RuntimeError { message, output } => {
            print!("{output}");
            eprintln!("{message}");
            ExitCode::FAILURE
        }
    }
}

fn run_interactive() -> ExitCode {
    println!("blik {VERSION}");

    let mut editor = match DefaultEditor::new() {
        Ok(editor) => editor,
        Err(err) => {
            eprintln!("Cannot initialize terminal: {err}");
            return ExitCode::FAILURE;
        }
    };

    let mut session = Session::new();
    let mut indent = 0usize;

    loop {
        let prompt = if indent == 0 { "blik> " } else { "....> " };
        let initial = "    ".repeat(indent);

        let line = match editor.readline_with_initial(prompt, (initial.as_str(), "")) {
            Ok(line) => line,
            Err(ReadlineError::Interrupted) => {
                indent = 0;
                continue;
            }
            Err(ReadlineError::Eof) => break,
            Err(err) => {
                eprintln!("Input error: {err}");
                break;
            }
        };
        let _ = editor.add_history_entry(line.as_str());

        match session.eval(&line) {
            Outcome::Ok { output } => {
                print!("{output}");
                let _ = std::io::stdout().flush();
                indent = 0;
            }
            Outcome::Incomplete { indent: next } => indent = next,
            Outcome::CompileError { report, code } => {
                eprintln!("{}", render_all(&report.diagnostics, &code));
                indent = 0;
            }
            Outcome::RuntimeError { message, output } => {
                print!("{output}");
                eprintln!("{message}");
                indent = 0;
            }
            Outcome::Exit { output } => {
                print!("{output}");
                break;
            }
        }
    }

    ExitCode::SUCCESS
}

fn report_error(err: &Error, code: &str) {
    match err {
        Error::Lex(errors) => eprintln!("{}", render_all(&errors.diagnostics, code)),
        Error::Compile(report) => eprintln!("{}", render_all(&report.diagnostics, code)),
        Error::Runtime { trace, .. } => eprintln!("{trace}"),
        Error::Io(err) => eprintln!("{err}"),
    }
}
