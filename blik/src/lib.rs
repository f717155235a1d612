// Library code never prints directly; output goes through the VM's writer
// and diagnostics are returned as values. The CLI does the printing.
#![deny(clippy::print_stdout)]
#![deny(clippy::print_stderr)]

//! blik: a small statically typed scripting language.
//!
//! The pipeline is a line-aware lexer ([`blik_lexer`]), a single-pass
//! compiler that parses, type-checks and emits stack-machine IR in one walk
//! ([`compile`]), and a resumable virtual machine ([`vm`]). A [`Program`]
//! accumulates IR across compiles, which is what the interactive session
//! ([`interactive`]) builds on.

pub mod api;
pub mod compile;
pub mod debug;
pub mod error;
pub mod instr;
pub mod interactive;
pub mod program;
pub mod stdlib;
pub mod types;
pub mod value;
pub mod vm;

// Re-export the lexer surface so hosts need only one dependency.
pub use blik_lexer::{tokenize, Diagnostic, LexErrors, Severity, Token, TokenKind, TokenizedFile};

pub use compile::{compile, CompileReport, MAX_PARAMETERS};
pub use error::Error;
pub use instr::Instr;
pub use program::{FuncId, FunctionInfo, FunctionMode, Program, StrId, VarId, VariableInfo};
pub use types::{PrimitiveType, TypeId, TypeInfo};
pub use value::Value;
pub use vm::{format_value, RuntimeError, Vm, VmError};
