//! Frame decoding and runtime error rendering.
//!
//! The VM stores no explicit frame list; frames are recovered by walking
//! the saved `(return pc, caller bp)` pairs that `Call` leaves below each
//! base pointer, and source positions come from the per-file line maps.

use crate::program::{FuncId, Program};
use crate::value::Value;
use crate::vm::{RuntimeError, Vm};

#[derive(Debug, Clone, PartialEq)]
pub struct FrameInfo {
    pub pc: usize,
    pub bp: usize,
    /// The function containing `pc`; `None` for the top-level frame.
    pub func: Option<FuncId>,
    pub filename: Option<String>,
    pub line: Option<u32>,
}

fn decode_one(program: &Program, pc: usize, bp: usize, out: &mut Vec<FrameInfo>) {
    let func = if bp != 0 { program.function_at(pc) } else { None };
    let (filename, line) = match program.source_at(pc) {
        Some((filename, line)) => (Some(filename.to_string()), Some(line)),
        None => (None, None),
    };
    out.push(FrameInfo {
        pc,
        bp,
        func,
        filename,
        line,
    });
}

/// Walk the call chain from the innermost frame outwards.
pub fn decode_frames(program: &Program, stack: &[Value], pc: usize, bp: usize) -> Vec<FrameInfo> {
    let mut frames = Vec::new();
    let mut pc = pc;
    let mut bp = bp;

    while bp != 0 {
        decode_one(program, pc, bp, &mut frames);

        if bp < 2 {
            break;
        }
        let saved_pc = stack.get(bp - 2).and_then(|v| v.as_int());
        let saved_bp = stack.get(bp - 1).and_then(|v| v.as_int());
        match (saved_pc, saved_bp) {
            (Some(saved_pc), Some(saved_bp)) => {
                pc = saved_pc.saturating_sub(1) as usize;
                bp = saved_bp as usize;
            }
            _ => break,
        }
    }

    decode_one(program, pc, 0, &mut frames);
    frames
}

/// Human-readable runtime error with one line per decoded frame.
pub fn render_runtime_error(program: &Program, vm: &Vm, err: &RuntimeError) -> String {
    let mut out = format!("error: {}", err.error);

    for frame in decode_frames(program, &vm.stack, err.pc, vm.bp) {
        let location = match (&frame.filename, frame.line) {
            (Some(filename), Some(line)) => format!(" ({filename}:{line})"),
            _ => String::new(),
        };
        match frame.func {
            Some(func) => {
                out.push_str(&format!("\n  in {}{location}", program.func(func).name));
            }
            None => out.push_str(&format!("\n  in <top level>{location}")),
        }
    }
    out
}
