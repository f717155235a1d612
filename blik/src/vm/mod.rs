//! The stack virtual machine.
//!
//! Three pieces of state: the operand stack, a program counter and a base
//! pointer. Globals live in the first slots of the stack; a call frame is
//! the region above `bp`, holding the callee's parameters, locals and
//! temporaries. `Call` splices the saved `(return pc, caller bp)` pair in
//! beneath the argument slots so that parameters sit at `bp + 0 ..` and
//! frame decoding can walk the saved pairs at `bp - 2` / `bp - 1`.
//!
//! The VM is resumable: `run` starts from the current `pc` and leaves all
//! state in place when it halts, which is how the REPL executes each newly
//! compiled fragment against the live globals.

pub mod error;

use std::io::Write;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::debug;

use crate::instr::Instr;
use crate::program::{FuncId, Program};
use crate::value::Value;

pub use error::{RuntimeError, VmError};

/// Hard bound on operand stack growth; deep non-tail recursion hits this
/// long before memory pressure does.
const MAX_STACK: usize = 1 << 20;

enum Flow {
    Continue,
    Halt(i32),
}

pub struct Vm {
    pub stack: Vec<Value>,
    pub pc: usize,
    pub bp: usize,
    /// Shared so hosts can keep a handle and flip it out of band, e.g. from
    /// a signal handler.
    interrupt: Arc<AtomicBool>,
    writer: Option<Box<dyn Write>>,
    output: String,
}

impl std::fmt::Debug for Vm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Vm")
            .field("stack", &self.stack)
            .field("pc", &self.pc)
            .field("bp", &self.bp)
            .field("interrupt", &self.interrupt)
            .finish_non_exhaustive()
    }
}

impl Default for Vm {
    fn default() -> Self {
        Self::new()
    }
}

impl Vm {
    pub fn new() -> Self {
        Vm {
            stack: Vec::new(),
            pc: 0,
            bp: 0,
            interrupt: Arc::new(AtomicBool::new(false)),
            writer: None,
            output: String::new(),
        }
    }

    /// Stream `print` output to `writer` instead of the internal buffer.
    pub fn with_writer(writer: Box<dyn Write>) -> Self {
        Vm {
            writer: Some(writer),
            ..Vm::new()
        }
    }

    /// Request orderly termination; the VM notices at the next call return
    /// or loop back-edge.
    pub fn set_interrupt(&self) {
        self.interrupt.store(true, Ordering::SeqCst);
    }

    pub fn clear_interrupt(&self) {
        self.interrupt.store(false, Ordering::SeqCst);
    }

    /// A handle to the interrupt flag that stays valid while the VM runs.
    /// Safe to store in a signal handler or another thread.
    pub fn interrupt_handle(&self) -> Arc<AtomicBool> {
        self.interrupt.clone()
    }

    /// Buffered output accumulated since the last call (empty when a writer
    /// is attached).
    pub fn take_output(&mut self) -> String {
        std::mem::take(&mut self.output)
    }

    /// Execute from the current `pc` until `End`, the end of the IR, an
    /// interrupt, or a runtime error. Returns the exit code on a normal
    /// halt. State is preserved across calls; on error, `pc` points at the
    /// faulting instruction.
    pub fn run(&mut self, program: &Program) -> Result<i32, RuntimeError> {
        debug!(pc = self.pc, ir_len = program.ir.len(), "vm run");
        loop {
            let addr = self.pc;
            let Some(&instr) = program.ir.get(addr) else {
                // Ran off the end: the interactive session compiles without
                // a trailing End so the next fragment resumes here.
                return Ok(0);
            };
            self.pc = addr + 1;

            match self.step(program, addr, instr) {
                Ok(Flow::Continue) => {}
                Ok(Flow::Halt(code)) => return Ok(code),
                Err(error) => {
                    self.pc = addr;
                    return Err(RuntimeError { error, pc: addr });
                }
            }
        }
    }

    fn step(&mut self, program: &Program, addr: usize, instr: Instr) -> Result<Flow, VmError> {
        match instr {
            Instr::PushNull => self.push(Value::Null)?,
            Instr::PushBool(b) => self.push(Value::Bool(b))?,
            Instr::PushInt(i) => self.push(Value::Int(i))?,
            Instr::PushFloat(d) => self.push(Value::Float(d))?,
            Instr::PushString(s) => self.push(Value::Str(s))?,
            Instr::PushType(t) => self.push(Value::Type(t))?,

            Instr::Pop(count) => {
                let len = self
                    .stack
                    .len()
                    .checked_sub(count)
                    .ok_or(VmError::StackUnderflow)?;
                self.stack.truncate(len);
            }

            Instr::LoadBool(slot)
            | Instr::LoadInt(slot)
            | Instr::LoadFloat(slot)
            | Instr::LoadString(slot)
            | Instr::LoadType(slot) => {
                let value = self.slot(slot)?;
                self.push(value)?;
            }
            Instr::LoadLocalBool(slot)
            | Instr::LoadLocalInt(slot)
            | Instr::LoadLocalFloat(slot)
            | Instr::LoadLocalString(slot)
            | Instr::LoadLocalType(slot) => {
                let value = self.slot(self.bp + slot)?;
                self.push(value)?;
            }

            Instr::StoreBool(slot)
            | Instr::StoreInt(slot)
            | Instr::StoreFloat(slot)
            | Instr::StoreString(slot)
            | Instr::StoreType(slot) => {
                let value = self.pop()?;
                self.set_slot(slot, value)?;
            }
            Instr::StoreLocalBool(slot)
            | Instr::StoreLocalInt(slot)
            | Instr::StoreLocalFloat(slot)
            | Instr::StoreLocalString(slot)
            | Instr::StoreLocalType(slot) => {
                let value = self.pop()?;
                self.set_slot(self.bp + slot, value)?;
            }

            Instr::CopyBool(slot)
            | Instr::CopyInt(slot)
            | Instr::CopyFloat(slot)
            | Instr::CopyString(slot)
            | Instr::CopyType(slot) => {
                let value = self.top()?;
                self.set_slot(slot, value)?;
            }
            Instr::CopyLocalBool(slot)
            | Instr::CopyLocalInt(slot)
            | Instr::CopyLocalFloat(slot)
            | Instr::CopyLocalString(slot)
            | Instr::CopyLocalType(slot) => {
                let value = self.top()?;
                self.set_slot(self.bp + slot, value)?;
            }

            Instr::AddInt => self.int_binop(|a, b| a.wrapping_add(b))?,
            Instr::SubstractInt => self.int_binop(|a, b| a.wrapping_sub(b))?,
            Instr::MultiplyInt => self.int_binop(|a, b| a.wrapping_mul(b))?,
            Instr::DivideInt => {
                let b = self.pop_int()?;
                let a = self.pop_int()?;
                if b == 0 {
                    return Err(VmError::DivisionByZero);
                }
                self.push(Value::Int(a.wrapping_div(b)))?;
            }
            Instr::ModuloInt => {
                let b = self.pop_int()?;
                let a = self.pop_int()?;
                if b == 0 {
                    return Err(VmError::ModuloByZero);
                }
                self.push(Value::Int(a.wrapping_rem(b)))?;
            }
            Instr::NegateInt => {
                let a = self.pop_int()?;
                self.push(Value::Int(a.wrapping_neg()))?;
            }

            Instr::AddFloat => self.float_binop(|a, b| a + b)?,
            Instr::SubstractFloat => self.float_binop(|a, b| a - b)?,
            Instr::MultiplyFloat => self.float_binop(|a, b| a * b)?,
            Instr::DivideFloat => self.float_binop(|a, b| a / b)?,
            Instr::NegateFloat => {
                let a = self.pop_float()?;
                self.push(Value::Float(-a))?;
            }

            Instr::EqualInt => self.int_compare(|a, b| a == b)?,
            Instr::NotEqualInt => self.int_compare(|a, b| a != b)?,
            Instr::GreaterThanInt => self.int_compare(|a, b| a > b)?,
            Instr::GreaterOrEqualInt => self.int_compare(|a, b| a >= b)?,
            Instr::LessThanInt => self.int_compare(|a, b| a < b)?,
            Instr::LessOrEqualInt => self.int_compare(|a, b| a <= b)?,

            Instr::EqualFloat => self.float_compare(|a, b| a == b)?,
            Instr::NotEqualFloat => self.float_compare(|a, b| a != b)?,
            Instr::GreaterThanFloat => self.float_compare(|a, b| a > b)?,
            Instr::GreaterOrEqualFloat => self.float_compare(|a, b| a >= b)?,
            Instr::LessThanFloat => self.float_compare(|a, b| a < b)?,
            Instr::LessOrEqualFloat => self.float_compare(|a, b| a <= b)?,

            Instr::EqualBool => {
                let b = self.pop_bool()?;
                let a = self.pop_bool()?;
                self.push(Value::Bool(a == b))?;
            }
            Instr::NotEqualBool => {
                let b = self.pop_bool()?;
                let a = self.pop_bool()?;
                self.push(Value::Bool(a != b))?;
            }
            Instr::EqualType => {
                let b = self.pop_type()?;
                let a = self.pop_type()?;
                self.push(Value::Bool(a == b))?;
            }
            Instr::NotEqualType => {
                let b = self.pop_type()?;
                let a = self.pop_type()?;
                self.push(Value::Bool(a != b))?;
            }

            Instr::AndInt => self.int_binop(|a, b| a & b)?,
            Instr::OrInt => self.int_binop(|a, b| a | b)?,
            Instr::XorInt => self.int_binop(|a, b| a ^ b)?,
            Instr::ComplementInt => {
                let a = self.pop_int()?;
                self.push(Value::Int(!a))?;
            }
            Instr::LeftShiftInt => self.int_binop(|a, b| {
                if (0..64).contains(&b) {
                    a.wrapping_shl(b as u32)
                } else {
                    0
                }
            })?,
            Instr::RightShiftInt => self.int_binop(|a, b| {
                if (0..64).contains(&b) {
                    a.wrapping_shr(b as u32)
                } else if b >= 64 {
                    a >> 63
                } else {
                    0
                }
            })?,
            Instr::LeftRotateInt => {
                self.int_binop(|a, b| a.rotate_left(b.rem_euclid(64) as u32))?
            }
            Instr::RightRotateInt => {
                self.int_binop(|a, b| a.rotate_right(b.rem_euclid(64) as u32))?
            }

            Instr::AndBool => {
                let b = self.pop_bool()?;
                let a = self.pop_bool()?;
                self.push(Value::Bool(a && b))?;
            }
            Instr::OrBool => {
                let b = self.pop_bool()?;
                let a = self.pop_bool()?;
                self.push(Value::Bool(a || b))?;
            }
            Instr::NotBool => {
                let a = self.pop_bool()?;
                self.push(Value::Bool(!a))?;
            }

            Instr::SkipIfFalse(off) => {
                let cond = self
                    .stack
                    .last()
                    .and_then(|v| v.as_bool())
                    .ok_or(VmError::CorruptStack { expected: "Bool" })?;
                if !cond {
                    self.pc = offset_pc(addr, off);
                }
            }
            Instr::SkipIfTrue(off) => {
                let cond = self
                    .stack
                    .last()
                    .and_then(|v| v.as_bool())
                    .ok_or(VmError::CorruptStack { expected: "Bool" })?;
                if cond {
                    self.pc = offset_pc(addr, off);
                }
            }

            Instr::Jump(off) => {
                self.pc = offset_pc(addr, off);
                if off < 0 && self.interrupted() {
                    return Err(VmError::Interrupted);
                }
            }
            Instr::BranchIfFalse(off) => {
                if !self.pop_bool()? {
                    self.pc = offset_pc(addr, off);
                    if off < 0 && self.interrupted() {
                        return Err(VmError::Interrupted);
                    }
                }
            }
            Instr::BranchIfTrue(off) => {
                if self.pop_bool()? {
                    self.pc = offset_pc(addr, off);
                    if off < 0 && self.interrupted() {
                        return Err(VmError::Interrupted);
                    }
                }
            }

            Instr::Call(func_id) => self.call(program, addr, func_id)?,
            Instr::CallNative(func_id) => {
                self.call_native(program, func_id)?;
                if self.interrupted() {
                    return Err(VmError::Interrupted);
                }
            }

            Instr::Return => {
                let value = self.pop()?;
                if self.bp < 2 {
                    return Err(VmError::StackUnderflow);
                }
                let ret_pc = self
                    .slot(self.bp - 2)?
                    .as_int()
                    .ok_or(VmError::CorruptStack { expected: "frame" })?;
                let caller_bp = self
                    .slot(self.bp - 1)?
                    .as_int()
                    .ok_or(VmError::CorruptStack { expected: "frame" })?;

                self.stack.truncate(self.bp - 2);
                self.pc = ret_pc as usize;
                self.bp = caller_bp as usize;
                self.stack.push(value);

                if self.interrupted() {
                    return Err(VmError::Interrupted);
                }
            }

            Instr::End(count) => {
                let len = self
                    .stack
                    .len()
                    .checked_sub(count)
                    .ok_or(VmError::StackUnderflow)?;
                self.stack.truncate(len);
                return Ok(Flow::Halt(0));
            }

            Instr::IntToFloat => {
                let a = self.pop_int()?;
                self.push(Value::Float(a as f64))?;
            }
            Instr::FloatToInt => {
                let a = self.pop_float()?;
                self.push(Value::Int(a as i64))?;
            }

            Instr::Print(_) => {
                let value = self.pop()?;
                let text = format_value(program, value);
                self.write_out(&text);
            }
        }

        Ok(Flow::Continue)
    }

    /// Establish a frame at the argument slots: the saved `(return pc,
    /// caller bp)` pair goes in beneath them, `bp` lands on the first
    /// parameter, and control transfers to the body.
    fn call(&mut self, program: &Program, addr: usize, func_id: FuncId) -> Result<(), VmError> {
        let func = program.func(func_id);
        let Some(target) = func.addr else {
            // Unreachable under correct compilation: forward calls are only
            // emitted for functions whose body follows in the same unit.
            return Err(VmError::UnresolvedCall(func.name.clone()));
        };

        if self.stack.len() + 2 > MAX_STACK {
            return Err(VmError::StackOverflow);
        }

        let base = self
            .stack
            .len()
            .checked_sub(func.params.len())
            .ok_or(VmError::StackUnderflow)?;
        self.stack.insert(base, Value::Int((addr + 1) as i64));
        self.stack.insert(base + 1, Value::Int(self.bp as i64));
        self.bp = base + 2;
        self.pc = target;
        Ok(())
    }

    fn call_native(&mut self, program: &Program, func_id: FuncId) -> Result<(), VmError> {
        let func = program.func(func_id);
        let native = func
            .native
            .clone()
            .ok_or_else(|| VmError::MissingNative(func.name.clone()))?;

        // Variadic natives receive their fixed parameters, then one
        // `(type, value)` pair per extra argument, then the pair count.
        // The compiler emits each extra argument's type tag after its
        // value (the type is only known once the argument's code is in
        // place), so the pairs are put into callback order here.
        let fixed = func.params.len();
        let (argc, extra) = if func.variadic {
            let extra = self
                .stack
                .last()
                .and_then(|v| v.as_int())
                .filter(|&count| count >= 0)
                .ok_or(VmError::CorruptStack { expected: "Int" })?;
            (fixed + 2 * extra as usize + 1, extra as usize)
        } else {
            (fixed, 0)
        };

        let base = self
            .stack
            .len()
            .checked_sub(argc)
            .ok_or(VmError::StackUnderflow)?;

        let mut args: Vec<Value> = Vec::with_capacity(argc);
        args.extend_from_slice(&self.stack[base..base + fixed]);
        for pair in 0..extra {
            let value = self.stack[base + fixed + 2 * pair];
            let tag = self.stack[base + fixed + 2 * pair + 1];
            args.push(tag);
            args.push(value);
        }
        if func.variadic {
            args.push(Value::Int(extra as i64));
        }
        self.stack.truncate(base);

        let result = (native.0)(self, program, &args);
        self.push(result)
    }

    // ---- stack helpers ----

    fn push(&mut self, value: Value) -> Result<(), VmError> {
        if self.stack.len() >= MAX_STACK {
            return Err(VmError::StackOverflow);
        }
        self.stack.push(value);
        Ok(())
    }

    fn pop(&mut self) -> Result<Value, VmError> {
        self.stack.pop().ok_or(VmError::StackUnderflow)
    }

    fn top(&self) -> Result<Value, VmError> {
        self.stack.last().copied().ok_or(VmError::StackUnderflow)
    }

    fn slot(&self, index: usize) -> Result<Value, VmError> {
        self.stack
            .get(index)
            .copied()
            .ok_or(VmError::StackUnderflow)
    }

    fn set_slot(&mut self, index: usize, value: Value) -> Result<(), VmError> {
        match self.stack.get_mut(index) {
            Some(slot) => {
                *slot = value;
                Ok(())
            }
            None => Err(VmError::StackUnderflow),
        }
    }

    fn pop_int(&mut self) -> Result<i64, VmError> {
        self.pop()?
            .as_int()
            .ok_or(VmError::CorruptStack { expected: "Int" })
    }

    fn pop_float(&mut self) -> Result<f64, VmError> {
        self.pop()?
            .as_float()
            .ok_or(VmError::CorruptStack { expected: "Float" })
    }

    fn pop_bool(&mut self) -> Result<bool, VmError> {
        self.pop()?
            .as_bool()
            .ok_or(VmError::CorruptStack { expected: "Bool" })
    }

    fn pop_type(&mut self) -> Result<crate::types::TypeId, VmError> {
        self.pop()?
            .as_type()
            .ok_or(VmError::CorruptStack { expected: "Type" })
    }

    fn int_binop(&mut self, op: impl FnOnce(i64, i64) -> i64) -> Result<(), VmError> {
        let b = self.pop_int()?;
        let a = self.pop_int()?;
        self.push(Value::Int(op(a, b)))
    }

    fn float_binop(&mut self, op: impl FnOnce(f64, f64) -> f64) -> Result<(), VmError> {
        let b = self.pop_float()?;
        let a = self.pop_float()?;
        self.push(Value::Float(op(a, b)))
    }

    fn int_compare(&mut self, op: impl FnOnce(i64, i64) -> bool) -> Result<(), VmError> {
        let b = self.pop_int()?;
        let a = self.pop_int()?;
        self.push(Value::Bool(op(a, b)))
    }

    fn float_compare(&mut self, op: impl FnOnce(f64, f64) -> bool) -> Result<(), VmError> {
        let b = self.pop_float()?;
        let a = self.pop_float()?;
        self.push(Value::Bool(op(a, b)))
    }

    fn interrupted(&self) -> bool {
        self.interrupt.load(Ordering::SeqCst)
    }

    fn write_out(&mut self, text: &str) {
        match &mut self.writer {
            Some(writer) => {
                let _ = writer.write_all(text.as_bytes());
            }
            None => self.output.push_str(text),
        }
    }
}

fn offset_pc(addr: usize, off: i32) -> usize {
    (addr as i64 + off as i64) as usize
}

/// Textual form used by `print`/`printLn`.
pub fn format_value(program: &Program, value: Value) -> String {
    match value {
        Value::Null => "null".to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Int(i) => i.to_string(),
        Value::Float(d) => d.to_string(),
        Value::Str(s) => program.str_value(s).to_string(),
        Value::Type(t) => program.type_info(t).signature.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::PrimitiveType;

    fn bare_program(ir: Vec<Instr>) -> Program {
        let mut program = Program::new();
        program.ir.clear();
        program.ir.extend(ir);
        program
    }

    fn run_ok(ir: Vec<Instr>) -> (Vm, i32) {
        let program = bare_program(ir);
        let mut vm = Vm::new();
        let code = vm.run(&program).expect("run failed");
        (vm, code)
    }

    #[test]
    fn arithmetic_and_end() {
        let (vm, code) = run_ok(vec![
            Instr::PushInt(2),
            Instr::PushInt(3),
            Instr::MultiplyInt,
            Instr::PushInt(1),
            Instr::AddInt,
            Instr::End(1),
        ]);
        assert_eq!(code, 0);
        assert!(vm.stack.is_empty());
    }

    #[test]
    fn division_by_zero_reports_faulting_pc() {
        let program = bare_program(vec![
            Instr::PushInt(1),
            Instr::PushInt(0),
            Instr::DivideInt,
        ]);
        let mut vm = Vm::new();
        let err = vm.run(&program).unwrap_err();
        assert_eq!(err.error, VmError::DivisionByZero);
        assert_eq!(err.pc, 2);
        assert_eq!(vm.pc, 2);
    }

    #[test]
    fn skip_if_false_keeps_condition() {
        // false && true: the skip jumps past AndBool, leaving `false`.
        let (vm, _) = run_ok(vec![
            Instr::PushBool(false),
            Instr::SkipIfFalse(3),
            Instr::PushBool(true),
            Instr::AndBool,
            Instr::End(0),
        ]);
        assert_eq!(vm.stack, vec![Value::Bool(false)]);
    }

    #[test]
    fn skip_if_false_not_taken_feeds_and() {
        let (vm, _) = run_ok(vec![
            Instr::PushBool(true),
            Instr::SkipIfFalse(3),
            Instr::PushBool(true),
            Instr::AndBool,
            Instr::End(0),
        ]);
        assert_eq!(vm.stack, vec![Value::Bool(true)]);
    }

    #[test]
    fn call_splices_frame_and_return_unwinds() {
        // func id of a user function: register a prototype by hand.
        let mut program = bare_program(vec![
            // main: push arg, call, end
            Instr::PushInt(41),
            Instr::Call(FuncId(0)),
            Instr::Pop(1),
            Instr::End(0),
            // body at 4: return arg + 1
            Instr::LoadLocalInt(0),
            Instr::PushInt(1),
            Instr::AddInt,
            Instr::Return,
        ]);
        program.functions.clear();
        program.functions_by_name.clear();
        program.functions_by_addr.clear();
        let id = crate::program::FuncId(0);
        program.functions.push(crate::program::FunctionInfo {
            name: "inc".into(),
            signature: "inc(Int): Int".into(),
            mode: crate::program::FunctionMode::Blik,
            params: vec![crate::program::Parameter {
                name: "n".into(),
                ty: PrimitiveType::Int.id(),
                mutable: false,
            }],
            ret_type: PrimitiveType::Int.id(),
            addr: Some(4),
            variadic: false,
            tail_recursive: false,
            overload_prev: id,
            overload_next: id,
            earliest_call_addr: usize::MAX,
            earliest_call_pos: usize::MAX,
            native: None,
        });
        program.publish_function(id);

        let mut vm = Vm::new();
        let trace = {
            // After the call instruction the frame should look like
            // [ret_pc, caller_bp, arg]; run to completion and make sure the
            // stack fully unwinds.
            vm.run(&program).expect("run")
        };
        assert_eq!(trace, 0);
        assert!(vm.stack.is_empty());
    }

    #[test]
    fn variadic_native_receives_type_value_pairs() {
        use std::cell::RefCell;
        use std::rc::Rc;

        let mut program = bare_program(vec![]);
        let seen: Rc<RefCell<Vec<Value>>> = Rc::new(RefCell::new(Vec::new()));
        let id = {
            let seen = seen.clone();
            program.add_function("collect(...)", move |_, _, args| {
                seen.borrow_mut().extend_from_slice(args);
                Value::Null
            })
        };

        // One extra argument: value below its tag on the stack, count on
        // top; the callback must see tag, value, count.
        program.ir.extend([
            Instr::PushInt(7),
            Instr::PushType(PrimitiveType::Int.id()),
            Instr::PushInt(1),
            Instr::CallNative(id),
            Instr::Pop(1),
            Instr::End(0),
        ]);

        let mut vm = Vm::new();
        vm.run(&program).expect("run");
        assert_eq!(
            *seen.borrow(),
            vec![
                Value::Type(PrimitiveType::Int.id()),
                Value::Int(7),
                Value::Int(1),
            ]
        );
    }

    #[test]
    fn interrupt_stops_backward_jumps() {
        let program = bare_program(vec![
            Instr::PushNull,
            Instr::Pop(1),
            Instr::Jump(-2),
        ]);
        let mut vm = Vm::new();
        vm.set_interrupt();
        let err = vm.run(&program).unwrap_err();
        assert_eq!(err.error, VmError::Interrupted);
    }

    #[test]
    fn print_writes_to_buffer() {
        let mut program = bare_program(vec![]);
        let s = program.intern("hi");
        program.ir.extend([
            Instr::PushString(s),
            Instr::Print(PrimitiveType::String),
            Instr::PushInt(42),
            Instr::Print(PrimitiveType::Int),
            Instr::End(0),
        ]);
        let mut vm = Vm::new();
        vm.run(&program).expect("run");
        assert_eq!(vm.take_output(), "hi42");
    }

    #[test]
    fn running_off_the_end_halts_cleanly() {
        let (vm, code) = run_ok(vec![Instr::PushInt(7)]);
        assert_eq!(code, 0);
        assert_eq!(vm.stack, vec![Value::Int(7)]);
        assert_eq!(vm.pc, 1);
    }
}
