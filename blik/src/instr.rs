//! The linear IR executed by the VM.
//!
//! Instructions are typed: the compiler resolves every operand type during
//! emission, so the VM never dispatches on runtime types. `Load`/`Store`/
//! `Copy` address global slots absolutely; the `Local` variants are relative
//! to the current frame's base pointer. `Copy` stores without popping, which
//! is what lets assignments be expressions.

use crate::program::{FuncId, StrId};
use crate::types::{PrimitiveType, TypeId};

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Instr {
    PushNull,
    PushBool(bool),
    PushInt(i64),
    PushFloat(f64),
    PushString(StrId),
    PushType(TypeId),

    Pop(usize),

    LoadBool(usize),
    LoadInt(usize),
    LoadFloat(usize),
    LoadString(usize),
    LoadType(usize),
    LoadLocalBool(usize),
    LoadLocalInt(usize),
    LoadLocalFloat(usize),
    LoadLocalString(usize),
    LoadLocalType(usize),

    StoreBool(usize),
    StoreInt(usize),
    StoreFloat(usize),
    StoreString(usize),
    StoreType(usize),
    StoreLocalBool(usize),
    StoreLocalInt(usize),
    StoreLocalFloat(usize),
    StoreLocalString(usize),
    StoreLocalType(usize),

    CopyBool(usize),
    CopyInt(usize),
    CopyFloat(usize),
    CopyString(usize),
    CopyType(usize),
    CopyLocalBool(usize),
    CopyLocalInt(usize),
    CopyLocalFloat(usize),
    CopyLocalString(usize),
    CopyLocalType(usize),

    AddInt,
    AddFloat,
    SubstractInt,
    SubstractFloat,
    MultiplyInt,
    MultiplyFloat,
    DivideInt,
    DivideFloat,
    ModuloInt,
    NegateInt,
    NegateFloat,

    EqualInt,
    NotEqualInt,
    GreaterThanInt,
    GreaterOrEqualInt,
    LessThanInt,
    LessOrEqualInt,
    EqualFloat,
    NotEqualFloat,
    GreaterThanFloat,
    GreaterOrEqualFloat,
    LessThanFloat,
    LessOrEqualFloat,
    EqualBool,
    NotEqualBool,
    EqualType,
    NotEqualType,

    AndInt,
    OrInt,
    XorInt,
    ComplementInt,
    LeftShiftInt,
    RightShiftInt,
    LeftRotateInt,
    RightRotateInt,

    AndBool,
    OrBool,
    NotBool,
    /// Short-circuit forward branch: taken when the top of stack is false.
    /// Never pops; when taken, the condition value *is* the expression
    /// result, and when not taken it becomes the left operand of the
    /// trailing `AndBool`.
    SkipIfFalse(i32),
    SkipIfTrue(i32),

    /// Relative jump: the operand is `target - jump_addr`.
    Jump(i32),
    BranchIfFalse(i32),
    BranchIfTrue(i32),

    Call(FuncId),
    CallNative(FuncId),
    Return,
    /// Halt normally after popping the given number of global slots.
    End(usize),

    IntToFloat,
    FloatToInt,

    /// Pop one value of the given primitive and write its textual form to
    /// the VM output.
    Print(PrimitiveType),
}

impl Instr {
    /// Mnemonic without operands, for disassembly and logs.
    pub fn name(&self) -> &'static str {
        match self {
            Instr::PushNull => "PushNull",
            Instr::PushBool(_) => "PushBool",
            Instr::PushInt(_) => "PushInt",
            Instr::PushFloat(_) => "PushFloat",
            Instr::PushString(_) => "PushString",
            Instr::PushType(_) => "PushType",
            Instr::Pop(_) => "Pop",
            Instr::LoadBool(_) => "LoadBool",
            Instr::LoadInt(_) => "LoadInt",
            Instr::LoadFloat(_) => "LoadFloat",
            Instr::LoadString(_) => "LoadString",
            Instr::LoadType(_) => "LoadType",
            Instr::LoadLocalBool(_) => "LoadLocalBool",
            Instr::LoadLocalInt(_) => "LoadLocalInt",
            Instr::LoadLocalFloat(_) => "LoadLocalFloat",
            Instr::LoadLocalString(_) => "LoadLocalString",
            Instr::LoadLocalType(_) => "LoadLocalType",
            Instr::StoreBool(_) => "StoreBool",
            Instr::StoreInt(_) => "StoreInt",
            Instr::StoreFloat(_) => "StoreFloat",
            Instr::StoreString(_) => "StoreString",
            Instr::StoreType(_) => "StoreType",
            Instr::StoreLocalBool(_) => "StoreLocalBool",
            Instr::StoreLocalInt(_) => "StoreLocalInt",
            Instr::StoreLocalFloat(_) => "StoreLocalFloat",
            Instr::StoreLocalString(_) => "StoreLocalString",
            Instr::StoreLocalType(_) => "StoreLocalType",
            Instr::CopyBool(_) => "CopyBool",
            Instr::CopyInt(_) => "CopyInt",
            Instr::CopyFloat(_) => "CopyFloat",
            Instr::CopyString(_) => "CopyString",
            Instr::CopyType(_) => "CopyType",
            Instr::CopyLocalBool(_) => "CopyLocalBool",
            Instr::CopyLocalInt(_) => "CopyLocalInt",
            Instr::CopyLocalFloat(_) => "CopyLocalFloat",
            Instr::CopyLocalString(_) => "CopyLocalString",
            Instr::CopyLocalType(_) => "CopyLocalType",
            Instr::AddInt => "AddInt",
            Instr::AddFloat => "AddFloat",
            Instr::SubstractInt => "SubstractInt",
            Instr::SubstractFloat => "SubstractFloat",
            Instr::MultiplyInt => "MultiplyInt",
            Instr::MultiplyFloat => "MultiplyFloat",
            Instr::DivideInt => "DivideInt",
            Instr::DivideFloat => "DivideFloat",
            Instr::ModuloInt => "ModuloInt",
            Instr::NegateInt => "NegateInt",
            Instr::NegateFloat => "NegateFloat",
            Instr::EqualInt => "EqualInt",
            Instr::NotEqualInt => "NotEqualInt",
            Instr::GreaterThanInt => "GreaterThanInt",
            Instr::GreaterOrEqualInt => "GreaterOrEqualInt",
            Instr::LessThanInt => "LessThanInt",
            Instr::LessOrEqualInt => "LessOrEqualInt",
            Instr::EqualFloat => "EqualFloat",
            Instr::NotEqualFloat => "NotEqualFloat",
            Instr::GreaterThanFloat => "GreaterThanFloat",
            Instr::GreaterOrEqualFloat => "GreaterOrEqualFloat",
            Instr::LessThanFloat => "LessThanFloat",
            Instr::LessOrEqualFloat => "LessOrEqualFloat",
            Instr::EqualBool => "EqualBool",
            Instr::NotEqualBool => "NotEqualBool",
            Instr::EqualType => "EqualType",
            Instr::NotEqualType => "NotEqualType",
            Instr::AndInt => "AndInt",
            Instr::OrInt => "OrInt",
            Instr::XorInt => "XorInt",
            Instr::ComplementInt => "ComplementInt",
            Instr::LeftShiftInt => "LeftShiftInt",
            Instr::RightShiftInt => "RightShiftInt",
            Instr::LeftRotateInt => "LeftRotateInt",
            Instr::RightRotateInt => "RightRotateInt",
            Instr::AndBool => "AndBool",
            Instr::OrBool => "OrBool",
            Instr::NotBool => "NotBool",
            Instr::SkipIfFalse(_) => "SkipIfFalse",
            Instr::SkipIfTrue(_) => "SkipIfTrue",
            Instr::Jump(_) => "Jump",
            Instr::BranchIfFalse(_) => "BranchIfFalse",
            Instr::BranchIfTrue(_) => "BranchIfTrue",
            Instr::Call(_) => "Call",
            Instr::CallNative(_) => "CallNative",
            Instr::Return => "Return",
            Instr::End(_) => "End",
            Instr::IntToFloat => "IntToFloat",
            Instr::FloatToInt => "FloatToInt",
            Instr::Print(_) => "Print",
        }
    }

    /// Relative operand of a jump-family instruction, if it has one.
    pub fn jump_offset(&self) -> Option<i32> {
        match self {
            Instr::Jump(off)
            | Instr::BranchIfFalse(off)
            | Instr::BranchIfTrue(off)
            | Instr::SkipIfFalse(off)
            | Instr::SkipIfTrue(off) => Some(*off),
            _ => None,
        }
    }

    /// Replace the relative operand of a jump-family instruction.
    pub fn set_jump_offset(&mut self, new_off: i32) {
        match self {
            Instr::Jump(off)
            | Instr::BranchIfFalse(off)
            | Instr::BranchIfTrue(off)
            | Instr::SkipIfFalse(off)
            | Instr::SkipIfTrue(off) => *off = new_off,
            _ => debug_assert!(false, "not a jump instruction: {:?}", self),
        }
    }
}
