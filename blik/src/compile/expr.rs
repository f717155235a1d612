//! The shunting-yard expression parser.
//!
//! Operators drive the emitter directly while a synthetic operand-type
//! stack tracks what the runtime stack will hold. Several peephole rewrites
//! happen at emission time: literal negation folds in place, `typeOf`
//! erases its argument's code, reassignment drops the target's load, and
//! short-circuit operators patch their own forward skips.

use blik_lexer::TokenKind;

use crate::instr::Instr;
use crate::program::{FunctionMode, VarId};
use crate::types::{PrimitiveType, TypeId};

use super::parser::{DefKey, Parser};
use super::{StackSlot, MAX_OPERATORS, MAX_PARAMETERS};

#[derive(Debug, Clone, Copy)]
struct PendingOperator {
    kind: TokenKind,
    prec: i32,
    unary: bool,
    /// Token position, for error messages.
    pos: usize,
    /// Address of the `SkipIf*` emitted for a short-circuit operator.
    branch_addr: usize,
}

fn operator_precedence(kind: TokenKind, expect_value: bool) -> i32 {
    if expect_value {
        match kind {
            TokenKind::Complement
            | TokenKind::Plus
            | TokenKind::Minus
            | TokenKind::Not => 12,
            _ => -1,
        }
    } else {
        match kind {
            TokenKind::Reassign
            | TokenKind::PlusAssign
            | TokenKind::MinusAssign
            | TokenKind::MultiplyAssign
            | TokenKind::DivideAssign
            | TokenKind::ModuloAssign
            | TokenKind::LeftShiftAssign
            | TokenKind::RightShiftAssign
            | TokenKind::LeftRotateAssign
            | TokenKind::RightRotateAssign
            | TokenKind::AndAssign
            | TokenKind::OrAssign
            | TokenKind::XorAssign => 0,

            TokenKind::OrOr => 2,
            TokenKind::AndAnd => 3,
            TokenKind::Equal | TokenKind::NotEqual => 4,
            TokenKind::Greater
            | TokenKind::GreaterOrEqual
            | TokenKind::Less
            | TokenKind::LessOrEqual => 5,
            TokenKind::Or => 6,
            TokenKind::Xor => 7,
            TokenKind::And => 8,
            TokenKind::LeftShift
            | TokenKind::RightShift
            | TokenKind::LeftRotate
            | TokenKind::RightRotate => 9,
            TokenKind::Plus | TokenKind::Minus => 10,
            TokenKind::Multiply | TokenKind::Divide | TokenKind::Modulo => 11,

            _ => -1,
        }
    }
}

impl Parser<'_> {
    /// Parse one expression and return its result slot. `tolerate_assign`
    /// enables the "did you mean '==' or ':='?" recovery for a bare `=`.
    pub(crate) fn parse_expression(&mut self, tolerate_assign: bool) -> StackSlot {
        let start_len = self.stack.len();
        let slot = self.parse_expression_inner(tolerate_assign, start_len);
        self.stack.truncate(start_len);
        slot
    }

    fn parse_expression_inner(&mut self, tolerate_assign: bool, start_len: usize) -> StackSlot {
        let null_slot = StackSlot::anonymous(PrimitiveType::Null.id());

        let mut operators: Vec<PendingOperator> = Vec::new();
        let mut expect_value = true;
        let mut parentheses = 0usize;

        // Used to detect "empty" expressions.
        let prev_offset = self.pos;

        while self.pos < self.file.tokens.len() {
            let tok_pos = self.pos;
            let tok_kind = self.file.tokens[tok_pos].kind;
            self.pos += 1;

            if tok_kind == TokenKind::LeftParenthesis {
                if !expect_value {
                    self.pos -= 1;
                    self.unexpected_expr_token(expect_value, parentheses);
                    return null_slot;
                }
                operators.push(PendingOperator {
                    kind: tok_kind,
                    prec: 0,
                    unary: false,
                    pos: tok_pos,
                    branch_addr: 0,
                });
                parentheses += 1;
            } else if parentheses > 0 && tok_kind == TokenKind::RightParenthesis {
                if expect_value {
                    self.pos -= 1;
                    self.unexpected_expr_token(expect_value, parentheses);
                    return null_slot;
                }
                expect_value = false;

                while let Some(op) = operators.pop() {
                    if op.kind == TokenKind::LeftParenthesis {
                        parentheses -= 1;
                        break;
                    }
                    self.produce_operator(&op);
                }
            } else if matches!(
                tok_kind,
                TokenKind::Null
                    | TokenKind::Bool
                    | TokenKind::Integer
                    | TokenKind::Float
                    | TokenKind::String
                    | TokenKind::Identifier
            ) {
                if !expect_value {
                    self.pos -= 1;
                    self.unexpected_expr_token(expect_value, parentheses);
                    return null_slot;
                }
                expect_value = false;

                if !self.parse_value(tok_pos, tok_kind) {
                    return null_slot;
                }
            } else {
                let mut op = PendingOperator {
                    kind: tok_kind,
                    prec: operator_precedence(tok_kind, expect_value),
                    unary: expect_value,
                    pos: tok_pos,
                    branch_addr: 0,
                };
                // In type position (`let x: Int := ...`) the assignment
                // belongs to the enclosing declaration, not the type
                // expression.
                if !tolerate_assign && op.kind == TokenKind::Reassign {
                    op.prec = -1;
                }

                // Not an operator? There are a few cases to deal with,
                // including a perfectly valid one: end of expression.
                if op.prec < 0 {
                    if self.pos == prev_offset + 1 {
                        self.mark_error(
                            tok_pos,
                            format!(
                                "Unexpected token '{}', expected value or expression",
                                tok_kind.name()
                            ),
                        );
                        self.recover_expression();
                        return null_slot;
                    } else if expect_value || parentheses > 0 {
                        self.pos -= 1;
                        if self.skip_new_lines() {
                            continue;
                        }
                        self.unexpected_expr_token(expect_value, parentheses);
                        return null_slot;
                    } else if tolerate_assign && tok_kind == TokenKind::Assign {
                        self.mark_error(
                            tok_pos,
                            "Unexpected token '=', did you mean '==' or ':='?".to_string(),
                        );

                        // Pretend the user meant '==' to recover.
                        op.kind = TokenKind::Equal;
                        op.prec = operator_precedence(TokenKind::Equal, false);
                    } else {
                        self.pos -= 1;
                        break;
                    }
                }

                if expect_value != op.unary {
                    self.pos -= 1;
                    self.unexpected_expr_token(expect_value, parentheses);
                    return null_slot;
                }
                expect_value = true;

                while let Some(&top) = operators.last() {
                    if top.kind == TokenKind::LeftParenthesis {
                        break;
                    }
                    let right_associative = top.unary || top.kind == TokenKind::Reassign;
                    if top.prec - i32::from(right_associative) < op.prec {
                        break;
                    }
                    operators.pop();
                    self.produce_operator(&top);
                }

                if op.kind == TokenKind::Reassign {
                    // The target's load is useless; its stack slot stays so
                    // the store can find the variable later.
                    self.trim_instructions(1);
                } else if op.kind == TokenKind::AndAnd {
                    op.branch_addr = self.program.ir.len();
                    self.program.ir.push(Instr::SkipIfFalse(0));
                } else if op.kind == TokenKind::OrOr {
                    op.branch_addr = self.program.ir.len();
                    self.program.ir.push(Instr::SkipIfTrue(0));
                }

                if operators.len() >= MAX_OPERATORS {
                    self.mark_error(
                        tok_pos,
                        "Too many operators on the stack (compiler limitation)".to_string(),
                    );
                    self.recover_expression();
                    return null_slot;
                }
                operators.push(op);
            }
        }

        if self.pos >= self.file.tokens.len() && (expect_value || parentheses > 0) {
            self.flag_eof();
            self.mark_error(
                self.pos,
                "Unexpected end of file, expected value or '('".to_string(),
            );
            return null_slot;
        }

        // Discharge the remaining operators.
        while let Some(op) = operators.pop() {
            if op.kind != TokenKind::LeftParenthesis {
                self.produce_operator(&op);
            }
        }

        debug_assert!(self.stack.len() == start_len + 1 || !self.show_errors);
        match self.stack.last() {
            Some(&slot) => slot,
            None => null_slot,
        }
    }

    fn parse_value(&mut self, tok_pos: usize, tok_kind: TokenKind) -> bool {
        use blik_lexer::Payload;

        let token = &self.file.tokens[tok_pos];
        match tok_kind {
            TokenKind::Null => {
                self.program.ir.push(Instr::PushNull);
                self.stack
                    .push(StackSlot::anonymous(PrimitiveType::Null.id()));
            }
            TokenKind::Bool => {
                let value = matches!(token.payload, Payload::Bool(true));
                self.program.ir.push(Instr::PushBool(value));
                self.stack
                    .push(StackSlot::anonymous(PrimitiveType::Bool.id()));
            }
            TokenKind::Integer => {
                let value = match token.payload {
                    Payload::Int(v) => v,
                    _ => 0,
                };
                self.program.ir.push(Instr::PushInt(value));
                self.stack
                    .push(StackSlot::anonymous(PrimitiveType::Int.id()));
            }
            TokenKind::Float => {
                let value = match token.payload {
                    Payload::Float(v) => v,
                    _ => 0.0,
                };
                self.program.ir.push(Instr::PushFloat(value));
                self.stack
                    .push(StackSlot::anonymous(PrimitiveType::Float.id()));
            }
            TokenKind::String => {
                let text = token.text().unwrap_or_default().to_string();
                let id = self.program.intern(&text);
                self.program.ir.push(Instr::PushString(id));
                self.stack
                    .push(StackSlot::anonymous(PrimitiveType::String.id()));
            }
            TokenKind::Identifier => {
                let name = token.text().unwrap_or_default().to_string();

                if self.match_token(TokenKind::LeftParenthesis) {
                    if !self.parse_call(&name, tok_pos) {
                        self.recover_expression();
                        return false;
                    }
                } else if let Some(var_id) = self.program.variable_named(&name) {
                    if self.poisoned.contains(&var_id) {
                        self.show_errors = false;
                    }
                    match self.program.var(var_id).ty {
                        Some(ty) => self.emit_load(var_id, ty),
                        None => {
                            self.mark_error(
                                tok_pos,
                                format!("Cannot use variable '{name}' before it is defined"),
                            );
                            self.recover_expression();
                            return false;
                        }
                    }
                } else if let Some(ty) = self.program.type_by_name(&name) {
                    self.program.ir.push(Instr::PushType(ty));
                    self.stack
                        .push(StackSlot::anonymous(PrimitiveType::Type.id()));
                } else {
                    self.mark_error(
                        tok_pos,
                        format!("Reference to unknown identifier '{name}'"),
                    );
                    self.recover_expression();
                    return false;
                }
            }
            _ => unreachable!("not a value token"),
        }
        true
    }

    fn produce_operator(&mut self, op: &PendingOperator) {
        let bool_ty = PrimitiveType::Bool.id();
        let mut success = false;

        if op.prec == 0 {
            // Assignment family.
            debug_assert!(!op.unary);
            if self.stack.len() < 2 {
                debug_assert!(!self.valid);
                return;
            }

            let target = self.stack[self.stack.len() - 2].var;
            let expr_ty = self.stack[self.stack.len() - 1].ty;

            let Some(var_id) = target else {
                self.mark_error(
                    op.pos,
                    "Cannot assign result to temporary value; left operand should be a variable"
                        .to_string(),
                );
                return;
            };
            if !self.program.var(var_id).mutable {
                let name = self.program.var(var_id).name.clone();
                self.mark_error(
                    op.pos,
                    format!("Cannot assign result to non-mutable variable '{name}'"),
                );
                self.hint_def(
                    DefKey::Var(var_id),
                    format!("Variable '{name}' is defined without 'mut' qualifier"),
                );
                return;
            }
            let var_ty = self.program.var(var_id).ty.unwrap_or(PrimitiveType::Null.id());
            if var_ty != expr_ty {
                let name = self.program.var(var_id).name.clone();
                let got = self.program.type_info(expr_ty).signature.clone();
                let expected = self.program.type_info(var_ty).signature.clone();
                self.mark_error(
                    op.pos,
                    format!("Cannot assign {got} value to variable '{name}'"),
                );
                self.hint_def(
                    DefKey::Var(var_id),
                    format!("Variable '{name}' is defined as {expected}"),
                );
                return;
            }

            let lhs_ty = self.stack[self.stack.len() - 2].ty;
            match op.kind {
                TokenKind::Reassign => {
                    self.stack.pop();
                    if let Some(top) = self.stack.last_mut() {
                        top.var = None;
                    }
                    success = true;
                }
                TokenKind::PlusAssign => {
                    success = self.emit_operator2(PrimitiveType::Int, Instr::AddInt, lhs_ty)
                        || self.emit_operator2(PrimitiveType::Float, Instr::AddFloat, lhs_ty);
                }
                TokenKind::MinusAssign => {
                    success = self.emit_operator2(PrimitiveType::Int, Instr::SubstractInt, lhs_ty)
                        || self.emit_operator2(PrimitiveType::Float, Instr::SubstractFloat, lhs_ty);
                }
                TokenKind::MultiplyAssign => {
                    success = self.emit_operator2(PrimitiveType::Int, Instr::MultiplyInt, lhs_ty)
                        || self.emit_operator2(PrimitiveType::Float, Instr::MultiplyFloat, lhs_ty);
                }
                TokenKind::DivideAssign => {
                    success = self.emit_operator2(PrimitiveType::Int, Instr::DivideInt, lhs_ty)
                        || self.emit_operator2(PrimitiveType::Float, Instr::DivideFloat, lhs_ty);
                }
                TokenKind::ModuloAssign => {
                    success = self.emit_operator2(PrimitiveType::Int, Instr::ModuloInt, lhs_ty);
                }
                TokenKind::AndAssign => {
                    success = self.emit_operator2(PrimitiveType::Int, Instr::AndInt, lhs_ty)
                        || self.emit_operator2(PrimitiveType::Bool, Instr::AndBool, lhs_ty);
                }
                TokenKind::OrAssign => {
                    success = self.emit_operator2(PrimitiveType::Int, Instr::OrInt, lhs_ty)
                        || self.emit_operator2(PrimitiveType::Bool, Instr::OrBool, lhs_ty);
                }
                TokenKind::XorAssign => {
                    success = self.emit_operator2(PrimitiveType::Int, Instr::XorInt, lhs_ty)
                        || self.emit_operator2(PrimitiveType::Bool, Instr::NotEqualBool, lhs_ty);
                }
                TokenKind::LeftShiftAssign => {
                    success = self.emit_operator2(PrimitiveType::Int, Instr::LeftShiftInt, lhs_ty);
                }
                TokenKind::RightShiftAssign => {
                    success = self.emit_operator2(PrimitiveType::Int, Instr::RightShiftInt, lhs_ty);
                }
                TokenKind::LeftRotateAssign => {
                    success = self.emit_operator2(PrimitiveType::Int, Instr::LeftRotateInt, lhs_ty);
                }
                TokenKind::RightRotateAssign => {
                    success =
                        self.emit_operator2(PrimitiveType::Int, Instr::RightRotateInt, lhs_ty);
                }
                _ => unreachable!("not an assignment operator"),
            }

            // The assignment's value stays on the stack: Copy writes the
            // slot without popping.
            let (global, offset) = {
                let var = self.program.var(var_id);
                (var.global, var.offset)
            };
            let instr = match (self.program.primitive_of(var_ty), global) {
                (PrimitiveType::Null, _) => None,
                (PrimitiveType::Bool, true) => Some(Instr::CopyBool(offset)),
                (PrimitiveType::Int, true) => Some(Instr::CopyInt(offset)),
                (PrimitiveType::Float, true) => Some(Instr::CopyFloat(offset)),
                (PrimitiveType::String, true) => Some(Instr::CopyString(offset)),
                (PrimitiveType::Type, true) => Some(Instr::CopyType(offset)),
                (PrimitiveType::Bool, false) => Some(Instr::CopyLocalBool(offset)),
                (PrimitiveType::Int, false) => Some(Instr::CopyLocalInt(offset)),
                (PrimitiveType::Float, false) => Some(Instr::CopyLocalFloat(offset)),
                (PrimitiveType::String, false) => Some(Instr::CopyLocalString(offset)),
                (PrimitiveType::Type, false) => Some(Instr::CopyLocalType(offset)),
            };
            if let Some(instr) = instr {
                self.program.ir.push(instr);
            }
        } else {
            if self.stack.len() < if op.unary { 1 } else { 2 } {
                debug_assert!(!self.valid);
                return;
            }

            match op.kind {
                TokenKind::Plus => {
                    if op.unary {
                        let primitive =
                            self.program.primitive_of(self.stack[self.stack.len() - 1].ty);
                        success = matches!(primitive, PrimitiveType::Int | PrimitiveType::Float);
                    } else {
                        let out = self.stack[self.stack.len() - 2].ty;
                        success = self.emit_operator2(PrimitiveType::Int, Instr::AddInt, out)
                            || self.emit_operator2(PrimitiveType::Float, Instr::AddFloat, out);
                    }
                }
                TokenKind::Minus => {
                    if op.unary {
                        match self.program.ir.last_mut() {
                            // Negating a literal rewrites it in place; the
                            // value flips sign on each successive '-', so
                            // `-----64` still works.
                            Some(Instr::PushInt(value)) => {
                                *value = value.wrapping_neg();
                                success = true;
                            }
                            Some(Instr::PushFloat(value)) => {
                                *value = -*value;
                                success = true;
                            }
                            // Negation is an involution.
                            Some(Instr::NegateInt) | Some(Instr::NegateFloat) => {
                                self.trim_instructions(1);
                                success = true;
                            }
                            _ => {
                                let out = self.stack[self.stack.len() - 1].ty;
                                success =
                                    self.emit_operator1(PrimitiveType::Int, Instr::NegateInt, out)
                                        || self.emit_operator1(
                                            PrimitiveType::Float,
                                            Instr::NegateFloat,
                                            out,
                                        );
                            }
                        }
                    } else {
                        let out = self.stack[self.stack.len() - 2].ty;
                        success = self.emit_operator2(PrimitiveType::Int, Instr::SubstractInt, out)
                            || self.emit_operator2(PrimitiveType::Float, Instr::SubstractFloat, out);
                    }
                }
                TokenKind::Multiply => {
                    let out = self.stack[self.stack.len() - 2].ty;
                    success = self.emit_operator2(PrimitiveType::Int, Instr::MultiplyInt, out)
                        || self.emit_operator2(PrimitiveType::Float, Instr::MultiplyFloat, out);
                }
                TokenKind::Divide => {
                    let out = self.stack[self.stack.len() - 2].ty;
                    success = self.emit_operator2(PrimitiveType::Int, Instr::DivideInt, out)
                        || self.emit_operator2(PrimitiveType::Float, Instr::DivideFloat, out);
                }
                TokenKind::Modulo => {
                    let out = self.stack[self.stack.len() - 2].ty;
                    success = self.emit_operator2(PrimitiveType::Int, Instr::ModuloInt, out);
                }

                TokenKind::Equal => {
                    success = self.emit_operator2(PrimitiveType::Int, Instr::EqualInt, bool_ty)
                        || self.emit_operator2(PrimitiveType::Float, Instr::EqualFloat, bool_ty)
                        || self.emit_operator2(PrimitiveType::Bool, Instr::EqualBool, bool_ty)
                        || self.emit_operator2(PrimitiveType::Type, Instr::EqualType, bool_ty);
                }
                TokenKind::NotEqual => {
                    success = self.emit_operator2(PrimitiveType::Int, Instr::NotEqualInt, bool_ty)
                        || self.emit_operator2(PrimitiveType::Float, Instr::NotEqualFloat, bool_ty)
                        || self.emit_operator2(PrimitiveType::Bool, Instr::NotEqualBool, bool_ty)
                        || self.emit_operator2(PrimitiveType::Type, Instr::NotEqualType, bool_ty);
                }
                TokenKind::Greater => {
                    success = self
                        .emit_operator2(PrimitiveType::Int, Instr::GreaterThanInt, bool_ty)
                        || self.emit_operator2(
                            PrimitiveType::Float,
                            Instr::GreaterThanFloat,
                            bool_ty,
                        );
                }
                TokenKind::GreaterOrEqual => {
                    success = self
                        .emit_operator2(PrimitiveType::Int, Instr::GreaterOrEqualInt, bool_ty)
                        || self.emit_operator2(
                            PrimitiveType::Float,
                            Instr::GreaterOrEqualFloat,
                            bool_ty,
                        );
                }
                TokenKind::Less => {
                    success = self.emit_operator2(PrimitiveType::Int, Instr::LessThanInt, bool_ty)
                        || self.emit_operator2(PrimitiveType::Float, Instr::LessThanFloat, bool_ty);
                }
                TokenKind::LessOrEqual => {
                    success = self
                        .emit_operator2(PrimitiveType::Int, Instr::LessOrEqualInt, bool_ty)
                        || self.emit_operator2(
                            PrimitiveType::Float,
                            Instr::LessOrEqualFloat,
                            bool_ty,
                        );
                }

                TokenKind::And => {
                    let out = self.stack[self.stack.len() - 2].ty;
                    success = self.emit_operator2(PrimitiveType::Int, Instr::AndInt, out)
                        || self.emit_operator2(PrimitiveType::Bool, Instr::AndBool, out);
                }
                TokenKind::Or => {
                    let out = self.stack[self.stack.len() - 2].ty;
                    success = self.emit_operator2(PrimitiveType::Int, Instr::OrInt, out)
                        || self.emit_operator2(PrimitiveType::Bool, Instr::OrBool, out);
                }
                TokenKind::Xor => {
                    let out = self.stack[self.stack.len() - 2].ty;
                    success = self.emit_operator2(PrimitiveType::Int, Instr::XorInt, out)
                        || self.emit_operator2(PrimitiveType::Bool, Instr::NotEqualBool, out);
                }
                TokenKind::Complement => {
                    let out = self.stack[self.stack.len() - 1].ty;
                    success = self.emit_operator1(PrimitiveType::Int, Instr::ComplementInt, out)
                        || self.emit_operator1(PrimitiveType::Bool, Instr::NotBool, out);
                }
                TokenKind::LeftShift => {
                    let out = self.stack[self.stack.len() - 2].ty;
                    success = self.emit_operator2(PrimitiveType::Int, Instr::LeftShiftInt, out);
                }
                TokenKind::RightShift => {
                    let out = self.stack[self.stack.len() - 2].ty;
                    success = self.emit_operator2(PrimitiveType::Int, Instr::RightShiftInt, out);
                }
                TokenKind::LeftRotate => {
                    let out = self.stack[self.stack.len() - 2].ty;
                    success = self.emit_operator2(PrimitiveType::Int, Instr::LeftRotateInt, out);
                }
                TokenKind::RightRotate => {
                    let out = self.stack[self.stack.len() - 2].ty;
                    success = self.emit_operator2(PrimitiveType::Int, Instr::RightRotateInt, out);
                }

                TokenKind::Not => {
                    let out = self.stack[self.stack.len() - 1].ty;
                    success = self.emit_operator1(PrimitiveType::Bool, Instr::NotBool, out);
                }

                TokenKind::AndAnd => {
                    let out = self.stack[self.stack.len() - 2].ty;
                    success = self.emit_operator2(PrimitiveType::Bool, Instr::AndBool, out);

                    debug_assert!(matches!(
                        self.program.ir.get(op.branch_addr),
                        Some(Instr::SkipIfFalse(_))
                    ));
                    let target = self.program.ir.len();
                    self.set_jump_target(op.branch_addr, target);
                }
                TokenKind::OrOr => {
                    let out = self.stack[self.stack.len() - 2].ty;
                    success = self.emit_operator2(PrimitiveType::Bool, Instr::OrBool, out);

                    debug_assert!(matches!(
                        self.program.ir.get(op.branch_addr),
                        Some(Instr::SkipIfTrue(_))
                    ));
                    let target = self.program.ir.len();
                    self.set_jump_target(op.branch_addr, target);
                }

                _ => unreachable!("not an operator: {:?}", op.kind),
            }
        }

        if !success {
            if op.unary {
                let ty = self
                    .program
                    .type_info(self.stack[self.stack.len() - 1].ty)
                    .signature
                    .clone();
                self.mark_error(
                    op.pos,
                    format!("Cannot use '{}' operator on {ty} value", op.kind.name()),
                );
            } else {
                let lhs = self
                    .program
                    .type_info(self.stack[self.stack.len() - 2].ty)
                    .signature
                    .clone();
                let rhs = self
                    .program
                    .type_info(self.stack[self.stack.len() - 1].ty)
                    .signature
                    .clone();
                if lhs == rhs {
                    self.mark_error(
                        op.pos,
                        format!("Cannot use '{}' operator on {lhs} values", op.kind.name()),
                    );
                } else {
                    self.mark_error(
                        op.pos,
                        format!(
                            "Cannot use '{}' operator on {lhs} and {rhs} values",
                            op.kind.name()
                        ),
                    );
                }
            }
        }
    }

    fn emit_operator1(&mut self, primitive: PrimitiveType, instr: Instr, out_ty: TypeId) -> bool {
        let slot = self.stack[self.stack.len() - 1];
        if self.program.primitive_of(slot.ty) == primitive {
            self.program.ir.push(instr);
            let len = self.stack.len();
            self.stack[len - 1] = StackSlot::anonymous(out_ty);
            true
        } else {
            false
        }
    }

    fn emit_operator2(&mut self, primitive: PrimitiveType, instr: Instr, out_ty: TypeId) -> bool {
        let lhs = self.stack[self.stack.len() - 2];
        let rhs = self.stack[self.stack.len() - 1];

        if lhs.ty == rhs.ty && self.program.primitive_of(lhs.ty) == primitive {
            self.program.ir.push(instr);
            self.stack.pop();
            let len = self.stack.len();
            self.stack[len - 1] = StackSlot::anonymous(out_ty);
            true
        } else {
            false
        }
    }

    pub(crate) fn emit_load(&mut self, var_id: VarId, ty: TypeId) {
        let (global, offset) = {
            let var = self.program.var(var_id);
            (var.global, var.offset)
        };

        if global {
            // Reading a global from inside a function is only sound when no
            // call to that function can happen before the global exists.
            if let Some(func_id) = self.current_func {
                let earliest = self.program.func(func_id).earliest_call_addr;
                if earliest < self.program.var(var_id).ready_addr {
                    let func_name = self.program.func(func_id).name.clone();
                    let var_name = self.program.var(var_id).name.clone();
                    let func_pos = self
                        .definitions
                        .get(&DefKey::Func(func_id))
                        .copied()
                        .unwrap_or(0);
                    let call_pos = self.program.func(func_id).earliest_call_pos;

                    self.mark_error(
                        func_pos,
                        format!(
                            "Function '{func_name}' may be called before variable \
                             '{var_name}' exists"
                        ),
                    );
                    self.hint(
                        (call_pos != usize::MAX).then_some(call_pos),
                        "Function call happens here (it could be indirect)".to_string(),
                    );
                    self.hint_def(
                        DefKey::Var(var_id),
                        format!("Variable '{var_name}' is defined here"),
                    );
                }
            }

            let instr = match self.program.primitive_of(ty) {
                PrimitiveType::Null => Instr::PushNull,
                PrimitiveType::Bool => Instr::LoadBool(offset),
                PrimitiveType::Int => Instr::LoadInt(offset),
                PrimitiveType::Float => Instr::LoadFloat(offset),
                PrimitiveType::String => Instr::LoadString(offset),
                PrimitiveType::Type => Instr::LoadType(offset),
            };
            self.program.ir.push(instr);
        } else {
            let instr = match self.program.primitive_of(ty) {
                PrimitiveType::Null => Instr::PushNull,
                PrimitiveType::Bool => Instr::LoadLocalBool(offset),
                PrimitiveType::Int => Instr::LoadLocalInt(offset),
                PrimitiveType::Float => Instr::LoadLocalFloat(offset),
                PrimitiveType::String => Instr::LoadLocalString(offset),
                PrimitiveType::Type => Instr::LoadLocalType(offset),
            };
            self.program.ir.push(instr);
        }

        self.stack.push(StackSlot {
            ty,
            var: Some(var_id),
        });
    }

    /// Parse a call's arguments, pick the overload, and emit the call or
    /// intrinsic. Only called from `parse_value`, right after the opening
    /// parenthesis was consumed.
    fn parse_call(&mut self, name: &str, call_pos: usize) -> bool {
        let call_addr = self.program.ir.len();

        let Some(head) = self.program.function_named(name) else {
            self.mark_error(call_pos, format!("Function '{name}' does not exist"));
            return false;
        };

        // print/printLn interleave a Print with every argument instead of
        // going through the generic call path.
        if self.program.func(head).mode == FunctionMode::Intrinsic
            && (name == "print" || name == "printLn")
        {
            return self.parse_print_call(name == "printLn");
        }

        let (variadic, fixed_params) = {
            let func = self.program.func(head);
            (func.variadic, func.params.len())
        };

        let mut args: Vec<TypeId> = Vec::new();
        if !self.match_token(TokenKind::RightParenthesis) {
            loop {
                self.skip_new_lines();

                if args.len() >= MAX_PARAMETERS {
                    self.mark_error(
                        self.pos,
                        format!("Functions cannot take more than {MAX_PARAMETERS} arguments"),
                    );
                    return false;
                }

                let ty = self.parse_expression(true).ty;
                args.push(ty);
                // Extra variadic arguments carry a type tag. The tag can
                // only be emitted once the argument's code is in place, so
                // on the stack it sits above its value; `CallNative` turns
                // that into the (type, value) pair order natives see.
                if variadic && args.len() > fixed_params {
                    self.program.ir.push(Instr::PushType(ty));
                }

                if !self.match_token(TokenKind::Comma) {
                    break;
                }
            }
            self.skip_new_lines();
            self.consume(TokenKind::RightParenthesis);
        }
        if variadic {
            let extra = (args.len() - fixed_params.min(args.len())) as i64;
            self.program.ir.push(Instr::PushInt(extra));
        }

        // Walk the overload ring for a matching candidate. Variadic
        // functions cannot be overloaded, but the same test covers their
        // fixed-prefix types.
        let mut func_id = head;
        while !self.test_overload(func_id, &args) {
            func_id = self.program.func(func_id).overload_next;

            if func_id == head {
                let arg_list = args
                    .iter()
                    .map(|&ty| self.program.type_info(ty).signature.clone())
                    .collect::<Vec<_>>()
                    .join(", ");
                let func_name = self.program.func(head).name.clone();
                self.mark_error(
                    call_pos,
                    format!("Cannot call '{func_name}' with ({arg_list}) arguments"),
                );

                let mut it = head;
                loop {
                    let signature = self.program.func(it).signature.clone();
                    self.hint_def(DefKey::Func(it), format!("Candidate '{signature}'"));
                    it = self.program.func(it).overload_next;
                    if it == head {
                        break;
                    }
                }
                return false;
            }
        }

        match self.program.func(func_id).mode {
            FunctionMode::Intrinsic => {
                self.emit_intrinsic(func_id, call_pos, call_addr, &args);
            }
            FunctionMode::Native => {
                self.program.ir.push(Instr::CallNative(func_id));
            }
            FunctionMode::Blik => {
                if self.program.func(func_id).addr.is_none() {
                    // Forward call: remember the earliest point this
                    // function may run, propagating transitively through
                    // the current caller.
                    let (pos, addr) = match self.current_func {
                        Some(cur) if cur != func_id => {
                            let caller = self.program.func(cur);
                            (caller.earliest_call_pos, caller.earliest_call_addr)
                        }
                        _ => (call_pos, self.program.ir.len()),
                    };
                    let func = self.program.func_mut(func_id);
                    func.earliest_call_pos = func.earliest_call_pos.min(pos);
                    func.earliest_call_addr = func.earliest_call_addr.min(addr);
                }

                self.program.ir.push(Instr::Call(func_id));
            }
        }

        let ret_type = self.program.func(func_id).ret_type;
        self.stack.push(StackSlot::anonymous(ret_type));
        true
    }

    /// `print`/`printLn`: one `Print` per argument, popping as it goes, and
    /// a `PushNull` as the call's value.
    fn parse_print_call(&mut self, newline: bool) -> bool {
        if !self.match_token(TokenKind::RightParenthesis) {
            loop {
                self.skip_new_lines();

                let slot = self.parse_expression(true);
                let primitive = self.program.primitive_of(slot.ty);
                self.program.ir.push(Instr::Print(primitive));

                if !self.match_token(TokenKind::Comma) {
                    break;
                }
            }
            self.skip_new_lines();
            self.consume(TokenKind::RightParenthesis);
        }

        if newline {
            let nl = self.program.intern("\n");
            self.program.ir.push(Instr::PushString(nl));
            self.program.ir.push(Instr::Print(PrimitiveType::String));
        }

        self.program.ir.push(Instr::PushNull);
        self.stack
            .push(StackSlot::anonymous(PrimitiveType::Null.id()));
        true
    }

    fn emit_intrinsic(
        &mut self,
        func_id: crate::program::FuncId,
        call_pos: usize,
        call_addr: usize,
        args: &[TypeId],
    ) {
        match self.program.func(func_id).name.as_str() {
            "Float" => {
                if self.program.primitive_of(args[0]) == PrimitiveType::Int {
                    self.program.ir.push(Instr::IntToFloat);
                }
                // Float(Float) is the identity and emits nothing.
            }
            "Int" => {
                if self.program.primitive_of(args[0]) == PrimitiveType::Float {
                    self.program.ir.push(Instr::FloatToInt);
                }
            }
            "typeOf" => {
                if args.len() != 1 {
                    self.mark_error(
                        call_pos,
                        "Intrinsic function typeOf() takes one argument".to_string(),
                    );
                    return;
                }

                // typeOf() does not execute anything: the argument's code is
                // erased and its compile-time type pushed instead.
                let emitted = self.program.ir.len() - call_addr;
                self.trim_instructions(emitted);
                self.program.ir.push(Instr::PushType(args[0]));
            }
            other => {
                debug_assert!(false, "unknown intrinsic '{other}'");
            }
        }
    }

    pub(crate) fn parse_expression_of_type(&mut self, ty: TypeId) -> bool {
        let expr_pos = self.pos;

        let actual = self.parse_expression(true).ty;
        if actual != ty {
            let expected = self.program.type_info(ty).signature.clone();
            let got = self.program.type_info(actual).signature.clone();
            self.mark_error(
                expr_pos,
                format!("Expected expression result type to be {expected}, not {got}"),
            );
            return false;
        }
        true
    }

    /// Report the token at the current position as unexpected. Callers must
    /// leave `pos` pointing at the offending token.
    fn unexpected_expr_token(&mut self, expect_value: bool, parentheses: usize) {
        let expected = if expect_value {
            "value or '('"
        } else if parentheses > 0 {
            "operator or ')'"
        } else {
            "operator or end of expression"
        };
        let kind = self
            .file
            .tokens
            .get(self.pos)
            .map(|t| t.kind.name())
            .unwrap_or("end of file");
        self.mark_error(
            self.pos,
            format!("Unexpected token '{kind}', expected {expected}"),
        );
        self.recover_expression();
    }

    /// Skip ahead to `do`, a newline or a semicolon so the enclosing
    /// statement can tell single-line constructs from block constructs and
    /// avoid follow-on noise.
    fn recover_expression(&mut self) {
        while self.pos < self.file.tokens.len()
            && !matches!(
                self.file.tokens[self.pos].kind,
                TokenKind::Do | TokenKind::EndOfLine | TokenKind::Semicolon
            )
        {
            self.pos += 1;
        }
    }
}
