//! Statement-level parsing: prototypes, declarations, control flow, and the
//! compile/rollback driver state.

use std::collections::{HashMap, HashSet};
use std::ops::Range;

use blik_lexer::{Diagnostic, TokenKind, TokenizedFile};

use crate::instr::Instr;
use crate::program::{
    FuncId, FunctionInfo, FunctionMode, Parameter, Program, SourceInfo, VarId, VariableInfo,
};
use crate::types::{PrimitiveType, TypeId};

use super::{CompileReport, StackSlot, MAX_PARAMETERS};

/// Hintable definition sites, collected transiently during one parse.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) enum DefKey {
    Func(FuncId),
    Var(VarId),
    Param(FuncId, usize),
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct Prototype {
    pub func: FuncId,
    pub body_pos: usize,
}

/// Break/continue patch chains for the innermost loop. The chains are
/// singly linked through the pending jumps' own operands (absolute
/// addresses, `-1` ends the chain).
#[derive(Debug, Clone, Copy)]
pub(crate) struct LoopContext {
    pub var_offset: usize,
    pub break_addr: i64,
    pub continue_addr: i64,
}

pub(crate) struct Parser<'a> {
    pub(crate) program: &'a mut Program,
    pub(crate) file: &'a TokenizedFile,
    pub(crate) pos: usize,
    pub(crate) prev_ir_len: usize,
    pub(crate) valid: bool,
    pub(crate) show_errors: bool,
    pub(crate) show_hints: bool,
    /// Index of this parse's [`SourceInfo`] in the program.
    pub(crate) src: usize,
    pub(crate) report: CompileReport,

    pub(crate) prototypes: HashMap<usize, Prototype>,
    pub(crate) definitions: HashMap<DefKey, usize>,
    pub(crate) poisoned: HashSet<VarId>,

    /// Jump emitted before the latest run of consecutive function bodies;
    /// extended instead of duplicated when functions are adjacent.
    pub(crate) func_jump_addr: Option<usize>,
    pub(crate) current_func: Option<FuncId>,
    /// Variable-table indices of the current function's parameters.
    pub(crate) param_range: Range<usize>,
    pub(crate) depth: i32,
    pub(crate) var_offset: usize,
    pub(crate) loop_ctx: Option<LoopContext>,

    /// Operand-type stack, only meaningful while an expression is parsed.
    pub(crate) stack: Vec<StackSlot>,
}

impl<'a> Parser<'a> {
    pub(crate) fn new(program: &'a mut Program, file: &'a TokenizedFile) -> Self {
        let prev_ir_len = program.ir.len();
        let var_offset = program.global_offset;
        Parser {
            program,
            file,
            pos: 0,
            prev_ir_len,
            valid: true,
            show_errors: true,
            show_hints: false,
            src: usize::MAX,
            report: CompileReport::default(),
            prototypes: HashMap::new(),
            definitions: HashMap::new(),
            poisoned: HashSet::new(),
            func_jump_addr: None,
            current_func: None,
            param_range: 0..0,
            depth: 0,
            var_offset,
            loop_ctx: None,
            stack: Vec::new(),
        }
    }

    pub(crate) fn into_report(self) -> CompileReport {
        self.report
    }

    pub(crate) fn parse(&mut self) -> bool {
        self.program.sources.push(SourceInfo {
            filename: self.file.filename.clone(),
            first_addr: self.program.ir.len(),
            lines: Vec::new(),
        });
        self.src = self.program.sources.len() - 1;

        // Top-level functions are order-independent: register every
        // prototype before the main walk.
        self.parse_prototypes();

        let start_addr = self.program.ir.len();
        self.push_line(start_addr, 0);
        while self.pos < self.file.tokens.len() {
            self.parse_statement();
        }

        debug_assert_eq!(self.depth, 0);
        debug_assert!(self.loop_ctx.is_none());
        debug_assert!(self.current_func.is_none());

        if self.valid {
            let globals = self.var_offset;
            self.program.ir.push(Instr::End(globals));
            self.program.global_offset = globals;
            self.program.sources[self.src].lines.sort_by_key(|l| l.addr);
        }
        self.valid
    }

    // ---- prototype pre-pass ----

    fn parse_prototypes(&mut self) {
        debug_assert!(self.prototypes.is_empty());
        debug_assert_eq!(self.pos, 0);

        // Pre-pass side effects (type expressions emit IR) are undone once
        // the prototypes are registered.
        let ir_len = self.program.ir.len();
        let lines_len = self.program.sources[self.src].lines.len();

        for i in 0..self.file.funcs.len() {
            self.pos = self.file.funcs[i] + 1;
            self.show_errors = true;

            let func_pos = self.pos;
            let func_id = FuncId(self.program.functions.len());
            self.program.functions.push(FunctionInfo {
                name: String::new(),
                signature: String::new(),
                mode: FunctionMode::Blik,
                params: Vec::new(),
                ret_type: PrimitiveType::Null.id(),
                addr: None,
                variadic: false,
                tail_recursive: false,
                overload_prev: func_id,
                overload_next: func_id,
                earliest_call_addr: usize::MAX,
                earliest_call_pos: usize::MAX,
                native: None,
            });
            self.definitions.insert(DefKey::Func(func_id), func_pos);

            let name = self.consume_identifier();
            self.program.func_mut(func_id).name = name.clone();
            self.program.publish_function(func_id);

            // Parameter variables exist only long enough to catch duplicate
            // names.
            let variables_len = self.program.variables.len();

            self.consume(TokenKind::LeftParenthesis);
            if !self.match_token(TokenKind::RightParenthesis) {
                loop {
                    self.skip_new_lines();

                    let param_pos = self.pos;
                    let mutable = self.match_token(TokenKind::Mut);
                    let param_name = self.consume_identifier();

                    let var_id = self.append_variable(param_name.clone(), mutable, false);
                    if let Some(prev) = self.bind_variable(var_id) {
                        // Collisions with globals are reported later, from
                        // the body pass, where all globals of this unit
                        // exist.
                        if !self.program.var(prev).global {
                            self.mark_error(
                                param_pos,
                                format!("Parameter named '{param_name}' already exists"),
                            );
                        }
                    }

                    self.consume(TokenKind::Colon);
                    let ty = self.parse_type();
                    self.program.var_mut(var_id).ty = Some(ty);

                    let param_count = self.program.func(func_id).params.len();
                    if param_count < MAX_PARAMETERS {
                        self.definitions
                            .insert(DefKey::Param(func_id, param_count), param_pos);
                        self.program.func_mut(func_id).params.push(Parameter {
                            name: param_name,
                            ty,
                            mutable,
                        });
                    } else {
                        self.mark_error(
                            self.pos - 1,
                            format!("Functions cannot have more than {MAX_PARAMETERS} parameters"),
                        );
                    }

                    if !self.match_token(TokenKind::Comma) {
                        break;
                    }
                }
                self.skip_new_lines();
                self.consume(TokenKind::RightParenthesis);
            }

            if self.match_token(TokenKind::Colon) {
                let ret = self.parse_type();
                self.program.func_mut(func_id).ret_type = ret;
            }

            // Build the full signature now that parameter and return types
            // are known.
            {
                let func = self.program.func(func_id);
                let mut signature = format!("{}(", func.name);
                for (i, param) in func.params.iter().enumerate() {
                    if i > 0 {
                        signature.push_str(", ");
                    }
                    signature.push_str(&self.program.type_info(param.ty).signature);
                }
                signature.push(')');
                if func.ret_type != PrimitiveType::Null.id() {
                    signature.push_str(": ");
                    signature.push_str(&self.program.type_info(func.ret_type).signature);
                }
                self.program.func_mut(func_id).signature = signature;
            }

            self.prototypes.insert(
                func_pos,
                Prototype {
                    func: func_id,
                    body_pos: self.pos,
                },
            );

            self.program.unbind_variables(variables_len);
        }

        self.pos = 0;
        self.program.ir.truncate(ir_len);
        self.program.sources[self.src].lines.truncate(lines_len);
    }

    // ---- statements ----

    /// Returns true when the statement guarantees a return on every path
    /// (return statements inside loops are not counted).
    fn parse_statement(&mut self) -> bool {
        self.show_errors = true;

        let kind = self.file.tokens[self.pos].kind;
        if matches!(kind, TokenKind::EndOfLine | TokenKind::Semicolon) {
            self.pos += 1;
            return false;
        }

        let line = self.file.tokens[self.pos].line;
        let addr = self.program.ir.len();
        self.push_line(addr, line);

        let mut has_return = false;
        match kind {
            TokenKind::Begin => {
                self.pos += 1;
                if self.end_statement() {
                    has_return = self.parse_block();
                    self.consume(TokenKind::End);
                    self.end_statement();
                }
            }
            TokenKind::Func => {
                self.parse_function();
                self.end_statement();
            }
            TokenKind::Return => {
                self.parse_return();
                has_return = true;
                self.end_statement();
            }
            TokenKind::Let => {
                self.parse_let();
                self.end_statement();
            }
            TokenKind::If => {
                has_return = self.parse_if();
                self.end_statement();
            }
            TokenKind::While => {
                self.parse_while();
                self.end_statement();
            }
            TokenKind::For => {
                self.parse_for();
                self.end_statement();
            }
            TokenKind::Break => {
                self.parse_break();
                self.end_statement();
            }
            TokenKind::Continue => {
                self.parse_continue();
                self.end_statement();
            }
            _ => {
                self.parse_expression(true);
                self.discard_result();
                self.end_statement();
            }
        }

        has_return
    }

    fn parse_block(&mut self) -> bool {
        self.show_errors = true;
        self.depth += 1;
        let prev_offset = self.var_offset;
        let variables_len = self.program.variables.len();

        let mut has_return = false;
        while self.pos < self.file.tokens.len()
            && self.file.tokens[self.pos].kind != TokenKind::Else
            && self.file.tokens[self.pos].kind != TokenKind::End
        {
            has_return |= self.parse_statement();
        }

        self.depth -= 1;
        self.emit_pop(self.var_offset.saturating_sub(prev_offset));
        self.program.unbind_variables(variables_len);
        self.var_offset = prev_offset;

        has_return
    }

    /// Single-statement `do` form: one expression, `return`, `break` or
    /// `continue`.
    fn parse_do(&mut self) -> bool {
        self.pos += 1;
        self.parse_do_tail()
    }

    fn parse_do_tail(&mut self) -> bool {
        if self.peek(TokenKind::Return) {
            self.parse_return();
            true
        } else if self.peek(TokenKind::Break) {
            self.parse_break();
            false
        } else if self.peek(TokenKind::Continue) {
            self.parse_continue();
            false
        } else {
            self.parse_expression(true);
            self.discard_result();
            false
        }
    }

    /// Loop/function bodies: `do <stmt>` inline, or a block (optionally
    /// opened by `do`) terminated by `end`.
    fn parse_body(&mut self) -> bool {
        if self.peek(TokenKind::Do) && !self.peek_kind_at(self.pos + 1, TokenKind::EndOfLine) {
            self.parse_do()
        } else {
            if self.peek(TokenKind::Do) {
                self.pos += 1;
            }
            if self.end_statement() {
                let has_return = self.parse_block();
                self.consume(TokenKind::End);
                has_return
            } else {
                false
            }
        }
    }

    fn parse_function(&mut self) {
        self.pos += 1;
        let func_pos = self.pos;

        let Some(proto) = self.prototypes.get(&func_pos).copied() else {
            // Every func keyword was recorded by the lexer, so the prototype
            // pass has seen this one.
            debug_assert!(false, "missing prototype at token {func_pos}");
            self.mark_error(func_pos, "Malformed function definition".to_string());
            return;
        };
        let func_id = proto.func;

        let prev_func = self.current_func;
        let prev_offset = self.var_offset;
        let prev_param_range = self.param_range.clone();

        // Safety checks the prototype pass could not do.
        if let Some(open) = self.current_func {
            self.mark_error(func_pos, "Nested functions are not supported".to_string());
            self.hint_def(
                DefKey::Func(open),
                "Previous function was started here and is still open".to_string(),
            );
        } else if self.depth != 0 {
            self.mark_error(
                func_pos,
                "Functions must be defined in top-level scope".to_string(),
            );
        }
        self.current_func = Some(func_id);

        // Skip the prototype tokens.
        self.var_offset = 0;
        self.pos = proto.body_pos;

        // Create parameter variables.
        let variables_len = self.program.variables.len();
        let params = self.program.func(func_id).params.clone();
        self.param_range = variables_len..variables_len + params.len();

        for (index, param) in params.iter().enumerate() {
            let param_pos = self
                .definitions
                .get(&DefKey::Param(func_id, index))
                .copied()
                .unwrap_or(func_pos);

            let var_id = self.append_variable(param.name.clone(), param.mutable, false);
            self.program.var_mut(var_id).ty = Some(param.ty);
            self.program.var_mut(var_id).offset = self.var_offset;
            self.var_offset += 1;
            self.definitions.insert(DefKey::Var(var_id), param_pos);

            if let Some(prev) = self.bind_variable(var_id) {
                if self.program.var(prev).global {
                    let name = param.name.clone();
                    self.mark_error(
                        param_pos,
                        format!("Parameter '{name}' is not allowed to hide global variable"),
                    );
                    self.hint_def(
                        DefKey::Var(prev),
                        format!("Global variable '{name}' is defined here"),
                    );
                } else {
                    // Duplicate parameter: already reported by the
                    // prototype pass.
                    self.valid = false;
                }
            }
        }

        // Incompatible overloads.
        if let Some(head) = self.program.function_named(&self.program.func(func_id).name.clone()) {
            let mut overload = head;
            while overload != func_id {
                let other = self.program.func(overload);
                if other.mode != FunctionMode::Blik {
                    let name = self.program.func(func_id).name.clone();
                    self.mark_error(
                        func_pos,
                        format!("Cannot replace or overload native or intrinsic function '{name}'"),
                    );
                } else if self.test_overload(overload, &params.iter().map(|p| p.ty).collect::<Vec<_>>())
                {
                    let signature = self.program.func(func_id).signature.clone();
                    let other_sig = self.program.func(overload).signature.clone();
                    if self.program.func(overload).ret_type == self.program.func(func_id).ret_type {
                        self.mark_error(
                            func_pos,
                            format!("Function '{signature}' is already defined"),
                        );
                    } else {
                        self.mark_error(
                            func_pos,
                            format!(
                                "Function '{signature}' only differs from previously \
                                 defined '{other_sig}' by return type"
                            ),
                        );
                    }
                    self.hint_def(
                        DefKey::Func(overload),
                        "Previous definition is here".to_string(),
                    );
                }
                overload = self.program.func(overload).overload_next;
            }
        }

        // Jump over consecutively defined functions in one go.
        let reuse = self.func_jump_addr.is_some_and(|jump| {
            self.program.ir[jump].jump_offset() == Some((self.program.ir.len() - jump) as i32)
        });
        if !reuse {
            self.func_jump_addr = Some(self.program.ir.len());
            self.program.ir.push(Instr::Jump(0));
        }

        let body_addr = self.program.ir.len();
        self.program.bind_function_addr(func_id, body_addr);

        // Body: `do` (or a bare newline) opens the statement block.
        let has_return = if self.match_token(TokenKind::Do) {
            let has_return = self.parse_block();
            self.consume(TokenKind::End);
            has_return
        } else if self.end_statement() {
            let has_return = self.parse_block();
            self.consume(TokenKind::End);
            has_return
        } else {
            false
        };

        if !has_return {
            if self.program.func(func_id).ret_type == PrimitiveType::Null.id() {
                self.program.ir.push(Instr::PushNull);
                self.emit_return();
            } else {
                let name = self.program.func(func_id).name.clone();
                self.mark_error(
                    func_pos,
                    format!("Some code paths do not return a value in function '{name}'"),
                );
            }
        }

        if let Some(jump) = self.func_jump_addr {
            let target = self.program.ir.len();
            self.set_jump_target(jump, target);
        }

        // Destroy the parameters and restore the outer frame.
        self.program.unbind_variables(variables_len);
        self.var_offset = prev_offset;
        self.param_range = prev_param_range;
        self.current_func = prev_func;
    }

    fn parse_return(&mut self) {
        self.pos += 1;
        let return_pos = self.pos;

        let Some(func_id) = self.current_func else {
            self.mark_error(
                self.pos - 1,
                "Return statement cannot be used outside function".to_string(),
            );
            return;
        };

        let ty = if self.peek(TokenKind::EndOfLine)
            || self.peek(TokenKind::Semicolon)
            || self.peek(TokenKind::Else)
            || self.peek(TokenKind::End)
        {
            self.program.ir.push(Instr::PushNull);
            PrimitiveType::Null.id()
        } else {
            self.parse_expression(true).ty
        };

        let ret_type = self.program.func(func_id).ret_type;
        if ty != ret_type {
            let got = self.program.type_info(ty).signature.clone();
            let expected = self.program.type_info(ret_type).signature.clone();
            self.mark_error(
                return_pos,
                format!("Cannot return {got} value in function defined to return {expected}"),
            );
            return;
        }

        self.emit_return();
    }

    fn parse_let(&mut self) {
        self.pos += 1;
        let mut var_pos = self.pos;

        let mutable = self.match_token(TokenKind::Mut);
        var_pos += usize::from(mutable);
        let name_pos = self.pos;
        let name = self.consume_identifier();

        let var_id = self.append_variable(name.clone(), mutable, self.current_func.is_none());
        self.definitions.insert(DefKey::Var(var_id), name_pos);

        if let Some(prev) = self.bind_variable(var_id) {
            let prev_global = self.program.var(prev).global;
            if self.current_func.is_some() && prev_global {
                self.mark_error(
                    var_pos,
                    format!("Declaration '{name}' is not allowed to hide global variable"),
                );
                self.hint_def(
                    DefKey::Var(prev),
                    format!("Global variable '{name}' is defined here"),
                );
            } else if self.current_func.is_some() && self.param_range.contains(&prev.0) {
                self.mark_error(
                    var_pos,
                    format!("Declaration '{name}' is not allowed to hide parameter"),
                );
                self.hint_def(
                    DefKey::Var(prev),
                    format!("Parameter '{name}' is defined here"),
                );
            } else {
                self.mark_error(var_pos, format!("Variable '{name}' already exists"));
                self.hint_def(
                    DefKey::Var(prev),
                    format!("Previous variable '{name}' is defined here"),
                );
            }
        }

        let slot = if self.match_token(TokenKind::Assign) || self.match_token(TokenKind::Reassign) {
            self.skip_new_lines();
            self.parse_expression(true)
        } else {
            self.consume(TokenKind::Colon);

            // The variable's own type stays unset while the initializer is
            // parsed, so self-referencing initializers are rejected.
            let ty = self.parse_type();

            if self.match_token(TokenKind::Assign) || self.match_token(TokenKind::Reassign) {
                self.skip_new_lines();
                let expr_pos = self.pos;
                let slot = self.parse_expression(true);

                if slot.ty != ty {
                    let got = self.program.type_info(slot.ty).signature.clone();
                    let expected = self.program.type_info(ty).signature.clone();
                    self.mark_error(
                        expr_pos - 1,
                        format!(
                            "Cannot assign {got} value to variable '{name}' \
                             (defined as {expected})"
                        ),
                    );
                }
                slot
            } else {
                match self.program.primitive_of(ty) {
                    PrimitiveType::Null => self.program.ir.push(Instr::PushNull),
                    PrimitiveType::Bool => self.program.ir.push(Instr::PushBool(false)),
                    PrimitiveType::Int => self.program.ir.push(Instr::PushInt(0)),
                    PrimitiveType::Float => self.program.ir.push(Instr::PushFloat(0.0)),
                    PrimitiveType::String => {
                        let empty = self.program.intern("");
                        self.program.ir.push(Instr::PushString(empty));
                    }
                    PrimitiveType::Type => self
                        .program
                        .ir
                        .push(Instr::PushType(PrimitiveType::Null.id())),
                }
                StackSlot::anonymous(ty)
            }
        };

        self.program.var_mut(var_id).ty = Some(slot.ty);

        // Aliasing a non-mutable variable to a non-mutable binding needs no
        // slot at all: drop the load and share the source's storage.
        let alias = slot.var.filter(|&source| {
            !self.program.var(source).mutable && !self.program.var(var_id).mutable
        });
        if let Some(source) = alias {
            self.trim_instructions(1);
            let (global, offset) = {
                let src_var = self.program.var(source);
                (src_var.global, src_var.offset)
            };
            let var = self.program.var_mut(var_id);
            var.global = global;
            var.offset = offset;
        } else {
            let global = self.current_func.is_none();
            let offset = self.var_offset;
            let var = self.program.var_mut(var_id);
            var.global = global;
            var.offset = offset;
            self.var_offset += 1;
        }
        let ready = self.program.ir.len();
        self.program.var_mut(var_id).ready_addr = ready;

        // Later references to a variable whose declaration failed stay
        // silent instead of cascading.
        if !self.show_errors {
            self.poisoned.insert(var_id);
        }
    }

    fn parse_if(&mut self) -> bool {
        self.pos += 1;

        self.parse_expression_of_type(PrimitiveType::Bool.id());

        let mut branch_addr = self.program.ir.len();
        self.program.ir.push(Instr::BranchIfFalse(0));

        let mut has_return = true;
        let mut has_else = false;

        if self.peek(TokenKind::Do) && !self.peek_kind_at(self.pos + 1, TokenKind::EndOfLine) {
            // Single-statement form, with an optional single-statement else
            // branch closed by `end`.
            has_return &= self.parse_do();

            if self.match_token(TokenKind::Else) {
                let jump_addr = self.program.ir.len();
                self.program.ir.push(Instr::Jump(0));
                let target = self.program.ir.len();
                self.set_jump_target(branch_addr, target);

                if self.peek(TokenKind::Do) {
                    self.pos += 1;
                }
                has_return &= self.parse_do_tail();
                self.consume(TokenKind::End);

                let target = self.program.ir.len();
                self.set_jump_target(jump_addr, target);
                has_else = true;
            } else {
                let target = self.program.ir.len();
                self.set_jump_target(branch_addr, target);
            }
        } else {
            if self.peek(TokenKind::Do) {
                self.pos += 1;
            }
            if self.end_statement() {
                has_return &= self.parse_block();

                if self.match_token(TokenKind::Else) {
                    let mut jump_addr = self.program.ir.len() as i64;
                    self.program.ir.push(Instr::Jump(-1));

                    loop {
                        let target = self.program.ir.len();
                        self.set_jump_target(branch_addr, target);

                        if self.match_token(TokenKind::If) {
                            self.parse_expression_of_type(PrimitiveType::Bool.id());
                            if self.peek(TokenKind::Do)
                                && self.peek_kind_at(self.pos + 1, TokenKind::EndOfLine)
                            {
                                self.pos += 1;
                            }
                            if self.end_statement() {
                                branch_addr = self.program.ir.len();
                                self.program.ir.push(Instr::BranchIfFalse(0));

                                has_return &= self.parse_block();

                                self.program.ir.push(Instr::Jump(jump_addr as i32));
                                jump_addr = self.program.ir.len() as i64 - 1;
                            }
                        } else if self.end_statement() {
                            has_return &= self.parse_block();
                            has_else = true;
                            break;
                        } else {
                            break;
                        }

                        if !self.match_token(TokenKind::Else) {
                            break;
                        }
                    }

                    let target = self.program.ir.len();
                    self.fix_jumps(jump_addr, target);
                } else {
                    let target = self.program.ir.len();
                    self.set_jump_target(branch_addr, target);
                }

                self.consume(TokenKind::End);
            }
        }

        has_return && has_else
    }

    fn parse_while(&mut self) {
        self.pos += 1;

        // The condition is parsed twice: once here, and once again after the
        // body by rewinding the token cursor, so the loop IR reads
        // if (cond) { do { ... } while (cond) } without copying anything.
        let while_line = self.file.tokens[self.pos.min(self.file.tokens.len() - 1)].line;
        let cond_pos = self.pos;
        self.parse_expression_of_type(PrimitiveType::Bool.id());

        let branch_addr = self.program.ir.len();
        self.program.ir.push(Instr::BranchIfFalse(0));

        let prev_loop = self.loop_ctx.replace(LoopContext {
            var_offset: self.var_offset,
            break_addr: -1,
            continue_addr: -1,
        });

        self.parse_body();

        let ctx = self.loop_ctx.take().unwrap_or(LoopContext {
            var_offset: self.var_offset,
            break_addr: -1,
            continue_addr: -1,
        });
        self.loop_ctx = prev_loop;

        let target = self.program.ir.len();
        self.fix_jumps(ctx.continue_addr, target);

        // Re-parse the condition with diagnostics muted; it was already
        // checked above.
        {
            let prev_pos = self.pos;
            let prev_show = self.show_errors;
            self.pos = cond_pos;
            self.show_errors = false;

            let addr = self.program.ir.len();
            let needs_line = self.program.sources[self.src]
                .lines
                .last()
                .is_none_or(|l| l.line != while_line);
            if needs_line {
                self.push_line(addr, while_line);
            }
            self.parse_expression_of_type(PrimitiveType::Bool.id());

            self.pos = prev_pos;
            self.show_errors = prev_show;
        }

        let back = branch_addr as i64 - self.program.ir.len() as i64 + 1;
        self.program.ir.push(Instr::BranchIfTrue(back as i32));
        let target = self.program.ir.len();
        self.set_jump_target(branch_addr, target);

        self.fix_jumps(ctx.break_addr, target);
    }

    fn parse_for(&mut self) {
        self.pos += 1;
        let mut for_pos = self.pos;

        let mutable = self.match_token(TokenKind::Mut);
        for_pos += usize::from(mutable);
        let name_pos = self.pos;
        let name = self.consume_identifier();

        let it = self.append_variable(name.clone(), mutable, false);
        self.definitions.insert(DefKey::Var(it), name_pos);
        self.program.var_mut(it).offset = self.var_offset + 2;

        if let Some(prev) = self.bind_variable(it) {
            if self.current_func.is_some() && self.program.var(prev).global {
                self.mark_error(
                    for_pos,
                    format!("Iterator '{name}' is not allowed to hide global variable"),
                );
                self.hint_def(
                    DefKey::Var(prev),
                    format!("Global variable '{name}' is defined here"),
                );
            } else {
                self.mark_error(for_pos, format!("Variable '{name}' already exists"));
                self.hint_def(
                    DefKey::Var(prev),
                    format!("Previous variable '{name}' is defined here"),
                );
            }
            return;
        }

        self.consume(TokenKind::In);
        self.parse_expression_of_type(PrimitiveType::Int.id());
        self.consume(TokenKind::Colon);
        self.parse_expression_of_type(PrimitiveType::Int.id());

        // Keep the start and end values on the stack for the loop's
        // lifetime; the iterator takes the third slot.
        self.var_offset += 3;
        let it_offset = self.program.var(it).offset;

        self.program.ir.push(Instr::LoadLocalInt(it_offset - 2));
        self.program.var_mut(it).ty = Some(PrimitiveType::Int.id());

        let body_addr = self.program.ir.len();
        self.program.ir.push(Instr::LoadLocalInt(it_offset));
        self.program.ir.push(Instr::LoadLocalInt(it_offset - 1));
        self.program.ir.push(Instr::LessThanInt);
        self.program.ir.push(Instr::BranchIfFalse(0));

        let prev_loop = self.loop_ctx.replace(LoopContext {
            var_offset: self.var_offset,
            break_addr: -1,
            continue_addr: -1,
        });

        self.parse_body();

        let ctx = self.loop_ctx.take().unwrap_or(LoopContext {
            var_offset: self.var_offset,
            break_addr: -1,
            continue_addr: -1,
        });
        self.loop_ctx = prev_loop;

        let target = self.program.ir.len();
        self.fix_jumps(ctx.continue_addr, target);

        self.program.ir.push(Instr::PushInt(1));
        self.program.ir.push(Instr::AddInt);
        let back = body_addr as i64 - self.program.ir.len() as i64;
        self.program.ir.push(Instr::Jump(back as i32));
        let target = self.program.ir.len();
        self.set_jump_target(body_addr + 3, target);

        self.fix_jumps(ctx.break_addr, target);

        // Drop the iterator and range values.
        self.emit_pop(3);
        self.program.unbind_variables(it.0);
        self.var_offset -= 3;
    }

    fn parse_break(&mut self) {
        let break_pos = self.pos;
        self.pos += 1;

        let Some(ctx) = self.loop_ctx else {
            self.mark_error(break_pos, "Break statement outside of loop".to_string());
            return;
        };

        self.emit_pop(self.var_offset.saturating_sub(ctx.var_offset));

        let link = ctx.break_addr;
        self.program.ir.push(Instr::Jump(link as i32));
        if let Some(ctx) = self.loop_ctx.as_mut() {
            ctx.break_addr = (self.program.ir.len() - 1) as i64;
        }
    }

    fn parse_continue(&mut self) {
        let continue_pos = self.pos;
        self.pos += 1;

        let Some(ctx) = self.loop_ctx else {
            self.mark_error(continue_pos, "Continue statement outside of loop".to_string());
            return;
        };

        self.emit_pop(self.var_offset.saturating_sub(ctx.var_offset));

        let link = ctx.continue_addr;
        self.program.ir.push(Instr::Jump(link as i32));
        if let Some(ctx) = self.loop_ctx.as_mut() {
            ctx.continue_addr = (self.program.ir.len() - 1) as i64;
        }
    }

    /// A type annotation is an expression that must statically resolve to a
    /// `PushType`.
    pub(crate) fn parse_type(&mut self) -> TypeId {
        let type_pos = self.pos;

        let slot = self.parse_expression(false);
        if slot.ty != PrimitiveType::Type.id() {
            let got = self.program.type_info(slot.ty).signature.clone();
            self.mark_error(type_pos, format!("Expected a Type expression, not {got}"));
            return PrimitiveType::Null.id();
        }

        match self.program.ir.last() {
            Some(&Instr::PushType(ty)) => {
                self.trim_instructions(1);
                ty
            }
            _ => {
                self.mark_error(
                    type_pos,
                    "Complex type expression cannot be resolved statically".to_string(),
                );
                PrimitiveType::Null.id()
            }
        }
    }

    // ---- variables ----

    pub(crate) fn append_variable(&mut self, name: String, mutable: bool, global: bool) -> VarId {
        let id = VarId(self.program.variables.len());
        self.program.variables.push(VariableInfo {
            name,
            ty: None,
            mutable,
            global,
            offset: 0,
            ready_addr: 0,
            shadow: None,
        });
        id
    }

    /// Bind `id` in the name map. On a name collision the map keeps the
    /// previous binding, the new variable records it as its shadow, and the
    /// collided-with variable is returned for diagnostics.
    pub(crate) fn bind_variable(&mut self, id: VarId) -> Option<VarId> {
        let name = self.program.var(id).name.clone();
        match self.program.variables_by_name.get(&name) {
            Some(&prev) => {
                self.program.var_mut(id).shadow = Some(prev);
                Some(prev)
            }
            None => {
                self.program.variables_by_name.insert(name, id);
                None
            }
        }
    }

    // ---- emission helpers ----

    pub(crate) fn emit_pop(&mut self, count: usize) {
        if count > 0 {
            self.program.ir.push(Instr::Pop(count));
        }
    }

    pub(crate) fn emit_return(&mut self) {
        let Some(func_id) = self.current_func else {
            debug_assert!(false, "return emitted outside a function");
            return;
        };

        // Tail recursion elimination: a self-call immediately before the
        // return becomes parameter stores plus a jump to the body.
        let tail = matches!(self.program.ir.last(), Some(Instr::Call(f)) if *f == func_id);
        if tail {
            self.program.ir.pop();

            let params: Vec<TypeId> =
                self.program.func(func_id).params.iter().map(|p| p.ty).collect();
            for (i, &ty) in params.iter().enumerate().rev() {
                let instr = match self.program.primitive_of(ty) {
                    // Null arguments still occupy a slot; there is nothing
                    // to keep, so just drop the value.
                    PrimitiveType::Null => Instr::Pop(1),
                    PrimitiveType::Bool => Instr::StoreLocalBool(i),
                    PrimitiveType::Int => Instr::StoreLocalInt(i),
                    PrimitiveType::Float => Instr::StoreLocalFloat(i),
                    PrimitiveType::String => Instr::StoreLocalString(i),
                    PrimitiveType::Type => Instr::StoreLocalType(i),
                };
                self.program.ir.push(instr);
            }

            self.emit_pop(self.var_offset.saturating_sub(params.len()));

            match self.program.func(func_id).addr {
                Some(target) => {
                    let off = target as i64 - self.program.ir.len() as i64;
                    self.program.ir.push(Instr::Jump(off as i32));
                    self.program.func_mut(func_id).tail_recursive = true;
                }
                None => {
                    debug_assert!(false, "tail call to unbound function");
                    self.program.ir.push(Instr::Return);
                }
            }
        } else {
            self.program.ir.push(Instr::Return);
        }
    }

    /// Discard an expression-statement result. A trailing load simply
    /// disappears, a trailing `Copy` becomes the corresponding `Store`, and
    /// anything else costs a `Pop`.
    pub(crate) fn discard_result(&mut self) {
        let Some(last) = self.program.ir.last().copied() else {
            return;
        };
        match last {
            Instr::PushNull
            | Instr::PushBool(_)
            | Instr::PushInt(_)
            | Instr::PushFloat(_)
            | Instr::PushString(_)
            | Instr::PushType(_)
            | Instr::LoadBool(_)
            | Instr::LoadInt(_)
            | Instr::LoadFloat(_)
            | Instr::LoadString(_)
            | Instr::LoadType(_)
            | Instr::LoadLocalBool(_)
            | Instr::LoadLocalInt(_)
            | Instr::LoadLocalFloat(_)
            | Instr::LoadLocalString(_)
            | Instr::LoadLocalType(_) => self.trim_instructions(1),

            Instr::CopyBool(slot) => self.replace_last(Instr::StoreBool(slot)),
            Instr::CopyInt(slot) => self.replace_last(Instr::StoreInt(slot)),
            Instr::CopyFloat(slot) => self.replace_last(Instr::StoreFloat(slot)),
            Instr::CopyString(slot) => self.replace_last(Instr::StoreString(slot)),
            Instr::CopyType(slot) => self.replace_last(Instr::StoreType(slot)),
            Instr::CopyLocalBool(slot) => self.replace_last(Instr::StoreLocalBool(slot)),
            Instr::CopyLocalInt(slot) => self.replace_last(Instr::StoreLocalInt(slot)),
            Instr::CopyLocalFloat(slot) => self.replace_last(Instr::StoreLocalFloat(slot)),
            Instr::CopyLocalString(slot) => self.replace_last(Instr::StoreLocalString(slot)),
            Instr::CopyLocalType(slot) => self.replace_last(Instr::StoreLocalType(slot)),

            _ => self.emit_pop(1),
        }
    }

    fn replace_last(&mut self, instr: Instr) {
        if let Some(last) = self.program.ir.last_mut() {
            *last = instr;
        }
    }

    /// Remove the last `count` instructions (never reaching into IR from a
    /// previous compile) and pull the line map back with them.
    pub(crate) fn trim_instructions(&mut self, count: usize) {
        let ir = &mut self.program.ir;
        if ir.len() - self.prev_ir_len < count {
            return;
        }
        ir.truncate(ir.len() - count);
        let new_len = ir.len();

        let src = &mut self.program.sources[self.src];
        if src.lines.last().is_some_and(|l| l.addr > new_len) {
            let line = src.lines.last().map(|l| l.line).unwrap_or(0);
            while src.lines.last().is_some_and(|l| l.addr >= new_len) {
                src.lines.pop();
            }
            src.lines.push(crate::program::SrcLine {
                addr: new_len,
                line,
            });
        }
    }

    /// Rewrite a chain of pending jumps (linked through their operands as
    /// absolute addresses, `-1` terminated) to target `target`.
    pub(crate) fn fix_jumps(&mut self, mut jump_addr: i64, target: usize) {
        while jump_addr >= 0 {
            let addr = jump_addr as usize;
            let next = self.program.ir[addr].jump_offset().unwrap_or(-1) as i64;
            self.program.ir[addr].set_jump_offset((target as i64 - jump_addr) as i32);
            jump_addr = next;
        }
    }

    pub(crate) fn set_jump_target(&mut self, addr: usize, target: usize) {
        self.program.ir[addr].set_jump_offset((target as i64 - addr as i64) as i32);
    }

    pub(crate) fn test_overload(&self, func_id: FuncId, args: &[TypeId]) -> bool {
        let func = self.program.func(func_id);
        if func.variadic {
            if func.params.len() > args.len() {
                return false;
            }
        } else if func.params.len() != args.len() {
            return false;
        }
        func.params.iter().zip(args).all(|(p, &a)| p.ty == a)
    }

    // ---- tokens ----

    pub(crate) fn consume(&mut self, kind: TokenKind) -> bool {
        if self.pos >= self.file.tokens.len() {
            self.flag_eof();
            self.mark_error(
                self.pos,
                format!("Unexpected end of file, expected '{}'", kind.name()),
            );
            return false;
        }

        let prev = self.pos;
        self.pos += 1;

        if self.file.tokens[prev].kind != kind {
            self.mark_error(
                prev,
                format!(
                    "Unexpected token '{}', expected '{}'",
                    self.file.tokens[prev].kind.name(),
                    kind.name()
                ),
            );
            return false;
        }
        true
    }

    pub(crate) fn consume_identifier(&mut self) -> String {
        if self.consume(TokenKind::Identifier) {
            self.file.tokens[self.pos - 1]
                .text()
                .unwrap_or_default()
                .to_string()
        } else {
            String::new()
        }
    }

    pub(crate) fn match_token(&mut self, kind: TokenKind) -> bool {
        let matched = self.pos < self.file.tokens.len() && self.file.tokens[self.pos].kind == kind;
        self.pos += usize::from(matched);
        matched
    }

    pub(crate) fn peek(&self, kind: TokenKind) -> bool {
        self.pos < self.file.tokens.len() && self.file.tokens[self.pos].kind == kind
    }

    pub(crate) fn peek_kind_at(&self, pos: usize, kind: TokenKind) -> bool {
        pos < self.file.tokens.len() && self.file.tokens[pos].kind == kind
    }

    /// Statement boundary: a newline or semicolon (consumed), or an
    /// upcoming `else`/`end` (left in place). Anything else skips forward
    /// to the next boundary so later statements still get diagnostics.
    pub(crate) fn end_statement(&mut self) -> bool {
        if self.pos >= self.file.tokens.len() {
            self.flag_eof();
            self.mark_error(
                self.pos,
                "Unexpected end of file, expected end of statement".to_string(),
            );
            return false;
        }

        match self.file.tokens[self.pos].kind {
            TokenKind::EndOfLine | TokenKind::Semicolon => {
                self.pos += 1;
                true
            }
            TokenKind::Else | TokenKind::End => true,
            other => {
                self.mark_error(
                    self.pos,
                    format!("Unexpected token '{}', expected end of statement", other.name()),
                );
                while self.pos < self.file.tokens.len()
                    && !matches!(
                        self.file.tokens[self.pos].kind,
                        TokenKind::EndOfLine | TokenKind::Semicolon
                    )
                {
                    self.pos += 1;
                }
                false
            }
        }
    }

    /// Skip a run of newlines, keeping the line map in sync.
    pub(crate) fn skip_new_lines(&mut self) -> bool {
        if self.match_token(TokenKind::EndOfLine) {
            while self.match_token(TokenKind::EndOfLine) {}

            if self.pos < self.file.tokens.len() {
                let addr = self.program.ir.len();
                let line = self.file.tokens[self.pos].line;
                self.push_line(addr, line);
            }
            true
        } else {
            false
        }
    }

    // ---- diagnostics ----

    pub(crate) fn push_line(&mut self, addr: usize, line: u32) {
        self.program.sources[self.src].push_line(addr, line);
    }

    fn token_site(&self, pos: usize) -> (u32, usize) {
        let tokens = &self.file.tokens;
        if tokens.is_empty() {
            return (1, 0);
        }
        let offset = if pos < tokens.len() {
            tokens[pos].offset as usize
        } else {
            self.file.code.len()
        };
        let line = tokens[pos.min(tokens.len() - 1)].line;
        (line, offset)
    }

    /// Record a primary error. Only the first error per statement is shown;
    /// the ones after it are swallowed until the outer statement loop
    /// re-arms reporting.
    pub(crate) fn mark_error(&mut self, pos: usize, message: String) {
        if self.show_errors {
            let (line, offset) = self.token_site(pos);
            self.report.diagnostics.push(Diagnostic::error(
                self.file.filename.as_str(),
                line,
                offset,
                message,
            ));
            self.show_errors = false;
            self.show_hints = true;
        } else {
            self.show_hints = false;
        }

        if self.valid {
            self.report.depth = self.depth;
        }
        self.valid = false;
    }

    /// Secondary note attached to the most recent shown error.
    pub(crate) fn hint(&mut self, pos: Option<usize>, message: String) {
        if !self.show_hints {
            return;
        }
        match pos {
            Some(pos) => {
                let (line, offset) = self.token_site(pos);
                self.report.diagnostics.push(Diagnostic::hint(
                    self.file.filename.as_str(),
                    line,
                    offset,
                    message,
                ));
            }
            None => {
                self.report.diagnostics.push(Diagnostic::hint(
                    self.file.filename.as_str(),
                    0,
                    0,
                    message,
                ));
            }
        }
    }

    pub(crate) fn hint_def(&mut self, key: DefKey, message: String) {
        let pos = self.definitions.get(&key).copied();
        self.hint(pos, message);
    }

    /// Mark the pending failure as an incomplete-input one; only meaningful
    /// while no other error has been recorded.
    pub(crate) fn flag_eof(&mut self) {
        if self.valid {
            self.report.unexpected_eof = true;
        }
    }
}
