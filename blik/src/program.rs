//! The shared [`Program`]: IR, type registry, functions, globals, sources.
//!
//! A program is built incrementally: natives and globals are registered by
//! the host, then one or more compile passes append to it (the REPL compiles
//! many fragments into the same program). All cross-references are small
//! integer handles into the owning vectors, which is what makes compile
//! rollback a matter of restoring lengths and relinking a few ring nodes.

use std::collections::HashMap;
use std::fmt;
use std::fmt::Write as _;
use std::rc::Rc;

use crate::instr::Instr;
use crate::types::{PrimitiveType, TypeId, TypeInfo, PRIMITIVE_TYPES};
use crate::value::Value;
use crate::vm::Vm;

/// Handle into the program's interned string arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StrId(pub u32);

/// Handle into [`Program::functions`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FuncId(pub usize);

/// Handle into [`Program::variables`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct VarId(pub usize);

/// Host callback ABI. The VM hands over itself (for `set_interrupt` and
/// output), the program (to resolve interned strings and types), and a
/// borrowed argument slice; the callback returns the result value.
#[derive(Clone)]
pub struct NativeFunction(pub Rc<dyn Fn(&mut Vm, &Program, &[Value]) -> Value>);

impl fmt::Debug for NativeFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("<native>")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FunctionMode {
    /// Defined in blik source.
    Blik,
    /// Host callback.
    Native,
    /// Handled entirely by the compiler (`Float`, `Int`, `typeOf`, prints).
    Intrinsic,
}

#[derive(Debug, Clone)]
pub struct Parameter {
    pub name: String,
    pub ty: TypeId,
    pub mutable: bool,
}

/// Functions sharing a name are chained into a circular doubly-linked
/// overload ring through `overload_prev`/`overload_next`; a lone definition
/// points at itself.
#[derive(Debug)]
pub struct FunctionInfo {
    pub name: String,
    pub signature: String,
    pub mode: FunctionMode,
    pub params: Vec<Parameter>,
    pub ret_type: TypeId,
    /// IR address of the body; `None` until the body has been emitted.
    pub addr: Option<usize>,
    pub variadic: bool,
    /// Set when tail-call elimination rewrote at least one self-call.
    pub tail_recursive: bool,
    pub overload_prev: FuncId,
    pub overload_next: FuncId,
    /// Earliest IR address from which this function may be invoked, tracked
    /// while its address is still unresolved. Used to reject reads of
    /// globals that are initialized after that point.
    pub earliest_call_addr: usize,
    pub earliest_call_pos: usize,
    pub native: Option<NativeFunction>,
}

#[derive(Debug)]
pub struct VariableInfo {
    pub name: String,
    /// `None` while the declaration's initializer is still being parsed, so
    /// self-referencing initializers are caught.
    pub ty: Option<TypeId>,
    pub mutable: bool,
    pub global: bool,
    /// Global slot index, or frame offset for locals and parameters.
    pub offset: usize,
    /// IR address right after the initializer; a global must not be read
    /// from a function that may run before this point.
    pub ready_addr: usize,
    /// Variable this binding hides; written back into the name map when the
    /// binding dies.
    pub shadow: Option<VarId>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SrcLine {
    pub addr: usize,
    pub line: u32,
}

/// Per-compile source record: filename plus the sorted `(ir_addr, line)`
/// map used to recover a source position for any instruction.
#[derive(Debug)]
pub struct SourceInfo {
    pub filename: String,
    pub first_addr: usize,
    pub lines: Vec<SrcLine>,
}

impl SourceInfo {
    /// Append an entry, collapsing runs at the same address (last wins).
    pub(crate) fn push_line(&mut self, addr: usize, line: u32) {
        match self.lines.last_mut() {
            Some(last) if last.addr == addr => last.line = line,
            _ => self.lines.push(SrcLine { addr, line }),
        }
    }

    /// Line of the greatest entry not exceeding `addr`.
    pub fn line_at(&self, addr: usize) -> Option<u32> {
        let idx = self.lines.partition_point(|l| l.addr <= addr);
        idx.checked_sub(1).map(|i| self.lines[i].line)
    }
}

/// Captured vector lengths for rollback. Restoring a snapshot leaves the
/// program observably identical to its state at capture time (the string
/// arena alone grows monotonically).
#[derive(Debug, Clone, Copy)]
pub struct ProgramSnapshot {
    ir_len: usize,
    sources_len: usize,
    functions_len: usize,
    functions_by_addr_len: usize,
    variables_len: usize,
    global_offset: usize,
}

#[derive(Debug, Default)]
struct Interner {
    strings: Vec<String>,
    map: HashMap<String, StrId>,
}

impl Interner {
    fn intern(&mut self, text: &str) -> StrId {
        if let Some(&id) = self.map.get(text) {
            return id;
        }
        let id = StrId(self.strings.len() as u32);
        self.strings.push(text.to_string());
        self.map.insert(text.to_string(), id);
        id
    }

    fn resolve(&self, id: StrId) -> &str {
        &self.strings[id.0 as usize]
    }
}

#[derive(Debug)]
pub struct Program {
    pub ir: Vec<Instr>,
    pub types: Vec<TypeInfo>,
    types_by_name: HashMap<String, TypeId>,
    pub functions: Vec<FunctionInfo>,
    pub(crate) functions_by_name: HashMap<String, FuncId>,
    /// User function ids ordered by body address; ascending by construction
    /// since addresses are assigned in emission order.
    pub(crate) functions_by_addr: Vec<FuncId>,
    pub variables: Vec<VariableInfo>,
    pub(crate) variables_by_name: HashMap<String, VarId>,
    pub sources: Vec<SourceInfo>,
    interner: Interner,
    /// Next free top-level slot; equals the number of live global slots
    /// between compiles.
    pub(crate) global_offset: usize,
}

impl Default for Program {
    fn default() -> Self {
        Self::new()
    }
}

impl Program {
    /// Create a program with the basic types, the predefined globals
    /// (`Version`, `NaN`, `Inf`) and the compiler intrinsics registered.
    pub fn new() -> Self {
        let mut program = Program {
            ir: Vec::new(),
            types: Vec::new(),
            types_by_name: HashMap::new(),
            functions: Vec::new(),
            functions_by_name: HashMap::new(),
            functions_by_addr: Vec::new(),
            variables: Vec::new(),
            variables_by_name: HashMap::new(),
            sources: Vec::new(),
            interner: Interner::default(),
            global_offset: 0,
        };

        for primitive in PRIMITIVE_TYPES {
            let id = TypeId(program.types.len());
            program.types.push(TypeInfo::basic(primitive));
            program.types_by_name.insert(primitive.name().to_string(), id);
        }

        let version = program.intern(env!("CARGO_PKG_VERSION"));
        program.add_global("Version", Value::Str(version), false);
        program.add_global("NaN", Value::Float(f64::NAN), false);
        program.add_global("Inf", Value::Float(f64::INFINITY), false);

        program.add_intrinsic("print(...)");
        program.add_intrinsic("printLn(...)");
        program.add_intrinsic("Float(Int): Float");
        program.add_intrinsic("Float(Float): Float");
        program.add_intrinsic("Int(Int): Int");
        program.add_intrinsic("Int(Float): Int");
        program.add_intrinsic("typeOf(...): Type");

        program
    }

    // ---- strings ----

    pub fn intern(&mut self, text: &str) -> StrId {
        self.interner.intern(text)
    }

    pub fn str_value(&self, id: StrId) -> &str {
        self.interner.resolve(id)
    }

    // ---- types ----

    pub fn type_info(&self, id: TypeId) -> &TypeInfo {
        &self.types[id.0]
    }

    pub fn type_by_name(&self, name: &str) -> Option<TypeId> {
        self.types_by_name.get(name).copied()
    }

    pub fn primitive_of(&self, id: TypeId) -> PrimitiveType {
        self.types[id.0].primitive
    }

    // ---- functions ----

    pub fn func(&self, id: FuncId) -> &FunctionInfo {
        &self.functions[id.0]
    }

    pub(crate) fn func_mut(&mut self, id: FuncId) -> &mut FunctionInfo {
        &mut self.functions[id.0]
    }

    /// Head of the overload ring for `name`.
    pub fn function_named(&self, name: &str) -> Option<FuncId> {
        self.functions_by_name.get(name).copied()
    }

    /// Register a host callback under a textual signature of the exact form
    /// `name(T1, T2): R` (`: R` omitted for Null, `name(...)` for
    /// variadics).
    ///
    /// Signatures are not exposed to user scripts, so validation is
    /// assertion-grade: malformed text or duplicate non-variadic signatures
    /// panic, as both are host programming errors.
    pub fn add_function<F>(&mut self, signature: &str, native: F) -> FuncId
    where
        F: Fn(&mut Vm, &Program, &[Value]) -> Value + 'static,
    {
        self.register_host_function(signature, Some(NativeFunction(Rc::new(native))))
    }

    fn add_intrinsic(&mut self, signature: &str) -> FuncId {
        self.register_host_function(signature, None)
    }

    fn register_host_function(
        &mut self,
        signature: &str,
        native: Option<NativeFunction>,
    ) -> FuncId {
        let open = signature.find('(');
        let close = signature.rfind(')');
        let (open, close) = match (open, close) {
            (Some(open), Some(close)) if open < close => (open, close),
            _ => panic!("malformed function signature '{signature}'"),
        };

        let name = signature[..open].trim().to_string();
        assert!(!name.is_empty(), "malformed function signature '{signature}'");

        let mut params = Vec::new();
        let mut variadic = false;
        let params_str = signature[open + 1..close].trim();
        if !params_str.is_empty() {
            for part in params_str.split(',') {
                let part = part.trim();
                assert!(!variadic, "'...' must be the last parameter: '{signature}'");
                if part == "..." {
                    variadic = true;
                } else {
                    let ty = self
                        .type_by_name(part)
                        .unwrap_or_else(|| panic!("unknown type '{part}' in '{signature}'"));
                    params.push(Parameter {
                        name: String::new(),
                        ty,
                        mutable: false,
                    });
                }
            }
        }
        let rest = signature[close + 1..].trim();
        let ret_type = if let Some(ret_name) = rest.strip_prefix(':') {
            let ret_name = ret_name.trim();
            self.type_by_name(ret_name)
                .unwrap_or_else(|| panic!("unknown type '{ret_name}' in '{signature}'"))
        } else {
            PrimitiveType::Null.id()
        };

        let mode = if native.is_some() {
            FunctionMode::Native
        } else {
            FunctionMode::Intrinsic
        };

        let id = FuncId(self.functions.len());
        self.functions.push(FunctionInfo {
            name: name.clone(),
            signature: signature.to_string(),
            mode,
            params,
            ret_type,
            addr: None,
            variadic,
            tail_recursive: false,
            overload_prev: id,
            overload_next: id,
            earliest_call_addr: usize::MAX,
            earliest_call_pos: usize::MAX,
            native,
        });

        // Duplicate non-variadic signatures are rejected here rather than at
        // compile time.
        if let Some(head) = self.function_named(&name) {
            let mut it = head;
            loop {
                let other = self.func(it);
                assert!(
                    !(other.variadic || self.func(id).variadic)
                        && !Self::params_overlap(&other.params, &self.func(id).params),
                    "duplicate or variadic-conflicting registration '{signature}'"
                );
                it = other.overload_next;
                if it == head {
                    break;
                }
            }
        }

        self.publish_function(id);
        id
    }

    fn params_overlap(a: &[Parameter], b: &[Parameter]) -> bool {
        a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x.ty == y.ty)
    }

    /// Insert `id` into the overload ring for its name (creating the ring
    /// when the name is new).
    pub(crate) fn publish_function(&mut self, id: FuncId) {
        let name = self.functions[id.0].name.clone();
        match self.functions_by_name.get(&name) {
            None => {
                self.functions_by_name.insert(name, id);
                let func = &mut self.functions[id.0];
                func.overload_prev = id;
                func.overload_next = id;
            }
            Some(&head) => {
                let tail = self.functions[head.0].overload_prev;
                self.functions[tail.0].overload_next = id;
                self.functions[head.0].overload_prev = id;
                let func = &mut self.functions[id.0];
                func.overload_prev = tail;
                func.overload_next = head;
            }
        }
    }

    /// Record that `id`'s body starts at `addr` (emission order keeps the
    /// vector sorted by address).
    pub(crate) fn bind_function_addr(&mut self, id: FuncId, addr: usize) {
        self.functions[id.0].addr = Some(addr);
        debug_assert!(self
            .functions_by_addr
            .last()
            .map_or(true, |&last| self.functions[last.0].addr <= Some(addr)));
        self.functions_by_addr.push(id);
    }

    /// The most recent function whose body starts at or before `pc`.
    pub fn function_at(&self, pc: usize) -> Option<FuncId> {
        let idx = self
            .functions_by_addr
            .partition_point(|&id| self.functions[id.0].addr <= Some(pc));
        idx.checked_sub(1).map(|i| self.functions_by_addr[i])
    }

    // ---- variables ----

    pub fn var(&self, id: VarId) -> &VariableInfo {
        &self.variables[id.0]
    }

    pub(crate) fn var_mut(&mut self, id: VarId) -> &mut VariableInfo {
        &mut self.variables[id.0]
    }

    pub fn variable_named(&self, name: &str) -> Option<VarId> {
        self.variables_by_name.get(name).copied()
    }

    /// Insert a pre-initialized global slot. The value's variant determines
    /// the variable's type; the initializer is emitted as a push so the slot
    /// materializes when execution reaches it.
    pub fn add_global(&mut self, name: &str, value: Value, mutable: bool) {
        let (ty, instr) = match value {
            Value::Null => (PrimitiveType::Null, Instr::PushNull),
            Value::Bool(b) => (PrimitiveType::Bool, Instr::PushBool(b)),
            Value::Int(i) => (PrimitiveType::Int, Instr::PushInt(i)),
            Value::Float(d) => (PrimitiveType::Float, Instr::PushFloat(d)),
            Value::Str(s) => (PrimitiveType::String, Instr::PushString(s)),
            Value::Type(t) => (PrimitiveType::Type, Instr::PushType(t)),
        };
        self.ir.push(instr);

        let id = VarId(self.variables.len());
        self.variables.push(VariableInfo {
            name: name.to_string(),
            ty: Some(ty.id()),
            mutable,
            global: true,
            offset: self.global_offset,
            ready_addr: self.ir.len(),
            shadow: None,
        });
        self.global_offset += 1;

        let replaced = self.variables_by_name.insert(name.to_string(), id);
        debug_assert!(replaced.is_none(), "global '{name}' registered twice");
    }

    /// Remove bindings for every variable from `first` on, restoring
    /// shadowed outer bindings, then drop the records.
    pub(crate) fn unbind_variables(&mut self, first: usize) {
        for idx in (first..self.variables.len()).rev() {
            let name = self.variables[idx].name.clone();
            match self.variables[idx].shadow {
                Some(shadow) => {
                    self.variables_by_name.insert(name, shadow);
                }
                None => {
                    self.variables_by_name.remove(&name);
                }
            }
        }
        self.variables.truncate(first);
    }

    // ---- sources ----

    /// Source position of the instruction at `addr`.
    pub fn source_at(&self, addr: usize) -> Option<(&str, u32)> {
        let idx = self.sources.partition_point(|s| s.first_addr <= addr);
        let src = &self.sources[idx.checked_sub(1)?];
        Some((src.filename.as_str(), src.line_at(addr)?))
    }

    // ---- rollback ----

    pub fn snapshot(&self) -> ProgramSnapshot {
        ProgramSnapshot {
            ir_len: self.ir.len(),
            sources_len: self.sources.len(),
            functions_len: self.functions.len(),
            functions_by_addr_len: self.functions_by_addr.len(),
            variables_len: self.variables.len(),
            global_offset: self.global_offset,
        }
    }

    /// Undo everything added since `snap` was taken: IR, sources, globals,
    /// and functions (unlinking each from its overload ring).
    pub fn restore(&mut self, snap: &ProgramSnapshot) {
        self.ir.truncate(snap.ir_len);
        self.sources.truncate(snap.sources_len);

        for idx in snap.functions_len..self.functions.len() {
            let name = self.functions[idx].name.clone();
            let prev = self.functions[idx].overload_prev;
            let next = self.functions[idx].overload_next;
            let head = self.functions_by_name[&name];

            if head.0 == idx && next.0 == idx {
                self.functions_by_name.remove(&name);
            } else {
                if head.0 == idx {
                    self.functions_by_name.insert(name, next);
                }
                self.functions[prev.0].overload_next = next;
                self.functions[next.0].overload_prev = prev;
            }
        }
        self.functions.truncate(snap.functions_len);
        self.functions_by_addr.truncate(snap.functions_by_addr_len);

        self.unbind_variables(snap.variables_len);
        self.global_offset = snap.global_offset;
    }

    /// Drop the trailing `End` so a later run continues past this point.
    /// The interactive session calls this after each successful compile.
    pub fn pop_end(&mut self) {
        debug_assert!(matches!(self.ir.last(), Some(Instr::End(_))));
        if matches!(self.ir.last(), Some(Instr::End(_))) {
            self.ir.pop();
        }
    }

    // ---- debugging ----

    /// Textual IR listing.
    pub fn dump_ir(&self) -> String {
        let mut out = String::new();
        for (addr, instr) in self.ir.iter().enumerate() {
            let _ = write!(out, "{addr:04}  {}", instr.name());
            match *instr {
                Instr::PushBool(b) => {
                    let _ = write!(out, " {b}");
                }
                Instr::PushInt(i) => {
                    let _ = write!(out, " {i}");
                }
                Instr::PushFloat(d) => {
                    let _ = write!(out, " {d}");
                }
                Instr::PushString(s) => {
                    let _ = write!(out, " {:?}", self.str_value(s));
                }
                Instr::PushType(t) => {
                    let _ = write!(out, " {}", self.type_info(t).signature);
                }
                Instr::Pop(n) | Instr::End(n) => {
                    let _ = write!(out, " {n}");
                }
                Instr::Call(f) | Instr::CallNative(f) => {
                    let _ = write!(out, " {}", self.func(f).signature);
                }
                Instr::Print(p) => {
                    let _ = write!(out, " {p}");
                }
                Instr::LoadBool(slot)
                | Instr::LoadInt(slot)
                | Instr::LoadFloat(slot)
                | Instr::LoadString(slot)
                | Instr::LoadType(slot)
                | Instr::LoadLocalBool(slot)
                | Instr::LoadLocalInt(slot)
                | Instr::LoadLocalFloat(slot)
                | Instr::LoadLocalString(slot)
                | Instr::LoadLocalType(slot)
                | Instr::StoreBool(slot)
                | Instr::StoreInt(slot)
                | Instr::StoreFloat(slot)
                | Instr::StoreString(slot)
                | Instr::StoreType(slot)
                | Instr::StoreLocalBool(slot)
                | Instr::StoreLocalInt(slot)
                | Instr::StoreLocalFloat(slot)
                | Instr::StoreLocalString(slot)
                | Instr::StoreLocalType(slot)
                | Instr::CopyBool(slot)
                | Instr::CopyInt(slot)
                | Instr::CopyFloat(slot)
                | Instr::CopyString(slot)
                | Instr::CopyType(slot)
                | Instr::CopyLocalBool(slot)
                | Instr::CopyLocalInt(slot)
                | Instr::CopyLocalFloat(slot)
                | Instr::CopyLocalString(slot)
                | Instr::CopyLocalType(slot) => {
                    let _ = write!(out, " {slot}");
                }
                _ => {
                    if let Some(off) = instr.jump_offset() {
                        let target = addr as i64 + off as i64;
                        let _ = write!(out, " {off:+} -> {target}");
                    }
                }
            }
            out.push('\n');
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interning_is_stable() {
        let mut program = Program::new();
        let a = program.intern("hello");
        let b = program.intern("hello");
        let c = program.intern("world");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(program.str_value(a), "hello");
    }

    #[test]
    fn new_program_has_prelude() {
        let program = Program::new();
        assert_eq!(program.types.len(), 6);
        assert!(program.variable_named("Version").is_some());
        assert!(program.variable_named("NaN").is_some());
        assert!(program.function_named("typeOf").is_some());
        assert_eq!(program.global_offset, 3);
        // One push per predefined global.
        assert_eq!(program.ir.len(), 3);
    }

    #[test]
    fn host_function_rings() {
        let mut program = Program::new();
        let a = program.add_function("f(Int): Int", |_, _, _| Value::Int(0));
        let b = program.add_function("f(Float): Float", |_, _, _| Value::Float(0.0));

        assert_eq!(program.func(a).overload_next, b);
        assert_eq!(program.func(b).overload_next, a);
        assert_eq!(program.func(a).overload_prev, b);
        assert_eq!(program.function_named("f"), Some(a));
        assert_eq!(program.func(a).params.len(), 1);
        assert_eq!(program.func(b).ret_type, PrimitiveType::Float.id());
    }

    #[test]
    #[should_panic(expected = "duplicate")]
    fn duplicate_host_signature_panics() {
        let mut program = Program::new();
        program.add_function("f(Int): Int", |_, _, _| Value::Int(0));
        program.add_function("f(Int): Int", |_, _, _| Value::Int(1));
    }

    #[test]
    fn source_line_lookup_is_floor() {
        let mut src = SourceInfo {
            filename: "t.blik".into(),
            first_addr: 0,
            lines: Vec::new(),
        };
        src.push_line(0, 1);
        src.push_line(4, 2);
        src.push_line(4, 3); // collapses, last wins
        src.push_line(9, 4);

        assert_eq!(src.line_at(0), Some(1));
        assert_eq!(src.line_at(3), Some(1));
        assert_eq!(src.line_at(4), Some(3));
        assert_eq!(src.line_at(8), Some(3));
        assert_eq!(src.line_at(100), Some(4));
    }

    #[test]
    fn snapshot_restore_unlinks_rings() {
        // Compare the ordered vectors, not the name maps: HashMap debug
        // output has no stable order.
        fn image(program: &Program) -> String {
            format!(
                "{:?}|{:?}|{:?}|{}",
                program.ir, program.functions, program.variables, program.global_offset
            )
        }

        let mut program = Program::new();
        program.add_function("g(Int): Int", |_, _, _| Value::Int(0));
        let snap = program.snapshot();
        let before = image(&program);

        program.add_function("g(Float): Float", |_, _, _| Value::Float(0.0));
        program.add_function("h()", |_, _, _| Value::Null);
        program.restore(&snap);

        assert_eq!(image(&program), before);
        let g = program.function_named("g").unwrap();
        assert_eq!(program.func(g).overload_next, g);
        assert!(program.function_named("h").is_none());
    }
}
