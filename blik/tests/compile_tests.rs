//! Compiler tests: diagnostics, rollback, overload rings, peepholes and
//! the IR invariants a compiled program must satisfy.

use blik::api::{compile_source, new_program};
use blik::{compile, tokenize, Error, Instr, Program};

fn compile_err(code: &str) -> blik::CompileReport {
    let mut program = new_program();
    match compile_source(&mut program, code, "test.blik") {
        Err(Error::Compile(report)) => report,
        other => panic!("expected compile error, got {other:?}"),
    }
}

fn first_message(code: &str) -> String {
    compile_err(code).diagnostics[0].message.clone()
}

fn compile_ok(code: &str) -> Program {
    let mut program = new_program();
    compile_source(&mut program, code, "test.blik").expect("compile failed");
    program
}

/// Everything observable about a program except the string arena, which is
/// allowed to grow monotonically.
fn image(program: &Program) -> String {
    format!(
        "{:?}|{:?}|{:?}|{:?}",
        program.ir, program.functions, program.variables, program.sources
    )
}

#[test]
fn typed_declaration_mismatch() {
    let message = first_message("let x: Int := 1.5\n");
    assert_eq!(
        message,
        "Cannot assign Float value to variable 'x' (defined as Int)"
    );
}

#[test]
fn failed_compile_restores_the_program() {
    let mut program = new_program();
    compile_source(&mut program, "let base = 1\n", "first.blik").expect("first compile");
    let before = image(&program);

    let bad = tokenize("let x: Int := 1.5\n", "second.blik").expect("tokenize");
    assert!(compile(&mut program, &bad).is_err());

    assert_eq!(image(&program), before);
    assert!(program.variable_named("x").is_none());
    assert!(program.variable_named("base").is_some());
}

#[test]
fn failed_function_compile_restores_rings() {
    let mut program = new_program();
    compile_source(
        &mut program,
        "func f(n: Int): Int do return n end\n",
        "first.blik",
    )
    .expect("first compile");
    let before = image(&program);

    // Same signature again, plus an unrelated overload that must also be
    // unlinked on rollback.
    let bad = tokenize(
        "func f(n: Int): Int do return n end\nfunc f(x: Float): Float do return x end\nlet y: Int := 0.5\n",
        "second.blik",
    )
    .expect("tokenize");
    assert!(compile(&mut program, &bad).is_err());

    assert_eq!(image(&program), before);
    let f = program.function_named("f").expect("f survives");
    assert_eq!(program.func(f).overload_next, f);
}

#[test]
fn unknown_identifier() {
    assert_eq!(
        first_message("printLn(nope)\n"),
        "Reference to unknown identifier 'nope'"
    );
}

#[test]
fn unknown_function() {
    assert_eq!(first_message("nope()\n"), "Function 'nope' does not exist");
}

#[test]
fn duplicate_variable() {
    assert_eq!(
        first_message("let x = 1\nlet x = 2\n"),
        "Variable 'x' already exists"
    );
    // The previous definition site arrives as a hint.
    let report = compile_err("let x = 1\nlet x = 2\n");
    assert!(report.diagnostics[1]
        .message
        .contains("Previous variable 'x' is defined here"));
}

#[test]
fn let_cannot_hide_global_or_parameter() {
    assert_eq!(
        first_message("let g = 1\nfunc f(): Int\n    let g = 2\n    return g\nend\n"),
        "Declaration 'g' is not allowed to hide global variable"
    );
    assert_eq!(
        first_message("func f(p: Int): Int\n    let p = 2\n    return p\nend\n"),
        "Declaration 'p' is not allowed to hide parameter"
    );
}

#[test]
fn parameter_cannot_hide_global() {
    assert_eq!(
        first_message("let g = 1\nfunc f(g: Int): Int do return g end\n"),
        "Parameter 'g' is not allowed to hide global variable"
    );
}

#[test]
fn assignment_to_immutable() {
    let report = compile_err("let x = 1\nx := 2\n");
    assert_eq!(
        report.diagnostics[0].message,
        "Cannot assign result to non-mutable variable 'x'"
    );
    assert!(report.diagnostics[1]
        .message
        .contains("defined without 'mut' qualifier"));
}

#[test]
fn assignment_to_temporary() {
    assert_eq!(
        first_message("1 := 2\n"),
        "Cannot assign result to temporary value; left operand should be a variable"
    );
}

#[test]
fn bare_equals_gets_a_hint() {
    let report = compile_err("let mut x = 1\nx = 2\n");
    assert_eq!(
        report.diagnostics[0].message,
        "Unexpected token '=', did you mean '==' or ':='?"
    );
}

#[test]
fn operator_type_mismatch() {
    assert_eq!(
        first_message("let x = 1 + 1.5\n"),
        "Cannot use '+' operator on Int and Float values"
    );
    assert_eq!(
        first_message("let x = true + false\n"),
        "Cannot use '+' operator on Bool values"
    );
}

#[test]
fn condition_must_be_bool() {
    assert_eq!(
        first_message("if 1 do printLn(1)\n"),
        "Expected expression result type to be Bool, not Int"
    );
}

#[test]
fn return_type_mismatch() {
    assert_eq!(
        first_message("func f(): Int do return 1.5 end\n"),
        "Cannot return Float value in function defined to return Int"
    );
}

#[test]
fn missing_return_path() {
    assert_eq!(
        first_message("func f(n: Int): Int\n    if n > 0 do return 1\nend\n"),
        "Some code paths do not return a value in function 'f'"
    );
}

#[test]
fn return_outside_function() {
    assert_eq!(
        first_message("return 1\n"),
        "Return statement cannot be used outside function"
    );
}

#[test]
fn break_outside_loop() {
    assert_eq!(first_message("break\n"), "Break statement outside of loop");
    assert_eq!(
        first_message("continue\n"),
        "Continue statement outside of loop"
    );
}

#[test]
fn nested_functions_are_rejected() {
    let code = "func outer(): Int
    func inner(): Int do return 1 end
    return 1
end
";
    assert_eq!(first_message(code), "Nested functions are not supported");
}

#[test]
fn functions_must_be_top_level() {
    let code = "begin
    func f(): Int do return 1 end
end
";
    assert_eq!(first_message(code), "Functions must be defined in top-level scope");
}

#[test]
fn duplicate_function_definitions() {
    assert_eq!(
        first_message(
            "func f(n: Int): Int do return n end\nfunc f(n: Int): Int do return n end\n"
        ),
        "Function 'f(Int): Int' is already defined"
    );
    assert_eq!(
        first_message(
            "func f(n: Int): Int do return n end\nfunc f(n: Int): Float do return 1.0 end\n"
        ),
        "Function 'f(Int): Float' only differs from previously defined 'f(Int): Int' by return type"
    );
}

#[test]
fn intrinsics_cannot_be_overloaded() {
    assert_eq!(
        first_message("func typeOf(n: Int): Int do return n end\n"),
        "Cannot replace or overload native or intrinsic function 'typeOf'"
    );
}

#[test]
fn overload_mismatch_lists_candidates() {
    let code = "func f(n: Int): Int do return n end
func f(x: Float): Float do return x end
f(true)
";
    let report = compile_err(code);
    assert_eq!(
        report.diagnostics[0].message,
        "Cannot call 'f' with (Bool) arguments"
    );
    let hints: Vec<&str> = report.diagnostics[1..]
        .iter()
        .map(|d| d.message.as_str())
        .collect();
    assert!(hints.contains(&"Candidate 'f(Int): Int'"));
    assert!(hints.contains(&"Candidate 'f(Float): Float'"));
}

#[test]
fn global_read_before_possible_call() {
    let code = "let y = f()
let x = 1
func f(): Int do return x end
";
    assert_eq!(
        first_message(code),
        "Function 'f' may be called before variable 'x' exists"
    );
}

#[test]
fn global_defined_before_call_is_fine() {
    let code = "let x = 1
let y = f()
func f(): Int do return x end
";
    compile_ok(code);
}

#[test]
fn self_referencing_initializer() {
    assert_eq!(
        first_message("let x = x + 1\n"),
        "Cannot use variable 'x' before it is defined"
    );
}

#[test]
fn unexpected_eof_sets_the_report_flag() {
    let report = compile_err("if 1 == 1 do\n");
    assert!(report.unexpected_eof);
    assert_eq!(report.depth, 0);

    let report = compile_err("func f(): Int\n    if true\n");
    assert!(report.unexpected_eof);
    assert!(report.depth >= 1);

    // A real error is not an EOF problem.
    let report = compile_err("let x: Int := 1.5\n");
    assert!(!report.unexpected_eof);
}

#[test]
fn branch_operands_stay_in_bounds() {
    let sources = [
        "let mut i = 0\nwhile i < 10\n    i := i + 1\n    if i % 2 == 0 do continue\n    if i > 8 do break\nend\n",
        "for i in 0 : 10\n    printLn(i)\nend\n",
        "func fact(n: Int): Int do if n <= 1 do return 1 else return n * fact(n - 1) end end\nprintLn(fact(5))\n",
        "let a = true && false || true\nif a\n    printLn(1)\nelse if !a\n    printLn(2)\nelse\n    printLn(3)\nend\n",
    ];
    for source in sources {
        let program = compile_ok(source);
        for (addr, instr) in program.ir.iter().enumerate() {
            if let Some(off) = instr.jump_offset() {
                let target = addr as i64 + off as i64;
                assert!(
                    target >= 0 && target <= program.ir.len() as i64,
                    "{source:?}: {} at {addr} jumps to {target}",
                    instr.name()
                );
            }
        }
    }
}

#[test]
fn overload_ring_integrity() {
    let code = "func f(n: Int): Int do return n end
func f(x: Float): Float do return x end
func f(b: Bool): Bool do return b end
";
    let program = compile_ok(code);
    let head = program.function_named("f").expect("ring exists");

    let mut size = 0;
    let mut it = head;
    loop {
        size += 1;
        it = program.func(it).overload_next;
        if it == head {
            break;
        }
    }
    assert_eq!(size, 3);

    // Following next exactly `size` times returns to the start; same for
    // prev.
    let mut forward = head;
    let mut backward = head;
    for _ in 0..size {
        forward = program.func(forward).overload_next;
        backward = program.func(backward).overload_prev;
    }
    assert_eq!(forward, head);
    assert_eq!(backward, head);
}

#[test]
fn source_map_is_monotone() {
    // No while loop here: re-parsing a while condition intentionally maps
    // trailing IR back to the condition's line.
    let code = "let a = 1\nlet b = 2\nif a < b\n    printLn(a)\nelse\n    printLn(b)\nend\nfor i in 0 : 3\n    printLn(i)\nend\n";
    let program = compile_ok(code);
    let src = program.sources.last().expect("source recorded");

    let mut prev_addr = 0;
    for entry in &src.lines {
        assert!(entry.addr >= prev_addr, "line map not sorted: {:?}", src.lines);
        prev_addr = entry.addr;
    }

    let mut prev_line = 0;
    for addr in src.first_addr..program.ir.len() {
        let line = src.line_at(addr).unwrap_or(0);
        assert!(
            line >= prev_line || line == 0,
            "line_at({addr}) = {line} after {prev_line}"
        );
        prev_line = line.max(prev_line);
    }
}

#[test]
fn identical_strings_intern_to_one_handle() {
    let program = compile_ok("let a = \"same\"\nlet b = \"same\"\nlet c = \"other\"\n");
    let pushed: Vec<blik::StrId> = program
        .ir
        .iter()
        .filter_map(|instr| match instr {
            Instr::PushString(id) if program.str_value(*id) == "same" => Some(*id),
            _ => None,
        })
        .collect();
    assert_eq!(pushed.len(), 2);
    assert_eq!(pushed[0], pushed[1]);
}

#[test]
fn let_alias_shares_the_slot() {
    // Three predefined globals plus `a`; `b` aliases `a` and takes none.
    let program = compile_ok("let a = 5\nlet b = a\n");
    assert_eq!(program.ir.last(), Some(&Instr::End(4)));

    let a = program.variable_named("a").expect("a");
    let b = program.variable_named("b").expect("b");
    assert_eq!(program.var(a).offset, program.var(b).offset);
}

#[test]
fn consecutive_functions_share_one_jump() {
    let code = "func a(): Int do return 1 end
func b(): Int do return 2 end
let x = a() + b()
";
    let program = compile_ok(code);
    let jumps = program
        .ir
        .iter()
        .filter(|i| matches!(i, Instr::Jump(_)))
        .count();
    assert_eq!(jumps, 1);
}

#[test]
fn discarded_loads_are_elided() {
    // A bare variable as an expression statement emits nothing at all.
    let with_stmt = compile_ok("let a = 5\na\n");
    let without = compile_ok("let a = 5\n");
    assert_eq!(with_stmt.ir.len(), without.ir.len());
}

#[test]
fn lexer_errors_surface_through_the_api() {
    let mut program = new_program();
    let err = compile_source(&mut program, "let x = \"unterminated\n", "t.blik");
    assert!(matches!(err, Err(Error::Lex(_))));
}

#[test]
fn error_recovery_reports_multiple_statements() {
    let report = compile_err("let x: Int := 1.5\nlet y: Bool := 2\n");
    let errors: Vec<&str> = report
        .diagnostics
        .iter()
        .filter(|d| d.severity == blik::Severity::Error)
        .map(|d| d.message.as_str())
        .collect();
    assert_eq!(errors.len(), 2, "diagnostics: {:?}", report.diagnostics);
}
