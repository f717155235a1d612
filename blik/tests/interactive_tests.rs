//! Interactive session tests: auto-print, continuation prompts, state
//! persistence and the rollback-on-failure guarantees.

use blik::interactive::{Outcome, Session};

fn eval_ok(session: &mut Session, line: &str) -> String {
    match session.eval(line) {
        Outcome::Ok { output } => output,
        other => panic!("expected Ok for {line:?}, got {other:?}"),
    }
}

#[test]
fn expressions_auto_print() {
    let mut session = Session::new();
    assert_eq!(eval_ok(&mut session, "1 + 1"), "2\n");
    assert_eq!(eval_ok(&mut session, "\"hi\""), "hi\n");
    assert_eq!(eval_ok(&mut session, "typeOf(1.5)"), "Float\n");
}

#[test]
fn statements_print_nothing() {
    let mut session = Session::new();
    assert_eq!(eval_ok(&mut session, "let x = 21"), "");
    // ...but the binding persists and can be used later.
    assert_eq!(eval_ok(&mut session, "x * 2"), "42\n");
}

#[test]
fn null_results_are_not_printed() {
    let mut session = Session::new();
    assert_eq!(eval_ok(&mut session, "printLn(\"once\")"), "once\n");
}

#[test]
fn incremental_block_input() {
    let mut session = Session::new();

    match session.eval("if 1 == 1 do") {
        Outcome::Incomplete { indent } => assert_eq!(indent, 1),
        other => panic!("expected Incomplete, got {other:?}"),
    }
    match session.eval("printLn(\"ok\")") {
        Outcome::Incomplete { .. } => {}
        other => panic!("expected Incomplete, got {other:?}"),
    }
    assert_eq!(eval_ok(&mut session, "end"), "ok\n");
}

#[test]
fn nested_blocks_indent_deeper() {
    let mut session = Session::new();

    assert!(matches!(
        session.eval("func f(): Int"),
        Outcome::Incomplete { indent: 1 }
    ));
    match session.eval("if true") {
        Outcome::Incomplete { indent } => assert!(indent >= 2, "indent = {indent}"),
        other => panic!("expected Incomplete, got {other:?}"),
    }
    assert!(matches!(session.eval("return 1"), Outcome::Incomplete { .. }));
    assert!(matches!(session.eval("end"), Outcome::Incomplete { .. }));
    assert!(matches!(session.eval("return 0"), Outcome::Incomplete { .. }));
    assert_eq!(eval_ok(&mut session, "end"), "");
    assert_eq!(eval_ok(&mut session, "f()"), "1\n");
}

#[test]
fn compile_errors_reset_the_fragment() {
    let mut session = Session::new();

    match session.eval("let x: Int := 1.5") {
        Outcome::CompileError { report, .. } => {
            assert!(report.diagnostics[0]
                .message
                .contains("Cannot assign Float value to variable 'x'"));
        }
        other => panic!("expected CompileError, got {other:?}"),
    }

    // The failed fragment left nothing behind.
    assert!(session.program().variable_named("x").is_none());
    assert_eq!(eval_ok(&mut session, "let x = 1"), "");
    assert_eq!(eval_ok(&mut session, "x"), "1\n");
}

#[test]
fn runtime_failure_rolls_back_the_fragment() {
    let mut session = Session::new();
    assert_eq!(eval_ok(&mut session, "let safe = 7"), "");

    match session.eval("let broken = 1 / 0") {
        Outcome::RuntimeError { message, .. } => {
            assert!(message.contains("division by zero"), "message: {message}");
        }
        other => panic!("expected RuntimeError, got {other:?}"),
    }

    // The broken fragment's global is gone, earlier state is intact.
    assert!(session.program().variable_named("broken").is_none());
    assert_eq!(eval_ok(&mut session, "safe"), "7\n");
}

#[test]
fn functions_persist_across_fragments() {
    let mut session = Session::new();

    assert!(matches!(
        session.eval("func double(n: Int): Int"),
        Outcome::Incomplete { .. }
    ));
    assert!(matches!(session.eval("return n * 2"), Outcome::Incomplete { .. }));
    assert_eq!(eval_ok(&mut session, "end"), "");

    assert_eq!(eval_ok(&mut session, "double(21)"), "42\n");
    assert_eq!(eval_ok(&mut session, "double(double(10))"), "40\n");
}

#[test]
fn exit_terminates_the_session() {
    let mut session = Session::new();
    assert!(matches!(session.eval("exit()"), Outcome::Exit { .. }));
}

#[test]
fn empty_input_is_a_no_op() {
    let mut session = Session::new();
    assert_eq!(eval_ok(&mut session, ""), "");
    assert_eq!(eval_ok(&mut session, "   "), "");
}

#[test]
fn globals_accumulate_slots_across_fragments() {
    let mut session = Session::new();
    for i in 0..5 {
        assert_eq!(eval_ok(&mut session, &format!("let g{i} = {i}")), "");
    }
    assert_eq!(eval_ok(&mut session, "g0 + g1 + g2 + g3 + g4"), "10\n");
}
