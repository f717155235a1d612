//! End-to-end execution tests: compile a source snippet in a fresh program
//! and check the captured output and exit status.

use blik::api::run_source;
use blik::{Error, VmError};

fn output_of(code: &str) -> String {
    let (exit_code, output) = run_source(code, "test.blik").expect("program failed");
    assert_eq!(exit_code, 0);
    output
}

fn runtime_error_of(code: &str) -> (VmError, String) {
    match run_source(code, "test.blik") {
        Err(Error::Runtime { error, trace }) => (error.error, trace),
        other => panic!("expected runtime error, got {other:?}"),
    }
}

#[test]
fn arithmetic_precedence() {
    assert_eq!(output_of("printLn(1 + 2 * 3)\n"), "7\n");
    assert_eq!(output_of("printLn((1 + 2) * 3)\n"), "9\n");
    assert_eq!(output_of("printLn(10 / 3)\n"), "3\n");
    assert_eq!(output_of("printLn(10 % 3)\n"), "1\n");
}

#[test]
fn mutable_reassignment() {
    let code = "let x = 2; let mut y = 3; y := y * x; printLn(y)\n";
    assert_eq!(output_of(code), "6\n");
}

#[test]
fn compound_assignments() {
    let code = "let mut n = 10
n += 5
n -= 1
n *= 2
n /= 4
printLn(n)
";
    assert_eq!(output_of(code), "7\n");
}

#[test]
fn factorial_recursion() {
    let code = "func fact(n: Int): Int do if n <= 1 do return 1 else return n * fact(n - 1) end end; printLn(fact(10))\n";
    assert_eq!(output_of(code), "3628800\n");
}

#[test]
fn tail_recursion_runs_in_bounded_stack() {
    // One million self-calls only terminate if the compiler rewrote the
    // tail call into a loop; otherwise the frame cap trips first.
    let code = "func loop(n: Int): Int do if n == 0 do return 0 else return loop(n - 1) end end; printLn(loop(1000000))\n";
    assert_eq!(output_of(code), "0\n");
}

#[test]
fn tail_recursion_flag_is_set() {
    let mut program = blik::api::new_program();
    blik::api::compile_source(
        &mut program,
        "func loop(n: Int): Int do if n == 0 do return 0 else return loop(n - 1) end end\n",
        "test.blik",
    )
    .expect("compile");

    let id = program.function_named("loop").expect("function exists");
    assert!(program.func(id).tail_recursive);
}

#[test]
fn non_tail_recursion_overflows_cleanly() {
    let code = "func r(n: Int): Int do if n == 0 do return 0 else return 1 + r(n - 1) end end; printLn(r(1000000))\n";
    let (error, _) = runtime_error_of(code);
    assert_eq!(error, VmError::StackOverflow);
}

#[test]
fn float_arithmetic_and_conversions() {
    assert_eq!(output_of("printLn(1.5 + 2.5)\n"), "4\n");
    assert_eq!(output_of("printLn(Float(3) / 2.0)\n"), "1.5\n");
    assert_eq!(output_of("printLn(Int(2.9))\n"), "2\n");
    // Identity conversions emit nothing but still work.
    assert_eq!(output_of("printLn(Float(1.5))\n"), "1.5\n");
    assert_eq!(output_of("printLn(Int(7))\n"), "7\n");
}

#[test]
fn type_of_is_compile_time() {
    assert_eq!(output_of("printLn(typeOf(1) == Int)\n"), "true\n");
    assert_eq!(output_of("printLn(typeOf(1.0) != Int)\n"), "true\n");
    assert_eq!(output_of("printLn(typeOf(\"s\"))\n"), "String\n");
}

#[test]
fn type_of_does_not_evaluate_its_argument() {
    use std::cell::Cell;
    use std::rc::Rc;

    let mut program = blik::api::new_program();
    let counter = Rc::new(Cell::new(0));
    {
        let counter = counter.clone();
        program.add_function("bump(): Int", move |_, _, _| {
            counter.set(counter.get() + 1);
            blik::Value::Int(counter.get())
        });
    }

    blik::api::compile_source(
        &mut program,
        "printLn(typeOf(bump()))\nprintLn(bump())\n",
        "test.blik",
    )
    .expect("compile");

    let mut vm = blik::Vm::new();
    vm.run(&program).expect("run");
    assert_eq!(vm.take_output(), "Int\n1\n");
    // Only the second, real call ran.
    assert_eq!(counter.get(), 1);
}

#[test]
fn short_circuit_skips_side_effects() {
    let code = "func side(v: Bool): Bool
    printLn(\"called\")
    return v
end
printLn(false && side(true))
printLn(true || side(true))
printLn(true && side(true))
";
    assert_eq!(output_of(code), "false\ntrue\ncalled\ntrue\n");
}

#[test]
fn while_loop_with_break_and_continue() {
    let code = "let mut i = 0
let mut total = 0
while true
    i := i + 1
    if i > 10 do break
    if i % 2 == 0 do continue
    total := total + i
end
printLn(total)
";
    // 1 + 3 + 5 + 7 + 9
    assert_eq!(output_of(code), "25\n");
}

#[test]
fn for_loop_is_exclusive() {
    let code = "let mut total = 0
for i in 0 : 5
    total := total + i
end
printLn(total)
";
    assert_eq!(output_of(code), "10\n");
}

#[test]
fn nested_scopes() {
    let code = "let x = 1
begin
    let y = x + 1
    printLn(y)
end
printLn(x)
";
    assert_eq!(output_of(code), "2\n1\n");
}

#[test]
fn strings_and_escapes() {
    assert_eq!(output_of("printLn(\"a\\tb\")\n"), "a\tb\n");
    assert_eq!(output_of("print(\"no newline\")\n"), "no newline");
    assert_eq!(
        output_of("printLn(\"x = \", 42, \", ok = \", true)\n"),
        "x = 42, ok = true\n"
    );
}

#[test]
fn bitwise_and_shifts() {
    assert_eq!(output_of("printLn(12 & 10)\n"), "8\n");
    assert_eq!(output_of("printLn(12 | 3)\n"), "15\n");
    assert_eq!(output_of("printLn(12 ^ 10)\n"), "6\n");
    assert_eq!(output_of("printLn(~0)\n"), "-1\n");
    assert_eq!(output_of("printLn(1 << 4)\n"), "16\n");
    assert_eq!(output_of("printLn(256 >> 4)\n"), "16\n");
    assert_eq!(output_of("printLn(1 <<< 65)\n"), "2\n");
    assert_eq!(output_of("printLn(2 >>> 1)\n"), "1\n");
}

#[test]
fn unary_minus_folds_on_literals() {
    assert_eq!(output_of("printLn(-5)\n"), "-5\n");
    assert_eq!(output_of("printLn(-----64)\n"), "-64\n");
    assert_eq!(output_of("printLn(- -7)\n"), "7\n");
    assert_eq!(output_of("printLn(-9223372036854775807 - 1)\n"), "-9223372036854775808\n");
}

#[test]
fn logical_not_and_comparisons() {
    assert_eq!(output_of("printLn(!(1 > 2))\n"), "true\n");
    assert_eq!(output_of("printLn(1.5 <= 1.5)\n"), "true\n");
    assert_eq!(output_of("printLn(true != false)\n"), "true\n");
}

#[test]
fn math_natives() {
    assert_eq!(output_of("printLn(sqrt(9.0))\n"), "3\n");
    assert_eq!(output_of("printLn(abs(-5))\n"), "5\n");
    assert_eq!(output_of("printLn(abs(-2.5))\n"), "2.5\n");
    assert_eq!(output_of("printLn(min(3, 7), \" \", max(3, 7))\n"), "3 7\n");
    assert_eq!(output_of("printLn(pow(2.0, 10.0))\n"), "1024\n");
}

#[test]
fn predefined_globals() {
    assert_eq!(output_of("printLn(typeOf(NaN) == Float)\n"), "true\n");
    assert_eq!(output_of("printLn(Inf > 0.0)\n"), "true\n");
    assert!(!output_of("printLn(Version)\n").trim().is_empty());
}

#[test]
fn function_overloads_dispatch_by_argument_types() {
    let code = "func twice(n: Int): Int do return n * 2 end
func twice(x: Float): Float do return x * 2.0 end
printLn(twice(21))
printLn(twice(1.25))
";
    assert_eq!(output_of(code), "42\n2.5\n");
}

#[test]
fn forward_calls_resolve() {
    let code = "printLn(later(4))
func later(n: Int): Int do return n + 1 end
";
    assert_eq!(output_of(code), "5\n");
}

#[test]
fn division_by_zero_is_a_runtime_error() {
    let (error, trace) = runtime_error_of("let x = 1 / 0\n");
    assert_eq!(error, VmError::DivisionByZero);
    assert!(trace.contains("test.blik:1"), "trace: {trace}");
}

#[test]
fn modulo_by_zero_is_a_runtime_error() {
    let (error, _) = runtime_error_of("let x = 1 % 0\n");
    assert_eq!(error, VmError::ModuloByZero);
}

#[test]
fn runtime_trace_names_the_function() {
    let code = "func crash(n: Int): Int
    return n / 0
end
printLn(crash(1))
";
    let (_, trace) = runtime_error_of(code);
    assert!(trace.contains("in crash"), "trace: {trace}");
    assert!(trace.contains("<top level>"), "trace: {trace}");
}

#[test]
fn determinism() {
    let code = "func fib(n: Int): Int do if n < 2 do return n else return fib(n - 1) + fib(n - 2) end end; printLn(fib(15))\n";
    let first = run_source(code, "test.blik").expect("first run");
    let second = run_source(code, "test.blik").expect("second run");
    assert_eq!(first, second);
    assert_eq!(first.1, "610\n");
}

#[test]
fn run_file_streams_to_writer() {
    use std::io::Write as _;

    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("script.blik");
    let mut file = std::fs::File::create(&path).expect("create");
    writeln!(file, "printLn(6 * 7)").expect("write");
    drop(file);

    let exit_code = blik::api::run_file(&path, Box::new(std::io::sink())).expect("run");
    assert_eq!(exit_code, 0);
}
