//! VM throughput benchmarks over a few representative programs.

use std::hint::black_box;

use criterion::{criterion_group, criterion_main, Criterion};

use blik::api::{compile_source, new_program};
use blik::{Program, Vm};

fn compiled(code: &str) -> Program {
    let mut program = new_program();
    compile_source(&mut program, code, "bench.blik").expect("bench program compiles");
    program
}

fn bench_execute(c: &mut Criterion) {
    let fib = compiled(
        "func fib(n: Int): Int do if n < 2 do return n else return fib(n - 1) + fib(n - 2) end end\nlet r = fib(18)\n",
    );
    c.bench_function("fib_18", |b| {
        b.iter(|| {
            let mut vm = Vm::new();
            black_box(vm.run(&fib).expect("run"));
        })
    });

    let tail = compiled(
        "func down(n: Int): Int do if n == 0 do return 0 else return down(n - 1) end end\nlet r = down(100000)\n",
    );
    c.bench_function("tail_loop_100k", |b| {
        b.iter(|| {
            let mut vm = Vm::new();
            black_box(vm.run(&tail).expect("run"));
        })
    });

    let arith = compiled(
        "let mut total = 0\nfor i in 0 : 10000\n    total := total + i * 3 % 7\nend\n",
    );
    c.bench_function("arith_loop_10k", |b| {
        b.iter(|| {
            let mut vm = Vm::new();
            black_box(vm.run(&arith).expect("run"));
        })
    });
}

criterion_group!(benches, bench_execute);
criterion_main!(benches);
