//! Native standard functions registered on top of the compiler intrinsics.
//!
//! The signatures use the host-registration form understood by
//! [`Program::add_function`]; argument types were checked during
//! compilation, so the callbacks only pattern-match for extraction.

use crate::program::Program;
use crate::value::Value;

pub fn install_all(program: &mut Program) {
    install_math(program);
}

fn unary_float(program: &mut Program, signature: &str, f: fn(f64) -> f64) {
    program.add_function(signature, move |_, _, args| match args {
        [Value::Float(x)] => Value::Float(f(*x)),
        _ => Value::Null,
    });
}

pub fn install_math(program: &mut Program) {
    unary_float(program, "sqrt(Float): Float", f64::sqrt);
    unary_float(program, "cbrt(Float): Float", f64::cbrt);
    unary_float(program, "exp(Float): Float", f64::exp);
    unary_float(program, "log(Float): Float", f64::ln);
    unary_float(program, "log2(Float): Float", f64::log2);
    unary_float(program, "log10(Float): Float", f64::log10);
    unary_float(program, "sin(Float): Float", f64::sin);
    unary_float(program, "cos(Float): Float", f64::cos);
    unary_float(program, "tan(Float): Float", f64::tan);
    unary_float(program, "asin(Float): Float", f64::asin);
    unary_float(program, "acos(Float): Float", f64::acos);
    unary_float(program, "atan(Float): Float", f64::atan);
    unary_float(program, "floor(Float): Float", f64::floor);
    unary_float(program, "ceil(Float): Float", f64::ceil);
    unary_float(program, "round(Float): Float", f64::round);
    unary_float(program, "abs(Float): Float", f64::abs);

    program.add_function("pow(Float, Float): Float", |_, _, args| match args {
        [Value::Float(base), Value::Float(exp)] => Value::Float(base.powf(*exp)),
        _ => Value::Null,
    });
    program.add_function("abs(Int): Int", |_, _, args| match args {
        [Value::Int(x)] => Value::Int(x.wrapping_abs()),
        _ => Value::Null,
    });
    program.add_function("min(Int, Int): Int", |_, _, args| match args {
        [Value::Int(a), Value::Int(b)] => Value::Int(*a.min(b)),
        _ => Value::Null,
    });
    program.add_function("max(Int, Int): Int", |_, _, args| match args {
        [Value::Int(a), Value::Int(b)] => Value::Int(*a.max(b)),
        _ => Value::Null,
    });
    program.add_function("min(Float, Float): Float", |_, _, args| match args {
        [Value::Float(a), Value::Float(b)] => Value::Float(a.min(*b)),
        _ => Value::Null,
    });
    program.add_function("max(Float, Float): Float", |_, _, args| match args {
        [Value::Float(a), Value::Float(b)] => Value::Float(a.max(*b)),
        _ => Value::Null,
    });
}
