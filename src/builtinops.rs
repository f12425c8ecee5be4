//! Built-in operations registry.
//!
//! Every operator the compiler recognizes by name is declared once in this module,
//! together with its aliases and its arity. Arity is checked when a form is compiled,
//! so `(car 1 2)` is rejected before anything runs.
//!
//! ```scheme
//! (+ 1 2 3)              ; pure function, also bound as a first-class value
//! (display "hello")      ; effect: needs the host sinks
//! (if (< 1 2) 10 20)     ; special form: controls evaluation of its operands
//! ```
//!
//! ## Functions, Effects and Special Forms
//!
//! - **Functions**: pure operations over already evaluated arguments (`+`, `car`, `eqv?`).
//!   They are also installed as [`Value::Primitive`] bindings in the global environment,
//!   so `(define f +)` works.
//! - **Effects**: evaluated arguments, but they need the running machine: the display and
//!   drawing sinks, the random source, or the suspension request of `yield`/`sync`.
//! - **Special Forms**: receive their operands unevaluated and compile them into
//!   continuation code themselves (`if`, `lambda`, `call/cc`).
//!
//! Operator names are resolved when a form is compiled, so a local variable named like a
//! builtin does not shadow it in operator position.
//!
//! ## Numbers
//!
//! Integers are exact `i64`; overflow is reported as an error rather than wrapping.
//! Mixed integer/float arithmetic yields floats, and exact division stays exact:
//! `(/ 6 3)` is `2` while `(/ 7 2)` is `3.5`.

use crate::Error;
use crate::ast::{Number, NumberType, Value, cons, list};
use crate::compiler::{
    Code, Delivery, compile_begin, compile_call_cc, compile_define, compile_if, compile_lambda,
    compile_quote, compile_set,
};
use crate::intooperation::{
    IntoOperation, IntoVariadicOperation, NumIter, OperationFn, ValueIter,
};
use crate::vm::{Machine, SuspendKind};
use rand::Rng;
use std::cmp::Ordering;
use std::collections::HashMap;
use std::rc::Rc;
use std::sync::{Arc, LazyLock};

/// Expected number of arguments of an operation
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Arity {
    /// Exactly n arguments
    Exact(usize),
    /// At least n arguments
    AtLeast(usize),
    /// Between min and max arguments (inclusive)
    Range(usize, usize),
    /// Any number of arguments
    Any,
}

impl Arity {
    pub fn validate(self, got: usize) -> Result<(), Error> {
        let accepted = match self {
            Arity::Exact(n) => got == n,
            Arity::AtLeast(n) => got >= n,
            Arity::Range(min, max) => (min..=max).contains(&got),
            Arity::Any => true,
        };
        if accepted {
            return Ok(());
        }
        let expected = match self {
            Arity::Exact(n) | Arity::AtLeast(n) => n,
            Arity::Range(min, max) => {
                if got < min {
                    min
                } else {
                    max
                }
            }
            Arity::Any => got,
        };
        Err(Error::arity_error(expected, got))
    }
}

/// Signature of operations that need the running machine
pub(crate) type EffectFn = fn(&mut Machine, Vec<Value>) -> Result<Value, Error>;

/// Signature of special forms: unevaluated operands plus where the result goes
pub(crate) type SpecialFormFn = fn(&[Value], Delivery) -> Result<Code, Error>;

/// Represents the implementation of a built-in operation
#[derive(Clone)]
pub enum OpKind {
    /// Pure function over evaluated arguments, via the canonical erased signature
    Function(Arc<OperationFn>),
    /// Function over evaluated arguments with access to the machine
    Effect(EffectFn),
    /// Compiles its own unevaluated operands
    SpecialForm(SpecialFormFn),
}

impl std::fmt::Debug for OpKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OpKind::Function(_) => write!(f, "Function(<fn>)"),
            OpKind::Effect(_) => write!(f, "Effect(<fn>)"),
            OpKind::SpecialForm(_) => write!(f, "SpecialForm(<fn>)"),
        }
    }
}

/// Definition of a built-in operation
#[derive(Debug, Clone)]
pub struct BuiltinOp {
    /// The primary Scheme identifier for this operation
    pub scheme_id: &'static str,
    /// Alternative spellings resolving to the same operation
    pub aliases: &'static [&'static str],
    /// The implementation of this operation
    pub op_kind: OpKind,
    /// Expected number of arguments
    pub arity: Arity,
}

impl PartialEq for BuiltinOp {
    fn eq(&self, other: &Self) -> bool {
        self.scheme_id == other.scheme_id
    }
}

impl BuiltinOp {
    /// Check the operand count of a form, naming the form on failure
    pub(crate) fn validate_arity(&self, arg_count: usize, form: &Value) -> Result<(), Error> {
        match self.arity.validate(arg_count) {
            Err(Error::ArityError { expected, got, .. }) => {
                Err(Error::arity_error_with_expr(expected, got, form.to_string()))
            }
            other => other,
        }
    }
}

//
// Numeric helpers
//

fn overflow(op: &str) -> Error {
    Error::EvalError(format!("Integer overflow in {op}"))
}

fn add2(a: Number, b: Number) -> Result<Number, Error> {
    match (a, b) {
        (Number::Int(x), Number::Int(y)) => {
            x.checked_add(y).map(Number::Int).ok_or_else(|| overflow("addition"))
        }
        _ => Ok(Number::Float(a.to_f64() + b.to_f64())),
    }
}

fn sub2(a: Number, b: Number) -> Result<Number, Error> {
    match (a, b) {
        (Number::Int(x), Number::Int(y)) => x
            .checked_sub(y)
            .map(Number::Int)
            .ok_or_else(|| overflow("subtraction")),
        _ => Ok(Number::Float(a.to_f64() - b.to_f64())),
    }
}

fn mul2(a: Number, b: Number) -> Result<Number, Error> {
    match (a, b) {
        (Number::Int(x), Number::Int(y)) => x
            .checked_mul(y)
            .map(Number::Int)
            .ok_or_else(|| overflow("multiplication")),
        _ => Ok(Number::Float(a.to_f64() * b.to_f64())),
    }
}

fn div2(a: Number, b: Number) -> Result<Number, Error> {
    match (a, b) {
        (Number::Int(_), Number::Int(0)) => Err(Error::EvalError("Division by zero".into())),
        // Exact only when the division leaves no remainder
        (Number::Int(x), Number::Int(y)) if x.checked_rem(y) == Some(0) => {
            x.checked_div(y).map(Number::Int).ok_or_else(|| overflow("division"))
        }
        _ => Ok(Number::Float(a.to_f64() / b.to_f64())),
    }
}

fn compare(a: Number, b: Number) -> Option<Ordering> {
    match (a, b) {
        (Number::Int(x), Number::Int(y)) => Some(x.cmp(&y)),
        _ => a.to_f64().partial_cmp(&b.to_f64()),
    }
}

fn product(args: NumIter<'_>) -> Result<Number, Error> {
    args.fold(Ok(Number::Int(1)), |acc, n| mul2(acc?, n))
}

fn sum(args: NumIter<'_>) -> Result<Number, Error> {
    args.fold(Ok(Number::Int(0)), |acc, n| add2(acc?, n))
}

//
// Builtin Function Implementations
//

fn builtin_add(args: NumIter<'_>) -> Result<Number, Error> {
    sum(args)
}

fn builtin_sub(first: Number, rest: NumIter<'_>) -> Result<Number, Error> {
    if rest.len() == 0 {
        return sub2(Number::Int(0), first);
    }
    sub2(first, sum(rest)?)
}

fn builtin_mul(args: NumIter<'_>) -> Result<Number, Error> {
    product(args)
}

/// Product rounded down to an integer
fn builtin_floor_mul(args: NumIter<'_>) -> Result<Number, Error> {
    builtin_floor(product(args)?)
}

fn builtin_div(first: Number, rest: NumIter<'_>) -> Result<Number, Error> {
    if rest.len() == 0 {
        return div2(Number::Int(1), first);
    }
    div2(first, product(rest)?)
}

/// Division truncated toward zero
fn builtin_quotient(first: Number, rest: NumIter<'_>) -> Result<Number, Error> {
    let (dividend, divisor) = if rest.len() == 0 {
        (Number::Int(1), first)
    } else {
        (first, product(rest)?)
    };
    match (dividend, divisor) {
        (Number::Int(_), Number::Int(0)) => Err(Error::EvalError("Division by zero".into())),
        (Number::Int(x), Number::Int(y)) => {
            x.checked_div(y).map(Number::Int).ok_or_else(|| overflow("quotient"))
        }
        (a, b) => Ok(Number::Float((a.to_f64() / b.to_f64()).trunc())),
    }
}

/// Remainder with the sign of the dividend
fn builtin_remainder(a: Number, b: Number) -> Result<Number, Error> {
    match (a, b) {
        (Number::Int(_), Number::Int(0)) => Err(Error::EvalError("Division by zero".into())),
        (Number::Int(x), Number::Int(y)) => Ok(Number::Int(x.wrapping_rem(y))),
        _ => Ok(Number::Float(a.to_f64() % b.to_f64())),
    }
}

/// Floored modulo: the result takes the sign of the divisor
fn builtin_modulo(a: Number, b: Number) -> Result<Number, Error> {
    let r = builtin_remainder(a, b)?;
    let is_zero = match r {
        Number::Int(n) => n == 0,
        Number::Float(x) => x == 0.0,
    };
    if !is_zero && a.is_negative() != b.is_negative() {
        add2(r, b)
    } else {
        Ok(r)
    }
}

fn builtin_abs(n: Number) -> Result<Number, Error> {
    match n {
        Number::Int(x) => x.checked_abs().map(Number::Int).ok_or_else(|| overflow("abs")),
        Number::Float(x) => Ok(Number::Float(x.abs())),
    }
}

fn builtin_floor(n: Number) -> Result<Number, Error> {
    Ok(match n {
        Number::Int(_) => n,
        Number::Float(x) => Number::integral(x.floor()),
    })
}

fn builtin_ceil(n: Number) -> Result<Number, Error> {
    Ok(match n {
        Number::Int(_) => n,
        Number::Float(x) => Number::integral(x.ceil()),
    })
}

// Macro to generate binary numeric comparison functions
macro_rules! numeric_comparison {
    ($name:ident, $($ordering:pat_param)|+) => {
        fn $name(a: Number, b: Number) -> bool {
            matches!(compare(a, b), Some($($ordering)|+))
        }
    };
}

numeric_comparison!(builtin_lt, Ordering::Less);
numeric_comparison!(builtin_gt, Ordering::Greater);
numeric_comparison!(builtin_le, Ordering::Less | Ordering::Equal);
numeric_comparison!(builtin_ge, Ordering::Greater | Ordering::Equal);

/// Identity: atoms compare by value and type, heap objects by address
fn is_identical(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Integer(x), Value::Integer(y)) => x == y,
        (Value::Float(x), Value::Float(y)) => x == y,
        (Value::Symbol(x), Value::Symbol(y)) | (Value::String(x), Value::String(y)) => x == y,
        (Value::Bool(x), Value::Bool(y)) => x == y,
        (Value::Nil, Value::Nil) => true,
        (Value::Pair(x), Value::Pair(y)) => Rc::ptr_eq(x, y),
        (Value::Procedure(x), Value::Procedure(y)) => Rc::ptr_eq(x, y),
        (Value::Continuation(x), Value::Continuation(y)) => Rc::ptr_eq(x, y),
        (Value::Primitive(x), Value::Primitive(y)) => Arc::ptr_eq(&x.func, &y.func),
        _ => false,
    }
}

fn builtin_eq(a: Value, b: Value) -> bool {
    is_identical(&a, &b)
}

/// Like `eq?`, but numbers compare by numeric value across integers and floats
fn builtin_eqv(a: Value, b: Value) -> bool {
    match (a.as_number(), b.as_number()) {
        (Ok(x), Ok(y)) => compare(x, y) == Some(Ordering::Equal),
        _ => is_identical(&a, &b),
    }
}

fn builtin_not(value: Value) -> bool {
    !value.is_truthy()
}

fn builtin_null(value: Value) -> bool {
    value.is_nil()
}

fn builtin_car(pair: Value) -> Result<Value, Error> {
    match pair {
        Value::Pair(cell) => Ok(cell.car.clone()),
        other => Err(Error::TypeError(format!("car: expected pair, got {other}"))),
    }
}

fn builtin_cdr(pair: Value) -> Result<Value, Error> {
    match pair {
        Value::Pair(cell) => Ok(cell.cdr.clone()),
        other => Err(Error::TypeError(format!("cdr: expected pair, got {other}"))),
    }
}

fn builtin_cons(car: Value, cdr: Value) -> Value {
    cons(car, cdr)
}

fn builtin_list(args: ValueIter<'_>) -> Value {
    list(args.cloned())
}

/// Concatenate the display forms of all arguments
fn builtin_string(args: ValueIter<'_>) -> String {
    args.map(Value::display_string).collect()
}

//
// Effects
//

fn effect_display(m: &mut Machine, args: Vec<Value>) -> Result<Value, Error> {
    for arg in &args {
        m.host.display.write(&arg.display_string());
    }
    Ok(args.into_iter().last().unwrap_or(Value::Unspecified))
}

fn effect_yield(m: &mut Machine, args: Vec<Value>) -> Result<Value, Error> {
    m.request_suspend(SuspendKind::Yield);
    Ok(args.into_iter().last().unwrap_or(Value::Nil))
}

fn effect_sync(m: &mut Machine, args: Vec<Value>) -> Result<Value, Error> {
    m.request_suspend(SuspendKind::Sync);
    Ok(args.into_iter().last().unwrap_or(Value::Nil))
}

fn effect_clear(m: &mut Machine, _args: Vec<Value>) -> Result<Value, Error> {
    m.host.display.clear();
    Ok(Value::Unspecified)
}

fn effect_gclear(m: &mut Machine, _args: Vec<Value>) -> Result<Value, Error> {
    m.host.graphics.clear_graphics();
    Ok(Value::Unspecified)
}

fn channel(value: &Value) -> Result<u8, Error> {
    let x = value.as_number()?.to_f64();
    Ok(x.clamp(0.0, 255.0) as u8)
}

fn effect_gcolor(m: &mut Machine, args: Vec<Value>) -> Result<Value, Error> {
    let [r, g, b] = [&args[0], &args[1], &args[2]].map(channel);
    let a = match args.get(3) {
        Some(alpha) => channel(alpha)?,
        None => u8::MAX,
    };
    m.host.graphics.set_fill_color(r?, g?, b?, a);
    Ok(Value::Unspecified)
}

fn effect_gbox(m: &mut Machine, args: Vec<Value>) -> Result<Value, Error> {
    let mut coords = [0.0; 4];
    for (slot, arg) in coords.iter_mut().zip(&args) {
        *slot = arg.as_number()?.to_f64();
    }
    let [x, y, w, h] = coords;
    m.host.graphics.fill_rect(x, y, w, h);
    Ok(Value::Unspecified)
}

/// Random integer in `0..n`
fn effect_rnd(m: &mut Machine, args: Vec<Value>) -> Result<Value, Error> {
    let n = args[0].as_number()?.to_f64();
    let r: f64 = m.rng.random();
    Ok(Number::integral((n * r).floor()).into())
}

/// Milliseconds since the Unix epoch
fn effect_time_utc(_m: &mut Machine, _args: Vec<Value>) -> Result<Value, Error> {
    let elapsed = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map_err(|e| Error::EvalError(format!("time-utc: {e}")))?;
    let millis = NumberType::try_from(elapsed.as_millis())
        .map_err(|_| overflow("time-utc"))?;
    Ok(Value::Integer(millis))
}

/// Global registry of all built-in operations.
///
/// Pure builtins are wired through the same adapter layer used for host
/// primitive registration; this is done once at initialization time via a `LazyLock`.
static BUILTIN_OPS: LazyLock<Vec<BuiltinOp>> = LazyLock::new(|| {
    fn builtin_fixed<Args, F>(f: F) -> OpKind
    where
        F: IntoOperation<Args>,
    {
        OpKind::Function(<F as IntoOperation<Args>>::into_operation(f))
    }

    fn builtin_variadic<Args, F>(f: F) -> OpKind
    where
        F: IntoVariadicOperation<Args>,
    {
        OpKind::Function(<F as IntoVariadicOperation<Args>>::into_variadic_operation(f))
    }

    fn op(
        scheme_id: &'static str,
        aliases: &'static [&'static str],
        op_kind: OpKind,
        arity: Arity,
    ) -> BuiltinOp {
        BuiltinOp {
            scheme_id,
            aliases,
            op_kind,
            arity,
        }
    }

    use Arity::*;
    vec![
        // Arithmetic operations
        op(
            "+",
            &[],
            builtin_variadic::<(NumIter<'static>,), _>(builtin_add),
            Any,
        ),
        op(
            "-",
            &[],
            builtin_variadic::<(Number, NumIter<'static>), _>(builtin_sub),
            AtLeast(1),
        ),
        op(
            "*",
            &[],
            builtin_variadic::<(NumIter<'static>,), _>(builtin_mul),
            Any,
        ),
        op(
            "mul",
            &[],
            builtin_variadic::<(NumIter<'static>,), _>(builtin_floor_mul),
            Any,
        ),
        op(
            "/",
            &[],
            builtin_variadic::<(Number, NumIter<'static>), _>(builtin_div),
            AtLeast(1),
        ),
        op(
            "quotient",
            &[],
            builtin_variadic::<(Number, NumIter<'static>), _>(builtin_quotient),
            AtLeast(1),
        ),
        op(
            "remainder",
            &["%"],
            builtin_fixed::<(Number, Number), _>(builtin_remainder),
            Exact(2),
        ),
        op(
            "modulo",
            &["%%"],
            builtin_fixed::<(Number, Number), _>(builtin_modulo),
            Exact(2),
        ),
        op(
            "abs",
            &[],
            builtin_fixed::<(Number,), _>(builtin_abs),
            Exact(1),
        ),
        op(
            "floor",
            &[],
            builtin_fixed::<(Number,), _>(builtin_floor),
            Exact(1),
        ),
        op(
            "ceil",
            &[],
            builtin_fixed::<(Number,), _>(builtin_ceil),
            Exact(1),
        ),
        // Comparison operations
        op(
            "<",
            &[],
            builtin_fixed::<(Number, Number), _>(builtin_lt),
            Exact(2),
        ),
        op(
            ">",
            &[],
            builtin_fixed::<(Number, Number), _>(builtin_gt),
            Exact(2),
        ),
        op(
            "<=",
            &[],
            builtin_fixed::<(Number, Number), _>(builtin_le),
            Exact(2),
        ),
        op(
            ">=",
            &[],
            builtin_fixed::<(Number, Number), _>(builtin_ge),
            Exact(2),
        ),
        op(
            "eq?",
            &["=="],
            builtin_fixed::<(Value, Value), _>(builtin_eq),
            Exact(2),
        ),
        op(
            "eqv?",
            &["="],
            builtin_fixed::<(Value, Value), _>(builtin_eqv),
            Exact(2),
        ),
        op(
            "not",
            &[],
            builtin_fixed::<(Value,), _>(builtin_not),
            Exact(1),
        ),
        op(
            "null?",
            &[],
            builtin_fixed::<(Value,), _>(builtin_null),
            Exact(1),
        ),
        // List operations
        op(
            "cons",
            &[],
            builtin_fixed::<(Value, Value), _>(builtin_cons),
            Exact(2),
        ),
        op(
            "car",
            &[],
            builtin_fixed::<(Value,), _>(builtin_car),
            Exact(1),
        ),
        op(
            "cdr",
            &[],
            builtin_fixed::<(Value,), _>(builtin_cdr),
            Exact(1),
        ),
        op(
            "list",
            &[],
            builtin_variadic::<(ValueIter<'static>,), _>(builtin_list),
            Any,
        ),
        op(
            "string",
            &[],
            builtin_variadic::<(ValueIter<'static>,), _>(builtin_string),
            Any,
        ),
        // Host effects
        op("display", &[], OpKind::Effect(effect_display), Any),
        op("clear", &[], OpKind::Effect(effect_clear), Exact(0)),
        op("gclear", &[], OpKind::Effect(effect_gclear), Exact(0)),
        op("gcolor", &[], OpKind::Effect(effect_gcolor), Range(3, 4)),
        op("gbox", &[], OpKind::Effect(effect_gbox), Exact(4)),
        op("rnd", &[], OpKind::Effect(effect_rnd), Exact(1)),
        op("time-utc", &[], OpKind::Effect(effect_time_utc), Exact(0)),
        op("yield", &[], OpKind::Effect(effect_yield), Range(0, 1)),
        op("sync", &[], OpKind::Effect(effect_sync), Range(0, 1)),
        // Special forms
        op("quote", &[], OpKind::SpecialForm(compile_quote), Exact(1)),
        op("if", &[], OpKind::SpecialForm(compile_if), Range(2, 3)),
        op(
            "define",
            &[],
            OpKind::SpecialForm(compile_define),
            AtLeast(2),
        ),
        op("set!", &[], OpKind::SpecialForm(compile_set), Exact(2)),
        op(
            "lambda",
            &[],
            OpKind::SpecialForm(compile_lambda),
            AtLeast(1),
        ),
        op("begin", &[], OpKind::SpecialForm(compile_begin), Any),
        op(
            "call/cc",
            &["call-with-current-continuation"],
            OpKind::SpecialForm(compile_call_cc),
            Exact(1),
        ),
    ]
});

/// Lazy static map from every identifier (primary or alias) to its BuiltinOp
static BUILTIN_SCHEME: LazyLock<HashMap<&'static str, &'static BuiltinOp>> = LazyLock::new(|| {
    let ops: &'static [BuiltinOp] = BUILTIN_OPS.as_slice();
    ops.iter()
        .flat_map(|op| {
            std::iter::once(op.scheme_id)
                .chain(op.aliases.iter().copied())
                .map(move |id| (id, op))
        })
        .collect()
});

/// Get all builtin operations
pub(crate) fn builtin_ops() -> &'static [BuiltinOp] {
    BUILTIN_OPS.as_slice()
}

/// Find a builtin operation by any of its identifiers
pub(crate) fn find_op(id: &str) -> Option<&'static BuiltinOp> {
    BUILTIN_SCHEME.get(id).copied()
}

#[cfg(test)]
#[expect(clippy::unwrap_used)] // test code OK
mod tests {
    use super::*;
    use crate::ast::{nil, sym, val};

    /// Micro-helper for success cases in comprehensive tests
    fn success<T: Into<Value>>(value: T) -> Option<Value> {
        Some(val(value))
    }

    /// Invoke a pure builtin through the registry using the canonical erased signature
    fn call_builtin(name: &str, args: &[Value]) -> Result<Value, Error> {
        let op = find_op(name).unwrap();
        op.arity.validate(args.len())?;
        match &op.op_kind {
            OpKind::Function(func) => func(args.to_vec()),
            _ => panic!("expected function builtin in tests: {name}"),
        }
    }

    #[test]
    fn test_builtin_ops_registry() {
        let modulo = find_op("modulo").unwrap();
        assert!(std::ptr::eq(modulo, find_op("%%").unwrap()));
        assert_eq!(modulo.arity, Arity::Exact(2));
        assert!(matches!(modulo.op_kind, OpKind::Function(_)));

        assert_eq!(find_op("%").unwrap().scheme_id, "remainder");
        assert_eq!(find_op("==").unwrap().scheme_id, "eq?");
        assert_eq!(find_op("=").unwrap().scheme_id, "eqv?");
        assert_eq!(
            find_op("call-with-current-continuation").unwrap().scheme_id,
            "call/cc"
        );

        for form in ["if", "lambda", "define", "set!", "begin", "quote", "call/cc"] {
            assert!(
                matches!(find_op(form).unwrap().op_kind, OpKind::SpecialForm(_)),
                "{form}"
            );
        }
        for effect in ["display", "yield", "sync", "gbox", "rnd"] {
            assert!(
                matches!(find_op(effect).unwrap().op_kind, OpKind::Effect(_)),
                "{effect}"
            );
        }

        assert!(find_op("unknown").is_none());

        // No identifier is claimed twice
        let total: usize = builtin_ops().iter().map(|op| 1 + op.aliases.len()).sum();
        assert_eq!(total, BUILTIN_SCHEME.len());
    }

    /// Macro to create test cases, invoking builtins via the registry.
    macro_rules! test {
        ($name:expr, $args:expr, $expected:expr) => {
            ($name, call_builtin($name, $args), $expected)
        };
    }

    #[test]
    #[expect(clippy::too_many_lines)] // Comprehensive test coverage is intentionally thorough
    fn test_builtin_function_implementations() {
        type TestCase = (&'static str, Result<Value, Error>, Option<Value>);

        let shared = val([1, 2]);

        let test_cases: Vec<TestCase> = vec![
            // =================================================================
            // ARITHMETIC
            // =================================================================
            test!("+", &[], success(0)),
            test!("+", &[val(1), val(2), val(3)], success(6)),
            test!("+", &[val(1), val(0.5)], success(1.5)),
            test!("+", &[val(i64::MAX), val(1)], None),
            test!("+", &[val(1), val("2")], None),
            test!("-", &[val(5)], success(-5)),
            test!("-", &[val(10), val(3), val(2)], success(5)),
            test!("-", &[val(1.5), val(1)], success(0.5)),
            test!("-", &[val(i64::MIN)], None),
            test!("*", &[], success(1)),
            test!("*", &[val(2), val(3), val(4)], success(24)),
            test!("*", &[val(i64::MAX), val(2)], None),
            test!("mul", &[val(2.5), val(3)], success(7)),
            test!("mul", &[val(-0.5), val(3)], success(-2)),
            test!("/", &[val(6), val(3)], success(2)),
            test!("/", &[val(7), val(2)], success(3.5)),
            test!("/", &[val(4)], success(0.25)),
            test!("/", &[val(1)], success(1)),
            test!("/", &[val(60), val(2), val(3)], success(10)),
            test!("/", &[val(1), val(0)], None),
            test!("/", &[val(1.0), val(0)], success(f64::INFINITY)),
            test!("quotient", &[val(7), val(2)], success(3)),
            test!("quotient", &[val(-7), val(2)], success(-3)),
            test!("quotient", &[val(7), val(-2)], success(-3)),
            test!("quotient", &[val(7.5), val(2)], success(3.0)),
            test!("quotient", &[val(7), val(0)], None),
            test!("remainder", &[val(-7), val(3)], success(-1)),
            test!("remainder", &[val(7), val(-3)], success(1)),
            test!("remainder", &[val(7), val(3)], success(1)),
            test!("remainder", &[val(i64::MIN), val(-1)], success(0)),
            test!("remainder", &[val(1), val(0)], None),
            test!("%", &[val(-7), val(3)], success(-1)),
            test!("modulo", &[val(-7), val(3)], success(2)),
            test!("modulo", &[val(7), val(-3)], success(-2)),
            test!("modulo", &[val(-7), val(-3)], success(-1)),
            test!("modulo", &[val(7), val(3)], success(1)),
            test!("modulo", &[val(-6), val(3)], success(0)),
            test!("%%", &[val(-7), val(3)], success(2)),
            test!("modulo", &[val(-7), val(3), val(1)], None),
            test!("abs", &[val(-4)], success(4)),
            test!("abs", &[val(-4.5)], success(4.5)),
            test!("abs", &[val(i64::MIN)], None),
            test!("floor", &[val(2.7)], success(2)),
            test!("floor", &[val(-2.2)], success(-3)),
            test!("floor", &[val(5)], success(5)),
            test!("ceil", &[val(2.1)], success(3)),
            test!("ceil", &[val(f64::INFINITY)], success(f64::INFINITY)),
            // =================================================================
            // COMPARISON
            // =================================================================
            test!("<", &[val(1), val(2)], success(true)),
            test!("<", &[val(2), val(1)], success(false)),
            test!("<", &[val(1), val(1.5)], success(true)),
            test!(">", &[val(3), val(2)], success(true)),
            test!("<=", &[val(2), val(2)], success(true)),
            test!(">=", &[val(1), val(2)], success(false)),
            test!("<", &[val(1), val(f64::NAN)], success(false)),
            test!("<", &[val(1)], None),
            test!("<", &[val(1), val("a")], None),
            // =================================================================
            // EQUIVALENCE
            // =================================================================
            test!("eqv?", &[val(2), val(2.0)], success(true)),
            test!("=", &[val(3), val(3)], success(true)),
            test!("=", &[val(3), val(4)], success(false)),
            test!("eq?", &[val(2), val(2.0)], success(false)),
            test!("eq?", &[val(2), val(2)], success(true)),
            test!("eq?", &[sym("a"), sym("a")], success(true)),
            test!("eq?", &[val("s"), val("s")], success(true)),
            test!("eq?", &[nil(), nil()], success(true)),
            test!("eq?", &[val([1, 2]), val([1, 2])], success(false)),
            test!("eq?", &[shared.clone(), shared.clone()], success(true)),
            test!("==", &[val(true), val(true)], success(true)),
            test!("eqv?", &[val("1"), val(1)], success(false)),
            // =================================================================
            // LOGIC
            // =================================================================
            test!("not", &[val(false)], success(true)),
            test!("not", &[val(0)], success(true)),
            test!("not", &[nil()], success(true)),
            test!("not", &[val("")], success(false)),
            test!("null?", &[nil()], success(true)),
            test!("null?", &[val([1])], success(false)),
            test!("null?", &[val(false)], success(false)),
            // =================================================================
            // LISTS
            // =================================================================
            test!("cons", &[val(1), val(2)], Some(cons(val(1), val(2)))),
            test!("cons", &[val(1), nil()], success([1])),
            test!("car", &[val([1, 2, 3])], success(1)),
            test!("cdr", &[val([1, 2, 3])], success([2, 3])),
            test!("cdr", &[cons(val(1), val(2))], success(2)),
            test!("car", &[nil()], None),
            test!("cdr", &[val(5)], None),
            test!("list", &[], Some(nil())),
            test!("list", &[val(1), val("two"), nil()], Some(val(vec![val(1), val("two"), nil()]))),
            // =================================================================
            // STRINGS
            // =================================================================
            test!("string", &[val("score: "), val(42)], success("score: 42")),
            test!("string", &[], success("")),
            test!("string", &[val([1, 2]), val(true)], success("(1 2)#t")),
        ];

        for (test_expr, result, expected) in test_cases {
            match (result, expected) {
                (Ok(actual), Some(expected_val)) => {
                    assert_eq!(actual, expected_val, "Failed for test case: {test_expr}");
                }
                (Err(_), None) => {} // Expected error
                (actual, expected) => panic!(
                    "Unexpected result for test case: {test_expr}\nGot: {actual:?}, Expected: {expected:?}"
                ),
            }
        }
    }

    #[test]
    fn test_arity_validation() {
        use Arity::*;

        Exact(2).validate(2).unwrap();
        Exact(2).validate(1).unwrap_err();
        Exact(2).validate(3).unwrap_err();

        AtLeast(1).validate(1).unwrap();
        AtLeast(1).validate(2).unwrap();
        AtLeast(1).validate(0).unwrap_err();

        Range(3, 4).validate(3).unwrap();
        Range(3, 4).validate(4).unwrap();
        Range(3, 4).validate(2).unwrap_err();
        Range(3, 4).validate(5).unwrap_err();

        Any.validate(0).unwrap();
        Any.validate(100).unwrap();

        match Range(3, 4).validate(6).unwrap_err() {
            Error::ArityError { expected, got, .. } => {
                assert_eq!(expected, 4);
                assert_eq!(got, 6);
            }
            other => panic!("Expected ArityError, got {other:?}"),
        }

        let car = find_op("car").unwrap();
        match car.validate_arity(2, &val(vec![sym("car"), val(1), val(2)])) {
            Err(Error::ArityError {
                expression: Some(expr),
                ..
            }) => assert_eq!(expr, "(car 1 2)"),
            other => panic!("Expected ArityError with expression, got {other:?}"),
        }
    }
}
