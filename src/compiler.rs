//! CPS compiler.
//!
//! Each expression is compiled into a [`Code`] closure that already knows its continuation:
//! where its value goes once produced. Running a closure performs one small step and returns
//! the next [`Thunk`] to run, so the VM only ever needs a flat loop.
//!
//! Values travel between steps on the machine's value stack. A [`Delivery`] describes what
//! happens to the value an expression produces:
//!
//! - `to(next)`: push it and continue with `next` in the same frame,
//! - `discarding(next)`: drop it and continue with `next` (non-final forms of a body),
//! - `tail()`: push it and return to whatever the current frame's caller asked for.
//!
//! A procedure call in tail position passes its own frame's return point to the callee, so a
//! loop written as tail recursion never grows anything.

use crate::Error;
use crate::ast::{Continuation, Procedure, Value};
use crate::builtinops::{BuiltinOp, EffectFn, OpKind, find_op};
use crate::environment::{Env, Frame, ParamSpec};
use crate::intooperation::OperationFn;
use crate::vm::Machine;
use smallvec::SmallVec;
use std::rc::Rc;
use std::sync::Arc;

/// A compiled step: runs against the machine in an environment and yields the next step
pub type Code = Rc<dyn Fn(&mut Machine, &Env) -> Result<Step, Error>>;

/// A step bound to the environment it runs in
#[derive(Clone)]
pub struct Thunk {
    pub(crate) code: Code,
    pub(crate) env: Env,
}

impl Thunk {
    pub(crate) fn new(code: &Code, env: &Env) -> Self {
        Thunk {
            code: Rc::clone(code),
            env: Rc::clone(env),
        }
    }
}

/// The next step to run, or `None` when the machine halts
pub type Step = Option<Thunk>;

/// Where the value of a compiled expression goes
#[derive(Clone)]
pub struct Delivery {
    next: Option<Code>,
    discard: bool,
    /// Resume point for a procedure called with this delivery. Procedure bodies always push
    /// their value, so a discarding delivery pops it again before continuing.
    after_call: Option<Code>,
}

impl Delivery {
    pub(crate) fn to(next: Code) -> Self {
        Delivery {
            after_call: Some(Rc::clone(&next)),
            next: Some(next),
            discard: false,
        }
    }

    pub(crate) fn discarding(next: Code) -> Self {
        let resume = Rc::clone(&next);
        let pop_then_next: Code = Rc::new(move |m: &mut Machine, env: &Env| {
            m.pop()?;
            Ok(Some(Thunk::new(&resume, env)))
        });
        Delivery {
            next: Some(next),
            discard: true,
            after_call: Some(pop_then_next),
        }
    }

    pub(crate) fn tail() -> Self {
        Delivery {
            next: None,
            discard: false,
            after_call: None,
        }
    }

    /// Hand `value` on and pick the step that follows
    pub(crate) fn deliver(&self, m: &mut Machine, env: &Env, value: Value) -> Step {
        if !self.discard {
            m.push(value);
        }
        match &self.next {
            Some(next) => Some(Thunk::new(next, env)),
            None => env.return_to(),
        }
    }

    /// The step a callee returns to once its body has pushed a value
    pub(crate) fn return_thunk(&self, env: &Env) -> Option<Thunk> {
        match &self.after_call {
            Some(code) => Some(Thunk::new(code, env)),
            None => env.return_to(),
        }
    }
}

/// Compile a single expression
pub(crate) fn compile(expr: &Value, k: Delivery) -> Result<Code, Error> {
    match expr {
        Value::Symbol(name) => {
            let name = Rc::clone(name);
            Ok(Rc::new(move |m: &mut Machine, env: &Env| {
                let value = env.lookup(&name)?;
                Ok(k.deliver(m, env, value))
            }))
        }
        Value::Pair(cell) => {
            let mut operands: SmallVec<[Value; 4]> = SmallVec::new();
            let mut cursor = &cell.cdr;
            while let Value::Pair(operand) = cursor {
                operands.push(operand.car.clone());
                cursor = &operand.cdr;
            }
            if !cursor.is_nil() {
                return Err(Error::EvalError(format!("Improper form: {expr}")));
            }
            if let Some(op) = cell.car.as_symbol().and_then(|name| find_op(name)) {
                return compile_builtin(op, expr, &operands, k);
            }
            compile_application(&cell.car, &operands, k)
        }
        constant => Ok(constant_code(constant.clone(), k)),
    }
}

fn constant_code(value: Value, k: Delivery) -> Code {
    Rc::new(move |m: &mut Machine, env: &Env| Ok(k.deliver(m, env, value.clone())))
}

fn compile_builtin(
    op: &'static BuiltinOp,
    form: &Value,
    operands: &[Value],
    k: Delivery,
) -> Result<Code, Error> {
    op.validate_arity(operands.len(), form)?;
    match &op.op_kind {
        OpKind::SpecialForm(compile_form) => compile_form(operands, k),
        OpKind::Function(func) => {
            let apply = function_code(Arc::clone(func), operands.len(), k);
            compile_operands(operands, apply)
        }
        OpKind::Effect(effect) => {
            let apply = effect_code(*effect, operands.len(), k);
            compile_operands(operands, apply)
        }
    }
}

/// Chain the evaluation of `operands`, left to right, in front of `then`
fn compile_operands(operands: &[Value], then: Code) -> Result<Code, Error> {
    operands
        .iter()
        .rev()
        .try_fold(then, |next, operand| compile(operand, Delivery::to(next)))
}

fn function_code(func: Arc<OperationFn>, argc: usize, k: Delivery) -> Code {
    Rc::new(move |m: &mut Machine, env: &Env| {
        let args = m.pop_n(argc)?;
        let value = func(args)?;
        Ok(k.deliver(m, env, value))
    })
}

fn effect_code(effect: EffectFn, argc: usize, k: Delivery) -> Code {
    Rc::new(move |m: &mut Machine, env: &Env| {
        let args = m.pop_n(argc)?;
        let value = effect(m, args)?;
        let next = k.deliver(m, env, value);
        Ok(m.park(next))
    })
}

fn compile_application(operator: &Value, operands: &[Value], k: Delivery) -> Result<Code, Error> {
    let argc = operands.len();
    let apply_code: Code = Rc::new(move |m: &mut Machine, env: &Env| {
        let callee = m.pop()?;
        let args = m.pop_n(argc)?;
        apply(m, env, callee, args, &k)
    });
    let with_operator = compile(operator, Delivery::to(apply_code))?;
    compile_operands(operands, with_operator)
}

/// Invoke `callee` with evaluated arguments
pub(crate) fn apply(
    m: &mut Machine,
    env: &Env,
    callee: Value,
    args: Vec<Value>,
    k: &Delivery,
) -> Result<Step, Error> {
    match callee {
        Value::Procedure(procedure) => {
            let frame = Frame::child(&procedure.env, k.return_thunk(env));
            procedure.params.bind(&frame, args);
            Ok(Some(Thunk {
                code: Rc::clone(&procedure.body),
                env: frame,
            }))
        }
        Value::Continuation(continuation) => {
            // Reinstate the captured stack; the capture point receives exactly one value
            m.stack.clone_from(&continuation.stack);
            m.push(args.into_iter().next().unwrap_or(Value::Nil));
            Ok(continuation.resume.clone())
        }
        Value::Primitive(primitive) => {
            let value = primitive.call(args)?;
            Ok(k.deliver(m, env, value))
        }
        other => Err(Error::TypeError(format!(
            "Illegal closure: {other} is not applicable"
        ))),
    }
}

/// Compile a body: every form but the last has its value dropped
fn compile_sequence(forms: &[Value], k: Delivery) -> Result<Code, Error> {
    let Some((last, init)) = forms.split_last() else {
        return Ok(constant_code(Value::Unspecified, k));
    };
    let last = compile(last, k)?;
    init.iter()
        .rev()
        .try_fold(last, |next, form| compile(form, Delivery::discarding(next)))
}

/// Compile the top-level forms of one submission, one entry per form.
///
/// Forms are not chained into each other: every non-final form ends in a step that looks
/// up its successor by index in the machine's loaded program, so a long program is a flat
/// list rather than a nested closure. `generation` identifies the submission; a
/// continuation captured at top level and invoked after a later submission ends the run
/// with its value instead of jumping into the new program.
///
/// The last form runs in tail position of the global frame, so its value is left on the
/// stack when the machine halts. With `echo` set, the printed value of every earlier form
/// that produces one is written to the display.
#[tracing::instrument(level = "debug", skip_all, fields(forms = forms.len()))]
pub(crate) fn compile_program(
    forms: &[Value],
    echo: bool,
    generation: u64,
) -> Result<Vec<Code>, Error> {
    let Some((last, init)) = forms.split_last() else {
        return Ok(vec![constant_code(Value::Unspecified, Delivery::tail())]);
    };
    let mut program = Vec::with_capacity(forms.len());
    for (index, form) in init.iter().enumerate() {
        let k = Delivery::to(form_end(index, echo, generation));
        program.push(compile(form, k)?);
    }
    program.push(compile(last, Delivery::tail())?);
    Ok(program)
}

/// Finish top-level form `index`: echo its value and move on to the next form
fn form_end(index: usize, echo: bool, generation: u64) -> Code {
    Rc::new(move |m: &mut Machine, env: &Env| {
        let Some(next) = m.top_level_form(generation, index + 1) else {
            // The program was replaced; the value stays as the result
            return Ok(None);
        };
        let value = m.pop()?;
        if echo && !matches!(value, Value::Unspecified) {
            m.host.display.write(&format!("{value}\n"));
        }
        Ok(Some(Thunk::new(&next, env)))
    })
}

//
// Special forms
//

fn expect_symbol<'a>(form: &str, value: &'a Value) -> Result<&'a Rc<str>, Error> {
    value
        .as_symbol()
        .ok_or_else(|| Error::EvalError(format!("{form}: expected a symbol, got {value}")))
}

pub(crate) fn compile_quote(operands: &[Value], k: Delivery) -> Result<Code, Error> {
    Ok(constant_code(operands[0].clone(), k))
}

pub(crate) fn compile_if(operands: &[Value], k: Delivery) -> Result<Code, Error> {
    let consequent = compile(&operands[1], k.clone())?;
    let alternative = match operands.get(2) {
        Some(expr) => compile(expr, k)?,
        None => constant_code(Value::Bool(false), k),
    };
    let branch: Code = Rc::new(move |m: &mut Machine, env: &Env| {
        let chosen = if m.pop()?.is_truthy() {
            &consequent
        } else {
            &alternative
        };
        Ok(Some(Thunk::new(chosen, env)))
    });
    compile(&operands[0], Delivery::to(branch))
}

fn lambda_code(params: &Value, body: &[Value], k: Delivery) -> Result<Code, Error> {
    let params = Rc::new(ParamSpec::from_form(params)?);
    let body = compile_sequence(body, Delivery::tail())?;
    Ok(Rc::new(move |m: &mut Machine, env: &Env| {
        let procedure = Procedure {
            params: Rc::clone(&params),
            body: Rc::clone(&body),
            env: Rc::clone(env),
        };
        Ok(k.deliver(m, env, Value::Procedure(Rc::new(procedure))))
    }))
}

pub(crate) fn compile_lambda(operands: &[Value], k: Delivery) -> Result<Code, Error> {
    lambda_code(&operands[0], &operands[1..], k)
}

/// `(define name expr)` or `(define (name . params) body...)`
pub(crate) fn compile_define(operands: &[Value], k: Delivery) -> Result<Code, Error> {
    let (name, value_k) = match &operands[0] {
        Value::Pair(signature) => {
            let name = Rc::clone(expect_symbol("define", &signature.car)?);
            let bind = bind_code(Rc::clone(&name), k);
            (name, lambda_code(&signature.cdr, &operands[1..], Delivery::to(bind))?)
        }
        target => {
            let name = Rc::clone(expect_symbol("define", target)?);
            if operands.len() != 2 {
                return Err(Error::EvalError(format!(
                    "define: {name} takes exactly one value expression"
                )));
            }
            let bind = bind_code(Rc::clone(&name), k);
            (name, compile(&operands[1], Delivery::to(bind))?)
        }
    };
    tracing::trace!(%name, "compiled definition");
    Ok(value_k)
}

fn bind_code(name: Rc<str>, k: Delivery) -> Code {
    Rc::new(move |m: &mut Machine, env: &Env| {
        let value = m.pop()?;
        env.define(Rc::clone(&name), value);
        Ok(k.deliver(m, env, Value::Unspecified))
    })
}

pub(crate) fn compile_set(operands: &[Value], k: Delivery) -> Result<Code, Error> {
    let name = Rc::clone(expect_symbol("set!", &operands[0])?);
    let assign: Code = Rc::new(move |m: &mut Machine, env: &Env| {
        let value = m.pop()?;
        env.set(&name, value.clone())?;
        Ok(k.deliver(m, env, value))
    });
    compile(&operands[1], Delivery::to(assign))
}

pub(crate) fn compile_begin(operands: &[Value], k: Delivery) -> Result<Code, Error> {
    compile_sequence(operands, k)
}

/// `(call/cc f)`: apply `f` to the continuation of the `call/cc` form itself
pub(crate) fn compile_call_cc(operands: &[Value], k: Delivery) -> Result<Code, Error> {
    let capture: Code = Rc::new(move |m: &mut Machine, env: &Env| {
        let callee = m.pop()?;
        let continuation = Continuation {
            resume: k.return_thunk(env),
            stack: m.stack.clone(),
        };
        let args = vec![Value::Continuation(Rc::new(continuation))];
        apply(m, env, callee, args, &k)
    });
    compile(&operands[0], Delivery::to(capture))
}

#[cfg(test)]
#[expect(clippy::unwrap_used)] // test code OK
mod tests {
    use super::*;
    use crate::ast::{cons, nil, sym, val};
    use crate::host::{Host, Transcript};
    use crate::vm::{Status, Vm, VmConfig};

    fn run(source: &str) -> (Status, String) {
        let transcript = Transcript::default();
        let mut vm = Vm::new(Host::recording(&transcript), VmConfig::default().with_rng_seed(7));
        vm.submit(source);
        (vm.status().clone(), transcript.output())
    }

    fn result_of(source: &str) -> Value {
        match run(source) {
            (Status::Halted(value), _) => value,
            (other, output) => panic!("{source}: expected a result, got {other:?}\n{output}"),
        }
    }

    #[test]
    fn test_compile_errors() {
        let test_cases = vec![
            // Operator arity is checked before anything runs
            (val(vec![sym("car"), val(1), val(2)]), "ArityError"),
            (val(vec![sym("if"), val(true)]), "ArityError"),
            (val(vec![sym("quote")]), "ArityError"),
            (val(vec![sym("lambda")]), "ArityError"),
            (val(vec![sym("set!"), val(1), val(2)]), "expected a symbol"),
            (val(vec![sym("define"), val(1), val(2)]), "expected a symbol"),
            (val(vec![sym("define"), sym("x"), val(1), val(2)]), "exactly one"),
            (val(vec![sym("lambda"), val(vec![val(1)]), val(2)]), "parameter"),
            (cons(sym("+"), val(1)), "Improper form"),
        ];

        for (form, expected) in test_cases {
            match compile(&form, Delivery::tail()) {
                Ok(_) => panic!("{form} should not compile"),
                Err(e) => assert!(
                    e.to_string().contains(expected),
                    "{form}: expected '{expected}' in '{e}'"
                ),
            }
        }
    }

    #[test]
    fn test_special_forms() {
        let test_cases = vec![
            ("(quote (1 2))", val([1, 2])),
            ("'sym", sym("sym")),
            ("(if (< 1 2) 10 20)", val(10)),
            ("(if #f 10)", val(false)),
            ("(if 0 'yes 'no)", sym("no")),
            ("(if '() 'yes 'no)", sym("no")),
            ("(if \"\" 'yes 'no)", sym("yes")),
            ("(define x 5) (set! x 6) x", val(6)),
            ("(define x 5) (set! x 7)", val(7)),
            ("(define (sq n) (* n n)) (sq 9)", val(81)),
            ("(define (f . xs) xs) (f 1 2)", val([1, 2])),
            ("((lambda (a b) (list a b)) 1)", val(vec![val(1), nil()])),
            ("((lambda args args) 1 2 3)", val([1, 2, 3])),
            ("(begin 1 2 3)", val(3)),
            ("(begin)", Value::Unspecified),
            ("((lambda (x)))", Value::Unspecified),
            ("(define x 1)", Value::Unspecified),
            ("(define f (lambda () (define inner 4) inner)) (f)", val(4)),
            ("()", nil()),
        ];

        for (source, expected) in test_cases {
            let actual = result_of(source);
            if matches!(expected, Value::Unspecified) {
                assert!(matches!(actual, Value::Unspecified), "{source}: got {actual}");
            } else {
                assert_eq!(actual, expected, "{source}");
            }
        }
    }

    #[test]
    fn test_closures_and_first_class_primitives() {
        let test_cases = vec![
            (
                "(define (make-counter) (define n 0) (lambda () (set! n (+ n 1)) n))
                 (define c (make-counter)) (c) (c) (c)",
                val(3),
            ),
            ("(define plus +) (plus 1 2 3)", val(6)),
            ("((if #t * +) 3 4)", val(12)),
            ("(define (compose f g) (lambda (x) (f (g x)))) ((compose car cdr) '(1 2 3))", val(2)),
            // Builtin names resolve to the builtin in operator position, even when shadowed
            ("(define (f car) (car '(1 2))) (f 99)", val(1)),
        ];

        for (source, expected) in test_cases {
            assert_eq!(result_of(source), expected, "{source}");
        }
    }

    #[test]
    fn test_call_cc() {
        let test_cases = vec![
            ("(call/cc (lambda (k) (+ 1 (k 42))))", val(42)),
            ("(+ 1 (call/cc (lambda (k) 10)))", val(11)),
            ("(+ 1 (call-with-current-continuation (lambda (k) (k 2))))", val(3)),
            // Escape from a loop
            (
                "(define (find-first pred xs)
                   (call/cc (lambda (return)
                     (define (walk xs)
                       (if (null? xs) #f (begin (if (pred (car xs)) (return (car xs))) (walk (cdr xs)))))
                     (walk xs))))
                 (find-first (lambda (x) (> x 2)) '(1 2 3 4))",
                val(3),
            ),
            // Re-entering a continuation after call/cc has returned
            (
                "(define saved #f)
                 (define count 0)
                 (define result (+ 100 (call/cc (lambda (k) (set! saved k) 1))))
                 (set! count (+ count 1))
                 (if (< count 3) (saved count))
                 result",
                val(102),
            ),
            // Pending arguments captured with the continuation
            ("(define k2 #f) (list 1 (call/cc (lambda (k) (set! k2 k) 2)) 3)", val([1, 2, 3])),
        ];

        for (source, expected) in test_cases {
            assert_eq!(result_of(source), expected, "{source}");
        }
    }

    #[test]
    fn test_runtime_errors() {
        let test_cases = vec![
            ("(undefined-thing)", "Unbound variable: undefined-thing"),
            ("(set! nope 1)", "Unbound variable: nope"),
            ("(1 2)", "Illegal closure"),
            ("(car 5)", "Type error"),
            ("(/ 1 0)", "Division by zero"),
            ("(define p +) (p 1 \"a\")", "Type error"),
        ];

        for (source, expected) in test_cases {
            let (status, output) = run(source);
            assert!(matches!(status, Status::Errored(_)), "{source}: {status:?}");
            assert!(output.starts_with("ERROR: "), "{source}: {output}");
            assert!(output.contains(expected), "{source}: '{expected}' in '{output}'");
        }
    }

    #[test]
    fn test_echo_of_top_level_forms() {
        let (status, output) = run("(define x 2) (+ x 1) \"text\" (display \"raw\") 'done");
        assert_eq!(output, "3\n\"text\"\nraw\"raw\"\ndone");
        assert_eq!(status, Status::Halted(sym("done")));

        let transcript = Transcript::default();
        let mut vm = Vm::new(
            Host::recording(&transcript),
            VmConfig::default().with_echo_forms(false),
        );
        vm.submit("(+ 1 1) (display \"a\") 5");
        assert_eq!(transcript.output(), "a5");
    }

    #[test]
    fn test_operand_evaluation_order() {
        let (_, output) = run("(list (display 1) (display 2) (display 3))");
        assert!(output.starts_with("123"), "{output}");
    }
}
