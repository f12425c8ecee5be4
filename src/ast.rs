//! This module defines the runtime value model shared by the reader, the compiler and the
//! virtual machine. The main enum, [`Value`], covers every datum a program can touch:
//! numbers, symbols, strings, booleans, cons cells and the three kinds of invocable
//! objects (closures, reified continuations and host primitives).
//!
//! Cons cells double as the syntax tree: the parser produces the same [`Pair`] chains that
//! `cons` and `list` build at runtime. Ergonomic helper functions such as [`val`], [`sym`],
//! [`nil`] and [`list`] are provided for convenient construction in code and tests.
//!
//! The printer follows Scheme conventions: proper lists print as `(a b c)`, improper tails
//! as `(a b . c)`, and strings are quoted with escapes (use [`Value::display_string`] for
//! the raw text `display` writes).

use crate::Error;
use crate::builtinops::Arity;
use crate::compiler::{Code, Thunk};
use crate::environment::{Env, ParamSpec};
use crate::intooperation::OperationFn;
use std::fmt;
use std::rc::Rc;
use std::sync::Arc;

/// Type alias for exact numbers in the interpreter
pub(crate) type NumberType = i64;

/// A cons cell
pub struct Pair {
    pub car: Value,
    pub cdr: Value,
}

impl Pair {
    /// Detach both halves, keeping only the ones that are cells themselves
    fn take_cells(&mut self, pending: &mut Vec<Rc<Pair>>) {
        for half in [&mut self.car, &mut self.cdr] {
            if let Value::Pair(cell) = std::mem::replace(half, Value::Nil) {
                pending.push(cell);
            }
        }
    }
}

// Long lists and deeply nested trees would otherwise drop recursively through
// their car and cdr links.
impl Drop for Pair {
    fn drop(&mut self) {
        let mut pending = Vec::new();
        self.take_cells(&mut pending);
        while let Some(cell) = pending.pop() {
            if let Ok(mut pair) = Rc::try_unwrap(cell) {
                pair.take_cells(&mut pending);
            }
        }
    }
}

/// A closure: parameter spec, compiled body and the defining environment
pub struct Procedure {
    pub(crate) params: Rc<ParamSpec>,
    pub(crate) body: Code,
    pub(crate) env: Env,
}

/// A reified continuation captured by `call/cc`.
///
/// `resume` is the continuation that was pending at the capture site (`None` when the
/// capture happened in tail position of the whole program, in which case resuming halts).
/// `stack` is the evaluation stack as it was at capture time; every invocation restarts
/// from a copy, so the object can be invoked any number of times.
pub struct Continuation {
    pub(crate) resume: Option<Thunk>,
    pub(crate) stack: Vec<Value>,
}

/// A host function bound as a first-class value
pub struct Primitive {
    pub name: Rc<str>,
    pub arity: Arity,
    // Trait object enables registering strongly typed functions (e.g. fn(i64, i64)->i64)
    // that are automatically converted to the canonical signature.
    pub(crate) func: Arc<OperationFn>,
}

impl Primitive {
    pub(crate) fn call(&self, args: Vec<Value>) -> Result<Value, Error> {
        self.arity.validate(args.len())?;
        (self.func)(args)
    }
}

/// Core value type in the interpreter
///
/// To build values in code, use the ergonomic helper functions:
/// - `val(42)` for values, `sym("name")` for symbols, `nil()` for the empty list
/// - `val([1, 2, 3])` for homogeneous proper lists
/// - `val(vec![sym("op"), val(42)])` for mixed lists
/// - `cons(a, b)` for dotted pairs
#[derive(Clone)]
pub enum Value {
    /// Exact integers
    Integer(NumberType),
    /// Inexact numbers
    Float(f64),
    /// Symbols (identifiers)
    Symbol(Rc<str>),
    /// String literals
    String(Rc<str>),
    /// Boolean values
    Bool(bool),
    /// The empty list
    Nil,
    /// Cons cells
    Pair(Rc<Pair>),
    /// User-defined functions created by `lambda`
    Procedure(Rc<Procedure>),
    /// Continuations captured by `call/cc`
    Continuation(Rc<Continuation>),
    /// Built-in or host-registered functions
    Primitive(Rc<Primitive>),
    /// Tagged error value left on the stack when a run fails
    Error(Rc<Error>),
    /// Unspecified values (e.g., return value of define)
    /// These values never equal themselves or any other value
    Unspecified,
}

/// Numeric view of a value, used by the arithmetic builtins
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Number {
    Int(NumberType),
    Float(f64),
}

impl Number {
    pub fn to_f64(self) -> f64 {
        match self {
            Number::Int(n) => n as f64,
            Number::Float(x) => x,
        }
    }

    /// Collapse an integral float back to an exact integer when it fits
    pub(crate) fn integral(x: f64) -> Number {
        if x.is_finite() && x >= NumberType::MIN as f64 && x < NumberType::MAX as f64 {
            Number::Int(x as NumberType)
        } else {
            Number::Float(x)
        }
    }

    pub(crate) fn is_negative(self) -> bool {
        match self {
            Number::Int(n) => n < 0,
            Number::Float(x) => x < 0.0,
        }
    }
}

impl From<Number> for Value {
    fn from(n: Number) -> Self {
        match n {
            Number::Int(n) => Value::Integer(n),
            Number::Float(x) => Value::Float(x),
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Integer(n) => write!(f, "Integer({n})"),
            Value::Float(x) => write!(f, "Float({x:?})"),
            Value::Symbol(s) => write!(f, "Symbol({s})"),
            Value::String(s) => write!(f, "String({s:?})"),
            Value::Bool(b) => write!(f, "Bool({b})"),
            Value::Nil => write!(f, "Nil"),
            Value::Pair(_) => write!(f, "Pair{self}"),
            Value::Procedure(p) => write!(f, "Procedure({})", p.params),
            Value::Continuation(k) => write!(f, "Continuation(stack={})", k.stack.len()),
            Value::Primitive(p) => write!(f, "Primitive({})", p.name),
            Value::Error(e) => write!(f, "Error({e:?})"),
            Value::Unspecified => write!(f, "Unspecified"),
        }
    }
}

// From trait implementations for Value - enables .into() conversion
impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.into())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s.into())
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<f64> for Value {
    fn from(x: f64) -> Self {
        Value::Float(x)
    }
}

impl From<Error> for Value {
    fn from(e: Error) -> Self {
        Value::Error(Rc::new(e))
    }
}

macro_rules! impl_from_integer {
    ($int_type:ty) => {
        impl From<$int_type> for Value {
            fn from(n: $int_type) -> Self {
                Value::Integer(n as NumberType)
            }
        }
    };
}

impl_from_integer!(i8);
impl_from_integer!(i16);
impl_from_integer!(i32);
impl_from_integer!(NumberType); // Special case - no casting
impl_from_integer!(u8);
impl_from_integer!(u16);
impl_from_integer!(u32);

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(v: Vec<T>) -> Self {
        list(v.into_iter().map(Into::into))
    }
}

impl<T: Into<Value>, const N: usize> From<[T; N]> for Value {
    fn from(arr: [T; N]) -> Self {
        list(arr.into_iter().map(Into::into))
    }
}

// Fallible conversions from `Value` back into primitive Rust types.

impl std::convert::TryInto<NumberType> for Value {
    type Error = Error;

    fn try_into(self) -> Result<NumberType, Error> {
        match self {
            Value::Integer(n) => Ok(n),
            other => Err(Error::TypeError(format!("expected integer, got {other}"))),
        }
    }
}

impl std::convert::TryInto<f64> for Value {
    type Error = Error;

    fn try_into(self) -> Result<f64, Error> {
        match self {
            Value::Integer(n) => Ok(n as f64),
            Value::Float(x) => Ok(x),
            other => Err(Error::TypeError(format!("expected number, got {other}"))),
        }
    }
}

impl std::convert::TryInto<Number> for Value {
    type Error = Error;

    fn try_into(self) -> Result<Number, Error> {
        self.as_number()
    }
}

impl std::convert::TryInto<bool> for Value {
    type Error = Error;

    fn try_into(self) -> Result<bool, Error> {
        if let Value::Bool(b) = self {
            Ok(b)
        } else {
            Err(Error::TypeError(format!("expected boolean, got {self}")))
        }
    }
}

/// Helper function for creating symbols
pub fn sym<S: AsRef<str>>(name: S) -> Value {
    Value::Symbol(name.as_ref().into())
}

/// Helper function for creating Values from anything convertible
pub fn val<T: Into<Value>>(value: T) -> Value {
    value.into()
}

/// Helper function for the empty list
pub fn nil() -> Value {
    Value::Nil
}

/// Build a single cons cell
pub fn cons(car: Value, cdr: Value) -> Value {
    Value::Pair(Rc::new(Pair { car, cdr }))
}

/// Build a proper list from a sequence of values
pub fn list<I>(items: I) -> Value
where
    I: IntoIterator<Item = Value>,
    I::IntoIter: DoubleEndedIterator,
{
    items
        .into_iter()
        .rev()
        .fold(Value::Nil, |tail, item| cons(item, tail))
}

/// Iterator over the cars of a cons chain; stops at the first non-pair tail
pub struct ListIter<'a> {
    cursor: &'a Value,
}

impl<'a> Iterator for ListIter<'a> {
    type Item = &'a Value;

    fn next(&mut self) -> Option<Self::Item> {
        match self.cursor {
            Value::Pair(cell) => {
                self.cursor = &cell.cdr;
                Some(&cell.car)
            }
            _ => None,
        }
    }
}

/// Pending printer work for one list being written
enum Print<'a> {
    Datum(&'a Value),
    /// What follows an element: more elements, a dotted tail or the closer
    Rest(&'a Value),
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut work = vec![Print::Datum(self)];
        while let Some(item) = work.pop() {
            match item {
                Print::Datum(Value::Pair(cell)) => {
                    write!(f, "(")?;
                    work.push(Print::Rest(&cell.cdr));
                    work.push(Print::Datum(&cell.car));
                }
                Print::Datum(atom) => atom.fmt_atom(f)?,
                Print::Rest(Value::Pair(cell)) => {
                    write!(f, " ")?;
                    work.push(Print::Rest(&cell.cdr));
                    work.push(Print::Datum(&cell.car));
                }
                Print::Rest(Value::Nil) => write!(f, ")")?,
                Print::Rest(tail) => {
                    write!(f, " . ")?;
                    tail.fmt_atom(f)?;
                    write!(f, ")")?;
                }
            }
        }
        Ok(())
    }
}

impl Value {
    /// Print anything but a cons cell
    fn fmt_atom(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Integer(n) => write!(f, "{n}"),
            Value::Float(x) => write!(f, "{x}"),
            Value::Symbol(s) => write!(f, "{s}"),
            Value::String(s) => {
                write!(f, "\"")?;
                for ch in s.chars() {
                    match ch {
                        '"' => write!(f, "\\\"")?,
                        '\\' => write!(f, "\\\\")?,
                        '\n' => write!(f, "\\n")?,
                        '\t' => write!(f, "\\t")?,
                        '\r' => write!(f, "\\r")?,
                        c => write!(f, "{c}")?,
                    }
                }
                write!(f, "\"")
            }
            Value::Bool(b) => write!(f, "{}", if *b { "#t" } else { "#f" }),
            Value::Nil => write!(f, "()"),
            Value::Pair(_) => write!(f, "{self}"),
            Value::Procedure(p) => write!(f, "#<closure {}>", p.params),
            Value::Continuation(_) => write!(f, "#<continuation>"),
            Value::Primitive(p) => write!(f, "#<primitive:{}>", p.name),
            Value::Error(e) => write!(f, "#<error: {e}>"),
            Value::Unspecified => write!(f, "#<unspecified>"),
        }
    }
}

impl Value {
    /// Check if a value represents nil (empty list)
    pub fn is_nil(&self) -> bool {
        matches!(self, Value::Nil)
    }

    /// Truthiness used by `if` and `not`: `#f`, the empty list, zero and the
    /// unspecified value are false, everything else is true.
    pub fn is_truthy(&self) -> bool {
        match self {
            Value::Bool(b) => *b,
            Value::Nil | Value::Unspecified => false,
            Value::Integer(n) => *n != 0,
            Value::Float(x) => *x != 0.0 && !x.is_nan(),
            _ => true,
        }
    }

    /// Iterate over the elements of a (possibly improper) list
    pub fn iter(&self) -> ListIter<'_> {
        ListIter { cursor: self }
    }

    pub(crate) fn as_number(&self) -> Result<Number, Error> {
        match self {
            Value::Integer(n) => Ok(Number::Int(*n)),
            Value::Float(x) => Ok(Number::Float(*x)),
            other => Err(Error::TypeError(format!("expected number, got {other}"))),
        }
    }

    pub(crate) fn as_symbol(&self) -> Option<&Rc<str>> {
        match self {
            Value::Symbol(s) => Some(s),
            _ => None,
        }
    }

    /// Text written by `display` and `string`: strings without quotes, everything else printed
    pub fn display_string(&self) -> String {
        match self {
            Value::String(s) => s.to_string(),
            other => other.to_string(),
        }
    }
}

// Cons cells compare structurally, walked with a work list so that neither long
// lists nor deep nesting recurse.
impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        let mut pending = vec![(self, other)];
        while let Some((a, b)) = pending.pop() {
            match (a, b) {
                (Value::Pair(x), Value::Pair(y)) => {
                    if !Rc::ptr_eq(x, y) {
                        pending.push((&x.cdr, &y.cdr));
                        pending.push((&x.car, &y.car));
                    }
                }
                _ => {
                    if !a.atom_eq(b) {
                        return false;
                    }
                }
            }
        }
        true
    }
}

impl Value {
    fn atom_eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Integer(a), Value::Integer(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a == b,
            (Value::Symbol(a), Value::Symbol(b)) => a == b,
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Nil, Value::Nil) => true,
            // Invocable objects compare by identity
            (Value::Procedure(a), Value::Procedure(b)) => Rc::ptr_eq(a, b),
            (Value::Continuation(a), Value::Continuation(b)) => Rc::ptr_eq(a, b),
            (Value::Primitive(a), Value::Primitive(b)) => a.name == b.name,
            (Value::Error(a), Value::Error(b)) => a == b,
            // Unspecified never equals anything
            (Value::Unspecified, _) | (_, Value::Unspecified) => false,
            _ => false, // Different variants are never equal
        }
    }
}

#[cfg(test)]
mod helper_function_tests {
    use super::*;

    #[test]
    fn test_helper_functions_data_driven() {
        // Test cases as (Value, Value) tuples: (helper_result, expected_value)
        let test_cases = vec![
            (val(42), Value::Integer(42)),
            (val(-17), Value::Integer(-17)),
            (val(4294967295u32), Value::Integer(4294967295)),
            (val(-128i8), Value::Integer(-128)),
            (val(NumberType::MAX), Value::Integer(NumberType::MAX)),
            (val(2.5), Value::Float(2.5)),
            (val(true), Value::Bool(true)),
            (val("hello"), Value::String("hello".into())),
            (val(""), Value::String("".into())),
            (sym("call/cc"), Value::Symbol("call/cc".into())),
            (nil(), Value::Nil),
            (
                val([1, 2]),
                cons(Value::Integer(1), cons(Value::Integer(2), Value::Nil)),
            ),
            (
                val(vec![sym("quote"), val("x")]),
                cons(
                    Value::Symbol("quote".into()),
                    cons(Value::String("x".into()), Value::Nil),
                ),
            ),
        ];

        for (i, (actual, expected)) in test_cases.iter().enumerate() {
            assert!(
                actual == expected,
                "Test case {} failed:\n  Expected: {:?}\n  Got: {:?}",
                i + 1,
                expected,
                actual
            );
        }
    }

    #[test]
    fn test_printer() {
        let test_cases = vec![
            (val(42), "42"),
            (val(-2.5), "-2.5"),
            (val(3.0), "3"),
            (val(true), "#t"),
            (val(false), "#f"),
            (nil(), "()"),
            (sym("foo"), "foo"),
            (val("a\"b\n"), "\"a\\\"b\\n\""),
            (val([1, 2, 3]), "(1 2 3)"),
            (cons(val(1), val(2)), "(1 . 2)"),
            (
                cons(val(1), cons(val([2, 3]), val(4))),
                "(1 (2 3) . 4)",
            ),
            (val(vec![nil(), nil()]), "(() ())"),
            (Value::Unspecified, "#<unspecified>"),
            (
                Value::from(Error::EvalError("boom".into())),
                "#<error: EvaluationError: boom>",
            ),
        ];

        for (value, expected) in test_cases {
            assert_eq!(value.to_string(), expected, "printing {value:?}");
        }

        assert_eq!(val("raw text").display_string(), "raw text");
        assert_eq!(val([1, 2]).display_string(), "(1 2)");
    }

    #[test]
    fn test_truthiness() {
        let falsy = [val(false), nil(), val(0), val(0.0), val(f64::NAN), Value::Unspecified];
        for v in &falsy {
            assert!(!v.is_truthy(), "{v:?} should be false");
        }

        let truthy = [val(true), val(1), val(-1), val(0.5), val(""), sym("x"), val([0])];
        for v in &truthy {
            assert!(v.is_truthy(), "{v:?} should be true");
        }
    }

    #[test]
    fn test_list_access() {
        let proper = val([1, 2, 3]);
        assert_eq!(proper.iter().cloned().collect::<Vec<_>>(), vec![val(1), val(2), val(3)]);

        // Iteration stops at an improper tail
        let dotted = cons(val(1), val(2));
        assert_eq!(dotted.iter().cloned().collect::<Vec<_>>(), vec![val(1)]);

        assert_eq!(nil().iter().count(), 0);
        assert_eq!(val(5).iter().count(), 0);
    }

    /// `(((...(leaf)...)))`, nested through the car
    fn nested_through_car(depth: usize, leaf: Value) -> Value {
        (0..depth).fold(leaf, |inner, _| cons(inner, nil()))
    }

    #[test]
    fn test_long_list_drop() {
        // A list long enough to overflow the native stack if dropped recursively
        let long = list((0..200_000).map(val));
        assert_eq!(long.iter().count(), 200_000);
        drop(long);

        let deep = nested_through_car(200_000, val(1));
        drop(deep);

        // Shared subtrees survive their first owner
        let shared = nested_through_car(100_000, val(2));
        let holder = cons(shared.clone(), nil());
        drop(holder);
        assert_eq!(shared.iter().count(), 1);
    }

    #[test]
    fn test_deep_structures_print_and_compare() {
        let deep = nested_through_car(200_000, val(1));
        let printed = deep.to_string();
        assert_eq!(printed.len(), 2 * 200_000 + 1);
        assert!(printed.starts_with("((((") && printed.ends_with("1))))"));

        assert_eq!(deep, nested_through_car(200_000, val(1)));
        assert_ne!(deep, nested_through_car(200_000, val(2)));

        let long = list((0..200_000).map(val));
        assert_eq!(long, list((0..200_000).map(val)));

        let mixed = val(vec![val(1), cons(val(2), val(3)), val([4, 5]), nil()]);
        assert_eq!(mixed.to_string(), "(1 (2 . 3) (4 5) ())");
        assert_eq!(cons(val(1), cons(val(2), val(3))).to_string(), "(1 2 . 3)");
    }

    #[test]
    fn test_unspecified_values() {
        // Unspecified never equals anything, including itself
        let unspec = Value::Unspecified;
        assert_ne!(unspec, unspec);
        assert_ne!(unspec, Value::Unspecified);
        assert_ne!(unspec, val(42));
    }

    #[test]
    fn test_number_view() {
        assert_eq!(val(7).as_number(), Ok(Number::Int(7)));
        assert_eq!(val(1.5).as_number(), Ok(Number::Float(1.5)));
        assert!(val("7").as_number().is_err());
        assert_eq!(Number::integral(4.0), Number::Int(4));
        assert_eq!(Number::integral(1e300), Number::Float(1e300));
        assert!(Number::Float(-0.5).is_negative());
    }
}
