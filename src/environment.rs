//! Lexical environments.
//!
//! A frame maps symbols to values and links to the frame it was created in. Frames are
//! shared (`Rc`) because closures and captured continuations outlive the application that
//! created them. Besides its bindings, a procedure frame remembers where its caller wants
//! the result delivered (`ret`), which is what makes proper tail calls possible: a call in
//! tail position hands the *caller's* return point to the callee instead of adding a new one.

use crate::Error;
use crate::ast::{Primitive, Value, list};
use crate::builtinops::{OpKind, builtin_ops};
use crate::compiler::Thunk;
use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;
use std::sync::Arc;

/// Shared handle to an environment frame
pub type Env = Rc<Frame>;

/// Environment frame for variable bindings
pub struct Frame {
    bindings: RefCell<HashMap<Rc<str>, Value>>,
    parent: Option<Env>,
    /// Continuation that receives the value of the procedure body run in this frame.
    /// `None` for the global frame: delivering there halts the machine.
    ret: Option<Thunk>,
}

impl Frame {
    /// Create a root frame with no parent
    pub(crate) fn root() -> Env {
        Rc::new(Frame {
            bindings: RefCell::new(HashMap::new()),
            parent: None,
            ret: None,
        })
    }

    /// Create a frame for a procedure application
    pub(crate) fn child(parent: &Env, ret: Option<Thunk>) -> Env {
        Rc::new(Frame {
            bindings: RefCell::new(HashMap::new()),
            parent: Some(Rc::clone(parent)),
            ret,
        })
    }

    /// Bind `name` in this frame, shadowing any outer binding
    pub fn define(&self, name: Rc<str>, value: Value) {
        self.bindings.borrow_mut().insert(name, value);
    }

    /// Find the nearest binding of `name`, walking outward through parent frames
    pub fn lookup(&self, name: &str) -> Result<Value, Error> {
        let mut frame = self;
        loop {
            if let Some(value) = frame.bindings.borrow().get(name) {
                return Ok(value.clone());
            }
            match &frame.parent {
                Some(parent) => frame = &**parent,
                None => return Err(Error::UnboundVariable(name.to_owned())),
            }
        }
    }

    /// Mutate the nearest existing binding of `name`.
    /// Assigning a name no frame owns is an error; it never creates a global.
    pub fn set(&self, name: &str, value: Value) -> Result<(), Error> {
        let mut frame = self;
        loop {
            if let Some(slot) = frame.bindings.borrow_mut().get_mut(name) {
                *slot = value;
                return Ok(());
            }
            match &frame.parent {
                Some(parent) => frame = &**parent,
                None => return Err(Error::UnboundVariable(name.to_owned())),
            }
        }
    }

    /// Where a value delivered in tail position of this frame goes next
    pub(crate) fn return_to(&self) -> Option<Thunk> {
        self.ret.clone()
    }

    /// Drop every binding of this frame.
    /// Closures defined at top level point back at the global frame, so the VM clears it
    /// on teardown to release those reference cycles.
    pub(crate) fn clear(&self) {
        let drained = std::mem::take(&mut *self.bindings.borrow_mut());
        drop(drained);
    }

    /// All bindings visible from this frame (inner ones shadow outer ones), sorted by name
    pub fn bindings(&self) -> Vec<(Rc<str>, Value)> {
        let mut seen = HashMap::new();
        let mut frame = Some(self);
        while let Some(current) = frame {
            for (name, value) in current.bindings.borrow().iter() {
                seen.entry(Rc::clone(name)).or_insert_with(|| value.clone());
            }
            frame = current.parent.as_deref();
        }
        let mut all: Vec<_> = seen.into_iter().collect();
        all.sort_by(|a, b| a.0.cmp(&b.0));
        all
    }
}

// Non-tail recursion links frames through `ret`, and closures built in a loop link them
// through bindings that hold procedures over the previous frame. Both chains can be far
// longer than the native stack allows, so frames are released from a work list.
impl Drop for Frame {
    fn drop(&mut self) {
        let mut pending = Vec::new();
        self.release_into(&mut pending);
        while let Some(env) = pending.pop() {
            if let Ok(mut frame) = Rc::try_unwrap(env) {
                frame.release_into(&mut pending);
            }
        }
    }
}

impl Frame {
    /// Detach every frame this one keeps alive, directly or through a closure or
    /// continuation it is the last owner of
    fn release_into(&mut self, pending: &mut Vec<Env>) {
        if let Some(ret) = self.ret.take() {
            pending.push(ret.env);
        }
        if let Some(parent) = self.parent.take() {
            pending.push(parent);
        }
        for (_, value) in self.bindings.get_mut().drain() {
            match value {
                Value::Procedure(procedure) => {
                    if let Ok(procedure) = Rc::try_unwrap(procedure) {
                        pending.push(procedure.env);
                    }
                }
                Value::Continuation(continuation) => {
                    if let Ok(continuation) = Rc::try_unwrap(continuation) {
                        pending.extend(continuation.resume.map(|thunk| thunk.env));
                    }
                }
                _ => {}
            }
        }
    }
}

/// Create the global environment with every pure builtin bound as a first-class primitive
pub fn create_global_env() -> Env {
    let env = Frame::root();
    for op in builtin_ops() {
        if let OpKind::Function(func) = &op.op_kind {
            let primitive = Value::Primitive(Rc::new(Primitive {
                name: op.scheme_id.into(),
                arity: op.arity,
                func: Arc::clone(func),
            }));
            for name in std::iter::once(op.scheme_id).chain(op.aliases.iter().copied()) {
                env.define(name.into(), primitive.clone());
            }
        }
    }
    env
}

/// Parameter list of a `lambda`: fixed names plus an optional rest name.
///
/// Accepted shapes are `(a b c)`, `(a b . rest)` and a bare `args` symbol.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ParamSpec {
    pub fixed: Vec<Rc<str>>,
    pub rest: Option<Rc<str>>,
}

impl ParamSpec {
    pub(crate) fn from_form(spec: &Value) -> Result<Self, Error> {
        let mut params = ParamSpec::default();
        let mut cursor = spec;
        loop {
            match cursor {
                Value::Nil => return Ok(params),
                Value::Symbol(rest) => {
                    params.rest = Some(Rc::clone(rest));
                    return Ok(params);
                }
                Value::Pair(cell) => {
                    let Value::Symbol(name) = &cell.car else {
                        return Err(Error::EvalError(format!(
                            "lambda: parameter must be a symbol, got {}",
                            cell.car
                        )));
                    };
                    params.fixed.push(Rc::clone(name));
                    cursor = &cell.cdr;
                }
                other => {
                    return Err(Error::EvalError(format!(
                        "lambda: malformed parameter list {other}"
                    )));
                }
            }
        }
    }

    /// Bind arguments positionally into `frame`.
    /// Missing fixed arguments bind to the empty list; surplus arguments go to the rest
    /// parameter when there is one and are ignored otherwise.
    pub(crate) fn bind(&self, frame: &Frame, args: Vec<Value>) {
        let mut args = args.into_iter();
        for name in &self.fixed {
            frame.define(Rc::clone(name), args.next().unwrap_or(Value::Nil));
        }
        if let Some(rest) = &self.rest {
            frame.define(Rc::clone(rest), list(args));
        }
    }
}

impl fmt::Display for ParamSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.fixed[..], &self.rest) {
            ([], Some(rest)) => write!(f, "{rest}"),
            (fixed, rest) => {
                write!(f, "(")?;
                for (i, name) in fixed.iter().enumerate() {
                    if i > 0 {
                        write!(f, " ")?;
                    }
                    write!(f, "{name}")?;
                }
                if let Some(rest) = rest {
                    write!(f, " . {rest}")?;
                }
                write!(f, ")")
            }
        }
    }
}
