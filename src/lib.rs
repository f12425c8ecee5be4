//! CyberScheme - an embeddable interpreter for a small Scheme dialect
//!
//! Source text flows through four stages before anything runs:
//!
//! ```text
//! text -> scanner (FSM) -> tokens -> parser -> cons-cell forms -> compiler -> continuation chain
//! ```
//!
//! The compiled chain is driven by a trampolined virtual machine. Every compiled form is a
//! closure that receives the machine registers plus the current environment frame and returns
//! the *next* closure to run (or nothing, to halt). Nothing in the engine uses the native call
//! stack to represent Scheme recursion, which gives:
//!
//! - proper tail calls (a tail call reuses the caller's saved continuation),
//! - first-class, multi-shot continuations (`call/cc`),
//! - cooperative suspension (`yield` / `sync`) and a bounded step budget per slice.
//!
//! ```scheme
//! (define loop (lambda (n acc) (if (= n 0) acc (loop (- n 1) (+ acc 1)))))
//! (loop 1000000 0)                                ; constant auxiliary memory
//! (call/cc (lambda (k) (+ 1 (k 42))))             ; => 42
//! (begin (display "tick") (yield 1) (display "tock"))
//! ```
//!
//! Side effects leave the engine through injected host capabilities (see [`host`]): a display
//! sink, a minimal drawing sink and a scheduler that decides when a suspended VM resumes.
//!
//! ## Modules
//!
//! - `scanner`: table-driven tokenizer
//! - `parser`: recursive-descent reader producing cons cells
//! - `environment`: parent-linked binding frames
//! - `compiler`: CPS compiler
//! - `vm`: trampoline, suspension and host-facing API
//! - `builtinops`: operator and special-form registry

use std::fmt;

/// Maximum list/quote nesting accepted by the reader.
/// Deeper input is skipped and reported, which keeps the recursive reader and compiler off the
/// edge of the native stack.
pub const MAX_PARSE_DEPTH: usize = 512;

/// Default number of trampoline steps executed per slice before control returns to the host.
pub const DEFAULT_STEP_BUDGET: usize = 5_000_000;

/// Categorizes the different kinds of reader diagnostics.
#[derive(Debug, PartialEq, Clone)]
pub enum ParseErrorKind {
    /// Unrecognized character sequence (the scanner's error state)
    InvalidSyntax,
    /// Expression nesting exceeded the maximum parse depth
    TooDeeplyNested,
}

/// A structured reader diagnostic.
///
/// Reading is lenient: diagnostics are collected next to the forms that could be read
/// instead of aborting the whole parse.
#[derive(Debug, PartialEq, Clone)]
pub struct ParseError {
    pub kind: ParseErrorKind,
    pub message: String,
    /// Context snippet from the input showing where the error occurred (max 100 chars)
    pub context: Option<String>,
    /// The problematic lexeme, if identifiable
    pub found: Option<String>,
}

impl ParseError {
    /// Create a ParseError with all fields
    pub fn new(
        kind: ParseErrorKind,
        message: impl Into<String>,
        context: Option<String>,
        found: Option<String>,
    ) -> Self {
        ParseError {
            kind,
            message: message.into(),
            context,
            found,
        }
    }

    /// Create a ParseError with context extracted from input at a given byte offset
    pub fn with_context_and_found(
        kind: ParseErrorKind,
        message: impl Into<String>,
        input: &str,
        error_offset: usize,
        found: Option<String>,
    ) -> Self {
        const MAX_CONTEXT: usize = 100;

        // Show a little of what precedes the error
        let char_offset = input
            .char_indices()
            .take_while(|(i, _)| *i < error_offset)
            .count();
        let context_start = char_offset.saturating_sub(20);

        let context_str: String = input
            .chars()
            .skip(context_start)
            .take(MAX_CONTEXT)
            .collect();

        let mut display_context = String::new();
        if context_start > 0 {
            display_context.push_str("[...]");
        }
        display_context.push_str(&context_str);
        if context_start + context_str.chars().count() < input.chars().count() {
            display_context.push_str("[...]");
        }

        let display_context = display_context.replace('\n', "\\n").replace('\r', "");

        Self::new(kind, message, Some(display_context), found)
    }
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "ParseError: {}", self.message)?;
        if let Some(found) = &self.found {
            write!(f, "\nFound: {found}")?;
        }
        if let Some(context) = &self.context {
            write!(f, "\nContext: {context}")?;
        }
        Ok(())
    }
}

impl std::error::Error for ParseError {}

/// Error types for the interpreter
#[derive(Debug, Clone, PartialEq)]
pub enum Error {
    ParseError(ParseError),
    EvalError(String),
    TypeError(String),
    UnboundVariable(String),
    ArityError {
        expected: usize,
        got: usize,
        expression: Option<String>,
    },
}

impl Error {
    /// Create an ArityError without expression context
    pub fn arity_error(expected: usize, got: usize) -> Self {
        Error::ArityError {
            expected,
            got,
            expression: None,
        }
    }

    /// Create an ArityError with expression context
    pub fn arity_error_with_expr(expected: usize, got: usize, expression: String) -> Self {
        Error::ArityError {
            expected,
            got,
            expression: Some(expression),
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::ParseError(e) => write!(f, "{e}"),
            Error::EvalError(msg) => write!(f, "EvaluationError: {msg}"),
            Error::TypeError(msg) => write!(f, "Type error: {msg}"),
            Error::UnboundVariable(var) => write!(f, "Unbound variable: {var}"),
            Error::ArityError {
                expected,
                got,
                expression,
            } => match expression {
                Some(expr) => write!(
                    f,
                    "ArityError: expression {expr}: expected {expected} arguments, got {got}"
                ),
                None => write!(
                    f,
                    "ArityError: function expected {expected} arguments but got {got}"
                ),
            },
        }
    }
}

impl std::error::Error for Error {}

impl From<ParseError> for Error {
    fn from(e: ParseError) -> Self {
        Error::ParseError(e)
    }
}

pub mod ast;
pub mod builtinops;
pub mod compiler;
pub mod environment;
pub mod host;
pub mod intooperation;
pub mod parser;
pub mod scanner;
pub mod vm;

pub use ast::Value;
pub use builtinops::Arity;
pub use host::{
    DisplaySink, DrawCommand, GraphicsSink, Host, Scheduler, StdoutDisplay, SyncToken, Transcript,
};
pub use parser::{Reading, read};
pub use vm::{BreakHandle, Status, Vm, VmConfig};
