//! Recursive-descent reader.
//!
//! Turns the token stream of [`crate::scanner`] into cons-cell forms. Reading is lenient in
//! the way an interactive environment needs it to be:
//!
//! - a list left open at end of input is closed implicitly,
//! - a stray `)` at top level reads as `()`,
//! - unrecognized characters are skipped and reported,
//! - nesting beyond the configured depth is skipped as a whole and reported.
//!
//! Diagnostics are returned next to the forms instead of failing the read.

use crate::ast::{Value, cons, list, sym};
use crate::scanner::{Scanner, Token, TokenKind};
use crate::{ParseError, ParseErrorKind};
use nom::{
    IResult, Parser,
    branch::alt,
    character::complete::i64 as integer,
    combinator::{all_consuming, map},
    number::complete::double,
};
use std::iter::Peekable;

/// Result of reading a source text
#[derive(Debug, Clone, PartialEq)]
pub struct Reading {
    pub forms: Vec<Value>,
    pub errors: Vec<ParseError>,
}

/// Read every top-level form of `source`
pub fn read(source: &str, max_depth: usize) -> Reading {
    let mut reader = Reader {
        tokens: Scanner::new(source).peekable(),
        source,
        max_depth,
        errors: Vec::new(),
    };
    let mut forms = Vec::new();
    loop {
        let token = reader.next_token();
        if token.kind == TokenKind::Eof {
            break;
        }
        forms.push(reader.expression(token, 0));
    }
    Reading {
        forms,
        errors: reader.errors,
    }
}

/// Parse an integer lexeme
fn parse_integer(input: &str) -> IResult<&str, Value> {
    map(integer, Value::Integer).parse(input)
}

/// Parse a decimal float lexeme such as `3.14`, `.5` or `-2.`
fn parse_float(input: &str) -> IResult<&str, Value> {
    map(double, Value::Float).parse(input)
}

/// Convert a numeric lexeme; integers too large for `i64` become floats
fn parse_number(lexeme: &str) -> Option<Value> {
    alt((all_consuming(parse_integer), all_consuming(parse_float)))
        .parse(lexeme)
        .ok()
        .map(|(_, value)| value)
}

struct Reader<'a> {
    tokens: Peekable<Scanner<'a>>,
    source: &'a str,
    max_depth: usize,
    errors: Vec<ParseError>,
}

impl<'a> Reader<'a> {
    /// Next token that carries meaning; whitespace and comments are dropped and
    /// unrecognized input is recorded
    fn next_token(&mut self) -> Token<'a> {
        loop {
            let Some(token) = self.tokens.next() else {
                return Token {
                    kind: TokenKind::Eof,
                    lexeme: "",
                    offset: self.source.len(),
                };
            };
            match token.kind {
                TokenKind::White | TokenKind::Comment => {}
                TokenKind::Error => self.errors.push(ParseError::with_context_and_found(
                    ParseErrorKind::InvalidSyntax,
                    format!("Unrecognized input at offset {}", token.offset),
                    self.source,
                    token.offset,
                    Some(token.lexeme.to_owned()),
                )),
                _ => return token,
            }
        }
    }

    fn skip_blank(&mut self) {
        while self
            .tokens
            .next_if(|t| matches!(t.kind, TokenKind::White | TokenKind::Comment))
            .is_some()
        {}
    }

    fn expression(&mut self, token: Token<'a>, depth: usize) -> Value {
        match token.kind {
            TokenKind::Open if depth >= self.max_depth => {
                self.skip_group(token);
                Value::Nil
            }
            TokenKind::Open => self.list_tail(depth + 1),
            TokenKind::Quote => self.quoted(token, depth),
            TokenKind::Str => {
                let inner = &token.lexeme[1..];
                Value::String(inner.strip_suffix('"').unwrap_or(inner).into())
            }
            TokenKind::True => Value::Bool(true),
            TokenKind::False => Value::Bool(false),
            TokenKind::Num | TokenKind::Float => {
                parse_number(token.lexeme).unwrap_or_else(|| sym(token.lexeme))
            }
            TokenKind::Sym | TokenKind::Dot => sym(token.lexeme),
            // Stray closer at top level
            TokenKind::Close => Value::Nil,
            TokenKind::Eof | TokenKind::White | TokenKind::Comment | TokenKind::Error => Value::Nil,
        }
    }

    /// Elements of a list whose opener was consumed, up to and including its closer
    fn list_tail(&mut self, depth: usize) -> Value {
        let mut items = Vec::new();
        let mut tail = Value::Nil;
        loop {
            let token = self.next_token();
            match token.kind {
                TokenKind::Close | TokenKind::Eof => break,
                TokenKind::Dot => {
                    let next = self.next_token();
                    if matches!(next.kind, TokenKind::Close | TokenKind::Eof) {
                        break;
                    }
                    tail = self.expression(next, depth);
                    self.skip_blank();
                    self.tokens.next_if(|t| t.kind == TokenKind::Close);
                    break;
                }
                _ => items.push(self.expression(token, depth)),
            }
        }
        items.into_iter().rev().fold(tail, |rest, item| cons(item, rest))
    }

    /// `'x` reads as `(quote x)`; a quote at end of input quotes the empty list
    fn quoted(&mut self, first: Token<'a>, depth: usize) -> Value {
        let mut quotes = 1;
        let mut token = self.next_token();
        while token.kind == TokenKind::Quote {
            quotes += 1;
            token = self.next_token();
        }
        if depth + quotes > self.max_depth {
            self.too_deep(first);
            if token.kind == TokenKind::Open {
                self.skip_group(token);
            }
            return Value::Nil;
        }
        let mut datum = match token.kind {
            TokenKind::Eof => Value::Nil,
            _ => self.expression(token, depth + quotes),
        };
        for _ in 0..quotes {
            datum = list([sym("quote"), datum]);
        }
        datum
    }

    /// Discard a parenthesized group that nests too deeply
    fn skip_group(&mut self, open: Token<'a>) {
        self.too_deep(open);
        let mut open_groups = 1usize;
        while open_groups > 0 {
            match self.tokens.next().map(|t| t.kind) {
                Some(TokenKind::Open) => open_groups += 1,
                Some(TokenKind::Close) => open_groups -= 1,
                Some(TokenKind::Eof) | None => break,
                Some(_) => {}
            }
        }
    }

    fn too_deep(&mut self, at: Token<'a>) {
        self.errors.push(ParseError::with_context_and_found(
            ParseErrorKind::TooDeeplyNested,
            format!(
                "Expression nesting exceeds the maximum depth of {}",
                self.max_depth
            ),
            self.source,
            at.offset,
            None,
        ));
    }
}

#[cfg(test)]
#[expect(clippy::unwrap_used)] // test code OK
mod tests {
    use super::*;
    use crate::MAX_PARSE_DEPTH;
    use crate::ast::{nil, val};

    fn read_all(source: &str) -> Vec<Value> {
        let reading = read(source, MAX_PARSE_DEPTH);
        assert!(reading.errors.is_empty(), "{source}: {:?}", reading.errors);
        reading.forms
    }

    fn quote(datum: Value) -> Value {
        val(vec![sym("quote"), datum])
    }

    #[test]
    fn test_atoms() {
        let test_cases = vec![
            ("42", val(42)),
            ("-17", val(-17)),
            ("3.5", val(3.5)),
            (".25", val(0.25)),
            ("-2.", val(-2.0)),
            ("9223372036854775807", val(i64::MAX)),
            ("9223372036854775808", val(9_223_372_036_854_775_808.0)),
            ("#t", val(true)),
            ("#F", val(false)),
            ("\"hello world\"", val("hello world")),
            ("\"a\\nb\"", val("a\\nb")),
            ("\"unterminated", val("unterminated")),
            ("\"", val("")),
            ("car", sym("car")),
            ("set-car!", sym("set-car!")),
            ("-", sym("-")),
            ("1e5", sym("1e5")),
        ];

        for (source, expected) in test_cases {
            assert_eq!(read_all(source), vec![expected], "reading {source}");
        }
    }

    #[test]
    fn test_lists_and_quotes() {
        let test_cases = vec![
            ("()", vec![nil()]),
            ("(1 2 3)", vec![val([1, 2, 3])]),
            ("[1 {2}]", vec![val(vec![val(1), val([2])])]),
            ("(a . b)", vec![cons(sym("a"), sym("b"))]),
            ("(1 2 . 3)", vec![cons(val(1), cons(val(2), val(3)))]),
            ("(a .)", vec![val(vec![sym("a")])]),
            ("(a . b c)", vec![cons(sym("a"), sym("b")), sym("c"), nil()]),
            ("'x", vec![quote(sym("x"))]),
            ("''x", vec![quote(quote(sym("x")))]),
            ("'(1 2)", vec![quote(val([1, 2]))]),
            ("'", vec![quote(nil())]),
            ("(+ 1 ; comment\n 2)", vec![val(vec![sym("+"), val(1), val(2)])]),
            ("1 2 3", vec![val(1), val(2), val(3)]),
            // Lenient bracket handling
            ("(1 (2 3", vec![val(vec![val(1), val([2, 3])])]),
            ("1 ) 2", vec![val(1), nil(), val(2)]),
            ("", vec![]),
        ];

        for (source, expected) in test_cases {
            assert_eq!(read_all(source), expected, "reading {source}");
        }
    }

    #[test]
    fn test_printed_form_reproduces_dotted_notation() {
        let test_cases = vec![
            ("(1 (2 3) . 4)", "(1 (2 3) . 4)"),
            ("( a  .  (b . (c)) )", "(a b c)"),
            ("'(x . y)", "(quote (x . y))"),
            ("(\"s\" #t 2.5)", "(\"s\" #t 2.5)"),
        ];

        for (source, printed) in test_cases {
            let forms = read_all(source);
            assert_eq!(forms.len(), 1, "{source}");
            assert_eq!(forms[0].to_string(), printed, "{source}");
        }
    }

    #[test]
    fn test_unrecognized_input_is_reported_and_skipped() {
        let reading = read("(+ 1 #x 2) ,", MAX_PARSE_DEPTH);
        assert_eq!(reading.forms, vec![val(vec![sym("+"), val(1), val(2)])]);
        assert_eq!(reading.errors.len(), 2);

        let error = &reading.errors[0];
        assert_eq!(error.kind, ParseErrorKind::InvalidSyntax);
        assert_eq!(error.found.as_deref(), Some("#x"));
        assert!(error.context.as_ref().unwrap().contains("#x"));
        assert_eq!(reading.errors[1].found.as_deref(), Some(","));
    }

    #[test]
    fn test_depth_guard() {
        let deep = format!("{}x{}", "(".repeat(10), ")".repeat(10));
        let reading = read(&format!("{deep} after"), 3);
        assert_eq!(reading.errors.len(), 1);
        assert_eq!(reading.errors[0].kind, ParseErrorKind::TooDeeplyNested);
        // Three levels survive, the rest is replaced by ()
        assert_eq!(
            reading.forms,
            vec![val(vec![val(vec![val(vec![nil()])])]), sym("after")]
        );

        let quotes = format!("{}y", "'".repeat(10));
        let reading = read(&quotes, 3);
        assert_eq!(reading.forms, vec![nil()]);
        assert_eq!(reading.errors[0].kind, ParseErrorKind::TooDeeplyNested);

        // At the limit nothing is reported
        let fits = format!("{}1{}", "(".repeat(3), ")".repeat(3));
        assert!(read(&fits, 3).errors.is_empty());
    }

    #[test]
    fn test_default_depth_handles_realistic_nesting() {
        let nested = format!("{}{}", "(list ".repeat(200), ")".repeat(200));
        let reading = read(&nested, MAX_PARSE_DEPTH);
        assert!(reading.errors.is_empty());
        assert_eq!(reading.forms.len(), 1);
        assert_eq!(parse_number("12").unwrap(), val(12));
        assert!(parse_number("12x").is_none());
    }
}
