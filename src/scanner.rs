//! Table-driven tokenizer.
//!
//! The scanner is a finite state machine whose transitions live in a lookup table indexed
//! by state and character class. Each table entry either moves to another state (consuming
//! the character), finishes a token including the character, or finishes a token *before*
//! it so the character starts the next token.
//!
//! Whitespace and comments are tokens too, and unrecognized input becomes an
//! [`TokenKind::Error`] token instead of aborting, so concatenating every lexeme always
//! reproduces the input exactly.

use std::sync::LazyLock;

/// Kinds of tokens produced by the scanner
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    Quote,
    /// `(`, `[` or `{`
    Open,
    /// `)`, `]` or `}`
    Close,
    /// String literal, including its quotes (the closing quote may be missing at end of input)
    Str,
    False,
    True,
    Dot,
    Num,
    Float,
    Sym,
    Comment,
    White,
    /// Character sequence no rule accepts
    Error,
    Eof,
}

/// A token with the exact source text it was scanned from
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Token<'a> {
    pub kind: TokenKind,
    pub lexeme: &'a str,
    /// Byte offset of the lexeme in the source
    pub offset: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Start,
    Comment,
    White,
    Dot,
    Dash,
    Floatsym,
    Num,
    Float,
    Sym,
    Str,
    Hash,
}

const STATES: usize = 11;

#[derive(Debug, Clone, Copy)]
enum Action {
    /// Consume the character and continue in a state
    Go(State),
    /// Consume the character and finish the token
    Emit(TokenKind),
    /// Finish the token; the character belongs to the next one
    EmitBefore(TokenKind),
}

/// One class per ASCII character plus end of input
const CLASSES: usize = 257;
const EOF_CLASS: usize = 256;

const SYMBOL_START: &str = "!$%@*+/:<=>?ABCDEFGHIJKLMNOPQRSTUVWXYZ\\^_abcdefghijklmnopqrstuvwxyz|~";
const DIGITS: &str = "0123456789";
const WHITESPACE: &str = "\u{8}\t\n\u{b}\u{c}\r ";

fn class_of(c: char) -> usize {
    if c.is_ascii() {
        c as usize
    } else {
        // Anything beyond ASCII scans like a letter
        'a' as usize
    }
}

type Row = [Action; CLASSES];

fn row(default: Action) -> Row {
    [default; CLASSES]
}

fn on(row: &mut Row, chars: &str, action: Action) {
    for c in chars.chars() {
        row[class_of(c)] = action;
    }
}

static TRANSITIONS: LazyLock<[Row; STATES]> = LazyLock::new(|| {
    use Action::*;
    use TokenKind as T;

    let mut start = row(Emit(T::Error));
    on(&mut start, WHITESPACE, Go(State::White));
    on(&mut start, ";", Go(State::Comment));
    on(&mut start, "'", Emit(T::Quote));
    on(&mut start, "([{", Emit(T::Open));
    on(&mut start, ")]}", Emit(T::Close));
    on(&mut start, "\"", Go(State::Str));
    on(&mut start, "#", Go(State::Hash));
    on(&mut start, ".", Go(State::Dot));
    on(&mut start, "-", Go(State::Dash));
    on(&mut start, DIGITS, Go(State::Num));
    on(&mut start, SYMBOL_START, Go(State::Sym));
    start[EOF_CLASS] = Emit(T::Eof);

    let mut comment = row(Go(State::Comment));
    comment['\n' as usize] = EmitBefore(T::Comment);
    comment[EOF_CLASS] = EmitBefore(T::Comment);

    let mut white = row(EmitBefore(T::White));
    on(&mut white, WHITESPACE, Go(State::White));

    let mut dot = row(EmitBefore(T::Dot));
    on(&mut dot, DIGITS, Go(State::Float));
    on(&mut dot, SYMBOL_START, Go(State::Sym));
    on(&mut dot, "-.", Go(State::Sym));

    let mut dash = row(EmitBefore(T::Sym));
    on(&mut dash, ".", Go(State::Floatsym));
    on(&mut dash, DIGITS, Go(State::Num));
    on(&mut dash, SYMBOL_START, Go(State::Sym));
    on(&mut dash, "-", Go(State::Sym));

    let mut floatsym = row(EmitBefore(T::Sym));
    on(&mut floatsym, DIGITS, Go(State::Float));
    on(&mut floatsym, SYMBOL_START, Go(State::Sym));
    on(&mut floatsym, "-.", Go(State::Sym));

    let mut num = row(EmitBefore(T::Num));
    on(&mut num, DIGITS, Go(State::Num));
    on(&mut num, ".", Go(State::Float));
    on(&mut num, SYMBOL_START, Go(State::Sym));
    on(&mut num, "-", Go(State::Sym));

    let mut float = row(EmitBefore(T::Float));
    on(&mut float, DIGITS, Go(State::Float));
    on(&mut float, SYMBOL_START, Go(State::Sym));
    on(&mut float, "-.", Go(State::Sym));

    let mut sym = row(EmitBefore(T::Sym));
    on(&mut sym, SYMBOL_START, Go(State::Sym));
    on(&mut sym, DIGITS, Go(State::Sym));
    on(&mut sym, "-.", Go(State::Sym));

    let mut string = row(Go(State::Str));
    string['"' as usize] = Emit(T::Str);
    string[EOF_CLASS] = EmitBefore(T::Str);

    let mut hash = row(Emit(T::Error));
    on(&mut hash, "fF", Emit(T::False));
    on(&mut hash, "tT", Emit(T::True));
    hash[EOF_CLASS] = EmitBefore(T::Error);

    // Indexed by `State as usize`
    [start, comment, white, dot, dash, floatsym, num, float, sym, string, hash]
});

/// Iterator over the tokens of a source text, ending with a single [`TokenKind::Eof`]
#[derive(Debug, Clone)]
pub struct Scanner<'a> {
    source: &'a str,
    pos: usize,
    finished: bool,
}

impl<'a> Scanner<'a> {
    pub fn new(source: &'a str) -> Self {
        Scanner {
            source,
            pos: 0,
            finished: false,
        }
    }

    fn scan(&mut self) -> Token<'a> {
        let table = &*TRANSITIONS;
        let start = self.pos;
        let mut state = State::Start;
        let mut rest = self.source[start..].chars();
        loop {
            let (class, width) = match rest.next() {
                Some(c) => (class_of(c), c.len_utf8()),
                None => (EOF_CLASS, 0),
            };
            let kind = match table[state as usize][class] {
                Action::Go(next) => {
                    self.pos += width;
                    state = next;
                    continue;
                }
                Action::Emit(kind) => {
                    self.pos += width;
                    kind
                }
                Action::EmitBefore(kind) => kind,
            };
            return Token {
                kind,
                lexeme: &self.source[start..self.pos],
                offset: start,
            };
        }
    }
}

impl<'a> Iterator for Scanner<'a> {
    type Item = Token<'a>;

    fn next(&mut self) -> Option<Token<'a>> {
        if self.finished {
            return None;
        }
        let token = self.scan();
        self.finished = token.kind == TokenKind::Eof;
        Some(token)
    }
}

impl std::iter::FusedIterator for Scanner<'_> {}

/// Scan a whole source text
pub fn tokenize(source: &str) -> Scanner<'_> {
    Scanner::new(source)
}
