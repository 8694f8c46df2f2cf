//! Reader for terms in canonical functional notation.
//!
//! Accepts `f(X, a, 1, -2.5e3, "s", [H|T], 'quoted atom', \+(g))`. There are
//! no infix operators: `a :- b` must be written `':-'(a, b)`. A single
//! trailing `.` is ignored.

use std::collections::HashMap;
use std::sync::Arc;

use super::{SYMBOL_CHARS, Term, Var};
use crate::error::{TermError, TermResult};

/// Maps variable names to variables while reading one clause or term.
///
/// Variables are numbered from the scope's start in order of first
/// appearance; each `_` is a distinct anonymous variable.
#[derive(Debug, Clone, Default)]
pub struct VarScope {
    start: u64,
    names: Vec<Arc<str>>,
    by_name: HashMap<String, Var>,
}

impl VarScope {
    /// A scope numbering variables from 0.
    pub fn new() -> Self {
        Self::default()
    }

    /// A scope numbering variables from `start`.
    pub fn starting_at(start: u64) -> Self {
        Self {
            start,
            ..Self::default()
        }
    }

    /// The variable called `name`, created on first use.
    pub fn named(&mut self, name: &str) -> Var {
        if name == "_" {
            return self.anonymous();
        }
        if let Some(v) = self.by_name.get(name) {
            return *v;
        }
        let v = self.push(name);
        self.by_name.insert(name.to_string(), v);
        v
    }

    /// A fresh anonymous variable.
    pub fn anonymous(&mut self) -> Var {
        self.push("_")
    }

    fn push(&mut self, name: &str) -> Var {
        let v = Var::new(self.start + self.names.len() as u64);
        self.names.push(Arc::from(name));
        v
    }

    /// Names of the scope's variables, in numbering order.
    pub fn names(&self) -> &[Arc<str>] {
        &self.names
    }

    /// Number of variables created so far.
    pub fn len(&self) -> usize {
        self.names.len()
    }

    /// Whether no variable has been created.
    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

/// Read one term, resolving variable names in `scope`.
pub fn parse_term(input: &str, scope: &mut VarScope) -> TermResult<Term> {
    let mut reader = Reader {
        src: input,
        pos: 0,
        scope,
    };
    let term = reader.term()?;
    reader.skip_ws();
    if reader.peek() == Some('.') {
        reader.pos += 1;
        reader.skip_ws();
    }
    if reader.pos < input.len() {
        return Err(reader.error("unexpected trailing input"));
    }
    Ok(term)
}

struct Reader<'a, 's> {
    src: &'a str,
    pos: usize,
    scope: &'s mut VarScope,
}

impl Reader<'_, '_> {
    fn peek(&self) -> Option<char> {
        self.src[self.pos..].chars().next()
    }

    fn peek_at(&self, skip: usize) -> Option<char> {
        self.src[self.pos..].chars().nth(skip)
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += c.len_utf8();
        Some(c)
    }

    fn skip_ws(&mut self) {
        while let Some(c) = self.peek() {
            if c.is_whitespace() {
                self.pos += c.len_utf8();
            } else if c == '%' {
                // Line comment.
                while let Some(c) = self.bump() {
                    if c == '\n' {
                        break;
                    }
                }
            } else {
                break;
            }
        }
    }

    fn error(&self, message: impl Into<String>) -> TermError {
        TermError::Syntax {
            offset: self.pos,
            message: message.into(),
        }
    }

    fn expect(&mut self, want: char) -> TermResult<()> {
        self.skip_ws();
        match self.bump() {
            Some(c) if c == want => Ok(()),
            Some(c) => Err(TermError::Syntax {
                offset: self.pos - c.len_utf8(),
                message: format!("expected `{want}`, found `{c}`"),
            }),
            None => Err(TermError::UnexpectedEnd),
        }
    }

    fn take_while(&mut self, pred: impl Fn(char) -> bool) -> &str {
        let start = self.pos;
        while let Some(c) = self.peek() {
            if !pred(c) {
                break;
            }
            self.pos += c.len_utf8();
        }
        &self.src[start..self.pos]
    }

    fn term(&mut self) -> TermResult<Term> {
        self.skip_ws();
        let c = self.peek().ok_or(TermError::UnexpectedEnd)?;
        match c {
            c if c.is_ascii_digit() => self.number(false),
            '-' if self.peek_at(1).is_some_and(|d| d.is_ascii_digit()) => {
                self.pos += 1;
                self.number(true)
            }
            c if c == '_' || c.is_uppercase() => {
                let name = self.take_while(is_alnum).to_string();
                Ok(Term::Var(self.scope.named(&name)))
            }
            c if c.is_alphabetic() => {
                let name = self.take_while(is_alnum).to_string();
                self.maybe_args(name)
            }
            '\'' => {
                self.pos += 1;
                let name = self.quoted('\'')?;
                self.maybe_args(name)
            }
            '"' => {
                self.pos += 1;
                let s = self.quoted('"')?;
                Ok(Term::string(s))
            }
            '[' => {
                self.pos += 1;
                self.list()
            }
            '(' => {
                self.pos += 1;
                let inner = self.term()?;
                self.expect(')')?;
                Ok(inner)
            }
            '!' | ';' => {
                self.pos += 1;
                self.maybe_args(c.to_string())
            }
            c if SYMBOL_CHARS.contains(c) => {
                let name = self.take_while(|c| SYMBOL_CHARS.contains(c)).to_string();
                self.maybe_args(name)
            }
            other => Err(self.error(format!("unexpected character `{other}`"))),
        }
    }

    fn maybe_args(&mut self, name: String) -> TermResult<Term> {
        if self.peek() != Some('(') {
            return Ok(Term::atom(name));
        }
        self.pos += 1;
        let mut args = vec![self.term()?];
        loop {
            self.skip_ws();
            match self.bump() {
                Some(',') => args.push(self.term()?),
                Some(')') => break,
                Some(c) => return Err(self.error(format!("expected `,` or `)`, found `{c}`"))),
                None => return Err(TermError::UnexpectedEnd),
            }
        }
        Ok(Term::compound(name, args))
    }

    fn list(&mut self) -> TermResult<Term> {
        self.skip_ws();
        if self.peek() == Some(']') {
            self.pos += 1;
            return self.maybe_args("[]".to_string());
        }
        let mut items = vec![self.term()?];
        loop {
            self.skip_ws();
            match self.bump() {
                Some(',') => items.push(self.term()?),
                Some('|') => {
                    let tail = self.term()?;
                    self.expect(']')?;
                    return Ok(Term::list_with_tail(items, tail));
                }
                Some(']') => return Ok(Term::list(items)),
                Some(c) => return Err(self.error(format!("expected `,`, `|` or `]`, found `{c}`"))),
                None => return Err(TermError::UnexpectedEnd),
            }
        }
    }

    fn quoted(&mut self, close: char) -> TermResult<String> {
        let mut out = String::new();
        loop {
            match self.bump().ok_or(TermError::UnexpectedEnd)? {
                '\\' => match self.bump().ok_or(TermError::UnexpectedEnd)? {
                    'n' => out.push('\n'),
                    't' => out.push('\t'),
                    other => out.push(other),
                },
                c if c == close => {
                    // Doubled quote is an escaped quote.
                    if self.peek() == Some(close) {
                        self.pos += 1;
                        out.push(close);
                    } else {
                        return Ok(out);
                    }
                }
                c => out.push(c),
            }
        }
    }

    fn number(&mut self, negative: bool) -> TermResult<Term> {
        let start = self.pos;
        self.take_while(|c| c.is_ascii_digit());
        let mut is_float = false;
        if self.peek() == Some('.') && self.peek_at(1).is_some_and(|d| d.is_ascii_digit()) {
            is_float = true;
            self.pos += 1;
            self.take_while(|c| c.is_ascii_digit());
        }
        if matches!(self.peek(), Some('e' | 'E')) {
            let signed = matches!(self.peek_at(1), Some('+' | '-'));
            let digit_at = if signed { 2 } else { 1 };
            if self.peek_at(digit_at).is_some_and(|d| d.is_ascii_digit()) {
                is_float = true;
                self.pos += digit_at;
                self.take_while(|c| c.is_ascii_digit());
            }
        }
        let text = &self.src[start..self.pos];
        if is_float {
            let value: f64 = text
                .parse()
                .map_err(|_| self.error(format!("invalid float `{text}`")))?;
            Ok(Term::float(if negative { -value } else { value }))
        } else {
            let literal = if negative {
                format!("-{text}")
            } else {
                text.to_string()
            };
            let value: i64 = literal
                .parse()
                .map_err(|_| self.error(format!("integer `{literal}` out of range")))?;
            Ok(Term::int(value))
        }
    }
}

fn is_alnum(c: char) -> bool {
    c.is_alphanumeric() || c == '_'
}
