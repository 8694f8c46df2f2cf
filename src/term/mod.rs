//! Core term types for the probalog engine.
//!
//! A [`Term`] is an immutable tagged union of variables, atomic constants and
//! compound terms. Compound terms are reference counted, so cloning a term is
//! cheap and sub-terms are shared between clauses, answers and formulas.
//! Unification never mutates a term: it produces a [`Substitution`].

pub mod reader;
pub mod subst;

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

pub use reader::{VarScope, parse_term};
pub use subst::{Substitution, VarSource, rename, rename_offset, unify, unify_with_occurs_check};

/// A logic variable.
///
/// Variables are plain numbers: clause variables are numbered `0..n` locally
/// and renamed into a fresh block (see [`VarSource`]) before every resolution
/// step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[repr(transparent)]
pub struct Var(u64);

impl Var {
    /// Create a variable from its raw number.
    pub fn new(raw: u64) -> Self {
        Var(raw)
    }

    /// Get the underlying number.
    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for Var {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "_{}", self.0)
    }
}

/// A float with total equality, so terms can be hashed and ordered.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Float(pub f64);

impl PartialEq for Float {
    fn eq(&self, other: &Self) -> bool {
        self.0.to_bits() == other.0.to_bits()
    }
}

impl Eq for Float {}

impl std::hash::Hash for Float {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.0.to_bits().hash(state);
    }
}

impl PartialOrd for Float {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Float {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.0.total_cmp(&other.0)
    }
}

/// An atomic value.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Constant {
    /// A symbolic atom such as `heads` or `[]`.
    Atom(Arc<str>),
    /// An integer.
    Int(i64),
    /// A floating point number.
    Float(Float),
    /// A string literal.
    Str(Arc<str>),
}

/// A compound term `functor(arg1, ..., argN)` with `N >= 1`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Compound {
    /// Functor name.
    pub functor: Arc<str>,
    /// Ordered arguments.
    pub args: Vec<Term>,
}

/// A logic term.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Term {
    /// A variable.
    Var(Var),
    /// An atomic constant.
    Const(Constant),
    /// A compound term.
    Compound(Arc<Compound>),
}

/// Predicate indicator `name/arity`, the key of the clause index.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Indicator {
    /// Predicate name.
    pub name: Arc<str>,
    /// Number of arguments.
    pub arity: usize,
}

impl Indicator {
    /// Create an indicator.
    pub fn new(name: impl AsRef<str>, arity: usize) -> Self {
        Self {
            name: Arc::from(name.as_ref()),
            arity,
        }
    }
}

impl fmt::Display for Indicator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.name, self.arity)
    }
}

pub(crate) const NIL: &str = "[]";
pub(crate) const CONS: &str = ".";

impl Term {
    /// A symbolic atom.
    pub fn atom(name: impl AsRef<str>) -> Self {
        Term::Const(Constant::Atom(Arc::from(name.as_ref())))
    }

    /// An integer constant.
    pub fn int(value: i64) -> Self {
        Term::Const(Constant::Int(value))
    }

    /// A float constant.
    pub fn float(value: f64) -> Self {
        Term::Const(Constant::Float(Float(value)))
    }

    /// A string constant.
    pub fn string(value: impl AsRef<str>) -> Self {
        Term::Const(Constant::Str(Arc::from(value.as_ref())))
    }

    /// A variable term.
    pub fn var(var: Var) -> Self {
        Term::Var(var)
    }

    /// A compound term. With no arguments this is the atom `functor`.
    pub fn compound(functor: impl AsRef<str>, args: Vec<Term>) -> Self {
        if args.is_empty() {
            return Term::atom(functor);
        }
        Term::Compound(Arc::new(Compound {
            functor: Arc::from(functor.as_ref()),
            args,
        }))
    }

    /// The empty list `[]`.
    pub fn nil() -> Self {
        Term::atom(NIL)
    }

    /// A proper list of `items`.
    pub fn list(items: Vec<Term>) -> Self {
        Self::list_with_tail(items, Term::nil())
    }

    /// A (possibly partial) list `[items | tail]`.
    pub fn list_with_tail(items: Vec<Term>, tail: Term) -> Self {
        items
            .into_iter()
            .rev()
            .fold(tail, |acc, item| Term::compound(CONS, vec![item, acc]))
    }

    /// Functor name of an atom or compound term.
    pub fn name(&self) -> Option<&str> {
        match self {
            Term::Const(Constant::Atom(a)) => Some(a),
            Term::Compound(c) => Some(&c.functor),
            _ => None,
        }
    }

    /// Number of arguments (0 for atomic terms and variables).
    pub fn arity(&self) -> usize {
        self.args().len()
    }

    /// Arguments of a compound term, or an empty slice.
    pub fn args(&self) -> &[Term] {
        match self {
            Term::Compound(c) => &c.args,
            _ => &[],
        }
    }

    /// Predicate indicator of a callable term.
    pub fn indicator(&self) -> Option<Indicator> {
        self.name().map(|n| Indicator::new(n, self.arity()))
    }

    /// Whether this is the atom `name`.
    pub fn is_atom(&self, name: &str) -> bool {
        matches!(self, Term::Const(Constant::Atom(a)) if &**a == name)
    }

    /// Whether the term has functor `name/arity`.
    pub fn has_functor(&self, name: &str, arity: usize) -> bool {
        self.name() == Some(name) && self.arity() == arity
    }

    /// Whether this term is a variable.
    pub fn is_var(&self) -> bool {
        matches!(self, Term::Var(_))
    }

    /// Whether the term can be called as a goal (atom or compound).
    pub fn is_callable(&self) -> bool {
        self.name().is_some()
    }

    /// Whether no variable occurs in the term.
    pub fn is_ground(&self) -> bool {
        match self {
            Term::Var(_) => false,
            Term::Const(_) => true,
            Term::Compound(c) => c.args.iter().all(Term::is_ground),
        }
    }

    /// Distinct variables in first-occurrence order.
    pub fn vars(&self) -> Vec<Var> {
        let mut out = Vec::new();
        self.collect_vars(&mut out);
        out
    }

    /// Append the variables of this term not yet in `out`.
    pub fn collect_vars(&self, out: &mut Vec<Var>) {
        match self {
            Term::Var(v) => {
                if !out.contains(v) {
                    out.push(*v);
                }
            }
            Term::Const(_) => {}
            Term::Compound(c) => c.args.iter().for_each(|a| a.collect_vars(out)),
        }
    }

    /// Rebuild the term, replacing every variable by `f(var)`.
    pub fn map_vars(&self, f: &mut impl FnMut(Var) -> Term) -> Term {
        match self {
            Term::Var(v) => f(*v),
            Term::Const(_) => self.clone(),
            Term::Compound(c) => {
                if self.is_ground() {
                    return self.clone();
                }
                Term::Compound(Arc::new(Compound {
                    functor: c.functor.clone(),
                    args: c.args.iter().map(|a| a.map_vars(f)).collect(),
                }))
            }
        }
    }

    /// Shift every variable number by `offset`.
    pub fn offset_vars(&self, offset: u64) -> Term {
        self.map_vars(&mut |v| Term::Var(Var(v.0 + offset)))
    }

    /// Variant-canonical form: variables renumbered `0..k` in first-occurrence
    /// order. Two terms are variants of each other iff their canonical forms
    /// are equal.
    pub fn canonical(&self) -> Term {
        let order = self.vars();
        if order.is_empty() {
            return self.clone();
        }
        self.map_vars(&mut |v| {
            let idx = order.iter().position(|o| *o == v).unwrap_or(0);
            Term::Var(Var(idx as u64))
        })
    }

    /// Elements of a proper list, or `None` if this is not a proper list.
    pub fn as_list(&self) -> Option<Vec<Term>> {
        let mut items = Vec::new();
        let mut cur = self;
        loop {
            if cur.is_atom(NIL) {
                return Some(items);
            }
            if cur.has_functor(CONS, 2) {
                let args = cur.args();
                items.push(args[0].clone());
                cur = &args[1];
            } else {
                return None;
            }
        }
    }

    /// The same goal with `extra` arguments appended (for `call/N`).
    pub fn with_extra_args(&self, extra: &[Term]) -> Option<Term> {
        let name = self.name()?;
        let mut args = self.args().to_vec();
        args.extend_from_slice(extra);
        Some(Term::compound(name, args))
    }

    /// Display the term using `names[i]` for local variable `i`.
    pub fn display_with<'a>(&'a self, names: &'a [Arc<str>]) -> impl fmt::Display + 'a {
        NamedTerm { term: self, names }
    }
}

struct NamedTerm<'a> {
    term: &'a Term,
    names: &'a [Arc<str>],
}

impl fmt::Display for NamedTerm<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write_term(f, self.term, self.names)
    }
}

impl fmt::Display for Term {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write_term(f, self, &[])
    }
}

impl fmt::Display for Constant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Constant::Atom(a) => write_atom(f, a),
            Constant::Int(i) => write!(f, "{i}"),
            Constant::Float(x) => write_float(f, x.0),
            Constant::Str(s) => {
                f.write_str("\"")?;
                for ch in s.chars() {
                    match ch {
                        '"' => f.write_str("\\\"")?,
                        '\\' => f.write_str("\\\\")?,
                        '\n' => f.write_str("\\n")?,
                        c => write!(f, "{c}")?,
                    }
                }
                f.write_str("\"")
            }
        }
    }
}

fn write_term(f: &mut fmt::Formatter<'_>, term: &Term, names: &[Arc<str>]) -> fmt::Result {
    match term {
        Term::Var(v) => match names.get(v.0 as usize) {
            Some(name) => f.write_str(name),
            None => write!(f, "{v}"),
        },
        Term::Const(c) => write!(f, "{c}"),
        Term::Compound(c) if &*c.functor == CONS && c.args.len() == 2 => {
            f.write_str("[")?;
            write_term(f, &c.args[0], names)?;
            let mut tail = &c.args[1];
            loop {
                if tail.has_functor(CONS, 2) {
                    f.write_str(",")?;
                    write_term(f, &tail.args()[0], names)?;
                    tail = &tail.args()[1];
                } else if tail.is_atom(NIL) {
                    break;
                } else {
                    f.write_str("|")?;
                    write_term(f, tail, names)?;
                    break;
                }
            }
            f.write_str("]")
        }
        Term::Compound(c) => {
            write_atom(f, &c.functor)?;
            f.write_str("(")?;
            for (i, arg) in c.args.iter().enumerate() {
                if i > 0 {
                    f.write_str(",")?;
                }
                write_term(f, arg, names)?;
            }
            f.write_str(")")
        }
    }
}

fn write_float(f: &mut fmt::Formatter<'_>, x: f64) -> fmt::Result {
    if x.is_finite() && x.fract() == 0.0 && x.abs() < 1e15 {
        write!(f, "{x:.1}")
    } else {
        write!(f, "{x:?}")
    }
}

pub(crate) const SYMBOL_CHARS: &str = "+-*/\\^<>=~:.?@#&$";

fn write_atom(f: &mut fmt::Formatter<'_>, atom: &str) -> fmt::Result {
    if needs_quotes(atom) {
        f.write_str("'")?;
        for ch in atom.chars() {
            match ch {
                '\'' => f.write_str("\\'")?,
                '\\' => f.write_str("\\\\")?,
                c => write!(f, "{c}")?,
            }
        }
        f.write_str("'")
    } else {
        f.write_str(atom)
    }
}

fn needs_quotes(atom: &str) -> bool {
    if matches!(atom, "[]" | "!" | ";" | "{}") {
        return false;
    }
    let mut chars = atom.chars();
    match chars.next() {
        None => true,
        Some(c) if c.is_ascii_lowercase() => !atom.chars().all(|c| c.is_alphanumeric() || c == '_'),
        Some(_) => !atom.chars().all(|c| SYMBOL_CHARS.contains(c)),
    }
}
