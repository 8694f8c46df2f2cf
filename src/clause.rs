//! Clauses: heads, bodies and probability annotations.
//!
//! A clause stores its variables numbered `0..n_vars` together with their
//! source names, so it can be renamed into a fresh variable block with a
//! single offset and printed back with the names it was written with.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::{DatabaseError, DatabaseResult};
use crate::term::{Term, Var, VarScope, parse_term};

/// Stable identifier of a clause within a database lineage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[repr(transparent)]
pub struct ClauseId(pub u32);

impl fmt::Display for ClauseId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "c{}", self.0)
    }
}

/// Probability label of a probabilistic head.
#[derive(Debug, Clone, PartialEq)]
pub enum Probability {
    /// A literal probability.
    Value(f64),
    /// A learnable parameter `t(_)` or `t(p)`.
    Tunable(Option<f64>),
    /// A decision fact `?`.
    Decision,
    /// An arithmetic expression over clause variables, evaluated after the
    /// body has been proved.
    Expr(Term),
}

impl Probability {
    /// Interpret a probability term: a number, `t(_)`, `t(P)`, `?` or an
    /// arithmetic expression.
    pub fn from_term(term: &Term) -> Probability {
        if let Some(p) = number_value(term) {
            return Probability::Value(p);
        }
        if term.is_atom("?") {
            return Probability::Decision;
        }
        if term.has_functor("t", 1) {
            let arg = &term.args()[0];
            if arg.is_var() {
                return Probability::Tunable(None);
            }
            if let Some(p) = number_value(arg) {
                return Probability::Tunable(Some(p));
            }
        }
        Probability::Expr(term.clone())
    }

    /// The probability as a term.
    pub fn to_term(&self) -> Term {
        match self {
            Probability::Value(p) => Term::float(*p),
            Probability::Tunable(None) => Term::compound("t", vec![Term::var(Var::new(0))]),
            Probability::Tunable(Some(p)) => Term::compound("t", vec![Term::float(*p)]),
            Probability::Decision => Term::atom("?"),
            Probability::Expr(t) => t.clone(),
        }
    }

    /// Constant value, if known before proving the body.
    pub fn constant(&self) -> Option<f64> {
        match self {
            Probability::Value(p) | Probability::Tunable(Some(p)) => Some(*p),
            _ => None,
        }
    }

    /// Numeric weight with learnable parameters at their initial value
    /// (0.5 when unset) and decisions switched off.
    ///
    /// Expression labels are evaluated during grounding and never reach a
    /// formula; they weigh 0 here.
    pub fn default_weight(&self) -> f64 {
        match self {
            Probability::Value(p) | Probability::Tunable(Some(p)) => *p,
            Probability::Tunable(None) => 0.5,
            Probability::Decision | Probability::Expr(_) => 0.0,
        }
    }

    /// Shift the variables of an expression label.
    pub(crate) fn offset_vars(&self, offset: u64) -> Probability {
        match self {
            Probability::Expr(t) => Probability::Expr(t.offset_vars(offset)),
            other => other.clone(),
        }
    }

    fn write_with(&self, f: &mut fmt::Formatter<'_>, names: &[Arc<str>]) -> fmt::Result {
        match self {
            Probability::Value(p) => write!(f, "{p}"),
            Probability::Tunable(None) => write!(f, "t(_)"),
            Probability::Tunable(Some(p)) => write!(f, "t({p})"),
            Probability::Decision => write!(f, "?"),
            Probability::Expr(t) => write!(f, "{}", t.display_with(names)),
        }
    }
}

impl fmt::Display for Probability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.write_with(f, &[])
    }
}

pub(crate) fn number_value(term: &Term) -> Option<f64> {
    use crate::term::Constant;
    match term {
        Term::Const(Constant::Int(i)) => Some(*i as f64),
        Term::Const(Constant::Float(x)) => Some(x.0),
        _ => None,
    }
}

/// Head of a clause.
#[derive(Debug, Clone, PartialEq)]
pub enum ClauseHead {
    /// A deterministic head.
    Plain(Term),
    /// A probabilistic head `p::h`.
    Probabilistic(Term, Probability),
    /// An annotated disjunction `p1::h1; ...; pn::hn`.
    Annotated(Vec<(Term, Probability)>),
}

impl ClauseHead {
    /// The head atoms, in branch order.
    pub fn terms(&self) -> Vec<&Term> {
        match self {
            ClauseHead::Plain(t) | ClauseHead::Probabilistic(t, _) => vec![t],
            ClauseHead::Annotated(branches) => branches.iter().map(|(t, _)| t).collect(),
        }
    }

    /// Head atom and label of branch `index`.
    pub fn branch(&self, index: usize) -> Option<(&Term, Option<&Probability>)> {
        match self {
            ClauseHead::Plain(t) if index == 0 => Some((t, None)),
            ClauseHead::Probabilistic(t, p) if index == 0 => Some((t, Some(p))),
            ClauseHead::Annotated(branches) => branches.get(index).map(|(t, p)| (t, Some(p))),
            _ => None,
        }
    }
}

/// Clause body as a control tree.
#[derive(Debug, Clone, PartialEq)]
pub enum Body {
    /// The empty body.
    True,
    /// A single goal (user predicate or builtin).
    Goal(Term),
    /// Sequential conjunction.
    And(Box<Body>, Box<Body>),
    /// Disjunction.
    Or(Box<Body>, Box<Body>),
    /// Negation as failure.
    Not(Box<Body>),
}

impl Body {
    /// Decompose a goal term on `,/2`, `;/2`, `\+/1`, `not/1` and `true`.
    pub fn from_term(term: &Term) -> Body {
        if term.is_atom("true") {
            return Body::True;
        }
        let args = term.args();
        if term.has_functor(",", 2) {
            return Body::And(
                Box::new(Body::from_term(&args[0])),
                Box::new(Body::from_term(&args[1])),
            );
        }
        if term.has_functor(";", 2) {
            return Body::Or(
                Box::new(Body::from_term(&args[0])),
                Box::new(Body::from_term(&args[1])),
            );
        }
        if term.has_functor("\\+", 1) || term.has_functor("not", 1) {
            return Body::Not(Box::new(Body::from_term(&args[0])));
        }
        Body::Goal(term.clone())
    }

    /// Conjunction of `goals` in order.
    pub fn conjunction(goals: Vec<Term>) -> Body {
        goals
            .into_iter()
            .rev()
            .map(|g| Body::from_term(&g))
            .reduce(|acc, g| Body::And(Box::new(g), Box::new(acc)))
            .unwrap_or(Body::True)
    }

    /// The body as a goal term.
    pub fn to_term(&self) -> Term {
        match self {
            Body::True => Term::atom("true"),
            Body::Goal(t) => t.clone(),
            Body::And(a, b) => Term::compound(",", vec![a.to_term(), b.to_term()]),
            Body::Or(a, b) => Term::compound(";", vec![a.to_term(), b.to_term()]),
            Body::Not(a) => Term::compound("\\+", vec![a.to_term()]),
        }
    }

    /// Shift every variable by `offset` (clause renaming).
    pub(crate) fn offset_vars(&self, offset: u64) -> Body {
        match self {
            Body::True => Body::True,
            Body::Goal(t) => Body::Goal(t.offset_vars(offset)),
            Body::And(a, b) => {
                Body::And(Box::new(a.offset_vars(offset)), Box::new(b.offset_vars(offset)))
            }
            Body::Or(a, b) => {
                Body::Or(Box::new(a.offset_vars(offset)), Box::new(b.offset_vars(offset)))
            }
            Body::Not(a) => Body::Not(Box::new(a.offset_vars(offset))),
        }
    }

    fn collect_all_vars(&self, out: &mut Vec<Var>) {
        match self {
            Body::True => {}
            Body::Goal(t) => t.collect_vars(out),
            Body::And(a, b) | Body::Or(a, b) => {
                a.collect_all_vars(out);
                b.collect_all_vars(out);
            }
            Body::Not(a) => a.collect_all_vars(out),
        }
    }

    fn collect_grounding_vars(&self, out: &mut Vec<Var>) {
        match self {
            Body::True | Body::Not(_) => {}
            Body::Goal(t) => goal_grounding_vars(t, out),
            Body::And(a, b) | Body::Or(a, b) => {
                a.collect_grounding_vars(out);
                b.collect_grounding_vars(out);
            }
        }
    }

    fn write_with(&self, f: &mut fmt::Formatter<'_>, names: &[Arc<str>]) -> fmt::Result {
        match self {
            Body::True => write!(f, "true"),
            Body::Goal(t) => write!(f, "{}", t.display_with(names)),
            Body::And(a, b) => {
                a.write_with(f, names)?;
                write!(f, ", ")?;
                b.write_with(f, names)
            }
            Body::Or(a, b) => {
                write!(f, "(")?;
                a.write_with(f, names)?;
                write!(f, "; ")?;
                b.write_with(f, names)?;
                write!(f, ")")
            }
            Body::Not(a) => {
                write!(f, "\\+(")?;
                a.write_with(f, names)?;
                write!(f, ")")
            }
        }
    }
}

/// Variables of a goal that must be bound after the body is proved.
///
/// Negated goals, `forall/2` and the template/goal of `findall/3`/`all/3` are
/// exempt: their variables are never instantiated by the call.
fn goal_grounding_vars(goal: &Term, out: &mut Vec<Var>) {
    let args = goal.args();
    if goal.has_functor("\\+", 1) || goal.has_functor("not", 1) || goal.has_functor("forall", 2) {
        return;
    }
    if goal.has_functor("findall", 3) || goal.has_functor("all", 3) {
        args[2].collect_vars(out);
        return;
    }
    if goal.has_functor(",", 2) || goal.has_functor(";", 2) {
        goal_grounding_vars(&args[0], out);
        goal_grounding_vars(&args[1], out);
        return;
    }
    if goal.name() == Some("call") && !args.is_empty() {
        if let Some(inner) = args[0].with_extra_args(&args[1..]) {
            goal_grounding_vars(&inner, out);
        } else {
            goal.collect_vars(out);
        }
        return;
    }
    goal.collect_vars(out);
}

/// First unsupported control construct reachable in goal position.
fn unsupported_control(goal: &Term) -> Option<String> {
    if goal.is_atom("!") {
        return Some("!".into());
    }
    for (name, arity) in [("catch", 3), ("throw", 1), ("->", 2), ("*->", 2)] {
        if goal.has_functor(name, arity) {
            return Some(format!("{name}/{arity}"));
        }
    }
    let args = goal.args();
    let goal_args: &[Term] = match (goal.name(), args.len()) {
        (Some(",") | Some(";") | Some("forall"), 2) => args,
        (Some("\\+") | Some("not"), 1) => args,
        (Some("findall") | Some("all"), 3) => &args[1..2],
        (Some("call"), n) if n >= 1 => &args[..1],
        _ => &[],
    };
    goal_args.iter().find_map(unsupported_control)
}

/// A stored clause.
#[derive(Debug, Clone, PartialEq)]
pub struct Clause {
    id: ClauseId,
    head: ClauseHead,
    body: Body,
    var_names: Vec<Arc<str>>,
    n_vars: usize,
    grounding_vars: Vec<Var>,
}

impl Clause {
    /// Build and validate a clause whose variables are numbered from 0.
    ///
    /// `var_names[i]` is the source name of variable `i` (may be shorter than
    /// the number of variables).
    pub fn new(head: ClauseHead, body: Body, var_names: Vec<Arc<str>>) -> DatabaseResult<Self> {
        let mut all = Vec::new();
        for t in head.terms() {
            t.collect_vars(&mut all);
        }
        body.collect_all_vars(&mut all);
        if let ClauseHead::Probabilistic(_, Probability::Expr(e)) = &head {
            e.collect_vars(&mut all);
        }
        if let ClauseHead::Annotated(branches) = &head {
            for (_, p) in branches {
                if let Probability::Expr(e) = p {
                    e.collect_vars(&mut all);
                }
            }
        }
        let n_vars = all
            .iter()
            .map(|v| v.get() as usize + 1)
            .max()
            .unwrap_or(0)
            .max(var_names.len());

        let mut grounding_vars = Vec::new();
        for t in head.terms() {
            t.collect_vars(&mut grounding_vars);
        }
        body.collect_grounding_vars(&mut grounding_vars);

        let clause = Self {
            id: ClauseId(0),
            head,
            body,
            var_names,
            n_vars,
            grounding_vars,
        };
        clause.validate()?;
        Ok(clause)
    }

    /// Interpret a clause term: `':-'(Head, Body)`, `'::'(P, Head)` and
    /// `';'`-separated annotated heads.
    pub fn from_term(term: &Term, var_names: Vec<Arc<str>>) -> DatabaseResult<Self> {
        let (head_term, body) = if term.has_functor(":-", 2) {
            (&term.args()[0], Body::from_term(&term.args()[1]))
        } else {
            (term, Body::True)
        };
        let head = head_from_term(head_term);
        Self::new(head, body, var_names)
    }

    /// Read a clause written in canonical notation.
    pub fn parse(src: &str) -> DatabaseResult<Self> {
        let mut scope = VarScope::new();
        let term = parse_term(src, &mut scope)?;
        Self::from_term(&term, scope.names().to_vec())
    }

    fn validate(&self) -> DatabaseResult<()> {
        for t in self.head.terms() {
            if !t.is_callable() {
                return Err(DatabaseError::InvalidHead { head: t.to_string() });
            }
        }
        if let Some(construct) = unsupported_control(&self.body.to_term()) {
            return Err(DatabaseError::UnsupportedControl {
                construct,
                clause: self.to_string(),
            });
        }
        let labels: Vec<&Probability> = match &self.head {
            ClauseHead::Plain(_) => Vec::new(),
            ClauseHead::Probabilistic(_, p) => vec![p],
            ClauseHead::Annotated(branches) => branches.iter().map(|(_, p)| p).collect(),
        };
        let mut total = 0.0;
        for p in &labels {
            if let Some(value) = p.constant() {
                if !(0.0..=1.0).contains(&value) {
                    return Err(DatabaseError::InvalidProbability {
                        value,
                        clause: self.to_string(),
                    });
                }
                total += value;
            }
        }
        if total > 1.0 + 1e-9 {
            return Err(DatabaseError::InvalidProbability {
                value: total,
                clause: self.to_string(),
            });
        }
        Ok(())
    }

    /// Identifier assigned by the database.
    pub fn id(&self) -> ClauseId {
        self.id
    }

    pub(crate) fn with_id(mut self, id: ClauseId) -> Self {
        self.id = id;
        self
    }

    /// The head.
    pub fn head(&self) -> &ClauseHead {
        &self.head
    }

    /// The body.
    pub fn body(&self) -> &Body {
        &self.body
    }

    /// Source names of the clause variables.
    pub fn var_names(&self) -> &[Arc<str>] {
        &self.var_names
    }

    /// Number of variables (`0..n_vars`).
    pub fn n_vars(&self) -> usize {
        self.n_vars
    }

    /// Variables that must be bound once the body is proved.
    pub fn grounding_vars(&self) -> &[Var] {
        &self.grounding_vars
    }

    /// Source name of a clause-local variable.
    pub fn var_name(&self, var: Var) -> String {
        match self.var_names.get(var.get() as usize) {
            Some(name) => name.to_string(),
            None => var.to_string(),
        }
    }

    /// Whether the head carries a probability label.
    pub fn is_probabilistic(&self) -> bool {
        !matches!(self.head, ClauseHead::Plain(_))
    }

    /// Whether the body is empty.
    pub fn is_fact(&self) -> bool {
        self.body == Body::True
    }
}

fn head_from_term(term: &Term) -> ClauseHead {
    if term.has_functor(";", 2) {
        let mut branches = Vec::new();
        let mut cur = term;
        while cur.has_functor(";", 2) {
            branches.push(annotated_branch(&cur.args()[0]));
            cur = &cur.args()[1];
        }
        branches.push(annotated_branch(cur));
        return ClauseHead::Annotated(branches);
    }
    if term.has_functor("::", 2) {
        let (t, p) = annotated_branch(term);
        return ClauseHead::Probabilistic(t, p);
    }
    ClauseHead::Plain(term.clone())
}

fn annotated_branch(term: &Term) -> (Term, Probability) {
    if term.has_functor("::", 2) {
        (term.args()[1].clone(), Probability::from_term(&term.args()[0]))
    } else {
        (term.clone(), Probability::Value(1.0))
    }
}

impl fmt::Display for Clause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names = &self.var_names;
        match &self.head {
            ClauseHead::Plain(t) => write!(f, "{}", t.display_with(names))?,
            ClauseHead::Probabilistic(t, p) => {
                p.write_with(f, names)?;
                write!(f, "::{}", t.display_with(names))?;
            }
            ClauseHead::Annotated(branches) => {
                for (i, (t, p)) in branches.iter().enumerate() {
                    if i > 0 {
                        write!(f, "; ")?;
                    }
                    p.write_with(f, names)?;
                    write!(f, "::{}", t.display_with(names))?;
                }
            }
        }
        if self.body != Body::True {
            write!(f, " :- ")?;
            self.body.write_with(f, names)?;
        }
        write!(f, ".")
    }
}

// ---------------------------------------------------------------------------
// Builder
// ---------------------------------------------------------------------------

/// Builds clauses from canonical-notation fragments that share one variable
/// scope.
///
/// ```
/// use probalog::clause::ClauseBuilder;
///
/// let clause = ClauseBuilder::new("path(X, Y)")
///     .when("edge(X, Z)")
///     .when("path(Z, Y)")
///     .build()
///     .unwrap();
/// assert_eq!(clause.to_string(), "path(X,Y) :- edge(X,Z), path(Z,Y).");
/// ```
#[derive(Debug)]
pub struct ClauseBuilder {
    scope: VarScope,
    heads: Vec<(Term, Option<Probability>)>,
    body: Vec<Term>,
    error: Option<DatabaseError>,
}

impl ClauseBuilder {
    /// Start a clause with the given head.
    pub fn new(head: &str) -> Self {
        let mut builder = Self {
            scope: VarScope::new(),
            heads: Vec::new(),
            body: Vec::new(),
            error: None,
        };
        if let Some(t) = builder.read(head) {
            builder.heads.push((t, None));
        }
        builder
    }

    fn read(&mut self, src: &str) -> Option<Term> {
        if self.error.is_some() {
            return None;
        }
        match parse_term(src, &mut self.scope) {
            Ok(t) => Some(t),
            Err(e) => {
                self.error = Some(e.into());
                None
            }
        }
    }

    /// Label the most recent head with probability `p`.
    pub fn probability(mut self, p: f64) -> Self {
        if let Some(last) = self.heads.last_mut() {
            last.1 = Some(Probability::Value(p));
        }
        self
    }

    /// Label the most recent head with a probability term (`t(_)`, `?`, an
    /// expression over clause variables).
    pub fn probability_term(mut self, src: &str) -> Self {
        if let Some(t) = self.read(src) {
            if let Some(last) = self.heads.last_mut() {
                last.1 = Some(Probability::from_term(&t));
            }
        }
        self
    }

    /// Add another annotated-disjunction branch.
    pub fn or_head(mut self, p: f64, head: &str) -> Self {
        if let Some(t) = self.read(head) {
            self.heads.push((t, Some(Probability::Value(p))));
        }
        self
    }

    /// Append a body goal.
    pub fn when(mut self, goal: &str) -> Self {
        if let Some(t) = self.read(goal) {
            self.body.push(t);
        }
        self
    }

    /// Finish the clause.
    pub fn build(mut self) -> DatabaseResult<Clause> {
        if let Some(e) = self.error.take() {
            return Err(e);
        }
        let head = match self.heads.as_slice() {
            [(t, Some(p))] => ClauseHead::Probabilistic(t.clone(), p.clone()),
            [(t, None)] => ClauseHead::Plain(t.clone()),
            _ => ClauseHead::Annotated(
                self.heads
                    .into_iter()
                    .map(|(t, p)| (t, p.unwrap_or(Probability::Value(1.0))))
                    .collect(),
            ),
        };
        Clause::new(head, Body::conjunction(self.body), self.scope.names().to_vec())
    }
}

/// A deterministic fact.
pub fn fact(head: &str) -> DatabaseResult<Clause> {
    ClauseBuilder::new(head).build()
}

/// A probabilistic fact `p::head`.
pub fn prob_fact(p: f64, head: &str) -> DatabaseResult<Clause> {
    ClauseBuilder::new(head).probability(p).build()
}

/// A deterministic rule `head :- body_1, ..., body_n`.
pub fn rule(head: &str, body: &[&str]) -> DatabaseResult<Clause> {
    body.iter()
        .fold(ClauseBuilder::new(head), |b, g| b.when(g))
        .build()
}
