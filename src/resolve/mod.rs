//! Tabled resolution engine.
//!
//! Every call to a user predicate is tabled by its variant-canonical form.
//! Evaluation of tables follows a depth-first numbering scheme: a call that
//! reaches a table still on the evaluation stack (`Active`) consumes the
//! answers found so far and records a dependency on it. The oldest table of
//! such a strongly connected group (its *leader*) re-runs its clauses until a
//! pass produces no new answers anywhere, then marks the whole group
//! complete. Resumption is therefore explicit re-evaluation rather than
//! coroutine suspension.
//!
//! Each answer owns an OR *definition* node in the [`LogicFormula`]; every
//! proof of the answer adds one disjunct. Consumers reference the definition
//! node, so disjuncts found later (including cyclic ones) are picked up
//! without re-resolution.
//!
//! Probabilistic clause instances are handed to a [`ChoiceHandler`]: the
//! [`FormulaBuilder`] turns them into formula atoms, while the sampler decides
//! them on the spot.

pub mod arith;
mod builtins;
mod table;

pub use table::TableStats;

use crate::cancel::CancellationToken;
use crate::clause::{Body, Clause, ClauseHead, Probability};
use crate::database::{ClauseRef, Database};
use crate::error::{GroundError, GroundResult};
use crate::formula::{ChoiceKey, FormulaRef, GroupKey, LogicFormula, Node, NodeId};
use crate::term::{Substitution, Term, Var, VarSource, rename, unify, unify_with_occurs_check};

use table::{Frame, TableId, TableState, TableStore};

/// One instance of a probabilistic clause whose body has been proved.
#[derive(Debug, Clone)]
pub struct Choice {
    pub key: ChoiceKey,
    /// Label with expressions evaluated.
    pub probability: Probability,
    /// The ground head this choice makes true.
    pub label: Term,
    pub group: Option<GroupKey>,
    /// Default weights of every branch of the annotated disjunction, in
    /// branch order (empty for single-headed clauses).
    pub group_weights: Vec<f64>,
}

/// Decides what a probabilistic choice contributes to a proof.
pub trait ChoiceHandler {
    /// The formula for `choice`: an atom node when building a formula, or a
    /// constant when the choice is decided immediately.
    fn choose(&mut self, formula: &mut LogicFormula, choice: Choice) -> GroundResult<FormulaRef>;

    /// Whether answers need definition nodes. Handlers that only return
    /// constants can skip them.
    fn tracks_nodes(&self) -> bool {
        true
    }
}

/// Handler that grounds every choice to an interned formula atom.
#[derive(Debug, Clone, Copy, Default)]
pub struct FormulaBuilder;

impl ChoiceHandler for FormulaBuilder {
    fn choose(&mut self, formula: &mut LogicFormula, choice: Choice) -> GroundResult<FormulaRef> {
        let id = formula.add_atom(choice.key, choice.probability, choice.label, choice.group);
        Ok(FormulaRef::Node(id))
    }
}

/// A solution of a top-level goal: the instantiated goal and the formula
/// under which it holds.
#[derive(Debug, Clone, PartialEq)]
pub struct Solution {
    pub term: Term,
    pub formula: FormulaRef,
}

type Solutions = Vec<(Substitution, FormulaRef)>;

/// Tabled resolver over one database. The tabling cache lives as long as the
/// resolver, so it is scoped to one grounding or sampling pass.
pub struct Resolver<'db, H> {
    db: &'db Database,
    handler: H,
    formula: LogicFormula,
    tables: TableStore,
    vars: VarSource,
    stack: Vec<Frame>,
    incomplete: Vec<TableId>,
    next_dfn: usize,
    iteration: u64,
    generation: u64,
    low_water: usize,
    occurs_check: bool,
    cancel: CancellationToken,
}

impl<'db, H: ChoiceHandler> Resolver<'db, H> {
    pub fn new(db: &'db Database, handler: H) -> Self {
        Self {
            db,
            handler,
            formula: LogicFormula::new(),
            tables: TableStore::default(),
            vars: VarSource::default(),
            stack: Vec::new(),
            incomplete: Vec::new(),
            next_dfn: 0,
            iteration: 0,
            generation: 0,
            low_water: usize::MAX,
            occurs_check: false,
            cancel: CancellationToken::new(),
        }
    }

    /// Enable the occurs check in head and builtin unification.
    pub fn with_occurs_check(mut self, on: bool) -> Self {
        self.occurs_check = on;
        self
    }

    /// Abort table evaluation once `cancel` fires.
    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn formula(&self) -> &LogicFormula {
        &self.formula
    }

    pub fn formula_mut(&mut self) -> &mut LogicFormula {
        &mut self.formula
    }

    pub fn handler(&self) -> &H {
        &self.handler
    }

    pub fn handler_mut(&mut self) -> &mut H {
        &mut self.handler
    }

    pub fn into_parts(self) -> (LogicFormula, H) {
        (self.formula, self.handler)
    }

    pub fn stats(&self) -> TableStats {
        self.tables.stats()
    }

    /// All solutions of `goal`.
    ///
    /// Variables of `goal` are renamed apart first, so callers may use any
    /// numbering. Solutions with a FALSE formula are dropped.
    pub fn solve(&mut self, goal: &Term) -> GroundResult<Vec<Solution>> {
        let goal = rename(goal, &mut self.vars);
        let sols = self.solve_body(&Body::from_term(&goal), Substitution::new())?;
        Ok(sols
            .into_iter()
            .map(|(s, f)| Solution {
                term: s.resolve(&goal),
                formula: f,
            })
            .collect())
    }

    fn unify(&self, a: &Term, b: &Term, subst: &Substitution) -> Option<Substitution> {
        if self.occurs_check {
            unify_with_occurs_check(a, b, subst)
        } else {
            unify(a, b, subst)
        }
    }

    fn check_cancel(&self) -> GroundResult<()> {
        if self.cancel.is_cancelled() {
            return Err(GroundError::CompilationTimeout {
                stage: "grounding".into(),
            });
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Bodies
    // -----------------------------------------------------------------------

    fn solve_body(&mut self, body: &Body, subst: Substitution) -> GroundResult<Solutions> {
        match body {
            Body::True => Ok(vec![(subst, FormulaRef::True)]),
            Body::Goal(goal) => self.solve_goal(goal, subst),
            Body::And(a, b) => {
                let mut out = Vec::new();
                for (s1, f1) in self.solve_body(a, subst)? {
                    for (s2, f2) in self.solve_body(b, s1)? {
                        let f = self.formula.add_and(&[f1, f2]);
                        if f != FormulaRef::False {
                            out.push((s2, f));
                        }
                    }
                }
                Ok(out)
            }
            Body::Or(a, b) => {
                let mut out = self.solve_body(a, subst.clone())?;
                out.extend(self.solve_body(b, subst)?);
                Ok(out)
            }
            Body::Not(inner) => {
                let sols = self.solve_closed(inner, &subst)?;
                let refs: Vec<FormulaRef> = sols.iter().map(|(_, f)| *f).collect();
                let any = self.formula.add_or(&refs);
                let negated = self.formula.add_not(any);
                if negated == FormulaRef::False {
                    Ok(Vec::new())
                } else {
                    Ok(vec![(subst, negated)])
                }
            }
        }
    }

    /// Solve `body` to completion for negation and aggregation.
    ///
    /// The result must not depend on a table that is still being evaluated
    /// outside this call; otherwise the goal is part of a cycle through
    /// negation or aggregation.
    fn solve_closed(&mut self, body: &Body, subst: &Substitution) -> GroundResult<Solutions> {
        let boundary = self.next_dfn;
        let saved = std::mem::replace(&mut self.low_water, usize::MAX);
        let result = self.solve_body(body, subst.clone());
        let inner = self.low_water;
        self.low_water = saved.min(inner);
        let sols = result?;
        if inner < boundary {
            return Err(GroundError::CyclicNonConvergence {
                goal: subst.resolve(&body.to_term()).to_string(),
            });
        }
        Ok(sols)
    }

    fn solve_goal(&mut self, goal: &Term, subst: Substitution) -> GroundResult<Solutions> {
        let goal = subst.resolve(goal);
        if goal.is_var() {
            return Err(GroundError::Instantiation {
                goal: goal.to_string(),
            });
        }
        if !goal.is_callable() {
            return Err(GroundError::Type {
                expected: "callable".into(),
                found: goal.to_string(),
            });
        }
        if let Some(result) = self.builtin(&goal, &subst) {
            return result;
        }
        self.call_tabled(&goal, subst)
    }

    // -----------------------------------------------------------------------
    // Tabling
    // -----------------------------------------------------------------------

    fn call_tabled(&mut self, goal: &Term, subst: Substitution) -> GroundResult<Solutions> {
        let Some(indicator) = goal.indicator() else {
            return Ok(Vec::new());
        };
        // unknown(fail): undefined predicates have no answers.
        if !self.db.defines(&indicator) {
            return Ok(Vec::new());
        }
        let tid = self.tables.lookup_or_create(goal.canonical());
        match self.tables.get(tid).state {
            TableState::Complete => {}
            TableState::Active { dfn } => self.note_dependency(dfn),
            TableState::Incomplete { lowlink, stamp } if stamp == self.iteration => {
                self.note_dependency(lowlink)
            }
            TableState::Fresh | TableState::Incomplete { .. } => self.evaluate(tid)?,
        }
        self.consume(tid, goal, &subst)
    }

    fn note_dependency(&mut self, dfn: usize) {
        if let Some(top) = self.stack.last_mut() {
            top.lowlink = top.lowlink.min(dfn);
            if dfn <= top.dfn {
                top.cyclic = true;
            }
        }
        self.low_water = self.low_water.min(dfn);
    }

    fn consume(
        &mut self,
        tid: TableId,
        goal: &Term,
        subst: &Substitution,
    ) -> GroundResult<Solutions> {
        let complete = self.tables.get(tid).state == TableState::Complete;
        let answers = self.tables.get(tid).answers.clone();
        let mut out = Vec::with_capacity(answers.len());
        for answer in answers {
            let base = self.vars.reserve(answer.width as usize);
            let instance = answer.term.offset_vars(base);
            if let Some(s) = self.unify(goal, &instance, subst) {
                out.push((s, self.answer_ref(answer.node, complete)));
            }
        }
        Ok(out)
    }

    /// Reference handed to consumers of an answer. Definition nodes of
    /// complete tables are short-circuited when they hold TRUE or a single
    /// disjunct.
    fn answer_ref(&self, node: Option<NodeId>, complete: bool) -> FormulaRef {
        let Some(id) = node else {
            return FormulaRef::True;
        };
        if !complete {
            return FormulaRef::Node(id);
        }
        let children = self.formula.node(id).children();
        let is_true = |c: &NodeId| matches!(self.formula.node(*c), Node::And(v) if v.is_empty());
        if children.iter().any(is_true) {
            FormulaRef::True
        } else if children.len() == 1 {
            FormulaRef::Node(children[0])
        } else {
            FormulaRef::Node(id)
        }
    }

    fn evaluate(&mut self, tid: TableId) -> GroundResult<()> {
        self.check_cancel()?;
        let dfn = self.next_dfn;
        self.next_dfn += 1;
        self.stack.push(Frame {
            table: tid,
            dfn,
            lowlink: dfn,
            cyclic: false,
            incomplete_mark: self.incomplete.len(),
        });
        self.tables.get_mut(tid).state = TableState::Active { dfn };

        let key = self.tables.get(tid).goal.clone();
        let width = key.vars().len();
        let goal = key.offset_vars(self.vars.reserve(width));
        let clauses = match key.indicator() {
            Some(indicator) => self.db.lookup(&indicator),
            None => Vec::new(),
        };

        let mut passes = 0usize;
        loop {
            passes += 1;
            let generation = self.generation;
            if let Some(top) = self.stack.last_mut() {
                top.cyclic = false;
            }
            for cref in &clauses {
                self.resolve_clause(tid, &goal, cref)?;
            }
            let Some(top) = self.stack.last() else {
                break;
            };
            let leader = top.lowlink >= top.dfn;
            if leader && top.cyclic && self.generation != generation {
                self.iteration += 1;
                self.check_cancel()?;
                continue;
            }
            break;
        }

        let Some(frame) = self.stack.pop() else {
            return Ok(());
        };
        let tid = frame.table;
        if frame.lowlink < frame.dfn {
            self.tables.get_mut(tid).state = TableState::Incomplete {
                lowlink: frame.lowlink,
                stamp: self.iteration,
            };
            if !self.incomplete.contains(&tid) {
                self.incomplete.push(tid);
            }
            self.note_dependency(frame.lowlink);
        } else {
            self.tables.get_mut(tid).state = TableState::Complete;
            let members: Vec<TableId> = self.incomplete.drain(frame.incomplete_mark..).collect();
            for member in &members {
                self.tables.get_mut(*member).state = TableState::Complete;
            }
            tracing::trace!(
                goal = %key,
                answers = self.tables.get(tid).answers.len(),
                scc = members.len() + 1,
                passes,
                "table complete"
            );
        }
        Ok(())
    }

    fn resolve_clause(&mut self, tid: TableId, goal: &Term, cref: &ClauseRef) -> GroundResult<()> {
        let clause = cref.clause.clone();
        let offset = self.vars.reserve(clause.n_vars());
        let head = cref.head().offset_vars(offset);
        let Some(start) = self.unify(goal, &head, &Substitution::new()) else {
            return Ok(());
        };
        let body = clause.body().offset_vars(offset);
        for (s, f) in self.solve_body(&body, start)? {
            let f = if clause.is_probabilistic() {
                let choice = self.make_choice(&clause, cref.branch, offset, &s)?;
                let c = self.handler.choose(&mut self.formula, choice)?;
                self.formula.add_and(&[f, c])
            } else {
                f
            };
            if f == FormulaRef::False {
                continue;
            }
            let answer = s.resolve(goal);
            self.add_answer(tid, answer, f);
        }
        Ok(())
    }

    fn make_choice(
        &self,
        clause: &Clause,
        branch: usize,
        offset: u64,
        subst: &Substitution,
    ) -> GroundResult<Choice> {
        let mut grounding = Vec::with_capacity(clause.grounding_vars().len());
        for var in clause.grounding_vars() {
            let value = subst.resolve(&Term::Var(Var::new(var.get() + offset)));
            if !value.is_ground() {
                return Err(GroundError::NonGroundProbabilisticClause {
                    clause: clause.to_string(),
                    variable: clause.var_name(*var),
                });
            }
            grounding.push(value);
        }

        let (head, probability, group, group_weights) = match clause.head() {
            ClauseHead::Plain(h) => (h, Probability::Value(1.0), None, Vec::new()),
            ClauseHead::Probabilistic(h, p) => {
                (h, label_value(p, offset, subst)?, None, Vec::new())
            }
            ClauseHead::Annotated(branches) => {
                let (h, p) = &branches[branch];
                let weights = branches
                    .iter()
                    .map(|(_, p)| label_value(p, offset, subst).map(|p| p.default_weight()))
                    .collect::<GroundResult<Vec<f64>>>()?;
                let group = GroupKey {
                    clause: clause.id(),
                    grounding: grounding.clone(),
                };
                (h, label_value(p, offset, subst)?, Some(group), weights)
            }
        };
        Ok(Choice {
            key: ChoiceKey {
                clause: clause.id(),
                branch,
                grounding,
            },
            probability,
            label: subst.resolve(&head.offset_vars(offset)),
            group,
            group_weights,
        })
    }

    fn add_answer(&mut self, tid: TableId, answer: Term, f: FormulaRef) {
        let canonical = answer.canonical();
        let tracks = self.handler.tracks_nodes();
        let table = self.tables.get_mut(tid);
        if let Some(pos) = table.find(&canonical) {
            if let Some(node) = table.answers[pos].node {
                self.formula.add_disjunct(node, f);
            }
            return;
        }
        let node = if tracks {
            let node = self.formula.new_placeholder();
            self.formula.add_disjunct(node, f);
            Some(node)
        } else {
            None
        };
        table.push(canonical, node);
        self.generation += 1;
    }
}

/// Evaluate an expression label after the body has been proved.
fn label_value(p: &Probability, offset: u64, subst: &Substitution) -> GroundResult<Probability> {
    match p {
        Probability::Expr(e) => {
            let value = arith::eval(&e.offset_vars(offset), subst)?.as_f64();
            if !(0.0..=1.0).contains(&value) {
                return Err(GroundError::Type {
                    expected: "probability in [0, 1]".into(),
                    found: value.to_string(),
                });
            }
            Ok(Probability::Value(value))
        }
        other => Ok(other.clone()),
    }
}
