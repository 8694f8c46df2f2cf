//! Grounder: drives tabled resolution for every query and evidence literal
//! and collects the results into one [`LogicFormula`].

use std::collections::{HashMap, HashSet};

use crate::cancel::CancellationToken;
use crate::config::EngineConfig;
use crate::database::Database;
use crate::error::{GroundError, GroundResult};
use crate::formula::{FormulaRef, LogicFormula};
use crate::resolve::{FormulaBuilder, Resolver, Solution};
use crate::term::{Term, Var};

/// Grounds queries and evidence against one database.
///
/// Each call to [`ground`](Self::ground) uses its own tabling cache, so two
/// calls with the same arguments produce identical formulas.
#[derive(Debug, Clone)]
pub struct Grounder<'db> {
    db: &'db Database,
    occurs_check: bool,
    cancel: CancellationToken,
}

impl<'db> Grounder<'db> {
    pub fn new(db: &'db Database) -> Self {
        Self {
            db,
            occurs_check: false,
            cancel: CancellationToken::new(),
        }
    }

    /// Take resolution options from `config`.
    pub fn with_config(mut self, config: &EngineConfig) -> Self {
        self.occurs_check = config.occurs_check;
        self
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    fn resolver(&self) -> Resolver<'db, FormulaBuilder> {
        Resolver::new(self.db, FormulaBuilder)
            .with_occurs_check(self.occurs_check)
            .with_cancel(self.cancel.clone())
    }

    fn check_cancel(&self) -> GroundResult<()> {
        if self.cancel.is_cancelled() {
            return Err(GroundError::CompilationTimeout {
                stage: "grounding".into(),
            });
        }
        Ok(())
    }

    /// Ground `queries` and `evidence` into one formula.
    ///
    /// Evidence is grounded first. Non-ground queries expand to one query per
    /// ground answer; a ground query without answers maps to FALSE. Evidence
    /// written as `\+ t` is stored as `t` with the opposite value.
    pub fn ground(
        &self,
        queries: &[Term],
        evidence: &[(Term, bool)],
    ) -> GroundResult<LogicFormula> {
        let evidence = normalize_evidence(evidence)?;
        let mut resolver = self.resolver();

        for (term, value) in &evidence {
            self.check_cancel()?;
            for (answer, root) in ground_literal(&mut resolver, term)? {
                resolver.formula_mut().add_evidence(answer, root, *value);
            }
        }

        let mut seen = HashSet::new();
        for query in queries {
            self.check_cancel()?;
            for (answer, root) in ground_literal(&mut resolver, query)? {
                if seen.insert(answer.clone()) {
                    tracing::trace!(query = %answer, root = %root, "query grounded");
                    resolver.formula_mut().add_query(answer, root);
                }
            }
        }

        let stats = resolver.stats();
        let (formula, _) = resolver.into_parts();
        tracing::debug!(
            queries = formula.queries().len(),
            evidence = formula.evidence().len(),
            nodes = formula.len(),
            atoms = formula.atoms().count(),
            tables = stats.tables,
            answers = stats.answers,
            "grounding finished"
        );
        Ok(formula)
    }

    /// Queries and evidence declared in the database through `query/1`,
    /// `evidence/1` and `evidence/2`.
    pub fn declared(&self) -> GroundResult<(Vec<Term>, Vec<(Term, bool)>)> {
        let mut resolver = self.resolver();
        let x = Term::Var(Var::new(0));
        let y = Term::Var(Var::new(1));

        let queries = first_args(resolver.solve(&Term::compound("query", vec![x.clone()]))?);
        let mut evidence: Vec<(Term, bool)> =
            first_args(resolver.solve(&Term::compound("evidence", vec![x.clone()]))?)
                .into_iter()
                .map(|t| (t, true))
                .collect();
        for sol in resolver.solve(&Term::compound("evidence", vec![x, y]))? {
            let args = sol.term.args();
            let value = if args[1].is_atom("true") {
                true
            } else if args[1].is_atom("false") {
                false
            } else {
                return Err(GroundError::Type {
                    expected: "true or false".into(),
                    found: args[1].to_string(),
                });
            };
            evidence.push((args[0].clone(), value));
        }
        Ok((queries, evidence))
    }

    /// Ground the queries and evidence declared in the database.
    pub fn ground_declared(&self) -> GroundResult<LogicFormula> {
        let (queries, evidence) = self.declared()?;
        self.ground(&queries, &evidence)
    }
}

fn first_args(solutions: Vec<Solution>) -> Vec<Term> {
    solutions.into_iter().map(|s| s.term.args()[0].clone()).collect()
}

/// Unwrap negated evidence and reject contradictory pairs. Duplicates are
/// dropped; order of first occurrence is kept.
pub(crate) fn normalize_evidence(evidence: &[(Term, bool)]) -> GroundResult<Vec<(Term, bool)>> {
    let mut values: HashMap<Term, bool> = HashMap::new();
    let mut out = Vec::new();
    for (term, value) in evidence {
        let (mut term, mut value) = (term.clone(), *value);
        while term.has_functor("\\+", 1) || term.has_functor("not", 1) {
            term = term.args()[0].clone();
            value = !value;
        }
        match values.get(&term) {
            Some(v) if *v != value => {
                return Err(GroundError::ConflictingEvidence {
                    term: term.to_string(),
                });
            }
            Some(_) => {}
            None => {
                values.insert(term.clone(), value);
                out.push((term, value));
            }
        }
    }
    Ok(out)
}

/// Ground answers of `literal`, each with the disjunction of its proofs.
fn ground_literal(
    resolver: &mut Resolver<'_, FormulaBuilder>,
    literal: &Term,
) -> GroundResult<Vec<(Term, FormulaRef)>> {
    let solutions = resolver.solve(literal)?;
    let mut order: Vec<Term> = Vec::new();
    let mut proofs: HashMap<Term, Vec<FormulaRef>> = HashMap::new();
    for sol in solutions {
        if !sol.term.is_ground() {
            return Err(GroundError::NonGroundQuery {
                query: literal.to_string(),
                answer: sol.term.to_string(),
            });
        }
        let entry = proofs.entry(sol.term.clone()).or_default();
        if entry.is_empty() {
            order.push(sol.term);
        }
        entry.push(sol.formula);
    }
    if order.is_empty() && literal.is_ground() {
        return Ok(vec![(literal.clone(), FormulaRef::False)]);
    }
    let formula = resolver.formula_mut();
    Ok(order
        .into_iter()
        .map(|term| {
            let refs = proofs.remove(&term).unwrap_or_default();
            let root = formula.add_or(&refs);
            (term, root)
        })
        .collect())
}
