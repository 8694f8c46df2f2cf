//! Weighted model counting over a compiled formula.
//!
//! An [`Evaluator`] breaks cycles, encodes the formula as CNF and compiles it
//! once. Every query is then a bottom-up pass over the same circuit with the
//! query's negative literal weighted zero, normalized by the evidence mass.

use std::collections::{BTreeMap, HashMap};

use rayon::prelude::*;
use serde::Serialize;

use crate::cancel::CancellationToken;
use crate::cnf::{Cnf, CnfRoot, VarInfo};
use crate::compile::{Circuit, KnowledgeCompiler, LiteralWeights};
use crate::cycles;
use crate::error::{EvalError, EvalResult};
use crate::formula::LogicFormula;
use crate::semiring::{MaxProductSemiring, ProbabilitySemiring, Semiring};
use crate::term::Term;

/// The most probable assignment to the probabilistic choices.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Explanation {
    /// Joint weight of the assignment together with the evidence.
    pub probability: f64,
    /// Truth value of every choice relevant to the roots.
    #[serde(serialize_with = "crate::export::display_keys")]
    pub facts: BTreeMap<Term, bool>,
}

/// A formula compiled for repeated evaluation.
#[derive(Debug, Clone)]
pub struct Evaluator {
    cnf: Cnf,
    circuit: Circuit,
    decisions: HashMap<Term, bool>,
    cancel: CancellationToken,
}

impl Evaluator {
    /// Break cycles, encode and compile `formula`.
    pub fn new(
        formula: &LogicFormula,
        compiler: &dyn KnowledgeCompiler,
        cancel: &CancellationToken,
    ) -> EvalResult<Self> {
        let acyclic = cycles::break_cycles(formula, cancel)?;
        let cnf = Cnf::from_formula(&acyclic)?;
        let circuit = compiler.compile(&cnf, cancel)?;
        Ok(Self {
            cnf,
            circuit,
            decisions: HashMap::new(),
            cancel: cancel.clone(),
        })
    }

    pub fn cnf(&self) -> &Cnf {
        &self.cnf
    }

    pub fn circuit(&self) -> &Circuit {
        &self.circuit
    }

    /// Fix the decision fact labelled `label`. Unset decisions are false.
    pub fn set_decision(&mut self, label: Term, value: bool) {
        self.decisions.insert(label, value);
    }

    pub(crate) fn weights<S: Semiring>(&self, semiring: &S) -> LiteralWeights<S::Value> {
        self.cnf.weights(semiring, &self.decisions)
    }

    fn check_cancel(&self) -> EvalResult<()> {
        if self.cancel.is_cancelled() {
            return Err(EvalError::EvaluationTimeout);
        }
        Ok(())
    }

    pub(crate) fn contradiction(&self) -> EvalError {
        let terms: Vec<String> = self
            .cnf
            .evidence()
            .iter()
            .map(|(t, _, v)| if *v { t.to_string() } else { format!("\\+{t}") })
            .collect();
        EvalError::ContradictoryEvidence {
            evidence: terms.join(", "),
        }
    }

    /// Value of every query under `semiring`, conditioned on the evidence.
    ///
    /// Queries are counted in parallel against the shared circuit.
    pub fn evaluate<S: Semiring>(&self, semiring: &S) -> EvalResult<Vec<(Term, S::Value)>> {
        self.check_cancel()?;
        let weights = self.weights(semiring);
        let z = self.circuit.evaluate(semiring, &weights);
        if semiring.is_zero(&z) {
            return Err(self.contradiction());
        }
        let results: Vec<(Term, S::Value)> = self
            .cnf
            .queries()
            .par_iter()
            .map(|(term, root)| {
                let value = match root {
                    CnfRoot::True => semiring.normalize(&z, &z),
                    CnfRoot::False => semiring.zero(),
                    CnfRoot::Literal(l) => {
                        let mut w = weights.clone();
                        w.set(-l, semiring.zero());
                        let joint = self.circuit.evaluate(semiring, &w);
                        semiring.normalize(&joint, &z)
                    }
                };
                (term.clone(), value)
            })
            .collect();
        self.check_cancel()?;
        tracing::debug!(queries = results.len(), nodes = self.circuit.len(), "formula evaluated");
        Ok(results)
    }

    /// Marginal probability of every query given the evidence.
    pub fn probabilities(&self) -> EvalResult<Vec<(Term, f64)>> {
        self.evaluate(&ProbabilitySemiring)
    }

    /// Probability of the evidence (1 without evidence).
    pub fn evidence_probability(&self) -> f64 {
        let weights = self.weights(&ProbabilitySemiring);
        self.circuit.evaluate(&ProbabilitySemiring, &weights)
    }

    /// The most probable explanation of the evidence.
    pub fn most_probable_explanation(&self) -> EvalResult<Explanation> {
        self.check_cancel()?;
        let weights = self.weights(&MaxProductSemiring);
        let Some((probability, model)) = self.circuit.max_assignment(&weights) else {
            return Err(self.contradiction());
        };
        let facts = model
            .into_iter()
            .filter_map(|l| match self.cnf.var_info(l.unsigned_abs()) {
                Some(VarInfo::Choice { label, .. }) => Some((label.clone(), l > 0)),
                _ => None,
            })
            .collect();
        Ok(Explanation { probability, facts })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clause::{ClauseBuilder, prob_fact, rule};
    use crate::compile::{DecisionDnnfCompiler, DecisionTreeCompiler};
    use crate::database::Database;
    use crate::ground::Grounder;
    use crate::semiring::{LogProbabilitySemiring, SymbolicSemiring};

    fn coins() -> Database {
        Database::load(vec![
            prob_fact(0.5, "heads1").unwrap(),
            prob_fact(0.6, "heads2").unwrap(),
            rule("someHeads", &["heads1"]).unwrap(),
            rule("someHeads", &["heads2"]).unwrap(),
        ])
    }

    fn evaluator(db: &Database, queries: &[&str], evidence: &[(&str, bool)]) -> Evaluator {
        let queries: Vec<Term> = queries.iter().map(|q| Term::atom(*q)).collect();
        let evidence: Vec<(Term, bool)> =
            evidence.iter().map(|(e, v)| (Term::atom(*e), *v)).collect();
        let formula = Grounder::new(db).ground(&queries, &evidence).unwrap();
        Evaluator::new(&formula, &DecisionDnnfCompiler, &CancellationToken::new()).unwrap()
    }

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn marginal_of_disjunction() {
        let db = coins();
        let ev = evaluator(&db, &["someHeads", "heads1", "nothing"], &[]);
        let probs = ev.probabilities().unwrap();
        assert!(close(probs[0].1, 0.8));
        assert!(close(probs[1].1, 0.5));
        assert_eq!(probs[2].1, 0.0);
        assert!(close(ev.evidence_probability(), 1.0));
    }

    #[test]
    fn conditioning_on_evidence() {
        let db = coins();
        let ev = evaluator(&db, &["heads1"], &[("someHeads", true)]);
        let probs = ev.probabilities().unwrap();
        assert!(close(probs[0].1, 0.5 / 0.8));
        assert!(close(ev.evidence_probability(), 0.8));
    }

    #[test]
    fn impossible_evidence_is_reported() {
        let db = coins();
        let ev = evaluator(&db, &["heads1"], &[("tails", true)]);
        assert!(matches!(
            ev.probabilities(),
            Err(EvalError::ContradictoryEvidence { .. })
        ));
    }

    #[test]
    fn semirings_share_one_circuit() {
        let db = coins();
        let ev = evaluator(&db, &["someHeads"], &[]);
        let log = ev.evaluate(&LogProbabilitySemiring).unwrap();
        assert!(close(LogProbabilitySemiring::to_probability(log[0].1), 0.8));
        let sym = ev.evaluate(&SymbolicSemiring).unwrap();
        assert!(sym[0].1.to_string().contains("0.5"));
    }

    #[test]
    fn backends_agree() {
        let db = coins();
        let queries = vec![Term::atom("someHeads")];
        let formula = Grounder::new(&db).ground(&queries, &[]).unwrap();
        let cancel = CancellationToken::new();
        let a = Evaluator::new(&formula, &DecisionDnnfCompiler, &cancel).unwrap();
        let b = Evaluator::new(&formula, &DecisionTreeCompiler, &cancel).unwrap();
        assert!(close(a.probabilities().unwrap()[0].1, b.probabilities().unwrap()[0].1));
    }

    #[test]
    fn annotated_disjunction_branches_exclude() {
        let db = Database::load(vec![
            ClauseBuilder::new("red").probability(0.3).or_head(0.5, "green").build().unwrap(),
            rule("both", &["red", "green"]).unwrap(),
        ]);
        let ev = evaluator(&db, &["red", "green", "both"], &[]);
        let probs = ev.probabilities().unwrap();
        assert!(close(probs[0].1, 0.3));
        assert!(close(probs[1].1, 0.5));
        assert_eq!(probs[2].1, 0.0);
    }

    #[test]
    fn decisions_default_to_false() {
        let db = Database::load(vec![
            ClauseBuilder::new("act").probability_term("?").build().unwrap(),
            prob_fact(0.4, "luck").unwrap(),
            rule("win", &["act", "luck"]).unwrap(),
        ]);
        let mut ev = evaluator(&db, &["win"], &[]);
        assert_eq!(ev.probabilities().unwrap()[0].1, 0.0);
        ev.set_decision(Term::atom("act"), true);
        assert!(close(ev.probabilities().unwrap()[0].1, 0.4));
    }

    #[test]
    fn mpe_picks_best_world() {
        let db = Database::load(vec![
            prob_fact(0.7, "a").unwrap(),
            prob_fact(0.6, "b").unwrap(),
            rule("e", &["a"]).unwrap(),
            rule("e", &["b"]).unwrap(),
        ]);
        let ev = evaluator(&db, &[], &[("e", true)]);
        let mpe = ev.most_probable_explanation().unwrap();
        assert!(close(mpe.probability, 0.42));
        assert_eq!(mpe.facts[&Term::atom("a")], true);
        assert_eq!(mpe.facts[&Term::atom("b")], true);

        let ev = evaluator(&db, &[], &[("e", false)]);
        let mpe = ev.most_probable_explanation().unwrap();
        assert!(close(mpe.probability, 0.12));
        assert_eq!(mpe.facts[&Term::atom("a")], false);
    }
}
