//! Forward sampling of possible worlds.
//!
//! The sampler runs the tabled resolver with a handler that decides every
//! probabilistic choice on the spot, so no formula is built. Draws are cached
//! per choice key (and per annotated-disjunction instance) for the duration
//! of one sample, which keeps repeated calls to the same ground fact
//! consistent.
//!
//! Evidence is enforced in one of two ways:
//!
//! - [`EvidenceMode::Reject`] throws a sample away whenever an evidence
//!   literal comes out wrong. The expected cost grows as `1 / P(evidence)`.
//! - [`EvidenceMode::Propagate`] grounds and compiles the evidence once, then
//!   draws the facts the evidence depends on from the conditioned circuit
//!   before resolution starts. Every emitted sample satisfies the evidence.
//!
//! The probability attached to a [`Sample`] is the prior weight of the
//! choices that were made, not the probability of the observed query values.

use std::collections::{BTreeMap, HashMap};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::cancel::CancellationToken;
use crate::clause::Probability;
use crate::cnf::VarInfo;
use crate::compile::compiler_for;
use crate::config::EngineConfig;
use crate::database::Database;
use crate::error::{EvalError, GroundError, GroundResult, SampleError, SampleResult};
use crate::evaluate::Evaluator;
use crate::formula::{ChoiceKey, FormulaRef, GroupKey, LogicFormula};
use crate::ground::{Grounder, normalize_evidence};
use crate::resolve::{Choice, ChoiceHandler, Resolver};
use crate::semiring::ProbabilitySemiring;
use crate::term::Term;

/// How the sampler makes samples agree with the evidence.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvidenceMode {
    /// Discard samples that contradict the evidence.
    #[default]
    Reject,
    /// Pre-draw the evidence-relevant facts from the conditioned distribution.
    Propagate,
}

/// One sampled world, restricted to what resolution touched.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Sample {
    /// Truth value of every query (every true answer of a non-ground query).
    #[serde(serialize_with = "crate::export::display_keys")]
    pub queries: BTreeMap<Term, bool>,
    /// Outcome of every probabilistic fact that was drawn.
    #[serde(serialize_with = "crate::export::display_keys")]
    pub facts: BTreeMap<Term, bool>,
    /// Prior probability of the choices made.
    pub probability: f64,
}

// ---------------------------------------------------------------------------
// Presets from evidence propagation
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
enum GroupPreset {
    /// This branch was chosen.
    Branch(usize),
    /// None of these branches was chosen; draw among the rest and the null
    /// outcome.
    Excluding(Vec<usize>),
}

#[derive(Debug, Clone, Default)]
struct Presets {
    facts: HashMap<ChoiceKey, bool>,
    groups: HashMap<GroupKey, GroupPreset>,
}

impl Presets {
    /// Draw the choices mentioned by `evaluator`'s circuit, conditioned on
    /// its evidence.
    fn draw(evaluator: &Evaluator, rng: &mut StdRng) -> SampleResult<Self> {
        let weights = evaluator.weights(&ProbabilitySemiring);
        let model = evaluator
            .circuit()
            .sample(&weights, rng)
            .ok_or_else(|| evaluator.contradiction())?;

        let mut presets = Presets::default();
        let mut excluded: HashMap<GroupKey, Vec<usize>> = HashMap::new();
        for lit in model {
            let info = evaluator.cnf().var_info(lit.unsigned_abs());
            let Some(VarInfo::Choice { key, group, .. }) = info else {
                continue;
            };
            match group {
                Some(g) if lit > 0 => {
                    presets.groups.insert(g.clone(), GroupPreset::Branch(key.branch));
                }
                Some(g) => excluded.entry(g.clone()).or_default().push(key.branch),
                None => {
                    presets.facts.insert(key.clone(), lit > 0);
                }
            }
        }
        for (g, branches) in excluded {
            presets.groups.entry(g).or_insert(GroupPreset::Excluding(branches));
        }
        Ok(presets)
    }
}

// ---------------------------------------------------------------------------
// Choice handler
// ---------------------------------------------------------------------------

/// Decides choices by drawing from their distribution.
struct SampleHandler<'s> {
    rng: &'s mut StdRng,
    presets: &'s Presets,
    decisions: &'s HashMap<Term, bool>,
    drawn: HashMap<ChoiceKey, bool>,
    /// Chosen branch per group; `None` is the null outcome.
    groups: HashMap<GroupKey, Option<usize>>,
    facts: BTreeMap<Term, bool>,
    probability: f64,
}

impl<'s> SampleHandler<'s> {
    fn new(rng: &'s mut StdRng, presets: &'s Presets, decisions: &'s HashMap<Term, bool>) -> Self {
        Self {
            rng,
            presets,
            decisions,
            drawn: HashMap::new(),
            groups: HashMap::new(),
            facts: BTreeMap::new(),
            probability: 1.0,
        }
    }

    fn draw_fact(&mut self, choice: &Choice) -> bool {
        if matches!(choice.probability, Probability::Decision) {
            return self.decisions.get(&choice.label).copied().unwrap_or(false);
        }
        let p = choice.probability.default_weight().clamp(0.0, 1.0);
        let value = match self.presets.facts.get(&choice.key) {
            Some(v) => *v,
            None => self.rng.gen_bool(p),
        };
        self.probability *= if value { p } else { 1.0 - p };
        value
    }

    fn draw_group(&mut self, group: &GroupKey, weights: &[f64]) -> Option<usize> {
        let null = (1.0 - weights.iter().sum::<f64>()).max(0.0);
        let presets = self.presets;
        let excluded: &[usize] = match presets.groups.get(group) {
            Some(GroupPreset::Branch(b)) => {
                self.probability *= weights.get(*b).copied().unwrap_or(0.0);
                return Some(*b);
            }
            Some(GroupPreset::Excluding(ex)) => ex,
            None => &[],
        };
        let open = |i: &usize| !excluded.contains(i);
        let total: f64 = null + (0..weights.len()).filter(open).map(|i| weights[i]).sum::<f64>();
        if total <= 0.0 {
            return None;
        }
        let mut r = self.rng.gen_range(0.0..1.0) * total;
        for i in (0..weights.len()).filter(open) {
            if r < weights[i] {
                self.probability *= weights[i];
                return Some(i);
            }
            r -= weights[i];
        }
        self.probability *= null;
        None
    }
}

impl ChoiceHandler for SampleHandler<'_> {
    fn choose(&mut self, _formula: &mut LogicFormula, choice: Choice) -> GroundResult<FormulaRef> {
        if let Some(v) = self.drawn.get(&choice.key) {
            return Ok(FormulaRef::from(*v));
        }
        let value = match &choice.group {
            Some(group) => {
                let picked = match self.groups.get(group) {
                    Some(picked) => *picked,
                    None => {
                        let picked = self.draw_group(group, &choice.group_weights);
                        self.groups.insert(group.clone(), picked);
                        picked
                    }
                };
                picked == Some(choice.key.branch)
            }
            None => self.draw_fact(&choice),
        };
        self.drawn.insert(choice.key, value);
        self.facts.insert(choice.label, value);
        Ok(FormulaRef::from(value))
    }

    fn tracks_nodes(&self) -> bool {
        false
    }
}

// ---------------------------------------------------------------------------
// Sample stream
// ---------------------------------------------------------------------------

/// An endless stream of samples. After an error the stream ends.
pub struct Samples<'db> {
    db: &'db Database,
    queries: Vec<Term>,
    evidence: Vec<(Term, bool)>,
    rng: StdRng,
    max_rejections: usize,
    occurs_check: bool,
    cancel: CancellationToken,
    propagation: Option<Evaluator>,
    decisions: HashMap<Term, bool>,
    failed: bool,
}

impl std::fmt::Debug for Samples<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Samples")
            .field("queries", &self.queries.len())
            .field("evidence", &self.evidence.len())
            .field("propagate", &self.propagation.is_some())
            .finish()
    }
}

impl<'db> Samples<'db> {
    /// Prepare a sampler. In propagation mode the evidence is grounded and
    /// compiled here.
    pub fn new(
        db: &'db Database,
        queries: &[Term],
        evidence: &[(Term, bool)],
        mode: EvidenceMode,
        config: &EngineConfig,
    ) -> SampleResult<Self> {
        Self::with_cancel(db, queries, evidence, mode, config, CancellationToken::new())
    }

    pub fn with_cancel(
        db: &'db Database,
        queries: &[Term],
        evidence: &[(Term, bool)],
        mode: EvidenceMode,
        config: &EngineConfig,
        cancel: CancellationToken,
    ) -> SampleResult<Self> {
        let evidence = normalize_evidence(evidence)?;
        let propagation = match mode {
            EvidenceMode::Reject => None,
            EvidenceMode::Propagate => {
                let formula = Grounder::new(db)
                    .with_config(config)
                    .with_cancel(cancel.clone())
                    .ground(&[], &evidence)?;
                let compiler = compiler_for(config.compiler);
                Some(Evaluator::new(&formula, compiler.as_ref(), &cancel)?)
            }
        };
        let rng = match config.sampling.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        tracing::debug!(
            queries = queries.len(),
            evidence = evidence.len(),
            mode = ?mode,
            seed = ?config.sampling.seed,
            "sampler ready"
        );
        Ok(Self {
            db,
            queries: queries.to_vec(),
            evidence,
            rng,
            max_rejections: config.sampling.max_rejections,
            occurs_check: config.occurs_check,
            cancel,
            propagation,
            decisions: HashMap::new(),
            failed: false,
        })
    }

    /// Fix a decision fact for all later samples. Unset decisions are false.
    pub fn set_decision(&mut self, label: Term, value: bool) {
        if let Some(evaluator) = &mut self.propagation {
            evaluator.set_decision(label.clone(), value);
        }
        self.decisions.insert(label, value);
    }

    fn draw(&mut self) -> SampleResult<Sample> {
        let mut rejected = 0usize;
        loop {
            if self.cancel.is_cancelled() {
                return Err(EvalError::EvaluationTimeout.into());
            }
            if let Some(sample) = self.attempt()? {
                tracing::trace!(probability = sample.probability, rejected, "sample drawn");
                return Ok(sample);
            }
            rejected += 1;
            tracing::trace!(rejected, "sample rejected");
            if rejected >= self.max_rejections {
                tracing::debug!(attempts = rejected, "rejection limit reached");
                return Err(SampleError::RejectionLimit { attempts: rejected });
            }
        }
    }

    /// One resolution pass. `None` when the evidence does not hold.
    fn attempt(&mut self) -> SampleResult<Option<Sample>> {
        let presets = match &self.propagation {
            Some(evaluator) => Presets::draw(evaluator, &mut self.rng)?,
            None => Presets::default(),
        };
        let handler = SampleHandler::new(&mut self.rng, &presets, &self.decisions);
        let mut resolver = Resolver::new(self.db, handler)
            .with_occurs_check(self.occurs_check)
            .with_cancel(self.cancel.clone());

        for (term, value) in &self.evidence {
            let holds = !resolver.solve(term)?.is_empty();
            if holds != *value {
                return Ok(None);
            }
        }

        let mut queries = BTreeMap::new();
        for query in &self.queries {
            let solutions = resolver.solve(query)?;
            if query.is_ground() {
                queries.insert(query.clone(), !solutions.is_empty());
                continue;
            }
            for sol in solutions {
                if !sol.term.is_ground() {
                    return Err(GroundError::NonGroundQuery {
                        query: query.to_string(),
                        answer: sol.term.to_string(),
                    }
                    .into());
                }
                queries.insert(sol.term, true);
            }
        }

        let (_, handler) = resolver.into_parts();
        Ok(Some(Sample {
            queries,
            facts: handler.facts,
            probability: handler.probability,
        }))
    }
}

impl Iterator for Samples<'_> {
    type Item = SampleResult<Sample>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        let result = self.draw();
        self.failed = result.is_err();
        Some(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clause::{ClauseBuilder, prob_fact, rule};

    fn coins() -> Database {
        Database::load(vec![
            prob_fact(0.5, "heads1").unwrap(),
            prob_fact(0.6, "heads2").unwrap(),
            rule("someHeads", &["heads1"]).unwrap(),
            rule("someHeads", &["heads2"]).unwrap(),
        ])
    }

    fn config(seed: u64, max_rejections: usize) -> EngineConfig {
        let mut config = EngineConfig::default();
        config.sampling.seed = Some(seed);
        config.sampling.max_rejections = max_rejections;
        config
    }

    fn atoms(names: &[&str]) -> Vec<Term> {
        names.iter().map(|n| Term::atom(*n)).collect()
    }

    fn frequency(samples: &[Sample], query: &str) -> f64 {
        let hits = samples.iter().filter(|s| s.queries[&Term::atom(query)]).count();
        hits as f64 / samples.len() as f64
    }

    #[test]
    fn same_seed_same_samples() {
        let db = coins();
        let q = atoms(&["someHeads"]);
        let a: Vec<Sample> = Samples::new(&db, &q, &[], EvidenceMode::Reject, &config(3, 10))
            .unwrap()
            .take(20)
            .collect::<SampleResult<_>>()
            .unwrap();
        let b: Vec<Sample> = Samples::new(&db, &q, &[], EvidenceMode::Reject, &config(3, 10))
            .unwrap()
            .take(20)
            .collect::<SampleResult<_>>()
            .unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn probability_is_product_of_choices() {
        let db = coins();
        let queries = atoms(&["someHeads"]);
        let samples =
            Samples::new(&db, &queries, &[], EvidenceMode::Reject, &config(1, 10)).unwrap();
        for sample in samples.take(10) {
            let sample = sample.unwrap();
            let h1 = sample.facts[&Term::atom("heads1")];
            let h2 = sample.facts[&Term::atom("heads2")];
            let expected = 0.5 * if h2 { 0.6 } else { 0.4 };
            assert!((sample.probability - expected).abs() < 1e-12);
            assert_eq!(sample.queries[&Term::atom("someHeads")], h1 || h2);
        }
    }

    fn conditioned(mode: EvidenceMode) -> Vec<Sample> {
        let db = coins();
        let evidence = vec![(Term::atom("someHeads"), true)];
        Samples::new(&db, &atoms(&["heads1", "someHeads"]), &evidence, mode, &config(11, 1000))
            .unwrap()
            .take(4000)
            .collect::<SampleResult<_>>()
            .unwrap()
    }

    #[test]
    fn rejection_respects_evidence() {
        let samples = conditioned(EvidenceMode::Reject);
        assert!(samples.iter().all(|s| s.queries[&Term::atom("someHeads")]));
        assert!((frequency(&samples, "heads1") - 0.625).abs() < 0.05);
    }

    #[test]
    fn propagation_respects_evidence() {
        let samples = conditioned(EvidenceMode::Propagate);
        assert!(samples.iter().all(|s| s.queries[&Term::atom("someHeads")]));
        assert!((frequency(&samples, "heads1") - 0.625).abs() < 0.05);
    }

    #[test]
    fn impossible_evidence_hits_the_limit() {
        let db = coins();
        let evidence = vec![(Term::atom("tails"), true)];
        let mut samples =
            Samples::new(&db, &[], &evidence, EvidenceMode::Reject, &config(0, 25)).unwrap();
        assert!(matches!(
            samples.next(),
            Some(Err(SampleError::RejectionLimit { attempts: 25 }))
        ));
        assert!(samples.next().is_none());
    }

    #[test]
    fn impossible_evidence_under_propagation() {
        let db = coins();
        let evidence = vec![(Term::atom("tails"), true)];
        let mut samples =
            Samples::new(&db, &[], &evidence, EvidenceMode::Propagate, &config(0, 25)).unwrap();
        assert!(matches!(
            samples.next(),
            Some(Err(SampleError::Eval(EvalError::ContradictoryEvidence { .. })))
        ));
    }

    #[test]
    fn annotated_disjunction_draws_one_branch() {
        let db = Database::load(vec![
            ClauseBuilder::new("red").probability(0.3).or_head(0.5, "green").build().unwrap(),
        ]);
        let queries = atoms(&["red", "green"]);
        let mode = EvidenceMode::Reject;
        let samples: Vec<Sample> = Samples::new(&db, &queries, &[], mode, &config(5, 10))
            .unwrap()
            .take(500)
            .collect::<SampleResult<_>>()
            .unwrap();
        assert!(samples
            .iter()
            .all(|s| !(s.queries[&Term::atom("red")] && s.queries[&Term::atom("green")])));
        assert!(samples.iter().any(|s| s.queries[&Term::atom("red")]));
        assert!(samples.iter().any(|s| s.queries[&Term::atom("green")]));
    }

    #[test]
    fn propagation_conditions_annotated_disjunctions() {
        let db = Database::load(vec![
            ClauseBuilder::new("red").probability(0.3).or_head(0.5, "green").build().unwrap(),
        ]);
        let evidence = vec![(Term::atom("red"), false)];
        let queries = atoms(&["green"]);
        let mode = EvidenceMode::Propagate;
        let samples: Vec<Sample> = Samples::new(&db, &queries, &evidence, mode, &config(9, 10))
            .unwrap()
            .take(3000)
            .collect::<SampleResult<_>>()
            .unwrap();
        // P(green | not red) = 0.5 / 0.7
        assert!((frequency(&samples, "green") - 0.5 / 0.7).abs() < 0.05);
    }
}
