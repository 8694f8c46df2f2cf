//! Engine facade: top-level API for probalog.
//!
//! The `Engine` owns a clause database and a validated configuration and
//! wires the pipeline together: grounding, cycle breaking, compilation and
//! evaluation, or sampling.

use std::time::Duration;

use crate::cancel::CancellationToken;
use crate::clause::{Body, Clause, ClauseHead, Probability};
use crate::compile::{KnowledgeCompiler, compiler_for};
use crate::config::EngineConfig;
use crate::database::Database;
use crate::error::ProbalogResult;
use crate::evaluate::{Evaluator, Explanation};
use crate::formula::LogicFormula;
use crate::ground::Grounder;
use crate::sample::{EvidenceMode, Samples};
use crate::semiring::Semiring;
use crate::term::Term;

/// The probalog inference engine.
#[derive(Debug, Clone)]
pub struct Engine {
    config: EngineConfig,
    db: Database,
}

impl Engine {
    /// Create an engine with an empty database.
    pub fn new(config: EngineConfig) -> ProbalogResult<Self> {
        Self::with_database(config, Database::new())
    }

    /// Create an engine over an existing database.
    pub fn with_database(config: EngineConfig, db: Database) -> ProbalogResult<Self> {
        config.validate()?;
        tracing::info!(
            compiler = %config.compiler,
            occurs_check = config.occurs_check,
            timeout_secs = ?config.timeout_secs,
            clauses = db.len(),
            "initializing probalog engine"
        );
        Ok(Self { config, db })
    }

    /// Add clauses to the database. Returns how many were added.
    pub fn load(&mut self, clauses: impl IntoIterator<Item = Clause>) -> usize {
        let before = self.db.len();
        for clause in clauses {
            self.db.assert(clause);
        }
        self.db.len() - before
    }

    /// Add canonical-notation clauses, one per line.
    pub fn load_str(&mut self, src: &str) -> ProbalogResult<usize> {
        let parsed = Database::load_str(src)?;
        let clauses: Vec<Clause> = parsed.clauses().iter().map(|c| Clause::clone(c)).collect();
        Ok(self.load(clauses))
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    pub fn database_mut(&mut self) -> &mut Database {
        &mut self.db
    }

    /// Get the engine configuration.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// A fresh token bounding one grounding and compilation pass.
    fn cancel_token(&self) -> CancellationToken {
        match self.config.timeout_secs.and_then(|t| Duration::try_from_secs_f64(t).ok()) {
            Some(timeout) => CancellationToken::with_timeout(timeout),
            None => CancellationToken::new(),
        }
    }

    fn compiler(&self) -> Box<dyn KnowledgeCompiler> {
        compiler_for(self.config.compiler)
    }

    fn grounder(&self, cancel: &CancellationToken) -> Grounder<'_> {
        Grounder::new(&self.db)
            .with_config(&self.config)
            .with_cancel(cancel.clone())
    }

    // -----------------------------------------------------------------------
    // Grounding
    // -----------------------------------------------------------------------

    /// Ground `queries` and `evidence` into a formula.
    pub fn ground(
        &self,
        queries: &[Term],
        evidence: &[(Term, bool)],
    ) -> ProbalogResult<LogicFormula> {
        Ok(self.grounder(&self.cancel_token()).ground(queries, evidence)?)
    }

    /// Ground the `query/1` and `evidence/1,2` declarations of the database.
    pub fn ground_declared(&self) -> ProbalogResult<LogicFormula> {
        Ok(self.grounder(&self.cancel_token()).ground_declared()?)
    }

    // -----------------------------------------------------------------------
    // Exact inference
    // -----------------------------------------------------------------------

    /// Ground and compile once, for repeated evaluation.
    pub fn evaluator(
        &self,
        queries: &[Term],
        evidence: &[(Term, bool)],
    ) -> ProbalogResult<Evaluator> {
        let cancel = self.cancel_token();
        let formula = self.grounder(&cancel).ground(queries, evidence)?;
        let compiler = self.compiler();
        Ok(Evaluator::new(&formula, compiler.as_ref(), &cancel)?)
    }

    /// Marginal probability of every query given the evidence.
    pub fn query(
        &self,
        queries: &[Term],
        evidence: &[(Term, bool)],
    ) -> ProbalogResult<Vec<(Term, f64)>> {
        Ok(self.evaluator(queries, evidence)?.probabilities()?)
    }

    /// Evaluate the queries under any semiring.
    pub fn query_with<S: Semiring>(
        &self,
        semiring: &S,
        queries: &[Term],
        evidence: &[(Term, bool)],
    ) -> ProbalogResult<Vec<(Term, S::Value)>> {
        Ok(self.evaluator(queries, evidence)?.evaluate(semiring)?)
    }

    /// Marginals of the queries declared in the database.
    pub fn query_declared(&self) -> ProbalogResult<Vec<(Term, f64)>> {
        let cancel = self.cancel_token();
        let (queries, evidence) = self.grounder(&cancel).declared()?;
        self.query(&queries, &evidence)
    }

    /// The most probable assignment of the probabilistic facts that bear on
    /// the evidence.
    pub fn mpe(&self, evidence: &[(Term, bool)]) -> ProbalogResult<Explanation> {
        Ok(self.evaluator(&[], evidence)?.most_probable_explanation()?)
    }

    /// Posterior of every ground probabilistic fact given the evidence,
    /// most likely first.
    pub fn likely_causes(&self, evidence: &[(Term, bool)]) -> ProbalogResult<Vec<(Term, f64)>> {
        let mut candidates: Vec<Term> = Vec::new();
        for clause in self.db.clauses() {
            let (ClauseHead::Probabilistic(head, p), Body::True) = (clause.head(), clause.body())
            else {
                continue;
            };
            let decision = matches!(p, Probability::Decision);
            if head.is_ground() && !decision && !candidates.contains(head) {
                candidates.push(head.clone());
            }
        }
        let mut causes = self.query(&candidates, evidence)?;
        causes.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        tracing::debug!(candidates = causes.len(), "likely causes ranked");
        Ok(causes)
    }

    // -----------------------------------------------------------------------
    // Sampling
    // -----------------------------------------------------------------------

    /// A stream of sampled worlds, seeded from the configuration.
    ///
    /// `timeout_secs` bounds the whole stream, including the evidence
    /// compilation of propagation mode.
    pub fn sample(
        &self,
        queries: &[Term],
        evidence: &[(Term, bool)],
        mode: EvidenceMode,
    ) -> ProbalogResult<Samples<'_>> {
        let cancel = self.cancel_token();
        Ok(Samples::with_cancel(
            &self.db,
            queries,
            evidence,
            mode,
            &self.config,
            cancel,
        )?)
    }

    /// Summary information about the engine state.
    pub fn info(&self) -> EngineInfo {
        EngineInfo {
            clauses: self.db.len(),
            predicates: self.db.predicates().len(),
            compiler: self.config.compiler.to_string(),
            occurs_check: self.config.occurs_check,
        }
    }
}

/// Summary information about the engine state.
#[derive(Debug, Clone)]
pub struct EngineInfo {
    pub clauses: usize,
    pub predicates: usize,
    pub compiler: String,
    pub occurs_check: bool,
}

impl std::fmt::Display for EngineInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "probalog engine info")?;
        writeln!(f, "  clauses:      {}", self.clauses)?;
        writeln!(f, "  predicates:   {}", self.predicates)?;
        writeln!(f, "  compiler:     {}", self.compiler)?;
        writeln!(f, "  occurs check: {}", self.occurs_check)?;
        Ok(())
    }
}
