// thiserror's #[error("...{field}...")] format strings reference struct fields,
// but the compiler doesn't see through the derive macro and reports false positives.
#![allow(unused_assignments)]

//! # probalog
//!
//! A probabilistic logic programming engine: Prolog-style clauses extended
//! with probabilistic facts, annotated disjunctions, queries and evidence.
//!
//! ## Architecture
//!
//! - **Terms and clauses** (`term`, `clause`, `database`): terms, clause
//!   bodies, probability labels and an overlay-capable clause store
//! - **Tabled resolution** (`resolve`): SLG-style tabling that terminates on
//!   cyclic programs and records proofs as formula nodes
//! - **Grounding** (`ground`, `formula`): queries and evidence become roots of
//!   one shared weighted Boolean formula
//! - **Cycle breaking** (`cycles`): least-model unfolding of cyclic proofs
//! - **Compilation** (`cnf`, `compile`): Tseitin CNF, then a smooth
//!   deterministic decomposable circuit
//! - **Evaluation** (`evaluate`, `semiring`): weighted model counting under a
//!   pluggable semiring, MPE and abduction
//! - **Sampling** (`sample`): forward sampling with rejection or propagation
//!
//! ## Library usage
//!
//! ```no_run
//! use probalog::engine::Engine;
//! use probalog::config::EngineConfig;
//! use probalog::term::Term;
//!
//! let mut engine = Engine::new(EngineConfig::default()).unwrap();
//! engine
//!     .load_str(
//!         "'::'(0.5, heads1).\n'::'(0.6, heads2).\n\
//!          ':-'(someHeads, heads1).\n':-'(someHeads, heads2).",
//!     )
//!     .unwrap();
//! let probs = engine.query(&[Term::atom("someHeads")], &[]).unwrap();
//! assert!((probs[0].1 - 0.8).abs() < 1e-9);
//! ```

pub mod cancel;
pub mod clause;
pub mod cnf;
pub mod compile;
pub mod config;
pub mod cycles;
pub mod database;
pub mod engine;
pub mod error;
pub mod evaluate;
pub mod export;
pub mod formula;
pub mod ground;
pub mod resolve;
pub mod sample;
pub mod semiring;
pub mod term;

pub use cancel::CancellationToken;
pub use clause::{Clause, ClauseBuilder, Probability};
pub use config::{CompilerBackend, EngineConfig};
pub use database::Database;
pub use engine::Engine;
pub use error::{ProbalogError, ProbalogResult};
pub use evaluate::{Evaluator, Explanation};
pub use formula::LogicFormula;
pub use sample::{EvidenceMode, Sample, Samples};
pub use term::Term;
