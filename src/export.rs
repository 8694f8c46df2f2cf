//! Export types for serializing inference results.
//!
//! Terms are rendered with their `Display` form so the JSON is readable
//! without the engine's own term model.

use std::collections::BTreeMap;

use serde::ser::Serializer;
use serde::{Deserialize, Serialize};

use crate::evaluate::Explanation;
use crate::sample::Sample;
use crate::term::Term;

/// Serialize a term-keyed map with the terms printed as strings.
pub(crate) fn display_keys<S: Serializer>(
    map: &BTreeMap<Term, bool>,
    ser: S,
) -> Result<S::Ok, S::Error> {
    ser.collect_map(map.iter().map(|(k, v)| (k.to_string(), *v)))
}

/// One query with its marginal probability.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProbabilityExport {
    /// Ground query term.
    pub query: String,
    /// Probability conditioned on the evidence.
    pub probability: f64,
}

/// One evidence literal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvidenceExport {
    /// Ground evidence term.
    pub term: String,
    /// Observed truth value.
    pub value: bool,
}

/// The answer to a probabilistic query, with the evidence it was
/// conditioned on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryReport {
    pub evidence: Vec<EvidenceExport>,
    pub results: Vec<ProbabilityExport>,
}

impl QueryReport {
    pub fn new(results: &[(Term, f64)], evidence: &[(Term, bool)]) -> Self {
        Self {
            evidence: evidence
                .iter()
                .map(|(t, v)| EvidenceExport {
                    term: t.to_string(),
                    value: *v,
                })
                .collect(),
            results: results
                .iter()
                .map(|(t, p)| ProbabilityExport {
                    query: t.to_string(),
                    probability: *p,
                })
                .collect(),
        }
    }

    /// Probability of `query`, looked up by its printed form.
    pub fn get(&self, query: &str) -> Option<f64> {
        self.results.iter().find(|r| r.query == query).map(|r| r.probability)
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    pub fn from_json(src: &str) -> serde_json::Result<Self> {
        serde_json::from_str(src)
    }
}

/// Samples as JSON lines, one object per sample.
pub fn samples_to_json_lines(samples: &[Sample]) -> serde_json::Result<String> {
    let mut out = String::new();
    for sample in samples {
        out.push_str(&serde_json::to_string(sample)?);
        out.push('\n');
    }
    Ok(out)
}

pub fn explanation_to_json(explanation: &Explanation) -> serde_json::Result<String> {
    serde_json::to_string_pretty(explanation)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn report_round_trips() {
        let report = QueryReport::new(
            &[(Term::compound("p", vec![Term::int(1)]), 0.25)],
            &[(Term::atom("e"), false)],
        );
        let json = report.to_json().unwrap();
        assert!(json.contains("\"p(1)\""));
        let back = QueryReport::from_json(&json).unwrap();
        assert_eq!(back, report);
        assert_eq!(back.get("p(1)"), Some(0.25));
    }

    #[test]
    fn samples_use_printed_keys() {
        let sample = Sample {
            queries: BTreeMap::from([(Term::atom("q"), true)]),
            facts: BTreeMap::from([(Term::compound("f", vec![Term::atom("a")]), false)]),
            probability: 0.5,
        };
        let lines = samples_to_json_lines(&[sample.clone(), sample]).unwrap();
        assert_eq!(lines.lines().count(), 2);
        let value: serde_json::Value = serde_json::from_str(lines.lines().next().unwrap()).unwrap();
        assert_eq!(value["queries"]["q"], true);
        assert_eq!(value["facts"]["f(a)"], false);
        assert_eq!(value["probability"], 0.5);
    }

    #[test]
    fn explanation_lists_facts() {
        let e = Explanation {
            probability: 0.42,
            facts: BTreeMap::from([(Term::atom("a"), true), (Term::atom("b"), false)]),
        };
        let json = explanation_to_json(&e).unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["facts"]["a"], true);
        assert_eq!(value["facts"]["b"], false);
    }
}
