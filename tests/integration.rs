//! End-to-end scenarios for the probalog engine.
//!
//! Programs are loaded in canonical notation and run through the full
//! pipeline: tabled grounding, cycle breaking, compilation and evaluation,
//! or sampling.

use probalog::cancel::CancellationToken;
use probalog::config::EngineConfig;
use probalog::cycles;
use probalog::engine::Engine;
use probalog::error::{GroundError, ProbalogError};
use probalog::evaluate::Evaluator;
use probalog::formula::LogicFormula;
use probalog::sample::{EvidenceMode, Sample};
use probalog::semiring::{LogProbabilitySemiring, SymbolicSemiring};
use probalog::term::{Term, VarScope, parse_term};

const COINS: &str = r"
    '::'(0.5, heads1).
    '::'(0.6, heads2).
    ':-'(someHeads, heads1).
    ':-'(someHeads, heads2).
    query(someHeads).
";

fn engine(src: &str) -> Engine {
    let mut engine = Engine::new(EngineConfig::default()).unwrap();
    engine.load_str(src).unwrap();
    engine
}

fn seeded(src: &str, seed: u64) -> Engine {
    let mut config = EngineConfig::default();
    config.sampling.seed = Some(seed);
    config.sampling.max_rejections = 10_000;
    let mut engine = Engine::new(config).unwrap();
    engine.load_str(src).unwrap();
    engine
}

fn t(src: &str) -> Term {
    parse_term(src, &mut VarScope::new()).unwrap()
}

fn prob(results: &[(Term, f64)], query: &str) -> f64 {
    let q = t(query);
    results
        .iter()
        .find(|(term, _)| *term == q)
        .map(|(_, p)| *p)
        .unwrap_or_else(|| panic!("no result for {query}"))
}

fn close(a: f64, b: f64) -> bool {
    (a - b).abs() < 1e-9
}

#[test]
fn independent_coins() {
    let results = engine(COINS).query_declared().unwrap();
    assert_eq!(results.len(), 1);
    assert!(close(prob(&results, "someHeads"), 1.0 - 0.5 * 0.4));
}

#[test]
fn evidence_conditioning() {
    let src = format!("{COINS}\nevidence(\\+(someHeads)).\nquery(heads1).");
    let results = engine(&src).query_declared().unwrap();
    assert_eq!(prob(&results, "heads1"), 0.0);
    assert_eq!(prob(&results, "someHeads"), 0.0);
}

#[test]
fn non_ground_probabilistic_clause_is_rejected() {
    let src = r"
        '::'(0.4, a(_)).
        ':-'(b, a(_)).
        query(b).
    ";
    let err = engine(src).query_declared().unwrap_err();
    match err {
        ProbalogError::Ground(GroundError::NonGroundProbabilisticClause { clause, .. }) => {
            assert!(clause.contains("a("));
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn negation_exempts_local_variables() {
    let src = r"
        '::'(0.1, a(1, 2)).
        '::'(0.1, a(1, 3)).
        '::'(0.1, a(1, 4)).
        ':-'('::'(0.3, q(X)), \+(a(X, Y))).
        query(q(1)).
    ";
    let results = engine(src).query_declared().unwrap();
    assert!(close(prob(&results, "q(1)"), 0.3 * 0.9f64.powi(3)));
}

#[test]
fn cyclic_reachability_terminates() {
    let src = r"
        edge(a, b).
        edge(b, c).
        edge(c, a).
        edge(c, d).
        ':-'(path(X, Y), edge(X, Y)).
        ':-'(path(X, Y), ','(edge(X, Z), path(Z, Y))).
    ";
    let engine = engine(src);
    let formula = engine.ground(&[t("path(X, Y)")], &[]).unwrap();
    let pairs: Vec<String> = formula.queries().iter().map(|(q, _)| q.to_string()).collect();
    assert_eq!(pairs.len(), 12);
    assert!(pairs.contains(&"path(a,d)".to_string()));
    assert!(pairs.contains(&"path(a,a)".to_string()));
    assert!(!pairs.iter().any(|p| p.starts_with("path(d,")));
}

#[test]
fn probabilistic_cycles_keep_the_least_model() {
    let src = r"
        '::'(0.5, edge(a, b)).
        '::'(0.5, edge(b, a)).
        '::'(0.5, edge(b, c)).
        ':-'(path(X, Y), edge(X, Y)).
        ':-'(path(X, Y), ','(edge(X, Z), path(Z, Y))).
    ";
    let results = engine(src).query(&[t("path(a, X)")], &[]).unwrap();
    assert_eq!(results.len(), 3);
    assert!(close(prob(&results, "path(a, b)"), 0.5));
    assert!(close(prob(&results, "path(a, c)"), 0.25));
    assert!(close(prob(&results, "path(a, a)"), 0.25));
}

/// Every ordered pair of `n` nodes joined by a 0.5 edge.
fn complete_graph(n: usize, doubly_recursive: bool) -> String {
    let mut src = String::new();
    for i in 0..n {
        for j in 0..n {
            if i != j {
                src.push_str(&format!("'::'(0.5, edge(n{i}, n{j})).\n"));
            }
        }
    }
    src.push_str("':-'(path(X, Y), edge(X, Y)).\n");
    if doubly_recursive {
        src.push_str("':-'(path(X, Y), ','(path(X, Z), path(Z, Y))).\n");
    } else {
        src.push_str("':-'(path(X, Y), ','(edge(X, Z), path(Z, Y))).\n");
    }
    src
}

/// P(n0 reaches the last node) by enumerating every edge subset.
fn reachability_by_enumeration(n: usize) -> f64 {
    let edges: Vec<(usize, usize)> = (0..n)
        .flat_map(|i| (0..n).filter(move |j| *j != i).map(move |j| (i, j)))
        .collect();
    let worlds = 1u32 << edges.len();
    let mut hits = 0u32;
    for world in 0..worlds {
        let mut seen = vec![false; n];
        let mut stack = vec![0];
        while let Some(node) = stack.pop() {
            for (k, (from, to)) in edges.iter().enumerate() {
                if *from == node && world & (1 << k) != 0 && !seen[*to] {
                    seen[*to] = true;
                    stack.push(*to);
                }
            }
        }
        if seen[n - 1] {
            hits += 1;
        }
    }
    f64::from(hits) / f64::from(worlds)
}

#[test]
fn dense_recursion_breaks_into_a_small_formula() {
    for (n, doubly) in [(5, true), (6, true), (5, false), (6, false)] {
        let engine = engine(&complete_graph(n, doubly));
        let formula = engine.ground(&[t(&format!("path(n0, n{})", n - 1))], &[]).unwrap();
        let acyclic = cycles::break_cycles(&formula, &CancellationToken::new()).unwrap();
        assert!(cycles::is_acyclic(&acyclic));
        assert!(
            acyclic.len() <= formula.len() * formula.len(),
            "n={n} doubly={doubly}: {} nodes from {}",
            acyclic.len(),
            formula.len()
        );
    }
}

#[test]
fn dense_recursion_matches_enumeration() {
    for (n, doubly) in [(3, true), (4, false)] {
        let expected = reachability_by_enumeration(n);
        let target = format!("path(n0, n{})", n - 1);
        let results = engine(&complete_graph(n, doubly)).query(&[t(&target)], &[]).unwrap();
        assert!(
            close(prob(&results, &target), expected),
            "n={n} doubly={doubly}: {} vs {expected}",
            prob(&results, &target)
        );
    }
}

#[test]
fn tiny_timeout_stops_dense_recursion() {
    let mut config = EngineConfig::default();
    config.timeout_secs = Some(1e-9);
    let mut engine = Engine::new(config).unwrap();
    engine.load_str(&complete_graph(4, true)).unwrap();
    let err = engine.query(&[t("path(n0, n3)")], &[]).unwrap_err();
    assert!(err.is_timeout(), "unexpected error: {err}");
}

#[test]
fn findall_is_world_independent_when_grounding() {
    let src = r"
        '::'(0.5, c(1)).
        '::'(0.5, c(2)).
        ':-'(count(N), ','(findall(X, c(X), L), length(L, N))).
    ";
    // Exact inference collects the answers of every world.
    let results = engine(src).query(&[t("count(2)")], &[]).unwrap();
    assert!(close(prob(&results, "count(2)"), 1.0));

    // A sample collects the answers of its own world only.
    let samples: Vec<Sample> = seeded(src, 3)
        .sample(&[t("count(2)")], &[], EvidenceMode::Reject)
        .unwrap()
        .take(200)
        .collect::<Result<_, _>>()
        .unwrap();
    for sample in &samples {
        let both = sample.facts[&t("c(1)")] && sample.facts[&t("c(2)")];
        assert_eq!(sample.queries[&t("count(2)")], both);
    }
    assert!((marginal(&samples, "count(2)") - 0.25).abs() < 0.1);
}

#[test]
fn annotated_disjunction_is_normalized() {
    let src = r"
        '::'(0.5, pick).
        ':-'(';'('::'(0.2, red), ';'('::'(0.3, green), '::'(0.1, blue))), pick).
        ':-'(none, ','(\+(red), ','(\+(green), \+(blue)))).
    ";
    let results = engine(src)
        .query(&[t("red"), t("green"), t("blue"), t("none")], &[])
        .unwrap();
    let total: f64 = results.iter().map(|(_, p)| p).sum();
    assert!((total - 1.0).abs() < 1e-9);
    assert!(close(prob(&results, "green"), 0.15));
    assert!(close(prob(&results, "none"), 0.7));
}

#[test]
fn grounding_is_idempotent() {
    let src = format!("{COINS}\nevidence(heads2, true).");
    let engine = engine(&src);
    let a = engine.ground_declared().unwrap();
    let b = engine.ground_declared().unwrap();
    assert_eq!(a.to_text(), b.to_text());
    assert_eq!(a.atoms().count(), b.atoms().count());

    let back = LogicFormula::from_text(&a.to_text()).unwrap();
    assert_eq!(back.to_text(), a.to_text());
}

#[test]
fn probabilities_are_bounded() {
    let src = format!("{COINS}\n':-'(both, ','(heads1, heads2)).\n':-'(neither, \\+(someHeads)).");
    let results = engine(&src)
        .query(&[t("someHeads"), t("both"), t("neither"), t("nowhere")], &[])
        .unwrap();
    assert!(results.iter().all(|(_, p)| (0.0..=1.0).contains(p)));
    assert!(close(prob(&results, "both"), 0.3));
    assert!(close(prob(&results, "neither"), 0.2));
    assert_eq!(prob(&results, "nowhere"), 0.0);
}

#[test]
fn semirings_agree_on_one_program() {
    let engine = engine(COINS);
    let log = engine
        .query_with(&LogProbabilitySemiring, &[t("someHeads")], &[])
        .unwrap();
    assert!(close(LogProbabilitySemiring::to_probability(log[0].1), 0.8));
    let sym = engine.query_with(&SymbolicSemiring, &[t("someHeads")], &[]).unwrap();
    assert!(!sym[0].1.to_string().is_empty());
    assert!(close(sym[0].1.evaluate(&|_: &Term| None).unwrap(), 0.8));
}

#[test]
fn compiled_formula_is_reusable() {
    let engine = engine(COINS);
    let evaluator: Evaluator = engine
        .evaluator(&[t("heads1"), t("heads2")], &[(t("someHeads"), true)])
        .unwrap();
    let first = evaluator.probabilities().unwrap();
    let second = evaluator.probabilities().unwrap();
    assert_eq!(first, second);
    assert!(close(prob(&first, "heads1"), 0.5 / 0.8));
    assert!(close(evaluator.evidence_probability(), 0.8));
    assert!(evaluator.cnf().to_dimacs().starts_with("p cnf"));
}

fn marginal(samples: &[Sample], query: &str) -> f64 {
    let q = t(query);
    samples.iter().filter(|s| s.queries[&q]).count() as f64 / samples.len() as f64
}

#[test]
fn rejection_samples_satisfy_evidence() {
    let engine = seeded(COINS, 17);
    let samples: Vec<Sample> = engine
        .sample(&[t("heads1"), t("someHeads")], &[(t("someHeads"), true)], EvidenceMode::Reject)
        .unwrap()
        .take(2000)
        .collect::<Result<_, _>>()
        .unwrap();
    assert!(samples.iter().all(|s| s.queries[&t("someHeads")]));
    assert!((marginal(&samples, "heads1") - 0.625).abs() < 0.05);
}

#[test]
fn propagated_samples_match_exact_marginals() {
    let src = r"
        '::'(0.1, burglary).
        '::'(0.05, earthquake).
        ':-'('::'(0.9, alarm), burglary).
        ':-'('::'(0.3, alarm), earthquake).
        ':-'(calls, alarm).
    ";
    let evidence = vec![(t("calls"), true)];
    let exact = engine(src).query(&[t("burglary")], &evidence).unwrap();

    let samples: Vec<Sample> = seeded(src, 5)
        .sample(&[t("burglary"), t("calls")], &evidence, EvidenceMode::Propagate)
        .unwrap()
        .take(3000)
        .collect::<Result<_, _>>()
        .unwrap();
    assert!(samples.iter().all(|s| s.queries[&t("calls")]));
    assert!((marginal(&samples, "burglary") - exact[0].1).abs() < 0.05);
}

#[test]
fn sample_probability_is_of_the_choices() {
    let engine = seeded(COINS, 2);
    for sample in engine.sample(&[t("someHeads")], &[], EvidenceMode::Reject).unwrap().take(25) {
        let sample = sample.unwrap();
        let expected: f64 = sample
            .facts
            .iter()
            .map(|(fact, value)| {
                let p = if *fact == t("heads1") { 0.5 } else { 0.6 };
                if *value { p } else { 1.0 - p }
            })
            .product();
        assert!(close(sample.probability, expected));
    }
}
