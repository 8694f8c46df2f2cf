//! Benchmarks for grounding, compilation and evaluation.

use criterion::{Criterion, black_box, criterion_group, criterion_main};

use probalog::compile::{DecisionDnnfCompiler, KnowledgeCompiler};
use probalog::cnf::Cnf;
use probalog::config::EngineConfig;
use probalog::engine::Engine;
use probalog::term::{Term, VarScope, parse_term};
use probalog::{CancellationToken, cycles};

/// A ring of `n` nodes with probabilistic edges and a few chords.
fn ring(n: usize) -> Engine {
    let mut src = String::new();
    for i in 0..n {
        src.push_str(&format!("'::'(0.6, edge(n{i}, n{})).\n", (i + 1) % n));
        if i % 3 == 0 {
            src.push_str(&format!("'::'(0.3, edge(n{i}, n{})).\n", (i + n / 2) % n));
        }
    }
    src.push_str("':-'(path(X, Y), edge(X, Y)).\n");
    src.push_str("':-'(path(X, Y), ','(edge(X, Z), path(Z, Y))).\n");
    let mut engine = Engine::new(EngineConfig::default()).unwrap();
    engine.load_str(&src).unwrap();
    engine
}

fn query(src: &str) -> Term {
    parse_term(src, &mut VarScope::new()).unwrap()
}

fn bench_ground(c: &mut Criterion) {
    let engine = ring(12);
    let q = [query("path(n0, X)")];
    c.bench_function("ground_ring_12", |b| {
        b.iter(|| black_box(engine.ground(&q, &[]).unwrap()))
    });
}

fn bench_compile(c: &mut Criterion) {
    let engine = ring(6);
    let formula = engine.ground(&[query("path(n0, n3)")], &[]).unwrap();
    let cancel = CancellationToken::new();
    let acyclic = cycles::break_cycles(&formula, &cancel).unwrap();
    let cnf = Cnf::from_formula(&acyclic).unwrap();
    c.bench_function("compile_ring_6", |b| {
        b.iter(|| black_box(DecisionDnnfCompiler.compile(&cnf, &cancel).unwrap()))
    });
}

fn bench_evaluate(c: &mut Criterion) {
    let engine = ring(6);
    let evaluator = engine.evaluator(&[query("path(n0, X)")], &[]).unwrap();
    c.bench_function("evaluate_ring_6", |b| {
        b.iter(|| black_box(evaluator.probabilities().unwrap()))
    });
}

/// Doubly recursive closure over a complete graph: one large cyclic component.
fn bench_break_cycles(c: &mut Criterion) {
    let mut src = String::new();
    for i in 0..5 {
        for j in (0..5).filter(|j| *j != i) {
            src.push_str(&format!("'::'(0.5, edge(n{i}, n{j})).\n"));
        }
    }
    src.push_str("':-'(path(X, Y), edge(X, Y)).\n");
    src.push_str("':-'(path(X, Y), ','(path(X, Z), path(Z, Y))).\n");
    let mut engine = Engine::new(EngineConfig::default()).unwrap();
    engine.load_str(&src).unwrap();
    let formula = engine.ground(&[query("path(n0, n4)")], &[]).unwrap();
    let cancel = CancellationToken::new();
    c.bench_function("break_complete_5", |b| {
        b.iter(|| black_box(cycles::break_cycles(&formula, &cancel).unwrap()))
    });
}

criterion_group!(
    benches,
    bench_ground,
    bench_compile,
    bench_evaluate,
    bench_break_cycles
);
criterion_main!(benches);
