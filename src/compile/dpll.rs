//! Compilers that record a DPLL search as a circuit.
//!
//! Each decision on a variable `v` becomes a deterministic OR of
//! `v & compile(cnf | v)` and `-v & compile(cnf | -v)`. Unit propagation
//! contributes literal leaves, and variables that drop out of every clause
//! become free leaves so the circuit stays smooth.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use super::{Circuit, CircuitBuilder, CircuitNode, KnowledgeCompiler};
use crate::cancel::CancellationToken;
use crate::cnf::{Cnf, Literal};
use crate::error::{CompileError, CompileResult};

type Clauses = Vec<Vec<Literal>>;

/// Decision-DNNF: unit propagation, splitting into independent components
/// and caching of components already compiled.
#[derive(Debug, Clone, Copy, Default)]
pub struct DecisionDnnfCompiler;

impl KnowledgeCompiler for DecisionDnnfCompiler {
    fn name(&self) -> &'static str {
        "decision-dnnf"
    }

    fn compile(&self, cnf: &Cnf, cancel: &CancellationToken) -> CompileResult<Circuit> {
        Dpll::new(cancel, true).run(self.name(), cnf)
    }
}

/// Ordered decision tree with unit propagation only. Exponential in the
/// worst case, but a useful cross-check on small formulas.
#[derive(Debug, Clone, Copy, Default)]
pub struct DecisionTreeCompiler;

impl KnowledgeCompiler for DecisionTreeCompiler {
    fn name(&self) -> &'static str {
        "decision-tree"
    }

    fn compile(&self, cnf: &Cnf, cancel: &CancellationToken) -> CompileResult<Circuit> {
        Dpll::new(cancel, false).run(self.name(), cnf)
    }
}

struct Dpll<'c> {
    cancel: &'c CancellationToken,
    decompose: bool,
    builder: CircuitBuilder,
    cache: HashMap<Clauses, usize>,
    decisions: usize,
}

impl<'c> Dpll<'c> {
    fn new(cancel: &'c CancellationToken, decompose: bool) -> Self {
        Self {
            cancel,
            decompose,
            builder: CircuitBuilder::default(),
            cache: HashMap::new(),
            decisions: 0,
        }
    }

    fn run(mut self, backend: &str, cnf: &Cnf) -> CompileResult<Circuit> {
        let vars: Vec<u32> = (1..=cnf.num_vars()).collect();
        let root = match normalize(cnf.clauses()) {
            Some(clauses) => self.compile(clauses, &vars)?,
            None => self.builder.falsum(),
        };
        let circuit = self.builder.finish(root, cnf.num_vars());
        tracing::debug!(
            backend,
            nodes = circuit.len(),
            decisions = self.decisions,
            cached = self.cache.len(),
            "circuit compiled"
        );
        Ok(circuit)
    }

    /// Circuit over exactly `vars` for `clauses`.
    fn compile(&mut self, clauses: Clauses, vars: &[u32]) -> CompileResult<usize> {
        let Some((clauses, units)) = propagate(clauses) else {
            return Ok(self.builder.falsum());
        };
        let mut children: Vec<usize> = units
            .iter()
            .map(|l| self.builder.add(CircuitNode::Literal(*l)))
            .collect();
        let assigned: BTreeSet<u32> = units.iter().map(|l| l.unsigned_abs()).collect();
        let mentioned: BTreeSet<u32> = clauses.iter().flatten().map(|l| l.unsigned_abs()).collect();
        for v in vars {
            if !assigned.contains(v) && !mentioned.contains(v) {
                children.push(self.builder.add(CircuitNode::Free(*v)));
            }
        }
        if self.decompose {
            for component in components(clauses) {
                children.push(self.decide(component)?);
            }
        } else if !clauses.is_empty() {
            children.push(self.decide(clauses)?);
        }
        Ok(self.builder.and(children))
    }

    /// Branch on one variable of a non-empty clause set.
    fn decide(&mut self, clauses: Clauses) -> CompileResult<usize> {
        if self.cancel.is_cancelled() {
            return Err(CompileError::CompilationTimeout {
                stage: "compile".into(),
            });
        }
        if self.decompose {
            if let Some(id) = self.cache.get(&clauses) {
                return Ok(*id);
            }
        }
        let vars: Vec<u32> = clauses
            .iter()
            .flatten()
            .map(|l| l.unsigned_abs())
            .collect::<BTreeSet<u32>>()
            .into_iter()
            .collect();
        let Some(v) = self.branch_var(&clauses, &vars) else {
            return Ok(self.builder.add(CircuitNode::True));
        };
        self.decisions += 1;
        let rest: Vec<u32> = vars.iter().copied().filter(|x| *x != v).collect();

        let mut branches = Vec::with_capacity(2);
        for lit in [v as Literal, -(v as Literal)] {
            let node = match condition(&clauses, lit) {
                Some(sub) => {
                    let below = self.compile(sub, &rest)?;
                    if *self.builder.node(below) == CircuitNode::False {
                        below
                    } else {
                        let leaf = self.builder.add(CircuitNode::Literal(lit));
                        self.builder.and(vec![leaf, below])
                    }
                }
                None => self.builder.falsum(),
            };
            branches.push(node);
        }
        let node = self.builder.or(branches);
        if self.decompose {
            self.cache.insert(clauses, node);
        }
        Ok(node)
    }

    fn branch_var(&self, clauses: &Clauses, vars: &[u32]) -> Option<u32> {
        if !self.decompose {
            return vars.first().copied();
        }
        let mut counts: BTreeMap<u32, usize> = BTreeMap::new();
        for l in clauses.iter().flatten() {
            *counts.entry(l.unsigned_abs()).or_default() += 1;
        }
        counts
            .into_iter()
            .max_by(|(va, a), (vb, b)| a.cmp(b).then(vb.cmp(va)))
            .map(|(v, _)| v)
    }
}

/// Sort and deduplicate literals and clauses, dropping tautologies. `None`
/// when an empty clause is present.
fn normalize(clauses: &[Vec<Literal>]) -> Option<Clauses> {
    let mut out = Vec::with_capacity(clauses.len());
    for clause in clauses {
        let mut c = clause.clone();
        c.sort_by_key(|l| (l.unsigned_abs(), *l));
        c.dedup();
        if c.is_empty() {
            return None;
        }
        if c.windows(2).any(|w| w[0] == -w[1]) {
            continue;
        }
        out.push(c);
    }
    out.sort();
    out.dedup();
    Some(out)
}

/// Simplify under `lit`. `None` when a clause becomes empty.
fn condition(clauses: &Clauses, lit: Literal) -> Option<Clauses> {
    let mut out = Vec::with_capacity(clauses.len());
    for clause in clauses {
        if clause.contains(&lit) {
            continue;
        }
        let rest: Vec<Literal> = clause.iter().copied().filter(|l| *l != -lit).collect();
        if rest.is_empty() {
            return None;
        }
        out.push(rest);
    }
    out.sort();
    out.dedup();
    Some(out)
}

/// Repeated unit propagation. Returns the simplified clauses and the
/// literals it fixed, or `None` on conflict.
fn propagate(mut clauses: Clauses) -> Option<(Clauses, Vec<Literal>)> {
    let mut units = Vec::new();
    while let Some(lit) = clauses.iter().find(|c| c.len() == 1).map(|c| c[0]) {
        units.push(lit);
        clauses = condition(&clauses, lit)?;
    }
    Some((clauses, units))
}

/// Split clauses into groups that share no variable.
fn components(clauses: Clauses) -> Vec<Clauses> {
    fn find(parent: &mut HashMap<u32, u32>, v: u32) -> u32 {
        let mut v = v;
        while let Some(&p) = parent.get(&v) {
            if p == v {
                break;
            }
            let grand = parent.get(&p).copied().unwrap_or(p);
            parent.insert(v, grand);
            v = p;
        }
        v
    }

    let mut parent: HashMap<u32, u32> = HashMap::new();
    for clause in &clauses {
        let first = clause[0].unsigned_abs();
        parent.entry(first).or_insert(first);
        for l in &clause[1..] {
            let v = l.unsigned_abs();
            parent.entry(v).or_insert(v);
            let (a, b) = (find(&mut parent, first), find(&mut parent, v));
            if a != b {
                parent.insert(a.max(b), a.min(b));
            }
        }
    }
    let mut groups: BTreeMap<u32, Clauses> = BTreeMap::new();
    for clause in clauses {
        let root = find(&mut parent, clause[0].unsigned_abs());
        groups.entry(root).or_default().push(clause);
    }
    groups.into_values().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compile::LiteralWeights;
    use crate::semiring::ProbabilitySemiring;

    fn count(compiler: &dyn KnowledgeCompiler, src: &str, p: f64) -> f64 {
        let cnf = Cnf::from_dimacs(src).unwrap();
        let circuit = compiler.compile(&cnf, &CancellationToken::new()).unwrap();
        let mut w = LiteralWeights::new(cnf.num_vars(), 1.0);
        for v in 1..=cnf.num_vars() as Literal {
            w.set(v, p);
            w.set(-v, 1.0 - p);
        }
        circuit.evaluate(&ProbabilitySemiring, &w)
    }

    const OR3: &str = "p cnf 3 1\n1 2 3 0\n";
    const CHAIN: &str = "p cnf 4 3\n-1 2 0\n-2 3 0\n-3 4 0\n";
    const SPLIT: &str = "p cnf 4 2\n1 2 0\n3 4 0\n";

    #[test]
    fn backends_agree_with_closed_forms() {
        for compiler in [&DecisionDnnfCompiler as &dyn KnowledgeCompiler, &DecisionTreeCompiler] {
            assert!((count(compiler, OR3, 0.5) - 0.875).abs() < 1e-12);
            // implication chain: models are 0000,0001,0011,0111,1111
            let p: f64 = 0.5;
            assert!((count(compiler, CHAIN, p) - 5.0 * p.powi(4)).abs() < 1e-12);
            assert!((count(compiler, SPLIT, 0.5) - 0.75 * 0.75).abs() < 1e-12);
        }
    }

    #[test]
    fn unsatisfiable_compiles_to_false() {
        let cnf = Cnf::from_dimacs("p cnf 1 2\n1 0\n-1 0\n").unwrap();
        let circuit = DecisionDnnfCompiler.compile(&cnf, &CancellationToken::new()).unwrap();
        assert!(circuit.is_unsatisfiable());
    }

    #[test]
    fn unconstrained_variables_are_free() {
        let cnf = Cnf::from_dimacs("p cnf 3 1\n1 0\n").unwrap();
        let circuit = DecisionDnnfCompiler.compile(&cnf, &CancellationToken::new()).unwrap();
        let free = circuit
            .nodes()
            .iter()
            .filter(|n| matches!(n, CircuitNode::Free(_)))
            .count();
        assert_eq!(free, 2);
    }

    #[test]
    fn components_split_on_shared_variables() {
        let parts = components(vec![vec![1, 2], vec![3, 4], vec![2, 5]]);
        assert_eq!(parts.len(), 2);
    }

    #[test]
    fn cancellation_stops_compilation() {
        let cnf = Cnf::from_dimacs(OR3).unwrap();
        let cancel = CancellationToken::new();
        cancel.cancel();
        assert!(matches!(
            DecisionDnnfCompiler.compile(&cnf, &cancel),
            Err(CompileError::CompilationTimeout { .. })
        ));
    }
}
