//! Knowledge compilation: CNF to a smooth d-DNNF circuit, and circuit
//! evaluation.
//!
//! A [`KnowledgeCompiler`] turns a [`Cnf`] into a [`Circuit`] whose OR
//! nodes are deterministic (children are mutually exclusive), whose AND
//! nodes are decomposable (children share no variable) and which is smooth
//! (children of an OR mention the same variables). Under those properties a
//! single bottom-up pass in any [`Semiring`] computes the weighted model
//! count, so one compiled circuit serves every semiring.

mod dpll;

use std::collections::HashMap;

use rand::Rng;

pub use dpll::{DecisionDnnfCompiler, DecisionTreeCompiler};

use crate::cancel::CancellationToken;
use crate::cnf::{Cnf, Literal};
use crate::config::CompilerBackend;
use crate::error::CompileResult;
use crate::semiring::Semiring;

/// Capability boundary for knowledge-compiler backends.
pub trait KnowledgeCompiler: Send + Sync {
    fn name(&self) -> &'static str;

    fn compile(&self, cnf: &Cnf, cancel: &CancellationToken) -> CompileResult<Circuit>;
}

/// The backend selected by `backend`.
pub fn compiler_for(backend: CompilerBackend) -> Box<dyn KnowledgeCompiler> {
    match backend {
        CompilerBackend::DecisionDnnf => Box::new(DecisionDnnfCompiler),
        CompilerBackend::DecisionTree => Box::new(DecisionTreeCompiler),
    }
}

/// Per-literal weights, indexed by variable.
#[derive(Debug, Clone)]
pub struct LiteralWeights<V> {
    pos: Vec<V>,
    neg: Vec<V>,
}

impl<V: Clone> LiteralWeights<V> {
    /// Every literal of `num_vars` variables weighted `one`.
    pub fn new(num_vars: u32, one: V) -> Self {
        let n = num_vars as usize + 1;
        Self {
            pos: vec![one.clone(); n],
            neg: vec![one; n],
        }
    }

    pub fn set(&mut self, literal: Literal, value: V) {
        let v = literal.unsigned_abs() as usize;
        if literal > 0 {
            self.pos[v] = value;
        } else {
            self.neg[v] = value;
        }
    }

    pub fn get(&self, literal: Literal) -> &V {
        let v = literal.unsigned_abs() as usize;
        if literal > 0 { &self.pos[v] } else { &self.neg[v] }
    }
}

/// A circuit node. Children always precede their parents.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum CircuitNode {
    True,
    False,
    Literal(Literal),
    /// An unconstrained variable: `v` or `-v`.
    Free(u32),
    And(Vec<usize>),
    Or(Vec<usize>),
}

/// A compiled circuit over the variables of a CNF.
#[derive(Debug, Clone)]
pub struct Circuit {
    nodes: Vec<CircuitNode>,
    root: usize,
    num_vars: u32,
}

impl Circuit {
    pub fn num_vars(&self) -> u32 {
        self.num_vars
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn nodes(&self) -> &[CircuitNode] {
        &self.nodes
    }

    pub fn root(&self) -> usize {
        self.root
    }

    /// Whether the CNF had no model.
    pub fn is_unsatisfiable(&self) -> bool {
        self.nodes.get(self.root) == Some(&CircuitNode::False)
    }

    /// Weighted model count in `semiring`.
    pub fn evaluate<S: Semiring>(
        &self,
        semiring: &S,
        weights: &LiteralWeights<S::Value>,
    ) -> S::Value {
        let values = self.bottom_up(semiring, weights);
        values
            .into_iter()
            .nth(self.root)
            .unwrap_or_else(|| semiring.zero())
    }

    fn bottom_up<S: Semiring>(
        &self,
        semiring: &S,
        weights: &LiteralWeights<S::Value>,
    ) -> Vec<S::Value> {
        let mut values: Vec<S::Value> = Vec::with_capacity(self.nodes.len());
        for node in &self.nodes {
            let value = match node {
                CircuitNode::True => semiring.one(),
                CircuitNode::False => semiring.zero(),
                CircuitNode::Literal(l) => weights.get(*l).clone(),
                CircuitNode::Free(v) => {
                    let v = *v as Literal;
                    semiring.plus(weights.get(v), weights.get(-v))
                }
                CircuitNode::And(children) => children
                    .iter()
                    .fold(semiring.one(), |acc, c| semiring.times(&acc, &values[*c])),
                CircuitNode::Or(children) => children
                    .iter()
                    .fold(semiring.zero(), |acc, c| semiring.plus(&acc, &values[*c])),
            };
            values.push(value);
        }
        values
    }

    /// The highest-weight model and its weight, or `None` when every model
    /// has weight zero.
    pub fn max_assignment(&self, weights: &LiteralWeights<f64>) -> Option<(f64, Vec<Literal>)> {
        let mut values: Vec<f64> = Vec::with_capacity(self.nodes.len());
        for node in &self.nodes {
            let value = match node {
                CircuitNode::True => 1.0,
                CircuitNode::False => 0.0,
                CircuitNode::Literal(l) => *weights.get(*l),
                CircuitNode::Free(v) => {
                    weights.get(*v as Literal).max(*weights.get(-(*v as Literal)))
                }
                CircuitNode::And(children) => children.iter().map(|c| values[*c]).product(),
                CircuitNode::Or(children) => {
                    children.iter().map(|c| values[*c]).fold(0.0, f64::max)
                }
            };
            values.push(value);
        }
        let best = *values.get(self.root)?;
        if best <= 0.0 {
            return None;
        }
        let mut model = Vec::new();
        self.descend(self.root, &mut model, &mut |node, children| match node {
            CircuitNode::Or(_) => children
                .iter()
                .copied()
                .max_by(|a, b| values[*a].total_cmp(&values[*b])),
            CircuitNode::Free(v) => {
                let v = *v as Literal;
                Some(if weights.get(v) >= weights.get(-v) { 1 } else { 0 })
            }
            _ => None,
        });
        model.sort_by_key(|l| l.unsigned_abs());
        Some((best, model))
    }

    /// Draw a model with probability proportional to its weight, or `None`
    /// when the total weight is zero.
    pub fn sample<R: Rng>(
        &self,
        weights: &LiteralWeights<f64>,
        rng: &mut R,
    ) -> Option<Vec<Literal>> {
        let values = self.bottom_up(&crate::semiring::ProbabilitySemiring, weights);
        if values.get(self.root).is_none_or(|v| *v <= 0.0) {
            return None;
        }
        let mut model = Vec::new();
        self.descend(self.root, &mut model, &mut |node, children| match node {
            CircuitNode::Or(_) => {
                let total: f64 = children.iter().map(|c| values[*c]).sum();
                let mut r = rng.gen_range(0.0..1.0) * total;
                let mut pick = children.last().copied();
                for c in children {
                    if r < values[*c] {
                        pick = Some(*c);
                        break;
                    }
                    r -= values[*c];
                }
                pick
            }
            CircuitNode::Free(v) => {
                let v = *v as Literal;
                let (pos, neg) = (*weights.get(v), *weights.get(-v));
                let p = if pos + neg > 0.0 { pos / (pos + neg) } else { 0.5 };
                Some(usize::from(rng.gen_bool(p.clamp(0.0, 1.0))))
            }
            _ => None,
        });
        model.sort_by_key(|l| l.unsigned_abs());
        Some(model)
    }

    /// Walk down from `id`, following every AND child and the OR child
    /// chosen by `pick`. For free variables `pick` returns 1 for the
    /// positive literal and 0 for the negative one.
    fn descend(
        &self,
        id: usize,
        model: &mut Vec<Literal>,
        pick: &mut dyn FnMut(&CircuitNode, &[usize]) -> Option<usize>,
    ) {
        let mut stack = vec![id];
        while let Some(id) = stack.pop() {
            let node = &self.nodes[id];
            match node {
                CircuitNode::Literal(l) => model.push(*l),
                CircuitNode::Free(v) => {
                    let positive = pick(node, &[]) == Some(1);
                    let v = *v as Literal;
                    model.push(if positive { v } else { -v });
                }
                CircuitNode::And(children) => stack.extend(children.iter().copied()),
                CircuitNode::Or(children) => {
                    if let Some(c) = pick(node, children) {
                        stack.push(c);
                    }
                }
                CircuitNode::True | CircuitNode::False => {}
            }
        }
    }
}

/// Hash-consing builder used by the compilers.
#[derive(Debug, Default)]
pub(crate) struct CircuitBuilder {
    nodes: Vec<CircuitNode>,
    index: HashMap<CircuitNode, usize>,
}

impl CircuitBuilder {
    pub fn add(&mut self, node: CircuitNode) -> usize {
        if let Some(id) = self.index.get(&node) {
            return *id;
        }
        let id = self.nodes.len();
        self.nodes.push(node.clone());
        self.index.insert(node, id);
        id
    }

    pub fn node(&self, id: usize) -> &CircuitNode {
        &self.nodes[id]
    }

    pub fn falsum(&mut self) -> usize {
        self.add(CircuitNode::False)
    }

    /// Conjunction, folding TRUE children away and FALSE to FALSE.
    pub fn and(&mut self, children: Vec<usize>) -> usize {
        let mut kept = Vec::with_capacity(children.len());
        for c in children {
            match self.nodes[c] {
                CircuitNode::False => return self.falsum(),
                CircuitNode::True => {}
                _ => kept.push(c),
            }
        }
        match kept.len() {
            0 => self.add(CircuitNode::True),
            1 => kept[0],
            _ => {
                kept.sort_unstable();
                self.add(CircuitNode::And(kept))
            }
        }
    }

    /// Disjunction of mutually exclusive children, dropping FALSE ones.
    pub fn or(&mut self, children: Vec<usize>) -> usize {
        let kept: Vec<usize> = children
            .into_iter()
            .filter(|c| self.nodes[*c] != CircuitNode::False)
            .collect();
        match kept.len() {
            0 => self.falsum(),
            1 => kept[0],
            _ => self.add(CircuitNode::Or(kept)),
        }
    }

    pub fn finish(self, root: usize, num_vars: u32) -> Circuit {
        Circuit {
            nodes: self.nodes,
            root,
            num_vars,
        }
    }
}
