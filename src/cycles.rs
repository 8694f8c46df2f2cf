//! Cycle breaking.
//!
//! Cyclic definitions produced by tabling are rewritten into an acyclic
//! formula with the least-model meaning. Each strongly connected component
//! is unrolled in layers: layer 0 makes every OR node of the component FALSE,
//! and layer `i` rebuilds each OR node from the layer `i - 1` values of its
//! children. A component with `k` OR nodes reaches its least fixed point in
//! at most `k` layers, so the output grows linearly in the component size
//! times `k`. Negation inside a cycle has no least model and is rejected.
//!
//! Only nodes reachable from the query and evidence roots are copied, so the
//! rewrite also prunes the formula before CNF conversion.

use std::collections::HashMap;

use petgraph::algo::tarjan_scc;
use petgraph::graph::{DiGraph, NodeIndex};

use crate::cancel::CancellationToken;
use crate::error::CycleError;
use crate::formula::{FormulaRef, LogicFormula, Node, NodeId};

/// Whether `formula` has no cycle among the nodes reachable from its roots.
pub fn is_acyclic(formula: &LogicFormula) -> bool {
    Components::of(formula).cyclic == 0
}

/// Some node on a cycle reachable from the roots.
pub(crate) fn find_cycle(formula: &LogicFormula) -> Option<NodeId> {
    let components = Components::of(formula);
    formula.nodes().map(|(id, _)| id).find(|id| components.of_node(*id).is_some())
}

/// An acyclic copy of `formula` with the same truth value on every root.
///
/// `cancel` is checked before each cyclic component is unrolled.
pub fn break_cycles(
    formula: &LogicFormula,
    cancel: &CancellationToken,
) -> Result<LogicFormula, CycleError> {
    let components = Components::of(formula);
    for (id, node) in formula.nodes() {
        if components.of_node(id).is_some() && matches!(node, Node::Not(_)) {
            return Err(CycleError::CyclicNonConvergence { node: id.0 });
        }
    }

    let mut breaker = Breaker {
        source: formula,
        copied: HashMap::new(),
        out: LogicFormula::new(),
    };
    let mut layers = 0usize;
    // Postorder: every component comes after the components it points to.
    for (index, scc) in components.order.iter().enumerate() {
        if components.looped[index] {
            if cancel.is_cancelled() {
                return Err(CycleError::BreakingTimeout { component: index });
            }
            layers += breaker.unroll(scc);
        } else {
            for id in scc {
                breaker.copy(*id);
            }
        }
    }

    let queries = formula
        .queries()
        .iter()
        .map(|(t, r)| (t.clone(), breaker.root(*r)))
        .collect();
    let evidence = formula
        .evidence()
        .iter()
        .map(|(t, r, v)| (t.clone(), breaker.root(*r), *v))
        .collect();
    let mut out = breaker.out;
    out.set_roots(queries, evidence);

    tracing::debug!(
        cyclic_components = components.cyclic,
        layers,
        nodes_in = formula.len(),
        nodes_out = out.len(),
        "cycles broken"
    );
    Ok(out)
}

// ---------------------------------------------------------------------------
// Component analysis
// ---------------------------------------------------------------------------

struct Components {
    /// Components of the reachable nodes in postorder.
    order: Vec<Vec<NodeId>>,
    /// Whether each component of `order` contains a cycle.
    looped: Vec<bool>,
    /// Cyclic component of each node, if it lies on a cycle.
    component: Vec<Option<usize>>,
    cyclic: usize,
}

impl Components {
    fn of(formula: &LogicFormula) -> Self {
        let reachable = formula.reachable();
        let mut graph: DiGraph<NodeId, ()> = DiGraph::new();
        let mut index: Vec<Option<NodeIndex>> = vec![None; formula.len()];
        for (id, _) in formula.nodes() {
            if reachable[id.0 as usize] {
                index[id.0 as usize] = Some(graph.add_node(id));
            }
        }
        for (id, node) in formula.nodes() {
            let Some(from) = index[id.0 as usize] else {
                continue;
            };
            for child in node.children() {
                if let Some(to) = index[child.0 as usize] {
                    graph.add_edge(from, to, ());
                }
            }
        }

        let mut component = vec![None; formula.len()];
        let mut order = Vec::new();
        let mut looped = Vec::new();
        let mut cyclic = 0;
        for (i, scc) in tarjan_scc(&graph).into_iter().enumerate() {
            let is_loop =
                scc.len() > 1 || scc.first().is_some_and(|n| graph.contains_edge(*n, *n));
            let ids: Vec<NodeId> = scc.iter().map(|idx| graph[*idx]).collect();
            if is_loop {
                cyclic += 1;
                for id in &ids {
                    component[id.0 as usize] = Some(i);
                }
            }
            order.push(ids);
            looped.push(is_loop);
        }
        Self {
            order,
            looped,
            component,
            cyclic,
        }
    }

    fn of_node(&self, id: NodeId) -> Option<usize> {
        self.component[id.0 as usize]
    }
}

// ---------------------------------------------------------------------------
// Layered unrolling
// ---------------------------------------------------------------------------

struct Breaker<'a> {
    source: &'a LogicFormula,
    /// Final copy of every node already processed.
    copied: HashMap<NodeId, FormulaRef>,
    out: LogicFormula,
}

impl Breaker<'_> {
    fn root(&self, root: FormulaRef) -> FormulaRef {
        match root {
            FormulaRef::Node(id) => self.mapped(id),
            constant => constant,
        }
    }

    /// Copy of a node from an earlier component. Children always precede
    /// their parents in postorder, so a miss means the node is unreachable.
    fn mapped(&self, id: NodeId) -> FormulaRef {
        self.copied.get(&id).copied().unwrap_or(FormulaRef::False)
    }

    /// Copy a node that lies on no cycle.
    fn copy(&mut self, id: NodeId) {
        let source = self.source;
        let result = match source.node(id) {
            Node::Atom {
                key,
                probability,
                label,
                group,
            } => FormulaRef::Node(self.out.add_atom(
                key.clone(),
                probability.clone(),
                label.clone(),
                group.clone(),
            )),
            Node::And(children) => {
                let refs: Vec<FormulaRef> = children.iter().map(|c| self.mapped(*c)).collect();
                self.out.add_and(&refs)
            }
            Node::Or(children) => {
                let refs: Vec<FormulaRef> = children.iter().map(|c| self.mapped(*c)).collect();
                self.out.add_or(&refs)
            }
            Node::Not(child) => {
                let inner = self.mapped(*child);
                self.out.add_not(inner)
            }
        };
        self.copied.insert(id, result);
    }

    /// Unroll one cyclic component. Returns the number of layers built.
    fn unroll(&mut self, scc: &[NodeId]) -> usize {
        let source = self.source;
        let mut ors: Vec<NodeId> = Vec::new();
        let mut ands: Vec<NodeId> = Vec::new();
        for id in scc {
            match source.node(*id) {
                Node::Or(_) => ors.push(*id),
                Node::And(_) => ands.push(*id),
                // Atoms have no children and NOT was rejected above.
                Node::Atom { .. } | Node::Not(_) => {}
            }
        }
        ors.sort_unstable();
        // An interned AND only refers to nodes created before it.
        ands.sort_unstable();

        let mut prev: HashMap<NodeId, FormulaRef> =
            ors.iter().map(|id| (*id, FormulaRef::False)).collect();
        self.and_layer(&ands, &mut prev);

        let mut layers = 0;
        for _ in 0..ors.len() {
            layers += 1;
            let mut cur: HashMap<NodeId, FormulaRef> = HashMap::with_capacity(prev.len());
            for id in &ors {
                let Node::Or(children) = source.node(*id) else {
                    continue;
                };
                let refs: Vec<FormulaRef> = children
                    .iter()
                    .map(|c| prev.get(c).copied().unwrap_or_else(|| self.mapped(*c)))
                    .collect();
                let value = self.out.add_or(&refs);
                cur.insert(*id, value);
            }
            let stable = ors.iter().all(|id| cur.get(id) == prev.get(id));
            self.and_layer(&ands, &mut cur);
            prev = cur;
            if stable {
                break;
            }
        }
        self.copied.extend(prev);
        layers
    }

    /// Rebuild the AND nodes of a component from the OR values in `layer`.
    fn and_layer(&mut self, ands: &[NodeId], layer: &mut HashMap<NodeId, FormulaRef>) {
        let source = self.source;
        for id in ands {
            let Node::And(children) = source.node(*id) else {
                continue;
            };
            let refs: Vec<FormulaRef> = children
                .iter()
                .map(|c| layer.get(c).copied().unwrap_or_else(|| self.mapped(*c)))
                .collect();
            let value = self.out.add_and(&refs);
            layer.insert(*id, value);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clause::{ClauseId, Probability};
    use crate::formula::ChoiceKey;
    use crate::term::Term;

    fn atom(f: &mut LogicFormula, clause: u32, name: &str) -> FormulaRef {
        FormulaRef::Node(f.add_atom(
            ChoiceKey {
                clause: ClauseId(clause),
                branch: 0,
                grounding: vec![],
            },
            Probability::Value(0.5),
            Term::atom(name),
            None,
        ))
    }

    #[test]
    fn acyclic_formula_is_copied() {
        let mut f = LogicFormula::new();
        let a = atom(&mut f, 0, "a");
        let b = atom(&mut f, 1, "b");
        atom(&mut f, 2, "unreachable");
        let ab = f.add_and(&[a, b]);
        f.add_query(Term::atom("q"), ab);
        assert!(is_acyclic(&f));
        let out = break_cycles(&f, &CancellationToken::new()).unwrap();
        assert_eq!(out.atoms().count(), 2);
    }

    #[test]
    fn positive_loop_keeps_only_grounded_support() {
        // p :- q.  q :- p.  q :- a.
        let mut f = LogicFormula::new();
        let p = f.new_placeholder();
        let q = f.new_placeholder();
        let a = atom(&mut f, 0, "a");
        f.add_disjunct(p, q.into());
        f.add_disjunct(q, p.into());
        f.add_disjunct(q, a);
        f.add_query(Term::atom("p"), p.into());
        assert!(!is_acyclic(&f));

        let out = break_cycles(&f, &CancellationToken::new()).unwrap();
        assert!(is_acyclic(&out));
        let FormulaRef::Node(root) = out.queries()[0].1 else {
            panic!("expected a node");
        };
        assert!(matches!(out.node(root), Node::Atom { .. }));
    }

    #[test]
    fn unsupported_loop_is_false() {
        let mut f = LogicFormula::new();
        let p = f.new_placeholder();
        let q = f.new_placeholder();
        f.add_disjunct(p, q.into());
        f.add_disjunct(q, p.into());
        f.add_query(Term::atom("p"), p.into());
        let out = break_cycles(&f, &CancellationToken::new()).unwrap();
        assert_eq!(out.queries()[0].1, FormulaRef::False);
    }

    #[test]
    fn loop_through_conjunction() {
        // r :- a.  r :- b, r.
        let mut f = LogicFormula::new();
        let r = f.new_placeholder();
        let a = atom(&mut f, 0, "a");
        let b = atom(&mut f, 1, "b");
        let br = f.add_and(&[b, r.into()]);
        f.add_disjunct(r, a);
        f.add_disjunct(r, br);
        f.add_query(Term::atom("r"), r.into());
        let out = break_cycles(&f, &CancellationToken::new()).unwrap();
        assert!(is_acyclic(&out));
        assert_eq!(out.queries()[0].1, a_in(&out));
    }

    fn a_in(f: &LogicFormula) -> FormulaRef {
        f.atoms()
            .find(|(_, n)| matches!(n, Node::Atom { label, .. } if label.is_atom("a")))
            .map(|(id, _)| FormulaRef::Node(id))
            .unwrap()
    }

    #[test]
    fn negative_cycle_rejected() {
        let mut f = LogicFormula::new();
        let p = f.new_placeholder();
        let np = f.add_not(p.into());
        f.add_disjunct(p, np);
        f.add_query(Term::atom("p"), p.into());
        assert!(matches!(
            break_cycles(&f, &CancellationToken::new()),
            Err(CycleError::CyclicNonConvergence { .. })
        ));
    }

    /// `p_i :- a_i` and `p_i :- b_ij, p_j` for every ordered pair.
    fn dense_component(n: u32) -> LogicFormula {
        let mut f = LogicFormula::new();
        let defs: Vec<NodeId> = (0..n).map(|_| f.new_placeholder()).collect();
        for i in 0..n {
            let a = atom(&mut f, i, &format!("a{i}"));
            f.add_disjunct(defs[i as usize], a);
            for j in 0..n {
                if i != j {
                    let b = atom(&mut f, 100 + i * n + j, &format!("b{i}_{j}"));
                    let step = f.add_and(&[b, defs[j as usize].into()]);
                    f.add_disjunct(defs[i as usize], step);
                }
            }
        }
        f.add_query(Term::atom("p0"), defs[0].into());
        f
    }

    #[test]
    fn dense_component_grows_polynomially() {
        let f = dense_component(8);
        let out = break_cycles(&f, &CancellationToken::new()).unwrap();
        assert!(is_acyclic(&out));
        // 8 definitions and 56 conjunctions, unrolled at most 8 times.
        assert!(out.len() <= f.len() + 9 * 64, "{} nodes", out.len());
        assert_eq!(out.atoms().count(), 8 + 56);
    }

    #[test]
    fn cancelled_before_unrolling() {
        let f = dense_component(3);
        let cancel = CancellationToken::new();
        cancel.cancel();
        assert!(matches!(
            break_cycles(&f, &cancel),
            Err(CycleError::BreakingTimeout { .. })
        ));
    }
}
