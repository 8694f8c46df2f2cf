//! The weighted Boolean formula produced by grounding.
//!
//! A [`LogicFormula`] is an arena of nodes addressed by [`NodeId`]. Atom
//! nodes are interned by their [`ChoiceKey`] and gate nodes by their sorted
//! children, so structurally identical subformulas share one node. The only
//! mutable nodes are the OR "definition" placeholders created for tabled
//! answers, which collect disjuncts while resolution runs and may form
//! cycles.

pub mod text;

use std::collections::{BTreeMap, HashMap};
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::clause::{ClauseId, Probability};
use crate::term::Term;

/// Index of a node in the formula arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[repr(transparent)]
pub struct NodeId(pub u32);

impl NodeId {
    fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A reference to a subformula, with the two constants folded out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum FormulaRef {
    True,
    False,
    Node(NodeId),
}

impl From<NodeId> for FormulaRef {
    fn from(id: NodeId) -> Self {
        FormulaRef::Node(id)
    }
}

impl From<bool> for FormulaRef {
    fn from(value: bool) -> Self {
        if value { FormulaRef::True } else { FormulaRef::False }
    }
}

impl fmt::Display for FormulaRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FormulaRef::True => write!(f, "true"),
            FormulaRef::False => write!(f, "false"),
            FormulaRef::Node(id) => write!(f, "{id}"),
        }
    }
}

/// Identity of one probabilistic choice: clause, head branch and the values
/// of the clause's grounding variables.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ChoiceKey {
    pub clause: ClauseId,
    pub branch: usize,
    pub grounding: Vec<Term>,
}

/// Identity of one annotated-disjunction instance. Its member choices are
/// mutually exclusive.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct GroupKey {
    pub clause: ClauseId,
    pub grounding: Vec<Term>,
}

/// A formula node.
#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    /// A probabilistic choice with its weight and the ground head it makes
    /// true.
    Atom {
        key: ChoiceKey,
        probability: Probability,
        label: Term,
        group: Option<GroupKey>,
    },
    And(Vec<NodeId>),
    Or(Vec<NodeId>),
    Not(NodeId),
}

impl Node {
    /// Child nodes (empty for atoms).
    pub fn children(&self) -> &[NodeId] {
        match self {
            Node::Atom { .. } => &[],
            Node::And(c) | Node::Or(c) => c,
            Node::Not(c) => std::slice::from_ref(c),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum GateKey {
    And(Vec<NodeId>),
    Or(Vec<NodeId>),
    Not(NodeId),
}

/// Arena of interned formula nodes plus the query and evidence roots.
#[derive(Debug, Clone, Default)]
pub struct LogicFormula {
    nodes: Vec<Node>,
    atoms: HashMap<ChoiceKey, NodeId>,
    gates: HashMap<GateKey, NodeId>,
    groups: BTreeMap<GroupKey, Vec<NodeId>>,
    queries: Vec<(Term, FormulaRef)>,
    evidence: Vec<(Term, FormulaRef, bool)>,
}

impl LogicFormula {
    /// An empty formula.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of nodes.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Whether the arena is empty.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// The node at `id`.
    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id.index()]
    }

    /// All nodes with their ids.
    pub fn nodes(&self) -> impl Iterator<Item = (NodeId, &Node)> {
        self.nodes.iter().enumerate().map(|(i, n)| (NodeId(i as u32), n))
    }

    /// Probabilistic atoms with their ids.
    pub fn atoms(&self) -> impl Iterator<Item = (NodeId, &Node)> {
        self.nodes().filter(|(_, n)| matches!(n, Node::Atom { .. }))
    }

    /// The atom node for `key`, if grounded.
    pub fn atom_for(&self, key: &ChoiceKey) -> Option<NodeId> {
        self.atoms.get(key).copied()
    }

    /// Annotated-disjunction groups and their member atoms.
    pub fn groups(&self) -> &BTreeMap<GroupKey, Vec<NodeId>> {
        &self.groups
    }

    fn push(&mut self, node: Node) -> NodeId {
        let id = NodeId(self.nodes.len() as u32);
        self.nodes.push(node);
        id
    }

    fn intern_gate(&mut self, key: GateKey) -> NodeId {
        if let Some(id) = self.gates.get(&key) {
            return *id;
        }
        let node = match &key {
            GateKey::And(c) => Node::And(c.clone()),
            GateKey::Or(c) => Node::Or(c.clone()),
            GateKey::Not(c) => Node::Not(*c),
        };
        let id = self.push(node);
        self.gates.insert(key, id);
        id
    }

    /// Add (or reuse) the atom for `key`.
    pub fn add_atom(
        &mut self,
        key: ChoiceKey,
        probability: Probability,
        label: Term,
        group: Option<GroupKey>,
    ) -> NodeId {
        if let Some(id) = self.atoms.get(&key) {
            return *id;
        }
        let id = self.push(Node::Atom {
            key: key.clone(),
            probability,
            label,
            group: group.clone(),
        });
        self.atoms.insert(key, id);
        if let Some(g) = group {
            self.groups.entry(g).or_default().push(id);
        }
        id
    }

    /// The interned empty conjunction, used where a node id must stand for
    /// TRUE.
    pub fn true_node(&mut self) -> NodeId {
        self.intern_gate(GateKey::And(Vec::new()))
    }

    fn has_complementary_pair(&self, ids: &[NodeId]) -> bool {
        ids.iter()
            .filter_map(|id| match self.node(*id) {
                Node::Not(c) => Some(*c),
                _ => None,
            })
            .any(|c| ids.binary_search(&c).is_ok())
    }

    /// Conjunction with constant folding and interning.
    pub fn add_and(&mut self, children: &[FormulaRef]) -> FormulaRef {
        let mut ids = Vec::with_capacity(children.len());
        for c in children {
            match c {
                FormulaRef::False => return FormulaRef::False,
                FormulaRef::True => {}
                FormulaRef::Node(id) => ids.push(*id),
            }
        }
        ids.sort_unstable();
        ids.dedup();
        match ids.len() {
            0 => FormulaRef::True,
            1 => FormulaRef::Node(ids[0]),
            _ if self.has_complementary_pair(&ids) => FormulaRef::False,
            _ => FormulaRef::Node(self.intern_gate(GateKey::And(ids))),
        }
    }

    /// Disjunction with constant folding and interning.
    pub fn add_or(&mut self, children: &[FormulaRef]) -> FormulaRef {
        let mut ids = Vec::with_capacity(children.len());
        for c in children {
            match c {
                FormulaRef::True => return FormulaRef::True,
                FormulaRef::False => {}
                FormulaRef::Node(id) => ids.push(*id),
            }
        }
        ids.sort_unstable();
        ids.dedup();
        match ids.len() {
            0 => FormulaRef::False,
            1 => FormulaRef::Node(ids[0]),
            _ if self.has_complementary_pair(&ids) => FormulaRef::True,
            _ => FormulaRef::Node(self.intern_gate(GateKey::Or(ids))),
        }
    }

    /// Negation; double negations cancel.
    pub fn add_not(&mut self, child: FormulaRef) -> FormulaRef {
        match child {
            FormulaRef::True => FormulaRef::False,
            FormulaRef::False => FormulaRef::True,
            FormulaRef::Node(id) => {
                if let Node::Not(inner) = self.node(id) {
                    return FormulaRef::Node(*inner);
                }
                FormulaRef::Node(self.intern_gate(GateKey::Not(id)))
            }
        }
    }

    /// A fresh, empty (FALSE) disjunction that is never interned. Tabled
    /// answers use it as their definition node.
    pub fn new_placeholder(&mut self) -> NodeId {
        self.push(Node::Or(Vec::new()))
    }

    /// Add a disjunct to a placeholder. Returns whether the node changed.
    pub fn add_disjunct(&mut self, placeholder: NodeId, disjunct: FormulaRef) -> bool {
        let child = match disjunct {
            FormulaRef::False => return false,
            FormulaRef::Node(id) if id == placeholder => return false,
            FormulaRef::Node(id) => id,
            FormulaRef::True => self.true_node(),
        };
        match &mut self.nodes[placeholder.index()] {
            Node::Or(children) if !children.contains(&child) => {
                children.push(child);
                true
            }
            _ => false,
        }
    }

    /// Register a query root.
    pub fn add_query(&mut self, term: Term, root: FormulaRef) {
        self.queries.push((term, root));
    }

    /// Register an evidence root with its observed value.
    pub fn add_evidence(&mut self, term: Term, root: FormulaRef, value: bool) {
        self.evidence.push((term, root, value));
    }

    /// Query roots in registration order.
    pub fn queries(&self) -> &[(Term, FormulaRef)] {
        &self.queries
    }

    /// Evidence roots in registration order.
    pub fn evidence(&self) -> &[(Term, FormulaRef, bool)] {
        &self.evidence
    }

    /// Replace the query and evidence roots.
    pub(crate) fn set_roots(
        &mut self,
        queries: Vec<(Term, FormulaRef)>,
        evidence: Vec<(Term, FormulaRef, bool)>,
    ) {
        self.queries = queries;
        self.evidence = evidence;
    }

    /// Append a raw node, re-registering its interning key. Used when
    /// reading a dumped formula back.
    pub(crate) fn push_raw(&mut self, node: Node) -> NodeId {
        let key = match &node {
            Node::Atom { key, group, .. } => {
                let id = NodeId(self.nodes.len() as u32);
                self.atoms.entry(key.clone()).or_insert(id);
                if let Some(g) = group {
                    self.groups.entry(g.clone()).or_default().push(id);
                }
                None
            }
            Node::And(c) => Some(GateKey::And(c.clone())),
            Node::Or(c) => Some(GateKey::Or(c.clone())),
            Node::Not(c) => Some(GateKey::Not(*c)),
        };
        let id = self.push(node);
        if let Some(k) = key {
            self.gates.entry(k).or_insert(id);
        }
        id
    }

    /// Nodes reachable from the query and evidence roots.
    pub fn reachable(&self) -> Vec<bool> {
        let mut seen = vec![false; self.nodes.len()];
        let mut stack: Vec<NodeId> = self
            .queries
            .iter()
            .map(|(_, r)| *r)
            .chain(self.evidence.iter().map(|(_, r, _)| *r))
            .filter_map(|r| match r {
                FormulaRef::Node(id) => Some(id),
                _ => None,
            })
            .collect();
        while let Some(id) = stack.pop() {
            if std::mem::replace(&mut seen[id.index()], true) {
                continue;
            }
            stack.extend(self.node(id).children().iter().copied());
        }
        seen
    }
}
