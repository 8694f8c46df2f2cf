//! Tseitin CNF encoding of an acyclic formula, and DIMACS text.
//!
//! Every atom, AND and OR node gets one variable; NOT nodes become negated
//! literals. Annotated-disjunction groups get an extra null variable and an
//! exactly-one constraint over the null and the encoded branches, so the
//! null variable carries the mass of every branch that is absent or
//! unreached.

use std::collections::HashMap;
use std::fmt::Write as _;

use crate::clause::Probability;
use crate::compile::LiteralWeights;
use crate::cycles;
use crate::error::{CompileError, CompileResult};
use crate::formula::{ChoiceKey, FormulaRef, GroupKey, LogicFormula, Node, NodeId};
use crate::semiring::Semiring;
use crate::term::Term;

/// DIMACS-style literal: `v` or `-v` for variable `v >= 1`.
pub type Literal = i32;

/// What a CNF variable stands for.
#[derive(Debug, Clone, PartialEq)]
pub enum VarInfo {
    /// Tseitin variable of an AND or OR node.
    Gate(NodeId),
    /// A probabilistic choice.
    Choice {
        node: NodeId,
        key: ChoiceKey,
        probability: Probability,
        label: Term,
        group: Option<GroupKey>,
    },
    /// The "no branch" outcome of an annotated disjunction.
    Null { group: GroupKey, weight: f64 },
    /// A variable read from DIMACS text, weighted one either way.
    Plain,
}

/// A root mapped to a literal or a constant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CnfRoot {
    True,
    False,
    Literal(Literal),
}

/// Clauses plus the meaning of every variable and the mapped roots.
#[derive(Debug, Clone, Default)]
pub struct Cnf {
    vars: Vec<VarInfo>,
    clauses: Vec<Vec<Literal>>,
    queries: Vec<(Term, CnfRoot)>,
    evidence: Vec<(Term, CnfRoot, bool)>,
}

impl Cnf {
    /// Encode the part of `formula` reachable from its roots.
    pub fn from_formula(formula: &LogicFormula) -> CompileResult<Cnf> {
        if let Some(node) = cycles::find_cycle(formula) {
            return Err(CompileError::CyclicFormula { node: node.0 });
        }
        let reachable = formula.reachable();
        let mut cnf = Cnf::default();
        let mut vars: Vec<Option<Literal>> = vec![None; formula.len()];

        for (id, node) in formula.nodes() {
            if !reachable[id.0 as usize] {
                continue;
            }
            let info = match node {
                Node::Atom {
                    key,
                    probability,
                    label,
                    group,
                } => VarInfo::Choice {
                    node: id,
                    key: key.clone(),
                    probability: probability.clone(),
                    label: label.clone(),
                    group: group.clone(),
                },
                Node::And(_) | Node::Or(_) => VarInfo::Gate(id),
                Node::Not(_) => continue,
            };
            vars[id.0 as usize] = Some(cnf.new_var(info));
        }

        let literal = |mut id: NodeId| -> Literal {
            let mut sign = 1;
            while let Node::Not(child) = formula.node(id) {
                sign = -sign;
                id = *child;
            }
            // Every reachable non-NOT node was given a variable above.
            sign * vars[id.0 as usize].unwrap_or(0)
        };

        for (id, node) in formula.nodes() {
            let Some(g) = vars[id.0 as usize] else {
                continue;
            };
            match node {
                Node::And(children) => {
                    let mut all = vec![g];
                    for c in children {
                        let l = literal(*c);
                        cnf.clauses.push(vec![-g, l]);
                        all.push(-l);
                    }
                    cnf.clauses.push(all);
                }
                Node::Or(children) => {
                    let mut any = vec![-g];
                    for c in children {
                        let l = literal(*c);
                        cnf.clauses.push(vec![g, -l]);
                        any.push(l);
                    }
                    cnf.clauses.push(any);
                }
                _ => {}
            }
        }

        for (group, members) in formula.groups() {
            let encoded: Vec<(Literal, f64)> = members
                .iter()
                .filter_map(|m| {
                    let v = vars[m.0 as usize]?;
                    match formula.node(*m) {
                        Node::Atom { probability, .. } => Some((v, probability.default_weight())),
                        _ => None,
                    }
                })
                .collect();
            if encoded.is_empty() {
                continue;
            }
            let used: f64 = encoded.iter().map(|(_, w)| w).sum();
            let null = cnf.new_var(VarInfo::Null {
                group: group.clone(),
                weight: (1.0 - used).max(0.0),
            });
            let mut outcomes: Vec<Literal> = encoded.iter().map(|(v, _)| *v).collect();
            outcomes.push(null);
            cnf.clauses.push(outcomes.clone());
            for (i, a) in outcomes.iter().enumerate() {
                for b in &outcomes[i + 1..] {
                    cnf.clauses.push(vec![-a, -b]);
                }
            }
        }

        let root = |r: FormulaRef| match r {
            FormulaRef::True => CnfRoot::True,
            FormulaRef::False => CnfRoot::False,
            FormulaRef::Node(id) => CnfRoot::Literal(literal(id)),
        };
        cnf.queries = formula.queries().iter().map(|(t, r)| (t.clone(), root(*r))).collect();
        cnf.evidence = formula
            .evidence()
            .iter()
            .map(|(t, r, v)| (t.clone(), root(*r), *v))
            .collect();
        for (_, r, value) in &cnf.evidence {
            match (r, value) {
                (CnfRoot::Literal(l), true) => cnf.clauses.push(vec![*l]),
                (CnfRoot::Literal(l), false) => cnf.clauses.push(vec![-l]),
                (CnfRoot::True, false) | (CnfRoot::False, true) => cnf.clauses.push(Vec::new()),
                _ => {}
            }
        }

        tracing::debug!(
            vars = cnf.num_vars(),
            clauses = cnf.clauses.len(),
            "cnf encoded"
        );
        Ok(cnf)
    }

    fn new_var(&mut self, info: VarInfo) -> Literal {
        self.vars.push(info);
        self.vars.len() as Literal
    }

    pub fn num_vars(&self) -> u32 {
        self.vars.len() as u32
    }

    pub fn clauses(&self) -> &[Vec<Literal>] {
        &self.clauses
    }

    /// Meaning of variable `var` (1-based).
    pub fn var_info(&self, var: u32) -> Option<&VarInfo> {
        self.vars.get((var as usize).checked_sub(1)?)
    }

    pub fn queries(&self) -> &[(Term, CnfRoot)] {
        &self.queries
    }

    pub fn evidence(&self) -> &[(Term, CnfRoot, bool)] {
        &self.evidence
    }

    /// Literal weights under `semiring`. Decision choices take their value
    /// from `decisions` and default to false.
    pub fn weights<S: Semiring>(
        &self,
        semiring: &S,
        decisions: &HashMap<Term, bool>,
    ) -> LiteralWeights<S::Value> {
        let mut weights = LiteralWeights::new(self.num_vars(), semiring.one());
        for (i, info) in self.vars.iter().enumerate() {
            let v = i as Literal + 1;
            match info {
                VarInfo::Gate(_) | VarInfo::Plain => {}
                VarInfo::Choice {
                    probability: Probability::Decision,
                    label,
                    ..
                } => {
                    let on = decisions.get(label).copied().unwrap_or(false);
                    let (pos, neg) = if on {
                        (semiring.one(), semiring.zero())
                    } else {
                        (semiring.zero(), semiring.one())
                    };
                    weights.set(v, pos);
                    weights.set(-v, neg);
                }
                VarInfo::Choice {
                    probability,
                    label,
                    group,
                    ..
                } => {
                    let pos = semiring.value(probability, label);
                    if group.is_none() {
                        weights.set(-v, semiring.negate(&pos));
                    }
                    weights.set(v, pos);
                }
                VarInfo::Null { weight, .. } => {
                    let null = semiring.value(&Probability::Value(*weight), &Term::atom("null"));
                    weights.set(v, null);
                }
            }
        }
        weights
    }

    /// DIMACS text with one comment line per variable.
    pub fn to_dimacs(&self) -> String {
        let mut out = String::new();
        for (i, info) in self.vars.iter().enumerate() {
            let v = i + 1;
            let _ = match info {
                VarInfo::Gate(node) => writeln!(out, "c var {v} gate {node}"),
                VarInfo::Choice {
                    probability, label, ..
                } => writeln!(out, "c var {v} choice {probability}::{label}"),
                VarInfo::Null { weight, .. } => writeln!(out, "c var {v} null {weight}"),
                VarInfo::Plain => writeln!(out, "c var {v}"),
            };
        }
        let _ = writeln!(out, "p cnf {} {}", self.num_vars(), self.clauses.len());
        for clause in &self.clauses {
            for l in clause {
                let _ = write!(out, "{l} ");
            }
            out.push_str("0\n");
        }
        out
    }

    /// Read DIMACS CNF. Variables are [`VarInfo::Plain`] and there are no
    /// roots.
    pub fn from_dimacs(src: &str) -> CompileResult<Cnf> {
        let mut declared: Option<(u32, usize)> = None;
        let mut clauses = Vec::new();
        let mut current = Vec::new();
        for (i, raw) in src.lines().enumerate() {
            let line = i + 1;
            let raw = raw.trim();
            if raw.is_empty() || raw.starts_with('c') || raw.starts_with('%') {
                continue;
            }
            let err = |message: String| CompileError::Dimacs { line, message };
            if raw.starts_with('p') {
                let parts: Vec<&str> = raw.split_whitespace().collect();
                match parts.as_slice() {
                    ["p", "cnf", v, c] => {
                        let v = v.parse().map_err(|_| err(format!("bad variable count `{v}`")))?;
                        let c = c.parse().map_err(|_| err(format!("bad clause count `{c}`")))?;
                        declared = Some((v, c));
                    }
                    _ => return Err(err(format!("malformed header `{raw}`"))),
                }
                continue;
            }
            let Some((num_vars, _)) = declared else {
                return Err(err("clause before `p cnf` header".into()));
            };
            for token in raw.split_whitespace() {
                let l: Literal = token.parse().map_err(|_| err(format!("bad literal `{token}`")))?;
                if l == 0 {
                    clauses.push(std::mem::take(&mut current));
                } else if l.unsigned_abs() > num_vars {
                    return Err(err(format!("literal {l} exceeds {num_vars} variables")));
                } else {
                    current.push(l);
                }
            }
        }
        let Some((num_vars, count)) = declared else {
            return Err(CompileError::Dimacs {
                line: 0,
                message: "missing `p cnf` header".into(),
            });
        };
        if !current.is_empty() {
            clauses.push(current);
        }
        if clauses.len() != count {
            return Err(CompileError::Dimacs {
                line: 0,
                message: format!("header declares {count} clauses, found {}", clauses.len()),
            });
        }
        Ok(Cnf {
            vars: vec![VarInfo::Plain; num_vars as usize],
            clauses,
            queries: Vec::new(),
            evidence: Vec::new(),
        })
    }
}
