//! Text dump and re-parse of a [`LogicFormula`], plus DOT export.
//!
//! One canonical term per line, nodes in id order:
//!
//! ```text
//! node(0, atom(0.5, choice(0, 0, []), none, heads1))
//! node(1, atom(0.6, choice(1, 0, []), none, heads2))
//! node(2, or([0, 1]))
//! query(someHeads, 2)
//! evidence(someHeads, 2, true)
//! ```

use std::fmt::Write as _;

use super::{ChoiceKey, FormulaRef, GroupKey, LogicFormula, Node, NodeId};
use crate::clause::{ClauseId, Probability};
use crate::error::FormulaTextError;
use crate::term::{Constant, Term, VarScope, parse_term};

impl LogicFormula {
    /// Dump the formula, one node or root per line.
    pub fn to_text(&self) -> String {
        let mut out = String::new();
        for (id, node) in self.nodes() {
            let body = match node {
                Node::Atom {
                    key,
                    probability,
                    label,
                    group,
                } => {
                    let group = match group {
                        Some(g) => format!(
                            "group({}, {})",
                            g.clause.0,
                            Term::list(g.grounding.clone())
                        ),
                        None => "none".to_string(),
                    };
                    format!(
                        "atom({}, choice({}, {}, {}), {}, {})",
                        probability.to_term(),
                        key.clause.0,
                        key.branch,
                        Term::list(key.grounding.clone()),
                        group,
                        label
                    )
                }
                Node::And(c) => format!("and({})", id_list(c)),
                Node::Or(c) => format!("or({})", id_list(c)),
                Node::Not(c) => format!("not({c})"),
            };
            let _ = writeln!(out, "node({id}, {body})");
        }
        for (term, root) in self.queries() {
            let _ = writeln!(out, "query({term}, {root})");
        }
        for (term, root, value) in self.evidence() {
            let _ = writeln!(out, "evidence({term}, {root}, {value})");
        }
        out
    }

    /// Read a dump produced by [`to_text`](Self::to_text).
    pub fn from_text(src: &str) -> Result<LogicFormula, FormulaTextError> {
        let mut formula = LogicFormula::new();
        let mut queries = Vec::new();
        let mut evidence = Vec::new();
        for (i, raw) in src.lines().enumerate() {
            let line = i + 1;
            let raw = raw.trim();
            if raw.is_empty() || raw.starts_with('%') {
                continue;
            }
            let err = |message: String| FormulaTextError::Syntax { line, message };
            let term = parse_term(raw, &mut VarScope::new()).map_err(|e| err(e.to_string()))?;
            let args = term.args();
            if term.has_functor("node", 2) {
                let id = int_arg(&args[0]).ok_or_else(|| err("node id must be an integer".into()))?;
                if id != formula.len() as i64 {
                    return Err(err(format!("expected node {}, found node {id}", formula.len())));
                }
                let node = read_node(&args[1], formula.len()).map_err(err)?;
                formula.push_raw(node);
            } else if term.has_functor("query", 2) {
                queries.push((args[0].clone(), read_ref(&args[1]).map_err(err)?));
            } else if term.has_functor("evidence", 3) {
                let value = if args[2].is_atom("true") {
                    true
                } else if args[2].is_atom("false") {
                    false
                } else {
                    return Err(err(format!(
                        "evidence value must be true or false, found {}",
                        args[2]
                    )));
                };
                evidence.push((args[0].clone(), read_ref(&args[1]).map_err(err)?, value));
            } else {
                return Err(err(format!("unknown entry `{term}`")));
            }
        }
        let len = formula.len();
        let dangling = formula
            .nodes()
            .flat_map(|(_, n)| n.children().to_vec())
            .chain(
                queries
                    .iter()
                    .map(|(_, r)| *r)
                    .chain(evidence.iter().map(|(_, r, _)| *r))
                    .filter_map(|r| match r {
                        FormulaRef::Node(id) => Some(id),
                        _ => None,
                    }),
            )
            .find(|id| id.0 as usize >= len);
        if let Some(id) = dangling {
            return Err(FormulaTextError::Syntax {
                line: 0,
                message: format!("reference to missing node {id}"),
            });
        }
        formula.set_roots(queries, evidence);
        Ok(formula)
    }

    /// Graphviz rendering of the nodes reachable from the roots.
    pub fn to_dot(&self) -> String {
        let reachable = self.reachable();
        let mut out = String::from("digraph formula {\n");
        for (id, node) in self.nodes() {
            if !reachable[id.0 as usize] {
                continue;
            }
            let (label, shape) = match node {
                Node::Atom {
                    probability, label, ..
                } => (format!("{probability}::{label}"), "ellipse"),
                Node::And(c) if c.is_empty() => ("true".to_string(), "box"),
                Node::And(_) => ("and".to_string(), "box"),
                Node::Or(_) => ("or".to_string(), "diamond"),
                Node::Not(_) => ("not".to_string(), "circle"),
            };
            let _ = writeln!(
                out,
                "  n{id} [label=\"{}\", shape={shape}];",
                label.replace('"', "\\\"")
            );
            for child in node.children() {
                let _ = writeln!(out, "  n{id} -> n{child};");
            }
        }
        for (term, root) in self.queries() {
            write_root(&mut out, &format!("query {term}"), *root);
        }
        for (term, root, value) in self.evidence() {
            write_root(&mut out, &format!("evidence {term}={value}"), *root);
        }
        out.push_str("}\n");
        out
    }
}

fn write_root(out: &mut String, label: &str, root: FormulaRef) {
    let name = format!("r{}", out.len());
    let _ = writeln!(out, "  {name} [label=\"{}\", shape=plaintext];", label.replace('"', "\\\""));
    if let FormulaRef::Node(id) = root {
        let _ = writeln!(out, "  {name} -> n{id} [style=dashed];");
    }
}

fn id_list(ids: &[NodeId]) -> String {
    let parts: Vec<String> = ids.iter().map(|id| id.to_string()).collect();
    format!("[{}]", parts.join(", "))
}

fn int_arg(term: &Term) -> Option<i64> {
    match term {
        Term::Const(Constant::Int(i)) => Some(*i),
        _ => None,
    }
}

fn read_id(term: &Term, bound: usize) -> Result<NodeId, String> {
    match int_arg(term) {
        Some(i) if i >= 0 && (i as usize) < bound => Ok(NodeId(i as u32)),
        _ => Err(format!("`{term}` is not the id of an earlier node")),
    }
}

fn read_ids(term: &Term, bound: usize) -> Result<Vec<NodeId>, String> {
    term.as_list()
        .ok_or_else(|| format!("expected a list of node ids, found `{term}`"))?
        .iter()
        .map(|t| read_id(t, bound))
        .collect()
}

fn read_ref(term: &Term) -> Result<FormulaRef, String> {
    if term.is_atom("true") {
        return Ok(FormulaRef::True);
    }
    if term.is_atom("false") {
        return Ok(FormulaRef::False);
    }
    match int_arg(term) {
        Some(i) if i >= 0 => Ok(FormulaRef::Node(NodeId(i as u32))),
        _ => Err(format!("`{term}` is not a formula reference")),
    }
}

fn read_node(term: &Term, next: usize) -> Result<Node, String> {
    let args = term.args();
    if term.has_functor("and", 1) {
        return Ok(Node::And(read_ids(&args[0], next)?));
    }
    if term.has_functor("or", 1) {
        // Definition nodes may point forward (cycles).
        return Ok(Node::Or(read_ids(&args[0], usize::MAX)?));
    }
    if term.has_functor("not", 1) {
        return Ok(Node::Not(read_id(&args[0], usize::MAX)?));
    }
    if term.has_functor("atom", 4) {
        let choice = &args[1];
        if !choice.has_functor("choice", 3) {
            return Err(format!("expected choice(Clause, Branch, Grounding), found `{choice}`"));
        }
        let c = choice.args();
        let clause = int_arg(&c[0]).ok_or("choice clause must be an integer")?;
        let branch = int_arg(&c[1]).ok_or("choice branch must be an integer")?;
        let grounding = c[2].as_list().ok_or("choice grounding must be a list")?;
        let group = if args[2].is_atom("none") {
            None
        } else if args[2].has_functor("group", 2) {
            let g = args[2].args();
            Some(GroupKey {
                clause: ClauseId(int_arg(&g[0]).ok_or("group clause must be an integer")? as u32),
                grounding: g[1].as_list().ok_or("group grounding must be a list")?,
            })
        } else {
            return Err(format!("expected none or group(..), found `{}`", args[2]));
        };
        return Ok(Node::Atom {
            key: ChoiceKey {
                clause: ClauseId(clause as u32),
                branch: branch as usize,
                grounding,
            },
            probability: Probability::from_term(&args[0]),
            label: args[3].clone(),
            group,
        });
    }
    Err(format!("unknown node `{term}`"))
}
