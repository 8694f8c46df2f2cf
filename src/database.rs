//! Clause database with copy-on-extend overlays.
//!
//! A [`Database`] is a stack of layers. [`Database::extend`] freezes the
//! current database behind an `Arc` and returns a child that shares every
//! ancestor clause by reference. Assertions go into the child's own layer;
//! retracting an ancestor clause only masks it in the child. An overlay never
//! mutates its ancestors.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

use crate::clause::{Clause, ClauseId};
use crate::error::DatabaseResult;
use crate::term::{Indicator, Substitution, Term, unify};

/// One head of a stored clause, as returned by [`Database::lookup`].
///
/// `branch` selects the head of an annotated disjunction (0 otherwise).
#[derive(Debug, Clone)]
pub struct ClauseRef {
    pub clause: Arc<Clause>,
    pub branch: usize,
}

impl ClauseRef {
    /// The head atom this reference matches on.
    pub fn head(&self) -> &Term {
        // Branch indices are only created from existing head terms.
        self.clause.head().terms()[self.branch]
    }
}

#[derive(Debug, Clone, Default)]
struct Layer {
    clauses: Vec<Arc<Clause>>,
    index: HashMap<Indicator, Vec<ClauseRef>>,
}

impl Layer {
    fn push(&mut self, clause: Arc<Clause>) {
        for (branch, head) in clause.head().terms().into_iter().enumerate() {
            if let Some(ind) = head.indicator() {
                self.index.entry(ind).or_default().push(ClauseRef {
                    clause: clause.clone(),
                    branch,
                });
            }
        }
        self.clauses.push(clause);
    }

    fn remove(&mut self, id: ClauseId) -> Option<Arc<Clause>> {
        let pos = self.clauses.iter().position(|c| c.id() == id)?;
        let removed = self.clauses.remove(pos);
        for refs in self.index.values_mut() {
            refs.retain(|r| r.clause.id() != id);
        }
        self.index.retain(|_, refs| !refs.is_empty());
        Some(removed)
    }
}

/// Indexed, append-only collection of clauses.
#[derive(Debug, Clone, Default)]
pub struct Database {
    parent: Option<Arc<Database>>,
    local: Arc<Layer>,
    masked: Arc<HashSet<ClauseId>>,
    next_id: u32,
}

impl Database {
    /// An empty database.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a database from a clause stream.
    pub fn load(clauses: impl IntoIterator<Item = Clause>) -> Self {
        let mut db = Self::new();
        for clause in clauses {
            db.assert(clause);
        }
        tracing::debug!(clauses = db.len(), "database loaded");
        db
    }

    /// Build a database from canonical-notation clauses, one per line.
    ///
    /// Blank lines and lines starting with `%` are skipped.
    pub fn load_str(src: &str) -> DatabaseResult<Self> {
        let mut db = Self::new();
        for line in src.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('%') {
                continue;
            }
            db.assert(Clause::parse(line)?);
        }
        Ok(db)
    }

    /// Add a clause at the end of its predicates and return its id.
    pub fn assert(&mut self, clause: Clause) -> ClauseId {
        let id = ClauseId(self.next_id);
        self.next_id += 1;
        Arc::make_mut(&mut self.local).push(Arc::new(clause.with_id(id)));
        id
    }

    /// Remove the first clause (in source order) whose head unifies with
    /// `pattern`.
    pub fn retract(&mut self, pattern: &Term) -> Option<Arc<Clause>> {
        let target = self.matching(pattern).into_iter().next()?;
        self.remove(&target);
        Some(target)
    }

    /// Remove every clause whose head unifies with `pattern`.
    pub fn retract_all(&mut self, pattern: &Term) -> usize {
        let targets = self.matching(pattern);
        for clause in &targets {
            self.remove(clause);
        }
        targets.len()
    }

    fn matching(&self, pattern: &Term) -> Vec<Arc<Clause>> {
        let Some(ind) = pattern.indicator() else {
            return Vec::new();
        };
        // Clause variables are numbered from 0; move the pattern out of the way.
        let offset = self.lookup(&ind).iter().map(|r| r.clause.n_vars() as u64).max().unwrap_or(0);
        let pattern = pattern.offset_vars(offset);
        let mut seen = HashSet::new();
        self.lookup(&ind)
            .into_iter()
            .filter(|r| unify(r.head(), &pattern, &Substitution::new()).is_some())
            .filter(|r| seen.insert(r.clause.id()))
            .map(|r| r.clause)
            .collect()
    }

    fn remove(&mut self, clause: &Clause) {
        let id = clause.id();
        if Arc::make_mut(&mut self.local).remove(id).is_none() {
            Arc::make_mut(&mut self.masked).insert(id);
        }
    }

    /// A child overlay sharing this database's clauses.
    pub fn extend(&self) -> Database {
        Database {
            parent: Some(Arc::new(self.clone())),
            local: Arc::new(Layer::default()),
            masked: Arc::new(HashSet::new()),
            next_id: self.next_id,
        }
    }

    /// Clause heads for `indicator`, in source order.
    pub fn lookup(&self, indicator: &Indicator) -> Vec<ClauseRef> {
        let mut out = match &self.parent {
            Some(parent) => parent.lookup(indicator),
            None => Vec::new(),
        };
        if !self.masked.is_empty() {
            out.retain(|r| !self.masked.contains(&r.clause.id()));
        }
        if let Some(local) = self.local.index.get(indicator) {
            out.extend(local.iter().cloned());
        }
        out
    }

    /// All visible clauses in source order.
    pub fn clauses(&self) -> Vec<Arc<Clause>> {
        let mut out = match &self.parent {
            Some(parent) => parent.clauses(),
            None => Vec::new(),
        };
        out.retain(|c| !self.masked.contains(&c.id()));
        out.extend(self.local.clauses.iter().cloned());
        out
    }

    /// Number of visible clauses.
    pub fn len(&self) -> usize {
        self.clauses().len()
    }

    /// Whether no clause is visible.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Defined predicates, sorted.
    pub fn predicates(&self) -> Vec<Indicator> {
        let mut set: Vec<Indicator> = self
            .clauses()
            .iter()
            .flat_map(|c| {
                c.head()
                    .terms()
                    .into_iter()
                    .filter_map(Term::indicator)
                    .collect::<Vec<_>>()
            })
            .collect();
        set.sort();
        set.dedup();
        set
    }

    /// Whether any clause defines `indicator`.
    pub fn defines(&self, indicator: &Indicator) -> bool {
        !self.lookup(indicator).is_empty()
    }
}

impl fmt::Display for Database {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for clause in self.clauses() {
            writeln!(f, "{clause}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clause::{fact, prob_fact, rule};
    use crate::term::{VarScope, parse_term};

    fn pat(s: &str) -> Term {
        parse_term(s, &mut VarScope::new()).unwrap()
    }

    fn edges() -> Database {
        Database::load(vec![
            fact("edge(a, b)").unwrap(),
            fact("edge(b, c)").unwrap(),
            rule("path(X, Y)", &["edge(X, Y)"]).unwrap(),
            fact("edge(c, a)").unwrap(),
        ])
    }

    #[test]
    fn lookup_preserves_source_order() {
        let db = edges();
        let heads: Vec<String> = db
            .lookup(&Indicator::new("edge", 2))
            .iter()
            .map(|r| r.head().to_string())
            .collect();
        assert_eq!(heads, vec!["edge(a,b)", "edge(b,c)", "edge(c,a)"]);
        assert!(db.lookup(&Indicator::new("edge", 3)).is_empty());
    }

    #[test]
    fn retract_removes_first_match_only() {
        let mut db = edges();
        let removed = db.retract(&pat("edge(_, _)")).unwrap();
        assert_eq!(removed.to_string(), "edge(a,b).");
        assert_eq!(db.lookup(&Indicator::new("edge", 2)).len(), 2);
    }

    #[test]
    fn retract_all_removes_every_match() {
        let mut db = edges();
        assert_eq!(db.retract_all(&pat("edge(X, Y)")), 3);
        assert_eq!(db.len(), 1);
        assert_eq!(db.retract_all(&pat("edge(X, Y)")), 0);
    }

    #[test]
    fn extension_does_not_mutate_parent() {
        let base = edges();
        let mut child = base.extend();
        child.assert(fact("edge(c, d)").unwrap());
        child.retract(&pat("edge(a, b)"));
        assert_eq!(base.lookup(&Indicator::new("edge", 2)).len(), 3);
        let heads: Vec<String> = child
            .lookup(&Indicator::new("edge", 2))
            .iter()
            .map(|r| r.head().to_string())
            .collect();
        assert_eq!(heads, vec!["edge(b,c)", "edge(c,a)", "edge(c,d)"]);
    }

    #[test]
    fn child_ids_continue_after_parent() {
        let base = edges();
        let mut child = base.extend();
        let id = child.assert(fact("x").unwrap());
        assert_eq!(id, ClauseId(4));
    }

    #[test]
    fn annotated_heads_indexed_per_branch() {
        let mut db = Database::new();
        db.assert(
            crate::clause::ClauseBuilder::new("red")
                .probability(0.3)
                .or_head(0.5, "green")
                .build()
                .unwrap(),
        );
        let r = db.lookup(&Indicator::new("green", 0));
        assert_eq!(r.len(), 1);
        assert_eq!(r[0].branch, 1);
        assert_eq!(db.predicates().len(), 2);
    }

    #[test]
    fn listing_prints_clauses() {
        let db = Database::load(vec![
            prob_fact(0.5, "heads1").unwrap(),
            rule("h", &["heads1"]).unwrap(),
        ]);
        assert_eq!(db.to_string(), "0.5::heads1.\nh :- heads1.\n");
    }

    #[test]
    fn load_str_reads_lines() {
        let db = Database::load_str(
            "% coins\n'::'(0.5, heads1).\n\n':-'(someHeads, heads1).\n",
        )
        .unwrap();
        assert_eq!(db.len(), 2);
        assert!(db.defines(&Indicator::new("someHeads", 0)));
    }
}
