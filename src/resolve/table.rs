//! Tabling cache: one table per variant call, holding its distinct answers.

use std::collections::HashMap;

use crate::formula::NodeId;
use crate::term::Term;

pub(crate) type TableId = usize;

/// Evaluation state of a table.
///
/// `Active` tables are on the evaluation stack. A table that finished a pass
/// while depending on an older active table is `Incomplete`: its answers are
/// usable but may still grow, and it is re-evaluated once per leader
/// iteration (`stamp`). `lowlink` is the oldest depth-first number it depends
/// on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TableState {
    Fresh,
    Active { dfn: usize },
    Incomplete { lowlink: usize, stamp: u64 },
    Complete,
}

/// One distinct answer. `term` is variant-canonical; `node` is the answer's
/// definition node when a formula is being built.
#[derive(Debug, Clone)]
pub(crate) struct Answer {
    pub term: Term,
    pub width: u64,
    pub node: Option<NodeId>,
}

#[derive(Debug)]
pub(crate) struct Table {
    pub goal: Term,
    pub state: TableState,
    pub answers: Vec<Answer>,
    index: HashMap<Term, usize>,
}

impl Table {
    fn new(goal: Term) -> Self {
        Self {
            goal,
            state: TableState::Fresh,
            answers: Vec::new(),
            index: HashMap::new(),
        }
    }

    /// Position of the answer variant `term`, if already recorded.
    pub fn find(&self, term: &Term) -> Option<usize> {
        self.index.get(term).copied()
    }

    /// Record a new answer variant and return its position.
    pub fn push(&mut self, term: Term, node: Option<NodeId>) -> usize {
        let width = term.vars().iter().map(|v| v.get() + 1).max().unwrap_or(0);
        let pos = self.answers.len();
        self.index.insert(term.clone(), pos);
        self.answers.push(Answer { term, width, node });
        pos
    }
}

/// All tables of one resolution pass, keyed by canonical call.
#[derive(Debug, Default)]
pub(crate) struct TableStore {
    tables: Vec<Table>,
    by_goal: HashMap<Term, TableId>,
}

impl TableStore {
    /// The table for canonical call `goal`, created fresh if absent.
    pub fn lookup_or_create(&mut self, goal: Term) -> TableId {
        if let Some(id) = self.by_goal.get(&goal) {
            return *id;
        }
        let id = self.tables.len();
        self.by_goal.insert(goal.clone(), id);
        self.tables.push(Table::new(goal));
        id
    }

    pub fn get(&self, id: TableId) -> &Table {
        &self.tables[id]
    }

    pub fn get_mut(&mut self, id: TableId) -> &mut Table {
        &mut self.tables[id]
    }

    pub fn stats(&self) -> TableStats {
        TableStats {
            tables: self.tables.len(),
            complete: self
                .tables
                .iter()
                .filter(|t| t.state == TableState::Complete)
                .count(),
            answers: self.tables.iter().map(|t| t.answers.len()).sum(),
        }
    }
}

/// An evaluation-stack entry.
#[derive(Debug, Clone)]
pub(crate) struct Frame {
    pub table: TableId,
    pub dfn: usize,
    pub lowlink: usize,
    /// Some call in this pass depended on this frame or an older one.
    pub cyclic: bool,
    /// Length of the incomplete list when the frame was pushed.
    pub incomplete_mark: usize,
}

/// Size summary of a tabling cache.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TableStats {
    pub tables: usize,
    pub complete: usize,
    pub answers: usize,
}
