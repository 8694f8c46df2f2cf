//! Rich diagnostic error types for the probalog engine.
//!
//! Each subsystem defines its own error type with miette `#[diagnostic]` derives,
//! providing error codes, help text, and source chains so users know exactly what
//! went wrong and how to fix it.
//!
//! Ordinary logic-programming failure (a unification that does not succeed, a
//! call to an undefined predicate) is never an error: it simply yields no
//! answers.

use miette::Diagnostic;
use thiserror::Error;

/// Top-level error type for the probalog engine.
///
/// Each variant wraps a subsystem-specific error, preserving the full diagnostic
/// chain (error codes, help text, source spans) through to the user.
#[derive(Debug, Error, Diagnostic)]
pub enum ProbalogError {
    #[error(transparent)]
    #[diagnostic(transparent)]
    Term(#[from] TermError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Database(#[from] DatabaseError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Ground(#[from] GroundError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Cycle(#[from] CycleError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Compile(#[from] CompileError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Eval(#[from] EvalError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Sample(#[from] SampleError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    FormulaText(#[from] FormulaTextError),
}

impl ProbalogError {
    /// Whether this error was caused by a fired cancellation token.
    ///
    /// Lets batch callers tell "too slow" apart from "wrong".
    pub fn is_timeout(&self) -> bool {
        match self {
            ProbalogError::Ground(e) => e.is_timeout(),
            ProbalogError::Cycle(e) => e.is_timeout(),
            ProbalogError::Compile(e) => e.is_timeout(),
            ProbalogError::Eval(e) => e.is_timeout(),
            ProbalogError::Sample(e) => e.is_timeout(),
            _ => false,
        }
    }
}

impl GroundError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, GroundError::CompilationTimeout { .. })
    }
}

impl CycleError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, CycleError::BreakingTimeout { .. })
    }
}

impl CompileError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, CompileError::CompilationTimeout { .. })
    }
}

impl EvalError {
    pub fn is_timeout(&self) -> bool {
        match self {
            EvalError::EvaluationTimeout => true,
            EvalError::Ground(e) => e.is_timeout(),
            EvalError::Cycle(e) => e.is_timeout(),
            EvalError::Compile(e) => e.is_timeout(),
            EvalError::ContradictoryEvidence { .. } => false,
        }
    }
}

impl SampleError {
    pub fn is_timeout(&self) -> bool {
        match self {
            SampleError::Ground(e) => e.is_timeout(),
            SampleError::Eval(e) => e.is_timeout(),
            SampleError::RejectionLimit { .. } => false,
        }
    }
}

// ---------------------------------------------------------------------------
// Term errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Diagnostic)]
pub enum TermError {
    #[error("syntax error at offset {offset}: {message}")]
    #[diagnostic(
        code(probalog::term::syntax),
        help(
            "Terms are written in canonical functional notation, e.g. \
             `edge(a, X)`, `\\+(p(X))`, `[1, 2 | T]`. Operators such as \
             `a :- b` are not accepted here."
        )
    )]
    Syntax { offset: usize, message: String },

    #[error("unexpected end of input while reading a term")]
    #[diagnostic(
        code(probalog::term::unexpected_end),
        help("Check for unbalanced parentheses, brackets or quotes.")
    )]
    UnexpectedEnd,
}

// ---------------------------------------------------------------------------
// Database errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Diagnostic)]
pub enum DatabaseError {
    #[error("unsupported control construct `{construct}` in clause `{clause}`")]
    #[diagnostic(
        code(probalog::database::unsupported_control),
        help(
            "The language is a pure-logic subset: cut, if-then-else and \
             catch/throw are not available. Rewrite the clause with \
             negation (`\\+`) or separate clauses."
        )
    )]
    UnsupportedControl { construct: String, clause: String },

    #[error("invalid probability {value} in clause `{clause}`")]
    #[diagnostic(
        code(probalog::database::invalid_probability),
        help(
            "Probabilities must lie in [0, 1], and the weights of an annotated \
             disjunction must sum to at most 1."
        )
    )]
    InvalidProbability { value: f64, clause: String },

    #[error("clause head `{head}` is not callable")]
    #[diagnostic(
        code(probalog::database::invalid_head),
        help("A clause head must be an atom or a compound term, not a variable or number.")
    )]
    InvalidHead { head: String },

    #[error(transparent)]
    #[diagnostic(transparent)]
    InvalidTerm(#[from] TermError),
}

// ---------------------------------------------------------------------------
// Grounding errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Diagnostic)]
pub enum GroundError {
    #[error("probabilistic clause `{clause}` is not ground: variable {variable} is unbound")]
    #[diagnostic(
        code(probalog::ground::non_ground_clause),
        help(
            "Every variable of a probabilistic clause must be bound once its body \
             has been proved, unless it occurs only inside a negation or inside \
             the template/goal of a findall. Add a body literal that binds \
             {variable}, or make the clause deterministic."
        )
    )]
    NonGroundProbabilisticClause { clause: String, variable: String },

    #[error("query `{query}` has a non-ground answer `{answer}`")]
    #[diagnostic(
        code(probalog::ground::non_ground_query),
        help(
            "Queries must resolve to ground atoms. Restrict the query's variables \
             with a domain predicate."
        )
    )]
    NonGroundQuery { query: String, answer: String },

    #[error("evidence on `{term}` is asserted both true and false")]
    #[diagnostic(
        code(probalog::ground::conflicting_evidence),
        help("Each evidence atom may be given only one truth value.")
    )]
    ConflictingEvidence { term: String },

    #[error("cyclic dependency through negation while solving `{goal}`")]
    #[diagnostic(
        code(probalog::ground::cyclic_non_convergence),
        help(
            "The goal depends negatively on itself (directly or through other \
             predicates), so no well-founded truth value exists. Stratify the \
             program so negation never closes a cycle."
        )
    )]
    CyclicNonConvergence { goal: String },

    #[error("arguments are not sufficiently instantiated in `{goal}`")]
    #[diagnostic(
        code(probalog::ground::instantiation),
        help("Bind the variables before calling this goal (e.g. arithmetic on unbound variables).")
    )]
    Instantiation { goal: String },

    #[error("type error: expected {expected}, found `{found}`")]
    #[diagnostic(
        code(probalog::ground::type_error),
        help("The goal received a term of the wrong type.")
    )]
    Type { expected: String, found: String },

    #[error("grounding cancelled during {stage}")]
    #[diagnostic(
        code(probalog::ground::timeout),
        help("The cancellation token fired. Increase `timeout_secs` or simplify the queries.")
    )]
    CompilationTimeout { stage: String },
}

// ---------------------------------------------------------------------------
// Cycle-breaking errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Diagnostic)]
pub enum CycleError {
    #[error("cycle through negation at node {node}: no well-founded fixed point")]
    #[diagnostic(
        code(probalog::cycles::cyclic_non_convergence),
        help(
            "A strongly connected component of the formula contains a NOT node. \
             Such cycles have no unique minimal model and are never approximated."
        )
    )]
    CyclicNonConvergence { node: u32 },

    #[error("cycle breaking cancelled at component {component}")]
    #[diagnostic(
        code(probalog::cycles::timeout),
        help(
            "The cancellation token fired. Increase `timeout_secs` or shrink \
             the recursive predicates."
        )
    )]
    BreakingTimeout { component: usize },
}

// ---------------------------------------------------------------------------
// Compilation errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Diagnostic)]
pub enum CompileError {
    #[error("formula contains a cycle at node {node}")]
    #[diagnostic(
        code(probalog::compile::cyclic_formula),
        help("Run the cycle breaker (`cycles::break_cycles`) before converting to CNF.")
    )]
    CyclicFormula { node: u32 },

    #[error("compilation cancelled during {stage}")]
    #[diagnostic(
        code(probalog::compile::timeout),
        help(
            "The cancellation token fired. Increase `timeout_secs` or choose \
             another compiler backend."
        )
    )]
    CompilationTimeout { stage: String },

    #[error("malformed DIMACS input at line {line}: {message}")]
    #[diagnostic(
        code(probalog::compile::dimacs),
        help("Expected a `p cnf <vars> <clauses>` header followed by zero-terminated clauses.")
    )]
    Dimacs { line: usize, message: String },
}

// ---------------------------------------------------------------------------
// Evaluation errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Diagnostic)]
pub enum EvalError {
    #[error("evidence is contradictory: its probability is zero")]
    #[diagnostic(
        code(probalog::eval::contradictory_evidence),
        help(
            "The evidence cannot hold in any possible world, so conditional \
             probabilities are undefined. Check the evidence literals: {evidence}"
        )
    )]
    ContradictoryEvidence { evidence: String },

    #[error("evaluation cancelled")]
    #[diagnostic(
        code(probalog::eval::timeout),
        help("The cancellation token fired while aggregating query values.")
    )]
    EvaluationTimeout,

    #[error(transparent)]
    #[diagnostic(transparent)]
    Ground(#[from] GroundError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Cycle(#[from] CycleError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Compile(#[from] CompileError),
}

// ---------------------------------------------------------------------------
// Sampling errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Diagnostic)]
pub enum SampleError {
    #[error("rejection sampling gave up after {attempts} consecutive rejected samples")]
    #[diagnostic(
        code(probalog::sample::rejection_limit),
        help(
            "The evidence is very unlikely (or impossible). Use evidence \
             propagation mode, or raise `sampling.max_rejections`."
        )
    )]
    RejectionLimit { attempts: usize },

    #[error(transparent)]
    #[diagnostic(transparent)]
    Ground(#[from] GroundError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Eval(#[from] EvalError),
}

// ---------------------------------------------------------------------------
// Configuration errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Diagnostic)]
pub enum ConfigError {
    #[error("failed to read engine config: {path}")]
    #[diagnostic(
        code(probalog::config::read),
        help("Ensure the config file exists and is readable.")
    )]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse engine config: {message}")]
    #[diagnostic(
        code(probalog::config::parse),
        help("Check the TOML syntax and field names of the engine config.")
    )]
    Parse { message: String },

    #[error("invalid configuration: {message}")]
    #[diagnostic(code(probalog::config::invalid), help("Check the EngineConfig fields. {message}"))]
    Invalid { message: String },
}

// ---------------------------------------------------------------------------
// Formula text errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Diagnostic)]
pub enum FormulaTextError {
    #[error("formula dump line {line}: {message}")]
    #[diagnostic(
        code(probalog::formula::text),
        help(
            "Each line must be one of `node(Id, atom(..))`, `node(Id, and([..]))`, \
             `node(Id, or([..]))`, `node(Id, not(C))`, `query(T, Ref)` or \
             `evidence(T, Ref, Bool)`."
        )
    )]
    Syntax { line: usize, message: String },
}

/// Result alias for term construction and reading.
pub type TermResult<T> = std::result::Result<T, TermError>;
/// Result alias for database operations.
pub type DatabaseResult<T> = std::result::Result<T, DatabaseError>;
/// Result alias for grounding and resolution.
pub type GroundResult<T> = std::result::Result<T, GroundError>;
/// Result alias for CNF conversion and knowledge compilation.
pub type CompileResult<T> = std::result::Result<T, CompileError>;
/// Result alias for evaluation.
pub type EvalResult<T> = std::result::Result<T, EvalError>;
/// Result alias for sampling.
pub type SampleResult<T> = std::result::Result<T, SampleError>;

/// Convenience alias for functions returning probalog results.
pub type ProbalogResult<T> = std::result::Result<T, ProbalogError>;
