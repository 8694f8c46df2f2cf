//! Algebraic semirings for weighted model counting.
//!
//! A compiled circuit is evaluated bottom-up with `plus` at OR nodes and
//! `times` at AND nodes. Swapping the semiring changes what is counted
//! without recompiling.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

use crate::clause::Probability;
use crate::term::Term;

/// Operations the circuit evaluator is generic over.
pub trait Semiring: Sync {
    type Value: Clone + Send + Sync + fmt::Debug;

    fn zero(&self) -> Self::Value;

    fn one(&self) -> Self::Value;

    fn plus(&self, a: &Self::Value, b: &Self::Value) -> Self::Value;

    fn times(&self, a: &Self::Value, b: &Self::Value) -> Self::Value;

    /// Weight of the negative literal given the positive one.
    fn negate(&self, a: &Self::Value) -> Self::Value;

    /// Positive weight of a choice labelled `label`.
    fn value(&self, probability: &Probability, label: &Term) -> Self::Value;

    /// Condition `a` on a total mass `z`.
    fn normalize(&self, a: &Self::Value, z: &Self::Value) -> Self::Value;

    fn is_zero(&self, a: &Self::Value) -> bool;
}

/// Plain probabilities.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProbabilitySemiring;

impl Semiring for ProbabilitySemiring {
    type Value = f64;

    fn zero(&self) -> f64 {
        0.0
    }

    fn one(&self) -> f64 {
        1.0
    }

    fn plus(&self, a: &f64, b: &f64) -> f64 {
        a + b
    }

    fn times(&self, a: &f64, b: &f64) -> f64 {
        a * b
    }

    fn negate(&self, a: &f64) -> f64 {
        1.0 - a
    }

    fn value(&self, probability: &Probability, _label: &Term) -> f64 {
        probability.default_weight()
    }

    fn normalize(&self, a: &f64, z: &f64) -> f64 {
        (a / z).clamp(0.0, 1.0)
    }

    fn is_zero(&self, a: &f64) -> bool {
        *a == 0.0
    }
}

/// Natural-log probabilities, for deep formulas where products underflow.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogProbabilitySemiring;

impl LogProbabilitySemiring {
    /// Back to a plain probability.
    pub fn to_probability(value: f64) -> f64 {
        value.exp()
    }
}

impl Semiring for LogProbabilitySemiring {
    type Value = f64;

    fn zero(&self) -> f64 {
        f64::NEG_INFINITY
    }

    fn one(&self) -> f64 {
        0.0
    }

    fn plus(&self, a: &f64, b: &f64) -> f64 {
        let (hi, lo) = if a >= b { (*a, *b) } else { (*b, *a) };
        if hi == f64::NEG_INFINITY {
            return hi;
        }
        hi + (lo - hi).exp().ln_1p()
    }

    fn times(&self, a: &f64, b: &f64) -> f64 {
        a + b
    }

    fn negate(&self, a: &f64) -> f64 {
        (-a.exp()).ln_1p()
    }

    fn value(&self, probability: &Probability, _label: &Term) -> f64 {
        probability.default_weight().ln()
    }

    fn normalize(&self, a: &f64, z: &f64) -> f64 {
        (a - z).min(0.0)
    }

    fn is_zero(&self, a: &f64) -> bool {
        *a == f64::NEG_INFINITY
    }
}

/// Max-product semiring: the weight of the best single model.
///
/// `normalize` is the identity: the best model's weight is reported as a
/// joint weight, not conditioned on the evidence.
#[derive(Debug, Clone, Copy, Default)]
pub struct MaxProductSemiring;

impl Semiring for MaxProductSemiring {
    type Value = f64;

    fn zero(&self) -> f64 {
        0.0
    }

    fn one(&self) -> f64 {
        1.0
    }

    fn plus(&self, a: &f64, b: &f64) -> f64 {
        a.max(*b)
    }

    fn times(&self, a: &f64, b: &f64) -> f64 {
        a * b
    }

    fn negate(&self, a: &f64) -> f64 {
        1.0 - a
    }

    fn value(&self, probability: &Probability, _label: &Term) -> f64 {
        probability.default_weight()
    }

    fn normalize(&self, a: &f64, _z: &f64) -> f64 {
        *a
    }

    fn is_zero(&self, a: &f64) -> bool {
        *a == 0.0
    }
}

/// Symbolic expressions over the choice weights.
///
/// Numeric labels print as numbers; learnable and decision labels print as
/// `p(Label)` so the result stays a function of them. Values share their
/// subexpressions, so a circuit with shared nodes yields an expression of the
/// same size.
#[derive(Debug, Clone, Copy, Default)]
pub struct SymbolicSemiring;

/// A shared symbolic expression. Cloning is a reference-count bump.
#[derive(Debug, Clone, PartialEq)]
pub struct SymbolicExpr(Arc<Expr>);

#[derive(Debug, PartialEq)]
enum Expr {
    Zero,
    One,
    Const(f64),
    Param(Term),
    Sum(SymbolicExpr, SymbolicExpr),
    Product(SymbolicExpr, SymbolicExpr),
    Complement(SymbolicExpr),
    Ratio(SymbolicExpr, SymbolicExpr),
}

impl SymbolicExpr {
    fn new(expr: Expr) -> Self {
        Self(Arc::new(expr))
    }

    /// Number of distinct subexpressions.
    pub fn node_count(&self) -> usize {
        let mut seen: HashSet<*const Expr> = HashSet::new();
        let mut stack = vec![self];
        while let Some(e) = stack.pop() {
            if !seen.insert(Arc::as_ptr(&e.0)) {
                continue;
            }
            match &*e.0 {
                Expr::Sum(a, b) | Expr::Product(a, b) | Expr::Ratio(a, b) => {
                    stack.push(a);
                    stack.push(b);
                }
                Expr::Complement(a) => stack.push(a),
                Expr::Zero | Expr::One | Expr::Const(_) | Expr::Param(_) => {}
            }
        }
        seen.len()
    }

    /// Numeric value with `param` supplying the symbolic labels. `None` when
    /// a label has no value.
    pub fn evaluate(&self, param: &dyn Fn(&Term) -> Option<f64>) -> Option<f64> {
        let mut memo: HashMap<*const Expr, f64> = HashMap::new();
        self.eval_shared(param, &mut memo)
    }

    fn eval_shared(
        &self,
        param: &dyn Fn(&Term) -> Option<f64>,
        memo: &mut HashMap<*const Expr, f64>,
    ) -> Option<f64> {
        let key = Arc::as_ptr(&self.0);
        if let Some(v) = memo.get(&key) {
            return Some(*v);
        }
        let value = match &*self.0 {
            Expr::Zero => 0.0,
            Expr::One => 1.0,
            Expr::Const(p) => *p,
            Expr::Param(label) => param(label)?,
            Expr::Sum(a, b) => a.eval_shared(param, memo)? + b.eval_shared(param, memo)?,
            Expr::Product(a, b) => a.eval_shared(param, memo)? * b.eval_shared(param, memo)?,
            Expr::Complement(a) => 1.0 - a.eval_shared(param, memo)?,
            Expr::Ratio(a, z) => a.eval_shared(param, memo)? / z.eval_shared(param, memo)?,
        };
        memo.insert(key, value);
        Some(value)
    }

    fn is(&self, unit: &Expr) -> bool {
        *self.0 == *unit
    }
}

impl fmt::Display for SymbolicExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &*self.0 {
            Expr::Zero => write!(f, "0"),
            Expr::One => write!(f, "1"),
            Expr::Const(p) => write!(f, "{p}"),
            Expr::Param(label) => write!(f, "p({label})"),
            Expr::Sum(a, b) => write!(f, "({a} + {b})"),
            Expr::Product(a, b) => write!(f, "{a}*{b}"),
            Expr::Complement(a) => write!(f, "(1 - {a})"),
            Expr::Ratio(a, z) => write!(f, "{a} / {z}"),
        }
    }
}

impl Semiring for SymbolicSemiring {
    type Value = SymbolicExpr;

    fn zero(&self) -> SymbolicExpr {
        SymbolicExpr::new(Expr::Zero)
    }

    fn one(&self) -> SymbolicExpr {
        SymbolicExpr::new(Expr::One)
    }

    fn plus(&self, a: &SymbolicExpr, b: &SymbolicExpr) -> SymbolicExpr {
        if a.is(&Expr::Zero) {
            b.clone()
        } else if b.is(&Expr::Zero) {
            a.clone()
        } else {
            SymbolicExpr::new(Expr::Sum(a.clone(), b.clone()))
        }
    }

    fn times(&self, a: &SymbolicExpr, b: &SymbolicExpr) -> SymbolicExpr {
        if a.is(&Expr::Zero) || b.is(&Expr::Zero) {
            self.zero()
        } else if a.is(&Expr::One) {
            b.clone()
        } else if b.is(&Expr::One) {
            a.clone()
        } else {
            SymbolicExpr::new(Expr::Product(a.clone(), b.clone()))
        }
    }

    fn negate(&self, a: &SymbolicExpr) -> SymbolicExpr {
        if a.is(&Expr::Zero) {
            self.one()
        } else if a.is(&Expr::One) {
            self.zero()
        } else {
            SymbolicExpr::new(Expr::Complement(a.clone()))
        }
    }

    fn value(&self, probability: &Probability, label: &Term) -> SymbolicExpr {
        match probability {
            Probability::Value(p) => SymbolicExpr::new(Expr::Const(*p)),
            _ => SymbolicExpr::new(Expr::Param(label.clone())),
        }
    }

    fn normalize(&self, a: &SymbolicExpr, z: &SymbolicExpr) -> SymbolicExpr {
        if z.is(&Expr::One) {
            a.clone()
        } else {
            SymbolicExpr::new(Expr::Ratio(a.clone(), z.clone()))
        }
    }

    fn is_zero(&self, a: &SymbolicExpr) -> bool {
        a.is(&Expr::Zero)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn log_semiring_agrees_with_probabilities() {
        let p = ProbabilitySemiring;
        let l = LogProbabilitySemiring;
        let a = Probability::Value(0.3);
        let b = Probability::Value(0.6);
        let t = Term::atom("x");
        let plain = p.plus(
            &p.times(&p.value(&a, &t), &p.value(&b, &t)),
            &p.negate(&p.value(&a, &t)),
        );
        let logged = l.plus(
            &l.times(&l.value(&a, &t), &l.value(&b, &t)),
            &l.negate(&l.value(&a, &t)),
        );
        assert!((LogProbabilitySemiring::to_probability(logged) - plain).abs() < 1e-12);
        assert!(l.is_zero(&l.plus(&l.zero(), &l.zero())));
    }

    #[test]
    fn max_product_takes_best() {
        let m = MaxProductSemiring;
        assert_eq!(m.plus(&0.2, &0.7), 0.7);
        assert_eq!(m.normalize(&0.3, &0.5), 0.3);
    }

    #[test]
    fn symbolic_simplifies_units() {
        let s = SymbolicSemiring;
        let t = Term::atom("coin");
        let x = s.value(&Probability::Tunable(None), &t);
        assert_eq!(x.to_string(), "p(coin)");
        assert_eq!(s.times(&s.one(), &x), x);
        assert_eq!(s.plus(&s.zero(), &x), x);
        assert_eq!(s.negate(&x).to_string(), "(1 - p(coin))");
        let half = s.value(&Probability::Value(0.5), &t);
        assert_eq!(s.times(&x, &half).to_string(), "p(coin)*0.5");
    }

    #[test]
    fn symbolic_values_share_subexpressions() {
        let s = SymbolicSemiring;
        let coin = Term::atom("coin");
        let mut x = s.value(&Probability::Tunable(None), &coin);
        // Doubling reuse: the printed form would have 2^40 leaves.
        for _ in 0..40 {
            x = s.plus(&s.times(&x, &x), &s.negate(&x));
        }
        assert!(x.node_count() <= 3 * 40 + 1);
        let at = |v: f64| x.evaluate(&|label: &Term| label.is_atom("coin").then_some(v));
        assert_eq!(at(1.0), Some(1.0));
        assert_eq!(at(0.0), Some(1.0));
        assert_eq!(x.evaluate(&|_: &Term| None), None);
    }
}
