//! Substitutions, unification and variable renaming.

use std::collections::HashMap;

use super::{Term, Var};

/// A mapping from variables to terms.
///
/// Bindings may chain (`X -> Y`, `Y -> a`); [`walk`](Self::walk) follows a
/// chain at the top level and [`resolve`](Self::resolve) applies it
/// everywhere.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Substitution {
    bindings: HashMap<Var, Term>,
}

impl Substitution {
    /// The empty substitution.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of bound variables.
    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    /// Whether nothing is bound.
    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }

    /// Direct binding of `var`, if any.
    pub fn get(&self, var: Var) -> Option<&Term> {
        self.bindings.get(&var)
    }

    /// Bind `var` to `term`. The caller guarantees `var` is unbound.
    pub fn bind(&mut self, var: Var, term: Term) {
        self.bindings.insert(var, term);
    }

    /// Follow variable bindings at the top level only.
    pub fn walk(&self, term: &Term) -> Term {
        let mut cur = term;
        while let Term::Var(v) = cur {
            match self.bindings.get(v) {
                Some(next) => cur = next,
                None => break,
            }
        }
        cur.clone()
    }

    /// Apply the substitution to every variable in `term`.
    pub fn resolve(&self, term: &Term) -> Term {
        if self.bindings.is_empty() {
            return term.clone();
        }
        term.map_vars(&mut |v| match self.bindings.get(&v) {
            Some(bound) => self.resolve(bound),
            None => Term::Var(v),
        })
    }

    /// Iterate over direct bindings.
    pub fn iter(&self) -> impl Iterator<Item = (&Var, &Term)> {
        self.bindings.iter()
    }
}

/// Unify `a` and `b` under `subst` without the occurs check.
///
/// Returns the extended substitution, or `None` if the terms do not unify.
pub fn unify(a: &Term, b: &Term, subst: &Substitution) -> Option<Substitution> {
    let mut out = subst.clone();
    unify_in_place(a, b, &mut out, false).then_some(out)
}

/// Unify with the occurs check: a variable never binds to a term containing
/// itself.
pub fn unify_with_occurs_check(a: &Term, b: &Term, subst: &Substitution) -> Option<Substitution> {
    let mut out = subst.clone();
    unify_in_place(a, b, &mut out, true).then_some(out)
}

/// Unify into `subst`. On failure `subst` may hold partial bindings, so
/// callers unify into a scratch copy.
pub(crate) fn unify_in_place(
    a: &Term,
    b: &Term,
    subst: &mut Substitution,
    occurs_check: bool,
) -> bool {
    let a = subst.walk(a);
    let b = subst.walk(b);
    match (&a, &b) {
        (Term::Var(x), Term::Var(y)) => {
            if x != y {
                // Newer variable points at the older one.
                let (newer, older) = if x > y { (*x, b.clone()) } else { (*y, a.clone()) };
                subst.bind(newer, older);
            }
            true
        }
        (Term::Var(x), other) | (other, Term::Var(x)) => {
            if occurs_check && occurs(*x, other, subst) {
                return false;
            }
            subst.bind(*x, other.clone());
            true
        }
        (Term::Const(c1), Term::Const(c2)) => c1 == c2,
        (Term::Compound(f), Term::Compound(g)) => {
            if std::sync::Arc::ptr_eq(f, g) {
                return true;
            }
            f.functor == g.functor
                && f.args.len() == g.args.len()
                && f
                    .args
                    .iter()
                    .zip(&g.args)
                    .all(|(x, y)| unify_in_place(x, y, subst, occurs_check))
        }
        _ => false,
    }
}

fn occurs(var: Var, term: &Term, subst: &Substitution) -> bool {
    match subst.walk(term) {
        Term::Var(v) => v == var,
        Term::Const(_) => false,
        Term::Compound(c) => c.args.iter().any(|a| occurs(var, a, subst)),
    }
}

/// Hands out fresh variable numbers in blocks.
#[derive(Debug, Clone, Default)]
pub struct VarSource {
    next: u64,
}

impl VarSource {
    /// A source whose first variable is `start`.
    pub fn starting_at(start: u64) -> Self {
        Self { next: start }
    }

    /// One fresh variable.
    pub fn fresh(&mut self) -> Var {
        let v = Var::new(self.next);
        self.next += 1;
        v
    }

    /// Reserve `n` consecutive variables and return the first number.
    pub fn reserve(&mut self, n: usize) -> u64 {
        let base = self.next;
        self.next += n as u64;
        base
    }
}

/// Fresh-variable copy of a clause-local term whose variables are `0..n`.
///
/// This is the renaming done before every resolution step against a stored
/// clause: the block `[offset, offset + n)` comes from [`VarSource::reserve`].
pub fn rename_offset(term: &Term, offset: u64) -> Term {
    term.offset_vars(offset)
}

/// Fresh-variable copy of an arbitrary term.
pub fn rename(term: &Term, source: &mut VarSource) -> Term {
    let mut mapping: HashMap<Var, Var> = HashMap::new();
    term.map_vars(&mut |v| Term::Var(*mapping.entry(v).or_insert_with(|| source.fresh())))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn v(id: u64) -> Term {
        Term::Var(Var::new(id))
    }

    fn f(args: Vec<Term>) -> Term {
        Term::compound("f", args)
    }

    #[test]
    fn unify_binds_variable() {
        let s = unify(&v(0), &Term::atom("a"), &Substitution::new()).unwrap();
        assert_eq!(s.resolve(&v(0)), Term::atom("a"));
    }

    #[test]
    fn unify_fails_on_functor_mismatch() {
        let a = f(vec![Term::atom("a")]);
        let b = Term::compound("g", vec![Term::atom("a")]);
        assert!(unify(&a, &b, &Substitution::new()).is_none());
        let c = Term::compound("f", vec![Term::atom("a"), Term::atom("b")]);
        assert!(unify(&a, &c, &Substitution::new()).is_none());
    }

    #[test]
    fn unify_is_structural() {
        let a = f(vec![v(0), Term::atom("b")]);
        let b = f(vec![Term::atom("a"), v(1)]);
        let s = unify(&a, &b, &Substitution::new()).unwrap();
        assert_eq!(s.resolve(&a), s.resolve(&b));
        assert_eq!(s.resolve(&a).to_string(), "f(a,b)");
    }

    #[test]
    fn var_var_binds_newer_to_older() {
        let s = unify(&v(3), &v(9), &Substitution::new()).unwrap();
        assert_eq!(s.get(Var::new(9)), Some(&v(3)));
        assert!(s.get(Var::new(3)).is_none());
    }

    #[test]
    fn shared_variable_consistency() {
        let a = f(vec![v(0), v(0)]);
        let b = f(vec![Term::atom("a"), Term::atom("b")]);
        assert!(unify(&a, &b, &Substitution::new()).is_none());
    }

    #[test]
    fn occurs_check_rejects_cyclic_binding() {
        let t = f(vec![v(0)]);
        assert!(unify(&v(0), &t, &Substitution::new()).is_some());
        assert!(unify_with_occurs_check(&v(0), &t, &Substitution::new()).is_none());
    }

    #[test]
    fn unify_does_not_touch_input() {
        let base = Substitution::new();
        let _ = unify(&v(0), &Term::atom("a"), &base);
        assert!(base.is_empty());
    }

    #[test]
    fn int_and_float_do_not_unify() {
        assert!(unify(&Term::int(1), &Term::float(1.0), &Substitution::new()).is_none());
    }

    #[test]
    fn rename_gives_fresh_consistent_vars() {
        let mut src = VarSource::starting_at(100);
        let t = f(vec![v(0), v(1), v(0)]);
        let r = rename(&t, &mut src);
        assert_eq!(r, f(vec![v(100), v(101), v(100)]));
        assert_eq!(rename_offset(&t, 10), f(vec![v(10), v(11), v(10)]));
    }

    #[test]
    fn reserve_returns_disjoint_blocks() {
        let mut src = VarSource::default();
        let a = src.reserve(3);
        let b = src.reserve(2);
        assert_eq!(a, 0);
        assert_eq!(b, 3);
        assert_eq!(src.fresh(), Var::new(5));
    }
}
