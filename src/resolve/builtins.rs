//! Builtin predicates: control, unification, arithmetic, type checks and
//! aggregation. Builtins are deterministic; their answers carry a TRUE
//! formula unless they wrap a goal (`call/N`, `forall/2`).

use std::cmp::Ordering;

use super::{ChoiceHandler, Resolver, Solutions, arith};
use crate::clause::Body;
use crate::error::{GroundError, GroundResult};
use crate::formula::FormulaRef;
use crate::term::{Constant, Substitution, Term, rename};

fn holds(subst: &Substitution, ok: bool) -> Solutions {
    if ok {
        vec![(subst.clone(), FormulaRef::True)]
    } else {
        Vec::new()
    }
}

fn bound(subst: Option<Substitution>) -> Solutions {
    subst.map(|s| vec![(s, FormulaRef::True)]).unwrap_or_default()
}

fn int_bound(term: &Term, goal: &Term) -> GroundResult<i64> {
    match term {
        Term::Const(Constant::Int(i)) => Ok(*i),
        Term::Var(_) => Err(GroundError::Instantiation {
            goal: goal.to_string(),
        }),
        other => Err(GroundError::Type {
            expected: "integer".into(),
            found: other.to_string(),
        }),
    }
}

impl<H: ChoiceHandler> Resolver<'_, H> {
    /// Run `goal` as a builtin. `None` means it is not one and should be
    /// resolved against the database. `goal` is fully dereferenced.
    pub(super) fn builtin(
        &mut self,
        goal: &Term,
        subst: &Substitution,
    ) -> Option<GroundResult<Solutions>> {
        let name = goal.name()?;
        let args = goal.args();
        let result = match (name, args.len()) {
            ("true", 0) => Ok(holds(subst, true)),
            ("fail" | "false", 0) => Ok(Vec::new()),
            (",", 2) | (";", 2) | ("\\+", 1) | ("not", 1) => {
                self.solve_body(&Body::from_term(goal), subst.clone())
            }
            ("=", 2) => Ok(bound(self.unify(&args[0], &args[1], subst))),
            ("\\=", 2) => Ok(holds(subst, self.unify(&args[0], &args[1], subst).is_none())),
            ("==", 2) => Ok(holds(subst, args[0] == args[1])),
            ("\\==", 2) => Ok(holds(subst, args[0] != args[1])),
            ("is", 2) => arith::eval(&args[1], subst)
                .map(|n| bound(self.unify(&args[0], &n.to_term(), subst))),
            ("=:=" | "=\\=" | "<" | ">" | "=<" | ">=", 2) => {
                self.compare(name, &args[0], &args[1], subst)
            }
            ("var", 1) => Ok(holds(subst, args[0].is_var())),
            ("nonvar", 1) => Ok(holds(subst, !args[0].is_var())),
            ("ground", 1) => Ok(holds(subst, args[0].is_ground())),
            ("atom", 1) => Ok(holds(subst, matches!(args[0], Term::Const(Constant::Atom(_))))),
            ("number", 1) => Ok(holds(
                subst,
                matches!(args[0], Term::Const(Constant::Int(_) | Constant::Float(_))),
            )),
            ("integer", 1) => Ok(holds(subst, matches!(args[0], Term::Const(Constant::Int(_))))),
            ("float", 1) => Ok(holds(subst, matches!(args[0], Term::Const(Constant::Float(_))))),
            ("atomic", 1) => Ok(holds(subst, matches!(args[0], Term::Const(_)))),
            ("compound", 1) => Ok(holds(subst, matches!(args[0], Term::Compound(_)))),
            ("callable", 1) => Ok(holds(subst, args[0].is_callable())),
            ("is_list", 1) => Ok(holds(subst, args[0].as_list().is_some())),
            ("between", 3) => self.between(goal, subst),
            ("length", 2) => self.length(goal, subst),
            ("call", n) if n >= 1 => self.call(goal, subst),
            ("findall", 3) => self.find_all(&args[0], &args[1], &args[2], subst, false),
            ("all", 3) => self.find_all(&args[0], &args[1], &args[2], subst, true),
            ("forall", 2) => {
                let body = Body::Not(Box::new(Body::And(
                    Box::new(Body::from_term(&args[0])),
                    Box::new(Body::Not(Box::new(Body::from_term(&args[1])))),
                )));
                self.solve_body(&body, subst.clone())
            }
            _ => return None,
        };
        Some(result)
    }

    fn compare(
        &self,
        op: &str,
        a: &Term,
        b: &Term,
        subst: &Substitution,
    ) -> GroundResult<Solutions> {
        let ord = arith::compare(arith::eval(a, subst)?, arith::eval(b, subst)?);
        let ok = match op {
            "=:=" => ord == Ordering::Equal,
            "=\\=" => ord != Ordering::Equal,
            "<" => ord == Ordering::Less,
            ">" => ord == Ordering::Greater,
            "=<" => ord != Ordering::Greater,
            _ => ord != Ordering::Less,
        };
        Ok(holds(subst, ok))
    }

    fn between(&self, goal: &Term, subst: &Substitution) -> GroundResult<Solutions> {
        let args = goal.args();
        let low = int_bound(&args[0], goal)?;
        let high = int_bound(&args[1], goal)?;
        match &args[2] {
            Term::Var(_) => Ok((low..=high)
                .filter_map(|i| self.unify(&args[2], &Term::int(i), subst))
                .map(|s| (s, FormulaRef::True))
                .collect()),
            other => {
                let x = int_bound(other, goal)?;
                Ok(holds(subst, (low..=high).contains(&x)))
            }
        }
    }

    fn length(&mut self, goal: &Term, subst: &Substitution) -> GroundResult<Solutions> {
        let args = goal.args();
        if let Some(items) = args[0].as_list() {
            let n = Term::int(items.len() as i64);
            return Ok(bound(self.unify(&args[1], &n, subst)));
        }
        let n = int_bound(&args[1], goal)?;
        if n < 0 {
            return Ok(Vec::new());
        }
        let items = (0..n).map(|_| Term::Var(self.vars.fresh())).collect();
        Ok(bound(self.unify(&args[0], &Term::list(items), subst)))
    }

    fn call(&mut self, goal: &Term, subst: &Substitution) -> GroundResult<Solutions> {
        let args = goal.args();
        let target = &args[0];
        if target.is_var() {
            return Err(GroundError::Instantiation {
                goal: goal.to_string(),
            });
        }
        let Some(inner) = target.with_extra_args(&args[1..]) else {
            return Err(GroundError::Type {
                expected: "callable".into(),
                found: target.to_string(),
            });
        };
        self.solve_body(&Body::from_term(&inner), subst.clone())
    }

    /// `findall/3` and `all/3`. When grounding, the collection covers every
    /// answer that holds in some world; it is deterministic and does not
    /// condition on the goal's formula. The sampler resolves inside one drawn
    /// world, where choices drawn false have no answers, so it collects that
    /// world's answers only. `all/3` sorts, removes duplicates and fails when
    /// empty.
    fn find_all(
        &mut self,
        template: &Term,
        goal: &Term,
        result: &Term,
        subst: &Substitution,
        distinct: bool,
    ) -> GroundResult<Solutions> {
        let sols = self.solve_closed(&Body::from_term(goal), subst)?;
        let mut items: Vec<Term> = sols.iter().map(|(s, _)| s.resolve(template)).collect();
        if distinct {
            items.sort();
            items.dedup();
            if items.is_empty() {
                return Ok(Vec::new());
            }
        }
        let items = items.iter().map(|t| rename(t, &mut self.vars)).collect();
        Ok(bound(self.unify(result, &Term::list(items), subst)))
    }
}

#[cfg(test)]
mod tests {
    use crate::clause::{fact, prob_fact, rule};
    use crate::database::Database;
    use crate::error::GroundError;
    use crate::formula::FormulaRef;
    use crate::resolve::{FormulaBuilder, Resolver};
    use crate::term::{VarScope, parse_term};

    fn db() -> Database {
        Database::load(vec![
            fact("n(1)").unwrap(),
            fact("n(2)").unwrap(),
            fact("n(3)").unwrap(),
            fact("n(2)").unwrap(),
            prob_fact(0.5, "coin(h)").unwrap(),
            rule("big(X)", &["n(X)", ">(X, 1)"]).unwrap(),
        ])
    }

    fn run(goal: &str) -> Result<Vec<String>, GroundError> {
        let db = db();
        let goal = parse_term(goal, &mut VarScope::new()).unwrap();
        let sols = Resolver::new(&db, FormulaBuilder).solve(&goal)?;
        Ok(sols.iter().map(|s| s.term.to_string()).collect())
    }

    #[test]
    fn arithmetic() {
        assert_eq!(run("is(X, +(1, *(2, 3)))").unwrap(), vec!["is(7,+(1,*(2,3)))"]);
        assert_eq!(run("<(1, 2.5)").unwrap().len(), 1);
        assert!(run(">=(1, 2)").unwrap().is_empty());
        assert!(matches!(run("is(X, +(Y, 1))"), Err(GroundError::Instantiation { .. })));
    }

    #[test]
    fn unification_and_comparison() {
        assert_eq!(run("=(f(X, b), f(a, Y))").unwrap(), vec!["=(f(a,b),f(a,b))"]);
        assert!(run("\\=(a, a)").unwrap().is_empty());
        assert_eq!(run("\\==(X, Y)").unwrap().len(), 1);
    }

    #[test]
    fn type_checks() {
        assert_eq!(run("atom(a)").unwrap().len(), 1);
        assert!(run("atom(1)").unwrap().is_empty());
        assert_eq!(run("is_list([1, 2])").unwrap().len(), 1);
        assert!(run("ground(f(X))").unwrap().is_empty());
    }

    #[test]
    fn between_enumerates() {
        assert_eq!(run("between(1, 3, X)").unwrap().len(), 3);
        assert_eq!(run("between(1, 3, 2)").unwrap().len(), 1);
        assert!(run("between(1, 3, 5)").unwrap().is_empty());
    }

    #[test]
    fn length_both_directions() {
        assert_eq!(run("length([a, b], N)").unwrap(), vec!["length([a,b],2)"]);
        assert_eq!(run("length(L, 2)").unwrap().len(), 1);
    }

    #[test]
    fn aggregation() {
        assert_eq!(run("findall(X, n(X), L)").unwrap(), vec!["findall(_0,n(_0),[1,2,3])"]);
        assert_eq!(run("all(X, big(X), L)").unwrap(), vec!["all(_0,big(_0),[2,3])"]);
        assert!(run("all(X, n(nope), L)").unwrap().is_empty());
    }

    #[test]
    fn call_and_forall() {
        assert_eq!(run("call(n, 3)").unwrap().len(), 1);
        assert_eq!(run("forall(big(X), n(X))").unwrap().len(), 1);
        assert!(run("forall(n(X), big(X))").unwrap().is_empty());
        assert!(matches!(run("call(X)"), Err(GroundError::Instantiation { .. })));
    }

    #[test]
    fn wrapped_probabilistic_goal_keeps_formula() {
        let db = db();
        let goal = parse_term("call(coin(h))", &mut VarScope::new()).unwrap();
        let sols = Resolver::new(&db, FormulaBuilder).solve(&goal).unwrap();
        assert!(matches!(sols[0].formula, FormulaRef::Node(_)));
    }
}
