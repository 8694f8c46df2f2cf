//! Arithmetic evaluation for `is/2` and the comparison builtins.

use std::cmp::Ordering;

use crate::error::{GroundError, GroundResult};
use crate::term::{Constant, Substitution, Term};

/// Result of evaluating an arithmetic expression.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Number {
    Int(i64),
    Float(f64),
}

impl Number {
    /// The value as a float.
    pub fn as_f64(self) -> f64 {
        match self {
            Number::Int(i) => i as f64,
            Number::Float(x) => x,
        }
    }

    /// The value as a term.
    pub fn to_term(self) -> Term {
        match self {
            Number::Int(i) => Term::int(i),
            Number::Float(x) => Term::float(x),
        }
    }
}

/// Numeric comparison across int and float.
pub fn compare(a: Number, b: Number) -> Ordering {
    match (a, b) {
        (Number::Int(x), Number::Int(y)) => x.cmp(&y),
        _ => a.as_f64().partial_cmp(&b.as_f64()).unwrap_or(Ordering::Equal),
    }
}

/// Evaluate `term` under `subst`.
pub fn eval(term: &Term, subst: &Substitution) -> GroundResult<Number> {
    let t = subst.walk(term);
    match &t {
        Term::Var(_) => Err(GroundError::Instantiation {
            goal: subst.resolve(term).to_string(),
        }),
        Term::Const(Constant::Int(i)) => Ok(Number::Int(*i)),
        Term::Const(Constant::Float(x)) => Ok(Number::Float(x.0)),
        Term::Const(Constant::Atom(a)) => match &**a {
            "pi" => Ok(Number::Float(std::f64::consts::PI)),
            "e" => Ok(Number::Float(std::f64::consts::E)),
            "inf" | "infinite" => Ok(Number::Float(f64::INFINITY)),
            "nan" => Ok(Number::Float(f64::NAN)),
            _ => Err(not_evaluable(&t)),
        },
        Term::Const(Constant::Str(_)) => Err(not_evaluable(&t)),
        Term::Compound(c) => {
            let args = c
                .args
                .iter()
                .map(|a| eval(a, subst))
                .collect::<GroundResult<Vec<_>>>()?;
            match args.as_slice() {
                [x] => unary(&c.functor, *x).ok_or_else(|| not_evaluable(&t))?,
                [x, y] => binary(&c.functor, *x, *y).ok_or_else(|| not_evaluable(&t))?,
                _ => Err(not_evaluable(&t)),
            }
        }
    }
}

fn not_evaluable(t: &Term) -> GroundError {
    GroundError::Type {
        expected: "evaluable".into(),
        found: t.to_string(),
    }
}

fn zero_divisor() -> GroundError {
    GroundError::Type {
        expected: "non-zero divisor".into(),
        found: "0".into(),
    }
}

fn int_only(op: &str, n: Number) -> GroundResult<i64> {
    match n {
        Number::Int(i) => Ok(i),
        Number::Float(x) => Err(GroundError::Type {
            expected: format!("integer operand for {op}"),
            found: x.to_string(),
        }),
    }
}

fn float(x: f64) -> GroundResult<Number> {
    Ok(Number::Float(x))
}

fn to_int(x: f64) -> GroundResult<Number> {
    if x.is_finite() && x.abs() < 9.2e18 {
        Ok(Number::Int(x as i64))
    } else {
        Err(GroundError::Type {
            expected: "finite value".into(),
            found: x.to_string(),
        })
    }
}

fn unary(op: &str, x: Number) -> Option<GroundResult<Number>> {
    let f = x.as_f64();
    Some(match op {
        "-" => match x {
            Number::Int(i) => Ok(i.checked_neg().map_or(Number::Float(-f), Number::Int)),
            Number::Float(v) => float(-v),
        },
        "+" => Ok(x),
        "abs" => match x {
            Number::Int(i) => Ok(i.checked_abs().map_or(Number::Float(f.abs()), Number::Int)),
            Number::Float(v) => float(v.abs()),
        },
        "sign" => match x {
            Number::Int(i) => Ok(Number::Int(i.signum())),
            Number::Float(v) => float(if v == 0.0 { 0.0 } else { v.signum() }),
        },
        "sqrt" => float(f.sqrt()),
        "exp" => float(f.exp()),
        "log" => float(f.ln()),
        "log2" => float(f.log2()),
        "sin" => float(f.sin()),
        "cos" => float(f.cos()),
        "tan" => float(f.tan()),
        "asin" => float(f.asin()),
        "acos" => float(f.acos()),
        "atan" => float(f.atan()),
        "float" => float(f),
        "integer" => to_int(f.round()),
        "floor" => to_int(f.floor()),
        "ceiling" => to_int(f.ceil()),
        "round" => to_int(f.round()),
        "truncate" => to_int(f.trunc()),
        "float_integer_part" => float(f.trunc()),
        "float_fractional_part" => float(f.fract()),
        "\\" => int_only(op, x).map(|i| Number::Int(!i)),
        _ => return None,
    })
}

fn binary(op: &str, x: Number, y: Number) -> Option<GroundResult<Number>> {
    use Number::{Float, Int};
    let (fx, fy) = (x.as_f64(), y.as_f64());
    Some(match (op, x, y) {
        ("+", Int(a), Int(b)) => Ok(a.checked_add(b).map_or(Float(fx + fy), Int)),
        ("-", Int(a), Int(b)) => Ok(a.checked_sub(b).map_or(Float(fx - fy), Int)),
        ("*", Int(a), Int(b)) => Ok(a.checked_mul(b).map_or(Float(fx * fy), Int)),
        ("+", ..) => float(fx + fy),
        ("-", ..) => float(fx - fy),
        ("*", ..) => float(fx * fy),
        ("/", Int(_), Int(0)) => Err(zero_divisor()),
        ("/", Int(a), Int(b)) if a.checked_rem(b) == Some(0) => {
            Ok(a.checked_div(b).map_or(Float(fx / fy), Int))
        }
        ("/", ..) => float(fx / fy),
        ("//" | "mod" | "rem" | ">>" | "<<" | "/\\" | "\\/" | "xor", ..) => {
            let (a, b) = match (int_only(op, x), int_only(op, y)) {
                (Ok(a), Ok(b)) => (a, b),
                (Err(e), _) | (_, Err(e)) => return Some(Err(e)),
            };
            match op {
                "//" | "mod" | "rem" if b == 0 => Err(zero_divisor()),
                "//" => Ok(a.checked_div(b).map_or(Float((fx / fy).trunc()), Int)),
                "mod" => Ok(Int(floor_mod(a, b))),
                "rem" => Ok(Int(a.wrapping_rem(b))),
                ">>" => Ok(Int(a >> b.clamp(0, 63))),
                "<<" => Ok(Int(a << b.clamp(0, 63))),
                "/\\" => Ok(Int(a & b)),
                "\\/" => Ok(Int(a | b)),
                _ => Ok(Int(a ^ b)),
            }
        }
        ("min", ..) => Ok(if compare(x, y) == std::cmp::Ordering::Greater { y } else { x }),
        ("max", ..) => Ok(if compare(x, y) == std::cmp::Ordering::Less { y } else { x }),
        ("**", Int(a), Int(b)) if b >= 0 => Ok(int_pow(a, b).map_or(Float(fx.powf(fy)), Int)),
        ("**", ..) => float(fx.powf(fy)),
        ("^", Int(a), Int(b)) => {
            if b < 0 {
                Err(GroundError::Type {
                    expected: "non-negative exponent".into(),
                    found: b.to_string(),
                })
            } else {
                Ok(int_pow(a, b).map_or(Float(fx.powf(fy)), Int))
            }
        }
        ("^", ..) => float(fx.powf(fy)),
        ("atan2" | "atan", ..) => float(fx.atan2(fy)),
        ("log", ..) => float(fy.ln() / fx.ln()),
        ("copysign", ..) => float(fx.copysign(fy)),
        _ => return None,
    })
}

/// Modulo with the sign of the divisor. `b` is non-zero.
fn floor_mod(a: i64, b: i64) -> i64 {
    // Only `i64::MIN % -1` overflows, and its remainder is 0.
    let r = a.checked_rem(b).unwrap_or(0);
    if r != 0 && (r < 0) != (b < 0) { r + b } else { r }
}

fn int_pow(base: i64, exp: i64) -> Option<i64> {
    u32::try_from(exp).ok().and_then(|e| base.checked_pow(e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::term::{Var, VarScope, parse_term};

    fn ev(src: &str) -> GroundResult<Number> {
        let t = parse_term(src, &mut VarScope::new()).unwrap();
        eval(&t, &Substitution::new())
    }

    #[test]
    fn integer_arithmetic_stays_integral() {
        assert_eq!(ev("+(1, *(2, 3))").unwrap(), Number::Int(7));
        assert_eq!(ev("/(6, 3)").unwrap(), Number::Int(2));
        assert_eq!(ev("//(7, 2)").unwrap(), Number::Int(3));
        assert_eq!(ev("mod(-7, 2)").unwrap(), Number::Int(1));
        assert_eq!(ev("mod(7, -2)").unwrap(), Number::Int(-1));
        assert_eq!(ev("rem(-7, 2)").unwrap(), Number::Int(-1));
        assert_eq!(ev("^(2, 10)").unwrap(), Number::Int(1024));
    }

    #[test]
    fn most_negative_dividend_does_not_overflow() {
        let op = |name: &str| {
            let t = Term::compound(name, vec![Term::int(i64::MIN), Term::int(-1)]);
            eval(&t, &Substitution::new()).unwrap()
        };
        assert_eq!(op("mod"), Number::Int(0));
        assert_eq!(op("rem"), Number::Int(0));
        assert_eq!(op("//"), Number::Float(9_223_372_036_854_775_808.0));
        assert_eq!(op("/"), Number::Float(9_223_372_036_854_775_808.0));
        assert_eq!(ev("//(-7, 2)").unwrap(), Number::Int(-3));
        assert_eq!(ev("mod(-6, 3)").unwrap(), Number::Int(0));
    }

    #[test]
    fn mixed_arithmetic_is_float() {
        assert_eq!(ev("/(3, 2)").unwrap(), Number::Float(1.5));
        assert_eq!(ev("*(0.5, 4)").unwrap(), Number::Float(2.0));
        assert_eq!(ev("**(2, -1)").unwrap(), Number::Float(0.5));
        assert!((ev("-(1, *(0.1, 3))").unwrap().as_f64() - 0.7).abs() < 1e-12);
    }

    #[test]
    fn functions() {
        assert_eq!(ev("max(1, 2.5)").unwrap(), Number::Float(2.5));
        assert_eq!(ev("min(3, 2)").unwrap(), Number::Int(2));
        assert_eq!(ev("abs(-4)").unwrap(), Number::Int(4));
        assert_eq!(ev("floor(2.7)").unwrap(), Number::Int(2));
        assert_eq!(ev("truncate(-2.7)").unwrap(), Number::Int(-2));
        assert!((ev("exp(log(3.0))").unwrap().as_f64() - 3.0).abs() < 1e-12);
    }

    #[test]
    fn unbound_operand_is_instantiation_error() {
        let t = Term::compound("+", vec![Term::Var(Var::new(0)), Term::int(1)]);
        assert!(matches!(
            eval(&t, &Substitution::new()),
            Err(GroundError::Instantiation { .. })
        ));
    }

    #[test]
    fn non_numeric_operand_is_type_error() {
        assert!(matches!(ev("+(a, 1)"), Err(GroundError::Type { .. })));
        assert!(matches!(ev("foo(1)"), Err(GroundError::Type { .. })));
        assert!(matches!(ev("//(1, 0)"), Err(GroundError::Type { .. })));
    }

    #[test]
    fn bound_variables_are_followed() {
        let mut s = Substitution::new();
        s.bind(Var::new(0), Term::int(4));
        let t = Term::compound("*", vec![Term::Var(Var::new(0)), Term::float(0.25)]);
        assert_eq!(eval(&t, &s).unwrap(), Number::Float(1.0));
    }

    #[test]
    fn comparison_across_types() {
        assert_eq!(compare(Number::Int(1), Number::Float(1.0)), Ordering::Equal);
        assert_eq!(compare(Number::Int(2), Number::Float(1.5)), Ordering::Greater);
    }
}
