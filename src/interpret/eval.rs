use rand::rngs::StdRng;
use rand::Rng;
use std::collections::HashMap;

use super::interpreter::{VmError, VmErrorKind};
use crate::ir::{BinOp, Expr, Value};

/// Evaluates an expression tree against the variable store.
///
/// - `dmem` the data memory the expression's variable references read from
/// - `rng` the interpreter's random number generator, advanced by `rng` calls
/// - `line` the source line of the enclosing instruction, for diagnostics
pub(crate) fn eval(
    expr: &Expr,
    dmem: &HashMap<String, Value>,
    rng: &mut StdRng,
    line: usize,
) -> Result<Value, VmError> {
    match expr {
        Expr::Literal(value) => Ok(value.clone()),
        Expr::Var(name) => match dmem.get(name) {
            Some(value) => Ok(value.clone()),
            None => VmErrorKind::UndefinedVariable(line, name.clone()).throw(),
        },
        Expr::Rng(min, max) => {
            let min = as_int(&eval(min, dmem, rng, line)?, line)?;
            let max = as_int(&eval(max, dmem, rng, line)?, line)?;
            if min > max {
                return VmErrorKind::Range(
                    line,
                    format!("rng bounds are inverted: {} > {}", min, max),
                )
                .throw();
            }
            Ok(Value::Integer(rng.gen_range(min..=max)))
        }
        Expr::Binary(op, lhs, rhs) => {
            let lhs = eval(lhs, dmem, rng, line)?;
            let rhs = eval(rhs, dmem, rng, line)?;
            apply_binary(*op, &lhs, &rhs, line)
        }
    }
}

/// Applies one binary operator to two already-evaluated values. Also used
/// by the minifier to fold literal-only expressions.
pub(crate) fn apply_binary(
    op: BinOp,
    lhs: &Value,
    rhs: &Value,
    line: usize,
) -> Result<Value, VmError> {
    match op {
        BinOp::Multiply => Ok(Value::Integer(as_int(lhs, line)? * as_int(rhs, line)?)),
        BinOp::Add => Ok(Value::Integer(as_int(lhs, line)? + as_int(rhs, line)?)),
        BinOp::Subtract => Ok(Value::Integer(as_int(lhs, line)? - as_int(rhs, line)?)),
        BinOp::Divide => {
            let divisor = as_int(rhs, line)?;
            if divisor == 0 {
                return VmErrorKind::DivisionByZero(line).throw();
            }
            Ok(Value::Integer(as_int(lhs, line)? / divisor))
        }
        BinOp::Modulo => {
            let divisor = as_int(rhs, line)?;
            if divisor == 0 {
                return VmErrorKind::DivisionByZero(line).throw();
            }
            Ok(Value::Integer(as_int(lhs, line)? % divisor))
        }
        BinOp::Equal => Ok(bool_value(values_equal(lhs, rhs))),
        BinOp::NotEqual => Ok(bool_value(!values_equal(lhs, rhs))),
        BinOp::Less => Ok(bool_value(order(lhs, rhs, line)?.is_lt())),
        BinOp::Greater => Ok(bool_value(order(lhs, rhs, line)?.is_gt())),
        BinOp::LessEqual => Ok(bool_value(order(lhs, rhs, line)?.is_le())),
        BinOp::GreaterEqual => Ok(bool_value(order(lhs, rhs, line)?.is_ge())),
    }
}

// Ordering is defined within a kind only; mixed-kind ordering is fatal.
fn order(lhs: &Value, rhs: &Value, line: usize) -> Result<std::cmp::Ordering, VmError> {
    match (lhs, rhs) {
        (Value::Integer(a), Value::Integer(b)) => Ok(a.cmp(b)),
        (Value::Text(a), Value::Text(b)) => Ok(a.cmp(b)),
        _ => VmErrorKind::Type(
            line,
            "cannot order an integer against a string".to_string(),
        )
        .throw(),
    }
}

// Mixed-kind operands are never equal; same-kind operands compare directly.
fn values_equal(lhs: &Value, rhs: &Value) -> bool {
    match (lhs, rhs) {
        (Value::Integer(a), Value::Integer(b)) => a == b,
        (Value::Text(a), Value::Text(b)) => a == b,
        _ => false,
    }
}

fn bool_value(truth: bool) -> Value {
    Value::Integer(if truth { 1 } else { 0 })
}

/// Reads a value as an integer. A string that parses as an integer is
/// coerced; anything else in arithmetic context is a type error.
pub(crate) fn as_int(value: &Value, line: usize) -> Result<i64, VmError> {
    match value {
        Value::Integer(n) => Ok(*n),
        Value::Text(s) => match s.trim().parse::<i64>() {
            Ok(n) => Ok(n),
            Err(_) => VmErrorKind::Type(
                line,
                format!("expected an integer, got the string #{}#", s),
            )
            .throw(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::{apply_binary, as_int, eval};
    use crate::interpret::interpreter::VmError;
    use crate::ir::{BinOp, Value};
    use crate::parse::parser::parse_expr;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use std::collections::HashMap;

    fn eval_str(text: &str, dmem: &HashMap<String, Value>) -> Result<Value, VmError> {
        let expr = parse_expr(text, 1).unwrap();
        let mut rng = StdRng::seed_from_u64(0);
        eval(&expr, dmem, &mut rng, 1)
    }

    #[test]
    fn arithmetic_with_precedence() -> Result<(), VmError> {
        let dmem = HashMap::new();
        assert_eq!(eval_str("1 + 2 * 3", &dmem)?, Value::Integer(7));
        assert_eq!(eval_str("(1 + 2) * 3", &dmem)?, Value::Integer(9));
        assert_eq!(eval_str("7 / 2", &dmem)?, Value::Integer(3));
        assert_eq!(eval_str("10 % 3", &dmem)?, Value::Integer(1));
        assert_eq!(eval_str("17 % 5", &dmem)?, Value::Integer(2));

        Ok(())
    }

    #[test]
    fn variables_resolve_through_the_store() -> Result<(), VmError> {
        let mut dmem = HashMap::new();
        dmem.insert("a".to_string(), Value::Integer(6));
        dmem.insert("b".to_string(), Value::Integer(7));
        assert_eq!(eval_str("*a* * *b*", &dmem)?, Value::Integer(42));

        Ok(())
    }

    #[test]
    fn undefined_variable_is_fatal() {
        let dmem = HashMap::new();
        let err = eval_str("*missing* + 1", &dmem).unwrap_err();
        assert!(err.to_string().contains("missing"));
    }

    #[test]
    fn numeric_strings_coerce_in_arithmetic() -> Result<(), VmError> {
        let mut dmem = HashMap::new();
        dmem.insert("n".to_string(), Value::Text("42".to_string()));
        assert_eq!(eval_str("*n* + 1", &dmem)?, Value::Integer(43));

        dmem.insert("n".to_string(), Value::Text("nope".to_string()));
        assert!(eval_str("*n* + 1", &dmem).is_err());

        Ok(())
    }

    #[test]
    fn comparisons_yield_one_or_zero() -> Result<(), VmError> {
        let dmem = HashMap::new();
        assert_eq!(eval_str("5 == 5", &dmem)?, Value::Integer(1));
        assert_eq!(eval_str("5 != 5", &dmem)?, Value::Integer(0));
        assert_eq!(eval_str("3 < 5", &dmem)?, Value::Integer(1));
        assert_eq!(eval_str("3 >= 5", &dmem)?, Value::Integer(0));
        assert_eq!(eval_str("#abc# < #abd#", &dmem)?, Value::Integer(1));
        assert_eq!(eval_str("#Alice# == #alice#", &dmem)?, Value::Integer(0));

        Ok(())
    }

    #[test]
    fn mixed_kind_equality_is_false_not_fatal() -> Result<(), VmError> {
        let dmem = HashMap::new();
        assert_eq!(eval_str("5 == #5#", &dmem)?, Value::Integer(0));
        assert_eq!(eval_str("5 != #5#", &dmem)?, Value::Integer(1));

        Ok(())
    }

    #[test]
    fn mixed_kind_ordering_is_fatal() {
        let dmem = HashMap::new();
        assert!(eval_str("5 < #abc#", &dmem).is_err());
    }

    #[test]
    fn division_by_zero_is_fatal() {
        let dmem = HashMap::new();
        assert!(eval_str("1 / 0", &dmem).is_err());
        assert!(eval_str("1 % 0", &dmem).is_err());
    }

    #[test]
    fn rng_stays_in_bounds() -> Result<(), VmError> {
        let dmem = HashMap::new();
        for _ in 0..32 {
            match eval_str("rng 1 6", &dmem)? {
                Value::Integer(n) => assert!((1..=6).contains(&n)),
                other => panic!("expected an integer, got {:?}", other),
            }
        }
        assert_eq!(eval_str("rng 3 3", &dmem)?, Value::Integer(3));
        assert!(eval_str("rng 6 1", &dmem).is_err());

        Ok(())
    }

    #[test]
    fn folding_helper_matches_runtime_semantics() -> Result<(), VmError> {
        let v = apply_binary(
            BinOp::Equal,
            &Value::Text("a".to_string()),
            &Value::Text("a".to_string()),
            1,
        )?;
        assert_eq!(v, Value::Integer(1));
        assert_eq!(as_int(&Value::Text(" 7 ".to_string()), 1)?, 7);

        Ok(())
    }
}
