//! Arithmetic, comparison and membership on script values.

use crate::ast::{BinaryOp, CompareOp, UnaryOp};
use crate::error::ScriptError;
use crate::options::ExecutionOptions;
use crate::value::{too_deep, Dict, Number, Value, MAX_VALUE_DEPTH};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, MathematicalOps};
use std::cmp::Ordering;
use std::rc::Rc;

pub fn binary(
    operator: BinaryOp,
    left: &Value,
    right: &Value,
    limits: &ExecutionOptions,
) -> Result<Value, ScriptError> {
    match (left, right) {
        (Value::Bool(a), Value::Bool(b))
            if matches!(operator, BinaryOp::BitAnd | BinaryOp::BitOr | BinaryOp::BitXor) =>
        {
            let value = match operator {
                BinaryOp::BitAnd => a & b,
                BinaryOp::BitOr => a | b,
                _ => a ^ b,
            };
            return Ok(Value::Bool(value));
        }
        (Value::Str(a), Value::Str(b)) if operator == BinaryOp::Add => {
            limits.check_len(a.len() + b.len())?;
            return Ok(Value::from(format!("{}{}", a, b)));
        }
        (Value::List(a), Value::List(b)) if operator == BinaryOp::Add => {
            let mut items = a.borrow().clone();
            items.extend(b.borrow().iter().cloned());
            limits.check_len(items.len())?;
            return Ok(Value::list(items));
        }
        (Value::Tuple(a), Value::Tuple(b)) if operator == BinaryOp::Add => {
            limits.check_len(a.len() + b.len())?;
            return Ok(Value::tuple(a.iter().chain(b.iter()).cloned().collect()));
        }
        (Value::Set(_), Value::Set(_))
            if matches!(
                operator,
                BinaryOp::Subtract | BinaryOp::BitOr | BinaryOp::BitAnd | BinaryOp::BitXor
            ) =>
        {
            return set_operation(operator, left, right);
        }
        (Value::Dict(a), Value::Dict(b)) if operator == BinaryOp::BitOr => {
            let mut merged: Dict = a.borrow().clone();
            for (key, value) in b.borrow().iter() {
                merged.insert(key.clone(), value.clone());
            }
            return Ok(Value::dict(merged));
        }
        _ => {}
    }

    if operator == BinaryOp::Multiply {
        if let Some(value) = repeat(left, right, limits)? {
            return Ok(value);
        }
    }

    match (left.as_number(), right.as_number()) {
        (Some(a), Some(b)) => arithmetic(operator, a, b, left, right),
        _ => Err(unsupported(operator, left, right)),
    }
}

fn unsupported(operator: BinaryOp, left: &Value, right: &Value) -> ScriptError {
    match (operator, left) {
        (BinaryOp::Add, Value::Str(_) | Value::List(_) | Value::Tuple(_)) => ScriptError::type_error(format!(
            "can only concatenate {} (not \"{}\") to {}",
            left.type_name(),
            right.type_name(),
            left.type_name()
        )),
        _ => ScriptError::type_error(format!(
            "unsupported operand type(s) for {}: '{}' and '{}'",
            operator.symbol(),
            left.type_name(),
            right.type_name()
        )),
    }
}

fn overflow() -> ScriptError {
    ScriptError::overflow("integer overflow: result does not fit in 64 bits")
}

/// `sequence * count` in either order.
fn repeat(left: &Value, right: &Value, limits: &ExecutionOptions) -> Result<Option<Value>, ScriptError> {
    let (sequence, count) = match (left.as_int(), right.as_int()) {
        (None, Some(count)) => (left, count),
        (Some(count), None) => (right, count),
        _ => return Ok(None),
    };
    let count = usize::try_from(count).unwrap_or(0);

    let len = match sequence {
        Value::Str(s) => s.len(),
        Value::List(items) => items.borrow().len(),
        Value::Tuple(items) => items.len(),
        _ => return Ok(None),
    };
    limits.check_len(len.checked_mul(count).unwrap_or(usize::MAX))?;

    let value = match sequence {
        Value::Str(s) => Value::from(s.repeat(count)),
        Value::List(items) => {
            let items = items.borrow();
            Value::list(items.iter().cycle().take(items.len() * count).cloned().collect())
        }
        Value::Tuple(items) => Value::tuple(items.iter().cycle().take(items.len() * count).cloned().collect()),
        _ => return Ok(None),
    };
    Ok(Some(value))
}

fn set_operation(operator: BinaryOp, left: &Value, right: &Value) -> Result<Value, ScriptError> {
    let (Value::Set(a), Value::Set(b)) = (left, right) else {
        return Err(unsupported(operator, left, right));
    };
    let (a, b) = (a.borrow(), b.borrow());
    let in_b = |x: &Value| b.iter().any(|y| x.key_eq(y));
    let in_a = |y: &Value| a.iter().any(|x| x.key_eq(y));

    let items: Vec<Value> = match operator {
        BinaryOp::Subtract => a.iter().filter(|x| !in_b(x)).cloned().collect(),
        BinaryOp::BitAnd => a.iter().filter(|x| in_b(x)).cloned().collect(),
        BinaryOp::BitOr => a.iter().chain(b.iter().filter(|y| !in_a(y))).cloned().collect(),
        _ => a
            .iter()
            .filter(|x| !in_b(x))
            .chain(b.iter().filter(|y| !in_a(y)))
            .cloned()
            .collect(),
    };
    Value::set(items)
}

fn arithmetic(
    operator: BinaryOp,
    a: Number,
    b: Number,
    left: &Value,
    right: &Value,
) -> Result<Value, ScriptError> {
    match (a, b) {
        (Number::Int(x), Number::Int(y)) => int_arithmetic(operator, x, y, left, right),
        (Number::Decimal(_), Number::Float(_)) | (Number::Float(_), Number::Decimal(_)) => {
            Err(unsupported(operator, left, right))
        }
        (Number::Decimal(_), _) | (_, Number::Decimal(_)) => {
            decimal_arithmetic(operator, to_decimal(a), to_decimal(b), left, right)
        }
        _ => float_arithmetic(operator, a.to_f64(), b.to_f64(), left, right),
    }
}

fn to_decimal(number: Number) -> Decimal {
    match number {
        Number::Int(n) => Decimal::from(n),
        Number::Decimal(d) => d,
        Number::Float(f) => Decimal::from_f64_retain(f).unwrap_or_default(),
    }
}

fn int_arithmetic(operator: BinaryOp, x: i64, y: i64, left: &Value, right: &Value) -> Result<Value, ScriptError> {
    let value = match operator {
        BinaryOp::Add => x.checked_add(y).ok_or_else(overflow)?,
        BinaryOp::Subtract => x.checked_sub(y).ok_or_else(overflow)?,
        BinaryOp::Multiply => x.checked_mul(y).ok_or_else(overflow)?,
        BinaryOp::Divide => {
            if y == 0 {
                return Err(ScriptError::zero_division("division by zero"));
            }
            return Ok(Value::Float(x as f64 / y as f64));
        }
        BinaryOp::FloorDivide => {
            if y == 0 {
                return Err(ScriptError::zero_division("integer division or modulo by zero"));
            }
            let quotient = x.checked_div(y).ok_or_else(overflow)?;
            if x % y != 0 && ((x < 0) != (y < 0)) {
                quotient - 1
            } else {
                quotient
            }
        }
        BinaryOp::Modulo => {
            if y == 0 {
                return Err(ScriptError::zero_division("integer modulo by zero"));
            }
            let remainder = x.wrapping_rem(y);
            if remainder != 0 && ((remainder < 0) != (y < 0)) {
                remainder + y
            } else {
                remainder
            }
        }
        BinaryOp::Power => {
            if y < 0 {
                if x == 0 {
                    return Err(ScriptError::zero_division("0.0 cannot be raised to a negative power"));
                }
                return Ok(Value::Float((x as f64).powf(y as f64)));
            }
            match x {
                0 => i64::from(y == 0),
                1 => 1,
                -1 => {
                    if y % 2 == 0 {
                        1
                    } else {
                        -1
                    }
                }
                _ => u32::try_from(y)
                    .ok()
                    .and_then(|exponent| x.checked_pow(exponent))
                    .ok_or_else(overflow)?,
            }
        }
        BinaryOp::BitAnd => x & y,
        BinaryOp::BitOr => x | y,
        BinaryOp::BitXor => x ^ y,
        BinaryOp::LeftShift => {
            if y < 0 {
                return Err(ScriptError::value_error("negative shift count"));
            }
            if x == 0 {
                0
            } else if y >= 63 {
                return Err(overflow());
            } else {
                let shifted = x << y;
                if shifted >> y != x {
                    return Err(overflow());
                }
                shifted
            }
        }
        BinaryOp::RightShift => {
            if y < 0 {
                return Err(ScriptError::value_error("negative shift count"));
            }
            if y >= 64 {
                if x < 0 {
                    -1
                } else {
                    0
                }
            } else {
                x >> y
            }
        }
        BinaryOp::MatMultiply => return Err(unsupported(operator, left, right)),
    };
    Ok(Value::Int(value))
}

fn float_arithmetic(operator: BinaryOp, x: f64, y: f64, left: &Value, right: &Value) -> Result<Value, ScriptError> {
    let value = match operator {
        BinaryOp::Add => x + y,
        BinaryOp::Subtract => x - y,
        BinaryOp::Multiply => x * y,
        BinaryOp::Divide => {
            if y == 0.0 {
                return Err(ScriptError::zero_division("float division by zero"));
            }
            x / y
        }
        BinaryOp::FloorDivide => {
            if y == 0.0 {
                return Err(ScriptError::zero_division("float floor division by zero"));
            }
            (x / y).floor()
        }
        BinaryOp::Modulo => {
            if y == 0.0 {
                return Err(ScriptError::zero_division("float modulo"));
            }
            let remainder = x % y;
            if remainder != 0.0 && ((remainder < 0.0) != (y < 0.0)) {
                remainder + y
            } else {
                remainder
            }
        }
        BinaryOp::Power => {
            if x == 0.0 && y < 0.0 {
                return Err(ScriptError::zero_division("0.0 cannot be raised to a negative power"));
            }
            if x < 0.0 && y.fract() != 0.0 {
                return Err(ScriptError::value_error(
                    "negative number cannot be raised to a fractional power",
                ));
            }
            let value = x.powf(y);
            if value.is_infinite() && x.is_finite() && y.is_finite() {
                return Err(ScriptError::overflow("numerical result out of range"));
            }
            value
        }
        _ => return Err(unsupported(operator, left, right)),
    };
    Ok(Value::Float(value))
}

fn decimal_arithmetic(
    operator: BinaryOp,
    x: Decimal,
    y: Decimal,
    left: &Value,
    right: &Value,
) -> Result<Value, ScriptError> {
    let overflow = || ScriptError::overflow("decimal result out of range");
    let value = match operator {
        BinaryOp::Add => x.checked_add(y).ok_or_else(overflow)?,
        BinaryOp::Subtract => x.checked_sub(y).ok_or_else(overflow)?,
        BinaryOp::Multiply => x.checked_mul(y).ok_or_else(overflow)?,
        BinaryOp::Divide | BinaryOp::FloorDivide | BinaryOp::Modulo if y.is_zero() => {
            return Err(ScriptError::zero_division("decimal division by zero"));
        }
        BinaryOp::Divide => x.checked_div(y).ok_or_else(overflow)?,
        BinaryOp::FloorDivide => x.checked_div(y).ok_or_else(overflow)?.trunc(),
        BinaryOp::Modulo => x.checked_rem(y).ok_or_else(overflow)?,
        BinaryOp::Power => decimal_power(x, y).ok_or_else(|| {
            ScriptError::value_error(format!("cannot raise Decimal('{}') to the power {}", x, y))
        })?,
        _ => return Err(unsupported(operator, left, right)),
    };
    Ok(Value::Decimal(value))
}

fn decimal_power(base: Decimal, exponent: Decimal) -> Option<Decimal> {
    if exponent.is_zero() {
        return Some(Decimal::ONE);
    }
    if base.is_zero() {
        return if exponent.is_sign_positive() { Some(Decimal::ZERO) } else { None };
    }
    if exponent.fract().is_zero() {
        if let Some(exponent) = exponent.to_i64() {
            return base.checked_powi(exponent);
        }
    }
    if base.is_sign_negative() {
        return None;
    }
    base.checked_powd(exponent)
}

pub fn unary(operator: UnaryOp, operand: &Value) -> Result<Value, ScriptError> {
    let bad_operand = |symbol: &str| {
        ScriptError::type_error(format!(
            "bad operand type for unary {}: '{}'",
            symbol,
            operand.type_name()
        ))
    };

    match operator {
        UnaryOp::Not => Ok(Value::Bool(!operand.is_truthy())),
        UnaryOp::Negate => match operand.as_number() {
            Some(Number::Int(n)) => n.checked_neg().map(Value::Int).ok_or_else(overflow),
            Some(Number::Float(f)) => Ok(Value::Float(-f)),
            Some(Number::Decimal(d)) => Ok(Value::Decimal(-d)),
            None => Err(bad_operand("-")),
        },
        UnaryOp::Plus => match operand.as_number() {
            Some(Number::Int(n)) => Ok(Value::Int(n)),
            Some(Number::Float(f)) => Ok(Value::Float(f)),
            Some(Number::Decimal(d)) => Ok(Value::Decimal(d)),
            None => Err(bad_operand("+")),
        },
        UnaryOp::Invert => match operand.as_int() {
            Some(n) => Ok(Value::Int(!n)),
            None => Err(bad_operand("~")),
        },
    }
}

pub fn compare(operator: CompareOp, left: &Value, right: &Value) -> Result<bool, ScriptError> {
    match operator {
        CompareOp::Equal => left.equals(right),
        CompareOp::NotEqual => Ok(!left.equals(right)?),
        CompareOp::Is => Ok(left.is_same(right)),
        CompareOp::IsNot => Ok(!left.is_same(right)),
        CompareOp::In => contains(right, left),
        CompareOp::NotIn => Ok(!contains(right, left)?),
        CompareOp::Less | CompareOp::LessEqual | CompareOp::Greater | CompareOp::GreaterEqual => {
            if let (Value::Set(_), Value::Set(_)) = (left, right) {
                return Ok(set_comparison(operator, left, right));
            }
            let ordering = partial_order(left, right, operator.symbol())?;
            Ok(match operator {
                CompareOp::Less => ordering == Some(Ordering::Less),
                CompareOp::LessEqual => matches!(ordering, Some(Ordering::Less | Ordering::Equal)),
                CompareOp::Greater => ordering == Some(Ordering::Greater),
                _ => matches!(ordering, Some(Ordering::Greater | Ordering::Equal)),
            })
        }
    }
}

fn set_comparison(operator: CompareOp, left: &Value, right: &Value) -> bool {
    let (Value::Set(a), Value::Set(b)) = (left, right) else {
        return false;
    };
    let (a, b) = (a.borrow(), b.borrow());
    let a_in_b = a.iter().all(|x| b.iter().any(|y| x.key_eq(y)));
    let b_in_a = b.iter().all(|y| a.iter().any(|x| x.key_eq(y)));
    match operator {
        CompareOp::Less => a_in_b && a.len() < b.len(),
        CompareOp::LessEqual => a_in_b,
        CompareOp::Greater => b_in_a && a.len() > b.len(),
        _ => b_in_a,
    }
}

/// Ordering of two values; `None` when either is NaN.
pub fn partial_order(left: &Value, right: &Value, symbol: &str) -> Result<Option<Ordering>, ScriptError> {
    order_at(left, right, symbol, 0)
}

fn order_at(left: &Value, right: &Value, symbol: &str, depth: usize) -> Result<Option<Ordering>, ScriptError> {
    if depth > MAX_VALUE_DEPTH {
        return Err(too_deep("comparison"));
    }
    let ordering = match (left, right) {
        (Value::Str(a), Value::Str(b)) => Some(a.cmp(b)),
        (Value::Date(a), Value::Date(b)) => Some(a.cmp(b)),
        (Value::DateTime(a), Value::DateTime(b)) => Some(a.cmp(b)),
        (Value::List(a), Value::List(b)) => lexicographic(&a.borrow(), &b.borrow(), symbol, depth)?,
        (Value::Tuple(a), Value::Tuple(b)) => lexicographic(a, b, symbol, depth)?,
        _ => match (left.as_number(), right.as_number()) {
            (Some(a), Some(b)) => a.compare(&b),
            _ => {
                return Err(ScriptError::type_error(format!(
                    "'{}' not supported between instances of '{}' and '{}'",
                    symbol,
                    left.type_name(),
                    right.type_name()
                )));
            }
        },
    };
    Ok(ordering)
}

fn lexicographic(a: &[Value], b: &[Value], symbol: &str, depth: usize) -> Result<Option<Ordering>, ScriptError> {
    for (x, y) in a.iter().zip(b) {
        if !x.equals(y)? {
            return order_at(x, y, symbol, depth + 1);
        }
    }
    Ok(Some(a.len().cmp(&b.len())))
}

/// Total order used by `sorted`, `min` and `max`.
pub fn sort_order(left: &Value, right: &Value) -> Result<Ordering, ScriptError> {
    Ok(partial_order(left, right, "<")?.unwrap_or(Ordering::Equal))
}

pub fn contains(container: &Value, item: &Value) -> Result<bool, ScriptError> {
    match container {
        Value::Str(haystack) => match item {
            Value::Str(needle) => Ok(haystack.contains(needle.as_ref())),
            other => Err(ScriptError::type_error(format!(
                "'in <string>' requires string as left operand, not {}",
                other.type_name()
            ))),
        },
        Value::List(items) => any_equal(&items.borrow(), item),
        Value::Tuple(items) => any_equal(items, item),
        Value::Set(items) => {
            item.check_hashable()?;
            Ok(items.borrow().iter().any(|x| x.key_eq(item)))
        }
        Value::Dict(dict) => {
            item.check_hashable()?;
            Ok(dict.borrow().contains_key(item))
        }
        Value::Range(range) => Ok(match item.as_number() {
            Some(Number::Int(n)) => range.contains(n),
            Some(Number::Float(f)) if f.fract() == 0.0 && f.abs() < 9.2e18 => range.contains(f as i64),
            _ => false,
        }),
        other => Err(ScriptError::type_error(format!(
            "argument of type '{}' is not iterable",
            other.type_name()
        ))),
    }
}

fn any_equal(items: &[Value], item: &Value) -> Result<bool, ScriptError> {
    for candidate in items {
        if candidate.is_same(item) || candidate.equals(item)? {
            return Ok(true);
        }
    }
    Ok(false)
}

/// In-place `list += iterable`; returns `None` when the target is not a list.
pub fn extend_in_place(target: &Value, items: Vec<Value>, limits: &ExecutionOptions) -> Result<Option<Value>, ScriptError> {
    let Value::List(list) = target else {
        return Ok(None);
    };
    let new_len = list.borrow().len() + items.len();
    limits.check_len(new_len)?;
    list.borrow_mut().extend(items);
    Ok(Some(Value::List(Rc::clone(list))))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use pretty_assertions::assert_eq;

    fn eval(operator: BinaryOp, left: Value, right: Value) -> Result<Value, ScriptError> {
        binary(operator, &left, &right, &ExecutionOptions::default())
    }

    #[test]
    fn division_follows_floor_semantics() {
        assert_eq!(eval(BinaryOp::Divide, Value::Int(7), Value::Int(2)).unwrap(), Value::Float(3.5));
        assert_eq!(eval(BinaryOp::FloorDivide, Value::Int(-7), Value::Int(2)).unwrap(), Value::Int(-4));
        assert_eq!(eval(BinaryOp::Modulo, Value::Int(-7), Value::Int(2)).unwrap(), Value::Int(1));
        assert_eq!(eval(BinaryOp::Modulo, Value::Float(7.5), Value::Int(-2)).unwrap(), Value::Float(-0.5));
        let error = eval(BinaryOp::Divide, Value::Int(1), Value::Int(0)).unwrap_err();
        assert_eq!(error.kind, ErrorKind::ZeroDivisionError);
        assert_eq!(error.message, "division by zero");
    }

    #[test]
    fn integer_overflow_is_reported() {
        let error = eval(BinaryOp::Power, Value::Int(10), Value::Int(40)).unwrap_err();
        assert_eq!(error.kind, ErrorKind::OverflowError);
        assert_eq!(eval(BinaryOp::Power, Value::Int(2), Value::Int(-1)).unwrap(), Value::Float(0.5));
        assert_eq!(eval(BinaryOp::Power, Value::Int(1), Value::Int(i64::MAX)).unwrap(), Value::Int(1));
    }

    #[test]
    fn decimal_mixes_with_int_but_not_float() {
        let price = Value::Decimal(Decimal::new(314, 2));
        assert_eq!(
            eval(BinaryOp::Add, price.clone(), Value::Int(1)).unwrap(),
            Value::Decimal(Decimal::new(414, 2))
        );
        let error = eval(BinaryOp::Add, price.clone(), Value::Float(1.0)).unwrap_err();
        assert_eq!(
            error.message,
            "unsupported operand type(s) for +: 'Decimal' and 'float'"
        );
        assert!(compare(CompareOp::Less, &price, &Value::Float(3.5)).unwrap());
    }

    #[test]
    fn sequences_concatenate_and_repeat() {
        assert_eq!(eval(BinaryOp::Add, Value::str("ab"), Value::str("c")).unwrap(), Value::str("abc"));
        assert_eq!(eval(BinaryOp::Multiply, Value::Int(2), Value::str("ab")).unwrap(), Value::str("abab"));
        assert_eq!(
            eval(BinaryOp::Multiply, Value::list(vec![Value::Int(1)]), Value::Int(3)).unwrap(),
            Value::list(vec![Value::Int(1), Value::Int(1), Value::Int(1)])
        );
        let error = eval(BinaryOp::Add, Value::str("a"), Value::Int(1)).unwrap_err();
        assert_eq!(error.message, "can only concatenate str (not \"int\") to str");
    }

    #[test]
    fn repetition_respects_the_sequence_limit() {
        let limits = ExecutionOptions {
            max_sequence_len: 10,
            ..ExecutionOptions::default()
        };
        let error = binary(BinaryOp::Multiply, &Value::str("ab"), &Value::Int(6), &limits).unwrap_err();
        assert_eq!(error.kind, ErrorKind::ResourceExceeded);
    }

    #[test]
    fn ordering_and_membership() {
        let a = Value::tuple(vec![Value::Int(1), Value::Int(2)]);
        let b = Value::tuple(vec![Value::Int(1), Value::Int(3)]);
        assert!(compare(CompareOp::Less, &a, &b).unwrap());
        assert!(compare(CompareOp::In, &Value::str("ell"), &Value::str("hello")).unwrap());
        assert!(compare(CompareOp::NotIn, &Value::Int(4), &a).unwrap());
        let error = compare(CompareOp::Less, &Value::str("a"), &Value::Int(1)).unwrap_err();
        assert_eq!(error.message, "'<' not supported between instances of 'str' and 'int'");
    }

    #[test]
    fn identity_distinguishes_equal_lists() {
        let a = Value::list(vec![]);
        let b = Value::list(vec![]);
        assert!(compare(CompareOp::Equal, &a, &b).unwrap());
        assert!(!compare(CompareOp::Is, &a, &b).unwrap());
        assert!(compare(CompareOp::Is, &a, &a.clone()).unwrap());
        assert!(compare(CompareOp::Is, &Value::None, &Value::None).unwrap());
    }
}
