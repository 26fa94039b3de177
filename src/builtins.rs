//! Free functions, type constructors, iteration and subscripting.

use crate::ast::BinaryOp;
use crate::error::{ErrorKind, ScriptError};
use crate::methods;
use crate::operators::{self, sort_order};
use crate::options::ExecutionOptions;
use crate::value::{too_deep, Dict, Number, Range, TypeKind, Value, MAX_VALUE_DEPTH};
use chrono::NaiveDate;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, MathematicalOps, RoundingStrategy};
use std::cmp::Ordering;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Builtin {
    Abs,
    All,
    Any,
    Len,
    Max,
    Min,
    Round,
    Sorted,
    Sum,
    Zip,
    IsInstance,
    IsSubclass,
    Exit,
}

impl Builtin {
    pub const ALL: [Builtin; 13] = [
        Builtin::Abs,
        Builtin::All,
        Builtin::Any,
        Builtin::Len,
        Builtin::Max,
        Builtin::Min,
        Builtin::Round,
        Builtin::Sorted,
        Builtin::Sum,
        Builtin::Zip,
        Builtin::IsInstance,
        Builtin::IsSubclass,
        Builtin::Exit,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Builtin::Abs => "abs",
            Builtin::All => "all",
            Builtin::Any => "any",
            Builtin::Len => "len",
            Builtin::Max => "max",
            Builtin::Min => "min",
            Builtin::Round => "round",
            Builtin::Sorted => "sorted",
            Builtin::Sum => "sum",
            Builtin::Zip => "zip",
            Builtin::IsInstance => "isinstance",
            Builtin::IsSubclass => "issubclass",
            Builtin::Exit => "exit",
        }
    }
}

pub type Keywords = Vec<(String, Value)>;

/// Arguments bound to named parameters; see [`bind`].
pub struct Bound(Vec<Option<Value>>);

impl Bound {
    pub fn take(&mut self, index: usize) -> Option<Value> {
        self.0.get_mut(index).and_then(Option::take)
    }

    /// A parameter [`bind`] already checked for presence.
    pub fn required(&mut self, index: usize) -> Value {
        self.take(index).unwrap_or(Value::None)
    }

    /// An optional parameter, treating an explicit `None` as absent.
    pub fn optional(&mut self, index: usize) -> Option<Value> {
        self.take(index).filter(|value| !matches!(value, Value::None))
    }
}

/// Binds positional then keyword arguments to `params`; the first
/// `required` parameters must be supplied.
pub fn bind(
    function: &str,
    params: &[&str],
    required: usize,
    args: Vec<Value>,
    kwargs: Keywords,
) -> Result<Bound, ScriptError> {
    if args.len() > params.len() {
        return Err(ScriptError::type_error(format!(
            "{}() takes at most {} argument{} ({} given)",
            function,
            params.len(),
            if params.len() == 1 { "" } else { "s" },
            args.len()
        )));
    }

    let mut slots: Vec<Option<Value>> = args.into_iter().map(Some).collect();
    slots.resize(params.len(), None);

    for (name, value) in kwargs {
        let index = params.iter().position(|param| *param == name).ok_or_else(|| {
            ScriptError::type_error(format!(
                "{}() got an unexpected keyword argument '{}'",
                function, name
            ))
        })?;
        if slots[index].is_some() {
            return Err(ScriptError::type_error(format!(
                "{}() got multiple values for argument '{}'",
                function, name
            )));
        }
        slots[index] = Some(value);
    }

    if let Some((param, _)) = params[..required]
        .iter()
        .zip(&slots)
        .find(|(_, slot)| slot.is_none())
    {
        return Err(ScriptError::type_error(format!(
            "{}() missing required argument: '{}'",
            function, param
        )));
    }

    Ok(Bound(slots))
}

pub fn no_keywords(function: &str, kwargs: &Keywords) -> Result<(), ScriptError> {
    match kwargs.first() {
        Some((name, _)) => Err(ScriptError::type_error(format!(
            "{}() got an unexpected keyword argument '{}'",
            function, name
        ))),
        None => Ok(()),
    }
}

/// Exactly one positional argument.
pub fn single(function: &str, mut args: Vec<Value>, kwargs: &Keywords) -> Result<Value, ScriptError> {
    no_keywords(function, kwargs)?;
    if args.len() != 1 {
        return Err(ScriptError::type_error(format!(
            "{}() takes exactly one argument ({} given)",
            function,
            args.len()
        )));
    }
    Ok(args.remove(0))
}

pub fn no_arguments(function: &str, args: &[Value], kwargs: &Keywords) -> Result<(), ScriptError> {
    no_keywords(function, kwargs)?;
    if !args.is_empty() {
        return Err(ScriptError::type_error(format!(
            "{}() takes no arguments ({} given)",
            function,
            args.len()
        )));
    }
    Ok(())
}

pub fn expect_int(value: &Value) -> Result<i64, ScriptError> {
    value.as_int().ok_or_else(|| {
        ScriptError::type_error(format!(
            "'{}' object cannot be interpreted as an integer",
            value.type_name()
        ))
    })
}

/// Calls anything callable: builtins, type constructors and bound methods.
pub fn call(callee: &Value, args: Vec<Value>, kwargs: Keywords, limits: &ExecutionOptions) -> Result<Value, ScriptError> {
    match callee {
        Value::Builtin(builtin) => call_builtin(*builtin, args, kwargs, limits),
        Value::Type(kind) => construct(*kind, args, kwargs, limits),
        Value::Method(method) => methods::call_method(method, args, kwargs, limits),
        other => Err(ScriptError::type_error(format!(
            "'{}' object is not callable",
            other.type_name()
        ))),
    }
}

pub fn call_builtin(
    builtin: Builtin,
    args: Vec<Value>,
    kwargs: Keywords,
    limits: &ExecutionOptions,
) -> Result<Value, ScriptError> {
    let name = builtin.name();
    match builtin {
        Builtin::Abs => {
            let value = single(name, args, &kwargs)?;
            match value.as_number() {
                Some(Number::Int(n)) => n
                    .checked_abs()
                    .map(Value::Int)
                    .ok_or_else(|| ScriptError::overflow("integer overflow: result does not fit in 64 bits")),
                Some(Number::Float(f)) => Ok(Value::Float(f.abs())),
                Some(Number::Decimal(d)) => Ok(Value::Decimal(d.abs())),
                None => Err(ScriptError::type_error(format!(
                    "bad operand type for abs(): '{}'",
                    value.type_name()
                ))),
            }
        }
        Builtin::All => {
            let items = iterate(&single(name, args, &kwargs)?, limits)?;
            Ok(Value::Bool(items.iter().all(Value::is_truthy)))
        }
        Builtin::Any => {
            let items = iterate(&single(name, args, &kwargs)?, limits)?;
            Ok(Value::Bool(items.iter().any(Value::is_truthy)))
        }
        Builtin::Len => {
            let value = single(name, args, &kwargs)?;
            length(&value).map(|len| Value::Int(len as i64))
        }
        Builtin::Max => extremum(name, args, kwargs, Ordering::Greater, limits),
        Builtin::Min => extremum(name, args, kwargs, Ordering::Less, limits),
        Builtin::Round => {
            let mut bound = bind(name, &["number", "ndigits"], 1, args, kwargs)?;
            let number = bound.required(0);
            let ndigits = bound.optional(1).map(|value| expect_int(&value)).transpose()?;
            round(&number, ndigits)
        }
        Builtin::Sorted => {
            let mut bound = bind(name, &["iterable", "reverse"], 1, args, kwargs)?;
            let items = iterate(&bound.required(0), limits)?;
            let reverse = bound.take(1).is_some_and(|value| value.is_truthy());
            Ok(Value::list(sort_values(items, reverse)?))
        }
        Builtin::Sum => {
            let mut bound = bind(name, &["iterable", "start"], 1, args, kwargs)?;
            let items = iterate(&bound.required(0), limits)?;
            let start = bound.take(1).unwrap_or(Value::Int(0));
            if let Value::Str(_) = start {
                return Err(ScriptError::type_error(
                    "sum() can't sum strings [use ''.join(seq) instead]",
                ));
            }
            items
                .iter()
                .try_fold(start, |total, item| operators::binary(BinaryOp::Add, &total, item, limits))
        }
        Builtin::Zip => {
            no_keywords(name, &kwargs)?;
            let columns = args
                .iter()
                .map(|arg| iterate(arg, limits))
                .collect::<Result<Vec<_>, _>>()?;
            let rows = columns.iter().map(Vec::len).min().unwrap_or(0);
            Ok(Value::list(
                (0..rows)
                    .map(|row| Value::tuple(columns.iter().map(|column| column[row].clone()).collect()))
                    .collect(),
            ))
        }
        Builtin::IsInstance => {
            let mut bound = bind(name, &["obj", "class_or_tuple"], 2, args, kwargs)?;
            let value = bound.required(0);
            let classes = bound.required(1);
            type_matches(name, value.type_kind(), &classes, 0).map(Value::Bool)
        }
        Builtin::IsSubclass => {
            let mut bound = bind(name, &["cls", "class_or_tuple"], 2, args, kwargs)?;
            let Value::Type(kind) = bound.required(0) else {
                return Err(ScriptError::type_error("issubclass() arg 1 must be a class"));
            };
            type_matches(name, kind, &bound.required(1), 0).map(Value::Bool)
        }
        Builtin::Exit => {
            bind(name, &["code"], 0, args, kwargs)?;
            Err(ScriptError::new(ErrorKind::SystemExit, "exit() called"))
        }
    }
}

fn type_matches(function: &str, kind: TypeKind, classes: &Value, depth: usize) -> Result<bool, ScriptError> {
    if depth > MAX_VALUE_DEPTH {
        return Err(too_deep(function));
    }
    match classes {
        Value::Type(class) => Ok(kind.is_subtype_of(class)),
        Value::Tuple(items) => {
            for item in items.iter() {
                if type_matches(function, kind, item, depth + 1)? {
                    return Ok(true);
                }
            }
            Ok(false)
        }
        _ => Err(ScriptError::type_error(format!(
            "{}() arg 2 must be a type or tuple of types",
            function
        ))),
    }
}

fn extremum(
    function: &str,
    args: Vec<Value>,
    kwargs: Keywords,
    wanted: Ordering,
    limits: &ExecutionOptions,
) -> Result<Value, ScriptError> {
    let mut default = None;
    for (name, value) in kwargs {
        if name != "default" {
            return Err(ScriptError::type_error(format!(
                "{}() got an unexpected keyword argument '{}'",
                function, name
            )));
        }
        default = Some(value);
    }

    let items = match args.len() {
        0 => {
            return Err(ScriptError::type_error(format!(
                "{} expected at least 1 argument, got 0",
                function
            )));
        }
        1 => iterate(&args[0], limits)?,
        _ if default.is_some() => {
            return Err(ScriptError::type_error(format!(
                "Cannot specify a default for {}() with multiple positional arguments",
                function
            )));
        }
        _ => args,
    };

    let mut best: Option<Value> = None;
    for item in items {
        let replace = match &best {
            None => true,
            Some(current) => sort_order(&item, current)? == wanted,
        };
        if replace {
            best = Some(item);
        }
    }

    best.or(default)
        .ok_or_else(|| ScriptError::value_error(format!("{}() arg is an empty sequence", function)))
}

/// Stable merge sort that stops at the first failed comparison.
pub fn sort_values(mut items: Vec<Value>, reverse: bool) -> Result<Vec<Value>, ScriptError> {
    if items.len() <= 1 {
        return Ok(items);
    }

    let right = items.split_off(items.len() / 2);
    let left = sort_values(items, reverse)?;
    let right = sort_values(right, reverse)?;

    let mut merged = Vec::with_capacity(left.len() + right.len());
    let mut left = left.into_iter().peekable();
    let mut right = right.into_iter().peekable();
    while let (Some(l), Some(r)) = (left.peek(), right.peek()) {
        let right_first = if reverse {
            sort_order(l, r)? == Ordering::Less
        } else {
            sort_order(r, l)? == Ordering::Less
        };
        merged.extend(if right_first { right.next() } else { left.next() });
    }
    merged.extend(left);
    merged.extend(right);
    Ok(merged)
}

fn round(number: &Value, ndigits: Option<i64>) -> Result<Value, ScriptError> {
    match (number.as_number(), ndigits) {
        (Some(Number::Int(n)), None) => Ok(Value::Int(n)),
        (Some(Number::Int(n)), Some(digits)) if digits >= 0 => Ok(Value::Int(n)),
        (Some(Number::Int(n)), Some(digits)) => round_int(n, digits.unsigned_abs()).map(Value::Int),
        (Some(Number::Float(f)), None) => float_to_int(f.round_ties_even()).map(Value::Int),
        (Some(Number::Float(f)), Some(digits)) => Ok(Value::Float(round_float(f, digits))),
        (Some(Number::Decimal(d)), None) => d
            .round_dp_with_strategy(0, RoundingStrategy::MidpointNearestEven)
            .to_i64()
            .map(Value::Int)
            .ok_or_else(|| ScriptError::overflow("cannot convert Decimal to a 64-bit integer")),
        (Some(Number::Decimal(d)), Some(digits)) if digits >= 0 => Ok(Value::Decimal(
            d.round_dp_with_strategy(digits.min(28) as u32, RoundingStrategy::MidpointNearestEven),
        )),
        (Some(Number::Decimal(d)), Some(digits)) => {
            // Past 10^28 every representable decimal rounds to zero.
            let Some(scale) = Decimal::TEN.checked_powi(digits.unsigned_abs().min(29) as i64) else {
                return Ok(Value::Decimal(Decimal::ZERO));
            };
            let rounded = (d / scale).round_dp_with_strategy(0, RoundingStrategy::MidpointNearestEven);
            rounded
                .checked_mul(scale)
                .map(Value::Decimal)
                .ok_or_else(|| ScriptError::overflow("decimal result out of range"))
        }
        (None, _) => Err(ScriptError::type_error(format!(
            "type {} doesn't define __round__ method",
            number.type_name()
        ))),
    }
}

fn round_int(n: i64, digits: u64) -> Result<i64, ScriptError> {
    if digits >= 19 {
        return Ok(0);
    }
    let scale = 10i64.pow(digits as u32);
    let quotient = n.div_euclid(scale);
    let twice_remainder = 2 * n.rem_euclid(scale);
    let quotient = if twice_remainder > scale || (twice_remainder == scale && quotient % 2 != 0) {
        quotient + 1
    } else {
        quotient
    };
    quotient
        .checked_mul(scale)
        .ok_or_else(|| ScriptError::overflow("integer overflow: result does not fit in 64 bits"))
}

fn round_float(value: f64, digits: i64) -> f64 {
    if !value.is_finite() || digits > 300 {
        return value;
    }
    if digits >= 0 {
        if let Some(exact) = Decimal::from_f64_retain(value) {
            let rounded = exact.round_dp_with_strategy(digits.min(28) as u32, RoundingStrategy::MidpointNearestEven);
            if let Some(result) = rounded.to_f64() {
                return result;
            }
        }
        let scale = 10f64.powi(digits as i32);
        return (value * scale).round_ties_even() / scale;
    }
    let scale = 10f64.powi(digits.unsigned_abs().min(308) as i32);
    (value / scale).round_ties_even() * scale
}

pub fn float_to_int(value: f64) -> Result<i64, ScriptError> {
    if value.is_nan() {
        return Err(ScriptError::value_error("cannot convert float NaN to integer"));
    }
    if value.is_infinite() {
        return Err(ScriptError::overflow("cannot convert float infinity to integer"));
    }
    if value >= 9.223_372_036_854_775_807e18 || value < -9.223_372_036_854_775_808e18 {
        return Err(ScriptError::overflow("integer overflow: result does not fit in 64 bits"));
    }
    Ok(value.trunc() as i64)
}

/// Calls a type object: `int("3")`, `date(2024, 1, 31)`, `range(5)`, ...
pub fn construct(
    kind: TypeKind,
    args: Vec<Value>,
    kwargs: Keywords,
    limits: &ExecutionOptions,
) -> Result<Value, ScriptError> {
    let name = kind.name();
    match kind {
        TypeKind::Type => Ok(Value::Type(single(name, args, &kwargs)?.type_kind())),
        TypeKind::Bool => {
            let mut bound = bind(name, &["x"], 0, args, kwargs)?;
            Ok(Value::Bool(bound.take(0).is_some_and(|value| value.is_truthy())))
        }
        TypeKind::Int => {
            let mut bound = bind(name, &["x", "base"], 0, args, kwargs)?;
            let value = bound.take(0);
            if let Some(base) = bound.take(1) {
                let base = expect_int(&base)?;
                return match value {
                    Some(Value::Str(text)) => parse_int(&text, base).map(Value::Int),
                    _ => Err(ScriptError::type_error("int() can't convert non-string with explicit base")),
                };
            }
            match value {
                None => Ok(Value::Int(0)),
                Some(Value::Str(text)) => parse_int(&text, 10).map(Value::Int),
                Some(value) => match value.as_number() {
                    Some(Number::Int(n)) => Ok(Value::Int(n)),
                    Some(Number::Float(f)) => float_to_int(f).map(Value::Int),
                    Some(Number::Decimal(d)) => d
                        .trunc()
                        .to_i64()
                        .map(Value::Int)
                        .ok_or_else(|| ScriptError::overflow("cannot convert Decimal to a 64-bit integer")),
                    None => Err(ScriptError::type_error(format!(
                        "int() argument must be a string or a real number, not '{}'",
                        value.type_name()
                    ))),
                },
            }
        }
        TypeKind::Float => {
            let mut bound = bind(name, &["x"], 0, args, kwargs)?;
            match bound.take(0) {
                None => Ok(Value::Float(0.0)),
                Some(Value::Str(text)) => parse_float(&text).map(Value::Float),
                Some(value) => match value.as_number() {
                    Some(number) => Ok(Value::Float(number.to_f64())),
                    None => Err(ScriptError::type_error(format!(
                        "float() argument must be a string or a real number, not '{}'",
                        value.type_name()
                    ))),
                },
            }
        }
        TypeKind::Decimal => {
            let mut bound = bind(name, &["value"], 0, args, kwargs)?;
            match bound.take(0) {
                None => Ok(Value::Decimal(Decimal::ZERO)),
                Some(Value::Str(text)) => parse_decimal(&text).map(Value::Decimal),
                Some(value) => match value.as_number() {
                    Some(Number::Int(n)) => Ok(Value::Decimal(Decimal::from(n))),
                    Some(Number::Decimal(d)) => Ok(Value::Decimal(d)),
                    Some(Number::Float(f)) => Decimal::from_f64_retain(f)
                        .map(Value::Decimal)
                        .ok_or_else(|| ScriptError::value_error(format!("cannot convert {} to Decimal", value))),
                    None => Err(ScriptError::type_error(format!(
                        "conversion from {} to Decimal is not supported",
                        value.type_name()
                    ))),
                },
            }
        }
        TypeKind::Str => {
            let mut bound = bind(name, &["object"], 0, args, kwargs)?;
            Ok(bound.take(0).map_or_else(|| Value::str(""), |value| Value::from(value.to_string())))
        }
        TypeKind::List | TypeKind::Tuple | TypeKind::Set => {
            let mut bound = bind(name, &["iterable"], 0, args, kwargs)?;
            let items = match bound.take(0) {
                Some(value) => iterate(&value, limits)?,
                None => Vec::new(),
            };
            match kind {
                TypeKind::List => Ok(Value::list(items)),
                TypeKind::Tuple => Ok(Value::tuple(items)),
                _ => Value::set(items),
            }
        }
        TypeKind::Dict => {
            if args.len() > 1 {
                return Err(ScriptError::type_error(format!(
                    "dict expected at most 1 argument, got {}",
                    args.len()
                )));
            }
            let mut dict = Dict::new();
            if let Some(source) = args.first() {
                update_dict(&mut dict, source, limits)?;
            }
            for (key, value) in kwargs {
                dict.insert(Value::from(key), value);
            }
            Ok(Value::dict(dict))
        }
        TypeKind::Date => {
            let mut bound = bind(name, &["year", "month", "day"], 3, args, kwargs)?;
            let year = expect_int(&bound.required(0))?;
            let month = expect_int(&bound.required(1))?;
            let day = expect_int(&bound.required(2))?;
            make_date(year, month, day).map(Value::Date)
        }
        TypeKind::DateTime => {
            let mut bound = bind(
                name,
                &["year", "month", "day", "hour", "minute", "second", "microsecond"],
                3,
                args,
                kwargs,
            )?;
            let mut fields = [0i64; 7];
            for (index, field) in fields.iter_mut().enumerate() {
                if let Some(value) = bound.take(index) {
                    *field = expect_int(&value)?;
                }
            }
            let date = make_date(fields[0], fields[1], fields[2])?;
            let time = (|| {
                date.and_hms_micro_opt(
                    u32::try_from(fields[3]).ok()?,
                    u32::try_from(fields[4]).ok()?,
                    u32::try_from(fields[5]).ok()?,
                    u32::try_from(fields[6]).ok()?,
                )
            })();
            time.map(Value::DateTime)
                .ok_or_else(|| ScriptError::value_error("time component out of range"))
        }
        TypeKind::Range => {
            no_keywords(name, &kwargs)?;
            let bounds = args.iter().map(expect_int).collect::<Result<Vec<_>, _>>()?;
            let (start, stop, step) = match bounds.as_slice() {
                [stop] => (0, *stop, 1),
                [start, stop] => (*start, *stop, 1),
                [start, stop, step] => (*start, *stop, *step),
                _ => {
                    return Err(ScriptError::type_error(format!(
                        "range expected 1 to 3 arguments, got {}",
                        args.len()
                    )));
                }
            };
            if step == 0 {
                return Err(ScriptError::value_error("range() arg 3 must not be zero"));
            }
            Ok(Value::Range(Range { start, stop, step }))
        }
        TypeKind::NoneType | TypeKind::Function | TypeKind::Object => Err(ScriptError::type_error(format!(
            "cannot create '{}' instances",
            name
        ))),
    }
}

fn make_date(year: i64, month: i64, day: i64) -> Result<NaiveDate, ScriptError> {
    if !(1..=9999).contains(&year) {
        return Err(ScriptError::value_error(format!("year {} is out of range", year)));
    }
    if !(1..=12).contains(&month) {
        return Err(ScriptError::value_error("month must be in 1..12"));
    }
    u32::try_from(day)
        .ok()
        .and_then(|day| NaiveDate::from_ymd_opt(year as i32, month as u32, day))
        .ok_or_else(|| ScriptError::value_error("day is out of range for month"))
}

/// Adds a mapping or an iterable of key/value pairs to `dict`.
pub fn update_dict(dict: &mut Dict, source: &Value, limits: &ExecutionOptions) -> Result<(), ScriptError> {
    if let Value::Dict(other) = source {
        let pairs: Vec<(Value, Value)> = other.borrow().iter().cloned().collect();
        for (key, value) in pairs {
            dict.insert(key, value);
        }
        return Ok(());
    }

    for (index, item) in iterate(source, limits)?.into_iter().enumerate() {
        let pair = iterate(&item, limits).map_err(|_| {
            ScriptError::type_error(format!(
                "cannot convert dictionary update sequence element #{} to a sequence",
                index
            ))
        })?;
        let [key, value]: [Value; 2] = pair.try_into().map_err(|pair: Vec<Value>| {
            ScriptError::value_error(format!(
                "dictionary update sequence element #{} has length {}; 2 is required",
                index,
                pair.len()
            ))
        })?;
        key.check_hashable()?;
        dict.insert(key, value);
    }
    Ok(())
}

fn parse_int(text: &str, base: i64) -> Result<i64, ScriptError> {
    let invalid = || {
        ScriptError::value_error(format!(
            "invalid literal for int() with base {}: {}",
            base,
            Value::str(text).repr()
        ))
    };
    if base != 0 && !(2..=36).contains(&base) {
        return Err(ScriptError::value_error("int() base must be >= 2 and <= 36, or 0"));
    }

    let trimmed = text.trim();
    let (negative, unsigned) = match trimmed.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, trimmed.strip_prefix('+').unwrap_or(trimmed)),
    };
    let lowered = unsigned.to_ascii_lowercase();
    let (radix, digits) = match (base, lowered.get(..2)) {
        (0 | 16, Some("0x")) => (16, &lowered[2..]),
        (0 | 8, Some("0o")) => (8, &lowered[2..]),
        (0 | 2, Some("0b")) => (2, &lowered[2..]),
        (0, _) => (10, lowered.as_str()),
        (base, _) => (base as u32, lowered.as_str()),
    };

    let digits = digits.strip_prefix('_').unwrap_or(digits);
    if digits.is_empty()
        || digits.starts_with('_')
        || digits.ends_with('_')
        || digits.contains("__")
        || !digits.chars().all(|c| c == '_' || c.is_digit(radix))
    {
        return Err(invalid());
    }

    let cleaned: String = digits.chars().filter(|c| *c != '_').collect();
    let signed = if negative { format!("-{}", cleaned) } else { cleaned };
    i64::from_str_radix(&signed, radix)
        .map_err(|_| ScriptError::overflow("integer overflow: result does not fit in 64 bits"))
}

fn parse_float(text: &str) -> Result<f64, ScriptError> {
    let trimmed = text.trim();
    let cleaned: String = trimmed.chars().filter(|c| *c != '_').collect();
    let valid_underscores = !trimmed.starts_with('_') && !trimmed.ends_with('_') && !trimmed.contains("__");
    match cleaned.parse::<f64>() {
        Ok(value) if valid_underscores && !cleaned.is_empty() => Ok(value),
        _ => Err(ScriptError::value_error(format!(
            "could not convert string to float: {}",
            Value::str(text).repr()
        ))),
    }
}

fn parse_decimal(text: &str) -> Result<Decimal, ScriptError> {
    let trimmed = text.trim();
    Decimal::from_str(trimmed)
        .or_else(|_| Decimal::from_scientific(trimmed))
        .map_err(|_| {
            ScriptError::value_error(format!(
                "invalid literal for Decimal: {}",
                Value::str(text).repr()
            ))
        })
}

pub fn length(value: &Value) -> Result<usize, ScriptError> {
    match value {
        Value::Str(s) => Ok(s.chars().count()),
        Value::List(items) | Value::Set(items) => Ok(items.borrow().len()),
        Value::Tuple(items) => Ok(items.len()),
        Value::Dict(dict) => Ok(dict.borrow().len()),
        Value::Range(range) => Ok(range.len()),
        other => Err(ScriptError::type_error(format!(
            "object of type '{}' has no len()",
            other.type_name()
        ))),
    }
}

/// Materialises an iterable as a snapshot of its elements.
pub fn iterate(value: &Value, limits: &ExecutionOptions) -> Result<Vec<Value>, ScriptError> {
    let items = match value {
        Value::Str(s) => s.chars().map(|c| Value::from(c.to_string())).collect(),
        Value::List(items) | Value::Set(items) => items.borrow().clone(),
        Value::Tuple(items) => items.to_vec(),
        Value::Dict(dict) => dict.borrow().keys().cloned().collect(),
        Value::Range(range) => {
            limits.check_len(range.len())?;
            range.iter().map(Value::Int).collect()
        }
        other => {
            return Err(ScriptError::type_error(format!(
                "'{}' object is not iterable",
                other.type_name()
            )));
        }
    };
    Ok(items)
}

fn normalize_index(index: i64, len: usize) -> Option<usize> {
    let len = len as i64;
    let index = if index < 0 { index + len } else { index };
    (0..len).contains(&index).then_some(index as usize)
}

pub fn get_item(container: &Value, index: &Value) -> Result<Value, ScriptError> {
    let sequence_index = |kind: &str, len: usize| -> Result<usize, ScriptError> {
        let position = index.as_int().ok_or_else(|| {
            ScriptError::type_error(format!(
                "{} indices must be integers or slices, not {}",
                kind,
                index.type_name()
            ))
        })?;
        normalize_index(position, len)
            .ok_or_else(|| ScriptError::index_error(format!("{} index out of range", kind)))
    };

    match container {
        Value::List(items) => {
            let items = items.borrow();
            let position = sequence_index("list", items.len())?;
            Ok(items[position].clone())
        }
        Value::Tuple(items) => Ok(items[sequence_index("tuple", items.len())?].clone()),
        Value::Str(s) => {
            let position = sequence_index("string", s.chars().count())?;
            Ok(s.chars().nth(position).map(|c| Value::from(c.to_string())).unwrap_or(Value::None))
        }
        Value::Range(range) => {
            let position = sequence_index("range object", range.len())?;
            Ok(range.get(position).map(Value::Int).unwrap_or(Value::None))
        }
        Value::Dict(dict) => {
            index.check_hashable()?;
            dict.borrow()
                .get(index)
                .cloned()
                .ok_or_else(|| ScriptError::key_error(index.repr()))
        }
        other => Err(ScriptError::type_error(format!(
            "'{}' object is not subscriptable",
            other.type_name()
        ))),
    }
}

pub fn set_item(container: &Value, index: &Value, value: Value) -> Result<(), ScriptError> {
    match container {
        Value::List(items) => {
            let position = index.as_int().ok_or_else(|| {
                ScriptError::type_error(format!(
                    "list indices must be integers or slices, not {}",
                    index.type_name()
                ))
            })?;
            let len = items.borrow().len();
            let position = normalize_index(position, len)
                .ok_or_else(|| ScriptError::index_error("list assignment index out of range"))?;
            items.borrow_mut()[position] = value;
            Ok(())
        }
        Value::Dict(dict) => {
            index.check_hashable()?;
            dict.borrow_mut().insert(index.clone(), value);
            Ok(())
        }
        other => Err(ScriptError::type_error(format!(
            "'{}' object does not support item assignment",
            other.type_name()
        ))),
    }
}

/// `container[lower:upper:step]` for strings, lists, tuples and ranges.
pub fn slice(container: &Value, lower: &Value, upper: &Value, step: &Value) -> Result<Value, ScriptError> {
    let bound = |value: &Value| -> Result<Option<i64>, ScriptError> {
        match value {
            Value::None => Ok(None),
            other => other
                .as_int()
                .map(Some)
                .ok_or_else(|| ScriptError::type_error("slice indices must be integers or None")),
        }
    };
    let step = bound(step)?.unwrap_or(1);
    if step == 0 {
        return Err(ScriptError::value_error("slice step cannot be zero"));
    }
    let (lower, upper) = (bound(lower)?, bound(upper)?);

    let positions = |len: usize| -> Vec<usize> {
        let len = len as i64;
        let clamp = |index: i64, low: i64, high: i64| {
            let index = if index < 0 { index + len } else { index };
            index.clamp(low, high)
        };
        let (start, stop) = if step > 0 {
            (
                lower.map_or(0, |index| clamp(index, 0, len)),
                upper.map_or(len, |index| clamp(index, 0, len)),
            )
        } else {
            (
                lower.map_or(len - 1, |index| clamp(index, -1, len - 1)),
                upper.map_or(-1, |index| clamp(index, -1, len - 1)),
            )
        };

        let mut positions = Vec::new();
        let mut index = start;
        while (step > 0 && index < stop) || (step < 0 && index > stop) {
            positions.push(index as usize);
            index += step;
        }
        positions
    };

    match container {
        Value::Str(s) => {
            let chars: Vec<char> = s.chars().collect();
            Ok(Value::from(positions(chars.len()).into_iter().map(|i| chars[i]).collect::<String>()))
        }
        Value::List(items) => {
            let items = items.borrow();
            Ok(Value::list(positions(items.len()).into_iter().map(|i| items[i].clone()).collect()))
        }
        Value::Tuple(items) => Ok(Value::tuple(
            positions(items.len()).into_iter().map(|i| items[i].clone()).collect(),
        )),
        Value::Range(range) => {
            let picked = positions(range.len());
            let start = picked.first().and_then(|i| range.get(*i)).unwrap_or(range.start);
            let new_step = range.step.saturating_mul(step);
            let stop = start.saturating_add(new_step.saturating_mul(picked.len() as i64));
            Ok(Value::Range(Range {
                start,
                stop,
                step: new_step,
            }))
        }
        other => Err(ScriptError::type_error(format!(
            "'{}' object is not subscriptable",
            other.type_name()
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn call_named(builtin: Builtin, args: Vec<Value>) -> Result<Value, ScriptError> {
        call_builtin(builtin, args, Vec::new(), &ExecutionOptions::default())
    }

    fn ints(values: &[i64]) -> Value {
        Value::list(values.iter().copied().map(Value::Int).collect())
    }

    #[test]
    fn round_uses_bankers_rounding() {
        assert_eq!(call_named(Builtin::Round, vec![Value::Float(2.5)]).unwrap(), Value::Int(2));
        assert_eq!(call_named(Builtin::Round, vec![Value::Float(3.5)]).unwrap(), Value::Int(4));
        assert_eq!(
            call_named(Builtin::Round, vec![Value::Float(2.675), Value::Int(2)]).unwrap(),
            Value::Float(2.67)
        );
        assert_eq!(
            call_named(Builtin::Round, vec![Value::Int(1250), Value::Int(-2)]).unwrap(),
            Value::Int(1200)
        );
    }

    #[test]
    fn decimal_rounding_to_tens_stays_in_range() {
        let decimal = |text: &str| Value::Decimal(Decimal::from_str(text).unwrap());
        assert_eq!(
            call_named(Builtin::Round, vec![decimal("1250"), Value::Int(-2)]).unwrap(),
            decimal("1200")
        );
        assert_eq!(
            call_named(Builtin::Round, vec![decimal("987.6"), Value::Int(-40)]).unwrap(),
            decimal("0")
        );
        let error = call_named(Builtin::Round, vec![decimal("79228162514264337593543950335"), Value::Int(-1)]).unwrap_err();
        assert_eq!(error.kind, ErrorKind::OverflowError);
    }

    #[test]
    fn isinstance_rejects_runaway_tuple_nesting() {
        let mut classes = Value::Type(TypeKind::Str);
        for _ in 0..500 {
            classes = Value::tuple(vec![classes]);
        }
        let error = call_named(Builtin::IsInstance, vec![Value::Int(1), classes]).unwrap_err();
        assert_eq!(error.kind, ErrorKind::ResourceExceeded);
    }

    #[test]
    fn sorted_is_stable_and_reversible() {
        let kwargs = vec![("reverse".to_string(), Value::Bool(true))];
        let sorted = call_builtin(Builtin::Sorted, vec![ints(&[3, 1, 2])], kwargs, &ExecutionOptions::default());
        assert_eq!(sorted.unwrap(), ints(&[3, 2, 1]));

        let mixed = call_named(Builtin::Sorted, vec![Value::list(vec![Value::Int(1), Value::str("a")])]);
        assert_eq!(mixed.unwrap_err().kind, ErrorKind::TypeError);
    }

    #[test]
    fn max_min_and_sum() {
        assert_eq!(call_named(Builtin::Max, vec![ints(&[1, 5, 3])]).unwrap(), Value::Int(5));
        assert_eq!(call_named(Builtin::Min, vec![Value::Int(4), Value::Int(2)]).unwrap(), Value::Int(2));
        assert_eq!(call_named(Builtin::Sum, vec![ints(&[1, 2, 3])]).unwrap(), Value::Int(6));
        let error = call_named(Builtin::Max, vec![ints(&[])]).unwrap_err();
        assert_eq!(error.message, "max() arg is an empty sequence");
    }

    #[test]
    fn constructors_convert_text() {
        let limits = ExecutionOptions::default();
        let int = construct(TypeKind::Int, vec![Value::str(" -42 ")], Vec::new(), &limits);
        assert_eq!(int.unwrap(), Value::Int(-42));
        let error = construct(TypeKind::Int, vec![Value::str("4x")], Vec::new(), &limits).unwrap_err();
        assert_eq!(error.message, "invalid literal for int() with base 10: '4x'");
        let decimal = construct(TypeKind::Decimal, vec![Value::str("3.14")], Vec::new(), &limits);
        assert_eq!(decimal.unwrap().repr(), "Decimal('3.14')");
        let date = construct(
            TypeKind::Date,
            vec![Value::Int(2024), Value::Int(2), Value::Int(30)],
            Vec::new(),
            &limits,
        );
        assert_eq!(date.unwrap_err().message, "day is out of range for month");
    }

    #[test]
    fn isinstance_honours_subtypes() {
        let check = |value: Value, kind: TypeKind| {
            call_named(Builtin::IsInstance, vec![value, Value::Type(kind)]).unwrap()
        };
        assert_eq!(check(Value::Bool(true), TypeKind::Int), Value::Bool(true));
        assert_eq!(check(Value::Int(1), TypeKind::Bool), Value::Bool(false));
        let either = Value::tuple(vec![Value::Type(TypeKind::Str), Value::Type(TypeKind::Float)]);
        assert_eq!(
            call_named(Builtin::IsInstance, vec![Value::Float(1.0), either]).unwrap(),
            Value::Bool(true)
        );
    }

    #[test]
    fn slicing_follows_sequence_rules() {
        let list = ints(&[0, 1, 2, 3, 4]);
        let sliced = slice(&list, &Value::Int(-2), &Value::None, &Value::None).unwrap();
        assert_eq!(sliced, ints(&[3, 4]));
        let reversed = slice(&Value::str("abc"), &Value::None, &Value::None, &Value::Int(-1)).unwrap();
        assert_eq!(reversed, Value::str("cba"));
        let range = Value::Range(Range { start: 0, stop: 10, step: 1 });
        let stepped = slice(&range, &Value::Int(1), &Value::None, &Value::Int(3)).unwrap();
        assert_eq!(iterate(&stepped, &ExecutionOptions::default()).unwrap(), vec![
            Value::Int(1),
            Value::Int(4),
            Value::Int(7)
        ]);
    }

    #[test]
    fn huge_ranges_are_not_materialised() {
        let limits = ExecutionOptions {
            max_sequence_len: 100,
            ..ExecutionOptions::default()
        };
        let range = Value::Range(Range { start: 0, stop: 1_000, step: 1 });
        assert_eq!(iterate(&range, &limits).unwrap_err().kind, ErrorKind::ResourceExceeded);
    }

    #[test]
    fn exit_signals_a_clean_stop() {
        assert_eq!(call_named(Builtin::Exit, vec![]).unwrap_err().kind, ErrorKind::SystemExit);
    }
}
