//! Format specifications for f-strings and `str.format`.

use crate::builtins::Keywords;
use crate::error::ScriptError;
use crate::options::ExecutionOptions;
use crate::value::{format_float, Value};
use chrono::format::{Item, StrftimeItems};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use std::fmt::Write;

/// A parsed `[[fill]align][sign][#][0][width][grouping][.precision][type]`.
#[derive(Debug, Clone, PartialEq)]
struct Spec {
    fill: char,
    align: Option<char>,
    sign: char,
    alternate: bool,
    width: usize,
    grouping: Option<char>,
    precision: Option<usize>,
    kind: Option<char>,
}

impl Spec {
    fn parse(text: &str) -> Result<Self, ScriptError> {
        let chars: Vec<char> = text.chars().collect();
        let invalid = || ScriptError::value_error("Invalid format specifier");
        let mut spec = Spec {
            fill: ' ',
            align: None,
            sign: '-',
            alternate: false,
            width: 0,
            grouping: None,
            precision: None,
            kind: None,
        };
        let mut i = 0;

        let is_align = |c: &char| matches!(c, '<' | '>' | '=' | '^');
        if chars.get(1).is_some_and(is_align) {
            spec.fill = chars[0];
            spec.align = Some(chars[1]);
            i = 2;
        } else if chars.first().is_some_and(is_align) {
            spec.align = Some(chars[0]);
            i = 1;
        }

        if let Some(sign @ ('+' | '-' | ' ')) = chars.get(i) {
            spec.sign = *sign;
            i += 1;
        }
        if chars.get(i) == Some(&'#') {
            spec.alternate = true;
            i += 1;
        }
        if chars.get(i) == Some(&'0') {
            if spec.align.is_none() {
                spec.fill = '0';
                spec.align = Some('=');
            }
            i += 1;
        }

        let digits = |i: &mut usize| -> Result<Option<usize>, ScriptError> {
            let start = *i;
            while chars.get(*i).is_some_and(char::is_ascii_digit) {
                *i += 1;
            }
            if start == *i {
                return Ok(None);
            }
            let number: String = chars[start..*i].iter().collect();
            number.parse().map(Some).map_err(|_| ScriptError::value_error("Too many decimal digits in format string"))
        };

        spec.width = digits(&mut i)?.unwrap_or(0);
        if let Some(separator @ (',' | '_')) = chars.get(i) {
            spec.grouping = Some(*separator);
            i += 1;
        }
        if chars.get(i) == Some(&'.') {
            i += 1;
            spec.precision = Some(digits(&mut i)?.ok_or_else(|| ScriptError::value_error("Format specifier missing precision"))?);
        }
        if let Some(kind) = chars.get(i) {
            spec.kind = Some(*kind);
            i += 1;
        }
        if i < chars.len() {
            return Err(invalid());
        }
        Ok(spec)
    }

    fn unknown_code(&self, type_name: &str) -> ScriptError {
        ScriptError::value_error(format!(
            "Unknown format code '{}' for object of type '{}'",
            self.kind.unwrap_or(' '),
            type_name
        ))
    }
}

/// Applies `spec` the way the builtin `format(value, spec)` does.
pub fn format_value(value: &Value, spec: &str, limits: &ExecutionOptions) -> Result<String, ScriptError> {
    if spec.is_empty() {
        return Ok(value.to_string());
    }
    if let Value::Date(_) | Value::DateTime(_) = value {
        return strftime(value, spec);
    }

    let spec = Spec::parse(spec)?;
    limits.check_len(spec.width)?;
    if let Some(precision) = spec.precision {
        limits.check_len(precision)?;
    }

    match value {
        Value::Str(text) => {
            if !matches!(spec.kind, None | Some('s')) {
                return Err(spec.unknown_code("str"));
            }
            if spec.sign != '-' || spec.align == Some('=') {
                return Err(ScriptError::value_error("Sign not allowed in string format specifier"));
            }
            let text: String = match spec.precision {
                Some(precision) => text.chars().take(precision).collect(),
                None => text.to_string(),
            };
            Ok(pad(&spec, "", &text, '<'))
        }
        Value::Int(_) | Value::Bool(_) => {
            let n = value.as_int().unwrap_or(0);
            match spec.kind {
                None | Some('d') => number(&spec, n < 0, &group(&spec, &n.unsigned_abs().to_string())),
                Some(radix @ ('x' | 'X' | 'o' | 'b')) => {
                    let magnitude = n.unsigned_abs();
                    let (digits, prefix) = match radix {
                        'x' => (format!("{:x}", magnitude), "0x"),
                        'X' => (format!("{:X}", magnitude), "0X"),
                        'o' => (format!("{:o}", magnitude), "0o"),
                        _ => (format!("{:b}", magnitude), "0b"),
                    };
                    let body = if spec.alternate { format!("{}{}", prefix, digits) } else { digits };
                    number(&spec, n < 0, &body)
                }
                Some('e' | 'E' | 'f' | 'F' | 'g' | 'G' | '%') => float(&spec, n as f64),
                _ => Err(spec.unknown_code(&value.type_name())),
            }
        }
        Value::Float(f) => match spec.kind {
            Some('d' | 'x' | 'X' | 'o' | 'b' | 's') => Err(spec.unknown_code("float")),
            _ => float(&spec, *f),
        },
        Value::Decimal(d) => match spec.kind {
            Some('f' | 'F') => {
                let precision = spec.precision.unwrap_or(6).min(28) as u32;
                let rounded = d.round_dp_with_strategy(precision, RoundingStrategy::MidpointNearestEven);
                let body = format!("{:.*}", precision as usize, rounded.abs());
                number(&spec, d.is_sign_negative() && !rounded.is_zero(), &group(&spec, &body))
            }
            Some('%') => {
                let scaled = d
                    .checked_mul(Decimal::ONE_HUNDRED)
                    .ok_or_else(|| ScriptError::overflow("Decimal value too large to format"))?;
                let precision = spec.precision.unwrap_or(6).min(28) as u32;
                let rounded = scaled.round_dp_with_strategy(precision, RoundingStrategy::MidpointNearestEven);
                let body = format!("{:.*}%", precision as usize, rounded.abs());
                number(&spec, scaled.is_sign_negative() && !rounded.is_zero(), &group(&spec, &body))
            }
            None if spec.precision.is_none() => {
                number(&spec, d.is_sign_negative(), &group(&spec, &d.abs().to_string()))
            }
            Some('d' | 'x' | 'X' | 'o' | 'b' | 's') => Err(spec.unknown_code("Decimal")),
            _ => float(&spec, d.to_f64().unwrap_or(0.0)),
        },
        other => Err(ScriptError::type_error(format!(
            "unsupported format string passed to {}.__format__",
            other.type_name()
        ))),
    }
}

fn float(spec: &Spec, value: f64) -> Result<String, ScriptError> {
    let negative = value.is_sign_negative() && !value.is_nan();
    let magnitude = value.abs();
    let upper = matches!(spec.kind, Some('E' | 'F' | 'G'));

    let body = if !magnitude.is_finite() {
        let text = if magnitude.is_nan() { "nan" } else { "inf" };
        let text = if spec.kind == Some('%') { format!("{}%", text) } else { text.to_string() };
        if upper { text.to_uppercase() } else { text }
    } else {
        match spec.kind {
            Some('f' | 'F') => format!("{:.*}", spec.precision.unwrap_or(6), magnitude),
            Some('%') => format!("{:.*}%", spec.precision.unwrap_or(6), magnitude * 100.0),
            Some('e' | 'E') => exponent(magnitude, spec.precision.unwrap_or(6), upper),
            Some('g' | 'G') => general(magnitude, spec.precision.unwrap_or(6), spec.alternate, upper),
            None => match spec.precision {
                Some(precision) => {
                    let text = general(magnitude, precision, spec.alternate, false);
                    if text.contains(['.', 'e']) { text } else { format!("{}.0", text) }
                }
                None => format_float(magnitude),
            },
            _ => return Err(spec.unknown_code("float")),
        }
    };
    number(spec, negative, &group(spec, &body))
}

/// `1.500000e+03` style.
fn exponent(value: f64, precision: usize, upper: bool) -> String {
    let text = format!("{:.*e}", precision, value);
    let (mantissa, exp) = text.split_once('e').unwrap_or((&text, "0"));
    let exp: i32 = exp.parse().unwrap_or(0);
    let marker = if upper { 'E' } else { 'e' };
    format!("{}{}{}{:02}", mantissa, marker, if exp < 0 { '-' } else { '+' }, exp.abs())
}

fn general(value: f64, precision: usize, alternate: bool, upper: bool) -> String {
    let precision = precision.max(1);
    if value == 0.0 {
        return if alternate { format!("{:.*}", precision - 1, 0.0) } else { "0".to_string() };
    }

    let scientific = format!("{:.*e}", precision - 1, value);
    let exp: i64 = scientific.split_once('e').and_then(|(_, exp)| exp.parse().ok()).unwrap_or(0);

    let text = if (-4..precision as i64).contains(&exp) {
        let decimals = (precision as i64 - 1 - exp).max(0) as usize;
        format!("{:.*}", decimals, value)
    } else {
        exponent(value, precision - 1, upper)
    };
    if alternate {
        return text;
    }

    match text.split_once(['e', 'E']) {
        Some((mantissa, exp)) => {
            let marker = if upper { 'E' } else { 'e' };
            format!("{}{}{}", strip_zeros(mantissa), marker, exp)
        }
        None => strip_zeros(&text).to_string(),
    }
}

fn strip_zeros(text: &str) -> &str {
    if text.contains('.') {
        text.trim_end_matches('0').trim_end_matches('.')
    } else {
        text
    }
}

/// Inserts the grouping separator into the integer part of `body`.
fn group(spec: &Spec, body: &str) -> String {
    let Some(separator) = spec.grouping else {
        return body.to_string();
    };
    let split = body.find(|c: char| !c.is_ascii_digit()).unwrap_or(body.len());
    let (digits, rest) = body.split_at(split);

    let mut grouped = String::with_capacity(body.len() + digits.len() / 3);
    for (index, digit) in digits.chars().enumerate() {
        if index > 0 && (digits.len() - index) % 3 == 0 {
            grouped.push(separator);
        }
        grouped.push(digit);
    }
    grouped.push_str(rest);
    grouped
}

fn number(spec: &Spec, negative: bool, body: &str) -> Result<String, ScriptError> {
    let sign = match (negative, spec.sign) {
        (true, _) => "-",
        (false, '+') => "+",
        (false, ' ') => " ",
        _ => "",
    };
    Ok(pad(spec, sign, body, '>'))
}

fn pad(spec: &Spec, sign: &str, body: &str, default_align: char) -> String {
    let len = sign.chars().count() + body.chars().count();
    let missing = spec.width.saturating_sub(len);
    let fill = |count: usize| std::iter::repeat(spec.fill).take(count).collect::<String>();

    match spec.align.unwrap_or(default_align) {
        '<' => format!("{}{}{}", sign, body, fill(missing)),
        '^' => format!("{}{}{}{}", fill(missing / 2), sign, body, fill(missing - missing / 2)),
        '=' => format!("{}{}{}", sign, fill(missing), body),
        _ => format!("{}{}{}", fill(missing), sign, body),
    }
}

/// `date.strftime(pattern)`; an unknown directive is a ValueError.
pub fn strftime(value: &Value, pattern: &str) -> Result<String, ScriptError> {
    let items: Vec<Item> = StrftimeItems::new(pattern).collect();
    let invalid = || ScriptError::value_error(format!("invalid format string {}", Value::str(pattern).repr()));
    if items.iter().any(|item| matches!(item, Item::Error)) {
        return Err(invalid());
    }

    let mut out = String::new();
    let written = match value {
        Value::Date(date) => write!(out, "{}", date.format_with_items(items.iter())),
        Value::DateTime(dt) => write!(out, "{}", dt.format_with_items(items.iter())),
        other => {
            return Err(ScriptError::type_error(format!(
                "strftime() requires a date, not '{}'",
                other.type_name()
            )));
        }
    };
    written.map_err(|_| invalid())?;
    Ok(out)
}

/// The `!a` conversion: non-ASCII characters become escapes.
pub fn ascii(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c as u32 {
            0..=0x7f => out.push(c),
            code @ 0x80..=0xff => out.push_str(&format!("\\x{:02x}", code)),
            code @ 0x100..=0xffff => out.push_str(&format!("\\u{:04x}", code)),
            code => out.push_str(&format!("\\U{:08x}", code)),
        }
    }
    out
}

/// Applies an `!r`, `!s` or `!a` conversion before formatting.
pub fn convert(value: Value, conversion: Option<char>) -> Value {
    match conversion {
        Some('r') => Value::from(value.repr()),
        Some('a') => Value::from(ascii(&value.repr())),
        Some(_) => Value::from(value.to_string()),
        None => value,
    }
}

/// `template.format(*args, **kwargs)` with plain positional and named fields.
pub fn format_template(
    template: &str,
    args: &[Value],
    kwargs: &Keywords,
    limits: &ExecutionOptions,
) -> Result<String, ScriptError> {
    let mut out = String::new();
    let mut chars = template.chars().peekable();
    let mut next_auto = Some(0usize);
    let mut manual = false;

    while let Some(c) = chars.next() {
        match c {
            '{' if chars.peek() == Some(&'{') => {
                chars.next();
                out.push('{');
            }
            '}' if chars.peek() == Some(&'}') => {
                chars.next();
                out.push('}');
            }
            '}' => return Err(ScriptError::value_error("Single '}' encountered in format string")),
            '{' => {
                let mut field = String::new();
                loop {
                    match chars.next() {
                        Some('}') => break,
                        Some('{') => {
                            return Err(ScriptError::value_error("nested replacement fields are not supported"));
                        }
                        Some(c) => field.push(c),
                        None => return Err(ScriptError::value_error("expected '}' before end of string")),
                    }
                }

                let (head, spec) = field.split_once(':').unwrap_or((&field, ""));
                let (name, conversion) = match head.split_once('!') {
                    Some((name, conversion)) => {
                        let mut flags = conversion.chars();
                        match (flags.next(), flags.next()) {
                            (Some(flag @ ('r' | 's' | 'a')), None) => (name, Some(flag)),
                            _ => {
                                return Err(ScriptError::value_error(
                                    "Conversion specifier must be one of 'r', 's' or 'a'",
                                ));
                            }
                        }
                    }
                    None => (head, None),
                };

                let value = if name.is_empty() {
                    if manual {
                        return Err(ScriptError::value_error(
                            "cannot switch from manual field specification to automatic field numbering",
                        ));
                    }
                    let index = next_auto.unwrap_or(0);
                    next_auto = Some(index + 1);
                    positional(args, index)?
                } else if let Ok(index) = name.parse::<usize>() {
                    if next_auto.is_some_and(|next| next > 0) {
                        return Err(ScriptError::value_error(
                            "cannot switch from automatic field numbering to manual field specification",
                        ));
                    }
                    manual = true;
                    positional(args, index)?
                } else {
                    kwargs
                        .iter()
                        .find(|(key, _)| key == name)
                        .map(|(_, value)| value.clone())
                        .ok_or_else(|| ScriptError::key_error(Value::str(name).repr()))?
                };

                out.push_str(&format_value(&convert(value, conversion), spec, limits)?);
                limits.check_len(out.len())?;
            }
            c => out.push(c),
        }
    }
    Ok(out)
}

fn positional(args: &[Value], index: usize) -> Result<Value, ScriptError> {
    args.get(index).cloned().ok_or_else(|| {
        ScriptError::index_error(format!(
            "Replacement index {} out of range for positional args tuple",
            index
        ))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use chrono::NaiveDate;
    use pretty_assertions::assert_eq;
    use std::str::FromStr;

    fn fmt(value: Value, spec: &str) -> String {
        format_value(&value, spec, &ExecutionOptions::default()).unwrap()
    }

    #[test]
    fn integers() {
        assert_eq!(fmt(Value::Int(42), ">5"), "   42");
        assert_eq!(fmt(Value::Int(-42), "05"), "-0042");
        assert_eq!(fmt(Value::Int(1234567), ","), "1,234,567");
        assert_eq!(fmt(Value::Int(255), "#x"), "0xff");
        assert_eq!(fmt(Value::Int(5), "+"), "+5");
        assert_eq!(fmt(Value::Bool(true), ">3"), "  1");
    }

    #[test]
    fn floats() {
        assert_eq!(fmt(Value::Float(3.14159), ".2f"), "3.14");
        assert_eq!(fmt(Value::Float(0.25), ".1%"), "25.0%");
        assert_eq!(fmt(Value::Float(1500.0), ".2e"), "1.50e+03");
        assert_eq!(fmt(Value::Float(0.00001234), "g"), "1.234e-05");
        assert_eq!(fmt(Value::Float(1234.5), ",.1f"), "1,234.5");
        assert_eq!(fmt(Value::Float(2.0), ".3"), "2.0");
        assert_eq!(fmt(Value::Float(-1.5), "^8"), "  -1.5  ");
    }

    #[test]
    fn decimals_keep_exact_digits() {
        let price = Value::Decimal(Decimal::from_str("1234.565").unwrap());
        assert_eq!(fmt(price.clone(), ",.2f"), "1,234.56");
        assert_eq!(fmt(price, ""), "1234.565");
    }

    #[test]
    fn strings_and_dates() {
        assert_eq!(fmt(Value::str("ab"), "*^6"), "**ab**");
        assert_eq!(fmt(Value::str("abcdef"), ".3"), "abc");
        let date = Value::Date(NaiveDate::from_ymd_opt(2024, 1, 5).unwrap());
        assert_eq!(fmt(date.clone(), "%d/%m/%Y"), "05/01/2024");
        assert!(strftime(&date, "%H").is_err());
    }

    #[test]
    fn bad_specs_are_value_errors() {
        let limits = ExecutionOptions::default();
        let error = format_value(&Value::str("x"), "d", &limits).unwrap_err();
        assert_eq!(error.message, "Unknown format code 'd' for object of type 'str'");
        let error = format_value(&Value::list(vec![]), ">3", &limits).unwrap_err();
        assert_eq!(error.kind, ErrorKind::TypeError);
    }

    #[test]
    fn templates() {
        let limits = ExecutionOptions::default();
        let kwargs = vec![("name".to_string(), Value::str("Ann"))];
        let text = format_template("{} owes {:.2f} to {name!r} {{ok}}", &[Value::str("Bob"), Value::Float(3.5)], &kwargs, &limits);
        assert_eq!(text.unwrap(), "Bob owes 3.50 to 'Ann' {ok}");
        let error = format_template("{1}", &[Value::Int(1)], &Vec::new(), &limits).unwrap_err();
        assert_eq!(error.kind, ErrorKind::IndexError);
    }

    #[test]
    fn ascii_escapes() {
        assert_eq!(ascii("café ✓"), "caf\\xe9 \\u2713");
    }
}
