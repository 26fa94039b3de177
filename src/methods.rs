//! Attribute lookup and bound methods on builtin values.

use crate::builtins::{self, bind, expect_int, iterate, no_arguments, single, sort_values, update_dict, Keywords};
use crate::error::{ErrorKind, ScriptError};
use crate::format;
use crate::options::ExecutionOptions;
use crate::value::{format_datetime, BoundMethod, Dict, DictRef, ListCell, ListRef, TypeKind, Value};
use chrono::{Datelike, Local, NaiveDate, NaiveDateTime, Timelike};
use std::rc::Rc;

const STR_METHODS: &[&str] = &[
    "upper",
    "lower",
    "strip",
    "lstrip",
    "rstrip",
    "startswith",
    "endswith",
    "split",
    "join",
    "replace",
    "find",
    "count",
    "title",
    "capitalize",
    "isdigit",
    "isalpha",
    "zfill",
    "format",
];

const LIST_METHODS: &[&str] = &[
    "append", "extend", "insert", "pop", "remove", "index", "count", "clear", "copy", "reverse", "sort",
];

const DICT_METHODS: &[&str] = &[
    "get",
    "keys",
    "values",
    "items",
    "pop",
    "setdefault",
    "update",
    "clear",
    "copy",
];

const SET_METHODS: &[&str] = &[
    "add",
    "discard",
    "remove",
    "clear",
    "copy",
    "union",
    "intersection",
    "difference",
    "issubset",
    "issuperset",
];

const DATE_METHODS: &[&str] = &["weekday", "isoweekday", "isoformat", "strftime"];
const DATETIME_METHODS: &[&str] = &["weekday", "isoweekday", "isoformat", "strftime", "date"];
const DATE_CLASS_METHODS: &[&str] = &["today", "fromisoformat"];
const DATETIME_CLASS_METHODS: &[&str] = &["now", "today", "fromisoformat"];

/// `value.name` for every value a script can hold.
pub fn get_attribute(value: &Value, name: &str) -> Result<Value, ScriptError> {
    match value {
        Value::Object(view) => view.get(name),
        Value::Date(date) => match name {
            "year" => Ok(Value::Int(i64::from(date.year()))),
            "month" => Ok(Value::Int(i64::from(date.month()))),
            "day" => Ok(Value::Int(i64::from(date.day()))),
            _ => bind_method(value, name, DATE_METHODS),
        },
        Value::DateTime(dt) => match name {
            "year" => Ok(Value::Int(i64::from(dt.year()))),
            "month" => Ok(Value::Int(i64::from(dt.month()))),
            "day" => Ok(Value::Int(i64::from(dt.day()))),
            "hour" => Ok(Value::Int(i64::from(dt.hour()))),
            "minute" => Ok(Value::Int(i64::from(dt.minute()))),
            "second" => Ok(Value::Int(i64::from(dt.second()))),
            "microsecond" => Ok(Value::Int(i64::from(dt.nanosecond() / 1_000))),
            _ => bind_method(value, name, DATETIME_METHODS),
        },
        Value::Str(_) => bind_method(value, name, STR_METHODS),
        Value::List(_) => bind_method(value, name, LIST_METHODS),
        Value::Dict(_) => bind_method(value, name, DICT_METHODS),
        Value::Set(_) => bind_method(value, name, SET_METHODS),
        Value::Type(TypeKind::Date) => bind_method(value, name, DATE_CLASS_METHODS),
        Value::Type(TypeKind::DateTime) => bind_method(value, name, DATETIME_CLASS_METHODS),
        _ => bind_method(value, name, &[]),
    }
}

fn bind_method(receiver: &Value, name: &str, table: &[&'static str]) -> Result<Value, ScriptError> {
    match table.iter().find(|method| **method == name) {
        Some(method) => Ok(Value::Method(Rc::new(BoundMethod {
            receiver: receiver.clone(),
            name: *method,
        }))),
        None => Err(match receiver {
            Value::Type(kind) => ScriptError::new(
                ErrorKind::AttributeError,
                format!("type object '{}' has no attribute '{}'", kind.name(), name),
            ),
            other => ScriptError::attribute_error(&other.type_name(), name),
        }),
    }
}

pub fn call_method(
    method: &BoundMethod,
    args: Vec<Value>,
    kwargs: Keywords,
    limits: &ExecutionOptions,
) -> Result<Value, ScriptError> {
    let name = method.name;
    match &method.receiver {
        Value::Str(text) => str_method(text, name, args, kwargs, limits),
        Value::List(list) => list_method(list, name, args, kwargs, limits),
        Value::Dict(dict) => dict_method(dict, name, args, kwargs, limits),
        Value::Set(set) => set_method(set, name, args, kwargs, limits),
        Value::Date(date) => date_method(*date, None, name, args, kwargs),
        Value::DateTime(dt) => date_method(dt.date(), Some(*dt), name, args, kwargs),
        Value::Type(kind) => class_method(*kind, name, args, kwargs),
        other => Err(ScriptError::type_error(format!(
            "'{}' object has no callable member '{}'",
            other.type_name(),
            name
        ))),
    }
}

fn expect_str<'a>(function: &str, value: &'a Value) -> Result<&'a str, ScriptError> {
    match value {
        Value::Str(text) => Ok(text),
        other => Err(ScriptError::type_error(format!(
            "{}() argument must be str, not {}",
            function,
            other.type_name()
        ))),
    }
}

fn str_method(
    text: &str,
    name: &str,
    args: Vec<Value>,
    kwargs: Keywords,
    limits: &ExecutionOptions,
) -> Result<Value, ScriptError> {
    let result = match name {
        "upper" | "lower" | "title" | "capitalize" => {
            no_arguments(name, &args, &kwargs)?;
            match name {
                "upper" => text.to_uppercase(),
                "lower" => text.to_lowercase(),
                "title" => title_case(text),
                _ => {
                    let mut chars = text.chars();
                    match chars.next() {
                        Some(first) => first.to_uppercase().chain(chars.as_str().to_lowercase().chars()).collect(),
                        None => String::new(),
                    }
                }
            }
        }
        "isdigit" | "isalpha" => {
            no_arguments(name, &args, &kwargs)?;
            let test: fn(char) -> bool = if name == "isdigit" { char::is_numeric } else { char::is_alphabetic };
            return Ok(Value::Bool(!text.is_empty() && text.chars().all(test)));
        }
        "strip" | "lstrip" | "rstrip" => {
            let mut bound = bind(name, &["chars"], 0, args, kwargs)?;
            let chars = bound.optional(0);
            let chars = chars.as_ref().map(|value| expect_str(name, value)).transpose()?;
            let strip = |c: char| chars.map_or(c.is_whitespace(), |set| set.contains(c));
            match name {
                "strip" => text.trim_matches(strip),
                "lstrip" => text.trim_start_matches(strip),
                _ => text.trim_end_matches(strip),
            }
            .to_string()
        }
        "startswith" | "endswith" => {
            let affixes = single(name, args, &kwargs)?;
            let candidates = match &affixes {
                Value::Str(affix) => vec![affix.to_string()],
                Value::Tuple(items) => items
                    .iter()
                    .map(|item| expect_str(name, item).map(str::to_string))
                    .collect::<Result<_, _>>()?,
                other => {
                    return Err(ScriptError::type_error(format!(
                        "{} first arg must be str or a tuple of str, not {}",
                        name,
                        other.type_name()
                    )));
                }
            };
            let hit = candidates.iter().any(|affix| {
                if name == "startswith" {
                    text.starts_with(affix.as_str())
                } else {
                    text.ends_with(affix.as_str())
                }
            });
            return Ok(Value::Bool(hit));
        }
        "split" => {
            let mut bound = bind(name, &["sep", "maxsplit"], 0, args, kwargs)?;
            let separator = bound.optional(0);
            let separator = separator.as_ref().map(|value| expect_str(name, value)).transpose()?;
            let maxsplit = bound.take(1).map(|value| expect_int(&value)).transpose()?.unwrap_or(-1);
            let parts = split(text, separator, maxsplit)?;
            return Ok(Value::list(parts.into_iter().map(Value::from).collect()));
        }
        "join" => {
            let items = iterate(&single(name, args, &kwargs)?, limits)?;
            let mut joined = String::new();
            for (index, item) in items.iter().enumerate() {
                let Value::Str(piece) = item else {
                    return Err(ScriptError::type_error(format!(
                        "sequence item {}: expected str instance, {} found",
                        index,
                        item.type_name()
                    )));
                };
                if index > 0 {
                    joined.push_str(text);
                }
                joined.push_str(piece);
                limits.check_len(joined.len())?;
            }
            joined
        }
        "replace" => {
            let mut bound = bind(name, &["old", "new", "count"], 2, args, kwargs)?;
            let old = bound.required(0);
            let new = bound.required(1);
            let (old, new) = (expect_str(name, &old)?, expect_str(name, &new)?);
            let count = bound.take(2).map(|value| expect_int(&value)).transpose()?.unwrap_or(-1);
            let occurrences = if old.is_empty() {
                text.chars().count() + 1
            } else {
                text.matches(old).count()
            };
            let occurrences = if count >= 0 {
                occurrences.min(count as usize)
            } else {
                occurrences
            };
            limits.check_len(text.len().saturating_add(occurrences.saturating_mul(new.len())))?;
            if count >= 0 {
                text.replacen(old, new, count as usize)
            } else {
                text.replace(old, new)
            }
        }
        "find" => {
            let needle = single(name, args, &kwargs)?;
            let needle = expect_str(name, &needle)?;
            let position = text
                .find(needle)
                .map_or(-1, |byte| text[..byte].chars().count() as i64);
            return Ok(Value::Int(position));
        }
        "count" => {
            let needle = single(name, args, &kwargs)?;
            let needle = expect_str(name, &needle)?;
            let count = if needle.is_empty() {
                text.chars().count() + 1
            } else {
                text.matches(needle).count()
            };
            return Ok(Value::Int(count as i64));
        }
        "zfill" => {
            let width = expect_int(&single(name, args, &kwargs)?)?;
            let width = usize::try_from(width).unwrap_or(0);
            limits.check_len(width)?;
            let len = text.chars().count();
            if width <= len {
                text.to_string()
            } else {
                let (sign, digits) = match text.chars().next() {
                    Some(c @ ('+' | '-')) => (Some(c), &text[1..]),
                    _ => (None, text),
                };
                let mut padded: String = sign.into_iter().collect();
                padded.extend(std::iter::repeat('0').take(width - len));
                padded.push_str(digits);
                padded
            }
        }
        "format" => format::format_template(text, &args, &kwargs, limits)?,
        _ => return Err(ScriptError::attribute_error("str", name)),
    };
    Ok(Value::from(result))
}

fn title_case(text: &str) -> String {
    let mut titled = String::with_capacity(text.len());
    let mut previous_cased = false;
    for c in text.chars() {
        if previous_cased {
            titled.extend(c.to_lowercase());
        } else {
            titled.extend(c.to_uppercase());
        }
        previous_cased = c.is_alphabetic();
    }
    titled
}

fn split(text: &str, separator: Option<&str>, maxsplit: i64) -> Result<Vec<String>, ScriptError> {
    let limit = usize::try_from(maxsplit).ok();
    match separator {
        Some("") => Err(ScriptError::value_error("empty separator")),
        Some(separator) => Ok(match limit {
            Some(limit) => text.splitn(limit + 1, separator).map(str::to_string).collect(),
            None => text.split(separator).map(str::to_string).collect(),
        }),
        None => {
            let mut parts = Vec::new();
            let mut rest = text.trim_start();
            while !rest.is_empty() {
                if limit == Some(parts.len()) {
                    parts.push(rest.to_string());
                    break;
                }
                match rest.find(char::is_whitespace) {
                    Some(end) => {
                        parts.push(rest[..end].to_string());
                        rest = rest[end..].trim_start();
                    }
                    None => {
                        parts.push(rest.to_string());
                        break;
                    }
                }
            }
            Ok(parts)
        }
    }
}

fn list_method(
    list: &ListRef,
    name: &str,
    args: Vec<Value>,
    kwargs: Keywords,
    limits: &ExecutionOptions,
) -> Result<Value, ScriptError> {
    match name {
        "append" => {
            let item = single(name, args, &kwargs)?;
            limits.check_len(list.borrow().len() + 1)?;
            list.borrow_mut().push(item);
        }
        "extend" => {
            let items = iterate(&single(name, args, &kwargs)?, limits)?;
            limits.check_len(list.borrow().len() + items.len())?;
            list.borrow_mut().extend(items);
        }
        "insert" => {
            let mut bound = bind(name, &["index", "object"], 2, args, kwargs)?;
            let index = expect_int(&bound.required(0))?;
            let item = bound.required(1);
            let len = list.borrow().len();
            limits.check_len(len + 1)?;
            let index = if index < 0 { index + len as i64 } else { index };
            let index = index.clamp(0, len as i64) as usize;
            list.borrow_mut().insert(index, item);
        }
        "pop" => {
            let mut bound = bind(name, &["index"], 0, args, kwargs)?;
            let index = bound.take(0).map(|value| expect_int(&value)).transpose()?.unwrap_or(-1);
            let len = list.borrow().len();
            if len == 0 {
                return Err(ScriptError::index_error("pop from empty list"));
            }
            let position = if index < 0 { index + len as i64 } else { index };
            if !(0..len as i64).contains(&position) {
                return Err(ScriptError::index_error("pop index out of range"));
            }
            return Ok(list.borrow_mut().remove(position as usize));
        }
        "remove" => {
            let item = single(name, args, &kwargs)?;
            let position = position_of(&list.borrow(), &item)?
                .ok_or_else(|| ScriptError::value_error("list.remove(x): x not in list"))?;
            list.borrow_mut().remove(position);
        }
        "index" => {
            let item = single(name, args, &kwargs)?;
            let position = position_of(&list.borrow(), &item)?
                .ok_or_else(|| ScriptError::value_error(format!("{} is not in list", item.repr())))?;
            return Ok(Value::Int(position as i64));
        }
        "count" => {
            let item = single(name, args, &kwargs)?;
            let mut count = 0;
            for candidate in list.borrow().iter() {
                if candidate.is_same(&item) || candidate.equals(&item)? {
                    count += 1;
                }
            }
            return Ok(Value::Int(count));
        }
        "clear" => {
            no_arguments(name, &args, &kwargs)?;
            list.borrow_mut().clear();
        }
        "copy" => {
            no_arguments(name, &args, &kwargs)?;
            return Ok(Value::list(list.borrow().clone()));
        }
        "reverse" => {
            no_arguments(name, &args, &kwargs)?;
            list.borrow_mut().reverse();
        }
        "sort" => {
            if !args.is_empty() {
                return Err(ScriptError::type_error("sort() takes no positional arguments"));
            }
            let mut bound = bind(name, &["reverse"], 0, args, kwargs)?;
            let reverse = bound.take(0).is_some_and(|value| value.is_truthy());
            let items = list.borrow().clone();
            let sorted = sort_values(items, reverse)?;
            *list.borrow_mut() = sorted;
        }
        _ => return Err(ScriptError::attribute_error("list", name)),
    }
    Ok(Value::None)
}

fn position_of(items: &[Value], item: &Value) -> Result<Option<usize>, ScriptError> {
    for (index, candidate) in items.iter().enumerate() {
        if candidate.is_same(item) || candidate.equals(item)? {
            return Ok(Some(index));
        }
    }
    Ok(None)
}

fn dict_method(
    dict: &DictRef,
    name: &str,
    args: Vec<Value>,
    kwargs: Keywords,
    limits: &ExecutionOptions,
) -> Result<Value, ScriptError> {
    match name {
        "get" => {
            let mut bound = bind(name, &["key", "default"], 1, args, kwargs)?;
            let key = bound.required(0);
            key.check_hashable()?;
            let found = dict.borrow().get(&key).cloned();
            Ok(found.or_else(|| bound.take(1)).unwrap_or(Value::None))
        }
        "keys" | "values" | "items" => {
            no_arguments(name, &args, &kwargs)?;
            let dict = dict.borrow();
            let items = match name {
                "keys" => dict.keys().cloned().collect(),
                "values" => dict.values().cloned().collect(),
                _ => dict
                    .iter()
                    .map(|(key, value)| Value::tuple(vec![key.clone(), value.clone()]))
                    .collect(),
            };
            Ok(Value::list(items))
        }
        "pop" => {
            let mut bound = bind(name, &["key", "default"], 1, args, kwargs)?;
            let key = bound.required(0);
            key.check_hashable()?;
            let removed = dict.borrow_mut().remove(&key);
            removed
                .or_else(|| bound.take(1))
                .ok_or_else(|| ScriptError::key_error(key.repr()))
        }
        "setdefault" => {
            let mut bound = bind(name, &["key", "default"], 1, args, kwargs)?;
            let key = bound.required(0);
            key.check_hashable()?;
            if let Some(existing) = dict.borrow().get(&key) {
                return Ok(existing.clone());
            }
            let default = bound.take(1).unwrap_or(Value::None);
            dict.borrow_mut().insert(key, default.clone());
            Ok(default)
        }
        "update" => {
            if args.len() > 1 {
                return Err(ScriptError::type_error(format!(
                    "update expected at most 1 argument, got {}",
                    args.len()
                )));
            }
            let mut staged = Dict::new();
            if let Some(source) = args.first() {
                update_dict(&mut staged, source, limits)?;
            }
            let mut dict = dict.borrow_mut();
            for (key, value) in staged.iter() {
                dict.insert(key.clone(), value.clone());
            }
            for (key, value) in kwargs {
                dict.insert(Value::from(key), value);
            }
            Ok(Value::None)
        }
        "clear" => {
            no_arguments(name, &args, &kwargs)?;
            dict.borrow_mut().clear();
            Ok(Value::None)
        }
        "copy" => {
            no_arguments(name, &args, &kwargs)?;
            Ok(Value::dict(dict.borrow().clone()))
        }
        _ => Err(ScriptError::attribute_error("dict", name)),
    }
}

fn set_method(
    set: &ListRef,
    name: &str,
    args: Vec<Value>,
    kwargs: Keywords,
    limits: &ExecutionOptions,
) -> Result<Value, ScriptError> {
    fn member(items: &[Value], item: &Value) -> bool {
        items.iter().any(|existing| existing.key_eq(item))
    }

    match name {
        "add" => {
            let item = single(name, args, &kwargs)?;
            item.check_hashable()?;
            if !member(&set.borrow(), &item) {
                limits.check_len(set.borrow().len() + 1)?;
                set.borrow_mut().push(item);
            }
            Ok(Value::None)
        }
        "discard" | "remove" => {
            let item = single(name, args, &kwargs)?;
            item.check_hashable()?;
            let position = set.borrow().iter().position(|existing| existing.key_eq(&item));
            match position {
                Some(position) => {
                    set.borrow_mut().remove(position);
                }
                None if name == "remove" => return Err(ScriptError::key_error(item.repr())),
                None => {}
            }
            Ok(Value::None)
        }
        "clear" => {
            no_arguments(name, &args, &kwargs)?;
            set.borrow_mut().clear();
            Ok(Value::None)
        }
        "copy" => {
            no_arguments(name, &args, &kwargs)?;
            Ok(Value::Set(ListCell::shared(set.borrow().clone())))
        }
        "union" | "intersection" | "difference" => {
            builtins::no_keywords(name, &kwargs)?;
            let mut result = set.borrow().clone();
            for other in &args {
                let other = Value::set(iterate(other, limits)?)?;
                let Value::Set(other) = other else {
                    continue;
                };
                let other = other.borrow();
                match name {
                    "union" => {
                        for item in other.iter() {
                            if !member(&result, item) {
                                result.push(item.clone());
                            }
                        }
                        limits.check_len(result.len())?;
                    }
                    "intersection" => result.retain(|item| member(&other, item)),
                    _ => result.retain(|item| !member(&other, item)),
                }
            }
            Ok(Value::Set(ListCell::shared(result)))
        }
        "issubset" | "issuperset" => {
            let other = Value::set(iterate(&single(name, args, &kwargs)?, limits)?)?;
            let Value::Set(other) = other else {
                return Ok(Value::Bool(false));
            };
            let (mine, theirs) = (set.borrow(), other.borrow());
            let holds = if name == "issubset" {
                mine.iter().all(|item| member(&theirs, item))
            } else {
                theirs.iter().all(|item| member(&mine, item))
            };
            Ok(Value::Bool(holds))
        }
        _ => Err(ScriptError::attribute_error("set", name)),
    }
}

fn date_method(
    date: NaiveDate,
    datetime: Option<NaiveDateTime>,
    name: &str,
    args: Vec<Value>,
    kwargs: Keywords,
) -> Result<Value, ScriptError> {
    match name {
        "weekday" => {
            no_arguments(name, &args, &kwargs)?;
            Ok(Value::Int(i64::from(date.weekday().num_days_from_monday())))
        }
        "isoweekday" => {
            no_arguments(name, &args, &kwargs)?;
            Ok(Value::Int(i64::from(date.weekday().number_from_monday())))
        }
        "isoformat" => {
            no_arguments(name, &args, &kwargs)?;
            Ok(Value::from(match datetime {
                Some(dt) => format_datetime(&dt, 'T'),
                None => date.format("%Y-%m-%d").to_string(),
            }))
        }
        "strftime" => {
            let pattern = single(name, args, &kwargs)?;
            let pattern = expect_str(name, &pattern)?;
            let target = datetime.map_or(Value::Date(date), Value::DateTime);
            format::strftime(&target, pattern).map(Value::from)
        }
        "date" => {
            no_arguments(name, &args, &kwargs)?;
            Ok(Value::Date(date))
        }
        _ => Err(ScriptError::attribute_error("date", name)),
    }
}

fn class_method(kind: TypeKind, name: &str, args: Vec<Value>, kwargs: Keywords) -> Result<Value, ScriptError> {
    match (kind, name) {
        (TypeKind::Date, "today") => {
            no_arguments(name, &args, &kwargs)?;
            Ok(Value::Date(Local::now().date_naive()))
        }
        (TypeKind::DateTime, "now" | "today") => {
            no_arguments(name, &args, &kwargs)?;
            Ok(Value::DateTime(Local::now().naive_local()))
        }
        (TypeKind::Date | TypeKind::DateTime, "fromisoformat") => {
            let text = single(name, args, &kwargs)?;
            let text = expect_str(name, &text)?;
            let invalid = || ScriptError::value_error(format!("Invalid isoformat string: {}", Value::str(text).repr()));
            if kind == TypeKind::Date {
                return NaiveDate::parse_from_str(text, "%Y-%m-%d")
                    .map(Value::Date)
                    .map_err(|_| invalid());
            }
            ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M", "%Y-%m-%d %H:%M"]
                .iter()
                .find_map(|pattern| NaiveDateTime::parse_from_str(text, pattern).ok())
                .or_else(|| {
                    NaiveDate::parse_from_str(text, "%Y-%m-%d")
                        .ok()
                        .and_then(|date| date.and_hms_opt(0, 0, 0))
                })
                .map(Value::DateTime)
                .ok_or_else(invalid)
        }
        _ => Err(ScriptError::type_error(format!(
            "type object '{}' has no callable member '{}'",
            kind.name(),
            name
        ))),
    }
}
