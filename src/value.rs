use crate::builtins::Builtin;
use crate::error::{ErrorKind, ScriptError};
use crate::object::ReadOnlyView;
use chrono::{NaiveDate, NaiveDateTime, Timelike};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use std::cell::RefCell;
use std::fmt;
use std::ops::Deref;
use std::rc::Rc;

/// How deep container comparisons, reprs and copies may recurse.
pub const MAX_VALUE_DEPTH: usize = 64;

pub type ListRef = Rc<ListCell>;
pub type DictRef = Rc<RefCell<Dict>>;

/// A script value.
///
/// Lists, sets and dicts are shared references: `b = a` aliases the same
/// container. Everything else behaves as an immutable value.
#[derive(Debug, Clone)]
pub enum Value {
    None,
    Bool(bool),
    Int(i64),
    Float(f64),
    Decimal(Decimal),
    Str(Rc<str>),
    Date(NaiveDate),
    DateTime(NaiveDateTime),
    List(ListRef),
    Tuple(Rc<TupleItems>),
    /// Insertion ordered; elements are unique and hashable.
    Set(ListRef),
    Dict(DictRef),
    Range(Range),
    Type(TypeKind),
    Builtin(Builtin),
    Method(Rc<BoundMethod>),
    Object(ReadOnlyView),
}

pub(crate) fn too_deep(operation: &str) -> ScriptError {
    ScriptError::new(
        ErrorKind::ResourceExceeded,
        format!("maximum recursion depth exceeded in {}", operation),
    )
}

/// Backing store of a list or set.
#[derive(Debug, Default)]
pub struct ListCell(RefCell<Vec<Value>>);

impl ListCell {
    pub fn shared(items: Vec<Value>) -> ListRef {
        Rc::new(ListCell(RefCell::new(items)))
    }
}

impl Deref for ListCell {
    type Target = RefCell<Vec<Value>>;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl Drop for ListCell {
    fn drop(&mut self) {
        release(std::mem::take(self.0.get_mut()));
    }
}

/// Elements of a tuple.
#[derive(Debug)]
pub struct TupleItems(Box<[Value]>);

impl Deref for TupleItems {
    type Target = [Value];

    fn deref(&self) -> &[Value] {
        &self.0
    }
}

impl Drop for TupleItems {
    fn drop(&mut self) {
        release(std::mem::take(&mut self.0).into_vec());
    }
}

/// Drops `pending` with an explicit work list instead of recursion.
///
/// Script-built values can nest arbitrarily deep (`a = [a]` in a loop), so
/// each container hands its children over before it is freed.
fn release(mut pending: Vec<Value>) {
    while let Some(mut value) = pending.pop() {
        detach_children(&mut value, &mut pending);
    }
}

/// Moves the children of a container this value solely owns onto `pending`.
fn detach_children(value: &mut Value, pending: &mut Vec<Value>) {
    match value {
        Value::List(items) | Value::Set(items) => {
            if let Some(cell) = Rc::get_mut(items) {
                pending.append(cell.0.get_mut());
            }
        }
        Value::Tuple(items) => {
            if let Some(items) = Rc::get_mut(items) {
                pending.extend(std::mem::take(&mut items.0).into_vec());
            }
        }
        Value::Dict(dict) => {
            if let Some(dict) = Rc::get_mut(dict) {
                dict.get_mut().detach_into(pending);
            }
        }
        Value::Method(method) => {
            if let Some(method) = Rc::get_mut(method) {
                pending.push(std::mem::replace(&mut method.receiver, Value::None));
            }
        }
        _ => {}
    }
}

/// Insertion-ordered mapping with script equality on keys.
#[derive(Debug, Clone, Default)]
pub struct Dict {
    entries: Vec<(Value, Value)>,
}

impl Dict {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn position(&self, key: &Value) -> Option<usize> {
        self.entries.iter().position(|(k, _)| k.key_eq(key))
    }

    pub fn get(&self, key: &Value) -> Option<&Value> {
        self.position(key).map(|index| &self.entries[index].1)
    }

    pub fn contains_key(&self, key: &Value) -> bool {
        self.position(key).is_some()
    }

    /// Inserts or replaces; a replaced entry keeps its position.
    pub fn insert(&mut self, key: Value, value: Value) {
        match self.position(&key) {
            Some(index) => self.entries[index].1 = value,
            None => self.entries.push((key, value)),
        }
    }

    pub fn remove(&mut self, key: &Value) -> Option<Value> {
        self.position(key).map(|index| self.entries.remove(index).1)
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn keys(&self) -> impl Iterator<Item = &Value> {
        self.entries.iter().map(|(k, _)| k)
    }

    pub fn values(&self) -> impl Iterator<Item = &Value> {
        self.entries.iter().map(|(_, v)| v)
    }

    pub fn iter(&self) -> impl Iterator<Item = &(Value, Value)> {
        self.entries.iter()
    }

    fn detach_into(&mut self, pending: &mut Vec<Value>) {
        for (key, value) in self.entries.drain(..) {
            pending.push(key);
            pending.push(value);
        }
    }
}

impl Drop for Dict {
    fn drop(&mut self) {
        let mut pending = Vec::new();
        self.detach_into(&mut pending);
        release(pending);
    }
}

impl FromIterator<(Value, Value)> for Dict {
    fn from_iter<I: IntoIterator<Item = (Value, Value)>>(iter: I) -> Self {
        let mut dict = Dict::new();
        for (key, value) in iter {
            dict.insert(key, value);
        }
        dict
    }
}

/// Lazy arithmetic progression produced by `range(...)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Range {
    pub start: i64,
    pub stop: i64,
    pub step: i64,
}

impl Range {
    pub fn len(&self) -> usize {
        let (start, stop, step) = (self.start as i128, self.stop as i128, self.step as i128);
        let count = if step > 0 && start < stop {
            (stop - start + step - 1) / step
        } else if step < 0 && start > stop {
            (start - stop - step - 1) / -step
        } else {
            0
        };
        count as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get(&self, index: usize) -> Option<i64> {
        if index < self.len() {
            Some((self.start as i128 + index as i128 * self.step as i128) as i64)
        } else {
            None
        }
    }

    pub fn contains(&self, value: i64) -> bool {
        let offset = value as i128 - self.start as i128;
        let step = self.step as i128;
        let in_bounds = if step > 0 {
            value >= self.start && value < self.stop
        } else {
            value <= self.start && value > self.stop
        };
        in_bounds && offset % step == 0
    }

    pub fn iter(&self) -> impl Iterator<Item = i64> + '_ {
        (0..self.len()).filter_map(move |index| self.get(index))
    }
}

/// The callable type objects visible to scripts, plus the types of values
/// that cannot be constructed directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeKind {
    NoneType,
    Bool,
    Int,
    Float,
    Decimal,
    Str,
    List,
    Tuple,
    Set,
    Dict,
    Date,
    DateTime,
    Range,
    Type,
    Function,
    Object,
}

impl TypeKind {
    pub fn name(&self) -> &'static str {
        match self {
            TypeKind::NoneType => "NoneType",
            TypeKind::Bool => "bool",
            TypeKind::Int => "int",
            TypeKind::Float => "float",
            TypeKind::Decimal => "Decimal",
            TypeKind::Str => "str",
            TypeKind::List => "list",
            TypeKind::Tuple => "tuple",
            TypeKind::Set => "set",
            TypeKind::Dict => "dict",
            TypeKind::Date => "date",
            TypeKind::DateTime => "datetime",
            TypeKind::Range => "range",
            TypeKind::Type => "type",
            TypeKind::Function => "builtin_function_or_method",
            TypeKind::Object => "object",
        }
    }

    /// `bool` is a subtype of `int` and `datetime` of `date`.
    pub fn is_subtype_of(&self, other: &TypeKind) -> bool {
        self == other
            || other == &TypeKind::Object
            || matches!(
                (self, other),
                (TypeKind::Bool, TypeKind::Int) | (TypeKind::DateTime, TypeKind::Date)
            )
    }
}

/// A method looked up on a value, waiting to be called.
#[derive(Debug, Clone)]
pub struct BoundMethod {
    pub receiver: Value,
    pub name: &'static str,
}

impl Drop for BoundMethod {
    fn drop(&mut self) {
        release(vec![std::mem::replace(&mut self.receiver, Value::None)]);
    }
}

impl Value {
    pub fn str(text: &str) -> Self {
        Value::Str(Rc::from(text))
    }

    pub fn list(items: Vec<Value>) -> Self {
        Value::List(ListCell::shared(items))
    }

    pub fn tuple(items: Vec<Value>) -> Self {
        Value::Tuple(Rc::new(TupleItems(items.into_boxed_slice())))
    }

    pub fn dict(dict: Dict) -> Self {
        Value::Dict(Rc::new(RefCell::new(dict)))
    }

    /// Builds a set, dropping duplicates and rejecting unhashable elements.
    pub fn set(items: Vec<Value>) -> Result<Self, ScriptError> {
        let mut unique: Vec<Value> = Vec::with_capacity(items.len());
        for item in items {
            item.check_hashable()?;
            if !unique.iter().any(|existing| existing.key_eq(&item)) {
                unique.push(item);
            }
        }
        Ok(Value::Set(ListCell::shared(unique)))
    }

    pub fn is_truthy(&self) -> bool {
        match self {
            Value::None => false,
            Value::Bool(b) => *b,
            Value::Int(n) => *n != 0,
            Value::Float(n) => *n != 0.0,
            Value::Decimal(d) => !d.is_zero(),
            Value::Str(s) => !s.is_empty(),
            Value::List(items) | Value::Set(items) => !items.borrow().is_empty(),
            Value::Tuple(items) => !items.is_empty(),
            Value::Dict(dict) => !dict.borrow().is_empty(),
            Value::Range(range) => !range.is_empty(),
            _ => true,
        }
    }

    pub fn type_kind(&self) -> TypeKind {
        match self {
            Value::None => TypeKind::NoneType,
            Value::Bool(_) => TypeKind::Bool,
            Value::Int(_) => TypeKind::Int,
            Value::Float(_) => TypeKind::Float,
            Value::Decimal(_) => TypeKind::Decimal,
            Value::Str(_) => TypeKind::Str,
            Value::Date(_) => TypeKind::Date,
            Value::DateTime(_) => TypeKind::DateTime,
            Value::List(_) => TypeKind::List,
            Value::Tuple(_) => TypeKind::Tuple,
            Value::Set(_) => TypeKind::Set,
            Value::Dict(_) => TypeKind::Dict,
            Value::Range(_) => TypeKind::Range,
            Value::Type(_) => TypeKind::Type,
            Value::Builtin(_) | Value::Method(_) => TypeKind::Function,
            Value::Object(_) => TypeKind::Object,
        }
    }

    pub fn type_name(&self) -> String {
        match self {
            Value::Object(view) => view.type_name().to_string(),
            other => other.type_kind().name().to_string(),
        }
    }

    /// Dict keys and set elements must be immutable.
    pub fn check_hashable(&self) -> Result<(), ScriptError> {
        self.check_hashable_at(0)
    }

    fn check_hashable_at(&self, depth: usize) -> Result<(), ScriptError> {
        if depth > MAX_VALUE_DEPTH {
            return Err(too_deep("hashing"));
        }
        match self {
            Value::List(_) | Value::Set(_) | Value::Dict(_) => Err(ScriptError::type_error(format!(
                "unhashable type: '{}'",
                self.type_name()
            ))),
            Value::Tuple(items) => items.iter().try_for_each(|item| item.check_hashable_at(depth + 1)),
            _ => Ok(()),
        }
    }

    /// Equality for hashable values; never recurses into mutable containers.
    pub fn key_eq(&self, other: &Value) -> bool {
        self.equals(other).unwrap_or(false)
    }

    pub fn equals(&self, other: &Value) -> Result<bool, ScriptError> {
        self.equals_at(other, 0)
    }

    fn equals_at(&self, other: &Value, depth: usize) -> Result<bool, ScriptError> {
        if depth > MAX_VALUE_DEPTH {
            return Err(too_deep("comparison"));
        }

        let equal = match (self, other) {
            (Value::None, Value::None) => true,
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::Date(a), Value::Date(b)) => a == b,
            (Value::DateTime(a), Value::DateTime(b)) => a == b,
            (Value::List(a), Value::List(b)) => {
                if Rc::ptr_eq(a, b) {
                    return Ok(true);
                }
                sequences_equal(&a.borrow(), &b.borrow(), depth)?
            }
            (Value::Tuple(a), Value::Tuple(b)) => sequences_equal(a, b, depth)?,
            (Value::Set(a), Value::Set(b)) => {
                let (a, b) = (a.borrow(), b.borrow());
                a.len() == b.len() && a.iter().all(|x| b.iter().any(|y| x.key_eq(y)))
            }
            (Value::Dict(a), Value::Dict(b)) => {
                if Rc::ptr_eq(a, b) {
                    return Ok(true);
                }
                let (a, b) = (a.borrow(), b.borrow());
                if a.len() != b.len() {
                    return Ok(false);
                }
                for (key, value) in a.iter() {
                    match b.get(key) {
                        Some(other_value) if value.equals_at(other_value, depth + 1)? => {}
                        _ => return Ok(false),
                    }
                }
                true
            }
            (Value::Range(a), Value::Range(b)) => {
                a.len() == b.len() && (a.is_empty() || (a.start == b.start && (a.len() == 1 || a.step == b.step)))
            }
            (Value::Type(a), Value::Type(b)) => a == b,
            (Value::Builtin(a), Value::Builtin(b)) => a == b,
            (Value::Method(a), Value::Method(b)) => Rc::ptr_eq(a, b),
            (Value::Object(a), Value::Object(b)) => a.same_object(b),
            (a, b) => match (a.as_number(), b.as_number()) {
                (Some(x), Some(y)) => x.equals(&y),
                _ => false,
            },
        };
        Ok(equal)
    }

    /// Identity as observed by `is`: containers compare by reference,
    /// immutable scalars by value.
    pub fn is_same(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::List(a), Value::List(b)) | (Value::Set(a), Value::Set(b)) => Rc::ptr_eq(a, b),
            (Value::Dict(a), Value::Dict(b)) => Rc::ptr_eq(a, b),
            (Value::Tuple(a), Value::Tuple(b)) => Rc::ptr_eq(a, b) || (a.is_empty() && b.is_empty()),
            (Value::Method(a), Value::Method(b)) => Rc::ptr_eq(a, b),
            (Value::Object(a), Value::Object(b)) => a.same_object(b),
            (Value::None, Value::None) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a.to_bits() == b.to_bits(),
            (Value::Decimal(a), Value::Decimal(b)) => a == b && a.scale() == b.scale(),
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::Date(a), Value::Date(b)) => a == b,
            (Value::DateTime(a), Value::DateTime(b)) => a == b,
            (Value::Range(a), Value::Range(b)) => a == b,
            (Value::Type(a), Value::Type(b)) => a == b,
            (Value::Builtin(a), Value::Builtin(b)) => a == b,
            _ => false,
        }
    }

    pub fn as_number(&self) -> Option<Number> {
        match self {
            Value::Bool(b) => Some(Number::Int(*b as i64)),
            Value::Int(n) => Some(Number::Int(*n)),
            Value::Float(f) => Some(Number::Float(*f)),
            Value::Decimal(d) => Some(Number::Decimal(*d)),
            _ => None,
        }
    }

    /// Integer view of `int` and `bool` values, used for indices and counts.
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Bool(b) => Some(*b as i64),
            Value::Int(n) => Some(*n),
            _ => None,
        }
    }

    pub fn repr(&self) -> String {
        let mut out = String::new();
        self.write_repr(&mut out, &mut Vec::new());
        out
    }

    /// `active` holds the containers currently being printed, so a
    /// container reached through itself renders as `[...]`.
    fn write_repr(&self, out: &mut String, active: &mut Vec<*const ()>) {
        if active.len() > MAX_VALUE_DEPTH {
            out.push_str("...");
            return;
        }

        match self {
            Value::Str(s) => out.push_str(&quote_str(s)),
            Value::Decimal(d) => out.push_str(&format!("Decimal('{}')", d)),
            Value::Date(d) => out.push_str(&format!("datetime.date({})", date_fields(d))),
            Value::DateTime(dt) => out.push_str(&format!("datetime.datetime({})", datetime_fields(dt))),
            Value::List(items) => {
                let id = Rc::as_ptr(items) as *const ();
                if active.contains(&id) {
                    out.push_str("[...]");
                    return;
                }
                active.push(id);
                write_items(out, "[", &items.borrow(), "]", active);
                active.pop();
            }
            Value::Tuple(items) => {
                if items.len() == 1 {
                    out.push('(');
                    items[0].write_repr(out, active);
                    out.push_str(",)");
                } else {
                    write_items(out, "(", items, ")", active);
                }
            }
            Value::Set(items) => {
                let items = items.borrow();
                if items.is_empty() {
                    out.push_str("set()");
                } else {
                    write_items(out, "{", &items, "}", active);
                }
            }
            Value::Dict(dict) => {
                let id = Rc::as_ptr(dict) as *const ();
                if active.contains(&id) {
                    out.push_str("{...}");
                    return;
                }
                active.push(id);
                out.push('{');
                for (index, (key, value)) in dict.borrow().iter().enumerate() {
                    if index > 0 {
                        out.push_str(", ");
                    }
                    key.write_repr(out, active);
                    out.push_str(": ");
                    value.write_repr(out, active);
                }
                out.push('}');
                active.pop();
            }
            other => out.push_str(&other.to_string()),
        }
    }
}

fn sequences_equal(a: &[Value], b: &[Value], depth: usize) -> Result<bool, ScriptError> {
    if a.len() != b.len() {
        return Ok(false);
    }
    for (x, y) in a.iter().zip(b) {
        if !x.equals_at(y, depth + 1)? {
            return Ok(false);
        }
    }
    Ok(true)
}

fn write_items(out: &mut String, open: &str, items: &[Value], close: &str, active: &mut Vec<*const ()>) {
    out.push_str(open);
    for (index, item) in items.iter().enumerate() {
        if index > 0 {
            out.push_str(", ");
        }
        item.write_repr(out, active);
    }
    out.push_str(close);
}

/// Quotes like the `repr` of a string: single quotes unless the text
/// contains one and no double quote.
pub fn quote_str(s: &str) -> String {
    let quote = if s.contains('\'') && !s.contains('"') { '"' } else { '\'' };
    let mut out = String::with_capacity(s.len() + 2);
    out.push(quote);
    for c in s.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if c == quote => {
                out.push('\\');
                out.push(c);
            }
            c if c.is_control() => out.push_str(&format!("\\x{:02x}", c as u32)),
            c => out.push(c),
        }
    }
    out.push(quote);
    out
}

fn date_fields(date: &NaiveDate) -> String {
    use chrono::Datelike;
    format!("{}, {}, {}", date.year(), date.month(), date.day())
}

fn datetime_fields(dt: &NaiveDateTime) -> String {
    let mut fields = format!("{}, {}, {}", date_fields(&dt.date()), dt.hour(), dt.minute());
    let micros = dt.nanosecond() / 1_000;
    if dt.second() != 0 || micros != 0 {
        fields.push_str(&format!(", {}", dt.second()));
    }
    if micros != 0 {
        fields.push_str(&format!(", {}", micros));
    }
    fields
}

/// `str()` of a datetime: ISO date and time separated by a space.
pub fn format_datetime(dt: &NaiveDateTime, separator: char) -> String {
    let micros = dt.nanosecond() / 1_000;
    let mut text = format!("{}{}{}", dt.date().format("%Y-%m-%d"), separator, dt.format("%H:%M:%S"));
    if micros != 0 {
        text.push_str(&format!(".{:06}", micros));
    }
    text
}

/// Shortest round-trip float text, switching to exponent form outside
/// `1e-4 <= |x| < 1e16`.
pub fn format_float(value: f64) -> String {
    if value.is_nan() {
        return "nan".to_string();
    }
    if value.is_infinite() {
        return if value > 0.0 { "inf".to_string() } else { "-inf".to_string() };
    }

    let magnitude = value.abs();
    if magnitude != 0.0 && !(1e-4..1e16).contains(&magnitude) {
        let text = format!("{:e}", value);
        return match text.split_once('e') {
            Some((mantissa, exponent)) => {
                let exponent: i32 = exponent.parse().unwrap_or(0);
                let sign = if exponent < 0 { '-' } else { '+' };
                format!("{}e{}{:02}", mantissa, sign, exponent.abs())
            }
            None => text,
        };
    }

    let text = format!("{}", value);
    if text.contains('.') {
        text
    } else {
        format!("{}.0", text)
    }
}

/// A numeric operand after `bool` has been widened to `int`.
#[derive(Debug, Clone, Copy)]
pub enum Number {
    Int(i64),
    Float(f64),
    Decimal(Decimal),
}

impl Number {
    pub fn to_f64(&self) -> f64 {
        match self {
            Number::Int(n) => *n as f64,
            Number::Float(f) => *f,
            Number::Decimal(d) => d.to_f64().unwrap_or(f64::NAN),
        }
    }

    pub fn equals(&self, other: &Number) -> bool {
        self.compare(other) == Some(std::cmp::Ordering::Equal)
    }

    pub fn compare(&self, other: &Number) -> Option<std::cmp::Ordering> {
        match (self, other) {
            (Number::Int(a), Number::Int(b)) => Some(a.cmp(b)),
            (Number::Decimal(a), Number::Decimal(b)) => Some(a.cmp(b)),
            (Number::Int(a), Number::Decimal(b)) => Some(Decimal::from(*a).cmp(b)),
            (Number::Decimal(a), Number::Int(b)) => Some(a.cmp(&Decimal::from(*b))),
            (a, b) => a.to_f64().partial_cmp(&b.to_f64()),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Value::None => write!(f, "None"),
            Value::Bool(true) => write!(f, "True"),
            Value::Bool(false) => write!(f, "False"),
            Value::Int(n) => write!(f, "{}", n),
            Value::Float(n) => write!(f, "{}", format_float(*n)),
            Value::Decimal(d) => write!(f, "{}", d),
            Value::Str(s) => write!(f, "{}", s),
            Value::Date(d) => write!(f, "{}", d.format("%Y-%m-%d")),
            Value::DateTime(dt) => write!(f, "{}", format_datetime(dt, ' ')),
            Value::List(_) | Value::Tuple(_) | Value::Set(_) | Value::Dict(_) => write!(f, "{}", self.repr()),
            Value::Range(range) => {
                if range.step == 1 {
                    write!(f, "range({}, {})", range.start, range.stop)
                } else {
                    write!(f, "range({}, {}, {})", range.start, range.stop, range.step)
                }
            }
            Value::Type(kind) => write!(f, "<class '{}'>", kind.name()),
            Value::Builtin(builtin) => write!(f, "<built-in function {}>", builtin.name()),
            Value::Method(method) => write!(
                f,
                "<built-in method {} of {} object>",
                method.name,
                method.receiver.type_name()
            ),
            Value::Object(view) => write!(f, "<{} object>", view.type_name()),
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        self.equals(other).unwrap_or(false)
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Bool(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Int(value)
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Float(value)
    }
}

impl From<Decimal> for Value {
    fn from(value: Decimal) -> Self {
        Value::Decimal(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::str(value)
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::Str(Rc::from(value))
    }
}

impl From<NaiveDate> for Value {
    fn from(value: NaiveDate) -> Self {
        Value::Date(value)
    }
}

impl From<NaiveDateTime> for Value {
    fn from(value: NaiveDateTime) -> Self {
        Value::DateTime(value)
    }
}

impl From<Vec<Value>> for Value {
    fn from(value: Vec<Value>) -> Self {
        Value::list(value)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(value: Option<T>) -> Self {
        value.map(Into::into).unwrap_or(Value::None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn repr_matches_script_literals() {
        let list = Value::list(vec![
            Value::Int(1),
            Value::Float(2.0),
            Value::str("it's"),
            Value::None,
            Value::tuple(vec![Value::Bool(true)]),
        ]);
        assert_eq!(list.repr(), "[1, 2.0, \"it's\", None, (True,)]");
        assert_eq!(Value::set(vec![]).unwrap().repr(), "set()");
        assert_eq!(Value::str("a\nb").repr(), "'a\\nb'");
        assert_eq!(Value::str("plain").to_string(), "plain");
    }

    #[test]
    fn float_text_uses_exponent_at_extremes() {
        assert_eq!(format_float(1e16), "1e+16");
        assert_eq!(format_float(1.5e-5), "1.5e-05");
        assert_eq!(format_float(0.1 + 0.2), "0.30000000000000004");
        assert_eq!(format_float(-3.0), "-3.0");
    }

    #[test]
    fn dates_render_like_their_constructors() {
        let date = NaiveDate::from_ymd_opt(2001, 5, 21).unwrap();
        assert_eq!(Value::Date(date).to_string(), "2001-05-21");
        assert_eq!(Value::Date(date).repr(), "datetime.date(2001, 5, 21)");
        let datetime = date.and_hms_opt(9, 30, 0).unwrap();
        assert_eq!(Value::DateTime(datetime).repr(), "datetime.datetime(2001, 5, 21, 9, 30)");
        assert_eq!(Value::DateTime(datetime).to_string(), "2001-05-21 09:30:00");
    }

    #[test]
    fn numeric_equality_crosses_types() {
        assert_eq!(Value::Int(1), Value::Float(1.0));
        assert_eq!(Value::Bool(true), Value::Int(1));
        assert_eq!(Value::Decimal(Decimal::new(150, 2)), Value::Float(1.5));
        assert!(Value::Int(1) != Value::str("1"));
    }

    #[test]
    fn self_containing_list_is_printable_and_comparable() {
        let list = Value::list(vec![Value::Int(1)]);
        if let Value::List(items) = &list {
            items.borrow_mut().push(list.clone());
        }
        assert_eq!(list.repr(), "[1, [...]]");
        assert!(list.equals(&list).unwrap());

        let other = Value::list(vec![Value::Int(1)]);
        if let Value::List(items) = &other {
            items.borrow_mut().push(other.clone());
        }
        assert!(list.equals(&other).is_err());
    }

    #[test]
    fn deeply_nested_containers_drop_iteratively() {
        let mut value = Value::None;
        for i in 0..200_000 {
            value = match i % 4 {
                0 => Value::list(vec![value]),
                1 => Value::tuple(vec![value, Value::Int(i)]),
                2 => Value::dict(Dict::from_iter([(Value::Int(i), value)])),
                _ => Value::Method(Rc::new(BoundMethod {
                    receiver: Value::list(vec![value]),
                    name: "append",
                })),
            };
        }
        drop(value);
    }

    #[test]
    fn shared_children_survive_their_parent() {
        let child = Value::list(vec![Value::Int(7)]);
        let parent = Value::list(vec![child.clone(), child.clone()]);
        drop(parent);
        assert_eq!(child.repr(), "[7]");
    }

    #[test]
    fn deep_tuples_are_not_hashed_without_bound() {
        let mut value = Value::Int(0);
        for _ in 0..1_000 {
            value = Value::tuple(vec![value]);
        }
        assert_eq!(value.check_hashable().unwrap_err().kind, ErrorKind::ResourceExceeded);
    }

    #[test]
    fn sets_deduplicate_and_reject_unhashable() {
        let set = Value::set(vec![Value::Int(1), Value::Float(1.0), Value::Int(2)]).unwrap();
        assert_eq!(set.repr(), "{1, 2}");
        assert!(Value::set(vec![Value::list(vec![])]).is_err());
    }

    #[test]
    fn range_length_and_membership() {
        let range = Range { start: 10, stop: 0, step: -3 };
        assert_eq!(range.iter().collect::<Vec<_>>(), vec![10, 7, 4, 1]);
        assert!(range.contains(4));
        assert!(!range.contains(5));
        assert_eq!(Range { start: 0, stop: 0, step: 1 }.len(), 0);
    }
}
