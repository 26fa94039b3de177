//! Host objects and the read-only view scripts see them through.

use crate::error::{ErrorKind, ScriptError};
use crate::value::{Dict, ListCell, Value, MAX_VALUE_DEPTH};
use std::collections::BTreeSet;
use std::fmt;
use std::rc::Rc;

/// The capability a host grants a script: named attribute reads.
///
/// Nested objects are returned as [`Value::Object`] (see [`Value::object`]);
/// they are re-wrapped with the parent view's denylist on the way out.
pub trait ScriptObject: fmt::Debug {
    fn type_name(&self) -> &str;

    fn get_attr(&self, name: &str) -> Option<Value>;
}

/// Member names a script may never read, because on real host objects they
/// would trigger writes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeniedMembers {
    names: BTreeSet<String>,
}

impl Default for DeniedMembers {
    fn default() -> Self {
        Self::from_names(["create", "save", "update", "delete"])
    }
}

impl DeniedMembers {
    pub fn none() -> Self {
        Self {
            names: BTreeSet::new(),
        }
    }

    pub fn from_names<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            names: names.into_iter().map(Into::into).collect(),
        }
    }

    pub fn with(mut self, name: impl Into<String>) -> Self {
        self.names.insert(name.into());
        self
    }

    pub fn contains(&self, name: &str) -> bool {
        self.names.contains(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.names.iter().map(String::as_str)
    }
}

/// Read-only wrapper around a host object.
#[derive(Clone)]
pub struct ReadOnlyView {
    object: Rc<dyn ScriptObject>,
    denied: Rc<DeniedMembers>,
}

impl ReadOnlyView {
    pub fn new(object: Rc<dyn ScriptObject>, denied: Rc<DeniedMembers>) -> Self {
        Self { object, denied }
    }

    pub fn type_name(&self) -> &str {
        self.object.type_name()
    }

    /// Reads an attribute. Denylisted and missing names fail identically.
    pub fn get(&self, name: &str) -> Result<Value, ScriptError> {
        let missing = || ScriptError::attribute_error(self.type_name(), name);

        if self.denied.contains(name) {
            return Err(missing());
        }
        let value = self.object.get_attr(name).ok_or_else(missing)?;
        self.seal(&value, 0)
    }

    pub fn same_object(&self, other: &ReadOnlyView) -> bool {
        std::ptr::addr_eq(Rc::as_ptr(&self.object), Rc::as_ptr(&other.object))
    }

    /// Copies containers and re-wraps nested objects so nothing handed to
    /// the script aliases host data.
    fn seal(&self, value: &Value, depth: usize) -> Result<Value, ScriptError> {
        if depth > MAX_VALUE_DEPTH {
            return Err(ScriptError::new(
                ErrorKind::ResourceExceeded,
                "context value is nested too deeply",
            ));
        }

        let sealed = match value {
            Value::Object(view) => Value::Object(ReadOnlyView {
                object: Rc::clone(&view.object),
                denied: Rc::clone(&self.denied),
            }),
            Value::List(items) => Value::list(self.seal_all(&items.borrow(), depth)?),
            Value::Set(items) => Value::Set(ListCell::shared(self.seal_all(&items.borrow(), depth)?)),
            Value::Tuple(items) => Value::tuple(self.seal_all(items, depth)?),
            Value::Dict(dict) => {
                let mut copy = Dict::new();
                for (key, item) in dict.borrow().iter() {
                    copy.insert(self.seal(key, depth + 1)?, self.seal(item, depth + 1)?);
                }
                Value::dict(copy)
            }
            Value::Method(_) => {
                return Err(ScriptError::type_error(
                    "context attributes may not be bound methods",
                ));
            }
            other => other.clone(),
        };
        Ok(sealed)
    }

    fn seal_all(&self, items: &[Value], depth: usize) -> Result<Vec<Value>, ScriptError> {
        items.iter().map(|item| self.seal(item, depth + 1)).collect()
    }
}

impl fmt::Debug for ReadOnlyView {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("ReadOnlyView")
            .field("type_name", &self.type_name())
            .finish_non_exhaustive()
    }
}

impl Value {
    /// Wraps a host object for use as an attribute value of another object.
    pub fn object(object: impl ScriptObject + 'static) -> Self {
        Value::Object(ReadOnlyView::new(Rc::new(object), Rc::new(DeniedMembers::none())))
    }
}

/// A host object backed by an ordered list of named fields.
#[derive(Debug, Clone, Default)]
pub struct Record {
    type_name: String,
    fields: Vec<(String, Value)>,
}

impl Record {
    pub fn new(type_name: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
            fields: Vec::new(),
        }
    }

    pub fn with(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.set(name, value);
        self
    }

    pub fn set(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        let name = name.into();
        let value = value.into();
        match self.fields.iter_mut().find(|(field, _)| *field == name) {
            Some((_, slot)) => *slot = value,
            None => self.fields.push((name, value)),
        }
    }

    pub fn fields(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.fields.iter().map(|(name, value)| (name.as_str(), value))
    }
}

impl ScriptObject for Record {
    fn type_name(&self) -> &str {
        &self.type_name
    }

    fn get_attr(&self, name: &str) -> Option<Value> {
        self.fields
            .iter()
            .find(|(field, _)| field == name)
            .map(|(_, value)| value.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn view(record: Record) -> ReadOnlyView {
        ReadOnlyView::new(Rc::new(record), Rc::new(DeniedMembers::default()))
    }

    #[test]
    fn denied_and_missing_attributes_fail_the_same_way() {
        let document = view(Record::new("Document").with("save", 1i64).with("version", 3i64));
        let denied = document.get("save").unwrap_err();
        let missing = document.get("nope").unwrap_err();
        assert_eq!(denied.kind, ErrorKind::AttributeError);
        assert_eq!(denied.message, "'Document' object has no attribute 'save'");
        assert_eq!(missing.message, "'Document' object has no attribute 'nope'");
        assert_eq!(document.get("version").unwrap(), Value::Int(3));
    }

    #[test]
    fn nested_objects_inherit_the_denylist() {
        let creator = Record::new("User").with("name", "Ann").with("delete", true);
        let document = view(Record::new("Document").with("creator", Value::object(creator)));
        let Value::Object(creator) = document.get("creator").unwrap() else {
            panic!("expected object");
        };
        assert!(creator.get("delete").is_err());
        assert_eq!(creator.get("name").unwrap(), Value::str("Ann"));
    }

    #[test]
    fn containers_are_detached_copies() {
        let document = view(Record::new("Document").with("tags", vec![Value::str("a")]));
        let Value::List(first) = document.get("tags").unwrap() else {
            panic!("expected list");
        };
        first.borrow_mut().push(Value::str("b"));
        let Value::List(second) = document.get("tags").unwrap() else {
            panic!("expected list");
        };
        assert_eq!(second.borrow().len(), 1);
    }

    #[test]
    fn custom_denylist() {
        let denied = DeniedMembers::none().with("secret");
        let record = ReadOnlyView::new(
            Rc::new(Record::new("Vault").with("secret", 1i64).with("save", 2i64)),
            Rc::new(denied),
        );
        assert!(record.get("secret").is_err());
        assert_eq!(record.get("save").unwrap(), Value::Int(2));
    }

    #[test]
    fn setting_a_field_twice_keeps_its_position() {
        let mut record = Record::new("Order").with("id", 1i64).with("state", "open");
        record.set("id", 2i64);
        let fields: Vec<(&str, &Value)> = record.fields().collect();
        assert_eq!(fields, vec![("id", &Value::Int(2)), ("state", &Value::str("open"))]);
    }
}
