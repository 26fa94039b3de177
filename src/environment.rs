use crate::builtins::Builtin;
use crate::error::{ErrorKind, ScriptError};
use crate::object::ReadOnlyView;
use crate::value::{TypeKind, Value};
use std::collections::{BTreeMap, HashMap};

/// Name of the output slot a script writes its answer to.
pub const RESULT_NAME: &str = "result";
/// Name the context object is bound to.
pub const CONTEXT_NAME: &str = "object";
/// Name of the integer input the reference host injects.
pub const TYPE_OBJECT_NAME: &str = "type_object";

/// Builtin names visible to every script.
#[derive(Debug, Clone)]
pub struct Globals {
    entries: BTreeMap<String, Value>,
}

impl Default for Globals {
    fn default() -> Self {
        let types = [
            TypeKind::Type,
            TypeKind::Bool,
            TypeKind::Int,
            TypeKind::Float,
            TypeKind::Decimal,
            TypeKind::Str,
            TypeKind::List,
            TypeKind::Tuple,
            TypeKind::Set,
            TypeKind::Dict,
            TypeKind::Date,
            TypeKind::DateTime,
            TypeKind::Range,
        ];
        let entries = types
            .into_iter()
            .map(|kind| (kind.name().to_string(), Value::Type(kind)))
            .chain(
                Builtin::ALL
                    .iter()
                    .map(|builtin| (builtin.name().to_string(), Value::Builtin(*builtin))),
            )
            .collect();
        Self { entries }
    }
}

impl Globals {
    /// Removes a name from the set; hosts can only narrow it.
    pub fn without(mut self, name: &str) -> Self {
        self.entries.remove(name);
        self
    }

    /// Keeps only the default globals whose names are listed.
    pub fn only<'a>(names: impl IntoIterator<Item = &'a str>) -> Self {
        let defaults = Self::default();
        let entries = names
            .into_iter()
            .filter_map(|name| {
                defaults
                    .entries
                    .get(name)
                    .map(|value| (name.to_string(), value.clone()))
            })
            .collect();
        Self { entries }
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.entries.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }
}

/// Read-only names injected next to the context object.
#[derive(Debug, Clone, Default)]
pub struct Inputs {
    values: Vec<(String, Value)>,
}

impl Inputs {
    pub fn new() -> Self {
        Self::default()
    }

    /// The reference host's inputs: just `type_object`.
    pub fn type_object(type_object: i64) -> Self {
        Self::new().with(TYPE_OBJECT_NAME, type_object)
    }

    pub fn with(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.insert(name, value);
        self
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        let name = name.into();
        let value = value.into();
        match self.values.iter_mut().find(|(existing, _)| *existing == name) {
            Some((_, slot)) => *slot = value,
            None => self.values.push((name, value)),
        }
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.values
            .iter()
            .find(|(existing, _)| existing == name)
            .map(|(_, value)| value)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.values.iter().map(|(name, value)| (name.as_str(), value))
    }
}

/// Name resolution for one run.
///
/// Lookup order: the result slot, the working scope, the read-only locals
/// (context and inputs), then the globals. Assignment only ever writes the
/// working scope or the result slot.
#[derive(Debug)]
pub struct Environment<'g> {
    locals: HashMap<String, Value>,
    globals: &'g Globals,
    result: Value,
    scope: HashMap<String, Value>,
}

impl<'g> Environment<'g> {
    pub fn new(context: ReadOnlyView, inputs: &Inputs, globals: &'g Globals) -> Result<Self, ScriptError> {
        let mut locals = HashMap::new();
        locals.insert(CONTEXT_NAME.to_string(), Value::Object(context));

        for (name, value) in inputs.iter() {
            if name == RESULT_NAME || name == CONTEXT_NAME {
                return Err(ScriptError::invalid_input(format!(
                    "input name '{}' is reserved",
                    name
                )));
            }
            locals.insert(name.to_string(), value.clone());
        }

        Ok(Self {
            locals,
            globals,
            result: Value::None,
            scope: HashMap::new(),
        })
    }

    pub fn get(&self, name: &str) -> Result<Value, ScriptError> {
        if name == RESULT_NAME {
            return Ok(self.result.clone());
        }

        self.scope
            .get(name)
            .or_else(|| self.locals.get(name))
            .or_else(|| self.globals.get(name))
            .cloned()
            .ok_or_else(|| ScriptError::name_error(name))
    }

    pub fn assign(&mut self, name: &str, value: Value) -> Result<(), ScriptError> {
        if name == RESULT_NAME {
            self.result = value;
            return Ok(());
        }

        if self.locals.contains_key(name) {
            return Err(ScriptError::new(
                ErrorKind::ReservedName,
                format!("cannot rebind reserved name '{}'", name),
            ));
        }

        self.scope.insert(name.to_string(), value);
        Ok(())
    }

    pub fn into_result(self) -> Value {
        self.result
    }
}
