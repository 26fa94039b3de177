use crate::ast::NodeKind;
use crate::engine::Engine;
use crate::environment::Inputs;
use crate::error::Error;
use crate::object::Record;
use crate::options::EngineOptions;
use crate::validator::AllowedNodes;
use crate::value::Value;
use std::rc::Rc;

/// Compiles and runs `source` against `context`, printing `result = <repr>`
/// on success or a report on failure. Returns whether the script succeeded.
pub fn run(source: &str, filename: Option<&str>, context: Record, inputs: &Inputs, plain: bool) -> bool {
    match Engine::new().evaluate(source, Rc::new(context), inputs) {
        Ok(value) => {
            println!("result = {}", value.repr());
            true
        }
        Err(error) => {
            report(&error, source, filename, plain);
            false
        }
    }
}

/// Prints either the plain context-window diagnostic or an ariadne report.
pub fn report(error: &Error, source: &str, filename: Option<&str>, plain: bool) {
    if plain {
        eprintln!("{}", error);
        return;
    }
    match error {
        Error::Compile(error) => error.report(source, filename),
        Error::Runtime(error) => error.report(source, filename),
    }
}

/// Evaluates a single script expression such as `3`, `'text'` or
/// `Decimal('9.99')`, for building a context from the command line.
pub fn evaluate_literal(text: &str) -> Result<Value, Error> {
    let options = EngineOptions {
        allowed_nodes: AllowedNodes::default()
            .without(NodeKind::For)
            .without(NodeKind::While),
        ..EngineOptions::default()
    };
    Engine::with_options(options).evaluate(
        &format!("result = {}", text),
        Rc::new(Record::new("Context")),
        &Inputs::new(),
    )
}

/// Splits a `name=literal` command line argument.
pub fn parse_field(arg: &str) -> Result<(String, String), String> {
    let (name, literal) = arg
        .split_once('=')
        .ok_or_else(|| format!("expected NAME=LITERAL, got '{}'", arg))?;
    let name = name.trim();
    let is_identifier = name.chars().next().is_some_and(|c| c.is_alphabetic() || c == '_')
        && name.chars().all(|c| c.is_alphanumeric() || c == '_');
    if !is_identifier {
        return Err(format!("'{}' is not a valid attribute name", name));
    }
    Ok((name.to_string(), literal.to_string()))
}
