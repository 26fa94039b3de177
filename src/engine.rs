//! Host-facing entry points: compile once, run against any context.

use crate::ast::Program;
use crate::diagnostic::SourceText;
use crate::environment::{Environment, Inputs};
use crate::error::{CompileError, Error, RuntimeError, ScriptError};
use crate::evaluator::Evaluator;
use crate::object::{ReadOnlyView, ScriptObject};
use crate::options::EngineOptions;
use crate::parser::parse;
use crate::validator::validate;
use crate::value::Value;
use std::rc::Rc;
use tracing::debug;

/// Compiles scripts under one fixed configuration.
///
/// # Example
///
/// ```
/// use sbx::{Engine, Inputs, Record, Value};
/// use std::rc::Rc;
///
/// let engine = Engine::new();
/// let script = engine.compile("result = object.total * 2").unwrap();
/// let context = Rc::new(Record::new("Invoice").with("total", 21i64));
/// assert_eq!(script.run(context, &Inputs::new()).unwrap(), Value::Int(42));
/// ```
#[derive(Debug, Clone, Default)]
pub struct Engine {
    options: Rc<EngineOptions>,
}

impl Engine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_options(options: EngineOptions) -> Self {
        Self {
            options: Rc::new(options),
        }
    }

    pub fn options(&self) -> &EngineOptions {
        &self.options
    }

    /// Parses and validates `source`.
    ///
    /// Fails on empty input, on a syntax error, or on the first syntax
    /// element outside the allowlist.
    pub fn compile(&self, source: &str) -> Result<CompiledScript, CompileError> {
        if source.is_empty() {
            return Err(CompileError::new(
                ScriptError::invalid_input("script source is empty"),
                None,
            ));
        }

        let text = SourceText::new(source);
        let program = parse(source).map_err(|error| CompileError::new(error, Some(&text)))?;
        validate(&program, &self.options.allowed_nodes).map_err(|error| CompileError::new(error, Some(&text)))?;

        debug!(
            statements = program.statements.len(),
            lines = text.line_count(),
            "script compiled"
        );
        Ok(CompiledScript {
            source: text,
            program,
            options: Rc::clone(&self.options),
        })
    }

    /// Like [`compile`](Self::compile) for raw bytes; anything that is not
    /// UTF-8 is rejected before parsing.
    pub fn compile_bytes(&self, source: &[u8]) -> Result<CompiledScript, CompileError> {
        let text = std::str::from_utf8(source).map_err(|error| {
            CompileError::new(
                ScriptError::invalid_input(format!("non-text input: {}", error)),
                None,
            )
        })?;
        self.compile(text)
    }

    /// Compiles and runs in one step.
    pub fn evaluate(&self, source: &str, context: Rc<dyn ScriptObject>, inputs: &Inputs) -> Result<Value, Error> {
        let script = self.compile(source)?;
        Ok(script.run(context, inputs)?)
    }
}

/// A validated program plus the source lines needed for diagnostics.
#[derive(Debug, Clone)]
pub struct CompiledScript {
    source: SourceText,
    program: Program,
    options: Rc<EngineOptions>,
}

impl CompiledScript {
    pub fn source(&self) -> &SourceText {
        &self.source
    }

    /// Runs the script in a fresh environment and returns the value left in
    /// `result` (`None` if the script never set it).
    pub fn run(&self, context: Rc<dyn ScriptObject>, inputs: &Inputs) -> Result<Value, RuntimeError> {
        let fail = |error: ScriptError| RuntimeError::new(error, Some(&self.source));

        let view = ReadOnlyView::new(context, Rc::new(self.options.denied_members.clone()));
        let environment = Environment::new(view, inputs, &self.options.globals).map_err(fail)?;
        let mut evaluator = Evaluator::new(environment, self.options.execution);

        let outcome = evaluator.evaluate_program(&self.program);
        debug!(
            iterations = evaluator.iterations(),
            failed = outcome.is_err(),
            "script finished"
        );
        outcome.map_err(fail)?;
        Ok(evaluator.into_result())
    }
}

/// A stateful wrapper holding one context and at most one compiled script.
///
/// A failed `compile` keeps the previously compiled script.
#[derive(Debug)]
pub struct Sandbox {
    engine: Engine,
    context: Rc<dyn ScriptObject>,
    inputs: Inputs,
    script: Option<CompiledScript>,
}

impl Sandbox {
    pub fn new(engine: Engine, context: Rc<dyn ScriptObject>, inputs: Inputs) -> Self {
        Self {
            engine,
            context,
            inputs,
            script: None,
        }
    }

    pub fn compile(&mut self, source: &str) -> Result<(), CompileError> {
        self.script = Some(self.engine.compile(source)?);
        Ok(())
    }

    pub fn run(&mut self) -> Result<Value, RuntimeError> {
        let script = self.script.as_ref().ok_or_else(|| {
            RuntimeError::new(
                ScriptError::invalid_input("run() called before a successful compile()"),
                None,
            )
        })?;
        script.run(Rc::clone(&self.context), &self.inputs)
    }

    pub fn script(&self) -> Option<&CompiledScript> {
        self.script.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::object::Record;
    use pretty_assertions::assert_eq;

    fn document() -> Rc<dyn ScriptObject> {
        Rc::new(Record::new("Document").with("pages", 3i64))
    }

    #[test]
    fn empty_and_binary_input_fail_before_parsing() {
        let engine = Engine::new();
        let error = engine.compile("").unwrap_err();
        assert_eq!(error.kind(), ErrorKind::InvalidInput);
        assert_eq!(error.line(), None);

        let error = engine.compile_bytes(&[0x66, 0xff, 0xfe]).unwrap_err();
        assert_eq!(error.kind(), ErrorKind::InvalidInput);
        assert!(error.message().starts_with("non-text input"));
    }

    #[test]
    fn sandbox_requires_a_compiled_script() {
        let mut sandbox = Sandbox::new(Engine::new(), document(), Inputs::type_object(1));
        let error = sandbox.run().unwrap_err();
        assert_eq!(error.kind(), ErrorKind::InvalidInput);

        sandbox.compile("result = object.pages + type_object").unwrap();
        assert_eq!(sandbox.run().unwrap(), Value::Int(4));

        assert!(sandbox.compile("import os").is_err());
        assert_eq!(sandbox.run().unwrap(), Value::Int(4));
    }

    #[test]
    fn each_run_starts_from_a_clean_scope() {
        let script = Engine::new()
            .compile("items = [1]\nitems.append(2)\nresult = len(items)")
            .unwrap();
        for _ in 0..2 {
            assert_eq!(script.run(document(), &Inputs::new()).unwrap(), Value::Int(2));
        }
    }

    #[test]
    fn runtime_failures_carry_a_context_window() {
        let source = "a = 1\nb = 2\nc = 3\nd = 0\ne = a / d\nf = 5\ng = 6\nh = 7\ni = 8\nj = 9";
        let script = Engine::new().compile(source).unwrap();
        let error = script.run(document(), &Inputs::new()).unwrap_err();
        assert_eq!(error.kind(), ErrorKind::ZeroDivisionError);
        let numbers: Vec<usize> = error.diagnostic().window().iter().map(|line| line.number).collect();
        assert_eq!(numbers, vec![4, 5, 6]);
        assert!(error.to_string().contains(">>>    5. e = a / d"));
    }
}
