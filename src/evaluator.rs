use crate::ast::{BinaryOp, Expr, FStringPart, LogicalOp, Program, Stmt, Target};
use crate::builtins::{self, Keywords};
use crate::environment::Environment;
use crate::error::{ErrorKind, ScriptError};
use crate::format;
use crate::methods;
use crate::operators;
use crate::options::ExecutionOptions;
use crate::value::{Dict, Value};
use tracing::{debug, trace, warn};

/// How a statement finished, for loop control.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    Normal,
    Break,
    Continue,
}

/// Tree-walking interpreter for one run of a validated program.
pub struct Evaluator<'g> {
    environment: Environment<'g>,
    limits: ExecutionOptions,
    iterations: usize,
}

impl<'g> Evaluator<'g> {
    pub fn new(environment: Environment<'g>, limits: ExecutionOptions) -> Self {
        Self {
            environment,
            limits,
            iterations: 0,
        }
    }

    /// Runs every statement; the first failure stops the run.
    ///
    /// `exit()` ends the run early without an error.
    pub fn evaluate_program(&mut self, program: &Program) -> Result<(), ScriptError> {
        for statement in &program.statements {
            match self.execute_statement(statement) {
                Ok(_) => {}
                Err(error) if error.kind == ErrorKind::SystemExit => {
                    debug!(line = error.line(), "script called exit()");
                    return Ok(());
                }
                Err(error) => return Err(error),
            }
        }
        Ok(())
    }

    pub fn iterations(&self) -> usize {
        self.iterations
    }

    pub fn into_result(self) -> Value {
        self.environment.into_result()
    }

    fn execute_statement(&mut self, stmt: &Stmt) -> Result<Flow, ScriptError> {
        self.execute(stmt).map_err(|error| error.at(stmt.span()))
    }

    fn execute(&mut self, stmt: &Stmt) -> Result<Flow, ScriptError> {
        match stmt {
            Stmt::Expression { expr, .. } => {
                self.evaluate_expression(expr)?;
            }
            Stmt::Assign { targets, value, .. } => {
                let value = self.evaluate_expression(value)?;
                for target in targets {
                    self.assign_target(target, value.clone())?;
                }
            }
            Stmt::AugAssign {
                target,
                operator,
                value,
                ..
            } => self.execute_aug_assign(target, *operator, value)?,
            Stmt::Pass { .. } => {}
            Stmt::Break { .. } => return Ok(Flow::Break),
            Stmt::Continue { .. } => return Ok(Flow::Continue),
            Stmt::If { branches, else_branch, .. } => {
                for branch in branches {
                    if self.evaluate_expression(&branch.condition)?.is_truthy() {
                        return self.execute_block(&branch.body);
                    }
                }
                return self.execute_block(else_branch);
            }
            Stmt::While {
                condition,
                body,
                orelse,
                ..
            } => {
                let mut broke = false;
                while self.evaluate_expression(condition)?.is_truthy() {
                    self.tick()?;
                    if self.execute_block(body)? == Flow::Break {
                        broke = true;
                        break;
                    }
                }
                if !broke {
                    return self.execute_block(orelse);
                }
            }
            Stmt::For {
                target,
                iterable,
                body,
                orelse,
                ..
            } => {
                let iterable = self.evaluate_expression(iterable)?;
                let mut broke = false;
                // Ranges are walked lazily; everything else is a snapshot.
                let items: Box<dyn Iterator<Item = Value> + '_> = match &iterable {
                    Value::Range(range) => Box::new(range.iter().map(Value::Int)),
                    other => Box::new(builtins::iterate(other, &self.limits)?.into_iter()),
                };
                for item in items {
                    self.tick()?;
                    self.assign_target(target, item)?;
                    if self.execute_block(body)? == Flow::Break {
                        broke = true;
                        break;
                    }
                }
                if !broke {
                    return self.execute_block(orelse);
                }
            }
            Stmt::Unsupported { kind, span } => {
                return Err(ScriptError::new(
                    ErrorKind::Disallowed,
                    format!("`{}` is recognised but cannot be evaluated", kind),
                )
                .at(span));
            }
        }
        Ok(Flow::Normal)
    }

    fn execute_block(&mut self, statements: &[Stmt]) -> Result<Flow, ScriptError> {
        for statement in statements {
            match self.execute_statement(statement)? {
                Flow::Normal => {}
                flow => return Ok(flow),
            }
        }
        Ok(Flow::Normal)
    }

    fn tick(&mut self) -> Result<(), ScriptError> {
        self.iterations += 1;
        if let Some(max) = self.limits.max_iterations {
            if self.iterations > max {
                warn!(budget = max, "loop iteration budget exhausted");
                return Err(ScriptError::new(
                    ErrorKind::ResourceExceeded,
                    format!("loop iteration budget of {} exceeded", max),
                ));
            }
        }
        trace!(iteration = self.iterations, "loop iteration");
        Ok(())
    }

    fn execute_aug_assign(&mut self, target: &Target, operator: BinaryOp, value: &Expr) -> Result<(), ScriptError> {
        match target {
            Target::Name { name, .. } => {
                let current = self.environment.get(name)?;
                let rhs = self.evaluate_expression(value)?;
                let updated = self.combine(operator, &current, &rhs)?;
                self.environment.assign(name, updated)
            }
            Target::Subscript { object, index, .. } => {
                let container = self.evaluate_expression(object)?;
                let index = self.evaluate_expression(index)?;
                let current = builtins::get_item(&container, &index)?;
                let rhs = self.evaluate_expression(value)?;
                let updated = self.combine(operator, &current, &rhs)?;
                builtins::set_item(&container, &index, updated)
            }
            Target::Attribute { object, name, .. } => {
                let owner = self.evaluate_expression(object)?;
                methods::get_attribute(&owner, name)?;
                Err(read_only_attribute(&owner, name))
            }
            Target::Tuple { span, .. } => Err(ScriptError::syntax(
                *span,
                "illegal expression for augmented assignment",
            )),
        }
    }

    /// `current op= rhs`; lists extend in place so aliases see the change.
    fn combine(&self, operator: BinaryOp, current: &Value, rhs: &Value) -> Result<Value, ScriptError> {
        if operator == BinaryOp::Add {
            if let Value::List(_) = current {
                let items = builtins::iterate(rhs, &self.limits)?;
                if let Some(extended) = operators::extend_in_place(current, items, &self.limits)? {
                    return Ok(extended);
                }
            }
        }
        operators::binary(operator, current, rhs, &self.limits)
    }

    fn assign_target(&mut self, target: &Target, value: Value) -> Result<(), ScriptError> {
        match target {
            Target::Name { name, span } => self.environment.assign(name, value).map_err(|error| error.at(span)),
            Target::Tuple { elements, span } => {
                let items = match &value {
                    Value::List(_) | Value::Tuple(_) | Value::Str(_) | Value::Set(_) | Value::Dict(_) | Value::Range(_) => {
                        builtins::iterate(&value, &self.limits)?
                    }
                    other => {
                        return Err(ScriptError::type_error(format!(
                            "cannot unpack non-iterable {} object",
                            other.type_name()
                        ))
                        .at(span));
                    }
                };
                if items.len() < elements.len() {
                    return Err(ScriptError::value_error(format!(
                        "not enough values to unpack (expected {}, got {})",
                        elements.len(),
                        items.len()
                    ))
                    .at(span));
                }
                if items.len() > elements.len() {
                    return Err(ScriptError::value_error(format!(
                        "too many values to unpack (expected {})",
                        elements.len()
                    ))
                    .at(span));
                }
                for (element, item) in elements.iter().zip(items) {
                    self.assign_target(element, item)?;
                }
                Ok(())
            }
            Target::Attribute { object, name, span } => {
                let owner = self.evaluate_expression(object)?;
                Err(read_only_attribute(&owner, name).at(span))
            }
            Target::Subscript { object, index, span } => {
                let container = self.evaluate_expression(object)?;
                let index = self.evaluate_expression(index)?;
                builtins::set_item(&container, &index, value).map_err(|error| error.at(span))
            }
        }
    }

    pub fn evaluate_expression(&mut self, expr: &Expr) -> Result<Value, ScriptError> {
        self.evaluate(expr).map_err(|error| error.at(expr.span()))
    }

    fn evaluate(&mut self, expr: &Expr) -> Result<Value, ScriptError> {
        match expr {
            Expr::Literal { value, .. } => Ok(value.clone()),
            Expr::Variable { name, .. } => self.environment.get(name),
            Expr::FString { parts, .. } => self.evaluate_fstring(parts),
            Expr::Binary {
                left,
                operator,
                right,
                ..
            } => {
                let left = self.evaluate_expression(left)?;
                let right = self.evaluate_expression(right)?;
                operators::binary(*operator, &left, &right, &self.limits)
            }
            Expr::Unary { operator, operand, .. } => {
                let operand = self.evaluate_expression(operand)?;
                operators::unary(*operator, &operand)
            }
            Expr::Logical {
                left,
                operator,
                right,
                ..
            } => {
                let left = self.evaluate_expression(left)?;
                match operator {
                    LogicalOp::Or if left.is_truthy() => Ok(left),
                    LogicalOp::And if !left.is_truthy() => Ok(left),
                    _ => self.evaluate_expression(right),
                }
            }
            Expr::Compare {
                left,
                operators,
                comparators,
                ..
            } => {
                let mut left = self.evaluate_expression(left)?;
                for (operator, comparator) in operators.iter().zip(comparators) {
                    let right = self.evaluate_expression(comparator)?;
                    if !operators::compare(*operator, &left, &right)? {
                        return Ok(Value::Bool(false));
                    }
                    left = right;
                }
                Ok(Value::Bool(true))
            }
            Expr::Ternary {
                condition,
                then_expr,
                else_expr,
                ..
            } => {
                if self.evaluate_expression(condition)?.is_truthy() {
                    self.evaluate_expression(then_expr)
                } else {
                    self.evaluate_expression(else_expr)
                }
            }
            Expr::Call {
                callee,
                args,
                keywords,
                ..
            } => {
                let callee = self.evaluate_expression(callee)?;
                let args = args
                    .iter()
                    .map(|arg| self.evaluate_expression(arg))
                    .collect::<Result<Vec<_>, _>>()?;
                let mut kwargs: Keywords = Vec::with_capacity(keywords.len());
                for keyword in keywords {
                    let value = self.evaluate_expression(&keyword.value)?;
                    kwargs.push((keyword.name.clone(), value));
                }
                builtins::call(&callee, args, kwargs, &self.limits)
            }
            Expr::Attribute { object, name, .. } => {
                let object = self.evaluate_expression(object)?;
                methods::get_attribute(&object, name)
            }
            Expr::Subscript { object, index, .. } => {
                let container = self.evaluate_expression(object)?;
                if let Expr::Slice { lower, upper, step, .. } = index.as_ref() {
                    let lower = self.evaluate_bound(lower)?;
                    let upper = self.evaluate_bound(upper)?;
                    let step = self.evaluate_bound(step)?;
                    return builtins::slice(&container, &lower, &upper, &step);
                }
                let index = self.evaluate_expression(index)?;
                builtins::get_item(&container, &index)
            }
            Expr::Slice { .. } => Err(ScriptError::type_error("slice used outside a subscript")),
            Expr::List { elements, .. } => Ok(Value::list(self.evaluate_all(elements)?)),
            Expr::Tuple { elements, .. } => Ok(Value::tuple(self.evaluate_all(elements)?)),
            Expr::Set { elements, .. } => Value::set(self.evaluate_all(elements)?),
            Expr::Dict { pairs, .. } => {
                let mut dict = Dict::new();
                for (key, value) in pairs {
                    let key = self.evaluate_expression(key)?;
                    key.check_hashable()?;
                    let value = self.evaluate_expression(value)?;
                    dict.insert(key, value);
                }
                Ok(Value::dict(dict))
            }
            Expr::Unsupported { kind, .. } => Err(ScriptError::new(
                ErrorKind::Disallowed,
                format!("`{}` is recognised but cannot be evaluated", kind),
            )),
        }
    }

    fn evaluate_all(&mut self, elements: &[Expr]) -> Result<Vec<Value>, ScriptError> {
        elements.iter().map(|element| self.evaluate_expression(element)).collect()
    }

    fn evaluate_bound(&mut self, bound: &Option<Box<Expr>>) -> Result<Value, ScriptError> {
        match bound {
            Some(expr) => self.evaluate_expression(expr),
            None => Ok(Value::None),
        }
    }

    fn evaluate_fstring(&mut self, parts: &[FStringPart]) -> Result<Value, ScriptError> {
        let mut text = String::new();
        for part in parts {
            match part {
                FStringPart::Literal(literal) => text.push_str(literal),
                FStringPart::Formatted {
                    expr,
                    conversion,
                    format_spec,
                    debug_text,
                    span,
                } => {
                    let value = self.evaluate_expression(expr)?;
                    if let Some(echo) = debug_text {
                        text.push_str(echo);
                    }
                    // `{x=}` shows the repr unless a spec or conversion says otherwise.
                    let conversion = conversion.or((debug_text.is_some() && format_spec.is_none()).then_some('r'));
                    let value = format::convert(value, conversion);
                    let formatted = format::format_value(&value, format_spec.as_deref().unwrap_or(""), &self.limits)
                        .map_err(|error| error.at(span))?;
                    text.push_str(&formatted);
                }
            }
            self.limits.check_len(text.len())?;
        }
        Ok(Value::from(text))
    }
}

fn read_only_attribute(owner: &Value, name: &str) -> ScriptError {
    ScriptError::new(
        ErrorKind::AttributeError,
        format!("'{}' object attribute '{}' is read-only", owner.type_name(), name),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::environment::{Globals, Inputs};
    use crate::object::{DeniedMembers, ReadOnlyView, Record};
    use crate::parser::parse;
    use pretty_assertions::assert_eq;
    use std::rc::Rc;

    fn run_with(source: &str, limits: ExecutionOptions) -> Result<Value, ScriptError> {
        let program = parse(source)?;
        let globals = Globals::default();
        let record = Record::new("Document")
            .with("title", "Report")
            .with("save", true)
            .with("amounts", vec![Value::Int(10), Value::Int(20)]);
        let context = ReadOnlyView::new(Rc::new(record), Rc::new(DeniedMembers::default()));
        let environment = Environment::new(context, &Inputs::type_object(7), &globals)?;
        let mut evaluator = Evaluator::new(environment, limits);
        evaluator.evaluate_program(&program)?;
        Ok(evaluator.into_result())
    }

    fn run(source: &str) -> Result<Value, ScriptError> {
        run_with(source, ExecutionOptions::default())
    }

    #[test]
    fn arithmetic_follows_python_rules() {
        assert_eq!(run("result = 7 // -2").unwrap(), Value::Int(-4));
        assert_eq!(run("result = -7 % 3").unwrap(), Value::Int(2));
        assert_eq!(run("result = 1 / 4").unwrap(), Value::Float(0.25));
        assert_eq!(run("result = 2 ** -1").unwrap(), Value::Float(0.5));
        assert_eq!(run("result = 'ab' * 2 + 'c'").unwrap(), Value::str("ababc"));
    }

    #[test]
    fn compound_assignment_reads_then_writes() {
        assert_eq!(run("a = 1\na += 1\nresult = a").unwrap(), Value::Int(2));
        let aliased = run("a = [1]\nb = a\nb += [2]\nresult = len(a)").unwrap();
        assert_eq!(aliased, Value::Int(2));
        let keyed = run("d = {'n': 1}\nd['n'] *= 5\nresult = d['n']").unwrap();
        assert_eq!(keyed, Value::Int(5));
    }

    #[test]
    fn unpacking_checks_arity() {
        assert_eq!(run("a, b = 1, 2\nresult = b - a").unwrap(), Value::Int(1));
        let error = run("a, b = [1, 2, 3]").unwrap_err();
        assert_eq!(error.message, "too many values to unpack (expected 2)");
        let error = run("a, b = 5").unwrap_err();
        assert_eq!(error.message, "cannot unpack non-iterable int object");
    }

    #[test]
    fn loops_run_in_order_and_honour_else() {
        assert_eq!(run("for i in range(3):\n    result = i").unwrap(), Value::Int(2));
        let source = "\
n = 0
while n < 10:
    n += 1
    if n == 4:
        break
else:
    n = -1
result = n";
        assert_eq!(run(source).unwrap(), Value::Int(4));
        let source = "\
total = 0
for c in 'abc':
    if c == 'b':
        continue
    total += 1
else:
    total += 10
result = total";
        assert_eq!(run(source).unwrap(), Value::Int(12));
    }

    #[test]
    fn comparison_chains_short_circuit() {
        assert_eq!(run("result = 1 < 2 < 3").unwrap(), Value::Bool(true));
        assert_eq!(run("result = 3 < 2 < 1 / 0").unwrap(), Value::Bool(false));
        assert_eq!(run("result = 0 or 'x'").unwrap(), Value::str("x"));
        assert_eq!(run("result = [] and 1 / 0").unwrap(), Value::list(vec![]));
    }

    #[test]
    fn context_is_read_only() {
        assert_eq!(run("result = object.title.upper()").unwrap(), Value::str("REPORT"));
        let denied = run("result = object.save").unwrap_err();
        let missing = run("result = object.nothing").unwrap_err();
        assert_eq!(denied.kind, missing.kind);
        assert_eq!(denied.message, "'Document' object has no attribute 'save'");

        let error = run("object.title = 'x'").unwrap_err();
        assert_eq!(error.message, "'Document' object attribute 'title' is read-only");
        let error = run("type_object = 1").unwrap_err();
        assert_eq!(error.kind, ErrorKind::ReservedName);

        let copied = run("amounts = object.amounts\namounts.append(1)\nresult = len(object.amounts)").unwrap();
        assert_eq!(copied, Value::Int(2));
    }

    #[test]
    fn fstrings_format_values() {
        assert_eq!(run("x = 3.14159\nresult = f'{x:.2f}'").unwrap(), Value::str("3.14"));
        assert_eq!(run("a = 'hi'\nresult = f'{a=}'").unwrap(), Value::str("a='hi'"));
        assert_eq!(run("result = f'{type_object:>3}|{type_object!r}'").unwrap(), Value::str("  7|7"));
    }

    #[test]
    fn exit_keeps_the_result() {
        assert_eq!(run("result = 1\nexit()\nresult = 2").unwrap(), Value::Int(1));
    }

    #[test]
    fn runaway_loops_hit_the_budget() {
        let limits = ExecutionOptions {
            max_iterations: Some(50),
            ..ExecutionOptions::default()
        };
        let error = run_with("while True:\n    pass", limits).unwrap_err();
        assert_eq!(error.kind, ErrorKind::ResourceExceeded);
        assert_eq!(error.line(), Some(1));
    }

    #[test]
    fn errors_point_at_the_failing_line() {
        let error = run("a = 1\nb = 0\nc = a / b\n").unwrap_err();
        assert_eq!(error.kind, ErrorKind::ZeroDivisionError);
        assert_eq!(error.line(), Some(3));
        let error = run("result = undefined_name").unwrap_err();
        assert_eq!(error.kind, ErrorKind::NameError);
    }

    #[test]
    fn recognised_only_constructs_never_run() {
        let error = run("f = lambda x: x").unwrap_err();
        assert_eq!(error.kind, ErrorKind::Disallowed);
        assert!(error.message.contains("Lambda"));
    }
}
