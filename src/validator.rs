//! Grammar allowlist enforcement.
//!
//! The validator is the only thing standing between the parser's full
//! grammar and the evaluator, so it visits every node, operators included,
//! and stops at the first kind the host has not admitted.

use crate::ast::{Expr, FStringPart, NodeKind, Program, Stmt, Target};
use crate::error::{ScriptError, Span};
use std::collections::BTreeSet;

const REFERENCE_KINDS: &[NodeKind] = &[
    NodeKind::Module,
    NodeKind::Expr,
    NodeKind::Assign,
    NodeKind::AugAssign,
    NodeKind::Pass,
    NodeKind::If,
    NodeKind::IfExp,
    NodeKind::For,
    NodeKind::While,
    NodeKind::BinOp,
    NodeKind::UnaryOp,
    NodeKind::BoolOp,
    NodeKind::Compare,
    NodeKind::Call,
    NodeKind::Attribute,
    NodeKind::Name,
    NodeKind::Constant,
    NodeKind::FString,
    NodeKind::FormattedValue,
    NodeKind::List,
    NodeKind::Tuple,
    NodeKind::Set,
    NodeKind::Dict,
    NodeKind::And,
    NodeKind::Or,
    NodeKind::Not,
    NodeKind::Gt,
    NodeKind::GtE,
    NodeKind::Lt,
    NodeKind::LtE,
    NodeKind::Eq,
    NodeKind::NotEq,
    NodeKind::Is,
    NodeKind::IsNot,
    NodeKind::In,
    NodeKind::NotIn,
    NodeKind::Add,
    NodeKind::Sub,
    NodeKind::Mult,
    NodeKind::Div,
    NodeKind::FloorDiv,
    NodeKind::Mod,
    NodeKind::Pow,
    NodeKind::USub,
    NodeKind::UAdd,
];

/// The set of syntax elements a script may contain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AllowedNodes {
    kinds: BTreeSet<NodeKind>,
}

impl Default for AllowedNodes {
    fn default() -> Self {
        Self::from_kinds(REFERENCE_KINDS.iter().copied())
    }
}

impl AllowedNodes {
    pub fn from_kinds(kinds: impl IntoIterator<Item = NodeKind>) -> Self {
        Self {
            kinds: kinds.into_iter().collect(),
        }
    }

    pub fn with(mut self, kind: NodeKind) -> Self {
        self.kinds.insert(kind);
        self
    }

    pub fn without(mut self, kind: NodeKind) -> Self {
        self.kinds.remove(&kind);
        self
    }

    pub fn contains(&self, kind: NodeKind) -> bool {
        self.kinds.contains(&kind)
    }

    pub fn iter(&self) -> impl Iterator<Item = NodeKind> + '_ {
        self.kinds.iter().copied()
    }
}

/// Checks every node of `program` against `allowed`, in source order.
pub fn validate(program: &Program, allowed: &AllowedNodes) -> Result<(), ScriptError> {
    let validator = Validator { allowed };
    let module_span = program
        .statements
        .first()
        .map_or_else(|| Span::single(0, 1), |stmt| *stmt.span());
    validator.check(NodeKind::Module, &module_span)?;
    validator.statements(&program.statements)
}

struct Validator<'a> {
    allowed: &'a AllowedNodes,
}

impl<'a> Validator<'a> {
    fn check(&self, kind: NodeKind, span: &Span) -> Result<(), ScriptError> {
        if self.allowed.contains(kind) {
            Ok(())
        } else {
            Err(ScriptError::disallowed(*span, kind))
        }
    }

    fn statements(&self, statements: &[Stmt]) -> Result<(), ScriptError> {
        statements.iter().try_for_each(|stmt| self.statement(stmt))
    }

    fn statement(&self, stmt: &Stmt) -> Result<(), ScriptError> {
        self.check(stmt.kind(), stmt.span())?;

        match stmt {
            Stmt::Expression { expr, .. } => self.expression(expr),
            Stmt::Assign { targets, value, .. } => {
                for target in targets {
                    self.target(target)?;
                }
                self.expression(value)
            }
            Stmt::AugAssign {
                target,
                operator,
                value,
                span,
            } => {
                self.target(target)?;
                self.check(operator.kind(), span)?;
                self.expression(value)
            }
            Stmt::If { branches, else_branch, .. } => {
                for branch in branches {
                    self.expression(&branch.condition)?;
                    self.statements(&branch.body)?;
                }
                self.statements(else_branch)
            }
            Stmt::While {
                condition,
                body,
                orelse,
                ..
            } => {
                self.expression(condition)?;
                self.statements(body)?;
                self.statements(orelse)
            }
            Stmt::For {
                target,
                iterable,
                body,
                orelse,
                ..
            } => {
                self.target(target)?;
                self.expression(iterable)?;
                self.statements(body)?;
                self.statements(orelse)
            }
            Stmt::Pass { .. } | Stmt::Break { .. } | Stmt::Continue { .. } | Stmt::Unsupported { .. } => Ok(()),
        }
    }

    fn target(&self, target: &Target) -> Result<(), ScriptError> {
        self.check(target.kind(), target.span())?;

        match target {
            Target::Name { .. } => Ok(()),
            Target::Tuple { elements, .. } => elements.iter().try_for_each(|element| self.target(element)),
            Target::Attribute { object, .. } => self.expression(object),
            Target::Subscript { object, index, .. } => {
                self.expression(object)?;
                self.expression(index)
            }
        }
    }

    fn expression(&self, expr: &Expr) -> Result<(), ScriptError> {
        self.check(expr.kind(), expr.span())?;

        match expr {
            Expr::Literal { .. } | Expr::Variable { .. } => Ok(()),
            Expr::FString { parts, span } => {
                for part in parts {
                    match part {
                        FStringPart::Literal(_) => self.check(NodeKind::Constant, span)?,
                        FStringPart::Formatted {
                            expr,
                            format_spec,
                            span,
                            ..
                        } => {
                            self.check(NodeKind::FormattedValue, span)?;
                            self.expression(expr)?;
                            if format_spec.is_some() {
                                self.check(NodeKind::FString, span)?;
                                self.check(NodeKind::Constant, span)?;
                            }
                        }
                    }
                }
                Ok(())
            }
            Expr::Binary {
                left,
                operator,
                right,
                span,
            } => {
                self.expression(left)?;
                self.check(operator.kind(), span)?;
                self.expression(right)
            }
            Expr::Unary { operator, operand, span } => {
                self.check(operator.kind(), span)?;
                self.expression(operand)
            }
            Expr::Logical {
                left,
                operator,
                right,
                span,
            } => {
                self.check(operator.kind(), span)?;
                self.expression(left)?;
                self.expression(right)
            }
            Expr::Compare {
                left,
                operators,
                comparators,
                span,
            } => {
                self.expression(left)?;
                for operator in operators {
                    self.check(operator.kind(), span)?;
                }
                comparators.iter().try_for_each(|comparator| self.expression(comparator))
            }
            Expr::Ternary {
                condition,
                then_expr,
                else_expr,
                ..
            } => {
                self.expression(condition)?;
                self.expression(then_expr)?;
                self.expression(else_expr)
            }
            Expr::Call {
                callee,
                args,
                keywords,
                ..
            } => {
                self.expression(callee)?;
                for arg in args {
                    self.expression(arg)?;
                }
                for keyword in keywords {
                    self.check(NodeKind::Keyword, &keyword.span)?;
                    self.expression(&keyword.value)?;
                }
                Ok(())
            }
            Expr::Attribute { object, .. } => self.expression(object),
            Expr::Subscript { object, index, .. } => {
                self.expression(object)?;
                self.expression(index)
            }
            Expr::Slice { lower, upper, step, .. } => [lower, upper, step]
                .into_iter()
                .flatten()
                .try_for_each(|bound| self.expression(bound)),
            Expr::List { elements, .. } | Expr::Tuple { elements, .. } | Expr::Set { elements, .. } => {
                elements.iter().try_for_each(|element| self.expression(element))
            }
            Expr::Dict { pairs, .. } => pairs.iter().try_for_each(|(key, value)| {
                self.expression(key)?;
                self.expression(value)
            }),
            Expr::Unsupported { children, .. } => children.iter().try_for_each(|child| self.expression(child)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::parser::parse;
    use pretty_assertions::assert_eq;

    fn check(source: &str, allowed: &AllowedNodes) -> Result<(), ScriptError> {
        validate(&parse(source).unwrap(), allowed)
    }

    fn rejected_kind(source: &str) -> String {
        let error = check(source, &AllowedNodes::default()).unwrap_err();
        assert_eq!(error.kind, ErrorKind::Disallowed);
        error.message
    }

    #[test]
    fn reference_allowlist_accepts_the_core_language() {
        let source = "\
total = 0
for n in [1, 2, 3]:
    if n % 2 == 0 and not n is None:
        total += n ** 2
    else:
        pass
label = f'{total:>4}' if total > 0 else str(-total)
result = {'total': total, 'label': label, 'tags': {1, 2}, 'pair': (1, 2.5)}
";
        assert!(check(source, &AllowedNodes::default()).is_ok());
    }

    #[test]
    fn rejected_constructs_are_named() {
        let cases = [
            ("import os", "Import"),
            ("def f():\n    pass", "FunctionDef"),
            ("f = lambda x: x", "Lambda"),
            ("try:\n    pass\nexcept:\n    pass", "Try"),
            ("x = [1][0]", "Subscript"),
            ("x = sorted([1], reverse=True)", "Keyword"),
            ("for i in [1]:\n    break", "Break"),
            ("x = [i for i in [1]]", "Comprehension"),
            ("x = 1 ^ 2", "BitXor"),
            ("x = ~1", "Invert"),
            ("x |= 1", "BitOr"),
        ];
        for (source, kind) in cases {
            assert_eq!(rejected_kind(source), format!("disallowed syntax element `{}`", kind), "{}", source);
        }
    }

    #[test]
    fn first_violation_in_source_order_wins() {
        let error = check("x = 1\ny = 2 & 3\nimport os", &AllowedNodes::default()).unwrap_err();
        assert!(error.message.contains("BitAnd"));
        assert_eq!(error.line(), Some(2));
    }

    #[test]
    fn hosts_can_narrow_and_widen_the_set() {
        let narrow = AllowedNodes::default().without(NodeKind::While);
        let error = check("while False:\n    pass", &narrow).unwrap_err();
        assert!(error.message.contains("While"));

        let wide = AllowedNodes::default().with(NodeKind::Subscript).with(NodeKind::Slice);
        assert!(check("x = [1, 2, 3][1:]", &wide).is_ok());
        assert!(!wide.contains(NodeKind::Import));
    }

    #[test]
    fn empty_allowlist_rejects_the_module() {
        let error = check("x = 1", &AllowedNodes::from_kinds([])).unwrap_err();
        assert!(error.message.contains("Module"));
    }
}
