use crate::ast::{
    BinaryOp, CompareOp, Expr, FStringPart, IfBranch, KeywordArg, LogicalOp, NodeKind, Program, Stmt, Target, UnaryOp,
};
use crate::error::{ScriptError, Span};
use crate::lexer::{Lexer, Token, TokenType};
use crate::value::Value;

/// Deepest allowed nesting of blocks, brackets and operator chains.
pub const MAX_NESTING: usize = 128;

/// Lexes and parses a whole script.
pub fn parse(source: &str) -> Result<Program, ScriptError> {
    let tokens = Lexer::new(source).scan_tokens()?;
    Parser::new(tokens).parse()
}

pub struct Parser {
    tokens: Vec<Token>,
    current: usize,
    depth: usize,
    loop_depth: usize,
}

impl Parser {
    pub fn new(tokens: Vec<Token>) -> Self {
        Self {
            tokens,
            current: 0,
            depth: 0,
            loop_depth: 0,
        }
    }

    pub fn parse(&mut self) -> Result<Program, ScriptError> {
        let mut statements = Vec::new();

        while !self.is_at_end() {
            statements.extend(self.statement()?);
        }

        Ok(Program { statements })
    }

    // ------------------------------------------------------------------
    // Statements
    // ------------------------------------------------------------------

    fn statement(&mut self) -> Result<Vec<Stmt>, ScriptError> {
        match self.peek().token_type {
            TokenType::If => Ok(vec![self.if_statement()?]),
            TokenType::While => Ok(vec![self.while_statement()?]),
            TokenType::For => Ok(vec![self.for_statement()?]),
            TokenType::Def => Ok(vec![self.unsupported_block(NodeKind::FunctionDef)]),
            TokenType::Class => Ok(vec![self.unsupported_block(NodeKind::ClassDef)]),
            TokenType::Try | TokenType::Except | TokenType::Finally => {
                Ok(vec![self.unsupported_block(NodeKind::Try)])
            }
            TokenType::With => Ok(vec![self.unsupported_block(NodeKind::With)]),
            TokenType::Async => {
                let kind = match self.peek_next().map(|token| token.token_type) {
                    Some(TokenType::Def) => NodeKind::FunctionDef,
                    Some(TokenType::With) => NodeKind::With,
                    _ => NodeKind::Await,
                };
                Ok(vec![self.unsupported_block(kind)])
            }
            TokenType::Indent => Err(ScriptError::syntax(self.peek().span, "unexpected indent")),
            _ => self.simple_statements(),
        }
    }

    /// One or more `;`-separated simple statements ending the logical line.
    fn simple_statements(&mut self) -> Result<Vec<Stmt>, ScriptError> {
        let mut statements = vec![self.simple_statement()?];

        while self.match_types(&[TokenType::Semicolon]) {
            if self.check(&TokenType::Newline) || self.is_at_end() {
                break;
            }
            statements.push(self.simple_statement()?);
        }

        if !self.match_types(&[TokenType::Newline]) && !self.is_at_end() {
            let token = self.peek();
            return Err(ScriptError::syntax_with_help(
                token.span,
                format!("Expected end of statement, found '{}'", token.lexeme),
                "Put each statement on its own line or separate them with ';'.",
            ));
        }

        Ok(statements)
    }

    fn simple_statement(&mut self) -> Result<Stmt, ScriptError> {
        let token = self.peek().clone();
        match token.token_type {
            TokenType::Pass => {
                self.advance();
                Ok(Stmt::Pass { span: token.span })
            }
            TokenType::Break | TokenType::Continue => {
                self.advance();
                if self.loop_depth == 0 {
                    return Err(ScriptError::syntax(
                        token.span,
                        format!("'{}' outside loop", token.lexeme),
                    ));
                }
                if token.token_type == TokenType::Break {
                    Ok(Stmt::Break { span: token.span })
                } else {
                    Ok(Stmt::Continue { span: token.span })
                }
            }
            TokenType::Import | TokenType::From => Ok(self.unsupported_line(NodeKind::Import)),
            TokenType::Raise => Ok(self.unsupported_line(NodeKind::Raise)),
            TokenType::Return => Ok(self.unsupported_line(NodeKind::Return)),
            TokenType::Del => Ok(self.unsupported_line(NodeKind::Delete)),
            TokenType::Global | TokenType::Nonlocal => Ok(self.unsupported_line(NodeKind::Global)),
            TokenType::Assert => Ok(self.unsupported_line(NodeKind::Assert)),
            _ => self.expression_statement(),
        }
    }

    /// Records a rejected single-line statement and skips the rest of its line.
    fn unsupported_line(&mut self, kind: NodeKind) -> Stmt {
        let start = self.advance().span;
        while !self.check(&TokenType::Newline) && !self.is_at_end() {
            self.advance();
        }
        Stmt::Unsupported {
            kind,
            span: start.to(&self.previous().span),
        }
    }

    /// Records a rejected compound statement and skips its header and suite.
    fn unsupported_block(&mut self, kind: NodeKind) -> Stmt {
        let start = self.advance().span;
        while !self.check(&TokenType::Newline) && !self.is_at_end() {
            self.advance();
        }
        self.match_types(&[TokenType::Newline]);

        if self.match_types(&[TokenType::Indent]) {
            let mut depth = 1;
            while depth > 0 && !self.is_at_end() {
                match self.advance().token_type {
                    TokenType::Indent => depth += 1,
                    TokenType::Dedent => depth -= 1,
                    _ => {}
                }
            }
        }

        Stmt::Unsupported {
            kind,
            span: start.to(&self.previous().span),
        }
    }

    fn if_statement(&mut self) -> Result<Stmt, ScriptError> {
        let start = self.advance().span;
        let mut branches = vec![self.if_branch("if")?];
        while self.match_types(&[TokenType::Elif]) {
            branches.push(self.if_branch("elif")?);
        }

        let else_branch = if self.match_types(&[TokenType::Else]) {
            self.block("else")?
        } else {
            Vec::new()
        };

        Ok(Stmt::If {
            branches,
            else_branch,
            span: start.to(&self.previous().span),
        })
    }

    fn if_branch(&mut self, construct: &str) -> Result<IfBranch, ScriptError> {
        let condition = self.expression()?;
        let body = self.block(construct)?;
        Ok(IfBranch { condition, body })
    }

    fn while_statement(&mut self) -> Result<Stmt, ScriptError> {
        let start = self.advance().span;
        let condition = self.expression()?;

        self.loop_depth += 1;
        let body = self.block("while")?;
        self.loop_depth -= 1;

        let orelse = if self.match_types(&[TokenType::Else]) {
            self.block("else")?
        } else {
            Vec::new()
        };

        Ok(Stmt::While {
            condition,
            body,
            orelse,
            span: start.to(&self.previous().span),
        })
    }

    fn for_statement(&mut self) -> Result<Stmt, ScriptError> {
        let start = self.advance().span;
        let target = self.target_list()?;
        let target = self.to_target(target)?;
        self.consume_with_help(
            TokenType::In,
            "Expected 'in' after for-loop target",
            "For loops iterate over a sequence: for item in items:",
        )?;
        let iterable = self.star_expressions()?;

        self.loop_depth += 1;
        let body = self.block("for")?;
        self.loop_depth -= 1;

        let orelse = if self.match_types(&[TokenType::Else]) {
            self.block("else")?
        } else {
            Vec::new()
        };

        Ok(Stmt::For {
            target,
            iterable,
            body,
            orelse,
            span: start.to(&self.previous().span),
        })
    }

    /// `: NEWLINE INDENT statements DEDENT` or `: simple_statements`.
    fn block(&mut self, construct: &str) -> Result<Vec<Stmt>, ScriptError> {
        let header_line = self.previous().span.line;
        self.consume_with_help(
            TokenType::Colon,
            &format!("Expected ':' after '{}' header", construct),
            format!("Compound statements end their first line with a colon: {} ...:", construct),
        )?;
        self.enter()?;

        let statements = if self.match_types(&[TokenType::Newline]) {
            self.consume_with_help(
                TokenType::Indent,
                &format!("expected an indented block after '{}' statement on line {}", construct, header_line),
                "Indent the body of the block, or write 'pass' for an empty body.",
            )?;
            let mut statements = Vec::new();
            while !self.check(&TokenType::Dedent) && !self.is_at_end() {
                statements.extend(self.statement()?);
            }
            self.match_types(&[TokenType::Dedent]);
            statements
        } else {
            self.simple_statements()?
        };

        self.depth -= 1;
        Ok(statements)
    }

    fn expression_statement(&mut self) -> Result<Stmt, ScriptError> {
        let start = self.peek().span;
        let expr = self.star_expressions()?;

        if self.check(&TokenType::Equal) {
            let mut targets = Vec::new();
            let mut value = expr;
            while self.match_types(&[TokenType::Equal]) {
                if !self.starts_expression() {
                    return Err(self.missing_operand("="));
                }
                targets.push(self.to_target(value)?);
                value = self.star_expressions()?;
            }
            return Ok(Stmt::Assign {
                targets,
                value,
                span: start.to(&self.previous().span),
            });
        }

        if let Some(operator) = self.augmented_operator() {
            let operator_token = self.advance().clone();
            if matches!(expr, Expr::Tuple { .. } | Expr::List { .. }) {
                return Err(ScriptError::syntax(
                    *expr.span(),
                    "illegal expression for augmented assignment",
                ));
            }
            let target = self.to_target(expr)?;
            if !self.starts_expression() {
                return Err(self.missing_operand(&operator_token.lexeme));
            }
            let value = self.star_expressions()?;
            return Ok(Stmt::AugAssign {
                target,
                operator,
                value,
                span: start.to(&self.previous().span),
            });
        }

        Ok(Stmt::Expression {
            expr,
            span: start.to(&self.previous().span),
        })
    }

    fn augmented_operator(&self) -> Option<BinaryOp> {
        let operator = match self.peek().token_type {
            TokenType::PlusEqual => BinaryOp::Add,
            TokenType::MinusEqual => BinaryOp::Subtract,
            TokenType::StarEqual => BinaryOp::Multiply,
            TokenType::SlashEqual => BinaryOp::Divide,
            TokenType::DoubleSlashEqual => BinaryOp::FloorDivide,
            TokenType::PercentEqual => BinaryOp::Modulo,
            TokenType::DoubleStarEqual => BinaryOp::Power,
            TokenType::AtEqual => BinaryOp::MatMultiply,
            TokenType::AmpersandEqual => BinaryOp::BitAnd,
            TokenType::PipeEqual => BinaryOp::BitOr,
            TokenType::CaretEqual => BinaryOp::BitXor,
            TokenType::LeftShiftEqual => BinaryOp::LeftShift,
            TokenType::RightShiftEqual => BinaryOp::RightShift,
            _ => return None,
        };
        Some(operator)
    }

    fn to_target(&self, expr: Expr) -> Result<Target, ScriptError> {
        match expr {
            Expr::Variable { name, span } => Ok(Target::Name { name, span }),
            Expr::Tuple { elements, span } | Expr::List { elements, span } => {
                let elements = elements
                    .into_iter()
                    .map(|element| self.to_target(element))
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(Target::Tuple { elements, span })
            }
            Expr::Attribute { object, name, span } => Ok(Target::Attribute { object, name, span }),
            Expr::Subscript { object, index, span } => Ok(Target::Subscript { object, index, span }),
            other => Err(ScriptError::syntax_with_help(
                *other.span(),
                "Invalid assignment target",
                "Only names, tuples of names and attributes can be assigned to. Examples: 'x = 10' or 'a, b = pair'",
            )),
        }
    }

    /// Targets of a `for` loop or comprehension: stops before `in`.
    fn target_list(&mut self) -> Result<Expr, ScriptError> {
        let first = self.binary(0)?;
        if !self.check(&TokenType::Comma) {
            return Ok(first);
        }

        let start = *first.span();
        let mut elements = vec![first];
        while self.match_types(&[TokenType::Comma]) {
            if self.check(&TokenType::In) {
                break;
            }
            elements.push(self.binary(0)?);
        }
        Ok(Expr::Tuple {
            elements,
            span: start.to(&self.previous().span),
        })
    }

    // ------------------------------------------------------------------
    // Expressions
    // ------------------------------------------------------------------

    /// Comma separated expressions; more than one (or a trailing comma) forms a tuple.
    fn star_expressions(&mut self) -> Result<Expr, ScriptError> {
        let first = self.expression()?;
        if !self.check(&TokenType::Comma) {
            return Ok(first);
        }

        let start = *first.span();
        let mut elements = vec![first];
        while self.match_types(&[TokenType::Comma]) {
            if !self.starts_expression() {
                break;
            }
            elements.push(self.expression()?);
        }
        Ok(Expr::Tuple {
            elements,
            span: start.to(&self.previous().span),
        })
    }

    pub fn expression(&mut self) -> Result<Expr, ScriptError> {
        self.enter()?;
        let expr = self.expression_inner();
        self.depth -= 1;
        expr
    }

    fn expression_inner(&mut self) -> Result<Expr, ScriptError> {
        if self.check(&TokenType::Lambda) {
            return self.lambda();
        }
        if self.check(&TokenType::Yield) {
            let start = self.advance().span;
            self.match_types(&[TokenType::From]);
            let children = if self.starts_expression() {
                vec![self.star_expressions()?]
            } else {
                Vec::new()
            };
            return Ok(Expr::Unsupported {
                kind: NodeKind::Yield,
                children,
                span: start.to(&self.previous().span),
            });
        }
        if self.check(&TokenType::Star) {
            let start = self.advance().span;
            let operand = self.binary(0)?;
            return Ok(Expr::Unsupported {
                kind: NodeKind::Starred,
                span: start.to(operand.span()),
                children: vec![operand],
            });
        }

        let expr = self.disjunction()?;

        if self.match_types(&[TokenType::If]) {
            let condition = self.disjunction()?;
            self.consume_with_help(
                TokenType::Else,
                "Expected 'else' in conditional expression",
                "Conditional expressions need both branches: value if condition else other",
            )?;
            let else_expr = self.expression()?;
            return Ok(Expr::Ternary {
                span: expr.span().to(else_expr.span()),
                condition: Box::new(condition),
                then_expr: Box::new(expr),
                else_expr: Box::new(else_expr),
            });
        }

        if self.match_types(&[TokenType::Walrus]) {
            let value = self.expression()?;
            return Ok(Expr::Unsupported {
                kind: NodeKind::NamedExpr,
                span: expr.span().to(value.span()),
                children: vec![expr, value],
            });
        }

        Ok(expr)
    }

    fn lambda(&mut self) -> Result<Expr, ScriptError> {
        let start = self.advance().span;
        while !self.check(&TokenType::Colon) {
            if self.is_at_end() || self.check(&TokenType::Newline) {
                return Err(ScriptError::syntax(start, "invalid syntax: expected ':' in lambda"));
            }
            self.advance();
        }
        self.advance();
        let body = self.expression()?;
        Ok(Expr::Unsupported {
            kind: NodeKind::Lambda,
            span: start.to(body.span()),
            children: vec![body],
        })
    }

    fn disjunction(&mut self) -> Result<Expr, ScriptError> {
        self.logical(LogicalOp::Or)
    }

    fn logical(&mut self, operator: LogicalOp) -> Result<Expr, ScriptError> {
        let (token_type, operand): (TokenType, fn(&mut Self) -> Result<Expr, ScriptError>) = match operator {
            LogicalOp::Or => (TokenType::Or, |parser| parser.logical(LogicalOp::And)),
            LogicalOp::And => (TokenType::And, Self::inversion),
        };

        let mut expr = operand(self)?;
        let mut chain = 0;
        while self.match_types(&[token_type]) {
            let operator_token = self.previous().clone();
            self.grow_chain(&mut chain)?;
            if !self.starts_expression() {
                return Err(self.missing_operand(&operator_token.lexeme));
            }
            let right = operand(self)?;
            expr = Expr::Logical {
                span: expr.span().to(right.span()),
                left: Box::new(expr),
                operator,
                right: Box::new(right),
            };
        }

        Ok(expr)
    }

    fn inversion(&mut self) -> Result<Expr, ScriptError> {
        if self.match_types(&[TokenType::Not]) {
            let start = self.previous().span;
            self.enter()?;
            let operand = self.inversion();
            self.depth -= 1;
            let operand = operand?;
            return Ok(Expr::Unary {
                operator: UnaryOp::Not,
                span: start.to(operand.span()),
                operand: Box::new(operand),
            });
        }

        self.comparison()
    }

    fn comparison(&mut self) -> Result<Expr, ScriptError> {
        let left = self.binary(0)?;
        let mut operators = Vec::new();
        let mut comparators = Vec::new();

        loop {
            let operator = match self.peek().token_type {
                TokenType::EqualEqual => CompareOp::Equal,
                TokenType::BangEqual => CompareOp::NotEqual,
                TokenType::Less => CompareOp::Less,
                TokenType::LessEqual => CompareOp::LessEqual,
                TokenType::Greater => CompareOp::Greater,
                TokenType::GreaterEqual => CompareOp::GreaterEqual,
                TokenType::In => CompareOp::In,
                TokenType::Not if self.peek_next().is_some_and(|t| t.token_type == TokenType::In) => {
                    self.advance();
                    CompareOp::NotIn
                }
                TokenType::Is => {
                    if self.peek_next().is_some_and(|t| t.token_type == TokenType::Not) {
                        self.advance();
                        CompareOp::IsNot
                    } else {
                        CompareOp::Is
                    }
                }
                _ => break,
            };
            self.advance();

            let mut chain = comparators.len();
            self.grow_chain(&mut chain)?;
            if !self.starts_expression() {
                return Err(self.missing_operand(operator.symbol()));
            }
            operators.push(operator);
            comparators.push(self.binary(0)?);
        }

        match comparators.last() {
            None => Ok(left),
            Some(last) => Ok(Expr::Compare {
                span: left.span().to(last.span()),
                left: Box::new(left),
                operators,
                comparators,
            }),
        }
    }

    /// Binary operator at the current token with its binding power.
    fn binary_operator(&self) -> Option<(BinaryOp, u8)> {
        let operator = match self.peek().token_type {
            TokenType::Pipe => (BinaryOp::BitOr, 1),
            TokenType::Caret => (BinaryOp::BitXor, 2),
            TokenType::Ampersand => (BinaryOp::BitAnd, 3),
            TokenType::LeftShift => (BinaryOp::LeftShift, 4),
            TokenType::RightShift => (BinaryOp::RightShift, 4),
            TokenType::Plus => (BinaryOp::Add, 5),
            TokenType::Minus => (BinaryOp::Subtract, 5),
            TokenType::Star => (BinaryOp::Multiply, 6),
            TokenType::Slash => (BinaryOp::Divide, 6),
            TokenType::DoubleSlash => (BinaryOp::FloorDivide, 6),
            TokenType::Percent => (BinaryOp::Modulo, 6),
            TokenType::At => (BinaryOp::MatMultiply, 6),
            _ => return None,
        };
        Some(operator)
    }

    /// Left-associative binary operators by precedence climbing.
    fn binary(&mut self, min_precedence: u8) -> Result<Expr, ScriptError> {
        let mut expr = self.factor()?;
        let mut chain = 0;

        while let Some((operator, precedence)) = self.binary_operator() {
            if precedence < min_precedence {
                break;
            }
            let operator_token = self.advance().clone();
            self.grow_chain(&mut chain)?;
            if !self.starts_expression() {
                return Err(self.missing_operand(&operator_token.lexeme));
            }
            let right = self.binary(precedence + 1)?;
            expr = Expr::Binary {
                span: expr.span().to(right.span()),
                left: Box::new(expr),
                operator,
                right: Box::new(right),
            };
        }

        Ok(expr)
    }

    fn factor(&mut self) -> Result<Expr, ScriptError> {
        let operator = match self.peek().token_type {
            TokenType::Minus => UnaryOp::Negate,
            TokenType::Plus => UnaryOp::Plus,
            TokenType::Tilde => UnaryOp::Invert,
            _ => return self.power(),
        };
        let operator_token = self.advance().clone();
        if !self.starts_expression() {
            return Err(self.missing_operand(&operator_token.lexeme));
        }

        self.enter()?;
        let operand = self.factor();
        self.depth -= 1;
        let operand = operand?;
        Ok(Expr::Unary {
            operator,
            span: operator_token.span.to(operand.span()),
            operand: Box::new(operand),
        })
    }

    fn power(&mut self) -> Result<Expr, ScriptError> {
        let base = if self.check(&TokenType::Await) {
            let start = self.advance().span;
            let operand = self.primary()?;
            Expr::Unsupported {
                kind: NodeKind::Await,
                span: start.to(operand.span()),
                children: vec![operand],
            }
        } else {
            self.primary()?
        };

        if !self.match_types(&[TokenType::DoubleStar]) {
            return Ok(base);
        }
        if !self.starts_expression() {
            return Err(self.missing_operand("**"));
        }

        self.enter()?;
        let exponent = self.factor();
        self.depth -= 1;
        let exponent = exponent?;
        Ok(Expr::Binary {
            span: base.span().to(exponent.span()),
            left: Box::new(base),
            operator: BinaryOp::Power,
            right: Box::new(exponent),
        })
    }

    fn primary(&mut self) -> Result<Expr, ScriptError> {
        let mut expr = self.atom()?;
        let mut chain = 0;

        loop {
            if self.match_types(&[TokenType::LeftParen]) {
                self.grow_chain(&mut chain)?;
                expr = self.finish_call(expr)?;
            } else if self.match_types(&[TokenType::Dot]) {
                self.grow_chain(&mut chain)?;
                let name_token = self
                    .consume_with_help(
                        TokenType::Identifier,
                        "Expected attribute name after '.'",
                        "Attribute access looks like: object.name",
                    )?
                    .clone();
                expr = Expr::Attribute {
                    span: expr.span().to(&name_token.span),
                    object: Box::new(expr),
                    name: name_token.lexeme,
                };
            } else if self.match_types(&[TokenType::LeftBracket]) {
                self.grow_chain(&mut chain)?;
                let index = self.subscript_index()?;
                let end = self
                    .consume_with_help(
                        TokenType::RightBracket,
                        "Expected ']' after subscript",
                        "Subscripts look like: items[0]",
                    )?
                    .span;
                expr = Expr::Subscript {
                    span: expr.span().to(&end),
                    object: Box::new(expr),
                    index: Box::new(index),
                };
            } else {
                break;
            }
        }

        Ok(expr)
    }

    fn subscript_index(&mut self) -> Result<Expr, ScriptError> {
        let first = self.slice_item()?;
        if !self.check(&TokenType::Comma) {
            return Ok(first);
        }

        let start = *first.span();
        let mut elements = vec![first];
        while self.match_types(&[TokenType::Comma]) {
            if self.check(&TokenType::RightBracket) {
                break;
            }
            elements.push(self.slice_item()?);
        }
        Ok(Expr::Tuple {
            elements,
            span: start.to(&self.previous().span),
        })
    }

    fn slice_item(&mut self) -> Result<Expr, ScriptError> {
        let start = self.peek().span;
        let lower = if self.check(&TokenType::Colon) {
            None
        } else {
            Some(Box::new(self.expression()?))
        };

        if !self.match_types(&[TokenType::Colon]) {
            return match lower {
                Some(index) => Ok(*index),
                None => Err(self.missing_operand("[")),
            };
        }

        let upper = if self.starts_expression() {
            Some(Box::new(self.expression()?))
        } else {
            None
        };
        let step = if self.match_types(&[TokenType::Colon]) && self.starts_expression() {
            Some(Box::new(self.expression()?))
        } else {
            None
        };

        Ok(Expr::Slice {
            lower,
            upper,
            step,
            span: start.to(&self.previous().span),
        })
    }

    fn finish_call(&mut self, callee: Expr) -> Result<Expr, ScriptError> {
        let mut args = Vec::new();
        let mut keywords: Vec<KeywordArg> = Vec::new();

        while !self.check(&TokenType::RightParen) {
            if self.is_at_end() {
                return Err(ScriptError::syntax_with_help(
                    self.peek().span,
                    "Unexpected end of input in function call",
                    "Function calls must be closed with ')' after the arguments. Example: func(arg1, arg2)",
                ));
            }

            let is_keyword = self.check(&TokenType::Identifier)
                && self.peek_next().is_some_and(|token| token.token_type == TokenType::Equal);

            if is_keyword {
                let name_token = self.advance().clone();
                self.advance();
                let value = self.expression()?;
                keywords.push(KeywordArg {
                    name: name_token.lexeme,
                    span: name_token.span.to(value.span()),
                    value,
                });
            } else if self.check(&TokenType::DoubleStar) {
                let start = self.advance().span;
                let operand = self.expression()?;
                args.push(Expr::Unsupported {
                    kind: NodeKind::Starred,
                    span: start.to(operand.span()),
                    children: vec![operand],
                });
            } else {
                if !keywords.is_empty() {
                    return Err(ScriptError::syntax_with_help(
                        self.peek().span,
                        "Positional argument follows keyword argument",
                        "All positional arguments must come before keyword arguments. Example: func(a, b, key=value)",
                    ));
                }
                let argument = self.expression()?;
                if self.check(&TokenType::For) {
                    let start = *argument.span();
                    args.push(self.comprehension(vec![argument], start)?);
                } else {
                    args.push(argument);
                }
            }

            if !self.match_types(&[TokenType::Comma]) {
                break;
            }
        }

        let paren = self
            .consume_with_help(
                TokenType::RightParen,
                "Expected ')' after arguments",
                "Function calls must be closed with ')' after the arguments. Example: func(arg1, arg2)",
            )?
            .span;

        Ok(Expr::Call {
            span: callee.span().to(&paren),
            callee: Box::new(callee),
            args,
            keywords,
        })
    }

    /// `for target in iterable [if condition]...` following the element(s).
    fn comprehension(&mut self, mut children: Vec<Expr>, start: Span) -> Result<Expr, ScriptError> {
        while self.match_types(&[TokenType::For]) {
            children.push(self.target_list()?);
            self.consume(TokenType::In, "Expected 'in' in comprehension")?;
            children.push(self.disjunction()?);
            while self.match_types(&[TokenType::If]) {
                children.push(self.disjunction()?);
            }
        }

        Ok(Expr::Unsupported {
            kind: NodeKind::Comprehension,
            children,
            span: start.to(&self.previous().span),
        })
    }

    fn atom(&mut self) -> Result<Expr, ScriptError> {
        if self.is_at_end() {
            return Err(ScriptError::syntax_with_help(
                self.peek().span,
                "Unexpected end of input",
                "Expected an expression here. Check for unmatched parentheses, brackets, or incomplete statements.",
            ));
        }

        if matches!(self.peek().token_type, TokenType::String | TokenType::FString) {
            return self.strings();
        }

        let token = self.advance().clone();

        match token.token_type {
            TokenType::False => Ok(Expr::Literal {
                value: Value::Bool(false),
                span: token.span,
            }),
            TokenType::True => Ok(Expr::Literal {
                value: Value::Bool(true),
                span: token.span,
            }),
            TokenType::None => Ok(Expr::Literal {
                value: Value::None,
                span: token.span,
            }),
            TokenType::Integer => {
                let value = token
                    .lexeme
                    .parse::<i64>()
                    .map_err(|_| ScriptError::syntax(token.span, "Invalid integer"))?;
                Ok(Expr::Literal {
                    value: Value::Int(value),
                    span: token.span,
                })
            }
            TokenType::Float => {
                let value = token
                    .lexeme
                    .parse::<f64>()
                    .map_err(|_| ScriptError::syntax(token.span, "Invalid float"))?;
                Ok(Expr::Literal {
                    value: Value::Float(value),
                    span: token.span,
                })
            }
            TokenType::Identifier => Ok(Expr::Variable {
                name: token.lexeme,
                span: token.span,
            }),
            TokenType::LeftParen => self.parenthesized(token.span),
            TokenType::LeftBracket => self.list_display(token.span),
            TokenType::LeftBrace => self.dict_or_set_display(token.span),
            _ => {
                let help_msg = match token.token_type {
                    TokenType::RightParen => "Found ')' without matching '('. Check for unbalanced parentheses.",
                    TokenType::RightBrace => "Found '}' without matching '{'. Check for unbalanced braces.",
                    TokenType::RightBracket => "Found ']' without matching '['. Check for unbalanced brackets.",
                    TokenType::Newline | TokenType::Eof => "Reached end of line while expecting an expression.",
                    TokenType::Indent => "This line is indented more than the block it belongs to.",
                    _ => "Expected a literal value, variable, or parenthesized expression here.",
                };

                let found = match token.token_type {
                    TokenType::Newline => "end of line".to_string(),
                    TokenType::Indent => "indent".to_string(),
                    TokenType::Dedent => "dedent".to_string(),
                    _ => format!("'{}'", token.lexeme),
                };

                Err(ScriptError::syntax_with_help(
                    token.span,
                    format!("Expected expression, found {}", found),
                    help_msg,
                ))
            }
        }
    }

    fn parenthesized(&mut self, start: Span) -> Result<Expr, ScriptError> {
        if self.match_types(&[TokenType::RightParen]) {
            return Ok(Expr::Tuple {
                elements: Vec::new(),
                span: start.to(&self.previous().span),
            });
        }

        let first = self.expression()?;
        let expr = if self.check(&TokenType::For) {
            self.comprehension(vec![first], start)?
        } else if self.check(&TokenType::Comma) {
            let mut elements = vec![first];
            while self.match_types(&[TokenType::Comma]) {
                if self.check(&TokenType::RightParen) {
                    break;
                }
                elements.push(self.expression()?);
            }
            Expr::Tuple {
                elements,
                span: start.to(&self.peek().span),
            }
        } else {
            first
        };

        self.consume_with_help(
            TokenType::RightParen,
            "Expected ')' after expression",
            "Every opening parenthesis '(' must have a matching closing parenthesis ')'.",
        )?;
        Ok(expr)
    }

    fn list_display(&mut self, start: Span) -> Result<Expr, ScriptError> {
        let mut elements = Vec::new();

        if !self.check(&TokenType::RightBracket) {
            let first = self.expression()?;
            if self.check(&TokenType::For) {
                let comprehension = self.comprehension(vec![first], start)?;
                self.consume(TokenType::RightBracket, "Expected ']' after comprehension")?;
                return Ok(comprehension);
            }
            elements.push(first);
            while self.match_types(&[TokenType::Comma]) {
                if self.check(&TokenType::RightBracket) {
                    break;
                }
                elements.push(self.expression()?);
            }
        }

        let end = self
            .consume_with_help(
                TokenType::RightBracket,
                "Expected ']' after list elements",
                "List literals must be closed with ']' after the opening '['. Example: [1, 2, 3]",
            )?
            .span;
        Ok(Expr::List {
            elements,
            span: start.to(&end),
        })
    }

    fn dict_or_set_display(&mut self, start: Span) -> Result<Expr, ScriptError> {
        if self.match_types(&[TokenType::RightBrace]) {
            return Ok(Expr::Dict {
                pairs: Vec::new(),
                span: start.to(&self.previous().span),
            });
        }

        let first = self.dict_item()?;
        match first {
            (key, Some(value)) => {
                if self.check(&TokenType::For) {
                    let comprehension = self.comprehension(vec![key, value], start)?;
                    self.consume(TokenType::RightBrace, "Expected '}' after comprehension")?;
                    return Ok(comprehension);
                }

                let mut pairs = vec![(key, value)];
                while self.match_types(&[TokenType::Comma]) {
                    if self.check(&TokenType::RightBrace) {
                        break;
                    }
                    match self.dict_item()? {
                        (key, Some(value)) => pairs.push((key, value)),
                        (key, None) => {
                            return Err(ScriptError::syntax_with_help(
                                *key.span(),
                                "Expected ':' after dictionary key",
                                "Dictionary entries require a colon ':' between key and value. Example: {\"key\": \"value\"}",
                            ));
                        }
                    }
                }
                let end = self
                    .consume_with_help(
                        TokenType::RightBrace,
                        "Expected '}' after dictionary entries",
                        "Dictionary literals must be closed with '}' after the opening '{'. Example: {\"key\": \"value\"}",
                    )?
                    .span;

                let unpacks: Vec<Expr> = pairs
                    .iter()
                    .filter(|(key, _)| key.kind() == NodeKind::Starred)
                    .map(|(key, _)| key.clone())
                    .collect();
                if !unpacks.is_empty() {
                    return Ok(Expr::Unsupported {
                        kind: NodeKind::Starred,
                        children: unpacks,
                        span: start.to(&end),
                    });
                }
                Ok(Expr::Dict {
                    pairs,
                    span: start.to(&end),
                })
            }
            (element, None) => {
                if self.check(&TokenType::For) {
                    let comprehension = self.comprehension(vec![element], start)?;
                    self.consume(TokenType::RightBrace, "Expected '}' after comprehension")?;
                    return Ok(comprehension);
                }

                let mut elements = vec![element];
                while self.match_types(&[TokenType::Comma]) {
                    if self.check(&TokenType::RightBrace) {
                        break;
                    }
                    elements.push(self.expression()?);
                }
                let end = self
                    .consume_with_help(
                        TokenType::RightBrace,
                        "Expected '}' after set elements",
                        "Set literals must be closed with '}' after the opening '{'. Example: {1, 2, 3}",
                    )?
                    .span;
                Ok(Expr::Set {
                    elements,
                    span: start.to(&end),
                })
            }
        }
    }

    /// `key: value`, `**mapping` (value filled with the same node) or a bare element.
    fn dict_item(&mut self) -> Result<(Expr, Option<Expr>), ScriptError> {
        if self.check(&TokenType::DoubleStar) {
            let start = self.advance().span;
            let operand = self.binary(0)?;
            let unpack = Expr::Unsupported {
                kind: NodeKind::Starred,
                span: start.to(operand.span()),
                children: vec![operand],
            };
            return Ok((unpack.clone(), Some(unpack)));
        }

        let key = self.expression()?;
        if self.match_types(&[TokenType::Colon]) {
            let value = self.expression()?;
            Ok((key, Some(value)))
        } else {
            Ok((key, None))
        }
    }

    // ------------------------------------------------------------------
    // Strings
    // ------------------------------------------------------------------

    /// Adjacent string literals concatenate; any f-string makes the result an f-string.
    fn strings(&mut self) -> Result<Expr, ScriptError> {
        let start = self.peek().span;
        let mut parts: Vec<FStringPart> = Vec::new();
        let mut formatted = false;

        while matches!(self.peek().token_type, TokenType::String | TokenType::FString) {
            let token = self.advance().clone();
            if token.token_type == TokenType::String {
                push_literal(&mut parts, &token.lexeme);
            } else {
                formatted = true;
                for part in self.fstring_parts(&token)? {
                    match part {
                        FStringPart::Literal(text) => push_literal(&mut parts, &text),
                        part => parts.push(part),
                    }
                }
            }
        }

        let span = start.to(&self.previous().span);
        if !formatted {
            let text = match parts.pop() {
                Some(FStringPart::Literal(text)) => text,
                _ => String::new(),
            };
            return Ok(Expr::Literal {
                value: Value::from(text),
                span,
            });
        }

        Ok(Expr::FString { parts, span })
    }

    fn fstring_parts(&self, token: &Token) -> Result<Vec<FStringPart>, ScriptError> {
        let chars: Vec<char> = token.lexeme.chars().collect();
        let error = |message: &str| ScriptError::syntax(token.span, format!("f-string: {}", message));

        let mut parts = Vec::new();
        let mut literal = String::new();
        let mut i = 0;

        while i < chars.len() {
            match chars[i] {
                '{' if chars.get(i + 1) == Some(&'{') => {
                    literal.push('{');
                    i += 2;
                }
                '}' if chars.get(i + 1) == Some(&'}') => {
                    literal.push('}');
                    i += 2;
                }
                '}' => return Err(error("single '}' is not allowed")),
                '{' => {
                    if !literal.is_empty() {
                        parts.push(FStringPart::Literal(std::mem::take(&mut literal)));
                    }

                    let expr_start = i + 1;
                    let mut j = expr_start;
                    let mut depth = 0usize;
                    let mut quote: Option<char> = None;
                    while j < chars.len() {
                        let c = chars[j];
                        if let Some(q) = quote {
                            if c == q {
                                quote = None;
                            }
                            j += 1;
                            continue;
                        }
                        match c {
                            '\'' | '"' => quote = Some(c),
                            '(' | '[' | '{' => depth += 1,
                            ')' | ']' => depth = depth.saturating_sub(1),
                            '}' if depth > 0 => depth -= 1,
                            '}' | ':' if depth == 0 => break,
                            '!' if depth == 0 && chars.get(j + 1) != Some(&'=') => break,
                            _ => {}
                        }
                        j += 1;
                    }
                    if j >= chars.len() {
                        return Err(error("expecting '}'"));
                    }

                    let mut expr_text: String = chars[expr_start..j].iter().collect();
                    let mut debug_text = None;
                    let trimmed = expr_text.trim_end();
                    if trimmed.ends_with('=')
                        && !["==", "!=", "<=", ">="].iter().any(|op| trimmed.ends_with(op))
                    {
                        debug_text = Some(expr_text.clone());
                        expr_text = trimmed[..trimmed.len() - 1].to_string();
                    }
                    if expr_text.trim().is_empty() {
                        return Err(error("empty expression not allowed"));
                    }

                    let mut conversion = None;
                    if chars[j] == '!' {
                        match chars.get(j + 1) {
                            Some(c @ ('r' | 's' | 'a')) => conversion = Some(*c),
                            _ => return Err(error("invalid conversion character: expected 's', 'r', or 'a'")),
                        }
                        j += 2;
                    }

                    let mut format_spec = None;
                    if chars.get(j) == Some(&':') {
                        let spec_start = j + 1;
                        while j < chars.len() && chars[j] != '}' {
                            if chars[j] == '{' {
                                return Err(error("nested replacement fields in format specs are not supported"));
                            }
                            j += 1;
                        }
                        format_spec = Some(chars[spec_start..j].iter().collect());
                    }
                    if chars.get(j) != Some(&'}') {
                        return Err(error("expecting '}'"));
                    }

                    let (start, line) = token.position(expr_start);
                    let span = Span::new(start, token.position(j).0, line);
                    let tokens = Lexer::embedded(&expr_text, start, line).scan_tokens()?;
                    let mut parser = Parser::new(tokens);
                    parser.depth = self.depth;
                    let expr = parser.star_expressions()?;
                    if !parser.is_at_end() {
                        return Err(error("invalid expression"));
                    }

                    parts.push(FStringPart::Formatted {
                        expr: Box::new(expr),
                        conversion,
                        format_spec,
                        debug_text,
                        span,
                    });
                    i = j + 1;
                }
                c => {
                    literal.push(c);
                    i += 1;
                }
            }
        }

        if !literal.is_empty() {
            parts.push(FStringPart::Literal(literal));
        }
        Ok(parts)
    }

    // ------------------------------------------------------------------
    // Token helpers
    // ------------------------------------------------------------------

    fn enter(&mut self) -> Result<(), ScriptError> {
        self.depth += 1;
        if self.depth > MAX_NESTING {
            return Err(ScriptError::syntax_with_help(
                self.peek().span,
                "too many nested parentheses, brackets or blocks",
                format!("Scripts may nest at most {} levels deep.", MAX_NESTING),
            ));
        }
        Ok(())
    }

    /// Counts one more link in a left-deep operator chain.
    fn grow_chain(&self, chain: &mut usize) -> Result<(), ScriptError> {
        *chain += 1;
        if self.depth + *chain > MAX_NESTING {
            return Err(ScriptError::syntax_with_help(
                self.previous().span,
                "expression is too deeply nested",
                "Split long operator chains into several assignments.",
            ));
        }
        Ok(())
    }

    fn missing_operand(&self, operator: &str) -> ScriptError {
        ScriptError::syntax_with_help(
            self.peek().span,
            format!("Expected expression after '{}'", operator),
            "Operators require expressions on both sides.",
        )
    }

    fn starts_expression(&self) -> bool {
        matches!(
            self.peek().token_type,
            TokenType::Identifier
                | TokenType::Integer
                | TokenType::Float
                | TokenType::String
                | TokenType::FString
                | TokenType::True
                | TokenType::False
                | TokenType::None
                | TokenType::LeftParen
                | TokenType::LeftBracket
                | TokenType::LeftBrace
                | TokenType::Minus
                | TokenType::Plus
                | TokenType::Tilde
                | TokenType::Not
                | TokenType::Lambda
                | TokenType::Await
                | TokenType::Yield
                | TokenType::Star
        )
    }

    fn match_types(&mut self, types: &[TokenType]) -> bool {
        for token_type in types {
            if self.check(token_type) {
                self.advance();
                return true;
            }
        }
        false
    }

    fn check(&self, token_type: &TokenType) -> bool {
        if self.is_at_end() {
            false
        } else {
            &self.peek().token_type == token_type
        }
    }

    fn advance(&mut self) -> &Token {
        if !self.is_at_end() {
            self.current += 1;
        }
        self.previous()
    }

    fn is_at_end(&self) -> bool {
        self.peek().token_type == TokenType::Eof
    }

    fn peek(&self) -> &Token {
        &self.tokens[self.current.min(self.tokens.len() - 1)]
    }

    fn peek_next(&self) -> Option<&Token> {
        self.tokens.get(self.current + 1)
    }

    fn previous(&self) -> &Token {
        &self.tokens[self.current.saturating_sub(1)]
    }

    fn consume(&mut self, token_type: TokenType, message: &str) -> Result<&Token, ScriptError> {
        if self.check(&token_type) {
            Ok(self.advance())
        } else {
            Err(ScriptError::syntax(self.error_span(), message))
        }
    }

    fn consume_with_help(
        &mut self,
        token_type: TokenType,
        message: &str,
        help: impl Into<String>,
    ) -> Result<&Token, ScriptError> {
        if self.check(&token_type) {
            Ok(self.advance())
        } else {
            Err(ScriptError::syntax_with_help(self.error_span(), message, help))
        }
    }

    /// Points at the unexpected token, or just past the last real token at end of input.
    fn error_span(&self) -> Span {
        let at_line_end = matches!(
            self.peek().token_type,
            TokenType::Eof | TokenType::Newline | TokenType::Dedent
        );
        if at_line_end && self.current > 0 {
            let last = &self.previous().span;
            Span::single(last.end, last.line)
        } else {
            self.peek().span
        }
    }
}

fn push_literal(parts: &mut Vec<FStringPart>, text: &str) {
    if let Some(FStringPart::Literal(existing)) = parts.last_mut() {
        existing.push_str(text);
    } else {
        parts.push(FStringPart::Literal(text.to_string()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn kinds(source: &str) -> Vec<NodeKind> {
        parse(source)
            .expect("parse failed")
            .statements
            .iter()
            .map(Stmt::kind)
            .collect()
    }

    fn single_expr(source: &str) -> Expr {
        match parse(source).expect("parse failed").statements.remove(0) {
            Stmt::Expression { expr, .. } => expr,
            other => panic!("expected expression statement, got {:?}", other),
        }
    }

    #[test]
    fn statements_of_each_kind() {
        let source = "a = 1\na += 2\nif a:\n    pass\nelif b:\n    pass\nelse:\n    pass\nfor i in x:\n    pass\nwhile a:\n    a -= 1\nprint(a)\n";
        assert_eq!(
            kinds(source),
            vec![
                NodeKind::Assign,
                NodeKind::AugAssign,
                NodeKind::If,
                NodeKind::For,
                NodeKind::While,
                NodeKind::Expr,
            ]
        );
    }

    #[test]
    fn elif_clauses_stay_flat() {
        let program = parse("if a:\n    x = 1\nelif b:\n    x = 2\nelif c:\n    x = 3\nelse:\n    x = 4\n").unwrap();
        assert_eq!(program.statements.len(), 1);
        let Stmt::If { branches, else_branch, .. } = &program.statements[0] else {
            panic!("expected if");
        };
        assert_eq!(branches.len(), 3);
        assert_eq!(branches[1].condition.span().line, 3);
        assert_eq!(else_branch.len(), 1);
    }

    #[test]
    fn thousands_of_elif_clauses_parse() {
        let mut source = String::from("if x == -1:\n    pass\n");
        for i in 0..5_000 {
            source.push_str(&format!("elif x == {}:\n    pass\n", i));
        }
        let program = parse(&source).unwrap();
        let Stmt::If { branches, .. } = &program.statements[0] else {
            panic!("expected if");
        };
        assert_eq!(branches.len(), 5_001);
    }

    #[test]
    fn power_binds_tighter_than_unary_minus() {
        let Expr::Unary { operator, operand, .. } = single_expr("-2 ** 2") else {
            panic!("expected unary");
        };
        assert_eq!(operator, UnaryOp::Negate);
        assert_eq!(operand.kind(), NodeKind::BinOp);
    }

    #[test]
    fn multiplication_binds_tighter_than_addition() {
        let Expr::Binary { operator, right, .. } = single_expr("1 + 2 * 3") else {
            panic!("expected binary");
        };
        assert_eq!(operator, BinaryOp::Add);
        assert!(matches!(*right, Expr::Binary { operator: BinaryOp::Multiply, .. }));
    }

    #[test]
    fn comparison_chains_and_negated_membership() {
        let Expr::Compare { operators, .. } = single_expr("a < b <= c not in d is not e") else {
            panic!("expected compare");
        };
        assert_eq!(
            operators,
            vec![CompareOp::Less, CompareOp::LessEqual, CompareOp::NotIn, CompareOp::IsNot]
        );
    }

    #[test]
    fn chained_and_tuple_assignment_targets() {
        let program = parse("a = b = 1\nx, y = 1, 2\n").unwrap();
        let Stmt::Assign { targets, .. } = &program.statements[0] else {
            panic!("expected assign");
        };
        assert_eq!(targets.len(), 2);
        let Stmt::Assign { targets, value, .. } = &program.statements[1] else {
            panic!("expected assign");
        };
        assert_eq!(targets[0].kind(), NodeKind::Tuple);
        assert_eq!(value.kind(), NodeKind::Tuple);
    }

    #[test]
    fn fstring_parts_are_parsed() {
        let Expr::FString { parts, .. } = single_expr("f'a={a!r:>5} {b=} {{x}}'") else {
            panic!("expected f-string");
        };
        assert_eq!(parts.len(), 5);
        let FStringPart::Formatted { conversion, format_spec, .. } = &parts[1] else {
            panic!("expected replacement field");
        };
        assert_eq!(*conversion, Some('r'));
        assert_eq!(format_spec.as_deref(), Some(">5"));
        let FStringPart::Formatted { debug_text, .. } = &parts[3] else {
            panic!("expected debug field");
        };
        assert_eq!(debug_text.as_deref(), Some("b="));
        assert!(matches!(&parts[2], FStringPart::Literal(text) if text == " "));
        assert!(matches!(&parts[4], FStringPart::Literal(text) if text == " {x}"));
    }

    #[test]
    fn replacement_fields_point_into_the_source() {
        let field_span = |source: &str| {
            let Expr::FString { parts, .. } = single_expr(source) else {
                panic!("expected f-string");
            };
            parts
                .into_iter()
                .find_map(|part| match part {
                    FStringPart::Formatted { span, .. } => Some(span),
                    FStringPart::Literal(_) => None,
                })
                .expect("expected replacement field")
        };

        let span = field_span("f'ab{x}'");
        assert_eq!((span.start, span.end, span.line), (5, 6, 1));

        let span = field_span("rf\"\\d{x}\"");
        assert_eq!((span.start, span.end, span.line), (6, 7, 1));

        let span = field_span("f'''a\n\\t{x}'''");
        assert_eq!((span.start, span.end, span.line), (9, 10, 2));
    }

    #[test]
    fn adjacent_strings_concatenate() {
        let Expr::Literal { value, .. } = single_expr("'ab' \"cd\"") else {
            panic!("expected literal");
        };
        assert_eq!(value.to_string(), "abcd");
    }

    #[test]
    fn rejected_constructs_are_recognised() {
        assert_eq!(kinds("import os"), vec![NodeKind::Import]);
        assert_eq!(kinds("def f():\n    return 1\nx = 1"), vec![NodeKind::FunctionDef, NodeKind::Assign]);
        assert_eq!(
            kinds("try:\n    x = 1\nexcept Exception:\n    pass\n"),
            vec![NodeKind::Try, NodeKind::Try]
        );
        assert_eq!(single_expr("lambda x: x").kind(), NodeKind::Lambda);
        assert_eq!(single_expr("[x for x in y]").kind(), NodeKind::Comprehension);
        assert_eq!(single_expr("a[0]").kind(), NodeKind::Subscript);
    }

    #[test]
    fn break_outside_loop_is_a_syntax_error() {
        assert!(parse("break").is_err());
        assert!(parse("while x:\n    break\n").is_ok());
    }

    #[test]
    fn deep_nesting_is_rejected_without_overflow() {
        let deep = "(".repeat(500) + "1" + &")".repeat(500);
        let error = parse(&deep).unwrap_err();
        assert!(error.message.contains("nested"));
    }

    #[test]
    fn syntax_errors_carry_lines() {
        let error = parse("a = 1\nb = (2 +\n").unwrap_err();
        assert_eq!(error.kind, crate::error::ErrorKind::Syntax);
        assert!(error.line().is_some());

        let error = parse("x = 1\nif x\n    pass\n").unwrap_err();
        assert_eq!(error.line(), Some(2));
    }
}
