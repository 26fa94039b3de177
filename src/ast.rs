use crate::error::Span;
use crate::value::Value;
use std::fmt;

/// Every syntax element the parser can recognise.
///
/// Some kinds exist only so that a script using them can be rejected by
/// name (`Import`, `Lambda`, ...). Operators are kinds of their own so an
/// allowlist can admit `BinOp` while still refusing, say, `BitXor`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum NodeKind {
    // Structure
    Module,
    Expr,
    Assign,
    AugAssign,
    Pass,
    Break,
    Continue,
    If,
    For,
    While,

    // Statements recognised only to be rejected
    FunctionDef,
    ClassDef,
    Import,
    Try,
    Raise,
    With,
    Return,
    Delete,
    Global,
    Assert,

    // Expressions
    BoolOp,
    BinOp,
    UnaryOp,
    Compare,
    IfExp,
    Call,
    Keyword,
    Attribute,
    Subscript,
    Slice,
    Name,
    Constant,
    FString,
    FormattedValue,
    List,
    Tuple,
    Set,
    Dict,

    // Expressions recognised only to be rejected
    Lambda,
    Yield,
    Await,
    Starred,
    NamedExpr,
    Comprehension,

    // Boolean and unary operators
    And,
    Or,
    Not,
    UAdd,
    USub,
    Invert,

    // Binary operators
    Add,
    Sub,
    Mult,
    Div,
    FloorDiv,
    Mod,
    Pow,
    MatMult,
    BitAnd,
    BitOr,
    BitXor,
    LShift,
    RShift,

    // Comparison operators
    Eq,
    NotEq,
    Lt,
    LtE,
    Gt,
    GtE,
    Is,
    IsNot,
    In,
    NotIn,
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

#[derive(Debug, Clone)]
pub struct Program {
    pub statements: Vec<Stmt>,
}

#[derive(Debug, Clone)]
pub enum Stmt {
    Expression {
        expr: Expr,
        span: Span,
    },
    /// `a = b = value`; one target per `=`.
    Assign {
        targets: Vec<Target>,
        value: Expr,
        span: Span,
    },
    AugAssign {
        target: Target,
        operator: BinaryOp,
        value: Expr,
        span: Span,
    },
    Pass {
        span: Span,
    },
    Break {
        span: Span,
    },
    Continue {
        span: Span,
    },
    /// `if` followed by any number of `elif` clauses, kept flat.
    If {
        branches: Vec<IfBranch>,
        else_branch: Vec<Stmt>,
        span: Span,
    },
    While {
        condition: Expr,
        body: Vec<Stmt>,
        orelse: Vec<Stmt>,
        span: Span,
    },
    For {
        target: Target,
        iterable: Expr,
        body: Vec<Stmt>,
        orelse: Vec<Stmt>,
        span: Span,
    },
    /// A statement form the language recognises but never executes.
    Unsupported {
        kind: NodeKind,
        span: Span,
    },
}

/// One `if` or `elif` test and the block it guards.
#[derive(Debug, Clone)]
pub struct IfBranch {
    pub condition: Expr,
    pub body: Vec<Stmt>,
}

impl Stmt {
    pub fn span(&self) -> &Span {
        match self {
            Stmt::Expression { span, .. } => span,
            Stmt::Assign { span, .. } => span,
            Stmt::AugAssign { span, .. } => span,
            Stmt::Pass { span } => span,
            Stmt::Break { span } => span,
            Stmt::Continue { span } => span,
            Stmt::If { span, .. } => span,
            Stmt::While { span, .. } => span,
            Stmt::For { span, .. } => span,
            Stmt::Unsupported { span, .. } => span,
        }
    }

    pub fn kind(&self) -> NodeKind {
        match self {
            Stmt::Expression { .. } => NodeKind::Expr,
            Stmt::Assign { .. } => NodeKind::Assign,
            Stmt::AugAssign { .. } => NodeKind::AugAssign,
            Stmt::Pass { .. } => NodeKind::Pass,
            Stmt::Break { .. } => NodeKind::Break,
            Stmt::Continue { .. } => NodeKind::Continue,
            Stmt::If { .. } => NodeKind::If,
            Stmt::While { .. } => NodeKind::While,
            Stmt::For { .. } => NodeKind::For,
            Stmt::Unsupported { kind, .. } => *kind,
        }
    }
}

/// Left-hand side of an assignment or `for` loop.
#[derive(Debug, Clone)]
pub enum Target {
    Name {
        name: String,
        span: Span,
    },
    Tuple {
        elements: Vec<Target>,
        span: Span,
    },
    Attribute {
        object: Box<Expr>,
        name: String,
        span: Span,
    },
    Subscript {
        object: Box<Expr>,
        index: Box<Expr>,
        span: Span,
    },
}

impl Target {
    pub fn span(&self) -> &Span {
        match self {
            Target::Name { span, .. } => span,
            Target::Tuple { span, .. } => span,
            Target::Attribute { span, .. } => span,
            Target::Subscript { span, .. } => span,
        }
    }

    pub fn kind(&self) -> NodeKind {
        match self {
            Target::Name { .. } => NodeKind::Name,
            Target::Tuple { .. } => NodeKind::Tuple,
            Target::Attribute { .. } => NodeKind::Attribute,
            Target::Subscript { .. } => NodeKind::Subscript,
        }
    }
}

#[derive(Debug, Clone)]
pub enum Expr {
    Literal {
        value: Value,
        span: Span,
    },
    Variable {
        name: String,
        span: Span,
    },
    FString {
        parts: Vec<FStringPart>,
        span: Span,
    },
    Binary {
        left: Box<Expr>,
        operator: BinaryOp,
        right: Box<Expr>,
        span: Span,
    },
    Unary {
        operator: UnaryOp,
        operand: Box<Expr>,
        span: Span,
    },
    Logical {
        left: Box<Expr>,
        operator: LogicalOp,
        right: Box<Expr>,
        span: Span,
    },
    /// `a < b <= c`: one operator per comparator.
    Compare {
        left: Box<Expr>,
        operators: Vec<CompareOp>,
        comparators: Vec<Expr>,
        span: Span,
    },
    Ternary {
        condition: Box<Expr>,
        then_expr: Box<Expr>,
        else_expr: Box<Expr>,
        span: Span,
    },
    Call {
        callee: Box<Expr>,
        args: Vec<Expr>,
        keywords: Vec<KeywordArg>,
        span: Span,
    },
    Attribute {
        object: Box<Expr>,
        name: String,
        span: Span,
    },
    Subscript {
        object: Box<Expr>,
        index: Box<Expr>,
        span: Span,
    },
    Slice {
        lower: Option<Box<Expr>>,
        upper: Option<Box<Expr>>,
        step: Option<Box<Expr>>,
        span: Span,
    },
    List {
        elements: Vec<Expr>,
        span: Span,
    },
    Tuple {
        elements: Vec<Expr>,
        span: Span,
    },
    Set {
        elements: Vec<Expr>,
        span: Span,
    },
    Dict {
        pairs: Vec<(Expr, Expr)>,
        span: Span,
    },
    /// An expression form the language recognises but never evaluates.
    Unsupported {
        kind: NodeKind,
        children: Vec<Expr>,
        span: Span,
    },
}

#[derive(Debug, Clone)]
pub enum FStringPart {
    Literal(String),
    Formatted {
        expr: Box<Expr>,
        /// `!r`, `!s` or `!a`.
        conversion: Option<char>,
        format_spec: Option<String>,
        /// Source text echoed by the `{expr=}` form, including the `=`.
        debug_text: Option<String>,
        span: Span,
    },
}

#[derive(Debug, Clone)]
pub struct KeywordArg {
    pub name: String,
    pub value: Expr,
    pub span: Span,
}

impl Expr {
    pub fn span(&self) -> &Span {
        match self {
            Expr::Literal { span, .. } => span,
            Expr::Variable { span, .. } => span,
            Expr::FString { span, .. } => span,
            Expr::Binary { span, .. } => span,
            Expr::Unary { span, .. } => span,
            Expr::Logical { span, .. } => span,
            Expr::Compare { span, .. } => span,
            Expr::Ternary { span, .. } => span,
            Expr::Call { span, .. } => span,
            Expr::Attribute { span, .. } => span,
            Expr::Subscript { span, .. } => span,
            Expr::Slice { span, .. } => span,
            Expr::List { span, .. } => span,
            Expr::Tuple { span, .. } => span,
            Expr::Set { span, .. } => span,
            Expr::Dict { span, .. } => span,
            Expr::Unsupported { span, .. } => span,
        }
    }

    pub fn kind(&self) -> NodeKind {
        match self {
            Expr::Literal { .. } => NodeKind::Constant,
            Expr::Variable { .. } => NodeKind::Name,
            Expr::FString { .. } => NodeKind::FString,
            Expr::Binary { .. } => NodeKind::BinOp,
            Expr::Unary { .. } => NodeKind::UnaryOp,
            Expr::Logical { .. } => NodeKind::BoolOp,
            Expr::Compare { .. } => NodeKind::Compare,
            Expr::Ternary { .. } => NodeKind::IfExp,
            Expr::Call { .. } => NodeKind::Call,
            Expr::Attribute { .. } => NodeKind::Attribute,
            Expr::Subscript { .. } => NodeKind::Subscript,
            Expr::Slice { .. } => NodeKind::Slice,
            Expr::List { .. } => NodeKind::List,
            Expr::Tuple { .. } => NodeKind::Tuple,
            Expr::Set { .. } => NodeKind::Set,
            Expr::Dict { .. } => NodeKind::Dict,
            Expr::Unsupported { kind, .. } => *kind,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Subtract,
    Multiply,
    Divide,
    FloorDivide,
    Modulo,
    Power,
    MatMultiply,
    BitAnd,
    BitOr,
    BitXor,
    LeftShift,
    RightShift,
}

impl BinaryOp {
    pub fn kind(&self) -> NodeKind {
        match self {
            BinaryOp::Add => NodeKind::Add,
            BinaryOp::Subtract => NodeKind::Sub,
            BinaryOp::Multiply => NodeKind::Mult,
            BinaryOp::Divide => NodeKind::Div,
            BinaryOp::FloorDivide => NodeKind::FloorDiv,
            BinaryOp::Modulo => NodeKind::Mod,
            BinaryOp::Power => NodeKind::Pow,
            BinaryOp::MatMultiply => NodeKind::MatMult,
            BinaryOp::BitAnd => NodeKind::BitAnd,
            BinaryOp::BitOr => NodeKind::BitOr,
            BinaryOp::BitXor => NodeKind::BitXor,
            BinaryOp::LeftShift => NodeKind::LShift,
            BinaryOp::RightShift => NodeKind::RShift,
        }
    }

    pub fn symbol(&self) -> &'static str {
        match self {
            BinaryOp::Add => "+",
            BinaryOp::Subtract => "-",
            BinaryOp::Multiply => "*",
            BinaryOp::Divide => "/",
            BinaryOp::FloorDivide => "//",
            BinaryOp::Modulo => "%",
            BinaryOp::Power => "**",
            BinaryOp::MatMultiply => "@",
            BinaryOp::BitAnd => "&",
            BinaryOp::BitOr => "|",
            BinaryOp::BitXor => "^",
            BinaryOp::LeftShift => "<<",
            BinaryOp::RightShift => ">>",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Negate,
    Plus,
    Not,
    Invert,
}

impl UnaryOp {
    pub fn kind(&self) -> NodeKind {
        match self {
            UnaryOp::Negate => NodeKind::USub,
            UnaryOp::Plus => NodeKind::UAdd,
            UnaryOp::Not => NodeKind::Not,
            UnaryOp::Invert => NodeKind::Invert,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogicalOp {
    And,
    Or,
}

impl LogicalOp {
    pub fn kind(&self) -> NodeKind {
        match self {
            LogicalOp::And => NodeKind::And,
            LogicalOp::Or => NodeKind::Or,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Equal,
    NotEqual,
    Less,
    LessEqual,
    Greater,
    GreaterEqual,
    Is,
    IsNot,
    In,
    NotIn,
}

impl CompareOp {
    pub fn kind(&self) -> NodeKind {
        match self {
            CompareOp::Equal => NodeKind::Eq,
            CompareOp::NotEqual => NodeKind::NotEq,
            CompareOp::Less => NodeKind::Lt,
            CompareOp::LessEqual => NodeKind::LtE,
            CompareOp::Greater => NodeKind::Gt,
            CompareOp::GreaterEqual => NodeKind::GtE,
            CompareOp::Is => NodeKind::Is,
            CompareOp::IsNot => NodeKind::IsNot,
            CompareOp::In => NodeKind::In,
            CompareOp::NotIn => NodeKind::NotIn,
        }
    }

    pub fn symbol(&self) -> &'static str {
        match self {
            CompareOp::Equal => "==",
            CompareOp::NotEqual => "!=",
            CompareOp::Less => "<",
            CompareOp::LessEqual => "<=",
            CompareOp::Greater => ">",
            CompareOp::GreaterEqual => ">=",
            CompareOp::Is => "is",
            CompareOp::IsNot => "is not",
            CompareOp::In => "in",
            CompareOp::NotIn => "not in",
        }
    }
}
