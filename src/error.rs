use crate::ast::NodeKind;
use crate::diagnostic::{Diagnostic, SourceText};
use ariadne::{Color, Fmt, Label, Report, ReportKind, Source};
use std::fmt;
use thiserror::Error;

/// Location of a token or node: char offsets into the script plus the
/// 1-based line the construct starts on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Span {
    pub start: usize,
    pub end: usize,
    pub line: usize,
}

impl Span {
    pub fn new(start: usize, end: usize, line: usize) -> Self {
        Self { start, end, line }
    }

    pub fn single(pos: usize, line: usize) -> Self {
        Self {
            start: pos,
            end: pos + 1,
            line,
        }
    }

    /// Span from the start of `self` to the end of `other`, keeping the first line.
    pub fn to(&self, other: &Span) -> Self {
        Self {
            start: self.start,
            end: other.end.max(self.start),
            line: self.line,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Empty input, non-text input, or API misuse such as running before compiling.
    InvalidInput,
    Syntax,
    Disallowed,
    NameError,
    TypeError,
    ValueError,
    ZeroDivisionError,
    AttributeError,
    KeyError,
    IndexError,
    OverflowError,
    ReservedName,
    ResourceExceeded,
    /// Raised by the `exit()` builtin; the evaluator treats it as a clean stop.
    SystemExit,
}

impl ErrorKind {
    pub fn is_compile_time(&self) -> bool {
        matches!(self, ErrorKind::Syntax | ErrorKind::Disallowed)
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match self {
            ErrorKind::InvalidInput => "InvalidInput",
            ErrorKind::Syntax => "SyntaxError",
            ErrorKind::Disallowed => "DisallowedSyntax",
            ErrorKind::NameError => "NameError",
            ErrorKind::TypeError => "TypeError",
            ErrorKind::ValueError => "ValueError",
            ErrorKind::ZeroDivisionError => "ZeroDivisionError",
            ErrorKind::AttributeError => "AttributeError",
            ErrorKind::KeyError => "KeyError",
            ErrorKind::IndexError => "IndexError",
            ErrorKind::OverflowError => "OverflowError",
            ErrorKind::ReservedName => "ReservedNameError",
            ErrorKind::ResourceExceeded => "ResourceExceeded",
            ErrorKind::SystemExit => "SystemExit",
        };
        f.write_str(name)
    }
}

/// Error raised anywhere between lexing and evaluation.
///
/// Runtime helpers create errors without a span; the evaluator attaches the
/// span of the innermost expression that was being evaluated.
#[derive(Debug, Clone, PartialEq)]
pub struct ScriptError {
    pub kind: ErrorKind,
    pub span: Option<Span>,
    pub message: String,
    pub help: Option<String>,
}

impl ScriptError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            span: None,
            message: message.into(),
            help: None,
        }
    }

    pub fn with_help(mut self, help: impl Into<String>) -> Self {
        self.help = Some(help.into());
        self
    }

    /// Attaches `span` unless a more precise one is already set.
    pub fn at(mut self, span: &Span) -> Self {
        if self.span.is_none() {
            self.span = Some(*span);
        }
        self
    }

    pub fn syntax(span: Span, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Syntax, message).at(&span)
    }

    pub fn syntax_with_help(span: Span, message: impl Into<String>, help: impl Into<String>) -> Self {
        Self::syntax(span, message).with_help(help)
    }

    pub fn disallowed(span: Span, kind: NodeKind) -> Self {
        Self::new(
            ErrorKind::Disallowed,
            format!("disallowed syntax element `{}`", kind),
        )
        .at(&span)
    }

    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidInput, message)
    }

    pub fn name_error(name: &str) -> Self {
        Self::new(ErrorKind::NameError, format!("name '{}' is not defined", name))
    }

    pub fn type_error(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::TypeError, message)
    }

    pub fn value_error(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::ValueError, message)
    }

    pub fn zero_division(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::ZeroDivisionError, message)
    }

    pub fn attribute_error(type_name: &str, attribute: &str) -> Self {
        Self::new(
            ErrorKind::AttributeError,
            format!("'{}' object has no attribute '{}'", type_name, attribute),
        )
    }

    pub fn key_error(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::KeyError, message)
    }

    pub fn index_error(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::IndexError, message)
    }

    pub fn overflow(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::OverflowError, message)
    }

    pub fn line(&self) -> Option<usize> {
        self.span.map(|span| span.line)
    }

    pub fn report(&self, source: &str, filename: Option<&str>) {
        let filename = filename.unwrap_or(crate::diagnostic::SCRIPT_NAME);

        let color = if self.kind.is_compile_time() {
            Color::Yellow
        } else {
            Color::Magenta
        };

        let offset = self.span.map(|span| span.start).unwrap_or(0);
        let mut report_builder = Report::build(ReportKind::Error, filename, offset)
            .with_message(format!("{}: {}", self.kind.fg(color), self.message));

        if let Some(span) = self.span {
            report_builder = report_builder.with_label(
                Label::new((filename, span.start..span.end))
                    .with_message(&self.message)
                    .with_color(color),
            );
        }

        if let Some(ref help_text) = self.help {
            report_builder = report_builder.with_note(format!("{}: {}", "help".fg(Color::Cyan), help_text));
        }

        if let Err(error) = report_builder
            .finish()
            .eprint((filename, Source::from(source)))
        {
            tracing::warn!(%error, "failed to print diagnostic report");
        }
    }
}

impl fmt::Display for ScriptError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

impl std::error::Error for ScriptError {}

/// Failure of `compile`: empty or non-text input, a syntax error, or a
/// syntax element outside the allowlist.
#[derive(Debug, Clone, Error)]
#[error("{diagnostic}")]
pub struct CompileError {
    error: ScriptError,
    diagnostic: Diagnostic,
}

impl CompileError {
    pub(crate) fn new(error: ScriptError, source: Option<&SourceText>) -> Self {
        let header = format!("script compilation failed: {}", error);
        let diagnostic = Diagnostic::new(header, error.line(), source);
        Self { error, diagnostic }
    }

    pub fn kind(&self) -> ErrorKind {
        self.error.kind
    }

    pub fn message(&self) -> &str {
        &self.error.message
    }

    pub fn line(&self) -> Option<usize> {
        self.error.line()
    }

    pub fn diagnostic(&self) -> &Diagnostic {
        &self.diagnostic
    }

    pub fn cause(&self) -> &ScriptError {
        &self.error
    }

    pub fn report(&self, source: &str, filename: Option<&str>) {
        self.error.report(source, filename);
    }
}

/// Failure of `run`: running before a successful compile, or any error
/// raised while evaluating validated code.
#[derive(Debug, Clone, Error)]
#[error("{diagnostic}")]
pub struct RuntimeError {
    error: ScriptError,
    diagnostic: Diagnostic,
}

impl RuntimeError {
    pub(crate) fn new(error: ScriptError, source: Option<&SourceText>) -> Self {
        let header = format!("script execution failed: {}", error);
        let diagnostic = Diagnostic::new(header, error.line(), source);
        Self { error, diagnostic }
    }

    pub fn kind(&self) -> ErrorKind {
        self.error.kind
    }

    pub fn message(&self) -> &str {
        &self.error.message
    }

    pub fn line(&self) -> Option<usize> {
        self.error.line()
    }

    pub fn diagnostic(&self) -> &Diagnostic {
        &self.diagnostic
    }

    pub fn cause(&self) -> &ScriptError {
        &self.error
    }

    pub fn report(&self, source: &str, filename: Option<&str>) {
        self.error.report(source, filename);
    }
}

/// Either failure, for callers that compile and run in one go.
#[derive(Debug, Clone, Error)]
pub enum Error {
    #[error(transparent)]
    Compile(#[from] CompileError),
    #[error(transparent)]
    Runtime(#[from] RuntimeError),
}
