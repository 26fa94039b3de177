//! Source line bookkeeping and the context window rendered around failures.
//!
//! The same rendering is used for compile-time and run-time failures:
//!
//! ```text
//! script execution failed: ZeroDivisionError: division by zero
//! Context:
//!   File '<script>', line 5
//!        4. b = 0
//! >>>    5. c = a / b
//!        6. result = c
//! ```

use std::fmt;
use std::rc::Rc;

/// Placeholder file name used in diagnostics for script text.
pub const SCRIPT_NAME: &str = "<script>";

/// Immutable script text plus its line-split form.
#[derive(Debug, Clone)]
pub struct SourceText {
    text: Rc<str>,
    lines: Rc<[String]>,
}

impl SourceText {
    pub fn new(text: &str) -> Self {
        Self {
            text: Rc::from(text),
            lines: text.lines().map(str::to_string).collect(),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.text
    }

    /// Line `number`, 1-based.
    pub fn line(&self, number: usize) -> Option<&str> {
        number
            .checked_sub(1)
            .and_then(|index| self.lines.get(index))
            .map(String::as_str)
    }

    pub fn line_count(&self) -> usize {
        self.lines.len()
    }

    pub fn lines(&self) -> impl Iterator<Item = &str> {
        self.lines.iter().map(String::as_str)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContextLine {
    pub number: usize,
    pub text: String,
    pub is_error: bool,
}

/// A rendered failure: header plus an optional window of source lines.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    header: String,
    line: Option<usize>,
    window: Vec<ContextLine>,
}

impl Diagnostic {
    /// Builds the window around `line` when it falls inside `source`.
    pub fn new(header: impl Into<String>, line: Option<usize>, source: Option<&SourceText>) -> Self {
        let window = match (line, source) {
            (Some(line), Some(source)) if line >= 1 && line <= source.line_count() => {
                let first = line.saturating_sub(1).max(1);
                let last = (line + 1).min(source.line_count());
                (first..=last)
                    .filter_map(|number| {
                        source.line(number).map(|text| ContextLine {
                            number,
                            text: text.to_string(),
                            is_error: number == line,
                        })
                    })
                    .collect()
            }
            _ => Vec::new(),
        };

        let line = if window.is_empty() { None } else { line };
        Self {
            header: header.into(),
            line,
            window,
        }
    }

    pub fn header(&self) -> &str {
        &self.header
    }

    /// The failing line, when it could be located in the source.
    pub fn line(&self) -> Option<usize> {
        self.line
    }

    pub fn window(&self) -> &[ContextLine] {
        &self.window
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.header)?;
        let Some(line) = self.line else {
            return Ok(());
        };

        write!(f, "\nContext:\n  File '{}', line {}", SCRIPT_NAME, line)?;
        for context in &self.window {
            let marker = if context.is_error { ">>>" } else { "   " };
            write!(f, "\n{}    {}. {}", marker, context.number, context.text)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn ten_lines() -> SourceText {
        let text: Vec<String> = (1..=10).map(|n| format!("line{}", n)).collect();
        SourceText::new(&text.join("\n"))
    }

    #[test]
    fn window_includes_neighbours() {
        let diagnostic = Diagnostic::new("boom", Some(5), Some(&ten_lines()));
        let numbers: Vec<usize> = diagnostic.window().iter().map(|l| l.number).collect();
        assert_eq!(numbers, vec![4, 5, 6]);
        assert!(diagnostic.window()[1].is_error);
        assert_eq!(
            diagnostic.to_string(),
            "boom\nContext:\n  File '<script>', line 5\n       4. line4\n>>>    5. line5\n       6. line6"
        );
    }

    #[test]
    fn first_and_last_lines_have_one_neighbour() {
        let source = ten_lines();
        let first = Diagnostic::new("e", Some(1), Some(&source));
        assert_eq!(first.window().len(), 2);
        assert_eq!(first.window()[0].number, 1);

        let last = Diagnostic::new("e", Some(10), Some(&source));
        assert_eq!(last.window().len(), 2);
        assert_eq!(last.window()[1].number, 10);
    }

    #[test]
    fn out_of_range_line_renders_header_only() {
        let source = ten_lines();
        assert_eq!(Diagnostic::new("e", Some(11), Some(&source)).to_string(), "e");
        assert_eq!(Diagnostic::new("e", Some(0), Some(&source)).to_string(), "e");
        assert_eq!(Diagnostic::new("e", None, Some(&source)).to_string(), "e");
        assert_eq!(Diagnostic::new("e", Some(3), None).to_string(), "e");
    }

    #[test]
    fn single_line_source() {
        let source = SourceText::new("x = 1 / 0");
        let diagnostic = Diagnostic::new("e", Some(1), Some(&source));
        assert_eq!(diagnostic.window().len(), 1);
        assert!(diagnostic.to_string().ends_with(">>>    1. x = 1 / 0"));
    }
}
