use super::ast::Span;
use crate::error::{Diagnostic, Location};

/// Code used for constructs this compiler does not implement.
pub const UNSUPPORTED: &str = "DC0001";

/// A diagnostic with its source span, before line/column resolution.
#[derive(Debug, Clone, PartialEq)]
pub struct CompileError {
    pub code: &'static str,
    pub message: String,
    pub span: Span,
    pub warning: bool,
}

impl CompileError {
    pub fn error(code: &'static str, message: impl Into<String>, span: Span) -> Self {
        Self {
            code,
            message: message.into(),
            span,
            warning: false,
        }
    }

    pub fn warning(code: &'static str, message: impl Into<String>, span: Span) -> Self {
        Self {
            code,
            message: message.into(),
            span,
            warning: true,
        }
    }

    pub fn unsupported(what: &str, span: Span) -> Self {
        Self::error(
            UNSUPPORTED,
            format!("The construct '{what}' is not supported by this compiler."),
            span,
        )
    }

    pub fn is_error(&self) -> bool {
        !self.warning
    }

    /// Resolve the span against `source`.
    pub fn to_diagnostic(&self, source: &str) -> Diagnostic {
        let (line, column) = offset_to_line_col(source, self.span.start);
        let diagnostic = if self.warning {
            Diagnostic::warning(self.code, self.message.clone())
        } else {
            Diagnostic::error(self.code, self.message.clone())
        };
        diagnostic.at(Location { line, column })
    }
}

impl std::fmt::Display for CompileError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl std::error::Error for CompileError {}

fn offset_to_line_col(source: &str, offset: usize) -> (usize, usize) {
    let mut line = 1;
    let mut col = 1;
    for (i, ch) in source.char_indices() {
        if i >= offset {
            break;
        }
        if ch == '\n' {
            line += 1;
            col = 1;
        } else {
            col += 1;
        }
    }
    (line, col)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::error::Severity;

    #[test]
    fn line_and_column_are_one_based() {
        assert_eq!(offset_to_line_col("abc", 0), (1, 1));
        assert_eq!(offset_to_line_col("ab\ncd", 4), (2, 2));
        assert_eq!(offset_to_line_col("\n\nx", 2), (3, 1));
    }

    #[test]
    fn diagnostics_keep_severity_and_location() {
        let source = "class A\n{ x }";
        let err = CompileError::error("CS1519", "Invalid token 'x'", Span::new(10, 11));
        let d = err.to_diagnostic(source);
        assert_eq!(d.severity, Severity::Error);
        assert_eq!(d.location, Some(Location { line: 2, column: 3 }));
        assert_eq!(d.to_string(), "CS1519: Invalid token 'x'");

        let w = CompileError::warning("CS0168", "unused", Span::default()).to_diagnostic(source);
        assert_eq!(w.severity, Severity::Warning);
    }
}
