use std::fmt;

use serde::{Deserialize, Serialize};

// ── Diagnostics ─────────────────────────────────────────────────

/// Severity of a toolchain diagnostic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Severity {
    Warning,
    Error,
}

/// 1-based position of a diagnostic inside the compiled source text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Location {
    pub line: usize,
    pub column: usize,
}

/// A single message reported by the compiler toolchain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnostic {
    pub code: String,
    pub message: String,
    pub severity: Severity,
    /// Set when a warning was escalated to an error by the emit options.
    #[serde(default)]
    pub is_warning_as_error: bool,
    #[serde(default)]
    pub location: Option<Location>,
}

impl Diagnostic {
    pub fn error(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            severity: Severity::Error,
            is_warning_as_error: false,
            location: None,
        }
    }

    pub fn warning(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            severity: Severity::Warning,
            is_warning_as_error: false,
            location: None,
        }
    }

    pub fn at(mut self, location: Location) -> Self {
        self.location = Some(location);
        self
    }

    /// Escalate a warning to an error, keeping track of where it came from.
    pub fn escalate(mut self) -> Self {
        if self.severity == Severity::Warning {
            self.severity = Severity::Error;
            self.is_warning_as_error = true;
        }
        self
    }

    /// True for diagnostics that prevent an image from being produced.
    pub fn is_blocking(&self) -> bool {
        self.is_warning_as_error || self.severity == Severity::Error
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

// ── Runtime errors ──────────────────────────────────────────────

/// Exception raised while compiled code is running.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExceptionKind {
    NullReference,
    DivideByZero,
    InvalidCast,
    StackOverflow,
    InvalidOperation,
    ArgumentNull,
    ArgumentOutOfRange,
    /// Raised by a host library function.
    Host,
}

impl fmt::Display for ExceptionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ExceptionKind::NullReference => "NullReferenceException",
            ExceptionKind::DivideByZero => "DivideByZeroException",
            ExceptionKind::InvalidCast => "InvalidCastException",
            ExceptionKind::StackOverflow => "StackOverflowException",
            ExceptionKind::InvalidOperation => "InvalidOperationException",
            ExceptionKind::ArgumentNull => "ArgumentNullException",
            ExceptionKind::ArgumentOutOfRange => "ArgumentOutOfRangeException",
            ExceptionKind::Host => "HostException",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuntimeError {
    pub kind: ExceptionKind,
    pub message: String,
}

impl RuntimeError {
    pub fn new(kind: ExceptionKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn null_reference(member: &str) -> Self {
        Self::new(
            ExceptionKind::NullReference,
            format!("Object reference not set to an instance of an object (accessing '{member}')."),
        )
    }

    pub fn divide_by_zero() -> Self {
        Self::new(ExceptionKind::DivideByZero, "Attempted to divide by zero.")
    }

    pub fn invalid_cast(from: &str, to: &str) -> Self {
        Self::new(
            ExceptionKind::InvalidCast,
            format!("Unable to cast object of type '{from}' to type '{to}'."),
        )
    }

    pub fn invalid_operation(message: impl Into<String>) -> Self {
        Self::new(ExceptionKind::InvalidOperation, message)
    }

    pub fn argument_null(param: &str) -> Self {
        Self::new(
            ExceptionKind::ArgumentNull,
            format!("Value cannot be null. (Parameter '{param}')"),
        )
    }

    pub fn argument_out_of_range(param: &str) -> Self {
        Self::new(
            ExceptionKind::ArgumentOutOfRange,
            format!("Specified argument was out of the range of valid values. (Parameter '{param}')"),
        )
    }

    pub fn host(message: impl Into<String>) -> Self {
        Self::new(ExceptionKind::Host, message)
    }
}

impl fmt::Display for RuntimeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

impl std::error::Error for RuntimeError {}

// ── Pipeline errors ─────────────────────────────────────────────

/// Pipeline stage a compile-and-bind flow was in when it stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Stage {
    Requested,
    Declared,
    Generated,
    Compiled,
    Resolved,
    Bound,
    Invoked,
}

/// Structured error for every stage of the compile/resolve/bind pipeline
/// and for invoking the resulting callables.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "code", content = "detail")]
pub enum Error {
    /// The host platform does not expose its trusted library list.
    PlatformUnsupported { message: String },
    /// Missing body, name/parameter count mismatch, unnameable type.
    InvalidInput { message: String },
    /// The toolchain reported error-severity diagnostics.
    CompilationFailed { diagnostics: Vec<Diagnostic> },
    /// The emitted image could not be loaded or linked.
    LoadFailed { message: String },
    TypeNotFound { class_name: String, full_name: String },
    MethodNotFound { method_name: String, class_name: String },
    /// The entry point does not match the requested callable shape.
    BindingMismatch { message: String },
    /// Arguments passed to a bound callable do not match its shape.
    ArgumentMismatch { message: String },
    /// Compiled code raised an exception.
    Runtime { exception: ExceptionKind, message: String },
}

impl Error {
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Error::InvalidInput {
            message: message.into(),
        }
    }

    pub fn binding_mismatch(message: impl Into<String>) -> Self {
        Error::BindingMismatch {
            message: message.into(),
        }
    }

    pub fn argument_mismatch(message: impl Into<String>) -> Self {
        Error::ArgumentMismatch {
            message: message.into(),
        }
    }

    pub fn load_failed(message: impl Into<String>) -> Self {
        Error::LoadFailed {
            message: message.into(),
        }
    }

    /// The stage whose failure this error reports.
    pub fn stage(&self) -> Stage {
        match self {
            Error::PlatformUnsupported { .. } | Error::InvalidInput { .. } => Stage::Requested,
            Error::CompilationFailed { .. } | Error::LoadFailed { .. } => Stage::Generated,
            Error::TypeNotFound { .. } | Error::MethodNotFound { .. } => Stage::Compiled,
            Error::BindingMismatch { .. } => Stage::Resolved,
            Error::ArgumentMismatch { .. } | Error::Runtime { .. } => Stage::Bound,
        }
    }

    /// Diagnostics carried by a `CompilationFailed` error (empty otherwise).
    pub fn diagnostics(&self) -> &[Diagnostic] {
        match self {
            Error::CompilationFailed { diagnostics } => diagnostics,
            _ => &[],
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::PlatformUnsupported { message }
            | Error::InvalidInput { message }
            | Error::BindingMismatch { message }
            | Error::ArgumentMismatch { message } => write!(f, "{message}"),
            Error::CompilationFailed { diagnostics } => {
                write!(f, "One or more errors happened during compilation:")?;
                for diagnostic in diagnostics {
                    write!(f, "\n{diagnostic}")?;
                }
                Ok(())
            }
            Error::LoadFailed { message } => write!(f, "Failed to load compiled image: {message}"),
            Error::TypeNotFound { class_name, .. } => {
                write!(f, "Cannot find the class {class_name} in the given assembly.")
            }
            Error::MethodNotFound {
                method_name,
                class_name,
            } => write!(
                f,
                "Cannot find the method {method_name} of the class {class_name} in the given assembly, although the class is present."
            ),
            Error::Runtime { exception, message } => write!(f, "{exception}: {message}"),
        }
    }
}

impl std::error::Error for Error {}

impl From<RuntimeError> for Error {
    fn from(e: RuntimeError) -> Self {
        Error::Runtime {
            exception: e.kind,
            message: e.message,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn compilation_failed_lists_every_diagnostic() {
        let err = Error::CompilationFailed {
            diagnostics: vec![
                Diagnostic::error("CS0029", "Cannot implicitly convert type 'string' to 'int'"),
                Diagnostic::error("CS1002", "; expected"),
            ],
        };
        assert_eq!(
            err.to_string(),
            "One or more errors happened during compilation:\n\
             CS0029: Cannot implicitly convert type 'string' to 'int'\n\
             CS1002: ; expected"
        );
        assert_eq!(err.diagnostics().len(), 2);
    }

    #[test]
    fn escalated_warning_is_blocking() {
        let warning = Diagnostic::warning("CS0219", "unused");
        assert!(!warning.is_blocking());
        let escalated = warning.escalate();
        assert!(escalated.is_blocking());
        assert!(escalated.is_warning_as_error);
        assert_eq!(escalated.severity, Severity::Error);
    }

    #[test]
    fn errors_serialize_with_code_tag() {
        let err = Error::MethodNotFound {
            method_name: "Run".into(),
            class_name: "Executer".into(),
        };
        let json = serde_json::to_value(&err).unwrap();
        assert_eq!(json["code"], "MethodNotFound");
        assert_eq!(json["detail"]["method_name"], "Run");
    }

    #[test]
    fn stages_follow_the_pipeline() {
        assert_eq!(Error::invalid_input("x").stage(), Stage::Requested);
        assert_eq!(Error::CompilationFailed { diagnostics: vec![] }.stage(), Stage::Generated);
        assert_eq!(
            Error::TypeNotFound { class_name: "C".into(), full_name: "N.C".into() }.stage(),
            Stage::Compiled
        );
        assert_eq!(Error::binding_mismatch("x").stage(), Stage::Resolved);
        assert_eq!(Error::from(RuntimeError::divide_by_zero()).stage(), Stage::Bound);
    }
}
