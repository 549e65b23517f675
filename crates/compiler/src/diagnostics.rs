//! Compile-Time Diagnostics
//!
//! The compiler never throws: problems accumulate as `Diagnostic` records
//! and the host decides what to do with them. Only `Severity::Error` aborts
//! code emission for the affected function; warnings and info notes do not.
//! The records serialize to JSON for tooling (`smile --check --json`).

use serde::Serialize;
use smile_core::value::SourcePos;

/// Severity level for compiler diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Error,
}

/// One compiler message with its source position.
#[derive(Debug, Clone, Serialize)]
pub struct Diagnostic {
    pub severity: Severity,
    pub filename: String,
    /// 1-based; 0 when the position is unknown.
    pub line: u32,
    pub column: u32,
    pub message: String,
}

impl Diagnostic {
    pub fn new(severity: Severity, pos: Option<&SourcePos>, message: impl Into<String>) -> Self {
        Diagnostic {
            severity,
            filename: pos.map(|p| p.filename.to_string()).unwrap_or_default(),
            line: pos.map(|p| p.line).unwrap_or(0),
            column: pos.map(|p| p.column).unwrap_or(0),
            message: message.into(),
        }
    }

    pub fn error(pos: Option<&SourcePos>, message: impl Into<String>) -> Self {
        Diagnostic::new(Severity::Error, pos, message)
    }

    pub fn warning(pos: Option<&SourcePos>, message: impl Into<String>) -> Self {
        Diagnostic::new(Severity::Warning, pos, message)
    }
}

impl std::fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let severity = match self.severity {
            Severity::Info => "info",
            Severity::Warning => "warning",
            Severity::Error => "error",
        };
        if self.line > 0 {
            write!(
                f,
                "{}:{}:{}: {}: {}",
                self.filename, self.line, self.column, severity, self.message
            )
        } else {
            write!(f, "{}: {}", severity, self.message)
        }
    }
}

/// True if any message is an error, optionally counting warnings as errors.
pub fn has_errors(diagnostics: &[Diagnostic], warnings_as_errors: bool) -> bool {
    let floor = if warnings_as_errors {
        Severity::Warning
    } else {
        Severity::Error
    };
    diagnostics.iter().any(|d| d.severity >= floor)
}
