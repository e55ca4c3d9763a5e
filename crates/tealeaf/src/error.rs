//! Error kinds and diagnostics.
//!
//! Failures inside a path are values, not host exceptions: an evaluation that
//! goes wrong produces a `Value::Error` carrying a [`Diagnostic`], which
//! short-circuits the rest of the path until the next join. `Result` is used
//! only at phase boundaries (parsing, I/O in the driver).

use std::fmt;

use strum::{Display, EnumString, IntoStaticStr};

use crate::parse::CodeRange;

/// Categories of analysis failures, in rough order of severity.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, IntoStaticStr, serde::Serialize, serde::Deserialize,
)]
pub enum ErrorKind {
    /// An operator or handler received an ill-typed value.
    TypeMismatch,
    /// Environment lookup miss.
    UnboundName,
    /// Address not resolvable in the heap. Indicates an analyzer bug and is
    /// treated as fatal in tests.
    HeapMiss,
    /// `require` proved the negation of an obligation.
    ObligationViolated,
    /// The oracle could not decide an obligation either way.
    ObligationUnknown,
    /// Handler absent or argument outside the supported envelope.
    Unsupported,
    /// A Python-level `raise` reached the top of the path.
    Raised,
    /// Informational trace record (DEBUG lib-calls, verbose logs).
    Trace,
    /// External cancellation.
    Cancelled,
}

/// Severity of a diagnostic record.
///
/// Warnings never terminate a path; per path, the first
/// `ObligationViolated` error is fatal for that path.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Display,
    EnumString,
    serde::Serialize,
    serde::Deserialize,
)]
pub enum Severity {
    #[strum(serialize = "log")]
    Log,
    #[strum(serialize = "warning")]
    Warning,
    #[strum(serialize = "error")]
    Error,
}

/// One diagnostic record produced along a path.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Diagnostic {
    pub kind: ErrorKind,
    pub severity: Severity,
    pub message: String,
    pub span: Option<CodeRange>,
}

impl Diagnostic {
    #[must_use]
    pub fn new(kind: ErrorKind, severity: Severity, message: impl Into<String>, span: Option<CodeRange>) -> Self {
        Self {
            kind,
            severity,
            message: message.into(),
            span,
        }
    }

    #[must_use]
    pub fn error(kind: ErrorKind, message: impl Into<String>, span: Option<CodeRange>) -> Self {
        Self::new(kind, Severity::Error, message, span)
    }

    #[must_use]
    pub fn warning(kind: ErrorKind, message: impl Into<String>, span: Option<CodeRange>) -> Self {
        Self::new(kind, Severity::Warning, message, span)
    }

    #[must_use]
    pub fn log(message: impl Into<String>, span: Option<CodeRange>) -> Self {
        Self::new(ErrorKind::Trace, Severity::Log, message, span)
    }

    /// Whether this record terminates its path.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        self.severity == Severity::Error && self.kind == ErrorKind::ObligationViolated
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.span {
            Some(span) => write!(f, "{}: {} [{}] at {span}", self.severity, self.message, self.kind),
            None => write!(f, "{}: {} [{}]", self.severity, self.message, self.kind),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use super::*;

    #[test]
    fn kind_round_trips_through_strings() {
        let kind = ErrorKind::from_str("ObligationViolated").unwrap();
        assert_eq!(kind, ErrorKind::ObligationViolated);
        assert_eq!(kind.to_string(), "ObligationViolated");
    }

    #[test]
    fn only_violated_obligations_are_fatal() {
        let fatal = Diagnostic::error(ErrorKind::ObligationViolated, "rank mismatch", None);
        assert!(fatal.is_fatal());
        let soft = Diagnostic::error(ErrorKind::TypeMismatch, "bad operand", None);
        assert!(!soft.is_fatal());
        let warn = Diagnostic::warning(ErrorKind::ObligationUnknown, "cannot decide", None);
        assert!(!warn.is_fatal());
    }

    #[test]
    fn severity_orders_log_warning_error() {
        assert!(Severity::Log < Severity::Warning);
        assert!(Severity::Warning < Severity::Error);
    }
}
