use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::AopError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Error,
    Warning,
    Info,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiagnosticKind {
    UnresolvedType,
    MalformedPointcut,
    Configuration,
    Other,
}

/// A problem found while building one resource, anchored at a line of that resource.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Diagnostic {
    pub resource: String,
    /// 1-based line, or -1 when unknown.
    pub line: i64,
    pub severity: Severity,
    pub kind: DiagnosticKind,
    pub message: String,
}

impl Diagnostic {
    pub fn new(
        severity: Severity,
        kind: DiagnosticKind,
        resource: impl Into<String>,
        line: i64,
        message: impl Into<String>,
    ) -> Self {
        Self {
            resource: resource.into(),
            line,
            severity,
            kind,
            message: message.into(),
        }
    }

    pub fn warning(resource: impl Into<String>, line: i64, message: impl Into<String>) -> Self {
        Self::new(Severity::Warning, DiagnosticKind::Configuration, resource, line, message)
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let severity = match self.severity {
            Severity::Error => "error",
            Severity::Warning => "warning",
            Severity::Info => "info",
        };
        if self.line >= 0 {
            write!(f, "{}:{}: {severity}: {}", self.resource, self.line, self.message)
        } else {
            write!(f, "{}: {severity}: {}", self.resource, self.message)
        }
    }
}

/// Maps a matching or extraction failure to a diagnostic.
///
/// Unresolved types point at the target bean when one is known, malformed
/// pointcuts at the definition. Everything else is a warning.
pub fn classify(err: &AopError, resource: &str, definition_line: i64, target_line: Option<i64>) -> Diagnostic {
    match err.root_cause() {
        AopError::UnresolvedType { class_name } => Diagnostic::new(
            Severity::Error,
            DiagnosticKind::UnresolvedType,
            resource,
            target_line.unwrap_or(definition_line),
            format!("Unresolvable type '{class_name}'"),
        ),
        root @ AopError::MalformedPointcut { .. } => Diagnostic::new(
            Severity::Error,
            DiagnosticKind::MalformedPointcut,
            resource,
            definition_line,
            root.to_string(),
        ),
        root => Diagnostic::new(
            Severity::Warning,
            DiagnosticKind::Other,
            resource,
            definition_line,
            root.to_string(),
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unresolved_types_point_at_the_target_bean() {
        let err = AopError::unresolved("com.example.Missing").wrap("matching");
        let diagnostic = classify(&err, "app.xml", 10, Some(42));
        assert_eq!(diagnostic.severity, Severity::Error);
        assert_eq!(diagnostic.kind, DiagnosticKind::UnresolvedType);
        assert_eq!(diagnostic.line, 42);
        assert!(diagnostic.message.contains("com.example.Missing"));

        assert_eq!(classify(&AopError::unresolved("X"), "app.xml", 10, None).line, 10);
    }

    #[test]
    fn malformed_pointcuts_are_errors_at_the_definition() {
        let err = AopError::malformed("call(* *(..))", "Unsupported pointcut primitive 'call'")
            .wrap("building matcher")
            .wrap("matching bean");
        let diagnostic = classify(&err, "app.xml", 7, Some(42));
        assert_eq!(diagnostic.kind, DiagnosticKind::MalformedPointcut);
        assert_eq!(diagnostic.line, 7);
        assert!(diagnostic.message.contains("Unsupported pointcut primitive"));
    }

    #[test]
    fn causeless_invocation_failures_are_warnings() {
        let err = AopError::Invocation {
            context: "advice adapter failed".to_string(),
            cause: None,
        };
        let diagnostic = classify(&err, "app.xml", 3, None);
        assert_eq!(diagnostic.severity, Severity::Warning);
        assert_eq!(diagnostic.message, "advice adapter failed");
        assert_eq!(diagnostic.to_string(), "app.xml:3: warning: advice adapter failed");
    }
}
