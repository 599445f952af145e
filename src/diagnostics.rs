//! Diagnostic codes and accumulation (C7).
//!
//! Diagnostics are never thrown: every analysis pass keeps going past the
//! first problem and returns the full set it found. A [`DiagnosticSink`] is
//! threaded through the recursive checker instead of a `Result`, mirroring
//! how the teacher crate's use cases collect `Vec<RuleViolation>` rather
//! than bailing on the first rule that fails.

use std::collections::BTreeMap;
use std::fmt;

use serde::Serialize;

/// One of the error codes from the taxonomy in the specification's §7.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    ImpossiblePolicy,
    InvalidScope,
    UnexpectedType,
    TypeMismatch,
    EmptySet,
    IncompatibleTypes,
    UnknownEntity,
    UnknownAction,
    InvalidParent,
    AttributeNotFound,
    AttributeAccess,
    LevelExceeded,
    ExtensionError,
    InvalidLiteral,
    MissingAttribute,
    UndeclaredAttribute,
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::ImpossiblePolicy => "impossible_policy",
            Self::InvalidScope => "invalid_scope",
            Self::UnexpectedType => "unexpected_type",
            Self::TypeMismatch => "type_mismatch",
            Self::EmptySet => "empty_set",
            Self::IncompatibleTypes => "incompatible_types",
            Self::UnknownEntity => "unknown_entity",
            Self::UnknownAction => "unknown_action",
            Self::InvalidParent => "invalid_parent",
            Self::AttributeNotFound => "attribute_not_found",
            Self::AttributeAccess => "attribute_access",
            Self::LevelExceeded => "level_exceeded",
            Self::ExtensionError => "extension_error",
            Self::InvalidLiteral => "invalid_literal",
            Self::MissingAttribute => "missing_attribute",
            Self::UndeclaredAttribute => "undeclared_attribute",
        };
        f.write_str(s)
    }
}

/// A single diagnostic record: a code, a human-readable message, and an
/// optional bag of structured details (`expected`, `actual`, `entityType`, ...).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Diagnostic {
    pub code: ErrorCode,
    pub message: String,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub details: BTreeMap<String, String>,
}

impl Diagnostic {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            details: BTreeMap::new(),
        }
    }

    pub fn with_detail(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.details.insert(key.into(), value.into());
        self
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)
    }
}

/// Accumulates diagnostics for a single analysis call. Cheap to create; a
/// fresh sink is built per policy/entity/request so that a failure in one
/// unit never pollutes another's results.
#[derive(Debug, Default, Clone)]
pub struct DiagnosticSink {
    diagnostics: Vec<Diagnostic>,
}

impl DiagnosticSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, diagnostic: Diagnostic) {
        self.diagnostics.push(diagnostic);
    }

    pub fn emit(&mut self, code: ErrorCode, message: impl Into<String>) {
        self.push(Diagnostic::new(code, message));
    }

    pub fn is_empty(&self) -> bool {
        self.diagnostics.is_empty()
    }

    pub fn len(&self) -> usize {
        self.diagnostics.len()
    }

    pub fn into_vec(self) -> Vec<Diagnostic> {
        self.diagnostics
    }

    pub fn as_slice(&self) -> &[Diagnostic] {
        &self.diagnostics
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sink_accumulates_in_order() {
        let mut sink = DiagnosticSink::new();
        sink.emit(ErrorCode::UnknownEntity, "boom");
        sink.emit(ErrorCode::TypeMismatch, "bang");
        assert_eq!(sink.len(), 2);
        let v = sink.into_vec();
        assert_eq!(v[0].code, ErrorCode::UnknownEntity);
        assert_eq!(v[1].code, ErrorCode::TypeMismatch);
    }

    #[test]
    fn diagnostic_display_includes_code() {
        let d = Diagnostic::new(ErrorCode::EmptySet, "cannot infer element type");
        assert_eq!(d.to_string(), "[empty_set] cannot infer element type");
    }

    #[test]
    fn diagnostic_with_detail_roundtrips() {
        let d = Diagnostic::new(ErrorCode::AttributeNotFound, "no such attribute")
            .with_detail("attribute", "name");
        assert_eq!(d.details.get("attribute").map(String::as_str), Some("name"));
    }
}
