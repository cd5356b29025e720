//! Shared diagnostic representation produced by the semantic, type and effect
//! passes and consumed by the repair suggester and editor service.

use serde::{Deserialize, Serialize};

/// Severity of a [`Diagnostic`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Error,
    Warning,
}

/// Stable diagnostic code, surfaced verbatim over the wire (spec.md §6).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Code {
    JsonParse,
    SchemaError,
    UndefinedVariable,
    UnknownFunctionCall,
    UnknownFunctionRef,
    ArityMismatch,
    InvalidFunctionRef,
    Rebind,
    ReservedName,
    UnreachableStatement,
    MissingReturn,
    InvalidStmt,
    InvalidExpr,
    TypeMismatch,
    ReturnTypeMismatch,
    UnknownField,
    TestArityMismatch,
    NotPure,
    MissingEffect,
    TestFailed,
    TestError,
}

impl Code {
    #[must_use]
    pub fn severity(self) -> Severity {
        match self {
            Code::UnreachableStatement | Code::NotPure => Severity::Warning,
            _ => Severity::Error,
        }
    }

    /// Codes the repair suggester (component I) knows how to fix.
    #[must_use]
    pub fn is_repairable(self) -> bool {
        matches!(self, Code::MissingReturn | Code::NotPure | Code::MissingEffect)
    }
}

/// One diagnostic, addressed by JSON pointer into the module AST.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnostic {
    pub pointer: String,
    pub code: Code,
    pub severity: Severity,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl Diagnostic {
    #[must_use]
    pub fn new(pointer: impl Into<String>, code: Code, message: impl Into<String>) -> Self {
        Self {
            pointer: pointer.into(),
            code,
            severity: code.severity(),
            message: message.into(),
            detail: None,
        }
    }

    #[must_use]
    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }

    #[must_use]
    pub fn is_error(&self) -> bool {
        self.severity == Severity::Error
    }
}

/// Multiset of `(code, pointer)` pairs, used by the editor service's
/// pre-validation regression checks (spec.md §4.J).
#[must_use]
pub fn key_set(diags: &[Diagnostic]) -> std::collections::BTreeSet<(Code, String)> {
    diags.iter().map(|d| (d.code, d.pointer.clone())).collect()
}
