//! Error taxonomy.
//!
//! Every failure that reaches a caller (UI, orchestrator, worker) is reduced
//! to an [`ErrorReport`]: a stable `{kind, message, retryable}` shape that does
//! not depend on which internal step failed.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type used across the domain layer.
pub type DomainResult<T> = Result<T, DomainError>;

/// Domain-level error.
///
/// These are deterministic business-rule failures (validation, invariants,
/// conflicts). They are always raised before any network call is made.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// A value failed validation (e.g. negative quantity).
    #[error("validation failed: {0}")]
    Validation(String),

    /// A domain invariant was violated.
    #[error("invariant violated: {0}")]
    InvariantViolation(String),

    /// An identifier was invalid (e.g. parse failure).
    #[error("invalid identifier: {0}")]
    InvalidId(String),

    /// A requested record was not found.
    #[error("not found")]
    NotFound,

    /// The operation conflicts with the current state (e.g. answering twice).
    #[error("conflict: {0}")]
    Conflict(String),
}

impl DomainError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn invariant(msg: impl Into<String>) -> Self {
        Self::InvariantViolation(msg.into())
    }

    pub fn invalid_id(msg: impl Into<String>) -> Self {
        Self::InvalidId(msg.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }

    pub fn not_found() -> Self {
        Self::NotFound
    }
}

/// Classified failure kind.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Bad credentials or a session the remote side rejected.
    Authentication,
    /// Timeout, connection reset, gateway errors.
    TransientNetwork,
    /// Malformed or incomplete response, or a remote protocol violation.
    Protocol,
    /// Digest mismatch between local and remote views of a payload.
    Integrity,
    /// Rejected locally before any network call.
    BusinessRule,
}

impl ErrorKind {
    /// Whether a caller may retry the same operation (with backoff).
    pub fn is_retryable(self) -> bool {
        matches!(self, ErrorKind::TransientNetwork)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::Authentication => "authentication",
            ErrorKind::TransientNetwork => "transient_network",
            ErrorKind::Protocol => "protocol",
            ErrorKind::Integrity => "integrity",
            ErrorKind::BusinessRule => "business_rule",
        }
    }
}

impl core::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Caller-facing error shape.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorReport {
    pub kind: ErrorKind,
    pub message: String,
    pub retryable: bool,
}

/// Implemented by every error type that can reach a caller.
pub trait Classify: core::fmt::Display {
    fn kind(&self) -> ErrorKind;

    /// Defaults to the kind's retry semantics.
    fn retryable(&self) -> bool {
        self.kind().is_retryable()
    }

    fn report(&self) -> ErrorReport {
        ErrorReport {
            kind: self.kind(),
            message: self.to_string(),
            retryable: self.retryable(),
        }
    }
}

impl Classify for DomainError {
    fn kind(&self) -> ErrorKind {
        ErrorKind::BusinessRule
    }
}
