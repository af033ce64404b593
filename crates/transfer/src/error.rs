use std::fmt;

use thiserror::Error;

use einvoice_core::{Classify, DomainError, ErrorKind};
use einvoice_ubl::UblError;

/// Why the remote side refused us.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthFailure {
    InvalidCredentials,
    SessionExpired,
}

impl fmt::Display for AuthFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuthFailure::InvalidCredentials => f.write_str("invalid credentials"),
            AuthFailure::SessionExpired => f.write_str("session expired or invalid"),
        }
    }
}

#[derive(Debug, Error)]
pub enum TransferError {
    #[error("authentication failed ({reason}): {message}")]
    Authentication { reason: AuthFailure, message: String },

    #[error("transient network failure: {0}")]
    Transient(String),

    /// Malformed or unexpected response. `raw` holds the response body when
    /// one was received.
    #[error("protocol error: {message}")]
    Protocol { message: String, raw: Option<String> },

    #[error("integrity check failed: expected digest {expected}, got {actual}")]
    Integrity { expected: String, actual: String },

    #[error(transparent)]
    BusinessRule(#[from] DomainError),
}

impl TransferError {
    pub fn protocol(message: impl Into<String>, raw: Option<&str>) -> Self {
        TransferError::Protocol {
            message: message.into(),
            raw: raw.map(str::to_string),
        }
    }

    pub fn session_expired(message: impl Into<String>) -> Self {
        TransferError::Authentication {
            reason: AuthFailure::SessionExpired,
            message: message.into(),
        }
    }

    pub fn invalid_credentials(message: impl Into<String>) -> Self {
        TransferError::Authentication {
            reason: AuthFailure::InvalidCredentials,
            message: message.into(),
        }
    }

    pub fn is_session_expired(&self) -> bool {
        matches!(
            self,
            TransferError::Authentication {
                reason: AuthFailure::SessionExpired,
                ..
            }
        )
    }

    /// Raw response body attached to a protocol error.
    pub fn raw_response(&self) -> Option<&str> {
        match self {
            TransferError::Protocol { raw, .. } => raw.as_deref(),
            _ => None,
        }
    }
}

impl Classify for TransferError {
    fn kind(&self) -> ErrorKind {
        match self {
            TransferError::Authentication { .. } => ErrorKind::Authentication,
            TransferError::Transient(_) => ErrorKind::TransientNetwork,
            TransferError::Protocol { .. } => ErrorKind::Protocol,
            TransferError::Integrity { .. } => ErrorKind::Integrity,
            TransferError::BusinessRule(_) => ErrorKind::BusinessRule,
        }
    }
}

impl From<UblError> for TransferError {
    fn from(err: UblError) -> Self {
        match err {
            UblError::Domain(domain) => TransferError::BusinessRule(domain),
            UblError::DigestMismatch { expected, actual } => {
                TransferError::Integrity { expected, actual }
            }
            other => TransferError::Integrity {
                expected: "readable payload".to_string(),
                actual: other.to_string(),
            },
        }
    }
}
