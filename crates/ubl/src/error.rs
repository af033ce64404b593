use thiserror::Error;

use einvoice_core::{Classify, DomainError, ErrorKind};

#[derive(Debug, Error)]
pub enum UblError {
    /// The document violates a business rule (no lines, negative amounts, ...).
    #[error(transparent)]
    Domain(#[from] DomainError),

    #[error("xml serialization failed: {0}")]
    Xml(String),

    #[error("archive error: {0}")]
    Archive(String),

    #[error("digest mismatch (expected {expected}, computed {actual})")]
    DigestMismatch { expected: String, actual: String },
}

impl Classify for UblError {
    fn kind(&self) -> ErrorKind {
        match self {
            UblError::Domain(_) => ErrorKind::BusinessRule,
            // A payload we could not produce or read back faithfully is not trustworthy.
            UblError::Xml(_) | UblError::Archive(_) | UblError::DigestMismatch { .. } => {
                ErrorKind::Integrity
            }
        }
    }
}
