use thiserror::Error;

use einvoice_core::{Classify, DomainError, ErrorKind};
use einvoice_invoicing::{InvoiceState, TransferState};
use einvoice_transfer::TransferError;
use einvoice_ubl::UblError;

use crate::poller::PollError;
use crate::store::StoreError;

/// Error returned by the orchestration services.
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error(transparent)]
    Domain(#[from] DomainError),

    #[error(transparent)]
    Ubl(#[from] UblError),

    #[error(transparent)]
    Transfer(#[from] TransferError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    TransferPoll(#[from] PollError<TransferState>),

    #[error(transparent)]
    InvoicePoll(#[from] PollError<InvoiceState>),
}

impl Classify for ServiceError {
    fn kind(&self) -> ErrorKind {
        match self {
            ServiceError::Domain(e) => e.kind(),
            ServiceError::Ubl(e) => e.kind(),
            ServiceError::Transfer(e) => e.kind(),
            ServiceError::Store(e) => e.kind(),
            ServiceError::TransferPoll(e) => e.kind(),
            ServiceError::InvoicePoll(e) => e.kind(),
        }
    }

    fn retryable(&self) -> bool {
        match self {
            ServiceError::Domain(e) => e.retryable(),
            ServiceError::Ubl(e) => e.retryable(),
            ServiceError::Transfer(e) => e.retryable(),
            ServiceError::Store(e) => e.retryable(),
            ServiceError::TransferPoll(e) => e.retryable(),
            ServiceError::InvoicePoll(e) => e.retryable(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reports_keep_the_inner_classification() {
        let err = ServiceError::from(TransferError::Transient("HTTP 503".into()));
        let report = err.report();
        assert_eq!(report.kind, ErrorKind::TransientNetwork);
        assert!(report.retryable);

        let err = ServiceError::from(DomainError::conflict("invoice already answered"));
        assert_eq!(err.kind(), ErrorKind::BusinessRule);
        assert!(!err.retryable());
    }
}
