//! Caller-facing shape of a failed command.

use serde_json::json;

use einvoice_core::{Classify, DomainError, ErrorKind, ErrorReport};
use einvoice_infra::{ServiceError, StoreError};
use einvoice_transfer::TransferError;

/// Exit status when the same command may succeed later.
pub const EXIT_RETRYABLE: i32 = 75;

/// Exit status for every other failure.
pub const EXIT_FATAL: i32 = 1;

/// Reduce `err` to `{kind, message, retryable}`.
///
/// Kind and retryability come from the first classified error in the
/// chain. Errors raised before any service was involved (unreadable
/// input, bad configuration) report as non-retryable business rules. The
/// message is the full context chain.
pub fn report(err: &anyhow::Error) -> ErrorReport {
    let classified = err.chain().find_map(|cause| {
        if let Some(e) = cause.downcast_ref::<ServiceError>() {
            Some(e.report())
        } else if let Some(e) = cause.downcast_ref::<TransferError>() {
            Some(e.report())
        } else if let Some(e) = cause.downcast_ref::<StoreError>() {
            Some(e.report())
        } else {
            cause.downcast_ref::<DomainError>().map(|e| e.report())
        }
    });

    let (kind, retryable) = classified
        .map(|r| (r.kind, r.retryable))
        .unwrap_or((ErrorKind::BusinessRule, false));
    ErrorReport {
        kind,
        message: format!("{err:#}"),
        retryable,
    }
}

pub fn exit_code(report: &ErrorReport) -> i32 {
    if report.retryable { EXIT_RETRYABLE } else { EXIT_FATAL }
}

/// `{"error": {...}}` under `json`, one line of text otherwise.
pub fn render(report: &ErrorReport, json: bool) -> String {
    if json {
        format!("{:#}", json!({ "error": report }))
    } else {
        let retry = if report.retryable { ", retryable" } else { "" };
        format!("Error [{}{retry}]: {}", report.kind, report.message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Context;

    #[test]
    fn context_does_not_hide_the_classified_error() {
        let err: Result<(), ServiceError> = Err(TransferError::Transient("HTTP 504".into()).into());
        let err = err.context("querying status").unwrap_err();

        let report = report(&err);
        assert_eq!(report.kind, ErrorKind::TransientNetwork);
        assert!(report.retryable);
        assert_eq!(report.message, "querying status: transient network failure: HTTP 504");
        assert_eq!(exit_code(&report), EXIT_RETRYABLE);
    }

    #[test]
    fn unclassified_errors_are_fatal_business_rules() {
        let err = anyhow::anyhow!("reading invoice.json: No such file or directory");
        let report = report(&err);
        assert_eq!(report.kind, ErrorKind::BusinessRule);
        assert!(!report.retryable);
        assert_eq!(exit_code(&report), EXIT_FATAL);
        assert_eq!(
            render(&report, false),
            "Error [business_rule]: reading invoice.json: No such file or directory"
        );
    }

    #[test]
    fn parse_failures_keep_their_domain_kind() {
        let err = anyhow::Error::from(DomainError::invalid_id("InvoiceUuid: not-a-uuid"));
        let rendered = render(&report(&err), true);
        let value: serde_json::Value = serde_json::from_str(&rendered).unwrap();
        assert_eq!(value["error"]["kind"], "business_rule");
        assert_eq!(value["error"]["retryable"], false);
    }
}
