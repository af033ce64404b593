//! Inbox synchronisation: pull the list of incoming invoices and record the
//! ones not seen before.

use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info};

use einvoice_core::execute;
use einvoice_invoicing::{AnswerCommand, AnswerState, InboundInvoice};
use einvoice_transfer::SessionManager;

use crate::answer::AnswerProtocol;
use crate::error::ServiceError;
use crate::notify::{NotificationSink, StatusChange, Track};
use crate::retry::{RetryPolicy, retry};
use crate::store::{InvoiceHeader, InvoiceStore};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    pub listed: usize,
    pub new: usize,
    pub known: usize,
    /// In-flight answers that reached a final state during this run.
    pub reconciled: usize,
}

pub struct InboxSync {
    sessions: Arc<SessionManager>,
    store: Arc<dyn InvoiceStore>,
    sink: Arc<dyn NotificationSink>,
    answers: Option<Arc<AnswerProtocol>>,
    retry: RetryPolicy,
}

impl InboxSync {
    pub fn new(
        sessions: Arc<SessionManager>,
        store: Arc<dyn InvoiceStore>,
        sink: Arc<dyn NotificationSink>,
    ) -> Self {
        Self {
            sessions,
            store,
            sink,
            answers: None,
            retry: RetryPolicy::default(),
        }
    }

    /// Also reconcile answers in flight on every run.
    pub fn with_answers(mut self, answers: Arc<AnswerProtocol>) -> Self {
        self.answers = Some(answers);
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn run_once(&self) -> Result<SyncReport, ServiceError> {
        let listed = retry(&self.retry, || {
            self.sessions
                .with_session(|client, session| client.list_incoming_invoices(session))
        })?;

        let mut report = SyncReport {
            listed: listed.len(),
            ..SyncReport::default()
        };
        for info in listed {
            if self.store.header(info.uuid)?.is_some() {
                debug!(invoice_uuid = %info.uuid, "incoming invoice already known");
                report.known += 1;
                continue;
            }

            let mut invoice = InboundInvoice::empty(info.uuid);
            execute(&mut invoice, &AnswerCommand::Fetch(info.clone()))?;
            let mut header = InvoiceHeader::inbound(&info);
            header.record_answer(&invoice);
            self.store.upsert_header(header)?;

            self.sink.notify(
                &StatusChange::new(info.uuid, Track::Received, Some(AnswerState::NoAnswer), invoice.answer_state())
                    .with_description(Some(format!("{} from {}", info.invoice_number, info.sender_title))),
            );
            report.new += 1;
        }

        if let Some(answers) = &self.answers {
            report.reconciled = answers.reconcile_pending(&self.retry)?;
        }

        info!(
            listed = report.listed,
            new = report.new,
            known = report.known,
            reconciled = report.reconciled,
            "inbox synchronised"
        );
        Ok(report)
    }
}
