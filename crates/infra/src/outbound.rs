//! Sending sales invoices and following them to a terminal state.

use std::sync::Arc;

use tracing::{info, warn};

use einvoice_core::{DomainError, InvoiceUuid, TransferId};
use einvoice_invoicing::{
    CustomerAlias, InvoiceDocument, InvoiceState, PollState, StateTracker, Totals, TransferState,
    Transition,
};
use einvoice_transfer::{SalesInvoiceStatus, SessionManager, TransferResult};
use einvoice_ubl::{build_invoice_xml, package};

use crate::error::ServiceError;
use crate::notify::{NotificationSink, StatusChange, Track};
use crate::poller::{CancelToken, StatusPoller, StatusReport};
use crate::retry::{RetryPolicy, retry};
use crate::store::{Direction, InvoiceHeader, InvoiceStore, StoreError, StoredLine};

/// Result of [`OutboundDispatcher::send`].
#[derive(Debug, Clone)]
pub struct SendReceipt {
    pub uuid: InvoiceUuid,
    pub file_name: String,
    pub totals: Totals,
    pub result: TransferResult,
}

/// Where tracking stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrackReport {
    pub transfer: TransferState,
    /// `None` when the transfer failed and the invoice was never polled.
    pub invoice: Option<InvoiceState>,
}

pub struct OutboundDispatcher {
    sessions: Arc<SessionManager>,
    store: Arc<dyn InvoiceStore>,
    sink: Arc<dyn NotificationSink>,
    poller: StatusPoller,
    retry: RetryPolicy,
    direct_send: bool,
}

impl OutboundDispatcher {
    pub fn new(
        sessions: Arc<SessionManager>,
        store: Arc<dyn InvoiceStore>,
        sink: Arc<dyn NotificationSink>,
        poller: StatusPoller,
    ) -> Self {
        Self {
            sessions,
            store,
            sink,
            poller,
            retry: RetryPolicy::default(),
            direct_send: true,
        }
    }

    /// Retry policy for one-shot status queries.
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_direct_send(mut self, direct_send: bool) -> Self {
        self.direct_send = direct_send;
        self
    }

    /// Build, package, persist and upload `doc`.
    ///
    /// The header and lines are stored as `draft` before the upload so a
    /// crash after a successful send can be resumed from the transfer id.
    /// The upload itself is never retried here.
    pub fn send(
        &self,
        doc: &InvoiceDocument,
        alias: Option<&CustomerAlias>,
    ) -> Result<SendReceipt, ServiceError> {
        if let Some(alias) = alias {
            if alias.identifier.trim() != doc.customer.identifier.trim() {
                return Err(DomainError::validation(format!(
                    "alias {} belongs to {}, not to customer {}",
                    alias.alias, alias.identifier, doc.customer.identifier
                ))
                .into());
            }
        }

        let built = build_invoice_xml(doc)?;
        let uuid = built.uuid;
        let mut file = package(&built.xml, &uuid.to_string())?.direct_send(self.direct_send);
        if let Some(alias) = alias {
            file = file.addressed_to(alias.alias.clone());
        }

        let mut header = InvoiceHeader::outbound(uuid, doc, &built.totals);
        self.store.upsert_header(header.clone())?;
        self.store.insert_lines(uuid, StoredLine::from_items(&doc.lines))?;
        info!(invoice_uuid = %uuid, number = %doc.number, file_name = file.file_name(), "invoice packaged");

        let result = self
            .sessions
            .with_session(|client, session| client.send(session, &file))?;

        match (&result.transfer_id, result.completed) {
            (Some(transfer_id), true) => {
                info!(invoice_uuid = %uuid, %transfer_id, "invoice transferred");
                header.transfer_id = Some(transfer_id.clone());
                header.touch();
                self.store.upsert_header(header)?;
            }
            _ => warn!(
                invoice_uuid = %uuid,
                description = result.description.as_deref().unwrap_or(""),
                "transfer not completed"
            ),
        }

        Ok(SendReceipt {
            uuid,
            file_name: file.file_name().to_string(),
            totals: built.totals,
            result,
        })
    }

    /// Poll the transfer and then the invoice until both are terminal,
    /// storing and announcing every change.
    pub fn track(&self, uuid: InvoiceUuid, cancel: &CancelToken) -> Result<TrackReport, ServiceError> {
        let mut header = self.outbound_header(uuid)?;
        let Some(transfer_id) = header.transfer_id.clone() else {
            return Err(DomainError::validation(format!("invoice {uuid} has no transfer id")).into());
        };
        let mut store_error: Option<StoreError> = None;

        let mut transfer = header
            .transfer_state
            .map(StateTracker::resume)
            .unwrap_or_default();
        let outcome = self.poller.poll_until_terminal(
            transfer_id.as_str(),
            &mut transfer,
            || {
                self.sessions
                    .with_session(|client, session| client.query_transfer_status(session, &transfer_id))
            },
            cancel,
            |transition, report| {
                header.transfer_state = Some(transition.state());
                self.record(&mut header, Track::Transfer, transition, report, &mut store_error);
            },
        );
        if let Some(err) = store_error.take() {
            return Err(err.into());
        }
        if outcome?.state.is_error() {
            warn!(invoice_uuid = %uuid, %transfer_id, "transfer failed");
            return Ok(TrackReport {
                transfer: TransferState::Error,
                invoice: None,
            });
        }

        let mut invoice = StateTracker::resume(header.invoice_state);
        let outcome = self.poller.poll_until_terminal(
            &uuid.to_string(),
            &mut invoice,
            || {
                self.sessions
                    .with_session(|client, session| client.query_invoice_status(session, uuid))
            },
            cancel,
            |transition, report| {
                apply_invoice_status(&mut header, report);
                self.record(&mut header, Track::Invoice, transition, report, &mut store_error);
            },
        );
        if let Some(err) = store_error {
            return Err(err.into());
        }
        let outcome = outcome?;

        Ok(TrackReport {
            transfer: TransferState::Success,
            invoice: Some(outcome.state),
        })
    }

    /// Continue tracking an invoice after a restart. Never uploads again.
    pub fn resume(&self, uuid: InvoiceUuid, cancel: &CancelToken) -> Result<TrackReport, ServiceError> {
        let header = self.outbound_header(uuid)?;
        info!(
            invoice_uuid = %uuid,
            transfer_state = ?header.transfer_state,
            invoice_state = %header.invoice_state,
            "resuming tracking"
        );
        self.track(uuid, cancel)
    }

    /// One status query (retried on transient failures). Records answer
    /// fields that arrive after the invoice itself was delivered.
    pub fn refresh(&self, uuid: InvoiceUuid) -> Result<SalesInvoiceStatus, ServiceError> {
        let mut header = self.outbound_header(uuid)?;
        let mut tracker = StateTracker::resume(header.invoice_state);
        let (transition, status) = self.poller.poll_once(&uuid.to_string(), &mut tracker, || {
            retry(&self.retry, || {
                self.sessions
                    .with_session(|client, session| client.query_invoice_status(session, uuid))
            })
        })?;

        let previous_answer = header.answer_state;
        apply_invoice_status(&mut header, &status);
        if transition.is_change() {
            self.sink.notify(
                &StatusChange::new(uuid, Track::Invoice, previous(&transition), transition.state())
                    .with_description(status.description()),
            );
        }
        if previous_answer != header.answer_state {
            self.sink.notify(&StatusChange::new(
                uuid,
                Track::Answer,
                Some(previous_answer),
                header.answer_state,
            ));
        }
        header.touch();
        self.store.upsert_header(header)?;
        Ok(status)
    }

    /// Register an invoice uploaded by an earlier process so [`pending`]
    /// picks it up. A known invoice keeps its stored state; a transfer id
    /// that disagrees with the stored one is rejected.
    ///
    /// [`pending`]: Self::pending
    pub fn adopt(&self, uuid: InvoiceUuid, transfer_id: TransferId) -> Result<(), ServiceError> {
        let Some(mut header) = self.store.header(uuid)? else {
            info!(invoice_uuid = %uuid, %transfer_id, "adopting invoice sent earlier");
            self.store.upsert_header(InvoiceHeader::adopted(uuid, transfer_id))?;
            return Ok(());
        };
        if header.direction != Direction::Outbound {
            return Err(DomainError::validation(format!("invoice {uuid} is not an outbound invoice")).into());
        }
        match &header.transfer_id {
            Some(stored) if *stored == transfer_id => Ok(()),
            Some(stored) => Err(DomainError::conflict(format!(
                "invoice {uuid} was transferred as {stored}, not {transfer_id}"
            ))
            .into()),
            None => {
                header.transfer_id = Some(transfer_id);
                header.touch();
                self.store.upsert_header(header)?;
                Ok(())
            }
        }
    }

    /// Outbound invoices that were sent but are not yet terminal.
    pub fn pending(&self) -> Result<Vec<InvoiceUuid>, ServiceError> {
        Ok(self
            .store
            .list_headers(Some(Direction::Outbound))?
            .into_iter()
            .filter(|h| h.transfer_id.is_some())
            .filter(|h| {
                !h.transfer_state.is_some_and(|s| s.is_error()) && !h.invoice_state.is_terminal()
            })
            .map(|h| h.uuid)
            .collect())
    }

    fn outbound_header(&self, uuid: InvoiceUuid) -> Result<InvoiceHeader, ServiceError> {
        let header = self.store.require_header(uuid)?;
        if header.direction != Direction::Outbound {
            return Err(DomainError::validation(format!("invoice {uuid} is not an outbound invoice")).into());
        }
        Ok(header)
    }

    fn record<R: StatusReport>(
        &self,
        header: &mut InvoiceHeader,
        track: Track,
        transition: &Transition<R::State>,
        report: &R,
        store_error: &mut Option<StoreError>,
    ) {
        header.touch();
        if let Err(err) = self.store.upsert_header(header.clone()) {
            warn!(invoice_uuid = %header.uuid, error = %err, "failed to store status change");
            store_error.get_or_insert(err);
            return;
        }
        self.sink.notify(
            &StatusChange::new(header.uuid, track, previous(transition), transition.state())
                .with_description(report.description()),
        );
    }
}

fn apply_invoice_status(header: &mut InvoiceHeader, status: &SalesInvoiceStatus) {
    header.invoice_state = status.state;
    header.answer_state = status.answer_state;
    header.answer_type = status.answer_type;
    if status.envelope_uuid.is_some() {
        header.envelope_uuid = status.envelope_uuid.clone();
    }
}

fn previous<S: Copy>(transition: &Transition<S>) -> Option<S> {
    match *transition {
        Transition::First(_) => None,
        Transition::Unchanged(s) => Some(s),
        Transition::Advanced { from, .. } => Some(from),
    }
}
