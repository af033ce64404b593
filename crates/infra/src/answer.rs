//! Accept/reject answers for inbound commercial invoices.
//!
//! Preconditions are decided by the [`InboundInvoice`] aggregate before the
//! network is touched. The aggregate only moves to `in_process` once the
//! remote side reports the answer as completed.

use std::sync::Arc;

use tracing::{info, warn};

use einvoice_core::{Aggregate, DomainError, InvoiceUuid};
use einvoice_invoicing::{AnswerCommand, AnswerEvent, AnswerOutcome, AnswerState, AnswerType, InboundInvoice};
use einvoice_transfer::{OperationResult, SessionManager};
use einvoice_ubl::{AnswerDocument, build_answer_xml};

use crate::error::ServiceError;
use crate::notify::{NotificationSink, StatusChange, Track};
use crate::retry::{RetryPolicy, retry};
use crate::store::{Direction, InvoiceHeader, InvoiceStore};

/// What an answer call produced.
#[derive(Debug, Clone)]
pub struct AnswerReceipt {
    pub result: OperationResult,
    /// The ApplicationResponse built for the answer, kept for archiving.
    pub document: AnswerDocument,
    pub xml: String,
    /// Answer state after the call.
    pub state: AnswerState,
}

pub struct AnswerProtocol {
    sessions: Arc<SessionManager>,
    store: Arc<dyn InvoiceStore>,
    sink: Arc<dyn NotificationSink>,
    direct_send: bool,
}

impl AnswerProtocol {
    pub fn new(
        sessions: Arc<SessionManager>,
        store: Arc<dyn InvoiceStore>,
        sink: Arc<dyn NotificationSink>,
    ) -> Self {
        Self {
            sessions,
            store,
            sink,
            direct_send: true,
        }
    }

    /// Whether answers are delivered immediately or left for manual release.
    pub fn with_direct_send(mut self, direct_send: bool) -> Self {
        self.direct_send = direct_send;
        self
    }

    /// Answer `invoice`. Rejections require a note.
    ///
    /// Business-rule failures (already answered, answer in flight, not
    /// fetched, non-commercial profile, missing note) are returned without
    /// any remote call. A call the remote side reports as not completed
    /// leaves the invoice in `waiting_answer`.
    pub fn answer(
        &self,
        invoice: &mut InboundInvoice,
        outcome: AnswerOutcome,
        note: Option<&str>,
    ) -> Result<AnswerReceipt, ServiceError> {
        let uuid = invoice.uuid();
        let events = invoice.handle(&AnswerCommand::Submit {
            outcome,
            note: note.map(str::to_string),
        })?;
        let note = events.iter().find_map(|e| match e {
            AnswerEvent::AnswerSubmitted { note, .. } => note.clone(),
            _ => None,
        });

        let document = AnswerDocument::new(uuid, outcome, note.clone());
        let xml = build_answer_xml(&document)?;

        let result = self.sessions.with_session(|client, session| {
            client.answer_invoice(session, uuid, outcome, note.as_deref(), self.direct_send)
        })?;

        let before = invoice.answer_state();
        if result.completed {
            for event in &events {
                invoice.apply(event);
            }
            info!(invoice_uuid = %uuid, outcome = outcome.code(), "answer submitted");
        } else {
            warn!(
                invoice_uuid = %uuid,
                description = result.description.as_deref().unwrap_or(""),
                "answer not completed by remote side"
            );
        }
        self.persist(invoice, before, result.description.clone())?;

        Ok(AnswerReceipt {
            state: invoice.answer_state(),
            result,
            document,
            xml,
        })
    }

    /// Load a stored inbound invoice and answer it.
    pub fn answer_by_uuid(
        &self,
        uuid: InvoiceUuid,
        outcome: AnswerOutcome,
        note: Option<&str>,
    ) -> Result<AnswerReceipt, ServiceError> {
        let header = self.store.require_header(uuid)?;
        if header.direction != Direction::Inbound {
            return Err(DomainError::validation(format!("invoice {uuid} is not an inbound invoice")).into());
        }
        let mut invoice = header.answer_aggregate();
        self.answer(&mut invoice, outcome, note)
    }

    /// Apply a remote answer status to an answer in flight.
    ///
    /// `delivered` confirms the submitted answer, `cancelled` records a
    /// remote rejection. Returns whether the invoice changed.
    pub fn reconcile(
        &self,
        invoice: &mut InboundInvoice,
        observed_state: AnswerState,
        observed_type: AnswerType,
    ) -> Result<bool, ServiceError> {
        if invoice.answer_state().is_terminal() {
            return Ok(false);
        }
        let command = match observed_state {
            AnswerState::Delivered => AnswerCommand::Confirm {
                reported_type: Some(observed_type),
            },
            AnswerState::Cancelled => AnswerCommand::Cancel {
                reported_type: Some(observed_type),
            },
            _ => return Ok(false),
        };

        let before = invoice.answer_state();
        einvoice_core::execute(invoice, &command)?;
        info!(
            invoice_uuid = %invoice.uuid(),
            state = %invoice.answer_state(),
            answer_type = %invoice.answer_type(),
            "answer reconciled"
        );
        self.persist(invoice, before, None)?;
        Ok(true)
    }

    /// Query the remote answer state of every stored inbound invoice whose
    /// answer is `in_process` and reconcile it. Returns how many changed.
    pub fn reconcile_pending(&self, policy: &RetryPolicy) -> Result<usize, ServiceError> {
        let mut changed = 0;
        for header in self.store.list_headers(Some(Direction::Inbound))? {
            if header.answer_state != AnswerState::InProcess {
                continue;
            }
            let uuid = header.uuid;
            let status = retry(policy, || {
                self.sessions
                    .with_session(|client, session| client.query_invoice_status(session, uuid))
            })?;
            let mut invoice = header.answer_aggregate();
            if self.reconcile(&mut invoice, status.answer_state, status.answer_type)? {
                changed += 1;
            }
        }
        Ok(changed)
    }

    fn persist(
        &self,
        invoice: &InboundInvoice,
        before: AnswerState,
        description: Option<String>,
    ) -> Result<(), ServiceError> {
        let mut header = match self.store.header(invoice.uuid())? {
            Some(header) => header,
            None => match invoice.info() {
                Some(info) => InvoiceHeader::inbound(info),
                None => return Ok(()),
            },
        };
        header.record_answer(invoice);
        self.store.upsert_header(header)?;

        if before != invoice.answer_state() {
            self.sink.notify(
                &StatusChange::new(invoice.uuid(), Track::Answer, Some(before), invoice.answer_state())
                    .with_description(description),
            );
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use einvoice_core::{Classify, ErrorKind, execute};
    use einvoice_invoicing::InvoiceProfile;
    use einvoice_transfer::envelope::response;
    use einvoice_transfer::{ClientConfig, Credentials, ScriptedTransport, TransferClient};

    use crate::notify::InMemoryNotificationSink;
    use crate::store::InMemoryInvoiceStore;
    use crate::store::fixtures::purchase_info;

    struct Harness {
        transport: Arc<ScriptedTransport>,
        store: Arc<InMemoryInvoiceStore>,
        sink: Arc<InMemoryNotificationSink>,
        protocol: AnswerProtocol,
    }

    fn harness() -> Harness {
        let transport = Arc::new(ScriptedTransport::new());
        let client = TransferClient::new(transport.clone(), &ClientConfig::default());
        let sessions = Arc::new(SessionManager::new(Arc::new(client), Credentials::new("user", "secret")));
        let store = Arc::new(InMemoryInvoiceStore::new());
        let sink = Arc::new(InMemoryNotificationSink::new());
        let protocol = AnswerProtocol::new(sessions, store.clone(), sink.clone());
        Harness {
            transport,
            store,
            sink,
            protocol,
        }
    }

    fn fetched(profile: InvoiceProfile) -> InboundInvoice {
        let info = purchase_info(profile);
        let mut invoice = InboundInvoice::empty(info.uuid);
        execute(&mut invoice, &AnswerCommand::Fetch(info)).unwrap();
        invoice
    }

    fn answer_ok(completed: bool) -> String {
        response(
            "SetPurchaseInvoiceAnswerWithInvoiceUUID",
            &format!("<OperationCompleted>{completed}</OperationCompleted><Description>ok</Description>"),
        )
    }

    #[test]
    fn accept_moves_to_in_process_and_persists() {
        let h = harness();
        h.transport.push_ok(response("Login", "tok")).push_ok(answer_ok(true));
        let mut invoice = fetched(InvoiceProfile::Commercial);

        let receipt = h.protocol.answer(&mut invoice, AnswerOutcome::Accepted, None).unwrap();
        assert!(receipt.result.completed);
        assert_eq!(receipt.state, AnswerState::InProcess);
        assert!(receipt.xml.contains("KABUL"));

        let header = h.store.require_header(invoice.uuid()).unwrap();
        assert_eq!(header.answer_state, AnswerState::InProcess);
        assert_eq!(header.submitted_answer, Some(AnswerOutcome::Accepted));
        assert_eq!(h.sink.for_track(Track::Answer).len(), 1);

        let requests = h.transport.requests();
        assert_eq!(requests[1].operation(), "SetPurchaseInvoiceAnswerWithInvoiceUUID");
        assert!(requests[1].body.contains(&invoice.uuid().to_string()));
    }

    #[test]
    fn answering_twice_makes_no_network_call() {
        let h = harness();
        h.transport.push_ok(response("Login", "tok")).push_ok(answer_ok(true));
        let mut invoice = fetched(InvoiceProfile::Commercial);
        h.protocol.answer(&mut invoice, AnswerOutcome::Accepted, None).unwrap();
        h.protocol
            .reconcile(&mut invoice, AnswerState::Delivered, AnswerType::Unknown)
            .unwrap();
        assert_eq!(invoice.answer_type(), AnswerType::Accepted);
        let calls = h.transport.call_count();

        let err = h
            .protocol
            .answer(&mut invoice, AnswerOutcome::Rejected, Some("too late"))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::BusinessRule);
        assert_eq!(h.transport.call_count(), calls);
    }

    #[test]
    fn answer_in_flight_is_rejected_locally() {
        let h = harness();
        h.transport.push_ok(response("Login", "tok")).push_ok(answer_ok(true));
        let mut invoice = fetched(InvoiceProfile::Commercial);
        h.protocol.answer(&mut invoice, AnswerOutcome::Accepted, None).unwrap();

        let err = h.protocol.answer(&mut invoice, AnswerOutcome::Accepted, None).unwrap_err();
        assert!(matches!(err, ServiceError::Domain(DomainError::Conflict(_))));
        assert_eq!(h.transport.call_count(), 2);
    }

    #[test]
    fn rejection_without_note_and_basic_profile_never_reach_network() {
        let h = harness();
        let mut commercial = fetched(InvoiceProfile::Commercial);
        assert!(h.protocol.answer(&mut commercial, AnswerOutcome::Rejected, Some("  ")).is_err());

        let mut basic = fetched(InvoiceProfile::Basic);
        assert!(h.protocol.answer(&mut basic, AnswerOutcome::Accepted, None).is_err());

        let mut unfetched = InboundInvoice::empty(InvoiceUuid::new());
        assert!(h.protocol.answer(&mut unfetched, AnswerOutcome::Accepted, None).is_err());

        assert_eq!(h.transport.call_count(), 0);
    }

    #[test]
    fn not_completed_keeps_waiting_answer() {
        let h = harness();
        h.transport.push_ok(response("Login", "tok")).push_ok(answer_ok(false));
        let mut invoice = fetched(InvoiceProfile::Commercial);

        let receipt = h
            .protocol
            .answer(&mut invoice, AnswerOutcome::Rejected, Some("wrong price"))
            .unwrap();
        assert!(!receipt.result.completed);
        assert_eq!(receipt.state, AnswerState::WaitingAnswer);
        assert_eq!(invoice.answer_state(), AnswerState::WaitingAnswer);
        assert!(h.sink.for_track(Track::Answer).is_empty());
    }

    #[test]
    fn remote_rejection_reconciles_to_cancelled() {
        let h = harness();
        h.transport.push_ok(response("Login", "tok")).push_ok(answer_ok(true));
        let mut invoice = fetched(InvoiceProfile::Commercial);
        h.protocol
            .answer(&mut invoice, AnswerOutcome::Rejected, Some("wrong price"))
            .unwrap();

        assert!(h
            .protocol
            .reconcile(&mut invoice, AnswerState::Cancelled, AnswerType::Unknown)
            .unwrap());
        assert_eq!(invoice.answer_state(), AnswerState::Cancelled);
        assert_eq!(invoice.answer_type(), AnswerType::Returned);
        assert!(!h
            .protocol
            .reconcile(&mut invoice, AnswerState::Delivered, AnswerType::Accepted)
            .unwrap());

        let header = h.store.require_header(invoice.uuid()).unwrap();
        assert_eq!(header.answer_state, AnswerState::Cancelled);
        assert_eq!(header.answer_note.as_deref(), Some("wrong price"));
    }

    fn no_retry() -> RetryPolicy {
        RetryPolicy::fixed(1, std::time::Duration::ZERO)
    }

    /// Status response carrying answer state and type wire codes.
    fn answer_status(state: i32, answer_type: i32) -> String {
        response(
            "GetSalesInvoiceStatusWithInvoiceUUID",
            &format!(
                "<StateCode>5</StateCode><AnswerStateCode>{state}</AnswerStateCode><AnswerTypeCode>{answer_type}</AnswerTypeCode>"
            ),
        )
    }

    #[test]
    fn pending_answers_reconcile_from_remote_status() {
        let h = harness();
        h.transport
            .push_ok(response("Login", "tok"))
            .push_ok(answer_ok(true))
            .push_ok(answer_status(5, 4));
        let waiting = purchase_info(InvoiceProfile::Commercial);
        h.store.upsert_header(InvoiceHeader::inbound(&waiting)).unwrap();
        let mut invoice = fetched(InvoiceProfile::Commercial);
        h.protocol.answer(&mut invoice, AnswerOutcome::Accepted, None).unwrap();

        let changed = h.protocol.reconcile_pending(&no_retry()).unwrap();
        assert_eq!(changed, 1);
        let header = h.store.require_header(invoice.uuid()).unwrap();
        assert_eq!(header.answer_state, AnswerState::Delivered);
        assert_eq!(header.answer_type, AnswerType::Accepted);
        assert_eq!(h.store.require_header(waiting.uuid).unwrap().answer_state, AnswerState::WaitingAnswer);

        // Only the in-flight invoice was queried.
        let requests = h.transport.requests();
        assert_eq!(requests.len(), 3);
        assert!(requests[2].body.contains(&invoice.uuid().to_string()));
        assert_eq!(h.protocol.reconcile_pending(&no_retry()).unwrap(), 0);
    }

    #[test]
    fn pending_answer_still_in_process_is_left_alone() {
        let h = harness();
        h.transport
            .push_ok(response("Login", "tok"))
            .push_ok(answer_ok(true))
            .push_ok(answer_status(3, 1));
        let mut invoice = fetched(InvoiceProfile::Commercial);
        h.protocol.answer(&mut invoice, AnswerOutcome::Accepted, None).unwrap();

        assert_eq!(h.protocol.reconcile_pending(&no_retry()).unwrap(), 0);
        let header = h.store.require_header(invoice.uuid()).unwrap();
        assert_eq!(header.answer_state, AnswerState::InProcess);
        assert_eq!(h.sink.for_track(Track::Answer).len(), 1);
    }

    #[test]
    fn answer_by_uuid_loads_stored_invoice() {
        let h = harness();
        h.transport.push_ok(response("Login", "tok")).push_ok(answer_ok(true));
        let info = purchase_info(InvoiceProfile::Commercial);
        h.store.upsert_header(InvoiceHeader::inbound(&info)).unwrap();

        let receipt = h
            .protocol
            .answer_by_uuid(info.uuid, AnswerOutcome::Accepted, None)
            .unwrap();
        assert_eq!(receipt.state, AnswerState::InProcess);

        let missing = h
            .protocol
            .answer_by_uuid(InvoiceUuid::new(), AnswerOutcome::Accepted, None)
            .unwrap_err();
        assert!(matches!(missing, ServiceError::Store(_)));
    }
}
