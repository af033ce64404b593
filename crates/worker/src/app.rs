//! Service wiring shared by every worker command.

use std::io::BufRead;
use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use einvoice_core::{InvoiceUuid, TransferId};
use einvoice_infra::{
    AnswerProtocol, AnswerReceipt, AuditingObserver, CancelToken, Direction, InMemoryInvoiceStore,
    InboxSync, IntervalTrigger, InvoiceStore, NotificationSink, OutboundDispatcher, PollTask,
    RetryPolicy, SendReceipt, ServiceError, StatusPoller, StoreError, SyncReport, TrackReport,
    TracingNotificationSink, WorkerConfig, retry,
};
use einvoice_invoicing::{AnswerOutcome, CustomerAlias, InvoiceDocument};
use einvoice_transfer::{Credentials, SalesInvoiceStatus, SessionManager, TransferClient};

/// Outcome of [`Worker::send`].
#[derive(Debug, Clone)]
pub struct Sent {
    pub receipt: SendReceipt,
    /// `None` when tracking was skipped or the upload did not complete.
    pub tracked: Option<TrackReport>,
}

pub struct Worker {
    sessions: Arc<SessionManager>,
    store: Arc<dyn InvoiceStore>,
    dispatcher: Arc<OutboundDispatcher>,
    inbox: Arc<InboxSync>,
    answers: Arc<AnswerProtocol>,
    retry: RetryPolicy,
    inbox_interval: Duration,
}

impl Worker {
    /// Production wiring: HTTP transport, in-memory store, tracing notifications.
    pub fn from_config(cfg: &WorkerConfig) -> anyhow::Result<Self> {
        let credentials = cfg.client.require_credentials()?.clone();
        let client = TransferClient::from_config(&cfg.client)?;
        Ok(Self::assemble(
            client,
            credentials,
            Arc::new(InMemoryInvoiceStore::new()),
            Arc::new(TracingNotificationSink),
            cfg,
        ))
    }

    /// Wire the services around an existing client. Every remote exchange
    /// is audited into `store`.
    pub fn assemble(
        client: TransferClient,
        credentials: Credentials,
        store: Arc<dyn InvoiceStore>,
        sink: Arc<dyn NotificationSink>,
        cfg: &WorkerConfig,
    ) -> Self {
        let client = client.with_observer(Arc::new(AuditingObserver::new(store.clone())));
        let sessions = Arc::new(SessionManager::new(Arc::new(client), credentials));
        let retry = RetryPolicy::default();

        let dispatcher = OutboundDispatcher::new(
            sessions.clone(),
            store.clone(),
            sink.clone(),
            StatusPoller::new(cfg.poll),
        )
        .with_retry(retry.clone());
        let answers = Arc::new(AnswerProtocol::new(sessions.clone(), store.clone(), sink.clone()));
        let inbox = InboxSync::new(sessions.clone(), store.clone(), sink)
            .with_retry(retry.clone())
            .with_answers(answers.clone());

        Self {
            sessions,
            store,
            dispatcher: Arc::new(dispatcher),
            inbox: Arc::new(inbox),
            answers,
            retry,
            inbox_interval: cfg.inbox_interval,
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Record unseen incoming invoices and reconcile answers in flight.
    pub fn inbox(&self) -> Result<SyncReport, ServiceError> {
        self.inbox.run_once()
    }

    /// Send `doc`, optionally routed to `alias`, and track it unless `track`
    /// is false.
    pub fn send(
        &self,
        doc: &InvoiceDocument,
        alias: Option<&str>,
        track: bool,
    ) -> Result<Sent, ServiceError> {
        let alias = alias.map(|alias| CustomerAlias {
            identifier: doc.customer.identifier.clone(),
            alias: alias.to_string(),
            title: doc.customer.name.clone(),
            registered_at: None,
            created_at: None,
            document_type: "Invoice".to_string(),
        });

        let receipt = self.dispatcher.send(doc, alias.as_ref())?;
        let tracked = if track && receipt.result.completed {
            Some(self.dispatcher.track(receipt.uuid, &CancelToken::new())?)
        } else {
            None
        };

        Ok(Sent { receipt, tracked })
    }

    /// Current status of a sent invoice. Invoices known to this process are
    /// refreshed through the dispatcher so the change is recorded.
    pub fn status(&self, uuid: InvoiceUuid) -> Result<SalesInvoiceStatus, ServiceError> {
        let known = self
            .store
            .header(uuid)?
            .is_some_and(|h| h.direction == Direction::Outbound);
        if known {
            return self.dispatcher.refresh(uuid);
        }

        Ok(retry(&self.retry, || {
            self.sessions
                .with_session(|client, session| client.query_invoice_status(session, uuid))
        })?)
    }

    /// Answer an incoming invoice, syncing the inbox first when it is not
    /// yet known locally.
    pub fn answer(
        &self,
        uuid: InvoiceUuid,
        outcome: AnswerOutcome,
        note: Option<&str>,
    ) -> Result<AnswerReceipt, ServiceError> {
        if self.store.header(uuid)?.is_none() {
            let report = self.inbox.run_once()?;
            info!(listed = report.listed, new = report.new, "inbox synced before answer");
            if self.store.header(uuid)?.is_none() {
                return Err(StoreError::NotFound(uuid).into());
            }
        }
        self.answers.answer_by_uuid(uuid, outcome, note)
    }

    /// Register an invoice uploaded by an earlier run for tracking.
    pub fn adopt(&self, uuid: InvoiceUuid, transfer_id: TransferId) -> Result<(), ServiceError> {
        self.dispatcher.adopt(uuid, transfer_id)
    }

    /// Run the inbox trigger and resume tracking of pending outbound
    /// invoices until `control` reaches end of input. Every line read
    /// requests an immediate inbox sync.
    pub fn watch(&self, control: impl BufRead) -> anyhow::Result<()> {
        let trigger = IntervalTrigger::every(self.inbox_interval).spawn(self.inbox.clone())?;

        let mut tasks = Vec::new();
        for uuid in self.dispatcher.pending()? {
            let dispatcher = self.dispatcher.clone();
            let task = PollTask::spawn(format!("track-{uuid}"), move |cancel| {
                dispatcher.resume(uuid, &cancel)
            })?;
            tasks.push((uuid, task));
        }
        info!(pending = tasks.len(), "watching");

        for line in control.lines() {
            if let Err(err) = line {
                warn!(error = %err, "control input failed");
                break;
            }
            trigger.trigger();
        }

        trigger.shutdown();
        for (uuid, task) in tasks {
            task.cancel();
            match task.join() {
                Ok(report) => info!(invoice_uuid = %uuid, ?report, "tracking finished"),
                Err(err) => warn!(invoice_uuid = %uuid, error = %err, "tracking stopped"),
            }
        }
        Ok(())
    }

    /// Best-effort logout at the end of a command.
    pub fn close(&self) {
        if let Err(err) = self.sessions.logout() {
            warn!(error = %err, "logout failed");
        }
    }
}
