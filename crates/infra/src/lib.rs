//! Orchestration layer: persistence seams, status polling, the answer
//! driver, outbound dispatch, inbox sync and periodic triggers.

pub mod answer;
pub mod audit;
pub mod config;
pub mod error;
pub mod inbound;
pub mod notify;
pub mod outbound;
pub mod poller;
pub mod retry;
pub mod store;
pub mod trigger;

pub use answer::{AnswerProtocol, AnswerReceipt};
pub use audit::AuditingObserver;
pub use config::WorkerConfig;
pub use error::ServiceError;
pub use inbound::{InboxSync, SyncReport};
pub use notify::{
    InMemoryNotificationSink, NotificationSink, StatusChange, Track, TracingNotificationSink,
};
pub use outbound::{OutboundDispatcher, SendReceipt, TrackReport};
pub use poller::{
    CancelToken, PollError, PollOutcome, PollSettings, PollTask, StatusPoller, StatusReport,
};
pub use retry::{BackoffStrategy, RetryPolicy, retry, retry_with_sleep};
pub use store::{
    AuditEntry, Direction, InMemoryInvoiceStore, InvoiceHeader, InvoiceStore, StoreError,
    StoredLine,
};
pub use trigger::{IntervalTrigger, TriggerHandle, Workflow};
