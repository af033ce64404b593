//! Status change notifications.

use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

use einvoice_core::InvoiceUuid;

/// Which lifecycle a change belongs to.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Track {
    Transfer,
    Invoice,
    Answer,
    /// A new inbound invoice was listed.
    Received,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusChange {
    pub invoice_uuid: InvoiceUuid,
    pub track: Track,
    pub from: Option<String>,
    pub to: String,
    pub description: Option<String>,
    pub at: DateTime<Utc>,
}

impl StatusChange {
    pub fn new(
        invoice_uuid: InvoiceUuid,
        track: Track,
        from: Option<impl ToString>,
        to: impl ToString,
    ) -> Self {
        Self {
            invoice_uuid,
            track,
            from: from.map(|s| s.to_string()),
            to: to.to_string(),
            description: None,
            at: Utc::now(),
        }
    }

    pub fn with_description(mut self, description: Option<String>) -> Self {
        self.description = description;
        self
    }
}

/// Receives every persisted status change.
///
/// Delivery is best effort; a sink must not fail the workflow that emitted
/// the change.
pub trait NotificationSink: Send + Sync + 'static {
    fn notify(&self, change: &StatusChange);
}

/// In-memory sink for tests/dev.
#[derive(Debug, Default)]
pub struct InMemoryNotificationSink {
    inner: Mutex<Vec<StatusChange>>,
}

impl InMemoryNotificationSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn all(&self) -> Vec<StatusChange> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn for_track(&self, track: Track) -> Vec<StatusChange> {
        self.all().into_iter().filter(|c| c.track == track).collect()
    }
}

impl NotificationSink for InMemoryNotificationSink {
    fn notify(&self, change: &StatusChange) {
        self.inner
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(change.clone());
    }
}

/// Emits each change as a structured `info` event.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingNotificationSink;

impl NotificationSink for TracingNotificationSink {
    fn notify(&self, change: &StatusChange) {
        info!(
            invoice_uuid = %change.invoice_uuid,
            track = ?change.track,
            from = change.from.as_deref().unwrap_or("-"),
            to = %change.to,
            description = change.description.as_deref().unwrap_or(""),
            "status changed"
        );
    }
}
