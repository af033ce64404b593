//! Invoice persistence.
//!
//! [`InvoiceStore`] is the seam to whatever database the host application
//! uses. [`InMemoryInvoiceStore`] backs tests and the worker binary.

use std::collections::HashMap;
use std::sync::RwLock;

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use einvoice_core::{AuditId, Classify, ErrorKind, ErrorReport, InvoiceUuid, TransferId};
use einvoice_invoicing::{
    AmountBreakdown, AnswerOutcome, AnswerState, AnswerType, InboundInvoice, InvoiceDocument,
    InvoiceProfile, InvoiceState, InvoiceTypeCode, LineItem, PurchaseInvoiceInfo, Totals,
    TransferState,
};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("invoice {0} not found")]
    NotFound(InvoiceUuid),

    #[error("store conflict: {0}")]
    Conflict(String),

    #[error("storage failure: {0}")]
    Storage(String),
}

impl Classify for StoreError {
    fn kind(&self) -> ErrorKind {
        match self {
            StoreError::NotFound(_) | StoreError::Conflict(_) => ErrorKind::BusinessRule,
            StoreError::Storage(_) => ErrorKind::Integrity,
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    /// Sales invoice we sent.
    Outbound,
    /// Purchase invoice we received.
    Inbound,
}

/// Persisted view of one invoice, either direction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvoiceHeader {
    pub uuid: InvoiceUuid,
    pub number: String,
    pub direction: Direction,
    pub profile: InvoiceProfile,
    pub type_code: InvoiceTypeCode,
    pub issue_date: Option<NaiveDate>,
    /// VKN/TCKN of the customer (outbound) or sender (inbound).
    pub counterparty_id: String,
    pub counterparty_name: String,
    pub currency: String,
    pub amounts: AmountBreakdown,
    pub transfer_id: Option<TransferId>,
    pub transfer_state: Option<TransferState>,
    pub invoice_state: InvoiceState,
    pub answer_state: AnswerState,
    pub answer_type: AnswerType,
    pub submitted_answer: Option<AnswerOutcome>,
    pub answer_note: Option<String>,
    pub envelope_uuid: Option<String>,
    /// Metadata as listed by the remote side; inbound only.
    pub inbound: Option<PurchaseInvoiceInfo>,
    pub updated_at: DateTime<Utc>,
}

impl InvoiceHeader {
    /// Header for a sales invoice that has been built but not yet sent.
    pub fn outbound(uuid: InvoiceUuid, doc: &InvoiceDocument, totals: &Totals) -> Self {
        Self {
            uuid,
            number: doc.number.clone(),
            direction: Direction::Outbound,
            profile: doc.profile.clone(),
            type_code: doc.type_code.clone(),
            issue_date: Some(doc.issue_date),
            counterparty_id: doc.customer.identifier.clone(),
            counterparty_name: doc.customer.name.clone(),
            currency: doc.currency.clone(),
            amounts: AmountBreakdown {
                line_extension: totals.line_extension,
                tax: totals.tax_total,
                payable: totals.payable,
            },
            transfer_id: None,
            transfer_state: None,
            invoice_state: InvoiceState::Draft,
            answer_state: AnswerState::NoAnswer,
            answer_type: AnswerType::Unknown,
            submitted_answer: None,
            answer_note: None,
            envelope_uuid: None,
            inbound: None,
            updated_at: Utc::now(),
        }
    }

    /// Header for a sales invoice uploaded by an earlier process that left
    /// nothing behind but its UUID and transfer id.
    pub fn adopted(uuid: InvoiceUuid, transfer_id: TransferId) -> Self {
        Self {
            uuid,
            number: String::new(),
            direction: Direction::Outbound,
            profile: InvoiceProfile::Basic,
            type_code: InvoiceTypeCode::Sales,
            issue_date: None,
            counterparty_id: String::new(),
            counterparty_name: String::new(),
            currency: String::new(),
            amounts: AmountBreakdown {
                line_extension: Decimal::ZERO,
                tax: Decimal::ZERO,
                payable: Decimal::ZERO,
            },
            transfer_id: Some(transfer_id),
            transfer_state: None,
            invoice_state: InvoiceState::Draft,
            answer_state: AnswerState::NoAnswer,
            answer_type: AnswerType::Unknown,
            submitted_answer: None,
            answer_note: None,
            envelope_uuid: None,
            inbound: None,
            updated_at: Utc::now(),
        }
    }

    /// Header for a purchase invoice seen in the incoming list.
    pub fn inbound(info: &PurchaseInvoiceInfo) -> Self {
        Self {
            uuid: info.uuid,
            number: info.invoice_number.clone(),
            direction: Direction::Inbound,
            profile: info.profile.clone(),
            type_code: info.type_code.clone(),
            issue_date: info.issue_time.map(|t| t.date()),
            counterparty_id: info.sender_identifier.clone(),
            counterparty_name: info.sender_title.clone(),
            currency: info.currency.clone(),
            amounts: info.amounts.clone(),
            transfer_id: None,
            transfer_state: None,
            invoice_state: InvoiceState::Delivered,
            answer_state: AnswerState::WaitingAnswer,
            answer_type: AnswerType::Unknown,
            submitted_answer: None,
            answer_note: None,
            envelope_uuid: None,
            inbound: Some(info.clone()),
            updated_at: Utc::now(),
        }
    }

    /// Rebuild the answer aggregate from what was persisted.
    pub fn answer_aggregate(&self) -> InboundInvoice {
        match &self.inbound {
            Some(info) => InboundInvoice::restore(
                info.clone(),
                self.answer_state,
                self.answer_type,
                self.submitted_answer,
            ),
            None => InboundInvoice::empty(self.uuid),
        }
    }

    /// Copy the answer fields of `invoice` onto this header.
    pub fn record_answer(&mut self, invoice: &InboundInvoice) {
        self.answer_state = invoice.answer_state();
        self.answer_type = invoice.answer_type();
        self.submitted_answer = invoice.submitted();
        if let Some(note) = invoice.note() {
            self.answer_note = Some(note.to_string());
        }
        self.touch();
    }

    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

/// One invoice line as persisted, in document order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredLine {
    /// 1-based.
    pub position: u32,
    pub name: String,
    pub quantity: Decimal,
    pub unit_code: String,
    pub unit_price: Decimal,
    pub tax_rate: Decimal,
    pub line_total: Decimal,
    pub tax_amount: Decimal,
}

impl StoredLine {
    pub fn from_items(items: &[LineItem]) -> Vec<Self> {
        items
            .iter()
            .zip(1u32..)
            .map(|(item, position)| Self {
                position,
                name: item.name.clone(),
                quantity: item.quantity,
                unit_code: item.unit_code.clone(),
                unit_price: item.unit_price,
                tax_rate: item.tax_rate,
                line_total: item.line_total(),
                tax_amount: item.tax_amount(),
            })
            .collect()
    }
}

/// A remote exchange as recorded for audit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub id: AuditId,
    pub recorded_at: DateTime<Utc>,
    pub operation: String,
    pub subject: Option<String>,
    pub success: bool,
    pub error: Option<ErrorReport>,
    pub raw_response: Option<String>,
}

impl AuditEntry {
    pub fn new(operation: impl Into<String>, subject: Option<String>, success: bool) -> Self {
        Self {
            id: AuditId::new(),
            recorded_at: Utc::now(),
            operation: operation.into(),
            subject,
            success,
            error: None,
            raw_response: None,
        }
    }
}

pub trait InvoiceStore: Send + Sync {
    /// Insert or replace the header keyed by its UUID.
    fn upsert_header(&self, header: InvoiceHeader) -> Result<(), StoreError>;

    /// Store the lines of an existing header. Lines are written once.
    fn insert_lines(&self, uuid: InvoiceUuid, lines: Vec<StoredLine>) -> Result<(), StoreError>;

    fn append_audit(&self, entry: AuditEntry) -> Result<(), StoreError>;

    fn header(&self, uuid: InvoiceUuid) -> Result<Option<InvoiceHeader>, StoreError>;

    fn lines(&self, uuid: InvoiceUuid) -> Result<Vec<StoredLine>, StoreError>;

    /// Audit entries in insertion order, optionally only those about `subject`.
    fn audit_log(&self, subject: Option<&str>) -> Result<Vec<AuditEntry>, StoreError>;

    fn list_headers(&self, direction: Option<Direction>) -> Result<Vec<InvoiceHeader>, StoreError>;

    /// Load a header that must exist.
    fn require_header(&self, uuid: InvoiceUuid) -> Result<InvoiceHeader, StoreError> {
        self.header(uuid)?.ok_or(StoreError::NotFound(uuid))
    }
}

/// In-memory store.
///
/// Intended for tests/dev.
#[derive(Debug, Default)]
pub struct InMemoryInvoiceStore {
    headers: RwLock<HashMap<InvoiceUuid, InvoiceHeader>>,
    lines: RwLock<HashMap<InvoiceUuid, Vec<StoredLine>>>,
    audit: RwLock<Vec<AuditEntry>>,
}

impl InMemoryInvoiceStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn poisoned() -> StoreError {
    StoreError::Storage("lock poisoned".to_string())
}

impl InvoiceStore for InMemoryInvoiceStore {
    fn upsert_header(&self, header: InvoiceHeader) -> Result<(), StoreError> {
        let mut headers = self.headers.write().map_err(|_| poisoned())?;
        if let Some(existing) = headers.get(&header.uuid) {
            if existing.direction != header.direction {
                return Err(StoreError::Conflict(format!(
                    "invoice {} is stored as {:?}",
                    header.uuid, existing.direction
                )));
            }
        }
        headers.insert(header.uuid, header);
        Ok(())
    }

    fn insert_lines(&self, uuid: InvoiceUuid, lines: Vec<StoredLine>) -> Result<(), StoreError> {
        if !self.headers.read().map_err(|_| poisoned())?.contains_key(&uuid) {
            return Err(StoreError::NotFound(uuid));
        }
        let mut all = self.lines.write().map_err(|_| poisoned())?;
        if all.contains_key(&uuid) {
            return Err(StoreError::Conflict(format!("lines of invoice {uuid} already stored")));
        }
        let mut lines = lines;
        lines.sort_by_key(|l| l.position);
        all.insert(uuid, lines);
        Ok(())
    }

    fn append_audit(&self, entry: AuditEntry) -> Result<(), StoreError> {
        self.audit.write().map_err(|_| poisoned())?.push(entry);
        Ok(())
    }

    fn header(&self, uuid: InvoiceUuid) -> Result<Option<InvoiceHeader>, StoreError> {
        Ok(self.headers.read().map_err(|_| poisoned())?.get(&uuid).cloned())
    }

    fn lines(&self, uuid: InvoiceUuid) -> Result<Vec<StoredLine>, StoreError> {
        Ok(self
            .lines
            .read()
            .map_err(|_| poisoned())?
            .get(&uuid)
            .cloned()
            .unwrap_or_default())
    }

    fn audit_log(&self, subject: Option<&str>) -> Result<Vec<AuditEntry>, StoreError> {
        let audit = self.audit.read().map_err(|_| poisoned())?;
        Ok(audit
            .iter()
            .filter(|e| subject.is_none() || e.subject.as_deref() == subject)
            .cloned()
            .collect())
    }

    fn list_headers(&self, direction: Option<Direction>) -> Result<Vec<InvoiceHeader>, StoreError> {
        let headers = self.headers.read().map_err(|_| poisoned())?;
        let mut out: Vec<_> = headers
            .values()
            .filter(|h| direction.is_none_or(|d| h.direction == d))
            .cloned()
            .collect();
        out.sort_by(|a, b| a.number.cmp(&b.number).then(a.uuid.cmp(&b.uuid)));
        Ok(out)
    }
}
