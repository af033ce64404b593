//! Inbound (purchase) invoice metadata and recipient lookup entities.

use chrono::NaiveDateTime;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use einvoice_core::InvoiceUuid;

use crate::document::{InvoiceProfile, InvoiceTypeCode};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AmountBreakdown {
    pub line_extension: Decimal,
    pub tax: Decimal,
    pub payable: Decimal,
}

/// An incoming invoice as listed by the remote service.
///
/// `is_read` / `is_transferred` are local bookkeeping flags owned by the
/// caller; the protocol never mutates them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PurchaseInvoiceInfo {
    pub uuid: InvoiceUuid,
    pub invoice_number: String,
    pub issue_time: Option<NaiveDateTime>,
    pub sender_identifier: String,
    pub sender_title: String,
    pub profile: InvoiceProfile,
    pub type_code: InvoiceTypeCode,
    pub amounts: AmountBreakdown,
    pub currency: String,
    pub exchange_rate: Option<Decimal>,
    pub is_read: bool,
    #[serde(default)]
    pub is_transferred: bool,
}

/// Registered recipient routing entry (read-only lookup data).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CustomerAlias {
    /// VKN/TCKN of the registered party.
    pub identifier: String,
    /// Routing alias, e.g. `urn:mail:defaultpk@example.com`.
    pub alias: String,
    pub title: String,
    pub registered_at: Option<NaiveDateTime>,
    pub created_at: Option<NaiveDateTime>,
    pub document_type: String,
}
