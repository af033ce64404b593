//! `ApplicationResponse` builder for accepting or rejecting a received
//! commercial invoice.

use chrono::{NaiveDate, Utc};
use uuid::Uuid;

use einvoice_core::{DomainError, InvoiceUuid};
use einvoice_invoicing::{AnswerOutcome, InvoiceProfile};

use crate::error::UblError;
use crate::invoice::{CUSTOMIZATION_ID, NS_CAC, NS_CBC, UBL_VERSION};
use crate::xml::XmlBuilder;

const NS_APPLICATION_RESPONSE: &str =
    "urn:oasis:names:specification:ubl:schema:xsd:ApplicationResponse-2";

/// Everything needed to render one answer document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnswerDocument {
    pub response_id: Uuid,
    pub issue_date: NaiveDate,
    pub invoice_uuid: InvoiceUuid,
    pub outcome: AnswerOutcome,
    pub note: Option<String>,
}

impl AnswerDocument {
    /// New answer dated today with a fresh response identifier.
    pub fn new(invoice_uuid: InvoiceUuid, outcome: AnswerOutcome, note: Option<String>) -> Self {
        Self {
            response_id: Uuid::now_v7(),
            issue_date: Utc::now().date_naive(),
            invoice_uuid,
            outcome,
            note: note.filter(|n| !n.trim().is_empty()),
        }
    }
}

pub fn build_answer_xml(answer: &AnswerDocument) -> Result<String, UblError> {
    if answer.outcome == AnswerOutcome::Rejected && answer.note.is_none() {
        return Err(DomainError::validation("a rejection requires a note").into());
    }

    let response_id = answer.response_id.to_string();
    let invoice_uuid = answer.invoice_uuid.to_string();
    let issue_date = answer.issue_date.format("%Y-%m-%d").to_string();

    let mut xml = XmlBuilder::new()?;
    xml.open(
        "ApplicationResponse",
        &[
            ("xmlns", NS_APPLICATION_RESPONSE),
            ("xmlns:cac", NS_CAC),
            ("xmlns:cbc", NS_CBC),
        ],
    )?;
    xml.text("cbc:UBLVersionID", UBL_VERSION)?
        .text("cbc:CustomizationID", CUSTOMIZATION_ID)?
        .text("cbc:ProfileID", InvoiceProfile::Commercial.code())?
        .text("cbc:ID", &response_id)?
        .text("cbc:UUID", &response_id)?
        .text("cbc:IssueDate", &issue_date)?;

    xml.open("cac:DocumentResponse", &[])?;
    xml.open("cac:Response", &[])?
        .text("cbc:ReferenceID", &invoice_uuid)?
        .text("cbc:ResponseCode", answer.outcome.code())?;
    if let Some(note) = &answer.note {
        xml.text("cbc:Description", note)?;
    }
    xml.close("cac:Response")?;
    xml.open("cac:DocumentReference", &[])?
        .text("cbc:ID", &invoice_uuid)?
        .text("cbc:DocumentTypeCode", "FATURA")?
        .close("cac:DocumentReference")?;
    xml.close("cac:DocumentResponse")?;

    xml.close("ApplicationResponse")?;
    xml.finish()
}
