//! Typed client: one method per remote operation.
//!
//! Each call is a single blocking exchange. Failures are classified into
//! [`TransferError`] before returning; retrying is the caller's decision.

use std::sync::Arc;
use std::time::Duration;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use chrono::NaiveDateTime;
use rust_decimal::Decimal;
use tracing::{debug, warn};

use einvoice_core::{Classify, ErrorReport, InvoiceUuid, TransferId};
use einvoice_invoicing::{
    AmountBreakdown, AnswerOutcome, AnswerState, AnswerType, InvoiceProfile, InvoiceState,
    InvoiceTypeCode, PurchaseInvoiceInfo, TransferState,
};
use einvoice_ubl::TransferFile;

use crate::config::{ClientConfig, Credentials, Mode};
use crate::envelope::{self, Reader};
use crate::error::TransferError;
use crate::session::Session;
use crate::transport::{HttpTransport, SoapTransport, TransportResponse};

pub const OP_LOGIN: &str = "Login";
pub const OP_LOGOUT: &str = "Logout";
pub const OP_SEND: &str = "TransferSalesInvoiceFile";
pub const OP_TRANSFER_STATUS: &str = "GetTransferSalesInvoiceFileStatus";
pub const OP_INVOICE_STATUS: &str = "GetSalesInvoiceStatusWithInvoiceUUID";
pub const OP_LIST_INCOMING: &str = "GetUnTransferredPurchaseInvoiceList";
pub const OP_ANSWER: &str = "SetPurchaseInvoiceAnswerWithInvoiceUUID";
pub const OP_DOWNLOAD: &str = "DownloadSalesInvoiceWithInvoiceUUID";

/// Outcome of `TransferSalesInvoiceFile`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferResult {
    pub completed: bool,
    /// Present whenever `completed` is true.
    pub transfer_id: Option<TransferId>,
    pub description: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferStatus {
    pub state: TransferState,
    pub name: Option<String>,
    pub description: Option<String>,
}

/// Full invoice-level status including answer and envelope metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SalesInvoiceStatus {
    pub invoice_uuid: InvoiceUuid,
    pub state: InvoiceState,
    pub state_name: Option<String>,
    pub state_description: Option<String>,
    pub answer_state: AnswerState,
    pub answer_type: AnswerType,
    pub envelope_uuid: Option<String>,
    pub envelope_state: Option<i32>,
    pub envelope_description: Option<String>,
    pub envelope_date: Option<NaiveDateTime>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperationResult {
    pub completed: bool,
    pub description: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DownloadFormat {
    Xml,
    Pdf,
    Html,
}

impl DownloadFormat {
    pub fn code(self) -> &'static str {
        match self {
            DownloadFormat::Xml => "XML",
            DownloadFormat::Pdf => "PDF",
            DownloadFormat::Html => "HTML",
        }
    }
}

impl std::str::FromStr for DownloadFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "XML" => Ok(DownloadFormat::Xml),
            "PDF" => Ok(DownloadFormat::Pdf),
            "HTML" => Ok(DownloadFormat::Html),
            other => Err(format!("unknown download format {other}")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadResult {
    pub reference_code: Option<String>,
    pub ready: bool,
    /// Decoded file contents, present when `ready`.
    pub payload: Option<Vec<u8>>,
}

/// One remote exchange, as reported to an [`ExchangeObserver`].
#[derive(Debug, Clone)]
pub struct Exchange {
    pub operation: &'static str,
    /// Invoice UUID, transfer id or file name the call was about.
    pub subject: Option<String>,
    pub success: bool,
    pub error: Option<ErrorReport>,
    pub raw_response: Option<String>,
}

/// Receives every exchange, successful or not (audit trail hook).
pub trait ExchangeObserver: Send + Sync {
    fn on_exchange(&self, exchange: &Exchange);
}

pub struct TransferClient {
    transport: Arc<dyn SoapTransport>,
    namespace: String,
    mode: Mode,
    session_ttl: Duration,
    observer: Option<Arc<dyn ExchangeObserver>>,
}

impl TransferClient {
    pub fn new(transport: Arc<dyn SoapTransport>, config: &ClientConfig) -> Self {
        Self {
            transport,
            namespace: config.service_namespace.clone(),
            mode: config.mode,
            session_ttl: config.session_ttl,
            observer: None,
        }
    }

    /// Client over HTTP to the endpoint selected by `config.mode`.
    pub fn from_config(config: &ClientConfig) -> Result<Self, TransferError> {
        let transport = HttpTransport::new(config.endpoint(), config.http_timeout)?;
        Ok(Self::new(Arc::new(transport), config))
    }

    pub fn with_observer(mut self, observer: Arc<dyn ExchangeObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn login(&self, credentials: &Credentials) -> Result<Session, TransferError> {
        let token = self.call(
            OP_LOGIN,
            None,
            &[
                ("userName", credentials.username.as_str()),
                ("password", credentials.password.as_str()),
            ],
            |r| {
                r.text("SessionCode")
                    .or_else(|| r.own_text())
                    .ok_or_else(|| {
                        TransferError::protocol("login response carries no session token", None)
                    })
            },
        )?;
        debug!(mode = %self.mode, "session opened");
        Ok(Session::new(token, self.mode, self.session_ttl))
    }

    /// Upload a packaged invoice. The digest is checked locally first and
    /// against any digest the service echoes back.
    pub fn send(&self, session: &Session, file: &TransferFile) -> Result<TransferResult, TransferError> {
        if let Err(err) = einvoice_ubl::verify(file) {
            let err = TransferError::from(err);
            warn!(file_name = file.file_name(), error = %err, "refusing to send corrupted payload");
            return Err(err);
        }

        let encoded = STANDARD.encode(file.payload());
        let direct = bool_field(file.is_direct_send());
        let expected_digest = file.digest().to_string();

        self.call(
            OP_SEND,
            Some(file.file_name()),
            &[
                ("sessionCode", session.token()),
                ("fileNameWithExtension", file.file_name()),
                ("fileDataType", file.data_type().code()),
                ("binaryData", encoded.as_str()),
                ("binaryDataHash", file.digest()),
                ("customerAlias", file.target_alias().unwrap_or_default()),
                ("isDirectSend", direct),
            ],
            |r| {
                if let Some(echoed) = r.text("BinaryDataHash") {
                    if !echoed.eq_ignore_ascii_case(&expected_digest) {
                        return Err(TransferError::Integrity {
                            expected: expected_digest.clone(),
                            actual: echoed,
                        });
                    }
                }
                let completed = r.required_bool("OperationCompleted")?;
                let transfer_id = match r.text("TransferFileUniqueId") {
                    Some(id) => Some(TransferId::new(id).map_err(|e| {
                        TransferError::protocol(format!("invalid TransferFileUniqueId: {e}"), None)
                    })?),
                    None => None,
                };
                if completed && transfer_id.is_none() {
                    return Err(missing(&r, "TransferFileUniqueId"));
                }
                Ok(TransferResult {
                    completed,
                    transfer_id,
                    description: r.text("Description"),
                })
            },
        )
    }

    pub fn query_transfer_status(
        &self,
        session: &Session,
        transfer_id: &TransferId,
    ) -> Result<TransferStatus, TransferError> {
        self.call(
            OP_TRANSFER_STATUS,
            Some(transfer_id.as_str()),
            &[
                ("sessionCode", session.token()),
                ("transferFileUniqueId", transfer_id.as_str()),
            ],
            |r| {
                let state = r
                    .code("StateCode", TransferState::from_code)?
                    .ok_or_else(|| missing(&r, "StateCode"))?;
                Ok(TransferStatus {
                    state,
                    name: r.text("StateName"),
                    description: r.text("StateDescription"),
                })
            },
        )
    }

    pub fn query_invoice_status(
        &self,
        session: &Session,
        uuid: InvoiceUuid,
    ) -> Result<SalesInvoiceStatus, TransferError> {
        let uuid_text = uuid.to_string();
        self.call(
            OP_INVOICE_STATUS,
            Some(uuid_text.as_str()),
            &[("sessionCode", session.token()), ("invoiceUUID", uuid_text.as_str())],
            |r| {
                if let Some(echoed) = r.parsed::<InvoiceUuid>("InvoiceUUID")? {
                    if echoed != uuid {
                        return Err(TransferError::protocol(
                            format!("status response is for invoice {echoed}"),
                            None,
                        ));
                    }
                }
                let state = r
                    .code("StateCode", InvoiceState::from_code)?
                    .ok_or_else(|| missing(&r, "StateCode"))?;
                Ok(SalesInvoiceStatus {
                    invoice_uuid: uuid,
                    state,
                    state_name: r.text("StateName"),
                    state_description: r.text("StateDescription"),
                    answer_state: r
                        .code("AnswerStateCode", AnswerState::from_code)?
                        .unwrap_or(AnswerState::NoAnswer),
                    answer_type: r
                        .code("AnswerTypeCode", AnswerType::from_code)?
                        .unwrap_or(AnswerType::Unknown),
                    envelope_uuid: r.text("EnvelopeUUID"),
                    envelope_state: r.parsed("EnvelopeStateCode")?,
                    envelope_description: r.text("EnvelopeStateDescription"),
                    envelope_date: r.datetime("EnvelopeDate")?,
                })
            },
        )
    }

    pub fn list_incoming_invoices(
        &self,
        session: &Session,
    ) -> Result<Vec<PurchaseInvoiceInfo>, TransferError> {
        self.call(
            OP_LIST_INCOMING,
            None,
            &[("sessionCode", session.token())],
            |r| r.all("PurchaseInvoiceInfo").iter().map(read_purchase_info).collect(),
        )
    }

    pub fn answer_invoice(
        &self,
        session: &Session,
        uuid: InvoiceUuid,
        outcome: AnswerOutcome,
        note: Option<&str>,
        direct_send: bool,
    ) -> Result<OperationResult, TransferError> {
        let uuid_text = uuid.to_string();
        self.call(
            OP_ANSWER,
            Some(uuid_text.as_str()),
            &[
                ("sessionCode", session.token()),
                ("answerType", outcome.code()),
                ("note", note.unwrap_or_default()),
                ("isDirectSend", bool_field(direct_send)),
                ("invoiceUUID", uuid_text.as_str()),
            ],
            |r| {
                Ok(OperationResult {
                    completed: r.required_bool("OperationCompleted")?,
                    description: r.text("Description"),
                })
            },
        )
    }

    pub fn download(
        &self,
        session: &Session,
        uuid: InvoiceUuid,
        format: DownloadFormat,
    ) -> Result<DownloadResult, TransferError> {
        let uuid_text = uuid.to_string();
        self.call(
            OP_DOWNLOAD,
            Some(uuid_text.as_str()),
            &[
                ("sessionCode", session.token()),
                ("downloadDocumentDataTypes", format.code()),
                ("invoiceUUID", uuid_text.as_str()),
            ],
            |r| {
                let ready = r.required_bool("DownloadFileReady")?;
                let payload = match r.text("DownloadFile") {
                    Some(encoded) => {
                        let compact: String = encoded.split_whitespace().collect();
                        Some(STANDARD.decode(compact).map_err(|e| {
                            TransferError::protocol(format!("DownloadFile is not base64: {e}"), None)
                        })?)
                    }
                    None if ready => return Err(missing(&r, "DownloadFile")),
                    None => None,
                };
                Ok(DownloadResult {
                    reference_code: r.text("ReferenceCode"),
                    ready,
                    payload,
                })
            },
        )
    }

    pub fn logout(&self, session: &Session) -> Result<(), TransferError> {
        self.call(OP_LOGOUT, None, &[("sessionCode", session.token())], |_| Ok(()))?;
        debug!(mode = %self.mode, "session closed");
        Ok(())
    }

    fn call<T>(
        &self,
        operation: &'static str,
        subject: Option<&str>,
        fields: &[(&str, &str)],
        read: impl FnOnce(Reader<'_, '_>) -> Result<T, TransferError>,
    ) -> Result<T, TransferError> {
        let body = envelope::request(&self.namespace, operation, fields)?;
        let action = envelope::soap_action(&self.namespace, operation);
        debug!(operation, subject, "remote call");

        let (result, raw) = match self.transport.post(&action, &body) {
            Ok(response) => {
                let result = interpret(operation, &response, read);
                (result, Some(response.body))
            }
            Err(err) => (Err(err.into()), None),
        };
        let result = result.map_err(|err| attach_raw(err, raw.as_deref()));

        match &result {
            Ok(_) => debug!(operation, subject, "remote call completed"),
            Err(err) => warn!(operation, subject, kind = %err.kind(), error = %err, "remote call failed"),
        }
        if let Some(observer) = &self.observer {
            observer.on_exchange(&Exchange {
                operation,
                subject: subject.map(str::to_string),
                success: result.is_ok(),
                error: result.as_ref().err().map(|e| e.report()),
                raw_response: raw,
            });
        }
        result
    }
}

fn interpret<T>(
    operation: &str,
    response: &TransportResponse,
    read: impl FnOnce(Reader<'_, '_>) -> Result<T, TransferError>,
) -> Result<T, TransferError> {
    match response.status {
        200..=299 => envelope::parse_response(operation, &response.body, read),
        500 => Err(envelope::fault_of(operation, &response.body).unwrap_or_else(|| {
            TransferError::protocol("HTTP 500 without SOAP fault", Some(&response.body))
        })),
        401 | 403 if operation == OP_LOGIN => Err(TransferError::invalid_credentials(format!(
            "HTTP {}",
            response.status
        ))),
        401 | 403 => Err(TransferError::session_expired(format!("HTTP {}", response.status))),
        408 | 429 | 502 | 503 | 504 => {
            Err(TransferError::Transient(format!("HTTP {}", response.status)))
        }
        status => Err(TransferError::protocol(
            format!("unexpected HTTP status {status}"),
            Some(&response.body),
        )),
    }
}

/// Protocol errors raised inside readers may not carry the body yet.
fn attach_raw(err: TransferError, raw: Option<&str>) -> TransferError {
    match err {
        TransferError::Protocol { message, raw: None } => TransferError::Protocol {
            message,
            raw: raw.map(str::to_string),
        },
        other => other,
    }
}

fn missing(r: &Reader<'_, '_>, field: &str) -> TransferError {
    TransferError::protocol(format!("missing {field} in {}", r.name()), None)
}

fn bool_field(value: bool) -> &'static str {
    if value { "true" } else { "false" }
}

fn read_purchase_info(r: &Reader<'_, '_>) -> Result<PurchaseInvoiceInfo, TransferError> {
    let amount = |name: &str| -> Result<Decimal, TransferError> {
        r.decimal(name)?.ok_or_else(|| missing(r, name))
    };
    Ok(PurchaseInvoiceInfo {
        uuid: r.required("InvoiceUUID")?,
        invoice_number: r.required_text("InvoiceNumber")?,
        issue_time: r.datetime("IssueTime")?,
        sender_identifier: r.required_text("SenderIdentifier")?,
        sender_title: r.text("SenderTitle").unwrap_or_default(),
        profile: InvoiceProfile::from(r.required_text("ProfileID")?),
        type_code: InvoiceTypeCode::from(r.required_text("InvoiceTypeCode")?),
        amounts: AmountBreakdown {
            line_extension: amount("LineExtensionAmount")?,
            tax: amount("TaxAmount")?,
            payable: amount("PayableAmount")?,
        },
        currency: r.required_text("CurrencyCode")?,
        exchange_rate: r.decimal("ExchangeRate")?,
        is_read: r.bool("IsRead")?.unwrap_or(false),
        is_transferred: false,
    })
}
