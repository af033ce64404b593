//! UBL-TR document construction and transfer packaging.
//!
//! - [`invoice`]: `Invoice` documents from an [`InvoiceDocument`](einvoice_invoicing::InvoiceDocument).
//! - [`answer`]: `ApplicationResponse` documents for the accept/reject protocol.
//! - [`package`]: single-entry ZIP archive + content digest for upload.
//!
//! Everything here is pure (no network, no filesystem).

pub mod answer;
pub mod error;
pub mod invoice;
pub mod package;
mod xml;

pub use answer::{AnswerDocument, build_answer_xml};
pub use error::UblError;
pub use invoice::{BuiltInvoice, build_invoice_xml, build_invoice_xml_with_uuid};
pub use package::{FileDataType, TransferFile, content_digest, package, unpack, verify};
