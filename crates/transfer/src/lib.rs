//! Remote exchange with the e-invoice clearinghouse.
//!
//! - [`transport`]: raw SOAP POSTs (`reqwest` in production, scripted in tests)
//! - [`envelope`]: request envelopes and response parsing/classification
//! - [`client`]: one typed method per remote operation
//! - [`session`]: token lifecycle with one transparent re-login
//!
//! Every failure leaving this crate is a [`TransferError`], classified into
//! the network-facing kinds of [`einvoice_core::ErrorKind`].

pub mod client;
pub mod config;
pub mod envelope;
pub mod error;
pub mod session;
pub mod transport;

pub use client::{
    DownloadFormat, DownloadResult, Exchange, ExchangeObserver, OperationResult,
    SalesInvoiceStatus, TransferClient, TransferResult, TransferStatus,
};
pub use config::{ClientConfig, ConfigError, Credentials, Mode};
pub use error::{AuthFailure, TransferError};
pub use session::{Session, SessionManager};
pub use transport::{
    HttpTransport, RecordedRequest, ScriptedTransport, SoapTransport, TransportError,
    TransportResponse,
};
