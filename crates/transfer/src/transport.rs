//! Raw request/response transport.
//!
//! [`HttpTransport`] posts envelopes with `reqwest::blocking`.
//! [`ScriptedTransport`] replays canned responses and records what was sent.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use reqwest::blocking::Client;
use reqwest::header::CONTENT_TYPE;
use thiserror::Error;
use tracing::trace;

use crate::error::TransferError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportResponse {
    pub status: u16,
    pub body: String,
}

impl TransportResponse {
    pub fn ok(body: impl Into<String>) -> Self {
        Self {
            status: 200,
            body: body.into(),
        }
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    #[error("request timed out: {0}")]
    Timeout(String),

    #[error("connection failed: {0}")]
    Connection(String),

    #[error("transport failure: {0}")]
    Other(String),
}

impl From<TransportError> for TransferError {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::Timeout(_) | TransportError::Connection(_) => {
                TransferError::Transient(err.to_string())
            }
            TransportError::Other(msg) => TransferError::protocol(msg, None),
        }
    }
}

/// One SOAP POST. No retries at this level.
pub trait SoapTransport: Send + Sync {
    fn post(&self, action: &str, body: &str) -> Result<TransportResponse, TransportError>;
}

pub struct HttpTransport {
    client: Client,
    endpoint: String,
}

impl HttpTransport {
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Result<Self, TransferError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| TransferError::protocol(format!("cannot build http client: {e}"), None))?;
        Ok(Self {
            client,
            endpoint: endpoint.into(),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

impl SoapTransport for HttpTransport {
    fn post(&self, action: &str, body: &str) -> Result<TransportResponse, TransportError> {
        trace!(endpoint = %self.endpoint, action, "posting envelope");
        let resp = self
            .client
            .post(&self.endpoint)
            .header(CONTENT_TYPE, "text/xml; charset=utf-8")
            .header("SOAPAction", format!("\"{action}\""))
            .body(body.to_string())
            .send()
            .map_err(classify_reqwest)?;

        let status = resp.status().as_u16();
        let body = resp.text().map_err(classify_reqwest)?;
        Ok(TransportResponse { status, body })
    }
}

fn classify_reqwest(err: reqwest::Error) -> TransportError {
    if err.is_timeout() {
        TransportError::Timeout(err.to_string())
    } else if err.is_connect() || err.is_request() || err.is_body() {
        TransportError::Connection(err.to_string())
    } else {
        TransportError::Other(err.to_string())
    }
}

/// A request as seen by [`ScriptedTransport`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedRequest {
    pub action: String,
    pub body: String,
}

impl RecordedRequest {
    /// Operation name (last path segment of the SOAP action).
    pub fn operation(&self) -> &str {
        self.action.rsplit('/').next().unwrap_or(&self.action)
    }
}

/// Replays queued responses in order; fails with [`TransportError::Other`]
/// once the script runs out.
#[derive(Default)]
pub struct ScriptedTransport {
    script: Mutex<VecDeque<Result<TransportResponse, TransportError>>>,
    requests: Mutex<Vec<RecordedRequest>>,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, response: Result<TransportResponse, TransportError>) -> &Self {
        self.script
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push_back(response);
        self
    }

    /// Queue an HTTP 200 with `body`.
    pub fn push_ok(&self, body: impl Into<String>) -> &Self {
        self.push(Ok(TransportResponse::ok(body)))
    }

    pub fn push_status(&self, status: u16, body: impl Into<String>) -> &Self {
        self.push(Ok(TransportResponse {
            status,
            body: body.into(),
        }))
    }

    pub fn push_error(&self, err: TransportError) -> &Self {
        self.push(Err(err))
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn call_count(&self) -> usize {
        self.requests.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn remaining(&self) -> usize {
        self.script.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

impl SoapTransport for ScriptedTransport {
    fn post(&self, action: &str, body: &str) -> Result<TransportResponse, TransportError> {
        self.requests
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(RecordedRequest {
                action: action.to_string(),
                body: body.to_string(),
            });
        self.script
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .pop_front()
            .unwrap_or_else(|| Err(TransportError::Other(format!("no scripted response for {action}"))))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use einvoice_core::{Classify, ErrorKind};

    #[test]
    fn scripted_transport_replays_in_order_and_records() {
        let transport = ScriptedTransport::new();
        transport.push_ok("first").push_status(503, "busy");

        let first = transport.post("http://tempuri.org/Login", "<a/>").unwrap();
        assert_eq!(first.body, "first");
        let second = transport.post("http://tempuri.org/Logout", "<b/>").unwrap();
        assert_eq!(second.status, 503);

        assert!(transport.post("http://tempuri.org/Logout", "<c/>").is_err());
        assert_eq!(transport.call_count(), 3);
        assert_eq!(transport.requests()[1].operation(), "Logout");
        assert_eq!(transport.remaining(), 0);
    }

    #[test]
    fn timeouts_and_connection_failures_are_transient() {
        let err: TransferError = TransportError::Timeout("30s".into()).into();
        assert_eq!(err.kind(), ErrorKind::TransientNetwork);
        let err: TransferError = TransportError::Connection("reset".into()).into();
        assert!(err.retryable());
        let err: TransferError = TransportError::Other("no script".into()).into();
        assert_eq!(err.kind(), ErrorKind::Protocol);
    }
}
