//! SOAP 1.1 envelopes: request construction and response reading.
//!
//! Responses are matched by local element name, case-insensitively, so the
//! reader tolerates both `OperationCompleted` and `operationCompleted` and
//! ignores namespace prefixes.

use std::str::FromStr;

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use quick_xml::Writer;
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use roxmltree::{Document, Node};
use rust_decimal::Decimal;

use crate::error::TransferError;

pub const SOAP_ENV_NS: &str = "http://schemas.xmlsoap.org/soap/envelope/";

const SESSION_FAULT_MARKERS: &[&str] = &["session", "oturum", "token"];
const CREDENTIAL_FAULT_MARKERS: &[&str] = &[
    "password",
    "username",
    "user name",
    "credential",
    "kullanıcı",
    "şifre",
    "login",
    "authentication",
];

/// `SOAPAction` header value for `operation`.
pub fn soap_action(namespace: &str, operation: &str) -> String {
    if namespace.ends_with('/') {
        format!("{namespace}{operation}")
    } else {
        format!("{namespace}/{operation}")
    }
}

/// Build a request envelope. Field values are escaped by the writer.
pub fn request(
    namespace: &str,
    operation: &str,
    fields: &[(&str, &str)],
) -> Result<String, TransferError> {
    let mut writer = Writer::new(Vec::new());

    writer
        .write_event(Event::Decl(BytesDecl::new("1.0", Some("utf-8"), None)))
        .map_err(xml_err)?;

    let mut envelope = BytesStart::new("soap:Envelope");
    envelope.push_attribute(("xmlns:soap", SOAP_ENV_NS));
    writer.write_event(Event::Start(envelope)).map_err(xml_err)?;
    writer
        .write_event(Event::Start(BytesStart::new("soap:Body")))
        .map_err(xml_err)?;

    let mut op = BytesStart::new(operation);
    op.push_attribute(("xmlns", namespace));
    writer.write_event(Event::Start(op)).map_err(xml_err)?;
    for (name, value) in fields {
        writer
            .write_event(Event::Start(BytesStart::new(*name)))
            .map_err(xml_err)?;
        writer
            .write_event(Event::Text(BytesText::new(value)))
            .map_err(xml_err)?;
        writer
            .write_event(Event::End(BytesEnd::new(*name)))
            .map_err(xml_err)?;
    }
    writer
        .write_event(Event::End(BytesEnd::new(operation)))
        .map_err(xml_err)?;

    writer
        .write_event(Event::End(BytesEnd::new("soap:Body")))
        .map_err(xml_err)?;
    writer
        .write_event(Event::End(BytesEnd::new("soap:Envelope")))
        .map_err(xml_err)?;

    String::from_utf8(writer.into_inner()).map_err(xml_err)
}

fn xml_err(e: impl std::fmt::Display) -> TransferError {
    TransferError::protocol(format!("cannot write request: {e}"), None)
}

/// Wrap `result_xml` as `<{operation}Response><{operation}Result>…` in an
/// envelope. Used to script transports in tests and local tooling.
pub fn response(operation: &str, result_xml: &str) -> String {
    format!(
        "<?xml version=\"1.0\" encoding=\"utf-8\"?>\
         <soap:Envelope xmlns:soap=\"{SOAP_ENV_NS}\"><soap:Body>\
         <{operation}Response xmlns=\"http://tempuri.org/\">\
         <{operation}Result>{result_xml}</{operation}Result>\
         </{operation}Response></soap:Body></soap:Envelope>"
    )
}

/// A SOAP fault envelope.
pub fn fault(code: &str, message: &str) -> String {
    format!(
        "<?xml version=\"1.0\" encoding=\"utf-8\"?>\
         <soap:Envelope xmlns:soap=\"{SOAP_ENV_NS}\"><soap:Body><soap:Fault>\
         <faultcode>{code}</faultcode><faultstring>{message}</faultstring>\
         </soap:Fault></soap:Body></soap:Envelope>"
    )
}

/// Typed access to one element of a parsed response.
#[derive(Clone, Copy)]
pub struct Reader<'a, 'input> {
    node: Node<'a, 'input>,
    raw: &'input str,
}

impl<'a, 'input> Reader<'a, 'input> {
    pub fn name(&self) -> &'a str {
        self.node.tag_name().name()
    }

    fn protocol(&self, message: impl Into<String>) -> TransferError {
        TransferError::protocol(message, Some(self.raw))
    }

    pub fn child(&self, name: &str) -> Option<Reader<'a, 'input>> {
        self.node
            .children()
            .find(|n| n.is_element() && n.tag_name().name().eq_ignore_ascii_case(name))
            .map(|node| Reader { node, raw: self.raw })
    }

    /// All descendants named `name`, in document order.
    pub fn all(&self, name: &str) -> Vec<Reader<'a, 'input>> {
        let raw = self.raw;
        self.node
            .descendants()
            .filter(|n| n.is_element() && n.tag_name().name().eq_ignore_ascii_case(name))
            .map(|node| Reader { node, raw })
            .collect()
    }

    /// Trimmed text of this element, `None` when empty.
    pub fn own_text(&self) -> Option<String> {
        let text: String = self
            .node
            .descendants()
            .filter(|n| n.is_text())
            .filter_map(|n| n.text())
            .collect();
        let text = text.trim();
        (!text.is_empty()).then(|| text.to_string())
    }

    pub fn text(&self, name: &str) -> Option<String> {
        self.child(name).and_then(|child| child.own_text())
    }

    pub fn required_text(&self, name: &str) -> Result<String, TransferError> {
        self.text(name)
            .ok_or_else(|| self.protocol(format!("missing {name} in {}", self.name())))
    }

    pub fn bool(&self, name: &str) -> Result<Option<bool>, TransferError> {
        match self.text(name) {
            None => Ok(None),
            Some(raw) => match raw.to_ascii_lowercase().as_str() {
                "true" | "1" => Ok(Some(true)),
                "false" | "0" => Ok(Some(false)),
                _ => Err(self.protocol(format!("{name} is not a boolean: {raw:?}"))),
            },
        }
    }

    pub fn required_bool(&self, name: &str) -> Result<bool, TransferError> {
        self.bool(name)?
            .ok_or_else(|| self.protocol(format!("missing {name} in {}", self.name())))
    }

    pub fn parsed<T: FromStr>(&self, name: &str) -> Result<Option<T>, TransferError>
    where
        T::Err: std::fmt::Display,
    {
        match self.text(name) {
            None => Ok(None),
            Some(raw) => raw
                .parse()
                .map(Some)
                .map_err(|e: T::Err| self.protocol(format!("{name} has invalid value {raw:?}: {e}"))),
        }
    }

    pub fn required<T: FromStr>(&self, name: &str) -> Result<T, TransferError>
    where
        T::Err: std::fmt::Display,
    {
        self.parsed(name)?
            .ok_or_else(|| self.protocol(format!("missing {name} in {}", self.name())))
    }

    pub fn decimal(&self, name: &str) -> Result<Option<Decimal>, TransferError> {
        self.parsed(name)
    }

    /// Numeric wire code mapped through `from_code`; unknown codes are a
    /// protocol error.
    pub fn code<S>(&self, name: &str, from_code: fn(i32) -> Option<S>) -> Result<Option<S>, TransferError> {
        match self.parsed::<i32>(name)? {
            None => Ok(None),
            Some(code) => from_code(code)
                .map(Some)
                .ok_or_else(|| self.protocol(format!("unknown {name} {code}"))),
        }
    }

    /// Timestamps as sent by the service: RFC 3339, naive ISO 8601 with
    /// optional fraction, or a bare date.
    pub fn datetime(&self, name: &str) -> Result<Option<NaiveDateTime>, TransferError> {
        let Some(raw) = self.text(name) else {
            return Ok(None);
        };
        if let Ok(dt) = DateTime::parse_from_rfc3339(&raw) {
            return Ok(Some(dt.naive_local()));
        }
        if let Ok(dt) = NaiveDateTime::parse_from_str(&raw, "%Y-%m-%dT%H:%M:%S%.f") {
            return Ok(Some(dt));
        }
        if let Ok(date) = NaiveDate::parse_from_str(&raw, "%Y-%m-%d") {
            return Ok(date.and_hms_opt(0, 0, 0));
        }
        Err(self.protocol(format!("{name} is not a timestamp: {raw:?}")))
    }
}

/// Parse `raw` as the response to `operation` and hand the result element to
/// `read`. Faults are classified; a missing body or response element is a
/// protocol error.
pub fn parse_response<T>(
    operation: &str,
    raw: &str,
    read: impl FnOnce(Reader<'_, '_>) -> Result<T, TransferError>,
) -> Result<T, TransferError> {
    let doc = Document::parse(raw)
        .map_err(|e| TransferError::protocol(format!("malformed response envelope: {e}"), Some(raw)))?;
    let body = body_of(&doc, raw)?;

    if let Some(fault_node) = body.child("Fault") {
        return Err(classify_fault(operation, fault_node));
    }

    let response_name = format!("{operation}Response");
    let response = body
        .child(&response_name)
        .ok_or_else(|| TransferError::protocol(format!("missing {response_name}"), Some(raw)))?;
    let result = response
        .child(&format!("{operation}Result"))
        .unwrap_or(response);
    read(result)
}

/// Classified fault carried by `raw`, if it is a well-formed fault envelope.
pub fn fault_of(operation: &str, raw: &str) -> Option<TransferError> {
    let doc = Document::parse(raw).ok()?;
    let body = body_of(&doc, raw).ok()?;
    body.child("Fault").map(|node| classify_fault(operation, node))
}

fn body_of<'a, 'input>(
    doc: &'a Document<'input>,
    raw: &'input str,
) -> Result<Reader<'a, 'input>, TransferError> {
    doc.descendants()
        .find(|n| n.is_element() && n.tag_name().name().eq_ignore_ascii_case("Body"))
        .map(|node| Reader { node, raw })
        .ok_or_else(|| TransferError::protocol("response has no SOAP body", Some(raw)))
}

fn classify_fault(operation: &str, fault: Reader<'_, '_>) -> TransferError {
    let code = fault.text("faultcode").unwrap_or_default();
    let message = fault
        .text("faultstring")
        .or_else(|| fault.child("Reason").and_then(|r| r.own_text()))
        .unwrap_or_else(|| "unspecified fault".to_string());
    let lower = message.to_lowercase();

    if operation == "Login" {
        if CREDENTIAL_FAULT_MARKERS.iter().any(|m| lower.contains(m)) {
            return TransferError::invalid_credentials(message);
        }
    } else if SESSION_FAULT_MARKERS.iter().any(|m| lower.contains(m)) {
        return TransferError::session_expired(message);
    }

    TransferError::protocol(format!("SOAP fault {code}: {message}"), Some(fault.raw))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AuthFailure;
    use einvoice_invoicing::TransferState;

    #[test]
    fn request_escapes_values_and_sets_namespace() {
        let xml = request(
            "http://tempuri.org/",
            "Login",
            &[("userName", "a&b"), ("password", "<p>")],
        )
        .unwrap();
        let doc = Document::parse(&xml).unwrap();
        let login = doc
            .descendants()
            .find(|n| n.tag_name().name() == "Login")
            .unwrap();
        assert_eq!(login.tag_name().namespace(), Some("http://tempuri.org/"));
        let user = login.children().find(|n| n.tag_name().name() == "userName").unwrap();
        assert_eq!(user.text(), Some("a&b"));
        assert!(xml.contains("&lt;p&gt;"));
    }

    #[test]
    fn soap_action_joins_namespace() {
        assert_eq!(soap_action("http://tempuri.org/", "Login"), "http://tempuri.org/Login");
        assert_eq!(soap_action("urn:svc", "Logout"), "urn:svc/Logout");
    }

    #[test]
    fn result_children_match_case_insensitively() {
        let raw = response(
            "GetTransferSalesInvoiceFileStatus",
            "<stateCode>3</stateCode><StateName>Processing</StateName>",
        );
        let (state, name) = parse_response("GetTransferSalesInvoiceFileStatus", &raw, |r| {
            Ok((r.code("StateCode", TransferState::from_code)?, r.text("statename")))
        })
        .unwrap();
        assert_eq!(state, Some(TransferState::Processing));
        assert_eq!(name.as_deref(), Some("Processing"));
    }

    #[test]
    fn missing_required_field_is_protocol_error_with_raw() {
        let raw = response("TransferSalesInvoiceFile", "<Description>ok</Description>");
        let err = parse_response("TransferSalesInvoiceFile", &raw, |r| r.required_bool("OperationCompleted"))
            .unwrap_err();
        match err {
            TransferError::Protocol { message, raw: Some(body) } => {
                assert!(message.contains("OperationCompleted"));
                assert!(body.contains("Description"));
            }
            other => panic!("expected protocol error, got {other:?}"),
        }
    }

    #[test]
    fn unknown_state_code_is_rejected() {
        let raw = response("GetTransferSalesInvoiceFileStatus", "<StateCode>9</StateCode>");
        let err = parse_response("GetTransferSalesInvoiceFileStatus", &raw, |r| {
            r.code("StateCode", TransferState::from_code)
        })
        .unwrap_err();
        assert!(matches!(err, TransferError::Protocol { .. }));
    }

    #[test]
    fn session_fault_is_classified_as_expired() {
        let raw = fault("soap:Server", "Session is not valid");
        let err = parse_response("Logout", &raw, |_| Ok(())).unwrap_err();
        assert!(matches!(
            err,
            TransferError::Authentication { reason: AuthFailure::SessionExpired, .. }
        ));
    }

    #[test]
    fn login_fault_is_classified_as_invalid_credentials() {
        let raw = fault("soap:Client", "Invalid username or password");
        let err = parse_response("Login", &raw, |_| Ok(())).unwrap_err();
        assert!(matches!(
            err,
            TransferError::Authentication { reason: AuthFailure::InvalidCredentials, .. }
        ));
    }

    #[test]
    fn other_faults_are_protocol_errors() {
        let raw = fault("soap:Server", "Object reference not set");
        assert!(matches!(
            parse_response("GetSalesInvoiceStatusWithInvoiceUUID", &raw, |_| Ok(())),
            Err(TransferError::Protocol { .. })
        ));
        assert!(fault_of("Logout", &raw).is_some());
        assert!(fault_of("Logout", &response("Logout", "true")).is_none());
    }

    #[test]
    fn garbage_is_a_protocol_error() {
        assert!(matches!(
            parse_response("Login", "<html>bad gateway", |_| Ok(())),
            Err(TransferError::Protocol { .. })
        ));
        assert!(matches!(
            parse_response("Login", "<a/>", |_| Ok(())),
            Err(TransferError::Protocol { .. })
        ));
    }

    #[test]
    fn booleans_accept_numeric_forms() {
        let raw = response("X", "<A>1</A><B>False</B><C>yes</C>");
        parse_response("X", &raw, |r| {
            assert_eq!(r.bool("A")?, Some(true));
            assert_eq!(r.bool("B")?, Some(false));
            assert!(r.bool("C").is_err());
            assert_eq!(r.bool("D")?, None);
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn timestamps_in_several_forms() {
        let raw = response(
            "X",
            "<A>2024-03-15T10:30:00</A><B>2024-03-15T10:30:00.123+03:00</B><C>2024-03-15</C><D>soon</D>",
        );
        parse_response("X", &raw, |r| {
            let a = r.datetime("A")?.unwrap();
            assert_eq!(a.format("%H:%M").to_string(), "10:30");
            assert!(r.datetime("B")?.is_some());
            assert_eq!(r.datetime("C")?.unwrap().format("%Y-%m-%d").to_string(), "2024-03-15");
            assert!(r.datetime("D").is_err());
            Ok(())
        })
        .unwrap();
    }
}
