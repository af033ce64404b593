use std::io::Cursor;
use std::sync::Arc;
use std::time::Duration;

use chrono::NaiveDate;
use clap::Parser;
use rust_decimal_macros::dec;

use einvoice_core::{Classify, ErrorKind, InvoiceUuid, TransferId};
use einvoice_infra::{
    Direction, InMemoryInvoiceStore, InMemoryNotificationSink, InvoiceStore, PollSettings,
    RetryPolicy, Track, WorkerConfig,
};
use einvoice_invoicing::{
    Address, AnswerOutcome, AnswerState, AnswerType, InvoiceDocument, InvoiceProfile, InvoiceState,
    InvoiceTypeCode, LineItem, Party, TransferState,
};
use einvoice_transfer::envelope::response;
use einvoice_transfer::{Credentials, ScriptedTransport, TransferClient};
use einvoice_worker::failure::{self, EXIT_FATAL, EXIT_RETRYABLE};
use einvoice_worker::{Cli, Commands, ResumeTarget, Worker};

struct Harness {
    transport: Arc<ScriptedTransport>,
    store: Arc<InMemoryInvoiceStore>,
    sink: Arc<InMemoryNotificationSink>,
    worker: Worker,
}

fn harness() -> Harness {
    let mut cfg = WorkerConfig::from_lookup(|_| None).unwrap();
    cfg.poll = PollSettings {
        interval: Duration::from_millis(1),
        max_attempts: 5,
    };
    cfg.inbox_interval = Duration::from_secs(3600);

    let transport = Arc::new(ScriptedTransport::new());
    let store = Arc::new(InMemoryInvoiceStore::new());
    let sink = Arc::new(InMemoryNotificationSink::new());
    let worker = Worker::assemble(
        TransferClient::new(transport.clone(), &cfg.client),
        Credentials::new("user", "secret"),
        store.clone(),
        sink.clone(),
        &cfg,
    )
    .with_retry(RetryPolicy::fixed(2, Duration::ZERO));

    Harness {
        transport,
        store,
        sink,
        worker,
    }
}

fn party(identifier: &str, name: &str) -> Party {
    Party {
        identifier: identifier.to_string(),
        name: name.to_string(),
        tax_office: None,
        address: Address {
            street: None,
            district: "Konak".to_string(),
            city: "Izmir".to_string(),
            postal_zone: None,
            country: "Turkiye".to_string(),
        },
    }
}

fn document() -> InvoiceDocument {
    InvoiceDocument {
        number: "ABC2024000000011".to_string(),
        profile: InvoiceProfile::Basic,
        type_code: InvoiceTypeCode::Sales,
        issue_date: NaiveDate::from_ymd_opt(2024, 5, 2).unwrap(),
        currency: "TRY".to_string(),
        supplier: party("1234567890", "Satici A.S."),
        customer: party("9876543210", "Alici Ltd."),
        lines: vec![LineItem {
            name: "Consulting".to_string(),
            quantity: dec!(3),
            unit_code: "HUR".to_string(),
            unit_price: dec!(250),
            tax_rate: dec!(20),
        }],
        notes: vec![],
    }
}

fn invoice_state(code: i32) -> String {
    response(
        "GetSalesInvoiceStatusWithInvoiceUUID",
        &format!("<StateCode>{code}</StateCode><AnswerStateCode>1</AnswerStateCode><AnswerTypeCode>1</AnswerTypeCode>"),
    )
}

fn answered(answer_state: i32, answer_type: i32) -> String {
    response(
        "GetSalesInvoiceStatusWithInvoiceUUID",
        &format!(
            "<StateCode>5</StateCode><AnswerStateCode>{answer_state}</AnswerStateCode><AnswerTypeCode>{answer_type}</AnswerTypeCode>"
        ),
    )
}

fn answer_completed() -> String {
    response(
        "SetPurchaseInvoiceAnswerWithInvoiceUUID",
        "<OperationCompleted>true</OperationCompleted><Description>ok</Description>",
    )
}

fn error_json(err: einvoice_infra::ServiceError) -> (serde_json::Value, i32) {
    let report = failure::report(&anyhow::Error::from(err));
    let rendered: serde_json::Value = serde_json::from_str(&failure::render(&report, true)).unwrap();
    (rendered, failure::exit_code(&report))
}

fn incoming(uuid: InvoiceUuid) -> String {
    response(
        "GetUnTransferredPurchaseInvoiceList",
        &format!(
            "<PurchaseInvoiceInfo><InvoiceUUID>{uuid}</InvoiceUUID><InvoiceNumber>SUP2024000000003</InvoiceNumber>\
             <SenderIdentifier>1111111111</SenderIdentifier><SenderTitle>Tedarikci A.S.</SenderTitle>\
             <ProfileID>TICARIFATURA</ProfileID><InvoiceTypeCode>SATIS</InvoiceTypeCode>\
             <LineExtensionAmount>100</LineExtensionAmount><TaxAmount>20</TaxAmount>\
             <PayableAmount>120</PayableAmount><CurrencyCode>TRY</CurrencyCode>\
             <IsRead>false</IsRead></PurchaseInvoiceInfo>"
        ),
    )
}

#[test]
fn cli_parses_send_with_alias_and_flags() {
    let cli = Cli::try_parse_from([
        "einvoice-worker",
        "--json",
        "send",
        "invoice.json",
        "urn:mail:defaultpk@alici.com.tr",
        "--no-track",
    ])
    .unwrap();
    assert!(cli.json);
    assert_eq!(
        cli.command,
        Commands::Send {
            file: "invoice.json".into(),
            alias: Some("urn:mail:defaultpk@alici.com.tr".to_string()),
            no_track: true,
        }
    );
}

#[test]
fn cli_requires_a_uuid_for_status() {
    assert!(Cli::try_parse_from(["einvoice-worker", "status"]).is_err());
    let cli = Cli::try_parse_from(["einvoice-worker", "answer", "u-1", "reject", "--note", "wrong price"]).unwrap();
    assert_eq!(
        cli.command,
        Commands::Answer {
            uuid: "u-1".to_string(),
            outcome: "reject".to_string(),
            note: Some("wrong price".to_string()),
        }
    );
}

#[test]
fn send_tracks_to_delivered() {
    let h = harness();
    h.transport
        .push_ok(response("Login", "tok"))
        .push_ok(response(
            "TransferSalesInvoiceFile",
            "<OperationCompleted>true</OperationCompleted><TransferFileUniqueId>TR-9</TransferFileUniqueId>",
        ))
        .push_ok(response("GetTransferSalesInvoiceFileStatus", "<StateCode>5</StateCode>"))
        .push_ok(invoice_state(5));

    let sent = h.worker.send(&document(), Some("urn:mail:defaultpk@alici.com.tr"), true).unwrap();
    assert_eq!(sent.receipt.totals.payable, dec!(900));
    let tracked = sent.tracked.unwrap();
    assert_eq!(tracked.transfer, TransferState::Success);
    assert_eq!(tracked.invoice, Some(InvoiceState::Delivered));

    let header = h.store.require_header(sent.receipt.uuid).unwrap();
    assert_eq!(header.invoice_state, InvoiceState::Delivered);
    assert_eq!(h.sink.for_track(Track::Invoice).len(), 1);
    assert_eq!(h.transport.remaining(), 0);
}

#[test]
fn send_without_tracking_stops_after_upload() {
    let h = harness();
    h.transport.push_ok(response("Login", "tok")).push_ok(response(
        "TransferSalesInvoiceFile",
        "<OperationCompleted>true</OperationCompleted><TransferFileUniqueId>TR-10</TransferFileUniqueId>",
    ));

    let sent = h.worker.send(&document(), None, false).unwrap();
    assert!(sent.tracked.is_none());
    assert_eq!(h.transport.call_count(), 2);
}

#[test]
fn status_of_unknown_invoice_queries_directly() {
    let h = harness();
    h.transport
        .push_ok(response("Login", "tok"))
        .push_ok(invoice_state(3));

    let status = h.worker.status(InvoiceUuid::new()).unwrap();
    assert_eq!(status.state, InvoiceState::InProcess);
    assert!(h.store.list_headers(None).unwrap().is_empty());
}

#[test]
fn answer_syncs_inbox_for_unknown_invoice() {
    let h = harness();
    let uuid = InvoiceUuid::new();
    h.transport
        .push_ok(response("Login", "tok"))
        .push_ok(incoming(uuid))
        .push_ok(answer_completed());

    let receipt = h.worker.answer(uuid, AnswerOutcome::Accepted, Some("thanks")).unwrap();
    assert!(receipt.result.completed);
    assert_eq!(receipt.state, AnswerState::InProcess);

    let header = h.store.require_header(uuid).unwrap();
    assert_eq!(header.direction, Direction::Inbound);
    assert_eq!(h.sink.for_track(Track::Received).len(), 1);
}

#[test]
fn answer_for_invoice_missing_from_inbox_is_not_found() {
    let h = harness();
    h.transport
        .push_ok(response("Login", "tok"))
        .push_ok(response("GetUnTransferredPurchaseInvoiceList", ""));

    let err = h.worker.answer(InvoiceUuid::new(), AnswerOutcome::Rejected, None).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::BusinessRule);
    assert_eq!(h.transport.call_count(), 2);
}

#[test]
fn watch_returns_when_control_input_ends() {
    let h = harness();
    h.transport
        .push_ok(response("Login", "tok"))
        .push_ok(response("GetUnTransferredPurchaseInvoiceList", ""));

    h.worker.watch(Cursor::new("")).unwrap();
}

#[test]
fn cli_parses_resume_targets_for_watch() {
    let uuid = InvoiceUuid::new();
    let cli = Cli::try_parse_from([
        "einvoice-worker".to_string(),
        "watch".to_string(),
        "--resume".to_string(),
        format!("{uuid}=TR-7"),
    ])
    .unwrap();
    assert_eq!(
        cli.command,
        Commands::Watch {
            resume: vec![ResumeTarget {
                uuid,
                transfer_id: TransferId::new("TR-7").unwrap(),
            }],
        }
    );
    assert!(Cli::try_parse_from(["einvoice-worker", "watch", "--resume", "TR-7"]).is_err());
}

#[test]
fn adopted_invoice_is_stored_for_resume() {
    let h = harness();
    let uuid = InvoiceUuid::new();
    h.worker.adopt(uuid, TransferId::new("TR-7").unwrap()).unwrap();

    let header = h.store.require_header(uuid).unwrap();
    assert_eq!(header.direction, Direction::Outbound);
    assert_eq!(header.transfer_id, Some(TransferId::new("TR-7").unwrap()));
    assert_eq!(h.transport.call_count(), 0);
}

#[test]
fn inbox_reconciles_answer_to_delivered() {
    let h = harness();
    let uuid = InvoiceUuid::new();
    h.transport
        .push_ok(response("Login", "tok"))
        .push_ok(incoming(uuid))
        .push_ok(answer_completed())
        .push_ok(incoming(uuid))
        .push_ok(answered(5, 4));

    h.worker.answer(uuid, AnswerOutcome::Accepted, None).unwrap();
    assert_eq!(h.store.require_header(uuid).unwrap().answer_state, AnswerState::InProcess);

    let report = h.worker.inbox().unwrap();
    assert_eq!(report.known, 1);
    assert_eq!(report.reconciled, 1);

    let header = h.store.require_header(uuid).unwrap();
    assert_eq!(header.answer_state, AnswerState::Delivered);
    assert_eq!(header.answer_type, AnswerType::Accepted);
    let answers = h.sink.for_track(Track::Answer);
    assert_eq!(answers.last().unwrap().to, "delivered");
    assert_eq!(h.transport.remaining(), 0);
}

#[test]
fn transient_failure_reports_retryable_json() {
    let h = harness();
    h.transport
        .push_ok(response("Login", "tok"))
        .push_status(503, "")
        .push_status(503, "")
        .push_status(503, "");

    let err = h.worker.status(InvoiceUuid::new()).unwrap_err();
    let (rendered, code) = error_json(err);
    assert_eq!(rendered["error"]["kind"], "transient_network");
    assert_eq!(rendered["error"]["retryable"], true);
    assert!(rendered["error"]["message"].as_str().unwrap().contains("HTTP 503"));
    assert_eq!(code, EXIT_RETRYABLE);
}

#[test]
fn protocol_failure_reports_fatal_json() {
    let h = harness();
    h.transport
        .push_ok(response("Login", "tok"))
        .push_status(404, "<html>not found</html>");

    let err = h.worker.status(InvoiceUuid::new()).unwrap_err();
    let (rendered, code) = error_json(err);
    assert_eq!(rendered["error"]["kind"], "protocol");
    assert_eq!(rendered["error"]["retryable"], false);
    assert!(rendered["error"]["message"].as_str().unwrap().contains("unexpected HTTP status 404"));
    assert_eq!(code, EXIT_FATAL);
    assert_eq!(h.transport.call_count(), 2);
}
