use std::fs;
use std::io;

use anyhow::{Context, Result};
use clap::Parser;
use serde_json::{Value, json};

use einvoice_core::InvoiceUuid;
use einvoice_infra::WorkerConfig;
use einvoice_invoicing::{AnswerOutcome, InvoiceDocument};
use einvoice_worker::{Cli, Commands, Worker, failure};

fn main() {
    einvoice_observability::init();

    let cli = Cli::parse();
    let json = cli.json;
    if let Err(err) = run(cli) {
        let report = failure::report(&err);
        tracing::error!(kind = %report.kind, retryable = report.retryable, error = %report.message, "command failed");
        let rendered = failure::render(&report, json);
        if json {
            println!("{rendered}");
        } else {
            eprintln!("{rendered}");
        }
        std::process::exit(failure::exit_code(&report));
    }
}

fn run(cli: Cli) -> Result<()> {
    let cfg = WorkerConfig::from_env().context("invalid EINVOICE_* configuration")?;
    let worker = Worker::from_config(&cfg)?;

    let result = execute(&worker, cli.command);
    worker.close();
    let (summary, text) = result?;

    if cli.json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        println!("{text}");
    }
    Ok(())
}

fn execute(worker: &Worker, command: Commands) -> Result<(Value, String)> {
    match command {
        Commands::Inbox => {
            let report = worker.inbox()?;
            let text = format!(
                "listed {} incoming invoices ({} new, {} known), {} answers reconciled",
                report.listed, report.new, report.known, report.reconciled
            );
            Ok((serde_json::to_value(report)?, text))
        }
        Commands::Watch { resume } => {
            for target in resume {
                worker.adopt(target.uuid, target.transfer_id)?;
            }
            worker.watch(io::stdin().lock())?;
            Ok((json!({ "stopped": true }), "stopped".to_string()))
        }
        Commands::Send {
            file,
            alias,
            no_track,
        } => {
            let raw = fs::read_to_string(&file)
                .with_context(|| format!("reading {}", file.display()))?;
            let doc: InvoiceDocument = serde_json::from_str(&raw)
                .with_context(|| format!("parsing invoice document {}", file.display()))?;

            let sent = worker.send(&doc, alias.as_deref(), !no_track)?;
            let receipt = &sent.receipt;
            let transfer_id = receipt.result.transfer_id.as_ref().map(|id| id.to_string());
            let summary = json!({
                "uuid": receipt.uuid.to_string(),
                "file_name": receipt.file_name,
                "completed": receipt.result.completed,
                "transfer_id": transfer_id,
                "description": receipt.result.description,
                "payable": receipt.totals.payable.to_string(),
                "transfer_state": sent.tracked.map(|t| t.transfer.to_string()),
                "invoice_state": sent.tracked.and_then(|t| t.invoice).map(|s| s.to_string()),
            });

            let mut text = format!(
                "invoice {} ({}) payable {} {}",
                receipt.uuid, receipt.file_name, receipt.totals.payable, doc.currency
            );
            match (&transfer_id, sent.tracked) {
                (None, _) => text.push_str(&format!(
                    "\nnot transferred: {}",
                    receipt.result.description.as_deref().unwrap_or("no description")
                )),
                (Some(id), None) => text.push_str(&format!("\ntransfer {id}")),
                (Some(id), Some(report)) => {
                    text.push_str(&format!("\ntransfer {id}: {}", report.transfer));
                    if let Some(state) = report.invoice {
                        text.push_str(&format!("\ninvoice: {state}"));
                    }
                }
            }
            Ok((summary, text))
        }
        Commands::Status { uuid } => {
            let uuid: InvoiceUuid = uuid.parse()?;
            let status = worker.status(uuid)?;
            let summary = json!({
                "uuid": status.invoice_uuid.to_string(),
                "state": status.state.to_string(),
                "description": status.state_description,
                "answer_state": status.answer_state.to_string(),
                "answer_type": status.answer_type.to_string(),
                "envelope_uuid": status.envelope_uuid,
            });
            let text = format!(
                "invoice {}: {} (answer {} / {})",
                status.invoice_uuid, status.state, status.answer_state, status.answer_type
            );
            Ok((summary, text))
        }
        Commands::Answer {
            uuid,
            outcome,
            note,
        } => {
            let uuid: InvoiceUuid = uuid.parse()?;
            let outcome: AnswerOutcome = outcome.parse()?;
            let receipt = worker.answer(uuid, outcome, note.as_deref())?;
            let summary = json!({
                "uuid": uuid.to_string(),
                "outcome": outcome,
                "completed": receipt.result.completed,
                "description": receipt.result.description,
                "answer_state": receipt.state.to_string(),
            });
            let text = format!("invoice {uuid}: {} ({})", receipt.state, outcome.code());
            Ok((summary, text))
        }
    }
}
