use std::path::PathBuf;
use std::str::FromStr;

use clap::{Parser, Subcommand};

use einvoice_core::{DomainError, InvoiceUuid, TransferId};

/// E-invoice exchange worker.
#[derive(Parser, Debug)]
#[command(name = "einvoice-worker")]
#[command(about = "Send, track and receive UBL-TR e-invoices")]
#[command(version)]
pub struct Cli {
    /// Print results as JSON where available.
    #[arg(long, global = true)]
    pub json: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug, PartialEq, Eq)]
pub enum Commands {
    /// Fetch the incoming invoice list once and record unseen invoices.
    Inbox,

    /// Sync the inbox periodically until stdin is closed.
    ///
    /// Each line read from stdin requests an immediate sync.
    Watch {
        /// Resume tracking an invoice sent by an earlier run. Repeatable.
        #[arg(long = "resume", value_name = "UUID=TRANSFER_ID")]
        resume: Vec<ResumeTarget>,
    },

    /// Build, package and send an invoice, then track it to a terminal state.
    Send {
        /// Invoice document as JSON.
        file: PathBuf,

        /// Routing alias of the customer (e.g. `urn:mail:defaultpk@example.com`).
        alias: Option<String>,

        /// Return after the upload without tracking.
        #[arg(long)]
        no_track: bool,
    },

    /// Query the current state of a sent invoice.
    Status {
        /// Invoice UUID.
        uuid: String,
    },

    /// Accept or reject an incoming commercial invoice.
    Answer {
        /// Invoice UUID.
        uuid: String,

        /// `accept` or `reject`.
        outcome: String,

        /// Free-text note sent with the answer.
        #[arg(long)]
        note: Option<String>,
    },
}

/// Invoice uploaded by an earlier run whose tracking should continue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResumeTarget {
    pub uuid: InvoiceUuid,
    pub transfer_id: TransferId,
}

impl FromStr for ResumeTarget {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (uuid, transfer_id) = s
            .split_once('=')
            .ok_or_else(|| DomainError::validation(format!("expected UUID=TRANSFER_ID, got {s:?}")))?;
        Ok(Self {
            uuid: uuid.trim().parse()?,
            transfer_id: TransferId::new(transfer_id)?,
        })
    }
}
