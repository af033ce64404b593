//! Accept/reject answer state machine for inbound invoices.
//!
//! ```text
//! no_answer --(fetch)--> waiting_answer --(submit)--> in_process --(confirm)--> delivered
//!                                                     \--(remote rejection)--> cancelled
//! ```
//!
//! `handle` is pure: a driver calls it *before* the network call so that a
//! rejected command never reaches the remote side, and applies the returned
//! events only once the remote call succeeded.

use serde::{Deserialize, Serialize};

use einvoice_core::{Aggregate, AggregateRoot, DomainError, InvoiceUuid};

use crate::document::InvoiceProfile;
use crate::purchase::PurchaseInvoiceInfo;
use crate::state::{AnswerState, AnswerType};

/// Answer the receiver gives to a commercial invoice.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AnswerOutcome {
    Accepted,
    Rejected,
}

impl AnswerOutcome {
    /// Localized response code carried on the wire and in the answer document.
    pub fn code(self) -> &'static str {
        match self {
            AnswerOutcome::Accepted => "KABUL",
            AnswerOutcome::Rejected => "RED",
        }
    }

    pub fn answer_type(self) -> AnswerType {
        match self {
            AnswerOutcome::Accepted => AnswerType::Accepted,
            AnswerOutcome::Rejected => AnswerType::Rejected,
        }
    }
}

impl core::str::FromStr for AnswerOutcome {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "accept" | "accepted" | "kabul" => Ok(AnswerOutcome::Accepted),
            "reject" | "rejected" | "red" => Ok(AnswerOutcome::Rejected),
            other => Err(DomainError::validation(format!("unknown answer outcome: {other}"))),
        }
    }
}

/// Aggregate root: an inbound invoice and its answer exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundInvoice {
    id: InvoiceUuid,
    info: Option<PurchaseInvoiceInfo>,
    answer_state: AnswerState,
    answer_type: AnswerType,
    submitted: Option<AnswerOutcome>,
    note: Option<String>,
    version: u64,
}

impl InboundInvoice {
    /// Create an empty, not-yet-fetched instance.
    pub fn empty(id: InvoiceUuid) -> Self {
        Self {
            id,
            info: None,
            answer_state: AnswerState::NoAnswer,
            answer_type: AnswerType::Unknown,
            submitted: None,
            note: None,
            version: 0,
        }
    }

    /// Rebuild from persisted bookkeeping (e.g. after a restart).
    pub fn restore(
        info: PurchaseInvoiceInfo,
        answer_state: AnswerState,
        answer_type: AnswerType,
        submitted: Option<AnswerOutcome>,
    ) -> Self {
        Self {
            id: info.uuid,
            info: Some(info),
            answer_state,
            answer_type,
            submitted,
            note: None,
            version: 0,
        }
    }

    pub fn uuid(&self) -> InvoiceUuid {
        self.id
    }

    pub fn info(&self) -> Option<&PurchaseInvoiceInfo> {
        self.info.as_ref()
    }

    pub fn answer_state(&self) -> AnswerState {
        self.answer_state
    }

    pub fn answer_type(&self) -> AnswerType {
        self.answer_type
    }

    pub fn submitted(&self) -> Option<AnswerOutcome> {
        self.submitted
    }

    pub fn note(&self) -> Option<&str> {
        self.note.as_deref()
    }

    /// Terminal with an outcome recorded.
    pub fn is_answered(&self) -> bool {
        self.answer_state.is_terminal() && self.answer_type != AnswerType::Unknown
    }
}

impl AggregateRoot for InboundInvoice {
    type Id = InvoiceUuid;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum AnswerCommand {
    Fetch(PurchaseInvoiceInfo),
    Submit {
        outcome: AnswerOutcome,
        note: Option<String>,
    },
    /// Remote side confirmed delivery of the answer.
    Confirm { reported_type: Option<AnswerType> },
    /// Remote side rejected the answer.
    Cancel { reported_type: Option<AnswerType> },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum AnswerEvent {
    InvoiceFetched(PurchaseInvoiceInfo),
    AnswerSubmitted {
        outcome: AnswerOutcome,
        note: Option<String>,
    },
    AnswerDelivered { answer_type: AnswerType },
    AnswerCancelled { answer_type: AnswerType },
}

impl Aggregate for InboundInvoice {
    type Command = AnswerCommand;
    type Event = AnswerEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            AnswerEvent::InvoiceFetched(info) => {
                self.id = info.uuid;
                self.info = Some(info.clone());
                self.answer_state = AnswerState::WaitingAnswer;
            }
            AnswerEvent::AnswerSubmitted { outcome, note } => {
                self.submitted = Some(*outcome);
                self.note = note.clone();
                self.answer_state = AnswerState::InProcess;
            }
            AnswerEvent::AnswerDelivered { answer_type } => {
                self.answer_state = AnswerState::Delivered;
                self.answer_type = *answer_type;
            }
            AnswerEvent::AnswerCancelled { answer_type } => {
                self.answer_state = AnswerState::Cancelled;
                self.answer_type = *answer_type;
            }
        }

        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            AnswerCommand::Fetch(info) => self.handle_fetch(info),
            AnswerCommand::Submit { outcome, note } => self.handle_submit(*outcome, note.as_deref()),
            AnswerCommand::Confirm { reported_type } => {
                self.ensure_in_process()?;
                let answer_type = reported_type
                    .filter(|t| *t != AnswerType::Unknown)
                    .or_else(|| self.submitted.map(AnswerOutcome::answer_type))
                    .unwrap_or(AnswerType::Unknown);
                Ok(vec![AnswerEvent::AnswerDelivered { answer_type }])
            }
            AnswerCommand::Cancel { reported_type } => {
                self.ensure_in_process()?;
                let answer_type = reported_type
                    .filter(|t| *t != AnswerType::Unknown)
                    .unwrap_or(AnswerType::Returned);
                Ok(vec![AnswerEvent::AnswerCancelled { answer_type }])
            }
        }
    }
}

impl InboundInvoice {
    fn handle_fetch(&self, info: &PurchaseInvoiceInfo) -> Result<Vec<AnswerEvent>, DomainError> {
        if self.info.is_some() {
            return Err(DomainError::conflict("invoice already fetched"));
        }
        if info.uuid != self.id {
            return Err(DomainError::invariant("invoice uuid mismatch"));
        }
        Ok(vec![AnswerEvent::InvoiceFetched(info.clone())])
    }

    fn handle_submit(
        &self,
        outcome: AnswerOutcome,
        note: Option<&str>,
    ) -> Result<Vec<AnswerEvent>, DomainError> {
        let Some(info) = &self.info else {
            return Err(DomainError::validation("invoice has not been fetched"));
        };

        match self.answer_state {
            AnswerState::Delivered | AnswerState::Cancelled => {
                return Err(DomainError::conflict(format!(
                    "invoice already answered ({}, {})",
                    self.answer_state, self.answer_type
                )));
            }
            AnswerState::InProcess => {
                return Err(DomainError::conflict(
                    "answer already submitted; awaiting remote confirmation",
                ));
            }
            AnswerState::NoAnswer | AnswerState::WaitingAnswer => {}
        }

        if info.profile != InvoiceProfile::Commercial {
            return Err(DomainError::validation(format!(
                "only TICARIFATURA invoices can be answered (profile {})",
                info.profile.code()
            )));
        }

        let note = note.map(str::trim).filter(|n| !n.is_empty());
        if outcome == AnswerOutcome::Rejected && note.is_none() {
            return Err(DomainError::validation("a note is required when rejecting"));
        }

        Ok(vec![AnswerEvent::AnswerSubmitted {
            outcome,
            note: note.map(str::to_string),
        }])
    }

    fn ensure_in_process(&self) -> Result<(), DomainError> {
        if self.answer_state != AnswerState::InProcess {
            return Err(DomainError::conflict(format!(
                "no answer in flight (state {})",
                self.answer_state
            )));
        }
        Ok(())
    }
}
