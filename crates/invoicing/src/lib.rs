//! Invoice domain of the e-invoice exchange client.
//!
//! Pure, deterministic domain logic (no IO): the outbound document and its
//! totals, the remote lifecycle states with their monotonic observation rule,
//! inbound invoice metadata, and the answer state machine.

pub mod answer;
pub mod document;
pub mod purchase;
pub mod state;

pub use answer::{AnswerCommand, AnswerEvent, AnswerOutcome, InboundInvoice};
pub use document::{
    Address, InvoiceDocument, InvoiceProfile, InvoiceTypeCode, LineItem, Party, TaxSubtotal, Totals,
};
pub use purchase::{AmountBreakdown, CustomerAlias, PurchaseInvoiceInfo};
pub use state::{
    AnswerState, AnswerType, InvoiceState, PollState, StateTracker, StateViolation, TransferState,
    Transition,
};
