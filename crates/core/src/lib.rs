//! Shared building blocks of the e-invoice exchange client.
//!
//! This crate contains **pure** primitives (no IO): identifiers, the error
//! taxonomy every layer reports through, money rounding, and the aggregate
//! trait used by the invoice state machines.

pub mod aggregate;
pub mod error;
pub mod id;
pub mod money;

pub use aggregate::{Aggregate, AggregateRoot, execute};
pub use error::{Classify, DomainError, DomainResult, ErrorKind, ErrorReport};
pub use id::{AuditId, InvoiceUuid, TransferId};
pub use money::{round2, sum_rounded};
