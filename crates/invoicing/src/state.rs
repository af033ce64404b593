//! Remote lifecycle states and the monotonic observation rule.
//!
//! Transfer and invoice states only move forward. `error` can be entered from
//! any non-terminal state and is terminal; nothing leaves `success`/`delivered`
//! or `error`. A remote report that would move backwards is a protocol
//! violation, never a new state.

use serde::{Deserialize, Serialize};

/// State of a progressing remote record, as seen by a poller.
pub trait PollState: Copy + Eq + core::fmt::Debug + core::fmt::Display {
    /// Progress order among the non-error states.
    fn rank(self) -> u8;

    fn is_error(self) -> bool;

    fn is_terminal(self) -> bool;

    /// Wire code.
    fn code(self) -> i32;
}

macro_rules! coded_enum {
    ($(#[$meta:meta])* $name:ident { $($variant:ident = $code:literal => $label:literal),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(rename_all = "snake_case")]
        pub enum $name {
            $($variant),+
        }

        impl $name {
            /// Map a wire code; `None` for codes outside the protocol.
            pub fn from_code(code: i32) -> Option<Self> {
                match code {
                    $($code => Some($name::$variant),)+
                    _ => None,
                }
            }

            pub fn as_code(self) -> i32 {
                match self {
                    $($name::$variant => $code),+
                }
            }

            pub fn as_str(self) -> &'static str {
                match self {
                    $($name::$variant => $label),+
                }
            }
        }

        impl core::fmt::Display for $name {
            fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

coded_enum!(
    /// Lifecycle of the raw file submission.
    TransferState {
        Unknown = 1 => "unknown",
        Waiting = 2 => "waiting",
        Processing = 3 => "processing",
        Error = 4 => "error",
        Success = 5 => "success",
    }
);

coded_enum!(
    /// Lifecycle of the invoice document inside the clearinghouse.
    InvoiceState {
        Draft = 1 => "draft",
        WaitingSend = 2 => "waiting_send",
        InProcess = 3 => "in_process",
        Error = 4 => "error",
        Delivered = 5 => "delivered",
    }
);

coded_enum!(
    /// Progress of the answer exchange for an inbound invoice.
    AnswerState {
        NoAnswer = 1 => "no_answer",
        WaitingAnswer = 2 => "waiting_answer",
        InProcess = 3 => "in_process",
        Cancelled = 4 => "cancelled",
        Delivered = 5 => "delivered",
    }
);

coded_enum!(
    /// Outcome recorded once the answer exchange is terminal.
    AnswerType {
        Unknown = 1 => "unknown",
        Returned = 2 => "returned",
        Rejected = 3 => "rejected",
        Accepted = 4 => "accepted",
    }
);

impl PollState for TransferState {
    fn rank(self) -> u8 {
        match self {
            TransferState::Unknown => 0,
            TransferState::Waiting => 1,
            TransferState::Processing => 2,
            TransferState::Success | TransferState::Error => 3,
        }
    }

    fn is_error(self) -> bool {
        self == TransferState::Error
    }

    fn is_terminal(self) -> bool {
        matches!(self, TransferState::Success | TransferState::Error)
    }

    fn code(self) -> i32 {
        self.as_code()
    }
}

impl PollState for InvoiceState {
    fn rank(self) -> u8 {
        match self {
            InvoiceState::Draft => 0,
            InvoiceState::WaitingSend => 1,
            InvoiceState::InProcess => 2,
            InvoiceState::Delivered | InvoiceState::Error => 3,
        }
    }

    fn is_error(self) -> bool {
        self == InvoiceState::Error
    }

    fn is_terminal(self) -> bool {
        matches!(self, InvoiceState::Delivered | InvoiceState::Error)
    }

    fn code(self) -> i32 {
        self.as_code()
    }
}

impl AnswerState {
    pub fn is_terminal(self) -> bool {
        matches!(self, AnswerState::Delivered | AnswerState::Cancelled)
    }
}

/// Result of feeding one observation to a [`StateTracker`].
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Transition<S> {
    First(S),
    Unchanged(S),
    Advanced { from: S, to: S },
}

impl<S: Copy> Transition<S> {
    pub fn state(&self) -> S {
        match *self {
            Transition::First(s) | Transition::Unchanged(s) => s,
            Transition::Advanced { to, .. } => to,
        }
    }

    pub fn is_change(&self) -> bool {
        !matches!(self, Transition::Unchanged(_))
    }
}

/// A reported state that would move a record backwards.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct StateViolation<S> {
    pub from: S,
    pub to: S,
}

impl<S: core::fmt::Display> core::fmt::Display for StateViolation<S> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "state regression from {} to {}", self.from, self.to)
    }
}

/// Tracks the observed state of one remote record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateTracker<S> {
    current: Option<S>,
    observations: u32,
}

impl<S: PollState> Default for StateTracker<S> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S: PollState> StateTracker<S> {
    pub fn new() -> Self {
        Self {
            current: None,
            observations: 0,
        }
    }

    /// Resume tracking from a previously persisted state.
    pub fn resume(state: S) -> Self {
        Self {
            current: Some(state),
            observations: 0,
        }
    }

    pub fn current(&self) -> Option<S> {
        self.current
    }

    pub fn observations(&self) -> u32 {
        self.observations
    }

    pub fn is_terminal(&self) -> bool {
        self.current.is_some_and(PollState::is_terminal)
    }

    /// Feed one remote observation. Rejected observations leave the tracker untouched.
    pub fn observe(&mut self, next: S) -> Result<Transition<S>, StateViolation<S>> {
        let transition = match self.current {
            None => Transition::First(next),
            Some(current) if current == next => Transition::Unchanged(current),
            Some(current) if current.is_terminal() => {
                return Err(StateViolation { from: current, to: next });
            }
            Some(current) if next.is_error() || next.rank() > current.rank() => {
                Transition::Advanced { from: current, to: next }
            }
            Some(current) => return Err(StateViolation { from: current, to: next }),
        };

        self.current = Some(next);
        self.observations += 1;
        Ok(transition)
    }
}
