//! Status polling.
//!
//! A poll runs until the observed state is terminal, the attempt budget is
//! spent, a non-retryable error occurs, or the caller cancels. Every
//! observation goes through a [`StateTracker`], so a regression reported by
//! the remote side stops the poll as a protocol violation instead of being
//! accepted.

use std::io;
use std::sync::{Arc, Condvar, Mutex};
use std::thread;
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, info, warn};

use einvoice_core::{Classify, ErrorKind};
use einvoice_invoicing::{InvoiceState, PollState, StateTracker, StateViolation, TransferState, Transition};
use einvoice_transfer::{SalesInvoiceStatus, TransferError, TransferStatus};

/// Cooperative cancellation shared between a poll and its owner.
///
/// Waiting on the token is interrupted as soon as it is cancelled.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    inner: Arc<(Mutex<bool>, Condvar)>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        let (flag, cvar) = &*self.inner;
        *flag.lock().unwrap_or_else(|e| e.into_inner()) = true;
        cvar.notify_all();
    }

    pub fn is_cancelled(&self) -> bool {
        *self.inner.0.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Sleep for up to `timeout`. Returns `true` if cancelled.
    pub fn wait(&self, timeout: Duration) -> bool {
        let (flag, cvar) = &*self.inner;
        let guard = flag.lock().unwrap_or_else(|e| e.into_inner());
        let (guard, _) = cvar
            .wait_timeout_while(guard, timeout, |cancelled| !*cancelled)
            .unwrap_or_else(|e| e.into_inner());
        *guard
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollSettings {
    pub interval: Duration,
    pub max_attempts: u32,
}

impl Default for PollSettings {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(10),
            max_attempts: 30,
        }
    }
}

/// A status response that carries a pollable state.
pub trait StatusReport {
    type State: PollState;

    fn state(&self) -> Self::State;

    fn description(&self) -> Option<String> {
        None
    }
}

impl StatusReport for TransferStatus {
    type State = TransferState;

    fn state(&self) -> TransferState {
        self.state
    }

    fn description(&self) -> Option<String> {
        self.description.clone().or_else(|| self.name.clone())
    }
}

impl StatusReport for SalesInvoiceStatus {
    type State = InvoiceState;

    fn state(&self) -> InvoiceState {
        self.state
    }

    fn description(&self) -> Option<String> {
        self.state_description.clone().or_else(|| self.state_name.clone())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollOutcome<S> {
    /// Terminal state reached.
    pub state: S,
    /// Queries made by this poll.
    pub attempts: u32,
}

#[derive(Debug, Error)]
pub enum PollError<S: PollState> {
    #[error("polling {subject} timed out after {attempts} attempts (last state: {last_state:?})")]
    TimedOut {
        subject: String,
        last_state: Option<S>,
        last_error: Option<TransferError>,
        attempts: u32,
    },

    #[error("polling {subject} cancelled (last state: {last_state:?})")]
    Cancelled { subject: String, last_state: Option<S> },

    #[error("protocol violation while polling {subject}: {violation}")]
    Violation {
        subject: String,
        violation: StateViolation<S>,
    },

    #[error("polling {subject} failed: {error}")]
    Failed {
        subject: String,
        last_state: Option<S>,
        error: TransferError,
    },
}

impl<S: PollState> PollError<S> {
    /// Last state accepted before the poll stopped.
    pub fn last_state(&self) -> Option<S> {
        match self {
            PollError::TimedOut { last_state, .. }
            | PollError::Cancelled { last_state, .. }
            | PollError::Failed { last_state, .. } => *last_state,
            PollError::Violation { violation, .. } => Some(violation.from),
        }
    }
}

impl<S: PollState> Classify for PollError<S> {
    fn kind(&self) -> ErrorKind {
        match self {
            PollError::TimedOut { last_error, .. } => last_error
                .as_ref()
                .map(Classify::kind)
                .unwrap_or(ErrorKind::TransientNetwork),
            PollError::Cancelled { .. } => ErrorKind::BusinessRule,
            PollError::Violation { .. } => ErrorKind::Protocol,
            PollError::Failed { error, .. } => error.kind(),
        }
    }

    fn retryable(&self) -> bool {
        match self {
            PollError::TimedOut { .. } => true,
            PollError::Failed { error, .. } => error.retryable(),
            PollError::Cancelled { .. } | PollError::Violation { .. } => false,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct StatusPoller {
    settings: PollSettings,
}

impl StatusPoller {
    pub fn new(settings: PollSettings) -> Self {
        Self { settings }
    }

    pub fn settings(&self) -> PollSettings {
        self.settings
    }

    /// Make exactly one query and record the observation.
    pub fn poll_once<R, Q>(
        &self,
        subject: &str,
        tracker: &mut StateTracker<R::State>,
        query: Q,
    ) -> Result<(Transition<R::State>, R), PollError<R::State>>
    where
        R: StatusReport,
        Q: FnOnce() -> Result<R, TransferError>,
    {
        let report = query().map_err(|error| PollError::Failed {
            subject: subject.to_string(),
            last_state: tracker.current(),
            error,
        })?;
        let transition = observe(subject, tracker, report.state())?;
        Ok((transition, report))
    }

    /// Query until the tracked state is terminal.
    ///
    /// Retryable query errors use up an attempt and are retried on the next
    /// tick; any other error stops the poll. `on_change` sees every accepted
    /// transition that changed the state, including the first observation.
    pub fn poll_until_terminal<R, Q, F>(
        &self,
        subject: &str,
        tracker: &mut StateTracker<R::State>,
        mut query: Q,
        cancel: &CancelToken,
        mut on_change: F,
    ) -> Result<PollOutcome<R::State>, PollError<R::State>>
    where
        R: StatusReport,
        Q: FnMut() -> Result<R, TransferError>,
        F: FnMut(&Transition<R::State>, &R),
    {
        if let Some(state) = tracker.current().filter(|s| s.is_terminal()) {
            debug!(subject, %state, "already terminal, nothing to poll");
            return Ok(PollOutcome { state, attempts: 0 });
        }

        let mut last_error: Option<TransferError> = None;
        let max_attempts = self.settings.max_attempts.max(1);

        for attempt in 1..=max_attempts {
            if cancel.is_cancelled() {
                return Err(cancelled(subject, tracker));
            }

            match query() {
                Ok(report) => {
                    let transition = observe(subject, tracker, report.state())?;
                    if transition.is_change() {
                        debug!(subject, attempt, state = %transition.state(), "state changed");
                        on_change(&transition, &report);
                    }
                    let state = transition.state();
                    if state.is_terminal() {
                        info!(subject, attempt, %state, "reached terminal state");
                        return Ok(PollOutcome { state, attempts: attempt });
                    }
                }
                Err(error) if error.retryable() => {
                    warn!(subject, attempt, error = %error, "status query failed, will retry");
                    last_error = Some(error);
                }
                Err(error) => {
                    return Err(PollError::Failed {
                        subject: subject.to_string(),
                        last_state: tracker.current(),
                        error,
                    });
                }
            }

            if attempt < max_attempts && cancel.wait(self.settings.interval) {
                return Err(cancelled(subject, tracker));
            }
        }

        warn!(subject, attempts = max_attempts, "polling gave up before a terminal state");
        Err(PollError::TimedOut {
            subject: subject.to_string(),
            last_state: tracker.current(),
            last_error,
            attempts: max_attempts,
        })
    }
}

fn observe<S: PollState>(
    subject: &str,
    tracker: &mut StateTracker<S>,
    next: S,
) -> Result<Transition<S>, PollError<S>> {
    tracker.observe(next).map_err(|violation| {
        warn!(subject, from = %violation.from, to = %violation.to, "remote state regressed");
        PollError::Violation {
            subject: subject.to_string(),
            violation,
        }
    })
}

fn cancelled<S: PollState>(subject: &str, tracker: &StateTracker<S>) -> PollError<S> {
    info!(subject, "polling cancelled");
    PollError::Cancelled {
        subject: subject.to_string(),
        last_state: tracker.current(),
    }
}

/// A poll running on its own named thread.
pub struct PollTask<T> {
    cancel: CancelToken,
    join: thread::JoinHandle<T>,
}

impl<T: Send + 'static> PollTask<T> {
    /// Run `job` on a new thread. The job receives the task's cancel token.
    pub fn spawn<F>(name: impl Into<String>, job: F) -> io::Result<Self>
    where
        F: FnOnce(CancelToken) -> T + Send + 'static,
    {
        let cancel = CancelToken::new();
        let token = cancel.clone();
        let join = thread::Builder::new().name(name.into()).spawn(move || job(token))?;
        Ok(Self { cancel, join })
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }

    /// Wait for the job. A panic inside the job is propagated.
    pub fn join(self) -> T {
        match self.join.join() {
            Ok(value) => value,
            Err(panic) => std::panic::resume_unwind(panic),
        }
    }
}
