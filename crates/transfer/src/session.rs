//! Session values and the manager that owns the live token.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use crate::client::TransferClient;
use crate::config::{Credentials, Mode};
use crate::error::TransferError;

/// An authenticated session.
///
/// `expires_at` is a local estimate (`issued_at + ttl`); the remote side may
/// invalidate the token earlier, which surfaces as
/// [`AuthFailure::SessionExpired`](crate::AuthFailure::SessionExpired).
#[derive(Clone, PartialEq, Eq)]
pub struct Session {
    token: String,
    issued_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
    mode: Mode,
}

impl Session {
    pub fn new(token: impl Into<String>, mode: Mode, ttl: Duration) -> Self {
        let issued_at = Utc::now();
        let ttl = chrono::Duration::from_std(ttl).unwrap_or_else(|_| chrono::Duration::days(1));
        Self {
            token: token.into(),
            issued_at,
            expires_at: issued_at + ttl,
            mode,
        }
    }

    /// The raw session code sent with every request. Never log it.
    pub fn token(&self) -> &str {
        &self.token
    }

    pub fn issued_at(&self) -> DateTime<Utc> {
        self.issued_at
    }

    pub fn expires_at(&self) -> DateTime<Utc> {
        self.expires_at
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("token", &"<redacted>")
            .field("issued_at", &self.issued_at)
            .field("expires_at", &self.expires_at)
            .field("mode", &self.mode)
            .finish()
    }
}

/// Holds at most one live session for a client.
///
/// All token reads and replacements go through one mutex. Remote calls made
/// via [`with_session`](Self::with_session) run outside the lock.
pub struct SessionManager {
    client: Arc<TransferClient>,
    credentials: Credentials,
    current: Mutex<Option<Session>>,
}

impl SessionManager {
    pub fn new(client: Arc<TransferClient>, credentials: Credentials) -> Self {
        Self {
            client,
            credentials,
            current: Mutex::new(None),
        }
    }

    pub fn client(&self) -> &TransferClient {
        &self.client
    }

    fn slot(&self) -> MutexGuard<'_, Option<Session>> {
        self.current.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Authenticate and replace whatever session was held.
    pub fn login(&self) -> Result<Session, TransferError> {
        let mut slot = self.slot();
        self.login_into(&mut slot)
    }

    fn login_into(&self, slot: &mut Option<Session>) -> Result<Session, TransferError> {
        match self.client.login(&self.credentials) {
            Ok(session) => {
                info!(mode = %session.mode(), expires_at = %session.expires_at(), "logged in");
                *slot = Some(session.clone());
                Ok(session)
            }
            Err(err) => {
                *slot = None;
                warn!(error = %err, "login failed");
                Err(err)
            }
        }
    }

    pub fn current(&self) -> Option<Session> {
        self.slot().clone()
    }

    /// The live session, logging in when none is held or the local TTL ran out.
    pub fn ensure_valid(&self) -> Result<Session, TransferError> {
        let mut slot = self.slot();
        if let Some(session) = slot.as_ref().filter(|s| !s.is_expired()) {
            return Ok(session.clone());
        }
        if slot.is_some() {
            debug!("session ttl elapsed, re-authenticating");
        }
        self.login_into(&mut slot)
    }

    /// Run `op` with a valid session. If the remote side reports the session
    /// as expired, log in again once and retry; a second rejection is
    /// returned to the caller.
    pub fn with_session<T>(
        &self,
        mut op: impl FnMut(&TransferClient, &Session) -> Result<T, TransferError>,
    ) -> Result<T, TransferError> {
        let session = self.ensure_valid()?;
        match op(&self.client, &session) {
            Err(err) if err.is_session_expired() => {
                warn!(error = %err, "session rejected, re-authenticating once");
                let fresh = self.replace_rejected(&session)?;
                op(&self.client, &fresh)
            }
            other => other,
        }
    }

    /// Replace `rejected` with a new session, unless another caller already
    /// did so; in that case their session is reused.
    fn replace_rejected(&self, rejected: &Session) -> Result<Session, TransferError> {
        let mut slot = self.slot();
        let refreshed = slot
            .as_ref()
            .filter(|current| current.token() != rejected.token() && !current.is_expired())
            .cloned();
        if let Some(current) = refreshed {
            debug!("session already refreshed by another caller");
            return Ok(current);
        }
        self.login_into(&mut slot)
    }

    /// Close the held session, if any. The local session is dropped even when
    /// the remote call fails.
    pub fn logout(&self) -> Result<(), TransferError> {
        let Some(session) = self.slot().take() else {
            return Ok(());
        };
        self.client.logout(&session)?;
        info!("logged out");
        Ok(())
    }
}
