//! Per-principal verification sessions and the confirmation state machine.
//!
//! `Idle -> Resolving -> AwaitingConfirmation -> {Confirmed, Cancelled, Expired}`.
//! A [`SessionSlot`] owns the principal's cache entry for the lifetime of one
//! workflow run and releases it on drop, whatever the terminal state.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use thiserror::Error;
use tokio::time::Instant;

use crate::reply_waiter::{ReplyWaiter, WaitError, WaitOutcome};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
/// Normalized confirmation reply.
pub enum ConfirmationToken {
    Affirm,
    Deny,
}

impl ConfirmationToken {
    /// Parses a reply, ignoring case and surrounding whitespace.
    pub fn parse(content: &str) -> Option<Self> {
        match content.trim().to_ascii_lowercase().as_str() {
            "yes" | "y" => Some(Self::Affirm),
            "no" | "n" => Some(Self::Deny),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerificationOutcome {
    Confirmed,
    Cancelled,
    Expired,
}

impl VerificationOutcome {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Confirmed => "confirmed",
            Self::Cancelled => "cancelled",
            Self::Expired => "expired",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
/// Candidate link awaiting a human yes/no.
pub struct VerificationSession {
    pub principal_id: String,
    pub candidate_profile_id: String,
    pub candidate_label: String,
    pub profile_url: String,
    pub created_at: Instant,
    pub expires_at: Instant,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionPhase {
    Resolving,
    AwaitingConfirmation(VerificationSession),
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SessionError {
    #[error("a verification is already pending for principal '{0}'")]
    AlreadyPending(String),
    #[error("verification session cache is full ({0} live sessions)")]
    CacheFull(usize),
}

#[derive(Debug)]
struct SessionEntry {
    slot_id: u64,
    phase: SessionPhase,
    expires_at: Instant,
}

/// Bounded, time-evicted cache of live sessions keyed by principal.
#[derive(Debug)]
pub struct SessionCache {
    capacity: usize,
    ttl: Duration,
    entries: Mutex<HashMap<String, SessionEntry>>,
    next_slot_id: AtomicU64,
}

impl SessionCache {
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        Self {
            capacity: capacity.max(1),
            ttl,
            entries: Mutex::new(HashMap::new()),
            next_slot_id: AtomicU64::new(1),
        }
    }

    /// Claims the principal's session slot. A second claim while one is live fails.
    pub fn reserve(self: &Arc<Self>, principal_id: &str) -> Result<SessionSlot, SessionError> {
        let now = Instant::now();
        let mut entries = self.lock_entries();
        entries.retain(|_, entry| entry.expires_at > now);
        if entries.contains_key(principal_id) {
            return Err(SessionError::AlreadyPending(principal_id.to_string()));
        }
        if entries.len() >= self.capacity {
            return Err(SessionError::CacheFull(entries.len()));
        }

        let slot_id = self.next_slot_id.fetch_add(1, Ordering::Relaxed);
        entries.insert(
            principal_id.to_string(),
            SessionEntry {
                slot_id,
                phase: SessionPhase::Resolving,
                expires_at: now + self.ttl,
            },
        );
        Ok(SessionSlot {
            cache: Arc::clone(self),
            principal_id: principal_id.to_string(),
            slot_id,
        })
    }

    pub fn phase(&self, principal_id: &str) -> Option<SessionPhase> {
        let now = Instant::now();
        let mut entries = self.lock_entries();
        entries.retain(|_, entry| entry.expires_at > now);
        entries.get(principal_id).map(|entry| entry.phase.clone())
    }

    pub fn len(&self) -> usize {
        let now = Instant::now();
        let mut entries = self.lock_entries();
        entries.retain(|_, entry| entry.expires_at > now);
        entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock_entries(&self) -> MutexGuard<'_, HashMap<String, SessionEntry>> {
        match self.entries.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

/// Exclusive claim on one principal's session entry.
#[derive(Debug)]
pub struct SessionSlot {
    cache: Arc<SessionCache>,
    principal_id: String,
    slot_id: u64,
}

impl SessionSlot {
    /// Moves the slot to `AwaitingConfirmation` with a resolved candidate.
    pub fn await_confirmation(
        &self,
        candidate_profile_id: &str,
        candidate_label: &str,
        profile_url: &str,
    ) -> VerificationSession {
        let created_at = Instant::now();
        let mut entries = self.cache.lock_entries();
        let expires_at = entries
            .get(&self.principal_id)
            .filter(|entry| entry.slot_id == self.slot_id)
            .map(|entry| entry.expires_at)
            .unwrap_or(created_at + self.cache.ttl);
        let session = VerificationSession {
            principal_id: self.principal_id.clone(),
            candidate_profile_id: candidate_profile_id.to_string(),
            candidate_label: candidate_label.to_string(),
            profile_url: profile_url.to_string(),
            created_at,
            expires_at,
        };
        entries.insert(
            self.principal_id.clone(),
            SessionEntry {
                slot_id: self.slot_id,
                phase: SessionPhase::AwaitingConfirmation(session.clone()),
                expires_at,
            },
        );
        session
    }
}

impl Drop for SessionSlot {
    fn drop(&mut self) {
        let mut entries = self.cache.lock_entries();
        if entries
            .get(&self.principal_id)
            .is_some_and(|entry| entry.slot_id == self.slot_id)
        {
            entries.remove(&self.principal_id);
        }
    }
}

/// Waits for the principal's yes/no and maps it onto a terminal state.
///
/// Replies that are neither affirmative nor negative do not end the wait.
pub async fn await_verdict(
    waiter: &ReplyWaiter,
    session: &VerificationSession,
    window: Duration,
) -> Result<VerificationOutcome, WaitError> {
    let outcome = waiter
        .wait_for(
            &session.principal_id,
            |content| ConfirmationToken::parse(content).is_some(),
            window,
        )
        .await?;
    Ok(match outcome {
        WaitOutcome::TimedOut => VerificationOutcome::Expired,
        WaitOutcome::Matched(reply) => match ConfirmationToken::parse(&reply.content) {
            Some(ConfirmationToken::Affirm) => VerificationOutcome::Confirmed,
            _ => VerificationOutcome::Cancelled,
        },
    })
}
