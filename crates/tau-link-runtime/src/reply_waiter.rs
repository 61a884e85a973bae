//! Request/response correlation for "wait for the next matching message".
//!
//! A caller registers a predicate for one principal and awaits the first
//! message from that principal satisfying it, bounded by a deadline. The
//! inbound event loop offers every message to the waiter before treating it
//! as a command.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use thiserror::Error;
use tokio::sync::oneshot;
use tokio::time::Instant;

type ReplyPredicate = Box<dyn Fn(&str) -> bool + Send + Sync>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IncomingReply {
    pub principal_id: String,
    pub channel_id: String,
    pub content: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WaitOutcome {
    Matched(IncomingReply),
    TimedOut,
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum WaitError {
    #[error("a reply wait is already pending for principal '{0}'")]
    AlreadyWaiting(String),
}

struct PendingReply {
    wait_id: u64,
    deadline: Instant,
    predicate: ReplyPredicate,
    sender: oneshot::Sender<IncomingReply>,
}

#[derive(Default)]
/// Registry of outstanding reply waits, at most one per principal.
pub struct ReplyWaiter {
    pending: Mutex<HashMap<String, PendingReply>>,
    next_wait_id: AtomicU64,
}

impl ReplyWaiter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Waits up to `window` for a reply from `principal_id` matching `predicate`.
    ///
    /// Non-matching replies are left alone and do not end the wait. A reply
    /// offered at or after the deadline is refused.
    pub async fn wait_for<F>(
        &self,
        principal_id: &str,
        predicate: F,
        window: Duration,
    ) -> Result<WaitOutcome, WaitError>
    where
        F: Fn(&str) -> bool + Send + Sync + 'static,
    {
        let (sender, receiver) = oneshot::channel();
        let wait_id = self.next_wait_id.fetch_add(1, Ordering::Relaxed);
        let deadline = Instant::now() + window;
        {
            let mut pending = self.lock_pending();
            if pending.contains_key(principal_id) {
                return Err(WaitError::AlreadyWaiting(principal_id.to_string()));
            }
            pending.insert(
                principal_id.to_string(),
                PendingReply {
                    wait_id,
                    deadline,
                    predicate: Box::new(predicate),
                    sender,
                },
            );
        }
        let _registration = Registration {
            waiter: self,
            principal_id,
            wait_id,
        };

        match tokio::time::timeout_at(deadline, receiver).await {
            Ok(Ok(reply)) => Ok(WaitOutcome::Matched(reply)),
            Ok(Err(_)) | Err(_) => Ok(WaitOutcome::TimedOut),
        }
    }

    /// Offers an inbound message. Returns `true` when it completed a pending wait.
    pub fn offer(&self, reply: &IncomingReply) -> bool {
        let mut pending = self.lock_pending();
        let now = Instant::now();
        let matches = pending
            .get(&reply.principal_id)
            .is_some_and(|entry| now < entry.deadline && (entry.predicate)(&reply.content));
        if !matches {
            return false;
        }
        let Some(entry) = pending.remove(&reply.principal_id) else {
            return false;
        };
        entry.sender.send(reply.clone()).is_ok()
    }

    pub fn is_waiting(&self, principal_id: &str) -> bool {
        self.lock_pending().contains_key(principal_id)
    }

    pub fn pending_count(&self) -> usize {
        self.lock_pending().len()
    }

    fn lock_pending(&self) -> MutexGuard<'_, HashMap<String, PendingReply>> {
        match self.pending.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

// Drops the registration when the wait finishes or its future is cancelled.
struct Registration<'a> {
    waiter: &'a ReplyWaiter,
    principal_id: &'a str,
    wait_id: u64,
}

impl Drop for Registration<'_> {
    fn drop(&mut self) {
        let mut pending = self.waiter.lock_pending();
        if pending
            .get(self.principal_id)
            .is_some_and(|entry| entry.wait_id == self.wait_id)
        {
            pending.remove(self.principal_id);
        }
    }
}
