//! Outbound dispatcher with shared rate limiting and bounded retries.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use crate::rate_limiter::{RateLimitConfig, TokenBucketLimiter};
use crate::retry::RetryPolicy;

const DEFAULT_SEND_ATTEMPTS: usize = 5;
const DEFAULT_SEND_BASE_DELAY: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, PartialEq, Eq)]
/// One user-facing message addressed to a chat channel.
pub struct OutboundMessage {
    pub channel_id: String,
    pub content: String,
}

impl OutboundMessage {
    pub fn new(channel_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            channel_id: channel_id.into(),
            content: content.into(),
        }
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{detail} (retryable={retryable})")]
/// Failure reported by an [`OutboundSink`] for a single attempt.
pub struct OutboundSendError {
    pub retryable: bool,
    pub detail: String,
}

impl OutboundSendError {
    pub fn retryable(detail: impl Into<String>) -> Self {
        Self {
            retryable: true,
            detail: detail.into(),
        }
    }

    pub fn terminal(detail: impl Into<String>) -> Self {
        Self {
            retryable: false,
            detail: detail.into(),
        }
    }
}

/// Transport that performs a single send attempt.
#[async_trait]
pub trait OutboundSink: Send + Sync {
    async fn send(&self, message: &OutboundMessage) -> Result<(), OutboundSendError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
/// Enumerates supported `DispatchAttemptOutcome` values.
pub enum DispatchAttemptOutcome {
    Delivered,
    RetryableFailure,
    TerminalFailure,
}

#[derive(Debug, Clone, PartialEq, Eq)]
/// Record of one send try. Never persisted.
pub struct DispatchAttempt {
    pub attempt: usize,
    /// Backoff scheduled before the next attempt, if any.
    pub delay_before_next: Option<Duration>,
    pub outcome: DispatchAttemptOutcome,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchReport {
    pub attempts: Vec<DispatchAttempt>,
}

impl DispatchReport {
    pub fn delivered(&self) -> bool {
        self.attempts
            .last()
            .is_some_and(|attempt| attempt.outcome == DispatchAttemptOutcome::Delivered)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchCounters {
    pub delivered: u64,
    pub abandoned: u64,
    pub retries: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispatcherConfig {
    pub rate_limit: RateLimitConfig,
    pub retry: RetryPolicy,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            rate_limit: RateLimitConfig::default(),
            retry: RetryPolicy::exponential(DEFAULT_SEND_ATTEMPTS, DEFAULT_SEND_BASE_DELAY),
        }
    }
}

/// Sends every outbound message through one shared limiter and retry loop.
///
/// Send failures never reach the caller. Delivery state is only observable
/// through tracing output and [`OutboundDispatcher::counters`].
pub struct OutboundDispatcher {
    sink: Arc<dyn OutboundSink>,
    limiter: TokenBucketLimiter,
    retry: RetryPolicy,
    counters: Mutex<DispatchCounters>,
}

impl OutboundDispatcher {
    pub fn new(sink: Arc<dyn OutboundSink>, config: DispatcherConfig) -> Self {
        Self {
            sink,
            limiter: TokenBucketLimiter::new(config.rate_limit),
            retry: config.retry,
            counters: Mutex::new(DispatchCounters::default()),
        }
    }

    pub fn counters(&self) -> DispatchCounters {
        *self.lock_counters()
    }

    /// Sends `content` to `channel_id`, swallowing any final failure.
    pub async fn send_text(&self, channel_id: &str, content: impl Into<String>) {
        self.dispatch(OutboundMessage::new(channel_id, content)).await;
    }

    pub async fn dispatch(&self, message: OutboundMessage) {
        let _ = self.dispatch_with_report(&message).await;
    }

    /// Runs the retry loop and returns the per-attempt record.
    pub async fn dispatch_with_report(&self, message: &OutboundMessage) -> DispatchReport {
        let mut attempts = Vec::new();
        let mut attempt = 0_usize;
        loop {
            attempt = attempt.saturating_add(1);
            self.limiter.acquire().await;

            let error = match self.sink.send(message).await {
                Ok(()) => {
                    attempts.push(DispatchAttempt {
                        attempt,
                        delay_before_next: None,
                        outcome: DispatchAttemptOutcome::Delivered,
                    });
                    self.lock_counters().delivered += 1;
                    tracing::debug!(
                        channel_id = %message.channel_id,
                        attempt,
                        "outbound message delivered"
                    );
                    return DispatchReport { attempts };
                }
                Err(error) => error,
            };

            let delay = if error.retryable {
                self.retry.delay_after_attempt(attempt)
            } else {
                None
            };
            attempts.push(DispatchAttempt {
                attempt,
                delay_before_next: delay,
                outcome: if error.retryable {
                    DispatchAttemptOutcome::RetryableFailure
                } else {
                    DispatchAttemptOutcome::TerminalFailure
                },
            });

            let Some(delay) = delay else {
                self.lock_counters().abandoned += 1;
                tracing::error!(
                    channel_id = %message.channel_id,
                    attempts = attempt,
                    error = %error,
                    "failed to send outbound message; giving up"
                );
                return DispatchReport { attempts };
            };

            self.lock_counters().retries += 1;
            tracing::warn!(
                channel_id = %message.channel_id,
                attempt,
                retry_in_ms = delay.as_millis() as u64,
                error = %error,
                "outbound send attempt failed; retrying"
            );
            tokio::time::sleep(delay).await;
        }
    }

    fn lock_counters(&self) -> std::sync::MutexGuard<'_, DispatchCounters> {
        match self.counters.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}
