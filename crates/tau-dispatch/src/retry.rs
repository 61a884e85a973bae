use std::time::Duration;

const MAX_BACKOFF_EXPONENT: u32 = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
/// Enumerates supported `BackoffKind` values.
pub enum BackoffKind {
    /// Delay doubles after every failed attempt.
    Exponential,
    /// Same delay between every attempt.
    Fixed,
}

/// Bounded retry schedule shared by outbound dispatch and profile lookups.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts including the first one.
    pub max_attempts: usize,
    pub base_delay: Duration,
    pub backoff: BackoffKind,
}

impl RetryPolicy {
    pub fn exponential(max_attempts: usize, base_delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay,
            backoff: BackoffKind::Exponential,
        }
    }

    pub fn fixed(max_attempts: usize, base_delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay,
            backoff: BackoffKind::Fixed,
        }
    }

    pub fn attempt_budget(&self) -> usize {
        self.max_attempts.max(1)
    }

    /// Delay to wait after failed `attempt` (1-based) before trying again.
    ///
    /// Returns `None` once the attempt budget is spent.
    pub fn delay_after_attempt(&self, attempt: usize) -> Option<Duration> {
        if attempt >= self.attempt_budget() {
            return None;
        }
        match self.backoff {
            BackoffKind::Fixed => Some(self.base_delay),
            BackoffKind::Exponential => {
                let exponent = u32::try_from(attempt.saturating_sub(1))
                    .unwrap_or(MAX_BACKOFF_EXPONENT)
                    .min(MAX_BACKOFF_EXPONENT);
                Some(self.base_delay.saturating_mul(2_u32.pow(exponent)))
            }
        }
    }

    /// Full list of inter-attempt delays for a permanently failing operation.
    pub fn schedule(&self) -> Vec<Duration> {
        (1..self.attempt_budget())
            .filter_map(|attempt| self.delay_after_attempt(attempt))
            .collect()
    }
}
