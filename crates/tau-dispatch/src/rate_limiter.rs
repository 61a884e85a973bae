use std::sync::Mutex;
use std::time::Duration;

use tokio::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
/// Token-bucket capacity and refill period.
pub struct RateLimitConfig {
    /// Bucket capacity, replenished in full over `period`.
    pub max_permits: u32,
    pub period: Duration,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_permits: 5,
            period: Duration::from_secs(10),
        }
    }
}

impl RateLimitConfig {
    fn is_unlimited(&self) -> bool {
        self.max_permits == 0 || self.period.is_zero()
    }

    fn permits_per_second(&self) -> f64 {
        f64::from(self.max_permits) / self.period.as_secs_f64()
    }
}

#[derive(Debug)]
struct TokenBucketState {
    available: f64,
    last_refill: Instant,
}

/// Process-wide token bucket shared by every outbound sender.
///
/// Permits refill continuously. Waiters are not queued, so there is no
/// ordering guarantee between concurrent callers.
#[derive(Debug)]
pub struct TokenBucketLimiter {
    config: RateLimitConfig,
    state: Mutex<TokenBucketState>,
}

impl TokenBucketLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            config,
            state: Mutex::new(TokenBucketState {
                available: f64::from(config.max_permits),
                last_refill: Instant::now(),
            }),
        }
    }

    pub fn config(&self) -> RateLimitConfig {
        self.config
    }

    /// Waits until a permit is available and takes it.
    pub async fn acquire(&self) {
        loop {
            match self.try_acquire_at(Instant::now()) {
                Ok(()) => return,
                Err(wait) => {
                    tracing::trace!(wait_ms = wait.as_millis() as u64, "waiting for send permit");
                    tokio::time::sleep(wait).await;
                }
            }
        }
    }

    /// Takes a permit without waiting. Returns the time until one frees up otherwise.
    pub fn try_acquire(&self) -> Result<(), Duration> {
        self.try_acquire_at(Instant::now())
    }

    pub fn available_permits(&self) -> u32 {
        if self.config.is_unlimited() {
            return u32::MAX;
        }
        let mut state = match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        self.refill(&mut state, Instant::now());
        state.available.floor() as u32
    }

    fn try_acquire_at(&self, now: Instant) -> Result<(), Duration> {
        if self.config.is_unlimited() {
            return Ok(());
        }
        let mut state = match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        self.refill(&mut state, now);
        if state.available >= 1.0 {
            state.available -= 1.0;
            return Ok(());
        }

        let deficit = 1.0 - state.available;
        let wait = Duration::from_secs_f64(deficit / self.config.permits_per_second());
        Err(wait.max(Duration::from_millis(1)))
    }

    fn refill(&self, state: &mut TokenBucketState, now: Instant) {
        let elapsed = now.saturating_duration_since(state.last_refill);
        let replenished = elapsed.as_secs_f64() * self.config.permits_per_second();
        state.available = (state.available + replenished).min(f64::from(self.config.max_permits));
        state.last_refill = now;
    }
}
