//! Rate-limited, retrying outbound message dispatch.
//!
//! Every user-facing reply goes through [`OutboundDispatcher`]: a shared
//! token-bucket permit is taken before each attempt, transient failures are
//! retried with bounded backoff, and final failures are logged and swallowed.

pub mod dispatcher;
pub mod rate_limiter;
pub mod retry;

pub use dispatcher::{
    DispatchAttempt, DispatchAttemptOutcome, DispatchCounters, DispatchReport, DispatcherConfig,
    OutboundDispatcher, OutboundMessage, OutboundSendError, OutboundSink,
};
pub use rate_limiter::{RateLimitConfig, TokenBucketLimiter};
pub use retry::{BackoffKind, RetryPolicy};
