//! Chat-platform capabilities the link runtime depends on.
//!
//! The runtime never talks to a gateway directly. Adapters implement
//! [`ChatPlatform`] and translate platform failures into [`PlatformError`].

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tau_dispatch::{OutboundMessage, OutboundSendError, OutboundSink};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
/// A principal inside one guild; nickname and role edits are guild-scoped.
pub struct MemberRef {
    pub guild_id: String,
    pub principal_id: String,
}

impl MemberRef {
    pub fn new(guild_id: impl Into<String>, principal_id: impl Into<String>) -> Self {
        Self {
            guild_id: guild_id.into(),
            principal_id: principal_id.into(),
        }
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
/// Enumerates supported `PlatformError` values.
pub enum PlatformError {
    #[error("missing permission: {0}")]
    Forbidden(String),
    #[error("role '{0}' not found")]
    RoleNotFound(String),
    #[error("rate limited by platform (retry_after={retry_after:?})")]
    RateLimited { retry_after: Option<Duration> },
    #[error("transient platform failure: {0}")]
    Transient(String),
    #[error("platform request failed: {0}")]
    Failed(String),
}

impl PlatformError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::RateLimited { .. } | Self::Transient(_))
    }
}

/// Opaque platform capabilities, invoked by name.
#[async_trait]
pub trait ChatPlatform: Send + Sync {
    async fn send_message(&self, channel_id: &str, content: &str) -> Result<(), PlatformError>;
    /// Sets the member nickname, or clears it when `nickname` is `None`.
    async fn set_nickname(
        &self,
        member: &MemberRef,
        nickname: Option<&str>,
    ) -> Result<(), PlatformError>;
    async fn add_role(&self, member: &MemberRef, role_name: &str) -> Result<(), PlatformError>;
    async fn remove_role(&self, member: &MemberRef, role_name: &str)
        -> Result<(), PlatformError>;
}

/// Adapts a [`ChatPlatform`] into the dispatcher's single-attempt sink.
pub struct PlatformSink {
    platform: Arc<dyn ChatPlatform>,
}

impl PlatformSink {
    pub fn new(platform: Arc<dyn ChatPlatform>) -> Self {
        Self { platform }
    }
}

#[async_trait]
impl OutboundSink for PlatformSink {
    async fn send(&self, message: &OutboundMessage) -> Result<(), OutboundSendError> {
        self.platform
            .send_message(&message.channel_id, &message.content)
            .await
            .map_err(|error| {
                if error.is_retryable() {
                    OutboundSendError::retryable(error.to_string())
                } else {
                    OutboundSendError::terminal(error.to_string())
                }
            })
    }
}
