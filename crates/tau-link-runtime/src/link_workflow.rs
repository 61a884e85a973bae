//! `link` / `unlink` / `checklink` orchestration.
//!
//! Every user-visible reply goes through the [`OutboundDispatcher`]; none of
//! these operations return an error to the caller.

use std::sync::Arc;
use std::time::Duration;

use tau_dispatch::OutboundDispatcher;
use tau_link_store::{LinkRecord, LinkStore, LinkStoreError};

use crate::config::LinkRuntimeConfig;
use crate::nickname_sync::canonical_label;
use crate::platform::{ChatPlatform, MemberRef, PlatformError};
use crate::profile_resolver::ProfileResolver;
use crate::reply_waiter::{ReplyWaiter, WaitError};
use crate::verification_session::{
    await_verdict, SessionCache, SessionError, VerificationOutcome,
};

const ALREADY_LINKED: &str = "You've already linked a Roblox account.";
const SESSION_PENDING: &str =
    "You already have a verification in progress. Reply yes or no to finish it first.";
const SESSIONS_BUSY: &str = "Too many verifications are in progress. Please try again later.";
const NOT_FOUND: &str =
    "Roblox username not found or API request failed. Please try again later.";
const PROFILE_TAKEN: &str = "This Roblox ID is already linked to another Discord account.";
const LINKED: &str = "Roblox account linked successfully!";
const CANCELLED: &str = "Verification cancelled.";
const EXPIRED: &str = "Verification timed out.";
const STORE_FAILURE: &str =
    "An error occurred while accessing linked accounts. Please try again later.";
const NO_NICKNAME_PERMISSION: &str = "I don't have permission to change your nickname.";
const NICKNAME_FAILED: &str = "I couldn't update your nickname. Please try again later.";
const ROLE_FAILED: &str = "I couldn't update your roles. Please contact an admin.";
const UNLINKED: &str = "Roblox account unlinked successfully!";
const NOTHING_TO_UNLINK: &str = "Your Discord account is not linked to any Roblox account.";
const UNLINK_FAILED: &str =
    "An error occurred while unlinking your Roblox account. Please try again later.";
const IS_LINKED: &str = "Your Discord account is linked to a Roblox account.";
const NOT_LINKED: &str = "Your Discord account is not linked to any Roblox account.";

#[derive(Debug, Clone, PartialEq, Eq)]
/// Who invoked a command and where replies go.
pub struct CommandContext {
    pub principal_id: String,
    pub account_name: String,
    /// `None` for direct messages, where guild side effects are skipped.
    pub guild_id: Option<String>,
    pub channel_id: String,
}

impl CommandContext {
    pub fn member(&self) -> Option<MemberRef> {
        self.guild_id
            .as_deref()
            .map(|guild_id| MemberRef::new(guild_id, self.principal_id.as_str()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
/// Result of one guild-scoped side effect.
pub enum SideEffectOutcome {
    Applied,
    SkippedNoGuild,
    Forbidden,
    RoleNotFound,
    RateLimited { retry_after: Option<Duration> },
    Failed(String),
}

impl SideEffectOutcome {
    fn from_platform(result: Result<(), PlatformError>) -> Self {
        match result {
            Ok(()) => Self::Applied,
            Err(PlatformError::Forbidden(_)) => Self::Forbidden,
            Err(PlatformError::RoleNotFound(_)) => Self::RoleNotFound,
            Err(PlatformError::RateLimited { retry_after }) => Self::RateLimited { retry_after },
            Err(error) => Self::Failed(error.to_string()),
        }
    }

    pub fn rate_limit(&self) -> Option<Option<Duration>> {
        match self {
            Self::RateLimited { retry_after } => Some(*retry_after),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkSideEffects {
    pub record: LinkRecord,
    pub nickname: String,
    pub nickname_outcome: SideEffectOutcome,
    pub role_outcome: SideEffectOutcome,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkOutcome {
    AlreadyLinked,
    SessionPending,
    Busy,
    Unresolved,
    ProfileAlreadyLinked,
    Cancelled,
    Expired,
    Linked(LinkSideEffects),
    /// The candidate was confirmed but the atomic commit refused it.
    CommitRejected(LinkStoreError),
    StoreUnavailable,
    /// The confirmation wait could not be registered; nothing was replied.
    Interrupted(WaitError),
}

impl LinkOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AlreadyLinked => "already_linked",
            Self::SessionPending => "session_pending",
            Self::Busy => "busy",
            Self::Unresolved => "unresolved",
            Self::ProfileAlreadyLinked => "profile_already_linked",
            Self::Cancelled => "cancelled",
            Self::Expired => "expired",
            Self::Linked(_) => "linked",
            Self::CommitRejected(_) => "commit_rejected",
            Self::StoreUnavailable => "store_unavailable",
            Self::Interrupted(_) => "interrupted",
        }
    }

    /// Platform 429 reported by a side effect, if any.
    pub fn platform_rate_limit(&self) -> Option<Option<Duration>> {
        match self {
            Self::Linked(effects) => effects
                .nickname_outcome
                .rate_limit()
                .or_else(|| effects.role_outcome.rate_limit()),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnlinkStoreStep {
    Removed,
    NotLinked,
    Unavailable,
}

#[derive(Debug, Clone, PartialEq, Eq)]
/// Per-step report; each step runs regardless of the others.
pub struct UnlinkReport {
    pub store: UnlinkStoreStep,
    pub nickname_outcome: SideEffectOutcome,
    pub role_outcome: SideEffectOutcome,
}

impl UnlinkReport {
    pub fn platform_rate_limit(&self) -> Option<Option<Duration>> {
        self.nickname_outcome
            .rate_limit()
            .or_else(|| self.role_outcome.rate_limit())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckLinkOutcome {
    Linked,
    NotLinked,
    StoreUnavailable,
}

/// Composes store, resolver, sessions, and platform into the link workflow.
pub struct LinkWorkflow {
    store: Arc<dyn LinkStore>,
    resolver: Arc<dyn ProfileResolver>,
    platform: Arc<dyn ChatPlatform>,
    dispatcher: Arc<OutboundDispatcher>,
    sessions: Arc<SessionCache>,
    waiter: Arc<ReplyWaiter>,
    verified_role: String,
    confirmation_window: Duration,
    nickname_max_chars: usize,
}

impl LinkWorkflow {
    pub fn new(
        config: &LinkRuntimeConfig,
        store: Arc<dyn LinkStore>,
        resolver: Arc<dyn ProfileResolver>,
        platform: Arc<dyn ChatPlatform>,
        dispatcher: Arc<OutboundDispatcher>,
        waiter: Arc<ReplyWaiter>,
    ) -> Self {
        Self {
            store,
            resolver,
            platform,
            dispatcher,
            sessions: Arc::new(SessionCache::new(
                config.session_capacity,
                config.session_ttl,
            )),
            waiter,
            verified_role: config.verified_role.clone(),
            confirmation_window: config.confirmation_window,
            nickname_max_chars: config.nickname_max_chars,
        }
    }

    pub fn sessions(&self) -> Arc<SessionCache> {
        Arc::clone(&self.sessions)
    }

    pub async fn link(&self, ctx: &CommandContext, username: &str) -> LinkOutcome {
        let outcome = self.run_link(ctx, username).await;
        tracing::info!(
            principal_id = %ctx.principal_id,
            username,
            outcome = outcome.as_str(),
            "link workflow finished"
        );
        outcome
    }

    async fn run_link(&self, ctx: &CommandContext, username: &str) -> LinkOutcome {
        match self.store.is_linked(&ctx.principal_id).await {
            Ok(true) => {
                self.reply(ctx, ALREADY_LINKED).await;
                return LinkOutcome::AlreadyLinked;
            }
            Ok(false) => {}
            Err(error) => return self.store_failure(ctx, &error).await,
        }

        // Held until this function returns, whatever the exit path.
        let slot = match self.sessions.reserve(&ctx.principal_id) {
            Ok(slot) => slot,
            Err(SessionError::AlreadyPending(_)) => {
                self.reply(ctx, SESSION_PENDING).await;
                return LinkOutcome::SessionPending;
            }
            Err(error @ SessionError::CacheFull(_)) => {
                tracing::warn!(
                    principal_id = %ctx.principal_id,
                    error = %error,
                    "rejecting link"
                );
                self.reply(ctx, SESSIONS_BUSY).await;
                return LinkOutcome::Busy;
            }
        };

        let Some(resolved) = self.resolver.resolve(username).await else {
            self.reply(ctx, NOT_FOUND).await;
            return LinkOutcome::Unresolved;
        };

        match self.store.is_profile_linked(&resolved.profile_id).await {
            Ok(true) => {
                self.reply(ctx, PROFILE_TAKEN).await;
                return LinkOutcome::ProfileAlreadyLinked;
            }
            Ok(false) => {}
            Err(error) => return self.store_failure(ctx, &error).await,
        }

        let label = resolved
            .profile_name
            .as_deref()
            .filter(|name| !name.trim().is_empty())
            .unwrap_or(username);
        let session = slot.await_confirmation(&resolved.profile_id, label, &resolved.profile_url);
        self.reply(
            ctx,
            format!(
                "Is this your Roblox account? {} (reply yes or no within {} seconds)",
                session.profile_url,
                self.confirmation_window.as_secs()
            ),
        )
        .await;

        let verdict = match await_verdict(&self.waiter, &session, self.confirmation_window).await {
            Ok(verdict) => verdict,
            Err(error) => return LinkOutcome::Interrupted(error),
        };
        tracing::debug!(
            principal_id = %ctx.principal_id,
            profile_id = %session.candidate_profile_id,
            verdict = verdict.as_str(),
            "verification session finished"
        );
        match verdict {
            VerificationOutcome::Cancelled => {
                self.reply(ctx, CANCELLED).await;
                return LinkOutcome::Cancelled;
            }
            VerificationOutcome::Expired => {
                self.reply(ctx, EXPIRED).await;
                return LinkOutcome::Expired;
            }
            VerificationOutcome::Confirmed => {}
        }

        let record = match self
            .store
            .commit_link(
                &ctx.principal_id,
                &session.candidate_profile_id,
                &session.candidate_label,
            )
            .await
        {
            Ok(record) => record,
            Err(error @ LinkStoreError::ProfileAlreadyLinked(_)) => {
                tracing::warn!(
                    principal_id = %ctx.principal_id,
                    error = %error,
                    "commit rejected"
                );
                self.reply(ctx, PROFILE_TAKEN).await;
                return LinkOutcome::CommitRejected(error);
            }
            Err(error @ LinkStoreError::PrincipalAlreadyLinked(_)) => {
                tracing::warn!(
                    principal_id = %ctx.principal_id,
                    error = %error,
                    "commit rejected"
                );
                self.reply(ctx, ALREADY_LINKED).await;
                return LinkOutcome::CommitRejected(error);
            }
            Err(error) => return self.store_failure(ctx, &error).await,
        };
        drop(slot);
        self.reply(ctx, LINKED).await;

        let effects = self.apply_link_side_effects(ctx, record).await;
        LinkOutcome::Linked(effects)
    }

    async fn apply_link_side_effects(
        &self,
        ctx: &CommandContext,
        record: LinkRecord,
    ) -> LinkSideEffects {
        let nickname = canonical_label(
            &ctx.account_name,
            &record.profile_label,
            self.nickname_max_chars,
        );
        let Some(member) = ctx.member() else {
            return LinkSideEffects {
                record,
                nickname,
                nickname_outcome: SideEffectOutcome::SkippedNoGuild,
                role_outcome: SideEffectOutcome::SkippedNoGuild,
            };
        };

        let nickname_outcome = SideEffectOutcome::from_platform(
            self.platform.set_nickname(&member, Some(&nickname)).await,
        );
        self.report_nickname(ctx, &nickname_outcome, &format!("Nickname updated to: {nickname}"))
            .await;

        let role_outcome = SideEffectOutcome::from_platform(
            self.platform.add_role(&member, &self.verified_role).await,
        );
        self.report_role(
            ctx,
            &role_outcome,
            &format!("You have been given the '{}' role.", self.verified_role),
        )
        .await;

        LinkSideEffects {
            record,
            nickname,
            nickname_outcome,
            role_outcome,
        }
    }

    pub async fn unlink(&self, ctx: &CommandContext) -> UnlinkReport {
        let store = match self.store.remove_link(&ctx.principal_id).await {
            Ok(true) => {
                self.reply(ctx, UNLINKED).await;
                UnlinkStoreStep::Removed
            }
            Ok(false) => {
                self.reply(ctx, NOTHING_TO_UNLINK).await;
                UnlinkStoreStep::NotLinked
            }
            Err(error) => {
                tracing::error!(
                    principal_id = %ctx.principal_id,
                    error = %error,
                    "failed to remove link"
                );
                self.reply(ctx, UNLINK_FAILED).await;
                UnlinkStoreStep::Unavailable
            }
        };

        let (nickname_outcome, role_outcome) = match ctx.member() {
            None => (
                SideEffectOutcome::SkippedNoGuild,
                SideEffectOutcome::SkippedNoGuild,
            ),
            Some(member) => {
                let nickname_outcome = SideEffectOutcome::from_platform(
                    self.platform.set_nickname(&member, None).await,
                );
                self.report_nickname(
                    ctx,
                    &nickname_outcome,
                    &format!("Nickname reset to: {}", ctx.account_name),
                )
                .await;

                let role_outcome = SideEffectOutcome::from_platform(
                    self.platform.remove_role(&member, &self.verified_role).await,
                );
                self.report_role(
                    ctx,
                    &role_outcome,
                    &format!("The '{}' role has been removed.", self.verified_role),
                )
                .await;
                (nickname_outcome, role_outcome)
            }
        };

        let report = UnlinkReport {
            store,
            nickname_outcome,
            role_outcome,
        };
        tracing::info!(
            principal_id = %ctx.principal_id,
            store = ?report.store,
            nickname = ?report.nickname_outcome,
            role = ?report.role_outcome,
            "unlink finished"
        );
        report
    }

    pub async fn checklink(&self, ctx: &CommandContext) -> CheckLinkOutcome {
        match self.store.is_linked(&ctx.principal_id).await {
            Ok(true) => {
                self.reply(ctx, IS_LINKED).await;
                CheckLinkOutcome::Linked
            }
            Ok(false) => {
                self.reply(ctx, NOT_LINKED).await;
                CheckLinkOutcome::NotLinked
            }
            Err(error) => {
                tracing::error!(
                    principal_id = %ctx.principal_id,
                    error = %error,
                    "checklink failed"
                );
                self.reply(ctx, STORE_FAILURE).await;
                CheckLinkOutcome::StoreUnavailable
            }
        }
    }

    async fn report_nickname(
        &self,
        ctx: &CommandContext,
        outcome: &SideEffectOutcome,
        applied: &str,
    ) {
        match outcome {
            SideEffectOutcome::Applied => self.reply(ctx, applied).await,
            SideEffectOutcome::SkippedNoGuild => {}
            SideEffectOutcome::Forbidden => self.reply(ctx, NO_NICKNAME_PERMISSION).await,
            SideEffectOutcome::RateLimited { .. } => {
                tracing::warn!(principal_id = %ctx.principal_id, "nickname edit rate limited");
            }
            other => {
                tracing::error!(
                    principal_id = %ctx.principal_id,
                    outcome = ?other,
                    "nickname edit failed"
                );
                self.reply(ctx, NICKNAME_FAILED).await;
            }
        }
    }

    async fn report_role(
        &self,
        ctx: &CommandContext,
        outcome: &SideEffectOutcome,
        applied: &str,
    ) {
        match outcome {
            SideEffectOutcome::Applied => self.reply(ctx, applied).await,
            SideEffectOutcome::SkippedNoGuild => {}
            SideEffectOutcome::RoleNotFound => {
                self.reply(
                    ctx,
                    format!(
                        "Role '{}' not found. Please contact an admin.",
                        self.verified_role
                    ),
                )
                .await;
            }
            SideEffectOutcome::Forbidden => {
                self.reply(ctx, "I don't have permission to manage your roles.")
                    .await;
            }
            SideEffectOutcome::RateLimited { .. } => {
                tracing::warn!(principal_id = %ctx.principal_id, "role update rate limited");
            }
            SideEffectOutcome::Failed(detail) => {
                tracing::error!(
                    principal_id = %ctx.principal_id,
                    error = %detail,
                    "role update failed"
                );
                self.reply(ctx, ROLE_FAILED).await;
            }
        }
    }

    async fn store_failure(&self, ctx: &CommandContext, error: &LinkStoreError) -> LinkOutcome {
        tracing::error!(
            principal_id = %ctx.principal_id,
            error = %error,
            "link store failure"
        );
        self.reply(ctx, STORE_FAILURE).await;
        LinkOutcome::StoreUnavailable
    }

    async fn reply(&self, ctx: &CommandContext, content: impl Into<String>) {
        self.dispatcher.send_text(&ctx.channel_id, content).await;
    }
}
