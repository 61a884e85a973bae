//! Explicit application context implementing [`LinkEventHandler`].

use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use tau_dispatch::OutboundDispatcher;
use tau_link_store::LinkStore;
use tokio::time::Instant;

use crate::commands::{parse_command, usage_text, CommandCooldowns, CommandError, LinkCommand};
use crate::config::LinkRuntimeConfig;
use crate::events::{IncomingMessage, LinkEventHandler, MessageDisposition, ReadyInfo};
use crate::link_workflow::{CommandContext, LinkOutcome, LinkWorkflow};
use crate::nickname_sync::{DisplayNameChange, NicknameSyncOutcome, NicknameSynchronizer};
use crate::platform::{ChatPlatform, PlatformSink};
use crate::profile_resolver::ProfileResolver;
use crate::reply_waiter::ReplyWaiter;

/// Shared state for one bot process.
pub struct LinkRuntime {
    config: LinkRuntimeConfig,
    store: Arc<dyn LinkStore>,
    dispatcher: Arc<OutboundDispatcher>,
    waiter: Arc<ReplyWaiter>,
    workflow: LinkWorkflow,
    synchronizer: NicknameSynchronizer,
    link_cooldowns: CommandCooldowns,
    platform_backoff_until: Mutex<Option<Instant>>,
}

impl LinkRuntime {
    pub fn new(
        config: LinkRuntimeConfig,
        store: Arc<dyn LinkStore>,
        resolver: Arc<dyn ProfileResolver>,
        platform: Arc<dyn ChatPlatform>,
    ) -> Self {
        let dispatcher = Arc::new(OutboundDispatcher::new(
            Arc::new(PlatformSink::new(Arc::clone(&platform))),
            config.dispatcher,
        ));
        let waiter = Arc::new(ReplyWaiter::new());
        let workflow = LinkWorkflow::new(
            &config,
            Arc::clone(&store),
            resolver,
            Arc::clone(&platform),
            Arc::clone(&dispatcher),
            Arc::clone(&waiter),
        );
        let synchronizer =
            NicknameSynchronizer::new(Arc::clone(&store), platform, config.nickname_max_chars);
        Self {
            link_cooldowns: CommandCooldowns::new(config.link_cooldown),
            config,
            store,
            dispatcher,
            waiter,
            workflow,
            synchronizer,
            platform_backoff_until: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &LinkRuntimeConfig {
        &self.config
    }

    pub fn dispatcher(&self) -> Arc<OutboundDispatcher> {
        Arc::clone(&self.dispatcher)
    }

    pub fn waiter(&self) -> Arc<ReplyWaiter> {
        Arc::clone(&self.waiter)
    }

    pub fn workflow(&self) -> &LinkWorkflow {
        &self.workflow
    }

    pub async fn handle_command(
        &self,
        ctx: &CommandContext,
        command: LinkCommand,
    ) -> Result<MessageDisposition, CommandError> {
        tracing::debug!(
            principal_id = %ctx.principal_id,
            command = command.name(),
            "handling command"
        );
        match command {
            LinkCommand::Link { username } => {
                self.link_cooldowns
                    .check(&ctx.principal_id)
                    .map_err(|retry_after| CommandError::OnCooldown { retry_after })?;
                let outcome = self.workflow.link(ctx, &username).await;
                if let LinkOutcome::Interrupted(error) = outcome {
                    return Err(CommandError::Internal(
                        anyhow::Error::new(error).context("confirmation wait failed"),
                    ));
                }
                if let Some(retry_after) = outcome.platform_rate_limit() {
                    return Err(CommandError::PlatformRateLimited { retry_after });
                }
                Ok(MessageDisposition::Link(outcome))
            }
            LinkCommand::Unlink => {
                let report = self.workflow.unlink(ctx).await;
                if let Some(retry_after) = report.platform_rate_limit() {
                    return Err(CommandError::PlatformRateLimited { retry_after });
                }
                Ok(MessageDisposition::Unlink(report))
            }
            LinkCommand::CheckLink => Ok(MessageDisposition::CheckLink(
                self.workflow.checklink(ctx).await,
            )),
            LinkCommand::Help => {
                self.dispatcher
                    .send_text(&ctx.channel_id, usage_text(&self.config.command_prefix))
                    .await;
                Ok(MessageDisposition::Help)
            }
        }
    }

    async fn wait_out_platform_backoff(&self) {
        let until = *self.lock_backoff();
        if let Some(until) = until {
            if until > Instant::now() {
                tracing::debug!("waiting out platform rate-limit cooldown");
                tokio::time::sleep_until(until).await;
            }
        }
    }

    fn lock_backoff(&self) -> MutexGuard<'_, Option<Instant>> {
        match self.platform_backoff_until.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

#[async_trait]
impl LinkEventHandler for LinkRuntime {
    async fn on_ready(&self, ready: ReadyInfo) {
        match self.store.link_count().await {
            Ok(links) => tracing::info!(
                account = %ready.account_name,
                guilds = ready.guild_count,
                links,
                "link bot ready"
            ),
            Err(error) => tracing::error!(
                account = %ready.account_name,
                error = %error,
                "link bot ready but link store is unavailable"
            ),
        }
    }

    async fn on_message(&self, message: IncomingMessage) -> MessageDisposition {
        if message.from_bot {
            return MessageDisposition::Ignored;
        }
        if self.waiter.offer(&message.as_reply()) {
            return MessageDisposition::ConfirmationReply;
        }
        let Some(parsed) = parse_command(&message.content, &self.config.command_prefix) else {
            return MessageDisposition::Ignored;
        };

        let ctx = message.command_context();
        let result = match parsed {
            Ok(command) => {
                self.wait_out_platform_backoff().await;
                self.handle_command(&ctx, command).await
            }
            Err(error) => Err(error),
        };
        match result {
            Ok(disposition) => disposition,
            Err(error) => {
                let kind = error.kind();
                self.on_command_error(&ctx, error).await;
                MessageDisposition::Rejected(kind)
            }
        }
    }

    async fn on_display_name_changed(&self, change: DisplayNameChange) -> NicknameSyncOutcome {
        self.synchronizer.reconcile(&change).await
    }

    async fn on_command_error(&self, ctx: &CommandContext, error: CommandError) {
        match &error {
            CommandError::PlatformRateLimited { retry_after } => {
                let cooldown = self.config.platform_rate_limit_cooldown;
                tracing::warn!(
                    principal_id = %ctx.principal_id,
                    retry_after = ?retry_after,
                    cooldown_ms = cooldown.as_millis() as u64,
                    "rate limited by platform"
                );
                *self.lock_backoff() = Some(Instant::now() + cooldown);
            }
            CommandError::Internal(inner) => {
                tracing::error!(
                    principal_id = %ctx.principal_id,
                    error = ?inner,
                    "unhandled command error"
                );
            }
            other => {
                tracing::debug!(
                    principal_id = %ctx.principal_id,
                    error = %other,
                    "command rejected"
                );
            }
        }
        if let Some(reply) = error.user_reply() {
            self.dispatcher.send_text(&ctx.channel_id, reply).await;
        }
    }
}
