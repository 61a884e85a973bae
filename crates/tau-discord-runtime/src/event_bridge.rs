//! Serenity gateway events translated into [`LinkEventHandler`] calls.

use std::sync::Arc;

use serenity::client::{Context, EventHandler};
use serenity::model::channel::Message;
use serenity::model::event::GuildMemberUpdateEvent;
use serenity::model::gateway::Ready;
use serenity::model::guild::Member;
use tau_link_runtime::{
    DisplayNameChange, IncomingMessage, LinkEventHandler, MemberRef, ReadyInfo,
};

/// Forwards gateway events to the link runtime.
///
/// Serenity runs each event on its own task, so a `!link` awaiting
/// confirmation does not block delivery of the reply that completes it.
pub struct DiscordEventBridge {
    handler: Arc<dyn LinkEventHandler>,
}

impl DiscordEventBridge {
    pub fn new(handler: Arc<dyn LinkEventHandler>) -> Self {
        Self { handler }
    }
}

#[serenity::async_trait]
impl EventHandler for DiscordEventBridge {
    async fn message(&self, _ctx: Context, message: Message) {
        let incoming = incoming_message(
            message.id.get(),
            message.author.id.get(),
            &message.author.name,
            message.author.bot,
            message.guild_id.map(|guild_id| guild_id.get()),
            message.channel_id.get(),
            &message.content,
        );
        let disposition = self.handler.on_message(incoming).await;
        tracing::debug!(
            message_id = message.id.get(),
            disposition = ?disposition,
            "message handled"
        );
    }

    async fn ready(&self, _ctx: Context, ready: Ready) {
        self.handler
            .on_ready(ReadyInfo {
                account_name: ready.user.name.clone(),
                guild_count: ready.guilds.len(),
            })
            .await;
    }

    async fn guild_member_update(
        &self,
        _ctx: Context,
        old_if_available: Option<Member>,
        _new: Option<Member>,
        event: GuildMemberUpdateEvent,
    ) {
        let change = display_name_change(
            event.guild_id.get(),
            event.user.id.get(),
            &event.user.name,
            old_if_available.as_ref().and_then(|member| member.nick.as_deref()),
            event.nick.as_deref(),
        );
        let outcome = self.handler.on_display_name_changed(change).await;
        tracing::debug!(
            guild_id = event.guild_id.get(),
            user_id = event.user.id.get(),
            outcome = ?outcome,
            "member update handled"
        );
    }
}

pub(crate) fn incoming_message(
    message_id: u64,
    author_id: u64,
    author_name: &str,
    author_is_bot: bool,
    guild_id: Option<u64>,
    channel_id: u64,
    content: &str,
) -> IncomingMessage {
    IncomingMessage {
        message_id: message_id.to_string(),
        principal_id: author_id.to_string(),
        account_name: author_name.to_string(),
        guild_id: guild_id.map(|guild_id| guild_id.to_string()),
        channel_id: channel_id.to_string(),
        content: content.to_string(),
        from_bot: author_is_bot,
    }
}

pub(crate) fn display_name_change(
    guild_id: u64,
    user_id: u64,
    account_name: &str,
    before: Option<&str>,
    after: Option<&str>,
) -> DisplayNameChange {
    DisplayNameChange {
        member: MemberRef::new(guild_id.to_string(), user_id.to_string()),
        account_name: account_name.to_string(),
        before: before.map(str::to_string),
        after: after.map(str::to_string),
    }
}
