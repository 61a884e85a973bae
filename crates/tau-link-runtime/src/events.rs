//! Platform-neutral notifications delivered to the link runtime.

use async_trait::async_trait;

use crate::commands::CommandError;
use crate::link_workflow::{CheckLinkOutcome, CommandContext, LinkOutcome, UnlinkReport};
use crate::nickname_sync::{DisplayNameChange, NicknameSyncOutcome};
use crate::reply_waiter::IncomingReply;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IncomingMessage {
    pub message_id: String,
    pub principal_id: String,
    pub account_name: String,
    pub guild_id: Option<String>,
    pub channel_id: String,
    pub content: String,
    pub from_bot: bool,
}

impl IncomingMessage {
    pub fn command_context(&self) -> CommandContext {
        CommandContext {
            principal_id: self.principal_id.clone(),
            account_name: self.account_name.clone(),
            guild_id: self.guild_id.clone(),
            channel_id: self.channel_id.clone(),
        }
    }

    pub fn as_reply(&self) -> IncomingReply {
        IncomingReply {
            principal_id: self.principal_id.clone(),
            channel_id: self.channel_id.clone(),
            content: self.content.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadyInfo {
    pub account_name: String,
    pub guild_count: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
/// What the runtime did with one inbound message.
pub enum MessageDisposition {
    Ignored,
    /// Consumed by a pending confirmation wait.
    ConfirmationReply,
    Link(LinkOutcome),
    Unlink(UnlinkReport),
    CheckLink(CheckLinkOutcome),
    Help,
    /// Routed to [`LinkEventHandler::on_command_error`]; carries [`CommandError::kind`].
    Rejected(&'static str),
}

/// One method per notification kind.
#[async_trait]
pub trait LinkEventHandler: Send + Sync {
    async fn on_ready(&self, ready: ReadyInfo);
    async fn on_message(&self, message: IncomingMessage) -> MessageDisposition;
    async fn on_display_name_changed(&self, change: DisplayNameChange) -> NicknameSyncOutcome;
    async fn on_command_error(&self, ctx: &CommandContext, error: CommandError);
}
