//! [`ChatPlatform`] over the serenity HTTP client.

use std::sync::Arc;

use async_trait::async_trait;
use serenity::builder::{CreateMessage, EditMember};
use serenity::http::Http;
use serenity::model::id::{ChannelId, GuildId, RoleId, UserId};
use tau_link_runtime::{ChatPlatform, MemberRef, PlatformError};

const MAX_MESSAGE_CHARS: usize = 2_000;

pub struct SerenityPlatform {
    http: Arc<Http>,
}

impl SerenityPlatform {
    pub fn new(http: Arc<Http>) -> Self {
        Self { http }
    }

    async fn find_role(&self, guild_id: GuildId, role_name: &str) -> Result<RoleId, PlatformError> {
        let roles = guild_id
            .roles(self.http.as_ref())
            .await
            .map_err(classify_serenity_error)?;
        roles
            .values()
            .find(|role| role.name == role_name)
            .map(|role| role.id)
            .ok_or_else(|| PlatformError::RoleNotFound(role_name.to_string()))
    }

    fn member_ids(member: &MemberRef) -> Result<(GuildId, UserId), PlatformError> {
        Ok((
            GuildId::new(parse_snowflake("guild", &member.guild_id)?),
            UserId::new(parse_snowflake("user", &member.principal_id)?),
        ))
    }
}

#[async_trait]
impl ChatPlatform for SerenityPlatform {
    async fn send_message(&self, channel_id: &str, content: &str) -> Result<(), PlatformError> {
        let channel = ChannelId::new(parse_snowflake("channel", channel_id)?);
        let builder = CreateMessage::new().content(truncate_message(content));
        channel
            .send_message(&*self.http, builder)
            .await
            .map(|_| ())
            .map_err(classify_serenity_error)
    }

    async fn set_nickname(
        &self,
        member: &MemberRef,
        nickname: Option<&str>,
    ) -> Result<(), PlatformError> {
        let (guild, user) = Self::member_ids(member)?;
        // An empty nickname clears it back to the account name.
        let edit = EditMember::new().nickname(nickname.unwrap_or_default());
        guild
            .edit_member(self.http.as_ref(), user, edit)
            .await
            .map(|_| ())
            .map_err(classify_serenity_error)
    }

    async fn add_role(&self, member: &MemberRef, role_name: &str) -> Result<(), PlatformError> {
        let (guild, user) = Self::member_ids(member)?;
        let role = self.find_role(guild, role_name).await?;
        self.http
            .add_member_role(guild, user, role, Some("verified account link"))
            .await
            .map_err(classify_serenity_error)
    }

    async fn remove_role(
        &self,
        member: &MemberRef,
        role_name: &str,
    ) -> Result<(), PlatformError> {
        let (guild, user) = Self::member_ids(member)?;
        let role = self.find_role(guild, role_name).await?;
        self.http
            .remove_member_role(guild, user, role, Some("account unlinked"))
            .await
            .map_err(classify_serenity_error)
    }
}

/// Parses a Discord snowflake. Zero is rejected because serenity ids must be non-zero.
pub(crate) fn parse_snowflake(kind: &str, raw: &str) -> Result<u64, PlatformError> {
    match raw.trim().parse::<u64>() {
        Ok(0) | Err(_) => Err(PlatformError::Failed(format!("invalid {kind} id '{raw}'"))),
        Ok(id) => Ok(id),
    }
}

fn classify_serenity_error(error: serenity::Error) -> PlatformError {
    let detail = error.to_string();
    match &error {
        serenity::Error::Http(http_error) => classify_status(
            http_error.status_code().map(|status| status.as_u16()),
            detail,
        ),
        serenity::Error::Io(_) => PlatformError::Transient(detail),
        _ => PlatformError::Failed(detail),
    }
}

/// Maps an HTTP status onto the platform error taxonomy.
///
/// `None` means the request never got a response.
pub(crate) fn classify_status(status: Option<u16>, detail: String) -> PlatformError {
    match status {
        Some(401 | 403) => PlatformError::Forbidden(detail),
        Some(429) => PlatformError::RateLimited { retry_after: None },
        Some(status) if status >= 500 => PlatformError::Transient(detail),
        Some(_) => PlatformError::Failed(detail),
        None => PlatformError::Transient(detail),
    }
}

fn truncate_message(content: &str) -> String {
    content.chars().take(MAX_MESSAGE_CHARS).collect()
}
