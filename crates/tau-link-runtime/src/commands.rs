//! Prefix command parsing, per-user cooldowns, and command error replies.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use thiserror::Error;
use tokio::time::Instant;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkCommand {
    Link { username: String },
    Unlink,
    CheckLink,
    Help,
}

impl LinkCommand {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Link { .. } => "link",
            Self::Unlink => "unlink",
            Self::CheckLink => "checklink",
            Self::Help => "help",
        }
    }
}

#[derive(Debug, Error)]
pub enum CommandError {
    #[error("command '{0}' not found")]
    UnknownCommand(String),
    #[error("missing required argument '{0}'")]
    MissingArgument(&'static str),
    #[error("command on cooldown, retry after {retry_after:?}")]
    OnCooldown { retry_after: Duration },
    #[error("platform rate limited the command (retry_after={retry_after:?})")]
    PlatformRateLimited { retry_after: Option<Duration> },
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl CommandError {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::UnknownCommand(_) => "unknown_command",
            Self::MissingArgument(_) => "missing_argument",
            Self::OnCooldown { .. } => "on_cooldown",
            Self::PlatformRateLimited { .. } => "platform_rate_limited",
            Self::Internal(_) => "internal",
        }
    }

    /// Canned reply for the invoking channel. Platform rate limits stay silent.
    pub fn user_reply(&self) -> Option<String> {
        match self {
            Self::UnknownCommand(_) => {
                Some("Command not found. Please use a valid command.".to_string())
            }
            Self::MissingArgument(_) => {
                Some("Missing arguments. Please check the command usage.".to_string())
            }
            Self::OnCooldown { retry_after } => Some(format!(
                "You're doing that too often. Try again in {:.2} seconds.",
                retry_after.as_secs_f64()
            )),
            Self::PlatformRateLimited { .. } => None,
            Self::Internal(_) => Some("An error occurred. Please try again later.".to_string()),
        }
    }
}

/// Parses a message into a command.
///
/// Returns `None` for messages that are not addressed to the bot (missing
/// prefix or an empty command name).
pub fn parse_command(content: &str, prefix: &str) -> Option<Result<LinkCommand, CommandError>> {
    let rest = content.trim_start().strip_prefix(prefix)?;
    // The command name must follow the prefix directly.
    if rest.starts_with(char::is_whitespace) {
        return None;
    }
    let mut tokens = rest.split_whitespace();
    let name = tokens.next()?;
    let command = match name {
        "link" => match tokens.next() {
            Some(username) => Ok(LinkCommand::Link {
                username: username.to_string(),
            }),
            None => Err(CommandError::MissingArgument("username")),
        },
        "unlink" => Ok(LinkCommand::Unlink),
        "checklink" => Ok(LinkCommand::CheckLink),
        "help" => Ok(LinkCommand::Help),
        other => Err(CommandError::UnknownCommand(other.to_string())),
    };
    Some(command)
}

pub fn usage_text(prefix: &str) -> String {
    [
        "Commands:".to_string(),
        format!(
            "{prefix}link <roblox_username>  Link your Discord account with your Roblox username."
        ),
        format!("{prefix}unlink  Unlink your Discord account from your linked Roblox account."),
        format!("{prefix}checklink  Check if your Discord account is linked to a Roblox account."),
        format!("{prefix}help  Show this message."),
    ]
    .join("\n")
}

/// One use per `period` per principal, windowed from the accepted use.
#[derive(Debug)]
pub struct CommandCooldowns {
    period: Duration,
    last_used: Mutex<HashMap<String, Instant>>,
}

impl CommandCooldowns {
    pub fn new(period: Duration) -> Self {
        Self {
            period,
            last_used: Mutex::new(HashMap::new()),
        }
    }

    /// Records a use, or returns the time left until the next one is allowed.
    pub fn check(&self, principal_id: &str) -> Result<(), Duration> {
        if self.period.is_zero() {
            return Ok(());
        }
        let now = Instant::now();
        let mut last_used = self.lock_last_used();
        last_used.retain(|_, used_at| now.duration_since(*used_at) < self.period);
        if let Some(used_at) = last_used.get(principal_id) {
            return Err(self.period.saturating_sub(now.duration_since(*used_at)));
        }
        last_used.insert(principal_id.to_string(), now);
        Ok(())
    }

    fn lock_last_used(&self) -> MutexGuard<'_, HashMap<String, Instant>> {
        match self.last_used.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::{parse_command, usage_text, CommandCooldowns, CommandError, LinkCommand};

    fn parsed(content: &str) -> Option<Result<LinkCommand, String>> {
        parse_command(content, "!").map(|result| result.map_err(|error| error.kind().to_string()))
    }

    #[test]
    fn unit_parse_command_recognizes_link_commands() {
        assert_eq!(
            parsed("!link alice"),
            Some(Ok(LinkCommand::Link {
                username: "alice".to_string()
            }))
        );
        assert_eq!(
            parsed("  !link alice extra words"),
            Some(Ok(LinkCommand::Link {
                username: "alice".to_string()
            }))
        );
        assert_eq!(parsed("!unlink"), Some(Ok(LinkCommand::Unlink)));
        assert_eq!(parsed("!checklink"), Some(Ok(LinkCommand::CheckLink)));
        assert_eq!(parsed("!help"), Some(Ok(LinkCommand::Help)));
    }

    #[test]
    fn unit_parse_command_reports_usage_errors() {
        assert_eq!(parsed("!link"), Some(Err("missing_argument".to_string())));
        assert_eq!(parsed("!dance"), Some(Err("unknown_command".to_string())));
        assert_eq!(parsed("hello"), None);
        assert_eq!(parsed("!"), None);
        assert_eq!(parsed("! link alice"), None);
        assert_eq!(parsed("yes"), None);
    }

    #[test]
    fn unit_command_error_replies() {
        let cooldown = CommandError::OnCooldown {
            retry_after: Duration::from_millis(7_250),
        };
        assert_eq!(
            cooldown.user_reply().as_deref(),
            Some("You're doing that too often. Try again in 7.25 seconds.")
        );
        assert!(CommandError::PlatformRateLimited { retry_after: None }
            .user_reply()
            .is_none());
        assert_eq!(
            CommandError::Internal(anyhow::anyhow!("boom"))
                .user_reply()
                .as_deref(),
            Some("An error occurred. Please try again later.")
        );
    }

    #[test]
    fn unit_usage_text_uses_configured_prefix() {
        let usage = usage_text("?");
        assert!(usage.contains("?link <roblox_username>"));
        assert!(usage.contains("?checklink"));
    }

    #[tokio::test(start_paused = true)]
    async fn functional_cooldown_allows_one_use_per_window_per_principal() {
        let cooldowns = CommandCooldowns::new(Duration::from_secs(10));
        assert_eq!(cooldowns.check("P1"), Ok(()));
        assert_eq!(cooldowns.check("P2"), Ok(()));

        tokio::time::sleep(Duration::from_secs(4)).await;
        assert_eq!(cooldowns.check("P1"), Err(Duration::from_secs(6)));

        tokio::time::sleep(Duration::from_secs(6)).await;
        assert_eq!(cooldowns.check("P1"), Ok(()));
    }
}
