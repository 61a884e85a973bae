use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use tau_dispatch::{RateLimitConfig, RetryPolicy};
use tau_link_runtime::{LinkRuntimeConfig, ProfileResolverConfig};

fn parse_positive_u64(value: &str) -> Result<u64, String> {
    let parsed = value
        .parse::<u64>()
        .map_err(|error| format!("failed to parse integer: {error}"))?;
    if parsed == 0 {
        return Err("value must be greater than 0".to_string());
    }
    Ok(parsed)
}

fn parse_positive_usize(value: &str) -> Result<usize, String> {
    let parsed = value
        .parse::<usize>()
        .map_err(|error| format!("failed to parse integer: {error}"))?;
    if parsed == 0 {
        return Err("value must be greater than 0".to_string());
    }
    Ok(parsed)
}

fn parse_non_empty(value: &str) -> Result<String, String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err("value must not be empty".to_string());
    }
    Ok(trimmed.to_string())
}

#[derive(Debug, Parser)]
#[command(
    name = "tau-link-bot",
    about = "Discord bot that links member accounts to Roblox profiles",
    version
)]
pub struct Cli {
    #[arg(
        long = "discord-bot-token",
        env = "DISCORD_BOT_TOKEN",
        hide_env_values = true,
        value_parser = parse_non_empty,
        help = "Discord bot token used for the gateway and REST calls"
    )]
    pub discord_bot_token: String,

    #[arg(
        long = "database-path",
        env = "TAU_LINK_DATABASE_PATH",
        default_value = "database.db",
        help = "SQLite database holding committed account links"
    )]
    pub database_path: PathBuf,

    #[arg(
        long = "command-prefix",
        env = "TAU_LINK_COMMAND_PREFIX",
        default_value = "!",
        value_parser = parse_non_empty,
        help = "Prefix that marks a chat message as a bot command"
    )]
    pub command_prefix: String,

    #[arg(
        long = "verified-role",
        env = "TAU_LINK_VERIFIED_ROLE",
        default_value = "Verified",
        value_parser = parse_non_empty,
        help = "Name of the role granted on a confirmed link and removed on unlink"
    )]
    pub verified_role: String,

    #[arg(
        long = "confirmation-timeout-secs",
        env = "TAU_LINK_CONFIRMATION_TIMEOUT_SECS",
        default_value_t = 30,
        value_parser = parse_positive_u64,
        help = "Seconds a member has to answer yes or no to the confirmation prompt"
    )]
    pub confirmation_timeout_secs: u64,

    #[arg(
        long = "link-cooldown-secs",
        env = "TAU_LINK_COOLDOWN_SECS",
        default_value_t = 10,
        value_parser = parse_positive_u64,
        help = "Per-member cooldown between link commands"
    )]
    pub link_cooldown_secs: u64,

    #[arg(
        long = "message-rate-limit",
        env = "TAU_LINK_MESSAGE_RATE_LIMIT",
        default_value_t = 5,
        value_parser = parse_positive_u64,
        help = "Outbound messages allowed per --message-rate-period-secs"
    )]
    pub message_rate_limit: u64,

    #[arg(
        long = "message-rate-period-secs",
        env = "TAU_LINK_MESSAGE_RATE_PERIOD_SECS",
        default_value_t = 10,
        value_parser = parse_positive_u64,
        help = "Refill period for the outbound message rate limit"
    )]
    pub message_rate_period_secs: u64,

    #[arg(
        long = "send-retry-max-attempts",
        env = "TAU_LINK_SEND_RETRY_MAX_ATTEMPTS",
        default_value_t = 5,
        value_parser = parse_positive_usize,
        help = "Total attempts for one outbound message before it is dropped"
    )]
    pub send_retry_max_attempts: usize,

    #[arg(
        long = "send-retry-base-delay-ms",
        env = "TAU_LINK_SEND_RETRY_BASE_DELAY_MS",
        default_value_t = 1_000,
        value_parser = parse_positive_u64,
        help = "Initial backoff between outbound send attempts, doubled per retry"
    )]
    pub send_retry_base_delay_ms: u64,

    #[arg(
        long = "roblox-api-base",
        env = "TAU_LINK_ROBLOX_API_BASE",
        default_value = "https://users.roblox.com",
        help = "Base URL of the Roblox users API"
    )]
    pub roblox_api_base: String,

    #[arg(
        long = "roblox-request-timeout-ms",
        env = "TAU_LINK_ROBLOX_REQUEST_TIMEOUT_MS",
        default_value_t = 10_000,
        value_parser = parse_positive_u64,
        help = "Timeout for one Roblox user search request"
    )]
    pub roblox_request_timeout_ms: u64,
}

impl Cli {
    pub fn runtime_config(&self) -> LinkRuntimeConfig {
        let mut config = LinkRuntimeConfig {
            command_prefix: self.command_prefix.clone(),
            verified_role: self.verified_role.clone(),
            confirmation_window: Duration::from_secs(self.confirmation_timeout_secs),
            link_cooldown: Duration::from_secs(self.link_cooldown_secs),
            resolver: ProfileResolverConfig {
                api_base: self.roblox_api_base.clone(),
                request_timeout: Duration::from_millis(self.roblox_request_timeout_ms),
                ..ProfileResolverConfig::default()
            },
            ..LinkRuntimeConfig::default()
        };
        config.dispatcher.rate_limit = RateLimitConfig {
            max_permits: u32::try_from(self.message_rate_limit).unwrap_or(u32::MAX),
            period: Duration::from_secs(self.message_rate_period_secs),
        };
        config.dispatcher.retry = RetryPolicy::exponential(
            self.send_retry_max_attempts,
            Duration::from_millis(self.send_retry_base_delay_ms),
        );
        config
    }
}
