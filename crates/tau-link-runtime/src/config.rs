use std::time::Duration;

use tau_dispatch::DispatcherConfig;

use crate::nickname_sync::NICKNAME_MAX_CHARS;
use crate::profile_resolver::ProfileResolverConfig;

pub const DEFAULT_COMMAND_PREFIX: &str = "!";
pub const DEFAULT_VERIFIED_ROLE: &str = "Verified";

#[derive(Debug, Clone, PartialEq, Eq)]
/// Settings shared by the link workflow, command router, and event handlers.
pub struct LinkRuntimeConfig {
    pub command_prefix: String,
    /// Role granted on a committed link and removed on unlink, looked up by name.
    pub verified_role: String,
    pub confirmation_window: Duration,
    pub session_ttl: Duration,
    pub session_capacity: usize,
    pub link_cooldown: Duration,
    /// Pause before the next interaction after the platform rejects us with a 429.
    pub platform_rate_limit_cooldown: Duration,
    pub nickname_max_chars: usize,
    pub dispatcher: DispatcherConfig,
    pub resolver: ProfileResolverConfig,
}

impl Default for LinkRuntimeConfig {
    fn default() -> Self {
        Self {
            command_prefix: DEFAULT_COMMAND_PREFIX.to_string(),
            verified_role: DEFAULT_VERIFIED_ROLE.to_string(),
            confirmation_window: Duration::from_secs(30),
            session_ttl: Duration::from_secs(600),
            session_capacity: 1_000,
            link_cooldown: Duration::from_secs(10),
            platform_rate_limit_cooldown: Duration::from_secs(5),
            nickname_max_chars: NICKNAME_MAX_CHARS,
            dispatcher: DispatcherConfig::default(),
            resolver: ProfileResolverConfig::default(),
        }
    }
}
