use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tau_dispatch::{OutboundDispatcher, RateLimitConfig};

use crate::config::LinkRuntimeConfig;
use crate::platform::{ChatPlatform, MemberRef, PlatformError, PlatformSink};
use crate::profile_resolver::{ProfileResolver, ResolvedProfile};

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum PlatformCall {
    SetNickname {
        principal_id: String,
        nickname: Option<String>,
    },
    AddRole {
        principal_id: String,
        role: String,
    },
    RemoveRole {
        principal_id: String,
        role: String,
    },
}

#[derive(Default)]
pub(crate) struct RecordingPlatform {
    sent: Mutex<Vec<String>>,
    calls: Mutex<Vec<PlatformCall>>,
    nickname_error: Mutex<Option<PlatformError>>,
    role_error: Mutex<Option<PlatformError>>,
}

impl RecordingPlatform {
    pub(crate) fn sent_messages(&self) -> Vec<String> {
        self.sent.lock().expect("sent lock").clone()
    }

    pub(crate) fn calls(&self) -> Vec<PlatformCall> {
        self.calls.lock().expect("calls lock").clone()
    }

    pub(crate) fn fail_nickname_with(&self, error: PlatformError) {
        *self.nickname_error.lock().expect("nickname lock") = Some(error);
    }

    pub(crate) fn fail_roles_with(&self, error: PlatformError) {
        *self.role_error.lock().expect("role lock") = Some(error);
    }

    fn record(&self, call: PlatformCall) {
        self.calls.lock().expect("calls lock").push(call);
    }

    fn scripted(slot: &Mutex<Option<PlatformError>>) -> Result<(), PlatformError> {
        match slot.lock().expect("error lock").clone() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl ChatPlatform for RecordingPlatform {
    async fn send_message(&self, _channel_id: &str, content: &str) -> Result<(), PlatformError> {
        self.sent.lock().expect("sent lock").push(content.to_string());
        Ok(())
    }

    async fn set_nickname(
        &self,
        member: &MemberRef,
        nickname: Option<&str>,
    ) -> Result<(), PlatformError> {
        self.record(PlatformCall::SetNickname {
            principal_id: member.principal_id.clone(),
            nickname: nickname.map(str::to_string),
        });
        Self::scripted(&self.nickname_error)
    }

    async fn add_role(&self, member: &MemberRef, role_name: &str) -> Result<(), PlatformError> {
        self.record(PlatformCall::AddRole {
            principal_id: member.principal_id.clone(),
            role: role_name.to_string(),
        });
        Self::scripted(&self.role_error)
    }

    async fn remove_role(
        &self,
        member: &MemberRef,
        role_name: &str,
    ) -> Result<(), PlatformError> {
        self.record(PlatformCall::RemoveRole {
            principal_id: member.principal_id.clone(),
            role: role_name.to_string(),
        });
        Self::scripted(&self.role_error)
    }
}

#[derive(Default)]
pub(crate) struct StaticResolver {
    profiles: HashMap<String, ResolvedProfile>,
    lookups: AtomicUsize,
}

impl StaticResolver {
    pub(crate) fn with_profile(mut self, username: &str, profile_id: &str, name: &str) -> Self {
        self.profiles.insert(
            username.to_string(),
            ResolvedProfile {
                profile_id: profile_id.to_string(),
                profile_name: Some(name.to_string()),
                profile_url: format!("https://www.roblox.com/users/{profile_id}/profile"),
            },
        );
        self
    }

    pub(crate) fn lookups(&self) -> usize {
        self.lookups.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ProfileResolver for StaticResolver {
    async fn resolve(&self, username: &str) -> Option<ResolvedProfile> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        self.profiles.get(username).cloned()
    }
}

pub(crate) fn unlimited_config() -> LinkRuntimeConfig {
    let mut config = LinkRuntimeConfig::default();
    config.dispatcher.rate_limit = RateLimitConfig {
        max_permits: 0,
        ..config.dispatcher.rate_limit
    };
    config
}

pub(crate) fn test_dispatcher(
    platform: Arc<RecordingPlatform>,
    config: &LinkRuntimeConfig,
) -> Arc<OutboundDispatcher> {
    Arc::new(OutboundDispatcher::new(
        Arc::new(PlatformSink::new(platform)),
        config.dispatcher,
    ))
}
