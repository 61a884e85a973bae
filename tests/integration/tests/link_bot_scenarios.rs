use std::{
    path::Path,
    sync::{Arc, Mutex},
    time::Duration,
};

use async_trait::async_trait;
use httpmock::prelude::*;
use serde_json::json;
use tau_dispatch::RateLimitConfig;
use tau_link_runtime::{
    ChatPlatform, DisplayNameChange, HttpProfileResolver, IncomingMessage, LinkEventHandler,
    LinkOutcome, LinkRuntime, LinkRuntimeConfig, MemberRef, MessageDisposition,
    NicknameSyncOutcome, PlatformError, ProfileResolverConfig, SideEffectOutcome,
    UnlinkStoreStep,
};
use tau_link_store::{LinkStore, LinkStoreError, SqliteLinkStore};
use tempfile::TempDir;

#[derive(Debug, Clone, PartialEq, Eq)]
enum GuildEdit {
    Nickname(String, Option<String>),
    AddRole(String, String),
    RemoveRole(String, String),
}

#[derive(Default)]
struct RecordingPlatform {
    messages: Mutex<Vec<String>>,
    edits: Mutex<Vec<GuildEdit>>,
}

impl RecordingPlatform {
    fn messages(&self) -> Vec<String> {
        self.messages.lock().expect("messages lock").clone()
    }

    fn edits(&self) -> Vec<GuildEdit> {
        self.edits.lock().expect("edits lock").clone()
    }
}

#[async_trait]
impl ChatPlatform for RecordingPlatform {
    async fn send_message(&self, _channel_id: &str, content: &str) -> Result<(), PlatformError> {
        self.messages
            .lock()
            .expect("messages lock")
            .push(content.to_string());
        Ok(())
    }

    async fn set_nickname(
        &self,
        member: &MemberRef,
        nickname: Option<&str>,
    ) -> Result<(), PlatformError> {
        self.edits.lock().expect("edits lock").push(GuildEdit::Nickname(
            member.principal_id.clone(),
            nickname.map(str::to_string),
        ));
        Ok(())
    }

    async fn add_role(&self, member: &MemberRef, role_name: &str) -> Result<(), PlatformError> {
        self.edits
            .lock()
            .expect("edits lock")
            .push(GuildEdit::AddRole(
                member.principal_id.clone(),
                role_name.to_string(),
            ));
        Ok(())
    }

    async fn remove_role(
        &self,
        member: &MemberRef,
        role_name: &str,
    ) -> Result<(), PlatformError> {
        self.edits
            .lock()
            .expect("edits lock")
            .push(GuildEdit::RemoveRole(
                member.principal_id.clone(),
                role_name.to_string(),
            ));
        Ok(())
    }
}

struct BotHarness {
    _workspace: TempDir,
    server: MockServer,
    store: Arc<SqliteLinkStore>,
    platform: Arc<RecordingPlatform>,
    runtime: Arc<LinkRuntime>,
}

impl BotHarness {
    fn new(confirmation_window: Duration) -> Self {
        let workspace = tempfile::tempdir().expect("tempdir");
        Self::with_database(workspace, confirmation_window)
    }

    fn with_database(workspace: TempDir, confirmation_window: Duration) -> Self {
        let server = MockServer::start();
        let store = Arc::new(
            SqliteLinkStore::new(database_path(workspace.path())).expect("open link store"),
        );
        let platform = Arc::new(RecordingPlatform::default());

        let mut config = LinkRuntimeConfig {
            confirmation_window,
            resolver: ProfileResolverConfig {
                api_base: server.base_url(),
                request_timeout: Duration::from_secs(2),
                ..ProfileResolverConfig::default()
            },
            ..LinkRuntimeConfig::default()
        };
        config.dispatcher.rate_limit = RateLimitConfig {
            max_permits: 0,
            ..config.dispatcher.rate_limit
        };
        let resolver =
            Arc::new(HttpProfileResolver::new(config.resolver.clone()).expect("resolver"));
        let runtime = Arc::new(LinkRuntime::new(
            config,
            store.clone(),
            resolver,
            platform.clone(),
        ));
        Self {
            _workspace: workspace,
            server,
            store,
            platform,
            runtime,
        }
    }

    fn mock_search(&self, keyword: &str, profile_id: u64) -> httpmock::Mock<'_> {
        self.server.mock(|when, then| {
            when.method(GET)
                .path("/v1/users/search")
                .query_param("keyword", keyword);
            then.status(200).json_body(json!({
                "data": [{ "id": profile_id, "name": keyword, "displayName": keyword }]
            }));
        })
    }

    fn spawn_message(
        &self,
        principal_id: &str,
        content: &str,
    ) -> tokio::task::JoinHandle<MessageDisposition> {
        let runtime = Arc::clone(&self.runtime);
        let incoming = message(principal_id, content);
        tokio::spawn(async move { runtime.on_message(incoming).await })
    }

    async fn wait_for_prompt(&self, principal_id: &str) {
        let waiter = self.runtime.waiter();
        for _ in 0..500 {
            if waiter.is_waiting(principal_id) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("no confirmation prompt pending for {principal_id}");
    }
}

fn database_path(root: &Path) -> std::path::PathBuf {
    root.join("links.db")
}

fn message(principal_id: &str, content: &str) -> IncomingMessage {
    IncomingMessage {
        message_id: format!("{principal_id}-{content}"),
        principal_id: principal_id.to_string(),
        account_name: format!("{principal_id}_account"),
        guild_id: Some("G1".to_string()),
        channel_id: "C1".to_string(),
        content: content.to_string(),
        from_bot: false,
    }
}

#[tokio::test]
async fn integration_confirmed_link_commits_and_annotates_member() {
    let harness = BotHarness::new(Duration::from_secs(5));
    let search = harness.mock_search("alice", 42);

    let link = harness.spawn_message("P1", "!link alice");
    harness.wait_for_prompt("P1").await;
    assert_eq!(
        harness.runtime.on_message(message("P1", "y")).await,
        MessageDisposition::ConfirmationReply
    );

    let MessageDisposition::Link(LinkOutcome::Linked(effects)) = link.await.expect("join") else {
        panic!("expected a committed link");
    };
    assert_eq!(effects.nickname, "P1_account (@alice)");
    assert_eq!(effects.nickname_outcome, SideEffectOutcome::Applied);
    assert_eq!(effects.role_outcome, SideEffectOutcome::Applied);
    assert_eq!(search.calls(), 1);

    let record = harness
        .store
        .lookup_profile("P1")
        .await
        .expect("lookup")
        .expect("record");
    assert_eq!(record.profile_id, "42");
    assert_eq!(record.profile_label, "alice");
    assert_eq!(
        harness.platform.edits(),
        vec![
            GuildEdit::Nickname("P1".to_string(), Some("P1_account (@alice)".to_string())),
            GuildEdit::AddRole("P1".to_string(), "Verified".to_string()),
        ]
    );
    let messages = harness.platform.messages();
    assert!(messages[0]
        .starts_with("Is this your Roblox account? https://www.roblox.com/users/42/profile"));
    assert!(messages.contains(&"Roblox account linked successfully!".to_string()));
    assert!(messages.contains(&"You have been given the 'Verified' role.".to_string()));
}

#[tokio::test]
async fn integration_already_linked_principal_never_reaches_resolver() {
    let harness = BotHarness::new(Duration::from_secs(5));
    let search = harness.mock_search("bob", 77);
    harness
        .store
        .commit_link("P1", "42", "alice")
        .await
        .expect("seed link");

    assert_eq!(
        harness.runtime.on_message(message("P1", "!link bob")).await,
        MessageDisposition::Link(LinkOutcome::AlreadyLinked)
    );
    assert_eq!(search.calls(), 0);
    assert!(!harness.runtime.waiter().is_waiting("P1"));
    assert_eq!(
        harness.platform.messages(),
        vec!["You've already linked a Roblox account.".to_string()]
    );
}

#[tokio::test]
async fn integration_profile_claimed_during_confirmation_is_rejected_at_commit() {
    let harness = BotHarness::new(Duration::from_secs(5));
    harness.mock_search("alice", 42);

    let link = harness.spawn_message("P2", "!link alice");
    harness.wait_for_prompt("P2").await;
    harness
        .store
        .commit_link("P1", "42", "alice")
        .await
        .expect("competing link");
    harness.runtime.on_message(message("P2", "yes")).await;

    assert_eq!(
        link.await.expect("join"),
        MessageDisposition::Link(LinkOutcome::CommitRejected(
            LinkStoreError::ProfileAlreadyLinked("42".to_string())
        ))
    );
    assert_eq!(harness.store.link_count().await.expect("count"), 1);
    assert!(harness.store.is_linked("P1").await.expect("P1"));
    assert!(!harness.store.is_linked("P2").await.expect("P2"));
    assert!(harness.platform.edits().is_empty());

    // With the profile already taken, a fresh attempt is rejected before any prompt.
    assert_eq!(
        harness.runtime.on_message(message("P3", "!link alice")).await,
        MessageDisposition::Link(LinkOutcome::ProfileAlreadyLinked)
    );
}

#[tokio::test]
async fn integration_late_confirmation_expires_and_is_ignored() {
    let harness = BotHarness::new(Duration::from_millis(300));
    harness.mock_search("alice", 42);

    let link = harness.spawn_message("P1", "!link alice");
    harness.wait_for_prompt("P1").await;
    tokio::time::sleep(Duration::from_millis(600)).await;

    assert_eq!(
        harness.runtime.on_message(message("P1", "yes")).await,
        MessageDisposition::Ignored
    );
    assert_eq!(
        link.await.expect("join"),
        MessageDisposition::Link(LinkOutcome::Expired)
    );
    assert_eq!(harness.store.link_count().await.expect("count"), 0);
    assert!(harness
        .platform
        .messages()
        .contains(&"Verification timed out.".to_string()));
}

#[tokio::test]
async fn integration_second_link_while_pending_is_rejected() {
    let harness = BotHarness::new(Duration::from_secs(5));
    let search = harness.mock_search("alice", 42);

    let first = harness.spawn_message("P1", "!link alice");
    harness.wait_for_prompt("P1").await;
    // The per-user cooldown answers before the pending session is consulted.
    assert_eq!(
        harness.runtime.on_message(message("P1", "!link alice")).await,
        MessageDisposition::Rejected("on_cooldown")
    );
    assert_eq!(
        harness
            .runtime
            .workflow()
            .link(&message("P1", "!link alice").command_context(), "alice")
            .await,
        LinkOutcome::SessionPending
    );
    assert_eq!(search.calls(), 1);

    harness.runtime.on_message(message("P1", "no")).await;
    assert_eq!(
        first.await.expect("join"),
        MessageDisposition::Link(LinkOutcome::Cancelled)
    );
}

#[tokio::test]
async fn integration_unlink_is_idempotent_end_to_end() {
    let harness = BotHarness::new(Duration::from_secs(5));
    harness
        .store
        .commit_link("P1", "42", "alice")
        .await
        .expect("seed link");

    let MessageDisposition::Unlink(first) =
        harness.runtime.on_message(message("P1", "!unlink")).await
    else {
        panic!("expected unlink report");
    };
    assert_eq!(first.store, UnlinkStoreStep::Removed);
    let MessageDisposition::Unlink(second) =
        harness.runtime.on_message(message("P1", "!unlink")).await
    else {
        panic!("expected unlink report");
    };
    assert_eq!(second.store, UnlinkStoreStep::NotLinked);
    assert_eq!(second.nickname_outcome, SideEffectOutcome::Applied);

    assert!(!harness.store.is_profile_linked("42").await.expect("profile"));
    assert!(harness
        .platform
        .edits()
        .contains(&GuildEdit::RemoveRole("P1".to_string(), "Verified".to_string())));
}

#[tokio::test]
async fn integration_nickname_sync_reannotates_then_settles() {
    let harness = BotHarness::new(Duration::from_secs(5));
    harness
        .store
        .commit_link("P1", "42", "alice")
        .await
        .expect("seed link");
    let change = |before: &str, after: &str| DisplayNameChange {
        member: MemberRef::new("G1", "P1"),
        account_name: "P1_account".to_string(),
        before: Some(before.to_string()),
        after: Some(after.to_string()),
    };

    let outcome = harness
        .runtime
        .on_display_name_changed(change("P1_account (@alice)", "Builder"))
        .await;
    assert_eq!(
        outcome,
        NicknameSyncOutcome::Updated("Builder (@alice)".to_string())
    );
    // The edit above echoes back as another change notification.
    let echoed = harness
        .runtime
        .on_display_name_changed(change("Builder", "Builder (@alice)"))
        .await;
    assert_eq!(echoed, NicknameSyncOutcome::AlreadyCanonical);
    assert_eq!(harness.platform.edits().len(), 1);
}

#[tokio::test]
async fn integration_legacy_database_links_are_honoured() {
    let workspace = tempfile::tempdir().expect("tempdir");
    {
        let connection =
            rusqlite::Connection::open(database_path(workspace.path())).expect("legacy db");
        connection
            .execute_batch(
                r#"
                CREATE TABLE links (
                    discord_id TEXT PRIMARY KEY,
                    roblox_id TEXT UNIQUE,
                    linked BOOLEAN DEFAULT 0
                );
                INSERT INTO links VALUES ('P1', '42', 1);
                INSERT INTO links VALUES ('P9', '99', 0);
                "#,
            )
            .expect("seed legacy rows");
    }

    let harness = BotHarness::with_database(workspace, Duration::from_secs(5));
    let search = harness.mock_search("alice", 42);
    assert_eq!(
        harness.runtime.on_message(message("P1", "!checklink")).await,
        MessageDisposition::CheckLink(tau_link_runtime::CheckLinkOutcome::Linked)
    );
    assert_eq!(
        harness.runtime.on_message(message("P9", "!checklink")).await,
        MessageDisposition::CheckLink(tau_link_runtime::CheckLinkOutcome::NotLinked)
    );
    assert_eq!(
        harness.runtime.on_message(message("P2", "!link alice")).await,
        MessageDisposition::Link(LinkOutcome::ProfileAlreadyLinked)
    );
    assert_eq!(search.calls(), 1);
}
