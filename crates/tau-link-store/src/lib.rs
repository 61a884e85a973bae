//! Identity link store abstractions and in-memory backend.
//!
//! A link maps one chat principal to one external profile. Both sides are
//! unique: a principal links at most one profile and a profile is linked by at
//! most one principal. Backends must enforce that bijection inside a single
//! atomic check-and-insert.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use thiserror::Error;
use tokio::sync::RwLock;

mod sqlite;

pub use sqlite::SqliteLinkStore;

/// Result type for link store operations.
pub type StoreResult<T> = Result<T, LinkStoreError>;

/// Errors returned by link store implementations.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum LinkStoreError {
    #[error("principal '{0}' already has a linked profile")]
    PrincipalAlreadyLinked(String),
    #[error("profile '{0}' is already linked to another principal")]
    ProfileAlreadyLinked(String),
    #[error("link store unavailable: {0}")]
    StoreUnavailable(String),
}

impl From<rusqlite::Error> for LinkStoreError {
    fn from(error: rusqlite::Error) -> Self {
        Self::StoreUnavailable(error.to_string())
    }
}

impl From<std::io::Error> for LinkStoreError {
    fn from(error: std::io::Error) -> Self {
        Self::StoreUnavailable(error.to_string())
    }
}

/// One committed principal-to-profile link.
///
/// Row presence is the sole meaning of "linked"; there is no pending or
/// unconfirmed variant of a record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkRecord {
    pub principal_id: String,
    pub profile_id: String,
    /// Profile username captured at link time, used for the nickname annotation.
    pub profile_label: String,
    pub linked_unix_ms: u64,
}

impl LinkRecord {
    pub fn new(
        principal_id: impl Into<String>,
        profile_id: impl Into<String>,
        profile_label: impl Into<String>,
    ) -> Self {
        Self {
            principal_id: principal_id.into(),
            profile_id: profile_id.into(),
            profile_label: profile_label.into(),
            linked_unix_ms: current_unix_ms(),
        }
    }
}

pub(crate) fn current_unix_ms() -> u64 {
    u64::try_from(Utc::now().timestamp_millis()).unwrap_or(0)
}

/// Async store contract used by the link workflow and nickname synchronizer.
#[async_trait]
pub trait LinkStore: Send + Sync {
    /// Atomically inserts a link when neither side is already linked.
    async fn commit_link(
        &self,
        principal_id: &str,
        profile_id: &str,
        profile_label: &str,
    ) -> StoreResult<LinkRecord>;
    /// Removes the link for `principal_id`. Returns whether a row existed.
    async fn remove_link(&self, principal_id: &str) -> StoreResult<bool>;
    async fn is_linked(&self, principal_id: &str) -> StoreResult<bool>;
    async fn is_profile_linked(&self, profile_id: &str) -> StoreResult<bool>;
    async fn lookup_profile(&self, principal_id: &str) -> StoreResult<Option<LinkRecord>>;
    async fn link_count(&self) -> StoreResult<usize>;
}

/// In-memory implementation for tests and local experimentation.
#[derive(Debug, Default)]
pub struct InMemoryLinkStore {
    inner: RwLock<StoreInner>,
}

#[derive(Debug, Default)]
struct StoreInner {
    by_principal: HashMap<String, LinkRecord>,
    principal_by_profile: HashMap<String, String>,
}

impl InMemoryLinkStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of every committed record, ordered by principal id.
    pub async fn records(&self) -> Vec<LinkRecord> {
        let inner = self.inner.read().await;
        let mut records = inner.by_principal.values().cloned().collect::<Vec<_>>();
        records.sort_by(|left, right| left.principal_id.cmp(&right.principal_id));
        records
    }
}

#[async_trait]
impl LinkStore for InMemoryLinkStore {
    async fn commit_link(
        &self,
        principal_id: &str,
        profile_id: &str,
        profile_label: &str,
    ) -> StoreResult<LinkRecord> {
        let mut inner = self.inner.write().await;
        if inner.by_principal.contains_key(principal_id) {
            return Err(LinkStoreError::PrincipalAlreadyLinked(
                principal_id.to_string(),
            ));
        }
        if inner.principal_by_profile.contains_key(profile_id) {
            return Err(LinkStoreError::ProfileAlreadyLinked(profile_id.to_string()));
        }

        let record = LinkRecord::new(principal_id, profile_id, profile_label);
        inner
            .principal_by_profile
            .insert(profile_id.to_string(), principal_id.to_string());
        inner
            .by_principal
            .insert(principal_id.to_string(), record.clone());
        Ok(record)
    }

    async fn remove_link(&self, principal_id: &str) -> StoreResult<bool> {
        let mut inner = self.inner.write().await;
        let Some(record) = inner.by_principal.remove(principal_id) else {
            return Ok(false);
        };
        inner.principal_by_profile.remove(&record.profile_id);
        Ok(true)
    }

    async fn is_linked(&self, principal_id: &str) -> StoreResult<bool> {
        Ok(self.inner.read().await.by_principal.contains_key(principal_id))
    }

    async fn is_profile_linked(&self, profile_id: &str) -> StoreResult<bool> {
        Ok(self
            .inner
            .read()
            .await
            .principal_by_profile
            .contains_key(profile_id))
    }

    async fn lookup_profile(&self, principal_id: &str) -> StoreResult<Option<LinkRecord>> {
        Ok(self.inner.read().await.by_principal.get(principal_id).cloned())
    }

    async fn link_count(&self) -> StoreResult<usize> {
        Ok(self.inner.read().await.by_principal.len())
    }
}
