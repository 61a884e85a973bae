//! SQLite-backed `LinkStore` with constraint-enforced uniqueness.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};

use crate::{current_unix_ms, LinkRecord, LinkStore, LinkStoreError, StoreResult};

const LEGACY_PRINCIPAL_COLUMN: &str = "discord_id";

/// Persistent SQLite store for committed links.
#[derive(Debug)]
pub struct SqliteLinkStore {
    db_path: PathBuf,
}

impl SqliteLinkStore {
    /// Opens (or creates) the database at `path`, creating and migrating schema.
    pub fn new(path: impl AsRef<Path>) -> StoreResult<Self> {
        let db_path = path.as_ref().to_path_buf();
        if let Some(parent) = db_path.parent().filter(|dir| !dir.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }

        let store = Self { db_path };
        let mut connection = store.open_connection()?;
        initialize_schema(&mut connection)?;
        Ok(store)
    }

    pub fn path(&self) -> &Path {
        &self.db_path
    }

    fn open_connection(&self) -> StoreResult<Connection> {
        let connection = Connection::open(&self.db_path)?;
        connection.busy_timeout(Duration::from_secs(5))?;
        connection.execute_batch(
            r#"
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            "#,
        )?;
        Ok(connection)
    }
}

fn initialize_schema(connection: &mut Connection) -> StoreResult<()> {
    let transaction = connection.transaction_with_behavior(TransactionBehavior::Immediate)?;
    let existing_columns = table_columns(&transaction, "links")?;
    let legacy = existing_columns
        .iter()
        .any(|column| column == LEGACY_PRINCIPAL_COLUMN);
    if legacy {
        transaction.execute_batch("ALTER TABLE links RENAME TO links_legacy;")?;
    }

    transaction.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS links (
            principal_id TEXT PRIMARY KEY,
            profile_id TEXT NOT NULL UNIQUE,
            profile_label TEXT NOT NULL,
            linked_unix_ms INTEGER NOT NULL
        );
        "#,
    )?;

    if legacy {
        // Legacy rows never carried a username, so the profile id stands in
        // for the label. Rows with a falsy flag were never truly linked.
        let imported = transaction.execute(
            r#"
            INSERT OR IGNORE INTO links (principal_id, profile_id, profile_label, linked_unix_ms)
            SELECT CAST(discord_id AS TEXT), CAST(roblox_id AS TEXT), CAST(roblox_id AS TEXT), ?1
            FROM links_legacy
            WHERE linked AND roblox_id IS NOT NULL
            ORDER BY rowid
            "#,
            params![unix_ms_to_db(current_unix_ms())],
        )?;
        transaction.execute_batch("DROP TABLE links_legacy;")?;
        tracing::info!(imported, "migrated legacy link table");
    }

    transaction.commit()?;
    Ok(())
}

fn table_columns(connection: &Connection, table: &str) -> StoreResult<Vec<String>> {
    let mut statement = connection.prepare(&format!("PRAGMA table_info({table})"))?;
    let columns = statement
        .query_map([], |row| row.get::<_, String>(1))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(columns)
}

fn unix_ms_to_db(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

fn unix_ms_from_db(value: i64) -> u64 {
    u64::try_from(value).unwrap_or(0)
}

fn classify_insert_error(
    error: rusqlite::Error,
    principal_id: &str,
    profile_id: &str,
) -> LinkStoreError {
    if let rusqlite::Error::SqliteFailure(failure, message) = &error {
        if failure.code == rusqlite::ErrorCode::ConstraintViolation {
            let message = message.as_deref().unwrap_or_default();
            if message.contains("links.profile_id") {
                return LinkStoreError::ProfileAlreadyLinked(profile_id.to_string());
            }
            if message.contains("links.principal_id") {
                return LinkStoreError::PrincipalAlreadyLinked(principal_id.to_string());
            }
        }
    }
    LinkStoreError::from(error)
}

#[async_trait]
impl LinkStore for SqliteLinkStore {
    async fn commit_link(
        &self,
        principal_id: &str,
        profile_id: &str,
        profile_label: &str,
    ) -> StoreResult<LinkRecord> {
        let mut connection = self.open_connection()?;
        let transaction = connection.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let principal_taken = transaction
            .query_row(
                "SELECT 1 FROM links WHERE principal_id = ?1",
                params![principal_id],
                |row| row.get::<_, i64>(0),
            )
            .optional()?;
        if principal_taken.is_some() {
            return Err(LinkStoreError::PrincipalAlreadyLinked(
                principal_id.to_string(),
            ));
        }

        let profile_taken = transaction
            .query_row(
                "SELECT 1 FROM links WHERE profile_id = ?1",
                params![profile_id],
                |row| row.get::<_, i64>(0),
            )
            .optional()?;
        if profile_taken.is_some() {
            return Err(LinkStoreError::ProfileAlreadyLinked(profile_id.to_string()));
        }

        let record = LinkRecord::new(principal_id, profile_id, profile_label);
        transaction
            .execute(
                r#"
                INSERT INTO links (principal_id, profile_id, profile_label, linked_unix_ms)
                VALUES (?1, ?2, ?3, ?4)
                "#,
                params![
                    record.principal_id,
                    record.profile_id,
                    record.profile_label,
                    unix_ms_to_db(record.linked_unix_ms),
                ],
            )
            .map_err(|error| classify_insert_error(error, principal_id, profile_id))?;
        transaction.commit()?;

        tracing::debug!(principal_id, profile_id, "committed link");
        Ok(record)
    }

    async fn remove_link(&self, principal_id: &str) -> StoreResult<bool> {
        let connection = self.open_connection()?;
        let removed = connection.execute(
            "DELETE FROM links WHERE principal_id = ?1",
            params![principal_id],
        )?;
        Ok(removed > 0)
    }

    async fn is_linked(&self, principal_id: &str) -> StoreResult<bool> {
        let connection = self.open_connection()?;
        let row = connection
            .query_row(
                "SELECT 1 FROM links WHERE principal_id = ?1",
                params![principal_id],
                |row| row.get::<_, i64>(0),
            )
            .optional()?;
        Ok(row.is_some())
    }

    async fn is_profile_linked(&self, profile_id: &str) -> StoreResult<bool> {
        let connection = self.open_connection()?;
        let row = connection
            .query_row(
                "SELECT 1 FROM links WHERE profile_id = ?1",
                params![profile_id],
                |row| row.get::<_, i64>(0),
            )
            .optional()?;
        Ok(row.is_some())
    }

    async fn lookup_profile(&self, principal_id: &str) -> StoreResult<Option<LinkRecord>> {
        let connection = self.open_connection()?;
        let record = connection
            .query_row(
                r#"
                SELECT principal_id, profile_id, profile_label, linked_unix_ms
                FROM links
                WHERE principal_id = ?1
                "#,
                params![principal_id],
                |row| {
                    Ok(LinkRecord {
                        principal_id: row.get(0)?,
                        profile_id: row.get(1)?,
                        profile_label: row.get(2)?,
                        linked_unix_ms: unix_ms_from_db(row.get(3)?),
                    })
                },
            )
            .optional()?;
        Ok(record)
    }

    async fn link_count(&self) -> StoreResult<usize> {
        let connection = self.open_connection()?;
        let count = connection.query_row("SELECT COUNT(*) FROM links", [], |row| {
            row.get::<_, i64>(0)
        })?;
        Ok(usize::try_from(count).unwrap_or(0))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use rusqlite::{params, Connection};
    use tempfile::tempdir;

    use super::SqliteLinkStore;
    use crate::{LinkStore, LinkStoreError};

    #[tokio::test]
    async fn persists_links_across_reopen() {
        let temp = tempdir().expect("create tempdir");
        let db_path = temp.path().join("links.sqlite");

        {
            let store = SqliteLinkStore::new(&db_path).expect("create sqlite store");
            store
                .commit_link("P1", "42", "alice")
                .await
                .expect("commit link");
        }

        let reopened = SqliteLinkStore::new(&db_path).expect("reopen sqlite store");
        let record = reopened
            .lookup_profile("P1")
            .await
            .expect("lookup")
            .expect("record survives reopen");
        assert_eq!(record.profile_id, "42");
        assert_eq!(record.profile_label, "alice");
        assert!(record.linked_unix_ms > 0);
        assert_eq!(reopened.link_count().await.expect("count"), 1);
    }

    #[tokio::test]
    async fn functional_commit_reports_which_side_is_taken() {
        let temp = tempdir().expect("create tempdir");
        let store = SqliteLinkStore::new(temp.path().join("links.sqlite")).expect("store");
        store.commit_link("P1", "42", "alice").await.expect("first");

        let error = store
            .commit_link("P2", "42", "alice")
            .await
            .expect_err("profile taken");
        assert!(matches!(error, LinkStoreError::ProfileAlreadyLinked(_)));

        let error = store
            .commit_link("P1", "43", "carol")
            .await
            .expect_err("principal taken");
        assert!(matches!(error, LinkStoreError::PrincipalAlreadyLinked(_)));

        assert!(!store.is_linked("P2").await.expect("is linked"));
        assert!(store.is_profile_linked("42").await.expect("profile linked"));
    }

    #[tokio::test]
    async fn functional_remove_link_is_idempotent() {
        let temp = tempdir().expect("create tempdir");
        let store = SqliteLinkStore::new(temp.path().join("links.sqlite")).expect("store");
        assert!(!store.remove_link("P1").await.expect("remove missing"));
        store.commit_link("P1", "42", "alice").await.expect("commit");
        assert!(store.remove_link("P1").await.expect("remove"));
        assert!(!store.remove_link("P1").await.expect("remove again"));
        assert_eq!(store.link_count().await.expect("count"), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn regression_concurrent_commits_leave_single_row_per_profile() {
        let temp = tempdir().expect("create tempdir");
        let store =
            Arc::new(SqliteLinkStore::new(temp.path().join("links.sqlite")).expect("store"));

        let mut handles = Vec::new();
        for index in 0..8 {
            let store = Arc::clone(&store);
            handles.push(tokio::spawn(async move {
                store
                    .commit_link(&format!("P{index}"), "42", "alice")
                    .await
            }));
        }

        let mut committed = 0;
        for handle in handles {
            match handle.await.expect("join") {
                Ok(_) => committed += 1,
                Err(LinkStoreError::ProfileAlreadyLinked(_)) => {}
                Err(other) => panic!("unexpected error: {other}"),
            }
        }
        assert_eq!(committed, 1);
        assert_eq!(store.link_count().await.expect("count"), 1);
    }

    #[tokio::test]
    async fn integration_legacy_table_is_migrated_on_open() {
        let temp = tempdir().expect("create tempdir");
        let db_path = temp.path().join("database.db");
        {
            let connection = Connection::open(&db_path).expect("open legacy db");
            connection
                .execute_batch(
                    r#"
                    CREATE TABLE links (
                        discord_id TEXT PRIMARY KEY,
                        roblox_id TEXT UNIQUE,
                        linked BOOLEAN DEFAULT 0
                    );
                    "#,
                )
                .expect("create legacy table");
            for (discord_id, roblox_id, linked) in [("100", "42", 1), ("200", "77", 0)] {
                connection
                    .execute(
                        "INSERT INTO links (discord_id, roblox_id, linked) VALUES (?1, ?2, ?3)",
                        params![discord_id, roblox_id, linked],
                    )
                    .expect("insert legacy row");
            }
        }

        let store = SqliteLinkStore::new(&db_path).expect("open and migrate");
        assert!(store.is_linked("100").await.expect("linked"));
        assert!(!store.is_linked("200").await.expect("unconfirmed row dropped"));
        let record = store
            .lookup_profile("100")
            .await
            .expect("lookup")
            .expect("migrated record");
        assert_eq!(record.profile_id, "42");
        assert_eq!(record.profile_label, "42");

        drop(store);
        let reopened = SqliteLinkStore::new(&db_path).expect("reopen migrated db");
        assert_eq!(reopened.link_count().await.expect("count"), 1);
    }
}
