//! SQLite-backed key store.
//!
//! `PRIMARY KEY(resource_id, recipient, key_version)` on `wrapped_keys` and a
//! partial unique index over pending `key_requests` enforce the store
//! invariants even if two processes share the database file.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension, Row};
use tokio::sync::Mutex;

use hush_crypto::identity::Principal;
use hush_crypto::{PublicId, WrappedKey};

use crate::store::{InsertOutcome, KeyStore, PutOutcome, StoreError};
use crate::types::{KeyRequest, KeyRequestStatus};

/// Current schema version for migrations.
const SCHEMA_VERSION: i32 = 2;

pub struct SqliteKeyStore {
    conn: Arc<Mutex<Connection>>,
}

fn op_err(context: &str) -> impl Fn(rusqlite::Error) -> StoreError + '_ {
    move |e| StoreError::OperationFailed(format!("{context}: {e}"))
}

impl SqliteKeyStore {
    /// Open or create the database at `path` and run migrations.
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        let conn = Connection::open(path).map_err(op_err("failed to open database"))?;

        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL; PRAGMA busy_timeout=5000;")
            .map_err(op_err("failed to set pragmas"))?;

        Self::run_migrations(&conn)?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn new_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory().map_err(op_err("failed to open in-memory database"))?;
        Self::run_migrations(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn run_migrations(conn: &Connection) -> Result<(), StoreError> {
        conn.execute(
            "CREATE TABLE IF NOT EXISTS schema_version (
                version INTEGER PRIMARY KEY
            )",
            [],
        )
        .map_err(op_err("failed to create schema_version"))?;

        let current_version: i32 = conn
            .query_row("SELECT COALESCE(MAX(version), 0) FROM schema_version", [], |row| {
                row.get(0)
            })
            .map_err(op_err("failed to read schema version"))?;

        if current_version > SCHEMA_VERSION {
            return Err(StoreError::DataCorruption(format!(
                "database schema v{current_version} is newer than supported v{SCHEMA_VERSION}"
            )));
        }
        if current_version < 1 {
            Self::migrate_v1(conn)?;
        }
        if current_version < 2 {
            Self::migrate_v2(conn)?;
        }

        Ok(())
    }

    fn migrate_v1(conn: &Connection) -> Result<(), StoreError> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS memberships (
                resource_id TEXT NOT NULL,
                public_id TEXT NOT NULL,
                display_name TEXT,
                PRIMARY KEY (resource_id, public_id)
            );

            CREATE TABLE IF NOT EXISTS resource_versions (
                resource_id TEXT PRIMARY KEY,
                version INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS wrapped_keys (
                resource_id TEXT NOT NULL,
                recipient TEXT NOT NULL,
                ciphertext TEXT NOT NULL,
                wrapper_version INTEGER NOT NULL,
                key_version INTEGER NOT NULL,
                wrapped_by TEXT NOT NULL,
                wrapped_at INTEGER NOT NULL,
                PRIMARY KEY (resource_id, recipient)
            );

            CREATE TABLE IF NOT EXISTS key_requests (
                id TEXT PRIMARY KEY,
                resource_id TEXT NOT NULL,
                requester TEXT NOT NULL,
                requester_display_name TEXT,
                status TEXT NOT NULL,
                created_at INTEGER NOT NULL,
                fulfilled_at INTEGER
            );
            CREATE UNIQUE INDEX IF NOT EXISTS idx_key_requests_pending
                ON key_requests(resource_id, requester) WHERE status = 'pending';
            CREATE INDEX IF NOT EXISTS idx_key_requests_status ON key_requests(status, created_at);

            INSERT INTO schema_version (version) VALUES (1);
            "#,
        )
        .map_err(op_err("migration v1 failed"))?;

        Ok(())
    }

    /// Keep every key version's wrap instead of only the newest.
    fn migrate_v2(conn: &Connection) -> Result<(), StoreError> {
        conn.execute_batch(
            r#"
            BEGIN;
            CREATE TABLE wrapped_keys_v2 (
                resource_id TEXT NOT NULL,
                recipient TEXT NOT NULL,
                ciphertext TEXT NOT NULL,
                wrapper_version INTEGER NOT NULL,
                key_version INTEGER NOT NULL,
                wrapped_by TEXT NOT NULL,
                wrapped_at INTEGER NOT NULL,
                PRIMARY KEY (resource_id, recipient, key_version)
            );
            INSERT INTO wrapped_keys_v2
                SELECT resource_id, recipient, ciphertext, wrapper_version, key_version, wrapped_by, wrapped_at
                FROM wrapped_keys;
            DROP TABLE wrapped_keys;
            ALTER TABLE wrapped_keys_v2 RENAME TO wrapped_keys;

            INSERT INTO schema_version (version) VALUES (2);
            COMMIT;
            "#,
        )
        .map_err(op_err("migration v2 failed"))?;

        Ok(())
    }

    // -------------------------------------------------------------------------
    // Row mapping
    // -------------------------------------------------------------------------

    fn parse_id(s: &str) -> Result<PublicId, StoreError> {
        s.parse()
            .map_err(|e| StoreError::DataCorruption(format!("bad public id {s:?}: {e}")))
    }

    #[allow(clippy::type_complexity)]
    fn wrapped_from_row(row: &Row<'_>) -> rusqlite::Result<(String, String, String, u8, u32, String, i64)> {
        Ok((
            row.get(0)?,
            row.get(1)?,
            row.get(2)?,
            row.get(3)?,
            row.get(4)?,
            row.get(5)?,
            row.get(6)?,
        ))
    }

    fn wrapped_from_parts(
        parts: (String, String, String, u8, u32, String, i64),
    ) -> Result<WrappedKey, StoreError> {
        let (resource_id, recipient, ciphertext, wrapper_version, key_version, wrapped_by, wrapped_at) = parts;
        Ok(WrappedKey {
            resource_id,
            recipient_public_id: Self::parse_id(&recipient)?,
            ciphertext,
            wrapper_version,
            key_version,
            wrapped_by_public_id: Self::parse_id(&wrapped_by)?,
            wrapped_at: wrapped_at as u64,
        })
    }

    #[allow(clippy::type_complexity)]
    fn request_from_row(
        row: &Row<'_>,
    ) -> rusqlite::Result<(String, String, String, Option<String>, String, i64, Option<i64>)> {
        Ok((
            row.get(0)?,
            row.get(1)?,
            row.get(2)?,
            row.get(3)?,
            row.get(4)?,
            row.get(5)?,
            row.get(6)?,
        ))
    }

    fn request_from_parts(
        parts: (String, String, String, Option<String>, String, i64, Option<i64>),
    ) -> Result<KeyRequest, StoreError> {
        let (id, resource_id, requester, requester_display_name, status, created_at, fulfilled_at) = parts;
        Ok(KeyRequest {
            id,
            resource_id,
            requester_public_id: Self::parse_id(&requester)?,
            requester_display_name,
            status: status.parse::<KeyRequestStatus>().map_err(StoreError::DataCorruption)?,
            created_at: created_at as u64,
            fulfilled_at: fulfilled_at.map(|t| t as u64),
        })
    }
}

const WRAPPED_COLUMNS: &str =
    "resource_id, recipient, ciphertext, wrapper_version, key_version, wrapped_by, wrapped_at";
const REQUEST_COLUMNS: &str =
    "id, resource_id, requester, requester_display_name, status, created_at, fulfilled_at";

#[async_trait]
impl KeyStore for SqliteKeyStore {
    async fn authorize(&self, resource_id: &str, principal: &Principal) -> Result<bool, StoreError> {
        let conn = self.conn.lock().await;
        let changed = conn
            .execute(
                "INSERT OR IGNORE INTO memberships (resource_id, public_id, display_name) VALUES (?1, ?2, ?3)",
                params![resource_id, principal.public_id.to_hex(), principal.display_name],
            )
            .map_err(op_err("failed to authorize principal"))?;
        Ok(changed == 1)
    }

    async fn revoke(&self, resource_id: &str, principal: &PublicId) -> Result<bool, StoreError> {
        let conn = self.conn.lock().await;
        let changed = conn
            .execute(
                "DELETE FROM memberships WHERE resource_id = ?1 AND public_id = ?2",
                params![resource_id, principal.to_hex()],
            )
            .map_err(op_err("failed to revoke principal"))?;
        Ok(changed == 1)
    }

    async fn is_authorized(&self, resource_id: &str, principal: &PublicId) -> Result<bool, StoreError> {
        let conn = self.conn.lock().await;
        let found: Option<i64> = conn
            .query_row(
                "SELECT 1 FROM memberships WHERE resource_id = ?1 AND public_id = ?2",
                params![resource_id, principal.to_hex()],
                |row| row.get(0),
            )
            .optional()
            .map_err(op_err("failed to check membership"))?;
        Ok(found.is_some())
    }

    async fn authorized_principals(&self, resource_id: &str) -> Result<Vec<Principal>, StoreError> {
        let conn = self.conn.lock().await;
        let mut stmt = conn
            .prepare(
                "SELECT public_id, display_name FROM memberships WHERE resource_id = ?1 ORDER BY public_id",
            )
            .map_err(op_err("failed to prepare membership query"))?;
        let rows = stmt
            .query_map(params![resource_id], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, Option<String>>(1)?))
            })
            .map_err(op_err("failed to list members"))?;

        let mut out = Vec::new();
        for row in rows {
            let (public_id, display_name) = row.map_err(op_err("failed to read member row"))?;
            out.push(Principal {
                public_id: Self::parse_id(&public_id)?,
                display_name,
            });
        }
        Ok(out)
    }

    async fn current_key_version(&self, resource_id: &str) -> Result<Option<u32>, StoreError> {
        let conn = self.conn.lock().await;
        conn.query_row(
            "SELECT version FROM resource_versions WHERE resource_id = ?1",
            params![resource_id],
            |row| row.get(0),
        )
        .optional()
        .map_err(op_err("failed to read key version"))
    }

    async fn advance_key_version(
        &self,
        resource_id: &str,
        expected: Option<u32>,
        next: u32,
    ) -> Result<bool, StoreError> {
        if expected.map_or(false, |v| next <= v) {
            return Err(StoreError::OperationFailed(format!(
                "key version must increase: {next} <= {}",
                expected.unwrap_or_default()
            )));
        }
        let conn = self.conn.lock().await;
        let changed = match expected {
            None => conn.execute(
                "INSERT OR IGNORE INTO resource_versions (resource_id, version) VALUES (?1, ?2)",
                params![resource_id, next],
            ),
            Some(current) => conn.execute(
                "UPDATE resource_versions SET version = ?3 WHERE resource_id = ?1 AND version = ?2",
                params![resource_id, current, next],
            ),
        }
        .map_err(op_err("failed to advance key version"))?;
        Ok(changed == 1)
    }

    async fn put_wrapped_key(&self, wrapped: &WrappedKey) -> Result<PutOutcome, StoreError> {
        let mut conn = self.conn.lock().await;
        let tx = conn.transaction().map_err(op_err("failed to begin transaction"))?;

        let existing: Option<i64> = tx
            .query_row(
                "SELECT 1 FROM wrapped_keys WHERE resource_id = ?1 AND recipient = ?2 AND key_version = ?3",
                params![
                    wrapped.resource_id,
                    wrapped.recipient_public_id.to_hex(),
                    wrapped.key_version
                ],
                |row| row.get(0),
            )
            .optional()
            .map_err(op_err("failed to read wrapped key"))?;

        let outcome = match existing {
            None => PutOutcome::Inserted,
            Some(_) => PutOutcome::Replaced,
        };

        tx.execute(
            "INSERT INTO wrapped_keys (resource_id, recipient, ciphertext, wrapper_version, key_version, wrapped_by, wrapped_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
             ON CONFLICT(resource_id, recipient, key_version) DO UPDATE SET
                ciphertext = excluded.ciphertext,
                wrapper_version = excluded.wrapper_version,
                wrapped_by = excluded.wrapped_by,
                wrapped_at = excluded.wrapped_at",
            params![
                wrapped.resource_id,
                wrapped.recipient_public_id.to_hex(),
                wrapped.ciphertext,
                wrapped.wrapper_version,
                wrapped.key_version,
                wrapped.wrapped_by_public_id.to_hex(),
                wrapped.wrapped_at as i64,
            ],
        )
        .map_err(op_err("failed to store wrapped key"))?;
        tx.commit().map_err(op_err("failed to commit wrapped key"))?;

        Ok(outcome)
    }

    async fn load_wrapped_key(
        &self,
        resource_id: &str,
        recipient: &PublicId,
    ) -> Result<Option<WrappedKey>, StoreError> {
        let conn = self.conn.lock().await;
        let parts = conn
            .query_row(
                &format!(
                    "SELECT {WRAPPED_COLUMNS} FROM wrapped_keys WHERE resource_id = ?1 AND recipient = ?2
                     ORDER BY key_version DESC LIMIT 1"
                ),
                params![resource_id, recipient.to_hex()],
                Self::wrapped_from_row,
            )
            .optional()
            .map_err(op_err("failed to load wrapped key"))?;
        parts.map(Self::wrapped_from_parts).transpose()
    }

    async fn load_wrapped_key_version(
        &self,
        resource_id: &str,
        recipient: &PublicId,
        key_version: u32,
    ) -> Result<Option<WrappedKey>, StoreError> {
        let conn = self.conn.lock().await;
        let parts = conn
            .query_row(
                &format!(
                    "SELECT {WRAPPED_COLUMNS} FROM wrapped_keys
                     WHERE resource_id = ?1 AND recipient = ?2 AND key_version = ?3"
                ),
                params![resource_id, recipient.to_hex(), key_version],
                Self::wrapped_from_row,
            )
            .optional()
            .map_err(op_err("failed to load wrapped key"))?;
        parts.map(Self::wrapped_from_parts).transpose()
    }

    async fn wrapped_key_versions(&self, resource_id: &str, recipient: &PublicId) -> Result<Vec<u32>, StoreError> {
        let conn = self.conn.lock().await;
        let mut stmt = conn
            .prepare(
                "SELECT key_version FROM wrapped_keys WHERE resource_id = ?1 AND recipient = ?2
                 ORDER BY key_version",
            )
            .map_err(op_err("failed to prepare key version query"))?;
        let rows = stmt
            .query_map(params![resource_id, recipient.to_hex()], |row| row.get::<_, u32>(0))
            .map_err(op_err("failed to list key versions"))?;
        rows.collect::<rusqlite::Result<Vec<u32>>>()
            .map_err(op_err("failed to read key version row"))
    }

    async fn list_wrapped_keys(&self, resource_id: &str) -> Result<Vec<WrappedKey>, StoreError> {
        let conn = self.conn.lock().await;
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {WRAPPED_COLUMNS} FROM wrapped_keys AS w
                 WHERE resource_id = ?1 AND key_version = (
                     SELECT MAX(key_version) FROM wrapped_keys
                     WHERE resource_id = w.resource_id AND recipient = w.recipient
                 )
                 ORDER BY recipient"
            ))
            .map_err(op_err("failed to prepare wrapped key query"))?;
        let rows = stmt
            .query_map(params![resource_id], Self::wrapped_from_row)
            .map_err(op_err("failed to list wrapped keys"))?;

        let mut out = Vec::new();
        for row in rows {
            out.push(Self::wrapped_from_parts(
                row.map_err(op_err("failed to read wrapped key row"))?,
            )?);
        }
        Ok(out)
    }

    async fn insert_key_request(&self, request: &KeyRequest) -> Result<InsertOutcome, StoreError> {
        let mut conn = self.conn.lock().await;
        let tx = conn.transaction().map_err(op_err("failed to begin transaction"))?;

        let existing = tx
            .query_row(
                &format!(
                    "SELECT {REQUEST_COLUMNS} FROM key_requests
                     WHERE resource_id = ?1 AND requester = ?2 AND status = 'pending'"
                ),
                params![request.resource_id, request.requester_public_id.to_hex()],
                Self::request_from_row,
            )
            .optional()
            .map_err(op_err("failed to check pending requests"))?;
        if let Some(parts) = existing {
            return Ok(InsertOutcome::Existing(Self::request_from_parts(parts)?));
        }

        tx.execute(
            "INSERT INTO key_requests (id, resource_id, requester, requester_display_name, status, created_at, fulfilled_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                request.id,
                request.resource_id,
                request.requester_public_id.to_hex(),
                request.requester_display_name,
                request.status.as_str(),
                request.created_at as i64,
                request.fulfilled_at.map(|t| t as i64),
            ],
        )
        .map_err(|e| match e {
            rusqlite::Error::SqliteFailure(err, _)
                if err.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                StoreError::AlreadyExists(request.id.clone())
            }
            other => StoreError::OperationFailed(format!("failed to insert key request: {other}")),
        })?;
        tx.commit().map_err(op_err("failed to commit key request"))?;

        Ok(InsertOutcome::Inserted)
    }

    async fn load_key_request(&self, id: &str) -> Result<Option<KeyRequest>, StoreError> {
        let conn = self.conn.lock().await;
        let parts = conn
            .query_row(
                &format!("SELECT {REQUEST_COLUMNS} FROM key_requests WHERE id = ?1"),
                params![id],
                Self::request_from_row,
            )
            .optional()
            .map_err(op_err("failed to load key request"))?;
        parts.map(Self::request_from_parts).transpose()
    }

    async fn list_pending_requests(&self, resource_id: Option<&str>) -> Result<Vec<KeyRequest>, StoreError> {
        let conn = self.conn.lock().await;
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {REQUEST_COLUMNS} FROM key_requests
                 WHERE status = 'pending' AND (?1 IS NULL OR resource_id = ?1)
                 ORDER BY created_at, id"
            ))
            .map_err(op_err("failed to prepare pending query"))?;
        let rows = stmt
            .query_map(params![resource_id], Self::request_from_row)
            .map_err(op_err("failed to list pending requests"))?;

        let mut out = Vec::new();
        for row in rows {
            out.push(Self::request_from_parts(
                row.map_err(op_err("failed to read key request row"))?,
            )?);
        }
        Ok(out)
    }

    async fn mark_request_fulfilled(&self, id: &str, at: u64) -> Result<bool, StoreError> {
        let conn = self.conn.lock().await;
        let changed = conn
            .execute(
                "UPDATE key_requests SET status = 'fulfilled', fulfilled_at = ?2
                 WHERE id = ?1 AND status = 'pending'",
                params![id, at as i64],
            )
            .map_err(op_err("failed to fulfill key request"))?;
        if changed == 1 {
            return Ok(true);
        }

        let exists: Option<i64> = conn
            .query_row("SELECT 1 FROM key_requests WHERE id = ?1", params![id], |row| row.get(0))
            .optional()
            .map_err(op_err("failed to load key request"))?;
        match exists {
            Some(_) => Ok(false),
            None => Err(StoreError::NotFound(format!("key request {id}"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pid(b: u8) -> PublicId {
        PublicId::from_bytes([b; 32])
    }

    fn wrap(recipient: u8, version: u32) -> WrappedKey {
        WrappedKey {
            resource_id: "general".into(),
            recipient_public_id: pid(recipient),
            ciphertext: format!("ct-{version}"),
            wrapper_version: 1,
            key_version: version,
            wrapped_by_public_id: pid(1),
            wrapped_at: 100,
        }
    }

    #[tokio::test]
    async fn test_wrapped_keys_kept_per_version() {
        let store = SqliteKeyStore::new_in_memory().unwrap();
        assert_eq!(store.put_wrapped_key(&wrap(2, 1)).await.unwrap(), PutOutcome::Inserted);
        assert_eq!(store.put_wrapped_key(&wrap(2, 2)).await.unwrap(), PutOutcome::Inserted);
        assert_eq!(store.put_wrapped_key(&wrap(2, 1)).await.unwrap(), PutOutcome::Replaced);
        store.put_wrapped_key(&wrap(3, 1)).await.unwrap();

        let loaded = store.load_wrapped_key("general", &pid(2)).await.unwrap().unwrap();
        assert_eq!(loaded, wrap(2, 2));
        assert_eq!(
            store.load_wrapped_key_version("general", &pid(2), 1).await.unwrap(),
            Some(wrap(2, 1))
        );
        assert!(store.load_wrapped_key_version("general", &pid(3), 2).await.unwrap().is_none());
        assert_eq!(store.wrapped_key_versions("general", &pid(2)).await.unwrap(), vec![1, 2]);

        let listed = store.list_wrapped_keys("general").await.unwrap();
        assert_eq!(listed, vec![wrap(2, 2), wrap(3, 1)]);
    }

    #[tokio::test]
    async fn test_v1_database_is_migrated() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hush.db");
        {
            let conn = Connection::open(&path).unwrap();
            conn.execute_batch("CREATE TABLE schema_version (version INTEGER PRIMARY KEY);")
                .unwrap();
            SqliteKeyStore::migrate_v1(&conn).unwrap();
            conn.execute(
                "INSERT INTO wrapped_keys VALUES ('general', ?1, 'ct-1', 1, 1, ?2, 100)",
                params![pid(2).to_hex(), pid(1).to_hex()],
            )
            .unwrap();
        }

        let store = SqliteKeyStore::new(&path).unwrap();
        assert_eq!(store.load_wrapped_key("general", &pid(2)).await.unwrap(), Some(wrap(2, 1)));
        store.put_wrapped_key(&wrap(2, 2)).await.unwrap();
        assert_eq!(store.wrapped_key_versions("general", &pid(2)).await.unwrap(), vec![1, 2]);
    }

    #[tokio::test]
    async fn test_membership_and_versions() {
        let store = SqliteKeyStore::new_in_memory().unwrap();
        let carol = Principal::new(pid(3)).with_display_name("carol");
        assert!(store.authorize("general", &carol).await.unwrap());
        assert!(!store.authorize("general", &carol).await.unwrap());
        assert_eq!(store.authorized_principals("general").await.unwrap(), vec![carol]);

        assert!(store.advance_key_version("general", None, 1).await.unwrap());
        assert!(!store.advance_key_version("general", None, 1).await.unwrap());
        assert!(store.advance_key_version("general", Some(1), 2).await.unwrap());
        assert!(!store.advance_key_version("general", Some(1), 3).await.unwrap());
        assert_eq!(store.current_key_version("general").await.unwrap(), Some(2));

        assert!(store.revoke("general", &pid(3)).await.unwrap());
        assert!(!store.is_authorized("general", &pid(3)).await.unwrap());
    }

    #[tokio::test]
    async fn test_key_request_lifecycle() {
        let store = SqliteKeyStore::new_in_memory().unwrap();
        let req = KeyRequest::new_pending("general", pid(3), Some("carol".into()), 10);
        let dup = KeyRequest::new_pending("general", pid(3), None, 11);

        assert_eq!(store.insert_key_request(&req).await.unwrap(), InsertOutcome::Inserted);
        assert_eq!(
            store.insert_key_request(&dup).await.unwrap(),
            InsertOutcome::Existing(req.clone())
        );
        assert_eq!(store.list_pending_requests(Some("general")).await.unwrap(), vec![req.clone()]);
        assert!(store.list_pending_requests(Some("random")).await.unwrap().is_empty());

        assert!(store.mark_request_fulfilled(&req.id, 20).await.unwrap());
        assert!(!store.mark_request_fulfilled(&req.id, 21).await.unwrap());
        let loaded = store.load_key_request(&req.id).await.unwrap().unwrap();
        assert_eq!(loaded.status, KeyRequestStatus::Fulfilled);
        assert_eq!(loaded.fulfilled_at, Some(20));

        assert!(matches!(
            store.mark_request_fulfilled("missing", 1).await,
            Err(StoreError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_reopen_preserves_data() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hush.db");
        {
            let store = SqliteKeyStore::new(&path).unwrap();
            store.put_wrapped_key(&wrap(2, 1)).await.unwrap();
        }
        let store = SqliteKeyStore::new(&path).unwrap();
        assert!(store.load_wrapped_key("general", &pid(2)).await.unwrap().is_some());
    }
}
