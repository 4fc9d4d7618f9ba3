//! SQLite-backed structured store (T3).
//!
//! Holds one document row per account plus a small key-value table used
//! for the offline queue and the device identity. Works fully offline.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, ErrorCode};
use std::path::Path;
use std::sync::{Arc, Mutex};
use tracing::{debug, info};

use prefsync_common::{AccountId, Error, PreferenceDocument, Result, TierId};

use crate::tier::{decode_document, encode_document, KeyValueStore, StorageTier};

const SCHEMA: &str = r#"
    CREATE TABLE IF NOT EXISTS documents (
        account TEXT PRIMARY KEY,
        body TEXT NOT NULL,
        version INTEGER NOT NULL,
        updated_at INTEGER NOT NULL
    );

    CREATE TABLE IF NOT EXISTS kv (
        key TEXT PRIMARY KEY,
        value TEXT NOT NULL
    );
"#;

/// Structured store shared by every tab of one browser profile.
///
/// Cheap to clone; clones share the connection.
#[derive(Clone)]
pub struct StructuredStore {
    conn: Arc<Mutex<Connection>>,
}

impl StructuredStore {
    /// Create or open a structured store database.
    ///
    /// # Errors
    /// - Database creation or migration failure
    pub fn open(db_path: impl AsRef<Path>) -> Result<Self> {
        let db_path = db_path.as_ref();
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(db_path).map_err(map_sqlite)?;
        conn.execute_batch(SCHEMA).map_err(map_sqlite)?;

        info!(path = %db_path.display(), "Structured store opened");
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Create an in-memory store (for testing).
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(map_sqlite)?;
        conn.execute_batch(SCHEMA).map_err(map_sqlite)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// T3 view of this store for one account.
    pub fn tier(&self, account: &AccountId) -> OfflineTier {
        OfflineTier {
            store: self.clone(),
            account: account.clone(),
        }
    }

    /// Run a closure against the connection on the blocking pool.
    async fn with_conn<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> rusqlite::Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let guard = conn
                .lock()
                .map_err(|_| Error::Storage("structured store lock poisoned".to_string()))?;
            f(&guard).map_err(map_sqlite)
        })
        .await
        .map_err(|e| Error::Storage(format!("structured store task failed: {}", e)))?
    }

    /// Raw document body for an account.
    pub async fn document_body(&self, account: &AccountId) -> Result<Option<String>> {
        let account = account.as_str().to_string();
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare("SELECT body FROM documents WHERE account = ?1")?;
            match stmt.query_row([account], |row| row.get(0)) {
                Ok(body) => Ok(Some(body)),
                Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
                Err(e) => Err(e),
            }
        })
        .await
    }

    /// Insert or replace the document row for an account.
    pub async fn put_document(&self, account: &AccountId, doc: &PreferenceDocument) -> Result<()> {
        let body = encode_document(doc)?;
        self.put_document_row(account, body, doc.version, doc.updated_at)
            .await
    }

    async fn put_document_row(
        &self,
        account: &AccountId,
        body: String,
        version: u64,
        updated_at: DateTime<Utc>,
    ) -> Result<()> {
        let account = account.as_str().to_string();
        let version = i64::try_from(version)
            .map_err(|_| Error::InvalidInput(format!("version {} out of range", version)))?;
        let updated_at = updated_at.timestamp_millis();

        debug!(account = %account, version, "Upserting document row");
        self.with_conn(move |conn| {
            conn.execute(
                r#"
                INSERT OR REPLACE INTO documents (account, body, version, updated_at)
                VALUES (?1, ?2, ?3, ?4)
                "#,
                params![account, body, version, updated_at],
            )?;
            Ok(())
        })
        .await
    }

    /// Delete the document row for an account.
    pub async fn delete_document(&self, account: &AccountId) -> Result<()> {
        let account = account.as_str().to_string();
        self.with_conn(move |conn| {
            conn.execute("DELETE FROM documents WHERE account = ?1", params![account])?;
            Ok(())
        })
        .await
    }

    /// `updatedAt` of the stored document, without decoding the body.
    pub async fn updated_at(&self, account: &AccountId) -> Result<Option<DateTime<Utc>>> {
        let account = account.as_str().to_string();
        let millis = self
            .with_conn(move |conn| {
                let mut stmt =
                    conn.prepare("SELECT updated_at FROM documents WHERE account = ?1")?;
                match stmt.query_row([account], |row| row.get::<_, i64>(0)) {
                    Ok(v) => Ok(Some(v)),
                    Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
                    Err(e) => Err(e),
                }
            })
            .await?;

        match millis {
            Some(ms) => DateTime::from_timestamp_millis(ms)
                .map(Some)
                .ok_or_else(|| Error::Parse(format!("invalid updated_at column: {}", ms))),
            None => Ok(None),
        }
    }

    /// `version` of the stored document, without decoding the body.
    pub async fn version(&self, account: &AccountId) -> Result<Option<u64>> {
        let account = account.as_str().to_string();
        let version = self
            .with_conn(move |conn| {
                let mut stmt = conn.prepare("SELECT version FROM documents WHERE account = ?1")?;
                match stmt.query_row([account], |row| row.get::<_, i64>(0)) {
                    Ok(v) => Ok(Some(v)),
                    Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
                    Err(e) => Err(e),
                }
            })
            .await?;

        Ok(version.map(|v| v.max(0) as u64))
    }
}

#[async_trait]
impl KeyValueStore for StructuredStore {
    fn name(&self) -> &str {
        "sqlite"
    }

    async fn get_raw(&self, key: &str) -> Result<Option<String>> {
        let key = key.to_string();
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare("SELECT value FROM kv WHERE key = ?1")?;
            match stmt.query_row([key], |row| row.get(0)) {
                Ok(v) => Ok(Some(v)),
                Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
                Err(e) => Err(e),
            }
        })
        .await
    }

    async fn put_raw(&self, key: &str, value: &str) -> Result<()> {
        let key = key.to_string();
        let value = value.to_string();
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT OR REPLACE INTO kv (key, value) VALUES (?1, ?2)",
                params![key, value],
            )?;
            Ok(())
        })
        .await
    }

    async fn remove_raw(&self, key: &str) -> Result<()> {
        let key = key.to_string();
        self.with_conn(move |conn| {
            conn.execute("DELETE FROM kv WHERE key = ?1", params![key])?;
            Ok(())
        })
        .await
    }
}

/// T3: one account's document row in a [`StructuredStore`].
pub struct OfflineTier {
    store: StructuredStore,
    account: AccountId,
}

impl OfflineTier {
    pub fn store(&self) -> &StructuredStore {
        &self.store
    }
}

#[async_trait]
impl StorageTier for OfflineTier {
    fn tier(&self) -> TierId {
        TierId::OfflineStore
    }

    async fn read(&self) -> Result<Option<PreferenceDocument>> {
        match self.store.document_body(&self.account).await? {
            Some(body) => decode_document(&body).map(Some),
            None => Ok(None),
        }
    }

    async fn write(&self, doc: &PreferenceDocument) -> Result<PreferenceDocument> {
        self.store.put_document(&self.account, doc).await?;
        Ok(doc.clone())
    }

    async fn clear(&self) -> Result<()> {
        self.store.delete_document(&self.account).await
    }
}

fn map_sqlite(err: rusqlite::Error) -> Error {
    match &err {
        rusqlite::Error::SqliteFailure(e, _) if e.code == ErrorCode::DiskFull => {
            Error::QuotaExceeded(err.to_string())
        }
        _ => Error::Storage(err.to_string()),
    }
}
