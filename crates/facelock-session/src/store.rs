//! Persistent identity storage.
//!
//! Two backends implement [`IdentityStore`]: an in-process map for tests and
//! ephemeral sessions, and SQLite via `tokio-rusqlite` for durable storage.
//! Descriptors are stored exactly as sealed by the cipher.

use crate::crypto::EncryptedDescriptor;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use thiserror::Error;
use tokio::sync::RwLock;
use tokio_rusqlite::Connection;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] tokio_rusqlite::Error),
    #[error("serialisation error: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("corrupt record {id}: {reason}")]
    Corrupt { id: String, reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentityMetadata {
    pub id: String,
    pub display_name: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub sample_count: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentityRecord {
    pub metadata: IdentityMetadata,
    pub descriptors: Vec<EncryptedDescriptor>,
}

/// Keyed by identity id. Concurrent access is the backend's responsibility.
#[async_trait]
pub trait IdentityStore: Send + Sync {
    async fn list(&self) -> Result<Vec<IdentityRecord>, StoreError>;
    async fn get(&self, id: &str) -> Result<Option<IdentityRecord>, StoreError>;
    /// Insert or replace. An existing record keeps its `created_at`.
    async fn add(&self, record: IdentityRecord) -> Result<(), StoreError>;
    /// Returns whether a record was removed.
    async fn delete(&self, id: &str) -> Result<bool, StoreError>;
    async fn exists(&self, id: &str) -> Result<bool, StoreError>;
}

#[derive(Debug, Default)]
pub struct MemoryIdentityStore {
    records: RwLock<BTreeMap<String, IdentityRecord>>,
}

impl MemoryIdentityStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl IdentityStore for MemoryIdentityStore {
    async fn list(&self) -> Result<Vec<IdentityRecord>, StoreError> {
        Ok(self.records.read().await.values().cloned().collect())
    }

    async fn get(&self, id: &str) -> Result<Option<IdentityRecord>, StoreError> {
        Ok(self.records.read().await.get(id).cloned())
    }

    async fn add(&self, mut record: IdentityRecord) -> Result<(), StoreError> {
        let mut records = self.records.write().await;
        if let Some(existing) = records.get(&record.metadata.id) {
            record.metadata.created_at = existing.metadata.created_at;
        }
        records.insert(record.metadata.id.clone(), record);
        Ok(())
    }

    async fn delete(&self, id: &str) -> Result<bool, StoreError> {
        Ok(self.records.write().await.remove(id).is_some())
    }

    async fn exists(&self, id: &str) -> Result<bool, StoreError> {
        Ok(self.records.read().await.contains_key(id))
    }
}

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS identities (
    id           TEXT PRIMARY KEY,
    display_name TEXT NOT NULL,
    created_at   TEXT NOT NULL,
    updated_at   TEXT NOT NULL,
    sample_count INTEGER NOT NULL,
    descriptors  TEXT NOT NULL
);
";

type RawRecord = (String, String, String, String, i64, String);

/// SQLite-backed store. All access goes through the connection's worker thread.
#[derive(Clone)]
pub struct SqliteIdentityStore {
    conn: Connection,
}

impl SqliteIdentityStore {
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();
        let conn = Connection::open(&path).await?;
        tracing::info!(path = %path.display(), "identity store opened");
        Self::init(conn).await
    }

    pub async fn open_in_memory() -> Result<Self, StoreError> {
        Self::init(Connection::open_in_memory().await?).await
    }

    async fn init(conn: Connection) -> Result<Self, StoreError> {
        conn.call(|conn| {
            conn.execute_batch(SCHEMA)?;
            Ok(())
        })
        .await?;
        Ok(Self { conn })
    }

    fn decode(row: RawRecord) -> Result<IdentityRecord, StoreError> {
        let (id, display_name, created_at, updated_at, sample_count, descriptors) = row;
        let corrupt = |reason: String| StoreError::Corrupt {
            id: id.clone(),
            reason,
        };
        let parse_time = |s: &str| {
            DateTime::parse_from_rfc3339(s)
                .map(|t| t.with_timezone(&Utc))
                .map_err(|e| corrupt(format!("timestamp: {e}")))
        };
        let created_at = parse_time(&created_at)?;
        let updated_at = parse_time(&updated_at)?;
        let descriptors: Vec<EncryptedDescriptor> =
            serde_json::from_str(&descriptors).map_err(|e| corrupt(format!("descriptors: {e}")))?;
        let sample_count =
            usize::try_from(sample_count).map_err(|e| corrupt(format!("sample_count: {e}")))?;
        Ok(IdentityRecord {
            metadata: IdentityMetadata {
                id,
                display_name,
                created_at,
                updated_at,
                sample_count,
            },
            descriptors,
        })
    }
}

const SELECT_COLUMNS: &str =
    "SELECT id, display_name, created_at, updated_at, sample_count, descriptors FROM identities";

fn read_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<RawRecord> {
    Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?, row.get(5)?))
}

#[async_trait]
impl IdentityStore for SqliteIdentityStore {
    async fn list(&self) -> Result<Vec<IdentityRecord>, StoreError> {
        let rows = self
            .conn
            .call(|conn| {
                let mut stmt = conn.prepare(&format!("{SELECT_COLUMNS} ORDER BY created_at, id"))?;
                let rows = stmt.query_map([], read_row)?.collect::<Result<Vec<_>, _>>()?;
                Ok(rows)
            })
            .await?;
        rows.into_iter().map(Self::decode).collect()
    }

    async fn get(&self, id: &str) -> Result<Option<IdentityRecord>, StoreError> {
        let id = id.to_string();
        let row = self
            .conn
            .call(move |conn| {
                let mut stmt = conn.prepare(&format!("{SELECT_COLUMNS} WHERE id = ?1"))?;
                let mut rows = stmt.query_map([id], read_row)?;
                let row = rows.next().transpose()?;
                Ok(row)
            })
            .await?;
        row.map(Self::decode).transpose()
    }

    async fn add(&self, record: IdentityRecord) -> Result<(), StoreError> {
        let descriptors = serde_json::to_string(&record.descriptors)?;
        let m = record.metadata;
        let sample_count = m.sample_count as i64;
        self.conn
            .call(move |conn| {
                conn.execute(
                    "INSERT INTO identities
                        (id, display_name, created_at, updated_at, sample_count, descriptors)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                     ON CONFLICT(id) DO UPDATE SET
                        display_name = excluded.display_name,
                        updated_at   = excluded.updated_at,
                        sample_count = excluded.sample_count,
                        descriptors  = excluded.descriptors",
                    rusqlite::params![
                        m.id,
                        m.display_name,
                        m.created_at.to_rfc3339(),
                        m.updated_at.to_rfc3339(),
                        sample_count,
                        descriptors
                    ],
                )?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    async fn delete(&self, id: &str) -> Result<bool, StoreError> {
        let id = id.to_string();
        let removed = self
            .conn
            .call(move |conn| Ok(conn.execute("DELETE FROM identities WHERE id = ?1", [id])?))
            .await?;
        Ok(removed > 0)
    }

    async fn exists(&self, id: &str) -> Result<bool, StoreError> {
        let id = id.to_string();
        let count: i64 = self
            .conn
            .call(move |conn| {
                let sql = "SELECT COUNT(*) FROM identities WHERE id = ?1";
                Ok(conn.query_row(sql, [id], |row| row.get(0))?)
            })
            .await?;
        Ok(count > 0)
    }
}
