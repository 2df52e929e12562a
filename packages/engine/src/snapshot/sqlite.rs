//! SQLite-backed snapshot store.
//!
//! Uses `rusqlite` (with bundled SQLite) behind an `Arc<Mutex<Connection>>`.
//! All blocking calls run inside `tokio::task::spawn_blocking`.
//!
//! # Schema
//!
//! - `snapshots`: one blob per key, with the unix time it was saved.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use rusqlite::{params, Connection};

use super::SnapshotStore;
use crate::error::StoreError;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS snapshots (
    key       TEXT PRIMARY KEY,
    blob      BLOB NOT NULL,
    saved_at  INTEGER NOT NULL
);
";

pub struct SqliteSnapshotStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteSnapshotStore {
    /// Open (or create) the database at `path` and apply the schema.
    pub fn open(path: &str) -> Result<Self, rusqlite::Error> {
        let conn = Connection::open(path)?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Open an in-memory database (data is lost when dropped).
    pub fn open_in_memory() -> Result<Self, rusqlite::Error> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }
}

fn map_err(e: rusqlite::Error) -> StoreError {
    StoreError::Internal(e.to_string())
}

fn join_err(e: tokio::task::JoinError) -> StoreError {
    StoreError::Internal(format!("task join error: {e}"))
}

#[async_trait]
impl SnapshotStore for SqliteSnapshotStore {
    async fn load(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        let conn = Arc::clone(&self.conn);
        let key = key.to_string();

        tokio::task::spawn_blocking(move || {
            let conn = conn.lock().unwrap_or_else(|p| p.into_inner());
            let result = conn.query_row(
                "SELECT blob FROM snapshots WHERE key = ?1",
                params![key],
                |row| row.get::<_, Vec<u8>>(0),
            );
            match result {
                Ok(blob) => Ok(Some(blob)),
                Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
                Err(e) => Err(map_err(e)),
            }
        })
        .await
        .map_err(join_err)?
    }

    async fn save(&self, key: &str, blob: &[u8]) -> Result<(), StoreError> {
        let conn = Arc::clone(&self.conn);
        let key = key.to_string();
        let blob = blob.to_vec();
        let saved_at = chrono::Utc::now().timestamp();

        tokio::task::spawn_blocking(move || {
            let conn = conn.lock().unwrap_or_else(|p| p.into_inner());
            conn.execute(
                "INSERT INTO snapshots (key, blob, saved_at) VALUES (?1, ?2, ?3)
                 ON CONFLICT(key) DO UPDATE SET blob = excluded.blob, saved_at = excluded.saved_at",
                params![key, blob, saved_at],
            )
            .map_err(map_err)?;
            Ok(())
        })
        .await
        .map_err(join_err)?
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn blob_roundtrip_and_overwrite() {
        let s = SqliteSnapshotStore::open_in_memory().unwrap();
        assert!(s.load("engine").await.unwrap().is_none());

        s.save("engine", b"{\"version\":1}").await.unwrap();
        s.save("engine", b"{\"version\":2}").await.unwrap();
        assert_eq!(
            s.load("engine").await.unwrap().unwrap(),
            b"{\"version\":2}".to_vec()
        );
        assert!(s.load("other").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn file_database_survives_reopen() {
        let path = std::env::temp_dir().join(format!("trustmesh-{}.db", uuid::Uuid::now_v7()));
        let path = path.to_string_lossy().to_string();
        {
            let s = SqliteSnapshotStore::open(&path).unwrap();
            s.save("engine", b"blob").await.unwrap();
        }
        let s = SqliteSnapshotStore::open(&path).unwrap();
        assert_eq!(s.load("engine").await.unwrap().unwrap(), b"blob".to_vec());
        let _ = std::fs::remove_file(&path);
    }
}
