//! Persistence for engine snapshots.
//!
//! The engine serializes its state into one opaque blob
//! ([`Engine::serialize`](crate::Engine::serialize)); a [`SnapshotStore`]
//! only has to keep blobs by key.
//!
//! # Implementations
//!
//! | Type | When to use |
//! |------|-------------|
//! | [`MemorySnapshotStore`] | Tests, ephemeral engines |
//! | [`SqliteSnapshotStore`] | Durable single-file database |
//!
//! [`MemorySnapshotStore`]: memory::MemorySnapshotStore
//! [`SqliteSnapshotStore`]: sqlite::SqliteSnapshotStore

pub mod memory;
pub mod sqlite;

use async_trait::async_trait;

use crate::error::StoreError;

#[async_trait]
pub trait SnapshotStore: Send + Sync {
    /// The blob saved under `key`, if any.
    async fn load(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError>;

    /// Save `blob` under `key`, replacing what was there.
    async fn save(&self, key: &str, blob: &[u8]) -> Result<(), StoreError>;
}
