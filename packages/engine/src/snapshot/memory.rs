//! In-memory snapshot store. Contents are lost when the process exits.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;

use super::SnapshotStore;
use crate::error::StoreError;

#[derive(Default)]
pub struct MemorySnapshotStore {
    blobs: RwLock<HashMap<String, Vec<u8>>>,
}

impl MemorySnapshotStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SnapshotStore for MemorySnapshotStore {
    async fn load(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        Ok(self
            .blobs
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .get(key)
            .cloned())
    }

    async fn save(&self, key: &str, blob: &[u8]) -> Result<(), StoreError> {
        self.blobs
            .write()
            .unwrap_or_else(|p| p.into_inner())
            .insert(key.to_string(), blob.to_vec());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn save_replaces_previous_blob() {
        let s = MemorySnapshotStore::new();
        assert_eq!(s.load("engine").await.unwrap(), None);
        s.save("engine", b"one").await.unwrap();
        s.save("engine", b"two").await.unwrap();
        assert_eq!(s.load("engine").await.unwrap().as_deref(), Some(&b"two"[..]));
    }
}
