//! Opaque key-value storage contract (spec §6). The Python source's
//! `StorageProvider` exposes separate room/operation/presence tables; this
//! crate follows `spec.md`'s narrower contract instead (see DESIGN.md's
//! Open Question decision) — a single `save`/`load` pair per room key, with
//! the combined `{state, operations}` blob as the value shape.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::crdt::Operation;
use crate::errors::StorageError;

/// The persisted shape for a room (spec §6: "Rooms are persisted under
/// `room:<id>`").
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct RoomSnapshot {
    pub state: serde_json::Value,
    pub operations: Vec<Operation>,
}

#[async_trait]
pub trait StorageBackend: Send + Sync {
    async fn connect(&self) -> Result<(), StorageError>;
    async fn disconnect(&self) -> Result<(), StorageError>;
    async fn save(&self, key: &str, value: serde_json::Value) -> Result<bool, StorageError>;
    async fn load(&self, key: &str) -> Result<Option<serde_json::Value>, StorageError>;
    async fn delete(&self, key: &str) -> Result<bool, StorageError>;
    async fn exists(&self, key: &str) -> Result<bool, StorageError>;
    async fn list_keys(&self, prefix: &str) -> Result<Vec<String>, StorageError>;
}

/// In-process storage, useful for tests and single-process deployments
/// without a durable backend. Mirrors the source's `MemoryStorage`.
#[derive(Default)]
pub struct MemoryStorageBackend {
    entries: Mutex<HashMap<String, serde_json::Value>>,
}

impl MemoryStorageBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl StorageBackend for MemoryStorageBackend {
    async fn connect(&self) -> Result<(), StorageError> {
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), StorageError> {
        Ok(())
    }

    async fn save(&self, key: &str, value: serde_json::Value) -> Result<bool, StorageError> {
        self.entries.lock().await.insert(key.to_string(), value);
        Ok(true)
    }

    async fn load(&self, key: &str) -> Result<Option<serde_json::Value>, StorageError> {
        Ok(self.entries.lock().await.get(key).cloned())
    }

    async fn delete(&self, key: &str) -> Result<bool, StorageError> {
        Ok(self.entries.lock().await.remove(key).is_some())
    }

    async fn exists(&self, key: &str) -> Result<bool, StorageError> {
        Ok(self.entries.lock().await.contains_key(key))
    }

    async fn list_keys(&self, prefix: &str) -> Result<Vec<String>, StorageError> {
        Ok(self.entries.lock().await.keys().filter(|k| k.starts_with(prefix)).cloned().collect())
    }
}

pub fn room_key(room_id: &str) -> String {
    format!("room:{room_id}")
}
