//! Durable store for room snapshots and binary files.
//!
//! Layout:
//! ```text
//! scenes  room_id              → StoredScene { scene_version, encrypted snapshot }
//! files   files/rooms/<id>/f   → encrypted file body
//! ```
//!
//! Everything a store holds is already encrypted with the room key; a store
//! can read sizes and versions, never content.

mod memory;
mod rocks;

pub use memory::MemoryStore;
pub use rocks::{RocksSceneStore, StoreConfig};

use std::future::Future;
use std::pin::Pin;

use serde::{Deserialize, Serialize};

use crate::crypto::EncryptedPayload;
use crate::element::FileId;

/// Boxed future for store operations.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Latest snapshot of one room.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredScene {
    pub scene_version: u64,
    pub payload: EncryptedPayload,
}

/// Result of a batched file fetch. Every requested id lands in exactly one list.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct FileBatch {
    pub loaded: Vec<(FileId, EncryptedPayload)>,
    pub errored: Vec<FileId>,
}

/// Result of a batched file upload.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SaveOutcome {
    pub saved: Vec<FileId>,
    pub errored: Vec<FileId>,
}

/// Backend for durable room state.
pub trait SceneStore: Send + Sync {
    /// Latest snapshot of a room, `None` if nothing was ever saved.
    fn load_scene(&self, room_id: &str) -> BoxFuture<'_, Result<Option<StoredScene>, StoreError>>;

    /// Replace the snapshot of a room.
    fn save_scene(&self, room_id: &str, scene: StoredScene) -> BoxFuture<'_, Result<(), StoreError>>;

    /// Fetch files under `prefix`. Missing or unreadable ids are reported as errored.
    fn load_files(&self, prefix: &str, ids: &[FileId]) -> BoxFuture<'_, FileBatch>;

    /// Store files under `prefix`, each independently.
    fn save_files(
        &self,
        prefix: &str,
        files: Vec<(FileId, EncryptedPayload)>,
    ) -> BoxFuture<'_, SaveOutcome>;
}

/// Full key of a file inside the store.
pub fn file_key(prefix: &str, id: &str) -> String {
    format!("{}/{id}", prefix.trim_end_matches('/'))
}

/// Storage errors.
#[derive(Debug, Clone)]
pub enum StoreError {
    /// Backend internal error
    DatabaseError(String),
    /// Key not found
    NotFound(String),
    /// Serialization failed
    SerializationError(String),
    /// Deserialization failed
    DeserializationError(String),
    /// Compression error
    CompressionError(String),
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreError::DatabaseError(e) => write!(f, "Database error: {e}"),
            StoreError::NotFound(key) => write!(f, "Not found: {key}"),
            StoreError::SerializationError(e) => write!(f, "Serialization error: {e}"),
            StoreError::DeserializationError(e) => write!(f, "Deserialization error: {e}"),
            StoreError::CompressionError(e) => write!(f, "Compression error: {e}"),
        }
    }
}

impl std::error::Error for StoreError {}

impl From<rocksdb::Error> for StoreError {
    fn from(e: rocksdb::Error) -> Self {
        StoreError::DatabaseError(e.to_string())
    }
}
