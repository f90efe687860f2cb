//! In-memory store for tests and ephemeral rooms.

use std::collections::HashMap;
use std::sync::RwLock;

use super::{file_key, BoxFuture, FileBatch, SaveOutcome, SceneStore, StoreError, StoredScene};
use crate::crypto::EncryptedPayload;
use crate::element::FileId;

#[derive(Default)]
pub struct MemoryStore {
    scenes: RwLock<HashMap<String, StoredScene>>,
    files: RwLock<HashMap<String, EncryptedPayload>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored files across all rooms.
    pub fn file_count(&self) -> usize {
        self.files.read().map(|f| f.len()).unwrap_or(0)
    }

    /// Whether a file exists under `prefix`.
    pub fn has_file(&self, prefix: &str, id: &str) -> bool {
        self.files
            .read()
            .map(|f| f.contains_key(&file_key(prefix, id)))
            .unwrap_or(false)
    }
}

fn lock_error(e: impl std::fmt::Display) -> StoreError {
    StoreError::DatabaseError(format!("Lock error: {e}"))
}

impl SceneStore for MemoryStore {
    fn load_scene(&self, room_id: &str) -> BoxFuture<'_, Result<Option<StoredScene>, StoreError>> {
        let room_id = room_id.to_string();
        Box::pin(async move {
            let scenes = self.scenes.read().map_err(lock_error)?;
            Ok(scenes.get(&room_id).cloned())
        })
    }

    fn save_scene(&self, room_id: &str, scene: StoredScene) -> BoxFuture<'_, Result<(), StoreError>> {
        let room_id = room_id.to_string();
        Box::pin(async move {
            let mut scenes = self.scenes.write().map_err(lock_error)?;
            scenes.insert(room_id, scene);
            Ok(())
        })
    }

    fn load_files(&self, prefix: &str, ids: &[FileId]) -> BoxFuture<'_, FileBatch> {
        let keys: Vec<(FileId, String)> = ids
            .iter()
            .map(|id| (id.clone(), file_key(prefix, id)))
            .collect();
        Box::pin(async move {
            let mut batch = FileBatch::default();
            let files = match self.files.read() {
                Ok(files) => files,
                Err(_) => {
                    batch.errored = keys.into_iter().map(|(id, _)| id).collect();
                    return batch;
                }
            };
            for (id, key) in keys {
                match files.get(&key) {
                    Some(payload) => batch.loaded.push((id, payload.clone())),
                    None => batch.errored.push(id),
                }
            }
            batch
        })
    }

    fn save_files(
        &self,
        prefix: &str,
        files: Vec<(FileId, EncryptedPayload)>,
    ) -> BoxFuture<'_, SaveOutcome> {
        let prefix = prefix.to_string();
        Box::pin(async move {
            let mut outcome = SaveOutcome::default();
            let mut stored = match self.files.write() {
                Ok(stored) => stored,
                Err(_) => {
                    outcome.errored = files.into_iter().map(|(id, _)| id).collect();
                    return outcome;
                }
            };
            for (id, payload) in files {
                stored.insert(file_key(&prefix, &id), payload);
                outcome.saved.push(id);
            }
            outcome
        })
    }
}
