//! Binary asset synchronization.
//!
//! ```text
//!            fetch_missing / save_files
//! unknown ─────────────────────────────► in-flight ──► handled
//!    ▲                                        │
//!    └──────────── upload failed ─────────────┘
//! ```
//!
//! A file id is fetched or uploaded at most once per room session. Fetch
//! failures count as handled; upload failures go back to unknown so the next
//! trigger retries them.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::element::{Element, FileId, FileStatus};
use crate::error::CollabError;
use crate::persist::{decode_file, encode_file};
use crate::room::RoomLink;
use crate::storage::SceneStore;

/// A binary asset referenced by image elements.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BinaryFile {
    pub id: FileId,
    pub mime_type: String,
    pub data: Vec<u8>,
    /// Milliseconds since epoch
    pub created: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FileState {
    InFlight,
    Handled,
}

/// Result of [`FileSync::fetch_missing`].
#[derive(Debug, Default, Clone, PartialEq)]
pub struct FetchOutcome {
    pub loaded: Vec<BinaryFile>,
    pub errored: Vec<FileId>,
}

/// Result of [`FileSync::save_files`].
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct UploadOutcome {
    pub saved: Vec<FileId>,
    pub errored: Vec<FileId>,
}

/// Per-room file bookkeeping.
#[derive(Debug)]
pub struct FileSync {
    states: HashMap<FileId, FileState>,
    files_prefix: String,
    max_batch_bytes: usize,
}

impl FileSync {
    pub fn new(files_prefix: impl Into<String>, max_batch_bytes: usize) -> Self {
        Self {
            states: HashMap::new(),
            files_prefix: files_prefix.into(),
            max_batch_bytes,
        }
    }

    /// Store namespace of a room's files.
    pub fn room_prefix(&self, room_id: &str) -> String {
        format!("{}/{room_id}", self.files_prefix.trim_end_matches('/'))
    }

    /// Saved, live image files that were never fetched or uploaded.
    pub fn missing_file_ids(&self, elements: &[Element]) -> Vec<FileId> {
        let mut ids: Vec<FileId> = Vec::new();
        for element in elements {
            if element.is_deleted || element.file_status() != Some(FileStatus::Saved) {
                continue;
            }
            if let Some(id) = element.file_id() {
                if !self.states.contains_key(id) && !ids.contains(id) {
                    ids.push(id.clone());
                }
            }
        }
        ids
    }

    /// Fetch every file the scene references but nobody has fetched yet.
    ///
    /// One batched store call. Every requested id is marked handled,
    /// whether it loaded or not.
    pub async fn fetch_missing(
        &mut self,
        room: Option<&RoomLink>,
        store: &dyn SceneStore,
        elements: &[Element],
    ) -> Result<FetchOutcome, CollabError> {
        let room = room.ok_or(CollabError::NoActiveRoom)?;
        let ids = self.missing_file_ids(elements);
        if ids.is_empty() {
            return Ok(FetchOutcome::default());
        }

        for id in &ids {
            self.states.insert(id.clone(), FileState::InFlight);
        }
        log::debug!("Fetching {} files for room {}", ids.len(), room.room_id);

        let batch = store.load_files(&self.room_prefix(&room.room_id), &ids).await;

        let mut outcome = FetchOutcome {
            loaded: Vec::with_capacity(batch.loaded.len()),
            errored: batch.errored,
        };
        for (id, payload) in batch.loaded {
            match decode_file(&payload, &room.room_key) {
                Ok(file) => outcome.loaded.push(file),
                Err(e) => {
                    log::warn!("Failed to decode file {id}: {e}");
                    outcome.errored.push(id);
                }
            }
        }

        for id in ids {
            self.states.insert(id, FileState::Handled);
        }
        if !outcome.errored.is_empty() {
            log::warn!("{} files could not be fetched", outcome.errored.len());
        }
        Ok(outcome)
    }

    /// Upload cached files of pending image elements not yet tracked.
    ///
    /// Rejects the whole batch when it exceeds the byte cap.
    pub async fn save_files(
        &mut self,
        room: Option<&RoomLink>,
        store: &dyn SceneStore,
        elements: &[Element],
        cache: &HashMap<FileId, BinaryFile>,
    ) -> Result<UploadOutcome, CollabError> {
        let room = room.ok_or(CollabError::NoActiveRoom)?;

        let mut added: Vec<&BinaryFile> = Vec::new();
        for element in elements {
            if element.is_deleted || element.file_status() != Some(FileStatus::Pending) {
                continue;
            }
            let Some(file) = element.file_id().and_then(|id| cache.get(id)) else {
                continue;
            };
            if !self.states.contains_key(&file.id) && !added.iter().any(|f| f.id == file.id) {
                added.push(file);
            }
        }
        if added.is_empty() {
            return Ok(UploadOutcome::default());
        }

        let size: usize = added.iter().map(|f| f.data.len()).sum();
        if size > self.max_batch_bytes {
            return Err(CollabError::FileBatchTooLarge { size, max: self.max_batch_bytes });
        }

        let mut outcome = UploadOutcome::default();
        let mut encoded = Vec::with_capacity(added.len());
        for file in added {
            match encode_file(file, &room.room_key) {
                Ok(payload) => {
                    self.states.insert(file.id.clone(), FileState::InFlight);
                    encoded.push((file.id.clone(), payload));
                }
                Err(e) => {
                    log::warn!("Failed to encode file {}: {e}", file.id);
                    outcome.errored.push(file.id.clone());
                }
            }
        }

        let result = store.save_files(&self.room_prefix(&room.room_id), encoded).await;
        for id in &result.saved {
            self.states.insert(id.clone(), FileState::Handled);
        }
        for id in &result.errored {
            self.states.remove(id);
        }
        outcome.saved = result.saved;
        outcome.errored.extend(result.errored);

        log::debug!(
            "Uploaded {} files for room {} ({} failed)",
            outcome.saved.len(),
            room.room_id,
            outcome.errored.len()
        );
        Ok(outcome)
    }

    pub fn is_handled(&self, id: &str) -> bool {
        self.states.get(id) == Some(&FileState::Handled)
    }

    pub fn handled_count(&self) -> usize {
        self.states.values().filter(|s| **s == FileState::Handled).count()
    }

    /// Forget everything (room closed).
    pub fn reset(&mut self) {
        self.states.clear();
    }
}
