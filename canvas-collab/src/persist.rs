//! Encrypted snapshot and file codecs, and the durable snapshot save.
//!
//! ```text
//! Vec<Element> ──bincode──► bytes ──lz4──► compressed ──AES-GCM──► StoredScene
//! BinaryFile   ──bincode──► bytes ──lz4──► compressed ──AES-GCM──► EncryptedPayload
//! ```
//!
//! Saving never blindly overwrites: the stored snapshot is merged first, so
//! a peer that saved newer elements in the meantime keeps them.

use std::collections::{HashMap, HashSet};

use crate::crypto::{EncryptedPayload, RoomKey};
use crate::element::{Element, ElementId};
use crate::error::CollabError;
use crate::files::BinaryFile;
use crate::protocol::{decode, encode};
use crate::reconcile::reconcile;
use crate::storage::{SceneStore, StoreError, StoredScene};
use crate::version::{scene_version, syncable_elements};

// ───────────────────────────────────────────────────────────────────
// Codecs
// ───────────────────────────────────────────────────────────────────

fn seal(plaintext: &[u8], key: &RoomKey) -> Result<EncryptedPayload, CollabError> {
    let compressed = lz4_flex::compress_prepend_size(plaintext);
    Ok(key.encrypt(&compressed)?)
}

fn unseal(payload: &EncryptedPayload, key: &RoomKey) -> Result<Vec<u8>, CollabError> {
    let compressed = key.decrypt(payload)?;
    lz4_flex::decompress_size_prepended(&compressed)
        .map_err(|e| StoreError::CompressionError(e.to_string()).into())
}

/// Encrypt the syncable part of `elements` as a storable snapshot.
pub fn encode_scene(elements: &[Element], key: &RoomKey) -> Result<StoredScene, CollabError> {
    let syncable = syncable_elements(elements);
    let bytes = encode(&syncable)?;
    Ok(StoredScene {
        scene_version: scene_version(&syncable),
        payload: seal(&bytes, key)?,
    })
}

pub fn decode_scene(stored: &StoredScene, key: &RoomKey) -> Result<Vec<Element>, CollabError> {
    let bytes = unseal(&stored.payload, key)?;
    Ok(decode(&bytes)?)
}

pub fn encode_file(file: &BinaryFile, key: &RoomKey) -> Result<EncryptedPayload, CollabError> {
    let bytes = encode(file)?;
    seal(&bytes, key)
}

pub fn decode_file(payload: &EncryptedPayload, key: &RoomKey) -> Result<BinaryFile, CollabError> {
    let bytes = unseal(payload, key)?;
    Ok(decode(&bytes)?)
}

// ───────────────────────────────────────────────────────────────────
// Snapshot persistence
// ───────────────────────────────────────────────────────────────────

/// Load and decrypt the stored snapshot of a room.
pub async fn load_scene(
    store: &dyn SceneStore,
    room_id: &str,
    key: &RoomKey,
) -> Result<Option<Vec<Element>>, CollabError> {
    match store.load_scene(room_id).await? {
        Some(stored) => Ok(Some(decode_scene(&stored, key)?)),
        None => Ok(None),
    }
}

/// Writes room snapshots, skipping versions already on disk.
#[derive(Debug, Default)]
pub struct ScenePersister {
    /// Last scene version written per room.
    saved_versions: HashMap<String, u64>,
}

impl ScenePersister {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether `elements` is already what we last saved for `room_id`.
    pub fn is_saved(&self, room_id: &str, elements: &[Element]) -> bool {
        self.saved_versions.get(room_id) == Some(&scene_version(elements))
    }

    /// Merge `elements` with the stored snapshot and write the result.
    ///
    /// Returns the merged scene when the stored snapshot contributed
    /// elements the local scene did not have; the caller applies it like a
    /// remote update. `Ok(None)` means nothing to apply (or nothing written).
    pub async fn save(
        &mut self,
        store: &dyn SceneStore,
        room_id: &str,
        key: &RoomKey,
        elements: &[Element],
        protected: &HashSet<ElementId>,
    ) -> Result<Option<Vec<Element>>, CollabError> {
        if self.is_saved(room_id, elements) {
            log::trace!("Room {room_id} snapshot unchanged, skipping save");
            return Ok(None);
        }

        let local = syncable_elements(elements);
        let merged = match load_scene(store, room_id, key).await? {
            Some(stored) => syncable_elements(&reconcile(&stored, &local, protected)),
            None => local.clone(),
        };

        let snapshot = encode_scene(&merged, key)?;
        let version = snapshot.scene_version;
        store.save_scene(room_id, snapshot).await?;
        self.saved_versions.insert(room_id.to_string(), version);
        log::debug!("Persisted room {room_id} at scene version {version}");

        if contributes(&merged, &local) {
            Ok(Some(merged))
        } else {
            Ok(None)
        }
    }

    pub fn saved_version(&self, room_id: &str) -> Option<u64> {
        self.saved_versions.get(room_id).copied()
    }

    pub fn reset(&mut self) {
        self.saved_versions.clear();
    }
}

/// Whether `merged` holds any element state absent from `local`.
fn contributes(merged: &[Element], local: &[Element]) -> bool {
    let known: HashMap<&str, (u32, u32)> = local
        .iter()
        .map(|e| (e.id.as_str(), (e.version, e.version_nonce)))
        .collect();
    merged
        .iter()
        .any(|e| known.get(e.id.as_str()) != Some(&(e.version, e.version_nonce)))
}
