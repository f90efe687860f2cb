//! RocksDB-backed room store.
//!
//! Column families:
//! - `scenes`: latest encrypted snapshot per room (keyed by room id)
//! - `files`: encrypted file bodies (keyed by `<prefix>/<file id>`)
//!
//! Values are already LZ4-compressed and encrypted before they reach the
//! store, so the column families do not compress again.

use rocksdb::{
    BlockBasedOptions, Cache, ColumnFamilyDescriptor, DBCompressionType, DBWithThreadMode,
    Options, SingleThreaded, WriteOptions,
};
use serde::Serialize;
use std::path::PathBuf;

use super::{file_key, BoxFuture, FileBatch, SaveOutcome, SceneStore, StoreError, StoredScene};
use crate::crypto::EncryptedPayload;
use crate::element::FileId;

const CF_SCENES: &str = "scenes";
const CF_FILES: &str = "files";

const COLUMN_FAMILIES: &[&str] = &[CF_SCENES, CF_FILES];

/// Store configuration.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Database directory path
    pub path: PathBuf,
    /// Block cache size in bytes (default: 64MB)
    pub block_cache_size: usize,
    /// Bloom filter bits per key (default: 10)
    pub bloom_filter_bits: i32,
    /// Enable fsync on every write (default: false)
    pub sync_writes: bool,
    /// Max open files for RocksDB (default: 256)
    pub max_open_files: i32,
    /// Write buffer size per column family (default: 32MB)
    pub write_buffer_size: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("canvas_data"),
            block_cache_size: 64 * 1024 * 1024,
            bloom_filter_bits: 10,
            sync_writes: false,
            max_open_files: 256,
            write_buffer_size: 32 * 1024 * 1024,
        }
    }
}

impl StoreConfig {
    /// Create config for testing (small caches, caller-chosen directory).
    pub fn for_testing(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            block_cache_size: 8 * 1024 * 1024,
            bloom_filter_bits: 10,
            sync_writes: false,
            max_open_files: 64,
            write_buffer_size: 4 * 1024 * 1024,
        }
    }
}

/// RocksDB-backed scene and file store.
pub struct RocksSceneStore {
    db: DBWithThreadMode<SingleThreaded>,
    config: StoreConfig,
}

impl RocksSceneStore {
    /// Open the store at the configured path, creating it if needed.
    pub fn open(config: StoreConfig) -> Result<Self, StoreError> {
        let mut db_opts = Options::default();
        db_opts.create_if_missing(true);
        db_opts.create_missing_column_families(true);
        db_opts.set_max_open_files(config.max_open_files);
        db_opts.set_keep_log_file_num(5);
        db_opts.increase_parallelism(num_cpus());

        let cf_descriptors: Vec<ColumnFamilyDescriptor> = COLUMN_FAMILIES
            .iter()
            .map(|name| ColumnFamilyDescriptor::new(*name, Self::cf_options(name, &config)))
            .collect();

        let db = DBWithThreadMode::<SingleThreaded>::open_cf_descriptors(
            &db_opts,
            &config.path,
            cf_descriptors,
        )?;

        log::info!("Opened scene store at {}", config.path.display());
        Ok(Self { db, config })
    }

    fn cf_options(name: &str, config: &StoreConfig) -> Options {
        let mut opts = Options::default();

        let mut block_opts = BlockBasedOptions::default();
        let cache = Cache::new_lru_cache(config.block_cache_size);
        block_opts.set_block_cache(&cache);
        block_opts.set_bloom_filter(config.bloom_filter_bits as f64, false);
        block_opts.set_block_size(16 * 1024);
        opts.set_block_based_table_factory(&block_opts);

        // Ciphertext does not compress
        opts.set_compression_type(DBCompressionType::None);
        opts.set_write_buffer_size(config.write_buffer_size);

        match name {
            CF_SCENES => {
                opts.set_max_write_buffer_number(2);
                opts.optimize_for_point_lookup(config.block_cache_size as u64);
            }
            CF_FILES => {
                // Large write-once blobs
                opts.set_max_write_buffer_number(2);
            }
            _ => {}
        }

        opts
    }

    // ─── Scenes ───────────────────────────────────────────────────────

    fn read_scene(&self, room_id: &str) -> Result<Option<StoredScene>, StoreError> {
        let cf = self.cf(CF_SCENES)?;
        match self.db.get_cf(cf, room_id.as_bytes())? {
            Some(bytes) => Ok(Some(decode_value(&bytes)?)),
            None => Ok(None),
        }
    }

    fn write_scene(&self, room_id: &str, scene: &StoredScene) -> Result<(), StoreError> {
        let cf = self.cf(CF_SCENES)?;
        let value = encode_value(scene)?;

        let mut write_opts = WriteOptions::default();
        write_opts.set_sync(self.config.sync_writes);
        self.db.put_cf_opt(cf, room_id.as_bytes(), &value, &write_opts)?;

        log::debug!(
            "Saved scene for room {room_id} at version {} ({} bytes)",
            scene.scene_version,
            value.len()
        );
        Ok(())
    }

    // ─── Files ────────────────────────────────────────────────────────

    fn read_file(&self, key: &str) -> Result<EncryptedPayload, StoreError> {
        let cf = self.cf(CF_FILES)?;
        match self.db.get_cf(cf, key.as_bytes())? {
            Some(bytes) => decode_value(&bytes),
            None => Err(StoreError::NotFound(key.to_string())),
        }
    }

    fn write_file(&self, key: &str, payload: &EncryptedPayload) -> Result<(), StoreError> {
        let cf = self.cf(CF_FILES)?;
        let mut write_opts = WriteOptions::default();
        write_opts.set_sync(self.config.sync_writes);
        self.db
            .put_cf_opt(cf, key.as_bytes(), encode_value(payload)?, &write_opts)?;
        Ok(())
    }

    // ─── Helpers ──────────────────────────────────────────────────────

    fn cf(&self, name: &str) -> Result<&rocksdb::ColumnFamily, StoreError> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| StoreError::DatabaseError(format!("Column family '{name}' not found")))
    }
}

// RocksDB calls block briefly; they run inline and the future is ready at once.
impl SceneStore for RocksSceneStore {
    fn load_scene(&self, room_id: &str) -> BoxFuture<'_, Result<Option<StoredScene>, StoreError>> {
        let result = self.read_scene(room_id);
        Box::pin(async move { result })
    }

    fn save_scene(&self, room_id: &str, scene: StoredScene) -> BoxFuture<'_, Result<(), StoreError>> {
        let result = self.write_scene(room_id, &scene);
        Box::pin(async move { result })
    }

    fn load_files(&self, prefix: &str, ids: &[FileId]) -> BoxFuture<'_, FileBatch> {
        let mut batch = FileBatch::default();
        for id in ids {
            match self.read_file(&file_key(prefix, id)) {
                Ok(payload) => batch.loaded.push((id.clone(), payload)),
                Err(e) => {
                    log::warn!("Failed to load file {id}: {e}");
                    batch.errored.push(id.clone());
                }
            }
        }
        Box::pin(async move { batch })
    }

    fn save_files(
        &self,
        prefix: &str,
        files: Vec<(FileId, EncryptedPayload)>,
    ) -> BoxFuture<'_, SaveOutcome> {
        let mut outcome = SaveOutcome::default();
        for (id, payload) in files {
            match self.write_file(&file_key(prefix, &id), &payload) {
                Ok(()) => outcome.saved.push(id),
                Err(e) => {
                    log::warn!("Failed to save file {id}: {e}");
                    outcome.errored.push(id);
                }
            }
        }
        Box::pin(async move { outcome })
    }
}

fn encode_value<T: Serialize>(value: &T) -> Result<Vec<u8>, StoreError> {
    bincode::serde::encode_to_vec(value, bincode::config::standard())
        .map_err(|e| StoreError::SerializationError(e.to_string()))
}

fn decode_value<T: serde::de::DeserializeOwned>(bytes: &[u8]) -> Result<T, StoreError> {
    let (value, _) = bincode::serde::decode_from_slice(bytes, bincode::config::standard())
        .map_err(|e| StoreError::DeserializationError(e.to_string()))?;
    Ok(value)
}

/// Get number of CPU cores for RocksDB parallelism.
fn num_cpus() -> i32 {
    std::thread::available_parallelism()
        .map(|n| n.get() as i32)
        .unwrap_or(4)
}
