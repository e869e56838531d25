//! File-backed world persistence.
//!
//! Layout inside the store directory:
//! ```text
//! store.meta.json                      - schema version and payload formats
//! worlds/<name>.json                   - world records
//! players/<uuid>.json                  - player records
//! chunks/<world>/<x>.<z>.chunk.zst     - zstd compressed chunk blobs
//! entities/<world>/<id>.entity.cbor.zst - CBOR+zstd entity records
//! integrity/
//!   manifest.json                      - SHA-256 of every binary payload
//! ```

use blockworld_common::{
    ChunkPos, EntityId, EntityRecord, PersistenceError, PlayerRecord, WorldPersistence, WorldRecord,
};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};
use uuid::Uuid;

/// Current on-disk schema version.
const STORE_SCHEMA_VERSION: u32 = 1;

const ENTITY_SUFFIX: &str = ".entity.cbor.zst";

/// Errors from file-backed persistence operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("CBOR serialization error: {0}")]
    CborEncode(String),
    #[error("CBOR deserialization error: {0}")]
    CborDecode(String),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("integrity check failed for {file}: expected {expected}, got {actual}")]
    IntegrityMismatch {
        file: String,
        expected: String,
        actual: String,
    },
    #[error("schema version mismatch: file has v{file_version}, expected v{expected_version}")]
    SchemaMismatch {
        file_version: u32,
        expected_version: u32,
    },
    #[error("invalid store name: {0:?}")]
    InvalidName(String),
}

impl From<StoreError> for PersistenceError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::Io(e) => PersistenceError::Io(e),
            StoreError::CborEncode(msg) => PersistenceError::Encode(msg),
            StoreError::CborDecode(msg) => PersistenceError::Decode(msg),
            StoreError::Json(e) => PersistenceError::Decode(e.to_string()),
            StoreError::IntegrityMismatch { file, .. } => PersistenceError::Integrity(file),
            other @ (StoreError::SchemaMismatch { .. } | StoreError::InvalidName(_)) => {
                PersistenceError::Backend(other.to_string())
            }
        }
    }
}

/// Metadata stored in store.meta.json.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreMeta {
    pub schema_version: u32,
    pub chunk_format: String,
    pub entity_format: String,
}

impl Default for StoreMeta {
    fn default() -> Self {
        Self {
            schema_version: STORE_SCHEMA_VERSION,
            chunk_format: "zstd".into(),
            entity_format: "cbor+zstd".into(),
        }
    }
}

/// Payload hashes keyed by path relative to the store root.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IntegrityManifest {
    pub files: BTreeMap<String, String>,
}

/// Directory-backed [`WorldPersistence`] with schema versioning and
/// integrity checking.
pub struct FileStore {
    root: PathBuf,
    meta: StoreMeta,
    manifest: Mutex<IntegrityManifest>,
}

impl FileStore {
    /// Open or create a store at the given path. An existing store with a
    /// different schema version is refused.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let root = path.as_ref().to_path_buf();
        for dir in ["worlds", "players", "chunks", "entities", "integrity"] {
            std::fs::create_dir_all(root.join(dir))?;
        }

        let meta_path = root.join("store.meta.json");
        let manifest_path = root.join("integrity").join("manifest.json");

        let (meta, manifest) = if meta_path.exists() {
            let meta: StoreMeta = serde_json::from_reader(std::fs::File::open(&meta_path)?)?;
            if meta.schema_version != STORE_SCHEMA_VERSION {
                return Err(StoreError::SchemaMismatch {
                    file_version: meta.schema_version,
                    expected_version: STORE_SCHEMA_VERSION,
                });
            }
            let manifest: IntegrityManifest = if manifest_path.exists() {
                serde_json::from_reader(std::fs::File::open(&manifest_path)?)?
            } else {
                IntegrityManifest::default()
            };
            (meta, manifest)
        } else {
            let meta = StoreMeta::default();
            let manifest = IntegrityManifest::default();
            write_atomic(&meta_path, &serde_json::to_vec_pretty(&meta)?)?;
            write_atomic(&manifest_path, &serde_json::to_vec_pretty(&manifest)?)?;
            (meta, manifest)
        };
        tracing::debug!(root = %root.display(), tracked = manifest.files.len(), "file store opened");

        Ok(Self {
            root,
            meta,
            manifest: Mutex::new(manifest),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn meta(&self) -> &StoreMeta {
        &self.meta
    }

    /// Re-hash every tracked payload and compare against the manifest.
    pub fn verify_integrity(&self) -> Result<(), StoreError> {
        let manifest = self.manifest().clone();
        for (rel, expected) in &manifest.files {
            let data = std::fs::read(self.root.join(rel))?;
            let actual = sha256_hex(&data);
            if &actual != expected {
                return Err(StoreError::IntegrityMismatch {
                    file: rel.clone(),
                    expected: expected.clone(),
                    actual,
                });
            }
        }
        Ok(())
    }

    fn manifest(&self) -> MutexGuard<'_, IntegrityManifest> {
        self.manifest.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_tracked(&self, rel: &str, data: &[u8]) -> Result<(), StoreError> {
        let path = self.root.join(rel);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        write_atomic(&path, data)?;

        let mut manifest = self.manifest();
        manifest.files.insert(rel.to_owned(), sha256_hex(data));
        self.save_manifest(&manifest)
    }

    fn read_tracked(&self, rel: &str) -> Result<Option<Vec<u8>>, StoreError> {
        let path = self.root.join(rel);
        if !path.exists() {
            return Ok(None);
        }
        let data = std::fs::read(&path)?;
        if let Some(expected) = self.manifest().files.get(rel) {
            let actual = sha256_hex(&data);
            if &actual != expected {
                return Err(StoreError::IntegrityMismatch {
                    file: rel.to_owned(),
                    expected: expected.clone(),
                    actual,
                });
            }
        }
        Ok(Some(data))
    }

    fn remove_tracked(&self, rel: &str) -> Result<(), StoreError> {
        let path = self.root.join(rel);
        if path.exists() {
            std::fs::remove_file(&path)?;
        }
        let mut manifest = self.manifest();
        if manifest.files.remove(rel).is_some() {
            self.save_manifest(&manifest)?;
        }
        Ok(())
    }

    fn save_manifest(&self, manifest: &IntegrityManifest) -> Result<(), StoreError> {
        let path = self.root.join("integrity").join("manifest.json");
        write_atomic(&path, &serde_json::to_vec_pretty(manifest)?)
    }

    fn read_json<T: for<'de> Deserialize<'de>>(&self, rel: &str) -> Result<Option<T>, StoreError> {
        let path = self.root.join(rel);
        if !path.exists() {
            return Ok(None);
        }
        Ok(Some(serde_json::from_reader(std::fs::File::open(path)?)?))
    }

    fn write_json<T: Serialize>(&self, rel: &str, value: &T) -> Result<(), StoreError> {
        write_atomic(&self.root.join(rel), &serde_json::to_vec_pretty(value)?)
    }

    fn load_entity_file(&self, rel: &str) -> Result<Option<EntityRecord>, StoreError> {
        match self.read_tracked(rel)? {
            Some(compressed) => Ok(Some(cbor_deserialize(&zstd_decompress(&compressed)?)?)),
            None => Ok(None),
        }
    }
}

impl WorldPersistence for FileStore {
    fn load_world(&self, name: &str) -> Result<Option<WorldRecord>, PersistenceError> {
        let rel = format!("worlds/{}.json", checked_name(name)?);
        Ok(self.read_json(&rel)?)
    }

    fn save_world(&self, record: &WorldRecord) -> Result<(), PersistenceError> {
        let rel = format!("worlds/{}.json", checked_name(&record.name)?);
        Ok(self.write_json(&rel, record)?)
    }

    fn load_chunk(&self, world: &str, pos: ChunkPos) -> Result<Option<Vec<u8>>, PersistenceError> {
        let rel = chunk_path(world, pos)?;
        match self.read_tracked(&rel)? {
            Some(compressed) => Ok(Some(zstd_decompress(&compressed)?)),
            None => Ok(None),
        }
    }

    fn save_chunk(&self, world: &str, pos: ChunkPos, data: &[u8]) -> Result<(), PersistenceError> {
        let rel = chunk_path(world, pos)?;
        let compressed = zstd_compress(data)?;
        Ok(self.write_tracked(&rel, &compressed)?)
    }

    fn load_player(&self, uuid: Uuid) -> Result<Option<PlayerRecord>, PersistenceError> {
        Ok(self.read_json(&format!("players/{uuid}.json"))?)
    }

    fn save_player(&self, record: &PlayerRecord) -> Result<(), PersistenceError> {
        Ok(self.write_json(&format!("players/{}.json", record.uuid), record)?)
    }

    fn save_entity(&self, world: &str, record: &EntityRecord) -> Result<(), PersistenceError> {
        let rel = entity_path(world, record.id)?;
        let compressed = zstd_compress(&cbor_serialize(record)?)?;
        Ok(self.write_tracked(&rel, &compressed)?)
    }

    fn delete_entity(&self, world: &str, id: EntityId) -> Result<(), PersistenceError> {
        Ok(self.remove_tracked(&entity_path(world, id)?)?)
    }

    fn get_entities_in_chunk(
        &self,
        world: &str,
        pos: ChunkPos,
    ) -> Result<Vec<EntityRecord>, PersistenceError> {
        let dir = format!("entities/{}", checked_name(world)?);
        let entries = match std::fs::read_dir(self.root.join(&dir)) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut found = Vec::new();
        for entry in entries {
            let file_name = entry?.file_name();
            let Some(file_name) = file_name.to_str() else {
                continue;
            };
            if !file_name.ends_with(ENTITY_SUFFIX) {
                continue;
            }
            match self.load_entity_file(&format!("{dir}/{file_name}")) {
                Ok(Some(record)) if record.chunk == pos => found.push(record),
                Ok(_) => {}
                Err(e) => tracing::warn!(file = file_name, error = %e, "skipping unreadable entity file"),
            }
        }
        found.sort_by_key(|r| r.id);
        Ok(found)
    }
}

fn checked_name(name: &str) -> Result<&str, StoreError> {
    let bad = name.is_empty()
        || name.starts_with('.')
        || name.contains(['/', '\\', ':'])
        || name.chars().any(char::is_control);
    if bad {
        return Err(StoreError::InvalidName(name.to_owned()));
    }
    Ok(name)
}

fn chunk_path(world: &str, pos: ChunkPos) -> Result<String, StoreError> {
    Ok(format!("chunks/{}/{}.{}.chunk.zst", checked_name(world)?, pos.x, pos.z))
}

fn entity_path(world: &str, id: EntityId) -> Result<String, StoreError> {
    Ok(format!("entities/{}/{}{ENTITY_SUFFIX}", checked_name(world)?, id.0))
}

fn cbor_serialize<T: Serialize + ?Sized>(value: &T) -> Result<Vec<u8>, StoreError> {
    let mut buf = Vec::new();
    ciborium::into_writer(value, &mut buf).map_err(|e| StoreError::CborEncode(e.to_string()))?;
    Ok(buf)
}

fn cbor_deserialize<T: for<'de> Deserialize<'de>>(data: &[u8]) -> Result<T, StoreError> {
    ciborium::from_reader(data).map_err(|e| StoreError::CborDecode(e.to_string()))
}

fn zstd_compress(data: &[u8]) -> Result<Vec<u8>, StoreError> {
    let mut encoder = zstd::Encoder::new(Vec::new(), 3)?;
    encoder.write_all(data)?;
    Ok(encoder.finish()?)
}

fn zstd_decompress(data: &[u8]) -> Result<Vec<u8>, StoreError> {
    let mut decoder = zstd::Decoder::new(data)?;
    let mut buf = Vec::new();
    decoder.read_to_end(&mut buf)?;
    Ok(buf)
}

/// Write through a sibling `.tmp` file and rename it over `path`, so readers
/// see either the old contents or the new ones.
fn write_atomic(path: &Path, data: &[u8]) -> Result<(), StoreError> {
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);
    std::fs::write(&tmp, data)?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}

fn sha256_hex(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    format!("{:x}", hasher.finalize())
}
