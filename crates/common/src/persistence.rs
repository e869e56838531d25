//! The call contract between the simulation core and its persistence
//! collaborator.
//!
//! Chunk and entity payloads are opaque blobs produced by the core; the
//! collaborator owns compression and storage format. Absent keys are
//! `Ok(None)` (or an empty list), never an error.

use crate::types::{BlockPos, ChunkPos, EntityId, ItemStack};
use glam::DVec3;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

/// Failures reported by a persistence collaborator.
#[derive(Debug, thiserror::Error)]
pub enum PersistenceError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("encode error: {0}")]
    Encode(String),
    #[error("decode error: {0}")]
    Decode(String),
    #[error("integrity check failed for {0}")]
    Integrity(String),
    #[error("backend error: {0}")]
    Backend(String),
}

/// World-level metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorldRecord {
    pub name: String,
    pub seed: u64,
    pub world_type: String,
    pub hardcore: bool,
    pub spawn: BlockPos,
    pub game_rules: BTreeMap<String, String>,
}

impl WorldRecord {
    pub fn new(name: impl Into<String>, seed: u64) -> Self {
        Self {
            name: name.into(),
            seed,
            world_type: "default".into(),
            hardcore: false,
            spawn: BlockPos::new(0, 64, 0),
            game_rules: BTreeMap::new(),
        }
    }
}

/// Everything needed to restore a player across sessions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayerRecord {
    pub uuid: Uuid,
    pub username: String,
    pub position: DVec3,
    pub yaw: f32,
    pub pitch: f32,
    pub health: f32,
    pub food_level: u32,
    pub experience: f32,
    pub level: u32,
    pub inventory: BTreeMap<u16, ItemStack>,
}

/// A persisted non-player entity. `data` is the entity's own serialized form.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityRecord {
    pub id: EntityId,
    pub entity_type: u32,
    /// Variant name (`"mob"`, `"item"`, ...) for collaborators that split storage by kind.
    pub kind: String,
    pub chunk: ChunkPos,
    pub active: bool,
    pub data: Vec<u8>,
}

/// Long-term storage for worlds, chunks, players and entities.
///
/// Implementations use interior mutability so one store can be shared by the
/// world store and the entity simulation.
pub trait WorldPersistence: Send + Sync {
    fn load_world(&self, name: &str) -> Result<Option<WorldRecord>, PersistenceError>;
    fn save_world(&self, record: &WorldRecord) -> Result<(), PersistenceError>;

    fn load_chunk(&self, world: &str, pos: ChunkPos) -> Result<Option<Vec<u8>>, PersistenceError>;
    fn save_chunk(&self, world: &str, pos: ChunkPos, data: &[u8]) -> Result<(), PersistenceError>;

    fn load_player(&self, uuid: Uuid) -> Result<Option<PlayerRecord>, PersistenceError>;
    fn save_player(&self, record: &PlayerRecord) -> Result<(), PersistenceError>;

    fn save_entity(&self, world: &str, record: &EntityRecord) -> Result<(), PersistenceError>;
    /// Forget a persisted entity. Deleting an unknown id succeeds.
    fn delete_entity(&self, world: &str, id: EntityId) -> Result<(), PersistenceError>;
    fn get_entities_in_chunk(
        &self,
        world: &str,
        pos: ChunkPos,
    ) -> Result<Vec<EntityRecord>, PersistenceError>;
}
