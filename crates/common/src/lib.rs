//! Shared types for the blockworld core: coordinates, ids, configuration and
//! the contract the persistence collaborator must satisfy.
//!
//! # Invariants
//! - Chunk coordinates are always derived by floor division, never truncation.
//! - Nothing here holds global state; ids and clocks live in explicit objects.

pub mod config;
pub mod persistence;
pub mod types;

pub use config::{ConfigError, SimConfig};
pub use persistence::{EntityRecord, PersistenceError, PlayerRecord, WorldPersistence, WorldRecord};
pub use types::{AIR, BlockAccess, BlockId, BlockPos, CHUNK_SIZE, ChunkPos, EntityId, ItemStack};
