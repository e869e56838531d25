//! World kernel: authoritative block storage for the voxel world.
//!
//! Sections hold 16x16x16 blocks, columns stack sixteen sections and carry a
//! height map and biomes, the terrain generator fills fresh columns, and the
//! store decides which columns stay resident.
//!
//! # Invariants
//! - A column exposes blocks only for local `x, z` in `0..16` and `y` in
//!   `0..WORLD_HEIGHT`; the height map always matches the stored blocks.
//! - Sections exist only after their first non-air write.
//! - Generation is a pure function of `(seed, column coordinate)`.

pub mod chunk;
pub mod error;
pub mod section;
pub mod store;
pub mod terrain;

pub use chunk::{Biome, ChunkColumn, ChunkData, NO_BLOCK, SECTIONS_PER_COLUMN, WORLD_HEIGHT};
pub use error::{BoundsError, ChunkDataError, GenerationError};
pub use section::{BlockSection, SECTION_SIZE, SECTION_VOLUME, SectionData};
pub use store::{WorldStats, WorldStore};
pub use terrain::{ColumnProfile, SEA_LEVEL, TerrainGenerator, blocks};
