use serde::{Deserialize, Serialize};
use std::fmt;

/// Horizontal (and section) edge length of a chunk in blocks.
pub const CHUNK_SIZE: i32 = 16;

/// Numeric block-type identifier. `0` is air.
pub type BlockId = u16;

/// The empty block.
pub const AIR: BlockId = 0;

/// Unique identifier for an entity. Assigned monotonically by an allocator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntityId(pub u64);

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A stack of items, as held in an inventory slot or carried by a dropped item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemStack {
    pub id: u32,
    pub count: u32,
}

impl ItemStack {
    pub fn new(id: u32, count: u32) -> Self {
        Self { id, count }
    }
}

/// A chunk column coordinate (block coordinate divided by 16, floored).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ChunkPos {
    pub x: i32,
    pub z: i32,
}

impl ChunkPos {
    pub fn new(x: i32, z: i32) -> Self {
        Self { x, z }
    }

    /// Chunk containing the integer block column (x, z).
    pub fn from_block(x: i32, z: i32) -> Self {
        Self {
            x: x.div_euclid(CHUNK_SIZE),
            z: z.div_euclid(CHUNK_SIZE),
        }
    }

    /// Chunk containing a floating-point world position.
    pub fn from_world(x: f64, z: f64) -> Self {
        Self {
            x: (x / CHUNK_SIZE as f64).floor() as i32,
            z: (z / CHUNK_SIZE as f64).floor() as i32,
        }
    }

    /// The `"x,z"` key used by the persistence layer and logs.
    pub fn key(&self) -> String {
        format!("{},{}", self.x, self.z)
    }

    /// Block coordinate of this chunk's (0, 0) corner, if it fits in `i32`.
    pub fn origin(&self) -> Option<(i32, i32)> {
        Some((
            self.x.checked_mul(CHUNK_SIZE)?,
            self.z.checked_mul(CHUNK_SIZE)?,
        ))
    }

    /// Chebyshev distance in chunks.
    pub fn distance(&self, other: ChunkPos) -> i32 {
        (self.x - other.x).abs().max((self.z - other.z).abs())
    }
}

impl fmt::Display for ChunkPos {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{},{}", self.x, self.z)
    }
}

/// An absolute block coordinate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BlockPos {
    pub x: i32,
    pub y: i32,
    pub z: i32,
}

impl BlockPos {
    pub fn new(x: i32, y: i32, z: i32) -> Self {
        Self { x, y, z }
    }

    /// Block cell containing a world-space point.
    pub fn containing(p: glam::DVec3) -> Self {
        Self {
            x: p.x.floor() as i32,
            y: p.y.floor() as i32,
            z: p.z.floor() as i32,
        }
    }

    pub fn chunk(&self) -> ChunkPos {
        ChunkPos::from_block(self.x, self.z)
    }

    /// Column-local (x, z) in `0..16`.
    pub fn local(&self) -> (usize, usize) {
        (
            self.x.rem_euclid(CHUNK_SIZE) as usize,
            self.z.rem_euclid(CHUNK_SIZE) as usize,
        )
    }

    pub fn below(&self) -> Self {
        Self::new(self.x, self.y - 1, self.z)
    }
}

/// World-space block reads and writes, as seen by entity behaviour.
///
/// The world store implements this; tests substitute a map-backed world.
pub trait BlockAccess {
    fn get_block(&mut self, pos: BlockPos) -> BlockId;
    fn set_block(&mut self, pos: BlockPos, id: BlockId) -> bool;

    fn is_solid(&mut self, pos: BlockPos) -> bool {
        self.get_block(pos) != AIR
    }
}
