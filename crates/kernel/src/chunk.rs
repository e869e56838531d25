use crate::error::{BoundsError, ChunkDataError};
use crate::section::{BlockSection, SECTION_SIZE, SectionData};
use blockworld_common::{AIR, BlockId, CHUNK_SIZE, ChunkPos};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Number of sections stacked in a column.
pub const SECTIONS_PER_COLUMN: i32 = 16;
/// Exclusive upper bound on block y.
pub const WORLD_HEIGHT: i32 = SECTIONS_PER_COLUMN * SECTION_SIZE;
/// Height-map value of a column with no blocks at all.
pub const NO_BLOCK: i32 = -1;

const COLUMN_AREA: usize = (CHUNK_SIZE * CHUNK_SIZE) as usize;

/// Biome classification of one block column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum Biome {
    Ocean = 0,
    Plains = 1,
    Desert = 2,
    Forest = 3,
    Mountains = 4,
    Snowy = 5,
}

impl Biome {
    pub fn id(self) -> u8 {
        self as u8
    }

    pub fn from_id(id: u8) -> Option<Self> {
        Some(match id {
            0 => Self::Ocean,
            1 => Self::Plains,
            2 => Self::Desert,
            3 => Self::Forest,
            4 => Self::Mountains,
            5 => Self::Snowy,
            _ => return None,
        })
    }
}

/// A 16-wide vertical slice of the world: sparse sections plus derived maps.
///
/// # Invariants
/// - `height(x, z)` is the highest y holding a non-air block, or [`NO_BLOCK`].
///   It is raised in O(1) on placement and rescanned only when the tracked
///   top block is removed.
/// - Sections are only materialized by a non-air write.
#[derive(Debug, Clone)]
pub struct ChunkColumn {
    pos: ChunkPos,
    sections: BTreeMap<i32, BlockSection>,
    height_map: [i32; COLUMN_AREA],
    biomes: [u8; COLUMN_AREA],
    pub generated: bool,
    pub populated: bool,
    pub modified: bool,
    last_used: u64,
}

/// Serialized form of a column: flags, maps and only the non-empty sections.
///
/// Persistence export/import format; not a network format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkData {
    pub x: i32,
    pub z: i32,
    pub generated: bool,
    pub populated: bool,
    pub modified: bool,
    pub height_map: Vec<i32>,
    pub biomes: Vec<u8>,
    pub sections: Vec<SectionData>,
}

fn column_index(x: i32, z: i32) -> usize {
    (z * CHUNK_SIZE + x) as usize
}

fn check_column(x: i32, z: i32) -> Result<(), BoundsError> {
    if (0..CHUNK_SIZE).contains(&x) && (0..CHUNK_SIZE).contains(&z) {
        Ok(())
    } else {
        Err(BoundsError::Column { x, z })
    }
}

fn check_height(y: i32) -> Result<(), BoundsError> {
    if (0..WORLD_HEIGHT).contains(&y) {
        Ok(())
    } else {
        Err(BoundsError::Height {
            y,
            limit: WORLD_HEIGHT,
        })
    }
}

impl ChunkColumn {
    /// An empty, ungenerated column.
    pub fn new(pos: ChunkPos) -> Self {
        Self {
            pos,
            sections: BTreeMap::new(),
            height_map: [NO_BLOCK; COLUMN_AREA],
            biomes: [Biome::Plains.id(); COLUMN_AREA],
            generated: false,
            populated: false,
            modified: false,
            last_used: 0,
        }
    }

    pub fn pos(&self) -> ChunkPos {
        self.pos
    }

    pub fn last_used(&self) -> u64 {
        self.last_used
    }

    /// Record an access at `stamp` (a monotonically increasing store clock).
    pub fn touch(&mut self, stamp: u64) {
        self.last_used = stamp;
    }

    pub fn section(&self, index: i32) -> Option<&BlockSection> {
        self.sections.get(&index)
    }

    /// Materialized sections, bottom to top.
    pub fn sections(&self) -> impl Iterator<Item = &BlockSection> {
        self.sections.values()
    }

    /// Block at column-local x/z and absolute y. Absent sections read as air.
    pub fn get_block(&self, x: i32, y: i32, z: i32) -> Result<BlockId, BoundsError> {
        check_column(x, z)?;
        check_height(y)?;
        match self.sections.get(&(y / SECTION_SIZE)) {
            Some(section) => section.get_block(x, y % SECTION_SIZE, z),
            None => Ok(AIR),
        }
    }

    /// Write a block at column-local x/z and absolute y, maintaining the
    /// height map. Out-of-range coordinates return `false` and change nothing.
    pub fn set_block(&mut self, x: i32, y: i32, z: i32, id: BlockId) -> bool {
        if check_column(x, z).is_err() || check_height(y).is_err() {
            return false;
        }
        let index = y / SECTION_SIZE;
        // Air over an absent section is already air.
        if id == AIR && !self.sections.contains_key(&index) {
            return true;
        }
        let section = self
            .sections
            .entry(index)
            .or_insert_with(|| BlockSection::new(index));
        if !section.set_block(x, y % SECTION_SIZE, z, id) {
            return false;
        }
        self.modified = true;

        let slot = column_index(x, z);
        let top = self.height_map[slot];
        if id != AIR {
            if y > top {
                self.height_map[slot] = y;
            }
        } else if y == top {
            self.height_map[slot] = self.scan_top(x, z, y);
        }
        true
    }

    /// Highest non-air y strictly below `below` in column (x, z).
    fn scan_top(&self, x: i32, z: i32, below: i32) -> i32 {
        let top_section = below / SECTION_SIZE;
        for (&index, section) in self.sections.range(..=top_section).rev() {
            let limit = if index == top_section {
                below % SECTION_SIZE
            } else {
                SECTION_SIZE
            };
            if let Some(local) = section.top_in_column(x, z, limit) {
                return index * SECTION_SIZE + local;
            }
        }
        NO_BLOCK
    }

    /// Recorded height at (x, z): highest non-air y, or [`NO_BLOCK`].
    pub fn height(&self, x: i32, z: i32) -> Result<i32, BoundsError> {
        check_column(x, z)?;
        Ok(self.height_map[column_index(x, z)])
    }

    pub fn biome(&self, x: i32, z: i32) -> Result<Biome, BoundsError> {
        check_column(x, z)?;
        Ok(Biome::from_id(self.biomes[column_index(x, z)]).unwrap_or(Biome::Plains))
    }

    pub fn set_biome(&mut self, x: i32, z: i32, biome: Biome) -> Result<(), BoundsError> {
        check_column(x, z)?;
        self.biomes[column_index(x, z)] = biome.id();
        Ok(())
    }

    /// Raw biome ids in z-major order.
    pub fn biome_ids(&self) -> &[u8] {
        &self.biomes
    }

    /// Raw height map in z-major order.
    pub fn height_map(&self) -> &[i32] {
        &self.height_map
    }

    /// Clear the modified flag on the column and all of its sections.
    pub fn mark_saved(&mut self) {
        self.modified = false;
        for section in self.sections.values_mut() {
            section.clear_modified();
        }
    }

    pub fn to_data(&self) -> ChunkData {
        ChunkData {
            x: self.pos.x,
            z: self.pos.z,
            generated: self.generated,
            populated: self.populated,
            modified: self.modified,
            height_map: self.height_map.to_vec(),
            biomes: self.biomes.to_vec(),
            sections: self
                .sections
                .values()
                .filter(|s| !s.all_air())
                .map(BlockSection::to_data)
                .collect(),
        }
    }

    pub fn from_data(data: ChunkData) -> Result<Self, ChunkDataError> {
        let height_map: [i32; COLUMN_AREA] =
            data.height_map
                .as_slice()
                .try_into()
                .map_err(|_| ChunkDataError::MapLength {
                    map: "height",
                    len: data.height_map.len(),
                    expected: COLUMN_AREA,
                })?;
        let biomes: [u8; COLUMN_AREA] =
            data.biomes
                .as_slice()
                .try_into()
                .map_err(|_| ChunkDataError::MapLength {
                    map: "biome",
                    len: data.biomes.len(),
                    expected: COLUMN_AREA,
                })?;

        let mut sections = BTreeMap::new();
        for section in data.sections {
            if !(0..SECTIONS_PER_COLUMN).contains(&section.y_index) {
                return Err(BoundsError::Section {
                    index: section.y_index,
                    limit: SECTIONS_PER_COLUMN,
                }
                .into());
            }
            let section = BlockSection::from_data(section)?;
            sections.insert(section.y_index(), section);
        }

        Ok(Self {
            pos: ChunkPos::new(data.x, data.z),
            sections,
            height_map,
            biomes,
            generated: data.generated,
            populated: data.populated,
            modified: data.modified,
            last_used: 0,
        })
    }

    /// Encode to the opaque blob handed to the persistence collaborator.
    pub fn to_bytes(&self) -> Result<Vec<u8>, ChunkDataError> {
        let mut buf = Vec::new();
        ciborium::into_writer(&self.to_data(), &mut buf)
            .map_err(|e| ChunkDataError::Encode(e.to_string()))?;
        Ok(buf)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, ChunkDataError> {
        let data: ChunkData =
            ciborium::from_reader(bytes).map_err(|e| ChunkDataError::Decode(e.to_string()))?;
        Self::from_data(data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Reference height computed by brute force.
    fn true_height(chunk: &ChunkColumn, x: i32, z: i32) -> i32 {
        (0..WORLD_HEIGHT)
            .rev()
            .find(|&y| chunk.get_block(x, y, z).unwrap() != AIR)
            .unwrap_or(NO_BLOCK)
    }

    #[test]
    fn set_creates_section_lazily() {
        let mut chunk = ChunkColumn::new(ChunkPos::new(0, 0));
        assert!(chunk.set_block(0, 64, 0, 1));
        assert!(chunk.modified);
        assert!(chunk.section(4).is_some());
        assert!(chunk.section(3).is_none());
        assert_eq!(chunk.get_block(0, 64, 0), Ok(1));
    }

    #[test]
    fn writing_air_does_not_materialize() {
        let mut chunk = ChunkColumn::new(ChunkPos::new(0, 0));
        assert!(chunk.set_block(3, 100, 3, AIR));
        assert!(chunk.section(6).is_none());
        assert!(!chunk.modified);
    }

    #[test]
    fn out_of_range_is_rejected() {
        let mut chunk = ChunkColumn::new(ChunkPos::new(0, 0));
        assert!(!chunk.set_block(16, 64, 0, 1));
        assert!(!chunk.set_block(0, WORLD_HEIGHT, 0, 1));
        assert!(!chunk.set_block(0, -1, 0, 1));
        assert!(!chunk.modified);
        assert_eq!(
            chunk.get_block(0, 64, -1),
            Err(BoundsError::Column { x: 0, z: -1 })
        );
        assert!(matches!(
            chunk.get_block(0, 300, 0),
            Err(BoundsError::Height { y: 300, .. })
        ));
    }

    #[test]
    fn height_map_raise_and_rescan() {
        let mut chunk = ChunkColumn::new(ChunkPos::new(0, 0));
        assert_eq!(chunk.height(0, 0), Ok(NO_BLOCK));

        chunk.set_block(0, 64, 0, 1);
        assert_eq!(chunk.height(0, 0), Ok(64));
        chunk.set_block(0, 70, 0, 1);
        assert_eq!(chunk.height(0, 0), Ok(70));
        chunk.set_block(0, 60, 0, 1);
        assert_eq!(chunk.height(0, 0), Ok(70));

        chunk.set_block(0, 70, 0, AIR);
        assert_eq!(chunk.height(0, 0), Ok(64));
        chunk.set_block(0, 64, 0, AIR);
        assert_eq!(chunk.height(0, 0), Ok(60));
        chunk.set_block(0, 60, 0, AIR);
        assert_eq!(chunk.height(0, 0), Ok(NO_BLOCK));
    }

    #[test]
    fn removing_non_top_block_keeps_height() {
        let mut chunk = ChunkColumn::new(ChunkPos::new(0, 0));
        chunk.set_block(5, 10, 5, 1);
        chunk.set_block(5, 40, 5, 1);
        chunk.set_block(5, 10, 5, AIR);
        assert_eq!(chunk.height(5, 5), Ok(40));
    }

    #[test]
    fn height_map_matches_brute_force_after_edit_sequence() {
        let mut chunk = ChunkColumn::new(ChunkPos::new(2, -3));
        // Deterministic pseudo-random edit script across section boundaries.
        let mut state: u32 = 0x1234_5678;
        for _ in 0..4000 {
            state ^= state << 13;
            state ^= state >> 17;
            state ^= state << 5;
            let x = (state % 4) as i32;
            let z = ((state >> 4) % 4) as i32;
            let y = ((state >> 8) % 80) as i32;
            let id = if (state >> 20) % 3 == 0 { AIR } else { 1 };
            chunk.set_block(x, y, z, id);
        }
        for x in 0..4 {
            for z in 0..4 {
                assert_eq!(chunk.height(x, z), Ok(true_height(&chunk, x, z)));
            }
        }
    }

    #[test]
    fn round_trip_empty() {
        let chunk = ChunkColumn::new(ChunkPos::new(-1, 4));
        let data = chunk.to_data();
        assert!(data.sections.is_empty());
        let restored = ChunkColumn::from_data(data.clone()).unwrap();
        assert_eq!(restored.to_data(), data);
        assert_eq!(restored.pos(), ChunkPos::new(-1, 4));
    }

    #[test]
    fn round_trip_partial_preserves_flags_and_maps() {
        let mut chunk = ChunkColumn::new(ChunkPos::new(0, 0));
        chunk.set_block(0, 64, 0, 1);
        chunk.set_block(1, 65, 1, 2);
        chunk.set_block(2, 66, 2, 3);
        chunk.set_biome(4, 4, Biome::Desert).unwrap();
        chunk.generated = true;
        chunk.populated = true;

        let data = chunk.to_data();
        assert_eq!(data.sections.len(), 1);
        let restored = ChunkColumn::from_data(data.clone()).unwrap();
        assert!(restored.generated);
        assert!(restored.populated);
        assert_eq!(restored.get_block(0, 64, 0), Ok(1));
        assert_eq!(restored.get_block(1, 65, 1), Ok(2));
        assert_eq!(restored.get_block(2, 66, 2), Ok(3));
        assert_eq!(restored.biome(4, 4), Ok(Biome::Desert));
        assert_eq!(restored.height(2, 2), Ok(66));
        assert_eq!(restored.to_data(), data);
    }

    #[test]
    fn round_trip_full_column_through_bytes() {
        let mut chunk = ChunkColumn::new(ChunkPos::new(7, 7));
        for y in 0..WORLD_HEIGHT {
            for z in 0..CHUNK_SIZE {
                for x in 0..CHUNK_SIZE {
                    chunk.set_block(x, y, z, (1 + (x + z + y) % 7) as BlockId);
                }
            }
        }
        let bytes = chunk.to_bytes().unwrap();
        let restored = ChunkColumn::from_bytes(&bytes).unwrap();
        assert_eq!(restored.to_data(), chunk.to_data());
        assert_eq!(restored.height(15, 15), Ok(WORLD_HEIGHT - 1));
    }

    #[test]
    fn cleared_sections_are_not_exported() {
        let mut chunk = ChunkColumn::new(ChunkPos::new(0, 0));
        chunk.set_block(0, 20, 0, 1);
        chunk.set_block(0, 20, 0, AIR);
        assert!(chunk.to_data().sections.is_empty());
    }

    #[test]
    fn corrupt_data_is_rejected() {
        let mut data = ChunkColumn::new(ChunkPos::new(0, 0)).to_data();
        data.height_map.pop();
        assert!(matches!(
            ChunkColumn::from_data(data),
            Err(ChunkDataError::MapLength { map: "height", .. })
        ));

        let mut data = ChunkColumn::new(ChunkPos::new(0, 0)).to_data();
        data.sections.push(SectionData {
            y_index: 40,
            blocks: vec![1; crate::section::SECTION_VOLUME],
        });
        assert!(matches!(
            ChunkColumn::from_data(data),
            Err(ChunkDataError::Bounds(BoundsError::Section { index: 40, .. }))
        ));

        assert!(ChunkColumn::from_bytes(b"not cbor").is_err());
    }

    #[test]
    fn mark_saved_clears_flags() {
        let mut chunk = ChunkColumn::new(ChunkPos::new(0, 0));
        chunk.set_block(0, 0, 0, 1);
        chunk.mark_saved();
        assert!(!chunk.modified);
        assert!(!chunk.section(0).unwrap().is_modified());
    }
}
