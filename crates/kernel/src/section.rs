use crate::error::{BoundsError, ChunkDataError};
use blockworld_common::{AIR, BlockId};
use serde::{Deserialize, Serialize};

/// Edge length of a section.
pub const SECTION_SIZE: i32 = 16;
/// Cells per section.
pub const SECTION_VOLUME: usize = (SECTION_SIZE * SECTION_SIZE * SECTION_SIZE) as usize;

/// A 16x16x16 grid of block ids. Leaf storage unit of a chunk column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockSection {
    y_index: i32,
    blocks: Box<[BlockId]>,
    non_air: u16,
    modified: bool,
}

/// Serialized form of a section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SectionData {
    pub y_index: i32,
    pub blocks: Vec<BlockId>,
}

fn in_range(v: i32) -> bool {
    (0..SECTION_SIZE).contains(&v)
}

fn cell_index(x: i32, y: i32, z: i32) -> usize {
    ((y * SECTION_SIZE + z) * SECTION_SIZE + x) as usize
}

impl BlockSection {
    /// An all-air section at the given vertical index.
    pub fn new(y_index: i32) -> Self {
        Self {
            y_index,
            blocks: vec![AIR; SECTION_VOLUME].into_boxed_slice(),
            non_air: 0,
            modified: false,
        }
    }

    pub fn y_index(&self) -> i32 {
        self.y_index
    }

    pub fn all_air(&self) -> bool {
        self.non_air == 0
    }

    /// Number of non-air cells.
    pub fn block_count(&self) -> usize {
        self.non_air as usize
    }

    pub fn is_modified(&self) -> bool {
        self.modified
    }

    pub fn clear_modified(&mut self) {
        self.modified = false;
    }

    pub fn get_block(&self, x: i32, y: i32, z: i32) -> Result<BlockId, BoundsError> {
        if !(in_range(x) && in_range(y) && in_range(z)) {
            return Err(BoundsError::Local { x, y, z });
        }
        Ok(self.blocks[cell_index(x, y, z)])
    }

    /// Write one cell. Out-of-range coordinates return `false` and change nothing.
    pub fn set_block(&mut self, x: i32, y: i32, z: i32, id: BlockId) -> bool {
        if !(in_range(x) && in_range(y) && in_range(z)) {
            return false;
        }
        let cell = &mut self.blocks[cell_index(x, y, z)];
        match (*cell == AIR, id == AIR) {
            (true, false) => self.non_air += 1,
            (false, true) => self.non_air -= 1,
            _ => {}
        }
        *cell = id;
        self.modified = true;
        true
    }

    /// Highest local y in column (x, z) holding a non-air block.
    pub(crate) fn top_in_column(&self, x: i32, z: i32, below: i32) -> Option<i32> {
        (0..below.min(SECTION_SIZE))
            .rev()
            .find(|&y| self.blocks[cell_index(x, y, z)] != AIR)
    }

    pub fn to_data(&self) -> SectionData {
        SectionData {
            y_index: self.y_index,
            blocks: self.blocks.to_vec(),
        }
    }

    pub fn from_data(data: SectionData) -> Result<Self, ChunkDataError> {
        if data.blocks.len() != SECTION_VOLUME {
            return Err(ChunkDataError::SectionLength {
                index: data.y_index,
                len: data.blocks.len(),
                expected: SECTION_VOLUME,
            });
        }
        let non_air = data.blocks.iter().filter(|&&b| b != AIR).count() as u16;
        Ok(Self {
            y_index: data.y_index,
            blocks: data.blocks.into_boxed_slice(),
            non_air,
            modified: false,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_section_is_air() {
        let s = BlockSection::new(0);
        assert!(s.all_air());
        assert!(!s.is_modified());
        assert_eq!(s.get_block(0, 0, 0), Ok(AIR));
    }

    #[test]
    fn set_then_get() {
        let mut s = BlockSection::new(0);
        assert!(s.set_block(0, 0, 0, 1));
        assert!(s.is_modified());
        assert!(!s.all_air());
        assert_eq!(s.get_block(0, 0, 0), Ok(1));

        assert!(s.set_block(0, 0, 0, AIR));
        assert!(s.all_air());
    }

    #[test]
    fn every_in_range_cell_round_trips() {
        let mut s = BlockSection::new(3);
        for y in 0..16 {
            for z in 0..16 {
                for x in 0..16 {
                    let id = (x + y * 16 + z * 256) as BlockId % 500 + 1;
                    assert!(s.set_block(x, y, z, id));
                    assert_eq!(s.get_block(x, y, z), Ok(id));
                }
            }
        }
        assert_eq!(s.block_count(), SECTION_VOLUME);
    }

    #[test]
    fn out_of_range_rejected_without_mutation() {
        let mut s = BlockSection::new(0);
        assert!(!s.set_block(16, 0, 0, 1));
        assert!(!s.set_block(0, -1, 0, 1));
        assert!(!s.set_block(0, 0, 99, 1));
        assert!(!s.is_modified());
        assert!(s.all_air());
        assert_eq!(
            s.get_block(16, 0, 0),
            Err(BoundsError::Local { x: 16, y: 0, z: 0 })
        );
    }

    #[test]
    fn overwriting_solid_keeps_count() {
        let mut s = BlockSection::new(0);
        s.set_block(1, 1, 1, 1);
        s.set_block(1, 1, 1, 2);
        assert_eq!(s.block_count(), 1);
    }

    #[test]
    fn data_round_trip() {
        let mut s = BlockSection::new(2);
        s.set_block(0, 0, 0, 1);
        s.set_block(1, 1, 1, 2);
        s.set_block(2, 2, 2, 3);

        let restored = BlockSection::from_data(s.to_data()).unwrap();
        assert_eq!(restored.y_index(), 2);
        assert!(!restored.all_air());
        assert_eq!(restored.get_block(0, 0, 0), Ok(1));
        assert_eq!(restored.get_block(1, 1, 1), Ok(2));
        assert_eq!(restored.get_block(2, 2, 2), Ok(3));
        assert_eq!(restored.block_count(), 3);
    }

    #[test]
    fn truncated_data_rejected() {
        let data = SectionData {
            y_index: 0,
            blocks: vec![1; 10],
        };
        assert!(matches!(
            BlockSection::from_data(data),
            Err(ChunkDataError::SectionLength { len: 10, .. })
        ));
    }
}
