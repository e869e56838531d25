use crate::chunk::{Biome, ChunkColumn, WORLD_HEIGHT};
use crate::error::GenerationError;
use blockworld_common::{BlockId, CHUNK_SIZE};
use noise::{Fbm, MultiFractal, NoiseFn, Perlin};
use tracing::trace;

/// Block ids placed by terrain generation.
pub mod blocks {
    use blockworld_common::BlockId;

    pub const AIR: BlockId = 0;
    pub const STONE: BlockId = 1;
    pub const GRASS: BlockId = 2;
    pub const DIRT: BlockId = 3;
    pub const BEDROCK: BlockId = 7;
    pub const WATER: BlockId = 9;
    pub const SAND: BlockId = 12;
    pub const GRAVEL: BlockId = 13;
    pub const SNOW: BlockId = 80;
}

/// Water fills low columns up to this y.
pub const SEA_LEVEL: i32 = 62;
/// Mean surface height.
const BASE_HEIGHT: f64 = 66.0;
const HEIGHT_AMPLITUDE: f64 = 28.0;
const MIN_SURFACE: i32 = 4;
const MAX_SURFACE: i32 = WORLD_HEIGHT - 32;
/// Thickness of the biome subsurface layer between stone and the surface block.
const SUBSURFACE_DEPTH: i32 = 3;
const SNOW_LINE: i32 = 120;

/// Surface height and biome of one block column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ColumnProfile {
    pub surface: i32,
    pub biome: Biome,
}

/// Seed-driven terrain: a pure function of (seed, chunk x, chunk z).
///
/// Holds no mutable state, so generation order never affects output and one
/// generator can be shared across worker threads.
pub struct TerrainGenerator {
    seed: u64,
    height: Fbm<Perlin>,
    temperature: Fbm<Perlin>,
    moisture: Fbm<Perlin>,
}

impl TerrainGenerator {
    pub fn new(seed: u64) -> Self {
        let mut stream = seed;
        let mut next_seed = || {
            stream = splitmix64(stream);
            stream as u32
        };
        Self {
            seed,
            height: Fbm::<Perlin>::new(next_seed())
                .set_octaves(5)
                .set_frequency(0.006),
            temperature: Fbm::<Perlin>::new(next_seed())
                .set_octaves(2)
                .set_frequency(0.002),
            moisture: Fbm::<Perlin>::new(next_seed())
                .set_octaves(2)
                .set_frequency(0.003),
        }
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    /// Height and biome of the world column at block coordinates (x, z).
    pub fn column_profile(&self, x: i32, z: i32) -> ColumnProfile {
        let p = [x as f64, z as f64];
        let surface = (BASE_HEIGHT + self.height.get(p) * HEIGHT_AMPLITUDE)
            .round()
            .clamp(MIN_SURFACE as f64, MAX_SURFACE as f64) as i32;
        let temperature = self.temperature.get(p);
        let moisture = self.moisture.get(p);

        let biome = if surface < SEA_LEVEL - 1 {
            Biome::Ocean
        } else if surface >= 92 {
            Biome::Mountains
        } else if temperature < -0.3 {
            Biome::Snowy
        } else if temperature > 0.25 && moisture < 0.0 {
            Biome::Desert
        } else if moisture > 0.1 {
            Biome::Forest
        } else {
            Biome::Plains
        };
        ColumnProfile { surface, biome }
    }

    /// Fill `column` from its coordinates.
    ///
    /// Work happens on a scratch column that replaces `column` only once every
    /// block is placed, so a failure leaves the column untouched with
    /// `generated == false`.
    pub fn generate_chunk(&self, column: &mut ChunkColumn) -> Result<(), GenerationError> {
        let pos = column.pos();
        if column.generated {
            return Err(GenerationError::AlreadyGenerated { x: pos.x, z: pos.z });
        }
        let (origin_x, origin_z) = pos
            .origin()
            .ok_or(GenerationError::OutOfWorld { x: pos.x, z: pos.z })?;

        let mut scratch = ChunkColumn::new(pos);
        for lz in 0..CHUNK_SIZE {
            for lx in 0..CHUNK_SIZE {
                let profile = self.column_profile(origin_x + lx, origin_z + lz);
                fill_column(&mut scratch, lx, lz, profile);
                scratch.set_biome(lx, lz, profile.biome)?;
            }
        }
        scratch.generated = true;
        scratch.modified = true;
        scratch.populated = column.populated;
        scratch.touch(column.last_used());
        *column = scratch;

        trace!(chunk = %pos, seed = self.seed, "terrain generated");
        Ok(())
    }
}

/// Stack one column bottom to top: bedrock, stone, subsurface, surface,
/// then water up to sea level.
fn fill_column(column: &mut ChunkColumn, x: i32, z: i32, profile: ColumnProfile) {
    let ColumnProfile { surface, biome } = profile;
    let (subsurface, top) = layers(biome, surface);

    column.set_block(x, 0, z, blocks::BEDROCK);
    for y in 1..surface {
        let id = if y < surface - SUBSURFACE_DEPTH {
            blocks::STONE
        } else {
            subsurface
        };
        column.set_block(x, y, z, id);
    }
    column.set_block(x, surface, z, top);
    for y in (surface + 1)..=SEA_LEVEL {
        column.set_block(x, y, z, blocks::WATER);
    }
}

/// (subsurface, surface) blocks for a biome at a given surface height.
fn layers(biome: Biome, surface: i32) -> (BlockId, BlockId) {
    match biome {
        Biome::Ocean => (blocks::GRAVEL, blocks::SAND),
        Biome::Desert => (blocks::SAND, blocks::SAND),
        Biome::Mountains if surface >= SNOW_LINE => (blocks::STONE, blocks::SNOW),
        Biome::Mountains => (blocks::STONE, blocks::STONE),
        Biome::Snowy => (blocks::DIRT, blocks::SNOW),
        Biome::Plains | Biome::Forest if surface <= SEA_LEVEL => (blocks::DIRT, blocks::SAND),
        Biome::Plains | Biome::Forest => (blocks::DIRT, blocks::GRASS),
    }
}

/// Splitmix64: derives independent noise seeds from the world seed.
fn splitmix64(mut state: u64) -> u64 {
    state = state.wrapping_add(0x9e37_79b9_7f4a_7c15);
    let mut z = state;
    z = (z ^ (z >> 30)).wrapping_mul(0xbf58_476d_1ce4_e5b9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94d0_49bb_1331_11eb);
    z ^ (z >> 31)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk::NO_BLOCK;
    use blockworld_common::ChunkPos;

    fn generate(seed: u64, pos: ChunkPos) -> ChunkColumn {
        let generator = TerrainGenerator::new(seed);
        let mut column = ChunkColumn::new(pos);
        generator.generate_chunk(&mut column).unwrap();
        column
    }

    #[test]
    fn generation_sets_flags_and_fills_blocks() {
        let column = generate(42, ChunkPos::new(0, 0));
        assert!(column.generated);
        assert!(column.modified);
        assert!(column.sections().any(|s| !s.all_air()));
        assert!(column.height_map().iter().all(|&h| h > 0));
    }

    #[test]
    fn same_seed_same_chunk_is_identical() {
        let a = generate(42, ChunkPos::new(3, -7));
        let b = generate(42, ChunkPos::new(3, -7));
        assert_eq!(a.to_data(), b.to_data());
        assert_eq!(a.to_bytes().unwrap(), b.to_bytes().unwrap());
    }

    #[test]
    fn traversal_order_does_not_matter() {
        let generator = TerrainGenerator::new(7);
        let coords: Vec<ChunkPos> = (-2..2)
            .flat_map(|x| (-2..2).map(move |z| ChunkPos::new(x, z)))
            .collect();

        let forward: Vec<_> = coords
            .iter()
            .map(|&p| {
                let mut c = ChunkColumn::new(p);
                generator.generate_chunk(&mut c).unwrap();
                c.to_data()
            })
            .collect();
        let mut backward: Vec<_> = coords
            .iter()
            .rev()
            .map(|&p| {
                let mut c = ChunkColumn::new(p);
                generator.generate_chunk(&mut c).unwrap();
                c.to_data()
            })
            .collect();
        backward.reverse();
        assert_eq!(forward, backward);
    }

    #[test]
    fn different_seeds_diverge() {
        let a = generate(1, ChunkPos::new(5, 5));
        let b = generate(2, ChunkPos::new(5, 5));
        assert_ne!(a.to_data(), b.to_data());
    }

    #[test]
    fn layering_follows_profile() {
        let generator = TerrainGenerator::new(99);
        let pos = ChunkPos::new(-4, 9);
        let mut column = ChunkColumn::new(pos);
        generator.generate_chunk(&mut column).unwrap();
        let (ox, oz) = pos.origin().unwrap();

        for z in 0..CHUNK_SIZE {
            for x in 0..CHUNK_SIZE {
                let profile = generator.column_profile(ox + x, oz + z);
                assert_eq!(column.get_block(x, 0, z), Ok(blocks::BEDROCK));
                assert_eq!(column.get_block(x, 1, z), Ok(blocks::STONE));
                assert_ne!(column.get_block(x, profile.surface, z), Ok(blocks::AIR));
                let top = profile.surface.max(SEA_LEVEL);
                assert_eq!(column.height(x, z), Ok(top));
                assert_eq!(column.get_block(x, top + 1, z), Ok(blocks::AIR));
                assert_eq!(column.biome(x, z), Ok(profile.biome));
            }
        }
    }

    #[test]
    fn regenerating_is_refused_and_harmless() {
        let generator = TerrainGenerator::new(3);
        let mut column = ChunkColumn::new(ChunkPos::new(0, 0));
        generator.generate_chunk(&mut column).unwrap();
        let before = column.to_data();
        assert_eq!(
            generator.generate_chunk(&mut column),
            Err(GenerationError::AlreadyGenerated { x: 0, z: 0 })
        );
        assert_eq!(column.to_data(), before);
    }

    #[test]
    fn unaddressable_chunk_stays_unfinished() {
        let generator = TerrainGenerator::new(3);
        let mut column = ChunkColumn::new(ChunkPos::new(i32::MAX, 0));
        assert!(matches!(
            generator.generate_chunk(&mut column),
            Err(GenerationError::OutOfWorld { .. })
        ));
        assert!(!column.generated);
        assert!(column.sections().next().is_none());
        assert_eq!(column.height(0, 0), Ok(NO_BLOCK));
    }

    #[test]
    fn splitmix_is_deterministic() {
        assert_eq!(splitmix64(42), splitmix64(42));
        assert_ne!(splitmix64(1), splitmix64(2));
    }
}
