//! Chunk residency: generate-vs-load-vs-reuse decisions and LRU eviction.

use crate::chunk::{ChunkColumn, WORLD_HEIGHT};
use crate::error::GenerationError;
use crate::terrain::TerrainGenerator;
use blockworld_common::{
    AIR, BlockAccess, BlockId, BlockPos, ChunkPos, SimConfig, WorldPersistence, WorldRecord,
};
use rayon::prelude::*;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Counters describing store activity since creation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WorldStats {
    pub resident: usize,
    pub capacity: usize,
    pub generated: u64,
    pub loaded: u64,
    pub evicted: u64,
    pub saved: u64,
    pub save_failures: u64,
    pub load_failures: u64,
}

/// Owner of every resident chunk column.
///
/// # Invariants
/// - At most one column per coordinate is resident.
/// - Recency (`last_used`, a store-local logical clock) is the only eviction
///   key; the most recently touched column is never evicted.
/// - Persistence reads that fail degrade to "not found"; writes that fail are
///   logged and counted but never block eviction.
///
/// All mutation goes through `&mut self`; share behind a `Mutex` when more
/// than one thread needs access.
pub struct WorldStore {
    record: WorldRecord,
    chunks: HashMap<ChunkPos, ChunkColumn>,
    generator: TerrainGenerator,
    persistence: Option<Arc<dyn WorldPersistence>>,
    capacity: usize,
    clock: u64,
    stats: WorldStats,
}

impl WorldStore {
    /// An in-memory world with no persistence collaborator.
    pub fn new(world_name: impl Into<String>, seed: u64, capacity: usize) -> Self {
        Self {
            record: WorldRecord::new(world_name, seed),
            chunks: HashMap::new(),
            generator: TerrainGenerator::new(seed),
            persistence: None,
            capacity: capacity.max(1),
            clock: 0,
            stats: WorldStats::default(),
        }
    }

    /// Attach a persistence collaborator for chunk load/save.
    pub fn with_persistence(mut self, persistence: Arc<dyn WorldPersistence>) -> Self {
        self.persistence = Some(persistence);
        self
    }

    /// Open the configured world: an existing world record's seed wins over
    /// the configured one; a missing record is created and saved.
    pub fn open(config: &SimConfig, persistence: Arc<dyn WorldPersistence>) -> Self {
        let record = match persistence.load_world(&config.world_name) {
            Ok(Some(record)) => {
                info!(world = %record.name, seed = record.seed, "world record loaded");
                record
            }
            Ok(None) => {
                let record = WorldRecord::new(&config.world_name, config.seed);
                if let Err(e) = persistence.save_world(&record) {
                    error!(world = %record.name, error = %e, "failed to save new world record");
                } else {
                    info!(world = %record.name, seed = record.seed, "world record created");
                }
                record
            }
            Err(e) => {
                warn!(world = %config.world_name, error = %e, "world record unreadable, using configured seed");
                WorldRecord::new(&config.world_name, config.seed)
            }
        };
        let generator = TerrainGenerator::new(record.seed);
        Self {
            record,
            chunks: HashMap::new(),
            generator,
            persistence: Some(persistence),
            capacity: config.chunk_capacity().max(1),
            clock: 0,
            stats: WorldStats::default(),
        }
    }

    pub fn world(&self) -> &WorldRecord {
        &self.record
    }

    /// The attached persistence collaborator, if any.
    pub fn persistence(&self) -> Option<&Arc<dyn WorldPersistence>> {
        self.persistence.as_ref()
    }

    pub fn name(&self) -> &str {
        &self.record.name
    }

    pub fn seed(&self) -> u64 {
        self.record.seed
    }

    pub fn generator(&self) -> &TerrainGenerator {
        &self.generator
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn resident_count(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_resident(&self, pos: ChunkPos) -> bool {
        self.chunks.contains_key(&pos)
    }

    /// Read a resident column without refreshing its recency.
    pub fn peek_chunk(&self, pos: ChunkPos) -> Option<&ChunkColumn> {
        self.chunks.get(&pos)
    }

    /// Resident coordinates, unordered.
    pub fn resident_chunks(&self) -> impl Iterator<Item = ChunkPos> + '_ {
        self.chunks.keys().copied()
    }

    pub fn stats(&self) -> WorldStats {
        WorldStats {
            resident: self.chunks.len(),
            capacity: self.capacity,
            ..self.stats.clone()
        }
    }

    fn next_stamp(&mut self) -> u64 {
        self.clock += 1;
        self.clock
    }

    /// Fetch a column, loading or generating it as needed.
    ///
    /// Resident columns are refreshed and returned. Otherwise a persisted copy
    /// is tried first; failing that the column is generated when
    /// `create_if_missing` is set. Registering a new column may evict the
    /// least recently used ones.
    pub fn get_chunk(&mut self, pos: ChunkPos, create_if_missing: bool) -> Option<&mut ChunkColumn> {
        let stamp = self.next_stamp();
        if !self.chunks.contains_key(&pos) {
            let mut column = match self.load_persisted(pos) {
                Some(column) => column,
                None if create_if_missing => self.generate(pos)?,
                None => return None,
            };
            column.touch(stamp);
            self.chunks.insert(pos, column);
            if self.chunks.len() > self.capacity {
                self.evict_to_capacity();
            }
        }
        let column = self.chunks.get_mut(&pos)?;
        column.touch(stamp);
        Some(column)
    }

    /// Block at a world position. Positions outside the world's vertical
    /// range, or in chunks that cannot be produced, read as air.
    pub fn get_block(&mut self, pos: BlockPos) -> BlockId {
        if !(0..WORLD_HEIGHT).contains(&pos.y) {
            return AIR;
        }
        let (lx, lz) = pos.local();
        self.get_chunk(pos.chunk(), true)
            .and_then(|c| c.get_block(lx as i32, pos.y, lz as i32).ok())
            .unwrap_or(AIR)
    }

    pub fn set_block(&mut self, pos: BlockPos, id: BlockId) -> bool {
        if !(0..WORLD_HEIGHT).contains(&pos.y) {
            return false;
        }
        let (lx, lz) = pos.local();
        self.get_chunk(pos.chunk(), true)
            .is_some_and(|c| c.set_block(lx as i32, pos.y, lz as i32, id))
    }

    /// Evict least recently used columns until the resident count is back
    /// at capacity. Modified columns are persisted before being dropped.
    /// Returns the number evicted.
    pub fn evict_to_capacity(&mut self) -> usize {
        if self.chunks.len() <= self.capacity {
            return 0;
        }
        let _span = tracing::info_span!(
            "chunk_eviction",
            resident = self.chunks.len(),
            capacity = self.capacity
        )
        .entered();

        let mut candidates: Vec<(u64, ChunkPos)> = self
            .chunks
            .iter()
            .map(|(pos, c)| (c.last_used(), *pos))
            .collect();
        candidates.sort_unstable();
        let newest = candidates.last().map(|&(_, pos)| pos);
        let excess = self.chunks.len() - self.capacity;

        let mut evicted = 0;
        for (_, pos) in candidates {
            if evicted == excess {
                break;
            }
            if Some(pos) == newest {
                continue;
            }
            if let Some(mut column) = self.chunks.remove(&pos) {
                self.persist(&mut column);
                debug!(chunk = %pos, "chunk evicted");
                evicted += 1;
            }
        }
        self.stats.evicted += evicted as u64;
        evicted
    }

    /// Persist (if modified) and drop one column. Returns whether it was resident.
    pub fn unload_chunk(&mut self, pos: ChunkPos) -> bool {
        match self.chunks.remove(&pos) {
            Some(mut column) => {
                self.persist(&mut column);
                debug!(chunk = %pos, "chunk unloaded");
                true
            }
            None => false,
        }
    }

    /// Persist every resident modified column. Returns how many were saved.
    pub fn save_all(&mut self) -> usize {
        let Some(store) = self.persistence.clone() else {
            return 0;
        };
        let mut saved = 0;
        for column in self.chunks.values_mut() {
            if column.modified && save_column(store.as_ref(), &self.record.name, column, &mut self.stats) {
                saved += 1;
            }
        }
        saved
    }

    /// Make every chunk within `radius` of `center` resident. Persisted
    /// columns are loaded; the rest are generated in parallel. Returns the
    /// number of columns that became resident.
    pub fn pregenerate(&mut self, center: ChunkPos, radius: u32) -> usize {
        let r = radius as i32;
        let wanted: Vec<ChunkPos> = (-r..=r)
            .flat_map(|dx| (-r..=r).map(move |dz| ChunkPos::new(center.x + dx, center.z + dz)))
            .filter(|pos| !self.chunks.contains_key(pos))
            .collect();

        let mut added = 0;
        let mut missing = Vec::new();
        for pos in wanted {
            match self.load_persisted(pos) {
                Some(mut column) => {
                    column.touch(self.next_stamp());
                    self.chunks.insert(pos, column);
                    added += 1;
                }
                None => missing.push(pos),
            }
        }

        // Each coordinate appears once in `missing`, and `&mut self` rules out
        // any other generation of it while this runs.
        let generator = &self.generator;
        let results: Vec<(ChunkPos, Result<ChunkColumn, GenerationError>)> = missing
            .par_iter()
            .map(|&pos| {
                let mut column = ChunkColumn::new(pos);
                (pos, generator.generate_chunk(&mut column).map(|()| column))
            })
            .collect();

        for (pos, result) in results {
            match result {
                Ok(mut column) => {
                    column.touch(self.next_stamp());
                    self.chunks.insert(pos, column);
                    self.stats.generated += 1;
                    added += 1;
                }
                Err(e) => error!(chunk = %pos, error = %e, "terrain generation failed"),
            }
        }
        debug!(center = %center, radius, added, "pregeneration complete");
        self.evict_to_capacity();
        added
    }

    fn load_persisted(&mut self, pos: ChunkPos) -> Option<ChunkColumn> {
        let store = self.persistence.as_ref()?;
        let bytes = match store.load_chunk(&self.record.name, pos) {
            Ok(Some(bytes)) => bytes,
            Ok(None) => return None,
            Err(e) => {
                warn!(chunk = %pos, error = %e, "chunk read failed, treating as absent");
                self.stats.load_failures += 1;
                return None;
            }
        };
        match ChunkColumn::from_bytes(&bytes) {
            Ok(mut column) if column.pos() == pos => {
                column.generated = true;
                column.modified = false;
                self.stats.loaded += 1;
                debug!(chunk = %pos, "chunk loaded");
                Some(column)
            }
            Ok(column) => {
                warn!(chunk = %pos, stored = %column.pos(), "persisted chunk has wrong coordinates, treating as absent");
                self.stats.load_failures += 1;
                None
            }
            Err(e) => {
                warn!(chunk = %pos, error = %e, "chunk decode failed, treating as absent");
                self.stats.load_failures += 1;
                None
            }
        }
    }

    fn generate(&mut self, pos: ChunkPos) -> Option<ChunkColumn> {
        let mut column = ChunkColumn::new(pos);
        match self.generator.generate_chunk(&mut column) {
            Ok(()) => {
                self.stats.generated += 1;
                debug!(chunk = %pos, "chunk generated");
                Some(column)
            }
            Err(e) => {
                error!(chunk = %pos, error = %e, "terrain generation failed");
                None
            }
        }
    }

    fn persist(&mut self, column: &mut ChunkColumn) {
        if !column.modified {
            return;
        }
        match self.persistence.clone() {
            Some(store) => {
                save_column(store.as_ref(), &self.record.name, column, &mut self.stats);
            }
            None => debug!(chunk = %column.pos(), "no persistence attached, dropping modified chunk"),
        }
    }
}

/// Save one column, clearing its modified flag on success. Failures are
/// logged and counted.
fn save_column(
    store: &dyn WorldPersistence,
    world: &str,
    column: &mut ChunkColumn,
    stats: &mut WorldStats,
) -> bool {
    let pos = column.pos();
    let result = column
        .to_bytes()
        .map_err(|e| e.to_string())
        .and_then(|bytes| store.save_chunk(world, pos, &bytes).map_err(|e| e.to_string()));
    match result {
        Ok(()) => {
            column.mark_saved();
            stats.saved += 1;
            true
        }
        Err(e) => {
            error!(chunk = %pos, world, error = %e, "chunk save failed, unsaved changes lost on eviction");
            stats.save_failures += 1;
            false
        }
    }
}

impl BlockAccess for WorldStore {
    fn get_block(&mut self, pos: BlockPos) -> BlockId {
        WorldStore::get_block(self, pos)
    }

    fn set_block(&mut self, pos: BlockPos, id: BlockId) -> bool {
        WorldStore::set_block(self, pos, id)
    }
}
