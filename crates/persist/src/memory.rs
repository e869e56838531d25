//! In-memory persistence for tests and ephemeral servers.

use blockworld_common::{
    ChunkPos, EntityId, EntityRecord, PersistenceError, PlayerRecord, WorldPersistence, WorldRecord,
};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use uuid::Uuid;

#[derive(Default)]
struct Inner {
    worlds: HashMap<String, WorldRecord>,
    chunks: HashMap<(String, ChunkPos), Vec<u8>>,
    players: HashMap<Uuid, PlayerRecord>,
    entities: BTreeMap<(String, EntityId), EntityRecord>,
    chunk_saves: HashMap<(String, ChunkPos), usize>,
    player_saves: usize,
    entity_saves: usize,
}

/// Mutex-guarded maps implementing [`WorldPersistence`].
///
/// Counts writes so callers can assert how often something was saved, and
/// can be switched into failing reads or writes.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
    fail_reads: AtomicBool,
    fail_writes: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent read return a backend error.
    pub fn set_fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    /// Make every subsequent write return a backend error.
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Successful `save_chunk` calls for one chunk.
    pub fn chunk_save_count(&self, world: &str, pos: ChunkPos) -> usize {
        self.lock()
            .chunk_saves
            .get(&(world.to_owned(), pos))
            .copied()
            .unwrap_or(0)
    }

    pub fn total_chunk_saves(&self) -> usize {
        self.lock().chunk_saves.values().sum()
    }

    pub fn player_save_count(&self) -> usize {
        self.lock().player_saves
    }

    pub fn entity_save_count(&self) -> usize {
        self.lock().entity_saves
    }

    pub fn has_chunk(&self, world: &str, pos: ChunkPos) -> bool {
        self.lock().chunks.contains_key(&(world.to_owned(), pos))
    }

    pub fn stored_entities(&self, world: &str) -> usize {
        self.lock().entities.keys().filter(|(w, _)| w == world).count()
    }

    // A panicking test thread must not hide the stored state from the others.
    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn check_read(&self) -> Result<(), PersistenceError> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(PersistenceError::Backend("injected read failure".into()));
        }
        Ok(())
    }

    fn check_write(&self) -> Result<(), PersistenceError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(PersistenceError::Backend("injected write failure".into()));
        }
        Ok(())
    }
}

impl WorldPersistence for MemoryStore {
    fn load_world(&self, name: &str) -> Result<Option<WorldRecord>, PersistenceError> {
        self.check_read()?;
        Ok(self.lock().worlds.get(name).cloned())
    }

    fn save_world(&self, record: &WorldRecord) -> Result<(), PersistenceError> {
        self.check_write()?;
        self.lock().worlds.insert(record.name.clone(), record.clone());
        Ok(())
    }

    fn load_chunk(&self, world: &str, pos: ChunkPos) -> Result<Option<Vec<u8>>, PersistenceError> {
        self.check_read()?;
        Ok(self.lock().chunks.get(&(world.to_owned(), pos)).cloned())
    }

    fn save_chunk(&self, world: &str, pos: ChunkPos, data: &[u8]) -> Result<(), PersistenceError> {
        self.check_write()?;
        let key = (world.to_owned(), pos);
        let mut inner = self.lock();
        *inner.chunk_saves.entry(key.clone()).or_insert(0) += 1;
        inner.chunks.insert(key, data.to_vec());
        Ok(())
    }

    fn load_player(&self, uuid: Uuid) -> Result<Option<PlayerRecord>, PersistenceError> {
        self.check_read()?;
        Ok(self.lock().players.get(&uuid).cloned())
    }

    fn save_player(&self, record: &PlayerRecord) -> Result<(), PersistenceError> {
        self.check_write()?;
        let mut inner = self.lock();
        inner.player_saves += 1;
        inner.players.insert(record.uuid, record.clone());
        Ok(())
    }

    fn save_entity(&self, world: &str, record: &EntityRecord) -> Result<(), PersistenceError> {
        self.check_write()?;
        let mut inner = self.lock();
        inner.entity_saves += 1;
        inner
            .entities
            .insert((world.to_owned(), record.id), record.clone());
        Ok(())
    }

    fn delete_entity(&self, world: &str, id: EntityId) -> Result<(), PersistenceError> {
        self.check_write()?;
        self.lock().entities.remove(&(world.to_owned(), id));
        Ok(())
    }

    fn get_entities_in_chunk(
        &self,
        world: &str,
        pos: ChunkPos,
    ) -> Result<Vec<EntityRecord>, PersistenceError> {
        self.check_read()?;
        Ok(self
            .lock()
            .entities
            .iter()
            .filter(|((w, _), record)| w == world && record.chunk == pos)
            .map(|(_, record)| record.clone())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entity(id: u64, chunk: ChunkPos) -> EntityRecord {
        EntityRecord {
            id: EntityId(id),
            entity_type: 1,
            kind: "mob".into(),
            chunk,
            active: true,
            data: vec![1, 2, 3],
        }
    }

    #[test]
    fn absent_keys_are_none() {
        let store = MemoryStore::new();
        assert!(store.load_world("nope").unwrap().is_none());
        assert!(store.load_chunk("w", ChunkPos::new(0, 0)).unwrap().is_none());
        assert!(store.load_player(Uuid::nil()).unwrap().is_none());
        assert!(store
            .get_entities_in_chunk("w", ChunkPos::new(0, 0))
            .unwrap()
            .is_empty());
    }

    #[test]
    fn chunk_saves_are_counted_per_world() {
        let store = MemoryStore::new();
        let pos = ChunkPos::new(1, -1);
        store.save_chunk("a", pos, &[1]).unwrap();
        store.save_chunk("a", pos, &[2]).unwrap();
        store.save_chunk("b", pos, &[3]).unwrap();
        assert_eq!(store.chunk_save_count("a", pos), 2);
        assert_eq!(store.chunk_save_count("b", pos), 1);
        assert_eq!(store.total_chunk_saves(), 3);
        assert_eq!(store.load_chunk("a", pos).unwrap(), Some(vec![2]));
    }

    #[test]
    fn entities_filtered_by_world_and_chunk() {
        let store = MemoryStore::new();
        store.save_entity("w", &entity(1, ChunkPos::new(0, 0))).unwrap();
        store.save_entity("w", &entity(2, ChunkPos::new(0, 1))).unwrap();
        store.save_entity("other", &entity(3, ChunkPos::new(0, 0))).unwrap();

        let found = store.get_entities_in_chunk("w", ChunkPos::new(0, 0)).unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, EntityId(1));

        // Re-saving under a new chunk moves the record.
        store.save_entity("w", &entity(1, ChunkPos::new(0, 1))).unwrap();
        assert_eq!(
            store.get_entities_in_chunk("w", ChunkPos::new(0, 1)).unwrap().len(),
            2
        );

        store.delete_entity("w", EntityId(2)).unwrap();
        store.delete_entity("w", EntityId(99)).unwrap();
        assert_eq!(store.stored_entities("w"), 1);
    }

    #[test]
    fn injected_failures() {
        let store = MemoryStore::new();
        store.set_fail_writes(true);
        assert!(store.save_chunk("w", ChunkPos::new(0, 0), &[1]).is_err());
        assert_eq!(store.total_chunk_saves(), 0);
        store.set_fail_writes(false);
        store.save_chunk("w", ChunkPos::new(0, 0), &[1]).unwrap();

        store.set_fail_reads(true);
        assert!(matches!(
            store.load_chunk("w", ChunkPos::new(0, 0)),
            Err(PersistenceError::Backend(_))
        ));
    }
}
