//! Periodic saving of the world record, dirty chunks, players and entities.

use crate::simulation::EntitySimulation;
use blockworld_common::WorldPersistence;
use blockworld_kernel::WorldStore;
use tracing::{error, info};

/// Counts from one save pass. Failures are counted, never propagated.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SaveReport {
    pub world_saved: bool,
    pub chunks_saved: usize,
    pub players_saved: usize,
    pub players_failed: usize,
    pub entities_saved: usize,
    pub entities_failed: usize,
    pub entities_deleted: usize,
    pub entities_delete_failed: usize,
}

impl SaveReport {
    pub fn failures(&self) -> usize {
        usize::from(!self.world_saved) + self.players_failed + self.entities_failed + self.entities_delete_failed
    }
}

/// Triggers a full save once `interval_secs` of clock time have passed.
#[derive(Debug, Clone)]
pub struct AutoSaver {
    interval_secs: f64,
    last_save: f64,
}

impl AutoSaver {
    pub fn new(interval_secs: u64, now: f64) -> Self {
        Self {
            interval_secs: interval_secs as f64,
            last_save: now,
        }
    }

    pub fn last_save(&self) -> f64 {
        self.last_save
    }

    pub fn is_due(&self, now: f64) -> bool {
        now - self.last_save >= self.interval_secs
    }

    /// Save if the interval has elapsed.
    pub fn check(
        &mut self,
        now: f64,
        world: &mut WorldStore,
        sim: &mut EntitySimulation,
        store: &dyn WorldPersistence,
    ) -> Option<SaveReport> {
        if !self.is_due(now) {
            return None;
        }
        let report = save_state(world, sim, store);
        self.last_save = now;
        Some(report)
    }
}

/// Save everything once: world record, modified chunks, online players,
/// live non-player entities, and deletions for entities removed since the
/// previous save.
pub fn save_state(world: &mut WorldStore, sim: &mut EntitySimulation, store: &dyn WorldPersistence) -> SaveReport {
    let _span = tracing::info_span!("auto_save", world = world.name()).entered();
    let mut report = SaveReport::default();

    match store.save_world(world.world()) {
        Ok(()) => report.world_saved = true,
        Err(e) => error!(error = %e, "world record save failed"),
    }
    report.chunks_saved = world.save_all();

    for player in sim.players() {
        let Some(record) = player.to_player_record() else {
            continue;
        };
        match store.save_player(&record) {
            Ok(()) => report.players_saved += 1,
            Err(e) => {
                error!(uuid = %record.uuid, error = %e, "player save failed");
                report.players_failed += 1;
            }
        }
    }

    let world_name = world.name().to_owned();
    for entity in sim.index().iter().filter(|e| e.active && !e.is_player()) {
        let saved = entity
            .to_record()
            .map_err(|e| e.to_string())
            .and_then(|record| store.save_entity(&world_name, &record).map_err(|e| e.to_string()));
        match saved {
            Ok(()) => report.entities_saved += 1,
            Err(e) => {
                error!(entity = %entity.id, error = %e, "entity save failed");
                report.entities_failed += 1;
            }
        }
    }

    let mut undeleted = Vec::new();
    for id in sim.drain_removed() {
        match store.delete_entity(&world_name, id) {
            Ok(()) => report.entities_deleted += 1,
            Err(e) => {
                error!(entity = %id, error = %e, "entity delete failed, retrying next save");
                undeleted.push(id);
            }
        }
    }
    report.entities_delete_failed = undeleted.len();
    sim.requeue_removed(undeleted);

    info!(
        chunks = report.chunks_saved,
        players = report.players_saved,
        entities = report.entities_saved,
        deleted = report.entities_deleted,
        failures = report.failures(),
        "world saved"
    );
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use blockworld_common::{BlockPos, ChunkPos, SimConfig};
    use blockworld_ecs::ManualClock;
    use blockworld_ecs::types::ids;
    use blockworld_persist::MemoryStore;
    use glam::DVec3;
    use std::sync::Arc;
    use uuid::Uuid;

    fn setup() -> (WorldStore, EntitySimulation, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        let world = WorldStore::new("saves", 9, 16).with_persistence(store.clone());
        let sim = EntitySimulation::new(&SimConfig::default(), Arc::new(ManualClock::new(0.0)));
        (world, sim, store)
    }

    #[test]
    fn interval_gates_saving() {
        let (mut world, mut sim, store) = setup();
        let mut saver = AutoSaver::new(300, 0.0);
        assert!(saver.check(299.0, &mut world, &mut sim, store.as_ref()).is_none());
        assert!(saver.check(300.0, &mut world, &mut sim, store.as_ref()).is_some());
        assert_eq!(saver.last_save(), 300.0);
        assert!(!saver.is_due(599.0));
        assert!(saver.is_due(600.0));
    }

    #[test]
    fn saves_world_chunks_players_and_entities() {
        let (mut world, mut sim, store) = setup();
        world.set_block(BlockPos::new(1, 100, 1), 5);
        world.get_chunk(ChunkPos::new(3, 3), true);
        let uuid = Uuid::new_v4();
        sim.add_player("saver", uuid, DVec3::new(0.0, 100.0, 0.0)).unwrap();
        let pig = sim.spawn_entity(ids::PIG, DVec3::new(1.0, 90.0, 1.0), None).unwrap();

        let report = save_state(&mut world, &mut sim, store.as_ref());
        assert!(report.world_saved);
        assert_eq!(report.chunks_saved, 2);
        assert_eq!(report.players_saved, 1);
        assert_eq!(report.entities_saved, 1);
        assert_eq!(report.failures(), 0);

        assert!(store.load_world("saves").unwrap().is_some());
        assert!(store.load_player(uuid).unwrap().is_some());
        assert!(store.has_chunk("saves", ChunkPos::new(0, 0)));
        assert!(store.has_chunk("saves", ChunkPos::new(3, 3)));
        assert_eq!(save_state(&mut world, &mut sim, store.as_ref()).chunks_saved, 0);
        assert_eq!(store.stored_entities("saves"), 1);
        let restored = store.get_entities_in_chunk("saves", ChunkPos::new(0, 0)).unwrap();
        assert_eq!(restored[0].id, pig);
    }

    #[test]
    fn removed_entities_are_deleted() {
        let (mut world, mut sim, store) = setup();
        let cow = sim.spawn_entity(ids::COW, DVec3::new(2.0, 90.0, 2.0), None).unwrap();
        save_state(&mut world, &mut sim, store.as_ref());
        assert_eq!(store.stored_entities("saves"), 1);

        sim.despawn_entity(cow).unwrap();
        let report = save_state(&mut world, &mut sim, store.as_ref());
        assert_eq!(report.entities_deleted, 1);
        assert_eq!(store.stored_entities("saves"), 0);

        let mut fresh = EntitySimulation::new(&SimConfig::default(), Arc::new(ManualClock::new(0.0)));
        assert_eq!(fresh.load_chunk_entities(ChunkPos::new(0, 0), "saves", store.as_ref()), 0);
    }

    #[test]
    fn write_failures_are_counted_not_raised() {
        let (mut world, mut sim, store) = setup();
        sim.add_player("p", Uuid::new_v4(), DVec3::ZERO).unwrap();
        sim.spawn_entity(ids::ZOMBIE, DVec3::ZERO, None).unwrap();
        store.set_fail_writes(true);

        let report = save_state(&mut world, &mut sim, store.as_ref());
        assert!(!report.world_saved);
        assert_eq!(report.players_failed, 1);
        assert_eq!(report.entities_failed, 1);
        assert_eq!(report.failures(), 3);
    }

    #[test]
    fn failed_deletes_are_retried() {
        let (mut world, mut sim, store) = setup();
        let cow = sim.spawn_entity(ids::COW, DVec3::new(2.0, 90.0, 2.0), None).unwrap();
        save_state(&mut world, &mut sim, store.as_ref());
        sim.despawn_entity(cow).unwrap();

        store.set_fail_writes(true);
        let report = save_state(&mut world, &mut sim, store.as_ref());
        assert_eq!(report.entities_deleted, 0);
        assert_eq!(report.entities_delete_failed, 1);
        assert_eq!(store.stored_entities("saves"), 1);
        // Still pending, so the stale record is not restored meanwhile.
        assert_eq!(sim.load_chunk_entities(ChunkPos::new(0, 0), "saves", store.as_ref()), 0);

        store.set_fail_writes(false);
        let report = save_state(&mut world, &mut sim, store.as_ref());
        assert_eq!(report.entities_deleted, 1);
        assert_eq!(report.failures(), 0);
        assert_eq!(store.stored_entities("saves"), 0);

        let mut fresh = EntitySimulation::new(&SimConfig::default(), Arc::new(ManualClock::new(0.0)));
        assert_eq!(fresh.load_chunk_entities(ChunkPos::new(0, 0), "saves", store.as_ref()), 0);
    }
}
