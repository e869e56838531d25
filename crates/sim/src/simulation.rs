//! The per-tick entity loop and everything that registers or removes entities.

use crate::metrics::{ServerStats, TickTimer};
use blockworld_common::{ChunkPos, EntityId, SimConfig, WorldPersistence};
use blockworld_ecs::{Clock, Entity, EntityError, EntityFactory, EntityIdAllocator, TickContext};
use blockworld_kernel::WorldStore;
use blockworld_stream::{EntityIndex, ViewConfig, ViewTracker};
use glam::DVec3;
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

const TICK_HISTORY: usize = 100;

/// What one call to [`EntitySimulation::update`] did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickReport {
    pub updated: usize,
    pub removed: Vec<EntityId>,
    pub rebucketed: usize,
    pub chunks_requested: usize,
}

/// Owns the entity registry and drives it one tick at a time.
///
/// Players live in the general registry like every other entity; the
/// simulation additionally indexes them by id, by lower-cased username and
/// by UUID. Entity updates run in ascending id order.
pub struct EntitySimulation {
    index: EntityIndex,
    factory: EntityFactory,
    players: BTreeMap<EntityId, Uuid>,
    names: HashMap<String, EntityId>,
    uuids: HashMap<Uuid, EntityId>,
    view: ViewTracker,
    timer: TickTimer,
    /// Non-player entities removed since the last save, to be forgotten by persistence.
    removed: Vec<EntityId>,
}

impl EntitySimulation {
    pub fn new(config: &SimConfig, clock: Arc<dyn Clock>) -> Self {
        Self::with_factory(config, EntityFactory::new(Arc::new(EntityIdAllocator::new()), clock))
    }

    pub fn with_factory(config: &SimConfig, factory: EntityFactory) -> Self {
        Self {
            index: EntityIndex::new(config.max_entities),
            factory,
            players: BTreeMap::new(),
            names: HashMap::new(),
            uuids: HashMap::new(),
            view: ViewTracker::new(ViewConfig {
                view_distance: config.view_distance as i32,
                load_budget: config.chunk_load_budget,
            }),
            timer: TickTimer::new(TICK_HISTORY),
            removed: Vec::new(),
        }
    }

    pub fn index(&self) -> &EntityIndex {
        &self.index
    }

    pub fn factory(&self) -> &EntityFactory {
        &self.factory
    }

    pub fn view(&self) -> &ViewTracker {
        &self.view
    }

    pub fn tick_timer(&self) -> &TickTimer {
        &self.timer
    }

    /// Create an entity through the factory and register it.
    pub fn spawn_entity(
        &mut self,
        type_id: u32,
        position: DVec3,
        overrides: Option<&Map<String, Value>>,
    ) -> Result<EntityId, EntityError> {
        self.ensure_capacity()?;
        let entity = self
            .factory
            .create_entity(type_id, position, overrides)
            .ok_or_else(|| EntityError::Operation(format!("type {type_id} cannot be spawned directly")))?;
        let id = self.index.add_entity(entity)?;
        debug!(entity = %id, type_id, "entity spawned");
        Ok(id)
    }

    /// Register a new player. Usernames (case-insensitively) and UUIDs must be unique.
    pub fn add_player(&mut self, username: &str, uuid: Uuid, position: DVec3) -> Result<EntityId, EntityError> {
        let entity = Entity::new_player(self.factory.ids().allocate(), username, uuid, position);
        self.register_player(entity)
    }

    /// Restore a persisted player by UUID, or create one at `fallback`.
    pub fn join_player(
        &mut self,
        username: &str,
        uuid: Uuid,
        fallback: DVec3,
        store: &dyn WorldPersistence,
    ) -> Result<EntityId, EntityError> {
        let record = match store.load_player(uuid) {
            Ok(record) => record,
            Err(e) => {
                warn!(%uuid, error = %e, "player record unreadable, starting fresh");
                None
            }
        };
        let Some(mut record) = record else {
            return self.add_player(username, uuid, fallback);
        };
        record.username = username.to_owned();
        let entity = Entity::from_player_record(self.factory.ids().allocate(), &record);
        self.register_player(entity)
    }

    fn register_player(&mut self, entity: Entity) -> Result<EntityId, EntityError> {
        let Some(player) = entity.player() else {
            return Err(EntityError::Operation(format!("entity {} is not a player", entity.id)));
        };
        let key = player.username.to_lowercase();
        let uuid = player.uuid;
        if self.names.contains_key(&key) {
            return Err(EntityError::Operation(format!("player {} is already online", player.username)));
        }
        if self.uuids.contains_key(&uuid) {
            return Err(EntityError::Operation(format!("player {uuid} is already online")));
        }
        self.ensure_capacity()?;

        let id = self.index.add_entity(entity)?;
        self.players.insert(id, uuid);
        self.names.insert(key, id);
        self.uuids.insert(uuid, id);
        info!(entity = %id, %uuid, "player joined");
        Ok(id)
    }

    /// Remove a player from the registry and every player index.
    pub fn remove_player(&mut self, id: EntityId) -> Result<Entity, EntityError> {
        if !self.players.contains_key(&id) {
            return Err(EntityError::NotFound(id));
        }
        let entity = self.index.remove_entity(id)?;
        self.forget_player(&entity);
        info!(entity = %id, "player left");
        Ok(entity)
    }

    /// Save the player's record, then remove it. A failed save is logged.
    pub fn leave_player(&mut self, id: EntityId, store: &dyn WorldPersistence) -> Result<Entity, EntityError> {
        if let Some(record) = self.index.get(id).and_then(Entity::to_player_record) {
            if let Err(e) = store.save_player(&record) {
                tracing::error!(entity = %id, uuid = %record.uuid, error = %e, "player save failed on leave");
            }
        }
        self.remove_player(id)
    }

    fn forget_player(&mut self, entity: &Entity) {
        self.players.remove(&entity.id);
        if let Some(player) = entity.player() {
            self.names.remove(&player.username.to_lowercase());
            self.uuids.remove(&player.uuid);
        }
    }

    /// Remove any entity; players are routed through [`Self::remove_player`].
    pub fn despawn_entity(&mut self, id: EntityId) -> Result<Entity, EntityError> {
        if self.players.contains_key(&id) {
            return self.remove_player(id);
        }
        let entity = self.index.remove_entity(id)?;
        self.removed.push(id);
        debug!(entity = %id, "entity despawned");
        Ok(entity)
    }

    fn ensure_capacity(&self) -> Result<(), EntityError> {
        if self.index.is_full() {
            let limit = self.index.capacity();
            warn!(limit, "entity limit reached");
            return Err(EntityError::LimitExceeded { limit });
        }
        Ok(())
    }

    pub fn get_entity_by_id(&self, id: EntityId) -> Option<&Entity> {
        self.index.get(id)
    }

    /// Mutable access. Use [`Self::move_entity`] to change position.
    pub fn get_entity_by_id_mut(&mut self, id: EntityId) -> Option<&mut Entity> {
        self.index.get_mut(id)
    }

    pub fn get_player_by_name(&self, username: &str) -> Option<&Entity> {
        self.names
            .get(&username.to_lowercase())
            .and_then(|id| self.index.get(*id))
    }

    pub fn get_player_by_uuid(&self, uuid: Uuid) -> Option<&Entity> {
        self.uuids.get(&uuid).and_then(|id| self.index.get(*id))
    }

    pub fn players(&self) -> impl Iterator<Item = &Entity> {
        self.players.keys().filter_map(|id| self.index.get(*id))
    }

    pub fn get_entities_in_range(&self, center: DVec3, radius: f64) -> Vec<&Entity> {
        self.index.get_entities_in_range(center, radius)
    }

    pub fn get_entities_of_type(&self, entity_type: u32) -> Vec<&Entity> {
        self.index.get_entities_of_type(entity_type)
    }

    pub fn get_entities_in_chunks(&self, chunks: &[ChunkPos]) -> Vec<&Entity> {
        self.index.get_entities_in_chunks(chunks)
    }

    /// Teleport an entity, re-bucketing it and any passengers. Returns
    /// whether the entity changed chunk.
    pub fn move_entity(&mut self, id: EntityId, position: DVec3) -> Result<bool, EntityError> {
        let entity = self.index.get_mut(id).ok_or(EntityError::NotFound(id))?;
        entity.position = position;
        let changed = self.index.update_entity_chunk(id)?;
        self.sync_passengers_of(id);
        Ok(changed)
    }

    pub fn mount(&mut self, vehicle: EntityId, passenger: EntityId) -> Result<bool, EntityError> {
        let seated = self.index.mount(vehicle, passenger)?;
        if seated {
            self.sync_passengers_of(vehicle);
        }
        Ok(seated)
    }

    pub fn dismount(&mut self, passenger: EntityId) -> Result<bool, EntityError> {
        self.index.dismount(passenger)
    }

    pub fn entity_count(&self) -> usize {
        self.index.len()
    }

    pub fn player_count(&self) -> usize {
        self.players.len()
    }

    pub fn active_entity_count(&self) -> usize {
        self.index.iter().filter(|e| e.active).count()
    }

    /// Ids of non-player entities removed since the last call.
    pub fn drain_removed(&mut self) -> Vec<EntityId> {
        std::mem::take(&mut self.removed)
    }

    /// Put back removals whose persisted record could not be deleted, so the
    /// next save retries them.
    pub fn requeue_removed(&mut self, ids: Vec<EntityId>) {
        for id in ids {
            if !self.removed.contains(&id) {
                self.removed.push(id);
            }
        }
    }

    /// Register persisted entities of one chunk. Records already registered,
    /// inactive, or removed but not yet deleted are skipped. Returns how many
    /// were restored.
    pub fn load_chunk_entities(&mut self, pos: ChunkPos, world: &str, store: &dyn WorldPersistence) -> usize {
        let records = match store.get_entities_in_chunk(world, pos) {
            Ok(records) => records,
            Err(e) => {
                warn!(chunk = %pos, error = %e, "entity read failed, treating chunk as empty");
                return 0;
            }
        };

        let mut restored = 0;
        for record in records {
            if !record.active || self.index.contains(record.id) || self.removed.contains(&record.id) {
                continue;
            }
            let entity = match Entity::from_record(&record) {
                Ok(entity) => entity,
                Err(e) => {
                    warn!(entity = %record.id, error = %e, "skipping undecodable entity record");
                    continue;
                }
            };
            if entity.is_player() {
                continue;
            }
            self.factory.ids().observe(entity.id);
            match self.index.add_entity(entity) {
                Ok(_) => restored += 1,
                Err(EntityError::LimitExceeded { limit }) => {
                    warn!(limit, chunk = %pos, "entity limit reached while restoring chunk");
                    break;
                }
                Err(e) => warn!(entity = %record.id, error = %e, "entity not restored"),
            }
        }
        debug!(chunk = %pos, restored, "chunk entities restored");
        restored
    }

    /// Advance every entity one tick, then purge the inactive ones,
    /// re-bucket movers and keep the chunks around players resident.
    pub fn update(&mut self, tick: u64, world: &mut WorldStore) -> TickReport {
        let _span = tracing::info_span!("entity_tick", tick).entered();
        let start = Instant::now();
        let now = self.factory.clock().now();

        // Snapshot first: updates may deactivate entities.
        let ids = self.index.ids();
        let mut updated = 0;
        {
            let mut ctx = TickContext { world: &mut *world, now };
            for id in &ids {
                if let Some(entity) = self.index.get_mut(*id) {
                    entity.update(tick, &mut ctx);
                    updated += 1;
                }
            }
        }

        let vehicles: Vec<EntityId> = self
            .index
            .iter()
            .filter(|e| !e.passengers().is_empty())
            .map(|e| e.id)
            .collect();
        for vehicle in vehicles {
            self.sync_passengers_of(vehicle);
        }

        let store = world.persistence().cloned();
        let mut removed = Vec::new();
        for entity in self.index.purge_inactive() {
            if self.players.contains_key(&entity.id) {
                warn!(entity = %entity.id, "player deactivated and removed");
                if let (Some(store), Some(record)) = (&store, entity.to_player_record()) {
                    if let Err(e) = store.save_player(&record) {
                        tracing::error!(entity = %entity.id, uuid = %record.uuid, error = %e, "player save failed on removal");
                    }
                }
                self.forget_player(&entity);
            } else {
                self.removed.push(entity.id);
            }
            removed.push(entity.id);
        }

        let rebucketed = self.index.rebucket_all();
        let chunks_requested = self.touch_player_chunks(world);

        let elapsed = start.elapsed();
        self.timer.record(elapsed);
        tracing::trace!(updated, removed = removed.len(), rebucketed, ?elapsed, "tick complete");

        TickReport {
            updated,
            removed,
            rebucketed,
            chunks_requested,
        }
    }

    /// Make newly viewed chunks resident and refresh the recency of every
    /// chunk in view.
    fn touch_player_chunks(&mut self, world: &mut WorldStore) -> usize {
        let viewers: Vec<ChunkPos> = self.players().map(Entity::chunk).collect();
        let update = self.view.update(&viewers);
        for pos in &update.requested {
            world.get_chunk(*pos, true);
        }
        for pos in self.view.tracked() {
            world.get_chunk(*pos, false);
        }
        update.requested.len()
    }

    /// Move a vehicle's passengers onto its seat and re-bucket them.
    fn sync_passengers_of(&mut self, vehicle: EntityId) {
        let Some((seat, passengers)) = self.index.get(vehicle).and_then(|v| {
            let seat = v.position + v.vehicle()?.seat_offset();
            Some((seat, v.passengers().to_vec()))
        }) else {
            return;
        };
        for id in passengers {
            let Some(p) = self.index.get_mut(id) else {
                tracing::trace!(vehicle = %vehicle, passenger = %id, "skipping unregistered passenger");
                continue;
            };
            p.position = seat;
            p.velocity = DVec3::ZERO;
            if let Err(e) = self.index.update_entity_chunk(id) {
                tracing::trace!(passenger = %id, error = %e, "passenger not re-bucketed");
            }
        }
    }

    pub fn stats(&self, world: &WorldStore) -> ServerStats {
        ServerStats {
            players_online: self.players.len(),
            entities_loaded: self.index.len(),
            active_entities: self.active_entity_count(),
            chunks_resident: world.resident_count(),
            chunk_capacity: world.capacity(),
            avg_tick: self.timer.average(),
            max_tick: self.timer.max(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use blockworld_common::{BlockPos, WorldRecord};
    use blockworld_ecs::ManualClock;
    use blockworld_ecs::types::ids;
    use blockworld_kernel::blocks;
    use blockworld_persist::MemoryStore;
    use serde_json::json;

    fn config(max_entities: usize) -> SimConfig {
        SimConfig {
            max_entities,
            view_distance: 1,
            ..SimConfig::default()
        }
    }

    fn sim(max_entities: usize) -> (EntitySimulation, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(1000.0));
        (EntitySimulation::new(&config(max_entities), clock.clone()), clock)
    }

    fn world() -> WorldStore {
        WorldStore::new("test", 3, 64)
    }

    /// Place a stone slab at `y` covering `x0..=x1`, `z0..=z1` and return the
    /// height an entity standing on it would have.
    fn platform(world: &mut WorldStore, (x0, x1): (i32, i32), (z0, z1): (i32, i32), y: i32) -> f64 {
        for x in x0..=x1 {
            for z in z0..=z1 {
                world.set_block(BlockPos::new(x, y, z), blocks::STONE);
            }
        }
        f64::from(y + 1)
    }

    #[test]
    fn spawn_registers_in_chunk_bucket() {
        let (mut sim, _) = sim(10);
        let id = sim.spawn_entity(ids::ZOMBIE, DVec3::new(100.5, 64.0, 200.5), None).unwrap();
        let entity = sim.get_entity_by_id(id).unwrap();
        assert_eq!(entity.entity_type, ids::ZOMBIE);
        assert_eq!(entity.position, DVec3::new(100.5, 64.0, 200.5));
        assert!(sim.index().bucket(ChunkPos::new(6, 12)).unwrap().contains(&id));
    }

    #[test]
    fn spawn_limit() {
        let (mut sim, _) = sim(2);
        sim.spawn_entity(ids::PIG, DVec3::ZERO, None).unwrap();
        sim.spawn_entity(ids::PIG, DVec3::ZERO, None).unwrap();
        let err = sim.spawn_entity(ids::PIG, DVec3::ZERO, None).unwrap_err();
        assert_eq!(err, EntityError::LimitExceeded { limit: 2 });

        let first = sim.index().ids()[0];
        sim.despawn_entity(first).unwrap();
        assert!(sim.spawn_entity(ids::PIG, DVec3::ZERO, None).is_ok());
    }

    #[test]
    fn players_cannot_be_spawned() {
        let (mut sim, _) = sim(10);
        assert!(matches!(
            sim.spawn_entity(ids::PLAYER, DVec3::ZERO, None),
            Err(EntityError::Operation(_))
        ));
        assert_eq!(sim.entity_count(), 0);
    }

    #[test]
    fn add_and_remove_player_clears_every_index() {
        let (mut sim, _) = sim(10);
        let uuid = Uuid::new_v4();
        let id = sim.add_player("TestPlayer", uuid, DVec3::new(100.5, 64.0, 200.5)).unwrap();
        assert_eq!(sim.player_count(), 1);
        assert_eq!(sim.get_player_by_name("testplayer").unwrap().id, id);
        assert_eq!(sim.get_player_by_name("TESTPLAYER").unwrap().id, id);
        assert_eq!(sim.get_player_by_uuid(uuid).unwrap().id, id);
        assert!(sim.index().bucket(ChunkPos::new(6, 12)).unwrap().contains(&id));

        assert!(matches!(
            sim.add_player("testPLAYER", Uuid::new_v4(), DVec3::ZERO),
            Err(EntityError::Operation(_))
        ));

        sim.remove_player(id).unwrap();
        assert_eq!(sim.player_count(), 0);
        assert!(sim.get_entity_by_id(id).is_none());
        assert!(sim.get_player_by_name("TestPlayer").is_none());
        assert!(sim.get_player_by_uuid(uuid).is_none());
        assert!(sim.index().bucket(ChunkPos::new(6, 12)).is_none());
        assert_eq!(sim.remove_player(id).unwrap_err(), EntityError::NotFound(id));
    }

    #[test]
    fn join_restores_persisted_player() {
        let (mut sim, _) = sim(10);
        let store = MemoryStore::new();
        let uuid = Uuid::new_v4();

        let id = sim.join_player("Alex", uuid, DVec3::new(0.0, 70.0, 0.0), &store).unwrap();
        sim.get_entity_by_id_mut(id).unwrap().player_mut().unwrap().level = 7;
        sim.move_entity(id, DVec3::new(40.0, 80.0, -40.0)).unwrap();
        sim.leave_player(id, &store).unwrap();
        assert_eq!(store.player_save_count(), 1);

        let again = sim.join_player("alex", uuid, DVec3::ZERO, &store).unwrap();
        let player = sim.get_entity_by_id(again).unwrap();
        assert_ne!(again, id);
        assert_eq!(player.position, DVec3::new(40.0, 80.0, -40.0));
        assert_eq!(player.player().unwrap().level, 7);
        assert_eq!(player.player().unwrap().username, "alex");
    }

    #[test]
    fn join_falls_back_when_store_fails() {
        let (mut sim, _) = sim(10);
        let store = MemoryStore::new();
        store.set_fail_reads(true);
        let id = sim.join_player("Sam", Uuid::new_v4(), DVec3::new(1.0, 70.0, 1.0), &store).unwrap();
        assert_eq!(sim.get_entity_by_id(id).unwrap().position, DVec3::new(1.0, 70.0, 1.0));
    }

    #[test]
    fn range_and_chunk_queries() {
        let (mut sim, _) = sim(10);
        let a = sim.spawn_entity(ids::ZOMBIE, DVec3::new(100.0, 64.0, 100.0), None).unwrap();
        let b = sim.spawn_entity(ids::ZOMBIE, DVec3::new(105.0, 64.0, 100.0), None).unwrap();
        let c = sim.spawn_entity(ids::ZOMBIE, DVec3::new(120.0, 64.0, 100.0), None).unwrap();

        let near: Vec<_> = sim
            .get_entities_in_range(DVec3::new(100.0, 64.0, 100.0), 10.0)
            .iter()
            .map(|e| e.id)
            .collect();
        assert_eq!(near, vec![a, b]);

        let in_chunk: Vec<_> = sim
            .get_entities_in_chunks(&[ChunkPos::new(6, 6)])
            .iter()
            .map(|e| e.id)
            .collect();
        assert_eq!(in_chunk, vec![a, b]);
        assert_eq!(sim.get_entities_in_chunks(&[ChunkPos::new(7, 6)])[0].id, c);
        assert_eq!(sim.get_entities_of_type(ids::ZOMBIE).len(), 3);
    }

    #[test]
    fn update_applies_physics_and_rebuckets() {
        let (mut sim, _) = sim(10);
        let mut world = world();
        let ground = platform(&mut world, (14, 18), (0, 1), 180);
        let id = sim.spawn_entity(ids::ZOMBIE, DVec3::new(15.5, ground + 4.0, 0.5), None).unwrap();

        for t in 0..60 {
            sim.update(t, &mut world);
        }
        let zombie = sim.get_entity_by_id(id).unwrap();
        assert!(zombie.on_ground);
        assert_eq!(zombie.position.y, ground);

        sim.get_entity_by_id_mut(id).unwrap().velocity.x = 2.0;
        sim.update(60, &mut world);
        assert_eq!(sim.index().placement(id), Some(ChunkPos::new(1, 0)));
        assert!(sim.index().is_consistent());
    }

    #[test]
    fn update_purges_inactive_and_records_removal() {
        let (mut sim, clock) = sim(10);
        let mut world = world();
        let item = sim.spawn_entity(ids::ITEM, DVec3::new(0.5, 200.0, 0.5), None).unwrap();
        let mob = sim.spawn_entity(ids::COW, DVec3::new(0.5, 200.0, 0.5), None).unwrap();
        sim.get_entity_by_id_mut(mob).unwrap().damage(100.0);

        let report = sim.update(1, &mut world);
        assert_eq!(report.updated, 2);
        assert_eq!(report.removed, vec![mob]);
        assert!(sim.get_entity_by_id(item).is_some());

        clock.advance(301.0);
        let report = sim.update(2, &mut world);
        assert_eq!(report.removed, vec![item]);
        assert_eq!(sim.entity_count(), 0);
        assert_eq!(sim.drain_removed(), vec![mob, item]);
        assert!(sim.drain_removed().is_empty());
    }

    #[test]
    fn falling_block_writes_into_world() {
        let (mut sim, _) = sim(10);
        let mut world = world();
        let ground = platform(&mut world, (4, 4), (4, 4), 180);
        let extra = json!({ "block_id": 13 });
        let id = sim
            .spawn_entity(ids::FALLING_BLOCK, DVec3::new(4.5, ground + 3.0, 4.5), extra.as_object())
            .unwrap();
        for t in 0..100 {
            sim.update(t, &mut world);
            if sim.get_entity_by_id(id).is_none() {
                break;
            }
        }
        assert!(sim.get_entity_by_id(id).is_none());
        assert_eq!(world.get_block(BlockPos::new(4, ground as i32, 4)), 13);
    }

    #[test]
    fn passengers_follow_vehicle() {
        let (mut sim, _) = sim(10);
        let mut world = world();
        let boat = sim.spawn_entity(ids::BOAT, DVec3::new(0.5, 250.0, 0.5), None).unwrap();
        let rider = sim.add_player("rider", Uuid::new_v4(), DVec3::new(3.0, 250.0, 3.0)).unwrap();
        assert!(sim.mount(boat, rider).unwrap());

        sim.move_entity(boat, DVec3::new(40.5, 250.0, 0.5)).unwrap();
        let seat = sim.get_entity_by_id(rider).unwrap().position;
        assert_eq!(seat.x, 40.5);
        assert_eq!(sim.index().placement(rider), Some(ChunkPos::new(2, 0)));

        sim.update(1, &mut world);
        let boat_pos = sim.get_entity_by_id(boat).unwrap().position;
        let rider_pos = sim.get_entity_by_id(rider).unwrap().position;
        assert!(rider_pos.y > boat_pos.y);
        assert_eq!(rider_pos.x, boat_pos.x);

        sim.despawn_entity(boat).unwrap();
        assert_eq!(sim.get_entity_by_id(rider).unwrap().vehicle_id(), None);
        assert!(!sim.dismount(rider).unwrap());
    }

    #[test]
    fn stale_passenger_links_are_skipped() {
        let (mut sim, _) = sim(10);
        let mut world = world();
        let boat = sim.spawn_entity(ids::BOAT, DVec3::new(0.5, 250.0, 0.5), None).unwrap();
        let mut ghost = Entity::new_player(EntityId(999), "ghost", Uuid::new_v4(), DVec3::ZERO);
        assert!(sim.get_entity_by_id_mut(boat).unwrap().add_passenger(&mut ghost));

        sim.update(1, &mut world);
        assert!(sim.get_entity_by_id(boat).is_some());
        assert!(!sim.index().contains(EntityId(999)));
        assert!(sim.index().is_consistent());
    }

    #[test]
    fn player_lost_to_the_void_is_saved() {
        let (mut sim, _) = sim(10);
        let store = Arc::new(MemoryStore::new());
        let mut world = world().with_persistence(store.clone());
        let uuid = Uuid::new_v4();
        let id = sim.add_player("faller", uuid, DVec3::new(0.5, -60.0, 0.5)).unwrap();

        let mut removed = Vec::new();
        for tick in 0..40 {
            removed.extend(sim.update(tick, &mut world).removed);
            if !removed.is_empty() {
                break;
            }
        }
        assert_eq!(removed, vec![id]);
        assert!(sim.get_player_by_name("faller").is_none());
        assert!(sim.drain_removed().is_empty());

        let record = store.load_player(uuid).unwrap().unwrap();
        assert_eq!(record.username, "faller");
        assert!(record.position.y < -64.0);
    }

    #[test]
    fn players_keep_their_chunks_resident() {
        let clock = Arc::new(ManualClock::new(0.0));
        let mut sim = EntitySimulation::new(
            &SimConfig {
                view_distance: 1,
                chunk_load_budget: 100,
                ..SimConfig::default()
            },
            clock,
        );
        let mut world = WorldStore::new("test", 1, 9);
        sim.add_player("viewer", Uuid::new_v4(), DVec3::new(8.0, 100.0, 8.0)).unwrap();

        let report = sim.update(0, &mut world);
        assert_eq!(report.chunks_requested, 9);
        for x in -1..=1 {
            for z in -1..=1 {
                assert!(world.is_resident(ChunkPos::new(x, z)));
            }
        }
        let stats = sim.stats(&world);
        assert_eq!(stats.players_online, 1);
        assert_eq!(stats.chunks_resident, 9);
        assert_eq!(sim.tick_timer().count(), 1);
    }

    #[test]
    fn chunk_entities_restore_and_bump_ids() {
        let (mut sim, _) = sim(10);
        let store = MemoryStore::new();
        store.save_world(&WorldRecord::new("test", 1)).unwrap();

        let mut donor = EntitySimulation::new(&config(10), Arc::new(ManualClock::new(0.0)));
        for _ in 0..5 {
            donor.spawn_entity(ids::SHEEP, DVec3::new(2.0, 70.0, 2.0), None).unwrap();
        }
        for e in donor.index().iter() {
            store.save_entity("test", &e.to_record().unwrap()).unwrap();
        }

        assert_eq!(sim.load_chunk_entities(ChunkPos::new(0, 0), "test", &store), 5);
        assert_eq!(sim.load_chunk_entities(ChunkPos::new(0, 0), "test", &store), 0);
        let fresh = sim.spawn_entity(ids::PIG, DVec3::ZERO, None).unwrap();
        assert_eq!(fresh, EntityId(6));
    }
}
