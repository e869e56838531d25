use blockworld_common::{ChunkPos, EntityId};
use blockworld_ecs::{Entity, EntityError};
use glam::DVec3;
use std::collections::{BTreeMap, BTreeSet};

/// Authoritative entity registry bucketed by chunk.
///
/// Owns every registered entity. Each id sits in exactly one chunk bucket:
/// the one recorded in `placements`, which `update_entity_chunk` keeps equal
/// to the chunk of the entity's current position. Iteration is in id order,
/// so queries are deterministic for a fixed registry state.
pub struct EntityIndex {
    entities: BTreeMap<EntityId, Entity>,
    chunks: BTreeMap<ChunkPos, BTreeSet<EntityId>>,
    placements: BTreeMap<EntityId, ChunkPos>,
    capacity: usize,
}

impl EntityIndex {
    pub fn new(capacity: usize) -> Self {
        Self {
            entities: BTreeMap::new(),
            chunks: BTreeMap::new(),
            placements: BTreeMap::new(),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.entities.len() >= self.capacity
    }

    pub fn contains(&self, id: EntityId) -> bool {
        self.entities.contains_key(&id)
    }

    /// Register an entity under the bucket of its current chunk.
    pub fn add_entity(&mut self, entity: Entity) -> Result<EntityId, EntityError> {
        let id = entity.id;
        if self.entities.contains_key(&id) {
            return Err(EntityError::Operation(format!("entity {id} is already registered")));
        }
        if self.is_full() {
            return Err(EntityError::LimitExceeded {
                limit: self.capacity,
            });
        }
        let chunk = entity.chunk();
        self.chunks.entry(chunk).or_default().insert(id);
        self.placements.insert(id, chunk);
        self.entities.insert(id, entity);
        tracing::trace!(entity = %id, %chunk, "entity registered");
        Ok(id)
    }

    /// Unregister an entity, detaching any vehicle links in either direction.
    pub fn remove_entity(&mut self, id: EntityId) -> Result<Entity, EntityError> {
        let mut entity = self.entities.remove(&id).ok_or(EntityError::NotFound(id))?;
        if let Some(chunk) = self.placements.remove(&id) {
            self.unbucket(id, chunk);
        }

        if let Some(vehicle) = entity.leave_vehicle().and_then(|v| self.entities.get_mut(&v)) {
            vehicle.detach_passenger(id);
        }
        for passenger in entity.passengers().to_vec() {
            if let Some(p) = self.entities.get_mut(&passenger) {
                p.leave_vehicle();
            }
            entity.detach_passenger(passenger);
        }
        tracing::trace!(entity = %id, "entity unregistered");
        Ok(entity)
    }

    /// Move the entity's id to the bucket matching its current position.
    /// Returns whether the bucket changed.
    pub fn update_entity_chunk(&mut self, id: EntityId) -> Result<bool, EntityError> {
        let Some(entity) = self.entities.get(&id) else {
            return Err(EntityError::Operation(format!("entity {id} is not registered")));
        };
        let current = entity.chunk();
        let previous = self.placements.insert(id, current);
        if previous == Some(current) {
            return Ok(false);
        }
        if let Some(old) = previous {
            self.unbucket(id, old);
        }
        self.chunks.entry(current).or_default().insert(id);
        tracing::trace!(entity = %id, from = ?previous, to = %current, "entity changed chunk");
        Ok(true)
    }

    /// Re-bucket every entity. Returns how many changed chunk.
    pub fn rebucket_all(&mut self) -> usize {
        let ids: Vec<EntityId> = self.entities.keys().copied().collect();
        ids.into_iter()
            .filter(|id| self.update_entity_chunk(*id).unwrap_or(false))
            .count()
    }

    fn unbucket(&mut self, id: EntityId, chunk: ChunkPos) {
        if let Some(bucket) = self.chunks.get_mut(&chunk) {
            bucket.remove(&id);
            if bucket.is_empty() {
                self.chunks.remove(&chunk);
            }
        }
    }

    pub fn get(&self, id: EntityId) -> Option<&Entity> {
        self.entities.get(&id)
    }

    /// Mutable access. Callers that move the entity must follow up with
    /// [`EntityIndex::update_entity_chunk`].
    pub fn get_mut(&mut self, id: EntityId) -> Option<&mut Entity> {
        self.entities.get_mut(&id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Entity> {
        self.entities.values()
    }

    /// Registered ids in ascending order.
    pub fn ids(&self) -> Vec<EntityId> {
        self.entities.keys().copied().collect()
    }

    /// The bucket an entity is filed under.
    pub fn placement(&self, id: EntityId) -> Option<ChunkPos> {
        self.placements.get(&id).copied()
    }

    pub fn bucket(&self, chunk: ChunkPos) -> Option<&BTreeSet<EntityId>> {
        self.chunks.get(&chunk)
    }

    /// Number of non-empty chunk buckets.
    pub fn chunk_count(&self) -> usize {
        self.chunks.len()
    }

    /// Entities within Euclidean `radius` of `center`.
    pub fn get_entities_in_range(&self, center: DVec3, radius: f64) -> Vec<&Entity> {
        let radius_sq = radius * radius;
        self.entities
            .values()
            .filter(|e| e.position.distance_squared(center) <= radius_sq)
            .collect()
    }

    pub fn get_entities_of_type(&self, entity_type: u32) -> Vec<&Entity> {
        self.entities
            .values()
            .filter(|e| e.entity_type == entity_type)
            .collect()
    }

    pub fn get_entities_in_chunk(&self, chunk: ChunkPos) -> Vec<&Entity> {
        self.get_entities_in_chunks(&[chunk])
    }

    /// Entities bucketed in any of `chunks`; duplicate chunks are ignored.
    pub fn get_entities_in_chunks(&self, chunks: &[ChunkPos]) -> Vec<&Entity> {
        let wanted: BTreeSet<ChunkPos> = chunks.iter().copied().collect();
        let ids: BTreeSet<EntityId> = wanted
            .iter()
            .filter_map(|c| self.chunks.get(c))
            .flatten()
            .copied()
            .collect();
        ids.iter().filter_map(|id| self.entities.get(id)).collect()
    }

    /// Seat `passenger` in `vehicle`. Returns false when the vehicle refuses.
    pub fn mount(&mut self, vehicle: EntityId, passenger: EntityId) -> Result<bool, EntityError> {
        if vehicle == passenger {
            return Err(EntityError::Operation(format!("entity {vehicle} cannot ride itself")));
        }
        if !self.entities.contains_key(&passenger) {
            return Err(EntityError::NotFound(passenger));
        }
        let mut carrier = self.entities.remove(&vehicle).ok_or(EntityError::NotFound(vehicle))?;
        let seated = self
            .entities
            .get_mut(&passenger)
            .is_some_and(|p| carrier.add_passenger(p));
        self.entities.insert(vehicle, carrier);
        Ok(seated)
    }

    /// Unseat `passenger` from whatever it rides. Returns false if it rode nothing.
    pub fn dismount(&mut self, passenger: EntityId) -> Result<bool, EntityError> {
        let rider = self
            .entities
            .get_mut(&passenger)
            .ok_or(EntityError::NotFound(passenger))?;
        let Some(vehicle) = rider.leave_vehicle() else {
            return Ok(false);
        };
        if let Some(v) = self.entities.get_mut(&vehicle) {
            v.detach_passenger(passenger);
        }
        Ok(true)
    }

    /// Remove every inactive entity, returning them in id order.
    pub fn purge_inactive(&mut self) -> Vec<Entity> {
        let dead: Vec<EntityId> = self
            .entities
            .values()
            .filter(|e| !e.active)
            .map(|e| e.id)
            .collect();
        dead.into_iter()
            .filter_map(|id| self.remove_entity(id).ok())
            .collect()
    }

    /// Check the bucket invariant for every entity.
    pub fn is_consistent(&self) -> bool {
        let filed: usize = self.chunks.values().map(BTreeSet::len).sum();
        filed == self.entities.len()
            && self.placements.len() == self.entities.len()
            && self.entities.values().all(|e| {
                let chunk = e.chunk();
                self.placements.get(&e.id) == Some(&chunk)
                    && self.chunks.get(&chunk).is_some_and(|b| b.contains(&e.id))
            })
    }
}
