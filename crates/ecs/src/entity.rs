//! Entities: a shared base plus one payload per variant.
//!
//! # Invariants
//! - `chunk()` is derived from the current position on every call, never cached.
//! - Health stays within `[0, max_health]`. A mob reaching 0 deactivates; its
//!   owner removes it.
//! - Vehicle and passenger refer to each other by id only. The vehicle keeps
//!   the ordered passenger list; the passenger keeps `data["vehicle"]`.

use crate::error::EntityError;
use crate::ids::EntityIdAllocator;
use crate::types;
use blockworld_common::{
    AIR, BlockAccess, BlockId, BlockPos, ChunkPos, EntityId, EntityRecord, ItemStack, PlayerRecord,
};
use glam::DVec3;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use uuid::Uuid;

/// Downward acceleration per tick, in blocks.
pub const GRAVITY: f64 = 0.08;
pub const TERMINAL_VELOCITY: f64 = 3.92;
pub const GROUND_FRICTION: f64 = 0.6;
/// Entities below this height have fallen out of the world.
pub const VOID_Y: f64 = -64.0;

pub const PLAYER_MAX_HEALTH: f32 = 20.0;
pub const PLAYER_MAX_FOOD: u32 = 20;
pub const REGEN_INTERVAL: u64 = 80;
pub const REGEN_MIN_FOOD: u32 = 18;

pub const ATTACK_COOLDOWN: u64 = 20;
pub const BREED_COOLDOWN: u64 = 6000;
pub const GROW_UP_TICKS: u64 = 24_000;

pub const ITEM_DESPAWN_SECS: f64 = 300.0;
pub const ITEM_PICKUP_DELAY: u32 = 10;
pub const PROJECTILE_STUCK_TICKS: u32 = 1200;
pub const FALLING_BLOCK_MAX_TICKS: u32 = 6000;

const VEHICLE_KEY: &str = "vehicle";
const GROUND_PROBE: f64 = 1.0e-3;

/// What an entity may touch while it updates.
pub struct TickContext<'a> {
    pub world: &'a mut dyn BlockAccess,
    /// Wall-clock seconds, for item despawn.
    pub now: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayerState {
    pub uuid: Uuid,
    pub username: String,
    pub health: f32,
    pub food_level: u32,
    pub experience: f32,
    pub level: u32,
    pub inventory: BTreeMap<u16, ItemStack>,
}

impl PlayerState {
    pub fn new(username: impl Into<String>, uuid: Uuid) -> Self {
        Self {
            uuid,
            username: username.into(),
            health: PLAYER_MAX_HEALTH,
            food_level: PLAYER_MAX_FOOD,
            experience: 0.0,
            level: 0,
            inventory: BTreeMap::new(),
        }
    }

    fn update(&mut self, tick: u64) {
        if tick % REGEN_INTERVAL == 0
            && self.food_level >= REGEN_MIN_FOOD
            && self.health < PLAYER_MAX_HEALTH
        {
            self.health = (self.health + 1.0).min(PLAYER_MAX_HEALTH);
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HostileState {
    pub attack_damage: f32,
    pub attack_cooldown: u64,
    /// Tick of the last successful attack.
    pub last_attack: Option<u64>,
}

impl HostileState {
    pub fn can_attack(&self, tick: u64) -> bool {
        match self.last_attack {
            None => true,
            Some(at) => tick >= at.saturating_add(self.attack_cooldown),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PassiveState {
    pub is_baby: bool,
    /// Tick of birth; set on the first update for babies created without one.
    pub born_at: Option<u64>,
    /// First tick at which breeding is allowed again.
    pub breed_ready_at: u64,
}

impl PassiveState {
    pub fn can_breed(&self, tick: u64) -> bool {
        !self.is_baby && tick >= self.breed_ready_at
    }

    fn update(&mut self, tick: u64) {
        if !self.is_baby {
            return;
        }
        let born = *self.born_at.get_or_insert(tick);
        if tick >= born.saturating_add(GROW_UP_TICKS) {
            self.is_baby = false;
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum MobBehavior {
    Hostile(HostileState),
    Passive(PassiveState),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MobState {
    pub health: f32,
    pub max_health: f32,
    pub behavior: MobBehavior,
}

impl MobState {
    pub fn hostile(type_id: u32) -> Self {
        let max_health = types::mob_max_health(type_id);
        Self {
            health: max_health,
            max_health,
            behavior: MobBehavior::Hostile(HostileState {
                attack_damage: types::hostile_attack_damage(type_id),
                attack_cooldown: ATTACK_COOLDOWN,
                last_attack: None,
            }),
        }
    }

    pub fn passive(type_id: u32) -> Self {
        let max_health = types::mob_max_health(type_id);
        Self {
            health: max_health,
            max_health,
            behavior: MobBehavior::Passive(PassiveState {
                is_baby: false,
                born_at: None,
                breed_ready_at: 0,
            }),
        }
    }

    pub fn is_hostile(&self) -> bool {
        matches!(self.behavior, MobBehavior::Hostile(_))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemState {
    pub stack: ItemStack,
    /// Ticks until the item may be picked up.
    pub pickup_delay: u32,
    /// Wall-clock second at which the item despawns.
    pub despawn_at: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectileState {
    pub shooter: Option<EntityId>,
    pub damage: f32,
    pub in_ground: bool,
    pub ticks_in_ground: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VehicleState {
    pub width: f64,
    pub height: f64,
    pub max_passengers: usize,
    pub passengers: Vec<EntityId>,
}

impl VehicleState {
    pub fn for_type(type_id: u32) -> Self {
        let (width, height, max_passengers) = types::vehicle_profile(type_id);
        Self {
            width,
            height,
            max_passengers,
            passengers: Vec::new(),
        }
    }

    /// Where a passenger sits relative to the vehicle's position.
    pub fn seat_offset(&self) -> DVec3 {
        DVec3::new(0.0, self.height, 0.0)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FallingBlockState {
    pub block_id: BlockId,
    pub data_value: u8,
    pub ticks_existed: u32,
}

/// Variant payloads.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum EntityKind {
    /// Unknown type ids: base behaviour only.
    Generic,
    Player(PlayerState),
    Mob(MobState),
    Item(ItemState),
    Projectile(ProjectileState),
    Vehicle(VehicleState),
    FallingBlock(FallingBlockState),
}

/// One actor in the world.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    pub id: EntityId,
    pub entity_type: u32,
    pub position: DVec3,
    pub yaw: f32,
    pub pitch: f32,
    pub velocity: DVec3,
    pub on_ground: bool,
    pub active: bool,
    pub affected_by_gravity: bool,
    /// Open attribute bag for type-specific or transient data.
    pub data: Map<String, Value>,
    pub kind: EntityKind,
}

impl Entity {
    /// Players are positioned by their client and do not fall.
    pub fn new(id: EntityId, entity_type: u32, position: DVec3, kind: EntityKind) -> Self {
        let affected_by_gravity = !matches!(kind, EntityKind::Player(_));
        Self {
            id,
            entity_type,
            position,
            yaw: 0.0,
            pitch: 0.0,
            velocity: DVec3::ZERO,
            on_ground: false,
            active: true,
            affected_by_gravity,
            data: Map::new(),
            kind,
        }
    }

    pub fn new_player(id: EntityId, username: impl Into<String>, uuid: Uuid, position: DVec3) -> Self {
        Self::new(
            id,
            types::ids::PLAYER,
            position,
            EntityKind::Player(PlayerState::new(username, uuid)),
        )
    }

    pub fn chunk(&self) -> ChunkPos {
        ChunkPos::from_world(self.position.x, self.position.z)
    }

    pub fn block_pos(&self) -> BlockPos {
        BlockPos::containing(self.position)
    }

    /// Variant tag used in persisted records.
    pub fn kind_name(&self) -> &'static str {
        match self.kind {
            EntityKind::Generic => "generic",
            EntityKind::Player(_) => "player",
            EntityKind::Mob(_) => "mob",
            EntityKind::Item(_) => "item",
            EntityKind::Projectile(_) => "projectile",
            EntityKind::Vehicle(_) => "vehicle",
            EntityKind::FallingBlock(_) => "falling_block",
        }
    }

    pub fn is_player(&self) -> bool {
        matches!(self.kind, EntityKind::Player(_))
    }

    pub fn player(&self) -> Option<&PlayerState> {
        match &self.kind {
            EntityKind::Player(p) => Some(p),
            _ => None,
        }
    }

    pub fn player_mut(&mut self) -> Option<&mut PlayerState> {
        match &mut self.kind {
            EntityKind::Player(p) => Some(p),
            _ => None,
        }
    }

    pub fn mob(&self) -> Option<&MobState> {
        match &self.kind {
            EntityKind::Mob(m) => Some(m),
            _ => None,
        }
    }

    pub fn mob_mut(&mut self) -> Option<&mut MobState> {
        match &mut self.kind {
            EntityKind::Mob(m) => Some(m),
            _ => None,
        }
    }

    pub fn hostile(&self) -> Option<&HostileState> {
        match self.mob().map(|m| &m.behavior) {
            Some(MobBehavior::Hostile(h)) => Some(h),
            _ => None,
        }
    }

    fn hostile_mut(&mut self) -> Option<&mut HostileState> {
        match self.mob_mut().map(|m| &mut m.behavior) {
            Some(MobBehavior::Hostile(h)) => Some(h),
            _ => None,
        }
    }

    pub fn passive(&self) -> Option<&PassiveState> {
        match self.mob().map(|m| &m.behavior) {
            Some(MobBehavior::Passive(p)) => Some(p),
            _ => None,
        }
    }

    fn passive_mut(&mut self) -> Option<&mut PassiveState> {
        match self.mob_mut().map(|m| &mut m.behavior) {
            Some(MobBehavior::Passive(p)) => Some(p),
            _ => None,
        }
    }

    pub fn item(&self) -> Option<&ItemState> {
        match &self.kind {
            EntityKind::Item(i) => Some(i),
            _ => None,
        }
    }

    pub fn projectile(&self) -> Option<&ProjectileState> {
        match &self.kind {
            EntityKind::Projectile(p) => Some(p),
            _ => None,
        }
    }

    pub fn vehicle(&self) -> Option<&VehicleState> {
        match &self.kind {
            EntityKind::Vehicle(v) => Some(v),
            _ => None,
        }
    }

    fn vehicle_mut(&mut self) -> Option<&mut VehicleState> {
        match &mut self.kind {
            EntityKind::Vehicle(v) => Some(v),
            _ => None,
        }
    }

    pub fn falling_block(&self) -> Option<&FallingBlockState> {
        match &self.kind {
            EntityKind::FallingBlock(f) => Some(f),
            _ => None,
        }
    }

    pub fn health(&self) -> Option<f32> {
        match &self.kind {
            EntityKind::Mob(m) => Some(m.health),
            EntityKind::Player(p) => Some(p.health),
            _ => None,
        }
    }

    /// Reduce health, clamped at zero. A mob at zero health deactivates.
    /// Returns false for entities without health.
    pub fn damage(&mut self, amount: f32) -> bool {
        let amount = amount.max(0.0);
        match &mut self.kind {
            EntityKind::Mob(m) => {
                m.health = (m.health - amount).clamp(0.0, m.max_health);
                if m.health <= 0.0 {
                    self.active = false;
                }
                true
            }
            EntityKind::Player(p) => {
                p.health = (p.health - amount).clamp(0.0, PLAYER_MAX_HEALTH);
                true
            }
            _ => false,
        }
    }

    pub fn heal(&mut self, amount: f32) -> bool {
        let amount = amount.max(0.0);
        match &mut self.kind {
            EntityKind::Mob(m) => {
                m.health = (m.health + amount).clamp(0.0, m.max_health);
                true
            }
            EntityKind::Player(p) => {
                p.health = (p.health + amount).clamp(0.0, PLAYER_MAX_HEALTH);
                true
            }
            _ => false,
        }
    }

    pub fn can_attack(&self, tick: u64) -> bool {
        self.active && self.hostile().is_some_and(|h| h.can_attack(tick))
    }

    /// Hit `target` if the attack cooldown has elapsed. On success the
    /// cooldown restarts at `tick`.
    pub fn attack(&mut self, target: &mut Entity, tick: u64) -> bool {
        if !self.can_attack(tick) || !target.active {
            return false;
        }
        let Some(hostile) = self.hostile_mut() else {
            return false;
        };
        if !target.damage(hostile.attack_damage) {
            return false;
        }
        hostile.last_attack = Some(tick);
        true
    }

    pub fn can_breed(&self, tick: u64) -> bool {
        self.active && self.passive().is_some_and(|p| p.can_breed(tick))
    }

    /// Breed with a partner of the same type. The baby gets half of this
    /// parent's current health; both parents enter the breeding cooldown.
    pub fn breed(&mut self, partner: &mut Entity, tick: u64, ids: &EntityIdAllocator) -> Option<Entity> {
        if self.entity_type != partner.entity_type || !self.can_breed(tick) || !partner.can_breed(tick) {
            return None;
        }
        let parent = self.mob()?;
        let baby_state = MobState {
            health: parent.health / 2.0,
            max_health: parent.max_health,
            behavior: MobBehavior::Passive(PassiveState {
                is_baby: true,
                born_at: Some(tick),
                breed_ready_at: 0,
            }),
        };
        for mob in [self.passive_mut()?, partner.passive_mut()?] {
            mob.breed_ready_at = tick.saturating_add(BREED_COOLDOWN);
        }
        let midpoint = (self.position + partner.position) / 2.0;
        Some(Entity::new(
            ids.allocate(),
            self.entity_type,
            midpoint,
            EntityKind::Mob(baby_state),
        ))
    }

    /// The vehicle this entity is riding, if any.
    pub fn vehicle_id(&self) -> Option<EntityId> {
        self.data.get(VEHICLE_KEY).and_then(Value::as_u64).map(EntityId)
    }

    pub fn passengers(&self) -> &[EntityId] {
        self.vehicle().map(|v| v.passengers.as_slice()).unwrap_or(&[])
    }

    /// Seat `passenger` in this vehicle. Fails when this is not a vehicle,
    /// it is full, or the passenger already rides something.
    pub fn add_passenger(&mut self, passenger: &mut Entity) -> bool {
        if passenger.id == self.id || passenger.vehicle_id().is_some() {
            return false;
        }
        let vehicle_id = self.id;
        let Some(vehicle) = self.vehicle_mut() else {
            return false;
        };
        if vehicle.passengers.len() >= vehicle.max_passengers || vehicle.passengers.contains(&passenger.id) {
            return false;
        }
        vehicle.passengers.push(passenger.id);
        passenger.data.insert(VEHICLE_KEY.into(), Value::from(vehicle_id.0));
        true
    }

    /// Unseat `passenger`. Removing an entity that is not a passenger
    /// returns false.
    pub fn remove_passenger(&mut self, passenger: &mut Entity) -> bool {
        if !self.detach_passenger(passenger.id) {
            return false;
        }
        if passenger.vehicle_id() == Some(self.id) {
            passenger.data.remove(VEHICLE_KEY);
        }
        true
    }

    /// Drop `id` from the passenger list without touching the passenger.
    pub fn detach_passenger(&mut self, id: EntityId) -> bool {
        let Some(vehicle) = self.vehicle_mut() else {
            return false;
        };
        match vehicle.passengers.iter().position(|p| *p == id) {
            Some(index) => {
                vehicle.passengers.remove(index);
                true
            }
            None => false,
        }
    }

    /// Forget which vehicle this entity rides. Returns the old vehicle.
    pub fn leave_vehicle(&mut self) -> Option<EntityId> {
        let vehicle = self.vehicle_id();
        self.data.remove(VEHICLE_KEY);
        vehicle
    }

    pub fn can_pickup(&self) -> bool {
        self.active && self.item().is_some_and(|i| i.pickup_delay == 0)
    }

    /// Advance one tick: physics, then variant behaviour.
    pub fn update(&mut self, tick: u64, ctx: &mut TickContext<'_>) {
        if !self.active {
            return;
        }
        if let EntityKind::Projectile(p @ ProjectileState { in_ground: true, .. }) = &mut self.kind {
            p.ticks_in_ground += 1;
            if p.ticks_in_ground > PROJECTILE_STUCK_TICKS {
                self.active = false;
            }
            return;
        }

        if matches!(self.kind, EntityKind::Projectile(_)) {
            self.step_projectile(ctx.world);
        } else {
            self.apply_physics(ctx.world);
        }
        if self.position.y < VOID_Y {
            self.active = false;
            return;
        }

        let landed_at = self.on_ground.then(|| self.block_pos());
        match &mut self.kind {
            EntityKind::Generic | EntityKind::Vehicle(_) | EntityKind::Projectile(_) => {}
            EntityKind::Player(p) => p.update(tick),
            EntityKind::Mob(m) => {
                if let MobBehavior::Passive(p) = &mut m.behavior {
                    p.update(tick);
                }
            }
            EntityKind::Item(i) => {
                i.pickup_delay = i.pickup_delay.saturating_sub(1);
                if ctx.now >= i.despawn_at {
                    self.active = false;
                }
            }
            EntityKind::FallingBlock(f) => {
                f.ticks_existed += 1;
                if let Some(cell) = landed_at {
                    if ctx.world.get_block(cell) == AIR {
                        ctx.world.set_block(cell, f.block_id);
                    }
                    self.active = false;
                } else if f.ticks_existed > FALLING_BLOCK_MAX_TICKS {
                    self.active = false;
                }
            }
        }
    }

    fn apply_physics(&mut self, world: &mut dyn BlockAccess) {
        if !self.affected_by_gravity && self.velocity == DVec3::ZERO {
            return;
        }
        if self.affected_by_gravity && !self.on_ground {
            self.velocity.y = (self.velocity.y - GRAVITY).max(-TERMINAL_VELOCITY);
        }

        let mut next = self.position + self.velocity;
        if self.velocity.y < 0.0 {
            // Sweep every cell crossed this tick so fast falls cannot tunnel.
            let (x, z) = (next.x.floor() as i32, next.z.floor() as i32);
            let top = self.position.y.floor() as i32;
            let bottom = next.y.floor() as i32;
            let floor = (bottom..=top).rev().find(|&y| world.is_solid(BlockPos::new(x, y, z)));
            if let Some(y) = floor {
                next.y = f64::from(y) + 1.0;
                self.velocity.y = 0.0;
                self.on_ground = true;
            } else {
                self.on_ground = false;
            }
        } else if self.velocity.y > 0.0 {
            self.on_ground = false;
        } else if self.on_ground {
            let below = next - DVec3::new(0.0, GROUND_PROBE, 0.0);
            self.on_ground = world.is_solid(BlockPos::containing(below));
        }
        self.position = next;

        if self.on_ground {
            self.velocity.x *= GROUND_FRICTION;
            self.velocity.z *= GROUND_FRICTION;
        }
    }

    /// Move along the velocity, sampling at least once per block; entering
    /// a solid block sticks the projectile just before it.
    fn step_projectile(&mut self, world: &mut dyn BlockAccess) {
        if self.affected_by_gravity {
            self.velocity.y = (self.velocity.y - GRAVITY).max(-TERMINAL_VELOCITY);
        }
        let steps = self.velocity.length().ceil().max(1.0) as u32;
        let start = self.position;
        for i in 1..=steps {
            let sample = start + self.velocity * (f64::from(i) / f64::from(steps));
            if world.is_solid(BlockPos::containing(sample)) {
                self.velocity = DVec3::ZERO;
                if let EntityKind::Projectile(p) = &mut self.kind {
                    p.in_ground = true;
                }
                return;
            }
            self.position = sample;
        }
    }

    pub fn to_data(&self) -> Result<Vec<u8>, EntityError> {
        let mut buf = Vec::new();
        ciborium::into_writer(self, &mut buf).map_err(|e| EntityError::Codec(e.to_string()))?;
        Ok(buf)
    }

    pub fn from_data(data: &[u8]) -> Result<Self, EntityError> {
        ciborium::from_reader(data).map_err(|e| EntityError::Codec(e.to_string()))
    }

    pub fn to_record(&self) -> Result<EntityRecord, EntityError> {
        Ok(EntityRecord {
            id: self.id,
            entity_type: self.entity_type,
            kind: self.kind_name().to_owned(),
            chunk: self.chunk(),
            active: self.active,
            data: self.to_data()?,
        })
    }

    pub fn from_record(record: &EntityRecord) -> Result<Self, EntityError> {
        let entity = Self::from_data(&record.data)?;
        if entity.id != record.id || entity.entity_type != record.entity_type {
            return Err(EntityError::Codec(format!(
                "record {} does not match its payload ({})",
                record.id, entity.id
            )));
        }
        Ok(entity)
    }

    pub fn to_player_record(&self) -> Option<PlayerRecord> {
        let p = self.player()?;
        Some(PlayerRecord {
            uuid: p.uuid,
            username: p.username.clone(),
            position: self.position,
            yaw: self.yaw,
            pitch: self.pitch,
            health: p.health,
            food_level: p.food_level,
            experience: p.experience,
            level: p.level,
            inventory: p.inventory.clone(),
        })
    }

    pub fn from_player_record(id: EntityId, record: &PlayerRecord) -> Self {
        let mut entity = Self::new_player(id, record.username.clone(), record.uuid, record.position);
        entity.yaw = record.yaw;
        entity.pitch = record.pitch;
        if let Some(p) = entity.player_mut() {
            p.health = record.health.clamp(0.0, PLAYER_MAX_HEALTH);
            p.food_level = record.food_level.min(PLAYER_MAX_FOOD);
            p.experience = record.experience;
            p.level = record.level;
            p.inventory = record.inventory.clone();
        }
        entity
    }
}
