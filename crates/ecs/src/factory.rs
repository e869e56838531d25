//! Typed entity construction from numeric type ids.

use crate::clock::Clock;
use crate::entity::{
    Entity, EntityKind, FallingBlockState, ITEM_DESPAWN_SECS, ITEM_PICKUP_DELAY, ItemState, MobBehavior,
    MobState, ProjectileState, VehicleState,
};
use crate::ids::EntityIdAllocator;
use crate::types::{self, Category, ids};
use blockworld_common::{EntityId, ItemStack};
use glam::DVec3;
use serde_json::{Map, Value};
use std::sync::Arc;
use tracing::debug;

/// Builds entities from the fixed type table.
///
/// Holds the process-scoped id allocator and the wall clock; both are shared
/// with whoever else needs them rather than living in globals.
pub struct EntityFactory {
    ids: Arc<EntityIdAllocator>,
    clock: Arc<dyn Clock>,
}

impl EntityFactory {
    pub fn new(ids: Arc<EntityIdAllocator>, clock: Arc<dyn Clock>) -> Self {
        Self { ids, clock }
    }

    pub fn ids(&self) -> &EntityIdAllocator {
        &self.ids
    }

    pub fn clock(&self) -> &dyn Clock {
        self.clock.as_ref()
    }

    /// Construct an entity of `type_id` at `position`, then apply `overrides`.
    ///
    /// Returns `None` for the player type; players are created through the
    /// simulation's join flow. Unknown ids yield a generic entity carrying
    /// the unknown type.
    pub fn create_entity(
        &self,
        type_id: u32,
        position: DVec3,
        overrides: Option<&Map<String, Value>>,
    ) -> Option<Entity> {
        let kind = match types::classify(type_id) {
            Category::Player => {
                debug!(type_id, "factory refuses player entities");
                return None;
            }
            Category::Hostile => EntityKind::Mob(MobState::hostile(type_id)),
            Category::Passive => EntityKind::Mob(MobState::passive(type_id)),
            Category::Projectile => EntityKind::Projectile(ProjectileState {
                shooter: None,
                damage: types::projectile_damage(type_id),
                in_ground: false,
                ticks_in_ground: 0,
            }),
            Category::Item => EntityKind::Item(ItemState {
                stack: ItemStack::new(1, 1),
                pickup_delay: ITEM_PICKUP_DELAY,
                despawn_at: self.clock.now() + ITEM_DESPAWN_SECS,
            }),
            Category::FallingBlock => EntityKind::FallingBlock(FallingBlockState {
                block_id: 12,
                data_value: 0,
                ticks_existed: 0,
            }),
            Category::Vehicle => EntityKind::Vehicle(VehicleState::for_type(type_id)),
            Category::Unknown => {
                debug!(type_id, "unknown entity type, creating generic entity");
                EntityKind::Generic
            }
        };

        let mut entity = Entity::new(self.ids.allocate(), type_id, position, kind);
        if type_id == ids::FIREBALL {
            entity.affected_by_gravity = false;
        }
        if let Some(overrides) = overrides {
            apply_overrides(&mut entity, overrides);
        }
        Some(entity)
    }
}

/// Assign override attributes. Every key is recorded in the attribute bag as
/// given; keys naming a typed field of this entity also set that field when
/// the value fits it.
pub fn apply_overrides(entity: &mut Entity, overrides: &Map<String, Value>) {
    for (key, value) in overrides {
        if !apply_typed(entity, key, value) {
            tracing::trace!(entity = %entity.id, key = key.as_str(), "override kept in attribute bag only");
        }
        entity.data.insert(key.clone(), value.clone());
    }
}

fn apply_typed(entity: &mut Entity, key: &str, value: &Value) -> bool {
    let f64_value = value.as_f64();
    let f32_value = f64_value.map(|v| v as f32);
    let u32_value = value.as_u64().and_then(|v| u32::try_from(v).ok());

    match (key, &mut entity.kind) {
        ("velocity_x", _) => set(&mut entity.velocity.x, f64_value),
        ("velocity_y", _) => set(&mut entity.velocity.y, f64_value),
        ("velocity_z", _) => set(&mut entity.velocity.z, f64_value),
        ("yaw", _) => set(&mut entity.yaw, f32_value),
        ("pitch", _) => set(&mut entity.pitch, f32_value),
        ("on_ground", _) => set(&mut entity.on_ground, value.as_bool()),
        ("affected_by_gravity", _) => set(&mut entity.affected_by_gravity, value.as_bool()),
        ("health", EntityKind::Mob(m)) => {
            let max = m.max_health;
            set(&mut m.health, f32_value.map(|h| h.clamp(0.0, max)))
        }
        ("max_health", EntityKind::Mob(m)) => {
            let applied = set(&mut m.max_health, f32_value.filter(|h| *h > 0.0));
            m.health = m.health.min(m.max_health);
            applied
        }
        ("is_baby", EntityKind::Mob(MobState { behavior: MobBehavior::Passive(p), .. })) => {
            set(&mut p.is_baby, value.as_bool())
        }
        ("damage", EntityKind::Mob(MobState { behavior: MobBehavior::Hostile(h), .. })) => {
            set(&mut h.attack_damage, f32_value)
        }
        ("damage", EntityKind::Projectile(p)) => set(&mut p.damage, f32_value),
        ("shooter", EntityKind::Projectile(p)) => match value.as_u64() {
            Some(id) => {
                p.shooter = Some(EntityId(id));
                true
            }
            None => false,
        },
        ("item_id", EntityKind::Item(i)) => set(&mut i.stack.id, u32_value),
        ("count", EntityKind::Item(i)) => set(&mut i.stack.count, u32_value),
        ("pickup_delay", EntityKind::Item(i)) => set(&mut i.pickup_delay, u32_value),
        ("block_id", EntityKind::FallingBlock(f)) => {
            set(&mut f.block_id, value.as_u64().and_then(|v| u16::try_from(v).ok()))
        }
        ("data_value", EntityKind::FallingBlock(f)) => {
            set(&mut f.data_value, value.as_u64().and_then(|v| u8::try_from(v).ok()))
        }
        _ => false,
    }
}

fn set<T>(slot: &mut T, value: Option<T>) -> bool {
    match value {
        Some(v) => {
            *slot = v;
            true
        }
        None => false,
    }
}
