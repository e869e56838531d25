//! Entity model: one base struct with a tagged payload per variant, the fixed
//! type table, typed construction and the id/time sources entities need.
//!
//! # Invariants
//! - Entity ids come from one [`EntityIdAllocator`] per process and are never reused.
//! - An entity's chunk is a function of its position alone.
//! - Tick-based cooldowns use the caller's tick; only item despawn reads the wall clock.

pub mod clock;
pub mod entity;
pub mod error;
pub mod factory;
pub mod ids;
pub mod types;

pub use clock::{Clock, ManualClock, SystemClock};
pub use entity::{
    Entity, EntityKind, FallingBlockState, HostileState, ItemState, MobBehavior, MobState, PassiveState,
    PlayerState, ProjectileState, TickContext, VehicleState,
};
pub use error::EntityError;
pub use factory::{EntityFactory, apply_overrides};
pub use ids::EntityIdAllocator;
pub use types::{Category, classify, type_name};
