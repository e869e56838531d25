//! Entity simulation: the tick loop, player sessions and auto-save.
//!
//! # Invariants
//! - Every registered entity sits in exactly one chunk bucket after a tick.
//! - Inactive entities are gone from the registry by the end of the tick
//!   that deactivated them.
//! - Entities removed from the registry are deleted from persistence on the
//!   next save, so they are not restored with their chunk.
//! - Save failures are logged and counted; they never stop the tick loop.

pub mod autosave;
pub mod metrics;
pub mod simulation;

pub use autosave::{AutoSaver, SaveReport, save_state};
pub use metrics::{ServerStats, TickTimer};
pub use simulation::{EntitySimulation, TickReport};
