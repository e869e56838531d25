//! Spatial bookkeeping: the chunk-bucketed entity index and the set of
//! chunks kept around viewers.
//!
//! # Invariants
//! - Every registered entity id is filed in exactly one chunk bucket, the one
//!   matching its position after `update_entity_chunk`.
//! - Queries iterate in entity id order.
//! - The view tracker never admits more chunks per update than its budget.

mod index;
mod view;

pub use index::EntityIndex;
pub use view::{ViewConfig, ViewStats, ViewTracker, ViewUpdate, chunks_in_radius};
