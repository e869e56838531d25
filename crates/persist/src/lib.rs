//! Persistence collaborators for the simulation core.
//!
//! # Invariants
//! - Absent keys are "not found" (`Ok(None)` or an empty list), never errors.
//! - Chunk and entity payloads are stored as given; the file store compresses
//!   them and refuses payloads whose hash no longer matches its manifest.
//! - An existing file store with a different schema version is never opened.

pub mod file;
pub mod memory;

pub use file::{FileStore, IntegrityManifest, StoreError, StoreMeta};
pub use memory::MemoryStore;
