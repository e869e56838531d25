use blockworld_common::EntityId;
use std::sync::atomic::{AtomicU64, Ordering};

/// Process-scoped source of unique, monotonically increasing entity ids.
///
/// Ids start at 1. Ids restored from persistence must be passed to
/// [`EntityIdAllocator::observe`] so new ids never collide with them.
#[derive(Debug)]
pub struct EntityIdAllocator {
    next: AtomicU64,
}

impl Default for EntityIdAllocator {
    fn default() -> Self {
        Self::new()
    }
}

impl EntityIdAllocator {
    pub fn new() -> Self {
        Self {
            next: AtomicU64::new(1),
        }
    }

    pub fn allocate(&self) -> EntityId {
        EntityId(self.next.fetch_add(1, Ordering::SeqCst))
    }

    /// Ensure future ids are greater than `id`.
    pub fn observe(&self, id: EntityId) {
        self.next.fetch_max(id.0.saturating_add(1), Ordering::SeqCst);
    }

    /// The id the next call to `allocate` would return.
    pub fn peek(&self) -> EntityId {
        EntityId(self.next.load(Ordering::SeqCst))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_monotonic() {
        let ids = EntityIdAllocator::new();
        let a = ids.allocate();
        let b = ids.allocate();
        assert_eq!(a, EntityId(1));
        assert!(b > a);
    }

    #[test]
    fn observe_skips_restored_ids() {
        let ids = EntityIdAllocator::new();
        ids.observe(EntityId(41));
        assert_eq!(ids.allocate(), EntityId(42));
        ids.observe(EntityId(3));
        assert_eq!(ids.allocate(), EntityId(43));
    }
}
