use blockworld_common::ChunkPos;
use std::collections::BTreeSet;
use std::time::{Duration, Instant};

/// How far around each viewer chunks are kept, and how many new chunks may
/// be requested per update.
#[derive(Debug, Clone)]
pub struct ViewConfig {
    pub view_distance: i32,
    pub load_budget: usize,
}

impl Default for ViewConfig {
    fn default() -> Self {
        Self {
            view_distance: 4,
            load_budget: 8,
        }
    }
}

/// Chunks that entered or left the tracked set in one update.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ViewUpdate {
    pub requested: Vec<ChunkPos>,
    pub released: Vec<ChunkPos>,
}

/// Per-update statistics for instrumentation.
#[derive(Debug, Clone, Default)]
pub struct ViewStats {
    pub requested_this_update: usize,
    pub released_this_update: usize,
    pub total_tracked: usize,
    pub update_time: Duration,
}

/// Tracks which chunks should stay resident around a set of viewers.
///
/// New chunks are admitted nearest-first, at most `load_budget` per update;
/// chunks outside every viewer's square are released at once.
pub struct ViewTracker {
    pub config: ViewConfig,
    tracked: BTreeSet<ChunkPos>,
    stats: ViewStats,
}

impl ViewTracker {
    pub fn new(config: ViewConfig) -> Self {
        Self {
            config,
            tracked: BTreeSet::new(),
            stats: ViewStats::default(),
        }
    }

    pub fn update(&mut self, viewers: &[ChunkPos]) -> ViewUpdate {
        let _span = tracing::debug_span!("view_update", viewers = viewers.len()).entered();
        let start = Instant::now();

        let desired: BTreeSet<ChunkPos> = viewers
            .iter()
            .flat_map(|v| chunks_in_radius(*v, self.config.view_distance))
            .collect();

        let mut candidates: Vec<ChunkPos> = desired
            .iter()
            .filter(|c| !self.tracked.contains(c))
            .copied()
            .collect();
        // Nearest first; ties keep coordinate order.
        candidates.sort_by_key(|c| viewers.iter().map(|v| v.distance(*c)).min().unwrap_or(0));
        candidates.truncate(self.config.load_budget);

        let released: Vec<ChunkPos> = self
            .tracked
            .iter()
            .filter(|c| !desired.contains(c))
            .copied()
            .collect();

        for c in &candidates {
            tracing::trace!(chunk = %c, "chunk entered view");
            self.tracked.insert(*c);
        }
        for c in &released {
            tracing::trace!(chunk = %c, "chunk left view");
            self.tracked.remove(c);
        }

        self.stats = ViewStats {
            requested_this_update: candidates.len(),
            released_this_update: released.len(),
            total_tracked: self.tracked.len(),
            update_time: start.elapsed(),
        };

        ViewUpdate {
            requested: candidates,
            released,
        }
    }

    pub fn tracked(&self) -> &BTreeSet<ChunkPos> {
        &self.tracked
    }

    pub fn is_tracked(&self, chunk: ChunkPos) -> bool {
        self.tracked.contains(&chunk)
    }

    pub fn stats(&self) -> &ViewStats {
        &self.stats
    }
}

/// Every chunk within a square radius of `center`.
pub fn chunks_in_radius(center: ChunkPos, radius: i32) -> impl Iterator<Item = ChunkPos> {
    (-radius..=radius)
        .flat_map(move |dx| (-radius..=radius).map(move |dz| ChunkPos::new(center.x + dx, center.z + dz)))
}
