use serde::{Deserialize, Serialize};

/// Invalid configuration values.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("world name must not be empty")]
    EmptyWorldName,
    #[error("view distance must be at least 1")]
    ZeroViewDistance,
    #[error("max entities must be at least 1")]
    ZeroEntityLimit,
}

/// Already-parsed values the simulation core consumes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimConfig {
    pub world_name: String,
    /// Used only when the world has no persisted record yet.
    pub seed: u64,
    /// Radius (in chunks) kept resident around each player.
    pub view_distance: u32,
    pub max_entities: usize,
    pub auto_save_interval_secs: u64,
    /// Maximum chunks brought into residency per tick for players.
    pub chunk_load_budget: usize,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            world_name: "world".into(),
            seed: 0,
            view_distance: 4,
            max_entities: 1000,
            auto_save_interval_secs: 300,
            chunk_load_budget: 8,
        }
    }
}

impl SimConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.world_name.trim().is_empty() {
            return Err(ConfigError::EmptyWorldName);
        }
        if self.view_distance == 0 {
            return Err(ConfigError::ZeroViewDistance);
        }
        if self.max_entities == 0 {
            return Err(ConfigError::ZeroEntityLimit);
        }
        Ok(())
    }

    /// Resident-chunk capacity implied by the view distance: a full square
    /// of `2 * view_distance + 1` chunks on a side.
    pub fn chunk_capacity(&self) -> usize {
        let side = 2 * self.view_distance as usize + 1;
        side * side
    }
}
