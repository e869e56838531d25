use blockworld_common::EntityId;

/// Errors from entity registration, lookup and serialization.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum EntityError {
    /// Invalid argument to an index or simulation mutation.
    #[error("invalid entity operation: {0}")]
    Operation(String),
    #[error("entity {0} not found")]
    NotFound(EntityId),
    #[error("entity limit of {limit} reached")]
    LimitExceeded { limit: usize },
    #[error("entity codec error: {0}")]
    Codec(String),
}

impl EntityError {
    /// Whether the caller may reasonably retry or carry on.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::NotFound(_) | Self::LimitExceeded { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recoverability_follows_taxonomy() {
        assert!(EntityError::NotFound(EntityId(1)).is_recoverable());
        assert!(EntityError::LimitExceeded { limit: 10 }.is_recoverable());
        assert!(!EntityError::Operation("null".into()).is_recoverable());
        assert!(!EntityError::Codec("bad".into()).is_recoverable());
    }

    #[test]
    fn messages_carry_context() {
        assert_eq!(
            EntityError::LimitExceeded { limit: 3 }.to_string(),
            "entity limit of 3 reached"
        );
        assert_eq!(EntityError::NotFound(EntityId(7)).to_string(), "entity 7 not found");
    }
}
