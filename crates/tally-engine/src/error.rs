//! Error types for the ledger engine.
//!
//! All failures surface to the caller synchronously; the only condition
//! that is retried internally before surfacing is a version conflict in
//! the live writer, and that surfaces as [`EngineError::WriteConflict`]
//! once the bounded retries are exhausted.

use tally_types::EntityId;

use crate::store::StoreError;

/// Errors that can occur in the ledger engine.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// One or more referenced entities do not exist.
    ///
    /// Carries the complete list of missing ids, not just the first
    /// offender, so callers can report every problem at once.
    #[error("unknown entities: {}", format_ids(entity_ids))]
    EntityNotFound {
        /// Every referenced id that has no entity row.
        entity_ids: Vec<EntityId>,
    },

    /// An entity with this id already exists.
    #[error("entity already exists: {entity_id}")]
    EntityAlreadyExists {
        /// The duplicate id.
        entity_id: EntityId,
    },

    /// Optimistic-concurrency retries were exhausted without winning
    /// the compare-and-swap.
    #[error("write conflict on entity {entity_id} after {attempts} attempts")]
    WriteConflict {
        /// The contested entity.
        entity_id: EntityId,
        /// How many attempts were made before giving up.
        attempts: usize,
    },

    /// A malformed event was rejected before any write occurred.
    #[error("invalid event: {reason}")]
    InvalidEvent {
        /// Why the event was rejected.
        reason: String,
    },

    /// The requested grouping/count-type combination is not supported.
    #[error("unsupported query: {reason}")]
    UnsupportedQuery {
        /// Why the query was rejected.
        reason: String,
    },

    /// The storage backend failed.
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl EngineError {
    /// Build an [`EngineError::EntityNotFound`] for a single id.
    pub fn entity_not_found(entity_id: EntityId) -> Self {
        Self::EntityNotFound {
            entity_ids: vec![entity_id],
        }
    }

    /// Build an [`EngineError::InvalidEvent`] from anything displayable.
    pub fn invalid_event(reason: impl core::fmt::Display) -> Self {
        Self::InvalidEvent {
            reason: reason.to_string(),
        }
    }

    /// Build an [`EngineError::UnsupportedQuery`] from anything displayable.
    pub fn unsupported_query(reason: impl core::fmt::Display) -> Self {
        Self::UnsupportedQuery {
            reason: reason.to_string(),
        }
    }
}

/// Join entity ids for the `EntityNotFound` message.
fn format_ids(ids: &[EntityId]) -> String {
    let mut out = String::new();
    for (index, id) in ids.iter().enumerate() {
        if index > 0 {
            out.push_str(", ");
        }
        out.push_str(id.as_str());
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entity_not_found_lists_every_id() {
        let error = EngineError::EntityNotFound {
            entity_ids: vec![EntityId::new("room-1"), EntityId::new("room-2")],
        };
        assert_eq!(error.to_string(), "unknown entities: room-1, room-2");
    }

    #[test]
    fn write_conflict_names_entity_and_attempts() {
        let error = EngineError::WriteConflict {
            entity_id: EntityId::new("lathe-3"),
            attempts: 2,
        };
        assert_eq!(
            error.to_string(),
            "write conflict on entity lathe-3 after 2 attempts"
        );
    }
}
