//! Bulk re-import: batch replacement of an entity's event history.
//!
//! Used for file-sourced re-ingestion (CSV uploads), not for isolated
//! live writes. The whole input is validated before anything touches
//! storage -- a malformed event aborts the call with prior state intact.
//! After validation the affected time range is deleted, the snapshot
//! sequence is refolded from the boundary snapshot forward, and the new
//! rows land as one batch.
//!
//! The importer performs no compare-and-swap: it assumes exclusive
//! ownership of the entity and time range for the duration of the call.
//! Running it concurrently with live writes against an overlapping
//! entity/range is a documented precondition violation, not something
//! this engine detects.

use chrono::{DateTime, Utc};
use tally_types::{
    EntityId, EntityRecord, EventAction, LedgerEvent, SnapshotRecord, State, VersionId, WriteMode,
};

use crate::error::EngineError;
use crate::ledger::Ledger;
use crate::store::{Boundary, Storage};

/// One event of a bulk-import batch. The entity is implied by the call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportEvent {
    /// When the change happened.
    pub time: DateTime<Utc>,
    /// What happened.
    pub action: EventAction,
}

impl ImportEvent {
    /// Build an import event.
    pub const fn new(time: DateTime<Utc>, action: EventAction) -> Self {
        Self { time, action }
    }
}

impl<S: Storage> Ledger<S> {
    /// Replace all events and snapshots for `entity_id` in
    /// `[delete_from, delete_to)` with the given batch.
    ///
    /// `delete_to = None` means "to the end of time". The batch is
    /// sorted by `(time, input order)` -- a stable sort, so events that
    /// share a timestamp keep their input order. The fold seeds from
    /// the snapshot immediately preceding `delete_from` (the zero state
    /// if none exists) and applies the same transition function as the
    /// live writer, emitting one snapshot per event.
    ///
    /// On success the entity's denormalized state is overwritten
    /// unconditionally with the last folded state, and the final state
    /// is returned. An empty batch is valid and simply clears the range.
    ///
    /// # Errors
    ///
    /// - [`EngineError::EntityNotFound`] if the entity does not exist.
    /// - [`EngineError::InvalidEvent`] if any event has the wrong
    ///   vocabulary for the entity's state kind, carries a negative
    ///   quantity, or falls outside the replaced range. Validation runs
    ///   before any deletion or insertion; a failure leaves storage
    ///   untouched.
    pub async fn import_events(
        &self,
        entity_id: &EntityId,
        delete_from: DateTime<Utc>,
        delete_to: Option<DateTime<Utc>>,
        events: Vec<ImportEvent>,
    ) -> Result<State, EngineError> {
        let entity = self
            .store()
            .load_entity(entity_id)
            .await?
            .ok_or_else(|| EngineError::entity_not_found(entity_id.clone()))?;

        validate_batch(&entity, delete_from, delete_to, &events)?;

        let mut batch = events;
        // Stable sort: ties on time keep input order.
        batch.sort_by_key(|event| event.time);

        let seed = self
            .seeded_state(&entity, delete_from, Boundary::Exclusive)
            .await?;

        let mut state = seed;
        let mut new_events = Vec::with_capacity(batch.len());
        let mut new_snapshots = Vec::with_capacity(batch.len());
        for event in batch {
            state = state
                .apply(&event.action)
                .map_err(EngineError::invalid_event)?;
            new_events.push(LedgerEvent::imported(
                entity_id.clone(),
                event.time,
                event.action,
            ));
            new_snapshots.push(SnapshotRecord {
                entity_id: entity_id.clone(),
                time: event.time,
                state: state.clone(),
                mode: WriteMode::BulkImport,
            });
        }

        self.store()
            .replace_range(entity_id, delete_from, delete_to, &new_events, &new_snapshots)
            .await?;

        self.store()
            .update_entity(entity_id, &state, VersionId::new())
            .await?;

        tracing::debug!(
            %entity_id,
            count = new_events.len(),
            "Imported event batch"
        );
        Ok(state)
    }
}

/// Validate the whole batch before any write occurs.
fn validate_batch(
    entity: &EntityRecord,
    delete_from: DateTime<Utc>,
    delete_to: Option<DateTime<Utc>>,
    events: &[ImportEvent],
) -> Result<(), EngineError> {
    if let Some(to) = delete_to {
        if to <= delete_from {
            return Err(EngineError::invalid_event(format!(
                "empty replacement range: {delete_from} .. {to}"
            )));
        }
    }

    for (index, event) in events.iter().enumerate() {
        if event.action.state_kind() != entity.kind {
            return Err(EngineError::invalid_event(format!(
                "event {index}: action '{}' cannot be applied to {} entity {}",
                event.action.verb(),
                entity.kind,
                entity.entity_id
            )));
        }

        if event
            .action
            .quantity()
            .is_some_and(|quantity| quantity.is_sign_negative())
        {
            return Err(EngineError::invalid_event(format!(
                "event {index}: negative quantity"
            )));
        }

        if event.time < delete_from || delete_to.is_some_and(|to| event.time >= to) {
            return Err(EngineError::invalid_event(format!(
                "event {index}: time {} outside replaced range",
                event.time
            )));
        }
    }

    Ok(())
}
