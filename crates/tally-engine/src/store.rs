//! The storage port the engine is written against.
//!
//! The engine never talks to a database directly; it goes through
//! [`Storage`], which any document-oriented or relational backend can
//! implement as long as it provides per-entity CRUD, a conditional
//! (compare-and-swap) entity update, `(time, sequence)`-ordered range
//! reads, and an atomic delete-plus-batch-insert for re-imports.
//!
//! Two backends ship in this workspace: [`crate::memory::MemoryStorage`]
//! and the `PostgreSQL` backend in `tally-db`.
//!
//! Snapshots and events are immutable once written, so reads need no
//! coordination; the entity row is the only resource with a mutation
//! race, and the conditional update is the primitive that resolves it.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tally_types::{EntityId, EntityRecord, LedgerEvent, SnapshotRecord, State, VersionId};

/// Boundary condition for latest-snapshot lookups.
///
/// History seeding wants the snapshot strictly before a window start;
/// current-state reads want "at or before". Both are the same indexed
/// descending lookup with a different bound filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Boundary {
    /// Greatest snapshot with `time <= at`.
    Inclusive,
    /// Greatest snapshot with `time < at`.
    Exclusive,
}

/// An opaque storage-backend failure.
///
/// Backends wrap their native error type (sqlx, serde, ...) in this so
/// the engine does not depend on any driver crate.
#[derive(Debug, thiserror::Error)]
#[error("storage backend error: {0}")]
pub struct StoreError(Box<dyn core::error::Error + Send + Sync>);

impl StoreError {
    /// Wrap a backend error.
    pub fn new(source: impl Into<Box<dyn core::error::Error + Send + Sync>>) -> Self {
        Self(source.into())
    }

    /// Build a store error from a bare message.
    pub fn message(reason: impl Into<String>) -> Self {
        Self(reason.into().into())
    }
}

/// Storage operations required by the engine.
///
/// Ordering contract: every method returning multiple events or
/// snapshots yields them ascending by `(time, insertion sequence)`;
/// ties on `time` preserve the order rows were appended.
#[async_trait]
pub trait Storage: Send + Sync {
    /// Insert a new entity row.
    ///
    /// Returns `false` (and writes nothing) if an entity with this id
    /// already exists.
    async fn insert_entity(&self, entity: &EntityRecord) -> Result<bool, StoreError>;

    /// Load an entity row by id.
    async fn load_entity(&self, entity_id: &EntityId) -> Result<Option<EntityRecord>, StoreError>;

    /// Load every entity row, ordered by id.
    async fn list_entities(&self) -> Result<Vec<EntityRecord>, StoreError>;

    /// Conditionally update an entity's denormalized state.
    ///
    /// The update applies only if the stored version still equals
    /// `expected` (compare-and-swap). Returns whether the swap won.
    async fn update_entity_if_version(
        &self,
        entity_id: &EntityId,
        expected: VersionId,
        state: &State,
        new_version: VersionId,
    ) -> Result<bool, StoreError>;

    /// Unconditionally overwrite an entity's denormalized state.
    ///
    /// Used by the bulk importer, which assumes exclusive ownership of
    /// the entity for the duration of the call.
    async fn update_entity(
        &self,
        entity_id: &EntityId,
        state: &State,
        new_version: VersionId,
    ) -> Result<(), StoreError>;

    /// Append one event to the event log.
    async fn append_event(&self, event: &LedgerEvent) -> Result<(), StoreError>;

    /// Append one snapshot to the snapshot log.
    async fn append_snapshot(&self, snapshot: &SnapshotRecord) -> Result<(), StoreError>;

    /// Atomically delete all events and snapshots for `entity_id` with
    /// `time` in `[from, to)` (`[from, +inf)` when `to` is `None`) and
    /// insert the replacement batch.
    async fn replace_range(
        &self,
        entity_id: &EntityId,
        from: DateTime<Utc>,
        to: Option<DateTime<Utc>>,
        events: &[LedgerEvent],
        snapshots: &[SnapshotRecord],
    ) -> Result<(), StoreError>;

    /// The most recent snapshot at (or strictly before) `at`.
    ///
    /// An indexed descending lookup with `LIMIT 1`, never a replay.
    async fn latest_snapshot(
        &self,
        entity_id: &EntityId,
        at: DateTime<Utc>,
        boundary: Boundary,
    ) -> Result<Option<SnapshotRecord>, StoreError>;

    /// All snapshots for `entity_id` with `time` in `[from, to)`,
    /// ascending.
    async fn snapshots_in_range(
        &self,
        entity_id: &EntityId,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<SnapshotRecord>, StoreError>;

    /// All events for `entity_id` with `time` in `[from, to)`, ascending.
    async fn events_in_range(
        &self,
        entity_id: &EntityId,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<LedgerEvent>, StoreError>;
}
