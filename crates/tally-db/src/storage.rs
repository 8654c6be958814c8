//! The engine's [`Storage`] port, backed by `PostgreSQL`.
//!
//! Thin adapter over the entity, event, and snapshot stores. The one
//! operation with real coordination needs, the re-import range swap, is
//! a single transaction: delete both logs' range, then batch-insert the
//! replacements, so readers never observe a half-replaced range.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tally_engine::{Boundary, Storage, StoreError};
use tally_types::{EntityId, EntityRecord, LedgerEvent, SnapshotRecord, State, VersionId};

use crate::entity_store::EntityStore;
use crate::error::DbError;
use crate::event_store::{self, EventStore};
use crate::postgres::PostgresPool;
use crate::snapshot_store::{self, SnapshotStore};

/// `PostgreSQL`-backed [`Storage`].
#[derive(Clone)]
pub struct PgStorage {
    pool: PostgresPool,
}

impl PgStorage {
    /// Wrap a connected pool.
    pub const fn new(pool: PostgresPool) -> Self {
        Self { pool }
    }

    /// Return the underlying pool handle.
    pub const fn pool(&self) -> &PostgresPool {
        &self.pool
    }

    const fn entities(&self) -> EntityStore<'_> {
        EntityStore::new(self.pool.pool())
    }

    const fn events(&self) -> EventStore<'_> {
        EventStore::new(self.pool.pool())
    }

    const fn snapshots(&self) -> SnapshotStore<'_> {
        SnapshotStore::new(self.pool.pool())
    }
}

fn store_error(error: DbError) -> StoreError {
    StoreError::new(error)
}

#[async_trait]
impl Storage for PgStorage {
    async fn insert_entity(&self, entity: &EntityRecord) -> Result<bool, StoreError> {
        self.entities().insert(entity).await.map_err(store_error)
    }

    async fn load_entity(&self, entity_id: &EntityId) -> Result<Option<EntityRecord>, StoreError> {
        self.entities().get(entity_id).await.map_err(store_error)
    }

    async fn list_entities(&self) -> Result<Vec<EntityRecord>, StoreError> {
        self.entities().list().await.map_err(store_error)
    }

    async fn update_entity_if_version(
        &self,
        entity_id: &EntityId,
        expected: VersionId,
        state: &State,
        new_version: VersionId,
    ) -> Result<bool, StoreError> {
        self.entities()
            .update_if_version(entity_id, expected, state, new_version)
            .await
            .map_err(store_error)
    }

    async fn update_entity(
        &self,
        entity_id: &EntityId,
        state: &State,
        new_version: VersionId,
    ) -> Result<(), StoreError> {
        self.entities()
            .update(entity_id, state, new_version)
            .await
            .map_err(store_error)
    }

    async fn append_event(&self, event: &LedgerEvent) -> Result<(), StoreError> {
        self.events().append(event).await.map_err(store_error)
    }

    async fn append_snapshot(&self, snapshot: &SnapshotRecord) -> Result<(), StoreError> {
        self.snapshots().append(snapshot).await.map_err(store_error)
    }

    async fn replace_range(
        &self,
        entity_id: &EntityId,
        from: DateTime<Utc>,
        to: Option<DateTime<Utc>>,
        events: &[LedgerEvent],
        snapshots: &[SnapshotRecord],
    ) -> Result<(), StoreError> {
        let mut tx = self.pool.pool().begin().await.map_err(|e| store_error(e.into()))?;

        let deleted_events = event_store::delete_events(&mut *tx, entity_id, from, to)
            .await
            .map_err(store_error)?;
        let deleted_snapshots = snapshot_store::delete_snapshots(&mut *tx, entity_id, from, to)
            .await
            .map_err(store_error)?;
        event_store::insert_events(&mut *tx, events)
            .await
            .map_err(store_error)?;
        snapshot_store::insert_snapshots(&mut *tx, snapshots)
            .await
            .map_err(store_error)?;

        tx.commit().await.map_err(|e| store_error(e.into()))?;

        tracing::debug!(
            %entity_id,
            deleted_events,
            deleted_snapshots,
            inserted = events.len(),
            "Replaced event range"
        );
        Ok(())
    }

    async fn latest_snapshot(
        &self,
        entity_id: &EntityId,
        at: DateTime<Utc>,
        boundary: Boundary,
    ) -> Result<Option<SnapshotRecord>, StoreError> {
        self.snapshots()
            .latest(entity_id, at, boundary == Boundary::Inclusive)
            .await
            .map_err(store_error)
    }

    async fn snapshots_in_range(
        &self,
        entity_id: &EntityId,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<SnapshotRecord>, StoreError> {
        self.snapshots()
            .range(entity_id, from, to)
            .await
            .map_err(store_error)
    }

    async fn events_in_range(
        &self,
        entity_id: &EntityId,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<LedgerEvent>, StoreError> {
        self.events()
            .range(entity_id, from, to)
            .await
            .map_err(store_error)
    }
}
