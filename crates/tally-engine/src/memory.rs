//! In-memory storage backend.
//!
//! Backs the engine's test suite and small embedded deployments. All
//! maps live behind a single [`parking_lot::RwLock`]; every operation
//! takes the lock once, so each call is atomic with respect to the
//! others. Events and snapshots are kept sorted by
//! `(time, insertion sequence)`, matching the ordering contract of
//! [`Storage`].

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use tally_types::{EntityId, EntityRecord, LedgerEvent, SnapshotRecord, State, VersionId};

use crate::store::{Boundary, Storage, StoreError};

/// One entity's rows: the denormalized record plus its ordered logs.
#[derive(Debug, Default)]
struct EntityLog {
    entity: Option<EntityRecord>,
    events: Vec<(u64, LedgerEvent)>,
    snapshots: Vec<(u64, SnapshotRecord)>,
    next_sequence: u64,
}

impl EntityLog {
    const fn allocate_sequence(&mut self) -> u64 {
        let sequence = self.next_sequence;
        self.next_sequence = self.next_sequence.wrapping_add(1);
        sequence
    }
}

/// A heap-backed [`Storage`] implementation.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    inner: RwLock<BTreeMap<EntityId, EntityLog>>,
}

impl MemoryStorage {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

/// Insert keeping `(time, sequence)` order. Sequences are monotonic, so
/// inserting after the last row with `time <= t` is sufficient.
fn insert_ordered<T>(rows: &mut Vec<(u64, T)>, sequence: u64, time: DateTime<Utc>, row: T)
where
    T: HasTime,
{
    let position = rows.partition_point(|(_, existing)| existing.time() <= time);
    rows.insert(position, (sequence, row));
}

trait HasTime {
    fn time(&self) -> DateTime<Utc>;
}

impl HasTime for LedgerEvent {
    fn time(&self) -> DateTime<Utc> {
        self.time
    }
}

impl HasTime for SnapshotRecord {
    fn time(&self) -> DateTime<Utc> {
        self.time
    }
}

fn in_deleted_range(time: DateTime<Utc>, from: DateTime<Utc>, to: Option<DateTime<Utc>>) -> bool {
    time >= from && to.is_none_or(|bound| time < bound)
}

#[async_trait]
impl Storage for MemoryStorage {
    async fn insert_entity(&self, entity: &EntityRecord) -> Result<bool, StoreError> {
        let mut inner = self.inner.write();
        let log = inner.entry(entity.entity_id.clone()).or_default();
        if log.entity.is_some() {
            return Ok(false);
        }
        log.entity = Some(entity.clone());
        Ok(true)
    }

    async fn load_entity(&self, entity_id: &EntityId) -> Result<Option<EntityRecord>, StoreError> {
        let inner = self.inner.read();
        Ok(inner.get(entity_id).and_then(|log| log.entity.clone()))
    }

    async fn list_entities(&self) -> Result<Vec<EntityRecord>, StoreError> {
        let inner = self.inner.read();
        Ok(inner.values().filter_map(|log| log.entity.clone()).collect())
    }

    async fn update_entity_if_version(
        &self,
        entity_id: &EntityId,
        expected: VersionId,
        state: &State,
        new_version: VersionId,
    ) -> Result<bool, StoreError> {
        let mut inner = self.inner.write();
        let Some(entity) = inner.get_mut(entity_id).and_then(|log| log.entity.as_mut()) else {
            return Ok(false);
        };
        if entity.version != expected {
            return Ok(false);
        }
        entity.state = state.clone();
        entity.version = new_version;
        Ok(true)
    }

    async fn update_entity(
        &self,
        entity_id: &EntityId,
        state: &State,
        new_version: VersionId,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.write();
        let entity = inner
            .get_mut(entity_id)
            .and_then(|log| log.entity.as_mut())
            .ok_or_else(|| StoreError::message(format!("unknown entity: {entity_id}")))?;
        entity.state = state.clone();
        entity.version = new_version;
        Ok(())
    }

    async fn append_event(&self, event: &LedgerEvent) -> Result<(), StoreError> {
        let mut inner = self.inner.write();
        let log = inner.entry(event.entity_id.clone()).or_default();
        let sequence = log.allocate_sequence();
        insert_ordered(&mut log.events, sequence, event.time, event.clone());
        Ok(())
    }

    async fn append_snapshot(&self, snapshot: &SnapshotRecord) -> Result<(), StoreError> {
        let mut inner = self.inner.write();
        let log = inner.entry(snapshot.entity_id.clone()).or_default();
        let sequence = log.allocate_sequence();
        insert_ordered(&mut log.snapshots, sequence, snapshot.time, snapshot.clone());
        Ok(())
    }

    async fn replace_range(
        &self,
        entity_id: &EntityId,
        from: DateTime<Utc>,
        to: Option<DateTime<Utc>>,
        events: &[LedgerEvent],
        snapshots: &[SnapshotRecord],
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.write();
        let log = inner.entry(entity_id.clone()).or_default();

        log.events
            .retain(|(_, event)| !in_deleted_range(event.time, from, to));
        log.snapshots
            .retain(|(_, snapshot)| !in_deleted_range(snapshot.time, from, to));

        for event in events {
            let sequence = log.allocate_sequence();
            insert_ordered(&mut log.events, sequence, event.time, event.clone());
        }
        for snapshot in snapshots {
            let sequence = log.allocate_sequence();
            insert_ordered(&mut log.snapshots, sequence, snapshot.time, snapshot.clone());
        }
        Ok(())
    }

    async fn latest_snapshot(
        &self,
        entity_id: &EntityId,
        at: DateTime<Utc>,
        boundary: Boundary,
    ) -> Result<Option<SnapshotRecord>, StoreError> {
        let inner = self.inner.read();
        let Some(log) = inner.get(entity_id) else {
            return Ok(None);
        };
        let found = log
            .snapshots
            .iter()
            .rev()
            .find(|(_, snapshot)| match boundary {
                Boundary::Inclusive => snapshot.time <= at,
                Boundary::Exclusive => snapshot.time < at,
            })
            .map(|(_, snapshot)| snapshot.clone());
        Ok(found)
    }

    async fn snapshots_in_range(
        &self,
        entity_id: &EntityId,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<SnapshotRecord>, StoreError> {
        let inner = self.inner.read();
        let Some(log) = inner.get(entity_id) else {
            return Ok(Vec::new());
        };
        Ok(log
            .snapshots
            .iter()
            .filter(|(_, snapshot)| snapshot.time >= from && snapshot.time < to)
            .map(|(_, snapshot)| snapshot.clone())
            .collect())
    }

    async fn events_in_range(
        &self,
        entity_id: &EntityId,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<LedgerEvent>, StoreError> {
        let inner = self.inner.read();
        let Some(log) = inner.get(entity_id) else {
            return Ok(Vec::new());
        };
        Ok(log
            .events
            .iter()
            .filter(|(_, event)| event.time >= from && event.time < to)
            .map(|(_, event)| event.clone())
            .collect())
    }
}
