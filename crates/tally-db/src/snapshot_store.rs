//! Operations on the `snapshots` table.
//!
//! One materialized full-state row per accepted event. Point-in-time
//! reads and history seeding are indexed descending lookups against
//! `(entity_id, occurred_at, id)`; nothing ever replays events to
//! answer a read.

use chrono::{DateTime, Utc};
use sqlx::{PgExecutor, PgPool};
use tally_types::{EntityId, SnapshotRecord, State, WriteMode};

use crate::error::DbError;

/// Operations on the `snapshots` table.
pub struct SnapshotStore<'a> {
    pool: &'a PgPool,
}

impl<'a> SnapshotStore<'a> {
    /// Create a new snapshot store bound to a connection pool.
    pub const fn new(pool: &'a PgPool) -> Self {
        Self { pool }
    }

    /// Append one snapshot.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Postgres`] if the insert fails.
    pub async fn append(&self, snapshot: &SnapshotRecord) -> Result<(), DbError> {
        insert_snapshots(self.pool, core::slice::from_ref(snapshot)).await
    }

    /// Batch-insert snapshots using a single UNNEST-based multi-row
    /// INSERT.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Postgres`] if the insert fails.
    pub async fn batch_insert(&self, snapshots: &[SnapshotRecord]) -> Result<(), DbError> {
        insert_snapshots(self.pool, snapshots).await?;
        tracing::debug!(count = snapshots.len(), "Inserted snapshots (batch UNNEST)");
        Ok(())
    }

    /// The most recent snapshot with `occurred_at <= at` (or strictly
    /// `< at` when `inclusive` is false).
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Postgres`] if the query fails, or
    /// [`DbError::Decode`] if the stored row cannot be decoded.
    pub async fn latest(
        &self,
        entity_id: &EntityId,
        at: DateTime<Utc>,
        inclusive: bool,
    ) -> Result<Option<SnapshotRecord>, DbError> {
        let query = if inclusive {
            r"SELECT id, entity_id, occurred_at, state, mode
              FROM snapshots
              WHERE entity_id = $1 AND occurred_at <= $2
              ORDER BY occurred_at DESC, id DESC
              LIMIT 1"
        } else {
            r"SELECT id, entity_id, occurred_at, state, mode
              FROM snapshots
              WHERE entity_id = $1 AND occurred_at < $2
              ORDER BY occurred_at DESC, id DESC
              LIMIT 1"
        };
        let row = sqlx::query_as::<_, SnapshotRow>(query)
            .bind(entity_id.as_str())
            .bind(at)
            .fetch_optional(self.pool)
            .await?;

        row.map(SnapshotRow::into_record).transpose()
    }

    /// Query snapshots for an entity with `occurred_at` in `[from, to)`,
    /// ascending by `(occurred_at, id)`.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Postgres`] if the query fails, or
    /// [`DbError::Decode`] if a stored row cannot be decoded.
    pub async fn range(
        &self,
        entity_id: &EntityId,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<SnapshotRecord>, DbError> {
        let rows = sqlx::query_as::<_, SnapshotRow>(
            r"SELECT id, entity_id, occurred_at, state, mode
              FROM snapshots
              WHERE entity_id = $1 AND occurred_at >= $2 AND occurred_at < $3
              ORDER BY occurred_at, id",
        )
        .bind(entity_id.as_str())
        .bind(from)
        .bind(to)
        .fetch_all(self.pool)
        .await?;

        rows.into_iter().map(SnapshotRow::into_record).collect()
    }
}

/// Insert a batch of snapshots through any executor (pool or
/// transaction).
pub(crate) async fn insert_snapshots<'e, E: PgExecutor<'e>>(
    executor: E,
    snapshots: &[SnapshotRecord],
) -> Result<(), DbError> {
    if snapshots.is_empty() {
        return Ok(());
    }

    let len = snapshots.len();
    let mut entity_ids = Vec::with_capacity(len);
    let mut times = Vec::with_capacity(len);
    let mut states = Vec::with_capacity(len);
    let mut modes = Vec::with_capacity(len);
    for snapshot in snapshots {
        entity_ids.push(snapshot.entity_id.as_str().to_owned());
        times.push(snapshot.time);
        states.push(serde_json::to_value(&snapshot.state)?);
        modes.push(snapshot.mode.as_str().to_owned());
    }

    sqlx::query(
        r"INSERT INTO snapshots (entity_id, occurred_at, state, mode)
          SELECT * FROM UNNEST($1::TEXT[], $2::TIMESTAMPTZ[], $3::JSONB[], $4::TEXT[])",
    )
    .bind(&entity_ids)
    .bind(&times)
    .bind(&states)
    .bind(&modes)
    .execute(executor)
    .await?;

    Ok(())
}

/// Delete snapshots for an entity with `occurred_at` in `[from, to)`
/// (`[from, +inf)` when `to` is `None`) through any executor.
pub(crate) async fn delete_snapshots<'e, E: PgExecutor<'e>>(
    executor: E,
    entity_id: &EntityId,
    from: DateTime<Utc>,
    to: Option<DateTime<Utc>>,
) -> Result<u64, DbError> {
    let result = sqlx::query(
        r"DELETE FROM snapshots
          WHERE entity_id = $1 AND occurred_at >= $2 AND ($3::TIMESTAMPTZ IS NULL OR occurred_at < $3)",
    )
    .bind(entity_id.as_str())
    .bind(from)
    .bind(to)
    .execute(executor)
    .await?;

    Ok(result.rows_affected())
}

/// A row from the `snapshots` table.
#[derive(Debug, Clone, sqlx::FromRow)]
struct SnapshotRow {
    #[allow(dead_code)]
    id: i64,
    entity_id: String,
    occurred_at: DateTime<Utc>,
    state: serde_json::Value,
    mode: String,
}

impl SnapshotRow {
    fn into_record(self) -> Result<SnapshotRecord, DbError> {
        let state: State = serde_json::from_value(self.state)?;
        let mode = WriteMode::parse(&self.mode)
            .ok_or_else(|| DbError::Decode(format!("unknown write mode: {}", self.mode)))?;
        Ok(SnapshotRecord {
            entity_id: EntityId::new(self.entity_id),
            time: self.occurred_at,
            state,
            mode,
        })
    }
}
