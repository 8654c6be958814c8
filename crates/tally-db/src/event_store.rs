//! Operations on the `events` table.
//!
//! Events are the audit source of truth: every accepted state change
//! lands here as an immutable row. The `BIGSERIAL` id breaks ties on
//! `occurred_at`, so `(occurred_at, id)` order is exactly insertion
//! order within a timestamp.

use chrono::{DateTime, Utc};
use sqlx::{PgExecutor, PgPool};
use tally_types::{EntityId, EventAction, LedgerEvent, WriteMode};

use crate::error::DbError;

/// Operations on the `events` table.
pub struct EventStore<'a> {
    pool: &'a PgPool,
}

impl<'a> EventStore<'a> {
    /// Create a new event store bound to a connection pool.
    pub const fn new(pool: &'a PgPool) -> Self {
        Self { pool }
    }

    /// Append one event.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Postgres`] if the insert fails.
    pub async fn append(&self, event: &LedgerEvent) -> Result<(), DbError> {
        insert_events(self.pool, core::slice::from_ref(event)).await
    }

    /// Batch-insert events using a single UNNEST-based multi-row INSERT.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Postgres`] if the insert fails.
    pub async fn batch_insert(&self, events: &[LedgerEvent]) -> Result<(), DbError> {
        insert_events(self.pool, events).await?;
        tracing::debug!(count = events.len(), "Inserted events (batch UNNEST)");
        Ok(())
    }

    /// Query events for an entity with `occurred_at` in `[from, to)`,
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
    ) -> Result<Vec<LedgerEvent>, DbError> {
        let rows = sqlx::query_as::<_, EventRow>(
            r"SELECT id, entity_id, occurred_at, action, mode
              FROM events
              WHERE entity_id = $1 AND occurred_at >= $2 AND occurred_at < $3
              ORDER BY occurred_at, id",
        )
        .bind(entity_id.as_str())
        .bind(from)
        .bind(to)
        .fetch_all(self.pool)
        .await?;

        rows.into_iter().map(EventRow::into_event).collect()
    }
}

/// Insert a batch of events through any executor (pool or transaction).
pub(crate) async fn insert_events<'e, E: PgExecutor<'e>>(
    executor: E,
    events: &[LedgerEvent],
) -> Result<(), DbError> {
    if events.is_empty() {
        return Ok(());
    }

    let len = events.len();
    let mut entity_ids = Vec::with_capacity(len);
    let mut times = Vec::with_capacity(len);
    let mut actions = Vec::with_capacity(len);
    let mut modes = Vec::with_capacity(len);
    for event in events {
        entity_ids.push(event.entity_id.as_str().to_owned());
        times.push(event.time);
        actions.push(serde_json::to_value(&event.action)?);
        modes.push(event.mode.as_str().to_owned());
    }

    // Multi-row INSERT using UNNEST for batch efficiency; the BIGSERIAL
    // id is assigned in array order, preserving input order on ties.
    sqlx::query(
        r"INSERT INTO events (entity_id, occurred_at, action, mode)
          SELECT * FROM UNNEST($1::TEXT[], $2::TIMESTAMPTZ[], $3::JSONB[], $4::TEXT[])",
    )
    .bind(&entity_ids)
    .bind(&times)
    .bind(&actions)
    .bind(&modes)
    .execute(executor)
    .await?;

    Ok(())
}

/// Delete events for an entity with `occurred_at` in `[from, to)`
/// (`[from, +inf)` when `to` is `None`) through any executor.
pub(crate) async fn delete_events<'e, E: PgExecutor<'e>>(
    executor: E,
    entity_id: &EntityId,
    from: DateTime<Utc>,
    to: Option<DateTime<Utc>>,
) -> Result<u64, DbError> {
    let result = sqlx::query(
        r"DELETE FROM events
          WHERE entity_id = $1 AND occurred_at >= $2 AND ($3::TIMESTAMPTZ IS NULL OR occurred_at < $3)",
    )
    .bind(entity_id.as_str())
    .bind(from)
    .bind(to)
    .execute(executor)
    .await?;

    Ok(result.rows_affected())
}

/// A row from the `events` table.
///
/// Uses runtime types rather than compile-time checked types to avoid
/// requiring a live database during builds.
#[derive(Debug, Clone, sqlx::FromRow)]
struct EventRow {
    #[allow(dead_code)]
    id: i64,
    entity_id: String,
    occurred_at: DateTime<Utc>,
    action: serde_json::Value,
    mode: String,
}

impl EventRow {
    fn into_event(self) -> Result<LedgerEvent, DbError> {
        let action: EventAction = serde_json::from_value(self.action)?;
        let mode = WriteMode::parse(&self.mode)
            .ok_or_else(|| DbError::Decode(format!("unknown write mode: {}", self.mode)))?;
        Ok(LedgerEvent {
            entity_id: EntityId::new(self.entity_id),
            time: self.occurred_at,
            action,
            mode,
        })
    }
}
