//! Operations on the `entities` table.
//!
//! The entity row carries the denormalized current state and the
//! optimistic-concurrency version token. It is the only mutable row in
//! the schema; the event and snapshot logs are append-only.

use sqlx::PgPool;
use tally_types::{EntityId, EntityRecord, State, StateKind, VersionId};
use uuid::Uuid;

use crate::error::DbError;

/// Operations on the `entities` table.
pub struct EntityStore<'a> {
    pool: &'a PgPool,
}

impl<'a> EntityStore<'a> {
    /// Create a new entity store bound to a connection pool.
    pub const fn new(pool: &'a PgPool) -> Self {
        Self { pool }
    }

    /// Insert a new entity row.
    ///
    /// Returns `false` (writing nothing) when an entity with this id
    /// already exists. First writer wins; there is no upsert.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Postgres`] if the insert fails.
    pub async fn insert(&self, entity: &EntityRecord) -> Result<bool, DbError> {
        let state = serde_json::to_value(&entity.state)?;
        let result = sqlx::query(
            r"INSERT INTO entities (entity_id, kind, state, version_id)
              VALUES ($1, $2, $3, $4)
              ON CONFLICT (entity_id) DO NOTHING",
        )
        .bind(entity.entity_id.as_str())
        .bind(entity.kind.as_str())
        .bind(state)
        .bind(entity.version.into_inner())
        .execute(self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Load one entity row by id.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Postgres`] if the query fails, or
    /// [`DbError::Decode`] if the stored row cannot be decoded.
    pub async fn get(&self, entity_id: &EntityId) -> Result<Option<EntityRecord>, DbError> {
        let row = sqlx::query_as::<_, EntityRow>(
            r"SELECT entity_id, kind, state, version_id
              FROM entities
              WHERE entity_id = $1",
        )
        .bind(entity_id.as_str())
        .fetch_optional(self.pool)
        .await?;

        row.map(EntityRow::into_record).transpose()
    }

    /// Load every entity row, ordered by id.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Postgres`] if the query fails, or
    /// [`DbError::Decode`] if a stored row cannot be decoded.
    pub async fn list(&self) -> Result<Vec<EntityRecord>, DbError> {
        let rows = sqlx::query_as::<_, EntityRow>(
            r"SELECT entity_id, kind, state, version_id
              FROM entities
              ORDER BY entity_id",
        )
        .fetch_all(self.pool)
        .await?;

        rows.into_iter().map(EntityRow::into_record).collect()
    }

    /// Conditionally update the denormalized state (compare-and-swap).
    ///
    /// The update applies only when the stored version still equals
    /// `expected`; the returned flag says whether the swap won. A lost
    /// swap writes nothing.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Postgres`] if the update fails.
    pub async fn update_if_version(
        &self,
        entity_id: &EntityId,
        expected: VersionId,
        state: &State,
        new_version: VersionId,
    ) -> Result<bool, DbError> {
        let state = serde_json::to_value(state)?;
        let result = sqlx::query(
            r"UPDATE entities
              SET state = $3, version_id = $4
              WHERE entity_id = $1 AND version_id = $2",
        )
        .bind(entity_id.as_str())
        .bind(expected.into_inner())
        .bind(state)
        .bind(new_version.into_inner())
        .execute(self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Unconditionally overwrite the denormalized state.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Postgres`] if the update fails, or
    /// [`DbError::Decode`] if the entity does not exist.
    pub async fn update(
        &self,
        entity_id: &EntityId,
        state: &State,
        new_version: VersionId,
    ) -> Result<(), DbError> {
        let state = serde_json::to_value(state)?;
        let result = sqlx::query(
            r"UPDATE entities
              SET state = $2, version_id = $3
              WHERE entity_id = $1",
        )
        .bind(entity_id.as_str())
        .bind(state)
        .bind(new_version.into_inner())
        .execute(self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::Decode(format!("unknown entity: {entity_id}")));
        }
        Ok(())
    }
}

/// A row from the `entities` table.
///
/// Uses runtime types rather than compile-time checked types to avoid
/// requiring a live database during builds.
#[derive(Debug, Clone, sqlx::FromRow)]
struct EntityRow {
    entity_id: String,
    kind: String,
    state: serde_json::Value,
    version_id: Uuid,
}

impl EntityRow {
    fn into_record(self) -> Result<EntityRecord, DbError> {
        let kind = StateKind::parse(&self.kind)
            .ok_or_else(|| DbError::Decode(format!("unknown state kind: {}", self.kind)))?;
        let state: State = serde_json::from_value(self.state)?;
        Ok(EntityRecord {
            entity_id: EntityId::new(self.entity_id),
            kind,
            state,
            version: VersionId::from(self.version_id),
        })
    }
}
