//! Core records: events, snapshots, and entity rows.
//!
//! Events are immutable facts; snapshots are materialized full-state
//! copies written alongside each accepted event. Both are ordered by
//! `(time, insertion sequence)` -- ties on `time` are broken by the order
//! rows were inserted, never by wall clock alone, because several events
//! can legitimately share a timestamp.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::ids::{EntityId, SubjectId, VersionId};
use crate::state::{State, StateKind};

/// How a row entered the log. Informational only; it never changes
/// query semantics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WriteMode {
    /// Written one event at a time by the live ledger writer.
    LiveWrite,
    /// Written as part of a bulk re-import batch.
    BulkImport,
}

impl WriteMode {
    /// Stable string form used in storage rows.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::LiveWrite => "live_write",
            Self::BulkImport => "bulk_import",
        }
    }

    /// Parse the stable string form written by [`WriteMode::as_str`].
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "live_write" => Some(Self::LiveWrite),
            "bulk_import" => Some(Self::BulkImport),
            _ => None,
        }
    }
}

/// A state-changing action carried by an event.
///
/// `Enter`/`Exit` act on membership state; `Set`/`Take` act on scalar
/// state. Domain-specific verb synonyms (`acquire`, `release`,
/// `restock`) are translated into these four by [`crate::domain::Domain`]
/// before reaching the engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "verb", rename_all = "snake_case")]
pub enum EventAction {
    /// A subject entered / started using the entity.
    Enter {
        /// The acting subject.
        subject: SubjectId,
    },
    /// A subject exited / stopped using the entity.
    Exit {
        /// The acting subject.
        subject: SubjectId,
    },
    /// The quantity was set to an absolute value (stocktake, restock).
    Set {
        /// The new absolute quantity.
        quantity: Decimal,
    },
    /// A subject took some quantity out of stock.
    Take {
        /// The acting subject.
        subject: SubjectId,
        /// The quantity taken.
        quantity: Decimal,
    },
}

impl EventAction {
    /// The canonical verb, for error messages and storage rows.
    pub const fn verb(&self) -> &'static str {
        match self {
            Self::Enter { .. } => "enter",
            Self::Exit { .. } => "exit",
            Self::Set { .. } => "set",
            Self::Take { .. } => "take",
        }
    }

    /// Which state variant this action applies to.
    pub const fn state_kind(&self) -> StateKind {
        match self {
            Self::Enter { .. } | Self::Exit { .. } => StateKind::Membership,
            Self::Set { .. } | Self::Take { .. } => StateKind::Scalar,
        }
    }

    /// The acting subject, where the action has one (`set` does not).
    pub const fn subject(&self) -> Option<&SubjectId> {
        match self {
            Self::Enter { subject } | Self::Exit { subject } | Self::Take { subject, .. } => {
                Some(subject)
            }
            Self::Set { .. } => None,
        }
    }

    /// The quantity payload, for scalar actions.
    pub const fn quantity(&self) -> Option<Decimal> {
        match self {
            Self::Set { quantity } | Self::Take { quantity, .. } => Some(*quantity),
            Self::Enter { .. } | Self::Exit { .. } => None,
        }
    }
}

/// An immutable state-change fact for one entity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEvent {
    /// The entity the event belongs to.
    pub entity_id: EntityId,
    /// When the change happened (domain time, not ingestion time).
    pub time: DateTime<Utc>,
    /// What happened.
    pub action: EventAction,
    /// How the event entered the log.
    pub mode: WriteMode,
}

impl LedgerEvent {
    /// Build a live-write event.
    pub const fn live(entity_id: EntityId, time: DateTime<Utc>, action: EventAction) -> Self {
        Self {
            entity_id,
            time,
            action,
            mode: WriteMode::LiveWrite,
        }
    }

    /// Build a bulk-import event.
    pub const fn imported(entity_id: EntityId, time: DateTime<Utc>, action: EventAction) -> Self {
        Self {
            entity_id,
            time,
            action,
            mode: WriteMode::BulkImport,
        }
    }
}

/// A materialized full-state record, one per accepted event.
///
/// For a fixed entity, snapshot records are totally ordered by
/// `(time, sequence)` and each `state` is the previous snapshot's state
/// with the producing event applied.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotRecord {
    /// The entity the snapshot belongs to.
    pub entity_id: EntityId,
    /// The time of the event that produced this snapshot.
    pub time: DateTime<Utc>,
    /// The full state at that instant.
    pub state: State,
    /// How the snapshot entered the log.
    pub mode: WriteMode,
}

/// The mutable row for a tracked entity.
///
/// `state` is denormalized for O(1) current-state reads and only ever
/// mutated by the ledger writer (under a compare-and-swap on `version`)
/// or the bulk importer. Entity rows are never deleted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityRecord {
    /// Stable external key.
    pub entity_id: EntityId,
    /// Which state variant this entity carries.
    pub kind: StateKind,
    /// Denormalized current state.
    pub state: State,
    /// Optimistic-concurrency token, regenerated on every state change.
    pub version: VersionId,
}

impl EntityRecord {
    /// Create a fresh entity at the zero state with a new version token.
    pub fn new(entity_id: EntityId, kind: StateKind) -> Self {
        Self {
            entity_id,
            kind,
            state: State::zero(kind),
            version: VersionId::new(),
        }
    }
}
