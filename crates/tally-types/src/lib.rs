//! Shared type definitions for the Tally occupancy/quantity ledger.
//!
//! This crate is the single source of truth for the types used across the
//! Tally workspace: identifier newtypes, the two-variant entity [`State`]
//! sum type with its pure transition function, the event vocabulary, and
//! the per-domain verb adapters.
//!
//! # Modules
//!
//! - [`ids`] -- String-keyed external identifiers and the version token
//! - [`state`] -- The `State` sum type and `apply()` transition function
//! - [`event`] -- Event, snapshot, and entity records
//! - [`domain`] -- Per-domain verb vocabularies (space/machine/equipment/stock)

pub mod domain;
pub mod event;
pub mod ids;
pub mod state;

// Re-export all public types at crate root for convenience.
pub use domain::{Domain, VocabularyError};
pub use event::{EntityRecord, EventAction, LedgerEvent, SnapshotRecord, WriteMode};
pub use ids::{EntityId, SubjectId, VersionId};
pub use state::{ApplyError, State, StateKind};
