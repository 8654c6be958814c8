//! Event-sourced occupancy and quantity tracking.
//!
//! Entities (rooms, machines, stock bins) carry either a membership set
//! of subjects or a scalar quantity. Every change lands as an immutable
//! event plus a full post-state snapshot; the engine answers
//! point-in-time and windowed-aggregate queries from the snapshot log
//! without replaying events.
//!
//! # Architecture
//!
//! - [`ledger`] -- The [`Ledger`]: live writer (optimistic concurrency
//!   via compare-and-swap on the entity version) and point-in-time reads.
//! - [`import`] -- Bulk re-import: validated batch replacement of a time
//!   range, refolded from the boundary snapshot.
//! - [`history`] -- The windowed aggregator: enter/exit/stay/quantity
//!   counts per window, grouped by nothing, entity, or subject attribute.
//! - [`store`] -- The [`Storage`] port backends implement.
//! - [`memory`] -- An in-memory backend for tests and embeddings.
//! - [`subjects`] -- The read-only [`SubjectDirectory`] port for
//!   attribute grouping.
//!
//! # Write model
//!
//! The snapshot log is the source of truth for reads; the event log is
//! the source of truth for audit and re-derivation. Folding the event
//! log through [`tally_types::State::apply`] always reproduces the
//! snapshot log, because the live writer and the bulk importer share
//! that single transition function.
//!
//! # Usage
//!
//! ```
//! use futures::executor::block_on;
//! use tally_engine::{EngineError, Ledger, MemoryStorage};
//! use tally_types::{EntityId, EventAction, StateKind, SubjectId};
//!
//! let ledger = Ledger::new(MemoryStorage::new());
//! let outcome: Result<(), EngineError> = block_on(async {
//!     let room = EntityId::new("room-1");
//!     ledger.create_entity(room.clone(), StateKind::Membership).await?;
//!     let state = ledger
//!         .record_event(
//!             &room,
//!             chrono::Utc::now(),
//!             EventAction::Enter { subject: SubjectId::new("alice") },
//!         )
//!         .await?;
//!     assert_eq!(state.members().map(std::collections::BTreeSet::len), Some(1));
//!     Ok(())
//! });
//! assert!(outcome.is_ok());
//! ```

pub mod error;
pub mod history;
pub mod import;
pub mod ledger;
pub mod memory;
pub mod store;
pub mod subjects;

pub use error::EngineError;
pub use history::{
    CountKind, GroupBy, GroupKey, HistoryRequest, HistorySeries, Window, WindowValue,
};
pub use import::ImportEvent;
pub use ledger::{Ledger, DEFAULT_MAX_WRITE_ATTEMPTS};
pub use memory::MemoryStorage;
pub use store::{Boundary, Storage, StoreError};
pub use subjects::{NullDirectory, StaticDirectory, SubjectDirectory};
