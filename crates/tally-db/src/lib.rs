//! `PostgreSQL` data layer for the tally ledger.
//!
//! Three tables back the engine:
//!
//! - `entities` -- one mutable row per tracked entity: the denormalized
//!   current state and the compare-and-swap version token.
//! - `events` -- the append-only audit log, one row per accepted event.
//! - `snapshots` -- the append-only materialized-state log reads are
//!   answered from.
//!
//! [`PgStorage`] adapts these tables to the engine's
//! [`tally_engine::Storage`] port; everything else here is plumbing
//! (pool configuration, migrations, per-table stores).
//!
//! Uses [`sqlx`] with runtime query construction so builds never need a
//! live database; run `cargo test -p tally-db -- --ignored` against a
//! local instance for the real thing.

pub mod entity_store;
pub mod error;
pub mod event_store;
pub mod postgres;
pub mod snapshot_store;
pub mod storage;

pub use entity_store::EntityStore;
pub use error::DbError;
pub use event_store::EventStore;
pub use postgres::{PostgresConfig, PostgresPool};
pub use snapshot_store::SnapshotStore;
pub use storage::PgStorage;
