//! End-to-end engine scenarios over the in-memory backend.
//!
//! These exercise the full write-then-query cycle: live writes through
//! the compare-and-swap path, bulk re-imports, point-in-time reads, and
//! windowed history aggregation.

// Integration tests use expect/unwrap extensively for clarity -- panicking
// on failure is the correct behavior in test code.
#![allow(
    clippy::expect_used,
    clippy::unwrap_used,
    clippy::missing_panics_doc,
    clippy::too_many_lines,
    clippy::indexing_slicing
)]

use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::{DateTime, TimeDelta, TimeZone, Utc};
use rust_decimal::Decimal;
use tally_engine::{
    CountKind, EngineError, GroupBy, GroupKey, HistoryRequest, ImportEvent, Ledger, MemoryStorage,
    NullDirectory, StaticDirectory, Storage, WindowValue,
};
use tally_types::{EntityId, EventAction, State, StateKind, SubjectId};

fn ledger() -> Ledger<MemoryStorage> {
    Ledger::new(MemoryStorage::new())
}

fn at(hour: u32, minute: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 2, hour, minute, 0)
        .single()
        .expect("valid timestamp")
}

fn enter(subject: &str) -> EventAction {
    EventAction::Enter {
        subject: SubjectId::new(subject),
    }
}

fn exit(subject: &str) -> EventAction {
    EventAction::Exit {
        subject: SubjectId::new(subject),
    }
}

fn set(quantity: i64) -> EventAction {
    EventAction::Set {
        quantity: Decimal::new(quantity, 0),
    }
}

fn take(subject: &str, quantity: i64) -> EventAction {
    EventAction::Take {
        subject: SubjectId::new(subject),
        quantity: Decimal::new(quantity, 0),
    }
}

fn counts(cells: &[WindowValue]) -> Vec<u64> {
    cells
        .iter()
        .map(|cell| cell.count().expect("count cell"))
        .collect()
}

/// Folding the event log through the shared transition function always
/// reproduces the snapshot log and the denormalized entity row.
#[tokio::test]
async fn replaying_the_event_log_reproduces_the_snapshots() {
    let ledger = ledger();
    let room = EntityId::new("room-1");
    ledger
        .create_entity(room.clone(), StateKind::Membership)
        .await
        .expect("create");

    for (minute, action) in [
        (0, enter("alice")),
        (10, enter("bob")),
        (20, exit("alice")),
        (30, enter("alice")),
        (40, exit("bob")),
    ] {
        ledger
            .record_event(&room, at(9, minute), action)
            .await
            .expect("record");
    }

    let events = ledger
        .store()
        .events_in_range(&room, at(0, 0), at(23, 0))
        .await
        .expect("events");
    let snapshots = ledger
        .store()
        .snapshots_in_range(&room, at(0, 0), at(23, 0))
        .await
        .expect("snapshots");
    assert_eq!(events.len(), snapshots.len());

    let mut folded = State::zero(StateKind::Membership);
    for (event, snapshot) in events.iter().zip(&snapshots) {
        folded = folded.apply(&event.action).expect("apply");
        assert_eq!(&folded, &snapshot.state);
    }
    let current = ledger.current_state(&room).await.expect("current");
    assert_eq!(folded, current);
}

/// Concurrent writers against one entity: every accepted write lands
/// exactly once, with no lost updates.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_writers_lose_no_updates() {
    let ledger = Arc::new(
        Ledger::new(MemoryStorage::new()).with_max_write_attempts(64),
    );
    let room = EntityId::new("room-1");
    ledger
        .create_entity(room.clone(), StateKind::Membership)
        .await
        .expect("create");

    let mut handles = Vec::new();
    for index in 0..16_u32 {
        let ledger = Arc::clone(&ledger);
        let room = room.clone();
        handles.push(tokio::spawn(async move {
            ledger
                .record_event(&room, at(9, index), enter(&format!("subject-{index}")))
                .await
        }));
    }
    for handle in handles {
        handle.await.expect("join").expect("record");
    }

    let current = ledger.current_state(&room).await.expect("current");
    assert_eq!(current.members().map(BTreeSet::len), Some(16));

    let events = ledger
        .store()
        .events_in_range(&room, at(0, 0), at(23, 0))
        .await
        .expect("events");
    assert_eq!(events.len(), 16);
}

/// Two subjects sharing a room across two one-hour windows. One exits
/// mid-way through the second window, so both still count as staying in
/// it (present at any point during the window).
#[tokio::test]
async fn room_occupancy_stay_counts() {
    let ledger = ledger();
    let room = EntityId::new("room-1");
    ledger
        .create_entity(room.clone(), StateKind::Membership)
        .await
        .expect("create");

    ledger.record_event(&room, at(9, 0), enter("alice")).await.expect("record");
    ledger.record_event(&room, at(9, 30), enter("bob")).await.expect("record");
    ledger.record_event(&room, at(10, 15), exit("alice")).await.expect("record");

    let request = HistoryRequest::new(at(9, 0), at(11, 0), TimeDelta::hours(1), CountKind::UniqueStay)
        .with_entities([room.clone()]);
    let series = ledger.history(&request, &NullDirectory).await.expect("history");

    assert_eq!(series.groups, vec![GroupKey::Total]);
    assert_eq!(counts(&series.values[0]), vec![2, 2]);

    // After the exit only bob is inside.
    let later = ledger.state_at(&room, at(11, 0)).await.expect("state");
    assert_eq!(later.members().map(BTreeSet::len), Some(1));
}

/// A stock bin: restock then consumption, queried as quantity and as
/// take counts over one two-hour window.
#[tokio::test]
async fn stock_quantity_and_take_counts() {
    let ledger = ledger();
    let stock = EntityId::new("stock-1");
    ledger
        .create_entity(stock.clone(), StateKind::Scalar)
        .await
        .expect("create");

    ledger.record_event(&stock, at(8, 0), set(100)).await.expect("record");
    ledger.record_event(&stock, at(9, 0), take("m1", 5)).await.expect("record");
    ledger.record_event(&stock, at(9, 30), take("m2", 3)).await.expect("record");

    let base = HistoryRequest::new(at(8, 0), at(10, 0), TimeDelta::hours(2), CountKind::Quantity)
        .with_entities([stock.clone()]);
    let quantity = ledger.history(&base, &NullDirectory).await.expect("history");
    assert_eq!(
        quantity.values[0][0].quantity(),
        Some(Decimal::new(92, 0))
    );

    let takes = HistoryRequest {
        count: CountKind::Take,
        ..base.clone()
    };
    let takes = ledger.history(&takes, &NullDirectory).await.expect("history");
    assert_eq!(counts(&takes.values[0]), vec![2]);

    let unique_takes = HistoryRequest {
        count: CountKind::UniqueTake,
        ..base
    };
    let unique_takes = ledger
        .history(&unique_takes, &NullDirectory)
        .await
        .expect("history");
    assert_eq!(counts(&unique_takes.values[0]), vec![2]);
}

/// Re-entry churn inside a window: non-unique counts multiplicity,
/// unique deduplicates, and unique never exceeds non-unique.
#[tokio::test]
async fn churn_within_a_window_counts_with_multiplicity() {
    let ledger = ledger();
    let room = EntityId::new("room-1");
    ledger
        .create_entity(room.clone(), StateKind::Membership)
        .await
        .expect("create");

    ledger.record_event(&room, at(9, 5), enter("alice")).await.expect("record");
    ledger.record_event(&room, at(9, 20), exit("alice")).await.expect("record");
    ledger.record_event(&room, at(9, 40), enter("alice")).await.expect("record");

    let base = HistoryRequest::new(at(9, 0), at(10, 0), TimeDelta::hours(1), CountKind::Enter)
        .with_entities([room.clone()]);
    let plain = ledger.history(&base, &NullDirectory).await.expect("history");
    assert_eq!(counts(&plain.values[0]), vec![2]);

    let unique = HistoryRequest {
        count: CountKind::UniqueEnter,
        ..base
    };
    let unique = ledger.history(&unique, &NullDirectory).await.expect("history");
    assert_eq!(counts(&unique.values[0]), vec![1]);
}

/// The same request issued twice yields identical output.
#[tokio::test]
async fn history_is_idempotent() {
    let ledger = ledger();
    let room = EntityId::new("room-1");
    ledger
        .create_entity(room.clone(), StateKind::Membership)
        .await
        .expect("create");
    ledger.record_event(&room, at(9, 5), enter("alice")).await.expect("record");
    ledger.record_event(&room, at(9, 40), exit("alice")).await.expect("record");

    let request =
        HistoryRequest::new(at(9, 0), at(11, 0), TimeDelta::minutes(30), CountKind::Stay)
            .with_entities([room]);
    let first = ledger.history(&request, &NullDirectory).await.expect("history");
    let second = ledger.history(&request, &NullDirectory).await.expect("history");
    assert_eq!(first, second);
}

/// With disjoint membership sets, per-entity groups sum to the
/// ungrouped total for non-unique counts.
#[tokio::test]
async fn per_entity_groups_sum_to_the_total() {
    let ledger = ledger();
    let room_a = EntityId::new("room-a");
    let room_b = EntityId::new("room-b");
    for room in [&room_a, &room_b] {
        ledger
            .create_entity(room.clone(), StateKind::Membership)
            .await
            .expect("create");
    }

    ledger.record_event(&room_a, at(9, 5), enter("alice")).await.expect("record");
    ledger.record_event(&room_a, at(9, 10), enter("bob")).await.expect("record");
    ledger.record_event(&room_b, at(9, 20), enter("carol")).await.expect("record");

    let base = HistoryRequest::new(at(9, 0), at(10, 0), TimeDelta::hours(1), CountKind::Enter)
        .with_entities([room_a.clone(), room_b.clone()]);

    let total = ledger.history(&base, &NullDirectory).await.expect("history");
    let grouped = ledger
        .history(&base.clone().grouped_by(GroupBy::Entity), &NullDirectory)
        .await
        .expect("history");

    assert_eq!(
        grouped.groups,
        vec![GroupKey::Entity(room_a), GroupKey::Entity(room_b)]
    );
    let summed: u64 = grouped
        .values
        .iter()
        .map(|row| row[0].count().expect("count"))
        .sum();
    assert_eq!(total.values[0][0].count(), Some(summed));
}

/// Attribute grouping buckets counted subjects by a directory lookup;
/// unknown subjects are excluded.
#[tokio::test]
async fn attribute_grouping_buckets_by_department() {
    let ledger = ledger();
    let room = EntityId::new("room-1");
    ledger
        .create_entity(room.clone(), StateKind::Membership)
        .await
        .expect("create");

    ledger.record_event(&room, at(9, 5), enter("alice")).await.expect("record");
    ledger.record_event(&room, at(9, 10), enter("bob")).await.expect("record");
    ledger.record_event(&room, at(9, 20), enter("stranger")).await.expect("record");

    let directory = StaticDirectory::new()
        .with_attribute("alice", "department", "engineering")
        .with_attribute("bob", "department", "design");

    let request = HistoryRequest::new(at(9, 0), at(10, 0), TimeDelta::hours(1), CountKind::UniqueStay)
        .with_entities([room])
        .grouped_by(GroupBy::SubjectAttribute("department".to_owned()));
    let series = ledger.history(&request, &directory).await.expect("history");

    assert_eq!(series.groups.len(), 2);
    for row in &series.values {
        assert_eq!(counts(row), vec![1]);
    }
}

/// Re-importing the same batch over the same range is a no-op: state
/// and history are unchanged.
#[tokio::test]
async fn reimporting_the_same_batch_is_idempotent() {
    let ledger = ledger();
    let room = EntityId::new("room-1");
    ledger
        .create_entity(room.clone(), StateKind::Membership)
        .await
        .expect("create");

    let batch = vec![
        ImportEvent::new(at(9, 0), enter("alice")),
        ImportEvent::new(at(9, 30), enter("bob")),
        ImportEvent::new(at(10, 15), exit("alice")),
    ];

    let first = ledger
        .import_events(&room, at(8, 0), Some(at(12, 0)), batch.clone())
        .await
        .expect("first import");

    let request = HistoryRequest::new(at(8, 0), at(12, 0), TimeDelta::hours(1), CountKind::Stay)
        .with_entities([room.clone()]);
    let history_first = ledger.history(&request, &NullDirectory).await.expect("history");

    let second = ledger
        .import_events(&room, at(8, 0), Some(at(12, 0)), batch)
        .await
        .expect("second import");
    let history_second = ledger.history(&request, &NullDirectory).await.expect("history");

    assert_eq!(first, second);
    assert_eq!(history_first, history_second);
}

/// A membership count over a mixed entity set fails loudly, naming the
/// mismatched entity.
#[tokio::test]
async fn mixed_entity_kinds_are_rejected() {
    let ledger = ledger();
    let room = EntityId::new("room-1");
    let stock = EntityId::new("stock-1");
    ledger
        .create_entity(room.clone(), StateKind::Membership)
        .await
        .expect("create");
    ledger
        .create_entity(stock.clone(), StateKind::Scalar)
        .await
        .expect("create");

    let request = HistoryRequest::new(at(9, 0), at(10, 0), TimeDelta::hours(1), CountKind::Stay)
        .with_entities([room, stock]);
    let result = ledger.history(&request, &NullDirectory).await;

    match result {
        Err(EngineError::UnsupportedQuery { reason }) => {
            assert!(reason.contains("stock-1"), "reason should name the offender: {reason}");
        }
        other => panic!("expected UnsupportedQuery, got {other:?}"),
    }
}

/// Without an entity filter, only entities of the matching kind are
/// swept.
#[tokio::test]
async fn unfiltered_history_selects_by_kind() {
    let ledger = ledger();
    let room = EntityId::new("room-1");
    let stock = EntityId::new("stock-1");
    ledger
        .create_entity(room.clone(), StateKind::Membership)
        .await
        .expect("create");
    ledger
        .create_entity(stock.clone(), StateKind::Scalar)
        .await
        .expect("create");

    ledger.record_event(&room, at(9, 5), enter("alice")).await.expect("record");
    ledger.record_event(&stock, at(9, 10), set(50)).await.expect("record");

    let request =
        HistoryRequest::new(at(9, 0), at(10, 0), TimeDelta::hours(1), CountKind::Enter)
            .grouped_by(GroupBy::Entity);
    let series = ledger.history(&request, &NullDirectory).await.expect("history");
    assert_eq!(series.groups, vec![GroupKey::Entity(room)]);
}
