//! Windowed history aggregation over the snapshot log.
//!
//! Given a time range, a step size, an entity/subject filter, a grouping
//! dimension, and a count semantic, [`Ledger::history`] produces a
//! group-by-window matrix of aggregate values. The sweep walks each
//! entity's ordered snapshots exactly once: every transition is diffed
//! against the immediately preceding state (pairwise, never across
//! window boundaries), so a subject entering and exiting twice inside
//! one window counts twice under non-unique semantics and once under
//! unique semantics.
//!
//! Snapshots are immutable once written, so any number of these queries
//! can run concurrently with writers and with each other, without
//! coordination.

use std::collections::{BTreeSet, HashMap};

use chrono::{DateTime, TimeDelta, Utc};
use futures::future::try_join_all;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tally_types::{
    EntityId, EntityRecord, EventAction, LedgerEvent, SnapshotRecord, StateKind, SubjectId,
};

use crate::error::EngineError;
use crate::ledger::Ledger;
use crate::store::{Boundary, Storage, StoreError};
use crate::subjects::SubjectDirectory;

// ---------------------------------------------------------------------------
// Request types
// ---------------------------------------------------------------------------

/// The aggregate semantic computed per window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum CountKind {
    /// Appearances during the window, counted with multiplicity.
    Enter,
    /// Distinct subjects that appeared during the window.
    UniqueEnter,
    /// Disappearances during the window, counted with multiplicity.
    Exit,
    /// Distinct subjects that disappeared during the window.
    UniqueExit,
    /// Subjects present at any point during the window: the active set
    /// at window start (once each) plus every appearance.
    Stay,
    /// Distinct subjects present at any point during the window.
    UniqueStay,
    /// Scalar state as of window end (last write within the window wins).
    Quantity,
    /// `take` events within the window, counted with multiplicity.
    Take,
    /// Distinct acting subjects among `take` events within the window.
    UniqueTake,
}

impl CountKind {
    /// Which state variant this count semantic applies to.
    pub const fn state_kind(self) -> StateKind {
        match self {
            Self::Enter
            | Self::UniqueEnter
            | Self::Exit
            | Self::UniqueExit
            | Self::Stay
            | Self::UniqueStay => StateKind::Membership,
            Self::Quantity | Self::Take | Self::UniqueTake => StateKind::Scalar,
        }
    }

    /// Whether the count deduplicates by subject id within a window.
    pub const fn is_unique(self) -> bool {
        matches!(self, Self::UniqueEnter | Self::UniqueExit | Self::UniqueStay | Self::UniqueTake)
    }

    /// Stable name, for error messages.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Enter => "enter",
            Self::UniqueEnter => "uniqueEnter",
            Self::Exit => "exit",
            Self::UniqueExit => "uniqueExit",
            Self::Stay => "stay",
            Self::UniqueStay => "uniqueStay",
            Self::Quantity => "quantity",
            Self::Take => "take",
            Self::UniqueTake => "uniqueTake",
        }
    }
}

impl core::fmt::Display for CountKind {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// The grouping dimension of the output matrix.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum GroupBy {
    /// One "total" group aggregating every entity.
    None,
    /// One group per entity id.
    Entity,
    /// One group per distinct value of the named subject attribute
    /// (resolved through the subject directory). Subjects the directory
    /// cannot resolve are excluded from these groups.
    SubjectAttribute(String),
}

/// A windowed history query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryRequest {
    /// Start of the queried range (inclusive).
    pub from: DateTime<Utc>,
    /// End of the queried range (exclusive).
    pub to: DateTime<Utc>,
    /// Window size. The trailing window is truncated at `to` when the
    /// range does not divide evenly.
    pub step: TimeDelta,
    /// Restrict to these entities; `None` means every entity whose
    /// state kind matches the count semantic.
    pub entity_ids: Option<Vec<EntityId>>,
    /// Restrict counted subjects to this set.
    pub subject_ids: Option<BTreeSet<SubjectId>>,
    /// Output grouping.
    pub group_by: GroupBy,
    /// Count semantic.
    pub count: CountKind,
}

impl HistoryRequest {
    /// Build a request over `[from, to)` with the given step and count.
    pub const fn new(
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        step: TimeDelta,
        count: CountKind,
    ) -> Self {
        Self {
            from,
            to,
            step,
            entity_ids: None,
            subject_ids: None,
            group_by: GroupBy::None,
            count,
        }
    }

    /// Restrict the query to these entities.
    #[must_use]
    pub fn with_entities(mut self, entity_ids: impl IntoIterator<Item = EntityId>) -> Self {
        self.entity_ids = Some(entity_ids.into_iter().collect());
        self
    }

    /// Restrict counted subjects to this set.
    #[must_use]
    pub fn with_subjects(mut self, subject_ids: impl IntoIterator<Item = SubjectId>) -> Self {
        self.subject_ids = Some(subject_ids.into_iter().collect());
        self
    }

    /// Set the output grouping.
    #[must_use]
    pub fn grouped_by(mut self, group_by: GroupBy) -> Self {
        self.group_by = group_by;
        self
    }
}

// ---------------------------------------------------------------------------
// Result types
// ---------------------------------------------------------------------------

/// One fixed-size window of the partitioned range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Window {
    /// Window start (inclusive).
    pub start: DateTime<Utc>,
    /// Window end (exclusive).
    pub end: DateTime<Utc>,
}

/// A row key of the output matrix.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum GroupKey {
    /// The single group of an ungrouped query.
    Total,
    /// A per-entity group.
    Entity(EntityId),
    /// A per-attribute-value group.
    Attribute(String),
}

impl core::fmt::Display for GroupKey {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::Total => write!(f, "total"),
            Self::Entity(entity_id) => write!(f, "{entity_id}"),
            Self::Attribute(value) => write!(f, "{value}"),
        }
    }
}

/// One cell of the output matrix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum WindowValue {
    /// A subject or event count.
    Count(u64),
    /// A scalar quantity.
    Quantity(Decimal),
}

impl WindowValue {
    /// The count, if this is a count cell.
    pub const fn count(self) -> Option<u64> {
        match self {
            Self::Count(count) => Some(count),
            Self::Quantity(_) => None,
        }
    }

    /// The quantity, if this is a quantity cell.
    pub const fn quantity(self) -> Option<Decimal> {
        match self {
            Self::Count(_) => None,
            Self::Quantity(quantity) => Some(quantity),
        }
    }
}

/// The group-by-window matrix a history query produces.
///
/// `values[g][w]` is the cell for `groups[g]` over `windows[w]`. Group
/// order is insertion order of first appearance during the sweep, not
/// sorted; two calls with identical arguments produce identical output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistorySeries {
    /// Row keys, in first-appearance order.
    pub groups: Vec<GroupKey>,
    /// The partitioned windows, ascending.
    pub windows: Vec<Window>,
    /// The matrix, `groups x windows`.
    pub values: Vec<Vec<WindowValue>>,
}

// ---------------------------------------------------------------------------
// Sweep internals
// ---------------------------------------------------------------------------

/// Per-entity, per-window contribution before grouping.
enum Contribution {
    /// Counted subject occurrences (multiplicity preserved; unique
    /// semantics deduplicate at aggregation time).
    Subjects(Vec<SubjectId>),
    /// Scalar state as of window end.
    Quantity(Decimal),
}

/// What flowed through one window of one entity's membership sweep.
struct WindowFlow {
    /// Active set at window start.
    start_active: BTreeSet<SubjectId>,
    /// Subjects that appeared in a transition, in transition order.
    appeared: Vec<SubjectId>,
    /// Subjects that disappeared in a transition, in transition order.
    disappeared: Vec<SubjectId>,
}

/// Partition `[from, to)` into `step`-sized windows.
///
/// The trailing window is truncated at `to` when the range does not
/// divide evenly.
fn partition_windows(
    from: DateTime<Utc>,
    to: DateTime<Utc>,
    step: TimeDelta,
) -> Result<Vec<Window>, EngineError> {
    let mut windows = Vec::new();
    let mut start = from;
    while start < to {
        let end = start
            .checked_add_signed(step)
            .ok_or_else(|| EngineError::unsupported_query("window end overflows the time axis"))?
            .min(to);
        windows.push(Window { start, end });
        start = end;
    }
    Ok(windows)
}

/// Walk one entity's membership snapshots across the windows.
///
/// Diffs are pairwise between consecutive snapshots: each transition's
/// member set is compared to the active set immediately before it.
fn sweep_membership(
    seed: BTreeSet<SubjectId>,
    transitions: &[SnapshotRecord],
    windows: &[Window],
) -> Result<Vec<WindowFlow>, StoreError> {
    let mut active = seed;
    let mut index = 0_usize;
    let mut flows = Vec::with_capacity(windows.len());

    for window in windows {
        let start_active = active.clone();
        let mut appeared = Vec::new();
        let mut disappeared = Vec::new();

        while let Some(snapshot) = transitions.get(index) {
            if snapshot.time >= window.end {
                break;
            }
            let next = snapshot
                .state
                .members()
                .ok_or_else(|| StoreError::message("scalar snapshot on a membership entity"))?;
            for subject in next.difference(&active) {
                appeared.push(subject.clone());
            }
            for subject in active.difference(next) {
                disappeared.push(subject.clone());
            }
            active = next.clone();
            index = index.saturating_add(1);
        }

        flows.push(WindowFlow {
            start_active,
            appeared,
            disappeared,
        });
    }

    Ok(flows)
}

/// Walk one entity's scalar snapshots, yielding the quantity as of each
/// window's end.
fn sweep_quantity(
    seed: Decimal,
    transitions: &[SnapshotRecord],
    windows: &[Window],
) -> Result<Vec<Decimal>, StoreError> {
    let mut current = seed;
    let mut index = 0_usize;
    let mut per_window = Vec::with_capacity(windows.len());

    for window in windows {
        while let Some(snapshot) = transitions.get(index) {
            if snapshot.time >= window.end {
                break;
            }
            current = snapshot
                .state
                .quantity()
                .ok_or_else(|| StoreError::message("membership snapshot on a scalar entity"))?;
            index = index.saturating_add(1);
        }
        per_window.push(current);
    }

    Ok(per_window)
}

/// Bucket `take` events' acting subjects per window.
fn take_subjects(
    events: &[LedgerEvent],
    windows: &[Window],
    filter: Option<&BTreeSet<SubjectId>>,
) -> Vec<Vec<SubjectId>> {
    let mut index = 0_usize;
    let mut per_window = Vec::with_capacity(windows.len());

    for window in windows {
        let mut subjects = Vec::new();
        while let Some(event) = events.get(index) {
            if event.time >= window.end {
                break;
            }
            if let EventAction::Take { subject, .. } = &event.action {
                if filter.is_none_or(|allowed| allowed.contains(subject)) {
                    subjects.push(subject.clone());
                }
            }
            index = index.saturating_add(1);
        }
        per_window.push(subjects);
    }

    per_window
}

/// Select the counted subject occurrences for one window flow.
fn counted_subjects(
    count: CountKind,
    flow: &WindowFlow,
    filter: Option<&BTreeSet<SubjectId>>,
) -> Vec<SubjectId> {
    let mut counted: Vec<SubjectId> = match count {
        CountKind::Enter | CountKind::UniqueEnter => flow.appeared.clone(),
        CountKind::Exit | CountKind::UniqueExit => flow.disappeared.clone(),
        CountKind::Stay | CountKind::UniqueStay => flow
            .start_active
            .iter()
            .cloned()
            .chain(flow.appeared.iter().cloned())
            .collect(),
        // Scalar semantics never reach the membership sweep.
        CountKind::Quantity | CountKind::Take | CountKind::UniqueTake => Vec::new(),
    };

    if let Some(allowed) = filter {
        counted.retain(|subject| allowed.contains(subject));
    }
    counted
}

/// Count one cell from subject occurrences, deduplicating for unique
/// semantics.
fn count_cell(count: CountKind, occurrences: &[SubjectId]) -> WindowValue {
    let value = if count.is_unique() {
        occurrences.iter().collect::<BTreeSet<_>>().len()
    } else {
        occurrences.len()
    };
    WindowValue::Count(u64::try_from(value).unwrap_or(u64::MAX))
}

// ---------------------------------------------------------------------------
// Query entry point
// ---------------------------------------------------------------------------

impl<S: Storage> Ledger<S> {
    /// Answer a windowed, grouped aggregate query over `[from, to)`.
    ///
    /// The subject directory is consulted only for
    /// [`GroupBy::SubjectAttribute`], with exactly one batched lookup
    /// covering every counted subject; pass
    /// [`crate::subjects::NullDirectory`] when not grouping by
    /// attribute.
    ///
    /// # Errors
    ///
    /// - [`EngineError::EntityNotFound`] listing every filtered id that
    ///   does not exist (fail-fast with the complete list).
    /// - [`EngineError::UnsupportedQuery`] for a non-positive step, an
    ///   empty range, a count semantic that does not match the
    ///   entities' state kind, or attribute grouping of `quantity`.
    pub async fn history(
        &self,
        request: &HistoryRequest,
        subjects: &dyn SubjectDirectory,
    ) -> Result<HistorySeries, EngineError> {
        validate_request(request)?;

        let entities = self.resolve_entities(request).await?;
        let windows = partition_windows(request.from, request.to, request.step)?;

        let contributions = try_join_all(
            entities
                .iter()
                .map(|entity| self.entity_contributions(entity, request, &windows)),
        )
        .await?;

        match &request.group_by {
            GroupBy::None => Ok(aggregate_total(request, &windows, &contributions)),
            GroupBy::Entity => Ok(aggregate_per_entity(
                request,
                &windows,
                &entities,
                &contributions,
            )),
            GroupBy::SubjectAttribute(attribute) => {
                self.aggregate_per_attribute(request, &windows, &contributions, attribute, subjects)
                    .await
            }
        }
    }

    /// Resolve the entity set for a history request.
    ///
    /// An explicit filter fails with the complete list of missing ids
    /// and requires every entity to match the count semantic's state
    /// kind; without a filter, all entities of the matching kind are
    /// swept.
    async fn resolve_entities(
        &self,
        request: &HistoryRequest,
    ) -> Result<Vec<EntityRecord>, EngineError> {
        let wanted_kind = request.count.state_kind();
        match &request.entity_ids {
            Some(entity_ids) => {
                let entities = self.require_entities(entity_ids).await?;
                let mismatched: Vec<&EntityId> = entities
                    .iter()
                    .filter(|entity| entity.kind != wanted_kind)
                    .map(|entity| &entity.entity_id)
                    .collect();
                if !mismatched.is_empty() {
                    return Err(EngineError::unsupported_query(format!(
                        "count type '{}' requires {} entities; mismatched: {}",
                        request.count,
                        wanted_kind,
                        mismatched
                            .iter()
                            .map(|id| id.as_str())
                            .collect::<Vec<_>>()
                            .join(", "),
                    )));
                }
                Ok(entities)
            }
            None => Ok(self
                .list_entities()
                .await?
                .into_iter()
                .filter(|entity| entity.kind == wanted_kind)
                .collect()),
        }
    }

    /// Compute one entity's per-window contributions.
    async fn entity_contributions(
        &self,
        entity: &EntityRecord,
        request: &HistoryRequest,
        windows: &[Window],
    ) -> Result<Vec<Contribution>, EngineError> {
        let filter = request.subject_ids.as_ref();

        match request.count {
            CountKind::Quantity => {
                let seed = self
                    .seeded_state(entity, request.from, Boundary::Exclusive)
                    .await?
                    .quantity()
                    .ok_or_else(|| StoreError::message("membership seed on a scalar entity"))?;
                let transitions = self
                    .store()
                    .snapshots_in_range(&entity.entity_id, request.from, request.to)
                    .await?;
                let per_window = sweep_quantity(seed, &transitions, windows)?;
                Ok(per_window.into_iter().map(Contribution::Quantity).collect())
            }
            CountKind::Take | CountKind::UniqueTake => {
                let events = self
                    .store()
                    .events_in_range(&entity.entity_id, request.from, request.to)
                    .await?;
                Ok(take_subjects(&events, windows, filter)
                    .into_iter()
                    .map(Contribution::Subjects)
                    .collect())
            }
            CountKind::Enter
            | CountKind::UniqueEnter
            | CountKind::Exit
            | CountKind::UniqueExit
            | CountKind::Stay
            | CountKind::UniqueStay => {
                let seed = self
                    .seeded_state(entity, request.from, Boundary::Exclusive)
                    .await?
                    .members()
                    .cloned()
                    .ok_or_else(|| StoreError::message("scalar seed on a membership entity"))?;
                let transitions = self
                    .store()
                    .snapshots_in_range(&entity.entity_id, request.from, request.to)
                    .await?;
                let flows = sweep_membership(seed, &transitions, windows)?;
                Ok(flows
                    .iter()
                    .map(|flow| Contribution::Subjects(counted_subjects(request.count, flow, filter)))
                    .collect())
            }
        }
    }

    /// Group by subject attribute: one batched directory lookup, then
    /// bucket occurrences by attribute value.
    async fn aggregate_per_attribute(
        &self,
        request: &HistoryRequest,
        windows: &[Window],
        contributions: &[Vec<Contribution>],
        attribute: &str,
        subjects: &dyn SubjectDirectory,
    ) -> Result<HistorySeries, EngineError> {
        let mut all_subjects: BTreeSet<SubjectId> = BTreeSet::new();
        for per_entity in contributions {
            for contribution in per_entity {
                if let Contribution::Subjects(occurrences) = contribution {
                    all_subjects.extend(occurrences.iter().cloned());
                }
            }
        }
        let lookup: Vec<SubjectId> = all_subjects.into_iter().collect();
        let resolved = subjects.resolve_attribute(&lookup, attribute).await?;

        let mut groups: Vec<GroupKey> = Vec::new();
        let mut group_index: HashMap<String, usize> = HashMap::new();
        let mut buckets: Vec<Vec<Vec<SubjectId>>> = Vec::new();

        for (window_index, _) in windows.iter().enumerate() {
            for per_entity in contributions {
                let Some(Contribution::Subjects(occurrences)) = per_entity.get(window_index) else {
                    continue;
                };
                for subject in occurrences {
                    // Unresolvable subjects are excluded from attribute groups.
                    let Some(value) = resolved.get(subject) else {
                        continue;
                    };
                    let next = groups.len();
                    let group = *group_index.entry(value.clone()).or_insert(next);
                    if group == next {
                        groups.push(GroupKey::Attribute(value.clone()));
                        buckets.push(vec![Vec::new(); windows.len()]);
                    }
                    if let Some(cell) = buckets.get_mut(group).and_then(|row| row.get_mut(window_index)) {
                        cell.push(subject.clone());
                    }
                }
            }
        }

        let values = buckets
            .iter()
            .map(|row| {
                row.iter()
                    .map(|occurrences| count_cell(request.count, occurrences))
                    .collect()
            })
            .collect();

        Ok(HistorySeries {
            groups,
            windows: windows.to_vec(),
            values,
        })
    }
}

/// Reject structurally invalid requests before touching storage.
fn validate_request(request: &HistoryRequest) -> Result<(), EngineError> {
    if request.step <= TimeDelta::zero() {
        return Err(EngineError::unsupported_query("step must be positive"));
    }
    if request.to <= request.from {
        return Err(EngineError::unsupported_query("empty time range"));
    }
    if matches!(request.group_by, GroupBy::SubjectAttribute(_))
        && request.count == CountKind::Quantity
    {
        return Err(EngineError::unsupported_query(
            "count type 'quantity' cannot be grouped by subject attribute",
        ));
    }
    Ok(())
}

/// Aggregate every entity into the single "total" group.
fn aggregate_total(
    request: &HistoryRequest,
    windows: &[Window],
    contributions: &[Vec<Contribution>],
) -> HistorySeries {
    let mut row = Vec::with_capacity(windows.len());

    for (window_index, _) in windows.iter().enumerate() {
        if request.count == CountKind::Quantity {
            let mut total = Decimal::ZERO;
            for per_entity in contributions {
                if let Some(Contribution::Quantity(quantity)) = per_entity.get(window_index) {
                    total = total.saturating_add(*quantity);
                }
            }
            row.push(WindowValue::Quantity(total));
        } else {
            let mut merged: Vec<SubjectId> = Vec::new();
            for per_entity in contributions {
                if let Some(Contribution::Subjects(occurrences)) = per_entity.get(window_index) {
                    merged.extend(occurrences.iter().cloned());
                }
            }
            row.push(count_cell(request.count, &merged));
        }
    }

    HistorySeries {
        groups: vec![GroupKey::Total],
        windows: windows.to_vec(),
        values: vec![row],
    }
}

/// One group per entity, in entity order.
fn aggregate_per_entity(
    request: &HistoryRequest,
    windows: &[Window],
    entities: &[EntityRecord],
    contributions: &[Vec<Contribution>],
) -> HistorySeries {
    let groups = entities
        .iter()
        .map(|entity| GroupKey::Entity(entity.entity_id.clone()))
        .collect();

    let values = contributions
        .iter()
        .map(|per_entity| {
            per_entity
                .iter()
                .map(|contribution| match contribution {
                    Contribution::Quantity(quantity) => WindowValue::Quantity(*quantity),
                    Contribution::Subjects(occurrences) => count_cell(request.count, occurrences),
                })
                .collect()
        })
        .collect();

    HistorySeries {
        groups,
        windows: windows.to_vec(),
        values,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use tally_types::{State, WriteMode};

    fn at(hour: u32, minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 2, hour, minute, 0)
            .single()
            .unwrap_or_default()
    }

    fn subjects(keys: &[&str]) -> BTreeSet<SubjectId> {
        keys.iter().copied().map(SubjectId::new).collect()
    }

    fn snapshot(hour: u32, minute: u32, members: &[&str]) -> SnapshotRecord {
        SnapshotRecord {
            entity_id: EntityId::new("room-1"),
            time: at(hour, minute),
            state: State::Membership(subjects(members)),
            mode: WriteMode::LiveWrite,
        }
    }

    #[test]
    fn partition_covers_the_range_exactly() {
        let windows = partition_windows(at(9, 0), at(12, 0), TimeDelta::hours(1));
        let windows = windows.unwrap_or_default();
        assert_eq!(windows.len(), 3);
        assert_eq!(windows.first().map(|w| w.start), Some(at(9, 0)));
        assert_eq!(windows.last().map(|w| w.end), Some(at(12, 0)));
    }

    #[test]
    fn trailing_window_is_truncated() {
        let windows = partition_windows(at(9, 0), at(10, 30), TimeDelta::hours(1));
        let windows = windows.unwrap_or_default();
        assert_eq!(windows.len(), 2);
        assert_eq!(
            windows.last().copied(),
            Some(Window {
                start: at(10, 0),
                end: at(10, 30),
            })
        );
    }

    #[test]
    fn sweep_diffs_are_pairwise_between_snapshots() {
        // A enters, exits, and re-enters inside one window: two
        // appearances, one disappearance.
        let windows = partition_windows(at(9, 0), at(10, 0), TimeDelta::hours(1))
            .unwrap_or_default();
        let transitions = vec![
            snapshot(9, 5, &["a"]),
            snapshot(9, 20, &[]),
            snapshot(9, 40, &["a"]),
        ];
        let flows = sweep_membership(BTreeSet::new(), &transitions, &windows);
        let flow = flows.ok().and_then(|mut f| f.pop());
        let appeared = flow.as_ref().map(|f| f.appeared.len());
        let disappeared = flow.as_ref().map(|f| f.disappeared.len());
        assert_eq!(appeared, Some(2));
        assert_eq!(disappeared, Some(1));
    }

    #[test]
    fn stay_counts_start_set_plus_appearances() {
        let flow = WindowFlow {
            start_active: subjects(&["a", "b"]),
            appeared: vec![SubjectId::new("c"), SubjectId::new("c")],
            disappeared: Vec::new(),
        };
        let stay = counted_subjects(CountKind::Stay, &flow, None);
        assert_eq!(stay.len(), 4);
        let unique = count_cell(CountKind::UniqueStay, &stay);
        assert_eq!(unique.count(), Some(3));
    }

    #[test]
    fn subject_filter_narrows_counted_sets() {
        let flow = WindowFlow {
            start_active: subjects(&["a", "b"]),
            appeared: vec![SubjectId::new("c")],
            disappeared: Vec::new(),
        };
        let allowed = subjects(&["a", "c"]);
        let stay = counted_subjects(CountKind::Stay, &flow, Some(&allowed));
        assert_eq!(stay.len(), 2);
    }

    #[test]
    fn quantity_sweep_is_last_write_wins() {
        let windows = partition_windows(at(8, 0), at(10, 0), TimeDelta::hours(1))
            .unwrap_or_default();
        let transitions = vec![
            SnapshotRecord {
                entity_id: EntityId::new("stock-1"),
                time: at(8, 15),
                state: State::Quantity(Decimal::new(100, 0)),
                mode: WriteMode::LiveWrite,
            },
            SnapshotRecord {
                entity_id: EntityId::new("stock-1"),
                time: at(8, 45),
                state: State::Quantity(Decimal::new(95, 0)),
                mode: WriteMode::LiveWrite,
            },
        ];
        let per_window = sweep_quantity(Decimal::ZERO, &transitions, &windows);
        assert_eq!(
            per_window.ok(),
            Some(vec![Decimal::new(95, 0), Decimal::new(95, 0)])
        );
    }

    #[test]
    fn invalid_requests_are_rejected() {
        let bad_step = HistoryRequest::new(at(9, 0), at(10, 0), TimeDelta::zero(), CountKind::Stay);
        assert!(validate_request(&bad_step).is_err());

        let empty_range =
            HistoryRequest::new(at(10, 0), at(9, 0), TimeDelta::hours(1), CountKind::Stay);
        assert!(validate_request(&empty_range).is_err());

        let quantity_by_attribute =
            HistoryRequest::new(at(9, 0), at(10, 0), TimeDelta::hours(1), CountKind::Quantity)
                .grouped_by(GroupBy::SubjectAttribute("department".to_owned()));
        assert!(validate_request(&quantity_by_attribute).is_err());
    }

    #[test]
    fn unique_never_exceeds_non_unique() {
        let occurrences = vec![
            SubjectId::new("a"),
            SubjectId::new("a"),
            SubjectId::new("b"),
        ];
        let plain = count_cell(CountKind::Enter, &occurrences).count();
        let unique = count_cell(CountKind::UniqueEnter, &occurrences).count();
        assert!(unique <= plain);
        assert_eq!(plain, Some(3));
        assert_eq!(unique, Some(2));
    }
}
