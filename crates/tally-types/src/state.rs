//! Entity state and the pure transition function.
//!
//! [`State`] is a tagged sum over the two variants the engine supports:
//! a membership set (who is currently inside/using the entity) and a
//! scalar quantity (how much stock remains). Keeping the variants in one
//! enum lets [`State::apply`] and the history aggregator's diff step be
//! exhaustively matched instead of dispatching on `serde_json::Value`.
//!
//! # Central invariant
//!
//! For a fixed entity, every snapshot's state is `previous.apply(action)`
//! for the event that produced it. Both the live writer and the bulk
//! importer go through [`State::apply`], so "most recent snapshot at T"
//! and "replay all events up to T" can never disagree.

use std::collections::BTreeSet;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::event::EventAction;
use crate::ids::SubjectId;

/// Which of the two state variants an entity carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StateKind {
    /// A set of subject ids (spaces, machines, reusable equipment).
    Membership,
    /// A numeric quantity (consumable stock).
    Scalar,
}

impl StateKind {
    /// Stable string form used in storage rows.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Membership => "membership",
            Self::Scalar => "scalar",
        }
    }

    /// Parse the stable string form written by [`StateKind::as_str`].
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "membership" => Some(Self::Membership),
            "scalar" => Some(Self::Scalar),
            _ => None,
        }
    }
}

impl core::fmt::Display for StateKind {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// The full materialized state of an entity at one instant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum State {
    /// Subjects currently present. Ordered set so serialized snapshots
    /// are deterministic.
    Membership(BTreeSet<SubjectId>),
    /// Remaining quantity. [`Decimal`], never floating point.
    Quantity(Decimal),
}

impl State {
    /// The empty/zero state an entity starts from before any events.
    pub const fn zero(kind: StateKind) -> Self {
        match kind {
            StateKind::Membership => Self::Membership(BTreeSet::new()),
            StateKind::Scalar => Self::Quantity(Decimal::ZERO),
        }
    }

    /// Which variant this state is.
    pub const fn kind(&self) -> StateKind {
        match self {
            Self::Membership(_) => StateKind::Membership,
            Self::Quantity(_) => StateKind::Scalar,
        }
    }

    /// The membership set, if this is membership state.
    pub const fn members(&self) -> Option<&BTreeSet<SubjectId>> {
        match self {
            Self::Membership(subjects) => Some(subjects),
            Self::Quantity(_) => None,
        }
    }

    /// The scalar quantity, if this is scalar state.
    pub const fn quantity(&self) -> Option<Decimal> {
        match self {
            Self::Membership(_) => None,
            Self::Quantity(quantity) => Some(*quantity),
        }
    }

    /// Apply one event action, producing the successor state.
    ///
    /// Membership transitions are idempotent: entering while already
    /// present or exiting while absent leaves the set unchanged (the
    /// event is still a recorded fact; only the state is a no-op).
    /// Scalar `set` replaces the quantity, `take` subtracts.
    ///
    /// # Errors
    ///
    /// Returns [`ApplyError::KindMismatch`] when the action vocabulary
    /// does not match the state variant (e.g. `take` on a membership
    /// entity).
    pub fn apply(&self, action: &EventAction) -> Result<Self, ApplyError> {
        match (self, action) {
            (Self::Membership(subjects), EventAction::Enter { subject }) => {
                let mut next = subjects.clone();
                next.insert(subject.clone());
                Ok(Self::Membership(next))
            }
            (Self::Membership(subjects), EventAction::Exit { subject }) => {
                let mut next = subjects.clone();
                next.remove(subject);
                Ok(Self::Membership(next))
            }
            (Self::Quantity(_), EventAction::Set { quantity }) => Ok(Self::Quantity(*quantity)),
            (Self::Quantity(current), EventAction::Take { quantity, .. }) => {
                Ok(Self::Quantity(current.saturating_sub(*quantity)))
            }
            (state, action) => Err(ApplyError::KindMismatch {
                state: state.kind(),
                action: action.verb(),
            }),
        }
    }
}

/// Errors from the pure transition function.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ApplyError {
    /// The action vocabulary does not match the state variant.
    #[error("action '{action}' cannot be applied to {state} state")]
    KindMismatch {
        /// The variant the entity carries.
        state: StateKind,
        /// The offending action verb.
        action: &'static str,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    fn subject(key: &str) -> SubjectId {
        SubjectId::new(key)
    }

    #[test]
    fn enter_adds_subject() {
        let state = State::zero(StateKind::Membership);
        let next = state.apply(&EventAction::Enter {
            subject: subject("alice"),
        });
        assert_eq!(
            next.ok().as_ref().and_then(State::members).map(BTreeSet::len),
            Some(1)
        );
    }

    #[test]
    fn enter_is_idempotent_on_state() {
        let action = EventAction::Enter {
            subject: subject("alice"),
        };
        let once = State::zero(StateKind::Membership).apply(&action);
        let twice = once.clone().and_then(|s| s.apply(&action));
        assert_eq!(once.ok(), twice.ok());
    }

    #[test]
    fn exit_of_absent_subject_is_noop() {
        let state = State::zero(StateKind::Membership);
        let next = state.apply(&EventAction::Exit {
            subject: subject("ghost"),
        });
        assert_eq!(next.ok(), Some(State::zero(StateKind::Membership)));
    }

    #[test]
    fn set_replaces_quantity() {
        let state = State::Quantity(Decimal::new(10, 0));
        let next = state.apply(&EventAction::Set {
            quantity: Decimal::new(100, 0),
        });
        assert_eq!(next.ok().and_then(|s| s.quantity()), Some(Decimal::new(100, 0)));
    }

    #[test]
    fn take_subtracts_quantity() {
        let state = State::Quantity(Decimal::new(100, 0));
        let next = state.apply(&EventAction::Take {
            subject: subject("m1"),
            quantity: Decimal::new(5, 0),
        });
        assert_eq!(next.ok().and_then(|s| s.quantity()), Some(Decimal::new(95, 0)));
    }

    #[test]
    fn kind_mismatch_is_rejected() {
        let state = State::zero(StateKind::Membership);
        let result = state.apply(&EventAction::Set {
            quantity: Decimal::ONE,
        });
        assert_eq!(
            result,
            Err(ApplyError::KindMismatch {
                state: StateKind::Membership,
                action: "set",
            })
        );
    }

    #[test]
    fn state_serde_is_tagged() {
        let state = State::Quantity(Decimal::new(92, 0));
        let json = serde_json::to_value(&state).ok();
        assert_eq!(
            json,
            Some(serde_json::json!({"kind": "quantity", "value": "92"}))
        );
    }
}
