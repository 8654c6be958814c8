//! Per-domain event vocabularies.
//!
//! The four tracked domains speak slightly different verbs for the same
//! two state variants: spaces say `enter`/`exit`, machines and reusable
//! equipment say `acquire`/`release`, consumable stock says `set` (or
//! `restock`) and `take`. This module is the thin translation layer that
//! maps each domain's wording onto the engine's single
//! [`EventAction`] vocabulary, so the engine itself stays generic.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::event::EventAction;
use crate::ids::SubjectId;
use crate::state::StateKind;

/// The four tracked domains.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Domain {
    /// Physical spaces (rooms).
    Space,
    /// Shared machine instances.
    Machine,
    /// Reusable equipment items.
    Equipment,
    /// Consumable stock-keeping types.
    Stock,
}

impl Domain {
    /// Which state variant entities of this domain carry.
    pub const fn state_kind(self) -> StateKind {
        match self {
            Self::Space | Self::Machine | Self::Equipment => StateKind::Membership,
            Self::Stock => StateKind::Scalar,
        }
    }

    /// Translate a domain verb into the engine vocabulary.
    ///
    /// Membership domains accept their own synonyms plus the canonical
    /// `enter`/`exit`. `subject` is required for every verb except `set`
    /// and `restock`; `quantity` is required for the scalar verbs.
    ///
    /// # Errors
    ///
    /// Returns [`VocabularyError`] for unknown verbs or missing payload
    /// fields.
    pub fn translate(
        self,
        verb: &str,
        subject: Option<SubjectId>,
        quantity: Option<Decimal>,
    ) -> Result<EventAction, VocabularyError> {
        match (self, verb) {
            (Self::Space | Self::Machine | Self::Equipment, "enter")
            | (Self::Machine | Self::Equipment, "acquire") => Ok(EventAction::Enter {
                subject: subject.ok_or(VocabularyError::MissingSubject { verb: "enter" })?,
            }),
            (Self::Space | Self::Machine | Self::Equipment, "exit")
            | (Self::Machine | Self::Equipment, "release") => Ok(EventAction::Exit {
                subject: subject.ok_or(VocabularyError::MissingSubject { verb: "exit" })?,
            }),
            (Self::Stock, "set" | "restock") => Ok(EventAction::Set {
                quantity: quantity.ok_or(VocabularyError::MissingQuantity { verb: "set" })?,
            }),
            (Self::Stock, "take") => Ok(EventAction::Take {
                subject: subject.ok_or(VocabularyError::MissingSubject { verb: "take" })?,
                quantity: quantity.ok_or(VocabularyError::MissingQuantity { verb: "take" })?,
            }),
            _ => Err(VocabularyError::UnknownVerb {
                domain: self,
                verb: verb.to_owned(),
            }),
        }
    }
}

impl core::fmt::Display for Domain {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let name = match self {
            Self::Space => "space",
            Self::Machine => "machine",
            Self::Equipment => "equipment",
            Self::Stock => "stock",
        };
        write!(f, "{name}")
    }
}

/// Errors from translating a domain verb.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum VocabularyError {
    /// The verb is not part of this domain's vocabulary.
    #[error("unknown verb '{verb}' for {domain} domain")]
    UnknownVerb {
        /// The domain consulted.
        domain: Domain,
        /// The verb that failed to translate.
        verb: String,
    },

    /// The verb requires an acting subject.
    #[error("verb '{verb}' requires a subject id")]
    MissingSubject {
        /// The canonical verb.
        verb: &'static str,
    },

    /// The verb requires a quantity payload.
    #[error("verb '{verb}' requires a quantity")]
    MissingQuantity {
        /// The canonical verb.
        verb: &'static str,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn machine_acquire_translates_to_enter() {
        let action = Domain::Machine.translate("acquire", Some(SubjectId::new("m1")), None);
        assert_eq!(
            action.ok(),
            Some(EventAction::Enter {
                subject: SubjectId::new("m1"),
            })
        );
    }

    #[test]
    fn equipment_release_translates_to_exit() {
        let action = Domain::Equipment.translate("release", Some(SubjectId::new("m1")), None);
        assert_eq!(
            action.ok(),
            Some(EventAction::Exit {
                subject: SubjectId::new("m1"),
            })
        );
    }

    #[test]
    fn space_does_not_speak_acquire() {
        let result = Domain::Space.translate("acquire", Some(SubjectId::new("m1")), None);
        assert!(matches!(
            result,
            Err(VocabularyError::UnknownVerb { domain: Domain::Space, .. })
        ));
    }

    #[test]
    fn stock_restock_is_a_set_synonym() {
        let action = Domain::Stock.translate("restock", None, Some(Decimal::new(100, 0)));
        assert_eq!(
            action.ok(),
            Some(EventAction::Set {
                quantity: Decimal::new(100, 0),
            })
        );
    }

    #[test]
    fn stock_take_requires_subject_and_quantity() {
        let no_subject = Domain::Stock.translate("take", None, Some(Decimal::ONE));
        assert_eq!(
            no_subject,
            Err(VocabularyError::MissingSubject { verb: "take" })
        );

        let no_quantity = Domain::Stock.translate("take", Some(SubjectId::new("m1")), None);
        assert_eq!(
            no_quantity,
            Err(VocabularyError::MissingQuantity { verb: "take" })
        );
    }

    #[test]
    fn domain_state_kinds() {
        assert_eq!(Domain::Space.state_kind(), StateKind::Membership);
        assert_eq!(Domain::Stock.state_kind(), StateKind::Scalar);
    }
}
