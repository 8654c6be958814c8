//! Type-safe identifier wrappers for external keys and version tokens.
//!
//! Entities and subjects are identified by stable external keys supplied by
//! the surrounding system (room codes, asset tags, member numbers), so they
//! wrap [`String`] rather than a UUID. The optimistic-concurrency version
//! token is engine-internal and uses UUID v7 (time-ordered) so that fresh
//! tokens index well.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Generates a newtype wrapper around [`String`] with standard derives.
macro_rules! define_key {
    (
        $(#[$meta:meta])*
        $name:ident
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            /// Create a key from anything convertible into a [`String`].
            pub fn new(key: impl Into<String>) -> Self {
                Self(key.into())
            }

            /// Return the key as a string slice.
            pub fn as_str(&self) -> &str {
                &self.0
            }

            /// Consume the wrapper and return the inner [`String`].
            pub fn into_inner(self) -> String {
                self.0
            }
        }

        impl core::fmt::Display for $name {
            fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<&str> for $name {
            fn from(key: &str) -> Self {
                Self(key.to_owned())
            }
        }

        impl From<String> for $name {
            fn from(key: String) -> Self {
                Self(key)
            }
        }
    };
}

define_key! {
    /// Stable external key for a tracked entity (a space, a machine
    /// instance, a reusable equipment item, or a stock-keeping type).
    EntityId
}

define_key! {
    /// Stable external key for a subject (the member occupying or using
    /// an entity).
    SubjectId
}

/// Opaque optimistic-concurrency token on an entity row.
///
/// Regenerated on every accepted state change. A conditional update that
/// names a stale token fails, which is how concurrent writers against the
/// same entity are serialized.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct VersionId(pub Uuid);

impl VersionId {
    /// Create a fresh version token using UUID v7 (time-ordered).
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    /// Return the inner [`Uuid`] value.
    pub const fn into_inner(self) -> Uuid {
        self.0
    }
}

impl Default for VersionId {
    fn default() -> Self {
        Self::new()
    }
}

impl core::fmt::Display for VersionId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Uuid> for VersionId {
    fn from(id: Uuid) -> Self {
        Self(id)
    }
}

impl From<VersionId> for Uuid {
    fn from(id: VersionId) -> Self {
        id.0
    }
}
