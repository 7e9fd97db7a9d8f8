//! Identifier types for knowledge base elements.
//!
//! Knowledge base ids are authored strings, so unlike session ids they are
//! not generated. Each element family gets its own newtype to keep a
//! `VariantId` from being passed where a `PurposeId` is expected.

use std::borrow::Borrow;
use std::fmt;

use serde::{Deserialize, Serialize};

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Creates an id from any string-like value.
            #[must_use]
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            /// Returns the id as a string slice.
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(id: &str) -> Self {
                Self(id.to_string())
            }
        }

        impl From<String> for $name {
            fn from(id: String) -> Self {
                Self(id)
            }
        }

        impl Borrow<str> for $name {
            fn borrow(&self) -> &str {
                &self.0
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }
    };
}

string_id!(
    /// Identifier of a Purpose.
    PurposeId
);
string_id!(
    /// Identifier of a Variant.
    VariantId
);
string_id!(
    /// Identifier of a Feature.
    FeatureId
);
string_id!(
    /// Identifier of a single legal Feature value.
    FeatureValueId
);
string_id!(
    /// Identifier of a Concept.
    ConceptId
);
string_id!(
    /// Identifier of an Event.
    EventId
);
string_id!(
    /// Identifier of a Rule.
    RuleId
);
string_id!(
    /// Identifier of a Relation.
    RelationId
);
