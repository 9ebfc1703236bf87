//! Typed identifiers for record-store entities.
//!
//! Ids are opaque strings assigned by the record store (uuid v4 in the
//! in-memory backend). The newtypes exist so a deposit id can never be
//! handed to a submission lookup.

use std::fmt;

use serde::{Deserialize, Serialize};

macro_rules! entity_id {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Wraps a raw record-store id.
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            /// Generates a fresh random id.
            pub fn random() -> Self {
                Self(uuid::Uuid::new_v4().to_string())
            }

            /// The raw id string.
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
            fn from(s: &str) -> Self {
                Self(s.to_owned())
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }
    };
}

entity_id!(
    /// Identifier of a [`crate::Submission`].
    SubmissionId
);
entity_id!(
    /// Identifier of a [`crate::Repository`].
    RepositoryId
);
entity_id!(
    /// Identifier of a [`crate::Deposit`].
    DepositId
);
entity_id!(
    /// Identifier of a [`crate::RepositoryCopy`].
    RepositoryCopyId
);
