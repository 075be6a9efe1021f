//! Newtype wrappers for database identifiers.
//!
//! Every identifier is an `i64` in storage; the wrappers stop a repository ID
//! from being passed where a pull request ID is expected.

use std::fmt;

use serde::{Deserialize, Serialize};

macro_rules! define_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(i64);

        impl $name {
            /// Wraps a raw storage identifier.
            #[must_use]
            pub const fn new(value: i64) -> Self {
                Self(value)
            }

            /// Returns the raw storage identifier.
            #[must_use]
            pub const fn get(self) -> i64 {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(formatter, "{}", self.0)
            }
        }
    };
}

define_id!(
    /// Identifier of a hosted repository.
    RepoId
);
define_id!(
    /// Identifier of an authenticated principal (user or service account).
    PrincipalId
);
define_id!(
    /// Storage identifier of a pull request (not its display number).
    PullReqId
);
define_id!(
    /// Identifier of a timeline activity.
    ActivityId
);
define_id!(
    /// Identifier of a submitted review.
    ReviewId
);
