//! Authenticated caller identity.

use serde::{Deserialize, Serialize};

use super::PrincipalId;

/// The actor performing an operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Principal {
    /// Principal identifier.
    pub id: PrincipalId,
    /// Stable login name.
    pub uid: String,
    /// Name shown in the timeline.
    pub display_name: String,
    /// Administrators pass every authorization check.
    pub admin: bool,
}

/// Opaque session issued by the authentication subsystem.
///
/// Only the principal is consumed here; token handling happens upstream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    /// The authenticated principal.
    pub principal: Principal,
}

impl Session {
    /// Builds a session for the given principal.
    #[must_use]
    pub const fn new(principal: Principal) -> Self {
        Self { principal }
    }

    /// Identifier of the authenticated principal.
    #[must_use]
    pub const fn principal_id(&self) -> PrincipalId {
        self.principal.id
    }
}
