//! Hosted repository records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::RepoId;

/// A repository known to the platform.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Repository {
    /// Repository identifier.
    pub id: RepoId,
    /// Human readable path, e.g. `space/name`.
    pub path: String,
    /// Storage key used by the git service.
    pub git_uid: String,
    /// Branch used when none is specified.
    pub default_branch: String,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
}

/// Data required to register a repository.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewRepository {
    /// Human readable path, e.g. `space/name`.
    pub path: String,
    /// Storage key used by the git service.
    pub git_uid: String,
    /// Branch used when none is specified.
    pub default_branch: String,
}
