//! Authorization checks on repositories.

mod grants;

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::model::{Repository, Session};

pub use grants::GrantTableGate;

/// A permission that can be held on a repository.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Permission {
    /// Read the repository and its pull requests.
    RepoView,
    /// Administer pull requests authored by others.
    RepoEdit,
    /// Update branches, including merging.
    RepoPush,
    /// Write to a pull request's timeline.
    PullReqComment,
    /// Submit and request reviews.
    PullReqReview,
}

impl fmt::Display for Permission {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(match self {
            Self::RepoView => "repo:view",
            Self::RepoEdit => "repo:edit",
            Self::RepoPush => "repo:push",
            Self::PullReqComment => "pullreq:comment",
            Self::PullReqReview => "pullreq:review",
        })
    }
}

/// Outcome of an authorization check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AccessDecision {
    /// The principal holds the permission.
    Allow,
    /// The principal lacks the permission.
    Deny {
        /// Reason for operators; never shown to the caller.
        reason: String,
    },
}

impl AccessDecision {
    /// Returns true for [`AccessDecision::Allow`].
    #[must_use]
    pub const fn is_allowed(&self) -> bool {
        matches!(self, Self::Allow)
    }
}

/// Evaluates permissions for a session.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait AuthorizationGate: Send + Sync {
    /// Checks whether the session's principal holds `permission` on `repo`.
    async fn check(
        &self,
        session: &Session,
        repo: &Repository,
        permission: Permission,
    ) -> AccessDecision;
}
