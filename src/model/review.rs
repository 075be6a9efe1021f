//! Reviews and requested reviewers.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{PrincipalId, PullReqId, ReviewId};

/// Outcome of a review.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewDecision {
    /// The reviewer left feedback without a verdict.
    Reviewed,
    /// The reviewer approved the change.
    Approved,
    /// The reviewer asked for changes.
    ChangeRequested,
}

impl ReviewDecision {
    /// Storage representation.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Reviewed => "reviewed",
            Self::Approved => "approved",
            Self::ChangeRequested => "change_requested",
        }
    }
}

impl fmt::Display for ReviewDecision {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(self.as_str())
    }
}

impl FromStr for ReviewDecision {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "reviewed" => Ok(Self::Reviewed),
            "approved" => Ok(Self::Approved),
            "change_requested" => Ok(Self::ChangeRequested),
            other => Err(format!("unknown review decision '{other}'")),
        }
    }
}

/// A decision recorded against a snapshot of the source branch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Review {
    /// Storage identifier.
    pub id: ReviewId,
    /// Reviewed pull request.
    pub pull_req_id: PullReqId,
    /// Reviewer.
    pub created_by: PrincipalId,
    /// Submission time.
    pub created_at: DateTime<Utc>,
    /// Verdict.
    pub decision: ReviewDecision,
    /// Source head the verdict applies to.
    pub commit_sha: String,
}

/// Data required to record a review.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewReview {
    /// Reviewed pull request.
    pub pull_req_id: PullReqId,
    /// Reviewer.
    pub created_by: PrincipalId,
    /// Verdict.
    pub decision: ReviewDecision,
    /// Source head the verdict applies to.
    pub commit_sha: String,
}

/// A principal asked to review a pull request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reviewer {
    /// Pull request under review.
    pub pull_req_id: PullReqId,
    /// Requested reviewer.
    pub principal_id: PrincipalId,
    /// Who requested the review; equals `principal_id` for self-assignment.
    pub added_by: PrincipalId,
    /// When the reviewer was added.
    pub created_at: DateTime<Utc>,
    /// Most recent review by this principal.
    pub latest_review_id: Option<ReviewId>,
    /// Decision of the most recent review.
    pub review_decision: Option<ReviewDecision>,
}
