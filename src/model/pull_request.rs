//! Pull request records and the lifecycle state machine.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::{PrincipalId, PullReqId, RepoId, Versioned};

/// Lifecycle state of a pull request.
///
/// `Open → Closed`, `Open → Merged` and `Closed → Open` are the only legal
/// transitions; nothing leaves `Merged`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PullReqState {
    /// Accepting comments and reviews; can be merged.
    Open,
    /// Closed without merging; can be reopened.
    Closed,
    /// Merged into the target branch. Terminal.
    Merged,
}

impl PullReqState {
    /// Storage representation.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::Closed => "closed",
            Self::Merged => "merged",
        }
    }

    /// Returns true when moving from `self` to `next` is a legal transition.
    #[must_use]
    pub const fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Open, Self::Closed | Self::Merged) | (Self::Closed, Self::Open)
        )
    }
}

impl fmt::Display for PullReqState {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(self.as_str())
    }
}

impl FromStr for PullReqState {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "open" => Ok(Self::Open),
            "closed" => Ok(Self::Closed),
            "merged" => Ok(Self::Merged),
            other => Err(format!("unknown pull request state '{other}'")),
        }
    }
}

/// Details recorded when a pull request is merged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergeRecord {
    /// Principal that performed the merge.
    pub merged_by: PrincipalId,
    /// Time of the merge.
    pub merged_at: DateTime<Utc>,
    /// Source head that was merged.
    pub merge_sha: String,
}

/// A request to merge a source branch into a target branch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PullRequest {
    /// Storage identifier.
    pub id: PullReqId,
    /// Optimistic-locking version.
    pub version: i64,
    /// Display number, unique per target repository.
    pub number: i64,
    /// Author of the request.
    pub created_by: PrincipalId,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Last modification timestamp.
    pub updated_at: DateTime<Utc>,
    /// Lifecycle state.
    pub state: PullReqState,
    /// Title shown in listings.
    pub title: String,
    /// Free-form description.
    pub description: String,
    /// Repository holding the source branch.
    pub source_repo_id: RepoId,
    /// Branch to merge from.
    pub source_branch: String,
    /// Source head last observed by the platform.
    pub source_sha: String,
    /// Repository receiving the merge; owns the request.
    pub target_repo_id: RepoId,
    /// Branch to merge into.
    pub target_branch: String,
    /// Counter handing out top-level timeline positions.
    pub activity_seq: i64,
    /// Present once the request is merged.
    pub merge: Option<MergeRecord>,
}

impl Versioned for PullRequest {
    fn version(&self) -> i64 {
        self.version
    }

    fn advance_version(&mut self, now: DateTime<Utc>) {
        self.version += 1;
        self.updated_at = now;
    }
}

/// Data required to open a pull request.
///
/// The store assigns the identifier, number, version and activity sequence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewPullRequest {
    /// Author of the request.
    pub created_by: PrincipalId,
    /// Title shown in listings.
    pub title: String,
    /// Free-form description.
    pub description: String,
    /// Repository holding the source branch.
    pub source_repo_id: RepoId,
    /// Branch to merge from.
    pub source_branch: String,
    /// Source head at creation time.
    pub source_sha: String,
    /// Repository receiving the merge.
    pub target_repo_id: RepoId,
    /// Branch to merge into.
    pub target_branch: String,
}

/// Addresses a pull request by repository reference and display number.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PullReqRef {
    /// Repository path or numeric identifier.
    pub repo: String,
    /// Display number within that repository.
    pub number: i64,
}

impl PullReqRef {
    /// Builds a reference from its parts.
    #[must_use]
    pub fn new(repo: impl Into<String>, number: i64) -> Self {
        Self {
            repo: repo.into(),
            number,
        }
    }
}

impl fmt::Display for PullReqRef {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(formatter, "{}#{}", self.repo, self.number)
    }
}

/// A conditional modification applied to a pull request under optimistic
/// locking.
///
/// Changes are re-applied to the freshly read record after a version
/// conflict, so each variant validates against the state it finds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PullRequestChange {
    /// Hand out the next top-level timeline position.
    BumpActivitySeq,
    /// Move to a new lifecycle state.
    State {
        /// Target state.
        to: PullReqState,
        /// Required when `to` is `Merged`.
        merge: Option<MergeRecord>,
        /// Refreshed source head, recorded on reopen.
        source_sha: Option<String>,
    },
    /// Record a new source head.
    SourceSha(String),
    /// Replace title and description.
    Title {
        /// New title.
        title: String,
        /// New description.
        description: String,
        /// Title the caller saw; the change is refused if it no longer
        /// matches.
        replacing: String,
    },
}

/// Raised when a change is not legal for the record it is applied to.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransitionError {
    /// The lifecycle transition is not permitted.
    #[error("pull request can't move from {from} to {to}")]
    IllegalTransition {
        /// Current state.
        from: PullReqState,
        /// Requested state.
        to: PullReqState,
    },

    /// A merge was requested without merge details.
    #[error("merge details are required to mark a pull request merged")]
    MissingMergeRecord,

    /// The change only applies to open pull requests.
    #[error("pull request is {state}, expected open")]
    NotOpen {
        /// Current state.
        state: PullReqState,
    },

    /// The merge names a head other than the one last recorded.
    #[error("source branch head is now {recorded}, refusing to merge {merging}")]
    SourceMoved {
        /// Head stored on the pull request.
        recorded: String,
        /// Head the merge was validated against.
        merging: String,
    },

    /// The title was replaced since the caller read it.
    #[error("title was changed to '{current}' in the meantime")]
    TitleChanged {
        /// Title stored on the pull request.
        current: String,
    },
}

impl TransitionError {
    /// Whether the change was validated against a record that has since
    /// moved on, as opposed to being illegal outright.
    #[must_use]
    pub const fn is_stale(&self) -> bool {
        matches!(self, Self::SourceMoved { .. } | Self::TitleChanged { .. })
    }
}

impl PullRequest {
    /// Applies `change` in place.
    ///
    /// # Errors
    ///
    /// Returns [`TransitionError`] when the change is illegal for the current
    /// state of the record.
    pub fn apply(&mut self, change: &PullRequestChange) -> Result<(), TransitionError> {
        match change {
            PullRequestChange::BumpActivitySeq => {
                self.activity_seq += 1;
            }
            PullRequestChange::State {
                to,
                merge,
                source_sha,
            } => {
                if !self.state.can_transition_to(*to) {
                    return Err(TransitionError::IllegalTransition {
                        from: self.state,
                        to: *to,
                    });
                }
                if *to == PullReqState::Merged {
                    let record = merge.clone().ok_or(TransitionError::MissingMergeRecord)?;
                    if record.merge_sha != self.source_sha {
                        return Err(TransitionError::SourceMoved {
                            recorded: self.source_sha.clone(),
                            merging: record.merge_sha,
                        });
                    }
                    self.merge = Some(record);
                }
                if let Some(sha) = source_sha {
                    self.source_sha.clone_from(sha);
                }
                self.state = *to;
            }
            PullRequestChange::SourceSha(sha) => {
                self.ensure_open()?;
                self.source_sha.clone_from(sha);
            }
            PullRequestChange::Title {
                title,
                description,
                replacing,
            } => {
                if self.title != *replacing {
                    return Err(TransitionError::TitleChanged {
                        current: self.title.clone(),
                    });
                }
                self.title.clone_from(title);
                self.description.clone_from(description);
            }
        }
        Ok(())
    }

    const fn ensure_open(&self) -> Result<(), TransitionError> {
        match self.state {
            PullReqState::Open => Ok(()),
            state => Err(TransitionError::NotOpen { state }),
        }
    }
}
