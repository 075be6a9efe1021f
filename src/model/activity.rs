//! Timeline activities: comments, replies, and system events.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{ActivityId, PrincipalId, PullReqId, PullReqState, RepoId, ReviewDecision, Versioned};

/// Broad classification of a timeline entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityKind {
    /// Generated by the platform; immutable once written.
    System,
    /// A discussion comment or reply.
    Comment,
    /// A comment anchored to a line of the diff.
    ChangeComment,
}

impl ActivityKind {
    /// Storage representation.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::System => "system",
            Self::Comment => "comment",
            Self::ChangeComment => "change-comment",
        }
    }
}

impl fmt::Display for ActivityKind {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(self.as_str())
    }
}

impl FromStr for ActivityKind {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "system" => Ok(Self::System),
            "comment" => Ok(Self::Comment),
            "change-comment" => Ok(Self::ChangeComment),
            other => Err(format!("unknown activity kind '{other}'")),
        }
    }
}

/// Position of a code comment in the diff.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodeLocation {
    /// Repository-relative file path.
    pub path: String,
    /// One-based line number in the new revision.
    pub line: u32,
}

/// Content of a timeline entry, stored as tagged JSON.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ActivityPayload {
    /// Free-form discussion text.
    Comment {
        /// Markdown body.
        text: String,
    },
    /// Discussion text anchored to a diff line.
    CodeComment {
        /// Markdown body.
        text: String,
        /// Anchor in the diff.
        location: CodeLocation,
    },
    /// The lifecycle state changed.
    StateChange {
        /// Previous state.
        old: PullReqState,
        /// New state.
        new: PullReqState,
    },
    /// The request was merged.
    Merge {
        /// Merged source head.
        merge_sha: String,
        /// Source branch name at merge time.
        source_branch: String,
        /// Target branch name at merge time.
        target_branch: String,
    },
    /// The title was edited.
    TitleChange {
        /// Previous title.
        old: String,
        /// New title.
        new: String,
    },
    /// The source branch moved.
    BranchUpdate {
        /// Previously observed head.
        old_sha: String,
        /// Newly observed head.
        new_sha: String,
    },
    /// A reviewer submitted a decision.
    ReviewSubmit {
        /// The recorded decision.
        decision: ReviewDecision,
        /// Source head the review applies to.
        commit_sha: String,
    },
}

impl ActivityPayload {
    /// The kind implied by this payload.
    #[must_use]
    pub const fn kind(&self) -> ActivityKind {
        match self {
            Self::Comment { .. } => ActivityKind::Comment,
            Self::CodeComment { .. } => ActivityKind::ChangeComment,
            Self::StateChange { .. }
            | Self::Merge { .. }
            | Self::TitleChange { .. }
            | Self::BranchUpdate { .. }
            | Self::ReviewSubmit { .. } => ActivityKind::System,
        }
    }

    /// Returns the comment text, if this payload carries one.
    #[must_use]
    pub fn text(&self) -> Option<&str> {
        match self {
            Self::Comment { text } | Self::CodeComment { text, .. } => Some(text.as_str()),
            _ => None,
        }
    }

    /// Returns a copy with the comment text replaced, or `None` for system
    /// payloads.
    #[must_use]
    pub fn with_text(&self, new_text: &str) -> Option<Self> {
        match self {
            Self::Comment { .. } => Some(Self::Comment {
                text: new_text.to_owned(),
            }),
            Self::CodeComment { location, .. } => Some(Self::CodeComment {
                text: new_text.to_owned(),
                location: location.clone(),
            }),
            _ => None,
        }
    }
}

/// Soft-deletion state of an activity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ActivityStatus {
    /// Visible in the timeline.
    Active,
    /// Hidden; the row and its position are kept.
    Deleted {
        /// Time of deletion.
        deleted_at: DateTime<Utc>,
    },
}

impl ActivityStatus {
    /// Returns true for soft-deleted entries.
    #[must_use]
    pub const fn is_deleted(self) -> bool {
        matches!(self, Self::Deleted { .. })
    }

    /// Deletion time, if any.
    #[must_use]
    pub const fn deleted_at(self) -> Option<DateTime<Utc>> {
        match self {
            Self::Active => None,
            Self::Deleted { deleted_at } => Some(deleted_at),
        }
    }
}

/// A persisted timeline entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PullReqActivity {
    /// Storage identifier.
    pub id: ActivityId,
    /// Optimistic-locking version.
    pub version: i64,
    /// Author.
    pub created_by: PrincipalId,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Last modification timestamp.
    pub updated_at: DateTime<Utc>,
    /// Target repository of the owning pull request.
    pub repo_id: RepoId,
    /// Owning pull request.
    pub pull_req_id: PullReqId,
    /// Thread root for replies.
    pub parent_id: Option<ActivityId>,
    /// Position among top-level entries; replies carry the parent's order.
    pub order: i64,
    /// Zero for top-level entries, position within the thread for replies.
    pub sub_order: i64,
    /// Counter handing out reply positions under this entry.
    pub reply_seq: i64,
    /// Entry classification.
    pub kind: ActivityKind,
    /// Entry content.
    pub payload: ActivityPayload,
    /// Soft-deletion state.
    pub status: ActivityStatus,
}

impl PullReqActivity {
    /// Returns true for replies.
    #[must_use]
    pub const fn is_reply(&self) -> bool {
        self.parent_id.is_some()
    }

    /// Applies `change` in place; the caller has already validated it.
    pub fn apply(&mut self, change: &ActivityChange) {
        match change {
            ActivityChange::BumpReplySeq => self.reply_seq += 1,
            ActivityChange::Payload(payload) => self.payload = payload.clone(),
            ActivityChange::SoftDelete { deleted_at } => {
                self.status = ActivityStatus::Deleted {
                    deleted_at: *deleted_at,
                };
            }
        }
    }
}

impl Versioned for PullReqActivity {
    fn version(&self) -> i64 {
        self.version
    }

    fn advance_version(&mut self, now: DateTime<Utc>) {
        self.version += 1;
        self.updated_at = now;
    }
}

/// A conditional modification of an existing activity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActivityChange {
    /// Hand out the next reply position under this entry.
    BumpReplySeq,
    /// Replace the payload (comment edits).
    Payload(ActivityPayload),
    /// Mark the entry deleted.
    SoftDelete {
        /// Time of deletion.
        deleted_at: DateTime<Utc>,
    },
}

/// An activity that has been given its timeline position but not persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActivityDraft {
    /// Author.
    pub created_by: PrincipalId,
    /// Target repository of the owning pull request.
    pub repo_id: RepoId,
    /// Owning pull request.
    pub pull_req_id: PullReqId,
    /// Thread root for replies.
    pub parent_id: Option<ActivityId>,
    /// Assigned top-level position.
    pub order: i64,
    /// Assigned reply position.
    pub sub_order: i64,
    /// Entry content; its kind is derived from it.
    pub payload: ActivityPayload,
}

impl ActivityDraft {
    /// Starts a top-level draft; `order` is filled in by the sequencer.
    #[must_use]
    pub const fn top_level(
        created_by: PrincipalId,
        repo_id: RepoId,
        pull_req_id: PullReqId,
        payload: ActivityPayload,
    ) -> Self {
        Self {
            created_by,
            repo_id,
            pull_req_id,
            parent_id: None,
            order: 0,
            sub_order: 0,
            payload,
        }
    }

    /// Starts a reply draft under `parent`.
    #[must_use]
    pub fn reply(created_by: PrincipalId, parent: &PullReqActivity, payload: ActivityPayload) -> Self {
        Self {
            created_by,
            repo_id: parent.repo_id,
            pull_req_id: parent.pull_req_id,
            parent_id: Some(parent.id),
            order: parent.order,
            sub_order: 0,
            payload,
        }
    }

    /// Kind implied by the payload.
    #[must_use]
    pub const fn kind(&self) -> ActivityKind {
        self.payload.kind()
    }
}
