//! Domain records for pull requests, their timeline, and review satellites.
//!
//! These types are storage-agnostic. The persistence layer maps them to and
//! from `SQLite` rows; the engine enforces the business rules around them.

mod activity;
mod filter;
mod ids;
mod pull_request;
mod repository;
mod review;
mod session;

pub use activity::{
    ActivityChange, ActivityDraft, ActivityKind, ActivityPayload, ActivityStatus, CodeLocation,
    PullReqActivity,
};
pub use filter::{ActivityFilter, PullReqFilter, PullReqSort, SortOrder};
pub use ids::{ActivityId, PrincipalId, PullReqId, RepoId, ReviewId};
pub use pull_request::{
    MergeRecord, NewPullRequest, PullReqRef, PullReqState, PullRequest, PullRequestChange,
    TransitionError,
};
pub use repository::{NewRepository, Repository};
pub use review::{NewReview, Review, ReviewDecision, Reviewer};
pub use session::{Principal, Session};

/// A record guarded by an optimistic-locking version column.
pub trait Versioned: Clone {
    /// Current version as last read from storage.
    fn version(&self) -> i64;

    /// Advances the version after a successful conditional write.
    fn advance_version(&mut self, now: chrono::DateTime<chrono::Utc>);
}
