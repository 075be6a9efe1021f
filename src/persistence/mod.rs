//! Storage for pull requests, their timelines and review satellites.
//!
//! Records live in a `SQLite` database whose schema is managed with Diesel
//! migrations. The stores are traits so the engine can run against fakes in
//! tests; the `SQLite` implementations hold no connection between calls and
//! coordinate purely through conditional writes on version columns.

mod activities;
mod connection;
mod error;
mod migrator;
mod optimistic;
mod pull_requests;
mod repositories;
mod reviews;

use async_trait::async_trait;

use crate::model::{
    ActivityChange, ActivityDraft, ActivityFilter, ActivityId, NewPullRequest, NewRepository,
    NewReview, PrincipalId, PullReqActivity, PullReqFilter, PullReqId, PullRequest,
    PullRequestChange, RepoId, Repository, Review, ReviewDecision, Reviewer,
};

pub use activities::SqliteActivityStore;
pub use connection::Database;
pub use error::PersistenceError;
pub use migrator::{
    CURRENT_SCHEMA_VERSION, INITIAL_SCHEMA_VERSION, MIGRATIONS, SchemaVersion, migrate_database,
};
pub use optimistic::RetryBudget;
pub use pull_requests::SqlitePullRequestStore;
pub use repositories::SqliteRepositoryStore;
pub use reviews::SqliteReviewStore;

/// Pull request records and the top-level activity sequence.
#[async_trait]
pub trait PullRequestStore: Send + Sync {
    /// Persists a new request with `activity_seq = 0` and the next display
    /// number for its target repository.
    ///
    /// A second open request for the same branch tuple is rejected with
    /// [`PersistenceError::UniqueViolation`].
    async fn create(&self, new: &NewPullRequest) -> Result<PullRequest, PersistenceError>;

    /// Loads a request by identifier.
    async fn find(&self, id: PullReqId) -> Result<PullRequest, PersistenceError>;

    /// Loads a request by target repository and display number.
    async fn find_by_number(
        &self,
        repo_id: RepoId,
        number: i64,
    ) -> Result<PullRequest, PersistenceError>;

    /// Lists requests targeting `repo_id`.
    async fn list(
        &self,
        repo_id: RepoId,
        filter: &PullReqFilter,
    ) -> Result<Vec<PullRequest>, PersistenceError>;

    /// Increments the activity sequence with a conditional write and returns
    /// the record as stored. `pr.activity_seq` of the result is the order
    /// reserved for the caller.
    async fn update_activity_seq(&self, pr: &PullRequest) -> Result<PullRequest, PersistenceError>;

    /// Applies `change` under optimistic locking, re-validating it against
    /// the freshest record on every attempt.
    async fn update(
        &self,
        pr: &PullRequest,
        change: &PullRequestChange,
    ) -> Result<PullRequest, PersistenceError>;
}

/// Timeline entries and the per-thread reply sequence.
#[async_trait]
pub trait ActivityStore: Send + Sync {
    /// Inserts an entry at the position carried by the draft.
    async fn create(&self, draft: &ActivityDraft) -> Result<PullReqActivity, PersistenceError>;

    /// Loads an entry by identifier, including soft-deleted ones.
    async fn find(&self, id: ActivityId) -> Result<PullReqActivity, PersistenceError>;

    /// Increments the reply sequence of `parent` with a conditional write.
    async fn update_reply_seq(
        &self,
        parent: &PullReqActivity,
    ) -> Result<PullReqActivity, PersistenceError>;

    /// Applies a payload edit or soft deletion under optimistic locking.
    /// Changes to an already deleted entry are rejected.
    async fn update(
        &self,
        activity: &PullReqActivity,
        change: &ActivityChange,
    ) -> Result<PullReqActivity, PersistenceError>;

    /// Lists a request's timeline ordered by `(order, sub_order)`.
    async fn list(
        &self,
        pull_req_id: PullReqId,
        filter: &ActivityFilter,
    ) -> Result<Vec<PullReqActivity>, PersistenceError>;
}

/// Repository registry.
#[async_trait]
pub trait RepositoryStore: Send + Sync {
    /// Registers a repository.
    async fn create(&self, new: &NewRepository) -> Result<Repository, PersistenceError>;

    /// Loads a repository by identifier.
    async fn find(&self, id: RepoId) -> Result<Repository, PersistenceError>;

    /// Loads a repository by numeric identifier or path.
    async fn find_by_ref(&self, repo_ref: &str) -> Result<Repository, PersistenceError>;
}

/// Reviews and requested reviewers.
#[async_trait]
pub trait ReviewStore: Send + Sync {
    /// Records a submitted review.
    async fn create_review(&self, new: &NewReview) -> Result<Review, PersistenceError>;

    /// Requests a review from `principal_id`. Requesting the same principal
    /// twice returns the existing entry.
    async fn add_reviewer(
        &self,
        pull_req_id: PullReqId,
        principal_id: PrincipalId,
        added_by: PrincipalId,
    ) -> Result<Reviewer, PersistenceError>;

    /// Stores `review` as the reviewer's latest decision, adding the reviewer
    /// if they were not requested.
    async fn record_review_decision(&self, review: &Review) -> Result<Reviewer, PersistenceError>;

    /// Lists reviewers of a request in the order they were added.
    async fn list_reviewers(&self, pull_req_id: PullReqId)
    -> Result<Vec<Reviewer>, PersistenceError>;
}

/// Decision column helper shared by the review store.
pub(crate) fn parse_decision(
    entity: &'static str,
    raw: &str,
) -> Result<ReviewDecision, PersistenceError> {
    raw.parse()
        .map_err(|message| PersistenceError::Corrupt { entity, message })
}

#[cfg(test)]
pub(crate) mod test_helpers {
    use rstest::fixture;
    use tempfile::TempDir;

    use super::{Database, migrate_database};
    use crate::telemetry::NoopTelemetrySink;

    /// A migrated database in a temporary directory.
    pub(crate) struct MigratedDatabase {
        pub(crate) database: Database,
        _temp_dir: TempDir,
    }

    #[fixture]
    pub(crate) fn migrated_database() -> MigratedDatabase {
        let temp_dir =
            TempDir::new().unwrap_or_else(|error| panic!("temp dir should be created: {error}"));
        let path = temp_dir.path().join("pullreq.sqlite");
        let url = path.to_string_lossy().into_owned();
        migrate_database(&url, &NoopTelemetrySink)
            .unwrap_or_else(|error| panic!("migration should succeed: {error}"));
        let database =
            Database::new(url).unwrap_or_else(|error| panic!("database should open: {error}"));
        MigratedDatabase {
            database,
            _temp_dir: temp_dir,
        }
    }
}
