//! The pull request engine.
//!
//! Every public operation enters here: input is validated, the caller is
//! authorized against the repository, branches are checked with the git
//! resolver where needed, and timeline entries are written through the
//! two-phase sequencing protocol in [`sequencing`].
//!
//! The engine keeps no state between calls. Any number of instances, in one
//! process or many, can share a database; ordering is decided solely by the
//! stores' conditional writes.

mod access;
mod comment;
mod create;
mod error;
mod error_mapping;
mod input;
mod review;
mod sequencing;
mod state;
mod timeline;

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::auth::AuthorizationGate;
use crate::git::GitRefResolver;
use crate::model::Session;
use crate::persistence::{
    ActivityStore, Database, PullRequestStore, RepositoryStore, RetryBudget, ReviewStore,
    SqliteActivityStore, SqlitePullRequestStore, SqliteRepositoryStore, SqliteReviewStore,
};
use crate::telemetry::TelemetrySink;

pub use comment::CommentInput;
pub use create::CreatePullRequest;
pub use error::EngineError;
pub use input::{MAX_COMMENT_LENGTH, MAX_TITLE_LENGTH};

/// Collaborators injected into a [`PullReqEngine`].
#[derive(Clone)]
pub struct EngineParts {
    /// Pull request records.
    pub pull_requests: Arc<dyn PullRequestStore>,
    /// Timeline entries.
    pub activities: Arc<dyn ActivityStore>,
    /// Repository registry.
    pub repositories: Arc<dyn RepositoryStore>,
    /// Reviews and reviewers.
    pub reviews: Arc<dyn ReviewStore>,
    /// Permission checks.
    pub authorizer: Arc<dyn AuthorizationGate>,
    /// Branch resolution.
    pub git: Arc<dyn GitRefResolver>,
    /// Operational events.
    pub telemetry: Arc<dyn TelemetrySink>,
}

impl EngineParts {
    /// Wires the `SQLite` stores over `database` together with the given
    /// collaborators.
    #[must_use]
    pub fn sqlite(
        database: &Database,
        budget: RetryBudget,
        authorizer: Arc<dyn AuthorizationGate>,
        git: Arc<dyn GitRefResolver>,
        telemetry: Arc<dyn TelemetrySink>,
    ) -> Self {
        Self {
            pull_requests: Arc::new(SqlitePullRequestStore::new(
                database.clone(),
                budget,
                Arc::clone(&telemetry),
            )),
            activities: Arc::new(SqliteActivityStore::new(
                database.clone(),
                budget,
                Arc::clone(&telemetry),
            )),
            repositories: Arc::new(SqliteRepositoryStore::new(database.clone())),
            reviews: Arc::new(SqliteReviewStore::new(database.clone())),
            authorizer,
            git,
            telemetry,
        }
    }
}

/// Per-call context: who is calling and how to abandon the call.
#[derive(Debug, Clone)]
pub struct CallContext {
    session: Session,
    cancel: CancellationToken,
}

impl CallContext {
    /// Context for `session` that is never cancelled.
    #[must_use]
    pub fn new(session: Session) -> Self {
        Self {
            session,
            cancel: CancellationToken::new(),
        }
    }

    /// Context for `session` abandoned when `cancel` fires.
    #[must_use]
    pub const fn with_cancellation(session: Session, cancel: CancellationToken) -> Self {
        Self { session, cancel }
    }

    /// The calling session.
    #[must_use]
    pub const fn session(&self) -> &Session {
        &self.session
    }

    /// The token aborting in-flight collaborator calls.
    #[must_use]
    pub const fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }
}

/// Orchestrates pull request use cases over injected collaborators.
#[derive(Clone)]
pub struct PullReqEngine {
    parts: EngineParts,
}

impl PullReqEngine {
    /// Creates an engine over `parts`.
    #[must_use]
    pub const fn new(parts: EngineParts) -> Self {
        Self { parts }
    }
}

#[cfg(test)]
mod test_support;
