//! Opening pull requests and the duplicate check.

use crate::auth::Permission;
use crate::model::{
    NewPullRequest, PullReqFilter, PullReqSort, PullReqState, PullRequest, RepoId, SortOrder,
};
use crate::persistence::PersistenceError;

use super::access::{store_call, store_result};
use super::error_mapping::map_persistence_error;
use super::input::{require_branch, sanitize_title};
use super::{CallContext, EngineError, PullReqEngine};

/// Input for [`PullReqEngine::create_pull_request`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreatePullRequest {
    /// Repository receiving the merge.
    pub target_repo_ref: String,
    /// Repository holding the source branch; the target when `None`.
    pub source_repo_ref: Option<String>,
    /// Branch to merge from.
    pub source_branch: String,
    /// Branch to merge into.
    pub target_branch: String,
    /// Title shown in listings.
    pub title: String,
    /// Free-form description.
    pub description: String,
}

impl PullReqEngine {
    /// Opens a pull request.
    ///
    /// The caller needs read access to both repositories and comment access
    /// on the target. Both branches must exist, and no other request may be
    /// open for the same branch pair; in that case the error carries the
    /// existing request's number.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Validation`] for bad input or missing branches,
    /// [`EngineError::Conflict`] for a duplicate, [`EngineError::NotFound`]
    /// for an unknown repository and [`EngineError::Authorization`] on
    /// denial.
    pub async fn create_pull_request(
        &self,
        ctx: &CallContext,
        input: &CreatePullRequest,
    ) -> Result<PullRequest, EngineError> {
        let title = sanitize_title(&input.title)?;
        let source_branch = require_branch(&input.source_branch)?;
        let target_branch = require_branch(&input.target_branch)?;

        let target_repo = self
            .get_repo_check_access(ctx, &input.target_repo_ref, Permission::RepoView)
            .await?;
        self.check_repo(ctx, &target_repo, Permission::PullReqComment)
            .await?;

        let source_repo = match input.source_repo_ref.as_deref() {
            Some(source_ref) if !source_ref.trim().is_empty() => {
                self.get_repo_check_access(ctx, source_ref, Permission::RepoView)
                    .await?
            }
            _ => target_repo.clone(),
        };

        if source_repo.id == target_repo.id && source_branch == target_branch {
            return Err(EngineError::validation(
                "source branch and target branch can't be the same",
            ));
        }

        self.verify_branch_existence(ctx, &target_repo, target_branch)
            .await?;
        let source_head = self
            .verify_branch_existence(ctx, &source_repo, source_branch)
            .await?;

        self.check_if_already_exists(
            ctx,
            target_repo.id,
            source_repo.id,
            target_branch,
            source_branch,
        )
        .await?;

        let new = NewPullRequest {
            created_by: ctx.session().principal_id(),
            title,
            description: input.description.trim().to_owned(),
            source_repo_id: source_repo.id,
            source_branch: source_branch.to_owned(),
            source_sha: source_head.sha,
            target_repo_id: target_repo.id,
            target_branch: target_branch.to_owned(),
        };

        let result = self.parts.pull_requests.create(&new);
        match store_result(ctx, result).await? {
            Ok(pr) => {
                tracing::info!(
                    "opened pull request {}#{} ({} -> {})",
                    target_repo.path,
                    pr.number,
                    pr.source_branch,
                    pr.target_branch
                );
                Ok(pr)
            }
            // Lost the race to a concurrent create of the same branch pair.
            Err(PersistenceError::UniqueViolation { .. }) => Err(self
                .duplicate_conflict(ctx, target_repo.id, source_repo.id, target_branch, source_branch)
                .await),
            Err(error) => Err(map_persistence_error("create pull request", error)),
        }
    }

    /// Fails with `Conflict` when a request is already open for the branch
    /// pair.
    pub(super) async fn check_if_already_exists(
        &self,
        ctx: &CallContext,
        target_repo_id: RepoId,
        source_repo_id: RepoId,
        target_branch: &str,
        source_branch: &str,
    ) -> Result<(), EngineError> {
        let filter = PullReqFilter {
            states: vec![PullReqState::Open],
            source_repo_id: Some(source_repo_id),
            source_branch: Some(source_branch.to_owned()),
            target_branch: Some(target_branch.to_owned()),
            sort: PullReqSort::Number,
            order: SortOrder::Asc,
            size: 1,
            ..PullReqFilter::default()
        };
        let existing = store_call(
            ctx,
            "list existing pull requests",
            self.parts.pull_requests.list(target_repo_id, &filter),
        )
        .await?;

        match existing.first() {
            Some(pr) => Err(already_exists(pr.number)),
            None => Ok(()),
        }
    }

    /// Explains a unique-index rejection of an open request.
    pub(super) async fn duplicate_conflict(
        &self,
        ctx: &CallContext,
        target_repo_id: RepoId,
        source_repo_id: RepoId,
        target_branch: &str,
        source_branch: &str,
    ) -> EngineError {
        match self
            .check_if_already_exists(ctx, target_repo_id, source_repo_id, target_branch, source_branch)
            .await
        {
            Err(error) => error,
            // The winner was closed again before we looked.
            Ok(()) => EngineError::Conflict {
                message: "a pull request for this target and source branch already exists"
                    .to_owned(),
                existing_number: None,
            },
        }
    }
}

/// Conflict pointing the caller at the request that is already open.
pub(super) fn already_exists(number: i64) -> EngineError {
    EngineError::Conflict {
        message: "a pull request for this target and source branch already exists".to_owned(),
        existing_number: Some(number),
    }
}
