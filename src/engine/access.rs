//! Lookups that authorize the caller before revealing anything.

use std::future::Future;

use crate::auth::{AccessDecision, Permission};
use crate::cancel::OrCancelExt;
use crate::git::{RefInfo, RefKind};
use crate::model::{ActivityId, ActivityKind, PullReqActivity, PullReqRef, PullRequest, Repository};
use crate::persistence::PersistenceError;

use super::error_mapping::{map_branch_error, map_persistence_error};
use super::input::require_branch;
use super::{CallContext, EngineError, PullReqEngine};

/// Awaits a store call, abandoning it when the context is cancelled.
pub(super) async fn store_call<T, F>(
    ctx: &CallContext,
    operation: &str,
    call: F,
) -> Result<T, EngineError>
where
    T: Send,
    F: Future<Output = Result<T, PersistenceError>> + Send,
{
    call.or_cancel(ctx.cancellation())
        .await?
        .map_err(|error| map_persistence_error(operation, error))
}

/// Awaits a store call under cancellation but leaves the storage error
/// unmapped, for callers that treat some failures specially.
pub(super) async fn store_result<T, F>(
    ctx: &CallContext,
    call: F,
) -> Result<Result<T, PersistenceError>, EngineError>
where
    T: Send,
    F: Future<Output = Result<T, PersistenceError>> + Send,
{
    Ok(call.or_cancel(ctx.cancellation()).await?)
}

impl PullReqEngine {
    /// Fails with a generic denial unless the caller holds `permission`.
    pub(super) async fn check_repo(
        &self,
        ctx: &CallContext,
        repo: &Repository,
        permission: Permission,
    ) -> Result<(), EngineError> {
        let decision = self
            .parts
            .authorizer
            .check(ctx.session(), repo, permission)
            .or_cancel(ctx.cancellation())
            .await?;
        match decision {
            AccessDecision::Allow => Ok(()),
            AccessDecision::Deny { reason } => {
                tracing::debug!("denied {permission} on {}: {reason}", repo.path);
                Err(EngineError::denied())
            }
        }
    }

    /// Resolves `repo_ref` and checks `permission` on it.
    pub(super) async fn get_repo_check_access(
        &self,
        ctx: &CallContext,
        repo_ref: &str,
        permission: Permission,
    ) -> Result<Repository, EngineError> {
        if repo_ref.trim().is_empty() {
            return Err(EngineError::validation(
                "A valid repository reference must be provided.",
            ));
        }

        let repo = store_call(
            ctx,
            "find repository",
            self.parts.repositories.find_by_ref(repo_ref),
        )
        .await?;
        self.check_repo(ctx, &repo, permission).await?;

        Ok(repo)
    }

    /// Resolves the target repository of `pr_ref`, checks `permission`, and
    /// loads the pull request. The repository check happens first so a denied
    /// caller learns nothing about which numbers exist.
    pub(super) async fn get_pull_request_check_access(
        &self,
        ctx: &CallContext,
        pr_ref: &PullReqRef,
        permission: Permission,
    ) -> Result<(Repository, PullRequest), EngineError> {
        if pr_ref.number <= 0 {
            return Err(EngineError::validation(
                "A valid pull request number must be provided.",
            ));
        }

        let repo = self
            .get_repo_check_access(ctx, &pr_ref.repo, permission)
            .await?;
        let pr = store_call(
            ctx,
            "find pull request",
            self.parts
                .pull_requests
                .find_by_number(repo.id, pr_ref.number),
        )
        .await?;

        Ok((repo, pr))
    }

    /// Loads a comment of `pr`, hiding entries that are deleted or belong
    /// elsewhere.
    pub(super) async fn get_comment(
        &self,
        ctx: &CallContext,
        pr: &PullRequest,
        comment_id: i64,
    ) -> Result<PullReqActivity, EngineError> {
        if comment_id <= 0 {
            return Err(EngineError::validation(
                "A valid comment ID must be provided.",
            ));
        }

        let comment = store_call(
            ctx,
            "find comment",
            self.parts.activities.find(ActivityId::new(comment_id)),
        )
        .await?;

        if comment.status.is_deleted()
            || comment.repo_id != pr.target_repo_id
            || comment.pull_req_id != pr.id
        {
            return Err(EngineError::not_found("comment not found"));
        }

        Ok(comment)
    }

    /// Loads a comment the caller is allowed to edit or delete.
    pub(super) async fn get_comment_check_edit_access(
        &self,
        ctx: &CallContext,
        pr: &PullRequest,
        comment_id: i64,
    ) -> Result<PullReqActivity, EngineError> {
        let comment = self.get_comment(ctx, pr, comment_id).await?;

        if comment.kind == ActivityKind::System {
            return Err(EngineError::validation(
                "Can't update a comment created by the system.",
            ));
        }

        if comment.created_by != ctx.session().principal_id() {
            return Err(EngineError::validation("Only own comments may be updated."));
        }

        Ok(comment)
    }

    /// Resolves `branch` in `repo`, turning a missing branch into a
    /// validation error.
    pub(super) async fn verify_branch_existence(
        &self,
        ctx: &CallContext,
        repo: &Repository,
        branch: &str,
    ) -> Result<RefInfo, EngineError> {
        let name = require_branch(branch)?;
        self.parts
            .git
            .resolve_ref(repo, name, RefKind::Branch)
            .or_cancel(ctx.cancellation())
            .await?
            .map_err(|error| map_branch_error(repo, name, error))
    }

    /// Authors may act on their own pull request with `own`; everyone else
    /// needs `others`.
    pub(super) async fn check_author_or(
        &self,
        ctx: &CallContext,
        repo: &Repository,
        pr: &PullRequest,
        own: Permission,
        others: Permission,
    ) -> Result<(), EngineError> {
        let permission = if pr.created_by == ctx.session().principal_id() {
            own
        } else {
            others
        };
        self.check_repo(ctx, repo, permission).await
    }
}
