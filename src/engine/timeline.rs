//! Read-only queries.

use crate::auth::Permission;
use crate::model::{ActivityFilter, PullReqActivity, PullReqFilter, PullReqRef, PullRequest};

use super::access::store_call;
use super::{CallContext, EngineError, PullReqEngine};

impl PullReqEngine {
    /// Loads one pull request.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::NotFound`] for an unknown repository or number.
    pub async fn find_pull_request(
        &self,
        ctx: &CallContext,
        pr_ref: &PullReqRef,
    ) -> Result<PullRequest, EngineError> {
        let (_repo, pr) = self
            .get_pull_request_check_access(ctx, pr_ref, Permission::RepoView)
            .await?;
        Ok(pr)
    }

    /// Lists pull requests targeting `repo_ref`.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::NotFound`] for an unknown repository.
    pub async fn list_pull_requests(
        &self,
        ctx: &CallContext,
        repo_ref: &str,
        filter: &PullReqFilter,
    ) -> Result<Vec<PullRequest>, EngineError> {
        let repo = self
            .get_repo_check_access(ctx, repo_ref, Permission::RepoView)
            .await?;
        store_call(
            ctx,
            "list pull requests",
            self.parts.pull_requests.list(repo.id, filter),
        )
        .await
    }

    /// Reads the timeline ordered by position, replies directly after their
    /// parent.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::NotFound`] for an unknown pull request.
    pub async fn list_activities(
        &self,
        ctx: &CallContext,
        pr_ref: &PullReqRef,
        filter: &ActivityFilter,
    ) -> Result<Vec<PullReqActivity>, EngineError> {
        let (_repo, pr) = self
            .get_pull_request_check_access(ctx, pr_ref, Permission::RepoView)
            .await?;
        store_call(
            ctx,
            "list activities",
            self.parts.activities.list(pr.id, filter),
        )
        .await
    }
}
