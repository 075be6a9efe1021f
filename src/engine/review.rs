//! Reviewer requests and review submissions.

use crate::auth::Permission;
use crate::model::{
    ActivityDraft, ActivityPayload, NewReview, PrincipalId, PullReqRef, PullReqState, Review,
    ReviewDecision, Reviewer,
};

use super::access::store_call;
use super::{CallContext, EngineError, PullReqEngine};

impl PullReqEngine {
    /// Asks `reviewer` to review the request. Asking twice is a no-op.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Validation`] when `reviewer` authored the
    /// request.
    pub async fn request_review(
        &self,
        ctx: &CallContext,
        pr_ref: &PullReqRef,
        reviewer: PrincipalId,
    ) -> Result<Reviewer, EngineError> {
        let (_repo, pr) = self
            .get_pull_request_check_access(ctx, pr_ref, Permission::PullReqReview)
            .await?;
        if reviewer == pr.created_by {
            return Err(EngineError::validation(
                "The pull request author can't be added as a reviewer.",
            ));
        }

        store_call(
            ctx,
            "add reviewer",
            self.parts
                .reviews
                .add_reviewer(pr.id, reviewer, ctx.session().principal_id()),
        )
        .await
    }

    /// Records the caller's verdict against the current source head and
    /// notes it on the timeline.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Validation`] when the request is not open or
    /// the author tries to approve their own change.
    pub async fn submit_review(
        &self,
        ctx: &CallContext,
        pr_ref: &PullReqRef,
        decision: ReviewDecision,
    ) -> Result<Review, EngineError> {
        let (_repo, mut pr) = self
            .get_pull_request_check_access(ctx, pr_ref, Permission::PullReqReview)
            .await?;
        if pr.state != PullReqState::Open {
            return Err(EngineError::validation(format!(
                "Can't review a pull request that is {}.",
                pr.state
            )));
        }
        let reviewer = ctx.session().principal_id();
        if reviewer == pr.created_by && decision == ReviewDecision::Approved {
            return Err(EngineError::validation(
                "Pull request author can't approve their own pull request.",
            ));
        }

        let new = NewReview {
            pull_req_id: pr.id,
            created_by: reviewer,
            decision,
            commit_sha: pr.source_sha.clone(),
        };
        let review = store_call(ctx, "create review", self.parts.reviews.create_review(&new))
            .await?;
        store_call(
            ctx,
            "record review decision",
            self.parts.reviews.record_review_decision(&review),
        )
        .await?;

        let draft = ActivityDraft::top_level(
            reviewer,
            pr.target_repo_id,
            pr.id,
            ActivityPayload::ReviewSubmit {
                decision,
                commit_sha: review.commit_sha.clone(),
            },
        );
        self.write_activity(ctx, &mut pr, draft).await?;

        Ok(review)
    }

    /// Lists requested reviewers with their latest decisions.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::NotFound`] for an unknown pull request.
    pub async fn list_reviewers(
        &self,
        ctx: &CallContext,
        pr_ref: &PullReqRef,
    ) -> Result<Vec<Reviewer>, EngineError> {
        let (_repo, pr) = self
            .get_pull_request_check_access(ctx, pr_ref, Permission::RepoView)
            .await?;
        store_call(
            ctx,
            "list reviewers",
            self.parts.reviews.list_reviewers(pr.id),
        )
        .await
    }
}
