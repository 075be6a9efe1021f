//! Lifecycle transitions and other changes to the pull request record.

use chrono::Utc;

use crate::auth::Permission;
use crate::model::{
    ActivityDraft, ActivityPayload, MergeRecord, PullReqRef, PullReqState, PullRequest,
    PullRequestChange, Repository, TransitionError,
};
use crate::persistence::PersistenceError;
use crate::telemetry::TelemetryEvent;

use super::access::{store_call, store_result};
use super::error_mapping::{map_persistence_error, map_transition_error};
use super::input::sanitize_title;
use super::{CallContext, EngineError, PullReqEngine};

fn ensure_transition(pr: &PullRequest, to: PullReqState) -> Result<(), EngineError> {
    if pr.state.can_transition_to(to) {
        return Ok(());
    }
    Err(map_transition_error(&TransitionError::IllegalTransition {
        from: pr.state,
        to,
    }))
}

impl PullReqEngine {
    /// Closes an open pull request without merging it.
    ///
    /// Authors need comment access; anyone else needs edit access.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Validation`] unless the request is open.
    pub async fn close_pull_request(
        &self,
        ctx: &CallContext,
        pr_ref: &PullReqRef,
    ) -> Result<PullRequest, EngineError> {
        let (repo, pr) = self
            .get_pull_request_check_access(ctx, pr_ref, Permission::RepoView)
            .await?;
        self.check_author_or(
            ctx,
            &repo,
            &pr,
            Permission::PullReqComment,
            Permission::RepoEdit,
        )
        .await?;
        ensure_transition(&pr, PullReqState::Closed)?;

        let change = PullRequestChange::State {
            to: PullReqState::Closed,
            merge: None,
            source_sha: None,
        };
        let closed = store_call(
            ctx,
            "close pull request",
            self.parts.pull_requests.update(&pr, &change),
        )
        .await?;

        self.record_state_change(ctx, &repo, closed, pr.state).await
    }

    /// Reopens a closed pull request.
    ///
    /// Both branches must still exist and no other request may have been
    /// opened for the same branch pair in the meantime. The source head is
    /// refreshed.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Conflict`] carrying the other request's number
    /// when the branch pair is taken.
    pub async fn reopen_pull_request(
        &self,
        ctx: &CallContext,
        pr_ref: &PullReqRef,
    ) -> Result<PullRequest, EngineError> {
        let (repo, pr) = self
            .get_pull_request_check_access(ctx, pr_ref, Permission::RepoView)
            .await?;
        self.check_author_or(
            ctx,
            &repo,
            &pr,
            Permission::PullReqComment,
            Permission::RepoEdit,
        )
        .await?;
        ensure_transition(&pr, PullReqState::Open)?;

        let source_repo = self.source_repository(ctx, &repo, &pr).await?;
        self.verify_branch_existence(ctx, &repo, &pr.target_branch)
            .await?;
        let source_head = self
            .verify_branch_existence(ctx, &source_repo, &pr.source_branch)
            .await?;
        self.check_if_already_exists(
            ctx,
            pr.target_repo_id,
            pr.source_repo_id,
            &pr.target_branch,
            &pr.source_branch,
        )
        .await?;

        let change = PullRequestChange::State {
            to: PullReqState::Open,
            merge: None,
            source_sha: Some(source_head.sha),
        };
        let reopened = match store_result(ctx, self.parts.pull_requests.update(&pr, &change))
            .await?
        {
            Ok(reopened) => reopened,
            Err(PersistenceError::UniqueViolation { .. }) => {
                return Err(self
                    .duplicate_conflict(
                        ctx,
                        pr.target_repo_id,
                        pr.source_repo_id,
                        &pr.target_branch,
                        &pr.source_branch,
                    )
                    .await);
            }
            Err(error) => return Err(map_persistence_error("reopen pull request", error)),
        };

        self.record_state_change(ctx, &repo, reopened, pr.state)
            .await
    }

    /// Merges an open pull request.
    ///
    /// Requires push access on the target. Both branches must still exist
    /// and the source head must be the one last observed; otherwise nothing
    /// is changed.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Conflict`] when the source branch moved since
    /// it was last synced, [`EngineError::Validation`] when a branch is gone
    /// or the request is not open.
    pub async fn merge_pull_request(
        &self,
        ctx: &CallContext,
        pr_ref: &PullReqRef,
    ) -> Result<PullRequest, EngineError> {
        let (repo, pr) = self
            .get_pull_request_check_access(ctx, pr_ref, Permission::RepoPush)
            .await?;
        ensure_transition(&pr, PullReqState::Merged)?;

        let source_repo = self.source_repository(ctx, &repo, &pr).await?;
        self.verify_branch_existence(ctx, &repo, &pr.target_branch)
            .await?;
        let source_head = self
            .verify_branch_existence(ctx, &source_repo, &pr.source_branch)
            .await?;
        if source_head.sha != pr.source_sha {
            return Err(EngineError::Conflict {
                message: format!(
                    "source branch {} has moved since it was last observed; sync the pull request \
                     before merging",
                    pr.source_branch
                ),
                existing_number: None,
            });
        }

        let change = PullRequestChange::State {
            to: PullReqState::Merged,
            merge: Some(MergeRecord {
                merged_by: ctx.session().principal_id(),
                merged_at: Utc::now(),
                merge_sha: source_head.sha.clone(),
            }),
            source_sha: None,
        };
        let mut merged = store_call(
            ctx,
            "merge pull request",
            self.parts.pull_requests.update(&pr, &change),
        )
        .await?;
        self.emit_state_changed(&repo, &merged, pr.state);

        let draft = ActivityDraft::top_level(
            ctx.session().principal_id(),
            merged.target_repo_id,
            merged.id,
            ActivityPayload::Merge {
                merge_sha: source_head.sha,
                source_branch: merged.source_branch.clone(),
                target_branch: merged.target_branch.clone(),
            },
        );
        self.write_activity(ctx, &mut merged, draft).await?;

        Ok(merged)
    }

    /// Re-reads the source head and records it when it moved.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Validation`] when the request is not open or the
    /// source branch no longer exists.
    pub async fn sync_source_branch(
        &self,
        ctx: &CallContext,
        pr_ref: &PullReqRef,
    ) -> Result<PullRequest, EngineError> {
        let (repo, pr) = self
            .get_pull_request_check_access(ctx, pr_ref, Permission::PullReqComment)
            .await?;
        if pr.state != PullReqState::Open {
            return Err(map_transition_error(&TransitionError::NotOpen {
                state: pr.state,
            }));
        }

        let source_repo = self.source_repository(ctx, &repo, &pr).await?;
        let source_head = self
            .verify_branch_existence(ctx, &source_repo, &pr.source_branch)
            .await?;
        if source_head.sha == pr.source_sha {
            return Ok(pr);
        }

        let mut synced = store_call(
            ctx,
            "update source head",
            self.parts
                .pull_requests
                .update(&pr, &PullRequestChange::SourceSha(source_head.sha.clone())),
        )
        .await?;

        let draft = ActivityDraft::top_level(
            ctx.session().principal_id(),
            synced.target_repo_id,
            synced.id,
            ActivityPayload::BranchUpdate {
                old_sha: pr.source_sha,
                new_sha: source_head.sha,
            },
        );
        self.write_activity(ctx, &mut synced, draft).await?;

        Ok(synced)
    }

    /// Replaces the title and description.
    ///
    /// A title change is recorded on the timeline; a description-only change
    /// is not. The change only lands if the title is still the one read at
    /// the start of the call.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Validation`] for an invalid title and
    /// [`EngineError::Conflict`] when the title was changed concurrently.
    pub async fn update_title(
        &self,
        ctx: &CallContext,
        pr_ref: &PullReqRef,
        title: &str,
        description: &str,
    ) -> Result<PullRequest, EngineError> {
        let title = sanitize_title(title)?;
        let description = description.trim().to_owned();
        let (repo, pr) = self
            .get_pull_request_check_access(ctx, pr_ref, Permission::RepoView)
            .await?;
        self.check_author_or(
            ctx,
            &repo,
            &pr,
            Permission::PullReqComment,
            Permission::RepoEdit,
        )
        .await?;

        if pr.title == title && pr.description == description {
            return Ok(pr);
        }

        let change = PullRequestChange::Title {
            title: title.clone(),
            description,
            replacing: pr.title.clone(),
        };
        let mut updated = store_call(
            ctx,
            "update pull request title",
            self.parts.pull_requests.update(&pr, &change),
        )
        .await?;

        if pr.title != title {
            let draft = ActivityDraft::top_level(
                ctx.session().principal_id(),
                updated.target_repo_id,
                updated.id,
                ActivityPayload::TitleChange {
                    old: pr.title,
                    new: title,
                },
            );
            self.write_activity(ctx, &mut updated, draft).await?;
        }

        Ok(updated)
    }

    async fn source_repository(
        &self,
        ctx: &CallContext,
        target: &Repository,
        pr: &PullRequest,
    ) -> Result<Repository, EngineError> {
        if pr.source_repo_id == target.id {
            return Ok(target.clone());
        }
        store_call(
            ctx,
            "find source repository",
            self.parts.repositories.find(pr.source_repo_id),
        )
        .await
    }

    /// Writes the `StateChange` entry for a close or reopen and returns the
    /// freshest record.
    async fn record_state_change(
        &self,
        ctx: &CallContext,
        repo: &Repository,
        mut pr: PullRequest,
        old: PullReqState,
    ) -> Result<PullRequest, EngineError> {
        self.emit_state_changed(repo, &pr, old);

        let draft = ActivityDraft::top_level(
            ctx.session().principal_id(),
            pr.target_repo_id,
            pr.id,
            ActivityPayload::StateChange { old, new: pr.state },
        );
        self.write_activity(ctx, &mut pr, draft).await?;

        Ok(pr)
    }

    fn emit_state_changed(&self, repo: &Repository, pr: &PullRequest, old: PullReqState) {
        tracing::info!(
            "pull request {}#{} moved from {old} to {}",
            repo.path,
            pr.number,
            pr.state
        );
        self.parts
            .telemetry
            .record(TelemetryEvent::PullRequestStateChanged {
                pull_req_id: pr.id.get(),
                old_state: old.to_string(),
                new_state: pr.state.to_string(),
            });
    }
}
