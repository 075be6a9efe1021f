//! Comments, threaded replies, edits, and soft deletion.

use chrono::Utc;

use crate::auth::Permission;
use crate::model::{
    ActivityChange, ActivityDraft, ActivityPayload, CodeLocation, PullReqActivity, PullReqRef,
};

use super::access::store_call;
use super::input::sanitize_comment;
use super::{CallContext, EngineError, PullReqEngine};

/// Input for [`PullReqEngine::create_comment`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommentInput {
    /// Markdown body.
    pub text: String,
    /// Anchors the comment to a diff line when present.
    pub location: Option<CodeLocation>,
}

impl CommentInput {
    /// A plain discussion comment.
    #[must_use]
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            location: None,
        }
    }

    fn into_payload(self) -> Result<ActivityPayload, EngineError> {
        let text = sanitize_comment(&self.text)?;
        Ok(match self.location {
            Some(location) => {
                if location.path.trim().is_empty() || location.line == 0 {
                    return Err(EngineError::validation(
                        "code comments need a file path and a line number",
                    ));
                }
                ActivityPayload::CodeComment { text, location }
            }
            None => ActivityPayload::Comment { text },
        })
    }
}

impl PullReqEngine {
    /// Appends a top-level comment to the timeline.
    ///
    /// Comments are accepted in every lifecycle state.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Validation`] for blank or oversized text and
    /// [`EngineError::Conflict`] when the sequence could not be reserved.
    pub async fn create_comment(
        &self,
        ctx: &CallContext,
        pr_ref: &PullReqRef,
        input: &CommentInput,
    ) -> Result<PullReqActivity, EngineError> {
        let payload = input.clone().into_payload()?;
        let (_repo, mut pr) = self
            .get_pull_request_check_access(ctx, pr_ref, Permission::PullReqComment)
            .await?;

        let draft = ActivityDraft::top_level(
            ctx.session().principal_id(),
            pr.target_repo_id,
            pr.id,
            payload,
        );
        self.write_activity(ctx, &mut pr, draft).await
    }

    /// Replies to a top-level entry.
    ///
    /// Any live top-level entry can be replied to, system events included.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::NotFound`] when the parent is deleted or belongs
    /// to another request and [`EngineError::Validation`] when the parent is
    /// itself a reply.
    pub async fn reply_to_comment(
        &self,
        ctx: &CallContext,
        pr_ref: &PullReqRef,
        parent_id: i64,
        text: &str,
    ) -> Result<PullReqActivity, EngineError> {
        let text = sanitize_comment(text)?;
        let (_repo, pr) = self
            .get_pull_request_check_access(ctx, pr_ref, Permission::PullReqComment)
            .await?;
        let mut parent = self.get_comment(ctx, &pr, parent_id).await?;
        if parent.is_reply() {
            return Err(EngineError::validation("Can't reply to a reply."));
        }

        let draft = ActivityDraft::reply(
            ctx.session().principal_id(),
            &parent,
            ActivityPayload::Comment { text },
        );
        self.write_reply_activity(ctx, &mut parent, draft).await
    }

    /// Replaces the text of the caller's own comment. Position and anchor are
    /// kept.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Validation`] for system entries and for
    /// comments written by someone else.
    pub async fn edit_comment(
        &self,
        ctx: &CallContext,
        pr_ref: &PullReqRef,
        comment_id: i64,
        text: &str,
    ) -> Result<PullReqActivity, EngineError> {
        let text = sanitize_comment(text)?;
        let (_repo, pr) = self
            .get_pull_request_check_access(ctx, pr_ref, Permission::PullReqComment)
            .await?;
        let comment = self
            .get_comment_check_edit_access(ctx, &pr, comment_id)
            .await?;

        if comment.payload.text() == Some(text.as_str()) {
            return Ok(comment);
        }
        let payload = comment.payload.with_text(&text).ok_or_else(|| {
            EngineError::validation("Can't update a comment created by the system.")
        })?;

        store_call(
            ctx,
            "edit comment",
            self.parts
                .activities
                .update(&comment, &ActivityChange::Payload(payload)),
        )
        .await
    }

    /// Soft-deletes the caller's own comment. Siblings keep their positions.
    ///
    /// # Errors
    ///
    /// Same as [`PullReqEngine::edit_comment`].
    pub async fn delete_comment(
        &self,
        ctx: &CallContext,
        pr_ref: &PullReqRef,
        comment_id: i64,
    ) -> Result<PullReqActivity, EngineError> {
        let (_repo, pr) = self
            .get_pull_request_check_access(ctx, pr_ref, Permission::PullReqComment)
            .await?;
        let comment = self
            .get_comment_check_edit_access(ctx, &pr, comment_id)
            .await?;

        let change = ActivityChange::SoftDelete {
            deleted_at: Utc::now(),
        };
        let deleted = store_call(
            ctx,
            "delete comment",
            self.parts.activities.update(&comment, &change),
        )
        .await?;
        tracing::debug!("comment {} on {pr_ref} deleted", deleted.id);

        Ok(deleted)
    }
}
