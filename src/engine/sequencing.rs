//! Two-phase timeline writes.
//!
//! A new entry first reserves its position by bumping a counter with a
//! conditional write, then inserts the row carrying that position. The two
//! steps touch different records and are not wrapped in one transaction: if
//! the insert fails (or the caller cancels between the steps) the reserved
//! position is simply never used. Positions may have gaps but are never
//! handed out twice.

use crate::cancel::OrCancelExt;
use crate::model::{ActivityDraft, PullReqActivity, PullRequest};
use crate::persistence::PersistenceError;
use crate::telemetry::{SequenceScope, TelemetryEvent};

use super::access::store_call;
use super::error_mapping::map_persistence_error;
use super::{CallContext, EngineError, PullReqEngine};

impl PullReqEngine {
    /// Appends a top-level entry to `pr`'s timeline.
    ///
    /// `pr` is replaced with the record returned by the sequence bump, so
    /// callers keep working with the freshest version.
    pub(super) async fn write_activity(
        &self,
        ctx: &CallContext,
        pr: &mut PullRequest,
        mut draft: ActivityDraft,
    ) -> Result<PullReqActivity, EngineError> {
        let updated = store_call(
            ctx,
            "reserve pull request activity number",
            self.parts.pull_requests.update_activity_seq(pr),
        )
        .await?;
        *pr = updated;

        draft.order = pr.activity_seq;
        draft.sub_order = 0;

        self.insert_sequenced(ctx, SequenceScope::PullRequest, draft)
            .await
    }

    /// Appends a reply under `parent`.
    ///
    /// `parent` is replaced with the record returned by the reply sequence
    /// bump.
    pub(super) async fn write_reply_activity(
        &self,
        ctx: &CallContext,
        parent: &mut PullReqActivity,
        mut draft: ActivityDraft,
    ) -> Result<PullReqActivity, EngineError> {
        let updated = store_call(
            ctx,
            "reserve reply number",
            self.parts.activities.update_reply_seq(parent),
        )
        .await?;
        *parent = updated;

        draft.order = parent.order;
        draft.sub_order = parent.reply_seq;

        self.insert_sequenced(ctx, SequenceScope::Reply, draft).await
    }

    async fn insert_sequenced(
        &self,
        ctx: &CallContext,
        scope: SequenceScope,
        draft: ActivityDraft,
    ) -> Result<PullReqActivity, EngineError> {
        let result: Result<PullReqActivity, EngineError> = match self
            .parts
            .activities
            .create(&draft)
            .or_cancel(ctx.cancellation())
            .await
        {
            Ok(Ok(activity)) => Ok(activity),
            Ok(Err(error)) => Err(map_insert_error(error)),
            Err(cancelled) => Err(cancelled.into()),
        };

        if result.is_err() {
            tracing::warn!(
                "pull request {}: position {}.{} was reserved but not written",
                draft.pull_req_id,
                draft.order,
                draft.sub_order
            );
            self.parts.telemetry.record(TelemetryEvent::SequenceGapRecorded {
                scope,
                pull_req_id: draft.pull_req_id.get(),
                order: draft.order,
                sub_order: draft.sub_order,
            });
        }

        result
    }
}

fn map_insert_error(error: PersistenceError) -> EngineError {
    map_persistence_error("create pull request activity", error)
}
