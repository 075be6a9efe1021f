//! `SQLite` activity store.

use std::cell::RefCell;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use diesel::OptionalExtension;
use diesel::QueryableByName;
use diesel::RunQueryDsl;
use diesel::sql_query;
use diesel::sql_types::{BigInt, Nullable, Text};
use diesel::sqlite::{Sqlite, SqliteConnection};

use crate::model::{
    ActivityChange, ActivityDraft, ActivityFilter, ActivityId, ActivityKind, ActivityPayload,
    ActivityStatus, PrincipalId, PullReqActivity, PullReqId, RepoId,
};
use crate::telemetry::{SequenceScope, TelemetryEvent, TelemetrySink};

use super::connection::{
    from_millis, last_insert_rowid, map_query_error, map_write_error, to_millis,
};
use super::optimistic::{OptimisticUpdate, RetryBudget, update_opt_lock};
use super::{ActivityStore, Database, PersistenceError};

const TABLE: &str = "pullreq_activities";
const ENTITY: &str = "activity";
const COLUMNS: &str = "id, version, created_by, created_at, updated_at, deleted_at, repo_id, \
                       pullreq_id, parent_id, activity_order, sub_order, reply_seq, kind, payload";

#[derive(Debug, QueryableByName)]
struct ActivityRow {
    #[diesel(sql_type = BigInt)]
    id: i64,
    #[diesel(sql_type = BigInt)]
    version: i64,
    #[diesel(sql_type = BigInt)]
    created_by: i64,
    #[diesel(sql_type = BigInt)]
    created_at: i64,
    #[diesel(sql_type = BigInt)]
    updated_at: i64,
    #[diesel(sql_type = Nullable<BigInt>)]
    deleted_at: Option<i64>,
    #[diesel(sql_type = BigInt)]
    repo_id: i64,
    #[diesel(sql_type = BigInt)]
    pullreq_id: i64,
    #[diesel(sql_type = Nullable<BigInt>)]
    parent_id: Option<i64>,
    #[diesel(sql_type = BigInt)]
    activity_order: i64,
    #[diesel(sql_type = BigInt)]
    sub_order: i64,
    #[diesel(sql_type = BigInt)]
    reply_seq: i64,
    #[diesel(sql_type = Text)]
    kind: String,
    #[diesel(sql_type = Text)]
    payload: String,
}

impl TryFrom<ActivityRow> for PullReqActivity {
    type Error = PersistenceError;

    fn try_from(row: ActivityRow) -> Result<Self, Self::Error> {
        let kind = row
            .kind
            .parse::<ActivityKind>()
            .map_err(corrupt)?;
        let payload: ActivityPayload = serde_json::from_str(&row.payload)
            .map_err(|error| corrupt(format!("activity {} payload: {error}", row.id)))?;
        if payload.kind() != kind {
            return Err(corrupt(format!(
                "activity {} is stored as {kind} but carries a {} payload",
                row.id,
                payload.kind()
            )));
        }

        let status = match row.deleted_at {
            None => ActivityStatus::Active,
            Some(millis) => ActivityStatus::Deleted {
                deleted_at: from_millis(ENTITY, millis)?,
            },
        };

        Ok(Self {
            id: ActivityId::new(row.id),
            version: row.version,
            created_by: PrincipalId::new(row.created_by),
            created_at: from_millis(ENTITY, row.created_at)?,
            updated_at: from_millis(ENTITY, row.updated_at)?,
            repo_id: RepoId::new(row.repo_id),
            pull_req_id: PullReqId::new(row.pullreq_id),
            parent_id: row.parent_id.map(ActivityId::new),
            order: row.activity_order,
            sub_order: row.sub_order,
            reply_seq: row.reply_seq,
            kind,
            payload,
            status,
        })
    }
}

const fn corrupt(message: String) -> PersistenceError {
    PersistenceError::Corrupt {
        entity: ENTITY,
        message,
    }
}

fn encode_payload(payload: &ActivityPayload) -> Result<String, PersistenceError> {
    serde_json::to_string(payload).map_err(|error| PersistenceError::WriteFailed {
        message: format!("failed to encode activity payload: {error}"),
    })
}

/// `SQLite` implementation of [`ActivityStore`].
#[derive(Clone)]
pub struct SqliteActivityStore {
    database: Database,
    budget: RetryBudget,
    telemetry: Arc<dyn TelemetrySink>,
}

impl SqliteActivityStore {
    /// Creates a store over `database`.
    #[must_use]
    pub fn new(database: Database, budget: RetryBudget, telemetry: Arc<dyn TelemetrySink>) -> Self {
        Self {
            database,
            budget,
            telemetry,
        }
    }

    async fn conditional_update(
        &self,
        activity: &PullReqActivity,
        change: ActivityChange,
    ) -> Result<PullReqActivity, PersistenceError> {
        let current = activity.clone();
        let budget = self.budget;
        let telemetry = Arc::clone(&self.telemetry);
        let sequenced = matches!(change, ActivityChange::BumpReplySeq);
        self.database
            .run(move |connection| {
                let shared = RefCell::new(connection);
                let id = current.id;
                let result = update_opt_lock(
                    ENTITY,
                    id.get(),
                    budget,
                    &current,
                    OptimisticUpdate {
                        mutate: |candidate: &mut PullReqActivity| {
                            check_change(candidate, &change)?;
                            candidate.apply(&change);
                            Ok::<_, PersistenceError>(())
                        },
                        write: |candidate: &PullReqActivity, expected: i64| {
                            write_conditional(&mut shared.borrow_mut(), candidate, expected)
                        },
                        refetch: || -> Result<PullReqActivity, PersistenceError> {
                            find_by_id(&mut shared.borrow_mut(), id)?
                                .ok_or_else(|| not_found(id))
                        },
                        on_retry: |attempt: u32| {
                            if !sequenced {
                                return;
                            }
                            telemetry.record(TelemetryEvent::SequenceConflictRetried {
                                scope: SequenceScope::Reply,
                                record_id: id.get(),
                                attempt,
                            });
                        },
                    },
                );
                if let (true, Err(PersistenceError::VersionConflict { attempts, .. })) =
                    (sequenced, &result)
                {
                    telemetry.record(TelemetryEvent::SequenceBudgetExhausted {
                        scope: SequenceScope::Reply,
                        record_id: id.get(),
                        attempts: *attempts,
                    });
                }
                result
            })
            .await
    }
}

/// Replies, edits and deletions only apply to live entries, and system
/// entries never change content.
fn check_change(
    candidate: &PullReqActivity,
    change: &ActivityChange,
) -> Result<(), PersistenceError> {
    match change {
        ActivityChange::BumpReplySeq if candidate.status.is_deleted() => {
            Err(not_found(candidate.id))
        }
        ActivityChange::BumpReplySeq => Ok(()),
        _ if candidate.status.is_deleted() => Err(PersistenceError::Rejected {
            message: format!("activity {} is deleted", candidate.id),
        }),
        ActivityChange::Payload(_) if candidate.kind == ActivityKind::System => {
            Err(PersistenceError::Rejected {
                message: format!("activity {} was created by the system", candidate.id),
            })
        }
        ActivityChange::Payload(payload) if payload.kind() != candidate.kind => {
            Err(PersistenceError::Rejected {
                message: format!(
                    "activity {} is a {} entry and can't take a {} payload",
                    candidate.id,
                    candidate.kind,
                    payload.kind()
                ),
            })
        }
        ActivityChange::Payload(_) | ActivityChange::SoftDelete { .. } => Ok(()),
    }
}

fn not_found(id: ActivityId) -> PersistenceError {
    PersistenceError::NotFound {
        entity: ENTITY,
        key: id.to_string(),
    }
}

fn find_by_id(
    connection: &mut SqliteConnection,
    id: ActivityId,
) -> Result<Option<PullReqActivity>, PersistenceError> {
    let row: Option<ActivityRow> =
        sql_query(format!("SELECT {COLUMNS} FROM {TABLE} WHERE id = ? LIMIT 1;"))
            .bind::<BigInt, _>(id.get())
            .get_result(connection)
            .optional()
            .map_err(|error| map_query_error(connection, TABLE, &error))?;

    row.map(PullReqActivity::try_from).transpose()
}

fn write_conditional(
    connection: &mut SqliteConnection,
    candidate: &PullReqActivity,
    expected_version: i64,
) -> Result<bool, PersistenceError> {
    let payload = encode_payload(&candidate.payload)?;
    let updated = sql_query(
        "UPDATE pullreq_activities SET version = ?, updated_at = ?, deleted_at = ?, \
         reply_seq = ?, payload = ? WHERE id = ? AND version = ?;",
    )
    .bind::<BigInt, _>(candidate.version)
    .bind::<BigInt, _>(to_millis(candidate.updated_at))
    .bind::<Nullable<BigInt>, _>(candidate.status.deleted_at().map(to_millis))
    .bind::<BigInt, _>(candidate.reply_seq)
    .bind::<Text, _>(payload)
    .bind::<BigInt, _>(candidate.id.get())
    .bind::<BigInt, _>(expected_version)
    .execute(connection)
    .map_err(|error| map_write_error(connection, TABLE, &error))?;

    Ok(updated == 1)
}

fn insert(
    connection: &mut SqliteConnection,
    draft: &ActivityDraft,
) -> Result<PullReqActivity, PersistenceError> {
    let payload = encode_payload(&draft.payload)?;
    let now = Utc::now();
    sql_query(
        "INSERT INTO pullreq_activities (version, created_by, created_at, updated_at, \
         deleted_at, repo_id, pullreq_id, parent_id, activity_order, sub_order, reply_seq, \
         kind, payload) VALUES (0, ?, ?, ?, NULL, ?, ?, ?, ?, ?, 0, ?, ?);",
    )
    .bind::<BigInt, _>(draft.created_by.get())
    .bind::<BigInt, _>(to_millis(now))
    .bind::<BigInt, _>(to_millis(now))
    .bind::<BigInt, _>(draft.repo_id.get())
    .bind::<BigInt, _>(draft.pull_req_id.get())
    .bind::<Nullable<BigInt>, _>(draft.parent_id.map(ActivityId::get))
    .bind::<BigInt, _>(draft.order)
    .bind::<BigInt, _>(draft.sub_order)
    .bind::<Text, _>(draft.kind().as_str())
    .bind::<Text, _>(payload)
    .execute(connection)
    .and_then(|_| last_insert_rowid(connection))
    .map_err(|error| map_write_error(connection, TABLE, &error))
    .map(|id| PullReqActivity {
        id: ActivityId::new(id),
        version: 0,
        created_by: draft.created_by,
        created_at: now,
        updated_at: now,
        repo_id: draft.repo_id,
        pull_req_id: draft.pull_req_id,
        parent_id: draft.parent_id,
        order: draft.order,
        sub_order: draft.sub_order,
        reply_seq: 0,
        kind: draft.kind(),
        payload: draft.payload.clone(),
        status: ActivityStatus::Active,
    })
}

fn list_filtered(
    connection: &mut SqliteConnection,
    pull_req_id: PullReqId,
    filter: &ActivityFilter,
) -> Result<Vec<PullReqActivity>, PersistenceError> {
    let mut query = sql_query(format!("SELECT {COLUMNS} FROM {TABLE} WHERE pullreq_id = ?"))
        .into_boxed::<Sqlite>()
        .bind::<BigInt, _>(pull_req_id.get());

    if !filter.kinds.is_empty() {
        let placeholders = vec!["?"; filter.kinds.len()].join(", ");
        query = query.sql(format!(" AND kind IN ({placeholders})"));
        for kind in &filter.kinds {
            query = query.bind::<Text, _>(kind.as_str());
        }
    }
    if !filter.include_deleted {
        query = query.sql(" AND deleted_at IS NULL");
    }
    if let Some(after_order) = filter.after_order {
        query = query
            .sql(" AND activity_order > ?")
            .bind::<BigInt, _>(after_order);
    }
    query = query.sql(" ORDER BY activity_order ASC, sub_order ASC");
    if let Some(limit) = filter.limit {
        query = query.sql(" LIMIT ?").bind::<BigInt, _>(i64::from(limit));
    }

    let rows: Vec<ActivityRow> = query
        .load(connection)
        .map_err(|error| map_query_error(connection, TABLE, &error))?;

    rows.into_iter().map(PullReqActivity::try_from).collect()
}

#[async_trait]
impl ActivityStore for SqliteActivityStore {
    async fn create(&self, draft: &ActivityDraft) -> Result<PullReqActivity, PersistenceError> {
        let draft_to_insert = draft.clone();
        self.database
            .run(move |connection| insert(connection, &draft_to_insert))
            .await
    }

    async fn find(&self, id: ActivityId) -> Result<PullReqActivity, PersistenceError> {
        self.database
            .run(move |connection| find_by_id(connection, id)?.ok_or_else(|| not_found(id)))
            .await
    }

    async fn update_reply_seq(
        &self,
        parent: &PullReqActivity,
    ) -> Result<PullReqActivity, PersistenceError> {
        self.conditional_update(parent, ActivityChange::BumpReplySeq)
            .await
    }

    async fn update(
        &self,
        activity: &PullReqActivity,
        change: &ActivityChange,
    ) -> Result<PullReqActivity, PersistenceError> {
        self.conditional_update(activity, change.clone()).await
    }

    async fn list(
        &self,
        pull_req_id: PullReqId,
        filter: &ActivityFilter,
    ) -> Result<Vec<PullReqActivity>, PersistenceError> {
        let filter = filter.clone();
        self.database
            .run(move |connection| list_filtered(connection, pull_req_id, &filter))
            .await
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::Utc;
    use rstest::rstest;

    use crate::model::{
        ActivityChange, ActivityDraft, ActivityFilter, ActivityKind, ActivityPayload,
        NewPullRequest, NewRepository, PrincipalId, PullReqActivity, PullReqState, PullRequest,
    };
    use crate::persistence::test_helpers::{MigratedDatabase, migrated_database};
    use crate::persistence::{
        ActivityStore, PersistenceError, PullRequestStore, RepositoryStore, RetryBudget,
        SqliteActivityStore, SqlitePullRequestStore, SqliteRepositoryStore,
    };
    use crate::telemetry::NoopTelemetrySink;

    struct Fixture {
        activities: SqliteActivityStore,
        pr: PullRequest,
    }

    async fn fixture(db: &MigratedDatabase) -> Fixture {
        let repo = SqliteRepositoryStore::new(db.database.clone())
            .create(&NewRepository {
                path: "acme/widgets".to_owned(),
                git_uid: "acme-widgets".to_owned(),
                default_branch: "main".to_owned(),
            })
            .await
            .unwrap_or_else(|error| panic!("repository should be created: {error}"));
        let pr = SqlitePullRequestStore::new(
            db.database.clone(),
            RetryBudget::DEFAULT,
            Arc::new(NoopTelemetrySink),
        )
        .create(&NewPullRequest {
            created_by: PrincipalId::new(1),
            title: "Add widgets".to_owned(),
            description: String::new(),
            source_repo_id: repo.id,
            source_branch: "feature".to_owned(),
            source_sha: "aaaa".to_owned(),
            target_repo_id: repo.id,
            target_branch: "main".to_owned(),
        })
        .await
        .unwrap_or_else(|error| panic!("pull request should be created: {error}"));
        Fixture {
            activities: SqliteActivityStore::new(
                db.database.clone(),
                RetryBudget::DEFAULT,
                Arc::new(NoopTelemetrySink),
            ),
            pr,
        }
    }

    fn comment(text: &str) -> ActivityPayload {
        ActivityPayload::Comment {
            text: text.to_owned(),
        }
    }

    async fn top_level(fixture: &Fixture, order: i64, payload: ActivityPayload) -> PullReqActivity {
        let mut draft = ActivityDraft::top_level(
            PrincipalId::new(1),
            fixture.pr.target_repo_id,
            fixture.pr.id,
            payload,
        );
        draft.order = order;
        fixture
            .activities
            .create(&draft)
            .await
            .unwrap_or_else(|error| panic!("activity should be created: {error}"))
    }

    #[rstest]
    #[tokio::test]
    async fn timeline_is_ordered_by_position_not_insertion(migrated_database: MigratedDatabase) {
        let fixture = fixture(&migrated_database).await;
        let second = top_level(&fixture, 2, comment("second")).await;
        let first = top_level(&fixture, 1, comment("first")).await;
        let mut reply = ActivityDraft::reply(PrincipalId::new(2), &first, comment("reply"));
        reply.sub_order = 1;
        let stored_reply = fixture
            .activities
            .create(&reply)
            .await
            .unwrap_or_else(|error| panic!("reply should be created: {error}"));

        let timeline = fixture
            .activities
            .list(fixture.pr.id, &ActivityFilter::default())
            .await
            .unwrap_or_else(|error| panic!("list should succeed: {error}"));

        let ids: Vec<_> = timeline.iter().map(|activity| activity.id).collect();
        assert_eq!(ids, vec![first.id, stored_reply.id, second.id]);
        assert_eq!(stored_reply.order, first.order);
    }

    #[rstest]
    #[tokio::test]
    async fn duplicate_position_is_rejected(migrated_database: MigratedDatabase) {
        let fixture = fixture(&migrated_database).await;
        top_level(&fixture, 1, comment("first")).await;
        let mut draft = ActivityDraft::top_level(
            PrincipalId::new(1),
            fixture.pr.target_repo_id,
            fixture.pr.id,
            comment("clash"),
        );
        draft.order = 1;

        let result = fixture.activities.create(&draft).await;

        assert!(
            matches!(result, Err(PersistenceError::UniqueViolation { .. })),
            "expected UniqueViolation, got {result:?}"
        );
    }

    #[rstest]
    #[tokio::test]
    async fn reply_seq_bump_retries_on_stale_parent(migrated_database: MigratedDatabase) {
        let fixture = fixture(&migrated_database).await;
        let parent = top_level(&fixture, 1, comment("thread")).await;
        fixture
            .activities
            .update_reply_seq(&parent)
            .await
            .unwrap_or_else(|error| panic!("first bump should succeed: {error}"));

        let bumped = fixture
            .activities
            .update_reply_seq(&parent)
            .await
            .unwrap_or_else(|error| panic!("stale bump should succeed: {error}"));

        assert_eq!(bumped.reply_seq, 2);
    }

    #[rstest]
    #[tokio::test]
    async fn reply_seq_bump_on_deleted_parent_is_not_found(migrated_database: MigratedDatabase) {
        let fixture = fixture(&migrated_database).await;
        let parent = top_level(&fixture, 1, comment("thread")).await;
        let deleted = fixture
            .activities
            .update(
                &parent,
                &ActivityChange::SoftDelete {
                    deleted_at: Utc::now(),
                },
            )
            .await
            .unwrap_or_else(|error| panic!("delete should succeed: {error}"));

        let result = fixture.activities.update_reply_seq(&parent).await;

        assert!(
            matches!(result, Err(PersistenceError::NotFound { .. })),
            "expected NotFound, got {result:?}"
        );
        let stored = fixture
            .activities
            .find(deleted.id)
            .await
            .unwrap_or_else(|error| panic!("find should succeed: {error}"));
        assert_eq!(stored.reply_seq, 0);
    }

    #[rstest]
    #[tokio::test]
    async fn deleted_entries_reject_further_changes(migrated_database: MigratedDatabase) {
        let fixture = fixture(&migrated_database).await;
        let entry = top_level(&fixture, 1, comment("oops")).await;
        let deleted = fixture
            .activities
            .update(
                &entry,
                &ActivityChange::SoftDelete {
                    deleted_at: Utc::now(),
                },
            )
            .await
            .unwrap_or_else(|error| panic!("delete should succeed: {error}"));

        let result = fixture
            .activities
            .update(&deleted, &ActivityChange::Payload(comment("edited")))
            .await;
        let visible = fixture
            .activities
            .list(fixture.pr.id, &ActivityFilter::default())
            .await
            .unwrap_or_else(|error| panic!("list should succeed: {error}"));
        let everything = fixture
            .activities
            .list(
                fixture.pr.id,
                &ActivityFilter {
                    include_deleted: true,
                    ..ActivityFilter::default()
                },
            )
            .await
            .unwrap_or_else(|error| panic!("list should succeed: {error}"));

        assert!(deleted.status.is_deleted());
        assert!(
            matches!(result, Err(PersistenceError::Rejected { .. })),
            "expected Rejected, got {result:?}"
        );
        assert!(visible.is_empty());
        assert_eq!(everything.len(), 1);
    }

    #[rstest]
    #[tokio::test]
    async fn system_entries_cannot_be_edited(migrated_database: MigratedDatabase) {
        let fixture = fixture(&migrated_database).await;
        let entry = top_level(
            &fixture,
            1,
            ActivityPayload::StateChange {
                old: PullReqState::Open,
                new: PullReqState::Closed,
            },
        )
        .await;

        let result = fixture
            .activities
            .update(&entry, &ActivityChange::Payload(comment("rewrite history")))
            .await;

        assert!(
            matches!(result, Err(PersistenceError::Rejected { .. })),
            "expected Rejected, got {result:?}"
        );
    }

    #[rstest]
    #[tokio::test]
    async fn list_filters_by_kind_and_position(migrated_database: MigratedDatabase) {
        let fixture = fixture(&migrated_database).await;
        top_level(&fixture, 1, comment("one")).await;
        top_level(
            &fixture,
            2,
            ActivityPayload::TitleChange {
                old: "a".to_owned(),
                new: "b".to_owned(),
            },
        )
        .await;
        top_level(&fixture, 3, comment("three")).await;

        let comments_after_one = fixture
            .activities
            .list(
                fixture.pr.id,
                &ActivityFilter {
                    kinds: vec![ActivityKind::Comment],
                    after_order: Some(1),
                    ..ActivityFilter::default()
                },
            )
            .await
            .unwrap_or_else(|error| panic!("list should succeed: {error}"));

        let orders: Vec<i64> = comments_after_one.iter().map(|entry| entry.order).collect();
        assert_eq!(orders, vec![3]);
    }
}
