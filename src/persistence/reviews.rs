//! `SQLite` review and reviewer store.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use diesel::QueryableByName;
use diesel::RunQueryDsl;
use diesel::sql_query;
use diesel::sql_types::{BigInt, Nullable, Text};
use diesel::sqlite::SqliteConnection;

use crate::model::{NewReview, PrincipalId, PullReqId, Review, ReviewId, Reviewer};

use super::connection::{
    from_millis, last_insert_rowid, map_query_error, map_write_error, to_millis,
};
use super::{Database, PersistenceError, ReviewStore, parse_decision};

const REVIEWS: &str = "pullreq_reviews";
const REVIEWERS: &str = "pullreq_reviewers";
const ENTITY: &str = "reviewer";

#[derive(Debug, QueryableByName)]
struct ReviewerRow {
    #[diesel(sql_type = BigInt)]
    pullreq_id: i64,
    #[diesel(sql_type = BigInt)]
    principal_id: i64,
    #[diesel(sql_type = BigInt)]
    added_by: i64,
    #[diesel(sql_type = BigInt)]
    created_at: i64,
    #[diesel(sql_type = Nullable<BigInt>)]
    latest_review_id: Option<i64>,
    #[diesel(sql_type = Nullable<Text>)]
    review_decision: Option<String>,
}

impl TryFrom<ReviewerRow> for Reviewer {
    type Error = PersistenceError;

    fn try_from(row: ReviewerRow) -> Result<Self, Self::Error> {
        Ok(Self {
            pull_req_id: PullReqId::new(row.pullreq_id),
            principal_id: PrincipalId::new(row.principal_id),
            added_by: PrincipalId::new(row.added_by),
            created_at: from_millis(ENTITY, row.created_at)?,
            latest_review_id: row.latest_review_id.map(ReviewId::new),
            review_decision: row
                .review_decision
                .as_deref()
                .map(|raw| parse_decision(ENTITY, raw))
                .transpose()?,
        })
    }
}

/// `SQLite` implementation of [`ReviewStore`].
#[derive(Debug, Clone)]
pub struct SqliteReviewStore {
    database: Database,
}

impl SqliteReviewStore {
    /// Creates a store over `database`.
    #[must_use]
    pub const fn new(database: Database) -> Self {
        Self { database }
    }
}

fn load_reviewers(
    connection: &mut SqliteConnection,
    pull_req_id: PullReqId,
    principal_id: Option<PrincipalId>,
) -> Result<Vec<Reviewer>, PersistenceError> {
    let base = "SELECT pullreq_id, principal_id, added_by, created_at, latest_review_id, \
                review_decision FROM pullreq_reviewers WHERE pullreq_id = ?";
    let rows: Vec<ReviewerRow> = match principal_id {
        Some(principal) => sql_query(format!("{base} AND principal_id = ?;"))
            .bind::<BigInt, _>(pull_req_id.get())
            .bind::<BigInt, _>(principal.get())
            .load(connection),
        None => sql_query(format!("{base} ORDER BY created_at ASC, principal_id ASC;"))
            .bind::<BigInt, _>(pull_req_id.get())
            .load(connection),
    }
    .map_err(|error| map_query_error(connection, REVIEWERS, &error))?;

    rows.into_iter().map(Reviewer::try_from).collect()
}

fn load_one(
    connection: &mut SqliteConnection,
    pull_req_id: PullReqId,
    principal_id: PrincipalId,
) -> Result<Reviewer, PersistenceError> {
    load_reviewers(connection, pull_req_id, Some(principal_id))?
        .into_iter()
        .next()
        .ok_or_else(|| PersistenceError::NotFound {
            entity: ENTITY,
            key: format!("{pull_req_id}/{principal_id}"),
        })
}

fn insert_reviewer(
    connection: &mut SqliteConnection,
    pull_req_id: PullReqId,
    principal_id: PrincipalId,
    added_by: PrincipalId,
    now: DateTime<Utc>,
) -> Result<(), PersistenceError> {
    sql_query(
        "INSERT INTO pullreq_reviewers (pullreq_id, principal_id, added_by, created_at) \
         VALUES (?, ?, ?, ?) ON CONFLICT (pullreq_id, principal_id) DO NOTHING;",
    )
    .bind::<BigInt, _>(pull_req_id.get())
    .bind::<BigInt, _>(principal_id.get())
    .bind::<BigInt, _>(added_by.get())
    .bind::<BigInt, _>(to_millis(now))
    .execute(connection)
    .map_err(|error| map_write_error(connection, REVIEWERS, &error))?;
    Ok(())
}

#[async_trait]
impl ReviewStore for SqliteReviewStore {
    async fn create_review(&self, new: &NewReview) -> Result<Review, PersistenceError> {
        let new_review = new.clone();
        self.database
            .run(move |connection| {
                let now = Utc::now();
                sql_query(
                    "INSERT INTO pullreq_reviews (pullreq_id, created_by, created_at, decision, \
                     commit_sha) VALUES (?, ?, ?, ?, ?);",
                )
                .bind::<BigInt, _>(new_review.pull_req_id.get())
                .bind::<BigInt, _>(new_review.created_by.get())
                .bind::<BigInt, _>(to_millis(now))
                .bind::<Text, _>(new_review.decision.as_str())
                .bind::<Text, _>(&new_review.commit_sha)
                .execute(connection)
                .and_then(|_| last_insert_rowid(connection))
                .map_err(|error| map_write_error(connection, REVIEWS, &error))
                .map(|id| Review {
                    id: ReviewId::new(id),
                    pull_req_id: new_review.pull_req_id,
                    created_by: new_review.created_by,
                    created_at: now,
                    decision: new_review.decision,
                    commit_sha: new_review.commit_sha,
                })
            })
            .await
    }

    async fn add_reviewer(
        &self,
        pull_req_id: PullReqId,
        principal_id: PrincipalId,
        added_by: PrincipalId,
    ) -> Result<Reviewer, PersistenceError> {
        self.database
            .run(move |connection| {
                insert_reviewer(connection, pull_req_id, principal_id, added_by, Utc::now())?;
                load_one(connection, pull_req_id, principal_id)
            })
            .await
    }

    async fn record_review_decision(&self, review: &Review) -> Result<Reviewer, PersistenceError> {
        let review = review.clone();
        self.database
            .run(move |connection| {
                insert_reviewer(
                    connection,
                    review.pull_req_id,
                    review.created_by,
                    review.created_by,
                    review.created_at,
                )?;
                sql_query(
                    "UPDATE pullreq_reviewers SET latest_review_id = ?, review_decision = ? \
                     WHERE pullreq_id = ? AND principal_id = ?;",
                )
                .bind::<BigInt, _>(review.id.get())
                .bind::<Text, _>(review.decision.as_str())
                .bind::<BigInt, _>(review.pull_req_id.get())
                .bind::<BigInt, _>(review.created_by.get())
                .execute(connection)
                .map_err(|error| map_write_error(connection, REVIEWERS, &error))?;
                load_one(connection, review.pull_req_id, review.created_by)
            })
            .await
    }

    async fn list_reviewers(
        &self,
        pull_req_id: PullReqId,
    ) -> Result<Vec<Reviewer>, PersistenceError> {
        self.database
            .run(move |connection| load_reviewers(connection, pull_req_id, None))
            .await
    }
}
