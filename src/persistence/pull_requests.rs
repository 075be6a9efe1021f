//! `SQLite` pull request store.

use std::cell::RefCell;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use diesel::Connection;
use diesel::OptionalExtension;
use diesel::QueryableByName;
use diesel::RunQueryDsl;
use diesel::result::Error as DieselError;
use diesel::sql_query;
use diesel::sql_types::{BigInt, Nullable, Text};
use diesel::sqlite::{Sqlite, SqliteConnection};

use crate::model::{
    MergeRecord, NewPullRequest, PrincipalId, PullReqFilter, PullReqId, PullReqState, PullRequest,
    PullRequestChange, RepoId,
};
use crate::telemetry::{SequenceScope, TelemetryEvent, TelemetrySink};

use super::connection::{
    ScalarRow, from_millis, last_insert_rowid, map_query_error, map_write_error, to_millis,
};
use super::optimistic::{OptimisticUpdate, RetryBudget, update_opt_lock};
use super::{Database, PersistenceError, PullRequestStore};

const TABLE: &str = "pullreqs";
const ENTITY: &str = "pull request";
const COLUMNS: &str = "id, version, number, created_by, created_at, updated_at, state, title, \
                       description, source_repo_id, source_branch, source_sha, target_repo_id, \
                       target_branch, activity_seq, merged_by, merged_at, merge_sha";

#[derive(Debug, QueryableByName)]
struct PullRequestRow {
    #[diesel(sql_type = BigInt)]
    id: i64,
    #[diesel(sql_type = BigInt)]
    version: i64,
    #[diesel(sql_type = BigInt)]
    number: i64,
    #[diesel(sql_type = BigInt)]
    created_by: i64,
    #[diesel(sql_type = BigInt)]
    created_at: i64,
    #[diesel(sql_type = BigInt)]
    updated_at: i64,
    #[diesel(sql_type = Text)]
    state: String,
    #[diesel(sql_type = Text)]
    title: String,
    #[diesel(sql_type = Text)]
    description: String,
    #[diesel(sql_type = BigInt)]
    source_repo_id: i64,
    #[diesel(sql_type = Text)]
    source_branch: String,
    #[diesel(sql_type = Text)]
    source_sha: String,
    #[diesel(sql_type = BigInt)]
    target_repo_id: i64,
    #[diesel(sql_type = Text)]
    target_branch: String,
    #[diesel(sql_type = BigInt)]
    activity_seq: i64,
    #[diesel(sql_type = Nullable<BigInt>)]
    merged_by: Option<i64>,
    #[diesel(sql_type = Nullable<BigInt>)]
    merged_at: Option<i64>,
    #[diesel(sql_type = Nullable<Text>)]
    merge_sha: Option<String>,
}

impl TryFrom<PullRequestRow> for PullRequest {
    type Error = PersistenceError;

    fn try_from(row: PullRequestRow) -> Result<Self, Self::Error> {
        let state = row
            .state
            .parse::<PullReqState>()
            .map_err(|message| PersistenceError::Corrupt {
                entity: ENTITY,
                message,
            })?;

        let merge = match (row.merged_by, row.merged_at, row.merge_sha) {
            (Some(merged_by), Some(merged_at), Some(merge_sha)) => Some(MergeRecord {
                merged_by: PrincipalId::new(merged_by),
                merged_at: from_millis(ENTITY, merged_at)?,
                merge_sha,
            }),
            (None, None, None) => None,
            _ => {
                return Err(PersistenceError::Corrupt {
                    entity: ENTITY,
                    message: format!("pull request {} has a partial merge record", row.id),
                });
            }
        };

        Ok(Self {
            id: PullReqId::new(row.id),
            version: row.version,
            number: row.number,
            created_by: PrincipalId::new(row.created_by),
            created_at: from_millis(ENTITY, row.created_at)?,
            updated_at: from_millis(ENTITY, row.updated_at)?,
            state,
            title: row.title,
            description: row.description,
            source_repo_id: RepoId::new(row.source_repo_id),
            source_branch: row.source_branch,
            source_sha: row.source_sha,
            target_repo_id: RepoId::new(row.target_repo_id),
            target_branch: row.target_branch,
            activity_seq: row.activity_seq,
            merge,
        })
    }
}

/// `SQLite` implementation of [`PullRequestStore`].
#[derive(Clone)]
pub struct SqlitePullRequestStore {
    database: Database,
    budget: RetryBudget,
    telemetry: Arc<dyn TelemetrySink>,
}

impl SqlitePullRequestStore {
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
        pr: &PullRequest,
        change: PullRequestChange,
    ) -> Result<PullRequest, PersistenceError> {
        let current = pr.clone();
        let budget = self.budget;
        let telemetry = Arc::clone(&self.telemetry);
        let sequenced = matches!(change, PullRequestChange::BumpActivitySeq);
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
                        mutate: |candidate: &mut PullRequest| {
                            candidate.apply(&change).map_err(|error| {
                                if error.is_stale() {
                                    PersistenceError::Stale {
                                        message: error.to_string(),
                                    }
                                } else {
                                    PersistenceError::Rejected {
                                        message: error.to_string(),
                                    }
                                }
                            })
                        },
                        write: |candidate: &PullRequest, expected: i64| {
                            write_conditional(&mut shared.borrow_mut(), candidate, expected)
                        },
                        refetch: || -> Result<PullRequest, PersistenceError> {
                            find_where(&mut shared.borrow_mut(), "id = ?", id.get())?
                                .ok_or_else(|| not_found(id.to_string()))
                        },
                        on_retry: |attempt: u32| {
                            if !sequenced {
                                return;
                            }
                            telemetry.record(TelemetryEvent::SequenceConflictRetried {
                                scope: SequenceScope::PullRequest,
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
                        scope: SequenceScope::PullRequest,
                        record_id: id.get(),
                        attempts: *attempts,
                    });
                }
                result
            })
            .await
    }
}

fn not_found(key: String) -> PersistenceError {
    PersistenceError::NotFound {
        entity: ENTITY,
        key,
    }
}

fn find_where(
    connection: &mut SqliteConnection,
    clause: &str,
    id: i64,
) -> Result<Option<PullRequest>, PersistenceError> {
    let row: Option<PullRequestRow> =
        sql_query(format!("SELECT {COLUMNS} FROM {TABLE} WHERE {clause} LIMIT 1;"))
            .bind::<BigInt, _>(id)
            .get_result(connection)
            .optional()
            .map_err(|error| map_query_error(connection, TABLE, &error))?;

    row.map(PullRequest::try_from).transpose()
}

fn write_conditional(
    connection: &mut SqliteConnection,
    candidate: &PullRequest,
    expected_version: i64,
) -> Result<bool, PersistenceError> {
    let merge = candidate.merge.as_ref();
    let updated = sql_query(
        "UPDATE pullreqs SET version = ?, updated_at = ?, state = ?, title = ?, \
         description = ?, source_sha = ?, activity_seq = ?, merged_by = ?, merged_at = ?, \
         merge_sha = ? WHERE id = ? AND version = ?;",
    )
    .bind::<BigInt, _>(candidate.version)
    .bind::<BigInt, _>(to_millis(candidate.updated_at))
    .bind::<Text, _>(candidate.state.as_str())
    .bind::<Text, _>(&candidate.title)
    .bind::<Text, _>(&candidate.description)
    .bind::<Text, _>(&candidate.source_sha)
    .bind::<BigInt, _>(candidate.activity_seq)
    .bind::<Nullable<BigInt>, _>(merge.map(|record| record.merged_by.get()))
    .bind::<Nullable<BigInt>, _>(merge.map(|record| to_millis(record.merged_at)))
    .bind::<Nullable<Text>, _>(merge.map(|record| record.merge_sha.clone()))
    .bind::<BigInt, _>(candidate.id.get())
    .bind::<BigInt, _>(expected_version)
    .execute(connection)
    .map_err(|error| map_write_error(connection, TABLE, &error))?;

    Ok(updated == 1)
}

fn insert_numbered(
    connection: &mut SqliteConnection,
    new: &NewPullRequest,
) -> Result<PullRequest, DieselError> {
    connection.immediate_transaction(|tx| {
        let next: ScalarRow = sql_query(
            "SELECT COALESCE(MAX(number), 0) + 1 AS value FROM pullreqs WHERE target_repo_id = ?;",
        )
        .bind::<BigInt, _>(new.target_repo_id.get())
        .get_result(tx)?;

        let now = Utc::now();
        sql_query(
            "INSERT INTO pullreqs (version, number, created_by, created_at, updated_at, state, \
             title, description, source_repo_id, source_branch, source_sha, target_repo_id, \
             target_branch, activity_seq) \
             VALUES (0, ?, ?, ?, ?, 'open', ?, ?, ?, ?, ?, ?, ?, 0);",
        )
        .bind::<BigInt, _>(next.value)
        .bind::<BigInt, _>(new.created_by.get())
        .bind::<BigInt, _>(to_millis(now))
        .bind::<BigInt, _>(to_millis(now))
        .bind::<Text, _>(&new.title)
        .bind::<Text, _>(&new.description)
        .bind::<BigInt, _>(new.source_repo_id.get())
        .bind::<Text, _>(&new.source_branch)
        .bind::<Text, _>(&new.source_sha)
        .bind::<BigInt, _>(new.target_repo_id.get())
        .bind::<Text, _>(&new.target_branch)
        .execute(tx)?;

        let id = last_insert_rowid(tx)?;
        Ok(PullRequest {
            id: PullReqId::new(id),
            version: 0,
            number: next.value,
            created_by: new.created_by,
            created_at: now,
            updated_at: now,
            state: PullReqState::Open,
            title: new.title.clone(),
            description: new.description.clone(),
            source_repo_id: new.source_repo_id,
            source_branch: new.source_branch.clone(),
            source_sha: new.source_sha.clone(),
            target_repo_id: new.target_repo_id,
            target_branch: new.target_branch.clone(),
            activity_seq: 0,
            merge: None,
        })
    })
}

fn list_filtered(
    connection: &mut SqliteConnection,
    repo_id: RepoId,
    filter: &PullReqFilter,
) -> Result<Vec<PullRequest>, PersistenceError> {
    let mut query = sql_query(format!(
        "SELECT {COLUMNS} FROM {TABLE} WHERE target_repo_id = ?"
    ))
    .into_boxed::<Sqlite>()
    .bind::<BigInt, _>(repo_id.get());

    if !filter.states.is_empty() {
        let placeholders = vec!["?"; filter.states.len()].join(", ");
        query = query.sql(format!(" AND state IN ({placeholders})"));
        for state in &filter.states {
            query = query.bind::<Text, _>(state.as_str());
        }
    }
    if let Some(source_repo_id) = filter.source_repo_id {
        query = query
            .sql(" AND source_repo_id = ?")
            .bind::<BigInt, _>(source_repo_id.get());
    }
    if let Some(source_branch) = &filter.source_branch {
        query = query
            .sql(" AND source_branch = ?")
            .bind::<Text, _>(source_branch.clone());
    }
    if let Some(target_branch) = &filter.target_branch {
        query = query
            .sql(" AND target_branch = ?")
            .bind::<Text, _>(target_branch.clone());
    }
    if let Some(created_by) = filter.created_by {
        query = query
            .sql(" AND created_by = ?")
            .bind::<BigInt, _>(created_by.get());
    }

    query = query
        .sql(format!(
            " ORDER BY {} {}, id {} LIMIT ? OFFSET ?;",
            filter.sort.column(),
            filter.order.keyword(),
            filter.order.keyword()
        ))
        .bind::<BigInt, _>(i64::from(filter.limit()))
        .bind::<BigInt, _>(i64::from(filter.offset()));

    let rows: Vec<PullRequestRow> = query
        .load(connection)
        .map_err(|error| map_query_error(connection, TABLE, &error))?;

    rows.into_iter().map(PullRequest::try_from).collect()
}

#[async_trait]
impl PullRequestStore for SqlitePullRequestStore {
    async fn create(&self, new: &NewPullRequest) -> Result<PullRequest, PersistenceError> {
        let new_pull_request = new.clone();
        self.database
            .run(move |connection| {
                insert_numbered(connection, &new_pull_request)
                    .map_err(|error| map_write_error(connection, TABLE, &error))
            })
            .await
    }

    async fn find(&self, id: PullReqId) -> Result<PullRequest, PersistenceError> {
        self.database
            .run(move |connection| {
                find_where(connection, "id = ?", id.get())?.ok_or_else(|| not_found(id.to_string()))
            })
            .await
    }

    async fn find_by_number(
        &self,
        repo_id: RepoId,
        number: i64,
    ) -> Result<PullRequest, PersistenceError> {
        self.database
            .run(move |connection| {
                let row: Option<PullRequestRow> = sql_query(format!(
                    "SELECT {COLUMNS} FROM {TABLE} WHERE target_repo_id = ? AND number = ? LIMIT 1;"
                ))
                .bind::<BigInt, _>(repo_id.get())
                .bind::<BigInt, _>(number)
                .get_result(connection)
                .optional()
                .map_err(|error| map_query_error(connection, TABLE, &error))?;

                row.map(PullRequest::try_from)
                    .transpose()?
                    .ok_or_else(|| not_found(format!("{repo_id}#{number}")))
            })
            .await
    }

    async fn list(
        &self,
        repo_id: RepoId,
        filter: &PullReqFilter,
    ) -> Result<Vec<PullRequest>, PersistenceError> {
        let filter = filter.clone();
        self.database
            .run(move |connection| list_filtered(connection, repo_id, &filter))
            .await
    }

    async fn update_activity_seq(&self, pr: &PullRequest) -> Result<PullRequest, PersistenceError> {
        self.conditional_update(pr, PullRequestChange::BumpActivitySeq)
            .await
    }

    async fn update(
        &self,
        pr: &PullRequest,
        change: &PullRequestChange,
    ) -> Result<PullRequest, PersistenceError> {
        self.conditional_update(pr, change.clone()).await
    }
}
