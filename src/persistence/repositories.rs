//! `SQLite` repository registry.

use async_trait::async_trait;
use chrono::Utc;
use diesel::OptionalExtension;
use diesel::QueryableByName;
use diesel::RunQueryDsl;
use diesel::sql_query;
use diesel::sql_types::{BigInt, Text};
use diesel::sqlite::SqliteConnection;

use crate::model::{NewRepository, RepoId, Repository};

use super::connection::{
    from_millis, last_insert_rowid, map_query_error, map_write_error, to_millis,
};
use super::{Database, PersistenceError, RepositoryStore};

const TABLE: &str = "repositories";
const ENTITY: &str = "repository";
const COLUMNS: &str = "id, path, git_uid, default_branch, created_at";

#[derive(Debug, QueryableByName)]
struct RepositoryRow {
    #[diesel(sql_type = BigInt)]
    id: i64,
    #[diesel(sql_type = Text)]
    path: String,
    #[diesel(sql_type = Text)]
    git_uid: String,
    #[diesel(sql_type = Text)]
    default_branch: String,
    #[diesel(sql_type = BigInt)]
    created_at: i64,
}

impl TryFrom<RepositoryRow> for Repository {
    type Error = PersistenceError;

    fn try_from(row: RepositoryRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: RepoId::new(row.id),
            path: row.path,
            git_uid: row.git_uid,
            default_branch: row.default_branch,
            created_at: from_millis(ENTITY, row.created_at)?,
        })
    }
}

/// `SQLite` implementation of [`RepositoryStore`].
#[derive(Debug, Clone)]
pub struct SqliteRepositoryStore {
    database: Database,
}

impl SqliteRepositoryStore {
    /// Creates a store over `database`.
    #[must_use]
    pub const fn new(database: Database) -> Self {
        Self { database }
    }
}

fn find_where(
    connection: &mut SqliteConnection,
    clause: &str,
    bind: RepositoryKey,
) -> Result<Option<Repository>, PersistenceError> {
    let query = sql_query(format!("SELECT {COLUMNS} FROM {TABLE} WHERE {clause} LIMIT 1;"));
    let result: Option<RepositoryRow> = match bind {
        RepositoryKey::Id(id) => query.bind::<BigInt, _>(id).get_result(connection),
        RepositoryKey::Path(path) => query.bind::<Text, _>(path).get_result(connection),
    }
    .optional()
    .map_err(|error| map_query_error(connection, TABLE, &error))?;

    result.map(Repository::try_from).transpose()
}

enum RepositoryKey {
    Id(i64),
    Path(String),
}

#[async_trait]
impl RepositoryStore for SqliteRepositoryStore {
    async fn create(&self, new: &NewRepository) -> Result<Repository, PersistenceError> {
        let new_repository = new.clone();
        self.database
            .run(move |connection| {
                let now = Utc::now();
                sql_query(
                    "INSERT INTO repositories (path, git_uid, default_branch, created_at) \
                     VALUES (?, ?, ?, ?);",
                )
                .bind::<Text, _>(&new_repository.path)
                .bind::<Text, _>(&new_repository.git_uid)
                .bind::<Text, _>(&new_repository.default_branch)
                .bind::<BigInt, _>(to_millis(now))
                .execute(connection)
                .and_then(|_| last_insert_rowid(connection))
                .map_err(|error| map_write_error(connection, TABLE, &error))
                .map(|id| Repository {
                    id: RepoId::new(id),
                    path: new_repository.path,
                    git_uid: new_repository.git_uid,
                    default_branch: new_repository.default_branch,
                    created_at: now,
                })
            })
            .await
    }

    async fn find(&self, id: RepoId) -> Result<Repository, PersistenceError> {
        self.database
            .run(move |connection| {
                find_where(connection, "id = ?", RepositoryKey::Id(id.get()))?.ok_or_else(|| {
                    PersistenceError::NotFound {
                        entity: ENTITY,
                        key: id.to_string(),
                    }
                })
            })
            .await
    }

    async fn find_by_ref(&self, repo_ref: &str) -> Result<Repository, PersistenceError> {
        let reference = repo_ref.trim().trim_matches('/').to_owned();
        self.database
            .run(move |connection| {
                let key = reference
                    .parse::<i64>()
                    .map_or_else(|_| RepositoryKey::Path(reference.clone()), RepositoryKey::Id);
                let clause = match key {
                    RepositoryKey::Id(_) => "id = ?",
                    RepositoryKey::Path(_) => "path = ?",
                };
                find_where(connection, clause, key)?.ok_or(PersistenceError::NotFound {
                    entity: ENTITY,
                    key: reference,
                })
            })
            .await
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use crate::model::NewRepository;
    use crate::persistence::test_helpers::{MigratedDatabase, migrated_database};
    use crate::persistence::{PersistenceError, RepositoryStore, SqliteRepositoryStore};

    fn new_repository(path: &str) -> NewRepository {
        NewRepository {
            path: path.to_owned(),
            git_uid: path.replace('/', "-"),
            default_branch: "main".to_owned(),
        }
    }

    #[rstest]
    #[tokio::test]
    async fn finds_repository_by_path_and_id(migrated_database: MigratedDatabase) {
        let store = SqliteRepositoryStore::new(migrated_database.database.clone());
        let created = store
            .create(&new_repository("acme/widgets"))
            .await
            .unwrap_or_else(|error| panic!("create should succeed: {error}"));

        let by_path = store
            .find_by_ref("acme/widgets/")
            .await
            .unwrap_or_else(|error| panic!("lookup by path should succeed: {error}"));
        let by_id = store
            .find_by_ref(&created.id.to_string())
            .await
            .unwrap_or_else(|error| panic!("lookup by id should succeed: {error}"));

        assert_eq!(by_path, created);
        assert_eq!(by_id, created);
    }

    #[rstest]
    #[tokio::test]
    async fn missing_repository_is_not_found(migrated_database: MigratedDatabase) {
        let store = SqliteRepositoryStore::new(migrated_database.database.clone());

        let result = store.find_by_ref("nobody/nothing").await;

        assert!(
            matches!(result, Err(PersistenceError::NotFound { .. })),
            "expected NotFound, got {result:?}"
        );
    }

    #[rstest]
    #[tokio::test]
    async fn duplicate_path_is_a_unique_violation(migrated_database: MigratedDatabase) {
        let store = SqliteRepositoryStore::new(migrated_database.database.clone());
        store
            .create(&new_repository("acme/widgets"))
            .await
            .unwrap_or_else(|error| panic!("first create should succeed: {error}"));

        let result = store.create(&new_repository("acme/widgets")).await;

        assert!(
            matches!(result, Err(PersistenceError::UniqueViolation { .. })),
            "expected UniqueViolation, got {result:?}"
        );
    }
}
