//! Connection handling shared by the `SQLite` stores.
//!
//! Each store call opens its own connection on a blocking thread. Stores hold
//! no connection state between calls, so any number of engine instances may
//! share one database file.

use chrono::{DateTime, Utc};
use diesel::Connection;
use diesel::connection::SimpleConnection;
use diesel::QueryableByName;
use diesel::RunQueryDsl;
use diesel::result::{DatabaseErrorKind, Error as DieselError};
use diesel::sql_query;
use diesel::sql_types::{BigInt, Text};
use diesel::sqlite::SqliteConnection;

use super::PersistenceError;

const DEFAULT_BUSY_TIMEOUT_MS: u32 = 5_000;

/// Location and connection settings for the `SQLite` database.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Database {
    database_url: String,
    busy_timeout_ms: u32,
}

/// Single integer column returned by scalar queries.
#[derive(Debug, QueryableByName)]
pub(crate) struct ScalarRow {
    #[diesel(sql_type = BigInt)]
    pub(crate) value: i64,
}

impl Database {
    /// Targets the database at `database_url`.
    ///
    /// # Errors
    ///
    /// Returns [`PersistenceError::BlankDatabaseUrl`] when the URL is blank.
    pub fn new(database_url: impl Into<String>) -> Result<Self, PersistenceError> {
        let url = database_url.into();
        let trimmed = url.trim();
        if trimmed.is_empty() {
            return Err(PersistenceError::BlankDatabaseUrl);
        }
        Ok(Self {
            database_url: trimmed.to_owned(),
            busy_timeout_ms: DEFAULT_BUSY_TIMEOUT_MS,
        })
    }

    /// Overrides how long a connection waits on a locked database.
    #[must_use]
    pub const fn with_busy_timeout_ms(mut self, busy_timeout_ms: u32) -> Self {
        self.busy_timeout_ms = busy_timeout_ms;
        self
    }

    /// The configured database URL.
    #[must_use]
    pub fn url(&self) -> &str {
        &self.database_url
    }

    /// Opens a connection with foreign keys and the busy timeout applied.
    ///
    /// # Errors
    ///
    /// Returns [`PersistenceError::ConnectionFailed`] or
    /// [`PersistenceError::PragmaFailed`].
    pub fn establish(&self) -> Result<SqliteConnection, PersistenceError> {
        let mut connection = SqliteConnection::establish(&self.database_url).map_err(|error| {
            PersistenceError::ConnectionFailed {
                message: error.to_string(),
            }
        })?;

        let pragmas = format!(
            "PRAGMA foreign_keys = ON; PRAGMA busy_timeout = {};",
            self.busy_timeout_ms
        );
        connection
            .batch_execute(&pragmas)
            .map_err(|error| PersistenceError::PragmaFailed {
                message: error.to_string(),
            })?;

        Ok(connection)
    }

    /// Runs `task` against a fresh connection on a blocking thread.
    pub(crate) async fn run<T, F>(&self, task: F) -> Result<T, PersistenceError>
    where
        T: Send + 'static,
        F: FnOnce(&mut SqliteConnection) -> Result<T, PersistenceError> + Send + 'static,
    {
        let database = self.clone();
        tokio::task::spawn_blocking(move || {
            let mut connection = database.establish()?;
            task(&mut connection)
        })
        .await
        .map_err(|error| PersistenceError::TaskFailed {
            message: error.to_string(),
        })?
    }
}

/// Converts a timestamp to the stored millisecond form.
pub(crate) fn to_millis(timestamp: DateTime<Utc>) -> i64 {
    timestamp.timestamp_millis()
}

/// Converts a stored millisecond value back into a timestamp.
pub(crate) fn from_millis(
    entity: &'static str,
    millis: i64,
) -> Result<DateTime<Utc>, PersistenceError> {
    DateTime::from_timestamp_millis(millis).ok_or_else(|| PersistenceError::Corrupt {
        entity,
        message: format!("timestamp {millis} out of range"),
    })
}

fn table_exists(connection: &mut SqliteConnection, table: &str) -> Result<bool, DieselError> {
    let row: ScalarRow = sql_query(
        "SELECT COUNT(*) AS value FROM sqlite_master WHERE type = 'table' AND name = ?;",
    )
    .bind::<Text, _>(table)
    .get_result(connection)?;

    Ok(row.value > 0)
}

fn map_error_with_schema_check<F>(
    connection: &mut SqliteConnection,
    table: &str,
    error: &DieselError,
    create_error: F,
) -> PersistenceError
where
    F: Fn(String) -> PersistenceError,
{
    if let DieselError::DatabaseError(DatabaseErrorKind::UniqueViolation, info) = error {
        return PersistenceError::UniqueViolation {
            message: info.message().to_owned(),
        };
    }

    match table_exists(connection, table) {
        Ok(false) => PersistenceError::SchemaNotInitialised,
        Ok(true) => create_error(error.to_string()),
        Err(check_error) => create_error(format!(
            "schema presence check failed: {check_error}; original error: {error}"
        )),
    }
}

/// Maps a failed read, distinguishing a missing schema from other failures.
pub(crate) fn map_query_error(
    connection: &mut SqliteConnection,
    table: &str,
    error: &DieselError,
) -> PersistenceError {
    map_error_with_schema_check(connection, table, error, |message| {
        PersistenceError::QueryFailed { message }
    })
}

/// Maps a failed write, distinguishing a missing schema and unique
/// violations from other failures.
pub(crate) fn map_write_error(
    connection: &mut SqliteConnection,
    table: &str,
    error: &DieselError,
) -> PersistenceError {
    map_error_with_schema_check(connection, table, error, |message| {
        PersistenceError::WriteFailed { message }
    })
}

/// Reads the rowid assigned by the last insert on this connection.
pub(crate) fn last_insert_rowid(connection: &mut SqliteConnection) -> Result<i64, DieselError> {
    let row: ScalarRow = sql_query("SELECT last_insert_rowid() AS value;").get_result(connection)?;
    Ok(row.value)
}
