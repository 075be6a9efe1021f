//! Diesel-backed migration runner for the `SQLite` database.

use diesel::OptionalExtension;
use diesel::QueryableByName;
use diesel::RunQueryDsl;
use diesel::connection::SimpleConnection;
use diesel::sql_query;
use diesel::sql_types::Text;
use diesel::sqlite::SqliteConnection;
use diesel_migrations::{EmbeddedMigrations, MigrationHarness, embed_migrations};

use crate::telemetry::{TelemetryEvent, TelemetrySink};

use super::{Database, PersistenceError};

/// Embedded Diesel migrations shipped with the binary.
pub const MIGRATIONS: EmbeddedMigrations = embed_migrations!("migrations");

/// Schema version recorded by the first migration in this repository.
pub const INITIAL_SCHEMA_VERSION: &str = "20250301000000";

/// Schema version recorded by the most recent migration.
pub const CURRENT_SCHEMA_VERSION: &str = "20250301000000";

/// A Diesel migration version string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaVersion(String);

impl SchemaVersion {
    /// Returns the inner version string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Runs pending database migrations and records the resulting schema version
/// in telemetry.
///
/// The database is switched to WAL journaling so concurrent engine instances
/// can read while one of them writes.
///
/// # Errors
///
/// Returns [`PersistenceError`] when the database cannot be opened, migrations
/// fail, or the resulting schema version cannot be read.
pub fn migrate_database(
    database_url: &str,
    telemetry: &dyn TelemetrySink,
) -> Result<SchemaVersion, PersistenceError> {
    let database = Database::new(database_url)?;
    let mut connection = database.establish()?;

    enable_wal(&mut connection)?;

    connection
        .run_pending_migrations(MIGRATIONS)
        .map_err(|error| PersistenceError::MigrationFailed {
            message: error.to_string(),
        })?;

    let schema_version = read_schema_version(&mut connection)?;
    telemetry.record(TelemetryEvent::SchemaVersionRecorded {
        schema_version: schema_version.as_str().to_owned(),
    });

    Ok(schema_version)
}

fn enable_wal(connection: &mut SqliteConnection) -> Result<(), PersistenceError> {
    connection
        .batch_execute("PRAGMA journal_mode = WAL;")
        .map_err(|error| PersistenceError::PragmaFailed {
            message: error.to_string(),
        })
}

fn read_schema_version(
    connection: &mut SqliteConnection,
) -> Result<SchemaVersion, PersistenceError> {
    #[derive(Debug, QueryableByName)]
    struct Row {
        #[diesel(sql_type = Text)]
        version: String,
    }

    let result: Option<Row> =
        sql_query("SELECT version FROM __diesel_schema_migrations ORDER BY version DESC LIMIT 1;")
            .get_result(connection)
            .optional()
            .map_err(|error| PersistenceError::SchemaVersionQueryFailed {
                message: error.to_string(),
            })?;

    let Some(row) = result else {
        return Err(PersistenceError::MissingSchemaVersion);
    };

    Ok(SchemaVersion(row.version))
}

#[cfg(test)]
mod tests {
    use rstest::rstest;
    use tempfile::TempDir;

    use super::{CURRENT_SCHEMA_VERSION, migrate_database};
    use crate::persistence::PersistenceError;
    use crate::telemetry::TelemetryEvent;
    use crate::telemetry::test_support::RecordingTelemetrySink;

    #[rstest]
    fn migrate_database_records_schema_version_telemetry() {
        let temp_dir =
            TempDir::new().unwrap_or_else(|error| panic!("temp dir should be created: {error}"));
        let database_url = temp_dir.path().join("pullreq.sqlite");
        let telemetry = RecordingTelemetrySink::default();

        let schema_version = migrate_database(&database_url.to_string_lossy(), &telemetry)
            .unwrap_or_else(|error| panic!("migration should succeed: {error}"));

        assert_eq!(schema_version.as_str(), CURRENT_SCHEMA_VERSION);
        assert_eq!(
            telemetry.take(),
            vec![TelemetryEvent::SchemaVersionRecorded {
                schema_version: CURRENT_SCHEMA_VERSION.to_owned(),
            }]
        );
    }

    #[rstest]
    fn migrating_twice_is_idempotent() {
        let temp_dir =
            TempDir::new().unwrap_or_else(|error| panic!("temp dir should be created: {error}"));
        let database_url = temp_dir.path().join("pullreq.sqlite");
        let url = database_url.to_string_lossy();
        let telemetry = RecordingTelemetrySink::default();

        migrate_database(&url, &telemetry)
            .unwrap_or_else(|error| panic!("first migration should succeed: {error}"));
        let second = migrate_database(&url, &telemetry)
            .unwrap_or_else(|error| panic!("second migration should succeed: {error}"));

        assert_eq!(second.as_str(), CURRENT_SCHEMA_VERSION);
    }

    #[rstest]
    fn blank_database_url_is_rejected() {
        let telemetry = RecordingTelemetrySink::default();

        let result = migrate_database("   ", &telemetry);

        assert_eq!(result, Err(PersistenceError::BlankDatabaseUrl));
    }
}
