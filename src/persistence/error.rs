//! Error types for persistence operations.

use thiserror::Error;

/// Errors returned by the `SQLite` stores and the migration runner.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PersistenceError {
    /// No database URL/path was provided.
    #[error("database URL is required (use --database-url or PULLREQ_DATABASE_URL)")]
    MissingDatabaseUrl,

    /// The database URL/path was present but blank.
    #[error("database URL must not be blank")]
    BlankDatabaseUrl,

    /// Establishing a `SQLite` connection failed.
    #[error("failed to connect to SQLite database: {message}")]
    ConnectionFailed {
        /// Error detail from Diesel.
        message: String,
    },

    /// Running pending migrations failed.
    #[error("failed to run database migrations: {message}")]
    MigrationFailed {
        /// Error detail from Diesel migrations.
        message: String,
    },

    /// Applying connection pragmas failed.
    #[error("failed to configure connection: {message}")]
    PragmaFailed {
        /// Error detail from the PRAGMA execution.
        message: String,
    },

    /// Reading the schema version from the migration table failed.
    #[error("failed to read schema version after migrations: {message}")]
    SchemaVersionQueryFailed {
        /// Error detail from Diesel query execution.
        message: String,
    },

    /// The migrations completed but no schema version could be found.
    #[error("no schema version recorded after migrations ran")]
    MissingSchemaVersion,

    /// The database exists but the schema has not been created.
    #[error("database schema not initialised (run with --migrate-db)")]
    SchemaNotInitialised,

    /// A read query failed.
    #[error("query failed: {message}")]
    QueryFailed {
        /// Error detail from Diesel.
        message: String,
    },

    /// A write failed.
    #[error("write failed: {message}")]
    WriteFailed {
        /// Error detail from Diesel.
        message: String,
    },

    /// The requested row does not exist.
    #[error("{entity} {key} not found")]
    NotFound {
        /// Kind of record.
        entity: &'static str,
        /// Lookup key.
        key: String,
    },

    /// A unique constraint rejected the write.
    #[error("unique constraint violated: {message}")]
    UniqueViolation {
        /// Error detail from `SQLite`.
        message: String,
    },

    /// Every conditional write attempt lost the race to another writer.
    #[error("{entity} {id} was modified concurrently ({attempts} attempts)")]
    VersionConflict {
        /// Kind of record.
        entity: &'static str,
        /// Record identifier.
        id: i64,
        /// Attempts made, including the first.
        attempts: u32,
    },

    /// The change no longer applies to the freshly read record.
    #[error("{message}")]
    Rejected {
        /// Why the change was refused.
        message: String,
    },

    /// The change was prepared against a record that has since moved on.
    #[error("{message}")]
    Stale {
        /// What changed underneath the caller.
        message: String,
    },

    /// A stored value could not be decoded.
    #[error("stored {entity} is corrupt: {message}")]
    Corrupt {
        /// Kind of record.
        entity: &'static str,
        /// Decoding failure.
        message: String,
    },

    /// The blocking task running the query failed to complete.
    #[error("storage task failed: {message}")]
    TaskFailed {
        /// Join error detail.
        message: String,
    },
}
