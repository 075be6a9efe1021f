//! Database migration operations.

use pullreq::persistence::migrate_database;
use pullreq::telemetry::StderrJsonlTelemetrySink;
use pullreq::{EngineError, PullReqConfig};

use super::map_persistence_error;

/// Runs database migrations.
///
/// # Errors
///
/// Returns [`EngineError::Configuration`] if the database URL is missing or
/// blank, and [`EngineError::Internal`] for connection or migration failures.
pub fn run(config: &PullReqConfig) -> Result<(), EngineError> {
    let database_url = config.require_database_url()?;

    let telemetry = StderrJsonlTelemetrySink;
    migrate_database(database_url, &telemetry)
        .map(drop)
        .map_err(|error| map_persistence_error(&error))
}
