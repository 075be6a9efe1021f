//! CLI operation mode handlers.
//!
//! - [`migrations`]: database schema migrations
//! - [`listing`]: list pull requests of a repository
//! - [`timeline`]: print one pull request and its timeline
//!
//! Output formatting lives in [`output`].

use std::sync::Arc;

use pullreq::auth::GrantTableGate;
use pullreq::git::{Git2RefResolver, GitRefResolver, HttpRefResolver};
use pullreq::model::{Principal, PrincipalId, Session};
use pullreq::persistence::{Database, PersistenceError};
use pullreq::telemetry::StderrJsonlTelemetrySink;
use pullreq::{CallContext, EngineError, EngineParts, PullReqConfig, PullReqEngine, RefSource};

pub mod listing;
pub mod migrations;
pub mod output;
pub mod timeline;

/// Maps a persistence error raised before the engine runs.
///
/// A blank URL is a configuration problem; everything else is a runtime
/// failure.
pub fn map_persistence_error(error: &PersistenceError) -> EngineError {
    if is_configuration_error(error) {
        EngineError::Configuration {
            message: error.to_string(),
        }
    } else {
        EngineError::Internal {
            message: error.to_string(),
        }
    }
}

/// Returns true if the persistence error is a configuration problem.
pub const fn is_configuration_error(error: &PersistenceError) -> bool {
    matches!(error, PersistenceError::BlankDatabaseUrl)
}

/// Builds an engine over the configured database and ref source.
///
/// The CLI acts as a local operator, so authorization always passes.
pub fn build_engine(config: &PullReqConfig) -> Result<PullReqEngine, EngineError> {
    let database =
        Database::new(config.require_database_url()?).map_err(|error| map_persistence_error(&error))?;
    let git: Arc<dyn GitRefResolver> = match config.ref_source()? {
        RefSource::Local(root) => Arc::new(Git2RefResolver::new(root)),
        RefSource::Rpc(url) => Arc::new(
            HttpRefResolver::new(url, config.git_rpc_timeout()).map_err(|error| {
                EngineError::Configuration {
                    message: format!("failed to build git RPC client: {error}"),
                }
            })?,
        ),
    };

    Ok(PullReqEngine::new(EngineParts::sqlite(
        &database,
        config.retry_budget(),
        Arc::new(GrantTableGate::new()),
        git,
        Arc::new(StderrJsonlTelemetrySink),
    )))
}

/// Context for the local operator.
pub fn operator_context() -> CallContext {
    CallContext::new(Session::new(Principal {
        id: PrincipalId::new(0),
        uid: "operator".to_owned(),
        display_name: "Local operator".to_owned(),
        admin: true,
    }))
}
