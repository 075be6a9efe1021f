//! `pullreq` command-line entrypoint.
//!
//! Applies migrations, or prints pull requests and their timelines from a
//! local database for operators.

mod cli;

use std::io::{self, Write};
use std::process::ExitCode;

use ortho_config::OrthoConfig;
use pullreq::{EngineError, OperationMode, PullReqConfig};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> ExitCode {
    init_tracing();

    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            if writeln!(io::stderr().lock(), "{error}").is_err() {
                return ExitCode::FAILURE;
            }
            ExitCode::FAILURE
        }
    }
}

fn init_tracing() {
    let subscriber = tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_env("PULLREQ_LOG")
                .unwrap_or_else(|_| "pullreq=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(io::stderr));
    let _ignored = subscriber.try_init();
}

async fn run() -> Result<(), EngineError> {
    let config = load_config()?;
    config.validate()?;

    match config.operation_mode() {
        OperationMode::MigrateDatabase => cli::migrations::run(&config),
        OperationMode::ShowTimeline => cli::timeline::run(&config).await,
        OperationMode::ListPullRequests => cli::listing::run(&config).await,
    }
}

/// Loads configuration from CLI, environment, and files.
///
/// # Errors
///
/// Returns [`EngineError::Configuration`] when ortho-config fails to parse
/// arguments or load configuration files.
fn load_config() -> Result<PullReqConfig, EngineError> {
    PullReqConfig::load().map_err(|error| EngineError::Configuration {
        message: error.to_string(),
    })
}
