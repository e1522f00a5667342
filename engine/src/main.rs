// CCube worker
// Main entry point for the ccube-worker binary

use clap::Parser;
use std::process::ExitCode;

use ccube_engine::cli::{Cli, Command};
use ccube_engine::config::Config;
use ccube_engine::handlers::{handle_filter, handle_fuser, handle_learn};
use ccube_engine::telemetry::{init_telemetry, init_telemetry_with_level};
use ccube_sdk::errors::{WorkerError, WorkerErrorExt};

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match Config::load(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            init_telemetry();
            return report(&e);
        }
    };

    // --log wins over the configured level; RUST_LOG wins over both
    let log_level = cli.log.as_deref().unwrap_or(&config.core.log_level);
    init_telemetry_with_level(log_level);

    let version = env!("CARGO_PKG_VERSION");
    let commit = env!("GIT_COMMIT_HASH");
    let timestamp = env!("BUILD_TIMESTAMP");
    tracing::info!("CCube worker v{} ({} - {})", version, commit, timestamp);

    let job = cli.command.job();
    tracing::info!("Starting {} stage for job {}", cli.command.stage(), job);

    let result = match &cli.command {
        Command::Learn { .. } => handle_learn(job, &config).await,
        Command::Filter { .. } => handle_filter(job, &config).await,
        Command::Fuser { .. } => handle_fuser(job, &config).await,
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => report(&e),
    }
}

fn report(error: &WorkerError) -> ExitCode {
    tracing::error!(
        phase = %error.phase(),
        recoverable = error.is_recoverable(),
        "{}",
        error
    );
    eprintln!(
        "{} phase failed: {} ({})",
        error.phase(),
        error,
        error.user_hint()
    );
    ExitCode::FAILURE
}
