//! API wrapper for the gateway CLI
//!
//! Routes:
//!   GET  /api/routes     List API routes
//!   GET  /api/health     Health check with token status
//!   GET  /api/run-cli    Run the gateway CLI once and report its output
//!   POST /api/run-cli    Same as GET

use clawgate::api::ApiServer;
use clawgate::config::ApiConfig;
use clawgate::error::FrontDoorError;
use clawgate::shutdown::shutdown_signal;
use clawgate::{PKG_NAME, VERSION};
use std::process::ExitCode;
use tracing::{error, info};

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("clawgate=debug".parse().expect("valid log directive")),
        )
        .init();

    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "Server error");
            ExitCode::from(u8::try_from(e.exit_code()).unwrap_or(1))
        }
    }
}

async fn run() -> Result<(), FrontDoorError> {
    let config = ApiConfig::from_env().map_err(|e| FrontDoorError::Config(e.to_string()))?;

    info!(name = PKG_NAME, version = VERSION, "Starting API wrapper");
    info!(
        bind = %config.bind,
        port = config.port,
        cli = %config.cli_command,
        cli_args = ?config.cli_args,
        token_set = config.token_set,
        "API configuration"
    );

    let server = ApiServer::from_config(&config)?;
    let listener = server.bind().await?;

    tokio::select! {
        result = server.serve(listener) => result,
        _ = shutdown_signal() => {
            info!("Shutdown complete");
            Ok(())
        }
    }
}
