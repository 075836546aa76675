use clawgate::config::Config;
use clawgate::error::FrontDoorError;
use clawgate::process::{ChildExit, Supervisor};
use clawgate::proxy::ProxyServer;
use clawgate::shutdown::shutdown_signal;
use clawgate::{PKG_NAME, VERSION};
use std::process::ExitCode;
use tracing::{error, info};

/// What ended the front door's main loop
enum Outcome {
    GatewayExited(ChildExit),
    ServerStopped(Result<(), FrontDoorError>),
    Shutdown,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("clawgate=debug".parse().expect("valid log directive")),
        )
        .init();

    match run().await {
        Ok(()) => {
            info!("Shutdown complete");
            ExitCode::SUCCESS
        }
        Err(e) => {
            let code = e.exit_code();
            error!(error = %e, exit_code = code, "Front door exiting");
            ExitCode::from(u8::try_from(code).unwrap_or(1))
        }
    }
}

async fn run() -> Result<(), FrontDoorError> {
    let config = Config::from_env().map_err(|e| FrontDoorError::Config(e.to_string()))?;

    print_startup_banner(&config);

    let server = ProxyServer::from_config(&config)?;
    let listener = server.bind().await?;
    let stats = server.upstream().stats();

    let mut supervisor = Supervisor::new(config.upstream.clone());
    supervisor.spawn()?;

    let outcome = tokio::select! {
        exit = supervisor.wait() => Outcome::GatewayExited(exit),
        result = server.serve(listener) => Outcome::ServerStopped(result),
        _ = shutdown_signal() => Outcome::Shutdown,
    };

    info!(
        requests = stats.get_requests(),
        failures = stats.get_failures(),
        "Upstream traffic"
    );

    let grace_period = config.upstream.shutdown_grace_period();
    match outcome {
        Outcome::GatewayExited(exit) => Err(FrontDoorError::UpstreamCrashed(exit)),
        Outcome::ServerStopped(result) => {
            info!("Stopping gateway...");
            supervisor.shutdown(grace_period).await;
            result
        }
        Outcome::Shutdown => {
            info!("Stopping gateway...");
            supervisor.shutdown(grace_period).await;
            Ok(())
        }
    }
}

fn print_startup_banner(config: &Config) {
    info!(name = PKG_NAME, version = VERSION, "Starting front door");
    info!(
        bind = %config.server.bind,
        port = config.server.port,
        "Listener configuration"
    );
    info!(
        upstream_port = config.upstream.port,
        command = %config.upstream.command,
        working_dir = ?config.upstream.working_dir,
        shutdown_grace_period_secs = config.upstream.shutdown_grace_period_secs,
        "Gateway configuration"
    );
}
