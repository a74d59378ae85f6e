//! Agent Door — the gateway binary.
//!
//! Configuration is environment variables only; there are no positional
//! arguments. Keys: `PORT`, `ADMIN_API_KEY`, `BASE_URL`, `CORS_ORIGINS`,
//! `TRUSTED_PROXY`, `MAX_REGISTRATIONS`, `FETCH_TIMEOUT_MS`, `DATA_DIR`,
//! `ALLOW_PRIVATE_NETWORKS`.
//!
//! Exit codes: 0 on graceful shutdown; 1 on startup misconfiguration or a
//! forced shutdown after the drain deadline.

use std::process::ExitCode;

use clap::Parser;
use tracing::{error, info};

use agentdoor_config::AppConfig;
use agentdoor_gateway::{Gateway, GatewayError};

#[derive(Parser)]
#[command(
    name = "agent-door",
    about = "Agent Door — expose any OpenAPI service as an agent-protocol surface.",
    version,
    long_about = "Agent Door is a multi-tenant HTTP gateway. Register a site with an \
OpenAPI descriptor and an upstream base URL; the gateway compiles the spec into \
capabilities and serves them under /<slug>/.well-known/agents/... with sessions, \
rate limits, and SSRF-guarded upstream calls.\n\nAll configuration is via \
environment variables; see --help for the list."
)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .with_target(false)
        .init();

    let config = match AppConfig::from_env() {
        Ok(config) => config,
        Err(err) => {
            error!(error = %err, "Configuration error");
            return ExitCode::from(1);
        }
    };
    info!(?config, "Starting Agent Door");

    let gateway = match Gateway::start(config).await {
        Ok(gateway) => gateway,
        Err(err) => {
            error!(error = %err, "Startup failed");
            return ExitCode::from(1);
        }
    };

    match gateway.serve().await {
        Ok(()) => {
            info!("Goodbye");
            ExitCode::SUCCESS
        }
        Err(GatewayError::DrainTimeout) => {
            error!("Forced shutdown: in-flight requests exceeded the drain deadline");
            ExitCode::from(1)
        }
        Err(err) => {
            error!(error = %err, "Gateway terminated with an error");
            ExitCode::from(1)
        }
    }
}
