//! Headless host binary for stdin/stdout JSON communication.
//!
//! Reads newline-delimited JSON client messages from stdin, runs one
//! session against them, and writes agent messages and activity events to
//! stdout.
//!
//! All tracing/diagnostic output goes to stderr so that stdout remains a
//! clean JSON protocol channel.

use nova::config::NovaConfig;
use nova::host::run_stdio_host;
use nova::session::SessionDeps;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialise tracing to stderr only (stdout is reserved for the JSON
    // protocol).
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let config_path = NovaConfig::default_config_path();
    let mut config = if config_path.exists() {
        NovaConfig::from_file(&config_path)?
    } else {
        tracing::info!("no config file at {}; using defaults", config_path.display());
        NovaConfig::default()
    };
    config.apply_env_overrides();

    tracing::info!("nova-host starting");

    let deps = SessionDeps::new(&config)?;
    run_stdio_host(deps).await.map_err(|e| {
        tracing::error!(error = %e, "nova-host exited with error");
        anyhow::anyhow!("nova-host failed: {e}")
    })?;

    tracing::info!("nova-host shut down cleanly");
    Ok(())
}
