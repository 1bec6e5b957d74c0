use color_eyre::eyre::{Result, WrapErr};
use dummyhttp::Config;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize error handling
    color_eyre::install()?;

    let config = Config::load().wrap_err("Failed to load configuration")?;

    // RUST_LOG wins over the configured level
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.log_level))
        .wrap_err_with(|| format!("Invalid log level: {}", config.log_level))?;
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!(
        mode = %config.mode,
        listen = %config.server.listen,
        timeout = ?config.server.timeout,
        "Starting dummyhttp"
    );

    dummyhttp::run(&config)
        .await
        .wrap_err("Failed to run dummy HTTP server")?;

    Ok(())
}
