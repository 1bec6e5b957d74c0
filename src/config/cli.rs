use clap::Parser;
use std::path::PathBuf;

/// Command-line arguments for the echo server
///
/// Every value is optional so that only flags given explicitly override
/// the configuration file.
#[derive(Parser, Debug, Default, Clone)]
#[command(name = "dummyhttp")]
#[command(version)]
#[command(about = "HTTP echo server that reflects requests back as JSON", long_about = None)]
pub struct CliArgs {
    /// Path to YAML configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Server mode (dummy, static, openapi)
    #[arg(long)]
    pub mode: Option<String>,

    /// Address to listen on (e.g. :8080 or 127.0.0.1:8080)
    #[arg(short, long)]
    pub listen: Option<String>,

    /// Server timeout in milliseconds
    #[arg(short, long, allow_negative_numbers = true)]
    pub timeout: Option<i64>,

    /// Message to return (dummy mode)
    #[arg(short, long)]
    pub message: Option<String>,

    /// Log filter (trace, debug, info, warn, error or a full directive)
    #[arg(long)]
    pub log_level: Option<String>,
}
