use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use std::process::ExitCode;
use tracing::info;
use tracing_subscriber::EnvFilter;

mod audit;
mod config;
mod probe;
mod types;

use audit::{generate_json_report, generate_text_report, AuditEngine};
use config::Config;
use types::Category;

/// Black-box security-compliance audit of a deployed web stack
#[derive(Parser)]
#[command(name = "hardenscan")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Base URL of the target (overrides AUDIT_TARGET, default http://localhost)
    #[arg(short, long)]
    target: Option<String>,

    /// Administrative panel port expected closed
    #[arg(long)]
    admin_port: Option<u16>,

    /// Database port expected closed
    #[arg(long)]
    db_port: Option<u16>,

    /// Object-storage health URL probed from outside
    #[arg(long)]
    storage_url: Option<String>,

    /// Name of the session cookie issued on login
    #[arg(long)]
    session_cookie: Option<String>,

    /// Per-call network timeout in seconds (1-30)
    #[arg(long)]
    timeout: Option<u64>,

    /// Maximum checks running at once
    #[arg(long)]
    concurrency: Option<usize>,

    /// Only run these categories (repeatable)
    #[arg(long = "only", value_name = "CATEGORY")]
    only: Vec<Category>,

    /// Report format
    #[arg(short, long, value_enum, default_value_t = Format::Text)]
    format: Format,

    /// Disable ANSI colours
    #[arg(long)]
    no_color: bool,

    /// Exit non-zero when any check is indeterminate
    #[arg(long)]
    strict: bool,

    /// Debug logging
    #[arg(short, long)]
    verbose: bool,

    /// Emit logs as JSON
    #[arg(long)]
    log_json: bool,
}

#[derive(Clone, Copy, ValueEnum)]
enum Format {
    Text,
    Json,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.log_json);

    match run(cli).await {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            eprintln!("error: {:#}", e);
            ExitCode::from(2)
        }
    }
}

async fn run(cli: Cli) -> Result<u8> {
    dotenvy::dotenv().ok();
    let config = build_config(&cli)?;

    info!("Starting hardenscan v{}", env!("CARGO_PKG_VERSION"));
    info!("Target: {}", config.target.base_url);

    let strict = config.strict;
    let color = config.color;
    let engine = AuditEngine::new(config)?;
    let report = engine.run().await;

    match cli.format {
        Format::Text => print!("{}", generate_text_report(&report, color)),
        Format::Json => println!("{}", generate_json_report(&report)?),
    }

    Ok(report.exit_code(strict))
}

fn build_config(cli: &Cli) -> Result<Config> {
    let mut config = Config::from_env(cli.target.as_deref())?;

    if let Some(port) = cli.admin_port {
        config.target.admin_port = port;
    }
    if let Some(port) = cli.db_port {
        config.target.db_port = port;
    }
    if let Some(url) = &cli.storage_url {
        config
            .target
            .set_storage_url(url)
            .context("--storage-url")?;
    }
    if let Some(name) = &cli.session_cookie {
        config.target.session_cookie = name.clone();
    }
    if let Some(secs) = cli.timeout {
        config.set_timeout_secs(secs)?;
    }
    if let Some(n) = cli.concurrency {
        config.concurrency = n;
    }

    config.categories = cli.only.clone();
    config.color = config.color && !cli.no_color;
    config.strict = cli.strict;

    Ok(config)
}

/// Logs go to stderr so stdout carries only the report
fn init_tracing(verbose: bool, json: bool) {
    let directive = if verbose { "hardenscan=debug" } else { "hardenscan=info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(directive));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false);

    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}
