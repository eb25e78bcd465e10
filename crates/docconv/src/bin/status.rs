//! Conversion status binary
//!
//! Run with: cargo run -p docconv --features cli --bin docconv-status -- --session <id>

use clap::Parser;
use docconv::{
    admission::{MemoryAdmission, SystemMemoryProbe},
    processing::get_conversion_status,
    storage::SessionDb,
    ConversionConfig,
};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Print the conversion status of a session as JSON
#[derive(Parser, Debug)]
#[command(name = "docconv-status")]
#[command(about = "Show dual-track conversion progress for a session", long_about = None)]
struct Cli {
    /// Session to report on
    #[arg(short = 's', long = "session")]
    session: String,

    /// TOML configuration file
    #[arg(short = 'c', long = "config")]
    config: Option<PathBuf>,

    /// Session database (overrides the configured path)
    #[arg(long = "db")]
    db: Option<PathBuf>,

    /// Also report whether a high-fidelity conversion could start now
    #[arg(long = "memory")]
    memory: bool,

    /// Pretty-print the JSON output
    #[arg(long = "pretty")]
    pretty: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "docconv=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => ConversionConfig::from_file(path)?,
        None => ConversionConfig::default(),
    };
    let db_path = cli.db.unwrap_or_else(|| config.storage.database_path.clone());
    tracing::info!("Opening session database at {}", db_path.display());
    let db = SessionDb::new(&db_path)?;

    let status = get_conversion_status(
        &db,
        None,
        &cli.session,
        config.jobs.per_file_estimate_secs,
    )
    .await?;

    let mut output = serde_json::to_value(&status)?;
    if cli.memory {
        let admission =
            MemoryAdmission::from_config(Arc::new(SystemMemoryProbe::new()), &config.memory);
        output["memory"] = serde_json::to_value(admission.check(config.memory.required_gb))?;
    }

    let rendered = if cli.pretty {
        serde_json::to_string_pretty(&output)?
    } else {
        serde_json::to_string(&output)?
    };
    println!("{}", rendered);

    Ok(())
}
