use std::path::PathBuf;

use anyhow::{bail, Context};
use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use rtapi::{config, report, runner};

/// Real-time API latency analyzer: runs a rate-controlled HTTP benchmark
/// against each configured endpoint and reports percentile latency against
/// the 30ms real-time threshold.
#[derive(Parser, Debug)]
#[command(name = "rtapi", version, about)]
struct Cli {
    /// JSON or YAML file with the endpoint list
    #[arg(short, long, conflicts_with = "data")]
    file: Option<PathBuf>,

    /// Endpoint list passed inline as a JSON string
    #[arg(short, long)]
    data: Option<String>,

    /// Write the JSON report to this file (the summary table always goes to
    /// stdout)
    #[arg(short, long)]
    output: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "rtapi=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    // Fatal configuration errors abort here, before any network activity
    let specs = match (&cli.file, &cli.data) {
        (Some(path), None) => config::load_file(path).context("loading endpoint file")?,
        (None, Some(data)) => config::load_inline(data).context("parsing inline endpoint data")?,
        (None, None) => bail!("no endpoint data: pass --file or --data"),
        (Some(_), Some(_)) => unreachable!("clap rejects --file with --data"),
    };
    if specs.is_empty() {
        bail!("endpoint list is empty");
    }
    info!(endpoints = specs.len(), "configuration loaded");

    let (cancel_handle, cancel) = runner::cancel_pair();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Ctrl-C received, draining in-flight requests");
            cancel_handle.cancel();
        }
    });

    let results = runner::run_all(&specs, cancel).await?;

    report::print_table(&results);
    if let Some(path) = &cli.output {
        let json = serde_json::to_string_pretty(&report::json_report(&results))?;
        std::fs::write(path, json)
            .with_context(|| format!("writing report to {}", path.display()))?;
        info!(path = %path.display(), "JSON report written");
    }

    Ok(())
}
