//! One-shot probe: fetch (or read) a leaderboard page, run the
//! structured parser, and dump the snapshot as pretty JSON.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;
use clap::Parser;

use arena_watch::fetch;
use arena_watch::parser::parse_html;
use arena_watch::DEFAULT_URL;

#[derive(Parser)]
#[command(name = "probe_parse", about = "Parse a leaderboard page and print the snapshot")]
struct Args {
    /// Leaderboard URL to fetch
    #[arg(long, default_value = DEFAULT_URL)]
    url: String,

    /// Parse a local HTML file instead of fetching
    #[arg(long, conflicts_with = "url")]
    file: Option<PathBuf>,

    /// HTTP timeout in seconds
    #[arg(long, default_value_t = 30)]
    timeout: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    let html = match &args.file {
        Some(path) => std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?,
        None => {
            let client = fetch::client(Duration::from_secs(args.timeout))?;
            fetch::fetch_html(&client, &args.url)
                .await
                .context("failed to fetch leaderboard page")?
        }
    };

    let outcome = parse_html(&html, Utc::now()).context("no leaderboard table found")?;
    eprintln!(
        "{} models, {} rows skipped",
        outcome.snapshot.models.len(),
        outcome.skipped_rows
    );
    println!("{}", serde_json::to_string_pretty(&outcome.snapshot)?);
    Ok(())
}
