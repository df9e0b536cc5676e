use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;
use clap::Parser;
use rand::Rng;
use serde::Serialize;
use tracing::{info, warn};

use arena_watch::config::{AppConfig, CONFIG_PATH};
use arena_watch::diff::{compute_diff, is_significant_default};
use arena_watch::fetch::{self, with_retries};
use arena_watch::fingerprint;
use arena_watch::message;
use arena_watch::notify;
use arena_watch::overtake::{compute_h2h_report, compute_overtake_report};
use arena_watch::projections::compute_all_projections;
use arena_watch::state::{Observation, WatchState};
use arena_watch::store::{self, StorePaths};
use arena_watch::types::{ChangeSet, Snapshot};
use arena_watch::TIMESERIES_TOP_N;

#[derive(Parser)]
#[command(name = "watch", about = "Watch the Arena leaderboard and notify Discord on changes")]
struct Args {
    /// Leaderboard URL (defaults to config / built-in)
    #[arg(long)]
    url: Option<String>,

    /// Discord webhook URL (or set DISCORD_WEBHOOK_URL)
    #[arg(long)]
    webhook_url: Option<String>,

    /// Config file path
    #[arg(long, default_value = CONFIG_PATH)]
    config: PathBuf,

    /// Path for cached watcher state
    #[arg(long, default_value = "leaderboard_state.json")]
    state_file: PathBuf,

    /// Directory for full JSON snapshots
    #[arg(long, default_value = "data/snapshots")]
    snapshot_dir: PathBuf,

    /// Directory for the JSONL time series
    #[arg(long, default_value = "data/timeseries")]
    timeseries_dir: PathBuf,

    /// Cache path for the latest structured snapshot
    #[arg(long, default_value = ".state/structured_snapshot.json")]
    structured_cache: PathBuf,

    /// HTTP timeout in seconds
    #[arg(long)]
    timeout: Option<u64>,

    /// Retries for transient network failures
    #[arg(long)]
    retries: Option<u32>,

    /// Base backoff in seconds between retries; doubles each retry
    #[arg(long)]
    retry_backoff_secs: Option<f64>,

    /// Consecutive checks required to confirm a new fingerprint
    #[arg(long)]
    confirmation_checks: Option<u32>,

    /// Send a notification even if no change is detected
    #[arg(long)]
    force_send: bool,

    /// Do everything except posting to Discord
    #[arg(long)]
    dry_run: bool,

    /// Repeat checks in a loop with randomized delays
    #[arg(long = "loop")]
    loop_mode: bool,

    /// Minimum randomized delay between loop checks, seconds
    #[arg(long)]
    min_interval_secs: Option<u64>,

    /// Maximum randomized delay between loop checks, seconds
    #[arg(long)]
    max_interval_secs: Option<u64>,

    /// Cap on the number of checks when looping
    #[arg(long)]
    max_checks: Option<u64>,

    /// Disable structured parsing (fingerprint-only mode)
    #[arg(long)]
    no_structured: bool,
}

/// Everything one check needs, after config/flag layering.
struct CheckContext {
    url: String,
    webhook_url: Option<String>,
    client: reqwest::Client,
    state_file: PathBuf,
    store_paths: StorePaths,
    retries: u32,
    backoff: Duration,
    confirmation_checks: u32,
    top_n: usize,
    force_send: bool,
    dry_run: bool,
    structured: bool,
}

/// Machine-readable per-check report, one JSON line on stdout.
#[derive(Serialize)]
struct CheckEvent {
    timestamp: String,
    url: String,
    fingerprint: String,
    outcome: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    models: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    diff_summary: Option<String>,
    notified: bool,
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

    // .env may carry DISCORD_WEBHOOK_URL; absence is fine.
    let _ = dotenvy::dotenv();

    let args = Args::parse();
    let config = AppConfig::load_or_default(&args.config)?;
    let settings = &config.settings;

    let webhook_url = args
        .webhook_url
        .clone()
        .or_else(|| std::env::var("DISCORD_WEBHOOK_URL").ok())
        .filter(|url| !url.trim().is_empty());
    if webhook_url.is_none() && !args.dry_run {
        anyhow::bail!("provide --webhook-url or set DISCORD_WEBHOOK_URL");
    }

    let confirmation_checks = args
        .confirmation_checks
        .unwrap_or(settings.confirmation_checks);
    if confirmation_checks == 0 {
        anyhow::bail!("--confirmation-checks must be greater than 0");
    }
    let min_interval = args.min_interval_secs.unwrap_or(settings.min_interval_secs);
    let max_interval = args.max_interval_secs.unwrap_or(settings.max_interval_secs);
    if min_interval > max_interval {
        anyhow::bail!("--min-interval-secs cannot be greater than --max-interval-secs");
    }
    if args.max_checks == Some(0) {
        anyhow::bail!("--max-checks must be greater than 0");
    }

    let timeout = Duration::from_secs(args.timeout.unwrap_or(settings.timeout_secs));
    let ctx = CheckContext {
        url: args.url.clone().unwrap_or_else(|| config.watch.url.clone()),
        webhook_url,
        client: fetch::client(timeout).context("failed to build HTTP client")?,
        state_file: args.state_file.clone(),
        store_paths: StorePaths {
            snapshot_dir: args.snapshot_dir.clone(),
            timeseries_dir: args.timeseries_dir.clone(),
            cache_path: args.structured_cache.clone(),
        },
        retries: args.retries.unwrap_or(settings.retries),
        backoff: Duration::from_secs_f64(
            args.retry_backoff_secs
                .unwrap_or(settings.retry_backoff_secs)
                .max(0.0),
        ),
        confirmation_checks,
        top_n: settings.top_n,
        force_send: args.force_send,
        dry_run: args.dry_run,
        structured: !args.no_structured,
    };

    if !args.loop_mode {
        return run_single_check(&ctx).await;
    }

    let mut check_count: u64 = 0;
    loop {
        check_count += 1;
        info!("Starting check {check_count}");
        run_single_check(&ctx).await?;

        if args.max_checks.is_some_and(|max| check_count >= max) {
            info!("Reached max checks ({check_count}); stopping loop");
            return Ok(());
        }

        let sleep_secs = rand::rng().random_range(min_interval..=max_interval);
        info!("Sleeping {sleep_secs} seconds before next check");
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Shutdown signal received");
                return Ok(());
            }
            _ = tokio::time::sleep(Duration::from_secs(sleep_secs)) => {}
        }
    }
}

async fn run_single_check(ctx: &CheckContext) -> Result<()> {
    let html = with_retries("leaderboard fetch", ctx.retries, ctx.backoff, || {
        fetch::fetch_html(&ctx.client, &ctx.url)
    })
    .await
    .context("failed to fetch leaderboard page")?;

    let checked_at = Utc::now();
    let new_hash = fingerprint::fingerprint(&html);

    // Structured parsing runs alongside fingerprint detection and must
    // never take the check cycle down with it.
    let mut structured: Option<Snapshot> = None;
    if ctx.structured {
        match arena_watch::parser::parse_html(&html, checked_at) {
            Ok(outcome) => {
                info!(
                    "Structured parser: extracted {} models ({} rows skipped)",
                    outcome.snapshot.models.len(),
                    outcome.skipped_rows
                );
                structured = Some(outcome.snapshot);
            }
            Err(err) => {
                warn!("structured leaderboard parsing failed: {err}");
            }
        }
    }

    let mut state = WatchState::load(&ctx.state_file);
    let observation = state.observe(&new_hash, ctx.confirmation_checks);
    let mut changed = matches!(observation, Observation::Confirmed { .. });
    let previous_hash = match &observation {
        Observation::Confirmed { previous } => Some(previous.clone()),
        _ => None,
    };

    match &observation {
        Observation::Unchanged => info!("No leaderboard change detected"),
        Observation::Baseline => info!("First check; fingerprint recorded as baseline"),
        Observation::Pending { count, required } => info!(
            "Observed a new leaderboard fingerprint but waiting for confirmation \
             ({count}/{required})"
        ),
        Observation::Confirmed { .. } => info!("Leaderboard content changed"),
    }

    // Structured diff, enrichment, and storage.
    let mut structured_diff: Option<ChangeSet> = None;
    if let Some(snapshot) = &mut structured {
        let previous = store::load_cache(&ctx.store_paths.cache_path);

        if changed || previous.is_none() {
            enrich_snapshot(snapshot, &ctx.store_paths.timeseries_dir);

            if let Some(previous) = &previous {
                let diff = compute_diff(previous, snapshot);
                info!("Structured diff: {}", message::diff_summary(&diff));

                // Structured veto: a fingerprint flip with identical (or
                // insignificant) model data is a cosmetic page change,
                // not a leaderboard update.
                if changed && !is_significant_default(&diff) {
                    info!(
                        "Page fingerprint changed but structured leaderboard data \
                         shows nothing significant — suppressing notification"
                    );
                    changed = false;
                }
                structured_diff = Some(diff);
            }

            match store::store_snapshot(snapshot, previous.as_ref(), &ctx.store_paths, true) {
                Ok(result) => {
                    if let Some(path) = &result.snapshot_path {
                        info!("Snapshot saved: {}", path.display());
                    }
                }
                Err(err) => warn!("structured snapshot storage failed: {err:#}"),
            }
        } else if matches!(observation, Observation::Unchanged) {
            // Refresh the cache only while no confirmation is pending;
            // the pending window must keep the old diff baseline intact.
            if let Err(err) = store::save_cache(snapshot, &ctx.store_paths.cache_path) {
                warn!("failed to refresh snapshot cache: {err:#}");
            }
        }
    }

    // Guard against duplicate notifications across overlapping runs.
    if changed && state.already_notified(&new_hash) {
        info!("Notification already sent for this fingerprint in a prior run — skipping");
        changed = false;
    }

    let should_send = ctx.force_send || changed;
    let mut notified = false;

    if should_send {
        let text = if ctx.force_send && !changed {
            message::format_force_send_message(&ctx.url, Some(&new_hash), checked_at)
        } else if let Some(diff) = structured_diff.as_ref().filter(|d| !d.is_empty()) {
            let snapshot = structured.as_ref();
            message::format_diff_message(
                diff,
                &ctx.url,
                ctx.top_n,
                snapshot.and_then(|s| s.overtake.as_ref()),
                snapshot.and_then(|s| s.projections.as_ref()),
            )
        } else if let Some(snapshot) = structured.as_ref().filter(|s| !s.models.is_empty()) {
            message::format_snapshot_message(
                snapshot,
                &ctx.url,
                previous_hash.as_deref(),
                Some(&new_hash),
                ctx.top_n,
            )
        } else {
            message::format_fingerprint_message(
                &ctx.url,
                previous_hash.as_deref(),
                &new_hash,
                checked_at,
            )
        };

        if ctx.dry_run {
            info!("[dry-run] would send Discord message:\n{text}");
        } else {
            let webhook_url = ctx
                .webhook_url
                .as_deref()
                .context("webhook URL required to send notifications")?;
            notify::send_discord_message(
                &ctx.client,
                webhook_url,
                &text,
                ctx.retries,
                ctx.backoff,
            )
            .await?;
            state.mark_notified(&new_hash);
            notified = true;
        }
    }

    let event = CheckEvent {
        timestamp: checked_at.to_rfc3339(),
        url: ctx.url.clone(),
        fingerprint: fingerprint::short(&new_hash).to_string(),
        outcome: match &observation {
            Observation::Unchanged => "unchanged".to_string(),
            Observation::Baseline => "baseline".to_string(),
            Observation::Pending { count, required } => format!("pending {count}/{required}"),
            Observation::Confirmed { .. } if changed => "changed".to_string(),
            Observation::Confirmed { .. } => "changed (suppressed)".to_string(),
        },
        models: structured.as_ref().map(|s| s.models.len()),
        diff_summary: structured_diff.as_ref().map(message::diff_summary),
        notified,
    };
    if let Ok(json) = serde_json::to_string(&event) {
        println!("{json}");
    }

    state.url = Some(ctx.url.clone());
    state.last_checked_utc = Some(checked_at);
    state.save(&ctx.state_file)?;
    Ok(())
}

/// Attach overtake, head-to-head, and settlement-projection analytics
/// before the snapshot is stored or formatted.
fn enrich_snapshot(snapshot: &mut Snapshot, timeseries_dir: &Path) {
    snapshot.overtake = Some(compute_overtake_report(snapshot, 20));
    snapshot.h2h = Some(compute_h2h_report(snapshot, 5));

    // Include the current capture as a synthetic record so vote rates
    // reflect the newest data (its time-series line is appended later).
    let mut timeseries = store::load_timeseries(timeseries_dir);
    timeseries.push(store::timeseries_record(snapshot, TIMESERIES_TOP_N));
    snapshot.projections = Some(compute_all_projections(
        snapshot,
        &timeseries,
        10,
        7.0,
        snapshot.captured_at,
    ));
}
