//! Snapshot persistence: full gzipped JSON snapshots, a compact JSONL
//! time series, and the latest-snapshot cache used for diffing.

use std::fs::{self, File, OpenOptions};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::types::Snapshot;
use crate::TIMESERIES_TOP_N;

/// Time-series file name inside the time-series directory.
const TIMESERIES_FILE: &str = "top20.jsonl";

/// Where the store writes.
#[derive(Debug, Clone)]
pub struct StorePaths {
    pub snapshot_dir: PathBuf,
    pub timeseries_dir: PathBuf,
    pub cache_path: PathBuf,
}

/// Compact per-model entry in a time-series record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompactModel {
    pub rank: u32,
    pub name: String,
    pub score: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ci: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub votes: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rank_ub: Option<u32>,
}

/// Top overtake challengers, kept small for the JSONL line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OvertakeBrief {
    pub name: String,
    pub prob: f64,
    pub gap: i64,
}

/// Three-model summary of one cadence's settlement projections.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CadenceBrief {
    pub settlement: String,
    pub days: f64,
    pub top3: Vec<ProjectionBrief>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectionBrief {
    pub name: String,
    pub now: f64,
    pub settle: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProjectionsBrief {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub weekly: Option<CadenceBrief>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub monthly: Option<CadenceBrief>,
}

/// One line of the JSONL time series: the top models plus analytics
/// summaries small enough to keep forever.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeseriesRecord {
    pub ts: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date: Option<String>,
    pub models: Vec<CompactModel>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub overtake_top5: Vec<OvertakeBrief>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub leader_prob_staying_1: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub projections: Option<ProjectionsBrief>,
}

fn round6(x: f64) -> f64 {
    (x * 1e6).round() / 1e6
}

fn round2(x: f64) -> f64 {
    (x * 100.0).round() / 100.0
}

/// Build the compact time-series record for a snapshot.
pub fn timeseries_record(snapshot: &Snapshot, top_n: usize) -> TimeseriesRecord {
    let models = snapshot
        .models
        .iter()
        .take(top_n)
        .map(|m| CompactModel {
            rank: m.rank,
            name: m.model_name.clone(),
            score: m.score,
            ci: Some(m.ci),
            votes: Some(m.votes),
            rank_ub: Some(m.rank_ub),
        })
        .collect();

    let mut record = TimeseriesRecord {
        ts: snapshot.captured_at,
        date: snapshot.meta.leaderboard_date.clone(),
        models,
        overtake_top5: Vec::new(),
        leader_prob_staying_1: None,
        projections: None,
    };

    if let Some(overtake) = &snapshot.overtake {
        record.overtake_top5 = overtake
            .overtake_probabilities
            .iter()
            .take(5)
            .map(|e| OvertakeBrief {
                name: e.model_name.clone(),
                prob: round6(e.overtake_prob),
                gap: e.score_gap,
            })
            .collect();
        record.leader_prob_staying_1 =
            overtake.leader.as_ref().map(|l| round6(l.prob_staying_1));
    }

    if let Some(projections) = &snapshot.projections {
        let brief = |report: &crate::projections::ProjectionReport| {
            if report.projections.is_empty() {
                return None;
            }
            Some(CadenceBrief {
                settlement: report.settlement_label.clone(),
                days: round2(report.days_remaining),
                top3: report
                    .projections
                    .iter()
                    .take(3)
                    .map(|p| ProjectionBrief {
                        name: p.model_name.clone(),
                        now: round6(p.prob_now),
                        settle: round6(p.prob_at_settlement),
                    })
                    .collect(),
            })
        };
        let weekly = brief(&projections.weekly);
        let monthly = brief(&projections.monthly);
        if weekly.is_some() || monthly.is_some() {
            record.projections = Some(ProjectionsBrief { weekly, monthly });
        }
    }

    record
}

/// Write a full snapshot to a timestamped file in `snapshot_dir`,
/// gzipped unless `compress` is off.
pub fn save_snapshot(snapshot: &Snapshot, snapshot_dir: &Path, compress: bool) -> Result<PathBuf> {
    fs::create_dir_all(snapshot_dir)
        .with_context(|| format!("failed to create {}", snapshot_dir.display()))?;

    let stem = snapshot.captured_at.format("%Y%m%d_%H%M%S");
    let mut content = serde_json::to_vec_pretty(snapshot).context("failed to encode snapshot")?;
    content.push(b'\n');

    let path = if compress {
        let path = snapshot_dir.join(format!("{stem}.json.gz"));
        let file = File::create(&path)
            .with_context(|| format!("failed to create {}", path.display()))?;
        let mut encoder = GzEncoder::new(file, Compression::default());
        encoder.write_all(&content)?;
        encoder.finish()?;
        path
    } else {
        let path = snapshot_dir.join(format!("{stem}.json"));
        fs::write(&path, &content)
            .with_context(|| format!("failed to write {}", path.display()))?;
        path
    };
    Ok(path)
}

/// Load a snapshot from a `.json` or `.json.gz` file.
pub fn load_snapshot(path: &Path) -> Result<Snapshot> {
    let bytes =
        fs::read(path).with_context(|| format!("failed to read {}", path.display()))?;
    let text = if path.extension().is_some_and(|e| e == "gz") {
        let mut decoder = GzDecoder::new(bytes.as_slice());
        let mut out = String::new();
        decoder
            .read_to_string(&mut out)
            .with_context(|| format!("failed to decompress {}", path.display()))?;
        out
    } else {
        String::from_utf8(bytes).context("snapshot is not valid UTF-8")?
    };
    serde_json::from_str(&text).with_context(|| format!("failed to parse {}", path.display()))
}

/// Snapshot files sorted oldest-first (the timestamped names sort).
pub fn list_snapshots(snapshot_dir: &Path) -> Vec<PathBuf> {
    let Ok(entries) = fs::read_dir(snapshot_dir) else {
        return Vec::new();
    };
    let mut files: Vec<PathBuf> = entries
        .flatten()
        .map(|e| e.path())
        .filter(|p| {
            p.file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.ends_with(".json") || n.ends_with(".json.gz"))
        })
        .collect();
    files.sort();
    files
}

/// Most recent stored snapshot, if any loads cleanly.
pub fn load_latest_snapshot(snapshot_dir: &Path) -> Option<Snapshot> {
    let path = list_snapshots(snapshot_dir).pop()?;
    match load_snapshot(&path) {
        Ok(snapshot) => Some(snapshot),
        Err(err) => {
            warn!("failed to load snapshot {}: {err:#}", path.display());
            None
        }
    }
}

/// Append the compact top-N record for this snapshot to the JSONL time
/// series.
pub fn append_timeseries(snapshot: &Snapshot, timeseries_dir: &Path) -> Result<PathBuf> {
    fs::create_dir_all(timeseries_dir)
        .with_context(|| format!("failed to create {}", timeseries_dir.display()))?;
    let path = timeseries_dir.join(TIMESERIES_FILE);

    let record = timeseries_record(snapshot, TIMESERIES_TOP_N);
    let mut line = serde_json::to_string(&record).context("failed to encode record")?;
    line.push('\n');

    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .with_context(|| format!("failed to open {}", path.display()))?;
    file.write_all(line.as_bytes())
        .with_context(|| format!("failed to append to {}", path.display()))?;
    Ok(path)
}

/// All time-series records; malformed lines are skipped, not fatal.
pub fn load_timeseries(timeseries_dir: &Path) -> Vec<TimeseriesRecord> {
    let path = timeseries_dir.join(TIMESERIES_FILE);
    let Ok(text) = fs::read_to_string(&path) else {
        return Vec::new();
    };
    text.lines()
        .filter(|line| !line.trim().is_empty())
        .filter_map(|line| match serde_json::from_str(line) {
            Ok(record) => Some(record),
            Err(err) => {
                warn!("skipping malformed time-series line: {err}");
                None
            }
        })
        .collect()
}

/// Save the latest snapshot at a well-known path for the next run's diff.
pub fn save_cache(snapshot: &Snapshot, cache_path: &Path) -> Result<()> {
    if let Some(parent) = cache_path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    let mut content = serde_json::to_vec_pretty(snapshot).context("failed to encode snapshot")?;
    content.push(b'\n');
    fs::write(cache_path, content)
        .with_context(|| format!("failed to write {}", cache_path.display()))?;
    Ok(())
}

/// Load the cached snapshot; a missing or corrupt cache is just "no
/// baseline", never an error.
pub fn load_cache(cache_path: &Path) -> Option<Snapshot> {
    let text = fs::read_to_string(cache_path).ok()?;
    match serde_json::from_str(&text) {
        Ok(snapshot) => Some(snapshot),
        Err(err) => {
            warn!(
                "ignoring corrupt snapshot cache {}: {err}",
                cache_path.display()
            );
            None
        }
    }
}

/// Whether two snapshots differ in any stored model field or page
/// metadata. Used to gate full-snapshot writes.
pub fn snapshots_differ(prev: &Snapshot, curr: &Snapshot) -> bool {
    prev.meta.leaderboard_date != curr.meta.leaderboard_date
        || prev.meta.total_votes != curr.meta.total_votes
        || !crate::diff::compute_diff(prev, curr).is_empty()
}

/// Outcome of one store pass.
#[derive(Debug, Clone)]
pub struct StoreResult {
    pub changed: bool,
    pub snapshot_path: Option<PathBuf>,
    pub timeseries_path: Option<PathBuf>,
}

/// Store a snapshot everywhere it belongs: always refresh the cache,
/// and write the full snapshot + time-series line when the data changed
/// (or unconditionally when `only_on_change` is off).
pub fn store_snapshot(
    snapshot: &Snapshot,
    previous: Option<&Snapshot>,
    paths: &StorePaths,
    only_on_change: bool,
) -> Result<StoreResult> {
    let changed = previous.is_none_or(|prev| snapshots_differ(prev, snapshot));

    save_cache(snapshot, &paths.cache_path)?;

    let mut result = StoreResult {
        changed,
        snapshot_path: None,
        timeseries_path: None,
    };
    if !only_on_change || changed {
        result.snapshot_path = Some(save_snapshot(snapshot, &paths.snapshot_dir, true)?);
        result.timeseries_path = Some(append_timeseries(snapshot, &paths.timeseries_dir)?);
    }
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ModelRecord, PageMeta};
    use chrono::TimeZone;

    fn snapshot(names: &[&str]) -> Snapshot {
        let models = names
            .iter()
            .enumerate()
            .map(|(i, name)| ModelRecord {
                rank: i as u32 + 1,
                rank_ub: i as u32 + 1,
                rank_lb: i as u32 + 2,
                rank_spread_raw: format!("{}{}", i + 1, i + 2),
                model_name: name.to_string(),
                organization: "Acme".to_string(),
                license: "Proprietary".to_string(),
                score: 1500 - i as i64 * 10,
                ci: 8,
                votes: 1000,
                is_preliminary: false,
                model_url: String::new(),
            })
            .collect();
        Snapshot::new(
            Utc.with_ymd_and_hms(2026, 2, 15, 14, 30, 0).unwrap(),
            PageMeta {
                leaderboard_date: Some("Feb 11, 2026".to_string()),
                total_votes: Some(5_000_000),
                total_models: Some(names.len() as u64),
            },
            models,
        )
    }

    #[test]
    fn gzip_snapshot_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let snap = snapshot(&["model-a", "model-b"]);
        let path = save_snapshot(&snap, dir.path(), true).unwrap();
        assert!(path.to_string_lossy().ends_with(".json.gz"));
        let loaded = load_snapshot(&path).unwrap();
        assert_eq!(loaded, snap);
    }

    #[test]
    fn plain_snapshot_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let snap = snapshot(&["model-a"]);
        let path = save_snapshot(&snap, dir.path(), false).unwrap();
        assert!(path.to_string_lossy().ends_with(".json"));
        assert_eq!(load_snapshot(&path).unwrap(), snap);
    }

    #[test]
    fn listing_sorts_oldest_first() {
        let dir = tempfile::tempdir().unwrap();
        let mut early = snapshot(&["model-a"]);
        early.captured_at = Utc.with_ymd_and_hms(2026, 2, 14, 0, 0, 0).unwrap();
        let late = snapshot(&["model-a", "model-b"]);
        save_snapshot(&late, dir.path(), true).unwrap();
        save_snapshot(&early, dir.path(), true).unwrap();

        let files = list_snapshots(dir.path());
        assert_eq!(files.len(), 2);
        assert!(files[0] < files[1]);

        let latest = load_latest_snapshot(dir.path()).unwrap();
        assert_eq!(latest.models.len(), 2);
    }

    #[test]
    fn timeseries_append_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let snap = snapshot(&["model-a", "model-b"]);
        append_timeseries(&snap, dir.path()).unwrap();
        append_timeseries(&snap, dir.path()).unwrap();

        let records = load_timeseries(dir.path());
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].models.len(), 2);
        assert_eq!(records[0].models[0].name, "model-a");
        assert_eq!(records[0].models[0].votes, Some(1000));
        assert_eq!(records[0].date.as_deref(), Some("Feb 11, 2026"));
    }

    #[test]
    fn malformed_timeseries_lines_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let snap = snapshot(&["model-a"]);
        let path = append_timeseries(&snap, dir.path()).unwrap();
        let mut file = OpenOptions::new().append(true).open(&path).unwrap();
        writeln!(file, "{{not json").unwrap();
        writeln!(file).unwrap();

        assert_eq!(load_timeseries(dir.path()).len(), 1);
    }

    #[test]
    fn cache_round_trip_and_missing() {
        let dir = tempfile::tempdir().unwrap();
        let cache = dir.path().join("state/structured_snapshot.json");
        assert!(load_cache(&cache).is_none());

        let snap = snapshot(&["model-a"]);
        save_cache(&snap, &cache).unwrap();
        assert_eq!(load_cache(&cache).unwrap(), snap);
    }

    #[test]
    fn store_skips_full_write_when_unchanged() {
        let dir = tempfile::tempdir().unwrap();
        let paths = StorePaths {
            snapshot_dir: dir.path().join("snapshots"),
            timeseries_dir: dir.path().join("timeseries"),
            cache_path: dir.path().join("cache.json"),
        };
        let snap = snapshot(&["model-a"]);

        let first = store_snapshot(&snap, None, &paths, true).unwrap();
        assert!(first.changed);
        assert!(first.snapshot_path.is_some());

        let second = store_snapshot(&snap, Some(&snap), &paths, true).unwrap();
        assert!(!second.changed);
        assert!(second.snapshot_path.is_none());
        // The cache still refreshes.
        assert!(paths.cache_path.exists());
        assert_eq!(list_snapshots(&paths.snapshot_dir).len(), 1);
    }

    #[test]
    fn total_votes_shift_counts_as_change() {
        let a = snapshot(&["model-a"]);
        let mut b = a.clone();
        assert!(!snapshots_differ(&a, &b));
        b.meta.total_votes = Some(5_000_100);
        assert!(snapshots_differ(&a, &b));
    }

    #[test]
    fn timeseries_record_carries_analytics() {
        let mut snap = snapshot(&["model-a", "model-b", "model-c"]);
        snap.overtake = Some(crate::overtake::compute_overtake_report(&snap, 20));
        let record = timeseries_record(&snap, 2);
        assert_eq!(record.models.len(), 2);
        assert_eq!(record.overtake_top5.len(), 2);
        assert_eq!(record.overtake_top5[0].name, "model-b");
        assert!(record.leader_prob_staying_1.is_some());
    }
}
