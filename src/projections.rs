//! Settlement-date projections for prediction-market contracts on the
//! #1 spot.
//!
//! Vote accumulation rates from the time series feed CI-shrinkage math:
//! ci scales as 1/sqrt(votes), so a known vote rate projects each model's
//! ci forward to a contract settlement date, and with it the overtake
//! probability at settlement rather than at the current instant.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Datelike, Duration, NaiveDate, Utc, Weekday};
use serde::{Deserialize, Serialize};

use crate::overtake::overtake_probability;
use crate::store::TimeseriesRecord;
use crate::types::Snapshot;

/// Contracts settle at noon ET, approximated as 17:00 UTC.
const SETTLEMENT_HOUR_UTC: u32 = 17;

/// Overtake probability below which a ranking counts as locked in.
const LOCK_THRESHOLD: f64 = 0.05;

/// Contract cadence: weekly settles Saturday, monthly on the last
/// calendar day of the month.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Cadence {
    Weekly,
    Monthly,
}

impl Cadence {
    pub fn label(self) -> &'static str {
        match self {
            Cadence::Weekly => "Weekly",
            Cadence::Monthly => "Monthly",
        }
    }
}

fn at_settlement_hour(date: NaiveDate) -> DateTime<Utc> {
    date.and_hms_opt(SETTLEMENT_HOUR_UTC, 0, 0)
        .expect("valid settlement time")
        .and_utc()
}

fn last_day_of_month(year: i32, month: u32) -> NaiveDate {
    let (next_year, next_month) = if month == 12 {
        (year + 1, 1)
    } else {
        (year, month + 1)
    };
    NaiveDate::from_ymd_opt(next_year, next_month, 1)
        .expect("valid month start")
        .pred_opt()
        .expect("month has a last day")
}

/// Next settlement instant strictly after `from` (or later the same day
/// when the settlement hour is still ahead).
pub fn next_settlement_date(cadence: Cadence, from: DateTime<Utc>) -> DateTime<Utc> {
    match cadence {
        Cadence::Weekly => {
            let days_ahead = (Weekday::Sat.num_days_from_monday() + 7
                - from.weekday().num_days_from_monday())
                % 7;
            let mut candidate =
                at_settlement_hour(from.date_naive() + Duration::days(i64::from(days_ahead)));
            if candidate <= from {
                candidate += Duration::days(7);
            }
            candidate
        }
        Cadence::Monthly => {
            let mut candidate = at_settlement_hour(last_day_of_month(from.year(), from.month()));
            if candidate <= from {
                let (year, month) = if from.month() == 12 {
                    (from.year() + 1, 1)
                } else {
                    (from.year(), from.month() + 1)
                };
                candidate = at_settlement_hour(last_day_of_month(year, month));
            }
            candidate
        }
    }
}

/// Fractional days from `from` to `target`, floored at zero.
pub fn days_until(target: DateTime<Utc>, from: DateTime<Utc>) -> f64 {
    ((target - from).num_seconds() as f64 / 86_400.0).max(0.0)
}

/// Project a model's ci forward under a constant vote accumulation rate:
/// `ci * sqrt(votes_now / votes_projected)`.
pub fn project_ci(current_ci: f64, current_votes: u64, votes_per_day: f64, days_ahead: f64) -> f64 {
    if current_votes == 0 || current_ci <= 0.0 || days_ahead <= 0.0 {
        return current_ci;
    }
    let projected_votes = current_votes as f64 + votes_per_day * days_ahead;
    if projected_votes <= current_votes as f64 {
        return current_ci;
    }
    current_ci * (current_votes as f64 / projected_votes).sqrt()
}

/// Score, ci, and vote-rate inputs for one side of a projection.
#[derive(Debug, Clone, Copy)]
pub struct ModelStats {
    pub score: f64,
    pub ci: f64,
    pub votes: u64,
    pub votes_per_day: f64,
}

/// Overtake probability now and at a future date, with the projected CIs.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ProjectionPoint {
    pub prob_now: f64,
    pub prob_at_settlement: f64,
    pub days_ahead: f64,
    pub proj_ci_leader: f64,
    pub proj_ci_challenger: f64,
}

/// Project the overtake probability to `days_ahead` from now. The score
/// gap is held constant; only the CIs shrink.
pub fn projected_overtake_at_date(
    leader: ModelStats,
    challenger: ModelStats,
    days_ahead: f64,
) -> ProjectionPoint {
    let prob_now = overtake_probability(leader.score, leader.ci, challenger.score, challenger.ci);
    let proj_ci_leader = project_ci(leader.ci, leader.votes, leader.votes_per_day, days_ahead);
    let proj_ci_challenger = project_ci(
        challenger.ci,
        challenger.votes,
        challenger.votes_per_day,
        days_ahead,
    );
    let prob_at_settlement = overtake_probability(
        leader.score,
        proj_ci_leader,
        challenger.score,
        proj_ci_challenger,
    );
    ProjectionPoint {
        prob_now,
        prob_at_settlement,
        days_ahead,
        proj_ci_leader,
        proj_ci_challenger,
    }
}

/// Scan forward in quarter-day steps until the overtake probability drops
/// below 5%, i.e. the ranking has effectively locked in. `None` when it
/// stays live beyond a year.
pub fn time_to_resolution(leader: ModelStats, challenger: ModelStats) -> Option<f64> {
    const MAX_DAYS: f64 = 365.0;
    const STEP: f64 = 0.25;

    if overtake_probability(leader.score, leader.ci, challenger.score, challenger.ci)
        < LOCK_THRESHOLD
    {
        return Some(0.0);
    }
    let mut days = STEP;
    while days <= MAX_DAYS {
        let point = projected_overtake_at_date(leader, challenger, days);
        if point.prob_at_settlement < LOCK_THRESHOLD {
            return Some(days);
        }
        days += STEP;
    }
    None
}

/// Votes-per-day for each named model, from one pass over the time
/// series. Models without two observations inside the lookback window
/// rate 0.0.
pub fn bulk_vote_rates(
    timeseries: &[TimeseriesRecord],
    model_names: &HashSet<String>,
    lookback_days: f64,
    now: DateTime<Utc>,
) -> HashMap<String, f64> {
    let cutoff = now - Duration::seconds((lookback_days * 86_400.0) as i64);

    let mut earliest: HashMap<&str, (DateTime<Utc>, u64)> = HashMap::new();
    let mut latest: HashMap<&str, (DateTime<Utc>, u64)> = HashMap::new();

    for record in timeseries {
        if record.ts < cutoff {
            continue;
        }
        for m in &record.models {
            let Some(votes) = m.votes else { continue };
            if !model_names.contains(&m.name) {
                continue;
            }
            let entry = earliest.entry(&m.name).or_insert((record.ts, votes));
            if record.ts < entry.0 {
                *entry = (record.ts, votes);
            }
            let entry = latest.entry(&m.name).or_insert((record.ts, votes));
            if record.ts > entry.0 {
                *entry = (record.ts, votes);
            }
        }
    }

    model_names
        .iter()
        .map(|name| {
            let rate = match (earliest.get(name.as_str()), latest.get(name.as_str())) {
                (Some((t0, v0)), Some((t1, v1))) if t0 != t1 => {
                    let elapsed = ((*t1 - *t0).num_seconds() as f64 / 86_400.0).max(0.01);
                    ((*v1 as f64 - *v0 as f64) / elapsed).max(0.0)
                }
                _ => 0.0,
            };
            (name.clone(), rate)
        })
        .collect()
}

/// The leader's side of a settlement projection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectionLeader {
    pub model_name: String,
    pub score: i64,
    pub ci: u32,
    pub votes: u64,
    pub votes_per_day: f64,
    pub organization: String,
    /// Leader's ci projected to the settlement date.
    pub proj_ci: f64,
}

/// One challenger's projected chance at the settlement date.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelProjection {
    pub model_name: String,
    pub rank: u32,
    pub score: i64,
    pub ci: u32,
    pub votes: u64,
    pub votes_per_day: f64,
    pub organization: String,
    pub prob_now: f64,
    pub prob_at_settlement: f64,
    pub proj_ci: f64,
    /// Days until the overtake chance drops below 5%; `None` if it stays
    /// live beyond a year.
    pub days_to_lock: Option<f64>,
}

/// Max settlement-date overtake risk per organization (excluding the
/// leader's own).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrgProjection {
    pub organization: String,
    pub max_overtake_prob: f64,
}

/// Projections for one cadence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectionReport {
    pub cadence: Cadence,
    pub settlement_date: DateTime<Utc>,
    /// Short display form, e.g. "Sat Feb 21".
    pub settlement_label: String,
    pub days_remaining: f64,
    pub leader: Option<ProjectionLeader>,
    pub projections: Vec<ModelProjection>,
    pub org_projections: Vec<OrgProjection>,
}

/// Weekly and monthly projections side by side.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectionsByCadence {
    pub weekly: ProjectionReport,
    pub monthly: ProjectionReport,
}

/// Compute projected overtake probabilities at the next settlement date
/// of `cadence` for the snapshot's top `top_n` models.
pub fn compute_settlement_projections(
    snapshot: &Snapshot,
    timeseries: &[TimeseriesRecord],
    cadence: Cadence,
    top_n: usize,
    rate_lookback_days: f64,
    now: DateTime<Utc>,
) -> ProjectionReport {
    let settlement_date = next_settlement_date(cadence, now);
    let remaining = days_until(settlement_date, now);
    let mut report = ProjectionReport {
        cadence,
        settlement_date,
        settlement_label: settlement_date.format("%a %b %d").to_string(),
        days_remaining: remaining,
        leader: None,
        projections: Vec::new(),
        org_projections: Vec::new(),
    };

    let Some(leader) = snapshot.models.first() else {
        return report;
    };

    let model_names: HashSet<String> = snapshot
        .models
        .iter()
        .take(top_n)
        .map(|m| m.model_name.clone())
        .collect();
    let rates = bulk_vote_rates(timeseries, &model_names, rate_lookback_days, now);
    let rate_of = |name: &str| rates.get(name).copied().unwrap_or(0.0);

    let leader_stats = ModelStats {
        score: leader.score as f64,
        ci: leader.ci as f64,
        votes: leader.votes,
        votes_per_day: rate_of(&leader.model_name),
    };

    for m in snapshot.models.iter().take(top_n).skip(1) {
        let stats = ModelStats {
            score: m.score as f64,
            ci: m.ci as f64,
            votes: m.votes,
            votes_per_day: rate_of(&m.model_name),
        };
        let point = projected_overtake_at_date(leader_stats, stats, remaining);
        report.projections.push(ModelProjection {
            model_name: m.model_name.clone(),
            rank: m.rank,
            score: m.score,
            ci: m.ci,
            votes: m.votes,
            votes_per_day: stats.votes_per_day,
            organization: m.organization.clone(),
            prob_now: point.prob_now,
            prob_at_settlement: point.prob_at_settlement,
            proj_ci: point.proj_ci_challenger,
            days_to_lock: time_to_resolution(leader_stats, stats),
        });
    }

    let mut org_probs: HashMap<&str, f64> = HashMap::new();
    for p in &report.projections {
        if p.organization.is_empty() || p.organization == leader.organization {
            continue;
        }
        let entry = org_probs.entry(p.organization.as_str()).or_insert(0.0);
        *entry = entry.max(p.prob_at_settlement);
    }
    let mut org_projections: Vec<OrgProjection> = org_probs
        .into_iter()
        .map(|(organization, max_overtake_prob)| OrgProjection {
            organization: organization.to_string(),
            max_overtake_prob,
        })
        .collect();
    org_projections.sort_by(|a, b| {
        b.max_overtake_prob
            .total_cmp(&a.max_overtake_prob)
            .then_with(|| a.organization.cmp(&b.organization))
    });
    report.org_projections = org_projections;

    report.leader = Some(ProjectionLeader {
        model_name: leader.model_name.clone(),
        score: leader.score,
        ci: leader.ci,
        votes: leader.votes,
        votes_per_day: leader_stats.votes_per_day,
        organization: leader.organization.clone(),
        proj_ci: project_ci(
            leader_stats.ci,
            leader_stats.votes,
            leader_stats.votes_per_day,
            remaining,
        ),
    });

    report
}

/// Both cadences at once, the shape stored on enriched snapshots.
pub fn compute_all_projections(
    snapshot: &Snapshot,
    timeseries: &[TimeseriesRecord],
    top_n: usize,
    rate_lookback_days: f64,
    now: DateTime<Utc>,
) -> ProjectionsByCadence {
    ProjectionsByCadence {
        weekly: compute_settlement_projections(
            snapshot,
            timeseries,
            Cadence::Weekly,
            top_n,
            rate_lookback_days,
            now,
        ),
        monthly: compute_settlement_projections(
            snapshot,
            timeseries,
            Cadence::Monthly,
            top_n,
            rate_lookback_days,
            now,
        ),
    }
}
