//! Overtake probabilities between models, for pricing settlement
//! contracts on the #1 spot.
//!
//! Each score is modeled as N(mu, sigma^2) with sigma = ci / 1.96 (the
//! reported ci is a 95% interval). The probability that a challenger's
//! true strength exceeds the leader's is the normal survival function of
//! the score gap over the combined sigma.

use serde::{Deserialize, Serialize};

use crate::types::Snapshot;

/// 95% two-sided normal quantile.
const CI_Z: f64 = 1.96;

/// Bradley-Terry / Elo scale: 400 points = 10x odds.
const ELO_SCALE: f64 = 400.0;

/// Complementary error function, Chebyshev-fitted rational approximation
/// (fractional error below 1.2e-7 everywhere).
fn erfc(x: f64) -> f64 {
    let z = x.abs();
    let t = 1.0 / (1.0 + 0.5 * z);
    let ans = t
        * (-z * z - 1.26551223
            + t * (1.00002368
                + t * (0.37409196
                    + t * (0.09678418
                        + t * (-0.18628806
                            + t * (0.27886807
                                + t * (-1.13520398
                                    + t * (1.48851587
                                        + t * (-0.82215223 + t * 0.17087277)))))))))
            .exp();
    if x >= 0.0 { ans } else { 2.0 - ans }
}

/// Survival function of the standard normal: P(Z > z).
fn normal_sf(z: f64) -> f64 {
    0.5 * erfc(z / std::f64::consts::SQRT_2)
}

/// Probability that model B's true strength exceeds model A's.
///
/// Deterministic when both CIs are zero: 1, 0, or 0.5 depending on the
/// sign of the gap.
pub fn overtake_probability(score_a: f64, ci_a: f64, score_b: f64, ci_b: f64) -> f64 {
    let sigma_a = ci_a / CI_Z;
    let sigma_b = ci_b / CI_Z;
    let sigma_diff = (sigma_a * sigma_a + sigma_b * sigma_b).sqrt();

    let gap = score_a - score_b;
    if sigma_diff == 0.0 {
        return if gap < 0.0 {
            1.0
        } else if gap > 0.0 {
            0.0
        } else {
            0.5
        };
    }
    normal_sf(gap / sigma_diff)
}

/// Overtake probability after both models collect more votes.
///
/// CIs shrink as 1/sqrt(n); a multiplier of 2.0 means votes double. The
/// score gap is held constant, which keeps the estimate conservative.
pub fn projected_overtake_probability(
    score_a: f64,
    ci_a: f64,
    score_b: f64,
    ci_b: f64,
    future_votes_multiplier: f64,
) -> f64 {
    assert!(
        future_votes_multiplier > 0.0,
        "future_votes_multiplier must be positive"
    );
    let shrink = 1.0 / future_votes_multiplier.sqrt();
    overtake_probability(score_a, ci_a * shrink, score_b, ci_b * shrink)
}

/// Predicted probability that model A beats model B in a single battle:
/// `1 / (1 + 10^((score_b - score_a) / 400))`.
pub fn head_to_head_win_rate(score_a: f64, score_b: f64) -> f64 {
    1.0 / (1.0 + 10f64.powf((score_b - score_a) / ELO_SCALE))
}

/// The current leader, as seen by the overtake analysis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LeaderInfo {
    pub model_name: String,
    pub score: i64,
    pub ci: u32,
    /// 1 minus the strongest challenger's overtake probability.
    pub prob_staying_1: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rank_ub: Option<u32>,
}

/// One challenger's chance of overtaking the leader.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OvertakeEntry {
    pub model_name: String,
    pub rank: u32,
    pub score: i64,
    pub ci: u32,
    pub score_gap: i64,
    pub overtake_prob: f64,
    /// Fair price in cents of a "No, won't overtake" contract.
    pub fair_no_price_cents: f64,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub is_preliminary: bool,
}

/// Overtake probabilities for the top models vs the current #1.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OvertakeReport {
    pub leader: Option<LeaderInfo>,
    pub overtake_probabilities: Vec<OvertakeEntry>,
}

/// Compute overtake probabilities for the top `top_n` models against the
/// snapshot's leader (the first record, which is rank order).
pub fn compute_overtake_report(snapshot: &Snapshot, top_n: usize) -> OvertakeReport {
    let Some(leader) = snapshot.models.first() else {
        return OvertakeReport {
            leader: None,
            overtake_probabilities: Vec::new(),
        };
    };

    let mut entries = Vec::new();
    for m in snapshot.models.iter().take(top_n).skip(1) {
        let prob = overtake_probability(
            leader.score as f64,
            leader.ci as f64,
            m.score as f64,
            m.ci as f64,
        );
        entries.push(OvertakeEntry {
            model_name: m.model_name.clone(),
            rank: m.rank,
            score: m.score,
            ci: m.ci,
            score_gap: leader.score - m.score,
            overtake_prob: prob,
            fair_no_price_cents: (1.0 - prob) * 100.0,
            is_preliminary: m.is_preliminary,
        });
    }

    let prob_staying_1 = entries.first().map_or(1.0, |e| 1.0 - e.overtake_prob);

    OvertakeReport {
        leader: Some(LeaderInfo {
            model_name: leader.model_name.clone(),
            score: leader.score,
            ci: leader.ci,
            prob_staying_1,
            rank_ub: Some(leader.rank_ub),
        }),
        overtake_probabilities: entries,
    }
}

/// One challenger's predicted single-battle win rate against the leader.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Matchup {
    pub model_name: String,
    pub rank: u32,
    pub score: i64,
    pub win_rate_vs_leader: f64,
    pub score_gap: i64,
}

/// Head-to-head win rates of the top challengers vs the leader.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HeadToHeadReport {
    pub leader: Option<String>,
    pub matchups: Vec<Matchup>,
}

pub fn compute_h2h_report(snapshot: &Snapshot, top_n: usize) -> HeadToHeadReport {
    let Some(leader) = snapshot.models.first() else {
        return HeadToHeadReport {
            leader: None,
            matchups: Vec::new(),
        };
    };

    let matchups = snapshot
        .models
        .iter()
        .take(top_n)
        .skip(1)
        .map(|m| Matchup {
            model_name: m.model_name.clone(),
            rank: m.rank,
            score: m.score,
            win_rate_vs_leader: head_to_head_win_rate(m.score as f64, leader.score as f64),
            score_gap: leader.score - m.score,
        })
        .collect();

    HeadToHeadReport {
        leader: Some(leader.model_name.clone()),
        matchups,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ModelRecord, PageMeta};
    use chrono::{TimeZone, Utc};

    fn close(a: f64, b: f64, eps: f64) -> bool {
        (a - b).abs() < eps
    }

    #[test]
    fn zero_gap_is_a_coin_flip() {
        assert!(close(overtake_probability(1500.0, 10.0, 1500.0, 10.0), 0.5, 1e-9));
    }

    #[test]
    fn deterministic_when_both_cis_zero() {
        assert_eq!(overtake_probability(1500.0, 0.0, 1490.0, 0.0), 0.0);
        assert_eq!(overtake_probability(1490.0, 0.0, 1500.0, 0.0), 1.0);
        assert_eq!(overtake_probability(1500.0, 0.0, 1500.0, 0.0), 0.5);
    }

    #[test]
    fn known_normal_quantile() {
        // Gap equal to the combined 95% interval: z = 1.96, SF ~ 0.025.
        let sigma = (2.0f64).sqrt() * (10.0 / 1.96);
        let gap = 1.96 * sigma;
        let p = overtake_probability(1500.0 + gap, 10.0, 1500.0, 10.0);
        assert!(close(p, 0.025, 1e-4), "got {p}");
    }

    #[test]
    fn wider_ci_means_more_uncertainty() {
        let narrow = overtake_probability(1500.0, 5.0, 1490.0, 5.0);
        let wide = overtake_probability(1500.0, 20.0, 1490.0, 20.0);
        assert!(wide > narrow);
        assert!(narrow > 0.0 && wide < 0.5);
    }

    #[test]
    fn probability_is_monotonic_in_gap() {
        let mut last = 1.0;
        for gap in 0..20 {
            let p = overtake_probability(1500.0 + gap as f64, 8.0, 1500.0, 8.0);
            assert!(p <= last);
            last = p;
        }
    }

    #[test]
    fn more_votes_sharpen_the_verdict() {
        // Leader ahead: doubling votes shrinks CIs and the challenger's
        // chance drops.
        let now = overtake_probability(1500.0, 10.0, 1492.0, 10.0);
        let later = projected_overtake_probability(1500.0, 10.0, 1492.0, 10.0, 2.0);
        assert!(later < now);
    }

    #[test]
    fn elo_win_rate_reference_points() {
        assert!(close(head_to_head_win_rate(1500.0, 1500.0), 0.5, 1e-9));
        // 400 points ahead = 10:1 odds.
        assert!(close(head_to_head_win_rate(1900.0, 1500.0), 10.0 / 11.0, 1e-9));
        let p = head_to_head_win_rate(1500.0, 1900.0);
        assert!(close(p, 1.0 / 11.0, 1e-9));
    }

    fn snapshot(models: Vec<ModelRecord>) -> Snapshot {
        Snapshot::new(
            Utc.with_ymd_and_hms(2026, 2, 15, 0, 0, 0).unwrap(),
            PageMeta::default(),
            models,
        )
    }

    fn model(name: &str, rank: u32, score: i64, ci: u32) -> ModelRecord {
        ModelRecord {
            rank,
            rank_ub: rank,
            rank_lb: rank,
            rank_spread_raw: String::new(),
            model_name: name.to_string(),
            organization: String::new(),
            license: String::new(),
            score,
            ci,
            votes: 1000,
            is_preliminary: false,
            model_url: String::new(),
        }
    }

    #[test]
    fn report_ranks_challengers_against_leader() {
        let snap = snapshot(vec![
            model("leader", 1, 1500, 8),
            model("close-second", 2, 1496, 8),
            model("distant", 3, 1400, 8),
        ]);
        let report = compute_overtake_report(&snap, 20);
        let leader = report.leader.unwrap();
        assert_eq!(leader.model_name, "leader");
        assert_eq!(report.overtake_probabilities.len(), 2);

        let second = &report.overtake_probabilities[0];
        assert_eq!(second.score_gap, 4);
        assert!(second.overtake_prob > 0.2 && second.overtake_prob < 0.5);
        assert!(close(
            second.fair_no_price_cents,
            (1.0 - second.overtake_prob) * 100.0,
            1e-9
        ));
        assert!(close(
            leader.prob_staying_1,
            1.0 - second.overtake_prob,
            1e-9
        ));

        let distant = &report.overtake_probabilities[1];
        assert!(distant.overtake_prob < 1e-6);
    }

    #[test]
    fn empty_snapshot_yields_no_leader() {
        let report = compute_overtake_report(&snapshot(vec![]), 20);
        assert!(report.leader.is_none());
        assert!(report.overtake_probabilities.is_empty());
    }

    #[test]
    fn h2h_report_covers_top_n() {
        let snap = snapshot(vec![
            model("leader", 1, 1500, 8),
            model("second", 2, 1490, 8),
            model("third", 3, 1480, 8),
        ]);
        let report = compute_h2h_report(&snap, 2);
        assert_eq!(report.leader.as_deref(), Some("leader"));
        assert_eq!(report.matchups.len(), 1);
        let m = &report.matchups[0];
        assert_eq!(m.model_name, "second");
        assert!(m.win_rate_vs_leader < 0.5);
        assert_eq!(m.score_gap, 10);
    }
}
