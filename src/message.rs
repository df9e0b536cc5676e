//! Rendering change-sets and snapshots into Discord notification text.
//!
//! All formatting is pure string assembly; delivery lives in
//! [`crate::notify`]. Every message is bounded to the Discord length
//! limit with a "see URL" suffix when truncated.

use chrono::{DateTime, Utc};

use crate::fingerprint::short;
use crate::overtake::{HeadToHeadReport, OvertakeReport};
use crate::projections::{ProjectionReport, ProjectionsByCadence};
use crate::types::{ChangeSet, Snapshot};
use crate::MAX_DISCORD_MESSAGE_LENGTH;

/// Rank cutoff for the "top contenders" score section.
const CONTENTION_CUTOFF: u32 = 5;

/// CI deltas smaller than this are noise, not news.
const NOTABLE_CI_DELTA: i64 = 2;

fn sign(n: i64) -> String {
    if n > 0 {
        format!("+{n}")
    } else {
        n.to_string()
    }
}

fn fmt_prob(prob: f64) -> String {
    if prob < 0.0001 {
        "<0.01%".to_string()
    } else if prob >= 0.9999 {
        ">99.99%".to_string()
    } else {
        format!("{:.1}%", prob * 100.0)
    }
}

fn truncate(message: String, url: &str) -> String {
    if message.len() <= MAX_DISCORD_MESSAGE_LENGTH {
        return message;
    }
    let suffix = format!("\n… (truncated; see {url})");
    let allowed = MAX_DISCORD_MESSAGE_LENGTH.saturating_sub(suffix.len());
    let mut cut = allowed;
    while cut > 0 && !message.is_char_boundary(cut) {
        cut -= 1;
    }
    format!("{}{suffix}", message[..cut].trim_end())
}

/// Rich notification for a structured diff. Rank-UB changes lead because
/// they settle contracts; everything else is ordered by how much a reader
/// scanning the channel cares.
pub fn format_diff_message(
    diff: &ChangeSet,
    url: &str,
    top_n: usize,
    overtake: Option<&OvertakeReport>,
    projections: Option<&ProjectionsByCadence>,
) -> String {
    let mut sections: Vec<String> = vec!["**Arena Leaderboard Update**".to_string()];

    if diff.metadata_changed {
        sections.push(format!(
            "Leaderboard refreshed: {} → {}",
            diff.previous_date.as_deref().unwrap_or("?"),
            diff.current_date.as_deref().unwrap_or("?"),
        ));
    }

    let ub_changes: Vec<_> = diff.changed.iter().filter(|c| c.rank_ub.is_some()).collect();
    if !ub_changes.is_empty() {
        sections.push(String::new());
        sections.push("**⚠ RANK UB CHANGES (Settlement-Critical):**".to_string());
        for change in ub_changes {
            let ub = change.rank_ub.unwrap();
            let delta = i64::from(ub.to) - i64::from(ub.from);
            let arrow = if delta < 0 { "↑" } else { "↓" };
            sections.push(format!(
                "  {arrow} {}: Rank UB {} → {} ({})",
                change.model_name,
                ub.from,
                ub.to,
                sign(delta)
            ));
        }
    }

    if !diff.added.is_empty() {
        sections.push(String::new());
        sections.push("**New Models:**".to_string());
        for m in diff.added.iter().take(top_n) {
            let mut parts = vec![format!("  #{} {}", m.rank, m.model_name)];
            parts.push(format!("score {}", m.score));
            if m.is_preliminary {
                parts.push("[Preliminary]".to_string());
            }
            sections.push(parts.join(" — "));
        }
        if diff.added.len() > top_n {
            sections.push(format!("  … and {} more", diff.added.len() - top_n));
        }
    }

    if !diff.removed.is_empty() {
        sections.push(String::new());
        sections.push("**Models Removed:**".to_string());
        for m in diff.removed.iter().take(top_n) {
            sections.push(format!("  {} (was #{})", m.model_name, m.rank));
        }
        if diff.removed.len() > top_n {
            sections.push(format!("  … and {} more", diff.removed.len() - top_n));
        }
    }

    let mut rank_changes: Vec<_> = diff
        .changed
        .iter()
        .filter_map(|c| c.rank.map(|r| (c, r)))
        .filter(|(_, r)| r.from <= top_n as u32 || r.to <= top_n as u32)
        .collect();
    rank_changes.sort_by_key(|(_, r)| r.to);
    if !rank_changes.is_empty() {
        sections.push(String::new());
        sections.push(format!("**Rank Changes (Top {top_n}):**"));
        for (change, rank) in rank_changes.iter().take(top_n) {
            let delta = i64::from(rank.to) - i64::from(rank.from);
            let arrow = if delta < 0 { "↑" } else { "↓" };
            sections.push(format!(
                "  {arrow} {}: #{} → #{} ({})",
                change.model_name,
                rank.from,
                rank.to,
                sign(-delta)
            ));
        }
    }

    let mut contention: Vec<_> = diff
        .changed
        .iter()
        .filter_map(|c| c.score.map(|s| (c, s)))
        .filter(|(c, _)| c.current_rank <= CONTENTION_CUTOFF)
        .collect();
    contention.sort_by_key(|(c, _)| c.current_rank);
    if !contention.is_empty() {
        sections.push(String::new());
        sections.push("**Score Changes (Top Contenders):**".to_string());
        for (change, score) in contention {
            sections.push(format!(
                "  {}: {} → {} ({})",
                change.model_name,
                score.from,
                score.to,
                sign(score.delta)
            ));
        }
    }

    let notable_ci: Vec<_> = diff
        .changed
        .iter()
        .filter_map(|c| c.ci.map(|ci| (c, ci)))
        .filter(|(_, ci)| (i64::from(ci.to) - i64::from(ci.from)).abs() >= NOTABLE_CI_DELTA)
        .take(5)
        .collect();
    if !notable_ci.is_empty() {
        sections.push(String::new());
        sections.push("**CI Changes (notable):**".to_string());
        for (change, ci) in notable_ci {
            let direction = if ci.to < ci.from { "narrowed" } else { "widened" };
            sections.push(format!(
                "  {}: ±{} → ±{} ({direction})",
                change.model_name, ci.from, ci.to
            ));
        }
    }

    let prelim_changes: Vec<_> = diff
        .changed
        .iter()
        .filter_map(|c| c.is_preliminary.map(|p| (c, p)))
        .collect();
    if !prelim_changes.is_empty() {
        sections.push(String::new());
        sections.push("**Preliminary Status:**".to_string());
        for (change, flip) in prelim_changes {
            let status = if flip.to {
                "now Preliminary"
            } else {
                "no longer Preliminary"
            };
            sections.push(format!("  {} → {status}", change.model_name));
        }
    }

    let total_new_votes: i64 = diff
        .changed
        .iter()
        .filter_map(|c| c.votes.map(|v| v.delta))
        .sum();
    if total_new_votes > 0 {
        sections.push(String::new());
        sections.push(format!(
            "Total new votes across all tracked models: +{total_new_votes}"
        ));
    }

    if let Some(overtake) = overtake {
        let section = format_overtake_section(overtake);
        if !section.is_empty() {
            sections.push(section);
        }
    }
    if let Some(projections) = projections {
        let section = format_all_projections(projections);
        if !section.is_empty() {
            sections.push(section);
        }
    }

    truncate(sections.join("\n"), url)
}

/// One-line change summary for logs.
pub fn diff_summary(diff: &ChangeSet) -> String {
    let mut parts: Vec<String> = Vec::new();
    let count = |n: usize, label: &str, parts: &mut Vec<String>| {
        if n > 0 {
            parts.push(format!("{n} {label}"));
        }
    };
    count(diff.added.len(), "new", &mut parts);
    count(diff.removed.len(), "removed", &mut parts);
    let field_count = |f: fn(&crate::types::ModelChange) -> bool| -> usize {
        diff.changed.iter().filter(|c| f(c)).count()
    };
    count(field_count(|c| c.rank.is_some()), "rank Δ", &mut parts);
    count(field_count(|c| c.rank_ub.is_some()), "rank UB Δ", &mut parts);
    count(field_count(|c| c.score.is_some()), "score Δ", &mut parts);
    count(field_count(|c| c.ci.is_some()), "CI Δ", &mut parts);
    count(field_count(|c| c.votes.is_some()), "vote Δ", &mut parts);
    count(
        field_count(|c| c.is_preliminary.is_some()),
        "prelim Δ",
        &mut parts,
    );
    if diff.metadata_changed {
        parts.push("date refreshed".to_string());
    }
    if parts.is_empty() {
        "no changes".to_string()
    } else {
        parts.join(", ")
    }
}

/// Overtake probabilities as a message section, or empty when there is
/// nothing to report.
pub fn format_overtake_section(report: &OvertakeReport) -> String {
    let Some(leader) = &report.leader else {
        return String::new();
    };
    if report.overtake_probabilities.is_empty() {
        return String::new();
    }

    const MAX_LINES: usize = 5;
    const THRESHOLD: f64 = 0.0001;

    let mut lines = vec![format!(
        "\n**Overtake Probabilities (vs #1 {}):**",
        leader.model_name
    )];
    let mut shown = 0;
    let mut below = 0;
    for entry in &report.overtake_probabilities {
        if entry.overtake_prob < THRESHOLD || shown >= MAX_LINES {
            below += 1;
            continue;
        }
        let fair_no = entry.fair_no_price_cents;
        let fair_no = if fair_no >= 1.0 {
            format!("{fair_no:.0}")
        } else {
            format!("{fair_no:.1}")
        };
        let mut line = format!(
            "  #{} {}: {} (fair No: {fair_no}¢)",
            entry.rank,
            entry.model_name,
            fmt_prob(entry.overtake_prob)
        );
        if entry.is_preliminary {
            line.push_str(" ⚠️ Preliminary");
        }
        lines.push(line);
        shown += 1;
    }
    if below > 0 {
        lines.push("  All others: <0.01%".to_string());
    }
    lines.join("\n")
}

/// Head-to-head win rates as a message section.
pub fn format_h2h_section(report: &HeadToHeadReport) -> String {
    let Some(leader) = &report.leader else {
        return String::new();
    };
    if report.matchups.is_empty() {
        return String::new();
    }

    let mut lines = vec![format!("\n**Head-to-Head Win Rates (vs #1 {leader}):**")];
    for m in &report.matchups {
        let marker = if m.win_rate_vs_leader > 0.5 { " ↑" } else { "" };
        lines.push(format!(
            "  #{} {}: {:.1}%{marker} ({}pt)",
            m.rank,
            m.model_name,
            m.win_rate_vs_leader * 100.0,
            sign(m.score_gap)
        ));
    }
    lines.join("\n")
}

/// One cadence's settlement projections as a message section.
pub fn format_projections_section(report: &ProjectionReport) -> String {
    let Some(leader) = &report.leader else {
        return String::new();
    };
    if report.projections.is_empty() {
        return String::new();
    }

    const MAX_LINES: usize = 5;
    const THRESHOLD: f64 = 0.0001;

    let mut lines = vec![format!(
        "\n**{} Settlement Projections ({}, {:.1}d):**",
        report.cadence.label(),
        report.settlement_label,
        report.days_remaining
    )];

    if leader.ci > 0 && leader.proj_ci < f64::from(leader.ci) {
        lines.push(format!(
            "  #1 {}: CI ±{} → ±{:.1} ({:.0} votes/day)",
            leader.model_name, leader.ci, leader.proj_ci, leader.votes_per_day
        ));
    }

    let mut shown = 0;
    let mut below = 0;
    for entry in &report.projections {
        if (entry.prob_now < THRESHOLD && entry.prob_at_settlement < THRESHOLD)
            || shown >= MAX_LINES
        {
            below += 1;
            continue;
        }
        let lock = match entry.days_to_lock {
            Some(days) if days > 0.0 => format!(" | locks in ~{days:.0}d"),
            _ => String::new(),
        };
        lines.push(format!(
            "  #{} {}: {} now → {} at settlement ({:.0} v/d{lock})",
            entry.rank,
            entry.model_name,
            fmt_prob(entry.prob_now),
            fmt_prob(entry.prob_at_settlement),
            entry.votes_per_day
        ));
        shown += 1;
    }
    if below > 0 {
        lines.push("  All others: <0.01%".to_string());
    }

    let notable_orgs: Vec<_> = report
        .org_projections
        .iter()
        .filter(|o| o.max_overtake_prob >= THRESHOLD)
        .take(4)
        .collect();
    if !notable_orgs.is_empty() {
        let leader_org = if leader.organization.is_empty() {
            "?"
        } else {
            &leader.organization
        };
        let orgs = notable_orgs
            .iter()
            .map(|o| format!("{} {}", o.organization, fmt_prob(o.max_overtake_prob)))
            .collect::<Vec<_>>()
            .join(", ");
        lines.push(format!("  **Org risk (vs {leader_org}):** {orgs}"));
    }

    lines.join("\n")
}

/// Weekly and monthly projections, whichever have content.
pub fn format_all_projections(projections: &ProjectionsByCadence) -> String {
    [&projections.weekly, &projections.monthly]
        .into_iter()
        .map(format_projections_section)
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

/// Message for a change with no prior structured snapshot to diff
/// against: list the current top models so the notification still says
/// something.
pub fn format_snapshot_message(
    snapshot: &Snapshot,
    url: &str,
    old_hash: Option<&str>,
    new_hash: Option<&str>,
    top_n: usize,
) -> String {
    let mut sections: Vec<String> = vec!["**Arena Leaderboard Update**".to_string()];

    if let Some(date) = &snapshot.meta.leaderboard_date {
        sections.push(format!("Leaderboard date: {date}"));
    }
    if let Some(total_votes) = snapshot.meta.total_votes {
        sections.push(format!("Total votes: {total_votes}"));
    }
    let total_models = snapshot
        .meta
        .total_models
        .unwrap_or(snapshot.models.len() as u64);
    sections.push(format!("Total models tracked: {total_models}"));

    if !snapshot.models.is_empty() {
        sections.push(String::new());
        sections.push(format!(
            "**Current Top {}:**",
            top_n.min(snapshot.models.len())
        ));
        for m in snapshot.models.iter().take(top_n) {
            let mut parts = vec![format!("  #{} {}", m.rank, m.model_name)];
            parts.push(format!("score {}", m.score));
            if m.is_preliminary {
                parts.push("[Preliminary]".to_string());
            }
            sections.push(parts.join(" — "));
        }
    }

    if let Some(overtake) = &snapshot.overtake {
        let section = format_overtake_section(overtake);
        if !section.is_empty() {
            sections.push(section);
        }
    }
    if let Some(h2h) = &snapshot.h2h {
        let section = format_h2h_section(h2h);
        if !section.is_empty() {
            sections.push(section);
        }
    }
    if let Some(projections) = &snapshot.projections {
        let section = format_all_projections(projections);
        if !section.is_empty() {
            sections.push(section);
        }
    }

    if old_hash.is_some() || new_hash.is_some() {
        sections.push(String::new());
        if let Some(hash) = old_hash {
            sections.push(format!("Previous fingerprint: {}", short(hash)));
        }
        if let Some(hash) = new_hash {
            sections.push(format!("New fingerprint: {}", short(hash)));
        }
    }

    sections.push(String::new());
    sections.push("(No prior structured snapshot for detailed diff.)".to_string());

    truncate(sections.join("\n"), url)
}

/// Degraded message when structured parsing is unavailable: the change is
/// real (the fingerprint moved), the details are not.
pub fn format_fingerprint_message(
    url: &str,
    old_hash: Option<&str>,
    new_hash: &str,
    checked_at: DateTime<Utc>,
) -> String {
    let old_display = old_hash.map(short).unwrap_or("(none)");
    let message = format!(
        "🔔 Arena leaderboard update detected.\n\
         URL: {url}\n\
         Previous fingerprint: {old_display}\n\
         New fingerprint: {}\n\
         Checked at: {}\n\
         (Model snapshot data unavailable for detailed comparison.)",
        short(new_hash),
        checked_at.format("%Y-%m-%d %H:%M:%S UTC"),
    );
    truncate(message, url)
}

/// Force-send acknowledgement when nothing actually changed.
pub fn format_force_send_message(
    url: &str,
    existing_hash: Option<&str>,
    checked_at: DateTime<Utc>,
) -> String {
    let hash_display = existing_hash.map(short).unwrap_or("(none)");
    let message = format!(
        "🔔 Arena leaderboard force-send test.\n\
         URL: {url}\n\
         No leaderboard change was detected for this check.\n\
         Current fingerprint: {hash_display}\n\
         Checked at: {}",
        checked_at.format("%Y-%m-%d %H:%M:%S UTC"),
    );
    truncate(message, url)
}
