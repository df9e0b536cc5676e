//! End-to-end: raw HTML through the parser, differ, and formatter.

use chrono::{TimeZone, Utc};

use arena_watch::diff::{compute_diff, is_significant_default};
use arena_watch::message::{diff_summary, format_diff_message};
use arena_watch::parser::parse_html;

const URL: &str = "https://arena.ai/leaderboard/text/overall-no-style-control";

const PAGE_V1: &str = r#"
<html><body>
<div>Feb 11, 2026 · 5,271,984 votes · 305 models</div>
<table>
  <tr><th>Rank</th><th>Rank Spread</th><th>Model</th><th>Score</th><th>Votes</th></tr>
  <tr>
    <td>1</td><td>12</td>
    <td><a href="https://example.com/gpt-x">gpt-x</a> OpenAI · Proprietary</td>
    <td>1500±8</td><td>2,000</td>
  </tr>
  <tr>
    <td>2</td><td>13</td>
    <td><a href="https://example.com/claude-y">claude-y</a> Anthropic · Proprietary</td>
    <td>1480±10</td><td>1,800</td>
  </tr>
</table>
</body></html>
"#;

const PAGE_V2: &str = r#"
<html><body>
<div>Feb 12, 2026 · 5,400,100 votes · 306 models</div>
<table>
  <tr><th>Rank</th><th>Rank Spread</th><th>Model</th><th>Score</th><th>Votes</th></tr>
  <tr>
    <td>1</td><td>11</td>
    <td><a href="https://example.com/gpt-x">gpt-x</a> OpenAI · Proprietary</td>
    <td>1502±7</td><td>2,400</td>
  </tr>
  <tr>
    <td>2</td><td>24</td>
    <td><a href="https://example.com/newcomer-z">newcomer-z</a> NewLab · Open</td>
    <td>1490±12 Preliminary</td><td>900</td>
  </tr>
  <tr>
    <td>3</td><td>24</td>
    <td><a href="https://example.com/claude-y">claude-y</a> Anthropic · Proprietary</td>
    <td>1480±10</td><td>1,900</td>
  </tr>
</table>
</body></html>
"#;

#[test]
fn three_row_table_with_numeric_only_row_parses_to_two_records() {
    let html = r#"
        <table>
          <tr><th>Rank</th><th>Model</th><th>Score</th><th>CI</th><th>Votes</th></tr>
          <tr><td>1</td><td>gpt-x</td><td>1500</td><td>8</td><td>2000</td></tr>
          <tr><td>2</td><td>claude-y</td><td>1480</td><td>10</td><td>1800</td></tr>
          <tr><td>3</td><td>42</td><td>1000</td><td>5</td><td>10</td></tr>
        </table>
    "#;
    let when = Utc.with_ymd_and_hms(2026, 2, 15, 0, 0, 0).unwrap();
    let outcome = parse_html(html, when).unwrap();
    let models = &outcome.snapshot.models;
    assert_eq!(models.len(), 2);
    assert_eq!(models[0].model_name, "gpt-x");
    assert_eq!(models[0].rank, 1);
    assert_eq!(models[1].model_name, "claude-y");
    assert_eq!(models[1].rank, 2);
}

#[test]
fn parse_diff_format_round_trip() {
    let t1 = Utc.with_ymd_and_hms(2026, 2, 15, 12, 0, 0).unwrap();
    let t2 = Utc.with_ymd_and_hms(2026, 2, 15, 18, 0, 0).unwrap();

    let prev = parse_html(PAGE_V1, t1).unwrap().snapshot;
    let curr = parse_html(PAGE_V2, t2).unwrap().snapshot;

    assert_eq!(prev.models.len(), 2);
    assert_eq!(curr.models.len(), 3);
    assert_eq!(prev.meta.total_votes, Some(5_271_984));
    assert_eq!(curr.meta.leaderboard_date.as_deref(), Some("Feb 12, 2026"));

    // Spread decoding through the full pipeline.
    assert_eq!((prev.models[0].rank_ub, prev.models[0].rank_lb), (1, 2));
    assert_eq!((curr.models[0].rank_ub, curr.models[0].rank_lb), (1, 1));
    assert_eq!((curr.models[2].rank_ub, curr.models[2].rank_lb), (2, 4));

    let diff = compute_diff(&prev, &curr);
    assert!(!diff.is_empty());
    assert!(is_significant_default(&diff));
    assert!(diff.metadata_changed);

    assert_eq!(diff.added.len(), 1);
    assert_eq!(diff.added[0].model_name, "newcomer-z");
    assert!(diff.added[0].is_preliminary);
    assert!(diff.removed.is_empty());

    // gpt-x: score 1500→1502, ci 8→7, votes 2000→2400, rank_ub 1→1 (no
    // change), rank unchanged.
    let gpt = diff
        .changed
        .iter()
        .find(|c| c.model_name == "gpt-x")
        .expect("gpt-x changed");
    assert_eq!(gpt.score.unwrap().delta, 2);
    assert_eq!(gpt.ci.map(|d| (d.from, d.to)), Some((8, 7)));
    assert_eq!(gpt.votes.unwrap().delta, 400);
    assert!(gpt.rank.is_none());
    assert!(gpt.rank_ub.is_none());

    // claude-y: rank 2→3, rank_ub 1→2, votes 1800→1900.
    let claude = diff
        .changed
        .iter()
        .find(|c| c.model_name == "claude-y")
        .expect("claude-y changed");
    assert_eq!(claude.rank.map(|d| (d.from, d.to)), Some((2, 3)));
    assert_eq!(claude.rank_ub.map(|d| (d.from, d.to)), Some((1, 2)));
    assert_eq!(claude.votes.unwrap().delta, 100);

    // Ordering follows the current snapshot: gpt-x before claude-y.
    assert_eq!(diff.changed[0].model_name, "gpt-x");
    assert_eq!(diff.changed[1].model_name, "claude-y");

    let summary = diff_summary(&diff);
    assert!(summary.contains("1 new"));
    assert!(summary.contains("rank UB"));
    assert!(summary.contains("date refreshed"));

    let msg = format_diff_message(&diff, URL, 10, None, None);
    assert!(msg.contains("Arena Leaderboard Update"));
    assert!(msg.contains("Leaderboard refreshed: Feb 11, 2026 → Feb 12, 2026"));
    assert!(msg.contains("RANK UB CHANGES"));
    assert!(msg.contains("claude-y: Rank UB 1 → 2"));
    assert!(msg.contains("New Models"));
    assert!(msg.contains("newcomer-z"));
    assert!(msg.contains("[Preliminary]"));
}

#[test]
fn identical_pages_diff_empty_after_reparse() {
    let when = Utc.with_ymd_and_hms(2026, 2, 15, 12, 0, 0).unwrap();
    let a = parse_html(PAGE_V1, when).unwrap().snapshot;
    let b = parse_html(PAGE_V1, when).unwrap().snapshot;
    assert_eq!(a, b);
    assert!(compute_diff(&a, &b).is_empty());
}
