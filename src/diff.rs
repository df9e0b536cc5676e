//! Semantic diff between two leaderboard snapshots, keyed by model name.

use std::collections::HashMap;

use crate::types::{ChangeSet, FieldDelta, ModelChange, ModelRecord, NumericDelta, Snapshot};
use crate::SIGNIFICANT_VOTES_TOP_N;

/// Compare two snapshots field by field.
///
/// Additions and per-field changes follow the current snapshot's record
/// order; removals follow the previous snapshot's order. Comparison is
/// exact equality; there is no tolerance on any field.
pub fn compute_diff(previous: &Snapshot, current: &Snapshot) -> ChangeSet {
    let prev_by_name: HashMap<&str, &ModelRecord> = previous
        .models
        .iter()
        .map(|m| (m.model_name.as_str(), m))
        .collect();
    let curr_by_name: HashMap<&str, &ModelRecord> = current
        .models
        .iter()
        .map(|m| (m.model_name.as_str(), m))
        .collect();

    let mut diff = ChangeSet {
        metadata_changed: previous.meta.leaderboard_date != current.meta.leaderboard_date,
        previous_date: previous.meta.leaderboard_date.clone(),
        current_date: current.meta.leaderboard_date.clone(),
        ..ChangeSet::default()
    };

    for curr in &current.models {
        let Some(prev) = prev_by_name.get(curr.model_name.as_str()) else {
            diff.added.push(curr.clone());
            continue;
        };
        let change = diff_model(prev, curr);
        if !change.is_empty() {
            diff.changed.push(change);
        }
    }

    for prev in &previous.models {
        if !curr_by_name.contains_key(prev.model_name.as_str()) {
            diff.removed.push(prev.clone());
        }
    }

    diff
}

fn field<T: PartialEq + Copy>(a: T, b: T) -> Option<FieldDelta<T>> {
    (a != b).then(|| FieldDelta::new(a, b))
}

fn diff_model(prev: &ModelRecord, curr: &ModelRecord) -> ModelChange {
    ModelChange {
        model_name: curr.model_name.clone(),
        current_rank: curr.rank,
        rank: field(prev.rank, curr.rank),
        rank_ub: field(prev.rank_ub, curr.rank_ub),
        score: (prev.score != curr.score).then(|| NumericDelta::new(prev.score, curr.score)),
        ci: field(prev.ci, curr.ci),
        votes: (prev.votes != curr.votes)
            .then(|| NumericDelta::new(prev.votes as i64, curr.votes as i64)),
        is_preliminary: field(prev.is_preliminary, curr.is_preliminary),
    }
}

/// Whether a change-set warrants a notification.
///
/// Vote counts tick up on nearly every check, so vote-only changes for
/// models outside the top `top_n_votes` are ignored. Vote changes inside
/// the top window still count: vote count is the tiebreaker when rank UB
/// and score match. Everything else always counts.
pub fn is_significant(diff: &ChangeSet, top_n_votes: u32) -> bool {
    if diff.metadata_changed || !diff.added.is_empty() || !diff.removed.is_empty() {
        return true;
    }
    diff.changed.iter().any(|c| {
        c.rank.is_some()
            || c.rank_ub.is_some()
            || c.score.is_some()
            || c.ci.is_some()
            || c.is_preliminary.is_some()
            || (c.votes.is_some() && c.current_rank <= top_n_votes)
    })
}

/// [`is_significant`] with the default top-N vote window.
pub fn is_significant_default(diff: &ChangeSet) -> bool {
    is_significant(diff, SIGNIFICANT_VOTES_TOP_N)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::PageMeta;
    use chrono::{TimeZone, Utc};

    fn record(name: &str, rank: u32) -> ModelRecord {
        ModelRecord {
            rank,
            rank_ub: rank,
            rank_lb: rank + 1,
            rank_spread_raw: String::new(),
            model_name: name.to_string(),
            organization: String::new(),
            license: String::new(),
            score: 1400,
            ci: 10,
            votes: 1000,
            is_preliminary: false,
            model_url: String::new(),
        }
    }

    fn snapshot(models: Vec<ModelRecord>) -> Snapshot {
        snapshot_dated(models, "Feb 11, 2026")
    }

    fn snapshot_dated(models: Vec<ModelRecord>, date: &str) -> Snapshot {
        Snapshot::new(
            Utc.with_ymd_and_hms(2026, 2, 15, 14, 30, 0).unwrap(),
            PageMeta {
                leaderboard_date: Some(date.to_string()),
                total_votes: None,
                total_models: Some(models.len() as u64),
            },
            models,
        )
    }

    #[test]
    fn self_diff_is_empty() {
        let snap = snapshot(vec![record("model-a", 1), record("model-b", 2)]);
        let diff = compute_diff(&snap, &snap);
        assert!(diff.is_empty());
        assert!(diff.added.is_empty());
        assert!(diff.removed.is_empty());
        assert!(diff.changed.is_empty());
        assert!(!diff.metadata_changed);
    }

    #[test]
    fn empty_previous_yields_all_added() {
        let prev = snapshot(vec![]);
        let curr = snapshot(vec![record("model-a", 1), record("model-b", 2)]);
        let diff = compute_diff(&prev, &curr);
        assert_eq!(diff.added.len(), 2);
        assert_eq!(diff.added[0].model_name, "model-a");
        assert_eq!(diff.added[1].model_name, "model-b");
        assert!(diff.removed.is_empty());
        assert!(diff.changed.is_empty());
    }

    #[test]
    fn added_and_removed_detected() {
        let prev = snapshot(vec![record("model-a", 1), record("model-b", 2)]);
        let curr = snapshot(vec![record("model-a", 1), record("model-c", 2)]);
        let diff = compute_diff(&prev, &curr);
        assert_eq!(diff.added.len(), 1);
        assert_eq!(diff.added[0].model_name, "model-c");
        assert_eq!(diff.removed.len(), 1);
        assert_eq!(diff.removed[0].model_name, "model-b");
    }

    #[test]
    fn rank_swap_produces_two_changes() {
        let prev = snapshot(vec![record("model-a", 1), record("model-b", 2)]);
        let mut a = record("model-a", 2);
        let mut b = record("model-b", 1);
        // Keep the band fields consistent with the original records so
        // only `rank` differs.
        a.rank_ub = 1;
        a.rank_lb = 2;
        b.rank_ub = 2;
        b.rank_lb = 3;
        let curr = snapshot(vec![b, a]);
        let diff = compute_diff(&prev, &curr);
        assert_eq!(diff.changed.len(), 2);
        // Current snapshot order: model-b (rank 1) first.
        assert_eq!(diff.changed[0].model_name, "model-b");
        assert_eq!(diff.changed[0].rank, Some(FieldDelta::new(2, 1)));
        assert_eq!(diff.changed[1].model_name, "model-a");
        assert_eq!(diff.changed[1].rank, Some(FieldDelta::new(1, 2)));
    }

    #[test]
    fn multi_field_change_collapses_to_one_entry() {
        let prev = snapshot(vec![{
            let mut m = record("model-x", 4);
            m.rank_ub = 5;
            m.votes = 100;
            m
        }]);
        let curr = snapshot(vec![{
            let mut m = record("model-x", 4);
            m.rank_ub = 3;
            m.votes = 150;
            m
        }]);
        let diff = compute_diff(&prev, &curr);
        assert_eq!(diff.changed.len(), 1);
        let change = &diff.changed[0];
        assert_eq!(change.model_name, "model-x");
        assert_eq!(change.rank_ub, Some(FieldDelta::new(5, 3)));
        let votes = change.votes.unwrap();
        assert_eq!((votes.from, votes.to, votes.delta), (100, 150, 50));
        assert!(change.rank.is_none());
        assert!(change.score.is_none());
        assert!(change.ci.is_none());
        assert!(change.is_preliminary.is_none());
    }

    #[test]
    fn score_and_ci_deltas() {
        let prev = snapshot(vec![{
            let mut m = record("model-a", 1);
            m.score = 1500;
            m.ci = 10;
            m
        }]);
        let curr = snapshot(vec![{
            let mut m = record("model-a", 1);
            m.score = 1510;
            m.ci = 5;
            m
        }]);
        let diff = compute_diff(&prev, &curr);
        let change = &diff.changed[0];
        assert_eq!(change.score.unwrap().delta, 10);
        assert_eq!(change.ci, Some(FieldDelta::new(10, 5)));
    }

    #[test]
    fn preliminary_flip_detected() {
        let prev = snapshot(vec![{
            let mut m = record("model-a", 1);
            m.is_preliminary = true;
            m
        }]);
        let curr = snapshot(vec![record("model-a", 1)]);
        let diff = compute_diff(&prev, &curr);
        assert_eq!(
            diff.changed[0].is_preliminary,
            Some(FieldDelta::new(true, false))
        );
    }

    #[test]
    fn ci_equal_is_not_a_change() {
        let prev = snapshot(vec![record("model-a", 1)]);
        let curr = snapshot(vec![record("model-a", 1)]);
        assert!(compute_diff(&prev, &curr).changed.is_empty());
    }

    #[test]
    fn date_change_flags_metadata() {
        let prev = snapshot_dated(vec![record("model-a", 1)], "Feb 10, 2026");
        let curr = snapshot_dated(vec![record("model-a", 1)], "Feb 11, 2026");
        let diff = compute_diff(&prev, &curr);
        assert!(diff.metadata_changed);
        assert!(!diff.is_empty());
        assert_eq!(diff.previous_date.as_deref(), Some("Feb 10, 2026"));
        assert_eq!(diff.current_date.as_deref(), Some("Feb 11, 2026"));
    }

    #[test]
    fn vote_churn_outside_top_n_is_insignificant() {
        let prev = snapshot(vec![{
            let mut m = record("model-deep", 42);
            m.votes = 100;
            m
        }]);
        let curr = snapshot(vec![{
            let mut m = record("model-deep", 42);
            m.votes = 170;
            m
        }]);
        let diff = compute_diff(&prev, &curr);
        assert!(!diff.is_empty());
        assert!(!is_significant(&diff, 10));

        // The same churn at rank 3 is a tiebreaker signal.
        let prev = snapshot(vec![{
            let mut m = record("model-top", 3);
            m.votes = 100;
            m
        }]);
        let curr = snapshot(vec![{
            let mut m = record("model-top", 3);
            m.votes = 170;
            m
        }]);
        assert!(is_significant(&compute_diff(&prev, &curr), 10));
    }
}
