use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One leaderboard row at a point in time.
///
/// `rank_ub`/`rank_lb` are the confidence band on the model's true rank,
/// recovered from the concatenated `rank_spread_raw` digits (kept verbatim
/// for audit). `rank_ub` is the optimistic bound and the primary
/// settlement criterion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelRecord {
    pub rank: u32,
    pub rank_ub: u32,
    pub rank_lb: u32,
    #[serde(default)]
    pub rank_spread_raw: String,
    pub model_name: String,
    #[serde(default)]
    pub organization: String,
    #[serde(default)]
    pub license: String,
    /// Elo-like rating; higher is better.
    pub score: i64,
    /// ± interval on `score`.
    #[serde(default)]
    pub ci: u32,
    #[serde(default)]
    pub votes: u64,
    #[serde(default)]
    pub is_preliminary: bool,
    #[serde(default)]
    pub model_url: String,
}

/// Page-level information scraped outside the table itself.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageMeta {
    /// Displayed refresh date, e.g. "Feb 11, 2026".
    pub leaderboard_date: Option<String>,
    pub total_votes: Option<u64>,
    pub total_models: Option<u64>,
}

/// One full captured state of the leaderboard. Immutable once produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub captured_at: DateTime<Utc>,
    #[serde(flatten)]
    pub meta: PageMeta,
    pub models: Vec<ModelRecord>,
    /// Overtake analytics attached before storage; absent until enriched.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub overtake: Option<crate::overtake::OvertakeReport>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub h2h: Option<crate::overtake::HeadToHeadReport>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub projections: Option<crate::projections::ProjectionsByCadence>,
}

impl Snapshot {
    pub fn new(captured_at: DateTime<Utc>, meta: PageMeta, models: Vec<ModelRecord>) -> Self {
        Self {
            captured_at,
            meta,
            models,
            overtake: None,
            h2h: None,
            projections: None,
        }
    }
}

/// Old → new transition for a single field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldDelta<T> {
    pub from: T,
    pub to: T,
}

impl<T> FieldDelta<T> {
    pub fn new(from: T, to: T) -> Self {
        Self { from, to }
    }
}

/// Old → new transition with the signed difference carried along.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NumericDelta {
    pub from: i64,
    pub to: i64,
    pub delta: i64,
}

impl NumericDelta {
    pub fn new(from: i64, to: i64) -> Self {
        Self {
            from,
            to,
            delta: to - from,
        }
    }
}

/// Per-model field changes between two snapshots. Only fields that
/// actually differ are populated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelChange {
    pub model_name: String,
    /// Rank in the current snapshot, kept for ordering and formatting.
    pub current_rank: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rank: Option<FieldDelta<u32>>,
    /// Settlement-critical: the optimistic rank bound moved.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rank_ub: Option<FieldDelta<u32>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub score: Option<NumericDelta>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ci: Option<FieldDelta<u32>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub votes: Option<NumericDelta>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_preliminary: Option<FieldDelta<bool>>,
}

impl ModelChange {
    pub fn is_empty(&self) -> bool {
        self.rank.is_none()
            && self.rank_ub.is_none()
            && self.score.is_none()
            && self.ci.is_none()
            && self.votes.is_none()
            && self.is_preliminary.is_none()
    }
}

/// Structured difference between two snapshots. Created fresh per diff
/// invocation and never mutated afterwards.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChangeSet {
    pub added: Vec<ModelRecord>,
    pub removed: Vec<ModelRecord>,
    pub changed: Vec<ModelChange>,
    /// Displayed page date differs between the two snapshots.
    pub metadata_changed: bool,
    pub previous_date: Option<String>,
    pub current_date: Option<String>,
}

impl ChangeSet {
    /// True when the diff carries no signal at all. Distinguishable from
    /// "not yet computed" because callers hold an `Option<ChangeSet>`.
    pub fn is_empty(&self) -> bool {
        self.added.is_empty()
            && self.removed.is_empty()
            && self.changed.is_empty()
            && !self.metadata_changed
    }
}
