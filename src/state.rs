//! Persistent watcher state and the fingerprint confirmation machine.
//!
//! A new fingerprint is not believed on first sight: it must show up on
//! `confirmation_checks` consecutive checks before it counts as a change.
//! This absorbs transient render glitches and half-deployed pages.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

/// On-disk watcher state. Unknown fields in an existing file are ignored,
/// a missing or corrupt file is simply a fresh start.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WatchState {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    /// Confirmed page fingerprint.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hash: Option<String>,
    /// Fingerprint observed but not yet confirmed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pending_hash: Option<String>,
    #[serde(default)]
    pub pending_count: u32,
    /// Guard against duplicate notifications across overlapping runs.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_notified_hash: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_checked_utc: Option<DateTime<Utc>>,
}

/// What one fingerprint observation means.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Observation {
    /// Same fingerprint as the confirmed one; any pending entry is stale
    /// and has been dropped.
    Unchanged,
    /// First ever observation; recorded as the baseline, not a change.
    Baseline,
    /// New fingerprint seen, waiting for consecutive confirmation.
    Pending { count: u32, required: u32 },
    /// The new fingerprint passed confirmation and is now the confirmed
    /// hash; `previous` is the one it replaced.
    Confirmed { previous: String },
}

impl WatchState {
    pub fn load(path: &Path) -> Self {
        let Ok(text) = fs::read_to_string(path) else {
            return Self::default();
        };
        match serde_json::from_str(&text) {
            Ok(state) => state,
            Err(err) => {
                warn!("ignoring corrupt state file {}: {err}", path.display());
                Self::default()
            }
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        let mut content = serde_json::to_vec_pretty(self).context("failed to encode state")?;
        content.push(b'\n');
        fs::write(path, content).with_context(|| format!("failed to write {}", path.display()))
    }

    /// Feed one fingerprint observation through the confirmation machine.
    ///
    /// The confirmed hash advances on [`Observation::Confirmed`] (and on
    /// the very first observation); a notification veto downstream does
    /// not rewind it, so a vetoed fingerprint is not re-confirmed on the
    /// next check.
    pub fn observe(&mut self, new_hash: &str, confirmation_checks: u32) -> Observation {
        if self.hash.as_deref() == Some(new_hash) {
            self.clear_pending();
            return Observation::Unchanged;
        }

        if self.hash.is_none() {
            self.hash = Some(new_hash.to_string());
            self.clear_pending();
            return Observation::Baseline;
        }

        if self.pending_hash.as_deref() == Some(new_hash) {
            self.pending_count += 1;
        } else {
            self.pending_hash = Some(new_hash.to_string());
            self.pending_count = 1;
        }

        if self.pending_count >= confirmation_checks {
            let previous = self
                .hash
                .replace(new_hash.to_string())
                .expect("confirmed hash present past first run");
            self.clear_pending();
            Observation::Confirmed { previous }
        } else {
            Observation::Pending {
                count: self.pending_count,
                required: confirmation_checks,
            }
        }
    }

    fn clear_pending(&mut self) {
        self.pending_hash = None;
        self.pending_count = 0;
    }

    /// True while a new fingerprint awaits confirmation. The structured
    /// snapshot cache must stay frozen during this window so the diff
    /// baseline survives until confirmation.
    pub fn is_pending(&self) -> bool {
        self.pending_hash.is_some()
    }

    pub fn already_notified(&self, hash: &str) -> bool {
        self.last_notified_hash.as_deref() == Some(hash)
    }

    pub fn mark_notified(&mut self, hash: &str) {
        self.last_notified_hash = Some(hash.to_string());
    }
}
