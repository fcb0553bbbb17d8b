//! Job bookkeeping — run status, per-job state, and scan reports.
//!
//! All types derive `Serialize` with `camelCase` keys so the CLI can dump
//! them as JSON.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ─────────────────────────────────────────────
// Job names
// ─────────────────────────────────────────────

pub const ROOM_INSTANCE_SCAN: &str = "room-instance-scan";
pub const TMP_CHANNEL_SCAN: &str = "tmp-channel-scan";
pub const COUNTDOWN_SCAN: &str = "countdown-scan";
pub const RECALL_SCAN: &str = "recall-scan";
pub const SETTINGS_REFRESH: &str = "settings-refresh";

/// Map a short alias (`rooms`, `tmp`, ...) to a job name.
pub fn resolve_job_name(alias: &str) -> Option<&'static str> {
    match alias.trim().to_ascii_lowercase().as_str() {
        "room" | "rooms" | "room-instance" | ROOM_INSTANCE_SCAN => Some(ROOM_INSTANCE_SCAN),
        "tmp" | "tmp-channel" | "tmp-channels" | TMP_CHANNEL_SCAN => Some(TMP_CHANNEL_SCAN),
        "countdown" | "countdowns" | COUNTDOWN_SCAN => Some(COUNTDOWN_SCAN),
        "recall" | "recalls" | RECALL_SCAN => Some(RECALL_SCAN),
        "settings" | SETTINGS_REFRESH => Some(SETTINGS_REFRESH),
        _ => None,
    }
}

// ─────────────────────────────────────────────
// JobState
// ─────────────────────────────────────────────

/// Run status of a job.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Ok,
    Error,
    /// The job was still running when another invocation was requested.
    Skipped,
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            JobStatus::Ok => "ok",
            JobStatus::Error => "error",
            JobStatus::Skipped => "skipped",
        })
    }
}

/// Observable state of one scheduled job.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobState {
    /// When the last invocation finished (or was skipped).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_run_at: Option<DateTime<Utc>>,
    /// Status of the last invocation.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_status: Option<JobStatus>,
    /// Error message from the last failed run.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    /// Completed invocations, successful or not.
    pub runs: u64,
    /// Report of the last successful run.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_report: Option<ScanReport>,
}

// ─────────────────────────────────────────────
// ScanReport
// ─────────────────────────────────────────────

/// What one scan cycle saw and did.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanReport {
    /// Records examined.
    pub seen: usize,
    /// Records removed from the registry.
    pub deleted: usize,
    /// Records updated in place.
    pub updated: usize,
    /// Records not yet due.
    pub skipped: usize,
    /// Records left untouched because a platform call failed.
    pub failures: usize,
    pub extensions_applied: usize,
    pub extensions_purged: usize,
    /// Registry mutations committed at the end of the cycle.
    pub mutations: usize,
}

impl ScanReport {
    /// Whether the cycle changed nothing.
    pub fn is_noop(&self) -> bool {
        self.mutations == 0
    }
}

impl fmt::Display for ScanReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "seen {}, deleted {}, updated {}, skipped {}, failures {}",
            self.seen, self.deleted, self.updated, self.skipped, self.failures
        )?;
        if self.extensions_applied + self.extensions_purged > 0 {
            write!(
                f,
                ", extensions applied {}, purged {}",
                self.extensions_applied, self.extensions_purged
            )?;
        }
        Ok(())
    }
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────
