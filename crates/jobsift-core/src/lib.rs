//! Core domain model and run-result types for JobSift.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub const CRATE_NAME: &str = "jobsift-core";

/// Raw listing as handed over by the external scraper. Lenient on the wire;
/// `validate` is the strict boundary before anything downstream touches it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct RawListing {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub company: String,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub is_remote: bool,
    #[serde(default)]
    pub rate_min: Option<f64>,
    #[serde(default)]
    pub rate_max: Option<f64>,
    #[serde(default)]
    pub rate_interval: Option<String>,
    #[serde(default)]
    pub job_url: String,
    #[serde(default)]
    pub source: String,
    /// Upstream pre-computed relevance score, trusted when in [0,1].
    #[serde(default)]
    pub score: Option<f64>,
}

/// Normalized, scored listing awaiting an accept/reject/duplicate decision.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Candidate {
    pub title: String,
    pub company: String,
    pub location: String,
    pub rate_min: Option<f64>,
    pub rate_max: Option<f64>,
    pub duration: Option<String>,
    pub score: f64,
    pub source: String,
    pub external_url: String,
    pub is_remote: bool,
}

/// Persisted store row. Mutated only through soft retirement or a later
/// verification pass; never hard-deleted by the pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRecord {
    pub id: Uuid,
    pub external_url: String,
    pub title: String,
    pub company: String,
    pub rate_min: Option<f64>,
    pub rate_max: Option<f64>,
    pub location: String,
    pub is_active: bool,
    pub last_verified_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// Insert shape for the store; id and created_at are assigned on insert.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewJobRecord {
    pub external_url: String,
    pub title: String,
    pub company: String,
    pub rate_min: Option<f64>,
    pub rate_max: Option<f64>,
    pub location: String,
    pub is_active: bool,
    pub last_verified_at: Option<DateTime<Utc>>,
}

impl NewJobRecord {
    pub fn from_candidate(candidate: &Candidate, verified_at: DateTime<Utc>) -> Self {
        Self {
            external_url: candidate.external_url.clone(),
            title: candidate.title.clone(),
            company: candidate.company.clone(),
            rate_min: candidate.rate_min,
            rate_max: candidate.rate_max,
            location: candidate.location.clone(),
            is_active: true,
            last_verified_at: Some(verified_at),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RunMode {
    Live,
    DryRun,
}

impl RunMode {
    pub fn is_dry_run(self) -> bool {
        matches!(self, RunMode::DryRun)
    }
}

impl std::fmt::Display for RunMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunMode::Live => write!(f, "live"),
            RunMode::DryRun => write!(f, "dry-run"),
        }
    }
}

/// Contents of the single-instance lock artifact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LockToken {
    pub owner_id: Uuid,
    pub created_at: DateTime<Utc>,
    pub mode: RunMode,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Phase {
    Scrape,
    Filter,
    Import,
    Cleanup,
    Report,
}

impl Phase {
    pub const ORDER: [Phase; 5] = [
        Phase::Scrape,
        Phase::Filter,
        Phase::Import,
        Phase::Cleanup,
        Phase::Report,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Phase::Scrape => "scrape",
            Phase::Filter => "filter",
            Phase::Import => "import",
            Phase::Cleanup => "cleanup",
            Phase::Report => "report",
        }
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PhaseStatus {
    Completed,
    Failed,
    Skipped,
    Aborted,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhaseOutcome {
    pub phase: Phase,
    pub status: PhaseStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

/// Per-run counters. The filter/import funnel is conserved: scraped ==
/// invalid_url + rejected + duplicates + limit_overflow + imported +
/// import_failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RunCounts {
    pub scraped: u64,
    pub invalid_url: u64,
    pub rejected: u64,
    pub duplicates: u64,
    /// Candidates accepted by the filter but shed by the import cap.
    pub limit_overflow: u64,
    pub imported: u64,
    pub import_failures: u64,
    pub imported_without_rate: u64,
    pub examined: u64,
    pub retired_stale: u64,
    pub retired_unhealthy: u64,
    pub probes: u64,
    pub probe_failures: u64,
}

impl RunCounts {
    pub fn funnel_is_conserved(&self) -> bool {
        self.scraped
            == self.invalid_url
                + self.rejected
                + self.duplicates
                + self.limit_overflow
                + self.imported
                + self.import_failures
    }

    pub fn retired(&self) -> u64 {
        self.retired_stale + self.retired_unhealthy
    }
}

/// Histogram of relevance scores in ten 0.1-wide buckets.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ScoreDistribution {
    pub buckets: [u64; 10],
    pub samples: u64,
    pub sum: f64,
}

impl ScoreDistribution {
    pub fn record(&mut self, score: f64) {
        let clamped = score.clamp(0.0, 1.0);
        let bucket = ((clamped * 10.0) as usize).min(9);
        self.buckets[bucket] += 1;
        self.samples += 1;
        self.sum += clamped;
    }

    pub fn mean(&self) -> Option<f64> {
        if self.samples == 0 {
            None
        } else {
            Some(self.sum / self.samples as f64)
        }
    }
}

/// One recorded, non-fatal error. Order of recording is preserved.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunError {
    pub phase: Phase,
    pub message: String,
    pub at: DateTime<Utc>,
}

/// Aggregated outcome artifact of one pipeline execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunResult {
    pub run_id: Uuid,
    pub run_date: NaiveDate,
    pub mode: RunMode,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub phases: Vec<PhaseOutcome>,
    pub counts: RunCounts,
    pub scores: ScoreDistribution,
    pub errors: Vec<RunError>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fatal: Option<String>,
    /// Distinct source tags among imported candidates, sorted.
    pub sources: Vec<String>,
    pub recommendations: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artifact_sha256: Option<String>,
}

impl RunResult {
    pub fn phase_status(&self, phase: Phase) -> Option<PhaseStatus> {
        self.phases
            .iter()
            .find(|outcome| outcome.phase == phase)
            .map(|outcome| outcome.status)
    }

    pub fn duration_secs(&self) -> f64 {
        (self.finished_at - self.started_at).num_milliseconds() as f64 / 1000.0
    }
}
