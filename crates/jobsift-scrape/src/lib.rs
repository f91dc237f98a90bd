//! Scraper process boundary plus listing normalization and relevance scoring.
//!
//! The raw scraping itself (network fetching, anti-bot handling, pacing) lives
//! in an external command; this crate invokes it, ingests its JSON artifact
//! through a strict validation boundary, and turns raw listings into scored
//! candidates.

use std::path::{Path, PathBuf};

use jobsift_core::{Candidate, RawListing};
use regex::Regex;
use sha2::{Digest, Sha256};
use thiserror::Error;
use tokio::process::Command;
use tracing::{info, warn};

pub const CRATE_NAME: &str = "jobsift-scrape";

/// Working hours per year used to convert annual amounts to hourly.
pub const HOURS_PER_YEAR: f64 = 2080.0;
/// Hourly bounds outside this window are treated as scraper noise.
pub const MIN_HOURLY_RATE: f64 = 15.0;
pub const MAX_HOURLY_RATE: f64 = 300.0;

#[derive(Debug, Error)]
pub enum ScrapeError {
    #[error("scraper command is empty")]
    EmptyCommand,
    #[error("scraper failed to start: {0}")]
    Spawn(#[source] std::io::Error),
    #[error("scraper exited with {status}")]
    NonZeroExit { status: std::process::ExitStatus },
    #[error("scraper artifact missing at {path}")]
    MissingArtifact { path: PathBuf },
    #[error("scraper artifact unreadable: {0}")]
    ArtifactRead(#[source] std::io::Error),
    #[error("scraper artifact is not a listing array: {0}")]
    ArtifactParse(#[source] serde_json::Error),
}

/// Listings plus the content hash of the artifact they came from.
#[derive(Debug, Clone)]
pub struct ScrapeHarvest {
    pub listings: Vec<RawListing>,
    pub artifact_sha256: String,
}

/// Invokes the external scraper with `(limit, min_score_hint)` appended as
/// arguments and consumes the artifact it writes.
#[derive(Debug, Clone)]
pub struct ScraperInvocation {
    command: String,
    artifact_path: PathBuf,
}

impl ScraperInvocation {
    pub fn new(command: impl Into<String>, artifact_path: impl Into<PathBuf>) -> Self {
        Self {
            command: command.into(),
            artifact_path: artifact_path.into(),
        }
    }

    pub async fn run(&self, limit: u64, min_score_hint: f64) -> Result<ScrapeHarvest, ScrapeError> {
        let mut parts = self.command.split_whitespace();
        let program = parts.next().ok_or(ScrapeError::EmptyCommand)?;

        // A leftover artifact from an earlier aborted run must never be
        // mistaken for this run's output.
        if let Err(error) = tokio::fs::remove_file(&self.artifact_path).await {
            if error.kind() != std::io::ErrorKind::NotFound {
                warn!(
                    path = %self.artifact_path.display(),
                    %error,
                    "could not clear stale scraper artifact"
                );
            }
        }

        let status = Command::new(program)
            .args(parts)
            .arg(limit.to_string())
            .arg(format!("{min_score_hint}"))
            .kill_on_drop(true)
            .status()
            .await
            .map_err(ScrapeError::Spawn)?;
        if !status.success() {
            return Err(ScrapeError::NonZeroExit { status });
        }

        let bytes = match tokio::fs::read(&self.artifact_path).await {
            Ok(bytes) => bytes,
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => {
                return Err(ScrapeError::MissingArtifact {
                    path: self.artifact_path.clone(),
                });
            }
            Err(error) => return Err(ScrapeError::ArtifactRead(error)),
        };

        let artifact_sha256 = sha256_hex(&bytes);
        let listings: Vec<RawListing> =
            serde_json::from_slice(&bytes).map_err(ScrapeError::ArtifactParse)?;

        // The artifact is a handoff file, not a record of the run; the
        // execution log keeps its hash instead.
        if let Err(error) = tokio::fs::remove_file(&self.artifact_path).await {
            warn!(path = %self.artifact_path.display(), %error, "could not remove scraper artifact");
        }

        info!(
            listings = listings.len(),
            sha256 = %artifact_sha256,
            "consumed scraper artifact"
        );
        Ok(ScrapeHarvest {
            listings,
            artifact_sha256,
        })
    }

    pub fn artifact_path(&self) -> &Path {
        &self.artifact_path
    }
}

pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

/// Strict validation boundary over the loosely-shaped scraper output.
///
/// A listing without a usable http(s) external URL has no identity and is
/// dropped (`None`); a pre-computed score outside [0,1] is a field-level
/// failure and degrades to `None` so the scorer recomputes it.
pub fn validate_listing(mut listing: RawListing) -> Option<RawListing> {
    let url = listing.job_url.trim();
    if url.is_empty() || !(url.starts_with("http://") || url.starts_with("https://")) {
        return None;
    }
    listing.job_url = url.to_string();
    if let Some(score) = listing.score {
        if !(0.0..=1.0).contains(&score) || score.is_nan() {
            listing.score = None;
        }
    }
    Some(listing)
}

/// Converts scraped rate bounds to hourly and drops noise.
///
/// Annual amounts divide by 2080; hourly (or unlabelled) bounds pass through;
/// any other interval is noise. Surviving bounds must land in [15, 300], and
/// an inverted surviving pair is swapped.
pub fn normalize_rate(
    min: Option<f64>,
    max: Option<f64>,
    interval: Option<&str>,
) -> (Option<f64>, Option<f64>) {
    let scale = match interval {
        None => 1.0,
        Some(raw) => match raw.trim().to_ascii_lowercase().as_str() {
            "hourly" | "hour" => 1.0,
            "yearly" | "annual" | "annually" => 1.0 / HOURS_PER_YEAR,
            _ => return (None, None),
        },
    };
    let to_hourly = |value: Option<f64>| {
        value
            .map(|v| v * scale)
            .filter(|v| (MIN_HOURLY_RATE..=MAX_HOURLY_RATE).contains(v))
    };
    let (lo, hi) = (to_hourly(min), to_hourly(max));
    match (lo, hi) {
        (Some(a), Some(b)) if a > b => (Some(b), Some(a)),
        other => other,
    }
}

/// Trims and strips one trailing country qualifier; absent locations default
/// to "Remote".
pub fn normalize_location(raw: Option<&str>) -> String {
    let Some(raw) = raw else {
        return "Remote".to_string();
    };
    let mut value = raw.trim().to_string();
    let lowered = value.to_ascii_lowercase();
    for suffix in [", us", ", usa", ", united states"] {
        if lowered.ends_with(suffix) {
            value.truncate(value.len() - suffix.len());
            value = value.trim_end().to_string();
            break;
        }
    }
    if value.is_empty() {
        "Remote".to_string()
    } else {
        value
    }
}

/// Ordered duration extraction: months, weeks, bare numeric range, then the
/// short/long-term literals. First match wins; `None` when nothing matches.
pub fn extract_duration(text: &str) -> Option<String> {
    const PATTERNS: [&str; 5] = [
        r"(?i)\b\d+\s*months?\b",
        r"(?i)\b\d+\s*weeks?\b",
        r"\b\d+\s*-\s*\d+\b",
        r"(?i)\bshort[-\s]term\b",
        r"(?i)\blong[-\s]term\b",
    ];
    for pattern in PATTERNS {
        let re = Regex::new(pattern).expect("valid duration pattern");
        if let Some(found) = re.find(text) {
            let normalized = found
                .as_str()
                .to_ascii_lowercase()
                .split_whitespace()
                .collect::<Vec<_>>()
                .join(" ");
            return Some(normalized);
        }
    }
    None
}

/// Weighted phrase tables behind the relevance score. `Default` carries the
/// production vocabulary; deployments may override the lists without touching
/// the algorithm. The acceptance threshold is deliberately **not** here.
#[derive(Debug, Clone)]
pub struct ScoreRules {
    pub strong_positive: Vec<String>,
    pub medium_positive: Vec<String>,
    pub strong_negative: Vec<String>,
    pub medium_negative: Vec<String>,
}

impl Default for ScoreRules {
    fn default() -> Self {
        let phrases = |list: &[&str]| list.iter().map(|s| s.to_string()).collect();
        Self {
            strong_positive: phrases(&[
                "contract position",
                "1099",
                "independent contractor",
                "contract-to-hire",
                "w2 contract",
            ]),
            medium_positive: phrases(&[
                "contract role",
                "freelance",
                "contractor",
                "contracting",
                "temporary",
            ]),
            strong_negative: phrases(&[
                "full-time employee",
                "benefits package",
                "401k",
                "permanent position",
                "employees only",
            ]),
            medium_negative: phrases(&["full-time", "permanent", "salary"]),
        }
    }
}

impl ScoreRules {
    /// Pure relevance score in [0,1]. An in-range upstream score is
    /// authoritative and returned unchanged.
    pub fn score(&self, listing: &RawListing) -> f64 {
        if let Some(pre) = listing.score {
            if (0.0..=1.0).contains(&pre) {
                return pre;
            }
        }

        let text = format!("{} {}", listing.title, listing.description).to_lowercase();
        let present = |phrases: &[String]| {
            phrases.iter().filter(|p| text.contains(p.as_str())).count() as i64
        };

        let mut points = 0i64;
        points += 3 * present(&self.strong_positive);
        points += 2 * present(&self.medium_positive);
        if listing.rate_min.is_some() || listing.rate_max.is_some() || mentions_hourly(&text) {
            points += 2;
        }
        if mentions_duration(&text) {
            points += 1;
        }
        if listing.is_remote || mentions_remote(&text) {
            points += 1;
        }
        points -= 3 * present(&self.strong_negative);
        points -= present(&self.medium_negative);

        points.clamp(0, 10) as f64 / 10.0
    }
}

fn mentions_hourly(text: &str) -> bool {
    let re = Regex::new(r"/hr\b|\bhr\b|\bhourly\b|\bhour\b").expect("valid rate pattern");
    re.is_match(text)
}

fn mentions_duration(text: &str) -> bool {
    let re = Regex::new(r"\b\d+\s*(?:months?|weeks?)\b").expect("valid duration pattern");
    re.is_match(text) || text.contains("duration")
}

fn mentions_remote(text: &str) -> bool {
    text.contains("remote") || text.contains("work from anywhere") || text.contains("flexible location")
}

/// Full filter step for one validated listing: normalize fields, score, and
/// build the candidate pending an accept/reject/duplicate decision.
pub fn build_candidate(rules: &ScoreRules, listing: &RawListing) -> Candidate {
    let (rate_min, rate_max) = normalize_rate(
        listing.rate_min,
        listing.rate_max,
        listing.rate_interval.as_deref(),
    );
    let combined = format!("{} {}", listing.title, listing.description);
    Candidate {
        title: listing.title.trim().to_string(),
        company: listing.company.trim().to_string(),
        location: normalize_location(listing.location.as_deref()),
        rate_min,
        rate_max,
        duration: extract_duration(&combined),
        score: rules.score(listing),
        source: listing.source.clone(),
        external_url: listing.job_url.clone(),
        is_remote: listing.is_remote,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn listing(title: &str, description: &str) -> RawListing {
        RawListing {
            title: title.to_string(),
            description: description.to_string(),
            company: "Acme".to_string(),
            job_url: "https://jobs.example/1".to_string(),
            source: "indeed".to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn strong_contract_listing_scores_high_and_deterministically() {
        let rules = ScoreRules::default();
        let l = listing(
            "Contract Rust Developer",
            "Contract position for an independent contractor. $85/hr, 6 month engagement, fully remote.",
        );
        let first = rules.score(&l);
        let second = rules.score(&l);
        assert_eq!(first, second);
        assert!(first >= 0.3, "expected acceptance-level score, got {first}");
        assert!((0.0..=1.0).contains(&first));
    }

    #[test]
    fn full_time_listing_clamps_to_zero() {
        let rules = ScoreRules::default();
        let l = listing(
            "Senior Software Engineer",
            "Full-time employee role with salary and benefits package. 401k included.",
        );
        assert_eq!(rules.score(&l), 0.0);
    }

    #[test]
    fn precomputed_score_is_authoritative() {
        let rules = ScoreRules::default();
        let mut l = listing("Anything", "full-time employee, salary");
        l.score = Some(0.72);
        assert_eq!(rules.score(&l), 0.72);
    }

    #[test]
    fn score_never_exceeds_one() {
        let rules = ScoreRules::default();
        let l = listing(
            "1099 contract position",
            "independent contractor, contract-to-hire, w2 contract, contract role, freelance, \
             contracting, temporary, $100/hr, 12 month duration, remote",
        );
        assert_eq!(rules.score(&l), 1.0);
    }

    #[test]
    fn annual_rate_converts_to_hourly() {
        let (min, max) = normalize_rate(Some(104_000.0), Some(208_000.0), Some("yearly"));
        assert_eq!(min, Some(50.0));
        assert_eq!(max, Some(100.0));
    }

    #[test]
    fn out_of_window_bounds_become_null() {
        let (min, max) = normalize_rate(Some(5.0), Some(80.0), Some("hourly"));
        assert_eq!(min, None);
        assert_eq!(max, Some(80.0));

        let (min, max) = normalize_rate(Some(400.0), Some(500.0), Some("hourly"));
        assert_eq!((min, max), (None, None));
    }

    #[test]
    fn unknown_interval_is_noise() {
        assert_eq!(normalize_rate(Some(9_000.0), None, Some("monthly")), (None, None));
    }

    #[test]
    fn inverted_bounds_are_swapped() {
        let (min, max) = normalize_rate(Some(120.0), Some(90.0), Some("hourly"));
        assert_eq!(min, Some(90.0));
        assert_eq!(max, Some(120.0));
    }

    #[test]
    fn location_strips_country_and_defaults_to_remote() {
        assert_eq!(normalize_location(Some("Austin, TX, US")), "Austin, TX");
        assert_eq!(normalize_location(Some("  Minneapolis, MN, United States ")), "Minneapolis, MN");
        assert_eq!(normalize_location(Some("Berlin")), "Berlin");
        assert_eq!(normalize_location(Some("  ")), "Remote");
        assert_eq!(normalize_location(None), "Remote");
    }

    #[test]
    fn duration_patterns_apply_in_order() {
        assert_eq!(extract_duration("a 6 month contract"), Some("6 month".to_string()));
        assert_eq!(extract_duration("roughly 12 weeks of work"), Some("12 weeks".to_string()));
        assert_eq!(extract_duration("phase 3-6 of the project"), Some("3-6".to_string()));
        assert_eq!(extract_duration("short-term engagement"), Some("short-term".to_string()));
        assert_eq!(extract_duration("an ongoing thing"), None);
        // Month pattern outranks the bare range.
        assert_eq!(extract_duration("3-6 months"), Some("6 months".to_string()));
    }

    #[test]
    fn validation_drops_unusable_urls_and_bad_prescores() {
        let mut l = listing("t", "d");
        l.job_url = "  https://jobs.example/1 ".to_string();
        l.score = Some(4.2);
        let validated = validate_listing(l).unwrap();
        assert_eq!(validated.job_url, "https://jobs.example/1");
        assert_eq!(validated.score, None);

        let mut bad = listing("t", "d");
        bad.job_url = "javascript:alert(1)".to_string();
        assert!(validate_listing(bad).is_none());

        let mut empty = listing("t", "d");
        empty.job_url = String::new();
        assert!(validate_listing(empty).is_none());
    }

    #[test]
    fn candidate_carries_normalized_fields() {
        let rules = ScoreRules::default();
        let mut l = listing(
            " Contract Rust Developer ",
            "Contract position, $85/hr, 6 month engagement, remote",
        );
        l.location = Some("Denver, CO, US".to_string());
        l.rate_min = Some(104_000.0);
        l.rate_max = Some(124_800.0);
        l.rate_interval = Some("yearly".to_string());

        let candidate = build_candidate(&rules, &l);
        assert_eq!(candidate.title, "Contract Rust Developer");
        assert_eq!(candidate.location, "Denver, CO");
        assert_eq!(candidate.rate_min, Some(50.0));
        assert_eq!(candidate.rate_max, Some(60.0));
        assert_eq!(candidate.duration, Some("6 month".to_string()));
        assert!(candidate.score >= 0.3);
    }

    #[tokio::test]
    async fn scrape_consumes_and_removes_artifact() {
        let dir = tempfile::tempdir().expect("tempdir");
        let artifact = dir.path().join("scraped-listings.json");
        let feed = dir.path().join("feed.json");
        let script = dir.path().join("scraper.sh");
        let payload = serde_json::json!([
            {"title": "Contract Rust Developer", "job_url": "https://jobs.example/1", "source": "indeed"}
        ]);
        std::fs::write(&feed, serde_json::to_vec(&payload).unwrap()).unwrap();
        std::fs::write(
            &script,
            format!("cp {} {}\n", feed.display(), artifact.display()),
        )
        .unwrap();

        let invocation = ScraperInvocation::new(format!("sh {}", script.display()), &artifact);
        let harvest = invocation.run(300, 0.3).await.expect("harvest");
        assert_eq!(harvest.listings.len(), 1);
        assert_eq!(harvest.listings[0].title, "Contract Rust Developer");
        assert_eq!(harvest.artifact_sha256.len(), 64);
        assert!(!artifact.exists());
    }

    #[tokio::test]
    async fn leftover_artifact_is_cleared_before_the_scraper_runs() {
        let dir = tempfile::tempdir().expect("tempdir");
        let artifact = dir.path().join("scraped-listings.json");
        let stale = serde_json::json!([
            {"title": "Old Listing", "job_url": "https://jobs.example/old", "source": "indeed"}
        ]);
        std::fs::write(&artifact, serde_json::to_vec(&stale).unwrap()).unwrap();

        // The command writes nothing, so the stale artifact must not be
        // mistaken for its output.
        let invocation = ScraperInvocation::new("true", &artifact);
        assert!(matches!(
            invocation.run(10, 0.3).await,
            Err(ScrapeError::MissingArtifact { .. })
        ));
        assert!(!artifact.exists());
    }

    #[tokio::test]
    async fn dropped_run_kills_the_scraper_child() {
        let dir = tempfile::tempdir().expect("tempdir");
        let artifact = dir.path().join("scraped-listings.json");
        let marker = dir.path().join("marker");
        let script = dir.path().join("slow-scraper.sh");
        std::fs::write(
            &script,
            format!(
                "sleep 2\ntouch {}\necho [] > {}\n",
                marker.display(),
                artifact.display()
            ),
        )
        .unwrap();

        let invocation = ScraperInvocation::new(format!("sh {}", script.display()), &artifact);
        let raced =
            tokio::time::timeout(std::time::Duration::from_millis(200), invocation.run(10, 0.3))
                .await;
        assert!(raced.is_err(), "slow scraper should hit the deadline");

        // Past the child's sleep: a surviving child would have written both.
        tokio::time::sleep(std::time::Duration::from_millis(2300)).await;
        assert!(!marker.exists());
        assert!(!artifact.exists());
    }

    #[tokio::test]
    async fn scraper_failure_modes_map_to_errors() {
        let dir = tempfile::tempdir().expect("tempdir");
        let artifact = dir.path().join("missing.json");

        let failing = ScraperInvocation::new("false", &artifact);
        assert!(matches!(
            failing.run(10, 0.3).await,
            Err(ScrapeError::NonZeroExit { .. })
        ));

        let no_artifact = ScraperInvocation::new("true", &artifact);
        assert!(matches!(
            no_artifact.run(10, 0.3).await,
            Err(ScrapeError::MissingArtifact { .. })
        ));
    }
}
