//! Persisted-store abstraction for JobSift: the `JobStore` trait, a Postgres
//! implementation, an in-memory implementation for tests and store-less runs,
//! and URL shape/liveness checks used by record retirement.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use jobsift_core::{JobRecord, NewJobRecord};
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::{Postgres, QueryBuilder, Row};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::debug;
use uuid::Uuid;

pub const CRATE_NAME: &str = "jobsift-store";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store query failed: {0}")]
    Query(#[from] sqlx::Error),
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// Conjunctive record filter; `None` fields match everything.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RecordFilter {
    pub active: Option<bool>,
    pub external_url: Option<String>,
    /// Matches records whose last verification (falling back to creation)
    /// predates the given instant.
    pub verified_before: Option<DateTime<Utc>>,
    pub ids: Option<Vec<Uuid>>,
}

impl RecordFilter {
    pub fn active_only() -> Self {
        Self {
            active: Some(true),
            ..Default::default()
        }
    }

    fn matches(&self, record: &JobRecord) -> bool {
        if let Some(active) = self.active {
            if record.is_active != active {
                return false;
            }
        }
        if let Some(url) = &self.external_url {
            if &record.external_url != url {
                return false;
            }
        }
        if let Some(before) = self.verified_before {
            let reference = record.last_verified_at.unwrap_or(record.created_at);
            if reference >= before {
                return false;
            }
        }
        if let Some(ids) = &self.ids {
            if !ids.contains(&record.id) {
                return false;
            }
        }
        true
    }
}

/// Partial update applied to every record matched by a filter.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RecordPatch {
    pub is_active: Option<bool>,
    pub last_verified_at: Option<DateTime<Utc>>,
}

impl RecordPatch {
    pub fn retire() -> Self {
        Self {
            is_active: Some(false),
            ..Default::default()
        }
    }

    fn is_empty(&self) -> bool {
        self.is_active.is_none() && self.last_verified_at.is_none()
    }
}

/// Query/insert seam over the persisted store. The pipeline only ever talks
/// to this trait; the concrete storage technology stays behind it.
#[async_trait]
pub trait JobStore: Send + Sync {
    async fn count(&self, filter: RecordFilter) -> Result<u64, StoreError>;

    /// True when an active record with exactly this external URL exists.
    async fn exists(&self, external_url: &str) -> Result<bool, StoreError>;

    async fn insert(&self, records: &[NewJobRecord]) -> Result<u64, StoreError>;

    async fn update(&self, filter: RecordFilter, patch: RecordPatch) -> Result<u64, StoreError>;

    async fn select(&self, filter: RecordFilter, limit: usize) -> Result<Vec<JobRecord>, StoreError>;
}

/// Postgres-backed store over a lazily-connected pool.
#[derive(Debug, Clone)]
pub struct PgJobStore {
    pool: PgPool,
}

impl PgJobStore {
    pub fn connect_lazy(database_url: &str) -> anyhow::Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(4)
            .connect_lazy(database_url)
            .context("building postgres pool")?;
        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Creates the job_records table and its dedup index if missing.
    pub async fn ensure_schema(&self) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS job_records (
                id UUID PRIMARY KEY,
                external_url TEXT NOT NULL,
                title TEXT NOT NULL,
                company TEXT NOT NULL,
                rate_min DOUBLE PRECISION,
                rate_max DOUBLE PRECISION,
                location TEXT NOT NULL,
                is_active BOOLEAN NOT NULL DEFAULT TRUE,
                last_verified_at TIMESTAMPTZ,
                created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
            )
            "#,
        )
        .execute(&self.pool)
        .await?;
        sqlx::query(
            "CREATE INDEX IF NOT EXISTS job_records_external_url_idx ON job_records (external_url)",
        )
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

fn push_filter<'a>(builder: &mut QueryBuilder<'a, Postgres>, filter: &'a RecordFilter) {
    let mut prefix = " WHERE ";
    if let Some(active) = filter.active {
        builder.push(prefix).push("is_active = ").push_bind(active);
        prefix = " AND ";
    }
    if let Some(url) = &filter.external_url {
        builder
            .push(prefix)
            .push("external_url = ")
            .push_bind(url.as_str());
        prefix = " AND ";
    }
    if let Some(before) = filter.verified_before {
        builder
            .push(prefix)
            .push("COALESCE(last_verified_at, created_at) < ")
            .push_bind(before);
        prefix = " AND ";
    }
    if let Some(ids) = &filter.ids {
        builder
            .push(prefix)
            .push("id = ANY(")
            .push_bind(ids.as_slice())
            .push(")");
    }
}

fn record_from_row(row: &PgRow) -> Result<JobRecord, sqlx::Error> {
    Ok(JobRecord {
        id: row.try_get("id")?,
        external_url: row.try_get("external_url")?,
        title: row.try_get("title")?,
        company: row.try_get("company")?,
        rate_min: row.try_get("rate_min")?,
        rate_max: row.try_get("rate_max")?,
        location: row.try_get("location")?,
        is_active: row.try_get("is_active")?,
        last_verified_at: row.try_get("last_verified_at")?,
        created_at: row.try_get("created_at")?,
    })
}

#[async_trait]
impl JobStore for PgJobStore {
    async fn count(&self, filter: RecordFilter) -> Result<u64, StoreError> {
        let mut builder = QueryBuilder::<Postgres>::new("SELECT COUNT(*) FROM job_records");
        push_filter(&mut builder, &filter);
        let count: i64 = builder.build().fetch_one(&self.pool).await?.try_get(0)?;
        Ok(count.max(0) as u64)
    }

    async fn exists(&self, external_url: &str) -> Result<bool, StoreError> {
        let filter = RecordFilter {
            active: Some(true),
            external_url: Some(external_url.to_string()),
            ..Default::default()
        };
        Ok(self.count(filter).await? > 0)
    }

    async fn insert(&self, records: &[NewJobRecord]) -> Result<u64, StoreError> {
        if records.is_empty() {
            return Ok(0);
        }
        let now = Utc::now();
        let mut builder = QueryBuilder::<Postgres>::new(
            "INSERT INTO job_records \
             (id, external_url, title, company, rate_min, rate_max, location, is_active, last_verified_at, created_at) ",
        );
        builder.push_values(records, |mut row, record| {
            row.push_bind(Uuid::new_v4())
                .push_bind(record.external_url.as_str())
                .push_bind(record.title.as_str())
                .push_bind(record.company.as_str())
                .push_bind(record.rate_min)
                .push_bind(record.rate_max)
                .push_bind(record.location.as_str())
                .push_bind(record.is_active)
                .push_bind(record.last_verified_at)
                .push_bind(now);
        });
        let result = builder.build().execute(&self.pool).await?;
        debug!(inserted = result.rows_affected(), "inserted job records");
        Ok(result.rows_affected())
    }

    async fn update(&self, filter: RecordFilter, patch: RecordPatch) -> Result<u64, StoreError> {
        if patch.is_empty() {
            return Ok(0);
        }
        let mut builder = QueryBuilder::<Postgres>::new("UPDATE job_records SET ");
        let mut sep = "";
        if let Some(active) = patch.is_active {
            builder.push(sep).push("is_active = ").push_bind(active);
            sep = ", ";
        }
        if let Some(verified_at) = patch.last_verified_at {
            builder
                .push(sep)
                .push("last_verified_at = ")
                .push_bind(verified_at);
        }
        push_filter(&mut builder, &filter);
        let result = builder.build().execute(&self.pool).await?;
        Ok(result.rows_affected())
    }

    async fn select(&self, filter: RecordFilter, limit: usize) -> Result<Vec<JobRecord>, StoreError> {
        let mut builder = QueryBuilder::<Postgres>::new(
            "SELECT id, external_url, title, company, rate_min, rate_max, location, \
             is_active, last_verified_at, created_at FROM job_records",
        );
        push_filter(&mut builder, &filter);
        builder
            .push(" ORDER BY created_at ASC LIMIT ")
            .push_bind(limit as i64);
        let rows = builder.build().fetch_all(&self.pool).await?;
        rows.iter()
            .map(|row| record_from_row(row).map_err(StoreError::from))
            .collect()
    }
}

/// In-memory store used by tests and runs without a database. Supports
/// injected query failures so callers' degraded paths can be exercised.
#[derive(Debug, Default)]
pub struct MemoryJobStore {
    records: Mutex<Vec<JobRecord>>,
    failing: AtomicBool,
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn seed(&self, records: Vec<JobRecord>) {
        self.records.lock().await.extend(records);
    }

    /// Makes every subsequent query fail with `StoreError::Unavailable`.
    pub fn fail_queries(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub async fn snapshot(&self) -> Vec<JobRecord> {
        self.records.lock().await.clone()
    }

    fn check_available(&self) -> Result<(), StoreError> {
        if self.failing.load(Ordering::SeqCst) {
            Err(StoreError::Unavailable("injected store failure".to_string()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn count(&self, filter: RecordFilter) -> Result<u64, StoreError> {
        self.check_available()?;
        let records = self.records.lock().await;
        Ok(records.iter().filter(|r| filter.matches(r)).count() as u64)
    }

    async fn exists(&self, external_url: &str) -> Result<bool, StoreError> {
        let filter = RecordFilter {
            active: Some(true),
            external_url: Some(external_url.to_string()),
            ..Default::default()
        };
        Ok(self.count(filter).await? > 0)
    }

    async fn insert(&self, new_records: &[NewJobRecord]) -> Result<u64, StoreError> {
        self.check_available()?;
        let now = Utc::now();
        let mut records = self.records.lock().await;
        for record in new_records {
            records.push(JobRecord {
                id: Uuid::new_v4(),
                external_url: record.external_url.clone(),
                title: record.title.clone(),
                company: record.company.clone(),
                rate_min: record.rate_min,
                rate_max: record.rate_max,
                location: record.location.clone(),
                is_active: record.is_active,
                last_verified_at: record.last_verified_at,
                created_at: now,
            });
        }
        Ok(new_records.len() as u64)
    }

    async fn update(&self, filter: RecordFilter, patch: RecordPatch) -> Result<u64, StoreError> {
        self.check_available()?;
        if patch.is_empty() {
            return Ok(0);
        }
        let mut records = self.records.lock().await;
        let mut touched = 0u64;
        for record in records.iter_mut().filter(|r| filter.matches(r)) {
            if let Some(active) = patch.is_active {
                record.is_active = active;
            }
            if let Some(verified_at) = patch.last_verified_at {
                record.last_verified_at = Some(verified_at);
            }
            touched += 1;
        }
        Ok(touched)
    }

    async fn select(&self, filter: RecordFilter, limit: usize) -> Result<Vec<JobRecord>, StoreError> {
        self.check_available()?;
        let records = self.records.lock().await;
        let mut matched: Vec<JobRecord> = records
            .iter()
            .filter(|r| filter.matches(r))
            .cloned()
            .collect();
        matched.sort_by_key(|r| r.created_at);
        matched.truncate(limit);
        Ok(matched)
    }
}

/// Shape check used before probing: parseable http(s) URL.
pub fn url_is_well_formed(url: &str) -> bool {
    match reqwest::Url::parse(url) {
        Ok(parsed) => matches!(parsed.scheme(), "http" | "https") && parsed.host().is_some(),
        Err(_) => false,
    }
}

/// Lightweight liveness prober: one HEAD request, 2xx/3xx counts as alive.
#[derive(Debug)]
pub struct UrlProber {
    client: reqwest::Client,
}

impl UrlProber {
    pub fn new(user_agent: &str, timeout: Duration) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(user_agent.to_string())
            .timeout(timeout)
            .build()
            .context("building probe client")?;
        Ok(Self { client })
    }

    pub async fn probe(&self, url: &str) -> bool {
        match self.client.head(url).send().await {
            Ok(response) => {
                let status = response.status();
                status.is_success() || status.is_redirection()
            }
            Err(error) => {
                debug!(url, %error, "liveness probe failed");
                false
            }
        }
    }
}
