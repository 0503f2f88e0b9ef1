//! Crawl cycle orchestration: validation, upsert policy, cleanup sweep,
//! scheduling and alert fan-out.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use jobwatch_adapters::{extract_listings, SourceConfig};
use jobwatch_core::{JobPosting, LearnerProfile, Notifier, PostingDraft, PostingStatus, ProfileDirectory};
use jobwatch_match::score_posting;
use jobwatch_storage::{
    BackoffPolicy, HttpPageRenderer, MemoryPostingStore, PageRenderer, PgPostingStore, PostingStore,
    SharedStore, SourceFetcher, StoreError, DEFAULT_USER_AGENT,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::fs;
use tokio::sync::Mutex;
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// A stored posting younger than this is left alone by a re-crawl.
pub const STALENESS_DAYS: i64 = 7;
pub const MIN_TITLE_LEN: usize = 3;

#[derive(Debug, Clone, Deserialize)]
pub struct SourceRegistry {
    pub sources: Vec<SourceConfig>,
}

impl SourceRegistry {
    pub async fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .await
            .with_context(|| format!("reading {}", path.display()))?;
        serde_yaml::from_str(&text).with_context(|| format!("parsing {}", path.display()))
    }

    pub fn enabled(&self) -> Vec<SourceConfig> {
        self.sources.iter().filter(|s| s.enabled).cloned().collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RendererKind {
    #[default]
    Http,
    Browser,
}

impl RendererKind {
    fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "http" => Some(Self::Http),
            "browser" | "chromium" => Some(Self::Browser),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SyncConfig {
    pub database_url: Option<String>,
    pub sources_path: PathBuf,
    pub profiles_path: PathBuf,
    pub crawl_interval: Duration,
    pub source_delay: Duration,
    pub fetch_timeout: Duration,
    pub user_agent: String,
    pub renderer: RendererKind,
    pub notify_threshold: u32,
    pub bind_addr: String,
}

fn env_secs(name: &str, default: u64) -> Duration {
    Duration::from_secs(
        std::env::var(name)
            .ok()
            .and_then(|v| v.trim().parse().ok())
            .unwrap_or(default),
    )
}

impl SyncConfig {
    pub fn from_env() -> Self {
        Self {
            database_url: std::env::var("DATABASE_URL").ok().filter(|v| !v.trim().is_empty()),
            sources_path: std::env::var("JOBWATCH_SOURCES")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("./sources.yaml")),
            profiles_path: std::env::var("JOBWATCH_PROFILES")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("./profiles.yaml")),
            crawl_interval: env_secs("JOBWATCH_CRAWL_INTERVAL_SECS", 6 * 60 * 60),
            source_delay: env_secs("JOBWATCH_SOURCE_DELAY_SECS", 5),
            fetch_timeout: env_secs("JOBWATCH_FETCH_TIMEOUT_SECS", 30),
            user_agent: std::env::var("JOBWATCH_USER_AGENT")
                .unwrap_or_else(|_| DEFAULT_USER_AGENT.to_string()),
            renderer: std::env::var("JOBWATCH_RENDERER")
                .ok()
                .and_then(|v| RendererKind::parse(&v))
                .unwrap_or_default(),
            notify_threshold: std::env::var("JOBWATCH_NOTIFY_THRESHOLD")
                .ok()
                .and_then(|v| v.trim().parse().ok())
                .unwrap_or(70),
            bind_addr: std::env::var("JOBWATCH_BIND").unwrap_or_else(|_| "0.0.0.0:8080".to_string()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum Rejection {
    #[error("title too short")]
    TitleTooShort,
    #[error("department missing")]
    MissingDepartment,
    #[error("application deadline missing")]
    MissingDeadline,
    #[error("application deadline already passed")]
    DeadlinePassed,
}

/// Accept or reject a candidate. Returns the deadline to store on success.
pub fn validate(draft: &PostingDraft, now: DateTime<Utc>) -> Result<DateTime<Utc>, Rejection> {
    if draft.title.trim().chars().count() <= MIN_TITLE_LEN {
        return Err(Rejection::TitleTooShort);
    }
    if draft.department.trim().is_empty() {
        return Err(Rejection::MissingDepartment);
    }
    let deadline = draft.application_deadline.ok_or(Rejection::MissingDeadline)?;
    if deadline <= now {
        return Err(Rejection::DeadlinePassed);
    }
    Ok(deadline)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Inserted(Uuid),
    Refreshed(Uuid),
    Unchanged(Uuid),
}

pub fn is_stale(existing: &JobPosting, now: DateTime<Utc>) -> bool {
    existing.status == PostingStatus::Expired
        || now - existing.last_updated >= chrono::Duration::days(STALENESS_DAYS)
}

/// Insert a new posting, or refresh the stored one when it is stale.
/// Not atomic against concurrent writers; crawl cycles are serialized.
pub async fn upsert_posting(
    store: &dyn PostingStore,
    draft: PostingDraft,
    deadline: DateTime<Utc>,
    now: DateTime<Utc>,
) -> Result<UpsertOutcome, StoreError> {
    match store.find_by_key(&draft.key()).await? {
        None => {
            let posting = JobPosting::from_draft(draft, deadline, now);
            store.insert(&posting).await?;
            Ok(UpsertOutcome::Inserted(posting.id))
        }
        Some(mut existing) if is_stale(&existing, now) => {
            existing.refresh_from(draft, deadline, now);
            store.update(existing.id, &existing).await?;
            Ok(UpsertOutcome::Refreshed(existing.id))
        }
        Some(existing) => Ok(UpsertOutcome::Unchanged(existing.id)),
    }
}

/// Flip active postings past their deadline to expired.
pub async fn cleanup_expired_jobs(store: &dyn PostingStore, now: DateTime<Utc>) -> Result<u64, StoreError> {
    let expired = store.update_many_expired(now).await?;
    info!(expired, "expired postings swept");
    Ok(expired)
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SourceReport {
    pub source: String,
    pub listings_found: usize,
    pub extracted: usize,
    pub extraction_failures: usize,
    pub rejected: usize,
    pub inserted: usize,
    pub refreshed: usize,
    pub unchanged: usize,
    pub store_failures: usize,
    pub deadline_fallbacks: usize,
    pub error: Option<String>,
    #[serde(skip)]
    pub inserted_ids: Vec<Uuid>,
}

impl SourceReport {
    fn new(source: &str) -> Self {
        Self {
            source: source.to_string(),
            ..Self::default()
        }
    }

    /// Share of found listings that never made it to the store.
    pub fn rejection_rate(&self) -> f64 {
        if self.listings_found == 0 {
            return 0.0;
        }
        (self.extraction_failures + self.rejected) as f64 / self.listings_found as f64
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CrawlCycleReport {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub sources: Vec<SourceReport>,
    pub notifications: usize,
}

impl CrawlCycleReport {
    pub fn inserted(&self) -> usize {
        self.sources.iter().map(|s| s.inserted).sum()
    }

    pub fn failed_sources(&self) -> usize {
        self.sources.iter().filter(|s| s.error.is_some()).count()
    }

    pub fn new_posting_ids(&self) -> Vec<Uuid> {
        self.sources
            .iter()
            .flat_map(|s| s.inserted_ids.iter().copied())
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum CycleOutcome {
    Completed(CrawlCycleReport),
    /// Another cycle was still running.
    Skipped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SchedulerState {
    Idle,
    Running,
}

/// Two-state gate: only one crawl cycle may hold it at a time.
#[derive(Debug, Default)]
pub struct CycleGate {
    running: AtomicBool,
}

impl CycleGate {
    pub fn try_begin(&self) -> Option<CycleGuard<'_>> {
        self.running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| CycleGuard { gate: self })
    }

    pub fn state(&self) -> SchedulerState {
        if self.running.load(Ordering::Acquire) {
            SchedulerState::Running
        } else {
            SchedulerState::Idle
        }
    }
}

/// Returns the gate to `Idle` when dropped, including during unwinding.
pub struct CycleGuard<'a> {
    gate: &'a CycleGate,
}

impl Drop for CycleGuard<'_> {
    fn drop(&mut self) {
        self.gate.running.store(false, Ordering::Release);
    }
}

#[derive(Clone)]
pub struct NotificationFanout {
    profiles: Arc<dyn ProfileDirectory>,
    notifier: Arc<dyn Notifier>,
    threshold: u32,
}

impl NotificationFanout {
    pub fn new(profiles: Arc<dyn ProfileDirectory>, notifier: Arc<dyn Notifier>, threshold: u32) -> Self {
        Self {
            profiles,
            notifier,
            threshold,
        }
    }

    /// One request per (subscriber, posting) pair scoring at or above the
    /// threshold. Returns the number of requests emitted.
    pub async fn dispatch(&self, store: &dyn PostingStore, new_ids: &[Uuid]) -> usize {
        if new_ids.is_empty() {
            return 0;
        }
        let subscribers = match self.profiles.alert_subscribers().await {
            Ok(subs) => subs.into_iter().filter(LearnerProfile::wants_alerts).collect::<Vec<_>>(),
            Err(err) => {
                warn!(error = %format!("{err:#}"), "loading alert subscribers failed");
                return 0;
            }
        };
        if subscribers.is_empty() {
            return 0;
        }

        let mut sent = 0;
        for id in new_ids {
            let posting = match store.get(*id).await {
                Ok(Some(p)) => p,
                Ok(None) => continue,
                Err(err) => {
                    warn!(posting_id = %id, error = %err, "loading new posting failed");
                    continue;
                }
            };
            for learner in &subscribers {
                let (score, _) = score_posting(learner, &posting);
                if score >= self.threshold {
                    self.notifier.notify(&learner.learner_id, posting.id).await;
                    sent += 1;
                }
            }
        }
        sent
    }
}

/// Logs each request; delivery is handled elsewhere.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingNotifier;

#[async_trait]
impl Notifier for LoggingNotifier {
    async fn notify(&self, recipient_id: &str, job_id: Uuid) {
        info!(recipient_id, %job_id, "job alert requested");
    }
}

#[derive(Debug, Default)]
pub struct RecordingNotifier {
    sent: Mutex<Vec<(String, Uuid)>>,
}

impl RecordingNotifier {
    pub async fn sent(&self) -> Vec<(String, Uuid)> {
        self.sent.lock().await.clone()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(&self, recipient_id: &str, job_id: Uuid) {
        self.sent.lock().await.push((recipient_id.to_string(), job_id));
    }
}

/// Profile directory backed by a YAML file, for local runs.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct StaticProfileDirectory {
    #[serde(default)]
    profiles: Vec<LearnerProfile>,
}

impl StaticProfileDirectory {
    pub fn new(profiles: Vec<LearnerProfile>) -> Self {
        Self { profiles }
    }

    /// A missing file yields an empty directory.
    pub async fn load(path: &Path) -> Result<Self> {
        if !fs::try_exists(path).await.unwrap_or(false) {
            warn!(path = %path.display(), "profile file not found; no learners loaded");
            return Ok(Self::default());
        }
        let text = fs::read_to_string(path)
            .await
            .with_context(|| format!("reading {}", path.display()))?;
        serde_yaml::from_str(&text).with_context(|| format!("parsing {}", path.display()))
    }

    pub fn len(&self) -> usize {
        self.profiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.profiles.is_empty()
    }
}

#[async_trait]
impl ProfileDirectory for StaticProfileDirectory {
    async fn profile(&self, learner_id: &str) -> Result<Option<LearnerProfile>> {
        Ok(self.profiles.iter().find(|p| p.learner_id == learner_id).cloned())
    }

    async fn alert_subscribers(&self) -> Result<Vec<LearnerProfile>> {
        Ok(self.profiles.iter().filter(|p| p.wants_alerts()).cloned().collect())
    }
}

pub struct CrawlPipeline {
    sources: Vec<SourceConfig>,
    fetcher: SourceFetcher,
    store: SharedStore,
    fanout: Option<NotificationFanout>,
    source_delay: Duration,
    gate: CycleGate,
}

impl CrawlPipeline {
    pub fn new(sources: Vec<SourceConfig>, fetcher: SourceFetcher, store: SharedStore) -> Self {
        Self {
            sources,
            fetcher,
            store,
            fanout: None,
            source_delay: Duration::from_secs(5),
            gate: CycleGate::default(),
        }
    }

    pub fn with_source_delay(mut self, delay: Duration) -> Self {
        self.source_delay = delay;
        self
    }

    pub fn with_notifications(mut self, fanout: NotificationFanout) -> Self {
        self.fanout = Some(fanout);
        self
    }

    pub fn store(&self) -> SharedStore {
        self.store.clone()
    }

    pub fn state(&self) -> SchedulerState {
        self.gate.state()
    }

    /// Run one pass over the enabled sources, in order. A trigger that
    /// arrives while a pass is running returns `Skipped`.
    pub async fn crawl_all_sources(&self) -> CycleOutcome {
        let Some(_guard) = self.gate.try_begin() else {
            info!("crawl cycle already running; trigger skipped");
            return CycleOutcome::Skipped;
        };

        let run_id = Uuid::new_v4();
        let started_at = Utc::now();
        let enabled = self.sources.iter().filter(|s| s.enabled).collect::<Vec<_>>();
        info!(%run_id, sources = enabled.len(), "crawl cycle started");

        let mut reports = Vec::with_capacity(enabled.len());
        for (i, source) in enabled.into_iter().enumerate() {
            if i > 0 && !self.source_delay.is_zero() {
                tokio::time::sleep(self.source_delay).await;
            }
            let report = self.crawl_source(source).await;
            info!(
                source = %report.source,
                listings = report.listings_found,
                inserted = report.inserted,
                refreshed = report.refreshed,
                unchanged = report.unchanged,
                rejected = report.rejected,
                rejection_rate = report.rejection_rate(),
                failed = report.error.is_some(),
                "source crawled"
            );
            reports.push(report);
        }

        let mut report = CrawlCycleReport {
            run_id,
            started_at,
            finished_at: started_at,
            sources: reports,
            notifications: 0,
        };
        if let Some(fanout) = &self.fanout {
            report.notifications = fanout
                .dispatch(self.store.as_ref(), &report.new_posting_ids())
                .await;
        }
        report.finished_at = Utc::now();
        info!(
            %run_id,
            inserted = report.inserted(),
            failed_sources = report.failed_sources(),
            notifications = report.notifications,
            "crawl cycle finished"
        );
        CycleOutcome::Completed(report)
    }

    /// Everything that can go wrong for one source ends up in its report.
    async fn crawl_source(&self, source: &SourceConfig) -> SourceReport {
        let mut report = SourceReport::new(&source.name);

        let html = match self.fetcher.fetch(&source.name, &source.url).await {
            Ok(html) => html,
            Err(err) => {
                report.error = Some(err.to_string());
                return report;
            }
        };

        let now = Utc::now();
        let extraction = match extract_listings(&html, source, now) {
            Ok(extraction) => extraction,
            Err(err) => {
                warn!(source = %source.name, error = %err, "extraction failed");
                report.error = Some(err.to_string());
                return report;
            }
        };
        report.listings_found = extraction.listings_found;
        report.extracted = extraction.drafts.len();
        report.extraction_failures = extraction.failures.len();

        for draft in extraction.drafts {
            if draft.deadline_fallback {
                report.deadline_fallbacks += 1;
            }
            let deadline = match validate(&draft, now) {
                Ok(deadline) => deadline,
                Err(reason) => {
                    debug!(source = %source.name, title = %draft.title, %reason, "candidate rejected");
                    report.rejected += 1;
                    continue;
                }
            };
            let title = draft.title.clone();
            match upsert_posting(self.store.as_ref(), draft, deadline, now).await {
                Ok(UpsertOutcome::Inserted(id)) => {
                    report.inserted += 1;
                    report.inserted_ids.push(id);
                }
                Ok(UpsertOutcome::Refreshed(_)) => report.refreshed += 1,
                Ok(UpsertOutcome::Unchanged(_)) => report.unchanged += 1,
                Err(err) => {
                    warn!(source = %source.name, %title, error = %err, "storing posting failed");
                    report.store_failures += 1;
                }
            }
        }
        if report.rejection_rate() > 0.5 {
            warn!(
                source = %source.name,
                rejection_rate = report.rejection_rate(),
                "most listings rejected; extraction rules may be stale"
            );
        }
        report
    }

    pub async fn cleanup_expired_jobs(&self) -> Result<u64, StoreError> {
        cleanup_expired_jobs(self.store.as_ref(), Utc::now()).await
    }

    /// A crawl cycle followed by the cleanup sweep. Never fails.
    pub async fn run_scheduled_cycle(&self) {
        if let CycleOutcome::Skipped = self.crawl_all_sources().await {
            return;
        }
        if let Err(err) = self.cleanup_expired_jobs().await {
            warn!(error = %err, "cleanup sweep failed");
        }
    }
}

/// Schedule a cycle every `interval` and trigger one immediately. The returned
/// scheduler is already started; shut it down to stop crawling.
pub async fn start_periodic_crawling(
    pipeline: Arc<CrawlPipeline>,
    interval: Duration,
) -> Result<JobScheduler> {
    let sched = JobScheduler::new().await.context("creating scheduler")?;
    let scheduled = pipeline.clone();
    let job = Job::new_repeated_async(interval, move |_uuid, _l| {
        let pipeline = scheduled.clone();
        Box::pin(async move {
            pipeline.run_scheduled_cycle().await;
        })
    })
    .with_context(|| format!("creating crawl job every {interval:?}"))?;
    sched.add(job).await.context("adding crawl job")?;
    sched.start().await.context("starting scheduler")?;
    info!(interval_secs = interval.as_secs(), "periodic crawling started");

    tokio::spawn(async move {
        pipeline.run_scheduled_cycle().await;
    });
    Ok(sched)
}

/// Postgres when `DATABASE_URL` is set, otherwise an in-memory store.
pub async fn open_store(config: &SyncConfig) -> Result<SharedStore> {
    match &config.database_url {
        Some(url) => {
            let store = PgPostingStore::connect(url)
                .await
                .context("connecting to postgres")?;
            store.migrate().await.context("running migrations")?;
            Ok(Arc::new(store))
        }
        None => {
            warn!("DATABASE_URL not set; postings are kept in memory only");
            Ok(Arc::new(MemoryPostingStore::new()))
        }
    }
}

pub fn build_renderer(config: &SyncConfig) -> Result<Arc<dyn PageRenderer>> {
    match config.renderer {
        RendererKind::Http => Ok(Arc::new(
            HttpPageRenderer::new(&config.user_agent, BackoffPolicy::default())
                .context("building http renderer")?,
        )),
        #[cfg(feature = "browser")]
        RendererKind::Browser => Ok(Arc::new(jobwatch_storage::BrowserPageRenderer::new(
            config.user_agent.clone(),
        ))),
        #[cfg(not(feature = "browser"))]
        RendererKind::Browser => {
            anyhow::bail!("JOBWATCH_RENDERER=browser needs a build with the `browser` feature")
        }
    }
}

pub async fn build_pipeline(
    config: &SyncConfig,
    store: SharedStore,
    profiles: Arc<dyn ProfileDirectory>,
    notifier: Arc<dyn Notifier>,
) -> Result<CrawlPipeline> {
    let registry = SourceRegistry::load(&config.sources_path).await?;
    let fetcher = SourceFetcher::new(build_renderer(config)?, config.fetch_timeout);
    Ok(CrawlPipeline::new(registry.sources, fetcher, store)
        .with_source_delay(config.source_delay)
        .with_notifications(NotificationFanout::new(
            profiles,
            notifier,
            config.notify_threshold,
        )))
}
