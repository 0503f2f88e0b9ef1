//! Posting persistence and rendered-page retrieval.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use jobwatch_core::{ExamLevel, JobPosting, PostingKey, PostingStatus};
use reqwest::StatusCode;
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::types::Json;
use sqlx::{Postgres, QueryBuilder, Row};
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{info_span, warn, Instrument};
use uuid::Uuid;

#[cfg(feature = "browser")]
mod browser;
#[cfg(feature = "browser")]
pub use browser::BrowserPageRenderer;

pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
     (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("migration error: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),
    #[error("posting already stored for key {0}")]
    DuplicateKey(PostingKey),
    #[error("posting {0} not found")]
    NotFound(Uuid),
}

/// Read filter over active postings. Empty fields do not constrain.
#[derive(Debug, Clone, Default)]
pub struct ActiveFilter {
    /// Only postings whose deadline is strictly after this instant.
    pub open_at: Option<DateTime<Utc>>,
    /// Only postings whose deadline is at or before this instant.
    pub deadline_before: Option<DateTime<Utc>>,
    pub location_contains: Option<String>,
    pub department_contains: Option<String>,
    pub exam_level: Option<ExamLevel>,
    pub limit: Option<usize>,
}

impl ActiveFilter {
    pub fn open_at(now: DateTime<Utc>) -> Self {
        Self {
            open_at: Some(now),
            ..Self::default()
        }
    }

    fn matches(&self, posting: &JobPosting) -> bool {
        if posting.status != PostingStatus::Active {
            return false;
        }
        if let Some(at) = self.open_at {
            if posting.application_deadline <= at {
                return false;
            }
        }
        if let Some(before) = self.deadline_before {
            if posting.application_deadline > before {
                return false;
            }
        }
        if let Some(loc) = &self.location_contains {
            if !posting.location.to_lowercase().contains(&loc.to_lowercase()) {
                return false;
            }
        }
        if let Some(dept) = &self.department_contains {
            if !posting.department.to_lowercase().contains(&dept.to_lowercase()) {
                return false;
            }
        }
        if let Some(level) = self.exam_level {
            if posting.exam_level != level {
                return false;
            }
        }
        true
    }
}

/// Document store for postings keyed by `(title, department, source_website)`.
///
/// The read-then-write upsert built on top of this is not atomic; callers
/// serialize crawl cycles.
#[async_trait]
pub trait PostingStore: Send + Sync {
    async fn find_by_key(&self, key: &PostingKey) -> Result<Option<JobPosting>, StoreError>;

    async fn get(&self, id: Uuid) -> Result<Option<JobPosting>, StoreError>;

    async fn insert(&self, posting: &JobPosting) -> Result<(), StoreError>;

    async fn update(&self, id: Uuid, posting: &JobPosting) -> Result<(), StoreError>;

    /// Active postings matching `filter`, most recently posted first.
    async fn find_active(&self, filter: &ActiveFilter) -> Result<Vec<JobPosting>, StoreError>;

    /// Flip active postings whose deadline passed to expired. Returns the count.
    async fn update_many_expired(&self, now: DateTime<Utc>) -> Result<u64, StoreError>;

    async fn count(&self) -> Result<usize, StoreError>;
}

pub type SharedStore = Arc<dyn PostingStore>;

fn sort_recent_first(postings: &mut [JobPosting]) {
    postings.sort_by(|a, b| b.posted_date.cmp(&a.posted_date).then(a.id.cmp(&b.id)));
}

#[derive(Debug, Default)]
struct MemoryState {
    postings: HashMap<Uuid, JobPosting>,
    by_key: HashMap<PostingKey, Uuid>,
}

/// In-process store used for tests and database-less runs.
#[derive(Debug, Default)]
pub struct MemoryPostingStore {
    state: RwLock<MemoryState>,
}

impl MemoryPostingStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn list_all(&self) -> Vec<JobPosting> {
        let state = self.state.read().await;
        let mut all = state.postings.values().cloned().collect::<Vec<_>>();
        sort_recent_first(&mut all);
        all
    }
}

#[async_trait]
impl PostingStore for MemoryPostingStore {
    async fn find_by_key(&self, key: &PostingKey) -> Result<Option<JobPosting>, StoreError> {
        let state = self.state.read().await;
        Ok(state
            .by_key
            .get(key)
            .and_then(|id| state.postings.get(id))
            .cloned())
    }

    async fn get(&self, id: Uuid) -> Result<Option<JobPosting>, StoreError> {
        Ok(self.state.read().await.postings.get(&id).cloned())
    }

    async fn insert(&self, posting: &JobPosting) -> Result<(), StoreError> {
        let mut state = self.state.write().await;
        let key = posting.key();
        if state.by_key.contains_key(&key) {
            return Err(StoreError::DuplicateKey(key));
        }
        state.by_key.insert(key, posting.id);
        state.postings.insert(posting.id, posting.clone());
        Ok(())
    }

    async fn update(&self, id: Uuid, posting: &JobPosting) -> Result<(), StoreError> {
        let mut state = self.state.write().await;
        let Some(previous) = state.postings.get(&id) else {
            return Err(StoreError::NotFound(id));
        };
        let old_key = previous.key();
        let new_key = posting.key();
        if old_key != new_key {
            if state.by_key.contains_key(&new_key) {
                return Err(StoreError::DuplicateKey(new_key));
            }
            state.by_key.remove(&old_key);
            state.by_key.insert(new_key, id);
        }
        let mut stored = posting.clone();
        stored.id = id;
        state.postings.insert(id, stored);
        Ok(())
    }

    async fn find_active(&self, filter: &ActiveFilter) -> Result<Vec<JobPosting>, StoreError> {
        let state = self.state.read().await;
        let mut found = state
            .postings
            .values()
            .filter(|p| filter.matches(p))
            .cloned()
            .collect::<Vec<_>>();
        sort_recent_first(&mut found);
        if let Some(limit) = filter.limit {
            found.truncate(limit);
        }
        Ok(found)
    }

    async fn update_many_expired(&self, now: DateTime<Utc>) -> Result<u64, StoreError> {
        let mut state = self.state.write().await;
        let mut flipped = 0u64;
        for posting in state.postings.values_mut() {
            if posting.status == PostingStatus::Active && posting.application_deadline < now {
                posting.status = PostingStatus::Expired;
                posting.last_updated = now;
                flipped += 1;
            }
        }
        Ok(flipped)
    }

    async fn count(&self) -> Result<usize, StoreError> {
        Ok(self.state.read().await.postings.len())
    }
}

/// Postgres-backed store. The full record lives in a JSONB column; the key and
/// filter columns are duplicated alongside for indexing.
#[derive(Debug, Clone)]
pub struct PgPostingStore {
    pool: PgPool,
}

impl PgPostingStore {
    pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await?;
        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::migrate!("../../migrations").run(&self.pool).await?;
        Ok(())
    }
}

/// `ILIKE` pattern matching `needle` literally anywhere in the column.
fn contains_pattern(needle: &str) -> String {
    let mut pattern = String::with_capacity(needle.len() + 2);
    pattern.push('%');
    for ch in needle.chars() {
        if matches!(ch, '\\' | '%' | '_') {
            pattern.push('\\');
        }
        pattern.push(ch);
    }
    pattern.push('%');
    pattern
}

fn decode_record(row: &PgRow) -> Result<JobPosting, StoreError> {
    let Json(posting): Json<JobPosting> = row.try_get("record")?;
    Ok(posting)
}

#[async_trait]
impl PostingStore for PgPostingStore {
    async fn find_by_key(&self, key: &PostingKey) -> Result<Option<JobPosting>, StoreError> {
        let row = sqlx::query(
            "SELECT record FROM job_postings WHERE title = $1 AND department = $2 AND source_website = $3",
        )
        .bind(&key.title)
        .bind(&key.department)
        .bind(&key.source_website)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(decode_record).transpose()
    }

    async fn get(&self, id: Uuid) -> Result<Option<JobPosting>, StoreError> {
        let row = sqlx::query("SELECT record FROM job_postings WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(decode_record).transpose()
    }

    async fn insert(&self, posting: &JobPosting) -> Result<(), StoreError> {
        let result = sqlx::query(
            "INSERT INTO job_postings \
             (id, title, department, source_website, location, exam_level, status, \
              application_deadline, posted_date, last_updated, record) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)",
        )
        .bind(posting.id)
        .bind(&posting.title)
        .bind(&posting.department)
        .bind(&posting.source_website)
        .bind(&posting.location)
        .bind(posting.exam_level.label())
        .bind(posting.status.as_str())
        .bind(posting.application_deadline)
        .bind(posting.posted_date)
        .bind(posting.last_updated)
        .bind(Json(posting))
        .execute(&self.pool)
        .await;
        match result {
            Ok(_) => Ok(()),
            Err(sqlx::Error::Database(db)) if db.is_unique_violation() => {
                Err(StoreError::DuplicateKey(posting.key()))
            }
            Err(err) => Err(err.into()),
        }
    }

    async fn update(&self, id: Uuid, posting: &JobPosting) -> Result<(), StoreError> {
        let mut stored = posting.clone();
        stored.id = id;
        let result = sqlx::query(
            "UPDATE job_postings SET \
             title = $2, department = $3, source_website = $4, location = $5, exam_level = $6, \
             status = $7, application_deadline = $8, posted_date = $9, last_updated = $10, record = $11 \
             WHERE id = $1",
        )
        .bind(id)
        .bind(&stored.title)
        .bind(&stored.department)
        .bind(&stored.source_website)
        .bind(&stored.location)
        .bind(stored.exam_level.label())
        .bind(stored.status.as_str())
        .bind(stored.application_deadline)
        .bind(stored.posted_date)
        .bind(stored.last_updated)
        .bind(Json(&stored))
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(id));
        }
        Ok(())
    }

    async fn find_active(&self, filter: &ActiveFilter) -> Result<Vec<JobPosting>, StoreError> {
        let mut qb: QueryBuilder<Postgres> =
            QueryBuilder::new("SELECT record FROM job_postings WHERE status = 'active'");
        if let Some(at) = filter.open_at {
            qb.push(" AND application_deadline > ").push_bind(at);
        }
        if let Some(before) = filter.deadline_before {
            qb.push(" AND application_deadline <= ").push_bind(before);
        }
        if let Some(loc) = &filter.location_contains {
            qb.push(" AND location ILIKE ").push_bind(contains_pattern(loc));
        }
        if let Some(dept) = &filter.department_contains {
            qb.push(" AND department ILIKE ").push_bind(contains_pattern(dept));
        }
        if let Some(level) = filter.exam_level {
            qb.push(" AND exam_level = ").push_bind(level.label());
        }
        qb.push(" ORDER BY posted_date DESC, id ASC");
        if let Some(limit) = filter.limit {
            qb.push(" LIMIT ").push_bind(limit as i64);
        }
        let rows = qb.build().fetch_all(&self.pool).await?;
        rows.iter().map(decode_record).collect()
    }

    async fn update_many_expired(&self, now: DateTime<Utc>) -> Result<u64, StoreError> {
        let result = sqlx::query(
            "UPDATE job_postings SET \
             status = 'expired', last_updated = $1, \
             record = jsonb_set(jsonb_set(record, '{status}', '\"expired\"'::jsonb), \
                                '{last_updated}', to_jsonb($1::timestamptz)) \
             WHERE status = 'active' AND application_deadline < $1",
        )
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn count(&self) -> Result<usize, StoreError> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM job_postings")
            .fetch_one(&self.pool)
            .await?;
        Ok(count.max(0) as usize)
    }
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request failed after retries: {0}")]
    Request(#[from] reqwest::Error),
    #[error("http status {status} for {url}")]
    HttpStatus { status: u16, url: String },
    #[error("timed out after {after:?} fetching {url}")]
    Timeout { url: String, after: Duration },
    #[error("browser session failed: {0}")]
    Browser(String),
}

/// Turns a URL into rendered HTML. Implementations own their session and must
/// release it before returning, including on timeout.
#[async_trait]
pub trait PageRenderer: Send + Sync {
    async fn render(&self, url: &str, timeout: Duration) -> Result<String, FetchError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDisposition {
    Retryable,
    NonRetryable,
}

pub fn classify_status(status: StatusCode) -> RetryDisposition {
    if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
        RetryDisposition::Retryable
    } else {
        RetryDisposition::NonRetryable
    }
}

pub fn classify_reqwest_error(err: &reqwest::Error) -> RetryDisposition {
    if err.is_timeout() || err.is_connect() || err.is_request() {
        RetryDisposition::Retryable
    } else {
        RetryDisposition::NonRetryable
    }
}

#[derive(Debug, Clone, Copy)]
pub struct BackoffPolicy {
    pub max_retries: usize,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            max_retries: 2,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(5),
        }
    }
}

impl BackoffPolicy {
    pub fn delay_for_attempt(&self, attempt_index: usize) -> Duration {
        let factor = 1u32.checked_shl(attempt_index as u32).unwrap_or(u32::MAX);
        let delay = self.base_delay.saturating_mul(factor);
        delay.min(self.max_delay)
    }
}

/// Plain HTTP renderer for sources that serve listings without scripting.
#[derive(Debug, Clone)]
pub struct HttpPageRenderer {
    client: reqwest::Client,
    backoff: BackoffPolicy,
}

impl HttpPageRenderer {
    pub fn new(user_agent: &str, backoff: BackoffPolicy) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .gzip(true)
            .brotli(true)
            .user_agent(user_agent)
            .build()?;
        Ok(Self { client, backoff })
    }

    async fn fetch_with_retries(&self, url: &str) -> Result<String, FetchError> {
        let mut attempt = 0;
        loop {
            match self.client.get(url).send().await {
                Ok(resp) => {
                    let status = resp.status();
                    if status.is_success() {
                        return Ok(resp.text().await?);
                    }
                    if classify_status(status) == RetryDisposition::Retryable
                        && attempt < self.backoff.max_retries
                    {
                        tokio::time::sleep(self.backoff.delay_for_attempt(attempt)).await;
                        attempt += 1;
                        continue;
                    }
                    return Err(FetchError::HttpStatus {
                        status: status.as_u16(),
                        url: resp.url().to_string(),
                    });
                }
                Err(err) => {
                    if classify_reqwest_error(&err) == RetryDisposition::Retryable
                        && attempt < self.backoff.max_retries
                    {
                        tokio::time::sleep(self.backoff.delay_for_attempt(attempt)).await;
                        attempt += 1;
                        continue;
                    }
                    return Err(FetchError::Request(err));
                }
            }
        }
    }
}

#[async_trait]
impl PageRenderer for HttpPageRenderer {
    async fn render(&self, url: &str, timeout: Duration) -> Result<String, FetchError> {
        tokio::time::timeout(timeout, self.fetch_with_retries(url))
            .await
            .map_err(|_| FetchError::Timeout {
                url: url.to_string(),
                after: timeout,
            })?
    }
}

/// Per-source page retrieval bounded by a fixed timeout.
#[derive(Clone)]
pub struct SourceFetcher {
    renderer: Arc<dyn PageRenderer>,
    timeout: Duration,
}

impl SourceFetcher {
    pub fn new(renderer: Arc<dyn PageRenderer>, timeout: Duration) -> Self {
        Self { renderer, timeout }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Failures propagate to the caller; nothing is swallowed here. The
    /// timeout is enforced here as well as being handed to the renderer.
    pub async fn fetch(&self, source_name: &str, url: &str) -> Result<String, FetchError> {
        let span = info_span!("render_page", source = source_name, url);
        let render = self.renderer.render(url, self.timeout).instrument(span);
        let result = tokio::time::timeout(self.timeout, render)
            .await
            .unwrap_or_else(|_| {
                Err(FetchError::Timeout {
                    url: url.to_string(),
                    after: self.timeout,
                })
            });
        if let Err(err) = &result {
            warn!(source = source_name, url, error = %err, "page render failed");
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration as ChronoDuration, TimeZone};
    use jobwatch_core::{JobLevel, Requirements};

    fn at(day: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, day, 12, 0, 0).unwrap()
    }

    fn posting(title: &str, deadline: DateTime<Utc>, posted: DateTime<Utc>) -> JobPosting {
        JobPosting {
            id: Uuid::new_v4(),
            title: title.to_string(),
            department: "Department of Health".into(),
            agency: "DOH".into(),
            location: "Metro Manila, NCR".into(),
            salary_grade: None,
            salary_range: None,
            job_level: JobLevel::Entry,
            exam_level: ExamLevel::Professional,
            description: String::new(),
            qualifications: vec![],
            requirements: Requirements::default(),
            application_deadline: deadline,
            application_method: "Online".into(),
            application_url: None,
            source_url: "https://example.gov.ph".into(),
            source_website: "csc-careers".into(),
            posted_date: posted,
            last_updated: posted,
            crawled_at: posted,
            matching_keywords: vec![],
            status: PostingStatus::Active,
            view_count: 0,
            application_count: 0,
            is_verified: false,
        }
    }

    #[tokio::test]
    async fn memory_store_rejects_duplicate_keys() {
        let store = MemoryPostingStore::new();
        let first = posting("Nurse I", at(20), at(1));
        store.insert(&first).await.unwrap();
        let mut dup = posting("Nurse I", at(25), at(2));
        dup.agency = "Other".into();
        let err = store.insert(&dup).await.unwrap_err();
        assert!(matches!(err, StoreError::DuplicateKey(_)));
        assert_eq!(store.count().await.unwrap(), 1);

        let found = store.find_by_key(&first.key()).await.unwrap().unwrap();
        assert_eq!(found.id, first.id);
    }

    #[tokio::test]
    async fn memory_store_update_requires_existing_id() {
        let store = MemoryPostingStore::new();
        let p = posting("Nurse I", at(20), at(1));
        let err = store.update(p.id, &p).await.unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));

        store.insert(&p).await.unwrap();
        let mut changed = p.clone();
        changed.description = "new".into();
        store.update(p.id, &changed).await.unwrap();
        assert_eq!(store.get(p.id).await.unwrap().unwrap().description, "new");
    }

    #[tokio::test]
    async fn find_active_filters_and_orders_by_posted_date() {
        let store = MemoryPostingStore::new();
        let older = posting("Nurse I", at(20), at(1));
        let newer = posting("Nurse II", at(20), at(3));
        let closed = posting("Nurse III", at(2), at(4));
        let mut filled = posting("Nurse IV", at(20), at(5));
        filled.status = PostingStatus::Filled;
        let mut provincial = posting("Nurse V", at(20), at(2));
        provincial.location = "Cebu City".into();
        for p in [&older, &newer, &closed, &filled, &provincial] {
            store.insert(p).await.unwrap();
        }

        let open = store.find_active(&ActiveFilter::open_at(at(10))).await.unwrap();
        let titles = open.iter().map(|p| p.title.as_str()).collect::<Vec<_>>();
        assert_eq!(titles, vec!["Nurse II", "Nurse V", "Nurse I"]);

        let manila = store
            .find_active(&ActiveFilter {
                location_contains: Some("metro manila".into()),
                limit: Some(1),
                ..ActiveFilter::open_at(at(10))
            })
            .await
            .unwrap();
        assert_eq!(manila.len(), 1);
        assert_eq!(manila[0].title, "Nurse II");

        let urgent = store
            .find_active(&ActiveFilter {
                deadline_before: Some(at(10) + ChronoDuration::days(7)),
                ..ActiveFilter::open_at(at(10))
            })
            .await
            .unwrap();
        assert!(urgent.is_empty());
    }

    #[tokio::test]
    async fn update_many_expired_only_touches_past_active_postings() {
        let store = MemoryPostingStore::new();
        let past = posting("Clerk I", at(5), at(1));
        let future = posting("Clerk II", at(25), at(1));
        store.insert(&past).await.unwrap();
        store.insert(&future).await.unwrap();

        let flipped = store.update_many_expired(at(10)).await.unwrap();
        assert_eq!(flipped, 1);
        let past_now = store.get(past.id).await.unwrap().unwrap();
        assert_eq!(past_now.status, PostingStatus::Expired);
        assert_eq!(past_now.last_updated, at(10));
        let future_now = store.get(future.id).await.unwrap().unwrap();
        assert_eq!(future_now.status, PostingStatus::Active);
        assert_eq!(future_now.last_updated, at(1));

        assert_eq!(store.update_many_expired(at(10)).await.unwrap(), 0);
    }

    #[test]
    fn backoff_logic_is_exponential_and_capped() {
        let policy = BackoffPolicy {
            max_retries: 5,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(350),
        };

        assert_eq!(policy.delay_for_attempt(0), Duration::from_millis(100));
        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(200));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_millis(350));
        assert_eq!(policy.delay_for_attempt(5), Duration::from_millis(350));
    }

    #[test]
    fn ilike_patterns_escape_wildcards() {
        assert_eq!(contains_pattern("Manila"), "%Manila%");
        assert_eq!(contains_pattern("100%_remote"), "%100\\%\\_remote%");
        assert_eq!(contains_pattern(r"a\b"), r"%a\\b%");
    }

    #[tokio::test]
    async fn memory_store_treats_wildcards_literally() {
        let store = MemoryPostingStore::new();
        store.insert(&posting("Nurse I", at(20), at(1))).await.unwrap();
        let filter = ActiveFilter {
            location_contains: Some("%".into()),
            ..ActiveFilter::open_at(at(10))
        };
        assert!(store.find_active(&filter).await.unwrap().is_empty());
    }

    #[test]
    fn status_classification() {
        assert_eq!(classify_status(StatusCode::BAD_GATEWAY), RetryDisposition::Retryable);
        assert_eq!(classify_status(StatusCode::TOO_MANY_REQUESTS), RetryDisposition::Retryable);
        assert_eq!(classify_status(StatusCode::NOT_FOUND), RetryDisposition::NonRetryable);
    }

    /// Ignores the timeout it is handed.
    struct StallingRenderer;

    #[async_trait]
    impl PageRenderer for StallingRenderer {
        async fn render(&self, _url: &str, _timeout: Duration) -> Result<String, FetchError> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok("<html></html>".to_string())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn source_fetcher_bounds_renderers_that_ignore_the_timeout() {
        let fetcher = SourceFetcher::new(Arc::new(StallingRenderer), Duration::from_secs(30));
        let started = tokio::time::Instant::now();
        let err = fetcher
            .fetch("slow-board", "https://slow.example.org")
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            FetchError::Timeout { after, .. } if after == Duration::from_secs(30)
        ));
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_secs(30) && elapsed < Duration::from_secs(31));
    }
}
