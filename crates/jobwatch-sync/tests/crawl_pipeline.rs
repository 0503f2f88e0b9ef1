use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use jobwatch_adapters::{ListingLayout, SourceConfig};
use jobwatch_core::{ExamLevel, LearnerProfile};
use jobwatch_storage::{FetchError, MemoryPostingStore, PageRenderer, PostingStore, SourceFetcher};
use jobwatch_sync::{
    CrawlPipeline, CycleOutcome, NotificationFanout, RecordingNotifier, SchedulerState,
    StaticProfileDirectory,
};
use tokio::sync::Notify;

const CSC_URL: &str = "https://careers.example.gov.ph/vacancies";
const PJN_URL: &str = "https://philjobnet.example.ph/government/";

fn fixture(name: &str) -> String {
    let path = Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("../../fixtures")
        .join(name)
        .join("listing.html");
    std::fs::read_to_string(&path).expect("read fixture")
}

struct FixtureRenderer {
    pages: HashMap<String, String>,
}

impl FixtureRenderer {
    fn standard() -> Self {
        let mut pages = HashMap::new();
        pages.insert(CSC_URL.to_string(), fixture("csc-careers"));
        pages.insert(PJN_URL.to_string(), fixture("philjobnet"));
        Self { pages }
    }
}

#[async_trait]
impl PageRenderer for FixtureRenderer {
    async fn render(&self, url: &str, _timeout: Duration) -> Result<String, FetchError> {
        self.pages.get(url).cloned().ok_or_else(|| FetchError::HttpStatus {
            status: 404,
            url: url.to_string(),
        })
    }
}

fn sources() -> Vec<SourceConfig> {
    vec![
        SourceConfig {
            name: "csc-careers".into(),
            url: CSC_URL.into(),
            listing_selector: "article.vacancy".into(),
            enabled: true,
            layout: ListingLayout::CivilServiceBoard,
        },
        SourceConfig {
            name: "broken-board".into(),
            url: "https://down.example.org/jobs".into(),
            listing_selector: "li".into(),
            enabled: true,
            layout: ListingLayout::Generic,
        },
        SourceConfig {
            name: "philjobnet".into(),
            url: PJN_URL.into(),
            listing_selector: "li.job-card".into(),
            enabled: true,
            layout: ListingLayout::PhilJobNet,
        },
        SourceConfig {
            name: "paused".into(),
            url: CSC_URL.into(),
            listing_selector: "article.vacancy".into(),
            enabled: false,
            layout: ListingLayout::CivilServiceBoard,
        },
    ]
}

fn pipeline(store: Arc<MemoryPostingStore>, renderer: Arc<dyn PageRenderer>) -> CrawlPipeline {
    CrawlPipeline::new(
        sources(),
        SourceFetcher::new(renderer, Duration::from_secs(30)),
        store,
    )
    .with_source_delay(Duration::ZERO)
}

fn completed(outcome: CycleOutcome) -> jobwatch_sync::CrawlCycleReport {
    match outcome {
        CycleOutcome::Completed(report) => report,
        CycleOutcome::Skipped => panic!("cycle was skipped"),
    }
}

#[tokio::test]
async fn repeated_crawls_do_not_duplicate_postings() {
    let store = Arc::new(MemoryPostingStore::new());
    let pipeline = pipeline(store.clone(), Arc::new(FixtureRenderer::standard()));

    let first = completed(pipeline.crawl_all_sources().await);
    assert_eq!(first.sources.len(), 3);
    assert_eq!(first.inserted(), 5);
    assert_eq!(first.failed_sources(), 1);
    assert_eq!(store.count().await.unwrap(), 5);

    let csc = &first.sources[0];
    assert_eq!(csc.listings_found, 4);
    assert_eq!(csc.extraction_failures, 1);
    assert_eq!(csc.deadline_fallbacks, 1);
    assert!(first.sources[1].error.as_deref().unwrap_or_default().contains("404"));

    let second = completed(pipeline.crawl_all_sources().await);
    assert_eq!(second.inserted(), 0);
    assert_eq!(second.sources.iter().map(|s| s.unchanged).sum::<usize>(), 5);
    assert_eq!(store.count().await.unwrap(), 5);
    assert_eq!(pipeline.state(), SchedulerState::Idle);
}

#[tokio::test]
async fn unparsable_deadline_gets_thirty_day_fallback() {
    let store = Arc::new(MemoryPostingStore::new());
    let pipeline = pipeline(store.clone(), Arc::new(FixtureRenderer::standard()));
    let before = Utc::now();
    completed(pipeline.crawl_all_sources().await);

    let nurse = store
        .list_all()
        .await
        .into_iter()
        .find(|p| p.title == "Nurse I")
        .expect("nurse posting stored");
    let expected = before + chrono::Duration::days(30);
    let drift = (nurse.application_deadline - expected).num_seconds().abs();
    assert!(drift < 120, "deadline drifted by {drift}s");
}

#[tokio::test]
async fn new_high_scoring_postings_fan_out_once() {
    let store = Arc::new(MemoryPostingStore::new());
    let subscriber = LearnerProfile {
        learner_id: "learner-7".into(),
        exam_type: Some(ExamLevel::Professional),
        preferred_work_locations: vec!["Metro Manila".into()],
        target_positions: vec!["Administrative Officer".into()],
        enable_job_matching: true,
        job_alerts: true,
        profile_complete: true,
        ..LearnerProfile::default()
    };
    let muted = LearnerProfile {
        learner_id: "learner-8".into(),
        job_alerts: false,
        ..subscriber.clone()
    };
    let profiles = Arc::new(StaticProfileDirectory::new(vec![subscriber, muted]));
    let notifier = Arc::new(RecordingNotifier::default());
    let pipeline = pipeline(store.clone(), Arc::new(FixtureRenderer::standard()))
        .with_notifications(NotificationFanout::new(profiles, notifier.clone(), 70));

    let report = completed(pipeline.crawl_all_sources().await);
    assert_eq!(report.notifications, 1);
    let sent = notifier.sent().await;
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].0, "learner-7");
    let posting = store.get(sent[0].1).await.unwrap().unwrap();
    assert_eq!(posting.title, "Administrative Officer II");

    let again = completed(pipeline.crawl_all_sources().await);
    assert_eq!(again.notifications, 0);
    assert_eq!(notifier.sent().await.len(), 1);
}

struct GatedRenderer {
    entered: Arc<Notify>,
    release: Arc<Notify>,
}

#[async_trait]
impl PageRenderer for GatedRenderer {
    async fn render(&self, _url: &str, _timeout: Duration) -> Result<String, FetchError> {
        self.entered.notify_one();
        self.release.notified().await;
        Ok("<html><body></body></html>".to_string())
    }
}

#[tokio::test]
async fn overlapping_trigger_is_skipped() {
    let entered = Arc::new(Notify::new());
    let release = Arc::new(Notify::new());
    let renderer = Arc::new(GatedRenderer {
        entered: entered.clone(),
        release: release.clone(),
    });
    let store = Arc::new(MemoryPostingStore::new());
    let pipeline = Arc::new(
        CrawlPipeline::new(
            sources().into_iter().take(1).collect(),
            SourceFetcher::new(renderer, Duration::from_secs(30)),
            store,
        )
        .with_source_delay(Duration::ZERO),
    );

    let running = pipeline.clone();
    let first = tokio::spawn(async move { running.crawl_all_sources().await });
    entered.notified().await;
    assert_eq!(pipeline.state(), SchedulerState::Running);
    assert_eq!(pipeline.crawl_all_sources().await, CycleOutcome::Skipped);

    release.notify_one();
    let outcome = first.await.unwrap();
    assert!(matches!(outcome, CycleOutcome::Completed(_)));
    assert_eq!(pipeline.state(), SchedulerState::Idle);
}
