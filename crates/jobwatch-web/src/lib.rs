//! JSON surface over crawling, cleanup and matching.

use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use jobwatch_core::ExamLevel;
use jobwatch_match::{MatchError, MatchingEngine, RecommendationCategory};
use jobwatch_storage::ActiveFilter;
use jobwatch_sync::{
    build_pipeline, open_store, start_periodic_crawling, CrawlPipeline, CycleOutcome, LoggingNotifier,
    StaticProfileDirectory, SyncConfig,
};
use serde::Deserialize;
use serde_json::json;
use tokio::net::TcpListener;
use tracing::{error, info};

pub const DEFAULT_LIMIT: usize = 20;
pub const MAX_LIMIT: usize = 200;

#[derive(Clone)]
pub struct AppState {
    pub pipeline: Arc<CrawlPipeline>,
    pub engine: MatchingEngine,
}

impl AppState {
    pub fn new(pipeline: Arc<CrawlPipeline>, engine: MatchingEngine) -> Self {
        Self { pipeline, engine }
    }
}

#[derive(Debug, Default, Deserialize)]
struct PostingsQuery {
    location: Option<String>,
    department: Option<String>,
    exam_level: Option<ExamLevel>,
    limit: Option<usize>,
}

#[derive(Debug, Default, Deserialize)]
struct LimitQuery {
    limit: Option<usize>,
}

#[derive(Debug, Default, Deserialize)]
struct RecommendationQuery {
    category: Option<RecommendationCategory>,
    limit: Option<usize>,
}

fn clamp_limit(limit: Option<usize>) -> usize {
    limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT)
}

pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(health_handler))
        .route("/postings", get(postings_handler))
        .route("/learners/{id}/matches", get(matches_handler))
        .route("/learners/{id}/recommendations", get(recommendations_handler))
        .route("/crawl", post(crawl_handler))
        .route("/cleanup", post(cleanup_handler))
        .with_state(Arc::new(state))
}

/// Serve until ctrl-c, optionally running the periodic crawler alongside.
pub async fn serve(config: &SyncConfig, with_scheduler: bool) -> anyhow::Result<()> {
    let store = open_store(config).await?;
    let profiles = Arc::new(StaticProfileDirectory::load(&config.profiles_path).await?);
    let pipeline = Arc::new(
        build_pipeline(config, store.clone(), profiles.clone(), Arc::new(LoggingNotifier)).await?,
    );
    let engine = MatchingEngine::new(store, profiles);

    let mut scheduler = if with_scheduler {
        Some(start_periodic_crawling(pipeline.clone(), config.crawl_interval).await?)
    } else {
        None
    };

    let listener = TcpListener::bind(config.bind_addr.as_str()).await?;
    info!(addr = %config.bind_addr, "listening");
    axum::serve(listener, app(AppState::new(pipeline, engine)))
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;

    if let Some(sched) = scheduler.as_mut() {
        sched.shutdown().await?;
    }
    Ok(())
}

pub async fn serve_from_env(with_scheduler: bool) -> anyhow::Result<()> {
    serve(&SyncConfig::from_env(), with_scheduler).await
}

fn error_response(status: StatusCode, message: impl Into<String>) -> Response {
    (status, Json(json!({ "error": message.into() }))).into_response()
}

fn match_error(err: MatchError) -> Response {
    match err {
        MatchError::LearnerNotFound(_) => error_response(StatusCode::NOT_FOUND, err.to_string()),
        other => {
            error!(error = %other, "matching request failed");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, other.to_string())
        }
    }
}

async fn health_handler(State(state): State<Arc<AppState>>) -> Response {
    match state.pipeline.store().count().await {
        Ok(postings) => Json(json!({
            "status": "ok",
            "crawl_state": state.pipeline.state(),
            "postings": postings,
        }))
        .into_response(),
        Err(err) => error_response(StatusCode::SERVICE_UNAVAILABLE, err.to_string()),
    }
}

async fn postings_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<PostingsQuery>,
) -> Response {
    let filter = ActiveFilter {
        location_contains: query.location,
        department_contains: query.department,
        exam_level: query.exam_level,
        limit: Some(clamp_limit(query.limit)),
        ..ActiveFilter::open_at(Utc::now())
    };
    match state.pipeline.store().find_active(&filter).await {
        Ok(postings) => Json(postings).into_response(),
        Err(err) => error_response(StatusCode::INTERNAL_SERVER_ERROR, err.to_string()),
    }
}

async fn matches_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Query(query): Query<LimitQuery>,
) -> Response {
    match state.engine.find_matching_jobs(&id, clamp_limit(query.limit)).await {
        Ok(matches) => Json(matches).into_response(),
        Err(err) => match_error(err),
    }
}

async fn recommendations_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Query(query): Query<RecommendationQuery>,
) -> Response {
    let category = query.category.unwrap_or_default();
    match state
        .engine
        .get_job_recommendations(&id, category, clamp_limit(query.limit))
        .await
    {
        Ok(recs) => Json(json!({ "category": category, "results": recs })).into_response(),
        Err(err) => match_error(err),
    }
}

async fn crawl_handler(State(state): State<Arc<AppState>>) -> Response {
    match state.pipeline.crawl_all_sources().await {
        CycleOutcome::Completed(report) => Json(report).into_response(),
        CycleOutcome::Skipped => error_response(StatusCode::CONFLICT, "a crawl cycle is already running"),
    }
}

async fn cleanup_handler(State(state): State<Arc<AppState>>) -> Response {
    match state.pipeline.cleanup_expired_jobs().await {
        Ok(expired) => Json(json!({ "expired": expired })).into_response(),
        Err(err) => error_response(StatusCode::INTERNAL_SERVER_ERROR, err.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::Request;
    use http_body_util::BodyExt;
    use jobwatch_core::LearnerProfile;
    use jobwatch_storage::{FetchError, MemoryPostingStore, PageRenderer, SourceFetcher};
    use std::time::Duration;
    use tower::ServiceExt;

    const BOARD: &str = r#"<html><body>
        <article class="vacancy">
          <h3 class="position-title">Administrative Officer II</h3>
          <div class="department">Department of Budget and Management</div>
          <div class="place-of-assignment">Metro Manila, NCR</div>
          <span class="closing-date">2099-12-15</span>
        </article>
    </body></html>"#;

    struct StaticRenderer;

    #[async_trait]
    impl PageRenderer for StaticRenderer {
        async fn render(&self, _url: &str, _timeout: Duration) -> Result<String, FetchError> {
            Ok(BOARD.to_string())
        }
    }

    fn state() -> AppState {
        let sources = serde_json::from_value(json!([{
            "name": "csc-careers",
            "url": "https://careers.example.gov.ph/vacancies",
            "listing_selector": "article.vacancy",
            "layout": "civil_service_board"
        }]))
        .unwrap();
        let store = Arc::new(MemoryPostingStore::new());
        let pipeline = CrawlPipeline::new(
            sources,
            SourceFetcher::new(Arc::new(StaticRenderer), Duration::from_secs(5)),
            store.clone(),
        )
        .with_source_delay(Duration::ZERO);
        let profiles = StaticProfileDirectory::new(vec![LearnerProfile {
            learner_id: "learner-1".into(),
            exam_type: Some(ExamLevel::Professional),
            preferred_work_locations: vec!["Metro Manila".into()],
            target_positions: vec!["Administrative Officer".into()],
            enable_job_matching: true,
            profile_complete: true,
            ..LearnerProfile::default()
        }]);
        AppState::new(Arc::new(pipeline), MatchingEngine::new(store, Arc::new(profiles)))
    }

    async fn call(app: &Router, method: &str, uri: &str) -> (StatusCode, serde_json::Value) {
        let resp = app
            .clone()
            .oneshot(Request::builder().method(method).uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = resp.status();
        let body = resp.into_body().collect().await.unwrap().to_bytes();
        let value = if body.is_empty() {
            serde_json::Value::Null
        } else {
            serde_json::from_slice(&body).unwrap_or(serde_json::Value::Null)
        };
        (status, value)
    }

    #[tokio::test]
    async fn health_reports_idle_and_empty_store() {
        let app = app(state());
        let (status, body) = call(&app, "GET", "/healthz").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["crawl_state"], "idle");
        assert_eq!(body["postings"], 0);
    }

    #[tokio::test]
    async fn crawl_then_match_round_trip() {
        let app = app(state());
        let (status, report) = call(&app, "POST", "/crawl").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(report["outcome"], "completed");
        assert_eq!(report["sources"][0]["inserted"], 1);

        let (status, postings) = call(&app, "GET", "/postings?location=manila").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(postings.as_array().map(Vec::len), Some(1));

        let (status, matches) = call(&app, "GET", "/learners/learner-1/matches?limit=5").await;
        assert_eq!(status, StatusCode::OK);
        assert!(matches[0]["score"].as_u64().unwrap_or_default() >= 70);
        assert_eq!(matches[0]["reasons"].as_array().map(Vec::len), Some(3));
    }

    #[tokio::test]
    async fn unknown_learner_is_not_found() {
        let app = app(state());
        let (status, body) = call(&app, "GET", "/learners/nobody/matches").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert!(body["error"].as_str().unwrap_or_default().contains("nobody"));
    }

    #[tokio::test]
    async fn recommendations_default_to_recent_and_reject_unknown_category() {
        let app = app(state());
        call(&app, "POST", "/crawl").await;

        let (status, body) = call(&app, "GET", "/learners/guest/recommendations").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["category"], "recent");
        assert_eq!(body["results"][0]["score"], 50);

        let (status, _) = call(&app, "GET", "/learners/guest/recommendations?category=trending").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn cleanup_reports_expired_count() {
        let app = app(state());
        call(&app, "POST", "/crawl").await;
        let (status, body) = call(&app, "POST", "/cleanup").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["expired"], 0);
    }
}
